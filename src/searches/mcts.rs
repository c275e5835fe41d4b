use crate::derivation::LinearDerivTree;
use crate::errors::SearchError;
use crate::globals::is_better;
use crate::observer::{NoopObserver, SearchObserver};
use crate::problem::ExprProblem;
use crate::searches::{unix_time, ExprSearch, SearchResult, SearchStatistics};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MctsParams {
    pub maxsteps: usize,
    pub max_neg_reward: f64,
    pub step_reward: f64,
    pub n_iters: usize,
    pub searchdepth: usize,
    pub exploration_const: f64,
    /// Back up the running max of observed returns instead of the mean.
    pub maxmod: bool,
    pub q0: f64,
    pub discount: f64,
    pub seed: u64,
}

impl Default for MctsParams {
    fn default() -> Self {
        Self {
            maxsteps: 20,
            max_neg_reward: -1e5,
            step_reward: 0.0,
            n_iters: 1000,
            searchdepth: 20,
            exploration_const: 100.0,
            maxmod: false,
            q0: 0.0,
            discount: 1.0,
            seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct MctsEdge {
    pub action: usize,
    pub n: u32,
    pub q: f64,
    pub child: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct MctsNode {
    pub n: u32,
    pub terminal: bool,
    pub exhausted: bool,
    pub edges: Vec<MctsEdge>,
}

/// UCT search tree, separate from the derivation trees: nodes are MDP states
/// reached from the root state, edges carry visit counts and Q-values.
#[derive(Clone, Debug, Default)]
pub struct MctsTree {
    nodes: Vec<MctsNode>,
}

impl MctsTree {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: usize) -> &MctsNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &MctsNode {
        &self.nodes[0]
    }

    fn push(&mut self, node: MctsNode) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }
}

/// Monte Carlo tree search over the derivation MDP: states are growing
/// linear derivation trees, terminal states are complete trees (rewarded
/// with `-fitness`) or dead ends (rewarded with `max_neg_reward`).
pub struct MctsSearch {
    params: MctsParams,
    pub statistics: SearchStatistics,
    observer: Box<dyn SearchObserver>,
    result: Option<SearchResult>,
}

pub struct MctsBuilder {
    params: MctsParams,
    observer: Option<Box<dyn SearchObserver>>,
}

impl Default for MctsBuilder {
    fn default() -> Self {
        Self {
            params: MctsParams::default(),
            observer: None,
        }
    }
}

impl MctsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(mut self, params: MctsParams) -> Self {
        self.params = params;
        self
    }

    pub fn maxsteps(mut self, value: usize) -> Self {
        self.params.maxsteps = value;
        self
    }

    pub fn n_iters(mut self, value: usize) -> Self {
        self.params.n_iters = value;
        self
    }

    pub fn searchdepth(mut self, value: usize) -> Self {
        self.params.searchdepth = value;
        self
    }

    pub fn exploration_const(mut self, value: f64) -> Self {
        self.params.exploration_const = value;
        self
    }

    pub fn maxmod(mut self, value: bool) -> Self {
        self.params.maxmod = value;
        self
    }

    pub fn q0(mut self, value: f64) -> Self {
        self.params.q0 = value;
        self
    }

    pub fn seed(mut self, value: u64) -> Self {
        self.params.seed = value;
        self
    }

    pub fn observer(mut self, value: Box<dyn SearchObserver>) -> Self {
        self.observer = Some(value);
        self
    }

    pub fn build(self) -> MctsSearch {
        MctsSearch {
            params: self.params,
            statistics: SearchStatistics::default(),
            observer: self.observer.unwrap_or_else(|| Box::new(NoopObserver)),
            result: None,
        }
    }
}

impl MctsSearch {
    pub fn new(params: MctsParams) -> Self {
        MctsBuilder::new().params(params).build()
    }

    pub fn params(&self) -> &MctsParams {
        &self.params
    }

    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    fn emit_parameters(&mut self) {
        self.observer
            .parameters("maxsteps", &self.params.maxsteps.to_string());
        self.observer
            .parameters("max_neg_reward", &self.params.max_neg_reward.to_string());
        self.observer
            .parameters("step_reward", &self.params.step_reward.to_string());
        self.observer
            .parameters("n_iters", &self.params.n_iters.to_string());
        self.observer
            .parameters("searchdepth", &self.params.searchdepth.to_string());
        self.observer.parameters(
            "exploration_const",
            &self.params.exploration_const.to_string(),
        );
        self.observer
            .parameters("maxmod", &self.params.maxmod.to_string());
        self.observer.parameters("q0", &self.params.q0.to_string());
        self.observer
            .parameters("discount", &self.params.discount.to_string());
        self.observer.parameters("seed", &self.params.seed.to_string());
    }

    fn make_node(&self, state: &LinearDerivTree) -> MctsNode {
        let legal = state.legal_actions();
        let terminal =
            state.is_complete() || state.num_steps() >= self.params.maxsteps || legal.is_empty();
        let edges = if terminal {
            Vec::new()
        } else {
            legal
                .into_iter()
                .map(|action| MctsEdge {
                    action,
                    n: 0,
                    q: self.params.q0,
                    child: None,
                })
                .collect()
        };
        MctsNode {
            n: 0,
            terminal,
            exhausted: false,
            edges,
        }
    }

    /// UCT pick among expanded, non-exhausted children; `None` means every
    /// child is exhausted.
    fn uct_select(&self, tree: &MctsTree, node: usize) -> Option<usize> {
        let ln_n = (tree.nodes[node].n.max(1) as f64).ln();
        let mut best_idx = None;
        let mut best_score = f64::NEG_INFINITY;
        for (idx, edge) in tree.nodes[node].edges.iter().enumerate() {
            let child = match edge.child {
                Some(child) => child,
                None => continue,
            };
            if tree.nodes[child].exhausted {
                continue;
            }
            let score = edge.q
                + self.params.exploration_const * (ln_n / edge.n.max(1) as f64).sqrt();
            if score > best_score {
                best_score = score;
                best_idx = Some(idx);
            }
        }
        best_idx
    }

    /// A node is exhausted once it is terminal or all of its children are;
    /// walk the visited path bottom-up and stop at the first survivor.
    fn propagate_exhaustion(tree: &mut MctsTree, path: &[(usize, usize)]) {
        for &(parent, _) in path.iter().rev() {
            if tree.nodes[parent].exhausted {
                continue;
            }
            let settled = tree.nodes[parent].edges.iter().all(|edge| match edge.child {
                Some(child) => tree.nodes[child].exhausted,
                None => false,
            });
            if settled {
                tree.nodes[parent].exhausted = true;
            } else {
                break;
            }
        }
    }
}

impl ExprSearch for MctsSearch {
    fn exprsearch<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
    ) -> Result<SearchResult, SearchError> {
        let start = Instant::now();
        problem.initialize();
        self.emit_parameters();
        self.observer
            .computeinfo("starttime", &unix_time().to_string());
        self.observer.verbose1("starting mcts search");
        let grammar = problem.grammar();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let root_state = LinearDerivTree::new(grammar, self.params.maxsteps);
        let mut tree = MctsTree::default();
        let root = self.make_node(&root_state);
        tree.push(root);

        let mut best: Option<SearchResult> = None;
        let mut total_evals = 0;
        let mut iterations = 0;

        for i in 1..=self.params.n_iters {
            if tree.nodes[0].exhausted {
                debug!("root exhausted after {} iterations", iterations);
                break;
            }
            iterations = i;
            self.observer.iteration(i);

            let mut state = root_state.clone();
            let mut node = 0;
            let mut path: Vec<(usize, usize)> = Vec::new();
            let mut stalled = false;

            // selection, then one expansion
            loop {
                if tree.nodes[node].terminal {
                    break;
                }
                let unexpanded: Vec<usize> = tree.nodes[node]
                    .edges
                    .iter()
                    .enumerate()
                    .filter(|(_, edge)| edge.child.is_none())
                    .map(|(idx, _)| idx)
                    .collect();
                if !unexpanded.is_empty() {
                    let edge_idx = unexpanded[rng.gen_range(0..unexpanded.len())];
                    let action = tree.nodes[node].edges[edge_idx].action;
                    state.step(action)?;
                    let child = self.make_node(&state);
                    let child = tree.push(child);
                    tree.nodes[node].edges[edge_idx].child = Some(child);
                    path.push((node, edge_idx));
                    node = child;
                    break;
                }
                match self.uct_select(&tree, node) {
                    Some(edge_idx) => {
                        let action = tree.nodes[node].edges[edge_idx].action;
                        state.step(action)?;
                        path.push((node, edge_idx));
                        node = match tree.nodes[node].edges[edge_idx].child {
                            Some(child) => child,
                            None => {
                                stalled = true;
                                break;
                            }
                        };
                    }
                    None => {
                        tree.nodes[node].exhausted = true;
                        stalled = true;
                        break;
                    }
                }
            }

            if stalled {
                Self::propagate_exhaustion(&mut tree, &path);
                continue;
            }

            // rollout with uniform legal actions, capped by searchdepth
            let mut rollout_steps = 0;
            let terminal_reward;
            loop {
                if state.is_complete() {
                    let expr = state.tree.get_expr()?;
                    let fitness = match problem.fitness(&expr) {
                        Ok(value) => value,
                        Err(SearchError::EvaluationFailed(msg)) => {
                            debug!("evaluation failed for {}: {}", expr, msg);
                            f64::INFINITY
                        }
                        Err(err) => return Err(err),
                    };
                    total_evals += 1;
                    terminal_reward = if fitness.is_finite() {
                        -fitness
                    } else {
                        self.params.max_neg_reward
                    };
                    if best.as_ref().map_or(true, |b| is_better(fitness, b.fitness)) {
                        debug!("new best {} at eval {}: {}", fitness, total_evals, expr);
                        best = Some(SearchResult {
                            expr: expr.clone(),
                            fitness,
                            best_at_eval: total_evals,
                            total_evals,
                            actions: state.actions.clone(),
                            tree: state.tree.clone(),
                        });
                        if let Some(b) = best.as_ref() {
                            self.observer.current_best(
                                total_evals,
                                b.fitness,
                                &b.expr.to_string(),
                                Some(&b.actions),
                            );
                        }
                    }
                    break;
                }
                if state.num_steps() >= self.params.maxsteps
                    || rollout_steps >= self.params.searchdepth
                {
                    terminal_reward = self.params.max_neg_reward;
                    break;
                }
                let legal = state.legal_actions();
                if legal.is_empty() {
                    terminal_reward = self.params.max_neg_reward;
                    break;
                }
                state.step(legal[rng.gen_range(0..legal.len())])?;
                rollout_steps += 1;
            }

            // discounted backup along the visited path
            let mut ret = terminal_reward;
            for _ in 0..rollout_steps {
                ret = self.params.step_reward + self.params.discount * ret;
            }
            for &(parent, edge_idx) in path.iter().rev() {
                let entry = &mut tree.nodes[parent];
                entry.n += 1;
                let edge = &mut entry.edges[edge_idx];
                edge.n += 1;
                if self.params.maxmod {
                    edge.q = edge.q.max(ret);
                } else {
                    edge.q += (ret - edge.q) / edge.n as f64;
                }
                ret = self.params.step_reward + self.params.discount * ret;
            }

            if tree.nodes[node].terminal {
                tree.nodes[node].exhausted = true;
            }
            Self::propagate_exhaustion(&mut tree, &path);
            self.observer.mcts_tree(i, &tree, &state);
        }

        let mut best = best.ok_or(SearchError::SamplingExhausted {
            retries: self.params.n_iters,
        })?;
        best.total_evals = total_evals;
        let duration = start.elapsed().as_secs_f64();
        self.statistics.record(&best, iterations, duration);
        self.observer.elapsed_cpu_s(total_evals, duration);
        self.observer.result(
            best.fitness,
            &best.expr.to_string(),
            best.best_at_eval,
            best.total_evals,
        );
        self.observer.computeinfo("endtime", &unix_time().to_string());
        self.observer
            .computeinfo("cpu_time", &duration.to_string());
        self.result = Some(best.clone());
        Ok(best)
    }
}
