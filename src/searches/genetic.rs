use crate::derivation::{DerivationTree, Expr, NodeId};
use crate::errors::SearchError;
use crate::globals::{fitness_cmp, is_better};
use crate::grammar::Grammar;
use crate::observer::{NoopObserver, SearchObserver};
use crate::problem::{Evaluator, ExprProblem, SequentialEvaluator};
use crate::searches::{unix_time, ExprSearch, SearchResult, SearchStatistics};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneticParams {
    pub pop_size: usize,
    pub maxdepth: usize,
    pub iterations: usize,
    pub tournament_size: usize,
    pub top_keep: f64,
    pub crossover_frac: f64,
    pub mutate_frac: f64,
    pub rand_frac: f64,
    pub default_expr: Expr,
    pub retries: usize,
    pub seed: u64,
}

impl Default for GeneticParams {
    fn default() -> Self {
        Self {
            pop_size: 50,
            maxdepth: 6,
            iterations: 30,
            tournament_size: 5,
            top_keep: 0.1,
            crossover_frac: 0.5,
            mutate_frac: 0.3,
            rand_frac: 0.1,
            default_expr: Expr::Int(0),
            retries: 100,
            seed: 0,
        }
    }
}

/// One population member. `fitness` stays `None` until the individual has
/// been evaluated and is never recomputed afterwards.
#[derive(Clone, Debug)]
pub struct Individual {
    pub tree: DerivationTree,
    pub expr: Expr,
    pub fitness: Option<f64>,
}

impl Individual {
    fn from_tree(tree: DerivationTree) -> Result<Self, SearchError> {
        let expr = tree.get_expr()?;
        Ok(Self {
            tree,
            expr,
            fitness: None,
        })
    }
}

/// Tree-based genetic programming over derivation trees: ramped
/// initialization, elitism, rule-matched single-point crossover, subtree
/// mutation, and deterministic best-of-N tournament selection.
pub struct GeneticSearch {
    params: GeneticParams,
    pub statistics: SearchStatistics,
    evaluator: Box<dyn Evaluator>,
    observer: Box<dyn SearchObserver>,
    result: Option<SearchResult>,
}

pub struct GeneticBuilder {
    params: GeneticParams,
    evaluator: Option<Box<dyn Evaluator>>,
    observer: Option<Box<dyn SearchObserver>>,
}

impl Default for GeneticBuilder {
    fn default() -> Self {
        Self {
            params: GeneticParams::default(),
            evaluator: None,
            observer: None,
        }
    }
}

impl GeneticBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn params(mut self, params: GeneticParams) -> Self {
        self.params = params;
        self
    }

    pub fn pop_size(mut self, value: usize) -> Self {
        self.params.pop_size = value;
        self
    }

    pub fn maxdepth(mut self, value: usize) -> Self {
        self.params.maxdepth = value;
        self
    }

    pub fn iterations(mut self, value: usize) -> Self {
        self.params.iterations = value;
        self
    }

    pub fn tournament_size(mut self, value: usize) -> Self {
        self.params.tournament_size = value;
        self
    }

    pub fn top_keep(mut self, value: f64) -> Self {
        self.params.top_keep = value;
        self
    }

    pub fn crossover_frac(mut self, value: f64) -> Self {
        self.params.crossover_frac = value;
        self
    }

    pub fn mutate_frac(mut self, value: f64) -> Self {
        self.params.mutate_frac = value;
        self
    }

    pub fn rand_frac(mut self, value: f64) -> Self {
        self.params.rand_frac = value;
        self
    }

    pub fn default_expr(mut self, value: Expr) -> Self {
        self.params.default_expr = value;
        self
    }

    pub fn seed(mut self, value: u64) -> Self {
        self.params.seed = value;
        self
    }

    pub fn evaluator(mut self, value: Box<dyn Evaluator>) -> Self {
        self.evaluator = Some(value);
        self
    }

    pub fn observer(mut self, value: Box<dyn SearchObserver>) -> Self {
        self.observer = Some(value);
        self
    }

    pub fn build(self) -> GeneticSearch {
        GeneticSearch {
            params: self.params,
            statistics: SearchStatistics::default(),
            evaluator: self
                .evaluator
                .unwrap_or_else(|| Box::new(SequentialEvaluator)),
            observer: self.observer.unwrap_or_else(|| Box::new(NoopObserver)),
            result: None,
        }
    }
}

impl GeneticSearch {
    pub fn new(params: GeneticParams) -> Self {
        GeneticBuilder::new().params(params).build()
    }

    pub fn params(&self) -> &GeneticParams {
        &self.params
    }

    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    fn emit_parameters(&mut self) {
        self.observer
            .parameters("pop_size", &self.params.pop_size.to_string());
        self.observer
            .parameters("maxdepth", &self.params.maxdepth.to_string());
        self.observer
            .parameters("iterations", &self.params.iterations.to_string());
        self.observer
            .parameters("tournament_size", &self.params.tournament_size.to_string());
        self.observer
            .parameters("top_keep", &self.params.top_keep.to_string());
        self.observer
            .parameters("crossover_frac", &self.params.crossover_frac.to_string());
        self.observer
            .parameters("mutate_frac", &self.params.mutate_frac.to_string());
        self.observer
            .parameters("rand_frac", &self.params.rand_frac.to_string());
        self.observer.parameters("seed", &self.params.seed.to_string());
    }

    fn ramped_population(
        &self,
        grammar: &Arc<Grammar>,
        rng: &mut StdRng,
    ) -> Result<Vec<Individual>, SearchError> {
        let mindepth = grammar.min_depth_start();
        let maxdepth = self.params.maxdepth.max(mindepth);
        let span = maxdepth - mindepth + 1;
        let mut pop = Vec::with_capacity(self.params.pop_size);
        for i in 0..self.params.pop_size {
            let target = mindepth + i % span;
            let tree = DerivationTree::rand_with_retry(
                grammar.clone(),
                maxdepth,
                target,
                self.params.retries,
                rng,
            )?;
            pop.push(Individual::from_tree(tree)?);
        }
        Ok(pop)
    }

    /// Evaluate every unevaluated member through the batch hook. Failed
    /// evaluations survive with `+inf` fitness and the default expression.
    fn evaluate_population<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
        pop: &mut [Individual],
    ) -> Result<usize, SearchError> {
        let pending: Vec<usize> = pop
            .iter()
            .enumerate()
            .filter(|(_, member)| member.fitness.is_none())
            .map(|(i, _)| i)
            .collect();
        let batch: Vec<Expr> = pending.iter().map(|&i| pop[i].expr.clone()).collect();
        let outcomes = self.evaluator.evaluate(problem, &batch);
        let evaluated = pending.len();
        for (i, outcome) in pending.into_iter().zip(outcomes) {
            match outcome {
                Ok(value) => pop[i].fitness = Some(value),
                Err(SearchError::EvaluationFailed(msg)) => {
                    debug!("evaluation failed for {}: {}", pop[i].expr, msg);
                    pop[i].fitness = Some(f64::INFINITY);
                    pop[i].expr = self.params.default_expr.clone();
                }
                Err(err) => return Err(err),
            }
        }
        Ok(evaluated)
    }

    /// Deterministic best-of-N: the population is kept sorted, so the winner
    /// of a tournament is the smallest sampled index.
    fn tournament(&self, len: usize, rng: &mut StdRng) -> usize {
        let amount = self.params.tournament_size.clamp(1, len);
        rand::seq::index::sample(rng, len, amount)
            .into_iter()
            .min()
            .unwrap_or(0)
    }

    /// Single-point rule-matched crossover: pick a named node in the first
    /// copy, a node of the same rule in the second, and swap the decided
    /// subtrees under them.
    fn crossover(
        &self,
        first: &Individual,
        second: &Individual,
        grammar: &Grammar,
        rng: &mut StdRng,
    ) -> Result<(Individual, Individual), SearchError> {
        let mut c1 = first.tree.clone();
        let mut c2 = second.tree.clone();
        let named: Vec<NodeId> = c1
            .reachable_nodes()
            .into_iter()
            .filter(|&id| grammar.name_of(c1.node(id).rule).is_some())
            .collect();
        let site = named[rng.gen_range(0..named.len())];
        let rule = c1.node(site).rule;
        let matches: Vec<NodeId> = c2
            .reachable_nodes()
            .into_iter()
            .filter(|&id| c2.node(id).rule == rule)
            .collect();
        if matches.is_empty() {
            return Err(SearchError::RuleNotFound(grammar.label(rule)));
        }
        let other = matches[rng.gen_range(0..matches.len())];
        c1.graft_children(site, &second.tree, other);
        c2.graft_children(other, &first.tree, site);
        let limit = self.params.maxdepth;
        for child in [&c1, &c2] {
            let depth = child.max_depth();
            if depth > limit {
                return Err(SearchError::DepthExceeded { depth, limit });
            }
        }
        c1.compact();
        c2.compact();
        Ok((Individual::from_tree(c1)?, Individual::from_tree(c2)?))
    }

    /// Resample the subtree under a uniformly random node, reusing the
    /// depth-bounded generator with whatever budget is left there.
    fn mutate(&self, parent: &Individual, rng: &mut StdRng) -> Result<Individual, SearchError> {
        let mut tree = parent.tree.clone();
        let sites = tree.reachable_nodes();
        let site = sites[rng.gen_range(0..sites.len())];
        tree.resample_subtree(site, rng, self.params.maxdepth)?;
        tree.compact();
        Individual::from_tree(tree)
    }

    fn next_population(
        &self,
        pop: &[Individual],
        grammar: &Arc<Grammar>,
        rng: &mut StdRng,
    ) -> Result<Vec<Individual>, SearchError> {
        let n = self.params.pop_size;
        let n_elite = (self.params.top_keep * n as f64).floor() as usize;
        let n_cross = (self.params.crossover_frac * n as f64).floor() as usize;
        let n_mut = (self.params.mutate_frac * n as f64).floor() as usize;
        let n_rand = (self.params.rand_frac * n as f64).floor() as usize;
        let cap = 100 * n.max(1);

        let mut next: Vec<Individual> = Vec::with_capacity(n + 1);
        next.extend(pop.iter().take(n_elite.min(pop.len())).cloned());

        let mut produced = 0;
        let mut attempts = 0;
        while produced < n_cross && attempts < cap {
            attempts += 1;
            let first = self.tournament(pop.len(), rng);
            let second = self.tournament(pop.len(), rng);
            match self.crossover(&pop[first], &pop[second], grammar, rng) {
                Ok((a, b)) => {
                    next.push(a);
                    next.push(b);
                    produced += 2;
                }
                // Failed pairings do not count as children.
                Err(SearchError::RuleNotFound(_)) | Err(SearchError::DepthExceeded { .. }) => {
                    continue
                }
                Err(err) => return Err(err),
            }
        }

        produced = 0;
        attempts = 0;
        while produced < n_mut && attempts < cap {
            attempts += 1;
            let parent = self.tournament(pop.len(), rng);
            match self.mutate(&pop[parent], rng) {
                Ok(child) => {
                    next.push(child);
                    produced += 1;
                }
                // Retry at a fresh mutation point.
                Err(SearchError::IncompleteExpansion { .. }) => continue,
                Err(err) => return Err(err),
            }
        }

        let maxdepth = self.params.maxdepth.max(grammar.min_depth_start());
        for _ in 0..n_rand {
            let tree = DerivationTree::rand_with_retry(
                grammar.clone(),
                maxdepth,
                maxdepth,
                self.params.retries,
                rng,
            )?;
            next.push(Individual::from_tree(tree)?);
        }

        while next.len() < n {
            let winner = self.tournament(pop.len(), rng);
            next.push(pop[winner].clone());
        }
        next.truncate(n);
        Ok(next)
    }
}

impl ExprSearch for GeneticSearch {
    fn exprsearch<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
    ) -> Result<SearchResult, SearchError> {
        let start = Instant::now();
        problem.initialize();
        self.emit_parameters();
        self.observer
            .computeinfo("starttime", &unix_time().to_string());
        self.observer.verbose1("starting genetic programming search");
        let grammar = problem.grammar();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut pop = self.ramped_population(&grammar, &mut rng)?;
        if pop.is_empty() {
            return Err(SearchError::SamplingExhausted {
                retries: self.params.retries,
            });
        }
        let mut best: Option<SearchResult> = None;
        let mut total_evals = 0;

        for iter in 1..=self.params.iterations {
            self.observer.iteration(iter);
            total_evals += self.evaluate_population(problem, &mut pop)?;
            pop.sort_by(|a, b| {
                fitness_cmp(
                    a.fitness.unwrap_or(f64::INFINITY),
                    b.fitness.unwrap_or(f64::INFINITY),
                )
            });
            let leader_fitness = pop[0].fitness.unwrap_or(f64::INFINITY);
            if best
                .as_ref()
                .map_or(true, |b| is_better(leader_fitness, b.fitness))
            {
                debug!(
                    "generation {}: new best {} after {} evals",
                    iter, leader_fitness, total_evals
                );
                best = Some(SearchResult {
                    expr: pop[0].expr.clone(),
                    fitness: leader_fitness,
                    best_at_eval: total_evals,
                    total_evals,
                    actions: pop[0].tree.action_sequence(),
                    tree: pop[0].tree.clone(),
                });
            }
            if let Some(b) = best.as_ref() {
                self.observer.fitness(iter, b.fitness);
                self.observer.code(iter, &b.expr.to_string());
                self.observer
                    .current_best(total_evals, b.fitness, &b.expr.to_string(), None);
            }
            self.observer.population(iter, &pop);
            self.observer
                .elapsed_cpu_s(total_evals, start.elapsed().as_secs_f64());

            if iter < self.params.iterations {
                pop = self.next_population(&pop, &grammar, &mut rng)?;
            }
        }

        let mut best = best.ok_or(SearchError::SamplingExhausted {
            retries: self.params.retries,
        })?;
        best.total_evals = total_evals;
        let duration = start.elapsed().as_secs_f64();
        self.statistics
            .record(&best, self.params.iterations, duration);
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
