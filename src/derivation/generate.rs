use crate::derivation::{DerivationTree, NodeId};
use crate::errors::SearchError;
use crate::grammar::Grammar;
use rand::Rng;
use std::sync::Arc;

impl DerivationTree {
    /// Drive the open frontier to completion with uniformly random legal
    /// actions. An action is legal when the minimum depth it needs below the
    /// node fits inside `target_depth`; an empty legal set fails the attempt
    /// with `IncompleteExpansion`, leaving the tree partially expanded.
    pub fn rand_expand<R: Rng>(
        &mut self,
        rng: &mut R,
        target_depth: usize,
    ) -> Result<(), SearchError> {
        loop {
            self.advance_frontier();
            let open = match self.open_decision() {
                Some(open) => open,
                None => return Ok(()),
            };
            let node = self.node(open);
            let budget = target_depth.saturating_sub(node.depth);
            let legal = self.grammar().legal_actions(node.rule, budget);
            if legal.is_empty() {
                return Err(SearchError::IncompleteExpansion {
                    rule: self.grammar().label(node.rule),
                    depth: node.depth,
                });
            }
            let action = legal[rng.gen_range(0..legal.len())];
            self.expand_decision(open, action)?;
        }
    }

    /// Sample a complete tree bounded by `target_depth`, resetting and
    /// retrying on dead ends up to `retries` times.
    pub fn rand_with_retry<R: Rng>(
        grammar: Arc<Grammar>,
        maxsteps: usize,
        target_depth: usize,
        retries: usize,
        rng: &mut R,
    ) -> Result<DerivationTree, SearchError> {
        let mut tree = DerivationTree::new(grammar, maxsteps);
        for _ in 0..retries {
            match tree.rand_expand(rng, target_depth) {
                Ok(()) => return Ok(tree),
                Err(SearchError::IncompleteExpansion { .. }) => tree.reset(),
                Err(err) => return Err(err),
            }
        }
        Err(SearchError::SamplingExhausted { retries })
    }

    /// Throw away the subtree decided at `node` and regrow it randomly under
    /// `target_depth`. The rest of the tree must already be complete; on
    /// failure the tree is left partial and the caller starts over from a
    /// copy.
    pub fn resample_subtree<R: Rng>(
        &mut self,
        node: NodeId,
        rng: &mut R,
        target_depth: usize,
    ) -> Result<(), SearchError> {
        self.nodes[node].action = None;
        self.nodes[node].children.clear();
        self.frontier.clear();
        let grammar: Arc<Grammar> = self.grammar().clone();
        if grammar.is_decision(self.nodes[node].rule) {
            self.frontier.push_back(node);
        } else {
            self.expand_node(node);
        }
        self.rand_expand(rng, target_depth)
    }
}

#[cfg(test)]
mod generate_test {
    use super::*;
    use crate::grammar::{alt, nt, range, seq, t, GrammarBuilder};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn arith() -> Arc<Grammar> {
        Arc::new(
            GrammarBuilder::new()
                .rule("start", nt("expr"))
                .rule(
                    "expr",
                    alt(vec![
                        nt("num"),
                        seq(vec![nt("expr"), nt("op"), nt("expr")]),
                    ]),
                )
                .rule("op", alt(vec![t("+"), t("*"), t("-")]))
                .rule("num", range(1, 3))
                .start("start")
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn samples_stay_under_the_depth_bound() {
        let grammar = arith();
        let mut rng = StdRng::seed_from_u64(7);
        for target in grammar.min_depth_start()..=9 {
            for _ in 0..50 {
                let tree =
                    DerivationTree::rand_with_retry(grammar.clone(), target, target, 5, &mut rng)
                        .unwrap();
                assert!(tree.is_complete());
                assert!(tree.max_depth() <= target);
            }
        }
    }

    #[test]
    fn min_depth_target_is_reachable() {
        let grammar = arith();
        let target = grammar.min_depth_start();
        let mut rng = StdRng::seed_from_u64(1);
        let tree =
            DerivationTree::rand_with_retry(grammar.clone(), target, target, 5, &mut rng).unwrap();
        assert_eq!(tree.max_depth(), target);
    }

    #[test]
    fn too_tight_target_exhausts_sampling() {
        let grammar = arith();
        let target = grammar.min_depth_start() - 1;
        let mut rng = StdRng::seed_from_u64(1);
        let result = DerivationTree::rand_with_retry(grammar.clone(), target, target, 3, &mut rng);
        assert_eq!(result.err(), Some(SearchError::SamplingExhausted { retries: 3 }));
    }

    #[test]
    fn same_seed_same_tree() {
        let grammar = arith();
        let mut first = StdRng::seed_from_u64(42);
        let mut second = StdRng::seed_from_u64(42);
        let a = DerivationTree::rand_with_retry(grammar.clone(), 8, 8, 5, &mut first).unwrap();
        let b = DerivationTree::rand_with_retry(grammar, 8, 8, 5, &mut second).unwrap();
        assert_eq!(a.get_expr().unwrap(), b.get_expr().unwrap());
        assert_eq!(a.action_sequence(), b.action_sequence());
    }

    #[test]
    fn resample_keeps_the_tree_complete() {
        let grammar = arith();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..20 {
            let mut tree =
                DerivationTree::rand_with_retry(grammar.clone(), 8, 8, 5, &mut rng).unwrap();
            let sites = tree.reachable_nodes();
            let site = sites[rng.gen_range(0..sites.len())];
            if tree.resample_subtree(site, &mut rng, 8).is_ok() {
                tree.compact();
                assert!(tree.is_complete());
                assert!(tree.max_depth() <= 8);
                assert!(tree.get_expr().is_ok());
            }
        }
    }
}
