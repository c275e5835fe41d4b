pub mod genetic;
pub mod mcts;
pub mod montecarlo;

use crate::derivation::{DerivationTree, Expr};
use crate::errors::SearchError;
use crate::problem::ExprProblem;
use serde::{Deserialize, Serialize};

/// Uniform record every driver returns: the winning expression, its fitness,
/// the evaluation index at which it was found, the evaluation budget spent,
/// and the tree plus linear action sequence that produced it.
#[derive(Clone, Debug)]
pub struct SearchResult {
    pub expr: Expr,
    pub fitness: f64,
    pub best_at_eval: usize,
    pub total_evals: usize,
    pub actions: Vec<usize>,
    pub tree: DerivationTree,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SearchStatistics {
    pub best_fitness: f64,
    pub best_at_eval: usize,
    pub total_evals: usize,
    pub iterations: usize,
    pub duration: f64,
}

impl Default for SearchStatistics {
    fn default() -> Self {
        Self {
            best_fitness: f64::INFINITY,
            best_at_eval: 0,
            total_evals: 0,
            iterations: 0,
            duration: 0.0,
        }
    }
}

impl SearchStatistics {
    pub(crate) fn record(&mut self, result: &SearchResult, iterations: usize, duration: f64) {
        self.best_fitness = result.fitness;
        self.best_at_eval = result.best_at_eval;
        self.total_evals = result.total_evals;
        self.iterations = iterations;
        self.duration = duration;
    }
}

/// Driver entry point: run the search against a problem and return the best
/// expression found.
pub trait ExprSearch {
    fn exprsearch<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
    ) -> Result<SearchResult, SearchError>;
}

pub(crate) fn unix_time() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
