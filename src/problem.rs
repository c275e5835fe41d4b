use crate::derivation::Expr;
use crate::errors::SearchError;
use crate::grammar::Grammar;
use std::sync::Arc;
use std::thread;

/// Contract between the drivers and user code: a grammar to search over and
/// a fitness function to minimize. Side-data lives in the implementing
/// struct. `fitness` may fail with `EvaluationFailed`, which the genetic
/// driver maps to `+inf`; any other error halts the run.
pub trait ExprProblem {
    fn grammar(&self) -> Arc<Grammar>;

    fn fitness(&self, expr: &Expr) -> Result<f64, SearchError>;

    /// Called once at the start of every `exprsearch` run.
    fn initialize(&self) {}
}

/// Batch fitness hook. Individuals are independent once generated, so an
/// implementation may fan the batch out as long as `fitness` tolerates
/// concurrent calls for distinct inputs.
pub trait Evaluator {
    fn evaluate(
        &self,
        problem: &(dyn ExprProblem + Sync),
        batch: &[Expr],
    ) -> Vec<Result<f64, SearchError>>;
}

#[derive(Default)]
pub struct SequentialEvaluator;

impl Evaluator for SequentialEvaluator {
    fn evaluate(
        &self,
        problem: &(dyn ExprProblem + Sync),
        batch: &[Expr],
    ) -> Vec<Result<f64, SearchError>> {
        batch.iter().map(|expr| problem.fitness(expr)).collect()
    }
}

pub struct ThreadedEvaluator {
    n_threads: usize,
}

impl ThreadedEvaluator {
    pub fn new(n_threads: usize) -> Self {
        Self {
            n_threads: n_threads.max(1),
        }
    }
}

impl Evaluator for ThreadedEvaluator {
    fn evaluate(
        &self,
        problem: &(dyn ExprProblem + Sync),
        batch: &[Expr],
    ) -> Vec<Result<f64, SearchError>> {
        if batch.is_empty() {
            return Vec::new();
        }
        let chunk = (batch.len() + self.n_threads - 1) / self.n_threads;
        let mut results = Vec::with_capacity(batch.len());
        thread::scope(|scope| {
            let workers: Vec<_> = batch
                .chunks(chunk)
                .map(|part| {
                    scope.spawn(move || {
                        part.iter()
                            .map(|expr| problem.fitness(expr))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            for worker in workers {
                results.extend(worker.join().expect("evaluation worker panicked"));
            }
        });
        results
    }
}
