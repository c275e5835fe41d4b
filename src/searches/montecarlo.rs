use crate::derivation::DerivationTree;
use crate::errors::SearchError;
use crate::globals::is_better;
use crate::observer::{NoopObserver, SearchObserver};
use crate::problem::ExprProblem;
use crate::searches::{unix_time, ExprSearch, SearchResult, SearchStatistics};
use log::debug;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct McParams {
    pub maxsteps: usize,
    pub n_samples: usize,
    pub retries: usize,
    pub seed: u64,
}

impl Default for McParams {
    fn default() -> Self {
        Self {
            maxsteps: 10,
            n_samples: 1000,
            retries: 100,
            seed: 0,
        }
    }
}

/// Uniform Monte Carlo baseline: sample complete random trees under the
/// depth bound and keep the best.
pub struct MonteCarloSearch {
    params: McParams,
    pub statistics: SearchStatistics,
    observer: Box<dyn SearchObserver>,
    result: Option<SearchResult>,
}

impl MonteCarloSearch {
    pub fn new(params: McParams) -> Self {
        Self {
            params,
            statistics: SearchStatistics::default(),
            observer: Box::new(NoopObserver),
            result: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn SearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn params(&self) -> &McParams {
        &self.params
    }

    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    fn emit_parameters(&mut self) {
        self.observer
            .parameters("maxsteps", &self.params.maxsteps.to_string());
        self.observer
            .parameters("n_samples", &self.params.n_samples.to_string());
        self.observer
            .parameters("retries", &self.params.retries.to_string());
        self.observer.parameters("seed", &self.params.seed.to_string());
    }

    pub(crate) fn run<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
    ) -> Result<SearchResult, SearchError> {
        let start = Instant::now();
        self.observer.verbose1("starting monte carlo search");
        let grammar = problem.grammar();
        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let mut best: Option<SearchResult> = None;

        for i in 1..=self.params.n_samples {
            self.observer.iteration(i);
            let tree = DerivationTree::rand_with_retry(
                grammar.clone(),
                self.params.maxsteps,
                self.params.maxsteps,
                self.params.retries,
                &mut rng,
            )?;
            let expr = tree.get_expr()?;
            let fitness = match problem.fitness(&expr) {
                Ok(value) => value,
                Err(SearchError::EvaluationFailed(msg)) => {
                    debug!("evaluation failed for {}: {}", expr, msg);
                    f64::INFINITY
                }
                Err(err) => return Err(err),
            };
            if best.as_ref().map_or(true, |b| is_better(fitness, b.fitness)) {
                debug!("new best {} at eval {}: {}", fitness, i, expr);
                best = Some(SearchResult {
                    actions: tree.action_sequence(),
                    expr,
                    fitness,
                    best_at_eval: i,
                    total_evals: i,
                    tree,
                });
            }
            if let Some(b) = best.as_ref() {
                self.observer
                    .current_best(i, b.fitness, &b.expr.to_string(), None);
            }
        }

        let mut best = best.ok_or(SearchError::SamplingExhausted {
            retries: self.params.retries,
        })?;
        best.total_evals = self.params.n_samples;
        let duration = start.elapsed().as_secs_f64();
        self.statistics
            .record(&best, self.params.n_samples, duration);
        self.observer.elapsed_cpu_s(best.total_evals, duration);
        self.observer.result(
            best.fitness,
            &best.expr.to_string(),
            best.best_at_eval,
            best.total_evals,
        );
        self.result = Some(best.clone());
        Ok(best)
    }
}

impl ExprSearch for MonteCarloSearch {
    fn exprsearch<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
    ) -> Result<SearchResult, SearchError> {
        problem.initialize();
        self.emit_parameters();
        self.observer
            .computeinfo("starttime", &unix_time().to_string());
        let result = self.run(problem);
        self.observer.computeinfo("endtime", &unix_time().to_string());
        self.observer
            .computeinfo("cpu_time", &self.statistics.duration.to_string());
        result
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PmcParams {
    pub mc: McParams,
    pub n_threads: usize,
}

impl Default for PmcParams {
    fn default() -> Self {
        Self {
            mc: McParams::default(),
            n_threads: 2,
        }
    }
}

/// Parallel Monte Carlo: independent workers with deterministically derived
/// seeds, combined by minimum fitness. There is no shared mutable state
/// between workers.
pub struct ParallelMonteCarloSearch {
    params: PmcParams,
    pub statistics: SearchStatistics,
    observer: Box<dyn SearchObserver>,
    result: Option<SearchResult>,
}

impl ParallelMonteCarloSearch {
    pub fn new(params: PmcParams) -> Self {
        Self {
            params,
            statistics: SearchStatistics::default(),
            observer: Box::new(NoopObserver),
            result: None,
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn SearchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    fn worker_seed(&self, worker: usize) -> u64 {
        self.params.mc.seed ^ (worker as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
    }
}

impl ExprSearch for ParallelMonteCarloSearch {
    fn exprsearch<P: ExprProblem + Sync>(
        &mut self,
        problem: &P,
    ) -> Result<SearchResult, SearchError> {
        let start = Instant::now();
        problem.initialize();
        let n_threads = self.params.n_threads.max(1);
        self.observer.parameters("n_threads", &n_threads.to_string());
        self.observer
            .parameters("maxsteps", &self.params.mc.maxsteps.to_string());
        self.observer
            .parameters("n_samples", &self.params.mc.n_samples.to_string());
        self.observer
            .parameters("seed", &self.params.mc.seed.to_string());
        self.observer
            .verbose1(&format!("starting {} monte carlo workers", n_threads));

        let outcomes: Vec<Result<SearchResult, SearchError>> = thread::scope(|scope| {
            let workers: Vec<_> = (0..n_threads)
                .map(|k| {
                    let params = McParams {
                        seed: self.worker_seed(k),
                        ..self.params.mc
                    };
                    scope.spawn(move || MonteCarloSearch::new(params).run(problem))
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("monte carlo worker panicked"))
                .collect()
        });

        let mut best: Option<SearchResult> = None;
        let mut total_evals = 0;
        for outcome in outcomes {
            let candidate = outcome?;
            total_evals += candidate.total_evals;
            if best
                .as_ref()
                .map_or(true, |b| is_better(candidate.fitness, b.fitness))
            {
                best = Some(candidate);
            }
        }
        let mut best = best.ok_or(SearchError::SamplingExhausted {
            retries: self.params.mc.retries,
        })?;
        best.total_evals = total_evals;

        let duration = start.elapsed().as_secs_f64();
        self.statistics.record(&best, n_threads, duration);
        self.observer.elapsed_cpu_s(total_evals, duration);
        self.observer.result(
            best.fitness,
            &best.expr.to_string(),
            best.best_at_eval,
            best.total_evals,
        );
        self.result = Some(best.clone());
        Ok(best)
    }
}
