use crate::derivation::LinearDerivTree;
use crate::searches::genetic::Individual;
use crate::searches::mcts::MctsTree;

/// Side-effect-only sink for the named events drivers emit. Every method
/// defaults to a no-op, so observers implement only the families they care
/// about; the drivers never read anything back.
pub trait SearchObserver {
    fn verbose1(&mut self, _msg: &str) {}

    fn iteration(&mut self, _i: usize) {}

    fn elapsed_cpu_s(&mut self, _nevals: usize, _seconds: f64) {}

    /// `actions` is populated by the MCTS driver only.
    fn current_best(
        &mut self,
        _nevals: usize,
        _fitness: f64,
        _expr: &str,
        _actions: Option<&[usize]>,
    ) {
    }

    fn fitness(&mut self, _iter: usize, _fitness: f64) {}

    fn code(&mut self, _iter: usize, _code: &str) {}

    fn population(&mut self, _iter: usize, _pop: &[Individual]) {}

    fn result(&mut self, _fitness: f64, _expr: &str, _best_at_eval: usize, _total_evals: usize) {}

    fn computeinfo(&mut self, _key: &str, _value: &str) {}

    fn parameters(&mut self, _key: &str, _value: &str) {}

    fn mcts_tree(&mut self, _i: usize, _tree: &MctsTree, _state: &LinearDerivTree) {}
}

#[derive(Default)]
pub struct NoopObserver;

impl SearchObserver for NoopObserver {}
