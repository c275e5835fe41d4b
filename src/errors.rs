use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Formatter;

/// Failure taxonomy of the search core. The first four variants are
/// recoverable inside the drivers; the last two halt the current run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SearchError {
    /// No legal action exists under the remaining depth budget.
    IncompleteExpansion { rule: String, depth: usize },
    /// Crossover found no node of the wanted rule in the second parent.
    RuleNotFound(String),
    /// A crossover product grew past the configured depth limit.
    DepthExceeded { depth: usize, limit: usize },
    /// The user fitness function failed for this expression.
    EvaluationFailed(String),
    /// Random generation hit its retry cap without a complete tree.
    SamplingExhausted { retries: usize },
    /// The min-depth fixpoint never stabilized for the named rules.
    UnproductiveGrammar { rules: Vec<String> },
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::IncompleteExpansion { rule, depth } => {
                write!(f, "no legal action for rule {} at depth {}", rule, depth)
            }
            SearchError::RuleNotFound(rule) => {
                write!(f, "no node with rule {} in second parent", rule)
            }
            SearchError::DepthExceeded { depth, limit } => {
                write!(f, "tree depth {} exceeds limit {}", depth, limit)
            }
            SearchError::EvaluationFailed(msg) => write!(f, "fitness evaluation failed: {}", msg),
            SearchError::SamplingExhausted { retries } => {
                write!(f, "no complete tree after {} sampling attempts", retries)
            }
            SearchError::UnproductiveGrammar { rules } => {
                write!(f, "unproductive grammar rules: {}", rules.join(", "))
            }
        }
    }
}

impl std::error::Error for SearchError {}
