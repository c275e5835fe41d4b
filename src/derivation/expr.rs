use serde::{Deserialize, Serialize};
use std::fmt;

/// Expression value folded out of a complete derivation tree. Terminals keep
/// their literal text, range rules contribute integers, and sequences mirror
/// the And-structure of the grammar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Term(String),
    Int(i64),
    Seq(Vec<Expr>),
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Term(value) => write!(f, "{}", value),
            Expr::Int(value) => write!(f, "{}", value),
            Expr::Seq(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
        }
    }
}
