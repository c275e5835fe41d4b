use exprsearch_rs::derivation::Expr;
use exprsearch_rs::errors::SearchError;
use exprsearch_rs::grammar::{alt, nt, range, seq, t, Grammar, GrammarBuilder};
use exprsearch_rs::problem::ExprProblem;
use std::sync::Arc;

/// The standard arith fixture:
/// start = expr; expr = num | expr op expr; op = + | * | -; num = 1|2|3.
pub fn arith_grammar() -> Arc<Grammar> {
    Arc::new(
        GrammarBuilder::new()
            .rule("start", nt("expr"))
            .rule(
                "expr",
                alt(vec![nt("num"), seq(vec![nt("expr"), nt("op"), nt("expr")])]),
            )
            .rule("op", alt(vec![t("+"), t("*"), t("-")]))
            .rule("num", range(1, 3))
            .start("start")
            .build()
            .unwrap(),
    )
}

/// Structural evaluation of arith expressions: a three-part sequence is
/// `left op right`, anything else is a literal.
pub fn evaluate(expr: &Expr) -> f64 {
    match expr {
        Expr::Int(value) => *value as f64,
        Expr::Term(_) => 0.0,
        Expr::Seq(parts) if parts.len() == 3 => {
            let left = evaluate(&parts[0]);
            let right = evaluate(&parts[2]);
            match &parts[1] {
                Expr::Term(op) if op == "+" => left + right,
                Expr::Term(op) if op == "*" => left * right,
                Expr::Term(op) if op == "-" => left - right,
                _ => 0.0,
            }
        }
        Expr::Seq(_) => 0.0,
    }
}

/// Minimize the distance between the evaluated expression and a target.
pub struct ArithTarget {
    grammar: Arc<Grammar>,
    target: f64,
}

impl ArithTarget {
    pub fn new(target: f64) -> Self {
        Self {
            grammar: arith_grammar(),
            target,
        }
    }
}

impl ExprProblem for ArithTarget {
    fn grammar(&self) -> Arc<Grammar> {
        self.grammar.clone()
    }

    fn fitness(&self, expr: &Expr) -> Result<f64, SearchError> {
        Ok((evaluate(expr) - self.target).abs())
    }
}
