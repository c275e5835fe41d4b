use float_cmp::{ApproxEq, F64Margin};
use std::cmp::Ordering;

pub fn float_is_null(value: f64) -> bool {
    value.approx_eq(
        0.0,
        F64Margin {
            ulps: 2,
            epsilon: 0.0,
        },
    )
}

pub fn floats_equal(a: f64, b: f64) -> bool {
    a.approx_eq(
        b,
        F64Margin {
            ulps: 2,
            epsilon: 0.0,
        },
    )
}

// Ascending fitness order; +inf (failed evaluations) sinks to the tail.
pub fn fitness_cmp(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

pub fn is_better(candidate: f64, incumbent: f64) -> bool {
    fitness_cmp(candidate, incumbent) == Ordering::Less
}

#[cfg(test)]
mod globals_test {
    use super::*;

    #[test]
    fn null_and_equality_margins() {
        assert!(float_is_null(0.0));
        assert!(!float_is_null(1e-3));
        assert!(floats_equal(1.0 / 3.0, 1.0 - 2.0 / 3.0));
        assert!(!floats_equal(1.0, 1.0 + 1e-6));
    }

    #[test]
    fn failed_evaluations_sink_to_the_tail() {
        let mut fitnesses = vec![f64::INFINITY, 2.0, 0.5];
        fitnesses.sort_by(|a, b| fitness_cmp(*a, *b));
        assert_eq!(fitnesses[0], 0.5);
        assert!(fitnesses[2].is_infinite());
        assert!(is_better(0.5, 2.0));
        assert!(!is_better(f64::INFINITY, f64::INFINITY));
    }
}
