use crate::errors::SearchError;
use crate::grammar::{RuleId, RuleKind, RuleNode};

const UNSET: usize = usize::MAX;

/// Precomputed minimum-depth tables. `by_rule[r]` is the smallest depth of a
/// complete subtree rooted at rule `r`; `by_action[r][a-1]` is the smallest
/// depth required below `r` when taking action `a` at a decision.
#[derive(Clone, Debug)]
pub struct MinDepths {
    by_rule: Vec<usize>,
    by_action: Vec<Vec<usize>>,
}

impl MinDepths {
    pub fn by_rule(&self, id: RuleId) -> usize {
        self.by_rule[id]
    }

    pub fn by_action(&self, id: RuleId, action: usize) -> usize {
        self.by_action[id][action - 1]
    }
}

/// Iterate the depth equations to fixpoint. Rules reachable from `start`
/// that never stabilize make the grammar unproductive.
pub(crate) fn compute(rules: &[RuleNode], start: RuleId) -> Result<MinDepths, SearchError> {
    let mut by_rule = vec![UNSET; rules.len()];

    let mut changed = true;
    while changed {
        changed = false;
        for (id, rule) in rules.iter().enumerate() {
            let depth = match &rule.kind {
                RuleKind::Terminal(_) | RuleKind::Range(_, _) => Some(1),
                RuleKind::Ref(target) => finite(by_rule[*target]).map(|d| d + 1),
                RuleKind::And(parts) => parts
                    .iter()
                    .map(|part| finite(by_rule[*part]))
                    .collect::<Option<Vec<_>>>()
                    .and_then(|ds| ds.into_iter().max())
                    .map(|d| d + 1),
                RuleKind::Or(choices) => choices
                    .iter()
                    .filter_map(|choice| finite(by_rule[*choice]))
                    .min()
                    .map(|d| d + 1),
            };
            if let Some(depth) = depth {
                if depth < by_rule[id] {
                    by_rule[id] = depth;
                    changed = true;
                }
            }
        }
    }

    let unproductive: Vec<String> = reachable(rules, start)
        .into_iter()
        .filter(|&id| by_rule[id] == UNSET)
        .map(|id| describe(rules, id))
        .collect();
    if !unproductive.is_empty() {
        return Err(SearchError::UnproductiveGrammar {
            rules: unproductive,
        });
    }

    let by_action = rules
        .iter()
        .map(|rule| match &rule.kind {
            RuleKind::Or(choices) => choices.iter().map(|choice| by_rule[*choice]).collect(),
            RuleKind::Range(lo, hi) => vec![0; (hi - lo + 1).max(0) as usize],
            _ => Vec::new(),
        })
        .collect();

    Ok(MinDepths { by_rule, by_action })
}

fn finite(depth: usize) -> Option<usize> {
    (depth != UNSET).then_some(depth)
}

fn reachable(rules: &[RuleNode], start: RuleId) -> Vec<RuleId> {
    let mut seen = vec![false; rules.len()];
    let mut stack = vec![start];
    let mut order = Vec::new();
    while let Some(id) = stack.pop() {
        if seen[id] {
            continue;
        }
        seen[id] = true;
        order.push(id);
        match &rules[id].kind {
            RuleKind::Ref(target) => stack.push(*target),
            RuleKind::And(parts) => stack.extend(parts.iter().copied()),
            RuleKind::Or(choices) => stack.extend(choices.iter().copied()),
            RuleKind::Terminal(_) | RuleKind::Range(_, _) => {}
        }
    }
    order
}

fn describe(rules: &[RuleNode], id: RuleId) -> String {
    match &rules[id].name {
        Some(name) => name.clone(),
        None => format!("rule#{}", id),
    }
}

#[cfg(test)]
mod depth_test {
    use crate::grammar::{alt, nt, seq, t, GrammarBuilder};

    #[test]
    fn and_takes_max_or_takes_min() {
        let grammar = GrammarBuilder::new()
            .rule("start", nt("pair"))
            .rule("pair", seq(vec![nt("flat"), nt("deep")]))
            .rule("flat", t("x"))
            .rule("deep", alt(vec![t("y"), seq(vec![nt("flat"), nt("flat")])]))
            .start("start")
            .build()
            .unwrap();
        let flat = grammar.rule_id("flat").unwrap();
        let deep = grammar.rule_id("deep").unwrap();
        let pair = grammar.rule_id("pair").unwrap();
        assert_eq!(grammar.min_depth(flat), 1);
        assert_eq!(grammar.min_depth(deep), 2);
        // pair = 1 + max(flat-ref, deep-ref) = 1 + (1 + 2)
        assert_eq!(grammar.min_depth(pair), 4);
    }

    #[test]
    fn recursion_through_an_escape_stabilizes() {
        let grammar = GrammarBuilder::new()
            .rule("start", nt("list"))
            .rule("list", alt(vec![t("nil"), seq(vec![t("cons"), nt("list")])]))
            .start("start")
            .build()
            .unwrap();
        let list = grammar.rule_id("list").unwrap();
        assert_eq!(grammar.min_depth(list), 2);
        assert_eq!(grammar.min_depth_action(list, 1), 1);
        assert_eq!(grammar.min_depth_action(list, 2), 4);
    }
}
