mod depth;

use crate::errors::SearchError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use depth::MinDepths;

pub type RuleId = usize;

/// User-facing rule description, flattened into the rule arena by
/// [`GrammarBuilder::build`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RuleSpec {
    Terminal(String),
    Ref(String),
    And(Vec<RuleSpec>),
    Or(Vec<RuleSpec>),
    Range(i64, i64),
}

pub fn t(value: impl Into<String>) -> RuleSpec {
    RuleSpec::Terminal(value.into())
}

pub fn nt(name: impl Into<String>) -> RuleSpec {
    RuleSpec::Ref(name.into())
}

pub fn seq(parts: Vec<RuleSpec>) -> RuleSpec {
    RuleSpec::And(parts)
}

pub fn alt(choices: Vec<RuleSpec>) -> RuleSpec {
    RuleSpec::Or(choices)
}

pub fn range(lo: i64, hi: i64) -> RuleSpec {
    RuleSpec::Range(lo, hi)
}

#[derive(Clone, Debug)]
pub enum RuleKind {
    Terminal(String),
    Ref(RuleId),
    And(Vec<RuleId>),
    Or(Vec<RuleId>),
    Range(i64, i64),
}

#[derive(Clone, Debug)]
pub struct RuleNode {
    pub kind: RuleKind,
    pub name: Option<String>,
}

/// A BNF grammar as an arena of rule nodes addressed by `RuleId`. Named
/// non-terminals map onto the id of their body node; `Ref` rules point at
/// that id. Min-depth tables are computed once at build time, so a grammar
/// value is immutable and shareable after construction.
#[derive(Clone, Debug)]
pub struct Grammar {
    rules: Vec<RuleNode>,
    names: HashMap<String, RuleId>,
    start: RuleId,
    depths: MinDepths,
}

impl Grammar {
    pub fn start(&self) -> RuleId {
        self.start
    }

    pub fn rule(&self, id: RuleId) -> &RuleNode {
        &self.rules[id]
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rule_id(&self, name: &str) -> Option<RuleId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: RuleId) -> Option<&str> {
        self.rules[id].name.as_deref()
    }

    /// Size of the action space at this rule. Non-decision kinds report 0.
    pub fn num_actions(&self, id: RuleId) -> usize {
        match &self.rules[id].kind {
            RuleKind::Or(choices) => choices.len(),
            RuleKind::Range(lo, hi) => (hi - lo + 1).max(0) as usize,
            _ => 0,
        }
    }

    /// A decision rule offers more than one action.
    pub fn is_decision(&self, id: RuleId) -> bool {
        self.num_actions(id) > 1
    }

    /// Minimum depth of a complete subtree rooted at this rule (the root of
    /// the subtree counts as one level).
    pub fn min_depth(&self, id: RuleId) -> usize {
        self.depths.by_rule(id)
    }

    pub fn min_depth_start(&self) -> usize {
        self.depths.by_rule(self.start)
    }

    /// Minimum depth required below a decision node when taking `action`
    /// (1-based).
    pub fn min_depth_action(&self, id: RuleId, action: usize) -> usize {
        self.depths.by_action(id, action)
    }

    /// Actions at `id` whose subtrees fit inside `budget` levels below the
    /// node. 1-based, ascending.
    pub fn legal_actions(&self, id: RuleId, budget: usize) -> Vec<usize> {
        (1..=self.num_actions(id))
            .filter(|&a| self.depths.by_action(id, a) <= budget)
            .collect()
    }

    /// Short node label for pretty-printers.
    pub fn label(&self, id: RuleId) -> String {
        if let Some(name) = self.name_of(id) {
            return name.to_string();
        }
        match &self.rules[id].kind {
            RuleKind::Terminal(value) => value.clone(),
            RuleKind::Ref(target) => format!("<{}>", self.label(*target)),
            RuleKind::And(_) => "and".to_string(),
            RuleKind::Or(_) => "or".to_string(),
            RuleKind::Range(lo, hi) => format!("{}..{}", lo, hi),
        }
    }

    fn fmt_rule(&self, id: RuleId, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.rules[id].kind {
            RuleKind::Terminal(value) => write!(f, "\"{}\"", value),
            RuleKind::Ref(target) => match self.name_of(*target) {
                Some(name) => write!(f, "<{}>", name),
                None => self.fmt_rule(*target, f),
            },
            RuleKind::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    self.fmt_rule(*part, f)?;
                }
                Ok(())
            }
            RuleKind::Or(choices) => {
                for (i, choice) in choices.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    self.fmt_rule(*choice, f)?;
                }
                Ok(())
            }
            RuleKind::Range(lo, hi) => write!(f, "{}..{}", lo, hi),
        }
    }
}

impl fmt::Display for Grammar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut named: Vec<(&String, &RuleId)> = self.names.iter().collect();
        named.sort_by_key(|(_, id)| **id);
        for (name, id) in named {
            write!(f, "{} -> ", name)?;
            self.fmt_rule(*id, f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct GrammarBuilder {
    specs: Vec<(String, RuleSpec)>,
    start: Option<String>,
}

impl GrammarBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, name: impl Into<String>, spec: RuleSpec) -> Self {
        self.specs.push((name.into(), spec));
        self
    }

    pub fn start(mut self, name: impl Into<String>) -> Self {
        self.start = Some(name.into());
        self
    }

    /// Flatten the rule specs into the arena, resolve references, and compute
    /// the min-depth tables. References to undefined rules and rules that can
    /// never derive a finite tree both fail with `UnproductiveGrammar`.
    pub fn build(self) -> Result<Grammar, SearchError> {
        let mut names = HashMap::new();
        let mut rules: Vec<RuleNode> = Vec::new();

        // Named bodies get their slots up front so references resolve in any
        // declaration order.
        for (name, _) in &self.specs {
            if names.contains_key(name) {
                continue;
            }
            names.insert(name.clone(), rules.len());
            rules.push(RuleNode {
                kind: RuleKind::Terminal(String::new()),
                name: Some(name.clone()),
            });
        }

        let mut missing = Vec::new();
        for (name, spec) in &self.specs {
            let id = names[name];
            let kind = Self::flatten(spec, &names, &mut rules, &mut missing);
            rules[id].kind = kind;
        }
        if !missing.is_empty() {
            missing.sort();
            missing.dedup();
            return Err(SearchError::UnproductiveGrammar { rules: missing });
        }

        let start_name = self.start.unwrap_or_else(|| "start".to_string());
        let start = names
            .get(&start_name)
            .copied()
            .ok_or(SearchError::UnproductiveGrammar {
                rules: vec![start_name],
            })?;

        let depths = depth::compute(&rules, start)?;

        Ok(Grammar {
            rules,
            names,
            start,
            depths,
        })
    }

    fn flatten(
        spec: &RuleSpec,
        names: &HashMap<String, RuleId>,
        rules: &mut Vec<RuleNode>,
        missing: &mut Vec<String>,
    ) -> RuleKind {
        match spec {
            RuleSpec::Terminal(value) => RuleKind::Terminal(value.clone()),
            RuleSpec::Ref(name) => match names.get(name) {
                Some(id) => RuleKind::Ref(*id),
                None => {
                    missing.push(name.clone());
                    RuleKind::Ref(usize::MAX)
                }
            },
            RuleSpec::And(parts) => {
                let ids = parts
                    .iter()
                    .map(|part| Self::push(part, names, rules, missing))
                    .collect();
                RuleKind::And(ids)
            }
            RuleSpec::Or(choices) => {
                let ids = choices
                    .iter()
                    .map(|choice| Self::push(choice, names, rules, missing))
                    .collect();
                RuleKind::Or(ids)
            }
            RuleSpec::Range(lo, hi) => RuleKind::Range(*lo, *hi),
        }
    }

    fn push(
        spec: &RuleSpec,
        names: &HashMap<String, RuleId>,
        rules: &mut Vec<RuleNode>,
        missing: &mut Vec<String>,
    ) -> RuleId {
        // Bare references collapse onto the named body so tree nodes carry
        // the name crossover matches on.
        let kind = Self::flatten(spec, names, rules, missing);
        rules.push(RuleNode { kind, name: None });
        rules.len() - 1
    }
}
