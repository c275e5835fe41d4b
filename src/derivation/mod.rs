mod expr;
mod generate;

use crate::errors::SearchError;
use crate::grammar::{Grammar, RuleId, RuleKind};
use std::collections::VecDeque;
use std::sync::Arc;

pub use expr::Expr;

pub type NodeId = usize;

#[derive(Clone, Debug)]
pub struct DerivNode {
    pub rule: RuleId,
    /// Short label for pretty-printers only.
    pub cmd: String,
    /// Distance from the root; the root sits at depth 1.
    pub depth: usize,
    /// 1-based action chosen at a decision node.
    pub action: Option<usize>,
    pub children: Vec<NodeId>,
}

/// A partial or complete parse of the grammar, stored as an arena of nodes
/// addressed by index. The frontier queue holds the open decision nodes in
/// the order they must be resolved; non-decision nodes are materialized
/// eagerly, so the tree is complete exactly when the frontier drains.
#[derive(Clone, Debug)]
pub struct DerivationTree {
    grammar: Arc<Grammar>,
    nodes: Vec<DerivNode>,
    frontier: VecDeque<NodeId>,
    maxsteps: usize,
}

impl DerivationTree {
    pub fn new(grammar: Arc<Grammar>, maxsteps: usize) -> Self {
        let mut tree = Self {
            grammar,
            nodes: Vec::new(),
            frontier: VecDeque::new(),
            maxsteps,
        };
        tree.initialize();
        tree
    }

    /// Install a fresh root for the grammar's start symbol.
    pub fn initialize(&mut self) {
        self.nodes.clear();
        self.frontier.clear();
        let start = self.grammar.start();
        let cmd = self.grammar.label(start);
        self.nodes.push(DerivNode {
            rule: start,
            cmd,
            depth: 1,
            action: None,
            children: Vec::new(),
        });
        self.frontier.push_back(0);
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn maxsteps(&self) -> usize {
        self.maxsteps
    }

    pub fn nopen(&self) -> usize {
        self.frontier.len()
    }

    pub fn is_complete(&self) -> bool {
        self.frontier.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &DerivNode {
        &self.nodes[id]
    }

    pub fn root(&self) -> &DerivNode {
        &self.nodes[0]
    }

    /// The decision node that must be resolved next, if any. Call
    /// [`advance_frontier`](Self::advance_frontier) first so queued
    /// non-decision nodes have been expanded away.
    pub fn open_decision(&self) -> Option<NodeId> {
        self.frontier.front().copied()
    }

    /// Deterministically expand queued non-decision nodes until the head of
    /// the frontier is a decision or the queue is empty.
    pub fn advance_frontier(&mut self) {
        let grammar = self.grammar.clone();
        while let Some(&node) = self.frontier.front() {
            if grammar.is_decision(self.nodes[node].rule) {
                break;
            }
            self.frontier.pop_front();
            self.expand_with(&grammar, node);
        }
    }

    /// Expand a non-decision node: materialize its children and its whole
    /// non-decision skeleton below, queueing the decision descendants.
    pub fn expand_node(&mut self, node: NodeId) {
        let grammar = self.grammar.clone();
        self.expand_with(&grammar, node);
    }

    fn expand_with(&mut self, grammar: &Grammar, node: NodeId) {
        let rule = self.nodes[node].rule;
        debug_assert!(!grammar.is_decision(rule));
        let child_rules: Vec<RuleId> = match &grammar.rule(rule).kind {
            RuleKind::Terminal(_) | RuleKind::Range(_, _) => Vec::new(),
            RuleKind::Ref(target) => vec![*target],
            RuleKind::And(parts) => parts.clone(),
            // A one-alternative choice expands without a decision.
            RuleKind::Or(choices) => vec![choices[0]],
        };
        for child_rule in child_rules {
            let child = self.attach_child(grammar, node, child_rule);
            if grammar.is_decision(child_rule) {
                self.frontier.push_back(child);
            } else {
                self.expand_with(grammar, child);
            }
        }
    }

    /// Resolve the decision at the head of the frontier with `action`
    /// (1-based). The chosen branch is materialized and new open decisions
    /// join the back of the queue.
    pub fn expand_decision(&mut self, node: NodeId, action: usize) -> Result<(), SearchError> {
        let grammar = self.grammar.clone();
        let rule = self.nodes[node].rule;
        if action == 0 || action > grammar.num_actions(rule) {
            return Err(SearchError::IncompleteExpansion {
                rule: grammar.label(rule),
                depth: self.nodes[node].depth,
            });
        }
        if self.frontier.front() == Some(&node) {
            self.frontier.pop_front();
        } else {
            self.frontier.retain(|&open| open != node);
        }
        self.nodes[node].action = Some(action);
        if let RuleKind::Or(choices) = &grammar.rule(rule).kind {
            let child_rule = choices[action - 1];
            let child = self.attach_child(&grammar, node, child_rule);
            if grammar.is_decision(child_rule) {
                self.frontier.push_back(child);
            } else {
                self.expand_with(&grammar, child);
            }
        }
        // A range decision carries its value in `action` and has no children.
        Ok(())
    }

    fn attach_child(&mut self, grammar: &Grammar, parent: NodeId, rule: RuleId) -> NodeId {
        let depth = self.nodes[parent].depth + 1;
        let id = self.nodes.len();
        self.nodes.push(DerivNode {
            rule,
            cmd: grammar.label(rule),
            depth,
            action: None,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    /// Deepest reachable leaf. Orphaned arena slots do not count.
    pub fn max_depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![0];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            deepest = deepest.max(node.depth);
            stack.extend(node.children.iter().copied());
        }
        deepest
    }

    /// Reachable node ids in frontier (breadth-of-decision) order.
    pub fn reachable_nodes(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        queue.push_back(0);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.nodes[id].children.iter().copied());
        }
        order
    }

    /// Fold the completed tree into its expression value.
    pub fn get_expr(&self) -> Result<Expr, SearchError> {
        if let Some(open) = self.open_decision() {
            let node = &self.nodes[open];
            return Err(SearchError::IncompleteExpansion {
                rule: self.grammar.label(node.rule),
                depth: node.depth,
            });
        }
        Ok(self.fold(0))
    }

    fn fold(&self, id: NodeId) -> Expr {
        let node = &self.nodes[id];
        match &self.grammar.rule(node.rule).kind {
            RuleKind::Terminal(value) => Expr::Term(value.clone()),
            RuleKind::Range(lo, _) => Expr::Int(lo + node.action.unwrap_or(1) as i64 - 1),
            RuleKind::Ref(_) | RuleKind::Or(_) => self.fold(node.children[0]),
            RuleKind::And(_) => Expr::Seq(
                node.children
                    .iter()
                    .map(|&child| self.fold(child))
                    .collect(),
            ),
        }
    }

    /// Recover the linear action sequence of a tree by simulating the
    /// frontier queue over the finished arena. Replaying the result on a
    /// fresh tree reconstructs the same structure.
    pub fn action_sequence(&self) -> Vec<usize> {
        let mut actions = Vec::new();
        let mut queue = VecDeque::new();
        self.collect_open(0, &mut queue);
        while let Some(id) = queue.pop_front() {
            let node = &self.nodes[id];
            if let Some(action) = node.action {
                actions.push(action);
            }
            for &child in &node.children {
                self.collect_open(child, &mut queue);
            }
        }
        actions
    }

    fn collect_open(&self, id: NodeId, queue: &mut VecDeque<NodeId>) {
        if self.grammar.is_decision(self.nodes[id].rule) {
            queue.push_back(id);
        } else {
            for &child in &self.nodes[id].children {
                self.collect_open(child, queue);
            }
        }
    }

    /// Replace the subtree decided at `index` with a copy of the subtree
    /// decided at `origin_index` in `origin`: the action moves over and the
    /// children are copied across arenas with rebased depths. Replaced nodes
    /// become orphans until [`compact`](Self::compact) runs.
    pub fn graft_children(&mut self, index: NodeId, origin: &DerivationTree, origin_index: NodeId) {
        self.nodes[index].action = origin.nodes[origin_index].action;
        self.nodes[index].children.clear();
        let depth = self.nodes[index].depth;
        let origin_children = origin.nodes[origin_index].children.clone();
        let mut children = Vec::with_capacity(origin_children.len());
        for origin_child in origin_children {
            children.push(self.copy_from(origin, origin_child, depth + 1));
        }
        self.nodes[index].children = children;
    }

    fn copy_from(&mut self, origin: &DerivationTree, origin_index: NodeId, depth: usize) -> NodeId {
        let id = self.nodes.len();
        let source = &origin.nodes[origin_index];
        self.nodes.push(DerivNode {
            rule: source.rule,
            cmd: source.cmd.clone(),
            depth,
            action: source.action,
            children: Vec::new(),
        });
        let children: Vec<NodeId> = origin.nodes[origin_index]
            .children
            .iter()
            .map(|&child| self.copy_from(origin, child, depth + 1))
            .collect();
        self.nodes[id].children = children;
        id
    }

    /// Rebuild the arena keeping only nodes reachable from the root.
    pub fn compact(&mut self) {
        let order = self.reachable_nodes();
        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new_id, &old_id) in order.iter().enumerate() {
            remap[old_id] = new_id;
        }
        let mut nodes = Vec::with_capacity(order.len());
        for &old_id in &order {
            let mut node = self.nodes[old_id].clone();
            for child in &mut node.children {
                *child = remap[*child];
            }
            nodes.push(node);
        }
        self.frontier = self.frontier.iter().map(|&open| remap[open]).collect();
        self.nodes = nodes;
    }

    /// Release the whole tree back to a fresh root.
    pub fn reset(&mut self) {
        self.initialize();
    }

    pub fn print(&self) {
        let mut stack: Vec<NodeId> = vec![0];
        while let Some(id) = stack.pop() {
            let node = &self.nodes[id];
            for _ in 1..node.depth {
                print!("    ");
            }
            match node.action {
                Some(action) => println!("----{} [{}]", node.cmd, action),
                None => println!("----{}", node.cmd),
            }
            for &child in node.children.iter().rev() {
                stack.push(child);
            }
        }
    }
}

/// A derivation tree together with its action sequence in visitation order;
/// the state representation of the search MDP.
#[derive(Clone, Debug)]
pub struct LinearDerivTree {
    pub tree: DerivationTree,
    pub actions: Vec<usize>,
}

impl LinearDerivTree {
    pub fn new(grammar: Arc<Grammar>, maxsteps: usize) -> Self {
        let mut tree = DerivationTree::new(grammar, maxsteps);
        tree.advance_frontier();
        Self {
            tree,
            actions: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.tree.is_complete()
    }

    pub fn num_steps(&self) -> usize {
        self.actions.len()
    }

    /// Depth-legal actions at the pending decision; empty when complete.
    pub fn legal_actions(&self) -> Vec<usize> {
        match self.tree.open_decision() {
            Some(open) => {
                let node = self.tree.node(open);
                let budget = self.tree.maxsteps().saturating_sub(node.depth);
                self.tree.grammar().legal_actions(node.rule, budget)
            }
            None => Vec::new(),
        }
    }

    /// All structurally valid actions at the pending decision, ignoring the
    /// depth budget.
    pub fn available_actions(&self) -> Vec<usize> {
        match self.tree.open_decision() {
            Some(open) => {
                let rule = self.tree.node(open).rule;
                (1..=self.tree.grammar().num_actions(rule)).collect()
            }
            None => Vec::new(),
        }
    }

    pub fn step(&mut self, action: usize) -> Result<(), SearchError> {
        let open = self
            .tree
            .open_decision()
            .ok_or(SearchError::IncompleteExpansion {
                rule: self.tree.root().cmd.clone(),
                depth: 0,
            })?;
        self.tree.expand_decision(open, action)?;
        self.tree.advance_frontier();
        self.actions.push(action);
        Ok(())
    }

    /// Rebuild a state by applying `actions` to a fresh tree. A shorter
    /// sequence yields the corresponding partial state.
    pub fn replay(
        grammar: Arc<Grammar>,
        actions: &[usize],
        maxsteps: usize,
    ) -> Result<Self, SearchError> {
        let mut state = Self::new(grammar, maxsteps);
        for &action in actions {
            state.step(action)?;
        }
        Ok(state)
    }
}
