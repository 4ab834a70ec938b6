//! Flag trees: enabled/disabled selections over an analyzer's node arena.
//!
//! A tree is one byte per node. Filters rewrite flags during a pre-order
//! walk; expand/reduce convolve flags across sibling windows; union and
//! intersection combine trees built from the same analyzer.

use std::ops::BitOr;

use crate::analyzer::Analyzer;
use crate::error::{Error, Result};
use crate::format::{FormatType, MatchList};
use crate::key::hash_message;
use crate::node::{Node, NodeType};

/// Selection state of one node.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    Disabled = 0,
    Enabled = 1,
}

impl Flag {
    #[inline]
    pub fn is_enabled(self) -> bool {
        self == Flag::Enabled
    }
}

/// What a traversal does at a node: any combination of applying the filter
/// predicate and terminating descent into the node's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Action(u8);

impl Action {
    /// Neither apply nor terminate: leave the flag, keep descending.
    pub const SKIP: Action = Action(0);
    /// Run the predicate on this node.
    pub const APPLY: Action = Action(1);
    /// Do not descend into this node's children.
    pub const TERMINATE: Action = Action(2);

    #[inline]
    pub fn applies(self) -> bool {
        self.0 & Self::APPLY.0 != 0
    }

    #[inline]
    pub fn terminates(self) -> bool {
        self.0 & Self::TERMINATE.0 != 0
    }
}

impl BitOr for Action {
    type Output = Action;

    fn bitor(self, rhs: Action) -> Action {
        Action(self.0 | rhs.0)
    }
}

/// A parallel flag array over an [`Analyzer`]'s nodes. Freshly built trees
/// have every node enabled.
pub struct Tree<'a> {
    analyzer: &'a Analyzer,
    flags: Vec<Flag>,
}

impl<'a> Tree<'a> {
    pub fn new(analyzer: &'a Analyzer) -> Self {
        Self {
            analyzer,
            flags: vec![Flag::Enabled; analyzer.nodes().len()],
        }
    }

    /// One flag per node, indexed like the analyzer's arena.
    pub fn flags(&self) -> &[Flag] {
        &self.flags
    }

    /// The action used when no explicit one is given: apply to enabled
    /// nodes, prune the subtree under disabled ones.
    pub fn default_action(flag: Flag, _node: &Node) -> Action {
        if flag.is_enabled() {
            Action::APPLY
        } else {
            Action::TERMINATE
        }
    }

    /// Applies `f(old, node, stream_index)` to every stream node. Does not
    /// descend.
    pub fn filter_stream(&mut self, mut f: impl FnMut(Flag, &Node, usize) -> Flag) {
        if self.flags.is_empty() {
            return;
        }
        let root = self.analyzer.root();
        for (i, idx) in root.children().enumerate() {
            self.flags[idx] = f(self.flags[idx], &self.analyzer.nodes()[idx], i);
        }
    }

    /// Applies `f(old, category)` to message nodes, descending under the
    /// default action.
    pub fn filter_category(&mut self, f: impl FnMut(Flag, u32) -> Flag) {
        self.filter_category_with(f, Self::default_action)
    }

    pub fn filter_category_with(
        &mut self,
        mut f: impl FnMut(Flag, u32) -> Flag,
        action: impl FnMut(Flag, &Node) -> Action,
    ) {
        let analyzer = self.analyzer;
        traverse(analyzer, &mut self.flags, action, |flag, node| {
            match analyzer.format(node) {
                Some(desc) if node.node_type == NodeType::Message => f(flag, desc.category),
                _ => flag,
            }
        });
    }

    /// Applies `f(old, node)` to region nodes, descending under the default
    /// action.
    pub fn filter_region(&mut self, f: impl FnMut(Flag, &Node) -> Flag) {
        self.filter_region_with(f, Self::default_action)
    }

    pub fn filter_region_with(
        &mut self,
        mut f: impl FnMut(Flag, &Node) -> Flag,
        action: impl FnMut(Flag, &Node) -> Action,
    ) {
        traverse(self.analyzer, &mut self.flags, action, |flag, node| {
            if node.node_type == NodeType::Region {
                f(flag, node)
            } else {
                flag
            }
        });
    }

    /// Applies `f(old, node)` to message nodes whose format string hashes
    /// to `F::MESSAGE`, whose category is `F::CATEGORY` and whose parameter
    /// list matches `P` positionally ([`Any`](crate::Any) matches every
    /// type at its position).
    pub fn filter_message<F: FormatType, P: MatchList>(
        &mut self,
        f: impl FnMut(Flag, &Node) -> Flag,
    ) {
        self.filter_message_with::<F, P>(f, Self::default_action)
    }

    pub fn filter_message_with<F: FormatType, P: MatchList>(
        &mut self,
        mut f: impl FnMut(Flag, &Node) -> Flag,
        action: impl FnMut(Flag, &Node) -> Action,
    ) {
        let message_hash = hash_message(F::MESSAGE);
        let params = P::match_keys();
        let analyzer = self.analyzer;
        traverse(analyzer, &mut self.flags, action, move |flag, node| {
            if node.node_type != NodeType::Message {
                return flag;
            }
            match analyzer.format(node) {
                Some(desc)
                    if desc.message_hash == message_hash
                        && desc.category == F::CATEGORY
                        && desc.matches(&params) =>
                {
                    f(flag, node)
                }
                _ => flag,
            }
        });
    }

    /// Enables disabled children that have an enabled sibling within
    /// `[i - left, i + right]`. Applies to children of enabled stream and
    /// region nodes; stream nodes themselves are never touched.
    pub fn expand(&mut self, left: u32, right: u32) {
        self.convolution(|old, new| {
            for i in 0..old.len() {
                if new[i].is_enabled() {
                    continue;
                }
                let lo = i.saturating_sub(left as usize);
                let hi = i.saturating_add(right as usize).min(old.len() - 1);
                if old[lo..=hi].iter().any(|f| f.is_enabled()) {
                    new[i] = Flag::Enabled;
                }
            }
        });
    }

    /// Disables enabled children that have a disabled sibling within
    /// `[i - left, i + right]`. Symmetric to [`expand`](Self::expand).
    pub fn reduce(&mut self, left: u32, right: u32) {
        self.convolution(|old, new| {
            for i in 0..old.len() {
                if !new[i].is_enabled() {
                    continue;
                }
                let lo = i.saturating_sub(left as usize);
                let hi = i.saturating_add(right as usize).min(old.len() - 1);
                if old[lo..=hi].iter().any(|f| !f.is_enabled()) {
                    new[i] = Flag::Disabled;
                }
            }
        });
    }

    /// Enables every node enabled in either tree. Fails when the trees were
    /// built from different analyzers.
    pub fn union_with(&mut self, rhs: &Tree<'a>) -> Result<()> {
        if !std::ptr::eq(self.analyzer, rhs.analyzer) {
            return Err(Error::ForeignTree);
        }
        for (a, b) in self.flags.iter_mut().zip(&rhs.flags) {
            if b.is_enabled() {
                *a = Flag::Enabled;
            }
        }
        Ok(())
    }

    /// Keeps enabled only the nodes enabled in both trees.
    pub fn intersect_with(&mut self, rhs: &Tree<'a>) -> Result<()> {
        if !std::ptr::eq(self.analyzer, rhs.analyzer) {
            return Err(Error::ForeignTree);
        }
        for (a, b) in self.flags.iter_mut().zip(&rhs.flags) {
            if !b.is_enabled() {
                *a = Flag::Disabled;
            }
        }
        Ok(())
    }

    /// Walks enabled stream/region nodes and recomputes their children's
    /// flags. `per_children` reads the old flags and writes the scratch
    /// slice, which is then copied back wholesale, so a pass never feeds on
    /// its own output.
    fn convolution(&mut self, mut per_children: impl FnMut(&[Flag], &mut [Flag])) {
        let nodes = self.analyzer.nodes();
        if nodes.is_empty() {
            return;
        }

        let mut active = Some(0usize);
        let mut previous: Option<usize> = None;
        let mut scratch: Vec<Flag> = Vec::new();

        while let Some(current) = active {
            let node = &nodes[current];

            if let Some(prev) = previous {
                // Back from a child: advance to the next stream/region
                // sibling, skipping message children.
                let mut next = prev - node.first_child + 1;
                while next < node.child_count {
                    match nodes[node.first_child + next].node_type {
                        NodeType::Stream | NodeType::Region => break,
                        _ => next += 1,
                    }
                }
                if next < node.child_count {
                    active = Some(node.first_child + next);
                    previous = None;
                } else {
                    previous = Some(current);
                    active = node.parent;
                }
                continue;
            }

            if !self.flags[current].is_enabled() {
                previous = Some(current);
                active = node.parent;
                continue;
            }

            if matches!(node.node_type, NodeType::Stream | NodeType::Region)
                && node.child_count > 0
            {
                let range = node.children();
                scratch.clear();
                scratch.extend_from_slice(&self.flags[range.clone()]);
                per_children(&self.flags[range.clone()], &mut scratch);
                self.flags[range].copy_from_slice(&scratch);
            }

            if node.child_count > 0 {
                active = Some(node.first_child);
                previous = None;
            } else {
                previous = Some(current);
                active = node.parent;
            }
        }
    }
}

/// Stackless pre-order walk over the arena: `(active, previous)` encode
/// whether a node is being entered or returned to from a child.
fn traverse(
    analyzer: &Analyzer,
    flags: &mut [Flag],
    mut action: impl FnMut(Flag, &Node) -> Action,
    mut apply: impl FnMut(Flag, &Node) -> Flag,
) {
    let nodes = analyzer.nodes();
    if nodes.is_empty() {
        return;
    }

    let mut active = Some(0usize);
    let mut previous: Option<usize> = None;

    while let Some(current) = active {
        let node = &nodes[current];

        if let Some(prev) = previous {
            // Back from a child: next sibling, or up when none are left.
            let next = prev - node.first_child + 1;
            if next < node.child_count {
                active = Some(node.first_child + next);
                previous = None;
            } else {
                previous = Some(current);
                active = node.parent;
            }
            continue;
        }

        let act = action(flags[current], node);
        if act.applies() {
            flags[current] = apply(flags[current], node);
        }

        if !act.terminates() && node.child_count > 0 {
            active = Some(node.first_child);
            previous = None;
        } else {
            previous = Some(current);
            active = node.parent;
        }
    }
}
