/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Concrete context graph backed by `petgraph::StableGraph`.

use std::collections::{HashSet, VecDeque};

use petgraph::Directed;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use uuid::Uuid;

use super::{ContextGraph, Role};

/// Stable context handle (petgraph NodeIndex, survives other removals)
pub type NodeKey = NodeIndex;

/// A browsing context in the tree
#[derive(Debug, Clone)]
pub struct ContextNode {
    /// Stable context identity.
    pub id: Uuid,

    /// Current document URL
    pub url: String,

    /// How this context is attached to the graph
    pub role: Role,

    /// Set once the context is closed; closed popups stay listed on their opener.
    pub closed: bool,

    /// Embedding context, set for frames only
    pub parent: Option<NodeKey>,

    /// Context that opened this one via `window.open`
    pub opener: Option<NodeKey>,

    /// Embedded frames in document order
    pub frames: Vec<NodeKey>,

    /// Popups opened from this context, in open order
    pub popups: Vec<NodeKey>,
}

impl ContextNode {
    fn new(url: String, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            url,
            role,
            closed: false,
            parent: None,
            opener: None,
            frames: Vec::new(),
            popups: Vec::new(),
        }
    }
}

/// Type of containment edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextEdge {
    /// Parent embeds child as a frame
    Frame,

    /// Opener spawned the target as a popup
    Popup,
}

/// Context graph rooted at a single primary window.
#[derive(Debug, Clone)]
pub struct ContextTree {
    inner: StableGraph<ContextNode, ContextEdge, Directed>,
    primary: NodeKey,
}

impl ContextTree {
    /// Create a tree holding only the primary window.
    pub fn new(url: impl Into<String>) -> Self {
        let mut inner = StableGraph::new();
        let primary = inner.add_node(ContextNode::new(url.into(), Role::Top));
        Self { inner, primary }
    }

    /// Key of the primary window
    pub fn primary(&self) -> NodeKey {
        self.primary
    }

    /// Get a context by key
    pub fn get(&self, key: NodeKey) -> Option<&ContextNode> {
        self.inner.node_weight(key)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.inner.contains_node(key)
    }

    /// Count of live contexts, closed ones included
    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    /// Iterate over all contexts as (key, node) pairs
    pub fn nodes(&self) -> impl Iterator<Item = (NodeKey, &ContextNode)> {
        self.inner
            .node_indices()
            .map(move |idx| (idx, &self.inner[idx]))
    }

    /// Embed a new frame as the last child of `parent`.
    pub fn embed_frame(&mut self, parent: NodeKey, url: impl Into<String>) -> Option<NodeKey> {
        if !self.inner.contains_node(parent) {
            return None;
        }
        let mut node = ContextNode::new(url.into(), Role::Frame);
        node.parent = Some(parent);
        let key = self.inner.add_node(node);
        self.inner.add_edge(parent, key, ContextEdge::Frame);
        self.inner[parent].frames.push(key);
        Some(key)
    }

    /// Open a new top-level popup from `opener`.
    pub fn open_popup(&mut self, opener: NodeKey, url: impl Into<String>) -> Option<NodeKey> {
        if !self.inner.contains_node(opener) {
            return None;
        }
        let mut node = ContextNode::new(url.into(), Role::Popup);
        node.opener = Some(opener);
        let key = self.inner.add_node(node);
        self.inner.add_edge(opener, key, ContextEdge::Popup);
        self.inner[opener].popups.push(key);
        Some(key)
    }

    /// Record an existing frame as a popup of `opener`, as a named `window.open`
    /// targeting that frame does. The frame keeps its role and parent.
    pub fn retarget_open(&mut self, opener: NodeKey, frame: NodeKey) -> bool {
        if opener == frame || !self.inner.contains_node(opener) {
            return false;
        }
        match self.inner.node_weight(frame) {
            Some(node) if node.role == Role::Frame && node.opener.is_none() => {}
            _ => return false,
        }
        self.inner[frame].opener = Some(opener);
        self.inner.add_edge(opener, frame, ContextEdge::Popup);
        self.inner[opener].popups.push(frame);
        true
    }

    /// Mark a context closed. Popups stay in their opener's list.
    pub fn close(&mut self, key: NodeKey) -> bool {
        let Some(node) = self.inner.node_weight_mut(key) else {
            return false;
        };
        node.closed = true;
        true
    }

    /// Update a context's URL, returning the previous one.
    pub fn navigate(&mut self, key: NodeKey, url: impl Into<String>) -> Option<String> {
        let node = self.inner.node_weight_mut(key)?;
        Some(std::mem::replace(&mut node.url, url.into()))
    }

    /// Replace the frame order of `parent`. `order` must be a permutation of the
    /// current frames.
    pub fn reorder_frames(&mut self, parent: NodeKey, order: &[NodeKey]) -> bool {
        let Some(node) = self.inner.node_weight_mut(parent) else {
            return false;
        };
        if order.len() != node.frames.len() {
            return false;
        }
        let current: HashSet<NodeKey> = node.frames.iter().copied().collect();
        let requested: HashSet<NodeKey> = order.iter().copied().collect();
        if current != requested {
            return false;
        }
        node.frames = order.to_vec();
        true
    }

    /// Remove a frame from its parent together with everything below it: its own
    /// frames and any popups opened from inside it. Later siblings shift down.
    pub fn detach_frame(&mut self, key: NodeKey) -> bool {
        let Some(parent) = self
            .inner
            .node_weight(key)
            .filter(|node| node.role == Role::Frame)
            .and_then(|node| node.parent)
        else {
            return false;
        };

        let doomed = self.subtree(key);
        if let Some(parent_node) = self.inner.node_weight_mut(parent) {
            parent_node.frames.retain(|&k| k != key);
        }
        for &node_key in &doomed {
            let opener = self.inner[node_key].opener;
            if let Some(opener) = opener.filter(|o| !doomed.contains(o))
                && let Some(opener_node) = self.inner.node_weight_mut(opener)
            {
                opener_node.popups.retain(|&k| k != node_key);
            }
            // Frames elsewhere that this subtree retargeted lose their opener.
            let outside: Vec<NodeKey> = self.inner[node_key]
                .popups
                .iter()
                .copied()
                .filter(|k| !doomed.contains(k))
                .collect();
            for key in outside {
                if let Some(node) = self.inner.node_weight_mut(key) {
                    node.opener = None;
                }
            }
        }
        for node_key in doomed {
            self.inner.remove_node(node_key);
        }
        true
    }

    /// Every context connected to `key` by any edge kind, `key` included.
    pub fn connected_from(&self, key: NodeKey) -> HashSet<NodeKey> {
        let mut seen = HashSet::new();
        if !self.inner.contains_node(key) {
            return seen;
        }
        let mut queue = VecDeque::from([key]);
        seen.insert(key);
        while let Some(current) = queue.pop_front() {
            for next in self.inner.neighbors_undirected(current) {
                if seen.insert(next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// `key` plus every frame and popup reachable downward from it. Frames that were
    /// only retargeted by a `window.open` belong to their parent's subtree instead.
    fn subtree(&self, key: NodeKey) -> HashSet<NodeKey> {
        let mut seen = HashSet::from([key]);
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            let node = &self.inner[current];
            let popups = node
                .popups
                .iter()
                .filter(|&&k| self.inner[k].role == Role::Popup);
            for &next in node.frames.iter().chain(popups) {
                if seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }
}

impl Default for ContextTree {
    fn default() -> Self {
        Self::new("about:blank")
    }
}

impl ContextGraph for ContextTree {
    type Key = NodeKey;

    fn role(&self, node: NodeKey) -> Option<Role> {
        self.get(node).map(|n| n.role)
    }

    fn parent(&self, node: NodeKey) -> Option<NodeKey> {
        self.get(node)?.parent
    }

    fn opener(&self, node: NodeKey) -> Option<NodeKey> {
        self.get(node)?.opener
    }

    fn frame_count(&self, node: NodeKey) -> usize {
        self.get(node).map_or(0, |n| n.frames.len())
    }

    fn frame_at(&self, node: NodeKey, index: usize) -> Option<NodeKey> {
        self.get(node)?.frames.get(index).copied()
    }

    fn popup_count(&self, node: NodeKey) -> usize {
        self.get(node).map_or(0, |n| n.popups.len())
    }

    fn popup_at(&self, node: NodeKey, index: usize) -> Option<NodeKey> {
        self.get(node)?.popups.get(index).copied()
    }

    fn is_closed(&self, node: NodeKey) -> bool {
        self.get(node).is_none_or(|n| n.closed)
    }
}
