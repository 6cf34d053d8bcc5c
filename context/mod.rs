/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Browsing-context graph model.
//!
//! Core structures:
//! - `ContextGraph`: read-only view over live context state (frames, popups, openers)
//! - `Role`: how a context is attached to the rest of the graph
//! - `ContextTree`: petgraph-backed concrete graph used by the CLI and tests
//!
//! All list accessors are indexed so traversals re-read lengths and entries at each
//! step instead of holding a snapshot that another party may have mutated.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::RwLock;

pub mod layout;
pub mod tree;

pub use layout::Layout;
pub use tree::{ContextEdge, ContextNode, ContextTree, NodeKey};

/// How a context is attached to the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Role {
    /// The primary window: no parent and no opener.
    Top,

    /// Embedded in a parent context. Takes precedence over any opener link.
    Frame,

    /// Top-level context opened by another context.
    Popup,
}

/// Live view over a graph of browsing contexts.
///
/// Implementations reflect whatever the platform currently holds; callers must
/// tolerate `None` from the indexed accessors when a list shrank between reads.
pub trait ContextGraph {
    type Key: Copy + Eq + Hash + Debug;

    /// Role of `node`, or `None` if the node is unknown.
    fn role(&self, node: Self::Key) -> Option<Role>;

    /// Embedding context of a frame. `None` for top-level contexts.
    fn parent(&self, node: Self::Key) -> Option<Self::Key>;

    /// Context that opened `node` as a popup.
    fn opener(&self, node: Self::Key) -> Option<Self::Key>;

    fn frame_count(&self, node: Self::Key) -> usize;

    fn frame_at(&self, node: Self::Key, index: usize) -> Option<Self::Key>;

    fn popup_count(&self, node: Self::Key) -> usize;

    fn popup_at(&self, node: Self::Key, index: usize) -> Option<Self::Key>;

    /// Whether the context has been closed. Unknown nodes count as closed.
    fn is_closed(&self, node: Self::Key) -> bool;

    /// Position of `child` within the frames of `parent`.
    fn frame_index(&self, parent: Self::Key, child: Self::Key) -> Option<usize> {
        (0..self.frame_count(parent)).find(|&i| self.frame_at(parent, i) == Some(child))
    }

    /// Position of `popup` within the popups opened by `opener`.
    fn popup_index(&self, opener: Self::Key, popup: Self::Key) -> Option<usize> {
        (0..self.popup_count(opener)).find(|&i| self.popup_at(opener, i) == Some(popup))
    }
}

impl<G: ContextGraph + ?Sized> ContextGraph for &G {
    type Key = G::Key;

    fn role(&self, node: Self::Key) -> Option<Role> {
        (**self).role(node)
    }

    fn parent(&self, node: Self::Key) -> Option<Self::Key> {
        (**self).parent(node)
    }

    fn opener(&self, node: Self::Key) -> Option<Self::Key> {
        (**self).opener(node)
    }

    fn frame_count(&self, node: Self::Key) -> usize {
        (**self).frame_count(node)
    }

    fn frame_at(&self, node: Self::Key, index: usize) -> Option<Self::Key> {
        (**self).frame_at(node, index)
    }

    fn popup_count(&self, node: Self::Key) -> usize {
        (**self).popup_count(node)
    }

    fn popup_at(&self, node: Self::Key, index: usize) -> Option<Self::Key> {
        (**self).popup_at(node, index)
    }

    fn is_closed(&self, node: Self::Key) -> bool {
        (**self).is_closed(node)
    }
}

impl<G: ContextGraph + ?Sized> ContextGraph for Arc<G> {
    type Key = G::Key;

    fn role(&self, node: Self::Key) -> Option<Role> {
        (**self).role(node)
    }

    fn parent(&self, node: Self::Key) -> Option<Self::Key> {
        (**self).parent(node)
    }

    fn opener(&self, node: Self::Key) -> Option<Self::Key> {
        (**self).opener(node)
    }

    fn frame_count(&self, node: Self::Key) -> usize {
        (**self).frame_count(node)
    }

    fn frame_at(&self, node: Self::Key, index: usize) -> Option<Self::Key> {
        (**self).frame_at(node, index)
    }

    fn popup_count(&self, node: Self::Key) -> usize {
        (**self).popup_count(node)
    }

    fn popup_at(&self, node: Self::Key, index: usize) -> Option<Self::Key> {
        (**self).popup_at(node, index)
    }

    fn is_closed(&self, node: Self::Key) -> bool {
        (**self).is_closed(node)
    }
}

/// Shared graph that other parties may mutate while a traversal runs.
///
/// Every accessor holds the read lock for that single read only, so a writer
/// (for example a transport reacting to a delivery) never deadlocks against an
/// in-flight broadcast.
impl<G: ContextGraph> ContextGraph for RwLock<G> {
    type Key = G::Key;

    fn role(&self, node: Self::Key) -> Option<Role> {
        self.read().role(node)
    }

    fn parent(&self, node: Self::Key) -> Option<Self::Key> {
        self.read().parent(node)
    }

    fn opener(&self, node: Self::Key) -> Option<Self::Key> {
        self.read().opener(node)
    }

    fn frame_count(&self, node: Self::Key) -> usize {
        self.read().frame_count(node)
    }

    fn frame_at(&self, node: Self::Key, index: usize) -> Option<Self::Key> {
        self.read().frame_at(node, index)
    }

    fn popup_count(&self, node: Self::Key) -> usize {
        self.read().popup_count(node)
    }

    fn popup_at(&self, node: Self::Key, index: usize) -> Option<Self::Key> {
        self.read().popup_at(node, index)
    }

    fn is_closed(&self, node: Self::Key) -> bool {
        self.read().is_closed(node)
    }
}

/// A context tree shared between the traversal and whoever mutates it.
pub type LiveContextTree = Arc<RwLock<ContextTree>>;
