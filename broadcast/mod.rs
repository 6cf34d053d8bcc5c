/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Loop-safe broadcast across the whole context graph.
//!
//! The graph has cycles once parent/child and opener/popup edges are read in both
//! directions, so the traversal is a worklist with a visited set: every context is
//! delivered to when it is first discovered and never again. Each context taken off
//! the worklist is expanded in four directions (frames, open popups, parent,
//! opener); siblings at every level are reached through the shared parent or
//! opener.
//!
//! Closed contexts are never delivered to. One found in a frame or popup list is
//! not descended into either, but one reached by climbing to a parent or opener
//! is still expanded, so the open contexts around it stay reachable.

use std::collections::{HashSet, VecDeque};

use log::{debug, warn};

use crate::context::ContextGraph;

pub mod transport;

pub use transport::{MailboxTransport, Transport, TransportError};

/// Outcome of one broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastSummary<K> {
    /// Contexts handed the message, origin first, in discovery order.
    pub delivered: Vec<K>,

    /// Closed contexts passed over.
    pub skipped_closed: usize,

    /// Contexts whose transport reported an error.
    pub failed: Vec<(K, TransportError)>,
}

impl<K> BroadcastSummary<K> {
    fn new() -> Self {
        Self {
            delivered: Vec::new(),
            skipped_closed: 0,
            failed: Vec::new(),
        }
    }

    /// Every context the message was attempted on, failures included.
    pub fn attempted(&self) -> usize {
        self.delivered.len() + self.failed.len()
    }
}

struct Dispatch<'a, G: ContextGraph, T: ?Sized, M: ?Sized> {
    graph: &'a G,
    transport: &'a T,
    message: &'a M,
    visited: HashSet<G::Key>,
    /// Closed contexts already queued after a climb.
    climbed_closed: HashSet<G::Key>,
    worklist: VecDeque<G::Key>,
    summary: BroadcastSummary<G::Key>,
}

/// How a context was reached from the one being expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    /// A frame or popup of it.
    Down,
    /// Its parent or opener.
    Up,
}

impl<G, T, M> Dispatch<'_, G, T, M>
where
    G: ContextGraph,
    T: Transport<G::Key, M> + ?Sized,
    M: ?Sized,
{
    fn deliver(&mut self, target: G::Key) {
        match self.transport.send(target, self.message) {
            Ok(()) => self.summary.delivered.push(target),
            Err(err) => {
                warn!("Broadcast delivery to {target:?} failed: {err}");
                self.summary.failed.push((target, err));
            }
        }
    }

    /// Deliver to `candidate` and queue it for expansion, unless it was already
    /// seen. A closed candidate is never delivered to and is only queued when
    /// reached by climbing.
    fn discover(&mut self, candidate: G::Key, edge: Edge) {
        let first_sight = self.visited.insert(candidate);
        if self.graph.is_closed(candidate) {
            if first_sight {
                self.summary.skipped_closed += 1;
            }
            if edge == Edge::Up && self.climbed_closed.insert(candidate) {
                self.worklist.push_back(candidate);
            }
            return;
        }
        if first_sight {
            self.deliver(candidate);
            self.worklist.push_back(candidate);
        }
    }

    fn expand(&mut self, node: G::Key) {
        // Lengths are re-read on every step; the lists may shrink mid-traversal.
        let mut index = 0;
        while index < self.graph.frame_count(node) {
            if let Some(frame) = self.graph.frame_at(node, index) {
                self.discover(frame, Edge::Down);
            }
            index += 1;
        }

        let mut index = 0;
        while index < self.graph.popup_count(node) {
            if let Some(popup) = self.graph.popup_at(node, index) {
                self.discover(popup, Edge::Down);
            }
            index += 1;
        }

        if let Some(parent) = self.graph.parent(node) {
            self.discover(parent, Edge::Up);
        }
        if let Some(opener) = self.graph.opener(node) {
            self.discover(opener, Edge::Up);
        }
    }

    fn run(mut self, origin: G::Key) -> BroadcastSummary<G::Key> {
        self.visited.insert(origin);
        self.climbed_closed.insert(origin);
        self.deliver(origin);
        self.worklist.push_back(origin);
        while let Some(node) = self.worklist.pop_front() {
            self.expand(node);
        }
        self.summary
    }
}

/// Deliver `message` to `origin` and then to every other open context connected
/// to it, each exactly once. Paths may climb through closed parents and openers.
///
/// Per-target transport failures are logged and collected in the summary; they
/// never stop delivery to the remaining contexts.
pub fn broadcast<G, T, M>(
    graph: &G,
    transport: &T,
    origin: G::Key,
    message: &M,
) -> BroadcastSummary<G::Key>
where
    G: ContextGraph,
    T: Transport<G::Key, M> + ?Sized,
    M: ?Sized,
{
    let summary = Dispatch {
        graph,
        transport,
        message,
        visited: HashSet::new(),
        climbed_closed: HashSet::new(),
        worklist: VecDeque::new(),
        summary: BroadcastSummary::new(),
    }
    .run(origin);
    debug!(
        "Broadcast from {origin:?}: {} delivered, {} closed skipped, {} failed",
        summary.delivered.len(),
        summary.skipped_closed,
        summary.failed.len()
    );
    summary
}
