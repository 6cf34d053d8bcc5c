/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Collector-side mirror of a browsing session.
//!
//! Reports only carry addresses, so the mirror rebuilds the context tree from
//! them. Entries may arrive out of order: inserting `Top.Frame(2).Popup(0)` before
//! anything else creates the top frame, frame slot 2 and popup slot 0. Slots are
//! sparse and keep the index they were reported with.

use std::fmt::Write;

use log::{debug, warn};
use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::hierarchy::{Address, AddressParseError, Segment};

pub type EntryKey = NodeIndex;

/// Where a child sits below its parent. Frames order before popups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Slot {
    Frame(usize),
    Popup(usize),
}

/// What the collector knows about one context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionEntry {
    pub href: Option<String>,
    pub html: Option<String>,
    pub closed: bool,
}

impl SessionEntry {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            ..Self::default()
        }
    }

    pub fn with_html(mut self, html: impl Into<String>) -> Self {
        self.html = Some(html.into());
        self
    }
}

/// One report as the collector receives it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub key: String,
    pub val: Map<String, Value>,
}

#[derive(Deserialize)]
struct Envelope {
    report: Report,
}

impl Report {
    /// Parse a request body of the form `{"report": {"key": .., "val": ..}}`.
    pub fn from_request_body(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str::<Envelope>(body).map(|envelope| envelope.report)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.val.get(name).and_then(Value::as_str)
    }

    pub fn href(&self) -> Option<&str> {
        self.field("href")
    }

    pub fn html(&self) -> Option<&str> {
        self.field("html")
    }

    pub fn hierarchy(&self) -> Result<Address, SessionError> {
        let raw = self
            .field("hierarchy")
            .ok_or_else(|| SessionError::MissingHierarchy(self.key.clone()))?;
        raw.parse().map_err(SessionError::BadHierarchy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    MissingHierarchy(String),
    BadHierarchy(AddressParseError),
    Unrooted(Address),
    NotFound(Address),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingHierarchy(key) => write!(f, "report '{key}' has no hierarchy"),
            Self::BadHierarchy(e) => write!(f, "invalid hierarchy: {e}"),
            Self::Unrooted(address) => write!(f, "address '{address}' does not start at Top"),
            Self::NotFound(address) => write!(f, "no context at '{address}'"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Context tree rebuilt from reports, plus every report received so far.
#[derive(Debug, Clone, Default)]
pub struct Session {
    graph: StableGraph<SessionEntry, Slot>,
    top: Option<EntryKey>,
    reports: Vec<Report>,
}

fn slot_of(segment: Segment) -> Option<Slot> {
    match segment {
        Segment::Top => None,
        Segment::Frame(i) => Some(Slot::Frame(i)),
        Segment::Popup(i) => Some(Slot::Popup(i)),
    }
}

fn rooted_slots(address: &Address) -> Result<Vec<Slot>, SessionError> {
    match address.segments().split_first() {
        Some((Segment::Top, rest)) => Ok(rest.iter().copied().filter_map(slot_of).collect()),
        _ => Err(SessionError::Unrooted(address.clone())),
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.top.is_none()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn reports(&self) -> &[Report] {
        &self.reports
    }

    fn child(&self, parent: EntryKey, slot: Slot) -> Option<EntryKey> {
        self.graph
            .edges_directed(parent, Direction::Outgoing)
            .find(|edge| *edge.weight() == slot)
            .map(|edge| edge.target())
    }

    fn sorted_children(&self, parent: EntryKey) -> Vec<(Slot, EntryKey)> {
        let mut children: Vec<_> = self
            .graph
            .edges_directed(parent, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        children.sort_by_key(|(slot, _)| *slot);
        children
    }

    fn find(&self, address: &Address) -> Option<EntryKey> {
        let slots = rooted_slots(address).ok()?;
        slots
            .into_iter()
            .try_fold(self.top?, |current, slot| self.child(current, slot))
    }

    pub fn get(&self, address: &Address) -> Option<&SessionEntry> {
        self.find(address).and_then(|key| self.graph.node_weight(key))
    }

    /// Store `entry` at `address`. An existing entry keeps its position and
    /// children and only takes the new `href` and `html`; a missing one is created
    /// together with every missing context above it.
    pub fn insert(&mut self, address: &Address, entry: SessionEntry) -> Result<EntryKey, SessionError> {
        let slots = rooted_slots(address)?;
        let Some((&last, path)) = slots.split_last() else {
            return Ok(self.upsert_top(entry));
        };

        let mut current = match self.top {
            Some(top) => top,
            None => {
                debug!("Creating intermediate top frame for '{address}'");
                self.upsert_top(SessionEntry::default())
            }
        };
        for &slot in path {
            current = match self.child(current, slot) {
                Some(next) => next,
                None => {
                    debug!("Creating intermediate {slot:?} below {current:?} for '{address}'");
                    self.attach(current, slot, SessionEntry::default())
                }
            };
        }

        match self.child(current, last) {
            Some(existing) => {
                self.update(existing, entry);
                Ok(existing)
            }
            None => Ok(self.attach(current, last, entry)),
        }
    }

    fn upsert_top(&mut self, entry: SessionEntry) -> EntryKey {
        match self.top {
            Some(top) => {
                self.update(top, entry);
                top
            }
            None => {
                let top = self.graph.add_node(entry);
                self.top = Some(top);
                top
            }
        }
    }

    fn attach(&mut self, parent: EntryKey, slot: Slot, entry: SessionEntry) -> EntryKey {
        let key = self.graph.add_node(entry);
        self.graph.add_edge(parent, key, slot);
        key
    }

    fn update(&mut self, key: EntryKey, entry: SessionEntry) {
        if let Some(existing) = self.graph.node_weight_mut(key) {
            existing.href = entry.href;
            existing.html = entry.html;
        }
    }

    /// Drop the entry at `address` and everything below it. Removing `Top`
    /// clears the whole tree.
    pub fn remove(&mut self, address: &Address) -> Result<(), SessionError> {
        let key = self
            .find(address)
            .ok_or_else(|| SessionError::NotFound(address.clone()))?;
        if Some(key) == self.top {
            self.graph.clear();
            self.top = None;
            return Ok(());
        }
        let mut stack = vec![key];
        while let Some(next) = stack.pop() {
            stack.extend(self.graph.neighbors_directed(next, Direction::Outgoing));
            self.graph.remove_node(next);
        }
        Ok(())
    }

    pub fn mark_closed(&mut self, address: &Address) -> Result<(), SessionError> {
        let key = self
            .find(address)
            .ok_or_else(|| SessionError::NotFound(address.clone()))?;
        if let Some(entry) = self.graph.node_weight_mut(key) {
            entry.closed = true;
        }
        Ok(())
    }

    /// Indented tree listing, e.g.
    ///
    /// ```text
    /// top
    /// 	-> frames[0]
    /// 		-> popups[0]
    /// ```
    ///
    /// Closed popups and everything below them are left out.
    pub fn dump(&self) -> String {
        let Some(top) = self.top else {
            return String::new();
        };
        let mut out = String::from("top");
        let mut stack: Vec<(EntryKey, usize)> = Vec::new();
        let push_children = |stack: &mut Vec<(EntryKey, usize)>, key, depth| {
            for (_, child) in self.sorted_children(key).into_iter().rev() {
                stack.push((child, depth));
            }
        };
        push_children(&mut stack, top, 1);
        while let Some((key, depth)) = stack.pop() {
            let Some(slot) = self.slot_of_entry(key) else {
                continue;
            };
            let closed = self.graph.node_weight(key).is_some_and(|e| e.closed);
            if closed && matches!(slot, Slot::Popup(_)) {
                continue;
            }
            let indent = "\t".repeat(depth);
            let _ = match slot {
                Slot::Frame(i) => write!(out, "\n{indent}-> frames[{i}]"),
                Slot::Popup(i) => write!(out, "\n{indent}-> popups[{i}]"),
            };
            push_children(&mut stack, key, depth + 1);
        }
        out
    }

    fn slot_of_entry(&self, key: EntryKey) -> Option<Slot> {
        self.graph
            .edges_directed(key, Direction::Incoming)
            .next()
            .map(|edge| *edge.weight())
    }

    /// Record `report` and update the tree for the lifecycle events that shape it.
    pub fn apply(&mut self, report: Report) -> Result<(), SessionError> {
        let outcome = match report.key.as_str() {
            "documentinit" | "documentinteractive" => report.hierarchy().and_then(|address| {
                let entry = SessionEntry {
                    href: report.href().map(str::to_owned),
                    html: report.html().map(str::to_owned),
                    closed: false,
                };
                self.insert(&address, entry).map(|_| ())
            }),
            "windowclose" => report
                .hierarchy()
                .and_then(|address| self.mark_closed(&address)),
            _ => Ok(()),
        };
        if let Err(e) = &outcome {
            warn!("Report '{}' did not update the session: {e}", report.key);
        }
        self.reports.push(report);
        outcome
    }
}
