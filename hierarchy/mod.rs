/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Hierarchy addressing: where a context sits relative to the primary window.
//!
//! The climb goes frame -> parent first and popup -> opener second, so a frame that
//! was also targeted by `window.open` is always addressed through its parent.

use std::collections::HashSet;

use log::{debug, warn};

use crate::context::{ContextGraph, Role};

mod address;

pub use address::{Address, AddressParseError, Segment};

enum Hop<K> {
    Frame { parent: K },
    Popup { opener: K },
    Top,
    Detached,
}

fn next_hop<G: ContextGraph>(graph: &G, current: G::Key) -> Hop<G::Key> {
    match graph.role(current) {
        None => Hop::Detached,
        Some(Role::Top) => Hop::Top,
        Some(role) => {
            if role == Role::Frame
                && let Some(parent) = graph.parent(current)
            {
                return Hop::Frame { parent };
            }
            match graph.opener(current) {
                Some(opener) => Hop::Popup { opener },
                None => Hop::Top,
            }
        }
    }
}

/// Compute the address of `target` by climbing to the primary window.
///
/// Best-effort for contexts that are not attached to the primary window: a hop
/// whose index cannot be found emits no segment, and a climb that loops or
/// reaches an unknown context stops without the `Top` prefix.
pub fn resolve<G: ContextGraph>(graph: &G, target: G::Key) -> Address {
    let mut reversed = Vec::new();
    let mut seen = HashSet::new();
    let mut current = target;

    loop {
        if !seen.insert(current) {
            warn!("Hierarchy climb from {target:?} revisited {current:?}; address left unrooted");
            break;
        }
        match next_hop(graph, current) {
            Hop::Frame { parent } => {
                match graph.frame_index(parent, current) {
                    Some(index) => reversed.push(Segment::Frame(index)),
                    None => debug!("{current:?} is not listed among the frames of {parent:?}"),
                }
                current = parent;
            }
            Hop::Popup { opener } => {
                match graph.popup_index(opener, current) {
                    Some(index) => reversed.push(Segment::Popup(index)),
                    None => debug!("{current:?} is not listed among the popups of {opener:?}"),
                }
                current = opener;
            }
            Hop::Top => {
                reversed.push(Segment::Top);
                break;
            }
            Hop::Detached => {
                debug!("Hierarchy climb from {target:?} reached unknown context {current:?}");
                break;
            }
        }
    }

    reversed.reverse();
    Address::from_segments(reversed)
}

/// Walk `address` down from `primary` to the context it names.
pub fn locate<G: ContextGraph>(graph: &G, primary: G::Key, address: &Address) -> Option<G::Key> {
    let (first, rest) = address.segments().split_first()?;
    if *first != Segment::Top {
        return None;
    }
    rest.iter().try_fold(primary, |current, segment| match *segment {
        Segment::Frame(index) => graph.frame_at(current, index),
        Segment::Popup(index) => graph.popup_at(current, index),
        Segment::Top => None,
    })
}
