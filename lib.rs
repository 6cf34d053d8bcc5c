/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Addressing, messaging and event reporting across a graph of browsing
//! contexts (windows, frames and popups).
//!
//! - [`hierarchy`] gives every context a canonical address such as
//!   `Top.Popup(0).Frame(1)`.
//! - [`broadcast`] delivers one message to every open context connected to an
//!   origin, exactly once.
//! - [`report`] sends tagged events to a remote collector.
//! - [`session`] rebuilds the context tree on the collector side.

pub mod broadcast;
pub mod cli;
pub mod context;
pub mod hierarchy;
pub mod page;
pub mod prefs;
pub mod report;
pub mod session;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
