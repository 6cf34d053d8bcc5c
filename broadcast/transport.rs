/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! One-way message delivery to a single context.

use std::collections::HashMap;
use std::hash::Hash;

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::RwLock;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The target has no live endpoint (closed, unloaded or never registered).
    Unreachable,

    /// The target's endpoint refused the message.
    Rejected(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unreachable => write!(f, "target context is unreachable"),
            Self::Rejected(reason) => write!(f, "target context rejected message: {reason}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Fire-and-forget delivery of `M` to a context addressed by `K`.
///
/// Delivery carries no acknowledgement; an `Ok` only means the message was handed
/// to the target's endpoint.
pub trait Transport<K, M: ?Sized> {
    fn send(&self, target: K, message: &M) -> Result<(), TransportError>;
}

impl<K, M, F> Transport<K, M> for F
where
    M: ?Sized,
    F: Fn(K, &M) -> Result<(), TransportError>,
{
    fn send(&self, target: K, message: &M) -> Result<(), TransportError> {
        self(target, message)
    }
}

/// In-process transport with one channel mailbox per context.
pub struct MailboxTransport<K, M> {
    mailboxes: RwLock<HashMap<K, Sender<M>>>,
}

impl<K, M> MailboxTransport<K, M>
where
    K: Copy + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            mailboxes: RwLock::new(HashMap::new()),
        }
    }

    /// Open a mailbox for `context`, replacing any previous one.
    pub fn register(&self, context: K) -> Receiver<M> {
        let (tx, rx) = unbounded();
        self.mailboxes.write().insert(context, tx);
        rx
    }

    /// Close the mailbox of `context`. Returns whether one was open.
    pub fn unregister(&self, context: K) -> bool {
        self.mailboxes.write().remove(&context).is_some()
    }

    pub fn is_registered(&self, context: K) -> bool {
        self.mailboxes.read().contains_key(&context)
    }
}

impl<K, M> Default for MailboxTransport<K, M>
where
    K: Copy + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, M> Transport<K, M> for MailboxTransport<K, M>
where
    K: Copy + Eq + Hash,
    M: Clone,
{
    fn send(&self, target: K, message: &M) -> Result<(), TransportError> {
        let mailboxes = self.mailboxes.read();
        let sender = mailboxes.get(&target).ok_or(TransportError::Unreachable)?;
        sender
            .send(message.clone())
            .map_err(|_| TransportError::Unreachable)
    }
}
