/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Declarative description of a browsing session, used to seed a `ContextTree`.

use serde::{Deserialize, Serialize};

use super::tree::{ContextTree, NodeKey};

/// One context and everything it embeds or opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub url: String,

    #[serde(default)]
    pub closed: bool,

    #[serde(default)]
    pub frames: Vec<Layout>,

    #[serde(default)]
    pub popups: Vec<Layout>,
}

impl Layout {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_frame(mut self, frame: Layout) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn with_popup(mut self, popup: Layout) -> Self {
        self.popups.push(popup);
        self
    }

    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }
}

impl ContextTree {
    /// Build a tree whose primary window is `layout`.
    pub fn from_layout(layout: &Layout) -> Self {
        let mut tree = ContextTree::new(layout.url.clone());
        let primary = tree.primary();
        if layout.closed {
            tree.close(primary);
        }
        tree.seed_children(primary, layout);
        tree
    }

    fn seed_children(&mut self, key: NodeKey, layout: &Layout) {
        // Depth-first with an explicit stack; layouts come from user files.
        let mut pending = vec![(key, layout)];
        while let Some((key, layout)) = pending.pop() {
            for frame in &layout.frames {
                if let Some(child) = self.embed_frame(key, frame.url.clone()) {
                    if frame.closed {
                        self.close(child);
                    }
                    pending.push((child, frame));
                }
            }
            for popup in &layout.popups {
                if let Some(child) = self.open_popup(key, popup.url.clone()) {
                    if popup.closed {
                        self.close(child);
                    }
                    pending.push((child, popup));
                }
            }
        }
    }
}
