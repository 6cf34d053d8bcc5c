/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One hop of an address, read root-to-target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    /// The primary window
    Top,

    /// Frame at this index within the parent's frames
    Frame(usize),

    /// Popup at this index within the opener's popups
    Popup(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Top => f.write_str("Top"),
            Segment::Frame(i) => write!(f, "Frame({i})"),
            Segment::Popup(i) => write!(f, "Popup({i})"),
        }
    }
}

impl FromStr for Segment {
    type Err = AddressParseError;

    /// Accepts `Top`, `Frame(i)`, `Popup(i)` and the bracket spellings
    /// `top`, `frames[i]`, `popups[i]`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "Top" || s == "top" {
            return Ok(Segment::Top);
        }
        let forms: [(&str, &str, fn(usize) -> Segment); 4] = [
            ("Frame(", ")", Segment::Frame),
            ("Popup(", ")", Segment::Popup),
            ("frames[", "]", Segment::Frame),
            ("popups[", "]", Segment::Popup),
        ];
        for (prefix, suffix, build) in forms {
            if let Some(index) = s.strip_prefix(prefix).and_then(|rest| rest.strip_suffix(suffix)) {
                return index
                    .parse::<usize>()
                    .map(build)
                    .map_err(|_| AddressParseError::BadIndex(s.to_owned()));
            }
        }
        Err(AddressParseError::UnknownSegment(s.to_owned()))
    }
}

/// Canonical position of a context relative to the primary window,
/// e.g. `Top.Popup(0).Frame(1)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Address {
    segments: Vec<Segment>,
}

impl Address {
    /// Address of the primary window.
    pub fn top() -> Self {
        Self {
            segments: vec![Segment::Top],
        }
    }

    pub(crate) fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the address starts at the primary window.
    pub fn is_rooted(&self) -> bool {
        self.segments.first() == Some(&Segment::Top)
    }

    /// Number of frame/popup hops below the primary window.
    pub fn depth(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| **segment != Segment::Top)
            .count()
    }

    pub fn last(&self) -> Option<Segment> {
        self.segments.last().copied()
    }

    /// Address of the embedding or opening context, `None` for the primary window.
    pub fn parent(&self) -> Option<Address> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Address one hop further down.
    pub fn child(&self, segment: Segment) -> Address {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressParseError::Empty);
        }
        let segments = s
            .split('.')
            .map(Segment::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if segments.iter().skip(1).any(|segment| *segment == Segment::Top) {
            return Err(AddressParseError::MisplacedTop);
        }
        Ok(Self { segments })
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressParseError {
    Empty,
    UnknownSegment(String),
    BadIndex(String),
    MisplacedTop,
}

impl fmt::Display for AddressParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty address"),
            Self::UnknownSegment(s) => write!(f, "unknown address segment '{s}'"),
            Self::BadIndex(s) => write!(f, "invalid index in address segment '{s}'"),
            Self::MisplacedTop => write!(f, "'Top' may only appear as the first segment"),
        }
    }
}

impl std::error::Error for AddressParseError {}
