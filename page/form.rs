/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde_json::{Map, Value};

/// Ordered `(name, value)` pairs of a submitted form, as `FormData` holds them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormEntries {
    entries: Vec<(String, String)>,
}

impl FormEntries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, name: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key/value record: a name seen once maps to its string value, a repeated
    /// name maps to an array of every value in submission order. An empty first
    /// value still counts as seen.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        for (name, value) in &self.entries {
            match record.get_mut(name) {
                None => {
                    record.insert(name.clone(), Value::String(value.clone()));
                }
                Some(Value::Array(values)) => values.push(Value::String(value.clone())),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, Value::String(value.clone())]);
                }
            }
        }
        record
    }
}

impl<N, V> FromIterator<(N, V)> for FormEntries
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut entries = FormEntries::new();
        for (name, value) in iter {
            entries.append(name, value);
        }
        entries
    }
}
