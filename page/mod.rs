/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Page-level helpers: location parts, URL parameters, markup and forms.

use std::collections::BTreeMap;

use percent_encoding::percent_decode_str;
use serde::Serialize;
use url::Url;

pub mod form;
pub mod markup;

pub use form::FormEntries;

/// Parameters from the query string, later duplicates winning.
pub fn query_params(url: &Url) -> BTreeMap<String, String> {
    url.query().map(parse_params).unwrap_or_default()
}

/// Parameters encoded in the fragment as `#a=1&b=2`.
pub fn hash_params(url: &Url) -> BTreeMap<String, String> {
    url.fragment().map(parse_params).unwrap_or_default()
}

/// Split `a=1&b=2` pairs on the first `=`. Only percent escapes are decoded, so a
/// literal `+` stays a `+` the way `decodeURIComponent` leaves it.
fn parse_params(raw: &str) -> BTreeMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name), decode_component(value))
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    percent_decode_str(raw).decode_utf8_lossy().into_owned()
}

/// The parts of a document URL reported with every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    #[serde(skip)]
    pub href: String,
    /// Scheme with its trailing colon, as `location.protocol` spells it.
    pub protocol: String,
    pub hostname: String,
    /// Empty when the URL uses the scheme's default port.
    pub port: String,
    pub pathname: String,
    pub query: BTreeMap<String, String>,
    pub hash: BTreeMap<String, String>,
    pub origin: String,
}

impl Location {
    pub fn parse(href: &str) -> Result<Self, url::ParseError> {
        Ok(Self::from_url(&Url::parse(href)?))
    }

    pub fn from_url(url: &Url) -> Self {
        Self {
            href: url.as_str().to_owned(),
            protocol: format!("{}:", url.scheme()),
            hostname: url.host_str().unwrap_or_default().to_owned(),
            port: url.port().map(|port| port.to_string()).unwrap_or_default(),
            pathname: url.path().to_owned(),
            query: query_params(url),
            hash: hash_params(url),
            origin: url.origin().ascii_serialization(),
        }
    }

    /// JSON object of the location parts, without `href`.
    pub fn hrefparts(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
