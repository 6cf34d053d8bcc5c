/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Event reporting to the remote collector.
//!
//! Each event is one request with no queueing, coalescing or retry. The value is
//! serialized locally first, so an unserializable payload never reaches the
//! network. The collector config is loaded on the first event and cached for the
//! reporter's lifetime; a failed load is retried by the next event.

use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use url::Url;

use crate::context::ContextGraph;
use crate::hierarchy::{self, Address};
use crate::page::Location;

mod config;
pub mod outbound;

pub use config::ReporterConfig;
pub use outbound::{DEFAULT_REQUEST_TIMEOUT, HttpOutbound, Outbound, OutboundError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    /// The value could not be turned into a JSON object. Nothing was sent.
    Serialization(String),
    /// The collector config could not be loaded or is unusable. Nothing was sent.
    Config(String),
    /// The collector could not be reached or answered at the transport level.
    Transport(String),
    /// The collector answered but did not acknowledge the event.
    ServerRejection(String),
}

impl ReportError {
    /// Whether the collector received the request.
    pub fn reached_collector(&self) -> bool {
        matches!(self, Self::ServerRejection(_))
    }
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "failed to serialize event: {e}"),
            Self::Config(e) => write!(f, "reporter config error: {e}"),
            Self::Transport(e) => write!(f, "failed to reach collector: {e}"),
            Self::ServerRejection(e) => write!(f, "collector rejected event: {e}"),
        }
    }
}

impl std::error::Error for ReportError {}

/// Where an event happened: the context's address and its document location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventContext {
    pub hierarchy: Address,
    pub location: Location,
}

impl EventContext {
    pub fn new(hierarchy: Address, location: Location) -> Self {
        Self {
            hierarchy,
            location,
        }
    }

    /// Resolve `node`'s address in `graph` and pair it with `href`.
    pub fn for_context<G: ContextGraph>(
        graph: &G,
        node: G::Key,
        href: &str,
    ) -> Result<Self, url::ParseError> {
        Ok(Self::new(
            hierarchy::resolve(graph, node),
            Location::parse(href)?,
        ))
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Build the request body `{"report": {"key": .., "val": ..}}`, injecting the
/// context fields over any caller-supplied fields of the same name.
pub fn encode_report<V>(
    context: &EventContext,
    key: &str,
    val: &V,
    timestamp_ms: u64,
) -> Result<String, ReportError>
where
    V: Serialize + ?Sized,
{
    let mut val = match serde_json::to_value(val) {
        Ok(Value::Object(map)) => map,
        Ok(Value::Null) => Map::new(),
        Ok(other) => {
            return Err(ReportError::Serialization(format!(
                "event value must be a JSON object, got {}",
                json_kind(&other)
            )));
        }
        Err(e) => return Err(ReportError::Serialization(e.to_string())),
    };

    val.insert("timestamp".to_owned(), json!(timestamp_ms));
    val.insert(
        "hierarchy".to_owned(),
        Value::String(context.hierarchy.to_string()),
    );
    val.insert(
        "href".to_owned(),
        Value::String(context.location.href.clone()),
    );
    val.insert("hrefparts".to_owned(), context.location.hrefparts());

    let body = json!({"report": {"key": key, "val": val}});
    serde_json::to_string(&body).map_err(|e| ReportError::Serialization(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Interpret the collector's answer. Only `{"success": true}` acknowledges.
fn classify_response(body: &str) -> Result<(), ReportError> {
    let parsed: Value = serde_json::from_str(body)
        .map_err(|e| ReportError::Transport(format!("malformed collector response: {e}")))?;
    let Value::Object(fields) = parsed else {
        return Err(ReportError::Transport(format!(
            "malformed collector response: expected an object, got {}",
            json_kind(&parsed)
        )));
    };
    match fields.get("success") {
        Some(Value::Bool(true)) => Ok(()),
        _ => {
            let reason = fields
                .get("error")
                .or_else(|| fields.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("event server failed to receive event");
            Err(ReportError::ServerRejection(reason.to_owned()))
        }
    }
}

/// Interpret a non-2xx answer. A JSON object body means the collector itself
/// refused the event; anything else is a transport failure.
fn classify_error_status(status: u16, body: &str) -> ReportError {
    match classify_response(body) {
        Err(rejection @ ReportError::ServerRejection(_)) => rejection,
        _ => ReportError::Transport(
            OutboundError::HttpStatus {
                status,
                body: body.to_owned(),
            }
            .to_string(),
        ),
    }
}

/// Sends events to the collector named by a lazily loaded config.
pub struct Reporter {
    config_url: Option<Url>,
    config: OnceLock<ReporterConfig>,
    /// Held while fetching the config so concurrent first events share one load.
    config_load: Mutex<()>,
    outbound: Arc<dyn Outbound>,
}

impl Reporter {
    /// Reporter over reqwest, loading its config from `config_url` on first use.
    pub fn new(config_url: Url) -> Result<Self, ReportError> {
        Self::with_timeout(config_url, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        config_url: Url,
        timeout: std::time::Duration,
    ) -> Result<Self, ReportError> {
        let outbound =
            HttpOutbound::new(timeout).map_err(|e| ReportError::Transport(e.to_string()))?;
        Ok(Self::with_outbound(config_url, Arc::new(outbound)))
    }

    pub fn with_outbound(config_url: Url, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            config_url: Some(config_url),
            config: OnceLock::new(),
            config_load: Mutex::new(()),
            outbound,
        }
    }

    /// Reporter with an already known config; no config fetch ever happens.
    pub fn preconfigured(config: ReporterConfig, outbound: Arc<dyn Outbound>) -> Self {
        Self {
            config_url: None,
            config: OnceLock::from(config),
            config_load: Mutex::new(()),
            outbound,
        }
    }

    /// The collector config, fetched on first call.
    pub fn config(&self) -> Result<&ReporterConfig, ReportError> {
        if let Some(config) = self.config.get() {
            return Ok(config);
        }
        let _loading = self.config_load.lock();
        if let Some(config) = self.config.get() {
            return Ok(config);
        }
        let url = self
            .config_url
            .as_ref()
            .ok_or_else(|| ReportError::Config("no config URL".to_owned()))?;
        let loaded = ReporterConfig::load(self.outbound.as_ref(), url)?;
        debug!(
            "Loaded reporter config from {url}: endpoint {}",
            loaded.core_endpoint
        );
        Ok(self.config.get_or_init(|| loaded))
    }

    /// Report one event and wait for the collector's acknowledgement.
    pub fn report<V>(&self, context: &EventContext, key: &str, val: &V) -> Result<(), ReportError>
    where
        V: Serialize + ?Sized,
    {
        let body = encode_report(context, key, val, now_unix_ms()).inspect_err(|e| {
            warn!("[report] key={key} hierarchy={} not sent: {e}", context.hierarchy);
        })?;
        self.dispatch(key, &context.hierarchy, body)
    }

    /// Report one event from a background thread. Serialization still happens on
    /// the calling thread, so a bad payload resolves the handle immediately.
    pub fn report_detached<V>(self: &Arc<Self>, context: &EventContext, key: &str, val: &V) -> ReportHandle
    where
        V: Serialize + ?Sized,
    {
        let (tx, rx) = bounded(1);
        match encode_report(context, key, val, now_unix_ms()) {
            Err(e) => {
                warn!("[report] key={key} hierarchy={} not sent: {e}", context.hierarchy);
                let _ = tx.send(Err(e));
            }
            Ok(body) => {
                let reporter = Arc::clone(self);
                let key = key.to_owned();
                let hierarchy = context.hierarchy.clone();
                std::thread::spawn(move || {
                    let _ = tx.send(reporter.dispatch(&key, &hierarchy, body));
                });
            }
        }
        ReportHandle { outcome: rx }
    }

    fn dispatch(&self, key: &str, hierarchy: &Address, body: String) -> Result<(), ReportError> {
        let outcome = self.config().and_then(|config| {
            let endpoint = config.dispatch_url()?;
            match self.outbound.post_json(&endpoint, body) {
                Ok(response) => classify_response(&response),
                Err(OutboundError::HttpStatus { status, body }) => {
                    Err(classify_error_status(status, &body))
                }
                Err(e) => Err(ReportError::Transport(e.to_string())),
            }
        });
        match &outcome {
            Ok(()) => info!("[report] key={key} hierarchy={hierarchy} acknowledged"),
            Err(e) => warn!("[report] key={key} hierarchy={hierarchy} failed: {e}"),
        }
        outcome
    }
}

/// Pending outcome of a detached report. Dropping it turns the report into
/// fire-and-forget.
#[derive(Debug)]
pub struct ReportHandle {
    outcome: Receiver<Result<(), ReportError>>,
}

impl ReportHandle {
    /// Block until the collector answers.
    pub fn wait(self) -> Result<(), ReportError> {
        self.outcome.recv().unwrap_or_else(|_| {
            Err(ReportError::Transport(
                "report thread ended without an outcome".to_owned(),
            ))
        })
    }

    /// The outcome if it is already known.
    pub fn try_outcome(&self) -> Option<Result<(), ReportError>> {
        match self.outcome.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(ReportError::Transport(
                "report thread ended without an outcome".to_owned(),
            ))),
        }
    }
}
