/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::ReportError;
use super::outbound::Outbound;

/// Collector location, served as JSON next to the instrumentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReporterConfig {
    pub core_endpoint: String,
    pub handler_uuid: Uuid,
}

impl ReporterConfig {
    /// Fetch and parse the config resource at `url`.
    pub fn load(outbound: &dyn Outbound, url: &Url) -> Result<Self, ReportError> {
        let text = outbound
            .fetch_text(url)
            .map_err(|e| ReportError::Config(format!("failed to fetch {url}: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| ReportError::Config(format!("invalid config at {url}: {e}")))
    }

    /// `{core_endpoint}/api/handlers/{handler_uuid}/dispatch`
    pub fn dispatch_url(&self) -> Result<Url, ReportError> {
        let base = self.core_endpoint.trim_end_matches('/');
        let raw = format!("{base}/api/handlers/{}/dispatch", self.handler_uuid);
        Url::parse(&raw)
            .map_err(|e| ReportError::Config(format!("invalid core endpoint '{base}': {e}")))
    }
}
