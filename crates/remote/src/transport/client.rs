//! HTTP transport
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use log::{debug, info};
use ureq::Agent;
use url::Url;

use super::{RequestHeaders, Transport};
use crate::error::{RemoteError, Result};
use crate::models::{Action, ActionList, WorkbookSnapshot};

/// POSTs snapshots over HTTP(S)
pub struct HttpTransport {
    agent: Agent,
}

impl HttpTransport {
    pub fn new() -> Self {
        // Non-200 bodies carry the engine's error text, so statuses are
        // handled here rather than turned into ureq errors
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    fn exchange(
        &self,
        url: &str,
        headers: &RequestHeaders,
        snapshot: &WorkbookSnapshot,
    ) -> Result<Vec<Action>> {
        let url = Url::parse(url)
            .map_err(|e| RemoteError::Configuration(format!("Invalid URL '{}': {}", url, e)))?;
        let body = serde_json::to_vec(snapshot).map_err(|e| RemoteError::Encode(e.to_string()))?;

        debug!("POST {} ({} bytes, headers {:?})", url, body.len(), headers);
        let mut request = self.agent.post(url.as_str());
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }
        let mut response = request
            .send(&body[..])
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|e| RemoteError::Http(e.to_string()))?;

        if status != 200 {
            return Err(RemoteError::Transport { status, body: text });
        }

        let actions = parse_actions(&text)?;
        info!("Received {} actions from {}", actions.len(), url);
        Ok(actions)
    }
}

/// Parse a success body; `null` means no actions
pub fn parse_actions(body: &str) -> Result<Vec<Action>> {
    let list: Option<ActionList> =
        serde_json::from_str(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
    Ok(list.map(|l| l.actions).unwrap_or_default())
}
