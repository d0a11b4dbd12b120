use log::{error, info};

use crate::actions::{Dispatcher, ReplayStats};
use crate::auth::Credentials;
use crate::document::Document;
use crate::error::Result;
use crate::snapshot::{self, RunOptions};
use crate::transport::{AUTHORIZATION, Transport};

/// One snapshot/replay cycle against a remote engine
///
/// Captures the document, posts it to `url`, and replays the returned
/// actions through the dispatcher.
pub struct Runner<T: Transport> {
    url: String,
    transport: T,
    dispatcher: Dispatcher,
    credentials: Option<Box<dyn Credentials>>,
}

impl<T: Transport> Runner<T> {
    pub fn new(url: impl Into<String>, transport: T, dispatcher: Dispatcher) -> Self {
        Self {
            url: url.into(),
            transport,
            dispatcher,
            credentials: None,
        }
    }

    /// Source of the `Authorization` value when nothing else supplies one
    pub fn with_credentials(mut self, credentials: impl Credentials + 'static) -> Self {
        self.credentials = Some(Box::new(credentials));
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn run(&self, doc: &mut dyn Document, options: &RunOptions) -> Result<ReplayStats> {
        let mut prepared = snapshot::prepare(&*doc, options)?;

        // Only prompt when neither the options nor the config sheet nor a
        // header override supplied one
        if !prepared.headers.contains(AUTHORIZATION)
            && let Some(credentials) = &self.credentials
        {
            prepared.headers.insert(AUTHORIZATION, credentials.credential()?);
        }
        info!(
            "Sending {} sheet(s) of '{}' to {}",
            prepared.snapshot.sheets.len(),
            prepared.snapshot.book.name,
            self.url
        );

        let actions = self
            .transport
            .exchange(&self.url, &prepared.headers, &prepared.snapshot)?;

        let stats = self.dispatcher.replay(doc, actions)?;
        info!(
            "Applied {} action(s) with {} barrier(s) in {}ms",
            stats.actions_applied, stats.barriers, stats.duration_ms
        );
        Ok(stats)
    }

    /// [`run`](Self::run), reporting any failure in an error alert
    ///
    /// The error is logged once and still returned to the caller.
    pub fn run_or_alert(&self, doc: &mut dyn Document, options: &RunOptions) -> Result<ReplayStats> {
        self.run(doc, options).inspect_err(|e| {
            error!("{}", e);
            if let Some(alerts) = self.dispatcher.alerts()
                && let Err(alert_err) = alerts.show_error(&e.to_string())
            {
                error!("Failed to show error alert: {}", alert_err);
            }
        })
    }
}

impl<T: Transport + std::fmt::Debug> std::fmt::Debug for Runner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("url", &self.url)
            .field("transport", &self.transport)
            .field("dispatcher", &self.dispatcher)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}
