//! Transport to the remote engine
//!
//! One POST per cycle: the snapshot goes out as JSON, an ordered action
//! list comes back. No retries.

mod client;
mod headers;

pub use client::{HttpTransport, parse_actions};
pub use headers::{APPLICATION_JSON, AUTHORIZATION, CONTENT_TYPE, RequestHeaders, build_headers};

use crate::error::Result;
use crate::models::{Action, WorkbookSnapshot};

/// Exchange a snapshot for the engine's actions
pub trait Transport {
    fn exchange(
        &self,
        url: &str,
        headers: &RequestHeaders,
        snapshot: &WorkbookSnapshot,
    ) -> Result<Vec<Action>>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn exchange(
        &self,
        url: &str,
        headers: &RequestHeaders,
        snapshot: &WorkbookSnapshot,
    ) -> Result<Vec<Action>> {
        (**self).exchange(url, headers, snapshot)
    }
}
