//! Remote crate - snapshot/replay client for a remote workbook engine
//!
//! This crate provides the client half of a remote compute cycle:
//! - Workbook snapshot capture (values, names, tables, pictures)
//! - HTTP exchange with the engine and header assembly
//! - Ordered replay of the returned actions with sync barriers
//! - Single-flight access token cache
//! - Alert dialog routing and the macro/callback registry
//!
//! The live document, dialog host and sign-in prompt are reached through
//! traits. [`MemoryDocument`] is a complete in-process document.

pub mod actions;
pub mod auth;
pub mod dates;
pub mod dialog;
pub mod document;
pub mod error;
pub mod models;
pub mod snapshot;
pub mod transport;

mod runner;

pub use actions::{Command, Dispatcher, MacroContext, Registry, ReplayStats};
pub use auth::{Credentials, RenewalFailure, TokenCache, TokenSource};
pub use dialog::{AlertDialog, AlertRequest, DialogEvent, DialogService, DialogSize, Platform};
pub use document::{CellArea, Document, DocumentError, Edit, MemoryDocument, WorkbookFile};
pub use error::{RemoteError, Result};
pub use models::{Action, ActionList, Cell, WorkbookSnapshot};
pub use runner::Runner;
pub use snapshot::{Prepared, RunOptions, capture, prepare};
pub use transport::{HttpTransport, RequestHeaders, Transport};
