//! Workbook snapshot sent to the remote engine

use serde::{Deserialize, Serialize};

use super::Cell;

/// Value used for the `client` field of every snapshot
pub const CLIENT_NAME: &str = "relay";

/// Serialized capture of workbook state
///
/// `sheets` always has one entry per live sheet, in live order. Commands
/// coming back from the engine address sheets by their index in this array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkbookSnapshot {
    pub client: String,
    pub version: String,
    pub book: BookInfo,
    pub names: Vec<NameBinding>,
    pub sheets: Vec<SheetSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInfo {
    pub name: String,
    pub active_sheet_index: usize,
    /// Selected address without the sheet prefix (e.g. `B2:C4`)
    pub selection: Option<String>,
}

/// A named range
///
/// Book-scope bindings come first in [`WorkbookSnapshot::names`], followed by
/// sheet-scope bindings in sheet order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameBinding {
    pub name: String,
    /// Position of the sheet the name refers to
    pub sheet_index: usize,
    pub address: String,
    pub book_scope: bool,
    pub scope_sheet_name: Option<String>,
    pub scope_sheet_index: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SheetSnapshot {
    pub name: String,
    /// Values from `A1` to the last used cell
    pub values: Vec<Vec<Cell>>,
    pub tables: Vec<TableSnapshot>,
    pub pictures: Vec<PictureSnapshot>,
}

impl SheetSnapshot {
    /// Placeholder for a sheet filtered out by include/exclude.
    /// Keeps the array aligned with live sheet positions.
    pub fn excluded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: vec![Vec::new()],
            tables: Vec::new(),
            pictures: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub name: String,
    pub range_address: String,
    pub header_row_range_address: Option<String>,
    pub data_body_range_address: String,
    pub total_row_range_address: Option<String>,
    pub show_headers: bool,
    pub show_totals: bool,
    pub table_style: String,
    pub show_autofilter: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureSnapshot {
    pub name: String,
    pub width: f64,
    pub height: f64,
}
