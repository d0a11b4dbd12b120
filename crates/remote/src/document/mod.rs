//! Document object API consumed by the serializer and dispatcher
//!
//! The host spreadsheet model is an external collaborator. This module
//! describes the part of it the core relies on:
//!
//! - collections of sheets, tables, pictures and names, addressed by ordinal
//!   position but carrying stable opaque identifiers
//! - a load/sync batching contract: reads observe the state as of the last
//!   [`Document::sync`], edits are queued with [`Document::enqueue`] and only
//!   become visible (and only affect ordinal positions) after the next sync
//!
//! [`MemoryDocument`] is a complete in-process implementation of that
//! contract, used by tests and by the `relay` binary.

mod address;
mod memory;

pub use address::{CellArea, MAX_COLUMNS, MAX_ROWS, column_index, column_letters, parse_reference};
pub use memory::{MemoryDocument, WorkbookFile};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::models::Cell;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// Stable identifier of a sheet, unaffected by reordering
    SheetId
);
object_id!(
    /// Stable identifier of a table
    TableId
);
object_id!(
    /// Stable identifier of an embedded picture
    PictureId
);

/// Errors raised by the document model
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DocumentError {
    #[error("No sheet at position {0}")]
    SheetOutOfRange(usize),

    #[error("No table at index {index} on sheet '{sheet}'")]
    TableOutOfRange { sheet: String, index: usize },

    #[error("No picture at index {index} on sheet '{sheet}'")]
    PictureOutOfRange { sheet: String, index: usize },

    #[error("Sheet {0} no longer exists")]
    UnknownSheet(SheetId),

    #[error("Table {0} no longer exists")]
    UnknownTable(TableId),

    #[error("Picture {0} no longer exists")]
    UnknownPicture(PictureId),

    #[error("No sheet named '{0}'")]
    SheetNotFound(String),

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("A sheet named '{0}' already exists")]
    DuplicateSheetName(String),

    #[error("The name '{0}' already exists")]
    DuplicateName(String),

    #[error("The name '{0}' doesn't exist")]
    UnknownName(String),

    #[error("A workbook must contain at least one sheet")]
    LastSheet,

    #[error("Values are {got_rows}x{got_columns} but the target range is {rows}x{columns}")]
    ShapeMismatch {
        rows: usize,
        columns: usize,
        got_rows: usize,
        got_columns: usize,
    },

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Invalid workbook file: {0}")]
    InvalidWorkbook(String),
}

/// Format category of a cell, as reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatCategory {
    General,
    Number,
    Percentage,
    Date,
    Time,
    Text,
    Custom,
}

impl FormatCategory {
    /// Classify a number format code such as `yyyy-mm-dd` or `0.00%`
    pub fn from_format(format: &str) -> Self {
        let trimmed = format.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("general") {
            return FormatCategory::General;
        }
        if trimmed == "@" {
            return FormatCategory::Text;
        }

        // Only look at the first section, with literals and [color]/[$-409] tags removed
        let section = trimmed.split(';').next().unwrap_or_default();
        let mut code = String::with_capacity(section.len());
        let mut bracket: Option<String> = None;
        let mut in_quotes = false;
        let mut escaped = false;
        for ch in section.chars() {
            if escaped {
                escaped = false;
                continue;
            }
            match (ch, bracket.as_mut()) {
                ('"', None) => in_quotes = !in_quotes,
                (_, None) if in_quotes => {}
                ('\\', None) => escaped = true,
                ('[', None) => bracket = Some(String::new()),
                (']', Some(_)) => {
                    let content = bracket.take().unwrap_or_default();
                    // Elapsed-time tokens like [h] or [mm] count as time codes
                    if content.chars().all(|c| matches!(c.to_ascii_lowercase(), 'h' | 'm' | 's')) {
                        code.push_str(&content.to_ascii_lowercase());
                    }
                }
                (_, Some(content)) => content.push(ch),
                (_, None) => code.push(ch.to_ascii_lowercase()),
            }
        }

        if code.contains('y') || code.contains('d') {
            FormatCategory::Date
        } else if code.contains('h') || code.contains('s') {
            FormatCategory::Time
        } else if code.contains('m') {
            FormatCategory::Date
        } else if code.contains('%') {
            FormatCategory::Percentage
        } else if code.contains('0') || code.contains('#') {
            FormatCategory::Number
        } else {
            FormatCategory::Custom
        }
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, FormatCategory::Date | FormatCategory::Time)
    }
}

/// Values and per-cell format categories of a range
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeContents {
    pub values: Vec<Vec<Cell>>,
    pub categories: Vec<Vec<FormatCategory>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SheetInfo {
    pub id: SheetId,
    pub name: String,
}

/// A range on a specific sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RangeRef {
    pub sheet: SheetId,
    pub area: CellArea,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameScope {
    Book,
    Sheet(SheetId),
}

/// A defined name
///
/// `refers_to` is `None` for names bound to formulas or constants rather
/// than a range.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedItem {
    pub name: String,
    pub scope: NameScope,
    pub refers_to: Option<RangeRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableInfo {
    pub id: TableId,
    pub name: String,
    /// Full range, including header and total rows
    pub area: CellArea,
    pub show_headers: bool,
    pub show_totals: bool,
    pub style: String,
    pub show_filter_button: bool,
}

impl TableInfo {
    pub fn header_row_area(&self) -> Option<CellArea> {
        self.show_headers
            .then(|| CellArea::new(self.area.row, self.area.column, 1, self.area.columns))
    }

    pub fn total_row_area(&self) -> Option<CellArea> {
        self.show_totals
            .then(|| CellArea::new(self.area.last_row(), self.area.column, 1, self.area.columns))
    }

    /// Rows between the header and total rows
    pub fn data_body_area(&self) -> CellArea {
        let header = usize::from(self.show_headers);
        let total = usize::from(self.show_totals);
        let rows = self.area.rows.saturating_sub(header + total).max(1);
        CellArea::new(self.area.row + header, self.area.column, rows, self.area.columns)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PictureInfo {
    pub id: PictureId,
    pub name: String,
    pub width: f64,
    pub height: f64,
    pub left: f64,
    pub top: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperlink {
    pub address: String,
    pub text_to_display: Option<String>,
    pub screen_tip: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    Contents,
    Formats,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Columns,
    Rows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteShift {
    Up,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertShift {
    Down,
    Right,
}

/// Where inserted cells take their formatting from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOrigin {
    FormatFromLeftOrAbove,
    FormatFromRightOrBelow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableChange {
    Name(String),
    ShowHeaders(bool),
    ShowTotals(bool),
    Style(String),
    ShowFilterButton(bool),
    Resize(CellArea),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PictureChange {
    Name(String),
    Width(f64),
    Height(f64),
    Image(Vec<u8>),
}

/// A queued mutation
///
/// Edits address objects by stable identifier. Resolving an ordinal
/// position to an identifier is the caller's job, and must happen against
/// synced state.
#[derive(Debug, Clone, PartialEq)]
pub enum Edit {
    SetValues {
        sheet: SheetId,
        area: CellArea,
        values: Vec<Vec<Cell>>,
    },
    /// `area: None` clears the whole sheet
    Clear {
        sheet: SheetId,
        area: Option<CellArea>,
        scope: ClearScope,
    },
    SetNumberFormat {
        sheet: SheetId,
        area: CellArea,
        format: String,
    },
    SetFill {
        sheet: SheetId,
        area: CellArea,
        color: String,
    },
    SetHyperlink {
        sheet: SheetId,
        area: CellArea,
        hyperlink: Hyperlink,
    },
    Autofit {
        sheet: SheetId,
        area: CellArea,
        axis: Axis,
    },
    DeleteRange {
        sheet: SheetId,
        area: CellArea,
        shift: DeleteShift,
    },
    InsertRange {
        sheet: SheetId,
        area: CellArea,
        shift: InsertShift,
        copy_origin: Option<CopyOrigin>,
    },
    /// Copies values and formats; only the top-left of `destination` matters
    CopyRange {
        sheet: SheetId,
        area: CellArea,
        destination: RangeRef,
    },
    AddSheet {
        position: usize,
        name: Option<String>,
    },
    RenameSheet {
        sheet: SheetId,
        name: String,
    },
    ActivateSheet {
        sheet: SheetId,
    },
    /// Select a range, activating its sheet
    Select {
        sheet: SheetId,
        area: CellArea,
    },
    DeleteSheet {
        sheet: SheetId,
    },
    AddName {
        name: String,
        scope: NameScope,
        refers_to: RangeRef,
    },
    DeleteName {
        name: String,
        scope: NameScope,
    },
    AddTable {
        sheet: SheetId,
        area: CellArea,
        has_headers: bool,
        style: Option<String>,
        name: Option<String>,
    },
    UpdateTable {
        sheet: SheetId,
        table: TableId,
        change: TableChange,
    },
    AddPicture {
        sheet: SheetId,
        image: Vec<u8>,
        row: usize,
        column: usize,
        left: f64,
        top: f64,
    },
    UpdatePicture {
        sheet: SheetId,
        picture: PictureId,
        change: PictureChange,
    },
    DeletePicture {
        sheet: SheetId,
        picture: PictureId,
    },
}

/// The live spreadsheet, as seen by the core
///
/// Reads return state as of the last [`sync`](Document::sync). Edits queued
/// with [`enqueue`](Document::enqueue) are applied in order by the next sync.
pub trait Document {
    fn book_name(&self) -> Result<String, DocumentError>;

    /// Sheets in ordinal order
    fn sheets(&self) -> Result<Vec<SheetInfo>, DocumentError>;

    fn active_sheet(&self) -> Result<SheetId, DocumentError>;

    /// Current selection, possibly with a sheet prefix
    fn selection(&self) -> Result<Option<String>, DocumentError>;

    /// Bounding box of all used cells, `None` for an empty sheet
    fn used_range(&self, sheet: SheetId) -> Result<Option<CellArea>, DocumentError>;

    fn read_range(&self, sheet: SheetId, area: CellArea) -> Result<RangeContents, DocumentError>;

    /// Book-scope and sheet-scope names
    fn names(&self) -> Result<Vec<NamedItem>, DocumentError>;

    /// Tables of a sheet in ordinal order
    fn tables(&self, sheet: SheetId) -> Result<Vec<TableInfo>, DocumentError>;

    /// Pictures of a sheet in ordinal order
    fn pictures(&self, sheet: SheetId) -> Result<Vec<PictureInfo>, DocumentError>;

    fn enqueue(&mut self, edit: Edit) -> Result<(), DocumentError>;

    /// Apply queued edits and refresh the state reads observe
    fn sync(&mut self) -> Result<(), DocumentError>;

    fn sheet_at(&self, position: usize) -> Result<SheetInfo, DocumentError> {
        self.sheets()?
            .into_iter()
            .nth(position)
            .ok_or(DocumentError::SheetOutOfRange(position))
    }

    fn sheet_named(&self, name: &str) -> Result<Option<SheetInfo>, DocumentError> {
        Ok(self
            .sheets()?
            .into_iter()
            .find(|sheet| sheet.name.eq_ignore_ascii_case(name)))
    }

    fn table_at(&self, sheet: &SheetInfo, index: usize) -> Result<TableInfo, DocumentError> {
        self.tables(sheet.id)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| DocumentError::TableOutOfRange {
                sheet: sheet.name.clone(),
                index,
            })
    }

    fn picture_at(&self, sheet: &SheetInfo, index: usize) -> Result<PictureInfo, DocumentError> {
        self.pictures(sheet.id)?
            .into_iter()
            .nth(index)
            .ok_or_else(|| DocumentError::PictureOutOfRange {
                sheet: sheet.name.clone(),
                index,
            })
    }
}
