//! Typed commands
//!
//! Each wire [`Action`] is parsed into a [`Command`] right before it runs.
//! Parsing checks the payload shape only; ordinals are resolved later by the
//! dispatcher against synced document state.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::dialog::AlertRequest;
use crate::document::{Axis, CellArea, ClearScope, CopyOrigin, DeleteShift, InsertShift};
use crate::error::{RemoteError, Result};
use crate::models::{Action, Cell};

/// A range addressed by sheet position and zero-based indexes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeTarget {
    pub sheet_position: usize,
    pub area: CellArea,
}

/// Property change on a table addressed by index
#[derive(Debug, Clone, PartialEq)]
pub enum TableUpdate {
    Name(String),
    ShowHeaders(bool),
    ShowTotals(bool),
    Style(String),
    ShowAutofilter(bool),
    /// New address on the same sheet
    Resize(CellArea),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PictureUpdate {
    Name(String),
    Width(f64),
    Height(f64),
}

/// One command from the remote engine
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetValues {
        target: RangeTarget,
        values: Vec<Vec<Cell>>,
    },
    ClearRange {
        target: RangeTarget,
        scope: ClearScope,
    },
    AddSheet {
        position: usize,
        name: Option<String>,
    },
    SetSheetName {
        sheet_position: usize,
        name: String,
    },
    ActivateSheet {
        position: usize,
    },
    DeleteSheet {
        sheet_position: usize,
    },
    ClearSheet {
        sheet_position: usize,
        scope: ClearScope,
    },
    Autofit {
        target: RangeTarget,
        axis: Axis,
    },
    SetRangeColor {
        target: RangeTarget,
        color: String,
    },
    AddHyperlink {
        target: RangeTarget,
        address: String,
        text_to_display: Option<String>,
        screen_tip: Option<String>,
    },
    SetNumberFormat {
        target: RangeTarget,
        format: String,
    },
    /// Book-scope name for the target range
    SetRangeName {
        target: RangeTarget,
        name: String,
    },
    /// Sheet scope when `sheet_position` is set, book scope otherwise
    AddName {
        sheet_position: Option<usize>,
        name: String,
        refers_to: String,
    },
    DeleteName {
        name: String,
        book_scope: bool,
        scope_sheet_index: Option<usize>,
    },
    CopyRange {
        target: RangeTarget,
        destination_sheet: usize,
        destination: CellArea,
    },
    DeleteRange {
        target: RangeTarget,
        shift: DeleteShift,
    },
    InsertRange {
        target: RangeTarget,
        shift: InsertShift,
        copy_origin: Option<CopyOrigin>,
    },
    SelectRange {
        target: RangeTarget,
    },
    AddTable {
        sheet_position: usize,
        area: CellArea,
        has_headers: bool,
        style: Option<String>,
        name: Option<String>,
    },
    UpdateTable {
        sheet_position: usize,
        index: usize,
        update: TableUpdate,
    },
    AddPicture {
        sheet_position: usize,
        image: Vec<u8>,
        column: usize,
        row: usize,
        left: f64,
        top: f64,
    },
    /// Replace the image, keeping name and size
    UpdatePicture {
        sheet_position: usize,
        index: usize,
        image: Vec<u8>,
        name: Option<String>,
        width: Option<f64>,
        height: Option<f64>,
    },
    SetPictureProperty {
        sheet_position: usize,
        index: usize,
        update: PictureUpdate,
    },
    DeletePicture {
        sheet_position: usize,
        index: usize,
    },
    Alert(AlertRequest),
    RunMacro {
        name: String,
        args: Vec<Cell>,
    },
}

impl Command {
    /// Commands that add or remove members of an ordinal collection
    ///
    /// The dispatcher syncs right after these, so that the next command
    /// resolves positions against the new collection.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Command::AddSheet { .. }
                | Command::DeleteSheet { .. }
                | Command::AddTable { .. }
                | Command::AddPicture { .. }
                | Command::DeletePicture { .. }
        )
    }
}

impl TryFrom<Action> for Command {
    type Error = RemoteError;

    fn try_from(action: Action) -> Result<Self> {
        let args = Args {
            func: &action.func,
            args: &action.args,
        };

        let command = match action.func.as_str() {
            "setValues" => {
                let values = action
                    .values
                    .clone()
                    .ok_or_else(|| RemoteError::invalid_action(&action.func, "missing values"))?;
                let target = range_target_sized(&action, &values)?;
                Command::SetValues { target, values }
            }
            "clearContents" | "rangeClearContents" => Command::ClearRange {
                target: range_target(&action)?,
                scope: ClearScope::Contents,
            },
            "rangeClear" => Command::ClearRange {
                target: range_target(&action)?,
                scope: ClearScope::All,
            },
            "rangeClearFormats" => Command::ClearRange {
                target: range_target(&action)?,
                scope: ClearScope::Formats,
            },
            "addSheet" => Command::AddSheet {
                position: args.index(0)?,
                name: args.opt_string(1),
            },
            "setSheetName" => Command::SetSheetName {
                sheet_position: sheet_position(&action)?,
                name: args.string(0)?,
            },
            "activateSheet" => Command::ActivateSheet {
                position: args.index(0)?,
            },
            "sheetDelete" => Command::DeleteSheet {
                sheet_position: sheet_position(&action)?,
            },
            "sheetClear" => Command::ClearSheet {
                sheet_position: sheet_position(&action)?,
                scope: ClearScope::All,
            },
            "sheetClearContents" => Command::ClearSheet {
                sheet_position: sheet_position(&action)?,
                scope: ClearScope::Contents,
            },
            "sheetClearFormats" => Command::ClearSheet {
                sheet_position: sheet_position(&action)?,
                scope: ClearScope::Formats,
            },
            "setAutofit" => Command::Autofit {
                target: range_target(&action)?,
                axis: match args.string(0)?.as_str() {
                    "columns" => Axis::Columns,
                    "rows" => Axis::Rows,
                    other => return Err(args.invalid(format!("unknown axis '{}'", other))),
                },
            },
            "setRangeColor" => Command::SetRangeColor {
                target: range_target(&action)?,
                color: args.string(0)?,
            },
            "addHyperlink" => Command::AddHyperlink {
                target: range_target(&action)?,
                address: args.string(0)?,
                text_to_display: args.opt_string(1),
                screen_tip: args.opt_string(2),
            },
            "setNumberFormat" => Command::SetNumberFormat {
                target: range_target(&action)?,
                format: args.string(0)?,
            },
            "setRangeName" => Command::SetRangeName {
                target: range_target(&action)?,
                name: args.string(0)?,
            },
            "namesAdd" => Command::AddName {
                sheet_position: action.sheet_position,
                name: args.string(0)?,
                refers_to: args.string(1)?,
            },
            "nameDelete" => Command::DeleteName {
                name: args.string(2)?,
                book_scope: args.flag(4),
                scope_sheet_index: args.get(5).as_index(),
            },
            "copyRange" => Command::CopyRange {
                target: range_target(&action)?,
                destination_sheet: args.index(0)?,
                destination: args.address(1)?,
            },
            "rangeDelete" => Command::DeleteRange {
                target: range_target(&action)?,
                shift: match args.string(0)?.as_str() {
                    "up" => DeleteShift::Up,
                    "left" => DeleteShift::Left,
                    other => return Err(args.invalid(format!("unknown shift '{}'", other))),
                },
            },
            "rangeInsert" => Command::InsertRange {
                target: range_target(&action)?,
                shift: match args.string(0)?.as_str() {
                    "down" => InsertShift::Down,
                    "right" => InsertShift::Right,
                    other => return Err(args.invalid(format!("unknown shift '{}'", other))),
                },
                copy_origin: args.opt_string(1).map(|o| parse_copy_origin(&args, &o)).transpose()?,
            },
            "rangeSelect" => Command::SelectRange {
                target: range_target(&action)?,
            },
            "addTable" => Command::AddTable {
                sheet_position: sheet_position(&action)?,
                area: args.address(0)?,
                has_headers: args.flag(1),
                style: args.opt_string(2),
                name: args.opt_string(3),
            },
            "setTableName" | "showHeadersTable" | "showTotalsTable" | "setTableStyle"
            | "showAutofilterTable" | "resizeTable" => {
                let update = match action.func.as_str() {
                    "setTableName" => TableUpdate::Name(args.string(1)?),
                    "showHeadersTable" => TableUpdate::ShowHeaders(args.flag(1)),
                    "showTotalsTable" => TableUpdate::ShowTotals(args.flag(1)),
                    "setTableStyle" => TableUpdate::Style(args.string(1)?),
                    "showAutofilterTable" => TableUpdate::ShowAutofilter(args.flag(1)),
                    _ => TableUpdate::Resize(args.address(1)?),
                };
                Command::UpdateTable {
                    sheet_position: sheet_position(&action)?,
                    index: args.index(0)?,
                    update,
                }
            }
            "addPicture" => Command::AddPicture {
                sheet_position: sheet_position(&action)?,
                image: args.image(0)?,
                column: args.opt_index(1)?.unwrap_or(0),
                row: args.opt_index(2)?.unwrap_or(0),
                left: args.opt_number(3)?.unwrap_or(0.0),
                top: args.opt_number(4)?.unwrap_or(0.0),
            },
            "updatePicture" => Command::UpdatePicture {
                sheet_position: sheet_position(&action)?,
                image: args.image(0)?,
                index: args.index(1)?,
                name: args.opt_string(2),
                width: args.opt_number(3)?,
                height: args.opt_number(4)?,
            },
            "setPictureName" | "setPictureWidth" | "setPictureHeight" => {
                let update = match action.func.as_str() {
                    "setPictureName" => PictureUpdate::Name(args.string(1)?),
                    "setPictureWidth" => PictureUpdate::Width(args.number(1)?),
                    _ => PictureUpdate::Height(args.number(1)?),
                };
                Command::SetPictureProperty {
                    sheet_position: sheet_position(&action)?,
                    index: args.index(0)?,
                    update,
                }
            }
            "deletePicture" => Command::DeletePicture {
                sheet_position: sheet_position(&action)?,
                index: args.index(0)?,
            },
            "alert" => Command::Alert(AlertRequest {
                prompt: args.get(0).to_string(),
                title: args.get(1).to_string(),
                buttons: args.get(2).to_string(),
                mode: args.get(3).to_string(),
                callback: args.get(4).to_string(),
            }),
            "runMacro" => Command::RunMacro {
                name: args.string(0)?,
                args: action.args.iter().skip(1).cloned().collect(),
            },
            other => return Err(RemoteError::UnknownAction(other.to_string())),
        };
        Ok(command)
    }
}

/// Positional argument access with errors naming the action
struct Args<'a> {
    func: &'a str,
    args: &'a [Cell],
}

static EMPTY: Cell = Cell::Empty;

impl Args<'_> {
    fn invalid(&self, reason: impl Into<String>) -> RemoteError {
        RemoteError::invalid_action(self.func, reason)
    }

    /// Missing arguments read as empty
    fn get(&self, i: usize) -> &Cell {
        self.args.get(i).unwrap_or(&EMPTY)
    }

    fn string(&self, i: usize) -> Result<String> {
        match self.get(i) {
            Cell::Empty => Err(self.invalid(format!("missing argument {}", i))),
            cell => Ok(cell.to_string()),
        }
    }

    fn opt_string(&self, i: usize) -> Option<String> {
        match self.get(i) {
            Cell::Empty => None,
            cell => Some(cell.to_string()),
        }
    }

    fn index(&self, i: usize) -> Result<usize> {
        self.opt_index(i)?
            .ok_or_else(|| self.invalid(format!("missing index argument {}", i)))
    }

    fn opt_index(&self, i: usize) -> Result<Option<usize>> {
        match self.get(i) {
            Cell::Empty => Ok(None),
            cell => cell
                .as_index()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("argument {} is not an index: '{}'", i, cell))),
        }
    }

    fn number(&self, i: usize) -> Result<f64> {
        self.opt_number(i)?
            .ok_or_else(|| self.invalid(format!("missing number argument {}", i)))
    }

    fn opt_number(&self, i: usize) -> Result<Option<f64>> {
        match self.get(i) {
            Cell::Empty => Ok(None),
            cell => cell
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(format!("argument {} is not a number: '{}'", i, cell))),
        }
    }

    /// Truthiness: `false`, `0`, `""` and missing are false
    fn flag(&self, i: usize) -> bool {
        match self.get(i) {
            Cell::Empty => false,
            Cell::Bool(b) => *b,
            Cell::Number(n) => *n != 0.0 && !n.is_nan(),
            Cell::Text(s) => !s.is_empty(),
        }
    }

    fn address(&self, i: usize) -> Result<CellArea> {
        let address = self.string(i)?;
        CellArea::parse(&address).map_err(|e| self.invalid(e.to_string()))
    }

    fn image(&self, i: usize) -> Result<Vec<u8>> {
        let encoded = self.string(i)?;
        STANDARD
            .decode(encoded.trim().as_bytes())
            .map_err(|e| self.invalid(format!("invalid base64 image: {}", e)))
    }
}

fn parse_copy_origin(args: &Args<'_>, origin: &str) -> Result<CopyOrigin> {
    let normalized: String = origin
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    match normalized.as_str() {
        "formatfromleftorabove" => Ok(CopyOrigin::FormatFromLeftOrAbove),
        "formatfromrightorbelow" => Ok(CopyOrigin::FormatFromRightOrBelow),
        _ => Err(args.invalid(format!("unknown copy origin '{}'", origin))),
    }
}

fn require(action: &Action, value: Option<usize>, field: &str) -> Result<usize> {
    value.ok_or_else(|| RemoteError::invalid_action(&action.func, format!("missing {}", field)))
}

fn sheet_position(action: &Action) -> Result<usize> {
    require(action, action.sheet_position, "sheet_position")
}

fn range_target(action: &Action) -> Result<RangeTarget> {
    Ok(RangeTarget {
        sheet_position: sheet_position(action)?,
        area: CellArea::new(
            require(action, action.start_row, "start_row")?,
            require(action, action.start_column, "start_column")?,
            action.row_count.unwrap_or(1),
            action.column_count.unwrap_or(1),
        ),
    })
}

/// Range target whose missing counts default to the shape of `values`
fn range_target_sized(action: &Action, values: &[Vec<Cell>]) -> Result<RangeTarget> {
    let mut target = range_target(action)?;
    target.area.rows = action.row_count.unwrap_or(values.len());
    target.area.columns = action
        .column_count
        .unwrap_or_else(|| values.first().map_or(0, Vec::len));
    Ok(target)
}
