//! Snapshot serializer
//!
//! Turns live document state into a [`WorkbookSnapshot`]. Names are
//! collected for the whole workbook; values, tables and pictures only for
//! sheets that aren't excluded. Excluded sheets still get a placeholder entry
//! so that snapshot indices match live sheet positions.

mod options;

pub use options::{CONFIG_SHEET_NAME, ConfigSheet, ResolvedOptions, RunOptions, split_list};

use log::debug;

use crate::dates;
use crate::document::{
    CellArea, Document, NameScope, PictureInfo, RangeContents, SheetId, SheetInfo, TableInfo,
};
use crate::error::Result;
use crate::models::{
    BookInfo, CLIENT_NAME, Cell, NameBinding, PictureSnapshot, SheetSnapshot, TableSnapshot,
    WorkbookSnapshot,
};
use crate::transport::{RequestHeaders, build_headers};

/// A snapshot ready to send, with its final headers
#[derive(Debug, Clone)]
pub struct Prepared {
    pub snapshot: WorkbookSnapshot,
    pub headers: RequestHeaders,
}

/// Resolve options against the document and capture a snapshot
///
/// Conflicting include/exclude options fail before any value is read.
pub fn prepare<D: Document + ?Sized>(doc: &D, options: &RunOptions) -> Result<Prepared> {
    options.validate()?;

    let config = ConfigSheet::read(doc)?;
    let sheet_names: Vec<String> = doc.sheets()?.into_iter().map(|s| s.name).collect();
    let resolved = options.resolve(&config, &sheet_names)?;

    let snapshot = capture(doc, &resolved.exclude)?;
    let headers = build_headers(&resolved.headers, resolved.auth.as_deref());
    Ok(Prepared { snapshot, headers })
}

/// Capture the workbook, sending placeholders for `exclude`d sheets
pub fn capture<D: Document + ?Sized>(doc: &D, exclude: &[String]) -> Result<WorkbookSnapshot> {
    let sheets = doc.sheets()?;
    let active = doc.active_sheet()?;

    let book = BookInfo {
        name: doc.book_name()?,
        active_sheet_index: sheets.iter().position(|s| s.id == active).unwrap_or(0),
        selection: doc.selection()?.map(|s| strip_sheet_prefix(&s).to_string()),
    };

    let names = capture_names(doc, &sheets)?;

    let mut sheet_snapshots = Vec::with_capacity(sheets.len());
    for sheet in &sheets {
        if exclude.contains(&sheet.name) {
            debug!("Sheet '{}' excluded from snapshot", sheet.name);
            sheet_snapshots.push(SheetSnapshot::excluded(&sheet.name));
            continue;
        }
        sheet_snapshots.push(capture_sheet(doc, sheet)?);
    }

    Ok(WorkbookSnapshot {
        client: CLIENT_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        book,
        names,
        sheets: sheet_snapshots,
    })
}

fn capture_sheet<D: Document + ?Sized>(doc: &D, sheet: &SheetInfo) -> Result<SheetSnapshot> {
    let area = match doc.used_range(sheet.id)? {
        Some(used) => CellArea::from_origin_to(used.last_row(), used.last_column()),
        None => CellArea::cell(0, 0),
    };
    let values = convert_dates(doc.read_range(sheet.id, area)?);
    debug!("Captured {} from sheet '{}'", area, sheet.name);

    Ok(SheetSnapshot {
        name: sheet.name.clone(),
        values,
        tables: doc.tables(sheet.id)?.iter().map(table_snapshot).collect(),
        pictures: doc.pictures(sheet.id)?.iter().map(picture_snapshot).collect(),
    })
}

/// Book-scope names first, then sheet-scope names in sheet order.
/// Names that don't refer to a range are skipped.
fn capture_names<D: Document + ?Sized>(doc: &D, sheets: &[SheetInfo]) -> Result<Vec<NameBinding>> {
    let position = |id: SheetId| sheets.iter().position(|s| s.id == id);

    let mut book_scope = Vec::new();
    let mut sheet_scope = Vec::new();
    for item in doc.names()? {
        let Some(range) = item.refers_to else {
            continue;
        };
        let Some(sheet_index) = position(range.sheet) else {
            continue;
        };
        match item.scope {
            NameScope::Book => book_scope.push(NameBinding {
                name: item.name,
                sheet_index,
                address: range.area.to_a1(),
                book_scope: true,
                scope_sheet_name: None,
                scope_sheet_index: None,
            }),
            NameScope::Sheet(scope_id) => {
                let Some(scope_index) = position(scope_id) else {
                    continue;
                };
                sheet_scope.push(NameBinding {
                    name: item.name,
                    sheet_index,
                    address: range.area.to_a1(),
                    book_scope: false,
                    scope_sheet_name: Some(sheets[scope_index].name.clone()),
                    scope_sheet_index: Some(scope_index),
                });
            }
        }
    }
    sheet_scope.sort_by_key(|binding| binding.scope_sheet_index);

    book_scope.extend(sheet_scope);
    Ok(book_scope)
}

/// Numbers in date or time formatted cells leave as ISO strings
fn convert_dates(contents: RangeContents) -> Vec<Vec<Cell>> {
    let RangeContents { values, categories } = contents;
    values
        .into_iter()
        .zip(categories)
        .map(|(row, row_categories)| {
            row.into_iter()
                .zip(row_categories)
                .map(|(value, category)| match value {
                    Cell::Number(serial) if category.is_temporal() => dates::serial_to_iso(serial)
                        .map(Cell::Text)
                        .unwrap_or(Cell::Number(serial)),
                    other => other,
                })
                .collect()
        })
        .collect()
}

fn table_snapshot(table: &TableInfo) -> TableSnapshot {
    TableSnapshot {
        name: table.name.clone(),
        range_address: table.area.to_a1(),
        header_row_range_address: table.header_row_area().map(|a| a.to_a1()),
        data_body_range_address: table.data_body_area().to_a1(),
        total_row_range_address: table.total_row_area().map(|a| a.to_a1()),
        show_headers: table.show_headers,
        show_totals: table.show_totals,
        table_style: table.style.clone(),
        show_autofilter: table.show_filter_button,
    }
}

fn picture_snapshot(picture: &PictureInfo) -> PictureSnapshot {
    PictureSnapshot {
        name: picture.name.clone(),
        width: picture.width,
        height: picture.height,
    }
}

fn strip_sheet_prefix(address: &str) -> &str {
    address.rsplit('!').next().unwrap_or(address)
}
