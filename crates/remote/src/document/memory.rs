//! In-memory document
//!
//! Implements the load/sync contract literally: every read goes against the
//! committed workbook, every edit waits in a queue until [`Document::sync`].
//! That makes stale ordinal lookups observable, which is what the
//! dispatcher's structural barriers are tested against.
//!
//! The committed state converts to and from [`WorkbookFile`], a small JSON
//! workbook format used by the `relay` binary and by test fixtures.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{
    CellArea, ClearScope, CopyOrigin, DeleteShift, Document, DocumentError, Edit, FormatCategory,
    Hyperlink, InsertShift, NameScope, NamedItem, PictureChange, PictureId, PictureInfo,
    RangeContents, RangeRef, SheetId, SheetInfo, TableChange, TableId, TableInfo, parse_reference,
};
use crate::models::Cell;

const DEFAULT_TABLE_STYLE: &str = "TableStyleMedium2";

/// Default column width and row height in points, used to place pictures
/// anchored to a cell
const COLUMN_WIDTH_PT: f64 = 48.0;
const ROW_HEIGHT_PT: f64 = 15.0;

// ============================================================================
// File format
// ============================================================================

/// JSON workbook format
///
/// ```json
/// {
///   "name": "Book1.xlsx",
///   "sheets": [
///     { "name": "Sheet1", "values": [[1, "a"]], "formats": { "A1": "yyyy-mm-dd" } }
///   ],
///   "names": [{ "name": "Total", "refers_to": "Sheet1!B1" }]
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkbookFile {
    pub name: String,
    #[serde(default)]
    pub active_sheet: usize,
    #[serde(default)]
    pub selection: Option<String>,
    pub sheets: Vec<SheetFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<NameFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetFile {
    pub name: String,
    /// Values starting at `A1`
    #[serde(default)]
    pub values: Vec<Vec<Cell>>,
    /// Address (cell or area) -> number format
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub formats: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fills: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hyperlinks: BTreeMap<String, Hyperlink>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<TableFile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pictures: Vec<PictureFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFile {
    pub name: String,
    pub range: String,
    #[serde(default = "default_true")]
    pub show_headers: bool,
    #[serde(default)]
    pub show_totals: bool,
    #[serde(default = "default_table_style")]
    pub style: String,
    #[serde(default = "default_true")]
    pub show_filter_button: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PictureFile {
    pub name: String,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
    #[serde(default)]
    pub left: f64,
    #[serde(default)]
    pub top: f64,
    /// Base64-encoded image bytes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NameFile {
    pub name: String,
    /// `Sheet1!$A$1:$B$2`
    pub refers_to: String,
    /// Sheet name for sheet-scope names, absent for book scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_table_style() -> String {
    DEFAULT_TABLE_STYLE.to_string()
}

// ============================================================================
// Committed state
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct CellData {
    value: Cell,
    number_format: Option<String>,
    fill: Option<String>,
    hyperlink: Option<Hyperlink>,
}

impl CellData {
    fn is_blank(&self) -> bool {
        self.value.is_empty()
            && self.number_format.is_none()
            && self.fill.is_none()
            && self.hyperlink.is_none()
    }

    fn formats_only(&self) -> CellData {
        CellData {
            number_format: self.number_format.clone(),
            fill: self.fill.clone(),
            ..CellData::default()
        }
    }
}

type CellKey = (usize, usize);

#[derive(Debug, Clone)]
struct Sheet {
    id: SheetId,
    name: String,
    cells: BTreeMap<CellKey, CellData>,
    tables: Vec<Table>,
    pictures: Vec<Picture>,
}

impl Sheet {
    fn new(id: SheetId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            cells: BTreeMap::new(),
            tables: Vec::new(),
            pictures: Vec::new(),
        }
    }

    fn update_cell(&mut self, key: CellKey, f: impl FnOnce(&mut CellData)) {
        let data = self.cells.entry(key).or_default();
        f(data);
        if data.is_blank() {
            self.cells.remove(&key);
        }
    }

    fn put_cell(&mut self, key: CellKey, data: CellData) {
        if data.is_blank() {
            self.cells.remove(&key);
        } else {
            self.cells.insert(key, data);
        }
    }

    /// Remove and return every cell matching `pred`
    fn drain_where(&mut self, pred: impl Fn(&CellKey) -> bool) -> Vec<(CellKey, CellData)> {
        let keys: Vec<CellKey> = self.cells.keys().filter(|k| pred(k)).copied().collect();
        keys.into_iter()
            .filter_map(|key| self.cells.remove(&key).map(|data| (key, data)))
            .collect()
    }

    fn table_mut(&mut self, id: TableId) -> Result<&mut Table, DocumentError> {
        self.tables
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(DocumentError::UnknownTable(id))
    }

    fn picture_mut(&mut self, id: PictureId) -> Result<&mut Picture, DocumentError> {
        self.pictures
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or(DocumentError::UnknownPicture(id))
    }
}

#[derive(Debug, Clone)]
struct Table {
    id: TableId,
    name: String,
    area: CellArea,
    show_headers: bool,
    show_totals: bool,
    style: String,
    show_filter_button: bool,
}

#[derive(Debug, Clone)]
struct Picture {
    id: PictureId,
    name: String,
    width: f64,
    height: f64,
    left: f64,
    top: f64,
    image: Vec<u8>,
}

#[derive(Debug, Clone)]
struct Name {
    name: String,
    scope: NameScope,
    refers_to: Option<RangeRef>,
}

#[derive(Debug, Clone)]
struct Book {
    name: String,
    sheets: Vec<Sheet>,
    names: Vec<Name>,
    active: SheetId,
    selection: Option<String>,
}

// ============================================================================
// MemoryDocument
// ============================================================================

/// A workbook held in memory, with queued edits
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    committed: Book,
    pending: Vec<Edit>,
    next_id: u64,
    syncs: usize,
}

impl MemoryDocument {
    /// A workbook with a single empty `Sheet1`
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_sheets(name, &["Sheet1"])
    }

    /// A workbook with empty sheets of the given names
    pub fn with_sheets(name: impl Into<String>, sheet_names: &[&str]) -> Self {
        let mut doc = Self::empty(name.into(), None);
        for sheet_name in sheet_names {
            let id = SheetId(doc.allocate_id());
            doc.committed.sheets.push(Sheet::new(id, *sheet_name));
        }
        if doc.committed.sheets.is_empty() {
            let id = SheetId(doc.allocate_id());
            doc.committed.sheets.push(Sheet::new(id, "Sheet1"));
        }
        doc.committed.active = doc.committed.sheets[0].id;
        doc
    }

    fn empty(name: String, selection: Option<String>) -> Self {
        Self {
            committed: Book {
                name,
                sheets: Vec::new(),
                names: Vec::new(),
                active: SheetId(0),
                selection,
            },
            pending: Vec::new(),
            next_id: 1,
            syncs: 0,
        }
    }

    /// Parse a [`WorkbookFile`] from JSON
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let file: WorkbookFile =
            serde_json::from_str(json).map_err(|e| DocumentError::InvalidWorkbook(e.to_string()))?;
        Self::from_file(file)
    }

    /// Serialize the committed state as a [`WorkbookFile`]
    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string_pretty(&self.to_file())
            .map_err(|e| DocumentError::InvalidWorkbook(e.to_string()))
    }

    pub fn from_file(file: WorkbookFile) -> Result<Self, DocumentError> {
        let mut doc = Self::empty(file.name, file.selection);

        for sheet_file in file.sheets {
            if doc.find_sheet_by_name(&sheet_file.name).is_some() {
                return Err(DocumentError::DuplicateSheetName(sheet_file.name));
            }
            let sheet = doc.load_sheet(sheet_file)?;
            doc.committed.sheets.push(sheet);
        }

        let first = doc.committed.sheets.first().ok_or(DocumentError::LastSheet)?.id;
        doc.committed.active = doc
            .committed
            .sheets
            .get(file.active_sheet)
            .map_or(first, |s| s.id);

        for name_file in file.names {
            let (sheet_name, area) = parse_reference(&name_file.refers_to)?;
            let sheet_name =
                sheet_name.ok_or_else(|| DocumentError::InvalidAddress(name_file.refers_to.clone()))?;
            let sheet = doc.sheet_id_by_name(&sheet_name)?;
            let scope = match name_file.scope {
                Some(scope_sheet) => NameScope::Sheet(doc.sheet_id_by_name(&scope_sheet)?),
                None => NameScope::Book,
            };
            doc.committed.names.push(Name {
                name: name_file.name,
                scope,
                refers_to: Some(RangeRef { sheet, area }),
            });
        }

        Ok(doc)
    }

    fn load_sheet(&mut self, file: SheetFile) -> Result<Sheet, DocumentError> {
        let mut sheet = Sheet::new(SheetId(self.allocate_id()), file.name);

        for (r, row) in file.values.into_iter().enumerate() {
            for (c, value) in row.into_iter().enumerate() {
                sheet.update_cell((r, c), |data| data.value = value);
            }
        }
        for (address, format) in file.formats {
            for key in CellArea::parse(&address)?.cells() {
                sheet.update_cell(key, |data| data.number_format = Some(format.clone()));
            }
        }
        for (address, color) in file.fills {
            for key in CellArea::parse(&address)?.cells() {
                sheet.update_cell(key, |data| data.fill = Some(color.clone()));
            }
        }
        for (address, hyperlink) in file.hyperlinks {
            for key in CellArea::parse(&address)?.cells() {
                sheet.update_cell(key, |data| data.hyperlink = Some(hyperlink.clone()));
            }
        }
        for table in file.tables {
            sheet.tables.push(Table {
                id: TableId(self.allocate_id()),
                name: table.name,
                area: CellArea::parse(&table.range)?,
                show_headers: table.show_headers,
                show_totals: table.show_totals,
                style: table.style,
                show_filter_button: table.show_filter_button,
            });
        }
        for picture in file.pictures {
            let image = if picture.image.is_empty() {
                Vec::new()
            } else {
                STANDARD
                    .decode(picture.image.as_bytes())
                    .map_err(|e| DocumentError::InvalidImage(e.to_string()))?
            };
            sheet.pictures.push(Picture {
                id: PictureId(self.allocate_id()),
                name: picture.name,
                width: picture.width,
                height: picture.height,
                left: picture.left,
                top: picture.top,
                image,
            });
        }

        Ok(sheet)
    }

    pub fn to_file(&self) -> WorkbookFile {
        let sheets = self.committed.sheets.iter().map(sheet_to_file).collect();
        let names = self
            .committed
            .names
            .iter()
            .filter_map(|name| {
                let refers_to = name.refers_to?;
                let sheet = self.find_sheet(refers_to.sheet)?;
                let scope = match name.scope {
                    NameScope::Book => None,
                    NameScope::Sheet(id) => Some(self.find_sheet(id)?.name.clone()),
                };
                Some(NameFile {
                    name: name.name.clone(),
                    refers_to: format!("{}!{}", quote_sheet_name(&sheet.name), refers_to.area),
                    scope,
                })
            })
            .collect();

        WorkbookFile {
            name: self.committed.name.clone(),
            active_sheet: self.position_of(self.committed.active).unwrap_or(0),
            selection: self.committed.selection.clone(),
            sheets,
            names,
        }
    }

    /// Committed value at a sheet position
    pub fn value(&self, position: usize, row: usize, column: usize) -> Cell {
        self.cell_data(position, row, column)
            .map(|data| data.value.clone())
            .unwrap_or_default()
    }

    pub fn number_format(&self, position: usize, row: usize, column: usize) -> Option<String> {
        self.cell_data(position, row, column)?.number_format.clone()
    }

    pub fn fill(&self, position: usize, row: usize, column: usize) -> Option<String> {
        self.cell_data(position, row, column)?.fill.clone()
    }

    pub fn hyperlink(&self, position: usize, row: usize, column: usize) -> Option<Hyperlink> {
        self.cell_data(position, row, column)?.hyperlink.clone()
    }

    /// Committed sheet names in order
    pub fn sheet_names(&self) -> Vec<String> {
        self.committed.sheets.iter().map(|s| s.name.clone()).collect()
    }

    /// Image bytes of a picture, by sheet position and picture index
    pub fn picture_image(&self, position: usize, index: usize) -> Option<&[u8]> {
        let picture = self.committed.sheets.get(position)?.pictures.get(index)?;
        Some(&picture.image)
    }

    /// Number of edits waiting for the next sync
    pub fn pending_edits(&self) -> usize {
        self.pending.len()
    }

    /// Number of completed syncs
    pub fn sync_count(&self) -> usize {
        self.syncs
    }

    fn cell_data(&self, position: usize, row: usize, column: usize) -> Option<&CellData> {
        self.committed.sheets.get(position)?.cells.get(&(row, column))
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn find_sheet(&self, id: SheetId) -> Option<&Sheet> {
        self.committed.sheets.iter().find(|s| s.id == id)
    }

    fn find_sheet_by_name(&self, name: &str) -> Option<&Sheet> {
        self.committed
            .sheets
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }

    fn sheet_id_by_name(&self, name: &str) -> Result<SheetId, DocumentError> {
        self.find_sheet_by_name(name)
            .map(|s| s.id)
            .ok_or_else(|| DocumentError::SheetNotFound(name.to_string()))
    }

    fn position_of(&self, id: SheetId) -> Option<usize> {
        self.committed.sheets.iter().position(|s| s.id == id)
    }

    fn sheet(&self, id: SheetId) -> Result<&Sheet, DocumentError> {
        self.find_sheet(id).ok_or(DocumentError::UnknownSheet(id))
    }

    fn sheet_mut(&mut self, id: SheetId) -> Result<&mut Sheet, DocumentError> {
        self.committed
            .sheets
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(DocumentError::UnknownSheet(id))
    }

    fn ensure_unique_sheet_name(&self, name: &str, except: Option<SheetId>) -> Result<(), DocumentError> {
        match self.find_sheet_by_name(name) {
            Some(existing) if Some(existing.id) != except => {
                Err(DocumentError::DuplicateSheetName(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn ensure_unique_table_name(&self, name: &str, except: Option<TableId>) -> Result<(), DocumentError> {
        let taken = self.committed.sheets.iter().flat_map(|s| &s.tables).any(|t| {
            t.name.eq_ignore_ascii_case(name) && Some(t.id) != except
        });
        if taken {
            Err(DocumentError::DuplicateName(name.to_string()))
        } else {
            Ok(())
        }
    }

    // ------------------------------------------------------------------------
    // Applying edits
    // ------------------------------------------------------------------------

    fn apply(&mut self, edit: Edit) -> Result<(), DocumentError> {
        match edit {
            Edit::SetValues { sheet, area, values } => {
                let got_rows = values.len();
                let got_columns = values.first().map_or(0, Vec::len);
                if got_rows != area.rows || values.iter().any(|row| row.len() != area.columns) {
                    return Err(DocumentError::ShapeMismatch {
                        rows: area.rows,
                        columns: area.columns,
                        got_rows,
                        got_columns,
                    });
                }
                let sheet = self.sheet_mut(sheet)?;
                for (r, row) in values.into_iter().enumerate() {
                    for (c, value) in row.into_iter().enumerate() {
                        sheet.update_cell((area.row + r, area.column + c), |data| data.value = value);
                    }
                }
            }
            Edit::Clear { sheet, area, scope } => {
                let sheet = self.sheet_mut(sheet)?;
                let touched = sheet.drain_where(|&(r, c)| area.is_none_or(|a| a.contains(r, c)));
                for (key, data) in touched {
                    let kept = match scope {
                        ClearScope::Contents => data.formats_only(),
                        ClearScope::Formats => CellData {
                            value: data.value,
                            hyperlink: data.hyperlink,
                            ..CellData::default()
                        },
                        ClearScope::All => CellData::default(),
                    };
                    sheet.put_cell(key, kept);
                }
            }
            Edit::SetNumberFormat { sheet, area, format } => {
                let sheet = self.sheet_mut(sheet)?;
                for key in area.cells() {
                    sheet.update_cell(key, |data| data.number_format = Some(format.clone()));
                }
            }
            Edit::SetFill { sheet, area, color } => {
                let sheet = self.sheet_mut(sheet)?;
                for key in area.cells() {
                    sheet.update_cell(key, |data| data.fill = Some(color.clone()));
                }
            }
            Edit::SetHyperlink { sheet, area, hyperlink } => {
                let sheet = self.sheet_mut(sheet)?;
                for key in area.cells() {
                    sheet.update_cell(key, |data| {
                        if data.value.is_empty() {
                            let text = hyperlink.text_to_display.as_deref();
                            data.value = Cell::from(text.unwrap_or(&hyperlink.address));
                        }
                        data.hyperlink = Some(hyperlink.clone());
                    });
                }
            }
            Edit::Autofit { sheet, area, axis } => {
                // No layout to recompute
                self.sheet(sheet)?;
                debug!("Autofit {:?} on {} ignored by in-memory document", axis, area);
            }
            Edit::DeleteRange { sheet, area, shift } => {
                let sheet = self.sheet_mut(sheet)?;
                delete_cells(sheet, area, shift);
            }
            Edit::InsertRange {
                sheet,
                area,
                shift,
                copy_origin,
            } => {
                let sheet = self.sheet_mut(sheet)?;
                insert_cells(sheet, area, shift, copy_origin);
            }
            Edit::CopyRange {
                sheet,
                area,
                destination,
            } => {
                let source = self.sheet(sheet)?;
                let copied: Vec<(CellKey, CellData)> = area
                    .cells()
                    .map(|(r, c)| {
                        let data = source.cells.get(&(r, c)).cloned().unwrap_or_default();
                        ((r - area.row, c - area.column), data)
                    })
                    .collect();
                let target = self.sheet_mut(destination.sheet)?;
                for ((dr, dc), data) in copied {
                    target.put_cell((destination.area.row + dr, destination.area.column + dc), data);
                }
            }
            Edit::AddSheet { position, name } => {
                let name = match name {
                    Some(name) => {
                        self.ensure_unique_sheet_name(&name, None)?;
                        name
                    }
                    None => self.default_sheet_name(),
                };
                let id = SheetId(self.allocate_id());
                let position = position.min(self.committed.sheets.len());
                self.committed.sheets.insert(position, Sheet::new(id, name));
            }
            Edit::RenameSheet { sheet, name } => {
                self.ensure_unique_sheet_name(&name, Some(sheet))?;
                self.sheet_mut(sheet)?.name = name;
            }
            Edit::ActivateSheet { sheet } => {
                self.sheet(sheet)?;
                self.committed.active = sheet;
            }
            Edit::Select { sheet, area } => {
                let name = quote_sheet_name(&self.sheet(sheet)?.name);
                self.committed.active = sheet;
                self.committed.selection = Some(format!("{}!{}", name, area));
            }
            Edit::DeleteSheet { sheet } => {
                let index = self.position_of(sheet).ok_or(DocumentError::UnknownSheet(sheet))?;
                if self.committed.sheets.len() == 1 {
                    return Err(DocumentError::LastSheet);
                }
                self.committed.sheets.remove(index);
                self.committed.names.retain(|n| n.scope != NameScope::Sheet(sheet));
                for name in &mut self.committed.names {
                    if name.refers_to.is_some_and(|r| r.sheet == sheet) {
                        name.refers_to = None;
                    }
                }
                if self.committed.active == sheet {
                    let next = index.min(self.committed.sheets.len() - 1);
                    self.committed.active = self.committed.sheets[next].id;
                }
            }
            Edit::AddName {
                name,
                scope,
                refers_to,
            } => {
                self.sheet(refers_to.sheet)?;
                if let NameScope::Sheet(id) = scope {
                    self.sheet(id)?;
                }
                let exists = self
                    .committed
                    .names
                    .iter()
                    .any(|n| n.scope == scope && n.name.eq_ignore_ascii_case(&name));
                if exists {
                    return Err(DocumentError::DuplicateName(name));
                }
                self.committed.names.push(Name {
                    name,
                    scope,
                    refers_to: Some(refers_to),
                });
            }
            Edit::DeleteName { name, scope } => {
                let index = self
                    .committed
                    .names
                    .iter()
                    .position(|n| n.scope == scope && n.name.eq_ignore_ascii_case(&name))
                    .ok_or_else(|| DocumentError::UnknownName(name.clone()))?;
                self.committed.names.remove(index);
            }
            Edit::AddTable {
                sheet,
                area,
                has_headers,
                style,
                name,
            } => {
                self.sheet(sheet)?;
                let name = match name {
                    Some(name) => {
                        self.ensure_unique_table_name(&name, None)?;
                        name
                    }
                    None => self.default_table_name(),
                };
                let table = Table {
                    id: TableId(self.allocate_id()),
                    name,
                    area,
                    show_headers: has_headers,
                    show_totals: false,
                    style: style.unwrap_or_else(default_table_style),
                    show_filter_button: has_headers,
                };
                self.sheet_mut(sheet)?.tables.push(table);
            }
            Edit::UpdateTable { sheet, table, change } => {
                if let TableChange::Name(name) = &change {
                    self.ensure_unique_table_name(name, Some(table))?;
                }
                let table = self.sheet_mut(sheet)?.table_mut(table)?;
                match change {
                    TableChange::Name(name) => table.name = name,
                    TableChange::ShowHeaders(show) => table.show_headers = show,
                    TableChange::ShowTotals(show) => table.show_totals = show,
                    TableChange::Style(style) => table.style = style,
                    TableChange::ShowFilterButton(show) => table.show_filter_button = show,
                    TableChange::Resize(area) => table.area = area,
                }
            }
            Edit::AddPicture {
                sheet,
                image,
                row,
                column,
                left,
                top,
            } => {
                let id = PictureId(self.allocate_id());
                let sheet = self.sheet_mut(sheet)?;
                let (width, height) = png_size_points(&image).unwrap_or((0.0, 0.0));
                let name = default_picture_name(sheet);
                sheet.pictures.push(Picture {
                    id,
                    name,
                    width,
                    height,
                    left: left + column as f64 * COLUMN_WIDTH_PT,
                    top: top + row as f64 * ROW_HEIGHT_PT,
                    image,
                });
            }
            Edit::UpdatePicture {
                sheet,
                picture,
                change,
            } => {
                let picture = self.sheet_mut(sheet)?.picture_mut(picture)?;
                match change {
                    PictureChange::Name(name) => picture.name = name,
                    PictureChange::Width(width) => picture.width = width,
                    PictureChange::Height(height) => picture.height = height,
                    PictureChange::Image(image) => picture.image = image,
                }
            }
            Edit::DeletePicture { sheet, picture } => {
                let sheet = self.sheet_mut(sheet)?;
                let index = sheet
                    .pictures
                    .iter()
                    .position(|p| p.id == picture)
                    .ok_or(DocumentError::UnknownPicture(picture))?;
                sheet.pictures.remove(index);
            }
        }
        Ok(())
    }

    fn default_sheet_name(&self) -> String {
        (self.committed.sheets.len() + 1..)
            .map(|n| format!("Sheet{}", n))
            .find(|name| self.find_sheet_by_name(name).is_none())
            .unwrap_or_default()
    }

    fn default_table_name(&self) -> String {
        (1..)
            .map(|n| format!("Table{}", n))
            .find(|name| self.ensure_unique_table_name(name, None).is_ok())
            .unwrap_or_default()
    }
}

impl Document for MemoryDocument {
    fn book_name(&self) -> Result<String, DocumentError> {
        Ok(self.committed.name.clone())
    }

    fn sheets(&self) -> Result<Vec<SheetInfo>, DocumentError> {
        Ok(self
            .committed
            .sheets
            .iter()
            .map(|s| SheetInfo {
                id: s.id,
                name: s.name.clone(),
            })
            .collect())
    }

    fn active_sheet(&self) -> Result<SheetId, DocumentError> {
        Ok(self.committed.active)
    }

    fn selection(&self) -> Result<Option<String>, DocumentError> {
        Ok(self.committed.selection.clone())
    }

    fn used_range(&self, sheet: SheetId) -> Result<Option<CellArea>, DocumentError> {
        let sheet = self.sheet(sheet)?;
        let mut keys = sheet.cells.keys();
        let Some(&(first_row, first_column)) = keys.next() else {
            return Ok(None);
        };
        let (mut top, mut left, mut bottom, mut right) = (first_row, first_column, first_row, first_column);
        for &(r, c) in keys {
            top = top.min(r);
            left = left.min(c);
            bottom = bottom.max(r);
            right = right.max(c);
        }
        Ok(Some(CellArea::new(top, left, bottom - top + 1, right - left + 1)))
    }

    fn read_range(&self, sheet: SheetId, area: CellArea) -> Result<RangeContents, DocumentError> {
        let sheet = self.sheet(sheet)?;
        let mut contents = RangeContents::default();
        for r in area.row..area.row + area.rows {
            let mut values = Vec::with_capacity(area.columns);
            let mut categories = Vec::with_capacity(area.columns);
            for c in area.column..area.column + area.columns {
                match sheet.cells.get(&(r, c)) {
                    Some(data) => {
                        values.push(data.value.clone());
                        categories.push(
                            data.number_format
                                .as_deref()
                                .map_or(FormatCategory::General, FormatCategory::from_format),
                        );
                    }
                    None => {
                        values.push(Cell::Empty);
                        categories.push(FormatCategory::General);
                    }
                }
            }
            contents.values.push(values);
            contents.categories.push(categories);
        }
        Ok(contents)
    }

    fn names(&self) -> Result<Vec<NamedItem>, DocumentError> {
        Ok(self
            .committed
            .names
            .iter()
            .map(|n| NamedItem {
                name: n.name.clone(),
                scope: n.scope,
                refers_to: n.refers_to,
            })
            .collect())
    }

    fn tables(&self, sheet: SheetId) -> Result<Vec<TableInfo>, DocumentError> {
        Ok(self
            .sheet(sheet)?
            .tables
            .iter()
            .map(|t| TableInfo {
                id: t.id,
                name: t.name.clone(),
                area: t.area,
                show_headers: t.show_headers,
                show_totals: t.show_totals,
                style: t.style.clone(),
                show_filter_button: t.show_filter_button,
            })
            .collect())
    }

    fn pictures(&self, sheet: SheetId) -> Result<Vec<PictureInfo>, DocumentError> {
        Ok(self
            .sheet(sheet)?
            .pictures
            .iter()
            .map(|p| PictureInfo {
                id: p.id,
                name: p.name.clone(),
                width: p.width,
                height: p.height,
                left: p.left,
                top: p.top,
            })
            .collect())
    }

    fn enqueue(&mut self, edit: Edit) -> Result<(), DocumentError> {
        self.pending.push(edit);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), DocumentError> {
        // A failed edit discards the rest of the batch
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for edit in pending {
            self.apply(edit)?;
        }
        self.syncs += 1;
        if count > 0 {
            debug!("Synced {} edits", count);
        }
        Ok(())
    }
}

fn delete_cells(sheet: &mut Sheet, area: CellArea, shift: DeleteShift) {
    let moved = match shift {
        DeleteShift::Up => sheet.drain_where(|&(r, c)| {
            r >= area.row && c >= area.column && c <= area.last_column()
        }),
        DeleteShift::Left => sheet.drain_where(|&(r, c)| {
            c >= area.column && r >= area.row && r <= area.last_row()
        }),
    };
    for ((r, c), data) in moved {
        if area.contains(r, c) {
            continue;
        }
        let key = match shift {
            DeleteShift::Up => (r - area.rows, c),
            DeleteShift::Left => (r, c - area.columns),
        };
        sheet.put_cell(key, data);
    }
}

fn insert_cells(sheet: &mut Sheet, area: CellArea, shift: InsertShift, copy_origin: Option<CopyOrigin>) {
    let moved = match shift {
        InsertShift::Down => sheet.drain_where(|&(r, c)| {
            r >= area.row && c >= area.column && c <= area.last_column()
        }),
        InsertShift::Right => sheet.drain_where(|&(r, c)| {
            c >= area.column && r >= area.row && r <= area.last_row()
        }),
    };
    for ((r, c), data) in moved {
        let key = match shift {
            InsertShift::Down => (r + area.rows, c),
            InsertShift::Right => (r, c + area.columns),
        };
        if key.0 < super::MAX_ROWS && key.1 < super::MAX_COLUMNS {
            sheet.put_cell(key, data);
        }
    }

    let Some(origin) = copy_origin else {
        return;
    };
    // Source row/column for formats, in post-shift coordinates
    let source = |r: usize, c: usize| -> Option<CellKey> {
        match (shift, origin) {
            (InsertShift::Down, CopyOrigin::FormatFromLeftOrAbove) => {
                area.row.checked_sub(1).map(|above| (above, c))
            }
            (InsertShift::Down, CopyOrigin::FormatFromRightOrBelow) => Some((area.row + area.rows, c)),
            (InsertShift::Right, CopyOrigin::FormatFromLeftOrAbove) => {
                area.column.checked_sub(1).map(|left| (r, left))
            }
            (InsertShift::Right, CopyOrigin::FormatFromRightOrBelow) => {
                Some((r, area.column + area.columns))
            }
        }
    };
    for (r, c) in area.cells() {
        let formats = source(r, c)
            .and_then(|key| sheet.cells.get(&key))
            .map(CellData::formats_only);
        if let Some(formats) = formats {
            sheet.put_cell((r, c), formats);
        }
    }
}

fn default_picture_name(sheet: &Sheet) -> String {
    (sheet.pictures.len() + 1..)
        .map(|n| format!("Picture {}", n))
        .find(|name| !sheet.pictures.iter().any(|p| &p.name == name))
        .unwrap_or_default()
}

/// Pixel size of a PNG image, converted to points
fn png_size_points(image: &[u8]) -> Option<(f64, f64)> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if image.len() < 24 || &image[..8] != SIGNATURE || &image[12..16] != b"IHDR" {
        return None;
    }
    let width = u32::from_be_bytes(image[16..20].try_into().ok()?);
    let height = u32::from_be_bytes(image[20..24].try_into().ok()?);
    Some((width as f64 * 0.75, height as f64 * 0.75))
}

fn quote_sheet_name(name: &str) -> String {
    if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        name.to_string()
    } else {
        format!("'{}'", name.replace('\'', "''"))
    }
}

fn sheet_to_file(sheet: &Sheet) -> SheetFile {
    let (rows, columns) = sheet
        .cells
        .iter()
        .filter(|(_, data)| !data.value.is_empty())
        .fold((0, 0), |(rows, columns), (&(r, c), _)| (rows.max(r + 1), columns.max(c + 1)));

    let mut values = vec![vec![Cell::Empty; columns]; rows];
    let mut file = SheetFile {
        name: sheet.name.clone(),
        ..SheetFile::default()
    };
    for (&(r, c), data) in &sheet.cells {
        let address = CellArea::cell(r, c).to_a1();
        if !data.value.is_empty() {
            values[r][c] = data.value.clone();
        }
        if let Some(format) = &data.number_format {
            file.formats.insert(address.clone(), format.clone());
        }
        if let Some(fill) = &data.fill {
            file.fills.insert(address.clone(), fill.clone());
        }
        if let Some(hyperlink) = &data.hyperlink {
            file.hyperlinks.insert(address, hyperlink.clone());
        }
    }
    file.values = values;
    file.tables = sheet
        .tables
        .iter()
        .map(|t| TableFile {
            name: t.name.clone(),
            range: t.area.to_a1(),
            show_headers: t.show_headers,
            show_totals: t.show_totals,
            style: t.style.clone(),
            show_filter_button: t.show_filter_button,
        })
        .collect();
    file.pictures = sheet
        .pictures
        .iter()
        .map(|p| PictureFile {
            name: p.name.clone(),
            width: p.width,
            height: p.height,
            left: p.left,
            top: p.top,
            image: STANDARD.encode(&p.image),
        })
        .collect();
    file
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet_id(doc: &MemoryDocument, position: usize) -> SheetId {
        doc.sheet_at(position).unwrap().id
    }

    #[test]
    fn test_edits_wait_for_sync() {
        let mut doc = MemoryDocument::new("Book1");
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::SetValues {
            sheet,
            area: CellArea::cell(0, 0),
            values: vec![vec![Cell::Number(5.0)]],
        })
        .unwrap();

        assert_eq!(doc.value(0, 0, 0), Cell::Empty);
        assert_eq!(doc.pending_edits(), 1);

        doc.sync().unwrap();
        assert_eq!(doc.value(0, 0, 0), Cell::Number(5.0));
        assert_eq!(doc.pending_edits(), 0);
        assert_eq!(doc.sync_count(), 1);
    }

    #[test]
    fn test_ordinal_reads_are_stale_until_sync() {
        let mut doc = MemoryDocument::new("Book1");
        doc.enqueue(Edit::AddSheet {
            position: 0,
            name: Some("New".into()),
        })
        .unwrap();
        assert_eq!(doc.sheet_at(0).unwrap().name, "Sheet1");

        doc.sync().unwrap();
        assert_eq!(doc.sheet_at(0).unwrap().name, "New");
        assert_eq!(doc.sheet_names(), vec!["New", "Sheet1"]);
    }

    #[test]
    fn test_failed_edit_discards_batch() {
        let mut doc = MemoryDocument::new("Book1");
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::SetValues {
            sheet,
            area: CellArea::new(0, 0, 2, 1),
            values: vec![vec![Cell::Number(1.0)]],
        })
        .unwrap();
        doc.enqueue(Edit::RenameSheet {
            sheet,
            name: "Renamed".into(),
        })
        .unwrap();

        let err = doc.sync().unwrap_err();
        assert!(matches!(err, DocumentError::ShapeMismatch { .. }));
        assert_eq!(doc.pending_edits(), 0);
        assert_eq!(doc.sheet_names(), vec!["Sheet1"]);
    }

    #[test]
    fn test_used_range() {
        let mut doc = MemoryDocument::new("Book1");
        let sheet = sheet_id(&doc, 0);
        assert_eq!(doc.used_range(sheet).unwrap(), None);

        doc.enqueue(Edit::SetValues {
            sheet,
            area: CellArea::parse("B2:C3").unwrap(),
            values: vec![vec![1.into(), 2.into()], vec![3.into(), 4.into()]],
        })
        .unwrap();
        doc.sync().unwrap();
        assert_eq!(doc.used_range(sheet).unwrap().unwrap().to_a1(), "B2:C3");
    }

    #[test]
    fn test_clear_contents_keeps_formats() {
        let json = r##"{
            "name": "Book1",
            "sheets": [{
                "name": "Sheet1",
                "values": [[1, 2]],
                "formats": { "A1": "0.00" },
                "fills": { "B1": "#FF0000" }
            }]
        }"##;
        let mut doc = MemoryDocument::from_json(json).unwrap();
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::Clear {
            sheet,
            area: Some(CellArea::parse("A1:B1").unwrap()),
            scope: ClearScope::Contents,
        })
        .unwrap();
        doc.sync().unwrap();

        assert_eq!(doc.value(0, 0, 0), Cell::Empty);
        assert_eq!(doc.number_format(0, 0, 0).as_deref(), Some("0.00"));
        assert_eq!(doc.fill(0, 0, 1).as_deref(), Some("#FF0000"));
    }

    #[test]
    fn test_delete_range_shifts_up() {
        let json = r#"{
            "name": "Book1",
            "sheets": [{ "name": "Sheet1", "values": [[1, "x"], [2, "y"], [3, "z"]] }]
        }"#;
        let mut doc = MemoryDocument::from_json(json).unwrap();
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::DeleteRange {
            sheet,
            area: CellArea::parse("A1").unwrap(),
            shift: DeleteShift::Up,
        })
        .unwrap();
        doc.sync().unwrap();

        assert_eq!(doc.value(0, 0, 0), Cell::Number(2.0));
        assert_eq!(doc.value(0, 1, 0), Cell::Number(3.0));
        assert_eq!(doc.value(0, 2, 0), Cell::Empty);
        // Column B is untouched
        assert_eq!(doc.value(0, 0, 1), Cell::from("x"));
    }

    #[test]
    fn test_insert_range_copies_formats_from_above() {
        let json = r##"{
            "name": "Book1",
            "sheets": [{ "name": "Sheet1", "values": [[1], [2]], "fills": { "A1": "#00FF00" } }]
        }"##;
        let mut doc = MemoryDocument::from_json(json).unwrap();
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::InsertRange {
            sheet,
            area: CellArea::parse("A2").unwrap(),
            shift: InsertShift::Down,
            copy_origin: Some(CopyOrigin::FormatFromLeftOrAbove),
        })
        .unwrap();
        doc.sync().unwrap();

        assert_eq!(doc.value(0, 1, 0), Cell::Empty);
        assert_eq!(doc.fill(0, 1, 0).as_deref(), Some("#00FF00"));
        assert_eq!(doc.value(0, 2, 0), Cell::Number(2.0));
    }

    #[test]
    fn test_delete_sheet_rebinds_active_and_names() {
        let json = r#"{
            "name": "Book1",
            "active_sheet": 1,
            "sheets": [{ "name": "A" }, { "name": "B" }],
            "names": [
                { "name": "Local", "refers_to": "B!A1", "scope": "B" },
                { "name": "Global", "refers_to": "B!A1:A3" }
            ]
        }"#;
        let mut doc = MemoryDocument::from_json(json).unwrap();
        let b = sheet_id(&doc, 1);
        doc.enqueue(Edit::DeleteSheet { sheet: b }).unwrap();
        doc.sync().unwrap();

        assert_eq!(doc.sheet_names(), vec!["A"]);
        assert_eq!(doc.active_sheet().unwrap(), sheet_id(&doc, 0));
        let names = doc.names().unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].name, "Global");
        assert_eq!(names[0].refers_to, None);
    }

    #[test]
    fn test_cannot_delete_last_sheet() {
        let mut doc = MemoryDocument::new("Book1");
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::DeleteSheet { sheet }).unwrap();
        assert_eq!(doc.sync().unwrap_err(), DocumentError::LastSheet);
    }

    #[test]
    fn test_duplicate_sheet_name_rejected() {
        let mut doc = MemoryDocument::with_sheets("Book1", &["Data"]);
        doc.enqueue(Edit::AddSheet {
            position: 1,
            name: Some("data".into()),
        })
        .unwrap();
        assert!(matches!(doc.sync(), Err(DocumentError::DuplicateSheetName(_))));
    }

    #[test]
    fn test_default_names() {
        let mut doc = MemoryDocument::new("Book1");
        let sheet = sheet_id(&doc, 0);
        doc.enqueue(Edit::AddSheet { position: 5, name: None }).unwrap();
        doc.enqueue(Edit::AddTable {
            sheet,
            area: CellArea::parse("A1:B3").unwrap(),
            has_headers: true,
            style: None,
            name: None,
        })
        .unwrap();
        doc.sync().unwrap();

        assert_eq!(doc.sheet_names(), vec!["Sheet1", "Sheet2"]);
        let tables = doc.tables(sheet).unwrap();
        assert_eq!(tables[0].name, "Table1");
        assert_eq!(tables[0].style, DEFAULT_TABLE_STYLE);
    }

    #[test]
    fn test_png_dimensions() {
        let mut png = b"\x89PNG\r\n\x1a\n\x00\x00\x00\x0dIHDR".to_vec();
        png.extend_from_slice(&200u32.to_be_bytes());
        png.extend_from_slice(&100u32.to_be_bytes());
        assert_eq!(png_size_points(&png), Some((150.0, 75.0)));
        assert_eq!(png_size_points(b"GIF89a"), None);
    }

    #[test]
    fn test_file_round_trip() {
        let json = r#"{
            "name": "Report.xlsx",
            "active_sheet": 1,
            "selection": "B2",
            "sheets": [
                {
                    "name": "Data",
                    "values": [["Name", "Amount"], ["a", 1]],
                    "formats": { "B2": "0.00" },
                    "tables": [{ "name": "Amounts", "range": "A1:B2" }]
                },
                { "name": "My Sheet" }
            ],
            "names": [{ "name": "Amount", "refers_to": "'My Sheet'!A1", "scope": "Data" }]
        }"#;
        let doc = MemoryDocument::from_json(json).unwrap();
        let file = doc.to_file();

        assert_eq!(file.name, "Report.xlsx");
        assert_eq!(file.active_sheet, 1);
        assert_eq!(file.sheets[0].values[1][1], Cell::Number(1.0));
        assert_eq!(file.sheets[0].formats.get("B2").map(String::as_str), Some("0.00"));
        assert_eq!(file.sheets[0].tables[0].range, "A1:B2");
        assert_eq!(file.names[0].refers_to, "'My Sheet'!A1");
        assert_eq!(file.names[0].scope.as_deref(), Some("Data"));

        let reloaded = MemoryDocument::from_file(file.clone()).unwrap();
        assert_eq!(reloaded.to_file(), file);
    }

    #[test]
    fn test_invalid_workbook_json() {
        assert!(matches!(
            MemoryDocument::from_json("{ not json"),
            Err(DocumentError::InvalidWorkbook(_))
        ));
        assert!(matches!(
            MemoryDocument::from_json(r#"{"name": "Empty", "sheets": []}"#),
            Err(DocumentError::LastSheet)
        ));
    }
}
