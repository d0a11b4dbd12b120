//! Action dispatcher
//!
//! Replays engine commands against a [`Document`], strictly in order.
//! Each action is parsed only when its turn comes, so an unknown command
//! aborts the replay with everything after it left unapplied.
//!
//! Ordinals (sheet position, table index, picture index) are resolved
//! against the document's synced state, so every command is synced before
//! the next one is parsed. Actions applied before a failing one stay applied.

use log::{debug, info};
use std::time::Instant;

use super::command::{Command, PictureUpdate, RangeTarget, TableUpdate};
use super::registry::Registry;
use crate::dates;
use crate::dialog::{AlertDialog, AlertRequest};
use crate::document::{
    CellArea, Document, DocumentError, Edit, Hyperlink, NameScope, PictureChange, RangeRef, SheetId,
    SheetInfo, TableChange, parse_reference,
};
use crate::error::{RemoteError, Result};
use crate::models::{Action, Cell};

/// Outcome of a replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub actions_applied: usize,
    /// Syncs forced by structural commands
    pub barriers: usize,
    pub duration_ms: u64,
}

/// What a macro gets to work with
pub struct MacroContext<'a> {
    pub document: &'a mut dyn Document,
    pub dispatcher: &'a Dispatcher,
}

impl MacroContext<'_> {
    /// Replay further actions against the same document
    pub fn run(&mut self, actions: Vec<Action>) -> Result<ReplayStats> {
        self.dispatcher.replay(&mut *self.document, actions)
    }
}

#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: Registry,
    alerts: Option<AlertDialog>,
}

impl Dispatcher {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: AlertDialog) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn alerts(&self) -> Option<&AlertDialog> {
        self.alerts.as_ref()
    }

    /// Apply `actions` in order
    pub fn replay(&self, doc: &mut dyn Document, actions: Vec<Action>) -> Result<ReplayStats> {
        let started = Instant::now();
        let mut stats = ReplayStats::default();

        for action in actions {
            let func = action.func.clone();
            let command = Command::try_from(action)?;
            debug!("Applying {}", func);
            if self.execute(doc, command)? {
                stats.barriers += 1;
            }
            stats.actions_applied += 1;
        }

        stats.duration_ms = started.elapsed().as_millis() as u64;
        Ok(stats)
    }

    /// Run one command and sync it
    ///
    /// Returns whether the command changed an ordinal collection (sheets,
    /// tables, pictures), i.e. whether the sync was a structural barrier.
    pub fn execute(&self, doc: &mut dyn Document, command: Command) -> Result<bool> {
        let structural = command.is_structural();
        self.apply(doc, command)?;
        doc.sync()?;
        Ok(structural)
    }

    fn apply(&self, doc: &mut dyn Document, command: Command) -> Result<()> {
        match command {
            Command::SetValues { target, values } => {
                let sheet = resolve_sheet(doc, target.sheet_position)?;
                let (values, date_cells) = values_for_write(values);
                doc.enqueue(Edit::SetValues {
                    sheet: sheet.id,
                    area: target.area,
                    values,
                })?;
                for (r, c, format) in date_cells {
                    doc.enqueue(Edit::SetNumberFormat {
                        sheet: sheet.id,
                        area: CellArea::cell(target.area.row + r, target.area.column + c),
                        format: format.to_string(),
                    })?;
                }
            }
            Command::ClearRange { target, scope } => {
                let sheet = resolve_sheet(doc, target.sheet_position)?;
                doc.enqueue(Edit::Clear {
                    sheet: sheet.id,
                    area: Some(target.area),
                    scope,
                })?;
            }
            Command::AddSheet { position, name } => {
                doc.enqueue(Edit::AddSheet { position, name })?;
            }
            Command::SetSheetName { sheet_position, name } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                doc.enqueue(Edit::RenameSheet { sheet: sheet.id, name })?;
            }
            Command::ActivateSheet { position } => {
                let sheet = resolve_sheet(doc, position)?;
                doc.enqueue(Edit::ActivateSheet { sheet: sheet.id })?;
            }
            Command::DeleteSheet { sheet_position } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                doc.enqueue(Edit::DeleteSheet { sheet: sheet.id })?;
            }
            Command::ClearSheet { sheet_position, scope } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                doc.enqueue(Edit::Clear {
                    sheet: sheet.id,
                    area: None,
                    scope,
                })?;
            }
            Command::Autofit { target, axis } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::Autofit { sheet, area, axis })?;
            }
            Command::SetRangeColor { target, color } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::SetFill { sheet, area, color })?;
            }
            Command::AddHyperlink {
                target,
                address,
                text_to_display,
                screen_tip,
            } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::SetHyperlink {
                    sheet,
                    area,
                    hyperlink: Hyperlink {
                        address,
                        text_to_display,
                        screen_tip,
                    },
                })?;
            }
            Command::SetNumberFormat { target, format } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::SetNumberFormat { sheet, area, format })?;
            }
            Command::SetRangeName { target, name } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::AddName {
                    name,
                    scope: NameScope::Book,
                    refers_to: RangeRef { sheet, area },
                })?;
            }
            Command::AddName {
                sheet_position,
                name,
                refers_to,
            } => {
                let scope_sheet = sheet_position.map(|p| resolve_sheet(doc, p)).transpose()?;
                let (sheet_name, area) = parse_reference(&refers_to)?;
                let target_sheet = match (sheet_name, &scope_sheet) {
                    (Some(sheet_name), _) => doc
                        .sheet_named(&sheet_name)?
                        .ok_or(DocumentError::SheetNotFound(sheet_name))?,
                    (None, Some(scope_sheet)) => scope_sheet.clone(),
                    (None, None) => {
                        let active = doc.active_sheet()?;
                        doc.sheets()?
                            .into_iter()
                            .find(|s| s.id == active)
                            .ok_or(DocumentError::UnknownSheet(active))?
                    }
                };
                doc.enqueue(Edit::AddName {
                    name,
                    scope: scope_sheet.map_or(NameScope::Book, |s| NameScope::Sheet(s.id)),
                    refers_to: RangeRef {
                        sheet: target_sheet.id,
                        area,
                    },
                })?;
            }
            Command::DeleteName {
                name,
                book_scope,
                scope_sheet_index,
            } => {
                let scope = if book_scope {
                    NameScope::Book
                } else {
                    let index = scope_sheet_index.ok_or_else(|| {
                        RemoteError::invalid_action("nameDelete", "missing scope sheet index")
                    })?;
                    NameScope::Sheet(resolve_sheet(doc, index)?.id)
                };
                doc.enqueue(Edit::DeleteName { name, scope })?;
            }
            Command::CopyRange {
                target,
                destination_sheet,
                destination,
            } => {
                let (sheet, area) = resolve_range(doc, target)?;
                let destination_sheet = resolve_sheet(doc, destination_sheet)?;
                doc.enqueue(Edit::CopyRange {
                    sheet,
                    area,
                    destination: RangeRef {
                        sheet: destination_sheet.id,
                        area: destination,
                    },
                })?;
            }
            Command::DeleteRange { target, shift } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::DeleteRange { sheet, area, shift })?;
            }
            Command::InsertRange {
                target,
                shift,
                copy_origin,
            } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::InsertRange {
                    sheet,
                    area,
                    shift,
                    copy_origin,
                })?;
            }
            Command::SelectRange { target } => {
                let (sheet, area) = resolve_range(doc, target)?;
                doc.enqueue(Edit::Select { sheet, area })?;
            }
            Command::AddTable {
                sheet_position,
                area,
                has_headers,
                style,
                name,
            } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                doc.enqueue(Edit::AddTable {
                    sheet: sheet.id,
                    area,
                    has_headers,
                    style,
                    name,
                })?;
            }
            Command::UpdateTable {
                sheet_position,
                index,
                update,
            } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                let table = doc.table_at(&sheet, index)?;
                let change = match update {
                    TableUpdate::Name(name) => TableChange::Name(name),
                    TableUpdate::ShowHeaders(show) => TableChange::ShowHeaders(show),
                    TableUpdate::ShowTotals(show) => TableChange::ShowTotals(show),
                    TableUpdate::Style(style) => TableChange::Style(style),
                    TableUpdate::ShowAutofilter(show) => TableChange::ShowFilterButton(show),
                    TableUpdate::Resize(area) => TableChange::Resize(area),
                };
                doc.enqueue(Edit::UpdateTable {
                    sheet: sheet.id,
                    table: table.id,
                    change,
                })?;
            }
            Command::AddPicture {
                sheet_position,
                image,
                column,
                row,
                left,
                top,
            } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                doc.enqueue(Edit::AddPicture {
                    sheet: sheet.id,
                    image,
                    row,
                    column,
                    left,
                    top,
                })?;
            }
            Command::UpdatePicture {
                sheet_position,
                index,
                image,
                name,
                width,
                height,
            } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                let picture = doc.picture_at(&sheet, index)?;
                let mut changes = vec![PictureChange::Image(image)];
                changes.extend(name.map(PictureChange::Name));
                changes.extend(width.map(PictureChange::Width));
                changes.extend(height.map(PictureChange::Height));
                for change in changes {
                    doc.enqueue(Edit::UpdatePicture {
                        sheet: sheet.id,
                        picture: picture.id,
                        change,
                    })?;
                }
            }
            Command::SetPictureProperty {
                sheet_position,
                index,
                update,
            } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                let picture = doc.picture_at(&sheet, index)?;
                let change = match update {
                    PictureUpdate::Name(name) => PictureChange::Name(name),
                    PictureUpdate::Width(width) => PictureChange::Width(width),
                    PictureUpdate::Height(height) => PictureChange::Height(height),
                };
                doc.enqueue(Edit::UpdatePicture {
                    sheet: sheet.id,
                    picture: picture.id,
                    change,
                })?;
            }
            Command::DeletePicture { sheet_position, index } => {
                let sheet = resolve_sheet(doc, sheet_position)?;
                let picture = doc.picture_at(&sheet, index)?;
                doc.enqueue(Edit::DeletePicture {
                    sheet: sheet.id,
                    picture: picture.id,
                })?;
            }
            Command::Alert(request) => self.alert(&request)?,
            Command::RunMacro { name, args } => {
                let f = self.registry.get_macro(&name)?;
                info!("Running macro '{}'", name);
                let mut ctx = MacroContext {
                    document: doc,
                    dispatcher: self,
                };
                f(&mut ctx, &args)?;
            }
        }
        Ok(())
    }

    fn alert(&self, request: &AlertRequest) -> Result<()> {
        match &self.alerts {
            Some(alerts) => alerts.show(request),
            None => {
                info!("Alert '{}': {}", request.title, request.prompt);
                Ok(())
            }
        }
    }
}

fn resolve_sheet(doc: &dyn Document, position: usize) -> Result<SheetInfo> {
    Ok(doc.sheet_at(position)?)
}

fn resolve_range(doc: &dyn Document, target: RangeTarget) -> Result<(SheetId, CellArea)> {
    let sheet = resolve_sheet(doc, target.sheet_position)?;
    Ok((sheet.id, target.area))
}

/// ISO datetime strings become serial numbers. Returns the converted values
/// and, per converted cell, the number format to apply.
fn values_for_write(values: Vec<Vec<Cell>>) -> (Vec<Vec<Cell>>, Vec<(usize, usize, &'static str)>) {
    let mut date_cells = Vec::new();
    let mut converted = Vec::with_capacity(values.len());
    for (r, row) in values.into_iter().enumerate() {
        let mut out = Vec::with_capacity(row.len());
        for (c, cell) in row.into_iter().enumerate() {
            let parsed = match &cell {
                Cell::Text(s) if dates::looks_like_iso_datetime(s) => dates::parse_iso(s),
                _ => None,
            };
            match parsed {
                Some(dt) => {
                    let format = if dates::has_time_component(&dt) {
                        dates::DATETIME_FORMAT
                    } else {
                        dates::DATE_FORMAT
                    };
                    date_cells.push((r, c, format));
                    out.push(Cell::Number(dates::datetime_to_serial(&dt)));
                }
                None => out.push(cell),
            }
        }
        converted.push(out);
    }
    (converted, date_cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;

    fn replay(doc: &mut MemoryDocument, actions: Vec<Action>) -> Result<ReplayStats> {
        Dispatcher::default().replay(doc, actions)
    }

    #[test]
    fn test_set_values_on_blank_sheet() {
        let mut doc = MemoryDocument::new("Book1");
        let stats = replay(
            &mut doc,
            vec![Action::new("setValues").sheet(0).range(0, 0, 1, 1).values(vec![vec![5.into()]])],
        )
        .unwrap();
        assert_eq!(doc.value(0, 0, 0), Cell::Number(5.0));
        assert_eq!(stats.actions_applied, 1);
        assert_eq!(stats.barriers, 0);
    }

    #[test]
    fn test_iso_strings_written_as_dates() {
        let mut doc = MemoryDocument::new("Book1");
        replay(
            &mut doc,
            vec![Action::new("setValues").sheet(0).range(0, 0, 1, 3).values(vec![vec![
                "2022-01-01T00:00:00.000Z".into(),
                "2022-01-01T12:00:00.000Z".into(),
                "Total".into(),
            ]])],
        )
        .unwrap();

        assert_eq!(doc.value(0, 0, 0), Cell::Number(44562.0));
        assert_eq!(doc.number_format(0, 0, 0).as_deref(), Some(dates::DATE_FORMAT));
        assert_eq!(doc.value(0, 0, 1), Cell::Number(44562.5));
        assert_eq!(doc.number_format(0, 0, 1).as_deref(), Some(dates::DATETIME_FORMAT));
        assert_eq!(doc.value(0, 0, 2), Cell::from("Total"));
        assert_eq!(doc.number_format(0, 0, 2), None);
    }

    #[test]
    fn test_structural_barrier_before_next_resolution() {
        let mut doc = MemoryDocument::new("Book1");
        let stats = replay(
            &mut doc,
            vec![
                Action::new("addSheet").args([Cell::Number(0.0), Cell::from("New")]),
                Action::new("setSheetName").sheet(0).arg("Renamed"),
            ],
        )
        .unwrap();

        assert_eq!(doc.sheet_names(), vec!["Renamed", "Sheet1"]);
        assert_eq!(stats.barriers, 1);
    }

    #[test]
    fn test_unknown_action_stops_replay() {
        let mut doc = MemoryDocument::new("Book1");
        let err = replay(
            &mut doc,
            vec![
                Action::new("setValues").sheet(0).range(0, 0, 1, 1).values(vec![vec![1.into()]]),
                Action::new("doesNotExist"),
                Action::new("setValues").sheet(0).range(1, 0, 1, 1).values(vec![vec![2.into()]]),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, RemoteError::UnknownAction(_)));
        assert_eq!(doc.value(0, 0, 0), Cell::Number(1.0));
        assert_eq!(doc.value(0, 1, 0), Cell::Empty);
    }

    #[test]
    fn test_rename_visible_to_next_lookup() {
        let mut doc = MemoryDocument::new("Book1");
        let stats = replay(
            &mut doc,
            vec![
                Action::new("setSheetName").sheet(0).args(["Data"]),
                Action::new("namesAdd").args(["Total", "=Data!A1"]),
            ],
        )
        .unwrap();

        assert_eq!(stats.barriers, 0);
        let names = doc.names().unwrap();
        assert_eq!(names[0].name, "Total");
        assert_eq!(names[0].refers_to.unwrap().sheet, doc.sheet_at(0).unwrap().id);
    }

    #[test]
    fn test_activation_visible_to_next_lookup() {
        let mut doc = MemoryDocument::with_sheets("Book1", &["A", "B"]);
        replay(
            &mut doc,
            vec![
                Action::new("activateSheet").args([1]),
                Action::new("namesAdd").args(["N", "=$A$1"]),
            ],
        )
        .unwrap();

        let names = doc.names().unwrap();
        assert_eq!(names[0].refers_to.unwrap().sheet, doc.sheet_at(1).unwrap().id);
    }

    #[test]
    fn test_actions_before_failure_stay_applied() {
        let mut doc = MemoryDocument::new("Book1");
        let err = replay(
            &mut doc,
            vec![
                Action::new("setSheetName").sheet(0).args(["Renamed"]),
                Action::new("doesNotExist"),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, RemoteError::UnknownAction(_)));
        assert_eq!(doc.sheet_names(), vec!["Renamed"]);
        assert_eq!(doc.pending_edits(), 0);
    }

    #[test]
    fn test_tables_addressed_by_index_after_add() {
        let mut doc = MemoryDocument::new("Book1");
        replay(
            &mut doc,
            vec![
                Action::new("addTable").sheet(0).args([Cell::from("A1:B3"), Cell::Bool(true), Cell::Empty, Cell::Empty]),
                Action::new("setTableName").sheet(0).args([Cell::Number(0.0), Cell::from("Sales")]),
                Action::new("showTotalsTable").sheet(0).args([Cell::Number(0.0), Cell::Bool(true)]),
            ],
        )
        .unwrap();

        let sheet = doc.sheet_at(0).unwrap();
        let table = doc.table_at(&sheet, 0).unwrap();
        assert_eq!(table.name, "Sales");
        assert!(table.show_totals);
    }

    #[test]
    fn test_picture_lifecycle() {
        let mut doc = MemoryDocument::new("Book1");
        replay(
            &mut doc,
            vec![
                Action::new("addPicture").sheet(0).args([Cell::from("aGVsbG8="), 0.into(), 0.into(), 0.into(), 0.into()]),
                Action::new("setPictureName").sheet(0).args([Cell::Number(0.0), Cell::from("Logo")]),
                Action::new("setPictureWidth").sheet(0).args([0.0, 120.0]),
            ],
        )
        .unwrap();

        let sheet = doc.sheet_at(0).unwrap();
        let picture = doc.picture_at(&sheet, 0).unwrap();
        assert_eq!(picture.name, "Logo");
        assert_eq!(picture.width, 120.0);
        assert_eq!(doc.picture_image(0, 0), Some(&b"hello"[..]));

        replay(&mut doc, vec![Action::new("deletePicture").sheet(0).arg(0)]).unwrap();
        assert!(doc.pictures(sheet.id).unwrap().is_empty());
    }

    #[test]
    fn test_names_add_and_delete() {
        let mut doc = MemoryDocument::with_sheets("Book1", &["Data", "Other"]);
        replay(
            &mut doc,
            vec![
                Action::new("namesAdd").args(["Total", "=Data!$B$2"]),
                Action::new("namesAdd").sheet(1).args(["Local", "=Data!A1:A3"]),
                Action::new("setRangeName").sheet(1).range(0, 0, 2, 2).arg("Block"),
            ],
        )
        .unwrap();
        assert_eq!(doc.names().unwrap().len(), 3);

        replay(
            &mut doc,
            vec![Action::new("nameDelete").args([
                Cell::from("Other!Local"),
                Cell::from("=Data!$A$1:$A$3"),
                Cell::from("Local"),
                Cell::Number(0.0),
                Cell::Bool(false),
                Cell::Number(1.0),
            ])],
        )
        .unwrap();
        let names: Vec<String> = doc.names().unwrap().into_iter().map(|n| n.name).collect();
        assert_eq!(names, vec!["Total", "Block"]);
    }

    #[test]
    fn test_run_macro_reenters_dispatcher() {
        fn fill_header(ctx: &mut MacroContext<'_>, args: &[Cell]) -> Result<()> {
            let title = args.first().cloned().unwrap_or_default();
            ctx.run(vec![Action::new("setValues").sheet(0).range(0, 0, 1, 1).values(vec![vec![title]])])?;
            Ok(())
        }

        let mut registry = Registry::new();
        crate::register_macro!(registry, fill_header);
        let dispatcher = Dispatcher::new(registry);

        let mut doc = MemoryDocument::new("Book1");
        dispatcher
            .replay(&mut doc, vec![Action::new("runMacro").args(["fill_header", "Report"])])
            .unwrap();
        assert_eq!(doc.value(0, 0, 0), Cell::from("Report"));
    }

    #[test]
    fn test_unregistered_macro() {
        let mut doc = MemoryDocument::new("Book1");
        let err = replay(&mut doc, vec![Action::new("runMacro").arg("missing")]).unwrap_err();
        assert!(matches!(err, RemoteError::UnregisteredCallback(name) if name == "missing"));
    }

    #[test]
    fn test_sheet_out_of_range() {
        let mut doc = MemoryDocument::new("Book1");
        let err = replay(&mut doc, vec![Action::new("sheetDelete").sheet(3)]).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Document(DocumentError::SheetOutOfRange(3))
        ));
    }

    #[test]
    fn test_range_select_activates_sheet() {
        let mut doc = MemoryDocument::with_sheets("Book1", &["A", "B"]);
        replay(&mut doc, vec![Action::new("rangeSelect").sheet(1).range(1, 1, 2, 2)]).unwrap();
        assert_eq!(doc.active_sheet().unwrap(), doc.sheet_at(1).unwrap().id);
        assert_eq!(doc.selection().unwrap().as_deref(), Some("B!B2:C3"));
    }
}
