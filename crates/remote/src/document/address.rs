//! A1-style addresses
//!
//! All coordinates are zero-based. `CellArea::parse("B2:C4")` is the area
//! starting at row 1, column 1, spanning 3 rows and 2 columns.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::DocumentError;

pub const MAX_ROWS: usize = 1_048_576;
pub const MAX_COLUMNS: usize = 16_384;

/// A rectangular block of cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellArea {
    pub row: usize,
    pub column: usize,
    pub rows: usize,
    pub columns: usize,
}

impl CellArea {
    pub fn new(row: usize, column: usize, rows: usize, columns: usize) -> Self {
        Self {
            row,
            column,
            rows,
            columns,
        }
    }

    /// A single cell
    pub fn cell(row: usize, column: usize) -> Self {
        Self::new(row, column, 1, 1)
    }

    /// From `A1` down to (and including) `last_row`/`last_column`
    pub fn from_origin_to(last_row: usize, last_column: usize) -> Self {
        Self::new(0, 0, last_row + 1, last_column + 1)
    }

    pub fn last_row(&self) -> usize {
        self.row + self.rows.saturating_sub(1)
    }

    pub fn last_column(&self) -> usize {
        self.column + self.columns.saturating_sub(1)
    }

    pub fn contains(&self, row: usize, column: usize) -> bool {
        row >= self.row
            && row < self.row + self.rows
            && column >= self.column
            && column < self.column + self.columns
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.columns == 0
    }

    /// Iterate all `(row, column)` pairs, row-major
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.row..self.row + self.rows)
            .flat_map(move |r| (self.column..self.column + self.columns).map(move |c| (r, c)))
    }

    /// Parse `A1`, `$A$1:$B$2` or `Sheet1!A1:B2` (the sheet prefix is dropped)
    pub fn parse(address: &str) -> Result<Self, DocumentError> {
        let (_, area) = parse_reference(address)?;
        Ok(area)
    }

    /// `A1` for a single cell, `A1:B2` otherwise
    pub fn to_a1(&self) -> String {
        let start = format!("{}{}", column_letters(self.column), self.row + 1);
        if self.rows <= 1 && self.columns <= 1 {
            start
        } else {
            format!(
                "{}:{}{}",
                start,
                column_letters(self.last_column()),
                self.last_row() + 1
            )
        }
    }
}

impl fmt::Display for CellArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_a1())
    }
}

/// `0` -> `A`, `25` -> `Z`, `26` -> `AA`
pub fn column_letters(mut column: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (column % 26) as u8);
        if column < 26 {
            break;
        }
        column = column / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// `A` -> `0`, `AA` -> `26`
pub fn column_index(letters: &str) -> Option<usize> {
    if letters.is_empty() {
        return None;
    }
    let mut index = 0usize;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        index = index * 26 + (ch.to_ascii_uppercase() as usize - 'A' as usize + 1);
        if index > MAX_COLUMNS {
            return None;
        }
    }
    Some(index - 1)
}

/// Split a reference such as `='My Sheet'!$A$1:$B$2` into its sheet name
/// (if any) and area.
pub fn parse_reference(reference: &str) -> Result<(Option<String>, CellArea), DocumentError> {
    let invalid = || DocumentError::InvalidAddress(reference.to_string());

    let trimmed = reference.trim().trim_start_matches('=');
    let (sheet, address) = match trimmed.rsplit_once('!') {
        Some((sheet, address)) => (Some(unquote_sheet_name(sheet)), address),
        None => (None, trimmed),
    };

    let cleaned = address.replace('$', "");
    let (start, end) = match cleaned.split_once(':') {
        Some((start, end)) => (start, end),
        None => (cleaned.as_str(), cleaned.as_str()),
    };

    let (r1, c1) = parse_cell(start).ok_or_else(invalid)?;
    let (r2, c2) = parse_cell(end).ok_or_else(invalid)?;
    let (top, bottom) = (r1.min(r2), r1.max(r2));
    let (left, right) = (c1.min(c2), c1.max(c2));

    Ok((
        sheet,
        CellArea::new(top, left, bottom - top + 1, right - left + 1),
    ))
}

fn unquote_sheet_name(sheet: &str) -> String {
    let sheet = sheet.trim();
    if sheet.len() >= 2 && sheet.starts_with('\'') && sheet.ends_with('\'') {
        sheet[1..sheet.len() - 1].replace("''", "'")
    } else {
        sheet.to_string()
    }
}

fn parse_cell(cell: &str) -> Option<(usize, usize)> {
    let split = cell.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell.split_at(split);
    let column = column_index(letters)?;
    let row: usize = digits.parse().ok()?;
    if row == 0 || row > MAX_ROWS {
        return None;
    }
    Some((row - 1, column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_letters() {
        assert_eq!(column_letters(0), "A");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
        assert_eq!(column_letters(MAX_COLUMNS - 1), "XFD");
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A"), Some(0));
        assert_eq!(column_index("aa"), Some(26));
        assert_eq!(column_index("XFD"), Some(MAX_COLUMNS - 1));
        assert_eq!(column_index("XFE"), None);
        assert_eq!(column_index("A1"), None);
    }

    #[test]
    fn test_parse_area() {
        assert_eq!(CellArea::parse("B2:C4").unwrap(), CellArea::new(1, 1, 3, 2));
        assert_eq!(CellArea::parse("$A$1").unwrap(), CellArea::cell(0, 0));
        assert_eq!(CellArea::parse("Sheet1!A1:B2").unwrap(), CellArea::new(0, 0, 2, 2));
        // Corners given in reverse order
        assert_eq!(CellArea::parse("C4:B2").unwrap(), CellArea::new(1, 1, 3, 2));
    }

    #[test]
    fn test_parse_reference_with_quoted_sheet() {
        let (sheet, area) = parse_reference("='My ''Q1'' Data'!$A$1:$A$3").unwrap();
        assert_eq!(sheet.as_deref(), Some("My 'Q1' Data"));
        assert_eq!(area, CellArea::new(0, 0, 3, 1));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(CellArea::parse("").is_err());
        assert!(CellArea::parse("A0").is_err());
        assert!(CellArea::parse("11").is_err());
        assert!(CellArea::parse("A1:").is_err());
    }

    #[test]
    fn test_to_a1() {
        assert_eq!(CellArea::cell(0, 0).to_a1(), "A1");
        assert_eq!(CellArea::new(1, 1, 3, 2).to_a1(), "B2:C4");
        assert_eq!(CellArea::from_origin_to(9, 2).to_a1(), "A1:C10");
    }

    #[test]
    fn test_cells_iteration() {
        let cells: Vec<_> = CellArea::new(1, 1, 2, 2).cells().collect();
        assert_eq!(cells, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    }
}
