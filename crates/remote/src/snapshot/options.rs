//! Run options and the in-document config sheet
//!
//! Explicit options always win. The config sheet only fills in what the
//! caller left empty, and its `HEADER_*` entries only apply when the caller
//! passed no headers at all.

use crate::document::Document;
use crate::error::{RemoteError, Result};
use crate::models::Cell;
use crate::transport::RequestHeaders;

/// Name of the sheet holding `KEY | VALUE` defaults
pub const CONFIG_SHEET_NAME: &str = "xlwings.conf";

const HEADER_PREFIX: &str = "header_";

const BOTH_FILTERS: &str = "Either use 'include' or 'exclude', but not both!";

/// Options for one snapshot/replay cycle
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub auth: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub headers: RequestHeaders,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auth(mut self, auth: impl Into<String>) -> Self {
        self.auth = Some(auth.into());
        self
    }

    pub fn include<I, S>(mut self, sheets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = sheets.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, sheets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = sheets.into_iter().map(Into::into).collect();
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Checks that need no document access
    pub fn validate(&self) -> Result<()> {
        ensure_single_filter(&self.include, &self.exclude)
    }

    /// Merge with the config sheet and turn `include` into its complement
    pub fn resolve(&self, config: &ConfigSheet, sheet_names: &[String]) -> Result<ResolvedOptions> {
        let auth = non_empty(self.auth.clone()).or_else(|| non_empty(config.get("AUTH").map(String::from)));

        let include = if self.include.is_empty() {
            config.get("INCLUDE").map(split_list).unwrap_or_default()
        } else {
            self.include.clone()
        };
        let exclude = if self.exclude.is_empty() {
            config.get("EXCLUDE").map(split_list).unwrap_or_default()
        } else {
            self.exclude.clone()
        };
        ensure_single_filter(&include, &exclude)?;

        let exclude = if include.is_empty() {
            exclude
        } else {
            sheet_names
                .iter()
                .filter(|name| !include.contains(name))
                .cloned()
                .collect()
        };

        let headers = if self.headers.is_empty() {
            config.headers()
        } else {
            self.headers.clone()
        };

        Ok(ResolvedOptions {
            auth,
            exclude,
            headers,
        })
    }
}

/// Options after merging with the config sheet
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOptions {
    pub auth: Option<String>,
    /// Sheets sent as placeholders
    pub exclude: Vec<String>,
    /// Header overrides, before `Authorization` and `Content-Type` are added
    pub headers: RequestHeaders,
}

/// Entries of the config sheet, in sheet order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSheet {
    entries: Vec<(String, String)>,
}

impl ConfigSheet {
    /// Read the config sheet if the workbook has one
    pub fn read<D: Document + ?Sized>(doc: &D) -> Result<Self> {
        let Some(sheet) = doc.sheet_named(CONFIG_SHEET_NAME)? else {
            return Ok(Self::default());
        };
        let Some(used) = doc.used_range(sheet.id)? else {
            return Ok(Self::default());
        };
        let contents = doc.read_range(sheet.id, used)?;
        Ok(Self::from_rows(&contents.values))
    }

    /// Two-column `KEY | VALUE` rows; rows without a key are skipped
    pub fn from_rows(rows: &[Vec<Cell>]) -> Self {
        let entries = rows
            .iter()
            .filter_map(|row| {
                let key = row.first()?.to_string().trim().to_string();
                if key.is_empty() {
                    return None;
                }
                let value = row.get(1).map(|v| v.to_string()).unwrap_or_default();
                Some((key, value))
            })
            .collect();
        Self { entries }
    }

    /// Value for `key`; a repeated key takes its last value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rfind(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// `HEADER_<name>` entries with the prefix removed
    pub fn headers(&self) -> RequestHeaders {
        self.entries
            .iter()
            .filter(|(k, _)| {
                k.len() > HEADER_PREFIX.len()
                    && k.is_char_boundary(HEADER_PREFIX.len())
                    && k[..HEADER_PREFIX.len()].eq_ignore_ascii_case(HEADER_PREFIX)
            })
            .map(|(k, v)| (k[HEADER_PREFIX.len()..].to_string(), v.clone()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `"Sheet1, Sheet2"` -> `["Sheet1", "Sheet2"]`
pub fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn ensure_single_filter(include: &[String], exclude: &[String]) -> Result<()> {
    if !include.is_empty() && !exclude.is_empty() {
        return Err(RemoteError::Configuration(BOTH_FILTERS.to_string()));
    }
    Ok(())
}
