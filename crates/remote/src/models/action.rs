//! Commands returned by the remote engine

use serde::{Deserialize, Deserializer, Serialize};

use super::Cell;

/// One remote-engine-issued command, as it appears on the wire
///
/// Consumed exactly once, in array order, by the dispatcher. The typed form
/// is [`crate::actions::Command`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub func: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub args: Vec<Cell>,
    #[serde(default)]
    pub values: Option<Vec<Vec<Cell>>>,
    #[serde(default)]
    pub sheet_position: Option<usize>,
    #[serde(default)]
    pub start_row: Option<usize>,
    #[serde(default)]
    pub start_column: Option<usize>,
    #[serde(default)]
    pub row_count: Option<usize>,
    #[serde(default)]
    pub column_count: Option<usize>,
}

/// Success body of the exchange: `{ "actions": [...] }`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub actions: Vec<Action>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Action {
    pub fn new(func: impl Into<String>) -> Self {
        Self {
            func: func.into(),
            args: Vec::new(),
            values: None,
            sheet_position: None,
            start_row: None,
            start_column: None,
            row_count: None,
            column_count: None,
        }
    }

    pub fn args<I, C>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Cell>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn arg(mut self, arg: impl Into<Cell>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn sheet(mut self, position: usize) -> Self {
        self.sheet_position = Some(position);
        self
    }

    pub fn range(mut self, start_row: usize, start_column: usize, rows: usize, columns: usize) -> Self {
        self.start_row = Some(start_row);
        self.start_column = Some(start_column);
        self.row_count = Some(rows);
        self.column_count = Some(columns);
        self
    }

    pub fn values(mut self, values: Vec<Vec<Cell>>) -> Self {
        self.values = Some(values);
        self
    }
}
