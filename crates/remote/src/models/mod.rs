//! Wire models shared by the serializer, transport and dispatcher

mod action;
mod cell;
mod snapshot;

pub use action::{Action, ActionList};
pub use cell::Cell;
pub use snapshot::{
    BookInfo, CLIENT_NAME, NameBinding, PictureSnapshot, SheetSnapshot, TableSnapshot,
    WorkbookSnapshot,
};
