//! Engine commands and their replay

mod command;
mod dispatcher;
mod registry;

pub use command::{Command, PictureUpdate, RangeTarget, TableUpdate};
pub use dispatcher::{Dispatcher, MacroContext, ReplayStats};
pub use registry::{CallbackFn, MacroFn, Registry};
