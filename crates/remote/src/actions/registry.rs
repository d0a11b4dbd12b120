//! Macro and callback registry
//!
//! An explicit value handed to the dispatcher and the alert dialog. Use
//! [`register_macro!`](crate::register_macro) and
//! [`register_callback!`](crate::register_callback) to register a function
//! under its own identifier.

use std::collections::HashMap;
use std::fmt;

use super::dispatcher::MacroContext;
use crate::error::{RemoteError, Result};
use crate::models::Cell;

/// A macro invoked by `runMacro`
pub type MacroFn = dyn Fn(&mut MacroContext<'_>, &[Cell]) -> Result<()> + Send + Sync;

/// A callback invoked with the button the user picked in an alert
pub type CallbackFn = dyn Fn(&str) -> Result<()> + Send + Sync;

#[derive(Default)]
pub struct Registry {
    macros: HashMap<String, Box<MacroFn>>,
    callbacks: HashMap<String, Box<CallbackFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_macro<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&mut MacroContext<'_>, &[Cell]) -> Result<()> + Send + Sync + 'static,
    {
        self.macros.insert(name.into(), Box::new(f));
        self
    }

    pub fn register_callback<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&str) -> Result<()> + Send + Sync + 'static,
    {
        self.callbacks.insert(name.into(), Box::new(f));
        self
    }

    pub fn get_macro(&self, name: &str) -> Result<&MacroFn> {
        self.macros
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| RemoteError::UnregisteredCallback(name.to_string()))
    }

    pub fn get_callback(&self, name: &str) -> Result<&CallbackFn> {
        self.callbacks
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| RemoteError::UnregisteredCallback(name.to_string()))
    }

    pub fn has_macro(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut macros: Vec<_> = self.macros.keys().collect();
        let mut callbacks: Vec<_> = self.callbacks.keys().collect();
        macros.sort();
        callbacks.sort();
        f.debug_struct("Registry")
            .field("macros", &macros)
            .field("callbacks", &callbacks)
            .finish()
    }
}

/// Register a macro under its function name
///
/// ```ignore
/// fn hello(ctx: &mut MacroContext<'_>, args: &[Cell]) -> remote::Result<()> { Ok(()) }
/// register_macro!(registry, hello);
/// ```
#[macro_export]
macro_rules! register_macro {
    ($registry:expr, $func:ident) => {
        $registry.register_macro(stringify!($func), $func)
    };
}

/// Register an alert callback under its function name
#[macro_export]
macro_rules! register_callback {
    ($registry:expr, $func:ident) => {
        $registry.register_callback(stringify!($func), $func)
    };
}
