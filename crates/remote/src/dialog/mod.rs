//! Modal alert dialog
//!
//! The dialog itself is hosted by the embedding application through
//! [`DialogService`]. This module builds the alert page URL, picks the
//! dialog size for the host platform and routes dialog messages back to
//! registered callbacks.

use log::{error, info, warn};

use crate::actions::Registry;
use crate::error::Result;

/// Host platform, which decides the dialog size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    OfficeOnline,
    Pc,
    Mac,
    #[default]
    Other,
}

impl Platform {
    pub fn parse(name: &str) -> Self {
        match name {
            "OfficeOnline" => Platform::OfficeOnline,
            "PC" => Platform::Pc,
            "Mac" => Platform::Mac,
            _ => Platform::Other,
        }
    }

    pub fn dialog_size(&self) -> DialogSize {
        match self {
            Platform::OfficeOnline => DialogSize { width: 28, height: 36 },
            // Has a wider minimum width
            Platform::Pc => DialogSize { width: 28, height: 40 },
            Platform::Mac | Platform::Other => DialogSize { width: 32, height: 30 },
        }
    }
}

/// Dialog size in percent of the screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialogSize {
    pub width: u32,
    pub height: u32,
}

/// Something the open dialog reported back
#[derive(Debug, Clone, PartialEq)]
pub enum DialogEvent {
    /// `"<selection>|<callback>"`
    Message(String),
    /// Host error code
    Event(i32),
}

/// Opens and closes dialogs in the host
pub trait DialogService: Send + Sync {
    fn display(&self, url: &str, size: DialogSize) -> Result<()>;
    fn close(&self);
}

/// Arguments of an alert
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AlertRequest {
    pub prompt: String,
    pub title: String,
    pub buttons: String,
    pub mode: String,
    /// Registered callback receiving the pressed button, empty for none
    pub callback: String,
}

impl AlertRequest {
    /// The alert shown for an error reaching the top level
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            prompt: message.into(),
            title: "Error".to_string(),
            buttons: "ok".to_string(),
            mode: "critical".to_string(),
            callback: String::new(),
        }
    }
}

pub struct AlertDialog {
    service: Box<dyn DialogService>,
    origin: String,
    app_path: Option<String>,
    platform: Platform,
}

impl AlertDialog {
    pub fn new(service: impl DialogService + 'static, origin: impl Into<String>) -> Self {
        Self {
            service: Box::new(service),
            origin: origin.into().trim_end_matches('/').to_string(),
            app_path: None,
            platform: Platform::default(),
        }
    }

    /// Path prefix the alert page is mounted under
    pub fn app_path(mut self, app_path: impl Into<String>) -> Self {
        let app_path = app_path.into().trim_matches('/').to_string();
        self.app_path = (!app_path.is_empty()).then_some(app_path);
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn url(&self, request: &AlertRequest) -> String {
        let app_path = self
            .app_path
            .as_deref()
            .map(|p| format!("/{}", p))
            .unwrap_or_default();
        format!(
            "{}{}/xlwings/alert?prompt={}&title={}&buttons={}&mode={}&callback={}",
            self.origin,
            app_path,
            urlencoding::encode(&request.prompt),
            urlencoding::encode(&request.title),
            urlencoding::encode(&request.buttons),
            urlencoding::encode(&request.mode),
            urlencoding::encode(&request.callback),
        )
    }

    pub fn show(&self, request: &AlertRequest) -> Result<()> {
        info!("Showing alert '{}'", request.title);
        self.service.display(&self.url(request), self.platform.dialog_size())
    }

    pub fn show_error(&self, message: &str) -> Result<()> {
        self.show(&AlertRequest::error(message))
    }

    /// Route a dialog event
    ///
    /// A message closes the dialog and calls the named callback with the
    /// selection. Event codes are only logged.
    pub fn handle_event(&self, event: DialogEvent, registry: &Registry) -> Result<()> {
        match event {
            DialogEvent::Message(message) => {
                self.service.close();
                let (selection, callback) = message.split_once('|').unwrap_or((message.as_str(), ""));
                if callback.is_empty() {
                    return Ok(());
                }
                registry.get_callback(callback)?(selection)
            }
            DialogEvent::Event(code) => {
                match code {
                    12002 => error!(
                        "The dialog box has been directed to a page that it cannot find or load, or the URL syntax is invalid."
                    ),
                    12003 => error!("HTTPS is required."),
                    12006 => info!("Dialog closed by user"),
                    other => warn!("Unknown error in dialog box ({})", other),
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for AlertDialog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDialog")
            .field("origin", &self.origin)
            .field("app_path", &self.app_path)
            .field("platform", &self.platform)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingDialog {
        opened: Arc<Mutex<Vec<(String, DialogSize)>>>,
        closed: Arc<Mutex<usize>>,
    }

    impl DialogService for RecordingDialog {
        fn display(&self, url: &str, size: DialogSize) -> Result<()> {
            self.opened.lock().unwrap().push((url.to_string(), size));
            Ok(())
        }

        fn close(&self) {
            *self.closed.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_alert_url() {
        let dialog = AlertDialog::new(RecordingDialog::default(), "https://app.example.com/").app_path("/tools/");
        let url = dialog.url(&AlertRequest {
            prompt: "Done & dusted?".into(),
            title: "Status".into(),
            buttons: "yes_no".into(),
            mode: "info".into(),
            callback: "on_pick".into(),
        });
        assert_eq!(
            url,
            "https://app.example.com/tools/xlwings/alert?prompt=Done%20%26%20dusted%3F&title=Status&buttons=yes_no&mode=info&callback=on_pick"
        );
    }

    #[test]
    fn test_dialog_size_by_platform() {
        assert_eq!(Platform::parse("OfficeOnline").dialog_size(), DialogSize { width: 28, height: 36 });
        assert_eq!(Platform::parse("PC").dialog_size(), DialogSize { width: 28, height: 40 });
        assert_eq!(Platform::parse("Mac").dialog_size(), DialogSize { width: 32, height: 30 });
        assert_eq!(Platform::parse("iOS"), Platform::Other);
    }

    #[test]
    fn test_show_error() {
        let service = RecordingDialog::default();
        let dialog = AlertDialog::new(service.clone(), "https://app.example.com").platform(Platform::Pc);
        dialog.show_error("boom").unwrap();

        let opened = service.opened.lock().unwrap();
        assert_eq!(opened.len(), 1);
        assert!(opened[0].0.contains("prompt=boom&title=Error&buttons=ok&mode=critical&callback="));
        assert_eq!(opened[0].1, DialogSize { width: 28, height: 40 });
    }

    #[test]
    fn test_message_routes_to_callback() {
        let picked = Arc::new(Mutex::new(String::new()));
        let sink = picked.clone();
        let mut registry = Registry::new();
        registry.register_callback("on_pick", move |selection| {
            *sink.lock().unwrap() = selection.to_string();
            Ok(())
        });

        let service = RecordingDialog::default();
        let dialog = AlertDialog::new(service.clone(), "https://app.example.com");
        dialog
            .handle_event(DialogEvent::Message("yes|on_pick".into()), &registry)
            .unwrap();

        assert_eq!(*picked.lock().unwrap(), "yes");
        assert_eq!(*service.closed.lock().unwrap(), 1);
    }

    #[test]
    fn test_empty_callback_is_ignored() {
        let dialog = AlertDialog::new(RecordingDialog::default(), "https://app.example.com");
        let registry = Registry::new();
        dialog.handle_event(DialogEvent::Message("ok|".into()), &registry).unwrap();
        dialog.handle_event(DialogEvent::Message("ok".into()), &registry).unwrap();
    }

    #[test]
    fn test_unregistered_callback_is_error() {
        let dialog = AlertDialog::new(RecordingDialog::default(), "https://app.example.com");
        let err = dialog
            .handle_event(DialogEvent::Message("ok|missing".into()), &Registry::new())
            .unwrap_err();
        assert!(matches!(err, RemoteError::UnregisteredCallback(name) if name == "missing"));
    }

    #[test]
    fn test_event_codes_are_not_fatal() {
        let dialog = AlertDialog::new(RecordingDialog::default(), "https://app.example.com");
        for code in [12002, 12003, 12006, 99] {
            dialog.handle_event(DialogEvent::Event(code), &Registry::new()).unwrap();
        }
    }
}
