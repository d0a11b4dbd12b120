//! Stored defaults from `~/.config/relay/settings.json`

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use remote::RunOptions;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Engine endpoint
    pub url: Option<String>,
    pub auth: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub headers: BTreeMap<String, String>,
}

impl Settings {
    pub fn load() -> anyhow::Result<Self> {
        config::load_json_or_default(SETTINGS_FILE)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        config::save_json(SETTINGS_FILE, self)
    }

    /// Options for a run; anything given on the command line replaces the
    /// stored value of the same kind
    pub fn run_options(&self, cli: &CliOverrides) -> RunOptions {
        let mut options = RunOptions::new();
        options.auth = cli.auth.clone().or_else(|| self.auth.clone());

        // include and exclude travel together so a stored filter never
        // collides with the opposite one from the command line
        if cli.include.is_empty() && cli.exclude.is_empty() {
            options.include = self.include.clone();
            options.exclude = self.exclude.clone();
        } else {
            options.include = cli.include.clone();
            options.exclude = cli.exclude.clone();
        }

        let headers = if cli.headers.is_empty() {
            self.headers.clone().into_iter().collect()
        } else {
            cli.headers.clone()
        };
        for (name, value) in headers {
            options.headers.insert(name, value);
        }
        options
    }

    /// Remember the command-line values for later runs
    pub fn absorb(&mut self, url: &str, cli: &CliOverrides) {
        self.url = Some(url.to_string());
        if !cli.include.is_empty() || !cli.exclude.is_empty() {
            self.include = cli.include.clone();
            self.exclude = cli.exclude.clone();
        }
        if !cli.headers.is_empty() {
            self.headers = cli.headers.iter().cloned().collect();
        }
    }
}

/// Values taken from the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub auth: Option<String>,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub headers: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored() -> Settings {
        Settings {
            url: Some("https://engine/run".into()),
            auth: Some("Token stored".into()),
            include: vec![],
            exclude: vec!["Raw".into()],
            headers: BTreeMap::from([("X-Env".to_string(), "prod".to_string())]),
        }
    }

    #[test]
    fn test_stored_values_used_without_overrides() {
        let options = stored().run_options(&CliOverrides::default());
        assert_eq!(options.auth.as_deref(), Some("Token stored"));
        assert_eq!(options.exclude, vec!["Raw"]);
        assert_eq!(options.headers.get("x-env"), Some("prod"));
    }

    #[test]
    fn test_cli_filter_replaces_stored_filter() {
        let cli = CliOverrides {
            include: vec!["Data".into()],
            ..Default::default()
        };
        let options = stored().run_options(&cli);
        assert_eq!(options.include, vec!["Data"]);
        assert!(options.exclude.is_empty());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_cli_auth_and_headers_win() {
        let cli = CliOverrides {
            auth: Some("Token cli".into()),
            headers: vec![("X-Trace".into(), "1".into())],
            ..Default::default()
        };
        let options = stored().run_options(&cli);
        assert_eq!(options.auth.as_deref(), Some("Token cli"));
        assert_eq!(options.headers.get("X-Trace"), Some("1"));
        assert!(!options.headers.contains("X-Env"));
    }

    #[test]
    fn test_absorb_keeps_auth_out() {
        let mut settings = Settings::default();
        let cli = CliOverrides {
            auth: Some("secret".into()),
            exclude: vec!["Raw".into()],
            ..Default::default()
        };
        settings.absorb("https://engine/run", &cli);
        assert_eq!(settings.url.as_deref(), Some("https://engine/run"));
        assert_eq!(settings.exclude, vec!["Raw"]);
        assert_eq!(settings.auth, None);
    }

    #[test]
    fn test_missing_fields_default() {
        let settings: Settings = serde_json::from_str(r#"{"url":"http://x"}"#).unwrap();
        assert_eq!(settings.url.as_deref(), Some("http://x"));
        assert!(settings.headers.is_empty());
    }
}
