//! relay - run a workbook file through a remote engine
//!
//! Loads a workbook JSON file, sends its snapshot to the engine, replays the
//! returned actions and writes the result back.

mod settings;

use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use remote::auth::RenewalFailure;
use remote::dialog::{DialogService, DialogSize};
use remote::{AlertDialog, Dispatcher, HttpTransport, MemoryDocument, Registry, Runner, TokenCache};
use settings::{CliOverrides, Settings};

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Send a workbook to a remote engine and apply its changes")]
struct Args {
    /// Workbook JSON file
    workbook: PathBuf,

    /// Engine endpoint (defaults to the stored url)
    #[arg(long)]
    url: Option<String>,

    /// Authorization header value
    #[arg(long, env = "RELAY_AUTH", hide_env_values = true)]
    auth: Option<String>,

    /// File holding an access token (JWT), re-read whenever it nears expiry
    #[arg(long, value_name = "PATH", conflicts_with = "auth")]
    token_file: Option<PathBuf>,

    /// Only send these sheets (comma separated)
    #[arg(long, value_delimiter = ',')]
    include: Vec<String>,

    /// Send these sheets as empty placeholders (comma separated)
    #[arg(long, value_delimiter = ',')]
    exclude: Vec<String>,

    /// Extra request header (repeatable)
    #[arg(long = "header", value_name = "NAME=VALUE", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Where to write the result (defaults to the input file)
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Store url, filters and headers as defaults
    #[arg(long)]
    save: bool,
}

fn parse_header(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

/// Shows alerts by opening the alert page in the default browser
struct BrowserDialog;

impl DialogService for BrowserDialog {
    fn display(&self, url: &str, size: DialogSize) -> remote::Result<()> {
        info!("Opening alert ({}% x {}%): {}", size.width, size.height, url);
        open::that(url).map_err(|e| remote::RemoteError::Http(format!("Failed to open alert: {}", e)))
    }

    fn close(&self) {}
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    if let Err(e) = run(Args::parse()) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut settings = Settings::load()?;
    let cli = CliOverrides {
        auth: args.auth.clone(),
        include: args.include.clone(),
        exclude: args.exclude.clone(),
        headers: args.headers.clone(),
    };

    let Some(url) = args.url.clone().or_else(|| settings.url.clone()) else {
        bail!("No engine url given; pass --url or store one with --save");
    };
    let origin = url::Url::parse(&url)
        .with_context(|| format!("Invalid engine url: {}", url))?
        .origin()
        .ascii_serialization();

    if args.save {
        settings.absorb(&url, &cli);
        settings.save()?;
        info!("Saved settings to {}", config::config_path(settings::SETTINGS_FILE).unwrap_or_default().display());
    }

    let options = settings.run_options(&cli);

    let json = std::fs::read_to_string(&args.workbook)
        .with_context(|| format!("Failed to read workbook: {}", args.workbook.display()))?;
    let mut doc = MemoryDocument::from_json(&json)
        .with_context(|| format!("Failed to load workbook: {}", args.workbook.display()))?;

    let dispatcher = Dispatcher::new(Registry::new()).with_alerts(AlertDialog::new(BrowserDialog, origin));
    let mut runner = Runner::new(url, HttpTransport::new(), dispatcher);
    if let Some(path) = args.token_file.clone() {
        runner = runner.with_credentials(TokenCache::new(move || read_token(&path)));
    }

    let stats = runner.run_or_alert(&mut doc, &options)?;

    let output = args.output.as_ref().unwrap_or(&args.workbook);
    let json = doc.to_json().context("Failed to serialize workbook")?;
    std::fs::write(output, json)
        .with_context(|| format!("Failed to write workbook: {}", output.display()))?;
    info!(
        "Wrote {} ({} actions applied)",
        output.display(),
        stats.actions_applied
    );
    Ok(())
}

fn read_token(path: &PathBuf) -> std::result::Result<String, RenewalFailure> {
    let token = std::fs::read_to_string(path)
        .map_err(|e| RenewalFailure::new("io", format!("{}: {}", path.display(), e)))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(RenewalFailure::new("empty", format!("{} holds no token", path.display())));
    }
    Ok(token.to_string())
}
