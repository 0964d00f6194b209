//! recap-sentry command-line tool.
//!
//! Runs one incremental sync of Recap crash reports into Sentry, shows the
//! stored watermark, and generates configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use recap_sentry_core::config::{default_state_path, SyncConfig};
use recap_sentry_core::{ProgressStore, SyncEngine};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Forward new Recap crash reports to Sentry.
#[derive(Parser, Debug)]
#[command(
    name = "recap-sentry",
    version,
    about = "Forward new Recap crash reports to Sentry"
)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward crashes newer than the stored watermark, then advance it.
    Sync(SyncArgs),

    /// Show the stored watermark without taking the lock.
    Status {
        /// Watermark file to inspect.
        #[arg(long)]
        state_file_path: Option<String>,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./recap-sentry.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
struct SyncArgs {
    /// Recap server base URL, e.g. https://recap.example.com
    base_url: Option<String>,

    /// Crash collection path on the Recap server, e.g. /rest/v1/crashes
    crash_endpoint: Option<String>,

    /// Sentry DSN of the destination project.
    sentry_dsn: Option<String>,

    /// Log in with "<username>:<password>" and a session cookie.
    #[arg(long, value_name = "USER:PASSWORD")]
    cookie_auth: Option<String>,

    /// Use an OAuth client-credentials token, "<client-id>:<client-secret>".
    #[arg(long, value_name = "CLIENT_ID:SECRET")]
    bearer_auth: Option<String>,

    /// Watermark file. Defaults to "<recap host>.state".
    #[arg(long)]
    state_file_path: Option<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Config is read first so its log level can seed the filter.
    let config = match (&cli.command, cli.config.as_deref()) {
        (Commands::Init { .. }, _) | (_, None) => None,
        (_, Some(path)) => match load_config(path) {
            Ok(config) => Some(config),
            Err(e) => {
                eprintln!("{}", style::error(&format!("{:#}", e)));
                return ExitCode::FAILURE;
            }
        },
    };

    init_logging(
        cli.verbose,
        config.as_ref().map_or("warn", |c| c.log_level.as_str()),
    );

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool, configured_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { configured_level })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(command: Commands, config: Option<SyncConfig>) -> Result<()> {
    match command {
        Commands::Sync(args) => cmd_sync(args, config).await,
        Commands::Status { state_file_path } => cmd_status(state_file_path, config.as_ref()),
        Commands::Init { output } => cmd_init(&output),
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &str) -> Result<SyncConfig> {
    let path = expand_tilde(path);
    SyncConfig::load_and_resolve(&path)
        .with_context(|| format!("failed to load configuration file {}", path))
}

/// Apply command-line arguments on top of the (optional) config file.
fn merge_sync_args(args: SyncArgs, config: Option<SyncConfig>) -> Result<SyncConfig> {
    let mut config = match config {
        Some(config) => config,
        None => match (&args.base_url, &args.crash_endpoint, &args.sentry_dsn) {
            (Some(base_url), Some(endpoint), Some(_)) => {
                SyncConfig::new(base_url.as_str(), endpoint.as_str())
            }
            _ => bail!("BASE_URL, CRASH_ENDPOINT and SENTRY_DSN are required without --config"),
        },
    };

    if let Some(base_url) = args.base_url {
        config.recap.base_url = base_url;
    }
    if let Some(endpoint) = args.crash_endpoint {
        config.recap.crash_endpoint = endpoint;
    }
    if let Some(dsn) = args.sentry_dsn {
        config.sentry.dsn = Some(dsn);
    }
    // Credentials given on the command line replace the configured mode.
    if args.cookie_auth.is_some() || args.bearer_auth.is_some() {
        config.recap.cookie_auth = args.cookie_auth;
        config.recap.bearer_auth = args.bearer_auth;
    }
    if let Some(path) = args.state_file_path {
        config.state.file_path = Some(PathBuf::from(expand_tilde(&path)));
    }
    Ok(config)
}

fn resolve_state_path(explicit: Option<String>, config: Option<&SyncConfig>) -> Result<PathBuf> {
    match (explicit, config) {
        (Some(path), _) => Ok(PathBuf::from(expand_tilde(&path))),
        (None, Some(config)) => match &config.state.file_path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_state_path(&config.recap.base_url)?),
        },
        (None, None) => bail!("either --state-file-path or --config is required"),
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return format!("{}/{}", home.display(), rest);
        }
    }
    path.to_string()
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

async fn cmd_sync(args: SyncArgs, config: Option<SyncConfig>) -> Result<()> {
    let config = merge_sync_args(args, config)?;
    let settings = config.to_settings().context("invalid configuration")?;
    let state_file = settings.state_file.clone();
    debug!(
        base_url = %settings.recap.base_url,
        auth = settings.recap.auth.kind(),
        state_file = %state_file.display(),
        "starting sync"
    );

    let engine = SyncEngine::new(settings);
    let report = engine.run().await.context("sync failed")?;

    if report.advanced() {
        println!(
            "{}",
            style::success(&format!(
                "forwarded {} crash(es) to Sentry, watermark {} → {}",
                report.events_emitted, report.previous_watermark, report.watermark
            ))
        );
    } else {
        println!("{}", style::success("no new crashes"));
    }
    println!(
        "  {}",
        style::dim(&format!(
            "state file {} ({} ms)",
            state_file.display(),
            (report.completed_at - report.started_at).num_milliseconds()
        ))
    );
    Ok(())
}

fn cmd_status(state_file_path: Option<String>, config: Option<&SyncConfig>) -> Result<()> {
    let path = resolve_state_path(state_file_path, config)?;
    let watermark = ProgressStore::new(&path)
        .peek()
        .context("failed to read state file")?;

    println!();
    println!("{}", style::header("recap-sentry"));
    println!("  State file   {}", path.display());
    println!("  Watermark    {}", style::watermark(watermark));
    println!();
    Ok(())
}

fn cmd_init(output: &Path) -> Result<()> {
    if output.exists() {
        bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, SyncConfig::default_template())
        .context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the config file with your Recap server and crash endpoint");
    println!("  2. Set the referenced environment variables (RECAP_COOKIE_AUTH, RECAP_SENTRY_DSN)");
    println!(
        "  3. Run a sync: recap-sentry --config {} sync",
        output.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn sync_args(cli: Cli) -> SyncArgs {
        match cli.command {
            Commands::Sync(args) => args,
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_sync_positionals() {
        let cli = parse(&[
            "recap-sentry",
            "-v",
            "sync",
            "https://recap.example.com",
            "/crashes",
            "https://key@sentry.io/1",
            "--bearer-auth",
            "id:secret",
        ]);
        assert!(cli.verbose);
        let args = sync_args(cli);
        assert_eq!(args.base_url.as_deref(), Some("https://recap.example.com"));
        assert_eq!(args.crash_endpoint.as_deref(), Some("/crashes"));
        assert_eq!(args.bearer_auth.as_deref(), Some("id:secret"));
        assert!(args.cookie_auth.is_none());
    }

    #[test]
    fn test_merge_without_config_requires_positionals() {
        let args = SyncArgs {
            base_url: Some("https://recap.example.com".into()),
            ..Default::default()
        };
        assert!(merge_sync_args(args, None).is_err());
    }

    #[test]
    fn test_merge_without_config() {
        let args = SyncArgs {
            base_url: Some("https://recap.example.com".into()),
            crash_endpoint: Some("/crashes".into()),
            sentry_dsn: Some("https://key@sentry.io/1".into()),
            cookie_auth: Some("alice:pw".into()),
            ..Default::default()
        };
        let config = merge_sync_args(args, None).unwrap();
        let settings = config.to_settings().unwrap();
        assert_eq!(settings.recap.crash_endpoint, "/crashes");
        assert_eq!(settings.sentry_dsn, "https://key@sentry.io/1");
        assert_eq!(settings.state_file, PathBuf::from("recap.example.com.state"));
    }

    #[test]
    fn test_merge_cli_credentials_replace_configured_mode() {
        let mut config = SyncConfig::new("https://recap.example.com", "/crashes");
        config.recap.cookie_auth = Some("alice:pw".into());
        config.sentry.dsn = Some("https://key@sentry.io/1".into());

        let args = SyncArgs {
            bearer_auth: Some("id:secret".into()),
            state_file_path: Some("/tmp/x.state".into()),
            ..Default::default()
        };
        let merged = merge_sync_args(args, Some(config)).unwrap();
        assert!(merged.recap.cookie_auth.is_none());
        assert_eq!(merged.recap.bearer_auth.as_deref(), Some("id:secret"));
        assert_eq!(merged.state.file_path, Some(PathBuf::from("/tmp/x.state")));
        assert!(merged.to_settings().is_ok());
    }

    #[test]
    fn test_merge_both_credentials_is_rejected() {
        let args = SyncArgs {
            base_url: Some("https://recap.example.com".into()),
            crash_endpoint: Some("/crashes".into()),
            sentry_dsn: Some("https://key@sentry.io/1".into()),
            cookie_auth: Some("alice:pw".into()),
            bearer_auth: Some("id:secret".into()),
            ..Default::default()
        };
        let config = merge_sync_args(args, None).unwrap();
        assert!(config.to_settings().is_err());
    }

    #[test]
    fn test_resolve_state_path() {
        assert!(resolve_state_path(None, None).is_err());
        assert_eq!(
            resolve_state_path(Some("/a/b.state".into()), None).unwrap(),
            PathBuf::from("/a/b.state")
        );

        let config = SyncConfig::new("https://recap.example.com", "/crashes");
        assert_eq!(
            resolve_state_path(None, Some(&config)).unwrap(),
            PathBuf::from("recap.example.com.state")
        );
    }

    #[test]
    fn test_init_writes_template_once() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("recap-sentry.toml");

        cmd_init(&output).unwrap();
        let written = SyncConfig::load_from_file(&output).unwrap();
        assert_eq!(written.recap.crash_endpoint, "/rest/v1/crashes");

        assert!(cmd_init(&output).is_err());
    }

    #[test]
    fn test_status_reads_watermark() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recap.state");
        std::fs::write(&path, "77").unwrap();
        cmd_status(Some(path.display().to_string()), None).unwrap();

        std::fs::write(&path, "garbage").unwrap();
        assert!(cmd_status(Some(path.display().to_string()), None).is_err());
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/etc/recap.toml"), "/etc/recap.toml");
        assert_eq!(expand_tilde("relative.toml"), "relative.toml");
    }
}
