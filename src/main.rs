/*!
 * Sacristan CLI
 *
 * Operator console over the session-integrity components: session
 * lifecycle, credential vault, environment fingerprint, health and
 * tiered recovery.
 */

use clap::{Parser, Subcommand, ValueEnum};
use rand::RngCore;
use sacristan::{
    cli_style::{self, stats_table, status_cell, Icons, Theme},
    config::{ConsoleConfig, LogLevel},
    console::Console,
    error::{Result, SacristanError, EXIT_SUCCESS},
    logging,
};
use sacristan_core_vigil::diagnostics::{ComponentStatus, OverallStatus, RecoveryMode};
use sacristan_core_vigil::session_guard::DenyReason;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sacristan")]
#[command(version, about = "Session-integrity and credential-resilience console", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short = 'c', long = "config", value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "info", global = true)]
    log_level: LogLevelArg,

    /// Log to file instead of stderr
    #[arg(long = "log", value_name = "PATH", global = true)]
    log: Option<PathBuf>,

    /// Verbose output (shorthand for --log-level debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show component health, error rate and recent errors
    Status {
        /// Number of recent errors to list
        #[arg(short = 'n', long, default_value = "10")]
        errors: usize,
    },

    /// Establish an authenticated session
    Login {
        /// Session id (random when omitted)
        #[arg(long, value_name = "ID")]
        session: Option<String>,
    },

    /// Tear down the current session
    Logout,

    /// Validate the current session and show the outcome
    Session,

    /// Credential vault operations
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Show the environment fingerprint and recheck it
    Fingerprint,

    /// Run tiered recovery
    Recover {
        /// Recovery tier
        #[arg(short = 'm', long = "mode", value_enum, default_value = "soft")]
        mode: RecoverModeArg,
    },

    /// Run the background watchdog in the foreground
    Watch,
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Vet and store an access token (read from stdin)
    Set,
    /// Show stored credential metadata
    Show {
        /// Print the decrypted token itself
        #[arg(long)]
        reveal: bool,
    },
    /// Revalidate the stored credential against the identity endpoint
    Refresh,
    /// Remove the stored credential
    Clear,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum RecoverModeArg {
    Soft,
    Medium,
    Hard,
}

impl From<RecoverModeArg> for RecoveryMode {
    fn from(arg: RecoverModeArg) -> Self {
        match arg {
            RecoverModeArg::Soft => RecoveryMode::Soft,
            RecoverModeArg::Medium => RecoveryMode::Medium,
            RecoverModeArg::Hard => RecoveryMode::Hard,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            cli_style::print_error(&e.to_string(), suggestion_for(&e));
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn suggestion_for(error: &SacristanError) -> Option<&'static str> {
    use sacristan_core_vigil::VigilError;
    match error {
        SacristanError::Vigil(VigilError::NoSession) => {
            Some("run `sacristan login` to establish a session")
        }
        SacristanError::Vigil(VigilError::NoCredential) => {
            Some("run `sacristan credential set` to store a token")
        }
        SacristanError::Vigil(VigilError::CircuitOpen) => {
            Some("wait for the cooldown or run `sacristan recover --mode soft`")
        }
        _ => None,
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| dirs::config_dir().map(|d| d.join("sacristan").join("console.toml")));
    let mut config = match config_path {
        Some(path) => ConsoleConfig::load(&path)?,
        None => ConsoleConfig::default(),
    };
    config.log_level = cli.log_level.into();
    config.log_file = cli.log.clone();
    config.verbose = cli.verbose;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let console = Console::open(config)?;

    match cli.command {
        Commands::Status { errors } => cmd_status(&console, errors).await,
        Commands::Login { session } => cmd_login(&console, session).await,
        Commands::Logout => {
            console.logout().await?;
            cli_style::print_success("session closed");
            Ok(())
        }
        Commands::Session => cmd_session(&console).await,
        Commands::Credential { action } => cmd_credential(&console, action).await,
        Commands::Fingerprint => cmd_fingerprint(&console).await,
        Commands::Recover { mode } => cmd_recover(&console, mode.into()).await,
        Commands::Watch => {
            let watchdog = console.watchdog();
            tokio::select! {
                _ = watchdog => {}
                _ = tokio::signal::ctrl_c() => {
                    console.shutdown();
                }
            }
            Ok(())
        }
    }
}

async fn cmd_status(console: &Console, error_limit: usize) -> Result<()> {
    let snapshot = console.health().await;

    cli_style::section_header("System Health");
    let overall = match snapshot.overall {
        OverallStatus::Healthy => Theme::success(snapshot.overall.to_string()),
        OverallStatus::Warning | OverallStatus::Degraded => {
            Theme::warning(snapshot.overall.to_string())
        }
        OverallStatus::Critical => Theme::error(snapshot.overall.to_string()),
    };
    println!("  Overall: {}", overall);
    println!(
        "  Error rate: {:.2}/min over the last 5 minutes",
        snapshot.error_rate_per_min
    );

    let mut table = cli_style::create_table();
    table.set_header(vec!["Component", "Status"]);
    for component in &snapshot.components {
        let cell = match component.status {
            ComponentStatus::Healthy => status_cell("Healthy", true, false),
            ComponentStatus::Warning => status_cell("Warning", false, true),
            ComponentStatus::Error => status_cell("Error", false, false),
        };
        table.add_row(vec![comfy_table::Cell::new(&component.name), cell]);
    }
    println!("{table}");

    let recent = console.diagnostics().recent_errors(error_limit);
    if !recent.is_empty() {
        cli_style::section_header("Recent Errors");
        let mut table = cli_style::create_minimal_table();
        for event in recent {
            table.add_row(vec![
                format_ms(event.timestamp_ms),
                event.category.to_string(),
                event.context,
                event.message,
            ]);
        }
        println!("{table}");
    }
    Ok(())
}

async fn cmd_login(console: &Console, session: Option<String>) -> Result<()> {
    let session_id = session.unwrap_or_else(random_session_id);
    console.login(&session_id).await?;
    cli_style::print_success(&format!("session {} established", session_id));
    Ok(())
}

async fn cmd_session(console: &Console) -> Result<()> {
    let outcome = console.validate_session().await;
    if outcome.authenticated {
        cli_style::print_success("session valid");
    } else {
        let reason = outcome
            .reason
            .map(describe_deny)
            .unwrap_or("unknown");
        cli_style::print_warning(&format!("session invalid: {}", reason));
    }
    Ok(())
}

fn describe_deny(reason: DenyReason) -> &'static str {
    match reason {
        DenyReason::NoSession => "no session exists",
        DenyReason::NotAuthenticated => "session is not authenticated",
        DenyReason::MalformedSession => "session record was malformed and has been cleared",
        DenyReason::ExpiredSession => "session expired from inactivity",
        DenyReason::StorageUnavailable => "persistent storage is unavailable",
        DenyReason::CircuitOpen => "validation circuit is open",
        DenyReason::FingerprintMismatch => "environment fingerprint mismatch",
    }
}

async fn cmd_credential(console: &Console, action: CredentialAction) -> Result<()> {
    match action {
        CredentialAction::Set => {
            cli_style::print_info("paste the access token, then EOF (Ctrl-D):");
            let mut token = String::new();
            std::io::stdin()
                .read_to_string(&mut token)
                .map_err(SacristanError::Io)?;
            let token = token.trim();
            let profile = console.store_credential(token).await?;
            cli_style::print_success(&format!(
                "{} credential stored for {} (scopes: {})",
                Icons::KEY,
                profile.login,
                profile.scopes.join(", ")
            ));
            Ok(())
        }
        CredentialAction::Show { reveal } => {
            match console.credential_status().await? {
                None => cli_style::print_info("no credential stored"),
                Some(meta) => {
                    let mut items = vec![
                        ("Scopes", meta.scopes.join(", ")),
                        ("Stored", format_ms(meta.stored_at_ms)),
                        ("Last validated", format_ms(meta.last_validated_ms)),
                    ];
                    if meta.rate_limit.limit > 0 {
                        items.push((
                            "Rate limit",
                            format!(
                                "{}/{} remaining",
                                meta.rate_limit.remaining, meta.rate_limit.limit
                            ),
                        ));
                    }
                    println!("{}", stats_table(&items));
                    if reveal {
                        let token = console.reveal_credential().await?;
                        println!("{}", *token);
                    }
                }
            }
            Ok(())
        }
        CredentialAction::Refresh => {
            use sacristan_core_vigil::credential_vault::RefreshOutcome;
            match console.refresh_credential().await? {
                RefreshOutcome::Fresh => cli_style::print_info("credential validation is recent"),
                RefreshOutcome::Refreshed => cli_style::print_success("credential revalidated"),
                RefreshOutcome::Deferred => {
                    cli_style::print_warning("identity endpoint unreachable, revalidation deferred")
                }
            }
            Ok(())
        }
        CredentialAction::Clear => {
            console.clear_credential().await?;
            cli_style::print_success("credential cleared");
            Ok(())
        }
    }
}

async fn cmd_fingerprint(console: &Console) -> Result<()> {
    let current = console.monitor().current_fingerprint();
    println!("Fingerprint: {}", Theme::primary(&current));
    let status = console.check_fingerprint().await?;
    if status.ok {
        cli_style::print_success("environment matches the accepted fingerprint");
    } else {
        cli_style::print_error(
            "environment fingerprint changed, re-authentication required",
            Some("run `sacristan login` from the expected environment"),
        );
    }
    Ok(())
}

async fn cmd_recover(console: &Console, mode: RecoveryMode) -> Result<()> {
    cli_style::section_header(&format!("{} Recovery ({:?})", Icons::SHIELD, mode));
    let report = console.recover(mode).await;

    let mut table = cli_style::create_table();
    table.set_header(vec!["Step", "Result", "Detail"]);
    for step in &report.steps {
        table.add_row(vec![
            comfy_table::Cell::new(&step.name),
            if step.ok {
                status_cell("ok", true, false)
            } else {
                status_cell("failed", false, false)
            },
            comfy_table::Cell::new(step.detail.clone().unwrap_or_default()),
        ]);
    }
    println!("{table}");

    if report.reload_required {
        cli_style::print_warning("hard recovery complete: restart the console to finish");
    }
    if report.fully_succeeded() {
        cli_style::print_success("recovery completed");
        Ok(())
    } else {
        Err(SacristanError::Other(
            "one or more recovery steps failed".into(),
        ))
    }
}

fn random_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn format_ms(ms: u64) -> String {
    chrono::DateTime::from_timestamp_millis(ms as i64)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| ms.to_string())
}
