//! cryptnote: operator CLI over a local note store
//!
//! Commands:
//!   create              - seal a note from --text or stdin, print its id
//!   meta <id>           - print note metadata as JSON (never consumes)
//!   reveal <id>         - one-time reveal; prints the content
//!   sweep               - run one expiry pass
//!   stats               - store-wide counts as JSON
//!   migrate             - upgrade a legacy JSON store in place
//!   config show         - display current configuration
//!
//! The JSON backend keeps the whole store in memory, so run mutating
//! commands against a store no daemon currently has open.
//!
//! Exit status: 0 ok, 1 error, 2 note gone, 3 not found, 4 bad credential.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cryptnote_core::config::{expand_tilde, CryptnoteConfig};
use cryptnote_core::{Clock, DurationUnit, NoteError, NoteTtl, SystemClock, TerminalView};
use cryptnote_reveal::{bootstrap, NewNote, NoteMetrics, NoteService, RevealOutcome};
use secrecy::{ExposeSecret, SecretString};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

const EXIT_GONE: u8 = 2;
const EXIT_NOT_FOUND: u8 = 3;
const EXIT_BAD_CREDENTIAL: u8 = 4;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "cryptnote",
    version,
    about = "cryptnote one-time secret notes",
    long_about = "cryptnote: create, inspect and reveal one-time notes in a local store"
)]
struct Cli {
    /// Path to cryptnote.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "CRYPTNOTE_CONFIG",
        default_value = "/etc/cryptnote/config.toml"
    )]
    config: PathBuf,

    /// Log level for diagnostics on stderr
    #[arg(long, env = "CRYPTNOTE_LOG", default_value = "warn")]
    log: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Seal a new note and print its id
    Create {
        /// Note text (read from stdin when omitted)
        #[arg(long, short = 't')]
        text: Option<String>,
        /// Prompt for a password to protect the note
        #[arg(long, conflicts_with = "password_env")]
        password: bool,
        /// Read the password from this environment variable
        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,
        /// Lifetime before the note expires unread (default from config)
        #[arg(long)]
        ttl: Option<u32>,
        /// Unit for --ttl
        #[arg(long, default_value = "hours", requires = "ttl")]
        unit: DurationUnit,
        /// Id of the note this one answers
        #[arg(long)]
        reply_to: Option<String>,
    },

    /// Print note metadata as JSON without consuming the note
    Meta {
        id: String,
    },

    /// Reveal a note once; the note is spent afterwards
    Reveal {
        id: String,
        /// Prompt for the note password
        #[arg(long, conflicts_with = "password_env")]
        password: bool,
        /// Read the password from this environment variable
        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,
    },

    /// Close every overdue note now
    Sweep,

    /// Print store-wide counts as JSON
    Stats,

    /// Upgrade a legacy JSON store file to the current format
    Migrate {
        /// Store file (overrides store.path)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = bootstrap::load_config(&cli.config).await?;

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config).map(|()| ExitCode::SUCCESS),
        Commands::Migrate { path } => cmd_migrate(&config, path.as_deref()).map(|()| ExitCode::SUCCESS),
        Commands::Create {
            text,
            password,
            password_env,
            ttl,
            unit,
            reply_to,
        } => {
            let service = service(&config).await?;
            let password = read_password(password, password_env.as_deref(), true)?;
            let ttl = ttl.map(|value| NoteTtl { value, unit });
            cmd_create(&service, text, password, ttl, reply_to).await
        }
        Commands::Meta { id } => {
            let service = service(&config).await?;
            cmd_meta(&service, &id).await
        }
        Commands::Reveal {
            id,
            password,
            password_env,
        } => {
            let service = service(&config).await?;
            let password = read_password(password, password_env.as_deref(), false)?;
            cmd_reveal(&service, &id, password).await
        }
        Commands::Sweep => {
            let service = service(&config).await?;
            let total = service
                .sweep_expired(usize::MAX)
                .await
                .context("sweeping expired notes")?;
            println!("{total}");
            Ok(ExitCode::SUCCESS)
        }
        Commands::Stats => {
            let service = service(&config).await?;
            let stats = service.stats().await.context("reading store stats")?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn service(config: &CryptnoteConfig) -> Result<Arc<NoteService>> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || bootstrap::build_service(&config, NoteMetrics::default()))
        .await
        .context("startup task panicked")?
        .context("opening note service")
}

/// Resolve a password from `--password-env`, an interactive prompt, or nothing.
fn read_password(prompt: bool, env_var: Option<&str>, confirm: bool) -> Result<Option<SecretString>> {
    if let Some(var) = env_var {
        let value =
            std::env::var(var).with_context(|| format!("password variable {var} is not set"))?;
        return Ok(Some(SecretString::from(value)));
    }
    if !prompt {
        return Ok(None);
    }
    let first = rpassword::prompt_password("Password: ").context("reading password")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ").context("reading password")?;
        if again != first {
            anyhow::bail!("passwords do not match");
        }
    }
    Ok(Some(SecretString::from(first)))
}

/// Map the caller-facing note errors onto exit codes; anything else is a
/// plain failure.
fn note_exit(e: NoteError) -> Result<ExitCode> {
    match e {
        NoteError::NotFound => {
            eprintln!("note not found");
            Ok(ExitCode::from(EXIT_NOT_FOUND))
        }
        NoteError::InvalidCredential => {
            eprintln!("invalid password");
            Ok(ExitCode::from(EXIT_BAD_CREDENTIAL))
        }
        NoteError::Validation(msg) => anyhow::bail!("{msg}"),
        NoteError::Internal(msg) => anyhow::bail!("internal error: {msg}"),
    }
}

fn print_gone(view: &TerminalView) -> Result<ExitCode> {
    println!("{}", serde_json::to_string_pretty(view)?);
    Ok(ExitCode::from(EXIT_GONE))
}

// ── `cryptnote create` ────────────────────────────────────────────────────────

async fn cmd_create(
    service: &NoteService,
    text: Option<String>,
    password: Option<SecretString>,
    ttl: Option<NoteTtl>,
    reply_to: Option<String>,
) -> Result<ExitCode> {
    let text = match text {
        Some(t) => t,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading note text from stdin")?;
            if buf.ends_with('\n') {
                buf.pop();
                if buf.ends_with('\r') {
                    buf.pop();
                }
            }
            buf
        }
    };

    let note = NewNote {
        text: SecretString::from(text),
        password,
        ttl,
        reply_to,
    };
    match service.create_note(note).await {
        Ok(id) => {
            println!("{id}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => note_exit(e),
    }
}

// ── `cryptnote meta` ──────────────────────────────────────────────────────────

async fn cmd_meta(service: &NoteService, id: &str) -> Result<ExitCode> {
    match service.get_metadata(id).await {
        Ok(meta) => {
            println!("{}", serde_json::to_string_pretty(&meta)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => note_exit(e),
    }
}

// ── `cryptnote reveal` ────────────────────────────────────────────────────────

async fn cmd_reveal(
    service: &NoteService,
    id: &str,
    password: Option<SecretString>,
) -> Result<ExitCode> {
    match service.reveal(id, password).await {
        Ok(RevealOutcome::Revealed { content, .. }) => {
            println!("{}", content.expose_secret());
            Ok(ExitCode::SUCCESS)
        }
        Ok(RevealOutcome::Gone(view)) => {
            eprintln!(
                "note is gone ({})",
                if view.viewed() { "already revealed" } else { "expired unread" }
            );
            print_gone(&view)
        }
        Err(e) => note_exit(e),
    }
}

// ── `cryptnote migrate` ───────────────────────────────────────────────────────

fn cmd_migrate(config: &CryptnoteConfig, path: Option<&Path>) -> Result<()> {
    let path = expand_tilde(path.unwrap_or(&config.store.path));
    let report = cryptnote_store::migrate_file(&path, SystemClock.now())
        .with_context(|| format!("migrating {}", path.display()))?;

    if report.already_current {
        println!("{}: already at the current format", path.display());
    } else {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(())
}

// ── `cryptnote config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &CryptnoteConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
