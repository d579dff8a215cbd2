// postindex CLI - sync the post office index from a spreadsheet snapshot
// and query the synced table

mod exit_codes;

use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Local;
use clap::{ArgAction, Parser, Subcommand};
use rusqlite::Connection;
use serde::Serialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use postindex_config::{ConfigError, Settings};
use postindex_recon::query::{self, ListQuery};
use postindex_recon::{Language, ReclaimPolicy, Reconciler, SyncError, SyncOptions, POST_INFO};

use exit_codes::{
    sync_exit_code, EXIT_CONFIG, EXIT_ERROR, EXIT_NOT_FOUND, EXIT_SOURCE, EXIT_STORAGE, EXIT_SUCCESS, EXIT_USAGE,
};

#[derive(Parser)]
#[command(name = "postindex")]
#[command(about = "Sync the post office index table from a spreadsheet and query it")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Settings file [default: <config dir>/postindex/postindex.toml]
    #[arg(long, global = true, env = "POSTINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides [database] path)
    #[arg(long, global = true, env = "POSTINDEX_DB")]
    db: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index and dictionary tables (and a settings file if none exists)
    Init,

    /// Reconcile the table against a spreadsheet snapshot
    #[command(after_help = "\
Examples:
  postindex sync postindex.xlsx
  postindex sync export.csv --chunk-size 5000 --json
  postindex sync --reclaim stale")]
    Sync {
        /// Snapshot file (xlsx, xls, xlsb, ods, csv, tsv) [default: [source] path]
        file: Option<PathBuf>,

        /// Distinct keys per chunk
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Orphan removal: unobserved or stale
        #[arg(long)]
        reclaim: Option<ReclaimPolicy>,

        /// Print the run report as JSON on stdout
        #[arg(long)]
        json: bool,
    },

    /// List records, optionally filtered by an address substring
    List {
        /// 1-based page; pages past the end show the last page
        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Records per page [default: [query] page_size]
        #[arg(long)]
        limit: Option<usize>,

        /// Substring of a region, district or settlement name
        #[arg(long)]
        address: Option<String>,

        /// ukr or en
        #[arg(long)]
        lang: Option<Language>,
    },

    /// Show one record by post office code
    Get {
        key: String,

        #[arg(long)]
        lang: Option<Language>,
    },

    /// Delete one record (manual records included)
    Delete { key: String },

    /// Add a manual record that sync never removes
    #[command(after_help = "\
Dictionary fields are given by name (region_ukr, settlement_ukr, ...).
English fields default to the transliterated Ukrainian value.

Example:
  postindex add post_office_id=01001 region_ukr=Київська settlement_ukr=Київ post_office_ukr='Київ 1'")]
    Add {
        /// FIELD=VALUE pairs
        #[arg(required = true, value_name = "FIELD=VALUE")]
        fields: Vec<String>,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
    )
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Sync { .. } => "sync",
            Self::List { .. } => "list",
            Self::Get { .. } => "get",
            Self::Delete { .. } => "delete",
            Self::Add { .. } => "add",
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.name();

    let result = match Context::load(&cli) {
        Ok(ctx) => {
            init_logging(&ctx.settings.logging.level, cli.verbose, cli.quiet);
            match cli.command {
                Commands::Init => cmd_init(&ctx),
                Commands::Sync { file, chunk_size, reclaim, json } => cmd_sync(&ctx, file, chunk_size, reclaim, json),
                Commands::List { page, limit, address, lang } => cmd_list(&ctx, page, limit, address, lang),
                Commands::Get { key, lang } => cmd_get(&ctx, &key, lang),
                Commands::Delete { key } => cmd_delete(&ctx, &key),
                Commands::Add { fields } => cmd_add(&ctx, &fields),
            }
        }
        Err(err) => {
            // Settings unreadable: log at the default level
            init_logging("info", cli.verbose, cli.quiet);
            Err(err)
        }
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            tracing::error!("{command} failed (exit {code}): {message}");
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

fn init_logging(configured: &str, verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => configured.parse().unwrap_or(Level::INFO),
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    // Also routes `log` records from the library crates
    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }

    pub fn source(msg: impl Into<String>) -> Self {
        Self { code: EXIT_SOURCE, message: msg.into(), hint: None }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { code: EXIT_NOT_FOUND, message: msg.into(), hint: None }
    }

    pub fn output(err: serde_json::Error) -> Self {
        Self { code: EXIT_ERROR, message: err.to_string(), hint: None }
    }

    pub fn config(err: ConfigError) -> Self {
        let hint = match &err {
            ConfigError::MissingDatabase => {
                Some("pass --db, set POSTINDEX_DB, or add [database] path to the settings file".to_string())
            }
            ConfigError::NotFound(_) => Some("run `postindex init --db <file>` to create one".to_string()),
            _ => None,
        };
        Self { code: EXIT_CONFIG, message: err.to_string(), hint }
    }

    /// Create error from an engine error with its exit code.
    pub fn sync(err: SyncError) -> Self {
        let code = sync_exit_code(&err);
        let hint = match &err {
            SyncError::MissingKeyColumn { .. } => {
                Some("is this the post office index workbook? the header row must carry the code column".to_string())
            }
            SyncError::Storage(_) => Some("committed chunks are kept; re-running the sync is safe".to_string()),
            _ => None,
        };
        Self { code, message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

impl From<SyncError> for CliError {
    fn from(err: SyncError) -> Self {
        Self::sync(err)
    }
}

// ============================================================================
// Settings and storage
// ============================================================================

struct Context {
    settings: Settings,
    config_path: PathBuf,
    db_override: Option<PathBuf>,
}

impl Context {
    fn load(cli: &Cli) -> Result<Self, CliError> {
        // An explicit settings file must exist; the default one is optional
        let (config_path, required) = match &cli.config {
            Some(path) => (path.clone(), !matches!(cli.command, Commands::Init)),
            None => (Settings::default_path(), false),
        };
        let settings = Settings::load(&config_path, required).map_err(CliError::config)?;
        Ok(Self { settings, config_path, db_override: cli.db.clone() })
    }

    fn database_path(&self) -> Result<PathBuf, CliError> {
        match &self.db_override {
            Some(path) => Ok(path.clone()),
            None => self.settings.database_path().map(Path::to_path_buf).map_err(CliError::config),
        }
    }

    /// Open the database without touching its schema.
    fn connect(&self) -> Result<Connection, CliError> {
        let path = self.database_path()?;
        let conn = Connection::open(&path).map_err(|e| {
            CliError { code: EXIT_STORAGE, message: format!("{}: {e}", path.display()), hint: None }
                .with_hint("check that the database directory exists and is writable")
        })?;
        conn.pragma_update(None, "foreign_keys", true).map_err(SyncError::from)?;
        Ok(conn)
    }

    /// Open the database and make sure the tables exist.
    fn open(&self) -> Result<Connection, CliError> {
        let conn = self.connect()?;
        POST_INFO.ensure_tables(&conn)?;
        Ok(conn)
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(CliError::output)?;
    println!("{text}");
    Ok(())
}

// ============================================================================
// init
// ============================================================================

fn cmd_init(ctx: &Context) -> Result<(), CliError> {
    let db = ctx.database_path()?;
    if let Some(parent) = db.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| CliError { code: EXIT_STORAGE, message: format!("{}: {e}", parent.display()), hint: None })?;
    }
    ctx.open()?;

    let db = std::fs::canonicalize(&db).unwrap_or(db);
    let created = Settings::create_default_file(&ctx.config_path, &db).map_err(CliError::config)?;

    eprintln!("database: {}", db.display());
    if created {
        eprintln!("settings: {} (created)", ctx.config_path.display());
    } else {
        eprintln!("settings: {}", ctx.config_path.display());
    }
    Ok(())
}

// ============================================================================
// sync
// ============================================================================

fn cmd_sync(
    ctx: &Context,
    file: Option<PathBuf>,
    chunk_size: Option<usize>,
    reclaim: Option<ReclaimPolicy>,
    json: bool,
) -> Result<(), CliError> {
    let file = file
        .or_else(|| ctx.settings.source.path.clone())
        .ok_or_else(|| CliError::usage("no source file given").with_hint("pass FILE or set [source] path"))?;

    let options = SyncOptions {
        chunk_size: chunk_size.unwrap_or(ctx.settings.sync.chunk_size),
        reclaim: reclaim.unwrap_or(ctx.settings.sync.reclaim),
    };
    let reconciler = Reconciler::new(&POST_INFO, options)?;

    let source = postindex_io::read_rows(&file).map_err(CliError::source)?;
    match &source.sheet_name {
        Some(sheet) => log::info!("reading {} (sheet '{sheet}'): {} rows", file.display(), source.rows.len()),
        None => log::info!("reading {}: {} rows", file.display(), source.rows.len()),
    }

    // Tables are created by the run itself, once the header has been mapped
    let mut conn = ctx.connect()?;
    let report = reconciler.run(&mut conn, source.rows)?;

    if json {
        print_json(&report)
    } else {
        eprintln!("{}", report.summary());
        Ok(())
    }
}

// ============================================================================
// list / get / delete
// ============================================================================

fn cmd_list(
    ctx: &Context,
    page: usize,
    limit: Option<usize>,
    address: Option<String>,
    lang: Option<Language>,
) -> Result<(), CliError> {
    let query = ListQuery {
        page,
        limit: limit.unwrap_or(ctx.settings.query.page_size),
        address,
        language: lang.unwrap_or(ctx.settings.query.language),
        separator: ctx.settings.query.address_separator.clone(),
    };
    let conn = ctx.open()?;
    print_json(&query::list(&conn, &POST_INFO, &query)?)
}

fn cmd_get(ctx: &Context, key: &str, lang: Option<Language>) -> Result<(), CliError> {
    let conn = ctx.open()?;
    let language = lang.unwrap_or(ctx.settings.query.language);
    match query::get(&conn, &POST_INFO, language, &ctx.settings.query.address_separator, key)? {
        Some(record) => print_json(&record),
        None => Err(CliError::not_found(format!("no record '{key}'"))),
    }
}

fn cmd_delete(ctx: &Context, key: &str) -> Result<(), CliError> {
    let conn = ctx.open()?;
    if !query::delete(&conn, &POST_INFO, key)? {
        return Err(CliError::not_found(format!("no record '{key}'")));
    }
    print_json(&serde_json::json!({ "deleted": key }))
}

// ============================================================================
// add
// ============================================================================

fn parse_assignments(args: &[String]) -> Result<BTreeMap<String, String>, CliError> {
    let mut fields = BTreeMap::new();
    for arg in args {
        let (name, value) = arg
            .split_once('=')
            .filter(|(name, _)| !name.trim().is_empty())
            .ok_or_else(|| CliError::usage(format!("expected FIELD=VALUE, got '{arg}'")))?;
        if fields.insert(name.trim().to_string(), value.to_string()).is_some() {
            return Err(CliError::usage(format!("field '{}' given twice", name.trim())));
        }
    }
    Ok(fields)
}

fn cmd_add(ctx: &Context, args: &[String]) -> Result<(), CliError> {
    let fields = parse_assignments(args)?;
    let conn = ctx.open()?;
    let key = query::insert_manual(&conn, &POST_INFO, &fields, Local::now().naive_local()).map_err(|e| {
        let unknown = matches!(e, SyncError::UnknownField(_));
        let err = CliError::sync(e);
        if unknown {
            let names: Vec<&str> = POST_INFO.fields.iter().map(|f| f.input_name()).collect();
            err.with_hint(format!("known fields: {}", names.join(", ")))
        } else {
            err
        }
    })?;

    let record = query::get(&conn, &POST_INFO, ctx.settings.query.language, &ctx.settings.query.address_separator, &key)?;
    print_json(&record)
}
