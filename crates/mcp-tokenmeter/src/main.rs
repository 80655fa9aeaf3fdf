use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use env_flags::env_flags;
use once_cell::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use mcp_tokenmeter::config::{self, FetchCfg, UserConfig};
use mcp_tokenmeter::report::{self, aggregate, write_json, write_text};
use mcp_tokenmeter::{FetchError, InitializationError, LaunchSpec, Tokenizer, fetch_definitions};

/// Measure how many prompt tokens an MCP server's definitions cost.
///
/// Launches the server over stdio, fetches every tool, prompt, resource and
/// resource template it advertises and counts cl100k_base tokens for each.
///
/// Examples:
///   mcp-tokenmeter npx -y @modelcontextprotocol/server-everything
///   mcp-tokenmeter --json uvx mcp-server-fetch
#[derive(Debug, Parser)]
#[command(name = "mcp-tokenmeter", version)]
struct Cli {
    /// Print every definition with its canonical JSON and token count as JSON
    #[arg(long)]
    json: bool,

    /// Overall timeout in milliseconds; 0 disables it
    #[arg(long, value_name = "MS", env = "TOKENMETER_TIMEOUT_MS")]
    timeout: Option<u64>,

    /// Server command followed by its arguments, passed through verbatim
    #[arg(
        value_name = "COMMAND",
        required = true,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<String>,
}

#[derive(Clone, Copy)]
enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

fn init_tracing(home: &Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "warn", "debug", or targets format.
        RUST_LOG: &str = "warn";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to a daily file under <TOKENMETER_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = false;
        /// Optional explicit log directory. Defaults to <TOKENMETER_HOME>/logs
        LOG_DIR: &str = "";
    }

    use tracing_subscriber::fmt::MakeWriter;
    use tracing_subscriber::{EnvFilter, Layer, Registry, prelude::*};

    let env_set = |k: &str| std::env::var_os(k).is_some();

    // Env wins; the config file only fills in what env leaves unset.
    let mut rust_log = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let mut tracing_json = *TRACING_JSON;
    let mut tracing_compact = *TRACING_COMPACT;
    let mut tracing_pretty = *TRACING_PRETTY;
    let mut log_to_file = *LOG_TO_FILE;
    let mut log_dir: Option<std::path::PathBuf> = if !(*LOG_DIR).is_empty() {
        Some(config::expand_home(*LOG_DIR))
    } else {
        None
    };

    if let Some(cfg) = user_cfg.and_then(|c| c.logging.as_ref()) {
        if !(env_set("TRACING_FILTER") || env_set("RUST_LOG"))
            && let Some(level) = cfg.level.as_ref()
        {
            rust_log = level.clone();
        }
        if !env_set("TRACING_JSON")
            && let Some(v) = cfg.json
        {
            tracing_json = v;
        }
        if !env_set("TRACING_COMPACT")
            && let Some(v) = cfg.compact
        {
            tracing_compact = v;
        }
        if !env_set("TRACING_PRETTY")
            && let Some(v) = cfg.pretty
        {
            tracing_pretty = v;
        }
        if !env_set("LOG_TO_FILE")
            && let Some(v) = cfg.to_file
        {
            log_to_file = v;
        }
        if !env_set("LOG_DIR")
            && let Some(dir) = cfg.dir.as_ref()
        {
            log_dir = Some(config::expand_home(dir));
        }
    }

    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("warn"));
    let style = if tracing_json {
        LogStyle::Json
    } else if tracing_compact {
        LogStyle::Compact
    } else if tracing_pretty {
        LogStyle::Pretty
    } else {
        LogStyle::Full
    };

    fn fmt_layer<W>(writer: W, ansi: bool, style: LogStyle) -> Box<dyn Layer<Registry> + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let base = tracing_subscriber::fmt::layer()
            .with_file(false)
            .with_line_number(false)
            .with_target(true)
            .with_ansi(ansi)
            .with_writer(writer);
        match style {
            LogStyle::Json => base.json().boxed(),
            LogStyle::Compact => base.compact().boxed(),
            LogStyle::Pretty => base.pretty().boxed(),
            LogStyle::Full => base.boxed(),
        }
    }

    // stdout carries the report, so logs always go to stderr.
    let mut layers = vec![fmt_layer(std::io::stderr, true, style)];
    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let mut dir_error = None;
    if log_to_file {
        let dir = log_dir.unwrap_or_else(|| home.join("logs"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&dir, "mcp-tokenmeter.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(fmt_layer(nb, false, style));
            }
            Err(e) => dir_error = Some((dir, e)),
        }
    }

    if let Err(e) = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
    {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some((dir, e)) = dir_error {
        tracing::warn!("failed to create log dir {}: {}", dir.display(), e);
    }
}

/// Exit status for a failed run: 3 vocabulary, 4 connection, 5 fatal
/// enumeration, 6 cancelled or timed out, 1 anything else. Usage errors
/// exit with 2 from clap.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if cause.downcast_ref::<InitializationError>().is_some() {
            return 3;
        }
        if let Some(fetch) = cause.downcast_ref::<FetchError>() {
            return match fetch {
                FetchError::Connection(_) => 4,
                FetchError::Enumeration(_) => 5,
                FetchError::Cancelled | FetchError::TimedOut(_) => 6,
            };
        }
    }
    1
}

async fn run(cli: Cli, user_cfg: Option<UserConfig>) -> anyhow::Result<()> {
    // The vocabulary must be usable before any server is started.
    let tokenizer = Tokenizer::cl100k().context("initializing token counter")?;
    let estimator = report::estimate::from_config(user_cfg.as_ref().and_then(|c| c.estimate.as_ref()))
        .context("invalid [estimate] configuration")?;

    let fetch_cfg = user_cfg
        .as_ref()
        .and_then(|c| c.fetch.as_ref());
    let options = match fetch_cfg {
        Some(f) => f.to_options(cli.timeout),
        None => FetchCfg::default().to_options(cli.timeout),
    };

    let mut command = cli.command.into_iter();
    let Some(program) = command.next() else {
        bail!("missing server command");
    };
    let mut spec = LaunchSpec::new(program, command.collect());
    if let Some(env) = fetch_cfg.and_then(|f| f.env.clone()) {
        spec.env = env;
    }
    tracing::info!("measuring `{}`", spec.display());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; stopping server");
            on_signal.cancel();
        }
    });

    let result = fetch_definitions(&spec, &options, &cancel)
        .await
        .context("fetching definitions")?;
    let report = aggregate(&result, |text| tokenizer.count(text));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if cli.json {
        write_json(&mut out, &result, &report).context("writing JSON report")?;
    } else {
        write_text(&mut out, &report, estimator.as_ref()).context("writing report")?;
    }
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_flags! {
        /// Home for config.toml and logs. Defaults to $HOME/.mcp-tokenmeter
        TOKENMETER_HOME: &str = "";
    }
    let home = config::resolve_home(*TOKENMETER_HOME);
    let (user_cfg, cfg_error) = match config::load_user_config(&home) {
        Ok(cfg) => (cfg, None),
        Err(e) => (None, Some(e)),
    };
    init_tracing(&home, user_cfg.as_ref());
    if let Some(e) = cfg_error {
        tracing::warn!("ignoring {}: {:#}", home.join("config.toml").display(), e);
    }
    tracing::debug!("home={}", home.display());

    match run(cli, user_cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}
