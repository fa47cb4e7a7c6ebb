use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use logbook::{
    FsBlobStore, JournalHttpServer, JournalHttpServerConfig, JournalService, SharedSecret,
};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_LOG_FILTER: &str = "info,logbook=info";
const PASSWORD_ENV: &str = "LOGBOOK_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "logbookd", about = "Authenticated append-only journal server")]
struct Cli {
    /// Address to serve HTTP on
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Directory the journal blob is stored under
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    /// File holding the shared secret (trailing newline stripped);
    /// falls back to the LOGBOOK_PASSWORD environment variable
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// env_logger-style filter string; overrides RUST_LOG/defaults
    #[arg(long)]
    log_filter: Option<String>,
}

fn init_logging(cli_filter: Option<&str>) {
    let env = Env::default().default_filter_or(DEFAULT_LOG_FILTER);
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(filter) = cli_filter {
        builder.parse_filters(filter);
    }
    builder.format_timestamp_secs();
    builder.format(|buf, record| {
        let ts = buf.timestamp();
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            ts,
            record.level(),
            record.target(),
            record.args()
        )
    });
    builder.init();
}

fn load_secret(cli: &Cli) -> Result<SharedSecret> {
    if let Some(path) = &cli.password_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read password file {}", path.display()))?;
        let secret = raw.trim_end_matches(['\r', '\n']);
        if secret.is_empty() {
            bail!("password file {} is empty", path.display());
        }
        return Ok(SharedSecret::new(secret));
    }
    match std::env::var(PASSWORD_ENV) {
        Ok(value) if !value.is_empty() => Ok(SharedSecret::new(value)),
        _ => bail!("no shared secret: pass --password-file or set {PASSWORD_ENV}"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_filter.as_deref());
    let secret = load_secret(&cli)?;
    let store = FsBlobStore::open(&cli.data_dir)
        .with_context(|| format!("open blob store under {}", cli.data_dir.display()))?;
    let service = JournalService::new(store);
    info!(
        "event=logbookd_starting bind={} data_dir={} journal_key={}",
        cli.bind,
        cli.data_dir.display(),
        service.key()
    );
    let _handle = JournalHttpServer::spawn(JournalHttpServerConfig::new(cli.bind, secret), service)
        .context("spawn journal HTTP server")?;
    // The accept loop runs on its own thread; park the main thread until
    // the process is terminated.
    loop {
        std::thread::park();
    }
}
