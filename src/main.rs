use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use threat_scan_rs::assistant::{OpenAiChat, OPENAI_CHAT_ENDPOINT};
use threat_scan_rs::report::{self, FileScanReport};
use threat_scan_rs::server::{self, AppState};
use threat_scan_rs::session::ScanSession;
use threat_scan_rs::settings::{FileSettings, MemorySettings, SettingsStore};
use threat_scan_rs::types::{ScanInput, ScanKind, ScanResult, ScanStatus, SessionSnapshot};

/// threat-scan-rs — simulated file, URL, DNS, IP, domain and email scans with a tiny embedded web UI.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "threat-scan-rs",
    version,
    about = "Simulated threat scans (file, URL, DNS, IP, domain, email) with a tiny embedded web UI.",
    long_about = None
)]
struct Cli {
    /// Run one scan in the terminal: file, url, dns, ip or domain.
    #[arg(long, value_parser = parse_kind)]
    scan: Option<ScanKind>,

    /// Target for url/dns/ip/domain scans.
    #[arg(long)]
    target: Option<String>,

    /// File to use as the input of a file scan (only its name and size are read).
    #[arg(long)]
    file: Option<PathBuf>,

    /// Write the finished scan (or the file report) as pretty JSON to this path.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Start the embedded HTTP UI server.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the UI server.
    #[arg(long, env = "THREAT_SCAN_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Directory with the static UI.
    #[arg(long = "ui-dir", env = "THREAT_SCAN_UI_DIR", default_value = "ui")]
    ui_dir: PathBuf,

    /// Provider settings file. Defaults to the platform config directory.
    #[arg(long, env = "THREAT_SCAN_SETTINGS")]
    settings: Option<PathBuf>,

    /// OpenAI-compatible chat completion endpoint for the assistant.
    #[arg(long = "chat-endpoint", env = "THREAT_SCAN_CHAT_ENDPOINT", default_value = OPENAI_CHAT_ENDPOINT)]
    chat_endpoint: String,
}

fn parse_kind(s: &str) -> std::result::Result<ScanKind, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("threat-scan-rs configuration:");
    println!(
        "  scan         : {}",
        cli.scan.map(|k| k.to_string()).unwrap_or_else(|| "<none>".into())
    );
    println!("  serve_ui     : {}", cli.serve_ui);
    println!("  bind         : {}", cli.bind);
    println!("  ui_dir       : {}", cli.ui_dir.display());
    println!("  chat         : {}", cli.chat_endpoint);

    let settings = open_settings(cli.settings.as_deref());

    if let Some(kind) = cli.scan {
        let input = scan_input(kind, &cli)?;
        let snap = run_scan(kind, input).await?;
        print_result(&snap);
        if let Some(path) = cli.output.as_deref() {
            match write_output(path, &snap) {
                Ok(()) => println!("Wrote JSON results to {}", path.display()),
                Err(e) => eprintln!("Failed to write JSON to {}: {e:#}", path.display()),
            }
        }
    }

    if cli.serve_ui {
        let state = AppState::new(settings, Arc::new(OpenAiChat::new(cli.chat_endpoint.clone())));
        println!("UI server starting at http://{} (Ctrl+C to stop)", cli.bind);
        tokio::select! {
            served = server::spawn_server(&cli.bind, &cli.ui_dir, state) => {
                served.with_context(|| format!("UI server on {} failed", cli.bind))?;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("waiting for Ctrl+C")?;
                info!("shutting down");
            }
        }
    }

    Ok(())
}

fn open_settings(path: Option<&Path>) -> Arc<dyn SettingsStore> {
    let path = path.map(Path::to_path_buf).or_else(FileSettings::default_path);
    match path.map(FileSettings::open) {
        Some(Ok(store)) => Arc::new(store),
        Some(Err(e)) => {
            warn!(error = %e, "settings unavailable, keeping them in memory");
            Arc::new(MemorySettings::new())
        }
        None => Arc::new(MemorySettings::new()),
    }
}

fn scan_input(kind: ScanKind, cli: &Cli) -> Result<ScanInput> {
    if kind.takes_file() {
        let Some(path) = cli.file.as_deref() else {
            bail!("--scan {kind} needs --file <path>");
        };
        let meta = std::fs::metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Ok(ScanInput::file(name, meta.len()));
    }
    match cli.target.as_deref() {
        Some(t) => Ok(ScanInput::target(t)),
        None => bail!("--scan {kind} needs --target <value>"),
    }
}

/// Run one session to completion, mirroring progress on a terminal bar.
async fn run_scan(kind: ScanKind, input: ScanInput) -> Result<SessionSnapshot> {
    let session = ScanSession::new(kind);
    let mut updates = session.subscribe();
    session.start(input).await?;

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg:>8} [{bar:40.cyan/blue}] {pos:>3}%")?
            .progress_chars("=> "),
    );
    bar.set_message(kind.to_string());

    let snap = loop {
        let snap = updates.borrow_and_update().clone();
        bar.set_position(snap.percent() as u64);
        if snap.status != ScanStatus::Running {
            break snap;
        }
        if updates.changed().await.is_err() {
            break session.snapshot().await;
        }
    };
    bar.finish_and_clear();
    Ok(snap)
}

fn print_result(snap: &SessionSnapshot) {
    let Some(result) = snap.result.as_ref() else {
        println!("\n{} scan ended without a result ({:?})", snap.kind, snap.status);
        return;
    };
    println!("\n{} scan completed at {}", snap.kind, snap.completed_at.as_deref().unwrap_or("-"));
    match result {
        ScanResult::File(v) => {
            if let Some(ScanInput::File(f)) = &snap.input {
                println!("  file         : {}", f.name);
                println!("  size         : {:.1} KB", f.size as f64 / 1024.0);
            }
            println!("  detections   : {}%", v.detections);
            println!("  clean        : {}%", v.clean);
        }
        ScanResult::Url(v) => {
            println!("  safety score : {} / 100", v.score);
            for t in &v.threats {
                println!("  threat       : {t}");
            }
            let trend: Vec<String> = v.history.iter().map(u8::to_string).collect();
            println!("  trend        : {}", trend.join(" "));
        }
        ScanResult::Dns { records } => print_dns_table(records),
        ScanResult::Domain(d) => {
            println!("  whois        : {}", d.whois);
            println!("  reputation   : {}", d.reputation);
            for i in &d.intel {
                println!("  intel        : {i}");
            }
        }
        ScanResult::Ip(ip) => {
            println!("  geolocation  : {}", ip.geo);
            println!("  reputation   : {}", ip.reputation);
            println!("  risk         : {}", ip.risk);
        }
    }
}

fn print_dns_table(records: &[threat_scan_rs::types::DnsRecord]) {
    let type_w = records
        .iter()
        .map(|r| r.record_type.len())
        .max()
        .unwrap_or(0)
        .max("type".len());
    let value_w = records
        .iter()
        .map(|r| r.value.len())
        .max()
        .unwrap_or(0)
        .max("value".len());
    let risk_w = "medium".len();

    println!(
        "{:<type_w$}  {:<value_w$}  {:<risk_w$}",
        "type", "value", "risk"
    );
    println!("{:-<type_w$}  {:-<value_w$}  {:-<risk_w$}", "", "", "");
    for r in records {
        println!(
            "{:<type_w$}  {:<value_w$}  {:<risk_w$}",
            r.record_type,
            r.value,
            r.risk.to_string()
        );
    }
}

fn write_output(path: &Path, snap: &SessionSnapshot) -> Result<()> {
    match FileScanReport::from_snapshot(snap) {
        Some(r) => report::write_json(path, &r),
        None => report::write_json(path, snap),
    }
}
