use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use port_sweep_rs::config::{ScanConfig, DEFAULT_WORKERS};
use port_sweep_rs::error::ScanError;
use port_sweep_rs::ports::parse_range;
use port_sweep_rs::scanner::Scanner;
use port_sweep_rs::sink::{JsonFileSink, DEFAULT_OUTPUT};
use port_sweep_rs::types::{ScanEvent, ScanRequest, ScanStatus};

/// port-sweep — fast TCP connect port scanner for a single host.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "port-sweep",
    version,
    about = "Fast TCP connect port scanner for a single host.",
    long_about = None
)]
struct Cli {
    /// Target host: IP address or resolvable name.
    host: String,

    /// Port or inclusive port range to scan (e.g. 80 or 1-1024).
    #[arg(long, default_value = "1-1024", conflicts_with = "all")]
    ports: String,

    /// Scan every port, 1-65535.
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Number of concurrent probing workers.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Per-port connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 50)]
    timeout_ms: u64,

    /// Where to write JSON results when open ports are found.
    #[arg(long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Do not write results to disk.
    #[arg(long = "no-save", default_value_t = false)]
    no_save: bool,

    /// Enable debug logging.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let request = build_request(&cli)?;

    let config = ScanConfig::default().with_probe_timeout(Duration::from_millis(cli.timeout_ms));
    let scanner = if cli.no_save {
        Scanner::new(config)
    } else {
        Scanner::with_sink(config, Arc::new(JsonFileSink::new(cli.output.clone())))
    };

    let mut handle = scanner.start_scan(request)?;

    // Ctrl-C stops the scan; workers finish their in-flight probe and exit.
    let stopper = scanner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop_scan();
        }
    });

    while let Some(event) = handle.next_event().await {
        match event {
            ScanEvent::Started { host, total } => {
                println!("Scanning {host} ({total} ports)...");
            }
            ScanEvent::PortOpen(port) => println!("Port {port} open"),
            ScanEvent::Finished(status) => print_summary(&status, &cli),
        }
    }

    handle.wait().await?;
    Ok(())
}

fn build_request(cli: &Cli) -> std::result::Result<ScanRequest, ScanError> {
    let request = if cli.all {
        ScanRequest::full_range(cli.host.clone())
    } else {
        let (start, end) = parse_range(&cli.ports)?;
        ScanRequest::new(cli.host.clone(), start, end)
    };
    let request = request.with_workers(cli.workers);
    request.validate()?;
    Ok(request)
}

fn print_summary(status: &ScanStatus, cli: &Cli) {
    match status {
        ScanStatus::Completed { open_ports } => {
            let list: Vec<String> = open_ports.iter().map(u16::to_string).collect();
            println!("Scan completed. Open ports: {}", list.join(", "));
            if !cli.no_save {
                println!("Results saved to {}", cli.output.display());
            }
        }
        ScanStatus::NoOpenPorts => println!("Scan completed. No open ports found."),
        ScanStatus::Stopped => println!("Scan stopped."),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
