//! `zlink` command line tool.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use crossbeam_channel::{bounded, select, tick};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zlink_host::{list_ports, BaudRate, EventFilter, Link, LinkConfig, LinkError, LinkEvent};
use zlink_protocol::{Command, CMD_STATUS, CMD_VERSION};

#[derive(Parser, Debug)]
#[command(name = "zlink", version, about = "Serial link to a network coordinator")]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Serial device, overrides the configuration file.
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Baud rate, overrides the configuration file.
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Serve Prometheus metrics on this address.
    #[cfg(feature = "prometheus")]
    #[arg(long, global = true)]
    metrics_addr: Option<std::net::SocketAddr>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List serial ports, likely coordinators first.
    Ports,
    /// Connect and print firmware version and device status.
    Status {
        /// Connection timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
    /// Connect and print link events until interrupted.
    Monitor {
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LinkError> {
    #[cfg(feature = "prometheus")]
    if let Some(addr) = cli.metrics_addr {
        if let Err(e) = zlink_metrics::install_prometheus_exporter(addr) {
            error!("metrics exporter: {}", e);
        }
    }

    match cli.command {
        Cmd::Ports => print_ports(),
        Cmd::Status { timeout } => {
            let config = load_config(cli.config, cli.device, cli.baud)?;
            status(&config, Duration::from_secs(timeout))
        }
        Cmd::Monitor { duration } => {
            let config = load_config(cli.config, cli.device, cli.baud)?;
            monitor(&config, duration.map(Duration::from_secs))
        }
    }
}

fn load_config(
    path: Option<PathBuf>,
    device: Option<String>,
    baud: Option<u32>,
) -> Result<LinkConfig, LinkError> {
    let mut config = match path {
        Some(path) => LinkConfig::load(path)?,
        None => LinkConfig::default(),
    };
    if let Some(device) = device {
        config.device = device;
    }
    if let Some(baud) = baud {
        config.baud_rate = BaudRate::try_from(baud)?;
    }
    if config.device.is_empty() {
        if let Some(port) = list_ports()?.into_iter().find(|p| p.looks_like_coordinator()) {
            info!("using {}", port.name);
            config.device = port.name;
        }
    }
    config.validate()?;
    Ok(config)
}

fn print_ports() -> Result<(), LinkError> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for port in ports {
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
            _ => "-".to_string(),
        };
        println!(
            "{:<24} {:<10} {}{}",
            port.name,
            ids,
            port.product.as_deref().unwrap_or(""),
            if port.looks_like_coordinator() {
                "  (coordinator)"
            } else {
                ""
            }
        );
    }
    Ok(())
}

fn status(config: &LinkConfig, timeout: Duration) -> Result<(), LinkError> {
    let link = Link::serial(config)?;
    let events = link.subscribe(EventFilter::Connection);
    link.open()?;
    if let Err(e) = link.wait_connected(timeout) {
        if let Ok(LinkEvent::BootloaderActive) = events.try_recv() {
            println!("device is in update loader mode");
        }
        return Err(e);
    }

    let confirm_wait = config.scheduler.confirm_timeout() * 4;
    if let Some(request) = Command::request(CMD_VERSION) {
        let version = link.request(request, confirm_wait)?;
        println!("firmware:  {:08x}", version.scalar(0).unwrap_or_default());
    }
    if let Some(request) = Command::request(CMD_STATUS) {
        link.request(request, confirm_wait)?;
    }
    let status = link.device_status();
    println!("network:   {}", status);
    println!("state:     0x{:02x} ext 0x{:02x}", status.state, status.ext);

    let stats = link.stats();
    println!(
        "frames:    {} ok, {} bad checksum",
        stats.receiver.frames, stats.receiver.checksum_errors
    );
    link.shutdown();
    Ok(())
}

fn monitor(config: &LinkConfig, duration: Option<Duration>) -> Result<(), LinkError> {
    let (stop_tx, stop_rx) = bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    }) {
        error!("failed to install Ctrl-C handler: {}", e);
    }

    let link = Link::serial(config)?;
    let events = link.subscribe(EventFilter::All);
    link.open()?;

    let started = Instant::now();
    let ticker = tick(Duration::from_millis(250));
    loop {
        select! {
            recv(events) -> event => match event {
                Ok(event) => print_event(&event),
                Err(_) => break,
            },
            recv(stop_rx) -> _ => break,
            recv(ticker) -> _ => {
                if duration.is_some_and(|d| started.elapsed() >= d) {
                    break;
                }
            }
        }
    }

    let stats = link.stats();
    info!(
        "sent {} confirmed {} retries {} timeouts {}",
        stats.sent, stats.confirmed, stats.retries, stats.timeouts
    );
    link.shutdown();
    Ok(())
}

fn print_event(event: &LinkEvent) {
    match event {
        LinkEvent::Command(command) => println!(
            "{} seq {} status {} {:?}",
            zlink_protocol::CommandTable::builtin().name(command.id),
            command.seq,
            command.status,
            command.values
        ),
        other => println!("{:?}", other),
    }
}
