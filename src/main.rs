//! CLI Entry Point for dacta
//!
//! Drives an eight-port serial command module from the terminal:
//! - List candidate serial ports
//! - Watch sensor readings as they stream in
//! - Send single port commands and power levels
//! - Cycle every port the way the classic demo script does
//!
//! # Usage
//!
//! ```bash
//! dacta --port /dev/ttyUSB0 monitor
//! dacta --port COM3 send on-right A
//! dacta --simulate cycle
//! ```
//!
//! Ctrl-C stops outputs and closes the link cleanly.

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dacta::logging::{self, LogFormat, LogSettings};
use dacta::mock::{MockCommandModule, MockConfig};
use dacta::{Command, Dacta, DactaHandle, LinkConfig, Port, SensorSnapshot};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "dacta")]
#[command(about = "Host driver for the eight-port serial command module", long_about = None)]
struct Cli {
    /// Serial port (overrides the configuration file)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Talk to a simulated module instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports present on this machine
    List,

    /// Print sensor readings periodically until Ctrl-C
    Monitor {
        /// Time between prints
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },

    /// Reverse and switch on each port in turn, printing sensors every second
    Cycle,

    /// Send one port command, e.g. `send reverse C`
    Send {
        /// on-left, on-right, reverse, on, off, left, right, kill-all, nop
        command: Command,
        /// A-H or 1-8
        port: Port,
    },

    /// Set the power level of a port
    Power {
        /// A-H or 1-8
        port: Port,
        /// Output level
        #[arg(value_parser = clap::value_parser!(u8).range(0..=7))]
        level: u8,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => LinkConfig::load_from(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LinkConfig::load().context("Failed to load configuration")?,
    };
    if let Some(port) = &cli.port {
        config.port = port.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    config.validate().context("Invalid configuration")?;

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    logging::init(
        LogSettings::from_link_config(&config)
            .map_err(anyhow::Error::msg)?
            .with_format(format),
    )
    .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::List => list_ports(),
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Monitor { interval_ms } => {
            with_link(&config, cli.simulate, |link| {
                monitor(link, Duration::from_millis(interval_ms))
            })
            .await
        }
        Commands::Cycle => with_link(&config, cli.simulate, cycle).await,
        Commands::Send { command, port } => {
            with_link(&config, cli.simulate, |link| async move {
                link.send_port_cmd(command, port.into());
                println!("Sent {} to port {}", command, port);
                hold(link).await
            })
            .await
        }
        Commands::Power { port, level } => {
            with_link(&config, cli.simulate, |link| async move {
                link.set_power(port.into(), level);
                println!("Port {} power set to {}", port, level);
                hold(link).await
            })
            .await
        }
    }
}

fn list_ports() -> Result<()> {
    let ports = dacta::transport::list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

/// Bring the link up (real or simulated), run `f`, and always close.
async fn with_link<F, Fut>(config: &LinkConfig, simulate: bool, f: F) -> Result<()>
where
    F: FnOnce(DactaHandle) -> Fut,
    Fut: std::future::Future<Output = dacta::AppResult<()>>,
{
    if simulate {
        let (transport, device) = MockCommandModule::pair(MockConfig::default());
        device.set_channel(Port::A, 200, 0);
        device.set_channel(Port::B, 700, 0);
        device.set_channel(Port::E, 512, 0);
        device.set_rotation_step(Port::E, 1);
        println!("Using simulated command module");

        let link = Dacta::connect(transport, config).await?;
        link.run(f).await?;
        println!("Simulated module received {} command bytes", device.commands().len());
        return Ok(());
    }

    Dacta::scoped(config, f).await?;
    Ok(())
}

/// Keep the link (and with it the outputs) alive until Ctrl-C; closing the link
/// switches every output off.
async fn hold(link: DactaHandle) -> dacta::AppResult<()> {
    println!("Hit Ctrl-C to switch outputs off and exit");
    tokio::select! {
        _ = signal::ctrl_c() => {}
        status = link.wait_faulted() => eprintln!("Link failed: {}", status),
    }
    Ok(())
}

async fn monitor(link: DactaHandle, interval: Duration) -> dacta::AppResult<()> {
    let mut ticker = tokio::time::interval(interval);
    println!("Hit Ctrl-C to stop");
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            status = link.wait_faulted() => {
                eprintln!("Link failed: {}", status);
                break;
            }
            _ = ticker.tick() => print_snapshot(&link.snapshot()),
        }
    }
    Ok(())
}

async fn cycle(link: DactaHandle) -> dacta::AppResult<()> {
    println!("Hit Ctrl-C to stop");
    let run = async {
        loop {
            for port in Port::ALL {
                link.send_port_cmd(Command::Reverse, port.into());
                link.send_port_cmd(Command::PortOnSame, port.into());
                print_snapshot(&link.snapshot());
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    };
    tokio::select! {
        _ = signal::ctrl_c() => {}
        _ = run => {}
    }
    Ok(())
}

fn print_snapshot(snapshot: &SensorSnapshot) {
    let turns: Vec<String> = Port::ALL
        .iter()
        .filter(|port| port.is_rotational())
        .map(|&port| format!("{}={:+.2}", port, snapshot.turns(port.into())))
        .collect();
    println!(
        "values {:?}  statuses {:?}  turns {}",
        snapshot.values,
        snapshot.statuses,
        turns.join(" ")
    );
}
