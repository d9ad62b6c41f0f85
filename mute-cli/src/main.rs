use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sonos_mute::logging::{init_logging, init_logging_with_file, LoggingMode};
use sonos_mute::{
    MuteConfig, MuteService, NetworkEvent, NetworkId, StatusChange, ToggleOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

mod commands;
mod simulation;

use commands::{Command, HELP};
use simulation::{DiscoveryEvent, SimulatedHousehold};

/// Sonos Mute
///
/// Mutes every speaker on the network for a while, then puts each one back
/// the way it was. Runs against simulated speakers so every situation
/// (dropouts, unresponsive devices, network changes) can be tried by hand.
#[derive(Parser, Debug)]
#[command(name = "sonos-mute")]
#[command(about = "Temporarily mute every Sonos speaker - interactive simulation")]
#[command(version)]
pub struct Args {
    /// Number of simulated speakers
    #[arg(short, long, default_value = "3")]
    pub speakers: usize,

    /// Network to join at startup
    #[arg(short, long, default_value = "home-wifi")]
    pub network: String,

    /// Seconds added by each toggle
    #[arg(short = 'm', long, default_value = "30")]
    pub mute_seconds: u64,

    /// Furthest ahead a mute may run, in seconds
    #[arg(long, default_value = "599")]
    pub max_mute_seconds: u64,

    /// Simulated round trip of each remote action, in milliseconds
    #[arg(long, default_value = "50")]
    pub latency_ms: u64,

    /// Failures before an unresponsive speaker is dropped (0 disables)
    #[arg(long, default_value = "2")]
    pub failures_before_eviction: u32,

    /// Print status as JSON
    #[arg(long)]
    pub json: bool,

    /// Log mode (silent, development, debug)
    #[arg(long, default_value = "development")]
    pub log_mode: String,

    /// Also append logs to a dated file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    /// Validate command line arguments
    pub fn validate(&self) -> Result<()> {
        if self.speakers > 32 {
            return Err(anyhow::anyhow!(
                "At most 32 simulated speakers are supported, got {}",
                self.speakers
            ));
        }

        if self.network.trim().is_empty() {
            return Err(anyhow::anyhow!("Network name must not be empty"));
        }

        if LoggingMode::from_name(&self.log_mode).is_none() {
            return Err(anyhow::anyhow!(
                "Invalid log mode '{}'. Valid modes: silent, development, debug",
                self.log_mode
            ));
        }

        Ok(())
    }

    pub fn mute_config(&self) -> MuteConfig {
        MuteConfig::default()
            .with_mute_length(
                Duration::from_secs(self.mute_seconds),
                Duration::from_secs(self.max_mute_seconds),
            )
            .with_failures_before_eviction(self.failures_before_eviction)
    }

    fn logging_mode(&self) -> LoggingMode {
        LoggingMode::from_name(&self.log_mode).unwrap_or(LoggingMode::Silent)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.validate()?;
    match &args.log_dir {
        Some(dir) => {
            let path = init_logging_with_file(args.logging_mode(), dir).context("Failed to initialize logging")?;
            info!(path = %path.display(), "Writing log file");
        }
        None => init_logging(args.logging_mode()).context("Failed to initialize logging")?,
    }

    let (household, discovery) =
        SimulatedHousehold::new(args.speakers, Duration::from_millis(args.latency_ms));

    let service = Arc::new(
        MuteService::builder(household.clone(), household.clone())
            .with_config(args.mute_config())
            .build()
            .context("Failed to start mute service")?,
    );

    service.subscribe(print_change);
    tokio::spawn(pump_discovery(Arc::clone(&service), discovery));

    service.on_network_changed(NetworkEvent::Connected(NetworkId::new(args.network.clone())));
    service.on_transport_connected(household.online());

    println!("{}", HELP);
    print_status(&service, args.json)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        if command == Command::Quit {
            break;
        }
        run_command(command, &service, &household, &args)?;
    }

    if service.is_muted() {
        service.unmute();
        // Let the restores reach the speakers before the runtime goes away
        tokio::time::sleep(Duration::from_millis(args.latency_ms * 3 + 100)).await;
    }
    service.shutdown();
    info!("Goodbye");
    Ok(())
}

fn run_command(
    command: Command,
    service: &MuteService,
    household: &SimulatedHousehold,
    args: &Args,
) -> Result<()> {
    match command {
        Command::Toggle => match service.toggle() {
            ToggleOutcome::Muted { devices, .. } => println!("Muting {} speaker(s)", devices),
            ToggleOutcome::Extended { .. } => {}
            outcome => {
                if let Some(notice) = outcome.notice() {
                    println!("{}", notice);
                }
            }
        },
        Command::Unmute => {
            if !service.unmute() {
                println!("Nothing is muted");
            }
        }
        Command::Status => print_status(service, args.json)?,
        Command::Devices => {
            for (index, speaker) in household.speakers().iter().enumerate() {
                println!(
                    "{:>2}. {:<12} {:<6} {}{}",
                    index + 1,
                    speaker.name,
                    if speaker.muted { "muted" } else { "on" },
                    if speaker.online { "online" } else { "offline" },
                    if speaker.failing { ", not answering" } else { "" },
                );
            }
            println!("{} tracked by the service", service.device_count());
        }
        Command::Connect(network) => {
            let network = network.unwrap_or_else(|| args.network.clone());
            service.on_network_changed(NetworkEvent::Connected(NetworkId::new(network)));
            service.on_transport_connected(household.online());
        }
        Command::Disconnect => {
            service.on_transport_lost();
            service.on_network_changed(NetworkEvent::Disconnected);
        }
        Command::Drop(reference) => match household.find(&reference) {
            Some(id) if household.drop_speaker(&id) => println!("Dropped {}", reference),
            Some(_) => println!("{} is already offline", reference),
            None => println!("No speaker '{}'", reference),
        },
        Command::Return(reference) => match household.find(&reference) {
            Some(id) if household.return_speaker(&id) => {
                println!("{} is back and will show up on the next search", reference)
            }
            Some(_) => println!("{} is already online", reference),
            None => println!("No speaker '{}'", reference),
        },
        Command::Fail(reference) => match household.find(&reference).and_then(|id| household.toggle_failing(&id)) {
            Some(true) => println!("{} stopped answering", reference),
            Some(false) => println!("{} answers again", reference),
            None => println!("No speaker '{}'", reference),
        },
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
    Ok(())
}

fn print_status(service: &MuteService, json: bool) -> Result<()> {
    if json {
        let status = serde_json::to_string(&service.status()).context("Failed to serialize status")?;
        println!("{}", status);
    } else {
        println!("{}", service.current_status_summary());
    }
    Ok(())
}

fn print_change(change: &StatusChange) {
    match change {
        StatusChange::Muted { seconds_remaining, .. } | StatusChange::Extended { seconds_remaining } => {
            println!("Muted. Seconds until unmute: {}", seconds_remaining)
        }
        StatusChange::Tick { seconds_remaining } if seconds_remaining % 5 == 0 => {
            println!("Seconds until unmute: {}", seconds_remaining)
        }
        StatusChange::Unmuted => println!("Unmuted"),
        StatusChange::NetworkConnected(network) => println!("Connected to {}", network),
        StatusChange::NetworkDisconnected => println!("No wi-fi"),
        other => debug!(change = ?other, "Status change"),
    }
}

/// Feed simulated discovery results into the service
async fn pump_discovery(service: Arc<MuteService>, mut events: mpsc::UnboundedReceiver<DiscoveryEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            DiscoveryEvent::Appeared(id, name) => service.on_device_appeared(id, name),
            DiscoveryEvent::Disappeared(id) => service.on_device_disappeared(&id),
        }
    }
}
