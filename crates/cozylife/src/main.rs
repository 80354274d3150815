use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use cozylife::capability::classify::DEFAULT_GANGS;
use cozylife::capability::switch;
use cozylife::config::LoggingConfig;
use cozylife::poller::EVENT_CHANNEL_SIZE;
use cozylife::protocol::AttributeMap;
use cozylife::protocol::Dpid;
use cozylife::protocol::DEFAULT_PORT;
use cozylife::scan::parse_ip_range;
use cozylife::scan::ScanOptions;
use cozylife::Config;
use cozylife::Device;
use cozylife::DeviceIdentity;
use cozylife::DeviceKind;
use cozylife::DeviceOptions;
use cozylife::DeviceState;
use cozylife::LightCommand;
use cozylife::LightState;
use cozylife::LogLevel;
use cozylife::PollEvent;
use cozylife::Poller;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::prelude::*;

/// Control CozyLife switches and lights on the local network.
#[derive(Parser, Debug)]
#[command(name = "cozylife", version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level, overriding the config file
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Device port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Timeout per request in milliseconds (scans default to 2000)
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show device identity and supported attributes
    Info { host: String },

    /// Show current attribute values
    Query { host: String },

    /// Write raw attribute values, e.g. `1=255 4=500`
    Set {
        host: String,
        #[arg(required = true, value_parser = parse_assignment)]
        values: Vec<(Dpid, Value)>,
    },

    /// Turn a light on or off
    Light {
        host: String,
        power: Power,

        /// Brightness (0-255)
        #[arg(long)]
        brightness: Option<u8>,

        /// Color temperature in Kelvin
        #[arg(long, conflicts_with = "hs")]
        kelvin: Option<u32>,

        /// Hue (0-360) and saturation (0-100), e.g. `240,100`
        #[arg(long, value_parser = parse_hs)]
        hs: Option<(f64, f64)>,
    },

    /// Switch one gang of a multi-way switch
    Gang {
        host: String,
        /// Gang number, starting at 0
        gang: u8,
        power: Power,
    },

    /// Find devices in an address range, e.g. `192.168.1.1-192.168.1.254`
    Scan { range: String },

    /// Poll every configured device until interrupted
    Run {
        #[arg(default_value = "cozylife.toml")]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Power {
    On,
    Off,
}

fn parse_assignment(s: &str) -> Result<(Dpid, Value), String> {
    let (dpid, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected DPID=VALUE, got `{}`", s))?;
    let dpid = dpid
        .parse::<Dpid>()
        .map_err(|e| format!("invalid DPID `{}`: {}", dpid, e))?;
    // Bare words are sent as strings.
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((dpid, value))
}

fn parse_hs(s: &str) -> Result<(f64, f64), String> {
    let (h, sat) = s
        .split_once(',')
        .ok_or_else(|| format!("expected HUE,SATURATION, got `{}`", s))?;
    let h = h.trim().parse().map_err(|e| format!("invalid hue: {}", e))?;
    let sat = sat
        .trim()
        .parse()
        .map_err(|e| format!("invalid saturation: {}", e))?;
    Ok((h, sat))
}

fn init_logging(logging: &LoggingConfig, level: Option<LogLevel>) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(logging.filter(level))
        .init();
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct InfoOutput<'a> {
    #[serde(flatten)]
    identity: &'a DeviceIdentity,
    kind: Option<DeviceKind>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.command {
        Command::Run { config } => Some(
            Config::from_file(config)
                .with_context(|| format!("Failed to load config from {}", config.display()))?,
        ),
        _ => None,
    };
    init_logging(
        config
            .as_ref()
            .map(|config| &config.logging)
            .unwrap_or(&LoggingConfig::default()),
        args.log_level,
    );

    let timeout = |default_ms| Duration::from_millis(args.timeout_ms.unwrap_or(default_ms));
    let device_at = |host: &str| {
        Device::with_options(&DeviceOptions {
            port: args.port,
            timeout: timeout(3000),
            ..DeviceOptions::new(host)
        })
    };

    match &args.command {
        Command::Info { host } => {
            let device = device_at(host);
            let identity = device
                .try_refresh_identity()
                .await
                .with_context(|| format!("Failed to query device info from {}", host))?;
            print_json(&InfoOutput {
                identity: &identity,
                kind: device.kind(),
            })?;
        }
        Command::Query { host } => {
            let state = device_at(host)
                .try_query_state()
                .await
                .with_context(|| format!("Failed to query state from {}", host))?;
            print_json(&state)?;
        }
        Command::Set { host, values } => {
            let attributes: AttributeMap = values.iter().cloned().collect();
            device_at(host)
                .try_set_state(attributes)
                .await
                .with_context(|| format!("Failed to set state on {}", host))?;
        }
        Command::Light {
            host,
            power,
            brightness,
            kelvin,
            hs,
        } => {
            let device = device_at(host);
            device
                .try_refresh_identity()
                .await
                .with_context(|| format!("Failed to query device info from {}", host))?;

            let ok = match power {
                Power::On => {
                    let command = LightCommand {
                        brightness: *brightness,
                        hs_color: *hs,
                        color_temp_kelvin: *kelvin,
                    };
                    device.turn_on_light(&command).await
                }
                Power::Off => device.turn_off_light().await,
            };
            if !ok {
                bail!("{} did not accept the light command", host);
            }

            let features = device.light_features()?;
            let state = device
                .try_query_state()
                .await
                .with_context(|| format!("Failed to query state from {}", host))?;
            print_json(&LightState::from_attributes(&state, &features))?;
        }
        Command::Gang { host, gang, power } => {
            let device = device_at(host);
            let mut state = device
                .try_query_state()
                .await
                .with_context(|| format!("Failed to query state from {}", host))?;
            if !device.set_gang(&mut state, *gang, *power == Power::On).await {
                bail!("{} did not accept the gang command", host);
            }
            let gangs = gang.saturating_add(1).max(DEFAULT_GANGS);
            print_json(&gang_states(switch::bitmask(&state), gangs))?;
        }
        Command::Scan { range } => {
            let addresses = parse_ip_range(range)?;
            let options = ScanOptions {
                port: args.port,
                timeout: timeout(2000),
                ..Default::default()
            };
            let report = cozylife::scan(&addresses, &options).await;
            print_json(&report)?;
        }
        Command::Run { .. } => {
            if let Some(config) = config {
                tracing::info!("cozylife starting");
                run(config).await?;
            }
        }
    }

    Ok(())
}

fn gang_states(mask: u64, gangs: u8) -> Vec<bool> {
    (0..gangs).map(|gang| switch::gang_is_on(mask, gang)).collect()
}

/// One-line summary of a polled state for the log.
fn describe(device: &Device, state: &DeviceState) -> String {
    match device.kind() {
        Some(DeviceKind::Light) => match device.light_features() {
            Ok(features) => format!("{:?}", LightState::from_attributes(state, &features)),
            Err(_) => format!("{:?}", state),
        },
        Some(DeviceKind::Switch { gangs }) => {
            format!("gangs {:?}", gang_states(switch::bitmask(state), gangs))
        }
        Some(DeviceKind::Unsupported) | None => format!("{:?}", state),
    }
}

async fn run(config: Config) -> Result<()> {
    if config.devices.is_empty() {
        bail!("No devices configured");
    }

    let (event_tx, mut event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let mut devices: HashMap<String, Arc<Device>> = HashMap::new();
    let mut handles = Vec::new();

    for (name, options) in config.device_options() {
        tracing::info!("[{}] Adding device at {}:{}", name, options.host, options.port);
        let device = Arc::new(Device::with_options(&options));
        let poller = Poller::new(name, device.clone()).with_interval(config.poll_interval());
        handles.push(poller.spawn(event_tx.clone()));
        devices.insert(name.to_string(), device);
    }
    drop(event_tx);

    tracing::info!("All devices started, press Ctrl+C to exit");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                match result {
                    Ok(()) => tracing::info!("Received shutdown signal"),
                    Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
            event = event_rx.recv() => match event {
                Some(PollEvent::Updated { name, state }) => {
                    if let Some(device) = devices.get(&name) {
                        tracing::info!("[{}] {}", name, describe(device, &state));
                    }
                }
                Some(PollEvent::Failed { name, error }) => {
                    tracing::warn!("[{}] Device unavailable: {}", name, error);
                }
                None => break,
            },
        }
    }

    for handle in handles {
        handle.abort();
    }
    tracing::info!("cozylife shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_assignment() {
        assert_eq!(parse_assignment("4=500").unwrap(), (Dpid(4), json!(500)));
        assert_eq!(
            parse_assignment("7=scene").unwrap(),
            (Dpid(7), json!("scene"))
        );
        assert!(parse_assignment("4").is_err());
        assert!(parse_assignment("x=1").is_err());
    }

    #[test]
    fn test_parse_hs() {
        assert_eq!(parse_hs("240, 100").unwrap(), (240.0, 100.0));
        assert!(parse_hs("240").is_err());
    }

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from([
            "cozylife",
            "light",
            "10.0.0.7",
            "on",
            "--brightness",
            "128",
            "--hs",
            "120,50",
        ])
        .unwrap();
        match args.command {
            Command::Light {
                power, brightness, hs, ..
            } => {
                assert_eq!(power, Power::On);
                assert_eq!(brightness, Some(128));
                assert_eq!(hs, Some((120.0, 50.0)));
            }
            other => panic!("unexpected command {other:?}"),
        }

        assert!(Args::try_parse_from(["cozylife", "set", "10.0.0.7"]).is_err());
    }

    #[test]
    fn test_gang_states() {
        assert_eq!(gang_states(0b10, 2), vec![false, true]);
    }
}
