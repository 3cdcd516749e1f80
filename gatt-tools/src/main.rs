//! Enable notifications on a characteristic, optionally write an activation command, and print the
//! readings received within a time window as comma-separated values.

use clap::Parser;
use eyre::Report;
use gatt_stream::{parse_uuid, Activation, SessionConfig};
use gatt_tools::config::{resolve_address, Config};
use gatt_tools::notify::{bluez_transport, parse_seconds, stream, Payload};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "gatt-notify", version)]
#[command(about = "Stream notifications from a BLE characteristic and decode them as readings")]
struct Args {
    /// MAC address (or configured device name) of the peripheral.
    address: String,

    /// Characteristic to enable notifications on, e.g. `fff3` or a full UUID.
    #[arg(value_parser = parse_uuid)]
    notify_uuid: Uuid,

    /// Characteristic to write the activation command to.
    #[arg(long, value_parser = parse_uuid, requires = "control_value")]
    control_uuid: Option<Uuid>,

    /// Activation command to write, in hex, e.g. `AA55`.
    #[arg(long, requires = "control_uuid")]
    control_value: Option<Payload>,

    /// How many seconds to collect notifications for.
    #[arg(short, long, value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Write the activation command as a request, waiting for the peripheral to acknowledge it.
    #[arg(long)]
    with_response: bool,

    /// Config file to use instead of `gatt-tools.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Report> {
    stable_eyre::install()?;
    pretty_env_logger::init();
    color_backtrace::install();

    let args = Args::parse();
    let config = Config::from_file(args.config.as_deref())?;
    let address = resolve_address(&args.address, &config.device_names()?)?;

    let activation = match (args.control_uuid, args.control_value) {
        (Some(characteristic), Some(Payload(payload))) => Some(Activation {
            characteristic,
            payload,
            ack_required: args.with_response || config.write_with_response,
        }),
        _ => None,
    };
    let session_config = SessionConfig {
        address,
        notify: args.notify_uuid,
        activation,
        timeout: args.timeout.unwrap_or(config.timeout),
    };

    let transport = bluez_transport().await?;
    stream(&transport, session_config).await
}
