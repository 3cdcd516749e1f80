//! Download the log from a probe which streams it on `fff3` after being sent the `AA55` command.

use bluez_async::uuid_from_u16;
use clap::Parser;
use eyre::Report;
use gatt_stream::{Activation, SessionConfig};
use gatt_tools::config::{resolve_address, Config};
use gatt_tools::notify::{bluez_transport, stream};
use std::path::PathBuf;
use std::time::Duration;

/// The probe both streams its log and takes commands on this characteristic.
const LOG_CHARACTERISTIC: u16 = 0xfff3;
const ACTIVATION_COMMAND: [u8; 2] = [0xAA, 0x55];
const LOG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(name = "gatt-logs", version)]
#[command(about = "Download and decode the temperature log of a probe")]
struct Args {
    /// MAC address (or configured device name) of the probe.
    address: String,

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

    let characteristic = uuid_from_u16(LOG_CHARACTERISTIC);
    let session_config = SessionConfig {
        address,
        notify: characteristic,
        activation: Some(Activation {
            characteristic,
            payload: ACTIVATION_COMMAND.to_vec(),
            ack_required: config.write_with_response,
        }),
        timeout: LOG_TIMEOUT,
    };

    let transport = bluez_transport().await?;
    stream(&transport, session_config).await
}
