//! Scan for advertising BLE peripherals and print what they advertise.

use clap::Parser;
use eyre::Report;
use gatt_stream::{Advertisement, MacAddress, ScanFilter, ScanSession};
use gatt_tools::config::{display_name, Config};
use gatt_tools::display::{describe_uuid, hex_bytes};
use gatt_tools::notify::{bluez_transport, parse_seconds};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "gatt-scan", version)]
#[command(about = "Scan for BLE peripherals, optionally filtering by name")]
struct Args {
    /// How many seconds to scan for.
    #[arg(short, long, value_parser = parse_seconds)]
    timeout: Option<Duration>,

    /// Only show devices whose name contains this, ignoring case. Devices without a name are
    /// still shown unless `--only-named` is also given.
    #[arg(short, long)]
    filter: Option<String>,

    /// Only show devices which advertise a name.
    #[arg(short = 'n', long)]
    only_named: bool,

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
    let names = config.device_names()?;
    let duration = args.timeout.unwrap_or(config.scan_duration);

    let mut mode = vec![if args.only_named {
        "named devices only".to_string()
    } else {
        "all devices".to_string()
    }];
    if let Some(filter) = &args.filter {
        mode.push(format!("name containing '{}'", filter));
    }
    println!("Scanning for {:?} ({})", duration, mode.join(", "));

    let transport = bluez_transport().await?;
    let mut session = ScanSession::new(ScanFilter {
        name_contains: args.filter,
        only_named: args.only_named,
    });
    let count = session
        .run(&transport, duration, |advertisement| {
            print_advertisement(advertisement, &names)
        })
        .await?;

    println!("Scan finished, found {} unique device(s).", count);
    Ok(())
}

fn print_advertisement(advertisement: &Advertisement, names: &HashMap<MacAddress, String>) {
    let name = display_name(
        &advertisement.address,
        advertisement.name.as_deref(),
        names,
    );
    println!("{}", name.unwrap_or("(no name)"));
    println!("  Address: {}", advertisement.address);
    match advertisement.rssi {
        Some(rssi) => println!("  RSSI: {} dBm", rssi),
        None => println!("  RSSI: N/A"),
    }
    match advertisement.tx_power {
        Some(tx_power) => println!("  TX power: {} dBm", tx_power),
        None => println!("  TX power: N/A"),
    }

    if advertisement.service_uuids.is_empty() {
        println!("  Services: none");
    } else {
        println!("  Services:");
        for uuid in &advertisement.service_uuids {
            println!("    {}", describe_uuid(uuid));
        }
    }

    if advertisement.manufacturer_data.is_empty() {
        println!("  Manufacturer data: none");
    } else {
        println!("  Manufacturer data:");
        let mut companies: Vec<_> = advertisement.manufacturer_data.iter().collect();
        companies.sort();
        for (company, data) in companies {
            println!("    0x{:04X}: {}", company, hex_bytes(data));
        }
    }

    if advertisement.service_data.is_empty() {
        println!("  Service data: none");
    } else {
        println!("  Service data:");
        for (uuid, data) in &advertisement.service_data {
            println!("    {}: {}", describe_uuid(uuid), hex_bytes(data));
        }
    }
    println!("{}", "-".repeat(60));
}
