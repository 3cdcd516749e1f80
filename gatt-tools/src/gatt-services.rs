//! Connect to a BLE peripheral and list its services, characteristics and descriptors, along with
//! the value of every readable characteristic.

use clap::Parser;
use eyre::Report;
use gatt_stream::explore;
use gatt_stream::explore::{CharacteristicEntry, PeripheralInventory};
use gatt_tools::config::{resolve_address, Config};
use gatt_tools::display::{describe_uuid, describe_value, mark};
use gatt_tools::notify::bluez_transport;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "gatt-services", version)]
#[command(about = "List the GATT services and characteristics of a BLE peripheral")]
struct Args {
    /// MAC address (or configured device name) of the peripheral.
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

    let transport = bluez_transport().await?;
    println!("Connecting to {}...", address);
    let inventory = explore(&transport, &address).await?;
    print_inventory(&inventory);
    Ok(())
}

fn print_inventory(inventory: &PeripheralInventory) {
    for service in &inventory.services {
        println!(
            "Service {} ({})",
            describe_uuid(&service.uuid),
            if service.primary {
                "primary"
            } else {
                "secondary"
            }
        );
        for characteristic in &service.characteristics {
            print_characteristic(characteristic);
        }
        println!("{}", "=".repeat(100));
    }
    println!(
        "Found {} services with {} characteristics on {}.",
        inventory.services.len(),
        inventory.characteristic_count(),
        inventory.address
    );
}

fn print_characteristic(characteristic: &CharacteristicEntry) {
    let capabilities = characteristic.capabilities;
    println!("  Characteristic {}", describe_uuid(&characteristic.uuid));
    println!("    Properties: [{}]", capabilities);
    println!(
        "    Read: {} | Write: {} | Notify: {}",
        mark(capabilities.is_readable()),
        mark(capabilities.is_writable()),
        mark(capabilities.is_notifiable())
    );
    match &characteristic.value {
        Some(Ok(value)) => println!("    Value: {}", describe_value(value)),
        Some(Err(e)) => println!("    Value: error reading ({})", e),
        None => println!("    Value: N/A"),
    }
    for descriptor in &characteristic.descriptors {
        println!("    Descriptor {}", describe_uuid(descriptor));
    }
}
