//! A library for streaming notifications from a Bluetooth Low Energy peripheral and decoding them.
//!
//! A [`SessionController`] connects to a peripheral, enables notifications on a data
//! characteristic, optionally writes an activation command to a control characteristic, collects
//! everything which arrives within a timeout and then decodes it as a series of 2-byte
//! little-endian fixed-point readings.
//!
//! ```no_run
//! use gatt_stream::{
//!     parse_uuid, BluetoothSession, BluezTransport, SessionConfig, SessionController,
//! };
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), eyre::Report> {
//! let (_, session) = BluetoothSession::new().await?;
//! let transport = BluezTransport::new(session);
//! let config = SessionConfig {
//!     address: "A4:C1:38:00:00:01".parse()?,
//!     notify: parse_uuid("fff3")?,
//!     activation: None,
//!     timeout: Duration::from_secs(10),
//! };
//! let report = SessionController::new(&transport, config)
//!     .run(futures::future::pending())
//!     .await;
//! println!("{}", report.csv());
//! # Ok(())
//! # }
//! ```

mod bluez;
pub mod decode;
pub mod discovery;
pub mod explore;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod transport;

pub use bluez::{BluezConnection, BluezTransport};
pub use bluez_async::{BluetoothSession, MacAddress};
pub use decode::{decode, DecodeWarning, Decoded, Reading};
pub use discovery::{ScanFilter, ScanSession};
pub use explore::{explore, ExploreError, PeripheralInventory};
pub use resolver::{parse_uuid, Capabilities, ParseUuidError, Requirement};
pub use session::{
    Activation, SessionConfig, SessionController, SessionFailure, SessionReport, SessionState,
};
pub use sink::{AccumulatorSink, Chunk, ChunkSender};
pub use transport::{Advertisement, ServiceTable, Transport, TransportError};
