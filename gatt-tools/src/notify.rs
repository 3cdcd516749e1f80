//! Running a notification session from the command line and printing what it collected.

use crate::display::{format_chunk, hex_bytes};
use eyre::Report;
use futures::future::pending;
use gatt_stream::{
    BluetoothSession, BluezTransport, SessionConfig, SessionController, SessionReport,
};
use std::io::{self, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

/// An activation command given on the command line as hex, e.g. `AA55` or `0xaa55`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Payload(pub Vec<u8>);

impl FromStr for Payload {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim().trim_start_matches("0x");
        if digits.is_empty() {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        Ok(Payload(hex::decode(digits)?))
    }
}

/// Parse a duration given in (possibly fractional) seconds.
pub fn parse_seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s
        .parse()
        .map_err(|e| format!("Invalid number of seconds '{s}': {e}"))?;
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("Invalid duration '{s}': {e}"))
}

/// Open a transport on the system's BlueZ daemon.
pub async fn bluez_transport() -> Result<BluezTransport, Report> {
    let (_, session) = BluetoothSession::new().await?;
    Ok(BluezTransport::new(session))
}

/// Run a session until its timeout elapses or Ctrl+C is pressed, then print the raw chunks to
/// stderr and the decoded readings to stdout.
///
/// Returns an error naming the failed phase if the session failed, after printing whatever was
/// received before the failure.
pub async fn stream(transport: &BluezTransport, config: SessionConfig) -> Result<(), Report> {
    eprintln!(
        "Streaming notifications from {} on {} for {:?} (Ctrl+C to stop early)",
        config.address, config.notify, config.timeout
    );
    let start = Instant::now();
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Can't listen for Ctrl+C: {}", e);
            pending::<()>().await;
        }
    };
    let report = SessionController::new(transport, config)
        .run(interrupt)
        .await;

    print_report(
        &report,
        start,
        &mut io::stdout().lock(),
        &mut io::stderr().lock(),
    )?;
    report.outcome.map_err(Report::new)
}

/// Write the decoded readings as CSV to `out`, and everything else to `log`.
pub fn print_report(
    report: &SessionReport,
    start: Instant,
    out: &mut impl Write,
    log: &mut impl Write,
) -> io::Result<()> {
    if report.interrupted {
        writeln!(log, "Interrupted, stopped early.")?;
    }
    for warning in &report.warnings {
        writeln!(log, "Warning: {}", warning)?;
    }

    writeln!(log, "Received {} chunks:", report.raw_stream.len())?;
    for chunk in &report.raw_stream {
        writeln!(log, "{}", format_chunk(chunk, start))?;
    }
    writeln!(
        log,
        "Accumulated {} bytes: {}",
        report.buffer.len(),
        hex_bytes(&report.buffer)
    )?;
    if let Some(warning) = &report.decode_warning {
        writeln!(log, "Warning: {}", warning)?;
    }

    if report.readings.is_empty() {
        writeln!(log, "No readings.")
    } else {
        writeln!(out, "{}", report.csv())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluez_async::uuid_from_u16;
    use gatt_stream::{decode, Chunk};

    #[test]
    fn parse_payload() {
        assert_eq!("AA55".parse::<Payload>(), Ok(Payload(vec![0xAA, 0x55])));
        assert_eq!(
            "0xaa5501".parse::<Payload>(),
            Ok(Payload(vec![0xAA, 0x55, 0x01]))
        );
        assert!("AA5".parse::<Payload>().is_err());
        assert!("XY".parse::<Payload>().is_err());
        assert!("".parse::<Payload>().is_err());
    }

    fn report(buffer: &[u8], interrupted: bool) -> SessionReport {
        let decoded = decode(buffer);
        let start = Instant::now();
        SessionReport {
            transitions: vec![],
            warnings: vec![],
            raw_stream: vec![Chunk {
                characteristic: uuid_from_u16(0xfff3),
                received_at: start,
                data: buffer.to_vec(),
            }],
            buffer: buffer.to_vec(),
            readings: decoded.readings,
            decode_warning: decoded.warning,
            interrupted,
            outcome: Ok(()),
        }
    }

    #[test]
    fn only_readings_go_to_stdout() {
        let mut out = vec![];
        let mut log = vec![];
        print_report(
            &report(&[0x1C, 0x09, 0x20, 0x09, 0xFF], true),
            Instant::now(),
            &mut out,
            &mut log,
        )
        .unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "23.32,23.36\n");
        let log = String::from_utf8(log).unwrap();
        assert!(log.contains("Interrupted"), "{}", log);
        assert!(log.contains("Received 1 chunks"), "{}", log);
        assert!(log.contains("Warning: "), "{}", log);
    }

    #[test]
    fn no_readings_leaves_stdout_empty() {
        let mut out = vec![];
        let mut log = vec![];
        print_report(&report(&[], false), Instant::now(), &mut out, &mut log).unwrap();

        assert!(out.is_empty());
        assert!(String::from_utf8(log).unwrap().contains("No readings."));
    }

    #[test]
    fn parse_durations() {
        assert_eq!(parse_seconds("10"), Ok(Duration::from_secs(10)));
        assert_eq!(parse_seconds("0.5"), Ok(Duration::from_millis(500)));
        assert!(parse_seconds("-1").is_err());
        assert!(parse_seconds("ten").is_err());
    }
}
