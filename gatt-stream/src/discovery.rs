//! Scanning for advertising peripherals.

use crate::transport::{Advertisement, Transport, TransportError};
use bluez_async::MacAddress;
use std::collections::HashSet;
use std::time::Duration;

/// Which advertisements a scan should report.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ScanFilter {
    /// Only report named devices whose name contains this, ignoring case. Devices without a name
    /// are not affected by this filter.
    pub name_contains: Option<String>,
    /// Only report devices which advertise a non-blank name.
    pub only_named: bool,
}

impl ScanFilter {
    /// Whether the given advertisement passes the filter.
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        let named = advertisement.has_name();
        if self.only_named && !named {
            return false;
        }
        match (&self.name_contains, &advertisement.name) {
            (Some(pattern), Some(name)) if named => {
                name.to_lowercase().contains(&pattern.to_lowercase())
            }
            _ => true,
        }
    }
}

/// A single scan, which reports each matching peripheral once.
#[derive(Clone, Debug, Default)]
pub struct ScanSession {
    filter: ScanFilter,
    seen: HashSet<MacAddress>,
}

impl ScanSession {
    pub fn new(filter: ScanFilter) -> Self {
        Self {
            filter,
            seen: HashSet::new(),
        }
    }

    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// The number of distinct peripherals reported so far.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Offer an advertisement to the session. Returns it back if it passes the filter and its
    /// address hasn't already been reported.
    pub fn offer(&mut self, advertisement: Advertisement) -> Option<Advertisement> {
        if !self.filter.matches(&advertisement) {
            log::trace!("Filtered out {}", advertisement.address);
            return None;
        }
        if !self.seen.insert(advertisement.address) {
            return None;
        }
        Some(advertisement)
    }

    /// Scan with the given transport for `duration`, calling `on_device` once for each new
    /// matching peripheral. Returns the number of distinct peripherals found.
    pub async fn run<T: Transport>(
        &mut self,
        transport: &T,
        duration: Duration,
        mut on_device: impl FnMut(&Advertisement) + Send,
    ) -> Result<usize, TransportError> {
        self.seen.clear();
        log::info!("Scanning for {:?} with {:?}", duration, self.filter);
        let mut on_advertisement = |advertisement: Advertisement| {
            if let Some(advertisement) = self.offer(advertisement) {
                on_device(&advertisement);
            }
        };
        transport.scan(duration, &mut on_advertisement).await?;
        Ok(self.seen_count())
    }
}
