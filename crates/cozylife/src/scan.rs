//! Finding devices on the local network by probing a range of addresses.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::device::Device;
use crate::device::DeviceIdentity;
use crate::device::DeviceOptions;
use crate::protocol::DEFAULT_PORT;

/// Most addresses a single scan will probe, one /24.
pub const MAX_SCAN_ADDRESSES: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid IPv4 address `{0}`")]
    InvalidAddress(String),
}

/// Expand `a.b.c.d-e.f.g.h` (or a single address) into the addresses to
/// probe. Reversed ranges are swapped; ranges longer than
/// [`MAX_SCAN_ADDRESSES`] are cut short.
pub fn parse_ip_range(range: &str) -> Result<Vec<Ipv4Addr>, RangeError> {
    let parse = |s: &str| {
        s.trim()
            .parse::<Ipv4Addr>()
            .map_err(|_| RangeError::InvalidAddress(s.trim().to_string()))
    };

    let Some((start, end)) = range.split_once('-') else {
        return Ok(vec![parse(range)?]);
    };
    let (mut start, mut end) = (u32::from(parse(start)?), u32::from(parse(end)?));
    if start > end {
        std::mem::swap(&mut start, &mut end);
    }

    let addresses: Vec<Ipv4Addr> = (start..=end)
        .take(MAX_SCAN_ADDRESSES)
        .map(Ipv4Addr::from)
        .collect();
    if u64::from(end - start) + 1 > MAX_SCAN_ADDRESSES as u64 {
        warn!(
            "IP range {} too large, scanning first {} addresses",
            range.trim(),
            MAX_SCAN_ADDRESSES
        );
    }
    Ok(addresses)
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub port: u16,

    /// Handshake timeout per address
    pub timeout: Duration,

    /// Probes in flight at once
    pub concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(2),
            concurrency: 10,
        }
    }
}

/// A device that answered the handshake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Discovered {
    pub address: Ipv4Addr,
    pub identity: DeviceIdentity,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScanReport {
    /// Responding devices, ordered by address, one entry per device id
    pub found: Vec<Discovered>,
}

/// Probe every address with an identity handshake.
pub async fn scan(addresses: &[Ipv4Addr], options: &ScanOptions) -> ScanReport {
    info!(
        "Scanning {} addresses on port {}",
        addresses.len(),
        options.port
    );
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut probes = JoinSet::new();

    for &address in addresses {
        let permits = permits.clone();
        let device_options = DeviceOptions {
            port: options.port,
            timeout: options.timeout,
            ..DeviceOptions::new(address.to_string())
        };
        probes.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            probe(address, &device_options).await
        });
    }

    let mut report = ScanReport::default();
    while let Some(result) = probes.join_next().await {
        match result {
            Ok(Some(discovered)) => report.found.push(discovered),
            Ok(None) => {}
            Err(e) => warn!("Scan task failed: {}", e),
        }
    }
    report.found.sort_by_key(|d| d.address);
    dedup_by_device_id(&mut report.found);
    info!("Scan complete, found {} devices", report.found.len());
    report
}

/// Keep the first (lowest address) entry for each device id. A device with
/// several interfaces, or one that changed address mid-scan, answers more than
/// once.
fn dedup_by_device_id(found: &mut Vec<Discovered>) {
    let mut seen = HashSet::new();
    found.retain(|d| {
        let first = seen.insert(d.identity.device_id().to_string());
        if !first {
            debug!(
                "Ignoring duplicate of device {} at {}",
                d.identity.device_id(),
                d.address
            );
        }
        first
    });
}

async fn probe(address: Ipv4Addr, options: &DeviceOptions) -> Option<Discovered> {
    let device = Device::with_options(options);
    match device.try_refresh_identity().await {
        Ok(identity) => {
            debug!(
                "Discovered CozyLife device at {}: {}",
                address,
                identity.device_id()
            );
            Some(Discovered {
                address,
                identity: DeviceIdentity::clone(&identity),
            })
        }
        Err(e) => {
            debug!("No CozyLife device at {}: {}", address, e);
            None
        }
    }
}
