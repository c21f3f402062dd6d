//! Port Allocation
//!
//! Owns the reserved range of ports the match-runner processes bind to.
//! Every port is in exactly one of two sets, available or in-use, and the
//! two sets always partition the configured range.

use std::collections::BTreeSet;
use std::ops::RangeInclusive;

use thiserror::Error;
use tokio::sync::Mutex;

/// Default allocation range: the IANA dynamic/ephemeral block.
pub const DEFAULT_PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

/// Port allocation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortError {
    /// Every port in the configured range is in use.
    #[error("no ports available in the configured range")]
    Exhausted,
}

/// Exclusive allocator over a finite port range.
///
/// `acquire` never blocks waiting for a port; callers decide what to do
/// on exhaustion.
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    inner: Mutex<Partition>,
}

struct Partition {
    available: BTreeSet<u16>,
    in_use: BTreeSet<u16>,
}

impl PortAllocator {
    /// Allocator with every port in `range` available.
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range: range.clone(),
            inner: Mutex::new(Partition {
                available: range.collect(),
                in_use: BTreeSet::new(),
            }),
        }
    }

    /// The configured range.
    pub fn range(&self) -> RangeInclusive<u16> {
        self.range.clone()
    }

    /// Take the lowest available port and mark it in-use.
    pub async fn acquire(&self) -> Result<u16, PortError> {
        let mut inner = self.inner.lock().await;
        let port = inner
            .available
            .iter()
            .next()
            .copied()
            .ok_or(PortError::Exhausted)?;
        inner.available.remove(&port);
        inner.in_use.insert(port);
        Ok(port)
    }

    /// Return a port to the available set.
    ///
    /// A no-op for ports that are already available or outside the
    /// configured range, so double release is always safe.
    pub async fn release(&self, port: u16) {
        let mut inner = self.inner.lock().await;
        if inner.in_use.remove(&port) {
            inner.available.insert(port);
        }
    }

    /// Number of ports currently available.
    pub async fn available_count(&self) -> usize {
        self.inner.lock().await.available.len()
    }

    /// Number of ports currently in use.
    pub async fn in_use_count(&self) -> usize {
        self.inner.lock().await.in_use.len()
    }

    /// Whether `port` is currently marked in-use.
    pub async fn is_in_use(&self, port: u16) -> bool {
        self.inner.lock().await.in_use.contains(&port)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}
