use super::FileTransferUnit;
use crate::error::Cancelled;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{watch, Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cross-job gates for one orchestrated run: the priority-pending counter,
/// the large-file slot and the business-pause flag.
///
/// Every job consults it before each file. Nothing is held across files,
/// so a wait in one job never starves another once its condition clears.
/// Acquisition order is fixed: business pause, then priority drain, then
/// large-file slot.
pub struct GlobalCoordinator {
    priority_remaining: watch::Sender<u64>,
    business_paused: watch::Sender<bool>,
    large_slot: Semaphore,
    large_in_flight: AtomicUsize,
}

impl GlobalCoordinator {
    pub fn new(priority_files: u64) -> Self {
        Self {
            priority_remaining: watch::Sender::new(priority_files),
            business_paused: watch::Sender::new(false),
            large_slot: Semaphore::new(1),
            large_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn priority_remaining(&self) -> u64 {
        *self.priority_remaining.borrow()
    }

    /// Mark `count` priority units as processed. Saturates at zero.
    pub fn complete_priority(&self, count: u64) {
        if count == 0 {
            return;
        }
        self.priority_remaining.send_modify(|remaining| {
            *remaining = remaining.saturating_sub(count);
        });
        debug!("Priority files remaining: {}", self.priority_remaining());
    }

    pub fn is_business_paused(&self) -> bool {
        *self.business_paused.borrow()
    }

    pub fn set_business_paused(&self, paused: bool) {
        self.business_paused.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        });
    }

    /// Number of large transfers currently holding the slot (0 or 1).
    pub fn large_in_flight(&self) -> usize {
        self.large_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until no business process is detected.
    pub async fn wait_business_clear(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let mut rx = self.business_paused.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            cleared = rx.wait_for(|paused| !*paused) => cleared.map(|_| ()).map_err(|_| Cancelled),
        }
    }

    /// Wait until every priority unit of every running job is processed.
    pub async fn wait_priority_drained(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        let mut rx = self.priority_remaining.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Cancelled),
            drained = rx.wait_for(|remaining| *remaining == 0) => drained.map(|_| ()).map_err(|_| Cancelled),
        }
    }

    /// Take the system-wide large-file slot. Released when the permit drops.
    pub async fn acquire_large_slot(&self, cancel: &CancellationToken) -> Result<LargeFilePermit<'_>, Cancelled> {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            permit = self.large_slot.acquire() => permit.map_err(|_| Cancelled)?,
        };
        self.large_in_flight.fetch_add(1, Ordering::SeqCst);
        Ok(LargeFilePermit {
            _permit: permit,
            in_flight: &self.large_in_flight,
        })
    }

    /// Run the gates for one file in order. The returned admission holds
    /// the large-file slot when the unit needs it.
    pub async fn admit(&self, unit: &FileTransferUnit, cancel: &CancellationToken) -> Result<Admission<'_>, Cancelled> {
        self.wait_business_clear(cancel).await?;

        if !unit.is_priority {
            self.wait_priority_drained(cancel).await?;
        }

        let large = if unit.is_large {
            Some(self.acquire_large_slot(cancel).await?)
        } else {
            None
        };

        Ok(Admission { _large: large })
    }
}

/// Holds the large-file slot, if any, for the duration of one transfer.
pub struct Admission<'a> {
    _large: Option<LargeFilePermit<'a>>,
}

pub struct LargeFilePermit<'a> {
    _permit: SemaphorePermit<'a>,
    in_flight: &'a AtomicUsize,
}

impl Drop for LargeFilePermit<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
