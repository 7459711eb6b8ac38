//! ATS invalidation handling
//!
//! Invalidation notices arrive asynchronously relative to the Workers. They
//! are queued on a channel and applied to the cache only at Worker
//! suspension points and between requests, never in the middle of a cache
//! lookup. A translation already turned into a physical address is not
//! re-checked after a notice lands.

use crate::atc::AddressTranslationCache;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::debug;

/// Inbound invalidation for `[virt_addr, virt_addr + length)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationNotice {
    /// Range start
    pub virt_addr: u64,
    /// Range length in bytes
    pub length: u64,
}

/// Cloneable sending side of the invalidation channel
#[derive(Debug, Clone)]
pub struct InvalidationSender {
    tx: Sender<InvalidationNotice>,
}

impl InvalidationSender {
    /// Post a notice. Returns `false` if the accelerator is gone.
    pub fn send(&self, notice: InvalidationNotice) -> bool {
        self.tx.send(notice).is_ok()
    }

    /// Post a notice for `[virt_addr, virt_addr + length)`.
    pub fn invalidate(&self, virt_addr: u64, length: u64) -> bool {
        self.send(InvalidationNotice { virt_addr, length })
    }
}

/// Receiving side: applies queued notices to a cache
#[derive(Debug)]
pub struct InvalidationHandler {
    rx: Receiver<InvalidationNotice>,
    // Keeps the channel connected so `sender()` always works.
    tx: Sender<InvalidationNotice>,
    applied: u64,
}

impl Default for InvalidationHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationHandler {
    /// Create a handler with a fresh unbounded channel.
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { rx, tx, applied: 0 }
    }

    /// A new sending handle for this handler's channel.
    pub fn sender(&self) -> InvalidationSender {
        InvalidationSender {
            tx: self.tx.clone(),
        }
    }

    /// Number of notices not yet applied.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Total notices applied since creation.
    pub const fn applied(&self) -> u64 {
        self.applied
    }

    /// Apply one notice immediately.
    pub fn handle(&mut self, atc: &mut AddressTranslationCache, notice: InvalidationNotice) -> usize {
        self.applied += 1;
        let removed = atc.invalidate(notice.virt_addr, notice.length);
        debug!(
            "Invalidation {:#x}+{:#x} applied, {removed} regions dropped",
            notice.virt_addr, notice.length
        );
        removed
    }

    /// Apply every queued notice in arrival order. Returns the number of
    /// notices applied.
    pub fn drain(&mut self, atc: &mut AddressTranslationCache) -> usize {
        let mut count = 0;
        while let Ok(notice) = self.rx.try_recv() {
            self.handle(atc, notice);
            count += 1;
        }
        count
    }
}
