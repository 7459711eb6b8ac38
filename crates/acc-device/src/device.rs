//! PCIe ATS accelerator endpoint
//!
//! # Scheduling
//!
//! ```text
//!  MMIO write CTRL ──► Dispatcher ──► pending FIFO ──► run_pending()
//!                                                        │  one Worker at a time,
//!                                                        │  run to completion
//!  InvalidationSender ──► channel ──► drained between requests and at
//!                                     every Worker suspension point
//! ```
//!
//! Nothing runs on a CTRL write itself; the owner drives the device by
//! calling [`PcieAccelerator::run_pending`]. The host-side driver in
//! [`crate::host`] does this while it polls STATUS.

use crate::atc::AddressTranslationCache;
use crate::config::{AcceleratorConfig, TransportFailurePolicy};
use crate::dispatch::{Dispatcher, WorkRequest};
use crate::error::{AccError, Result};
use crate::invalidation::{InvalidationHandler, InvalidationNotice, InvalidationSender};
use crate::registers::{BusTransaction, RegisterFile, RegisterWrite};
use crate::transport::{AtsService, PhysMemory};
use crate::workers::{WorkOutcome, Workers};
use acc_chip::bar;
use std::collections::VecDeque;
use tracing::{debug, error, info, warn};

/// Accelerator endpoint
#[derive(Debug)]
pub struct PcieAccelerator<A, M> {
    config: AcceleratorConfig,
    regs: RegisterFile,
    atc: AddressTranslationCache,
    invalidations: InvalidationHandler,
    ats: A,
    mem: M,
    pending: VecDeque<WorkRequest>,
    halted: bool,
    completed: u64,
}

impl<A: AtsService, M: PhysMemory> PcieAccelerator<A, M> {
    /// Create an accelerator with the default configuration.
    pub fn new(ats: A, mem: M) -> Self {
        Self::build(AcceleratorConfig::default(), ats, mem)
    }

    /// Create an accelerator with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration does not validate.
    pub fn with_config(config: AcceleratorConfig, ats: A, mem: M) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, ats, mem))
    }

    fn build(config: AcceleratorConfig, ats: A, mem: M) -> Self {
        info!(
            "PCIe accelerator up: granule={:#x} transport_failure={:?}",
            config.granule, config.transport_failure
        );
        Self {
            atc: AddressTranslationCache::new(config.granule),
            config,
            regs: RegisterFile::new(),
            invalidations: InvalidationHandler::new(),
            ats,
            mem,
            pending: VecDeque::new(),
            halted: false,
            completed: 0,
        }
    }

    // ── MMIO ─────────────────────────────────────────────────────────────────

    /// Serve a BAR transaction.
    ///
    /// # Errors
    ///
    /// Returns a bus error for BARs other than BAR0 and for malformed
    /// accesses; no state changes in that case.
    pub fn bar_transport(&mut self, bar_nr: u32, txn: &mut BusTransaction<'_>) -> Result<()> {
        if bar_nr != bar::bar0::INDEX {
            return Err(AccError::bus_error(txn.offset, format!("no BAR{bar_nr}")));
        }
        if let RegisterWrite::Control(value) = self.regs.transport(txn)? {
            self.dispatch(value);
        }
        Ok(())
    }

    /// PCI configuration transactions are acknowledged without effect.
    ///
    /// # Errors
    ///
    /// Never fails; the signature matches the BAR path.
    pub fn config_access(&mut self, txn: &mut BusTransaction<'_>) -> Result<()> {
        debug!("Config access at {:#x} acknowledged", txn.offset);
        Ok(())
    }

    /// 4-byte BAR0 read.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed 4-byte access; kept fallible to match
    /// the bus path.
    pub fn read32(&mut self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.bar_transport(bar::bar0::INDEX, &mut BusTransaction::read(offset, &mut buf))?;
        Ok(u32::from_le_bytes(buf))
    }

    /// 4-byte BAR0 write.
    ///
    /// # Errors
    ///
    /// Never fails for a well-formed 4-byte access; kept fallible to match
    /// the bus path.
    pub fn write32(&mut self, offset: u64, value: u32) -> Result<()> {
        let mut buf = value.to_le_bytes();
        self.bar_transport(bar::bar0::INDEX, &mut BusTransaction::write(offset, &mut buf))
    }

    fn dispatch(&mut self, ctrl: u32) {
        if self.halted {
            warn!("CTRL {ctrl:#x} dropped: device halted");
            return;
        }
        if let Some(request) = Dispatcher::dispatch(ctrl, &self.regs) {
            self.pending.push_back(request);
        }
    }

    // ── Scheduling ───────────────────────────────────────────────────────────

    /// True if triggered work is waiting.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Run every queued request, one Worker at a time, each to completion.
    ///
    /// Returns the number of requests completed.
    ///
    /// # Errors
    ///
    /// Returns [`AccError::Halted`] while the device is halted, and the
    /// transport error itself when a fail-fast failure halts it.
    pub fn run_pending(&mut self) -> Result<usize> {
        let mut ran = 0;
        loop {
            if self.halted {
                return Err(AccError::Halted);
            }
            self.invalidations.drain(&mut self.atc);
            let Some(request) = self.pending.pop_front() else {
                break;
            };
            match self.execute(request) {
                Ok(_) => {}
                Err(e) => match self.config.transport_failure {
                    TransportFailurePolicy::FailFast => {
                        error!("Halting on {request:?}: {e}");
                        self.halted = true;
                        return Err(e);
                    }
                    TransportFailurePolicy::ReportError => {
                        warn!("{request:?} failed: {e}");
                        self.regs.fail();
                    }
                },
            }
            ran += 1;
            self.completed += 1;
        }
        Ok(ran)
    }

    /// Run a single request immediately, bypassing CTRL and the queue.
    ///
    /// # Errors
    ///
    /// Returns error if a physical transaction fails (STATUS untouched).
    pub fn execute(&mut self, request: WorkRequest) -> Result<WorkOutcome> {
        let Self {
            config,
            regs,
            atc,
            invalidations,
            ats,
            mem,
            ..
        } = self;
        Workers {
            atc,
            invalidations,
            regs,
            ats,
            mem,
            granule: config.granule,
        }
        .execute(request)
    }

    // ── Invalidation ─────────────────────────────────────────────────────────

    /// Handle for posting invalidation notices.
    pub fn invalidation_sender(&self) -> InvalidationSender {
        self.invalidations.sender()
    }

    /// Apply one invalidation notice right away. Returns regions dropped.
    pub fn handle_invalidation(&mut self, notice: InvalidationNotice) -> usize {
        self.invalidations.handle(&mut self.atc, notice)
    }

    /// Apply every queued notice now. Returns notices applied.
    pub fn drain_invalidations(&mut self) -> usize {
        self.invalidations.drain(&mut self.atc)
    }

    // ── Reset ────────────────────────────────────────────────────────────────

    /// Reset line asserted: registers return to zero and a halted device
    /// becomes usable again. Queued requests and the cache survive unless
    /// `flush_atc_on_reset` is set.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.halted = false;
        if self.config.flush_atc_on_reset {
            self.atc.flush();
        }
        info!("Reset: registers cleared, {} regions cached", self.atc.len());
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Configuration in use
    pub const fn config(&self) -> &AcceleratorConfig {
        &self.config
    }

    /// Register file
    pub const fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    /// Translation cache
    pub const fn atc(&self) -> &AddressTranslationCache {
        &self.atc
    }

    /// Translation agent
    pub const fn ats(&self) -> &A {
        &self.ats
    }

    /// Translation agent, mutably
    pub fn ats_mut(&mut self) -> &mut A {
        &mut self.ats
    }

    /// Physical memory
    pub const fn memory(&self) -> &M {
        &self.mem
    }

    /// Physical memory, mutably
    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    /// True after a fail-fast transport error, until reset
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Requests completed since creation
    pub const fn completed(&self) -> u64 {
        self.completed
    }
}
