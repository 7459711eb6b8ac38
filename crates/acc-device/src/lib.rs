//! PCIe accelerator model with an ATS address translation cache.
//!
//! The endpoint performs four operations on host virtual addresses
//! (translate-ahead, single-word read, single-word write, streaming MD5),
//! resolving them through a remote translation agent and caching the
//! answers in an [`AddressTranslationCache`].
//!
//! # Component map
//!
//! ```text
//! BAR0 MMIO ─► RegisterFile ─► Dispatcher ─► Workers ─► PhysMemory
//!                                              │  ▲
//!                                              ▼  │ fill on miss
//!                                        AddressTranslationCache ◄─ AtsService
//!                                              ▲
//!                          InvalidationHandler ┘ ◄─ InvalidationSender
//! ```
//!
//! # Quick start
//!
//! ```
//! use acc_device::prelude::*;
//!
//! # fn main() -> acc_device::Result<()> {
//! let mut iommu = SoftwareIommu::default();
//! iommu.map_dma(0x8000, 0x4000_0000, 0x1000, Attrs::RWX)?;
//! let memory = HostMemory::with_contents(0x4000_0000, b"hello", 0x1000);
//! let mut dev = PcieAccelerator::software(AcceleratorConfig::default(), iommu, memory)?;
//!
//! let mut drv = AccDriver::new(&mut dev);
//! let (status, word) = drv.read_word(0x8000)?;
//! assert!(status.is_ok());
//! assert_eq!(word.to_le_bytes(), *b"hell");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod atc;
pub mod backends;
mod config;
mod device;
mod dispatch;
mod error;
pub mod host;
mod invalidation;
mod registers;
mod transport;
mod workers;

/// Register map and bit definitions (re-exported from acc-chip).
pub mod regs {
    pub use acc_chip::regs::*;
}

pub use atc::{AddressTranslationCache, Attrs, MemoryRegion};
pub use backends::{HostMemory, IommuMapping, SoftwareAccelerator, SoftwareIommu};
pub use config::{AcceleratorConfig, TransportFailurePolicy};
pub use device::PcieAccelerator;
pub use dispatch::{Dispatcher, Trigger, WorkRequest};
pub use error::{AccError, Result};
pub use host::{hex_digest, AccDriver, CompletionStatus};
pub use invalidation::{InvalidationHandler, InvalidationNotice, InvalidationSender};
pub use registers::{BusCommand, BusTransaction, RegisterFile, RegisterWrite};
pub use transport::{AtsService, PhysMemory, Translation, TranslationRequest};
pub use workers::{AccessOutcome, WorkOutcome};

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        AccDriver, AccError, AcceleratorConfig, AddressTranslationCache, AtsService, Attrs,
        HostMemory, InvalidationNotice, PcieAccelerator, PhysMemory, Result, SoftwareIommu,
        TransportFailurePolicy,
    };
}
