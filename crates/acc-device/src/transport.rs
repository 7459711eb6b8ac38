//! External collaborators consumed by the accelerator core
//!
//! The accelerator never owns a bus. It talks to two remote parties:
//!
//! - an **ATS translation agent** answering `{virt_addr, requested}` with
//!   `{phys_addr, granule, granted}` or declining;
//! - a **physical memory transport** carrying already-translated reads and
//!   writes.
//!
//! Both calls are blocking from the Worker's point of view. There is no
//! timeout: a collaborator that never answers stalls the Worker.

use crate::atc::Attrs;
use crate::error::Result;
use std::fmt::Debug;

/// ATS translation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationRequest {
    /// Virtual address to translate (granule aligned by the cache)
    pub virt_addr: u64,
    /// Permissions requested
    pub attrs: Attrs,
}

/// Successful ATS translation response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    /// Physical base of the granule
    pub phys_addr: u64,
    /// Granule length in bytes
    pub length: u64,
    /// Permissions granted
    pub attrs: Attrs,
}

/// Remote address translation service
pub trait AtsService: Debug {
    /// Translate one granule.
    ///
    /// # Errors
    ///
    /// Returns error if the agent declines the request or the link fails.
    fn translate(&mut self, request: &TranslationRequest) -> Result<Translation>;
}

/// Physical memory transport
pub trait PhysMemory: Debug {
    /// Read `buf.len()` bytes starting at `phys_addr`.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    fn read(&mut self, phys_addr: u64, buf: &mut [u8]) -> Result<()>;

    /// Write `data` starting at `phys_addr`.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction fails.
    fn write(&mut self, phys_addr: u64, data: &[u8]) -> Result<()>;
}

impl<T: AtsService + ?Sized> AtsService for Box<T> {
    fn translate(&mut self, request: &TranslationRequest) -> Result<Translation> {
        (**self).translate(request)
    }
}

impl<T: PhysMemory + ?Sized> PhysMemory for Box<T> {
    fn read(&mut self, phys_addr: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read(phys_addr, buf)
    }

    fn write(&mut self, phys_addr: u64, data: &[u8]) -> Result<()> {
        (**self).write(phys_addr, data)
    }
}
