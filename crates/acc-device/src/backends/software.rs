// SPDX-License-Identifier: AGPL-3.0-only

//! Software (in-process) collaborators
//!
//! Stand-ins for the far side of the link so the accelerator runs without a
//! simulator or hardware:
//!
//! 1. **`SoftwareIommu`**: the translation agent. Holds IOVA→physical
//!    mappings set up with `map_dma()`, answers ATS requests from them, and
//!    posts an invalidation when a range is unmapped.
//!
//! 2. **`HostMemory`**: flat physical memory at a base address.
//!
//! ## Granules
//!
//! ```text
//! request 0x8123 ─► mapping [0x8000, 0x10000) → phys 0x4000_0000
//!                   granule 4K  → {phys 0x4000_0000, len 0x1000}
//!                   granule 32K → {phys 0x4000_0000, len 0x8000}  if the whole
//!                                  aligned 32K block is mapped and the
//!                                  physical side is 32K aligned, else 4K
//! ```

use crate::atc::Attrs;
use crate::config::AcceleratorConfig;
use crate::device::PcieAccelerator;
use crate::error::{AccError, Result};
use crate::invalidation::InvalidationSender;
use crate::transport::{AtsService, PhysMemory, Translation, TranslationRequest};
use acc_chip::ats::{self, SZ_4K};
use bytes::BytesMut;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Accelerator wired to the software collaborators
pub type SoftwareAccelerator = PcieAccelerator<SoftwareIommu, HostMemory>;

/// One IOVA→physical mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IommuMapping {
    /// IO virtual address (what the accelerator sees)
    pub iova: u64,
    /// Physical address
    pub phys: u64,
    /// Size in bytes
    pub size: u64,
    /// Permissions granted through this mapping
    pub perms: Attrs,
}

impl IommuMapping {
    const fn contains(&self, iova: u64) -> bool {
        iova >= self.iova && iova - self.iova < self.size
    }

    const fn overlaps(&self, iova: u64, size: u64) -> bool {
        iova < self.iova.saturating_add(self.size) && self.iova < iova.saturating_add(size)
    }
}

/// Software IOMMU answering ATS translation requests
#[derive(Debug)]
pub struct SoftwareIommu {
    page_size: u64,
    granule: u64,
    mappings: Vec<IommuMapping>,
    invalidations: Option<InvalidationSender>,
    requests: u64,
}

impl Default for SoftwareIommu {
    fn default() -> Self {
        Self::new(SZ_4K)
    }
}

impl SoftwareIommu {
    /// Create an IOMMU with `page_size` pages (a power of two).
    pub const fn new(page_size: u64) -> Self {
        Self {
            page_size,
            granule: page_size,
            mappings: Vec::new(),
            invalidations: None,
            requests: 0,
        }
    }

    /// Prefer answering with `granule`-sized translations where the mapping
    /// allows it.
    #[must_use]
    pub const fn with_granule(mut self, granule: u64) -> Self {
        self.granule = granule;
        self
    }

    /// Post invalidations for unmapped ranges to `tx`.
    pub fn attach_invalidations(&mut self, tx: InvalidationSender) {
        self.invalidations = Some(tx);
    }

    /// Current mappings
    pub fn mappings(&self) -> &[IommuMapping] {
        &self.mappings
    }

    /// Translation requests served (granted or declined)
    pub const fn requests(&self) -> u64 {
        self.requests
    }

    /// Map `[iova, iova + size)` to `[phys, phys + size)` with `perms`.
    ///
    /// # Errors
    ///
    /// Returns error if the range is empty, not page aligned, or overlaps
    /// an existing mapping.
    pub fn map_dma(&mut self, iova: u64, phys: u64, size: u64, perms: Attrs) -> Result<()> {
        let mask = self.page_size - 1;
        if size == 0 || (iova | phys | size) & mask != 0 {
            return Err(AccError::invalid_config(format!(
                "map {iova:#x}->{phys:#x} size {size:#x} is not page aligned"
            )));
        }
        if self.mappings.iter().any(|m| m.overlaps(iova, size)) {
            return Err(AccError::invalid_config(format!(
                "map {iova:#x} size {size:#x} overlaps an existing mapping"
            )));
        }
        self.mappings.push(IommuMapping {
            iova,
            phys,
            size,
            perms,
        });
        info!("IOMMU map {iova:#x} -> {phys:#x} size={size:#x} perms={perms:?}");
        Ok(())
    }

    /// Remove every mapping overlapping `[iova, iova + size)` and post one
    /// invalidation for the range. Returns the number of mappings removed.
    pub fn unmap_dma(&mut self, iova: u64, size: u64) -> usize {
        let before = self.mappings.len();
        self.mappings.retain(|m| !m.overlaps(iova, size));
        let removed = before - self.mappings.len();
        info!("IOMMU unmap {iova:#x} size={size:#x}: {removed} mappings");

        if let Some(tx) = &self.invalidations {
            if !tx.invalidate(iova, size) {
                warn!("Invalidation for {iova:#x} not delivered: accelerator gone");
            }
        }
        removed
    }

    /// Pick the largest allowed granule around `addr` inside `m`.
    fn granule_for(&self, m: &IommuMapping, addr: u64) -> u64 {
        if self.granule > self.page_size {
            let base = ats::align_down(addr, self.granule);
            let fits = base >= m.iova
                && base.saturating_add(self.granule) <= m.iova.saturating_add(m.size);
            if fits && (m.phys + (base - m.iova)) & (self.granule - 1) == 0 {
                return self.granule;
            }
        }
        self.page_size
    }
}

impl AtsService for SoftwareIommu {
    fn translate(&mut self, request: &TranslationRequest) -> Result<Translation> {
        self.requests += 1;
        let addr = request.virt_addr;
        let Some(m) = self.mappings.iter().find(|m| m.contains(addr)).copied() else {
            debug!("IOMMU: no mapping for {addr:#x}");
            return Err(AccError::TranslationDeclined { virt_addr: addr });
        };

        let length = self.granule_for(&m, addr);
        let base = ats::align_down(addr, length);
        Ok(Translation {
            phys_addr: m.phys + (base - m.iova),
            length,
            attrs: request.attrs & m.perms,
        })
    }
}

/// Flat physical memory `[base, base + size)`
#[derive(Debug, Clone)]
pub struct HostMemory {
    base: u64,
    data: BytesMut,
    reads: u64,
    writes: u64,
}

impl HostMemory {
    /// Zero-filled memory of `size` bytes at physical `base`.
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            base,
            data: BytesMut::zeroed(size),
            reads: 0,
            writes: 0,
        }
    }

    /// Memory at `base` initialised with `contents`, zero padded to `size`.
    pub fn with_contents(base: u64, contents: &[u8], size: usize) -> Self {
        let mut mem = Self::new(base, size.max(contents.len()));
        mem.data[..contents.len()].copy_from_slice(contents);
        mem
    }

    /// Physical base
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Entire backing store
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Read transactions served
    pub const fn reads(&self) -> u64 {
        self.reads
    }

    /// Write transactions served
    pub const fn writes(&self) -> u64 {
        self.writes
    }

    /// Bytes at `[phys, phys + len)`, host view (no transaction counted).
    ///
    /// # Errors
    ///
    /// Returns error if the range is outside this memory.
    pub fn peek(&self, phys: u64, len: usize) -> Result<&[u8]> {
        let r = self.range(phys, len)?;
        Ok(&self.data[r])
    }

    /// Store `bytes` at `phys`, host view (no transaction counted).
    ///
    /// # Errors
    ///
    /// Returns error if the range is outside this memory.
    pub fn poke(&mut self, phys: u64, bytes: &[u8]) -> Result<()> {
        let r = self.range(phys, bytes.len())?;
        self.data[r].copy_from_slice(bytes);
        Ok(())
    }

    fn range(&self, phys: u64, len: usize) -> Result<Range<usize>> {
        let start = phys
            .checked_sub(self.base)
            .and_then(|off| usize::try_from(off).ok())
            .ok_or_else(|| AccError::transport(phys, "below host memory base"))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                AccError::transport(phys, format!("{len} bytes past end of host memory"))
            })?;
        Ok(start..end)
    }
}

impl PhysMemory for HostMemory {
    fn read(&mut self, phys_addr: u64, buf: &mut [u8]) -> Result<()> {
        let r = self.range(phys_addr, buf.len())?;
        buf.copy_from_slice(&self.data[r]);
        self.reads += 1;
        Ok(())
    }

    fn write(&mut self, phys_addr: u64, data: &[u8]) -> Result<()> {
        let r = self.range(phys_addr, data.len())?;
        self.data[r].copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }
}

impl PcieAccelerator<SoftwareIommu, HostMemory> {
    /// Accelerator over a software IOMMU and host memory, with IOMMU unmaps
    /// delivered to the accelerator's invalidation channel.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration does not validate.
    pub fn software(
        config: AcceleratorConfig,
        iommu: SoftwareIommu,
        memory: HostMemory,
    ) -> Result<Self> {
        let mut dev = Self::with_config(config, iommu, memory)?;
        let tx = dev.invalidation_sender();
        dev.ats_mut().attach_invalidations(tx);
        Ok(dev)
    }
}
