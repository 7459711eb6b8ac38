//! Address translation cache
//!
//! An insertion-ordered list of [`MemoryRegion`]s filled from ATS
//! responses. There is no dedup, no merge, no capacity bound and no
//! eviction: an entry lives until an invalidation removes it.
//!
//! Lookups scan in insertion order and the first region containing the
//! address wins; overlapping regions are not canonicalised.

use crate::error::AccError;
use crate::transport::{AtsService, TranslationRequest};
use acc_chip::ats;
use bitflags::bitflags;
use tracing::{debug, warn};

bitflags! {
    /// ATS permission bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attrs: u64 {
        /// Read permission
        const READ = ats::ATTR_READ;
        /// Write permission
        const WRITE = ats::ATTR_WRITE;
        /// Execute permission
        const EXEC = ats::ATTR_EXEC;
    }
}

impl Attrs {
    /// Read, write and execute; what every fill requests.
    pub const RWX: Self = Self::from_bits_truncate(ats::ATTR_RWX);
}

/// One cached virtual→physical granule
///
/// Built only from a successful translation response and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    virt_base: u64,
    phys_base: u64,
    length: u64,
    attrs: Attrs,
}

impl MemoryRegion {
    /// `length` must be non-zero; the cache rejects zero-length responses
    /// before getting here.
    pub(crate) const fn new(virt_base: u64, phys_base: u64, length: u64, attrs: Attrs) -> Self {
        Self {
            virt_base,
            phys_base,
            length,
            attrs,
        }
    }

    /// Virtual start address
    pub const fn virt_base(&self) -> u64 {
        self.virt_base
    }

    /// Physical start address
    pub const fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Length in bytes
    pub const fn length(&self) -> u64 {
        self.length
    }

    /// Granted permissions
    pub const fn attrs(&self) -> Attrs {
        self.attrs
    }

    /// Last virtual address covered (inclusive)
    pub const fn virt_end(&self) -> u64 {
        self.virt_base.saturating_add(self.length - 1)
    }

    /// True if `addr` lies in `[virt_base, virt_base + length)`.
    pub const fn contains(&self, addr: u64) -> bool {
        in_range(addr, self.virt_base, self.length)
    }

    /// `phys_base | (addr & (length - 1))`.
    ///
    /// Only meaningful for power-of-two granules aligned to their length,
    /// which the translation agent is trusted to return.
    pub const fn virt_to_phys(&self, addr: u64) -> u64 {
        self.phys_base | (addr & (self.length - 1))
    }
}

/// Half-open `[start, start + len)` membership without overflowing.
const fn in_range(addr: u64, start: u64, len: u64) -> bool {
    addr >= start && addr - start < len
}

/// Address translation cache
#[derive(Debug, Clone)]
pub struct AddressTranslationCache {
    granule: u64,
    regions: Vec<MemoryRegion>,
}

impl Default for AddressTranslationCache {
    fn default() -> Self {
        Self::new(ats::SZ_4K)
    }
}

impl AddressTranslationCache {
    /// Create an empty cache that aligns fills to `granule` (a power of two).
    pub const fn new(granule: u64) -> Self {
        Self {
            granule,
            regions: Vec::new(),
        }
    }

    /// Fill alignment granule
    pub const fn granule(&self) -> u64 {
        self.granule
    }

    /// Number of cached regions
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// True if nothing is cached
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Cached regions in insertion order
    pub fn regions(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }

    fn lookup(&self, addr: u64) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    /// True if some cached region contains `addr`.
    pub fn contains(&self, addr: u64) -> bool {
        self.lookup(addr).is_some()
    }

    /// Physical address for `addr` from the first matching region.
    pub fn virt_to_phys(&self, addr: u64) -> Option<u64> {
        self.lookup(addr).map(|r| r.virt_to_phys(addr))
    }

    /// The first region containing `addr`, by value.
    pub fn region(&self, addr: u64) -> Option<MemoryRegion> {
        self.lookup(addr).copied()
    }

    /// True if the first region containing `addr` grants any bit of `mask`.
    pub fn test_attr(&self, addr: u64, mask: Attrs) -> bool {
        self.lookup(addr).is_some_and(|r| r.attrs.intersects(mask))
    }

    /// Translate `[virt_addr, virt_addr + length)` through `ats` and cache
    /// the answers.
    ///
    /// The range is widened down to the fill granule, then one RWX request
    /// is issued per iteration for the current head. Each answer is cached
    /// at the request address aligned down to the returned granule, and the
    /// walk advances by that granule. The walk stops once the returned
    /// granules cover the remaining length, on the first declined request,
    /// or on a zero-length answer (which is never cached).
    ///
    /// Returns the number of regions added.
    pub fn request_fill<A: AtsService + ?Sized>(
        &mut self,
        ats: &mut A,
        virt_addr: u64,
        length: u64,
    ) -> usize {
        let mut remaining = length.saturating_add(ats::granule_offset(virt_addr, self.granule));
        let mut addr = ats::align_down(virt_addr, self.granule);
        let mut added = 0;

        while remaining > 0 {
            let request = TranslationRequest {
                virt_addr: addr,
                attrs: Attrs::RWX,
            };

            let translation = match ats.translate(&request) {
                Ok(t) => t,
                Err(e) => {
                    debug!("ATS fill stopped at {addr:#x}: {e}");
                    break;
                }
            };

            if translation.length == 0 {
                let e = AccError::invalid_translation(addr, "zero-length granule");
                warn!("ATS fill stopped: {e}");
                break;
            }

            let base = addr & !(translation.length - 1);
            debug!(
                "ATS {base:#x} -> {:#x} len={:#x} attrs={:?}",
                translation.phys_addr, translation.length, translation.attrs
            );
            self.regions.push(MemoryRegion::new(
                base,
                translation.phys_addr,
                translation.length,
                translation.attrs,
            ));
            added += 1;

            if translation.length >= remaining {
                break;
            }
            remaining -= translation.length;

            match base.checked_add(translation.length) {
                Some(next) => addr = next,
                None => break,
            }
        }

        added
    }

    /// Drop every region whose first or last byte falls in
    /// `[virt_addr, virt_addr + length)`.
    ///
    /// A region that strictly encloses the range, with neither boundary
    /// inside it, survives. See [`Self::invalidate_overlapping`] for the
    /// interval test.
    ///
    /// Returns the number of regions removed.
    pub fn invalidate(&mut self, virt_addr: u64, length: u64) -> usize {
        let before = self.regions.len();
        self.regions.retain(|r| {
            !(in_range(r.virt_base, virt_addr, length) || in_range(r.virt_end(), virt_addr, length))
        });
        let removed = before - self.regions.len();
        debug!("ATC invalidate {virt_addr:#x}+{length:#x}: {removed} removed");
        removed
    }

    /// Drop every region sharing at least one byte with
    /// `[virt_addr, virt_addr + length)`, including regions that enclose it.
    ///
    /// Returns the number of regions removed.
    pub fn invalidate_overlapping(&mut self, virt_addr: u64, length: u64) -> usize {
        if length == 0 {
            return 0;
        }
        let last = virt_addr.saturating_add(length - 1);
        let before = self.regions.len();
        self.regions
            .retain(|r| !(r.virt_base <= last && virt_addr <= r.virt_end()));
        before - self.regions.len()
    }

    /// Drop every cached region.
    pub fn flush(&mut self) {
        debug!("ATC flush: {} regions dropped", self.regions.len());
        self.regions.clear();
    }

    #[cfg(test)]
    pub(crate) fn push_region(&mut self, region: MemoryRegion) {
        self.regions.push(region);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AccError, Result};
    use crate::transport::Translation;

    /// Identity-maps every request, `granule` bytes at a time, with fixed
    /// permissions. Declines everything at or above `limit`.
    #[derive(Debug)]
    struct FixedAts {
        granule: u64,
        attrs: Attrs,
        limit: u64,
        requests: Vec<u64>,
    }

    impl FixedAts {
        fn new(granule: u64) -> Self {
            Self {
                granule,
                attrs: Attrs::RWX,
                limit: u64::MAX,
                requests: Vec::new(),
            }
        }
    }

    impl AtsService for FixedAts {
        fn translate(&mut self, request: &TranslationRequest) -> Result<Translation> {
            self.requests.push(request.virt_addr);
            if request.virt_addr >= self.limit {
                return Err(AccError::TranslationDeclined {
                    virt_addr: request.virt_addr,
                });
            }
            Ok(Translation {
                phys_addr: 0x8000_0000 + (request.virt_addr & !(self.granule - 1)),
                length: self.granule,
                attrs: self.attrs,
            })
        }
    }

    fn region(virt: u64, len: u64) -> MemoryRegion {
        MemoryRegion::new(virt, 0x10_0000 + virt, len, Attrs::RWX)
    }

    #[test]
    fn region_translation_keeps_offset() {
        let r = MemoryRegion::new(0x4000, 0x9000_0000, 0x1000, Attrs::READ);
        assert!(r.contains(0x4000));
        assert!(r.contains(0x4fff));
        assert!(!r.contains(0x5000));
        assert!(!r.contains(0x3fff));
        assert_eq!(r.virt_to_phys(0x4abc), 0x9000_0abc);
        assert_eq!(r.virt_end(), 0x4fff);
    }

    #[test]
    fn region_at_top_of_address_space() {
        let r = MemoryRegion::new(u64::MAX - 0xfff, 0, 0x1000, Attrs::READ);
        assert!(r.contains(u64::MAX));
        assert_eq!(r.virt_end(), u64::MAX);
    }

    #[test]
    fn first_match_wins_on_overlap() {
        let mut atc = AddressTranslationCache::default();
        atc.regions.push(MemoryRegion::new(0x0, 0xa000, 0x1000, Attrs::WRITE));
        atc.regions.push(MemoryRegion::new(0x0, 0xb000, 0x2000, Attrs::READ));
        assert_eq!(atc.virt_to_phys(0x10), Some(0xa010));
        assert!(!atc.test_attr(0x10, Attrs::READ));
        assert!(atc.test_attr(0x1010, Attrs::READ));
    }

    #[test]
    fn zero_physical_address_is_a_hit() {
        let mut atc = AddressTranslationCache::default();
        atc.regions.push(MemoryRegion::new(0x7000, 0x0, 0x1000, Attrs::READ));
        assert_eq!(atc.virt_to_phys(0x7000), Some(0));
        assert_eq!(atc.virt_to_phys(0x8000), None);
    }

    #[test]
    fn fill_aligns_head_and_covers_tail() {
        let mut atc = AddressTranslationCache::default();
        let mut ats = FixedAts::new(0x1000);
        // 0x1800..0x3800 touches three pages once widened to 0x1000.
        let added = atc.request_fill(&mut ats, 0x1800, 0x2000);
        assert_eq!(added, 3);
        assert_eq!(ats.requests, vec![0x1000, 0x2000, 0x3000]);
        assert!(atc.contains(0x1000));
        assert!(atc.contains(0x37ff));
        assert!(!atc.contains(0x4000));
    }

    #[test]
    fn fill_single_page() {
        let mut atc = AddressTranslationCache::default();
        let mut ats = FixedAts::new(0x1000);
        assert_eq!(atc.request_fill(&mut ats, 0x5000, 0x1000), 1);
        assert_eq!(atc.virt_to_phys(0x5123), Some(0x8000_5123));
    }

    #[test]
    fn large_granule_ends_fill_early() {
        let mut atc = AddressTranslationCache::default();
        let mut ats = FixedAts::new(0x20_0000);
        assert_eq!(atc.request_fill(&mut ats, 0x20_3000, 0x4000), 1);
        let r = atc.regions().next().unwrap();
        assert_eq!(r.virt_base(), 0x20_0000);
        assert_eq!(r.length(), 0x20_0000);
    }

    #[test]
    fn declined_request_truncates_fill() {
        let mut atc = AddressTranslationCache::default();
        let mut ats = FixedAts::new(0x1000);
        ats.limit = 0x3000;
        assert_eq!(atc.request_fill(&mut ats, 0x1000, 0x4000), 2);
        assert_eq!(ats.requests, vec![0x1000, 0x2000, 0x3000]);
        assert!(atc.contains(0x2fff));
        assert!(!atc.contains(0x3000));
    }

    #[test]
    fn zero_length_answer_is_never_cached() {
        let mut atc = AddressTranslationCache::default();
        let mut zero = ZeroAts::default();
        assert_eq!(atc.request_fill(&mut zero, 0x1000, 0x3000), 0);
        assert_eq!(zero.calls, 1);
        assert!(atc.is_empty());
    }

    #[derive(Debug, Default)]
    struct ZeroAts {
        calls: usize,
    }

    impl AtsService for ZeroAts {
        fn translate(&mut self, request: &TranslationRequest) -> Result<Translation> {
            self.calls += 1;
            Ok(Translation {
                phys_addr: request.virt_addr,
                length: 0,
                attrs: Attrs::RWX,
            })
        }
    }

    #[test]
    fn invalidate_matches_either_boundary() {
        let mut atc = AddressTranslationCache::default();
        atc.regions.push(region(0x0000, 0x1000)); // end 0x0fff inside
        atc.regions.push(region(0x1800, 0x1000)); // start inside
        atc.regions.push(region(0x4000, 0x1000)); // untouched
        let removed = atc.invalidate(0x0800, 0x1800);
        assert_eq!(removed, 2);
        assert_eq!(atc.len(), 1);
        assert!(atc.contains(0x4000));
    }

    #[test]
    fn invalidate_spares_enclosing_region() {
        let mut atc = AddressTranslationCache::default();
        atc.regions.push(region(0x0, 0x20_0000));
        assert_eq!(atc.invalidate(0x1000, 0x1000), 0);
        assert!(atc.contains(0x1000));

        assert_eq!(atc.invalidate_overlapping(0x1000, 0x1000), 1);
        assert!(atc.is_empty());
    }

    #[test]
    fn overlapping_invalidate_ignores_disjoint_and_empty_ranges() {
        let mut atc = AddressTranslationCache::default();
        atc.regions.push(region(0x1000, 0x1000));
        assert_eq!(atc.invalidate_overlapping(0x2000, 0x1000), 0);
        assert_eq!(atc.invalidate_overlapping(0x1000, 0), 0);
        assert_eq!(atc.invalidate_overlapping(0x1fff, 1), 1);
    }

    #[test]
    fn flush_empties_cache() {
        let mut atc = AddressTranslationCache::default();
        atc.regions.push(region(0x0, 0x1000));
        atc.flush();
        assert!(atc.is_empty());
    }

    #[test]
    fn region_lookup_returns_first_match_by_value() {
        let mut atc = AddressTranslationCache::default();
        atc.push_region(region(0x1000, 0x1000));
        atc.push_region(MemoryRegion::new(0x1000, 0x9000, 0x2000, Attrs::READ));
        let r = atc.region(0x1800).unwrap();
        assert_eq!(r.length(), 0x1000);
        assert!(atc.region(0x4000).is_none());
        assert_eq!(Attrs::RWX.bits(), ats::ATTR_RWX);
    }
}
