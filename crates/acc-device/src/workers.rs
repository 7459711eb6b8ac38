//! Request handlers for the four accelerator operations
//!
//! Each Worker runs one [`WorkRequest`] to completion and writes STATUS. A
//! Worker suspends only where it calls out to a remote party (a translation
//! request or a physical access); queued invalidations are applied at those
//! points. A physical address computed before a suspension point is used
//! after it as is.

use crate::atc::{AddressTranslationCache, Attrs};
use crate::dispatch::WorkRequest;
use crate::error::Result;
use crate::invalidation::InvalidationHandler;
use crate::registers::RegisterFile;
use crate::transport::{AtsService, PhysMemory};
use acc_chip::ats;
use md5::{Digest, Md5};
use tracing::{debug, warn};

/// Result of a permission-gated single-word access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// The access was performed
    Applied,
    /// A translation exists but does not grant the permission
    PermissionDenied,
    /// No translation could be obtained
    NotFound,
}

/// Result of one Worker run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Translate finished; `filled` regions were added
    Translated {
        /// Regions added to the cache
        filled: usize,
    },
    /// Read or Write finished
    Access(AccessOutcome),
    /// Checksum covered the whole range
    Digest([u8; 16]),
    /// Checksum stopped early at `consumed` bytes
    ChecksumAborted {
        /// Bytes fed to the digest before the stop
        consumed: u64,
    },
}

/// Everything a Worker touches, borrowed from the accelerator for one run
pub(crate) struct Workers<'a, A: ?Sized, M: ?Sized> {
    pub(crate) atc: &'a mut AddressTranslationCache,
    pub(crate) invalidations: &'a mut InvalidationHandler,
    pub(crate) regs: &'a mut RegisterFile,
    pub(crate) ats: &'a mut A,
    pub(crate) mem: &'a mut M,
    pub(crate) granule: u64,
}

impl<A: AtsService + ?Sized, M: PhysMemory + ?Sized> Workers<'_, A, M> {
    /// Run `request` to completion.
    ///
    /// # Errors
    ///
    /// Returns error only when a physical memory transaction fails; STATUS
    /// is then left for the caller to settle.
    pub(crate) fn execute(&mut self, request: WorkRequest) -> Result<WorkOutcome> {
        debug!("Worker start: {request:?}");
        let outcome = match request {
            WorkRequest::Translate { addr, len } => WorkOutcome::Translated {
                filled: self.translate(addr, len),
            },
            WorkRequest::Read { addr } => WorkOutcome::Access(self.read(addr)?),
            WorkRequest::Write { addr, value } => WorkOutcome::Access(self.write(addr, value)?),
            WorkRequest::Checksum { addr, len } => self.checksum(addr, len)?,
        };
        debug!("Worker done: {outcome:?} status={:#x}", self.regs.status());
        Ok(outcome)
    }

    /// Suspension point: let queued invalidations land.
    fn suspend(&mut self) {
        self.invalidations.drain(self.atc);
    }

    /// Fill `[addr, addr + len)` unless `addr` already hits.
    fn ensure(&mut self, addr: u64, len: u64) -> usize {
        if self.atc.contains(addr) {
            return 0;
        }
        self.suspend();
        self.atc.request_fill(self.ats, addr, len)
    }

    /// Resolve `addr` for `perm`, filling one granule on a miss.
    fn resolve(&mut self, addr: u64, perm: Attrs) -> std::result::Result<u64, AccessOutcome> {
        self.ensure(addr, self.granule);
        if !self.atc.test_attr(addr, perm) {
            return Err(if self.atc.contains(addr) {
                AccessOutcome::PermissionDenied
            } else {
                AccessOutcome::NotFound
            });
        }
        self.atc.virt_to_phys(addr).ok_or(AccessOutcome::NotFound)
    }

    /// Translate-ahead in granule strides. Never reports ERR.
    fn translate(&mut self, mut addr: u64, mut remaining: u64) -> usize {
        let mut filled = 0;
        while remaining > 0 {
            filled += self.ensure(addr, self.granule);
            if remaining < self.granule {
                break;
            }
            remaining -= self.granule;
            match addr.checked_add(self.granule) {
                Some(next) => addr = next,
                None => break,
            }
        }
        self.regs.complete();
        filled
    }

    /// Read one word into VALUE. Permission failures leave VALUE alone and
    /// still report plain DONE.
    fn read(&mut self, addr: u64) -> Result<AccessOutcome> {
        let outcome = match self.resolve(addr, Attrs::READ) {
            Ok(phys) => {
                self.suspend();
                let mut word = [0u8; 4];
                self.mem.read(phys, &mut word)?;
                self.regs.set_value(u32::from_le_bytes(word));
                AccessOutcome::Applied
            }
            Err(denied) => {
                warn!("Read {addr:#x}: {denied:?}");
                denied
            }
        };
        self.regs.complete();
        Ok(outcome)
    }

    /// Write `value` as one word. Permission failures are a silent no-op
    /// reporting plain DONE.
    fn write(&mut self, addr: u64, value: u32) -> Result<AccessOutcome> {
        let outcome = match self.resolve(addr, Attrs::WRITE) {
            Ok(phys) => {
                self.suspend();
                self.mem.write(phys, &value.to_le_bytes())?;
                AccessOutcome::Applied
            }
            Err(denied) => {
                warn!("Write {addr:#x}: {denied:?}");
                denied
            }
        };
        self.regs.complete();
        Ok(outcome)
    }

    /// MD5 over `[addr, addr + len)`, read in chunks that never cross the
    /// granule of the region that translated them.
    fn checksum(&mut self, mut addr: u64, len: u64) -> Result<WorkOutcome> {
        let mut hasher = Md5::new();
        let mut chunk_buf: Vec<u8> = Vec::new();
        let mut remaining = len;

        while remaining > 0 {
            self.ensure(addr, remaining);

            if !self.atc.test_attr(addr, Attrs::READ) {
                warn!("Checksum stopped at {addr:#x}: no readable translation");
                break;
            }
            let Some(region) = self.atc.region(addr) else {
                break;
            };
            let phys = region.virt_to_phys(addr);

            let room = region.length() - ats::granule_offset(phys, region.length());
            let chunk = remaining.min(room);
            // remaining started from the 32-bit LENGTH register.
            let Ok(n) = usize::try_from(chunk) else {
                break;
            };
            chunk_buf.resize(n, 0);

            self.suspend();
            self.mem.read(phys, &mut chunk_buf)?;
            hasher.update(&chunk_buf);

            addr = addr.wrapping_add(chunk);
            remaining -= chunk;
        }

        if remaining != 0 {
            self.regs.fail();
            return Ok(WorkOutcome::ChecksumAborted {
                consumed: len - remaining,
            });
        }

        let mut digest = [0u8; 16];
        digest.copy_from_slice(&hasher.finalize());
        self.regs.set_digest(&digest);
        self.regs.complete();
        Ok(WorkOutcome::Digest(digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AccError;
    use crate::transport::{Translation, TranslationRequest};
    use acc_chip::regs::status;

    /// Maps virtual page `v` to physical page `v + offset`, declining
    /// anything at or above `limit`.
    #[derive(Debug)]
    struct ShiftAts {
        offset: u64,
        attrs: Attrs,
        limit: u64,
        calls: usize,
    }

    impl ShiftAts {
        fn new(offset: u64, attrs: Attrs) -> Self {
            Self {
                offset,
                attrs,
                limit: u64::MAX,
                calls: 0,
            }
        }
    }

    impl AtsService for ShiftAts {
        fn translate(&mut self, request: &TranslationRequest) -> Result<Translation> {
            self.calls += 1;
            if request.virt_addr >= self.limit {
                return Err(AccError::TranslationDeclined {
                    virt_addr: request.virt_addr,
                });
            }
            Ok(Translation {
                phys_addr: request.virt_addr + self.offset,
                length: ats::SZ_4K,
                attrs: request.attrs & self.attrs,
            })
        }
    }

    /// Flat memory at physical address 0.
    #[derive(Debug)]
    struct Flat {
        bytes: Vec<u8>,
        accesses: usize,
    }

    impl Flat {
        fn new(size: usize) -> Self {
            Self {
                bytes: (0..size).map(|i| (i % 251) as u8).collect(),
                accesses: 0,
            }
        }
    }

    impl PhysMemory for Flat {
        fn read(&mut self, phys_addr: u64, buf: &mut [u8]) -> Result<()> {
            self.accesses += 1;
            let start = usize::try_from(phys_addr).unwrap();
            let src = self
                .bytes
                .get(start..start + buf.len())
                .ok_or_else(|| AccError::transport(phys_addr, "out of range"))?;
            buf.copy_from_slice(src);
            Ok(())
        }

        fn write(&mut self, phys_addr: u64, data: &[u8]) -> Result<()> {
            self.accesses += 1;
            let start = usize::try_from(phys_addr).unwrap();
            self.bytes
                .get_mut(start..start + data.len())
                .ok_or_else(|| AccError::transport(phys_addr, "out of range"))?
                .copy_from_slice(data);
            Ok(())
        }
    }

    fn md5_of(data: &[u8]) -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&Md5::digest(data));
        out
    }

    struct Rig {
        atc: AddressTranslationCache,
        inv: InvalidationHandler,
        regs: RegisterFile,
        ats: ShiftAts,
        mem: Flat,
        granule: u64,
    }

    impl Rig {
        fn new(ats: ShiftAts) -> Self {
            Self {
                atc: AddressTranslationCache::default(),
                inv: InvalidationHandler::new(),
                regs: RegisterFile::new(),
                ats,
                mem: Flat::new(0x10000),
                granule: ats::SZ_4K,
            }
        }

        fn run(&mut self, request: WorkRequest) -> Result<WorkOutcome> {
            Workers {
                atc: &mut self.atc,
                invalidations: &mut self.inv,
                regs: &mut self.regs,
                ats: &mut self.ats,
                mem: &mut self.mem,
                granule: self.granule,
            }
            .execute(request)
        }
    }

    #[test]
    fn translate_walks_every_stride_once() {
        let mut rig = Rig::new(ShiftAts::new(0x8000, Attrs::RWX));
        let out = rig.run(WorkRequest::Translate { addr: 0x0, len: 0x3000 }).unwrap();
        assert_eq!(out, WorkOutcome::Translated { filled: 3 });
        assert_eq!(rig.regs.status(), status::DONE);

        // Already cached: no new requests.
        let calls = rig.ats.calls;
        rig.run(WorkRequest::Translate { addr: 0x0, len: 0x3000 }).unwrap();
        assert_eq!(rig.ats.calls, calls);
    }

    #[test]
    fn translate_partial_tail_stride_is_covered() {
        let mut rig = Rig::new(ShiftAts::new(0, Attrs::RWX));
        rig.run(WorkRequest::Translate { addr: 0x0, len: 0x1800 }).unwrap();
        assert!(rig.atc.contains(0x1000));
        assert!(!rig.atc.contains(0x2000));
    }

    #[test]
    fn translate_failure_still_reports_done() {
        let mut ats = ShiftAts::new(0, Attrs::RWX);
        ats.limit = 0;
        let mut rig = Rig::new(ats);
        rig.run(WorkRequest::Translate { addr: 0x0, len: 0x2000 }).unwrap();
        assert_eq!(rig.regs.status(), status::DONE);
        assert!(rig.atc.is_empty());
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut rig = Rig::new(ShiftAts::new(0x4000, Attrs::RWX));
        let w = rig.run(WorkRequest::Write { addr: 0x10, value: 0xcafe_f00d }).unwrap();
        assert_eq!(w, WorkOutcome::Access(AccessOutcome::Applied));
        assert_eq!(&rig.mem.bytes[0x4010..0x4014], &0xcafe_f00d_u32.to_le_bytes());

        let r = rig.run(WorkRequest::Read { addr: 0x10 }).unwrap();
        assert_eq!(r, WorkOutcome::Access(AccessOutcome::Applied));
        assert_eq!(rig.regs.value(), 0xcafe_f00d);
        assert_eq!(rig.regs.status(), status::DONE);
    }

    #[test]
    fn read_without_permission_is_a_silent_no_op() {
        let mut rig = Rig::new(ShiftAts::new(0, Attrs::WRITE));
        rig.regs.set_value(0x1234);
        let r = rig.run(WorkRequest::Read { addr: 0x100 }).unwrap();
        assert_eq!(r, WorkOutcome::Access(AccessOutcome::PermissionDenied));
        assert_eq!(rig.regs.value(), 0x1234);
        assert_eq!(rig.regs.status(), status::DONE);
        assert_eq!(rig.mem.accesses, 0);
    }

    #[test]
    fn write_without_translation_reports_not_found() {
        let mut ats = ShiftAts::new(0, Attrs::RWX);
        ats.limit = 0;
        let mut rig = Rig::new(ats);
        let w = rig.run(WorkRequest::Write { addr: 0x100, value: 1 }).unwrap();
        assert_eq!(w, WorkOutcome::Access(AccessOutcome::NotFound));
        assert_eq!(rig.regs.status(), status::DONE);
        assert_eq!(rig.mem.accesses, 0);
    }

    #[test]
    fn checksum_matches_contiguous_digest() {
        let mut rig = Rig::new(ShiftAts::new(0x1000, Attrs::READ));
        let out = rig.run(WorkRequest::Checksum { addr: 0x800, len: 0x2000 }).unwrap();
        let expected = md5_of(&rig.mem.bytes[0x1800..0x3800]);
        assert_eq!(out, WorkOutcome::Digest(expected));
        assert_eq!(rig.regs.status(), status::DONE);
        // Unaligned start: 0x800, 0x1000, 0x800 bytes.
        assert_eq!(rig.mem.accesses, 3);
    }

    #[test]
    fn checksum_chunks_follow_region_granule_not_configured_one() {
        // 4 KiB answers under an 8 KiB configured granule.
        let mut rig = Rig::new(ShiftAts::new(0x1000, Attrs::READ));
        rig.granule = 0x2000;
        let out = rig.run(WorkRequest::Checksum { addr: 0x0, len: 0x2000 }).unwrap();
        assert_eq!(out, WorkOutcome::Digest(md5_of(&rig.mem.bytes[0x1000..0x3000])));
        assert_eq!(rig.mem.accesses, 2);
    }

    #[test]
    fn checksum_buffer_is_bounded_by_length() {
        let mut rig = Rig::new(ShiftAts::new(0x1000, Attrs::READ));
        rig.granule = 1 << 40;
        let out = rig.run(WorkRequest::Checksum { addr: 0x10, len: 4 }).unwrap();
        assert_eq!(out, WorkOutcome::Digest(md5_of(&rig.mem.bytes[0x1010..0x1014])));
        assert_eq!(rig.regs.status(), status::DONE);
    }

    #[test]
    fn write_without_permission_is_a_silent_no_op() {
        let mut rig = Rig::new(ShiftAts::new(0, Attrs::READ));
        let before = rig.mem.bytes[0x100..0x104].to_vec();
        let w = rig.run(WorkRequest::Write { addr: 0x100, value: 0xffff_ffff }).unwrap();
        assert_eq!(w, WorkOutcome::Access(AccessOutcome::PermissionDenied));
        assert_eq!(rig.mem.bytes[0x100..0x104], before[..]);
        assert_eq!(rig.mem.accesses, 0);
        assert_eq!(rig.regs.status(), status::DONE);
    }

    #[test]
    fn checksum_of_empty_range_is_md5_of_nothing() {
        let mut rig = Rig::new(ShiftAts::new(0, Attrs::READ));
        let out = rig.run(WorkRequest::Checksum { addr: 0x0, len: 0 }).unwrap();
        let expected = md5_of(b"");
        assert_eq!(out, WorkOutcome::Digest(expected));
        assert_eq!(rig.ats.calls, 0);
    }

    #[test]
    fn checksum_stops_on_missing_read_permission() {
        let mut rig = Rig::new(ShiftAts::new(0, Attrs::WRITE));
        let out = rig.run(WorkRequest::Checksum { addr: 0x0, len: 0x100 }).unwrap();
        assert_eq!(out, WorkOutcome::ChecksumAborted { consumed: 0 });
        assert_eq!(rig.regs.status(), status::DONE | status::ERR);
        assert_eq!(rig.regs.md5_result(), [0; 4]);
    }

    #[test]
    fn checksum_reports_partial_progress() {
        let mut ats = ShiftAts::new(0, Attrs::READ);
        ats.limit = 0x2000;
        let mut rig = Rig::new(ats);
        let out = rig.run(WorkRequest::Checksum { addr: 0x1000, len: 0x3000 }).unwrap();
        assert_eq!(out, WorkOutcome::ChecksumAborted { consumed: 0x1000 });
        assert_eq!(rig.regs.status(), status::DONE | status::ERR);
    }

    #[test]
    fn transport_failure_propagates() {
        let mut rig = Rig::new(ShiftAts::new(0x10_0000, Attrs::RWX));
        let err = rig.run(WorkRequest::Read { addr: 0x0 }).unwrap_err();
        assert!(matches!(err, AccError::Transport { .. }));
        assert_eq!(rig.regs.status(), 0);
    }

    #[test]
    fn stale_translation_is_used_after_invalidation_lands() {
        let mut rig = Rig::new(ShiftAts::new(0x2000, Attrs::RWX));
        rig.run(WorkRequest::Translate { addr: 0x0, len: 0x1000 }).unwrap();
        // Queued before the read; it lands at the read's suspension point,
        // after the physical address was computed.
        rig.inv.sender().invalidate(0x0, 0x1000);
        rig.regs.set_value(0);
        let r = rig.run(WorkRequest::Read { addr: 0x4 }).unwrap();
        assert_eq!(r, WorkOutcome::Access(AccessOutcome::Applied));
        assert_eq!(rig.regs.value().to_le_bytes(), rig.mem.bytes[0x2004..0x2008]);
        assert!(!rig.atc.contains(0x4));
    }
}
