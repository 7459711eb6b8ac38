//! Host-side driver
//!
//! Drives an accelerator purely through BAR0, the way a host program on the
//! other side of the link would: clear STATUS, program the address/length/
//! value registers, write CTRL, poll STATUS.

use crate::device::PcieAccelerator;
use crate::error::{AccError, Result};
use crate::transport::{AtsService, PhysMemory};
use acc_chip::regs::{self, ctrl, status};
use tracing::debug;

/// STATUS as seen by the host after an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionStatus {
    /// DONE bit
    pub done: bool,
    /// ERR bit
    pub err: bool,
}

impl CompletionStatus {
    /// Decode a STATUS value.
    pub const fn from_bits(bits: u32) -> Self {
        Self {
            done: bits & status::DONE != 0,
            err: bits & status::ERR != 0,
        }
    }

    /// DONE without ERR
    pub const fn is_ok(&self) -> bool {
        self.done && !self.err
    }
}

/// MMIO-only driver for one accelerator
#[derive(Debug)]
pub struct AccDriver<'a, A, M> {
    dev: &'a mut PcieAccelerator<A, M>,
}

impl<'a, A: AtsService, M: PhysMemory> AccDriver<'a, A, M> {
    /// Borrow `dev` for driving.
    pub fn new(dev: &'a mut PcieAccelerator<A, M>) -> Self {
        Self { dev }
    }

    fn program(&mut self, addr: u64, length: u32) -> Result<()> {
        #[allow(clippy::cast_possible_truncation)]
        let (msb, lsb) = ((addr >> 32) as u32, addr as u32);
        self.dev.write32(regs::ADDR_MSB, msb)?;
        self.dev.write32(regs::ADDR_LSB, lsb)?;
        self.dev.write32(regs::LENGTH, length)
    }

    /// Acknowledge STATUS, write CTRL, wait for completion.
    fn trigger(&mut self, bits: u32) -> Result<CompletionStatus> {
        self.dev.write32(regs::STATUS, 0)?;
        self.dev.write32(regs::CTRL, bits)?;
        self.wait_for_done()
    }

    /// Poll STATUS until it is non-zero, running queued work between polls.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if STATUS is still zero with nothing
    /// left to run, and propagates scheduler errors.
    pub fn wait_for_done(&mut self) -> Result<CompletionStatus> {
        let mut polls = 0u32;
        loop {
            let bits = self.dev.read32(regs::STATUS)?;
            if bits != 0 {
                debug!("STATUS {bits:#x} after {polls} polls");
                return Ok(CompletionStatus::from_bits(bits));
            }
            if !self.dev.has_pending() {
                return Err(AccError::invalid_state(
                    "STATUS is zero and no operation is pending",
                ));
            }
            self.dev.run_pending()?;
            polls += 1;
        }
    }

    /// Populate the cache for `[addr, addr + length)`.
    ///
    /// # Errors
    ///
    /// Propagates MMIO and scheduler errors.
    pub fn translate(&mut self, addr: u64, length: u32) -> Result<CompletionStatus> {
        self.program(addr, length)?;
        self.trigger(ctrl::TRANSLATE)
    }

    /// Read the word at `addr`. The value is whatever VALUE holds afterwards.
    ///
    /// # Errors
    ///
    /// Propagates MMIO and scheduler errors.
    pub fn read_word(&mut self, addr: u64) -> Result<(CompletionStatus, u32)> {
        self.program(addr, 4)?;
        let st = self.trigger(ctrl::READ)?;
        Ok((st, self.dev.read32(regs::VALUE)?))
    }

    /// Write `value` to `addr`.
    ///
    /// # Errors
    ///
    /// Propagates MMIO and scheduler errors.
    pub fn write_word(&mut self, addr: u64, value: u32) -> Result<CompletionStatus> {
        self.program(addr, 4)?;
        self.dev.write32(regs::VALUE, value)?;
        self.trigger(ctrl::WRITE)
    }

    /// MD5 of `[addr, addr + length)`. `None` if the device reported ERR.
    ///
    /// # Errors
    ///
    /// Propagates MMIO and scheduler errors.
    pub fn md5sum(&mut self, addr: u64, length: u32) -> Result<Option<[u8; 16]>> {
        self.program(addr, length)?;
        let st = self.trigger(ctrl::MD5SUM)?;
        if st.err {
            return Ok(None);
        }

        let mut digest = [0u8; 16];
        for (i, out) in digest.chunks_exact_mut(4).enumerate() {
            let offset = regs::md5_result(i).ok_or_else(|| {
                AccError::invalid_state(format!("no digest register {i}"))
            })?;
            out.copy_from_slice(&self.dev.read32(offset)?.to_le_bytes());
        }
        Ok(Some(digest))
    }
}

/// Lowercase hex rendering of a digest.
pub fn hex_digest(digest: &[u8; 16]) -> String {
    use std::fmt::Write;
    digest.iter().fold(String::with_capacity(32), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_decoding() {
        assert!(CompletionStatus::from_bits(status::DONE).is_ok());
        let e = CompletionStatus::from_bits(status::DONE | status::ERR);
        assert!(e.done && e.err && !e.is_ok());
        assert!(!CompletionStatus::from_bits(0).done);
    }

    #[test]
    fn hex_rendering() {
        let d: [u8; 16] = core::array::from_fn(|i| i as u8 * 0x11);
        assert_eq!(hex_digest(&d), "00112233445566778899aabbccddeeff");
    }
}
