//! BAR0 register file and MMIO transaction decode
//!
//! Every register is a plain 32-bit word. The MMIO side and the Workers both
//! write it, one whole register at a time; nothing here is shared across
//! threads.

use crate::error::{AccError, Result};
use acc_chip::regs::{self, status};
use tracing::{debug, warn};

/// Bus command carried by an MMIO transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusCommand {
    /// Register read
    Read,
    /// Register write
    Write,
    /// Neither; always rejected on BAR0
    Ignore,
}

/// One MMIO transaction against a BAR
#[derive(Debug)]
pub struct BusTransaction<'a> {
    /// Command
    pub command: BusCommand,
    /// Offset inside the BAR
    pub offset: u64,
    /// Data buffer: filled on reads, consumed on writes
    pub data: &'a mut [u8],
    /// Byte-enable mask, unsupported by this endpoint
    pub byte_enable: Option<&'a [u8]>,
    /// Streaming width in bytes
    pub streaming_width: usize,
}

impl<'a> BusTransaction<'a> {
    /// A plain read of `data.len()` bytes.
    pub fn read(offset: u64, data: &'a mut [u8]) -> Self {
        let streaming_width = data.len();
        Self {
            command: BusCommand::Read,
            offset,
            data,
            byte_enable: None,
            streaming_width,
        }
    }

    /// A plain write of `data`.
    pub fn write(offset: u64, data: &'a mut [u8]) -> Self {
        let streaming_width = data.len();
        Self {
            command: BusCommand::Write,
            offset,
            data,
            byte_enable: None,
            streaming_width,
        }
    }

    /// Attach a byte-enable mask.
    #[must_use]
    pub fn with_byte_enable(mut self, byte_enable: &'a [u8]) -> Self {
        self.byte_enable = Some(byte_enable);
        self
    }

    /// Override the streaming width.
    #[must_use]
    pub fn with_streaming_width(mut self, width: usize) -> Self {
        self.streaming_width = width;
        self
    }

    /// Reject shapes the register file cannot serve; otherwise say which
    /// way the data moves.
    fn check(&self) -> Result<Access> {
        let len = self.data.len();
        let reason = if self.byte_enable.is_some() {
            "byte enables not supported"
        } else if len > regs::REG_WIDTH {
            "access wider than 4 bytes"
        } else if self.streaming_width < len {
            "streaming width below data length"
        } else {
            match self.command {
                BusCommand::Read => return Ok(Access::Read),
                BusCommand::Write => return Ok(Access::Write),
                BusCommand::Ignore => "command is neither read nor write",
            }
        };
        warn!("Rejected MMIO access at {:#x} (len {len}): {reason}", self.offset);
        Err(AccError::bus_error(self.offset, reason))
    }
}

/// Direction of a transaction that passed [`BusTransaction::check`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Effect of a register write on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWrite {
    /// A data register was updated
    Stored,
    /// CTRL was written with this value
    Control(u32),
    /// Read-only or unimplemented offset; dropped
    Ignored,
}

/// Accelerator registers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegisterFile {
    ctrl: u32,
    addr_lsb: u32,
    length: u32,
    value: u32,
    status: u32,
    addr_msb: u32,
    md5_result: [u32; regs::MD5_RESULT_COUNT],
}

impl RegisterFile {
    /// All registers zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every register.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 64-bit target address, `ADDR_MSB:ADDR_LSB`.
    pub const fn addr(&self) -> u64 {
        ((self.addr_msb as u64) << 32) | self.addr_lsb as u64
    }

    /// LENGTH register
    pub const fn length(&self) -> u32 {
        self.length
    }

    /// VALUE register
    pub const fn value(&self) -> u32 {
        self.value
    }

    /// STATUS register
    pub const fn status(&self) -> u32 {
        self.status
    }

    /// Last value written to CTRL (CTRL itself reads back as 0).
    pub const fn last_ctrl(&self) -> u32 {
        self.ctrl
    }

    /// MD5_RESULT_0..3
    pub const fn md5_result(&self) -> [u32; regs::MD5_RESULT_COUNT] {
        self.md5_result
    }

    pub(crate) fn set_value(&mut self, value: u32) {
        self.value = value;
    }

    pub(crate) fn set_status(&mut self, bits: u32) {
        self.status = bits;
    }

    pub(crate) fn complete(&mut self) {
        self.set_status(status::DONE);
    }

    pub(crate) fn fail(&mut self) {
        self.set_status(status::DONE | status::ERR);
    }

    /// Pack a 16-byte digest four bytes per register, little endian.
    pub(crate) fn set_digest(&mut self, digest: &[u8; 16]) {
        for (reg, bytes) in self.md5_result.iter_mut().zip(digest.chunks_exact(4)) {
            *reg = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        }
    }

    /// Register value as seen from the bus. CTRL and unknown offsets read 0.
    pub fn read(&self, offset: u64) -> u32 {
        match offset {
            regs::ADDR_LSB => self.addr_lsb,
            regs::LENGTH => self.length,
            regs::VALUE => self.value,
            regs::STATUS => self.status,
            regs::ADDR_MSB => self.addr_msb,
            regs::MD5_RESULT_0 => self.md5_result[0],
            regs::MD5_RESULT_1 => self.md5_result[1],
            regs::MD5_RESULT_2 => self.md5_result[2],
            regs::MD5_RESULT_3 => self.md5_result[3],
            _ => 0,
        }
    }

    /// Bus write of a full register.
    pub fn write(&mut self, offset: u64, value: u32) -> RegisterWrite {
        match offset {
            regs::CTRL => {
                self.ctrl = value;
                return RegisterWrite::Control(value);
            }
            regs::ADDR_LSB => self.addr_lsb = value,
            regs::LENGTH => self.length = value,
            regs::VALUE => self.value = value,
            regs::STATUS => self.status = value,
            regs::ADDR_MSB => self.addr_msb = value,
            _ => return RegisterWrite::Ignored,
        }
        RegisterWrite::Stored
    }

    /// Serve a BAR0 transaction.
    ///
    /// Reads copy the low bytes of the little-endian register value into the
    /// buffer; writes assemble a little-endian value from it.
    ///
    /// # Errors
    ///
    /// Returns a bus error, without touching any register, for byte
    /// enables, accesses wider than 4 bytes, a streaming width below the
    /// data length, or a command other than read/write.
    pub fn transport(&mut self, txn: &mut BusTransaction<'_>) -> Result<RegisterWrite> {
        let access = txn.check()?;
        let len = txn.data.len();

        match access {
            Access::Read => {
                let v = self.read(txn.offset).to_le_bytes();
                txn.data.copy_from_slice(&v[..len]);
                debug!(
                    "MMIO read {} = {:#x}",
                    regs::name(txn.offset).unwrap_or("?"),
                    self.read(txn.offset)
                );
                Ok(RegisterWrite::Stored)
            }
            Access::Write => {
                let mut v = [0u8; 4];
                v[..len].copy_from_slice(txn.data);
                let value = u32::from_le_bytes(v);
                debug!(
                    "MMIO write {} <- {value:#x}",
                    regs::name(txn.offset).unwrap_or("?")
                );
                Ok(self.write(txn.offset, value))
            }
        }
    }
}
