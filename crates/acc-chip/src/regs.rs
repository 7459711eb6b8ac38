//! BAR0 register map.
//!
//! All registers are 32 bits wide, word aligned, and accessed with 4-byte
//! transactions.
//!
//! ```text
//! 0x00  CTRL            W    trigger bits (reads 0)
//! 0x04  ADDR_LSB        R/W  virtual address [31:0]
//! 0x08  LENGTH          R/W  byte length for TRANSLATE / MD5SUM
//! 0x0C  VALUE           R/W  data word for READ / WRITE
//! 0x10  STATUS          R/W  DONE / ERR, host writes 0 to acknowledge
//! 0x14  ADDR_MSB        R/W  virtual address [63:32]
//! 0x18  MD5_RESULT_0    R    digest bytes 0..4  (little endian)
//! 0x1C  MD5_RESULT_1    R    digest bytes 4..8
//! 0x20  MD5_RESULT_2    R    digest bytes 8..12
//! 0x24  MD5_RESULT_3    R    digest bytes 12..16
//! ```

// ── Control and data ─────────────────────────────────────────────────────────

/// Control register. Writing it triggers one operation.
pub const CTRL: u64 = 0x00;
/// Target virtual address, low 32 bits.
pub const ADDR_LSB: u64 = 0x04;
/// Byte length for TRANSLATE and MD5SUM.
pub const LENGTH: u64 = 0x08;
/// Data word for READ and WRITE.
pub const VALUE: u64 = 0x0C;
/// Completion status.
pub const STATUS: u64 = 0x10;
/// Target virtual address, high 32 bits.
pub const ADDR_MSB: u64 = 0x14;

// ── Digest result ────────────────────────────────────────────────────────────

/// First of the four digest result registers.
pub const MD5_RESULT_0: u64 = 0x18;
/// Second digest result register.
pub const MD5_RESULT_1: u64 = 0x1C;
/// Third digest result register.
pub const MD5_RESULT_2: u64 = 0x20;
/// Fourth digest result register.
pub const MD5_RESULT_3: u64 = 0x24;
/// Number of digest result registers.
pub const MD5_RESULT_COUNT: usize = 4;

/// Offset one past the last implemented register.
pub const REG_WINDOW_END: u64 = MD5_RESULT_3 + 4;

/// Width of every register in bytes.
pub const REG_WIDTH: usize = 4;

/// Offset of digest result register `index`, if it exists.
#[must_use]
pub const fn md5_result(index: usize) -> Option<u64> {
    if index < MD5_RESULT_COUNT {
        Some(MD5_RESULT_0 + (index as u64) * 4)
    } else {
        None
    }
}

/// Human readable register name, for logs and register dumps.
#[must_use]
pub const fn name(offset: u64) -> Option<&'static str> {
    match offset {
        CTRL => Some("CTRL"),
        ADDR_LSB => Some("ADDR_LSB"),
        LENGTH => Some("LENGTH"),
        VALUE => Some("VALUE"),
        STATUS => Some("STATUS"),
        ADDR_MSB => Some("ADDR_MSB"),
        MD5_RESULT_0 => Some("MD5_RESULT_0"),
        MD5_RESULT_1 => Some("MD5_RESULT_1"),
        MD5_RESULT_2 => Some("MD5_RESULT_2"),
        MD5_RESULT_3 => Some("MD5_RESULT_3"),
        _ => None,
    }
}

/// Every implemented register offset, in address order.
pub const ALL: [u64; 10] = [
    CTRL,
    ADDR_LSB,
    LENGTH,
    VALUE,
    STATUS,
    ADDR_MSB,
    MD5_RESULT_0,
    MD5_RESULT_1,
    MD5_RESULT_2,
    MD5_RESULT_3,
];

// ── CTRL bit definitions ─────────────────────────────────────────────────────

/// CTRL trigger bits. Decoded in this priority order; one trigger per write.
pub mod ctrl {
    /// Populate the translation cache for `[ADDR, ADDR + LENGTH)`.
    pub const TRANSLATE: u32 = 1 << 0;
    /// Read one word at ADDR into VALUE.
    pub const READ: u32 = 1 << 1;
    /// Write VALUE to ADDR.
    pub const WRITE: u32 = 1 << 2;
    /// Digest `[ADDR, ADDR + LENGTH)` into MD5_RESULT_0..3.
    pub const MD5SUM: u32 = 1 << 3;
}

// ── STATUS bit definitions ───────────────────────────────────────────────────

/// STATUS bits written by the device on completion.
pub mod status {
    /// The last triggered operation has completed.
    pub const DONE: u32 = 1 << 0;
    /// The last triggered operation failed.
    pub const ERR: u32 = 1 << 1;
}
