//! CTRL decode
//!
//! A CTRL write fires at most one trigger. Bits are tested in fixed
//! priority order (TRANSLATE, READ, WRITE, MD5SUM) and lower-priority bits
//! set in the same write are dropped.

use crate::registers::RegisterFile;
use acc_chip::regs::ctrl;
use tracing::debug;

/// Which Worker a CTRL write wakes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Translate-ahead
    Translate,
    /// Single-word read
    Read,
    /// Single-word write
    Write,
    /// Streaming MD5
    Checksum,
}

/// Work for one Worker, snapshotted from the registers at trigger time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkRequest {
    /// Populate the cache for `[addr, addr + len)`
    Translate {
        /// Virtual start
        addr: u64,
        /// Byte length
        len: u64,
    },
    /// Read the word at `addr` into VALUE
    Read {
        /// Virtual address
        addr: u64,
    },
    /// Write `value` to `addr`
    Write {
        /// Virtual address
        addr: u64,
        /// Data word
        value: u32,
    },
    /// Digest `[addr, addr + len)`
    Checksum {
        /// Virtual start
        addr: u64,
        /// Byte length
        len: u64,
    },
}

impl WorkRequest {
    /// Trigger that produced this request
    pub const fn trigger(&self) -> Trigger {
        match self {
            Self::Translate { .. } => Trigger::Translate,
            Self::Read { .. } => Trigger::Read,
            Self::Write { .. } => Trigger::Write,
            Self::Checksum { .. } => Trigger::Checksum,
        }
    }
}

/// CTRL decoder
#[derive(Debug, Clone, Copy, Default)]
pub struct Dispatcher;

impl Dispatcher {
    /// Highest-priority trigger in `value`, if any.
    pub const fn decode(value: u32) -> Option<Trigger> {
        if value & ctrl::TRANSLATE != 0 {
            Some(Trigger::Translate)
        } else if value & ctrl::READ != 0 {
            Some(Trigger::Read)
        } else if value & ctrl::WRITE != 0 {
            Some(Trigger::Write)
        } else if value & ctrl::MD5SUM != 0 {
            Some(Trigger::Checksum)
        } else {
            None
        }
    }

    /// Build the request for `trigger` from the current register values.
    pub fn request(trigger: Trigger, regs: &RegisterFile) -> WorkRequest {
        let addr = regs.addr();
        let len = u64::from(regs.length());
        match trigger {
            Trigger::Translate => WorkRequest::Translate { addr, len },
            Trigger::Read => WorkRequest::Read { addr },
            Trigger::Write => WorkRequest::Write {
                addr,
                value: regs.value(),
            },
            Trigger::Checksum => WorkRequest::Checksum { addr, len },
        }
    }

    /// Decode a CTRL write into at most one request.
    pub fn dispatch(value: u32, regs: &RegisterFile) -> Option<WorkRequest> {
        let trigger = Self::decode(value)?;
        let request = Self::request(trigger, regs);
        debug!("CTRL {value:#x} -> {request:?}");
        Some(request)
    }
}
