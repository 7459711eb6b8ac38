//! ATS attribute encoding and translation granule.
//!
//! Attribute bits travel in both directions: the endpoint requests a set of
//! permissions, the translation agent answers with the subset it grants.

/// Read permission.
pub const ATTR_READ: u64 = 1 << 0;
/// Write permission.
pub const ATTR_WRITE: u64 = 1 << 1;
/// Execute permission.
pub const ATTR_EXEC: u64 = 1 << 2;

/// Attributes requested on every translation: read, write and execute.
pub const ATTR_RWX: u64 = ATTR_READ | ATTR_WRITE | ATTR_EXEC;

/// 4 KiB, the smallest translation granule and the default stride.
pub const SZ_4K: u64 = 4 * 1024;

/// Round `addr` down to a multiple of `granule` (a power of two).
#[must_use]
pub const fn align_down(addr: u64, granule: u64) -> u64 {
    addr & !(granule - 1)
}

/// Offset of `addr` inside its `granule`.
#[must_use]
pub const fn granule_offset(addr: u64, granule: u64) -> u64 {
    addr & (granule - 1)
}
