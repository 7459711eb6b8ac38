//! PCIe BAR layout.
//!
//! ```text
//! BAR  Size   Type                  Purpose
//! ──── ────── ───────────────────── ─────────────────────────
//!  0   4 KB   32-bit non-prefetch   Register space (MMIO)
//! ```
//!
//! The endpoint raises no interrupts; the host polls STATUS.

/// BAR0: control register space.
pub mod bar0 {
    /// Size in bytes. The register window occupies the first 40 bytes.
    pub const SIZE: u64 = 4 * 1024;
    /// BAR index.
    pub const INDEX: u32 = 0;
    /// Properties.
    pub const IS_64BIT: bool = false;
    /// Properties.
    pub const IS_PREFETCHABLE: bool = false;
}

/// Number of MMIO BARs exposed.
pub const NR_MMIO_BAR: u32 = 1;

/// Number of interrupt vectors exposed.
pub const NR_IRQ: u32 = 0;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs;

    #[test]
    fn register_window_fits_bar0() {
        assert!(regs::REG_WINDOW_END <= bar0::SIZE);
        assert_eq!(NR_MMIO_BAR, 1);
        assert_eq!(NR_IRQ, 0);
    }
}
