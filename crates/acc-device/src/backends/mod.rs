//! Collaborator implementations
//!
//! - **Software**: in-process IOMMU and host memory, for tests, the CLI and
//!   any setup without a co-simulation link.

pub mod software;

pub use software::{HostMemory, IommuMapping, SoftwareAccelerator, SoftwareIommu};
