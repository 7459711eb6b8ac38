//! Silicon model for the PCIe ATS accelerator.
//!
//! This crate has **no dependencies** and **no device behaviour**. It is a
//! pure description of the endpoint: BAR0 register offsets and bit
//! definitions, the ATS attribute encoding shared with the translation
//! agent, and the BAR/IRQ layout the endpoint advertises.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`regs`] | BAR0 register map, CTRL and STATUS bit definitions |
//! | [`ats`] | ATS attribute bits and the translation granule |
//! | [`bar`] | BAR layout (one 32-bit MMIO BAR, no IRQs) |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ats;
pub mod bar;
pub mod regs;
