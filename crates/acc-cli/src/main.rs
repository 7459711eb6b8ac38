//! `acc` — command-line front end for the PCIe ATS accelerator model.
//!
//! ```text
//! USAGE:
//!   acc md5sum <file>...     Checksum files through the accelerator
//!   acc selftest             Translate / write / read / checksum round
//!   acc regs                 Print the BAR0 register map
//! ```

use acc_device::prelude::*;
use acc_device::{hex_digest, regs, SoftwareAccelerator};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use md5::{Digest, Md5};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "acc", about = "PCIe ATS accelerator model CLI", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// MD5 one or more files via the accelerator's checksum operation.
    Md5sum {
        /// Files to checksum.
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[command(flatten)]
        setup: Setup,
    },
    /// Run every operation against a scratch buffer and check the results.
    Selftest {
        #[command(flatten)]
        setup: Setup,
    },
    /// Print the BAR0 register map.
    Regs,
}

/// Where the host buffer lives and how the device is configured.
#[derive(Args, Clone, Copy)]
struct Setup {
    /// IO virtual address the buffer is mapped at.
    #[arg(long, default_value = "0x8000", value_parser = parse_u64)]
    iova: u64,
    /// Physical address of host memory.
    #[arg(long, default_value = "0x10000000", value_parser = parse_u64)]
    phys_base: u64,
    /// Translation granule in bytes (power of two).
    #[arg(long, default_value = "4096", value_parser = parse_u64)]
    granule: u64,
    /// Report transport failures as STATUS.ERR instead of halting.
    #[arg(long)]
    report_errors: bool,
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let s = s.replace('_', "");
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("{s}: {e}"))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Md5sum { files, setup } => {
            for file in &files {
                cmd_md5sum(file, setup)?;
            }
        }
        Cmd::Selftest { setup } => cmd_selftest(setup)?,
        Cmd::Regs => cmd_regs(),
    }

    Ok(())
}

/// Build a software accelerator with `contents` mapped at `setup.iova`.
fn build(setup: Setup, contents: &[u8], perms: Attrs) -> Result<SoftwareAccelerator> {
    let policy = if setup.report_errors {
        TransportFailurePolicy::ReportError
    } else {
        TransportFailurePolicy::FailFast
    };
    let config = AcceleratorConfig::default()
        .with_granule(setup.granule)
        .with_transport_failure(policy);
    config.validate()?;

    // Whole granules, at least one, so the mapping is aligned.
    let len = u64::try_from(contents.len())?;
    let size = len.max(1).div_ceil(setup.granule) * setup.granule;

    let mut iommu = SoftwareIommu::new(setup.granule);
    iommu
        .map_dma(setup.iova, setup.phys_base, size, perms)
        .context("mapping host buffer")?;
    let memory = HostMemory::with_contents(setup.phys_base, contents, usize::try_from(size)?);

    Ok(PcieAccelerator::software(config, iommu, memory)?)
}

fn cmd_md5sum(file: &Path, setup: Setup) -> Result<()> {
    let contents =
        std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let length = u32::try_from(contents.len())
        .with_context(|| format!("{} does not fit the 32-bit LENGTH register", file.display()))?;

    let mut dev = build(setup, &contents, Attrs::READ)?;
    info!("{}: {length} bytes at IOVA {:#x}", file.display(), setup.iova);

    let Some(digest) = AccDriver::new(&mut dev).md5sum(setup.iova, length)? else {
        bail!("{}: device reported ERR", file.display());
    };
    println!("{}  {}", hex_digest(&digest), file.display());
    Ok(())
}

fn cmd_selftest(setup: Setup) -> Result<()> {
    const WORD_OFFSET: u64 = 0x10;
    const PATTERN: u32 = 0xdead_beef;

    let scratch: Vec<u8> = (0..4 * setup.granule).map(|i| (i % 251) as u8).collect();
    let mut dev = build(setup, &scratch, Attrs::READ | Attrs::WRITE)?;
    let length = u32::try_from(scratch.len())?;

    let st = AccDriver::new(&mut dev).translate(setup.iova, length)?;
    println!(
        "translate {:#x}+{length:#x}: {st:?}, {} regions cached",
        setup.iova,
        dev.atc().len()
    );

    let addr = setup.iova + WORD_OFFSET;
    let st = AccDriver::new(&mut dev).write_word(addr, PATTERN)?;
    println!("write     {addr:#x} <- {PATTERN:#x}: {st:?}");

    let (st, value) = AccDriver::new(&mut dev).read_word(addr)?;
    println!("read      {addr:#x} -> {value:#x}: {st:?}");
    if value != PATTERN {
        bail!("read back {value:#x}, wrote {PATTERN:#x}");
    }

    let digest = AccDriver::new(&mut dev)
        .md5sum(setup.iova, length)?
        .context("checksum reported ERR")?;
    let mut expected = scratch;
    let at = usize::try_from(WORD_OFFSET)?;
    expected[at..at + 4].copy_from_slice(&PATTERN.to_le_bytes());
    let host = Md5::digest(&expected);
    println!("md5sum    {:#x}+{length:#x}: {}", setup.iova, hex_digest(&digest));
    if digest[..] != host[..] {
        bail!("device digest differs from host digest");
    }

    println!("selftest passed ({} requests)", dev.completed());
    Ok(())
}

fn cmd_regs() {
    println!("BAR0 registers ({}-byte access only)", regs::REG_WIDTH);
    for offset in regs::ALL {
        println!("  {offset:#06x}  {}", regs::name(offset).unwrap_or("?"));
    }
    println!("CTRL bits (highest priority first)");
    println!("  {:#04x}  TRANSLATE", regs::ctrl::TRANSLATE);
    println!("  {:#04x}  READ", regs::ctrl::READ);
    println!("  {:#04x}  WRITE", regs::ctrl::WRITE);
    println!("  {:#04x}  MD5SUM", regs::ctrl::MD5SUM);
    println!("STATUS bits");
    println!("  {:#04x}  DONE", regs::status::DONE);
    println!("  {:#04x}  ERR", regs::status::ERR);
}
