//! Firmware image loaders.
//!
//! A firmware image is the byte content of flash, little-endian words
//! starting at address 0. Three formats are accepted:
//!
//! - [`hex`] - Intel HEX text files
//! - [`elf`] - AVR ELF executables (loadable segments by LMA)
//! - raw binary, used verbatim
//!
//! [`load_file`] picks the parser from the file extension, falling back
//! to content sniffing.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

pub mod elf;
pub mod hex;

pub use elf::parse_elf;
pub use hex::{parse_hex, HexError};

/// A contiguous run of firmware bytes at a flash byte address.
#[derive(Debug, Clone)]
pub(crate) struct Chunk {
    pub addr: u32,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn addr_end(&self) -> u32 {
        self.addr + self.data.len() as u32
    }
}

/// Two chunks claimed the same flash byte.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("data overlap at {addr:#x}")]
pub(crate) struct ChunkOverlap {
    pub addr: u32,
}

/// Merge address-tagged chunks into one 0xFF-padded image, word-aligned
/// at the end.
pub(crate) fn merge_chunks(mut chunks: Vec<Chunk>) -> Result<Vec<u8>, ChunkOverlap> {
    chunks.sort_by_key(|chunk| chunk.addr);

    let mut total_size = chunks.last().map_or(0, Chunk::addr_end);
    if total_size % 2 == 1 {
        total_size += 1;
    }
    let mut image = vec![0xFF; total_size as usize];

    let mut previous_end = 0;
    for chunk in &chunks {
        if chunk.addr < previous_end {
            return Err(ChunkOverlap { addr: chunk.addr });
        }
        image[chunk.addr as usize..chunk.addr_end() as usize].copy_from_slice(&chunk.data);
        previous_end = chunk.addr_end();
    }
    Ok(image)
}

/// Load a firmware file, dispatching on its format.
pub fn load_file(path: &Path) -> Result<Vec<u8>> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;

    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("hex") | Some("ihex") => {
            let text = std::str::from_utf8(&data)
                .with_context(|| format!("{} is not valid HEX text", path.display()))?;
            Ok(parse_hex(text)?)
        }
        Some("elf") => parse_elf(&data),
        _ => {
            // no known extension: sniff the content
            if data.starts_with(b"\x7fELF") {
                parse_elf(&data)
            } else if data.first() == Some(&b':') {
                let text = std::str::from_utf8(&data)
                    .with_context(|| format!("{} is not valid HEX text", path.display()))?;
                Ok(parse_hex(text)?)
            } else {
                Ok(data)
            }
        }
    }
}
