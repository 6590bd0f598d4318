//! AVR ELF firmware loader.
//!
//! avr-gcc links flash content at physical (load) addresses starting at 0
//! and data-space images at 0x800000 and above. The loader collects the
//! `PT_LOAD` segments below that boundary by their physical address and
//! assembles them into a flash image.

use anyhow::{bail, Context, Result};
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::debug;

use super::{merge_chunks, Chunk};

/// AVR machine type in the ELF header (e_machine field).
pub const EM_AVR: u16 = 83;

/// Data-space boundary in the avr-gcc address convention.
const RAM_SPACE_START: u64 = 0x80_0000;

/// Parse an AVR ELF executable into a flash byte image.
pub fn parse_elf(data: &[u8]) -> Result<Vec<u8>> {
    let elf = Elf::parse(data).context("failed to parse ELF")?;
    if elf.header.e_machine != EM_AVR {
        bail!(
            "not an AVR ELF: e_machine = {} (expected {})",
            elf.header.e_machine,
            EM_AVR
        );
    }

    let mut chunks = Vec::new();
    for ph in &elf.program_headers {
        if ph.p_type != PT_LOAD || ph.p_filesz == 0 {
            continue;
        }
        if ph.p_paddr >= RAM_SPACE_START {
            debug!(
                "skipping data-space segment at {:#x} ({} bytes)",
                ph.p_paddr, ph.p_filesz
            );
            continue;
        }
        let start = ph.p_offset as usize;
        let end = start + ph.p_filesz as usize;
        let Some(bytes) = data.get(start..end) else {
            bail!("segment at {:#x} extends past the end of the file", ph.p_paddr);
        };
        chunks.push(Chunk {
            addr: ph.p_paddr as u32,
            data: bytes.to_vec(),
        });
    }

    if chunks.is_empty() {
        bail!("no loadable flash segments");
    }
    merge_chunks(chunks).map_err(|overlap| anyhow::anyhow!("{overlap}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal 32-bit little-endian ELF with one PT_LOAD segment.
    fn build_elf(e_machine: u16, paddr: u32, payload: &[u8]) -> Vec<u8> {
        let ehsize = 52u32;
        let phentsize = 32u32;
        let payload_off = ehsize + phentsize;

        let mut elf = Vec::new();
        // e_ident
        elf.extend_from_slice(b"\x7fELF");
        elf.push(1); // ELFCLASS32
        elf.push(1); // ELFDATA2LSB
        elf.push(1); // EV_CURRENT
        elf.extend_from_slice(&[0; 9]);
        elf.extend_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
        elf.extend_from_slice(&e_machine.to_le_bytes());
        elf.extend_from_slice(&1u32.to_le_bytes()); // e_version
        elf.extend_from_slice(&0u32.to_le_bytes()); // e_entry
        elf.extend_from_slice(&ehsize.to_le_bytes()); // e_phoff
        elf.extend_from_slice(&0u32.to_le_bytes()); // e_shoff
        elf.extend_from_slice(&0u32.to_le_bytes()); // e_flags
        elf.extend_from_slice(&(ehsize as u16).to_le_bytes()); // e_ehsize
        elf.extend_from_slice(&(phentsize as u16).to_le_bytes()); // e_phentsize
        elf.extend_from_slice(&1u16.to_le_bytes()); // e_phnum
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shentsize
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shnum
        elf.extend_from_slice(&0u16.to_le_bytes()); // e_shstrndx
        assert_eq!(elf.len(), ehsize as usize);

        // program header
        elf.extend_from_slice(&PT_LOAD.to_le_bytes()); // p_type
        elf.extend_from_slice(&payload_off.to_le_bytes()); // p_offset
        elf.extend_from_slice(&0u32.to_le_bytes()); // p_vaddr
        elf.extend_from_slice(&paddr.to_le_bytes()); // p_paddr
        elf.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // p_filesz
        elf.extend_from_slice(&(payload.len() as u32).to_le_bytes()); // p_memsz
        elf.extend_from_slice(&5u32.to_le_bytes()); // p_flags = R+X
        elf.extend_from_slice(&2u32.to_le_bytes()); // p_align

        elf.extend_from_slice(payload);
        elf
    }

    #[test]
    fn test_loads_flash_segment() {
        let elf = build_elf(EM_AVR, 0, &[0x0C, 0x94, 0x00, 0x00]);
        let image = parse_elf(&elf).unwrap();
        assert_eq!(image, vec![0x0C, 0x94, 0x00, 0x00]);
    }

    #[test]
    fn test_segment_at_offset_is_padded() {
        let elf = build_elf(EM_AVR, 4, &[0xAA, 0xBB]);
        let image = parse_elf(&elf).unwrap();
        assert_eq!(image, vec![0xFF, 0xFF, 0xFF, 0xFF, 0xAA, 0xBB]);
    }

    #[test]
    fn test_rejects_foreign_machine() {
        let elf = build_elf(3, 0, &[0x00, 0x00]); // EM_386
        assert!(parse_elf(&elf).is_err());
    }

    #[test]
    fn test_rejects_data_space_only_images() {
        let elf = build_elf(EM_AVR, 0x0080_0000, &[0x01, 0x02]);
        assert!(parse_elf(&elf).is_err());
    }

    #[test]
    fn test_rejects_truncated_file() {
        let mut elf = build_elf(EM_AVR, 0, &[0x0C, 0x94]);
        elf.truncate(elf.len() - 1);
        assert!(parse_elf(&elf).is_err());
    }
}
