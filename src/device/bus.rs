//! Data-space address routing.
//!
//! Decodes a 24-bit data address into I/O, EEPROM, internal SRAM, the
//! emulator-internal window or external SRAM, and routes the access.
//! Unmapped accesses and the stubbed regions produce defined fallbacks so
//! the guest keeps running deterministically.

use log::{error, warn};

use super::core::Core;
use super::model::{
    MEM_EEPROM_START, MEM_EMULATOR_SIZE, MEM_EMULATOR_START, MEM_IO_SIZE, MEM_SRAM_START,
};
use crate::blocks::BlockSet;

/// Read a data memory byte.
pub fn read_data(core: &mut Core, blocks: &mut BlockSet, addr: u32) -> u8 {
    if addr < MEM_IO_SIZE {
        blocks.io_read(core, addr as u16)
    } else if (MEM_EEPROM_START..MEM_EEPROM_START + core.model.mem_eeprom_size).contains(&addr) {
        warn!("EEPROM read access not supported at {:#x}", addr);
        0
    } else if (MEM_SRAM_START..MEM_SRAM_START + core.model.mem_sram_size).contains(&addr) {
        core.sram[(addr - MEM_SRAM_START) as usize]
    } else if (MEM_EMULATOR_START..MEM_EMULATOR_START + MEM_EMULATOR_SIZE).contains(&addr) {
        read_emulator(core, addr)
    } else if core.model.exsram_size() != 0
        && (core.model.exsram_start()..core.model.exsram_start() + core.model.exsram_size())
            .contains(&addr)
    {
        warn!("external SRAM read access not supported: {:#X}", addr);
        0
    } else {
        error!("invalid data memory address to read: {:#X}", addr);
        0
    }
}

/// Write a data memory byte.
pub fn write_data(core: &mut Core, blocks: &mut BlockSet, addr: u32, v: u8) {
    if addr < MEM_IO_SIZE {
        blocks.io_write(core, addr as u16, v);
    } else if (MEM_EEPROM_START..MEM_EEPROM_START + core.model.mem_eeprom_size).contains(&addr) {
        warn!("EEPROM write access not supported at {:#x}", addr);
    } else if (MEM_SRAM_START..MEM_SRAM_START + core.model.mem_sram_size).contains(&addr) {
        core.sram[(addr - MEM_SRAM_START) as usize] = v;
    } else if (MEM_EMULATOR_START..MEM_EMULATOR_START + MEM_EMULATOR_SIZE).contains(&addr) {
        write_emulator(core, addr, v);
    } else if core.model.exsram_size() != 0
        && (core.model.exsram_start()..core.model.exsram_start() + core.model.exsram_size())
            .contains(&addr)
    {
        warn!("external SRAM write access not supported at {:#x}", addr);
    } else {
        error!("invalid data memory address to write: {:#X}", addr);
    }
}

/// Emulator-internal observability window: the SYS tick as a read-only
/// 32-bit little-endian value at offset 0, the rest reserved.
fn read_emulator(core: &Core, addr: u32) -> u8 {
    let offset = addr - MEM_EMULATOR_START;
    match offset {
        0x00..=0x03 => (core.sched.now() >> (offset * 8)) as u8,
        _ => {
            warn!("emulator memory read {:#08X}: reserved address", addr);
            0
        }
    }
}

fn write_emulator(_core: &mut Core, addr: u32, _v: u8) {
    error!("emulator memory write {:#08X}: not writable", addr);
}
