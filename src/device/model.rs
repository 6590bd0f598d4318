//! Device model geometry.
//!
//! A [`ModelConfig`] carries the memory-map values that distinguish one
//! XMEGA part from another. Values that can be deduced from others (boot
//! section start, external SRAM window, PC width) are derived on demand.

use thiserror::Error;

/// Size of the I/O register window at the bottom of data space.
pub const MEM_IO_SIZE: u32 = 0x1000;
/// Start of the memory-mapped EEPROM window.
pub const MEM_EEPROM_START: u32 = 0x1000;
/// Start of internal SRAM.
pub const MEM_SRAM_START: u32 = 0x2000;
/// Start of the emulator-internal observability window.
pub const MEM_EMULATOR_START: u32 = 0xFF00;
/// Size of the emulator-internal window.
pub const MEM_EMULATOR_SIZE: u32 = 0x100;
/// Total addressable data space (24-bit).
pub const MEM_MAX_SIZE: u32 = 0x0100_0000;
/// All XMEGA devices have at most 128 interrupt vectors.
pub const IV_MAX_COUNT: u8 = 0x80;

/// Memory-map validation failure, fatal at device construction.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{model}: {reason}")]
pub struct ModelError {
    /// Model name.
    pub model: &'static str,
    /// What was wrong with the memory map.
    pub reason: &'static str,
}

/// Model configuration, provided to the device constructor.
///
/// Sizes are in bytes. It does not include values which can be deduced
/// from others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelConfig {
    /// Model name, used in error messages.
    pub name: &'static str,
    /// Total flash size.
    pub flash_size: u32,
    /// Flash page size.
    pub flash_page_size: u32,
    /// Bootloader section size.
    pub flash_boot_size: u32,
    /// Memory-mapped EEPROM size.
    pub mem_eeprom_size: u32,
    /// Internal SRAM size.
    pub mem_sram_size: u32,
    /// Whether the external SRAM window is decoded.
    pub has_exsram: bool,
}

impl ModelConfig {
    /// ATxmega128A1: 128K+8K flash, 2K EEPROM, 16K SRAM, EBI present.
    pub const ATXMEGA128A1: ModelConfig = ModelConfig {
        name: "ATxmega128A1",
        flash_size: 0x22000,
        flash_page_size: 0x200,
        flash_boot_size: 0x2000,
        mem_eeprom_size: 0x0800,
        mem_sram_size: 0x4000,
        has_exsram: true,
    };

    /// Check the memory-map values.
    ///
    /// The order of the checks matters: earlier ones guard the arithmetic
    /// of later ones against overflow.
    pub fn validate(&self) -> Result<(), ModelError> {
        let fail = |reason| {
            Err(ModelError {
                model: self.name,
                reason,
            })
        };
        if self.flash_page_size == 0 || self.flash_page_size % 2 != 0 {
            return fail("flash page size not aligned on words");
        }
        if self.flash_size % self.flash_page_size != 0 {
            return fail("flash size not aligned on page size");
        }
        if self.flash_boot_size % self.flash_page_size != 0 {
            return fail("flash bootloader size not aligned on page size");
        }
        if self.flash_boot_size >= self.flash_size {
            return fail("flash bootloader larger than total flash");
        }
        if self.flash_boot_size >= self.flash_app_size() {
            return fail("flash bootloader larger than flash application");
        }
        if self.mem_eeprom_size > 0x1000 {
            return fail("memory mapped EEPROM is too large");
        }
        if self.mem_sram_size >= MEM_MAX_SIZE - MEM_SRAM_START {
            return fail("internal SRAM is too large");
        }
        Ok(())
    }

    /// Flash size in 16-bit words.
    pub fn flash_words(&self) -> u32 {
        self.flash_size / 2
    }

    /// Application section size in bytes.
    pub fn flash_app_size(&self) -> u32 {
        self.flash_size - self.flash_boot_size
    }

    /// Start of the boot section, as a flash word address.
    pub fn boot_start_word(&self) -> u32 {
        (self.flash_size - self.flash_boot_size) / 2
    }

    /// Start of the external SRAM window in data space.
    pub fn exsram_start(&self) -> u32 {
        MEM_SRAM_START + self.mem_sram_size
    }

    /// Size of the external SRAM window, 0 when absent.
    pub fn exsram_size(&self) -> u32 {
        if self.has_exsram {
            MEM_MAX_SIZE - self.exsram_start()
        } else {
            0
        }
    }

    /// True when the PC does not fit in 16 bits and return addresses take
    /// three stack bytes instead of two.
    pub fn wide_pc(&self) -> bool {
        self.flash_size > 0x20000
    }

    /// Legal bits of the RAMP registers, derived from the end of data space.
    pub fn ramp_mask(&self) -> u8 {
        let end = self.exsram_start() + self.exsram_size();
        ((end - 1) >> 16) as u8
    }

    /// Legal bits of EIND, derived from the flash word count.
    pub fn eind_mask(&self) -> u8 {
        ((self.flash_words() - 1) >> 16) as u8
    }
}

/// Small part used throughout the test suite: 32K flash keeps return
/// addresses at two bytes.
#[cfg(test)]
pub(crate) const TEST_MODEL: ModelConfig = ModelConfig {
    name: "test32k",
    flash_size: 0x8000,
    flash_page_size: 0x100,
    flash_boot_size: 0x1000,
    mem_eeprom_size: 0x400,
    mem_sram_size: 0x1000,
    has_exsram: false,
};
