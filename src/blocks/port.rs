//! I/O port block.
//!
//! Implements the data direction and output registers with their SET,
//! CLR and TGL aliases. Input pins and pin interrupts are not wired to
//! anything yet, so IN and the interrupt registers are stubs.

use log::warn;

use super::Block;
use crate::device::core::Core;

const IO_SIZE: u16 = 32;
const IV_COUNT: u8 = 2;

/// Placement of one port on the I/O and vector maps.
#[derive(Debug, Clone, Copy)]
pub struct PortInstance {
    pub name: &'static str,
    pub io_base: u16,
    pub iv_base: u8,
}

/// The eleven ports of the ATxmega128A1.
pub const INSTANCES: [PortInstance; 11] = [
    PortInstance { name: "PORTA", io_base: 0x0600, iv_base: 66 },
    PortInstance { name: "PORTB", io_base: 0x0620, iv_base: 34 },
    PortInstance { name: "PORTC", io_base: 0x0640, iv_base: 2 },
    PortInstance { name: "PORTD", io_base: 0x0660, iv_base: 64 },
    PortInstance { name: "PORTE", io_base: 0x0680, iv_base: 43 },
    PortInstance { name: "PORTF", io_base: 0x06A0, iv_base: 104 },
    PortInstance { name: "PORTH", io_base: 0x06E0, iv_base: 96 },
    PortInstance { name: "PORTJ", io_base: 0x0700, iv_base: 98 },
    PortInstance { name: "PORTK", io_base: 0x0720, iv_base: 100 },
    PortInstance { name: "PORTQ", io_base: 0x07C0, iv_base: 94 },
    PortInstance { name: "PORTR", io_base: 0x07E0, iv_base: 4 },
];

/// One I/O port.
pub struct Port {
    instance: PortInstance,
    /// Data direction bitmask (1 is OUT, 0 is IN).
    dir: u8,
    /// Output value.
    out: u8,
}

impl Port {
    pub fn new(instance: PortInstance) -> Self {
        Self {
            instance,
            dir: 0,
            out: 0,
        }
    }
}

impl Block for Port {
    fn name(&self) -> &'static str {
        self.instance.name
    }

    fn io_base(&self) -> u16 {
        self.instance.io_base
    }

    fn io_size(&self) -> u16 {
        IO_SIZE
    }

    fn iv_base(&self) -> u8 {
        self.instance.iv_base
    }

    fn iv_count(&self) -> u8 {
        IV_COUNT
    }

    fn io_read(&mut self, _core: &mut Core, addr: u16) -> u8 {
        match addr {
            // DIR, DIRSET, DIRCLR, DIRTGL
            0x00..=0x03 => self.dir,
            // OUT, OUTSET, OUTCLR, OUTTGL
            0x04..=0x07 => self.out,
            0x08 => {
                // IN: no external pin values yet, driven pins read back
                warn!("{}: I/O read {:#04X}: not implemented", self.name(), addr);
                self.out & self.dir
            }
            // INTCTRL, INT0MASK, INT1MASK, INTFLAGS, PINnCTRL
            0x09..=0x0C | 0x10..=0x17 => {
                warn!("{}: I/O read {:#04X}: not implemented", self.name(), addr);
                0
            }
            _ => {
                warn!("{}: I/O read {:#04X}: reserved address", self.name(), addr);
                0
            }
        }
    }

    fn io_write(&mut self, _core: &mut Core, addr: u16, v: u8) {
        match addr {
            0x00 => self.dir = v,
            0x01 => self.dir |= v,
            0x02 => self.dir &= !v,
            0x03 => self.dir ^= v,
            0x04 => self.out = v,
            0x05 => self.out |= v,
            0x06 => self.out &= !v,
            0x07 => self.out ^= v,
            0x08..=0x0C | 0x10..=0x17 => {
                warn!("{}: I/O write {:#04X}: not implemented", self.name(), addr);
            }
            _ => {
                warn!("{}: I/O write {:#04X}: not writable", self.name(), addr);
            }
        }
    }

    fn reset(&mut self, _core: &mut Core) {
        self.dir = 0;
        self.out = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::model::TEST_MODEL;

    fn port() -> Port {
        Port::new(INSTANCES[0])
    }

    #[test]
    fn test_dir_set_clr_tgl() {
        let mut core = Core::new(TEST_MODEL);
        let mut p = port();
        p.io_write(&mut core, 0x01, 0x0F);
        assert_eq!(p.io_read(&mut core, 0x00), 0x0F);
        p.io_write(&mut core, 0x02, 0x03);
        assert_eq!(p.io_read(&mut core, 0x00), 0x0C);
        p.io_write(&mut core, 0x03, 0xFF);
        assert_eq!(p.io_read(&mut core, 0x00), 0xF3);
    }

    #[test]
    fn test_out_aliases() {
        let mut core = Core::new(TEST_MODEL);
        let mut p = port();
        p.io_write(&mut core, 0x04, 0xAA);
        p.io_write(&mut core, 0x05, 0x01);
        assert_eq!(p.io_read(&mut core, 0x06), 0xAB);
        p.io_write(&mut core, 0x07, 0xFF);
        assert_eq!(p.io_read(&mut core, 0x04), 0x54);
    }

    #[test]
    fn test_in_reads_driven_pins() {
        let mut core = Core::new(TEST_MODEL);
        let mut p = port();
        p.io_write(&mut core, 0x00, 0x0F);
        p.io_write(&mut core, 0x04, 0x35);
        assert_eq!(p.io_read(&mut core, 0x08), 0x05);
    }
}
