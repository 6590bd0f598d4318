//! TC 16-bit timer/counter block.
//!
//! The counter advances on a step event scheduled on the PER clock, one
//! firing per prescaled count. Compare/capture channels raise their
//! interrupt flags when the count matches; flag state combined with the
//! configured INTLVL drives the pending interrupt queues. PER and the CCx
//! registers are double-buffered behind the BV flags in CTRLG.

use log::{debug, error, warn};

use super::{Block, BlockId};
use crate::device::core::Core;
use crate::device::interrupt::IntLvl;
use crate::device::scheduler::{ClockDomain, EventHandle, EventTarget};

const IO_SIZE: u16 = 0x40;

/// Step events fire before the CPU step at the same tick.
const STEP_PRIORITY: u32 = 50;

// Interrupt flag bits, matching INTFLAGS layout.
const OVFIF: u8 = 0x01;
const ERRIF: u8 = 0x02;
const CCAIF: u8 = 0x04;
const CCBIF: u8 = 0x08;
const CCCIF: u8 = 0x10;
const CCDIF: u8 = 0x20;

// CTRLF bits.
const CTRLF_DIR: u8 = 0x01;
const CTRLF_LUPD: u8 = 0x02;

// CTRLG buffer-valid bits.
const CTRLG_PERBV: u8 = 0x01;
const CTRLG_CCABV: u8 = 0x02;
const CTRLG_CCBBV: u8 = 0x04;
const CTRLG_CCCBV: u8 = 0x08;
const CTRLG_CCDBV: u8 = 0x10;

// Block-local vector numbers.
const IV_OVF: u8 = 0;
const IV_ERR: u8 = 1;
const IV_CCA: u8 = 2;
const IV_CCB: u8 = 3;
const IV_CCC: u8 = 4;
const IV_CCD: u8 = 5;

/// Waveform generation modes (CTRLB.WGMODE).
const WGMODE_FRQ: u8 = 1;
const WGMODE_DSTOP: u8 = 5;
const WGMODE_DSBOTTOM: u8 = 7;

/// Placement of one timer/counter on the I/O and vector maps.
#[derive(Debug, Clone, Copy)]
pub struct TcInstance {
    pub name: &'static str,
    pub io_base: u16,
    pub iv_base: u8,
}

/// The eight timer/counters of the ATxmega128A1.
pub const INSTANCES: [TcInstance; 8] = [
    TcInstance { name: "TCC0", io_base: 0x0800, iv_base: 14 },
    TcInstance { name: "TCC1", io_base: 0x0840, iv_base: 20 },
    TcInstance { name: "TCD0", io_base: 0x0900, iv_base: 77 },
    TcInstance { name: "TCD1", io_base: 0x0940, iv_base: 83 },
    TcInstance { name: "TCE0", io_base: 0x0A00, iv_base: 47 },
    TcInstance { name: "TCE1", io_base: 0x0A40, iv_base: 53 },
    TcInstance { name: "TCF0", io_base: 0x0B00, iv_base: 108 },
    TcInstance { name: "TCF1", io_base: 0x0B40, iv_base: 114 },
];

/// One timer/counter.
///
/// Type 0 units (TCx0) have four compare channels and six vectors; type 1
/// units (TCx1) have two of each.
pub struct Tc {
    instance: TcInstance,
    tc_type: u8,
    id: Option<BlockId>,

    /// Clock source division factor, 0 when the timer is off.
    prescaler: u32,
    ctrlb: u8,
    ctrlc: u8,
    ovf_intlvl: IntLvl,
    err_intlvl: IntLvl,
    cca_intlvl: IntLvl,
    ccb_intlvl: IntLvl,
    ccc_intlvl: IntLvl,
    ccd_intlvl: IntLvl,
    ctrlf: u8,
    ctrlg: u8,
    intflags: u8,

    /// Shared high-byte latch for 16-bit register access.
    temp: u8,
    cnt: u16,
    per: u16,
    cca: u16,
    ccb: u16,
    ccc: u16,
    ccd: u16,
    perbuf: u16,
    ccabuf: u16,
    ccbbuf: u16,
    cccbuf: u16,
    ccdbuf: u16,

    step_event: Option<EventHandle>,
}

impl Tc {
    pub fn new(instance: TcInstance) -> Self {
        let tc_type = if instance.name.ends_with('0') { 0 } else { 1 };
        Self {
            instance,
            tc_type,
            id: None,
            prescaler: 0,
            ctrlb: 0,
            ctrlc: 0,
            ovf_intlvl: IntLvl::None,
            err_intlvl: IntLvl::None,
            cca_intlvl: IntLvl::None,
            ccb_intlvl: IntLvl::None,
            ccc_intlvl: IntLvl::None,
            ccd_intlvl: IntLvl::None,
            ctrlf: 0,
            ctrlg: 0,
            intflags: 0,
            temp: 0,
            cnt: 0,
            per: 0,
            cca: 0,
            ccb: 0,
            ccc: 0,
            ccd: 0,
            perbuf: 0,
            ccabuf: 0,
            ccbbuf: 0,
            cccbuf: 0,
            ccdbuf: 0,
            step_event: None,
        }
    }

    /// Timer type, 0 (TCx0) or 1 (TCx1).
    pub fn tc_type(&self) -> u8 {
        self.tc_type
    }

    /// True when no clock source is selected.
    pub fn off(&self) -> bool {
        self.prescaler == 0
    }

    fn wgmode(&self) -> u8 {
        self.ctrlb & 0x07
    }

    fn set_iv_level(&self, core: &mut Core, iv: u8, lvl: IntLvl) {
        core.set_iv_level(self.instance.iv_base + iv, lvl);
    }

    fn read_u16_low(&mut self, v: u16) -> u8 {
        self.temp = (v >> 8) as u8;
        v as u8
    }

    /// Flush double-buffered values on an UPDATE condition.
    fn process_update(&mut self) {
        if self.ctrlg & CTRLG_PERBV != 0 {
            self.per = self.perbuf;
        }
        if self.ctrlg & CTRLG_CCABV != 0 {
            self.cca = self.ccabuf;
        }
        if self.ctrlg & CTRLG_CCBBV != 0 {
            self.ccb = self.ccbbuf;
        }
        if self.ctrlg & CTRLG_CCCBV != 0 {
            self.ccc = self.cccbuf;
        }
        if self.ctrlg & CTRLG_CCDBV != 0 {
            self.ccd = self.ccdbuf;
        }
        self.ctrlg = 0;
    }

    /// UPDATE command, ignored while the lock update bit is set.
    fn update_command(&mut self) {
        if self.ctrlf & CTRLF_LUPD != 0 {
            return;
        }
        self.process_update();
    }

    /// RESTART command: counter direction and compare outputs.
    fn restart_command(&mut self) {
        self.ctrlf &= !CTRLF_DIR;
        self.ctrlc = 0;
    }

    /// RESET command, only honoured in the OFF state.
    fn reset_command(&mut self, core: &mut Core) {
        if !self.off() {
            warn!("{}: RESET command triggered but TC is not OFF", self.name());
            return;
        }
        self.reset(core);
    }

    fn write_ctrla(&mut self, core: &mut Core, v: u8) {
        if v & 0x08 != 0 {
            warn!("{}: event channel source not supported", self.name());
            return;
        }
        const PRESCALERS: [u32; 8] = [0, 1, 2, 4, 8, 64, 256, 1024];
        self.prescaler = PRESCALERS[(v & 0x07) as usize];
        if self.prescaler == 0 {
            if let Some(handle) = self.step_event.take() {
                core.unschedule(handle);
            }
        } else if self.step_event.is_none() {
            let Some(id) = self.id else {
                error!("{}: not connected, cannot schedule", self.name());
                return;
            };
            self.step_event = Some(core.schedule(
                ClockDomain::Per,
                EventTarget::Block(id),
                self.prescaler as u64,
                STEP_PRIORITY,
            ));
        }
        // when already running the new factor applies from the next firing
    }

    fn write_intctrla(&mut self, core: &mut Core, v: u8) {
        self.ovf_intlvl = IntLvl::from_bits(v);
        self.err_intlvl = IntLvl::from_bits(v >> 2);
        // reflect the new levels on already-raised flags
        if self.intflags & OVFIF != 0 {
            self.set_iv_level(core, IV_OVF, self.ovf_intlvl);
        }
        if self.intflags & ERRIF != 0 {
            self.set_iv_level(core, IV_ERR, self.err_intlvl);
        }
    }

    fn write_intctrlb(&mut self, core: &mut Core, v: u8) {
        self.cca_intlvl = IntLvl::from_bits(v);
        self.ccb_intlvl = IntLvl::from_bits(v >> 2);
        if self.tc_type == 0 {
            self.ccc_intlvl = IntLvl::from_bits(v >> 4);
            self.ccd_intlvl = IntLvl::from_bits(v >> 6);
        }
        if self.intflags & CCAIF != 0 {
            self.set_iv_level(core, IV_CCA, self.cca_intlvl);
        }
        if self.intflags & CCBIF != 0 {
            self.set_iv_level(core, IV_CCB, self.ccb_intlvl);
        }
        if self.tc_type == 0 {
            if self.intflags & CCCIF != 0 {
                self.set_iv_level(core, IV_CCC, self.ccc_intlvl);
            }
            if self.intflags & CCDIF != 0 {
                self.set_iv_level(core, IV_CCD, self.ccd_intlvl);
            }
        }
    }

    /// Advance the counter by one prescaled count.
    fn count(&mut self, core: &mut Core) {
        let wgmode = self.wgmode();
        let top = if wgmode == WGMODE_FRQ { self.cca } else { self.per };
        let mut trigger_ovf = false;
        debug!(
            "[{}] {} CNT = {}, DIR = {}, WGMODE = {}, PER = {}, CCA = {}",
            core.sched.now(),
            self.name(),
            self.cnt,
            self.ctrlf & CTRLF_DIR,
            wgmode,
            self.per,
            self.cca
        );

        if self.ctrlf & CTRLF_DIR != 0 {
            // down-counting
            if self.cnt == 0 {
                self.cnt = top;
            }
            self.cnt = self.cnt.wrapping_sub(1);
            if self.cnt == 0 {
                // BOTTOM reached
                trigger_ovf = wgmode != WGMODE_DSTOP;
                self.process_update();
                if wgmode > WGMODE_DSTOP {
                    self.ctrlf &= !CTRLF_DIR;
                }
            }
        } else {
            // up-counting
            if self.cnt == top {
                self.cnt = 0;
            }
            self.cnt = self.cnt.wrapping_add(1);
            if self.cnt == top {
                // TOP reached
                trigger_ovf = wgmode != WGMODE_DSBOTTOM;
                self.process_update();
                if wgmode > WGMODE_DSTOP {
                    self.ctrlf |= CTRLF_DIR;
                }
            }
        }

        if trigger_ovf {
            self.intflags |= OVFIF;
            self.set_iv_level(core, IV_OVF, self.ovf_intlvl);
        }

        if self.cnt == self.cca {
            self.intflags |= CCAIF;
            self.set_iv_level(core, IV_CCA, self.cca_intlvl);
        }
        if self.cnt == self.ccb {
            self.intflags |= CCBIF;
            self.set_iv_level(core, IV_CCB, self.ccb_intlvl);
        }
        if self.tc_type == 0 {
            if self.cnt == self.ccc {
                self.intflags |= CCCIF;
                self.set_iv_level(core, IV_CCC, self.ccc_intlvl);
            }
            if self.cnt == self.ccd {
                self.intflags |= CCDIF;
                self.set_iv_level(core, IV_CCD, self.ccd_intlvl);
            }
        }
    }
}

impl Block for Tc {
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
        if self.tc_type == 0 {
            6
        } else {
            4
        }
    }

    fn connected(&mut self, id: BlockId) {
        self.id = Some(id);
    }

    fn io_read(&mut self, _core: &mut Core, addr: u16) -> u8 {
        match addr {
            0x00 => {
                // CTRLA: map the division factor back to its CLKSEL encoding
                match self.prescaler {
                    0 => 0,
                    1 => 1,
                    2 => 2,
                    4 => 3,
                    8 => 4,
                    64 => 5,
                    256 => 6,
                    1024 => 7,
                    _ => unreachable!("invalid internal prescaler value"),
                }
            }
            0x01 => self.ctrlb,
            0x02 => self.ctrlc,
            0x03 => 0, // CTRLD
            0x04 => 0, // CTRLE
            0x06 => ((self.err_intlvl as u8) << 2) | self.ovf_intlvl as u8,
            0x07 => {
                ((self.ccd_intlvl as u8) << 6)
                    | ((self.ccc_intlvl as u8) << 4)
                    | ((self.ccb_intlvl as u8) << 2)
                    | self.cca_intlvl as u8
            }
            0x08 | 0x09 => self.ctrlf,
            0x0A | 0x0B => self.ctrlg,
            0x0C => self.intflags,
            0x0F => self.temp,
            0x20 => {
                let v = self.cnt;
                self.read_u16_low(v)
            }
            0x21 => self.temp,
            0x26 => {
                let v = self.per;
                self.read_u16_low(v)
            }
            0x27 => self.temp,
            0x28 => {
                let v = self.cca;
                self.read_u16_low(v)
            }
            0x29 => self.temp,
            0x2A => {
                let v = self.ccb;
                self.read_u16_low(v)
            }
            0x2B => self.temp,
            0x2C => {
                let v = self.ccc;
                self.read_u16_low(v)
            }
            0x2D => self.temp,
            0x2E => {
                let v = self.ccd;
                self.read_u16_low(v)
            }
            0x2F => self.temp,
            0x36 => {
                let v = self.perbuf;
                self.read_u16_low(v)
            }
            0x37 => self.temp,
            0x38 => {
                let v = self.ccabuf;
                self.read_u16_low(v)
            }
            0x39 => self.temp,
            0x3A => {
                let v = self.ccbbuf;
                self.read_u16_low(v)
            }
            0x3B => self.temp,
            0x3C => {
                let v = self.cccbuf;
                self.read_u16_low(v)
            }
            0x3D => self.temp,
            0x3E => {
                let v = self.ccdbuf;
                self.read_u16_low(v)
            }
            0x3F => self.temp,
            _ => {
                warn!("{}: I/O read {:#04X}: reserved address", self.name(), addr);
                0
            }
        }
    }

    fn io_write(&mut self, core: &mut Core, addr: u16, v: u8) {
        match addr {
            0x00 => self.write_ctrla(core, v),
            0x01 => {
                let mut v = v;
                if v & 0xF0 != 0 {
                    warn!("{}: CCxEN bits not supported", self.name());
                    v &= 0x0F;
                }
                self.ctrlb = v & 0xF7;
                if self.wgmode() == 2 || self.wgmode() == 4 {
                    error!("{}: invalid WGMODE value", self.name());
                    self.ctrlb &= !0x07;
                }
            }
            0x02 => self.ctrlc = v & 0x0F,
            0x03 => {
                // CTRLD
                if v != 0 {
                    warn!("{}: event actions not supported", self.name());
                }
            }
            0x04 => {
                // CTRLE
                match v & 0x03 {
                    0 => {}
                    1 => warn!("{}: BYTEMODE not supported", self.name()),
                    2 => warn!("{}: SPLITMODE not supported", self.name()),
                    _ => error!("{}: invalid BYTEM value", self.name()),
                }
            }
            0x06 => self.write_intctrla(core, v),
            0x07 => self.write_intctrlb(core, v),
            0x08 => self.ctrlf &= !(v & 0x03),
            0x09 => {
                // CTRLFSET
                self.ctrlf |= v & 0x03;
                match (v >> 2) & 0x3 {
                    1 => self.update_command(),
                    2 => self.restart_command(),
                    3 => self.reset_command(core),
                    _ => {}
                }
            }
            0x0A => self.ctrlg &= !(v & 0x1F),
            0x0B => self.ctrlg |= v & 0x1F,
            0x0C => self.intflags &= !v,
            0x0F => self.temp = v,
            0x20 => self.temp = v,
            0x21 => self.cnt = u16::from(self.temp) | (u16::from(v) << 8),
            0x26 => self.temp = v,
            0x27 => self.per = u16::from(self.temp) | (u16::from(v) << 8),
            0x28 => self.temp = v,
            0x29 => self.cca = u16::from(self.temp) | (u16::from(v) << 8),
            0x2A => self.temp = v,
            0x2B => self.ccb = u16::from(self.temp) | (u16::from(v) << 8),
            0x2C => self.temp = v,
            0x2D => self.ccc = u16::from(self.temp) | (u16::from(v) << 8),
            0x2E => self.temp = v,
            0x2F => self.ccd = u16::from(self.temp) | (u16::from(v) << 8),
            0x36 => self.temp = v,
            0x37 => {
                self.perbuf = u16::from(self.temp) | (u16::from(v) << 8);
                self.ctrlg |= CTRLG_PERBV;
            }
            0x38 => self.temp = v,
            0x39 => {
                self.ccabuf = u16::from(self.temp) | (u16::from(v) << 8);
                self.ctrlg |= CTRLG_CCABV;
            }
            0x3A => self.temp = v,
            0x3B => {
                self.ccbbuf = u16::from(self.temp) | (u16::from(v) << 8);
                self.ctrlg |= CTRLG_CCBBV;
            }
            0x3C => self.temp = v,
            0x3D => {
                self.cccbuf = u16::from(self.temp) | (u16::from(v) << 8);
                self.ctrlg |= CTRLG_CCCBV;
            }
            0x3E => self.temp = v,
            0x3F => {
                self.ccdbuf = u16::from(self.temp) | (u16::from(v) << 8);
                self.ctrlg |= CTRLG_CCDBV;
            }
            _ => {
                error!("{}: I/O write {:#04X}: not writable", self.name(), addr);
            }
        }
    }

    fn reset(&mut self, _core: &mut Core) {
        self.prescaler = 0;
        self.ctrlb = 0;
        self.ctrlc = 0;
        self.ovf_intlvl = IntLvl::None;
        self.err_intlvl = IntLvl::None;
        self.cca_intlvl = IntLvl::None;
        self.ccb_intlvl = IntLvl::None;
        self.ccc_intlvl = IntLvl::None;
        self.ccd_intlvl = IntLvl::None;
        self.ctrlf = 0;
        self.ctrlg = 0;
        self.intflags = 0;
        self.temp = 0;
        self.cnt = 0;
        self.per = 0;
        self.cca = 0;
        self.ccb = 0;
        self.ccc = 0;
        self.ccd = 0;
        self.perbuf = 0;
        self.ccabuf = 0;
        self.ccbbuf = 0;
        self.cccbuf = 0;
        self.ccdbuf = 0;
        // the device clears the event queue on reset, the handle is stale
        self.step_event = None;
    }

    fn step(&mut self, core: &mut Core) -> u64 {
        if self.prescaler == 0 {
            self.step_event = None;
            return 0;
        }
        self.count(core);
        self.prescaler as u64
    }

    fn execute_iv(&mut self, _core: &mut Core, iv: u8) {
        match iv {
            IV_OVF => self.intflags &= !OVFIF,
            IV_ERR => self.intflags &= !ERRIF,
            IV_CCA => self.intflags &= !CCAIF,
            IV_CCB => self.intflags &= !CCBIF,
            IV_CCC => self.intflags &= !CCCIF,
            IV_CCD => self.intflags &= !CCDIF,
            _ => error!("{}: invalid local interrupt vector {}", self.name(), iv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::model::TEST_MODEL;

    fn connected_tc() -> Tc {
        let mut tc = Tc::new(INSTANCES[0]);
        tc.connected(BlockId(0));
        tc
    }

    fn write16(tc: &mut Tc, core: &mut Core, addr: u16, v: u16) {
        tc.io_write(core, addr, v as u8);
        tc.io_write(core, addr + 1, (v >> 8) as u8);
    }

    #[test]
    fn test_type_from_name() {
        assert_eq!(Tc::new(INSTANCES[0]).tc_type(), 0);
        assert_eq!(Tc::new(INSTANCES[1]).tc_type(), 1);
        assert_eq!(Tc::new(INSTANCES[0]).iv_count(), 6);
        assert_eq!(Tc::new(INSTANCES[1]).iv_count(), 4);
    }

    #[test]
    fn test_ctrla_schedules_and_unschedules() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        assert!(tc.off());

        tc.io_write(&mut core, 0x00, 5); // div64
        assert_eq!(tc.prescaler, 64);
        assert_eq!(core.sched.len(), 1);
        assert_eq!(tc.io_read(&mut core, 0x00), 5);

        tc.io_write(&mut core, 0x00, 0);
        assert!(tc.off());
        assert_eq!(core.sched.len(), 0);
    }

    #[test]
    fn test_counting_to_per_raises_ovf() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        write16(&mut tc, &mut core, 0x26, 3); // PER = 3
        tc.io_write(&mut core, 0x06, 0x01); // OVF at low level

        for _ in 0..2 {
            tc.count(&mut core);
        }
        assert_eq!(tc.io_read(&mut core, 0x0C) & OVFIF, 0);
        tc.count(&mut core);
        assert_ne!(tc.io_read(&mut core, 0x0C) & OVFIF, 0);
        assert_eq!(
            core.irq.pending_level(INSTANCES[0].iv_base),
            IntLvl::Lo
        );
    }

    #[test]
    fn test_compare_match_raises_ccx() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        write16(&mut tc, &mut core, 0x26, 10); // PER
        write16(&mut tc, &mut core, 0x28, 2); // CCA
        tc.io_write(&mut core, 0x07, 0x02); // CCA at medium level

        tc.count(&mut core);
        assert_eq!(tc.intflags & CCAIF, 0);
        tc.count(&mut core);
        assert_ne!(tc.intflags & CCAIF, 0);
        assert_eq!(
            core.irq.pending_level(INSTANCES[0].iv_base + 2),
            IntLvl::Med
        );
    }

    #[test]
    fn test_execute_iv_clears_flag() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        tc.intflags = OVFIF | CCAIF;
        tc.execute_iv(&mut core, IV_OVF);
        assert_eq!(tc.intflags, CCAIF);
    }

    #[test]
    fn test_buffered_per_flushes_on_update() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        write16(&mut tc, &mut core, 0x26, 5);
        write16(&mut tc, &mut core, 0x36, 9); // PERBUF
        assert_ne!(tc.io_read(&mut core, 0x0A) & CTRLG_PERBV, 0);

        // UPDATE command through CTRLFSET
        tc.io_write(&mut core, 0x09, 1 << 2);
        assert_eq!(tc.per, 9);
        assert_eq!(tc.io_read(&mut core, 0x0A) & CTRLG_PERBV, 0);
    }

    #[test]
    fn test_lupd_blocks_update_command() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        write16(&mut tc, &mut core, 0x26, 5);
        write16(&mut tc, &mut core, 0x36, 9);
        tc.io_write(&mut core, 0x09, CTRLF_LUPD);
        tc.io_write(&mut core, 0x09, 1 << 2);
        assert_eq!(tc.per, 5);
    }

    #[test]
    fn test_16bit_reads_latch_high_byte() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        tc.cnt = 0x1234;
        assert_eq!(tc.io_read(&mut core, 0x20), 0x34);
        assert_eq!(tc.io_read(&mut core, 0x21), 0x12);
    }

    #[test]
    fn test_intflags_clear_by_writing_ones() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        tc.intflags = OVFIF | CCBIF;
        tc.io_write(&mut core, 0x0C, OVFIF);
        assert_eq!(tc.intflags, CCBIF);
    }

    #[test]
    fn test_reset_forgets_stale_event_handle() {
        let mut core = Core::new(TEST_MODEL);
        let mut tc = connected_tc();
        tc.io_write(&mut core, 0x00, 1);
        assert!(tc.step_event.is_some());
        core.sched.clear();
        tc.reset(&mut core);
        assert!(tc.step_event.is_none());
        assert!(tc.off());
    }
}
