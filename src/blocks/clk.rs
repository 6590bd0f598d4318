//! CLK system clock block.
//!
//! CTRL and PSCTRL are protected: CTRL needs an open CCP window and both
//! are frozen once LOCK is set. Prescaler changes propagate to every
//! scheduled event through the core's clock reconfiguration path.

use log::{error, info, warn};

use super::Block;
use crate::device::core::Core;
use crate::device::clock_tree::{RtcSrc, Sclksel};
use crate::device::cpu_regs::CCP_IOREG;

/// The CLK block at I/O base 0x0040.
pub struct ClkBlock;

const IO_BASE: u16 = 0x0040;
const IO_SIZE: u16 = 8;

impl Block for ClkBlock {
    fn name(&self) -> &'static str {
        "CLK"
    }

    fn io_base(&self) -> u16 {
        IO_BASE
    }

    fn io_size(&self) -> u16 {
        IO_SIZE
    }

    fn io_read(&mut self, core: &mut Core, addr: u16) -> u8 {
        match addr {
            0x00 => core.clock.sclk as u8,
            0x01 => core.clock.psctrl,
            0x02 => core.clock.locked as u8,
            0x03 => (core.clock.rtc_en as u8) | ((core.clock.rtc_src as u8) << 1),
            _ => {
                warn!("I/O read CLK + {:#04X}: reserved address", addr);
                0
            }
        }
    }

    fn io_write(&mut self, core: &mut Core, addr: u16, v: u8) {
        if addr == 0x00 && !core.clock.locked {
            // CTRL
            let sclk = match v & 0x7 {
                0 => Some(Sclksel::Rc2M),
                1 => Some(Sclksel::Rc32M),
                2 => Some(Sclksel::Rc32K),
                3 => Some(Sclksel::Xosc),
                4 => Some(Sclksel::Pll),
                _ => None,
            };
            match sclk {
                None => error!("invalid SCLKSEL value"),
                Some(sclk) => {
                    if core.cpu.ccp_state() & CCP_IOREG != 0 {
                        if sclk == Sclksel::Xosc {
                            warn!("XOSC clock source not supported");
                        } else {
                            core.clock.sclk = sclk;
                            core.update_clock_config();
                        }
                    } else {
                        error!("cannot set CLK.CTRL: protected by CCP");
                    }
                }
            }
        } else if addr == 0x01 && !core.clock.locked {
            // PSCTRL
            let v = v & 0x7F;
            let psadiv = (v >> 2) & 0x1F;
            if psadiv > 9 || (psadiv != 0 && psadiv & 1 == 0) {
                error!("invalid PSADIV value");
            } else {
                core.clock.psctrl = v;
                core.update_clock_config();
            }
        } else if addr == 0x02 {
            // LOCK
            if !core.clock.locked && v != 0 {
                if core.cpu.ccp_state() & CCP_IOREG != 0 {
                    info!("locked CLK.CTRL and CLK.PSCTRL");
                    core.clock.locked = true;
                } else {
                    error!("cannot set CLK.LOCK: protected by CCP");
                }
            } else if core.clock.locked && v == 0 {
                error!("CLK.LOCK cannot be cleared");
            }
        } else if addr == 0x03 {
            // RTCCTRL
            core.clock.rtc_en = v & 1 != 0;
            let src = (v >> 1) & 7;
            core.clock.rtc_src = match src {
                0 => RtcSrc::Ulp,
                1 => RtcSrc::Tosc,
                2 => RtcSrc::Rcosc,
                5 => RtcSrc::Tosc32,
                _ => {
                    error!("invalid RTCSRC value");
                    core.clock.rtc_src
                }
            };
        } else {
            error!("I/O write CLK + {:#04X}: not writable", addr);
        }
    }

    fn reset(&mut self, core: &mut Core) {
        let osc = core.osc;
        core.clock.reset(&osc);
        core.update_clock_config();
    }
}
