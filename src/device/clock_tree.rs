//! System clock and oscillator state.
//!
//! The CLK and OSC blocks are I/O views over this state; it lives in the
//! device core because the scheduler derives every domain scale from the
//! prescaler configuration.

use log::{error, warn};

use super::scheduler::ClockDomain;

/// System clock source selection (CLK.CTRL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sclksel {
    Rc2M = 0,
    Rc32M = 1,
    Rc32K = 2,
    Xosc = 3,
    Pll = 4,
}

/// RTC clock source selection (CLK.RTCCTRL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcSrc {
    Ulp = 0,
    Tosc = 1,
    Rcosc = 2,
    Tosc32 = 5,
}

/// PLL reference source (OSC.PLLCTRL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PllSrc {
    Rc2M = 0,
    Rc32M = 2,
    Xosc = 3,
}

/// Oscillator block registers.
#[derive(Debug, Clone, Copy)]
pub struct OscState {
    /// OSC.CTRL enable bits.
    pub ctrl: u8,
    /// OSC.STATUS ready bits.
    pub status: u8,
    /// OSC.XOSCCTRL, stored but not interpreted.
    pub xoscctrl: u8,
    /// OSC.XOSCFAIL failure detection bits.
    pub xoscfail: u8,
    /// OSC.RC32KCAL calibration byte.
    pub rc32kcal: u8,
    /// PLL reference source.
    pub pllsrc: PllSrc,
    /// PLL multiplication factor.
    pub pllfac: u8,
    /// OSC.DFLLCTRL reference bits.
    pub dfllctrl: u8,
}

impl Default for OscState {
    fn default() -> Self {
        let mut osc = Self {
            ctrl: 0,
            status: 0,
            xoscctrl: 0,
            xoscfail: 0,
            rc32kcal: 0,
            pllsrc: PllSrc::Rc2M,
            pllfac: 0,
            dfllctrl: 0,
        };
        osc.reset();
        osc
    }
}

impl OscState {
    /// Power-on values: the 2MHz oscillator enabled and immediately ready.
    pub fn reset(&mut self) {
        self.ctrl = 0x01;
        self.status = self.ctrl;
        self.xoscctrl = 0;
        self.xoscfail = 0;
        self.rc32kcal = 0x55;
    }

    /// Resulting PLL output frequency in Hz.
    pub fn pll_frequency(&self) -> u32 {
        let f_base = match self.pllsrc {
            PllSrc::Rc2M => 2_000_000,
            PllSrc::Rc32M => 32_000_000 / 4,
            PllSrc::Xosc => {
                error!("unsupported PLLSRC value");
                2_000_000
            }
        };
        f_base * self.pllfac as u32
    }
}

/// System clock configuration and the prescaler values computed from it.
///
/// The computed fields must be kept in sync with the register values;
/// every mutation goes through [`ClockTree::update_frequencies`].
#[derive(Debug, Clone, Copy)]
pub struct ClockTree {
    /// Selected system clock source.
    pub sclk: Sclksel,
    /// CLK.PSCTRL raw value (PSBCDIV in bits 0..2, PSADIV in bits 2..7).
    pub psctrl: u8,
    /// CLK.CTRL and CLK.PSCTRL are locked until reset.
    pub locked: bool,
    /// RTC enabled.
    pub rtc_en: bool,
    /// RTC source.
    pub rtc_src: RtcSrc,
    /// Prescaler A division factor.
    pub prescaler_a: u32,
    /// Prescaler B division factor.
    pub prescaler_b: u32,
    /// Prescaler C division factor.
    pub prescaler_c: u32,
    /// SYS clock frequency in Hz.
    pub f_sys: u32,
}

impl Default for ClockTree {
    fn default() -> Self {
        let mut clock = Self {
            sclk: Sclksel::Rc2M,
            psctrl: 0,
            locked: false,
            rtc_en: false,
            rtc_src: RtcSrc::Ulp,
            prescaler_a: 1,
            prescaler_b: 1,
            prescaler_c: 1,
            f_sys: 2_000_000,
        };
        clock.update_frequencies(&OscState::default());
        clock
    }
}

impl ClockTree {
    /// PSADIV field of PSCTRL.
    pub fn psadiv(&self) -> u8 {
        (self.psctrl >> 2) & 0x1F
    }

    /// PSBCDIV field of PSCTRL.
    pub fn psbcdiv(&self) -> u8 {
        self.psctrl & 0x3
    }

    /// Reset to the 2MHz source with no prescaling.
    pub fn reset(&mut self, osc: &OscState) {
        self.sclk = Sclksel::Rc2M;
        self.psctrl = 0;
        self.locked = false;
        self.rtc_src = RtcSrc::Ulp;
        self.rtc_en = false;
        self.update_frequencies(osc);
    }

    /// Recompute `f_sys` and the prescaler factors after a register change.
    pub fn update_frequencies(&mut self, osc: &OscState) {
        self.f_sys = match self.sclk {
            Sclksel::Rc2M => 2_000_000,
            Sclksel::Rc32M => 32_000_000,
            Sclksel::Rc32K => 32_768,
            Sclksel::Pll => {
                let f = osc.pll_frequency();
                if f > 200_000_000 {
                    error!("PLL frequency is too high");
                } else if f < 10_000_000 {
                    error!("PLL frequency is too low");
                }
                f
            }
            // not reachable, the CLK block rejects XOSC earlier
            Sclksel::Xosc => {
                error!("unsupported SCLKSEL value");
                self.f_sys
            }
        };

        let psadiv = self.psadiv();
        let psbcdiv = self.psbcdiv();
        self.prescaler_a = if psadiv == 0 {
            1
        } else {
            1 << ((psadiv >> 1) + 1)
        };
        self.prescaler_b = if psbcdiv & 2 != 0 {
            1 << (4 - psbcdiv)
        } else {
            1
        };
        self.prescaler_c = 1 << (psbcdiv & 1);
    }

    /// SYS ticks per tick of the given clock domain.
    pub fn scale_of(&self, domain: ClockDomain) -> u64 {
        match domain {
            ClockDomain::Sys => 1,
            ClockDomain::Cpu | ClockDomain::Per => {
                (self.prescaler_a * self.prescaler_b * self.prescaler_c) as u64
            }
            ClockDomain::Per2 => (self.prescaler_a * self.prescaler_b) as u64,
            ClockDomain::Per4 => self.prescaler_a as u64,
            ClockDomain::Asy => {
                warn!("ASY clock not supported");
                1
            }
        }
    }

    /// Frequency of the given clock domain in Hz.
    pub fn frequency(&self, domain: ClockDomain) -> u32 {
        self.f_sys / self.scale_of(domain) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_runs_at_2mhz_unscaled() {
        let clock = ClockTree::default();
        assert_eq!(clock.f_sys, 2_000_000);
        assert_eq!(clock.scale_of(ClockDomain::Cpu), 1);
        assert_eq!(clock.scale_of(ClockDomain::Sys), 1);
    }

    #[test]
    fn test_prescaler_a_from_psadiv() {
        let osc = OscState::default();
        let mut clock = ClockTree::default();
        // PSADIV encodings 1,3,5,7,9 select divide by 2,4,8,16,32
        for (psadiv, expect) in [(0u8, 1u32), (1, 2), (3, 4), (5, 8), (7, 16), (9, 32)] {
            clock.psctrl = psadiv << 2;
            clock.update_frequencies(&osc);
            assert_eq!(clock.prescaler_a, expect, "psadiv={psadiv}");
        }
    }

    #[test]
    fn test_prescaler_b_c_from_psbcdiv() {
        let osc = OscState::default();
        let mut clock = ClockTree::default();
        for (psbcdiv, b, c) in [(0u8, 1u32, 1u32), (1, 1, 2), (2, 4, 1), (3, 2, 2)] {
            clock.psctrl = psbcdiv;
            clock.update_frequencies(&osc);
            assert_eq!((clock.prescaler_b, clock.prescaler_c), (b, c));
        }
    }

    #[test]
    fn test_domain_scales_multiply_out() {
        let osc = OscState::default();
        let mut clock = ClockTree::default();
        // A=8, B=4, C=1
        clock.psctrl = (5 << 2) | 2;
        clock.update_frequencies(&osc);
        assert_eq!(clock.scale_of(ClockDomain::Per4), 8);
        assert_eq!(clock.scale_of(ClockDomain::Per2), 32);
        assert_eq!(clock.scale_of(ClockDomain::Per), 32);
        assert_eq!(clock.scale_of(ClockDomain::Cpu), 32);
    }

    #[test]
    fn test_pll_frequency() {
        let mut osc = OscState::default();
        osc.pllsrc = PllSrc::Rc32M;
        osc.pllfac = 4;
        assert_eq!(osc.pll_frequency(), 32_000_000);

        let mut clock = ClockTree::default();
        clock.sclk = Sclksel::Pll;
        clock.update_frequencies(&osc);
        assert_eq!(clock.f_sys, 32_000_000);
    }
}
