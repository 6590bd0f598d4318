//! Interrupt controller.
//!
//! Pending vectors are kept in four ordered sets, one per level. Within a
//! level the lowest vector number wins, so the sets double as priority
//! queues. The PMIC status and control registers live here; the PMIC
//! block is an I/O view over this state.

use std::collections::BTreeSet;

use log::error;

/// Interrupt levels, lowest to highest priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IntLvl {
    None = 0,
    Lo = 1,
    Med = 2,
    Hi = 3,
    Nmi = 4,
}

impl IntLvl {
    /// Decode a 2-bit peripheral INTLVL field.
    pub fn from_bits(v: u8) -> IntLvl {
        match v & 0x3 {
            0 => IntLvl::None,
            1 => IntLvl::Lo,
            2 => IntLvl::Med,
            _ => IntLvl::Hi,
        }
    }

    /// PMIC status bit for this level, `1 << (level - 1)`.
    pub fn status_bit(self) -> u8 {
        match self {
            IntLvl::None => 0,
            lvl => 1 << (lvl as u8 - 1),
        }
    }
}

/// PMIC CTRL: low-level interrupts enabled.
pub const CTRL_LOLVLEN: u8 = 0x01;
/// PMIC CTRL: medium-level interrupts enabled.
pub const CTRL_MEDLVLEN: u8 = 0x02;
/// PMIC CTRL: high-level interrupts enabled.
pub const CTRL_HILVLEN: u8 = 0x04;
/// PMIC CTRL: vector table relocated to the boot section.
pub const CTRL_IVSEL: u8 = 0x40;
/// PMIC CTRL: round-robin low-level scheduling (not implemented).
pub const CTRL_RREN: u8 = 0x80;

/// Pending interrupt queues and PMIC registers.
#[derive(Debug, Default)]
pub struct InterruptController {
    pending_lo: BTreeSet<u8>,
    pending_med: BTreeSet<u8>,
    pending_hi: BTreeSet<u8>,
    pending_nmi: BTreeSet<u8>,
    /// PMIC STATUS: one `*lvlex` bit per level currently being serviced.
    pub status: u8,
    /// PMIC CTRL.
    pub ctrl: u8,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear pending queues and registers.
    pub fn reset(&mut self) {
        self.pending_lo.clear();
        self.pending_med.clear();
        self.pending_hi.clear();
        self.pending_nmi.clear();
        self.status = 0;
        self.ctrl = 0;
    }

    /// Set, clear or update a pending interrupt.
    ///
    /// A vector lives in at most one queue; assigning a new level removes
    /// any previous membership, and `IntLvl::None` removes it entirely.
    pub fn set_iv_level(&mut self, iv: u8, lvl: IntLvl) {
        self.pending_lo.remove(&iv);
        self.pending_med.remove(&iv);
        self.pending_hi.remove(&iv);
        self.pending_nmi.remove(&iv);
        match lvl {
            IntLvl::None => {}
            IntLvl::Lo => {
                self.pending_lo.insert(iv);
            }
            IntLvl::Med => {
                self.pending_med.insert(iv);
            }
            IntLvl::Hi => {
                self.pending_hi.insert(iv);
            }
            IntLvl::Nmi => {
                self.pending_nmi.insert(iv);
            }
        }
    }

    /// Level a vector is currently pending at, for inspection.
    pub fn pending_level(&self, iv: u8) -> IntLvl {
        if self.pending_nmi.contains(&iv) {
            IntLvl::Nmi
        } else if self.pending_hi.contains(&iv) {
            IntLvl::Hi
        } else if self.pending_med.contains(&iv) {
            IntLvl::Med
        } else if self.pending_lo.contains(&iv) {
            IntLvl::Lo
        } else {
            IntLvl::None
        }
    }

    /// True when no vector is pending at any level.
    pub fn no_pending(&self) -> bool {
        self.pending_lo.is_empty()
            && self.pending_med.is_empty()
            && self.pending_hi.is_empty()
            && self.pending_nmi.is_empty()
    }

    /// Level of the interrupt currently being serviced, from the highest
    /// status bit set.
    pub fn current_level(&self) -> IntLvl {
        if self.status == 0 {
            return IntLvl::None; // common case
        }
        for lvl in [IntLvl::Nmi, IntLvl::Hi, IntLvl::Med, IntLvl::Lo] {
            if self.status & lvl.status_bit() != 0 {
                return lvl;
            }
        }
        IntLvl::None
    }

    /// Arbitrate pending interrupts against the level being serviced.
    ///
    /// On a win the vector is popped from its queue and the level's status
    /// bit is set; the caller performs the vector dispatch. NMI is always
    /// enabled; the other levels require their CTRL enable bit and a
    /// current level strictly below them.
    pub fn arbitrate(&mut self) -> Option<(u8, IntLvl)> {
        let current = self.current_level();
        if current >= IntLvl::Nmi {
            return None;
        }
        if let Some(iv) = self.pending_nmi.pop_first() {
            self.status |= IntLvl::Nmi.status_bit();
            return Some((iv, IntLvl::Nmi));
        }
        if current >= IntLvl::Hi {
            return None;
        }
        if self.ctrl & CTRL_HILVLEN != 0 {
            if let Some(iv) = self.pending_hi.pop_first() {
                self.status |= IntLvl::Hi.status_bit();
                return Some((iv, IntLvl::Hi));
            }
        }
        if current >= IntLvl::Med {
            return None;
        }
        if self.ctrl & CTRL_MEDLVLEN != 0 {
            if let Some(iv) = self.pending_med.pop_first() {
                self.status |= IntLvl::Med.status_bit();
                return Some((iv, IntLvl::Med));
            }
        }
        if current >= IntLvl::Lo {
            return None;
        }
        if self.ctrl & CTRL_LOLVLEN != 0 {
            if let Some(iv) = self.pending_lo.pop_first() {
                self.status |= IntLvl::Lo.status_bit();
                return Some((iv, IntLvl::Lo));
            }
        }
        None
    }

    /// RETI: clear the status bit of the highest level being serviced.
    ///
    /// Returns false when no level was active, which is a guest bug.
    /// Does not touch SREG.I; XMEGA devices leave it alone.
    pub fn reti_retire(&mut self) -> bool {
        for lvl in [IntLvl::Nmi, IntLvl::Hi, IntLvl::Med, IntLvl::Lo] {
            let bit = lvl.status_bit();
            if self.status & bit != 0 {
                self.status &= !bit;
                return true;
            }
        }
        error!("RETI but no active interruption");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_lives_in_exactly_one_queue() {
        let mut irq = InterruptController::new();
        irq.set_iv_level(14, IntLvl::Lo);
        assert_eq!(irq.pending_level(14), IntLvl::Lo);

        irq.set_iv_level(14, IntLvl::Hi);
        assert_eq!(irq.pending_level(14), IntLvl::Hi);

        irq.ctrl = CTRL_HILVLEN | CTRL_LOLVLEN;
        let (iv, lvl) = irq.arbitrate().unwrap();
        assert_eq!((iv, lvl), (14, IntLvl::Hi));
        assert_eq!(irq.pending_level(14), IntLvl::None);
    }

    #[test]
    fn test_set_then_none_is_indistinguishable_from_never_set() {
        let mut irq = InterruptController::new();
        irq.set_iv_level(3, IntLvl::Med);
        irq.set_iv_level(3, IntLvl::None);
        assert!(irq.no_pending());
        irq.ctrl = CTRL_MEDLVLEN;
        assert!(irq.arbitrate().is_none());
    }

    #[test]
    fn test_set_same_level_is_idempotent() {
        let mut irq = InterruptController::new();
        irq.set_iv_level(7, IntLvl::Lo);
        irq.set_iv_level(7, IntLvl::Lo);
        irq.ctrl = CTRL_LOLVLEN;
        assert!(irq.arbitrate().is_some());
        assert!(irq.arbitrate().is_none());
    }

    #[test]
    fn test_arbitration_requires_enable_bits() {
        let mut irq = InterruptController::new();
        irq.set_iv_level(5, IntLvl::Lo);
        assert!(irq.arbitrate().is_none());
        irq.ctrl = CTRL_LOLVLEN;
        assert!(irq.arbitrate().is_some());
    }

    #[test]
    fn test_nmi_ignores_enables_and_wins() {
        let mut irq = InterruptController::new();
        irq.set_iv_level(9, IntLvl::Nmi);
        irq.set_iv_level(2, IntLvl::Hi);
        irq.ctrl = CTRL_HILVLEN;
        assert_eq!(irq.arbitrate(), Some((9, IntLvl::Nmi)));
        assert_eq!(irq.current_level(), IntLvl::Nmi);
        // nothing preempts an NMI handler
        assert!(irq.arbitrate().is_none());
    }

    #[test]
    fn test_lowest_vector_wins_within_level() {
        let mut irq = InterruptController::new();
        irq.set_iv_level(0x40, IntLvl::Lo);
        irq.set_iv_level(0x04, IntLvl::Lo);
        irq.set_iv_level(0x20, IntLvl::Lo);
        irq.ctrl = CTRL_LOLVLEN;
        assert_eq!(irq.arbitrate(), Some((0x04, IntLvl::Lo)));
    }

    #[test]
    fn test_higher_level_preempts_lower() {
        let mut irq = InterruptController::new();
        irq.ctrl = CTRL_LOLVLEN | CTRL_MEDLVLEN;
        irq.set_iv_level(8, IntLvl::Lo);
        assert_eq!(irq.arbitrate(), Some((8, IntLvl::Lo)));

        irq.set_iv_level(6, IntLvl::Med);
        assert_eq!(irq.arbitrate(), Some((6, IntLvl::Med)));
        assert_eq!(irq.current_level(), IntLvl::Med);

        // low stays blocked while medium is being serviced
        irq.set_iv_level(8, IntLvl::Lo);
        assert!(irq.arbitrate().is_none());
    }

    #[test]
    fn test_reti_clears_highest_bit_only() {
        let mut irq = InterruptController::new();
        irq.status = IntLvl::Lo.status_bit() | IntLvl::Med.status_bit();
        assert!(irq.reti_retire());
        assert_eq!(irq.current_level(), IntLvl::Lo);
        assert!(irq.reti_retire());
        assert_eq!(irq.current_level(), IntLvl::None);
        assert!(!irq.reti_retire());
    }
}
