//! Shared device state.
//!
//! [`Core`] is everything the device owns apart from the connected blocks:
//! flash, SRAM, the register file, CPU registers, the interrupt controller,
//! the clock tree and the event scheduler. Block hooks receive `&mut Core`,
//! which gives them the cross-block peeks they need (CLK prescalers, CCP
//! state, PMIC status) without aliasing the block list itself.

use log::error;

use super::clock_tree::{ClockTree, OscState};
use super::cpu_regs::CpuRegs;
use super::interrupt::{IntLvl, InterruptController};
use super::model::{ModelConfig, MEM_SRAM_START};
use super::regfile::RegFile;
use super::scheduler::{ClockDomain, EventHandle, EventTarget, Scheduler};

/// Device state shared between the orchestrator and the blocks.
#[derive(Debug)]
pub struct Core {
    /// Memory-map geometry.
    pub model: ModelConfig,
    /// Flash, one entry per 16-bit word, erased to 0xFFFF.
    pub flash: Vec<u16>,
    /// Internal SRAM. Preserved across reset.
    pub sram: Vec<u8>,
    /// r0..r31.
    pub regs: RegFile,
    /// SP, PC, SREG, RAMP/EIND, CCP.
    pub cpu: CpuRegs,
    /// Pending interrupts and PMIC registers.
    pub irq: InterruptController,
    /// Clock configuration and prescalers.
    pub clock: ClockTree,
    /// Oscillator registers.
    pub osc: OscState,
    /// Clock event queue.
    pub sched: Scheduler,
    /// Cycles of the current instruction not consumed yet.
    pub(crate) instruction_cycles: u32,
    /// Forces an instruction to retire between two interrupts.
    pub(crate) interrupt_wait_instruction: bool,
    /// Set by BREAK, cleared at the start of each CPU step.
    pub(crate) breaked: bool,
}

impl Core {
    pub fn new(model: ModelConfig) -> Self {
        Self {
            model,
            flash: vec![0xFFFF; model.flash_words() as usize],
            sram: vec![0; model.mem_sram_size as usize],
            regs: RegFile::new(),
            cpu: CpuRegs::new(&model),
            irq: InterruptController::new(),
            clock: ClockTree::default(),
            osc: OscState::default(),
            sched: Scheduler::new(),
            instruction_cycles: 0,
            interrupt_wait_instruction: true,
            breaked: false,
        }
    }

    /// Schedule an event `ticks` domain ticks from now at the domain's
    /// current scale.
    pub fn schedule(
        &mut self,
        domain: ClockDomain,
        target: EventTarget,
        ticks: u64,
        priority: u32,
    ) -> EventHandle {
        let scale = self.clock.scale_of(domain);
        self.sched.schedule(domain, target, ticks, priority, scale)
    }

    /// Remove a scheduled event.
    pub fn unschedule(&mut self, handle: EventHandle) -> bool {
        self.sched.unschedule(handle)
    }

    /// Recompute frequencies and prescalers, then re-express every
    /// scheduled event in its domain's new scale.
    pub fn update_clock_config(&mut self) {
        let osc = self.osc;
        self.clock.update_frequencies(&osc);
        let clock = self.clock;
        self.sched.rescale(|domain| clock.scale_of(domain));
    }

    /// Post an interrupt level change for a global vector number.
    pub fn set_iv_level(&mut self, iv: u8, lvl: IntLvl) {
        self.irq.set_iv_level(iv, lvl);
    }

    /// Fetch a flash word. Out-of-range reads return erased flash.
    pub fn flash_word(&self, addr: u32) -> u16 {
        match self.flash.get(addr as usize) {
            Some(&word) => word,
            None => {
                error!("flash read out of range: {:#07X}", addr);
                0xFFFF
            }
        }
    }

    fn stack_slot(&self, sp: u16) -> Option<usize> {
        let addr = sp as u32;
        if (MEM_SRAM_START..MEM_SRAM_START + self.model.mem_sram_size).contains(&addr) {
            Some((addr - MEM_SRAM_START) as usize)
        } else {
            None
        }
    }

    /// Read the stack byte at `sp`.
    pub(crate) fn stack_read(&self, sp: u16) -> u8 {
        match self.stack_slot(sp) {
            Some(slot) => self.sram[slot],
            None => {
                error!("stack read outside internal SRAM: SP:{:04X}", sp);
                0
            }
        }
    }

    /// Write the stack byte at `sp`.
    pub(crate) fn stack_write(&mut self, sp: u16, v: u8) {
        match self.stack_slot(sp) {
            Some(slot) => self.sram[slot] = v,
            None => {
                error!("stack write outside internal SRAM: SP:{:04X}", sp);
            }
        }
    }

    /// Push a return PC, two bytes on parts up to 128K flash, three above.
    ///
    /// Shared by the CALL family and interrupt acknowledgement.
    pub(crate) fn push_return_addr(&mut self, pc: u32) {
        let sp = self.cpu.sp;
        if self.model.wide_pc() {
            self.stack_write(sp, pc as u8);
            self.stack_write(sp.wrapping_sub(1), (pc >> 8) as u8);
            self.stack_write(sp.wrapping_sub(2), (pc >> 16) as u8);
            self.cpu.sp = sp.wrapping_sub(3);
        } else {
            self.stack_write(sp, pc as u8);
            self.stack_write(sp.wrapping_sub(1), (pc >> 8) as u8);
            self.cpu.sp = sp.wrapping_sub(2);
        }
    }

    /// Pop a return PC pushed by [`Core::push_return_addr`].
    pub(crate) fn pop_return_addr(&mut self) -> u32 {
        if self.model.wide_pc() {
            let sp = self.cpu.sp.wrapping_add(3);
            self.cpu.sp = sp;
            u32::from(self.stack_read(sp))
                | u32::from(self.stack_read(sp.wrapping_sub(1))) << 8
                | u32::from(self.stack_read(sp.wrapping_sub(2))) << 16
        } else {
            let sp = self.cpu.sp.wrapping_add(2);
            self.cpu.sp = sp;
            u32::from(self.stack_read(sp)) | u32::from(self.stack_read(sp.wrapping_sub(1))) << 8
        }
    }
}
