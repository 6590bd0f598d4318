//! AVR XMEGA device.
//!
//! A [`Device`] owns the full machine state and the connected peripheral
//! blocks, and advances simulated time one scheduler event at a time.
//! The CPU itself runs as one scheduled callback that pulls instructions
//! from flash and cooperates with the interrupt controller at instruction
//! boundaries.
//!
//! Simulation is single threaded; callbacks run to completion and external
//! observers read state between [`Device::step`] calls.

pub mod bus;
pub mod clock_tree;
pub mod core;
pub mod cpu_regs;
pub mod interrupt;
pub mod model;
pub mod regfile;
pub mod scheduler;

use byteorder::{ByteOrder, LittleEndian};
use log::{debug, error};
use thiserror::Error;

use crate::blocks::{
    port, tc, Block, BlockError, BlockId, BlockSet, ClkBlock, CpuBlock, GpiorBlock, OscBlock,
    PmicBlock, Port, Tc,
};
use crate::isa;

use self::core::Core;
use self::cpu_regs::Sreg;
use self::interrupt::{IntLvl, CTRL_IVSEL};
use self::model::{ModelConfig, ModelError, MEM_SRAM_START};
use self::scheduler::{ClockDomain, EventTarget};

/// The CPU step event runs after peripheral steps due at the same tick.
const CPU_STEP_PRIORITY: u32 = 100;

/// Interrupt acknowledgement costs five CPU cycles before the first
/// handler instruction runs.
const INTERRUPT_ACK_CYCLES: u32 = 5;

/// Device construction and stepping failures.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error("flash data to load is too large: {size} bytes for {capacity} bytes of flash")]
    FlashImageTooLarge { size: usize, capacity: usize },

    #[error("flash data not aligned on words: {size} bytes")]
    FlashImageUnaligned { size: usize },

    #[error("no scheduled events: the device must be reset before stepping")]
    NoScheduledEvents,

    #[error("invalid PC value (overflow): {pc:#07X}")]
    PcOverflow { pc: u32 },
}

/// An emulated XMEGA device.
pub struct Device {
    core: Core,
    blocks: BlockSet,
}

impl Device {
    /// Build a device with the mandatory blocks (CPU, CLK, OSC, PMIC,
    /// GPIOR). Peripherals are connected afterwards with [`Device::connect`].
    pub fn new(model: ModelConfig) -> Result<Self, DeviceError> {
        model.validate()?;
        let core = Core::new(model);
        let mut blocks = BlockSet::new();
        blocks.connect(Box::new(CpuBlock))?;
        blocks.connect(Box::new(ClkBlock))?;
        blocks.connect(Box::new(OscBlock))?;
        blocks.connect(Box::new(PmicBlock))?;
        blocks.connect(Box::new(GpiorBlock::new()))?;
        Ok(Self { core, blocks })
    }

    /// Build an ATxmega128A1: the mandatory blocks plus its ports and
    /// timer/counters.
    pub fn atxmega128a1() -> Result<Self, DeviceError> {
        let mut device = Self::new(ModelConfig::ATXMEGA128A1)?;
        for instance in port::INSTANCES {
            device.connect(Box::new(Port::new(instance)))?;
        }
        for instance in tc::INSTANCES {
            device.connect(Box::new(Tc::new(instance)))?;
        }
        Ok(device)
    }

    /// Connect an additional peripheral block.
    pub fn connect(&mut self, block: Box<dyn Block>) -> Result<BlockId, DeviceError> {
        Ok(self.blocks.connect(block)?)
    }

    /// Reset the device.
    ///
    /// Blocks are reset in connection order and the CPU step event is
    /// scheduled for the next CPU tick. Internal SRAM is not cleared.
    pub fn reset(&mut self) {
        self.core.instruction_cycles = 0;
        self.core.interrupt_wait_instruction = true;
        self.core.sched.clear();

        // reset CLK first so schedule() computes correct scales
        let osc = self.core.osc;
        self.core.clock.reset(&osc);
        self.core
            .schedule(ClockDomain::Cpu, EventTarget::CpuStep, 1, CPU_STEP_PRIORITY);

        self.blocks.reset_all(&mut self.core);

        // SRAM is not cleared on reset
        self.core.regs.zero();
    }

    /// Advance the SYS clock to the next event tick and run every event
    /// due there.
    ///
    /// There is always at least one scheduled event on a reset device (the
    /// CPU step); an empty queue means the device was never reset.
    pub fn step(&mut self) -> Result<(), DeviceError> {
        let Device { core, blocks } = self;
        if core.sched.advance_to_next().is_none() {
            error!("no scheduled events: the device must be reset before stepping");
            return Err(DeviceError::NoScheduledEvents);
        }
        while let Some(ev) = core.sched.pop_due() {
            let next = match ev.target {
                EventTarget::CpuStep => Self::cpu_step(core, blocks),
                EventTarget::Block(id) => blocks.step_block(core, id),
            };
            if next > 0 {
                let scale = core.clock.scale_of(ev.domain);
                core.sched.reinsert(ev, next, scale);
            }
        }
        Ok(())
    }

    /// One CPU clock cycle.
    ///
    /// Order matters: pending interrupts are only considered once the
    /// previous instruction has fully retired, and never twice in a row
    /// without an instruction in between.
    fn cpu_step(core: &mut Core, blocks: &mut BlockSet) -> u64 {
        core.breaked = false;
        core.cpu.ccp_tick();

        if core.instruction_cycles == 0
            && !core.interrupt_wait_instruction
            && core.cpu.sreg.i()
            && core.cpu.ccp_state() == 0
            && Self::acknowledge_interrupt(core, blocks)
        {
            core.instruction_cycles = INTERRUPT_ACK_CYCLES;
            core.interrupt_wait_instruction = true;
        }

        while core.instruction_cycles == 0 {
            core.instruction_cycles = isa::execute_next(core, blocks);
            core.interrupt_wait_instruction = false;
        }
        core.instruction_cycles -= 1;
        1
    }

    /// Arbitrate and dispatch one pending interrupt.
    ///
    /// On a win the owning block is notified, the return PC is pushed and
    /// the PC is redirected to the vector (relocated to the boot section
    /// when IVSEL is set). Returns true if a vector was taken.
    fn acknowledge_interrupt(core: &mut Core, blocks: &mut BlockSet) -> bool {
        let Some((iv, lvl)) = core.irq.arbitrate() else {
            return false;
        };
        let mut iv_addr = 2 * u32::from(iv);
        if core.irq.ctrl & CTRL_IVSEL != 0 {
            iv_addr += core.model.boot_start_word();
        }
        blocks.execute_iv(core, iv);
        let pc = core.cpu.pc;
        core.push_return_addr(pc);
        core.cpu.pc = iv_addr;
        debug!(
            "acknowledge interrupt {}, level {:?}, PC:{:05X}",
            iv, lvl, iv_addr
        );
        true
    }

    /// Load a flash image, little-endian bytes into word storage.
    pub fn load_flash(&mut self, data: &[u8]) -> Result<(), DeviceError> {
        let capacity = self.core.model.flash_size as usize;
        if data.len() > capacity {
            return Err(DeviceError::FlashImageTooLarge {
                size: data.len(),
                capacity,
            });
        }
        if data.len() % 2 != 0 {
            return Err(DeviceError::FlashImageUnaligned { size: data.len() });
        }
        for (word, chunk) in self.core.flash.iter_mut().zip(data.chunks_exact(2)) {
            *word = LittleEndian::read_u16(chunk);
        }
        Ok(())
    }

    /// Current SYS clock tick.
    pub fn clk_sys_tick(&self) -> u64 {
        self.core.sched.now()
    }

    /// True when the last executed instruction was BREAK.
    pub fn breaked(&self) -> bool {
        self.core.breaked
    }

    /// Device model geometry.
    pub fn model(&self) -> &ModelConfig {
        &self.core.model
    }

    /// Program counter, in flash words.
    pub fn pc(&self) -> u32 {
        self.core.cpu.pc
    }

    /// Set the PC. Out-of-range values are rejected.
    pub fn set_pc(&mut self, pc: u32) -> Result<(), DeviceError> {
        if pc >= self.core.model.flash_words() {
            error!("invalid PC value (overflow): {:#07X}", pc);
            return Err(DeviceError::PcOverflow { pc });
        }
        self.core.cpu.pc = pc;
        Ok(())
    }

    /// Stack pointer.
    pub fn sp(&self) -> u16 {
        self.core.cpu.sp
    }

    /// Set the stack pointer. Values past the end of internal SRAM are
    /// reported and ignored.
    pub fn set_sp(&mut self, sp: u16) {
        if u32::from(sp) >= MEM_SRAM_START + self.core.model.mem_sram_size {
            error!("invalid SP value (overflow): {:#06X}", sp);
        } else {
            self.core.cpu.sp = sp;
        }
    }

    /// Status register.
    pub fn sreg(&self) -> Sreg {
        self.core.cpu.sreg
    }

    pub fn set_sreg(&mut self, sreg: u8) {
        self.core.cpu.sreg.set_byte(sreg);
    }

    /// Register file, for the debugger surface.
    pub fn regfile(&self) -> &regfile::RegFile {
        &self.core.regs
    }

    pub fn regfile_mut(&mut self) -> &mut regfile::RegFile {
        &mut self.core.regs
    }

    /// Flash words.
    pub fn flash_data(&self) -> &[u16] {
        &self.core.flash
    }

    pub fn flash_data_mut(&mut self) -> &mut [u16] {
        &mut self.core.flash
    }

    /// Read a data memory byte through the address router.
    pub fn read_data(&mut self, addr: u32) -> u8 {
        let Device { core, blocks } = self;
        bus::read_data(core, blocks, addr)
    }

    /// Write a data memory byte through the address router.
    pub fn write_data(&mut self, addr: u32, v: u8) {
        let Device { core, blocks } = self;
        bus::write_data(core, blocks, addr, v);
    }

    /// Read an I/O register.
    pub fn read_io(&mut self, addr: u16) -> u8 {
        self.blocks.io_read(&mut self.core, addr)
    }

    /// Write an I/O register.
    pub fn write_io(&mut self, addr: u16, v: u8) {
        self.blocks.io_write(&mut self.core, addr, v);
    }

    /// Set, clear or update a pending interrupt.
    pub fn set_iv_level(&mut self, iv: u8, lvl: IntLvl) {
        self.core.irq.set_iv_level(iv, lvl);
    }

    /// Level of the interrupt currently being serviced.
    pub fn current_int_lvl(&self) -> IntLvl {
        self.core.irq.current_level()
    }
}
