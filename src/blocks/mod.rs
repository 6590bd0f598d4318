//! Peripheral block interface and registry.
//!
//! Every peripheral is a [`Block`]: a named entity owning a range of I/O
//! addresses and optionally a range of interrupt vectors. The device routes
//! I/O accesses and vector acknowledgements through the [`BlockSet`], which
//! enforces non-overlap at connect time.
//!
//! Block hooks receive `&mut Core` so they can peek and poke the shared
//! device state (schedule events, post interrupt levels, read the CCP
//! window) without holding a reference back to the device.

use log::{error, info};
use thiserror::Error;

use crate::device::core::Core;
use crate::device::model::{IV_MAX_COUNT, MEM_IO_SIZE};

pub mod clk;
pub mod cpu;
pub mod gpior;
pub mod osc;
pub mod pmic;
pub mod port;
pub mod tc;

pub use clk::ClkBlock;
pub use cpu::CpuBlock;
pub use gpior::GpiorBlock;
pub use osc::OscBlock;
pub use pmic::PmicBlock;
pub use port::Port;
pub use tc::Tc;

/// Identity assigned to a block when it is connected.
///
/// Blocks that schedule their own step events use it to name themselves as
/// the event target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockId(pub(crate) usize);

/// Block connection failure, fatal at device construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("block {block}: I/O memory out of range")]
    IoOutOfRange { block: &'static str },
    #[error("block {block}: I/O memory space overlaps with block {other}")]
    IoOverlap {
        block: &'static str,
        other: &'static str,
    },
    #[error("block {block}: invalid interrupt vector number: 0")]
    IvBaseZero { block: &'static str },
    #[error("block {block}: interrupt vectors out of range")]
    IvOutOfRange { block: &'static str },
    #[error("block {block}: interrupt vectors overlap with block {other}")]
    IvOverlap {
        block: &'static str,
        other: &'static str,
    },
}

/// A peripheral block.
pub trait Block {
    /// Stable block name, used in logs and error messages.
    fn name(&self) -> &'static str;

    /// First I/O address owned by the block.
    fn io_base(&self) -> u16;

    /// Number of I/O bytes owned by the block.
    fn io_size(&self) -> u16;

    /// First interrupt vector owned by the block. 0 means none; vector 0
    /// is the reset vector and never belongs to a block.
    fn iv_base(&self) -> u8 {
        0
    }

    /// Number of interrupt vectors owned by the block.
    fn iv_count(&self) -> u8 {
        0
    }

    /// Called once when the block is connected to a device.
    fn connected(&mut self, id: BlockId) {
        let _ = id;
    }

    /// Read a byte at a block-local I/O address.
    fn io_read(&mut self, core: &mut Core, addr: u16) -> u8;

    /// Write a byte at a block-local I/O address.
    fn io_write(&mut self, core: &mut Core, addr: u16, v: u8);

    /// Reset the block state.
    fn reset(&mut self, core: &mut Core);

    /// Scheduled step callback. Returns domain ticks until the next firing,
    /// 0 to detach.
    fn step(&mut self, core: &mut Core) -> u64 {
        let _ = core;
        0
    }

    /// Interrupt acknowledgement hook, called with the block-local vector
    /// number before the PC is redirected.
    fn execute_iv(&mut self, core: &mut Core, iv: u8) {
        let _ = (core, iv);
    }
}

/// The connected blocks and the dense I/O and vector lookup tables.
pub struct BlockSet {
    blocks: Vec<Box<dyn Block>>,
    io_map: Vec<Option<BlockId>>,
    iv_map: [Option<BlockId>; IV_MAX_COUNT as usize],
}

impl Default for BlockSet {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSet {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            io_map: vec![None; MEM_IO_SIZE as usize],
            iv_map: [None; IV_MAX_COUNT as usize],
        }
    }

    /// Connect a block: claim its I/O and vector ranges, rejecting any
    /// overlap with an already-connected block.
    pub fn connect(&mut self, mut block: Box<dyn Block>) -> Result<BlockId, BlockError> {
        let name = block.name();
        info!("connecting block {}", name);

        let io_base = block.io_base() as usize;
        let io_end = io_base + block.io_size() as usize;
        if io_end > MEM_IO_SIZE as usize {
            return Err(BlockError::IoOutOfRange { block: name });
        }
        for addr in io_base..io_end {
            if let Some(id) = self.io_map[addr] {
                return Err(BlockError::IoOverlap {
                    block: name,
                    other: self.blocks[id.0].name(),
                });
            }
        }

        let iv_count = block.iv_count() as usize;
        let iv_base = block.iv_base() as usize;
        if iv_count > 0 {
            if iv_base == 0 {
                return Err(BlockError::IvBaseZero { block: name });
            }
            if iv_base + iv_count > IV_MAX_COUNT as usize {
                return Err(BlockError::IvOutOfRange { block: name });
            }
            for iv in iv_base..iv_base + iv_count {
                if let Some(id) = self.iv_map[iv] {
                    return Err(BlockError::IvOverlap {
                        block: name,
                        other: self.blocks[id.0].name(),
                    });
                }
            }
        }

        let id = BlockId(self.blocks.len());
        for slot in &mut self.io_map[io_base..io_end] {
            *slot = Some(id);
        }
        if iv_count > 0 {
            for slot in &mut self.iv_map[iv_base..iv_base + iv_count] {
                *slot = Some(id);
            }
        }
        block.connected(id);
        self.blocks.push(block);
        Ok(id)
    }

    /// Route an I/O read to the owning block.
    pub fn io_read(&mut self, core: &mut Core, addr: u16) -> u8 {
        match self.io_map.get(addr as usize).copied().flatten() {
            Some(id) => {
                let base = self.blocks[id.0].io_base();
                self.blocks[id.0].io_read(core, addr - base)
            }
            None => {
                error!("invalid I/O address to read: {:#06X} (no block)", addr);
                0
            }
        }
    }

    /// Route an I/O write to the owning block.
    pub fn io_write(&mut self, core: &mut Core, addr: u16, v: u8) {
        match self.io_map.get(addr as usize).copied().flatten() {
            Some(id) => {
                let base = self.blocks[id.0].io_base();
                self.blocks[id.0].io_write(core, addr - base, v);
            }
            None => {
                error!("invalid I/O address to write: {:#06X} (no block)", addr);
            }
        }
    }

    /// Reset every block, in connection order.
    pub fn reset_all(&mut self, core: &mut Core) {
        for block in &mut self.blocks {
            block.reset(core);
        }
    }

    /// Fire a block's step hook.
    pub fn step_block(&mut self, core: &mut Core, id: BlockId) -> u64 {
        self.blocks[id.0].step(core)
    }

    /// Owning block of a global interrupt vector.
    pub fn iv_owner(&self, iv: u8) -> Option<BlockId> {
        self.iv_map.get(iv as usize).copied().flatten()
    }

    /// Invoke the acknowledgement hook of the block owning `iv`.
    pub fn execute_iv(&mut self, core: &mut Core, iv: u8) {
        match self.iv_owner(iv) {
            Some(id) => {
                let base = self.blocks[id.0].iv_base();
                self.blocks[id.0].execute_iv(core, iv - base);
            }
            None => error!("no block owns interrupt vector {}", iv),
        }
    }

    /// Number of connected blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::model::TEST_MODEL;

    struct Dummy {
        name: &'static str,
        io_base: u16,
        io_size: u16,
        iv_base: u8,
        iv_count: u8,
    }

    impl Block for Dummy {
        fn name(&self) -> &'static str {
            self.name
        }
        fn io_base(&self) -> u16 {
            self.io_base
        }
        fn io_size(&self) -> u16 {
            self.io_size
        }
        fn iv_base(&self) -> u8 {
            self.iv_base
        }
        fn iv_count(&self) -> u8 {
            self.iv_count
        }
        fn io_read(&mut self, _core: &mut Core, _addr: u16) -> u8 {
            0x5A
        }
        fn io_write(&mut self, _core: &mut Core, _addr: u16, _v: u8) {}
        fn reset(&mut self, _core: &mut Core) {}
    }

    fn dummy(io_base: u16, io_size: u16, iv_base: u8, iv_count: u8) -> Box<Dummy> {
        Box::new(Dummy {
            name: "DUMMY",
            io_base,
            io_size,
            iv_base,
            iv_count,
        })
    }

    #[test]
    fn test_connect_and_route() {
        let mut core = Core::new(TEST_MODEL);
        let mut blocks = BlockSet::new();
        blocks.connect(dummy(0x100, 4, 0, 0)).unwrap();
        assert_eq!(blocks.io_read(&mut core, 0x102), 0x5A);
    }

    #[test]
    fn test_io_overlap_rejected() {
        let mut blocks = BlockSet::new();
        blocks.connect(dummy(0x100, 4, 0, 0)).unwrap();
        let err = blocks.connect(dummy(0x103, 4, 0, 0)).unwrap_err();
        assert!(matches!(err, BlockError::IoOverlap { .. }));
    }

    #[test]
    fn test_io_range_overflow_rejected() {
        let mut blocks = BlockSet::new();
        let err = blocks.connect(dummy(0xFFE, 4, 0, 0)).unwrap_err();
        assert_eq!(err, BlockError::IoOutOfRange { block: "DUMMY" });
    }

    #[test]
    fn test_iv_overlap_rejected() {
        let mut blocks = BlockSet::new();
        blocks.connect(dummy(0x100, 4, 10, 4)).unwrap();
        let err = blocks.connect(dummy(0x200, 4, 12, 2)).unwrap_err();
        assert!(matches!(err, BlockError::IvOverlap { .. }));
    }

    #[test]
    fn test_iv_base_zero_rejected() {
        let mut blocks = BlockSet::new();
        let err = blocks.connect(dummy(0x100, 4, 0, 2)).unwrap_err();
        assert_eq!(err, BlockError::IvBaseZero { block: "DUMMY" });
    }

    #[test]
    fn test_iv_range_overflow_rejected() {
        let mut blocks = BlockSet::new();
        let err = blocks.connect(dummy(0x100, 4, 0x7E, 4)).unwrap_err();
        assert_eq!(err, BlockError::IvOutOfRange { block: "DUMMY" });
    }

    #[test]
    fn test_unmapped_io_read_returns_zero() {
        let mut core = Core::new(TEST_MODEL);
        let mut blocks = BlockSet::new();
        assert_eq!(blocks.io_read(&mut core, 0x800), 0);
        blocks.io_write(&mut core, 0x800, 0xFF);
    }

    #[test]
    fn test_iv_owner_lookup() {
        let mut blocks = BlockSet::new();
        let id = blocks.connect(dummy(0x100, 4, 10, 4)).unwrap();
        assert_eq!(blocks.iv_owner(12), Some(id));
        assert_eq!(blocks.iv_owner(14), None);
    }
}
