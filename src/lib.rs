//! xmega-emu library
//!
//! Core emulation logic for 8-bit AVR XMEGA microcontrollers.
//!
//! # Module Organization
//!
//! - [`device`]: device core (memory map, clock scheduler, interrupts, CPU state)
//! - [`blocks`]: peripheral block interface and implementations
//! - [`isa`]: instruction decoding and execution
//! - [`firmware`]: firmware image loaders (raw binary, Intel HEX, ELF)
//! - [`config`]: emulator configuration

pub mod blocks;
pub mod config;
pub mod device;
pub mod firmware;
pub mod isa;
