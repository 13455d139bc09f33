// SPDX-License-Identifier: MPL-2.0

//! Client of the interrupt controller's software-interrupt block.
//!
//! The block is a PLIC instance whose sources are wired one per hart: source
//! `h + 1` raises the machine software interrupt of hart `h` (source 0 is
//! reserved, as in every PLIC). The gateway holds a posted source until the
//! claiming hart completes it, which is what the blocking signal protocol
//! polls against.

use bit_field::BitField;

use crate::{
    hal::IpiController,
    hart::{HartId, HartMask},
};

const PRIORITY_BASE: usize = 0x000000;
const PRIORITY_PER_SOURCE: usize = 0x000004;
const PENDING_BASE: usize = 0x001000;
const ENABLE_BASE: usize = 0x002000;
const ENABLE_PER_HART: usize = 0x000080;
const CONTEXT_BASE: usize = 0x200000;
const CONTEXT_PER_HART: usize = 0x001000;
const THRESHOLD_OFFSET: usize = 0x000000;
const CLAIM_OFFSET: usize = 0x000004;

/// The software-interrupt controller client.
pub struct PlicSw {
    base: usize,
}

impl PlicSw {
    /// Creates the client over the controller's MMIO block.
    ///
    /// # Safety
    ///
    /// `base` must be the virtual address the software-interrupt PLIC block
    /// is mapped at, valid for the firmware's lifetime.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn read(&self, offset: usize) -> u32 {
        // SAFETY: the mapping is guaranteed by `new`.
        unsafe { core::ptr::read_volatile((self.base + offset) as *const u32) }
    }

    fn write(&self, offset: usize, value: u32) {
        // SAFETY: the mapping is guaranteed by `new`.
        unsafe { core::ptr::write_volatile((self.base + offset) as *mut u32, value) };
    }

    const fn source_for(hart: HartId) -> u32 {
        hart.as_usize() as u32 + 1
    }

    fn pending_word(&self, source: u32) -> usize {
        PENDING_BASE + (source as usize / 32) * 4
    }

    fn claim_reg(&self, hart: HartId) -> usize {
        CONTEXT_BASE + CONTEXT_PER_HART * hart.as_usize() + CLAIM_OFFSET
    }

    /// Routes each enabled hart's dedicated source to that hart's context
    /// and opens its priority threshold.
    pub fn init(&self, harts: HartMask) {
        for hart in harts.iter() {
            let source = Self::source_for(hart);
            self.write(
                PRIORITY_BASE + source as usize * PRIORITY_PER_SOURCE,
                1,
            );

            let enable_word =
                ENABLE_BASE + ENABLE_PER_HART * hart.as_usize() + (source as usize / 32) * 4;
            let mut value = self.read(enable_word);
            value.set_bit(source as usize % 32, true);
            self.write(enable_word, value);

            self.write(
                CONTEXT_BASE + CONTEXT_PER_HART * hart.as_usize() + THRESHOLD_OFFSET,
                0,
            );
        }
    }
}

impl IpiController for PlicSw {
    fn post(&self, target: HartId) {
        let source = Self::source_for(target);
        // The pending registers of the software-interrupt block are
        // write-one-to-set.
        self.write(self.pending_word(source), 1 << (source % 32));
    }

    fn is_pending(&self, target: HartId) -> bool {
        let source = Self::source_for(target);
        self.read(self.pending_word(source)).get_bit(source as usize % 32)
    }

    fn claim(&self, hart: HartId) -> Option<u32> {
        match self.read(self.claim_reg(hart)) {
            0 => None,
            source => Some(source),
        }
    }

    fn complete(&self, hart: HartId, source: u32) {
        self.write(self.claim_reg(hart), source);
    }

    fn repost(&self, hart: HartId, mask: u32) {
        let _ = hart;
        self.write(PENDING_BASE, mask);
    }
}
