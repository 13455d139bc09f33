// SPDX-License-Identifier: MPL-2.0

//! Remote data-cache maintenance.
//!
//! A specialization of the signal transport that carries a virtual/physical
//! address pair to the targets through their per-hart payload slots. The
//! receiving hart resolves the physical address to a cache way with a
//! four-way tag scan through the maintenance-controller registers and
//! writes back or invalidates the matching line.

use core::sync::atomic::{AtomicU64, Ordering};

use bit_field::BitField;

use crate::{
    hal::{Csr, IpiController, PrivRegs},
    hart::HartMask,
    ipi::SignalSet,
    machine::Machine,
};

/// Maintenance-controller command: invalidate a line by index.
pub(crate) const CCTL_L1D_IX_INVAL: usize = 16;
/// Maintenance-controller command: write back a line by index.
pub(crate) const CCTL_L1D_IX_WB: usize = 17;
/// Maintenance-controller command: read a tag by index.
pub(crate) const CCTL_L1D_IX_RTAG: usize = 19;

/// Associativity of the data cache the tag scan walks.
const WAYS: usize = 4;
/// Position of the way field in the maintenance address register.
const WAY_SHIFT: usize = 13;
/// Set-index bits taken from the physical address.
const INDEX_MASK: u64 = 0xff << 5;

/// The kind of maintenance to perform on the matching line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMaintOp {
    /// Write the line back to memory, keeping it resident.
    Writeback,
    /// Drop the line without writing it back.
    Invalidate,
}

impl CacheMaintOp {
    fn command(self) -> usize {
        match self {
            CacheMaintOp::Writeback => CCTL_L1D_IX_WB,
            CacheMaintOp::Invalidate => CCTL_L1D_IX_INVAL,
        }
    }

    fn signal(self) -> SignalSet {
        match self {
            CacheMaintOp::Writeback => SignalSet::DCACHE_WB,
            CacheMaintOp::Invalidate => SignalSet::DCACHE_INVAL,
        }
    }
}

/// One hart's cache-op payload slot.
///
/// The issuing hart writes the slot of every target before posting the
/// signal; the target reads only its own slot. The blocking wait serializes
/// reuse, so at most one operation is outstanding per slot.
pub struct CacheOpSlot {
    va: AtomicU64,
    pa: AtomicU64,
}

impl CacheOpSlot {
    pub(crate) const fn new() -> Self {
        Self {
            va: AtomicU64::new(0),
            pa: AtomicU64::new(0),
        }
    }

    fn publish(&self, va: u64, pa: u64) {
        self.va.store(va, Ordering::Release);
        self.pa.store(pa, Ordering::Release);
    }

    /// Reads the published `(virtual, physical)` address pair.
    pub fn load(&self) -> (u64, u64) {
        (self.va.load(Ordering::Acquire), self.pa.load(Ordering::Acquire))
    }
}

impl<I: IpiController> Machine<I> {
    /// Delivers a cache-maintenance signal carrying `(va, pa)` to every hart
    /// in `mask ∩ enabled`, blocking until all of them completed the
    /// operation.
    pub fn signal_dcache<R: PrivRegs>(
        &self,
        regs: &R,
        mask: HartMask,
        op: CacheMaintOp,
        va: u64,
        pa: u64,
    ) {
        for target in mask.intersection(self.enabled()).iter() {
            self.hart(target).dcache_slot().publish(va, pa);
        }
        // The transport fences between the mailbox write and the controller
        // post, so the payload is visible before any target looks.
        self.signal_many(regs, mask, op.signal());
    }

    /// Runs the receiving-hart side of a cache-maintenance signal.
    ///
    /// Scans the four way candidates of the set the physical address maps to
    /// and applies the maintenance command to the first way whose tag is
    /// valid and matches the address's frame number. A miss means the line is
    /// not resident and is not an error. The controller's address register is
    /// shared per-hart state and is restored afterwards.
    pub(crate) fn dcache_maintain<R: PrivRegs>(&self, regs: &R, op: CacheMaintOp) {
        let me = regs.hart_id();
        let (_va, pa) = self.hart(me).dcache_slot().load();

        let saved_beginaddr = regs.read(Csr::McctlBeginAddr);

        for way in 0..WAYS {
            let index = ((way << WAY_SHIFT) as u64 | (pa & INDEX_MASK)) as usize;
            regs.write(Csr::McctlBeginAddr, index);
            regs.write(Csr::McctlCommand, CCTL_L1D_IX_RTAG);
            let tag = regs.read(Csr::McctlData) as u64;

            if tag.get_bit(63) && tag.get_bits(2..32) == pa >> 12 {
                regs.write(Csr::McctlBeginAddr, index);
                regs.write(Csr::McctlCommand, op.command());
                break;
            }
        }

        regs.write(Csr::McctlBeginAddr, saved_beginaddr);
    }
}
