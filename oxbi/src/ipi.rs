// SPDX-License-Identifier: MPL-2.0

//! Inter-hart signal transport.
//!
//! Signals are typed bits delivered into a target hart's mailbox plus a
//! software interrupt posted at the controller. Kinds that require the target
//! to have acted (fences, cache maintenance) block the sender until every
//! target completes; while blocked, the sender absorbs signals aimed at
//! itself and replays them afterwards, which is what keeps two harts that
//! target each other simultaneously from waiting forever.

use bitflags::bitflags;

use crate::{
    dcache::CacheMaintOp,
    hal::{Csr, IpiController, PrivRegs, MIP_SSIP},
    hart::HartMask,
    machine::Machine,
};

bitflags! {
    /// The signal kinds a hart can deliver to another hart.
    ///
    /// Deliveries into a mailbox form a bitset union, not a queue: duplicate
    /// deliveries of the same kind collapse.
    pub struct SignalSet: usize {
        /// Plain supervisor software interrupt, fire-and-forget.
        const SOFT = 1 << 0;
        /// TLB shootdown; the sender blocks until acknowledged.
        const SFENCE_VMA = 1 << 1;
        /// Instruction-stream fence; the sender blocks until acknowledged.
        const FENCE_I = 1 << 2;
        /// Data-cache line writeback; the sender blocks until acknowledged.
        const DCACHE_WB = 1 << 3;
        /// Data-cache line invalidate; the sender blocks until acknowledged.
        const DCACHE_INVAL = 1 << 4;
        /// Park the target in its idle-wait loop, fire-and-forget.
        const HALT = 1 << 5;
    }
}

impl SignalSet {
    /// Returns whether delivering these kinds blocks the sender until all
    /// targets have acknowledged.
    pub fn blocks_sender(self) -> bool {
        self.intersects(
            Self::SFENCE_VMA | Self::FENCE_I | Self::DCACHE_WB | Self::DCACHE_INVAL,
        )
    }
}

/// The phase a multicast is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Posting mailbox bits and controller sources to the targets.
    Multicasting,
    /// Waiting for the targets to complete, absorbing incoming signals.
    Draining,
    /// All targets observed complete; absorbed signals replayed.
    Complete,
}

/// One in-flight signal multicast, advanced one phase per [`step`] call.
///
/// [`step`]: Multicast::step
pub struct Multicast<'a, I: IpiController> {
    machine: &'a Machine<I>,
    targets: HartMask,
    kinds: SignalSet,
    absorbed: u32,
    phase: Phase,
}

impl<'a, I: IpiController> Multicast<'a, I> {
    /// Prepares a multicast of `kinds` to `mask ∩ enabled`.
    pub fn new(machine: &'a Machine<I>, mask: HartMask, kinds: SignalSet) -> Self {
        Self {
            machine,
            targets: mask.intersection(machine.enabled()),
            kinds,
            absorbed: 0,
            phase: Phase::Multicasting,
        }
    }

    /// Returns the current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advances the multicast by one phase and returns the new phase.
    ///
    /// The draining step busy-polls until every target has completed; it is
    /// bounded only by the targets' eventual servicing of their pending
    /// signal.
    pub fn step<R: PrivRegs>(&mut self, regs: &R) -> Phase {
        match self.phase {
            Phase::Multicasting => {
                self.multicast(regs);
                self.phase = if self.kinds.blocks_sender() && !self.targets.is_empty() {
                    Phase::Draining
                } else {
                    Phase::Complete
                };
            }
            Phase::Draining => {
                self.drain(regs);
                self.phase = Phase::Complete;
            }
            Phase::Complete => {}
        }
        self.phase
    }

    fn multicast<R: PrivRegs>(&self, regs: &R) {
        for target in self.targets.iter() {
            self.machine.hart(target).mailbox().post(self.kinds);
            // The mailbox (and any payload slot) must be visible before the
            // target is told to look.
            regs.barrier();
            self.machine.intc().post(target);
        }
    }

    fn drain<R: PrivRegs>(&mut self, regs: &R) {
        let me = regs.hart_id();
        let intc = self.machine.intc();

        for target in self.targets.iter() {
            while intc.is_pending(target) {
                // Consume signals aimed at us instead of leaving them
                // pending; the sender on the other side may be blocked on
                // this hart the same way we are blocked on it.
                if let Some(source) = intc.claim(me) {
                    self.machine.hart(me).note_claim(source);
                    self.absorbed |= 1 << source;
                    intc.complete(me, source);
                } else {
                    core::hint::spin_loop();
                }
            }
        }

        // Re-arm anything we absorbed; it is taken by the trap path right
        // after the call returns.
        if self.absorbed != 0 {
            intc.repost(me, self.absorbed);
            regs.barrier();
        }
    }
}

impl<I: IpiController> Machine<I> {
    /// Delivers `kinds` to every hart in `mask ∩ enabled`.
    ///
    /// Fire-and-forget kinds return as soon as the signals are posted;
    /// blocking kinds return only after every target has completed.
    pub fn signal_many<R: PrivRegs>(&self, regs: &R, mask: HartMask, kinds: SignalSet) {
        let mut multicast = Multicast::new(self, mask, kinds);
        while multicast.step(regs) != Phase::Complete {}
    }

    /// Services this hart's pending software interrupt.
    ///
    /// Called from the trap path on a machine software interrupt: claims each
    /// pending source, takes the mailbox, runs the handler of every posted
    /// kind, and completes the source.
    pub fn service_software_interrupt<R: PrivRegs>(&self, regs: &R) {
        let me = regs.hart_id();
        while let Some(source) = self.intc().claim(me) {
            self.hart(me).note_claim(source);
            let kinds = self.hart(me).mailbox().take();
            self.handle_signals(regs, kinds);
            self.intc().complete(me, source);
        }
    }

    fn handle_signals<R: PrivRegs>(&self, regs: &R, kinds: SignalSet) {
        if kinds.contains(SignalSet::SOFT) {
            regs.set_bits(Csr::Mip, MIP_SSIP);
        }
        if kinds.contains(SignalSet::SFENCE_VMA) {
            regs.sfence_vma();
        }
        if kinds.contains(SignalSet::FENCE_I) {
            regs.fence_i();
        }
        if kinds.contains(SignalSet::DCACHE_WB) {
            self.dcache_maintain(regs, CacheMaintOp::Writeback);
        }
        if kinds.contains(SignalSet::DCACHE_INVAL) {
            self.dcache_maintain(regs, CacheMaintOp::Invalidate);
        }
        if kinds.contains(SignalSet::HALT) {
            self.park(regs);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Barrier,
    };

    use super::*;
    use crate::{
        hal::mock::{MockBoard, MockIpi},
        hart::HartId,
        HartMask, Machine,
    };

    fn two_hart_machine() -> Machine<MockIpi> {
        Machine::new(MockIpi::new(), HartMask::first(2))
    }

    #[test]
    fn soft_signal_returns_without_acknowledgment() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let regs0 = board.regs(HartId::bsp());
        let target = HartId::try_from(1).unwrap();

        machine.signal_many(&regs0, HartMask::from(target), SignalSet::SOFT);

        // Nobody ever serviced hart 1, yet the call came back.
        assert!(machine.intc().is_pending(target));
        assert_eq!(machine.hart(target).mailbox().peek(), SignalSet::SOFT);
    }

    #[test]
    fn disabled_harts_are_never_signaled() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let regs0 = board.regs(HartId::bsp());
        let disabled = HartId::try_from(5).unwrap();

        machine.signal_many(&regs0, HartMask::from(disabled), SignalSet::FENCE_I);

        assert!(!machine.intc().is_pending(disabled));
        assert!(machine.hart(disabled).mailbox().peek().is_empty());
    }

    #[test]
    fn multicast_phases_for_fire_and_forget() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let regs0 = board.regs(HartId::bsp());

        let mut multicast = Multicast::new(
            &machine,
            HartMask::from(HartId::try_from(1).unwrap()),
            SignalSet::SOFT,
        );
        assert_eq!(multicast.phase(), Phase::Multicasting);
        assert_eq!(multicast.step(&regs0), Phase::Complete);
    }

    #[test]
    fn self_targeted_blocking_signal_is_absorbed_and_replayed() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let me = HartId::bsp();
        let regs0 = board.regs(me);

        let mut multicast = Multicast::new(&machine, HartMask::from(me), SignalSet::SFENCE_VMA);
        assert_eq!(multicast.step(&regs0), Phase::Draining);
        assert_eq!(multicast.step(&regs0), Phase::Complete);

        // The signal was absorbed during the wait and re-armed: it is pending
        // again right after the call, with the mailbox intact.
        assert!(machine.intc().is_pending(me));
        assert_eq!(machine.hart(me).mailbox().peek(), SignalSet::SFENCE_VMA);

        machine.service_software_interrupt(&regs0);
        assert_eq!(board.sfence_count(me), 1);
        assert!(!machine.intc().is_pending(me));
    }

    #[test]
    fn blocking_signal_returns_after_target_completes() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let me = HartId::bsp();
        let target = HartId::try_from(1).unwrap();
        let stop = AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                let regs1 = board.regs(target);
                while !stop.load(Ordering::Acquire) {
                    machine.service_software_interrupt(&regs1);
                    std::hint::spin_loop();
                }
            });

            let regs0 = board.regs(me);
            machine.signal_many(&regs0, HartMask::from(target), SignalSet::FENCE_I);

            // The target's pending bit for the kind is gone before we return.
            assert!(machine.hart(target).mailbox().peek().is_empty());
            assert_eq!(board.ifence_count(target), 1);
            stop.store(true, Ordering::Release);
        });
    }

    #[test]
    fn issuer_concurrently_targeted_has_signal_pending_after_return() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let me = HartId::bsp();
        let target = HartId::try_from(1).unwrap();
        let stop = AtomicBool::new(false);

        // Someone already signaled us before we issue our own blocking call.
        machine.hart(me).mailbox().post(SignalSet::SFENCE_VMA);
        machine.intc().post(me);

        std::thread::scope(|s| {
            s.spawn(|| {
                let regs1 = board.regs(target);
                while !stop.load(Ordering::Acquire) {
                    machine.service_software_interrupt(&regs1);
                    std::hint::spin_loop();
                }
            });

            let regs0 = board.regs(me);
            machine.signal_many(&regs0, HartMask::from(target), SignalSet::FENCE_I);
            stop.store(true, Ordering::Release);

            // Our own signal was not lost: it is pending right after return.
            assert!(machine.intc().is_pending(me));
            assert_eq!(machine.hart(me).mailbox().peek(), SignalSet::SFENCE_VMA);

            machine.service_software_interrupt(&regs0);
            assert_eq!(board.sfence_count(me), 1);
        });
    }

    #[test]
    fn mutual_blocking_signals_do_not_deadlock() {
        let board = MockBoard::new();
        let machine = two_hart_machine();
        let start = Barrier::new(2);

        std::thread::scope(|s| {
            for (me, other) in [(0, 1), (1, 0)] {
                let board = &board;
                let machine = &machine;
                let start = &start;
                s.spawn(move || {
                    let me = HartId::try_from(me).unwrap();
                    let other = HartId::try_from(other).unwrap();
                    let regs = board.regs(me);
                    start.wait();
                    machine.signal_many(&regs, HartMask::from(other), SignalSet::SFENCE_VMA);
                    // Take whatever was absorbed and replayed during the wait.
                    machine.service_software_interrupt(&regs);
                });
            }
        });

        for hart in HartMask::first(2).iter() {
            assert_eq!(board.sfence_count(hart), 1);
            assert!(machine.hart(hart).mailbox().peek().is_empty());
            assert!(!machine.intc().is_pending(hart));
        }
    }
}
