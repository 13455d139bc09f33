// SPDX-License-Identifier: MPL-2.0

//! The power sequencer.

use crate::{
    hal::{IpiController, PrivRegs},
    ipi::SignalSet,
    machine::Machine,
};

impl<I: IpiController> Machine<I> {
    /// Orders a clean shutdown with the given exit code.
    ///
    /// Announces the halt, reports the code to the finisher device, then
    /// either delegates the power-off to the HTIF channel or, without one,
    /// broadcasts a halt signal to the sibling harts (fire-and-forget) and
    /// parks this hart. Never returns control to any caller.
    pub fn poweroff<R: PrivRegs>(&self, regs: &R, code: u16) -> ! {
        crate::mprintln!("Power off");

        if let Some(finisher) = self.finisher() {
            finisher.exit(code);
        }
        if let Some(htif) = self.htif() {
            htif.poweroff();
        }

        let mut siblings = self.enabled();
        siblings.remove(regs.hart_id());
        self.signal_many(regs, siblings, SignalSet::HALT);
        self.park(regs)
    }

    /// Parks this hart in the idle-wait loop indefinitely.
    pub(crate) fn park<R: PrivRegs>(&self, regs: &R) -> ! {
        loop {
            regs.wait_for_interrupt();
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        hal::mock::{
            unwind_payload, MockBoard, MockFinisher, MockHtif, MockIpi, HTIF_POWEROFF, PARKED,
        },
        hal::IpiController,
        hart::HartId,
        ipi::SignalSet,
        HartMask, Machine,
    };

    #[test]
    fn poweroff_with_htif_delegates_and_never_returns() {
        let board = MockBoard::new();
        let finisher: &'static MockFinisher = Box::leak(Box::new(MockFinisher::new()));
        let machine = Machine::new(MockIpi::new(), HartMask::first(2))
            .with_htif(&MockHtif)
            .with_finisher(finisher);
        let regs = board.regs(HartId::bsp());

        let payload = unwind_payload(|| machine.poweroff(&regs, 3));
        assert!(payload.contains(HTIF_POWEROFF));
        assert_eq!(finisher.code(), Some(3));

        // Delegation happened before any sibling was signaled.
        let sibling = HartId::try_from(1).unwrap();
        assert!(machine.hart(sibling).mailbox().peek().is_empty());
    }

    #[test]
    fn poweroff_without_htif_broadcasts_halt_and_parks() {
        let board = MockBoard::new();
        let finisher: &'static MockFinisher = Box::leak(Box::new(MockFinisher::new()));
        let machine =
            Machine::new(MockIpi::new(), HartMask::first(4)).with_finisher(finisher);
        let me = HartId::bsp();
        let regs = board.regs(me);

        let payload = unwind_payload(|| machine.poweroff(&regs, 0));
        assert!(payload.contains(PARKED));
        assert_eq!(finisher.code(), Some(0));

        // Every sibling got the halt signal; the parked hart did not signal
        // itself.
        for hart in machine.enabled().iter() {
            if hart == me {
                assert!(machine.hart(hart).mailbox().peek().is_empty());
            } else {
                assert_eq!(machine.hart(hart).mailbox().peek(), SignalSet::HALT);
                assert!(machine.intc().is_pending(hart));
            }
        }
    }

    #[test]
    fn halt_signal_parks_the_receiving_hart() {
        let board = MockBoard::new();
        let machine = Machine::new(MockIpi::new(), HartMask::first(2));
        let target = HartId::try_from(1).unwrap();
        let regs0 = board.regs(HartId::bsp());

        machine.signal_many(&regs0, HartMask::from(target), SignalSet::HALT);

        let regs1 = board.regs(target);
        let payload = unwind_payload(|| machine.service_software_interrupt(&regs1));
        assert!(payload.contains(PARKED));
    }
}
