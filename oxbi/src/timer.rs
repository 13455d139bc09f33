// SPDX-License-Identifier: MPL-2.0

//! Timer arming and the machine timer-interrupt relay.
//!
//! The supervisor arms its next tick through the `set-timer` call; the
//! machine timer interrupt that eventually fires is not handled here but
//! re-presented to the supervisor as a supervisor timer interrupt.

use crate::{
    hal::{Csr, IpiController, PrivRegs, MIP_MTIP, MIP_STIP},
    machine::Machine,
};

impl<I: IpiController> Machine<I> {
    /// Arms this hart's timer-compare register to `when`, clears the pending
    /// supervisor timer interrupt, and enables the machine timer interrupt.
    pub(crate) fn set_timer<R: PrivRegs>(&self, regs: &R, when: u64) {
        let me = regs.hart_id();
        self.hart(me).set_timecmp(when);
        regs.write_timecmp(when);
        regs.clear_bits(Csr::Mip, MIP_STIP);
        regs.set_bits(Csr::Mie, MIP_MTIP);
    }

    /// Relays a machine timer interrupt to the supervisor: mask the machine
    /// timer enable until the next `set-timer`, and post the supervisor
    /// timer-pending bit.
    pub(crate) fn relay_timer_interrupt<R: PrivRegs>(&self, regs: &R) {
        regs.clear_bits(Csr::Mie, MIP_MTIP);
        regs.set_bits(Csr::Mip, MIP_STIP);
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        hal::mock::{MockBoard, MockIpi},
        hal::{Csr, MIP_MTIP, MIP_STIP},
        hart::HartId,
        sbi::SbiFunction,
        trap::TrapFrame,
        HartMask, Machine,
    };

    #[test]
    fn set_timer_arms_compare_and_rearms_interrupt_lines() {
        let board = MockBoard::new();
        let machine = Machine::new(MockIpi::new(), HartMask::first(1));
        let me = HartId::bsp();
        let regs = board.regs(me);

        board.set_csr(me, Csr::Mip, MIP_STIP);

        let mut frame = TrapFrame::default();
        frame.a7 = SbiFunction::SetTimer as usize;
        frame.a0 = 0x0060_0000;
        machine.handle_ecall(&regs, &mut frame);

        assert_eq!(frame.a0, 0);
        assert_eq!(board.timecmp(me), 0x0060_0000);
        assert_eq!(machine.hart(me).timecmp(), 0x0060_0000);
        assert_eq!(board.csr_value(me, Csr::Mip) & MIP_STIP, 0);
        assert_ne!(board.csr_value(me, Csr::Mie) & MIP_MTIP, 0);
    }
}
