// SPDX-License-Identifier: MPL-2.0

//! Machine-trap entry dispatch, privilege redirection, and the fatal handler.
//!
//! The assembly entry layer saves the general-purpose registers into a
//! [`TrapFrame`] and calls [`Machine::handle_trap`]. Traps are routed by
//! cause: software interrupt to the signal service routine, timer interrupt
//! to the supervisor relay, environment call to the dispatcher. The only
//! faults machine mode survives are page/access faults taken while it was
//! emulating on behalf of a lower privilege level; those are re-presented to
//! the supervisor as if they had trapped there natively. Everything else is
//! fatal.

use int_to_c_enum::TryFromInt;

use crate::{
    hal::{
        Csr, IpiController, PrivRegs, MSTATUS_MPP_MASK, MSTATUS_MPP_SHIFT, MSTATUS_MPRV,
        MSTATUS_SIE, MSTATUS_SPIE, MSTATUS_SPP, PRV_S,
    },
    machine::Machine,
};

/// The general-purpose registers saved by the trap entry layer.
#[derive(Debug, Default, Clone)]
#[repr(C)]
pub struct TrapFrame {
    /// Return address (`x1`).
    pub ra: usize,
    /// Stack pointer (`x2`).
    pub sp: usize,
    /// Global pointer (`x3`).
    pub gp: usize,
    /// Thread pointer (`x4`).
    pub tp: usize,
    /// Temporary (`x5`).
    pub t0: usize,
    /// Temporary (`x6`).
    pub t1: usize,
    /// Temporary (`x7`).
    pub t2: usize,
    /// Saved register / frame pointer (`x8`).
    pub s0: usize,
    /// Saved register (`x9`).
    pub s1: usize,
    /// Argument/result register (`x10`).
    pub a0: usize,
    /// Argument register (`x11`).
    pub a1: usize,
    /// Argument register (`x12`).
    pub a2: usize,
    /// Argument register (`x13`).
    pub a3: usize,
    /// Argument register (`x14`).
    pub a4: usize,
    /// Argument register (`x15`).
    pub a5: usize,
    /// Argument register (`x16`).
    pub a6: usize,
    /// Argument register, call function number (`x17`).
    pub a7: usize,
    /// Saved register (`x18`).
    pub s2: usize,
    /// Saved register (`x19`).
    pub s3: usize,
    /// Saved register (`x20`).
    pub s4: usize,
    /// Saved register (`x21`).
    pub s5: usize,
    /// Saved register (`x22`).
    pub s6: usize,
    /// Saved register (`x23`).
    pub s7: usize,
    /// Saved register (`x24`).
    pub s8: usize,
    /// Saved register (`x25`).
    pub s9: usize,
    /// Saved register (`x26`).
    pub s10: usize,
    /// Saved register (`x27`).
    pub s11: usize,
    /// Temporary (`x28`).
    pub t3: usize,
    /// Temporary (`x29`).
    pub t4: usize,
    /// Temporary (`x30`).
    pub t5: usize,
    /// Temporary (`x31`).
    pub t6: usize,
}

/// Synchronous trap causes this runtime distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
#[repr(u32)]
pub enum Exception {
    /// Instruction address misaligned.
    InstructionMisaligned = 0,
    /// Instruction access fault.
    InstructionAccessFault = 1,
    /// Illegal instruction.
    IllegalInstruction = 2,
    /// Breakpoint.
    Breakpoint = 3,
    /// Load address misaligned.
    LoadMisaligned = 4,
    /// Load access fault.
    LoadAccessFault = 5,
    /// Store/AMO address misaligned.
    StoreMisaligned = 6,
    /// Store/AMO access fault.
    StoreAccessFault = 7,
    /// Environment call from U-mode.
    UserEnvCall = 8,
    /// Environment call from S-mode.
    SupervisorEnvCall = 9,
    /// Environment call from M-mode.
    MachineEnvCall = 11,
    /// Instruction page fault.
    InstructionPageFault = 12,
    /// Load page fault.
    LoadPageFault = 13,
    /// Store/AMO page fault.
    StorePageFault = 15,
}

impl Exception {
    /// Whether the cause is eligible for redirection to the supervisor when
    /// it was incurred while emulating for a lower privilege level.
    fn redirectable(self) -> bool {
        matches!(
            self,
            Exception::InstructionAccessFault
                | Exception::LoadAccessFault
                | Exception::StoreAccessFault
                | Exception::LoadPageFault
                | Exception::StorePageFault
        )
    }
}

/// Asynchronous trap causes this runtime distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
#[repr(u32)]
pub enum Interrupt {
    /// Machine software interrupt.
    MachineSoft = 3,
    /// Machine timer interrupt.
    MachineTimer = 7,
    /// Machine external interrupt.
    MachineExternal = 11,
}

const INTERRUPT_FLAG: usize = 1 << (usize::BITS - 1);

impl<I: IpiController> Machine<I> {
    /// Entry point for every trap taken in machine mode.
    ///
    /// Routes by trap cause; the frame's `a0` carries the result back for
    /// environment calls. Unrecognized causes do not return.
    pub fn handle_trap<R: PrivRegs>(&self, regs: &R, frame: &mut TrapFrame) {
        let mcause = regs.read(Csr::Mcause);

        if mcause & INTERRUPT_FLAG != 0 {
            let interrupt = u32::try_from(mcause & !INTERRUPT_FLAG)
                .ok()
                .and_then(|code| Interrupt::try_from(code).ok());
            match interrupt {
                Some(Interrupt::MachineSoft) => self.service_software_interrupt(regs),
                Some(Interrupt::MachineTimer) => self.relay_timer_interrupt(regs),
                _ => self.fatal_trap(regs),
            }
        } else {
            let exception = u32::try_from(mcause)
                .ok()
                .and_then(|code| Exception::try_from(code).ok());
            match exception {
                Some(Exception::SupervisorEnvCall) => self.handle_ecall(regs, frame),
                Some(e) if e.redirectable() => self.emulation_fault(regs, frame),
                _ => self.fatal_trap(regs),
            }
        }
    }

    /// A page/access fault in machine mode. Survivable only if machine mode
    /// was running a load/store on behalf of a lower privilege level.
    fn emulation_fault<R: PrivRegs>(&self, regs: &R, frame: &TrapFrame) -> ! {
        if regs.read(Csr::Mstatus) & MSTATUS_MPRV != 0 {
            // The emulation path stashes the interrupted context's epc and
            // mstatus in a2/a3 before touching lower-privilege memory.
            self.redirect(regs, frame.a2, frame.a3, regs.read(Csr::Mtval))
        } else {
            self.fatal_trap(regs)
        }
    }

    /// Re-presents the current trap to the supervisor as if it had trapped
    /// there natively, then transfers control to the supervisor-switch stub.
    pub fn redirect<R: PrivRegs>(
        &self,
        regs: &R,
        epc: usize,
        mstatus: usize,
        badaddr: usize,
    ) -> ! {
        prepare_redirect(regs, epc, mstatus, badaddr);
        regs.redirect_entry()
    }

    /// The terminal state for any trap the runtime does not understand:
    /// narrate the context and halt the whole system.
    pub fn fatal_trap<R: PrivRegs>(&self, regs: &R) -> ! {
        crate::mprintln!(
            "machine mode: unhandlable trap {} @ {:#x}",
            regs.read(Csr::Mcause),
            regs.read(Csr::Mepc)
        );
        self.poweroff(regs, 1)
    }
}

/// Rewrites the supervisor trap CSRs and the privilege-control word so the
/// current trap appears to have been taken directly into supervisor mode.
///
/// `epc` and `mstatus` are the interrupted context's values captured at trap
/// time; `badaddr` is the faulting address. Split out of [`Machine::redirect`]
/// so the register rewrite is checkable without diverging.
pub fn prepare_redirect(regs: &impl PrivRegs, epc: usize, mstatus: usize, badaddr: usize) {
    regs.write(Csr::Stval, badaddr);
    regs.write(Csr::Sepc, epc);
    regs.write(Csr::Scause, regs.read(Csr::Mcause));
    regs.write(Csr::Mepc, regs.read(Csr::Stvec));

    let mut new_mstatus = mstatus & !(MSTATUS_SPP | MSTATUS_SPIE | MSTATUS_SIE);
    if mstatus & MSTATUS_SIE != 0 {
        new_mstatus |= MSTATUS_SPIE;
    }
    if (mstatus & MSTATUS_MPP_MASK) >> MSTATUS_MPP_SHIFT == PRV_S {
        new_mstatus |= MSTATUS_SPP;
    }
    new_mstatus = (new_mstatus & !MSTATUS_MPP_MASK) | (PRV_S << MSTATUS_MPP_SHIFT);
    regs.write(Csr::Mstatus, new_mstatus);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        hal::mock::{unwind_payload, MockBoard, MockIpi, PARKED, REDIRECTED},
        hal::{MIP_MTIP, MIP_SSIP, MIP_STIP},
        hart::HartId,
        ipi::SignalSet,
        HartMask, Machine,
    };

    fn machine() -> Machine<MockIpi> {
        Machine::new(MockIpi::new(), HartMask::first(2))
    }

    #[test]
    fn redirected_fault_preserves_supervisor_context() {
        let board = MockBoard::new();
        let machine = machine();
        let me = HartId::bsp();
        let regs = board.regs(me);

        board.set_csr(me, Csr::Mcause, Exception::LoadPageFault as usize);
        board.set_csr(me, Csr::Mtval, 0xdead_b000);
        board.set_csr(me, Csr::Stvec, 0xffff_ffc0_0020_0000);
        board.set_csr(me, Csr::Mstatus, MSTATUS_MPRV);

        let mut frame = TrapFrame::default();
        frame.a2 = 0x8020_1234; // interrupted epc
        frame.a3 = MSTATUS_SIE | (PRV_S << MSTATUS_MPP_SHIFT); // captured mstatus

        let payload = unwind_payload(|| machine.handle_trap(&regs, &mut frame));
        assert!(payload.contains(REDIRECTED));

        assert_eq!(board.csr_value(me, Csr::Stval), 0xdead_b000);
        assert_eq!(board.csr_value(me, Csr::Sepc), 0x8020_1234);
        assert_eq!(
            board.csr_value(me, Csr::Scause),
            Exception::LoadPageFault as usize
        );
        assert_eq!(board.csr_value(me, Csr::Mepc), 0xffff_ffc0_0020_0000);
        assert_eq!(
            board.csr_value(me, Csr::Mstatus),
            MSTATUS_SPIE | MSTATUS_SPP | (PRV_S << MSTATUS_MPP_SHIFT)
        );
    }

    #[test]
    fn fault_without_emulation_context_is_fatal() {
        let board = MockBoard::new();
        let machine = machine();
        let me = HartId::bsp();
        let regs = board.regs(me);

        board.set_csr(me, Csr::Mcause, Exception::StoreAccessFault as usize);

        let mut frame = TrapFrame::default();
        let payload = unwind_payload(|| machine.handle_trap(&regs, &mut frame));
        assert!(payload.contains(PARKED));
    }

    #[test]
    fn unrecognized_causes_are_fatal() {
        let board = MockBoard::new();
        let machine = machine();
        let me = HartId::bsp();
        let regs = board.regs(me);

        for mcause in [
            Exception::IllegalInstruction as usize,
            Exception::Breakpoint as usize,
            INTERRUPT_FLAG | 1, // supervisor software interrupt
        ] {
            board.set_csr(me, Csr::Mcause, mcause);
            let mut frame = TrapFrame::default();
            let payload = unwind_payload(|| machine.handle_trap(&regs, &mut frame));
            assert!(payload.contains(PARKED), "cause {mcause:#x} must be fatal");
        }
    }

    #[test]
    fn software_interrupt_routes_to_signal_service() {
        let board = MockBoard::new();
        let machine = machine();
        let me = HartId::bsp();
        let regs = board.regs(me);

        machine.hart(me).mailbox().post(SignalSet::SOFT);
        machine.intc().post(me);
        board.set_csr(me, Csr::Mcause, INTERRUPT_FLAG | Interrupt::MachineSoft as usize);

        let mut frame = TrapFrame::default();
        machine.handle_trap(&regs, &mut frame);

        assert_ne!(board.csr_value(me, Csr::Mip) & MIP_SSIP, 0);
        assert!(!machine.intc().is_pending(me));
    }

    #[test]
    fn timer_interrupt_is_relayed_to_the_supervisor() {
        let board = MockBoard::new();
        let machine = machine();
        let me = HartId::bsp();
        let regs = board.regs(me);

        board.set_csr(me, Csr::Mie, MIP_MTIP);
        board.set_csr(me, Csr::Mcause, INTERRUPT_FLAG | Interrupt::MachineTimer as usize);

        let mut frame = TrapFrame::default();
        machine.handle_trap(&regs, &mut frame);

        assert_eq!(board.csr_value(me, Csr::Mie) & MIP_MTIP, 0);
        assert_ne!(board.csr_value(me, Csr::Mip) & MIP_STIP, 0);
    }
}
