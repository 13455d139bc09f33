// SPDX-License-Identifier: MPL-2.0

//! The firmware-call dispatcher.
//!
//! An environment call from the supervisor arrives with the function number
//! in `a7` and up to three arguments in `a0..a2`; exactly one result word
//! goes back in `a0`. The faulting program counter is advanced past the call
//! instruction before any handler runs, so the trapped context resumes after
//! the call.

use int_to_c_enum::TryFromInt;

use crate::{
    console::CONSOLE,
    dcache::CacheMaintOp,
    hal::{Csr, IpiController, PrivRegs, MIE_MOVFIE, MIP_SSIP, SLIP_SOVFIP},
    hart::HartMask,
    ipi::SignalSet,
    machine::Machine,
    trap::TrapFrame,
    trigger,
};

/// Width of the call instruction; the resume address is the call site plus
/// this.
pub const ECALL_INSN_LEN: usize = 4;

/// Result value for function numbers the dispatcher does not recognize
/// (the classic "function not implemented" errno).
pub const NOT_IMPLEMENTED: isize = -38;

/// The call catalog. The first nine are the legacy firmware-call numbers;
/// the vendor calls are appended after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
#[repr(u32)]
#[allow(missing_docs)]
pub enum SbiFunction {
    SetTimer = 0,
    ConsolePutchar = 1,
    ConsoleGetchar = 2,
    ClearIpi = 3,
    SendIpi = 4,
    RemoteFenceI = 5,
    RemoteSfenceVma = 6,
    RemoteSfenceVmaAsid = 7,
    Shutdown = 8,
    RemoteDcacheWriteback = 9,
    RemoteDcacheInvalidate = 10,
    GetCycles = 11,
    Trigger = 12,
    SetPerfMonitor = 13,
    ReadPowerbrake = 14,
    WritePowerbrake = 15,
}

impl<I: IpiController> Machine<I> {
    /// Dispatches one trapped environment call described by `frame`.
    pub fn handle_ecall<R: PrivRegs>(&self, regs: &R, frame: &mut TrapFrame) {
        let mepc = regs.read(Csr::Mepc);
        regs.write(Csr::Mepc, mepc.wrapping_add(ECALL_INSN_LEN));

        let (arg0, arg1, arg2) = (frame.a0, frame.a1, frame.a2);

        let function = u32::try_from(frame.a7)
            .ok()
            .and_then(|n| SbiFunction::try_from(n).ok());

        let retval: isize = match function {
            Some(SbiFunction::SetTimer) => {
                self.set_timer(regs, timer_value(arg0, arg1));
                0
            }
            Some(SbiFunction::ConsolePutchar) => {
                CONSOLE.putchar(arg0 as u8);
                0
            }
            Some(SbiFunction::ConsoleGetchar) => CONSOLE.getchar() as isize,
            Some(SbiFunction::ClearIpi) => {
                (regs.clear_bits(Csr::Mip, MIP_SSIP) & MIP_SSIP) as isize
            }
            Some(SbiFunction::SendIpi) => {
                self.signal_many(regs, HartMask::from_bits(arg0), SignalSet::SOFT);
                0
            }
            Some(SbiFunction::RemoteFenceI) => {
                self.signal_many(regs, HartMask::from_bits(arg0), SignalSet::FENCE_I);
                0
            }
            Some(SbiFunction::RemoteSfenceVma) | Some(SbiFunction::RemoteSfenceVmaAsid) => {
                self.signal_many(regs, HartMask::from_bits(arg0), SignalSet::SFENCE_VMA);
                0
            }
            Some(SbiFunction::Shutdown) => self.poweroff(regs, 0),
            Some(SbiFunction::RemoteDcacheWriteback) => {
                self.signal_dcache(
                    regs,
                    HartMask::from_bits(arg0),
                    CacheMaintOp::Writeback,
                    arg1 as u64,
                    arg2 as u64,
                );
                0
            }
            Some(SbiFunction::RemoteDcacheInvalidate) => {
                self.signal_dcache(
                    regs,
                    HartMask::from_bits(arg0),
                    CacheMaintOp::Invalidate,
                    arg1 as u64,
                    arg2 as u64,
                );
                0
            }
            Some(SbiFunction::GetCycles) => {
                regs.store_lower_word(arg0, regs.mtime() as usize);
                0
            }
            Some(SbiFunction::Trigger) => trigger::configure(self.trigger(), arg0, arg1, arg2),
            Some(SbiFunction::SetPerfMonitor) => {
                regs.clear_bits(Csr::Slip, SLIP_SOVFIP);
                regs.set_bits(Csr::Mie, MIE_MOVFIE);
                0
            }
            Some(SbiFunction::ReadPowerbrake) => regs.read(Csr::MpftCtl) as isize,
            Some(SbiFunction::WritePowerbrake) => {
                regs.write(Csr::MpftCtl, arg0);
                0
            }
            None => NOT_IMPLEMENTED,
        };

        frame.a0 = retval as usize;
    }
}

#[cfg(target_pointer_width = "32")]
fn timer_value(lo: usize, hi: usize) -> u64 {
    lo as u64 | ((hi as u64) << 32)
}

#[cfg(not(target_pointer_width = "32"))]
fn timer_value(value: usize, _unused: usize) -> u64 {
    value as u64
}
