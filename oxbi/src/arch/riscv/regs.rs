// SPDX-License-Identifier: MPL-2.0

//! The real machine-mode register file.
//!
//! Standard CSRs are addressed by name; the vendor registers (AndeStar V5
//! local-interrupt, power-throttle, and cache-maintenance controller CSRs)
//! by number. The free-running counter and the per-hart timer-compare
//! registers live in the CLINT MMIO block.

use core::arch::asm;

use crate::{
    hal::{Csr, PrivRegs, MSTATUS_MPRV},
    hart::HartId,
};

const CLINT_MTIMECMP: usize = 0x4000;
const CLINT_MTIME: usize = 0xbff8;

macro_rules! csr_read {
    ($csr:literal) => {{
        let value: usize;
        // SAFETY: reading a CSR has no side effect beyond the read itself.
        unsafe { asm!(concat!("csrr {0}, ", $csr), out(reg) value) };
        value
    }};
}

macro_rules! csr_write {
    ($csr:literal, $value:expr) => {
        // SAFETY: the runtime is the only machine-mode software; CSR writes
        // follow the contracts documented on the call sites.
        unsafe { asm!(concat!("csrw ", $csr, ", {0}"), in(reg) $value) }
    };
}

macro_rules! csr_set {
    ($csr:literal, $mask:expr) => {{
        let prior: usize;
        // SAFETY: same as `csr_write`.
        unsafe { asm!(concat!("csrrs {0}, ", $csr, ", {1}"), out(reg) prior, in(reg) $mask) };
        prior
    }};
}

macro_rules! csr_clear {
    ($csr:literal, $mask:expr) => {{
        let prior: usize;
        // SAFETY: same as `csr_write`.
        unsafe { asm!(concat!("csrrc {0}, ", $csr, ", {1}"), out(reg) prior, in(reg) $mask) };
        prior
    }};
}

/// Expands `$op` with the assembler name of the given [`Csr`].
macro_rules! with_csr {
    ($csr:expr, $op:ident $(, $arg:expr)*) => {
        match $csr {
            Csr::Mepc => $op!("mepc" $(, $arg)*),
            Csr::Mcause => $op!("mcause" $(, $arg)*),
            Csr::Mtval => $op!("mtval" $(, $arg)*),
            Csr::Mstatus => $op!("mstatus" $(, $arg)*),
            Csr::Mip => $op!("mip" $(, $arg)*),
            Csr::Mie => $op!("mie" $(, $arg)*),
            Csr::Sepc => $op!("sepc" $(, $arg)*),
            Csr::Scause => $op!("scause" $(, $arg)*),
            Csr::Stval => $op!("stval" $(, $arg)*),
            Csr::Stvec => $op!("stvec" $(, $arg)*),
            Csr::Slip => $op!("0x9c5" $(, $arg)*),
            Csr::MpftCtl => $op!("0x7c5" $(, $arg)*),
            Csr::McctlBeginAddr => $op!("0x7cb" $(, $arg)*),
            Csr::McctlCommand => $op!("0x7cc" $(, $arg)*),
            Csr::McctlData => $op!("0x7cd" $(, $arg)*),
        }
    };
}

extern "C" {
    /// The low-level stub that completes the switch into the supervisor trap
    /// handler, provided by the firmware's entry assembly.
    fn __redirect_trap() -> !;
}

/// The calling hart's privileged register file.
pub struct MachineRegs {
    clint_base: usize,
}

impl MachineRegs {
    /// Creates the register context over the platform's CLINT block.
    ///
    /// # Safety
    ///
    /// `clint_base` must be the virtual address the CLINT MMIO block is
    /// mapped at, valid for the firmware's lifetime.
    pub const unsafe fn new(clint_base: usize) -> Self {
        Self { clint_base }
    }
}

impl PrivRegs for MachineRegs {
    fn hart_id(&self) -> HartId {
        // SAFETY: the boot path parks harts whose id exceeds the build-time
        // bound before the runtime is entered.
        unsafe { HartId::new_unchecked(riscv::register::mhartid::read() as u32) }
    }

    fn read(&self, csr: Csr) -> usize {
        with_csr!(csr, csr_read)
    }

    fn write(&self, csr: Csr, value: usize) {
        with_csr!(csr, csr_write, value)
    }

    fn set_bits(&self, csr: Csr, mask: usize) -> usize {
        with_csr!(csr, csr_set, mask)
    }

    fn clear_bits(&self, csr: Csr, mask: usize) -> usize {
        with_csr!(csr, csr_clear, mask)
    }

    fn barrier(&self) {
        // SAFETY: a fence has no software-visible state.
        unsafe { asm!("fence rw, rw") };
    }

    fn fence_i(&self) {
        // SAFETY: same as `barrier`.
        unsafe { asm!("fence.i") };
    }

    fn sfence_vma(&self) {
        // SAFETY: same as `barrier`.
        unsafe { asm!("sfence.vma") };
    }

    fn wait_for_interrupt(&self) {
        // SAFETY: `wfi` resumes on the next interrupt or acts as a no-op.
        unsafe { asm!("wfi") };
    }

    fn mtime(&self) -> u64 {
        // SAFETY: the CLINT mapping is guaranteed by `new`.
        unsafe { core::ptr::read_volatile((self.clint_base + CLINT_MTIME) as *const u64) }
    }

    fn write_timecmp(&self, when: u64) {
        let slot = self.clint_base + CLINT_MTIMECMP + self.hart_id().as_usize() * 8;
        // SAFETY: the CLINT mapping is guaranteed by `new`; the slot is owned
        // by this hart.
        unsafe { core::ptr::write_volatile(slot as *mut u64, when) };
    }

    fn store_lower_word(&self, vaddr: usize, value: usize) {
        // The store runs with the previous privilege's translation; a fault
        // it takes re-enters the trap path with MPRV set and is redirected.
        //
        // SAFETY: mstatus is restored to its prior value immediately after
        // the access.
        unsafe {
            asm!(
                "csrrs {saved}, mstatus, {mprv}",
                "sd {value}, 0({addr})",
                "csrw mstatus, {saved}",
                saved = out(reg) _,
                mprv = in(reg) MSTATUS_MPRV,
                value = in(reg) value,
                addr = in(reg) vaddr,
            );
        }
    }

    fn redirect_entry(&self) -> ! {
        // SAFETY: the supervisor trap CSRs and mstatus have been rewritten by
        // the redirector before control gets here.
        unsafe { __redirect_trap() }
    }
}
