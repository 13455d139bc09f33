// SPDX-License-Identifier: MPL-2.0

//! RISC-V machine-mode implementations of the privileged capabilities.

pub mod platform;
mod plic_sw;
mod regs;

pub use plic_sw::PlicSw;
pub use regs::MachineRegs;
