// SPDX-License-Identifier: MPL-2.0

//! Architecture-specific implementations of the privileged capabilities.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "riscv64")] {
        mod riscv;
        pub use self::riscv::{platform, MachineRegs, PlicSw};
    }
}
