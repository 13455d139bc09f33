// SPDX-License-Identifier: MPL-2.0

/// The error type which is returned from the APIs of this crate.
///
/// Trap-path operations never produce this type; recoverable trap-path
/// conditions are encoded as ordinary result values in the call-return
/// register, the only channel available at this privilege level.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Error {
    /// An argument was outside the range the platform supports.
    InvalidArgs,
    /// The device tree handed over by the boot loader could not be parsed.
    MalformedDeviceTree,
}
