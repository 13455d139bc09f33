// SPDX-License-Identifier: MPL-2.0

//! Debug-trigger configuration.
//!
//! The trigger hardware itself is an opaque platform service; this module
//! only maps call arguments onto it.

use int_to_c_enum::TryFromInt;

use crate::hal::TriggerUnit;

/// The trigger kinds the `trigger` call can configure, using the debug
/// architecture's trigger type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromInt)]
#[repr(u32)]
pub enum TriggerKind {
    /// Fire after a number of retired instructions.
    InstructionCount = 3,
    /// Fire on an instruction-address match.
    InstructionAddress = 4,
    /// Fire on a trapped exception.
    Exception = 5,
}

/// Configures a trigger of kind `kind` with datum `data` and privilege-enable
/// mask `enables`.
///
/// Returns the trigger-specific status, or `-1` for an unknown kind or a
/// platform without a trigger unit.
pub(crate) fn configure(
    unit: Option<&dyn TriggerUnit>,
    kind: usize,
    data: usize,
    enables: usize,
) -> isize {
    let Some(unit) = unit else {
        return -1;
    };
    let kind = u32::try_from(kind)
        .ok()
        .and_then(|raw| TriggerKind::try_from(raw).ok());
    match kind {
        Some(TriggerKind::InstructionCount) => unit.set_icount(data, enables),
        Some(TriggerKind::InstructionAddress) => unit.set_itrigger(data, enables),
        Some(TriggerKind::Exception) => unit.set_etrigger(data, enables),
        None => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockTrigger;

    #[test]
    fn known_kinds_reach_the_unit() {
        let unit = MockTrigger::new(0);
        assert_eq!(
            configure(Some(&unit), TriggerKind::Exception as usize, 0xb, 0b111),
            0
        );
        assert_eq!(unit.last(), Some(("etrigger", 0xb, 0b111)));
    }

    #[test]
    fn unknown_kind_and_missing_unit_yield_minus_one() {
        let unit = MockTrigger::new(0);
        assert_eq!(configure(Some(&unit), 0, 0, 0), -1);
        assert_eq!(unit.last(), None);
        assert_eq!(configure(None, TriggerKind::Exception as usize, 0, 0), -1);
    }
}
