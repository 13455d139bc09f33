// SPDX-License-Identifier: MPL-2.0

//! Platform discovery from the device tree.

use fdt::Fdt;

use crate::{
    error::Error,
    hart::{HartId, HartMask, MAX_HARTS},
};

/// Computes the enabled-hart mask from the flattened device tree blob.
///
/// A hart is enabled unless its cpu node carries `status = "disabled"`.
/// Hart ids beyond the build-time bound are ignored.
pub fn enabled_harts(blob: &[u8]) -> Result<HartMask, Error> {
    let fdt = Fdt::new(blob).map_err(|_| Error::MalformedDeviceTree)?;

    let mut mask = HartMask::empty();
    for cpu in fdt.find_all_nodes("/cpus/cpu") {
        let Some(id) = cpu.property("reg").and_then(|reg| reg.as_usize()) else {
            continue;
        };
        if id >= MAX_HARTS {
            log::warn!("ignoring hart {id} beyond the build-time bound");
            continue;
        }
        let disabled = cpu
            .property("status")
            .and_then(|status| status.as_str())
            .is_some_and(|status| status == "disabled");
        if !disabled {
            if let Ok(hart) = HartId::try_from(id) {
                mask.add(hart);
            }
        }
    }

    if mask.is_empty() {
        return Err(Error::MalformedDeviceTree);
    }
    Ok(mask)
}
