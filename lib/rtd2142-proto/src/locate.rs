//! Bus Locator: walk the kernel device model from a DisplayPort AUX quirk
//! name down to the `/dev/i2c-N` character device that carries the hub's
//! DDC/CI channel.
//!
//! The traversal is: find the `drm_dp_aux_dev` whose `name` sysfs attribute
//! matches, go up to its parent, walk the parent's `i2c` siblings, and
//! return the first `i2c-dev` child found under any of them.

use crate::error::{Error, Result};
use regex::Regex;
use std::path::PathBuf;

/// A located I²C bus backing a DisplayPort AUX-associated hub.
#[derive(Debug, Clone)]
pub struct I2cBus {
    /// Path to the character device, e.g. `/dev/i2c-4`.
    pub device_path: PathBuf,
    /// Sysfs path of the underlying `i2c-dev` device, used to build the
    /// device's physical id (`I2C_PATH=<path>`).
    pub sysfs_path: PathBuf,
    /// Numeric bus id extracted from the device file name.
    pub bus_id: u32,
}

fn not_found(dp_aux_name: &str) -> Error {
    Error::NotSupported(format!(
        "did not find an i2c-dev associated with DP aux \"{dp_aux_name}\""
    ))
}

/// Locate the I²C bus backing the DP-AUX device named `dp_aux_name`.
pub fn locate_bus(dp_aux_name: &str) -> Result<I2cBus> {
    let bus_id_re = Regex::new(r"i2c-(\d+)$").expect("static regex is valid");

    let aux_device = find_aux_device(dp_aux_name)?;
    let parent = aux_device.parent().ok_or_else(|| not_found(dp_aux_name))?;

    let mut i2c_enum = udev::Enumerator::new()
        .map_err(|e| Error::Internal(format!("failed to create udev enumerator: {e}")))?;
    i2c_enum
        .match_subsystem("i2c")
        .map_err(|e| Error::Internal(format!("udev match_subsystem failed: {e}")))?;
    i2c_enum
        .match_parent(&parent)
        .map_err(|e| Error::Internal(format!("udev match_parent failed: {e}")))?;

    for i2c_device in i2c_enum
        .scan_devices()
        .map_err(|e| Error::Internal(format!("udev scan failed: {e}")))?
    {
        let Some(bus_device) = first_i2c_dev_child(&i2c_device)? else {
            log::debug!("no i2c-dev found under {}", i2c_device.syspath().display());
            continue;
        };

        let device_path = bus_device
            .devnode()
            .ok_or_else(|| Error::NotSupported("i2c-dev has no device node".into()))?
            .to_path_buf();
        let sysfs_path = bus_device.syspath().to_path_buf();
        let file_name = device_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let bus_id = bus_id_re
            .captures(file_name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .ok_or_else(|| {
                Error::NotSupported(format!("could not parse bus id from \"{file_name}\""))
            })?;

        log::debug!("found I2C bus at {}", sysfs_path.display());
        return Ok(I2cBus { device_path, sysfs_path, bus_id });
    }

    Err(not_found(dp_aux_name))
}

fn find_aux_device(dp_aux_name: &str) -> Result<udev::Device> {
    let mut enumerator = udev::Enumerator::new()
        .map_err(|e| Error::Internal(format!("failed to create udev enumerator: {e}")))?;
    enumerator
        .match_subsystem("drm_dp_aux_dev")
        .map_err(|e| Error::Internal(format!("udev match_subsystem failed: {e}")))?;
    enumerator
        .match_attribute("name", dp_aux_name)
        .map_err(|e| Error::Internal(format!("udev match_attribute failed: {e}")))?;

    let mut matches = enumerator
        .scan_devices()
        .map_err(|e| Error::Internal(format!("udev scan failed: {e}")))?;

    let aux_device = matches.next().ok_or_else(|| not_found(dp_aux_name))?;
    for extra in matches {
        log::debug!("ignoring additional aux device {}", extra.syspath().display());
    }
    Ok(aux_device)
}

fn first_i2c_dev_child(i2c_device: &udev::Device) -> Result<Option<udev::Device>> {
    let mut dev_enum = udev::Enumerator::new()
        .map_err(|e| Error::Internal(format!("failed to create udev enumerator: {e}")))?;
    dev_enum
        .match_subsystem("i2c-dev")
        .map_err(|e| Error::Internal(format!("udev match_subsystem failed: {e}")))?;
    dev_enum
        .match_parent(i2c_device)
        .map_err(|e| Error::Internal(format!("udev match_parent failed: {e}")))?;

    let mut children = dev_enum
        .scan_devices()
        .map_err(|e| Error::Internal(format!("udev scan failed: {e}")))?;

    let Some(first) = children.next() else {
        return Ok(None);
    };
    let extra_count = children.count();
    if extra_count > 0 {
        log::debug!(
            "ignoring {extra_count} additional i2c-dev under {}",
            i2c_device.syspath().display()
        );
    }
    Ok(Some(first))
}
