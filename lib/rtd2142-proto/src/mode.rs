//! Mode Controller: the DDC/CI "dual bank status" query, ISP mode entry and
//! exit, and the write-protect GPIO the flash's ~WP line is wired to.

use crate::error::{Error, Result};
use crate::registers::Registers;
use crate::transport::Bus;
use std::time::Duration;

pub const REG_MCU_MODE: u8 = 0x6F;
pub const MCU_MODE_ISP: u8 = 1 << 7;
pub const MCU_MODE_WRITE_BUSY: u8 = 1 << 5;
pub const MCU_MODE_WRITE_BUF: u8 = 1 << 4;

const REG_GPIO88_CONFIG: u16 = 0x104F;
const REG_GPIO88_VALUE: u16 = 0xFE3F;
const REG_OVERCLOCK: u16 = 0x06A0;
const OVERCLOCK_VALUE: u8 = 0x74;
const REG_RESET_TRIGGER: u8 = 0xEE;
const RESET_TRIGGER_BIT: u8 = 0x02;

const ISP_ENTRY_TIMEOUT: Duration = Duration::from_secs(60);
const RESET_SETTLE: Duration = Duration::from_secs(1);
const DDCCI_SETTLE: Duration = Duration::from_millis(200);

/// The raw 11-byte dual-bank status response.
pub type DualBankResponse = [u8; 11];

/// Query the hub's DDC/CI dual-bank status block.
///
/// A response whose first two bytes are not `0xCA, 0x09` means the running
/// firmware doesn't implement dual-bank mode at all; that's reported as
/// `Ok(None)`, not an error.
pub fn query_dual_bank_raw(bus: &mut dyn Bus) -> Result<Option<DualBankResponse>> {
    let mut regs = Registers::new(bus);
    regs.write(0xCA, 0x09)?;
    std::thread::sleep(DDCCI_SETTLE);

    regs.write_raw(&[0x01])?;
    let raw = regs.read_raw(11)?;
    let mut response = [0u8; 11];
    response.copy_from_slice(&raw);

    if response[0] != 0xCA || response[1] != 0x09 {
        log::debug!(
            "unexpected dual bank response header {:#04x} {:#04x}",
            response[0],
            response[1]
        );
        return Ok(None);
    }
    Ok(Some(response))
}

/// Put the hub into ISP (In-System Programming) mode: request it, wait for
/// the mode bit to latch, bump the MCU clock, and release the flash's write
/// protect via GPIO88.
pub fn enter_isp(bus: &mut dyn Bus) -> Result<()> {
    let mut regs = Registers::new(bus);
    regs.write(REG_MCU_MODE, MCU_MODE_ISP)?;
    log::debug!("waiting for ISP mode to latch");
    regs.poll_until(REG_MCU_MODE, MCU_MODE_ISP, MCU_MODE_ISP, ISP_ENTRY_TIMEOUT)?;

    regs.write_indirect(REG_OVERCLOCK, OVERCLOCK_VALUE)?;

    set_gpio88(&mut regs, true)
}

/// Trigger an MCU reset to leave ISP mode, and report whether it actually
/// did. A failed reset is not an I/O error: the caller needs to ask for a
/// physical power cycle instead.
pub fn exit_isp(bus: &mut dyn Bus) -> Result<bool> {
    let mut regs = Registers::new(bus);
    set_gpio88(&mut regs, false)?;

    let mode = regs.read(REG_MCU_MODE)?;
    if mode & MCU_MODE_ISP == 0 {
        log::debug!("device already left ISP mode");
        return Ok(true);
    }

    log::debug!("triggering MCU reset");
    let trigger = regs.read(REG_RESET_TRIGGER)?;
    let _ = regs.write(REG_RESET_TRIGGER, trigger | RESET_TRIGGER_BIT);
    std::thread::sleep(RESET_SETTLE);

    let mode = regs.read(REG_MCU_MODE)?;
    Ok(mode & MCU_MODE_ISP == 0)
}

fn set_gpio88(regs: &mut Registers<'_>, level: bool) -> Result<()> {
    let config = regs.read_indirect(REG_GPIO88_CONFIG)?;
    regs.write_indirect(REG_GPIO88_CONFIG, (config & 0xF0) | 0x01)?;

    log::debug!("setting pin 88 = {}", level as u8);
    let value = regs.read_indirect(REG_GPIO88_VALUE)?;
    regs.write_indirect(REG_GPIO88_VALUE, (value & 0xFE) | (level as u8))
}

/// Errors from [`exit_isp`] that mean the device needs user intervention
/// rather than a retry.
pub fn reset_failed(dp_aux_name: &str) -> Error {
    Error::NeedsUserAction(format!(
        "{dp_aux_name} did not leave ISP mode after reset; power cycle the display to recover"
    ))
}
