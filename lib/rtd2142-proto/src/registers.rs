//! Register Layer: direct 8-bit registers, the indirect 16-bit-address
//! mailbox at 0xF4/0xF5, and deadline-bounded polling.

use crate::error::{Error, Result};
use crate::transport::Bus;
use std::time::{Duration, Instant};

const REG_INDIRECT_LO: u8 = 0xF4;
const REG_INDIRECT_HI: u8 = 0xF5;
const INDIRECT_ARM: u8 = 0x9F;

/// Typed register access built directly on a [`Bus`].
///
/// This layer holds no state of its own beyond the bus handle: the hub
/// mutates its own registers, so nothing here may cache a value across
/// calls.
pub struct Registers<'a> {
    bus: &'a mut dyn Bus,
}

impl<'a> Registers<'a> {
    pub fn new(bus: &'a mut dyn Bus) -> Self {
        Self { bus }
    }

    /// Write an 8-bit direct register.
    pub fn write(&mut self, address: u8, value: u8) -> Result<()> {
        self.bus.write(&[address, value])
    }

    /// Write a contiguous multi-byte direct register. Only the FIFO
    /// register (0x70) is ever addressed this way.
    pub fn write_multi(&mut self, address: u8, data: &[u8]) -> Result<()> {
        let mut command = Vec::with_capacity(data.len() + 1);
        command.push(address);
        command.extend_from_slice(data);
        self.bus.write(&command)
    }

    /// Read an 8-bit direct register.
    pub fn read(&mut self, address: u8) -> Result<u8> {
        let response = self.bus.write_then_read(&[address], 1)?;
        Ok(response[0])
    }

    /// Issue a bare register-pointer write with no accompanying value, then
    /// stream `n` bytes back. Used for the DDC/CI status request and for
    /// beginning a flash read burst; both treat "select a register" and
    /// "stream from it" as separate steps.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.bus.write(bytes)
    }

    pub fn read_raw(&mut self, n: usize) -> Result<Vec<u8>> {
        self.bus.read(n)
    }

    fn set_indirect_address(&mut self, address: u16) -> Result<()> {
        self.write(REG_INDIRECT_LO, INDIRECT_ARM)?;
        self.write(REG_INDIRECT_HI, (address >> 8) as u8)?;
        self.write(REG_INDIRECT_LO, address as u8)
    }

    /// Read a 16-bit-addressed indirect register.
    pub fn read_indirect(&mut self, address: u16) -> Result<u8> {
        self.set_indirect_address(address)?;
        self.read(REG_INDIRECT_HI)
    }

    /// Write a 16-bit-addressed indirect register.
    pub fn write_indirect(&mut self, address: u16, value: u8) -> Result<()> {
        self.set_indirect_address(address)?;
        self.write(REG_INDIRECT_HI, value)
    }

    /// Poll `address` until `(value & mask) == expected`, or fail once
    /// `timeout` has elapsed. The first read happens before any sleep, so a
    /// condition that already holds resolves in a single read.
    pub fn poll_until(
        &mut self,
        address: u8,
        mask: u8,
        expected: u8,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut value = self.read(address)?;
        while (value & mask) != expected && Instant::now() <= deadline {
            std::thread::sleep(Duration::from_millis(1));
            value = self.read(address)?;
        }
        if (value & mask) == expected {
            return Ok(());
        }
        Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!(
                "register {address:#04x} still reads {value:#04x} after {timeout:?}, \
                 wanted {expected:#04x} (mask {mask:#04x})"
            ),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockHub;

    #[test]
    fn poll_until_times_out_with_descriptive_error() {
        let mut hub = MockHub::new();
        let mut regs = Registers::new(&mut hub);
        // Register 0x71 defaults to 0 and nothing in the mock ever sets
        // bit 0 on it, so this can never succeed.
        let err = regs
            .poll_until(0x71, 0x01, 0x01, Duration::from_millis(5))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("0x71"));
        assert!(message.contains("0x01"));
    }
}
