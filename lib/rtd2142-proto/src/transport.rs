//! I²C Transport: a raw byte-stream handle to the bus character device,
//! driven directly with `read(2)`/`write(2)` and the `I2C_SLAVE` ioctl, the
//! same way the kernel's `i2c-dev` interface is used from userspace.

use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// 7-bit address the RTD2142 answers to over its DDC/CI-shared channel.
pub const HUB_ADDRESS: u16 = 0x35;

const I2C_SLAVE: u16 = 0x0703;

nix::ioctl_write_int_bad!(set_slave_address, I2C_SLAVE);

/// The byte-stream contract the register layer is built on: write some
/// bytes, read some bytes, nothing more. Implemented by [`I2cTransport`]
/// for real hardware and by the in-memory hub in the `mock` module for
/// tests.
pub trait Bus {
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;

    /// Write `tx` then read `n` bytes back in a single logical step.
    fn write_then_read(&mut self, tx: &[u8], n: usize) -> Result<Vec<u8>> {
        self.write(tx)?;
        self.read(n)
    }
}

/// An open handle to the I²C bus backing a hub's DP-DDC channel.
pub struct I2cTransport {
    file: std::fs::File,
}

impl I2cTransport {
    /// Open `device_path` read-write and select `address` as the target
    /// slave for all further transfers on this handle.
    pub fn open(device_path: &Path, address: u16) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("failed to open {}: {e}", device_path.display()),
                ))
            })?;

        unsafe { set_slave_address(file.as_raw_fd(), address as std::os::raw::c_int) }
            .map_err(|errno| Error::Io(std::io::Error::from(errno)))?;

        log::debug!(
            "{} opened, slave address {address:#04x} selected",
            device_path.display()
        );
        Ok(Self { file })
    }
}

impl Bus for I2cTransport {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.file.write_all(bytes).map_err(Error::Io)
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.file.read_exact(&mut buf).map_err(Error::Io)?;
        Ok(buf)
    }
}
