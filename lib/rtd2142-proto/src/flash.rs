//! Flash Interface: read, sector/block erase, and page program, all
//! expressed through vendor registers that turn the hub's MCU into a SPI
//! flash programmer. There is no raw SPI access here; every primitive is a
//! register sequence the MCU interprets.

use crate::error::{Error, Result};
use crate::mode::{MCU_MODE_ISP, MCU_MODE_WRITE_BUF, MCU_MODE_WRITE_BUSY, REG_MCU_MODE};
use crate::progress::{Phase, Progress};
use crate::registers::Registers;
use crate::transport::Bus;
use std::time::Duration;

pub const FLASH_SIZE: u32 = 0x100_000;
pub const SECTOR_SIZE: u32 = 4096;
pub const BLOCK_SIZE: u32 = 65536;

const REG_CMD_ATTR: u8 = 0x60;
const CMD_ATTR_BASE: u8 = 0xB8;
const CMD_ERASE_BUSY: u8 = 0x01;
const REG_ERASE_OPCODE: u8 = 0x61;
const OPCODE_ERASE_SECTOR: u8 = 0x20;
const OPCODE_ERASE_BLOCK: u8 = 0xD8;
const REG_ADDR_HI: u8 = 0x64;
const REG_ADDR_MID: u8 = 0x65;
const REG_ADDR_LO: u8 = 0x66;
const REG_READ_OPCODE: u8 = 0x6A;
const OPCODE_READ: u8 = 0x03;
const REG_WRITE_OPCODE: u8 = 0x6D;
const OPCODE_WRITE: u8 = 0x02;
const REG_WRITE_FIFO: u8 = 0x70;
const REG_WRITE_LEN: u8 = 0x71;

const READ_CHUNK: usize = 256;
const PROGRAM_CHUNK: usize = 256;

const ERASE_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

fn set_address(regs: &mut Registers<'_>, address: u32) -> Result<()> {
    regs.write(REG_ADDR_HI, (address >> 16) as u8)?;
    regs.write(REG_ADDR_MID, (address >> 8) as u8)?;
    regs.write(REG_ADDR_LO, address as u8)
}

/// Read `buf.len()` bytes of flash starting at `address`.
pub fn read(bus: &mut dyn Bus, address: u32, buf: &mut [u8], progress: &mut dyn Progress) -> Result<()> {
    if address >= FLASH_SIZE || buf.len() as u32 > FLASH_SIZE - address {
        return Err(Error::Internal(format!(
            "read of {:#x} bytes at {address:#x} runs past the end of flash",
            buf.len()
        )));
    }
    log::debug!("reading {:#x} bytes from {address:#010x}", buf.len());
    progress.set_phase(Phase::DeviceRead);

    let mut regs = Registers::new(bus);
    // The hardware must be pointed one byte before the desired address:
    // the value returned by the very next read is unpredictable, so it's
    // discarded and the stream picks up exactly at `address`.
    let effective = address.wrapping_sub(1) & 0xFF_FFFF;
    set_address(&mut regs, effective)?;
    regs.write(REG_READ_OPCODE, OPCODE_READ)?;

    regs.write_raw(&[REG_WRITE_FIFO])?;
    let _discarded = regs.read_raw(1)?;

    let total = buf.len();
    let mut done = 0usize;
    while done < total {
        let chunk = (total - done).min(READ_CHUNK);
        let data = regs.read_raw(chunk)?;
        buf[done..done + chunk].copy_from_slice(&data);
        done += chunk;
        progress.set_progress(done as u64, total as u64);
    }
    Ok(())
}

/// Erase a 4 KiB sector at a 4 KiB-aligned address.
pub fn erase_sector(bus: &mut dyn Bus, address: u32) -> Result<()> {
    if address % SECTOR_SIZE != 0 {
        return Err(Error::Internal(format!(
            "sector erase address {address:#x} is not 4K-aligned"
        )));
    }
    log::debug!("sector erase {address:#010x}");

    let mut regs = Registers::new(bus);
    set_address(&mut regs, address)?;
    regs.write(REG_CMD_ATTR, CMD_ATTR_BASE)?;
    regs.write(REG_ERASE_OPCODE, OPCODE_ERASE_SECTOR)?;
    regs.write(REG_CMD_ATTR, CMD_ATTR_BASE | CMD_ERASE_BUSY)?;
    regs.poll_until(REG_CMD_ATTR, CMD_ERASE_BUSY, 0, ERASE_TIMEOUT)
}

/// Erase a 64 KiB block at a 64 KiB-aligned address. The hub derives the
/// block boundary from ADDR_HI alone, so ADDR_MID/ADDR_LO are forced to 0
/// rather than carrying whatever `address`'s low bits happen to be.
pub fn erase_block(bus: &mut dyn Bus, address: u32) -> Result<()> {
    if address % BLOCK_SIZE != 0 {
        return Err(Error::Internal(format!(
            "block erase address {address:#x} is not 64K-aligned"
        )));
    }
    log::debug!("block erase {address:#010x}");

    let mut regs = Registers::new(bus);
    regs.write(REG_ADDR_HI, (address >> 16) as u8)?;
    regs.write(REG_ADDR_MID, 0)?;
    regs.write(REG_ADDR_LO, 0)?;
    regs.write(REG_CMD_ATTR, CMD_ATTR_BASE)?;
    regs.write(REG_ERASE_OPCODE, OPCODE_ERASE_BLOCK)?;
    regs.write(REG_CMD_ATTR, CMD_ATTR_BASE | CMD_ERASE_BUSY)?;
    regs.poll_until(REG_CMD_ATTR, CMD_ERASE_BUSY, 0, ERASE_TIMEOUT)
}

/// Program `data` starting at `address`, in chunks of up to 256 bytes.
pub fn program(bus: &mut dyn Bus, address: u32, data: &[u8], progress: &mut dyn Progress) -> Result<()> {
    log::debug!("writing {:#x} bytes at {address:#010x}", data.len());
    let total = data.len();
    let mut done = 0usize;
    let mut regs = Registers::new(bus);

    while done < total {
        let chunk_size = (total - done).min(PROGRAM_CHUNK);
        let chunk = &data[done..done + chunk_size];
        let chunk_addr = address + done as u32;

        regs.write(REG_WRITE_OPCODE, OPCODE_WRITE)?;
        regs.write(REG_WRITE_LEN, (chunk_size - 1) as u8)?;
        set_address(&mut regs, chunk_addr)?;
        regs.poll_until(REG_MCU_MODE, MCU_MODE_WRITE_BUF, 0, WRITE_TIMEOUT)?;
        regs.write_multi(REG_WRITE_FIFO, chunk)?;
        regs.write(REG_MCU_MODE, MCU_MODE_ISP | MCU_MODE_WRITE_BUSY)?;
        regs.poll_until(REG_MCU_MODE, MCU_MODE_WRITE_BUSY, 0, WRITE_TIMEOUT)
            .map_err(|e| {
                Error::Write(format!(
                    "timed out waiting for the page at {chunk_addr:#x} to finish writing: {e}"
                ))
            })?;

        done += chunk_size;
        progress.set_progress(done as u64, total as u64);
    }
    Ok(())
}
