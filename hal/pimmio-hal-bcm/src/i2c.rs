//! I2C master on BSC1 (GPIO2 SDA1 / GPIO3 SCL1, Alt0)
//!
//! Every transfer follows the same shape:
//!
//! 1. wait until the controller is idle (S.TA clear)
//! 2. program the slave address (A) and byte count (DLEN)
//! 3. clear the FIFO and, for writes, preload up to 16 bytes
//! 4. start (C = I2CEN | ST, plus READ for reads)
//! 5. feed or drain the FIFO until S.DONE
//! 6. turn S.ERR / S.CLKT into an error, then clear DONE/ERR/CLKT
//!
//! The status register is always cleared before a result is returned, so
//! a failed transfer leaves the controller ready for the next one. There
//! is no repeated start: [`I2c::write_read`] runs two transfers.

use log::{debug, trace, warn};
use pimmio_hal::i2c::I2cConfig;

use crate::config::HardwareVariant;
use crate::error::{I2cError, I2cFault};
use crate::mmio::{Mapper, RegisterWindow};
use crate::poll::PollPolicy;

// Registers
const C: usize = 0x00;
const S: usize = 0x04;
const DLEN: usize = 0x08;
const A: usize = 0x0C;
const FIFO: usize = 0x10;
const DIV: usize = 0x14;

// Control
const C_I2CEN: u32 = 1 << 15;
const C_ST: u32 = 1 << 7;
const C_CLEAR: u32 = 0b11 << 4;
const C_READ: u32 = 1 << 0;

// Status
const S_TA: u32 = 1 << 0;
const S_DONE: u32 = 1 << 1;
const S_TXD: u32 = 1 << 4;
const S_RXD: u32 = 1 << 5;
const S_ERR: u32 = 1 << 8;
const S_CLKT: u32 = 1 << 9;
const S_CLEAR: u32 = S_CLKT | S_ERR | S_DONE;

/// Hardware FIFO depth in bytes
pub const FIFO_DEPTH: usize = 16;

/// Largest 7-bit address
pub const MAX_ADDRESS: u8 = 0x7F;

/// Clock divider for a target SCL frequency
pub fn compute_clock_divider(core_clock_hz: u32, frequency: u32) -> Result<u16, I2cError> {
    if frequency == 0 {
        return Err(I2cError::InvalidFrequency(frequency));
    }
    match core_clock_hz / frequency {
        divider @ 2..=0xFFFE => Ok(divider as u16),
        _ => Err(I2cError::InvalidFrequency(frequency)),
    }
}

/// Polled BSC1 master
#[derive(Debug)]
pub struct I2c {
    window: RegisterWindow,
    divider: u16,
    poll: PollPolicy,
}

impl I2c {
    /// Map BSC1 and program the clock divider
    pub fn open<M: Mapper + ?Sized>(
        mapper: &M,
        variant: &HardwareVariant,
        config: I2cConfig,
    ) -> Result<Self, I2cError> {
        let divider = compute_clock_divider(variant.core_clock_hz, config.frequency)?;
        let window = mapper.map(variant.i2c_base, variant.window_size)?;
        window.write(DIV, u32::from(divider));

        debug!(
            "i2c at {:#010x}: {} Hz (divider {})",
            variant.i2c_base, config.frequency, divider
        );

        Ok(Self {
            window,
            divider,
            poll: variant.status_poll(),
        })
    }

    /// Programmed DIV value
    pub fn clock_divider(&self) -> u16 {
        self.divider
    }

    /// Replace the poll used for every status wait
    pub fn set_poll(&mut self, policy: PollPolicy) {
        self.poll = policy;
    }

    /// Write `data` to the device at `address`
    pub fn write(&mut self, address: u8, data: &[u8]) -> Result<(), I2cError> {
        self.begin(address, data.len())?;

        let (preload, rest) = data.split_at(data.len().min(FIFO_DEPTH));
        for &byte in preload {
            self.window.write(FIFO, u32::from(byte));
        }
        self.window.write(C, C_I2CEN | C_ST);

        for &byte in rest {
            let status = self.wait_for(S_TXD | S_DONE)?;
            if status & S_DONE != 0 {
                // Transfer ended early, usually a NACK; TXD may still read high
                break;
            }
            self.window.write(FIFO, u32::from(byte));
        }

        trace!("i2c {:#04x} <- {:02x?}", address, data);
        self.finish(address)
    }

    /// Read `buf.len()` bytes from the device at `address`
    ///
    /// A transfer that completes before the buffer is full fails with
    /// [`I2cError::ShortRead`].
    pub fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), I2cError> {
        self.begin(address, buf.len())?;
        self.window.write(C, C_I2CEN | C_ST | C_READ);

        let mut received = 0;
        while received < buf.len() {
            let status = self.wait_for(S_RXD | S_DONE)?;
            if status & S_RXD == 0 {
                break;
            }
            buf[received] = (self.window.read(FIFO) & 0xFF) as u8;
            received += 1;
        }

        self.finish(address)?;
        if received < buf.len() {
            return Err(I2cError::ShortRead {
                expected: buf.len(),
                received,
            });
        }
        trace!("i2c {:#04x} -> {:02x?}", address, buf);
        Ok(())
    }

    /// Write `bytes`, then read into `buf`, as two separate transfers
    pub fn write_read(
        &mut self,
        address: u8,
        bytes: &[u8],
        buf: &mut [u8],
    ) -> Result<(), I2cError> {
        self.write(address, bytes)?;
        self.read(address, buf)
    }

    /// Validate, wait for idle, and set up address, length and FIFO
    fn begin(&mut self, address: u8, len: usize) -> Result<(), I2cError> {
        if address > MAX_ADDRESS {
            return Err(I2cError::InvalidAddress(address));
        }
        let dlen = u16::try_from(len).map_err(|_| I2cError::InvalidLength(len))?;

        let window = &self.window;
        self.poll
            .wait_until(|| window.read(S) & S_TA == 0)
            .map_err(|_| {
                warn!("i2c controller stuck busy");
                I2cError::Timeout
            })?;

        self.window.write(A, u32::from(address));
        self.window.write(DLEN, u32::from(dlen));
        self.window.write(C, C_CLEAR);
        Ok(())
    }

    /// Wait for DONE, report faults, clear status
    fn finish(&mut self, address: u8) -> Result<(), I2cError> {
        let status = self.wait_for(S_DONE)?;
        self.window.write(S, S_CLEAR);

        let fault = if status & S_ERR != 0 {
            Some(I2cFault::NoAcknowledge)
        } else if status & S_CLKT != 0 {
            Some(I2cFault::ClockStretchTimeout)
        } else {
            None
        };

        match fault {
            Some(fault) => {
                warn!("i2c transfer to {:#04x} failed: {:?}", address, fault);
                Err(I2cError::TransactionFailed(fault))
            }
            None => Ok(()),
        }
    }

    /// Poll until any bit of `mask` is set; returns the status that matched
    fn wait_for(&self, mask: u32) -> Result<u32, I2cError> {
        let mut status = 0;
        let result = self.poll.wait_until(|| {
            status = self.window.read(S);
            status & mask != 0
        });

        if result.is_err() {
            warn!("i2c timed out waiting for status {:#x}", mask);
            self.window.write(C, C_CLEAR);
            self.window.write(S, S_CLEAR);
            return Err(I2cError::Timeout);
        }
        Ok(status)
    }
}

impl pimmio_hal::I2cBus for I2c {
    type Error = I2cError;

    fn write(&mut self, address: u8, data: &[u8]) -> Result<(), I2cError> {
        I2c::write(self, address, data)
    }

    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), I2cError> {
        I2c::read(self, address, buf)
    }
}

impl embedded_hal::i2c::ErrorType for I2c {
    type Error = I2cError;
}

impl embedded_hal::i2c::I2c for I2c {
    /// Operations run as back-to-back transfers, each with its own start and stop
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [embedded_hal::i2c::Operation<'_>],
    ) -> Result<(), I2cError> {
        use embedded_hal::i2c::Operation;

        for operation in operations {
            match operation {
                Operation::Write(data) => I2c::write(self, address, data)?,
                Operation::Read(buf) => I2c::read(self, address, buf)?,
            }
        }
        Ok(())
    }
}
