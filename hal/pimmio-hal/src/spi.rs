//! SPI bus abstractions
//!
//! The primitive is a single full-duplex byte exchange; multi-byte
//! operations are built by repeating it.

/// SPI bus master
pub trait SpiBus {
    /// Error type for SPI operations
    type Error;

    /// Exchange one byte: shift `byte` out and return the byte shifted in
    fn transfer_byte(&mut self, byte: u8) -> Result<u8, Self::Error>;

    /// Transfer data (simultaneous read/write)
    ///
    /// Runs for the longer of the two buffers. Missing write bytes are sent
    /// as zero and surplus received bytes are discarded.
    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), Self::Error> {
        for i in 0..read.len().max(write.len()) {
            let rx = self.transfer_byte(write.get(i).copied().unwrap_or(0))?;
            if let Some(slot) = read.get_mut(i) {
                *slot = rx;
            }
        }
        Ok(())
    }

    /// Write data, discarding what is received
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        for &byte in data {
            self.transfer_byte(byte)?;
        }
        Ok(())
    }

    /// Read data while sending zeros
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        for slot in buf.iter_mut() {
            *slot = self.transfer_byte(0)?;
        }
        Ok(())
    }

    /// Transfer data in place: each byte is replaced by the byte received
    fn transfer_in_place(&mut self, data: &mut [u8]) -> Result<(), Self::Error> {
        for slot in data.iter_mut() {
            *slot = self.transfer_byte(*slot)?;
        }
        Ok(())
    }
}

/// SPI configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SpiConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
    /// Clock polarity
    pub polarity: Polarity,
    /// Clock phase
    pub phase: Phase,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self::with_frequency(1_000_000)
    }
}

impl SpiConfig {
    /// Mode 0 at the given clock frequency
    pub const fn with_frequency(frequency: u32) -> Self {
        Self {
            frequency,
            polarity: Polarity::IdleLow,
            phase: Phase::CaptureOnFirstTransition,
        }
    }

    /// Replace polarity and phase with the given SPI mode
    pub fn with_mode(mut self, mode: Mode) -> Self {
        let (polarity, phase) = mode.into();
        self.polarity = polarity;
        self.phase = phase;
        self
    }
}

/// SPI clock polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Polarity {
    /// Clock idles low (CPOL=0)
    IdleLow,
    /// Clock idles high (CPOL=1)
    IdleHigh,
}

/// SPI clock phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    /// Data captured on first clock transition (CPHA=0)
    CaptureOnFirstTransition,
    /// Data captured on second clock transition (CPHA=1)
    CaptureOnSecondTransition,
}

/// SPI mode (combined polarity and phase)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    /// Mode 0: CPOL=0, CPHA=0
    Mode0,
    /// Mode 1: CPOL=0, CPHA=1
    Mode1,
    /// Mode 2: CPOL=1, CPHA=0
    Mode2,
    /// Mode 3: CPOL=1, CPHA=1
    Mode3,
}

impl From<Mode> for (Polarity, Phase) {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Mode0 => (Polarity::IdleLow, Phase::CaptureOnFirstTransition),
            Mode::Mode1 => (Polarity::IdleLow, Phase::CaptureOnSecondTransition),
            Mode::Mode2 => (Polarity::IdleHigh, Phase::CaptureOnFirstTransition),
            Mode::Mode3 => (Polarity::IdleHigh, Phase::CaptureOnSecondTransition),
        }
    }
}
