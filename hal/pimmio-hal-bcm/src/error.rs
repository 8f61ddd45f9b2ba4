//! Error types for mapping, configuration and peripheral operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure to establish a register window
#[derive(Debug, Error)]
pub enum MapError {
    /// The privileged memory device could not be opened
    #[error("cannot open memory device {}: {source}", .path.display())]
    DeviceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// The platform refused to map the physical range
    #[error("mapping {size:#x} bytes at {phys_base:#010x} failed: {source}")]
    MappingFailed {
        phys_base: u64,
        size: usize,
        #[source]
        source: io::Error,
    },
    /// Base or size is not page granular
    #[error("region {phys_base:#010x}+{size:#x} is not a whole number of aligned pages")]
    InvalidRegion { phys_base: u64, size: usize },
}

/// GPIO controller errors
#[derive(Debug, Error)]
pub enum GpioError {
    /// Pin number outside 0..=53
    #[error("gpio {0} does not exist")]
    InvalidPin(u8),
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Mini-UART errors
#[derive(Debug, Error)]
pub enum UartError {
    /// Baud rate is zero or gives a divisor outside the 16-bit register
    #[error("baud rate {0} cannot be generated from the system clock")]
    InvalidBaudRate(u32),
    /// No byte arrived within the receive poll bound
    #[error("timed out waiting for received data")]
    ReceiveTimeout,
    /// The transmitter never became ready within a bounded poll policy
    #[error("timed out waiting for the transmitter")]
    SendTimeout,
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Hardware-reported I2C failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cFault {
    /// Slave address or a data byte was not acknowledged (S.ERR)
    NoAcknowledge,
    /// Slave held SCL low past the stretch timeout (S.CLKT)
    ClockStretchTimeout,
}

/// I2C controller errors
#[derive(Debug, Error)]
pub enum I2cError {
    #[error("i2c transaction failed: {0:?}")]
    TransactionFailed(I2cFault),
    /// Address does not fit in 7 bits
    #[error("i2c address {0:#04x} is not a 7-bit address")]
    InvalidAddress(u8),
    /// Transfer longer than the 16-bit DLEN register
    #[error("i2c transfer of {0} bytes exceeds the data length register")]
    InvalidLength(usize),
    /// Requested SCL frequency gives an unusable clock divider
    #[error("i2c clock of {0} Hz cannot be derived from the core clock")]
    InvalidFrequency(u32),
    /// The transfer completed with fewer bytes than requested
    #[error("i2c read returned {received} of {expected} bytes")]
    ShortRead { expected: usize, received: usize },
    /// A bounded status poll ran out
    #[error("timed out waiting for the i2c controller")]
    Timeout,
    #[error(transparent)]
    Map(#[from] MapError),
}

/// SPI controller errors
#[derive(Debug, Error)]
pub enum SpiError {
    /// Requested clock gives a divider outside 1..=65535
    #[error("spi clock of {0} Hz cannot be derived from the core clock")]
    InvalidClockSpeed(u32),
    /// A bounded FIFO poll ran out
    #[error("timed out waiting for the spi fifo")]
    Timeout,
    #[error(transparent)]
    Map(#[from] MapError),
}

/// Hardware variant loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read variant file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid variant description: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unknown hardware preset {0:?}")]
    UnknownPreset(String),
    /// Window size is zero or not a multiple of the page size
    #[error("window size {0:#x} is not a positive multiple of the page size")]
    InvalidWindowSize(usize),
}

impl embedded_hal::i2c::Error for I2cError {
    fn kind(&self) -> embedded_hal::i2c::ErrorKind {
        use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

        match self {
            I2cError::TransactionFailed(I2cFault::NoAcknowledge) => {
                ErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown)
            }
            I2cError::TransactionFailed(I2cFault::ClockStretchTimeout) => ErrorKind::Bus,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_hal::spi::Error for SpiError {
    fn kind(&self) -> embedded_hal::spi::ErrorKind {
        embedded_hal::spi::ErrorKind::Other
    }
}

impl embedded_io::Error for UartError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            UartError::ReceiveTimeout | UartError::SendTimeout => embedded_io::ErrorKind::TimedOut,
            UartError::InvalidBaudRate(_) => embedded_io::ErrorKind::InvalidInput,
            UartError::Map(_) => embedded_io::ErrorKind::Other,
        }
    }
}
