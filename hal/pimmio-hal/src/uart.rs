//! UART serial communication abstractions
//!
//! Byte-oriented blocking serial traits. Implementations poll hardware
//! status bits; the receive side may give up after a bounded wait and
//! report it through its error type.

/// UART transmitter
pub trait UartTx {
    /// Error type for transmit operations
    type Error;

    /// Write one byte, blocking until the transmitter accepts it
    fn write_byte(&mut self, byte: u8) -> Result<(), Self::Error>;

    /// Write every byte of `data` in order
    fn write_blocking(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        for &byte in data {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Block until all written bytes have left the transmitter
    fn flush(&mut self) -> Result<(), Self::Error>;
}

/// UART receiver
pub trait UartRx {
    /// Error type for receive operations
    type Error;

    /// Read a single byte
    fn read_byte(&mut self) -> Result<u8, Self::Error>;

    /// Fill `buf` byte by byte
    ///
    /// Returns the number of bytes read, which equals `buf.len()` unless an
    /// error interrupted the read.
    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        for slot in buf.iter_mut() {
            *slot = self.read_byte()?;
        }
        Ok(buf.len())
    }
}

/// Combined UART interface
pub trait Uart: UartTx + UartRx {}

impl<T: UartTx + UartRx> Uart for T {}

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits per frame
    pub data_bits: DataBits,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115_200,
            data_bits: DataBits::Eight,
        }
    }
}

impl UartConfig {
    /// 8 data bits at the given baud rate
    pub const fn with_baudrate(baudrate: u32) -> Self {
        Self {
            baudrate,
            data_bits: DataBits::Eight,
        }
    }
}

/// Number of data bits per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataBits {
    Seven,
    Eight,
}
