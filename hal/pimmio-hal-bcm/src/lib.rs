//! Broadcom BCM283x/BCM2711 HAL for pimmio
//!
//! This crate drives Raspberry Pi peripherals from Linux user space by
//! mapping their register blocks through `/dev/mem` and polling the
//! hardware handshake bits:
//!
//! - GPIO function select and pin levels ([`gpio::GpioPin`])
//! - Mini-UART on the AUX block ([`uart::MiniUart`])
//! - I2C on BSC1 ([`i2c::I2c`])
//! - SPI0 ([`spi::Spi`])
//!
//! Every controller maps its own 4 KiB window when it is constructed and
//! unmaps it when dropped. Base addresses, clocks and the UART status-bit
//! layout come from a [`config::HardwareVariant`], and the window source is
//! a [`mmio::Mapper`]: [`mmio::DevMem`] on a real board, or a
//! [`sim::Simulator`] backed by in-memory register banks in tests.
//!
//! # Usage
//!
//! ```no_run
//! use pimmio_hal_bcm::config::HardwareVariant;
//! use pimmio_hal_bcm::gpio::{Direction, GpioPin, PinFunction};
//! use pimmio_hal_bcm::mmio::DevMem;
//! use pimmio_hal_bcm::uart::MiniUart;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mem = DevMem::default();
//! let variant = HardwareVariant::bcm2711();
//!
//! let mut led = GpioPin::open(&mem, &variant, 17)?;
//! led.set_direction(Direction::Out);
//! led.write(true);
//!
//! // Route GPIO14/15 to TXD1/RXD1 before bringing up the Mini-UART
//! GpioPin::open(&mem, &variant, 14)?.set_function(PinFunction::Alt5);
//! GpioPin::open(&mem, &variant, 15)?.set_function(PinFunction::Alt5);
//!
//! let mut uart = MiniUart::open(&mem, &variant, 115_200)?;
//! uart.send(b'a')?;
//! # Ok(())
//! # }
//! ```
//!
//! Access is single threaded and each physical block should be opened
//! once per process; two controllers over the same block are not
//! coordinated.

pub mod config;
pub mod error;
pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod poll;
pub mod sim;
pub mod spi;
pub mod uart;

pub use config::HardwareVariant;
pub use error::{ConfigError, GpioError, I2cError, I2cFault, MapError, SpiError, UartError};
pub use mmio::{DevMem, Mapper, RegisterWindow};

// Re-export shared traits from pimmio-hal for convenience
pub use pimmio_hal::{I2cBus, InputPin, OutputPin, SpiBus, UartRx, UartTx};
