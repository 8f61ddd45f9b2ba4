//! pimmio Hardware Abstraction Layer
//!
//! This crate defines the peripheral traits shared by pimmio drivers. A
//! chip crate implements them on top of memory-mapped registers, and
//! application code written against the traits runs unchanged on any
//! implementation, including simulated register banks in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application / device drivers           │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  pimmio-hal (this crate - traits)       │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  pimmio-hal-bcm (BCM2835/2837/2711)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`gpio::OutputPin`], [`gpio::InputPin`] - Digital I/O
//! - [`uart::UartTx`], [`uart::UartRx`] - Serial communication
//! - [`i2c::I2cBus`] - I2C bus operations
//! - [`spi::SpiBus`] - SPI bus operations

#![no_std]
#![deny(unsafe_code)]

pub mod gpio;
pub mod i2c;
pub mod spi;
pub mod uart;

// Re-export key traits at crate root for convenience
pub use gpio::{InputPin, OutputPin};
pub use i2c::I2cBus;
pub use spi::SpiBus;
pub use uart::{UartRx, UartTx};
