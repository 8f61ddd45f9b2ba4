//! Hardware variant configuration
//!
//! A [`HardwareVariant`] collects everything that differs between SoC
//! revisions: peripheral base addresses, clock frequencies, the register
//! window size, and the Mini-UART status-bit layout. Controllers take a
//! variant at construction instead of reading global constants.
//!
//! Variants come from the built-in presets or from a TOML file:
//!
//! ```toml
//! # Start from the Pi 3 preset and override the clock
//! base = "bcm2837"
//! name = "pi3-overclocked"
//! system_clock_hz = 400000000
//! uart_receive_poll_limit = 500000
//! ```
//!
//! Keys left out keep the value of the starting preset (`bcm2711` when
//! `base` is absent).

use std::fs;
use std::path::Path;
use std::time::Duration;

use heapless::String as HString;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::mmio::PAGE_SIZE;
use crate::poll::PollPolicy;

/// Maximum variant name length
pub const MAX_NAME_LEN: usize = 16;

/// Offsets of the peripheral blocks from the SoC peripheral base
pub mod offsets {
    /// GPIO controller
    pub const GPIO: u64 = 0x20_0000;
    /// AUX block holding the Mini-UART
    pub const AUX: u64 = 0x21_5000;
    /// SPI0 master
    pub const SPI0: u64 = 0x20_4000;
    /// BSC1, the I2C master on the header pins
    pub const BSC1: u64 = 0x80_4000;
}

/// One status flag: register, bit and polarity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusBit {
    /// Byte offset of the status register in the peripheral window
    pub offset: usize,
    /// Bit number inside the register
    pub bit: u8,
    /// Flag is asserted when the bit reads 0
    #[serde(default)]
    pub active_low: bool,
}

impl StatusBit {
    /// Active-high flag
    pub const fn high(offset: usize, bit: u8) -> Self {
        Self {
            offset,
            bit,
            active_low: false,
        }
    }

    /// Whether the flag is asserted in a raw register value
    pub fn is_set(&self, value: u32) -> bool {
        let raw = value & (1u32 << self.bit) != 0;
        raw != self.active_low
    }
}

/// Where the Mini-UART reports transmitter and receiver readiness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UartStatusLayout {
    /// Transmit FIFO can accept a byte
    pub tx_ready: StatusBit,
    /// Receive FIFO holds a byte
    pub rx_ready: StatusBit,
    /// Transmitter has shifted out everything
    pub tx_idle: StatusBit,
}

impl UartStatusLayout {
    /// AUX_MU_LSR: bit 5 transmitter empty, bit 0 data ready, bit 6 idle
    pub const LINE_STATUS: Self = Self {
        tx_ready: StatusBit::high(0x54, 5),
        rx_ready: StatusBit::high(0x54, 0),
        tx_idle: StatusBit::high(0x54, 6),
    };
}

impl Default for UartStatusLayout {
    fn default() -> Self {
        Self::LINE_STATUS
    }
}

/// Addresses, clocks and layouts of one SoC family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareVariant {
    /// Variant label (e.g. "bcm2711")
    pub name: HString<MAX_NAME_LEN>,
    /// Bytes mapped per peripheral
    pub window_size: usize,
    /// GPIO register block
    pub gpio_base: u64,
    /// AUX block (Mini-UART)
    pub uart_base: u64,
    /// BSC1 (I2C)
    pub i2c_base: u64,
    /// SPI0
    pub spi_base: u64,
    /// Clock feeding the Mini-UART baud generator
    pub system_clock_hz: u32,
    /// Core clock feeding the SPI and I2C dividers
    pub core_clock_hz: u32,
    /// Mini-UART status-bit table
    pub uart_status: UartStatusLayout,
    /// Checks before `MiniUart::receive` gives up
    pub uart_receive_poll_limit: u32,
    /// Sleep between status checks in microseconds (0 spins)
    pub poll_interval_us: u64,
}

impl Default for HardwareVariant {
    fn default() -> Self {
        Self::bcm2711()
    }
}

/// Variant file contents: every key optional
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct VariantFile {
    base: Option<String>,
    name: Option<String>,
    peripheral_base: Option<u64>,
    window_size: Option<usize>,
    gpio_base: Option<u64>,
    uart_base: Option<u64>,
    i2c_base: Option<u64>,
    spi_base: Option<u64>,
    system_clock_hz: Option<u32>,
    core_clock_hz: Option<u32>,
    uart_status: Option<UartStatusLayout>,
    uart_receive_poll_limit: Option<u32>,
    poll_interval_us: Option<u64>,
}

impl HardwareVariant {
    /// Raspberry Pi 1 / Zero
    pub fn bcm2835() -> Self {
        Self::from_peripheral_base("bcm2835", 0x2000_0000)
    }

    /// Raspberry Pi 2 (later revisions) / 3
    pub fn bcm2837() -> Self {
        Self::from_peripheral_base("bcm2837", 0x3F00_0000)
    }

    /// Raspberry Pi 4, low-peripheral mode
    pub fn bcm2711() -> Self {
        Self::from_peripheral_base("bcm2711", 0xFE00_0000)
    }

    /// Look up a built-in preset by name
    pub fn preset(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bcm2835" | "pi1" | "pi0" => Some(Self::bcm2835()),
            "bcm2837" | "bcm2836" | "pi2" | "pi3" => Some(Self::bcm2837()),
            "bcm2711" | "pi4" => Some(Self::bcm2711()),
            _ => None,
        }
    }

    /// Standard block layout relative to a SoC peripheral base
    pub fn from_peripheral_base(name: &str, peripheral_base: u64) -> Self {
        Self {
            name: label(name),
            window_size: PAGE_SIZE,
            gpio_base: peripheral_base + offsets::GPIO,
            uart_base: peripheral_base + offsets::AUX,
            i2c_base: peripheral_base + offsets::BSC1,
            spi_base: peripheral_base + offsets::SPI0,
            system_clock_hz: 250_000_000,
            core_clock_hz: 250_000_000,
            uart_status: UartStatusLayout::LINE_STATUS,
            uart_receive_poll_limit: 1_000_000,
            poll_interval_us: 0,
        }
    }

    /// Parse a TOML variant description
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let file: VariantFile = toml::from_str(input)?;

        let mut variant = match file.base.as_deref() {
            Some(base) => {
                Self::preset(base).ok_or_else(|| ConfigError::UnknownPreset(base.to_string()))?
            }
            None => Self::bcm2711(),
        };

        if let Some(peripheral_base) = file.peripheral_base {
            variant = Self::from_peripheral_base(&variant.name, peripheral_base);
        }
        if let Some(name) = file.name {
            variant.name = label(&name);
        }
        if let Some(size) = file.window_size {
            variant.window_size = size;
        }
        if let Some(base) = file.gpio_base {
            variant.gpio_base = base;
        }
        if let Some(base) = file.uart_base {
            variant.uart_base = base;
        }
        if let Some(base) = file.i2c_base {
            variant.i2c_base = base;
        }
        if let Some(base) = file.spi_base {
            variant.spi_base = base;
        }
        if let Some(hz) = file.system_clock_hz {
            variant.system_clock_hz = hz;
        }
        if let Some(hz) = file.core_clock_hz {
            variant.core_clock_hz = hz;
        }
        if let Some(layout) = file.uart_status {
            variant.uart_status = layout;
        }
        if let Some(limit) = file.uart_receive_poll_limit {
            variant.uart_receive_poll_limit = limit;
        }
        if let Some(us) = file.poll_interval_us {
            variant.poll_interval_us = us;
        }

        variant.validate()?;
        Ok(variant)
    }

    /// Load a TOML variant file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let input = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let variant = Self::from_toml_str(&input)?;
        log::debug!("loaded hardware variant {} from {}", variant.name, path.display());
        Ok(variant)
    }

    /// Render as a complete TOML description
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// Check the window size is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.window_size % PAGE_SIZE != 0 {
            return Err(ConfigError::InvalidWindowSize(self.window_size));
        }
        Ok(())
    }

    /// Sleep between status checks
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }

    /// Policy for waits that must not give up (bus idle, FIFO space, done)
    pub fn status_poll(&self) -> PollPolicy {
        PollPolicy::UNBOUNDED.with_interval(self.poll_interval())
    }

    /// Policy for `MiniUart::receive`
    pub fn receive_poll(&self) -> PollPolicy {
        PollPolicy::bounded(self.uart_receive_poll_limit).with_interval(self.poll_interval())
    }
}

/// Bounded label; characters beyond [`MAX_NAME_LEN`] bytes are dropped
fn label(name: &str) -> HString<MAX_NAME_LEN> {
    let mut out = HString::new();
    for c in name.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}
