//! GPIO function select and pin levels
//!
//! Each [`GpioPin`] owns a mapping of the GPIO register block and touches
//! only its own bits:
//!
//! | Register | Offset | Use |
//! |----------|--------|-----|
//! | GPFSEL0..5 | 0x00..0x14 | 3-bit function per pin, 10 pins per register |
//! | GPSET0/1 | 0x1C / 0x20 | write 1 to drive high |
//! | GPCLR0/1 | 0x28 / 0x2C | write 1 to drive low |
//! | GPLEV0/1 | 0x34 / 0x38 | current pin level |
//!
//! SET and CLR are write-one registers, so level changes never disturb
//! other pins. Function changes are a read-modify-write of one GPFSEL word.

use core::convert::Infallible;

use log::debug;

use crate::config::HardwareVariant;
use crate::error::GpioError;
use crate::mmio::{DevMem, Mapper, RegisterWindow};

/// Highest GPIO number on the BCM283x/BCM2711
pub const MAX_PIN: u8 = 53;

const GPFSEL0: usize = 0x00;
const GPSET0: usize = 0x1C;
const GPCLR0: usize = 0x28;
const GPLEV0: usize = 0x34;

const FSEL_MASK: u32 = 0b111;

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    In,
    Out,
}

/// Function-select codes
///
/// The alternate function codes are not in numeric order: Alt4 and Alt5
/// sit below Alt0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinFunction {
    Input,
    Output,
    Alt0,
    Alt1,
    Alt2,
    Alt3,
    Alt4,
    Alt5,
}

impl PinFunction {
    /// Every function, in code order
    pub const ALL: [PinFunction; 8] = [
        PinFunction::Input,
        PinFunction::Output,
        PinFunction::Alt5,
        PinFunction::Alt4,
        PinFunction::Alt0,
        PinFunction::Alt1,
        PinFunction::Alt2,
        PinFunction::Alt3,
    ];

    /// 3-bit GPFSEL code
    pub const fn bits(self) -> u32 {
        match self {
            PinFunction::Input => 0b000,
            PinFunction::Output => 0b001,
            PinFunction::Alt0 => 0b100,
            PinFunction::Alt1 => 0b101,
            PinFunction::Alt2 => 0b110,
            PinFunction::Alt3 => 0b111,
            PinFunction::Alt4 => 0b011,
            PinFunction::Alt5 => 0b010,
        }
    }

    /// Decode a GPFSEL field; bits above the low three are ignored
    pub const fn from_bits(bits: u32) -> Self {
        Self::ALL[(bits & FSEL_MASK) as usize]
    }
}

impl From<Direction> for PinFunction {
    fn from(direction: Direction) -> Self {
        match direction {
            Direction::In => PinFunction::Input,
            Direction::Out => PinFunction::Output,
        }
    }
}

/// One GPIO line with its own register window
#[derive(Debug)]
pub struct GpioPin {
    pin: u8,
    window: RegisterWindow,
}

impl GpioPin {
    /// Map the GPIO block of `variant` for `pin`
    ///
    /// The pin number is checked before anything is mapped.
    pub fn open<M: Mapper + ?Sized>(
        mapper: &M,
        variant: &HardwareVariant,
        pin: u8,
    ) -> Result<Self, GpioError> {
        if pin > MAX_PIN {
            return Err(GpioError::InvalidPin(pin));
        }
        let window = mapper.map(variant.gpio_base, variant.window_size)?;
        debug!("gpio{} ready ({})", pin, variant.name);
        Ok(Self { pin, window })
    }

    /// Open `pin` through `/dev/mem` on a BCM2711
    pub fn new(pin: u8) -> Result<Self, GpioError> {
        Self::open(&DevMem::default(), &HardwareVariant::bcm2711(), pin)
    }

    /// GPIO number
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Switch between plain input and output
    pub fn set_direction(&mut self, direction: Direction) {
        self.set_function(direction.into());
    }

    /// Program the pin's function-select field
    pub fn set_function(&mut self, function: PinFunction) {
        let (offset, shift) = self.fsel_field();
        self.window.modify(offset, |value| {
            (value & !(FSEL_MASK << shift)) | (function.bits() << shift)
        });
    }

    /// Read back the pin's function-select field
    pub fn function(&self) -> PinFunction {
        let (offset, shift) = self.fsel_field();
        PinFunction::from_bits(self.window.read(offset) >> shift)
    }

    /// Drive the pin high or low
    ///
    /// Only has a visible effect while the pin is an output.
    pub fn write(&mut self, high: bool) {
        let base = if high { GPSET0 } else { GPCLR0 };
        self.window.write(self.bank_offset(base), self.bit());
    }

    /// Current pin level
    pub fn read(&self) -> bool {
        self.window.read(self.bank_offset(GPLEV0)) & self.bit() != 0
    }

    fn fsel_field(&self) -> (usize, u32) {
        let pin = usize::from(self.pin);
        (GPFSEL0 + 4 * (pin / 10), ((pin % 10) * 3) as u32)
    }

    /// SET/CLR/LEV come in pairs: pins 0-31 in the first word, 32-53 in the second
    fn bank_offset(&self, base: usize) -> usize {
        base + 4 * usize::from(self.pin / 32)
    }

    fn bit(&self) -> u32 {
        1 << (self.pin % 32)
    }
}

impl pimmio_hal::OutputPin for GpioPin {
    fn set_high(&mut self) {
        self.write(true);
    }

    fn set_low(&mut self) {
        self.write(false);
    }

    /// The controller has no readable output latch; this reports the pin level
    fn is_set_high(&self) -> bool {
        self.read()
    }
}

impl pimmio_hal::InputPin for GpioPin {
    fn is_high(&self) -> bool {
        self.read()
    }
}

impl embedded_hal::digital::ErrorType for GpioPin {
    type Error = Infallible;
}

impl embedded_hal::digital::OutputPin for GpioPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write(true);
        Ok(())
    }
}

impl embedded_hal::digital::StatefulOutputPin for GpioPin {
    fn is_set_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read())
    }

    fn is_set_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.read())
    }
}

impl embedded_hal::digital::InputPin for GpioPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.read())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.read())
    }
}
