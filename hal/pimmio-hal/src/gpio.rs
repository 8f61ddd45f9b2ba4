//! GPIO pin abstractions
//!
//! Register writes to a mapped pin cannot fail, so these traits are
//! infallible. Implementations drive the chip's set/clear/level registers.

/// Digital output pin
pub trait OutputPin {
    /// Drive the pin high (logic 1)
    fn set_high(&mut self);

    /// Drive the pin low (logic 0)
    fn set_low(&mut self);

    /// Drive the pin to a specific level
    fn set_state(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }

    /// Invert the current output level
    fn toggle(&mut self) {
        let high = self.is_set_high();
        self.set_state(!high);
    }

    /// Check if the pin currently reads back high
    fn is_set_high(&self) -> bool;

    /// Check if the pin currently reads back low
    fn is_set_low(&self) -> bool {
        !self.is_set_high()
    }
}

/// Digital input pin
pub trait InputPin {
    /// Check if the pin level is high (logic 1)
    fn is_high(&self) -> bool;

    /// Check if the pin level is low (logic 0)
    fn is_low(&self) -> bool {
        !self.is_high()
    }
}

/// Pin used for both input and output
pub trait IoPin: OutputPin + InputPin {}

impl<T: OutputPin + InputPin> IoPin for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct LatchPin {
        high: bool,
    }

    impl OutputPin for LatchPin {
        fn set_high(&mut self) {
            self.high = true;
        }

        fn set_low(&mut self) {
            self.high = false;
        }

        fn is_set_high(&self) -> bool {
            self.high
        }
    }

    impl InputPin for LatchPin {
        fn is_high(&self) -> bool {
            self.high
        }
    }

    #[test]
    fn test_set_state_and_toggle() {
        let mut pin = LatchPin { high: false };

        pin.set_state(true);
        assert!(pin.is_set_high());

        pin.toggle();
        assert!(pin.is_set_low());
        assert!(pin.is_low());

        pin.toggle();
        assert!(pin.is_high());
    }

    #[test]
    fn test_io_pin_blanket() {
        fn drive<P: IoPin>(p: &mut P) -> bool {
            p.set_high();
            p.is_high()
        }

        let mut pin = LatchPin { high: false };
        assert!(drive(&mut pin));
    }
}
