//! SPI0 master, one byte per transfer
//!
//! Each exchange opens and closes a transfer: CS is written with TA set
//! and both FIFOs cleared, the byte goes into the FIFO once TXD reports
//! space, the reply comes out once RXD reports data, and CS returns to 0.
//! Chip select 0 is used. Multi-byte operations repeat the exchange.

use log::{debug, trace};
use pimmio_hal::spi::{Phase, Polarity, SpiConfig};

use crate::config::HardwareVariant;
use crate::error::SpiError;
use crate::mmio::{Mapper, RegisterWindow};
use crate::poll::PollPolicy;

const CS: usize = 0x00;
const FIFO: usize = 0x04;
const CLK: usize = 0x08;

const CS_CPHA: u32 = 1 << 2;
const CS_CPOL: u32 = 1 << 3;
const CS_CLEAR: u32 = 0b11 << 4;
const CS_TA: u32 = 1 << 7;
const CS_RXD: u32 = 1 << 17;
const CS_TXD: u32 = 1 << 18;

/// CLK divider for a target SCK frequency
pub fn compute_clock_divider(core_clock_hz: u32, frequency: u32) -> Result<u16, SpiError> {
    if frequency == 0 {
        return Err(SpiError::InvalidClockSpeed(frequency));
    }
    match core_clock_hz / frequency {
        divider @ 1..=0xFFFF => Ok(divider as u16),
        _ => Err(SpiError::InvalidClockSpeed(frequency)),
    }
}

/// Polled SPI0 master
#[derive(Debug)]
pub struct Spi {
    window: RegisterWindow,
    divider: u16,
    mode: u32,
    poll: PollPolicy,
}

impl Spi {
    /// Map SPI0 and program the clock divider
    ///
    /// The frequency is checked before anything is mapped.
    pub fn open<M: Mapper + ?Sized>(
        mapper: &M,
        variant: &HardwareVariant,
        config: SpiConfig,
    ) -> Result<Self, SpiError> {
        let divider = compute_clock_divider(variant.core_clock_hz, config.frequency)?;
        let window = mapper.map(variant.spi_base, variant.window_size)?;
        window.write(CLK, u32::from(divider));

        let mut mode = 0;
        if config.polarity == Polarity::IdleHigh {
            mode |= CS_CPOL;
        }
        if config.phase == Phase::CaptureOnSecondTransition {
            mode |= CS_CPHA;
        }

        debug!(
            "spi0 at {:#010x}: {} Hz (divider {})",
            variant.spi_base, config.frequency, divider
        );

        Ok(Self {
            window,
            divider,
            mode,
            poll: variant.status_poll(),
        })
    }

    /// Programmed CLK value
    pub fn clock_divider(&self) -> u16 {
        self.divider
    }

    /// Replace the poll used for FIFO waits
    pub fn set_poll(&mut self, policy: PollPolicy) {
        self.poll = policy;
    }

    /// Shift `byte` out and return the byte shifted in
    pub fn transfer(&mut self, byte: u8) -> Result<u8, SpiError> {
        self.window.write(CS, self.mode | CS_TA | CS_CLEAR);

        self.wait_for(CS_TXD)?;
        self.window.write(FIFO, u32::from(byte));

        self.wait_for(CS_RXD)?;
        let received = (self.window.read(FIFO) & 0xFF) as u8;

        self.window.write(CS, 0);
        trace!("spi0 {:#04x} -> {:#04x}", byte, received);
        Ok(received)
    }

    fn wait_for(&self, flag: u32) -> Result<(), SpiError> {
        let window = &self.window;
        self.poll
            .wait_until(|| window.read(CS) & flag != 0)
            .map_err(|_| {
                window.write(CS, 0);
                SpiError::Timeout
            })
    }
}

impl pimmio_hal::SpiBus for Spi {
    type Error = SpiError;

    fn transfer_byte(&mut self, byte: u8) -> Result<u8, SpiError> {
        Spi::transfer(self, byte)
    }
}

impl embedded_hal::spi::ErrorType for Spi {
    type Error = SpiError;
}

impl embedded_hal::spi::SpiBus<u8> for Spi {
    fn read(&mut self, words: &mut [u8]) -> Result<(), SpiError> {
        pimmio_hal::SpiBus::read(self, words)
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SpiError> {
        pimmio_hal::SpiBus::write(self, words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SpiError> {
        pimmio_hal::SpiBus::transfer(self, read, write)
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SpiError> {
        pimmio_hal::SpiBus::transfer_in_place(self, words)
    }

    /// Every exchange waits for its reply, so nothing is ever in flight
    fn flush(&mut self) -> Result<(), SpiError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::PAGE_SIZE;
    use crate::sim::{MemoryBank, RegisterBank, Simulator};
    use pimmio_hal::spi::Mode;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// SPI0 wired to a shift register: each reply is the previous byte sent
    struct ShiftRegisterModel {
        regs: MemoryBank,
        rx: Mutex<VecDeque<u8>>,
        last: Mutex<u8>,
    }

    impl ShiftRegisterModel {
        fn new() -> Self {
            Self {
                regs: MemoryBank::new(PAGE_SIZE),
                rx: Mutex::new(VecDeque::new()),
                last: Mutex::new(0),
            }
        }
    }

    impl RegisterBank for ShiftRegisterModel {
        fn read(&self, offset: usize) -> u32 {
            match offset {
                CS => {
                    let mut cs = self.regs.read(CS);
                    if cs & CS_TA != 0 {
                        cs |= CS_TXD;
                    }
                    if !self.rx.lock().unwrap().is_empty() {
                        cs |= CS_RXD;
                    }
                    cs
                }
                FIFO => self.rx.lock().unwrap().pop_front().map_or(0, u32::from),
                _ => self.regs.read(offset),
            }
        }

        fn write(&self, offset: usize, value: u32) {
            self.regs.write(offset, value);
            match offset {
                CS if value & CS_CLEAR != 0 => self.rx.lock().unwrap().clear(),
                FIFO => {
                    let mut last = self.last.lock().unwrap();
                    self.rx.lock().unwrap().push_back(*last);
                    *last = value as u8;
                }
                _ => {}
            }
        }
    }

    fn open(bank: Arc<dyn RegisterBank>, config: SpiConfig) -> (Simulator, Spi) {
        let variant = HardwareVariant::bcm2711();
        let sim = Simulator::new().with_bank(variant.spi_base, bank);
        let spi = Spi::open(&sim, &variant, config).unwrap();
        (sim, spi)
    }

    #[test]
    fn test_clock_divider() {
        assert_eq!(compute_clock_divider(250_000_000, 500_000).unwrap(), 500);
        assert_eq!(compute_clock_divider(250_000_000, 250_000_000).unwrap(), 1);
        for bad in [0, 1_000, 500_000_000] {
            assert!(matches!(
                compute_clock_divider(250_000_000, bad),
                Err(SpiError::InvalidClockSpeed(_))
            ));
        }
    }

    #[test]
    fn test_transfer_sequence() {
        let model = Arc::new(ShiftRegisterModel::new());
        let (_sim, mut spi) = open(model.clone(), SpiConfig::with_frequency(500_000));

        assert_eq!(spi.clock_divider(), 500);
        assert_eq!(spi.transfer(0xA5).unwrap(), 0x00);
        assert_eq!(spi.transfer(0x3C).unwrap(), 0xA5);

        assert_eq!(
            model.regs.writes(),
            vec![
                (CLK, 500),
                (CS, CS_TA | CS_CLEAR),
                (FIFO, 0xA5),
                (CS, 0),
                (CS, CS_TA | CS_CLEAR),
                (FIFO, 0x3C),
                (CS, 0),
            ]
        );
        assert_eq!(model.regs.peek(CS), 0);
    }

    #[test]
    fn test_mode_bits() {
        let model = Arc::new(ShiftRegisterModel::new());
        let config = SpiConfig::with_frequency(1_000_000).with_mode(Mode::Mode3);
        let (_sim, mut spi) = open(model.clone(), config);

        spi.transfer(0).unwrap();
        assert_eq!(
            model.regs.writes_to(CS),
            vec![CS_CPOL | CS_CPHA | CS_TA | CS_CLEAR, 0]
        );
    }

    #[test]
    fn test_stalled_fifo_times_out() {
        let bank = Arc::new(MemoryBank::new(PAGE_SIZE));
        let (_sim, mut spi) = open(bank.clone(), SpiConfig::default());
        spi.set_poll(PollPolicy::bounded(10));

        assert!(matches!(spi.transfer(0x01), Err(SpiError::Timeout)));
        assert!(bank.writes_to(FIFO).is_empty());
        assert_eq!(bank.peek(CS), 0);
    }

    #[test]
    fn test_invalid_speed_never_maps() {
        let sim = Simulator::unavailable();
        let variant = HardwareVariant::bcm2711();
        assert!(matches!(
            Spi::open(&sim, &variant, SpiConfig::with_frequency(0)),
            Err(SpiError::InvalidClockSpeed(0))
        ));
    }

    #[test]
    fn test_hal_traits() {
        use embedded_hal::spi::SpiBus as _;

        let model = Arc::new(ShiftRegisterModel::new());
        let (sim, mut spi) = open(model, SpiConfig::default());

        let mut read = [0u8; 3];
        embedded_hal::spi::SpiBus::transfer(&mut spi, &mut read, &[1, 2, 3]).unwrap();
        assert_eq!(read, [0, 1, 2]);

        let mut data = [7, 8];
        spi.transfer_in_place(&mut data).unwrap();
        assert_eq!(data, [3, 7]);
        spi.flush().unwrap();

        drop(spi);
        assert_eq!(sim.live(), 0);
    }
}
