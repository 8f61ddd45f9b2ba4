//! Mini-UART on the AUX block
//!
//! The Mini-UART shares the AUX register page with SPI1/SPI2, so the
//! enable register is updated with an OR rather than overwritten.
//! Bring-up happens once, in [`MiniUart::open`]:
//!
//! ```text
//! AUX_ENABLES |= 1       enable the Mini-UART
//! AUX_MU_LCR   = 3       8 data bits
//! AUX_MU_IER   = 0       no interrupts
//! AUX_MU_IIR   = 0xC6    clear and enable both FIFOs
//! AUX_MU_BAUD  = clock / (8 * baud) - 1
//! AUX_MU_CNTL  = 3       receiver and transmitter on
//! ```
//!
//! GPIO14/15 must be switched to Alt5 separately for TXD1/RXD1 to reach
//! the header.

use log::{debug, trace, warn};
use pimmio_hal::uart::{DataBits, UartConfig};

use crate::config::{HardwareVariant, StatusBit, UartStatusLayout};
use crate::error::UartError;
use crate::mmio::{Mapper, RegisterWindow};
use crate::poll::PollPolicy;

const AUX_ENABLES: usize = 0x04;
const AUX_MU_IO: usize = 0x40;
const AUX_MU_IER: usize = 0x44;
const AUX_MU_IIR: usize = 0x48;
const AUX_MU_LCR: usize = 0x4C;
const AUX_MU_CNTL: usize = 0x60;
const AUX_MU_BAUD: usize = 0x68;

const ENABLE_MINI_UART: u32 = 1 << 0;
const LCR_8BIT: u32 = 0b11;
const LCR_7BIT: u32 = 0b00;
const IIR_FIFO_RESET: u32 = 0xC6;
const CNTL_RX_TX: u32 = 0b11;

/// Divisor for AUX_MU_BAUD: `system_clock / (8 * baud) - 1`
///
/// Fails for a zero baud rate and for rates the 16-bit register cannot
/// express (too high gives a negative divisor, too low overflows).
pub fn compute_baud_divisor(system_clock_hz: u32, baud: u32) -> Result<u16, UartError> {
    if baud == 0 {
        return Err(UartError::InvalidBaudRate(baud));
    }
    let ratio = u64::from(system_clock_hz) / (8 * u64::from(baud));
    ratio
        .checked_sub(1)
        .and_then(|divisor| u16::try_from(divisor).ok())
        .ok_or(UartError::InvalidBaudRate(baud))
}

/// Polled Mini-UART
#[derive(Debug)]
pub struct MiniUart {
    window: RegisterWindow,
    status: UartStatusLayout,
    system_clock_hz: u32,
    divisor: u16,
    transmit_poll: PollPolicy,
    receive_poll: PollPolicy,
}

impl MiniUart {
    /// Map the AUX block and bring the Mini-UART up at `baud`, 8N1
    pub fn open<M: Mapper + ?Sized>(
        mapper: &M,
        variant: &HardwareVariant,
        baud: u32,
    ) -> Result<Self, UartError> {
        Self::open_with_config(mapper, variant, &UartConfig::with_baudrate(baud))
    }

    /// Bring the Mini-UART up from a shared UART configuration
    ///
    /// The baud rate is validated before anything is mapped.
    pub fn open_with_config<M: Mapper + ?Sized>(
        mapper: &M,
        variant: &HardwareVariant,
        config: &UartConfig,
    ) -> Result<Self, UartError> {
        let divisor = compute_baud_divisor(variant.system_clock_hz, config.baudrate)?;
        let window = mapper.map(variant.uart_base, variant.window_size)?;

        let lcr = match config.data_bits {
            DataBits::Eight => LCR_8BIT,
            DataBits::Seven => LCR_7BIT,
        };

        window.modify(AUX_ENABLES, |value| value | ENABLE_MINI_UART);
        window.write(AUX_MU_LCR, lcr);
        window.write(AUX_MU_IER, 0);
        window.write(AUX_MU_IIR, IIR_FIFO_RESET);
        window.write(AUX_MU_BAUD, u32::from(divisor));
        window.write(AUX_MU_CNTL, CNTL_RX_TX);

        debug!(
            "mini-uart at {:#010x}: {} baud (divisor {})",
            variant.uart_base, config.baudrate, divisor
        );

        Ok(Self {
            window,
            status: variant.uart_status,
            system_clock_hz: variant.system_clock_hz,
            divisor,
            transmit_poll: variant.status_poll(),
            receive_poll: variant.receive_poll(),
        })
    }

    /// Programmed AUX_MU_BAUD value
    pub fn baud_divisor(&self) -> u16 {
        self.divisor
    }

    /// Baud rate the divisor actually produces
    pub fn baud_rate(&self) -> u32 {
        self.system_clock_hz / (8 * (u32::from(self.divisor) + 1))
    }

    /// Replace the poll used for transmitter waits (unbounded by default)
    pub fn set_transmit_poll(&mut self, policy: PollPolicy) {
        self.transmit_poll = policy;
    }

    /// Replace the poll used by [`receive`](Self::receive)
    pub fn set_receive_poll(&mut self, policy: PollPolicy) {
        self.receive_poll = policy;
    }

    /// Send one byte once the transmitter can take it
    pub fn send(&mut self, byte: u8) -> Result<(), UartError> {
        let ready = self.status.tx_ready;
        self.transmit_poll
            .wait_until(|| self.flag(ready))
            .map_err(|_| {
                warn!("mini-uart transmitter never became ready");
                UartError::SendTimeout
            })?;
        trace!("mini-uart tx {:#04x}", byte);
        self.window.write(AUX_MU_IO, u32::from(byte));
        Ok(())
    }

    /// Wait for a received byte
    ///
    /// Gives up with [`UartError::ReceiveTimeout`] once the receive poll
    /// bound is used up.
    pub fn receive(&mut self) -> Result<u8, UartError> {
        let ready = self.status.rx_ready;
        self.receive_poll
            .wait_until(|| self.flag(ready))
            .map_err(|_| UartError::ReceiveTimeout)?;
        Ok(self.take_byte())
    }

    /// Send every byte of `data`
    pub fn write_all(&mut self, data: &[u8]) -> Result<(), UartError> {
        for &byte in data {
            self.send(byte)?;
        }
        Ok(())
    }

    /// Wait until the transmitter has shifted everything out
    pub fn flush(&mut self) -> Result<(), UartError> {
        let idle = self.status.tx_idle;
        self.transmit_poll
            .wait_until(|| self.flag(idle))
            .map_err(|_| UartError::SendTimeout)
    }

    /// Wait for one byte, then take whatever else is already buffered
    ///
    /// Returns the number of bytes stored; 0 only for an empty `buf`.
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
        let Some((first, rest)) = buf.split_first_mut() else {
            return Ok(0);
        };
        *first = self.receive()?;

        let mut count = 1;
        for slot in rest {
            if !self.flag(self.status.rx_ready) {
                break;
            }
            *slot = self.take_byte();
            count += 1;
        }
        Ok(count)
    }

    fn flag(&self, bit: StatusBit) -> bool {
        bit.is_set(self.window.read(bit.offset))
    }

    fn take_byte(&self) -> u8 {
        let byte = (self.window.read(AUX_MU_IO) & 0xFF) as u8;
        trace!("mini-uart rx {:#04x}", byte);
        byte
    }
}

impl pimmio_hal::UartTx for MiniUart {
    type Error = UartError;

    fn write_byte(&mut self, byte: u8) -> Result<(), UartError> {
        self.send(byte)
    }

    fn flush(&mut self) -> Result<(), UartError> {
        MiniUart::flush(self)
    }
}

impl pimmio_hal::UartRx for MiniUart {
    type Error = UartError;

    fn read_byte(&mut self) -> Result<u8, UartError> {
        self.receive()
    }
}

impl embedded_io::ErrorType for MiniUart {
    type Error = UartError;
}

impl embedded_io::Read for MiniUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, UartError> {
        self.read_into(buf)
    }
}

impl embedded_io::Write for MiniUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, UartError> {
        self.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), UartError> {
        MiniUart::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmio::PAGE_SIZE;
    use crate::sim::{MemoryBank, RegisterBank, Simulator};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    const LSR: usize = 0x54;

    /// AUX block with a receive queue and a transmit log behind AUX_MU_IO
    struct UartModel {
        regs: MemoryBank,
        rx: Mutex<VecDeque<u8>>,
        tx: Mutex<Vec<u8>>,
        tx_ready: AtomicBool,
    }

    impl UartModel {
        fn new(incoming: &[u8]) -> Self {
            Self {
                regs: MemoryBank::new(PAGE_SIZE),
                rx: Mutex::new(incoming.iter().copied().collect()),
                tx: Mutex::new(Vec::new()),
                tx_ready: AtomicBool::new(true),
            }
        }

        fn sent(&self) -> Vec<u8> {
            self.tx.lock().unwrap().clone()
        }
    }

    impl RegisterBank for UartModel {
        fn read(&self, offset: usize) -> u32 {
            match offset {
                AUX_MU_IO => self.rx.lock().unwrap().pop_front().map_or(0, u32::from),
                LSR => {
                    let mut lsr = 0;
                    if self.tx_ready.load(Ordering::SeqCst) {
                        lsr |= 1 << 5 | 1 << 6;
                    }
                    if !self.rx.lock().unwrap().is_empty() {
                        lsr |= 1 << 0;
                    }
                    lsr
                }
                _ => self.regs.read(offset),
            }
        }

        fn write(&self, offset: usize, value: u32) {
            match offset {
                AUX_MU_IO => self.tx.lock().unwrap().push(value as u8),
                _ => self.regs.write(offset, value),
            }
        }
    }

    fn simulator(bank: Arc<dyn RegisterBank>) -> (Simulator, HardwareVariant) {
        let variant = HardwareVariant::bcm2711();
        (Simulator::new().with_bank(variant.uart_base, bank), variant)
    }

    #[test]
    fn test_baud_divisor() {
        assert_eq!(compute_baud_divisor(250_000_000, 115_200).unwrap(), 270);
        assert_eq!(compute_baud_divisor(250_000_000, 9_600).unwrap(), 3254);
        assert!(matches!(
            compute_baud_divisor(250_000_000, 0),
            Err(UartError::InvalidBaudRate(0))
        ));
        // Ratio of zero would need a divisor of -1
        assert!(compute_baud_divisor(250_000_000, 40_000_000).is_err());
        // Ratio above 65536 does not fit the register
        assert!(compute_baud_divisor(250_000_000, 300).is_err());
    }

    #[test]
    fn test_bring_up_sequence() {
        let bank = Arc::new(MemoryBank::new(PAGE_SIZE));
        // SPI1 and SPI2 already enabled
        bank.poke(AUX_ENABLES, 0b110);
        let (sim, variant) = simulator(bank.clone());

        let uart = MiniUart::open(&sim, &variant, 115_200).unwrap();

        assert_eq!(
            bank.writes(),
            vec![
                (AUX_ENABLES, 0b111),
                (AUX_MU_LCR, 0x3),
                (AUX_MU_IER, 0),
                (AUX_MU_IIR, 0xC6),
                (AUX_MU_BAUD, 270),
                (AUX_MU_CNTL, 0x3),
            ]
        );
        assert_eq!(uart.baud_divisor(), 270);
        assert_eq!(uart.baud_rate(), 115_313);
    }

    #[test]
    fn test_seven_bit_frames() {
        let bank = Arc::new(MemoryBank::new(PAGE_SIZE));
        let (sim, variant) = simulator(bank.clone());
        let config = UartConfig {
            baudrate: 9_600,
            data_bits: DataBits::Seven,
        };

        MiniUart::open_with_config(&sim, &variant, &config).unwrap();
        assert_eq!(bank.writes_to(AUX_MU_LCR), vec![0]);
    }

    #[test]
    fn test_invalid_baud_never_maps() {
        let sim = Simulator::unavailable();
        let variant = HardwareVariant::bcm2711();
        assert!(matches!(
            MiniUart::open(&sim, &variant, 0),
            Err(UartError::InvalidBaudRate(0))
        ));
    }

    #[test]
    fn test_send_and_receive() {
        let model = Arc::new(UartModel::new(b"ok"));
        let (sim, variant) = simulator(model.clone());
        let mut uart = MiniUart::open(&sim, &variant, 115_200).unwrap();

        uart.write_all(b"AT\r").unwrap();
        uart.flush().unwrap();
        assert_eq!(model.sent(), b"AT\r");

        assert_eq!(uart.receive().unwrap(), b'o');
        assert_eq!(uart.receive().unwrap(), b'k');
    }

    #[test]
    fn test_receive_times_out() {
        let bank = Arc::new(MemoryBank::new(PAGE_SIZE));
        let mut variant = HardwareVariant::bcm2711();
        variant.uart_receive_poll_limit = 50;
        let sim = Simulator::new().with_bank(variant.uart_base, bank);

        let mut uart = MiniUart::open(&sim, &variant, 115_200).unwrap();
        assert!(matches!(uart.receive(), Err(UartError::ReceiveTimeout)));
    }

    #[test]
    fn test_bounded_send_times_out() {
        let model = Arc::new(UartModel::new(&[]));
        model.tx_ready.store(false, Ordering::SeqCst);
        let (sim, variant) = simulator(model.clone());

        let mut uart = MiniUart::open(&sim, &variant, 115_200).unwrap();
        uart.set_transmit_poll(PollPolicy::bounded(10));
        assert!(matches!(uart.send(b'x'), Err(UartError::SendTimeout)));
        assert!(model.sent().is_empty());
    }

    #[test]
    fn test_read_takes_buffered_bytes() {
        let model = Arc::new(UartModel::new(b"hello"));
        let (sim, variant) = simulator(model);
        let mut uart = MiniUart::open(&sim, &variant, 115_200).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(uart.read_into(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");

        let mut buf = [0u8; 8];
        assert_eq!(embedded_io::Read::read(&mut uart, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");

        assert_eq!(uart.read_into(&mut []).unwrap(), 0);
    }

    #[test]
    fn test_hal_traits() {
        use pimmio_hal::{UartRx, UartTx};

        let model = Arc::new(UartModel::new(b"xy"));
        let (sim, variant) = simulator(model.clone());
        let mut uart = MiniUart::open(&sim, &variant, 115_200).unwrap();

        uart.write_blocking(b"hi").unwrap();
        embedded_io::Write::write_all(&mut uart, b"!").unwrap();
        assert_eq!(model.sent(), b"hi!");

        let mut buf = [0u8; 2];
        assert_eq!(uart.read_blocking(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"xy");
    }

    #[test]
    fn test_window_released_on_drop() {
        let (sim, variant) = simulator(Arc::new(UartModel::new(&[])));
        for _ in 0..10 {
            let mut uart = MiniUart::open(&sim, &variant, 115_200).unwrap();
            uart.send(b'.').unwrap();
        }
        assert_eq!(sim.live(), 0);
    }
}
