//! In-memory register banks for exercising drivers without hardware
//!
//! A [`Simulator`] is a [`Mapper`] that hands out windows backed by
//! [`RegisterBank`] implementations instead of physical memory. Plain
//! storage is available as [`MemoryBank`]; peripheral behaviour (status
//! bits that change on their own, write-one-to-clear registers, FIFOs) is
//! modelled by implementing [`RegisterBank`] directly.
//!
//! The simulator counts every map and unmap so leaks show up as a
//! non-zero [`Simulator::live`] count.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::MapError;
use crate::mmio::{check_region, Mapper, RegisterWindow};

/// Register storage behind a simulated window
///
/// Offsets are byte offsets into the window, always word aligned.
pub trait RegisterBank: Send + Sync {
    /// Value returned by a register read
    fn read(&self, offset: usize) -> u32;

    /// Effect of a register write
    fn write(&self, offset: usize, value: u32);
}

/// Plain word storage that also journals writes
#[derive(Debug)]
pub struct MemoryBank {
    words: Vec<AtomicU32>,
    journal: Mutex<Vec<(usize, u32)>>,
}

impl MemoryBank {
    /// Zero-filled bank of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            words: (0..size / 4).map(|_| AtomicU32::new(0)).collect(),
            journal: Mutex::new(Vec::new()),
        }
    }

    /// Current value without going through a window
    pub fn peek(&self, offset: usize) -> u32 {
        self.words[offset / 4].load(Ordering::SeqCst)
    }

    /// Set a value without journaling it
    pub fn poke(&self, offset: usize, value: u32) {
        self.words[offset / 4].store(value, Ordering::SeqCst);
    }

    /// Every write made through a window, in order
    pub fn writes(&self) -> Vec<(usize, u32)> {
        self.journal.lock().map(|j| j.clone()).unwrap_or_default()
    }

    /// Writes made to one register, in order
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.writes()
            .into_iter()
            .filter(|&(o, _)| o == offset)
            .map(|(_, v)| v)
            .collect()
    }
}

impl RegisterBank for MemoryBank {
    fn read(&self, offset: usize) -> u32 {
        self.peek(offset)
    }

    fn write(&self, offset: usize, value: u32) {
        self.poke(offset, value);
        if let Ok(mut journal) = self.journal.lock() {
            journal.push((offset, value));
        }
    }
}

/// Map/unmap counters shared between a simulator and its windows
#[derive(Debug, Default)]
pub struct MapLedger {
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

impl MapLedger {
    pub(crate) fn record_map(&self) {
        self.maps.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_unmap(&self) {
        self.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mapper over simulated register banks
pub struct Simulator {
    banks: HashMap<u64, Arc<dyn RegisterBank>>,
    ledger: Arc<MapLedger>,
    device_available: bool,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    /// Simulator with no banks; every map fails until banks are added
    pub fn new() -> Self {
        Self {
            banks: HashMap::new(),
            ledger: Arc::new(MapLedger::default()),
            device_available: true,
        }
    }

    /// Simulator whose memory device cannot be opened
    pub fn unavailable() -> Self {
        Self {
            device_available: false,
            ..Self::new()
        }
    }

    /// Serve windows at `phys_base` from `bank`
    pub fn with_bank(mut self, phys_base: u64, bank: Arc<dyn RegisterBank>) -> Self {
        self.banks.insert(phys_base, bank);
        self
    }

    /// Successful maps so far
    pub fn maps(&self) -> usize {
        self.ledger.maps.load(Ordering::SeqCst)
    }

    /// Unmaps so far
    pub fn unmaps(&self) -> usize {
        self.ledger.unmaps.load(Ordering::SeqCst)
    }

    /// Windows currently mapped
    pub fn live(&self) -> usize {
        self.maps() - self.unmaps()
    }
}

impl Mapper for Simulator {
    fn map(&self, phys_base: u64, size: usize) -> Result<RegisterWindow, MapError> {
        check_region(phys_base, size)?;

        if !self.device_available {
            return Err(MapError::DeviceUnavailable {
                path: PathBuf::from("<simulator>"),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "device disabled"),
            });
        }

        let bank = self
            .banks
            .get(&phys_base)
            .cloned()
            .ok_or_else(|| MapError::MappingFailed {
                phys_base,
                size,
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no simulated bank"),
            })?;

        self.ledger.record_map();
        Ok(RegisterWindow::simulated(
            phys_base,
            size,
            bank,
            Arc::clone(&self.ledger),
        ))
    }
}
