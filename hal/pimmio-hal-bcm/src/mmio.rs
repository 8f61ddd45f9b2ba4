//! Register windows over physical peripheral memory
//!
//! A [`Mapper`] turns a physical base address into a [`RegisterWindow`]:
//! a fixed-size, word-addressed view of a peripheral's registers. The
//! production mapper is [`DevMem`], which maps the range through
//! `/dev/mem`; tests use [`crate::sim::Simulator`] instead.
//!
//! # Lifecycle
//!
//! ```text
//! Mapper::map ──▶ RegisterWindow ──▶ read / write / modify ──▶ close (or drop)
//! ```
//!
//! The device file is only held for the duration of the `mmap` call. The
//! window owns the mapping until [`RegisterWindow::close`] runs, which is
//! idempotent and also runs on drop.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::mem;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use log::{debug, warn};

use crate::error::MapError;
use crate::sim::{MapLedger, RegisterBank};

/// Platform page size; windows are whole pages
pub const PAGE_SIZE: usize = 4096;

/// Default privileged memory device
pub const DEV_MEM: &str = "/dev/mem";

/// Source of register windows
pub trait Mapper {
    /// Map `size` bytes of physical memory starting at `phys_base`
    fn map(&self, phys_base: u64, size: usize) -> Result<RegisterWindow, MapError>;
}

impl<M: Mapper + ?Sized> Mapper for &M {
    fn map(&self, phys_base: u64, size: usize) -> Result<RegisterWindow, MapError> {
        (**self).map(phys_base, size)
    }
}

/// Check that a region is a positive number of whole, aligned pages
pub fn check_region(phys_base: u64, size: usize) -> Result<(), MapError> {
    if size == 0 || size % PAGE_SIZE != 0 || phys_base % PAGE_SIZE as u64 != 0 {
        return Err(MapError::InvalidRegion { phys_base, size });
    }
    Ok(())
}

/// Maps physical memory through a memory device file
///
/// Opening `/dev/mem` needs root (or `CAP_SYS_RAWIO`) and a kernel that
/// does not restrict access to the peripheral range.
#[derive(Debug, Clone)]
pub struct DevMem {
    path: PathBuf,
}

impl Default for DevMem {
    fn default() -> Self {
        Self::new(DEV_MEM)
    }
}

impl DevMem {
    /// Use a specific device file (e.g. `/dev/gpiomem` for GPIO only)
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Device file this mapper opens
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_device(&self) -> Result<File, MapError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(&self.path)
            .map_err(|source| MapError::DeviceUnavailable {
                path: self.path.clone(),
                source,
            })
    }
}

impl Mapper for DevMem {
    fn map(&self, phys_base: u64, size: usize) -> Result<RegisterWindow, MapError> {
        check_region(phys_base, size)?;

        let offset = libc::off_t::try_from(phys_base).map_err(|_| MapError::MappingFailed {
            phys_base,
            size,
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "physical address does not fit the platform file offset",
            ),
        })?;

        let device = self.open_device()?;

        // SAFETY: a fresh shared mapping of an open descriptor; the kernel
        // picks the address and validates the range.
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                device.as_raw_fd(),
                offset,
            )
        };
        let mapped = if addr == libc::MAP_FAILED {
            Err(io::Error::last_os_error())
        } else {
            NonNull::new(addr.cast::<u32>())
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
        };

        // The mapping outlives the descriptor
        drop(device);

        let base = mapped.map_err(|source| MapError::MappingFailed {
            phys_base,
            size,
            source,
        })?;

        debug!(
            "mapped {:#x} bytes at {:#010x} via {}",
            size,
            phys_base,
            self.path.display()
        );
        Ok(RegisterWindow {
            phys_base,
            size,
            backing: Backing::Device(base),
        })
    }
}

enum Backing {
    Unmapped,
    Device(NonNull<u32>),
    Bank {
        bank: Arc<dyn RegisterBank>,
        ledger: Arc<MapLedger>,
    },
}

/// Word-addressed view of one peripheral register block
///
/// Offsets are byte offsets as listed in the peripheral datasheet. They
/// must be word aligned and inside the window; anything else is a driver
/// bug and panics. Accessing a closed window panics as well.
pub struct RegisterWindow {
    phys_base: u64,
    size: usize,
    backing: Backing,
}

// SAFETY: the mapping is owned by exactly one window and only reached
// through it; simulated banks are `Send + Sync` themselves.
unsafe impl Send for RegisterWindow {}

impl RegisterWindow {
    pub(crate) fn simulated(
        phys_base: u64,
        size: usize,
        bank: Arc<dyn RegisterBank>,
        ledger: Arc<MapLedger>,
    ) -> Self {
        Self {
            phys_base,
            size,
            backing: Backing::Bank { bank, ledger },
        }
    }

    /// Physical address of the first register
    pub fn phys_base(&self) -> u64 {
        self.phys_base
    }

    /// Window size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the window still holds its mapping
    pub fn is_mapped(&self) -> bool {
        !matches!(self.backing, Backing::Unmapped)
    }

    /// Read the 32-bit register at byte `offset`
    pub fn read(&self, offset: usize) -> u32 {
        let index = self.index(offset);
        match &self.backing {
            Backing::Device(base) => {
                // SAFETY: `index` is inside the live mapping (checked above)
                let value = unsafe { ptr::read_volatile(base.as_ptr().add(index)) };
                fence(Ordering::SeqCst);
                value
            }
            Backing::Bank { bank, .. } => bank.read(offset),
            Backing::Unmapped => panic!("read of register {offset:#x} on an unmapped window"),
        }
    }

    /// Write the 32-bit register at byte `offset`
    pub fn write(&self, offset: usize, value: u32) {
        let index = self.index(offset);
        match &self.backing {
            Backing::Device(base) => {
                fence(Ordering::SeqCst);
                // SAFETY: `index` is inside the live mapping (checked above)
                unsafe { ptr::write_volatile(base.as_ptr().add(index), value) };
            }
            Backing::Bank { bank, .. } => bank.write(offset, value),
            Backing::Unmapped => panic!("write of register {offset:#x} on an unmapped window"),
        }
    }

    /// Read-modify-write the register at byte `offset`
    pub fn modify(&self, offset: usize, f: impl FnOnce(u32) -> u32) {
        let value = self.read(offset);
        self.write(offset, f(value));
    }

    /// Release the mapping
    ///
    /// Safe to call any number of times; later calls do nothing.
    pub fn close(&mut self) {
        match mem::replace(&mut self.backing, Backing::Unmapped) {
            Backing::Unmapped => {}
            Backing::Device(base) => {
                // SAFETY: base and size describe a mapping made by `DevMem`
                // that has not been unmapped; the backing is now `Unmapped`
                // so this runs once.
                let rc = unsafe { libc::munmap(base.as_ptr().cast(), self.size) };
                if rc == 0 {
                    debug!("unmapped {:#010x}", self.phys_base);
                } else {
                    warn!(
                        "munmap of {:#010x} failed: {}",
                        self.phys_base,
                        io::Error::last_os_error()
                    );
                }
            }
            Backing::Bank { ledger, .. } => {
                ledger.record_unmap();
                debug!("released simulated window {:#010x}", self.phys_base);
            }
        }
    }

    fn index(&self, offset: usize) -> usize {
        assert!(
            offset % 4 == 0 && offset < self.size,
            "register offset {offset:#x} outside {:#x}-byte window",
            self.size
        );
        offset / 4
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for RegisterWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = match self.backing {
            Backing::Unmapped => "unmapped",
            Backing::Device(_) => "device",
            Backing::Bank { .. } => "simulated",
        };
        f.debug_struct("RegisterWindow")
            .field("phys_base", &format_args!("{:#010x}", self.phys_base))
            .field("size", &self.size)
            .field("backing", &backing)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{MemoryBank, Simulator};
    use std::io::{Read, Seek, SeekFrom, Write};

    #[test]
    fn test_region_checks() {
        assert!(check_region(0xFE20_0000, 4096).is_ok());
        assert!(check_region(0xFE20_0000, 8192).is_ok());
        assert!(matches!(
            check_region(0xFE20_0004, 4096),
            Err(MapError::InvalidRegion { .. })
        ));
        assert!(check_region(0xFE20_0000, 0).is_err());
        assert!(check_region(0xFE20_0000, 100).is_err());
    }

    #[test]
    fn test_missing_device() {
        let mem = DevMem::new("/nonexistent/pimmio-mem");
        let err = mem.map(0, PAGE_SIZE).unwrap_err();
        match err {
            MapError::DeviceUnavailable { path, .. } => {
                assert_eq!(path, Path::new("/nonexistent/pimmio-mem"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_region_checked_before_open() {
        let mem = DevMem::new("/nonexistent/pimmio-mem");
        assert!(matches!(
            mem.map(0x10, PAGE_SIZE),
            Err(MapError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_devmem_maps_file() {
        let named = tempfile::NamedTempFile::new().unwrap();
        named.as_file().set_len(2 * PAGE_SIZE as u64).unwrap();
        let mut handle = named.reopen().unwrap();
        handle.seek(SeekFrom::Start(PAGE_SIZE as u64 + 8)).unwrap();
        handle.write_all(&0xDEAD_BEEFu32.to_ne_bytes()).unwrap();
        handle.flush().unwrap();

        let mem = DevMem::new(named.path());
        let mut window = mem.map(PAGE_SIZE as u64, PAGE_SIZE).unwrap();
        assert!(window.is_mapped());
        assert_eq!(window.read(8), 0xDEAD_BEEF);

        window.write(0x1C, 0x0002_0000);
        window.modify(0x1C, |v| v | 1);
        assert_eq!(window.read(0x1C), 0x0002_0001);

        window.close();
        assert!(!window.is_mapped());
        window.close();

        // Shared mapping: the store reached the file
        let mut bytes = [0u8; 4];
        handle.seek(SeekFrom::Start(PAGE_SIZE as u64 + 0x1C)).unwrap();
        handle.read_exact(&mut bytes).unwrap();
        assert_eq!(u32::from_ne_bytes(bytes), 0x0002_0001);
    }

    #[test]
    fn test_close_is_idempotent() {
        let sim = Simulator::new().with_bank(0x1000, Arc::new(MemoryBank::new(PAGE_SIZE)));

        let mut window = sim.map(0x1000, PAGE_SIZE).unwrap();
        window.close();
        window.close();
        drop(window);

        assert_eq!(sim.maps(), 1);
        assert_eq!(sim.unmaps(), 1);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_out_of_window_access_panics() {
        let sim = Simulator::new().with_bank(0x1000, Arc::new(MemoryBank::new(PAGE_SIZE)));
        let window = sim.map(0x1000, PAGE_SIZE).unwrap();
        window.read(PAGE_SIZE);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_offset_near_usize_max_panics() {
        let sim = Simulator::new().with_bank(0x1000, Arc::new(MemoryBank::new(PAGE_SIZE)));
        let window = sim.map(0x1000, PAGE_SIZE).unwrap();
        window.read(usize::MAX - 3);
    }

    #[test]
    fn test_device_refusing_mmap() {
        // /dev/null opens read-write but has no mmap support (ENODEV)
        let mem = DevMem::new("/dev/null");
        match mem.map(0, PAGE_SIZE) {
            Err(MapError::MappingFailed {
                phys_base, size, ..
            }) => {
                assert_eq!(phys_base, 0);
                assert_eq!(size, PAGE_SIZE);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "unmapped")]
    fn test_closed_window_access_panics() {
        let sim = Simulator::new().with_bank(0x1000, Arc::new(MemoryBank::new(PAGE_SIZE)));
        let mut window = sim.map(0x1000, PAGE_SIZE).unwrap();
        window.close();
        window.write(0, 1);
    }

    #[test]
    fn test_window_debug() {
        let sim = Simulator::new().with_bank(0x2000, Arc::new(MemoryBank::new(PAGE_SIZE)));
        let window = sim.map(0x2000, PAGE_SIZE).unwrap();
        let text = format!("{window:?}");
        assert!(text.contains("0x00002000"));
        assert!(text.contains("simulated"));
    }
}
