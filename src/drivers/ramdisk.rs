//! RAM-backed block device
//!
//! Emulates one or more drives as sector arrays in heap memory. Failed
//! transfers can be injected to exercise I/O error paths.

use alloc::vec;
use alloc::vec::Vec;

use crate::platform::{BlockDevice, IoError, Sector, SECTOR_SIZE};

/// A set of RAM drives with a fixed number of sectors each.
pub struct RamDisk {
    drives: Vec<Vec<u8>>,
    sectors: u64,
    /// Sector whose next access fails, if any.
    fail_at: Option<u64>,
    reads: u64,
    writes: u64,
}

impl RamDisk {
    /// `drives` drives of `sectors` zeroed sectors each.
    pub fn new(drives: usize, sectors: u64) -> Self {
        let bytes = sectors as usize * SECTOR_SIZE;
        Self {
            drives: (0..drives).map(|_| vec![0; bytes]).collect(),
            sectors,
            fail_at: None,
            reads: 0,
            writes: 0,
        }
    }

    /// Make any transfer touching `lba` fail with a device error.
    pub fn fail_at(&mut self, lba: Option<u64>) {
        self.fail_at = lba;
    }

    /// Sectors read so far.
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Sectors written so far.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Raw bytes of a drive.
    pub fn drive(&self, drive: u8) -> Option<&[u8]> {
        self.drives.get(drive as usize).map(Vec::as_slice)
    }

    /// Mutable raw bytes of a drive (for corruption tests).
    pub fn drive_mut(&mut self, drive: u8) -> Option<&mut [u8]> {
        self.drives.get_mut(drive as usize).map(Vec::as_mut_slice)
    }

    fn locate(&mut self, drive: u8, lba: u64) -> Result<&mut [u8], IoError> {
        if self.fail_at == Some(lba) {
            return Err(IoError::Device);
        }
        if lba >= self.sectors {
            return Err(IoError::OutOfRange);
        }
        let data = self
            .drives
            .get_mut(drive as usize)
            .ok_or(IoError::NoDevice)?;
        let start = lba as usize * SECTOR_SIZE;
        Ok(&mut data[start..start + SECTOR_SIZE])
    }
}

impl BlockDevice for RamDisk {
    fn read_sector(&mut self, drive: u8, lba: u64, buf: &mut Sector) -> Result<(), IoError> {
        buf.copy_from_slice(self.locate(drive, lba)?);
        self.reads += 1;
        Ok(())
    }

    fn write_sector(&mut self, drive: u8, lba: u64, buf: &Sector) -> Result<(), IoError> {
        self.locate(drive, lba)?.copy_from_slice(buf);
        self.writes += 1;
        Ok(())
    }
}
