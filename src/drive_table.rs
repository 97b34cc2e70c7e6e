use std::path::Path;

use log::{debug, info};

use crate::disk::{Disk, DiskError, MAX_SECTOR_SIZE, RECORD_SIZE};

pub const MAX_DRIVES: usize = 16;

pub type Record = [u8; RECORD_SIZE];

pub fn drive_letter(drive: usize) -> char {
    (b'A' + drive as u8) as char
}

/// Drives A: to P:. Records are addressed through the cursor of the
/// selected disk.
pub struct DriveTable {
    drives: [Option<Disk>; MAX_DRIVES],
    current: usize,
    pub trace: bool,
}

impl DriveTable {
    pub fn new(trace: bool) -> DriveTable {
        DriveTable {
            drives: Default::default(),
            current: 0,
            trace,
        }
    }

    /// Open an image and detect its format. On failure the slot is left
    /// empty.
    pub fn mount<P: AsRef<Path>>(
        &mut self,
        drive: usize,
        path: P,
        read_only: bool,
    ) -> Result<(), DiskError> {
        if drive >= MAX_DRIVES {
            return Err(DiskError::NotMounted);
        }
        self.drives[drive] = None;
        let disk = Disk::open(path, read_only)?;
        info!("Mounted {} as drive {}:", disk.info(), drive_letter(drive));
        self.drives[drive] = Some(disk);
        Ok(())
    }

    pub fn unmount(&mut self, drive: usize) {
        if let Some(slot) = self.drives.get_mut(drive) {
            if slot.take().is_some() {
                info!("Unmounted drive {}:", drive_letter(drive));
            }
        }
    }

    pub fn get(&self, drive: usize) -> Option<&Disk> {
        self.drives.get(drive).and_then(|d| d.as_ref())
    }

    pub fn get_mut(&mut self, drive: usize) -> Option<&mut Disk> {
        self.drives.get_mut(drive).and_then(|d| d.as_mut())
    }

    /// Select a drive. Fails, keeping the current selection, if the drive is
    /// out of range or empty.
    pub fn select(&mut self, drive: usize) -> bool {
        if self.get(drive).is_none() {
            return false;
        }
        self.current = drive;
        true
    }

    pub fn current_drive(&self) -> usize {
        self.current
    }

    pub fn set_track(&mut self, track: u16) {
        if let Some(disk) = self.get_mut(self.current) {
            disk.set_track(track);
        }
    }

    pub fn set_sector(&mut self, sector: u16) {
        if let Some(disk) = self.get_mut(self.current) {
            disk.set_sector(sector);
        }
    }

    /// Read the record at the cursor of the selected disk.
    pub fn read(&mut self) -> Result<Record, DiskError> {
        let trace = self.trace;
        let disk = self.get_mut(self.current).ok_or(DiskError::NotMounted)?;
        let (logical, track) = (disk.sector(), disk.track());
        let (physical, offset) = locate(disk, logical, track);

        let mut buffer = [0u8; MAX_SECTOR_SIZE];
        disk.set_sector(physical);
        let result = disk.read_sector(&mut buffer);
        disk.set_sector(logical);
        result?;

        if trace {
            debug!(
                "DISK read t={} s={} -> phys {} +{}",
                track, logical, physical, offset
            );
        }
        let mut record = [0u8; RECORD_SIZE];
        record.copy_from_slice(&buffer[offset..offset + RECORD_SIZE]);
        Ok(record)
    }

    /// Write the record at the cursor of the selected disk. The enclosing
    /// physical sector is read, patched and written back.
    pub fn write(&mut self, record: &Record) -> Result<(), DiskError> {
        let trace = self.trace;
        let disk = self.get_mut(self.current).ok_or(DiskError::NotMounted)?;
        if disk.is_read_only() {
            return Err(DiskError::ReadOnly);
        }
        let (logical, track) = (disk.sector(), disk.track());
        let (physical, offset) = locate(disk, logical, track);

        let mut buffer = [0u8; MAX_SECTOR_SIZE];
        disk.set_sector(physical);
        let result = disk.read_sector(&mut buffer).and_then(|_| {
            buffer[offset..offset + RECORD_SIZE].copy_from_slice(record);
            disk.write_sector(&buffer)
        });
        disk.set_sector(logical);

        if trace {
            debug!(
                "DISK write t={} s={} -> phys {} +{}",
                track, logical, physical, offset
            );
        }
        result
    }
}

/// Physical sector and byte offset holding a logical record.
fn locate(disk: &Disk, logical: u16, track: u16) -> (u16, usize) {
    let translated = disk.format.translate(logical, track);
    let records_per_sector = (disk.sector_size() / RECORD_SIZE) as u16;
    let physical = translated / records_per_sector;
    let offset = (translated % records_per_sector) as usize * RECORD_SIZE;
    (physical, offset)
}
