use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use thiserror::Error;

/*
Notes on the disk images as seen by different components:

BDOS and XIOS entrypoints:
    Tracks are numbered from 0. Logical sectors (records) are numbered
    from 0 and are always 128 bytes.

File images:
    Physical sectors stored track after track, sector 0 first, with no
    header. A physical sector holds sector_size/128 records.

8" SSSD images are stored in physical order. Records on the data tracks
are interleaved with a skew of 6; the two reserved tracks are not.
hd1k and hd512 images have no skew.
*/

pub const RECORD_SIZE: usize = 128;
pub const MAX_SECTOR_SIZE: usize = 1024;
/// Value returned for bytes that are not present in the image file.
pub const ERASED_BYTE: u8 = 0xE5;

const HD1K_IMAGE_SIZE: u64 = 8_388_608;
const HD512_IMAGE_SIZE: u64 = 8_519_680;
const SSSD_IMAGE_SIZE: u64 = 256_256;
const LARGE_IMAGE_THRESHOLD: u64 = 8_000_000;

const SSSD_SECTORS: u16 = 26;
const SSSD_SKEW: u16 = 6;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("drive not mounted")]
    NotMounted,
    #[error("disk is read-only")]
    ReadOnly,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Disk Parameter Block, as the BDOS sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskParameterBlock {
    pub spt: u16, // 128 byte records per track
    pub bsh: u8,
    pub blm: u8,
    pub exm: u8,
    pub dsm: u16, // blocks - 1
    pub drm: u16, // directory entries - 1
    pub al0: u8,
    pub al1: u8,
    pub cks: u16,
    pub off: u16, // reserved tracks
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DiskFormat {
    /// 8" single-sided single-density: 77 tracks, 26 sectors of 128 bytes
    Sssd8,
    /// RomWBW hd1k: 1024 tracks, 16 sectors of 512 bytes (8MB)
    Hd1k,
    /// RomWBW hd512: 1040 tracks, 16 sectors of 512 bytes
    Hd512,
}

impl DiskFormat {
    pub fn detect(len: u64) -> DiskFormat {
        if len == HD1K_IMAGE_SIZE {
            DiskFormat::Hd1k
        } else if len == HD512_IMAGE_SIZE {
            DiskFormat::Hd512
        } else if len <= SSSD_IMAGE_SIZE {
            DiskFormat::Sssd8
        } else if len >= LARGE_IMAGE_THRESHOLD {
            DiskFormat::Hd1k
        } else {
            DiskFormat::Sssd8
        }
    }

    pub fn sectors_per_track(&self) -> u16 {
        match self {
            DiskFormat::Sssd8 => SSSD_SECTORS,
            DiskFormat::Hd1k => 16,
            DiskFormat::Hd512 => 16,
        }
    }

    pub fn tracks(&self) -> u16 {
        match self {
            DiskFormat::Sssd8 => 77,
            DiskFormat::Hd1k => 1024,
            DiskFormat::Hd512 => 1040,
        }
    }

    pub fn sector_size(&self) -> usize {
        match self {
            DiskFormat::Sssd8 => 128,
            DiskFormat::Hd1k => 512,
            DiskFormat::Hd512 => 512,
        }
    }

    pub fn dpb(&self) -> DiskParameterBlock {
        match self {
            DiskFormat::Sssd8 => DiskParameterBlock {
                spt: 26,
                bsh: 3, // 1K blocks
                blm: 7,
                exm: 0,
                dsm: 242,
                drm: 63,
                al0: 0xC0,
                al1: 0x00,
                cks: 16,
                off: 2,
            },
            DiskFormat::Hd1k => DiskParameterBlock {
                spt: 64,
                bsh: 5, // 4K blocks
                blm: 31,
                exm: 1,
                dsm: 2039,
                drm: 1023,
                al0: 0xFF,
                al1: 0x00,
                cks: 0,
                off: 2,
            },
            DiskFormat::Hd512 => DiskParameterBlock {
                spt: 64,
                bsh: 5,
                blm: 31,
                exm: 1,
                dsm: 2047,
                drm: 511,
                al0: 0xFF,
                al1: 0x00,
                cks: 0,
                off: 16,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiskFormat::Sssd8 => "8\" SSSD",
            DiskFormat::Hd1k => "hd1k (8MB)",
            DiskFormat::Hd512 => "hd512",
        }
    }

    /// Map a logical record number to its position in physical record
    /// order. Only the data tracks of the SSSD format are skewed.
    pub fn translate(&self, logical: u16, track: u16) -> u16 {
        match self {
            DiskFormat::Sssd8 if track >= self.dpb().off && logical < SSSD_SECTORS => {
                sssd_skew()[logical as usize] as u16
            }
            _ => logical,
        }
    }
}

fn sssd_skew() -> &'static [u8] {
    static TABLE: OnceLock<Vec<u8>> = OnceLock::new();
    TABLE.get_or_init(|| skew_table(SSSD_SECTORS, SSSD_SKEW))
}

/// Build a 0-based interleave table the way DISKDEF does: step by `skew`
/// and move to the next free slot on a collision.
pub fn skew_table(sectors: u16, skew: u16) -> Vec<u8> {
    let n = sectors as usize;
    let mut used = vec![false; n];
    let mut table = Vec::with_capacity(n);
    let mut next = 0usize;
    for _ in 0..n {
        while used[next] {
            next = (next + 1) % n;
        }
        used[next] = true;
        table.push(next as u8);
        next = (next + skew as usize) % n;
    }
    table
}

#[cfg(test)]
pub fn inverse_table(table: &[u8]) -> Vec<u8> {
    let mut inverse = vec![0u8; table.len()];
    for (logical, &physical) in table.iter().enumerate() {
        inverse[physical as usize] = logical as u8;
    }
    inverse
}

/// One mounted drive.
pub struct Disk {
    file: File,
    pub path: PathBuf,
    read_only: bool,
    pub format: DiskFormat,
    track: u16,
    sector: u16,
}

impl Disk {
    /// Open an image, writable if possible, read-only otherwise.
    pub fn open<P: AsRef<Path>>(path: P, read_only: bool) -> Result<Disk, DiskError> {
        let path = path.as_ref();
        let (file, read_only) = if read_only {
            (OpenOptions::new().read(true).open(path)?, true)
        } else {
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => (file, false),
                Err(_) => (OpenOptions::new().read(true).open(path)?, true),
            }
        };

        let len = file.metadata()?.len();
        Ok(Disk {
            file,
            path: path.to_owned(),
            read_only,
            format: DiskFormat::detect(len),
            track: 0,
            sector: 0,
        })
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn dpb(&self) -> DiskParameterBlock {
        self.format.dpb()
    }

    pub fn sector_size(&self) -> usize {
        self.format.sector_size()
    }

    pub fn set_track(&mut self, track: u16) {
        self.track = track;
    }

    pub fn set_sector(&mut self, sector: u16) {
        self.sector = sector;
    }

    pub fn track(&self) -> u16 {
        self.track
    }

    pub fn sector(&self) -> u16 {
        self.sector
    }

    fn sector_offset(&self) -> u64 {
        (self.track as u64 * self.format.sectors_per_track() as u64 + self.sector as u64)
            * self.sector_size() as u64
    }

    /// Read the physical sector under the cursor. Bytes past the end of the
    /// file read as ERASED_BYTE.
    pub fn read_sector(&mut self, buffer: &mut [u8]) -> Result<(), DiskError> {
        let size = self.sector_size();
        let buffer = &mut buffer[..size];
        self.file.seek(SeekFrom::Start(self.sector_offset()))?;

        let mut filled = 0;
        while filled < size {
            match self.file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        buffer[filled..].fill(ERASED_BYTE);
        Ok(())
    }

    pub fn write_sector(&mut self, buffer: &[u8]) -> Result<(), DiskError> {
        if self.read_only {
            return Err(DiskError::ReadOnly);
        }
        let size = self.sector_size();
        self.file.seek(SeekFrom::Start(self.sector_offset()))?;
        self.file.write_all(&buffer[..size])?;
        self.file.flush()?;
        Ok(())
    }

    pub fn info(&self) -> String {
        format!(
            "{} [{}, {} tracks{}]",
            self.path.display(),
            self.format.name(),
            self.format.tracks(),
            if self.read_only { ", read-only" } else { "" }
        )
    }
}
