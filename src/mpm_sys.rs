use std::fs;
use std::path::Path;

use log::info;

use crate::banked_memory::COMMON_BASE;
use crate::cpu::GuestCpu;
use crate::disk::RECORD_SIZE;
use crate::error::EmuError;
use crate::session::Session;

/*
MPM.SYS layout, as written by GENSYS:

    records 0-1:  SYSTEM.DAT (256 bytes)
    records 2-:   the system SPR files, top of memory first

The loader copies the records downward from the top of memory, puts
SYSTEM.DAT on its page at mem_top*256 and jumps to the XDOS. That is what
MPMLDR does, without the file system.
*/

const SYSDAT_SIZE: usize = 256;
const MEMORY_SEGMENTS: usize = 8;

mod offset {
    pub const MEM_TOP: usize = 0;
    pub const NMB_CNS: usize = 1;
    pub const BRKPT_RST: usize = 2;
    pub const BANK_SWITCHED: usize = 4;
    pub const Z80: usize = 5;
    pub const XIOS_JMP_TBL: usize = 7;
    pub const RESBDOS: usize = 8;
    pub const XDOS: usize = 11;
    pub const RSP: usize = 12;
    pub const BNKXIOS: usize = 13;
    pub const BNKBDOS: usize = 14;
    pub const NMB_MEM_SEG: usize = 15;
    pub const MEM_SEG_TBL: usize = 16;
    pub const NMB_RECORDS: usize = 120;
    pub const TICKS_PER_SEC: usize = 122;
    pub const SYSTEM_DRIVE: usize = 123;
    pub const COMMON_BASE: usize = 124;
    pub const BNKXDOS: usize = 242;
    pub const TMP: usize = 247;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySegment {
    pub base: u8,
    pub size: u8,
    pub attributes: u8,
    pub bank: u8,
}

/// The fields of SYSTEM.DAT the loader needs. Addresses are page numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemData {
    pub mem_top: u8,
    pub consoles: u8,
    pub breakpoint_rst: u8,
    pub bank_switched: bool,
    pub z80: bool,
    pub xios_jump_table: u8,
    pub resbdos: u8,
    pub xdos: u8,
    pub rsp: u8,
    pub bnkxios: u8,
    pub bnkbdos: u8,
    pub segments: Vec<MemorySegment>,
    pub records: u16,
    pub ticks_per_second: u8,
    pub system_drive: u8,
    pub common_base: u8,
    pub bnkxdos: u8,
    pub tmp: u8,
}

impl SystemData {
    pub fn parse(sysdat: &[u8; SYSDAT_SIZE]) -> SystemData {
        let segment_count = (sysdat[offset::NMB_MEM_SEG] as usize).min(MEMORY_SEGMENTS);
        let segments = (0..segment_count)
            .map(|i| {
                let entry = &sysdat[offset::MEM_SEG_TBL + i * 4..];
                MemorySegment {
                    base: entry[0],
                    size: entry[1],
                    attributes: entry[2],
                    bank: entry[3],
                }
            })
            .collect();

        SystemData {
            mem_top: sysdat[offset::MEM_TOP],
            consoles: sysdat[offset::NMB_CNS],
            breakpoint_rst: sysdat[offset::BRKPT_RST],
            bank_switched: sysdat[offset::BANK_SWITCHED] != 0,
            z80: sysdat[offset::Z80] != 0,
            xios_jump_table: sysdat[offset::XIOS_JMP_TBL],
            resbdos: sysdat[offset::RESBDOS],
            xdos: sysdat[offset::XDOS],
            rsp: sysdat[offset::RSP],
            bnkxios: sysdat[offset::BNKXIOS],
            bnkbdos: sysdat[offset::BNKBDOS],
            segments,
            records: u16::from_le_bytes([
                sysdat[offset::NMB_RECORDS],
                sysdat[offset::NMB_RECORDS + 1],
            ]),
            ticks_per_second: sysdat[offset::TICKS_PER_SEC],
            system_drive: sysdat[offset::SYSTEM_DRIVE],
            common_base: sysdat[offset::COMMON_BASE],
            bnkxdos: sysdat[offset::BNKXDOS],
            tmp: sysdat[offset::TMP],
        }
    }

    pub fn sysdat_address(&self) -> u16 {
        page(self.mem_top)
    }

    pub fn entry_point(&self) -> u16 {
        page(self.xdos)
    }

    /// Print the configuration and memory map the way MPMLDR does.
    pub fn log_summary(&self) {
        info!("MP/M II V2.1 Loader (direct load)");
        info!("Nmb of consoles     =  {}", self.consoles);
        info!("Breakpoint RST #    =  {}", self.breakpoint_rst);
        if self.z80 {
            info!("Z80 Alternate register set saved/restored by dispatcher");
        }
        if self.bank_switched {
            info!("Common base addr    =  {:04X}H", page(self.common_base));
        }
        info!("Nmb of ticks/second =  {}", self.ticks_per_second);
        match self.system_drive {
            1..=16 => info!("System drive        =  {}:", (b'A' + self.system_drive - 1) as char),
            _ => info!("System drive        =  A: (default)"),
        }

        info!("Memory Segment Table:");
        let sysdat = self.sysdat_address();
        let tmpd_size = ((self.consoles.max(1) as u16 - 1) / 4 + 1) * 256;
        let rows = [
            ("SYSTEM  DAT", sysdat, 0x0100),
            ("TMPD    DAT", sysdat.wrapping_sub(tmpd_size), tmpd_size),
            ("XIOSJMP TBL", page(self.xios_jump_table), 0x0100),
            ("RESBDOS SPR", page(self.resbdos), span(self.resbdos, self.xios_jump_table)),
            ("XDOS    SPR", page(self.xdos), span(self.xdos, self.resbdos)),
            ("BNKXIOS SPR", page(self.bnkxios), span(self.bnkxios, self.rsp)),
            ("BNKBDOS SPR", page(self.bnkbdos), span(self.bnkbdos, self.bnkxios)),
            ("BNKXDOS SPR", page(self.bnkxdos), span(self.bnkxdos, self.bnkbdos)),
            ("TMP     SPR", page(self.tmp), span(self.tmp, self.bnkxdos)),
        ];
        for (name, base, size) in rows {
            info!("{:<12}  {:04X}H  {:04X}H", name, base, size);
        }
        info!("-------------------------");
        info!("MP/M II Sys  0000H  {:04X}H  Bank 0", page(self.common_base));
        for segment in self.segments.iter().filter(|s| s.size > 0) {
            info!(
                "Memseg  Usr  {:04X}H  {:04X}H  Bank {}",
                page(segment.base),
                page(segment.size),
                segment.bank
            );
        }
    }
}

fn page(p: u8) -> u16 {
    (p as u16) << 8
}

fn span(from: u8, to: u8) -> u16 {
    page(to.wrapping_sub(from))
}

/// Load MPM.SYS into bank 0 and common memory and point the CPU at the
/// XDOS.
pub fn load<P: AsRef<Path>, C: GuestCpu + ?Sized>(
    session: &mut Session,
    cpu: &mut C,
    path: P,
) -> Result<SystemData, EmuError> {
    let path = path.as_ref();
    let bad = |reason: String| EmuError::BadSystemImage {
        path: path.to_owned(),
        reason,
    };

    let content = fs::read(path).map_err(|source| EmuError::Io {
        path: path.to_owned(),
        source,
    })?;
    if content.len() < SYSDAT_SIZE {
        return Err(bad(format!("{} bytes, too short for SYSTEM.DAT", content.len())));
    }
    let mut sysdat = [0u8; SYSDAT_SIZE];
    sysdat.copy_from_slice(&content[..SYSDAT_SIZE]);
    let system = SystemData::parse(&sysdat);
    system.log_summary();

    if system.records < 3 {
        return Err(bad(format!("invalid record count {}", system.records)));
    }
    if system.sysdat_address() < COMMON_BASE {
        return Err(bad(format!(
            "SYSTEM.DAT at {:04X}H is below common memory",
            system.sysdat_address()
        )));
    }
    // The last record may be short
    let expected = system.records as usize * RECORD_SIZE;
    if content.len() + RECORD_SIZE < expected {
        return Err(bad(format!(
            "{} bytes, expected about {}",
            content.len(),
            expected
        )));
    }
    let image_size = (system.records as usize - 2) * RECORD_SIZE;
    if image_size > system.sysdat_address() as usize {
        return Err(bad(format!(
            "{} bytes of code do not fit below {:04X}H",
            image_size,
            system.sysdat_address()
        )));
    }
    let banks = session.memory().num_banks();
    if let Some(segment) = system
        .segments
        .iter()
        .find(|s| system.bank_switched && s.bank as usize >= banks)
    {
        return Err(bad(format!(
            "memory segment at {:04X}H uses bank {}, only {} configured",
            page(segment.base),
            segment.bank,
            banks
        )));
    }

    session.consoles.set_active_consoles(system.consoles as usize);

    let memory = session.memory_mut();
    let mut address = system.sysdat_address();
    let mut loaded = 0;
    for chunk in content[SYSDAT_SIZE..].chunks(RECORD_SIZE).take(system.records as usize - 2) {
        let mut record = [0u8; RECORD_SIZE];
        record[..chunk.len()].copy_from_slice(chunk);
        address -= RECORD_SIZE as u16;
        memory.load(0, address, &record);
        loaded += 1;
    }
    for (address, &byte) in (system.sysdat_address()..=0xFFFF).zip(sysdat.iter()) {
        memory.write_common(address, byte);
    }

    session.xios.set_base(page(system.bnkxios));
    session.xios.set_sysdat_address(system.sysdat_address());
    session.xios.set_xdos_entry(system.entry_point());
    cpu.set_pc(system.entry_point());
    cpu.set_sp(system.sysdat_address());

    info!(
        "Loaded {} records ({} bytes), entry point {:04X}H",
        loaded,
        loaded * RECORD_SIZE,
        system.entry_point()
    );
    Ok(system)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sysdat() -> [u8; SYSDAT_SIZE] {
        let mut s = [0u8; SYSDAT_SIZE];
        s[offset::MEM_TOP] = 0xFF;
        s[offset::NMB_CNS] = 4;
        s[offset::BRKPT_RST] = 6;
        s[offset::BANK_SWITCHED] = 1;
        s[offset::Z80] = 1;
        s[offset::XIOS_JMP_TBL] = 0xFD;
        s[offset::RESBDOS] = 0xF0;
        s[offset::XDOS] = 0xCE;
        s[offset::RSP] = 0x9E;
        s[offset::BNKXIOS] = 0x98;
        s[offset::BNKBDOS] = 0x80;
        s[offset::NMB_MEM_SEG] = 2;
        s[offset::MEM_SEG_TBL..offset::MEM_SEG_TBL + 8]
            .copy_from_slice(&[0x00, 0xC0, 0x00, 0x01, 0x00, 0xC0, 0x00, 0x02]);
        s[offset::NMB_RECORDS] = 4;
        s[offset::TICKS_PER_SEC] = 60;
        s[offset::SYSTEM_DRIVE] = 1;
        s[offset::COMMON_BASE] = 0xC0;
        s
    }

    #[test]
    fn test_parse_system_data() {
        let system = SystemData::parse(&sysdat());
        assert_eq!(system.sysdat_address(), 0xFF00);
        assert_eq!(system.entry_point(), 0xCE00);
        assert_eq!(system.consoles, 4);
        assert!(system.bank_switched);
        assert_eq!(system.records, 4);
        assert_eq!(system.segments.len(), 2);
        assert_eq!(
            system.segments[1],
            MemorySegment {
                base: 0,
                size: 0xC0,
                attributes: 0,
                bank: 2
            }
        );
    }

    #[test]
    fn test_span_and_page() {
        assert_eq!(page(0xCE), 0xCE00);
        assert_eq!(span(0xCE, 0xF0), 0x2200);
    }
}
