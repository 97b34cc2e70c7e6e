use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::banked_memory::BankedMemory;
use crate::console::ConsolePool;
use crate::cpu::GuestCpu;
use crate::disk::MAX_SECTOR_SIZE;
use crate::drive_table::DriveTable;
use crate::error::EmuError;
use crate::machine::MpmMachine;
use crate::xios::{Bus, Xios};

const MEMORY_SIZE: usize = 0x10000;
const IMAGE_ENTRY: u16 = 0x0100;
const IMAGE_STACK: u16 = 0x0080;
const BOOT_ENTRY: u16 = 0x0000;
const BOOT_STACK: u16 = 0x0100;
const OP_DI: u8 = 0xF3;
const OP_JP: u8 = 0xC3;

/// Trace switches for the components of a session.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceFlags {
    pub io: bool,
    pub xios: bool,
    pub disk: bool,
}

/// One emulated MP/M II machine. Everything the guest can reach is owned
/// here and handed to the dispatcher per call, except the consoles, which
/// are shared with the terminal threads.
pub struct Session {
    pub machine: MpmMachine,
    pub drives: DriveTable,
    pub consoles: Arc<ConsolePool>,
    pub xios: Xios,
}

impl Session {
    pub fn new(
        banks: usize,
        consoles: Arc<ConsolePool>,
        trace: TraceFlags,
    ) -> Result<Session, EmuError> {
        let memory = BankedMemory::new(banks)?;
        Ok(Session {
            machine: MpmMachine::new(memory, trace.io),
            drives: DriveTable::new(trace.disk),
            consoles,
            xios: Xios::new(trace.xios),
        })
    }

    pub fn memory(&self) -> &BankedMemory {
        &self.machine.memory
    }

    pub fn memory_mut(&mut self) -> &mut BankedMemory {
        &mut self.machine.memory
    }

    /// Run one instruction, then service the dispatch call it made, if any.
    /// Returns true if an interrupt was taken instead.
    pub fn step<C: GuestCpu + ?Sized>(&mut self, cpu: &mut C, irq: bool) -> bool {
        let accepted = cpu.step(&mut self.machine, irq);
        if let Some(code) = self.machine.take_pending_call() {
            self.service_call(code, cpu);
        }
        accepted
    }

    pub fn service_call<C: GuestCpu + ?Sized>(&mut self, code: u8, cpu: &mut C) {
        let mut bus = Bus {
            memory: &mut self.machine.memory,
            drives: &mut self.drives,
            consoles: &self.consoles,
        };
        let enable = self.xios.dispatch(code, cpu.registers(), &mut bus);
        self.machine.set_last_result(self.xios.last_result());
        if enable {
            cpu.enable_interrupts();
        }
    }

    /// Load a memory snapshot into bank 0 from address 0. The part above
    /// the banked area lands in common memory.
    pub fn load_image<P: AsRef<Path>, C: GuestCpu + ?Sized>(
        &mut self,
        path: P,
        cpu: &mut C,
    ) -> Result<(), EmuError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| EmuError::Io {
            path: path.to_owned(),
            source,
        })?;
        if data.is_empty() || data.len() > MEMORY_SIZE {
            return Err(EmuError::BadImage {
                path: path.to_owned(),
                reason: format!("{} bytes, expected 1 to {}", data.len(), MEMORY_SIZE),
            });
        }

        self.machine.memory.load(0, 0, &data);
        cpu.set_pc(IMAGE_ENTRY);
        cpu.set_sp(IMAGE_STACK);
        info!(
            "Loaded {} bytes from {}, starting at 0x{:04x}",
            data.len(),
            path.display(),
            IMAGE_ENTRY
        );
        Ok(())
    }

    /// Load physical sector 0 of drive A at 0x0000 of bank 0 and start
    /// there, like a cold start loader.
    pub fn boot_from_disk<C: GuestCpu + ?Sized>(&mut self, cpu: &mut C) -> Result<(), EmuError> {
        let disk = self.drives.get_mut(0).ok_or(EmuError::NoBootDisk)?;
        let size = disk.sector_size();
        let mut sector = [0u8; MAX_SECTOR_SIZE];
        disk.set_track(0);
        disk.set_sector(0);
        disk.read_sector(&mut sector).map_err(EmuError::BootSector)?;
        info!("Booting from drive A: sector 0 ({} bytes)", size);

        if sector[0] != OP_DI && sector[0] != OP_JP {
            warn!(
                "Boot sector doesn't start with DI or JP (first byte 0x{:02x})",
                sector[0]
            );
        }

        self.machine.memory.load(0, 0, &sector[..size]);
        cpu.set_pc(BOOT_ENTRY);
        cpu.set_sp(BOOT_STACK);
        Ok(())
    }
}
