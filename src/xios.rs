use std::collections::HashSet;

use log::{debug, error, info, warn};

use crate::banked_memory::{BankedMemory, COMMON_BASE};
use crate::console::{Console, ConsolePool, CONIN_TIMEOUT, MAX_CONSOLES};
use crate::disk::RECORD_SIZE;
use crate::drive_table::{drive_letter, DriveTable, Record};
use crate::xios_call::{RegisterFile, Request, Response, XiosFunction};

pub const DEFAULT_XIOS_BASE: u16 = 0x8800;
pub const DEFAULT_SYSDAT_ADDRESS: u16 = 0xFF00;
pub const DEFAULT_DMA_ADDRESS: u16 = 0x0080;

/// Offset of the COMMONBASE entry in the XIOS jump table.
const COMMONBASE_OFFSET: u16 = 0x4B;
/// The BOOT stub returns through the RET at this offset of the XIOS.
const BOOT_RETURN_OFFSET: u16 = 0x60;
/// Number of consoles, in SYSTEM.DAT.
const SYSDAT_CONSOLES: u16 = 1;
/// Offset of the bank number in a memory descriptor (base, size, attrib, bank).
const DESCRIPTOR_BANK: u16 = 3;
/// Page zero area copied to every bank by SYSTEMINIT.
const RESTART_VECTORS_SIZE: u16 = 0x40;

const OP_JP: u8 = 0xC3;
const EOF: u8 = 0x1A;
const READY: u8 = 0xFF;
const NOT_READY: u8 = 0x00;
const DISK_OK: u8 = 0x00;
const DISK_ERROR: u8 = 0x01;
const SELECT_ERROR: u8 = 0xFF;

/// State kept between dispatch calls. Only the dispatcher writes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchState {
    pub drive: u8,
    pub track: u16,
    pub sector: u16,
    pub dma_address: u16,
    pub dma_bank: u8,
    pub clock_enabled: bool,
    pub preempted: bool,
    pub last_result: u8,
}

impl Default for DispatchState {
    fn default() -> Self {
        DispatchState {
            drive: 0,
            track: 0,
            sector: 0,
            dma_address: DEFAULT_DMA_ADDRESS,
            dma_bank: 0,
            clock_enabled: false,
            preempted: false,
            last_result: 0,
        }
    }
}

/// Everything a dispatch call may touch besides the registers.
pub struct Bus<'a> {
    pub memory: &'a mut BankedMemory,
    pub drives: &'a mut DriveTable,
    pub consoles: &'a ConsolePool,
}

pub struct Xios {
    pub state: DispatchState,
    xios_base: u16,
    sysdat_address: u16,
    xdos_entry: u16,
    last_user_bank: u8,
    ticks: u64,
    seconds: u64,
    warned: HashSet<u8>,
    pub trace: bool,
}

impl Xios {
    pub fn new(trace: bool) -> Xios {
        Xios {
            state: DispatchState::default(),
            xios_base: DEFAULT_XIOS_BASE,
            sysdat_address: DEFAULT_SYSDAT_ADDRESS,
            xdos_entry: 0,
            last_user_bank: 0,
            ticks: 0,
            seconds: 0,
            warned: HashSet::new(),
            trace,
        }
    }

    pub fn set_base(&mut self, base: u16) {
        self.xios_base = base;
    }

    pub fn base(&self) -> u16 {
        self.xios_base
    }

    pub fn set_sysdat_address(&mut self, address: u16) {
        self.sysdat_address = address;
    }

    pub fn set_xdos_entry(&mut self, address: u16) {
        self.xdos_entry = address;
    }

    pub fn clock_enabled(&self) -> bool {
        self.state.clock_enabled
    }

    pub fn is_preempted(&self) -> bool {
        self.state.preempted
    }

    pub fn set_preempted(&mut self, preempted: bool) {
        self.state.preempted = preempted;
    }

    pub fn last_result(&self) -> u8 {
        self.state.last_result
    }

    /// Timer tick.
    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    pub fn one_second_tick(&mut self) {
        self.seconds += 1;
        if self.trace {
            debug!("XIOS one second tick ({} ticks)", self.ticks);
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    /// Service the call `code` with its arguments in `regs`. Results are
    /// written back to `regs`. Returns true if the guest must resume with
    /// interrupts enabled.
    pub fn dispatch<R: RegisterFile + ?Sized>(
        &mut self,
        code: u8,
        regs: &mut R,
        bus: &mut Bus,
    ) -> bool {
        let function = match XiosFunction::try_from(code) {
            Ok(function) => function,
            Err(code) => {
                if self.warned.insert(code) {
                    warn!(
                        "XIOS: unknown function 0x{:02x} at PC=0x{:04x} (further occurrences suppressed)",
                        code,
                        regs.pc()
                    );
                }
                return false;
            }
        };

        let request = Request::decode(function, regs);
        let response = self.handle(request, bus);
        if self.trace {
            debug!("XIOS {:<10} {:?} -> {:?}", function.name(), request, response);
        }
        self.state.last_result = response.apply(regs);
        response.enables_interrupts()
    }

    pub fn handle(&mut self, request: Request, bus: &mut Bus) -> Response {
        match request {
            Request::Boot { return_address } => {
                self.xios_base = return_address.wrapping_sub(BOOT_RETURN_OFFSET);
                info!("XIOS cold boot, XIOS at 0x{:04x}", self.xios_base);
                Response::Word(self.commonbase())
            }
            Request::WarmBoot => Response::Done,

            Request::ConsoleStatus { console } => match self.console(bus.consoles, console, "CONST") {
                Some(con) => Response::Byte(con.status()),
                None => Response::Byte(NOT_READY),
            },
            Request::ConsoleInput { console } => match self.console(bus.consoles, console, "CONIN") {
                Some(con) if con.is_connected() || con.is_local() => {
                    Response::Byte(con.read_byte(CONIN_TIMEOUT).unwrap_or(0))
                }
                Some(_) => Response::Byte(EOF),
                None => Response::Byte(0),
            },
            Request::ConsoleOutput { console, byte } => {
                if let Some(con) = self.console(bus.consoles, console, "CONOUT") {
                    con.write_byte(byte);
                }
                Response::Done
            }
            Request::List { byte } | Request::Punch { byte } => {
                if self.trace {
                    debug!("XIOS: discarded output 0x{:02x}", byte);
                }
                Response::Done
            }
            Request::Reader => Response::Byte(EOF),
            Request::ListStatus => Response::Byte(READY),

            Request::Home => {
                self.state.track = 0;
                Response::Done
            }
            Request::SelectDisk { drive } => {
                if bus.drives.select(drive as usize) {
                    self.state.drive = drive;
                    Response::Byte(0)
                } else {
                    if self.trace {
                        debug!("XIOS: SELDSK {} failed", drive);
                    }
                    Response::Byte(SELECT_ERROR)
                }
            }
            Request::SetTrack { track } => {
                self.state.track = track;
                Response::Done
            }
            Request::SetSector { sector } => {
                self.state.sector = sector;
                Response::Done
            }
            Request::SetDma { address } => {
                self.state.dma_address = address;
                Response::Done
            }
            Request::Read => Response::Byte(self.read(bus)),
            Request::Write => Response::Byte(self.write(bus)),
            Request::SectorTranslate { logical, table } => {
                if table == 0 {
                    Response::Word(logical)
                } else {
                    Response::Word(bus.memory.fetch(table.wrapping_add(logical)) as u16)
                }
            }

            Request::SelectMemory { descriptor } => {
                let bank = bus.memory.fetch(descriptor.wrapping_add(DESCRIPTOR_BANK));
                self.select_bank(bus.memory, bank);
                Response::Done
            }
            Request::PollDevice { device } => Response::Byte(self.poll_device(bus.consoles, device)),
            Request::StartClock => {
                self.state.clock_enabled = true;
                Response::Done
            }
            Request::StopClock => {
                self.state.clock_enabled = false;
                Response::Done
            }
            Request::ExitRegion => {
                if self.state.preempted {
                    Response::Done
                } else {
                    Response::EnableInterrupts
                }
            }
            Request::MaxConsole => Response::Byte(self.max_console(bus)),
            Request::SystemInit {
                breakpoint_rst,
                breakpoint_handler,
                banked_entry,
            } => {
                self.system_init(bus, breakpoint_rst, breakpoint_handler, banked_entry);
                Response::Done
            }
            Request::Idle => Response::Done,

            Request::CommonBase => Response::Word(self.commonbase()),
            Request::SwitchUser { descriptor } => {
                let bank = if descriptor == 0 {
                    self.last_user_bank
                } else {
                    bus.memory.fetch(descriptor.wrapping_add(DESCRIPTOR_BANK))
                };
                self.select_bank(bus.memory, bank);
                Response::Done
            }
            Request::SwitchSystem => {
                bus.memory.select_bank(0);
                Response::Done
            }
            Request::Dispatch => {
                self.state.preempted = false;
                Response::EnableInterrupts
            }
            Request::XdosEntry => Response::Word(self.xdos_entry),
            Request::SystemData => Response::Word(self.sysdat_address),
        }
    }

    fn commonbase(&self) -> u16 {
        self.xios_base.wrapping_add(COMMONBASE_OFFSET)
    }

    fn console<'c>(&self, consoles: &'c ConsolePool, console: u8, op: &str) -> Option<&'c Console> {
        let con = consoles.get(console as usize);
        if con.is_none() {
            error!("XIOS {}: invalid console {}", op, console);
        }
        con
    }

    /// User banks become the DMA target of later disk transfers.
    fn select_bank(&mut self, memory: &mut BankedMemory, bank: u8) {
        memory.select_bank(bank);
        if bank != 0 {
            self.last_user_bank = bank;
            self.state.dma_bank = bank;
        }
    }

    fn read(&mut self, bus: &mut Bus) -> u8 {
        bus.drives.set_track(self.state.track);
        bus.drives.set_sector(self.state.sector);
        match bus.drives.read() {
            Ok(record) => {
                bus.memory
                    .write_block(self.state.dma_bank, self.state.dma_address, &record);
                DISK_OK
            }
            Err(e) => {
                debug!(
                    "XIOS READ {}: t={} s={}: {}",
                    drive_letter(self.state.drive as usize),
                    self.state.track,
                    self.state.sector,
                    e
                );
                DISK_ERROR
            }
        }
    }

    fn write(&mut self, bus: &mut Bus) -> u8 {
        bus.drives.set_track(self.state.track);
        bus.drives.set_sector(self.state.sector);
        let mut record: Record = [0; RECORD_SIZE];
        bus.memory
            .read_block(self.state.dma_bank, self.state.dma_address, &mut record);
        match bus.drives.write(&record) {
            Ok(()) => DISK_OK,
            Err(e) => {
                debug!(
                    "XIOS WRITE {}: t={} s={}: {}",
                    drive_letter(self.state.drive as usize),
                    self.state.track,
                    self.state.sector,
                    e
                );
                DISK_ERROR
            }
        }
    }

    /*
    Device numbers:
        2n:   console n output, ready while its output queue has room
        2n+1: console n input, ready when a byte is waiting
    */
    fn poll_device(&self, consoles: &ConsolePool, device: u8) -> u8 {
        if device as usize >= MAX_CONSOLES * 2 {
            error!("XIOS POLLDEVICE: invalid device {}", device);
            return NOT_READY;
        }
        let is_input = device & 1 != 0;
        let con = match consoles.get(device as usize / 2) {
            Some(con) => con,
            None => return NOT_READY,
        };

        if !con.is_connected() && !con.is_local() {
            return if is_input { NOT_READY } else { READY };
        }
        if is_input {
            con.status()
        } else if con.output_ready() {
            READY
        } else {
            NOT_READY
        }
    }

    fn max_console(&self, bus: &Bus) -> u8 {
        let address = self.sysdat_address.wrapping_add(SYSDAT_CONSOLES);
        let configured = if address >= COMMON_BASE {
            bus.memory.read_common(address)
        } else {
            0
        };
        if configured == 0 || configured as usize > MAX_CONSOLES {
            bus.consoles.active_consoles() as u8
        } else {
            configured
        }
    }

    fn system_init(&mut self, bus: &mut Bus, rst: u8, handler: u16, banked_entry: u16) {
        info!(
            "XIOS SYSTEMINIT: RST {} -> 0x{:04x}, banked entry 0x{:04x}",
            rst, handler, banked_entry
        );
        let memory = &mut *bus.memory;
        if handler != 0 && rst < 8 {
            let vector = rst as u16 * 8;
            memory.write_bank(0, vector, OP_JP);
            memory.write_bank(0, vector + 1, handler as u8);
            memory.write_bank(0, vector + 2, (handler >> 8) as u8);
        }

        for bank in 1..memory.num_banks() as u8 {
            memory.copy_between_banks(0, bank, 0, RESTART_VECTORS_SIZE);
        }
        info!(
            "XIOS: copied page 0 vectors to {} banks",
            memory.num_banks() - 1
        );

        self.state.clock_enabled = true;
    }
}
