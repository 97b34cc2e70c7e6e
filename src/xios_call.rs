/*
XIOS calling convention.

The guest XIOS is a jump table of stubs, each doing:

    LD A, function
    OUT (0E0h), A
    RET

Arguments are left in the registers the BDOS/XDOS put them in. This module
is the only place that knows which register carries what; the dispatcher
works on the typed Request/Response values.

    func  name        in                      out
    00    BOOT        PC (stub return)        HL = commonbase
    03    WBOOT       -                       -
    06    CONST       D = console             A = 00/FF
    09    CONIN       D = console             A = char
    0C    CONOUT      D = console, C = char   -
    0F    LIST        C = char                -
    12    PUNCH       C = char                -
    15    READER      -                       A = char
    18    HOME        -                       -
    1B    SELDSK      C = drive               A = 00 ok / FF error
    1E    SETTRK      HL = track              -
    21    SETSEC      HL = sector             -
    24    SETDMA      HL = address            -
    27    READ        -                       A = 00 ok / 01 error
    2A    WRITE       -                       A = 00 ok / 01 error
    2D    LISTST      -                       A = 00/FF
    30    SECTRAN     HL = logical, DE = xlt  HL = physical
    33    SELMEMORY   BC = memory descriptor  -
    36    POLLDEVICE  C = device              A = 00/FF
    39    STARTCLOCK  -                       -
    3C    STOPCLOCK   -                       -
    3F    EXITREGION  -                       EI unless preempted
    42    MAXCONSOLE  -                       A = consoles
    45    SYSTEMINIT  C = RST, DE = handler,  -
                      HL = banked entry
    48    IDLE        -                       -
    4B    COMMONBASE  -                       HL = commonbase
    4E    SWTUSER     BC = descriptor or 0    -
    51    SWTSYS      -                       -
    54    PDISP       -                       EI
    57    XDOSENT     -                       HL = XDOS entry
    5A    SYSDAT      -                       HL = SYSTEM.DAT address
*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum XiosFunction {
    Boot = 0x00,
    WarmBoot = 0x03,
    ConsoleStatus = 0x06,
    ConsoleInput = 0x09,
    ConsoleOutput = 0x0C,
    List = 0x0F,
    Punch = 0x12,
    Reader = 0x15,
    Home = 0x18,
    SelectDisk = 0x1B,
    SetTrack = 0x1E,
    SetSector = 0x21,
    SetDma = 0x24,
    Read = 0x27,
    Write = 0x2A,
    ListStatus = 0x2D,
    SectorTranslate = 0x30,
    SelectMemory = 0x33,
    PollDevice = 0x36,
    StartClock = 0x39,
    StopClock = 0x3C,
    ExitRegion = 0x3F,
    MaxConsole = 0x42,
    SystemInit = 0x45,
    Idle = 0x48,
    CommonBase = 0x4B,
    SwitchUser = 0x4E,
    SwitchSystem = 0x51,
    Dispatch = 0x54,
    XdosEntry = 0x57,
    SystemData = 0x5A,
}

const ALL_FUNCTIONS: [XiosFunction; 31] = [
    XiosFunction::Boot,
    XiosFunction::WarmBoot,
    XiosFunction::ConsoleStatus,
    XiosFunction::ConsoleInput,
    XiosFunction::ConsoleOutput,
    XiosFunction::List,
    XiosFunction::Punch,
    XiosFunction::Reader,
    XiosFunction::Home,
    XiosFunction::SelectDisk,
    XiosFunction::SetTrack,
    XiosFunction::SetSector,
    XiosFunction::SetDma,
    XiosFunction::Read,
    XiosFunction::Write,
    XiosFunction::ListStatus,
    XiosFunction::SectorTranslate,
    XiosFunction::SelectMemory,
    XiosFunction::PollDevice,
    XiosFunction::StartClock,
    XiosFunction::StopClock,
    XiosFunction::ExitRegion,
    XiosFunction::MaxConsole,
    XiosFunction::SystemInit,
    XiosFunction::Idle,
    XiosFunction::CommonBase,
    XiosFunction::SwitchUser,
    XiosFunction::SwitchSystem,
    XiosFunction::Dispatch,
    XiosFunction::XdosEntry,
    XiosFunction::SystemData,
];

impl XiosFunction {
    pub fn name(&self) -> &'static str {
        match self {
            XiosFunction::Boot => "BOOT",
            XiosFunction::WarmBoot => "WBOOT",
            XiosFunction::ConsoleStatus => "CONST",
            XiosFunction::ConsoleInput => "CONIN",
            XiosFunction::ConsoleOutput => "CONOUT",
            XiosFunction::List => "LIST",
            XiosFunction::Punch => "PUNCH",
            XiosFunction::Reader => "READER",
            XiosFunction::Home => "HOME",
            XiosFunction::SelectDisk => "SELDSK",
            XiosFunction::SetTrack => "SETTRK",
            XiosFunction::SetSector => "SETSEC",
            XiosFunction::SetDma => "SETDMA",
            XiosFunction::Read => "READ",
            XiosFunction::Write => "WRITE",
            XiosFunction::ListStatus => "LISTST",
            XiosFunction::SectorTranslate => "SECTRAN",
            XiosFunction::SelectMemory => "SELMEMORY",
            XiosFunction::PollDevice => "POLLDEVICE",
            XiosFunction::StartClock => "STARTCLOCK",
            XiosFunction::StopClock => "STOPCLOCK",
            XiosFunction::ExitRegion => "EXITREGION",
            XiosFunction::MaxConsole => "MAXCONSOLE",
            XiosFunction::SystemInit => "SYSTEMINIT",
            XiosFunction::Idle => "IDLE",
            XiosFunction::CommonBase => "COMMONBASE",
            XiosFunction::SwitchUser => "SWTUSER",
            XiosFunction::SwitchSystem => "SWTSYS",
            XiosFunction::Dispatch => "PDISP",
            XiosFunction::XdosEntry => "XDOSENT",
            XiosFunction::SystemData => "SYSDAT",
        }
    }
}

impl TryFrom<u8> for XiosFunction {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        ALL_FUNCTIONS
            .iter()
            .copied()
            .find(|f| *f as u8 == code)
            .ok_or(code)
    }
}

/// CPU register storage as seen by a dispatch call.
pub trait RegisterFile {
    fn a(&self) -> u8;
    fn set_a(&mut self, value: u8);
    fn bc(&self) -> u16;
    fn de(&self) -> u16;
    fn hl(&self) -> u16;
    fn set_hl(&mut self, value: u16);
    fn pc(&self) -> u16;

    fn c(&self) -> u8 {
        self.bc() as u8
    }

    fn d(&self) -> u8 {
        (self.de() >> 8) as u8
    }
}

/// A decoded dispatch call with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    Boot { return_address: u16 },
    WarmBoot,
    ConsoleStatus { console: u8 },
    ConsoleInput { console: u8 },
    ConsoleOutput { console: u8, byte: u8 },
    List { byte: u8 },
    Punch { byte: u8 },
    Reader,
    Home,
    SelectDisk { drive: u8 },
    SetTrack { track: u16 },
    SetSector { sector: u16 },
    SetDma { address: u16 },
    Read,
    Write,
    ListStatus,
    SectorTranslate { logical: u16, table: u16 },
    SelectMemory { descriptor: u16 },
    PollDevice { device: u8 },
    StartClock,
    StopClock,
    ExitRegion,
    MaxConsole,
    SystemInit {
        breakpoint_rst: u8,
        breakpoint_handler: u16,
        banked_entry: u16,
    },
    Idle,
    CommonBase,
    SwitchUser { descriptor: u16 },
    SwitchSystem,
    Dispatch,
    XdosEntry,
    SystemData,
}

impl Request {
    pub fn decode<R: RegisterFile + ?Sized>(function: XiosFunction, regs: &R) -> Request {
        match function {
            XiosFunction::Boot => Request::Boot {
                return_address: regs.pc(),
            },
            XiosFunction::WarmBoot => Request::WarmBoot,
            XiosFunction::ConsoleStatus => Request::ConsoleStatus { console: regs.d() },
            XiosFunction::ConsoleInput => Request::ConsoleInput { console: regs.d() },
            XiosFunction::ConsoleOutput => Request::ConsoleOutput {
                console: regs.d(),
                byte: regs.c(),
            },
            XiosFunction::List => Request::List { byte: regs.c() },
            XiosFunction::Punch => Request::Punch { byte: regs.c() },
            XiosFunction::Reader => Request::Reader,
            XiosFunction::Home => Request::Home,
            XiosFunction::SelectDisk => Request::SelectDisk { drive: regs.c() },
            XiosFunction::SetTrack => Request::SetTrack { track: regs.hl() },
            XiosFunction::SetSector => Request::SetSector { sector: regs.hl() },
            XiosFunction::SetDma => Request::SetDma { address: regs.hl() },
            XiosFunction::Read => Request::Read,
            XiosFunction::Write => Request::Write,
            XiosFunction::ListStatus => Request::ListStatus,
            XiosFunction::SectorTranslate => Request::SectorTranslate {
                logical: regs.hl(),
                table: regs.de(),
            },
            XiosFunction::SelectMemory => Request::SelectMemory {
                descriptor: regs.bc(),
            },
            XiosFunction::PollDevice => Request::PollDevice { device: regs.c() },
            XiosFunction::StartClock => Request::StartClock,
            XiosFunction::StopClock => Request::StopClock,
            XiosFunction::ExitRegion => Request::ExitRegion,
            XiosFunction::MaxConsole => Request::MaxConsole,
            XiosFunction::SystemInit => Request::SystemInit {
                breakpoint_rst: regs.c(),
                breakpoint_handler: regs.de(),
                banked_entry: regs.hl(),
            },
            XiosFunction::Idle => Request::Idle,
            XiosFunction::CommonBase => Request::CommonBase,
            XiosFunction::SwitchUser => Request::SwitchUser {
                descriptor: regs.bc(),
            },
            XiosFunction::SwitchSystem => Request::SwitchSystem,
            XiosFunction::Dispatch => Request::Dispatch,
            XiosFunction::XdosEntry => Request::XdosEntry,
            XiosFunction::SystemData => Request::SystemData,
        }
    }
}

/// Result of a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Registers untouched.
    Done,
    /// Byte result in A.
    Byte(u8),
    /// Word result in HL.
    Word(u16),
    /// Re-enable guest interrupts before returning.
    EnableInterrupts,
}

impl Response {
    /// Write the result back to the registers. Returns the value the
    /// result port reports for this call.
    pub fn apply<R: RegisterFile + ?Sized>(self, regs: &mut R) -> u8 {
        match self {
            Response::Byte(value) => {
                regs.set_a(value);
                value
            }
            Response::Word(value) => {
                regs.set_hl(value);
                value as u8
            }
            Response::Done | Response::EnableInterrupts => 0,
        }
    }

    pub fn enables_interrupts(&self) -> bool {
        matches!(self, Response::EnableInterrupts)
    }
}
