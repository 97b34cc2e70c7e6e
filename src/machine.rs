use iz80::Machine;
use log::debug;

use crate::banked_memory::BankedMemory;

/* I/O ports:

    0xe0: XIOS dispatch. OUT records the function code in A; the call is
          serviced right after the instruction completes, with the
          registers in their state after the OUT. IN returns the result
          of the last call.
    0xe1: bank select. OUT selects the bank in A.
    0xe2: signal port, for debugging. IN returns 0x00.

Any other port reads as 0xff and ignores writes.
*/

pub const PORT_XIOS_DISPATCH: u8 = 0xE0;
pub const PORT_BANK_SELECT: u8 = 0xE1;
pub const PORT_SIGNAL: u8 = 0xE2;

const IO_PORT_NAMES: [&str; 3] = [
    /* 0xe0 */ "XIOS dispatch",
    /* 0xe1 */ "Bank select",
    /* 0xe2 */ "Signal",
];

fn port_name(port: u8) -> &'static str {
    match port.checked_sub(PORT_XIOS_DISPATCH) {
        Some(i) if (i as usize) < IO_PORT_NAMES.len() => IO_PORT_NAMES[i as usize],
        _ => "-",
    }
}

pub struct MpmMachine {
    pub memory: BankedMemory,
    pending_call: Option<u8>,
    last_result: u8,
    last_signal: u8,
    pub trace_io: bool,
}

impl MpmMachine {
    pub fn new(memory: BankedMemory, trace_io: bool) -> MpmMachine {
        MpmMachine {
            memory,
            pending_call: None,
            last_result: 0,
            last_signal: 0,
            trace_io,
        }
    }

    /// The function code written to the dispatch port by the last
    /// instruction, if any.
    pub fn take_pending_call(&mut self) -> Option<u8> {
        self.pending_call.take()
    }

    pub fn set_last_result(&mut self, value: u8) {
        self.last_result = value;
    }

    pub fn last_signal(&self) -> u8 {
        self.last_signal
    }

    pub fn peek16(&self, address: u16) -> u16 {
        self.peek(address) as u16 | (self.peek(address.wrapping_add(1)) as u16) << 8
    }
}

impl Machine for MpmMachine {
    fn peek(&self, address: u16) -> u8 {
        self.memory.fetch(address)
    }

    fn poke(&mut self, address: u16, value: u8) {
        self.memory.store(address, value);
    }

    fn port_out(&mut self, address: u16, value: u8) {
        let port = address as u8;
        if self.trace_io && port != PORT_XIOS_DISPATCH {
            debug!("OUT(0x{:02x} '{}', 0x{:02x})", port, port_name(port), value);
        }
        match port {
            PORT_XIOS_DISPATCH => self.pending_call = Some(value),
            PORT_BANK_SELECT => self.memory.select_bank(value),
            PORT_SIGNAL => self.last_signal = value,
            _ => {}
        }
    }

    fn port_in(&mut self, address: u16) -> u8 {
        let port = address as u8;
        let value = match port {
            PORT_XIOS_DISPATCH => self.last_result,
            PORT_SIGNAL => 0x00,
            _ => 0xFF,
        };
        if self.trace_io {
            debug!("IN(0x{:02x} '{}') = 0x{:02x}", port, port_name(port), value);
        }
        value
    }
}
