use std::io::{stdin, Read};

use log::warn;
use termios::*;

use crate::console::{Console, INPUT_QUEUE_SIZE};

const STDIN_FD: i32 = 0;

/// Keys held back while the console input queue is full.
const KEY_BUFFER_SIZE: usize = INPUT_QUEUE_SIZE;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    Quit,
    ShowStatus,
}

/// The host terminal as a local console. Stdin is put in raw, non blocking
/// mode and every key goes to the guest, except the function keys used
/// for emulator commands.
pub struct Keyboard {
    initial_termios: Option<Termios>,
    key_buffer: Vec<u8>,
    pub commands: Vec<Command>,
}

impl Keyboard {
    pub fn new() -> Keyboard {
        // Prepare terminal
        let initial_termios = Termios::from_fd(STDIN_FD).ok();

        let k = Keyboard {
            initial_termios,
            key_buffer: Vec::new(),
            commands: Vec::<Command>::new(),
        };

        k.setup_host_terminal();
        k
    }

    fn setup_host_terminal(&self) {
        if let Some(mut initial) = self.initial_termios {
            initial.c_iflag &= !(IXON | ICRNL);
            initial.c_lflag &= !(ISIG | ECHO | ICANON | IEXTEN);
            initial.c_cc[VMIN] = 0;
            initial.c_cc[VTIME] = 0;
            if let Err(e) = tcsetattr(STDIN_FD, TCSANOW, &initial) {
                warn!("Cannot put the terminal in raw mode: {}", e);
            }
        }
    }

    /// Move pending keys into the input queue of `console`.
    pub fn poll(&mut self, console: &Console) {
        self.consume_input();
        forward_keys(&mut self.key_buffer, console);
    }

    fn consume_input(&mut self) {
        let mut buf = [0; 100];
        let size = stdin().read(&mut buf).unwrap_or(0);
        if size > 0 {
            parse_input(&buf[..size], &mut self.key_buffer, &mut self.commands);
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard::new()
    }
}

/// Keys that do not fit stay buffered for the next call, up to
/// `KEY_BUFFER_SIZE`. Newer keys past that are dropped.
fn forward_keys(keys: &mut Vec<u8>, console: &Console) {
    let accepted = keys
        .iter()
        .take_while(|&&key| console.push_input(key))
        .count();
    keys.drain(..accepted);
    if keys.len() > KEY_BUFFER_SIZE {
        warn!(
            "Console {} input full, {} keys dropped",
            console.id(),
            keys.len() - KEY_BUFFER_SIZE
        );
        keys.truncate(KEY_BUFFER_SIZE);
    }
}

fn parse_input(input: &[u8], keys: &mut Vec<u8>, commands: &mut Vec<Command>) {
    if input.is_empty() {
        // No new keys
    } else if input.len() > 2 && input[0] == 0x1b {
        // Escape sequences, see 5.4 in ECMA-48
        let mut seq = String::new();
        seq.push(input[1] as char);
        let mut i = 2;
        // Parameter and Intermediate bytes
        while i < input.len() && (input[i] & 0xf0 == 0x20 || input[i] & 0xf0 == 0x30) {
            seq.push(input[i] as char);
            i += 1;
        }
        // Final byte
        if i < input.len() {
            seq.push(input[i] as char);
            i += 1;
        }

        match seq.as_str() {
            "OQ" | "Oq" => commands.push(Command::ShowStatus), // F2
            "OS" | "Os" => commands.push(Command::Quit),       // F4
            "[3~" => keys.push(0x7f),
            // Cursor keys as WordStar controls
            "[A" => keys.push(0x05),
            "[B" => keys.push(0x18),
            "[C" => keys.push(0x04),
            "[D" => keys.push(0x13),
            _ => keys.extend_from_slice(&input[..i]),
        }
        parse_input(&input[i..], keys, commands);
    } else {
        let key = match input[0] {
            0x0a => 0x0d,
            k => k & 0x7f,
        };
        keys.push(key);
        parse_input(&input[1..], keys, commands);
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        if let Some(initial) = self.initial_termios {
            let _ = tcsetattr(STDIN_FD, TCSANOW, &initial);
        }
    }
}
