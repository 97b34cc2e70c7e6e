use std::io::{stdout, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

pub const MAX_CONSOLES: usize = 8;
pub const INPUT_QUEUE_SIZE: usize = 256;
pub const OUTPUT_QUEUE_SIZE: usize = 4096;
/// Consoles the TMPs run on in a typical MP/M II system.
const DEFAULT_ACTIVE_CONSOLES: usize = 4;
/// CONIN waits at most this long for a byte. CONST should be used first.
pub const CONIN_TIMEOUT: Duration = Duration::from_millis(10);

struct ByteQueue {
    tx: Sender<u8>,
    rx: Receiver<u8>,
}

impl ByteQueue {
    fn new(capacity: usize) -> ByteQueue {
        let (tx, rx) = bounded(capacity);
        ByteQueue { tx, rx }
    }

    fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
    }
}

/// One terminal. The queues are shared between the emulation thread and
/// whatever session thread serves the terminal; no call blocks for longer
/// than the timeout it is given.
pub struct Console {
    id: usize,
    connected: AtomicBool,
    local: AtomicBool,
    input: ByteQueue,
    output: ByteQueue,
}

impl Console {
    fn new(id: usize) -> Console {
        Console {
            id,
            connected: AtomicBool::new(false),
            local: AtomicBool::new(false),
            input: ByteQueue::new(INPUT_QUEUE_SIZE),
            output: ByteQueue::new(OUTPUT_QUEUE_SIZE),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    pub fn is_local(&self) -> bool {
        self.local.load(Ordering::Acquire)
    }

    pub fn set_local(&self, local: bool) {
        self.local.store(local, Ordering::Release);
    }

    fn is_attached(&self) -> bool {
        self.is_connected() || self.is_local()
    }

    /// 0xff if a byte is waiting, 0x00 otherwise.
    pub fn status(&self) -> u8 {
        if self.is_attached() && !self.input.rx.is_empty() {
            0xFF
        } else {
            0x00
        }
    }

    /// Next input byte, waiting up to `timeout`. None if nothing arrived
    /// or the console is not attached.
    pub fn read_byte(&self, timeout: Duration) -> Option<u8> {
        if !self.is_attached() {
            return None;
        }
        match self.input.rx.recv_timeout(timeout) {
            Ok(byte) => Some(byte),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Output from the guest. Dropped if the queue is full.
    pub fn write_byte(&self, byte: u8) {
        if self.is_local() {
            let mut out = stdout();
            let _ = out.write_all(&[byte]);
            let _ = out.flush();
            return;
        }

        // Queue even before anyone connects so the boot banner is kept
        let _ = self.output.tx.try_send(byte);
        if self.id == 0 && !self.is_connected() {
            let mut out = stdout();
            let _ = out.write_all(&[byte]);
            let _ = out.flush();
        }
    }

    pub fn output_ready(&self) -> bool {
        !self.output.tx.is_full()
    }

    /// Terminal side: queue a key. False if the input queue is full.
    pub fn push_input(&self, byte: u8) -> bool {
        match self.input.tx.try_send(byte) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Terminal side: next byte for the screen, waiting up to `timeout`.
    #[allow(dead_code)]
    pub fn pop_output(&self, timeout: Duration) -> Option<u8> {
        self.output.rx.recv_timeout(timeout).ok()
    }

    pub fn reset(&self) {
        self.set_connected(false);
        self.input.clear();
        self.output.clear();
    }
}

/// Every console of a session. Shared with terminal threads through an
/// `Arc`.
pub struct ConsolePool {
    consoles: Vec<Console>,
    active: AtomicUsize,
}

impl ConsolePool {
    pub fn new() -> ConsolePool {
        ConsolePool {
            consoles: (0..MAX_CONSOLES).map(Console::new).collect(),
            active: AtomicUsize::new(DEFAULT_ACTIVE_CONSOLES),
        }
    }

    pub fn get(&self, id: usize) -> Option<&Console> {
        self.consoles.get(id)
    }

    /// Clear every queue and drop remote connections. Local mode survives.
    #[allow(dead_code)]
    pub fn reset(&self) {
        for console in &self.consoles {
            console.reset();
        }
    }

    pub fn set_local(&self, local: bool) {
        for console in &self.consoles {
            console.set_local(local);
        }
    }

    /// A disconnected console for a new terminal, highest active number
    /// first so the first login lands on the TMP console.
    #[allow(dead_code)]
    pub fn find_free(&self) -> Option<&Console> {
        self.consoles[..self.active_consoles()]
            .iter()
            .rev()
            .find(|c| !c.is_connected())
    }

    pub fn connected_count(&self) -> usize {
        self.consoles.iter().filter(|c| c.is_connected()).count()
    }

    pub fn active_consoles(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Console count configured in the system image. Out of range values
    /// are ignored.
    pub fn set_active_consoles(&self, count: usize) {
        if count > 0 && count <= MAX_CONSOLES {
            self.active.store(count, Ordering::Release);
        }
    }
}

impl Default for ConsolePool {
    fn default() -> Self {
        ConsolePool::new()
    }
}
