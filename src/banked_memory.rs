use crate::error::EmuError;

/*
Memory map:

    0x0000-0xbfff: banked, one 48Kb page per bank. The active bank is
                   selected by the XIOS (SELMEMORY, SWTUSER, SWTSYS) or by
                   a write to the bank select port.
    0xc000-0xffff: 16Kb common area, visible from every bank.

Page zero lives inside each bank. SYSTEMINIT copies the restart vectors
from bank 0 to the others.

Bank numbers outside 0..num_banks and common-only accesses below 0xc000
are wiring errors and panic.
*/

pub const COMMON_BASE: u16 = 0xC000;
pub const BANK_SIZE: usize = 0xC000;
pub const COMMON_SIZE: usize = 0x4000;
pub const MAX_BANKS: usize = 16;

pub struct BankedMemory {
    banks: Vec<Box<[u8]>>,
    common: Box<[u8]>,
    current_bank: u8,
}

impl BankedMemory {
    pub fn new(num_banks: usize) -> Result<BankedMemory, EmuError> {
        if num_banks == 0 || num_banks > MAX_BANKS {
            return Err(EmuError::InvalidBankCount {
                count: num_banks,
                max: MAX_BANKS,
            });
        }
        Ok(BankedMemory {
            banks: (0..num_banks)
                .map(|_| vec![0u8; BANK_SIZE].into_boxed_slice())
                .collect(),
            common: vec![0u8; COMMON_SIZE].into_boxed_slice(),
            current_bank: 0,
        })
    }

    pub fn num_banks(&self) -> usize {
        self.banks.len()
    }

    pub fn current_bank(&self) -> u8 {
        self.current_bank
    }

    fn check_bank(&self, bank: u8, op: &str) {
        assert!(
            (bank as usize) < self.banks.len(),
            "{}: bank {} out of range (0-{})",
            op,
            bank,
            self.banks.len() - 1
        );
    }

    /// CPU view: common area or the active bank.
    pub fn fetch(&self, address: u16) -> u8 {
        self.read_bank(self.current_bank, address)
    }

    pub fn store(&mut self, address: u16, value: u8) {
        self.write_bank(self.current_bank, address, value)
    }

    pub fn select_bank(&mut self, bank: u8) {
        self.check_bank(bank, "select_bank");
        self.current_bank = bank;
    }

    /// Access a named bank regardless of the active one. Addresses in the
    /// common area resolve to the common area for every bank.
    pub fn read_bank(&self, bank: u8, address: u16) -> u8 {
        self.check_bank(bank, "read_bank");
        if address >= COMMON_BASE {
            self.common[(address - COMMON_BASE) as usize]
        } else {
            self.banks[bank as usize][address as usize]
        }
    }

    pub fn write_bank(&mut self, bank: u8, address: u16, value: u8) {
        self.check_bank(bank, "write_bank");
        if address >= COMMON_BASE {
            self.common[(address - COMMON_BASE) as usize] = value;
        } else {
            self.banks[bank as usize][address as usize] = value;
        }
    }

    pub fn read_common(&self, address: u16) -> u8 {
        assert!(
            address >= COMMON_BASE,
            "read_common: 0x{:04x} is below the common area",
            address
        );
        self.common[(address - COMMON_BASE) as usize]
    }

    pub fn write_common(&mut self, address: u16, value: u8) {
        assert!(
            address >= COMMON_BASE,
            "write_common: 0x{:04x} is below the common area",
            address
        );
        self.common[(address - COMMON_BASE) as usize] = value;
    }

    /// Copy an image into memory starting at `address` in `bank`. The part
    /// of the range at or above COMMON_BASE lands in the common area.
    pub fn load(&mut self, bank: u8, address: u16, data: &[u8]) {
        self.check_bank(bank, "load");
        let start = address as usize;
        assert!(
            start + data.len() <= 0x10000,
            "load: {} bytes at 0x{:04x} run past the end of memory",
            data.len(),
            address
        );

        let split = (COMMON_BASE as usize).saturating_sub(start).min(data.len());
        let (low, high) = data.split_at(split);
        if !low.is_empty() {
            self.banks[bank as usize][start..start + low.len()].copy_from_slice(low);
        }
        if !high.is_empty() {
            let offset = start.max(COMMON_BASE as usize) - COMMON_BASE as usize;
            self.common[offset..offset + high.len()].copy_from_slice(high);
        }
    }

    /// Read `len` bytes from a named bank, following the same resolution as
    /// `read_bank`. Used by DMA transfers.
    pub fn read_block(&self, bank: u8, address: u16, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.read_bank(bank, address.wrapping_add(i as u16));
        }
    }

    pub fn write_block(&mut self, bank: u8, address: u16, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_bank(bank, address.wrapping_add(i as u16), byte);
        }
    }

    /// Copy `len` bytes at `address` from one bank to another.
    pub fn copy_between_banks(&mut self, from: u8, to: u8, address: u16, len: u16) {
        for offset in 0..len {
            let addr = address.wrapping_add(offset);
            let byte = self.read_bank(from, addr);
            self.write_bank(to, addr, byte);
        }
    }
}
