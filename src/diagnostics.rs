//! Memory self test, run from the command line before anything is loaded.
//!
//! Every bank gets a sliding data test and an address data test over its
//! private area, the common area gets the same through bank 0, and then a
//! marker written to each bank must not show through in the others.

use crate::banked_memory::{BankedMemory, BANK_SIZE, COMMON_BASE};

/// Result of a diagnostic test
#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

/// (address, expected, read)
type Failure = (u16, u8, u8);

fn fill_and_verify<F>(
    memory: &mut BankedMemory,
    bank: u8,
    start: u16,
    end: u16,
    value: F,
) -> Result<(), Failure>
where
    F: Fn(u16) -> u8,
{
    for addr in start..=end {
        memory.write_bank(bank, addr, value(addr));
    }
    for addr in start..=end {
        let read = memory.read_bank(bank, addr);
        if read != value(addr) {
            return Err((addr, value(addr), read));
        }
    }
    Ok(())
}

/// Sliding data test: a rotating one, then a rotating zero, in every
/// location. Finds data line faults.
fn sliding_data_test(memory: &mut BankedMemory, bank: u8, start: u16, end: u16) -> Result<(), Failure> {
    for initial_pattern in [0x01u8, 0xFE] {
        for bit_pos in 0..8 {
            let pattern = initial_pattern.rotate_left(bit_pos);
            fill_and_verify(memory, bank, start, end, |_| pattern)?;
        }
    }
    Ok(())
}

/// Address data test: low then high address byte as data. Finds address
/// line faults.
fn address_data_test(memory: &mut BankedMemory, bank: u8, start: u16, end: u16) -> Result<(), Failure> {
    fill_and_verify(memory, bank, start, end, |addr| addr as u8)?;
    fill_and_verify(memory, bank, start, end, |addr| (addr >> 8) as u8)
}

/// Run RAM test on a memory region of one bank
pub fn test_ram_region(memory: &mut BankedMemory, bank: u8, start: u16, end: u16, name: &str) -> TestResult {
    if let Err((addr, expected, got)) = sliding_data_test(memory, bank, start, end) {
        return TestResult {
            name: format!("RAM {} (sliding)", name),
            passed: false,
            message: format!("FAIL at 0x{:04X}: expected 0x{:02X}, got 0x{:02X}", addr, expected, got),
        };
    }

    if let Err((addr, expected, got)) = address_data_test(memory, bank, start, end) {
        return TestResult {
            name: format!("RAM {} (address)", name),
            passed: false,
            message: format!("FAIL at 0x{:04X}: expected 0x{:02X}, got 0x{:02X}", addr, expected, got),
        };
    }

    TestResult {
        name: format!("RAM {}", name),
        passed: true,
        message: format!("OK (0x{:04X}-0x{:04X})", start, end),
    }
}

/// Write a different marker to every bank at the same addresses and check
/// each bank still reads its own.
pub fn test_bank_isolation(memory: &mut BankedMemory) -> TestResult {
    let banks = memory.num_banks() as u8;
    let addresses = [0x0000u16, 0x0100, 0x5555, COMMON_BASE - 1];

    for bank in 0..banks {
        for &addr in &addresses {
            memory.write_bank(bank, addr, 0xA0 | bank);
        }
    }
    for bank in 0..banks {
        memory.select_bank(bank);
        for &addr in &addresses {
            let read = memory.fetch(addr);
            if read != 0xA0 | bank {
                memory.select_bank(0);
                return TestResult {
                    name: "Bank isolation".to_string(),
                    passed: false,
                    message: format!(
                        "FAIL bank {} at 0x{:04X}: expected 0x{:02X}, got 0x{:02X}",
                        bank,
                        addr,
                        0xA0 | bank,
                        read
                    ),
                };
            }
        }
    }
    memory.select_bank(0);

    TestResult {
        name: "Bank isolation".to_string(),
        passed: true,
        message: format!("OK ({} banks)", banks),
    }
}

/// Run all diagnostic tests. Memory contents are destroyed.
pub fn run_diagnostics(memory: &mut BankedMemory) -> Vec<TestResult> {
    let mut results = Vec::new();
    let top = (BANK_SIZE - 1) as u16;

    for bank in 0..memory.num_banks() as u8 {
        results.push(test_ram_region(memory, bank, 0x0000, top, &format!("bank {}", bank)));
    }
    results.push(test_ram_region(memory, 0, COMMON_BASE, 0xFFFF, "common"));
    results.push(test_bank_isolation(memory));

    results
}

/// Print diagnostic results to console
pub fn print_results(results: &[TestResult]) -> bool {
    println!("\n=== MP/M II Memory Diagnostics ===\n");

    let mut all_passed = true;
    for result in results {
        let status = if result.passed { "PASS" } else { "FAIL" };
        println!("[{}] {}: {}", status, result.name, result.message);
        if !result.passed {
            all_passed = false;
        }
    }

    println!();
    if all_passed {
        println!("All tests passed!");
    } else {
        println!("Some tests failed.");
    }
    println!();
    all_passed
}
