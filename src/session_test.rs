#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{Seek, SeekFrom, Write};
    use std::sync::Arc;

    use tempfile::NamedTempFile;

    use crate::clock::ManualClock;
    use crate::console::ConsolePool;
    use crate::cpu::{GuestCpu, Z80};
    use crate::error::EmuError;
    use crate::mpm_sys;
    use crate::runner::{BatchOutcome, Runner, RunnerConfig};
    use crate::session::{Session, TraceFlags};

    const SSSD_SIZE: u64 = 256_256;
    const COMMON_CODE: u16 = 0xD000;

    fn new_session(banks: usize) -> Session {
        Session::new(banks, Arc::new(ConsolePool::new()), TraceFlags::default()).unwrap()
    }

    fn load_program(session: &mut Session, cpu: &mut Z80, address: u16, code: &[u8]) {
        session.memory_mut().load(0, address, code);
        cpu.set_pc(address);
        cpu.set_sp(0xF000);
    }

    fn run_until_halt(session: &mut Session, cpu: &mut Z80) {
        for _ in 0..10_000 {
            if cpu.is_halted() {
                return;
            }
            session.step(cpu, false);
        }
        panic!("guest did not halt, PC=0x{:04x}", cpu.pc());
    }

    fn disk_image(len: u64) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        file.as_file().set_len(len).unwrap();
        file
    }

    #[test]
    fn test_guest_reads_console_status() {
        let mut session = new_session(2);
        let mut cpu = Z80::new(false);
        let console = session.consoles.get(1).unwrap();
        console.set_connected(true);
        assert!(console.push_input(b'x'));

        #[rustfmt::skip]
        let code = [
            0x16, 0x01,       // LD D,1
            0x3E, 0x06,       // LD A,CONST
            0xD3, 0xE0,       // OUT (0xE0),A
            0x32, 0x00, 0xC2, // LD (0xC200),A
            0xDB, 0xE0,       // IN A,(0xE0)
            0x32, 0x01, 0xC2, // LD (0xC201),A
            0x76,             // HALT
        ];
        load_program(&mut session, &mut cpu, 0x0100, &code);
        run_until_halt(&mut session, &mut cpu);

        assert_eq!(session.memory().read_common(0xC200), 0xFF);
        assert_eq!(session.memory().read_common(0xC201), 0xFF);
    }

    #[test]
    fn test_guest_reads_sector_into_user_bank() {
        let img = disk_image(SSSD_SIZE);
        {
            // Logical record 1 of track 2 is physical sector 6
            let mut file = img.as_file();
            file.seek(SeekFrom::Start((2 * 26 + 6) * 128)).unwrap();
            file.write_all(&[0x5A; 128]).unwrap();
        }

        let mut session = new_session(3);
        let mut cpu = Z80::new(false);
        session.drives.mount(0, img.path(), false).unwrap();
        // Memory descriptor: base, size, attributes, bank
        session.memory_mut().load(0, 0xC100, &[0x00, 0xC0, 0x00, 0x02]);

        #[rustfmt::skip]
        let code = [
            0x01, 0x00, 0xC1, // LD BC,0xC100
            0x3E, 0x33,       // LD A,SELMEMORY
            0xD3, 0xE0,       // OUT (0xE0),A
            0x0E, 0x00,       // LD C,0
            0x3E, 0x1B,       // LD A,SELDSK
            0xD3, 0xE0,       // OUT (0xE0),A
            0x32, 0x01, 0xC2, // LD (0xC201),A
            0x21, 0x02, 0x00, // LD HL,2
            0x3E, 0x1E,       // LD A,SETTRK
            0xD3, 0xE0,       // OUT (0xE0),A
            0x21, 0x01, 0x00, // LD HL,1
            0x3E, 0x21,       // LD A,SETSEC
            0xD3, 0xE0,       // OUT (0xE0),A
            0x21, 0x80, 0x00, // LD HL,0x0080
            0x3E, 0x24,       // LD A,SETDMA
            0xD3, 0xE0,       // OUT (0xE0),A
            0x3E, 0x27,       // LD A,READ
            0xD3, 0xE0,       // OUT (0xE0),A
            0x32, 0x00, 0xC2, // LD (0xC200),A
            0x76,             // HALT
        ];
        load_program(&mut session, &mut cpu, COMMON_CODE, &code);
        run_until_halt(&mut session, &mut cpu);

        let memory = session.memory();
        assert_eq!(memory.current_bank(), 2);
        assert_eq!(memory.read_common(0xC201), 0x00);
        assert_eq!(memory.read_common(0xC200), 0x00);
        let mut buffer = [0u8; 128];
        memory.read_block(2, 0x0080, &mut buffer);
        assert_eq!(buffer, [0x5A; 128]);
        memory.read_block(0, 0x0080, &mut buffer);
        assert_eq!(buffer, [0x00; 128]);
    }

    #[test]
    fn test_guest_write_keeps_neighbour_records() {
        let img = disk_image(8_388_608);
        let mut session = new_session(1);
        let mut cpu = Z80::new(false);
        session.drives.mount(0, img.path(), false).unwrap();
        session.memory_mut().load(0, 0x0200, &[0x77; 128]);

        #[rustfmt::skip]
        let code = [
            0x0E, 0x00,       // LD C,0
            0x3E, 0x1B,       // LD A,SELDSK
            0xD3, 0xE0,       // OUT (0xE0),A
            0x21, 0x03, 0x00, // LD HL,3
            0x3E, 0x1E,       // LD A,SETTRK
            0xD3, 0xE0,       // OUT (0xE0),A
            0x21, 0x05, 0x00, // LD HL,5
            0x3E, 0x21,       // LD A,SETSEC
            0xD3, 0xE0,       // OUT (0xE0),A
            0x21, 0x00, 0x02, // LD HL,0x0200
            0x3E, 0x24,       // LD A,SETDMA
            0xD3, 0xE0,       // OUT (0xE0),A
            0x3E, 0x2A,       // LD A,WRITE
            0xD3, 0xE0,       // OUT (0xE0),A
            0x32, 0x00, 0xC2, // LD (0xC200),A
            0x76,             // HALT
        ];
        load_program(&mut session, &mut cpu, COMMON_CODE, &code);
        run_until_halt(&mut session, &mut cpu);
        assert_eq!(session.memory().read_common(0xC200), 0x00);

        // Records 4 to 7 share a 512 byte sector; only record 5 changed
        let content = fs::read(img.path()).unwrap();
        let sector = (3 * 16 + 1) * 512;
        assert!(content[sector..sector + 128].iter().all(|&b| b == 0));
        assert!(content[sector + 128..sector + 256].iter().all(|&b| b == 0x77));
        assert!(content[sector + 256..sector + 512].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_boot_from_disk_runs_sector_zero() {
        let img = disk_image(SSSD_SIZE);
        {
            #[rustfmt::skip]
            let boot = [
                0xF3,             // DI
                0x3E, 0x42,       // LD A,0x42
                0x32, 0x00, 0xC3, // LD (0xC300),A
                0x76,             // HALT
            ];
            let mut file = img.as_file();
            file.write_all(&boot).unwrap();
        }
        let mut session = new_session(2);
        let mut cpu = Z80::new(false);
        session.drives.mount(0, img.path(), true).unwrap();

        session.boot_from_disk(&mut cpu).unwrap();
        assert_eq!(cpu.pc(), 0x0000);
        assert_eq!(cpu.sp(), 0x0100);
        run_until_halt(&mut session, &mut cpu);
        assert_eq!(session.memory().read_common(0xC300), 0x42);
    }

    #[test]
    fn test_boot_without_disk_fails() {
        let mut session = new_session(1);
        let mut cpu = Z80::new(false);
        assert!(matches!(
            session.boot_from_disk(&mut cpu),
            Err(EmuError::NoBootDisk)
        ));
    }

    #[test]
    fn test_memory_image_starts_at_0100() {
        #[rustfmt::skip]
        let code = [
            0x3E, 0x99,       // LD A,0x99
            0xD3, 0xE0,       // OUT (0xE0),A  unknown function
            0x32, 0x00, 0xC6, // LD (0xC600),A
            0xDB, 0xE0,       // IN A,(0xE0)
            0x32, 0x01, 0xC6, // LD (0xC601),A
            0x76,             // HALT
        ];
        let mut image = vec![0u8; 0x0100];
        image.extend_from_slice(&code);
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), &image).unwrap();

        let mut session = new_session(1);
        let mut cpu = Z80::new(false);
        session.load_image(file.path(), &mut cpu).unwrap();
        assert_eq!(cpu.pc(), 0x0100);
        assert_eq!(cpu.sp(), 0x0080);
        run_until_halt(&mut session, &mut cpu);

        // Unknown calls leave the registers alone and return 0
        assert_eq!(session.memory().read_common(0xC600), 0x99);
        assert_eq!(session.memory().read_common(0xC601), 0x00);
    }

    #[test]
    fn test_oversized_memory_image_is_rejected() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), vec![0u8; 0x10001]).unwrap();
        let mut session = new_session(1);
        let mut cpu = Z80::new(false);
        assert!(matches!(
            session.load_image(file.path(), &mut cpu),
            Err(EmuError::BadImage { .. })
        ));
    }

    #[test]
    fn test_system_init_copies_vectors_to_every_bank() {
        let mut session = new_session(3);
        let mut cpu = Z80::new(false);
        session.memory_mut().load(0, 0x0038, &[0xC3, 0x34, 0x12]);

        #[rustfmt::skip]
        let code = [
            0x0E, 0x06,       // LD C,6
            0x11, 0x00, 0xE0, // LD DE,0xE000
            0x21, 0x00, 0x00, // LD HL,0
            0x3E, 0x45,       // LD A,SYSTEMINIT
            0xD3, 0xE0,       // OUT (0xE0),A
            0x76,             // HALT
        ];
        load_program(&mut session, &mut cpu, COMMON_CODE, &code);
        run_until_halt(&mut session, &mut cpu);

        let memory = session.memory();
        for bank in 0..3 {
            assert_eq!(memory.read_bank(bank, 0x0030), 0xC3);
            assert_eq!(memory.read_bank(bank, 0x0031), 0x00);
            assert_eq!(memory.read_bank(bank, 0x0032), 0xE0);
            assert_eq!(memory.read_bank(bank, 0x0038), 0xC3);
            assert_eq!(memory.read_bank(bank, 0x0039), 0x34);
        }
        assert!(session.xios.clock_enabled());
    }

    #[test]
    fn test_tick_interrupt_wakes_halted_guest() {
        let mut session = new_session(1);
        let mut cpu = Z80::new(false);

        #[rustfmt::skip]
        let handler = [
            0x3A, 0x00, 0xC4, // LD A,(0xC400)
            0x3C,             // INC A
            0x32, 0x00, 0xC4, // LD (0xC400),A
            0xFB,             // EI
            0xC9,             // RET
        ];
        session.memory_mut().load(0, 0x0038, &handler);
        #[rustfmt::skip]
        let code = [
            0x3E, 0x39,       // LD A,STARTCLOCK
            0xD3, 0xE0,       // OUT (0xE0),A
            0xFB,             // EI
            0x76,             // HALT
            0x18, 0xFD,       // JR -3
        ];
        load_program(&mut session, &mut cpu, 0x0100, &code);

        let clock = ManualClock::new();
        let config = RunnerConfig {
            batch_size: 100,
            ..Default::default()
        };
        let mut runner = Runner::new(cpu, clock, config);

        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Idle);
        assert!(session.xios.clock_enabled());
        for _ in 0..3 {
            runner.wait_idle();
            assert_eq!(runner.run_batch(&mut session), BatchOutcome::Idle);
        }
        assert_eq!(session.memory().read_common(0xC400), 3);
        assert_eq!(session.xios.ticks(), 3);
    }

    #[test]
    fn test_guest_halt_with_interrupts_disabled_deadlocks() {
        let mut session = new_session(1);
        let mut cpu = Z80::new(false);
        load_program(&mut session, &mut cpu, 0x0100, &[0xF3, 0x76]);
        let mut runner = Runner::new(cpu, ManualClock::new(), RunnerConfig::default());
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Deadlocked);
    }

    fn mpm_sys_image(bank_of_segment: u8, records: u8) -> Vec<u8> {
        let mut sysdat = [0u8; 256];
        sysdat[0] = 0xFF; // mem_top
        sysdat[1] = 2; // consoles
        sysdat[4] = 1; // bank switched
        sysdat[11] = 0xFE; // xdos
        sysdat[13] = 0xFE; // bnkxios
        sysdat[15] = 1; // one memory segment
        sysdat[16..20].copy_from_slice(&[0x00, 0xC0, 0x00, bank_of_segment]);
        sysdat[120] = records;
        sysdat[122] = 60;
        sysdat[124] = 0xC0;

        let mut image = sysdat.to_vec();
        // First record goes to the top, right below SYSTEM.DAT
        image.extend_from_slice(&[0xAA; 128]);
        #[rustfmt::skip]
        let mut entry = vec![
            0x3E, 0x42,       // LD A,MAXCONSOLE
            0xD3, 0xE0,       // OUT (0xE0),A
            0x32, 0x00, 0xC5, // LD (0xC500),A
            0x76,             // HALT
        ];
        entry.resize(128, 0);
        image.extend_from_slice(&entry);
        image
    }

    #[test]
    fn test_mpm_sys_load_and_run() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), mpm_sys_image(1, 4)).unwrap();
        let mut session = new_session(3);
        let mut cpu = Z80::new(false);

        let system = mpm_sys::load(&mut session, &mut cpu, file.path()).unwrap();
        assert_eq!(system.entry_point(), 0xFE00);
        assert_eq!(cpu.pc(), 0xFE00);
        assert_eq!(cpu.sp(), 0xFF00);
        assert_eq!(session.xios.base(), 0xFE00);
        assert_eq!(session.consoles.active_consoles(), 2);
        assert_eq!(session.memory().read_common(0xFE80), 0xAA);
        assert_eq!(session.memory().read_common(0xFF00), 0xFF);

        run_until_halt(&mut session, &mut cpu);
        assert_eq!(session.memory().read_common(0xC500), 2);
    }

    #[test]
    fn test_mpm_sys_segment_beyond_configured_banks() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), mpm_sys_image(3, 4)).unwrap();
        let mut session = new_session(2);
        let mut cpu = Z80::new(false);
        assert!(matches!(
            mpm_sys::load(&mut session, &mut cpu, file.path()),
            Err(EmuError::BadSystemImage { .. })
        ));
    }

    #[test]
    fn test_mpm_sys_rejects_bad_images() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), mpm_sys_image(1, 9)).unwrap();
        let mut session = new_session(3);
        let mut cpu = Z80::new(false);
        assert!(matches!(
            mpm_sys::load(&mut session, &mut cpu, file.path()),
            Err(EmuError::BadSystemImage { .. })
        ));

        let mut low = mpm_sys_image(1, 4);
        low[0] = 0x80;
        fs::write(file.path(), low).unwrap();
        assert!(matches!(
            mpm_sys::load(&mut session, &mut cpu, file.path()),
            Err(EmuError::BadSystemImage { .. })
        ));

        fs::write(file.path(), [0u8; 100]).unwrap();
        assert!(matches!(
            mpm_sys::load(&mut session, &mut cpu, file.path()),
            Err(EmuError::BadSystemImage { .. })
        ));
    }
}
