use iz80::{Cpu, Machine, Reg16, Reg8, Registers};

use crate::machine::MpmMachine;
use crate::xios_call::RegisterFile;

/// Mode 1 interrupts vector here.
pub const INTERRUPT_VECTOR: u16 = 0x0038;

const OP_DI: u8 = 0xF3;
const OP_EI: u8 = 0xFB;
const OP_HALT: u8 = 0x76;

/// The guest processor as the runner and the dispatcher see it.
pub trait GuestCpu {
    /// Execute one instruction. With `irq` raised, a deliverable interrupt
    /// is taken instead; returns true in that case.
    fn step(&mut self, machine: &mut MpmMachine, irq: bool) -> bool;
    fn is_halted(&self) -> bool;
    fn interrupts_enabled(&self) -> bool;
    fn enable_interrupts(&mut self);
    fn registers(&mut self) -> &mut dyn RegisterFile;
    fn set_pc(&mut self, pc: u16);
    fn set_sp(&mut self, sp: u16);
}

impl RegisterFile for Registers {
    fn a(&self) -> u8 {
        self.get8(Reg8::A)
    }

    fn set_a(&mut self, value: u8) {
        self.set8(Reg8::A, value);
    }

    fn bc(&self) -> u16 {
        self.get16(Reg16::BC)
    }

    fn de(&self) -> u16 {
        self.get16(Reg16::DE)
    }

    fn hl(&self) -> u16 {
        self.get16(Reg16::HL)
    }

    fn set_hl(&mut self, value: u16) {
        self.set16(Reg16::HL, value);
    }

    fn pc(&self) -> u16 {
        Registers::pc(self)
    }
}

/*
Z80 on top of iz80.

Maskable interrupts are delivered by hand: push PC and jump to the
vector. MP/M runs in interrupt mode 1, so the vector is always RST 38H. The interrupt enable flip-flop
and the HALT state are kept here, from the EI, DI and HALT opcodes, so
that a halted CPU can be woken by the tick.
*/
pub struct Z80 {
    cpu: Cpu,
    iff: bool,
    ei_pending: bool,
    halted: bool,
}

impl Z80 {
    pub fn new(trace: bool) -> Z80 {
        let mut cpu = Cpu::new_z80();
        cpu.set_trace(trace);
        Z80 {
            cpu,
            iff: false,
            ei_pending: false,
            halted: false,
        }
    }

    pub fn pc(&mut self) -> u16 {
        self.cpu.registers().pc()
    }

    pub fn sp(&mut self) -> u16 {
        self.cpu.registers().get16(Reg16::SP)
    }

    fn interrupt(&mut self, machine: &mut MpmMachine) {
        self.halted = false;
        self.iff = false;
        let regs = self.cpu.registers();
        let pc = regs.pc();
        let sp = regs.get16(Reg16::SP).wrapping_sub(2);
        regs.set16(Reg16::SP, sp);
        machine.poke(sp, pc as u8);
        machine.poke(sp.wrapping_add(1), (pc >> 8) as u8);
        regs.set_pc(INTERRUPT_VECTOR);
    }
}

impl GuestCpu for Z80 {
    fn step(&mut self, machine: &mut MpmMachine, irq: bool) -> bool {
        // One more instruction runs after EI before an interrupt is taken
        if irq && self.iff && !self.ei_pending {
            self.interrupt(machine);
            return true;
        }
        self.ei_pending = false;
        if self.halted {
            return false;
        }

        let pc = self.cpu.registers().pc();
        match machine.peek(pc) {
            OP_HALT => {
                self.halted = true;
                self.cpu.registers().set_pc(pc.wrapping_add(1));
            }
            OP_EI => {
                self.cpu.execute_instruction(machine);
                self.iff = true;
                self.ei_pending = true;
            }
            OP_DI => {
                self.cpu.execute_instruction(machine);
                self.iff = false;
            }
            _ => self.cpu.execute_instruction(machine),
        }
        false
    }

    fn is_halted(&self) -> bool {
        self.halted
    }

    fn interrupts_enabled(&self) -> bool {
        self.iff
    }

    fn enable_interrupts(&mut self) {
        self.iff = true;
        self.ei_pending = true;
    }

    fn registers(&mut self) -> &mut dyn RegisterFile {
        self.cpu.registers()
    }

    fn set_pc(&mut self, pc: u16) {
        self.cpu.registers().set_pc(pc);
    }

    fn set_sp(&mut self, sp: u16) {
        self.cpu.registers().set16(Reg16::SP, sp);
    }
}
