use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::clock::Clock;
use crate::cpu::GuestCpu;
use crate::session::Session;

pub const DEFAULT_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_TICK_HZ: u32 = 60;
pub const DEFAULT_TICKS_PER_SECOND: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The whole batch ran.
    Completed,
    /// The guest is halted waiting for an interrupt that is not due yet.
    Idle,
    Stopped,
    TimedOut,
    /// Halted with interrupts disabled: nothing can wake the guest.
    Deadlocked,
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub batch_size: usize,
    pub tick_hz: u32,
    /// Ticks between two slow ticks.
    pub ticks_per_second: u32,
    pub timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            batch_size: DEFAULT_BATCH_SIZE,
            tick_hz: DEFAULT_TICK_HZ,
            ticks_per_second: DEFAULT_TICKS_PER_SECOND,
            timeout: None,
        }
    }
}

/// Runs the guest in batches and paces the system tick on `clock`.
pub struct Runner<C: GuestCpu, K: Clock> {
    pub cpu: C,
    clock: K,
    config: RunnerConfig,
    tick_interval: Duration,
    started: Duration,
    next_tick: Duration,
    tick_count: u32,
    irq_pending: bool,
    instructions: u64,
    stop: Arc<AtomicBool>,
}

impl<C: GuestCpu, K: Clock> Runner<C, K> {
    pub fn new(cpu: C, clock: K, config: RunnerConfig) -> Runner<C, K> {
        let now = clock.now();
        let tick_interval = Duration::from_secs(1) / config.tick_hz.max(1);
        Runner {
            cpu,
            clock,
            config,
            tick_interval,
            started: now,
            next_tick: now,
            tick_count: 0,
            irq_pending: false,
            instructions: 0,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the runner at the next batch boundary. May be set
    /// from any thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    pub fn interrupt_requested(&self) -> bool {
        self.irq_pending
    }

    fn check_tick(&mut self, session: &mut Session, now: Duration) {
        if now < self.next_tick {
            return;
        }
        self.next_tick = now + self.tick_interval;

        if session.xios.clock_enabled() {
            self.irq_pending = true;
            session.xios.tick();
        }

        self.tick_count += 1;
        if self.tick_count >= self.config.ticks_per_second {
            self.tick_count = 0;
            session.xios.one_second_tick();
        }
    }

    pub fn run_batch(&mut self, session: &mut Session) -> BatchOutcome {
        if self.stop.load(Ordering::Acquire) {
            return BatchOutcome::Stopped;
        }

        for _ in 0..self.config.batch_size {
            let now = self.clock.now();
            if let Some(timeout) = self.config.timeout {
                if now.saturating_sub(self.started) >= timeout {
                    return BatchOutcome::TimedOut;
                }
            }
            self.check_tick(session, now);

            if self.cpu.is_halted() {
                if !self.cpu.interrupts_enabled() {
                    return BatchOutcome::Deadlocked;
                }
                if !self.irq_pending {
                    return BatchOutcome::Idle;
                }
            }

            if session.step(&mut self.cpu, self.irq_pending) {
                self.irq_pending = false;
            }
            self.instructions += 1;
        }
        BatchOutcome::Completed
    }

    /// Sleep until the next tick is due.
    pub fn wait_idle(&self) {
        let now = self.clock.now();
        if self.next_tick > now {
            self.clock.sleep(self.next_tick - now);
        }
    }

    /// Run until stopped, timed out or deadlocked. `between_batches` runs
    /// after every batch; returning false from it stops the run.
    pub fn run<F>(&mut self, session: &mut Session, mut between_batches: F) -> BatchOutcome
    where
        F: FnMut(&mut Session) -> bool,
    {
        loop {
            let outcome = self.run_batch(session);
            match outcome {
                BatchOutcome::Completed => {}
                BatchOutcome::Idle => self.wait_idle(),
                BatchOutcome::Stopped => {
                    info!("Stopped after {} instructions", self.instructions);
                    return outcome;
                }
                BatchOutcome::TimedOut => {
                    info!("Timed out after {} instructions", self.instructions);
                    return outcome;
                }
                BatchOutcome::Deadlocked => {
                    error!("HALT instruction that will never be interrupted");
                    return outcome;
                }
            }
            if !between_batches(session) {
                debug!("Run ended by the host");
                self.request_stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::console::ConsolePool;
    use crate::machine::{MpmMachine, PORT_XIOS_DISPATCH};
    use crate::session::TraceFlags;
    use crate::xios_call::tests::TestRegisters;
    use crate::xios_call::{RegisterFile, XiosFunction};
    use iz80::Machine;
    use std::collections::VecDeque;

    const TICK: Duration = Duration::from_nanos(1_000_000_000 / 60);

    /// Executes NOPs, or the dispatch calls queued in `calls`, one per step.
    #[derive(Default)]
    struct FakeCpu {
        regs: TestRegisters,
        calls: VecDeque<u8>,
        halted: bool,
        iff: bool,
        interrupts: u32,
        steps: u32,
    }

    impl GuestCpu for FakeCpu {
        fn step(&mut self, machine: &mut MpmMachine, irq: bool) -> bool {
            if irq && self.iff {
                self.interrupts += 1;
                self.halted = false;
                self.iff = false;
                return true;
            }
            if self.halted {
                return false;
            }
            self.steps += 1;
            self.regs.pc = self.regs.pc.wrapping_add(1);
            if let Some(code) = self.calls.pop_front() {
                machine.port_out(PORT_XIOS_DISPATCH as u16, code);
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
        }

        fn registers(&mut self) -> &mut dyn RegisterFile {
            &mut self.regs
        }

        fn set_pc(&mut self, pc: u16) {
            self.regs.pc = pc;
        }

        fn set_sp(&mut self, _sp: u16) {}
    }

    fn setup(batch_size: usize) -> (Runner<FakeCpu, ManualClock>, Session, ManualClock) {
        let clock = ManualClock::new();
        let config = RunnerConfig {
            batch_size,
            ..Default::default()
        };
        let runner = Runner::new(FakeCpu::default(), clock.clone(), config);
        let session =
            Session::new(2, Arc::new(ConsolePool::new()), TraceFlags::default()).unwrap();
        (runner, session, clock)
    }

    #[test]
    fn test_batch_runs_batch_size_instructions() {
        let (mut runner, mut session, _) = setup(100);
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Completed);
        assert_eq!(runner.instructions(), 100);
        assert_eq!(runner.cpu.steps, 100);
    }

    #[test]
    fn test_no_interrupt_while_clock_stopped() {
        let (mut runner, mut session, clock) = setup(10);
        runner.cpu.iff = true;
        for _ in 0..5 {
            runner.run_batch(&mut session);
            clock.advance(TICK);
        }
        assert!(!runner.interrupt_requested());
        assert_eq!(runner.cpu.interrupts, 0);
        assert_eq!(session.xios.ticks(), 0);
    }

    #[test]
    fn test_start_clock_enables_tick_interrupt() {
        let (mut runner, mut session, clock) = setup(10);
        runner.cpu.iff = true;
        runner.cpu.calls.push_back(XiosFunction::StartClock as u8);
        runner.run_batch(&mut session);
        assert!(session.xios.clock_enabled());

        clock.advance(TICK);
        runner.run_batch(&mut session);
        assert_eq!(runner.cpu.interrupts, 1);
        assert_eq!(session.xios.ticks(), 1);
        assert!(!runner.interrupt_requested());
    }

    #[test]
    fn test_start_then_stop_clock_suppresses_tick() {
        let (mut runner, mut session, clock) = setup(1);
        runner.cpu.iff = true;
        runner.cpu.calls.push_back(XiosFunction::StartClock as u8);
        runner.cpu.calls.push_back(XiosFunction::StopClock as u8);

        runner.run_batch(&mut session);
        assert!(session.xios.clock_enabled());
        runner.run_batch(&mut session);
        assert!(!session.xios.clock_enabled());

        clock.advance(TICK);
        runner.run_batch(&mut session);
        assert!(!runner.interrupt_requested());
        assert_eq!(runner.cpu.interrupts, 0);
    }

    #[test]
    fn test_interrupt_waits_for_guest_enable() {
        let (mut runner, mut session, _) = setup(10);
        session.xios.state.clock_enabled = true;
        runner.run_batch(&mut session);
        assert!(runner.interrupt_requested());
        assert_eq!(runner.cpu.interrupts, 0);

        runner.cpu.calls.push_back(XiosFunction::ExitRegion as u8);
        runner.run_batch(&mut session);
        assert_eq!(runner.cpu.interrupts, 1);
        assert!(!runner.interrupt_requested());
    }

    #[test]
    fn test_halted_guest_yields_until_tick() {
        let (mut runner, mut session, clock) = setup(1000);
        session.xios.state.clock_enabled = true;
        // Consume the tick due at start
        runner.run_batch(&mut session);
        runner.cpu.iff = true;
        runner.cpu.halted = true;
        runner.run_batch(&mut session);
        assert_eq!(runner.cpu.interrupts, 1);

        runner.cpu.iff = true;
        runner.cpu.halted = true;
        let before = runner.instructions();
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Idle);
        assert_eq!(runner.instructions(), before);

        runner.wait_idle();
        assert!(clock.now() >= TICK);
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Completed);
        assert_eq!(runner.cpu.interrupts, 2);
        assert!(!runner.cpu.halted);
    }

    #[test]
    fn test_halt_with_interrupts_disabled_is_a_deadlock() {
        let (mut runner, mut session, _) = setup(10);
        runner.cpu.halted = true;
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Deadlocked);
    }

    #[test]
    fn test_stop_flag_checked_at_batch_boundary() {
        let (mut runner, mut session, _) = setup(50);
        let stop = runner.stop_handle();
        runner.run_batch(&mut session);
        stop.store(true, Ordering::Release);
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Stopped);
        assert_eq!(runner.instructions(), 50);
    }

    #[test]
    fn test_timeout_uses_injected_clock() {
        let clock = ManualClock::new();
        let config = RunnerConfig {
            batch_size: 10,
            timeout: Some(Duration::from_secs(2)),
            ..Default::default()
        };
        let mut runner = Runner::new(FakeCpu::default(), clock.clone(), config);
        let mut session =
            Session::new(1, Arc::new(ConsolePool::new()), TraceFlags::default()).unwrap();
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::Completed);
        clock.advance(Duration::from_secs(2));
        assert_eq!(runner.run_batch(&mut session), BatchOutcome::TimedOut);
    }

    #[test]
    fn test_slow_tick_every_ticks_per_second() {
        let clock = ManualClock::new();
        let config = RunnerConfig {
            batch_size: 1,
            ticks_per_second: 3,
            ..Default::default()
        };
        let mut runner = Runner::new(FakeCpu::default(), clock.clone(), config);
        let mut session =
            Session::new(1, Arc::new(ConsolePool::new()), TraceFlags::default()).unwrap();
        for _ in 0..7 {
            runner.run_batch(&mut session);
            clock.advance(TICK);
        }
        assert_eq!(session.xios.seconds(), 2);
    }

    #[test]
    fn test_run_sleeps_while_idle_until_timeout() {
        let clock = ManualClock::new();
        let config = RunnerConfig {
            batch_size: 100,
            timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let mut runner = Runner::new(FakeCpu::default(), clock.clone(), config);
        let mut session =
            Session::new(1, Arc::new(ConsolePool::new()), TraceFlags::default()).unwrap();
        runner.cpu.iff = true;
        runner.cpu.halted = true;

        let mut batches = 0;
        let outcome = runner.run(&mut session, |_| {
            batches += 1;
            true
        });
        assert_eq!(outcome, BatchOutcome::TimedOut);
        assert!(clock.now() >= Duration::from_secs(1));
        assert!(batches >= 59);
        assert_eq!(runner.instructions(), 0);
    }

    #[test]
    fn test_run_ends_when_host_says_so() {
        let (mut runner, mut session, _) = setup(10);
        let outcome = runner.run(&mut session, |_| false);
        assert_eq!(outcome, BatchOutcome::Stopped);
        assert_eq!(runner.instructions(), 10);
    }
}
