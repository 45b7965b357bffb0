//! The emulation environment: guest RAM plus the bridges, the execution
//! state machine, and the run loop that drives a CPU core in quanta.

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::cpu::{Bus, CpuCore, Registers, TrapHost};
use crate::errno::MinixError;
use crate::executable::{EXECUTABLE_BASE, STACK_BASE};
use crate::filesystem::FileBridge;
use crate::process::{self, ProcessBridge, MINIX_SIG_DFL, MINIX_SIG_ERR, MINIX_SIG_IGN};
use crate::ram::GuestRam;
use crate::syscall::SysCallResult;

/// How many cycles the CPU runs per quantum before pending signals get a
/// chance to be delivered.
pub const CYCLES_PER_QUANTUM: u32 = 10_000;

/// Where the execution environment stands.
///
/// Only these transitions are legal: Started→Ready (startup exec), Ready→
/// Running (CPU reset), Running→Ready (in-guest exec), Running→Finished
/// (exit), and Finished→Finished (exit may be reported more than once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Started,
    Ready,
    Running,
    Finished,
}

/// Everything the translation core owns: RAM, the bridges, the execution
/// state, and the program break. One `System` is one guest process.
pub struct System {
    pub ram: GuestRam,
    pub fs: FileBridge,
    pub procs: ProcessBridge,
    state: ExecutionState,
    exit_status: i32,
    /// Current program break; monotonically non-decreasing.
    pub(crate) current_break: u32,
}

impl System {
    pub fn new(fs: FileBridge, procs: ProcessBridge) -> Self {
        Self {
            ram: GuestRam::new(),
            fs,
            procs,
            state: ExecutionState::Started,
            exit_status: 0,
            current_break: 0,
        }
    }

    /// A system configured entirely from the environment, as the binary
    /// does it.
    pub fn from_env() -> Self {
        Self::new(FileBridge::from_env(), ProcessBridge::new())
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn change_state(&mut self, state: ExecutionState) {
        use ExecutionState::*;
        assert!(
            matches!(
                (self.state, state),
                (Started, Ready) | (Ready, Running) | (Running, Ready) | (Running, Finished) | (Finished, Finished)
            ),
            "illegal execution state transition {:?} -> {:?}",
            self.state,
            state
        );
        self.state = state;
    }

    /// Record the guest's exit status and finish execution. Idempotent,
    /// since exit(2) can arrive more than once before the loop notices.
    pub fn exit(&mut self, status: i32) {
        self.exit_status = status;
        self.change_state(ExecutionState::Finished);
    }

    /// Perform the startup exec: load the tool, lay its argv/envp snapshot
    /// at the stack base, and arm the CPU for reset.
    pub fn exec_startup(
        &mut self,
        path: &str,
        args: &[String],
        env: &[String],
    ) -> Result<(), MinixError> {
        process::exec_with_host_params(&self.fs, &mut self.ram, path, args, env)?;
        self.change_state(ExecutionState::Ready);
        Ok(())
    }

    /// Install the only two vectors the environment uses: SSP at 0x000 and
    /// the initial PC at 0x004.
    pub fn install_reset_vectors(&mut self) {
        self.ram.write_32(0x000000, STACK_BASE);
        self.ram.write_32(0x000004, EXECUTABLE_BASE);
    }

    /// Deliver one pending guest signal, if any, by running its recorded
    /// handler on the guest stack. Never called from host signal context.
    pub fn deliver_pending_signal(&mut self, regs: &mut Registers) {
        let Some(signal) = self.procs.take_pending_signal() else {
            return;
        };

        match self.procs.handler(signal) {
            MINIX_SIG_IGN => {}
            MINIX_SIG_DFL => {
                // Default disposition: the guest dies with the signal.
                debug!(signal, "pending signal with default disposition, terminating");
                self.exit(128 + signal as i32);
            }
            MINIX_SIG_ERR => {}
            handler => {
                // Push the signal number and the resume address, then enter
                // the handler; its RTS resumes the interrupted code.
                debug!(signal, handler, "delivering signal to guest handler");
                let mut sp = regs.a[7];
                sp -= 2;
                self.ram.write_16(sp, signal as u16);
                sp -= 4;
                self.ram.write_32(sp, regs.pc);
                regs.a[7] = sp;
                regs.pc = handler;
            }
        }
    }
}

impl Bus for System {
    fn read_8(&mut self, addr: u32) -> u8 {
        self.ram.read_8(addr)
    }
    fn read_16(&mut self, addr: u32) -> u16 {
        self.ram.read_16(addr)
    }
    fn read_32(&mut self, addr: u32) -> u32 {
        self.ram.read_32(addr)
    }
    fn write_8(&mut self, addr: u32, value: u8) {
        self.ram.write_8(addr, value)
    }
    fn write_16(&mut self, addr: u32, value: u16) {
        self.ram.write_16(addr, value)
    }
    fn write_32(&mut self, addr: u32, value: u32) {
        self.ram.write_32(addr, value)
    }
}

impl TrapHost for System {
    /// TRAP #0 is the system call gate: D0.w carries the send/receive
    /// function, D1.w the source/destination task, A0 the message address.
    /// Every other trap is left to the CPU's default processing.
    fn trap(&mut self, vector: u32, regs: &mut Registers) -> bool {
        if vector != 0 {
            return false;
        }

        let func = regs.d[0] as u16;
        let src_dest = regs.d[1] as u16 as i16;
        let msg_addr = regs.a[0];

        match self.system_call(func, src_dest, msg_addr) {
            SysCallResult::Success(value) => regs.d[0] = value.to_be(),
            SysCallResult::SuccessEmpty => regs.d[0] = 0x0000_0000,
            SysCallResult::Failure => regs.d[0] = 0xFFFF_FFFF,
        }

        true
    }

    fn halt_requested(&self) -> bool {
        // Stop the timeslice once the guest has exited or re-executed; the
        // run loop takes it from there.
        !matches!(self.state, ExecutionState::Running)
    }
}

/// The run loop: a CPU core wired to a `System`, driven until the guest
/// finishes.
pub struct Machine<C: CpuCore> {
    pub system: System,
    pub cpu: C,
    tool: String,
    args: Vec<String>,
    env: Vec<String>,
}

impl<C: CpuCore> Machine<C> {
    pub fn new(system: System, cpu: C, tool: String, args: Vec<String>, env: Vec<String>) -> Self {
        Self {
            system,
            cpu,
            tool,
            args,
            env,
        }
    }

    /// Drive the state machine to completion and return the guest's exit
    /// status.
    pub fn run(&mut self) -> Result<i32> {
        loop {
            match self.system.state() {
                ExecutionState::Started => {
                    self.system
                        .exec_startup(&self.tool, &self.args, &self.env)
                        .map_err(|err| anyhow::anyhow!("{err}"))
                        .with_context(|| format!("failed to execute {}", self.tool))?;
                }

                ExecutionState::Ready => {
                    // Arm the CPU: vectors in, status register cleared,
                    // reset pulsed so SSP and PC load from the vectors.
                    self.system.install_reset_vectors();
                    self.cpu.registers_mut().sr = 0;
                    self.cpu.pulse_reset(&mut self.system);
                    self.system.change_state(ExecutionState::Running);
                }

                ExecutionState::Running => {
                    self.cpu
                        .execute(&mut self.system, CYCLES_PER_QUANTUM)
                        .map_err(|err| {
                            warn!(%err, "CPU fault");
                            err
                        })?;

                    if self.system.state() == ExecutionState::Running {
                        self.system
                            .deliver_pending_signal(self.cpu.registers_mut());
                    }
                }

                ExecutionState::Finished => break,
            }
        }

        Ok(self.system.exit_status())
    }
}
