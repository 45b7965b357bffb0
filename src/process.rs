//! The process bridge: PIDs, fork/wait/kill, signals, and exec.
//!
//! MINIX uses 16-bit PIDs while the host may use 32 or 64 bits, so a mapping
//! table is kept. The table pretends the tool was spawned at the end of the
//! usual MINIX login chain: init (2) started sh (3) for /etc/rc, which led
//! to getty (4) and login (5), which started the user's sh (6) — us. The
//! first child we fork therefore gets pid 7.

use std::sync::atomic::{AtomicI32, Ordering};

use tracing::debug;

use crate::errno::MinixError;
use crate::executable::{self, EXECUTABLE_BASE, STACK_BASE};
use crate::filesystem::FileBridge;
use crate::ram::GuestRam;

/// MINIX signal numbers 1..=16.
pub const MINIX_SIGHUP: i16 = 1;
pub const MINIX_SIGINT: i16 = 2;
pub const MINIX_SIGQUIT: i16 = 3;
pub const MINIX_SIGILL: i16 = 4;
pub const MINIX_SIGTRAP: i16 = 5;
pub const MINIX_SIGABRT: i16 = 6;
pub const MINIX_SIGUNUSED: i16 = 7;
pub const MINIX_SIGFPE: i16 = 8;
pub const MINIX_SIGKILL: i16 = 9;
pub const MINIX_SIGUSR1: i16 = 10;
pub const MINIX_SIGSEGV: i16 = 11;
pub const MINIX_SIGUSR2: i16 = 12;
pub const MINIX_SIGPIPE: i16 = 13;
pub const MINIX_SIGALRM: i16 = 14;
pub const MINIX_SIGTERM: i16 = 15;
pub const MINIX_SIGSTKFLT: i16 = 16;

pub const SIGNAL_COUNT: usize = 16;

/// Guest-side handler sentinels.
pub const MINIX_SIG_DFL: u32 = 0x0000_0000;
pub const MINIX_SIG_IGN: u32 = 0x0000_0001;
pub const MINIX_SIG_ERR: u32 = 0xFFFF_FFFF;

/// The guest pid of the initial process (the login shell) and its pretend
/// parent (login). The first pid allocated by fork is 7.
const SELF_PID: i16 = 6;
const PSEUDO_PARENT_PID: i16 = 5;

/// MINIX sizes its own process table at 32 (`NR_PROCS`); start there and
/// grow by half when exhausted.
const INITIAL_TABLE_SIZE: usize = 32;

/// The one pending guest signal, recorded by host signal handlers and
/// drained by the run loop between quanta. Two signals landing in the same
/// quantum race for the slot; the last writer wins.
static PENDING_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_pending_signal(host_signal: libc::c_int) {
    let minix_signal = minix_signal_for_host(host_signal);
    if minix_signal != 0 {
        PENDING_SIGNAL.store(minix_signal as i32, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PidMapping {
    host_pid: libc::pid_t,
    guest_pid: i16,
}

pub struct ProcessBridge {
    /// Slot 0 is always "self", slot 1 the parent; a free slot has host pid 0.
    table: Vec<PidMapping>,
    next_pid: i16,
    handlers: [u32; SIGNAL_COUNT],
}

impl ProcessBridge {
    pub fn new() -> Self {
        let mut table = vec![PidMapping::default(); INITIAL_TABLE_SIZE];

        table[0] = PidMapping {
            host_pid: unsafe { libc::getpid() },
            guest_pid: SELF_PID,
        };
        table[1] = PidMapping {
            host_pid: unsafe { libc::getppid() },
            guest_pid: PSEUDO_PARENT_PID,
        };

        Self {
            table,
            next_pid: SELF_PID + 1,
            handlers: [MINIX_SIG_DFL; SIGNAL_COUNT],
        }
    }

    /// The guest pid and parent pid of the running process.
    pub fn process_ids(&self) -> (i16, i16) {
        (self.table[0].guest_pid, self.table[1].guest_pid)
    }

    fn guest_pid_for_host(&self, host_pid: libc::pid_t) -> i16 {
        self.table
            .iter()
            .find(|m| m.host_pid == host_pid)
            .map(|m| m.guest_pid)
            .unwrap_or(-1)
    }

    fn host_pid_for_guest(&self, guest_pid: i16) -> Option<libc::pid_t> {
        self.table
            .iter()
            .find(|m| m.guest_pid == guest_pid && m.host_pid != 0)
            .map(|m| m.host_pid)
    }

    /// Index of the next free table slot, growing the table by half when
    /// every slot is taken.
    fn next_free_entry(&mut self) -> usize {
        for (i, mapping) in self.table.iter().enumerate().skip(2) {
            if mapping.host_pid == 0 {
                return i;
            }
        }

        let old_size = self.table.len();
        self.table
            .resize(old_size + old_size / 2, PidMapping::default());
        old_size
    }

    /// Fork the host process. The table slot and the child's guest pid are
    /// reserved before forking so parent and child start from the same view;
    /// afterwards the tables diverge (the child cannot see later updates to
    /// the parent's table, and vice versa).
    pub fn fork(&mut self) -> Result<i16, MinixError> {
        let slot = self.next_free_entry();
        let child_guest_pid = self.next_pid;
        self.next_pid += 1;

        let child_host_pid = unsafe { libc::fork() };

        if child_host_pid == -1 {
            // No child; undo the pid reservation.
            self.next_pid -= 1;
            return Err(MinixError::last_os());
        }

        if child_host_pid != 0 {
            // Parent: record the child in the reserved slot.
            self.table[slot] = PidMapping {
                host_pid: child_host_pid,
                guest_pid: child_guest_pid,
            };
            Ok(child_guest_pid)
        } else {
            // Child: keep the grandparent in the reserved slot so nothing is
            // lost, then shuffle: old self becomes the parent, and the new
            // identity takes slot 0.
            self.table[slot] = self.table[1];
            self.table[1] = self.table[0];
            self.table[0] = PidMapping {
                host_pid: unsafe { libc::getpid() },
                guest_pid: child_guest_pid,
            };
            Ok(0)
        }
    }

    /// Wait for any child; returns the child's guest pid and its MINIX exit
    /// status.
    pub fn wait(&mut self) -> Result<(i16, i16), MinixError> {
        let mut host_status: libc::c_int = 0;
        let host_pid = unsafe { libc::wait(&mut host_status) };
        if host_pid == -1 {
            return Err(MinixError::last_os());
        }

        Ok((
            self.guest_pid_for_host(host_pid),
            minix_status_for_host(host_status),
        ))
    }

    /// Record a guest signal handler and arrange for the matching host
    /// signal to be trampolined back. Returns the previous guest handler.
    ///
    /// A real handler address never runs from host signal context; the host
    /// handler only records the signal, and the run loop delivers it to the
    /// guest between quanta.
    pub fn signal(&mut self, signal: i16, handler: u32) -> Result<u32, MinixError> {
        if !(MINIX_SIGHUP..=MINIX_SIGSTKFLT).contains(&signal) {
            return Err(MinixError::Einval);
        }

        let index = (signal - 1) as usize;
        let mut old_handler = self.handlers[index];
        self.handlers[index] = handler;

        if handler == MINIX_SIG_ERR {
            // Nothing sensible to install on the host for the error
            // sentinel; record it and leave the host handler alone.
            return Ok(old_handler);
        }

        let host_signal = host_signal_for_minix(signal);
        let trampoline: extern "C" fn(libc::c_int) = record_pending_signal;
        let host_handler: libc::sighandler_t = match handler {
            MINIX_SIG_IGN => libc::SIG_IGN,
            _ => trampoline as libc::sighandler_t,
        };

        let old_host_handler = unsafe { libc::signal(host_signal, host_handler) };

        if old_host_handler == libc::SIG_DFL {
            old_handler = MINIX_SIG_DFL;
        } else if old_host_handler == libc::SIG_IGN {
            old_handler = MINIX_SIG_IGN;
        } else if old_host_handler == libc::SIG_ERR {
            old_handler = MINIX_SIG_ERR;
        }

        Ok(old_handler)
    }

    /// The recorded guest handler for a signal.
    pub fn handler(&self, signal: i16) -> u32 {
        assert!((MINIX_SIGHUP..=MINIX_SIGSTKFLT).contains(&signal));
        self.handlers[(signal - 1) as usize]
    }

    /// Send a guest signal to a guest process.
    pub fn kill(&self, guest_pid: i16, signal: i16) -> Result<i16, MinixError> {
        if !(MINIX_SIGHUP..=MINIX_SIGSTKFLT).contains(&signal) {
            return Err(MinixError::Einval);
        }

        let host_signal = host_signal_for_minix(signal);
        let host_pid = self
            .host_pid_for_guest(guest_pid)
            .ok_or(MinixError::Esrch)?;

        let result = unsafe { libc::kill(host_pid, host_signal) };
        if result == -1 {
            Err(MinixError::last_os())
        } else {
            Ok(0)
        }
    }

    /// Take the pending signal, if any.
    pub fn take_pending_signal(&self) -> Option<i16> {
        match PENDING_SIGNAL.swap(0, Ordering::SeqCst) {
            0 => None,
            signal => Some(signal as i16),
        }
    }
}

impl Default for ProcessBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a host wait status the way MINIX does: low byte zero with the exit
/// code for a normal exit, `(signal << 8) | 0177` for a stop, the signal in
/// the high byte for a kill. Anything else is reported as death by SIGKILL.
pub fn minix_status_for_host(host_status: libc::c_int) -> i16 {
    if libc::WIFEXITED(host_status) {
        (libc::WEXITSTATUS(host_status) & 0xFF) as i16
    } else if libc::WIFSTOPPED(host_status) {
        ((libc::WSTOPSIG(host_status) as i16) << 8) | 0o177
    } else if libc::WIFSIGNALED(host_status) {
        (libc::WTERMSIG(host_status) as i16) << 8
    } else {
        MINIX_SIGKILL
    }
}

/// The host signal for a MINIX signal. The two MINIX signals with no host
/// equivalent map to benign host signals we never otherwise see.
pub fn host_signal_for_minix(signal: i16) -> libc::c_int {
    match signal {
        MINIX_SIGHUP => libc::SIGHUP,
        MINIX_SIGINT => libc::SIGINT,
        MINIX_SIGQUIT => libc::SIGQUIT,
        MINIX_SIGILL => libc::SIGILL,
        MINIX_SIGTRAP => libc::SIGTRAP,
        MINIX_SIGABRT => libc::SIGABRT,
        MINIX_SIGUNUSED => libc::SIGXFSZ,
        MINIX_SIGFPE => libc::SIGFPE,
        MINIX_SIGKILL => libc::SIGKILL,
        MINIX_SIGUSR1 => libc::SIGUSR1,
        MINIX_SIGSEGV => libc::SIGSEGV,
        MINIX_SIGUSR2 => libc::SIGUSR2,
        MINIX_SIGPIPE => libc::SIGPIPE,
        MINIX_SIGALRM => libc::SIGALRM,
        MINIX_SIGTERM => libc::SIGTERM,
        MINIX_SIGSTKFLT => libc::SIGXCPU,
        _ => unreachable!("signal {signal} out of range"),
    }
}

/// The MINIX signal for a host signal, or 0 when MINIX has no equivalent.
pub fn minix_signal_for_host(host_signal: libc::c_int) -> i16 {
    match host_signal {
        libc::SIGHUP => MINIX_SIGHUP,
        libc::SIGINT => MINIX_SIGINT,
        libc::SIGQUIT => MINIX_SIGQUIT,
        libc::SIGILL => MINIX_SIGILL,
        libc::SIGTRAP => MINIX_SIGTRAP,
        libc::SIGABRT => MINIX_SIGABRT,
        libc::SIGXFSZ => MINIX_SIGUNUSED,
        libc::SIGFPE => MINIX_SIGFPE,
        libc::SIGKILL => MINIX_SIGKILL,
        libc::SIGUSR1 => MINIX_SIGUSR1,
        libc::SIGSEGV => MINIX_SIGSEGV,
        libc::SIGUSR2 => MINIX_SIGUSR2,
        libc::SIGPIPE => MINIX_SIGPIPE,
        libc::SIGALRM => MINIX_SIGALRM,
        libc::SIGTERM => MINIX_SIGTERM,
        libc::SIGXCPU => MINIX_SIGSTKFLT,
        _ => 0,
    }
}

// Exec.

/// Load the tool's image into guest RAM at the executable base.
fn load_tool(fs: &FileBridge, ram: &mut GuestRam, path: &str) -> Result<(), MinixError> {
    let host_path = fs.host_path_for(path);
    debug!(path, host_path = %host_path, "exec");

    let mut file = std::fs::File::open(&host_path).map_err(|err| {
        MinixError::from_host_errno(err.raw_os_error().unwrap_or(libc::EIO))
    })?;

    let (_header, image) = executable::load(&mut file).map_err(|err| err.minix_errno())?;
    ram.copy_from_host(EXECUTABLE_BASE, &image);

    Ok(())
}

/// `exece(2)` from inside the guest: the guest hands over a stack snapshot
/// whose argv/envp pointers are offsets from zero. Load the new image, then
/// rebase every pointer against the stack base and install the snapshot at
/// the top of RAM. On a load error nothing is touched.
pub fn exec_with_stack_block(
    fs: &FileBridge,
    ram: &mut GuestRam,
    path: &str,
    stack: &mut [u8],
) -> Result<(), MinixError> {
    load_tool(fs, ram, path)?;

    let word_at = |block: &[u8], index: usize| -> Result<u32, MinixError> {
        let at = index * 4;
        if at + 4 > block.len() {
            return Err(MinixError::Einval);
        }
        Ok(u32::from_be_bytes(block[at..at + 4].try_into().unwrap()))
    };
    let set_word_at = |block: &mut [u8], index: usize, value: u32| {
        block[index * 4..index * 4 + 4].copy_from_slice(&value.to_be_bytes());
    };

    // Skip argc, then rebase the argv pointers up to their NULL, then the
    // envp pointers up to theirs.
    let mut index = 1;
    for _ in 0..2 {
        loop {
            let pointer = word_at(stack, index)?;
            if pointer == 0 {
                index += 1;
                break;
            }
            set_word_at(stack, index, pointer.wrapping_add(STACK_BASE));
            index += 1;
        }
    }

    ram.copy_from_host(STACK_BASE, stack);

    Ok(())
}

/// Startup exec: build the guest stack snapshot from host `argv`/`envp`.
/// Only host environment entries named `MINIX_*` are exported, with the
/// prefix stripped.
pub fn exec_with_host_params(
    fs: &FileBridge,
    ram: &mut GuestRam,
    path: &str,
    args: &[String],
    env: &[String],
) -> Result<(), MinixError> {
    load_tool(fs, ram, path)?;

    let exported: Vec<&str> = env
        .iter()
        .filter_map(|entry| entry.strip_prefix("MINIX_"))
        .collect();

    let snapshot = build_stack_snapshot(args, &exported);
    ram.copy_from_host(STACK_BASE, &snapshot);

    Ok(())
}

fn round_up_4(n: usize) -> usize {
    (n + 3) & !3
}

/// Lay out the guest stack snapshot:
///
/// ```text
/// argc                       (32-bit)
/// argv[0] .. argv[argc-1]    guest pointers
/// NULL
/// envp[0] .. envp[envc-1]    guest pointers
/// NULL
/// string data                NUL-terminated, 4-byte aligned
/// ```
///
/// Every pointer is absolute: stack base + table size + string offset.
pub fn build_stack_snapshot(args: &[String], env: &[&str]) -> Vec<u8> {
    let table_words = 1 + (args.len() + 1) + (env.len() + 1);
    let table_size = table_words * 4;

    let mut table = Vec::with_capacity(table_size);
    let mut content: Vec<u8> = Vec::new();

    table.extend_from_slice(&(args.len() as u32).to_be_bytes());

    let push_string = |table: &mut Vec<u8>, content: &mut Vec<u8>, s: &str| {
        let address = STACK_BASE + table_size as u32 + content.len() as u32;
        table.extend_from_slice(&address.to_be_bytes());
        content.extend_from_slice(s.as_bytes());
        content.push(0);
        content.resize(round_up_4(content.len()), 0);
    };

    for arg in args {
        push_string(&mut table, &mut content, arg);
    }
    table.extend_from_slice(&0u32.to_be_bytes());

    for entry in env {
        push_string(&mut table, &mut content, entry);
    }
    table.extend_from_slice(&0u32.to_be_bytes());

    table.extend_from_slice(&content);
    table
}
