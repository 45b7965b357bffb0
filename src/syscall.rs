//! The system-call dispatcher.
//!
//! MINIX has exactly one system call — send and/or receive a message — and
//! every kernel service is a message to the memory manager (task 0) or the
//! file system (task 1). The dispatcher copies the message out of guest RAM,
//! routes on its type, transcodes arguments for the right bridge, and builds
//! the reply in place. Each handler is a thin transcoding wrapper; the
//! bridges do the real work.

use tracing::{debug, warn};

use crate::emulation::{ExecutionState, System};
use crate::errno::MinixError;
use crate::executable::EXECUTABLE_LIMIT;
use crate::filesystem::STAT_SIZE;
use crate::message::{Message, MESSAGE_SIZE};
use crate::process;

/// `send`/`receive`/`sendrec`, the `func` word of the trap.
pub const FUNC_SEND: u16 = 1;
pub const FUNC_RECEIVE: u16 = 2;
pub const FUNC_BOTH: u16 = 3;

/// Everybody is `ast:adm` (uid 8, gid 3), whose HOME is /usr/ast. Thanks,
/// Dr. Tannenbaum!
const DEFAULT_UID: i16 = 8;
const DEFAULT_GID: i16 = 3;
/// And everybody is effectively root.
const DEFAULT_EUID: i16 = 0;
const DEFAULT_EGID: i16 = 0;

/// How a completed trap steers D0: an explicit value, zero, or the
/// all-ones failure marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysCallResult {
    Failure,
    SuccessEmpty,
    Success(u32),
}

/// Names for all 70 call slots, for tracing.
const SYSCALL_NAMES: [&str; 70] = [
    "unused0", "exit", "fork", "read", "write", "open", "close", "wait", "creat", "link",
    "unlink", "exec", "chdir", "time", "mknod", "chmod", "chown", "brk", "stat", "lseek",
    "getpid", "mount", "umount", "setuid", "getuid", "stime", "ptrace", "alarm", "fstat",
    "pause", "utime", "stty", "gtty", "access", "nice", "ftime", "sync", "kill", "rename",
    "mkdir", "rmdir", "dup", "pipe", "times", "prof", "unused45", "setgid", "getgid",
    "signal", "unused49", "unused50", "acct", "phys", "lock", "ioctl", "fcntl", "mpx",
    "unused57", "unused58", "exece", "umask", "chroot", "unused62", "unused63", "KSIG",
    "UNPAUSE", "BRK2", "REVIVE", "TASK_REPLY", "unused69",
];

/// Fold a bridge result into the signed reply code MINIX expects in
/// `m_type`: the value on success, `-errno` on failure.
fn reply_code<T: Into<i16>>(result: Result<T, MinixError>) -> i16 {
    match result {
        Ok(value) => value.into(),
        Err(err) => -err.code(),
    }
}

impl System {
    /// The trap gate: dispatch one message-based system call.
    pub fn system_call(&mut self, func: u16, src_dest: i16, msg_addr: u32) -> SysCallResult {
        if func == FUNC_RECEIVE {
            // No user process in the default system blocks in receive().
            warn!("receive-only messages are not supported");
            return SysCallResult::Failure;
        }
        if func != FUNC_SEND && func != FUNC_BOTH {
            warn!(func, "bad system call function");
            return SysCallResult::Failure;
        }

        let raw: [u8; MESSAGE_SIZE] = self
            .ram
            .copy_to_host(msg_addr, MESSAGE_SIZE)
            .try_into()
            .unwrap();
        let mut message = Message::from_bytes(raw);

        // System calls only ever go to the MM or FS; the other well-known
        // tasks (tty, clock, …) are not emulated.
        let result = match src_dest {
            0 | 1 => {
                let call = message.m_type();
                if !(0..70).contains(&call) {
                    warn!(call, "system call number out of range");
                    SysCallResult::Failure
                } else {
                    debug!(call, name = SYSCALL_NAMES[call as usize], "syscall");
                    self.dispatch(call, &mut message)
                }
            }
            task if task < 0 => {
                warn!(task, "kernel task is not emulated");
                SysCallResult::Failure
            }
            task => {
                warn!(task, "cannot message other processes");
                SysCallResult::Failure
            }
        };

        // Only a sender that also waits for the reply sees the updated
        // message.
        if func == FUNC_BOTH {
            self.ram.copy_from_host(msg_addr, message.as_bytes());
        }

        result
    }

    fn dispatch(&mut self, call: i16, message: &mut Message) -> SysCallResult {
        match call {
            1 => self.sc_exit(message),
            2 => self.sc_fork(message),
            3 => self.sc_read(message),
            4 => self.sc_write(message),
            5 => self.sc_open(message),
            6 => self.sc_close(message),
            7 => self.sc_wait(message),
            8 => self.sc_creat(message),
            10 => self.sc_unlink(message),
            13 => self.sc_time(message),
            17 => self.sc_brk(message),
            18 => self.sc_stat(message),
            19 => self.sc_lseek(message),
            20 => self.sc_getpid(message),
            24 => self.sc_getuid(message),
            28 => self.sc_fstat(message),
            33 => self.sc_access(message),
            37 => self.sc_kill(message),
            47 => self.sc_getgid(message),
            48 => self.sc_signal(message),
            59 => self.sc_exece(message),
            _ => {
                warn!(call, name = SYSCALL_NAMES[call as usize], "unimplemented syscall");
                SysCallResult::Failure
            }
        }
    }

    /// Copy a NUL-terminated path of `len` bytes (including the NUL) out of
    /// guest RAM.
    fn read_guest_path(&self, addr: u32, len: i16) -> Result<String, MinixError> {
        if len <= 0 {
            return Err(MinixError::Einval);
        }
        let bytes = self.ram.copy_to_host(addr, len as usize);
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    // exit(2): mess1 m1_i1 = status. No reply; the process is done.
    fn sc_exit(&mut self, message: &mut Message) -> SysCallResult {
        let status = message.m1_i1();
        self.exit(status as i32);
        SysCallResult::SuccessEmpty
    }

    // fork(2): no parameters. Replies m_type = child pid (parent), 0
    // (child), or -errno.
    fn sc_fork(&mut self, message: &mut Message) -> SysCallResult {
        let code = reply_code(self.procs.fork());

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // read(2): mess1 m1_i1 = fd, m1_i2 = nbytes, m1_p1 = buffer.
    fn sc_read(&mut self, message: &mut Message) -> SysCallResult {
        let fd = message.m1_i1();
        let nbytes = message.m1_i2();
        let buf_addr = message.m1_p1();

        let code = if nbytes < 0 {
            -MinixError::Einval.code()
        } else {
            let mut buf = vec![0u8; nbytes as usize];
            match self.fs.read(fd, &mut buf) {
                Ok(n) => {
                    if n > 0 {
                        self.ram.copy_from_host(buf_addr, &buf[..n]);
                    }
                    n as i16
                }
                Err(err) => -err.code(),
            }
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // write(2): mess1 m1_i1 = fd, m1_i2 = nbytes, m1_p1 = buffer.
    fn sc_write(&mut self, message: &mut Message) -> SysCallResult {
        let fd = message.m1_i1();
        let nbytes = message.m1_i2();
        let buf_addr = message.m1_p1();

        let code = if nbytes < 0 {
            -MinixError::Einval.code()
        } else {
            let buf = self.ram.copy_to_host(buf_addr, nbytes as usize);
            match self.fs.write(fd, &buf) {
                Ok(n) => n as i16,
                Err(err) => -err.code(),
            }
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // open(2) arrives as mess1 when O_CREAT is set and mess3 otherwise; the
    // flags sit at the same offset in both shapes, so peek them first.
    fn sc_open(&mut self, message: &mut Message) -> SysCallResult {
        let flags = message.m1_i2();

        let (name_len, name_addr, mode) = if flags & crate::filesystem::MINIX_O_CREAT != 0 {
            (message.m1_i1(), message.m1_p1(), message.m1_i3() as u16)
        } else {
            (message.m3_i1(), message.m3_p1(), 0)
        };

        // The message's inline name only fits 14 characters; always use the
        // pointer.
        let code = match self.read_guest_path(name_addr, name_len) {
            Ok(path) => reply_code(self.fs.open(&path, flags, mode)),
            Err(err) => -err.code(),
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // close(2): mess1 m1_i1 = fd.
    fn sc_close(&mut self, message: &mut Message) -> SysCallResult {
        let fd = message.m1_i1();
        let code = reply_code(self.fs.close(fd));

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // wait(2): no parameters. Replies m_type = pid, m2_i1 = status.
    fn sc_wait(&mut self, message: &mut Message) -> SysCallResult {
        let (code, status) = match self.procs.wait() {
            Ok((pid, status)) => (pid, status),
            Err(err) => (-err.code(), 0),
        };

        message.clear();
        message.set_m_type(code);
        message.set_m2_i1(status);
        SysCallResult::SuccessEmpty
    }

    // creat(2): mess3 m3_i1 = len, m3_i2 = mode, m3_p1 = name.
    fn sc_creat(&mut self, message: &mut Message) -> SysCallResult {
        let name_len = message.m3_i1();
        let mode = message.m3_i2() as u16;
        let name_addr = message.m3_p1();

        let code = match self.read_guest_path(name_addr, name_len) {
            Ok(path) => reply_code(self.fs.create(&path, mode)),
            Err(err) => -err.code(),
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // unlink(2): mess3 m3_i1 = len, m3_p1 = name.
    fn sc_unlink(&mut self, message: &mut Message) -> SysCallResult {
        let name_len = message.m3_i1();
        let name_addr = message.m3_p1();

        let code = match self.read_guest_path(name_addr, name_len) {
            Ok(path) => reply_code(self.fs.unlink(&path)),
            Err(err) => -err.code(),
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::Success(code as i32 as u32)
    }

    // time(2): no parameters. Replies m_type = 0 or -errno, m2_l1 = time.
    fn sc_time(&mut self, message: &mut Message) -> SysCallResult {
        let t = unsafe { libc::time(std::ptr::null_mut()) };
        let code = if t < 0 { -MinixError::last_os().code() } else { 0 };

        message.clear();
        message.set_m_type(code);
        message.set_m2_l1(t as i32);
        SysCallResult::Success(t as u32)
    }

    // brk(2): mess1 m1_p1 = requested break. There is only one process and
    // it has the run of the address space below the heap ceiling, so accept
    // anything there that doesn't move the break backwards.
    fn sc_brk(&mut self, message: &mut Message) -> SysCallResult {
        let requested = message.m1_p1();

        let (code, resulting) = if requested < EXECUTABLE_LIMIT && requested >= self.current_break {
            self.current_break = requested;
            (0, requested)
        } else {
            // The guest sees ((char *)-1).
            (-MinixError::Enomem.code(), 0xFFFF_FFFF)
        };

        message.clear();
        message.set_m_type(code);
        message.set_m2_p1(resulting);
        SysCallResult::SuccessEmpty
    }

    // stat(2): mess1 m1_i1 = len, m1_p1 = name, m1_p2 = buffer.
    fn sc_stat(&mut self, message: &mut Message) -> SysCallResult {
        let name_len = message.m1_i1();
        let name_addr = message.m1_p1();
        let buf_addr = message.m1_p2();

        let code = match self.read_guest_path(name_addr, name_len) {
            Ok(path) => match self.fs.stat(&path) {
                Ok(stat) => {
                    self.ram.copy_from_host(buf_addr, &stat.encode());
                    0
                }
                Err(err) => {
                    // The caller reserved the space either way.
                    self.ram.copy_from_host(buf_addr, &[0u8; STAT_SIZE]);
                    -err.code()
                }
            },
            Err(err) => -err.code(),
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // lseek(2): mess2 m2_i1 = fd, m2_i2 = whence, m2_l1 = offset. Replies
    // m_type = 0 or -errno with the resulting offset in m2_l1 and D0.
    fn sc_lseek(&mut self, message: &mut Message) -> SysCallResult {
        let fd = message.m2_i1();
        let whence = message.m2_i2();
        let offset = message.m2_l1();

        let (code, resulting) = match self.fs.seek(fd, offset, whence) {
            Ok(position) => (0, position),
            Err(err) => (-err.code(), 0),
        };

        message.clear();
        message.set_m_type(code);
        message.set_m2_l1(resulting);
        if code == 0 {
            SysCallResult::Success(resulting as u32)
        } else {
            SysCallResult::Success(code as i32 as u32)
        }
    }

    // getpid(2): replies m_type = pid, m1_i1 = ppid.
    fn sc_getpid(&mut self, message: &mut Message) -> SysCallResult {
        let (pid, ppid) = self.procs.process_ids();

        message.clear();
        message.set_m_type(pid);
        message.set_m1_i1(ppid);
        SysCallResult::SuccessEmpty
    }

    // getuid(2): replies m_type = real uid, m2_i1 = effective uid.
    fn sc_getuid(&mut self, message: &mut Message) -> SysCallResult {
        message.clear();
        message.set_m_type(DEFAULT_UID);
        message.set_m2_i1(DEFAULT_EUID);
        SysCallResult::SuccessEmpty
    }

    // fstat(2): mess1 m1_i1 = fd, m1_p1 = buffer.
    fn sc_fstat(&mut self, message: &mut Message) -> SysCallResult {
        let fd = message.m1_i1();
        let buf_addr = message.m1_p1();

        let code = match self.fs.fstat(fd) {
            Ok(stat) => {
                self.ram.copy_from_host(buf_addr, &stat.encode());
                0
            }
            Err(err) => {
                self.ram.copy_from_host(buf_addr, &[0u8; STAT_SIZE]);
                -err.code()
            }
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // access(2): mess3 m3_i1 = len, m3_i2 = mode, m3_p1 = name.
    fn sc_access(&mut self, message: &mut Message) -> SysCallResult {
        let name_len = message.m3_i1();
        let mode = message.m3_i2() as u16;
        let name_addr = message.m3_p1();

        let code = match self.read_guest_path(name_addr, name_len) {
            Ok(path) => reply_code(self.fs.access(&path, mode)),
            Err(err) => -err.code(),
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // kill(2): mess1 m1_i1 = pid, m1_i2 = signal.
    fn sc_kill(&mut self, message: &mut Message) -> SysCallResult {
        let pid = message.m1_i1();
        let signal = message.m1_i2();

        let code = reply_code(self.procs.kill(pid, signal));

        message.clear();
        message.set_m_type(code);
        SysCallResult::SuccessEmpty
    }

    // getgid(2): replies m_type = real gid, m2_i1 = effective gid.
    fn sc_getgid(&mut self, message: &mut Message) -> SysCallResult {
        message.clear();
        message.set_m_type(DEFAULT_GID);
        message.set_m2_i1(DEFAULT_EGID);
        SysCallResult::SuccessEmpty
    }

    // signal(2): mess6 m6_i1 = signal, m6_f1 = handler. The previous
    // handler travels back in D0.
    fn sc_signal(&mut self, message: &mut Message) -> SysCallResult {
        let signal = message.m6_i1();
        let handler = message.m6_f1();

        match self.procs.signal(signal, handler) {
            Ok(old_handler) => {
                message.clear();
                message.set_m_type(0);
                SysCallResult::Success(old_handler)
            }
            Err(err) => {
                message.clear();
                message.set_m_type(-err.code());
                SysCallResult::SuccessEmpty
            }
        }
    }

    // exece(2): mess1 m1_i1 = len(path), m1_i2 = stack size, m1_p1 = path,
    // m1_p2 = stack snapshot. On success the reply is never seen; execution
    // restarts in the new image.
    fn sc_exece(&mut self, message: &mut Message) -> SysCallResult {
        let path_len = message.m1_i1();
        let path_addr = message.m1_p1();
        let stack_size = message.m1_i2();
        let stack_addr = message.m1_p2();

        let code = match self.read_guest_path(path_addr, path_len) {
            Ok(path) if stack_size >= 4 => {
                let mut stack = self.ram.copy_to_host(stack_addr, stack_size as usize);
                match process::exec_with_stack_block(&self.fs, &mut self.ram, &path, &mut stack) {
                    Ok(()) => {
                        self.change_state(ExecutionState::Ready);
                        0
                    }
                    Err(err) => -err.code(),
                }
            }
            Ok(_) => -MinixError::Einval.code(),
            Err(err) => -err.code(),
        };

        message.clear();
        message.set_m_type(code);
        SysCallResult::Success(code as i32 as u32)
    }
}
