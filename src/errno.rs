//! MINIX `errno` values and their mapping to and from host errno values.
//!
//! Every host failure is classified into one of these before it is shown to
//! the guest; anything without a direct MINIX equivalent collapses into the
//! catch-all `Error` (99).

use thiserror::Error;

/// A MINIX 1.5 `errno` value, as seen by the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[repr(i16)]
pub enum MinixError {
    #[error("operation not permitted")]
    Eperm = 1,
    #[error("no such file or directory")]
    Enoent = 2,
    #[error("no such process")]
    Esrch = 3,
    #[error("interrupted system call")]
    Eintr = 4,
    #[error("I/O error")]
    Eio = 5,
    #[error("no such device or address")]
    Enxio = 6,
    #[error("argument list too long")]
    E2big = 7,
    #[error("exec format error")]
    Enoexec = 8,
    #[error("bad file descriptor")]
    Ebadf = 9,
    #[error("no child processes")]
    Echild = 10,
    #[error("resource temporarily unavailable")]
    Eagain = 11,
    #[error("out of memory")]
    Enomem = 12,
    #[error("permission denied")]
    Eacces = 13,
    #[error("bad address")]
    Efault = 14,
    #[error("block device required")]
    Enotblk = 15,
    #[error("resource busy")]
    Ebusy = 16,
    #[error("file exists")]
    Eexist = 17,
    #[error("cross-device link")]
    Exdev = 18,
    #[error("no such device")]
    Enodev = 19,
    #[error("not a directory")]
    Enotdir = 20,
    #[error("is a directory")]
    Eisdir = 21,
    #[error("invalid argument")]
    Einval = 22,
    #[error("too many open files in system")]
    Enfile = 23,
    #[error("too many open files")]
    Emfile = 24,
    #[error("inappropriate ioctl for device")]
    Enotty = 25,
    #[error("text file busy")]
    Etxtbsy = 26,
    #[error("file too large")]
    Efbig = 27,
    #[error("no space left on device")]
    Enospc = 28,
    #[error("illegal seek")]
    Espipe = 29,
    #[error("read-only file system")]
    Erofs = 30,
    #[error("too many links")]
    Emlink = 31,
    #[error("broken pipe")]
    Epipe = 32,
    #[error("argument out of domain")]
    Edom = 33,
    #[error("result out of range")]
    Erange = 34,
    #[error("resource deadlock avoided")]
    Edeadlk = 35,
    #[error("file name too long")]
    Enametoolong = 36,
    #[error("no locks available")]
    Enolck = 37,
    #[error("function not implemented")]
    Enosys = 38,
    #[error("directory not empty")]
    Enotempty = 39,

    /// Catch-all for host errors MINIX has no word for.
    #[error("unknown error")]
    Error = 99,
}

impl MinixError {
    /// The guest-visible errno number.
    pub fn code(self) -> i16 {
        self as i16
    }

    /// Classify a host errno into a MINIX errno.
    pub fn from_host_errno(host: i32) -> Self {
        use MinixError::*;
        match host {
            libc::EPERM => Eperm,
            libc::ENOENT => Enoent,
            libc::ESRCH => Esrch,
            libc::EINTR => Eintr,
            libc::EIO => Eio,
            libc::ENXIO => Enxio,
            libc::E2BIG => E2big,
            libc::ENOEXEC => Enoexec,
            libc::EBADF => Ebadf,
            libc::ECHILD => Echild,
            libc::EAGAIN => Eagain,
            libc::ENOMEM => Enomem,
            libc::EACCES => Eacces,
            libc::EFAULT => Efault,
            libc::ENOTBLK => Enotblk,
            libc::EBUSY => Ebusy,
            libc::EEXIST => Eexist,
            libc::EXDEV => Exdev,
            libc::ENODEV => Enodev,
            libc::ENOTDIR => Enotdir,
            libc::EISDIR => Eisdir,
            libc::EINVAL => Einval,
            libc::ENFILE => Enfile,
            libc::EMFILE => Emfile,
            libc::ENOTTY => Enotty,
            libc::ETXTBSY => Etxtbsy,
            libc::EFBIG => Efbig,
            libc::ENOSPC => Enospc,
            libc::ESPIPE => Espipe,
            libc::EROFS => Erofs,
            libc::EMLINK => Emlink,
            libc::EPIPE => Epipe,
            libc::EDOM => Edom,
            libc::ERANGE => Erange,
            libc::EDEADLK => Edeadlk,
            libc::ENAMETOOLONG => Enametoolong,
            libc::ENOLCK => Enolck,
            libc::ENOSYS => Enosys,
            libc::ENOTEMPTY => Enotempty,
            _ => Error,
        }
    }

    /// The host errno this MINIX errno corresponds to.
    pub fn host_errno(self) -> i32 {
        use MinixError::*;
        match self {
            Eperm => libc::EPERM,
            Enoent => libc::ENOENT,
            Esrch => libc::ESRCH,
            Eintr => libc::EINTR,
            Eio => libc::EIO,
            Enxio => libc::ENXIO,
            E2big => libc::E2BIG,
            Enoexec => libc::ENOEXEC,
            Ebadf => libc::EBADF,
            Echild => libc::ECHILD,
            Eagain => libc::EAGAIN,
            Enomem => libc::ENOMEM,
            Eacces => libc::EACCES,
            Efault => libc::EFAULT,
            Enotblk => libc::ENOTBLK,
            Ebusy => libc::EBUSY,
            Eexist => libc::EEXIST,
            Exdev => libc::EXDEV,
            Enodev => libc::ENODEV,
            Enotdir => libc::ENOTDIR,
            Eisdir => libc::EISDIR,
            Einval => libc::EINVAL,
            Enfile => libc::ENFILE,
            Emfile => libc::EMFILE,
            Enotty => libc::ENOTTY,
            Etxtbsy => libc::ETXTBSY,
            Efbig => libc::EFBIG,
            Enospc => libc::ENOSPC,
            Espipe => libc::ESPIPE,
            Erofs => libc::EROFS,
            Emlink => libc::EMLINK,
            Epipe => libc::EPIPE,
            Edom => libc::EDOM,
            Erange => libc::ERANGE,
            Edeadlk => libc::EDEADLK,
            Enametoolong => libc::ENAMETOOLONG,
            Enolck => libc::ENOLCK,
            Enosys => libc::ENOSYS,
            Enotempty => libc::ENOTEMPTY,
            Error => libc::ENOTRECOVERABLE,
        }
    }

    /// Classify whatever errno the last host call left behind.
    pub fn last_os() -> Self {
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self::from_host_errno(errno)
    }
}
