//! The filesystem bridge: maps guest paths and descriptors onto the host.
//!
//! All guest I/O is rooted under a MINIX installation directory on the host
//! (`MINIXCOMPAT_DIR`, default `/opt/minix`). Guest file descriptors live in
//! a fixed 20-slot table wired to host descriptors; directories get special
//! treatment because MINIX userspace reads them with plain `read(2)`, so
//! their contents are synthesized into 16-byte MINIX directory entries at
//! open time.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::DirEntryExt;
use std::path::Path;

use tracing::debug;

use crate::errno::MinixError;

/// The number of open files MINIX can have at one time.
pub const FD_TABLE_SIZE: usize = 20;

/// Size of a guest directory entry: 16-bit inode plus 14-byte name.
pub const DIRENT_SIZE: usize = 16;

/// Directory caches grow a MINIX block's worth of entries at a time.
const DIR_CACHE_BLOCK: usize = 32;

/// Size of the guest `stat` record.
pub const STAT_SIZE: usize = 30;

pub const MINIX_DIR_DEFAULT: &str = "/opt/minix";

// Guest open(2) flags.
pub const MINIX_O_CREAT: i16 = 0o100;
pub const MINIX_O_EXCL: i16 = 0o200;
pub const MINIX_O_NOCTTY: i16 = 0o400;
pub const MINIX_O_TRUNC: i16 = 0o1000;
pub const MINIX_O_APPEND: i16 = 0o2000;
pub const MINIX_O_NONBLOCK: i16 = 0o4000;
pub const MINIX_O_RDONLY: i16 = 0o0;
pub const MINIX_O_WRONLY: i16 = 0o1;
pub const MINIX_O_RDWR: i16 = 0o2;

// Guest stat(2) mode bits.
pub const MINIX_S_IFMT: u16 = 0o170000;
pub const MINIX_S_IFREG: u16 = 0o100000;
pub const MINIX_S_IFBLK: u16 = 0o060000;
pub const MINIX_S_IFDIR: u16 = 0o040000;
pub const MINIX_S_IFCHR: u16 = 0o020000;
pub const MINIX_S_IFIFO: u16 = 0o010000;
pub const MINIX_S_ISUID: u16 = 0o004000;
pub const MINIX_S_ISGID: u16 = 0o002000;
pub const MINIX_S_ISVTX: u16 = 0o001000;

// Guest lseek(2) whence values.
pub const MINIX_SEEK_SET: i16 = 0;
pub const MINIX_SEEK_CUR: i16 = 1;
pub const MINIX_SEEK_END: i16 = 2;

/// A guest `stat` record in host byte order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinixStat {
    pub dev: u16,
    pub ino: u16,
    pub mode: u16,
    pub nlink: i16,
    pub uid: i16,
    pub gid: i16,
    pub rdev: u16,
    pub size: i32,
    pub atime: i32,
    pub mtime: i32,
    pub ctime: i32,
}

impl MinixStat {
    /// Serialize to the guest's packed big-endian layout.
    pub fn encode(&self) -> [u8; STAT_SIZE] {
        let mut out = [0u8; STAT_SIZE];
        out[0..2].copy_from_slice(&self.dev.to_be_bytes());
        out[2..4].copy_from_slice(&self.ino.to_be_bytes());
        out[4..6].copy_from_slice(&self.mode.to_be_bytes());
        out[6..8].copy_from_slice(&self.nlink.to_be_bytes());
        out[8..10].copy_from_slice(&self.uid.to_be_bytes());
        out[10..12].copy_from_slice(&self.gid.to_be_bytes());
        out[12..14].copy_from_slice(&self.rdev.to_be_bytes());
        out[14..18].copy_from_slice(&self.size.to_be_bytes());
        out[18..22].copy_from_slice(&self.atime.to_be_bytes());
        out[22..26].copy_from_slice(&self.mtime.to_be_bytes());
        out[26..30].copy_from_slice(&self.ctime.to_be_bytes());
        out
    }

    pub fn decode(raw: &[u8; STAT_SIZE]) -> Self {
        let i16_at = |o: usize| i16::from_be_bytes([raw[o], raw[o + 1]]);
        let u16_at = |o: usize| u16::from_be_bytes([raw[o], raw[o + 1]]);
        let i32_at = |o: usize| i32::from_be_bytes(raw[o..o + 4].try_into().unwrap());
        Self {
            dev: u16_at(0),
            ino: u16_at(2),
            mode: u16_at(4),
            nlink: i16_at(6),
            uid: i16_at(8),
            gid: i16_at(10),
            rdev: u16_at(12),
            size: i32_at(14),
            atime: i32_at(18),
            mtime: i32_at(22),
            ctime: i32_at(26),
        }
    }
}

/// Synthetic contents of an opened directory: 16-byte guest entries
/// (inode already big-endian), padded to a whole number of 32-entry blocks,
/// plus the current read cursor.
struct DirCache {
    bytes: Vec<u8>,
    offset: i32,
}

enum FdKind {
    File,
    Directory(DirCache),
}

struct OpenFd {
    host_fd: i32,
    kind: FdKind,
}

pub struct FileBridge {
    /// Host path of the MINIX installation root.
    root: String,
    /// Guest working directory (guest-absolute).
    pwd: String,
    /// The working directory as a host path.
    host_pwd: String,
    slots: [Option<OpenFd>; FD_TABLE_SIZE],
}

impl FileBridge {
    /// Set up the bridge from the environment: `MINIXCOMPAT_DIR` for the
    /// root, `MINIXCOMPAT_PWD` for the initial working directory (falling
    /// back to the host cwd when it lies under the root, else `/`).
    pub fn from_env() -> Self {
        let root =
            std::env::var("MINIXCOMPAT_DIR").unwrap_or_else(|_| MINIX_DIR_DEFAULT.to_string());

        let pwd = match std::env::var("MINIXCOMPAT_PWD") {
            Ok(pwd) => pwd,
            Err(_) => {
                let cwd = std::env::current_dir()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if cwd.starts_with(&root) {
                    let stripped = &cwd[root.len()..];
                    if stripped.is_empty() {
                        "/".to_string()
                    } else {
                        stripped.to_string()
                    }
                } else {
                    "/".to_string()
                }
            }
        };

        Self::with_root(&root, &pwd)
    }

    /// Set up the bridge with an explicit root and guest working directory.
    pub fn with_root(root: &str, pwd: &str) -> Self {
        let mut bridge = Self {
            root: root.to_string(),
            pwd: String::new(),
            host_pwd: String::new(),
            slots: Default::default(),
        };
        bridge.set_working_directory(pwd);

        // Slots 0..2 are pre-wired to the host's stdio.
        bridge.slots[0] = Some(OpenFd {
            host_fd: libc::STDIN_FILENO,
            kind: FdKind::File,
        });
        bridge.slots[1] = Some(OpenFd {
            host_fd: libc::STDOUT_FILENO,
            kind: FdKind::File,
        });
        bridge.slots[2] = Some(OpenFd {
            host_fd: libc::STDERR_FILENO,
            kind: FdKind::File,
        });

        bridge
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn working_directory(&self) -> &str {
        &self.pwd
    }

    pub fn set_working_directory(&mut self, pwd: &str) {
        self.pwd = pwd.to_string();
        self.host_pwd = self.host_path_for(pwd);
        // Keep the host process in step; failure here is not fatal.
        let _ = std::env::set_current_dir(&self.host_pwd);
    }

    /// Construct the host path for a guest path: absolute guest paths are
    /// rooted under the MINIX root, relative ones under the working
    /// directory. `..` escapes are not policed.
    pub fn host_path_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.root, path)
        } else {
            format!("{}/{}", self.host_pwd, path)
        }
    }

    // Descriptor table.

    fn slot(&self, fd: i16) -> Result<&OpenFd, MinixError> {
        if !(0..FD_TABLE_SIZE as i16).contains(&fd) {
            return Err(MinixError::Ebadf);
        }
        self.slots[fd as usize].as_ref().ok_or(MinixError::Ebadf)
    }

    fn slot_mut(&mut self, fd: i16) -> Result<&mut OpenFd, MinixError> {
        if !(0..FD_TABLE_SIZE as i16).contains(&fd) {
            return Err(MinixError::Ebadf);
        }
        self.slots[fd as usize].as_mut().ok_or(MinixError::Ebadf)
    }

    fn lowest_free_slot(&self) -> Result<i16, MinixError> {
        self.slots
            .iter()
            .position(Option::is_none)
            .map(|i| i as i16)
            .ok_or(MinixError::Enfile)
    }

    // Files.

    pub fn create(&mut self, path: &str, mode: u16) -> Result<i16, MinixError> {
        self.open(path, MINIX_O_CREAT | MINIX_O_TRUNC | MINIX_O_WRONLY, mode)
    }

    pub fn open(&mut self, path: &str, flags: i16, mode: u16) -> Result<i16, MinixError> {
        let fd = self.lowest_free_slot()?;

        let host_path = self.host_path_for(path);
        let host_flags = host_open_flags(flags);
        let host_mode = host_mode_bits(mode);

        debug!(path, host_path = %host_path, flags, "open");

        let c_path = c_path(&host_path)?;
        let host_fd = unsafe { libc::open(c_path.as_ptr(), host_flags, host_mode as libc::c_uint) };
        if host_fd < 0 {
            return Err(MinixError::last_os());
        }

        // Learn whether we just opened a directory, and if so synthesize its
        // guest-visible contents now. Failure here fails the whole open.
        let kind = match self.classify(&host_path) {
            Ok(kind) => kind,
            Err(err) => {
                unsafe { libc::close(host_fd) };
                return Err(err);
            }
        };

        self.slots[fd as usize] = Some(OpenFd { host_fd, kind });
        Ok(fd)
    }

    pub fn close(&mut self, fd: i16) -> Result<i16, MinixError> {
        let host_fd = self.slot(fd)?.host_fd;

        let result = unsafe { libc::close(host_fd) };
        // The slot is released whether or not the host close succeeded; the
        // error, if any, is still reported.
        self.slots[fd as usize] = None;

        if result == -1 {
            Err(MinixError::last_os())
        } else {
            Ok(result as i16)
        }
    }

    pub fn read(&mut self, fd: i16, buf: &mut [u8]) -> Result<usize, MinixError> {
        let entry = self.slot_mut(fd)?;
        match &mut entry.kind {
            FdKind::Directory(cache) => dir_read(cache, buf),
            FdKind::File => {
                let n = unsafe {
                    libc::read(entry.host_fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
                };
                if n < 0 {
                    Err(MinixError::last_os())
                } else {
                    Ok(n as usize)
                }
            }
        }
    }

    pub fn write(&mut self, fd: i16, buf: &[u8]) -> Result<usize, MinixError> {
        let entry = self.slot(fd)?;
        assert!(
            matches!(entry.kind, FdKind::File),
            "write to a directory descriptor"
        );

        let n =
            unsafe { libc::write(entry.host_fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
        if n < 0 {
            Err(MinixError::last_os())
        } else {
            Ok(n as usize)
        }
    }

    pub fn seek(&mut self, fd: i16, offset: i32, whence: i16) -> Result<i32, MinixError> {
        let entry = self.slot_mut(fd)?;
        match &mut entry.kind {
            FdKind::Directory(cache) => dir_seek(cache, offset, whence),
            FdKind::File => {
                let host_whence = match whence {
                    MINIX_SEEK_SET => libc::SEEK_SET,
                    MINIX_SEEK_CUR => libc::SEEK_CUR,
                    MINIX_SEEK_END => libc::SEEK_END,
                    _ => return Err(MinixError::Einval),
                };
                let result = unsafe { libc::lseek(entry.host_fd, offset as libc::off_t, host_whence) };
                if result < 0 {
                    Err(MinixError::last_os())
                } else {
                    Ok(result as i32)
                }
            }
        }
    }

    pub fn stat(&self, path: &str) -> Result<MinixStat, MinixError> {
        let host_path = self.host_path_for(path);
        let host_stat = stat_retrying(&host_path)?;
        Ok(minix_stat_for(&host_stat))
    }

    pub fn fstat(&self, fd: i16) -> Result<MinixStat, MinixError> {
        let host_fd = self.slot(fd)?.host_fd;

        let mut host_stat: libc::stat = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::fstat(host_fd, &mut host_stat) };
        if result != 0 {
            return Err(MinixError::last_os());
        }
        Ok(minix_stat_for(&host_stat))
    }

    pub fn unlink(&self, path: &str) -> Result<i16, MinixError> {
        let host_path = self.host_path_for(path);
        let c_path = c_path(&host_path)?;
        let result = unsafe { libc::unlink(c_path.as_ptr()) };
        if result == -1 {
            Err(MinixError::last_os())
        } else {
            Ok(0)
        }
    }

    pub fn access(&self, path: &str, mode: u16) -> Result<i16, MinixError> {
        let host_path = self.host_path_for(path);
        let host_mode = host_mode_bits(mode);
        let c_path = c_path(&host_path)?;
        let result = unsafe { libc::access(c_path.as_ptr(), host_mode as libc::c_int) };
        if result == -1 {
            Err(MinixError::last_os())
        } else {
            Ok(0)
        }
    }

    // Directories.

    /// Stat the freshly-opened file and, if it is a directory, pre-cache its
    /// entries. The host descriptor stays open either way (fstat still needs
    /// it), but directory reads are served purely from the cache.
    fn classify(&self, host_path: &str) -> Result<FdKind, MinixError> {
        let host_stat = stat_retrying(host_path)?;
        if host_stat.st_mode & libc::S_IFMT != libc::S_IFDIR {
            return Ok(FdKind::File);
        }

        Ok(FdKind::Directory(precache_dir(host_path)?))
    }
}

// Guest <-> host translation helpers.

fn c_path(host_path: &str) -> Result<CString, MinixError> {
    CString::new(host_path).map_err(|_| MinixError::Enoent)
}

/// `stat(2)` that retries through EINTR so guest signals never surface as
/// spurious stat failures.
fn stat_retrying(host_path: &str) -> Result<libc::stat, MinixError> {
    let c_path = c_path(host_path)?;
    loop {
        let mut sbuf: libc::stat = unsafe { std::mem::zeroed() };
        let result = unsafe { libc::stat(c_path.as_ptr(), &mut sbuf) };
        if result == 0 {
            return Ok(sbuf);
        }
        let err = MinixError::last_os();
        if err != MinixError::Eintr {
            return Err(err);
        }
    }
}

fn host_open_flags(minix_flags: i16) -> libc::c_int {
    let mut host_flags: libc::c_int = 0;

    if minix_flags & MINIX_O_CREAT != 0 {
        host_flags |= libc::O_CREAT;
    }
    if minix_flags & MINIX_O_EXCL != 0 {
        host_flags |= libc::O_EXCL;
    }
    if minix_flags & MINIX_O_NOCTTY != 0 {
        host_flags |= libc::O_NOCTTY;
    }
    if minix_flags & MINIX_O_TRUNC != 0 {
        host_flags |= libc::O_TRUNC;
    }
    if minix_flags & MINIX_O_APPEND != 0 {
        host_flags |= libc::O_APPEND;
    }
    if minix_flags & MINIX_O_NONBLOCK != 0 {
        host_flags |= libc::O_NONBLOCK;
    }

    // The access mode lives in the low two bits on both sides.
    match minix_flags & 0o3 {
        0o1 => host_flags |= libc::O_WRONLY,
        0o2 => host_flags |= libc::O_RDWR,
        _ => host_flags |= libc::O_RDONLY,
    }

    host_flags
}

fn host_mode_bits(minix_mode: u16) -> libc::mode_t {
    let mut host_mode: libc::mode_t = 0;

    if minix_mode & MINIX_S_IFREG != 0 {
        host_mode |= libc::S_IFREG;
    }
    if minix_mode & MINIX_S_IFBLK != 0 {
        host_mode |= libc::S_IFBLK;
    }
    if minix_mode & MINIX_S_IFDIR != 0 {
        host_mode |= libc::S_IFDIR;
    }
    if minix_mode & MINIX_S_IFCHR != 0 {
        host_mode |= libc::S_IFCHR;
    }
    if minix_mode & MINIX_S_IFIFO != 0 {
        host_mode |= libc::S_IFIFO;
    }
    if minix_mode & MINIX_S_ISUID != 0 {
        host_mode |= libc::S_ISUID;
    }
    if minix_mode & MINIX_S_ISGID != 0 {
        host_mode |= libc::S_ISGID;
    }
    if minix_mode & MINIX_S_ISVTX != 0 {
        host_mode |= libc::S_ISVTX;
    }

    // The nine permission bits line up between MINIX and the host.
    host_mode | (minix_mode as libc::mode_t & 0o777)
}

fn minix_mode_for(host_mode: libc::mode_t) -> u16 {
    let mut minix_mode: u16 = 0;

    let file_type = host_mode & libc::S_IFMT;
    if file_type == libc::S_IFREG {
        minix_mode |= MINIX_S_IFREG;
    }
    if file_type == libc::S_IFBLK {
        minix_mode |= MINIX_S_IFBLK;
    }
    if file_type == libc::S_IFDIR {
        minix_mode |= MINIX_S_IFDIR;
    }
    if file_type == libc::S_IFCHR {
        minix_mode |= MINIX_S_IFCHR;
    }
    if file_type == libc::S_IFIFO {
        minix_mode |= MINIX_S_IFIFO;
    }

    if host_mode & libc::S_ISUID != 0 {
        minix_mode |= MINIX_S_ISUID;
    }
    if host_mode & libc::S_ISGID != 0 {
        minix_mode |= MINIX_S_ISGID;
    }
    if host_mode & libc::S_ISVTX != 0 {
        minix_mode |= MINIX_S_ISVTX;
    }

    minix_mode | (host_mode as u16 & 0o777)
}

/// Squeeze a host inode into MINIX's 16 bits. Plain truncation is kept when
/// it yields something non-zero; otherwise the 16-bit halves are folded by
/// addition until a non-zero 16-bit inode falls out, so the result is
/// deterministic and unlikely to collide.
pub fn minix_inode_for(host_inode: u64) -> u16 {
    if host_inode == 0 {
        return 0;
    }

    let mut ino = host_inode as u16;
    let mut value = host_inode;
    while ino == 0 {
        value = (value >> 48) + ((value >> 32) & 0xffff) + ((value >> 16) & 0xffff) + (value & 0xffff);
        ino = value as u16;
    }
    ino
}

fn clamp_size(host_size: libc::off_t) -> i32 {
    if host_size >= 0x7FFF_FFFF {
        0x7FFF_FFFF
    } else {
        host_size as i32
    }
}

fn minix_stat_for(host: &libc::stat) -> MinixStat {
    MinixStat {
        dev: host.st_dev as u16,
        ino: minix_inode_for(host.st_ino as u64),
        mode: minix_mode_for(host.st_mode),
        nlink: host.st_nlink as i16,
        uid: host.st_uid as i16,
        gid: host.st_gid as i16,
        rdev: host.st_rdev as u16,
        size: clamp_size(host.st_size),
        atime: host.st_atime as i32,
        mtime: host.st_mtime as i32,
        ctime: host.st_ctime as i32,
    }
}

// Synthetic directories.

fn push_dirent(bytes: &mut Vec<u8>, ino: u16, name: &[u8]) {
    bytes.extend_from_slice(&ino.to_be_bytes());
    let mut name_field = [0u8; 14];
    let n = name.len().min(14);
    name_field[..n].copy_from_slice(&name[..n]);
    bytes.extend_from_slice(&name_field);
}

/// Materialize a directory's contents as guest entries: inode (big-endian,
/// squeezed to 16 bits) plus NUL-padded 14-byte name, padded out to whole
/// 32-entry blocks with empty (inode 0) slots.
fn precache_dir(host_path: &str) -> Result<DirCache, MinixError> {
    let mut bytes = Vec::with_capacity(DIR_CACHE_BLOCK * DIRENT_SIZE);

    // std's read_dir skips "." and ".."; MINIX expects both, first.
    let self_stat = stat_retrying(host_path)?;
    push_dirent(&mut bytes, minix_inode_for(self_stat.st_ino as u64), b".");

    let parent_path = Path::new(host_path).join("..");
    let parent_stat = stat_retrying(&parent_path.to_string_lossy())?;
    push_dirent(&mut bytes, minix_inode_for(parent_stat.st_ino as u64), b"..");

    let reader = std::fs::read_dir(host_path).map_err(|err| {
        MinixError::from_host_errno(err.raw_os_error().unwrap_or(libc::EIO))
    })?;

    for entry in reader {
        let entry = entry.map_err(|err| {
            MinixError::from_host_errno(err.raw_os_error().unwrap_or(libc::EIO))
        })?;
        let name = entry.file_name();
        push_dirent(&mut bytes, minix_inode_for(entry.ino()), name.as_bytes());
    }

    // Round up to a whole number of blocks; the tail entries stay empty.
    let block_bytes = DIR_CACHE_BLOCK * DIRENT_SIZE;
    let padded = bytes.len().div_ceil(block_bytes) * block_bytes;
    bytes.resize(padded, 0);

    Ok(DirCache { bytes, offset: 0 })
}

/// Serve a directory read from the cache. MINIX reads directories in exact
/// fixed-size chunks, so a read that would run off the cache fails whole
/// rather than returning a short count.
fn dir_read(cache: &mut DirCache, buf: &mut [u8]) -> Result<usize, MinixError> {
    let cur = cache.offset as usize;
    if cur + buf.len() > cache.bytes.len() {
        return Err(MinixError::Eio);
    }

    buf.copy_from_slice(&cache.bytes[cur..cur + buf.len()]);
    cache.offset += buf.len() as i32;
    Ok(buf.len())
}

fn dir_seek(cache: &mut DirCache, offset: i32, whence: i16) -> Result<i32, MinixError> {
    let max_off = cache.bytes.len() as i32 - 1;

    let new_off = match whence {
        MINIX_SEEK_SET => offset,
        MINIX_SEEK_CUR => cache.offset + offset,
        MINIX_SEEK_END => max_off + offset,
        _ => return Err(MinixError::Einval),
    };

    if !(0..=max_off).contains(&new_off) {
        return Err(MinixError::Einval);
    }

    cache.offset = new_off;
    Ok(new_off)
}
