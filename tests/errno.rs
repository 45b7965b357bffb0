use minixrun::errno::MinixError;

const MAPPED_HOST_ERRNOS: &[i32] = &[
    libc::EPERM,
    libc::ENOENT,
    libc::ESRCH,
    libc::EINTR,
    libc::EIO,
    libc::ENXIO,
    libc::E2BIG,
    libc::ENOEXEC,
    libc::EBADF,
    libc::ECHILD,
    libc::EAGAIN,
    libc::ENOMEM,
    libc::EACCES,
    libc::EFAULT,
    libc::ENOTBLK,
    libc::EBUSY,
    libc::EEXIST,
    libc::EXDEV,
    libc::ENODEV,
    libc::ENOTDIR,
    libc::EISDIR,
    libc::EINVAL,
    libc::ENFILE,
    libc::EMFILE,
    libc::ENOTTY,
    libc::ETXTBSY,
    libc::EFBIG,
    libc::ENOSPC,
    libc::ESPIPE,
    libc::EROFS,
    libc::EMLINK,
    libc::EPIPE,
    libc::EDOM,
    libc::ERANGE,
    libc::EDEADLK,
    libc::ENAMETOOLONG,
    libc::ENOLCK,
    libc::ENOSYS,
    libc::ENOTEMPTY,
];

#[test]
fn mapped_errnos_round_trip() {
    for &host in MAPPED_HOST_ERRNOS {
        let guest = MinixError::from_host_errno(host);
        assert_ne!(guest, MinixError::Error, "host errno {host} fell through");
        assert_eq!(guest.host_errno(), host);
    }
}

#[test]
fn guest_codes_match_minix() {
    assert_eq!(MinixError::Eperm.code(), 1);
    assert_eq!(MinixError::Enoent.code(), 2);
    assert_eq!(MinixError::Enomem.code(), 12);
    assert_eq!(MinixError::Einval.code(), 22);
    assert_eq!(MinixError::Enotempty.code(), 39);
}

#[test]
fn unknown_host_errors_collapse_to_the_catch_all() {
    assert_eq!(MinixError::from_host_errno(libc::EOVERFLOW), MinixError::Error);
    assert_eq!(MinixError::Error.code(), 99);
}
