mod common;

use std::fs;

use minixrun::errno::MinixError;
use minixrun::filesystem::{
    minix_inode_for, FileBridge, MinixStat, DIRENT_SIZE, MINIX_O_RDONLY, MINIX_O_RDWR,
    MINIX_S_IFDIR, MINIX_S_IFMT, MINIX_S_IFREG, MINIX_SEEK_END, MINIX_SEEK_SET, STAT_SIZE,
};

use common::scratch_root;

#[test]
fn host_paths_are_rooted() {
    let bridge = FileBridge::with_root("/opt/minix", "/usr/ast");

    assert_eq!(bridge.host_path_for("/etc/motd"), "/opt/minix/etc/motd");
    assert_eq!(bridge.host_path_for("motd"), "/opt/minix/usr/ast/motd");
    assert_eq!(bridge.working_directory(), "/usr/ast");
}

#[test]
fn open_and_read_a_file() {
    let root = scratch_root("motd");
    fs::create_dir(root.join("etc")).unwrap();
    fs::write(root.join("etc/motd"), b"hello\n").unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");

    let fd = bridge.open("/etc/motd", MINIX_O_RDONLY, 0).unwrap();
    assert!(fd >= 3, "stdio slots are pre-wired");

    let mut buf = [0u8; 6];
    assert_eq!(bridge.read(fd, &mut buf).unwrap(), 6);
    assert_eq!(&buf, b"hello\n");

    assert_eq!(bridge.close(fd).unwrap(), 0);
    // The slot is free again.
    assert_eq!(bridge.read(fd, &mut buf), Err(MinixError::Ebadf));
}

#[test]
fn descriptors_allocate_lowest_free_slot() {
    let root = scratch_root("slots");
    fs::write(root.join("f"), b"x").unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");

    let first = bridge.open("/f", MINIX_O_RDONLY, 0).unwrap();
    let second = bridge.open("/f", MINIX_O_RDONLY, 0).unwrap();
    assert_eq!((first, second), (3, 4));

    bridge.close(first).unwrap();
    assert_eq!(bridge.open("/f", MINIX_O_RDONLY, 0).unwrap(), 3);
}

#[test]
fn table_exhaustion_reports_enfile() {
    let root = scratch_root("enfile");
    fs::write(root.join("f"), b"x").unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");

    // 17 opens fill slots 3..19.
    for _ in 0..17 {
        bridge.open("/f", MINIX_O_RDONLY, 0).unwrap();
    }
    assert_eq!(
        bridge.open("/f", MINIX_O_RDONLY, 0),
        Err(MinixError::Enfile)
    );
}

#[test]
fn missing_file_reports_enoent() {
    let root = scratch_root("enoent");
    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");

    assert_eq!(
        bridge.open("/no/such/file", MINIX_O_RDONLY, 0),
        Err(MinixError::Enoent)
    );
}

#[test]
fn create_write_stat_unlink() {
    let root = scratch_root("create");
    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");

    let fd = bridge.create("/out.txt", 0o644).unwrap();
    assert_eq!(bridge.write(fd, b"abcdef").unwrap(), 6);
    bridge.close(fd).unwrap();

    let stat = bridge.stat("/out.txt").unwrap();
    assert_eq!(stat.mode & MINIX_S_IFMT, MINIX_S_IFREG);
    assert_eq!(stat.size, 6);
    assert_ne!(stat.ino, 0);

    assert_eq!(bridge.unlink("/out.txt").unwrap(), 0);
    assert_eq!(bridge.stat("/out.txt"), Err(MinixError::Enoent));
}

#[test]
fn seek_and_reread() {
    let root = scratch_root("seek");
    fs::write(root.join("f"), b"0123456789").unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");
    let fd = bridge.open("/f", MINIX_O_RDWR, 0).unwrap();

    assert_eq!(bridge.seek(fd, 4, MINIX_SEEK_SET).unwrap(), 4);
    let mut buf = [0u8; 2];
    bridge.read(fd, &mut buf).unwrap();
    assert_eq!(&buf, b"45");

    assert_eq!(bridge.seek(fd, -2, MINIX_SEEK_END).unwrap(), 8);
    bridge.read(fd, &mut buf).unwrap();
    assert_eq!(&buf, b"89");
}

#[test]
fn directory_reads_serve_synthesized_entries() {
    let root = scratch_root("dir");
    fs::create_dir(root.join("d")).unwrap();
    fs::write(root.join("d/alpha"), b"").unwrap();
    fs::write(root.join("d/beta"), b"").unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");
    let fd = bridge.open("/d", MINIX_O_RDONLY, 0).unwrap();

    // ".", "..", and the two files; the cache is padded to one 32-entry
    // block of 16-byte records.
    let mut block = vec![0u8; 32 * DIRENT_SIZE];
    assert_eq!(bridge.read(fd, &mut block).unwrap(), block.len());

    let mut names = Vec::new();
    for chunk in block.chunks(DIRENT_SIZE) {
        let ino = u16::from_be_bytes([chunk[0], chunk[1]]);
        if ino == 0 {
            continue;
        }
        let name_end = chunk[2..].iter().position(|&b| b == 0).unwrap_or(14);
        names.push(String::from_utf8_lossy(&chunk[2..2 + name_end]).into_owned());
    }

    names.sort();
    assert_eq!(names, vec![".", "..", "alpha", "beta"]);

    // The cache is exhausted: fixed-size directory reads must not come up
    // short.
    let mut more = [0u8; DIRENT_SIZE];
    assert_eq!(bridge.read(fd, &mut more), Err(MinixError::Eio));
}

#[test]
fn directory_seek_is_bounded() {
    let root = scratch_root("dirseek");
    fs::create_dir(root.join("d")).unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");
    let fd = bridge.open("/d", MINIX_O_RDONLY, 0).unwrap();

    let cache_len = (32 * DIRENT_SIZE) as i32;

    assert_eq!(bridge.seek(fd, 16, MINIX_SEEK_SET).unwrap(), 16);
    assert_eq!(bridge.seek(fd, 0, MINIX_SEEK_END).unwrap(), cache_len - 1);
    assert_eq!(
        bridge.seek(fd, cache_len, MINIX_SEEK_SET),
        Err(MinixError::Einval)
    );
    assert_eq!(bridge.seek(fd, -1, MINIX_SEEK_SET), Err(MinixError::Einval));
}

#[test]
fn fstat_works_on_directories() {
    let root = scratch_root("fstatdir");
    fs::create_dir(root.join("d")).unwrap();

    let mut bridge = FileBridge::with_root(root.to_str().unwrap(), "/");
    let fd = bridge.open("/d", MINIX_O_RDONLY, 0).unwrap();

    let stat = bridge.fstat(fd).unwrap();
    assert_eq!(stat.mode & MINIX_S_IFMT, MINIX_S_IFDIR);
}

#[test]
fn access_checks_permissions() {
    let root = scratch_root("access");
    fs::write(root.join("f"), b"x").unwrap();

    let bridge = FileBridge::with_root(root.to_str().unwrap(), "/");

    assert_eq!(bridge.access("/f", 0o4).unwrap(), 0);
    assert_eq!(bridge.access("/missing", 0o4), Err(MinixError::Enoent));
}

#[test]
fn inode_squeeze_folds_rather_than_zeroing() {
    assert_eq!(minix_inode_for(0), 0);
    assert_eq!(minix_inode_for(5), 5);
    assert_eq!(minix_inode_for(0xFFFF), 0xFFFF);

    // Plain truncation would give 0; the halves fold instead.
    assert_eq!(minix_inode_for(0x0001_0000), 1);
    assert_eq!(minix_inode_for(0x0001_0000_0000), 1);
    assert_eq!(minix_inode_for(0x0002_0003_0000), 5);

    // Never 0 for a real inode.
    assert_ne!(minix_inode_for(0xFFFF_0000_0000_0000), 0);
}

#[test]
fn stat_record_round_trips_through_guest_order() {
    let stat = MinixStat {
        dev: 0x0102,
        ino: 0x0304,
        mode: MINIX_S_IFREG | 0o644,
        nlink: 2,
        uid: 8,
        gid: 3,
        rdev: 0,
        size: 0x7FFF_FFFF,
        atime: 0x1111_2222,
        mtime: 0x3333_4444,
        ctime: 0x5555_6666,
    };

    let encoded = stat.encode();
    assert_eq!(encoded.len(), STAT_SIZE);
    // Big-endian on the wire.
    assert_eq!(&encoded[0..2], &[0x01, 0x02]);
    assert_eq!(&encoded[14..18], &[0x7F, 0xFF, 0xFF, 0xFF]);

    assert_eq!(MinixStat::decode(&encoded), stat);
}
