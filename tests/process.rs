use std::time::{Duration, Instant};

use minixrun::errno::MinixError;
use minixrun::executable::STACK_BASE;
use minixrun::process::{
    build_stack_snapshot, host_signal_for_minix, minix_signal_for_host, minix_status_for_host,
    ProcessBridge, MINIX_SIGKILL, MINIX_SIGUSR2, MINIX_SIG_DFL,
};

#[test]
fn initial_process_ids_mimic_the_login_chain() {
    // We are the login shell (6), our parent is login (5); the first child
    // forked would be 7.
    let bridge = ProcessBridge::new();
    assert_eq!(bridge.process_ids(), (6, 5));
}

#[test]
fn wait_status_encoding() {
    // Host wait statuses, Linux layout: exit code in bits 8..16, signal in
    // the low 7 bits, 0x7f marks a stop.
    let exited_42 = 42 << 8;
    assert_eq!(minix_status_for_host(exited_42), 0x002A);

    let killed_by_9 = 9;
    assert_eq!(minix_status_for_host(killed_by_9), 9 << 8);

    let stopped_by_19 = (19 << 8) | 0x7F;
    assert_eq!(minix_status_for_host(stopped_by_19), (19 << 8) | 0o177);
}

#[test]
fn signal_tables_invert_each_other() {
    for signal in 1..=16 {
        let host = host_signal_for_minix(signal);
        assert_eq!(minix_signal_for_host(host), signal, "signal {signal}");
    }
    // Signals MINIX has no word for map to 0.
    assert_eq!(minix_signal_for_host(libc::SIGWINCH), 0);
}

#[test]
fn signal_records_handler_and_returns_previous() {
    let mut bridge = ProcessBridge::new();

    assert_eq!(bridge.handler(MINIX_SIGUSR2), MINIX_SIG_DFL);
    let old = bridge.signal(MINIX_SIGUSR2, 0x0000_4000).unwrap();
    assert_eq!(old, MINIX_SIG_DFL);

    let old = bridge.signal(MINIX_SIGUSR2, 0x0000_5000).unwrap();
    assert_eq!(old, 0x0000_4000);
    assert_eq!(bridge.handler(MINIX_SIGUSR2), 0x0000_5000);
}

#[test]
fn signal_rejects_bad_numbers() {
    let mut bridge = ProcessBridge::new();
    assert_eq!(bridge.signal(0, 0), Err(MinixError::Einval));
    assert_eq!(bridge.signal(17, 0), Err(MinixError::Einval));
    assert_eq!(bridge.kill(7, 99), Err(MinixError::Einval));
}

#[test]
fn kill_unknown_pid_is_esrch() {
    let bridge = ProcessBridge::new();
    assert_eq!(bridge.kill(1234, MINIX_SIGKILL), Err(MinixError::Esrch));
}

#[test]
fn self_kill_records_a_pending_signal() {
    let mut bridge = ProcessBridge::new();

    // Install a guest handler so the host trampoline is in place, then
    // signal ourselves (guest pid 6 is this process).
    bridge.signal(MINIX_SIGUSR2, 0x0000_4000).unwrap();
    bridge.kill(6, MINIX_SIGUSR2).unwrap();

    // Delivery is asynchronous; give the handler a moment.
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(signal) = bridge.take_pending_signal() {
            assert_eq!(signal, MINIX_SIGUSR2);
            break;
        }
        assert!(Instant::now() < deadline, "pending signal never arrived");
        std::thread::sleep(Duration::from_millis(5));
    }

    // The slot is drained.
    assert_eq!(bridge.take_pending_signal(), None);
}

#[test]
fn stack_snapshot_layout() {
    let args = vec!["cat".to_string(), "x".to_string()];
    let env = vec!["HOME=/usr/ast"];

    let snapshot = build_stack_snapshot(&args, &env);

    let word = |i: usize| u32::from_be_bytes(snapshot[i * 4..i * 4 + 4].try_into().unwrap());

    // argc, argv[0], argv[1], NULL, envp[0], NULL: six table words.
    let table_size = 6 * 4;

    assert_eq!(word(0), 2);
    assert_eq!(word(1), STACK_BASE + table_size);
    assert_eq!(word(2), STACK_BASE + table_size + 4); // "cat\0" rounds to 4
    assert_eq!(word(3), 0);
    assert_eq!(word(4), STACK_BASE + table_size + 8);
    assert_eq!(word(5), 0);

    let strings = &snapshot[table_size as usize..];
    assert_eq!(&strings[0..4], b"cat\0");
    assert_eq!(&strings[4..6], b"x\0");
    assert_eq!(&strings[8..22], b"HOME=/usr/ast\0");

    // String area stays 4-byte aligned overall.
    assert_eq!(snapshot.len() % 4, 0);
}

#[test]
fn stack_snapshot_with_no_args_or_env() {
    let snapshot = build_stack_snapshot(&[], &[]);
    let word = |i: usize| u32::from_be_bytes(snapshot[i * 4..i * 4 + 4].try_into().unwrap());

    assert_eq!(word(0), 0); // argc
    assert_eq!(word(1), 0); // argv terminator
    assert_eq!(word(2), 0); // envp terminator
    assert_eq!(snapshot.len(), 12);
}
