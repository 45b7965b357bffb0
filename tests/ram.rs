use minixrun::ram::{GuestRam, RAM_SIZE};

use proptest::prelude::*;

#[test]
fn values_round_trip() {
    let mut ram = GuestRam::new();

    ram.write_8(0x1000, 0xAB);
    assert_eq!(ram.read_8(0x1000), 0xAB);

    ram.write_16(0x2000, 0xBEEF);
    assert_eq!(ram.read_16(0x2000), 0xBEEF);

    ram.write_32(0x3000, 0xDEAD_BEEF);
    assert_eq!(ram.read_32(0x3000), 0xDEAD_BEEF);
}

#[test]
fn storage_is_big_endian() {
    let mut ram = GuestRam::new();

    ram.write_32(0x1000, 0x1234_5678);
    assert_eq!(ram.read_8(0x1000), 0x12);
    assert_eq!(ram.read_8(0x1001), 0x34);
    assert_eq!(ram.read_8(0x1002), 0x56);
    assert_eq!(ram.read_8(0x1003), 0x78);

    ram.write_16(0x2000, 0xCAFE);
    assert_eq!(ram.read_8(0x2000), 0xCA);
    assert_eq!(ram.read_8(0x2001), 0xFE);
}

#[test]
fn block_transfer_round_trips() {
    let mut ram = GuestRam::new();

    let block: Vec<u8> = (0..=255).collect();
    ram.copy_from_host(0x4000, &block);
    assert_eq!(ram.copy_to_host(0x4000, block.len()), block);

    // Verbatim: bytes land exactly where asked, no conversion.
    assert_eq!(ram.read_8(0x4000), 0);
    assert_eq!(ram.read_8(0x40FF), 255);
}

#[test]
fn last_byte_is_addressable() {
    let mut ram = GuestRam::new();
    let last = (RAM_SIZE - 1) as u32;
    ram.write_8(last, 0x7F);
    assert_eq!(ram.read_8(last), 0x7F);
}

#[test]
#[should_panic(expected = "out of range")]
fn read_past_end_is_fatal() {
    let ram = GuestRam::new();
    ram.read_32((RAM_SIZE - 2) as u32);
}

#[test]
#[should_panic(expected = "out of range")]
fn block_past_end_is_fatal() {
    let mut ram = GuestRam::new();
    ram.copy_from_host((RAM_SIZE - 4) as u32, &[0u8; 8]);
}

proptest! {
    #[test]
    fn word_round_trip(addr in 0u32..(RAM_SIZE as u32 - 2), value: u16) {
        let mut ram = GuestRam::new();
        ram.write_16(addr, value);
        prop_assert_eq!(ram.read_16(addr), value);
    }

    #[test]
    fn long_round_trip(addr in 0u32..(RAM_SIZE as u32 - 4), value: u32) {
        let mut ram = GuestRam::new();
        ram.write_32(addr, value);
        prop_assert_eq!(ram.read_32(addr), value);
    }
}
