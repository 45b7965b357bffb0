//! The MINIX IPC message, which carries every system call.
//!
//! On the wire a message is one flat record: a two-field header (`m_source`,
//! `m_type`) followed by one of six payload shapes, all fields big-endian.
//! The record is not self-describing; each call site knows which shape a
//! given call uses and says so by going through that shape's accessor
//! family (`m1_*`, `m2_*`, …). Accessors convert at the field edge, so a
//! field that is never touched keeps its original bytes.
//!
//! Shape layouts, with byte offsets into the record:
//!
//! ```text
//! header  m_source:i16 @0   m_type:i16 @2
//! mess1   i1 @4  i2 @6  i3 @8   p1 @10  p2 @14  p3 @18
//! mess2   i1 @4  i2 @6  i3 @8   l1 @10  l2 @14  p1 @18
//! mess3   i1 @4  i2 @6          p1 @8   ca1 @12 (14 bytes)
//! mess4   l1 @4  l2 @8  l3 @12  l4 @16
//! mess5   c1 @4  c2 @5  i1 @6   i2 @8   l1 @10  l2 @14  l3 @18
//! mess6   i1 @4  i2 @6  i3 @8   l1 @10  f1 @14
//! ```

/// Size of the message record as copied to and from guest RAM.
pub const MESSAGE_SIZE: usize = 32;

/// A MINIX message in guest (big-endian) byte order.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Message {
    raw: [u8; MESSAGE_SIZE],
}

macro_rules! field_i16 {
    ($get:ident, $set:ident, $off:expr) => {
        pub fn $get(&self) -> i16 {
            i16::from_be_bytes([self.raw[$off], self.raw[$off + 1]])
        }
        pub fn $set(&mut self, value: i16) {
            self.raw[$off..$off + 2].copy_from_slice(&value.to_be_bytes());
        }
    };
}

macro_rules! field_i32 {
    ($get:ident, $set:ident, $off:expr) => {
        pub fn $get(&self) -> i32 {
            i32::from_be_bytes(self.raw[$off..$off + 4].try_into().unwrap())
        }
        pub fn $set(&mut self, value: i32) {
            self.raw[$off..$off + 4].copy_from_slice(&value.to_be_bytes());
        }
    };
}

macro_rules! field_addr {
    ($get:ident, $set:ident, $off:expr) => {
        pub fn $get(&self) -> u32 {
            u32::from_be_bytes(self.raw[$off..$off + 4].try_into().unwrap())
        }
        pub fn $set(&mut self, value: u32) {
            self.raw[$off..$off + 4].copy_from_slice(&value.to_be_bytes());
        }
    };
}

impl Message {
    pub fn new() -> Self {
        Self {
            raw: [0; MESSAGE_SIZE],
        }
    }

    pub fn from_bytes(raw: [u8; MESSAGE_SIZE]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; MESSAGE_SIZE] {
        &self.raw
    }

    /// Zero the whole record before filling out a reply, so no stale request
    /// bytes leak back to the guest.
    pub fn clear(&mut self) {
        self.raw = [0; MESSAGE_SIZE];
    }

    // Header.
    field_i16!(source, set_source, 0);
    field_i16!(m_type, set_m_type, 2);

    // mess1: three ints, three pointers.
    field_i16!(m1_i1, set_m1_i1, 4);
    field_i16!(m1_i2, set_m1_i2, 6);
    field_i16!(m1_i3, set_m1_i3, 8);
    field_addr!(m1_p1, set_m1_p1, 10);
    field_addr!(m1_p2, set_m1_p2, 14);
    field_addr!(m1_p3, set_m1_p3, 18);

    // mess2: three ints, two longs, one pointer.
    field_i16!(m2_i1, set_m2_i1, 4);
    field_i16!(m2_i2, set_m2_i2, 6);
    field_i16!(m2_i3, set_m2_i3, 8);
    field_i32!(m2_l1, set_m2_l1, 10);
    field_i32!(m2_l2, set_m2_l2, 14);
    field_addr!(m2_p1, set_m2_p1, 18);

    // mess3: two ints, one pointer, 14 inline bytes.
    field_i16!(m3_i1, set_m3_i1, 4);
    field_i16!(m3_i2, set_m3_i2, 6);
    field_addr!(m3_p1, set_m3_p1, 8);

    pub fn m3_ca1(&self) -> &[u8] {
        &self.raw[12..26]
    }

    pub fn set_m3_ca1(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(14);
        self.raw[12..26].fill(0);
        self.raw[12..12 + n].copy_from_slice(&bytes[..n]);
    }

    // mess4: four longs.
    field_i32!(m4_l1, set_m4_l1, 4);
    field_i32!(m4_l2, set_m4_l2, 8);
    field_i32!(m4_l3, set_m4_l3, 12);
    field_i32!(m4_l4, set_m4_l4, 16);

    // mess5: two chars, two ints, three longs.
    pub fn m5_c1(&self) -> u8 {
        self.raw[4]
    }
    pub fn set_m5_c1(&mut self, value: u8) {
        self.raw[4] = value;
    }
    pub fn m5_c2(&self) -> u8 {
        self.raw[5]
    }
    pub fn set_m5_c2(&mut self, value: u8) {
        self.raw[5] = value;
    }
    field_i16!(m5_i1, set_m5_i1, 6);
    field_i16!(m5_i2, set_m5_i2, 8);
    field_i32!(m5_l1, set_m5_l1, 10);
    field_i32!(m5_l2, set_m5_l2, 14);
    field_i32!(m5_l3, set_m5_l3, 18);

    // mess6: three ints, one long, one function pointer.
    field_i16!(m6_i1, set_m6_i1, 4);
    field_i16!(m6_i2, set_m6_i2, 6);
    field_i16!(m6_i3, set_m6_i3, 8);
    field_i32!(m6_l1, set_m6_l1, 10);
    field_addr!(m6_f1, set_m6_f1, 14);
}

impl Default for Message {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Message {{ source: {}, type: {}, raw: {:02x?} }}",
            self.source(),
            self.m_type(),
            &self.raw[4..]
        )
    }
}
