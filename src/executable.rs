//! Loader for MINIX 1.5 M68000 executables.
//!
//! The format is a 32-byte big-endian header, text, data, an (ignored)
//! symbol table, and a relocation stream. Text and data are laid out in an
//! image rounded up to 256-byte "clicks", and the relocation stream patches
//! absolute longwords so the image can live at the fixed executable base.

use std::io::{Read, Seek, SeekFrom};

use thiserror::Error;

use crate::errno::MinixError;

/// Where the executable image (text + data + bss + heap) is loaded.
pub const EXECUTABLE_BASE: u32 = 0x0000_1000;
/// The heap may grow up to here.
pub const EXECUTABLE_LIMIT: u32 = 0x00FE_0000;
/// Initial stack pointer; the stack grows downward from here.
pub const STACK_BASE: u32 = 0x00FF_0000;
/// The stack may grow down to here.
pub const STACK_LIMIT: u32 = 0x00FE_0000;

/// MINIX's allocation granularity.
pub const CLICK_SIZE: u32 = 256;

const MAGIC_COMBINED: u32 = 0x0410_0301;
const MAGIC_SEPARATE: u32 = 0x0420_0301;
const EXEC_FLAGS: u32 = 0x0000_0020;

const HEADER_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum LoadError {
    /// The file is structurally not a MINIX executable: bad magic, bad
    /// flags, a zero total size, or a malformed relocation stream.
    #[error("not a MINIX executable")]
    NotExecutable,

    #[error("I/O error reading executable: {0}")]
    Io(#[from] std::io::Error),
}

impl LoadError {
    pub fn minix_errno(&self) -> MinixError {
        match self {
            LoadError::NotExecutable => MinixError::Enoexec,
            LoadError::Io(_) => MinixError::Eio,
        }
    }
}

/// Executable header, swapped to host byte order and with the combined-I&D
/// fold already applied.
#[derive(Debug, Clone, Copy)]
pub struct ExecHeader {
    pub magic: u32,
    pub flags: u32,
    pub text: u32,
    pub data: u32,
    pub bss: u32,
    pub total: u32,
    pub syms: u32,
}

fn click_round(size: u32) -> u32 {
    (size + CLICK_SIZE - 1) / CLICK_SIZE
}

/// Load a MINIX executable: parse and validate the header, lay text and data
/// out in a click-rounded zero-filled image, and apply relocations against
/// the executable base. Returns the host-order header and the finished image
/// (still big-endian data, ready to copy into guest RAM).
pub fn load<R: Read + Seek>(source: &mut R) -> Result<(ExecHeader, Vec<u8>), LoadError> {
    let header = load_header(source)?;

    let text_clicks = click_round(header.text);
    let total_clicks = click_round(header.total);
    let mut image = vec![0u8; (total_clicks * CLICK_SIZE) as usize];

    // Seek past the header, then read text and data at their click-aligned
    // offsets.
    source.seek(SeekFrom::Start(HEADER_SIZE as u64))?;

    let text_base = 0usize;
    let data_base = (text_clicks * CLICK_SIZE) as usize;

    if header.text > 0 {
        source
            .read_exact(&mut image[text_base..text_base + header.text as usize])
            .map_err(|_| LoadError::NotExecutable)?;
    }

    if header.data > 0 {
        source
            .read_exact(&mut image[data_base..data_base + header.data as usize])
            .map_err(|_| LoadError::NotExecutable)?;
    }

    // The relocation stream sits after the symbol table, which we skip.
    if header.syms > 0 {
        source.seek(SeekFrom::Current(header.syms as i64))?;
    }

    relocate(source, &mut image)?;

    Ok((header, image))
}

fn load_header<R: Read + Seek>(source: &mut R) -> Result<ExecHeader, LoadError> {
    source.seek(SeekFrom::Start(0))?;

    let mut raw = [0u8; HEADER_SIZE];
    source.read_exact(&mut raw).map_err(LoadError::Io)?;

    let word = |i: usize| u32::from_be_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());

    let mut header = ExecHeader {
        magic: word(0),
        flags: word(1),
        text: word(2),
        data: word(3),
        bss: word(4),
        total: word(6),
        syms: word(7),
    };
    let no_entry = word(5);

    if header.magic != MAGIC_COMBINED && header.magic != MAGIC_SEPARATE {
        return Err(LoadError::NotExecutable);
    }
    if header.flags != EXEC_FLAGS || no_entry != 0 || header.total == 0 {
        return Err(LoadError::NotExecutable);
    }

    if header.magic == MAGIC_COMBINED {
        // Combined I&D is considered all data.
        header.data += header.text;
        header.text = 0;
    }

    Ok(header)
}

/// Add the executable base to the big-endian longword at `offset`.
fn relocate_long_at(image: &mut [u8], offset: u32) -> Result<(), LoadError> {
    let at = offset as usize;
    if at + 4 > image.len() {
        return Err(LoadError::NotExecutable);
    }
    let long = u32::from_be_bytes(image[at..at + 4].try_into().unwrap());
    let relocated = long.wrapping_add(EXECUTABLE_BASE);
    image[at..at + 4].copy_from_slice(&relocated.to_be_bytes());
    Ok(())
}

/// Walk the relocation stream: an initial 32-bit offset (zero or absent
/// means nothing to do), then one byte per step where 0x00 terminates, 0x01
/// advances the offset by 254 without patching, other even values advance by
/// their value and patch, and any other odd value is a malformed stream.
fn relocate<R: Read>(source: &mut R, image: &mut [u8]) -> Result<(), LoadError> {
    let mut initial = [0u8; 4];
    if source.read_exact(&mut initial).is_err() {
        // No relocation information at all.
        return Ok(());
    }

    let mut offset = u32::from_be_bytes(initial);
    if offset == 0 {
        return Ok(());
    }

    relocate_long_at(image, offset)?;

    loop {
        let mut byte = [0u8; 1];
        source.read_exact(&mut byte).map_err(LoadError::Io)?;

        match byte[0] {
            0x00 => break,
            0x01 => offset += 254,
            b if b & 0x01 == 0 => {
                offset += b as u32;
                relocate_long_at(image, offset)?;
            }
            _ => return Err(LoadError::NotExecutable),
        }
    }

    Ok(())
}
