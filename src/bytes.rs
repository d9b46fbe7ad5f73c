use std::io;

use byteorder::{ReadBytesExt, WriteBytesExt};

/// Fixed little-endian binary layout shared by connect tokens and packet bodies.
pub trait Bytes: Sized {
    fn write_to(&self, writer: &mut impl WriteBytesExt) -> Result<(), io::Error>;
    fn read_from(reader: &mut impl ReadBytesExt) -> Result<Self, io::Error>;
}

/// Reads exactly `N` bytes, e.g. a key or an ip address.
pub fn read_array<const N: usize>(reader: &mut impl io::Read) -> Result<[u8; N], io::Error> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}
