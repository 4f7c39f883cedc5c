use crate::jvm::Error;
use byteorder::{BigEndian, ByteOrder};

/// Forward-only, bounds-checked cursor over the bytes of a class file
///
/// Every read either consumes exactly the bytes it needs or fails with
/// [`Error::TruncatedClassFile`] without moving the cursor. There is no way to rewind.
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> ByteReader<'a> {
        ByteReader { bytes, position: 0 }
    }

    /// Offset of the next byte to be read
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes left to read
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consume the next `n` bytes
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(Error::TruncatedClassFile {
                offset: self.position,
                needed: n,
                remaining,
            });
        }
        let start = self.position;
        self.position += n;
        Ok(&self.bytes[start..self.position])
    }

    pub fn read_u1(&mut self) -> Result<u8, Error> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u2(&mut self) -> Result<u16, Error> {
        Ok(BigEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u4(&mut self) -> Result<u32, Error> {
        Ok(BigEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u8(&mut self) -> Result<u64, Error> {
        Ok(BigEndian::read_u64(self.read_bytes(8)?))
    }

    pub fn read_i1(&mut self) -> Result<i8, Error> {
        Ok(self.read_u1()? as i8)
    }

    pub fn read_i2(&mut self) -> Result<i16, Error> {
        Ok(BigEndian::read_i16(self.read_bytes(2)?))
    }

    pub fn read_i4(&mut self) -> Result<i32, Error> {
        Ok(BigEndian::read_i32(self.read_bytes(4)?))
    }

    /// Split off a reader over the next `n` bytes, advancing this reader past them
    ///
    /// Used for length-prefixed structures (eg. attributes), so that the nested decoder cannot
    /// read past the declared length.
    pub fn sub_reader(&mut self, n: usize) -> Result<ByteReader<'a>, Error> {
        let bytes = self.read_bytes(n)?;
        Ok(ByteReader::new(bytes))
    }
}

/// Counterpart of [`super::Serialize`]: decoding data inside class files
///
/// Sequences are prefixed by a `u16` length, just like when serializing.
pub trait Deserialize: Sized {
    /// Deserialize construct from a binary input stream
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error>;
}

impl Deserialize for u8 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        reader.read_u1()
    }
}

impl Deserialize for u16 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        reader.read_u2()
    }
}

impl Deserialize for u32 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        reader.read_u4()
    }
}

impl Deserialize for u64 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        reader.read_u8()
    }
}

impl Deserialize for i32 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        reader.read_i4()
    }
}

impl Deserialize for i64 {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(reader.read_u8()? as i64)
    }
}

/// Size in `u16` is the first thing serialized/deserialized
impl<A: Deserialize> Deserialize for Vec<A> {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        let len = reader.read_u2()?;
        let mut elems = Vec::with_capacity(len as usize);
        for _ in 0..len {
            elems.push(A::deserialize(reader)?);
        }
        Ok(elems)
    }
}
