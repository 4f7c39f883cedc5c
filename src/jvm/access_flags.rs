use super::class_file::{ByteReader, Deserialize, Serialize};
use super::Error;
use bitflags::bitflags;
use byteorder::WriteBytesExt;
use std::io::Result;

bitflags! {
    /// Access flags on classes
    ///
    /// Unassigned bits are kept as-is when parsing, so that re-serializing a class reproduces it
    /// exactly.
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.1-200-E.1
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const FINAL = 0x0010;
        const SUPER = 0x0020;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access flags on methods
    ///
    /// `STRICT` is only meaningful in class files older than version 61.
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.6-200-A.1
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct MethodAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const BRIDGE = 0x0040;
        const VARARGS = 0x0080;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
        const STRICT = 0x0800;
        const SYNTHETIC = 0x1000;
    }
}

bitflags! {
    /// Access flags on fields
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.5-200-A.1
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct FieldAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
    }
}

bitflags! {
    /// Access flags on inner classes
    ///
    /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.6-300-D.1-D.1
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
    pub struct InnerClassAccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ANNOTATION = 0x2000;
        const ENUM = 0x4000;
    }
}

macro_rules! flags_binary_format {
    ($($flags:ty),*) => {
        $(
            impl Serialize for $flags {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> Result<()> {
                    self.bits().serialize(writer)
                }
            }

            impl Deserialize for $flags {
                fn deserialize(reader: &mut ByteReader<'_>) -> std::result::Result<Self, Error> {
                    Ok(<$flags>::from_bits_retain(reader.read_u2()?))
                }
            }
        )*
    };
}

flags_binary_format!(
    ClassAccessFlags,
    MethodAccessFlags,
    FieldAccessFlags,
    InnerClassAccessFlags
);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unassigned_bits_survive() {
        let bytes = [0x82, 0x01];
        let mut reader = ByteReader::new(&bytes);
        let flags = MethodAccessFlags::deserialize(&mut reader).unwrap();
        assert!(flags.contains(MethodAccessFlags::PUBLIC));
        assert_eq!(flags.bits(), 0x8201);

        let mut out = vec![];
        flags.serialize(&mut out).unwrap();
        assert_eq!(out, bytes);
    }
}
