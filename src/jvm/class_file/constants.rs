use super::modified_utf8::{decode_modified_utf8, encode_modified_utf8};
use super::{ByteReader, Deserialize, Serialize, Version};
use crate::jvm::names::UnqualifiedName;
use crate::jvm::{ClassFormatErrorKind, Error};
use crate::util::{Offset, OffsetResult, OffsetVec, Width};
use byteorder::WriteBytesExt;
use std::borrow::{Borrow, Cow};
use std::collections::HashMap;
use std::fmt;
use std::result::Result;

/// Constants as in the constant pool
///
/// Floating point constants are kept as their raw IEEE 754 bits, so that constants can be
/// compared for equality and written back out bit-for-bit (including NaN payloads).
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Class or an interface
    Class(Utf8ConstantIndex),

    /// Field
    FieldRef(ClassConstantIndex, NameAndTypeConstantIndex),

    /// Method (this combines `Methodref` and `InterfaceMethodref`
    MethodRef {
        class: ClassConstantIndex,
        name_and_type: NameAndTypeConstantIndex,
        is_interface: bool,
    },

    /// Constant object of type `java.lang.String`
    String(Utf8ConstantIndex),

    /// Constant primitive of type `int`
    Integer(i32),

    /// Constant primitive of type `float`
    Float(u32),

    /// Constant primitive of type `long`
    Long(i64),

    /// Constant primitive of type `double`
    Double(u64),

    /// Name and a type (eg. for a field or a method)
    NameAndType {
        name: Utf8ConstantIndex,
        descriptor: Utf8ConstantIndex,
    },

    /// Constant UTF-8 encoded raw string value
    ///
    /// Despite the name, the encoding is not quite UTF-8 (the encoding of the
    /// null character `\u{0000}` and the encoding of supplementary characters
    /// is different).
    Utf8(String),

    /// Constant object of type `java.lang.invoke.MethodHandle`
    MethodHandle {
        handle_kind: HandleKind,

        /// Depending on the method kind, this points to different things:
        ///
        ///   - `FieldRef` for `GetField`, `GetStatic`, `PutField`, `PutStatic`
        ///   - `MethodRef` for the rest
        member: ConstantIndex,
    },

    /// Method type
    MethodType { descriptor: Utf8ConstantIndex },

    /// Dynamically-computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        name_and_type: NameAndTypeConstantIndex,
    },

    /// Dynamically-computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap_method: u16,
        method_descriptor: NameAndTypeConstantIndex,
    },

    /// Module (only in `module-info`)
    Module(Utf8ConstantIndex),

    /// Package exported or opened by a module (only in `module-info`)
    Package(Utf8ConstantIndex),
}

/// Discriminant of [`Constant`], used in diagnostics and kind checks
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConstantKind {
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    FieldRef,
    MethodRef,
    InterfaceMethodRef,
    NameAndType,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    Module,
    Package,
}

impl ConstantKind {
    /// Tag byte used in the class file
    pub fn tag(self) -> u8 {
        match self {
            ConstantKind::Utf8 => 1,
            ConstantKind::Integer => 3,
            ConstantKind::Float => 4,
            ConstantKind::Long => 5,
            ConstantKind::Double => 6,
            ConstantKind::Class => 7,
            ConstantKind::String => 8,
            ConstantKind::FieldRef => 9,
            ConstantKind::MethodRef => 10,
            ConstantKind::InterfaceMethodRef => 11,
            ConstantKind::NameAndType => 12,
            ConstantKind::MethodHandle => 15,
            ConstantKind::MethodType => 16,
            ConstantKind::Dynamic => 17,
            ConstantKind::InvokeDynamic => 18,
            ConstantKind::Module => 19,
            ConstantKind::Package => 20,
        }
    }

    /// First class file version in which the constant may appear
    pub fn since(self) -> Version {
        match self {
            ConstantKind::MethodHandle | ConstantKind::MethodType | ConstantKind::InvokeDynamic => {
                Version::JAVA7
            }
            ConstantKind::Module | ConstantKind::Package => Version::JAVA9,
            ConstantKind::Dynamic => Version::JAVA11,
            _ => Version::JAVA1,
        }
    }

    fn from_tag(tag: u8) -> Option<ConstantKind> {
        let kind = match tag {
            1 => ConstantKind::Utf8,
            3 => ConstantKind::Integer,
            4 => ConstantKind::Float,
            5 => ConstantKind::Long,
            6 => ConstantKind::Double,
            7 => ConstantKind::Class,
            8 => ConstantKind::String,
            9 => ConstantKind::FieldRef,
            10 => ConstantKind::MethodRef,
            11 => ConstantKind::InterfaceMethodRef,
            12 => ConstantKind::NameAndType,
            15 => ConstantKind::MethodHandle,
            16 => ConstantKind::MethodType,
            17 => ConstantKind::Dynamic,
            18 => ConstantKind::InvokeDynamic,
            19 => ConstantKind::Module,
            20 => ConstantKind::Package,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ConstantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstantKind::Utf8 => "CONSTANT_Utf8",
            ConstantKind::Integer => "CONSTANT_Integer",
            ConstantKind::Float => "CONSTANT_Float",
            ConstantKind::Long => "CONSTANT_Long",
            ConstantKind::Double => "CONSTANT_Double",
            ConstantKind::Class => "CONSTANT_Class",
            ConstantKind::String => "CONSTANT_String",
            ConstantKind::FieldRef => "CONSTANT_Fieldref",
            ConstantKind::MethodRef => "CONSTANT_Methodref",
            ConstantKind::InterfaceMethodRef => "CONSTANT_InterfaceMethodref",
            ConstantKind::NameAndType => "CONSTANT_NameAndType",
            ConstantKind::MethodHandle => "CONSTANT_MethodHandle",
            ConstantKind::MethodType => "CONSTANT_MethodType",
            ConstantKind::Dynamic => "CONSTANT_Dynamic",
            ConstantKind::InvokeDynamic => "CONSTANT_InvokeDynamic",
            ConstantKind::Module => "CONSTANT_Module",
            ConstantKind::Package => "CONSTANT_Package",
        };
        f.write_str(name)
    }
}

impl Constant {
    pub fn kind(&self) -> ConstantKind {
        match self {
            Constant::Class(_) => ConstantKind::Class,
            Constant::FieldRef(_, _) => ConstantKind::FieldRef,
            Constant::MethodRef {
                is_interface: false,
                ..
            } => ConstantKind::MethodRef,
            Constant::MethodRef {
                is_interface: true, ..
            } => ConstantKind::InterfaceMethodRef,
            Constant::String(_) => ConstantKind::String,
            Constant::Integer(_) => ConstantKind::Integer,
            Constant::Float(_) => ConstantKind::Float,
            Constant::Long(_) => ConstantKind::Long,
            Constant::Double(_) => ConstantKind::Double,
            Constant::NameAndType { .. } => ConstantKind::NameAndType,
            Constant::Utf8(_) => ConstantKind::Utf8,
            Constant::MethodHandle { .. } => ConstantKind::MethodHandle,
            Constant::MethodType { .. } => ConstantKind::MethodType,
            Constant::Dynamic { .. } => ConstantKind::Dynamic,
            Constant::InvokeDynamic { .. } => ConstantKind::InvokeDynamic,
            Constant::Module(_) => ConstantKind::Module,
            Constant::Package(_) => ConstantKind::Package,
        }
    }

    /// Read one entry (tag included) from the pool
    ///
    /// `index` is only used for diagnostics. References to other entries are not checked here,
    /// since the pool may refer forward.
    fn parse(reader: &mut ByteReader<'_>, index: u16, version: Version) -> Result<Constant, Error> {
        let tag = reader.read_u1()?;
        let kind = match ConstantKind::from_tag(tag) {
            Some(kind) => kind,
            None => return Err(ClassFormatErrorKind::UnknownConstantTag { index, tag }.into()),
        };
        if version < kind.since() {
            return Err(ClassFormatErrorKind::UnsupportedConstantTag {
                index,
                tag,
                version,
            }
            .into());
        }

        let constant = match kind {
            ConstantKind::Utf8 => {
                let length = reader.read_u2()?;
                let bytes = reader.read_bytes(length as usize)?;
                match decode_modified_utf8(bytes) {
                    Some(string) => Constant::Utf8(string),
                    None => return Err(ClassFormatErrorKind::IllegalUtf8 { index }.into()),
                }
            }
            ConstantKind::Integer => Constant::Integer(reader.read_i4()?),
            ConstantKind::Float => Constant::Float(reader.read_u4()?),
            ConstantKind::Long => Constant::Long(i64::deserialize(reader)?),
            ConstantKind::Double => Constant::Double(reader.read_u8()?),
            ConstantKind::Class => Constant::Class(Deserialize::deserialize(reader)?),
            ConstantKind::String => Constant::String(Deserialize::deserialize(reader)?),
            ConstantKind::FieldRef => Constant::FieldRef(
                Deserialize::deserialize(reader)?,
                Deserialize::deserialize(reader)?,
            ),
            ConstantKind::MethodRef | ConstantKind::InterfaceMethodRef => Constant::MethodRef {
                class: Deserialize::deserialize(reader)?,
                name_and_type: Deserialize::deserialize(reader)?,
                is_interface: kind == ConstantKind::InterfaceMethodRef,
            },
            ConstantKind::NameAndType => Constant::NameAndType {
                name: Deserialize::deserialize(reader)?,
                descriptor: Deserialize::deserialize(reader)?,
            },
            ConstantKind::MethodHandle => {
                let reference_kind = reader.read_u1()?;
                let handle_kind = match HandleKind::from_u8(reference_kind) {
                    Some(handle_kind) => handle_kind,
                    None => {
                        return Err(ClassFormatErrorKind::IllegalMethodHandle {
                            index,
                            reason: format!("unknown reference kind {}", reference_kind),
                        }
                        .into())
                    }
                };
                Constant::MethodHandle {
                    handle_kind,
                    member: Deserialize::deserialize(reader)?,
                }
            }
            ConstantKind::MethodType => Constant::MethodType {
                descriptor: Deserialize::deserialize(reader)?,
            },
            ConstantKind::Dynamic => Constant::Dynamic {
                bootstrap_method: reader.read_u2()?,
                name_and_type: Deserialize::deserialize(reader)?,
            },
            ConstantKind::InvokeDynamic => Constant::InvokeDynamic {
                bootstrap_method: reader.read_u2()?,
                method_descriptor: Deserialize::deserialize(reader)?,
            },
            ConstantKind::Module => Constant::Module(Deserialize::deserialize(reader)?),
            ConstantKind::Package => Constant::Package(Deserialize::deserialize(reader)?),
        };
        Ok(constant)
    }
}

impl Serialize for Constant {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.kind().tag().serialize(writer)?;
        match self {
            Constant::Utf8(string) => {
                let buffer: Vec<u8> = encode_modified_utf8(string);
                (buffer.len() as u16).serialize(writer)?;
                writer.write_all(&buffer)?;
            }
            Constant::Integer(integer) => integer.serialize(writer)?,
            Constant::Float(float) => float.serialize(writer)?,
            Constant::Long(long) => long.serialize(writer)?,
            Constant::Double(double) => double.serialize(writer)?,
            Constant::Class(name) => name.serialize(writer)?,
            Constant::String(bytes) => bytes.serialize(writer)?,
            Constant::FieldRef(class, name_and_type) => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => {
                class.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::NameAndType { name, descriptor } => {
                name.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            Constant::MethodHandle {
                handle_kind,
                member,
            } => {
                handle_kind.serialize(writer)?;
                member.serialize(writer)?;
            }
            Constant::MethodType { descriptor } => descriptor.serialize(writer)?,
            Constant::Dynamic {
                bootstrap_method,
                name_and_type,
            } => {
                bootstrap_method.serialize(writer)?;
                name_and_type.serialize(writer)?;
            }
            Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            } => {
                bootstrap_method.serialize(writer)?;
                method_descriptor.serialize(writer)?;
            }
            Constant::Module(name) | Constant::Package(name) => name.serialize(writer)?,
        };
        Ok(())
    }
}

/// Almost all constants have width 1, except for `Constant::Long` and `Constant::Double`. Quoting
/// the JVMS:
///
/// > All 8-byte constants take up two entries in the constant_pool table of the class file. If a
/// > CONSTANT_Long_info or CONSTANT_Double_info structure is the item in the constant_pool table
/// > at index n, then the next usable item in the pool is located at index n+2. The constant_pool
/// > index n+1 must be valid but is considered unusable.
/// >
/// > In retrospect, making 8-byte constants take two constant pool entries was a poor choice.
impl Width for Constant {
    fn width(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ConstantIndex(pub u16);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct Utf8ConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct StringConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct NameAndTypeConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct ClassConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct FieldRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct MethodRefConstantIndex(pub ConstantIndex);

#[derive(Copy, Clone, Hash, Eq, PartialEq, Debug)]
pub struct InvokeDynamicConstantIndex(pub ConstantIndex);

impl Serialize for ConstantIndex {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Deserialize for ConstantIndex {
    fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
        Ok(ConstantIndex(reader.read_u2()?))
    }
}

impl fmt::Display for ConstantIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

macro_rules! typed_constant_indices {
    ($($index:ident),*) => {
        $(
            impl From<$index> for ConstantIndex {
                fn from(index: $index) -> ConstantIndex {
                    index.0
                }
            }

            impl Serialize for $index {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }

            impl Deserialize for $index {
                fn deserialize(reader: &mut ByteReader<'_>) -> Result<Self, Error> {
                    Ok($index(ConstantIndex::deserialize(reader)?))
                }
            }
        )*
    };
}

typed_constant_indices!(
    Utf8ConstantIndex,
    StringConstantIndex,
    NameAndTypeConstantIndex,
    ClassConstantIndex,
    FieldRefConstantIndex,
    MethodRefConstantIndex,
    InvokeDynamicConstantIndex
);

/// Type of method handle
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-5.html#jvms-5.4.3.5-220
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub enum HandleKind {
    GetField,
    GetStatic,
    PutField,
    PutStatic,
    InvokeVirtual,
    InvokeStatic,
    InvokeSpecial,
    NewInvokeSpecial,
    InvokeInterface,
}

impl HandleKind {
    pub fn from_u8(reference_kind: u8) -> Option<HandleKind> {
        let kind = match reference_kind {
            1 => HandleKind::GetField,
            2 => HandleKind::GetStatic,
            3 => HandleKind::PutField,
            4 => HandleKind::PutStatic,
            5 => HandleKind::InvokeVirtual,
            6 => HandleKind::InvokeStatic,
            7 => HandleKind::InvokeSpecial,
            8 => HandleKind::NewInvokeSpecial,
            9 => HandleKind::InvokeInterface,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            HandleKind::GetField => 1,
            HandleKind::GetStatic => 2,
            HandleKind::PutField => 3,
            HandleKind::PutStatic => 4,
            HandleKind::InvokeVirtual => 5,
            HandleKind::InvokeStatic => 6,
            HandleKind::InvokeSpecial => 7,
            HandleKind::NewInvokeSpecial => 8,
            HandleKind::InvokeInterface => 9,
        }
    }

    fn is_field(self) -> bool {
        matches!(
            self,
            HandleKind::GetField
                | HandleKind::GetStatic
                | HandleKind::PutField
                | HandleKind::PutStatic
        )
    }
}

impl Serialize for HandleKind {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.as_u8().serialize(writer)
    }
}

/// Resolved field or method reference
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemberRef<'a> {
    /// One of `FieldRef`, `MethodRef`, `InterfaceMethodRef`
    pub kind: ConstantKind,
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Constant pool of a parsed class file
///
/// Once returned from [`ConstantPool::parse`], every reference from one entry to another is known
/// to point at an entry of the expected kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    constants: OffsetVec<Constant>,
}

impl ConstantPool {
    /// Read the constant pool count and entries, then check cross references
    pub fn parse(reader: &mut ByteReader<'_>, version: Version) -> Result<ConstantPool, Error> {
        let pool_count = reader.read_u2()?;
        if pool_count == 0 {
            return Err(ClassFormatErrorKind::InvalidConstantPoolIndex {
                index: 0,
                pool_count,
            }
            .into());
        }

        let mut constants: OffsetVec<Constant> = OffsetVec::new_starting_at(Offset(1));
        while constants.offset_len().0 < pool_count as usize {
            let index = constants.offset_len().0 as u16;
            let constant = Constant::parse(reader, index, version)?;
            if index as usize + constant.width() > pool_count as usize {
                return Err(ClassFormatErrorKind::WideConstantAtPoolEnd { index }.into());
            }
            log::trace!("Constant #{} = {:?}", index, constant);
            constants.push(constant);
        }

        let pool = ConstantPool { constants };
        pool.validate_references(version)?;
        Ok(pool)
    }

    /// Check that every entry which refers to other entries points at the right kinds
    fn validate_references(&self, version: Version) -> Result<(), Error> {
        for (offset, _, constant) in &self.constants {
            let index = ConstantIndex(offset.0 as u16);
            match constant {
                Constant::Class(name)
                | Constant::String(name)
                | Constant::Module(name)
                | Constant::Package(name)
                | Constant::MethodType { descriptor: name } => {
                    self.get_utf8(*name)?;
                }
                Constant::FieldRef(class, name_and_type)
                | Constant::MethodRef {
                    class,
                    name_and_type,
                    ..
                } => {
                    self.get_class_name(*class)?;
                    self.get_name_and_type(*name_and_type)?;
                }
                Constant::NameAndType { name, descriptor } => {
                    self.get_utf8(*name)?;
                    self.get_utf8(*descriptor)?;
                }
                Constant::Dynamic { name_and_type, .. }
                | Constant::InvokeDynamic {
                    method_descriptor: name_and_type,
                    ..
                } => {
                    self.get_name_and_type(*name_and_type)?;
                }
                Constant::MethodHandle {
                    handle_kind,
                    member,
                } => self.validate_method_handle(index, *handle_kind, *member, version)?,
                Constant::Utf8(_)
                | Constant::Integer(_)
                | Constant::Float(_)
                | Constant::Long(_)
                | Constant::Double(_) => (),
            }
        }
        Ok(())
    }

    /// The reference kind dictates what sort of member the handle may point to
    fn validate_method_handle(
        &self,
        index: ConstantIndex,
        handle_kind: HandleKind,
        member: ConstantIndex,
        version: Version,
    ) -> Result<(), Error> {
        let member_ref = self.get_member_ref(member)?;
        let expected = match handle_kind {
            kind if kind.is_field() => ConstantKind::FieldRef,
            HandleKind::InvokeVirtual | HandleKind::NewInvokeSpecial => ConstantKind::MethodRef,
            HandleKind::InvokeInterface => ConstantKind::InterfaceMethodRef,
            _ if version >= Version::JAVA8
                && member_ref.kind == ConstantKind::InterfaceMethodRef =>
            {
                ConstantKind::InterfaceMethodRef
            }
            _ => ConstantKind::MethodRef,
        };
        if member_ref.kind != expected {
            return Err(ClassFormatErrorKind::WrongConstantKind {
                index: member.0,
                expected,
                found: member_ref.kind,
            }
            .into());
        }

        let is_init = member_ref.name == UnqualifiedName::INIT.as_ref();
        let is_clinit = member_ref.name == UnqualifiedName::CLINIT.as_ref();
        let reason = match handle_kind {
            HandleKind::NewInvokeSpecial if !is_init => Some("must refer to <init>"),
            kind if !kind.is_field() && kind != HandleKind::NewInvokeSpecial && is_init => {
                Some("only REF_newInvokeSpecial may refer to <init>")
            }
            _ if is_clinit => Some("may not refer to <clinit>"),
            _ => None,
        };
        match reason {
            Some(reason) => Err(ClassFormatErrorKind::IllegalMethodHandle {
                index: index.0,
                reason: String::from(reason),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Value of `constant_pool_count` (one more than the largest valid index)
    pub fn count(&self) -> u16 {
        self.constants.offset_len().0 as u16
    }

    /// Look up an entry, rejecting 0, indices past the end, and the unusable slot after a
    /// `long`/`double`
    pub fn get(&self, index: impl Into<ConstantIndex>) -> Result<&Constant, Error> {
        let index = index.into();
        match self.constants.get_offset(Offset(index.0 as usize)) {
            OffsetResult::Ok(_, constant) => Ok(constant),
            _ => Err(ClassFormatErrorKind::InvalidConstantPoolIndex {
                index: index.0,
                pool_count: self.count(),
            }
            .into()),
        }
    }

    /// Look up an entry and check its kind
    pub fn get_expecting(
        &self,
        index: impl Into<ConstantIndex>,
        expected: ConstantKind,
    ) -> Result<&Constant, Error> {
        let index = index.into();
        let constant = self.get(index)?;
        if constant.kind() != expected {
            return Err(wrong_kind(index, expected, constant));
        }
        Ok(constant)
    }

    pub fn get_utf8(&self, index: Utf8ConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Utf8(string) => Ok(string),
            other => Err(wrong_kind(index.0, ConstantKind::Utf8, other)),
        }
    }

    /// Name (or array descriptor) of a class constant
    pub fn get_class_name(&self, index: ClassConstantIndex) -> Result<&str, Error> {
        match self.get(index)? {
            Constant::Class(name) => self.get_utf8(*name),
            other => Err(wrong_kind(index.0, ConstantKind::Class, other)),
        }
    }

    /// Name and descriptor of a name-and-type constant
    pub fn get_name_and_type(
        &self,
        index: NameAndTypeConstantIndex,
    ) -> Result<(&str, &str), Error> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.get_utf8(*name)?, self.get_utf8(*descriptor)?))
            }
            other => Err(wrong_kind(index.0, ConstantKind::NameAndType, other)),
        }
    }

    /// Resolve a field, method, or interface method reference
    pub fn get_member_ref(&self, index: impl Into<ConstantIndex>) -> Result<MemberRef<'_>, Error> {
        let index = index.into();
        let (class, name_and_type) = match self.get(index)? {
            Constant::FieldRef(class, name_and_type) => (class, name_and_type),
            Constant::MethodRef {
                class,
                name_and_type,
                ..
            } => (class, name_and_type),
            other => return Err(wrong_kind(index, ConstantKind::MethodRef, other)),
        };
        let (name, descriptor) = self.get_name_and_type(*name_and_type)?;
        Ok(MemberRef {
            kind: self.get(index)?.kind(),
            class: self.get_class_name(*class)?,
            name,
            descriptor,
        })
    }

    /// Iterate over all entries along with their indices
    pub fn iter(&self) -> impl Iterator<Item = (ConstantIndex, &Constant)> {
        self.constants
            .iter()
            .map(|(offset, _, constant)| (ConstantIndex(offset.0 as u16), constant))
    }
}

fn wrong_kind(index: ConstantIndex, expected: ConstantKind, found: &Constant) -> Error {
    ClassFormatErrorKind::WrongConstantKind {
        index: index.0,
        expected,
        found: found.kind(),
    }
    .into()
}

impl Serialize for ConstantPool {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.count().serialize(writer)?;
        for (_, _, constant) in &self.constants {
            constant.serialize(writer)?;
        }
        Ok(())
    }
}

/// Constant pool builder
///
/// The pool is append only and entries are deduplicated, so asking twice for the same constant
/// returns the same index. Once built up, it is turned into a [`ConstantPool`]. Nothing here
/// checks that references point at the right kinds: that happens when the class is loaded.
pub struct ConstantPoolBuilder {
    constants: OffsetVec<Constant>,

    classes: HashMap<Utf8ConstantIndex, ClassConstantIndex>,
    fieldrefs: HashMap<(ClassConstantIndex, NameAndTypeConstantIndex), FieldRefConstantIndex>,
    methodrefs:
        HashMap<(ClassConstantIndex, NameAndTypeConstantIndex, bool), MethodRefConstantIndex>,
    strings: HashMap<Utf8ConstantIndex, StringConstantIndex>,
    integers: HashMap<i32, ConstantIndex>,
    floats: HashMap<u32, ConstantIndex>,
    longs: HashMap<i64, ConstantIndex>,
    doubles: HashMap<u64, ConstantIndex>,
    name_and_types: HashMap<(Utf8ConstantIndex, Utf8ConstantIndex), NameAndTypeConstantIndex>,
    utf8s: HashMap<String, Utf8ConstantIndex>,
    method_handles: HashMap<(HandleKind, ConstantIndex), ConstantIndex>,
    method_types: HashMap<Utf8ConstantIndex, ConstantIndex>,
    invoke_dynamics: HashMap<(u16, NameAndTypeConstantIndex), InvokeDynamicConstantIndex>,
}

#[derive(Debug)]
pub struct ConstantPoolOverflow {
    pub constant: Constant,
    pub offset: u16,
}

impl Default for ConstantPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPoolBuilder {
    /// Make a fresh empty constants pool
    pub fn new() -> ConstantPoolBuilder {
        ConstantPoolBuilder {
            constants: OffsetVec::new_starting_at(Offset(1)),
            classes: HashMap::new(),
            fieldrefs: HashMap::new(),
            methodrefs: HashMap::new(),
            strings: HashMap::new(),
            integers: HashMap::new(),
            floats: HashMap::new(),
            longs: HashMap::new(),
            doubles: HashMap::new(),
            name_and_types: HashMap::new(),
            utf8s: HashMap::new(),
            method_handles: HashMap::new(),
            method_types: HashMap::new(),
            invoke_dynamics: HashMap::new(),
        }
    }

    /// Push a constant into the constant pool, provided there is space for it
    ///
    /// Note: the largest valid index is 65535, indexing starts at 1, and some constants take two
    /// spaces. Pushing bypasses deduplication.
    pub fn push_constant(
        &mut self,
        constant: Constant,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        // Compute the offset at which this constant will be inserted
        let offset: u16 = self.constants.offset_len().0 as u16;

        // Detect if the next constant would overflow the pool
        if offset.checked_add(constant.width() as u16).is_none() {
            return Err(ConstantPoolOverflow { constant, offset });
        }

        self.constants.push(constant);
        Ok(ConstantIndex(offset))
    }

    /// Consume the builder and return the final pool
    pub fn build(self) -> ConstantPool {
        ConstantPool {
            constants: self.constants,
        }
    }

    /// Get or insert a utf8 constant from the constant pool
    pub fn get_utf8<'a, S: Into<Cow<'a, str>>>(
        &mut self,
        utf8: S,
    ) -> Result<Utf8ConstantIndex, ConstantPoolOverflow> {
        let cow = utf8.into();

        if let Some(idx) = self.utf8s.get::<str>(cow.borrow()) {
            Ok(*idx)
        } else {
            let owned = cow.into_owned();
            let constant = Constant::Utf8(owned.clone());
            let idx = Utf8ConstantIndex(self.push_constant(constant)?);
            self.utf8s.insert(owned, idx);
            Ok(idx)
        }
    }

    /// Get or insert a class constant (the name may also be an array descriptor)
    pub fn get_class(&mut self, name: &str) -> Result<ClassConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        if let Some(idx) = self.classes.get(&name) {
            Ok(*idx)
        } else {
            let idx = ClassConstantIndex(self.push_constant(Constant::Class(name))?);
            self.classes.insert(name, idx);
            Ok(idx)
        }
    }

    /// Get or insert a string constant from the constant pool
    pub fn get_string(
        &mut self,
        string: &str,
    ) -> Result<StringConstantIndex, ConstantPoolOverflow> {
        let utf8 = self.get_utf8(string)?;
        if let Some(idx) = self.strings.get(&utf8) {
            Ok(*idx)
        } else {
            let constant = Constant::String(utf8);
            let idx = StringConstantIndex(self.push_constant(constant)?);
            self.strings.insert(utf8, idx);
            Ok(idx)
        }
    }

    /// Get or insert a name & type constant from the constant pool
    pub fn get_name_and_type(
        &mut self,
        name: &str,
        descriptor: &str,
    ) -> Result<NameAndTypeConstantIndex, ConstantPoolOverflow> {
        let name = self.get_utf8(name)?;
        let descriptor = self.get_utf8(descriptor)?;
        let name_and_type_key = (name, descriptor);
        if let Some(idx) = self.name_and_types.get(&name_and_type_key) {
            Ok(*idx)
        } else {
            let constant = Constant::NameAndType { name, descriptor };
            let idx = NameAndTypeConstantIndex(self.push_constant(constant)?);
            self.name_and_types.insert(name_and_type_key, idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Fieldref_info`
    pub fn get_field_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<FieldRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        if let Some(idx) = self.fieldrefs.get(&(class, name_and_type)) {
            Ok(*idx)
        } else {
            let constant = Constant::FieldRef(class, name_and_type);
            let idx = FieldRefConstantIndex(self.push_constant(constant)?);
            self.fieldrefs.insert((class, name_and_type), idx);
            Ok(idx)
        }
    }

    /// Get or insert a `CONSTANT_Methodref_info` or `CONSTANT_InterfaceMethodref_info`
    pub fn get_method_ref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<MethodRefConstantIndex, ConstantPoolOverflow> {
        let class = self.get_class(class)?;
        let name_and_type = self.get_name_and_type(name, descriptor)?;
        let key = (class, name_and_type, is_interface);
        if let Some(idx) = self.methodrefs.get(&key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodRef {
                class,
                name_and_type,
                is_interface,
            };
            let idx = MethodRefConstantIndex(self.push_constant(constant)?);
            self.methodrefs.insert(key, idx);
            Ok(idx)
        }
    }

    pub fn get_integer(&mut self, integer: i32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.integers.get(&integer) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Integer(integer))?;
            self.integers.insert(integer, idx);
            Ok(idx)
        }
    }

    pub fn get_float(&mut self, float: f32) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let bits = float.to_bits();
        if let Some(idx) = self.floats.get(&bits) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Float(bits))?;
            self.floats.insert(bits, idx);
            Ok(idx)
        }
    }

    pub fn get_long(&mut self, long: i64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        if let Some(idx) = self.longs.get(&long) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Long(long))?;
            self.longs.insert(long, idx);
            Ok(idx)
        }
    }

    pub fn get_double(&mut self, double: f64) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let bits = double.to_bits();
        if let Some(idx) = self.doubles.get(&bits) {
            Ok(*idx)
        } else {
            let idx = self.push_constant(Constant::Double(bits))?;
            self.doubles.insert(bits, idx);
            Ok(idx)
        }
    }

    /// Get or insert a method handle constant from the constant pool
    pub fn get_method_handle(
        &mut self,
        handle_kind: HandleKind,
        member: impl Into<ConstantIndex>,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let member = member.into();
        let handle_key = (handle_kind, member);
        if let Some(idx) = self.method_handles.get(&handle_key) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodHandle {
                handle_kind,
                member,
            };
            let idx = self.push_constant(constant)?;
            self.method_handles.insert(handle_key, idx);
            Ok(idx)
        }
    }

    pub fn get_method_type(
        &mut self,
        descriptor: &str,
    ) -> Result<ConstantIndex, ConstantPoolOverflow> {
        let descriptor = self.get_utf8(descriptor)?;
        if let Some(idx) = self.method_types.get(&descriptor) {
            Ok(*idx)
        } else {
            let constant = Constant::MethodType { descriptor };
            let idx = self.push_constant(constant)?;
            self.method_types.insert(descriptor, idx);
            Ok(idx)
        }
    }

    /// Get or insert an invoke dynamic constant from the constant pool
    pub fn get_invoke_dynamic(
        &mut self,
        bootstrap_method: u16,
        name: &str,
        descriptor: &str,
    ) -> Result<InvokeDynamicConstantIndex, ConstantPoolOverflow> {
        let method_descriptor = self.get_name_and_type(name, descriptor)?;
        let indy_key = (bootstrap_method, method_descriptor);
        if let Some(idx) = self.invoke_dynamics.get(&indy_key) {
            Ok(*idx)
        } else {
            let constant = Constant::InvokeDynamic {
                bootstrap_method,
                method_descriptor,
            };
            let idx = InvokeDynamicConstantIndex(self.push_constant(constant)?);
            self.invoke_dynamics.insert(indy_key, idx);
            Ok(idx)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::ClassFormatError;

    fn parse(pool: ConstantPool, version: Version) -> Result<ConstantPool, Error> {
        let bytes = pool.to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes);
        let parsed = ConstantPool::parse(&mut reader, version)?;
        assert!(reader.is_empty());
        Ok(parsed)
    }

    fn format_kind(result: Result<ConstantPool, Error>) -> ClassFormatErrorKind {
        match result {
            Err(Error::ClassFormat(ClassFormatError { kind, .. })) => kind,
            other => panic!("Expected a class format error, got {:?}", other),
        }
    }

    #[test]
    fn builder_deduplicates() {
        let mut builder = ConstantPoolBuilder::new();
        let object = builder.get_class("java/lang/Object").unwrap();
        let again = builder.get_class("java/lang/Object").unwrap();
        assert_eq!(object, again);

        let long = builder.get_long(7).unwrap();
        let after_long = builder.get_integer(7).unwrap();
        assert_eq!(after_long.0, long.0 + 2);

        let pool = builder.build();
        assert_eq!(pool.count(), after_long.0 + 1);
        assert_eq!(pool.get_class_name(object).unwrap(), "java/lang/Object");
    }

    #[test]
    fn parse_reproduces_pool() {
        let mut builder = ConstantPoolBuilder::new();
        builder
            .get_method_ref("java/lang/Object", "<init>", "()V", false)
            .unwrap();
        builder.get_double(f64::NAN).unwrap();
        builder.get_string("caf\u{e9}\u{0}").unwrap();
        builder.get_float(-0.0).unwrap();
        let pool = builder.build();

        let parsed = parse(pool.clone(), Version::JAVA8).unwrap();
        assert_eq!(parsed, pool);
        assert_eq!(parsed.to_bytes().unwrap(), pool.to_bytes().unwrap());
    }

    #[test]
    fn bad_indices() {
        let mut builder = ConstantPoolBuilder::new();
        let long = builder.get_long(1).unwrap();
        let utf8 = builder.get_utf8("x").unwrap();
        let pool = builder.build();

        for bad in [0, long.0 + 1, utf8.0 .0 + 1, 500] {
            assert!(matches!(
                pool.get(ConstantIndex(bad)),
                Err(Error::ClassFormat(ClassFormatError {
                    kind: ClassFormatErrorKind::InvalidConstantPoolIndex { index, .. },
                    ..
                })) if index == bad
            ));
        }
        assert!(pool.get(utf8).is_ok());
    }

    #[test]
    fn forward_references_are_allowed() {
        let mut builder = ConstantPoolBuilder::new();
        builder
            .push_constant(Constant::Class(Utf8ConstantIndex(ConstantIndex(2))))
            .unwrap();
        builder.get_utf8("Foo").unwrap();
        let parsed = parse(builder.build(), Version::JAVA8).unwrap();
        assert_eq!(
            parsed.get_class_name(ClassConstantIndex(ConstantIndex(1))).unwrap(),
            "Foo"
        );
    }

    #[test]
    fn wrong_kind_reference() {
        let mut builder = ConstantPoolBuilder::new();
        let integer = builder.get_integer(3).unwrap();
        builder
            .push_constant(Constant::String(Utf8ConstantIndex(integer)))
            .unwrap();
        assert!(matches!(
            format_kind(parse(builder.build(), Version::JAVA8)),
            ClassFormatErrorKind::WrongConstantKind {
                index: 1,
                expected: ConstantKind::Utf8,
                found: ConstantKind::Integer,
            }
        ));
    }

    #[test]
    fn reference_to_index_zero() {
        let mut builder = ConstantPoolBuilder::new();
        builder
            .push_constant(Constant::Class(Utf8ConstantIndex(ConstantIndex(0))))
            .unwrap();
        assert!(matches!(
            format_kind(parse(builder.build(), Version::JAVA8)),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. }
        ));
    }

    #[test]
    fn version_gated_tags() {
        let mut builder = ConstantPoolBuilder::new();
        builder.get_method_type("()V").unwrap();
        let pool = builder.build();
        assert!(matches!(
            format_kind(parse(pool.clone(), Version::new(50, 0))),
            ClassFormatErrorKind::UnsupportedConstantTag { index: 2, tag: 16, .. }
        ));
        assert!(parse(pool, Version::JAVA7).is_ok());

        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("java.base").unwrap();
        builder.push_constant(Constant::Module(name)).unwrap();
        let pool = builder.build();
        assert!(parse(pool.clone(), Version::JAVA8).is_err());
        assert!(parse(pool, Version::JAVA9).is_ok());
    }

    #[test]
    fn wide_constant_in_last_slot() {
        // count = 2 leaves room for only one slot
        let bytes = [0x00, 0x02, 5, 0, 0, 0, 0, 0, 0, 0, 1];
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            format_kind(ConstantPool::parse(&mut reader, Version::JAVA8)),
            ClassFormatErrorKind::WideConstantAtPoolEnd { index: 1 }
        ));
    }

    #[test]
    fn unknown_tag_and_bad_utf8() {
        let bytes = [0x00, 0x02, 2];
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            format_kind(ConstantPool::parse(&mut reader, Version::JAVA8)),
            ClassFormatErrorKind::UnknownConstantTag { index: 1, tag: 2 }
        ));

        let bytes = [0x00, 0x02, 1, 0x00, 0x01, 0x00];
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            format_kind(ConstantPool::parse(&mut reader, Version::JAVA8)),
            ClassFormatErrorKind::IllegalUtf8 { index: 1 }
        ));
    }

    #[test]
    fn method_handle_kinds() {
        let mut builder = ConstantPoolBuilder::new();
        let field = builder.get_field_ref("Foo", "x", "I").unwrap();
        builder
            .get_method_handle(HandleKind::InvokeVirtual, field)
            .unwrap();
        assert!(matches!(
            format_kind(parse(builder.build(), Version::JAVA8)),
            ClassFormatErrorKind::WrongConstantKind {
                expected: ConstantKind::MethodRef,
                found: ConstantKind::FieldRef,
                ..
            }
        ));

        let mut builder = ConstantPoolBuilder::new();
        let method = builder.get_method_ref("Foo", "run", "()V", false).unwrap();
        builder
            .get_method_handle(HandleKind::NewInvokeSpecial, method)
            .unwrap();
        assert!(matches!(
            format_kind(parse(builder.build(), Version::JAVA8)),
            ClassFormatErrorKind::IllegalMethodHandle { .. }
        ));

        let mut builder = ConstantPoolBuilder::new();
        let method = builder.get_method_ref("Foo", "run", "()V", true).unwrap();
        builder
            .get_method_handle(HandleKind::InvokeStatic, method)
            .unwrap();
        let pool = builder.build();
        assert!(parse(pool.clone(), Version::new(51, 0)).is_err());
        assert!(parse(pool, Version::JAVA8).is_ok());
    }

    #[test]
    fn member_refs() {
        let mut builder = ConstantPoolBuilder::new();
        let method = builder
            .get_method_ref("java/util/List", "size", "()I", true)
            .unwrap();
        let pool = builder.build();
        assert_eq!(
            pool.get_member_ref(method).unwrap(),
            MemberRef {
                kind: ConstantKind::InterfaceMethodRef,
                class: "java/util/List",
                name: "size",
                descriptor: "()I",
            }
        );
    }
}
