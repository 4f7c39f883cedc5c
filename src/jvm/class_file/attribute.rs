use super::{
    AnnotationDefault, ByteReader, ClassConstantIndex, ConstantIndex, ConstantKind, ConstantPool,
    Deserialize, NameAndTypeConstantIndex, RuntimeInvisibleAnnotations,
    RuntimeInvisibleParameterAnnotations, RuntimeInvisibleTypeAnnotations,
    RuntimeVisibleAnnotations, RuntimeVisibleParameterAnnotations, RuntimeVisibleTypeAnnotations,
    Serialize, Utf8ConstantIndex,
};
use crate::jvm::verifier::VerificationType;
use crate::jvm::{ClassFormatErrorKind, Error, InnerClassAccessFlags};
use byteorder::WriteBytesExt;
use std::io;

/// Attributes (used in classes, fields, methods, and even on some attributes)
///
/// A handful of attributes are decoded into their own structures. Everything else (including a
/// known attribute found somewhere it has no meaning) is carried around as raw bytes, so that
/// writing the attribute back out reproduces it exactly.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: Utf8ConstantIndex,
    pub data: AttributeData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeData {
    ConstantValue(ConstantValue),
    Code(Code),
    Exceptions(Exceptions),
    SourceFile(SourceFile),
    Signature(Signature),
    LineNumberTable(LineNumberTable),
    InnerClasses(InnerClasses),
    BootstrapMethods(BootstrapMethods),
    NestHost(NestHost),
    NestMembers(NestMembers),
    StackMapTable(StackMapTable),
    EnclosingMethod(EnclosingMethod),
    LocalVariableTable(LocalVariableTable),
    LocalVariableTypeTable(LocalVariableTypeTable),
    MethodParameters(MethodParameters),
    PermittedSubclasses(PermittedSubclasses),
    Record(Record),
    Module(Module),
    ModulePackages(ModulePackages),
    ModuleMainClass(ModuleMainClass),
    RuntimeVisibleAnnotations(RuntimeVisibleAnnotations),
    RuntimeInvisibleAnnotations(RuntimeInvisibleAnnotations),
    RuntimeVisibleParameterAnnotations(RuntimeVisibleParameterAnnotations),
    RuntimeInvisibleParameterAnnotations(RuntimeInvisibleParameterAnnotations),
    RuntimeVisibleTypeAnnotations(RuntimeVisibleTypeAnnotations),
    RuntimeInvisibleTypeAnnotations(RuntimeInvisibleTypeAnnotations),
    AnnotationDefault(AnnotationDefault),

    /// Undecoded attribute contents
    Raw(Vec<u8>),
}

/// Structure on which an attribute is found
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AttributeLocation {
    Class,
    Field,
    Method,
    Code,
    RecordComponent,
}

/// Attributes are all stored in the same way (see `Attribute`), but internally
/// they represent very different things. This trait is implemented by the decoded
/// forms of attributes.
pub trait AttributeLike: Serialize {
    /// Name of the attribute
    const NAME: &'static str;

    /// Where the attribute has a meaning
    const LOCATIONS: &'static [AttributeLocation];

    /// Decode the attribute contents (everything after the length)
    ///
    /// Constant pool indices are checked against the pool as they are read.
    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error>;
}

impl Attribute {
    /// Read one attribute, checking that its decoder consumes exactly the declared length
    pub fn parse(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        location: AttributeLocation,
    ) -> Result<Attribute, Error> {
        let name_index = Utf8ConstantIndex::deserialize(reader)?;
        let name = constants.get_utf8(name_index)?;
        let declared = reader.read_u4()?;
        let mut contents = reader.sub_reader(declared as usize)?;

        let data = match AttributeData::parse(name, &mut contents, constants, location) {
            Ok(data) => data,
            Err(Error::TruncatedClassFile { offset, needed, .. }) => {
                return Err(ClassFormatErrorKind::AttributeLength {
                    name: String::from(name),
                    declared,
                    consumed: offset + needed,
                }
                .into())
            }
            Err(err) => return Err(err),
        };
        if !contents.is_empty() {
            return Err(ClassFormatErrorKind::AttributeLength {
                name: String::from(name),
                declared,
                consumed: contents.position(),
            }
            .into());
        }

        Ok(Attribute { name_index, data })
    }

    /// Name of the attribute, as found in the constant pool
    pub fn name<'a>(&self, constants: &'a ConstantPool) -> Result<&'a str, Error> {
        constants.get_utf8(self.name_index)
    }
}

/// Read a `u16`-prefixed list of attributes
///
/// Decoded attributes may appear only once per structure, except for the debugging tables
/// (`LineNumberTable`, `LocalVariableTable`, and `LocalVariableTypeTable`).
pub fn parse_attributes(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
    location: AttributeLocation,
) -> Result<Vec<Attribute>, Error> {
    let count = reader.read_u2()?;
    let mut attributes: Vec<Attribute> = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let attribute = Attribute::parse(reader, constants, location)?;
        let unique = !matches!(
            attribute.data,
            AttributeData::Raw(_)
                | AttributeData::LineNumberTable(_)
                | AttributeData::LocalVariableTable(_)
                | AttributeData::LocalVariableTypeTable(_)
        );
        if unique && attributes.iter().any(|a| a.name_index == attribute.name_index) {
            return Err(ClassFormatErrorKind::DuplicateAttribute {
                name: String::from(attribute.name(constants)?),
            }
            .into());
        }
        attributes.push(attribute);
    }
    Ok(attributes)
}

macro_rules! decode_known_attributes {
    ($name:expr, $location:expr, $reader:expr, $constants:expr, [$($attr:ident),*]) => {
        $(
            if $name == $attr::NAME && $attr::LOCATIONS.contains(&$location) {
                return Ok(AttributeData::$attr($attr::parse($reader, $constants)?));
            }
        )*
    };
}

impl AttributeData {
    fn parse(
        name: &str,
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        location: AttributeLocation,
    ) -> Result<AttributeData, Error> {
        decode_known_attributes!(
            name,
            location,
            reader,
            constants,
            [
                ConstantValue,
                Code,
                Exceptions,
                SourceFile,
                Signature,
                LineNumberTable,
                InnerClasses,
                BootstrapMethods,
                NestHost,
                NestMembers,
                StackMapTable,
                EnclosingMethod,
                LocalVariableTable,
                LocalVariableTypeTable,
                MethodParameters,
                PermittedSubclasses,
                Record,
                Module,
                ModulePackages,
                ModuleMainClass,
                RuntimeVisibleAnnotations,
                RuntimeInvisibleAnnotations,
                RuntimeVisibleParameterAnnotations,
                RuntimeInvisibleParameterAnnotations,
                RuntimeVisibleTypeAnnotations,
                RuntimeInvisibleTypeAnnotations,
                AnnotationDefault
            ]
        );
        log::trace!("Keeping {:?} attribute on {:?} undecoded", name, location);
        let contents = reader.read_bytes(reader.remaining())?;
        Ok(AttributeData::Raw(contents.to_vec()))
    }
}

impl Serialize for Attribute {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name_index.serialize(writer)?;

        let info: Vec<u8> = match &self.data {
            AttributeData::ConstantValue(attr) => attr.to_bytes()?,
            AttributeData::Code(attr) => attr.to_bytes()?,
            AttributeData::Exceptions(attr) => attr.to_bytes()?,
            AttributeData::SourceFile(attr) => attr.to_bytes()?,
            AttributeData::Signature(attr) => attr.to_bytes()?,
            AttributeData::LineNumberTable(attr) => attr.to_bytes()?,
            AttributeData::InnerClasses(attr) => attr.to_bytes()?,
            AttributeData::BootstrapMethods(attr) => attr.to_bytes()?,
            AttributeData::NestHost(attr) => attr.to_bytes()?,
            AttributeData::NestMembers(attr) => attr.to_bytes()?,
            AttributeData::StackMapTable(attr) => attr.to_bytes()?,
            AttributeData::EnclosingMethod(attr) => attr.to_bytes()?,
            AttributeData::LocalVariableTable(attr) => attr.to_bytes()?,
            AttributeData::LocalVariableTypeTable(attr) => attr.to_bytes()?,
            AttributeData::MethodParameters(attr) => attr.to_bytes()?,
            AttributeData::PermittedSubclasses(attr) => attr.to_bytes()?,
            AttributeData::Record(attr) => attr.to_bytes()?,
            AttributeData::Module(attr) => attr.to_bytes()?,
            AttributeData::ModulePackages(attr) => attr.to_bytes()?,
            AttributeData::ModuleMainClass(attr) => attr.to_bytes()?,
            AttributeData::RuntimeVisibleAnnotations(attr) => attr.to_bytes()?,
            AttributeData::RuntimeInvisibleAnnotations(attr) => attr.to_bytes()?,
            AttributeData::RuntimeVisibleParameterAnnotations(attr) => attr.to_bytes()?,
            AttributeData::RuntimeInvisibleParameterAnnotations(attr) => attr.to_bytes()?,
            AttributeData::RuntimeVisibleTypeAnnotations(attr) => attr.to_bytes()?,
            AttributeData::RuntimeInvisibleTypeAnnotations(attr) => attr.to_bytes()?,
            AttributeData::AnnotationDefault(attr) => attr.to_bytes()?,
            AttributeData::Raw(bytes) => bytes.clone(),
        };

        // Attribute info length is 4 bytes
        (info.len() as u32).serialize(writer)?;
        writer.write_all(&info)?;

        Ok(())
    }
}

/// Attribute contents which parsed but break the attribute's own rules
pub(super) fn malformed(name: &str, reason: String) -> Error {
    ClassFormatErrorKind::MalformedAttribute {
        name: String::from(name),
        reason,
    }
    .into()
}

/// Optional class index, where 0 stands for "absent"
fn parse_optional_class(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
) -> Result<Option<ClassConstantIndex>, Error> {
    let index = ClassConstantIndex::deserialize(reader)?;
    if index.0 .0 == 0 {
        Ok(None)
    } else {
        constants.get_class_name(index)?;
        Ok(Some(index))
    }
}

pub(super) fn parse_class(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
) -> Result<ClassConstantIndex, Error> {
    let index = ClassConstantIndex::deserialize(reader)?;
    constants.get_class_name(index)?;
    Ok(index)
}

pub(super) fn parse_utf8(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
) -> Result<Utf8ConstantIndex, Error> {
    let index = Utf8ConstantIndex::deserialize(reader)?;
    constants.get_utf8(index)?;
    Ok(index)
}

/// Optional UTF-8 index, where 0 stands for "absent"
fn parse_optional_utf8(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
) -> Result<Option<Utf8ConstantIndex>, Error> {
    let index = Utf8ConstantIndex::deserialize(reader)?;
    if index.0 .0 == 0 {
        Ok(None)
    } else {
        constants.get_utf8(index)?;
        Ok(Some(index))
    }
}

/// Index of a constant of the given kind
pub(super) fn parse_index_of(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
    kind: ConstantKind,
) -> Result<ConstantIndex, Error> {
    let index = ConstantIndex::deserialize(reader)?;
    constants.get_expecting(index, kind)?;
    Ok(index)
}

fn serialize_optional_index<W: WriteBytesExt>(
    index: Option<ConstantIndex>,
    writer: &mut W,
) -> std::io::Result<()> {
    index.map_or(0, |idx| idx.0).serialize(writer)
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.2
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantValue(pub ConstantIndex);

impl Serialize for ConstantValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl AttributeLike for ConstantValue {
    const NAME: &'static str = "ConstantValue";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Field];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let index = ConstantIndex::deserialize(reader)?;

        // Whether the kind matches the field type is up to the validator
        constants.get(index)?;
        Ok(ConstantValue(index))
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.3
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_array: BytecodeArray,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl Serialize for Code {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.max_stack.serialize(writer)?;
        self.max_locals.serialize(writer)?;
        self.code_array.serialize(writer)?;
        self.exception_table.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

impl AttributeLike for Code {
    const NAME: &'static str = "Code";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Method];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let max_stack = reader.read_u2()?;
        let max_locals = reader.read_u2()?;
        let code_length = reader.read_u4()?;
        let code_array = BytecodeArray(reader.read_bytes(code_length as usize)?.to_vec());

        let handler_count = reader.read_u2()?;
        let mut exception_table = Vec::with_capacity(handler_count as usize);
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: reader.read_u2()?,
                end_pc: reader.read_u2()?,
                handler_pc: reader.read_u2()?,
                catch_type: parse_optional_class(reader, constants)?,
            });
        }

        let attributes = parse_attributes(reader, constants, AttributeLocation::Code)?;
        Ok(Code {
            max_stack,
            max_locals,
            code_array,
            exception_table,
            attributes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionHandler {
    /// Start of exception handler range (inclusive)
    pub start_pc: u16,

    /// End of exception handler range (exclusive)
    pub end_pc: u16,

    /// Start of the exception handler
    pub handler_pc: u16,

    /// Class of exceptions caught (`None` catches everything)
    pub catch_type: Option<ClassConstantIndex>,
}

impl Serialize for ExceptionHandler {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.end_pc.serialize(writer)?;
        self.handler_pc.serialize(writer)?;
        serialize_optional_index(self.catch_type.map(|idx| idx.0), writer)?;
        Ok(())
    }
}

/// Encoded bytecode instructions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeArray(pub Vec<u8>);

impl Serialize for BytecodeArray {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        let len = self.0.len() as u32;
        len.serialize(writer)?;
        writer.write_all(&self.0)?;
        Ok(())
    }
}

/// Checked exceptions a method may throw
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exceptions(pub Vec<ClassConstantIndex>);

impl AttributeLike for Exceptions {
    const NAME: &'static str = "Exceptions";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Method];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut exceptions = Vec::with_capacity(count as usize);
        for _ in 0..count {
            exceptions.push(parse_class(reader, constants)?);
        }
        Ok(Exceptions(exceptions))
    }
}

impl Serialize for Exceptions {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.10
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile(pub Utf8ConstantIndex);

impl AttributeLike for SourceFile {
    const NAME: &'static str = "SourceFile";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        Ok(SourceFile(parse_utf8(reader, constants)?))
    }
}

impl Serialize for SourceFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub signature: Utf8ConstantIndex,
}

impl AttributeLike for Signature {
    const NAME: &'static str = "Signature";
    const LOCATIONS: &'static [AttributeLocation] = &[
        AttributeLocation::Class,
        AttributeLocation::Field,
        AttributeLocation::Method,
        AttributeLocation::RecordComponent,
    ];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        Ok(Signature {
            signature: parse_utf8(reader, constants)?,
        })
    }
}

impl Serialize for Signature {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.signature.serialize(writer)?;
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumberTable(pub Vec<LineNumber>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line_number: u16,
}

impl AttributeLike for LineNumberTable {
    const NAME: &'static str = "LineNumberTable";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Code];

    fn parse(reader: &mut ByteReader<'_>, _constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut lines = Vec::with_capacity(count as usize);
        for _ in 0..count {
            lines.push(LineNumber {
                start_pc: reader.read_u2()?,
                line_number: reader.read_u2()?,
            });
        }
        Ok(LineNumberTable(lines))
    }
}

impl Serialize for LineNumberTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for LineNumber {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.line_number.serialize(writer)?;
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.23
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethods(pub Vec<BootstrapMethod>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapMethod {
    pub bootstrap_method: ConstantIndex,
    pub bootstrap_arguments: Vec<ConstantIndex>,
}

impl AttributeLike for BootstrapMethods {
    const NAME: &'static str = "BootstrapMethods";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut methods = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let bootstrap_method = ConstantIndex::deserialize(reader)?;
            constants.get_expecting(bootstrap_method, ConstantKind::MethodHandle)?;

            let bootstrap_arguments = Vec::<ConstantIndex>::deserialize(reader)?;
            for argument in &bootstrap_arguments {
                let kind = constants.get(*argument)?.kind();
                if !is_loadable(kind) {
                    return Err(ClassFormatErrorKind::MalformedAttribute {
                        name: String::from(Self::NAME),
                        reason: format!("bootstrap argument {} is a {}", argument, kind),
                    }
                    .into());
                }
            }

            methods.push(BootstrapMethod {
                bootstrap_method,
                bootstrap_arguments,
            });
        }
        Ok(BootstrapMethods(methods))
    }
}

/// Constants which can be pushed with `ldc` or passed as static bootstrap arguments
pub fn is_loadable(kind: ConstantKind) -> bool {
    matches!(
        kind,
        ConstantKind::Integer
            | ConstantKind::Float
            | ConstantKind::Long
            | ConstantKind::Double
            | ConstantKind::Class
            | ConstantKind::String
            | ConstantKind::MethodHandle
            | ConstantKind::MethodType
            | ConstantKind::Dynamic
    )
}

impl Serialize for BootstrapMethods {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for BootstrapMethod {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.bootstrap_method.serialize(writer)?;
        self.bootstrap_arguments.serialize(writer)?;
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.28
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestHost(pub ClassConstantIndex);

impl AttributeLike for NestHost {
    const NAME: &'static str = "NestHost";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        Ok(NestHost(parse_class(reader, constants)?))
    }
}

impl Serialize for NestHost {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.29
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NestMembers(pub Vec<ClassConstantIndex>);

impl AttributeLike for NestMembers {
    const NAME: &'static str = "NestMembers";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut members = Vec::with_capacity(count as usize);
        for _ in 0..count {
            members.push(parse_class(reader, constants)?);
        }
        Ok(NestMembers(members))
    }
}

impl Serialize for NestMembers {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClasses(pub Vec<InnerClass>);

impl AttributeLike for InnerClasses {
    const NAME: &'static str = "InnerClasses";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut classes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            classes.push(InnerClass {
                inner_class: parse_class(reader, constants)?,
                outer_class: parse_optional_class(reader, constants)?,
                inner_name: parse_optional_utf8(reader, constants)?,
                access_flags: InnerClassAccessFlags::deserialize(reader)?,
            });
        }
        Ok(InnerClasses(classes))
    }
}

impl Serialize for InnerClasses {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClass {
    pub inner_class: ClassConstantIndex,

    /// Absent for top-level, local, and anonymous classes
    pub outer_class: Option<ClassConstantIndex>,

    /// Absent for anonymous classes
    pub inner_name: Option<Utf8ConstantIndex>,
    pub access_flags: InnerClassAccessFlags,
}

impl Serialize for InnerClass {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.inner_class.serialize(writer)?;
        serialize_optional_index(self.outer_class.map(|idx| idx.0), writer)?;
        serialize_optional_index(self.inner_name.map(|idx| idx.0), writer)?;
        self.access_flags.serialize(writer)?;
        Ok(())
    }
}

/// Verification type as it is written in a `StackMapTable`
pub type StackMapType = VerificationType<ClassConstantIndex, u16>;

/// Type state at the start of some basic blocks
///
/// The frames are decoded (and their constants checked) but frames are always inferred when
/// verifying, so their contents are never trusted.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.4
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapTable(pub Vec<StackMapFrame>);

/// Frame in a `StackMapTable`
///
/// `extended` marks frames written with an explicit `u16` offset delta even though the short
/// form would have fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    SameLocalsNoStack {
        offset_delta: u16,
        extended: bool,
    },
    SameLocalsOneStack {
        offset_delta: u16,
        stack: StackMapType,
        extended: bool,
    },
    ChopLocalsNoStack {
        offset_delta: u16,
        chopped_k: u8,
    },
    AppendLocalsNoStack {
        offset_delta: u16,
        locals: Vec<StackMapType>,
    },
    Full {
        offset_delta: u16,
        locals: Vec<StackMapType>,
        stack: Vec<StackMapType>,
    },
}

impl AttributeLike for StackMapTable {
    const NAME: &'static str = "StackMapTable";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Code];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            frames.push(StackMapFrame::parse(reader, constants)?);
        }
        Ok(StackMapTable(frames))
    }
}

impl StackMapFrame {
    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let frame = match reader.read_u1()? {
            tag @ 0..=63 => StackMapFrame::SameLocalsNoStack {
                offset_delta: tag as u16,
                extended: false,
            },
            tag @ 64..=127 => StackMapFrame::SameLocalsOneStack {
                offset_delta: tag as u16 - 64,
                stack: parse_stack_map_type(reader, constants)?,
                extended: false,
            },
            247 => StackMapFrame::SameLocalsOneStack {
                offset_delta: reader.read_u2()?,
                stack: parse_stack_map_type(reader, constants)?,
                extended: true,
            },
            tag @ 248..=250 => StackMapFrame::ChopLocalsNoStack {
                offset_delta: reader.read_u2()?,
                chopped_k: 251 - tag,
            },
            251 => StackMapFrame::SameLocalsNoStack {
                offset_delta: reader.read_u2()?,
                extended: true,
            },
            tag @ 252..=254 => {
                let offset_delta = reader.read_u2()?;
                let mut locals = vec![];
                for _ in 251..tag {
                    locals.push(parse_stack_map_type(reader, constants)?);
                }
                StackMapFrame::AppendLocalsNoStack {
                    offset_delta,
                    locals,
                }
            }
            255 => {
                let offset_delta = reader.read_u2()?;
                let mut locals = vec![];
                for _ in 0..reader.read_u2()? {
                    locals.push(parse_stack_map_type(reader, constants)?);
                }
                let mut stack = vec![];
                for _ in 0..reader.read_u2()? {
                    stack.push(parse_stack_map_type(reader, constants)?);
                }
                StackMapFrame::Full {
                    offset_delta,
                    locals,
                    stack,
                }
            }
            tag => {
                return Err(malformed(
                    StackMapTable::NAME,
                    format!("reserved frame type {}", tag),
                ))
            }
        };
        Ok(frame)
    }
}

fn parse_stack_map_type(
    reader: &mut ByteReader<'_>,
    constants: &ConstantPool,
) -> Result<StackMapType, Error> {
    let verification_type = match reader.read_u1()? {
        0 => VerificationType::Top,
        1 => VerificationType::Integer,
        2 => VerificationType::Float,
        3 => VerificationType::Double,
        4 => VerificationType::Long,
        5 => VerificationType::Null,
        6 => VerificationType::UninitializedThis,
        7 => VerificationType::Object(parse_class(reader, constants)?),
        8 => VerificationType::Uninitialized(reader.read_u2()?),
        tag => {
            return Err(malformed(
                StackMapTable::NAME,
                format!("unknown verification type tag {}", tag),
            ))
        }
    };
    Ok(verification_type)
}

impl Serialize for StackMapTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for StackMapFrame {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            StackMapFrame::SameLocalsNoStack {
                offset_delta,
                extended: false,
            } => short_frame_tag(*offset_delta, 0)?.serialize(writer)?,
            StackMapFrame::SameLocalsNoStack { offset_delta, .. } => {
                251u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
            }
            StackMapFrame::SameLocalsOneStack {
                offset_delta,
                stack,
                extended,
            } => {
                if *extended {
                    247u8.serialize(writer)?;
                    offset_delta.serialize(writer)?;
                } else {
                    short_frame_tag(*offset_delta, 64)?.serialize(writer)?;
                }
                stack.serialize(writer)?;
            }
            StackMapFrame::ChopLocalsNoStack {
                offset_delta,
                chopped_k,
            } => {
                if !(1..=3).contains(chopped_k) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("cannot chop {} locals in one frame", chopped_k),
                    ));
                }
                (251 - chopped_k).serialize(writer)?;
                offset_delta.serialize(writer)?;
            }
            StackMapFrame::AppendLocalsNoStack {
                offset_delta,
                locals,
            } => {
                if !(1..=3).contains(&locals.len()) {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("cannot append {} locals in one frame", locals.len()),
                    ));
                }
                (251 + locals.len() as u8).serialize(writer)?;
                offset_delta.serialize(writer)?;
                for local in locals {
                    local.serialize(writer)?;
                }
            }
            StackMapFrame::Full {
                offset_delta,
                locals,
                stack,
            } => {
                255u8.serialize(writer)?;
                offset_delta.serialize(writer)?;
                locals.serialize(writer)?;
                stack.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Frame type byte for the forms that pack the offset delta into the tag
fn short_frame_tag(offset_delta: u16, base: u8) -> std::io::Result<u8> {
    if offset_delta < 64 {
        Ok(base + offset_delta as u8)
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset delta {} needs an extended frame", offset_delta),
        ))
    }
}

impl Serialize for StackMapType {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            VerificationType::Top => 0u8.serialize(writer)?,
            VerificationType::Integer => 1u8.serialize(writer)?,
            VerificationType::Float => 2u8.serialize(writer)?,
            VerificationType::Double => 3u8.serialize(writer)?,
            VerificationType::Long => 4u8.serialize(writer)?,
            VerificationType::Null => 5u8.serialize(writer)?,
            VerificationType::UninitializedThis => 6u8.serialize(writer)?,
            VerificationType::Object(class) => {
                7u8.serialize(writer)?;
                class.serialize(writer)?;
            }
            VerificationType::Uninitialized(offset) => {
                8u8.serialize(writer)?;
                offset.serialize(writer)?;
            }
            VerificationType::ReturnAddress(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "return addresses have no stack map encoding",
                ))
            }
        }
        Ok(())
    }
}

/// Method in which a local or anonymous class is declared
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.7
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnclosingMethod {
    pub class: ClassConstantIndex,

    /// Absent when the class is not immediately enclosed by a method or constructor
    pub method: Option<NameAndTypeConstantIndex>,
}

impl AttributeLike for EnclosingMethod {
    const NAME: &'static str = "EnclosingMethod";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let class = parse_class(reader, constants)?;
        let method = NameAndTypeConstantIndex::deserialize(reader)?;
        let method = if method.0 .0 == 0 {
            None
        } else {
            constants.get_name_and_type(method)?;
            Some(method)
        };
        Ok(EnclosingMethod { class, method })
    }
}

impl Serialize for EnclosingMethod {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.class.serialize(writer)?;
        serialize_optional_index(self.method.map(|idx| idx.0), writer)?;
        Ok(())
    }
}

/// Debugging information about a local variable
///
/// In a `LocalVariableTypeTable`, `descriptor` is a generic signature instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariable {
    pub start_pc: u16,
    pub length: u16,
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub index: u16,
}

impl LocalVariable {
    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        Ok(LocalVariable {
            start_pc: reader.read_u2()?,
            length: reader.read_u2()?,
            name: parse_utf8(reader, constants)?,
            descriptor: parse_utf8(reader, constants)?,
            index: reader.read_u2()?,
        })
    }
}

impl Serialize for LocalVariable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.index.serialize(writer)?;
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.13
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTable(pub Vec<LocalVariable>);

impl AttributeLike for LocalVariableTable {
    const NAME: &'static str = "LocalVariableTable";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Code];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut variables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            variables.push(LocalVariable::parse(reader, constants)?);
        }
        Ok(LocalVariableTable(variables))
    }
}

impl Serialize for LocalVariableTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.14
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTypeTable(pub Vec<LocalVariable>);

impl AttributeLike for LocalVariableTypeTable {
    const NAME: &'static str = "LocalVariableTypeTable";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Code];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut variables = Vec::with_capacity(count as usize);
        for _ in 0..count {
            variables.push(LocalVariable::parse(reader, constants)?);
        }
        Ok(LocalVariableTypeTable(variables))
    }
}

impl Serialize for LocalVariableTypeTable {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.24
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParameters(pub Vec<MethodParameter>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodParameter {
    /// Absent for a formal parameter with no name
    pub name: Option<Utf8ConstantIndex>,
    pub access_flags: u16,
}

impl AttributeLike for MethodParameters {
    const NAME: &'static str = "MethodParameters";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Method];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u1()?;
        let mut parameters = Vec::with_capacity(count as usize);
        for _ in 0..count {
            parameters.push(MethodParameter {
                name: parse_optional_utf8(reader, constants)?,
                access_flags: reader.read_u2()?,
            });
        }
        Ok(MethodParameters(parameters))
    }
}

impl Serialize for MethodParameters {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        // Parameter count is 1 byte
        (self.0.len() as u8).serialize(writer)?;
        for parameter in &self.0 {
            serialize_optional_index(parameter.name.map(|idx| idx.0), writer)?;
            parameter.access_flags.serialize(writer)?;
        }
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.31
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermittedSubclasses(pub Vec<ClassConstantIndex>);

impl AttributeLike for PermittedSubclasses {
    const NAME: &'static str = "PermittedSubclasses";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut classes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            classes.push(parse_class(reader, constants)?);
        }
        Ok(PermittedSubclasses(classes))
    }
}

impl Serialize for PermittedSubclasses {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.30
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record(pub Vec<RecordComponent>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordComponent {
    pub name: Utf8ConstantIndex,
    pub descriptor: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl AttributeLike for Record {
    const NAME: &'static str = "Record";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let count = reader.read_u2()?;
        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            components.push(RecordComponent {
                name: parse_utf8(reader, constants)?,
                descriptor: parse_utf8(reader, constants)?,
                attributes: parse_attributes(
                    reader,
                    constants,
                    AttributeLocation::RecordComponent,
                )?,
            });
        }
        Ok(Record(components))
    }
}

impl Serialize for Record {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

impl Serialize for RecordComponent {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name.serialize(writer)?;
        self.descriptor.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

/// Module declaration (only in `module-info.class`)
///
/// Indices typed as plain `ConstantIndex` point at `CONSTANT_Module` or `CONSTANT_Package`
/// entries.
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.25
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    pub name: ConstantIndex,
    pub flags: u16,
    pub version: Option<Utf8ConstantIndex>,
    pub requires: Vec<ModuleRequires>,
    pub exports: Vec<ModulePackageTargets>,
    pub opens: Vec<ModulePackageTargets>,
    pub uses: Vec<ClassConstantIndex>,
    pub provides: Vec<ModuleProvides>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRequires {
    pub module: ConstantIndex,
    pub flags: u16,
    pub version: Option<Utf8ConstantIndex>,
}

/// Entry of either `exports` or `opens`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePackageTargets {
    pub package: ConstantIndex,
    pub flags: u16,

    /// Modules the package is restricted to (empty means unrestricted)
    pub targets: Vec<ConstantIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleProvides {
    pub service: ClassConstantIndex,
    pub implementations: Vec<ClassConstantIndex>,
}

impl AttributeLike for Module {
    const NAME: &'static str = "Module";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let name = parse_index_of(reader, constants, ConstantKind::Module)?;
        let flags = reader.read_u2()?;
        let version = parse_optional_utf8(reader, constants)?;

        let mut requires = vec![];
        for _ in 0..reader.read_u2()? {
            requires.push(ModuleRequires {
                module: parse_index_of(reader, constants, ConstantKind::Module)?,
                flags: reader.read_u2()?,
                version: parse_optional_utf8(reader, constants)?,
            });
        }
        let exports = ModulePackageTargets::parse_all(reader, constants)?;
        let opens = ModulePackageTargets::parse_all(reader, constants)?;
        let mut uses = vec![];
        for _ in 0..reader.read_u2()? {
            uses.push(parse_class(reader, constants)?);
        }
        let mut provides = vec![];
        for _ in 0..reader.read_u2()? {
            let service = parse_class(reader, constants)?;
            let mut implementations = vec![];
            for _ in 0..reader.read_u2()? {
                implementations.push(parse_class(reader, constants)?);
            }
            provides.push(ModuleProvides {
                service,
                implementations,
            });
        }

        Ok(Module {
            name,
            flags,
            version,
            requires,
            exports,
            opens,
            uses,
            provides,
        })
    }
}

impl ModulePackageTargets {
    fn parse_all(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
    ) -> Result<Vec<ModulePackageTargets>, Error> {
        let mut entries = vec![];
        for _ in 0..reader.read_u2()? {
            let package = parse_index_of(reader, constants, ConstantKind::Package)?;
            let flags = reader.read_u2()?;
            let mut targets = vec![];
            for _ in 0..reader.read_u2()? {
                targets.push(parse_index_of(reader, constants, ConstantKind::Module)?);
            }
            entries.push(ModulePackageTargets {
                package,
                flags,
                targets,
            });
        }
        Ok(entries)
    }
}

impl Serialize for Module {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name.serialize(writer)?;
        self.flags.serialize(writer)?;
        serialize_optional_index(self.version.map(|idx| idx.0), writer)?;
        self.requires.serialize(writer)?;
        self.exports.serialize(writer)?;
        self.opens.serialize(writer)?;
        self.uses.serialize(writer)?;
        self.provides.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for ModuleRequires {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.module.serialize(writer)?;
        self.flags.serialize(writer)?;
        serialize_optional_index(self.version.map(|idx| idx.0), writer)?;
        Ok(())
    }
}

impl Serialize for ModulePackageTargets {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.package.serialize(writer)?;
        self.flags.serialize(writer)?;
        self.targets.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for ModuleProvides {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.service.serialize(writer)?;
        self.implementations.serialize(writer)?;
        Ok(())
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.26
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModulePackages(pub Vec<ConstantIndex>);

impl AttributeLike for ModulePackages {
    const NAME: &'static str = "ModulePackages";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        let mut packages = vec![];
        for _ in 0..reader.read_u2()? {
            packages.push(parse_index_of(reader, constants, ConstantKind::Package)?);
        }
        Ok(ModulePackages(packages))
    }
}

impl Serialize for ModulePackages {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.27
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMainClass(pub ClassConstantIndex);

impl AttributeLike for ModuleMainClass {
    const NAME: &'static str = "ModuleMainClass";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Class];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        Ok(ModuleMainClass(parse_class(reader, constants)?))
    }
}

impl Serialize for ModuleMainClass {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::ConstantPoolBuilder;
    use crate::jvm::ClassFormatError;

    fn attribute_bytes(name: Utf8ConstantIndex, contents: &[u8]) -> Vec<u8> {
        let mut bytes = name.to_bytes().unwrap();
        bytes.extend((contents.len() as u32).to_be_bytes());
        bytes.extend(contents);
        bytes
    }

    #[test]
    fn code_with_nested_attributes() {
        let mut builder = ConstantPoolBuilder::new();
        let code_name = builder.get_utf8("Code").unwrap();
        let lines_name = builder.get_utf8("LineNumberTable").unwrap();
        let throwable = builder.get_class("java/lang/Throwable").unwrap();
        let constants = builder.build();

        let code = Code {
            max_stack: 1,
            max_locals: 1,
            code_array: BytecodeArray(vec![0x2a, 0xb1]),
            exception_table: vec![
                ExceptionHandler {
                    start_pc: 0,
                    end_pc: 1,
                    handler_pc: 1,
                    catch_type: Some(throwable),
                },
                ExceptionHandler {
                    start_pc: 0,
                    end_pc: 1,
                    handler_pc: 1,
                    catch_type: None,
                },
            ],
            attributes: vec![Attribute {
                name_index: lines_name,
                data: AttributeData::LineNumberTable(LineNumberTable(vec![LineNumber {
                    start_pc: 0,
                    line_number: 3,
                }])),
            }],
        };
        let attribute = Attribute {
            name_index: code_name,
            data: AttributeData::Code(code),
        };

        let bytes = attribute.to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes);
        let parsed = Attribute::parse(&mut reader, &constants, AttributeLocation::Method).unwrap();
        assert!(reader.is_empty());
        assert_eq!(parsed, attribute);
    }

    #[test]
    fn misplaced_attribute_is_raw() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("ConstantValue").unwrap();
        let value = builder.get_integer(1).unwrap();
        let constants = builder.build();

        let bytes = attribute_bytes(name, &value.to_bytes().unwrap());
        let mut reader = ByteReader::new(&bytes);
        let parsed = Attribute::parse(&mut reader, &constants, AttributeLocation::Method).unwrap();
        assert_eq!(parsed.data, AttributeData::Raw(vec![0, value.0 as u8]));

        let mut reader = ByteReader::new(&bytes);
        let parsed = Attribute::parse(&mut reader, &constants, AttributeLocation::Field).unwrap();
        assert_eq!(parsed.data, AttributeData::ConstantValue(ConstantValue(value)));
    }

    #[test]
    fn declared_length_must_match() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("SourceFile").unwrap();
        let file = builder.get_utf8("Foo.java").unwrap();
        let constants = builder.build();

        // One byte too many
        let mut contents = file.to_bytes().unwrap();
        contents.push(0);
        let bytes = attribute_bytes(name, &contents);
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            Attribute::parse(&mut reader, &constants, AttributeLocation::Class),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::AttributeLength {
                    declared: 3,
                    consumed: 2,
                    ..
                },
                ..
            }))
        ));

        // One byte too few
        let bytes = attribute_bytes(name, &[0]);
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            Attribute::parse(&mut reader, &constants, AttributeLocation::Class),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::AttributeLength { declared: 1, .. },
                ..
            }))
        ));
    }

    #[test]
    fn duplicate_attributes() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("SourceFile").unwrap();
        let file = builder.get_utf8("Foo.java").unwrap();
        let constants = builder.build();

        let single = attribute_bytes(name, &file.to_bytes().unwrap());
        let mut bytes = vec![0, 2];
        bytes.extend(&single);
        bytes.extend(&single);
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            parse_attributes(&mut reader, &constants, AttributeLocation::Class),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::DuplicateAttribute { .. },
                ..
            }))
        ));
    }

    #[test]
    fn bad_index_inside_attribute() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("NestHost").unwrap();
        let constants = builder.build();

        let bytes = attribute_bytes(name, &[0, 1]);
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(
            Attribute::parse(&mut reader, &constants, AttributeLocation::Class),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::WrongConstantKind {
                    index: 1,
                    expected: ConstantKind::Class,
                    found: ConstantKind::Utf8,
                },
                ..
            }))
        ));
    }

    fn parse_error(
        name: Utf8ConstantIndex,
        contents: &[u8],
        constants: &ConstantPool,
        location: AttributeLocation,
    ) -> ClassFormatErrorKind {
        let bytes = attribute_bytes(name, contents);
        match Attribute::parse(&mut ByteReader::new(&bytes), constants, location) {
            Err(Error::ClassFormat(ClassFormatError { kind, .. })) => kind,
            other => panic!("expected a class format error, got {:?}", other),
        }
    }

    #[test]
    fn enclosing_method_indices() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("EnclosingMethod").unwrap();
        let outer = builder.get_class("Outer").unwrap();
        let run = builder.get_name_and_type("run", "()V").unwrap();
        let constants = builder.build();
        let count = constants.count();

        assert!(matches!(
            parse_error(name, &[0, 0, 0, 0], &constants, AttributeLocation::Class),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, pool_count }
                if pool_count == count
        ));
        let mut contents = outer.to_bytes().unwrap();
        contents.extend([0xff, 0xf0]);
        assert!(matches!(
            parse_error(name, &contents, &constants, AttributeLocation::Class),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0xfff0, pool_count }
                if pool_count == count
        ));

        // No method is fine, and so is a real one
        for method in [None, Some(run)] {
            let attribute = Attribute {
                name_index: name,
                data: AttributeData::EnclosingMethod(EnclosingMethod {
                    class: outer,
                    method,
                }),
            };
            let bytes = attribute.to_bytes().unwrap();
            let parsed = Attribute::parse(
                &mut ByteReader::new(&bytes),
                &constants,
                AttributeLocation::Class,
            );
            assert_eq!(parsed.unwrap(), attribute);
        }
    }

    #[test]
    fn local_variable_tables() {
        let mut builder = ConstantPoolBuilder::new();
        let table_name = builder.get_utf8("LocalVariableTable").unwrap();
        let var_name = builder.get_utf8("count").unwrap();
        let descriptor = builder.get_utf8("I").unwrap();
        let constants = builder.build();

        let entry = |name: u16, descriptor: u16| -> Vec<u8> {
            let mut contents = vec![0, 1, 0, 0, 0, 4];
            contents.extend(name.to_be_bytes());
            contents.extend(descriptor.to_be_bytes());
            contents.extend([0, 1]);
            contents
        };
        assert!(matches!(
            parse_error(
                table_name,
                &entry(0xfff0, descriptor.0 .0),
                &constants,
                AttributeLocation::Code
            ),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0xfff0, .. }
        ));
        assert!(matches!(
            parse_error(
                table_name,
                &entry(var_name.0 .0, 0),
                &constants,
                AttributeLocation::Code
            ),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. }
        ));

        // Tables may be split across several attributes
        let single = attribute_bytes(table_name, &entry(var_name.0 .0, descriptor.0 .0));
        let mut bytes = vec![0, 2];
        bytes.extend(&single);
        bytes.extend(&single);
        let attributes =
            parse_attributes(&mut ByteReader::new(&bytes), &constants, AttributeLocation::Code)
                .unwrap();
        assert_eq!(attributes.len(), 2);
        assert_eq!(
            attributes[0].data,
            AttributeData::LocalVariableTable(LocalVariableTable(vec![LocalVariable {
                start_pc: 0,
                length: 4,
                name: var_name,
                descriptor,
                index: 1,
            }]))
        );
    }

    #[test]
    fn stack_map_frames() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("StackMapTable").unwrap();
        let string = builder.get_class("java/lang/String").unwrap();
        let constants = builder.build();

        let frames = vec![
            StackMapFrame::SameLocalsNoStack {
                offset_delta: 3,
                extended: false,
            },
            StackMapFrame::SameLocalsNoStack {
                offset_delta: 3,
                extended: true,
            },
            StackMapFrame::SameLocalsOneStack {
                offset_delta: 100,
                stack: VerificationType::Object(string),
                extended: true,
            },
            StackMapFrame::AppendLocalsNoStack {
                offset_delta: 5,
                locals: vec![VerificationType::Long, VerificationType::Uninitialized(4)],
            },
            StackMapFrame::ChopLocalsNoStack {
                offset_delta: 1,
                chopped_k: 2,
            },
            StackMapFrame::Full {
                offset_delta: 9,
                locals: vec![VerificationType::UninitializedThis],
                stack: vec![VerificationType::Null, VerificationType::Top],
            },
        ];
        let attribute = Attribute {
            name_index: name,
            data: AttributeData::StackMapTable(StackMapTable(frames)),
        };
        let bytes = attribute.to_bytes().unwrap();
        let parsed =
            Attribute::parse(&mut ByteReader::new(&bytes), &constants, AttributeLocation::Code);
        assert_eq!(parsed.unwrap(), attribute);

        // same_locals_1_stack_item_frame holding an object of class #0
        assert!(matches!(
            parse_error(name, &[0, 1, 64, 7, 0, 0], &constants, AttributeLocation::Code),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. }
        ));
        assert!(matches!(
            parse_error(name, &[0, 1, 200], &constants, AttributeLocation::Code),
            ClassFormatErrorKind::MalformedAttribute { .. }
        ));
        assert!(matches!(
            parse_error(name, &[0, 1, 64, 9], &constants, AttributeLocation::Code),
            ClassFormatErrorKind::MalformedAttribute { .. }
        ));

        // Return addresses only exist while verifying
        let table = StackMapTable(vec![StackMapFrame::SameLocalsOneStack {
            offset_delta: 0,
            stack: VerificationType::ReturnAddress(0),
            extended: false,
        }]);
        assert!(table.to_bytes().is_err());
    }

    #[test]
    fn class_lists_and_parameters() {
        let mut builder = ConstantPoolBuilder::new();
        let permitted = builder.get_utf8("PermittedSubclasses").unwrap();
        let parameters = builder.get_utf8("MethodParameters").unwrap();
        let main_class = builder.get_utf8("ModuleMainClass").unwrap();
        let circle = builder.get_class("Circle").unwrap();
        let constants = builder.build();

        let mut contents = vec![0, 2];
        contents.extend(circle.to_bytes().unwrap());
        contents.extend([0xff, 0xf0]);
        assert!(matches!(
            parse_error(permitted, &contents, &constants, AttributeLocation::Class),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0xfff0, .. }
        ));
        assert!(matches!(
            parse_error(main_class, &[0, 0], &constants, AttributeLocation::Class),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. }
        ));

        // Unnamed parameters are fine, but a name must be a UTF-8 constant
        let bytes = attribute_bytes(parameters, &[1, 0, 0, 0x10, 0x00]);
        let parsed =
            Attribute::parse(&mut ByteReader::new(&bytes), &constants, AttributeLocation::Method);
        assert_eq!(
            parsed.unwrap().data,
            AttributeData::MethodParameters(MethodParameters(vec![MethodParameter {
                name: None,
                access_flags: 0x0010,
            }]))
        );
        let mut contents = vec![1];
        contents.extend(circle.to_bytes().unwrap());
        contents.extend([0, 0]);
        assert!(matches!(
            parse_error(parameters, &contents, &constants, AttributeLocation::Method),
            ClassFormatErrorKind::WrongConstantKind {
                expected: ConstantKind::Utf8,
                found: ConstantKind::Class,
                ..
            }
        ));
    }

    #[test]
    fn record_components() {
        let mut builder = ConstantPoolBuilder::new();
        let record_name = builder.get_utf8("Record").unwrap();
        let signature_name = builder.get_utf8("Signature").unwrap();
        let field = builder.get_utf8("items").unwrap();
        let descriptor = builder.get_utf8("Ljava/util/List;").unwrap();
        let signature = builder.get_utf8("Ljava/util/List<Ljava/lang/String;>;").unwrap();
        let constants = builder.build();

        let attribute = Attribute {
            name_index: record_name,
            data: AttributeData::Record(Record(vec![RecordComponent {
                name: field,
                descriptor,
                attributes: vec![Attribute {
                    name_index: signature_name,
                    data: AttributeData::Signature(Signature { signature }),
                }],
            }])),
        };
        let bytes = attribute.to_bytes().unwrap();
        let parsed =
            Attribute::parse(&mut ByteReader::new(&bytes), &constants, AttributeLocation::Class);
        assert_eq!(parsed.unwrap(), attribute);

        // Component attributes get checked too
        let mut contents = vec![0, 1];
        contents.extend(field.to_bytes().unwrap());
        contents.extend(descriptor.to_bytes().unwrap());
        contents.extend([0, 1]);
        contents.extend(attribute_bytes(signature_name, &[0, 0]));
        assert!(matches!(
            parse_error(record_name, &contents, &constants, AttributeLocation::Class),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. }
        ));
    }

    #[test]
    fn module_constant_kinds() {
        let mut builder = ConstantPoolBuilder::new();
        let module_name = builder.get_utf8("Module").unwrap();
        let packages_name = builder.get_utf8("ModulePackages").unwrap();
        let not_a_module = builder.get_utf8("java.base").unwrap();
        let constants = builder.build();

        let mut contents = not_a_module.to_bytes().unwrap();
        contents.extend([0; 12]);
        assert!(matches!(
            parse_error(module_name, &contents, &constants, AttributeLocation::Class),
            ClassFormatErrorKind::WrongConstantKind {
                expected: ConstantKind::Module,
                found: ConstantKind::Utf8,
                ..
            }
        ));
        assert!(matches!(
            parse_error(packages_name, &[0, 1, 0, 0], &constants, AttributeLocation::Class),
            ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. }
        ));
    }
}
