use super::{
    parse_attributes, Attribute, AttributeData, AttributeLocation, BootstrapMethods, ByteReader,
    ClassConstantIndex, ConstantPool, Deserialize, Field, Method, Serialize, Version,
};
use crate::jvm::names::{BinaryName, Name};
use crate::jvm::{ClassAccessFlags, ClassFormatErrorKind, Error};
use byteorder::WriteBytesExt;

/// Representation of the [`class` file format of the JVM][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub version: Version,
    pub constants: ConstantPool,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,

    /// Only `java/lang/Object` and `module-info` have no superclass
    pub super_class: Option<ClassConstantIndex>,
    pub interfaces: Vec<ClassConstantIndex>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Magic header bytes that go at the front of the serialized class file
    pub const MAGIC: u32 = 0xCAFEBABE;

    /// Decode a class file
    ///
    /// Versions outside of `45.0` to `latest_major` are rejected (see
    /// [`Version::check_supported`]). Every constant pool index read along the way is checked to
    /// point at the right kind of constant, but none of the rules about which access flags,
    /// names, or descriptors are legal are applied here.
    pub fn parse(
        bytes: &[u8],
        latest_major: u16,
        enable_preview: bool,
    ) -> Result<ClassFile, Error> {
        let mut reader = ByteReader::new(bytes);

        let magic = reader.read_u4()?;
        if magic != ClassFile::MAGIC {
            return Err(ClassFormatErrorKind::BadMagic(magic).into());
        }
        let version = Version::deserialize(&mut reader)?;
        version.check_supported(latest_major, enable_preview)?;

        let constants = ConstantPool::parse(&mut reader, version)?;
        let access_flags = ClassAccessFlags::deserialize(&mut reader)?;
        let this_class = ClassConstantIndex::deserialize(&mut reader)?;
        let class_name = constants.get_class_name(this_class)?.to_owned();
        log::trace!(
            "Parsed constant pool of {} ({} slots, version {})",
            class_name,
            constants.count(),
            version
        );

        ClassFile::parse_body(reader, version, constants, access_flags, this_class)
            .map_err(|err| err.in_class(&class_name))
    }

    /// Everything after `this_class`
    fn parse_body(
        mut reader: ByteReader<'_>,
        version: Version,
        constants: ConstantPool,
        access_flags: ClassAccessFlags,
        this_class: ClassConstantIndex,
    ) -> Result<ClassFile, Error> {
        let super_class = ClassConstantIndex::deserialize(&mut reader)?;
        let super_class = if super_class.0 .0 == 0 {
            None
        } else {
            constants.get_class_name(super_class)?;
            Some(super_class)
        };

        let interfaces = Vec::<ClassConstantIndex>::deserialize(&mut reader)?;
        for interface in &interfaces {
            constants.get_class_name(*interface)?;
        }

        let field_count = reader.read_u2()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Field::parse(&mut reader, &constants)?);
        }

        let method_count = reader.read_u2()?;
        let mut methods = Vec::with_capacity(method_count as usize);
        for _ in 0..method_count {
            methods.push(Method::parse(&mut reader, &constants)?);
        }

        let attributes = parse_attributes(&mut reader, &constants, AttributeLocation::Class)?;

        if !reader.is_empty() {
            return Err(ClassFormatErrorKind::TrailingBytes {
                offset: reader.position(),
                extra: reader.remaining(),
            }
            .into());
        }

        Ok(ClassFile {
            version,
            constants,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// Binary name of the class
    pub fn name(&self) -> Result<&str, Error> {
        self.constants.get_class_name(self.this_class)
    }

    pub fn super_name(&self) -> Result<Option<&str>, Error> {
        match self.super_class {
            None => Ok(None),
            Some(super_class) => Ok(Some(self.constants.get_class_name(super_class)?)),
        }
    }

    pub fn interface_names(&self) -> Result<Vec<&str>, Error> {
        self.interfaces
            .iter()
            .map(|interface| self.constants.get_class_name(*interface))
            .collect()
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    /// Whether the class file claims to describe a module, by name or by flag
    pub fn is_module_info(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::MODULE)
            || self.name().ok() == Some(BinaryName::MODULE_INFO.as_str())
    }

    pub fn bootstrap_methods(&self) -> Option<&BootstrapMethods> {
        self.attributes.iter().find_map(|attr| match &attr.data {
            AttributeData::BootstrapMethods(methods) => Some(methods),
            _ => None,
        })
    }
}

impl Serialize for ClassFile {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        ClassFile::MAGIC.serialize(writer)?;
        self.version.serialize(writer)?;
        self.constants.serialize(writer)?;
        self.access_flags.serialize(writer)?;
        self.this_class.serialize(writer)?;
        self.super_class
            .map_or(0, |super_class| super_class.0 .0)
            .serialize(writer)?;
        self.interfaces.serialize(writer)?;
        self.fields.serialize(writer)?;
        self.methods.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{BytecodeArray, Code, ConstantPoolBuilder, SourceFile};
    use crate::jvm::{ClassFormatError, MethodAccessFlags, UnsupportedReason};

    fn hello_class(version: Version) -> ClassFile {
        let mut builder = ConstantPoolBuilder::new();
        let this_class = builder.get_class("Hello").unwrap();
        let super_class = builder.get_class("java/lang/Object").unwrap();
        let object_init = builder
            .get_method_ref("java/lang/Object", "<init>", "()V", false)
            .unwrap();
        let init = builder.get_utf8("<init>").unwrap();
        let void = builder.get_utf8("()V").unwrap();
        let code_name = builder.get_utf8("Code").unwrap();
        let source_name = builder.get_utf8("SourceFile").unwrap();
        let source = builder.get_utf8("Hello.java").unwrap();
        let [hi, lo] = object_init.0 .0.to_be_bytes();

        ClassFile {
            version,
            constants: builder.build(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![Method {
                access_flags: MethodAccessFlags::PUBLIC,
                name_index: init,
                descriptor_index: void,
                attributes: vec![Attribute {
                    name_index: code_name,
                    data: AttributeData::Code(Code {
                        max_stack: 1,
                        max_locals: 1,
                        code_array: BytecodeArray(vec![0x2a, 0xb7, hi, lo, 0xb1]),
                        exception_table: vec![],
                        attributes: vec![],
                    }),
                }],
            }],
            attributes: vec![Attribute {
                name_index: source_name,
                data: AttributeData::SourceFile(SourceFile(source)),
            }],
        }
    }

    fn format_kind(result: Result<ClassFile, Error>) -> ClassFormatErrorKind {
        match result {
            Err(Error::ClassFormat(ClassFormatError { kind, .. })) => kind,
            other => panic!("Expected a class format error, got {:?}", other),
        }
    }

    #[test]
    fn round_trip() {
        let class = hello_class(Version::JAVA8);
        let bytes = class.to_bytes().unwrap();
        let parsed = ClassFile::parse(&bytes, 65, false).unwrap();
        assert_eq!(parsed, class);
        assert_eq!(parsed.to_bytes().unwrap(), bytes);
        assert_eq!(parsed.name().unwrap(), "Hello");
        assert_eq!(parsed.super_name().unwrap(), Some("java/lang/Object"));
        assert!(parsed.methods[0].code().is_some());
    }

    #[test]
    fn bad_magic() {
        let mut bytes = hello_class(Version::JAVA8).to_bytes().unwrap();
        bytes[0] = 0xCB;
        assert!(matches!(
            format_kind(ClassFile::parse(&bytes, 65, false)),
            ClassFormatErrorKind::BadMagic(0xCBFEBABE)
        ));
    }

    #[test]
    fn unsupported_version() {
        let bytes = hello_class(Version::new(66, 0)).to_bytes().unwrap();
        assert!(matches!(
            ClassFile::parse(&bytes, 65, false),
            Err(Error::UnsupportedClassVersion(err)) if err.reason == UnsupportedReason::TooNew
        ));
    }

    #[test]
    fn trailing_bytes() {
        let mut bytes = hello_class(Version::JAVA8).to_bytes().unwrap();
        let len = bytes.len();
        bytes.push(0);
        let err = ClassFile::parse(&bytes, 65, false).unwrap_err();
        assert!(matches!(
            &err,
            Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::TrailingBytes { offset, extra: 1 },
                class: Some(class),
                ..
            }) if *offset == len && class == "Hello"
        ));
    }

    #[test]
    fn truncated_anywhere() {
        let bytes = hello_class(Version::JAVA8).to_bytes().unwrap();
        for len in 0..bytes.len() {
            let err = ClassFile::parse(&bytes[..len], 65, false).unwrap_err();
            assert!(
                matches!(
                    err.root_cause(),
                    Error::TruncatedClassFile { .. } | Error::ClassFormat(_)
                ),
                "Truncated at {}: {}",
                len,
                err
            );
        }
    }
}
