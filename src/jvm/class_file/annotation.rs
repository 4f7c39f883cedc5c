//! Annotations and type annotations, along with the attributes that carry them
//!
//! Only the structure is checked here: every constant pool index must point at a constant of
//! the right kind. Annotation types and element names are never resolved.

use super::attribute::{malformed, parse_index_of, parse_utf8};
use super::{
    AttributeLike, AttributeLocation, ByteReader, ConstantIndex, ConstantKind, ConstantPool,
    Serialize, Utf8ConstantIndex,
};
use crate::jvm::Error;
use byteorder::WriteBytesExt;

/// Element values nested deeper than this are rejected
const MAX_NESTING: usize = 256;

/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.16
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    /// Field descriptor of the annotation interface
    pub type_index: Utf8ConstantIndex,
    pub elements: Vec<ElementValuePair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementValuePair {
    pub name: Utf8ConstantIndex,
    pub value: ElementValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementValue {
    /// Primitive or string constant (`tag` is one of `BCDFIJSZs`)
    Constant { tag: u8, value: ConstantIndex },
    Enum {
        type_name: Utf8ConstantIndex,
        const_name: Utf8ConstantIndex,
    },
    /// Return descriptor of the class literal
    Class(Utf8ConstantIndex),
    Annotation(Annotation),
    Array(Vec<ElementValue>),
}

impl Annotation {
    fn parse(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        attribute: &str,
        depth: usize,
    ) -> Result<Annotation, Error> {
        let type_index = parse_utf8(reader, constants)?;
        let count = reader.read_u2()?;
        let mut elements = Vec::with_capacity(count as usize);
        for _ in 0..count {
            elements.push(ElementValuePair {
                name: parse_utf8(reader, constants)?,
                value: ElementValue::parse(reader, constants, attribute, depth)?,
            });
        }
        Ok(Annotation {
            type_index,
            elements,
        })
    }

    fn parse_all(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        attribute: &str,
    ) -> Result<Vec<Annotation>, Error> {
        let count = reader.read_u2()?;
        let mut annotations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            annotations.push(Annotation::parse(reader, constants, attribute, 0)?);
        }
        Ok(annotations)
    }
}

impl ElementValue {
    fn parse(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        attribute: &str,
        depth: usize,
    ) -> Result<ElementValue, Error> {
        if depth >= MAX_NESTING {
            return Err(malformed(attribute, String::from("element values nest too deeply")));
        }

        let tag = reader.read_u1()?;
        let kind = match tag {
            b'B' | b'C' | b'I' | b'S' | b'Z' => ConstantKind::Integer,
            b'D' => ConstantKind::Double,
            b'F' => ConstantKind::Float,
            b'J' => ConstantKind::Long,
            b's' => ConstantKind::Utf8,
            b'e' => {
                return Ok(ElementValue::Enum {
                    type_name: parse_utf8(reader, constants)?,
                    const_name: parse_utf8(reader, constants)?,
                })
            }
            b'c' => return Ok(ElementValue::Class(parse_utf8(reader, constants)?)),
            b'@' => {
                let nested = Annotation::parse(reader, constants, attribute, depth + 1)?;
                return Ok(ElementValue::Annotation(nested));
            }
            b'[' => {
                let count = reader.read_u2()?;
                let mut values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    values.push(ElementValue::parse(reader, constants, attribute, depth + 1)?);
                }
                return Ok(ElementValue::Array(values));
            }
            other => {
                return Err(malformed(
                    attribute,
                    format!("unknown element value tag {:?}", other as char),
                ))
            }
        };
        Ok(ElementValue::Constant {
            tag,
            value: parse_index_of(reader, constants, kind)?,
        })
    }
}

impl Serialize for Annotation {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.type_index.serialize(writer)?;
        self.elements.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for ElementValuePair {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.name.serialize(writer)?;
        self.value.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for ElementValue {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            ElementValue::Constant { tag, value } => {
                tag.serialize(writer)?;
                value.serialize(writer)?;
            }
            ElementValue::Enum {
                type_name,
                const_name,
            } => {
                b'e'.serialize(writer)?;
                type_name.serialize(writer)?;
                const_name.serialize(writer)?;
            }
            ElementValue::Class(descriptor) => {
                b'c'.serialize(writer)?;
                descriptor.serialize(writer)?;
            }
            ElementValue::Annotation(annotation) => {
                b'@'.serialize(writer)?;
                annotation.serialize(writer)?;
            }
            ElementValue::Array(values) => {
                b'['.serialize(writer)?;
                values.serialize(writer)?;
            }
        }
        Ok(())
    }
}

/// Annotation on a use of a type
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.20
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeAnnotation {
    /// Kind of target, which also decides the shape of `target`
    pub target_type: u8,
    pub target: TargetInfo,
    pub type_path: Vec<TypePathEntry>,
    pub annotation: Annotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetInfo {
    TypeParameter { index: u8 },
    Supertype { index: u16 },
    TypeParameterBound { type_parameter: u8, bound: u8 },
    Empty,
    FormalParameter { index: u8 },
    Throws { type_index: u16 },
    LocalVariable(Vec<LocalVariableTarget>),
    Catch { exception_table_index: u16 },
    Offset(u16),
    TypeArgument { offset: u16, type_argument: u8 },
}

/// Range of code in which a local variable holds the annotated type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalVariableTarget {
    pub start_pc: u16,
    pub length: u16,
    pub index: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypePathEntry {
    pub kind: u8,
    pub type_argument: u8,
}

impl TypeAnnotation {
    fn parse(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        attribute: &str,
    ) -> Result<TypeAnnotation, Error> {
        let target_type = reader.read_u1()?;
        let target = match target_type {
            0x00 | 0x01 => TargetInfo::TypeParameter {
                index: reader.read_u1()?,
            },
            0x10 => TargetInfo::Supertype {
                index: reader.read_u2()?,
            },
            0x11 | 0x12 => TargetInfo::TypeParameterBound {
                type_parameter: reader.read_u1()?,
                bound: reader.read_u1()?,
            },
            0x13..=0x15 => TargetInfo::Empty,
            0x16 => TargetInfo::FormalParameter {
                index: reader.read_u1()?,
            },
            0x17 => TargetInfo::Throws {
                type_index: reader.read_u2()?,
            },
            0x40 | 0x41 => {
                let count = reader.read_u2()?;
                let mut table = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    table.push(LocalVariableTarget {
                        start_pc: reader.read_u2()?,
                        length: reader.read_u2()?,
                        index: reader.read_u2()?,
                    });
                }
                TargetInfo::LocalVariable(table)
            }
            0x42 => TargetInfo::Catch {
                exception_table_index: reader.read_u2()?,
            },
            0x43..=0x46 => TargetInfo::Offset(reader.read_u2()?),
            0x47..=0x4b => TargetInfo::TypeArgument {
                offset: reader.read_u2()?,
                type_argument: reader.read_u1()?,
            },
            other => {
                return Err(malformed(
                    attribute,
                    format!("unknown type annotation target 0x{:02x}", other),
                ))
            }
        };

        let path_length = reader.read_u1()?;
        let mut type_path = Vec::with_capacity(path_length as usize);
        for _ in 0..path_length {
            type_path.push(TypePathEntry {
                kind: reader.read_u1()?,
                type_argument: reader.read_u1()?,
            });
        }

        Ok(TypeAnnotation {
            target_type,
            target,
            type_path,
            annotation: Annotation::parse(reader, constants, attribute, 0)?,
        })
    }

    fn parse_all(
        reader: &mut ByteReader<'_>,
        constants: &ConstantPool,
        attribute: &str,
    ) -> Result<Vec<TypeAnnotation>, Error> {
        let count = reader.read_u2()?;
        let mut annotations = Vec::with_capacity(count as usize);
        for _ in 0..count {
            annotations.push(TypeAnnotation::parse(reader, constants, attribute)?);
        }
        Ok(annotations)
    }
}

impl Serialize for TypeAnnotation {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.target_type.serialize(writer)?;
        match &self.target {
            TargetInfo::TypeParameter { index } | TargetInfo::FormalParameter { index } => {
                index.serialize(writer)?
            }
            TargetInfo::Supertype { index } => index.serialize(writer)?,
            TargetInfo::TypeParameterBound {
                type_parameter,
                bound,
            } => {
                type_parameter.serialize(writer)?;
                bound.serialize(writer)?;
            }
            TargetInfo::Empty => (),
            TargetInfo::Throws { type_index } => type_index.serialize(writer)?,
            TargetInfo::LocalVariable(table) => table.serialize(writer)?,
            TargetInfo::Catch {
                exception_table_index,
            } => exception_table_index.serialize(writer)?,
            TargetInfo::Offset(offset) => offset.serialize(writer)?,
            TargetInfo::TypeArgument {
                offset,
                type_argument,
            } => {
                offset.serialize(writer)?;
                type_argument.serialize(writer)?;
            }
        }

        // Path length is 1 byte
        (self.type_path.len() as u8).serialize(writer)?;
        for entry in &self.type_path {
            entry.kind.serialize(writer)?;
            entry.type_argument.serialize(writer)?;
        }
        self.annotation.serialize(writer)?;
        Ok(())
    }
}

impl Serialize for LocalVariableTarget {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.start_pc.serialize(writer)?;
        self.length.serialize(writer)?;
        self.index.serialize(writer)?;
        Ok(())
    }
}

macro_rules! annotations_attributes {
    ($($name:ident),*) => {
        $(
            /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.16
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name(pub Vec<Annotation>);

            impl AttributeLike for $name {
                const NAME: &'static str = stringify!($name);
                const LOCATIONS: &'static [AttributeLocation] = &[
                    AttributeLocation::Class,
                    AttributeLocation::Field,
                    AttributeLocation::Method,
                    AttributeLocation::RecordComponent,
                ];

                fn parse(
                    reader: &mut ByteReader<'_>,
                    constants: &ConstantPool,
                ) -> Result<Self, Error> {
                    Ok($name(Annotation::parse_all(reader, constants, Self::NAME)?))
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

annotations_attributes!(RuntimeVisibleAnnotations, RuntimeInvisibleAnnotations);

macro_rules! parameter_annotations_attributes {
    ($($name:ident),*) => {
        $(
            /// Annotations on each formal parameter, in order
            ///
            /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.18
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name(pub Vec<Vec<Annotation>>);

            impl AttributeLike for $name {
                const NAME: &'static str = stringify!($name);
                const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Method];

                fn parse(
                    reader: &mut ByteReader<'_>,
                    constants: &ConstantPool,
                ) -> Result<Self, Error> {
                    let count = reader.read_u1()?;
                    let mut parameters = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        parameters.push(Annotation::parse_all(reader, constants, Self::NAME)?);
                    }
                    Ok($name(parameters))
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    // Parameter count is 1 byte
                    (self.0.len() as u8).serialize(writer)?;
                    for annotations in &self.0 {
                        annotations.serialize(writer)?;
                    }
                    Ok(())
                }
            }
        )*
    };
}

parameter_annotations_attributes!(
    RuntimeVisibleParameterAnnotations,
    RuntimeInvisibleParameterAnnotations
);

macro_rules! type_annotations_attributes {
    ($($name:ident),*) => {
        $(
            /// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.20
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $name(pub Vec<TypeAnnotation>);

            impl AttributeLike for $name {
                const NAME: &'static str = stringify!($name);
                const LOCATIONS: &'static [AttributeLocation] = &[
                    AttributeLocation::Class,
                    AttributeLocation::Field,
                    AttributeLocation::Method,
                    AttributeLocation::Code,
                    AttributeLocation::RecordComponent,
                ];

                fn parse(
                    reader: &mut ByteReader<'_>,
                    constants: &ConstantPool,
                ) -> Result<Self, Error> {
                    Ok($name(TypeAnnotation::parse_all(reader, constants, Self::NAME)?))
                }
            }

            impl Serialize for $name {
                fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
                    self.0.serialize(writer)
                }
            }
        )*
    };
}

type_annotations_attributes!(RuntimeVisibleTypeAnnotations, RuntimeInvisibleTypeAnnotations);

/// Default value of an annotation interface element
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.7.22
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationDefault(pub ElementValue);

impl AttributeLike for AnnotationDefault {
    const NAME: &'static str = "AnnotationDefault";
    const LOCATIONS: &'static [AttributeLocation] = &[AttributeLocation::Method];

    fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Self, Error> {
        Ok(AnnotationDefault(ElementValue::parse(
            reader,
            constants,
            Self::NAME,
            0,
        )?))
    }
}

impl Serialize for AnnotationDefault {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.0.serialize(writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{Attribute, AttributeData, ConstantPoolBuilder};
    use crate::jvm::{ClassFormatError, ClassFormatErrorKind};

    fn parse_attribute(
        name: Utf8ConstantIndex,
        contents: &[u8],
        constants: &ConstantPool,
        location: AttributeLocation,
    ) -> Result<Attribute, Error> {
        let mut bytes = name.to_bytes().unwrap();
        bytes.extend((contents.len() as u32).to_be_bytes());
        bytes.extend(contents);
        Attribute::parse(&mut ByteReader::new(&bytes), constants, location)
    }

    #[test]
    fn annotation_elements() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("RuntimeVisibleAnnotations").unwrap();
        let deprecated = builder.get_utf8("Ljava/lang/Deprecated;").unwrap();
        let since = builder.get_utf8("since").unwrap();
        let version = builder.get_utf8("9").unwrap();
        let for_removal = builder.get_utf8("forRemoval").unwrap();
        let yes = builder.get_integer(1).unwrap();
        let constants = builder.build();

        let annotation = Annotation {
            type_index: deprecated,
            elements: vec![
                ElementValuePair {
                    name: since,
                    value: ElementValue::Constant {
                        tag: b's',
                        value: version.0,
                    },
                },
                ElementValuePair {
                    name: for_removal,
                    value: ElementValue::Array(vec![ElementValue::Constant {
                        tag: b'Z',
                        value: yes,
                    }]),
                },
            ],
        };
        let attribute = Attribute {
            name_index: name,
            data: AttributeData::RuntimeVisibleAnnotations(RuntimeVisibleAnnotations(vec![
                annotation,
            ])),
        };

        let bytes = attribute.to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes);
        let parsed = Attribute::parse(&mut reader, &constants, AttributeLocation::Method).unwrap();
        assert!(reader.is_empty());
        assert_eq!(parsed, attribute);
    }

    #[test]
    fn element_constant_kinds() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("AnnotationDefault").unwrap();
        let text = builder.get_utf8("text").unwrap();
        let constants = builder.build();

        // `I` needs an integer constant, not a UTF-8 one
        let contents = [b'I', 0, text.0 .0 as u8];
        assert!(matches!(
            parse_attribute(name, &contents, &constants, AttributeLocation::Method),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::WrongConstantKind {
                    expected: ConstantKind::Integer,
                    found: ConstantKind::Utf8,
                    ..
                },
                ..
            }))
        ));

        let contents = [b'I', 0, 0];
        assert!(matches!(
            parse_attribute(name, &contents, &constants, AttributeLocation::Method),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0, .. },
                ..
            }))
        ));

        let contents = [b'x', 0, 0];
        assert!(matches!(
            parse_attribute(name, &contents, &constants, AttributeLocation::Method),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::MalformedAttribute { .. },
                ..
            }))
        ));
    }

    #[test]
    fn deeply_nested_arrays() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("AnnotationDefault").unwrap();
        let constants = builder.build();

        let mut contents = vec![];
        for _ in 0..MAX_NESTING + 1 {
            contents.extend([b'[', 0, 1]);
        }
        contents.extend([b'[', 0, 0]);
        assert!(matches!(
            parse_attribute(name, &contents, &constants, AttributeLocation::Method),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::MalformedAttribute { .. },
                ..
            }))
        ));
    }

    #[test]
    fn type_annotation_targets() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("RuntimeInvisibleTypeAnnotations").unwrap();
        let non_null = builder.get_utf8("LNonNull;").unwrap();
        let constants = builder.build();

        let annotations = vec![
            TypeAnnotation {
                target_type: 0x40,
                target: TargetInfo::LocalVariable(vec![LocalVariableTarget {
                    start_pc: 2,
                    length: 7,
                    index: 1,
                }]),
                type_path: vec![TypePathEntry {
                    kind: 3,
                    type_argument: 0,
                }],
                annotation: Annotation {
                    type_index: non_null,
                    elements: vec![],
                },
            },
            TypeAnnotation {
                target_type: 0x14,
                target: TargetInfo::Empty,
                type_path: vec![],
                annotation: Annotation {
                    type_index: non_null,
                    elements: vec![],
                },
            },
        ];
        let attribute = Attribute {
            name_index: name,
            data: AttributeData::RuntimeInvisibleTypeAnnotations(
                RuntimeInvisibleTypeAnnotations(annotations),
            ),
        };

        let bytes = attribute.to_bytes().unwrap();
        let mut reader = ByteReader::new(&bytes);
        let parsed = Attribute::parse(&mut reader, &constants, AttributeLocation::Code).unwrap();
        assert_eq!(parsed, attribute);

        // Unknown target type
        assert!(matches!(
            parse_attribute(name, &[0, 1, 0x30, 0], &constants, AttributeLocation::Field),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::MalformedAttribute { .. },
                ..
            }))
        ));
    }

    #[test]
    fn parameter_annotations() {
        let mut builder = ConstantPoolBuilder::new();
        let name = builder.get_utf8("RuntimeVisibleParameterAnnotations").unwrap();
        let constants = builder.build();

        // Two parameters, the second with an annotation whose type index is out of range
        let contents = [2, 0, 0, 0, 1, 0xff, 0xf0, 0, 0];
        assert!(matches!(
            parse_attribute(name, &contents, &constants, AttributeLocation::Method),
            Err(Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::InvalidConstantPoolIndex { index: 0xfff0, .. },
                ..
            }))
        ));

        let parsed =
            parse_attribute(name, &[2, 0, 0, 0, 0], &constants, AttributeLocation::Method);
        assert_eq!(
            parsed.unwrap().data,
            AttributeData::RuntimeVisibleParameterAnnotations(
                RuntimeVisibleParameterAnnotations(vec![vec![], vec![]])
            )
        );
    }
}
