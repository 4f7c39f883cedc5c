use super::{
    parse_attributes, Attribute, AttributeData, AttributeLocation, ByteReader, Code, ConstantPool,
    Deserialize, Serialize, Utf8ConstantIndex,
};
use crate::jvm::{Error, MethodAccessFlags};
use byteorder::WriteBytesExt;

/// Method declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.6
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: MethodAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Method {
    pub fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Method, Error> {
        let access_flags = MethodAccessFlags::deserialize(reader)?;
        let name_index = Utf8ConstantIndex::deserialize(reader)?;
        constants.get_utf8(name_index)?;
        let descriptor_index = Utf8ConstantIndex::deserialize(reader)?;
        constants.get_utf8(descriptor_index)?;
        let attributes = parse_attributes(reader, constants, AttributeLocation::Method)?;
        Ok(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        })
    }

    pub fn name<'a>(&self, constants: &'a ConstantPool) -> Result<&'a str, Error> {
        constants.get_utf8(self.name_index)
    }

    pub fn descriptor<'a>(&self, constants: &'a ConstantPool) -> Result<&'a str, Error> {
        constants.get_utf8(self.descriptor_index)
    }

    /// Bytecode of the method (absent for `abstract` and `native` methods)
    pub fn code(&self) -> Option<&Code> {
        self.attributes.iter().find_map(|attr| match &attr.data {
            AttributeData::Code(code) => Some(code),
            _ => None,
        })
    }
}

impl Serialize for Method {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
