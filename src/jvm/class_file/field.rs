use super::{
    parse_attributes, Attribute, AttributeData, AttributeLocation, ByteReader, ConstantPool,
    ConstantValue, Deserialize, Serialize, Utf8ConstantIndex,
};
use crate::jvm::{Error, FieldAccessFlags};
use byteorder::WriteBytesExt;

/// Field declared by a class or interface
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: FieldAccessFlags,
    pub name_index: Utf8ConstantIndex,
    pub descriptor_index: Utf8ConstantIndex,
    pub attributes: Vec<Attribute>,
}

impl Field {
    pub fn parse(reader: &mut ByteReader<'_>, constants: &ConstantPool) -> Result<Field, Error> {
        let access_flags = FieldAccessFlags::deserialize(reader)?;
        let name_index = Utf8ConstantIndex::deserialize(reader)?;
        constants.get_utf8(name_index)?;
        let descriptor_index = Utf8ConstantIndex::deserialize(reader)?;
        constants.get_utf8(descriptor_index)?;
        let attributes = parse_attributes(reader, constants, AttributeLocation::Field)?;
        Ok(Field {
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

    /// Initial value of a static field, if there is one
    pub fn constant_value(&self) -> Option<&ConstantValue> {
        self.attributes.iter().find_map(|attr| match &attr.data {
            AttributeData::ConstantValue(value) => Some(value),
            _ => None,
        })
    }
}

impl Serialize for Field {
    fn serialize<W: WriteBytesExt>(&self, writer: &mut W) -> std::io::Result<()> {
        self.access_flags.serialize(writer)?;
        self.name_index.serialize(writer)?;
        self.descriptor_index.serialize(writer)?;
        self.attributes.serialize(writer)?;
        Ok(())
    }
}
