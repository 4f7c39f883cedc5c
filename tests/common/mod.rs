use classload::jvm::class_file::*;
use classload::jvm::{ClassAccessFlags, MethodAccessFlags};

/// Body of a method: `(max_stack, max_locals, code)`
pub type Body = (u16, u16, Vec<u8>);

/// Class under construction, with its constant pool still open for new entries
pub struct TestClass {
    pub version: Version,
    pub constants: ConstantPoolBuilder,
    pub access_flags: ClassAccessFlags,
    pub this_class: ClassConstantIndex,
    pub super_class: Option<ClassConstantIndex>,
    pub methods: Vec<Method>,
    pub attributes: Vec<Attribute>,
}

impl TestClass {
    pub fn new(version: Version, name: &str, super_name: Option<&str>) -> TestClass {
        let mut constants = ConstantPoolBuilder::new();
        let this_class = constants.get_class(name).unwrap();
        let super_class = super_name.map(|super_name| constants.get_class(super_name).unwrap());
        TestClass {
            version,
            constants,
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class,
            methods: vec![],
            attributes: vec![],
        }
    }

    pub fn add_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        body: Option<Body>,
    ) {
        let name_index = self.constants.get_utf8(name).unwrap();
        let descriptor_index = self.constants.get_utf8(descriptor).unwrap();
        let mut attributes = vec![];
        if let Some((max_stack, max_locals, code)) = body {
            attributes.push(Attribute {
                name_index: self.constants.get_utf8("Code").unwrap(),
                data: AttributeData::Code(Code {
                    max_stack,
                    max_locals,
                    code_array: BytecodeArray(code),
                    exception_table: vec![],
                    attributes: vec![],
                }),
            });
        }
        self.methods.push(Method {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }

    /// Constructor calling `<init>()V` on `target`
    pub fn add_constructor(&mut self, target: &str) {
        let init = self
            .constants
            .get_method_ref(target, "<init>", "()V", false)
            .unwrap();
        let [hi, lo] = init.0 .0.to_be_bytes();
        let code = vec![0x2a, 0xb7, hi, lo, 0xb1];
        self.add_method(MethodAccessFlags::PUBLIC, "<init>", "()V", Some((1, 1, code)));
    }

    /// Code of the most recently added method
    pub fn last_code(&mut self) -> &mut Code {
        let method = self.methods.last_mut().expect("no methods added yet");
        method
            .attributes
            .iter_mut()
            .find_map(|attribute| match &mut attribute.data {
                AttributeData::Code(code) => Some(code),
                _ => None,
            })
            .expect("last method has no code")
    }

    /// Attribute written out exactly as given, to be decoded when the class is parsed
    pub fn raw_attribute(&mut self, name: &str, contents: Vec<u8>) -> Attribute {
        Attribute {
            name_index: self.constants.get_utf8(name).unwrap(),
            data: AttributeData::Raw(contents),
        }
    }

    pub fn build(self) -> ClassFile {
        ClassFile {
            version: self.version,
            constants: self.constants.build(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: vec![],
            fields: vec![],
            methods: self.methods,
            attributes: self.attributes,
        }
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.build().to_bytes().unwrap()
    }
}

/// Hand-assembled class with only a `this_class` and no members
///
/// The pool holds `#1 = Utf8 Test` and `#2 = Class #class_name_index`.
pub fn raw_class(class_name_index: u16, this_class: u16) -> Vec<u8> {
    let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34];
    bytes.extend_from_slice(&[0x00, 0x03]);
    bytes.extend_from_slice(&[0x01, 0x00, 0x04, b'T', b'e', b's', b't']);
    bytes.push(0x07);
    bytes.extend_from_slice(&class_name_index.to_be_bytes());
    bytes.extend_from_slice(&[0x00, 0x21]);
    bytes.extend_from_slice(&this_class.to_be_bytes());
    // super_class, interfaces, fields, methods, attributes
    bytes.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    bytes
}
