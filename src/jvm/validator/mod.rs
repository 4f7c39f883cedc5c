//! Structural checks on a parsed class file
//!
//! Parsing only guarantees that a class file is well formed: every constant pool reference
//! points to a constant of the right kind and every attribute has the right shape. This module
//! checks the rest of the format rules that don't need any other class, most importantly which
//! combinations of access flags are legal (see [`rules`]), which names and descriptors are
//! legal, and that `module-info` classes only describe modules.

pub mod rules;

use crate::jvm::class_file::{ClassFile, Constant, ConstantKind, Field, Method, Version};
use crate::jvm::descriptors::ParseDescriptor;
use crate::jvm::{
    BaseType, BinaryName, ClassAccessFlags, ClassFormatError, ClassFormatErrorKind, Entity, Error,
    FieldAccessFlags, FieldType, HeaderDiagnostic, MethodAccessFlags, MethodDescriptor, Name,
    RefType, UnqualifiedName,
};
use rules::*;
use std::collections::HashSet;

/// Longest legal code array
const MAX_CODE_LENGTH: usize = 65535;

/// Most parameter slots a method can take (including `this`)
const MAX_PARAMETER_SLOTS: usize = 255;

/// Check the structural rules of a class file
///
/// `module_info_floor` is the first version to understand `module-info` classes. Older module
/// descriptors are rejected with a [`HeaderDiagnostic::AnachronisticModuleInfo`] as the cause.
pub fn validate_class(class: &ClassFile, module_info_floor: Version) -> Result<(), Error> {
    let name = class.name()?;
    let result = if class.is_module_info() {
        validate_module_info(class, name, module_info_floor)
    } else {
        validate_ordinary_class(class, name)
    };
    result.map_err(|err| err.in_class(name))?;
    log::debug!("Validated structure of {} (version {})", name, class.version);
    Ok(())
}

fn validate_module_info(
    class: &ClassFile,
    name: &str,
    module_info_floor: Version,
) -> Result<(), Error> {
    let bad_module_info = |reason: &str| -> Error {
        ClassFormatErrorKind::BadModuleInfo {
            reason: reason.to_owned(),
        }
        .into()
    };

    if class.version < module_info_floor {
        let diagnostic = HeaderDiagnostic::AnachronisticModuleInfo {
            major: class.version.major_version,
            minor: class.version.minor_version,
        };
        log::debug!("Rejecting {}: {}", name, diagnostic);
        let reason = format!(
            "module descriptors need class file version {} or later",
            module_info_floor
        );
        return Err(ClassFormatError::new(ClassFormatErrorKind::BadModuleInfo { reason })
            .caused_by(ClassFormatErrorKind::BadClassFileHeader(diagnostic).into())
            .into());
    }

    if name != BinaryName::MODULE_INFO.as_str() {
        return Err(bad_module_info("ACC_MODULE is set on a class that is not module-info"));
    }
    if class.access_flags != ClassAccessFlags::MODULE {
        return Err(bad_module_info("ACC_MODULE must be the only access flag"));
    }
    if class.super_class.is_some() {
        return Err(bad_module_info("module-info has a superclass"));
    }
    if !class.interfaces.is_empty() {
        return Err(bad_module_info("module-info implements interfaces"));
    }
    if !class.fields.is_empty() || !class.methods.is_empty() {
        return Err(bad_module_info("module-info declares fields or methods"));
    }
    validate_bootstrap_indices(class)
}

fn validate_ordinary_class(class: &ClassFile, name: &str) -> Result<(), Error> {
    let major = class.version.major_version;

    // `CONSTANT_Module` and `CONSTANT_Package` belong to module descriptors
    for (index, constant) in class.constants.iter() {
        if matches!(constant.kind(), ConstantKind::Module | ConstantKind::Package) {
            return Err(ClassFormatErrorKind::UnsupportedConstantTag {
                index: index.0,
                tag: constant.kind().tag(),
                version: class.version,
            }
            .into());
        }
    }

    // Interfaces from before 1.6 are implicitly abstract
    let is_interface = class.is_interface();
    let mut class_flags = class.access_flags;
    if is_interface && class.version < Version::JAVA6 {
        class_flags |= ClassAccessFlags::ABSTRACT;
    }
    let class_rules = if is_interface {
        INTERFACE_RULES
    } else {
        CLASS_RULES
    };
    if !bracket(class_rules, major).allows(class_flags) {
        return Err(illegal_modifiers(Entity::Class, name, name, class.access_flags.bits()));
    }

    validate_class_name(name, "class")?;
    match class.super_name()? {
        None if name != BinaryName::OBJECT.as_str() => {
            return Err(invalid_superclass(format!("{} has no superclass", name)))
        }
        None => (),
        Some(_) if name == BinaryName::OBJECT.as_str() => {
            return Err(invalid_superclass(format!("{} must not have a superclass", name)))
        }
        Some(super_name) => {
            validate_class_name(super_name, "superclass")?;
            if is_interface && super_name != BinaryName::OBJECT.as_str() {
                return Err(invalid_superclass(format!(
                    "interfaces must extend {}, not {}",
                    BinaryName::OBJECT,
                    super_name
                )));
            }
        }
    }
    for interface in class.interface_names()? {
        validate_class_name(interface, "interface")?;
    }

    let mut seen_fields = HashSet::new();
    for field in &class.fields {
        validate_field(class, name, field, is_interface, &mut seen_fields)?;
    }

    let mut seen_methods = HashSet::new();
    for method in &class.methods {
        validate_method(class, name, method, is_interface, &mut seen_methods)?;
    }

    validate_bootstrap_indices(class)
}

fn validate_field<'a>(
    class: &'a ClassFile,
    owner: &str,
    field: &Field,
    is_interface: bool,
    seen: &mut HashSet<(&'a str, &'a str)>,
) -> Result<(), Error> {
    let name = field.name(&class.constants)?;
    let descriptor = field.descriptor(&class.constants)?;

    if UnqualifiedName::check_valid(name).is_err() {
        return Err(illegal_name("field", name));
    }
    let field_type = FieldType::<BinaryName>::parse(descriptor).map_err(|reason| {
        log::debug!("Bad descriptor on field {}: {}", name, reason);
        illegal_descriptor("field", descriptor)
    })?;

    let field_rules = if is_interface {
        INTERFACE_FIELD_RULES
    } else {
        CLASS_FIELD_RULES
    };
    if !bracket(field_rules, class.version.major_version).allows(field.access_flags) {
        return Err(illegal_modifiers(Entity::Field, name, owner, field.access_flags.bits()));
    }

    if !seen.insert((name, descriptor)) {
        return Err(ClassFormatErrorKind::DuplicateMember {
            entity: Entity::Field,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
        .into());
    }

    // Initial values are ignored on instance fields
    if let Some(constant_value) = field.constant_value() {
        if field.access_flags.contains(FieldAccessFlags::STATIC) {
            let constant = class.constants.get(constant_value.0)?;
            if !constant_value_matches(&field_type, constant) {
                return Err(ClassFormatErrorKind::BadConstantValue {
                    field: name.to_owned(),
                    reason: format!(
                        "{} constant cannot initialize a field of type {}",
                        constant.kind(),
                        descriptor
                    ),
                }
                .into());
            }
        }
    }

    Ok(())
}

fn constant_value_matches(field_type: &FieldType<BinaryName>, constant: &Constant) -> bool {
    match (field_type, constant) {
        (
            FieldType::Base(
                BaseType::Int
                | BaseType::Short
                | BaseType::Char
                | BaseType::Byte
                | BaseType::Boolean,
            ),
            Constant::Integer(_),
        ) => true,
        (FieldType::Base(BaseType::Long), Constant::Long(_)) => true,
        (FieldType::Base(BaseType::Float), Constant::Float(_)) => true,
        (FieldType::Base(BaseType::Double), Constant::Double(_)) => true,
        (FieldType::Ref(RefType::Object(class)), Constant::String(_)) => {
            class == &BinaryName::STRING
        }
        _ => false,
    }
}

fn validate_method<'a>(
    class: &'a ClassFile,
    owner: &str,
    method: &Method,
    is_interface: bool,
    seen: &mut HashSet<(&'a str, &'a str)>,
) -> Result<(), Error> {
    let name = method.name(&class.constants)?;
    let descriptor = method.descriptor(&class.constants)?;
    let major = class.version.major_version;
    let flags = method.access_flags;
    let is_init = name == UnqualifiedName::INIT.as_str();
    let is_clinit = name == UnqualifiedName::CLINIT.as_str();

    if UnqualifiedName::check_valid_method_name(name).is_err() || (is_init && is_interface) {
        return Err(illegal_name("method", name));
    }
    let parsed = MethodDescriptor::<BinaryName>::parse(descriptor).map_err(|reason| {
        log::debug!("Bad descriptor on method {}: {}", name, reason);
        illegal_descriptor("method", descriptor)
    })?;
    let is_static = flags.contains(MethodAccessFlags::STATIC);
    if parsed.parameter_length(!is_static) > MAX_PARAMETER_SLOTS
        || ((is_init || is_clinit) && parsed.return_type.is_some())
        || (is_clinit && !parsed.parameters.is_empty())
    {
        return Err(illegal_descriptor("method", descriptor));
    }

    // Other flags on class initializers are ignored, and before 51 so is `ACC_STATIC`
    let flags_ok = if is_clinit {
        major < Version::JAVA7.major_version || is_static
    } else {
        let method_rules = if is_interface {
            INTERFACE_METHOD_RULES
        } else {
            CLASS_METHOD_RULES
        };
        bracket(method_rules, major).allows(flags)
            && (!is_init || bracket(INIT_METHOD_RULES, major).allows(flags))
    };
    if !flags_ok {
        return Err(illegal_modifiers(Entity::Method, name, owner, flags.bits()));
    }

    if !seen.insert((name, descriptor)) {
        return Err(ClassFormatErrorKind::DuplicateMember {
            entity: Entity::Method,
            name: name.to_owned(),
            descriptor: descriptor.to_owned(),
        }
        .into());
    }

    let has_body = !flags.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE);
    match (method.code(), has_body) {
        (None, true) => {
            return Err(ClassFormatErrorKind::MissingCode {
                method: name.to_owned(),
            }
            .into())
        }
        (Some(_), false) => {
            return Err(ClassFormatErrorKind::UnexpectedCode {
                method: name.to_owned(),
            }
            .into())
        }
        (Some(code), true) => {
            let length = code.code_array.0.len();
            if length == 0 || length > MAX_CODE_LENGTH {
                return Err(ClassFormatErrorKind::InvalidCodeLength {
                    method: name.to_owned(),
                    length,
                }
                .into());
            }
        }
        (None, false) => (),
    }

    Ok(())
}

/// Every dynamic constant must name an entry of the `BootstrapMethods` attribute
fn validate_bootstrap_indices(class: &ClassFile) -> Result<(), Error> {
    let table_length = class
        .bootstrap_methods()
        .map_or(0, |bootstrap_methods| bootstrap_methods.0.len());
    for (index, constant) in class.constants.iter() {
        let bootstrap_method = match constant {
            Constant::Dynamic {
                bootstrap_method, ..
            }
            | Constant::InvokeDynamic {
                bootstrap_method, ..
            } => *bootstrap_method,
            _ => continue,
        };
        if bootstrap_method as usize >= table_length {
            return Err(ClassFormatErrorKind::MalformedAttribute {
                name: String::from("BootstrapMethods"),
                reason: format!(
                    "constant {} refers to bootstrap method {} but there are only {}",
                    index, bootstrap_method, table_length
                ),
            }
            .into());
        }
    }
    Ok(())
}

/// Class names here must be binary names (array classes cannot be declared or extended)
fn validate_class_name(name: &str, what: &'static str) -> Result<(), Error> {
    match BinaryName::check_valid(name) {
        Ok(()) => Ok(()),
        Err(reason) => {
            log::debug!("Illegal {} name {:?}: {}", what, name, reason);
            Err(illegal_name(what, name))
        }
    }
}

fn illegal_name(what: &'static str, name: &str) -> Error {
    ClassFormatErrorKind::IllegalName {
        what,
        name: name.to_owned(),
    }
    .into()
}

fn illegal_descriptor(what: &'static str, descriptor: &str) -> Error {
    ClassFormatErrorKind::IllegalDescriptor {
        what,
        descriptor: descriptor.to_owned(),
    }
    .into()
}

fn illegal_modifiers(entity: Entity, name: &str, owner: &str, flags: u16) -> Error {
    ClassFormatErrorKind::IllegalModifiers {
        entity,
        name: name.to_owned(),
        owner: owner.to_owned(),
        flags,
    }
    .into()
}

fn invalid_superclass(reason: String) -> Error {
    ClassFormatErrorKind::InvalidSuperclass { reason }.into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{
        Attribute, AttributeData, BytecodeArray, Code, ConstantPoolBuilder, ConstantValue,
    };

    const FLOOR: Version = Version::JAVA9;

    /// Members are described by `(flags, name, descriptor)`, and methods get a `return` body
    /// unless they are abstract or native
    fn make_class(
        version: Version,
        name: &str,
        access_flags: ClassAccessFlags,
        fields: &[(FieldAccessFlags, &str, &str)],
        methods: &[(MethodAccessFlags, &str, &str)],
    ) -> ClassFile {
        let mut constants = ConstantPoolBuilder::new();
        let this_class = constants.get_class(name).unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let code_name = constants.get_utf8("Code").unwrap();

        let fields = fields
            .iter()
            .map(|(flags, name, descriptor)| Field {
                access_flags: *flags,
                name_index: constants.get_utf8(*name).unwrap(),
                descriptor_index: constants.get_utf8(*descriptor).unwrap(),
                attributes: vec![],
            })
            .collect();
        let methods = methods
            .iter()
            .map(|(flags, name, descriptor)| {
                let mut attributes = vec![];
                if !flags.intersects(MethodAccessFlags::ABSTRACT | MethodAccessFlags::NATIVE) {
                    attributes.push(Attribute {
                        name_index: code_name,
                        data: AttributeData::Code(Code {
                            max_stack: 0,
                            max_locals: 1,
                            code_array: BytecodeArray(vec![0xb1]),
                            exception_table: vec![],
                            attributes: vec![],
                        }),
                    });
                }
                Method {
                    access_flags: *flags,
                    name_index: constants.get_utf8(*name).unwrap(),
                    descriptor_index: constants.get_utf8(*descriptor).unwrap(),
                    attributes,
                }
            })
            .collect();

        ClassFile {
            version,
            constants: constants.build(),
            access_flags,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields,
            methods,
            attributes: vec![],
        }
    }

    fn simple_class(version: Version, methods: &[(MethodAccessFlags, &str, &str)]) -> ClassFile {
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER | ClassAccessFlags::ABSTRACT;
        make_class(version, "Test", flags, &[], methods)
    }

    fn format_kind(result: Result<(), Error>) -> ClassFormatErrorKind {
        match result {
            Err(Error::ClassFormat(ClassFormatError { kind, .. })) => kind,
            other => panic!("Expected a class format error, got {:?}", other),
        }
    }

    #[test]
    fn abstract_strict_depends_on_version() {
        let flags =
            MethodAccessFlags::PUBLIC | MethodAccessFlags::ABSTRACT | MethodAccessFlags::STRICT;
        let methods = [(flags, "run", "()V")];

        let err = validate_class(&simple_class(Version::new(60, 0), &methods), FLOOR).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("has illegal modifiers"), "{}", message);
        assert!(message.contains("Method run in class Test"), "{}", message);

        validate_class(&simple_class(Version::JAVA17, &methods), FLOOR).unwrap();
    }

    #[test]
    fn initializers() {
        let public = MethodAccessFlags::PUBLIC;
        validate_class(&simple_class(Version::JAVA8, &[(public, "<init>", "()V")]), FLOOR).unwrap();

        assert!(matches!(
            format_kind(validate_class(
                &simple_class(Version::JAVA8, &[(public, "<init>", "()I")]),
                FLOOR
            )),
            ClassFormatErrorKind::IllegalDescriptor { what: "method", .. }
        ));
        assert!(matches!(
            format_kind(validate_class(
                &simple_class(
                    Version::JAVA8,
                    &[(public | MethodAccessFlags::STATIC, "<init>", "()V")]
                ),
                FLOOR
            )),
            ClassFormatErrorKind::IllegalModifiers { entity: Entity::Method, .. }
        ));

        // `<clinit>` has to be static from 51 on
        let clinit = [(MethodAccessFlags::empty(), "<clinit>", "()V")];
        validate_class(&simple_class(Version::JAVA6, &clinit), FLOOR).unwrap();
        assert!(validate_class(&simple_class(Version::JAVA7, &clinit), FLOOR).is_err());
    }

    #[test]
    fn names_and_descriptors() {
        let public = MethodAccessFlags::PUBLIC;
        assert!(matches!(
            format_kind(validate_class(
                &simple_class(Version::JAVA8, &[(public, "a<b", "()V")]),
                FLOOR
            )),
            ClassFormatErrorKind::IllegalName { what: "method", .. }
        ));
        assert!(matches!(
            format_kind(validate_class(
                &simple_class(Version::JAVA8, &[(public, "run", "(V)V")]),
                FLOOR
            )),
            ClassFormatErrorKind::IllegalDescriptor { what: "method", .. }
        ));

        // 255 slots is the limit, counting `this`
        let longs: String = std::iter::repeat("J").take(127).collect();
        let fits = format!("({})V", longs);
        let too_many = format!("({}I)V", longs);
        let static_method = public | MethodAccessFlags::STATIC;
        validate_class(&simple_class(Version::JAVA8, &[(public, "run", &fits)]), FLOOR).unwrap();
        validate_class(&simple_class(Version::JAVA8, &[(static_method, "run", &too_many)]), FLOOR)
            .unwrap();
        assert!(
            validate_class(&simple_class(Version::JAVA8, &[(public, "run", &too_many)]), FLOOR)
                .is_err()
        );
    }

    #[test]
    fn duplicate_members() {
        let public = MethodAccessFlags::PUBLIC;
        let methods = [(public, "run", "()V"), (public, "run", "()V")];
        assert!(matches!(
            format_kind(validate_class(&simple_class(Version::JAVA8, &methods), FLOOR)),
            ClassFormatErrorKind::DuplicateMember { entity: Entity::Method, .. }
        ));

        // Overloads are fine
        let methods = [(public, "run", "()V"), (public, "run", "(I)V")];
        validate_class(&simple_class(Version::JAVA8, &methods), FLOOR).unwrap();
    }

    #[test]
    fn code_presence() {
        let mut class = simple_class(Version::JAVA8, &[(MethodAccessFlags::PUBLIC, "run", "()V")]);
        class.methods[0].attributes.clear();
        assert!(matches!(
            format_kind(validate_class(&class, FLOOR)),
            ClassFormatErrorKind::MissingCode { .. }
        ));

        let mut class = simple_class(Version::JAVA8, &[(MethodAccessFlags::PUBLIC, "run", "()V")]);
        class.methods[0].access_flags |= MethodAccessFlags::NATIVE;
        assert!(matches!(
            format_kind(validate_class(&class, FLOOR)),
            ClassFormatErrorKind::UnexpectedCode { .. }
        ));
    }

    #[test]
    fn interface_fields() {
        let interface =
            ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE | ClassAccessFlags::ABSTRACT;
        let constant =
            FieldAccessFlags::PUBLIC | FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        let class = make_class(Version::JAVA8, "Api", interface, &[(constant, "X", "I")], &[]);
        validate_class(&class, FLOOR).unwrap();

        let public_field = [(FieldAccessFlags::PUBLIC, "X", "I")];
        let class = make_class(Version::JAVA8, "Api", interface, &public_field, &[]);
        let err = validate_class(&class, FLOOR).unwrap_err();
        assert!(err.to_string().contains("Field X in class Api has illegal modifiers"));

        // Interfaces from before 1.6 don't need to be flagged abstract
        let old_interface = ClassAccessFlags::PUBLIC | ClassAccessFlags::INTERFACE;
        validate_class(&make_class(Version::JAVA5, "Api", old_interface, &[], &[]), FLOOR).unwrap();
        let class = make_class(Version::JAVA6, "Api", old_interface, &[], &[]);
        assert!(validate_class(&class, FLOOR).is_err());
    }

    #[test]
    fn constant_values() {
        let static_final = FieldAccessFlags::STATIC | FieldAccessFlags::FINAL;
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let mut class = make_class(Version::JAVA8, "Test", flags, &[(static_final, "X", "J")], &[]);

        let mut constants = ConstantPoolBuilder::new();
        constants.get_class("Test").unwrap();
        constants.get_class("java/lang/Object").unwrap();
        constants.get_utf8("Code").unwrap();
        constants.get_utf8("X").unwrap();
        constants.get_utf8("J").unwrap();
        let integer = constants.get_integer(1).unwrap();
        let constant_value_name = constants.get_utf8("ConstantValue").unwrap();
        class.constants = constants.build();
        class.fields[0].attributes.push(Attribute {
            name_index: constant_value_name,
            data: AttributeData::ConstantValue(ConstantValue(integer)),
        });

        match format_kind(validate_class(&class, FLOOR)) {
            ClassFormatErrorKind::BadConstantValue { field, .. } => assert_eq!(field, "X"),
            other => panic!("Unexpected error {:?}", other),
        }

        // Ignored on instance fields
        class.fields[0].access_flags = FieldAccessFlags::FINAL;
        validate_class(&class, FLOOR).unwrap();
    }

    #[test]
    fn superclasses() {
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let mut class = make_class(Version::JAVA8, "Test", flags, &[], &[]);
        class.super_class = None;
        assert!(matches!(
            format_kind(validate_class(&class, FLOOR)),
            ClassFormatErrorKind::InvalidSuperclass { .. }
        ));

        let mut object = make_class(Version::JAVA8, "java/lang/Object", flags, &[], &[]);
        object.super_class = None;
        validate_class(&object, FLOOR).unwrap();
    }

    #[test]
    fn anachronistic_module_info() {
        let mut class =
            make_class(Version::JAVA8, "module-info", ClassAccessFlags::MODULE, &[], &[]);
        class.super_class = None;

        let err = validate_class(&class, FLOOR).unwrap_err();
        assert!(matches!(
            &err,
            Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::BadModuleInfo { .. },
                ..
            })
        ));
        match err.root_cause() {
            Error::ClassFormat(ClassFormatError {
                kind: ClassFormatErrorKind::BadClassFileHeader(diagnostic),
                ..
            }) => {
                assert_eq!(
                    diagnostic,
                    &HeaderDiagnostic::AnachronisticModuleInfo { major: 52, minor: 0 }
                );
                assert_eq!(diagnostic.key(), "anachronistic.module.info");
            }
            other => panic!("Unexpected root cause {:?}", other),
        }

        // Fine from 9 on, but only if it really just describes a module
        class.version = Version::JAVA9;
        validate_class(&class, FLOOR).unwrap();

        class.access_flags |= ClassAccessFlags::PUBLIC;
        assert!(validate_class(&class, FLOOR).is_err());

        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER | ClassAccessFlags::MODULE;
        let class = make_class(Version::JAVA9, "Test", flags, &[], &[]);
        assert!(matches!(
            format_kind(validate_class(&class, FLOOR)),
            ClassFormatErrorKind::BadModuleInfo { .. }
        ));
    }

    #[test]
    fn bootstrap_method_indices() {
        let flags = ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER;
        let mut class = make_class(Version::JAVA8, "Test", flags, &[], &[]);

        let mut constants = ConstantPoolBuilder::new();
        constants.get_class("Test").unwrap();
        constants.get_class("java/lang/Object").unwrap();
        constants.get_utf8("Code").unwrap();
        constants.get_invoke_dynamic(0, "run", "()Ljava/lang/Runnable;").unwrap();
        class.constants = constants.build();

        match format_kind(validate_class(&class, FLOOR)) {
            ClassFormatErrorKind::MalformedAttribute { name, .. } => {
                assert_eq!(name, "BootstrapMethods")
            }
            other => panic!("Unexpected error {:?}", other),
        }
    }
}
