use super::ClassSummary;
use crate::jvm::names::BinaryName;
use crate::jvm::ClassAccessFlags;

fn class(
    name: BinaryName,
    superclass: BinaryName,
    interfaces: &[BinaryName],
    extra_flags: ClassAccessFlags,
) -> ClassSummary {
    ClassSummary {
        name,
        superclass: Some(superclass),
        interfaces: interfaces.to_vec(),
        access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER | extra_flags,
    }
}

fn interface(name: BinaryName, interfaces: &[BinaryName]) -> ClassSummary {
    ClassSummary {
        name,
        superclass: Some(BinaryName::OBJECT),
        interfaces: interfaces.to_vec(),
        access_flags: ClassAccessFlags::PUBLIC
            | ClassAccessFlags::INTERFACE
            | ClassAccessFlags::ABSTRACT,
    }
}

/// Classes from `java.*` which every class can assume exist
pub fn java_library_types() -> Vec<ClassSummary> {
    let none = ClassAccessFlags::empty();
    let serializable = [BinaryName::SERIALIZABLE];
    let number = [BinaryName::SERIALIZABLE, BinaryName::COMPARABLE];

    vec![
        ClassSummary {
            name: BinaryName::OBJECT,
            superclass: None,
            interfaces: vec![],
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
        },
        interface(BinaryName::SERIALIZABLE, &[]),
        interface(BinaryName::CLONEABLE, &[]),
        interface(BinaryName::COMPARABLE, &[]),
        interface(BinaryName::CHARSEQUENCE, &[]),
        class(BinaryName::THROWABLE, BinaryName::OBJECT, &serializable, none),
        class(BinaryName::EXCEPTION, BinaryName::THROWABLE, &[], none),
        class(BinaryName::RUNTIMEEXCEPTION, BinaryName::EXCEPTION, &[], none),
        class(BinaryName::ERROR, BinaryName::THROWABLE, &[], none),
        class(
            BinaryName::STRING,
            BinaryName::OBJECT,
            &[
                BinaryName::SERIALIZABLE,
                BinaryName::COMPARABLE,
                BinaryName::CHARSEQUENCE,
            ],
            ClassAccessFlags::FINAL,
        ),
        class(
            BinaryName::CLASS,
            BinaryName::OBJECT,
            &serializable,
            ClassAccessFlags::FINAL,
        ),
        class(
            BinaryName::NUMBER,
            BinaryName::OBJECT,
            &serializable,
            ClassAccessFlags::ABSTRACT,
        ),
        class(
            BinaryName::INTEGER,
            BinaryName::NUMBER,
            &number,
            ClassAccessFlags::FINAL,
        ),
        class(BinaryName::LONG, BinaryName::NUMBER, &number, ClassAccessFlags::FINAL),
        class(
            BinaryName::FLOAT,
            BinaryName::NUMBER,
            &number,
            ClassAccessFlags::FINAL,
        ),
        class(
            BinaryName::DOUBLE,
            BinaryName::NUMBER,
            &number,
            ClassAccessFlags::FINAL,
        ),
        class(
            BinaryName::METHODHANDLE,
            BinaryName::OBJECT,
            &[],
            ClassAccessFlags::ABSTRACT,
        ),
        class(
            BinaryName::METHODTYPE,
            BinaryName::OBJECT,
            &serializable,
            ClassAccessFlags::FINAL,
        ),
    ]
}
