use crate::jvm::class_graph::{least_upper_bound, ClassHierarchy, MissingClass};
use crate::jvm::class_graph::Assignable;
use crate::jvm::descriptors::RenderDescriptor;
use crate::jvm::names::BinaryName;
use crate::jvm::{BaseType, FieldType, RefType};
use crate::util::Width;
use std::fmt;

/// These types are from [this hierarchy][0]
///
/// [0]: https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.10.1.2
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum VerificationType<Cls, U> {
    /// Unusable slot (eg. a local that was never set, or paths disagree on its type)
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,

    /// In the constructor, the `this` parameter starts with this type then turns into an object
    /// type after `<init>` is called
    UninitializedThis,

    /// Object type
    Object(Cls),

    /// State of an object after `new` has been called but `<init>` has not been called
    ///
    /// `U` identifies the `new` instruction (its offset from the start of the method body).
    Uninitialized(U),

    /// Pushed by `jsr` for the matching `ret` (only in class files older than version 51)
    ///
    /// `U` is the offset of the subroutine's first instruction.
    ReturnAddress(U),
}

/// Verification type used while inferring frames
pub type VerifierType = VerificationType<RefType<BinaryName>, u16>;

impl<Cls, U> VerificationType<Cls, U> {
    /// Is this type is a reference type?
    pub fn is_reference(&self) -> bool {
        match self {
            VerificationType::Top
            | VerificationType::Integer
            | VerificationType::Float
            | VerificationType::Double
            | VerificationType::Long
            | VerificationType::ReturnAddress(_) => false,

            VerificationType::Null
            | VerificationType::UninitializedThis
            | VerificationType::Object(_)
            | VerificationType::Uninitialized(_) => true,
        }
    }
}

impl<C, U> From<FieldType<C>> for VerificationType<RefType<C>, U> {
    fn from(field_type: FieldType<C>) -> Self {
        match field_type {
            FieldType::Base(BaseType::Int)
            | FieldType::Base(BaseType::Char)
            | FieldType::Base(BaseType::Short)
            | FieldType::Base(BaseType::Byte)
            | FieldType::Base(BaseType::Boolean) => VerificationType::Integer,
            FieldType::Base(BaseType::Float) => VerificationType::Float,
            FieldType::Base(BaseType::Long) => VerificationType::Long,
            FieldType::Base(BaseType::Double) => VerificationType::Double,
            FieldType::Ref(ref_type) => VerificationType::Object(ref_type),
        }
    }
}

impl<Cls, A> Width for VerificationType<Cls, A> {
    fn width(&self) -> usize {
        match self {
            VerificationType::Double | VerificationType::Long => 2,
            _ => 1,
        }
    }
}

impl VerifierType {
    /// Check if one verification type is assignable to another
    pub fn is_assignable(
        sub_type: &VerifierType,
        super_type: &VerifierType,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<bool, MissingClass> {
        match (sub_type, super_type) {
            (_, VerificationType::Top) => Ok(true),
            (VerificationType::Null, VerificationType::Object(_)) => Ok(true),
            (VerificationType::Object(t1), VerificationType::Object(t2)) => {
                t1.is_assignable(t2, hierarchy)
            }
            (t1, t2) => Ok(t1 == t2),
        }
    }

    /// Least upper bound of two types, `Top` if the two have nothing useful in common
    pub fn merge(
        type1: &VerifierType,
        type2: &VerifierType,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<VerifierType, MissingClass> {
        let merged = match (type1, type2) {
            (t1, t2) if t1 == t2 => t1.clone(),
            (VerificationType::Null, obj @ VerificationType::Object(_))
            | (obj @ VerificationType::Object(_), VerificationType::Null) => obj.clone(),
            (VerificationType::Object(t1), VerificationType::Object(t2)) => {
                VerificationType::Object(least_upper_bound(hierarchy, t1, t2)?)
            }
            _ => VerificationType::Top,
        };
        Ok(merged)
    }
}

impl fmt::Display for VerifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationType::Top => f.write_str("top"),
            VerificationType::Integer => f.write_str("int"),
            VerificationType::Float => f.write_str("float"),
            VerificationType::Double => f.write_str("double"),
            VerificationType::Long => f.write_str("long"),
            VerificationType::Null => f.write_str("null"),
            VerificationType::UninitializedThis => f.write_str("uninitializedThis"),
            VerificationType::Object(RefType::Object(class)) => write!(f, "'{}'", class),
            VerificationType::Object(array) => write!(f, "'{}'", array.render()),
            VerificationType::Uninitialized(offset) => write!(f, "uninitialized({})", offset),
            VerificationType::ReturnAddress(entry) => write!(f, "returnAddress({})", entry),
        }
    }
}
