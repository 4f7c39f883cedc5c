//! Relationships between classes, as needed for linking and verification
//!
//! The verifier only ever needs to know the superclass, the interfaces, and the access flags of a
//! class in order to decide subtyping. Those are kept in a [`ClassSummary`], and anything able to
//! find summaries by name is a [`ClassHierarchy`].

use super::class_file::ClassFile;
use super::names::{BinaryName, Name};
use super::{ClassAccessFlags, Error};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

mod assignable;
mod java_classes;

pub use assignable::*;

/// Subtyping-relevant view of a class or interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSummary {
    pub name: BinaryName,

    /// Only `java/lang/Object` has no superclass
    pub superclass: Option<BinaryName>,
    pub interfaces: Vec<BinaryName>,
    pub access_flags: ClassAccessFlags,
}

impl ClassSummary {
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::FINAL)
    }

    /// Extract the summary of a parsed class
    pub fn from_class_file(class: &ClassFile) -> Result<ClassSummary, Error> {
        let to_name = |raw: &str| {
            BinaryName::from_string(raw.to_owned())
                .map_err(|reason| illegal_class_name(raw, reason))
        };
        let name = to_name(class.name()?)?;
        let superclass = match class.super_name()? {
            None => None,
            Some(superclass) => Some(to_name(superclass)?),
        };
        let interfaces = class
            .interface_names()?
            .into_iter()
            .map(to_name)
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(ClassSummary {
            name,
            superclass,
            interfaces,
            access_flags: class.access_flags,
        })
    }
}

fn illegal_class_name(name: &str, reason: String) -> Error {
    log::debug!("Rejecting class name {:?}: {}", name, reason);
    super::ClassFormatErrorKind::IllegalName {
        what: "class",
        name: name.to_owned(),
    }
    .into()
}

/// Source of class summaries
///
/// Implementations must be cheap to query repeatedly: the verifier looks up the same classes
/// many times while merging frames.
pub trait ClassHierarchy {
    /// Find a class by its binary name
    fn lookup(&self, name: &BinaryName) -> Option<Arc<ClassSummary>>;
}

/// A class missing from the hierarchy while it was needed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingClass(pub BinaryName);

impl fmt::Display for MissingClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed, in-memory set of classes
#[derive(Debug, Clone, Default)]
pub struct ClassEnvironment {
    classes: HashMap<BinaryName, Arc<ClassSummary>>,
}

impl ClassEnvironment {
    /// New empty environment
    pub fn new() -> ClassEnvironment {
        ClassEnvironment::default()
    }

    /// Environment with the library classes the verifier has built-in knowledge of
    pub fn with_java_library_types() -> ClassEnvironment {
        let mut environment = ClassEnvironment::new();
        for summary in java_classes::java_library_types() {
            environment.insert(summary);
        }
        environment
    }

    /// Add a class, replacing any previous class of the same name
    pub fn insert(&mut self, summary: ClassSummary) {
        self.classes.insert(summary.name.clone(), Arc::new(summary));
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl ClassHierarchy for ClassEnvironment {
    fn lookup(&self, name: &BinaryName) -> Option<Arc<ClassSummary>> {
        self.classes.get(name).cloned()
    }
}

/// Hierarchy extended with one extra class (eg. the class being linked)
pub struct WithClass<'a> {
    pub class: Arc<ClassSummary>,
    pub rest: &'a dyn ClassHierarchy,
}

impl<'a> ClassHierarchy for WithClass<'a> {
    fn lookup(&self, name: &BinaryName) -> Option<Arc<ClassSummary>> {
        if name == &self.class.name {
            Some(self.class.clone())
        } else {
            self.rest.lookup(name)
        }
    }
}
