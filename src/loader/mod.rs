//! Loading and linking classes
//!
//! Defining a class goes through two phases:
//!
//!   1. **Load** ([`load`]): decode the class file and check its structure. Nothing outside of
//!      the bytes is consulted, so a class whose superclass is missing still loads.
//!
//!   2. **Link** ([`link`]): resolve the superclass and interfaces against a
//!      [`ClassHierarchy`], then run the bytecode verifier over every method.
//!
//! A [`ClassLoader`] runs these phases and records the classes it defines, which then become
//! part of the hierarchy that later classes link against.

mod settings;

pub use settings::*;

use crate::jvm::class_file::ClassFile;
use crate::jvm::class_graph::{ClassEnvironment, ClassHierarchy, ClassSummary};
use crate::jvm::validator::validate_class;
use crate::jvm::verifier::verify_class;
use crate::jvm::{BinaryName, Error, LinkageError};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

/// How far to take a class when defining it
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Decode and check structure only
    Load,

    /// Load, then resolve supertypes and verify bytecode
    Link,
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(phase: &str) -> Result<Phase, String> {
        match phase {
            "load" => Ok(Phase::Load),
            "link" => Ok(Phase::Link),
            other => Err(format!("Unknown phase {:?} (expected `load` or `link`)", other)),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Load => "load",
            Phase::Link => "link",
        })
    }
}

/// Class which made it through the load phase
#[derive(Debug)]
pub struct LoadedClass {
    pub class_file: ClassFile,
    pub summary: Arc<ClassSummary>,
}

impl LoadedClass {
    pub fn name(&self) -> &BinaryName {
        &self.summary.name
    }
}

/// Decode a class file and check its structure
pub fn load(bytes: &[u8], settings: &Settings) -> Result<LoadedClass, Error> {
    let class_file = ClassFile::parse(bytes, settings.max_major_version, settings.enable_preview)?;
    validate_class(&class_file, settings.module_info_floor)?;
    let summary = Arc::new(ClassSummary::from_class_file(&class_file)?);
    log::debug!("Loaded {} ({} bytes)", summary.name, bytes.len());
    Ok(LoadedClass {
        class_file,
        summary,
    })
}

/// Resolve the supertypes of a loaded class, then verify it
///
/// The class itself does not need to be in `hierarchy`.
pub fn link(
    class: &LoadedClass,
    hierarchy: &dyn ClassHierarchy,
    settings: &Settings,
) -> Result<(), Error> {
    let summary = &class.summary;

    if let Some(superclass) = &summary.superclass {
        let resolved = resolve(superclass, &summary.name, hierarchy)?;
        if resolved.is_interface() {
            return Err(LinkageError::IncompatibleClassChange(format!(
                "class {} has interface {} as super class",
                summary.name, superclass
            ))
            .into());
        }
        if resolved.is_final() {
            return Err(LinkageError::IncompatibleClassChange(format!(
                "class {} cannot inherit from final class {}",
                summary.name, superclass
            ))
            .into());
        }
    }
    for interface in &summary.interfaces {
        if !resolve(interface, &summary.name, hierarchy)?.is_interface() {
            return Err(LinkageError::IncompatibleClassChange(format!(
                "class {} can not implement {}, because it is not an interface",
                summary.name, interface
            ))
            .into());
        }
    }
    check_supertypes_acyclic(summary, hierarchy)?;
    log::debug!("Resolved supertypes of {}", summary.name);

    if settings.verify {
        verify_class(&class.class_file, hierarchy)?;
    } else {
        log::debug!("Skipping verification of {}", summary.name);
    }
    Ok(())
}

fn resolve(
    name: &BinaryName,
    needed_by: &BinaryName,
    hierarchy: &dyn ClassHierarchy,
) -> Result<Arc<ClassSummary>, Error> {
    hierarchy.lookup(name).ok_or_else(|| {
        LinkageError::NoClassDefFound {
            name: name.to_string(),
            needed_by: needed_by.to_string(),
        }
        .into()
    })
}

/// Walk every supertype reachable from `class`, failing if the walk comes back to a type still
/// on the current path
fn check_supertypes_acyclic(
    class: &ClassSummary,
    hierarchy: &dyn ClassHierarchy,
) -> Result<(), Error> {
    fn supertypes(class: &ClassSummary) -> Vec<BinaryName> {
        class
            .superclass
            .iter()
            .chain(class.interfaces.iter())
            .cloned()
            .collect()
    }

    let mut finished: HashSet<BinaryName> = HashSet::new();
    let mut on_path: HashSet<BinaryName> = HashSet::new();
    let mut stack: Vec<(Arc<ClassSummary>, Vec<BinaryName>)> = vec![];

    on_path.insert(class.name.clone());
    stack.push((Arc::new(class.clone()), supertypes(class)));

    while let Some((current, pending)) = stack.last_mut() {
        match pending.pop() {
            Some(next) if on_path.contains(&next) => {
                return Err(LinkageError::ClassCircularity(class.name.to_string()).into());
            }
            Some(next) if finished.contains(&next) => (),
            Some(next) => {
                let needed_by = current.name.clone();
                let resolved = resolve(&next, &needed_by, hierarchy)?;
                on_path.insert(next);
                let next_supertypes = supertypes(&resolved);
                stack.push((resolved, next_supertypes));
            }
            None => {
                let name = current.name.clone();
                on_path.remove(&name);
                finished.insert(name);
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Namespace of defined classes
///
/// Lookups fall back to the library classes the verifier knows about, so user classes can
/// extend `java/lang/Object`, `java/lang/Exception`, and so on without defining them first.
pub struct ClassLoader {
    settings: Settings,
    library: ClassEnvironment,
    classes: RwLock<HashMap<BinaryName, Arc<LoadedClass>>>,
}

impl ClassLoader {
    pub fn new(settings: Settings) -> ClassLoader {
        ClassLoader {
            settings,
            library: ClassEnvironment::with_java_library_types(),
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run a class through `phase` and, if that succeeds, add it to the namespace
    ///
    /// No lock is held while the class is loaded and linked.
    pub fn define_class(&self, bytes: &[u8], phase: Phase) -> Result<Arc<LoadedClass>, Error> {
        let loaded = load(bytes, &self.settings)?;
        if phase == Phase::Link {
            link(&loaded, self, &self.settings)?;
        }

        let name = loaded.name().clone();
        let loaded = Arc::new(loaded);
        let mut classes = self.classes.write().unwrap_or_else(PoisonError::into_inner);
        if classes.contains_key(&name) {
            return Err(LinkageError::DuplicateClassDefinition(name.to_string()).into());
        }
        classes.insert(name.clone(), loaded.clone());
        log::debug!("Defined {} ({} phase)", name, phase);
        Ok(loaded)
    }

    /// Class previously defined in this loader
    pub fn get(&self, name: &BinaryName) -> Option<Arc<LoadedClass>> {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Number of classes defined so far
    pub fn len(&self) -> usize {
        self.classes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ClassLoader {
    fn default() -> ClassLoader {
        ClassLoader::new(Settings::default())
    }
}

impl ClassHierarchy for ClassLoader {
    fn lookup(&self, name: &BinaryName) -> Option<Arc<ClassSummary>> {
        match self.get(name) {
            Some(class) => Some(class.summary.clone()),
            None => self.library.lookup(name),
        }
    }
}
