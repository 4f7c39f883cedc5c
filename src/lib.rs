//! Load, validate, and verify JVM class files
//!
//! The [`jvm`] module has the class file format, the structural validator, and the bytecode
//! verifier. The [`loader`] module strings these together into the load and link phases of a
//! class loader.

pub mod jvm;
pub mod loader;
pub mod util;
