//! Load and check JVM classes
//!
//! ### Simple example
//!
//! Consider the following simple Java class:
//!
//! ```java,ignore,no_run
//! public class Hello {
//!     public Hello() {
//!         super();
//!     }
//! }
//! ```
//!
//! An analogous class file can be assembled, parsed back, and verified as follows:
//!
//! ```
//! use classload::jvm::class_file::*;
//! use classload::jvm::class_graph::ClassEnvironment;
//! use classload::jvm::verifier::verify_class;
//! use classload::jvm::*;
//!
//! # fn check_class() -> Result<(), Error> {
//! // Build the constant pool
//! let mut constants = ConstantPoolBuilder::new();
//! let this_class = constants.get_class("Hello").unwrap();
//! let super_class = constants.get_class("java/lang/Object").unwrap();
//! let object_init = constants
//!     .get_method_ref("java/lang/Object", "<init>", "()V", false)
//!     .unwrap();
//! let init = constants.get_utf8("<init>").unwrap();
//! let void = constants.get_utf8("()V").unwrap();
//! let code_name = constants.get_utf8("Code").unwrap();
//! let [hi, lo] = object_init.0 .0.to_be_bytes();
//!
//! // `aload_0; invokespecial java/lang/Object.<init>()V; return`
//! let constructor = Method {
//!     access_flags: MethodAccessFlags::PUBLIC,
//!     name_index: init,
//!     descriptor_index: void,
//!     attributes: vec![Attribute {
//!         name_index: code_name,
//!         data: AttributeData::Code(Code {
//!             max_stack: 1,
//!             max_locals: 1,
//!             code_array: BytecodeArray(vec![0x2a, 0xb7, hi, lo, 0xb1]),
//!             exception_table: vec![],
//!             attributes: vec![],
//!         }),
//!     }],
//! };
//! let class = ClassFile {
//!     version: Version::JAVA8,
//!     constants: constants.build(),
//!     access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
//!     this_class,
//!     super_class: Some(super_class),
//!     interfaces: vec![],
//!     fields: vec![],
//!     methods: vec![constructor],
//!     attributes: vec![],
//! };
//!
//! // Encode the class into bytes, then decode and verify it
//! let bytes = class.to_bytes().map_err(Error::IoError)?;
//! let parsed = ClassFile::parse(&bytes, 65, false)?;
//! verify_class(&parsed, &ClassEnvironment::with_java_library_types())?;
//! # Ok(())
//! # }
//! # check_class().unwrap();
//! ```

mod access_flags;
pub mod bytecode;
pub mod class_file;
pub mod class_graph;
mod descriptors;
mod errors;
mod names;
pub mod validator;
pub mod verifier;

pub use access_flags::*;
pub use descriptors::*;
pub use errors::*;
pub use names::*;
