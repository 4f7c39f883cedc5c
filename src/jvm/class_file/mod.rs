//! Binary `class` file format: decoding, encoding, and the records a class file is made of

mod annotation;
mod attribute;
mod class;
mod constants;
mod field;
mod method;
mod modified_utf8;
mod reader;
mod serialize;
mod version;

pub use annotation::*;
pub use attribute::*;
pub use class::*;
pub use constants::*;
pub use field::*;
pub use method::*;
pub use modified_utf8::*;
pub use reader::*;
pub use serialize::*;
pub use version::*;
