use std::borrow::Cow;
use std::fmt::{Debug, Display, Error as FmtError, Formatter};

/// Names of methods, fields
///
/// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.2>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct UnqualifiedName(Cow<'static, str>);

/// Names of classes and interfaces
///
/// See <https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.2.1>
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BinaryName(Cow<'static, str>);

/// Extracts the raw underlying string name
impl AsRef<str> for UnqualifiedName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Extracts the raw underlying string name
impl AsRef<str> for BinaryName {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

pub trait Name: Sized {
    /// Check if a string would be a valid name
    fn check_valid(name: impl AsRef<str>) -> Result<(), String>;

    /// Extact the raw underlying string data:
    fn as_cow(&self) -> &Cow<'static, str>;

    /// Extact the raw underlying string name
    fn as_str(&self) -> &str {
        self.as_cow().as_ref()
    }

    /// Try to construct a name from a string
    fn from_string(name: String) -> Result<Self, String>;
}

impl Name for UnqualifiedName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.contains(&['.', ';', '[', '/'][..]) {
            Err(format!(
                "Unqualified name '{}' contains an illegal character",
                name
            ))
        } else if name.is_empty() {
            Err(format!("Unqualified name '{}' is empty", name))
        } else {
            Ok(())
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(UnqualifiedName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Name for BinaryName {
    fn check_valid(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        if name.is_empty() {
            Err(format!("Binary name '{}' is empty", name))
        } else {
            name.split('/').map(UnqualifiedName::check_valid).collect()
        }
    }

    fn as_cow(&self) -> &Cow<'static, str> {
        &self.0
    }

    fn from_string(name: String) -> Result<Self, String> {
        match Self::check_valid(&name) {
            Ok(()) => Ok(BinaryName(Cow::Owned(name))),
            Err(msg) => Err(msg),
        }
    }
}

impl Debug for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Debug for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Display for UnqualifiedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}
impl Display for BinaryName {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        f.write_str(self.0.as_ref())
    }
}

impl UnqualifiedName {
    const fn name(value: &'static str) -> UnqualifiedName {
        UnqualifiedName(Cow::Borrowed(value))
    }

    /// Check if a string is a legal method name
    ///
    /// On top of the usual unqualified name rules, method names may not contain `<` or `>`
    /// unless they are one of the two special initialization method names.
    pub fn check_valid_method_name(name: impl AsRef<str>) -> Result<(), String> {
        let name = name.as_ref();
        Self::check_valid(name)?;
        if name == Self::INIT.as_str() || name == Self::CLINIT.as_str() {
            Ok(())
        } else if name.contains(&['<', '>'][..]) {
            Err(format!("Method name '{}' contains an illegal character", name))
        } else {
            Ok(())
        }
    }

    // Special unqualified names - only these are allowed to have angle brackets in them
    pub const INIT: Self = Self::name("<init>");
    pub const CLINIT: Self = Self::name("<clinit>");
}

impl BinaryName {
    const fn name(value: &'static str) -> BinaryName {
        BinaryName(Cow::Borrowed(value))
    }

    // JDK names
    pub const CHARSEQUENCE: Self = Self::name("java/lang/CharSequence");
    pub const CLASS: Self = Self::name("java/lang/Class");
    pub const CLONEABLE: Self = Self::name("java/lang/Cloneable");
    pub const COMPARABLE: Self = Self::name("java/lang/Comparable");
    pub const DOUBLE: Self = Self::name("java/lang/Double");
    pub const ERROR: Self = Self::name("java/lang/Error");
    pub const EXCEPTION: Self = Self::name("java/lang/Exception");
    pub const FLOAT: Self = Self::name("java/lang/Float");
    pub const INTEGER: Self = Self::name("java/lang/Integer");
    pub const LONG: Self = Self::name("java/lang/Long");
    pub const METHODHANDLE: Self = Self::name("java/lang/invoke/MethodHandle");
    pub const METHODTYPE: Self = Self::name("java/lang/invoke/MethodType");
    pub const NUMBER: Self = Self::name("java/lang/Number");
    pub const OBJECT: Self = Self::name("java/lang/Object");
    pub const RUNTIMEEXCEPTION: Self = Self::name("java/lang/RuntimeException");
    pub const SERIALIZABLE: Self = Self::name("java/io/Serializable");
    pub const STRING: Self = Self::name("java/lang/String");
    pub const THROWABLE: Self = Self::name("java/lang/Throwable");

    /// Name of the class file describing a module
    pub const MODULE_INFO: Self = Self::name("module-info");
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn binary_names() {
        assert!(BinaryName::check_valid("java/lang/Object").is_ok());
        assert!(BinaryName::check_valid("Foo$Bar").is_ok());
        assert!(BinaryName::check_valid("").is_err());
        assert!(BinaryName::check_valid("java//Object").is_err());
        assert!(BinaryName::check_valid("java/lang/").is_err());
        assert!(BinaryName::check_valid("java.lang.Object").is_err());
        assert!(BinaryName::check_valid("[I").is_err());
    }

    #[test]
    fn method_names() {
        assert!(UnqualifiedName::check_valid_method_name("<init>").is_ok());
        assert!(UnqualifiedName::check_valid_method_name("<clinit>").is_ok());
        assert!(UnqualifiedName::check_valid_method_name("run").is_ok());
        assert!(UnqualifiedName::check_valid_method_name("<run>").is_err());
        assert!(UnqualifiedName::check_valid_method_name("a;b").is_err());
    }
}
