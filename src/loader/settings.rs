use crate::jvm::class_file::Version;

/// Knobs for how classes are loaded and linked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Newest class file major version to accept
    pub max_major_version: u16,

    /// Accept preview class files (minor version `0xFFFF`) of exactly `max_major_version`
    pub enable_preview: bool,

    /// Run the bytecode verifier when linking
    ///
    /// Turning this off still resolves the superclass and interfaces.
    pub verify: bool,

    /// First class file version allowed to describe a module
    pub module_info_floor: Version,
}

impl Settings {
    pub fn new() -> Settings {
        Settings {
            max_major_version: Version::JAVA21.major_version,
            enable_preview: false,
            verify: true,
            module_info_floor: Version::JAVA9,
        }
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}
