use super::class_file::{ConstantKind, Version};
use super::verifier::VerifierType;
use std::fmt;

/// Everything that can go wrong while loading, validating, linking, or verifying a class
#[derive(Debug)]
pub enum Error {
    /// Input ran out in the middle of a read
    TruncatedClassFile {
        /// Offset in the input at which the read was attempted
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    /// Class file is malformed or breaks a structural rule
    ClassFormat(ClassFormatError),

    /// Class file version is outside of what is accepted
    UnsupportedClassVersion(UnsupportedVersion),

    /// Method bytecode is not type safe
    Verify(VerifyError),

    /// Class could not be linked against the rest of the hierarchy
    Linkage(LinkageError),

    IoError(std::io::Error),
}

impl Error {
    /// Iterate through this error and all of its nested causes, outermost first
    pub fn causes(&self) -> impl Iterator<Item = &Error> {
        std::iter::successors(Some(self), |err| match err {
            Error::ClassFormat(ClassFormatError {
                cause: Some(cause), ..
            }) => Some(cause.as_ref()),
            _ => None,
        })
    }

    /// Attach the class name to a class format error which does not have one yet
    pub fn in_class(self, class: &str) -> Error {
        match self {
            Error::ClassFormat(err) if err.class.is_none() => {
                Error::ClassFormat(err.in_class(class))
            }
            other => other,
        }
    }

    /// Innermost cause of the error
    pub fn root_cause(&self) -> &Error {
        let mut root = self;
        for cause in self.causes() {
            root = cause;
        }
        root
    }
}

impl From<ClassFormatError> for Error {
    fn from(err: ClassFormatError) -> Error {
        Error::ClassFormat(err)
    }
}

impl From<ClassFormatErrorKind> for Error {
    fn from(kind: ClassFormatErrorKind) -> Error {
        Error::ClassFormat(ClassFormatError::new(kind))
    }
}

impl From<UnsupportedVersion> for Error {
    fn from(err: UnsupportedVersion) -> Error {
        Error::UnsupportedClassVersion(err)
    }
}

impl From<VerifyError> for Error {
    fn from(err: VerifyError) -> Error {
        Error::Verify(err)
    }
}

impl From<LinkageError> for Error {
    fn from(err: LinkageError) -> Error {
        Error::Linkage(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::TruncatedClassFile {
                offset,
                needed,
                remaining,
            } => write!(
                f,
                "Truncated class file: needed {} byte(s) at offset {} but only {} remain",
                needed, offset, remaining
            ),
            Error::ClassFormat(err) => write!(f, "ClassFormatError: {}", err),
            Error::UnsupportedClassVersion(err) => {
                write!(f, "UnsupportedClassVersionError: {}", err)
            }
            Error::Verify(err) => write!(f, "VerifyError: {}", err),
            Error::Linkage(err) => write!(f, "{}", err),
            Error::IoError(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ClassFormat(ClassFormatError {
                cause: Some(cause), ..
            }) => Some(cause.as_ref()),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

/// Structural problem with a class file
#[derive(Debug)]
pub struct ClassFormatError {
    /// Name of the class, if it was known when the error was detected
    pub class: Option<String>,
    pub kind: ClassFormatErrorKind,

    /// Underlying error (eg. the header classification behind a rejected module-info)
    pub cause: Option<Box<Error>>,
}

impl ClassFormatError {
    pub fn new(kind: ClassFormatErrorKind) -> ClassFormatError {
        ClassFormatError {
            class: None,
            kind,
            cause: None,
        }
    }

    /// Attach the class in which the error was found
    pub fn in_class(mut self, class: impl Into<String>) -> ClassFormatError {
        self.class = Some(class.into());
        self
    }

    /// Attach an underlying cause
    pub fn caused_by(mut self, cause: Error) -> ClassFormatError {
        self.cause = Some(Box::new(cause));
        self
    }
}

impl fmt::Display for ClassFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(class) = &self.class {
            write!(f, " [in class file {}]", class)?;
        }
        Ok(())
    }
}

/// Kinds of entity carrying access flags
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entity {
    Class,
    Field,
    Method,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Class => "Class",
            Entity::Field => "Field",
            Entity::Method => "Method",
        })
    }
}

#[derive(Debug)]
pub enum ClassFormatErrorKind {
    BadMagic(u32),

    /// Index is 0, past the end of the pool, or the unusable slot after a `long`/`double`
    InvalidConstantPoolIndex {
        index: u16,
        pool_count: u16,
    },
    WrongConstantKind {
        index: u16,
        expected: ConstantKind,
        found: ConstantKind,
    },
    UnknownConstantTag {
        index: u16,
        tag: u8,
    },

    /// Tag exists, but not in this class file version (or not in this kind of class)
    UnsupportedConstantTag {
        index: u16,
        tag: u8,
        version: Version,
    },

    /// `long` or `double` in the last slot of the pool
    WideConstantAtPoolEnd {
        index: u16,
    },
    IllegalUtf8 {
        index: u16,
    },
    IllegalMethodHandle {
        index: u16,
        reason: String,
    },

    /// Attribute decoder did not consume exactly the declared length
    AttributeLength {
        name: String,
        declared: u32,
        consumed: usize,
    },
    MalformedAttribute {
        name: String,
        reason: String,
    },
    DuplicateAttribute {
        name: String,
    },
    TrailingBytes {
        offset: usize,
        extra: usize,
    },
    IllegalModifiers {
        entity: Entity,
        name: String,
        owner: String,
        flags: u16,
    },
    IllegalName {
        what: &'static str,
        name: String,
    },
    IllegalDescriptor {
        what: &'static str,
        descriptor: String,
    },
    DuplicateMember {
        entity: Entity,
        name: String,
        descriptor: String,
    },
    InvalidSuperclass {
        reason: String,
    },
    MissingCode {
        method: String,
    },
    UnexpectedCode {
        method: String,
    },
    InvalidCodeLength {
        method: String,
        length: usize,
    },
    BadConstantValue {
        field: String,
        reason: String,
    },
    BadModuleInfo {
        reason: String,
    },

    /// Classification of a problem with the header of the class file
    BadClassFileHeader(HeaderDiagnostic),
}

impl fmt::Display for ClassFormatErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ClassFormatErrorKind::*;

        match self {
            BadMagic(magic) => write!(f, "Incompatible magic value {:#010X}", magic),
            InvalidConstantPoolIndex { index, pool_count } => write!(
                f,
                "Invalid constant pool index {} (pool count is {})",
                index, pool_count
            ),
            WrongConstantKind {
                index,
                expected,
                found,
            } => write!(
                f,
                "Constant pool index {} should be {} but is {}",
                index, expected, found
            ),
            UnknownConstantTag { index, tag } => {
                write!(f, "Unknown constant tag {} at index {}", tag, index)
            }
            UnsupportedConstantTag {
                index,
                tag,
                version,
            } => write!(
                f,
                "Class file version {} does not support constant tag {} at index {}",
                version, tag, index
            ),
            WideConstantAtPoolEnd { index } => write!(
                f,
                "Two-slot constant at index {} overflows the constant pool",
                index
            ),
            IllegalUtf8 { index } => {
                write!(f, "Illegal UTF8 string in constant pool at index {}", index)
            }
            IllegalMethodHandle { index, reason } => {
                write!(f, "Bad method handle at index {}: {}", index, reason)
            }
            AttributeLength {
                name,
                declared,
                consumed,
            } => write!(
                f,
                "Attribute {} declares length {} but its contents span {} byte(s)",
                name, declared, consumed
            ),
            MalformedAttribute { name, reason } => {
                write!(f, "Malformed {} attribute: {}", name, reason)
            }
            DuplicateAttribute { name } => write!(f, "Multiple {} attributes", name),
            TrailingBytes { offset, extra } => write!(
                f,
                "Extra {} byte(s) at the end of the class file (offset {})",
                extra, offset
            ),
            IllegalModifiers {
                entity: Entity::Class,
                name,
                flags,
                ..
            } => write!(f, "Class {} has illegal modifiers: 0x{:04X}", name, flags),
            IllegalModifiers {
                entity,
                name,
                owner,
                flags,
            } => write!(
                f,
                "{} {} in class {} has illegal modifiers: 0x{:04X}",
                entity, name, owner, flags
            ),
            IllegalName { what, name } => write!(f, "Illegal {} name \"{}\"", what, name),
            IllegalDescriptor { what, descriptor } => {
                write!(f, "Illegal {} descriptor \"{}\"", what, descriptor)
            }
            DuplicateMember {
                entity,
                name,
                descriptor,
            } => write!(
                f,
                "Duplicate {} name&signature \"{}\" \"{}\"",
                entity.to_string().to_lowercase(),
                name,
                descriptor
            ),
            InvalidSuperclass { reason } => write!(f, "Invalid superclass: {}", reason),
            MissingCode { method } => write!(
                f,
                "Absent Code attribute in method {} that is not native or abstract",
                method
            ),
            UnexpectedCode { method } => write!(
                f,
                "Code attribute in native or abstract method {}",
                method
            ),
            InvalidCodeLength { method, length } => {
                write!(f, "Invalid code length {} in method {}", length, method)
            }
            BadConstantValue { field, reason } => {
                write!(f, "Bad ConstantValue on field {}: {}", field, reason)
            }
            BadModuleInfo { reason } => write!(f, "Invalid module-info: {}", reason),
            BadClassFileHeader(diagnostic) => write!(f, "bad class file header: {}", diagnostic),
        }
    }
}

/// Classification of a bad class file header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderDiagnostic {
    /// A `module-info` older than the module system
    AnachronisticModuleInfo { major: u16, minor: u16 },
}

impl HeaderDiagnostic {
    /// Stable key identifying the diagnostic
    pub fn key(&self) -> &'static str {
        match self {
            HeaderDiagnostic::AnachronisticModuleInfo { .. } => "anachronistic.module.info",
        }
    }
}

impl fmt::Display for HeaderDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderDiagnostic::AnachronisticModuleInfo { major, minor } => write!(
                f,
                "{}: anachronistic module info found in class file version {}.{}",
                self.key(),
                major,
                minor
            ),
        }
    }
}

/// Class file version is not accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedVersion {
    pub version: Version,

    /// Most recent version accepted
    pub latest: Version,
    pub reason: UnsupportedReason,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum UnsupportedReason {
    TooOld,
    TooNew,

    /// Only 0 and 65535 (preview) are valid minor versions from Java 12 on
    BadMinorVersion,
    PreviewNotEnabled,

    /// Preview features are only available for the latest version
    PreviewNotLatest,
}

impl fmt::Display for UnsupportedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            UnsupportedReason::TooOld => "older than any supported version",
            UnsupportedReason::TooNew => "newer than the latest supported version",
            UnsupportedReason::BadMinorVersion => "minor version must be 0 or 65535",
            UnsupportedReason::PreviewNotEnabled => "preview features are not enabled",
            UnsupportedReason::PreviewNotLatest => {
                "preview features are only supported for the latest version"
            }
        };
        write!(
            f,
            "class file version {} is not supported ({}; latest is {})",
            self.version, reason, self.latest
        )
    }
}

/// Method bytecode failed verification
#[derive(Debug)]
pub struct VerifyError {
    pub class: String,
    pub method: String,
    pub descriptor: String,

    /// Bytecode offset of the offending instruction, if there is one
    pub offset: Option<u16>,
    pub kind: VerifierErrorKind,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (class: {}, method: {}{}",
            self.kind, self.class, self.method, self.descriptor
        )?;
        if let Some(offset) = self.offset {
            write!(f, ", offset: {}", offset)?;
        }
        f.write_str(")")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerifierErrorKind {
    /// Pop from an empty operand stack
    EmptyStack,
    StackOverflow {
        max_stack: u16,
    },
    InvalidWidth(usize),
    NotArrayType(VerifierType),
    InvalidLocalIndex(u16),
    ArgumentsExceedLocals,

    /// Found type is not usable for the operation
    InvalidType(VerifierType),
    IncompatibleTypes {
        found: VerifierType,
        expected: VerifierType,
    },
    WrongConstantKind {
        index: u16,
        found: ConstantKind,
    },
    InvalidConstantIndex(u16),
    NotLoadableConstant(ConstantKind),
    BadDescriptor(String),

    /// `invokespecial <init>` on something it cannot initialize
    BadInitCall,

    /// Return from a constructor before the superclass or sibling constructor was called
    UninitializedThisOnReturn,
    IllegalInternalMethodCall(String),
    BadReturn,
    BadBranchTarget(i64),
    FallsOffEnd,
    InconsistentStackHeight {
        expected: usize,
        found: usize,
    },
    MismatchedStackTypes {
        first: VerifierType,
        second: VerifierType,
    },
    IllegalOpcode(u8),
    TruncatedInstruction,

    /// `jsr` or `ret` in a class file that must use stack map frames instead
    SubroutineNotAllowed {
        major_version: u16,
    },

    /// `jsr` to a subroutine from inside that same subroutine (argument is the entry offset)
    RecursiveSubroutine(u16),
    BadExceptionHandler,
    CatchTypeNotThrowable(String),
    BadNew(String),
    BadArrayDimensions,
    BadArrayType(u8),

    /// `invokeinterface` count operand disagrees with the descriptor, or a padding byte is not 0
    BadInvokeOperands,

    /// A class needed to check assignability was not found
    MissingClass(String),
}

impl fmt::Display for VerifierErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use VerifierErrorKind::*;

        match self {
            EmptyStack => f.write_str("Unable to pop operand off an empty stack"),
            StackOverflow { max_stack } => {
                write!(f, "Stack size too large (max_stack is {})", max_stack)
            }
            InvalidWidth(width) => write!(f, "Operand of width {} is not allowed here", width),
            NotArrayType(found) => write!(f, "Expected an array type but found {}", found),
            InvalidLocalIndex(idx) => write!(f, "Illegal local variable number {}", idx),
            ArgumentsExceedLocals => f.write_str("Arguments can't fit into locals"),
            InvalidType(found) => write!(f, "Bad type on operand stack or in locals: {}", found),
            IncompatibleTypes { found, expected } => {
                write!(f, "Type {} is not assignable to {}", found, expected)
            }
            WrongConstantKind { index, found } => write!(
                f,
                "Illegal constant pool reference {} (found {})",
                index, found
            ),
            InvalidConstantIndex(index) => {
                write!(f, "Illegal constant pool index {} in bytecode", index)
            }
            NotLoadableConstant(kind) => write!(f, "Constant of kind {} is not loadable", kind),
            BadDescriptor(desc) => write!(f, "Bad descriptor \"{}\"", desc),
            BadInitCall => f.write_str("Bad <init> method call"),
            UninitializedThisOnReturn => {
                f.write_str("Constructor must call super() or this() before return")
            }
            IllegalInternalMethodCall(name) => {
                write!(f, "Illegal call to internal method {}", name)
            }
            BadReturn => f.write_str("Method return type does not match the descriptor"),
            BadBranchTarget(target) => write!(f, "Illegal target of jump or branch {}", target),
            FallsOffEnd => f.write_str("Falling off the end of the code"),
            InconsistentStackHeight { expected, found } => write!(
                f,
                "Inconsistent stack height {} != {}",
                found, expected
            ),
            MismatchedStackTypes { first, second } => {
                write!(f, "Mismatched stack types {} and {}", first, second)
            }
            IllegalOpcode(opcode) => write!(f, "Illegal instruction opcode {:#04x}", opcode),
            TruncatedInstruction => f.write_str("Instruction extends past the end of the code"),
            SubroutineNotAllowed { major_version } => write!(
                f,
                "jsr/ret are not allowed in class files of version {}",
                major_version
            ),
            RecursiveSubroutine(entry) => write!(f, "Recursive call to jsr entry {}", entry),
            BadExceptionHandler => f.write_str("Illegal exception table range or handler"),
            CatchTypeNotThrowable(name) => {
                write!(f, "Catch type {} is not a subclass of Throwable", name)
            }
            BadNew(name) => write!(f, "Illegal new instruction for {}", name),
            BadArrayDimensions => f.write_str("Illegal dimension in multianewarray"),
            BadArrayType(atype) => write!(f, "Illegal newarray type {}", atype),
            BadInvokeOperands => f.write_str("Inconsistent operands in invoke instruction"),
            MissingClass(name) => write!(f, "Class {} not found", name),
        }
    }
}

/// Failure to connect a class to the rest of the hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkageError {
    NoClassDefFound { name: String, needed_by: String },
    DuplicateClassDefinition(String),
    ClassCircularity(String),
    IncompatibleClassChange(String),
}

impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkageError::NoClassDefFound { name, needed_by } => write!(
                f,
                "NoClassDefFoundError: {} (needed by {})",
                name, needed_by
            ),
            LinkageError::DuplicateClassDefinition(name) => write!(
                f,
                "LinkageError: attempted duplicate class definition for {}",
                name
            ),
            LinkageError::ClassCircularity(name) => write!(f, "ClassCircularityError: {}", name),
            LinkageError::IncompatibleClassChange(msg) => {
                write!(f, "IncompatibleClassChangeError: {}", msg)
            }
        }
    }
}
