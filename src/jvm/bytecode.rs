//! This module contains the decoded form of JVM bytecode. The representation is slightly different
//! from the raw encoding to make it more convenient to verify. For instance:
//!
//!   - The `wide` prefix doesn't show up at all, but instead gets merged into the instructions it
//!     is allowed to modify (so `ILoad` covers `iload`, `iload_<n>`, and `wide iload`)
//!
//!   - Some instructions (like the branches) get abstracted into one instruction with a field.
//!     This helps with repetitive pattern matches.
//!
//!   - Jump targets are absolute offsets into the code array, already checked to be in range
//!     (but not to be on an instruction boundary)
//!
//!   - `jsr`, `jsr_w`, and `ret` are decoded regardless of the class file version (the verifier
//!     decides whether they are allowed)

use crate::jvm::class_file::{
    ByteReader, ClassConstantIndex, ConstantIndex, FieldRefConstantIndex,
    InvokeDynamicConstantIndex, MethodRefConstantIndex,
};
use crate::jvm::{BaseType, VerifierErrorKind};

/// Non-branching JVM bytecode instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    AConstNull,
    IConstM1,
    IConst0,
    IConst1,
    IConst2,
    IConst3,
    IConst4,
    IConst5,
    LConst0,
    LConst1,
    FConst0,
    FConst1,
    FConst2,
    DConst0,
    DConst1,
    BiPush(i8),
    SiPush(i16),
    Ldc(ConstantIndex), // covers both `ldc` and `ldc_w`
    Ldc2(ConstantIndex),
    ILoad(u16), // covers `iload`, `iload{0,3}`, and `wide iload`
    LLoad(u16),
    FLoad(u16),
    DLoad(u16),
    ALoad(u16),
    IALoad,
    LALoad,
    FALoad,
    DALoad,
    AALoad,
    BALoad,
    CALoad,
    SALoad,
    IStore(u16), // covers `istore`, `istore{0,3}`, and `wide istore`
    LStore(u16),
    FStore(u16),
    DStore(u16),
    AStore(u16),
    IAStore,
    LAStore,
    FAStore,
    DAStore,
    AAStore,
    BAStore,
    CAStore,
    SAStore,
    Pop,
    Pop2,
    Dup,
    DupX1,
    DupX2,
    Dup2,
    Dup2X1,
    Dup2X2,
    Swap,
    IAdd,
    LAdd,
    FAdd,
    DAdd,
    ISub,
    LSub,
    FSub,
    DSub,
    IMul,
    LMul,
    FMul,
    DMul,
    IDiv,
    LDiv,
    FDiv,
    DDiv,
    IRem,
    LRem,
    FRem,
    DRem,
    INeg,
    LNeg,
    FNeg,
    DNeg,
    ISh(ShiftType), // covers `ishr`, `ishl`, and `iushr`
    LSh(ShiftType), // covers `lshr`, `lshl`, and `lushr`
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,
    IInc(u16, i16), // covers `iinc` and `wide iinc`
    I2L,
    I2F,
    I2D,
    L2I,
    L2F,
    L2D,
    F2I,
    F2L,
    F2D,
    D2I,
    D2L,
    D2F,
    I2B,
    I2C,
    I2S,
    LCmp,
    FCmp(CompareMode), // covers `fcmpl` and `fcmpg`
    DCmp(CompareMode), // covers `dcmpl` and `dcmpg`
    GetStatic(FieldRefConstantIndex),
    PutStatic(FieldRefConstantIndex),
    GetField(FieldRefConstantIndex),
    PutField(FieldRefConstantIndex),
    Invoke(InvokeType, MethodRefConstantIndex),
    InvokeDynamic(InvokeDynamicConstantIndex),
    New(ClassConstantIndex),
    NewArray(BaseType),
    ANewArray(ClassConstantIndex),
    ArrayLength,
    CheckCast(ClassConstantIndex),
    InstanceOf(ClassConstantIndex),
    MonitorEnter,
    MonitorExit,
    MultiANewArray(ClassConstantIndex, u8),
}

/// Branching JVM bytecode instruction
///
/// Every instruction that can end a basic block is here. Jump targets are absolute offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BranchInstruction {
    If(OrdComparison, u16), // covers `ifeq`, `ifne`, `iflt`, `ifge`, `ifgt`, `ifle`
    IfICmp(OrdComparison, u16), // covers `if_icmpeq`, `if_icmpne`, `if_icmplt`, ... `if_icmple`
    IfACmp(EqComparison, u16),  // covers `if_acmpeq`, `if_acmpne`
    IfNull(EqComparison, u16),  // covers `ifnull`, `ifnonnull`
    Goto(u16),                  // covers `goto` and `goto_w`
    Jsr(u16),                   // covers `jsr` and `jsr_w`
    Ret(u16),                   // covers `ret` and `wide ret`
    TableSwitch {
        /// Jump target if the argument is less than `low` or greater than
        /// `low + targets.len() - 1`
        default: u16,

        /// Value associated with the first jump target
        low: i32,

        /// Jump targets
        targets: Vec<u16>,
    },
    LookupSwitch {
        /// Jump target if there is no corresponding key
        default: u16,

        /// Keys and their jump targets
        targets: Vec<(i32, u16)>,
    },
    IReturn,
    LReturn,
    FReturn,
    DReturn,
    AReturn,
    Return,
    AThrow,
}

impl BranchInstruction {
    /// Can control continue on to the next instruction?
    ///
    /// A `jsr` does not: control only comes back to the next instruction through a `ret`.
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchInstruction::If(_, _)
                | BranchInstruction::IfICmp(_, _)
                | BranchInstruction::IfACmp(_, _)
                | BranchInstruction::IfNull(_, _)
        )
    }

    /// Offsets the instruction can jump to (not including the fallthrough)
    pub fn jump_targets(&self) -> Vec<u16> {
        match self {
            BranchInstruction::If(_, target)
            | BranchInstruction::IfICmp(_, target)
            | BranchInstruction::IfACmp(_, target)
            | BranchInstruction::IfNull(_, target)
            | BranchInstruction::Goto(target)
            | BranchInstruction::Jsr(target) => vec![*target],
            BranchInstruction::TableSwitch {
                default, targets, ..
            } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().copied());
                ts
            }
            BranchInstruction::LookupSwitch { default, targets } => {
                let mut ts = vec![*default];
                ts.extend(targets.iter().map(|(_, target)| *target));
                ts
            }
            BranchInstruction::Ret(_)
            | BranchInstruction::IReturn
            | BranchInstruction::LReturn
            | BranchInstruction::FReturn
            | BranchInstruction::DReturn
            | BranchInstruction::AReturn
            | BranchInstruction::Return
            | BranchInstruction::AThrow => vec![],
        }
    }
}

/// Either kind of instruction
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Bytecode {
    Regular(Instruction),
    Branch(BranchInstruction),
}

impl Bytecode {
    /// Is this `jsr`, `jsr_w`, `ret`, or `wide ret`?
    pub fn is_subroutine_instruction(&self) -> bool {
        matches!(
            self,
            Bytecode::Branch(BranchInstruction::Jsr(_) | BranchInstruction::Ret(_))
        )
    }
}

/// Instruction along with where it is in the code array
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedInstruction {
    pub offset: u16,
    pub bytecode: Bytecode,
}

/// Failure to decode a code array
#[derive(Clone, Debug, PartialEq)]
pub struct DecodeError {
    /// Offset of the instruction being decoded
    pub offset: u16,
    pub kind: VerifierErrorKind,
}

/// Decode a full code array into instructions
///
/// The code array must be at most 65535 bytes long (which structural validation ensures).
pub fn decode_code(code: &[u8]) -> Result<Vec<DecodedInstruction>, DecodeError> {
    let mut reader = ByteReader::new(code);
    let mut instructions = vec![];
    while !reader.is_empty() {
        let offset = reader.position() as u16;
        let bytecode = decode_instruction(&mut reader, offset, code.len())
            .map_err(|kind| DecodeError { offset, kind })?;
        instructions.push(DecodedInstruction { offset, bytecode });
    }
    Ok(instructions)
}

/// Decode one instruction (the reader must be positioned at the opcode)
fn decode_instruction(
    reader: &mut ByteReader<'_>,
    offset: u16,
    code_length: usize,
) -> Result<Bytecode, VerifierErrorKind> {
    use Instruction::*;

    let opcode = u1(reader)?;
    let insn = match opcode {
        0x00 => Nop,
        0x01 => AConstNull,
        0x02 => IConstM1,
        0x03 => IConst0,
        0x04 => IConst1,
        0x05 => IConst2,
        0x06 => IConst3,
        0x07 => IConst4,
        0x08 => IConst5,
        0x09 => LConst0,
        0x0a => LConst1,
        0x0b => FConst0,
        0x0c => FConst1,
        0x0d => FConst2,
        0x0e => DConst0,
        0x0f => DConst1,
        0x10 => BiPush(u1(reader)? as i8),
        0x11 => SiPush(u2(reader)? as i16),
        0x12 => Ldc(ConstantIndex(u1(reader)? as u16)),
        0x13 => Ldc(ConstantIndex(u2(reader)?)),
        0x14 => Ldc2(ConstantIndex(u2(reader)?)),
        0x15 => ILoad(u1(reader)? as u16),
        0x16 => LLoad(u1(reader)? as u16),
        0x17 => FLoad(u1(reader)? as u16),
        0x18 => DLoad(u1(reader)? as u16),
        0x19 => ALoad(u1(reader)? as u16),
        0x1a..=0x1d => ILoad((opcode - 0x1a) as u16),
        0x1e..=0x21 => LLoad((opcode - 0x1e) as u16),
        0x22..=0x25 => FLoad((opcode - 0x22) as u16),
        0x26..=0x29 => DLoad((opcode - 0x26) as u16),
        0x2a..=0x2d => ALoad((opcode - 0x2a) as u16),
        0x2e => IALoad,
        0x2f => LALoad,
        0x30 => FALoad,
        0x31 => DALoad,
        0x32 => AALoad,
        0x33 => BALoad,
        0x34 => CALoad,
        0x35 => SALoad,
        0x36 => IStore(u1(reader)? as u16),
        0x37 => LStore(u1(reader)? as u16),
        0x38 => FStore(u1(reader)? as u16),
        0x39 => DStore(u1(reader)? as u16),
        0x3a => AStore(u1(reader)? as u16),
        0x3b..=0x3e => IStore((opcode - 0x3b) as u16),
        0x3f..=0x42 => LStore((opcode - 0x3f) as u16),
        0x43..=0x46 => FStore((opcode - 0x43) as u16),
        0x47..=0x4a => DStore((opcode - 0x47) as u16),
        0x4b..=0x4e => AStore((opcode - 0x4b) as u16),
        0x4f => IAStore,
        0x50 => LAStore,
        0x51 => FAStore,
        0x52 => DAStore,
        0x53 => AAStore,
        0x54 => BAStore,
        0x55 => CAStore,
        0x56 => SAStore,
        0x57 => Pop,
        0x58 => Pop2,
        0x59 => Dup,
        0x5a => DupX1,
        0x5b => DupX2,
        0x5c => Dup2,
        0x5d => Dup2X1,
        0x5e => Dup2X2,
        0x5f => Swap,
        0x60 => IAdd,
        0x61 => LAdd,
        0x62 => FAdd,
        0x63 => DAdd,
        0x64 => ISub,
        0x65 => LSub,
        0x66 => FSub,
        0x67 => DSub,
        0x68 => IMul,
        0x69 => LMul,
        0x6a => FMul,
        0x6b => DMul,
        0x6c => IDiv,
        0x6d => LDiv,
        0x6e => FDiv,
        0x6f => DDiv,
        0x70 => IRem,
        0x71 => LRem,
        0x72 => FRem,
        0x73 => DRem,
        0x74 => INeg,
        0x75 => LNeg,
        0x76 => FNeg,
        0x77 => DNeg,
        0x78 => ISh(ShiftType::Left),
        0x79 => LSh(ShiftType::Left),
        0x7a => ISh(ShiftType::ArithmeticRight),
        0x7b => LSh(ShiftType::ArithmeticRight),
        0x7c => ISh(ShiftType::LogicalRight),
        0x7d => LSh(ShiftType::LogicalRight),
        0x7e => IAnd,
        0x7f => LAnd,
        0x80 => IOr,
        0x81 => LOr,
        0x82 => IXor,
        0x83 => LXor,
        0x84 => IInc(u1(reader)? as u16, u1(reader)? as i8 as i16),
        0x85 => I2L,
        0x86 => I2F,
        0x87 => I2D,
        0x88 => L2I,
        0x89 => L2F,
        0x8a => L2D,
        0x8b => F2I,
        0x8c => F2L,
        0x8d => F2D,
        0x8e => D2I,
        0x8f => D2L,
        0x90 => D2F,
        0x91 => I2B,
        0x92 => I2C,
        0x93 => I2S,
        0x94 => LCmp,
        0x95 => FCmp(CompareMode::L),
        0x96 => FCmp(CompareMode::G),
        0x97 => DCmp(CompareMode::L),
        0x98 => DCmp(CompareMode::G),
        0x99..=0xb1 | 0xbf | 0xc6..=0xc9 => {
            let branch = decode_branch(reader, opcode, offset, code_length)?;
            return Ok(Bytecode::Branch(branch));
        }
        0xb2 => GetStatic(FieldRefConstantIndex(ConstantIndex(u2(reader)?))),
        0xb3 => PutStatic(FieldRefConstantIndex(ConstantIndex(u2(reader)?))),
        0xb4 => GetField(FieldRefConstantIndex(ConstantIndex(u2(reader)?))),
        0xb5 => PutField(FieldRefConstantIndex(ConstantIndex(u2(reader)?))),
        0xb6 => Invoke(InvokeType::Virtual, method_ref(reader)?),
        0xb7 => Invoke(InvokeType::Special, method_ref(reader)?),
        0xb8 => Invoke(InvokeType::Static, method_ref(reader)?),
        0xb9 => {
            let method = method_ref(reader)?;
            let count = u1(reader)?;
            if u1(reader)? != 0 {
                return Err(VerifierErrorKind::BadInvokeOperands);
            }
            Invoke(InvokeType::Interface(count), method)
        }
        0xba => {
            let index = InvokeDynamicConstantIndex(ConstantIndex(u2(reader)?));
            if u2(reader)? != 0 {
                return Err(VerifierErrorKind::BadInvokeOperands);
            }
            InvokeDynamic(index)
        }
        0xbb => New(class_ref(reader)?),
        0xbc => {
            let atype = u1(reader)?;
            let base_type = match atype {
                4 => BaseType::Boolean,
                5 => BaseType::Char,
                6 => BaseType::Float,
                7 => BaseType::Double,
                8 => BaseType::Byte,
                9 => BaseType::Short,
                10 => BaseType::Int,
                11 => BaseType::Long,
                _ => return Err(VerifierErrorKind::BadArrayType(atype)),
            };
            NewArray(base_type)
        }
        0xbd => ANewArray(class_ref(reader)?),
        0xbe => ArrayLength,
        0xc0 => CheckCast(class_ref(reader)?),
        0xc1 => InstanceOf(class_ref(reader)?),
        0xc2 => MonitorEnter,
        0xc3 => MonitorExit,
        0xc4 => return decode_wide(reader),
        0xc5 => MultiANewArray(class_ref(reader)?, u1(reader)?),
        _ => return Err(VerifierErrorKind::IllegalOpcode(opcode)),
    };
    Ok(Bytecode::Regular(insn))
}

/// Decode the instruction after a `wide` prefix (`wide ret` is the only branch)
fn decode_wide(reader: &mut ByteReader<'_>) -> Result<Bytecode, VerifierErrorKind> {
    use Instruction::*;

    let opcode = u1(reader)?;
    let insn = match opcode {
        0x15 => ILoad(u2(reader)?),
        0x16 => LLoad(u2(reader)?),
        0x17 => FLoad(u2(reader)?),
        0x18 => DLoad(u2(reader)?),
        0x19 => ALoad(u2(reader)?),
        0x36 => IStore(u2(reader)?),
        0x37 => LStore(u2(reader)?),
        0x38 => FStore(u2(reader)?),
        0x39 => DStore(u2(reader)?),
        0x3a => AStore(u2(reader)?),
        0x84 => IInc(u2(reader)?, u2(reader)? as i16),
        0xa9 => return Ok(Bytecode::Branch(BranchInstruction::Ret(u2(reader)?))),
        _ => return Err(VerifierErrorKind::IllegalOpcode(opcode)),
    };
    Ok(Bytecode::Regular(insn))
}

fn decode_branch(
    reader: &mut ByteReader<'_>,
    opcode: u8,
    offset: u16,
    code_length: usize,
) -> Result<BranchInstruction, VerifierErrorKind> {
    use BranchInstruction::*;

    let target = |relative: i64| -> Result<u16, VerifierErrorKind> {
        let absolute = offset as i64 + relative;
        if absolute < 0 || absolute >= code_length as i64 {
            Err(VerifierErrorKind::BadBranchTarget(absolute))
        } else {
            Ok(absolute as u16)
        }
    };
    let ord_comparison = |base: u8| match opcode - base {
        0 => OrdComparison::EQ,
        1 => OrdComparison::NE,
        2 => OrdComparison::LT,
        3 => OrdComparison::GE,
        4 => OrdComparison::GT,
        _ => OrdComparison::LE,
    };

    let branch = match opcode {
        0x99..=0x9e => If(ord_comparison(0x99), target(i2(reader)?)?),
        0x9f..=0xa4 => IfICmp(ord_comparison(0x9f), target(i2(reader)?)?),
        0xa5 => IfACmp(EqComparison::EQ, target(i2(reader)?)?),
        0xa6 => IfACmp(EqComparison::NE, target(i2(reader)?)?),
        0xa7 => Goto(target(i2(reader)?)?),
        0xc8 => Goto(target(i4(reader)?)?),
        0xa8 => Jsr(target(i2(reader)?)?),
        0xc9 => Jsr(target(i4(reader)?)?),
        0xa9 => Ret(u1(reader)? as u16),
        0xc6 => IfNull(EqComparison::EQ, target(i2(reader)?)?),
        0xc7 => IfNull(EqComparison::NE, target(i2(reader)?)?),
        0xaa => {
            skip_switch_padding(reader)?;
            let default = target(i4(reader)?)?;
            let low = i4(reader)? as i32;
            let high = i4(reader)? as i32;
            if low > high {
                return Err(VerifierErrorKind::BadBranchTarget(offset as i64));
            }
            let count = (high as i64 - low as i64 + 1) as usize;
            if count > reader.remaining() / 4 {
                return Err(VerifierErrorKind::TruncatedInstruction);
            }
            let mut targets = Vec::with_capacity(count);
            for _ in 0..count {
                targets.push(target(i4(reader)?)?);
            }
            TableSwitch {
                default,
                low,
                targets,
            }
        }
        0xab => {
            skip_switch_padding(reader)?;
            let default = target(i4(reader)?)?;
            let npairs = i4(reader)?;
            if npairs < 0 {
                return Err(VerifierErrorKind::BadBranchTarget(offset as i64));
            }
            let npairs = npairs as usize;
            if npairs > reader.remaining() / 8 {
                return Err(VerifierErrorKind::TruncatedInstruction);
            }
            let mut targets: Vec<(i32, u16)> = Vec::with_capacity(npairs);
            for _ in 0..npairs {
                let key = i4(reader)? as i32;
                if matches!(targets.last(), Some((previous, _)) if *previous >= key) {
                    return Err(VerifierErrorKind::BadBranchTarget(offset as i64));
                }
                targets.push((key, target(i4(reader)?)?));
            }
            LookupSwitch { default, targets }
        }
        0xac => IReturn,
        0xad => LReturn,
        0xae => FReturn,
        0xaf => DReturn,
        0xb0 => AReturn,
        0xb1 => Return,
        0xbf => AThrow,
        _ => return Err(VerifierErrorKind::IllegalOpcode(opcode)),
    };
    Ok(branch)
}

/// `tableswitch` and `lookupswitch` operands start at a multiple of four bytes from the start of
/// the code array
fn skip_switch_padding(reader: &mut ByteReader<'_>) -> Result<(), VerifierErrorKind> {
    let padding = (4 - reader.position() % 4) % 4;
    reader
        .read_bytes(padding)
        .map_err(|_| VerifierErrorKind::TruncatedInstruction)?;
    Ok(())
}

fn u1(reader: &mut ByteReader<'_>) -> Result<u8, VerifierErrorKind> {
    reader
        .read_u1()
        .map_err(|_| VerifierErrorKind::TruncatedInstruction)
}

fn u2(reader: &mut ByteReader<'_>) -> Result<u16, VerifierErrorKind> {
    reader
        .read_u2()
        .map_err(|_| VerifierErrorKind::TruncatedInstruction)
}

fn i2(reader: &mut ByteReader<'_>) -> Result<i64, VerifierErrorKind> {
    Ok(u2(reader)? as i16 as i64)
}

fn i4(reader: &mut ByteReader<'_>) -> Result<i64, VerifierErrorKind> {
    reader
        .read_i4()
        .map(|value| value as i64)
        .map_err(|_| VerifierErrorKind::TruncatedInstruction)
}

fn method_ref(reader: &mut ByteReader<'_>) -> Result<MethodRefConstantIndex, VerifierErrorKind> {
    Ok(MethodRefConstantIndex(ConstantIndex(u2(reader)?)))
}

fn class_ref(reader: &mut ByteReader<'_>) -> Result<ClassConstantIndex, VerifierErrorKind> {
    Ok(ClassConstantIndex(ConstantIndex(u2(reader)?)))
}

/// Possible bit shifts
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum ShiftType {
    Left,
    LogicalRight,
    ArithmeticRight,
}

/// Comparison modes for floating point
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum CompareMode {
    /// -1 on NaN
    L,

    /// 1 on NaN
    G,
}

/// Binary comparison operators available for `int` branches
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum OrdComparison {
    EQ,
    GE,
    GT,
    LE,
    LT,
    NE,
}

/// Equality/inequality comparison operators
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum EqComparison {
    EQ,
    NE,
}

/// Type of method to invoke
///
/// Note: `InvokeDynamic` is kept separate because the constant argument it expects is not to a
/// `Constant::MethodRef`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InvokeType {
    Virtual,
    Special,
    Static,
    Interface(u8), // `count` is of total arguments, where `long`/`double` count for 2
}
