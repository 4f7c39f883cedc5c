//! Bytecode verification utilities
//!
//! For any specific instruction inside a method body, the stack and locals should have the same
//! structure, regardless of which control flow was used to reach that instruction. In other words:
//! although the values on the stack and in the locals may obviously be different, the types and
//! order of the stack and local variables cannot. This information is referred to as the _frame_
//! at that instruction (represented using [`VerifierFrame`]).
//!
//! Knowing the frame at a point in the code makes it possible to verify that the next instruction
//! makes sense (eg. `dadd` only makes sense if the top two elements on the stack are of type
//! `double`). The "types" used in verification (represented using [`VerificationType`]) are
//! slightly augmented to take into account initialization and null.
//!
//! Verifying straight-line instructions is pretty simple (see [`Frame::verify_instruction`]), but
//! things get more complicated when an instruction can be reached from multiple locations (eg. it
//! is the target of jumps). In those cases, the frames from the different source locations need
//! to be unified. We do this with [verification by type inference][0]: frames are merged at the
//! start of every basic block until a fixpoint is reached. Blocks are revisited in reverse
//! postorder, which keeps the number of passes over loops small. Stack map tables are not
//! consulted.
//!
//! Class files older than version 51 may also use `jsr`/`ret` subroutines. The address pushed by
//! `jsr` gets its own verification type, and a `ret` flows back to the instruction after every
//! `jsr` into its subroutine (see [`Subroutines`]).
//!
//! [0]: https://docs.oracle.com/javase/specs/jvms/se8/html/jvms-4.html#jvms-4.10.2

mod cfg;
mod frame;
mod subroutine;
mod types;

pub use cfg::*;
pub use frame::*;
pub use subroutine::*;
pub use types::*;

use crate::jvm::bytecode::{decode_code, BranchInstruction, Bytecode, DecodeError, Instruction};
use crate::jvm::class_file::{ClassFile, Code, Method, Version};
use crate::jvm::class_graph::{is_throwable, ClassHierarchy, ClassSummary, MissingClass, WithClass};
use crate::jvm::descriptors::ParseDescriptor;
use crate::jvm::{
    BinaryName, Error, LinkageError, MethodAccessFlags, MethodDescriptor, Name, RefType,
    UnqualifiedName, VerifierErrorKind, VerifyError,
};
use crate::util::OffsetVec;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Verification failure, before it is attributed to a class and method
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedError {
    /// Offset of the offending instruction (if the problem is with one instruction)
    pub offset: Option<u16>,
    pub kind: VerifierErrorKind,
}

impl LocatedError {
    fn anywhere(kind: VerifierErrorKind) -> LocatedError {
        LocatedError { offset: None, kind }
    }
}

impl From<DecodeError> for LocatedError {
    fn from(err: DecodeError) -> LocatedError {
        LocatedError {
            offset: Some(err.offset),
            kind: err.kind,
        }
    }
}

impl From<MissingClass> for VerifierErrorKind {
    fn from(missing: MissingClass) -> VerifierErrorKind {
        VerifierErrorKind::MissingClass(missing.0.as_str().to_owned())
    }
}

impl From<MissingClass> for LocatedError {
    fn from(missing: MissingClass) -> LocatedError {
        LocatedError::anywhere(missing.into())
    }
}

/// Verify every method of a class
///
/// The class itself does not need to be in `hierarchy`. Classes which are needed to check
/// subtyping but that can't be found are reported as [`LinkageError::NoClassDefFound`].
pub fn verify_class(class: &ClassFile, hierarchy: &dyn ClassHierarchy) -> Result<(), Error> {
    let summary = Arc::new(ClassSummary::from_class_file(class)?);
    let hierarchy = WithClass {
        class: summary.clone(),
        rest: hierarchy,
    };
    for method in &class.methods {
        verify_method_of(class, &summary, method, &hierarchy)?;
    }
    log::debug!(
        "Verified {} ({} methods)",
        summary.name,
        class.methods.len()
    );
    Ok(())
}

/// Verify one method of a class (methods without code trivially pass)
pub fn verify_method(
    class: &ClassFile,
    method: &Method,
    hierarchy: &dyn ClassHierarchy,
) -> Result<(), Error> {
    let summary = Arc::new(ClassSummary::from_class_file(class)?);
    let hierarchy = WithClass {
        class: summary.clone(),
        rest: hierarchy,
    };
    verify_method_of(class, &summary, method, &hierarchy)
}

fn verify_method_of(
    class: &ClassFile,
    summary: &ClassSummary,
    method: &Method,
    hierarchy: &dyn ClassHierarchy,
) -> Result<(), Error> {
    let code = match method.code() {
        Some(code) => code,
        None => return Ok(()),
    };
    let name = method.name(&class.constants)?;
    let descriptor = method.descriptor(&class.constants)?;
    log::trace!("Verifying {}.{}{}", summary.name, name, descriptor);

    infer_frames(class, summary, method, name, descriptor, code, hierarchy).map_err(|err| {
        let class_name = summary.name.as_str().to_owned();
        match err.kind {
            VerifierErrorKind::MissingClass(missing) => {
                Error::Linkage(LinkageError::NoClassDefFound {
                    name: missing,
                    needed_by: class_name,
                })
            }
            kind => Error::Verify(VerifyError {
                class: class_name,
                method: name.to_owned(),
                descriptor: descriptor.to_owned(),
                offset: err.offset,
                kind,
            }),
        }
    })
}

/// Run the dataflow analysis over a method body until frames stop changing
fn infer_frames(
    class: &ClassFile,
    summary: &ClassSummary,
    method: &Method,
    name: &str,
    raw_descriptor: &str,
    code: &Code,
    hierarchy: &dyn ClassHierarchy,
) -> Result<(), LocatedError> {
    let descriptor = MethodDescriptor::<BinaryName>::parse(raw_descriptor).map_err(|_| {
        LocatedError::anywhere(VerifierErrorKind::BadDescriptor(raw_descriptor.to_owned()))
    })?;
    let instructions = decode_code(&code.code_array.0)?;
    if class.version >= Version::JAVA7 {
        let subroutine_insn = instructions
            .iter()
            .find(|insn| insn.bytecode.is_subroutine_instruction());
        if let Some(insn) = subroutine_insn {
            return Err(LocatedError {
                offset: Some(insn.offset),
                kind: VerifierErrorKind::SubroutineNotAllowed {
                    major_version: class.version.major_version,
                },
            });
        }
    }

    // Catch types are checked even if their handlers turn out to be unreachable
    let mut catch_types: Vec<VerifierType> = Vec::with_capacity(code.exception_table.len());
    for handler in &code.exception_table {
        let catch_class = match handler.catch_type {
            None => BinaryName::THROWABLE,
            Some(catch_type) => {
                let catch_name = class.constants.get_class_name(catch_type).map_err(|_| {
                    LocatedError::anywhere(VerifierErrorKind::InvalidConstantIndex(
                        catch_type.0 .0,
                    ))
                })?;
                let not_throwable = || {
                    LocatedError::anywhere(VerifierErrorKind::CatchTypeNotThrowable(
                        catch_name.to_owned(),
                    ))
                };
                let catch_class =
                    BinaryName::from_string(catch_name.to_owned()).map_err(|_| not_throwable())?;
                if !is_throwable(hierarchy, &catch_class)? {
                    return Err(not_throwable());
                }
                catch_class
            }
        };
        catch_types.push(VerificationType::Object(RefType::Object(catch_class)));
    }

    let mut new_sites = HashMap::new();
    for insn in &instructions {
        if let Bytecode::Regular(Instruction::New(class_index)) = &insn.bytecode {
            let created = class
                .constants
                .get_class_name(*class_index)
                .ok()
                .and_then(|created| RefType::from_class_constant(created).ok());
            if let Some(RefType::Object(created)) = created {
                new_sites.insert(insn.offset, created);
            }
        }
    }

    let ctx = VerifierContext {
        class,
        this_class: summary.name.clone(),
        superclass: summary.superclass.clone(),
        return_type: descriptor.return_type.clone(),
        is_constructor: name == UnqualifiedName::INIT.as_str(),
        max_stack: code.max_stack,
        new_sites,
        hierarchy,
    };
    let is_static = method.access_flags.contains(MethodAccessFlags::STATIC);
    let entry_frame = VerifierFrame::method_entry(&ctx, is_static, &descriptor, code.max_locals)
        .map_err(LocatedError::anywhere)?;

    let code_length = code.code_array.0.len();
    let cfg = ControlFlowGraph::build(instructions, code_length, &code.exception_table)?;
    let mut subroutines = Subroutines::find(&cfg, code.max_locals)?;

    let mut entries: Vec<Option<VerifierFrame>> = vec![None; cfg.blocks.len()];
    entries[0] = Some(entry_frame);
    let mut worklist: BTreeSet<(usize, usize)> = BTreeSet::new();
    worklist.insert((cfg.rank[0], 0));
    let mut visits = 0;

    while let Some(next) = worklist.iter().next().copied() {
        worklist.remove(&next);
        let block_idx = next.1;
        let block = &cfg.blocks[block_idx];
        let mut frame = match &entries[block_idx] {
            Some(frame) => frame.clone(),
            None => continue,
        };
        visits += 1;
        log::trace!("Block {} at offset {}: {:?}", block_idx, block.start, frame);

        let mut returns: Vec<(usize, VerifierFrame)> = vec![];
        for insn in &cfg.instructions[block.instructions.clone()] {
            let at = |kind: VerifierErrorKind| LocatedError {
                offset: Some(insn.offset),
                kind,
            };

            // Handlers see the state from before the instruction, and after it if locals changed
            let mut covered = false;
            for (handler_idx, handler) in cfg.handlers_at(insn.offset) {
                covered = true;
                let handler_frame =
                    exception_frame(&frame, &catch_types[handler_idx], code.max_stack)
                        .map_err(at)?;
                merge_into(
                    &mut entries,
                    &mut worklist,
                    &cfg.rank,
                    handler.handler_block,
                    &handler_frame,
                    hierarchy,
                )
                .map_err(at)?;
            }

            let locals_before = if covered {
                Some(frame.locals.clone())
            } else {
                None
            };
            match &insn.bytecode {
                Bytecode::Regular(regular) => frame
                    .verify_instruction(regular, insn.offset, &ctx)
                    .map_err(at)?,
                Bytecode::Branch(branch) => {
                    if let BranchInstruction::Jsr(_) = branch {
                        returns.extend(subroutines.called(block_idx, &frame));
                    }
                    frame.verify_branch_instruction(branch, &ctx).map_err(at)?;
                    if let BranchInstruction::Ret(local) = branch {
                        if let Some(VerificationType::ReturnAddress(entry)) =
                            frame.locals.get(*local as usize)
                        {
                            let entry = *entry;
                            let after = subroutines.returned(entry, &frame, hierarchy).map_err(at)?;
                            returns.extend(after);
                        }
                    }
                }
            }

            if let Some(locals_before) = locals_before {
                if locals_before != frame.locals {
                    for (handler_idx, handler) in cfg.handlers_at(insn.offset) {
                        let handler_frame =
                            exception_frame(&frame, &catch_types[handler_idx], code.max_stack)
                                .map_err(at)?;
                        merge_into(
                            &mut entries,
                            &mut worklist,
                            &cfg.rank,
                            handler.handler_block,
                            &handler_frame,
                            hierarchy,
                        )
                        .map_err(at)?;
                    }
                }
            }
        }

        let exits = block
            .successors
            .iter()
            .map(|successor| (*successor, &frame))
            .chain(returns.iter().map(|(target, frame)| (*target, frame)));
        for (successor, exit_frame) in exits {
            let target_offset = cfg.blocks[successor].start;
            merge_into(&mut entries, &mut worklist, &cfg.rank, successor, exit_frame, hierarchy)
                .map_err(|kind| LocatedError {
                    offset: Some(target_offset),
                    kind,
                })?;
        }
    }

    log::trace!(
        "Frames converged after {} block visits ({} blocks)",
        visits,
        cfg.blocks.len()
    );
    Ok(())
}

/// Frame on entry to an exception handler, which needs room for the exception on the stack
fn exception_frame(
    frame: &VerifierFrame,
    catch_type: &VerifierType,
    max_stack: u16,
) -> Result<VerifierFrame, VerifierErrorKind> {
    if max_stack < 1 {
        return Err(VerifierErrorKind::StackOverflow { max_stack });
    }
    Ok(Frame {
        locals: frame.locals.clone(),
        stack: OffsetVec::from([catch_type.clone()]),
        flag_this_uninit: frame.flag_this_uninit,
    })
}

/// Merge a frame into the entry of a block, queueing the block if its entry changed
fn merge_into(
    entries: &mut [Option<VerifierFrame>],
    worklist: &mut BTreeSet<(usize, usize)>,
    rank: &[usize],
    target: usize,
    incoming: &VerifierFrame,
    hierarchy: &dyn ClassHierarchy,
) -> Result<(), VerifierErrorKind> {
    let changed = match entries[target].as_mut() {
        Some(existing) => existing.merge_from(incoming, hierarchy)?,
        None => {
            entries[target] = Some(incoming.clone());
            true
        }
    };
    if changed {
        worklist.insert((rank[target], target));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::class_file::{
        Attribute, AttributeData, BytecodeArray, ConstantPoolBuilder, ExceptionHandler, Version,
    };
    use crate::jvm::class_graph::ClassEnvironment;
    use crate::jvm::ClassAccessFlags;

    /// Class `Test` with a single method
    fn single_method_class(
        mut constants: ConstantPoolBuilder,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_locals: u16,
        code: Vec<u8>,
        exception_table: Vec<ExceptionHandler>,
    ) -> ClassFile {
        let this_class = constants.get_class("Test").unwrap();
        let super_class = constants.get_class("java/lang/Object").unwrap();
        let name_index = constants.get_utf8(name).unwrap();
        let descriptor_index = constants.get_utf8(descriptor).unwrap();
        let code_name = constants.get_utf8("Code").unwrap();
        ClassFile {
            version: Version::JAVA8,
            constants: constants.build(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class,
            super_class: Some(super_class),
            interfaces: vec![],
            fields: vec![],
            methods: vec![Method {
                access_flags,
                name_index,
                descriptor_index,
                attributes: vec![Attribute {
                    name_index: code_name,
                    data: AttributeData::Code(Code {
                        max_stack: 4,
                        max_locals,
                        code_array: BytecodeArray(code),
                        exception_table,
                        attributes: vec![],
                    }),
                }],
            }],
            attributes: vec![],
        }
    }

    fn static_method(descriptor: &str, max_locals: u16, code: Vec<u8>) -> ClassFile {
        let flags = MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC;
        let constants = ConstantPoolBuilder::new();
        single_method_class(constants, flags, "run", descriptor, max_locals, code, vec![])
    }

    fn code_of(class: &mut ClassFile) -> &mut Code {
        match &mut class.methods[0].attributes[0].data {
            AttributeData::Code(code) => code,
            other => panic!("Expected code, got {:?}", other),
        }
    }

    fn verify(class: &ClassFile) -> Result<(), Error> {
        verify_class(class, &ClassEnvironment::with_java_library_types())
    }

    fn verify_error(result: Result<(), Error>) -> VerifyError {
        match result {
            Err(Error::Verify(err)) => err,
            other => panic!("Expected a verify error, got {:?}", other),
        }
    }

    #[test]
    fn branches_merge() {
        // iload_0; ifeq 6; iconst_1; ireturn; iconst_0; ireturn
        let class = static_method("(I)I", 1, vec![0x1a, 0x99, 0x00, 0x05, 0x04, 0xac, 0x03, 0xac]);
        verify(&class).unwrap();
    }

    #[test]
    fn loops_converge() {
        // 0: iconst_0; 1: istore_0; 2: iinc 0 1; 5: iload_0; 6: ifne 2; 9: return
        let class = static_method(
            "()V",
            1,
            vec![0x03, 0x3b, 0x84, 0x00, 0x01, 0x1a, 0x9a, 0xff, 0xfc, 0xb1],
        );
        verify(&class).unwrap();
    }

    #[test]
    fn inconsistent_stack_heights() {
        // 0: iconst_0; 1: iconst_0; 2: ifeq 6; 5: iconst_0; 6: return
        let class = static_method("()V", 0, vec![0x03, 0x03, 0x99, 0x00, 0x04, 0x03, 0xb1]);
        let err = verify_error(verify(&class));
        assert_eq!(err.class, "Test");
        assert_eq!(err.method, "run");
        assert_eq!(err.descriptor, "()V");
        assert_eq!(err.offset, Some(6));
        assert!(matches!(
            err.kind,
            VerifierErrorKind::InconsistentStackHeight { .. }
        ));
    }

    #[test]
    fn locals_disagreeing_become_unusable() {
        // 0: iload_0; 1: ifeq 9; 4: fconst_0; 5: fstore_1; 6: goto 11; 9: iconst_0; 10: istore_1;
        // 11: iload_1; 12: ireturn
        let class = static_method(
            "(I)I",
            2,
            vec![
                0x1a, 0x99, 0x00, 0x08, 0x0b, 0x44, 0xa7, 0x00, 0x05, 0x03, 0x3c, 0x1b, 0xac,
            ],
        );
        let err = verify_error(verify(&class));
        assert_eq!(err.offset, Some(11));
        assert!(matches!(err.kind, VerifierErrorKind::IncompatibleTypes { .. }));
    }

    #[test]
    fn exception_handlers() {
        let mut constants = ConstantPoolBuilder::new();
        let runtime_exception = constants.get_class("java/lang/RuntimeException").unwrap();
        let handler = ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: Some(runtime_exception),
        };

        // 0: aconst_null; 1: athrow; 2: athrow
        let flags = MethodAccessFlags::STATIC;
        let class = single_method_class(
            constants,
            flags,
            "run",
            "()V",
            0,
            vec![0x01, 0xbf, 0xbf],
            vec![handler],
        );
        verify(&class).unwrap();

        let mut constants = ConstantPoolBuilder::new();
        let string = constants.get_class("java/lang/String").unwrap();
        let handler = ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: Some(string),
        };
        let class = single_method_class(
            constants,
            flags,
            "run",
            "()V",
            0,
            vec![0x01, 0xbf, 0xbf],
            vec![handler],
        );
        let err = verify_error(verify(&class));
        assert_eq!(
            err.kind,
            VerifierErrorKind::CatchTypeNotThrowable(String::from("java/lang/String"))
        );
        assert_eq!(err.offset, None);
    }

    #[test]
    fn constructor_must_initialize_this() {
        let flags = MethodAccessFlags::PUBLIC;
        let constants = ConstantPoolBuilder::new();
        let class = single_method_class(constants, flags, "<init>", "()V", 1, vec![0xb1], vec![]);

        let err = verify_error(verify(&class));
        assert_eq!(err.method, "<init>");
        assert_eq!(err.offset, Some(0));
        assert_eq!(err.kind, VerifierErrorKind::UninitializedThisOnReturn);
    }

    #[test]
    fn missing_classes_are_linkage_errors() {
        let mut constants = ConstantPoolBuilder::new();
        let field = constants.get_field_ref("Foo", "INSTANCE", "LFoo;").unwrap();
        let [hi, lo] = field.0 .0.to_be_bytes();

        // getstatic Foo.INSTANCE; areturn
        let flags = MethodAccessFlags::STATIC;
        let class = single_method_class(
            constants,
            flags,
            "run",
            "()Ljava/lang/Number;",
            0,
            vec![0xb2, hi, lo, 0xb0],
            vec![],
        );
        match verify(&class) {
            Err(Error::Linkage(LinkageError::NoClassDefFound { name, needed_by })) => {
                assert_eq!(name, "Foo");
                assert_eq!(needed_by, "Test");
            }
            other => panic!("Expected a missing class, got {:?}", other),
        }
    }

    #[test]
    fn methods_without_code_pass() {
        let mut class = static_method("()V", 0, vec![0x00]);
        class.methods[0].attributes.clear();
        verify(&class).unwrap();

        // `nop` falls off the end
        let class = static_method("()V", 0, vec![0x00]);
        assert_eq!(
            verify_error(verify(&class)).kind,
            VerifierErrorKind::FallsOffEnd
        );
    }

    #[test]
    fn single_methods() {
        // iload_0; iload_1; iadd; ireturn
        let class = static_method("(II)I", 2, vec![0x1a, 0x1b, 0x60, 0xac]);
        let environment = ClassEnvironment::with_java_library_types();
        verify_method(&class, &class.methods[0], &environment).unwrap();

        // Returning a `long` from an `int` method
        let class = static_method("(J)I", 2, vec![0x1e, 0xac]);
        let err = verify_error(verify_method(&class, &class.methods[0], &environment));
        assert_eq!((err.method.as_str(), err.descriptor.as_str()), ("run", "(J)I"));
        assert_eq!(err.offset, Some(1));
    }

    #[test]
    fn handler_entry_needs_stack_room() {
        // 0: nop; 1: return; 2: return (catching everything thrown by the `nop`)
        let handler = ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 2,
            catch_type: None,
        };
        let flags = MethodAccessFlags::STATIC;
        let constants = ConstantPoolBuilder::new();
        let mut class = single_method_class(
            constants,
            flags,
            "run",
            "()V",
            0,
            vec![0x00, 0xb1, 0xb1],
            vec![handler],
        );

        code_of(&mut class).max_stack = 0;
        let err = verify_error(verify(&class));
        assert_eq!(err.offset, Some(0));
        assert_eq!(err.kind, VerifierErrorKind::StackOverflow { max_stack: 0 });

        code_of(&mut class).max_stack = 1;
        verify(&class).unwrap();
    }

    /// `try { nop } finally { }` the way old compilers wrote it
    ///
    /// 0: nop; 1: jsr 11; 4: return; 5: astore_0; 6: jsr 11; 9: aload_0; 10: athrow;
    /// 11: astore_1; 12: ret 1
    fn try_finally(version: Version) -> ClassFile {
        let handler = ExceptionHandler {
            start_pc: 0,
            end_pc: 1,
            handler_pc: 5,
            catch_type: None,
        };
        let code = vec![
            0x00, 0xa8, 0x00, 0x0a, 0xb1, 0x4b, 0xa8, 0x00, 0x05, 0x2a, 0xbf, 0x4c, 0xa9, 0x01,
        ];
        let flags = MethodAccessFlags::STATIC;
        let constants = ConstantPoolBuilder::new();
        let mut class =
            single_method_class(constants, flags, "run", "()V", 2, code, vec![handler]);
        class.version = version;
        class
    }

    #[test]
    fn subroutines_in_old_class_files() {
        verify(&try_finally(Version::JAVA5)).unwrap();
        verify(&try_finally(Version::JAVA6)).unwrap();

        let err = verify_error(verify(&try_finally(Version::JAVA7)));
        assert_eq!(err.offset, Some(1));
        assert_eq!(
            err.kind,
            VerifierErrorKind::SubroutineNotAllowed { major_version: 51 }
        );
    }

    #[test]
    fn subroutine_return_addresses_are_checked() {
        // 0: jsr 4; 3: return; 4: astore_0; 5: aload_0; 6: pop; 7: ret 0
        let mut class = static_method(
            "()V",
            1,
            vec![0xa8, 0x00, 0x04, 0xb1, 0x4b, 0x2a, 0x57, 0xa9, 0x00],
        );
        class.version = Version::JAVA5;
        let err = verify_error(verify(&class));
        assert_eq!(err.offset, Some(5));
        assert!(matches!(err.kind, VerifierErrorKind::InvalidType(_)));

        // 0: iconst_0; 1: istore_0; 2: ret 0
        let mut class = static_method("()V", 1, vec![0x03, 0x3b, 0xa9, 0x00]);
        class.version = Version::JAVA5;
        let err = verify_error(verify(&class));
        assert_eq!(err.offset, Some(2));
        assert_eq!(err.kind, VerifierErrorKind::InvalidType(VerificationType::Integer));
    }
}
