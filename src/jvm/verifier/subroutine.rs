use super::{
    ControlFlowGraph, Frame, LocatedError, VerificationType, VerifierFrame, VerifierType,
};
use crate::jvm::bytecode::{BranchInstruction, Bytecode, Instruction};
use crate::jvm::class_graph::ClassHierarchy;
use crate::jvm::VerifierErrorKind;
use crate::util::Width;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

/// One `jsr` instruction
#[derive(Debug)]
struct Call {
    /// Block ending in the `jsr`
    block: usize,

    /// Offset of the first instruction of the subroutine
    entry: u16,

    /// Block starting right after the `jsr`
    return_block: usize,
}

/// Subroutines of a method and the frames flowing in and out of them
///
/// A `ret` goes back to the instruction following every `jsr` that calls its subroutine. Locals
/// that the subroutine may write get their types from the frame at the `ret`, and every other
/// local is restored from the frame at the particular `jsr`. Callers with unrelated locals then
/// don't pollute each other.
#[derive(Debug)]
pub struct Subroutines {
    calls: Vec<Call>,

    /// Frame just before each `jsr` (same order as `calls`)
    call_frames: Vec<Option<VerifierFrame>>,

    /// Locals written by each subroutine (including any subroutines it calls), by entry offset
    modified: HashMap<u16, Vec<bool>>,

    /// Merged frame at the `ret`s of each subroutine, by entry offset
    ret_frames: HashMap<u16, VerifierFrame>,
}

impl Subroutines {
    /// Find the `jsr` instructions of a method and the locals their subroutines write
    pub fn find(cfg: &ControlFlowGraph, max_locals: u16) -> Result<Subroutines, LocatedError> {
        let mut calls = vec![];
        for (block_idx, block) in cfg.blocks.iter().enumerate() {
            let last = &cfg.instructions[block.instructions.end - 1];
            if let (Bytecode::Branch(BranchInstruction::Jsr(entry)), Some(return_block)) =
                (&last.bytecode, block.return_block)
            {
                calls.push(Call {
                    block: block_idx,
                    entry: *entry,
                    return_block,
                });
            }
        }

        let mut modified = HashMap::new();
        for call in &calls {
            if !modified.contains_key(&call.entry) {
                modified.insert(call.entry, modified_locals(cfg, call.entry, max_locals)?);
            }
        }
        if !calls.is_empty() {
            log::trace!(
                "Found {} jsr instructions into {} subroutines",
                calls.len(),
                modified.len()
            );
        }

        Ok(Subroutines {
            call_frames: vec![None; calls.len()],
            calls,
            modified,
            ret_frames: HashMap::new(),
        })
    }

    /// Record the frame just before the `jsr` ending `block`
    ///
    /// If the subroutine is already known to return, this also produces the frame for the
    /// instruction after the `jsr`.
    pub fn called(
        &mut self,
        block: usize,
        frame: &VerifierFrame,
    ) -> Option<(usize, VerifierFrame)> {
        let call_idx = self.calls.iter().position(|call| call.block == block)?;
        self.call_frames[call_idx] = Some(frame.clone());

        let call = &self.calls[call_idx];
        let ret_frame = self.ret_frames.get(&call.entry)?;
        let modified = self.modified.get(&call.entry).map_or(&[][..], Vec::as_slice);
        Some((call.return_block, after_return(frame, ret_frame, modified)))
    }

    /// Merge in the frame at a `ret` from the subroutine starting at `entry`
    ///
    /// Produces the frames for the instructions after every `jsr` to that subroutine seen so far.
    pub fn returned(
        &mut self,
        entry: u16,
        frame: &VerifierFrame,
        hierarchy: &dyn ClassHierarchy,
    ) -> Result<Vec<(usize, VerifierFrame)>, VerifierErrorKind> {
        let ret_frame: &VerifierFrame = match self.ret_frames.entry(entry) {
            Entry::Occupied(occupied) => {
                let existing = occupied.into_mut();
                existing.merge_from(frame, hierarchy)?;
                existing
            }
            Entry::Vacant(vacant) => vacant.insert(frame.clone()),
        };
        let modified = self.modified.get(&entry).map_or(&[][..], Vec::as_slice);

        let returns = self
            .calls
            .iter()
            .zip(&self.call_frames)
            .filter(|(call, _)| call.entry == entry)
            .filter_map(|(call, call_frame)| {
                let call_frame = call_frame.as_ref()?;
                Some((call.return_block, after_return(call_frame, ret_frame, modified)))
            })
            .collect();
        Ok(returns)
    }
}

/// Frame after returning from a subroutine
fn after_return(
    call_frame: &VerifierFrame,
    ret_frame: &VerifierFrame,
    modified: &[bool],
) -> VerifierFrame {
    let mut locals: Vec<VerifierType> = call_frame
        .locals
        .iter()
        .zip(&ret_frame.locals)
        .enumerate()
        .map(|(local, (at_call, at_ret))| {
            if modified.get(local).copied().unwrap_or(true) {
                at_ret.clone()
            } else {
                at_call.clone()
            }
        })
        .collect();

    // A `long` or `double` kept from the caller is broken up if the subroutine wrote its top half
    for local in 0..locals.len().saturating_sub(1) {
        let kept = !modified.get(local).copied().unwrap_or(true);
        let top_half_written = modified.get(local + 1).copied().unwrap_or(true);
        if kept && top_half_written && locals[local].width() == 2 {
            locals[local] = VerificationType::Top;
        }
    }

    Frame {
        locals,
        stack: ret_frame.stack.clone(),
        flag_this_uninit: ret_frame.flag_this_uninit,
    }
}

/// Walk the subroutine starting at `entry`, collecting the locals it may write
///
/// Nested subroutine calls are followed into, so that a subroutine which (directly or not) calls
/// itself is caught here.
fn modified_locals(
    cfg: &ControlFlowGraph,
    entry: u16,
    max_locals: u16,
) -> Result<Vec<bool>, LocatedError> {
    let mut modified = vec![false; max_locals as usize];
    let start = cfg.block_starting_at(entry).ok_or(LocatedError {
        offset: None,
        kind: VerifierErrorKind::BadBranchTarget(entry as i64),
    })?;

    let mut visited = vec![false; cfg.blocks.len()];
    let mut pending = vec![start];
    while let Some(block_idx) = pending.pop() {
        if std::mem::replace(&mut visited[block_idx], true) {
            continue;
        }
        let block = &cfg.blocks[block_idx];
        for insn in &cfg.instructions[block.instructions.clone()] {
            let (local, width) = match &insn.bytecode {
                Bytecode::Regular(
                    Instruction::IStore(local)
                    | Instruction::FStore(local)
                    | Instruction::AStore(local),
                ) => (*local as usize, 1),
                Bytecode::Regular(Instruction::LStore(local) | Instruction::DStore(local)) => {
                    (*local as usize, 2)
                }
                Bytecode::Branch(BranchInstruction::Jsr(target)) if *target == entry => {
                    return Err(LocatedError {
                        offset: Some(insn.offset),
                        kind: VerifierErrorKind::RecursiveSubroutine(entry),
                    });
                }
                _ => continue,
            };

            for slot in modified.iter_mut().take(local + width).skip(local) {
                *slot = true;
            }
        }
        pending.extend(block.successors.iter().copied());
        pending.extend(block.return_block);
    }
    Ok(modified)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::bytecode::decode_code;
    use crate::jvm::class_graph::ClassEnvironment;
    use crate::jvm::verifier::VerificationType::*;
    use crate::util::OffsetVec;

    fn graph(code: &[u8]) -> ControlFlowGraph {
        ControlFlowGraph::build(decode_code(code).unwrap(), code.len(), &[]).unwrap()
    }

    fn frame<const N: usize>(locals: [VerifierType; N]) -> VerifierFrame {
        Frame {
            locals: Vec::from(locals),
            stack: OffsetVec::new(),
            flag_this_uninit: false,
        }
    }

    // 0: jsr 10; 3: iload_0; 4: ireturn; 5: jsr 10; 8: aload_1; 9: areturn;
    // 10: astore_2; 11: lconst_0; 12: lstore_3; 13: ret 2
    const TWO_CALLERS: [u8; 15] = [
        0xa8, 0x00, 0x0a, 0x1a, 0xac, 0xa8, 0x00, 0x05, 0x2b, 0xb0, 0x4d, 0x09, 0x42, 0xa9, 0x02,
    ];

    #[test]
    fn modified_locals_of_subroutine() {
        let cfg = graph(&TWO_CALLERS);
        let subroutines = Subroutines::find(&cfg, 5).unwrap();
        assert_eq!(subroutines.calls.len(), 2);
        assert_eq!(
            subroutines.modified.get(&10),
            Some(&vec![false, false, true, true, true])
        );
    }

    #[test]
    fn returns_restore_caller_locals() {
        let env = ClassEnvironment::with_java_library_types();
        let cfg = graph(&TWO_CALLERS);
        let mut subroutines = Subroutines::find(&cfg, 5).unwrap();
        let first_call = cfg.block_starting_at(0).unwrap();
        let second_call = cfg.block_starting_at(5).unwrap();

        // Nothing to return to until the subroutine reaches a `ret`
        assert_eq!(subroutines.called(first_call, &frame([Integer, Top, Top, Top, Top])), None);
        let at_ret = frame([Top, Top, ReturnAddress(10), Long, Top]);
        let returns = subroutines.returned(10, &at_ret, &env).unwrap();
        assert_eq!(
            returns,
            vec![(
                cfg.block_starting_at(3).unwrap(),
                frame([Integer, Top, ReturnAddress(10), Long, Top])
            )]
        );

        // A later caller returns right away with its own locals, except for a `long` cut in half
        let (return_block, after) = subroutines
            .called(second_call, &frame([Float, Long, Top, Top, Top]))
            .unwrap();
        assert_eq!(return_block, cfg.block_starting_at(8).unwrap());
        assert_eq!(after, frame([Float, Top, ReturnAddress(10), Long, Top]));
    }

    #[test]
    fn recursive_subroutines() {
        // 0: jsr 4; 3: return; 4: astore_0; 5: jsr 4; 8: ret 0
        let cfg = graph(&[0xa8, 0x00, 0x04, 0xb1, 0x4b, 0xa8, 0xff, 0xff, 0xa9, 0x00]);
        assert_eq!(
            Subroutines::find(&cfg, 1).unwrap_err(),
            LocatedError {
                offset: Some(5),
                kind: VerifierErrorKind::RecursiveSubroutine(4)
            }
        );
    }
}
