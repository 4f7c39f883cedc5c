use super::LocatedError;
use crate::jvm::bytecode::{BranchInstruction, Bytecode, DecodedInstruction};
use crate::jvm::class_file::{ClassConstantIndex, ExceptionHandler};
use crate::jvm::VerifierErrorKind;
use std::collections::BTreeSet;
use std::ops::Range;

/// Straight-line run of instructions, ending in a branch or just before another block's start
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    /// Offset of the first instruction
    pub start: u16,

    /// Indices into [`ControlFlowGraph::instructions`]
    pub instructions: Range<usize>,

    /// Blocks control can reach when this block finishes (not including exception handlers)
    pub successors: Vec<usize>,

    /// For a block ending in `jsr`, the block a `ret` from the subroutine comes back to
    pub return_block: Option<usize>,
}

/// Exception table entry, resolved to the block of its handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionEdge {
    pub start: u16,
    pub end: u16,
    pub handler_block: usize,

    /// `None` catches everything
    pub catch_type: Option<ClassConstantIndex>,
}

#[derive(Debug)]
pub struct ControlFlowGraph {
    pub instructions: Vec<DecodedInstruction>,
    pub blocks: Vec<BasicBlock>,
    pub handlers: Vec<ExceptionEdge>,

    /// Reverse postorder position of each block (`usize::MAX` for unreachable blocks)
    pub rank: Vec<usize>,
}

impl ControlFlowGraph {
    /// Split decoded instructions into basic blocks
    ///
    /// Every jump target and exception handler boundary must fall on the start of an instruction
    /// and the last instruction must not be able to fall through past the end of the code.
    pub fn build(
        instructions: Vec<DecodedInstruction>,
        code_length: usize,
        exception_table: &[ExceptionHandler],
    ) -> Result<ControlFlowGraph, LocatedError> {
        if instructions.is_empty() {
            return Err(LocatedError {
                offset: None,
                kind: VerifierErrorKind::FallsOffEnd,
            });
        }

        let mut instruction_at: Vec<Option<usize>> = vec![None; code_length];
        for (index, insn) in instructions.iter().enumerate() {
            instruction_at[insn.offset as usize] = Some(index);
        }
        let is_boundary =
            |offset: u16| matches!(instruction_at.get(offset as usize), Some(Some(_)));

        let mut leaders: BTreeSet<u16> = BTreeSet::new();
        leaders.insert(0);

        for (index, insn) in instructions.iter().enumerate() {
            let is_last = index + 1 == instructions.len();
            let falls_through = match &insn.bytecode {
                Bytecode::Regular(_) => true,
                Bytecode::Branch(BranchInstruction::Jsr(_)) if is_last => true,
                Bytecode::Branch(branch) => {
                    for target in branch.jump_targets() {
                        if !is_boundary(target) {
                            return Err(LocatedError {
                                offset: Some(insn.offset),
                                kind: VerifierErrorKind::BadBranchTarget(target as i64),
                            });
                        }
                        leaders.insert(target);
                    }
                    if let Some(next) = instructions.get(index + 1) {
                        leaders.insert(next.offset);
                    }
                    branch.falls_through()
                }
            };
            if is_last && falls_through {
                return Err(LocatedError {
                    offset: Some(insn.offset),
                    kind: VerifierErrorKind::FallsOffEnd,
                });
            }
        }

        for handler in exception_table {
            let ends_ok =
                handler.end_pc as usize == code_length || is_boundary(handler.end_pc);
            if handler.start_pc >= handler.end_pc
                || !is_boundary(handler.start_pc)
                || !ends_ok
                || !is_boundary(handler.handler_pc)
            {
                return Err(LocatedError {
                    offset: None,
                    kind: VerifierErrorKind::BadExceptionHandler,
                });
            }
            leaders.insert(handler.start_pc);
            leaders.insert(handler.handler_pc);
            if (handler.end_pc as usize) < code_length {
                leaders.insert(handler.end_pc);
            }
        }

        // Carve out the blocks
        let leaders: Vec<u16> = leaders.into_iter().collect();
        let mut block_at: Vec<Option<usize>> = vec![None; code_length];
        let mut blocks = Vec::with_capacity(leaders.len());
        for (block_idx, leader) in leaders.iter().enumerate() {
            block_at[*leader as usize] = Some(block_idx);
            let first = instruction_at[*leader as usize].unwrap_or_default();
            let end = match leaders.get(block_idx + 1) {
                Some(next) => instruction_at[*next as usize].unwrap_or(instructions.len()),
                None => instructions.len(),
            };
            blocks.push(BasicBlock {
                start: *leader,
                instructions: first..end,
                successors: vec![],
                return_block: None,
            });
        }
        let block_of = |offset: u16| block_at[offset as usize].unwrap_or_default();

        for block_idx in 0..blocks.len() {
            let last = &instructions[blocks[block_idx].instructions.end - 1];
            let mut successors = vec![];
            let falls_through = match &last.bytecode {
                Bytecode::Regular(_) => true,
                Bytecode::Branch(branch) => {
                    for target in branch.jump_targets() {
                        successors.push(block_of(target));
                    }
                    branch.falls_through()
                }
            };
            if falls_through && block_idx + 1 < blocks.len() {
                successors.push(block_idx + 1);
            }
            successors.sort_unstable();
            successors.dedup();
            blocks[block_idx].successors = successors;
            if let Bytecode::Branch(BranchInstruction::Jsr(_)) = &last.bytecode {
                blocks[block_idx].return_block = Some(block_idx + 1);
            }
        }

        let handlers: Vec<ExceptionEdge> = exception_table
            .iter()
            .map(|handler| ExceptionEdge {
                start: handler.start_pc,
                end: handler.end_pc,
                handler_block: block_of(handler.handler_pc),
                catch_type: handler.catch_type,
            })
            .collect();

        let rank = reverse_postorder_ranks(&blocks, &handlers);
        log::trace!(
            "Split {} instructions into {} blocks",
            instructions.len(),
            blocks.len()
        );

        Ok(ControlFlowGraph {
            instructions,
            blocks,
            handlers,
            rank,
        })
    }

    /// Exception handlers whose range covers the given offset, along with their position in the
    /// exception table
    pub fn handlers_at(&self, offset: u16) -> impl Iterator<Item = (usize, &ExceptionEdge)> {
        self.handlers
            .iter()
            .enumerate()
            .filter(move |(_, handler)| handler.start <= offset && offset < handler.end)
    }

    /// Block starting at the given offset
    pub fn block_starting_at(&self, offset: u16) -> Option<usize> {
        self.blocks
            .binary_search_by_key(&offset, |block| block.start)
            .ok()
    }

    /// Successors along with handlers covering the block and the return point of a `jsr`
    fn all_successors(
        blocks: &[BasicBlock],
        handlers: &[ExceptionEdge],
        block: usize,
    ) -> Vec<usize> {
        let start = blocks[block].start;
        let mut successors = blocks[block].successors.clone();
        successors.extend(blocks[block].return_block);
        successors.extend(
            handlers
                .iter()
                .filter(|handler| handler.start <= start && start < handler.end)
                .map(|handler| handler.handler_block),
        );
        successors
    }
}

/// Number the blocks in reverse postorder of a depth-first walk from the entry
fn reverse_postorder_ranks(blocks: &[BasicBlock], handlers: &[ExceptionEdge]) -> Vec<usize> {
    let mut rank = vec![usize::MAX; blocks.len()];
    let mut visited = vec![false; blocks.len()];
    let mut postorder = Vec::with_capacity(blocks.len());
    let mut stack: Vec<(usize, Vec<usize>)> = vec![];

    visited[0] = true;
    let mut entry_successors = ControlFlowGraph::all_successors(blocks, handlers, 0);
    entry_successors.reverse();
    stack.push((0, entry_successors));

    while let Some((block, pending)) = stack.last_mut() {
        let block = *block;
        match pending.pop() {
            Some(next) if !visited[next] => {
                visited[next] = true;
                let mut next_successors = ControlFlowGraph::all_successors(blocks, handlers, next);
                next_successors.reverse();
                stack.push((next, next_successors));
            }
            Some(_) => (),
            None => {
                postorder.push(block);
                stack.pop();
            }
        }
    }

    for (position, block) in postorder.into_iter().rev().enumerate() {
        rank[block] = position;
    }
    rank
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::jvm::bytecode::decode_code;

    fn graph(
        code: &[u8],
        exception_table: &[ExceptionHandler],
    ) -> Result<ControlFlowGraph, LocatedError> {
        ControlFlowGraph::build(decode_code(code).unwrap(), code.len(), exception_table)
    }

    #[test]
    fn branches_split_blocks() {
        // iconst_0; ifeq 5; return; return
        let cfg = graph(&[0x03, 0x99, 0x00, 0x04, 0xb1, 0xb1], &[]).unwrap();
        let starts: Vec<u16> = cfg.blocks.iter().map(|block| block.start).collect();
        assert_eq!(starts, vec![0, 4, 5]);
        assert_eq!(cfg.blocks[0].instructions, 0..2);
        assert_eq!(cfg.blocks[0].successors, vec![1, 2]);
        assert!(cfg.blocks[1].successors.is_empty());
        assert_eq!(cfg.rank[0], 0);
        assert!(cfg.rank[1] != usize::MAX && cfg.rank[2] != usize::MAX);
    }

    #[test]
    fn loops_rank_after_entry() {
        // 0: iconst_0; 1: ifeq 7; 4: goto 0; 7: return
        let cfg = graph(&[0x03, 0x99, 0x00, 0x06, 0xa7, 0xff, 0xfc, 0xb1], &[]).unwrap();
        assert_eq!(cfg.blocks.len(), 3);
        assert_eq!(cfg.blocks[1].successors, vec![0]);
        assert_eq!(cfg.rank[0], 0);
    }

    #[test]
    fn unreachable_blocks() {
        let cfg = graph(&[0xb1, 0xb1], &[]).unwrap();
        assert_eq!(cfg.rank, vec![0, usize::MAX]);
    }

    #[test]
    fn bad_control_flow() {
        assert_eq!(
            graph(&[0x03], &[]).unwrap_err(),
            LocatedError {
                offset: Some(0),
                kind: VerifierErrorKind::FallsOffEnd
            }
        );

        // sipush 0; goto 1 (middle of the `sipush`)
        assert_eq!(
            graph(&[0x11, 0x00, 0x00, 0xa7, 0xff, 0xfe], &[]).unwrap_err(),
            LocatedError {
                offset: Some(3),
                kind: VerifierErrorKind::BadBranchTarget(1)
            }
        );
    }

    #[test]
    fn subroutine_calls() {
        // 0: jsr 4; 3: return; 4: astore_0; 5: ret 0
        let cfg = graph(&[0xa8, 0x00, 0x04, 0xb1, 0x4b, 0xa9, 0x00], &[]).unwrap();
        let starts: Vec<u16> = cfg.blocks.iter().map(|block| block.start).collect();
        assert_eq!(starts, vec![0, 3, 4]);
        assert_eq!(cfg.blocks[0].successors, vec![2]);
        assert_eq!(cfg.blocks[0].return_block, Some(1));
        assert!(cfg.blocks[2].successors.is_empty());
        assert_eq!(cfg.block_starting_at(4), Some(2));
        assert_eq!(cfg.block_starting_at(5), None);
        assert!(cfg.rank.iter().all(|rank| *rank != usize::MAX));

        // Nowhere to return to
        assert_eq!(
            graph(&[0x4b, 0xa9, 0x00, 0xa8, 0xff, 0xfd], &[]).unwrap_err(),
            LocatedError {
                offset: Some(3),
                kind: VerifierErrorKind::FallsOffEnd
            }
        );
    }

    #[test]
    fn exception_edges() {
        // 0: aconst_null; 1: athrow; 2: athrow
        let handler = ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: None,
        };
        let cfg = graph(&[0x01, 0xbf, 0xbf], &[handler.clone()]).unwrap();
        assert_eq!(cfg.blocks.len(), 2);
        assert_eq!(cfg.handlers[0].handler_block, 1);
        assert_eq!(cfg.rank, vec![0, 1]);
        assert_eq!(cfg.handlers_at(1).count(), 1);
        assert_eq!(cfg.handlers_at(2).count(), 0);

        for bad in [
            ExceptionHandler {
                end_pc: 0,
                ..handler.clone()
            },
            ExceptionHandler {
                end_pc: 4,
                ..handler.clone()
            },
            ExceptionHandler {
                handler_pc: 3,
                ..handler
            },
        ] {
            assert_eq!(
                graph(&[0x01, 0xbf, 0xbf], &[bad]).unwrap_err().kind,
                VerifierErrorKind::BadExceptionHandler
            );
        }
    }
}
