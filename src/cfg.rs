use std::collections::BTreeSet;

use anyhow::{Context, Result};

use crate::ir::{BasicBlock, ControlFlowGraph, EdgeKind, ExceptionHandler, FlowEdge, Instruction};
use crate::opcodes;
use crate::scan::{opcode_length, padding, read_u16, read_u32};

/// Build a control flow graph from bytecode instructions.
pub(crate) fn build_cfg(
    code: &[u8],
    instructions: &[Instruction],
    handlers: &[ExceptionHandler],
) -> Result<ControlFlowGraph> {
    let mut leaders = BTreeSet::new();
    leaders.insert(0u32);
    for handler in handlers {
        leaders.insert(handler.handler_pc);
        leaders.insert(handler.start_pc);
        leaders.insert(handler.end_pc);
    }
    for inst in instructions {
        if let Some(targets) = branch_targets(code, inst.offset as usize)? {
            leaders.extend(targets);
            let next = inst.offset + opcode_length(code, inst.offset as usize)? as u32;
            leaders.insert(next);
        }
        if is_exit_opcode(inst.opcode) {
            let next = inst.offset + opcode_length(code, inst.offset as usize)? as u32;
            leaders.insert(next);
        }
    }

    let leader_list: Vec<u32> = leaders
        .into_iter()
        .filter(|offset| *offset < code.len() as u32)
        .collect();

    let mut blocks = Vec::new();
    for window in leader_list.windows(2) {
        let start = window[0];
        let end = window[1];
        let block_instructions = instructions
            .iter()
            .filter(|inst| inst.offset >= start && inst.offset < end)
            .cloned()
            .collect();
        blocks.push(BasicBlock {
            start_offset: start,
            end_offset: end,
            instructions: block_instructions,
        });
    }
    if let Some(last_start) = leader_list.last().copied() {
        let block_instructions = instructions
            .iter()
            .filter(|inst| inst.offset >= last_start)
            .cloned()
            .collect();
        blocks.push(BasicBlock {
            start_offset: last_start,
            end_offset: code.len() as u32,
            instructions: block_instructions,
        });
    }

    let mut edges = Vec::new();
    for block in &blocks {
        let Some(last_inst) = block.instructions.last() else {
            continue;
        };
        if let Some(targets) = branch_targets(code, last_inst.offset as usize)? {
            for target in targets {
                edges.push(FlowEdge {
                    from: block.start_offset,
                    to: target,
                    kind: EdgeKind::Branch,
                });
            }
            if !is_unconditional_branch(last_inst.opcode) {
                if let Some(next) = next_block_start(&blocks, block.end_offset) {
                    edges.push(FlowEdge {
                        from: block.start_offset,
                        to: next,
                        kind: EdgeKind::FallThrough,
                    });
                }
            }
        } else if !is_exit_opcode(last_inst.opcode) && last_inst.opcode != opcodes::RET {
            if let Some(next) = next_block_start(&blocks, block.end_offset) {
                edges.push(FlowEdge {
                    from: block.start_offset,
                    to: next,
                    kind: EdgeKind::FallThrough,
                });
            }
        }
        for handler in handlers {
            if block.start_offset < handler.end_pc && handler.start_pc < block.end_offset {
                edges.push(FlowEdge {
                    from: block.start_offset,
                    to: handler.handler_pc,
                    kind: EdgeKind::Exception,
                });
            }
        }
    }

    Ok(ControlFlowGraph { blocks, edges })
}

fn next_block_start(blocks: &[BasicBlock], offset: u32) -> Option<u32> {
    blocks
        .iter()
        .find(|block| block.start_offset == offset)
        .map(|block| block.start_offset)
}

pub(crate) fn is_return_opcode(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::IRETURN
            | opcodes::LRETURN
            | opcodes::FRETURN
            | opcodes::DRETURN
            | opcodes::ARETURN
            | opcodes::RETURN
    )
}

fn is_exit_opcode(opcode: u8) -> bool {
    is_return_opcode(opcode) || opcode == opcodes::ATHROW
}

/// `jsr` is left out: its subroutine `ret`s to the following instruction.
fn is_unconditional_branch(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO | opcodes::GOTO_W | opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH
    )
}

fn branch_targets(code: &[u8], offset: usize) -> Result<Option<Vec<u32>>> {
    let opcode = code[offset];
    let targets = match opcode {
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let branch = read_i16(code, offset + 1)?;
            vec![relative_target(offset, branch as i32)?]
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let branch = read_i32(code, offset + 1)?;
            vec![relative_target(offset, branch)?]
        }
        opcodes::TABLESWITCH => tableswitch_targets(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch_targets(code, offset)?,
        _ => return Ok(None),
    };
    Ok(Some(targets))
}

fn relative_target(offset: usize, branch: i32) -> Result<u32> {
    let target = offset as i64 + branch as i64;
    u32::try_from(target).with_context(|| format!("branch target out of range at {offset}"))
}

fn tableswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|v| v.checked_add(1))
        .context("invalid tableswitch range")?;
    let mut targets = vec![relative_target(offset, default)?];
    let mut idx = base + 12;
    for _ in 0..count {
        let target = read_i32(code, idx)?;
        targets.push(relative_target(offset, target)?);
        idx += 4;
    }
    Ok(targets)
}

fn lookupswitch_targets(code: &[u8], offset: usize) -> Result<Vec<u32>> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let npairs = read_i32(code, base + 4)?;
    let mut targets = vec![relative_target(offset, default)?];
    let mut idx = base + 8;
    for _ in 0..npairs {
        let target = read_i32(code, idx + 4)?;
        targets.push(relative_target(offset, target)?);
        idx += 8;
    }
    Ok(targets)
}

fn read_i16(code: &[u8], offset: usize) -> Result<i16> {
    let value = read_u16(code, offset)?;
    Ok(i16::from_be_bytes(value.to_be_bytes()))
}

fn read_i32(code: &[u8], offset: usize) -> Result<i32> {
    let value = read_u32(code, offset)?;
    Ok(i32::from_be_bytes(value.to_be_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstructionKind;

    fn inst(offset: u32, opcode: u8) -> Instruction {
        Instruction {
            offset,
            opcode,
            kind: InstructionKind::Other(opcode),
        }
    }

    #[test]
    fn conditional_branch_splits_blocks_with_both_edges() {
        // 0: aconst_null, 1: ifnonnull +5 -> 6, 4: aconst_null, 5: athrow, 6: return
        let code = vec![
            opcodes::ACONST_NULL,
            opcodes::IFNONNULL,
            0x00,
            0x05,
            opcodes::ACONST_NULL,
            opcodes::ATHROW,
            opcodes::RETURN,
        ];
        let instructions = vec![
            inst(0, opcodes::ACONST_NULL),
            inst(1, opcodes::IFNONNULL),
            inst(4, opcodes::ACONST_NULL),
            inst(5, opcodes::ATHROW),
            inst(6, opcodes::RETURN),
        ];

        let cfg = build_cfg(&code, &instructions, &[]).expect("cfg");

        let starts: Vec<u32> = cfg.blocks.iter().map(|block| block.start_offset).collect();
        assert_eq!(vec![0, 4, 6], starts);
        assert!(cfg
            .edges
            .iter()
            .any(|edge| edge.from == 0 && edge.to == 6 && edge.kind == EdgeKind::Branch));
        assert!(cfg
            .edges
            .iter()
            .any(|edge| edge.from == 0 && edge.to == 4 && edge.kind == EdgeKind::FallThrough));
        assert!(!cfg.edges.iter().any(|edge| edge.from == 4));
    }

    #[test]
    fn protected_ranges_get_exception_edges() {
        // 0: aconst_null, 1: athrow (protected), 2: astore_1 (handler), 3: return
        let code = vec![
            opcodes::ACONST_NULL,
            opcodes::ATHROW,
            opcodes::ASTORE_0 + 1,
            opcodes::RETURN,
        ];
        let instructions = vec![
            inst(0, opcodes::ACONST_NULL),
            inst(1, opcodes::ATHROW),
            inst(2, opcodes::ASTORE_0 + 1),
            inst(3, opcodes::RETURN),
        ];
        let handlers = vec![ExceptionHandler {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: None,
        }];

        let cfg = build_cfg(&code, &instructions, &handlers).expect("cfg");

        assert_eq!(2, cfg.blocks.len());
        assert_eq!(1, cfg.edges.len());
        assert_eq!(EdgeKind::Exception, cfg.edges[0].kind);
        assert_eq!(0, cfg.edges[0].from);
        assert_eq!(2, cfg.edges[0].to);
    }

    #[test]
    fn subroutine_call_continues_at_return_address() {
        // 0: jsr +4 -> 4, 3: return, 4: astore_1, 5: ret 1
        let code = vec![
            opcodes::JSR,
            0x00,
            0x04,
            opcodes::RETURN,
            opcodes::ASTORE_0 + 1,
            opcodes::RET,
            0x01,
        ];
        let instructions = vec![
            inst(0, opcodes::JSR),
            inst(3, opcodes::RETURN),
            inst(4, opcodes::ASTORE_0 + 1),
            inst(5, opcodes::RET),
        ];

        let cfg = build_cfg(&code, &instructions, &[]).expect("cfg");

        assert!(cfg
            .edges
            .iter()
            .any(|edge| edge.from == 0 && edge.to == 4 && edge.kind == EdgeKind::Branch));
        assert!(cfg
            .edges
            .iter()
            .any(|edge| edge.from == 0 && edge.to == 3 && edge.kind == EdgeKind::FallThrough));
        assert!(!cfg.edges.iter().any(|edge| edge.from == 4));
    }

    #[test]
    fn empty_code_has_no_blocks() {
        let cfg = build_cfg(&[], &[], &[]).expect("cfg");

        assert!(cfg.blocks.is_empty());
        assert!(cfg.edges.is_empty());
    }
}
