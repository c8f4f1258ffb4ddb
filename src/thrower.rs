use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::cfg::is_return_opcode;
use crate::ir::Method;

/// Answers whether every path through a method body ends by raising.
pub(crate) trait ThrowOracle {
    fn throws_unconditionally(&self, method: &Method) -> bool;
}

/// Oracle backed by the method's control flow graph: a method throws
/// unconditionally when no return instruction is reachable from its entry.
#[derive(Debug, Default)]
pub(crate) struct CfgThrowOracle;

impl ThrowOracle for CfgThrowOracle {
    fn throws_unconditionally(&self, method: &Method) -> bool {
        if method.access.is_abstract || method.cfg.blocks.is_empty() {
            return false;
        }
        let mut successors: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for edge in &method.cfg.edges {
            successors.entry(edge.from).or_default().push(edge.to);
        }
        let blocks: BTreeMap<u32, _> = method
            .cfg
            .blocks
            .iter()
            .map(|block| (block.start_offset, block))
            .collect();

        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([0u32]);
        while let Some(start) = queue.pop_front() {
            if !visited.insert(start) {
                continue;
            }
            let Some(block) = blocks.get(&start) else {
                continue;
            };
            if block
                .instructions
                .iter()
                .any(|inst| is_return_opcode(inst.opcode))
            {
                return false;
            }
            if let Some(next) = successors.get(&start) {
                queue.extend(next.iter().copied());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::build_cfg;
    use crate::ir::{ExceptionHandler, Instruction, InstructionKind, MethodAccess};
    use crate::opcodes;

    fn method_with(code: Vec<u8>, handlers: Vec<ExceptionHandler>) -> Method {
        let mut instructions = Vec::new();
        let mut offset = 0usize;
        while offset < code.len() {
            let opcode = code[offset];
            instructions.push(Instruction {
                offset: offset as u32,
                opcode,
                kind: InstructionKind::Other(opcode),
            });
            offset += crate::scan::opcode_length(&code, offset).expect("length");
        }
        let cfg = build_cfg(&code, &instructions, &handlers).expect("cfg");
        Method {
            name: "clone".to_string(),
            descriptor: "()Ljava/lang/Object;".to_string(),
            access: MethodAccess::default(),
            cfg,
            exception_handlers: handlers,
        }
    }

    #[test]
    fn body_without_return_throws_unconditionally() {
        let method = method_with(vec![opcodes::ACONST_NULL, opcodes::ATHROW], Vec::new());

        assert!(CfgThrowOracle.throws_unconditionally(&method));
    }

    #[test]
    fn reachable_return_on_one_branch_is_not_unconditional() {
        // 0: iload_0, 1: ifeq -> 6, 4: aconst_null, 5: athrow, 6: aconst_null, 7: areturn
        let method = method_with(
            vec![
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                5,
                opcodes::ACONST_NULL,
                opcodes::ATHROW,
                opcodes::ACONST_NULL,
                opcodes::ARETURN,
            ],
            Vec::new(),
        );

        assert!(!CfgThrowOracle.throws_unconditionally(&method));
    }

    #[test]
    fn return_inside_handler_is_reachable() {
        // 0: aconst_null, 1: athrow (protected), 2: aconst_null, 3: areturn (handler)
        let method = method_with(
            vec![
                opcodes::ACONST_NULL,
                opcodes::ATHROW,
                opcodes::ACONST_NULL,
                opcodes::ARETURN,
            ],
            vec![ExceptionHandler {
                start_pc: 0,
                end_pc: 2,
                handler_pc: 2,
                catch_type: None,
            }],
        );

        assert!(!CfgThrowOracle.throws_unconditionally(&method));
    }

    #[test]
    fn return_after_finally_subroutine_is_reachable() {
        // 0: jsr -> 5, 3: aconst_null, 4: areturn, 5: astore_1, 6: ret 1
        let method = method_with(
            vec![
                opcodes::JSR,
                0,
                5,
                opcodes::ACONST_NULL,
                opcodes::ARETURN,
                opcodes::ASTORE_0 + 1,
                opcodes::RET,
                1,
            ],
            Vec::new(),
        );

        assert!(!CfgThrowOracle.throws_unconditionally(&method));
    }

    #[test]
    fn unreachable_return_is_ignored() {
        // 0: aconst_null, 1: athrow, 2: aconst_null (dead), 3: areturn (dead)
        let method = method_with(
            vec![
                opcodes::ACONST_NULL,
                opcodes::ATHROW,
                opcodes::ACONST_NULL,
                opcodes::ARETURN,
            ],
            Vec::new(),
        );

        assert!(CfgThrowOracle.throws_unconditionally(&method));
    }

    #[test]
    fn methods_without_code_never_throw_unconditionally() {
        let method = method_with(Vec::new(), Vec::new());

        assert!(!CfgThrowOracle.throws_unconditionally(&method));
    }
}
