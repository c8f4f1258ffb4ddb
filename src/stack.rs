use std::collections::{BTreeMap, VecDeque};

use anyhow::{Context, Result};

use crate::descriptor::{class_descriptor, is_wide, method_descriptor_summary};
use crate::ir::{CallKind, EdgeKind, FieldRef, Instruction, InstructionKind, Method};
use crate::opcodes;

const THROWABLE: &str = "Ljava/lang/Throwable;";

/// Operand stack entry with the origin metadata the rules inspect.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct StackValue {
    /// Field descriptor of the value's type, when known.
    pub(crate) descriptor: Option<String>,
    /// Field the value was read from.
    pub(crate) field: Option<FieldRef>,
    /// Long and double values occupy two slots.
    pub(crate) wide: bool,
}

impl StackValue {
    fn unknown() -> Self {
        Self::default()
    }

    fn unknown_wide() -> Self {
        Self {
            wide: true,
            ..Self::default()
        }
    }

    fn of_type(descriptor: &str) -> Self {
        Self {
            descriptor: Some(descriptor.to_string()),
            field: None,
            wide: is_wide(descriptor),
        }
    }

    fn from_field(field: &FieldRef) -> Self {
        Self {
            descriptor: Some(field.descriptor.clone()),
            field: Some(field.clone()),
            wide: is_wide(&field.descriptor),
        }
    }

    fn join(&self, other: &StackValue) -> StackValue {
        if self == other {
            return self.clone();
        }
        StackValue {
            descriptor: if self.descriptor == other.descriptor {
                self.descriptor.clone()
            } else {
                None
            },
            field: None,
            wide: self.wide,
        }
    }
}

/// Top-of-stack value seen by an instruction that consumes it.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct OperandObservation {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    /// `None` when the stack is empty or paths disagree on its height.
    pub(crate) top: Option<StackValue>,
}

/// Locals and operand stack at a program point.
#[derive(Clone, Debug, Default, PartialEq)]
struct Frame {
    locals: BTreeMap<u16, StackValue>,
    stack: Vec<StackValue>,
}

impl Frame {
    fn push(&mut self, value: StackValue) {
        self.stack.push(value);
    }

    fn push_type(&mut self, descriptor: &str) {
        self.stack.push(StackValue::of_type(descriptor));
    }

    fn pop(&mut self) -> StackValue {
        self.stack.pop().unwrap_or_default()
    }

    fn pop_n(&mut self, count: usize) {
        for _ in 0..count {
            self.pop();
        }
    }

    fn load(&mut self, index: u16) {
        let value = self.locals.get(&index).cloned().unwrap_or_default();
        self.stack.push(value);
    }

    fn store(&mut self, index: u16) {
        let value = self.pop();
        if value.wide {
            self.locals.remove(&(index + 1));
        }
        self.locals.insert(index, value);
    }

    fn join(&self, other: &Frame) -> Frame {
        let locals = self
            .locals
            .iter()
            .filter_map(|(index, value)| {
                other
                    .locals
                    .get(index)
                    .map(|other_value| (*index, value.join(other_value)))
            })
            .collect();
        let stack = if self.stack.len() == other.stack.len() {
            self.stack
                .iter()
                .zip(other.stack.iter())
                .map(|(left, right)| left.join(right))
                .collect()
        } else {
            Vec::new()
        };
        Frame { locals, stack }
    }
}

/// Is this one of the instructions whose consumed operand is reported?
fn is_observed(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::ARETURN | opcodes::ATHROW | opcodes::MONITORENTER
    )
}

/// Walk the method's CFG and report the top-of-stack value at every
/// `areturn`, `athrow` and `monitorenter` reachable from the entry block.
pub(crate) fn operand_observations(method: &Method) -> Result<Vec<OperandObservation>> {
    let mut block_map = BTreeMap::new();
    for block in &method.cfg.blocks {
        block_map.insert(block.start_offset, block);
    }
    let mut successors: BTreeMap<u32, Vec<(u32, EdgeKind)>> = BTreeMap::new();
    for edge in &method.cfg.edges {
        successors
            .entry(edge.from)
            .or_default()
            .push((edge.to, edge.kind));
    }
    let mut caught: BTreeMap<u32, String> = BTreeMap::new();
    for handler in &method.exception_handlers {
        let descriptor = handler
            .catch_type
            .as_deref()
            .map(class_descriptor)
            .unwrap_or_else(|| THROWABLE.to_string());
        caught
            .entry(handler.handler_pc)
            .and_modify(|existing| {
                if *existing != descriptor {
                    *existing = THROWABLE.to_string();
                }
            })
            .or_insert(descriptor);
    }

    let mut observed: BTreeMap<u32, OperandObservation> = BTreeMap::new();
    let mut in_states: BTreeMap<u32, Frame> = BTreeMap::new();
    let mut worklist = VecDeque::new();
    if block_map.contains_key(&0) {
        in_states.insert(0, Frame::default());
        worklist.push_back(0u32);
    }

    while let Some(block_start) = worklist.pop_front() {
        let Some(block) = block_map.get(&block_start) else {
            continue;
        };
        let in_state = in_states.get(&block_start).cloned().unwrap_or_default();
        let mut state = in_state.clone();
        for inst in &block.instructions {
            if is_observed(inst.opcode) {
                let observation = OperandObservation {
                    offset: inst.offset,
                    opcode: inst.opcode,
                    top: state.stack.last().cloned(),
                };
                observed
                    .entry(inst.offset)
                    .and_modify(|existing| {
                        existing.top = match (&existing.top, &observation.top) {
                            (Some(left), Some(right)) => Some(left.join(right)),
                            _ => None,
                        };
                    })
                    .or_insert(observation);
            }
            transfer(&mut state, inst)?;
        }

        let Some(succs) = successors.get(&block_start) else {
            continue;
        };
        for (succ, kind) in succs {
            let next_state = match kind {
                EdgeKind::Exception => {
                    let descriptor = caught
                        .get(succ)
                        .cloned()
                        .unwrap_or_else(|| THROWABLE.to_string());
                    Frame {
                        locals: in_state.join(&state).locals,
                        stack: vec![StackValue::of_type(&descriptor)],
                    }
                }
                EdgeKind::Branch | EdgeKind::FallThrough => state.clone(),
            };
            let updated = match in_states.get(succ) {
                Some(existing) => existing.join(&next_state),
                None => next_state,
            };
            let should_push = match in_states.get(succ) {
                Some(existing) => &updated != existing,
                None => true,
            };
            in_states.insert(*succ, updated);
            if should_push {
                worklist.push_back(*succ);
            }
        }
    }

    Ok(observed.into_values().collect())
}

fn transfer(state: &mut Frame, inst: &Instruction) -> Result<()> {
    let opcode = inst.opcode;
    match opcode {
        opcodes::ACONST_NULL => state.push(StackValue::unknown()),
        opcodes::ICONST_M1..=opcodes::ICONST_5 | opcodes::BIPUSH | opcodes::SIPUSH => {
            state.push_type("I")
        }
        opcodes::LCONST_0 | opcodes::LCONST_1 => state.push_type("J"),
        opcodes::FCONST_0..=opcodes::FCONST_2 => state.push_type("F"),
        opcodes::DCONST_0 | opcodes::DCONST_1 => state.push_type("D"),
        opcodes::LDC | opcodes::LDC_W => match &inst.kind {
            InstructionKind::ConstString => state.push_type("Ljava/lang/String;"),
            _ => state.push(StackValue::unknown()),
        },
        opcodes::LDC2_W => state.push(StackValue::unknown_wide()),
        opcodes::ILOAD..=opcodes::DLOAD => state.push_type(primitive_for(opcode - opcodes::ILOAD)),
        opcodes::ALOAD => state.load(local_index(inst)),
        opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
            let relative = opcode - opcodes::ILOAD_0;
            let index = u16::from(relative % 4);
            match relative / 4 {
                4 => state.load(index),
                group => state.push_type(primitive_for(group)),
            }
        }
        opcodes::IALOAD..=opcodes::SALOAD => {
            state.pop();
            let array = state.pop();
            let component = match opcode {
                opcodes::AALOAD => array
                    .descriptor
                    .as_deref()
                    .and_then(|descriptor| descriptor.strip_prefix('['))
                    .map(StackValue::of_type)
                    .unwrap_or_default(),
                opcodes::LALOAD => StackValue::of_type("J"),
                opcodes::DALOAD => StackValue::of_type("D"),
                opcodes::FALOAD => StackValue::of_type("F"),
                _ => StackValue::of_type("I"),
            };
            state.push(component);
        }
        opcodes::ISTORE..=opcodes::ASTORE => state.store(local_index(inst)),
        opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
            state.store(u16::from((opcode - opcodes::ISTORE_0) % 4));
        }
        opcodes::IASTORE..=opcodes::SASTORE => state.pop_n(3),
        opcodes::POP => {
            state.pop();
        }
        opcodes::POP2 => {
            if !state.pop().wide {
                state.pop();
            }
        }
        opcodes::DUP..=opcodes::SWAP => duplicate(state, opcode),
        opcodes::IADD..=opcodes::DREM => {
            state.pop_n(2);
            state.push_type(primitive_for((opcode - opcodes::IADD) % 4));
        }
        opcodes::INEG..=opcodes::DNEG => {
            state.pop();
            state.push_type(primitive_for(opcode - opcodes::INEG));
        }
        opcodes::ISHL..=opcodes::LXOR => {
            state.pop_n(2);
            state.push_type(if (opcode - opcodes::ISHL) % 2 == 0 { "I" } else { "J" });
        }
        opcodes::IINC => {
            state.locals.insert(local_index(inst), StackValue::of_type("I"));
        }
        opcodes::I2L..=opcodes::I2S => {
            state.pop();
            state.push_type(conversion_result(opcode));
        }
        opcodes::LCMP..=opcodes::DCMPG => {
            state.pop_n(2);
            state.push_type("I");
        }
        opcodes::IFEQ..=opcodes::IFLE
        | opcodes::IFNULL
        | opcodes::IFNONNULL
        | opcodes::TABLESWITCH
        | opcodes::LOOKUPSWITCH => {
            state.pop();
        }
        opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => state.pop_n(2),
        opcodes::JSR | opcodes::JSR_W => state.push(StackValue::unknown()),
        opcodes::IRETURN..=opcodes::ARETURN | opcodes::ATHROW => {
            state.stack.clear();
        }
        opcodes::GETSTATIC | opcodes::GETFIELD => {
            if opcode == opcodes::GETFIELD {
                state.pop();
            }
            match &inst.kind {
                InstructionKind::FieldAccess(field) => state.push(StackValue::from_field(field)),
                _ => state.push(StackValue::unknown()),
            }
        }
        opcodes::PUTSTATIC => {
            state.pop();
        }
        opcodes::PUTFIELD => state.pop_n(2),
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKEDYNAMIC => {
            let InstructionKind::Invoke(call) = &inst.kind else {
                anyhow::bail!("invoke at offset {} has no call site", inst.offset);
            };
            let summary = method_descriptor_summary(&call.descriptor).with_context(|| {
                format!("call to {}.{} at offset {}", call.owner, call.name, inst.offset)
            })?;
            state.pop_n(summary.param_count);
            if !matches!(call.kind, CallKind::Static | CallKind::Dynamic) {
                state.pop();
            }
            if let Some(return_type) = summary.return_type {
                state.push_type(&return_type);
            }
        }
        opcodes::NEW => match &inst.kind {
            InstructionKind::TypeRef(name) => state.push_type(&class_descriptor(name)),
            _ => state.push(StackValue::unknown()),
        },
        opcodes::NEWARRAY => {
            state.pop();
            state.push(StackValue::unknown());
        }
        opcodes::ANEWARRAY => {
            state.pop();
            match &inst.kind {
                InstructionKind::TypeRef(name) => {
                    state.push_type(&format!("[{}", class_descriptor(name)))
                }
                _ => state.push(StackValue::unknown()),
            }
        }
        opcodes::ARRAYLENGTH | opcodes::INSTANCEOF => {
            state.pop();
            state.push_type("I");
        }
        opcodes::CHECKCAST => {
            let value = state.pop();
            let descriptor = match &inst.kind {
                InstructionKind::TypeRef(name) => Some(class_descriptor(name)),
                _ => value.descriptor,
            };
            state.push(StackValue {
                descriptor,
                field: value.field,
                wide: false,
            });
        }
        opcodes::MONITORENTER | opcodes::MONITOREXIT => {
            state.pop();
        }
        opcodes::MULTIANEWARRAY => match &inst.kind {
            InstructionKind::MultiNewArray {
                descriptor,
                dimensions,
            } => {
                state.pop_n(usize::from(*dimensions));
                state.push_type(descriptor);
            }
            _ => state.push(StackValue::unknown()),
        },
        _ => {}
    }
    Ok(())
}

/// Stack shuffles, applied on values with their computational category.
fn duplicate(state: &mut Frame, opcode: u8) {
    let v1 = state.pop();
    match opcode {
        opcodes::DUP => {
            state.push(v1.clone());
            state.push(v1);
        }
        opcodes::DUP_X1 => {
            let v2 = state.pop();
            state.stack.extend([v1.clone(), v2, v1]);
        }
        opcodes::DUP_X2 => {
            let v2 = state.pop();
            if v2.wide {
                state.stack.extend([v1.clone(), v2, v1]);
            } else {
                let v3 = state.pop();
                state.stack.extend([v1.clone(), v3, v2, v1]);
            }
        }
        opcodes::DUP2 => {
            if v1.wide {
                state.stack.extend([v1.clone(), v1]);
            } else {
                let v2 = state.pop();
                state.stack.extend([v2.clone(), v1.clone(), v2, v1]);
            }
        }
        opcodes::DUP2_X1 => {
            if v1.wide {
                let v2 = state.pop();
                state.stack.extend([v1.clone(), v2, v1]);
            } else {
                let v2 = state.pop();
                let v3 = state.pop();
                state
                    .stack
                    .extend([v2.clone(), v1.clone(), v3, v2, v1]);
            }
        }
        opcodes::DUP2_X2 => {
            if v1.wide {
                let v2 = state.pop();
                if v2.wide {
                    state.stack.extend([v1.clone(), v2, v1]);
                } else {
                    let v3 = state.pop();
                    state.stack.extend([v1.clone(), v3, v2, v1]);
                }
            } else {
                let v2 = state.pop();
                let v3 = state.pop();
                if v3.wide {
                    state
                        .stack
                        .extend([v2.clone(), v1.clone(), v3, v2, v1]);
                } else {
                    let v4 = state.pop();
                    state
                        .stack
                        .extend([v2.clone(), v1.clone(), v4, v3, v2, v1]);
                }
            }
        }
        _ => {
            // swap
            let v2 = state.pop();
            state.stack.extend([v1, v2]);
        }
    }
}

fn local_index(inst: &Instruction) -> u16 {
    match inst.kind {
        InstructionKind::LocalVar(index) => index,
        _ => 0,
    }
}

/// Descriptor for the int/long/float/double/reference opcode groups.
fn primitive_for(group: u8) -> &'static str {
    match group {
        0 => "I",
        1 => "J",
        2 => "F",
        _ => "D",
    }
}

fn conversion_result(opcode: u8) -> &'static str {
    match opcode - opcodes::I2L {
        0 | 7 | 10 => "J",
        1 | 4 | 11 => "F",
        2 | 5 | 8 => "D",
        _ => "I",
    }
}
