/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) access: ClassAccess,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
    /// Number of fields declared with `ACC_ENUM`; zero for non-enum classes.
    pub(crate) enum_constant_count: usize,
    pub(crate) artifact_index: i64,
}

impl Class {
    pub(crate) fn find_field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        self.fields
            .iter()
            .find(|field| field.name == name && field.descriptor == descriptor)
    }

    /// Field descriptor naming this class, e.g. `Lcom/example/Foo;`.
    pub(crate) fn type_descriptor(&self) -> String {
        format!("L{};", self.name)
    }
}

/// Class access flags used for rule filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ClassAccess {
    pub(crate) is_enum: bool,
}

/// Field declaration with the modifiers rules care about.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: FieldAccess,
}

/// Field access flags used for rule filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct FieldAccess {
    pub(crate) is_private: bool,
    pub(crate) is_static: bool,
    pub(crate) is_enum: bool,
}

/// Intermediate representation for a method and its decoded body.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) cfg: ControlFlowGraph,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    pub(crate) fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }
}

/// Method access flags used for rule filtering.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MethodAccess {
    pub(crate) is_private: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_synchronized: bool,
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u32,
    pub(crate) end_pc: u32,
    pub(crate) handler_pc: u32,
    pub(crate) catch_type: Option<String>,
}

/// Basic block graph for method bytecode.
#[derive(Clone, Debug, Default)]
pub(crate) struct ControlFlowGraph {
    pub(crate) blocks: Vec<BasicBlock>,
    pub(crate) edges: Vec<FlowEdge>,
}

/// Basic block covering a range of bytecode offsets.
#[derive(Clone, Debug)]
pub(crate) struct BasicBlock {
    pub(crate) start_offset: u32,
    pub(crate) end_offset: u32,
    pub(crate) instructions: Vec<Instruction>,
}

/// Edge between basic blocks.
#[derive(Clone, Debug)]
pub(crate) struct FlowEdge {
    pub(crate) from: u32,
    pub(crate) to: u32,
    pub(crate) kind: EdgeKind,
}

/// Edge classification used for CFG inspection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum EdgeKind {
    FallThrough,
    Branch,
    Exception,
}

/// Bytecode instruction captured for analysis.
///
/// For `wide`-prefixed instructions `opcode` is the modified opcode and the
/// widened local index lives in `kind`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

/// Operand details of an instruction.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum InstructionKind {
    Invoke(CallSite),
    FieldAccess(FieldRef),
    /// `new`, `checkcast`, `instanceof` and `anewarray` operand, as an internal name.
    TypeRef(String),
    MultiNewArray {
        descriptor: String,
        dimensions: u8,
    },
    LocalVar(u16),
    /// `ldc` of a string constant.
    ConstString,
    Other(u8),
}

/// Symbolic field reference from the constant pool.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
    Dynamic,
}
