use std::collections::BTreeSet;

use tracing::warn;

use crate::classpath::InterfaceClosure;
use crate::ir::{Class, Method};
use crate::markers::CapabilityMarkers;
use crate::opcodes;
use crate::stack::OperandObservation;
use crate::thrower::ThrowOracle;

const NAMING_SUFFIX: &str = "Singleton";
const CLONE_NAME: &str = "clone";
const CLONE_DESCRIPTOR: &str = "()Ljava/lang/Object;";

/// Identity of a method within its class.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) struct MethodLocator {
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl MethodLocator {
    fn of(method: &Method) -> Self {
        Self {
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ConstructorEvidence {
    pub(crate) method: MethodLocator,
    pub(crate) is_private: bool,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct GetterEvidence {
    pub(crate) method: MethodLocator,
    pub(crate) is_synchronized: bool,
}

/// Everything observed about one class, frozen once traversal ends.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct EvidenceRecord {
    pub(crate) class_name: String,
    pub(crate) is_candidate: bool,
    pub(crate) directly_cloneable: bool,
    pub(crate) cloneable: bool,
    pub(crate) serializable: bool,
    pub(crate) is_enum: bool,
    pub(crate) enum_constant_count: usize,
    /// Unique by name and descriptor, in encounter order.
    pub(crate) constructors: Vec<ConstructorEvidence>,
    pub(crate) clone_method: Option<MethodLocator>,
    pub(crate) clone_throws_unconditionally: bool,
    pub(crate) clone_throws_designated: bool,
    pub(crate) instance_getter: Option<GetterEvidence>,
    pub(crate) locking_methods: BTreeSet<MethodLocator>,
}

/// Per-class accumulator fed by the class traversal.
///
/// Call order is `enter`, then for each method `observe_method` followed by
/// `observe_instruction` for its observed instructions, then `exit`.
pub(crate) struct SingletonEvidence<'a> {
    class: &'a Class,
    markers: &'a CapabilityMarkers,
    oracle: &'a dyn ThrowOracle,
    record: EvidenceRecord,
}

impl<'a> SingletonEvidence<'a> {
    pub(crate) fn enter(
        class: &'a Class,
        closure: &InterfaceClosure,
        markers: &'a CapabilityMarkers,
        oracle: &'a dyn ThrowOracle,
    ) -> Self {
        if !closure.missing.is_empty() {
            warn!(
                class = %class.name,
                missing = ?closure.missing,
                "unresolved supertypes; interface checks use the partial hierarchy"
            );
        }
        let record = EvidenceRecord {
            class_name: class.name.clone(),
            is_candidate: class.name.ends_with(NAMING_SUFFIX),
            directly_cloneable: closure.directly_implements(markers.cloneable),
            cloneable: closure.implements(markers.cloneable),
            serializable: closure.implements(markers.serializable),
            is_enum: class.access.is_enum,
            enum_constant_count: class.enum_constant_count,
            ..EvidenceRecord::default()
        };
        Self {
            class,
            markers,
            oracle,
            record,
        }
    }

    pub(crate) fn observe_method(&mut self, method: &Method) {
        let locator = MethodLocator::of(method);
        if method.is_constructor()
            && !self
                .record
                .constructors
                .iter()
                .any(|constructor| constructor.method == locator)
        {
            self.record.constructors.push(ConstructorEvidence {
                method: locator.clone(),
                is_private: method.access.is_private,
            });
        }
        if is_clone_signature(method) && self.record.clone_method.is_none() {
            self.record.clone_throws_unconditionally = self.oracle.throws_unconditionally(method);
            self.record.clone_method = Some(locator);
        }
    }

    pub(crate) fn observe_instruction(&mut self, method: &Method, observation: &OperandObservation) {
        match observation.opcode {
            opcodes::ATHROW => self.observe_throw(method, observation),
            opcodes::ARETURN => self.observe_return(method, observation),
            opcodes::MONITORENTER => {
                self.record.locking_methods.insert(MethodLocator::of(method));
            }
            _ => {}
        }
    }

    fn observe_throw(&mut self, method: &Method, observation: &OperandObservation) {
        if !self.record.clone_throws_unconditionally {
            return;
        }
        let in_clone = self
            .record
            .clone_method
            .as_ref()
            .is_some_and(|clone| *clone == MethodLocator::of(method));
        if !in_clone {
            return;
        }
        let thrown = observation
            .top
            .as_ref()
            .and_then(|value| value.descriptor.as_deref());
        if thrown == Some(self.markers.clone_not_supported_descriptor().as_str()) {
            self.record.clone_throws_designated = true;
        }
    }

    fn observe_return(&mut self, method: &Method, observation: &OperandObservation) {
        let Some(field_ref) = observation
            .top
            .as_ref()
            .and_then(|value| value.field.as_ref())
        else {
            return;
        };
        if field_ref.owner != self.class.name {
            return;
        }
        let Some(field) = self
            .class
            .find_field(&field_ref.name, &field_ref.descriptor)
        else {
            return;
        };
        if !(field.access.is_private
            && field.access.is_static
            && field.descriptor == self.class.type_descriptor())
        {
            return;
        }
        self.record.is_candidate = true;
        if self.record.instance_getter.is_none() {
            self.record.instance_getter = Some(GetterEvidence {
                method: MethodLocator::of(method),
                is_synchronized: method.access.is_synchronized,
            });
        }
    }

    pub(crate) fn exit(self) -> EvidenceRecord {
        self.record
    }
}

fn is_clone_signature(method: &Method) -> bool {
    method.name == CLONE_NAME && method.descriptor == CLONE_DESCRIPTOR
}
