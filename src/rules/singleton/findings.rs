use super::evidence::{EvidenceRecord, MethodLocator};

/// Defect categories reported for broken singletons.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub(crate) enum FindingCategory {
    NonprivateConstructor,
    GetterNotSynchronized,
    ImplementsCloneable,
    IndirectlyImplementsCloneable,
    ImplementsCloneMethod,
    ImplementsSerializable,
}

impl FindingCategory {
    pub(crate) const ALL: [FindingCategory; 6] = [
        FindingCategory::NonprivateConstructor,
        FindingCategory::GetterNotSynchronized,
        FindingCategory::ImplementsCloneable,
        FindingCategory::IndirectlyImplementsCloneable,
        FindingCategory::ImplementsCloneMethod,
        FindingCategory::ImplementsSerializable,
    ];

    pub(crate) fn code(self) -> &'static str {
        match self {
            FindingCategory::NonprivateConstructor => "NONPRIVATE_CONSTRUCTOR",
            FindingCategory::GetterNotSynchronized => "GETTER_NOT_SYNCHRONIZED",
            FindingCategory::ImplementsCloneable => "IMPLEMENTS_CLONEABLE",
            FindingCategory::IndirectlyImplementsCloneable => "INDIRECTLY_IMPLEMENTS_CLONEABLE",
            FindingCategory::ImplementsCloneMethod => "IMPLEMENTS_CLONE_METHOD",
            FindingCategory::ImplementsSerializable => "IMPLEMENTS_SERIALIZABLE",
        }
    }

    /// SARIF rule id: the category code under the `SINGLETON_` prefix.
    pub(crate) fn rule_id(self) -> &'static str {
        match self {
            FindingCategory::NonprivateConstructor => "SINGLETON_NONPRIVATE_CONSTRUCTOR",
            FindingCategory::GetterNotSynchronized => "SINGLETON_GETTER_NOT_SYNCHRONIZED",
            FindingCategory::ImplementsCloneable => "SINGLETON_IMPLEMENTS_CLONEABLE",
            FindingCategory::IndirectlyImplementsCloneable => {
                "SINGLETON_INDIRECTLY_IMPLEMENTS_CLONEABLE"
            }
            FindingCategory::ImplementsCloneMethod => "SINGLETON_IMPLEMENTS_CLONE_METHOD",
            FindingCategory::ImplementsSerializable => "SINGLETON_IMPLEMENTS_SERIALIZABLE",
        }
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            FindingCategory::NonprivateConstructor => {
                "Singleton has a non-private constructor, so more instances can be created"
            }
            FindingCategory::GetterNotSynchronized => {
                "Singleton instance getter is neither synchronized nor guarded by a lock"
            }
            FindingCategory::ImplementsCloneable => {
                "Singleton implements Cloneable, so the instance can be copied"
            }
            FindingCategory::IndirectlyImplementsCloneable => {
                "Singleton inherits Cloneable and clone() does not reject copying"
            }
            FindingCategory::ImplementsCloneMethod => {
                "Singleton declares clone() that does not throw CloneNotSupportedException"
            }
            FindingCategory::ImplementsSerializable => {
                "Singleton is Serializable, so deserialization creates new instances"
            }
        }
    }
}

/// One reported defect.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Finding {
    pub(crate) category: FindingCategory,
    pub(crate) class_name: String,
    /// Class-level findings carry no method.
    pub(crate) method: Option<MethodLocator>,
}

impl Finding {
    fn new(
        category: FindingCategory,
        record: &EvidenceRecord,
        method: Option<&MethodLocator>,
    ) -> Self {
        Self {
            category,
            class_name: record.class_name.clone(),
            method: method.cloned(),
        }
    }
}

/// Derive findings from a frozen evidence record. Pure and deterministic.
pub(crate) fn synthesize(record: &EvidenceRecord) -> Vec<Finding> {
    let mut findings = Vec::new();
    if !record.is_candidate {
        return findings;
    }

    if let Some(constructor) = record
        .constructors
        .iter()
        .find(|constructor| !constructor.is_private)
    {
        findings.push(Finding::new(
            FindingCategory::NonprivateConstructor,
            record,
            Some(&constructor.method),
        ));
    }

    if let Some(getter) = &record.instance_getter {
        // Locking narrower than the whole method is accepted as-is.
        if !getter.is_synchronized && !record.locking_methods.contains(&getter.method) {
            findings.push(Finding::new(
                FindingCategory::GetterNotSynchronized,
                record,
                Some(&getter.method),
            ));
        }
    }

    if record.cloneable {
        if record.directly_cloneable {
            findings.push(Finding::new(
                FindingCategory::ImplementsCloneable,
                record,
                record.clone_method.as_ref(),
            ));
        } else if !record.clone_throws_designated {
            findings.push(Finding::new(
                FindingCategory::IndirectlyImplementsCloneable,
                record,
                None,
            ));
        }
    } else if record.clone_method.is_some() && !record.clone_throws_designated {
        findings.push(Finding::new(
            FindingCategory::ImplementsCloneMethod,
            record,
            record.clone_method.as_ref(),
        ));
    }

    if record.serializable && (!record.is_enum || record.enum_constant_count > 0) {
        findings.push(Finding::new(
            FindingCategory::ImplementsSerializable,
            record,
            None,
        ));
    }

    findings
}
