use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::debug;

use crate::ir::Class;

/// Supertype index over every scanned class, used to resolve interface closures.
#[derive(Debug, Default)]
pub(crate) struct ClassPath {
    types: BTreeMap<String, TypeEntry>,
}

#[derive(Debug)]
struct TypeEntry {
    super_name: Option<String>,
    interfaces: Vec<String>,
}

/// Interfaces reachable from a class through superclasses and superinterfaces.
#[derive(Debug, Default, Eq, PartialEq)]
pub(crate) struct InterfaceClosure {
    /// Interfaces listed on the class itself.
    pub(crate) direct: BTreeSet<String>,
    /// Every interface found, direct ones included.
    pub(crate) all: BTreeSet<String>,
    /// Supertypes that could not be resolved; the closure is partial when non-empty.
    pub(crate) missing: Vec<String>,
}

impl InterfaceClosure {
    pub(crate) fn directly_implements(&self, interface: &str) -> bool {
        self.direct.contains(interface)
    }

    pub(crate) fn implements(&self, interface: &str) -> bool {
        self.all.contains(interface)
    }
}

pub(crate) fn resolve_classpath(classes: &[Class]) -> ClassPath {
    let mut types = BTreeMap::new();
    for class in classes {
        if types.contains_key(&class.name) {
            debug!(class = %class.name, "duplicate class definition ignored");
            continue;
        }
        types.insert(
            class.name.clone(),
            TypeEntry {
                super_name: class.super_name.clone(),
                interfaces: class.interfaces.clone(),
            },
        );
    }
    ClassPath { types }
}

impl ClassPath {
    pub(crate) fn interface_closure(&self, class: &Class) -> InterfaceClosure {
        let mut closure = InterfaceClosure {
            direct: class.interfaces.iter().cloned().collect(),
            ..InterfaceClosure::default()
        };
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::new();
        for interface in &class.interfaces {
            closure.all.insert(interface.clone());
            queue.push_back(interface.clone());
        }
        if let Some(super_name) = &class.super_name {
            queue.push_back(super_name.clone());
        }

        while let Some(name) = queue.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let (super_name, interfaces) = match self.types.get(&name) {
                Some(entry) => (
                    entry.super_name.clone(),
                    entry.interfaces.iter().cloned().collect::<Vec<_>>(),
                ),
                None => match platform_supertypes(&name) {
                    Some((super_name, interfaces)) => (
                        super_name.map(str::to_string),
                        interfaces.iter().map(|name| name.to_string()).collect(),
                    ),
                    None => {
                        closure.missing.push(name);
                        continue;
                    }
                },
            };
            for interface in interfaces {
                closure.all.insert(interface.clone());
                queue.push_back(interface);
            }
            if let Some(super_name) = super_name {
                queue.push_back(super_name);
            }
        }

        closure
    }
}

/// Supertypes of JDK types that commonly sit above application classes but
/// are rarely on the analysis classpath.
fn platform_supertypes(name: &str) -> Option<(Option<&'static str>, &'static [&'static str])> {
    const OBJECT: Option<&str> = Some("java/lang/Object");
    const NO_INTERFACES: &[&str] = &[];
    const SERIALIZABLE: &[&str] = &["java/io/Serializable"];
    const ENUM_INTERFACES: &[&str] = &["java/lang/Comparable", "java/io/Serializable"];

    let entry = match name {
        "java/lang/Object" => (None, NO_INTERFACES),
        "java/lang/Enum" => (OBJECT, ENUM_INTERFACES),
        "java/lang/Record" => (OBJECT, NO_INTERFACES),
        "java/lang/Number" | "java/lang/Throwable" => (OBJECT, SERIALIZABLE),
        "java/lang/Exception" | "java/lang/Error" => (Some("java/lang/Throwable"), NO_INTERFACES),
        "java/lang/RuntimeException" => (Some("java/lang/Exception"), NO_INTERFACES),
        "java/lang/Cloneable" | "java/io/Serializable" | "java/lang/Comparable" => {
            (None, NO_INTERFACES)
        }
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ClassAccess;

    fn class_with_supertypes(name: &str, super_name: Option<&str>, interfaces: &[&str]) -> Class {
        Class {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            interfaces: interfaces.iter().map(|name| name.to_string()).collect(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            enum_constant_count: 0,
            artifact_index: 0,
        }
    }

    #[test]
    fn closure_includes_interfaces_of_superclasses_and_superinterfaces() {
        let classes = vec![
            class_with_supertypes("com/example/Leaf", Some("com/example/Base"), &[]),
            class_with_supertypes(
                "com/example/Base",
                Some("java/lang/Object"),
                &["com/example/Marker"],
            ),
            class_with_supertypes("com/example/Marker", None, &["java/lang/Cloneable"]),
        ];
        let classpath = resolve_classpath(&classes);

        let closure = classpath.interface_closure(&classes[0]);

        assert!(closure.direct.is_empty());
        assert!(closure.implements("com/example/Marker"));
        assert!(closure.implements("java/lang/Cloneable"));
        assert!(!closure.directly_implements("java/lang/Cloneable"));
        assert!(closure.missing.is_empty());
    }

    #[test]
    fn closure_uses_platform_types_for_enums() {
        let color = class_with_supertypes("com/example/Color", Some("java/lang/Enum"), &[]);
        let classpath = resolve_classpath(std::slice::from_ref(&color));

        let closure = classpath.interface_closure(&color);

        assert!(closure.implements("java/io/Serializable"));
        assert!(closure.missing.is_empty());
    }

    #[test]
    fn closure_reports_unresolved_supertypes() {
        let class = class_with_supertypes(
            "com/example/Child",
            Some("org/thirdparty/Parent"),
            &["java/lang/Cloneable"],
        );
        let classpath = resolve_classpath(std::slice::from_ref(&class));

        let closure = classpath.interface_closure(&class);

        assert_eq!(vec!["org/thirdparty/Parent".to_string()], closure.missing);
        assert!(closure.directly_implements("java/lang/Cloneable"));
        assert!(!closure.implements("java/io/Serializable"));
    }

    #[test]
    fn first_definition_wins_for_duplicates() {
        let classes = vec![
            class_with_supertypes("com/example/Dup", Some("java/lang/Object"), &[]),
            class_with_supertypes(
                "com/example/Dup",
                Some("java/lang/Object"),
                &["java/io/Serializable"],
            ),
        ];
        let child = class_with_supertypes("com/example/Child", Some("com/example/Dup"), &[]);
        let classpath = resolve_classpath(&classes);

        let closure = classpath.interface_closure(&child);

        assert!(!closure.implements("java/io/Serializable"));
    }

    #[test]
    fn cyclic_hierarchies_terminate() {
        let classes = vec![
            class_with_supertypes("com/example/A", Some("com/example/B"), &[]),
            class_with_supertypes("com/example/B", Some("com/example/A"), &[]),
        ];
        let classpath = resolve_classpath(&classes);

        let closure = classpath.interface_closure(&classes[0]);

        assert!(closure.all.is_empty());
        assert!(closure.missing.is_empty());
    }
}
