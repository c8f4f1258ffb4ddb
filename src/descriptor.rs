use anyhow::{Context, Result};
use jdescriptor::{MethodDescriptor, TypeDescriptor};

/// Parameter count and return type of a method descriptor.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodDescriptorSummary {
    pub(crate) param_count: usize,
    /// Field descriptor of the return type, `None` for `void`.
    pub(crate) return_type: Option<String>,
}

pub(crate) fn method_descriptor_summary(descriptor: &str) -> Result<MethodDescriptorSummary> {
    let parsed = descriptor
        .parse::<MethodDescriptor>()
        .map_err(|_| anyhow::anyhow!("invalid method descriptor: {descriptor}"))?;
    let return_type = match parsed.return_type() {
        TypeDescriptor::Void => None,
        _ => {
            let (_, ret) = descriptor
                .rsplit_once(')')
                .with_context(|| format!("invalid method descriptor: {descriptor}"))?;
            Some(ret.to_string())
        }
    };

    Ok(MethodDescriptorSummary {
        param_count: parsed.parameter_types().len(),
        return_type,
    })
}

/// Whether values of this field descriptor take two stack slots.
pub(crate) fn is_wide(descriptor: &str) -> bool {
    matches!(descriptor, "J" | "D")
}

/// Field descriptor for an internal class name as found in `new`/`checkcast` operands.
///
/// Array class operands are already descriptors (`[Ljava/lang/String;`).
pub(crate) fn class_descriptor(internal_name: &str) -> String {
    if internal_name.starts_with('[') {
        internal_name.to_string()
    } else {
        format!("L{internal_name};")
    }
}
