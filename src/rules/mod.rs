use anyhow::Result;
use serde_sarif::sarif::{
    ArtifactLocation, Location, LogicalLocation, Message, PhysicalLocation,
    Result as SarifResult,
};

use crate::engine::AnalysisContext;

pub(crate) mod singleton;

/// Metadata describing an analysis rule.
#[derive(Clone, Debug)]
pub(crate) struct RuleMetadata {
    pub(crate) id: &'static str,
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
}

/// Rule interface for analysis execution.
pub(crate) trait Rule {
    fn metadata(&self) -> RuleMetadata;

    /// SARIF rule descriptors for the result ids this rule emits.
    fn descriptors(&self) -> Vec<RuleMetadata> {
        vec![self.metadata()]
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>>;
}

pub(crate) fn all_rules() -> Vec<Box<dyn Rule>> {
    vec![Box::new(singleton::SingletonRule)]
}

pub(crate) fn method_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
    artifact_uri: Option<&str>,
) -> Location {
    let logical = method_logical_location(class_name, method_name, descriptor);
    location_with_artifact(logical, artifact_uri)
}

pub(crate) fn method_logical_location(
    class_name: &str,
    method_name: &str,
    descriptor: &str,
) -> LogicalLocation {
    LogicalLocation::builder()
        .name(format!("{class_name}.{method_name}{descriptor}"))
        .kind("function")
        .build()
}

pub(crate) fn class_location(class_name: &str, artifact_uri: Option<&str>) -> Location {
    let logical = LogicalLocation::builder()
        .name(class_name)
        .kind("type")
        .build();
    location_with_artifact(logical, artifact_uri)
}

fn location_with_artifact(logical: LogicalLocation, artifact_uri: Option<&str>) -> Location {
    match artifact_uri {
        Some(uri) => {
            let physical = PhysicalLocation::builder()
                .artifact_location(ArtifactLocation::builder().uri(uri.to_string()).build())
                .build();
            Location::builder()
                .physical_location(physical)
                .logical_locations(vec![logical])
                .build()
        }
        None => Location::builder().logical_locations(vec![logical]).build(),
    }
}

pub(crate) fn result_message(text: impl Into<String>) -> Message {
    Message::builder().text(text.into()).build()
}
