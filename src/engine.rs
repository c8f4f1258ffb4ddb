use anyhow::{Context, Result};
use serde_sarif::sarif::{Artifact, Result as SarifResult};
use tracing::debug;

use crate::classpath::ClassPath;
use crate::ir::Class;
use crate::rules::Rule;

/// Everything a rule can look at during one analysis run.
pub(crate) struct AnalysisContext {
    pub(crate) classes: Vec<Class>,
    pub(crate) classpath: ClassPath,
    /// Number of leading `classes` that came from the analysis input.
    target_count: usize,
    artifact_uris: Vec<Option<String>>,
}

impl AnalysisContext {
    /// Classes to report on; classpath-only classes are skipped.
    pub(crate) fn analysis_target_classes(&self) -> &[Class] {
        &self.classes[..self.target_count.min(self.classes.len())]
    }

    pub(crate) fn class_artifact_uri(&self, class: &Class) -> Option<&str> {
        usize::try_from(class.artifact_index)
            .ok()
            .and_then(|index| self.artifact_uris.get(index))
            .and_then(|uri| uri.as_deref())
    }
}

pub(crate) fn build_context(
    classes: Vec<Class>,
    classpath: ClassPath,
    target_count: usize,
    artifacts: &[Artifact],
) -> AnalysisContext {
    let artifact_uris = artifacts
        .iter()
        .map(|artifact| {
            artifact
                .location
                .as_ref()
                .and_then(|location| location.uri.clone())
        })
        .collect();
    AnalysisContext {
        classes,
        classpath,
        target_count,
        artifact_uris,
    }
}

/// Run every rule and return results in a stable order.
pub(crate) fn analyze(context: &AnalysisContext, rules: &[Box<dyn Rule>]) -> Result<Vec<SarifResult>> {
    let mut results = Vec::new();
    for rule in rules {
        let metadata = rule.metadata();
        let found = rule
            .run(context)
            .with_context(|| format!("rule {} failed", metadata.id))?;
        debug!(rule = metadata.id, results = found.len(), "rule finished");
        results.extend(found);
    }
    results.sort_by_cached_key(result_sort_key);
    Ok(results)
}

fn result_sort_key(result: &SarifResult) -> (String, String, String) {
    let location = result
        .locations
        .as_ref()
        .and_then(|locations| locations.first())
        .and_then(|location| location.logical_locations.as_ref())
        .and_then(|logical| logical.first())
        .and_then(|logical| logical.name.clone())
        .unwrap_or_default();
    (
        location,
        result.rule_id.clone().unwrap_or_default(),
        result.message.text.clone().unwrap_or_default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::resolve_classpath;
    use crate::ir::ClassAccess;
    use crate::rules::{class_location, result_message, RuleMetadata};
    use serde_sarif::sarif::ArtifactLocation;

    struct EveryClassRule;

    impl Rule for EveryClassRule {
        fn metadata(&self) -> RuleMetadata {
            RuleMetadata {
                id: "EVERY_CLASS",
                name: "Every class",
                description: "Reports each analysis target",
            }
        }

        fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
            Ok(context
                .analysis_target_classes()
                .iter()
                .map(|class| {
                    SarifResult::builder()
                        .rule_id("EVERY_CLASS")
                        .message(result_message(class.name.clone()))
                        .locations(vec![class_location(
                            &class.name,
                            context.class_artifact_uri(class),
                        )])
                        .build()
                })
                .collect())
        }
    }

    fn class_named(name: &str, artifact_index: i64) -> Class {
        Class {
            name: name.to_string(),
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            access: ClassAccess::default(),
            fields: Vec::new(),
            methods: Vec::new(),
            enum_constant_count: 0,
            artifact_index,
        }
    }

    fn context_for(classes: Vec<Class>, target_count: usize) -> AnalysisContext {
        let classpath = resolve_classpath(&classes);
        let artifacts: Vec<Artifact> = classes
            .iter()
            .map(|class| {
                Artifact::builder()
                    .location(
                        ArtifactLocation::builder()
                            .uri(format!("{}.class", class.name))
                            .build(),
                    )
                    .build()
            })
            .collect();
        build_context(classes, classpath, target_count, &artifacts)
    }

    #[test]
    fn only_input_classes_are_analysis_targets() {
        let context = context_for(
            vec![
                class_named("com/example/Zeta", 0),
                class_named("com/example/Alpha", 1),
                class_named("com/dep/Library", 2),
            ],
            2,
        );

        let names: Vec<&str> = context
            .analysis_target_classes()
            .iter()
            .map(|class| class.name.as_str())
            .collect();

        assert_eq!(vec!["com/example/Zeta", "com/example/Alpha"], names);
        assert_eq!(3, context.classes.len());
    }

    #[test]
    fn analyze_sorts_results_and_links_artifacts() {
        let context = context_for(
            vec![
                class_named("com/example/Zeta", 0),
                class_named("com/example/Alpha", 1),
            ],
            2,
        );
        let rules: Vec<Box<dyn Rule>> = vec![Box::new(EveryClassRule)];

        let results = analyze(&context, &rules).expect("analyze");

        assert_eq!(2, results.len());
        let value = serde_json::to_value(&results).expect("serialize results");
        assert_eq!(value[0]["message"]["text"], "com/example/Alpha");
        assert_eq!(
            value[0]["locations"][0]["physicalLocation"]["artifactLocation"]["uri"],
            "com/example/Alpha.class"
        );
        assert_eq!(value[1]["message"]["text"], "com/example/Zeta");
    }
}
