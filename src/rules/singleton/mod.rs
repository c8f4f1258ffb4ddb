//! Checks that classes following the Singleton pattern cannot be instantiated twice.

use anyhow::{Context, Result};
use serde_sarif::sarif::Result as SarifResult;
use tracing::debug;

use crate::classpath::ClassPath;
use crate::engine::AnalysisContext;
use crate::ir::Class;
use crate::markers::CAPABILITY_MARKERS;
use crate::rules::{Rule, RuleMetadata, class_location, method_location, result_message};
use crate::stack::operand_observations;
use crate::thrower::{CfgThrowOracle, ThrowOracle};

pub(crate) mod evidence;
pub(crate) mod findings;

use evidence::{EvidenceRecord, SingletonEvidence};
use findings::{Finding, FindingCategory, synthesize};

/// Rule that detects singletons with more than one way to obtain an instance.
pub(crate) struct SingletonRule;

impl Rule for SingletonRule {
    fn metadata(&self) -> RuleMetadata {
        RuleMetadata {
            id: "SINGLETON",
            name: "Broken singleton",
            description: "Singleton classes that allow more than one instance",
        }
    }

    fn descriptors(&self) -> Vec<RuleMetadata> {
        FindingCategory::ALL
            .iter()
            .map(|category| RuleMetadata {
                id: category.rule_id(),
                name: category.code(),
                description: category.description(),
            })
            .collect()
    }

    fn run(&self, context: &AnalysisContext) -> Result<Vec<SarifResult>> {
        let oracle = CfgThrowOracle;
        let mut results = Vec::new();
        for class in context.analysis_target_classes() {
            let record = collect_evidence(class, &context.classpath, &oracle)?;
            let findings = synthesize(&record);
            debug!(
                class = %class.name,
                candidate = record.is_candidate,
                findings = findings.len(),
                "singleton evidence collected"
            );
            let artifact_uri = context.class_artifact_uri(class);
            results.extend(
                findings
                    .iter()
                    .map(|finding| finding_result(finding, artifact_uri)),
            );
        }
        Ok(results)
    }
}

/// Drive one class traversal: the class, then each method followed by its observed instructions.
pub(crate) fn collect_evidence(
    class: &Class,
    classpath: &ClassPath,
    oracle: &dyn ThrowOracle,
) -> Result<EvidenceRecord> {
    let closure = classpath.interface_closure(class);
    let mut evidence = SingletonEvidence::enter(class, &closure, &CAPABILITY_MARKERS, oracle);
    for method in &class.methods {
        evidence.observe_method(method);
        let observations = operand_observations(method).with_context(|| {
            format!(
                "failed to track operands in {}.{}{}",
                class.name, method.name, method.descriptor
            )
        })?;
        for observation in &observations {
            evidence.observe_instruction(method, observation);
        }
    }
    Ok(evidence.exit())
}

fn finding_result(finding: &Finding, artifact_uri: Option<&str>) -> SarifResult {
    let class_name = finding.class_name.replace('/', ".");
    let (message, location) = match &finding.method {
        Some(method) => (
            format!(
                "{}: {}.{}",
                finding.category.description(),
                class_name,
                method.name
            ),
            method_location(
                &finding.class_name,
                &method.name,
                &method.descriptor,
                artifact_uri,
            ),
        ),
        None => (
            format!("{}: {}", finding.category.description(), class_name),
            class_location(&finding.class_name, artifact_uri),
        ),
    };
    SarifResult::builder()
        .rule_id(finding.category.rule_id())
        .message(result_message(message))
        .locations(vec![location])
        .build()
}
