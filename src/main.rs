mod cfg;
mod classpath;
mod descriptor;
mod engine;
mod ir;
mod markers;
mod opcodes;
mod rules;
mod scan;
mod stack;
#[cfg(test)]
mod test_support;
mod thrower;

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, Invocation, MultiformatMessageString, ReportingDescriptor, Result as SarifResult,
    Run, SCHEMA_URL, Sarif, Tool, ToolComponent,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::classpath::resolve_classpath;
use crate::engine::{analyze, build_context};
use crate::rules::{RuleMetadata, all_rules};
use crate::scan::scan_inputs;

/// CLI arguments for singlecheck execution.
#[derive(Parser, Debug)]
#[command(
    name = "singlecheck",
    about = "Reports broken Singleton implementations in JVM class files and JAR files as SARIF.",
    version
)]
struct Cli {
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);
    run(cli)
}

/// Diagnostics go to stderr; `RUST_LOG` overrides the default `warn` level.
fn init_tracing(quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("off")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let scan = scan_inputs(&cli.input, &cli.classpath)?;
    let class_count = scan.class_count();
    let artifact_count = scan.artifacts.len();
    let scan_duration = started_at.elapsed();

    let classpath = resolve_classpath(&scan.classes);
    let context = build_context(scan.classes, classpath, scan.target_count, &scan.artifacts);
    let rules = all_rules();
    let results = analyze(&context, &rules)?;
    let descriptors = rules.iter().flat_map(|rule| rule.descriptors()).collect();
    info!(
        classes = class_count,
        targets = scan.target_count,
        results = results.len(),
        "analysis finished"
    );

    let invocation = build_invocation();
    let sarif = build_sarif(scan.artifacts, invocation, descriptors, results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} classes={} artifacts={}",
            started_at.elapsed().as_millis(),
            scan_duration.as_millis(),
            class_count,
            artifact_count
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

fn build_invocation() -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .build()
}

fn rule_descriptor(metadata: &RuleMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.name)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    descriptors: Vec<RuleMetadata>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = ToolComponent::builder()
        .name("singlecheck")
        .version(env!("CARGO_PKG_VERSION"))
        .rules(descriptors.iter().map(rule_descriptor).collect::<Vec<_>>())
        .build();
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
