//! `specmatrix` command line
//!
//! - `config`: print the resolved configuration
//! - `simulate`: run a project end to end in memory and print the batch report
//! - `audit verify`: check a JSON-lines audit journal's hash chain

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use specmatrix_audit::{read_journal, verify_chain, AuditQuery};
use specmatrix_core::{
    DeferredTaskRunner, DocumentSelector, Engine, EngineConfig, NewRequirement, TaskRunner,
};
use specmatrix_model::{ComplianceStatus, Principal, RequestContext, Section};
use specmatrix_provider::{
    Assessment, AssessmentProvider, AssessmentRequest, GeneratedAssessment, ProviderDescriptor,
    ProviderError, ProviderKind,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SAMPLE_SPEC: &str = "\
# Supplier Specification

## Audit Trail

Every change to a record is logged with the user, a timestamp and the reason for change.

## Electronic Signatures

- Signatures are bound to their records
- Each signature requires user id and password
";

#[derive(Parser, Debug)]
#[command(name = "specmatrix", version, about = "Compliance-gated traceability matrix engine")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the resolved configuration
    Config {
        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Toml)]
        format: Format,
    },
    /// Generate a matrix for sample requirements against a document
    Simulate {
        /// Markdown specification; a built-in sample when omitted
        #[arg(long, value_name = "FILE")]
        document: Option<PathBuf>,
        /// Requirement text, repeatable
        #[arg(long = "requirement", value_name = "TEXT")]
        requirements: Vec<String>,
        /// Items generated concurrently
        #[arg(long, default_value_t = 2)]
        batch_size: usize,
        /// Use the configured provider instead of the offline keyword matcher
        #[arg(long)]
        live: bool,
    },
    /// Audit journal tools
    Audit {
        #[command(subcommand)]
        command: AuditCommand,
    },
}

#[derive(Subcommand, Debug)]
enum AuditCommand {
    /// Verify the hash chain of a journal
    Verify {
        /// Journal path
        #[arg(long, value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Toml,
    Json,
}

/// Offline provider: classifies by how many requirement keywords the
/// specification mentions
struct KeywordProvider;

fn flatten<'a>(sections: &'a [Section], out: &mut Vec<&'a Section>) {
    for section in sections {
        out.push(section);
        flatten(&section.subsections, out);
    }
}

#[async_trait]
impl AssessmentProvider for KeywordProvider {
    fn descriptor(&self) -> ProviderDescriptor {
        ProviderDescriptor {
            kind: ProviderKind::Local,
            model: "keyword-matcher".to_string(),
        }
    }

    async fn assess(&self, request: &AssessmentRequest) -> Result<GeneratedAssessment, ProviderError> {
        let keywords: Vec<String> = request
            .requirement
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(str::to_lowercase)
            .collect();

        let mut sections = Vec::new();
        for document in &request.bundle.documents {
            flatten(&document.sections, &mut sections);
        }
        let best = sections
            .iter()
            .map(|s| {
                let text = format!("{} {} {}", s.heading, s.content, s.lists.join(" ")).to_lowercase();
                (keywords.iter().filter(|k| text.contains(k.as_str())).count(), *s)
            })
            .max_by_key(|(hits, _)| *hits);

        let Some((hits, section)) = best.filter(|(hits, _)| *hits > 0) else {
            return Ok(GeneratedAssessment::ok(
                Assessment {
                    spec_reference: "Not found".to_string(),
                    supplier_response: String::new(),
                    justification: "No section mentions the requirement's terms".to_string(),
                    compliance_status: ComplianceStatus::RequiresClarification,
                    confidence_score: 10,
                    test_reference: None,
                    risk_assessment: Some("Unverified requirement".to_string()),
                    comments: None,
                },
                "keyword-matcher",
            ));
        };

        let coverage = hits * 100 / keywords.len().max(1);
        let status = if coverage >= 50 {
            ComplianceStatus::Compliant
        } else {
            ComplianceStatus::Partial
        };
        Ok(GeneratedAssessment::ok(
            Assessment {
                spec_reference: format!("Section {} {}", section.section_number, section.heading),
                supplier_response: section.content.clone(),
                justification: format!("{hits} of {} requirement terms found", keywords.len()),
                compliance_status: status,
                confidence_score: u8::try_from(coverage.min(100)).unwrap_or(100),
                test_reference: None,
                risk_assessment: None,
                comments: None,
            },
            "keyword-matcher",
        ))
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => EngineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => {
            let mut config = EngineConfig::default();
            config.apply_env(|key| std::env::var(key).ok())?;
            config
        }
    };
    config.generation.batch_pause_ms = config.generation.batch_pause_ms.min(1_000);
    Ok(config)
}

async fn simulate(
    config: EngineConfig,
    document: Option<PathBuf>,
    requirements: Vec<String>,
    batch_size: usize,
    live: bool,
) -> Result<()> {
    let text = match document {
        Some(path) => std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?,
        None => SAMPLE_SPEC.to_string(),
    };
    let requirements = if requirements.is_empty() {
        vec![
            "The system shall log every change to a record with user and timestamp".to_string(),
            "Electronic signatures shall be bound to their records".to_string(),
        ]
    } else {
        requirements
    };

    let runner = Arc::new(DeferredTaskRunner::new());
    let mut builder = Engine::builder(config).runner(Arc::clone(&runner) as Arc<dyn TaskRunner>);
    if !live {
        builder = builder.provider(Arc::new(KeywordProvider));
    }
    let engine = builder.build().await?;

    let engineer = Principal::engineer("simulation");
    let ctx = RequestContext::new().with_user_agent("specmatrix-cli");
    let project = engine.create_project(&engineer, "Simulation", None, None, &ctx)?;
    for (n, description) in requirements.into_iter().enumerate() {
        engine.create_requirement(
            &engineer,
            project.id,
            NewRequirement {
                code: format!("R{}", n + 1),
                description,
                ..NewRequirement::default()
            },
            &ctx,
        )?;
    }

    let document = engine
        .upload_document(&engineer, project.id, "specification.md", "text/markdown", text.as_bytes(), &ctx)
        .await?;
    let jobs = engine.jobs();
    runner.drain(jobs.as_ref()).await;
    let document = engine.document(&engineer, document.id)?;
    if !document.is_ready() {
        bail!(
            "extraction did not complete: {}",
            document.extraction_error.unwrap_or_default()
        );
    }

    let report = engine
        .generate_batch(
            &engineer,
            project.id,
            &[],
            DocumentSelector::One(document.id),
            Some(batch_size),
            false,
            &ctx,
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    let trail = engine.query_project_audit(&engineer, project.id, AuditQuery::new().page(500, 0))?;
    tracing::info!(audit_entries = trail.total, "simulation finished");
    engine.ledger().verify_integrity()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Config { format } => {
            let config = load_config(cli.config.as_ref())?;
            let text = match format {
                Format::Toml => toml::to_string_pretty(&config)?,
                Format::Json => serde_json::to_string_pretty(&config)?,
            };
            println!("{text}");
        }
        Command::Simulate {
            document,
            requirements,
            batch_size,
            live,
        } => {
            let config = load_config(cli.config.as_ref())?;
            simulate(config, document, requirements, batch_size, live).await?;
        }
        Command::Audit {
            command: AuditCommand::Verify { path },
        } => {
            let entries = read_journal(&path).with_context(|| format!("reading {}", path.display()))?;
            verify_chain(&entries)?;
            println!("{}: {} entries, chain intact", path.display(), entries.len());
        }
    }
    Ok(())
}
