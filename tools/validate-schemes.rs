//! Check scheme files against module manifests without loading adapters
//!
//! Reports which schemes would activate and why the others would be
//! disabled. Exits non-zero if any enabled scheme is invalid.

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

use iox_engine::module::registry::{load_manifests, ModuleManifest};
use iox_engine::module::validation::{ManifestValidator, ValidationResult};
use iox_engine::store::FileSchemeStore;
use iox_engine::utils::init_logging_from_config;
use iox_engine::ExchangeConfig;

/// Validate exchange scheme files against module manifests
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Directory of module manifest TOML files
    #[arg(short, long)]
    manifests: PathBuf,

    /// Directory of scheme TOML files
    #[arg(short, long)]
    schemes: PathBuf,

    /// Engine config file (TOML or JSON); checked and used for logging
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Serialize)]
struct SchemeReport {
    scheme: String,
    protocol: String,
    module_type: String,
    enabled: bool,
    module: Option<String>,
    problems: Vec<String>,
}

impl SchemeReport {
    fn activates(&self) -> bool {
        self.enabled && self.problems.is_empty()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run() -> anyhow::Result<bool> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Some(ExchangeConfig::from_file(path)?),
        None => None,
    };
    init_logging_from_config(config.as_ref().and_then(|c| c.logging.as_ref()));

    let manifests = load_manifests(&args.manifests)
        .with_context(|| format!("loading manifests from {}", args.manifests.display()))?;
    let validator = ManifestValidator::new();

    let mut manifests_ok = true;
    for manifest in &manifests {
        if let ValidationResult::Invalid(problems) = validator.validate(&manifest.to_registration()) {
            manifests_ok = false;
            eprintln!("manifest {}: {}", manifest.id, problems.join("; "));
        }
    }

    let store = FileSchemeStore::open(&args.schemes)?;
    let schemes = store
        .load_all()
        .await
        .with_context(|| format!("loading schemes from {}", args.schemes.display()))?;

    let reports: Vec<SchemeReport> = schemes
        .iter()
        .map(|scheme| {
            let manifest: Option<&ModuleManifest> = manifests
                .iter()
                .find(|m| m.module_type == scheme.module_type && m.protocol == scheme.protocol);
            let problems = match manifest {
                None => vec![format!(
                    "no {} module for protocol {}",
                    scheme.module_type, scheme.protocol
                )],
                Some(m) => match validator.validate_scheme(scheme, &m.to_registration()) {
                    ValidationResult::Valid => Vec::new(),
                    ValidationResult::Invalid(problems) => problems,
                },
            };
            SchemeReport {
                scheme: scheme.name.clone(),
                protocol: scheme.protocol.clone(),
                module_type: scheme.module_type.to_string(),
                enabled: scheme.enabled,
                module: manifest.map(|m| m.id.clone()),
                problems,
            }
        })
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            let verdict = if !report.enabled {
                "disabled".to_string()
            } else if report.activates() {
                "ok".to_string()
            } else {
                format!("FAIL: {}", report.problems.join("; "))
            };
            println!(
                "{:<24} {:<7} {:<12} {}",
                report.scheme, report.module_type, report.protocol, verdict
            );
        }
        println!(
            "{} manifests, {} schemes, {} would activate",
            manifests.len(),
            reports.len(),
            reports.iter().filter(|r| r.activates()).count()
        );
    }

    let schemes_ok = reports.iter().all(|r| !r.enabled || r.problems.is_empty());
    Ok(manifests_ok && schemes_ok)
}
