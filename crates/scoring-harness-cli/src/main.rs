//! Scoring Harness CLI
//!
//! The `scoring-harness` command drives a model-scoring server through its
//! HTTP protocol.
//!
//! ## Commands
//!
//! - `check`: start a server, score reference rows one at a time and verify
//!   the cluster labels group them the same way
//! - `score`: post records to an already-running server
//! - `upload`: upload a model archive to an already-running server

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scoring_harness::{
    read_reference_jsonl, with_harness, EquivalenceChecker, EquivalenceReport, HarnessConfig,
    MatchMode, ModelArtifact, ScoreRecord, ScoreResponse, ScoringClient, ServerEndpoint,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "scoring-harness")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Conformance harness for model-scoring servers", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file (default: SCORING_HARNESS_* variables)
    #[arg(short, long, global = true, env = "SCORING_HARNESS_CONFIG")]
    config: Option<PathBuf>,

    /// Server host, overriding the configuration
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port, overriding the configuration
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a server and check its cluster labels against a reference result
    Check {
        /// Reference rows as JSON lines: {"record": {...}, "label": ...}
        reference: PathBuf,

        /// Model archive passed to the server at launch
        #[arg(long)]
        preload: Option<PathBuf>,

        /// Model archive uploaded once the server is ready
        #[arg(long)]
        artifact: Option<PathBuf>,

        /// Upload route for --artifact
        #[arg(long, value_enum, default_value = "file")]
        upload: UploadVia,

        /// How strictly labels must correspond
        #[arg(short, long, value_enum, default_value = "equivalent")]
        mode: ModeArg,

        /// Scoring server installation directory
        #[arg(long)]
        server_root: Option<PathBuf>,

        /// Launcher executable (default: ./bin/scoring-server.sh)
        #[arg(long)]
        program: Option<PathBuf>,

        /// Print the report as JSON
        #[arg(long)]
        report_json: bool,
    },

    /// Score records against a running server and print the raw reply
    Score {
        /// JSON array of records
        records: PathBuf,
    },

    /// Upload a model archive to a running server and print the raw reply
    Upload {
        /// Model archive (.mar)
        artifact: PathBuf,

        /// Upload route
        #[arg(long, value_enum, default_value = "file")]
        via: UploadVia,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum UploadVia {
    /// POST the archive bytes to /uploadMarBytes
    Bytes,
    /// POST a multipart form to /uploadMarFile
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    Equivalent,
    Bijective,
    Exact,
}

impl From<ModeArg> for MatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Equivalent => MatchMode::Equivalent,
            ModeArg::Bijective => MatchMode::Bijective,
            ModeArg::Exact => MatchMode::Exact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    scoring_harness::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref(), cli.host, cli.port)?;

    match cli.command {
        Commands::Check {
            reference,
            preload,
            artifact,
            upload,
            mode,
            server_root,
            program,
            report_json,
        } => {
            let mut config = config;
            if let Some(root) = server_root {
                config.launch.working_dir = Some(root);
            }
            if let Some(program) = program {
                config.launch.program = program;
            }
            let artifact = match artifact {
                Some(path) => Some(load_artifact(&path, upload).await?),
                None => None,
            };
            let report = cmd_check(
                config,
                &reference,
                preload.as_deref(),
                artifact,
                mode.into(),
            )
            .await?;
            print_report(&report, report_json)
        }
        Commands::Score { records } => cmd_score(&config, &records).await,
        Commands::Upload { artifact, via } => cmd_upload(&config, &artifact, via).await,
    }
}

/// Configuration from a TOML file or the environment, with CLI overrides.
fn load_config(
    path: Option<&Path>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<HarnessConfig> {
    let config = match path {
        Some(path) => HarnessConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => HarnessConfig::from_env().context("Invalid SCORING_HARNESS_* variable")?,
    };

    if host.is_none() && port.is_none() {
        return Ok(config);
    }
    let endpoint = ServerEndpoint::new(
        host.unwrap_or_else(|| config.endpoint.host().to_string()),
        port.unwrap_or(config.endpoint.port()),
    );
    Ok(config.with_endpoint(endpoint))
}

async fn load_artifact(path: &Path, via: UploadVia) -> Result<ModelArtifact> {
    let artifact = ModelArtifact::from_path(path);
    match via {
        UploadVia::File => Ok(artifact),
        UploadVia::Bytes => {
            let bytes = artifact
                .load()
                .await
                .with_context(|| format!("Failed to read model archive: {:?}", path))?;
            Ok(ModelArtifact::from_bytes(bytes))
        }
    }
}

/// Launch the server, optionally upload a model, then run the equivalence
/// check. The server is torn down on every exit path.
async fn cmd_check(
    config: HarnessConfig,
    reference: &Path,
    preload: Option<&Path>,
    artifact: Option<ModelArtifact>,
    mode: MatchMode,
) -> Result<EquivalenceReport> {
    let rows = read_reference_jsonl(reference)
        .with_context(|| format!("Failed to read reference rows: {:?}", reference))?;
    if rows.is_empty() {
        bail!("No reference rows in {:?}", reference);
    }
    info!(rows = rows.len(), mode = ?mode, "running equivalence check");

    with_harness(config, preload, |client| async move {
        if let Some(artifact) = artifact {
            client
                .typed()
                .upload_model(&artifact)
                .await
                .context("Model upload failed")?;
        }
        let report = EquivalenceChecker::new(mode).check(&client, &rows).await?;
        Ok::<_, anyhow::Error>(report)
    })
    .await
}

fn print_report(report: &EquivalenceReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!(
        "PASS: {} rows, {} distinct labels ({:?})",
        report.rows_checked, report.distinct_observed, report.mode
    );
    for pair in &report.mapping {
        println!("  {} -> {}", pair.reference, pair.observed);
    }
    Ok(())
}

async fn cmd_score(config: &HarnessConfig, records: &Path) -> Result<()> {
    let content = std::fs::read_to_string(records)
        .with_context(|| format!("Failed to read records file: {:?}", records))?;
    let rows: Vec<ScoreRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Expected a JSON array of objects in {:?}", records))?;

    let client = ScoringClient::new(config.endpoint.clone(), &config.client)?;
    let response = client.score(&rows).await?;
    print_response(&response)
}

async fn cmd_upload(config: &HarnessConfig, artifact: &Path, via: UploadVia) -> Result<()> {
    let artifact = load_artifact(artifact, via).await?;
    let client = ScoringClient::new(config.endpoint.clone(), &config.client)?;
    let response = client.upload_model(&artifact).await?;
    print_response(&response)
}

fn print_response(response: &ScoreResponse) -> Result<()> {
    println!("HTTP {}", response.status());
    println!("{}", response.text());
    if !response.is_success() {
        bail!("Server returned {}", response.status());
    }
    Ok(())
}
