use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value, json};
use tracing::{Level, debug};
use weft_engine::{FileRunLoader, OutputResolver, Resolver, ResolverConfig, load_document, load_job};

#[derive(Debug, Parser)]
#[command(name = "weft", version, about = "Resolve workflow descriptions into runnable commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode a document and summarize its definitions.
    Validate {
        document: PathBuf,
    },
    /// Resolve a document against a job into commands.
    Resolve {
        document: PathBuf,
        /// Job file mapping input ids to values; omitted means no inputs.
        job: Option<PathBuf>,
        #[command(flatten)]
        settings: Settings,
        /// Print one line per command instead of JSON.
        #[arg(long)]
        lines: bool,
    },
    /// Resolve a document, then collect outputs from directories the commands ran in.
    Outputs {
        document: PathBuf,
        job: Option<PathBuf>,
        #[command(flatten)]
        settings: Settings,
    },
}

#[derive(Debug, Args)]
struct Settings {
    /// Configuration file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    outdir: Option<PathBuf>,
    #[arg(long)]
    tmpdir_prefix: Option<PathBuf>,
    #[arg(long)]
    cores: Option<u32>,
    #[arg(long)]
    ram: Option<u64>,
    /// Host environment variable to pass through; repeatable.
    #[arg(long = "env")]
    env: Vec<String>,
    /// Do not write initial working directory entries.
    #[arg(long)]
    no_stage: bool,
}

impl Settings {
    fn into_config(self) -> Result<ResolverConfig> {
        let mut config = match &self.config {
            Some(path) => ResolverConfig::from_file(path)?,
            None => ResolverConfig::default(),
        };
        if let Some(outdir) = self.outdir {
            config.outdir = outdir;
        }
        if let Some(prefix) = self.tmpdir_prefix {
            config.tmpdir_prefix = prefix;
        }
        if let Some(cores) = self.cores {
            config.cores = cores;
        }
        if let Some(ram) = self.ram {
            config.ram_mb = ram;
        }
        config.env_passthrough.extend(self.env);
        if self.no_stage {
            config.stage_work_dir = false;
        }
        Ok(config)
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate { document } => validate(&document),
        Commands::Resolve {
            document,
            job,
            settings,
            lines,
        } => resolve(&document, job.as_deref(), settings.into_config()?, lines),
        Commands::Outputs { document, job, settings } => {
            let mut config = settings.into_config()?;
            config.stage_work_dir = false;
            outputs(&document, job.as_deref(), config)
        }
    }
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .try_init();
}

fn validate(path: &Path) -> Result<()> {
    let document = load_document(path)?;
    let roots: Vec<Value> = document
        .roots
        .iter()
        .map(|root| {
            json!({
                "id": root.display_id(),
                "class": root.class.as_str(),
                "inputs": root.inputs.iter().map(|input| input.id.as_str()).collect::<Vec<_>>(),
                "outputs": root.outputs.iter().map(|output| output.id.as_str()).collect::<Vec<_>>(),
                "steps": root.steps.iter().map(|step| step.id.as_str()).collect::<Vec<_>>(),
            })
        })
        .collect();
    let summary = json!({
        "cwlVersion": document.cwl_version,
        "graph": document.graph,
        "roots": roots,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn read_job(job: Option<&Path>) -> Result<Map<String, Value>> {
    match job {
        Some(path) => load_job(path),
        None => Ok(Map::new()),
    }
}

fn document_dir(path: &Path) -> PathBuf {
    path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or_else(|| Path::new(".")).to_path_buf()
}

fn resolve(path: &Path, job: Option<&Path>, config: ResolverConfig, lines: bool) -> Result<()> {
    let document = load_document(path)?;
    let job = read_job(job)?;
    let loader = FileRunLoader::new(document_dir(path));
    let resolution = Resolver::new(&config)
        .with_loader(&loader)
        .resolve(&document, &job)
        .with_context(|| format!("resolve {}", path.display()))?;
    debug!(commands = resolution.commands.len(), "resolution finished");

    if lines {
        for command in &resolution.commands {
            let line = if command.shell { command.shell_line() } else { command.argv().join(" ") };
            println!("{}\t{}", command.id, line);
        }
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(&resolution)?);
    Ok(())
}

/// Collects each command's outputs from its working directory, keyed by command id.
fn outputs(path: &Path, job: Option<&Path>, config: ResolverConfig) -> Result<()> {
    let document = load_document(path)?;
    let job = read_job(job)?;
    let loader = FileRunLoader::new(document_dir(path));
    let resolution = Resolver::new(&config)
        .with_loader(&loader)
        .resolve(&document, &job)
        .with_context(|| format!("resolve {}", path.display()))?;

    let collector = OutputResolver::new();
    let mut collected = Map::new();
    for command in &resolution.commands {
        let values = collector
            .collect_command(command, &command.working_directory)
            .with_context(|| format!("collect outputs of '{}'", command.id))?;
        collected.insert(command.id.clone(), Value::Object(values));
    }
    println!("{}", serde_json::to_string_pretty(&collected)?);
    Ok(())
}
