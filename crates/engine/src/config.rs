//! Resolver configuration and the runtime context it feeds.
//!
//! The configuration is a small serde payload with defaults for every field, loadable
//! from a YAML or JSON file. Each resolved command derives its `runtime` expression
//! context from it, adjusted by any resource requirement in effect.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Settings shared by every command of one resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Root output directory; workflow steps get a subdirectory named after their command id.
    pub outdir: PathBuf,
    /// Prefix under which per-command temporary directories are allocated.
    pub tmpdir_prefix: PathBuf,
    /// When set, workflow steps write into `<prefix>/<command id>` instead of under `outdir`.
    pub tmp_outdir_prefix: Option<PathBuf>,
    /// Cores reserved per command unless a resource requirement asks for more.
    pub cores: u32,
    /// RAM in MiB reserved per command unless a resource requirement asks for more.
    pub ram_mb: u64,
    pub outdir_size_mb: u64,
    pub tmpdir_size_mb: u64,
    /// Host environment variables copied into every command's environment.
    pub env_passthrough: Vec<String>,
    /// Write initial working directory entries to disk while resolving.
    pub stage_work_dir: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            outdir: PathBuf::from("."),
            tmpdir_prefix: std::env::temp_dir(),
            tmp_outdir_prefix: None,
            cores: 1,
            ram_mb: 1024,
            outdir_size_mb: 1024,
            tmpdir_size_mb: 1024,
            env_passthrough: Vec::new(),
            stage_work_dir: true,
        }
    }
}

impl ResolverConfig {
    /// Loads a configuration file. YAML is a superset of JSON, so both parse here.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parse config {}", path.display()))
    }

    /// Parses configuration text; empty text yields the defaults.
    pub fn parse(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Output directory for one command: the root outdir for a standalone tool, a
    /// per-command directory for anything nested inside a workflow.
    pub fn working_directory_for(&self, command_id: &str, nested: bool) -> PathBuf {
        match (nested, &self.tmp_outdir_prefix) {
            (false, _) => self.outdir.clone(),
            (true, Some(prefix)) => prefix.join(command_id),
            (true, None) => self.outdir.join(command_id),
        }
    }

    pub fn tmpdir_for(&self, command_id: &str) -> PathBuf {
        self.tmpdir_prefix.join(format!("weft-{command_id}"))
    }
}

/// Values exposed to expressions as `runtime`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeContext {
    pub outdir: PathBuf,
    pub tmpdir: PathBuf,
    pub cores: u32,
    pub ram_mb: u64,
    pub outdir_size_mb: u64,
    pub tmpdir_size_mb: u64,
}

impl RuntimeContext {
    pub fn new(config: &ResolverConfig, outdir: PathBuf, tmpdir: PathBuf) -> Self {
        Self {
            outdir,
            tmpdir,
            cores: config.cores,
            ram_mb: config.ram_mb,
            outdir_size_mb: config.outdir_size_mb,
            tmpdir_size_mb: config.tmpdir_size_mb,
        }
    }

    pub fn to_map(&self) -> Map<String, Value> {
        let mut runtime = Map::new();
        runtime.insert("outdir".into(), Value::String(self.outdir.display().to_string()));
        runtime.insert("tmpdir".into(), Value::String(self.tmpdir.display().to_string()));
        runtime.insert("cores".into(), Value::from(self.cores));
        runtime.insert("ram".into(), Value::from(self.ram_mb));
        runtime.insert("outdirSize".into(), Value::from(self.outdir_size_mb));
        runtime.insert("tmpdirSize".into(), Value::from(self.tmpdir_size_mb));
        runtime
    }
}
