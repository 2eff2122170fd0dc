//! Core resolver data types.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use weft_types::OutputParameter;

use crate::executor::staging::StagedEntry;
use crate::expression::Capabilities;

/// One command-line token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandToken {
    pub text: String,
    /// When false the token is passed to a shell verbatim, metacharacters included.
    pub quote: bool,
}

impl CommandToken {
    pub fn new(text: impl Into<String>, quote: bool) -> Self {
        Self { text: text.into(), quote }
    }

    pub fn quoted(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }
}

/// Resources reserved for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Resources {
    pub cores: u32,
    pub ram_mb: u64,
    pub outdir_mb: u64,
    pub tmpdir_mb: u64,
}

/// A concrete, runnable command produced by resolution.
///
/// This is the unit handed to a process-launching collaborator. Everything a runner
/// needs is here: the tokens, the stdio redirections, the environment, and the output
/// declarations with the inputs they were bound against so outputs can be collected
/// after the process exits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    /// Unique identifier: the root id, a step id, or `<step>[i]` / `<step>.<sub>` forms.
    pub id: String,
    pub tokens: Vec<CommandToken>,
    /// Run through `/bin/sh -c` rather than exec'd directly.
    pub shell: bool,
    /// False when any token opted out of shell quoting.
    pub shell_quote: bool,
    pub working_directory: PathBuf,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub environment: IndexMap<String, String>,
    /// Informational; container execution is the runner's concern.
    pub container_image: Option<String>,
    pub resources: Resources,
    pub success_codes: Vec<i32>,
    /// Commands whose outputs feed this one.
    pub depends_on: Vec<String>,
    /// Entries staged into the working directory before the command runs.
    pub work_dir_entries: Vec<StagedEntry>,
    pub outputs: Vec<OutputParameter>,
    pub bound_inputs: Map<String, Value>,
    pub runtime: Map<String, Value>,
    pub capabilities: Capabilities,
}

impl Command {
    /// Tokens as plain arguments, ready for direct execution.
    pub fn argv(&self) -> Vec<&str> {
        self.tokens.iter().map(|token| token.text.as_str()).collect()
    }

    /// Tokens rendered as one shell line; only tokens that request it are quoted.
    pub fn shell_line(&self) -> String {
        let rendered: Vec<String> = self
            .tokens
            .iter()
            .map(|token| {
                if token.quote {
                    shell_words::quote(&token.text).into_owned()
                } else {
                    token.text.clone()
                }
            })
            .collect();
        rendered.join(" ")
    }
}

/// Result of resolving one document against one parameter binding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    /// Commands in resolution order; upstream commands always precede their dependents.
    pub commands: Vec<Command>,
    /// Output values known before execution: predicted file locations and evaluated
    /// expression-tool results. Outputs that depend on execution are absent.
    pub outputs: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(tokens: Vec<CommandToken>) -> Command {
        Command {
            id: "main".into(),
            tokens,
            shell: true,
            shell_quote: false,
            working_directory: PathBuf::from("."),
            stdin: None,
            stdout: None,
            stderr: None,
            environment: IndexMap::new(),
            container_image: None,
            resources: Resources {
                cores: 1,
                ram_mb: 1024,
                outdir_mb: 1024,
                tmpdir_mb: 1024,
            },
            success_codes: vec![0],
            depends_on: Vec::new(),
            work_dir_entries: Vec::new(),
            outputs: Vec::new(),
            bound_inputs: Map::new(),
            runtime: Map::new(),
            capabilities: Capabilities::default(),
        }
    }

    #[test]
    fn shell_line_quotes_only_flagged_tokens() {
        let command = command(vec![
            CommandToken::quoted("echo"),
            CommandToken::quoted("hello world"),
            CommandToken::new("|", false),
            CommandToken::new("wc -c", false),
        ]);
        assert_eq!(command.shell_line(), "echo 'hello world' | wc -c");
        assert_eq!(command.argv(), vec!["echo", "hello world", "|", "wc -c"]);
    }
}
