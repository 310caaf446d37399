use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Child server command
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The pipe-transport server that the adapters spawn and that the pipe
/// client can be pointed at.
///
/// When `command` is `None` the CLI falls back to running its own
/// executable with the `serve` subcommand.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ChildServerConfig {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// A fully resolved command line for spawning a pipe server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build from `argv`-style parts: first element is the program.
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, rest) = argv.split_first()?;
        Some(Self::new(program.clone()).args(rest.iter().cloned()))
    }
}

impl ChildServerConfig {
    /// Resolve the configured command, if any.
    pub fn to_command(&self) -> Option<ServerCommand> {
        self.command.as_ref().map(|program| ServerCommand {
            program: program.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_argv_splits_program() {
        let argv = vec!["node".to_string(), "server.js".to_string()];
        let cmd = ServerCommand::from_argv(&argv).unwrap();
        assert_eq!(cmd.program, "node");
        assert_eq!(cmd.args, vec!["server.js"]);
    }

    #[test]
    fn from_argv_empty_is_none() {
        assert!(ServerCommand::from_argv(&[]).is_none());
    }

    #[test]
    fn unset_command_resolves_to_none() {
        assert!(ChildServerConfig::default().to_command().is_none());
    }
}
