use crate::catalog::Operation;
use crate::error::DispatchError;
use crate::sanitizer::{shell_quote, SafeArg};
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

/// A fully bound invocation. Built only by [`CommandResolver::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCommand {
    operation: Operation,
    program: PathBuf,
    /// Fixed leading arguments from configuration (wrapper tail and script path).
    preamble: Vec<String>,
    args: Vec<SafeArg>,
    timeout: Duration,
}

impl ResolvedCommand {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The full argv after the program, in order.
    pub fn argv(&self) -> Vec<OsString> {
        self.preamble
            .iter()
            .map(OsString::from)
            .chain(self.args.iter().map(|a| OsString::from(a.as_str())))
            .collect()
    }

    /// Shell-quoted rendering for logs and the audit trail. Never executed.
    pub fn command_line(&self) -> String {
        let mut parts = vec![shell_quote(&self.program.to_string_lossy())];
        parts.extend(self.preamble.iter().map(|p| shell_quote(p)));
        parts.extend(self.args.iter().map(SafeArg::shell_quoted));
        parts.join(" ")
    }
}

/// Maps operation names onto scripts under one configured directory.
#[derive(Debug, Clone)]
pub struct CommandResolver {
    bin_dir: PathBuf,
    wrapper: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(bin_dir: impl Into<PathBuf>, wrapper: Vec<String>, timeout: Duration) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            wrapper,
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::DispatchConfig) -> Self {
        Self::new(
            config.bin_dir.clone(),
            config.wrapper.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    pub fn resolve(&self, operation_name: &str, targets: Vec<SafeArg>) -> Result<ResolvedCommand, DispatchError> {
        let operation: Operation = operation_name.parse()?;

        let params = operation.params();
        if targets.len() < operation.required_count() || targets.len() > params.len() {
            return Err(DispatchError::invalid(
                operation.name(),
                format!(
                    "expected {} to {} arguments, got {}",
                    operation.required_count(),
                    params.len(),
                    targets.len()
                ),
            ));
        }

        let script = self.bin_dir.join(operation.script());
        let (program, preamble) = match self.wrapper.split_first() {
            Some((head, tail)) => {
                let mut preamble = tail.to_vec();
                preamble.push(script.to_string_lossy().into_owned());
                (PathBuf::from(head), preamble)
            }
            None => (script, Vec::new()),
        };

        Ok(ResolvedCommand {
            operation,
            program,
            preamble,
            args: targets,
            timeout: self.timeout,
        })
    }
}
