use crate::error::DispatchError;
use crate::invoker::InvocationResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Documented exit codes of the administrative scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    Args,
    Invalid,
    NotExist,
    Exists,
    Suspended,
    Unsuspended,
    InUse,
    Limit,
    Password,
    Forbidden,
    Disabled,
    Parsing,
    Disk,
    LoadAverage,
    Connect,
    Ftp,
    Database,
    Rrd,
    Update,
    Restart,
    Unknown,
}

impl FailureClass {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            1 => FailureClass::Args,
            2 => FailureClass::Invalid,
            3 => FailureClass::NotExist,
            4 => FailureClass::Exists,
            5 => FailureClass::Suspended,
            6 => FailureClass::Unsuspended,
            7 => FailureClass::InUse,
            8 => FailureClass::Limit,
            9 => FailureClass::Password,
            10 => FailureClass::Forbidden,
            11 => FailureClass::Disabled,
            12 => FailureClass::Parsing,
            13 => FailureClass::Disk,
            14 => FailureClass::LoadAverage,
            15 => FailureClass::Connect,
            16 => FailureClass::Ftp,
            17 => FailureClass::Database,
            18 => FailureClass::Rrd,
            19 => FailureClass::Update,
            20 => FailureClass::Restart,
            _ => FailureClass::Unknown,
        }
    }
}

/// Why a request never reached the invoker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    Unauthorized { operator: String },
    InvalidInput { param: String, reason: String },
    UnknownOperation { name: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Unauthorized { operator } => write!(f, "operator '{}' is not an administrator", operator),
            Rejection::InvalidInput { param, reason } => write!(f, "invalid value for '{}': {}", param, reason),
            Rejection::UnknownOperation { name } => write!(f, "unknown operation '{}'", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure {
        code: i32,
        message: String,
        class: FailureClass,
    },
    TimedOut {
        timeout_ms: u64,
    },
    NotAttempted(Rejection),
    /// The request named no object to act on, so nothing ran. Not an error.
    Skipped {
        param: String,
    },
    /// The command resolved but could not be run at all.
    Fault {
        detail: String,
    },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure { .. } => "failure",
            Outcome::TimedOut { .. } => "timeout",
            Outcome::NotAttempted(_) => "not_attempted",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Fault { .. } => "fault",
        }
    }

    /// Maps an error raised before or during invocation onto its outcome.
    pub fn from_error(err: &DispatchError) -> Self {
        match err {
            DispatchError::InvalidInput { param, reason } => Outcome::NotAttempted(Rejection::InvalidInput {
                param: param.clone(),
                reason: reason.clone(),
            }),
            DispatchError::UnknownOperation { name } => {
                Outcome::NotAttempted(Rejection::UnknownOperation { name: name.clone() })
            }
            DispatchError::OperationTimeout { timeout_ms } => Outcome::TimedOut {
                timeout_ms: *timeout_ms,
            },
            DispatchError::Spawn { .. } | DispatchError::Io { .. } => Outcome::Fault {
                detail: err.to_string(),
            },
        }
    }
}

/// Classifies a finished invocation. Pure: the same input always gives the same outcome.
pub fn interpret(result: &InvocationResult) -> Outcome {
    if result.exit_code == 0 {
        return Outcome::Success;
    }
    Outcome::Failure {
        code: result.exit_code,
        message: failure_message(result),
        class: FailureClass::from_exit_code(result.exit_code),
    }
}

fn failure_message(result: &InvocationResult) -> String {
    result
        .stdout_lines()
        .chain(result.stderr_lines())
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Error code: {}", result.exit_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn result(exit_code: i32, stdout: &str, stderr: &str) -> InvocationResult {
        InvocationResult {
            exit_code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::from_millis(12),
        }
    }

    #[test]
    fn zero_exit_is_success_regardless_of_output() {
        assert_eq!(interpret(&result(0, "", "warning: noisy\n")), Outcome::Success);
    }

    #[test]
    fn failure_uses_first_non_empty_line() {
        let outcome = interpret(&result(1, "", "\n  job not found  \nsecond line\n"));
        assert_eq!(
            outcome,
            Outcome::Failure {
                code: 1,
                message: "job not found".to_string(),
                class: FailureClass::Args,
            }
        );

        let outcome = interpret(&result(3, "Error: cron job 7 doesn't exist\n", "ignored"));
        match outcome {
            Outcome::Failure { message, class, .. } => {
                assert_eq!(message, "Error: cron job 7 doesn't exist");
                assert_eq!(class, FailureClass::NotExist);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn empty_or_malformed_output_falls_back() {
        let outcome = interpret(&result(42, "  \n\t\n", ""));
        assert_eq!(
            outcome,
            Outcome::Failure {
                code: 42,
                message: "Error code: 42".to_string(),
                class: FailureClass::Unknown,
            }
        );

        let outcome = interpret(&result(2, "\u{fffd}\u{fffd}", ""));
        assert!(matches!(outcome, Outcome::Failure { code: 2, .. }));
    }

    #[test]
    fn interpret_is_idempotent() {
        let captured = result(5, "Error: job is already suspended\n", "");
        assert_eq!(interpret(&captured), interpret(&captured));
    }

    #[test]
    fn errors_map_to_outcomes() {
        let outcome = Outcome::from_error(&DispatchError::invalid("user", "required value is missing"));
        assert_eq!(outcome.label(), "not_attempted");

        let outcome = Outcome::from_error(&DispatchError::OperationTimeout { timeout_ms: 500 });
        assert_eq!(outcome, Outcome::TimedOut { timeout_ms: 500 });

        let outcome = Outcome::from_error(&DispatchError::UnknownOperation { name: "x".into() });
        assert!(matches!(outcome, Outcome::NotAttempted(Rejection::UnknownOperation { .. })));
    }
}
