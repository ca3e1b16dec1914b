use crate::audit::{AuditLog, AuditRecord};
use crate::catalog::Operation;
use crate::config::Config;
use crate::error::DispatchError;
use crate::i18n::I18n;
use crate::interpreter::{interpret, Outcome, Rejection};
use crate::invoker::{Invoke, ProcessInvoker};
use crate::redirect::{resolve_next, SessionContext};
use crate::request::{Binding, OperationRequest};
use crate::resolver::CommandResolver;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn};

/// Where non-administrators are sent, whatever they asked for.
pub const UNAUTHORIZED_PAGE: &str = "/list/user";

/// Steps a request passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Sanitizing,
    Resolving,
    Invoking,
    Rejected,
    Interpreting,
    Redirecting,
    Done,
}

/// What goes back to the HTTP layer: always a redirect.
#[derive(Debug, Clone)]
pub struct DispatchResponse {
    pub status: u16,
    pub location: String,
    /// One-shot message for the next rendered page.
    pub flash_error: Option<String>,
    pub outcome: Outcome,
    pub record_id: String,
    /// Set when the audit record could not be persisted.
    pub audit_error: Option<String>,
    pub trail: Vec<Stage>,
}

impl DispatchResponse {
    pub fn to_json(&self) -> serde_json::Value {
        let exit_code = match &self.outcome {
            Outcome::Success => Some(0),
            Outcome::Failure { code, .. } => Some(*code),
            _ => None,
        };
        json!({
            "status": self.status,
            "location": self.location,
            "flash_error": self.flash_error,
            "outcome": self.outcome.label(),
            "exit_code": exit_code,
            "record_id": self.record_id,
            "audit_error": self.audit_error,
            "trail": self.trail.iter().map(|s| format!("{:?}", s).to_lowercase()).collect::<Vec<_>>(),
        })
    }
}

struct Attempt {
    outcome: Outcome,
    command_line: Option<String>,
    duration: Option<Duration>,
}

impl Attempt {
    fn rejected(rejection: Rejection) -> Self {
        Attempt {
            outcome: Outcome::NotAttempted(rejection),
            command_line: None,
            duration: None,
        }
    }
}

pub struct Dispatcher<I: Invoke = ProcessInvoker> {
    resolver: CommandResolver,
    invoker: I,
    audit: AuditLog,
    admins: Vec<String>,
    strict_params: bool,
    script_output: bool,
    i18n: I18n,
}

impl Dispatcher<ProcessInvoker> {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(
            CommandResolver::from_config(&config.dispatch),
            ProcessInvoker::from_config(&config.dispatch),
            AuditLog::open(config.audit.clone())?,
            config,
        ))
    }
}

impl<I: Invoke> Dispatcher<I> {
    pub fn new(resolver: CommandResolver, invoker: I, audit: AuditLog, config: &Config) -> Self {
        Self {
            resolver,
            invoker,
            audit,
            admins: config.dispatch.admins.clone(),
            strict_params: config.dispatch.strict_params,
            script_output: config.logging.script_output,
            i18n: I18n::new(&config.get_effective_language()),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Runs one request end to end. Every path is audited and ends in a redirect.
    pub fn dispatch(&self, request: &OperationRequest, session: &SessionContext) -> DispatchResponse {
        let span = info_span!("dispatch", operator = %request.operator, operation = %request.operation);
        let _enter = span.enter();

        let mut trail = vec![Stage::Received];
        let operation = Operation::lookup(&request.operation);
        let attempt = self.attempt(request, session, operation, &mut trail);

        enter(&mut trail, Stage::Interpreting);
        let mut record = AuditRecord::new(
            &request.operator,
            &request.operation,
            request.raw_targets(),
            &attempt.outcome,
        );
        if let Some(line) = attempt.command_line {
            record = record.with_command_line(line);
        }
        if let Some(duration) = attempt.duration {
            record = record.with_duration(duration);
        }
        let audit_error = match self.audit.append(&record) {
            Ok(()) => None,
            Err(e) => {
                error!(error = %format!("{:#}", e), record_id = %record.record_id, "audit append failed");
                Some(format!("{:#}", e))
            }
        };

        enter(&mut trail, Stage::Redirecting);
        let location = match attempt.outcome {
            Outcome::NotAttempted(Rejection::Unauthorized { .. }) => UNAUTHORIZED_PAGE.to_string(),
            _ => resolve_next(session, operation.map(Operation::category)),
        };
        let flash_error = self.flash_for(&attempt.outcome);
        enter(&mut trail, Stage::Done);

        info!(outcome = attempt.outcome.label(), location = %location, record_id = %record.record_id, "dispatched");
        DispatchResponse {
            status: 302,
            location,
            flash_error,
            outcome: attempt.outcome,
            record_id: record.record_id,
            audit_error,
            trail,
        }
    }

    fn attempt(
        &self,
        request: &OperationRequest,
        session: &SessionContext,
        operation: Option<Operation>,
        trail: &mut Vec<Stage>,
    ) -> Attempt {
        if !self.admins.iter().any(|a| a == &session.operator) {
            warn!("operator is not an administrator");
            enter(trail, Stage::Rejected);
            return Attempt::rejected(Rejection::Unauthorized {
                operator: session.operator.clone(),
            });
        }

        enter(trail, Stage::Sanitizing);
        let targets = match operation {
            Some(op) => request.bind(op, self.strict_params),
            // Nothing to bind against; the resolver rejects the name next.
            None => Ok(Binding::Targets(Vec::new())),
        };
        let targets = match targets {
            Ok(Binding::Targets(targets)) => targets,
            Ok(Binding::Idle { param }) => {
                info!(param, "nothing to do");
                return Attempt {
                    outcome: Outcome::Skipped { param: param.to_string() },
                    command_line: None,
                    duration: None,
                };
            }
            Err(e) => {
                info!(error = %e, "request rejected");
                enter(trail, Stage::Rejected);
                return Attempt {
                    outcome: Outcome::from_error(&e),
                    command_line: None,
                    duration: None,
                };
            }
        };

        enter(trail, Stage::Resolving);
        let command = match self.resolver.resolve(&request.operation, targets) {
            Ok(command) => command,
            Err(e) => {
                if let DispatchError::UnknownOperation { name } = &e {
                    warn!(suggestions = ?Operation::suggest(name), "operation is not in the allow-list");
                } else {
                    info!(error = %e, "request rejected");
                }
                enter(trail, Stage::Rejected);
                return Attempt {
                    outcome: Outcome::from_error(&e),
                    command_line: None,
                    duration: None,
                };
            }
        };

        enter(trail, Stage::Invoking);
        let command_line = command.command_line();
        debug!(command = %command_line, "invoking");
        match self.invoker.invoke(command) {
            Ok(result) => {
                let outcome = interpret(&result);
                match &outcome {
                    Outcome::Failure { code, class, message } => {
                        warn!(exit_code = code, class = ?class, message = %message, "operation failed");
                        if self.script_output {
                            warn!(stdout = %result.stdout, stderr = %result.stderr, "script output");
                        }
                    }
                    _ => debug!(duration_ms = result.duration.as_millis() as u64, "operation succeeded"),
                }
                Attempt {
                    outcome,
                    command_line: Some(command_line),
                    duration: Some(result.duration),
                }
            }
            Err(e) => {
                error!(error = %e, "invocation did not complete");
                Attempt {
                    outcome: Outcome::from_error(&e),
                    command_line: Some(command_line),
                    duration: None,
                }
            }
        }
    }

    fn flash_for(&self, outcome: &Outcome) -> Option<String> {
        let message = match outcome {
            Outcome::Success | Outcome::Skipped { .. } => return None,
            Outcome::Failure { message, .. } => message.clone(),
            Outcome::TimedOut { timeout_ms } => {
                let secs = (*timeout_ms as f64 / 1000.0).to_string();
                self.i18n.t_format("flash_timeout", &[&secs])
            }
            Outcome::NotAttempted(Rejection::Unauthorized { .. }) => self.i18n.t("flash_unauthorized"),
            Outcome::NotAttempted(Rejection::InvalidInput { param, reason }) => {
                self.i18n.t_format("flash_invalid_input", &[param, reason])
            }
            Outcome::NotAttempted(Rejection::UnknownOperation { .. }) => self.i18n.t("flash_unknown_operation"),
            Outcome::Fault { .. } => self.i18n.t("flash_fault"),
        };
        Some(message)
    }
}

fn enter(trail: &mut Vec<Stage>, stage: Stage) {
    debug!(?stage, "stage");
    trail.push(stage);
}
