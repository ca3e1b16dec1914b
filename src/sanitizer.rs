use crate::error::DispatchError;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// Longest value accepted for any single target identifier.
pub const MAX_ARG_LEN: usize = 255;

/// A validated target identifier.
///
/// The raw value is what crosses the process boundary (as one argv entry);
/// `shell_quoted` is the form used whenever the command is rendered as a
/// shell line, e.g. in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeArg(String);

impl SafeArg {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn shell_quoted(&self) -> String {
        shell_quote(&self.0)
    }
}

impl fmt::Display for SafeArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// POSIX single-quote escaping: the whole value is wrapped in `'...'` and
/// every embedded `'` becomes `'\''`.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Validates a required identifier.
pub fn sanitize(param: &str, raw: &str) -> Result<SafeArg, DispatchError> {
    if raw.trim().is_empty() {
        return Err(DispatchError::invalid(param, "required value is missing"));
    }
    if raw.contains('\0') {
        return Err(DispatchError::invalid(param, "value contains a NUL byte"));
    }
    if raw.len() > MAX_ARG_LEN {
        return Err(DispatchError::invalid(
            param,
            format!("value is longer than {} bytes", MAX_ARG_LEN),
        ));
    }
    Ok(SafeArg(raw.to_string()))
}

/// Validates an optional identifier. Absent and blank values are `Ok(None)`.
pub fn sanitize_optional(param: &str, raw: Option<&str>) -> Result<Option<SafeArg>, DispatchError> {
    match raw {
        Some(value) if !value.trim().is_empty() => sanitize(param, value).map(Some),
        _ => Ok(None),
    }
}

/// Shape a target identifier must have before an administrative script sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    User,
    Job,
    Domain,
    Database,
    Service,
    Flag,
}

impl ParamKind {
    pub fn label(self) -> &'static str {
        match self {
            ParamKind::User => "user",
            ParamKind::Job => "job",
            ParamKind::Domain => "domain",
            ParamKind::Database => "database",
            ParamKind::Service => "service",
            ParamKind::Flag => "flag",
        }
    }

    pub fn check(self, param: &str, arg: &SafeArg) -> Result<(), DispatchError> {
        let value = arg.as_str();
        let ok = match self {
            ParamKind::Flag => value == "yes" || value == "no",
            ParamKind::Job => value.chars().all(|c| c.is_ascii_digit()),
            _ => self.pattern().is_match(value),
        };
        if ok {
            Ok(())
        } else {
            Err(DispatchError::invalid(
                param,
                format!("not a valid {} identifier", self.label()),
            ))
        }
    }

    fn pattern(self) -> &'static Regex {
        static USER: OnceLock<Regex> = OnceLock::new();
        static DOMAIN: OnceLock<Regex> = OnceLock::new();
        static DATABASE: OnceLock<Regex> = OnceLock::new();
        static SERVICE: OnceLock<Regex> = OnceLock::new();

        let (cell, source) = match self {
            ParamKind::User => (&USER, r"^[A-Za-z0-9][A-Za-z0-9._-]{0,31}$"),
            ParamKind::Domain => (
                &DOMAIN,
                r"^(?i)[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)*$",
            ),
            ParamKind::Database => (&DATABASE, r"^[A-Za-z0-9_-]+$"),
            ParamKind::Service | ParamKind::Job | ParamKind::Flag => {
                (&SERVICE, r"^[A-Za-z0-9@._-]+$")
            }
        };
        cell.get_or_init(|| Regex::new(source).expect("static pattern compiles"))
    }
}
