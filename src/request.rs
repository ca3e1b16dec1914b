use crate::catalog::Operation;
use crate::error::DispatchError;
use crate::sanitizer::{sanitize, sanitize_optional, SafeArg};
use tracing::debug;

/// What a request binds to once its parameters are checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Validated arguments in positional order.
    Targets(Vec<SafeArg>),
    /// The gate parameter was left empty: nothing is to be done.
    Idle { param: &'static str },
}

/// An inbound request, parsed once at the boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub operation: String,
    pub operator: String,
    params: Vec<(String, String)>,
}

impl OperationRequest {
    pub fn new(operation: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            operator: operator.into(),
            params: Vec::new(),
        }
    }

    /// Parses a form-urlencoded query string (`user=jdoe&job=3`). A leading `?` is allowed.
    pub fn from_query(operation: impl Into<String>, operator: impl Into<String>, query: &str) -> Self {
        let mut request = Self::new(operation, operator);
        let query = query.strip_prefix('?').unwrap_or(query);
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            request.params.push((key.into_owned(), value.into_owned()));
        }
        request
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Last value wins when a key repeats.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Raw values as supplied, in the operation's parameter order when known.
    pub fn raw_targets(&self) -> Vec<String> {
        match Operation::lookup(&self.operation) {
            Some(op) => op
                .params()
                .iter()
                .filter_map(|p| self.get(p.key).map(str::to_string))
                .collect(),
            None => self.params.iter().map(|(_, v)| v.clone()).collect(),
        }
    }

    /// Validates every declared parameter and returns them in positional order.
    /// Absent optional parameters are left off the end. An empty gate
    /// parameter yields [`Binding::Idle`] before anything else is checked.
    pub fn bind(&self, operation: Operation, strict: bool) -> Result<Binding, DispatchError> {
        let params = operation.params();

        for (key, _) in &self.params {
            if !params.iter().any(|p| p.key == key) {
                if strict {
                    return Err(DispatchError::invalid(
                        key.as_str(),
                        format!("not accepted by {}", operation),
                    ));
                }
                debug!(key = %key, operation = %operation, "ignoring undeclared parameter");
            }
        }

        if let Some(idle) = params
            .iter()
            .find(|p| p.gate && self.get(p.key).map_or(true, |v| v.trim().is_empty()))
        {
            debug!(param = idle.key, operation = %operation, "gate parameter empty, nothing to do");
            return Ok(Binding::Idle { param: idle.key });
        }

        let mut targets = Vec::with_capacity(params.len());
        let mut skipped: Option<&str> = None;
        for spec in params {
            let arg = if spec.required {
                Some(sanitize(spec.key, self.get(spec.key).unwrap_or(""))?)
            } else {
                sanitize_optional(spec.key, self.get(spec.key))?
            };

            match arg {
                Some(arg) => {
                    if let Some(missing) = skipped {
                        return Err(DispatchError::invalid(
                            spec.key,
                            format!("requires '{}' to be set as well", missing),
                        ));
                    }
                    spec.kind.check(spec.key, &arg)?;
                    targets.push(arg);
                }
                None => skipped = Some(spec.key),
            }
        }
        Ok(Binding::Targets(targets))
    }
}
