//! Built-in attribute validators
//!
//! Validators only look at known string values; null and unknown values are
//! skipped because Terraform validates configuration before every value is
//! known.

use crate::schema::{Validator, ValidatorRequest, ValidatorResponse};
use crate::types::{Diagnostic, Dynamic};

/// Value must match a regular expression
pub struct StringMatches {
    pattern: Result<regex::Regex, regex::Error>,
    message: String,
}

impl StringMatches {
    /// An invalid pattern is reported as a diagnostic on every validation
    pub fn new(pattern: &str, message: impl Into<String>) -> Self {
        Self {
            pattern: regex::Regex::new(pattern),
            message: message.into(),
        }
    }
}

impl Validator for StringMatches {
    fn description(&self) -> String {
        self.message.clone()
    }

    fn validate(&self, request: ValidatorRequest) -> ValidatorResponse {
        let mut response = ValidatorResponse::default();
        let pattern = match &self.pattern {
            Ok(pattern) => pattern,
            Err(e) => {
                response.diagnostics.push(Diagnostic::error(
                    "Invalid validator pattern",
                    format!("{} cannot be checked: {}", request.path, e),
                ));
                return response;
            }
        };
        if let Dynamic::String(s) = &request.config_value.value {
            if !pattern.is_match(s) {
                response.diagnostics.push(
                    Diagnostic::error(
                        format!("Invalid value for {}", request.path),
                        format!("{}, got {:?}", self.message, s),
                    )
                    .with_attribute(request.path),
                );
            }
        }
        response
    }
}

/// Value must be one of a fixed set
pub struct StringOneOf {
    allowed: Vec<String>,
}

impl StringOneOf {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for StringOneOf {
    fn description(&self) -> String {
        format!("value must be one of: {}", self.allowed.join(", "))
    }

    fn validate(&self, request: ValidatorRequest) -> ValidatorResponse {
        let mut response = ValidatorResponse::default();
        if let Dynamic::String(s) = &request.config_value.value {
            if !self.allowed.iter().any(|a| a == s) {
                response.diagnostics.push(
                    Diagnostic::error(
                        format!("Invalid value for {}", request.path),
                        format!("{}, got {:?}", self.description(), s),
                    )
                    .with_attribute(request.path),
                );
            }
        }
        response
    }
}

/// String length bounds, counted in characters
pub struct StringLength {
    pub min: usize,
    pub max: Option<usize>,
}

impl Validator for StringLength {
    fn description(&self) -> String {
        match self.max {
            Some(max) => format!("length must be between {} and {}", self.min, max),
            None => format!("length must be at least {}", self.min),
        }
    }

    fn validate(&self, request: ValidatorRequest) -> ValidatorResponse {
        let mut response = ValidatorResponse::default();
        if let Dynamic::String(s) = &request.config_value.value {
            let len = s.chars().count();
            if len < self.min || self.max.is_some_and(|max| len > max) {
                response.diagnostics.push(
                    Diagnostic::error(
                        format!("Invalid length for {}", request.path),
                        format!("{}, got {}", self.description(), len),
                    )
                    .with_attribute(request.path),
                );
            }
        }
        response
    }
}
