//! Declarative constraints for bound request structs.
//!
//! A bound type implements [`Validate`] and lists its rules with
//! [`Rules`]; types without constraints use the default method.
//!
//! ```ignore
//! impl Validate for Login {
//!     fn validate(&self) -> Result<(), ValidationErrors> {
//!         Rules::new()
//!             .length("user", &self.user, 3, 32)
//!             .alphanum("user", &self.user)
//!             .range("age", self.age, 18, 130)
//!             .finish()
//!     }
//! }
//! ```

use std::fmt;

use regex::Regex;

/// A single failed constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub rule: &'static str,
    pub message: String,
}

/// All constraints that failed for one value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, rule: &'static str, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            rule,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.errors.iter()
    }

    /// Failed rules for `field`.
    pub fn for_field<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a FieldError> + 'a {
        self.errors.iter().filter(move |e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", e.field, e.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

pub trait Validate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

/// Collects rule failures for one value.
#[derive(Debug, Default)]
#[must_use = "call `finish` to obtain the result"]
pub struct Rules {
    errors: ValidationErrors,
}

impl Rules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custom rule: fails with `message` unless `ok`.
    pub fn check(mut self, field: &str, ok: bool, message: impl Into<String>) -> Self {
        if !ok {
            self.errors.add(field, "check", message);
        }
        self
    }

    /// Character count within `[min, max]`.
    pub fn length(mut self, field: &str, value: &str, min: usize, max: usize) -> Self {
        let n = value.chars().count();
        if n < min || n > max {
            self.errors.add(
                field,
                "length",
                format!("length must be between {min} and {max}, got {n}"),
            );
        }
        self
    }

    pub fn range<T>(mut self, field: &str, value: T, min: T, max: T) -> Self
    where
        T: PartialOrd + fmt::Display,
    {
        if value < min || value > max {
            self.errors.add(
                field,
                "range",
                format!("must be between {min} and {max}, got {value}"),
            );
        }
        self
    }

    pub fn not_empty(mut self, field: &str, value: &str) -> Self {
        if value.trim().is_empty() {
            self.errors.add(field, "required", "must not be empty");
        }
        self
    }

    pub fn alphanum(mut self, field: &str, value: &str) -> Self {
        if !value.chars().all(|c| c.is_ascii_alphanumeric()) {
            self.errors.add(field, "alphanum", "must contain only letters and digits");
        }
        self
    }

    pub fn one_of(mut self, field: &str, value: &str, options: &[&str]) -> Self {
        if !options.contains(&value) {
            self.errors.add(
                field,
                "oneof",
                format!("must be one of [{}]", options.join(" ")),
            );
        }
        self
    }

    pub fn matches(mut self, field: &str, value: &str, pattern: &Regex) -> Self {
        if !pattern.is_match(value) {
            self.errors.add(
                field,
                "matches",
                format!("must match {}", pattern.as_str()),
            );
        }
        self
    }

    pub fn finish(self) -> Result<(), ValidationErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_collect_every_failure() {
        let email = Regex::new(r"^[^@\s]+@[^@\s]+$").unwrap();
        let err = Rules::new()
            .length("user", "ab", 3, 16)
            .alphanum("user", "ab!")
            .range("age", 12, 18, 130)
            .one_of("role", "root", &["admin", "guest"])
            .not_empty("name", "  ")
            .matches("email", "nope", &email)
            .finish()
            .unwrap_err();

        assert_eq!(err.len(), 6);
        assert_eq!(err.for_field("user").count(), 2);
        assert!(err.to_string().starts_with("user: length must be between 3 and 16"));
    }

    #[test]
    fn test_rules_pass() {
        let result = Rules::new()
            .length("user", "gopher", 3, 16)
            .range("score", 1.5, 0.0, 10.0)
            .check("terms", true, "must be accepted")
            .finish();
        assert!(result.is_ok());
    }
}
