//! Core error types for Stapler RS

use std::collections::BTreeMap;
use thiserror::Error;

/// Validation errors collection
///
/// Used for attachment definition checks: problems are keyed by the option
/// they concern (`url`, `styles`, ...) so callers can decide whether to log
/// them or reject the definition.
#[derive(Error, Debug, Default, Clone, PartialEq, Eq)]
#[error("Validation errors: {}", self.full_messages().join(", "))]
pub struct ValidationErrors {
    /// Field-specific errors: field_name -> Vec<error_messages>
    pub errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Check if there are errors for a specific field
    pub fn has_error(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn full_messages(&self) -> Vec<String> {
        let mut messages = Vec::new();
        for (field, field_messages) in &self.errors {
            for msg in field_messages {
                messages.push(format!("{} {}", field, msg));
            }
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_query() {
        let mut errors = ValidationErrors::new();
        assert!(errors.is_empty());

        errors.add("url", "must contain :id or :id_partition");

        assert!(!errors.is_empty());
        assert!(errors.has_error("url"));
        assert!(!errors.has_error("styles"));
    }

    #[test]
    fn test_full_messages_are_ordered() {
        let mut errors = ValidationErrors::new();
        errors.add("url", "is invalid");
        errors.add("styles", "are missing");
        errors.add("styles", "need a default");

        assert_eq!(
            errors.full_messages(),
            vec!["styles are missing", "styles need a default", "url is invalid"]
        );
        assert_eq!(
            errors.to_string(),
            "Validation errors: styles are missing, styles need a default, url is invalid"
        );
    }
}
