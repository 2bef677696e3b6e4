/// The pluggable schema-validator interface and the built-in constraint
/// checker.
///
/// The planner never validates argument values itself — it asks an injected
/// [`SchemaValidator`] whether a value satisfies a media spec, the same
/// dependency-injection shape used for registries. The crate ships
/// [`ConstraintValidator`], which enforces the value-level constraints a
/// [`MediaSpec`] can carry (`min`, `max`, `min_length`, `max_length`,
/// `pattern`, `allowed_values`); hosts that need full JSON Schema validation
/// plug their own implementation.
use regex::Regex;

use crate::error::Error;
use crate::media::MediaUrn;
use crate::media_spec::{MediaSpec, ValidationConstraints};

/// An injected validator for argument and output values.
///
/// Implementations may compile JSON Schemas, call out to a service, or
/// check nothing at all. The trait is object-safe; the planner stores the
/// reference as `&dyn SchemaValidator`.
pub trait SchemaValidator {
    /// Checks `value` against the spec resolved for `media_urn`.
    ///
    /// Returns the list of violated checks; an empty list means the value
    /// is acceptable.
    fn validate(
        &self,
        media_urn: &MediaUrn,
        value: &serde_json::Value,
        spec: &MediaSpec,
    ) -> Vec<String>;
}

/// Runs a validator and converts findings into the unified error type.
///
/// # Errors
///
/// [`Error::Validation`] carrying one entry per violated check.
pub fn validate_value(
    validator: &dyn SchemaValidator,
    media_urn: &MediaUrn,
    value: &serde_json::Value,
    spec: &MediaSpec,
) -> Result<(), Error> {
    let errors = validator.validate(media_urn, value, spec);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation { errors })
    }
}

/// Checks a value against a constraint set, returning one message per
/// violated constraint.
pub fn check_constraints(
    value: &serde_json::Value,
    constraints: &ValidationConstraints,
) -> Vec<String> {
    let mut errors = Vec::new();

    if constraints.min.is_some() || constraints.max.is_some() {
        match value.as_f64() {
            Some(number) => {
                if let Some(min) = constraints.min {
                    if number < min {
                        errors.push(format!("value {number} is below minimum {min}"));
                    }
                }
                if let Some(max) = constraints.max {
                    if number > max {
                        errors.push(format!("value {number} is above maximum {max}"));
                    }
                }
            }
            None => errors.push("numeric bounds require a numeric value".to_owned()),
        }
    }

    if constraints.min_length.is_some() || constraints.max_length.is_some() {
        match value.as_str() {
            Some(s) => {
                let length = s.chars().count();
                if let Some(min_length) = constraints.min_length {
                    if length < min_length {
                        errors.push(format!(
                            "length {length} is below minimum length {min_length}"
                        ));
                    }
                }
                if let Some(max_length) = constraints.max_length {
                    if length > max_length {
                        errors.push(format!(
                            "length {length} is above maximum length {max_length}"
                        ));
                    }
                }
            }
            None => errors.push("length bounds require a string value".to_owned()),
        }
    }

    if let Some(pattern) = &constraints.pattern {
        match value.as_str() {
            Some(s) => match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(regex) => {
                    if !regex.is_match(s) {
                        errors.push(format!("value {s:?} does not match pattern {pattern:?}"));
                    }
                }
                Err(err) => errors.push(format!("invalid pattern {pattern:?}: {err}")),
            },
            None => errors.push("a pattern constraint requires a string value".to_owned()),
        }
    }

    if let Some(allowed) = &constraints.allowed_values {
        if !allowed.contains(value) {
            errors.push(format!("value is not one of the {} allowed values", allowed.len()));
        }
    }

    errors
}

/// The built-in validator: enforces a spec's [`ValidationConstraints`] and
/// nothing else. JSON Schema enforcement is left to host-supplied
/// implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConstraintValidator;

impl SchemaValidator for ConstraintValidator {
    fn validate(
        &self,
        _media_urn: &MediaUrn,
        value: &serde_json::Value,
        spec: &MediaSpec,
    ) -> Vec<String> {
        match &spec.validation {
            Some(constraints) => check_constraints(value, constraints),
            None => Vec::new(),
        }
    }
}
