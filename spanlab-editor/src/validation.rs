//! Annotation validation
//!
//! Validators inspect an annotation and report errors; they never modify
//! it. Errors are keyed by `identifier` and the store keeps at most one
//! error per identifier.

use crate::annotation::Annotation;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Dedup key, e.g. `region:r1#a1:bounds`
    pub identifier: String,
    pub code: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(identifier: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Ordered error list, unique by identifier (first one wins)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    /// Returns false when an error with the same identifier is present
    pub fn add(&mut self, error: ValidationError) -> bool {
        if self.errors.iter().any(|e| e.identifier == error.identifier) {
            return false;
        }
        self.errors.push(error);
        true
    }

    pub fn extend(&mut self, errors: impl IntoIterator<Item = ValidationError>) {
        for error in errors {
            self.add(error);
        }
    }

    pub fn clear(&mut self) {
        self.errors.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    pub fn to_vec(&self) -> Vec<ValidationError> {
        self.errors.clone()
    }
}

pub trait Validator: Send + Sync {
    /// Errors found in `annotation`; empty means valid
    fn validate(&self, annotation: &Annotation) -> Vec<ValidationError>;
}

/// Accepts everything
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn validate(&self, _annotation: &Annotation) -> Vec<ValidationError> {
        Vec::new()
    }
}

/// Requires a minimum number of regions
#[derive(Debug, Clone, Copy)]
pub struct RequiredRegions {
    pub min: usize,
}

impl Default for RequiredRegions {
    fn default() -> Self {
        Self { min: 1 }
    }
}

impl Validator for RequiredRegions {
    fn validate(&self, annotation: &Annotation) -> Vec<ValidationError> {
        if annotation.regions().len() >= self.min {
            return Vec::new();
        }
        vec![ValidationError::new(
            format!("annotation:{}:required", annotation.id),
            "required",
            "You need to label at least something!",
        )]
    }
}

/// Span geometry must be finite, non-negative and ordered
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanBounds;

impl Validator for SpanBounds {
    fn validate(&self, annotation: &Annotation) -> Vec<ValidationError> {
        annotation
            .regions()
            .iter()
            .filter_map(|region| {
                let (start, end) = (region.start()?, region.end()?);
                let valid = start.is_finite() && end.is_finite() && start >= 0.0 && start <= end;
                (!valid).then(|| {
                    ValidationError::new(
                        format!("region:{}:bounds", region.id),
                        "bounds",
                        format!("Region {} has invalid bounds {}..{}", region.raw_id(), start, end),
                    )
                })
            })
            .collect()
    }
}

/// Runs several validators in order
#[derive(Default)]
pub struct CompositeValidator {
    validators: Vec<Box<dyn Validator>>,
}

impl CompositeValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }
}

impl Validator for CompositeValidator {
    fn validate(&self, annotation: &Annotation) -> Vec<ValidationError> {
        self.validators
            .iter()
            .flat_map(|v| v.validate(annotation))
            .collect()
    }
}
