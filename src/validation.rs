use std::collections::BTreeMap;

use chrono::NaiveDate;
use rocket::form::{Errors, Form};
use rocket::serde::json::{self, Json};
use serde_json::Value;
use tracing::instrument;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::AppError;

pub const SPEC_SCORE_MIN: f64 = 0.0;
pub const SPEC_SCORE_MAX: f64 = 100.0;

/// Validated sub-scores keyed by skill name.
pub type Specs = BTreeMap<String, f64>;

fn describe_validation_errors(errors: &ValidationErrors) -> String {
    let mut messages: Vec<String> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, field_errors)| {
            field_errors.iter().map(move |error| {
                let message = error
                    .message
                    .clone()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("invalid value ({})", error.code));
                format!("{}: {}", field, message)
            })
        })
        .collect();
    messages.sort();
    messages.join("; ")
}

pub trait JsonValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T: Validate> JsonValidateExt<T> for Json<T> {
    #[instrument(skip_all)]
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = self.into_inner();
        inner
            .validate()
            .map_err(|errors| AppError::Validation(describe_validation_errors(&errors)))?;
        Ok(inner)
    }
}

impl<T: Validate> JsonValidateExt<T> for Result<Json<T>, json::Error<'_>> {
    #[instrument(skip_all)]
    fn validate_custom(self) -> Result<T, AppError> {
        let inner = read_json(self)?;
        validate_item(&inner, None)?;
        Ok(inner)
    }
}

/// Unwraps a JSON body guard, turning read and parse failures into 400s.
pub fn read_json<T>(body: Result<Json<T>, json::Error<'_>>) -> Result<T, AppError> {
    match body {
        Ok(body) => Ok(body.into_inner()),
        Err(json::Error::Io(err)) => Err(AppError::Validation(format!(
            "Could not read request body: {}",
            err
        ))),
        Err(json::Error::Parse(_, err)) => {
            Err(AppError::Validation(format!("Malformed JSON: {}", err)))
        }
    }
}

/// Validates one item; `label` prefixes the message for items of a batch.
pub fn validate_item<T: Validate>(item: &T, label: Option<&str>) -> Result<(), AppError> {
    item.validate().map_err(|errors| {
        let message = describe_validation_errors(&errors);
        AppError::Validation(match label {
            Some(label) => format!("{}: {}", label, message),
            None => message,
        })
    })
}

pub trait FormValidateExt<T> {
    fn validate_custom(self) -> Result<T, AppError>;
}

impl<T> FormValidateExt<T> for Result<Form<T>, Errors<'_>> {
    #[instrument(skip_all)]
    fn validate_custom(self) -> Result<T, AppError> {
        match self {
            Ok(form) => Ok(form.into_inner()),
            Err(errors) => {
                let message = errors
                    .iter()
                    .map(|e| match &e.name {
                        Some(name) => format!("{}: {}", name, e.kind),
                        None => e.kind.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("; ");
                Err(AppError::Validation(format!("Malformed form data: {}", message)))
            }
        }
    }
}

pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::Validation(format!("{}: invalid date '{}', use YYYY-MM-DD", field, raw))
    })
}

pub fn parse_optional_date(field: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, AppError> {
    match raw {
        Some(value) if !value.trim().is_empty() => parse_date(field, value).map(Some),
        _ => Ok(None),
    }
}

/// Loose boolean used by form posts: `true`, `1`, `yes` (any case).
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

pub fn validate_spec_scores(specs: &Specs) -> Result<(), ValidationError> {
    for (key, score) in specs {
        if key.trim().is_empty() {
            return Err(ValidationError::new("specs")
                .with_message("spec names must not be empty".into()));
        }
        if !score.is_finite() || *score < SPEC_SCORE_MIN || *score > SPEC_SCORE_MAX {
            return Err(ValidationError::new("specs").with_message(
                format!("'{}' must be between 0 and 100", key).into(),
            ));
        }
    }
    Ok(())
}

/// Parses a `specs` payload that arrived as raw JSON text (multipart forms).
pub fn parse_specs(raw: Option<&str>) -> Result<Option<Specs>, AppError> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(None),
    };

    let value: Value = serde_json::from_str(raw)
        .map_err(|e| AppError::Validation(format!("specs: malformed JSON ({})", e)))?;

    let object = value
        .as_object()
        .ok_or_else(|| AppError::Validation("specs: expected a JSON object".to_string()))?;

    let mut specs = Specs::new();
    for (key, value) in object {
        let score = value.as_f64().ok_or_else(|| {
            AppError::Validation(format!("specs: '{}' must be a number", key))
        })?;
        specs.insert(key.clone(), score);
    }

    validate_spec_scores(&specs).map_err(|e| {
        AppError::Validation(format!(
            "specs: {}",
            e.message.map(|m| m.to_string()).unwrap_or_default()
        ))
    })?;

    Ok(Some(specs))
}
