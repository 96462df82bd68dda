//! JSON body extraction with validation.
//!
//! Rejections are reported as [`AppError::Validation`] with one
//! [`FieldError`] per offending field, located as `body -> field -> ...`.

use std::sync::LazyLock;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use regex::Regex;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError, ValidationErrors, ValidationErrorsKind};

use crate::types::{AppError, FieldError};

const BODY: &str = "body";
const DATA_ERROR_PREFIX: &str = "into the target type: ";

static MISSING_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"missing field `([^`]+)`").expect("missing field pattern compiles"));

// `path.to.field: message` as produced for typed deserialization errors
static FIELD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][\w\.\[\]]*): (.+)$").expect("field path pattern compiles")
});

/// `Json<T>` that also runs `T::validate`
#[derive(Debug, Clone)]
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection_errors(&rejection)))?;

        value
            .validate()
            .map_err(|errors| AppError::Validation(validation_errors(&errors)))?;

        Ok(Self(value))
    }
}

fn join_loc(path: &str) -> String {
    std::iter::once(BODY)
        .chain(
            path.split(|c| c == '.' || c == '[' || c == ']')
                .filter(|segment| !segment.is_empty()),
        )
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Locate a JSON deserialization error message on the request body
pub fn locate_data_error(detail: &str) -> FieldError {
    let (path, message) = match FIELD_PATH.captures(detail) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (String::new(), detail.to_string()),
    };

    let mut loc = join_loc(&path);
    let error_type = match MISSING_FIELD.captures(&message) {
        Some(caps) => {
            loc.push_str(" -> ");
            loc.push_str(&caps[1]);
            "missing"
        }
        None => "value_error",
    };

    FieldError::new(loc, message, error_type)
}

pub fn rejection_errors(rejection: &JsonRejection) -> Vec<FieldError> {
    match rejection {
        JsonRejection::JsonDataError(e) => {
            let text = e.body_text();
            let detail = text
                .split_once(DATA_ERROR_PREFIX)
                .map_or(text.as_str(), |(_, rest)| rest);
            vec![locate_data_error(detail)]
        }
        JsonRejection::JsonSyntaxError(e) => {
            vec![FieldError::new(BODY, e.body_text(), "json_invalid")]
        }
        JsonRejection::MissingJsonContentType(e) => {
            vec![FieldError::new(BODY, e.body_text(), "content_type")]
        }
        other => vec![FieldError::new(BODY, other.body_text(), "body_error")],
    }
}

fn describe(error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }

    let param = |name: &str| error.params.get(name).map(|v| v.to_string());
    match error.code.as_ref() {
        "length" => match (param("min"), param("max")) {
            (Some(min), Some(max)) => format!("length must be between {} and {} characters", min, max),
            (Some(min), None) => format!("length must be at least {} characters", min),
            (None, Some(max)) => format!("length must be at most {} characters", max),
            (None, None) => "invalid length".to_string(),
        },
        "range" => {
            let lower = param("min").map(|v| format!("[{}", v));
            let upper = param("max")
                .map(|v| format!("{}]", v))
                .or_else(|| param("exclusive_max").map(|v| format!("{})", v)));
            match (lower, upper) {
                (Some(lower), Some(upper)) => format!("value must be in range {}, {}", lower, upper),
                _ => "value out of range".to_string(),
            }
        }
        code => format!("invalid value ({})", code),
    }
}

fn collect(errors: &ValidationErrors, loc: &str, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let field_loc = format!("{} -> {}", loc, field);
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    out.push(FieldError::new(&field_loc, describe(error), error.code.to_string()));
                }
            }
            ValidationErrorsKind::Struct(inner) => collect(inner, &field_loc, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect(inner, &format!("{} -> {}", field_loc, index), out);
                }
            }
        }
    }
}

/// Flatten nested validator errors, sorted by location
pub fn validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut out = Vec::new();
    collect(errors, BODY, &mut out);
    out.sort_by(|a, b| a.loc.cmp(&b.loc));
    out
}
