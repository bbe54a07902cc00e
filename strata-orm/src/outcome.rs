//! # Outcome Module
//!
//! The universal result envelope for every terminal query operation, and the
//! `assert_query` seam HTTP route handlers use to turn a failed envelope
//! into a status-coded error. Expected failures never cross the builders'
//! public boundary as `Err`; they land here.

use serde::ser::SerializeStruct;
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

/// Validation failures keyed by dot-notation field path
/// (e.g. `repeater.0.text`).
pub type InputErrors = BTreeMap<String, String>;

// ============================================================================
// QueryOutcome
// ============================================================================

/// The discriminated envelope returned by every terminal builder method.
///
/// Exactly one payload is populated: `Data` on success, `InputErrors` for
/// validation failures attributable to caller input, `RuntimeError` for
/// everything else (driver rejection, unknown column, builder misuse).
///
/// Serializes as `{"success": true, "data": ...}` or
/// `{"success": false, "inputErrors" | "runtimeError": ...}`.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome<T, E = InputErrors> {
    Data(T),
    InputErrors(E),
    RuntimeError(String),
}

impl<T, E> QueryOutcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    pub fn data(self) -> Option<T> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn input_errors(self) -> Option<E> {
        match self {
            Self::InputErrors(errors) => Some(errors),
            _ => None,
        }
    }

    pub fn runtime_error(self) -> Option<String> {
        match self {
            Self::RuntimeError(message) => Some(message),
            _ => None,
        }
    }

    /// Unwraps the success payload, panicking otherwise. Test helper.
    pub fn expect_data(self, context: &str) -> T
    where
        E: std::fmt::Debug,
    {
        match self {
            Self::Data(data) => data,
            Self::InputErrors(errors) => panic!("{context}: input errors {errors:?}"),
            Self::RuntimeError(message) => panic!("{context}: runtime error {message}"),
        }
    }

    pub(crate) fn from_runtime(error: crate::Error) -> Self {
        Self::RuntimeError(error.to_string())
    }
}

impl<T, E> Serialize for QueryOutcome<T, E>
where
    T: Serialize,
    E: Serialize,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("QueryOutcome", 2)?;
        match self {
            Self::Data(data) => {
                state.serialize_field("success", &true)?;
                state.serialize_field("data", data)?;
            }
            Self::InputErrors(errors) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("inputErrors", errors)?;
            }
            Self::RuntimeError(message) => {
                state.serialize_field("success", &false)?;
                state.serialize_field("runtimeError", message)?;
            }
        }
        state.end()
    }
}

// ============================================================================
// assert_query
// ============================================================================

/// HTTP-facing rendition of a failed envelope.
#[derive(Debug, ThisError)]
pub enum QueryError {
    /// Caller input failed validation; 422-equivalent.
    #[error("validation failed")]
    Validation(serde_json::Value),
    /// Anything else; 400/500-equivalent depending on context.
    #[error("{0}")]
    Runtime(String),
}

impl QueryError {
    /// Suggested HTTP status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 422,
            Self::Runtime(_) => 400,
        }
    }
}

/// Unwraps a [`QueryOutcome`], translating failure variants into a
/// [`QueryError`] the HTTP layer can map to a response.
pub fn assert_query<T, E>(outcome: QueryOutcome<T, E>) -> Result<T, QueryError>
where
    E: Serialize,
{
    match outcome {
        QueryOutcome::Data(data) => Ok(data),
        QueryOutcome::InputErrors(errors) => Err(QueryError::Validation(
            serde_json::to_value(errors).unwrap_or(serde_json::Value::Null),
        )),
        QueryOutcome::RuntimeError(message) => Err(QueryError::Runtime(message)),
    }
}
