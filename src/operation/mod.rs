//! Operation pipeline interpreter.
//!
//! An [`ExtractionOperation`] is built from one mapping of provider
//! configuration and runs its phases in a fixed order: find, wait, click,
//! extract, get, parse, format, transform. A field is configured as a single
//! operation, a series of operations, or a constant ([`FieldConfig`]).

pub mod execute;
pub mod methods;
pub mod references;
pub mod series;
pub mod value;

pub use execute::{ExtractionOperation, Scope};
pub use methods::{
    ExtractMethod, FindMethod, FormatMethod, GetMethod, MethodCall, MethodFamily, ParseMethod,
    TransformMethod, WaitMethod,
};
pub use series::FieldConfig;
pub use value::{AssemblyContext, Value};

use thiserror::Error;

use crate::browser::{DriverError, Session};

pub type OperationResult<T> = Result<T, OperationError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    #[error("Expected {expected} value(s) for {context}, received {received}")]
    TooManyValues {
        expected: usize,
        received: usize,
        context: String,
    },

    #[error("Expected at least {expected} value(s) for {context}, received none")]
    TooFewValues { expected: usize, context: String },

    #[error("No value for {0}")]
    NoneValue(String),

    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    #[error("Unknown attribute '{attribute}' for {value} value")]
    UnknownAttribute { attribute: String, value: String },

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("'{value}' matches none of the parse templates {templates:?}")]
    ParseMismatch { value: String, templates: Vec<String> },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Reserved word '{0}' cannot be a content field")]
    ReservedField(String),

    #[error("Invalid operation configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl OperationError {
    /// Element lookups that came back empty. Pagination treats these as the
    /// end of results.
    #[must_use]
    pub fn is_missing_element(&self) -> bool {
        matches!(
            self,
            OperationError::TooFewValues { .. } | OperationError::Driver(DriverError::NoSuchElement(_))
        )
    }
}

/// What an operation runs against: the session for page-level lookups, the
/// record assembled so far for back-references, and a label for logs.
#[derive(Clone, Copy)]
pub struct OperationContext<'a> {
    pub session: &'a dyn Session,
    pub content: &'a AssemblyContext,
    pub label: &'a str,
}

impl<'a> OperationContext<'a> {
    #[must_use]
    pub fn new(session: &'a dyn Session, content: &'a AssemblyContext, label: &'a str) -> Self {
        Self {
            session,
            content,
            label,
        }
    }
}
