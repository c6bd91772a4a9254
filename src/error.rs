use crate::types::JsValue;
use thiserror::Error;

/// Machine-readable code carried by receiver-validation failures.
pub const ERR_INVALID_THIS: &str = "ERR_INVALID_THIS";

/// Failures raised by the binding layer. Every variant surfaces to script as
/// an error object; see [`crate::Realm::error_to_value`].
#[derive(Debug, Clone, Error)]
pub enum BindingError {
    #[error("{0}")]
    InvalidThis(String),
    #[error("{0}")]
    InvalidConstruction(String),
    /// A class constructor called as a plain function.
    #[error("Class constructor {0} cannot be invoked without 'new'")]
    ConstructorMisuse(String),
    #[error("{0}")]
    NativeCallTypeError(String),
    #[error("{0}")]
    Range(String),
    #[error("{0}")]
    Reference(String),
    /// A script value thrown by a script closure or carried by a rejected
    /// promise.
    #[error("Uncaught {0}")]
    Thrown(JsValue),
}

impl BindingError {
    pub fn name(&self) -> &'static str {
        match self {
            BindingError::InvalidThis(_)
            | BindingError::InvalidConstruction(_)
            | BindingError::ConstructorMisuse(_)
            | BindingError::NativeCallTypeError(_) => "TypeError",
            BindingError::Range(_) => "RangeError",
            BindingError::Reference(_) => "ReferenceError",
            BindingError::Thrown(_) => "Error",
        }
    }

    pub fn code(&self) -> Option<&'static str> {
        match self {
            BindingError::InvalidThis(_) => Some(ERR_INVALID_THIS),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            BindingError::Thrown(v) => v.to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_type_error(&self) -> bool {
        self.name() == "TypeError"
    }

    pub(crate) fn type_error(msg: impl Into<String>) -> Self {
        BindingError::NativeCallTypeError(msg.into())
    }

    pub(crate) fn construction(msg: impl Into<String>) -> Self {
        BindingError::InvalidConstruction(msg.into())
    }
}

/// Failures while populating a realm's class registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("class {0} is already registered")]
    Duplicate(String),
    #[error("'{0}' is not a valid class name")]
    InvalidName(String),
    #[error("superclass of {0} is not registered")]
    UnknownSuperclass(String),
}
