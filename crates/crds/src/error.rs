//! CRD helper errors

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CrdError {
    /// A label selector requirement used an operator we do not understand
    #[error("invalid label selector operator {operator:?} for key {key:?}")]
    InvalidSelectorOperator { key: String, operator: String },

    /// `In`/`NotIn` requirements need at least one value
    #[error("label selector requirement for key {0:?} needs at least one value")]
    EmptySelectorValues(String),

    /// `Exists`/`DoesNotExist` requirements must not carry values
    #[error("label selector requirement for key {0:?} must not have values")]
    UnexpectedSelectorValues(String),
}
