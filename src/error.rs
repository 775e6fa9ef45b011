// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Closed error-kind enum shared by every fallible operation in this crate.
//!
//! `Ignored` is deliberately part of this enum rather than a separate
//! `Result<Outcome>` wrapper: duplicate-add, no-op clears, already-frozen
//! freezes and "write same value" all recover locally and should not
//! propagate as hard failures, but callers (and the RPC layer) still need
//! to distinguish them from a genuine no-op success.

use std::fmt;

/// Every error kind the runtime can surface, per the error-handling design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A required argument was null/absent.
    ArgumentNull(String),
    /// An argument failed validation before any state was touched.
    InvalidParameter(String),
    /// `borrowInterface` was asked for a capability the object doesn't implement.
    NoInterface(String),
    /// Lookup by name/id/path found nothing.
    NotFound(String),
    /// An item with this identity already exists.
    AlreadyExists(String),
    /// A folder rejected an `add` because the local id collides.
    DuplicateItem(String),
    /// A numeric or index argument fell outside its valid range.
    OutOfRange(String),
    /// A mutator was called on a frozen value.
    Frozen,
    /// The caller's permissions don't cover the requested operation.
    AccessDenied(String),
    /// A value's runtime type doesn't match what the operation expected.
    InvalidType(String),
    /// The object is not in a state that allows the requested operation.
    InvalidState(String),
    /// A value failed a structural/semantic check unrelated to its type.
    InvalidValue(String),
    /// A named property does not exist on the object.
    InvalidProperty(String),
    /// A value could not be converted to the target core type.
    ConversionFailed(String),
    /// A property's coercer rejected (or failed to transform) the value.
    CoercionFailed(String),
    /// A property's validator rejected the value.
    ValidateFailed(String),
    /// An `EvalValue` reference (`%name`, `name:value`, ...) didn't resolve.
    ResolveFailed(String),
    /// Evaluating an `EvalValue` expression failed.
    CalcFailed(String),
    /// Parsing an expression or filter string failed.
    ParseFailed(String),
    /// An object does not support being serialised.
    NotSerializable(String),
    /// The operation is recognised but not implemented.
    NotImplemented(String),
    /// The operation is recognised but not supported in this configuration.
    NotSupported(String),
    /// Allocation failed.
    NoMemory,
    /// Catch-all for conditions not covered by a more specific variant.
    GeneralError(String),
    /// Advisory, not an error: the call was a recoverable no-op.
    Ignored,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ArgumentNull(m) => write!(f, "argument null: {m}"),
            Error::InvalidParameter(m) => write!(f, "invalid parameter: {m}"),
            Error::NoInterface(m) => write!(f, "no such interface: {m}"),
            Error::NotFound(m) => write!(f, "not found: {m}"),
            Error::AlreadyExists(m) => write!(f, "already exists: {m}"),
            Error::DuplicateItem(m) => write!(f, "duplicate item: {m}"),
            Error::OutOfRange(m) => write!(f, "out of range: {m}"),
            Error::Frozen => write!(f, "object is frozen"),
            Error::AccessDenied(m) => write!(f, "access denied: {m}"),
            Error::InvalidType(m) => write!(f, "invalid type: {m}"),
            Error::InvalidState(m) => write!(f, "invalid state: {m}"),
            Error::InvalidValue(m) => write!(f, "invalid value: {m}"),
            Error::InvalidProperty(m) => write!(f, "invalid property: {m}"),
            Error::ConversionFailed(m) => write!(f, "conversion failed: {m}"),
            Error::CoercionFailed(m) => write!(f, "coercion failed: {m}"),
            Error::ValidateFailed(m) => write!(f, "validation failed: {m}"),
            Error::ResolveFailed(m) => write!(f, "reference resolution failed: {m}"),
            Error::CalcFailed(m) => write!(f, "expression evaluation failed: {m}"),
            Error::ParseFailed(m) => write!(f, "parse failed: {m}"),
            Error::NotSerializable(m) => write!(f, "not serializable: {m}"),
            Error::NotImplemented(m) => write!(f, "not implemented: {m}"),
            Error::NotSupported(m) => write!(f, "not supported: {m}"),
            Error::NoMemory => write!(f, "out of memory"),
            Error::GeneralError(m) => write!(f, "error: {m}"),
            Error::Ignored => write!(f, "ignored"),
        }
    }
}

impl std::error::Error for Error {}

/// Crate-wide result alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Outcome of an operation that may recover locally instead of failing.
///
/// Distinguishes a genuine state change (`Applied`) from a recoverable
/// no-op (`Ignored`) without forcing callers to pattern-match `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The operation changed state and (where applicable) fired an event.
    Applied,
    /// The operation was a no-op per the "recover locally" policy in §7.
    Ignored,
}

impl Outcome {
    /// True if the operation actually changed something.
    pub fn applied(self) -> bool {
        matches!(self, Outcome::Applied)
    }
}
