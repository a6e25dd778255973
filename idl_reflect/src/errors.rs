use idl_gen::codegen::shared::builder::PlanBuildError;
use idl_gen::model::ModelError;
use thiserror::Error;

/// Result alias used across the reflection crate.
pub type ReflectResult<T> = Result<T, ReflectError>;

/// Why a buffer was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// A required byte range extends past the end of the buffer.
    Truncated,
    /// No switch arm matches the discriminant and there is no default.
    InvalidDiscriminant,
    InvalidEnumValue,
    /// Negative element count.
    InvalidCount,
    /// Negative pointer offset, or a target overlapping data still being decoded.
    InvalidOffset,
    Overflow,
    DepthExceeded,
    UnknownMessage,
}

impl DecodeErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DecodeErrorKind::Truncated => "truncated",
            DecodeErrorKind::InvalidDiscriminant => "invalid discriminant",
            DecodeErrorKind::InvalidEnumValue => "invalid enum value",
            DecodeErrorKind::InvalidCount => "invalid count",
            DecodeErrorKind::InvalidOffset => "invalid offset",
            DecodeErrorKind::Overflow => "size overflow",
            DecodeErrorKind::DepthExceeded => "pointer depth exceeded",
            DecodeErrorKind::UnknownMessage => "unknown message",
        }
    }
}

/// A decode failure and the field it happened at.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} at {path}", .kind.as_str())]
pub struct DecodeError {
    kind: DecodeErrorKind,
    path: String,
}

impl DecodeError {
    pub fn new(kind: DecodeErrorKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    pub fn kind(&self) -> DecodeErrorKind {
        self.kind
    }

    /// Dotted field path, array elements as `name[i]`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Top-level errors produced by the reflection runtime.
#[derive(Debug, Error)]
pub enum ReflectError {
    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("failed to build decode plan: {0}")]
    Plan(#[from] PlanBuildError),

    #[error("type '{type_name}' is not a named struct")]
    UnknownType { type_name: String },

    #[error("no {direction} message '{message}' on channel '{channel}'")]
    UnknownMessage {
        channel: String,
        direction: String,
        message: String,
    },

    #[error(transparent)]
    Decode(#[from] DecodeError),
}
