use thiserror::Error;

/// Fatal problem with an interface description, reported against the
/// declaration that caused it.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("{location}: {kind}")]
pub struct ModelError {
    pub location: String,
    pub kind: ModelErrorKind,
}

impl ModelError {
    pub fn new(location: impl Into<String>, kind: ModelErrorKind) -> Self {
        Self {
            location: location.into(),
            kind,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ModelErrorKind {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("type '{0}' is declared more than once")]
    DuplicateType(String),

    #[error("field '{0}' is declared more than once")]
    DuplicateField(String),

    #[error("channel '{0}' is declared more than once")]
    DuplicateChannel(String),

    #[error("message '{0}' is declared more than once")]
    DuplicateMessage(String),

    #[error("value {value} of '{name}' collides with '{other}'")]
    DuplicateValue {
        name: String,
        other: String,
        value: u64,
    },

    #[error("'{name}' and '{other}' produce the same identifier")]
    DuplicateSymbol { name: String, other: String },

    #[error("unknown type '{0}'")]
    UnknownType(String),

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),

    #[error("length field '{field}' {reason}")]
    BadLengthField { field: String, reason: String },

    #[error("discriminant '{field}' {reason}")]
    BadDiscriminant { field: String, reason: String },

    #[error("an array sized by remaining bytes must be the last field of its struct")]
    MisplacedRemainingArray,

    #[error("'{0}' is not a struct")]
    NotAStruct(String),

    #[error("message declares both a body type and inline fields")]
    ConflictingBody,

    #[error("invalid pointer target '{target}': {reason}")]
    InvalidPointerTarget { target: String, reason: String },

    #[error("value {value} does not fit in {base}")]
    ValueOutOfRange { value: u64, base: String },

    #[error("switch declares no cases")]
    EmptySwitch,

    #[error("types contain each other by value: {}", .0.join(" -> "))]
    ContainmentCycle(Vec<String>),

    #[error("channels inherit from each other: {}", .0.join(" -> "))]
    InheritanceCycle(Vec<String>),

    #[error("size computation overflowed")]
    SizeOverflow,
}
