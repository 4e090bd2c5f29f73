use thiserror::Error;

/// Failure while decoding an effect blob, a shader constant table, or a preshader program.
///
/// Parsing is all-or-nothing: any of these aborts effect creation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("invalid effect format: {0}")]
    InvalidFormat(String),
    #[error("truncated {what}: need {needed} bytes at offset {offset}, have {len}")]
    Truncated {
        what: &'static str,
        offset: usize,
        needed: usize,
        len: usize,
    },
}

impl ParseError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}

/// Runtime error returned by effect accessors and the pass engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EffectError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The caller violated a precondition (wrong shape, short buffer, bad handle, bad state).
    ///
    /// Nothing is mutated when this is returned.
    #[error("invalid call: {0}")]
    InvalidCall(&'static str),
    /// A state assignment could not be resolved while applying a pass.
    #[error("state evaluation failed: {0}")]
    Evaluation(String),
}

pub type Result<T, E = EffectError> = std::result::Result<T, E>;
