//! Error types for query construction.

/// Errors raised while building a query.
///
/// All of these are construction-time failures: the builder either
/// produces valid SQL text or fails before returning it. Nothing here
/// is retried or recovered automatically.
#[derive(Debug, thiserror::Error)]
pub enum BuilderError {
    /// A column reference named a field that does not exist on the model.
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField {
        /// The model the field was looked up on.
        model: &'static str,
        /// The missing field name.
        field: String,
    },

    /// An expression node or operand combination has no SQL translation.
    #[error("no SQL translation: {0}")]
    NotSupported(String),

    /// A join was requested without a predicate and no foreign-key
    /// relationship could be inferred between the two tables.
    #[error("could not infer relationship between {from} and {to}")]
    NoRelationship {
        /// The join's source model.
        from: &'static str,
        /// The join's target model.
        to: &'static str,
    },

    /// Internal WHERE-clause bookkeeping found malformed state.
    ///
    /// Indicates a prior builder bug rather than bad caller input.
    #[error("invalid WHERE expression state: {0}")]
    InvalidState(String),

    /// An UPDATE or INSERT statement was prepared with no eligible columns.
    #[error("no eligible fields remain for model '{0}'")]
    NoFields(&'static str),

    /// A raw SQL fragment failed injection verification.
    #[error("potentially unsafe SQL fragment: {0}")]
    UnsafeFragment(String),
}

/// Result type alias for query building.
pub type Result<T> = std::result::Result<T, BuilderError>;
