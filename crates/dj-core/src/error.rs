//! Error types for the dijet shape pipeline

use thiserror::Error;

use crate::stage::CorrelationStage;
use crate::types::BinKey;

/// Pipeline error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    /// A required earlier-stage distribution is absent for this key.
    #[error("missing input for {key}: requires {requires}")]
    MissingInput {
        /// Key whose derivation was requested.
        key: BinKey,
        /// Stage that had to be present for the same slice.
        requires: CorrelationStage,
    },

    /// The stage cannot exist for this dataset's layout.
    #[error("{key}: stage {} is not derivable from a layout providing [{layout}]", key.stage)]
    NotAvailable {
        /// Key that was requested.
        key: BinKey,
        /// Stages the dataset provides, comma separated.
        layout: String,
    },

    /// Bin edges are invalid or do not line up.
    #[error("invalid binning: {0}")]
    InvalidBinning(String),

    /// Uncertainty source / group not enabled, not computed, or bad run configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Validation error
    #[error("validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("computation error: {0}")]
    Computation(String),

    /// Error raised while processing one key.
    #[error("{key}: {source}")]
    InKey {
        /// Key being processed.
        key: BinKey,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach key context, leaving errors that already carry a key untouched.
    pub fn in_key(self, key: BinKey) -> Self {
        match self {
            Error::MissingInput { .. } | Error::NotAvailable { .. } | Error::InKey { .. } => self,
            other => Error::InKey { key, source: Box::new(other) },
        }
    }

    /// Prefix the message of a string-carrying variant with `what`, keeping the variant.
    ///
    /// Errors with structured payloads are returned unchanged.
    pub fn context(self, what: impl std::fmt::Display) -> Self {
        match self {
            Error::InvalidBinning(m) => Error::InvalidBinning(format!("{what}: {m}")),
            Error::Configuration(m) => Error::Configuration(format!("{what}: {m}")),
            Error::Validation(m) => Error::Validation(format!("{what}: {m}")),
            Error::Computation(m) => Error::Computation(format!("{what}: {m}")),
            other => other,
        }
    }

    /// Key this error is localized to, if any.
    pub fn key(&self) -> Option<&BinKey> {
        match self {
            Error::MissingInput { key, .. } | Error::NotAvailable { key, .. } | Error::InKey { key, .. } => {
                Some(key)
            }
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BinSel, PairCategory, SliceKey};

    fn key() -> BinKey {
        BinKey::new(
            CorrelationStage::Corrected,
            SliceKey::new(PairCategory::TrackLeadingJet, 1, BinSel::Bin(2), BinSel::Integrated),
        )
    }

    #[test]
    fn in_key_wraps_once() {
        let err = Error::InvalidBinning("edges".into()).in_key(key());
        assert_eq!(err.key(), Some(&key()));
        let again = err.in_key(key());
        assert!(matches!(again, Error::InKey { ref source, .. } if matches!(**source, Error::InvalidBinning(_))));
    }

    #[test]
    fn context_keeps_the_variant() {
        let err = Error::Configuration("no such dataset".into()).context("jet_energy_scale");
        assert!(matches!(err, Error::Configuration(ref m) if m == "jet_energy_scale: no such dataset"));
        let err = Error::InvalidBinning("edges".into()).context("pair_acceptance");
        assert!(matches!(err, Error::InvalidBinning(_)));
        let missing = Error::MissingInput { key: key(), requires: CorrelationStage::Corrected }.context("x");
        assert!(matches!(missing, Error::MissingInput { .. }));
    }

    #[test]
    fn missing_input_message_names_stage() {
        let err = Error::MissingInput { key: key(), requires: CorrelationStage::MixedEventNormalized };
        let msg = err.to_string();
        assert!(msg.contains("mixed_event_normalized"), "{msg}");
        assert!(msg.contains("track_leading_jet"), "{msg}");
    }
}
