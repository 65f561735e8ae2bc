//! Correlation identifiers using the TypeID specification
//!
//! Every envelope carries a correlation id so that a response can be matched
//! with the log lines written while producing it. Ids are generated once per
//! request (see [`crate::context::RequestContext`]) and never read from global
//! state.
//!
//! Correlation ids use UUIDv7, so they are time-sortable:
//!
//! ```rust
//! use crud_core::ids::CorrelationId;
//!
//! let id = CorrelationId::new();
//! assert!(id.as_str().starts_with("cid_"));
//! ```

use mti::prelude::*;
use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A type-safe correlation identifier shared by a request's logs and envelope.
///
/// Format: `cid_<base32-encoded-uuidv7>`, e.g. `cid_01h455vb4pex5vsknk084sn02q`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CorrelationId(MagicTypeId);

impl CorrelationId {
    /// The prefix used for correlation ids
    pub const PREFIX: &'static str = "cid";

    /// Creates a new time-sortable correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Self::PREFIX.create_type_id::<V7>())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Returns the prefix portion of the id.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.prefix().as_str()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = CorrelationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mti = MagicTypeId::from_str(s).map_err(CorrelationIdError::Parse)?;

        if mti.prefix().as_str() != Self::PREFIX {
            return Err(CorrelationIdError::InvalidPrefix {
                expected: Self::PREFIX.to_string(),
                actual: mti.prefix().as_str().to_string(),
            });
        }

        Ok(Self(mti))
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Serialize for CorrelationId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Error type for correlation id parsing.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationIdError {
    /// The id could not be parsed as a valid TypeID.
    #[error("failed to parse correlation ID: {0}")]
    Parse(#[from] MagicTypeIdError),

    /// The prefix was not the expected value.
    #[error("invalid prefix: expected '{expected}', got '{actual}'")]
    InvalidPrefix {
        /// The expected prefix.
        expected: String,
        /// The actual prefix found.
        actual: String,
    },
}
