//! Serialization format abstraction.
//!
//! Request and response bodies go through [`Format`] so handlers never name a
//! concrete JSON library. JSON is handled by sonic-rs.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;

use crate::RelayError;

/// Supported serialization formats.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub enum Format {
    #[default]
    Json,
}

impl Format {
    /// Returns the MIME content type for this format.
    pub fn content_type(self) -> &'static str {
        match self {
            Format::Json => "application/json",
        }
    }

    /// Serialize the value to bytes.
    pub fn serialize<'a, T: Serialize>(self, val: &T) -> Result<Cow<'a, [u8]>, RelayError> {
        match self {
            Format::Json => Ok(Cow::from(sonic_rs::to_vec(val)?)),
        }
    }

    /// Deserialize a request body. Failures are client errors.
    pub fn deserialize_owned<'a, T: Deserialize<'a>>(self, val: &'a [u8]) -> Result<T, RelayError> {
        match self {
            Format::Json => {
                sonic_rs::from_slice::<T>(val).map_err(|e| RelayError::Parse(e.to_string()))
            }
        }
    }
}
