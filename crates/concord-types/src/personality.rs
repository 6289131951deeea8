//! Fixed-field agent personality.
//!
//! Personalities are validated once, at construction, and are immutable
//! afterwards. Deserialization goes through the same validation, so a
//! checkpoint with an out-of-range trait is rejected at load time.

use serde::{Deserialize, Serialize};

/// Errors raised when constructing a [`Personality`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PersonalityError {
    /// A trait value was outside `0.0..=1.0` or not finite.
    #[error("personality trait `{name}` out of range: {value} (expected 0.0..=1.0)")]
    OutOfRange {
        /// The offending trait.
        name: &'static str,
        /// The rejected value.
        value: f64,
    },
}

/// Behavioural dispositions of an agent, each in `0.0..=1.0`.
///
/// The traits are probabilities consumed by agent behaviours:
///
/// - `sociability` -- chance to interact with a peer in an epoch
/// - `curiosity` -- chance to record a local observation
/// - `cooperation` -- chance to request a memory sync with a peer
/// - `expressiveness` -- chance to broadcast or emit a resonance pulse
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PersonalityFields", into = "PersonalityFields")]
pub struct Personality {
    sociability: f64,
    curiosity: f64,
    cooperation: f64,
    expressiveness: f64,
}

/// Unvalidated wire form of [`Personality`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonalityFields {
    /// Chance to interact with a peer in an epoch.
    pub sociability: f64,
    /// Chance to record a local observation.
    pub curiosity: f64,
    /// Chance to request a memory sync with a peer.
    pub cooperation: f64,
    /// Chance to broadcast or emit a resonance pulse.
    pub expressiveness: f64,
}

impl Personality {
    /// Construct a validated personality.
    ///
    /// # Errors
    ///
    /// Returns [`PersonalityError::OutOfRange`] for any trait outside
    /// `0.0..=1.0` (NaN and infinities included).
    pub fn new(
        sociability: f64,
        curiosity: f64,
        cooperation: f64,
        expressiveness: f64,
    ) -> Result<Self, PersonalityError> {
        Ok(Self {
            sociability: check_trait("sociability", sociability)?,
            curiosity: check_trait("curiosity", curiosity)?,
            cooperation: check_trait("cooperation", cooperation)?,
            expressiveness: check_trait("expressiveness", expressiveness)?,
        })
    }

    /// A personality with every trait at 0.5.
    pub const fn balanced() -> Self {
        Self {
            sociability: 0.5,
            curiosity: 0.5,
            cooperation: 0.5,
            expressiveness: 0.5,
        }
    }

    /// Chance to interact with a peer in an epoch.
    pub const fn sociability(&self) -> f64 {
        self.sociability
    }

    /// Chance to record a local observation.
    pub const fn curiosity(&self) -> f64 {
        self.curiosity
    }

    /// Chance to request a memory sync with a peer.
    pub const fn cooperation(&self) -> f64 {
        self.cooperation
    }

    /// Chance to broadcast or emit a resonance pulse.
    pub const fn expressiveness(&self) -> f64 {
        self.expressiveness
    }
}

impl Default for Personality {
    fn default() -> Self {
        Self::balanced()
    }
}

impl TryFrom<PersonalityFields> for Personality {
    type Error = PersonalityError;

    fn try_from(f: PersonalityFields) -> Result<Self, Self::Error> {
        Self::new(f.sociability, f.curiosity, f.cooperation, f.expressiveness)
    }
}

impl From<Personality> for PersonalityFields {
    fn from(p: Personality) -> Self {
        Self {
            sociability: p.sociability,
            curiosity: p.curiosity,
            cooperation: p.cooperation,
            expressiveness: p.expressiveness,
        }
    }
}

fn check_trait(name: &'static str, value: f64) -> Result<f64, PersonalityError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(PersonalityError::OutOfRange { name, value })
    }
}
