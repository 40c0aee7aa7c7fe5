use std::time::Duration;

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::error::ParamsError;

/// Timing parameters to control validation staleness and expiration.
///
/// These are protocol level parameters that should not be changed without
/// careful consideration. Durations are (de)serialized as whole seconds, and
/// fields missing from the input keep their default.
#[derive(Derivative, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[derivative(Default, Debug)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationParams {
    /// The number of seconds a validation remains current after its ledger's
    /// close time.
    ///
    /// This is a safety to protect against very old validations and the time
    /// it takes to adjust the close time accuracy window.
    #[derivative(Default(value = "Duration::from_secs(5 * 60)"))]
    #[serde(with = "duration_secs")]
    validation_current_wall: Duration,

    /// Duration a validation remains current after first observed.
    ///
    /// The number of seconds a validation remains current after the time we
    /// first saw it. This provides faster recovery in very rare cases where the
    /// number of validations produced by the network is lower than normal.
    #[derivative(Default(value = "Duration::from_secs(3 * 60)"))]
    #[serde(with = "duration_secs")]
    validation_current_local: Duration,

    /// Duration pre-close in which validations are acceptable.
    ///
    /// The number of seconds before a close time that we consider a validation
    /// acceptable. This protects against extreme clock errors.
    #[derivative(Default(value = "Duration::from_secs(3 * 60)"))]
    #[serde(with = "duration_secs")]
    validation_current_early: Duration,

    /// Duration a set of validations for a given ledger hash remain valid.
    ///
    /// The number of seconds before a set of validations for a given ledger
    /// hash can expire. This keeps validations for recent ledgers available
    /// for a reasonable interval.
    #[derivative(Default(value = "Duration::from_secs(10 * 60)"))]
    #[serde(with = "duration_secs")]
    validation_set_expires: Duration,

    /// How long we consider a validation fresh.
    ///
    /// The number of seconds since a validation has been seen for it to
    /// be considered to accurately represent a live proposer's most recent
    /// validation.
    #[derivative(Default(value = "Duration::from_secs(20)"))]
    #[serde(with = "duration_secs")]
    validation_freshness: Duration,
}

impl ValidationParams {
    pub fn new(
        validation_current_wall: Duration,
        validation_current_local: Duration,
        validation_current_early: Duration,
        validation_set_expires: Duration,
        validation_freshness: Duration,
    ) -> Self {
        ValidationParams {
            validation_current_wall,
            validation_current_local,
            validation_current_early,
            validation_set_expires,
            validation_freshness,
        }
    }

    /// Parse parameters from JSON and check that they are usable.
    pub fn from_json(json: &str) -> Result<Self, ParamsError> {
        let params: ValidationParams = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    /// Check that every duration is non-zero and that no freshness window
    /// outlives the validation sets it applies to.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let durations = [
            ("validation_current_wall", self.validation_current_wall),
            ("validation_current_local", self.validation_current_local),
            ("validation_current_early", self.validation_current_early),
            ("validation_set_expires", self.validation_set_expires),
            ("validation_freshness", self.validation_freshness),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ParamsError::ZeroDuration { field: *field });
        }

        // The first three are the freshness windows
        if let Some((field, _)) = durations[..3].iter().find(|(_, d)| *d > self.validation_set_expires) {
            return Err(ParamsError::WindowExceedsExpiry { field: *field });
        }
        Ok(())
    }

    pub fn validation_current_wall(&self) -> Duration {
        self.validation_current_wall
    }

    pub fn validation_current_local(&self) -> Duration {
        self.validation_current_local
    }

    pub fn validation_current_early(&self) -> Duration {
        self.validation_current_early
    }

    pub fn validation_set_expires(&self) -> Duration {
        self.validation_set_expires
    }

    pub fn validation_freshness(&self) -> Duration {
        self.validation_freshness
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
