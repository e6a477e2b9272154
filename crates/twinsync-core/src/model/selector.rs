// ── Schema selectors ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::CoreError;
use crate::key::ModelId;

const MODEL_ID_PREFIX: &str = "dtmi:twinsync:iot";
const MODEL_ID_VERSION: u32 = 1;

/// Chooses which schema a twin is built from.
///
/// Each selector names exactly one schema file and one model id. The
/// display form (`EnvSensors`, `Thermostat`, ...) is what config files and
/// the CLI accept.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum ModelSelector {
    /// Base interface every other schema extends.
    Context,
    EdgeDevice,
    ConstrainedDevice,
    EnvSensors,
    Thermostat,
    Humidifier,
    LedDisplay,
    SystemPerformance,
}

impl ModelSelector {
    /// Schema reference, e.g. `dtmi:twinsync:iot:EnvSensors;1`.
    pub fn model_id(self) -> ModelId {
        let name: &'static str = self.into();
        ModelId::new(format!("{MODEL_ID_PREFIX}:{name};{MODEL_ID_VERSION}"))
    }

    /// File name the schema store reads for this selector.
    pub fn schema_file_name(self) -> String {
        let name: &'static str = self.into();
        format!("{name}.json")
    }

    /// Parse a display name, case-insensitively.
    pub fn from_name(name: &str) -> Result<Self, CoreError> {
        name.trim().parse().map_err(|_| CoreError::UnknownSelector {
            name: name.trim().to_owned(),
        })
    }

    /// Reverse of [`model_id`](Self::model_id).
    pub fn from_model_id(model_id: &ModelId) -> Option<Self> {
        <Self as strum::IntoEnumIterator>::iter().find(|s| s.model_id() == *model_id)
    }
}
