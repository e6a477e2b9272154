// ── Twin property table entries ──

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::schema::{ContentDescriptor, ContentKind};

/// Current value plus the envelope it is allowed to move within.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueContainer {
    pub value: Value,
    pub target: Value,
    pub nominal_delta: Option<f64>,
    pub max_delta: Option<f64>,
    pub nominal_floor: Option<f64>,
    pub nominal_ceiling: Option<f64>,
    pub absolute_floor: Option<f64>,
    pub absolute_ceiling: Option<f64>,
}

impl ValueContainer {
    pub fn as_f64(&self) -> Option<f64> {
        self.value.as_f64()
    }

    pub fn target_f64(&self) -> Option<f64> {
        self.target.as_f64()
    }

    /// Hard limits. Values outside them are rejected.
    pub fn within_absolute(&self, candidate: f64) -> bool {
        self.absolute_floor.is_none_or(|floor| candidate >= floor)
            && self.absolute_ceiling.is_none_or(|ceiling| candidate <= ceiling)
    }

    /// Soft limits. Values outside them are accepted but worth flagging.
    pub fn within_nominal(&self, candidate: f64) -> bool {
        self.nominal_floor.is_none_or(|floor| candidate >= floor)
            && self.nominal_ceiling.is_none_or(|ceiling| candidate <= ceiling)
    }

    /// `true` if moving from the current value to `candidate` jumps by more
    /// than `max_delta`.
    pub fn exceeds_max_delta(&self, candidate: f64) -> bool {
        match (self.max_delta, self.as_f64()) {
            (Some(max), Some(current)) => (candidate - current).abs() > max,
            _ => false,
        }
    }
}

/// One named entry in a twin's property table, built from a schema
/// descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct TwinProperty {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub unit: Option<String>,
    pub enabled: bool,
    pub writable: bool,
    /// Fed by device telemetry rather than set by operators.
    pub telemetry: bool,
    /// Finite set of command codes this property accepts, if restricted.
    pub valid_commands: Option<BTreeSet<i32>>,
    pub value: ValueContainer,
    pub created_at: DateTime<Utc>,
    pub value_updated_at: Option<DateTime<Utc>>,
    pub target_updated_at: Option<DateTime<Utc>>,
}

impl TwinProperty {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            unit: None,
            enabled: true,
            writable: false,
            telemetry: false,
            valid_commands: None,
            value: ValueContainer::default(),
            created_at: Utc::now(),
            value_updated_at: None,
            target_updated_at: None,
        }
    }

    /// Telemetry descriptors are always read-only; property descriptors
    /// carry the schema's writable flag; command descriptors are writable
    /// and restricted to their declared codes.
    pub fn from_descriptor(descriptor: &ContentDescriptor) -> Self {
        let mut property = Self::new(descriptor.name.clone());
        if let Some(display_name) = &descriptor.display_name {
            property.display_name.clone_from(display_name);
        }
        property.description = descriptor.description.clone().unwrap_or_default();
        property.unit.clone_from(&descriptor.unit);

        match descriptor.kind {
            ContentKind::Telemetry => {
                property.telemetry = true;
                property.writable = false;
            }
            ContentKind::Property => {
                property.writable = descriptor.writable;
            }
            ContentKind::Command => {
                property.writable = true;
                if !descriptor.command_codes.is_empty() {
                    property.valid_commands = Some(descriptor.command_codes.iter().copied().collect());
                }
            }
        }

        let bounds = &descriptor.bounds;
        property.value.nominal_delta = bounds.nominal_delta;
        property.value.max_delta = bounds.max_delta;
        property.value.nominal_floor = bounds.nominal_floor;
        property.value.nominal_ceiling = bounds.nominal_ceiling;
        property.value.absolute_floor = bounds.absolute_floor;
        property.value.absolute_ceiling = bounds.absolute_ceiling;
        property
    }

    pub fn accepts_command(&self, command: i32) -> bool {
        self.valid_commands
            .as_ref()
            .is_none_or(|codes| codes.contains(&command))
    }

    /// Record a value reported by the device. Numeric values outside the
    /// absolute bounds are rejected and the previous value kept.
    pub fn update_value(&mut self, value: Value, at: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(candidate) = value.as_f64() {
            if !self.value.within_absolute(candidate) {
                warn!(
                    property = %self.name,
                    value = candidate,
                    "value outside absolute bounds, keeping previous"
                );
                return false;
            }
            if !self.value.within_nominal(candidate) || self.value.exceeds_max_delta(candidate) {
                warn!(property = %self.name, value = candidate, "value outside nominal range");
            }
        }
        self.value.value = value;
        self.value_updated_at = Some(at);
        true
    }

    /// Record a locally requested target. Only writable properties accept
    /// targets; command codes must be in the valid set when one exists.
    pub fn set_target(&mut self, target: Value, at: DateTime<Utc>) -> bool {
        if !self.enabled || !self.writable {
            return false;
        }
        if self.valid_commands.is_some() {
            let accepted = target
                .as_i64()
                .and_then(|code| i32::try_from(code).ok())
                .is_some_and(|code| self.accepts_command(code));
            if !accepted {
                warn!(property = %self.name, %target, "command code not in valid set");
                return false;
            }
        }
        if let Some(candidate) = target.as_f64() {
            if !self.value.within_absolute(candidate) {
                warn!(property = %self.name, target = candidate, "target outside absolute bounds");
                return false;
            }
        }
        self.value.target = target;
        self.target_updated_at = Some(at);
        true
    }
}
