// ── Resource naming ──
//
// Topics follow `{product}/{deviceClass}/{messageKind}`. The message kind
// segment is what the ingest path routes on; product and device class are
// opaque labels chosen by deployment config.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::error::Error;

const SEPARATOR: char = '/';

/// Kind of message carried on a topic.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
pub enum MessageKind {
    #[strum(serialize = "SensorMsg")]
    SensorMsg,
    #[strum(serialize = "ActuatorCmd")]
    ActuatorCmd,
    #[strum(serialize = "ActuatorResponse")]
    ActuatorResponse,
    #[strum(serialize = "SystemPerfMsg")]
    SystemPerfMsg,
    #[strum(serialize = "ConnectionStateMsg")]
    ConnectionStateMsg,
}

impl MessageKind {
    /// `true` for the two kinds that carry actuator records.
    pub fn is_actuator(self) -> bool {
        matches!(self, Self::ActuatorCmd | Self::ActuatorResponse)
    }
}

/// A fully-qualified topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Topic {
    pub product: String,
    pub device_class: String,
    pub kind: MessageKind,
}

impl Topic {
    pub fn new(product: impl Into<String>, device_class: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            product: product.into(),
            device_class: device_class.into(),
            kind,
        }
    }

    /// Subscription filter matching every kind for this product and device class.
    pub fn wildcard(product: &str, device_class: &str) -> String {
        format!("{product}{SEPARATOR}{device_class}{SEPARATOR}+")
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            self.product, self.device_class, self.kind
        )
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidTopic {
            topic: s.to_owned(),
            reason: reason.to_owned(),
        };

        let mut parts = s.split(SEPARATOR);
        let (Some(product), Some(device_class), Some(kind), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three '/'-separated segments"));
        };
        if product.is_empty() || device_class.is_empty() {
            return Err(invalid("empty product or device class segment"));
        }
        let kind = kind
            .parse::<MessageKind>()
            .map_err(|_| invalid("unknown message kind"))?;

        Ok(Self::new(product, device_class, kind))
    }
}

/// MQTT-style filter match: `+` matches one segment, a trailing `#`
/// matches any remainder (including nothing).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split(SEPARATOR);
    let mut topic_parts = topic.split(SEPARATOR);

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return filter_parts.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn topic_round_trips_through_display() {
        let topic = Topic::new("twinsync", "ConstrainedDevice", MessageKind::SensorMsg);
        assert_eq!(topic.to_string(), "twinsync/ConstrainedDevice/SensorMsg");
        assert_eq!(topic.to_string().parse::<Topic>().unwrap(), topic);
    }

    #[test]
    fn topic_rejects_unknown_kind() {
        let err = "twinsync/Edge/Bogus".parse::<Topic>().unwrap_err();
        assert!(matches!(err, Error::InvalidTopic { .. }));
    }

    #[test]
    fn topic_rejects_wrong_segment_count() {
        assert!("twinsync/SensorMsg".parse::<Topic>().is_err());
        assert!("a/b/SensorMsg/extra".parse::<Topic>().is_err());
        assert!("/b/SensorMsg".parse::<Topic>().is_err());
    }

    #[test]
    fn filter_single_level_wildcard() {
        assert!(topic_matches("twinsync/Edge/+", "twinsync/Edge/SensorMsg"));
        assert!(!topic_matches("twinsync/Edge/+", "twinsync/Other/SensorMsg"));
        assert!(!topic_matches("twinsync/+", "twinsync/Edge/SensorMsg"));
    }

    #[test]
    fn filter_multi_level_wildcard() {
        assert!(topic_matches("twinsync/#", "twinsync/Edge/SensorMsg"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("other/#", "twinsync/Edge/SensorMsg"));
    }

    #[test]
    fn wildcard_filter_matches_every_kind() {
        let filter = Topic::wildcard("twinsync", "Edge");
        for kind in <MessageKind as strum::IntoEnumIterator>::iter() {
            let topic = Topic::new("twinsync", "Edge", kind).to_string();
            assert!(topic_matches(&filter, &topic), "{topic}");
        }
    }
}
