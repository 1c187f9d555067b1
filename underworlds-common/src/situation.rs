//! The temporal annotation value type.

use serde::{Deserialize, Serialize};

use crate::ids::SituationId;

/// The type tag of a situation: a `Generic` default plus an open set of
/// domain tags, kept as a distinguished `Generic` variant so the common
/// case doesn't allocate a `String`.
///
/// Wire encoding is the plain string tag (`"generic"` for the default, the
/// tag itself for `Custom`), so this is carried through `#[serde(into,
/// from)]` against `String` rather than `#[serde(untagged)]`: untagged
/// would serialize the data-less `Generic` variant as JSON `null`, not as a
/// string.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum SituationType {
    Generic,
    Custom(String),
}

impl Default for SituationType {
    fn default() -> Self {
        Self::Generic
    }
}

impl std::fmt::Display for SituationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generic => f.write_str("generic"),
            Self::Custom(tag) => f.write_str(tag),
        }
    }
}

impl From<String> for SituationType {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "generic" => Self::Generic,
            _ => Self::Custom(tag),
        }
    }
}

impl From<SituationType> for String {
    fn from(kind: SituationType) -> String {
        kind.to_string()
    }
}

/// The default owner assigned to a situation created without an explicit
/// owner.
pub const DEFAULT_OWNER: &str = "SYSTEM";

/// A generic temporal object: either an instantaneous event (`starttime ==
/// endtime`) or a static situation with a duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Situation {
    pub id: SituationId,
    #[serde(rename = "type")]
    pub kind: SituationType,
    pub owner: String,
    pub desc: String,
    pub starttime: Option<f64>,
    pub endtime: Option<f64>,
}

impl Situation {
    /// Builds a new, not-yet-started situation.
    pub fn new(desc: impl Into<String>, kind: SituationType) -> Self {
        Self {
            id: SituationId::random(),
            kind,
            owner: DEFAULT_OWNER.to_string(),
            desc: desc.into(),
            starttime: None,
            endtime: None,
        }
    }

    /// An instantaneous event is a situation whose start and end coincide.
    pub fn is_event(&self) -> bool {
        self.starttime.is_some() && self.starttime == self.endtime
    }
}

impl Eq for Situation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_situation_is_unstarted() {
        let sit = Situation::new("something happened", SituationType::Generic);
        assert_eq!(sit.owner, DEFAULT_OWNER);
        assert!(sit.starttime.is_none());
        assert!(sit.endtime.is_none());
        assert!(!sit.is_event());
    }

    #[test]
    fn event_has_equal_start_and_end() {
        let mut sit = Situation::new("blink", SituationType::Custom("perception".into()));
        sit.starttime = Some(10.0);
        sit.endtime = Some(10.0);
        assert!(sit.is_event());
    }

    #[test]
    fn static_situation_is_not_an_event() {
        let mut sit = Situation::new("grasp", SituationType::Generic);
        sit.starttime = Some(10.0);
        sit.endtime = Some(12.0);
        assert!(!sit.is_event());
    }

    #[test]
    fn serialize_deserialize_round_trip() {
        let mut sit = Situation::new("desc", SituationType::Custom("tag".into()));
        sit.starttime = Some(1.0);
        sit.endtime = Some(2.0);

        let json = serde_json::to_string(&sit).unwrap();
        let back: Situation = serde_json::from_str(&json).unwrap();
        assert_eq!(sit, back);
    }

    #[test]
    fn generic_round_trips_as_well() {
        let sit = Situation::new("desc", SituationType::Generic);

        let json = serde_json::to_string(&sit).unwrap();
        let back: Situation = serde_json::from_str(&json).unwrap();
        assert_eq!(sit, back);
    }

    #[test]
    fn situation_type_wire_encoding_is_the_string_tag_not_null() {
        assert_eq!(
            serde_json::to_string(&SituationType::Generic).unwrap(),
            "\"generic\""
        );
        assert_eq!(
            serde_json::to_string(&SituationType::Custom("perception".into())).unwrap(),
            "\"perception\""
        );

        let parsed: SituationType = serde_json::from_str("\"generic\"").unwrap();
        assert_eq!(parsed, SituationType::Generic);
        let parsed: SituationType = serde_json::from_str("\"grasp\"").unwrap();
        assert_eq!(parsed, SituationType::Custom("grasp".into()));
    }
}
