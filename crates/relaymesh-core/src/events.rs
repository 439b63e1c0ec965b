//! Typed events emitted by handlers and the scheduler
//!
//! Every event carries `module` and `sender` attributes plus operation-specific
//! key/value pairs. Events are buffered per store branch so a failed
//! transaction drops its events along with its writes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event categories
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Stake,
    BeginUnstake,
    WaitingToBeginUnstaking,
    CompleteUnstaking,
    CreateEntity,
    Slash,
    Jail,
    Unjail,
    Pause,
    Unpause,
    Transfer,
    Reward,
    ReportCard,
    FeeDistribution,
    ParamChange,
    Upgrade,
    FeatureActivated,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Stake => "stake",
            Self::BeginUnstake => "begin_unstake",
            Self::WaitingToBeginUnstaking => "waiting_to_begin_unstaking",
            Self::CompleteUnstaking => "complete_unstaking",
            Self::CreateEntity => "create_entity",
            Self::Slash => "slash",
            Self::Jail => "jail",
            Self::Unjail => "unjail",
            Self::Pause => "pause",
            Self::Unpause => "unpause",
            Self::Transfer => "transfer",
            Self::Reward => "reward",
            Self::ReportCard => "report_card",
            Self::FeeDistribution => "fee_distribution",
            Self::ParamChange => "param_change",
            Self::Upgrade => "upgrade",
            Self::FeatureActivated => "feature_activated",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single emitted event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub attributes: Vec<(String, String)>,
}

impl Event {
    /// Start an event with the mandatory `module` and `sender` attributes
    pub fn new(kind: EventKind, module: &str, sender: impl fmt::Display) -> Self {
        Self {
            kind,
            attributes: vec![
                ("module".to_string(), module.to_string()),
                ("sender".to_string(), sender.to_string()),
            ],
        }
    }

    /// Append an attribute
    pub fn attr(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.attributes.push((key.to_string(), value.to_string()));
        self
    }

    /// Look up an attribute value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_attributes() {
        let event = Event::new(EventKind::Slash, "servicers", "abc")
            .attr("fraction", "0.05")
            .attr("burned", 42);
        assert_eq!(event.get("module"), Some("servicers"));
        assert_eq!(event.get("sender"), Some("abc"));
        assert_eq!(event.get("burned"), Some("42"));
        assert_eq!(event.get("missing"), None);
        assert_eq!(event.kind.name(), "slash");
    }
}
