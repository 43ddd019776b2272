//! Subscription control frames
//!
//! Sent as JSON text frames over the live feed connection.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Feed subscription mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionMode {
    /// Full market data with standard depth
    #[default]
    Full,
    /// Full market data with 30-level depth
    FullD30,
    /// Last traded price and close only
    Ltpc,
}

impl SubscriptionMode {
    /// Wire representation of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionMode::Full => "full",
            SubscriptionMode::FullD30 => "full_d30",
            SubscriptionMode::Ltpc => "ltpc",
        }
    }
}

/// Control frame method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMethod {
    Sub,
    Unsub,
}

/// One subscribe/unsubscribe request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    /// Request id, unique per frame
    pub guid: Uuid,
    pub method: ControlMethod,
    pub data: ControlData,
}

/// Control frame payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlData {
    /// Only present on subscribe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SubscriptionMode>,
    #[serde(rename = "instrumentKeys")]
    pub instrument_keys: Vec<String>,
}

impl ControlFrame {
    /// Build a subscribe frame for the given keys
    pub fn subscribe(instrument_keys: Vec<String>, mode: SubscriptionMode) -> Self {
        Self {
            guid: Uuid::new_v4(),
            method: ControlMethod::Sub,
            data: ControlData {
                mode: Some(mode),
                instrument_keys,
            },
        }
    }

    /// Build an unsubscribe frame for the given keys
    pub fn unsubscribe(instrument_keys: Vec<String>) -> Self {
        Self {
            guid: Uuid::new_v4(),
            method: ControlMethod::Unsub,
            data: ControlData {
                mode: None,
                instrument_keys,
            },
        }
    }
}
