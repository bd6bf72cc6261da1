//! Asset ledger entry types.
//!
//! The ledger is the permanent registry of validation decisions. A clip id
//! belongs to at most one of the approved/rejected sets, and a rejected id
//! is never validated again.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation decision for a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetDecision {
    Approved,
    Rejected,
}

impl AssetDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetDecision::Approved => "approved",
            AssetDecision::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AssetDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssetRecord {
    /// Clip id the decision applies to
    pub clip_id: String,
    /// Approved or rejected
    pub decision: AssetDecision,
    /// Why the decision was made (always set for rejections)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Detector confidence backing the decision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// When the decision was recorded
    pub recorded_at: DateTime<Utc>,
}

impl AssetRecord {
    /// Build an approval record.
    pub fn approved(clip_id: impl Into<String>, confidence: Option<f64>) -> Self {
        Self {
            clip_id: clip_id.into(),
            decision: AssetDecision::Approved,
            reason: None,
            confidence,
            recorded_at: Utc::now(),
        }
    }

    /// Build a rejection record.
    pub fn rejected(
        clip_id: impl Into<String>,
        reason: impl Into<String>,
        confidence: Option<f64>,
    ) -> Self {
        Self {
            clip_id: clip_id.into(),
            decision: AssetDecision::Rejected,
            reason: Some(reason.into()),
            confidence,
            recorded_at: Utc::now(),
        }
    }
}
