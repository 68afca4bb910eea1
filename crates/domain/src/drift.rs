use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelType;

/// Live stock as read from one channel during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStockState {
    pub channel_id: Uuid,
    pub channel_type: ChannelType,
    pub external_id: String,
    pub quantity: i64,
}

/// One channel whose live stock diverged from the expected value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftingChannel {
    pub channel_id: Uuid,
    pub channel_type: ChannelType,
    pub external_id: String,
    pub expected: i64,
    pub actual: i64,
    pub drift: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftSeverity {
    Low,
    Medium,
    High,
}

impl DriftSeverity {
    /// Classify by the largest per-channel drift against the auto-repair
    /// threshold: below it is low (repairable), below twice it is medium,
    /// anything beyond is high.
    pub fn classify(max_drift: i64, auto_repair_threshold: i64) -> DriftSeverity {
        if max_drift < auto_repair_threshold {
            DriftSeverity::Low
        } else if max_drift < 2 * auto_repair_threshold {
            DriftSeverity::Medium
        } else {
            DriftSeverity::High
        }
    }
}

/// Computed outcome of reconciling one product. Ephemeral, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftDetection {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub source_channel_id: Uuid,
    pub truth_quantity: i64,
    pub channels: Vec<DriftingChannel>,
    pub max_drift: i64,
    pub severity: DriftSeverity,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_bands() {
        // Threshold 5: <5 low, 5..<10 medium, >=10 high.
        assert_eq!(DriftSeverity::classify(0, 5), DriftSeverity::Low);
        assert_eq!(DriftSeverity::classify(4, 5), DriftSeverity::Low);
        assert_eq!(DriftSeverity::classify(5, 5), DriftSeverity::Medium);
        assert_eq!(DriftSeverity::classify(7, 5), DriftSeverity::Medium);
        assert_eq!(DriftSeverity::classify(9, 5), DriftSeverity::Medium);
        assert_eq!(DriftSeverity::classify(10, 5), DriftSeverity::High);
        assert_eq!(DriftSeverity::classify(100, 5), DriftSeverity::High);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(DriftSeverity::Low < DriftSeverity::Medium);
        assert!(DriftSeverity::Medium < DriftSeverity::High);
    }
}
