use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    SyncError,
    ChannelDisconnected,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::SyncError => "sync_error",
            AlertType::ChannelDisconnected => "channel_disconnected",
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_stock" => Ok(AlertType::LowStock),
            "sync_error" => Ok(AlertType::SyncError),
            "channel_disconnected" => Ok(AlertType::ChannelDisconnected),
            other => Err(format!("unknown alert type: {other}")),
        }
    }
}

/// A surfaced condition requiring operator attention.
///
/// At most one unread alert exists per (tenant, type, product?, channel?)
/// tuple; that tuple is the de-duplication key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub alert_type: AlertType,
    pub message: String,
    pub metadata: serde_json::Value,
    pub product_id: Option<Uuid>,
    pub channel_id: Option<Uuid>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        tenant_id: Uuid,
        alert_type: AlertType,
        message: impl Into<String>,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            alert_type,
            message: message.into(),
            metadata,
            product_id,
            channel_id,
            is_read: false,
            created_at: Utc::now(),
        }
    }
}

/// Tenant-scoped alert policy. `product_ids`/`channel_ids` of `None` means
/// the rule applies to everything the tenant owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub threshold: i64,
    pub product_ids: Option<Vec<Uuid>>,
    pub channel_ids: Option<Vec<Uuid>>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    /// Whether this rule governs the given product.
    pub fn applies_to_product(&self, product_id: Uuid) -> bool {
        self.enabled
            && self
                .product_ids
                .as_ref()
                .is_none_or(|ids| ids.contains(&product_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_scoping() {
        let target = Uuid::new_v4();
        let other = Uuid::new_v4();

        let unscoped = AlertRule {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            threshold: 10,
            product_ids: None,
            channel_ids: None,
            enabled: true,
            created_at: Utc::now(),
        };
        assert!(unscoped.applies_to_product(target));

        let scoped = AlertRule {
            product_ids: Some(vec![target]),
            ..unscoped.clone()
        };
        assert!(scoped.applies_to_product(target));
        assert!(!scoped.applies_to_product(other));

        let disabled = AlertRule {
            enabled: false,
            ..unscoped
        };
        assert!(!disabled.applies_to_product(target));
    }
}
