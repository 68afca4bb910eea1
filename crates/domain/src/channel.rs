use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of external commerce system a channel connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Pos,
    OnlineStore,
    DeliveryPlatform,
}

impl ChannelType {
    /// Online channels see buffered stock; the POS always sees full quantity.
    pub fn is_online(&self) -> bool {
        matches!(self, ChannelType::OnlineStore | ChannelType::DeliveryPlatform)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Pos => "pos",
            ChannelType::OnlineStore => "online_store",
            ChannelType::DeliveryPlatform => "delivery_platform",
        }
    }
}

impl std::str::FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pos" => Ok(ChannelType::Pos),
            "online_store" => Ok(ChannelType::OnlineStore),
            "delivery_platform" => Ok(ChannelType::DeliveryPlatform),
            other => Err(format!("unknown channel type: {other}")),
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection to an external commerce system.
///
/// `credentials` is an opaque encrypted blob owned by the onboarding layer;
/// the engine only hands it to the provider. Deactivation is soft: the row
/// and credentials are retained for 30 days so a re-install can reconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub channel_type: ChannelType,
    pub name: String,
    pub credentials: String,
    pub is_active: bool,
    /// Used to look up the owning tenant on inbound webhooks. At most one
    /// active channel per (tenant, external_instance_id).
    pub external_instance_id: Option<String>,
    /// HMAC secret for inbound webhook verification, when the provider signs.
    pub webhook_secret: Option<String>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_online_classification() {
        assert!(!ChannelType::Pos.is_online());
        assert!(ChannelType::OnlineStore.is_online());
        assert!(ChannelType::DeliveryPlatform.is_online());
    }

    #[test]
    fn test_round_trip_str() {
        for ty in [
            ChannelType::Pos,
            ChannelType::OnlineStore,
            ChannelType::DeliveryPlatform,
        ] {
            assert_eq!(ty.as_str().parse::<ChannelType>().unwrap(), ty);
        }
    }
}
