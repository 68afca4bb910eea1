use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a tenant entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSource {
    SelfSignup,
    MarketplaceInstall,
}

impl TenantSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantSource::SelfSignup => "self_signup",
            TenantSource::MarketplaceInstall => "marketplace_install",
        }
    }
}

impl std::str::FromStr for TenantSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "self_signup" => Ok(TenantSource::SelfSignup),
            "marketplace_install" => Ok(TenantSource::MarketplaceInstall),
            other => Err(format!("unknown tenant source: {other}")),
        }
    }
}

/// Isolation boundary. Owns channels, products, mappings, events, alerts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub source: TenantSource,
    pub created_at: DateTime<Utc>,
}
