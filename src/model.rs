//! Zone-facing types shared by the engine, the stores and the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Pending change recorded against a zone by the authoritative store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneAction {
    Create,
    Update,
    Delete,
    None,
}

/// Zone status as exposed to API users
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZoneStatus {
    Pending,
    Active,
    Error,
}

/// Per-nameserver propagation status, and the consensus reported upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Pending,
    Success,
    Error,
}

macro_rules! string_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_uppercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("invalid {}: {}", stringify!($ty), other)),
                }
            }
        }
    };
}

string_enum!(ZoneAction {
    Create => "CREATE",
    Update => "UPDATE",
    Delete => "DELETE",
    None => "NONE",
});

string_enum!(ZoneStatus {
    Pending => "PENDING",
    Active => "ACTIVE",
    Error => "ERROR",
});

string_enum!(Status {
    Pending => "PENDING",
    Success => "SUCCESS",
    Error => "ERROR",
});

/// A zone as read from the authoritative store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Zone {
    pub id: String,
    /// Fully-qualified, with trailing dot
    pub name: String,
    pub serial: u32,
    pub action: ZoneAction,
    pub status: ZoneStatus,
    pub pool_id: String,
    pub updated_at: DateTime<Utc>,
}

impl Zone {
    pub fn new(name: &str, serial: u32, pool_id: &str) -> Self {
        let mut name = name.to_lowercase();
        if !name.ends_with('.') {
            name.push('.');
        }
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            serial,
            action: ZoneAction::Create,
            status: ZoneStatus::Pending,
            pool_id: pool_id.to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// A record set entry as read from the authoritative store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub zone_id: String,
    pub name: String,
    pub rtype: String,
    pub data: String,
    pub ttl: Option<u32>,
}

/// Caller identity passed through to collaborators
#[derive(Debug, Clone)]
pub struct Context {
    pub request_id: Uuid,
    pub tenant: Option<String>,
    pub all_tenants: bool,
}

impl Context {
    /// Elevated context used by background work
    pub fn admin() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant: None,
            all_tenants: true,
        }
    }

    pub fn for_tenant(tenant: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            tenant: Some(tenant.into()),
            all_tenants: false,
        }
    }
}

/// Filter for `find_zone`/`find_zones`
#[derive(Debug, Clone, Default)]
pub struct ZoneCriterion {
    pub id: Option<String>,
    pub name: Option<String>,
    pub pool_id: Option<String>,
    /// Empty matches every status
    pub statuses: Vec<ZoneStatus>,
    pub updated_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl ZoneCriterion {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn by_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn matches(&self, zone: &Zone) -> bool {
        if self.id.as_ref().is_some_and(|id| *id != zone.id) {
            return false;
        }
        if self
            .name
            .as_ref()
            .is_some_and(|name| !crate::dns::common::names_equal(name, &zone.name))
        {
            return false;
        }
        if self.pool_id.as_ref().is_some_and(|p| *p != zone.pool_id) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&zone.status) {
            return false;
        }
        if self.updated_before.is_some_and(|t| zone.updated_at >= t) {
            return false;
        }
        if self.updated_after.is_some_and(|t| zone.updated_at <= t) {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_string_forms() {
        assert_eq!(ZoneAction::Delete.as_str(), "DELETE");
        assert_eq!("update".parse::<ZoneAction>().unwrap(), ZoneAction::Update);
        assert_eq!("SUCCESS".parse::<Status>().unwrap(), Status::Success);
        assert!("bogus".parse::<ZoneStatus>().is_err());
    }

    #[test]
    fn test_zone_name_is_normalised() {
        let zone = Zone::new("Example.COM", 1, "default");
        assert_eq!(zone.name, "example.com.");
        assert_eq!(zone.action, ZoneAction::Create);
    }

    #[test]
    fn test_criterion_matching() {
        let mut zone = Zone::new("example.com.", 1, "pool-a");
        zone.status = ZoneStatus::Error;

        let criterion = ZoneCriterion {
            pool_id: Some("pool-a".to_string()),
            statuses: vec![ZoneStatus::Error],
            updated_before: Some(Utc::now() + Duration::seconds(5)),
            ..Default::default()
        };
        assert!(criterion.matches(&zone));

        let other_pool = ZoneCriterion {
            pool_id: Some("pool-b".to_string()),
            ..Default::default()
        };
        assert!(!other_pool.matches(&zone));

        let too_old = ZoneCriterion {
            updated_before: Some(zone.updated_at - Duration::seconds(5)),
            ..Default::default()
        };
        assert!(!too_old.matches(&zone));

        assert!(ZoneCriterion::by_name("EXAMPLE.com").matches(&zone));
    }
}
