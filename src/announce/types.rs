//! Announcement Types
//!
//! Serialized snapshots a backend instance publishes so an upstream gateway
//! can build its routing and admission tables. Field names are part of the
//! wire contract and must stay stable across versions.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, OnceLock};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Announcement status: whether the instance is up or withdrawing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Status {
    Goodbye = 0,
    Hello = 1,
}

/// One route exposed by an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteInfo {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "Verbs")]
    pub verbs: Vec<String>,
}

/// Admission descriptor announced for one resource identity.
///
/// Pairs the limit/burst parameters with a lazily built live limiter. Only
/// the parameters travel on the wire; each consumer builds its own limiter
/// from them.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ApiLimiter {
    /// Sustained admission rate, in requests per second
    pub limit: f64,
    /// Burst allowance on top of the sustained rate
    pub burst: u32,

    #[serde(skip)]
    limiter: OnceLock<Arc<DefaultDirectRateLimiter>>,
}

impl ApiLimiter {
    /// Create a descriptor for the given limit/burst pair
    pub fn new(limit: f64, burst: u32) -> Self {
        Self {
            limit,
            burst,
            limiter: OnceLock::new(),
        }
    }

    /// The live limiter for this descriptor, built on first use
    pub fn limiter(&self) -> &Arc<DefaultDirectRateLimiter> {
        self.limiter.get_or_init(|| {
            let per_second = self.limit.clamp(1.0, u32::MAX as f64) as u32;
            let rate = NonZeroU32::new(per_second).unwrap_or(NonZeroU32::MIN);
            let burst = NonZeroU32::new(self.burst).unwrap_or(NonZeroU32::MIN);
            let quota = Quota::per_second(rate).allow_burst(burst);
            Arc::new(RateLimiter::direct(quota))
        })
    }
}

impl std::fmt::Debug for ApiLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiLimiter")
            .field("limit", &self.limit)
            .field("burst", &self.burst)
            .finish_non_exhaustive()
    }
}

/// Map from resource-identity name to its announced admission descriptor
pub type IdentityLimiters = HashMap<String, ApiLimiter>;

/// Snapshot of one backend instance, published periodically while the
/// instance is healthy (`hello`) and once at graceful shutdown (`goodbye`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceAnnouncement {
    pub name: String,
    pub endpoint: String,
    pub push_endpoint: String,
    pub status: Status,
    /// Route table snapshot, keyed by API version
    #[serde(default)]
    pub routes: HashMap<i32, Vec<RouteInfo>>,
    /// Supported version map, component name to version value
    #[serde(default)]
    pub versions: HashMap<String, serde_json::Value>,
    /// Current load metric
    pub load: f64,
    #[serde(rename = "APILimiters", default)]
    pub api_limiters: IdentityLimiters,
    #[serde(default)]
    pub prefix: String,
}

impl ServiceAnnouncement {
    /// The gateway routing-table key: `prefix/name` when a prefix is set,
    /// otherwise just `name`.
    pub fn key(&self) -> String {
        if self.prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.prefix, self.name)
        }
    }
}

/// Minimal liveness beacon exchanged between gateway instances. Carries no
/// routing payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerAnnouncement {
    pub status: Status,
    #[serde(rename = "RuntimeID")]
    pub runtime_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(name: &str, prefix: &str) -> ServiceAnnouncement {
        ServiceAnnouncement {
            name: name.to_string(),
            endpoint: "https://10.0.0.1:443".to_string(),
            push_endpoint: "https://10.0.0.1:443/events".to_string(),
            status: Status::Hello,
            routes: HashMap::new(),
            versions: HashMap::new(),
            load: 0.4,
            api_limiters: IdentityLimiters::new(),
            prefix: prefix.to_string(),
        }
    }

    #[test]
    fn test_key_without_prefix() {
        assert_eq!(announcement("svc", "").key(), "svc");
    }

    #[test]
    fn test_key_with_prefix() {
        assert_eq!(announcement("svc", "v1").key(), "v1/svc");
    }

    #[test]
    fn test_status_wire_values() {
        assert_eq!(serde_json::to_string(&Status::Goodbye).unwrap(), "0");
        assert_eq!(serde_json::to_string(&Status::Hello).unwrap(), "1");
    }

    #[test]
    fn test_announcement_field_names_are_stable() {
        let mut ann = announcement("api", "");
        ann.api_limiters
            .insert("list".to_string(), ApiLimiter::new(100.0, 20));
        ann.routes.insert(
            1,
            vec![RouteInfo {
                url: "/lists".to_string(),
                verbs: vec!["GET".to_string()],
            }],
        );

        let json = serde_json::to_value(&ann).unwrap();
        assert_eq!(json["Name"], "api");
        assert_eq!(json["Status"], 1);
        assert_eq!(json["Load"], 0.4);
        assert_eq!(json["PushEndpoint"], "https://10.0.0.1:443/events");
        assert_eq!(json["APILimiters"]["list"]["Limit"], 100.0);
        assert_eq!(json["APILimiters"]["list"]["Burst"], 20);
        assert_eq!(json["Routes"]["1"][0]["URL"], "/lists");
    }

    #[test]
    fn test_limiter_allows_burst_then_throttles() {
        let descriptor = ApiLimiter::new(1.0, 3);
        let limiter = descriptor.limiter();

        for _ in 0..3 {
            assert!(limiter.check().is_ok());
        }
        assert!(limiter.check().is_err());
    }

    #[test]
    fn test_peer_announcement_wire_shape() {
        let peer = PeerAnnouncement {
            status: Status::Goodbye,
            runtime_id: "runtime-1".to_string(),
        };
        let json = serde_json::to_value(&peer).unwrap();
        assert_eq!(json["Status"], 0);
        assert_eq!(json["RuntimeID"], "runtime-1");
    }
}
