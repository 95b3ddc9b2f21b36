//! Admission control types.

use std::fmt;

use axum::http::Method;
use serde::{Deserialize, Serialize};

/// Route groups, each with its own rate-limit bucket per caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteGroup {
    /// Chat messages and channels
    Chat,
    /// Member listings
    Members,
    /// Friend requests and lists
    Friends,
    /// Administrative endpoints
    Admin,
    /// API token management
    ApiTokens,
    /// Anything else
    Default,
}

impl RouteGroup {
    /// Returns the string identifier for this group (used in keys and channel modes).
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Members => "members",
            Self::Friends => "friends",
            Self::Admin => "admin",
            Self::ApiTokens => "api-tokens",
            Self::Default => "default",
        }
    }

    /// Classifies a request path by its first segment, skipping a leading `api/`.
    ///
    /// `/api/chat/send` and `/chat` both map to [`RouteGroup::Chat`].
    pub fn from_path(path: &str) -> Self {
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        let first = match segments.next() {
            Some("api") => segments.next(),
            other => other,
        };
        match first {
            Some("chat") => Self::Chat,
            Some("members") => Self::Members,
            Some("friends") => Self::Friends,
            Some("admin") => Self::Admin,
            Some("api-tokens") => Self::ApiTokens,
            _ => Self::Default,
        }
    }
}

/// Caller privilege as established by the authentication layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    #[default]
    Guest,
    User,
    Admin,
    SuperAdmin,
}

impl Privilege {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Guest => "guest",
            Self::User => "user",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

/// Coarse time-of-day bucket used for tuning selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeOfDay {
    /// 00:00 - 05:59
    Night,
    /// 22:00 - 23:59
    Late,
    Day,
}

impl TimeOfDay {
    pub const fn from_hour(hour: u32) -> Self {
        match hour {
            0..=5 => Self::Night,
            22..=23 => Self::Late,
            _ => Self::Day,
        }
    }

    /// Bucket for the server's local wall clock.
    pub fn now() -> Self {
        use chrono::Timelike;
        Self::from_hour(chrono::Local::now().hour())
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Night => "night",
            Self::Late => "late",
            Self::Day => "day",
        }
    }
}

/// Tuning-selection tag, `{privilege}_{time_of_day}_{group}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelMode(pub String);

impl ChannelMode {
    pub fn new(privilege: Privilege, time_of_day: TimeOfDay, group: RouteGroup) -> Self {
        Self(format!(
            "{}_{}_{}",
            privilege.as_str(),
            time_of_day.as_str(),
            group.as_str()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-channel tuning resolved for one decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTuning {
    /// Counting window in milliseconds
    pub window_ms: u64,
    /// Lower bound of the dynamic capacity
    pub min: u32,
    /// Upper bound of the dynamic capacity, and the hard cap for reads
    pub max: u32,
    /// Initial damping ratio for new keys
    pub base_gamma: f64,
}

/// One inbound request, as seen by the admission controller.
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    /// Normalized caller identity (see [`crate::ratelimit::normalize_ip`])
    pub identity: String,
    /// Request path
    pub path: String,
    /// HTTP method
    pub method: Method,
    /// Caller privilege, `None` for unauthenticated requests
    pub privilege: Option<Privilege>,
}

impl AdmissionRequest {
    pub fn new(identity: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            path: path.into(),
            method,
            privilege: None,
        }
    }

    #[must_use]
    pub fn with_privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = Some(privilege);
        self
    }

    /// Mutating requests are subject to burst throttling.
    pub fn is_sensitive(&self) -> bool {
        matches!(
            self.method,
            Method::POST | Method::PUT | Method::PATCH | Method::DELETE
        )
    }
}

/// Outcome of an admission decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allow: bool,
    /// Seconds until the current window resets (only set on denial)
    pub retry_after_secs: Option<u64>,
}

impl Decision {
    pub const fn allow() -> Self {
        Self {
            allow: true,
            retry_after_secs: None,
        }
    }

    pub const fn deny(retry_after_secs: u64) -> Self {
        Self {
            allow: false,
            retry_after_secs: Some(retry_after_secs),
        }
    }
}

/// Normalized IP address stored in request extensions.
///
/// IPv4 addresses are stored as-is.
/// IPv6 addresses are normalized to /64 prefix for rate limiting.
#[derive(Debug, Clone)]
pub struct NormalizedIp(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_group_from_path() {
        assert_eq!(RouteGroup::from_path("/api/chat/messages"), RouteGroup::Chat);
        assert_eq!(RouteGroup::from_path("/chat"), RouteGroup::Chat);
        assert_eq!(RouteGroup::from_path("/api/members"), RouteGroup::Members);
        assert_eq!(RouteGroup::from_path("/friends/requests"), RouteGroup::Friends);
        assert_eq!(RouteGroup::from_path("/api/admin/users"), RouteGroup::Admin);
        assert_eq!(RouteGroup::from_path("/api/api-tokens/1"), RouteGroup::ApiTokens);
        assert_eq!(RouteGroup::from_path("/"), RouteGroup::Default);
        assert_eq!(RouteGroup::from_path("/api"), RouteGroup::Default);
        assert_eq!(RouteGroup::from_path("/Chat"), RouteGroup::Default);
    }

    #[test]
    fn test_time_of_day_boundaries() {
        assert_eq!(TimeOfDay::from_hour(0), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(5), TimeOfDay::Night);
        assert_eq!(TimeOfDay::from_hour(6), TimeOfDay::Day);
        assert_eq!(TimeOfDay::from_hour(21), TimeOfDay::Day);
        assert_eq!(TimeOfDay::from_hour(22), TimeOfDay::Late);
        assert_eq!(TimeOfDay::from_hour(23), TimeOfDay::Late);
    }

    #[test]
    fn test_channel_mode_format() {
        let mode = ChannelMode::new(Privilege::SuperAdmin, TimeOfDay::Late, RouteGroup::ApiTokens);
        assert_eq!(mode.as_str(), "super_admin_late_api-tokens");
        let mode = ChannelMode::new(Privilege::Guest, TimeOfDay::Day, RouteGroup::Default);
        assert_eq!(mode.to_string(), "guest_day_default");
    }

    #[test]
    fn test_sensitive_methods() {
        let req = |m: Method| AdmissionRequest::new("203.0.113.5", m, "/api/chat");
        assert!(req(Method::POST).is_sensitive());
        assert!(req(Method::PUT).is_sensitive());
        assert!(req(Method::PATCH).is_sensitive());
        assert!(req(Method::DELETE).is_sensitive());
        assert!(!req(Method::GET).is_sensitive());
        assert!(!req(Method::HEAD).is_sensitive());
        assert!(!req(Method::OPTIONS).is_sensitive());
    }
}
