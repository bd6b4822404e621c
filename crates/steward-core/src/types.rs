use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StewardError};

// =============================================================================
// Identifiers
// =============================================================================

/// Process-unique task identifier.
///
/// Allocated by [`TaskIdGenerator`] exactly once per task. Values start at 1;
/// `TaskId(0)` is reserved for tasks that have not been registered yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl TaskId {
    pub const UNASSIGNED: TaskId = TaskId(0);

    pub fn is_assigned(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Monotonic [`TaskId`] source. Never hands out the same value twice.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next: AtomicU64,
}

impl TaskIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn generate_next_id(&self) -> TaskId {
        TaskId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Identifier of a browser tab (the target surface of most actions).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// Identifier of a document (frame) inside a tab.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Origin
// =============================================================================

/// A web origin: scheme, host and effective port.
///
/// Two tuple origins are the same iff all three components match. An opaque
/// origin (`data:`, `about:blank`, ...) belongs to the one document it was
/// minted for: it equals only itself and never a tuple origin. Tab hosts
/// derive a document's origin once, when it commits, and hand out that value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Tuple {
        scheme: String,
        host: String,
        port: u16,
    },
    Opaque {
        nonce: u64,
    },
}

static NEXT_OPAQUE_NONCE: AtomicU64 = AtomicU64::new(1);

impl Origin {
    /// Derive the origin of `url`. Every call for a non-http(s) URL mints a
    /// fresh opaque origin.
    pub fn from_url(url: &str) -> Result<Self> {
        let parsed =
            url::Url::parse(url).map_err(|e| StewardError::InvalidOrigin(format!("{url}: {e}")))?;
        match (parsed.host_str(), parsed.port_or_known_default()) {
            (Some(host), Some(port)) if matches!(parsed.scheme(), "http" | "https") => {
                Ok(Origin::Tuple {
                    scheme: parsed.scheme().to_string(),
                    host: host.to_ascii_lowercase(),
                    port,
                })
            }
            _ => Ok(Origin::opaque()),
        }
    }

    /// A new opaque origin, distinct from every other.
    pub fn opaque() -> Self {
        Origin::Opaque {
            nonce: NEXT_OPAQUE_NONCE.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self, Origin::Opaque { .. })
    }

    /// Host component, if this is a tuple origin.
    pub fn host(&self) -> Option<&str> {
        match self {
            Origin::Tuple { host, .. } => Some(host),
            Origin::Opaque { .. } => None,
        }
    }

    /// Whether `other` is the same origin. An opaque origin is same-origin
    /// only with itself.
    pub fn is_same_origin_with(&self, other: &Origin) -> bool {
        self == other
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Tuple { scheme, host, port } => write!(f, "{scheme}://{host}:{port}"),
            Origin::Opaque { .. } => f.write_str("null"),
        }
    }
}

// =============================================================================
// Temporal
// =============================================================================

/// Unix timestamp in milliseconds since epoch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp_millis())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0).unwrap_or_default()
    }
}

// =============================================================================
// Lifecycle and result enums
// =============================================================================

/// Coarse lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Created,
    Acting,
    Reflecting,
    PausedByClient,
    Finished,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Created => write!(f, "created"),
            TaskState::Acting => write!(f, "acting"),
            TaskState::Reflecting => write!(f, "reflecting"),
            TaskState::PausedByClient => write!(f, "paused_by_client"),
            TaskState::Finished => write!(f, "finished"),
        }
    }
}

/// Outcome code of an action or a batch.
///
/// Closed set. Codes produced by tools and UI hooks travel through the
/// engine unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionResultCode {
    Ok,
    Error,
    TaskWentAway,
    TaskPaused,
    TabWentAway,
    CrossOriginNavigation,
    UrlBlocked,
    ArgumentsInvalid,
    ElementNotFound,
    ElementOffscreen,
    FrameWentAway,
    ObservationStale,
    ToolBusy,
    ToolUnavailable,
}

impl ActionResultCode {
    pub fn is_ok(&self) -> bool {
        matches!(self, ActionResultCode::Ok)
    }
}

impl fmt::Display for ActionResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionResultCode::Ok => "ok",
            ActionResultCode::Error => "error",
            ActionResultCode::TaskWentAway => "task_went_away",
            ActionResultCode::TaskPaused => "task_paused",
            ActionResultCode::TabWentAway => "tab_went_away",
            ActionResultCode::CrossOriginNavigation => "cross_origin_navigation",
            ActionResultCode::UrlBlocked => "url_blocked",
            ActionResultCode::ArgumentsInvalid => "arguments_invalid",
            ActionResultCode::ElementNotFound => "element_not_found",
            ActionResultCode::ElementOffscreen => "element_offscreen",
            ActionResultCode::FrameWentAway => "frame_went_away",
            ActionResultCode::ObservationStale => "observation_stale",
            ActionResultCode::ToolBusy => "tool_busy",
            ActionResultCode::ToolUnavailable => "tool_unavailable",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_ids_are_monotonic_and_unique() {
        let generator = TaskIdGenerator::new();
        let a = generator.generate_next_id();
        let b = generator.generate_next_id();
        let c = generator.generate_next_id();
        assert_eq!(a, TaskId(1));
        assert!(a < b && b < c);
        assert!(a.is_assigned());
        assert!(!TaskId::UNASSIGNED.is_assigned());
    }

    #[test]
    fn test_task_id_display() {
        assert_eq!(TaskId(7).to_string(), "task-7");
        assert_eq!(TabId(3).to_string(), "tab-3");
    }

    #[test]
    fn test_task_id_serializes_as_number() {
        let json = serde_json::to_string(&TaskId(42)).unwrap();
        assert_eq!(json, "42");
        let back: TaskId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TaskId(42));
    }

    #[test]
    fn test_origin_from_url_uses_default_port() {
        let origin = Origin::from_url("https://Example.com/path?q=1").unwrap();
        assert_eq!(
            origin,
            Origin::Tuple {
                scheme: "https".to_string(),
                host: "example.com".to_string(),
                port: 443,
            }
        );
        assert_eq!(origin.to_string(), "https://example.com:443");
        assert_eq!(origin.host(), Some("example.com"));
    }

    #[test]
    fn test_origin_same_origin_rules() {
        let a = Origin::from_url("https://a.test/one").unwrap();
        let a2 = Origin::from_url("https://a.test:443/two").unwrap();
        let b = Origin::from_url("https://b.test/").unwrap();
        let http = Origin::from_url("http://a.test/").unwrap();
        assert!(a.is_same_origin_with(&a2));
        assert!(!a.is_same_origin_with(&b));
        assert!(!a.is_same_origin_with(&http));
    }

    #[test]
    fn test_opaque_origins_have_identity() {
        let blank = Origin::from_url("about:blank").unwrap();
        let data = Origin::from_url("data:text/html,<p>hi</p>").unwrap();
        let blank_again = Origin::from_url("about:blank").unwrap();

        assert!(blank.is_opaque());
        assert_eq!(data.host(), None);
        assert_eq!(data.to_string(), "null");
        assert!(blank.is_same_origin_with(&blank.clone()));
        assert!(!blank.is_same_origin_with(&data));
        assert!(!blank.is_same_origin_with(&blank_again));
        assert_ne!(blank, blank_again);

        let tuple = Origin::from_url("https://a.test/").unwrap();
        assert!(!tuple.is_opaque());
        assert!(!tuple.is_same_origin_with(&blank));
    }

    #[test]
    fn test_origin_rejects_garbage() {
        assert!(Origin::from_url("not a url").is_err());
    }

    #[test]
    fn test_result_code_serialization() {
        let json = serde_json::to_string(&ActionResultCode::CrossOriginNavigation).unwrap();
        assert_eq!(json, "\"cross_origin_navigation\"");
        assert_eq!(
            ActionResultCode::CrossOriginNavigation.to_string(),
            "cross_origin_navigation"
        );
        assert!(ActionResultCode::Ok.is_ok());
        assert!(!ActionResultCode::TaskPaused.is_ok());
    }

    #[test]
    fn test_task_state_display_matches_serde() {
        for state in [
            TaskState::Created,
            TaskState::Acting,
            TaskState::Reflecting,
            TaskState::PausedByClient,
            TaskState::Finished,
        ] {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        let ts = Timestamp::from_datetime(now);
        assert_eq!(ts.to_datetime().timestamp_millis(), now.timestamp_millis());
    }
}
