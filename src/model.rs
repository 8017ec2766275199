use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
}

impl TrackRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artists: Vec::new(),
            album: None,
            original_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySource {
    pub target_url: String,
    #[serde(default)]
    pub referer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTrack {
    pub track: TrackRef,
    pub url: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub proxy: Option<ProxySource>,
}

impl ResolvedTrack {
    pub fn needs_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRequest {
    pub track: TrackRef,
    pub provider: String,
    pub requester_id: String,
}

impl TrackRequest {
    pub fn new(
        track: TrackRef,
        provider: impl Into<String>,
        requester_id: impl Into<String>,
    ) -> Self {
        Self {
            track,
            provider: provider.into(),
            requester_id: requester_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request_id: RequestId,
    pub track: TrackRef,
    pub provider: String,
    pub requester_id: String,
}

impl QueueEntry {
    pub fn to_request(&self) -> TrackRequest {
        TrackRequest {
            track: self.track.clone(),
            provider: self.provider.clone(),
            requester_id: self.requester_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayingTrack {
    pub resolved: ResolvedTrack,
    pub request: TrackRequest,
    pub started_at: OffsetDateTime,
}

impl PlayingTrack {
    pub fn elapsed(&self, now: OffsetDateTime) -> Duration {
        let elapsed = now - self.started_at;
        if elapsed.is_negative() {
            return Duration::ZERO;
        }
        Duration::from_millis(u64::try_from(elapsed.whole_milliseconds()).unwrap_or(u64::MAX))
    }

    pub fn is_finished(&self, now: OffsetDateTime) -> bool {
        self.elapsed(now) >= self.resolved.duration()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueView {
    pub request_id: RequestId,
    pub track: TrackRef,
    pub provider: String,
    pub requester_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NowPlaying {
    pub track: ResolvedTrack,
    pub requester_name: String,
    pub elapsed_ms: u64,
}
