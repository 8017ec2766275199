use crate::model::{RequestId, ResolvedTrack, TrackRef};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PartyEvent {
    NowPlaying {
        track: ResolvedTrack,
        requester_name: String,
        elapsed_ms: u64,
    },
    Enqueued {
        request_id: RequestId,
        track: TrackRef,
        requester_name: String,
    },
    Dequeued,
    Topped {
        request_id: RequestId,
        operator_name: String,
    },
    Deleted {
        request_id: RequestId,
        operator_name: String,
    },
    Cut {
        operator_name: String,
        track: TrackRef,
    },
    QueueFailed {
        track_name: String,
    },
    LoopModeChanged {
        enabled: bool,
    },
    PlaybackEnded {
        track: TrackRef,
    },
}

impl PartyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NowPlaying { .. } => "now_playing",
            Self::Enqueued { .. } => "enqueued",
            Self::Dequeued => "dequeued",
            Self::Topped { .. } => "topped",
            Self::Deleted { .. } => "deleted",
            Self::Cut { .. } => "cut",
            Self::QueueFailed { .. } => "queue_failed",
            Self::LoopModeChanged { .. } => "loop_mode_changed",
            Self::PlaybackEnded { .. } => "playback_ended",
        }
    }
}

// Called with the session lock held, so implementations must not block.
pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, event: PartyEvent);
}

#[derive(Debug)]
pub struct ChannelBroadcaster {
    tx: Mutex<Sender<PartyEvent>>,
}

impl ChannelBroadcaster {
    pub fn new() -> (Self, Receiver<PartyEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, event: PartyEvent) {
        let kind = event.kind();
        let tx = self.tx.lock().unwrap_or_else(PoisonError::into_inner);
        if tx.send(event).is_err() {
            tracing::debug!(event = kind, "no listener attached, event dropped");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn broadcast(&self, _event: PartyEvent) {}
}
