use crate::clock::{Clock, SystemClock};
use crate::directory::{MemoryDirectory, UserDirectory};
use crate::events::{Broadcaster, PartyEvent};
use crate::model::{NowPlaying, PlayingTrack, QueueEntry, QueueView, RequestId, TrackRequest};
use crate::provider::TrackResolver;
use crate::proxy::{DEFAULT_CONTENT_TYPE, DEFAULT_USER_AGENT, ProxyRouter, RouteTable};
use crate::queue::OrderedQueue;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const DEFAULT_MAX_RESOLVE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartySettings {
    pub max_resolve_attempts: u32,
    pub loop_mode: bool,
    pub proxy_content_type: String,
    pub proxy_user_agent: String,
}

impl Default for PartySettings {
    fn default() -> Self {
        Self {
            max_resolve_attempts: DEFAULT_MAX_RESOLVE_ATTEMPTS,
            loop_mode: true,
            proxy_content_type: String::from(DEFAULT_CONTENT_TYPE),
            proxy_user_agent: String::from(DEFAULT_USER_AGENT),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Playback {
    #[default]
    Idle,
    Resolving(QueueEntry),
    Playing(PlayingTrack),
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackState {
    phase: Playback,
}

impl PlaybackState {
    pub fn phase(&self) -> &Playback {
        &self.phase
    }

    pub fn current(&self) -> Option<&PlayingTrack> {
        match &self.phase {
            Playback::Playing(playing) => Some(playing),
            _ => None,
        }
    }

    pub fn pending(&self) -> Option<&QueueEntry> {
        match &self.phase {
            Playback::Resolving(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.phase, Playback::Idle)
    }

    pub(crate) fn is_resolving(&self, request_id: &RequestId) -> bool {
        self.pending()
            .is_some_and(|entry| &entry.request_id == request_id)
    }

    pub(crate) fn set(&mut self, phase: Playback) {
        self.phase = phase;
    }

    pub(crate) fn take(&mut self) -> Playback {
        std::mem::take(&mut self.phase)
    }
}

#[derive(Debug, Default)]
pub struct PartyState {
    pub(crate) queue: OrderedQueue,
    pub(crate) playback: PlaybackState,
    pub(crate) loop_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySnapshot {
    pub queue: Vec<QueueView>,
    pub now_playing: Option<NowPlaying>,
    pub loop_mode: bool,
}

pub struct Party {
    state: Mutex<PartyState>,
    resolver: TrackResolver,
    directory: Arc<dyn UserDirectory>,
    proxy: Arc<dyn ProxyRouter>,
    broadcaster: Arc<dyn Broadcaster>,
    clock: Arc<dyn Clock>,
    settings: PartySettings,
}

impl Party {
    pub fn new(resolver: TrackResolver, broadcaster: Arc<dyn Broadcaster>) -> Self {
        let settings = PartySettings::default();
        Self {
            state: Mutex::new(PartyState {
                loop_mode: settings.loop_mode,
                ..PartyState::default()
            }),
            resolver,
            directory: Arc::new(MemoryDirectory::new()),
            proxy: Arc::new(RouteTable::new()),
            broadcaster,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.directory = directory;
        self
    }

    pub fn with_proxy(mut self, proxy: Arc<dyn ProxyRouter>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_settings(mut self, settings: PartySettings) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .loop_mode = settings.loop_mode;
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PartySettings {
        &self.settings
    }

    pub fn enqueue(&self, request: TrackRequest) -> RequestId {
        let mut state = self.lock();
        let request_id = self.enqueue_locked(&mut state, request);
        tracing::info!(request_id = %request_id, queued = state.queue.len(), "track enqueued");
        request_id
    }

    pub fn next_song(&self, operator_id: &str) -> bool {
        let mut state = self.lock();
        let track = match state.playback.take() {
            Playback::Idle => {
                tracing::debug!(operator = operator_id, "skip ignored, nothing playing");
                return false;
            }
            Playback::Resolving(entry) => {
                tracing::info!(
                    request_id = %entry.request_id,
                    "pending resolution cancelled by skip"
                );
                entry.track
            }
            Playback::Playing(playing) => {
                if state.loop_mode {
                    self.enqueue_locked(&mut state, playing.request.clone());
                }
                playing.request.track
            }
        };
        let operator_name = self.directory.display_name(operator_id);
        tracing::info!(operator = %operator_name, track = %track.name, "track cut");
        self.emit(PartyEvent::Cut {
            operator_name,
            track,
        });
        true
    }

    pub fn top_song(&self, request_id: &RequestId, operator_id: &str) -> bool {
        let mut state = self.lock();
        if !state.queue.top_by_id(request_id) {
            tracing::debug!(request_id = %request_id, "top ignored, request not queued");
            return false;
        }
        self.emit(PartyEvent::Topped {
            request_id: request_id.clone(),
            operator_name: self.directory.display_name(operator_id),
        });
        true
    }

    pub fn delete_song(&self, request_id: &RequestId, operator_id: &str) -> bool {
        let mut state = self.lock();
        let name = state
            .queue
            .get(request_id)
            .map(|entry| entry.track.name.clone());
        if !state.queue.remove_by_id(request_id) {
            tracing::debug!(request_id = %request_id, "delete ignored, request not queued");
            return false;
        }
        let operator_name = self.directory.display_name(operator_id);
        tracing::info!(
            request_id = %request_id,
            track = name.as_deref().unwrap_or_default(),
            operator = %operator_name,
            "track deleted"
        );
        self.emit(PartyEvent::Deleted {
            request_id: request_id.clone(),
            operator_name,
        });
        true
    }

    pub fn set_loop_mode(&self, enabled: bool) {
        let mut state = self.lock();
        state.loop_mode = enabled;
        tracing::info!(enabled, "loop mode set");
        self.emit(PartyEvent::LoopModeChanged { enabled });
    }

    pub fn toggle_loop_mode(&self) -> bool {
        let mut state = self.lock();
        state.loop_mode = !state.loop_mode;
        let enabled = state.loop_mode;
        tracing::info!(enabled, "loop mode toggled");
        self.emit(PartyEvent::LoopModeChanged { enabled });
        enabled
    }

    pub fn loop_mode(&self) -> bool {
        self.lock().loop_mode
    }

    pub fn queue(&self) -> Vec<QueueEntry> {
        self.lock().queue.snapshot()
    }

    pub fn queue_view(&self) -> Vec<QueueView> {
        let state = self.lock();
        self.view_of(&state)
    }

    pub fn track_name(&self, request_id: &RequestId) -> Option<String> {
        self.lock()
            .queue
            .get(request_id)
            .map(|entry| entry.track.name.clone())
    }

    pub fn current_track(&self) -> Option<PlayingTrack> {
        self.lock().playback.current().cloned()
    }

    pub fn playback(&self) -> Playback {
        self.lock().playback.phase().clone()
    }

    pub fn now_playing(&self) -> Option<NowPlaying> {
        let state = self.lock();
        self.now_playing_of(&state)
    }

    pub fn snapshot(&self) -> PartySnapshot {
        let state = self.lock();
        PartySnapshot {
            queue: self.view_of(&state),
            now_playing: self.now_playing_of(&state),
            loop_mode: state.loop_mode,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, PartyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, event: PartyEvent) {
        self.broadcaster.broadcast(event);
    }

    pub(crate) fn enqueue_locked(
        &self,
        state: &mut PartyState,
        request: TrackRequest,
    ) -> RequestId {
        let track = request.track.clone();
        let requester_name = self.directory.display_name(&request.requester_id);
        let request_id = state.queue.enqueue(request);
        self.emit(PartyEvent::Enqueued {
            request_id: request_id.clone(),
            track,
            requester_name,
        });
        request_id
    }

    pub(crate) fn resolver(&self) -> &TrackResolver {
        &self.resolver
    }

    pub(crate) fn proxy(&self) -> &dyn ProxyRouter {
        self.proxy.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn display_name(&self, user_id: &str) -> String {
        self.directory.display_name(user_id)
    }

    fn view_of(&self, state: &PartyState) -> Vec<QueueView> {
        state
            .queue
            .snapshot()
            .into_iter()
            .map(|entry| QueueView {
                requester_name: self.directory.display_name(&entry.requester_id),
                request_id: entry.request_id,
                track: entry.track,
                provider: entry.provider,
            })
            .collect()
    }

    fn now_playing_of(&self, state: &PartyState) -> Option<NowPlaying> {
        let playing = state.playback.current()?;
        let elapsed = playing.elapsed(self.clock.now());
        Some(NowPlaying {
            track: playing.resolved.clone(),
            requester_name: self.directory.display_name(&playing.request.requester_id),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        })
    }
}
