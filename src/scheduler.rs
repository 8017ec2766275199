use crate::error::{ProviderError, ProxyError, ResolveError};
use crate::events::PartyEvent;
use crate::model::{PlayingTrack, QueueEntry, RequestId, ResolvedTrack};
use crate::proxy::ProxyRequest;
use crate::session::{Party, Playback};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    QueueEmpty,
    Busy,
    Playing,
    Finished { requeued: Option<RequestId> },
    Started(RequestId),
    Failed(RequestId),
    Discarded(RequestId),
    Superseded(RequestId),
}

pub struct Scheduler {
    party: Arc<Party>,
    interval: Duration,
}

impl Scheduler {
    pub fn new(party: Arc<Party>, interval: Duration) -> Self {
        Self { party, interval }
    }

    pub fn party(&self) -> &Arc<Party> {
        &self.party
    }

    pub fn tick(&self) -> TickOutcome {
        let entry = {
            let mut state = self.party.lock();
            match state.playback.phase() {
                Playback::Resolving(_) => return TickOutcome::Busy,
                Playback::Playing(playing) => {
                    if !playing.is_finished(self.party.clock().now()) {
                        return TickOutcome::Playing;
                    }
                    let Playback::Playing(finished) = state.playback.take() else {
                        return TickOutcome::Playing;
                    };
                    let requeued = if state.loop_mode {
                        let request = finished.request.clone();
                        Some(self.party.enqueue_locked(&mut state, request))
                    } else {
                        None
                    };
                    tracing::info!(
                        track = %finished.request.track.name,
                        looped = requeued.is_some(),
                        "playback finished"
                    );
                    self.party.emit(PartyEvent::PlaybackEnded {
                        track: finished.request.track,
                    });
                    return TickOutcome::Finished { requeued };
                }
                Playback::Idle => {}
            }
            let Some(entry) = state.queue.try_dequeue() else {
                return TickOutcome::QueueEmpty;
            };
            self.party.emit(PartyEvent::Dequeued);
            state.playback.set(Playback::Resolving(entry.clone()));
            entry
        };
        self.resolve_entry(entry)
    }

    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let thread = thread::spawn(move || {
            tracing::info!(
                interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
                "scheduler started"
            );
            loop {
                match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
                    Ok(outcome) => tracing::trace!(?outcome, "tick"),
                    Err(_) => {
                        tracing::error!("scheduler tick panicked, continuing");
                        self.recover_after_panic();
                    }
                }
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::info!("scheduler stopped");
        });
        SchedulerHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        }
    }

    fn resolve_entry(&self, entry: QueueEntry) -> TickOutcome {
        let max_attempts = self.party.settings().max_resolve_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(&entry) {
                Ok(resolved) => return self.commit(entry, resolved),
                Err(err) if !err.is_retryable() => {
                    tracing::error!(
                        request_id = %entry.request_id,
                        track = %entry.track.id,
                        error = %err,
                        "play failed, skipping"
                    );
                    self.abandon(&entry.request_id);
                    return TickOutcome::Discarded(entry.request_id);
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %entry.request_id,
                        provider = %entry.provider,
                        attempt,
                        error = %err,
                        "resolution attempt failed"
                    );
                }
            }
        }

        tracing::error!(
            request_id = %entry.request_id,
            track = %entry.track.id,
            provider = %entry.provider,
            "resolution failed {max_attempts} times, skipping"
        );
        if self.abandon(&entry.request_id) {
            self.party.emit(PartyEvent::QueueFailed {
                track_name: entry.track.name.clone(),
            });
            TickOutcome::Failed(entry.request_id)
        } else {
            TickOutcome::Superseded(entry.request_id)
        }
    }

    fn attempt(&self, entry: &QueueEntry) -> Result<ResolvedTrack, ResolveError> {
        let resolved = panic::catch_unwind(AssertUnwindSafe(|| {
            self.party.resolver().resolve(entry)
        }))
        .unwrap_or_else(|_| {
            Err(ResolveError::ProviderFailure {
                provider: entry.provider.clone(),
                source: ProviderError::Panicked,
            })
        })?;

        if let Some(source) = &resolved.proxy {
            let settings = self.party.settings();
            let request = ProxyRequest {
                target_url: source.target_url.clone(),
                content_type: settings.proxy_content_type.clone(),
                referer: source.referer.clone(),
                user_agent: settings.proxy_user_agent.clone(),
            };
            panic::catch_unwind(AssertUnwindSafe(|| self.party.proxy().start(request)))
                .unwrap_or_else(|_| Err(ProxyError::Panicked(source.target_url.clone())))?;
        }
        Ok(resolved)
    }

    fn commit(&self, entry: QueueEntry, resolved: ResolvedTrack) -> TickOutcome {
        let mut state = self.party.lock();
        if !state.playback.is_resolving(&entry.request_id) {
            tracing::debug!(
                request_id = %entry.request_id,
                "resolution superseded, result dropped"
            );
            return TickOutcome::Superseded(entry.request_id);
        }

        let request = entry.to_request();
        let requester_name = self.party.display_name(&request.requester_id);
        tracing::info!(
            request_id = %entry.request_id,
            track = %resolved.track.name,
            duration_ms = resolved.duration_ms,
            proxied = resolved.needs_proxy(),
            requester = %requester_name,
            "now playing"
        );
        state.playback.set(Playback::Playing(PlayingTrack {
            resolved: resolved.clone(),
            request,
            started_at: self.party.clock().now(),
        }));
        self.party.emit(PartyEvent::NowPlaying {
            track: resolved,
            requester_name,
            elapsed_ms: 0,
        });
        TickOutcome::Started(entry.request_id)
    }

    // Only the scheduler moves the phase into Resolving, so a pending entry
    // left behind by a panicked tick belongs to that tick.
    fn recover_after_panic(&self) -> Option<RequestId> {
        let mut state = self.party.lock();
        let entry = state.playback.pending()?.clone();
        state.playback.set(Playback::Idle);
        tracing::error!(
            request_id = %entry.request_id,
            track = %entry.track.id,
            "resolution abandoned after panic, skipping"
        );
        self.party.emit(PartyEvent::QueueFailed {
            track_name: entry.track.name,
        });
        Some(entry.request_id)
    }

    fn abandon(&self, request_id: &RequestId) -> bool {
        let mut state = self.party.lock();
        if state.playback.is_resolving(request_id) {
            state.playback.set(Playback::Idle);
            true
        } else {
            false
        }
    }
}

pub struct SchedulerHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("scheduler thread panicked");
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::events::ChannelBroadcaster;
    use crate::model::{ProxySource, TrackRef, TrackRequest};
    use crate::provider::{MusicProvider, ProviderRegistry, TrackResolver};
    use crate::proxy::{ProxyRouter, RouteTable};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;
    use std::time::Instant;
    use time::OffsetDateTime;

    struct Flaky {
        failures_left: AtomicUsize,
        calls: AtomicUsize,
        proxy: Option<ProxySource>,
    }

    impl Flaky {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                calls: AtomicUsize::new(0),
                proxy: None,
            }
        }
    }

    impl MusicProvider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn resolve(&self, track: &TrackRef) -> Result<ResolvedTrack, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ProviderError::Network(String::from("timeout")));
            }
            Ok(ResolvedTrack {
                track: track.clone(),
                url: format!("http://music.local/{}.m4a", track.id),
                duration_ms: 2_000,
                image_url: None,
                proxy: self.proxy.clone(),
            })
        }
    }

    struct Exploding;

    impl MusicProvider for Exploding {
        fn name(&self) -> &str {
            "exploding"
        }

        fn resolve(&self, _track: &TrackRef) -> Result<ResolvedTrack, ProviderError> {
            panic!("provider bug");
        }
    }

    struct PanickingRouter;

    impl ProxyRouter for PanickingRouter {
        fn start(&self, _request: ProxyRequest) -> Result<(), ProxyError> {
            panic!("router bug");
        }
    }

    struct PanicOnceClock {
        armed: AtomicBool,
    }

    impl Clock for PanicOnceClock {
        fn now(&self) -> OffsetDateTime {
            if self.armed.swap(false, Ordering::SeqCst) {
                panic!("clock bug");
            }
            OffsetDateTime::now_utc()
        }
    }

    fn proxied() -> Flaky {
        Flaky {
            proxy: Some(ProxySource {
                target_url: String::from("https://cdn.example.com/a.m4a"),
                referer: None,
            }),
            ..Flaky::new(0)
        }
    }

    fn setup(
        provider: Arc<dyn MusicProvider>,
        proxy: Arc<dyn ProxyRouter>,
    ) -> (Scheduler, Arc<ManualClock>, Receiver<PartyEvent>) {
        let (broadcaster, rx) = ChannelBroadcaster::new();
        let clock = Arc::new(ManualClock::default());
        let party = Party::new(
            TrackResolver::new(ProviderRegistry::new().with(provider)),
            Arc::new(broadcaster),
        )
        .with_clock(clock.clone())
        .with_proxy(proxy);
        (
            Scheduler::new(Arc::new(party), Duration::from_millis(10)),
            clock,
            rx,
        )
    }

    fn enqueue(scheduler: &Scheduler, id: &str, provider: &str) -> RequestId {
        scheduler.party().enqueue(TrackRequest::new(
            TrackRef::new(id, format!("Song {id}")),
            provider,
            "u1",
        ))
    }

    #[test]
    fn transient_failures_within_bound_still_start_playback() {
        let provider = Arc::new(Flaky::new(2));
        let (scheduler, _, _rx) = setup(provider.clone(), Arc::new(RouteTable::new()));
        let request_id = enqueue(&scheduler, "a", "flaky");

        assert_eq!(scheduler.tick(), TickOutcome::Started(request_id));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(scheduler.party().current_track().is_some());
    }

    #[test]
    fn proxied_track_routes_before_going_live() {
        let provider = Arc::new(Flaky {
            proxy: Some(ProxySource {
                target_url: String::from("https://cdn.example.com/a.m4a"),
                referer: Some(String::from("https://music.example.com/")),
            }),
            ..Flaky::new(0)
        });
        let routes = Arc::new(RouteTable::new());
        let (scheduler, _, _rx) = setup(provider, routes.clone());
        enqueue(&scheduler, "a", "flaky");

        assert!(matches!(scheduler.tick(), TickOutcome::Started(_)));
        let route = routes.current().expect("route established");
        assert_eq!(route.target_url, "https://cdn.example.com/a.m4a");
        assert_eq!(route.content_type, "audio/mp4");
        assert_eq!(route.referer.as_deref(), Some("https://music.example.com/"));
        assert_eq!(route.user_agent, crate::proxy::DEFAULT_USER_AGENT);
    }

    #[test]
    fn proxy_failure_counts_as_failed_attempt() {
        let provider = Arc::new(Flaky {
            proxy: Some(ProxySource {
                target_url: String::from("ftp://cdn.example.com/a.m4a"),
                referer: None,
            }),
            ..Flaky::new(0)
        });
        let (scheduler, _, rx) = setup(provider.clone(), Arc::new(RouteTable::new()));
        let request_id = enqueue(&scheduler, "a", "flaky");

        assert_eq!(scheduler.tick(), TickOutcome::Failed(request_id));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(scheduler.party().current_track().is_none());
        assert!(rx.try_iter().any(|event| event.kind() == "queue_failed"));
    }

    #[test]
    fn panicking_proxy_router_fails_entry_and_frees_the_scheduler() {
        let provider = Arc::new(proxied());
        let (scheduler, _, rx) = setup(provider.clone(), Arc::new(PanickingRouter));
        let first = enqueue(&scheduler, "a", "flaky");
        let second = enqueue(&scheduler, "b", "flaky");

        assert_eq!(scheduler.tick(), TickOutcome::Failed(first));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        assert!(scheduler.party().lock().playback.is_idle());
        assert_eq!(scheduler.tick(), TickOutcome::Failed(second));
        let failures = rx
            .try_iter()
            .filter(|event| event.kind() == "queue_failed")
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn unknown_provider_is_discarded_without_retry_or_failure_event() {
        let (scheduler, _, rx) = setup(Arc::new(Flaky::new(0)), Arc::new(RouteTable::new()));
        let request_id = enqueue(&scheduler, "a", "nowhere");

        assert_eq!(scheduler.tick(), TickOutcome::Discarded(request_id));
        assert!(scheduler.party().queue().is_empty());
        let kinds: Vec<_> = rx.try_iter().map(|event| event.kind()).collect();
        assert_eq!(kinds, vec!["enqueued", "dequeued"]);
    }

    #[test]
    fn panicking_provider_is_treated_as_failure() {
        let (scheduler, _, rx) = setup(Arc::new(Exploding), Arc::new(RouteTable::new()));
        let request_id = enqueue(&scheduler, "a", "exploding");

        assert_eq!(scheduler.tick(), TickOutcome::Failed(request_id));
        assert!(scheduler.party().lock().playback.is_idle());
        assert!(rx.try_iter().any(|event| event.kind() == "queue_failed"));
    }

    #[test]
    fn commit_is_dropped_when_skip_cancelled_the_resolution() {
        let (scheduler, _, _rx) = setup(Arc::new(Flaky::new(0)), Arc::new(RouteTable::new()));
        let request_id = enqueue(&scheduler, "a", "flaky");
        let entry = {
            let mut state = scheduler.party().lock();
            let entry = state.queue.try_dequeue().expect("entry");
            state.playback.set(Playback::Resolving(entry.clone()));
            entry
        };
        scheduler.party().next_song("op");

        let resolved = scheduler.attempt(&entry).expect("resolve");
        assert_eq!(
            scheduler.commit(entry, resolved),
            TickOutcome::Superseded(request_id)
        );
        assert!(scheduler.party().current_track().is_none());
    }

    #[test]
    fn tick_while_resolving_is_busy() {
        let (scheduler, _, _rx) = setup(Arc::new(Flaky::new(0)), Arc::new(RouteTable::new()));
        enqueue(&scheduler, "a", "flaky");
        enqueue(&scheduler, "b", "flaky");
        {
            let mut state = scheduler.party().lock();
            let entry = state.queue.try_dequeue().expect("entry");
            state.playback.set(Playback::Resolving(entry));
        }
        assert_eq!(scheduler.tick(), TickOutcome::Busy);
        assert_eq!(scheduler.party().queue().len(), 1);
    }

    #[test]
    fn playing_track_waits_until_duration_elapses() {
        let (scheduler, clock, _rx) = setup(Arc::new(Flaky::new(0)), Arc::new(RouteTable::new()));
        scheduler.party().set_loop_mode(false);
        enqueue(&scheduler, "a", "flaky");

        assert!(matches!(scheduler.tick(), TickOutcome::Started(_)));
        clock.advance(Duration::from_millis(1_999));
        assert_eq!(scheduler.tick(), TickOutcome::Playing);
        clock.advance(Duration::from_millis(1));
        assert_eq!(scheduler.tick(), TickOutcome::Finished { requeued: None });
        assert_eq!(scheduler.tick(), TickOutcome::QueueEmpty);
    }

    #[test]
    fn background_loop_plays_and_stops_promptly() {
        let (broadcaster, rx) = ChannelBroadcaster::new();
        let registry = ProviderRegistry::new().with(Arc::new(Flaky::new(0)));
        let party = Arc::new(Party::new(TrackResolver::new(registry), Arc::new(broadcaster)));
        party.enqueue(TrackRequest::new(TrackRef::new("a", "Song a"), "flaky", "u1"));

        let handle = Scheduler::new(party.clone(), Duration::from_millis(5)).spawn();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut started = false;
        while Instant::now() < deadline && !started {
            started = rx
                .recv_timeout(Duration::from_millis(50))
                .is_ok_and(|event| event.kind() == "now_playing");
        }
        assert!(started, "scheduler never started playback");

        let stop_started = Instant::now();
        handle.shutdown();
        assert!(stop_started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn background_loop_recovers_from_panicking_tick() {
        let (broadcaster, rx) = ChannelBroadcaster::new();
        let registry = ProviderRegistry::new().with(Arc::new(Flaky::new(0)));
        let clock = Arc::new(PanicOnceClock {
            armed: AtomicBool::new(true),
        });
        let party = Arc::new(
            Party::new(TrackResolver::new(registry), Arc::new(broadcaster)).with_clock(clock),
        );
        party.enqueue(TrackRequest::new(TrackRef::new("a", "Song a"), "flaky", "u1"));
        party.enqueue(TrackRequest::new(TrackRef::new("b", "Song b"), "flaky", "u1"));

        let handle = Scheduler::new(party.clone(), Duration::from_millis(5)).spawn();
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut failed = Vec::new();
        let mut started = None;
        while Instant::now() < deadline && started.is_none() {
            match rx.recv_timeout(Duration::from_millis(50)) {
                Ok(PartyEvent::QueueFailed { track_name }) => failed.push(track_name),
                Ok(PartyEvent::NowPlaying { track, .. }) => started = Some(track.track.id),
                _ => {}
            }
        }
        handle.shutdown();

        assert_eq!(failed, vec![String::from("Song a")]);
        assert_eq!(started.as_deref(), Some("b"));
        assert!(party.queue().is_empty());
    }

    #[test]
    fn recovery_is_a_noop_without_pending_resolution() {
        let (scheduler, _, rx) = setup(Arc::new(Flaky::new(0)), Arc::new(RouteTable::new()));
        assert_eq!(scheduler.recover_after_panic(), None);
        assert!(rx.try_recv().is_err());
    }
}
