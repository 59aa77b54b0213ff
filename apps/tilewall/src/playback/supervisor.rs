//! Playback Supervisor: per-tile stall watchdog and restart.
//!
//! # Per-tile state machine
//! - `Playing`: progress events keep arriving.
//! - `Stalled`: idle for at least the timeout, but the watchdog has not polled yet.
//!   Derived on read; never acted on by itself.
//! - `Restarting`: the watchdog stopped and re-issued play. Returns to `Playing` on the
//!   next progress event, or when the reconnect indicator expires.
//! - `Disposed`: terminal; the tile left the active set.
//!
//! # Tasks
//! Each tile owns two tokio tasks, both aborted on disposal:
//! - the watchdog, ticking every `poll_interval` from registration, so worst-case
//!   detection latency is `poll_interval + watchdog_timeout`;
//! - the event pump, draining the session's event channel.
//!
//! Decode and connection errors are logged and otherwise treated as silence. A single
//! bad frame never triggers an immediate restart.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::layout::{AspectModel, LayoutResult, Tile};
use crate::playback::session::{SessionEvent, SessionFactory, Surface, TileSession};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_RECONNECT_INDICATOR: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Silence longer than this triggers a restart.
    pub watchdog_timeout: Duration,
    pub poll_interval: Duration,
    /// How long the "reconnecting" indicator stays up after a restart.
    pub reconnect_indicator: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_indicator: DEFAULT_RECONNECT_INDICATOR,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Observable state
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    Playing,
    Stalled,
    Restarting,
    Disposed,
}

/// What the host renders for a tile: phase plus the transient overlay flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileHealth {
    pub tile_id: String,
    pub phase: PlaybackPhase,
    /// Show the "reconnecting" overlay. A UI affordance, not a health signal.
    pub reconnecting: bool,
    pub idle_ms: u64,
    pub restarts: u32,
    pub attached: bool,
    pub target_aspect: Option<f32>,
}

#[derive(Debug)]
struct PlaybackState {
    /// `Playing`, `Restarting` or `Disposed`; `Stalled` is only ever derived.
    phase: PlaybackPhase,
    last_progress: Instant,
    reconnecting: bool,
    surface: Option<Surface>,
    target_aspect: Option<f32>,
    restarts: u32,
}

/// State and session of one tile, shared with its two tasks.
struct TileShared {
    tile: Tile,
    session: Box<dyn TileSession>,
    /// Session calls are made while holding this lock, so nothing reaches the session
    /// after disposal.
    state: Mutex<PlaybackState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl TileShared {
    fn health(&self, config: &SupervisorConfig) -> TileHealth {
        let state = lock(&self.state);
        let idle = Instant::now().saturating_duration_since(state.last_progress);
        let phase = match state.phase {
            PlaybackPhase::Playing if idle >= config.watchdog_timeout => PlaybackPhase::Stalled,
            phase => phase,
        };
        TileHealth {
            tile_id: self.tile.id.clone(),
            phase,
            reconnecting: state.reconnecting,
            idle_ms: idle.as_millis() as u64,
            restarts: state.restarts,
            attached: state.surface.is_some(),
            target_aspect: state.target_aspect,
        }
    }

    /// One watchdog poll. Returns true when a restart was issued.
    fn check_stall(&self, config: &SupervisorConfig) -> bool {
        let mut state = lock(&self.state);
        if state.phase == PlaybackPhase::Disposed {
            return false;
        }
        let now = Instant::now();
        let idle = now.saturating_duration_since(state.last_progress);
        if idle < config.watchdog_timeout {
            return false;
        }

        state.phase = PlaybackPhase::Restarting;
        state.reconnecting = true;
        state.restarts += 1;
        state.last_progress = now;
        warn!(
            tile_id = %self.tile.id,
            idle_ms = idle.as_millis() as u64,
            restarts = state.restarts,
            "Watchdog restarting stalled stream"
        );

        self.session.stop();
        // Without a surface, play is deferred to the next attach.
        if state.surface.is_some() {
            self.session.play();
        }
        self.session.set_target_aspect(state.target_aspect);
        true
    }

    fn finish_restart(&self) {
        let mut state = lock(&self.state);
        if state.phase == PlaybackPhase::Disposed {
            return;
        }
        if state.phase == PlaybackPhase::Restarting {
            state.phase = PlaybackPhase::Playing;
        }
        state.reconnecting = false;
    }

    fn on_event(&self, event: SessionEvent, aspects: &AspectModel) {
        if event.is_progress() {
            let mut state = lock(&self.state);
            if state.phase == PlaybackPhase::Disposed {
                return;
            }
            state.last_progress = Instant::now();
            if state.phase == PlaybackPhase::Restarting {
                debug!(tile_id = %self.tile.id, "Stream resumed after restart");
                state.phase = PlaybackPhase::Playing;
            }
            return;
        }

        match event {
            SessionEvent::MeasuredAspect { ratio } => {
                aspects.report_measured(&self.tile.id, &self.tile.stream_locator, ratio);
            }
            SessionEvent::Ended => {
                debug!(tile_id = %self.tile.id, "Stream ended; left to watchdog");
            }
            SessionEvent::Error { message } => {
                warn!(tile_id = %self.tile.id, error = %message, "Session error; left to watchdog");
            }
            _ => {}
        }
    }

    /// Stops and releases the session. Idempotent.
    fn shut_down(&self) {
        let mut state = lock(&self.state);
        if state.phase == PlaybackPhase::Disposed {
            return;
        }
        state.phase = PlaybackPhase::Disposed;
        state.reconnecting = false;
        self.session.stop();
        if state.surface.take().is_some() {
            self.session.detach();
        }
        self.session.dispose();
    }
}

async fn run_watchdog(shared: Arc<TileShared>, config: SupervisorConfig, registered_at: Instant) {
    let mut ticker = tokio::time::interval_at(registered_at + config.poll_interval, config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if shared.check_stall(&config) {
            tokio::time::sleep(config.reconnect_indicator).await;
            shared.finish_restart();
        }
    }
}

async fn pump_events(
    shared: Arc<TileShared>,
    mut events: mpsc::Receiver<SessionEvent>,
    aspects: AspectModel,
) {
    while let Some(event) = events.recv().await {
        shared.on_event(event, &aspects);
    }
    debug!(tile_id = %shared.tile.id, "Session event channel closed");
}

// ────────────────────────────────────────────────────────────────────────────
// Supervisor
// ────────────────────────────────────────────────────────────────────────────

struct TileEntry {
    shared: Arc<TileShared>,
    watchdog: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl TileEntry {
    /// Cancels both tasks, then stops and releases the session.
    fn release(self) {
        self.watchdog.abort();
        self.pump.abort();
        self.shared.shut_down();
    }
}

/// Owns every active tile's session and tasks, keyed by tile id.
///
/// Must be used from within a tokio runtime: starting a tile spawns its tasks.
pub struct PlaybackSupervisor {
    config: SupervisorConfig,
    aspects: AspectModel,
    factory: Arc<dyn SessionFactory>,
    tiles: Mutex<HashMap<String, TileEntry>>,
    /// Serialises start, reconcile and dispose so a tile id never has two live sessions.
    lifecycle: Mutex<()>,
}

impl PlaybackSupervisor {
    pub fn new(config: SupervisorConfig, aspects: AspectModel, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            config,
            aspects,
            factory,
            tiles: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(()),
        }
    }

    /// Opens a session for `tile` and starts its watchdog. An existing entry with the
    /// same id is disposed first.
    pub fn start_tile(&self, tile: &Tile) {
        let _lifecycle = lock(&self.lifecycle);
        self.start_locked(tile);
    }

    fn start_locked(&self, tile: &Tile) {
        self.dispose_locked(&tile.id);

        let handle = self.factory.open(tile);
        let now = Instant::now();
        let shared = Arc::new(TileShared {
            tile: tile.clone(),
            session: handle.session,
            state: Mutex::new(PlaybackState {
                phase: PlaybackPhase::Playing,
                last_progress: now,
                reconnecting: false,
                surface: None,
                target_aspect: None,
                restarts: 0,
            }),
        });

        let watchdog = tokio::spawn(run_watchdog(shared.clone(), self.config, now));
        let pump = tokio::spawn(pump_events(shared.clone(), handle.events, self.aspects.clone()));

        info!(
            tile_id = %tile.id,
            locator = %tile.stream_locator,
            audio = tile.audio,
            "Tile session started"
        );
        let replaced = lock(&self.tiles).insert(
            tile.id.clone(),
            TileEntry {
                shared,
                watchdog,
                pump,
            },
        );
        if let Some(entry) = replaced {
            warn!(tile_id = %tile.id, "Replaced a live tile session");
            entry.release();
        }
    }

    /// Reconciles the supervised set with `tiles`: disposes removed tiles, recreates
    /// tiles whose stream locator or audio flag changed, and starts new ones.
    pub fn sync_tiles(&self, tiles: &[Tile]) {
        let _lifecycle = lock(&self.lifecycle);
        let wanted: HashMap<&str, &Tile> = tiles.iter().map(|t| (t.id.as_str(), t)).collect();

        let stale: Vec<String> = lock(&self.tiles)
            .iter()
            .filter(|(id, entry)| match wanted.get(id.as_str()) {
                Some(tile) => {
                    tile.stream_locator != entry.shared.tile.stream_locator
                        || tile.audio != entry.shared.tile.audio
                }
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.dispose_locked(id);
        }

        let present: HashSet<String> = lock(&self.tiles).keys().cloned().collect();
        for tile in tiles {
            if !present.contains(&tile.id) {
                self.start_locked(tile);
            }
        }
    }

    fn shared(&self, tile_id: &str) -> Option<Arc<TileShared>> {
        lock(&self.tiles).get(tile_id).map(|e| e.shared.clone())
    }

    /// Attaches a rendering surface and starts playback. Returns false for unknown tiles.
    pub fn attach(&self, tile_id: &str, surface: Surface) -> bool {
        let Some(shared) = self.shared(tile_id) else {
            return false;
        };
        let mut state = lock(&shared.state);
        if state.phase == PlaybackPhase::Disposed {
            return false;
        }
        shared.session.attach(&surface);
        shared.session.set_target_aspect(state.target_aspect);
        shared.session.play();
        state.surface = Some(surface);
        true
    }

    pub fn detach(&self, tile_id: &str) -> bool {
        let Some(shared) = self.shared(tile_id) else {
            return false;
        };
        let mut state = lock(&shared.state);
        if state.surface.take().is_some() {
            shared.session.detach();
        }
        true
    }

    pub fn set_target_aspect(&self, tile_id: &str, aspect: Option<f32>) -> bool {
        let Some(shared) = self.shared(tile_id) else {
            return false;
        };
        let mut state = lock(&shared.state);
        if state.phase == PlaybackPhase::Disposed {
            return false;
        }
        if state.target_aspect != aspect {
            state.target_aspect = aspect;
            shared.session.set_target_aspect(aspect);
        }
        true
    }

    /// Pushes each placed tile's target aspect into its session.
    pub fn apply_layout(&self, layout: &LayoutResult) {
        for placed in &layout.tiles {
            self.set_target_aspect(&placed.tile_id, placed.target_aspect);
        }
    }

    pub fn for_tile(&self, tile_id: &str) -> Option<TileHealth> {
        self.shared(tile_id).map(|s| s.health(&self.config))
    }

    /// Ids of the supervised tiles, sorted.
    pub fn tile_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.tiles).keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancels the tile's tasks and releases its session before returning.
    pub fn dispose(&self, tile_id: &str) -> bool {
        let _lifecycle = lock(&self.lifecycle);
        self.dispose_locked(tile_id)
    }

    fn dispose_locked(&self, tile_id: &str) -> bool {
        let Some(entry) = lock(&self.tiles).remove(tile_id) else {
            return false;
        };
        entry.release();
        info!(tile_id = %tile_id, "Tile session disposed");
        true
    }

    pub fn dispose_all(&self) {
        let _lifecycle = lock(&self.lifecycle);
        let entries: Vec<TileEntry> = lock(&self.tiles).drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.release();
        }
    }
}

impl Drop for PlaybackSupervisor {
    fn drop(&mut self) {
        self.dispose_all();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{compute_layout, Strategy, Viewport};
    use crate::playback::session::{SessionHandle, EVENT_CHANNEL_CAPACITY};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(String, String)>>,
    }

    impl Recorder {
        fn commands(&self, tile_id: &str) -> Vec<String> {
            lock(&self.log)
                .iter()
                .filter(|(id, _)| id == tile_id)
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    struct FakeSession {
        tile_id: String,
        recorder: Arc<Recorder>,
    }

    impl FakeSession {
        fn record(&self, command: impl Into<String>) {
            lock(&self.recorder.log).push((self.tile_id.clone(), command.into()));
        }
    }

    impl TileSession for FakeSession {
        fn attach(&self, surface: &Surface) {
            self.record(format!("attach:{}", surface.0));
        }
        fn detach(&self) {
            self.record("detach");
        }
        fn play(&self) {
            self.record("play");
        }
        fn stop(&self) {
            self.record("stop");
        }
        fn dispose(&self) {
            self.record("dispose");
        }
        fn set_target_aspect(&self, aspect: Option<f32>) {
            self.record(format!("aspect:{aspect:?}"));
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        recorder: Arc<Recorder>,
        senders: Mutex<HashMap<String, mpsc::Sender<SessionEvent>>>,
        opened: AtomicUsize,
    }

    impl FakeFactory {
        fn sender(&self, tile_id: &str) -> mpsc::Sender<SessionEvent> {
            lock(&self.senders).get(tile_id).cloned().expect("session opened")
        }
    }

    impl SessionFactory for FakeFactory {
        fn open(&self, tile: &Tile) -> SessionHandle {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            lock(&self.senders).insert(tile.id.clone(), tx);
            SessionHandle {
                session: Box::new(FakeSession {
                    tile_id: tile.id.clone(),
                    recorder: self.recorder.clone(),
                }),
                events: rx,
            }
        }
    }

    fn setup(config: SupervisorConfig) -> (PlaybackSupervisor, Arc<FakeFactory>, AspectModel) {
        let factory = Arc::new(FakeFactory::default());
        let aspects = AspectModel::new();
        let supervisor = PlaybackSupervisor::new(config, aspects.clone(), factory.clone());
        (supervisor, factory, aspects)
    }

    fn tile(id: &str) -> Tile {
        Tile::new(id, format!("rtsp://nvr:8554/{id}"))
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    async fn advance_ms(ms: u64) {
        tokio::time::advance(Duration::from_millis(ms)).await;
        settle().await;
    }

    fn phase(supervisor: &PlaybackSupervisor, id: &str) -> PlaybackPhase {
        supervisor.for_tile(id).expect("tile registered").phase
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_tile_restarts_after_timeout() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.start_tile(&tile("door"));
        settle().await;

        advance_ms(55_000).await;
        assert_eq!(phase(&supervisor, "door"), PlaybackPhase::Playing);

        advance_ms(5_500).await; // t = 60.5s
        let health = supervisor.for_tile("door").unwrap();
        assert_eq!(health.phase, PlaybackPhase::Restarting);
        assert!(health.reconnecting);
        assert_eq!(health.restarts, 1);
        // Not attached: stop only, play waits for a surface.
        assert_eq!(factory.recorder.commands("door"), vec!["stop", "aspect:None"]);

        advance_ms(1_500).await; // indicator expires
        let health = supervisor.for_tile("door").unwrap();
        assert_eq!(health.phase, PlaybackPhase::Playing);
        assert!(!health.reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_before_timeout_prevents_restart() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.start_tile(&tile("yard"));
        settle().await;

        advance_ms(50_000).await;
        factory
            .sender("yard")
            .send(SessionEvent::Progress { position_ms: 50_000 })
            .await
            .unwrap();
        settle().await;

        advance_ms(15_000).await; // t = 65s, idle 15s
        let health = supervisor.for_tile("yard").unwrap();
        assert_eq!(health.phase, PlaybackPhase::Playing);
        assert_eq!(health.restarts, 0);
        assert!(factory.recorder.commands("yard").is_empty());

        // Silence since t = 50s: the poll at t = 110s catches it.
        for _ in 0..4 {
            advance_ms(10_000).await;
        }
        assert_eq!(phase(&supervisor, "yard"), PlaybackPhase::Playing);
        advance_ms(10_000).await;
        assert_eq!(phase(&supervisor, "yard"), PlaybackPhase::Restarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_is_reported_between_polls() {
        let config = SupervisorConfig {
            watchdog_timeout: Duration::from_secs(55),
            ..SupervisorConfig::default()
        };
        let (supervisor, _, _) = setup(config);
        supervisor.start_tile(&tile("gate"));
        settle().await;

        // Step through each poll so the watchdog sees every tick.
        for _ in 0..5 {
            advance_ms(10_000).await;
            assert_eq!(phase(&supervisor, "gate"), PlaybackPhase::Playing);
        }
        advance_ms(6_000).await; // t = 56s, idle past the timeout, no poll yet
        assert_eq!(phase(&supervisor, "gate"), PlaybackPhase::Stalled);
        advance_ms(4_000).await; // poll at t = 60s
        assert_eq!(phase(&supervisor, "gate"), PlaybackPhase::Restarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_during_restart_returns_to_playing() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.start_tile(&tile("porch"));
        settle().await;

        advance_ms(60_000).await;
        assert_eq!(phase(&supervisor, "porch"), PlaybackPhase::Restarting);

        factory.sender("porch").send(SessionEvent::Playing).await.unwrap();
        settle().await;
        let health = supervisor.for_tile("porch").unwrap();
        assert_eq!(health.phase, PlaybackPhase::Playing);
        // The overlay stays up until its own timer runs out.
        assert!(health.reconnecting);

        advance_ms(1_500).await;
        assert!(!supervisor.for_tile("porch").unwrap().reconnecting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attached_restart_replays_and_reapplies_aspect() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.start_tile(&tile("drive"));
        assert!(supervisor.set_target_aspect("drive", Some(1.5)));
        assert!(supervisor.attach("drive", Surface("s1".into())));
        settle().await;

        advance_ms(60_000).await;
        assert_eq!(
            factory.recorder.commands("drive"),
            vec![
                "aspect:Some(1.5)",
                "attach:s1",
                "aspect:Some(1.5)",
                "play",
                "stop",
                "play",
                "aspect:Some(1.5)",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_treated_as_silence() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.start_tile(&tile("shed"));
        settle().await;

        let tx = factory.sender("shed");
        tx.send(SessionEvent::Error { message: "decoder hiccup".into() }).await.unwrap();
        tx.send(SessionEvent::Ended).await.unwrap();
        settle().await;
        advance_ms(10_000).await;

        let health = supervisor.for_tile("shed").unwrap();
        assert_eq!(health.phase, PlaybackPhase::Playing);
        assert_eq!(health.restarts, 0);
        assert!(factory.recorder.commands("shed").is_empty());

        advance_ms(50_000).await;
        assert_eq!(phase(&supervisor, "shed"), PlaybackPhase::Restarting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_measured_aspect_reaches_model() {
        let (supervisor, factory, aspects) = setup(SupervisorConfig::default());
        let cam = tile("lobby");
        supervisor.start_tile(&cam);
        settle().await;

        factory
            .sender("lobby")
            .send(SessionEvent::MeasuredAspect { ratio: 4.0 / 3.0 })
            .await
            .unwrap();
        settle().await;

        assert!((aspects.effective_aspect_ratio(&cam) - 4.0 / 3.0).abs() < 1e-6);
        assert_eq!(aspects.generation(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_stops_session_and_cancels_watchdog() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.start_tile(&tile("alley"));
        supervisor.attach("alley", Surface("s9".into()));
        settle().await;

        assert!(supervisor.dispose("alley"));
        assert!(supervisor.for_tile("alley").is_none());
        let after_dispose = factory.recorder.commands("alley");
        assert_eq!(
            &after_dispose[after_dispose.len() - 3..],
            &["stop".to_string(), "detach".to_string(), "dispose".to_string()]
        );

        // Late events and elapsed time reach nothing.
        let _ = factory.sender("alley").try_send(SessionEvent::Playing);
        advance_ms(120_000).await;
        assert_eq!(factory.recorder.commands("alley"), after_dispose);
        assert!(!supervisor.dispose("alley"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_tiles_reconciles_active_set() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        supervisor.sync_tiles(&[tile("a"), tile("b")]);
        assert_eq!(supervisor.tile_ids(), vec!["a", "b"]);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);

        // Same set: nothing reopened.
        supervisor.sync_tiles(&[tile("a"), tile("b")]);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);

        // "b" removed, "c" added, "a" moves to another locator.
        let moved = Tile::new("a", "rtsp://nvr:8554/a_sub");
        supervisor.sync_tiles(&[moved, tile("c")]);
        assert_eq!(supervisor.tile_ids(), vec!["a", "c"]);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 4);
        assert!(factory.recorder.commands("b").contains(&"dispose".to_string()));
        assert!(factory.recorder.commands("a").contains(&"dispose".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_layout_pushes_target_aspects() {
        let (supervisor, factory, aspects) = setup(SupervisorConfig::default());
        let set = vec![tile("x"), tile("y"), tile("z")];
        supervisor.sync_tiles(&set);

        let layout = compute_layout(&set, &aspects.snapshot(), Viewport::bounded(300, 100), Strategy::wall());
        supervisor.apply_layout(&layout);

        for id in ["x", "y", "z"] {
            assert_eq!(supervisor.for_tile(id).unwrap().target_aspect, Some(3.0));
            assert_eq!(factory.recorder.commands(id), vec!["aspect:Some(3.0)"]);
        }
        // Re-applying the same layout is a no-op for the sessions.
        supervisor.apply_layout(&layout);
        assert_eq!(factory.recorder.commands("x").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_starts_leave_one_session_per_tile() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        let supervisor = Arc::new(supervisor);
        let runtime = tokio::runtime::Handle::current();
        const THREADS: usize = 4;
        const ROUNDS: usize = 25;
        let barrier = Arc::new(std::sync::Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let supervisor = supervisor.clone();
                let runtime = runtime.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let _runtime = runtime.enter();
                    for _ in 0..ROUNDS {
                        barrier.wait();
                        supervisor.start_tile(&tile("door"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().expect("worker panicked");
        }

        let opened = factory.opened.load(Ordering::SeqCst);
        assert_eq!(opened, THREADS * ROUNDS);
        assert_eq!(supervisor.tile_ids(), vec!["door"]);

        assert!(supervisor.dispose("door"));
        let disposed = factory
            .recorder
            .commands("door")
            .iter()
            .filter(|c| c.as_str() == "dispose")
            .count();
        // Every session that was ever opened has been released.
        assert_eq!(disposed, opened);
        assert!(supervisor.tile_ids().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_audio_change_recreates_session() {
        let (supervisor, factory, _) = setup(SupervisorConfig::default());
        let mut lead = tile("a");
        lead.audio = true;
        supervisor.sync_tiles(&[lead.clone(), tile("b")]);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 2);

        // "b" takes over audio: both sessions are rebuilt.
        lead.audio = false;
        let mut second = tile("b");
        second.audio = true;
        supervisor.sync_tiles(&[lead, second]);
        assert_eq!(factory.opened.load(Ordering::SeqCst), 4);
        assert!(factory.recorder.commands("a").contains(&"dispose".to_string()));
        assert!(factory.recorder.commands("b").contains(&"dispose".to_string()));
    }
}
