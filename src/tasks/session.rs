use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::{self, Receiver, UnboundedSender};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{Clock, TimerState};
use crate::config::Configuration;
use crate::events::{DisplayedImage, ImageId, ImageRef, SessionCommand};
use crate::history::HistoryLedger;
use crate::selector::Selector;
use crate::settings::{DEFAULT_TARGET_DURATION, SettingUpdate, SettingsStore};
use crate::tasks::{files, loader};

/// Audible cue fired on every over-time crossing while unmuted.
///
/// Implementations must not block; the controller does not wait for them.
pub trait Cue: Send + Sync {
    fn play(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionView {
    Active,
    /// Countdown between images, in remaining steps.
    Intermission(u8),
    Overview,
}

/// What the presentation should treat as busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loading {
    Idle,
    Directory,
    File,
}

/// Observable state, republished after every event the controller handles.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub view: SessionView,
    pub loading: Loading,
    pub autoplay: bool,
    pub timer: TimerState,
    pub target: Duration,
    pub muted: bool,
    pub over_time: bool,
    pub current: Option<DisplayedImage>,
    pub history: Vec<DisplayedImage>,
    pub history_total: Duration,
    pub indexed: usize,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            view: SessionView::Active,
            loading: Loading::Idle,
            autoplay: false,
            timer: TimerState::default(),
            target: DEFAULT_TARGET_DURATION,
            muted: false,
            over_time: false,
            current: None,
            history: Vec::new(),
            history_total: Duration::ZERO,
            indexed: 0,
        }
    }
}

impl SessionSnapshot {
    /// Remaining time until over-time, then the elapsed time past it.
    pub fn display_time(&self) -> Duration {
        if self.over_time {
            self.timer.elapsed
        } else {
            self.target.saturating_sub(self.timer.elapsed)
        }
    }

    /// Fraction of the target already spent, clamped to `0.0..=1.0`.
    pub fn progress(&self) -> f64 {
        if self.target.is_zero() {
            return 1.0;
        }
        (self.timer.elapsed.as_secs_f64() / self.target.as_secs_f64()).clamp(0.0, 1.0)
    }
}

/// Remembers whether the clock is already past the target so that the cue
/// sounds exactly once per crossing.
#[derive(Debug, Default)]
struct OverTimeEdge {
    over: bool,
}

impl OverTimeEdge {
    /// `true` only on the observation where `elapsed` first reaches `target`.
    fn observe(&mut self, elapsed: Duration, target: Duration) -> bool {
        let over = elapsed >= target;
        let crossed = over && !self.over;
        self.over = over;
        crossed
    }
}

#[derive(Debug)]
enum Completion {
    Scanned {
        generation: u64,
        root: std::path::PathBuf,
        found: Vec<ImageRef>,
    },
    Countdown {
        token: u64,
        remaining: u8,
    },
    Advanced {
        token: u64,
        image: Option<DisplayedImage>,
    },
}

struct Session {
    settings: SettingsStore,
    cue: Arc<dyn Cue>,
    extensions: Arc<[String]>,
    intermission_steps: u8,
    intermission_step: Duration,
    clock: Clock,
    index: Arc<[ImageRef]>,
    selector: Selector,
    history: HistoryLedger,
    view: SessionView,
    current: Option<DisplayedImage>,
    autoplay: bool,
    over_time: OverTimeEdge,
    scan_generation: u64,
    pending_scan: Option<u64>,
    advance_token: u64,
    pending_advance: Option<u64>,
    next_image_id: u64,
    completions: UnboundedSender<Completion>,
    state_tx: watch::Sender<SessionSnapshot>,
}

impl Session {
    fn new(
        cfg: &Configuration,
        settings: SettingsStore,
        cue: Arc<dyn Cue>,
        completions: UnboundedSender<Completion>,
        state_tx: watch::Sender<SessionSnapshot>,
    ) -> Self {
        Self {
            settings,
            cue,
            extensions: cfg.image_extensions.clone().into(),
            intermission_steps: cfg.intermission_steps,
            intermission_step: cfg.intermission_step,
            clock: Clock::new(),
            index: Arc::from(Vec::new()),
            selector: Selector::new(cfg.selection_seed),
            history: HistoryLedger::new(),
            view: SessionView::Active,
            current: None,
            autoplay: false,
            over_time: OverTimeEdge::default(),
            scan_generation: 0,
            pending_scan: None,
            advance_token: 0,
            pending_advance: None,
            next_image_id: 0,
            completions,
            state_tx,
        }
    }

    fn loading(&self) -> Loading {
        if self.pending_scan.is_some() {
            Loading::Directory
        } else if self.pending_advance.is_some() {
            Loading::File
        } else {
            Loading::Idle
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand, now: Instant) {
        debug!(?cmd, view = ?self.view, "command");
        match cmd {
            SessionCommand::OpenDirectory(None) => debug!("directory selection cancelled"),
            SessionCommand::OpenDirectory(Some(dir)) => {
                info!(directory = %dir.display(), "directory selected");
                self.settings
                    .set(SettingUpdate::LastOpenedDirectory(Some(dir)));
            }
            SessionCommand::DirectoryChanged(dir) => self.change_directory(dir),
            SessionCommand::Advance { skip } => {
                if self.view == SessionView::Active {
                    self.advance(skip, now);
                } else {
                    debug!(view = ?self.view, "advance ignored outside the active view");
                }
            }
            SessionCommand::ToggleAutoplay => self.toggle_autoplay(),
            SessionCommand::TogglePlay => self.clock_command(now, Clock::toggle),
            SessionCommand::Play => self.clock_command(now, Clock::play),
            SessionCommand::Pause => self.clock_command(now, Clock::pause),
            SessionCommand::ResetClock => self.clock_command(now, Clock::reset),
            SessionCommand::ToggleView => self.toggle_view(now),
            SessionCommand::ChangeDuration(target) => {
                if target.is_zero() {
                    warn!("ignoring zero target duration");
                } else {
                    self.settings.set(SettingUpdate::TargetDuration(target));
                }
            }
            SessionCommand::ToggleMute => {
                let muted = self.settings.get().muted;
                self.settings.set(SettingUpdate::Muted(!muted));
            }
            SessionCommand::ClearHistory => {
                if self.view == SessionView::Overview {
                    info!(cleared = self.history.len(), "history cleared");
                    self.history.clear();
                } else {
                    debug!(view = ?self.view, "clear history only applies to the overview");
                }
            }
        }
    }

    fn handle_completion(&mut self, done: Completion, now: Instant) {
        match done {
            Completion::Scanned {
                generation,
                root,
                found,
            } => {
                if self.pending_scan != Some(generation) {
                    debug!(root = %root.display(), generation, "discarding stale scan result");
                    return;
                }
                self.pending_scan = None;
                info!(root = %root.display(), images = found.len(), "file index replaced");
                self.index = found.into();
                self.advance(true, now);
            }
            Completion::Countdown { token, remaining } => {
                if self.pending_advance == Some(token) {
                    self.view = SessionView::Intermission(remaining);
                }
            }
            Completion::Advanced { token, image } => {
                if self.pending_advance != Some(token) {
                    debug!(token, latest = self.advance_token, "discarding superseded advance");
                    return;
                }
                self.pending_advance = None;
                self.view = SessionView::Active;
                self.current = image;
                self.clock.play(now);
                match &self.current {
                    Some(image) => info!(
                        id = image.id.0,
                        path = %image.source.path().display(),
                        "showing image"
                    ),
                    None => info!("no image to show"),
                }
            }
        }
    }

    fn change_directory(&mut self, dir: Option<std::path::PathBuf>) {
        self.scan_generation += 1;
        let generation = self.scan_generation;
        let Some(root) = dir else {
            info!("directory cleared; file index emptied");
            self.pending_scan = None;
            self.index = Arc::from(Vec::new());
            return;
        };
        info!(root = %root.display(), generation, "scanning directory");
        self.pending_scan = Some(generation);
        let extensions = Arc::clone(&self.extensions);
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let found = files::scan_async(root.clone(), extensions).await;
            let _ = tx.send(Completion::Scanned {
                generation,
                root,
                found,
            });
        });
    }

    /// Retires the current image and starts loading the next one, joined
    /// with the intermission countdown when autoplaying.
    fn advance(&mut self, skip: bool, now: Instant) {
        let final_elapsed = self.clock.elapsed(now);
        self.clock.reset(now);
        self.clock.pause(now);

        if let Some(outgoing) = self.current.take() {
            if skip {
                debug!(id = outgoing.id.0, "skipped image not recorded");
            } else {
                debug!(
                    id = outgoing.id.0,
                    elapsed = ?final_elapsed,
                    "recording image in history"
                );
                self.history.append(outgoing, final_elapsed);
            }
        }

        self.advance_token += 1;
        let token = self.advance_token;
        self.pending_advance = Some(token);

        let picked = self.selector.pick(&self.index).cloned();
        if picked.is_none() {
            info!("file index empty; nothing to show");
        }
        let id = ImageId(self.next_image_id);
        self.next_image_id += 1;

        let countdown = self.autoplay && !skip;
        let steps = self.intermission_steps;
        let step = self.intermission_step;
        if countdown {
            self.view = SessionView::Intermission(steps);
        }

        let tx = self.completions.clone();
        tokio::spawn(async move {
            let load = async {
                let source = picked?;
                match loader::load(source, id).await {
                    Ok(image) => Some(image),
                    Err(err) => {
                        warn!("{err}; image unavailable");
                        None
                    }
                }
            };
            let wait = async {
                if countdown {
                    loader::intermission(steps, step, |remaining| {
                        let _ = tx.send(Completion::Countdown { token, remaining });
                    })
                    .await;
                }
            };
            let (image, ()) = tokio::join!(load, wait);
            let _ = tx.send(Completion::Advanced { token, image });
        });
    }

    fn toggle_autoplay(&mut self) {
        self.autoplay = !self.autoplay;
        info!(autoplay = self.autoplay, "autoplay toggled");
    }

    fn toggle_view(&mut self, now: Instant) {
        match self.view {
            SessionView::Active => {
                self.clock.pause(now);
                self.view = SessionView::Overview;
            }
            SessionView::Overview => self.view = SessionView::Active,
            SessionView::Intermission(_) => debug!("view toggle ignored during intermission"),
        }
    }

    fn clock_command(&mut self, now: Instant, op: fn(&mut Clock, Instant)) {
        if self.pending_advance.is_some() {
            debug!("clock is held while the next image loads");
            return;
        }
        op(&mut self.clock, now);
    }

    fn can_auto_advance(&self) -> bool {
        self.view == SessionView::Active && self.pending_advance.is_none()
    }

    /// Sounds the cue on each over-time crossing, and advances whenever
    /// autoplay is on, the view is active and the clock is over time.
    ///
    /// Runs after every handled event, so returning to the active view or
    /// enabling autoplay while over time advances straight away.
    fn evaluate_over_time(&mut self, now: Instant) {
        let settings = self.settings.get();
        let elapsed = self.clock.elapsed(now);
        if self.over_time.observe(elapsed, settings.target_duration) {
            info!(?elapsed, target = ?settings.target_duration, "over time");
            if !settings.muted {
                self.cue.play();
            }
        }
        // The advance resets the clock, which ends the over-time period.
        if elapsed >= settings.target_duration && self.autoplay && self.can_auto_advance() {
            debug!("auto-advancing");
            self.advance(false, now);
        }
    }

    fn snapshot(&self, now: Instant) -> SessionSnapshot {
        let settings = self.settings.get();
        let timer = self.clock.state(now);
        SessionSnapshot {
            view: self.view,
            loading: self.loading(),
            autoplay: self.autoplay,
            timer,
            target: settings.target_duration,
            muted: settings.muted,
            over_time: timer.elapsed >= settings.target_duration,
            current: self.current.clone(),
            history: self.history.entries().to_vec(),
            history_total: self.history.total(),
            indexed: self.index.len(),
        }
    }

    fn publish(&self, now: Instant) {
        self.state_tx.send_replace(self.snapshot(now));
    }
}

/// Owns the session state and processes commands, I/O completions and clock
/// ticks one at a time until cancelled or the command channel closes.
pub async fn run(
    cfg: Configuration,
    settings: SettingsStore,
    cue: Arc<dyn Cue>,
    mut commands: Receiver<SessionCommand>,
    state_tx: watch::Sender<SessionSnapshot>,
    cancel: CancellationToken,
) -> Result<()> {
    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<Completion>();
    let mut session = Session::new(&cfg, settings, cue, completion_tx, state_tx);

    // Only polled while the clock runs; reset whenever it starts again.
    let mut ticker = time::interval(cfg.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    session.publish(Instant::now());
    loop {
        let was_running = session.clock.is_running();
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting session task");
                break;
            }

            maybe_cmd = commands.recv() => match maybe_cmd {
                Some(cmd) => session.handle_command(cmd, Instant::now()),
                None => {
                    info!("command channel closed; exiting session task");
                    break;
                }
            },

            Some(done) = completion_rx.recv() => {
                session.handle_completion(done, Instant::now());
            }

            // Over-time is evaluated below, like after any other event.
            _ = ticker.tick(), if was_running => {}
        }

        let now = Instant::now();
        if !was_running && session.clock.is_running() {
            ticker.reset();
        }
        session.evaluate_over_time(now);
        session.publish(now);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::{TempDir, tempdir};
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Default)]
    struct CountingCue(AtomicUsize);

    impl Cue for CountingCue {
        fn play(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingCue {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Harness {
        session: Session,
        completions: UnboundedReceiver<Completion>,
        cue: Arc<CountingCue>,
        settings: SettingsStore,
        tmp: TempDir,
    }

    fn write_images(dir: &Path, names: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        for name in names {
            fs::write(dir.join(name), b"not really an image").unwrap();
        }
    }

    fn harness() -> Harness {
        let tmp = tempdir().unwrap();
        write_images(&tmp.path().join("refs"), &["a.jpg", "b.png", "c.gif"]);
        let settings = SettingsStore::new(tmp.path().join("settings.json"));
        settings.bootstrap();
        let cfg = Configuration {
            selection_seed: Some(11),
            ..Configuration::default()
        };
        let (tx, completions) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SessionSnapshot::default());
        let cue = Arc::new(CountingCue::default());
        let session = Session::new(&cfg, settings.clone(), cue.clone(), tx, state_tx);
        Harness {
            session,
            completions,
            cue,
            settings,
            tmp,
        }
    }

    impl Harness {
        fn refs_dir(&self) -> PathBuf {
            self.tmp.path().join("refs")
        }

        fn command(&mut self, cmd: SessionCommand) {
            self.session.handle_command(cmd, Instant::now());
            self.session.evaluate_over_time(Instant::now());
        }

        /// Applies completions until no scan or advance is pending.
        async fn settle(&mut self) {
            while self.session.pending_scan.is_some() || self.session.pending_advance.is_some() {
                let done = self.completions.recv().await.unwrap();
                self.session.handle_completion(done, Instant::now());
                self.session.evaluate_over_time(Instant::now());
            }
        }

        async fn open_refs(&mut self) {
            let dir = self.refs_dir();
            self.command(SessionCommand::DirectoryChanged(Some(dir)));
            self.settle().await;
        }

        async fn tick_after(&mut self, secs: u64) {
            time::advance(Duration::from_secs(secs)).await;
            self.session.evaluate_over_time(Instant::now());
        }

        fn elapsed(&self) -> Duration {
            self.session.clock.elapsed(Instant::now())
        }
    }

    #[test]
    fn over_time_edge_fires_once_per_crossing() {
        let mut edge = OverTimeEdge::default();
        let target = Duration::from_secs(5);
        let fired: Vec<bool> = [4, 5, 6, 7]
            .into_iter()
            .map(|s| edge.observe(Duration::from_secs(s), target))
            .collect();
        assert_eq!(fired, vec![false, true, false, false]);

        // Dropping below the target (reset) re-arms the edge.
        assert!(!edge.observe(Duration::ZERO, target));
        assert!(edge.observe(Duration::from_secs(5), target));
    }

    #[tokio::test(start_paused = true)]
    async fn scan_completion_shows_an_image_without_recording() {
        let mut h = harness();
        h.open_refs().await;

        let snap = h.session.snapshot(Instant::now());
        assert_eq!(snap.indexed, 3);
        assert_eq!(snap.view, SessionView::Active);
        assert_eq!(snap.loading, Loading::Idle);
        assert!(snap.timer.running);
        let current = snap.current.expect("an image should be showing");
        assert!(current.source.directory.starts_with(h.refs_dir()));
        assert!(snap.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn next_records_elapsed_captured_before_reset() {
        let mut h = harness();
        h.open_refs().await;
        let first = h.session.current.as_ref().unwrap().id;

        time::advance(Duration::from_secs(7)).await;
        h.command(SessionCommand::Advance { skip: false });

        assert_eq!(h.session.history.len(), 1);
        let entry = &h.session.history.entries()[0];
        assert_eq!(entry.id, first);
        assert_eq!(entry.elapsed_on_exit(), Some(Duration::from_secs(7)));
        assert_eq!(h.elapsed(), Duration::ZERO);
        assert!(!h.session.clock.is_running());
        assert_eq!(h.session.loading(), Loading::File);

        h.settle().await;
        assert_ne!(h.session.current.as_ref().unwrap().id, first);
        assert!(h.session.clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn skip_never_records() {
        let mut h = harness();
        h.open_refs().await;
        time::advance(Duration::from_secs(3)).await;
        h.command(SessionCommand::Advance { skip: true });
        h.settle().await;
        assert!(h.session.history.is_empty());
        assert!(h.session.current.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn history_plus_clock_equals_active_time() {
        let mut h = harness();
        h.open_refs().await;

        let mut active = Duration::ZERO;
        for secs in [4, 9, 2] {
            time::advance(Duration::from_secs(secs)).await;
            active += Duration::from_secs(secs);
            h.command(SessionCommand::Advance { skip: false });
            h.settle().await;
        }
        // Time spent in the overview is paused and not counted.
        time::advance(Duration::from_secs(1)).await;
        active += Duration::from_secs(1);
        h.command(SessionCommand::ToggleView);
        time::advance(Duration::from_secs(30)).await;
        h.command(SessionCommand::ToggleView);

        assert_eq!(h.session.history.total() + h.elapsed(), active);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_scan_never_replaces_newer_index() {
        let mut h = harness();
        let a = h.tmp.path().join("a");
        let b = h.tmp.path().join("b");
        write_images(&a, &["old1.jpg", "old2.jpg", "old3.jpg"]);
        write_images(&b, &["new.png"]);

        h.command(SessionCommand::DirectoryChanged(Some(a)));
        h.command(SessionCommand::DirectoryChanged(Some(b.clone())));
        assert_eq!(h.session.loading(), Loading::Directory);

        // Both scans report back; apply them in whatever order they arrive.
        let mut scans = 0;
        while scans < 2 {
            let done = h.completions.recv().await.unwrap();
            if matches!(done, Completion::Scanned { .. }) {
                scans += 1;
            }
            h.session.handle_completion(done, Instant::now());
        }
        h.settle().await;

        assert_eq!(h.session.index.len(), 1);
        assert_eq!(h.session.index[0].directory, b);
        assert_eq!(
            h.session.current.as_ref().unwrap().source.file_name,
            "new.png"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_advance_is_discarded() {
        let mut h = harness();
        h.open_refs().await;

        h.command(SessionCommand::Advance { skip: false });
        h.command(SessionCommand::Advance { skip: false });
        let latest = ImageId(h.session.next_image_id - 1);

        let mut applied = 0;
        while applied < 2 {
            let done = h.completions.recv().await.unwrap();
            if matches!(done, Completion::Advanced { .. }) {
                applied += 1;
            }
            h.session.handle_completion(done, Instant::now());
        }

        assert_eq!(h.session.current.as_ref().unwrap().id, latest);
        // The second advance had no current image left to record.
        assert_eq!(h.session.history.len(), 1);
        assert_eq!(h.session.loading(), Loading::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_advances_once_per_crossing() {
        let mut h = harness();
        h.settings
            .set(SettingUpdate::TargetDuration(Duration::from_secs(5)));
        h.open_refs().await;
        h.command(SessionCommand::ToggleAutoplay);
        let token_before = h.session.advance_token;

        h.tick_after(5).await;
        h.tick_after(1).await;
        h.tick_after(1).await;

        assert_eq!(h.session.advance_token, token_before + 1);
        assert_eq!(h.session.history.len(), 1);
        assert_eq!(h.cue.count(), 1);
        assert_eq!(h.session.view, SessionView::Intermission(3));
    }

    #[tokio::test(start_paused = true)]
    async fn cue_fires_once_per_crossing_without_autoplay() {
        let mut h = harness();
        h.settings
            .set(SettingUpdate::TargetDuration(Duration::from_secs(5)));
        h.open_refs().await;

        h.tick_after(5).await;
        h.tick_after(1).await;
        h.tick_after(1).await;
        assert_eq!(h.cue.count(), 1);
        assert!(h.session.history.is_empty());

        h.command(SessionCommand::ResetClock);
        h.tick_after(5).await;
        assert_eq!(h.cue.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn muted_session_stays_silent() {
        let mut h = harness();
        h.settings
            .set(SettingUpdate::TargetDuration(Duration::from_secs(2)));
        h.command(SessionCommand::ToggleMute);
        assert!(h.settings.get().muted);
        h.open_refs().await;

        h.tick_after(3).await;
        assert_eq!(h.cue.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_autoplay_when_already_over_time_advances() {
        let mut h = harness();
        h.settings
            .set(SettingUpdate::TargetDuration(Duration::from_secs(2)));
        h.open_refs().await;
        h.tick_after(4).await;
        assert!(h.session.history.is_empty());

        h.command(SessionCommand::ToggleAutoplay);
        assert_eq!(h.session.history.len(), 1);
        assert_eq!(h.session.view, SessionView::Intermission(3));
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_catches_up_after_overview_round_trip() {
        let mut h = harness();
        h.settings
            .set(SettingUpdate::TargetDuration(Duration::from_secs(5)));
        h.open_refs().await;
        h.tick_after(6).await;
        assert_eq!(h.cue.count(), 1);

        h.command(SessionCommand::ToggleView);
        h.command(SessionCommand::ToggleAutoplay);
        assert!(h.session.history.is_empty(), "no advance from the overview");
        assert_eq!(h.session.view, SessionView::Overview);

        h.command(SessionCommand::ToggleView);
        assert_eq!(h.session.history.len(), 1);
        assert_eq!(
            h.session.history.entries()[0].elapsed_on_exit(),
            Some(Duration::from_secs(6))
        );
        assert_eq!(h.session.view, SessionView::Intermission(3));
        assert_eq!(h.cue.count(), 1);

        h.settle().await;
        assert_eq!(h.session.view, SessionView::Active);
        assert!(h.session.clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn autoplay_waits_for_pending_advance_then_resumes() {
        let mut h = harness();
        h.settings
            .set(SettingUpdate::TargetDuration(Duration::from_secs(2)));
        h.open_refs().await;
        h.command(SessionCommand::ToggleAutoplay);

        h.tick_after(2).await;
        assert_eq!(h.session.history.len(), 1);
        h.settle().await;

        // A fresh over-time period after the next image is shown advances again.
        h.tick_after(2).await;
        assert_eq!(h.session.history.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn intermission_counts_down_before_showing_next() {
        let mut h = harness();
        h.open_refs().await;
        h.command(SessionCommand::ToggleAutoplay);
        let shown = h.session.current.as_ref().unwrap().id;

        h.command(SessionCommand::Advance { skip: false });
        let mut views = vec![h.session.view];
        while h.session.pending_advance.is_some() {
            let done = h.completions.recv().await.unwrap();
            h.session.handle_completion(done, Instant::now());
            views.push(h.session.view);
        }
        views.dedup();

        assert_eq!(
            views,
            vec![
                SessionView::Intermission(3),
                SessionView::Intermission(2),
                SessionView::Intermission(1),
                SessionView::Active,
            ]
        );
        assert_ne!(h.session.current.as_ref().unwrap().id, shown);
    }

    #[tokio::test(start_paused = true)]
    async fn overview_pauses_and_returning_does_not_resume() {
        let mut h = harness();
        h.open_refs().await;
        time::advance(Duration::from_secs(5)).await;

        h.command(SessionCommand::ToggleView);
        assert_eq!(h.session.view, SessionView::Overview);
        assert!(!h.session.clock.is_running());
        time::advance(Duration::from_secs(20)).await;

        h.command(SessionCommand::ToggleView);
        assert_eq!(h.session.view, SessionView::Active);
        assert!(!h.session.clock.is_running());
        assert_eq!(h.elapsed(), Duration::from_secs(5));
        assert!(h.session.history.is_empty());

        h.command(SessionCommand::TogglePlay);
        assert!(h.session.clock.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn clear_history_only_in_overview() {
        let mut h = harness();
        h.open_refs().await;
        h.command(SessionCommand::Advance { skip: false });
        h.settle().await;
        assert_eq!(h.session.history.len(), 1);

        h.command(SessionCommand::ClearHistory);
        assert_eq!(h.session.history.len(), 1);

        h.command(SessionCommand::ToggleView);
        h.command(SessionCommand::ClearHistory);
        assert!(h.session.history.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_directory_clears_current() {
        let mut h = harness();
        h.open_refs().await;
        assert!(h.session.current.is_some());

        let empty = h.tmp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        h.command(SessionCommand::DirectoryChanged(Some(empty)));
        h.settle().await;

        assert_eq!(h.session.index.len(), 0);
        assert!(h.session.current.is_none());
        assert_eq!(h.session.view, SessionView::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_image_degrades_to_none() {
        let mut h = harness();
        h.open_refs().await;
        fs::remove_dir_all(h.refs_dir()).unwrap();

        h.command(SessionCommand::Advance { skip: false });
        h.settle().await;
        assert!(h.session.current.is_none());
        assert_eq!(h.session.loading(), Loading::Idle);
        assert_eq!(h.session.history.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_is_rejected() {
        let mut h = harness();
        h.command(SessionCommand::ChangeDuration(Duration::ZERO));
        assert_eq!(h.settings.get().target_duration, DEFAULT_TARGET_DURATION);
        h.command(SessionCommand::ChangeDuration(Duration::from_secs(45)));
        assert_eq!(h.settings.get().target_duration, Duration::from_secs(45));
    }

    #[test]
    fn display_time_counts_down_then_up() {
        let mut snap = SessionSnapshot {
            target: Duration::from_secs(60),
            ..SessionSnapshot::default()
        };
        snap.timer.elapsed = Duration::from_secs(15);
        assert_eq!(snap.display_time(), Duration::from_secs(45));
        assert!((snap.progress() - 0.25).abs() < f64::EPSILON);

        snap.timer.elapsed = Duration::from_secs(75);
        snap.over_time = true;
        assert_eq!(snap.display_time(), Duration::from_secs(75));
        assert!((snap.progress() - 1.0).abs() < f64::EPSILON);
    }
}
