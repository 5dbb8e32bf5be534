//! Playback orchestration: lifecycle phases, transport controls, and the
//! per-tick render pipeline.
//!
//! `Player` is generic over its three ports so the whole state machine runs
//! in unit tests without a GPU, a decoder, or a window.

use crate::effect::{Effect, EffectState};
use crate::frame::VideoFrame;
use crate::media::{MediaEvent, MediaSource};
use crate::shader::{build_program, EffectStage};
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Player lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No media attached.
    Idle,
    /// Media loaded but not yet played.
    Ready,
    Playing,
    Paused,
    /// The position reached the end of the media.
    Ended,
}

/// Externally visible playback state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackState {
    pub is_playing: bool,
    pub is_muted: bool,
    /// Stored volume in `[0, 1]`, preserved while muted.
    pub volume: f32,
    pub duration: f32,
    pub current_time: f32,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_muted: false,
            volume: 1.0,
            duration: 0.0,
            current_time: 0.0,
        }
    }
}

impl PlaybackState {
    /// Volume with mute applied.
    pub fn effective_volume(&self) -> f32 {
        if self.is_muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// Handle identifying one scheduled render tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickToken(u64);

impl TickToken {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Port for the host's frame callback (redraw request, vsync, timer).
pub trait TickScheduler {
    /// Requests one future tick and returns its token.
    fn schedule(&mut self) -> TickToken;

    /// Cancels a scheduled tick; its token must no longer be reported by
    /// `take_fired`.
    fn cancel(&mut self, token: TickToken);

    /// Takes the token of a tick that has fired, if any.
    fn take_fired(&mut self) -> Option<TickToken>;
}

/// Notifications surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    MetadataLoaded {
        width: u32,
        height: u32,
        duration: f32,
    },
    /// Playback reached the end of the media.
    Ended,
    /// The staged shader source failed to build; the previous program stays
    /// active and draws are suspended until the source changes.
    ShaderRejected { message: String },
    LoadFailed { message: String },
}

/// The playback engine, wired to its host through three ports.
pub struct Player<M: MediaSource, G: EffectStage, S: TickScheduler> {
    media: Option<M>,
    stage: G,
    scheduler: S,
    effects: EffectState,
    playback: PlaybackState,
    phase: Phase,
    pending: Option<TickToken>,
    /// Fragment body that most recently failed to build. Draws stay skipped
    /// until the desired source changes.
    failed_source: Option<String>,
    events: VecDeque<PlayerEvent>,
    last_output: Option<VideoFrame>,
    /// A still frame is owed (load, seek, or effect change while not playing)
    /// but no decoded frame was available yet.
    wants_still_frame: bool,
}

impl<M: MediaSource, G: EffectStage, S: TickScheduler> Player<M, G, S> {
    pub fn new(stage: G, scheduler: S) -> Self {
        Self {
            media: None,
            stage,
            scheduler,
            effects: EffectState::default(),
            playback: PlaybackState::default(),
            phase: Phase::Idle,
            pending: None,
            failed_source: None,
            events: VecDeque::new(),
            last_output: None,
            wants_still_frame: false,
        }
    }

    /// Attaches a new media source, replacing any current one.
    ///
    /// Volume and mute are element-level settings and survive the swap.
    pub fn load(&mut self, location: &str) {
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
        }
        self.media = None;
        self.phase = Phase::Idle;
        self.playback = PlaybackState {
            volume: self.playback.volume,
            is_muted: self.playback.is_muted,
            ..PlaybackState::default()
        };
        self.last_output = None;

        match M::open(location) {
            Ok(media) => {
                self.media = Some(media);
                self.phase = Phase::Ready;
                self.drain_media_events();
                self.wants_still_frame = true;
                self.render_still();
            }
            Err(e) => {
                warn!("Failed to load {}: {}", location, e);
                self.events.push_back(PlayerEvent::LoadFailed {
                    message: e.to_string(),
                });
            }
        }
    }

    /// Starts playback and arms the render cadence. From `Ended` this rewinds
    /// to the start first; with no media it is ignored.
    pub fn play(&mut self) {
        let Some(media) = self.media.as_mut() else {
            debug!("Ignoring play with no media loaded");
            return;
        };
        if self.phase == Phase::Playing {
            return;
        }

        if self.phase == Phase::Ended {
            media.seek(0.0);
            self.playback.current_time = 0.0;
        }

        media.play();
        self.playback.is_playing = true;
        self.phase = Phase::Playing;
        self.schedule_tick();
    }

    /// Freezes playback and revokes the pending tick. A no-op once ended.
    pub fn pause(&mut self) {
        if self.phase == Phase::Ended {
            return;
        }
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
        }
        if let Some(media) = self.media.as_mut() {
            media.pause();
        }
        if self.phase == Phase::Playing {
            self.phase = Phase::Paused;
            self.playback.current_time = self.position_clamped();
        }
        self.playback.is_playing = false;
    }

    pub fn toggle_play(&mut self) {
        if self.playback.is_playing {
            self.pause();
        } else {
            self.play();
        }
    }

    /// Jumps to `seconds` (clamped to the media length) and renders one still
    /// frame. The render cadence is never re-armed from here.
    pub fn seek(&mut self, seconds: f32) {
        let Some(media) = self.media.as_mut() else {
            debug!("Ignoring seek with no media loaded");
            return;
        };

        let duration = self.playback.duration;
        let target = if duration > 0.0 {
            seconds.clamp(0.0, duration)
        } else {
            seconds.max(0.0)
        };
        if target != seconds {
            debug!("Clamped seek target {:.3}s to {:.3}s", seconds, target);
        }

        media.seek(target);
        self.playback.current_time = target;

        if self.phase == Phase::Ended {
            self.phase = Phase::Paused;
        }

        self.wants_still_frame = true;
        self.render_still();
    }

    /// Sets the stored volume, clamped to `[0, 1]`. Mute is untouched.
    pub fn set_volume(&mut self, volume: f32) {
        let clamped = volume.clamp(0.0, 1.0);
        if clamped != volume {
            debug!("Clamped volume {:.2} to {:.2}", volume, clamped);
        }
        self.playback.volume = clamped;
    }

    /// Mutes or unmutes without touching the stored volume.
    pub fn set_muted(&mut self, muted: bool) {
        self.playback.is_muted = muted;
    }

    /// Switches the active effect. Selecting a builtin discards any staged
    /// custom source.
    pub fn select_effect(&mut self, effect: Effect) {
        self.effects.select(effect);
        self.refresh_after_effect_change();
    }

    /// Stages a custom fragment body. Takes effect immediately when the
    /// custom slot is active, otherwise waits for it to be selected.
    pub fn stage_custom_source(&mut self, source: String) {
        self.effects.stage_custom(source);
        self.refresh_after_effect_change();
    }

    /// Runs one scheduled render tick. Tokens that are stale (superseded or
    /// revoked) are dropped at the door.
    pub fn tick(&mut self, token: TickToken) {
        if self.pending != Some(token) {
            debug!("Ignoring stale tick {:?}", token);
            return;
        }
        self.pending = None;

        if self.phase != Phase::Playing {
            return;
        }

        let duration = self.playback.duration;
        let position = self.media.as_ref().map(|m| m.position()).unwrap_or(0.0);

        // End of media: stop the cadence without drawing this tick.
        if duration > 0.0 && position >= duration {
            if let Some(media) = self.media.as_mut() {
                media.pause();
            }
            self.playback.is_playing = false;
            self.playback.current_time = duration;
            self.phase = Phase::Ended;
            info!("Playback ended at {:.1}s", duration);
            self.events.push_back(PlayerEvent::Ended);
            return;
        }

        let time = if duration > 0.0 {
            position.min(duration)
        } else {
            position
        };
        self.draw_current_frame(time);
        self.playback.current_time = time;

        self.pending = Some(self.scheduler.schedule());
    }

    /// Drives the player from the host's redraw handler: fires a due tick and
    /// retries any owed still frame.
    pub fn pump(&mut self) {
        self.drain_media_events();
        if let Some(token) = self.scheduler.take_fired() {
            self.tick(token);
        }
        if self.wants_still_frame {
            self.render_still();
        }
    }

    /// Takes the most recently rendered frame for presentation.
    pub fn take_output(&mut self) -> Option<VideoFrame> {
        self.last_output.take()
    }

    pub fn poll_event(&mut self) -> Option<PlayerEvent> {
        self.events.pop_front()
    }

    pub fn playback(&self) -> &PlaybackState {
        &self.playback
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn active_effect(&self) -> Effect {
        self.effects.active()
    }

    /// The staged custom fragment body, if any.
    pub fn custom_source(&self) -> Option<&str> {
        let source = self.effects.custom_source();
        if source.is_empty() {
            None
        } else {
            Some(source)
        }
    }

    fn schedule_tick(&mut self) {
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
        }
        self.pending = Some(self.scheduler.schedule());
    }

    fn refresh_after_effect_change(&mut self) {
        if self.media.is_some() && self.phase != Phase::Playing {
            self.wants_still_frame = true;
            self.render_still();
        }
    }

    fn drain_media_events(&mut self) {
        while let Some(event) = self.media.as_mut().and_then(|m| m.poll_event()) {
            match event {
                MediaEvent::MetadataLoaded {
                    width,
                    height,
                    duration,
                } => {
                    info!("Media ready: {}x{}, {:.1}s", width, height, duration);
                    self.playback.duration = duration;
                    self.playback.current_time = 0.0;
                    self.events.push_back(PlayerEvent::MetadataLoaded {
                        width,
                        height,
                        duration,
                    });
                }
            }
        }
    }

    /// Makes the installed program match the desired fragment body. Returns
    /// false when the desired source does not build; the previously installed
    /// program is left in place.
    fn ensure_program(&mut self) -> bool {
        let desired = self.effects.fragment_body().to_string();

        if self.stage.installed_body() == Some(desired.as_str()) {
            return true;
        }
        if self.failed_source.as_deref() == Some(desired.as_str()) {
            return false;
        }

        match build_program(&desired) {
            Ok(program) => {
                debug!("Installed program for effect {:?}", self.effects.active());
                self.stage.install(program);
                self.failed_source = None;
                true
            }
            Err(e) => {
                warn!("Shader rejected: {}", e);
                self.events.push_back(PlayerEvent::ShaderRejected {
                    message: e.to_string(),
                });
                self.failed_source = Some(desired);
                false
            }
        }
    }

    /// Renders the current decoded frame through the effect stage. Returns
    /// false when nothing was drawn.
    fn draw_current_frame(&mut self, time: f32) -> bool {
        if !self.ensure_program() {
            return false;
        }
        let Some(media) = self.media.as_mut() else {
            return false;
        };
        let Some(frame) = media.poll_frame() else {
            return false;
        };
        match self.stage.render(frame, time) {
            Ok(output) => {
                self.last_output = Some(output);
                self.wants_still_frame = false;
                true
            }
            Err(e) => {
                warn!("Frame render failed: {}", e);
                false
            }
        }
    }

    fn render_still(&mut self) {
        if self.media.is_none() {
            self.wants_still_frame = false;
            return;
        }
        let time = self.position_clamped();
        self.draw_current_frame(time);
    }

    fn position_clamped(&self) -> f32 {
        let position = self.media.as_ref().map(|m| m.position()).unwrap_or(0.0);
        let duration = self.playback.duration;
        if duration > 0.0 {
            position.clamp(0.0, duration)
        } else {
            position.max(0.0)
        }
    }
}

impl<M: MediaSource, G: EffectStage, S: TickScheduler> Drop for Player<M, G, S> {
    fn drop(&mut self) {
        // A live token must never outlast the player.
        if let Some(token) = self.pending.take() {
            self.scheduler.cancel(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Effect;
    use crate::media::MediaError;
    use crate::shader::ShaderProgram;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct MediaControl {
        duration: f32,
        position: f32,
        playing: bool,
        has_frame: bool,
        seeks: Vec<f32>,
        pause_calls: u32,
        pending_event: Option<MediaEvent>,
    }

    thread_local! {
        static MEDIA_CONTROL: Rc<RefCell<MediaControl>> =
            Rc::new(RefCell::new(MediaControl::default()));
    }

    fn media_control() -> Rc<RefCell<MediaControl>> {
        MEDIA_CONTROL.with(Rc::clone)
    }

    struct FakeMedia {
        control: Rc<RefCell<MediaControl>>,
        frame: VideoFrame,
    }

    impl MediaSource for FakeMedia {
        fn open(location: &str) -> Result<Self, MediaError> {
            if location.contains("missing") {
                return Err(MediaError::InvalidMetadata(format!(
                    "cannot open {}",
                    location
                )));
            }
            let control = media_control();
            {
                let mut c = control.borrow_mut();
                c.pending_event = Some(MediaEvent::MetadataLoaded {
                    width: 8,
                    height: 8,
                    duration: c.duration,
                });
            }
            Ok(Self {
                control,
                frame: VideoFrame::filled(8, 8, [255, 0, 0, 255]),
            })
        }

        fn duration(&self) -> f32 {
            self.control.borrow().duration
        }

        fn position(&self) -> f32 {
            self.control.borrow().position
        }

        fn seek(&mut self, seconds: f32) {
            let mut c = self.control.borrow_mut();
            c.position = seconds;
            c.seeks.push(seconds);
        }

        fn play(&mut self) {
            self.control.borrow_mut().playing = true;
        }

        fn pause(&mut self) {
            let mut c = self.control.borrow_mut();
            c.playing = false;
            c.pause_calls += 1;
        }

        fn poll_frame(&mut self) -> Option<&VideoFrame> {
            if self.control.borrow().has_frame {
                Some(&self.frame)
            } else {
                None
            }
        }

        fn poll_event(&mut self) -> Option<MediaEvent> {
            self.control.borrow_mut().pending_event.take()
        }
    }

    #[derive(Default)]
    struct StageLog {
        installs: Vec<String>,
        renders: Vec<f32>,
    }

    struct FakeStage {
        installed: Option<ShaderProgram>,
        log: Rc<RefCell<StageLog>>,
    }

    impl FakeStage {
        fn new() -> (Self, Rc<RefCell<StageLog>>) {
            let log = Rc::new(RefCell::new(StageLog::default()));
            let stage = Self {
                installed: Some(build_program("").unwrap()),
                log: Rc::clone(&log),
            };
            (stage, log)
        }
    }

    impl EffectStage for FakeStage {
        fn installed_body(&self) -> Option<&str> {
            self.installed.as_ref().map(|p| p.fragment_body())
        }

        fn install(&mut self, program: ShaderProgram) {
            self.log
                .borrow_mut()
                .installs
                .push(program.fragment_body().to_string());
            self.installed = Some(program);
        }

        fn render(&mut self, frame: &VideoFrame, time: f32) -> anyhow::Result<VideoFrame> {
            self.log.borrow_mut().renders.push(time);
            Ok(frame.clone())
        }
    }

    #[derive(Default)]
    struct SchedulerLog {
        next_token: u64,
        armed: Option<TickToken>,
        schedules: u32,
        cancels: Vec<TickToken>,
    }

    struct FakeScheduler {
        log: Rc<RefCell<SchedulerLog>>,
    }

    impl FakeScheduler {
        fn new() -> (Self, Rc<RefCell<SchedulerLog>>) {
            let log = Rc::new(RefCell::new(SchedulerLog::default()));
            (Self { log: Rc::clone(&log) }, log)
        }
    }

    impl TickScheduler for FakeScheduler {
        fn schedule(&mut self) -> TickToken {
            let mut log = self.log.borrow_mut();
            log.next_token += 1;
            let token = TickToken::new(log.next_token);
            log.armed = Some(token);
            log.schedules += 1;
            token
        }

        fn cancel(&mut self, token: TickToken) {
            let mut log = self.log.borrow_mut();
            log.cancels.push(token);
            if log.armed == Some(token) {
                log.armed = None;
            }
        }

        fn take_fired(&mut self) -> Option<TickToken> {
            self.log.borrow_mut().armed.take()
        }
    }

    type TestPlayer = Player<FakeMedia, FakeStage, FakeScheduler>;

    fn player_with_clip(
        duration: f32,
    ) -> (
        TestPlayer,
        Rc<RefCell<StageLog>>,
        Rc<RefCell<SchedulerLog>>,
        Rc<RefCell<MediaControl>>,
    ) {
        let control = media_control();
        {
            let mut c = control.borrow_mut();
            c.duration = duration;
            c.has_frame = true;
        }
        let (stage, stage_log) = FakeStage::new();
        let (scheduler, scheduler_log) = FakeScheduler::new();
        let mut player = Player::new(stage, scheduler);
        player.load("clip.mp4");
        (player, stage_log, scheduler_log, control)
    }

    #[test]
    fn test_default_playback_state() {
        let state = PlaybackState::default();
        assert!(!state.is_playing);
        assert!(!state.is_muted);
        assert_eq!(state.volume, 1.0);
        assert_eq!(state.effective_volume(), 1.0);
    }

    #[test]
    fn test_load_reports_metadata_and_renders_first_frame() {
        let (mut player, stage_log, _, _) = player_with_clip(10.0);

        assert_eq!(player.phase(), Phase::Ready);
        assert_eq!(player.playback().duration, 10.0);
        assert_eq!(
            player.poll_event(),
            Some(PlayerEvent::MetadataLoaded {
                width: 8,
                height: 8,
                duration: 10.0
            })
        );
        assert_eq!(stage_log.borrow().renders.as_slice(), &[0.0]);
        assert!(player.take_output().is_some());
    }

    #[test]
    fn test_load_failure_stays_idle() {
        let (stage, stage_log) = FakeStage::new();
        let (scheduler, _) = FakeScheduler::new();
        let mut player: TestPlayer = Player::new(stage, scheduler);

        player.load("missing.mp4");

        assert_eq!(player.phase(), Phase::Idle);
        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::LoadFailed { .. })
        ));
        assert!(stage_log.borrow().renders.is_empty());
        assert!(player.take_output().is_none());
    }

    #[test]
    fn test_play_pause_roundtrip() {
        let (mut player, _, scheduler_log, control) = player_with_clip(10.0);

        player.play();
        assert_eq!(player.phase(), Phase::Playing);
        assert!(player.playback().is_playing);
        assert!(control.borrow().playing);
        assert!(scheduler_log.borrow().armed.is_some());

        player.pause();
        assert_eq!(player.phase(), Phase::Paused);
        assert!(!player.playback().is_playing);
        assert!(!control.borrow().playing);
        assert!(scheduler_log.borrow().armed.is_none());
    }

    #[test]
    fn test_play_without_media_is_ignored() {
        let (stage, _) = FakeStage::new();
        let (scheduler, scheduler_log) = FakeScheduler::new();
        let mut player: TestPlayer = Player::new(stage, scheduler);

        player.play();

        assert_eq!(player.phase(), Phase::Idle);
        assert!(!player.playback().is_playing);
        assert_eq!(scheduler_log.borrow().schedules, 0);
    }

    #[test]
    fn test_tick_renders_publishes_and_reschedules() {
        let (mut player, stage_log, scheduler_log, control) = player_with_clip(10.0);
        player.play();

        control.borrow_mut().position = 0.5;
        player.pump();
        assert_eq!(player.playback().current_time, 0.5);
        assert!(scheduler_log.borrow().armed.is_some());

        control.borrow_mut().position = 1.0;
        player.pump();
        assert_eq!(player.playback().current_time, 1.0);

        // Initial still frame at 0.0, then the two ticks
        assert_eq!(stage_log.borrow().renders.as_slice(), &[0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_stale_tick_is_ignored() {
        let (mut player, stage_log, scheduler_log, _) = player_with_clip(10.0);
        player.play();
        let renders_before = stage_log.borrow().renders.len();

        player.tick(TickToken::new(9999));

        assert_eq!(stage_log.borrow().renders.len(), renders_before);
        assert!(scheduler_log.borrow().armed.is_some());
        assert_eq!(player.phase(), Phase::Playing);
    }

    #[test]
    fn test_seek_clamps_and_renders_exactly_once() {
        let (mut player, stage_log, scheduler_log, control) = player_with_clip(10.0);
        let renders_before = stage_log.borrow().renders.len();
        let schedules_before = scheduler_log.borrow().schedules;

        player.seek(25.0);

        assert_eq!(control.borrow().seeks.as_slice(), &[10.0]);
        assert_eq!(player.playback().current_time, 10.0);
        assert_eq!(stage_log.borrow().renders.len(), renders_before + 1);
        assert_eq!(scheduler_log.borrow().schedules, schedules_before);

        player.seek(-3.0);
        assert_eq!(control.borrow().seeks.last(), Some(&0.0));
        assert_eq!(player.playback().current_time, 0.0);
    }

    #[test]
    fn test_seek_while_playing_keeps_cadence_unchanged() {
        let (mut player, stage_log, scheduler_log, control) = player_with_clip(10.0);
        player.play();
        let armed_before = scheduler_log.borrow().armed;
        let schedules_before = scheduler_log.borrow().schedules;
        let renders_before = stage_log.borrow().renders.len();

        player.seek(2.0);

        assert_eq!(control.borrow().position, 2.0);
        assert_eq!(stage_log.borrow().renders.len(), renders_before + 1);
        assert_eq!(scheduler_log.borrow().schedules, schedules_before);
        assert_eq!(scheduler_log.borrow().armed, armed_before);
        assert_eq!(player.phase(), Phase::Playing);
    }

    #[test]
    fn test_playback_runs_to_ended() {
        let (mut player, stage_log, scheduler_log, control) = player_with_clip(10.0);
        player.play();

        control.borrow_mut().position = 9.5;
        player.pump();
        let renders_before_end = stage_log.borrow().renders.len();

        // Wall clock overshoots; the published time must not.
        control.borrow_mut().position = 10.02;
        player.pump();

        assert_eq!(player.phase(), Phase::Ended);
        assert!(!player.playback().is_playing);
        assert_eq!(player.playback().current_time, 10.0);
        assert_eq!(stage_log.borrow().renders.len(), renders_before_end);
        assert!(scheduler_log.borrow().armed.is_none());
        assert_eq!(control.borrow().pause_calls, 1);

        let mut saw_ended = false;
        while let Some(event) = player.poll_event() {
            if event == PlayerEvent::Ended {
                saw_ended = true;
            }
        }
        assert!(saw_ended);

        // Ticks are exhausted; nothing further happens.
        player.pump();
        assert_eq!(stage_log.borrow().renders.len(), renders_before_end);

        // Pausing an ended player changes nothing.
        player.pause();
        assert_eq!(player.phase(), Phase::Ended);
        assert_eq!(control.borrow().pause_calls, 1);
    }

    #[test]
    fn test_play_from_ended_rewinds() {
        let (mut player, _, scheduler_log, control) = player_with_clip(10.0);
        player.play();
        control.borrow_mut().position = 10.5;
        player.pump();
        assert_eq!(player.phase(), Phase::Ended);

        player.play();

        assert_eq!(player.phase(), Phase::Playing);
        assert_eq!(control.borrow().seeks.last(), Some(&0.0));
        assert_eq!(control.borrow().position, 0.0);
        assert_eq!(player.playback().current_time, 0.0);
        assert!(scheduler_log.borrow().armed.is_some());
    }

    #[test]
    fn test_seek_from_ended_returns_to_paused() {
        let (mut player, _, _, control) = player_with_clip(10.0);
        player.play();
        control.borrow_mut().position = 10.5;
        player.pump();
        assert_eq!(player.phase(), Phase::Ended);

        player.seek(4.0);

        assert_eq!(player.phase(), Phase::Paused);
        assert!(!player.playback().is_playing);
        assert_eq!(player.playback().current_time, 4.0);
    }

    #[test]
    fn test_reselecting_builtin_does_not_rebuild() {
        let (mut player, stage_log, _, _) = player_with_clip(10.0);

        player.select_effect(Effect::Grayscale);
        assert_eq!(stage_log.borrow().installs.len(), 1);
        assert!(stage_log.borrow().installs[0].contains("luma"));

        player.select_effect(Effect::Grayscale);
        assert_eq!(stage_log.borrow().installs.len(), 1);
    }

    #[test]
    fn test_custom_shader_lifecycle() {
        let (mut player, stage_log, _, _) = player_with_clip(10.0);
        let tint = "out_color = vec4(color.r, 0.0, 0.0, 1.0);".to_string();

        // Staging alone must not switch the active program.
        player.stage_custom_source(tint.clone());
        assert_eq!(player.active_effect(), Effect::None);
        assert!(stage_log.borrow().installs.is_empty());
        assert_eq!(player.custom_source(), Some(tint.as_str()));

        player.select_effect(Effect::Custom);
        assert_eq!(stage_log.borrow().installs.last(), Some(&tint));

        // Selecting a builtin discards the staged source.
        player.select_effect(Effect::Sepia);
        assert_eq!(player.custom_source(), None);

        // Custom with nothing staged renders as passthrough.
        player.select_effect(Effect::Custom);
        assert_eq!(stage_log.borrow().installs.last(), Some(&String::new()));
    }

    #[test]
    fn test_malformed_custom_latches_and_recovers() {
        let (mut player, stage_log, _, control) = player_with_clip(10.0);
        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::MetadataLoaded { .. })
        ));
        player.select_effect(Effect::Custom);
        player.stage_custom_source("this is not a shader".to_string());

        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::ShaderRejected { .. })
        ));
        assert_eq!(player.active_effect(), Effect::Custom);
        let renders_before = stage_log.borrow().renders.len();

        // Ticks keep running but nothing is drawn, and the failure is not
        // re-reported.
        player.play();
        for step in 1..=3 {
            control.borrow_mut().position = step as f32 * 0.1;
            player.pump();
        }
        assert_eq!(stage_log.borrow().renders.len(), renders_before);
        assert_eq!(player.playback().current_time, 0.3);
        assert!(player.poll_event().is_none());

        // A buildable selection recovers immediately.
        player.select_effect(Effect::Invert);
        control.borrow_mut().position = 0.4;
        player.pump();
        assert!(stage_log.borrow().renders.len() > renders_before);
    }

    #[test]
    fn test_rejection_reported_once_per_distinct_source() {
        let (mut player, stage_log, _, _) = player_with_clip(10.0);
        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::MetadataLoaded { .. })
        ));
        player.select_effect(Effect::Custom);

        player.stage_custom_source("this is not a shader".to_string());
        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::ShaderRejected { .. })
        ));

        // The identical source stays latched and silent.
        player.stage_custom_source("this is not a shader".to_string());
        assert!(player.poll_event().is_none());

        // A different failing source is a fresh diagnostic.
        player.stage_custom_source("still not a shader".to_string());
        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::ShaderRejected { .. })
        ));

        // A buildable source installs and clears the latch, so a later
        // failure is reported again.
        let tint = "out_color = vec4(0.0, color.g, 0.0, 1.0);".to_string();
        player.stage_custom_source(tint.clone());
        assert_eq!(stage_log.borrow().installs.last(), Some(&tint));
        assert!(player.poll_event().is_none());

        player.stage_custom_source("this is not a shader".to_string());
        assert!(matches!(
            player.poll_event(),
            Some(PlayerEvent::ShaderRejected { .. })
        ));
    }

    #[test]
    fn test_volume_and_mute_are_independent() {
        let (mut player, _, _, _) = player_with_clip(10.0);

        player.set_volume(0.4);
        player.set_muted(true);
        assert_eq!(player.playback().effective_volume(), 0.0);
        assert_eq!(player.playback().volume, 0.4);

        player.set_muted(false);
        assert_eq!(player.playback().effective_volume(), 0.4);

        player.set_volume(1.7);
        assert_eq!(player.playback().volume, 1.0);
        player.set_volume(-0.2);
        assert_eq!(player.playback().volume, 0.0);
    }

    #[test]
    fn test_drop_cancels_pending_tick() {
        let (mut player, _, scheduler_log, _) = player_with_clip(10.0);
        player.play();
        assert!(scheduler_log.borrow().armed.is_some());

        drop(player);

        assert!(scheduler_log.borrow().armed.is_none());
        assert!(!scheduler_log.borrow().cancels.is_empty());
    }

    #[test]
    fn test_still_frame_retries_until_decoder_produces() {
        let control = media_control();
        {
            let mut c = control.borrow_mut();
            c.duration = 10.0;
            c.has_frame = false;
        }
        let (stage, stage_log) = FakeStage::new();
        let (scheduler, _) = FakeScheduler::new();
        let mut player: TestPlayer = Player::new(stage, scheduler);
        player.load("clip.mp4");

        assert!(stage_log.borrow().renders.is_empty());
        player.pump();
        assert!(stage_log.borrow().renders.is_empty());

        control.borrow_mut().has_frame = true;
        player.pump();
        assert_eq!(stage_log.borrow().renders.as_slice(), &[0.0]);
        assert!(player.take_output().is_some());

        // Owed frame delivered; no duplicate still renders afterwards.
        player.pump();
        assert_eq!(stage_log.borrow().renders.len(), 1);
    }
}
