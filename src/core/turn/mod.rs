//! Caller turn tracking
//!
//! Silence-based voice activity detection for phone audio. The telephony
//! side suppresses comfort noise, so the absence of media frames is a
//! reliable silence signal; no energy threshold is needed. The controller
//! tracks whether the caller currently holds the floor and emits turn
//! boundaries the orchestrator converts into agent-side controls.
//!
//! Timing is deadline-based: the owner calls [`TurnController::on_tick`]
//! from its poll loop and the controller compares stored deadlines
//! against the supplied instant. That keeps every timer a named,
//! cancellable field and makes the whole state machine testable with
//! synthetic clocks.

use std::time::{Duration, Instant};

/// Tunable thresholds for turn detection.
#[derive(Debug, Clone, Copy)]
pub struct TurnConfig {
    /// Gap after the last caller frame that ends a turn.
    pub silence: Duration,
    /// Maximum length of a single caller utterance.
    pub max_utterance: Duration,
    /// Quiet period required after agent output (or a previous turn)
    /// before the caller can take the floor again.
    pub cooldown: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence: Duration::from_millis(800),
            max_utterance: Duration::from_millis(3000),
            cooldown: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    Speaking,
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnEnd {
    /// No caller frame arrived within the silence window.
    Silence,
    /// The utterance hit the hard cap.
    HardCap,
}

#[derive(Debug)]
pub struct TurnController {
    cfg: TurnConfig,
    state: TurnState,
    last_agent_output: Option<Instant>,
    last_turn_end: Option<Instant>,
    agent_has_spoken: bool,
    silence_deadline: Option<Instant>,
    hard_cap_deadline: Option<Instant>,
}

impl TurnController {
    pub fn new(cfg: TurnConfig) -> Self {
        Self {
            cfg,
            state: TurnState::Idle,
            last_agent_output: None,
            last_turn_end: None,
            agent_has_spoken: false,
            silence_deadline: None,
            hard_cap_deadline: None,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn agent_has_spoken(&self) -> bool {
        self.agent_has_spoken
    }

    /// Whether the agent produced output within the cooldown window,
    /// i.e. is still considered to be mid-utterance.
    pub fn agent_active(&self, now: Instant) -> bool {
        self.last_agent_output
            .is_some_and(|t| now.duration_since(t) < self.cfg.cooldown)
    }

    /// Register one inbound caller frame. Returns `true` when this frame
    /// opened a new turn.
    ///
    /// A turn opens from `Idle` once the cooldown has elapsed since both
    /// the last agent output and the last turn exit; an AI socket that is
    /// not yet open bypasses the cooldown entirely since nothing is being
    /// spoken over.
    pub fn on_caller_frame(&mut self, now: Instant, ai_open: bool) -> bool {
        match self.state {
            TurnState::Speaking => {
                self.silence_deadline = Some(now + self.cfg.silence);
                false
            }
            TurnState::Idle => {
                if ai_open && !self.cooldown_elapsed(now) {
                    return false;
                }
                self.state = TurnState::Speaking;
                self.silence_deadline = Some(now + self.cfg.silence);
                self.hard_cap_deadline = Some(now + self.cfg.max_utterance);
                tracing::debug!("caller turn started");
                true
            }
        }
    }

    /// Register agent output. Any open caller turn is abandoned without a
    /// turn-end event: the agent has taken the floor, so no
    /// `user_audio_end` should be synthesized.
    ///
    /// Returns `true` when an open turn was reset.
    pub fn on_agent_audio(&mut self, now: Instant) -> bool {
        self.last_agent_output = Some(now);
        self.agent_has_spoken = true;
        if self.state == TurnState::Speaking {
            self.reset_to_idle(None);
            tracing::debug!("caller turn reset by agent audio");
            return true;
        }
        false
    }

    /// Advance deadlines. Returns a turn-end reason at most once per turn.
    pub fn on_tick(&mut self, now: Instant) -> Option<TurnEnd> {
        if self.state != TurnState::Speaking {
            return None;
        }
        if self.hard_cap_deadline.is_some_and(|d| now >= d) {
            self.reset_to_idle(Some(now));
            tracing::debug!("caller turn ended (hard cap)");
            return Some(TurnEnd::HardCap);
        }
        if self.silence_deadline.is_some_and(|d| now >= d) {
            self.reset_to_idle(Some(now));
            tracing::debug!("caller turn ended (silence)");
            return Some(TurnEnd::Silence);
        }
        None
    }

    /// Close any open turn immediately (telephony `stop`). Returns `true`
    /// if a turn was open.
    pub fn force_end(&mut self, now: Instant) -> bool {
        if self.state == TurnState::Speaking {
            self.reset_to_idle(Some(now));
            return true;
        }
        false
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        let reference = match (self.last_agent_output, self.last_turn_end) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        match reference {
            // Fresh call: the caller may open the first turn immediately.
            None => true,
            Some(t) => now.duration_since(t) >= self.cfg.cooldown,
        }
    }

    fn reset_to_idle(&mut self, ended_at: Option<Instant>) {
        self.state = TurnState::Idle;
        self.silence_deadline = None;
        self.hard_cap_deadline = None;
        if ended_at.is_some() {
            self.last_turn_end = ended_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> TurnController {
        TurnController::new(TurnConfig::default())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn first_frame_opens_turn_immediately() {
        let mut tc = controller();
        let t0 = Instant::now();
        assert!(tc.on_caller_frame(t0, true));
        assert_eq!(tc.state(), TurnState::Speaking);
    }

    #[test]
    fn silence_ends_turn_exactly_once() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_caller_frame(t0, true);
        assert_eq!(tc.on_tick(t0 + ms(799)), None);
        assert_eq!(tc.on_tick(t0 + ms(800)), Some(TurnEnd::Silence));
        assert_eq!(tc.on_tick(t0 + ms(850)), None);
    }

    #[test]
    fn frames_reset_the_silence_window() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_caller_frame(t0, true);
        tc.on_caller_frame(t0 + ms(700), true);
        assert_eq!(tc.on_tick(t0 + ms(1400)), None);
        assert_eq!(tc.on_tick(t0 + ms(1500)), Some(TurnEnd::Silence));
    }

    #[test]
    fn hard_cap_wins_over_pending_silence() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_caller_frame(t0, true);
        // Keep talking so the silence window never elapses.
        for i in 1..=150 {
            tc.on_caller_frame(t0 + ms(i * 20), true);
        }
        assert_eq!(tc.on_tick(t0 + ms(3000)), Some(TurnEnd::HardCap));
        // Only one exit: the pending silence deadline is gone.
        assert_eq!(tc.on_tick(t0 + ms(3900)), None);
    }

    #[test]
    fn reentry_after_hard_cap_waits_for_cooldown() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_caller_frame(t0, true);
        assert_eq!(tc.on_tick(t0 + ms(3000)), Some(TurnEnd::HardCap));
        // Frames right after the cap still buffer but do not reopen.
        assert!(!tc.on_caller_frame(t0 + ms(3100), true));
        assert_eq!(tc.state(), TurnState::Idle);
        // Once the cooldown has passed, the next frame opens a turn.
        assert!(tc.on_caller_frame(t0 + ms(3600), true));
    }

    #[test]
    fn agent_audio_cancels_open_turn_without_end_event() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_caller_frame(t0, true);
        assert!(tc.on_agent_audio(t0 + ms(100)));
        assert_eq!(tc.state(), TurnState::Idle);
        // No synthesized end after the reset.
        assert_eq!(tc.on_tick(t0 + ms(900)), None);
    }

    #[test]
    fn caller_cannot_take_floor_while_agent_speaks() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_agent_audio(t0);
        assert!(!tc.on_caller_frame(t0 + ms(200), true));
        assert!(tc.agent_active(t0 + ms(200)));
        // After the cooldown the floor is free again.
        assert!(tc.on_caller_frame(t0 + ms(600), true));
    }

    #[test]
    fn closed_ai_socket_bypasses_cooldown() {
        let mut tc = controller();
        let t0 = Instant::now();
        tc.on_agent_audio(t0);
        assert!(tc.on_caller_frame(t0 + ms(100), false));
    }

    #[test]
    fn force_end_reports_open_turn() {
        let mut tc = controller();
        let t0 = Instant::now();
        assert!(!tc.force_end(t0));
        tc.on_caller_frame(t0, true);
        assert!(tc.force_end(t0 + ms(100)));
        assert!(!tc.force_end(t0 + ms(100)));
    }
}
