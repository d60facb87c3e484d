//! Duplex speech state machine
//!
//! Models the conversation as idle / listening / speaking /
//! interrupted and translates voice-activity events into the
//! side-effecting actions the session executes. All transitions and
//! observers are atomic under one lock; the controller itself never
//! performs side effects.

use parking_lot::Mutex;
use std::time::Instant;

use voicehub_core::BargeInPolicy;

/// Conversation state of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Idle,
    Listening,
    Speaking,
    Interrupted,
}

/// Side effects the session must execute, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechAction {
    StopTts,
    CancelAgent,
    PauseOutput,
    ResumeOutput,
    EndUtterance,
}

/// Why a transition emitted actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionReason {
    BargeIn,
    Backpressure,
    SpeechEnd,
}

impl ActionReason {
    /// Wire name used in cancellations and interrupt events.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionReason::BargeIn => "barge_in",
            ActionReason::Backpressure => "backpressure",
            ActionReason::SpeechEnd => "speech_end",
        }
    }
}

/// Outcome of one controller event.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: SpeechState,
    pub to: SpeechState,
    pub actions: Vec<SpeechAction>,
    pub reason: Option<ActionReason>,
}

impl Transition {
    fn unchanged(state: SpeechState) -> Self {
        Self {
            from: state,
            to: state,
            actions: Vec::new(),
            reason: None,
        }
    }

    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// The barge-in interruption set, in its required order.
const INTERRUPT_ACTIONS: [SpeechAction; 3] = [
    SpeechAction::StopTts,
    SpeechAction::CancelAgent,
    SpeechAction::PauseOutput,
];

struct ControllerState {
    state: SpeechState,
    last_speech: Option<Instant>,
    tts_active: bool,
}

/// The duplex conversation state machine.
pub struct SpeechController {
    policy: BargeInPolicy,
    inner: Mutex<ControllerState>,
}

impl SpeechController {
    pub fn new(policy: BargeInPolicy) -> Self {
        Self {
            policy: policy.normalized(),
            inner: Mutex::new(ControllerState {
                state: SpeechState::Idle,
                last_speech: None,
                tts_active: false,
            }),
        }
    }

    pub fn state(&self) -> SpeechState {
        self.inner.lock().state
    }

    pub fn policy(&self) -> &BargeInPolicy {
        &self.policy
    }

    /// Synthesis began playing.
    pub fn on_tts_audio_start(&self) -> Transition {
        let mut inner = self.inner.lock();
        let from = inner.state;
        inner.state = SpeechState::Speaking;
        inner.tts_active = true;
        Transition {
            from,
            to: SpeechState::Speaking,
            actions: Vec::new(),
            reason: None,
        }
    }

    /// Synthesis finished or was torn down.
    pub fn on_tts_audio_end(&self) -> Transition {
        let mut inner = self.inner.lock();
        inner.tts_active = false;
        match inner.state {
            SpeechState::Speaking | SpeechState::Interrupted => {
                let from = inner.state;
                inner.state = SpeechState::Idle;
                Transition {
                    from,
                    to: SpeechState::Idle,
                    actions: Vec::new(),
                    reason: None,
                }
            },
            state => Transition::unchanged(state),
        }
    }

    /// Voice activity began.
    pub fn on_user_speech_start(&self, now: Instant) -> Transition {
        let mut inner = self.inner.lock();
        inner.last_speech = Some(now);

        match inner.state {
            SpeechState::Idle => {
                inner.state = SpeechState::Listening;
                Transition {
                    from: SpeechState::Idle,
                    to: SpeechState::Listening,
                    actions: Vec::new(),
                    reason: None,
                }
            },
            SpeechState::Speaking if self.policy.allow_while_speaking => {
                inner.state = SpeechState::Interrupted;
                Transition {
                    from: SpeechState::Speaking,
                    to: SpeechState::Interrupted,
                    actions: INTERRUPT_ACTIONS.to_vec(),
                    reason: Some(ActionReason::BargeIn),
                }
            },
            state => Transition::unchanged(state),
        }
    }

    /// Voice activity stopped.
    ///
    /// In `listening` this yields the end-of-utterance action pair
    /// even when no audio was observed; the resume is intentional
    /// (see `should_end_by_silence` for the actual debounce).
    pub fn on_user_speech_end(&self, now: Instant) -> Transition {
        let mut inner = self.inner.lock();
        inner.last_speech = Some(now);

        match inner.state {
            SpeechState::Listening => Transition {
                from: SpeechState::Listening,
                to: SpeechState::Listening,
                actions: vec![SpeechAction::EndUtterance, SpeechAction::ResumeOutput],
                reason: Some(ActionReason::SpeechEnd),
            },
            state => Transition::unchanged(state),
        }
    }

    /// Transport backpressure while output is active.
    pub fn on_backpressure(&self) -> Transition {
        let mut inner = self.inner.lock();
        if !inner.tts_active {
            return Transition::unchanged(inner.state);
        }

        let from = inner.state;
        inner.state = SpeechState::Interrupted;
        Transition {
            from,
            to: SpeechState::Interrupted,
            actions: INTERRUPT_ACTIONS.to_vec(),
            reason: Some(ActionReason::Backpressure),
        }
    }

    /// Debounced silence check: true exactly when a listening turn
    /// has been silent for at least the policy minimum, in which
    /// case the state drops to idle.
    pub fn should_end_by_silence(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != SpeechState::Listening {
            return false;
        }
        let Some(last_speech) = inner.last_speech else {
            return false;
        };
        if now.duration_since(last_speech) < self.policy.min_silence_for_end() {
            return false;
        }
        inner.state = SpeechState::Idle;
        true
    }
}
