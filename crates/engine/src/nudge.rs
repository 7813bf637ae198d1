//! Idle nudge scheduling
//!
//! When the assistant ends a batch with a nudge-eligible message (product
//! recommendations by default) and the shopper then goes quiet, the widget
//! asks the server to compose a proactive follow-up. This module is the pure
//! state machine deciding when that request fires; timers and the outgoing
//! event live with the engine loop.
//!
//! Phases:
//!   idle -> settling -> armed -> (fired | held | cancelled)
//!
//! Settling absorbs the widget's own scroll-into-view animation before the
//! scroll baseline is captured. Held means the fire attempt found the input
//! focused; the batch stays armed and resumes its idle wait when focus
//! leaves.

use yuume_protocol::{Message, MessageKind, Sender};

use crate::config::NudgeConfig;

/// Where the scheduler is relative to the current message batch
#[derive(Debug, Clone, PartialEq)]
pub enum NudgePhase {
    Idle,
    Settling {
        batch_id: String,
    },
    Armed {
        batch_id: String,
        scroll_baseline: f64,
    },
    Held {
        batch_id: String,
        scroll_baseline: f64,
    },
}

impl NudgePhase {
    fn batch_id(&self) -> Option<&str> {
        match self {
            NudgePhase::Idle => None,
            NudgePhase::Settling { batch_id }
            | NudgePhase::Armed { batch_id, .. }
            | NudgePhase::Held { batch_id, .. } => Some(batch_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NudgeState {
    pub phase: NudgePhase,
    pub fired_count: u32,
    /// Batch that already fired or was dismissed; never re-armed
    pub spent_batch: Option<String>,
    /// Most recent scroll offset reported by the host
    pub last_scroll: f64,
}

impl Default for NudgeState {
    fn default() -> Self {
        NudgeState {
            phase: NudgePhase::Idle,
            fired_count: 0,
            spent_batch: None,
            last_scroll: 0.0,
        }
    }
}

impl NudgeState {
    /// Forget everything tied to the old session. The physical scroll
    /// position is a property of the page, not the session, so it stays.
    pub fn reset(&mut self) {
        let last_scroll = self.last_scroll;
        *self = NudgeState {
            last_scroll,
            ..NudgeState::default()
        };
    }
}

/// Timer identities the engine loop schedules on our behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NudgeTimerKind {
    Settle,
    Fire,
}

/// Everything outside the scheduler that gates arming and firing
#[derive(Debug, Clone, Copy)]
pub struct NudgeGates<'a> {
    pub chat_open: bool,
    pub channel_online: bool,
    pub has_session: bool,
    pub input_focused: bool,
    pub tail: Option<&'a Message>,
}

/// What the engine loop must do for the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum NudgeEffect {
    StartSettleTimer { batch_id: String },
    StartFireTimer { batch_id: String },
    CancelTimers,
    Fire { trigger_message_id: String },
}

/// Re-check the scheduler against the world after any state change.
///
/// Cancels when the armed batch is no longer the qualifying tail, resumes a
/// held batch once focus leaves the input, and arms a fresh qualifying batch.
pub fn evaluate(
    state: &mut NudgeState,
    gates: &NudgeGates<'_>,
    config: &NudgeConfig,
) -> Vec<NudgeEffect> {
    let mut effects = Vec::new();

    if let Some(batch_id) = state.phase.batch_id().map(str::to_string) {
        let still_tail = gates
            .tail
            .map(|tail| tail.id == batch_id)
            .unwrap_or(false);
        if !still_tail || !gates.chat_open {
            state.spent_batch = Some(batch_id);
            state.phase = NudgePhase::Idle;
            effects.push(NudgeEffect::CancelTimers);
        }
    }

    if let NudgePhase::Held {
        batch_id,
        scroll_baseline,
    } = &state.phase
    {
        if !gates.input_focused {
            let batch_id = batch_id.clone();
            let scroll_baseline = *scroll_baseline;
            state.phase = NudgePhase::Armed {
                batch_id: batch_id.clone(),
                scroll_baseline,
            };
            effects.push(NudgeEffect::StartFireTimer { batch_id });
        }
    }

    if state.phase == NudgePhase::Idle {
        if let Some(batch_id) = qualifying_batch(state, gates, config) {
            state.phase = NudgePhase::Settling {
                batch_id: batch_id.clone(),
            };
            effects.push(NudgeEffect::StartSettleTimer { batch_id });
        }
    }

    effects
}

/// A settle or fire timer elapsed. Timers carry the batch they were armed
/// for; anything stale is ignored.
pub fn on_timer(
    state: &mut NudgeState,
    kind: NudgeTimerKind,
    batch_id: &str,
    gates: &NudgeGates<'_>,
) -> Option<NudgeEffect> {
    match (kind, state.phase.clone()) {
        (NudgeTimerKind::Settle, NudgePhase::Settling { batch_id: armed }) if armed == batch_id => {
            state.phase = NudgePhase::Armed {
                batch_id: armed.clone(),
                scroll_baseline: state.last_scroll,
            };
            Some(NudgeEffect::StartFireTimer { batch_id: armed })
        }
        (NudgeTimerKind::Fire, NudgePhase::Armed {
            batch_id: armed,
            scroll_baseline,
        }) if armed == batch_id => {
            if gates.input_focused {
                // The shopper is typing; keep the batch armed and wait for
                // focus to leave before restarting the idle wait.
                state.phase = NudgePhase::Held {
                    batch_id: armed,
                    scroll_baseline,
                };
                return None;
            }
            state.fired_count += 1;
            state.spent_batch = Some(armed.clone());
            state.phase = NudgePhase::Idle;
            Some(NudgeEffect::Fire {
                trigger_message_id: armed,
            })
        }
        _ => None,
    }
}

/// Host reported a scroll offset. Movement beyond the threshold relative to
/// the armed baseline means the shopper is browsing, not stalled.
pub fn on_scroll(
    state: &mut NudgeState,
    offset: f64,
    config: &NudgeConfig,
) -> Option<NudgeEffect> {
    state.last_scroll = offset;

    let (batch_id, baseline) = match &state.phase {
        NudgePhase::Armed {
            batch_id,
            scroll_baseline,
        }
        | NudgePhase::Held {
            batch_id,
            scroll_baseline,
        } => (batch_id.clone(), *scroll_baseline),
        _ => return None,
    };

    if (offset - baseline).abs() < config.scroll_threshold_px {
        return None;
    }

    state.spent_batch = Some(batch_id);
    state.phase = NudgePhase::Idle;
    Some(NudgeEffect::CancelTimers)
}

fn qualifying_batch(
    state: &NudgeState,
    gates: &NudgeGates<'_>,
    config: &NudgeConfig,
) -> Option<String> {
    if !gates.chat_open || !gates.channel_online || !gates.has_session {
        return None;
    }
    if state.fired_count >= config.max_per_session {
        return None;
    }

    let tail = gates.tail?;
    if tail.sender != Sender::Assistant {
        return None;
    }
    if tail.hidden || tail.no_nudge {
        return None;
    }
    if matches!(tail.kind, MessageKind::Nudge { .. }) {
        return None;
    }
    if state.spent_batch.as_deref() == Some(tail.id.as_str()) {
        return None;
    }
    if !matches_trigger(tail, config) {
        return None;
    }

    Some(tail.id.clone())
}

fn matches_trigger(message: &Message, config: &NudgeConfig) -> bool {
    if message.kind.tag() != config.trigger {
        return false;
    }
    match &message.kind {
        // The default trigger only counts when there is actually something
        // on screen to come back to
        MessageKind::ProductCards { products, .. } => !products.is_empty(),
        _ => true,
    }
}
