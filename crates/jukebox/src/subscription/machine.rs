//! Pure transition logic of a subscription.
//!
//! `Machine::handle` consumes one input and returns the side effects the
//! worker must perform. Nothing here touches the player, the transport or the
//! fetch processes directly.

use std::sync::Arc;

use jukebox_types::{TrackSummary, TransportState};

use crate::error::{MaterializeError, PlayerError};
use crate::queue::Queue;
use crate::resource::AudioResource;
use crate::track::Track;
use crate::voice::{PlayerState, PlayerTransition};

#[derive(Debug, Default)]
pub(crate) enum Phase {
    /// Nothing attached; the queue is empty.
    #[default]
    Idle,
    /// A fetch for `track` is in flight.
    Materializing { track: Arc<Track>, attempt: u64 },
    /// `track` was handed to the player.
    Active(Arc<Track>),
    /// Skip requested; waiting for the player to report idle.
    Stopping,
}

#[derive(Debug)]
pub(crate) enum Input {
    Player(PlayerTransition),
    /// The player was found idle without a matching transition: a stop that
    /// had nothing to stop, or transitions lost to a lagging receiver.
    PlayerIdle,
    Transport(TransportState),
    Materialized {
        attempt: u64,
        result: Result<AudioResource, MaterializeError>,
    },
    PlayRejected {
        track: Arc<Track>,
        error: PlayerError,
    },
    Enqueue(Vec<Arc<Track>>),
    Skip,
    SetRepeat(bool),
    Shuffle,
    Leave,
}

#[derive(Debug)]
pub(crate) enum Effect {
    Materialize { track: Arc<Track>, attempt: u64 },
    CancelMaterialize,
    Play(AudioResource),
    StopPlayer,
    Started(Arc<Track>),
    Finished(Arc<Track>),
    Failed(Arc<Track>, MaterializeError),
    QueueChanged(usize),
    Teardown,
}

#[derive(Debug, Default)]
pub(crate) struct Machine {
    queue: Queue,
    phase: Phase,
    attempts: u64,
    closed: bool,
}

impl Machine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn queue(&self) -> &Queue {
        &self.queue
    }

    /// Track being materialized or played, if any.
    pub(crate) fn current(&self) -> Option<&Arc<Track>> {
        match &self.phase {
            Phase::Materializing { track, .. } | Phase::Active(track) => Some(track),
            Phase::Idle | Phase::Stopping => None,
        }
    }

    pub(crate) fn current_summary(&self) -> Option<TrackSummary> {
        self.current().map(|track| track.summary())
    }

    pub(crate) fn handle(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.closed {
            return effects;
        }
        match input {
            Input::Player(transition) => self.on_player(transition, &mut effects),
            Input::PlayerIdle => self.on_player_idle(&mut effects),
            Input::Transport(state) => {
                if state == TransportState::Destroyed {
                    self.teardown(&mut effects);
                }
            }
            Input::Materialized { attempt, result } => {
                self.on_materialized(attempt, result, &mut effects)
            }
            Input::PlayRejected { track, error } => {
                let pending = match &self.phase {
                    Phase::Active(active) => Arc::ptr_eq(active, &track),
                    // Skipped before the rejection arrived; the player never went busy.
                    Phase::Stopping => true,
                    _ => false,
                };
                if pending {
                    effects.push(Effect::Failed(track, MaterializeError::Rejected(error)));
                    self.advance(None, &mut effects);
                }
            }
            Input::Enqueue(tracks) => {
                if tracks.is_empty() {
                    return effects;
                }
                self.queue.enqueue_many(tracks);
                effects.push(Effect::QueueChanged(self.queue.len()));
                if matches!(self.phase, Phase::Idle) {
                    self.advance(None, &mut effects);
                }
            }
            Input::Skip => self.skip(&mut effects),
            Input::SetRepeat(repeating) => {
                if let Some(track) = self.current() {
                    track.set_repeating(repeating);
                }
            }
            Input::Shuffle => {
                self.queue.shuffle();
                effects.push(Effect::QueueChanged(self.queue.len()));
            }
            Input::Leave => self.teardown(&mut effects),
        }
        effects
    }

    fn on_player(&mut self, transition: PlayerTransition, effects: &mut Vec<Effect>) {
        let PlayerTransition { from, to } = transition;
        match to {
            PlayerState::Playing(track) => effects.push(Effect::Started(track)),
            PlayerState::Idle => {
                let Some(previous) = from.track() else {
                    return;
                };
                effects.push(Effect::Finished(Arc::clone(previous)));
                match std::mem::take(&mut self.phase) {
                    Phase::Active(track) if Arc::ptr_eq(&track, previous) => {
                        let replay = track.is_repeating().then_some(track);
                        self.advance(replay, effects);
                    }
                    Phase::Stopping => self.advance(None, effects),
                    other => self.phase = other,
                }
            }
            PlayerState::Buffering(_) | PlayerState::Paused(_) => {}
        }
    }

    fn on_player_idle(&mut self, effects: &mut Vec<Effect>) {
        match std::mem::take(&mut self.phase) {
            Phase::Active(track) => {
                effects.push(Effect::Finished(Arc::clone(&track)));
                let replay = track.is_repeating().then_some(track);
                self.advance(replay, effects);
            }
            Phase::Stopping => self.advance(None, effects),
            other => self.phase = other,
        }
    }

    fn on_materialized(
        &mut self,
        attempt: u64,
        result: Result<AudioResource, MaterializeError>,
        effects: &mut Vec<Effect>,
    ) {
        let track = match &self.phase {
            Phase::Materializing {
                track,
                attempt: expected,
            } if *expected == attempt => Arc::clone(track),
            // Stale result of a cancelled fetch; dropping it kills the process.
            _ => return,
        };
        match result {
            Ok(resource) => {
                self.phase = Phase::Active(track);
                effects.push(Effect::Play(resource));
            }
            Err(err) => {
                effects.push(Effect::Failed(track, err));
                self.advance(None, effects);
            }
        }
    }

    fn skip(&mut self, effects: &mut Vec<Effect>) {
        match std::mem::take(&mut self.phase) {
            Phase::Active(track) => {
                // A skipped track must not replay, and its finish hook still runs.
                track.set_repeating(false);
                self.phase = Phase::Stopping;
                effects.push(Effect::StopPlayer);
            }
            Phase::Materializing { .. } => {
                effects.push(Effect::CancelMaterialize);
                self.advance(None, effects);
            }
            other => self.phase = other,
        }
    }

    /// Pick the next track (or replay `replay`) and request its materialization.
    fn advance(&mut self, replay: Option<Arc<Track>>, effects: &mut Vec<Effect>) {
        let next = match replay {
            Some(track) => Some(track),
            None => {
                let next = self.queue.pop_next();
                if next.is_some() {
                    effects.push(Effect::QueueChanged(self.queue.len()));
                }
                next
            }
        };
        match next {
            Some(track) => {
                self.attempts += 1;
                self.phase = Phase::Materializing {
                    track: Arc::clone(&track),
                    attempt: self.attempts,
                };
                effects.push(Effect::Materialize {
                    track,
                    attempt: self.attempts,
                });
            }
            None => self.phase = Phase::Idle,
        }
    }

    /// Drop everything without running any hook.
    fn teardown(&mut self, effects: &mut Vec<Effect>) {
        self.closed = true;
        match std::mem::take(&mut self.phase) {
            Phase::Materializing { .. } => effects.push(Effect::CancelMaterialize),
            Phase::Active(_) | Phase::Stopping => effects.push(Effect::StopPlayer),
            Phase::Idle => {}
        }
        if self.queue.clear() > 0 {
            effects.push(Effect::QueueChanged(0));
        }
        effects.push(Effect::Teardown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{resource_for, track};

    fn transition(from: PlayerState, to: PlayerState) -> Input {
        Input::Player(PlayerTransition { from, to })
    }

    fn materialize_target(effects: &[Effect]) -> Option<(String, u64)> {
        effects.iter().find_map(|effect| match effect {
            Effect::Materialize { track, attempt } => Some((track.title().to_string(), *attempt)),
            _ => None,
        })
    }

    /// Enqueue `a` into an idle machine and play it to `Playing`.
    fn playing(machine: &mut Machine, a: &Arc<Track>) {
        let effects = machine.handle(Input::Enqueue(vec![Arc::clone(a)]));
        let (_, attempt) = materialize_target(&effects).unwrap();
        let effects = machine.handle(Input::Materialized {
            attempt,
            result: Ok(resource_for(a)),
        });
        assert!(matches!(effects.as_slice(), [Effect::Play(_)]));
        machine.handle(transition(
            PlayerState::Idle,
            PlayerState::Buffering(Arc::clone(a)),
        ));
        let effects = machine.handle(transition(
            PlayerState::Buffering(Arc::clone(a)),
            PlayerState::Playing(Arc::clone(a)),
        ));
        assert!(matches!(effects.as_slice(), [Effect::Started(t)] if Arc::ptr_eq(t, a)));
    }

    #[test]
    fn enqueue_into_idle_starts_materializing() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        let effects = machine.handle(Input::Enqueue(vec![Arc::clone(&a)]));
        assert_eq!(materialize_target(&effects), Some(("a".to_string(), 1)));
        assert!(machine.queue().is_empty());
        assert!(Arc::ptr_eq(machine.current().unwrap(), &a));
    }

    #[test]
    fn enqueue_while_busy_only_queues() {
        let mut machine = Machine::new();
        machine.handle(Input::Enqueue(vec![Arc::new(track("a"))]));
        let effects = machine.handle(Input::Enqueue(vec![Arc::new(track("b"))]));
        assert!(materialize_target(&effects).is_none());
        assert_eq!(machine.queue().len(), 1);
    }

    #[test]
    fn idle_finishes_previous_then_advances() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        playing(&mut machine, &a);
        machine.handle(Input::Enqueue(vec![Arc::new(track("b"))]));

        let effects = machine.handle(transition(
            PlayerState::Playing(Arc::clone(&a)),
            PlayerState::Idle,
        ));
        assert!(matches!(&effects[0], Effect::Finished(t) if Arc::ptr_eq(t, &a)));
        assert_eq!(materialize_target(&effects), Some(("b".to_string(), 2)));
    }

    #[test]
    fn redundant_idle_is_ignored() {
        let mut machine = Machine::new();
        let effects = machine.handle(transition(PlayerState::Idle, PlayerState::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn repeating_track_is_replayed_without_touching_queue() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        playing(&mut machine, &a);
        machine.handle(Input::Enqueue(vec![Arc::new(track("b"))]));
        machine.handle(Input::SetRepeat(true));

        let effects = machine.handle(transition(
            PlayerState::Playing(Arc::clone(&a)),
            PlayerState::Idle,
        ));
        assert_eq!(materialize_target(&effects), Some(("a".to_string(), 2)));
        assert_eq!(machine.queue().len(), 1);
    }

    #[test]
    fn failed_materialization_reports_and_moves_on() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        let b = Arc::new(track("b"));
        machine.handle(Input::Enqueue(vec![Arc::clone(&a), Arc::clone(&b)]));
        let effects = machine.handle(Input::Materialized {
            attempt: 1,
            result: Err(MaterializeError::EmptyStream),
        });
        assert!(matches!(&effects[0], Effect::Failed(t, MaterializeError::EmptyStream) if Arc::ptr_eq(t, &a)));
        assert_eq!(materialize_target(&effects), Some(("b".to_string(), 2)));
    }

    #[test]
    fn failed_repeating_track_is_not_retried() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        machine.handle(Input::Enqueue(vec![Arc::clone(&a)]));
        machine.handle(Input::SetRepeat(true));
        let effects = machine.handle(Input::Materialized {
            attempt: 1,
            result: Err(MaterializeError::EmptyStream),
        });
        assert!(materialize_target(&effects).is_none());
        assert!(machine.current().is_none());
    }

    #[test]
    fn stale_materialization_is_dropped() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        machine.handle(Input::Enqueue(vec![Arc::clone(&a), Arc::new(track("b"))]));
        machine.handle(Input::Skip);
        let effects = machine.handle(Input::Materialized {
            attempt: 1,
            result: Ok(resource_for(&a)),
        });
        assert!(effects.is_empty());
        assert_eq!(machine.current().map(|t| t.title()), Some("b"));
    }

    #[test]
    fn skip_while_materializing_cancels_and_advances() {
        let mut machine = Machine::new();
        machine.handle(Input::Enqueue(vec![
            Arc::new(track("a")),
            Arc::new(track("b")),
        ]));
        let effects = machine.handle(Input::Skip);
        assert!(matches!(effects[0], Effect::CancelMaterialize));
        assert_eq!(materialize_target(&effects), Some(("b".to_string(), 2)));
    }

    #[test]
    fn skip_active_clears_repeat_and_stops() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        playing(&mut machine, &a);
        machine.handle(Input::SetRepeat(true));
        let effects = machine.handle(Input::Skip);
        assert!(matches!(effects.as_slice(), [Effect::StopPlayer]));
        assert!(!a.is_repeating());
        assert!(machine.current().is_none());

        let effects = machine.handle(transition(
            PlayerState::Playing(Arc::clone(&a)),
            PlayerState::Idle,
        ));
        assert!(matches!(effects.as_slice(), [Effect::Finished(_)]));
        assert!(matches!(machine.phase, Phase::Idle));
    }

    #[test]
    fn skip_when_idle_does_nothing() {
        let mut machine = Machine::new();
        assert!(machine.handle(Input::Skip).is_empty());
    }

    #[test]
    fn rejected_play_is_reported_as_failure() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        machine.handle(Input::Enqueue(vec![Arc::clone(&a)]));
        machine.handle(Input::Materialized {
            attempt: 1,
            result: Ok(resource_for(&a)),
        });
        let effects = machine.handle(Input::PlayRejected {
            track: Arc::clone(&a),
            error: PlayerError::Offline,
        });
        assert!(matches!(
            &effects[0],
            Effect::Failed(_, MaterializeError::Rejected(PlayerError::Offline))
        ));
        assert!(matches!(machine.phase, Phase::Idle));
    }

    #[test]
    fn rejection_after_skip_still_advances() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        let b = Arc::new(track("b"));
        machine.handle(Input::Enqueue(vec![Arc::clone(&a)]));
        machine.handle(Input::Materialized {
            attempt: 1,
            result: Ok(resource_for(&a)),
        });

        // The skip is handled before the player's rejection is.
        let effects = machine.handle(Input::Skip);
        assert!(matches!(effects.as_slice(), [Effect::StopPlayer]));
        let effects = machine.handle(Input::PlayRejected {
            track: Arc::clone(&a),
            error: PlayerError::Offline,
        });
        assert!(matches!(&effects[0], Effect::Failed(t, _) if Arc::ptr_eq(t, &a)));
        assert!(matches!(machine.phase, Phase::Idle));

        let effects = machine.handle(Input::Enqueue(vec![Arc::clone(&b)]));
        assert_eq!(materialize_target(&effects), Some(("b".to_string(), 2)));
    }

    #[test]
    fn stop_on_idle_player_leaves_stopping() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        playing(&mut machine, &a);
        machine.handle(Input::Enqueue(vec![Arc::new(track("b"))]));
        machine.handle(Input::Skip);

        let effects = machine.handle(Input::PlayerIdle);
        assert_eq!(materialize_target(&effects), Some(("b".to_string(), 2)));
        // The rejection that raced the skip arrives after the machine moved on.
        let effects = machine.handle(Input::PlayRejected {
            track: Arc::clone(&a),
            error: PlayerError::Offline,
        });
        assert!(effects.is_empty());
        assert_eq!(machine.current().map(|t| t.title().to_string()), Some("b".to_string()));
    }

    #[test]
    fn idle_player_without_transition_finishes_active_track() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        playing(&mut machine, &a);
        machine.handle(Input::Enqueue(vec![Arc::new(track("b"))]));

        let effects = machine.handle(Input::PlayerIdle);
        assert!(matches!(&effects[0], Effect::Finished(t) if Arc::ptr_eq(t, &a)));
        assert_eq!(materialize_target(&effects), Some(("b".to_string(), 2)));

        // Nothing to resync while materializing.
        assert!(machine.handle(Input::PlayerIdle).is_empty());
    }

    #[test]
    fn late_idle_of_previous_track_does_not_advance() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        let b = Arc::new(track("b"));
        playing(&mut machine, &a);
        machine.handle(Input::Enqueue(vec![Arc::clone(&b), Arc::new(track("c"))]));
        machine.handle(Input::PlayerIdle);
        machine.handle(Input::Materialized {
            attempt: 2,
            result: Ok(resource_for(&b)),
        });

        let effects = machine.handle(transition(PlayerState::Playing(a), PlayerState::Idle));
        assert!(materialize_target(&effects).is_none());
        assert!(Arc::ptr_eq(machine.current().unwrap(), &b));
        assert_eq!(machine.queue().len(), 1);
    }

    #[test]
    fn destroyed_transport_tears_down_silently() {
        let mut machine = Machine::new();
        let a = Arc::new(track("a"));
        playing(&mut machine, &a);
        machine.handle(Input::Enqueue(vec![Arc::new(track("b"))]));

        let effects = machine.handle(Input::Transport(TransportState::Destroyed));
        assert!(matches!(
            effects.as_slice(),
            [Effect::StopPlayer, Effect::QueueChanged(0), Effect::Teardown]
        ));
        assert!(machine.closed);
        assert!(machine.queue().is_empty());

        // The idle transition caused by the stop no longer reaches any hook.
        let effects = machine.handle(transition(PlayerState::Playing(a), PlayerState::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn transient_transport_states_are_ignored() {
        let mut machine = Machine::new();
        for state in [
            TransportState::Disconnected,
            TransportState::Signalling,
            TransportState::Connecting,
            TransportState::Ready,
        ] {
            assert!(machine.handle(Input::Transport(state)).is_empty());
        }
        assert!(!machine.closed);
    }

    #[test]
    fn leave_while_materializing_cancels_fetch() {
        let mut machine = Machine::new();
        machine.handle(Input::Enqueue(vec![Arc::new(track("a"))]));
        let effects = machine.handle(Input::Leave);
        assert!(matches!(
            effects.as_slice(),
            [Effect::CancelMaterialize, Effect::Teardown]
        ));
    }
}
