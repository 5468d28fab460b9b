//! Local transformation sequence.
//!
//! Only the start trigger and the final acknowledgement cross the network;
//! everything in between is paced by local timers advanced from `advance`.

use redsheep_shared::animation::{self, AnimParam};
use redsheep_shared::PresentationConfig;

/// Something the replica must do as the sequence progresses
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequenceAction {
    Trigger(AnimParam),
    FogStart,
    SwapRig,
    FogEnd,
    /// Sequence finished; the owner acknowledges
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stage {
    Idle,
    StartDelay(f32),
    Fog(f32),
    EndDelay(f32),
    Done,
}

#[derive(Debug, Clone, Copy)]
struct Timings {
    start_delay: f32,
    fog_duration: f32,
    end_delay: f32,
}

/// Timed sub-state machine for the transformation visuals
#[derive(Debug, Clone)]
pub struct TransformationSequence {
    stage: Stage,
    timings: Timings,
}

impl TransformationSequence {
    pub fn new(config: &PresentationConfig) -> Self {
        Self {
            stage: Stage::Idle,
            timings: Timings {
                start_delay: config.transformation_start_delay,
                fog_duration: config.transformation_fog_duration,
                end_delay: config.transformation_end_delay,
            },
        }
    }

    /// Whether a sequence is in flight
    pub fn is_running(&self) -> bool {
        matches!(self.stage, Stage::StartDelay(_) | Stage::Fog(_) | Stage::EndDelay(_))
    }

    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Begin the sequence. Returns None if one is already running.
    pub fn start(&mut self) -> Option<Vec<SequenceAction>> {
        if self.is_running() {
            return None;
        }
        self.stage = Stage::StartDelay(self.timings.start_delay);
        Some(vec![SequenceAction::Trigger(animation::TRANSFORMATION)])
    }

    /// Drop any sequence in flight (a snapshot or new identity superseded it)
    pub fn cancel(&mut self) {
        self.stage = Stage::Idle;
    }

    /// Advance the timers by `delta` seconds. Leftover time carries into the
    /// next stage, so a long frame can finish several stages at once.
    pub fn advance(&mut self, delta: f32) -> Vec<SequenceAction> {
        let mut actions = Vec::new();
        let mut budget = delta;

        loop {
            match self.stage {
                Stage::StartDelay(remaining) => {
                    if budget < remaining {
                        self.stage = Stage::StartDelay(remaining - budget);
                        break;
                    }
                    budget -= remaining;
                    actions.push(SequenceAction::FogStart);
                    self.stage = Stage::Fog(self.timings.fog_duration);
                }
                Stage::Fog(remaining) => {
                    if budget < remaining {
                        self.stage = Stage::Fog(remaining - budget);
                        break;
                    }
                    budget -= remaining;
                    actions.push(SequenceAction::SwapRig);
                    actions.push(SequenceAction::FogEnd);
                    actions.push(SequenceAction::Trigger(animation::TRANSFORMATION_END));
                    self.stage = Stage::EndDelay(self.timings.end_delay);
                }
                Stage::EndDelay(remaining) => {
                    if budget < remaining {
                        self.stage = Stage::EndDelay(remaining - budget);
                        break;
                    }
                    actions.push(SequenceAction::Complete);
                    self.stage = Stage::Done;
                    break;
                }
                Stage::Idle | Stage::Done => break,
            }
        }

        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence() -> TransformationSequence {
        TransformationSequence::new(&PresentationConfig::default())
    }

    #[test]
    fn test_stages_run_in_order() {
        let mut seq = sequence();
        assert_eq!(seq.start(), Some(vec![SequenceAction::Trigger(animation::TRANSFORMATION)]));
        assert!(seq.is_running());

        // start delay 1.0
        assert!(seq.advance(0.5).is_empty());
        assert_eq!(seq.advance(0.5), vec![SequenceAction::FogStart]);

        // fog 1.5
        assert!(seq.advance(1.0).is_empty());
        assert_eq!(
            seq.advance(0.5),
            vec![
                SequenceAction::SwapRig,
                SequenceAction::FogEnd,
                SequenceAction::Trigger(animation::TRANSFORMATION_END)
            ]
        );

        // end delay 1.0
        assert!(seq.advance(0.75).is_empty());
        assert_eq!(seq.advance(0.25), vec![SequenceAction::Complete]);
        assert!(seq.is_done());
        assert!(seq.advance(10.0).is_empty());
    }

    #[test]
    fn test_redundant_start_is_ignored() {
        let mut seq = sequence();
        assert!(seq.start().is_some());
        seq.advance(1.2);
        assert!(seq.start().is_none());
        assert!(seq.is_running());
    }

    #[test]
    fn test_long_frame_finishes_everything() {
        let mut seq = sequence();
        seq.start();
        let actions = seq.advance(5.0);
        assert_eq!(actions.first(), Some(&SequenceAction::FogStart));
        assert_eq!(actions.last(), Some(&SequenceAction::Complete));
        assert_eq!(actions.len(), 5);
    }

    #[test]
    fn test_cancel_allows_restart() {
        let mut seq = sequence();
        seq.start();
        seq.cancel();
        assert!(!seq.is_running());
        assert!(seq.advance(10.0).is_empty());
        assert!(seq.start().is_some());
    }
}
