//! Edge-triggered movement intents for the wire collaborator.
//!
//! The server cares about transitions, not state: intents fire exactly
//! once per edge, in the order the edges occur, plus a heartbeat every
//! 500 ms while any movement is active. The callback is optional;
//! without one, intents are consumed locally.

use crate::constants::MOVE_HEARTBEAT_INTERVAL;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveIntent {
    StartForward,
    StartBackward,
    Stop,
    StartStrafeLeft,
    StartStrafeRight,
    StopStrafe,
    StartTurnLeft,
    StartTurnRight,
    StopTurn,
    Jump,
    FallLand,
    StartSwim,
    StopSwim,
    MoveHeartbeat,
}

/// Movement flags sampled once per frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MoveFlags {
    pub forward: bool,
    pub backward: bool,
    pub strafe_left: bool,
    pub strafe_right: bool,
    pub turn_left: bool,
    pub turn_right: bool,
    pub swimming: bool,
}

impl MoveFlags {
    fn any_movement(&self) -> bool {
        self.forward || self.backward || self.strafe_left || self.strafe_right
    }
}

type IntentCallback = Box<dyn FnMut(MoveIntent)>;

#[derive(Default)]
pub struct IntentTracker {
    prev: MoveFlags,
    heartbeat: f32,
    callback: Option<IntentCallback>,
    /// Per-frame log, drained by tests and debug overlays.
    emitted: Vec<MoveIntent>,
}

impl IntentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_callback(&mut self, callback: IntentCallback) {
        self.callback = Some(callback);
    }

    pub fn take_emitted(&mut self) -> Vec<MoveIntent> {
        std::mem::take(&mut self.emitted)
    }

    fn emit(&mut self, intent: MoveIntent) {
        if let Some(cb) = self.callback.as_mut() {
            cb(intent);
        }
        self.emitted.push(intent);
    }

    /// One-shot intents the controller raises directly.
    pub fn jumped(&mut self) {
        self.emit(MoveIntent::Jump);
    }

    pub fn landed(&mut self) {
        self.emit(MoveIntent::FallLand);
    }

    /// Diff this frame's flags against the previous frame's.
    pub fn update(&mut self, flags: MoveFlags, dt: f32) {
        let prev = self.prev;

        if flags.forward && !prev.forward {
            self.emit(MoveIntent::StartForward);
        }
        if flags.backward && !prev.backward {
            self.emit(MoveIntent::StartBackward);
        }
        if !flags.forward && !flags.backward && (prev.forward || prev.backward) {
            self.emit(MoveIntent::Stop);
        }

        if flags.strafe_left && !prev.strafe_left {
            self.emit(MoveIntent::StartStrafeLeft);
        }
        if flags.strafe_right && !prev.strafe_right {
            self.emit(MoveIntent::StartStrafeRight);
        }
        if !flags.strafe_left
            && !flags.strafe_right
            && (prev.strafe_left || prev.strafe_right)
        {
            self.emit(MoveIntent::StopStrafe);
        }

        if flags.turn_left && !prev.turn_left {
            self.emit(MoveIntent::StartTurnLeft);
        }
        if flags.turn_right && !prev.turn_right {
            self.emit(MoveIntent::StartTurnRight);
        }
        if !flags.turn_left && !flags.turn_right && (prev.turn_left || prev.turn_right) {
            self.emit(MoveIntent::StopTurn);
        }

        if flags.swimming && !prev.swimming {
            self.emit(MoveIntent::StartSwim);
        }
        if !flags.swimming && prev.swimming {
            self.emit(MoveIntent::StopSwim);
        }

        if flags.any_movement() {
            self.heartbeat += dt;
            if self.heartbeat >= MOVE_HEARTBEAT_INTERVAL {
                self.heartbeat -= MOVE_HEARTBEAT_INTERVAL;
                self.emit(MoveIntent::MoveHeartbeat);
            }
        } else {
            self.heartbeat = 0.0;
        }

        self.prev = flags;
    }
}

/// Fires footsteps when the normalized animation phase crosses the
/// gait's contact points.
#[derive(Default)]
pub struct FootstepTracker {
    prev_phase: f32,
}

impl FootstepTracker {
    pub fn reset(&mut self) {
        self.prev_phase = 0.0;
    }

    /// Count of contact points crossed between the previous phase and
    /// `phase` (both normalized, wrapping).
    pub fn crossings(&mut self, phase: f32, contacts: &[f32]) -> usize {
        let prev = self.prev_phase;
        self.prev_phase = phase;
        let crossed = |c: f32| {
            if phase >= prev {
                prev < c && c <= phase
            } else {
                // Wrapped around the cycle end.
                c > prev || c <= phase
            }
        };
        contacts.iter().filter(|&&c| crossed(c)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{FOOTSTEP_PHASES, MOUNT_FOOTSTEP_PHASES};

    #[test]
    fn edges_fire_once_in_order() {
        let mut tracker = IntentTracker::new();
        let forward = MoveFlags {
            forward: true,
            ..Default::default()
        };
        tracker.update(forward, 0.016);
        tracker.update(forward, 0.016);
        assert_eq!(tracker.take_emitted(), vec![MoveIntent::StartForward]);

        tracker.update(MoveFlags::default(), 0.016);
        assert_eq!(tracker.take_emitted(), vec![MoveIntent::Stop]);
    }

    #[test]
    fn heartbeat_every_half_second_while_moving() {
        let mut tracker = IntentTracker::new();
        let forward = MoveFlags {
            forward: true,
            ..Default::default()
        };
        let mut beats = 0;
        for _ in 0..100 {
            tracker.update(forward, 0.016);
            beats += tracker
                .take_emitted()
                .iter()
                .filter(|i| **i == MoveIntent::MoveHeartbeat)
                .count();
        }
        // 1.6 s of movement: three heartbeats.
        assert_eq!(beats, 3);

        tracker.update(MoveFlags::default(), 0.016);
        tracker.take_emitted();
        tracker.update(MoveFlags::default(), 10.0);
        assert!(tracker.take_emitted().is_empty());
    }

    #[test]
    fn swim_edges() {
        let mut tracker = IntentTracker::new();
        tracker.update(
            MoveFlags {
                swimming: true,
                ..Default::default()
            },
            0.016,
        );
        assert_eq!(tracker.take_emitted(), vec![MoveIntent::StartSwim]);
        tracker.update(MoveFlags::default(), 0.016);
        assert_eq!(tracker.take_emitted(), vec![MoveIntent::StopSwim]);
    }

    #[test]
    fn footstep_phase_crossings() {
        let mut steps = FootstepTracker::default();
        assert_eq!(steps.crossings(0.1, &FOOTSTEP_PHASES), 0);
        assert_eq!(steps.crossings(0.3, &FOOTSTEP_PHASES), 1); // 0.22
        assert_eq!(steps.crossings(0.8, &FOOTSTEP_PHASES), 1); // 0.72
        // Wrap: 0.8 -> 0.15 crosses nothing but the cycle start.
        assert_eq!(steps.crossings(0.15, &FOOTSTEP_PHASES), 0);
        // Full-cycle wrap catches all four mount contacts.
        let mut mount = FootstepTracker::default();
        assert_eq!(mount.crossings(0.9, &MOUNT_FOOTSTEP_PHASES), 4);
    }
}
