//! Locomotion state machine.
//!
//! Deterministic, priority-ordered: mounts dominate everything,
//! swimming overrides jumping and sitting, melee interrupts ground
//! states. Time-based states (jump start, sit down, melee swing) hold
//! for a fixed duration before yielding.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveState {
    Idle,
    Walk,
    Run,
    JumpStart,
    JumpMid,
    JumpEnd,
    SitDown,
    Sitting,
    Emote,
    SwimIdle,
    Swim,
    MeleeSwing,
    Mount,
    Charge,
    CombatIdle,
}

impl MoveState {
    pub fn is_airborne(self) -> bool {
        matches!(self, MoveState::JumpStart | MoveState::JumpMid)
    }

    pub fn is_swimming(self) -> bool {
        matches!(self, MoveState::Swim | MoveState::SwimIdle)
    }

    /// States whose animation drives footstep events.
    pub fn has_footsteps(self) -> bool {
        matches!(self, MoveState::Walk | MoveState::Run | MoveState::Mount)
    }
}

/// Per-frame condition flags feeding the transition table.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateInputs {
    pub moving: bool,
    pub moving_backward: bool,
    pub grounded: bool,
    pub jump_started: bool,
    pub falling: bool,
    pub walking: bool,
    pub sitting: bool,
    pub swimming: bool,
    pub melee_swing: bool,
    pub mounted: bool,
    pub charging: bool,
    pub emote_active: bool,
    pub combat_with_target: bool,
}

const JUMP_START_DURATION: f32 = 0.25;
const JUMP_END_DURATION: f32 = 0.35;
const SIT_DOWN_DURATION: f32 = 0.6;
const MELEE_SWING_DURATION: f32 = 0.8;

pub struct Locomotion {
    state: MoveState,
    time_in_state: f32,
}

impl Default for Locomotion {
    fn default() -> Self {
        Self {
            state: MoveState::Idle,
            time_in_state: 0.0,
        }
    }
}

impl Locomotion {
    pub fn state(&self) -> MoveState {
        self.state
    }

    pub fn time_in_state(&self) -> f32 {
        self.time_in_state
    }

    fn set(&mut self, state: MoveState) {
        if self.state != state {
            self.state = state;
            self.time_in_state = 0.0;
        }
    }

    /// Advance the machine one frame. Returns the previous state when
    /// a transition happened.
    pub fn step(&mut self, inputs: &StateInputs, dt: f32) -> Option<MoveState> {
        let before = self.state;
        self.time_in_state += dt;
        self.set(self.next(inputs));
        (before != self.state).then_some(before)
    }

    fn next(&self, i: &StateInputs) -> MoveState {
        if i.mounted {
            return MoveState::Mount;
        }
        if i.swimming {
            return if i.moving || i.moving_backward {
                MoveState::Swim
            } else {
                MoveState::SwimIdle
            };
        }
        if i.charging {
            return MoveState::Charge;
        }
        if i.melee_swing && i.grounded {
            return MoveState::MeleeSwing;
        }
        if self.state == MoveState::MeleeSwing && self.time_in_state < MELEE_SWING_DURATION {
            return MoveState::MeleeSwing;
        }

        if !i.grounded {
            return match self.state {
                MoveState::JumpStart if self.time_in_state < JUMP_START_DURATION => {
                    MoveState::JumpStart
                }
                _ if i.jump_started => MoveState::JumpStart,
                _ => MoveState::JumpMid,
            };
        }
        if i.jump_started {
            return MoveState::JumpStart;
        }

        // Grounded. Landing recovery holds briefly unless movement
        // cancels it.
        if self.state.is_airborne() && !i.moving && !i.moving_backward {
            return MoveState::JumpEnd;
        }
        if self.state == MoveState::JumpEnd
            && self.time_in_state < JUMP_END_DURATION
            && !i.moving
            && !i.moving_backward
        {
            return MoveState::JumpEnd;
        }

        if i.sitting {
            return match self.state {
                MoveState::Sitting => MoveState::Sitting,
                MoveState::SitDown if self.time_in_state >= SIT_DOWN_DURATION => {
                    MoveState::Sitting
                }
                MoveState::SitDown => MoveState::SitDown,
                _ => MoveState::SitDown,
            };
        }

        if i.moving || i.moving_backward {
            return if i.walking {
                MoveState::Walk
            } else {
                MoveState::Run
            };
        }
        if i.emote_active {
            return MoveState::Emote;
        }
        if i.combat_with_target {
            return MoveState::CombatIdle;
        }
        MoveState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stepn(loco: &mut Locomotion, inputs: &StateInputs, dt: f32, n: usize) {
        for _ in 0..n {
            loco.step(inputs, dt);
        }
    }

    #[test]
    fn run_is_default_movement() {
        let mut loco = Locomotion::default();
        let inputs = StateInputs {
            moving: true,
            grounded: true,
            ..Default::default()
        };
        loco.step(&inputs, 0.016);
        assert_eq!(loco.state(), MoveState::Run);
        let walking = StateInputs {
            walking: true,
            ..inputs
        };
        loco.step(&walking, 0.016);
        assert_eq!(loco.state(), MoveState::Walk);
    }

    #[test]
    fn jump_cycle() {
        let mut loco = Locomotion::default();
        let airborne = StateInputs {
            jump_started: true,
            ..Default::default()
        };
        loco.step(&airborne, 0.016);
        assert_eq!(loco.state(), MoveState::JumpStart);

        let mid = StateInputs::default(); // airborne, no longer starting
        stepn(&mut loco, &mid, 0.1, 4);
        assert_eq!(loco.state(), MoveState::JumpMid);

        let landed = StateInputs {
            grounded: true,
            ..Default::default()
        };
        loco.step(&landed, 0.016);
        assert_eq!(loco.state(), MoveState::JumpEnd);
        stepn(&mut loco, &landed, 0.1, 5);
        assert_eq!(loco.state(), MoveState::Idle);
    }

    #[test]
    fn landing_while_moving_skips_recovery() {
        let mut loco = Locomotion::default();
        loco.step(&StateInputs::default(), 0.016);
        assert_eq!(loco.state(), MoveState::JumpMid);
        let landed_running = StateInputs {
            grounded: true,
            moving: true,
            ..Default::default()
        };
        loco.step(&landed_running, 0.016);
        assert_eq!(loco.state(), MoveState::Run);
    }

    #[test]
    fn swimming_overrides_jump_and_sit() {
        let mut loco = Locomotion::default();
        let inputs = StateInputs {
            swimming: true,
            sitting: true,
            jump_started: true,
            moving: true,
            ..Default::default()
        };
        loco.step(&inputs, 0.016);
        assert_eq!(loco.state(), MoveState::Swim);
        let still = StateInputs {
            swimming: true,
            ..Default::default()
        };
        loco.step(&still, 0.016);
        assert_eq!(loco.state(), MoveState::SwimIdle);
    }

    #[test]
    fn mount_dominates_everything() {
        let mut loco = Locomotion::default();
        let inputs = StateInputs {
            mounted: true,
            swimming: true,
            melee_swing: true,
            moving: true,
            grounded: true,
            ..Default::default()
        };
        loco.step(&inputs, 0.016);
        assert_eq!(loco.state(), MoveState::Mount);
    }

    #[test]
    fn sit_down_settles_into_sitting() {
        let mut loco = Locomotion::default();
        let inputs = StateInputs {
            sitting: true,
            grounded: true,
            ..Default::default()
        };
        loco.step(&inputs, 0.016);
        assert_eq!(loco.state(), MoveState::SitDown);
        stepn(&mut loco, &inputs, 0.2, 4);
        assert_eq!(loco.state(), MoveState::Sitting);
    }

    #[test]
    fn melee_swing_holds_for_its_duration() {
        let mut loco = Locomotion::default();
        let swing = StateInputs {
            melee_swing: true,
            grounded: true,
            ..Default::default()
        };
        loco.step(&swing, 0.016);
        assert_eq!(loco.state(), MoveState::MeleeSwing);
        // Input released; the swing still plays out.
        let idle = StateInputs {
            grounded: true,
            ..Default::default()
        };
        loco.step(&idle, 0.016);
        assert_eq!(loco.state(), MoveState::MeleeSwing);
        stepn(&mut loco, &idle, 0.5, 2);
        assert_eq!(loco.state(), MoveState::Idle);
    }
}
