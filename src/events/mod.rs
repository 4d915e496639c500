//! Game event bus.
//!
//! The core emits typed events (footsteps, zone changes, music cues)
//! and never handles them itself; audio and UI collaborators
//! subscribe. A panicking handler is logged and swallowed so one bad
//! subscriber cannot take down the frame.

use std::panic::{catch_unwind, AssertUnwindSafe};

/// Ground surface under the avatar, derived from the dominant terrain
/// texture or the WMO material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Grass,
    Dirt,
    Stone,
    Wood,
    Metal,
    Snow,
    Water,
}

/// Guess the surface from a texture path. Unknown textures sound like
/// dirt, which is the least jarring default.
pub fn surface_for_texture(path: &str) -> SurfaceKind {
    let lower = path.to_ascii_lowercase();
    if lower.contains("grass") || lower.contains("leaf") || lower.contains("moss") {
        SurfaceKind::Grass
    } else if lower.contains("snow") || lower.contains("ice") {
        SurfaceKind::Snow
    } else if lower.contains("rock") || lower.contains("stone") || lower.contains("cobble") {
        SurfaceKind::Stone
    } else if lower.contains("wood") || lower.contains("plank") {
        SurfaceKind::Wood
    } else if lower.contains("metal") {
        SurfaceKind::Metal
    } else {
        SurfaceKind::Dirt
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    Footstep {
        surface: SurfaceKind,
        sprinting: bool,
    },
    Jump,
    Landing {
        surface: SurfaceKind,
        hard: bool,
    },
    WaterEnter,
    WaterExit,
    MeleeSwing,
    MountIdleSound,
    ZoneEntered {
        zone_id: u32,
        name: String,
    },
    MusicCrossfade {
        track: String,
    },
}

type Handler = Box<dyn FnMut(&GameEvent)>;

#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Handler>,
    /// Events emitted this frame, kept for tests and debug overlays.
    log: Vec<GameEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, handler: Handler) {
        self.handlers.push(handler);
    }

    pub fn emit(&mut self, event: GameEvent) {
        for handler in &mut self.handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                log::error!("event handler panicked on {event:?}");
            }
        }
        self.log.push(event);
    }

    /// Drain the per-frame event log.
    pub fn take_log(&mut self) -> Vec<GameEvent> {
        std::mem::take(&mut self.log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn events_reach_all_handlers() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new();
        for _ in 0..2 {
            let seen = Rc::clone(&seen);
            bus.subscribe(Box::new(move |e| seen.borrow_mut().push(e.clone())));
        }
        bus.emit(GameEvent::Jump);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(bus.take_log(), vec![GameEvent::Jump]);
        assert!(bus.take_log().is_empty());
    }

    #[test]
    fn panicking_handler_is_contained() {
        let seen = Rc::new(RefCell::new(0));
        let mut bus = EventBus::new();
        bus.subscribe(Box::new(|_| panic!("bad handler")));
        {
            let seen = Rc::clone(&seen);
            bus.subscribe(Box::new(move |_| *seen.borrow_mut() += 1));
        }
        bus.emit(GameEvent::WaterEnter);
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn texture_surface_mapping() {
        assert_eq!(
            surface_for_texture("Tileset\\Elwynn\\ElwynnGrassBase.blp"),
            SurfaceKind::Grass
        );
        assert_eq!(
            surface_for_texture("Tileset\\Dun Morogh\\SnowBase.blp"),
            SurfaceKind::Snow
        );
        assert_eq!(surface_for_texture("weird.blp"), SurfaceKind::Dirt);
    }
}
