//! Sky state: time of day, sun and moon positions, atmosphere colors.
//!
//! The sky owns the game clock. One game day passes in 24 real
//! minutes; the server can pin the clock, otherwise it free-runs from
//! local time. Everything here is deterministic from the clock so the
//! renderer can be driven headlessly in tests.

pub mod weather;

use crate::constants::{GAME_DAY_REAL_SECONDS, MOON_PERIOD_BLUE, MOON_PERIOD_WHITE};
use glam::Vec3;

/// Per-frame lighting record consumed by the render passes.
#[derive(Debug, Clone, Copy)]
pub struct SkyParams {
    pub light_direction: Vec3,
    pub sun_color: Vec3,
    pub horizon_color: Vec3,
    pub mid_color: Vec3,
    pub zenith_color: Vec3,
    pub cloud_density: f32,
    pub fog_density: f32,
    pub horizon_glow: f32,
    /// Hours, 0..24.
    pub time_of_day: f32,
}

/// Positions of the celestial bodies, unit directions from the camera.
#[derive(Debug, Clone, Copy)]
pub struct CelestialState {
    pub sun_dir: Vec3,
    pub white_moon_dir: Vec3,
    pub blue_moon_dir: Vec3,
    /// Phase fraction in [0, 1): 0 = new, 0.5 = full.
    pub white_moon_phase: f32,
    pub blue_moon_phase: f32,
}

pub struct Sky {
    game_time_secs: f64,
    server_time_secs: f64,
    pub procedural_stars: bool,
    pub moon_phase_cycling: bool,
    /// Set when the active skybox texture already paints stars.
    pub skybox_has_stars: bool,
}

impl Default for Sky {
    fn default() -> Self {
        Self::new()
    }
}

impl Sky {
    pub fn new() -> Self {
        Self {
            // Start mid-morning so a fresh session is lit.
            game_time_secs: (GAME_DAY_REAL_SECONDS as f64) * 9.0 / 24.0,
            server_time_secs: -1.0,
            procedural_stars: true,
            moon_phase_cycling: true,
            skybox_has_stars: false,
        }
    }

    pub fn update(&mut self, dt: f32) {
        self.game_time_secs += dt as f64;
    }

    /// Pin the clock to server game time, in seconds. Negative values
    /// release the pin.
    pub fn set_server_time(&mut self, secs: f64) {
        self.server_time_secs = secs;
    }

    pub fn game_time_secs(&self) -> f64 {
        if self.server_time_secs >= 0.0 {
            self.server_time_secs
        } else {
            self.game_time_secs
        }
    }

    /// Hours in [0, 24).
    pub fn time_of_day(&self) -> f32 {
        let days = self.game_time_secs() / GAME_DAY_REAL_SECONDS as f64;
        (days.fract() * 24.0) as f32
    }

    /// Whether procedural stars should draw this frame.
    pub fn stars_visible(&self) -> bool {
        if !self.procedural_stars || self.skybox_has_stars {
            return false;
        }
        let tod = self.time_of_day();
        !(5.0..19.0).contains(&tod)
    }

    pub fn celestial(&self) -> CelestialState {
        let tod = self.time_of_day();
        // Sun rises at 06:00, culminates at noon, sets at 18:00.
        let sun_angle = (tod - 6.0) / 12.0 * std::f32::consts::PI;
        let sun_dir = Vec3::new(
            sun_angle.cos() * 0.4,
            sun_angle.cos() * 0.2,
            sun_angle.sin(),
        )
        .normalize();

        // The moons run half a day out of phase with the sun and with
        // each other, offset so they are rarely co-located.
        let white_angle = sun_angle + std::f32::consts::PI;
        let blue_angle = sun_angle + std::f32::consts::PI * 0.78;
        let moon_dir = |a: f32| Vec3::new(a.cos() * 0.35, a.cos() * 0.3, a.sin()).normalize();

        let days = self.game_time_secs() / GAME_DAY_REAL_SECONDS as f64;
        let phase = |period: f32| {
            if self.moon_phase_cycling {
                (days / period as f64).fract() as f32
            } else {
                0.5
            }
        };

        CelestialState {
            sun_dir,
            white_moon_dir: moon_dir(white_angle),
            blue_moon_dir: moon_dir(blue_angle),
            white_moon_phase: phase(MOON_PERIOD_WHITE),
            blue_moon_phase: phase(MOON_PERIOD_BLUE),
        }
    }

    /// Flare intensity in [0, 1] for the current view: zero when the
    /// sun is below the horizon, ramping up as the view lines up with
    /// it (within roughly 45 degrees).
    pub fn lens_flare_strength(&self, view_forward: Vec3) -> f32 {
        let sun = self.celestial().sun_dir;
        if sun.z <= 0.0 {
            return 0.0;
        }
        let facing = view_forward.normalize_or_zero().dot(sun);
        ((facing - 0.7) / 0.3).clamp(0.0, 1.0)
    }

    /// Atmosphere record for the current clock. Colors blend between
    /// four keyed times of day.
    pub fn params(&self) -> SkyParams {
        let tod = self.time_of_day();
        let celestial = self.celestial();

        // (hour, horizon, mid, zenith, sun)
        const STOPS: [(f32, [f32; 3], [f32; 3], [f32; 3], [f32; 3]); 5] = [
            (0.0, [0.02, 0.03, 0.08], [0.01, 0.02, 0.06], [0.00, 0.01, 0.03], [0.1, 0.1, 0.2]),
            (6.0, [0.95, 0.55, 0.30], [0.45, 0.40, 0.55], [0.15, 0.20, 0.40], [1.0, 0.75, 0.5]),
            (12.0, [0.75, 0.85, 0.95], [0.40, 0.60, 0.90], [0.18, 0.35, 0.75], [1.0, 0.98, 0.92]),
            (18.0, [0.98, 0.45, 0.25], [0.50, 0.35, 0.50], [0.18, 0.18, 0.40], [1.0, 0.6, 0.35]),
            (24.0, [0.02, 0.03, 0.08], [0.01, 0.02, 0.06], [0.00, 0.01, 0.03], [0.1, 0.1, 0.2]),
        ];

        let mut hi = 1;
        while hi < STOPS.len() - 1 && STOPS[hi].0 < tod {
            hi += 1;
        }
        let lo = hi - 1;
        let span = (STOPS[hi].0 - STOPS[lo].0).max(1e-3);
        let t = ((tod - STOPS[lo].0) / span).clamp(0.0, 1.0);
        let mix = |a: [f32; 3], b: [f32; 3]| {
            Vec3::from(a).lerp(Vec3::from(b), t)
        };

        let sun_up = celestial.sun_dir.z.max(0.0);
        SkyParams {
            light_direction: -celestial.sun_dir,
            sun_color: mix(STOPS[lo].4, STOPS[hi].4),
            horizon_color: mix(STOPS[lo].1, STOPS[hi].1),
            mid_color: mix(STOPS[lo].2, STOPS[hi].2),
            zenith_color: mix(STOPS[lo].3, STOPS[hi].3),
            cloud_density: 0.35,
            fog_density: 0.8 - 0.4 * sun_up,
            horizon_glow: (1.0 - sun_up) * 0.6,
            time_of_day: tod,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_wraps_into_hours() {
        let mut sky = Sky::new();
        sky.set_server_time(0.0);
        assert!(sky.time_of_day().abs() < 1e-5);
        sky.set_server_time(GAME_DAY_REAL_SECONDS as f64 * 1.5);
        assert!((sky.time_of_day() - 12.0).abs() < 1e-4);
    }

    #[test]
    fn moon_phase_is_periodic() {
        let mut sky = Sky::new();
        sky.set_server_time(0.0);
        let p0 = sky.celestial().white_moon_phase;
        // One white-lady period: 30 game days of 24 real minutes.
        sky.set_server_time(30.0 * 24.0 * 60.0);
        let p1 = sky.celestial().white_moon_phase;
        assert!((p0 - p1).abs() < 1e-3);
    }

    #[test]
    fn phase_cycling_can_be_pinned() {
        let mut sky = Sky::new();
        sky.moon_phase_cycling = false;
        sky.set_server_time(12345.0);
        assert_eq!(sky.celestial().white_moon_phase, 0.5);
        assert_eq!(sky.celestial().blue_moon_phase, 0.5);
    }

    #[test]
    fn stars_only_at_night_and_never_over_skybox_stars() {
        let mut sky = Sky::new();
        sky.set_server_time(0.0); // midnight
        assert!(sky.stars_visible());
        sky.set_server_time(GAME_DAY_REAL_SECONDS as f64 * 0.5); // noon
        assert!(!sky.stars_visible());
        sky.set_server_time(0.0);
        sky.skybox_has_stars = true;
        assert!(!sky.stars_visible());
    }

    #[test]
    fn flare_tracks_facing_the_sun() {
        let mut sky = Sky::new();
        sky.set_server_time(GAME_DAY_REAL_SECONDS as f64 * 0.5); // noon
        // Staring straight at the overhead sun.
        assert!(sky.lens_flare_strength(Vec3::Z) > 0.9);
        // Looking at the horizon, the sun is out of frame.
        assert_eq!(sky.lens_flare_strength(Vec3::X), 0.0);
        // No flare at night no matter where the camera points.
        sky.set_server_time(0.0);
        assert_eq!(sky.lens_flare_strength(Vec3::Z), 0.0);
    }

    #[test]
    fn noon_sun_is_overhead_and_lit() {
        let mut sky = Sky::new();
        sky.set_server_time(GAME_DAY_REAL_SECONDS as f64 * 0.5);
        let c = sky.celestial();
        assert!(c.sun_dir.z > 0.9);
        let p = sky.params();
        assert!(p.zenith_color.z > 0.5);
        // Light shines downward.
        assert!(p.light_direction.z < 0.0);
    }
}
