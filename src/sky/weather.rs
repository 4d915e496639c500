//! Zone-driven weather: a bounded particle cloud around the camera.
//!
//! Offline, cycles are picked stochastically from a per-zone table and
//! intensity eases toward the target. A server weather packet
//! overrides the table until cleared. Particles recycle on exit
//! instead of despawning, so the cloud density is stable.

use crate::constants::WEATHER_PARTICLE_CAP;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherKind {
    Clear,
    Rain,
    Snow,
}

/// One candidate cycle for a zone.
#[derive(Debug, Clone, Copy)]
pub struct ZoneWeather {
    pub kind: WeatherKind,
    pub min_intensity: f32,
    pub max_intensity: f32,
    /// Chance this entry is picked when a new cycle starts.
    pub probability: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct WeatherParticle {
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Radius of the particle cloud around the camera.
const CLOUD_RADIUS: f32 = 40.0;
const CLOUD_HEIGHT: f32 = 25.0;
const RAIN_FALL_SPEED: f32 = 25.0;
const SNOW_FALL_SPEED: f32 = 2.0;
/// Intensity easing rate, 1/s.
const INTENSITY_RATE: f32 = 0.25;

pub struct Weather {
    table: FxHashMap<u32, Vec<ZoneWeather>>,
    particles: Vec<WeatherParticle>,
    kind: WeatherKind,
    intensity: f32,
    target_intensity: f32,
    cycle_remaining: f32,
    server_override: Option<(WeatherKind, f32)>,
    rng: StdRng,
}

impl Default for Weather {
    fn default() -> Self {
        Self::new()
    }
}

impl Weather {
    pub fn new() -> Self {
        Self {
            table: FxHashMap::default(),
            particles: Vec::new(),
            kind: WeatherKind::Clear,
            intensity: 0.0,
            target_intensity: 0.0,
            cycle_remaining: 0.0,
            server_override: None,
            rng: StdRng::seed_from_u64(0x57ea),
        }
    }

    pub fn set_zone_table(&mut self, zone_id: u32, entries: Vec<ZoneWeather>) {
        self.table.insert(zone_id, entries);
    }

    /// Server weather packet: pins kind and intensity until cleared.
    pub fn set_server_weather(&mut self, kind: WeatherKind, intensity: f32) {
        self.server_override = Some((kind, intensity.clamp(0.0, 1.0)));
    }

    pub fn clear_server_weather(&mut self) {
        self.server_override = None;
    }

    pub fn kind(&self) -> WeatherKind {
        self.kind
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn particles(&self) -> &[WeatherParticle] {
        &self.particles
    }

    pub fn update(&mut self, dt: f32, camera: Vec3, zone_id: u32) {
        match self.server_override {
            Some((kind, intensity)) => {
                if kind != self.kind {
                    self.kind = kind;
                }
                self.target_intensity = if kind == WeatherKind::Clear {
                    0.0
                } else {
                    intensity
                };
            }
            None => {
                self.cycle_remaining -= dt;
                if self.cycle_remaining <= 0.0 {
                    self.start_cycle(zone_id);
                }
            }
        }

        let step = (INTENSITY_RATE * dt).min(1.0);
        self.intensity += (self.target_intensity - self.intensity) * step;
        if self.intensity < 1e-3 && self.target_intensity == 0.0 {
            self.intensity = 0.0;
        }

        let wanted = if self.kind == WeatherKind::Clear {
            0
        } else {
            (self.intensity * WEATHER_PARTICLE_CAP as f32) as usize
        };
        self.particles.truncate(wanted);
        while self.particles.len() < wanted {
            let p = self.spawn(camera, true);
            self.particles.push(p);
        }

        let fall = match self.kind {
            WeatherKind::Rain => RAIN_FALL_SPEED,
            WeatherKind::Snow => SNOW_FALL_SPEED,
            WeatherKind::Clear => 0.0,
        };
        let floor = camera.z - 5.0;
        let mut respawns: Vec<usize> = Vec::new();
        for (i, p) in self.particles.iter_mut().enumerate() {
            p.velocity.z = -fall;
            p.position += p.velocity * dt;
            let off = p.position - camera;
            if p.position.z < floor || off.truncate().length() > CLOUD_RADIUS {
                respawns.push(i);
            }
        }
        for i in respawns {
            self.particles[i] = self.spawn(camera, false);
        }
    }

    fn start_cycle(&mut self, zone_id: u32) {
        // Cycles run 60..180 s before re-rolling.
        self.cycle_remaining = 60.0 + self.rng.gen::<f32>() * 120.0;
        let Some(entries) = self.table.get(&zone_id) else {
            self.kind = WeatherKind::Clear;
            self.target_intensity = 0.0;
            return;
        };
        let roll: f32 = self.rng.gen();
        let mut acc = 0.0;
        for entry in entries {
            acc += entry.probability;
            if roll < acc {
                self.kind = entry.kind;
                self.target_intensity = self
                    .rng
                    .gen_range(entry.min_intensity..=entry.max_intensity.max(entry.min_intensity));
                return;
            }
        }
        self.kind = WeatherKind::Clear;
        self.target_intensity = 0.0;
    }

    fn spawn(&mut self, camera: Vec3, anywhere: bool) -> WeatherParticle {
        let angle = self.rng.gen::<f32>() * std::f32::consts::TAU;
        let radius = self.rng.gen::<f32>().sqrt() * CLOUD_RADIUS;
        let z = if anywhere {
            camera.z + self.rng.gen::<f32>() * CLOUD_HEIGHT
        } else {
            camera.z + CLOUD_HEIGHT
        };
        let drift = if self.kind == WeatherKind::Snow {
            Vec3::new(
                self.rng.gen::<f32>() - 0.5,
                self.rng.gen::<f32>() - 0.5,
                0.0,
            )
        } else {
            Vec3::ZERO
        };
        WeatherParticle {
            position: Vec3::new(
                camera.x + angle.cos() * radius,
                camera.y + angle.sin() * radius,
                z,
            ),
            velocity: drift,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_override_ramps_up_and_caps() {
        let mut weather = Weather::new();
        weather.set_server_weather(WeatherKind::Rain, 1.0);
        for _ in 0..600 {
            weather.update(0.1, Vec3::ZERO, 12);
        }
        assert_eq!(weather.kind(), WeatherKind::Rain);
        assert!(weather.intensity() > 0.95);
        assert!(weather.particles().len() <= WEATHER_PARTICLE_CAP);
        assert!(weather.particles().len() > WEATHER_PARTICLE_CAP / 2);
    }

    #[test]
    fn clearing_fades_out() {
        let mut weather = Weather::new();
        weather.set_server_weather(WeatherKind::Snow, 0.8);
        for _ in 0..300 {
            weather.update(0.1, Vec3::ZERO, 12);
        }
        weather.set_server_weather(WeatherKind::Clear, 0.0);
        for _ in 0..600 {
            weather.update(0.1, Vec3::ZERO, 12);
        }
        assert_eq!(weather.intensity(), 0.0);
        assert!(weather.particles().is_empty());
    }

    #[test]
    fn particles_stay_near_the_camera() {
        let mut weather = Weather::new();
        weather.set_server_weather(WeatherKind::Rain, 1.0);
        let camera = Vec3::new(1000.0, -500.0, 80.0);
        for _ in 0..200 {
            weather.update(0.1, camera, 12);
        }
        for p in weather.particles() {
            let off = p.position - camera;
            assert!(off.truncate().length() <= CLOUD_RADIUS + 1.0);
            assert!(p.position.z >= camera.z - 10.0);
        }
    }

    #[test]
    fn zone_without_table_entry_stays_clear() {
        let mut weather = Weather::new();
        for _ in 0..100 {
            weather.update(1.0, Vec3::ZERO, 999);
        }
        assert_eq!(weather.kind(), WeatherKind::Clear);
        assert!(weather.particles().is_empty());
    }
}
