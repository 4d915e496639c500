//! Emitter-driven particles for doodad models (smoke, embers, motes).
//!
//! Each instance keeps one accumulator per emitter; the scene-wide
//! particle count is capped, and spawning simply stalls while the
//! scene is saturated.

use crate::constants::M2_PARTICLE_CAP;
use crate::parse::m2::ParticleEmitterDef;
use glam::{Mat4, Vec3};
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct Particle {
    pub position: Vec3,
    pub velocity: Vec3,
    pub age: f32,
    pub lifespan: f32,
    pub gravity: f32,
    pub texture: u16,
    pub instance_id: u64,
}

pub struct ParticleSystem {
    particles: Vec<Particle>,
    cap: usize,
}

impl Default for ParticleSystem {
    fn default() -> Self {
        Self::new(M2_PARTICLE_CAP)
    }
}

impl ParticleSystem {
    pub fn new(cap: usize) -> Self {
        Self {
            particles: Vec::new(),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Advance ages and integrate motion; expired particles drop out.
    pub fn update(&mut self, dt: f32) {
        for p in &mut self.particles {
            p.age += dt;
            p.velocity.z -= p.gravity * dt;
            p.position += p.velocity * dt;
        }
        self.particles.retain(|p| p.age < p.lifespan);
    }

    /// Run one instance's emitters for a frame.
    pub fn emit<R: Rng>(
        &mut self,
        rng: &mut R,
        instance_id: u64,
        transform: &Mat4,
        emitters: &[ParticleEmitterDef],
        accumulators: &mut [f32],
        dt: f32,
    ) {
        for (emitter, accum) in emitters.iter().zip(accumulators.iter_mut()) {
            if emitter.emission_rate <= 0.0 || emitter.lifespan <= 0.0 {
                continue;
            }
            *accum += emitter.emission_rate * dt;
            while *accum >= 1.0 {
                *accum -= 1.0;
                if self.particles.len() >= self.cap {
                    return;
                }
                let origin = transform.transform_point3(emitter.position);
                let speed = emitter.emission_speed
                    + emitter.speed_variation * (rng.gen::<f32>() * 2.0 - 1.0);
                let spread = Vec3::new(
                    rng.gen::<f32>() - 0.5,
                    rng.gen::<f32>() - 0.5,
                    1.0,
                )
                .normalize();
                self.particles.push(Particle {
                    position: origin,
                    velocity: spread * speed,
                    age: 0.0,
                    lifespan: emitter.lifespan,
                    gravity: emitter.gravity,
                    texture: emitter.texture,
                    instance_id,
                });
            }
        }
    }

    pub fn remove_instance(&mut self, instance_id: u64) {
        self.particles.retain(|p| p.instance_id != instance_id);
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn emitter(rate: f32) -> ParticleEmitterDef {
        ParticleEmitterDef {
            id: 0,
            flags: 0,
            position: Vec3::ZERO,
            bone: 0,
            texture: 3,
            blending_type: 0,
            emitter_type: 1,
            emission_speed: 2.0,
            speed_variation: 0.0,
            gravity: 0.0,
            lifespan: 1.0,
            emission_rate: rate,
        }
    }

    #[test]
    fn emission_respects_cap() {
        let mut system = ParticleSystem::new(10);
        let mut rng = StdRng::seed_from_u64(7);
        let emitters = [emitter(1000.0)];
        let mut accum = [0.0];
        system.emit(&mut rng, 1, &Mat4::IDENTITY, &emitters, &mut accum, 1.0);
        assert_eq!(system.len(), 10);
    }

    #[test]
    fn particles_expire() {
        let mut system = ParticleSystem::new(100);
        let mut rng = StdRng::seed_from_u64(7);
        let emitters = [emitter(5.0)];
        let mut accum = [0.0];
        system.emit(&mut rng, 1, &Mat4::IDENTITY, &emitters, &mut accum, 1.0);
        assert_eq!(system.len(), 5);
        system.update(0.5);
        assert_eq!(system.len(), 5);
        system.update(0.6);
        assert!(system.is_empty());
    }

    #[test]
    fn instance_removal_recalls_its_particles() {
        let mut system = ParticleSystem::new(100);
        let mut rng = StdRng::seed_from_u64(7);
        let emitters = [emitter(3.0)];
        let mut a1 = [0.0];
        let mut a2 = [0.0];
        system.emit(&mut rng, 1, &Mat4::IDENTITY, &emitters, &mut a1, 1.0);
        system.emit(&mut rng, 2, &Mat4::IDENTITY, &emitters, &mut a2, 1.0);
        system.remove_instance(1);
        assert!(system.particles().iter().all(|p| p.instance_id == 2));
    }
}
