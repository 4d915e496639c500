//! Server-driven entity store.
//!
//! Entities arrive from update packets keyed by GUID. Fields are the
//! sparse u16-indexed u32 values the update protocol carries; movement
//! is interpolated toward the last server position with a snap when
//! the target is implausible.

use glam::Vec3;
use rustc_hash::FxHashMap;

/// Interpolation rate toward the server position, 1/s.
const LERP_RATE: f32 = 8.0;
/// Beyond this, interpolation snaps (teleport, spawn).
const SNAP_DISTANCE: f32 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Player,
    Creature,
    GameObject,
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub guid: u64,
    pub kind: EntityKind,
    pub name: String,
    pub position: Vec3,
    pub yaw: f32,
    /// Display model path, when known.
    pub model_path: Option<String>,
    target_position: Vec3,
    fields: FxHashMap<u16, u32>,
}

impl Entity {
    pub fn new(guid: u64, kind: EntityKind, position: Vec3) -> Self {
        Self {
            guid,
            kind,
            name: String::new(),
            position,
            yaw: 0.0,
            model_path: None,
            target_position: position,
            fields: FxHashMap::default(),
        }
    }

    pub fn field(&self, index: u16) -> Option<u32> {
        self.fields.get(&index).copied()
    }

    pub fn set_field(&mut self, index: u16, value: u32) {
        self.fields.insert(index, value);
    }

    /// New authoritative position; interpolated toward unless the jump
    /// is implausible or non-finite, then snapped.
    pub fn set_target_position(&mut self, target: Vec3) {
        if !target.is_finite() {
            return;
        }
        if (target - self.position).length() > SNAP_DISTANCE {
            self.position = target;
        }
        self.target_position = target;
    }

    fn update(&mut self, dt: f32) {
        let step = (LERP_RATE * dt).min(1.0);
        self.position += (self.target_position - self.position) * step;
    }
}

#[derive(Default)]
pub struct EntityStore {
    entities: FxHashMap<u64, Entity>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Insert, replacing any previous entity under the same GUID.
    pub fn add(&mut self, entity: Entity) {
        self.entities.insert(entity.guid, entity);
    }

    /// Idempotent removal.
    pub fn remove(&mut self, guid: u64) {
        self.entities.remove(&guid);
    }

    pub fn get(&self, guid: u64) -> Option<&Entity> {
        self.entities.get(&guid)
    }

    pub fn get_mut(&mut self, guid: u64) -> Option<&mut Entity> {
        self.entities.get_mut(&guid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn update(&mut self, dt: f32) {
        for entity in self.entities.values_mut() {
            entity.update(dt);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_replaces_and_remove_is_idempotent() {
        let mut store = EntityStore::new();
        let mut a = Entity::new(7, EntityKind::Creature, Vec3::ZERO);
        a.name = "Wolf".into();
        store.add(a);
        let mut b = Entity::new(7, EntityKind::Creature, Vec3::ONE);
        b.name = "Worg".into();
        store.add(b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(7).unwrap().name, "Worg");

        store.remove(7);
        store.remove(7);
        assert!(store.is_empty());
    }

    #[test]
    fn movement_lerps_and_snaps() {
        let mut store = EntityStore::new();
        store.add(Entity::new(1, EntityKind::Player, Vec3::ZERO));

        // Close target: interpolated, not instant.
        store.get_mut(1).unwrap().set_target_position(Vec3::new(2.0, 0.0, 0.0));
        store.update(0.05);
        let x = store.get(1).unwrap().position.x;
        assert!(x > 0.0 && x < 2.0);

        // Teleport-scale target: snapped.
        store
            .get_mut(1)
            .unwrap()
            .set_target_position(Vec3::new(500.0, 0.0, 0.0));
        assert_eq!(store.get(1).unwrap().position.x, 500.0);
    }

    #[test]
    fn non_finite_targets_are_ignored() {
        let mut entity = Entity::new(1, EntityKind::Creature, Vec3::ONE);
        entity.set_target_position(Vec3::new(f32::NAN, 0.0, 0.0));
        assert_eq!(entity.target_position, Vec3::ONE);
    }

    #[test]
    fn sparse_fields() {
        let mut entity = Entity::new(1, EntityKind::Player, Vec3::ZERO);
        entity.set_field(0x17, 1234);
        assert_eq!(entity.field(0x17), Some(1234));
        assert_eq!(entity.field(0x18), None);
    }
}
