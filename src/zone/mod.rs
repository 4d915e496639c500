//! Zone detection and music selection.
//!
//! The terrain chunk under the avatar carries an area id; standing
//! inside certain buildings overrides it (an inn keeps its own zone
//! regardless of the tile it sits on). Zone changes emit an event and
//! ask the music picker for a crossfade target.

use crate::events::{EventBus, GameEvent};
use crate::parse::dbc::Table;
use crate::scene::wmo::WmoScene;
use crate::world::terrain::TerrainScene;
use glam::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone)]
pub struct ZoneInfo {
    pub name: String,
    pub music_tracks: Vec<String>,
}

#[derive(Default)]
pub struct ZoneDetector {
    zones: FxHashMap<u32, ZoneInfo>,
    /// Building model id to the zone it claims while the avatar is
    /// inside it.
    wmo_overrides: FxHashMap<u64, u32>,
    current: Option<u32>,
    rng: Option<StdRng>,
}

impl ZoneDetector {
    pub fn new() -> Self {
        Self {
            rng: Some(StdRng::seed_from_u64(0x20e)),
            ..Self::default()
        }
    }

    pub fn register_zone(&mut self, zone_id: u32, info: ZoneInfo) {
        self.zones.insert(zone_id, info);
    }

    /// Seed zone names from AreaTable.dbc. Column 0 is the area id,
    /// column 11 the first localized name. Music comes from separate
    /// registration, so registered zones keep their tracks.
    pub fn register_from_area_table(&mut self, table: &Table) {
        for row in 0..table.rows() {
            let Some(id) = table.u32(row, 0) else { continue };
            let Some(name) = table.string(row, 11) else {
                continue;
            };
            self.zones
                .entry(id)
                .or_insert_with(|| ZoneInfo {
                    name: String::new(),
                    music_tracks: Vec::new(),
                })
                .name = name.to_string();
        }
    }

    pub fn register_wmo_override(&mut self, model_id: u64, zone_id: u32) {
        self.wmo_overrides.insert(model_id, zone_id);
    }

    pub fn current_zone(&self) -> Option<u32> {
        self.current
    }

    pub fn zone_name(&self, zone_id: u32) -> Option<&str> {
        self.zones.get(&zone_id).map(|z| z.name.as_str())
    }

    /// Resolve the zone at `pos` without mutating detector state.
    pub fn zone_at(&self, pos: Vec3, terrain: &TerrainScene, wmo: &WmoScene) -> Option<u32> {
        if let Some((instance_id, _, _)) = wmo.containing_group(pos) {
            if let Some(inst) = wmo.instance(instance_id) {
                if let Some(&zone) = self.wmo_overrides.get(&inst.model_id) {
                    return Some(zone);
                }
            }
        }
        terrain.area_id_at(pos.x, pos.y)
    }

    /// Per-frame detection; emits `ZoneEntered` and a music crossfade
    /// on change.
    pub fn update(
        &mut self,
        pos: Vec3,
        terrain: &TerrainScene,
        wmo: &WmoScene,
        events: &mut EventBus,
    ) {
        let Some(zone_id) = self.zone_at(pos, terrain, wmo) else {
            return;
        };
        if self.current == Some(zone_id) {
            return;
        }
        self.current = Some(zone_id);

        let (name, track) = match self.zones.get(&zone_id) {
            Some(info) => {
                let track = match (&mut self.rng, info.music_tracks.as_slice()) {
                    (Some(rng), tracks) if !tracks.is_empty() => {
                        Some(tracks[rng.gen_range(0..tracks.len())].clone())
                    }
                    _ => None,
                };
                (info.name.clone(), track)
            }
            None => (format!("zone {zone_id}"), None),
        };

        events.emit(GameEvent::ZoneEntered { zone_id, name });
        if let Some(track) = track {
            events.emit(GameEvent::MusicCrossfade { track });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::terrain::{build_tile_meshes, test_util};

    fn terrain_with_area() -> (TerrainScene, f32, f32) {
        let anchor = crate::constants::ZERO_POINT - 100.0;
        let coord = crate::coords::tile_for(anchor - 10.0, anchor - 10.0);
        let tile = test_util::flat_tile(coord, Vec3::new(anchor, anchor, 0.0), 0);
        let mut scene = TerrainScene::new();
        scene.insert_tile(coord, build_tile_meshes(&tile));
        (scene, anchor - 10.0, anchor - 10.0)
    }

    #[test]
    fn zone_change_fires_once_with_music() {
        let (terrain, x, y) = terrain_with_area();
        let wmo = WmoScene::new();
        let mut detector = ZoneDetector::new();
        detector.register_zone(
            12,
            ZoneInfo {
                name: "Elwynn Forest".into(),
                music_tracks: vec!["music\\elwynn_day.mp3".into()],
            },
        );
        let mut events = EventBus::new();
        let pos = Vec3::new(x, y, 0.0);
        detector.update(pos, &terrain, &wmo, &mut events);
        detector.update(pos, &terrain, &wmo, &mut events);

        let log = events.take_log();
        assert_eq!(log.len(), 2);
        assert!(matches!(
            &log[0],
            GameEvent::ZoneEntered { zone_id: 12, name } if name == "Elwynn Forest"
        ));
        assert!(matches!(&log[1], GameEvent::MusicCrossfade { .. }));
        assert_eq!(detector.current_zone(), Some(12));
    }

    #[test]
    fn area_table_names_merge_with_registered_music() {
        let mut detector = ZoneDetector::new();
        detector.register_zone(
            12,
            ZoneInfo {
                name: String::new(),
                music_tracks: vec!["music\\elwynn_day.mp3".into()],
            },
        );
        // Row layout: id at 0, name offset at column 11.
        let mut row = vec![12u32; 12];
        row[11] = 1; // offset of "Elwynn Forest" in the string block
        let bytes = crate::parse::dbc::test_util::build_table(&[row], b"\0Elwynn Forest\0");
        let table = crate::parse::dbc::parse_table(&bytes).unwrap();
        detector.register_from_area_table(&table);

        assert_eq!(detector.zone_name(12), Some("Elwynn Forest"));
        assert_eq!(
            detector.zones.get(&12).map(|z| z.music_tracks.len()),
            Some(1)
        );
    }

    #[test]
    fn unknown_zone_still_announces() {
        let (terrain, x, y) = terrain_with_area();
        let wmo = WmoScene::new();
        let mut detector = ZoneDetector::new();
        let mut events = EventBus::new();
        detector.update(Vec3::new(x, y, 0.0), &terrain, &wmo, &mut events);
        let log = events.take_log();
        assert_eq!(log.len(), 1);
        assert!(matches!(&log[0], GameEvent::ZoneEntered { zone_id: 12, .. }));
    }
}
