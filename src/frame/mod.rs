//! Per-frame orchestration.
//!
//! [`Engine`] owns every live subsystem and advances them in a fixed
//! order each frame, then emits a [`FramePlan`] describing the passes
//! the renderer should record. Simulation never depends on the GPU
//! being present, so the whole update path runs headless in tests.

use crate::assets::AssetSource;
use crate::config::EngineConfig;
use crate::constants::VIEW_DISTANCE;
use crate::entity::EntityStore;
use crate::events::EventBus;
use crate::gpu::shadow::light_space_matrix;
use crate::gpu::{GpuContext, TextureCache};
use crate::player::camera::CameraFrame;
use crate::player::{CollisionWorld, PlayerController, PlayerInput};
use crate::scene::m2::M2Scene;
use crate::scene::wmo::{floor_cache::FloorCache, WmoScene};
use crate::sky::weather::Weather;
use crate::sky::{Sky, SkyParams};
use crate::world::terrain::TerrainScene;
use crate::world::water::WaterScene;
use crate::world::{StreamTargets, Streamer, TileCache};
use crate::zone::ZoneDetector;
use glam::Mat4;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Stages of the main color pass, in draw order. Opaque geometry
/// front-loads the depth buffer; transparents draw late against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainStage {
    SkyDome,
    Stars,
    Celestial,
    Clouds,
    /// Sun flare sprites; present whenever the sun is above the
    /// horizon, intensity in [`FramePlan::lens_flare`].
    LensFlare,
    Terrain,
    WmoGroups,
    M2Instances,
    /// Copy the opaque scene into the history texture feeding water
    /// refraction. Skipped on the first frame, when there is nothing
    /// valid to copy.
    SceneHistoryCapture,
    Water,
    M2Particles,
    WeatherParticles,
    Overlays,
}

/// What the renderer should record this frame. Produced every frame
/// without exception; a frame with nothing visible still presents.
pub struct FramePlan {
    pub shadow_pass: bool,
    pub reflection_pass: bool,
    pub stages: Vec<MainStage>,
    pub light_space: Mat4,
    pub camera: CameraFrame,
    pub sky: SkyParams,
    /// Camera eye is below a liquid surface; the overlay stage should
    /// tint and muffle.
    pub underwater: bool,
    /// Flare intensity for this frame's view, 0 when the stage is
    /// absent or the camera looks away from the sun.
    pub lens_flare: f32,
    /// (instance id, group index) pairs surviving portal and distance
    /// culling this frame.
    pub visible_wmo_groups: Vec<(u64, usize)>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameTimings {
    pub simulation: Duration,
    pub streaming: Duration,
}

/// Top-level client state: all scenes, the streamer, the avatar and
/// the ambient systems, advanced together by [`Engine::frame`].
pub struct Engine {
    pub config: EngineConfig,
    pub terrain: TerrainScene,
    pub wmo: WmoScene,
    pub m2: M2Scene,
    pub water: WaterScene,
    pub streamer: Streamer,
    pub sky: Sky,
    pub weather: Weather,
    pub zone: ZoneDetector,
    pub entities: EntityStore,
    pub events: EventBus,
    pub controller: PlayerController,
    pub gpu: Option<GpuContext>,
    pub textures: Option<TextureCache>,
    pub reflection_enabled: bool,
    timings: FrameTimings,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn AssetSource>,
        map: &str,
        spawn: glam::Vec3,
    ) -> Self {
        let cache = Arc::new(TileCache::new(config.tile_ram_cache_budget));
        let mut streamer = Streamer::new(source, map, cache);
        streamer.set_radii(config.load_radius, config.unload_radius);

        let mut sky = Sky::new();
        sky.procedural_stars = config.procedural_stars;
        sky.moon_phase_cycling = config.moon_phase_cycling;

        let mut wmo = WmoScene::new();
        wmo.set_floor_cache(FloorCache::load(Path::new("cache"), map));

        let mut controller = PlayerController::new(spawn);
        controller.use_wow_speed = config.use_wow_speed;
        controller.camera.invert_mouse = config.invert_mouse;
        controller.camera.sensitivity = config.mouse_sensitivity;
        controller.camera.idle_orbit_timeout = config.idle_orbit_timeout;

        Self {
            config,
            terrain: TerrainScene::new(),
            wmo,
            m2: M2Scene::new(),
            water: WaterScene::new(),
            streamer,
            sky,
            weather: Weather::new(),
            zone: ZoneDetector::new(),
            entities: EntityStore::new(),
            events: EventBus::new(),
            controller,
            gpu: None,
            textures: None,
            reflection_enabled: false,
            timings: FrameTimings::default(),
        }
    }

    /// Attach GPU state. Until this is called the engine simulates but
    /// plans no uploads.
    pub fn attach_gpu(&mut self, mut ctx: GpuContext) {
        ctx.set_msaa_samples(self.config.msaa_samples);
        // One cache, sized to the combined per-scene budgets. Eviction
        // pressure is shared rather than partitioned.
        let budgets = &self.config.texture_budgets;
        let total = budgets.terrain + budgets.wmo + budgets.m2 + budgets.character;
        self.textures = Some(TextureCache::new(&ctx, total));
        self.gpu = Some(ctx);
    }

    pub fn timings(&self) -> FrameTimings {
        self.timings
    }

    /// Advance one frame of simulation and produce the render plan.
    pub fn frame(&mut self, dt: f32, input: &PlayerInput) -> FramePlan {
        let sim_start = Instant::now();
        self.wmo.begin_frame();
        if let Some(gpu) = self.gpu.as_mut() {
            gpu.begin_frame();
        }
        if let Some(textures) = self.textures.as_mut() {
            textures.begin_frame();
        }

        // Avatar and camera first: everything downstream keys off the
        // post-move position.
        let mut world = CollisionWorld {
            terrain: &self.terrain,
            wmo: &mut self.wmo,
            m2: &mut self.m2,
            water: &self.water,
        };
        let camera = self
            .controller
            .update(dt, input, &mut world, &mut self.events);
        let avatar = self.controller.position;

        let stream_start = Instant::now();
        let mut targets = StreamTargets {
            terrain: &mut self.terrain,
            m2: &mut self.m2,
            wmo: &mut self.wmo,
            water: &mut self.water,
            gpu: self.gpu.as_ref(),
            textures: self.textures.as_mut(),
        };
        self.streamer.update(dt, avatar, &mut targets);
        let streaming = stream_start.elapsed();

        self.sky.update(dt);
        let celestial = self.sky.celestial();
        let sky_params = self.sky.params();

        self.zone
            .update(avatar, &self.terrain, &self.wmo, &mut self.events);
        let zone_id = self.zone.current_zone().unwrap_or(0);
        self.weather.update(dt, camera.position, zone_id);

        self.m2.set_collision_focus(avatar, 100.0);
        self.m2.update(dt, camera.position);
        self.entities.update(dt);

        let visible_wmo_groups = self.wmo.visible_groups(camera.position, VIEW_DISTANCE);

        // Sky draws back to front: dome, stars, sun and moons, clouds
        // over them, then the flare sprites.
        let mut stages = vec![MainStage::SkyDome];
        if self.sky.stars_visible() {
            stages.push(MainStage::Stars);
        }
        stages.push(MainStage::Celestial);
        stages.push(MainStage::Clouds);
        let lens_flare = self.sky.lens_flare_strength(camera.forward);
        if celestial.sun_dir.z > 0.0 {
            stages.push(MainStage::LensFlare);
        }
        stages.push(MainStage::Terrain);
        stages.push(MainStage::WmoGroups);
        stages.push(MainStage::M2Instances);
        let has_water = self.water.surface_count() > 0;
        if has_water && self.water.take_history_capture() {
            stages.push(MainStage::SceneHistoryCapture);
        }
        if has_water {
            stages.push(MainStage::Water);
        }
        stages.push(MainStage::M2Particles);
        if !self.weather.particles().is_empty() {
            stages.push(MainStage::WeatherParticles);
        }
        stages.push(MainStage::Overlays);

        let shadow_pass = self.config.shadows_enabled && celestial.sun_dir.z > 0.0;
        let light_space = light_space_matrix(avatar, sky_params.light_direction);
        let underwater = self
            .water
            .water_height_at(camera.position.x, camera.position.y)
            .is_some_and(|h| camera.position.z < h);

        self.timings = FrameTimings {
            simulation: sim_start.elapsed(),
            streaming,
        };
        log::trace!(
            "frame: sim {:?} (stream {:?}), {} wmo groups, {} tiles",
            self.timings.simulation,
            self.timings.streaming,
            visible_wmo_groups.len(),
            self.streamer.loaded_count(),
        );

        FramePlan {
            shadow_pass,
            reflection_pass: self.reflection_enabled && has_water,
            stages,
            light_space,
            camera,
            sky: sky_params,
            underwater,
            lens_flare,
            visible_wmo_groups,
        }
    }

    /// Tear everything down in dependency order: workers first, then
    /// every loaded tile. Safe to call twice.
    pub fn shutdown(&mut self) {
        self.streamer.shutdown();
        let mut targets = StreamTargets {
            terrain: &mut self.terrain,
            m2: &mut self.m2,
            wmo: &mut self.wmo,
            water: &mut self.water,
            gpu: self.gpu.as_ref(),
            textures: self.textures.as_mut(),
        };
        self.streamer.unload_all(&mut targets);
        self.wmo.save_floor_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryArchive;
    use crate::coords::tile_for;
    use crate::parse::adt::test_util::flat_adt;
    use crate::world::prepare::adt_path;

    fn engine_on_flat_map() -> (Engine, glam::Vec3) {
        let anchor = crate::constants::ZERO_POINT - 400.0;
        let spawn = glam::Vec3::new(anchor, anchor, 0.0);
        let coord = tile_for(spawn.x, spawn.y);
        let archive = MemoryArchive::new();
        archive.insert(&adt_path("Azeroth", coord), flat_adt(coord, 0.0));
        let mut config = EngineConfig::default().sanitized();
        config.load_radius = 1;
        config.unload_radius = 2;
        let engine = Engine::new(config, Arc::new(archive), "Azeroth", spawn);
        (engine, spawn)
    }

    #[test]
    fn frame_always_yields_a_plan() {
        let (mut engine, _) = engine_on_flat_map();
        let plan = engine.frame(0.016, &PlayerInput::default());
        // Even with nothing loaded yet the frame presents sky through
        // overlays.
        assert_eq!(plan.stages.first(), Some(&MainStage::SkyDome));
        assert_eq!(plan.stages.last(), Some(&MainStage::Overlays));
        engine.shutdown();
    }

    #[test]
    fn streaming_loads_spawn_tile_through_the_frame_loop() {
        let (mut engine, spawn) = engine_on_flat_map();
        engine.frame(0.05, &PlayerInput::default());
        let mut targets = StreamTargets {
            terrain: &mut engine.terrain,
            m2: &mut engine.m2,
            wmo: &mut engine.wmo,
            water: &mut engine.water,
            gpu: None,
            textures: None,
        };
        engine.streamer.process_all_ready_tiles(&mut targets);
        assert!(engine.streamer.is_loaded(tile_for(spawn.x, spawn.y)));
        assert!(engine.terrain.height_at(spawn.x, spawn.y).is_some());
        engine.shutdown();
    }

    #[test]
    fn stage_order_puts_water_after_opaques() {
        let (mut engine, _) = engine_on_flat_map();
        engine.water.add_surface(crate::world::water::WaterSurface {
            owner: crate::world::water::SurfaceOwner::Tile(tile_for(0.0, 0.0)),
            liquid_type: 0,
            origin: glam::Vec3::new(10.0, 10.0, 1.0),
            step_row: glam::Vec3::new(-1.0, 0.0, 0.0),
            step_col: glam::Vec3::new(0.0, -1.0, 0.0),
            rows: 2,
            cols: 2,
            cell_mask: vec![true; 4],
            heights: vec![1.0; 9],
        });
        // First frame: history invalid, no capture stage.
        let plan = engine.frame(0.016, &PlayerInput::default());
        assert!(!plan.stages.contains(&MainStage::SceneHistoryCapture));
        assert!(plan.stages.contains(&MainStage::Water));

        let plan = engine.frame(0.016, &PlayerInput::default());
        let capture = plan
            .stages
            .iter()
            .position(|s| *s == MainStage::SceneHistoryCapture);
        let water = plan.stages.iter().position(|s| *s == MainStage::Water);
        let terrain = plan.stages.iter().position(|s| *s == MainStage::Terrain);
        assert!(capture.is_some());
        assert!(terrain < capture && capture < water);
        engine.shutdown();
    }

    #[test]
    fn sky_stages_draw_back_to_front() {
        let (mut engine, _) = engine_on_flat_map();
        engine.sky.set_server_time(0.0); // midnight
        let plan = engine.frame(0.016, &PlayerInput::default());
        let pos = |s: MainStage| plan.stages.iter().position(|x| *x == s);
        assert!(pos(MainStage::Stars) < pos(MainStage::Celestial));
        assert!(pos(MainStage::Celestial) < pos(MainStage::Clouds));
        assert!(pos(MainStage::LensFlare).is_none());

        engine
            .sky
            .set_server_time(crate::constants::GAME_DAY_REAL_SECONDS as f64 * 0.5);
        let plan = engine.frame(0.016, &PlayerInput::default());
        let pos = |s: MainStage| plan.stages.iter().position(|x| *x == s);
        assert!(pos(MainStage::Clouds) < pos(MainStage::LensFlare));
        assert!(pos(MainStage::LensFlare) < pos(MainStage::Terrain));
        engine.shutdown();
    }

    #[test]
    fn shadow_pass_follows_the_sun() {
        let (mut engine, _) = engine_on_flat_map();
        engine.sky.set_server_time(0.0); // midnight
        let plan = engine.frame(0.016, &PlayerInput::default());
        assert!(!plan.shadow_pass);

        engine
            .sky
            .set_server_time(crate::constants::GAME_DAY_REAL_SECONDS as f64 * 0.5);
        let plan = engine.frame(0.016, &PlayerInput::default());
        assert!(plan.shadow_pass);
        engine.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (mut engine, _) = engine_on_flat_map();
        engine.frame(0.05, &PlayerInput::default());
        engine.shutdown();
        engine.shutdown();
        assert_eq!(engine.streamer.loaded_count(), 0);
    }
}
