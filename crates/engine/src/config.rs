//! Engine configuration.
//!
//! `config.toml` has two sections: `[server]` for the driver and `[mode]`
//! for a partial override of the selected mode preset. Every field of
//! [`ModeConfig`] can be overridden; omitted fields keep the preset value.
//!
//! Durations are milliseconds of simulated time unless a field says seconds.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::EngineError;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Overrides applied on top of the preset named by `server.mode`.
    #[serde(default)]
    pub mode: toml::Table,
}

impl Config {
    /// Load configuration from `config.toml` or write and use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&contents)?)
        } else {
            info!("No {} found, creating default config", path.display());
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// Resolve the mode preset and apply the `[mode]` overrides.
    pub fn mode_config(&self) -> Result<ModeConfig, EngineError> {
        let preset = ModeConfig::preset(&self.server.mode)
            .ok_or_else(|| EngineError::UnknownMode(self.server.mode.clone()))?;

        let mut resolved = if self.mode.is_empty() {
            preset
        } else {
            let mut base = toml::Value::try_from(&preset).map_err(|e| EngineError::Config(e.to_string()))?;
            if let toml::Value::Table(table) = &mut base {
                overlay(table, &self.mode);
            }
            base.try_into::<ModeConfig>()
                .map_err(|e| EngineError::Config(e.to_string()))?
        };

        resolved.name = self.server.mode.clone();
        resolved.validate()?;
        Ok(resolved)
    }
}

fn overlay(base: &mut toml::Table, over: &toml::Table) {
    for (key, value) in over {
        match (base.get_mut(key), value) {
            (Some(toml::Value::Table(inner)), toml::Value::Table(patch)) => overlay(inner, patch),
            _ => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Driver settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Mode preset name.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Ticks per second.
    #[serde(default = "default_tick_rate")]
    pub tick_rate: u32,
    /// Worker threads for the parallel phases. 0 runs every phase inline.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Snapshot restored on start and written on shutdown.
    #[serde(default)]
    pub save_path: Option<PathBuf>,
    /// Seed for the engine RNG. Random when unset.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            tick_rate: default_tick_rate(),
            workers: default_workers(),
            save_path: None,
            seed: None,
        }
    }
}

fn default_mode() -> String {
    "ffa".to_string()
}
fn default_tick_rate() -> u32 {
    25
}
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Full option table for one game mode.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ModeConfig {
    pub name: String,
    pub world: WorldConfig,
    pub spawn: SpawnConfig,
    pub perk: PerkConfig,
    pub pellet: PelletConfig,
    pub virus: VirusConfig,
    pub boost: BoostConfig,
    pub player: PlayerConfig,
    pub decay: DecayConfig,
    pub eject: EjectConfig,
    pub eat: EatConfig,
    pub bot: BotConfig,
}

/// Map, budget and index sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorldConfig {
    pub cell_limit: usize,
    pub map_hw: f64,
    pub map_hh: f64,
    pub time_scale: f64,
    pub strict_border: bool,
    pub dual_enabled: bool,
    pub grid_pellet_size: u32,
    pub grid_hazard_size: u32,
    pub quadtree_max_level: u32,
    pub quadtree_max_items: u32,
    /// Fraction of the map area a single control may cover before the world restarts.
    pub restart_mult: f64,
    /// Kill the oversized control instead of restarting the world.
    pub kill_oversize: bool,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            cell_limit: 65536,
            map_hw: 20000.0,
            map_hh: 20000.0,
            time_scale: 1.0,
            strict_border: false,
            dual_enabled: true,
            grid_pellet_size: 512,
            grid_hazard_size: 512,
            quadtree_max_level: 16,
            quadtree_max_items: 16,
            restart_mult: 0.75,
            kill_oversize: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub max_virus_per_tick: u32,
    pub max_pellet_per_tick: u32,
    pub max_tries: u32,
    pub player_can_spawn: bool,
    pub player_safe_radius: f64,
    pub virus_safe_radius: f64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            max_virus_per_tick: 1,
            max_pellet_per_tick: 100,
            max_tries: 128,
            player_can_spawn: true,
            player_safe_radius: 1.5,
            virus_safe_radius: 25.0,
        }
    }
}

/// Periodic EXP/CYT perk cells.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PerkConfig {
    /// Seconds between perk spawns.
    pub interval: f64,
    pub min_perk_size: f64,
    pub max_cyt_cells: usize,
    pub max_exp_cells: usize,
    pub cyt_size: f64,
    pub exp_size: f64,
}

impl Default for PerkConfig {
    fn default() -> Self {
        Self {
            interval: 15.0,
            min_perk_size: 10000.0,
            max_cyt_cells: 1,
            max_exp_cells: 1,
            cyt_size: 750.0,
            exp_size: 750.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PelletConfig {
    pub count: u32,
    pub size: f64,
}

impl Default for PelletConfig {
    fn default() -> Self {
        Self { count: 1, size: 10.0 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VirusConfig {
    pub count: u32,
    pub size: f64,
    /// Fed viruses above this radius split. 0 disables.
    pub split_size: f64,
    pub max_size: f64,
    pub push_boost: f64,
    pub split_boost: f64,
    pub max_boost: f64,
    pub explode: bool,
    pub monotone_pop: bool,
}

impl Default for VirusConfig {
    fn default() -> Self {
        Self {
            count: 10,
            size: 100.0,
            split_size: 150.0,
            max_size: 1500.0,
            push_boost: 780.0,
            split_boost: 850.0,
            max_boost: 1000.0,
            explode: false,
            monotone_pop: false,
        }
    }
}

/// Boost decay model.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BoostConfig {
    pub new_algo: bool,
    pub factor: f64,
    pub amount: f64,
    pub delay: f64,
    pub multi: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            new_algo: false,
            factor: 1.0,
            amount: 1.0,
            delay: 1.0,
            multi: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub speed: f64,
    /// Seconds a dead control waits before it may respawn.
    pub spawn_delay: f64,
    pub autosplit_size: f64,
    pub autosplit_delay: f64,
    pub max_cells: u32,
    pub spawn_size: f64,
    pub split_boost: f64,
    pub split_dist: f64,
    pub split_cap_t1: f64,
    pub split_cap_t2: f64,
    pub max_boost: f64,
    pub min_split_size: f64,
    pub min_eject_size: f64,
    pub normalize_thresh_mass: f64,
    pub no_merge_delay: f64,
    pub no_colli_delay: f64,
    pub no_eject_delay: f64,
    pub no_eject_pop_delay: f64,
    pub merge_time: f64,
    pub merge_increase: f64,
    pub merge_new_ver: bool,
    pub view_scale: f64,
    pub view_min: f64,
    pub dead_delay: f64,
    pub ultra_merge: bool,
    pub ultra_merge_delay: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            speed: 1.5,
            spawn_delay: 0.75,
            autosplit_size: 1500.0,
            autosplit_delay: 100.0,
            max_cells: 16,
            spawn_size: 500.0,
            split_boost: 800.0,
            split_dist: 40.0,
            split_cap_t1: 50000.0,
            split_cap_t2: 20000.0,
            max_boost: 1000.0,
            min_split_size: 60.0,
            min_eject_size: 60.0,
            normalize_thresh_mass: 0.0,
            no_merge_delay: 650.0,
            no_colli_delay: 600.0,
            no_eject_delay: 200.0,
            no_eject_pop_delay: 500.0,
            merge_time: 1.0,
            merge_increase: 1.0,
            merge_new_ver: true,
            view_scale: 1.0,
            view_min: 4000.0,
            dead_delay: 5000.0,
            ultra_merge: false,
            ultra_merge_delay: 150.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecayConfig {
    pub local_rate: f64,
    pub static_rate: f64,
    pub global_rate: f64,
    /// Cells at or below this radius never decay.
    pub min_radius: f64,
    /// Seconds without splitting before the anti-camp penalty starts.
    pub anti_camp_time: f64,
    pub anti_camp_mass: f64,
    pub anti_camp_mult: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            local_rate: 1.0,
            static_rate: 1.0,
            global_rate: 1.0,
            min_radius: 1000.0,
            anti_camp_time: 0.0,
            anti_camp_mass: 0.0,
            anti_camp_mult: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EjectConfig {
    pub dispersion: f64,
    pub size: f64,
    pub loss: f64,
    pub boost: f64,
    pub delay: f64,
    pub max_age: f64,
}

impl Default for EjectConfig {
    fn default() -> Self {
        Self {
            dispersion: 0.3,
            size: 38.0,
            loss: 43.0,
            boost: 780.0,
            delay: 100.0,
            max_age: 10000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EatConfig {
    pub overlap: f64,
    pub mult: f64,
    pub fast_boost_radius: f64,
    pub fast_merge_mass: f64,
}

impl Default for EatConfig {
    fn default() -> Self {
        Self {
            overlap: 3.0,
            mult: 1.140175425099138,
            fast_boost_radius: 0.0,
            fast_merge_mass: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BotConfig {
    pub count: u32,
    pub spawn_size: f64,
    pub ai: BotAi,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            count: 1,
            spawn_size: 500.0,
            ai: BotAi::default(),
        }
    }
}

/// Bot decision tunables. Times are seconds, chances are percentages.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BotAi {
    pub respawn_cd: f64,
    pub solotrick_mass: f64,
    pub spawn_max: f64,
    pub move_mass: f64,
    pub idle_time: f64,
    pub solotrick_chance: f64,
    pub split_chance: f64,
    pub solotrick_cd: f64,
    pub split_cd: f64,
    pub split_max_cell: u32,
    pub center_feed_eject: u32,
    pub solotrick_max_cell: u32,
    pub max_split_attempt: u8,
}

impl Default for BotAi {
    fn default() -> Self {
        Self {
            respawn_cd: 1.0,
            solotrick_mass: 40000.0,
            spawn_max: 0.0,
            move_mass: 15000.0,
            idle_time: 1.0,
            solotrick_chance: 10.0,
            split_chance: 10.0,
            solotrick_cd: 5.0,
            split_cd: 3.0,
            split_max_cell: 0,
            center_feed_eject: 3,
            solotrick_max_cell: 20,
            max_split_attempt: 3,
        }
    }
}

impl ModeConfig {
    /// Names accepted by [`ModeConfig::preset`].
    pub const PRESETS: [&'static str; 7] = ["ffa", "instant", "mega", "omega", "sf", "ultra", "rockslide"];

    pub fn preset(name: &str) -> Option<Self> {
        let mut config = match name {
            "ffa" => Self::ffa(),
            "instant" => Self::instant(),
            "mega" => Self::mega(),
            "omega" => Self::omega(),
            "sf" => Self::sf(),
            "ultra" => Self::ultra(),
            "rockslide" => Self::rockslide(),
            _ => return None,
        };
        config.name = name.to_string();
        Some(config)
    }

    /// Shared by the larger presets: 1.2x time, 18/20 quadtree, 64 spawn tries.
    fn large_map(cell_limit: usize, half: f64, grid: u32) -> Self {
        let mut c = Self::default();
        c.world = WorldConfig {
            cell_limit,
            map_hw: half,
            map_hh: half,
            time_scale: 1.2,
            grid_pellet_size: grid,
            grid_hazard_size: grid,
            quadtree_max_level: 18,
            quadtree_max_items: 20,
            ..WorldConfig::default()
        };
        c.spawn.max_tries = 64;
        c.spawn.virus_safe_radius = 10.0;
        c
    }

    pub fn ffa() -> Self {
        let mut c = Self::large_map(65536, 16000.0, 128);
        c.perk = PerkConfig {
            interval: 30.0,
            max_cyt_cells: 5,
            max_exp_cells: 5,
            cyt_size: 250.0,
            exp_size: 250.0,
            ..PerkConfig::default()
        };
        c.pellet = PelletConfig { count: 10000, size: 30.0 };
        c.virus = VirusConfig {
            count: 100,
            max_size: 2500.0,
            push_boost: 0.0,
            ..VirusConfig::default()
        };
        c.player = PlayerConfig {
            speed: 1.0,
            spawn_size: 250.0,
            split_dist: 70.0,
            merge_time: 5.0,
            view_scale: 1.5,
            ..PlayerConfig::default()
        };
        c.decay.local_rate = 2.0;
        c.decay.static_rate = 2.0;
        c.decay.min_radius = 100.0;
        c.eject = EjectConfig {
            dispersion: 0.0,
            size: 39.0,
            loss: 42.2,
            delay: 110.0,
            ..EjectConfig::default()
        };
        c.bot = BotConfig {
            count: 50,
            spawn_size: 500.0,
            ai: BotAi {
                solotrick_mass: 0.0,
                spawn_max: 1000000.0,
                idle_time: 2.5,
                solotrick_chance: 0.0,
                split_chance: 3.0,
                split_cd: 15.0,
                split_max_cell: 4,
                center_feed_eject: 6,
                max_split_attempt: 2,
                ..BotAi::default()
            },
        };
        c
    }

    pub fn instant() -> Self {
        let mut c = Self::large_map(65536, 16000.0, 64);
        c.perk = PerkConfig {
            interval: 30.0,
            max_cyt_cells: 5,
            max_exp_cells: 5,
            cyt_size: 250.0,
            exp_size: 250.0,
            ..PerkConfig::default()
        };
        c.pellet = PelletConfig { count: 1000, size: 50.0 };
        c.virus = VirusConfig {
            count: 30,
            max_size: 2500.0,
            push_boost: 0.0,
            split_boost: 0.0,
            ..VirusConfig::default()
        };
        c.player = PlayerConfig {
            speed: 1.2,
            max_cells: 64,
            spawn_size: 300.0,
            split_dist: 50.0,
            min_split_size: 100.0,
            no_merge_delay: 1150.0,
            merge_time: 0.0,
            view_scale: 1.5,
            ..PlayerConfig::default()
        };
        c.decay.local_rate = 1.25;
        c.decay.static_rate = 1.25;
        c.decay.min_radius = 100.0;
        c.eject = EjectConfig {
            size: 39.0,
            loss: 42.2,
            delay: 180.0,
            ..EjectConfig::default()
        };
        c.bot = BotConfig {
            count: 50,
            spawn_size: 500.0,
            ai: BotAi {
                spawn_max: 200000.0,
                solotrick_chance: 0.0,
                split_chance: 20.0,
                solotrick_cd: 2.0,
                split_cd: 1.5,
                center_feed_eject: 100,
                max_split_attempt: 64,
                ..BotAi::default()
            },
        };
        c
    }

    pub fn mega() -> Self {
        let mut c = Self::large_map(131072, 25000.0, 128);
        c.perk = PerkConfig {
            min_perk_size: 50000.0,
            max_cyt_cells: 5,
            max_exp_cells: 5,
            ..PerkConfig::default()
        };
        c.pellet = PelletConfig { count: 5000, size: 30.0 };
        c.virus = VirusConfig {
            count: 75,
            size: 200.0,
            split_size: 0.0,
            max_size: 2500.0,
            split_boost: 700.0,
            explode: true,
            monotone_pop: true,
            ..VirusConfig::default()
        };
        c.boost = BoostConfig {
            new_algo: true,
            factor: 1.2,
            amount: 2.0,
            delay: 0.75,
            multi: 0.75,
        };
        c.player = PlayerConfig {
            autosplit_size: 0.0,
            max_cells: 64,
            spawn_size: 400.0,
            split_boost: 700.0,
            split_dist: 40.0,
            max_boost: 700.0,
            min_split_size: 150.0,
            no_colli_delay: 540.0,
            no_eject_delay: 200.0,
            merge_time: 5.0,
            view_scale: 1.35,
            ..PlayerConfig::default()
        };
        c.decay.local_rate = 1.1;
        c.decay.static_rate = 1.1;
        c.decay.global_rate = 3.0;
        c.decay.min_radius = 500.0;
        c.eject = EjectConfig {
            dispersion: 0.0,
            size: 44.0,
            loss: 44.2,
            delay: 50.0,
            ..EjectConfig::default()
        };
        c.eat.fast_boost_radius = 2500.0;
        c.eat.fast_merge_mass = 80000.0;
        c.bot = BotConfig {
            count: 100,
            spawn_size: 800.0,
            ai: BotAi {
                spawn_max: 1000000.0,
                move_mass: 150000.0,
                ..BotAi::default()
            },
        };
        c
    }

    pub fn omega() -> Self {
        let mut c = Self::large_map(262144, 30000.0, 128);
        c.spawn.virus_safe_radius = 5.0;
        c.perk = PerkConfig {
            interval: 10.0,
            min_perk_size: 25000.0,
            max_cyt_cells: 20,
            max_exp_cells: 20,
            cyt_size: 500.0,
            exp_size: 500.0,
        };
        c.pellet = PelletConfig { count: 10000, size: 20.0 };
        c.virus = VirusConfig {
            count: 40,
            size: 250.0,
            split_size: 0.0,
            max_size: 2500.0,
            split_boost: 700.0,
            monotone_pop: true,
            ..VirusConfig::default()
        };
        c.boost = BoostConfig {
            new_algo: true,
            factor: 1.1,
            amount: 0.75,
            delay: 1.5,
            multi: 0.75,
        };
        c.player = PlayerConfig {
            speed: 1.25,
            spawn_delay: 0.5,
            autosplit_size: 0.0,
            max_cells: 420,
            spawn_size: 500.0,
            split_boost: 700.0,
            split_dist: 10.0,
            split_cap_t1: 100000.0,
            split_cap_t2: 75000.0,
            max_boost: 750.0,
            min_split_size: 105.0,
            no_colli_delay: 560.0,
            no_eject_delay: 200.0,
            view_scale: 1.25,
            ..PlayerConfig::default()
        };
        c.decay = DecayConfig {
            local_rate: 4.0,
            static_rate: 2.5,
            global_rate: 5.0,
            min_radius: 500.0,
            anti_camp_time: 1.0,
            anti_camp_mass: 50000.0,
            anti_camp_mult: 0.05,
        };
        c.eject = EjectConfig {
            size: 40.0,
            loss: 38.5,
            delay: 100.0,
            ..EjectConfig::default()
        };
        c.eat = EatConfig {
            overlap: 3.5,
            mult: 1.135,
            fast_boost_radius: 2500.0,
            fast_merge_mass: 0.0,
        };
        c.bot = BotConfig {
            count: 400,
            spawn_size: 400.0,
            ai: BotAi {
                solotrick_mass: 50000.0,
                spawn_max: 3000000.0,
                move_mass: 150000.0,
                idle_time: 2.5,
                solotrick_chance: 15.0,
                split_chance: 10.0,
                center_feed_eject: 20,
                max_split_attempt: 4,
                ..BotAi::default()
            },
        };
        c
    }

    fn sf_ai() -> BotAi {
        BotAi {
            solotrick_mass: 4000000.0,
            spawn_max: 2000000.0,
            solotrick_chance: 20.0,
            split_chance: 10.0,
            solotrick_cd: 2.0,
            split_cd: 2.0,
            center_feed_eject: 10,
            ..BotAi::default()
        }
    }

    pub fn sf() -> Self {
        let mut c = Self::large_map(65536, 32000.0, 64);
        c.world.dual_enabled = false;
        c.perk = PerkConfig {
            interval: 20.0,
            min_perk_size: 250000.0,
            max_cyt_cells: 3,
            max_exp_cells: 3,
            cyt_size: 2500.0,
            exp_size: 2500.0,
        };
        c.pellet = PelletConfig { count: 1000, size: 100.0 };
        c.virus = VirusConfig {
            count: 0,
            max_size: 2500.0,
            split_boost: 0.0,
            ..VirusConfig::default()
        };
        c.player = PlayerConfig {
            speed: 3.0,
            autosplit_size: 0.0,
            max_cells: 256,
            spawn_size: 1000.0,
            split_dist: 50.0,
            min_split_size: 200.0,
            min_eject_size: 70.0,
            no_merge_delay: 1000.0,
            merge_time: 0.0,
            view_scale: 1.5,
            ..PlayerConfig::default()
        };
        c.decay.local_rate = 1.25;
        c.decay.static_rate = 1.25;
        c.decay.min_radius = 100.0;
        c.eject = EjectConfig {
            size: 60.0,
            loss: 50.2,
            delay: 100.0,
            ..EjectConfig::default()
        };
        c.bot = BotConfig {
            count: 5,
            spawn_size: 1000.0,
            ai: Self::sf_ai(),
        };
        c
    }

    pub fn ultra() -> Self {
        let mut c = Self::large_map(65536, 24000.0, 64);
        c.world.dual_enabled = false;
        c.perk = PerkConfig {
            interval: 30.0,
            min_perk_size: 250000.0,
            max_cyt_cells: 1,
            max_exp_cells: 1,
            cyt_size: 1500.0,
            exp_size: 1500.0,
        };
        c.pellet = PelletConfig { count: 1000, size: 100.0 };
        c.virus = VirusConfig {
            count: 5,
            size: 400.0,
            split_size: 500.0,
            push_boost: 0.0,
            ..VirusConfig::default()
        };
        c.player = PlayerConfig {
            speed: 2.0,
            autosplit_size: 0.0,
            max_cells: 256,
            spawn_size: 2000.0,
            split_dist: 20.0,
            min_split_size: 250.0,
            min_eject_size: 70.0,
            no_merge_delay: 1100.0,
            no_colli_delay: 500.0,
            merge_time: 1.0,
            view_scale: 1.75,
            ultra_merge: true,
            ultra_merge_delay: 50.0,
            ..PlayerConfig::default()
        };
        c.decay.local_rate = 1.1;
        c.decay.static_rate = 1.1;
        c.decay.min_radius = 100.0;
        c.eject = EjectConfig {
            size: 50.0,
            loss: 50.2,
            delay: 200.0,
            ..EjectConfig::default()
        };
        c.bot = BotConfig {
            count: 40,
            spawn_size: 1500.0,
            ai: Self::sf_ai(),
        };
        c
    }

    /// Instant physics with short-lived ejecta.
    pub fn rockslide() -> Self {
        let mut c = Self::instant();
        c.eject.max_age = 1000.0;
        c
    }

    /// Reject tables the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let w = &self.world;
        if w.grid_pellet_size == 0 || w.grid_hazard_size == 0 {
            return Err(EngineError::Config("grid dimensions must be non-zero".into()));
        }
        if w.cell_limit == 0 {
            return Err(EngineError::Config("cell_limit must be non-zero".into()));
        }
        if !(w.map_hw > 0.0 && w.map_hh > 0.0) {
            return Err(EngineError::Config("map half-extents must be positive".into()));
        }
        if self.pellet.count as usize >= w.cell_limit {
            return Err(EngineError::Config(format!(
                "pellet count {} leaves no room in a cell limit of {}",
                self.pellet.count, w.cell_limit
            )));
        }
        if w.quadtree_max_items == 0 {
            return Err(EngineError::Config("quadtree_max_items must be non-zero".into()));
        }
        Ok(())
    }

    /// Mass a single control may reach before the world restarts.
    pub fn restart_score(&self) -> f64 {
        self.world.map_hw * self.world.map_hh / 100.0 * self.world.restart_mult
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_preset_validates() {
        for name in ModeConfig::PRESETS {
            let config = ModeConfig::preset(name).unwrap();
            assert_eq!(config.name, name);
            config.validate().unwrap();
        }
        assert!(ModeConfig::preset("teams").is_none());
    }

    #[test]
    fn test_ultra_uses_sf_ai() {
        assert_eq!(ModeConfig::ultra().bot.ai.split_chance, ModeConfig::sf().bot.ai.split_chance);
        assert_eq!(ModeConfig::rockslide().eject.max_age, 1000.0);
    }

    #[test]
    fn test_partial_override_keeps_preset_values() {
        let config: Config = toml::from_str(
            r#"
            [server]
            mode = "omega"

            [mode.player]
            speed = 9.0

            [mode.bot]
            count = 0
            "#,
        )
        .unwrap();
        let mode = config.mode_config().unwrap();
        assert_eq!(mode.player.speed, 9.0);
        assert_eq!(mode.player.max_cells, 420);
        assert_eq!(mode.bot.count, 0);
        assert_eq!(mode.bot.ai.solotrick_mass, 50000.0);
        assert_eq!(mode.world.cell_limit, 262144);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let mut config = Config::default();
        config.server.mode = "battle-royale".into();
        assert!(matches!(config.mode_config(), Err(EngineError::UnknownMode(_))));
    }

    #[test]
    fn test_validate_rejects_pellet_overflow() {
        let mut mode = ModeConfig::ffa();
        mode.world.cell_limit = 100;
        assert!(matches!(mode.validate(), Err(EngineError::Config(_))));
        mode.world.cell_limit = 20000;
        mode.world.grid_pellet_size = 0;
        assert!(mode.validate().is_err());
    }

    #[test]
    fn test_default_config_serializes() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.mode, "ffa");
        assert_eq!(back.server.tick_rate, 25);
    }
}
