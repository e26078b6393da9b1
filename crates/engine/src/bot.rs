//! Bot decision making.
//!
//! Bots act at most once per cooldown. Each action only writes the bot's own
//! control (mouse, split and eject requests), so every bot can run on a
//! different worker.

use std::f64::consts::TAU;

use rand::Rng;

use crate::config::BotAi;
use crate::control::Control;
use crate::geometry::Point;
use crate::pool::CellPool;

const SECOND: f64 = 1e9;
const BUSY_USAGE: f64 = 0.75;
const BUSY_WAIT: f64 = 10.0;
const WANDER_DIST: f64 = 5000.0;

/// World state a bot decides on.
#[derive(Debug, Clone, Copy)]
pub struct BotContext<'a> {
    pub now: u64,
    /// Busy fraction of the last tick.
    pub usage: f64,
    pub ai: &'a BotAi,
    pub spawn_size: f64,
    pub min_eject_size: f64,
    pub max_cells: u32,
    pub bot_mass: f64,
    pub player_mass: f64,
    /// Ignore the spawn mass cap.
    pub always_spawn: bool,
}

/// Random-walk bot with splits, solotricks and center feeding.
#[derive(Debug, Clone, Default)]
pub struct BotBrain {
    next_action: u64,
}

impl BotBrain {
    #[inline]
    pub fn next_action(&self) -> u64 {
        self.next_action
    }

    fn wait(&mut self, now: u64, seconds: f64) {
        self.next_action = now + (SECOND * seconds) as u64;
    }

    pub fn on_tick(
        &mut self,
        ctx: &BotContext<'_>,
        control: &mut Control,
        pool: &CellPool,
        rng: &mut impl Rng,
        kills: &mut Vec<(u16, bool)>,
    ) {
        if ctx.now < self.next_action {
            return;
        }
        if ctx.usage > BUSY_USAGE {
            self.wait(ctx.now, BUSY_WAIT);
            return;
        }

        let ai = ctx.ai;
        let respawn_thresh = ctx.spawn_size * ctx.spawn_size * 0.002;

        if !control.alive || control.score < respawn_thresh {
            if !ctx.always_spawn && ai.spawn_max > 0.0 && ctx.bot_mass + ctx.player_mass * 0.25 > ai.spawn_max {
                self.wait(ctx.now, BUSY_WAIT);
                return;
            }
            control.request_spawn(kills);
            self.wait(ctx.now, ai.respawn_cd);
            return;
        }

        let max_splits = (if ai.split_max_cell > 0 { ai.split_max_cell } else { ctx.max_cells }) as usize;
        let can_eject = control
            .cells
            .iter()
            .filter(|&&id| pool.get(id).r() > ctx.min_eject_size)
            .count();

        if can_eject > ai.center_feed_eject as usize {
            control.eject_macro = true;
            control.mouse = Point::new(control.viewport.x, control.viewport.y);
            self.wait(ctx.now, ai.idle_time);
            return;
        }

        control.eject_macro = false;
        let chance: f64 = rng.random_range(0.0..100.0);

        if control.cells.len() < ai.solotrick_max_cell as usize
            && control.score < ai.solotrick_mass
            && chance < ai.solotrick_chance
        {
            control.eject_macro = true;
            control.splits = 8;
            self.wait(ctx.now, ai.solotrick_cd);
            return;
        }

        if control.cells.len() < max_splits && chance > 100.0 - ai.split_chance {
            control.mouse = wander(control, rng);
            control.splits = u16::from(rng.random_range(0..=ai.max_split_attempt));
            self.wait(ctx.now, ai.split_cd);
            return;
        }

        let chance = (chance - ai.solotrick_chance) / (100.0 - ai.solotrick_chance - ai.split_chance);
        let move_chance = (ai.move_mass - control.score) / ai.move_mass;
        control.mouse = if ai.move_mass > 0.0 && chance > move_chance {
            wander(control, rng)
        } else {
            Point::new(control.viewport.x, control.viewport.y)
        };
        self.wait(ctx.now, ai.idle_time);
    }
}

/// A point far away from the viewport center in a random direction.
fn wander(control: &Control, rng: &mut impl Rng) -> Point {
    let angle: f64 = rng.random_range(0.0..TAU);
    Point::new(
        control.viewport.x + WANDER_DIST * angle.sin(),
        control.viewport.y + WANDER_DIST * angle.cos(),
    )
}

/// A rock crossing the map. It respawns once it reaches its target point.
#[derive(Debug, Clone, Default)]
pub struct RockBrain;

impl RockBrain {
    pub fn on_tick(&mut self, control: &mut Control, pool: &CellPool, kills: &mut Vec<(u16, bool)>) {
        let arrived = match control.cells.first() {
            None => true,
            Some(&id) => {
                let cell = pool.get(id);
                let (dx, dy) = (control.mouse.x - cell.x(), control.mouse.y - cell.y());
                dx * dx + dy * dy < cell.r() * cell.r()
            }
        };
        if arrived {
            control.request_spawn(kills);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn ctx(ai: &BotAi) -> BotContext<'_> {
        BotContext {
            now: 5_000_000_000,
            usage: 0.1,
            ai,
            spawn_size: 500.0,
            min_eject_size: 60.0,
            max_cells: 16,
            bot_mass: 0.0,
            player_mass: 0.0,
            always_spawn: false,
        }
    }

    fn alive_bot(pool: &CellPool, radii: &[f64]) -> Control {
        let mut c = Control::new(4, 4000.0);
        for (i, &r) in radii.iter().enumerate() {
            let id = pool.alloc(4, i as f64 * 100.0, 0.0, r);
            pool.get(id).update_aabb();
            c.cells.push(id);
        }
        c.alive = true;
        c.calculate_viewport(pool, 4000.0, 1.0);
        c
    }

    #[test]
    fn test_dead_bot_requests_spawn() {
        let ai = BotAi::default();
        let pool = CellPool::new(4);
        let mut brain = BotBrain::default();
        let mut control = Control::new(4, 4000.0);
        let mut kills = Vec::new();
        let mut rng = StdRng::seed_from_u64(1);

        brain.on_tick(&ctx(&ai), &mut control, &pool, &mut rng, &mut kills);
        assert!(control.spawning);
        assert!(kills.is_empty());
        assert_eq!(brain.next_action(), 6_000_000_000);

        control.spawning = false;
        brain.on_tick(&ctx(&ai), &mut control, &pool, &mut rng, &mut kills);
        assert!(!control.spawning);
    }

    #[test]
    fn test_spawn_mass_cap_and_busy_wait() {
        let ai = BotAi {
            spawn_max: 1000.0,
            ..BotAi::default()
        };
        let pool = CellPool::new(4);
        let mut control = Control::new(4, 4000.0);
        let mut kills = Vec::new();
        let mut rng = StdRng::seed_from_u64(2);

        let mut brain = BotBrain::default();
        let mut c = ctx(&ai);
        c.bot_mass = 2000.0;
        brain.on_tick(&c, &mut control, &pool, &mut rng, &mut kills);
        assert!(!control.spawning);
        assert_eq!(brain.next_action(), 15_000_000_000);

        let mut brain = BotBrain::default();
        c.usage = 0.9;
        c.bot_mass = 0.0;
        brain.on_tick(&c, &mut control, &pool, &mut rng, &mut kills);
        assert!(!control.spawning);
        assert_eq!(brain.next_action(), 15_000_000_000);
    }

    #[test]
    fn test_center_feed_with_many_cells() {
        let ai = BotAi::default();
        let pool = CellPool::new(8);
        let mut control = alive_bot(&pool, &[300.0, 300.0, 300.0, 300.0]);
        let mut kills = Vec::new();
        let mut rng = StdRng::seed_from_u64(3);
        control.mouse = Point::new(9000.0, 9000.0);

        BotBrain::default().on_tick(&ctx(&ai), &mut control, &pool, &mut rng, &mut kills);
        assert!(control.eject_macro);
        assert_eq!(control.mouse, Point::new(control.viewport.x, control.viewport.y));
    }

    #[test]
    fn test_forced_split_targets_far_point() {
        let ai = BotAi {
            solotrick_chance: 0.0,
            split_chance: 100.0,
            max_split_attempt: 3,
            ..BotAi::default()
        };
        let pool = CellPool::new(8);
        let mut control = alive_bot(&pool, &[400.0]);
        let mut kills = Vec::new();
        let mut rng = StdRng::seed_from_u64(4);

        let mut brain = BotBrain::default();
        brain.on_tick(&ctx(&ai), &mut control, &pool, &mut rng, &mut kills);
        assert!(control.splits <= 3);
        let d = control.mouse - Point::new(control.viewport.x, control.viewport.y);
        assert!((d.length() - WANDER_DIST).abs() < 1e-6);
        assert_eq!(brain.next_action(), 8_000_000_000);
    }

    #[test]
    fn test_rock_respawns_on_arrival() {
        let pool = CellPool::new(4);
        let mut kills = Vec::new();
        let mut control = Control::new(7, 1000.0);
        RockBrain.on_tick(&mut control, &pool, &mut kills);
        assert!(control.spawning);

        let mut control = alive_bot(&pool, &[1000.0]);
        control.mouse = Point::new(-20000.0, 0.0);
        RockBrain.on_tick(&mut control, &pool, &mut kills);
        assert!(!control.spawning);

        control.mouse = Point::new(500.0, 0.0);
        RockBrain.on_tick(&mut control, &pool, &mut kills);
        assert!(control.spawning);
        assert_eq!(kills, vec![(4, true)]);
    }
}
