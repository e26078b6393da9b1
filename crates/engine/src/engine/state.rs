//! Snapshots: save the pool, restore it and rebuild everything derived.

use std::sync::Arc;

use bytes::Bytes;
use protocol::{ProtocolError, SaveEnvelope};
use tracing::{debug, info, warn};

use super::Engine;
use crate::cell::{CellFlags, CellId, RECORD_SIZE, kind};
use crate::error::EngineError;
use crate::geometry::Point;
use crate::handle::HandleKind;

impl Engine {
    /// Snapshot every pool slot plus the bot control ids.
    pub fn save(&mut self) -> SaveEnvelope {
        self.remove_cells();

        let bot_ids = self
            .bots
            .iter()
            .filter_map(|id| self.handles.get(id)?.control)
            .collect();
        let cells = self.world.pool.cells();
        let mut pool = Vec::with_capacity(cells.len() * RECORD_SIZE);
        for cell in cells {
            cell.write_record(&mut pool);
        }

        debug!("Saved {} cells, {} bots", self.world.pool.count(), self.bots.len());
        SaveEnvelope {
            mode: self.mode.name().to_owned(),
            bot_ids,
            pool: pool.into(),
            ext: Bytes::new(),
        }
    }

    /// Decode and restore a snapshot. A malformed one leaves an empty world.
    pub fn restore_bytes(&mut self, data: impl Into<Bytes>) -> Result<(), EngineError> {
        match SaveEnvelope::decode(data) {
            Ok(save) => self.restore(&save),
            Err(e) => {
                self.reset();
                Err(e.into())
            }
        }
    }

    /// Replace the world with a snapshot of the same mode. Saved records
    /// beyond this pool's capacity are dropped.
    pub fn restore(&mut self, save: &SaveEnvelope) -> Result<(), EngineError> {
        self.remove_cells();
        let current = self.mode.name().to_owned();
        if save.mode != current {
            return Err(EngineError::ModeMismatch {
                requested: save.mode.clone(),
                current,
            });
        }

        self.reset();
        let mode = Arc::clone(&self.mode);
        for &id in &save.bot_ids {
            mode.create_bot(self, Some(id));
        }
        if !mode.restores_state() {
            self.restart();
            info!("Restored {} bots ({} mode keeps no world state)", save.bot_ids.len(), current);
            return Ok(());
        }

        let trailing = save.pool.len() % RECORD_SIZE;
        if trailing != 0 {
            self.reset();
            return Err(ProtocolError::TrailingBytes(trailing).into());
        }
        let saved = save.pool.len() / RECORD_SIZE;
        let capacity = self.world.pool.capacity();
        if saved != capacity {
            warn!("Pool size changed ({} -> {})", saved, capacity);
        }

        for (cell, rec) in self.world.pool.cells().iter().zip(save.pool.chunks_exact(RECORD_SIZE)) {
            cell.read_record(rec);
        }
        self.sync_state();
        info!("Restored {} cells, {} bots", self.world.pool.count(), self.bots.len());
        Ok(())
    }

    /// Drop every bot and restart. Players stay, with fresh view caches.
    pub fn reset(&mut self) {
        for id in self.bots.clone() {
            self.remove_handle(id);
        }
        self.controls.retain(|_, c| c.handle.is_some());
        for h in self.handles.values_mut() {
            if let HandleKind::Player(view) = &mut h.kind {
                view.clear_cache();
            }
        }
        self.restart();
    }

    /// Rebuild lists, indices and controls from the pool contents.
    pub(crate) fn sync_state(&mut self) {
        self.reset_world(false);
        let Engine { world, controls, handles, bots, ejected, viruses, dead, exps, cyts, .. } = self;

        for (i, cell) in world.pool.cells().iter().enumerate() {
            let id = i as CellId;
            let f = cell.flags();
            let tag = cell.tag();
            if f.contains(CellFlags::REMOVE) || !f.contains(CellFlags::EXIST) || tag == 0 {
                cell.clear();
                continue;
            }

            match tag {
                kind::PELLET => {
                    world.pellets.insert(id, cell);
                    continue;
                }
                kind::VIRUS => {
                    viruses.push(id);
                    world.hazards.insert(id, cell);
                    continue;
                }
                t if t & kind::EJECT_BIT != 0 => {
                    ejected.push(id);
                    world.hazards.insert(id, cell);
                    continue;
                }
                kind::CYT => cyts.push(id),
                kind::EXP => exps.push(id),
                kind::DEAD => dead.push(id),
                t => match controls.get_mut(&t) {
                    Some(c) => c.cells.push(id),
                    None => {
                        cell.set_tag(kind::DEAD);
                        dead.push(id);
                    }
                },
            }
            cell.update_aabb();
            world.tree.insert(id, cell);
        }
        world.pool.recount();
        world.tree.restructure(&world.pool);

        let p = &world.config.player;
        for c in controls.values_mut() {
            c.calculate_viewport(&world.pool, p.view_min, p.view_scale);
            c.alive = !c.cells.is_empty();
        }
        for id in bots.iter() {
            let Some(c) = handles.get(id).and_then(|h| h.control).and_then(|cid| controls.get_mut(&cid)) else {
                continue;
            };
            c.mouse = Point::new(c.viewport.x, c.viewport.y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{bot, place, quiet_engine};
    use super::*;
    use crate::geometry::Boost;

    /// A bot with two cells, a pellet, a virus and a remnant.
    fn populated() -> (Engine, u16) {
        let mut e = quiet_engine(|_| {});
        let (_, cid) = bot(&mut e);
        place(&mut e, cid, 1000.0, 1000.0, 300.0);
        place(&mut e, cid, 1500.0, 1000.0, 200.0);

        let pellet = e.world.pool.alloc(kind::PELLET, -2000.0, 0.0, 30.0);
        e.world.pellets.insert(pellet, e.world.pool.get(pellet));
        let virus = e.world.new_virus(0.0, -2000.0, Boost::default());
        e.viruses.push(virus);
        let remnant = e.world.pool.alloc(kind::DEAD, 2000.0, 2000.0, 150.0);
        e.world.pool.get(remnant).update_aabb();
        e.world.tree.insert(remnant, e.world.pool.get(remnant));
        e.dead.push(remnant);
        (e, cid)
    }

    #[test]
    fn test_save_restore_rebuilds_world() {
        let (mut a, cid) = populated();
        let bytes = a.save().encode();

        let mut b = quiet_engine(|_| {});
        b.restore_bytes(bytes).unwrap();

        assert_eq!(b.bots().len(), 1);
        assert_eq!(b.handles[&b.bots()[0]].control, Some(cid));
        let c = &b.controls[&cid];
        assert!(c.alive);
        assert_eq!(c.cells.len(), 2);
        assert_eq!((c.mouse.x, c.mouse.y), (c.viewport.x, c.viewport.y));
        assert_eq!(b.world.pellets.len(), 1);
        assert_eq!(b.viruses.len(), 1);
        assert_eq!(b.dead.len(), 1);
        assert_eq!(b.world.pool.count(), 5);
        assert_eq!(b.tree_histogram().iter().sum::<u32>(), 3);
    }

    #[test]
    fn test_orphaned_cells_become_remnants() {
        let (mut a, _) = populated();
        let mut save = a.save();
        save.bot_ids.clear();

        let mut b = quiet_engine(|_| {});
        b.restore(&save).unwrap();
        assert!(b.bots().is_empty());
        assert_eq!(b.dead.len(), 3);
        assert!(b.dead.iter().all(|&id| b.world.pool.get(id).tag() == kind::DEAD));
    }

    #[test]
    fn test_mode_mismatch_is_rejected() {
        let (mut a, _) = populated();
        let save = a.save();

        let mut b = quiet_engine(|c| c.name = "instant".into());
        let (_, keep) = bot(&mut b);
        let err = b.restore(&save).unwrap_err();
        assert!(matches!(err, EngineError::ModeMismatch { ref requested, ref current } if requested == "ffa" && current == "instant"));
        assert!(b.controls.contains_key(&keep));
        assert_eq!(b.bots().len(), 1);
    }

    #[test]
    fn test_ragged_pool_resets_engine() {
        let (mut a, _) = populated();
        let mut save = a.save();
        save.pool = save.pool.slice(..RECORD_SIZE * 2 + 3);

        let mut b = quiet_engine(|_| {});
        let err = b.restore(&save).unwrap_err();
        assert!(matches!(err, EngineError::Protocol(ProtocolError::TrailingBytes(3))));
        assert!(b.bots().is_empty());
        assert_eq!(b.world.pool.count(), 0);
    }

    #[test]
    fn test_garbage_bytes_reset_engine() {
        let mut b = quiet_engine(|_| {});
        bot(&mut b);
        assert!(b.restore_bytes(vec![0u8, 5]).is_err());
        assert!(b.bots().is_empty());
    }
}
