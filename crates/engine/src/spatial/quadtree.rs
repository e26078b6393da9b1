//! Loose quadtree.
//!
//! Nodes live in an arena and are addressed by index. A cell stores a packed
//! `(generation, index)` handle of the node holding it, so a handle to a node
//! that was merged away and reused is detected instead of followed.
//!
//! Each child's bounds extend past its nominal rectangle by `LOOSE` of the
//! parent's half extent. A cell moves down only when its box fits the
//! extended child; otherwise it stays at the ancestor.
//!
//! `insert`, `update`, `remove` and the queries take `&self` and lock only
//! the nodes they touch. Splits and merges happen in [`QuadTree::restructure`],
//! which takes `&mut self` and so never overlaps them.

use std::sync::Mutex;

use tracing::warn;

use crate::cell::{Cell, CellFlags, CellId};
use crate::geometry::{Aabb, IAabb, IRect};
use crate::lock;
use crate::pool::CellPool;

const LOOSE: f64 = 0.25;
const ROOT: u32 = 0;

#[derive(Debug)]
struct Node {
    generation: u32,
    parent: Option<u32>,
    children: Option<[u32; 4]>,
    level: u32,
    rect: IRect,
    items: Mutex<Vec<CellId>>,
}

impl Node {
    fn new(generation: u32, parent: Option<u32>, level: u32, rect: IRect) -> Self {
        Self {
            generation,
            parent,
            children: None,
            level,
            rect,
            items: Mutex::new(Vec::new()),
        }
    }

    #[inline]
    fn loose(&self) -> (f64, f64, f64, f64) {
        let r = &self.rect;
        (
            f64::from(r.x),
            f64::from(r.y),
            f64::from(r.hw) * LOOSE,
            f64::from(r.hh) * LOOSE,
        )
    }

    /// Nominal rectangle of child `q`, in TL, TR, BL, BR order.
    fn child_rect(&self, q: usize) -> IRect {
        let r = &self.rect;
        let (qw, qh) = (r.hw >> 1, r.hh >> 1);
        IRect {
            x: if q & 1 == 0 { r.x - qw } else { r.x + qw },
            y: if q < 2 { r.y + qh } else { r.y - qh },
            hw: qw,
            hh: qh,
        }
    }

    /// Child on the cell's side of the center, if that child holds it.
    fn quadrant(&self, cell: &Cell) -> Option<usize> {
        let row = if cell.y() > f64::from(self.rect.y) { 0 } else { 2 };
        let col = if cell.x() < f64::from(self.rect.x) { 0 } else { 1 };
        let q = row + col;
        holds(&self.child_rect(q), cell).then_some(q)
    }

    /// Children whose loose bounds the box touches.
    fn overlapping(&self, a: &IAabb, out: &mut Vec<u32>) {
        let Some(children) = self.children else {
            return;
        };
        let (x, y, ew, eh) = self.loose();
        let (l, r, b, t) = (f64::from(a.l), f64::from(a.r), f64::from(a.b), f64::from(a.t));
        if t > y - eh {
            if l < x + ew {
                out.push(children[0]);
            }
            if r > x - ew {
                out.push(children[1]);
            }
        }
        if b < y + eh {
            if l < x + ew {
                out.push(children[2]);
            }
            if r > x - ew {
                out.push(children[3]);
            }
        }
    }
}

/// Center inside the nominal rectangle and box inside the loose bounds.
fn holds(rect: &IRect, cell: &Cell) -> bool {
    let inner = IAabb {
        l: rect.x - rect.hw,
        r: rect.x + rect.hw,
        b: rect.y - rect.hh,
        t: rect.y + rect.hh,
    }
    .to_f64();
    inner.contains_point(cell.x(), cell.y()) && rect.loose_aabb(1.0 + 2.0 * LOOSE).contains(&cell.aabb())
}

pub struct QuadTree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    max_level: u32,
    max_items: usize,
    /// Shallowest level whose items a cell at level `i` still has to see.
    min_level: Vec<i32>,
}

#[inline]
fn pack(generation: u32, index: u32) -> u64 {
    (u64::from(generation) << 32) | u64::from(index)
}

impl QuadTree {
    pub fn new(rect: IRect, max_level: u32, max_items: u32) -> Self {
        let min_level = (0..=max_level)
            .map(|i| ((LOOSE / (LOOSE + 1.0)).log2() + f64::from(i)) as i32)
            .collect();
        Self {
            nodes: vec![Node::new(1, None, 0, rect)],
            free: Vec::new(),
            max_level,
            max_items: max_items as usize,
            min_level,
        }
    }

    /// Node holding the cell, if its handle is current.
    fn node_of(&self, cell: &Cell) -> Option<u32> {
        let packed = cell.node();
        if packed == 0 {
            return None;
        }
        let (generation, index) = ((packed >> 32) as u32, packed as u32);
        match self.nodes.get(index as usize) {
            Some(node) if node.generation == generation => Some(index),
            _ => {
                warn!("Stale quadtree node handle {:#x}", packed);
                None
            }
        }
    }

    #[inline]
    fn handle(&self, index: u32) -> u64 {
        pack(self.nodes[index as usize].generation, index)
    }

    fn descend(&self, mut index: u32, cell: &Cell) -> u32 {
        loop {
            let node = &self.nodes[index as usize];
            match node.children.zip(node.quadrant(cell)) {
                Some((children, q)) => index = children[q],
                None => return index,
            }
        }
    }

    pub fn insert(&self, id: CellId, cell: &Cell) {
        let index = self.descend(ROOT, cell);
        cell.set_node(self.handle(index));
        lock(&self.nodes[index as usize].items).push(id);
    }

    /// Re-home a cell after it moved or grew.
    pub fn update(&self, id: CellId, cell: &Cell) {
        let Some(old) = self.node_of(cell) else {
            self.insert(id, cell);
            return;
        };

        let mut index = old;
        while let Some(parent) = self.nodes[index as usize].parent {
            index = parent;
            if holds(&self.nodes[index as usize].rect, cell) {
                break;
            }
        }
        let index = self.descend(index, cell);
        if index == old {
            return;
        }

        {
            let mut items = lock(&self.nodes[old as usize].items);
            if let Some(pos) = items.iter().position(|&other| other == id) {
                items.remove(pos);
            }
        }
        lock(&self.nodes[index as usize].items).push(id);
        cell.set_node(self.handle(index));
    }

    pub fn remove(&self, id: CellId, cell: &Cell) {
        if let Some(index) = self.node_of(cell) {
            let mut items = lock(&self.nodes[index as usize].items);
            if let Some(pos) = items.iter().position(|&other| other == id) {
                items.remove(pos);
            }
        }
        cell.set_node(0);
    }

    /// Put `new` in the slot `old` occupies without touching the structure.
    pub fn swap(&self, old_id: CellId, old: &Cell, new_id: CellId, new: &Cell) {
        let Some(index) = self.node_of(old) else {
            self.insert(new_id, new);
            return;
        };
        new.set_node(old.node());
        old.set_node(0);
        let mut items = lock(&self.nodes[index as usize].items);
        if let Some(slot) = items.iter_mut().find(|other| **other == old_id) {
            *slot = new_id;
        }
    }

    /// Drop removed items, then split full nodes and merge empty ones.
    pub fn restructure(&mut self, pool: &CellPool) {
        self.restructure_node(ROOT, pool);
    }

    fn restructure_node(&mut self, index: u32, pool: &CellPool) {
        lock(&self.nodes[index as usize].items).retain(|&id| !pool.get(id).flags().contains(CellFlags::REMOVE));

        self.split(index, pool);
        if let Some(children) = self.nodes[index as usize].children {
            for child in children {
                self.restructure_node(child, pool);
            }
        }
        self.merge(index);
    }

    fn split(&mut self, index: u32, pool: &CellPool) {
        let node = &self.nodes[index as usize];
        if node.children.is_some()
            || lock(&node.items).len() < self.max_items
            || node.level >= self.max_level
        {
            return;
        }

        let level = node.level;
        let rects = [0, 1, 2, 3].map(|q| node.child_rect(q));
        let children = rects.map(|r| self.alloc_node(index, level + 1, r));
        self.nodes[index as usize].children = Some(children);

        let items = std::mem::take(&mut *lock(&self.nodes[index as usize].items));
        let mut kept = Vec::with_capacity(items.len());
        for id in items {
            let cell = pool.get(id);
            match self.nodes[index as usize].quadrant(cell) {
                Some(q) => {
                    let child = children[q];
                    lock(&self.nodes[child as usize].items).push(id);
                    cell.set_node(self.handle(child));
                }
                None => kept.push(id),
            }
        }
        *lock(&self.nodes[index as usize].items) = kept;
    }

    fn merge(&mut self, index: u32) {
        let Some(children) = self.nodes[index as usize].children else {
            return;
        };
        let busy = children.iter().any(|&c| {
            let child = &self.nodes[c as usize];
            child.children.is_some() || !lock(&child.items).is_empty()
        });
        if busy {
            return;
        }
        self.nodes[index as usize].children = None;
        for child in children {
            self.free_node(child);
        }
    }

    fn alloc_node(&mut self, parent: u32, level: u32, rect: IRect) -> u32 {
        match self.free.pop() {
            Some(index) => {
                let node = &mut self.nodes[index as usize];
                node.parent = Some(parent);
                node.children = None;
                node.level = level;
                node.rect = rect;
                index
            }
            None => {
                self.nodes.push(Node::new(1, Some(parent), level, rect));
                (self.nodes.len() - 1) as u32
            }
        }
    }

    fn free_node(&mut self, index: u32) {
        let node = &mut self.nodes[index as usize];
        node.generation = node.generation.wrapping_add(1).max(1);
        node.items.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
        if let Some(children) = node.children.take() {
            for child in children {
                self.free_node(child);
            }
        }
        self.free.push(index);
    }

    /// Drop every node and item.
    pub fn clear(&mut self) {
        if let Some(children) = self.nodes[ROOT as usize].children.take() {
            for child in children {
                self.free_node(child);
            }
        }
        let root = &mut self.nodes[ROOT as usize];
        root.generation = root.generation.wrapping_add(1).max(1);
        root.items.get_mut().unwrap_or_else(std::sync::PoisonError::into_inner).clear();
    }

    /// Visit items near `cell` with the level of the node holding them.
    ///
    /// With `use_min_level`, items at leaf nodes shallower than the
    /// threshold for the cell's own level are skipped; anything that large
    /// would already hold the cell at a shallower node.
    pub fn query(&self, id: CellId, cell: &Cell, use_min_level: bool, mut cb: impl FnMut(CellId, u32)) {
        let min_level = if use_min_level {
            self.node_of(cell)
                .map(|i| self.min_level[self.nodes[i as usize].level as usize])
                .unwrap_or(-1)
        } else {
            -1
        };

        let aabb = cell.aabb();
        let mut stack = vec![ROOT];
        let mut scratch = Vec::new();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            node.overlapping(&aabb, &mut stack);

            if node.children.is_some() || node.level as i32 > min_level {
                scratch.clear();
                scratch.extend_from_slice(&lock(&node.items));
                for &other in &scratch {
                    if other != id {
                        cb(other, node.level);
                    }
                }
            }
        }
    }

    /// Visit items whose box intersects `aabb`. Subtrees entirely inside the
    /// box are emitted without further tests.
    pub fn query_box(&self, pool: &CellPool, aabb: &Aabb, mut cb: impl FnMut(CellId)) {
        let query = aabb.to_int();
        let mut stack = vec![ROOT];
        let mut scratch = Vec::new();
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if aabb.contains_box(&node.rect.loose_aabb(1.0 + 2.0 * LOOSE).to_f64()) {
                let mut inner = vec![index];
                while let Some(i) = inner.pop() {
                    let n = &self.nodes[i as usize];
                    if let Some(children) = n.children {
                        inner.extend_from_slice(&children);
                    }
                    scratch.clear();
                    scratch.extend_from_slice(&lock(&n.items));
                    scratch.iter().for_each(|&other| cb(other));
                }
                continue;
            }

            node.overlapping(&query, &mut stack);
            scratch.clear();
            scratch.extend_from_slice(&lock(&node.items));
            for &other in &scratch {
                if aabb.intersects(&pool.get(other).aabb().to_f64()) {
                    cb(other);
                }
            }
        }
    }

    /// Whether no indexed box intersects `aabb`.
    pub fn is_safe(&self, pool: &CellPool, aabb: &Aabb) -> bool {
        let query = aabb.to_int();
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            node.overlapping(&query, &mut stack);
            if lock(&node.items)
                .iter()
                .any(|&other| pool.get(other).aabb().to_f64().intersects(aabb))
            {
                return false;
            }
        }
        true
    }

    /// Item count per depth, truncated to `levels` entries.
    pub fn histogram(&self, levels: usize) -> Vec<u32> {
        let mut out = vec![0u32; levels];
        let target = levels.min(self.max_level as usize + 1);
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            let level = node.level as usize;
            if level < target {
                out[level] += lock(&node.items).len() as u32;
            }
            if level + 1 < target {
                if let Some(children) = node.children {
                    stack.extend_from_slice(&children);
                }
            }
        }
        out
    }

    /// Depth of the node holding the cell.
    pub fn level_of(&self, cell: &Cell) -> Option<u32> {
        self.node_of(cell).map(|i| self.nodes[i as usize].level)
    }

    /// Whether the cell sits as deep as it can: its node holds it and no
    /// child of that node would.
    #[cfg(test)]
    fn is_placed(&self, cell: &Cell) -> bool {
        let Some(index) = self.node_of(cell) else {
            return false;
        };
        let node = &self.nodes[index as usize];
        (index == ROOT || holds(&node.rect, cell)) && (node.children.is_none() || node.quadrant(cell).is_none())
    }
}

impl std::fmt::Debug for QuadTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuadTree")
            .field("nodes", &(self.nodes.len() - self.free.len()))
            .field("max_level", &self.max_level)
            .finish()
    }
}
