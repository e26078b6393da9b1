//! The cell record.
//!
//! Every field is an atomic so the pool can be shared by reference across
//! worker threads. Only the flag word is ever raced on (the removal claim in
//! resolve, see [`Cell::try_claim`]); all other fields have a single writer
//! per phase and use relaxed ordering.

use std::sync::atomic::{AtomicI32, AtomicU16, AtomicU32, AtomicU64, Ordering::Relaxed};

use crate::geometry::{Boost, GridRange, IAabb};

/// Index of a cell in the pool. Stable until the cell is freed.
pub type CellId = u32;

/// Reserved type tags. Anything at or below [`DEAD`] that is not reserved is
/// the id of the owning control.
pub mod kind {
    pub const EJECT_BIT: u16 = 1 << 14;
    pub const PELLET: u16 = (1 << 14) - 1;
    pub const VIRUS: u16 = PELLET - 1;
    pub const DEAD: u16 = VIRUS - 1;
    pub const CYT: u16 = DEAD - 1;
    pub const EXP: u16 = CYT - 1;
    pub const ROCK: u16 = EXP - 1;

    /// Tags that live in the quadtree: player cells and the reserved kinds below pellets.
    #[inline]
    pub fn is_player(tag: u16) -> bool {
        tag <= DEAD
    }

    #[inline]
    pub fn is_perk(tag: u16) -> bool {
        tag == EXP || tag == CYT
    }

    /// Pellets, viruses and ejected cells are grid-indexed.
    #[inline]
    pub fn uses_grid(tag: u16) -> bool {
        tag == PELLET || tag == VIRUS || tag & EJECT_BIT != 0
    }
}

/// Per-cell status bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CellFlags(u16);

impl CellFlags {
    pub const EXIST: Self = Self(0x1);
    /// Position changed this tick.
    pub const UPDATE: Self = Self(0x2);
    /// Fully inside a sibling cell.
    pub const INSIDE: Self = Self(0x4);
    pub const LOCK: Self = Self(0x8);
    pub const REMOVE: Self = Self(0x20);
    pub const MERGE: Self = Self(0x40);
    pub const POP: Self = Self(0x80);
    pub const WALL: Self = Self(0x100);
    pub const COLL: Self = Self(0x200);
    pub const NOEAT: Self = Self(0x400);
    pub const PROT: Self = Self(0x800);

    /// Bits that survive the per-tick reset.
    pub const CLEAR: Self = Self::EXIST;
    /// Cells with any of these bits take no further part in resolve.
    pub const SKIP_RESOLVE: Self = Self(0x4 | 0x20 | 0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }
}

impl std::ops::BitOr for CellFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for CellFlags {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

/// Lifecycle state derived from the flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Free,
    Live,
    /// Claimed for removal, still indexed until compaction.
    Removing,
}

/// Where a cell sits in its spatial index. Which variant is valid follows
/// from the cell's tag (see [`kind::uses_grid`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSlot {
    Box(IAabb),
    Grid(GridRange),
}

#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    #[inline]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Relaxed))
    }

    #[inline]
    pub fn set(&self, v: f64) {
        self.0.store(v.to_bits(), Relaxed);
    }
}

#[derive(Debug, Default)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    #[inline]
    fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Relaxed))
    }

    #[inline]
    fn set(&self, v: f32) {
        self.0.store(v.to_bits(), Relaxed);
    }
}

fn take<'a>(rest: &mut &'a [u8], n: usize) -> &'a [u8] {
    let (head, tail) = rest.split_at(n);
    *rest = tail;
    head
}

/// Size of one serialized cell record.
pub const RECORD_SIZE: usize = 76;

#[derive(Debug, Default)]
pub struct Cell {
    flags: AtomicU16,
    tag: AtomicU16,
    age: AtomicF32,
    x: AtomicF64,
    y: AtomicF64,
    r: AtomicF64,
    eaten_by: AtomicU32,
    boost: [AtomicF64; 3],
    slot: [AtomicI32; 4],
    /// Packed quadtree node handle, 0 when not in the tree.
    node: AtomicU64,
}

impl Cell {
    #[inline]
    pub fn flags(&self) -> CellFlags {
        CellFlags(self.flags.load(Relaxed))
    }

    #[inline]
    pub fn set_flags(&self, f: CellFlags) {
        self.flags.store(f.0, Relaxed);
    }

    #[inline]
    pub fn add_flags(&self, f: CellFlags) {
        self.flags.fetch_or(f.0, Relaxed);
    }

    /// Keep only the bits in `mask`.
    #[inline]
    pub fn retain_flags(&self, mask: CellFlags) {
        self.flags.fetch_and(mask.0, Relaxed);
    }

    /// Atomically set `bits` unless already set. Returns true for exactly
    /// one caller among any number racing on the same cell.
    #[inline]
    pub fn try_claim(&self, bits: CellFlags) -> bool {
        self.flags.fetch_or(bits.0, Relaxed) & bits.0 == 0
    }

    /// Compare-and-swap on the whole flag word.
    #[inline]
    pub fn cas_flags(&self, current: CellFlags, new: CellFlags) -> bool {
        self.flags
            .compare_exchange(current.0, new.0, Relaxed, Relaxed)
            .is_ok()
    }

    #[inline]
    pub fn exists(&self) -> bool {
        self.flags().contains(CellFlags::EXIST)
    }

    pub fn state(&self) -> CellState {
        let f = self.flags();
        if !f.contains(CellFlags::EXIST) {
            CellState::Free
        } else if f.contains(CellFlags::REMOVE) {
            CellState::Removing
        } else {
            CellState::Live
        }
    }

    #[inline]
    pub fn tag(&self) -> u16 {
        self.tag.load(Relaxed)
    }

    #[inline]
    pub fn set_tag(&self, tag: u16) {
        self.tag.store(tag, Relaxed);
    }

    /// Age in milliseconds of simulated time.
    #[inline]
    pub fn age(&self) -> f32 {
        self.age.get()
    }

    #[inline]
    pub fn set_age(&self, age: f32) {
        self.age.set(age);
    }

    #[inline]
    pub fn x(&self) -> f64 {
        self.x.get()
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.y.get()
    }

    #[inline]
    pub fn r(&self) -> f64 {
        self.r.get()
    }

    #[inline]
    pub fn set_x(&self, v: f64) {
        self.x.set(v);
    }

    #[inline]
    pub fn set_y(&self, v: f64) {
        self.y.set(v);
    }

    #[inline]
    pub fn set_r(&self, v: f64) {
        self.r.set(v);
    }

    #[inline]
    pub fn set_pos(&self, x: f64, y: f64) {
        self.x.set(x);
        self.y.set(y);
    }

    /// The cell that ate this one, if any.
    #[inline]
    pub fn eaten_by(&self) -> Option<CellId> {
        match self.eaten_by.load(Relaxed) {
            0 => None,
            n => Some(n - 1),
        }
    }

    #[inline]
    pub fn set_eaten_by(&self, id: CellId) {
        self.eaten_by.store(id + 1, Relaxed);
    }

    #[inline]
    pub fn boost(&self) -> Boost {
        Boost::new(self.boost[0].get(), self.boost[1].get(), self.boost[2].get())
    }

    #[inline]
    pub fn set_boost(&self, b: Boost) {
        self.boost[0].set(b.x);
        self.boost[1].set(b.y);
        self.boost[2].set(b.d);
    }

    /// Current index slot, interpreted by tag.
    pub fn slot(&self) -> IndexSlot {
        let [a, b, c, d] = self.raw_slot();
        if kind::uses_grid(self.tag()) {
            IndexSlot::Grid(GridRange { t: a, b, l: c, r: d })
        } else {
            IndexSlot::Box(IAabb { l: a, r: b, b: c, t: d })
        }
    }

    #[inline]
    fn raw_slot(&self) -> [i32; 4] {
        [0, 1, 2, 3].map(|i| self.slot[i].load(Relaxed))
    }

    #[inline]
    fn store_slot(&self, v: [i32; 4]) {
        for (s, v) in self.slot.iter().zip(v) {
            s.store(v, Relaxed);
        }
    }

    /// Stored box of a tree-indexed cell.
    #[inline]
    pub fn aabb(&self) -> IAabb {
        let [l, r, b, t] = self.raw_slot();
        IAabb { l, r, b, t }
    }

    #[inline]
    pub fn set_aabb(&self, a: IAabb) {
        self.store_slot([a.l, a.r, a.b, a.t]);
    }

    /// Stored bucket range of a grid-indexed cell.
    #[inline]
    pub fn range(&self) -> GridRange {
        let [t, b, l, r] = self.raw_slot();
        GridRange { t, b, l, r }
    }

    #[inline]
    pub fn set_range(&self, g: GridRange) {
        self.store_slot([g.t, g.b, g.l, g.r]);
    }

    /// Box computed from the current position and radius.
    #[inline]
    pub fn to_aabb(&self) -> IAabb {
        IAabb::around(self.x(), self.y(), self.r())
    }

    #[inline]
    pub fn update_aabb(&self) {
        self.set_aabb(self.to_aabb());
    }

    #[inline]
    pub(crate) fn node(&self) -> u64 {
        self.node.load(Relaxed)
    }

    #[inline]
    pub(crate) fn set_node(&self, packed: u64) {
        self.node.store(packed, Relaxed);
    }

    /// Initialise a freshly claimed slot.
    pub fn init(&self, tag: u16, x: f64, y: f64, r: f64) {
        self.set_tag(tag);
        self.set_pos(x, y);
        self.set_r(r);
        self.set_age(0.0);
        self.eaten_by.store(0, Relaxed);
        self.set_boost(Boost::default());
        self.store_slot([0; 4]);
        self.set_node(0);
    }

    /// Zero every field.
    pub fn clear(&self) {
        self.set_flags(CellFlags::empty());
        self.init(0, 0.0, 0.0, 0.0);
    }

    /// Append the fixed-size little-endian record.
    pub fn write_record(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.flags.load(Relaxed).to_le_bytes());
        out.extend_from_slice(&self.tag().to_le_bytes());
        out.extend_from_slice(&self.age().to_le_bytes());
        for v in [self.x(), self.y(), self.r()] {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out.extend_from_slice(&self.eaten_by.load(Relaxed).to_le_bytes());
        for v in self.raw_slot() {
            out.extend_from_slice(&v.to_le_bytes());
        }
        let b = self.boost();
        for v in [b.x, b.y, b.d] {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Load a record written by [`Cell::write_record`]. Returns false if
    /// `rec` is not exactly [`RECORD_SIZE`] bytes.
    pub fn read_record(&self, rec: &[u8]) -> bool {
        if rec.len() != RECORD_SIZE {
            return false;
        }
        let mut rest = rec;
        let u16_at = |s: &[u8]| u16::from_le_bytes([s[0], s[1]]);
        let u32_at = |s: &[u8]| u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
        let f64_at = |s: &[u8]| {
            let mut b = [0u8; 8];
            b.copy_from_slice(s);
            f64::from_le_bytes(b)
        };

        self.flags.store(u16_at(take(&mut rest, 2)), Relaxed);
        self.set_tag(u16_at(take(&mut rest, 2)));
        self.set_age(f32::from_bits(u32_at(take(&mut rest, 4))));
        self.set_x(f64_at(take(&mut rest, 8)));
        self.set_y(f64_at(take(&mut rest, 8)));
        self.set_r(f64_at(take(&mut rest, 8)));
        self.eaten_by.store(u32_at(take(&mut rest, 4)), Relaxed);
        let slot = [0; 4].map(|_| u32_at(take(&mut rest, 4)) as i32);
        self.store_slot(slot);
        let boost = Boost::new(f64_at(take(&mut rest, 8)), f64_at(take(&mut rest, 8)), f64_at(take(&mut rest, 8)));
        self.set_boost(boost);
        self.set_node(0);
        true
    }
}
