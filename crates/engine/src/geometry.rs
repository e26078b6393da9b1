//! Boxes, rectangles and boost vectors.
//!
//! All boxes use a y-up convention: `b` is the low edge, `t` the high edge.
//! `contains` and `intersects` are strict.

pub use glam::DVec2 as Point;

/// Axis-aligned box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Aabb {
    pub l: f64,
    pub r: f64,
    pub b: f64,
    pub t: f64,
}

impl Aabb {
    #[inline]
    pub fn intersects(&self, o: &Aabb) -> bool {
        self.l < o.r && self.r > o.l && self.t > o.b && self.b < o.t
    }

    #[inline]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.l < x && self.r > x && self.t > y && self.b < y
    }

    #[inline]
    pub fn contains_box(&self, o: &Aabb) -> bool {
        self.l < o.l && self.r > o.r && self.t > o.t && self.b < o.b
    }

    /// Smallest box containing both.
    #[inline]
    pub fn union(&self, o: &Aabb) -> Aabb {
        Aabb {
            l: self.l.min(o.l),
            r: self.r.max(o.r),
            b: self.b.min(o.b),
            t: self.t.max(o.t),
        }
    }

    /// Overlap of both boxes. May be inverted when they do not touch.
    #[inline]
    pub fn clip(&self, o: &Aabb) -> Aabb {
        Aabb {
            l: self.l.max(o.l),
            r: self.r.min(o.r),
            b: self.b.max(o.b),
            t: self.t.min(o.t),
        }
    }

    #[inline]
    pub fn area(&self) -> f64 {
        (self.r - self.l) * (self.t - self.b)
    }

    /// Truncating conversion, matching how cell boxes are stored.
    #[inline]
    pub fn to_int(&self) -> IAabb {
        IAabb {
            l: self.l as i32,
            r: self.r as i32,
            b: self.b as i32,
            t: self.t as i32,
        }
    }
}

/// Integer box stored on tree-indexed cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IAabb {
    pub l: i32,
    pub r: i32,
    pub b: i32,
    pub t: i32,
}

impl IAabb {
    #[inline]
    pub fn around(x: f64, y: f64, r: f64) -> Self {
        Self {
            l: (x - r) as i32,
            r: (x + r) as i32,
            b: (y - r) as i32,
            t: (y + r) as i32,
        }
    }

    #[inline]
    pub fn intersects(&self, o: &IAabb) -> bool {
        self.l < o.r && self.r > o.l && self.t > o.b && self.b < o.t
    }

    #[inline]
    pub fn contains(&self, o: &IAabb) -> bool {
        self.l < o.l && self.r > o.r && self.t > o.t && self.b < o.b
    }

    #[inline]
    pub fn to_f64(&self) -> Aabb {
        Aabb {
            l: f64::from(self.l),
            r: f64::from(self.r),
            b: f64::from(self.b),
            t: f64::from(self.t),
        }
    }
}

/// Center plus half extents.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub hw: f64,
    pub hh: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, hw: f64, hh: f64) -> Self {
        Self { x, y, hw, hh }
    }

    #[inline]
    pub fn to_aabb(&self) -> Aabb {
        Aabb {
            l: self.x - self.hw,
            r: self.x + self.hw,
            b: self.y - self.hh,
            t: self.y + self.hh,
        }
    }

    /// Same center, extents multiplied by `factor`.
    #[inline]
    pub fn scaled(&self, factor: f64) -> Rect {
        Rect::new(self.x, self.y, self.hw * factor, self.hh * factor)
    }
}

/// Integer rectangle used for quadtree nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IRect {
    pub x: i32,
    pub y: i32,
    pub hw: i32,
    pub hh: i32,
}

impl IRect {
    /// Box of this rectangle with extents scaled by `factor`, truncated.
    #[inline]
    pub fn loose_aabb(&self, factor: f64) -> IAabb {
        let hw = (f64::from(self.hw) * factor) as i32;
        let hh = (f64::from(self.hh) * factor) as i32;
        IAabb {
            l: self.x - hw,
            r: self.x + hw,
            b: self.y - hh,
            t: self.y + hh,
        }
    }
}

/// Inclusive bucket range of a grid-indexed cell. `t` is the lowest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridRange {
    pub t: i32,
    pub b: i32,
    pub l: i32,
    pub r: i32,
}

/// Unit direction plus magnitude that decays every tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Boost {
    pub x: f64,
    pub y: f64,
    pub d: f64,
}

impl Boost {
    pub const fn new(x: f64, y: f64, d: f64) -> Self {
        Self { x, y, d }
    }

    /// Rescale `x`/`y` to a unit vector, storing the old length in `d`.
    /// A zero vector stays zero.
    #[inline]
    pub fn normalize(&mut self) {
        self.d = self.x.hypot(self.y);
        if self.d == 0.0 {
            return;
        }
        self.x /= self.d;
        self.y /= self.d;
    }

    /// Vector sum of both boosts.
    #[inline]
    pub fn add(&mut self, o: &Boost) {
        self.x = self.x * self.d + o.x * o.d;
        self.y = self.y * self.d + o.y * o.d;
        self.normalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_strict() {
        let outer = IAabb { l: 0, r: 10, b: 0, t: 10 };
        assert!(outer.contains(&IAabb { l: 1, r: 9, b: 1, t: 9 }));
        assert!(!outer.contains(&IAabb { l: 0, r: 9, b: 1, t: 9 }));
        assert!(!outer.intersects(&IAabb { l: 10, r: 20, b: 0, t: 10 }));
    }

    #[test]
    fn test_union_and_clip() {
        let a = Aabb { l: 0.0, r: 10.0, b: 0.0, t: 10.0 };
        let b = Aabb { l: 5.0, r: 20.0, b: -5.0, t: 5.0 };
        assert_eq!(a.union(&b), Aabb { l: 0.0, r: 20.0, b: -5.0, t: 10.0 });
        assert_eq!(a.clip(&b), Aabb { l: 5.0, r: 10.0, b: 0.0, t: 5.0 });
        assert_eq!(a.clip(&b).area(), 25.0);
    }

    #[test]
    fn test_boost_add_sums_vectors() {
        let mut a = Boost::new(1.0, 0.0, 3.0);
        a.add(&Boost::new(0.0, 1.0, 4.0));
        assert!((a.d - 5.0).abs() < 1e-12);
        assert!((a.x - 0.6).abs() < 1e-12);
        assert!((a.y - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_boost_add_opposite_cancels() {
        let mut a = Boost::new(1.0, 0.0, 2.0);
        a.add(&Boost::new(-1.0, 0.0, 2.0));
        assert_eq!(a, Boost::new(0.0, 0.0, 0.0));
    }
}
