//! Per-viewer delta frames.
//!
//! Every tick a viewer receives a header describing its (up to two) tabs,
//! followed by one entry per cell it saw last tick and a table of cells that
//! became visible this tick. Coordinates travel at half resolution.
//!
//! Cache entry flag byte:
//!
//! | bits  | meaning                                              |
//! |-------|------------------------------------------------------|
//! | 7..6  | `00` remove, `01` update, `10` eaten                 |
//! | 5..4  | x: `01` +u8, `10` -u8, `11` absolute i16             |
//! | 3..2  | y: same encoding as x                                |
//! | 1..0  | r: `01` +u8, `10` -u8, `11` absolute u16             |
//!
//! An eaten entry is followed by the u16 index (in last tick's cache) of the
//! cell that ate it.

use bytes::Bytes;

use crate::{BinaryReader, BinaryWriter, ProtocolError};

const OP_MASK: u8 = 0b1100_0000;
const UPD: u8 = 0x01 << 6;
const EAT: u8 = 0x02 << 6;

const DX_P: u8 = 0x01 << 4;
const DX_N: u8 = 0x02 << 4;
const DX_ABS: u8 = 0x03 << 4;

const DY_P: u8 = 0x01 << 2;
const DY_N: u8 = 0x02 << 2;
const DY_ABS: u8 = 0x03 << 2;

const DR_P: u8 = 0x01;
const DR_N: u8 = 0x02;
const DR_ABS: u8 = 0x03;

const I16_RANGE: f64 = i16::MAX as f64;
const U16_RANGE: f64 = u16::MAX as f64;

/// A cell as last sent to a viewer, at half resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CachedCell {
    pub kind: u16,
    pub x: i16,
    pub y: i16,
    pub r: u16,
}

impl CachedCell {
    /// Quantize world coordinates to the wire representation.
    pub fn quantize(kind: u16, x: f64, y: f64, r: f64) -> Self {
        Self {
            kind,
            x: (x * 0.5).clamp(-I16_RANGE, I16_RANGE) as i16,
            y: (y * 0.5).clamp(-I16_RANGE, I16_RANGE) as i16,
            r: (r * 0.5).clamp(0.0, U16_RANGE) as u16,
        }
    }
}

/// State of one input tab as shown to the viewer.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TabState {
    pub alive: bool,
    pub line_locked: u8,
    pub id: u16,
    pub cells: u16,
    pub score: f32,
    pub x: f32,
    pub y: f32,
}

impl TabState {
    fn flags(&self) -> u8 {
        u8::from(self.alive) | (self.line_locked << 1)
    }
}

/// Frame header preceding the cache table.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewHeader {
    pub spectating: bool,
    pub tabs: [TabState; 2],
    pub map_hw: f32,
    pub map_hh: f32,
}

impl ViewHeader {
    fn write(&self, w: &mut BinaryWriter) {
        let [t1, t2] = &self.tabs;
        w.put_u8(u8::from(self.spectating));
        w.put_u8(t1.flags());
        w.put_u8(t2.flags());
        w.put_u16(t1.id);
        w.put_u16(t2.id);
        w.put_u16(t1.cells);
        w.put_u16(t2.cells);
        w.put_f32(t1.score);
        w.put_f32(t2.score);
        w.put_f32(t1.x);
        w.put_f32(t1.y);
        w.put_f32(t2.x);
        w.put_f32(t2.y);
        w.put_f32(self.map_hw);
        w.put_f32(self.map_hh);
    }

    fn read(r: &mut BinaryReader) -> Result<Self, ProtocolError> {
        let spectating = r.get_u8()? != 0;
        let f1 = r.get_u8()?;
        let f2 = r.get_u8()?;
        let mut tabs = [TabState::default(); 2];
        for (tab, flags) in tabs.iter_mut().zip([f1, f2]) {
            tab.alive = flags & 1 != 0;
            tab.line_locked = flags >> 1;
        }
        tabs[0].id = r.get_u16()?;
        tabs[1].id = r.get_u16()?;
        tabs[0].cells = r.get_u16()?;
        tabs[1].cells = r.get_u16()?;
        tabs[0].score = r.get_f32()?;
        tabs[1].score = r.get_f32()?;
        tabs[0].x = r.get_f32()?;
        tabs[0].y = r.get_f32()?;
        tabs[1].x = r.get_f32()?;
        tabs[1].y = r.get_f32()?;
        Ok(Self {
            spectating,
            tabs,
            map_hw: r.get_f32()?,
            map_hh: r.get_f32()?,
        })
    }
}

/// Streaming encoder for one frame. Call exactly one of
/// [`remove`](Self::remove), [`eat`](Self::eat) or [`update`](Self::update)
/// per entry of last tick's cache, in order, then [`finish`](Self::finish).
#[derive(Debug)]
pub struct DeltaEncoder {
    w: BinaryWriter,
    expected: u32,
    written: u32,
}

impl DeltaEncoder {
    pub fn new(header: &ViewHeader, cache_len: u32) -> Self {
        let mut w = BinaryWriter::with_capacity(64 + cache_len as usize * 4);
        header.write(&mut w);
        w.put_u32(cache_len);
        Self {
            w,
            expected: cache_len,
            written: 0,
        }
    }

    pub fn remove(&mut self) {
        self.w.put_u8(0);
        self.written += 1;
    }

    pub fn eat(&mut self, eater: u16) {
        self.w.put_u8(EAT);
        self.w.put_u16(eater);
        self.written += 1;
    }

    /// Write the difference between `entry` and `next`, then store `next`
    /// into `entry`. Deltas within ±255 half-units use one byte.
    pub fn update(&mut self, entry: &mut CachedCell, next: CachedCell) {
        let at = self.w.len();
        self.w.put_u8(0);

        let mut flags = UPD;
        flags |= self.put_coord(i32::from(next.x) - i32::from(entry.x), next.x, [DX_P, DX_N, DX_ABS]);
        flags |= self.put_coord(i32::from(next.y) - i32::from(entry.y), next.y, [DY_P, DY_N, DY_ABS]);

        let dr = i32::from(next.r) - i32::from(entry.r);
        flags |= match dr {
            0 => 0,
            1..=255 => {
                self.w.put_u8(dr as u8);
                DR_P
            }
            -255..=-1 => {
                self.w.put_u8(dr.unsigned_abs() as u8);
                DR_N
            }
            _ => {
                self.w.put_u16(next.r);
                DR_ABS
            }
        };

        self.w.set_u8(at, flags);
        *entry = next;
        self.written += 1;
    }

    fn put_coord(&mut self, delta: i32, abs: i16, [pos, neg, full]: [u8; 3]) -> u8 {
        match delta {
            0 => 0,
            1..=255 => {
                self.w.put_u8(delta as u8);
                pos
            }
            -255..=-1 => {
                self.w.put_u8(delta.unsigned_abs() as u8);
                neg
            }
            _ => {
                self.w.put_i16(abs);
                full
            }
        }
    }

    /// Append the newly visible cells and return the finished frame.
    pub fn finish(mut self, added: &[CachedCell]) -> Bytes {
        debug_assert_eq!(self.written, self.expected, "cache entries left unencoded");
        self.w.put_u32(added.len() as u32);
        for cell in added {
            self.w.put_u16(cell.kind);
            self.w.put_i16(cell.x);
            self.w.put_i16(cell.y);
            self.w.put_u16(cell.r);
        }
        self.w.finish()
    }
}

/// A cache entry that was eaten this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EatEvent {
    pub victim: CachedCell,
    /// The eater as it was in last tick's cache.
    pub eater: CachedCell,
}

/// Everything a decoded frame carried besides the cache itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub header: ViewHeader,
    pub eaten: Vec<EatEvent>,
    pub removed: u32,
    pub added: u32,
}

/// Viewer-side mirror of the encoder's cache.
#[derive(Debug, Default)]
pub struct DeltaDecoder {
    cache: Vec<CachedCell>,
}

impl DeltaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells currently known to the viewer.
    pub fn cells(&self) -> &[CachedCell] {
        &self.cache
    }

    /// Apply one frame. On error the cache is left untouched.
    pub fn apply(&mut self, frame: impl Into<Bytes>) -> Result<DecodedFrame, ProtocolError> {
        let mut r = BinaryReader::new(frame);
        let header = ViewHeader::read(&mut r)?;

        let count = r.get_u32()?;
        if count as usize != self.cache.len() {
            return Err(ProtocolError::CacheMismatch {
                expected: self.cache.len() as u32,
                actual: count,
            });
        }

        let mut next = Vec::with_capacity(self.cache.len());
        let mut eaten = Vec::new();
        let mut removed = 0;

        for prev in &self.cache {
            let flags = r.get_u8()?;
            match flags & OP_MASK {
                0 if flags == 0 => removed += 1,
                UPD => {
                    let mut cell = *prev;
                    cell.x = read_coord(&mut r, (flags >> 4) & 0b11, cell.x)?;
                    cell.y = read_coord(&mut r, (flags >> 2) & 0b11, cell.y)?;
                    cell.r = match flags & 0b11 {
                        0 => cell.r,
                        1 => cell.r.wrapping_add(u16::from(r.get_u8()?)),
                        2 => cell.r.wrapping_sub(u16::from(r.get_u8()?)),
                        _ => r.get_u16()?,
                    };
                    next.push(cell);
                }
                EAT if flags == EAT => {
                    let index = r.get_u16()?;
                    let eater = self
                        .cache
                        .get(usize::from(index))
                        .ok_or(ProtocolError::EaterOutOfRange(index))?;
                    eaten.push(EatEvent {
                        victim: *prev,
                        eater: *eater,
                    });
                }
                _ => return Err(ProtocolError::InvalidSubop(flags)),
            }
        }

        let added = r.get_u32()?;
        for _ in 0..added {
            next.push(CachedCell {
                kind: r.get_u16()?,
                x: r.get_i16()?,
                y: r.get_i16()?,
                r: r.get_u16()?,
            });
        }
        r.finish()?;

        self.cache = next;
        Ok(DecodedFrame {
            header,
            eaten,
            removed,
            added,
        })
    }
}

fn read_coord(r: &mut BinaryReader, bits: u8, prev: i16) -> Result<i16, ProtocolError> {
    Ok(match bits {
        0 => prev,
        1 => prev.wrapping_add(i16::from(r.get_u8()?)),
        2 => prev.wrapping_sub(i16::from(r.get_u8()?)),
        _ => r.get_i16()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ViewHeader {
        ViewHeader {
            spectating: false,
            tabs: [
                TabState {
                    alive: true,
                    line_locked: 2,
                    id: 3,
                    cells: 1,
                    score: 42.0,
                    x: 10.0,
                    y: -20.0,
                },
                TabState::default(),
            ],
            map_hw: 7071.0,
            map_hh: 7071.0,
        }
    }

    fn seed(decoder: &mut DeltaDecoder, cells: &[CachedCell]) {
        let enc = DeltaEncoder::new(&header(), 0);
        decoder.apply(enc.finish(cells)).unwrap();
    }

    #[test]
    fn test_quantize_halves_and_clamps() {
        let c = CachedCell::quantize(5, 101.0, -99999999.0, 1e9);
        assert_eq!(c.x, 50);
        assert_eq!(c.y, -32767);
        assert_eq!(c.r, u16::MAX);
    }

    #[test]
    fn test_small_deltas_use_one_byte() {
        let before = CachedCell { kind: 3, x: 100, y: 100, r: 50 };
        let after = CachedCell { kind: 3, x: 355, y: -155, r: 51 };

        let mut decoder = DeltaDecoder::new();
        seed(&mut decoder, &[before]);

        let mut entry = before;
        let mut enc = DeltaEncoder::new(&header(), 1);
        let header_len = enc.w.len();
        enc.update(&mut entry, after);
        // flag byte plus one byte per changed component
        assert_eq!(enc.w.len() - header_len, 4);
        assert_eq!(enc.w.as_slice()[header_len], UPD | DX_P | DY_N | DR_P);
        assert_eq!(entry, after);

        let frame = decoder.apply(enc.finish(&[])).unwrap();
        assert_eq!(frame.header, header());
        assert_eq!(decoder.cells(), &[after]);
    }

    #[test]
    fn test_large_delta_falls_back_to_absolute() {
        let before = CachedCell { kind: 3, x: 0, y: 0, r: 10 };
        let after = CachedCell { kind: 3, x: 256, y: 0, r: 2000 };

        let mut decoder = DeltaDecoder::new();
        seed(&mut decoder, &[before]);

        let mut entry = before;
        let mut enc = DeltaEncoder::new(&header(), 1);
        let header_len = enc.w.len();
        enc.update(&mut entry, after);
        assert_eq!(enc.w.as_slice()[header_len], UPD | DX_ABS | DR_ABS);
        assert_eq!(enc.w.len() - header_len, 5);

        decoder.apply(enc.finish(&[])).unwrap();
        assert_eq!(decoder.cells(), &[after]);
    }

    #[test]
    fn test_eat_and_remove_drop_entries() {
        let a = CachedCell { kind: 1, x: 0, y: 0, r: 100 };
        let b = CachedCell { kind: 2, x: 10, y: 0, r: 5 };
        let c = CachedCell { kind: 16383, x: -10, y: 0, r: 3 };
        let fresh = CachedCell { kind: 16382, x: 50, y: 50, r: 50 };

        let mut decoder = DeltaDecoder::new();
        seed(&mut decoder, &[a, b, c]);

        let mut entry = a;
        let mut enc = DeltaEncoder::new(&header(), 3);
        enc.update(&mut entry, a);
        enc.eat(0);
        enc.remove();
        let frame = decoder.apply(enc.finish(&[fresh])).unwrap();

        assert_eq!(frame.eaten, vec![EatEvent { victim: b, eater: a }]);
        assert_eq!(frame.removed, 1);
        assert_eq!(frame.added, 1);
        assert_eq!(decoder.cells(), &[a, fresh]);
    }

    #[test]
    fn test_truncated_frame_leaves_cache_untouched() {
        let a = CachedCell { kind: 1, x: 0, y: 0, r: 100 };
        let mut decoder = DeltaDecoder::new();
        seed(&mut decoder, &[a]);

        let mut entry = a;
        let mut enc = DeltaEncoder::new(&header(), 1);
        enc.update(&mut entry, CachedCell { x: 5, ..a });
        let frame = enc.finish(&[]);
        let cut = frame.slice(..frame.len() - 2);

        assert!(matches!(decoder.apply(cut), Err(ProtocolError::UnexpectedEof)));
        assert_eq!(decoder.cells(), &[a]);
    }

    #[test]
    fn test_cache_size_mismatch_rejected() {
        let mut decoder = DeltaDecoder::new();
        let mut enc = DeltaEncoder::new(&header(), 1);
        enc.remove();
        assert!(matches!(
            decoder.apply(enc.finish(&[])),
            Err(ProtocolError::CacheMismatch { expected: 0, actual: 1 })
        ));
    }

    #[test]
    fn test_eater_out_of_range_rejected() {
        let a = CachedCell { kind: 1, x: 0, y: 0, r: 100 };
        let mut decoder = DeltaDecoder::new();
        seed(&mut decoder, &[a]);

        let mut enc = DeltaEncoder::new(&header(), 1);
        enc.eat(4);
        assert!(matches!(
            decoder.apply(enc.finish(&[])),
            Err(ProtocolError::EaterOutOfRange(4))
        ));
        assert_eq!(decoder.cells(), &[a]);
    }
}
