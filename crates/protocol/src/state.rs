//! Save envelope framing.
//!
//! Layout: u16 mode length + UTF-8 mode name, u16 bot count + u16 control
//! ids, u64 pool length + raw pool records, u64 extension length + blob.

use bytes::Bytes;

use crate::{BinaryReader, BinaryWriter, ProtocolError};

/// A snapshot of an engine, as produced by save and consumed by restore.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaveEnvelope {
    pub mode: String,
    pub bot_ids: Vec<u16>,
    pub pool: Bytes,
    pub ext: Bytes,
}

impl SaveEnvelope {
    pub fn encode(&self) -> Bytes {
        let mut w = BinaryWriter::with_capacity(
            2 + self.mode.len() + 2 + self.bot_ids.len() * 2 + 16 + self.pool.len() + self.ext.len(),
        );
        w.put_u16(self.mode.len() as u16);
        w.put_slice(self.mode.as_bytes());
        w.put_u16(self.bot_ids.len() as u16);
        for id in &self.bot_ids {
            w.put_u16(*id);
        }
        w.put_u64(self.pool.len() as u64);
        w.put_slice(&self.pool);
        w.put_u64(self.ext.len() as u64);
        w.put_slice(&self.ext);
        w.finish()
    }

    pub fn decode(data: impl Into<Bytes>) -> Result<Self, ProtocolError> {
        let mut r = BinaryReader::new(data);

        let mode_len = r.get_u16()?;
        let mode = r.get_bytes(usize::from(mode_len))?;
        let mode = std::str::from_utf8(&mode)
            .map_err(|_| ProtocolError::InvalidModeName)?
            .to_owned();

        let bots = r.get_u16()?;
        let bot_ids = (0..bots).map(|_| r.get_u16()).collect::<Result<Vec<_>, _>>()?;

        let pool_len = r.get_u64()?;
        let pool = r.get_bytes(blob_len(pool_len, &r)?)?;
        let ext_len = r.get_u64()?;
        let ext = r.get_bytes(blob_len(ext_len, &r)?)?;
        r.finish()?;

        Ok(Self {
            mode,
            bot_ids,
            pool,
            ext,
        })
    }
}

fn blob_len(len: u64, r: &BinaryReader) -> Result<usize, ProtocolError> {
    usize::try_from(len)
        .ok()
        .filter(|&n| n <= r.remaining())
        .ok_or(ProtocolError::UnexpectedEof)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SaveEnvelope {
        SaveEnvelope {
            mode: "ffa".into(),
            bot_ids: vec![2, 7, 9],
            pool: Bytes::from(vec![1u8; 96]),
            ext: Bytes::from_static(b"goal"),
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        let env = sample();
        assert_eq!(SaveEnvelope::decode(env.encode()).unwrap(), env);
    }

    #[test]
    fn test_truncated_pool_rejected() {
        let bytes = sample().encode();
        let cut = bytes.slice(..bytes.len() - 10);
        assert!(matches!(SaveEnvelope::decode(cut), Err(ProtocolError::UnexpectedEof)));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut raw = sample().encode().to_vec();
        raw.push(0);
        assert!(matches!(SaveEnvelope::decode(raw), Err(ProtocolError::TrailingBytes(1))));
    }
}
