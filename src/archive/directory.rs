//! Directory decoding and lookup
//!
//! A directory is a sorted list of entries, serialized column by column as
//! unsigned LEB128 varints: entry count, delta-encoded tile ids, run lengths,
//! lengths, then offsets. An offset of zero after the first entry means "right
//! after the previous entry".

use crate::error::{Result, TileError};
use serde::{Deserialize, Serialize};

/// One directory entry
///
/// `run_length == 0` marks a pointer to a leaf directory; otherwise the entry
/// covers `run_length` consecutive tile ids sharing the same payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub tile_id: u64,
    pub offset: u64,
    pub length: u32,
    pub run_length: u32,
}

impl Entry {
    pub fn is_leaf_pointer(&self) -> bool {
        self.run_length == 0
    }
}

struct VarintReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> VarintReader<'a> {
    fn read(&mut self) -> Result<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| TileError::InvalidArchive("truncated directory".to_string()))?;
            self.pos += 1;

            if shift >= 64 || (shift == 63 && byte > 1) {
                return Err(TileError::InvalidArchive("varint overflows u64".to_string()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn read_u32(&mut self, what: &str) -> Result<u32> {
        let value = self.read()?;
        u32::try_from(value)
            .map_err(|_| TileError::InvalidArchive(format!("{} {} does not fit in u32", what, value)))
    }
}

/// Decode an (already decompressed) directory
pub fn deserialize_directory(buf: &[u8]) -> Result<Vec<Entry>> {
    let mut reader = VarintReader { buf, pos: 0 };
    let num_entries = reader.read()? as usize;

    // Each entry takes at least four bytes, which bounds allocation on garbage input
    if num_entries > buf.len() {
        return Err(TileError::InvalidArchive(format!(
            "directory claims {} entries in {} bytes",
            num_entries,
            buf.len()
        )));
    }

    let mut entries = vec![
        Entry {
            tile_id: 0,
            offset: 0,
            length: 0,
            run_length: 0,
        };
        num_entries
    ];

    let mut last_id = 0u64;
    for entry in entries.iter_mut() {
        let delta = reader.read()?;
        last_id = last_id
            .checked_add(delta)
            .ok_or_else(|| TileError::InvalidArchive("tile id overflow".to_string()))?;
        entry.tile_id = last_id;
    }
    for entry in entries.iter_mut() {
        entry.run_length = reader.read_u32("run length")?;
    }
    for entry in entries.iter_mut() {
        entry.length = reader.read_u32("length")?;
    }
    for i in 0..num_entries {
        let raw = reader.read()?;
        entries[i].offset = if raw == 0 && i > 0 {
            entries[i - 1]
                .offset
                .checked_add(u64::from(entries[i - 1].length))
                .ok_or_else(|| TileError::InvalidArchive("directory offset overflow".to_string()))?
        } else {
            raw.checked_sub(1).ok_or_else(|| {
                TileError::InvalidArchive("first directory entry has no offset".to_string())
            })?
        };
    }

    Ok(entries)
}

/// Find the entry covering `tile_id`
///
/// Returns the exact match, the run that contains `tile_id`, or the leaf
/// pointer whose subtree may contain it.
pub fn find_tile(entries: &[Entry], tile_id: u64) -> Option<&Entry> {
    let idx = entries.partition_point(|e| e.tile_id <= tile_id);
    if idx == 0 {
        return None;
    }
    let entry = &entries[idx - 1];
    if entry.tile_id == tile_id || entry.is_leaf_pointer() {
        return Some(entry);
    }
    if tile_id - entry.tile_id < u64::from(entry.run_length) {
        return Some(entry);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn varint(mut v: u64, out: &mut Vec<u8>) {
        while v >= 0x80 {
            out.push((v as u8 & 0x7f) | 0x80);
            v >>= 7;
        }
        out.push(v as u8);
    }

    fn encode(entries: &[Entry]) -> Vec<u8> {
        let mut out = Vec::new();
        varint(entries.len() as u64, &mut out);
        let mut last = 0;
        for e in entries {
            varint(e.tile_id - last, &mut out);
            last = e.tile_id;
        }
        for e in entries {
            varint(e.run_length as u64, &mut out);
        }
        for e in entries {
            varint(e.length as u64, &mut out);
        }
        for (i, e) in entries.iter().enumerate() {
            if i > 0 && e.offset == entries[i - 1].offset + entries[i - 1].length as u64 {
                varint(0, &mut out);
            } else {
                varint(e.offset + 1, &mut out);
            }
        }
        out
    }

    fn entry(tile_id: u64, offset: u64, length: u32, run_length: u32) -> Entry {
        Entry { tile_id, offset, length, run_length }
    }

    #[test]
    fn test_decode_directory() {
        let entries = vec![
            entry(0, 0, 100, 1),
            entry(1, 100, 50, 1),
            entry(5, 150, 20, 3),
            entry(300, 0, 30, 1),
        ];
        let decoded = deserialize_directory(&encode(&entries)).unwrap();
        assert_eq!(decoded, entries);
    }

    #[test]
    fn test_decode_large_values() {
        let entries = vec![entry(1 << 40, 1 << 35, 70_000, 1)];
        assert_eq!(deserialize_directory(&encode(&entries)).unwrap(), entries);
    }

    #[test]
    fn test_truncated_directory() {
        let mut bytes = encode(&[entry(0, 0, 100, 1), entry(1, 100, 50, 1)]);
        bytes.pop();
        assert!(deserialize_directory(&bytes).is_err());
    }

    #[test]
    fn test_continuation_offset_overflow_is_invalid() {
        let mut bytes = Vec::new();
        varint(2, &mut bytes);
        for v in [0, 1, 1, 1, 10, 10] {
            varint(v, &mut bytes);
        }
        // First offset is u64::MAX - 1, second continues past the end of u64
        varint(u64::MAX, &mut bytes);
        varint(0, &mut bytes);

        let err = deserialize_directory(&bytes).unwrap_err();
        assert!(matches!(err, TileError::InvalidArchive(_)), "got {:?}", err);
    }

    #[test]
    fn test_find_tile() {
        let entries = vec![
            entry(0, 0, 100, 1),
            entry(5, 100, 20, 3),
            entry(20, 0, 40, 0),
        ];

        assert_eq!(find_tile(&entries, 0).unwrap().offset, 0);
        // inside the run starting at 5
        assert_eq!(find_tile(&entries, 7).unwrap().tile_id, 5);
        // past the run
        assert!(find_tile(&entries, 8).is_none());
        // gap before the run
        assert!(find_tile(&entries, 3).is_none());
        // leaf pointer covers everything after it
        assert!(find_tile(&entries, 1000).unwrap().is_leaf_pointer());
    }

    #[test]
    fn test_find_tile_empty_or_before_first() {
        assert!(find_tile(&[], 0).is_none());
        assert!(find_tile(&[entry(10, 0, 1, 1)], 3).is_none());
    }
}
