//! The per-tier game-header store: a variable-length log of packed
//! game headers plus a dense offset index mapping game id to log
//! offset. Appends are serialized via a mutex; batch reads sort ids to
//! amortize seeks and scatter results back into the caller's order.

use std::sync::{Arc, Mutex};

use crate::error::{PosDbError, Result};
use crate::io::file::InputOutputFile;
use crate::io::handle_pool::HandlePool;

/// A compact packed date: year/month/day, with per-field "unknown"
/// sentinels (`0`), grounded in the original's `Date` packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl PackedDate {
    /// Parse a PGN `Date` tag (`"YYYY.MM.DD"`, with `"??"` fields for
    /// unknown components) into its packed form. Unparseable or
    /// partially-unknown components fall back to `0`.
    pub fn parse(s: &str) -> PackedDate {
        let mut parts = s.split('.');
        let year = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let month = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let day = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        PackedDate { year, month, day }
    }

    fn pack(self) -> u32 {
        ((self.year as u32) << 16) | ((self.month as u32) << 8) | self.day as u32
    }

    fn unpack(bits: u32) -> PackedDate {
        PackedDate { year: (bits >> 16) as u16, month: ((bits >> 8) & 0xff) as u8, day: (bits & 0xff) as u8 }
    }
}

/// A compact packed ECO code: letter `A`..=`E` plus a two-digit number
/// `00`..=`99`, grounded in the original's `Eco` packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PackedEco {
    pub letter: u8,
    pub number: u8,
}

impl PackedEco {
    /// Parse a three-character ECO code (e.g. `"B90"`); returns the
    /// zero value on anything that doesn't fit the shape.
    pub fn parse(s: &str) -> PackedEco {
        let mut chars = s.chars();
        let letter = match chars.next() {
            Some(c) if ('A'..='E').contains(&c) => c as u8 - b'A',
            _ => return PackedEco::default(),
        };
        let digits: String = chars.collect();
        let number: u8 = digits.parse().unwrap_or(0);
        PackedEco { letter, number }
    }

    fn pack(self) -> u16 {
        ((self.letter as u16) << 8) | self.number as u16
    }

    fn unpack(bits: u16) -> PackedEco {
        PackedEco { letter: (bits >> 8) as u8, number: (bits & 0xff) as u8 }
    }
}

/// The result of a game, as recorded in its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderResult {
    WhiteWin,
    BlackWin,
    Draw,
}

impl HeaderResult {
    fn pack(self) -> u8 {
        match self {
            HeaderResult::WhiteWin => 0,
            HeaderResult::BlackWin => 1,
            HeaderResult::Draw => 2,
        }
    }

    fn unpack(b: u8) -> Option<HeaderResult> {
        match b {
            0 => Some(HeaderResult::WhiteWin),
            1 => Some(HeaderResult::BlackWin),
            2 => Some(HeaderResult::Draw),
            _ => None,
        }
    }
}

/// One game's header metadata, as stored in the header log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameHeader {
    pub game_idx: u32,
    pub event: String,
    pub white: String,
    pub black: String,
    pub date: PackedDate,
    pub eco: PackedEco,
    pub result: HeaderResult,
    pub ply_count: u32,
}

/// Max length, in bytes, of each of `event`/`white`/`black`, to stay
/// inside the ≤768-byte record budget.
const MAX_STRING_LEN: usize = 255;

fn truncated_utf8_bytes(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        let mut cut = MAX_STRING_LEN;
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        bytes = &bytes[..cut];
    }
    bytes.to_vec()
}

impl GameHeader {
    /// Serialize to the packed on-disk record: a `u32` total-size
    /// prefix, then fixed fields, then three length-prefixed strings.
    fn to_bytes(&self) -> Vec<u8> {
        let event = truncated_utf8_bytes(&self.event);
        let white = truncated_utf8_bytes(&self.white);
        let black = truncated_utf8_bytes(&self.black);

        let mut body = Vec::with_capacity(4 + 4 + 2 + 1 + 4 + 3 + event.len() + white.len() + black.len());
        body.extend_from_slice(&self.game_idx.to_le_bytes());
        body.extend_from_slice(&self.date.pack().to_le_bytes());
        body.extend_from_slice(&self.eco.pack().to_le_bytes());
        body.push(self.result.pack());
        body.extend_from_slice(&self.ply_count.to_le_bytes());
        body.push(event.len() as u8);
        body.extend_from_slice(&event);
        body.push(white.len() as u8);
        body.extend_from_slice(&white);
        body.push(black.len() as u8);
        body.extend_from_slice(&black);

        let total_size = 4 + body.len() as u32;
        let mut out = Vec::with_capacity(total_size as usize);
        out.extend_from_slice(&total_size.to_le_bytes());
        out.extend_from_slice(&body);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<GameHeader> {
        let mut cur = 0usize;
        let mut read_u32 = |b: &[u8]| -> u32 {
            let v = u32::from_le_bytes(b[cur..cur + 4].try_into().unwrap());
            cur += 4;
            v
        };
        let game_idx = read_u32(bytes);
        let date = PackedDate::unpack(read_u32(bytes));
        let eco = PackedEco::unpack(u16::from_le_bytes(bytes[cur..cur + 2].try_into().unwrap()));
        cur += 2;
        let result = HeaderResult::unpack(bytes[cur])
            .ok_or_else(|| PosDbError::StringError("corrupt header: bad result byte".to_string()))?;
        cur += 1;
        let ply_count = read_u32(bytes);

        let mut read_string = |b: &[u8]| -> Result<String> {
            let len = b[cur] as usize;
            cur += 1;
            let s = std::str::from_utf8(&b[cur..cur + len])
                .map_err(|_| PosDbError::StringError("corrupt header: invalid utf8".to_string()))?
                .to_string();
            cur += len;
            Ok(s)
        };
        let event = read_string(bytes)?;
        let white = read_string(bytes)?;
        let black = read_string(bytes)?;

        Ok(GameHeader { game_idx, event, white, black, date, eco, result, ply_count })
    }
}

/// Size, in bytes, of one entry in the offset index.
const OFFSET_ENTRY_SIZE: usize = 8;

/// One tier's header store: the variable-length log plus the dense
/// offset index. Both files are append-only; game ids are stable
/// indices into the offset table assigned at [`Self::add`] time.
pub struct HeaderStore {
    log: InputOutputFile,
    offsets: Mutex<InputOutputFile>,
    add_lock: Mutex<()>,
}

impl HeaderStore {
    /// Open (creating if absent) the header store rooted at `log_path`/`offsets_path`.
    pub fn open(pool: Arc<HandlePool>, log_path: impl Into<std::path::PathBuf>, offsets_path: impl Into<std::path::PathBuf>) -> Result<Self> {
        let log = InputOutputFile::open(Arc::clone(&pool), log_path)?;
        let offsets = InputOutputFile::open(pool, offsets_path)?;
        Ok(HeaderStore { log, offsets: Mutex::new(offsets), add_lock: Mutex::new(()) })
    }

    /// Number of game ids assigned so far.
    pub fn len(&self) -> Result<u32> {
        let offsets = self.offsets.lock().unwrap();
        Ok((offsets.len()? / OFFSET_ENTRY_SIZE as u64) as u32)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append `header`, serializing concurrent callers via an internal
    /// mutex. Returns `(log_offset, game_id)`.
    pub fn add(&self, header: &GameHeader) -> Result<(u64, u32)> {
        let _guard = self.add_lock.lock().unwrap();
        self.add_no_lock(header)
    }

    /// Append `header` without internal synchronization; the caller
    /// must guarantee no concurrent `add`/`add_no_lock` call on this
    /// store (e.g. a single ingest producer batching its own headers).
    pub fn add_no_lock(&self, header: &GameHeader) -> Result<(u64, u32)> {
        let bytes = header.to_bytes();
        let log_offset = self.log.append(&bytes)?;
        let offsets = self.offsets.lock().unwrap();
        let id = (offsets.len()? / OFFSET_ENTRY_SIZE as u64) as u32;
        offsets.append(&log_offset.to_le_bytes())?;
        Ok((log_offset, id))
    }

    /// Rewrite the `ply_count` field of an already-appended header in
    /// place (used once a game's full move count is known). `ply_count`
    /// sits at a fixed byte offset within the record, after the 4-byte
    /// size prefix, 4-byte game_idx, 4-byte date, 2-byte eco, 1-byte
    /// result.
    pub fn rewrite_ply_count(&self, log_offset: u64, ply_count: u32) -> Result<()> {
        const PLY_COUNT_FIELD_OFFSET: u64 = 4 + 4 + 4 + 2 + 1;
        self.log.write_at(log_offset + PLY_COUNT_FIELD_OFFSET, &ply_count.to_le_bytes())
    }

    /// Rewrite the `game_idx` field in place. The id a header will be
    /// assigned isn't known until [`Self::add`]/[`Self::add_no_lock`]
    /// returns it, so callers that want the on-disk record to carry its
    /// own id stamp it in afterwards with this.
    pub fn stamp_game_idx(&self, log_offset: u64, game_idx: u32) -> Result<()> {
        const GAME_IDX_FIELD_OFFSET: u64 = 4;
        self.log.write_at(log_offset + GAME_IDX_FIELD_OFFSET, &game_idx.to_le_bytes())
    }

    /// Resolve `ids` to their headers. Results are returned in the
    /// caller's original order; internally, ids are sorted to amortize
    /// seek cost across the batch.
    pub fn query_by_ids(&self, ids: &[u32]) -> Result<Vec<GameHeader>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut order: Vec<usize> = (0..ids.len()).collect();
        order.sort_by_key(|&i| ids[i]);

        let mut sorted_results: Vec<GameHeader> = Vec::with_capacity(ids.len());
        for &i in &order {
            sorted_results.push(self.read_one(ids[i])?);
        }

        let mut out: Vec<Option<GameHeader>> = vec![None; ids.len()];
        for (pos_in_sorted, &original_idx) in order.iter().enumerate() {
            out[original_idx] = Some(sorted_results[pos_in_sorted].clone());
        }
        Ok(out.into_iter().map(|h| h.expect("every slot filled")).collect())
    }

    fn read_one(&self, id: u32) -> Result<GameHeader> {
        let offsets = self.offsets.lock().unwrap();
        let mut buf = [0u8; OFFSET_ENTRY_SIZE];
        offsets.read_at(&mut buf, id as u64 * OFFSET_ENTRY_SIZE as u64)?;
        let log_offset = u64::from_le_bytes(buf);
        drop(offsets);

        let mut size_buf = [0u8; 4];
        self.log.read_at(&mut size_buf, log_offset)?;
        let total_size = u32::from_le_bytes(size_buf);

        let mut record = vec![0u8; total_size as usize - 4];
        self.log.read_at(&mut record, log_offset + 4)?;
        GameHeader::from_bytes(&record)
    }

    pub fn flush(&self) -> Result<()> {
        self.log.flush()?;
        self.offsets.lock().unwrap().flush()?;
        Ok(())
    }

    /// Wipe every header this store holds: a whole-database `clear`, not
    /// a way to retract individual games.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.add_lock.lock().unwrap();
        self.log.truncate(0)?;
        self.offsets.lock().unwrap().truncate(0)?;
        Ok(())
    }
}
