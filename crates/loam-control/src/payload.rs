//! Control-file payloads and their versioned binary layout.
//!
//! A control file is `[version: 8 ASCII bytes][payload]`. The payload layout
//! is fixed-width big-endian with a one-byte status tag; the `checksum`
//! field holds an Adler-32 computed over the payload with that field zeroed.
//! V3 and V4 files are still readable and upgrade to V5 in memory.

use adler::adler32_slice;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ControlError, ControlResult};

/// Version tags, 8 ASCII bytes each.
pub const VERSION_V3: &[u8; 8] = b"00000003";
pub const VERSION_V4: &[u8; 8] = b"00000004";
pub const VERSION_V5: &[u8; 8] = b"00000005";

const TAG_LEN: usize = 8;

/// GC / upgrade status carried by V4 and V5 payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GcStatus {
    /// The store was never garbage-collected.
    NoGcYet,
    /// GC is impossible: the index was built with a non-minimal strategy.
    UsedNonMinimalIndexingStrategy,
    /// The store was upgraded from a V1/V2 pack in place.
    FromV1V2PostUpgrade { entry_offset_at_upgrade: u64 },
    /// At least one GC ran.
    Gced {
        suffix_start_offset: u64,
        generation: u64,
        latest_gc_target_offset: u64,
        suffix_dead_bytes: u64,
    },
}

/// Status variants of the legacy V3 payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusV3 {
    NoGcYet,
    UsedNonMinimalIndexingStrategy,
    /// V3 stored the chunk start index in `generation`.
    Gced {
        suffix_start_offset: u64,
        generation: u64,
    },
}

/// Legacy V3 payload, readable for upgrade only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadV3 {
    pub dict_end_poff: u64,
    pub suffix_end_poff: u64,
    pub checksum: u64,
    pub status: StatusV3,
}

/// Legacy V4 payload, readable for upgrade only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadV4 {
    pub dict_end_poff: u64,
    pub appendable_chunk_poff: u64,
    pub checksum: u64,
    pub chunk_start_idx: u32,
    pub chunk_num: u32,
    pub status: GcStatus,
}

/// The current control payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub dict_end_poff: u64,
    pub appendable_chunk_poff: u64,
    /// Major version this payload was upgraded from at read time, if any.
    pub upgraded_from: Option<u32>,
    pub checksum: u64,
    pub chunk_start_idx: u32,
    pub chunk_num: u32,
    pub volume_num: u32,
    pub status: GcStatus,
}

impl Payload {
    /// A fresh payload for a new, empty store.
    pub fn init() -> Self {
        Self {
            dict_end_poff: 0,
            appendable_chunk_poff: 0,
            upgraded_from: None,
            checksum: 0,
            chunk_start_idx: 0,
            chunk_num: 1,
            volume_num: 0,
            status: GcStatus::NoGcYet,
        }
    }

    /// Serialise as a full control-file image: version tag plus payload,
    /// with the checksum field filled in.
    pub fn to_bin_string(&self) -> Vec<u8> {
        let mut sealed = *self;
        sealed.checksum = 0;
        let body = encode_v5(&sealed);
        sealed.checksum = adler32_slice(&body) as u64;

        let mut out = Vec::with_capacity(TAG_LEN + body.len());
        out.extend_from_slice(VERSION_V5);
        out.extend_from_slice(&encode_v5(&sealed));
        out
    }

    /// Parse a control-file image of any supported version, validating the
    /// checksum and upgrading legacy payloads to V5.
    pub fn of_bin_string(data: &[u8]) -> ControlResult<Self> {
        let (tag, body) = split_tag(data)?;
        match tag {
            t if t == VERSION_V5 => {
                let payload = decode_v5(body)?;
                Ok(payload)
            }
            t if t == VERSION_V3 => {
                let v3 = decode_v3(body)?;
                info!(from = 3, "upgrading control payload");
                Ok(upgrade_v3(&v3))
            }
            t if t == VERSION_V4 => {
                let v4 = decode_v4(body)?;
                info!(from = 4, "upgrading control payload");
                Ok(upgrade_v4(&v4))
            }
            other => Err(ControlError::UnknownMajorPackVersion(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }

    /// Parse accepting only V5, the strict read volumes use. Legacy tags
    /// report their version rather than aborting.
    pub fn of_bin_string_v5_only(data: &[u8]) -> ControlResult<Self> {
        let (tag, body) = split_tag(data)?;
        if tag == VERSION_V5 {
            decode_v5(body)
        } else {
            Err(ControlError::UnknownMajorPackVersion(
                String::from_utf8_lossy(tag).into_owned(),
            ))
        }
    }

    /// The payload as a JSON value, for tooling.
    pub fn to_json(&self) -> ControlResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| ControlError::Serialization(e.to_string()))
    }
}

fn split_tag(data: &[u8]) -> ControlResult<(&[u8], &[u8])> {
    if data.len() < TAG_LEN {
        return Err(ControlError::CorruptedControlFile);
    }
    Ok((&data[..TAG_LEN], &data[TAG_LEN..]))
}

fn upgrade_v3(v3: &PayloadV3) -> Payload {
    let (chunk_start_idx, status) = match v3.status {
        StatusV3::NoGcYet => (0, GcStatus::NoGcYet),
        StatusV3::UsedNonMinimalIndexingStrategy => {
            (0, GcStatus::UsedNonMinimalIndexingStrategy)
        }
        StatusV3::Gced {
            suffix_start_offset,
            generation,
        } => (
            generation as u32,
            GcStatus::Gced {
                suffix_start_offset,
                generation,
                latest_gc_target_offset: suffix_start_offset,
                suffix_dead_bytes: 0,
            },
        ),
    };
    Payload {
        dict_end_poff: v3.dict_end_poff,
        appendable_chunk_poff: v3.suffix_end_poff,
        upgraded_from: Some(3),
        checksum: 0,
        chunk_start_idx,
        chunk_num: 1,
        volume_num: 0,
        status,
    }
}

fn upgrade_v4(v4: &PayloadV4) -> Payload {
    Payload {
        dict_end_poff: v4.dict_end_poff,
        appendable_chunk_poff: v4.appendable_chunk_poff,
        upgraded_from: Some(4),
        checksum: 0,
        chunk_start_idx: v4.chunk_start_idx,
        chunk_num: v4.chunk_num,
        volume_num: 0,
        status: v4.status,
    }
}

// ---------------------------------------------------------------------------
// Binary layout
// ---------------------------------------------------------------------------

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn status(&mut self, status: &GcStatus) {
        match status {
            GcStatus::NoGcYet => self.u8(0),
            GcStatus::UsedNonMinimalIndexingStrategy => self.u8(1),
            GcStatus::FromV1V2PostUpgrade {
                entry_offset_at_upgrade,
            } => {
                self.u8(2);
                self.u64(*entry_offset_at_upgrade);
            }
            GcStatus::Gced {
                suffix_start_offset,
                generation,
                latest_gc_target_offset,
                suffix_dead_bytes,
            } => {
                self.u8(3);
                self.u64(*suffix_start_offset);
                self.u64(*generation);
                self.u64(*latest_gc_target_offset);
                self.u64(*suffix_dead_bytes);
            }
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ControlResult<&'a [u8]> {
        if self.pos + n > self.data.len() {
            return Err(ControlError::CorruptedControlFile);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u64(&mut self) -> ControlResult<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("8 bytes")))
    }

    fn u32(&mut self) -> ControlResult<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("4 bytes")))
    }

    fn u8(&mut self) -> ControlResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn status(&mut self) -> ControlResult<GcStatus> {
        match self.u8()? {
            0 => Ok(GcStatus::NoGcYet),
            1 => Ok(GcStatus::UsedNonMinimalIndexingStrategy),
            2 => Ok(GcStatus::FromV1V2PostUpgrade {
                entry_offset_at_upgrade: self.u64()?,
            }),
            3 => Ok(GcStatus::Gced {
                suffix_start_offset: self.u64()?,
                generation: self.u64()?,
                latest_gc_target_offset: self.u64()?,
                suffix_dead_bytes: self.u64()?,
            }),
            _ => Err(ControlError::CorruptedControlFile),
        }
    }

    fn finish(&self) -> ControlResult<()> {
        if self.pos == self.data.len() {
            Ok(())
        } else {
            Err(ControlError::CorruptedControlFile)
        }
    }
}

fn encode_v5(p: &Payload) -> Vec<u8> {
    let mut w = Writer::new();
    w.u64(p.dict_end_poff);
    w.u64(p.appendable_chunk_poff);
    match p.upgraded_from {
        None => {
            w.u8(0);
            w.u32(0);
        }
        Some(v) => {
            w.u8(1);
            w.u32(v);
        }
    }
    w.u64(p.checksum);
    w.u32(p.chunk_start_idx);
    w.u32(p.chunk_num);
    w.u32(p.volume_num);
    w.status(&p.status);
    w.buf
}

// The checksum field sits at a fixed offset inside each payload version.
const V5_CHECKSUM_AT: usize = 8 + 8 + 1 + 4;
const V4_CHECKSUM_AT: usize = 8 + 8;
const V3_CHECKSUM_AT: usize = 8 + 8;

fn verify_checksum(body: &[u8], at: usize, stored: u64) -> ControlResult<()> {
    if body.len() < at + 8 {
        return Err(ControlError::CorruptedControlFile);
    }
    let mut zeroed = body.to_vec();
    zeroed[at..at + 8].fill(0);
    if adler32_slice(&zeroed) as u64 != stored {
        return Err(ControlError::CorruptedControlFile);
    }
    Ok(())
}

fn decode_v5(body: &[u8]) -> ControlResult<Payload> {
    let mut r = Reader::new(body);
    let dict_end_poff = r.u64()?;
    let appendable_chunk_poff = r.u64()?;
    let upgraded_from = match r.u8()? {
        0 => {
            r.u32()?;
            None
        }
        1 => Some(r.u32()?),
        _ => return Err(ControlError::CorruptedControlFile),
    };
    let checksum = r.u64()?;
    let chunk_start_idx = r.u32()?;
    let chunk_num = r.u32()?;
    let volume_num = r.u32()?;
    let status = r.status()?;
    r.finish()?;

    verify_checksum(body, V5_CHECKSUM_AT, checksum)?;
    Ok(Payload {
        dict_end_poff,
        appendable_chunk_poff,
        upgraded_from,
        checksum,
        chunk_start_idx,
        chunk_num,
        volume_num,
        status,
    })
}

fn decode_v4(body: &[u8]) -> ControlResult<PayloadV4> {
    let mut r = Reader::new(body);
    let dict_end_poff = r.u64()?;
    let appendable_chunk_poff = r.u64()?;
    let checksum = r.u64()?;
    let chunk_start_idx = r.u32()?;
    let chunk_num = r.u32()?;
    let status = r.status()?;
    r.finish()?;

    verify_checksum(body, V4_CHECKSUM_AT, checksum)?;
    Ok(PayloadV4 {
        dict_end_poff,
        appendable_chunk_poff,
        checksum,
        chunk_start_idx,
        chunk_num,
        status,
    })
}

fn decode_v3(body: &[u8]) -> ControlResult<PayloadV3> {
    let mut r = Reader::new(body);
    let dict_end_poff = r.u64()?;
    let suffix_end_poff = r.u64()?;
    let checksum = r.u64()?;
    let status = match r.u8()? {
        0 => StatusV3::NoGcYet,
        1 => StatusV3::UsedNonMinimalIndexingStrategy,
        2 => StatusV3::Gced {
            suffix_start_offset: r.u64()?,
            generation: r.u64()?,
        },
        _ => return Err(ControlError::CorruptedControlFile),
    };
    r.finish()?;

    verify_checksum(body, V3_CHECKSUM_AT, checksum)?;
    Ok(PayloadV3 {
        dict_end_poff,
        suffix_end_poff,
        checksum,
        status,
    })
}

/// Serialise a V3 payload with a valid checksum, for fixtures and tests.
pub fn v3_to_bin_string(p: &PayloadV3) -> Vec<u8> {
    let mut w = Writer::new();
    w.u64(p.dict_end_poff);
    w.u64(p.suffix_end_poff);
    w.u64(0);
    match p.status {
        StatusV3::NoGcYet => w.u8(0),
        StatusV3::UsedNonMinimalIndexingStrategy => w.u8(1),
        StatusV3::Gced {
            suffix_start_offset,
            generation,
        } => {
            w.u8(2);
            w.u64(suffix_start_offset);
            w.u64(generation);
        }
    }
    let mut body = w.buf;
    let checksum = adler32_slice(&body) as u64;
    body[V3_CHECKSUM_AT..V3_CHECKSUM_AT + 8].copy_from_slice(&checksum.to_be_bytes());

    let mut out = Vec::with_capacity(TAG_LEN + body.len());
    out.extend_from_slice(VERSION_V3);
    out.extend_from_slice(&body);
    out
}

/// Serialise a V4 payload with a valid checksum, for fixtures and tests.
pub fn v4_to_bin_string(p: &PayloadV4) -> Vec<u8> {
    let mut w = Writer::new();
    w.u64(p.dict_end_poff);
    w.u64(p.appendable_chunk_poff);
    w.u64(0);
    w.u32(p.chunk_start_idx);
    w.u32(p.chunk_num);
    w.status(&p.status);
    let mut body = w.buf;
    let checksum = adler32_slice(&body) as u64;
    body[V4_CHECKSUM_AT..V4_CHECKSUM_AT + 8].copy_from_slice(&checksum.to_be_bytes());

    let mut out = Vec::with_capacity(TAG_LEN + body.len());
    out.extend_from_slice(VERSION_V4);
    out.extend_from_slice(&body);
    out
}
