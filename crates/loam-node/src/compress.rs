//! Space-optimised on-disk encoding of inode chunks.
//!
//! The compressed form replaces recurring step names with 16-bit dictionary
//! ids and in-pack child references with varint offsets. Both indirections
//! are best-effort: when the dictionary is saturated or a key carries no
//! offset hint, the codec falls back to the direct form.

use loam_pack::{decode_varint, encode_varint, Dict, EntryKind};
use loam_types::{Key, Metadata, ObjectHash, Step, Value};

use crate::bin::{Bin, BinV, PtrRef};
use crate::error::{NodeError, NodeResult};

/// Decode-side collaborators: the id-to-string half of the dictionary and
/// the offset-to-key resolution of the pack.
pub trait DecodeCtx {
    fn dict_resolve(&self, id: u16) -> Option<String>;
    fn key_of_offset(&self, offset: u64) -> NodeResult<Option<Key>>;
}

// Value variant tags. The first letter names the step encoding, the second
// the address encoding (i = indirect, d = direct); `x` variants carry
// explicit non-default metadata.
const CONTENTS_II: u8 = 0;
const CONTENTS_X_II: u8 = 1;
const NODE_II: u8 = 2;
const CONTENTS_ID: u8 = 3;
const CONTENTS_X_ID: u8 = 4;
const NODE_ID: u8 = 5;
const CONTENTS_DI: u8 = 6;
const CONTENTS_X_DI: u8 = 7;
const NODE_DI: u8 = 8;
const CONTENTS_DD: u8 = 9;
const CONTENTS_X_DD: u8 = 10;
const NODE_DD: u8 = 11;

const SHAPE_VALUES: u8 = 0;
const SHAPE_TREE: u8 = 1;

const ADDR_DIRECT: u8 = 0;
const ADDR_INDIRECT: u8 = 1;

/// A step only goes through the dictionary once its binary form reaches
/// this many bytes; shorter names are cheaper inline.
const MIN_DICT_STEP_LEN: usize = 4;

/// Encode a bin form into its compressed payload.
pub fn encode(bin: &Bin, dict: &Dict) -> Vec<u8> {
    let mut buf = Vec::new();
    match &bin.v {
        BinV::Values(bindings) => {
            buf.push(SHAPE_VALUES);
            encode_varint(&mut buf, bindings.len() as u64);
            for (step, value) in bindings {
                encode_binding(&mut buf, step, value, dict);
            }
        }
        BinV::Tree {
            depth,
            length,
            ptrs,
        } => {
            buf.push(SHAPE_TREE);
            encode_varint(&mut buf, *depth as u64);
            encode_varint(&mut buf, *length);
            encode_varint(&mut buf, ptrs.len() as u64);
            for (slot, ptr) in ptrs {
                encode_varint(&mut buf, *slot as u64);
                match ptr.key().and_then(|k| k.offset()) {
                    Some(offset) => {
                        buf.push(ADDR_INDIRECT);
                        encode_varint(&mut buf, offset);
                    }
                    None => {
                        buf.push(ADDR_DIRECT);
                        buf.extend_from_slice(ptr.hash().as_bytes());
                    }
                }
            }
        }
    }
    buf
}

fn encode_binding(buf: &mut Vec<u8>, step: &Step, value: &Value, dict: &Dict) {
    let dict_id = if step.byte_len() >= MIN_DICT_STEP_LEN {
        dict.index(step.as_str())
    } else {
        None
    };
    let (key, meta) = match value {
        Value::Contents { key, metadata } => (*key, Some(*metadata)),
        Value::Node { key } => (*key, None),
    };
    let indirect_addr = key.offset().is_some();

    let tag = match (dict_id.is_some(), indirect_addr, meta) {
        (true, true, None) => NODE_II,
        (true, true, Some(m)) if m.is_default() => CONTENTS_II,
        (true, true, Some(_)) => CONTENTS_X_II,
        (true, false, None) => NODE_ID,
        (true, false, Some(m)) if m.is_default() => CONTENTS_ID,
        (true, false, Some(_)) => CONTENTS_X_ID,
        (false, true, None) => NODE_DI,
        (false, true, Some(m)) if m.is_default() => CONTENTS_DI,
        (false, true, Some(_)) => CONTENTS_X_DI,
        (false, false, None) => NODE_DD,
        (false, false, Some(m)) if m.is_default() => CONTENTS_DD,
        (false, false, Some(_)) => CONTENTS_X_DD,
    };
    buf.push(tag);

    match dict_id {
        Some(id) => buf.extend_from_slice(&id.to_be_bytes()),
        None => {
            encode_varint(buf, step.byte_len() as u64);
            buf.extend_from_slice(step.as_bytes());
        }
    }

    match key.offset() {
        Some(offset) => encode_varint(buf, offset),
        None => buf.extend_from_slice(key.hash().as_bytes()),
    }

    if let Some(m) = meta {
        if !m.is_default() {
            buf.push(m.to_byte());
        }
    }
}

/// Decode a compressed payload back to its bin form.
///
/// `kind` supplies the rootness the payload itself does not carry; `offset`
/// is the entry's pack position, used only in errors.
pub fn decode(
    payload: &[u8],
    kind: EntryKind,
    ctx: &dyn DecodeCtx,
    offset: u64,
) -> NodeResult<Bin> {
    let root = match kind {
        EntryKind::InodeV2Root | EntryKind::InodeV1Stable => true,
        EntryKind::InodeV2NonRoot | EntryKind::InodeV1Unstable => false,
        _ => {
            return Err(NodeError::CorruptedEntry {
                offset,
                field: "kind".into(),
            })
        }
    };

    let mut r = Reader {
        data: payload,
        pos: 0,
        offset,
    };
    let shape = r.byte("shape")?;
    let bin = match shape {
        SHAPE_VALUES => {
            let count = r.varint("binding count")? as usize;
            let mut bindings = Vec::with_capacity(count.min(payload.len()));
            for _ in 0..count {
                bindings.push(r.binding(ctx)?);
            }
            Bin::values(root, bindings)
        }
        SHAPE_TREE => {
            let depth = r.varint("depth")? as usize;
            let length = r.varint("length")?;
            let count = r.varint("pointer count")? as usize;
            let mut ptrs = Vec::with_capacity(count.min(payload.len()));
            for _ in 0..count {
                let slot = r.varint("slot")? as usize;
                let key = r.address("pointer address", ctx)?;
                ptrs.push((slot, PtrRef::Key(key)));
            }
            Bin::tree(root, depth, length, ptrs)
        }
        _ => {
            return Err(NodeError::CorruptedEntry {
                offset,
                field: "shape".into(),
            })
        }
    };
    if r.pos != payload.len() {
        return Err(NodeError::CorruptedEntry {
            offset,
            field: "trailing bytes".into(),
        });
    }
    Ok(bin)
}

/// Payload length of a legacy (headerless) inode entry, recovered by
/// walking the encoding. Returns `None` when the bytes are not a well-formed
/// compressed inode.
pub fn probe_len(kind: EntryKind, data: &[u8]) -> Option<usize> {
    if !kind.is_inode() {
        return None;
    }
    let mut pos = 0usize;
    let shape = *data.get(pos)?;
    pos += 1;
    match shape {
        SHAPE_VALUES => {
            let (count, n) = decode_varint(data.get(pos..)?)?;
            pos += n;
            for _ in 0..count {
                pos = probe_binding(data, pos)?;
            }
        }
        SHAPE_TREE => {
            let (_, n) = decode_varint(data.get(pos..)?)?; // depth
            pos += n;
            let (_, n) = decode_varint(data.get(pos..)?)?; // length
            pos += n;
            let (count, n) = decode_varint(data.get(pos..)?)?;
            pos += n;
            for _ in 0..count {
                let (_, n) = decode_varint(data.get(pos..)?)?; // slot
                pos += n;
                let tag = *data.get(pos)?;
                pos += 1;
                match tag {
                    ADDR_DIRECT => pos += 32,
                    ADDR_INDIRECT => {
                        let (_, n) = decode_varint(data.get(pos..)?)?;
                        pos += n;
                    }
                    _ => return None,
                }
                if pos > data.len() {
                    return None;
                }
            }
        }
        _ => return None,
    }
    if pos <= data.len() {
        Some(pos)
    } else {
        None
    }
}

fn probe_binding(data: &[u8], mut pos: usize) -> Option<usize> {
    let tag = *data.get(pos)?;
    pos += 1;
    if tag > NODE_DD {
        return None;
    }
    let name_indirect = tag <= NODE_ID;
    let addr_indirect = matches!(
        tag,
        CONTENTS_II | CONTENTS_X_II | NODE_II | CONTENTS_DI | CONTENTS_X_DI | NODE_DI
    );
    let has_meta = matches!(tag, CONTENTS_X_II | CONTENTS_X_ID | CONTENTS_X_DI | CONTENTS_X_DD);

    if name_indirect {
        pos += 2;
    } else {
        let (len, n) = decode_varint(data.get(pos..)?)?;
        pos = pos.checked_add(n)?.checked_add(usize::try_from(len).ok()?)?;
    }
    if addr_indirect {
        let (_, n) = decode_varint(data.get(pos..)?)?;
        pos += n;
    } else {
        pos += 32;
    }
    if has_meta {
        pos += 1;
    }
    if pos <= data.len() {
        Some(pos)
    } else {
        None
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    offset: u64,
}

impl<'a> Reader<'a> {
    fn fail<T>(&self, field: &str) -> NodeResult<T> {
        Err(NodeError::CorruptedEntry {
            offset: self.offset,
            field: field.into(),
        })
    }

    fn byte(&mut self, field: &str) -> NodeResult<u8> {
        match self.data.get(self.pos) {
            Some(&b) => {
                self.pos += 1;
                Ok(b)
            }
            None => self.fail(field),
        }
    }

    fn take(&mut self, n: usize, field: &str) -> NodeResult<&'a [u8]> {
        let end = match self.pos.checked_add(n) {
            Some(end) if end <= self.data.len() => end,
            _ => return self.fail(field),
        };
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn varint(&mut self, field: &str) -> NodeResult<u64> {
        match decode_varint(&self.data[self.pos..]) {
            Some((value, n)) => {
                self.pos += n;
                Ok(value)
            }
            None => self.fail(field),
        }
    }

    fn hash(&mut self, field: &str) -> NodeResult<ObjectHash> {
        let bytes = self.take(32, field)?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(bytes);
        Ok(ObjectHash::from_digest(digest))
    }

    fn address(&mut self, field: &str, ctx: &dyn DecodeCtx) -> NodeResult<Key> {
        match self.byte(field)? {
            ADDR_DIRECT => Ok(Key::unhinted(self.hash(field)?)),
            ADDR_INDIRECT => {
                let offset = self.varint(field)?;
                match ctx.key_of_offset(offset)? {
                    Some(key) => Ok(key),
                    None => self.fail("address offset"),
                }
            }
            _ => self.fail(field),
        }
    }

    fn step(&mut self, indirect: bool, ctx: &dyn DecodeCtx) -> NodeResult<Step> {
        let name = if indirect {
            let id = u16::from_be_bytes(self.take(2, "dict id")?.try_into().expect("2 bytes"));
            match ctx.dict_resolve(id) {
                Some(s) => s,
                None => return self.fail("dict id"),
            }
        } else {
            let len = self.varint("step length")? as usize;
            let bytes = self.take(len, "step bytes")?;
            match std::str::from_utf8(bytes) {
                Ok(s) => s.to_string(),
                Err(_) => return self.fail("step bytes"),
            }
        };
        match Step::new(name) {
            Ok(step) => Ok(step),
            Err(_) => self.fail("step"),
        }
    }

    fn binding(&mut self, ctx: &dyn DecodeCtx) -> NodeResult<(Step, Value)> {
        let tag = self.byte("value tag")?;
        if tag > NODE_DD {
            return self.fail("value tag");
        }
        let name_indirect = tag <= NODE_ID;
        let addr_indirect = matches!(
            tag,
            CONTENTS_II | CONTENTS_X_II | NODE_II | CONTENTS_DI | CONTENTS_X_DI | NODE_DI
        );
        let is_node = matches!(tag, NODE_II | NODE_ID | NODE_DI | NODE_DD);
        let has_meta =
            matches!(tag, CONTENTS_X_II | CONTENTS_X_ID | CONTENTS_X_DI | CONTENTS_X_DD);

        let step = self.step(name_indirect, ctx)?;

        let key = if addr_indirect {
            let offset = self.varint("address offset")?;
            match ctx.key_of_offset(offset)? {
                Some(key) => key,
                None => return self.fail("address offset"),
            }
        } else {
            Key::unhinted(self.hash("address hash")?)
        };

        let value = if is_node {
            Value::node(key)
        } else if has_meta {
            let byte = self.byte("metadata")?;
            match Metadata::from_byte(byte) {
                Some(m) => Value::contents_with(key, m),
                None => return self.fail("metadata"),
            }
        } else {
            Value::contents(key)
        };
        Ok((step, value))
    }
}
