//! The FullRead/FullWrite supervalue payload (spec §6): bit-exact encoding
//! so that a node written by one client can be read back by another, or by
//! a future run of the same client, independent of in-memory layout.
//!
//! Layout: `nattrs: u16`, `celltype: u8`, `ncelloids: u32`, `lencelloids:
//! u32`, `attrs: u64 * nattrs`, then `ncelloids` cells each `nkey: varint`,
//! `pkey: nkey bytes` iff `celltype = 1`, `child_oid: u64` little-endian,
//! followed by a serialized `prki` iff `celltype = 1`.

use std::sync::Arc;

use bytes::Bytes;
use dtree_btree::{Cell, SuperValue};
use dtree_error::{DtError, DtResult};
use dtree_generic::{CellType, Key, KeyInfo, LexicographicComparator, Oid, PackedKeyComparator, SortOrder};

use crate::varint::{get_varint, put_varint};

/// A decoded node payload, cheap to convert to/from `SuperValue`. Kept
/// separate from `SuperValue` itself so this crate never needs to know
/// about the comparator a caller eventually injects for packed keys.
#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct WireNode {
    pub nattrs: u16,
    pub celltype: u8,
    pub attrs: Vec<u64>,
    pub cells: Vec<WireCell>,
    pub sort_order: Vec<SortOrder>,
}

#[derive(Clone, serde::Serialize, serde::Deserialize)]
pub struct WireCell {
    pub nkey: i64,
    pub pkey: Option<Bytes>,
    pub child_oid: u64,
}

/// Encode a supervalue's node payload, exactly as it would cross the wire
/// in a FullWrite request or a FullRead reply.
pub fn encode_node(sv: &SuperValue) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(&(sv.nattrs() as u16).to_le_bytes());
    let celltype = sv.cell_type() as u8;
    out.push(celltype);
    out.extend_from_slice(&(sv.ncells() as u32).to_le_bytes());

    // lencelloids is filled in after the celloids region is built, since
    // its own varint-prefixed cells have variable width.
    let lencelloids_pos = out.len();
    out.extend_from_slice(&0u32.to_le_bytes());

    for i in 0..sv.nattrs() {
        out.extend_from_slice(&sv.attr(i).expect("index within nattrs").to_le_bytes());
    }

    let celloids_start = out.len();
    for cell in sv.cells() {
        match &cell.key {
            Key::Int(n) => {
                put_varint(&mut out, *n as u64);
            }
            Key::Packed(bytes) => {
                put_varint(&mut out, bytes.len() as u64);
                out.extend_from_slice(bytes);
            }
        }
        out.extend_from_slice(&cell.value.as_u64().to_le_bytes());
    }
    let lencelloids = (out.len() - celloids_start) as u32;
    out[lencelloids_pos..lencelloids_pos + 4].copy_from_slice(&lencelloids.to_le_bytes());

    if celltype == CellType::Packed as u8 {
        encode_prki(&mut out, sv.prki());
    }

    out
}

fn encode_prki(out: &mut Vec<u8>, prki: Option<&Arc<KeyInfo>>) {
    let sort_order = prki.map(|info| info.sort_order.as_slice()).unwrap_or(&[]);
    out.extend_from_slice(&(sort_order.len() as u32).to_le_bytes());
    for order in sort_order {
        out.push(match order {
            SortOrder::Asc => 0,
            SortOrder::Desc => 1,
        });
    }
}

/// Decode a node payload from `input`, returning the parsed structure and
/// the number of bytes consumed.
pub fn decode_node(input: &[u8]) -> DtResult<(WireNode, usize)> {
    if input.len() < 2 + 1 + 4 + 4 {
        return Err(DtError::corrupted_log("node payload shorter than fixed header"));
    }

    let mut pos = 0usize;
    let nattrs = u16::from_le_bytes([input[0], input[1]]);
    pos += 2;
    let celltype = input[pos];
    pos += 1;
    let ncelloids = u32::from_le_bytes(input[pos..pos + 4].try_into().unwrap());
    pos += 4;
    let lencelloids = u32::from_le_bytes(input[pos..pos + 4].try_into().unwrap());
    pos += 4;

    let mut attrs = Vec::with_capacity(nattrs as usize);
    for _ in 0..nattrs {
        let slot = input
            .get(pos..pos + 8)
            .ok_or_else(|| DtError::corrupted_log("truncated attrs region"))?;
        attrs.push(u64::from_le_bytes(slot.try_into().unwrap()));
        pos += 8;
    }

    let celloids_start = pos;
    let celloids_end = celloids_start
        .checked_add(lencelloids as usize)
        .ok_or_else(|| DtError::corrupted_log("lencelloids overflow"))?;
    if celloids_end > input.len() {
        return Err(DtError::corrupted_log("lencelloids exceeds payload length"));
    }

    let mut cells = Vec::with_capacity(ncelloids as usize);
    let mut cursor = celloids_start;
    for _ in 0..ncelloids {
        let (nkey_u, consumed) = get_varint(&input[cursor..celloids_end])
            .ok_or_else(|| DtError::corrupted_log("truncated cell nkey varint"))?;
        cursor += consumed;

        let pkey = if celltype == CellType::Packed as u8 {
            let nkey = nkey_u as usize;
            let bytes = input
                .get(cursor..cursor + nkey)
                .ok_or_else(|| DtError::corrupted_log("truncated pkey bytes"))?;
            cursor += nkey;
            Some(Bytes::copy_from_slice(bytes))
        } else {
            None
        };

        let child_oid_bytes = input
            .get(cursor..cursor + 8)
            .ok_or_else(|| DtError::corrupted_log("truncated child_oid"))?;
        let child_oid = u64::from_le_bytes(child_oid_bytes.try_into().unwrap());
        cursor += 8;

        cells.push(WireCell {
            nkey: nkey_u as i64,
            pkey,
            child_oid,
        });
    }
    pos = celloids_end;

    let sort_order = if celltype == CellType::Packed as u8 {
        let (order, consumed) = decode_prki(&input[pos..])?;
        pos += consumed;
        order
    } else {
        Vec::new()
    };

    Ok((
        WireNode {
            nattrs,
            celltype,
            attrs,
            cells,
            sort_order,
        },
        pos,
    ))
}

fn decode_prki(input: &[u8]) -> DtResult<(Vec<SortOrder>, usize)> {
    if input.len() < 4 {
        return Err(DtError::corrupted_log("truncated prki length"));
    }
    let count = u32::from_le_bytes(input[0..4].try_into().unwrap()) as usize;
    let mut pos = 4;
    let mut sort_order = Vec::with_capacity(count);
    for _ in 0..count {
        let byte = *input
            .get(pos)
            .ok_or_else(|| DtError::corrupted_log("truncated prki sort-order byte"))?;
        sort_order.push(if byte == 0 { SortOrder::Asc } else { SortOrder::Desc });
        pos += 1;
    }
    Ok((sort_order, pos))
}

/// Rebuild a `SuperValue` from a decoded wire node. `comparator` supplies
/// the packed-key collation a caller has wired in (the actual comparison
/// library is out of scope here); a `LexicographicComparator` is used if
/// none is given.
pub fn to_supervalue(wire: &WireNode, comparator: Option<Arc<dyn PackedKeyComparator>>) -> DtResult<SuperValue> {
    let cell_type = if wire.celltype == CellType::Packed as u8 {
        CellType::Packed
    } else {
        CellType::Int
    };

    let prki = match cell_type {
        CellType::Packed => {
            let comparator = comparator.unwrap_or_else(|| Arc::new(LexicographicComparator::default()));
            Some(Arc::new(KeyInfo::new(wire.sort_order.clone(), comparator)))
        }
        CellType::Int => None,
    };

    let mut sv = SuperValue::new(cell_type, wire.nattrs as u8, prki);
    for (i, value) in wire.attrs.iter().enumerate() {
        sv.set_attr(i, *value)?;
    }

    for (pos, cell) in wire.cells.iter().enumerate() {
        let key = match cell_type {
            CellType::Int => Key::Int(cell.nkey),
            CellType::Packed => Key::Packed(
                cell.pkey
                    .clone()
                    .ok_or_else(|| DtError::corrupted_log("packed cell is missing pkey bytes"))?,
            ),
        };
        sv.insert_cell(pos, Cell::new(key, Oid::from(cell.child_oid)));
    }

    Ok(sv)
}

/// Encode a `SuperValue` to its bit-exact node payload and immediately
/// decode it back to a `WireNode`, used when a caller already has a
/// `WireNode` in hand and wants the round trip validated (primarily
/// exercised by tests).
pub fn roundtrip(sv: &SuperValue) -> DtResult<WireNode> {
    let bytes = encode_node(sv);
    decode_node(&bytes).map(|(node, _)| node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intkey_leaf_roundtrips() {
        let mut sv = SuperValue::new_leaf(CellType::Int, None);
        sv.insert_cell(0, Cell::leaf(Key::Int(1)));
        sv.insert_cell(1, Cell::leaf(Key::Int(5)));
        sv.set_lastptr(Oid::from(0));

        let encoded = encode_node(&sv);
        let (decoded, consumed) = decode_node(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.celltype, CellType::Int as u8);
        assert_eq!(decoded.cells.len(), 2);
        assert_eq!(decoded.cells[0].nkey, 1);
        assert_eq!(decoded.cells[1].nkey, 5);
        assert!(decoded.cells[0].pkey.is_none());
    }

    #[test]
    fn packed_inner_node_roundtrips_with_prki() {
        let info = Arc::new(KeyInfo::new(vec![SortOrder::Asc, SortOrder::Desc], {
            struct Cmp;
            impl dtree_generic::PackedKeyComparator for Cmp {
                fn compare(&self, l: &[u8], r: &[u8], _: &[SortOrder]) -> std::cmp::Ordering {
                    l.cmp(r)
                }
            }
            Arc::new(Cmp)
        }));
        let mut sv = SuperValue::new_inner(CellType::Packed, 1, Some(info));
        sv.insert_cell(0, Cell::new(Key::Packed(Bytes::from_static(b"abc")), Oid::from(7)));
        sv.set_lastptr(Oid::from(9));

        let encoded = encode_node(&sv);
        let (decoded, consumed) = decode_node(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded.celltype, CellType::Packed as u8);
        assert_eq!(decoded.cells.len(), 1);
        assert_eq!(decoded.cells[0].pkey.as_deref(), Some(&b"abc"[..]));
        assert_eq!(decoded.cells[0].child_oid, 7);
        assert_eq!(decoded.sort_order, vec![SortOrder::Asc, SortOrder::Desc]);
    }

    #[test]
    fn truncated_payload_is_corrupted_log_error() {
        let err = decode_node(&[0u8; 3]).unwrap_err();
        assert_eq!(err.code(), dtree_error::StatusCode::CorruptedLog);
    }

    #[test]
    fn to_supervalue_rebuilds_an_equivalent_node() {
        let mut original = SuperValue::new_leaf(CellType::Int, None);
        original.insert_cell(0, Cell::leaf(Key::Int(3)));
        original.insert_cell(1, Cell::leaf(Key::Int(9)));
        original.set_rightptr(Oid::from(42));

        let wire = roundtrip(&original).unwrap();
        let rebuilt = to_supervalue(&wire, None).unwrap();

        assert_eq!(rebuilt.ncells(), 2);
        assert_eq!(rebuilt.key_at(0).as_int(), Some(3));
        assert_eq!(rebuilt.key_at(1).as_int(), Some(9));
        assert_eq!(rebuilt.rightptr(), Oid::from(42));
        assert!(rebuilt.is_leaf());
    }
}
