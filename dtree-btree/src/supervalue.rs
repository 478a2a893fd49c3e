//! The B-tree node format: a cell list plus fixed attribute slots, fence
//! keys and a split-location policy (spec §3, §4.1).

use std::sync::Arc;

use dtree_error::{DtError, DtResult};
use dtree_generic::{CellType, Key, KeyCollator, KeyInfo, Oid};

use crate::cell::Cell;

/// Attribute slot indices, by convention (spec §3).
pub mod attr {
    pub const FLAGS: usize = 0;
    pub const HEIGHT: usize = 1;
    pub const LASTPTR: usize = 2;
    pub const LEFTPTR: usize = 3;
    pub const RIGHTPTR: usize = 4;
}

/// `FLAGS` bit layout.
pub mod flags {
    pub const INTKEY: u64 = 1 << 0;
    pub const LEAF: u64 = 1 << 1;
}

pub const MAX_ATTRS: usize = 6;

/// A B-tree node: fixed attribute slots, an ordered cell list, and a
/// shared collation for composite keys.
#[derive(Clone)]
pub struct SuperValue {
    attrs: [u64; MAX_ATTRS],
    nattrs: u8,
    cell_type: CellType,
    cells: Vec<Cell>,
    cells_size: u64,
    prki: Option<Arc<KeyInfo>>,
}

impl SuperValue {
    pub fn new(cell_type: CellType, nattrs: u8, prki: Option<Arc<KeyInfo>>) -> Self {
        assert!((nattrs as usize) <= MAX_ATTRS, "Nattrs must be <= {}", MAX_ATTRS);
        Self {
            attrs: [0; MAX_ATTRS],
            nattrs,
            cell_type,
            cells: Vec::new(),
            cells_size: 0,
            prki,
        }
    }

    pub fn new_leaf(cell_type: CellType, prki: Option<Arc<KeyInfo>>) -> Self {
        let mut sv = Self::new(cell_type, attr::RIGHTPTR as u8 + 1, prki);
        let mut f = flags::LEAF;
        if cell_type == CellType::Int {
            f |= flags::INTKEY;
        }
        sv.attrs[attr::FLAGS] = f;
        sv
    }

    pub fn new_inner(cell_type: CellType, height: u64, prki: Option<Arc<KeyInfo>>) -> Self {
        let mut sv = Self::new(cell_type, attr::RIGHTPTR as u8 + 1, prki);
        let mut f = 0u64;
        if cell_type == CellType::Int {
            f |= flags::INTKEY;
        }
        sv.attrs[attr::FLAGS] = f;
        sv.attrs[attr::HEIGHT] = height;
        sv
    }

    pub fn nattrs(&self) -> usize {
        self.nattrs as usize
    }

    pub fn cell_type(&self) -> CellType {
        self.cell_type
    }

    pub fn prki(&self) -> Option<&Arc<KeyInfo>> {
        self.prki.as_ref()
    }

    pub fn collator(&self) -> KeyCollator {
        match self.cell_type {
            CellType::Int => KeyCollator::intkey(),
            CellType::Packed => KeyCollator::new(self.prki.as_deref().cloned()),
        }
    }

    pub fn attr(&self, id: usize) -> DtResult<u64> {
        if id >= self.nattrs() {
            return Err(DtError::attr_out_of_range(id, self.nattrs()));
        }
        Ok(self.attrs[id])
    }

    pub fn set_attr(&mut self, id: usize, value: u64) -> DtResult<()> {
        if id >= self.nattrs() {
            return Err(DtError::attr_out_of_range(id, self.nattrs()));
        }
        self.attrs[id] = value;
        Ok(())
    }

    pub fn flags(&self) -> u64 {
        self.attrs[attr::FLAGS]
    }

    pub fn is_leaf(&self) -> bool {
        self.flags() & flags::LEAF != 0
    }

    pub fn is_intkey(&self) -> bool {
        self.flags() & flags::INTKEY != 0
    }

    pub fn height(&self) -> u64 {
        self.attrs[attr::HEIGHT]
    }

    pub fn lastptr(&self) -> Oid {
        Oid::from(self.attrs[attr::LASTPTR])
    }

    pub fn set_lastptr(&mut self, oid: Oid) {
        self.attrs[attr::LASTPTR] = oid.as_u64();
    }

    pub fn leftptr(&self) -> Oid {
        Oid::from(self.attrs[attr::LEFTPTR])
    }

    pub fn set_leftptr(&mut self, oid: Oid) {
        self.attrs[attr::LEFTPTR] = oid.as_u64();
    }

    pub fn rightptr(&self) -> Oid {
        Oid::from(self.attrs[attr::RIGHTPTR])
    }

    pub fn set_rightptr(&mut self, oid: Oid) {
        self.attrs[attr::RIGHTPTR] = oid.as_u64();
    }

    pub fn is_leftmost(&self) -> bool {
        self.leftptr().as_u64() == 0
    }

    pub fn is_rightmost(&self) -> bool {
        self.rightptr().as_u64() == 0
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn ncells(&self) -> usize {
        self.cells.len()
    }

    pub fn cells_size(&self) -> u64 {
        self.cells_size
    }

    pub fn key_at(&self, i: usize) -> &Key {
        &self.cells[i].key
    }

    /// Index of the rightmost child pointer for an inner node: equal to
    /// `Ncells`, covering `lastptr`.
    pub fn last_index(&self) -> usize {
        self.cells.len()
    }

    /// The child oid at index `i` (`0 <= i <= Ncells`), where `i ==
    /// Ncells` means `lastptr`.
    pub fn child_at(&self, i: usize) -> Oid {
        if i == self.cells.len() {
            self.lastptr()
        } else {
            self.cells[i].value
        }
    }

    /// Grow `Cells` by one at `pos`, leaving the new slot to be populated
    /// by the caller, who is responsible for updating `CellsSize`
    /// (spec §4.1 `InsertCell`).
    pub fn insert_cell(&mut self, pos: usize, cell: Cell) {
        self.cells_size += cell.size();
        self.cells.insert(pos, cell);
    }

    /// Remove the cell at `pos`, freeing its owned composite-key bytes and
    /// updating `CellsSize` (spec §4.1 `DeleteCell`).
    pub fn delete_cell(&mut self, pos: usize) -> Cell {
        let cell = self.cells.remove(pos);
        self.cells_size -= cell.size();
        cell
    }

    /// Remove cells `[start, end)`, updating `CellsSize` (spec §4.1
    /// `DeleteCellRange`).
    pub fn delete_cell_range(&mut self, start: usize, end: usize) {
        if start >= end {
            return;
        }
        for cell in self.cells.drain(start..end) {
            self.cells_size -= cell.size();
        }
    }

    /// Replace the cell at `pos` in place, freeing the old cell's bytes
    /// (used by pending-op `add` replay when the key already exists).
    pub fn replace_cell(&mut self, pos: usize, cell: Cell) {
        self.cells_size -= self.cells[pos].size();
        self.cells_size += cell.size();
        self.cells[pos] = cell;
    }

    /// Assert (I2): cells are strictly sorted and `CellsSize` is the exact
    /// sum of cell sizes.
    pub fn check_sorted_and_sized(&self) -> DtResult<()> {
        let collator = self.collator();
        for pair in self.cells.windows(2) {
            if collator.compare_slice(&pair[0].key, &pair[1].key) != std::cmp::Ordering::Less {
                return Err(DtError::corrupted_log("cells are not strictly sorted"));
            }
        }

        let sum: u64 = self.cells.iter().map(Cell::size).sum();
        if sum != self.cells_size {
            return Err(DtError::corrupted_log(format!(
                "CellsSize {} does not match computed sum {}",
                self.cells_size, sum
            )));
        }

        Ok(())
    }
}
