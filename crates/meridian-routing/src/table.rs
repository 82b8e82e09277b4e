//! Prefix routing table.
//!
//! # Layout
//!
//! `rows = ceil(128 / b)` rows, one per digit position, and `2^b` columns,
//! one per digit value. A remote handle lands in row `msdd(local, remote)`,
//! column `remote.digit(row)`: every entry of row `i` shares the local
//! node's digits above position `i`.
//!
//! ```text
//!   row 31 | 0 1 2 ... [L] ... f     <- differs in the top digit
//!   ...
//!   row  0 | 0 1 2 ... [L] ... f     <- differs only in the last digit
//! ```
//!
//! `[L]` marks the column equal to the local digit. That cell always holds
//! the local handle, so the local node is representable one level deeper
//! on every row.
//!
//! Cells are allocated on first use.

use meridian_id::{num_digits, Id};

use crate::bucket::{BucketInsert, RouteBucket};
use crate::handle::{HandleTable, NodeHandle};

/// The `rows x 2^b` grid of [`RouteBucket`]s.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    local: NodeHandle,
    digit_bits: u8,
    bucket_capacity: usize,
    rows: Vec<Vec<Option<RouteBucket>>>,
}

impl RoutingTable {
    /// An empty table holding only the local handle in its own cells.
    pub fn new(local: NodeHandle, digit_bits: u8, bucket_capacity: usize) -> Self {
        let num_rows = num_digits(digit_bits);
        let cols = 1usize << digit_bits;
        let local_id = local.id();

        let rows = (0..num_rows)
            .map(|row| {
                let mut cells: Vec<Option<RouteBucket>> = vec![None; cols];
                let mut own = RouteBucket::new(bucket_capacity);
                own.put(local, &HandleTable::new(), &local_id);
                cells[usize::from(local_id.digit(row, digit_bits))] = Some(own);
                cells
            })
            .collect();

        Self {
            local,
            digit_bits,
            bucket_capacity,
            rows,
        }
    }

    pub fn local(&self) -> &NodeHandle {
        &self.local
    }

    pub fn digit_bits(&self) -> u8 {
        self.digit_bits
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        1usize << self.digit_bits
    }

    /// Cell coordinates for `id`, or `None` for the local identifier.
    pub fn cell_of(&self, id: &Id) -> Option<(usize, usize)> {
        let row = self.local.id().msdd(id, self.digit_bits)?;
        Some((row, usize::from(id.digit(row, self.digit_bits))))
    }

    /// The cell a message for `key` should be forwarded from.
    ///
    /// `None` when `key` is the local identifier (the local node is the
    /// best match) or the cell has never been populated.
    pub fn best_entry(&self, key: &Id) -> Option<&RouteBucket> {
        let (row, col) = self.cell_of(key)?;
        self.bucket(row, col)
    }

    pub fn bucket(&self, row: usize, col: usize) -> Option<&RouteBucket> {
        self.rows.get(row)?.get(col)?.as_ref()
    }

    /// All cells of row `i`.
    pub fn row(&self, i: usize) -> &[Option<RouteBucket>] {
        &self.rows[i]
    }

    /// Offer a handle to its cell.
    pub fn put(&mut self, handle: NodeHandle, handles: &HandleTable) -> BucketInsert {
        let Some((row, col)) = self.cell_of(&handle.id()) else {
            return BucketInsert::Rejected;
        };
        let capacity = self.bucket_capacity;
        let local_id = self.local.id();
        self.rows[row][col]
            .get_or_insert_with(|| RouteBucket::new(capacity))
            .put(handle, handles, &local_id)
    }

    /// Remove a remote handle. The local handle cannot be removed.
    pub fn remove(&mut self, id: &Id) -> Option<NodeHandle> {
        let (row, col) = self.cell_of(id)?;
        self.rows[row][col].as_mut()?.remove(id)
    }

    pub fn get(&self, id: &Id) -> Option<&NodeHandle> {
        let (row, col) = self.cell_of(id)?;
        self.bucket(row, col)?.get(id)
    }

    /// Fallback next hop when the primary cell for `key` has nothing alive.
    ///
    /// Scans the MSDD row outward from the key's digit (`+1, -1, +2, -2, ...`
    /// modulo the column count) until the local digit is reached, keeping
    /// the live entry closest to `key`. Only entries strictly closer than
    /// the local node qualify; equal distances resolve to the lower id.
    pub fn best_alternate_route(&self, key: &Id, handles: &HandleTable) -> Option<NodeHandle> {
        let local_id = self.local.id();
        let row = local_id.msdd(key, self.digit_bits)?;
        let key_digit = usize::from(key.digit(row, self.digit_bits));
        let my_digit = usize::from(local_id.digit(row, self.digit_bits));
        let mask = self.num_columns() - 1;

        let mut best_distance = local_id.distance(key);
        let mut best: Option<NodeHandle> = None;

        let mut i = 1;
        loop {
            let mut finished = false;
            for digit in [(key_digit + i) & mask, (key_digit + mask + 1 - i) & mask] {
                for candidate in self.row_cell(row, digit) {
                    if !handles.is_alive(&candidate.id()) {
                        continue;
                    }
                    let d = candidate.id().distance(key);
                    let better = match best {
                        None => d < best_distance,
                        Some(current) => {
                            d < best_distance || (d == best_distance && candidate.id() < current.id())
                        }
                    };
                    if better {
                        best_distance = d;
                        best = Some(*candidate);
                    }
                }
                if digit == my_digit {
                    finished = true;
                }
            }
            if finished {
                return best;
            }
            i += 1;
        }
    }

    /// Up to `max` live entries of the MSDD row that are strictly closer to
    /// `key` than the local node, scanning outward from the key's digit.
    pub fn alternate_routes(&self, key: &Id, max: usize, handles: &HandleTable) -> Vec<NodeHandle> {
        let mut found = Vec::new();
        let local_id = self.local.id();
        let Some(row) = local_id.msdd(key, self.digit_bits) else {
            return found;
        };
        let key_digit = usize::from(key.digit(row, self.digit_bits));
        let my_digit = usize::from(local_id.digit(row, self.digit_bits));
        let mask = self.num_columns() - 1;
        let my_distance = local_id.distance(key);

        let mut i = 0;
        let mut finished = false;
        while !finished && found.len() < max {
            for digit in [(key_digit + i) & mask, (key_digit + mask + 1 - i) & mask] {
                for candidate in self.row_cell(row, digit) {
                    if found.len() >= max {
                        break;
                    }
                    if handles.is_alive(&candidate.id())
                        && candidate.id().distance(key) < my_distance
                        && !found.contains(candidate)
                    {
                        found.push(*candidate);
                    }
                }
                if digit == my_digit {
                    finished = true;
                }
            }
            i += 1;
        }
        found
    }

    /// Every remote handle in the table.
    pub fn handles(&self) -> impl Iterator<Item = &NodeHandle> + '_ {
        let local_id = self.local.id();
        self.rows
            .iter()
            .flatten()
            .flatten()
            .flat_map(|bucket| bucket.iter())
            .filter(move |h| h.id() != local_id)
    }

    /// Live remote handles of row `i`.
    pub fn live_row(&self, i: usize, handles: &HandleTable) -> Vec<NodeHandle> {
        let local_id = self.local.id();
        self.rows
            .get(i)
            .into_iter()
            .flatten()
            .flatten()
            .flat_map(|bucket| bucket.iter())
            .filter(|h| h.id() != local_id && handles.is_alive(&h.id()))
            .copied()
            .collect()
    }

    /// Number of remote handles held.
    pub fn len(&self) -> usize {
        self.handles().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn row_cell(&self, row: usize, col: usize) -> impl Iterator<Item = &NodeHandle> {
        self.bucket(row, col).into_iter().flat_map(|b| b.iter())
    }
}
