//! Compact sorted offset lists translating genome positions to meta-genome positions
//!
//! An [`OffsetList`] stores `(position, value)` pairs in two parallel `i32`
//! arrays. Once sorted, `value` is the number of meta-genome bases inserted
//! before `position`, so a genome position `p` lives at `p + value` in the
//! meta-genome, where `value` belongs to the closest stored position `<= p`.

use crate::{MgsError, MgsResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Format version written in front of every serialized offset list
pub const OFFSET_LIST_VERSION: i32 = 0;

const INITIAL_CAPACITY: usize = 16;
const MIN_GROWTH: usize = 1_024;
const MAX_GROWTH: usize = 1 << 20;

/// A `(position, value)` pair.
///
/// Ordering is by position, then by value, so that among offsets sharing a
/// position the one carrying the largest shift sorts last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    pub position: i32,
    pub value: i32,
}

impl Offset {
    pub fn new(position: i32, value: i32) -> Self {
        Self { position, value }
    }

    /// Position of this offset on the meta-genome axis
    pub fn meta_position(&self) -> i64 {
        self.position as i64 + self.value as i64
    }
}

/// Sorted, binary-searchable list of offsets for one chromosome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetList {
    positions: Vec<i32>,
    values: Vec<i32>,
}

impl OffsetList {
    pub fn new() -> Self {
        Self {
            positions: Vec::with_capacity(INITIAL_CAPACITY),
            values: Vec::with_capacity(INITIAL_CAPACITY),
        }
    }

    pub fn from_offsets<I: IntoIterator<Item = Offset>>(offsets: I) -> Self {
        let mut list = Self::new();
        for offset in offsets {
            list.push(offset);
        }
        list
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.positions.capacity()
    }

    /// Appends an offset.
    ///
    /// Capacity doubles when full, with the increment clamped so small lists
    /// don't reallocate constantly and huge chromosomes don't over-allocate.
    pub fn push(&mut self, offset: Offset) {
        if self.positions.len() == self.positions.capacity() {
            let growth = self.positions.capacity().clamp(MIN_GROWTH, MAX_GROWTH);
            self.positions.reserve_exact(growth);
            self.values.reserve_exact(growth);
        }
        self.positions.push(offset.position);
        self.values.push(offset.value);
    }

    pub fn get(&self, index: usize) -> Option<Offset> {
        Some(Offset::new(*self.positions.get(index)?, *self.values.get(index)?))
    }

    /// Replaces the offset at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn set(&mut self, index: usize, offset: Offset) {
        self.positions[index] = offset.position;
        self.values[index] = offset.value;
    }

    pub fn iter(&self) -> impl Iterator<Item = Offset> + '_ {
        self.positions
            .iter()
            .zip(self.values.iter())
            .map(|(&position, &value)| Offset::new(position, value))
    }

    pub fn last(&self) -> Option<Offset> {
        self.len().checked_sub(1).and_then(|index| self.get(index))
    }

    /// Stable sort by position, then value.
    pub fn sort(&mut self) {
        let mut offsets: Vec<Offset> = self.iter().collect();
        offsets.sort();
        for (index, offset) in offsets.into_iter().enumerate() {
            self.set(index, offset);
        }
    }

    /// Keeps only the last offset of every run of equal positions.
    ///
    /// The list must be sorted.
    pub(crate) fn remove_duplicates(&mut self) {
        let len = self.len();
        let mut kept = 0;
        for index in 0..len {
            if index + 1 < len && self.positions[index + 1] == self.positions[index] {
                continue;
            }
            self.positions[kept] = self.positions[index];
            self.values[kept] = self.values[index];
            kept += 1;
        }
        self.positions.truncate(kept);
        self.values.truncate(kept);
    }

    /// Turns per-offset deltas into running totals and moves every position
    /// one base forward, from the VCF anchor base to the first shifted base.
    ///
    /// The list must be sorted and free of duplicate positions. Fails when
    /// a running total or a moved position leaves the `i32` range.
    pub(crate) fn synchronize_positions(&mut self) -> MgsResult<()> {
        let mut total: i32 = 0;
        for index in 0..self.len() {
            let position = self.positions[index];
            let overflow = || MgsError::CoordinateOverflow(format!("offset at {}", position));
            total = total.checked_add(self.values[index]).ok_or_else(overflow)?;
            self.values[index] = total;
            self.positions[index] = position.checked_add(1).ok_or_else(overflow)?;
        }
        Ok(())
    }

    /// Whether positions never decrease, or with `strict` always increase.
    pub(crate) fn is_sorted_by_position(&self, strict: bool) -> bool {
        self.positions
            .windows(2)
            .all(|pair| if strict { pair[0] < pair[1] } else { pair[0] <= pair[1] })
    }

    /// Index of the offset at or immediately before `genome_position`.
    ///
    /// Returns `None` when every stored position is larger.
    pub fn floor_index(&self, genome_position: i32) -> Option<usize> {
        floor_search(self.len(), genome_position as i64, |index| {
            self.positions[index] as i64
        })
    }

    /// Translates a genome position to the meta-genome.
    pub fn meta_genome_position(&self, genome_position: i32) -> i32 {
        match self.floor_index(genome_position) {
            Some(index) => {
                let position = self.positions[index];
                position + self.values[index] + (genome_position - position)
            }
            None => genome_position,
        }
    }

    /// Translates a meta-genome position back to the genome.
    ///
    /// Returns `None` when the meta-genome position lies in a gap that holds
    /// no base of this genome (inserted bases of other genomes, deletions).
    pub fn genome_position(&self, meta_genome_position: i32) -> Option<i32> {
        let target = meta_genome_position as i64;
        let found = floor_search(self.len(), target, |index| {
            self.positions[index] as i64 + self.values[index] as i64
        });

        let shift = found.map_or(0, |index| self.values[index] as i64);
        let next = found.map_or(0, |index| index + 1);
        if next < self.len() && target >= self.positions[next] as i64 + shift {
            return None;
        }
        Some((target - shift) as i32)
    }

    /// Total shift at the end of the chromosome.
    pub fn total_shift(&self) -> i32 {
        self.values.last().copied().unwrap_or(0)
    }

    /// Shrinks the backing arrays to the number of stored offsets.
    pub fn compact(&mut self) {
        self.positions.shrink_to_fit();
        self.values.shrink_to_fit();
    }

    /// Writes the list as a version tag, a size and the two arrays.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> MgsResult<()> {
        writer.write_i32::<LittleEndian>(OFFSET_LIST_VERSION)?;
        writer.write_i32::<LittleEndian>(self.len() as i32)?;
        for &position in &self.positions {
            writer.write_i32::<LittleEndian>(position)?;
        }
        for &value in &self.values {
            writer.write_i32::<LittleEndian>(value)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> MgsResult<Self> {
        let version = reader.read_i32::<LittleEndian>()?;
        match version {
            0 => {
                let size = read_size(reader, "offset list")?;
                let mut positions = Vec::with_capacity(size);
                for _ in 0..size {
                    positions.push(reader.read_i32::<LittleEndian>()?);
                }
                let mut values = Vec::with_capacity(size);
                for _ in 0..size {
                    values.push(reader.read_i32::<LittleEndian>()?);
                }
                Ok(Self { positions, values })
            }
            _ => Err(MgsError::UnsupportedVersion {
                structure: "offset list",
                version,
            }),
        }
    }
}

/// Binary search for the last index whose key is `<= target`.
fn floor_search<F: Fn(usize) -> i64>(len: usize, target: i64, key: F) -> Option<usize> {
    let mut low = 0;
    let mut high = len;
    while low < high {
        let middle = low + (high - low) / 2;
        if key(middle) <= target {
            low = middle + 1;
        } else {
            high = middle;
        }
    }
    low.checked_sub(1)
}

/// Reads a non-negative `i32` element count.
pub(crate) fn read_size<R: Read>(reader: &mut R, structure: &str) -> MgsResult<usize> {
    let size = reader.read_i32::<LittleEndian>()?;
    if size < 0 {
        return Err(MgsError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("negative {} size {}", structure, size),
        )));
    }
    Ok(size as usize)
}
