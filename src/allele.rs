//! Per-chromosome offset lists for one allele and for the reference genome
//!
//! Both synchronizers are typestates. An allele goes `Unsorted → Sorted`;
//! the reference goes `Unsorted → Sorted → Deduplicated → Synchronized`.
//! Each transition consumes the previous state, and position lookups only
//! exist on the states where the lists are ready for binary search.

use crate::offset::{read_size, Offset, OffsetList};
use crate::{MgsError, MgsResult};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use std::io::{Read, Write};
use std::marker::PhantomData;

/// Format version of serialized allele and reference synchronizers
pub const SYNCHRONIZER_VERSION: i32 = 0;

/// Offsets are still being appended in scan order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsorted;

/// Every chromosome list is sorted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sorted;

/// Sorted, one offset per position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deduplicated;

/// Offsets hold cumulative shifts; ready for lookups
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Synchronized;

/// States in which the lists answer position queries
pub trait Lookup {}

impl Lookup for Sorted {}
impl Lookup for Synchronized {}

/// One offset list per chromosome for one allele
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlleleSynchronizer<S = Unsorted> {
    lists: Vec<OffsetList>,
    state: PhantomData<S>,
}

impl<S> AlleleSynchronizer<S> {
    fn transition<T>(self) -> AlleleSynchronizer<T> {
        AlleleSynchronizer {
            lists: self.lists,
            state: PhantomData,
        }
    }

    pub fn chromosome_count(&self) -> usize {
        self.lists.len()
    }

    pub fn list(&self, chromosome: usize) -> MgsResult<&OffsetList> {
        self.lists
            .get(chromosome)
            .ok_or_else(|| MgsError::UnknownChromosome(format!("index {}", chromosome)))
    }

    fn list_mut(&mut self, chromosome: usize) -> MgsResult<&mut OffsetList> {
        self.lists
            .get_mut(chromosome)
            .ok_or_else(|| MgsError::UnknownChromosome(format!("index {}", chromosome)))
    }

    /// Total number of offsets over all chromosomes
    pub fn offset_count(&self) -> usize {
        self.lists.iter().map(OffsetList::len).sum()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> MgsResult<()> {
        writer.write_i32::<LittleEndian>(SYNCHRONIZER_VERSION)?;
        writer.write_i32::<LittleEndian>(self.lists.len() as i32)?;
        for list in &self.lists {
            list.write_to(writer)?;
        }
        Ok(())
    }
}

impl AlleleSynchronizer<Unsorted> {
    /// Creates one empty list per chromosome.
    pub fn new(chromosome_count: usize) -> Self {
        Self {
            lists: (0..chromosome_count).map(|_| OffsetList::new()).collect(),
            state: PhantomData,
        }
    }

    pub fn push(&mut self, chromosome: usize, offset: Offset) -> MgsResult<()> {
        self.list_mut(chromosome)?.push(offset);
        Ok(())
    }

    /// Sorts every chromosome in parallel.
    pub fn sort(mut self) -> AlleleSynchronizer<Sorted> {
        self.lists.par_iter_mut().for_each(OffsetList::sort);
        self.transition()
    }
}

impl AlleleSynchronizer<Sorted> {
    /// Wraps lists that are already sorted by construction.
    pub(crate) fn from_sorted_lists(lists: Vec<OffsetList>) -> Self {
        Self {
            lists,
            state: PhantomData,
        }
    }
}

impl<S: Lookup> AlleleSynchronizer<S> {
    pub fn compact(&mut self) {
        self.lists.par_iter_mut().for_each(OffsetList::compact);
    }

    pub fn meta_genome_position(&self, chromosome: usize, genome_position: i32) -> MgsResult<i32> {
        Ok(self.list(chromosome)?.meta_genome_position(genome_position))
    }

    /// `Ok(None)` when the meta-genome position holds no base of this allele
    pub fn genome_position(&self, chromosome: usize, meta_genome_position: i32) -> MgsResult<Option<i32>> {
        Ok(self.list(chromosome)?.genome_position(meta_genome_position))
    }

    /// Reads lists written by `write_to`; every list must be sorted by position.
    pub fn read_from<R: Read>(reader: &mut R) -> MgsResult<Self> {
        let version = reader.read_i32::<LittleEndian>()?;
        match version {
            0 => {
                let count = read_size(reader, "allele")?;
                let mut lists = Vec::with_capacity(count);
                for _ in 0..count {
                    lists.push(OffsetList::read_from(reader)?);
                }
                let allele = Self {
                    lists,
                    state: PhantomData,
                };
                allele.check_order(false)?;
                Ok(allele)
            }
            _ => Err(MgsError::UnsupportedVersion {
                structure: "allele synchronizer",
                version,
            }),
        }
    }

    fn check_order(&self, strict: bool) -> MgsResult<()> {
        match self
            .lists
            .iter()
            .position(|list| !list.is_sorted_by_position(strict))
        {
            Some(chromosome) => Err(MgsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("offsets of chromosome {} are out of order", chromosome),
            ))),
            None => Ok(()),
        }
    }
}

/// Offset lists of the reference coordinate space.
///
/// Every genome's insertions are merged here as `(anchor position, length)`
/// deltas. Deduplication keeps one gap per anchor and synchronization turns
/// the deltas into cumulative shifts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSynchronizer<S = Unsorted> {
    allele: AlleleSynchronizer<S>,
}

impl<S> ReferenceSynchronizer<S> {
    pub fn allele(&self) -> &AlleleSynchronizer<S> {
        &self.allele
    }

    pub fn chromosome_count(&self) -> usize {
        self.allele.chromosome_count()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> MgsResult<()> {
        writer.write_i32::<LittleEndian>(SYNCHRONIZER_VERSION)?;
        self.allele.write_to(writer)
    }
}

impl ReferenceSynchronizer<Unsorted> {
    pub fn new(chromosome_count: usize) -> Self {
        Self {
            allele: AlleleSynchronizer::new(chromosome_count),
        }
    }

    /// Records `length` inserted bases after the 1-based VCF anchor `position`.
    pub fn add_insertion(&mut self, chromosome: usize, position: i32, length: i32) -> MgsResult<()> {
        self.allele.push(chromosome, Offset::new(position, length))
    }

    pub fn sort(self) -> ReferenceSynchronizer<Sorted> {
        ReferenceSynchronizer {
            allele: self.allele.sort(),
        }
    }
}

impl ReferenceSynchronizer<Sorted> {
    /// Collapses offsets sharing an anchor, keeping the last one of each run.
    ///
    /// Sorting puts the largest gap last, so the gap kept at an anchor is the
    /// longest insertion any genome reported there.
    pub fn remove_duplicates(mut self) -> ReferenceSynchronizer<Deduplicated> {
        self.allele
            .lists
            .par_iter_mut()
            .for_each(OffsetList::remove_duplicates);
        ReferenceSynchronizer {
            allele: self.allele.transition(),
        }
    }
}

impl ReferenceSynchronizer<Deduplicated> {
    /// Fails with `CoordinateOverflow` when the inserted bases of a
    /// chromosome add up past the `i32` range.
    pub fn synchronize_positions(mut self) -> MgsResult<ReferenceSynchronizer<Synchronized>> {
        self.allele
            .lists
            .par_iter_mut()
            .try_for_each(OffsetList::synchronize_positions)?;
        Ok(ReferenceSynchronizer {
            allele: self.allele.transition(),
        })
    }
}

impl ReferenceSynchronizer<Synchronized> {
    pub fn compact(&mut self) {
        self.allele.compact();
    }

    pub fn meta_genome_position(&self, chromosome: usize, position: i32) -> MgsResult<i32> {
        self.allele.meta_genome_position(chromosome, position)
    }

    pub fn genome_position(&self, chromosome: usize, meta_genome_position: i32) -> MgsResult<Option<i32>> {
        self.allele.genome_position(chromosome, meta_genome_position)
    }

    /// Number of meta-genome bases inserted into the chromosome
    pub fn total_shift(&self, chromosome: usize) -> MgsResult<i32> {
        Ok(self.allele.list(chromosome)?.total_shift())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> MgsResult<Self> {
        let version = reader.read_i32::<LittleEndian>()?;
        match version {
            0 => {
                let allele = AlleleSynchronizer::<Synchronized>::read_from(reader)?;
                // deduplicated: one offset per position
                allele.check_order(true)?;
                Ok(Self { allele })
            }
            _ => Err(MgsError::UnsupportedVersion {
                structure: "reference synchronizer",
                version,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offsets(list: &OffsetList) -> Vec<(i32, i32)> {
        list.iter().map(|o| (o.position, o.value)).collect()
    }

    #[test]
    fn test_allele_sort_per_chromosome() {
        let mut allele = AlleleSynchronizer::new(2);
        allele.push(0, Offset::new(50, 1)).unwrap();
        allele.push(0, Offset::new(10, 2)).unwrap();
        allele.push(1, Offset::new(7, 3)).unwrap();
        assert!(allele.push(2, Offset::new(1, 1)).is_err());

        let mut allele = allele.sort();
        allele.compact();
        assert_eq!(offsets(allele.list(0).unwrap()), vec![(10, 2), (50, 1)]);
        assert_eq!(offsets(allele.list(1).unwrap()), vec![(7, 3)]);
        assert_eq!(allele.offset_count(), 3);
    }

    #[test]
    fn test_reference_pipeline() {
        let mut reference = ReferenceSynchronizer::new(1);
        reference.add_insertion(0, 300, 1).unwrap();
        reference.add_insertion(0, 100, 2).unwrap();
        reference.add_insertion(0, 200, 5).unwrap();

        let reference = reference.sort().remove_duplicates().synchronize_positions().unwrap();
        assert_eq!(
            offsets(reference.allele().list(0).unwrap()),
            vec![(101, 2), (201, 7), (301, 8)]
        );
        assert_eq!(reference.total_shift(0).unwrap(), 8);
        assert_eq!(reference.meta_genome_position(0, 150).unwrap(), 152);
        assert_eq!(reference.genome_position(0, 101).unwrap(), None);
        assert_eq!(reference.genome_position(0, 103).unwrap(), Some(101));
    }

    #[test]
    fn test_insertion_collision_last_wins() {
        // Two genomes insert at the same reference anchor
        let mut reference = ReferenceSynchronizer::new(1);
        reference.add_insertion(0, 1000, 3).unwrap();
        reference.add_insertion(0, 1000, 1).unwrap();

        let reference = reference.sort().remove_duplicates();
        assert_eq!(offsets(reference.allele().list(0).unwrap()), vec![(1000, 3)]);

        let mut reference = ReferenceSynchronizer::new(1);
        reference.add_insertion(0, 1000, 1).unwrap();
        reference.add_insertion(0, 1000, 1).unwrap();
        let reference = reference.sort().remove_duplicates();
        assert_eq!(offsets(reference.allele().list(0).unwrap()), vec![(1000, 1)]);
    }

    #[test]
    fn test_reference_serialization() {
        let mut reference = ReferenceSynchronizer::new(2);
        reference.add_insertion(0, 10, 4).unwrap();
        reference.add_insertion(1, 20, 6).unwrap();
        let mut reference = reference.sort().remove_duplicates().synchronize_positions().unwrap();
        reference.compact();

        let mut buffer = Vec::new();
        reference.write_to(&mut buffer).unwrap();
        let restored = ReferenceSynchronizer::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored, reference);
    }

    #[test]
    fn test_unsorted_lists_are_rejected_on_load() {
        let mut allele = AlleleSynchronizer::new(2);
        allele.push(1, Offset::new(50, 1)).unwrap();
        allele.push(1, Offset::new(10, 2)).unwrap();
        let mut buffer = Vec::new();
        allele.write_to(&mut buffer).unwrap();
        match AlleleSynchronizer::<Sorted>::read_from(&mut buffer.as_slice()) {
            Err(MgsError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::InvalidData);
                assert!(e.to_string().contains("chromosome 1"));
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // sorted but not deduplicated
        let mut reference = ReferenceSynchronizer::new(1);
        reference.add_insertion(0, 1000, 3).unwrap();
        reference.add_insertion(0, 1000, 1).unwrap();
        let mut buffer = Vec::new();
        reference.sort().write_to(&mut buffer).unwrap();
        assert!(ReferenceSynchronizer::<Synchronized>::read_from(&mut buffer.as_slice()).is_err());
        assert!(AlleleSynchronizer::<Sorted>::read_from(&mut &buffer[4..]).is_ok());
    }

    #[test]
    fn test_allele_unknown_version() {
        let mut buffer = Vec::new();
        buffer.write_i32::<LittleEndian>(1).unwrap();
        let result = AlleleSynchronizer::<Sorted>::read_from(&mut buffer.as_slice());
        assert!(matches!(
            result,
            Err(MgsError::UnsupportedVersion { structure: "allele synchronizer", version: 1 })
        ));
    }
}
