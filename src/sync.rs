//! Multi-genome synchronization
//!
//! [`MetaGenomeBuilder`] scans VCF files into the reference synchronizer and
//! into one raw event list per genome allele. [`MetaGenomeBuilder::finish`]
//! synchronizes the reference, then turns every allele's events into an
//! offset list from genome positions to meta-genome positions.

use crate::allele::{AlleleSynchronizer, ReferenceSynchronizer, Sorted, Synchronized, Unsorted};
use crate::offset::{Offset, OffsetList};
use crate::project::{read_string, write_string, ChromosomeList};
use crate::scanner::{
    FileLineSource, IndexedLineSource, LineReceiver, LineSource, ScanOutcome, ScanReport,
    VcfScanner,
};
use crate::utils::{create_writer, open_text_reader, CancellationFlag};
use crate::vcf::{AlleleCall, AnalyzedLine, VariantType, VcfHeader};
use crate::{validate_sync_config, AlleleType, MgsError, MgsResult, SyncConfig};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rayon::prelude::*;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::Path;

/// Format version of a meta-genome snapshot
pub const META_GENOME_VERSION: i32 = 0;

/// Raw indel events of one genome, `(anchor position, signed length)` per allele
struct GenomeEvents {
    name: String,
    alleles: [AlleleSynchronizer<Unsorted>; 2],
}

/// Records the indels of accepted lines
struct SynchronizationReceiver<'b> {
    chromosomes: &'b ChromosomeList,
    variations: Option<&'b [VariantType]>,
    reference: &'b mut ReferenceSynchronizer<Unsorted>,
    genomes: &'b mut [GenomeEvents],
    /// `(sample index in this file, genome registry index)`
    columns: Vec<(usize, usize)>,
    unknown_chromosomes: usize,
    beyond_chromosome_end: usize,
}

impl LineReceiver for SynchronizationReceiver<'_> {
    fn process_line(&mut self, line: &AnalyzedLine, _header: &VcfHeader) -> MgsResult<()> {
        let Some(chromosome) = self.chromosomes.index_of(line.chromosome()) else {
            self.unknown_chromosomes += 1;
            log::debug!("Line {} is on unknown chromosome {}", line.number(), line.chromosome());
            return Ok(());
        };
        let chromosome_length = self.chromosomes.get(chromosome).map_or(0, |c| c.length as i64);
        let position = line.position();
        if position as i64 > chromosome_length {
            self.beyond_chromosome_end += 1;
            log::debug!("Line {} lies beyond the end of {}", line.number(), line.chromosome());
            return Ok(());
        }
        // a deletion cannot run past the last base
        let longest_deletion = (position as i64 - chromosome_length).max(-(i32::MAX as i64)) as i32;

        for &(sample, genome) in &self.columns {
            let Some(genotype) = line.genotype(sample)? else {
                continue;
            };
            for allele in AlleleType::ALL {
                let Some(AlleleCall::Alternative(index)) = genotype.call(allele.gt_index()) else {
                    continue;
                };
                let (Some(variant_type), Some(length)) =
                    (line.alternative_type(index), line.alternative_length(index))
                else {
                    continue;
                };
                if !variant_type.is_indel() {
                    continue;
                }
                if self.variations.is_some_and(|allowed| !allowed.contains(&variant_type)) {
                    continue;
                }

                let length = length.max(longest_deletion);
                self.genomes[genome].alleles[allele.gt_index()]
                    .push(chromosome, Offset::new(position, length))?;
                if length > 0 {
                    self.reference.add_insertion(chromosome, position, length)?;
                }
            }
        }
        Ok(())
    }
}

/// Accumulates VCF files of a multi-genome project
pub struct MetaGenomeBuilder {
    chromosomes: ChromosomeList,
    config: SyncConfig,
    reference: ReferenceSynchronizer<Unsorted>,
    genomes: Vec<GenomeEvents>,
    cancellation: CancellationFlag,
}

impl MetaGenomeBuilder {
    pub fn new(chromosomes: ChromosomeList, config: SyncConfig) -> MgsResult<Self> {
        validate_sync_config(&config)?;
        if chromosomes.is_empty() {
            return Err(MgsError::InvalidConfig("no chromosomes to synchronize".to_string()));
        }
        Ok(Self {
            reference: ReferenceSynchronizer::new(chromosomes.len()),
            chromosomes,
            config,
            genomes: Vec::new(),
            cancellation: CancellationFlag::new(),
        })
    }

    pub fn with_cancellation(mut self, cancellation: CancellationFlag) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn chromosomes(&self) -> &ChromosomeList {
        &self.chromosomes
    }

    /// Registered genome names, in registration order
    pub fn genome_names(&self) -> Vec<&str> {
        self.genomes.iter().map(|genome| genome.name.as_str()).collect()
    }

    /// Scans a whole plain or gzipped VCF file.
    pub fn add_vcf<P: AsRef<Path>>(&mut self, path: P) -> MgsResult<ScanReport> {
        log::info!("Scanning {}", path.as_ref().display());
        self.scan(FileLineSource::open(path)?)
    }

    /// Scans a tabix-indexed VCF file one project chromosome at a time.
    pub fn add_indexed_vcf<P: AsRef<Path>>(&mut self, path: P) -> MgsResult<ScanReport> {
        log::info!("Scanning indexed {}", path.as_ref().display());
        let mut total = ScanReport::default();
        let chromosomes: Vec<_> = self.chromosomes.iter().cloned().collect();
        for chromosome in &chromosomes {
            log::debug!("Querying {}", chromosome.name);
            total.merge(self.scan(IndexedLineSource::open(path.as_ref(), chromosome)?)?);
        }
        Ok(total)
    }

    /// Scans every line of a source into the synchronization state.
    pub fn scan<S: LineSource>(&mut self, source: S) -> MgsResult<ScanReport> {
        let header_genomes = source.header().genomes().to_vec();
        let names: Vec<String> = match &self.config.genomes {
            Some(selected) => selected
                .iter()
                .filter(|name| header_genomes.contains(*name))
                .cloned()
                .collect(),
            None => header_genomes.clone(),
        };
        if names.is_empty() {
            log::warn!("No selected genome in VCF columns {:?}", header_genomes);
            return Ok(ScanReport::default());
        }

        let mut columns = Vec::with_capacity(names.len());
        for name in &names {
            let sample = source
                .header()
                .genome_index(name)
                .ok_or_else(|| MgsError::UnknownGenome(name.clone()))?;
            columns.push((sample, self.register_genome(name)));
        }

        let mut scanner = VcfScanner::new(source);
        scanner.set_genomes(names)?;
        if let Some(variations) = &self.config.variations {
            scanner.set_variations(variations.clone())?;
        }
        scanner.set_filters(self.config.filters.clone())?;
        scanner.set_cancellation(self.cancellation.clone())?;

        let mut receiver = SynchronizationReceiver {
            chromosomes: &self.chromosomes,
            variations: self.config.variations.as_deref(),
            reference: &mut self.reference,
            genomes: &mut self.genomes,
            columns,
            unknown_chromosomes: 0,
            beyond_chromosome_end: 0,
        };
        let report = scanner.compute(&mut receiver)?;
        if receiver.unknown_chromosomes > 0 {
            log::warn!(
                "{} accepted lines were on chromosomes outside the project",
                receiver.unknown_chromosomes
            );
        }
        if receiver.beyond_chromosome_end > 0 {
            log::warn!(
                "{} accepted lines lay beyond the end of their chromosome",
                receiver.beyond_chromosome_end
            );
        }
        if report.outcome == ScanOutcome::Cancelled {
            return Err(MgsError::Cancelled);
        }
        Ok(report)
    }

    fn register_genome(&mut self, name: &str) -> usize {
        if let Some(index) = self.genomes.iter().position(|genome| genome.name == name) {
            return index;
        }
        log::debug!("Registering genome {}", name);
        let count = self.chromosomes.len();
        self.genomes.push(GenomeEvents {
            name: name.to_string(),
            alleles: [AlleleSynchronizer::new(count), AlleleSynchronizer::new(count)],
        });
        self.genomes.len() - 1
    }

    /// Synchronizes the reference and builds every allele's offset lists.
    pub fn finish(self) -> MgsResult<MetaGenome> {
        if let Some(selected) = &self.config.genomes {
            if let Some(missing) = selected
                .iter()
                .find(|name| !self.genomes.iter().any(|genome| &genome.name == *name))
            {
                return Err(MgsError::UnknownGenome(missing.clone()));
            }
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.num_threads)
            .build()
            .map_err(|e| MgsError::InvalidConfig(format!("cannot start worker pool: {}", e)))?;
        let cancellation = self.cancellation;
        let chromosomes = self.chromosomes;
        let reference_events = self.reference;
        let genome_events = self.genomes;

        pool.install(move || -> MgsResult<MetaGenome> {
            let mut reference = reference_events
                .sort()
                .remove_duplicates()
                .synchronize_positions()?;
            reference.compact();
            for (index, chromosome) in chromosomes.iter().enumerate() {
                let meta_length = chromosome.length as i64 + reference.total_shift(index)? as i64;
                if meta_length > i32::MAX as i64 {
                    return Err(MgsError::CoordinateOverflow(chromosome.name.clone()));
                }
            }
            log::info!(
                "Reference synchronized with {} insertion gaps",
                reference.allele().offset_count()
            );

            let mut genomes = Vec::with_capacity(genome_events.len());
            for events in genome_events {
                let [paternal, maternal] = events.alleles;
                let alleles = [
                    build_allele(paternal.sort(), &reference, &cancellation)?,
                    build_allele(maternal.sort(), &reference, &cancellation)?,
                ];
                log::debug!(
                    "Genome {} synchronized with {} + {} offsets",
                    events.name,
                    alleles[0].offset_count(),
                    alleles[1].offset_count()
                );
                genomes.push(GenomeSynchronization {
                    name: events.name,
                    alleles,
                });
            }

            Ok(MetaGenome {
                chromosomes,
                reference,
                genomes,
            })
        })
    }
}

/// Builds one allele's genome → meta-genome lists, one chromosome per task.
fn build_allele(
    events: AlleleSynchronizer<Sorted>,
    reference: &ReferenceSynchronizer<Synchronized>,
    cancellation: &CancellationFlag,
) -> MgsResult<AlleleSynchronizer<Sorted>> {
    let lists = (0..events.chromosome_count())
        .into_par_iter()
        .map(|chromosome| {
            if cancellation.is_stopped() {
                return Err(MgsError::Cancelled);
            }
            Ok(allele_offsets(
                events.list(chromosome)?,
                reference.allele().list(chromosome)?,
            ))
        })
        .collect::<MgsResult<Vec<_>>>()?;

    let mut allele = AlleleSynchronizer::from_sorted_lists(lists);
    allele.compact();
    Ok(allele)
}

/// Walks the allele's sorted events together with the reference insertion
/// gaps and records, at every genome position where it changes, the shift
/// between the genome and the meta-genome.
///
/// `events` holds `(anchor, signed length)` pairs; when one anchor has
/// several events the last one counts. `reference` is synchronized, so its
/// anchors sit one position before the stored positions.
pub(crate) fn allele_offsets(events: &OffsetList, reference: &OffsetList) -> OffsetList {
    let mut offsets = OffsetList::new();
    let mut reference_index = 0;
    let mut event_index = 0;
    // genome position minus reference position for aligned bases
    let mut shift = 0;
    // first reference base present in the genome after the last anchor
    let mut cursor = i32::MIN;
    let mut last_value = 0;

    loop {
        let reference_anchor = reference.get(reference_index).map(|o| o.position - 1);
        let event_anchor = events.get(event_index).map(|o| o.position);
        let anchor = match (reference_anchor, event_anchor) {
            (None, None) => break,
            (Some(r), None) => r,
            (None, Some(e)) => e,
            (Some(r), Some(e)) => r.min(e),
        };

        while reference.get(reference_index).map(|o| o.position - 1) == Some(anchor) {
            reference_index += 1;
        }
        let mut length = 0;
        while let Some(event) = events.get(event_index).filter(|o| o.position == anchor) {
            length = event.value;
            event_index += 1;
        }

        if anchor < cursor {
            continue;
        }

        let insertion = length.max(0);
        let deletion = (-length).max(0);
        let next_reference = anchor + 1 + deletion;
        let next_genome = anchor + shift + insertion + 1;
        let value = reference.meta_genome_position(next_reference) - next_genome;
        if value != last_value {
            offsets.push(Offset::new(next_genome, value));
            last_value = value;
        }
        shift = next_genome - next_reference;
        cursor = next_reference;
    }

    offsets
}

/// Offset lists of one genome's two alleles
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomeSynchronization {
    pub name: String,
    alleles: [AlleleSynchronizer<Sorted>; 2],
}

impl GenomeSynchronization {
    pub fn allele(&self, allele: AlleleType) -> &AlleleSynchronizer<Sorted> {
        &self.alleles[allele.gt_index()]
    }
}

/// Per-chromosome figures of a synchronized project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChromosomeSummary {
    pub chromosome: String,
    pub length: u32,
    pub meta_length: i64,
    pub insertion_gaps: usize,
    pub allele_offsets: usize,
}

/// Writes summaries as a tab-separated table with a header row.
pub fn write_summaries<P: AsRef<Path>>(summaries: &[ChromosomeSummary], path: P) -> MgsResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(create_writer(&path)?);
    for summary in summaries {
        writer.serialize(summary)?;
    }
    writer
        .into_inner()
        .map_err(|e| MgsError::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))?
        .finish()
}

/// Synchronized coordinate spaces of a multi-genome project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaGenome {
    chromosomes: ChromosomeList,
    reference: ReferenceSynchronizer<Synchronized>,
    genomes: Vec<GenomeSynchronization>,
}

impl MetaGenome {
    pub fn chromosomes(&self) -> &ChromosomeList {
        &self.chromosomes
    }

    pub fn reference(&self) -> &ReferenceSynchronizer<Synchronized> {
        &self.reference
    }

    pub fn genomes(&self) -> &[GenomeSynchronization] {
        &self.genomes
    }

    pub fn genome(&self, name: &str) -> MgsResult<&GenomeSynchronization> {
        self.genomes
            .iter()
            .find(|genome| genome.name == name)
            .ok_or_else(|| MgsError::UnknownGenome(name.to_string()))
    }

    fn allele(&self, genome: &str, allele: AlleleType) -> MgsResult<&AlleleSynchronizer<Sorted>> {
        Ok(self.genome(genome)?.allele(allele))
    }

    pub fn reference_to_meta(&self, chromosome: &str, position: i32) -> MgsResult<i32> {
        self.reference
            .meta_genome_position(self.chromosomes.resolve(chromosome)?, position)
    }

    /// `Ok(None)` inside insertion gaps
    pub fn meta_to_reference(&self, chromosome: &str, meta_position: i32) -> MgsResult<Option<i32>> {
        self.reference
            .genome_position(self.chromosomes.resolve(chromosome)?, meta_position)
    }

    pub fn genome_to_meta(
        &self,
        genome: &str,
        allele: AlleleType,
        chromosome: &str,
        position: i32,
    ) -> MgsResult<i32> {
        let chromosome = self.chromosomes.resolve(chromosome)?;
        self.allele(genome, allele)?
            .meta_genome_position(chromosome, position)
    }

    /// `Ok(None)` where the allele has no base (deletions, other genomes' insertions)
    pub fn meta_to_genome(
        &self,
        genome: &str,
        allele: AlleleType,
        chromosome: &str,
        meta_position: i32,
    ) -> MgsResult<Option<i32>> {
        let chromosome = self.chromosomes.resolve(chromosome)?;
        self.allele(genome, allele)?
            .genome_position(chromosome, meta_position)
    }

    /// `Ok(None)` for bases inserted by the allele
    pub fn genome_to_reference(
        &self,
        genome: &str,
        allele: AlleleType,
        chromosome: &str,
        position: i32,
    ) -> MgsResult<Option<i32>> {
        let meta = self.genome_to_meta(genome, allele, chromosome, position)?;
        self.meta_to_reference(chromosome, meta)
    }

    /// `Ok(None)` for reference bases deleted in the allele
    pub fn reference_to_genome(
        &self,
        genome: &str,
        allele: AlleleType,
        chromosome: &str,
        position: i32,
    ) -> MgsResult<Option<i32>> {
        let meta = self.reference_to_meta(chromosome, position)?;
        self.meta_to_genome(genome, allele, chromosome, meta)
    }

    /// Chromosome length including every insertion gap
    pub fn meta_chromosome_length(&self, chromosome: &str) -> MgsResult<i64> {
        let index = self.chromosomes.resolve(chromosome)?;
        let length = self.chromosomes.get(index).map_or(0, |c| c.length);
        Ok(length as i64 + self.reference.total_shift(index)? as i64)
    }

    /// Figures for every chromosome, computed in parallel
    pub fn summaries(&self) -> MgsResult<Vec<ChromosomeSummary>> {
        (0..self.chromosomes.len())
            .into_par_iter()
            .map(|index| -> MgsResult<ChromosomeSummary> {
                let chromosome = self
                    .chromosomes
                    .get(index)
                    .ok_or_else(|| MgsError::UnknownChromosome(format!("index {}", index)))?;
                let mut allele_offsets = 0;
                for genome in &self.genomes {
                    for allele in AlleleType::ALL {
                        allele_offsets += genome.allele(allele).list(index)?.len();
                    }
                }
                Ok(ChromosomeSummary {
                    chromosome: chromosome.name.clone(),
                    length: chromosome.length,
                    meta_length: chromosome.length as i64 + self.reference.total_shift(index)? as i64,
                    insertion_gaps: self.reference.allele().list(index)?.len(),
                    allele_offsets,
                })
            })
            .collect()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> MgsResult<()> {
        writer.write_i32::<LittleEndian>(META_GENOME_VERSION)?;
        self.chromosomes.write_to(writer)?;
        self.reference.write_to(writer)?;
        writer.write_i32::<LittleEndian>(self.genomes.len() as i32)?;
        for genome in &self.genomes {
            write_string(writer, &genome.name)?;
            for allele in &genome.alleles {
                allele.write_to(writer)?;
            }
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> MgsResult<Self> {
        let version = reader.read_i32::<LittleEndian>()?;
        if version != 0 {
            return Err(MgsError::UnsupportedVersion {
                structure: "meta-genome",
                version,
            });
        }

        let chromosomes = ChromosomeList::read_from(reader)?;
        let reference = ReferenceSynchronizer::<Synchronized>::read_from(reader)?;
        let count = crate::offset::read_size(reader, "genome list")?;
        let mut genomes = Vec::with_capacity(count);
        for _ in 0..count {
            let name = read_string(reader)?;
            let paternal = AlleleSynchronizer::<Sorted>::read_from(reader)?;
            let maternal = AlleleSynchronizer::<Sorted>::read_from(reader)?;
            genomes.push(GenomeSynchronization {
                name,
                alleles: [paternal, maternal],
            });
        }

        let meta_genome = Self {
            chromosomes,
            reference,
            genomes,
        };
        meta_genome.check_chromosome_counts()?;
        Ok(meta_genome)
    }

    fn check_chromosome_counts(&self) -> MgsResult<()> {
        let expected = self.chromosomes.len();
        let consistent = self.reference.chromosome_count() == expected
            && self.genomes.iter().all(|genome| {
                genome
                    .alleles
                    .iter()
                    .all(|allele| allele.chromosome_count() == expected)
            });
        if !consistent {
            return Err(MgsError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "snapshot chromosome counts do not match its chromosome list",
            )));
        }
        Ok(())
    }

    /// Writes a snapshot, gzip compressed when the path ends with `.gz`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> MgsResult<()> {
        let mut writer = create_writer(&path)?;
        self.write_to(&mut writer)?;
        writer.finish()?;
        log::info!("Snapshot written to {}", path.as_ref().display());
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> MgsResult<Self> {
        let mut reader = open_text_reader(&path)?;
        Self::read_from(&mut reader)
    }
}
