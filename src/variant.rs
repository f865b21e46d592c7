//! Display-side variant model
//!
//! Variants of one genome allele are stored column-wise per chromosome in a
//! [`ChromosomeVariants`]. A [`Variant`] is a lightweight view: its kind plus
//! an index into the shared arrays.

use crate::project::ChromosomeList;
use crate::scanner::LineReceiver;
use crate::vcf::{AlleleCall, AnalyzedLine, VariantType, VcfHeader};
use crate::{AlleleType, MgsError, MgsResult};

/// Genotype call category of a variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantKind {
    Snp,
    Insertion,
    Deletion,
    NoCall,
    Reference,
    Mix,
}

impl VariantKind {
    pub fn from_call(line: &AnalyzedLine, call: AlleleCall) -> Self {
        match line.call_type(call) {
            None => VariantKind::Reference,
            Some(VariantType::Snp) => VariantKind::Snp,
            Some(VariantType::Insertion) => VariantKind::Insertion,
            Some(VariantType::Deletion) => VariantKind::Deletion,
            Some(VariantType::NoCall) => VariantKind::NoCall,
            Some(VariantType::Mix) => VariantKind::Mix,
        }
    }

    pub fn is_alternative(self) -> bool {
        matches!(
            self,
            VariantKind::Snp | VariantKind::Insertion | VariantKind::Deletion
        )
    }

    /// alternative > reference > no-call > mix
    fn dominance_rank(self) -> u8 {
        match self {
            VariantKind::Snp | VariantKind::Insertion | VariantKind::Deletion => 3,
            VariantKind::Reference => 2,
            VariantKind::NoCall => 1,
            VariantKind::Mix => 0,
        }
    }
}

/// Variants of one allele on one chromosome, stored as parallel arrays
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChromosomeVariants {
    starts: Vec<i32>,
    stops: Vec<i32>,
    scores: Vec<f32>,
    kinds: Vec<VariantKind>,
}

impl ChromosomeVariants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, start: i32, stop: i32, score: f32, kind: VariantKind) {
        self.starts.push(start);
        self.stops.push(stop);
        self.scores.push(score);
        self.kinds.push(kind);
    }

    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn variant(&self, index: usize) -> Option<Variant<'_>> {
        let kind = *self.kinds.get(index)?;
        Some(Variant {
            kind,
            content: self,
            index,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Variant<'_>> {
        (0..self.len()).filter_map(move |index| self.variant(index))
    }

    /// Stable sort by start position
    pub fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.len()).collect();
        order.sort_by_key(|&index| self.starts[index]);
        self.starts = order.iter().map(|&i| self.starts[i]).collect();
        self.stops = order.iter().map(|&i| self.stops[i]).collect();
        self.scores = order.iter().map(|&i| self.scores[i]).collect();
        self.kinds = order.iter().map(|&i| self.kinds[i]).collect();
    }

    /// Variants starting at `start`; the content must be sorted
    pub fn variants_at(&self, start: i32) -> impl Iterator<Item = Variant<'_>> {
        let first = self.starts.partition_point(|&s| s < start);
        let last = self.starts.partition_point(|&s| s <= start);
        (first..last).filter_map(move |index| self.variant(index))
    }
}

/// A variant call, borrowing its data from the chromosome content
#[derive(Debug, Clone, Copy)]
pub struct Variant<'a> {
    kind: VariantKind,
    content: &'a ChromosomeVariants,
    index: usize,
}

impl<'a> Variant<'a> {
    pub fn kind(&self) -> VariantKind {
        self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> i32 {
        self.content.starts[self.index]
    }

    pub fn stop(&self) -> i32 {
        self.content.stops[self.index]
    }

    pub fn score(&self) -> f32 {
        self.content.scores[self.index]
    }

    pub fn length(&self) -> i32 {
        self.stop() - self.start()
    }

    /// Whether this variant wins the display position over `other`.
    ///
    /// Variants at different positions never dominate each other; equal
    /// categories dominate each other.
    pub fn is_dominant(&self, other: &Variant<'_>) -> bool {
        self.start() == other.start()
            && self.kind.dominance_rank() >= other.kind.dominance_rank()
    }
}

/// First variant of the slice that dominates every other one
pub fn dominant_variant<'a>(variants: &[Variant<'a>]) -> Option<Variant<'a>> {
    variants
        .iter()
        .find(|candidate| variants.iter().all(|other| candidate.is_dominant(other)))
        .copied()
}

/// Builds the per-chromosome variant content of one genome allele
pub struct VariantContentReceiver<'c> {
    chromosomes: &'c ChromosomeList,
    genome: String,
    allele: AlleleType,
    content: Vec<ChromosomeVariants>,
}

impl<'c> VariantContentReceiver<'c> {
    pub fn new(chromosomes: &'c ChromosomeList, genome: &str, allele: AlleleType) -> Self {
        Self {
            chromosomes,
            genome: genome.to_string(),
            allele,
            content: (0..chromosomes.len()).map(|_| ChromosomeVariants::new()).collect(),
        }
    }

    /// Sorted content, one entry per chromosome
    pub fn into_content(mut self) -> Vec<ChromosomeVariants> {
        for content in &mut self.content {
            content.sort();
        }
        self.content
    }
}

impl LineReceiver for VariantContentReceiver<'_> {
    fn process_line(&mut self, line: &AnalyzedLine, header: &VcfHeader) -> MgsResult<()> {
        let genome = header
            .genome_index(&self.genome)
            .ok_or_else(|| MgsError::UnknownGenome(self.genome.clone()))?;
        let Some(call) = line
            .genotype(genome)?
            .and_then(|genotype| genotype.call(self.allele.gt_index()))
        else {
            return Ok(());
        };
        let Some(chromosome) = self.chromosomes.index_of(line.chromosome()) else {
            log::debug!("Skipping line {} on unknown chromosome {}", line.number(), line.chromosome());
            return Ok(());
        };

        let kind = VariantKind::from_call(line, call);
        let length = match call {
            AlleleCall::Alternative(index) => line.alternative_length(index).unwrap_or(0),
            _ => 0,
        };
        let start = line.position();
        let stop = start.saturating_add(length.saturating_abs().max(1));
        let score = line.quality().unwrap_or(0.0) as f32;
        self.content[chromosome].push(start, stop, score, kind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::Chromosome;
    use crate::vcf::RawLine;

    fn content() -> ChromosomeVariants {
        let mut content = ChromosomeVariants::new();
        content.push(30, 31, 1.0, VariantKind::Snp);
        content.push(10, 14, 2.0, VariantKind::Deletion);
        content.push(10, 11, 3.0, VariantKind::Reference);
        content.push(20, 21, 4.0, VariantKind::NoCall);
        content.push(10, 11, 5.0, VariantKind::Mix);
        content.sort();
        content
    }

    #[test]
    fn test_sort_and_views() {
        let content = content();
        let starts: Vec<i32> = content.iter().map(|v| v.start()).collect();
        assert_eq!(starts, vec![10, 10, 10, 20, 30]);

        let deletion = content.variant(0).unwrap();
        assert_eq!(deletion.kind(), VariantKind::Deletion);
        assert_eq!(deletion.length(), 4);
        assert_eq!(deletion.score(), 2.0);
        assert!(content.variant(5).is_none());
        assert_eq!(content.variants_at(10).count(), 3);
        assert_eq!(content.variants_at(11).count(), 0);
    }

    #[test]
    fn test_dominance() {
        let content = content();
        let at_ten: Vec<Variant> = content.variants_at(10).collect();
        let deletion = at_ten[0];
        let reference = at_ten[1];
        let mix = at_ten[2];
        let no_call = content.variants_at(20).next().unwrap();

        assert!(deletion.kind().is_alternative());
        assert!(!reference.kind().is_alternative());
        assert!(deletion.is_dominant(&reference));
        assert!(!reference.is_dominant(&deletion));
        assert!(reference.is_dominant(&mix));
        assert!(deletion.is_dominant(&deletion));
        // different positions never compare
        assert!(!deletion.is_dominant(&no_call));
        assert!(!no_call.is_dominant(&mix));

        assert_eq!(dominant_variant(&at_ten).unwrap().kind(), VariantKind::Deletion);
        assert!(dominant_variant(&[]).is_none());
    }

    #[test]
    fn test_equal_kinds_both_dominant() {
        let mut content = ChromosomeVariants::new();
        content.push(5, 6, 0.0, VariantKind::Snp);
        content.push(5, 8, 0.0, VariantKind::Insertion);
        let snp = content.variant(0).unwrap();
        let insertion = content.variant(1).unwrap();
        assert!(snp.is_dominant(&insertion));
        assert!(insertion.is_dominant(&snp));
    }

    #[test]
    fn test_content_receiver() {
        let chromosomes = ChromosomeList::new(vec![Chromosome::new("chr1", 1000)]).unwrap();
        let header = VcfHeader::from_lines(["#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tA"]).unwrap();
        let mut receiver = VariantContentReceiver::new(&chromosomes, "A", AlleleType::Maternal);

        for (number, text) in [
            "chr1\t50\t.\tACGT\tA\t20\t.\t.\tGT\t0|1",
            "chr1\t10\t.\tA\tAT\t.\t.\t.\tGT\t1|0",
            "chr9\t10\t.\tA\tAT\t.\t.\t.\tGT\t1|1",
        ]
        .iter()
        .enumerate()
        {
            let line = RawLine::new(number + 1, text.to_string()).analyze(&header).unwrap();
            receiver.process_line(&line, &header).unwrap();
        }

        let content = receiver.into_content();
        assert_eq!(content.len(), 1);
        let variants: Vec<(i32, i32, VariantKind)> = content[0]
            .iter()
            .map(|v| (v.start(), v.stop(), v.kind()))
            .collect();
        assert_eq!(
            variants,
            vec![(10, 11, VariantKind::Reference), (50, 53, VariantKind::Deletion)]
        );
        assert_eq!(content[0].variant(1).unwrap().score(), 20.0);
    }
}
