//! VCF header and line model
//!
//! A line starts as a [`RawLine`] holding only its text. Converting it with
//! [`RawLine::analyze`] checks the column layout against the header and
//! classifies the alternative alleles; only an [`AnalyzedLine`] exposes
//! REF/ALT/INFO/FORMAT/genotype data.

use crate::{MgsError, MgsResult};
use std::fmt;
use std::ops::Range;
use std::str::FromStr;

/// CHROM, POS, ID, REF, ALT, QUAL, FILTER, INFO, FORMAT
pub const FIXED_COLUMNS: [&str; 9] = [
    "CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT",
];

/// Index of the first genotype column
pub const FIRST_GENOME_COLUMN: usize = 9;

const CHROM: usize = 0;
const POS: usize = 1;
const ID: usize = 2;
const REF: usize = 3;
const ALT: usize = 4;
const QUAL: usize = 5;
const FILTER: usize = 6;
const INFO: usize = 7;
const FORMAT: usize = 8;

/// A `##contig` declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContigLine {
    pub name: String,
    pub length: Option<u32>,
}

/// Parsed VCF header: meta lines, contigs and genome (sample) names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfHeader {
    meta_lines: Vec<String>,
    contigs: Vec<ContigLine>,
    genomes: Vec<String>,
    column_count: usize,
}

impl VcfHeader {
    /// Builds the header from every line starting with `#`, the `#CHROM`
    /// line included.
    pub fn from_lines<I, S>(lines: I) -> MgsResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut meta_lines = Vec::new();
        let mut contigs = Vec::new();
        let mut columns: Option<Vec<String>> = None;

        for line in lines {
            let line = line.as_ref().trim_end();
            if let Some(meta) = line.strip_prefix("##") {
                if let Some(contig) = parse_contig(meta) {
                    contigs.push(contig);
                }
                meta_lines.push(line.to_string());
            } else if let Some(names) = line.strip_prefix('#') {
                columns = Some(names.split('\t').map(str::to_string).collect());
            }
        }

        let columns = columns
            .ok_or_else(|| MgsError::InvalidHeader("#CHROM line not found".to_string()))?;
        if columns.len() <= INFO {
            return Err(MgsError::InvalidHeader(format!(
                "expected at least {} columns, found {}",
                INFO + 1,
                columns.len()
            )));
        }
        for (found, expected) in columns.iter().zip(FIXED_COLUMNS.iter()) {
            if found != expected {
                return Err(MgsError::InvalidHeader(format!(
                    "{} column not found in VCF header (found '{}')",
                    expected, found
                )));
            }
        }

        let genomes = columns
            .get(FIRST_GENOME_COLUMN..)
            .map(|names| names.to_vec())
            .unwrap_or_default();

        Ok(Self {
            meta_lines,
            contigs,
            genomes,
            column_count: columns.len(),
        })
    }

    pub fn meta_lines(&self) -> &[String] {
        &self.meta_lines
    }

    pub fn contigs(&self) -> &[ContigLine] {
        &self.contigs
    }

    /// Genome names in column order
    pub fn genomes(&self) -> &[String] {
        &self.genomes
    }

    /// Sample index of a genome, counted from the first genotype column
    pub fn genome_index(&self, name: &str) -> Option<usize> {
        self.genomes.iter().position(|genome| genome == name)
    }

    /// Number of tab-separated columns every data line must have
    pub fn column_count(&self) -> usize {
        self.column_count
    }
}

fn parse_contig(meta: &str) -> Option<ContigLine> {
    let body = meta.strip_prefix("contig=<")?.strip_suffix('>')?;
    let mut name = None;
    let mut length = None;
    for field in body.split(',') {
        match field.split_once('=') {
            Some(("ID", value)) => name = Some(value.to_string()),
            Some(("length", value)) => length = value.parse().ok(),
            _ => {}
        }
    }
    Some(ContigLine {
        name: name?,
        length,
    })
}

/// Shape of an alternative allele relative to the reference allele
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Snp,
    Insertion,
    Deletion,
    NoCall,
    /// Symbolic alleles whose length cannot be determined
    Mix,
}

impl VariantType {
    pub fn is_indel(self) -> bool {
        matches!(self, VariantType::Insertion | VariantType::Deletion)
    }
}

impl fmt::Display for VariantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            VariantType::Snp => "snp",
            VariantType::Insertion => "insertion",
            VariantType::Deletion => "deletion",
            VariantType::NoCall => "no-call",
            VariantType::Mix => "mix",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for VariantType {
    type Err = MgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "snp" | "snps" => Ok(VariantType::Snp),
            "insertion" | "ins" => Ok(VariantType::Insertion),
            "deletion" | "del" => Ok(VariantType::Deletion),
            "no-call" | "nocall" => Ok(VariantType::NoCall),
            "mix" => Ok(VariantType::Mix),
            _ => Err(MgsError::InvalidConfig(format!("unknown variation type '{}'", s))),
        }
    }
}

/// One allele token of a `GT` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlleleCall {
    /// `.`
    NoCall,
    /// `0`
    Reference,
    /// `n > 0`, stored as the 0-based index into the ALT list
    Alternative(usize),
}

impl AlleleCall {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "." => Some(AlleleCall::NoCall),
            _ => match token.parse::<usize>().ok()? {
                0 => Some(AlleleCall::Reference),
                n => Some(AlleleCall::Alternative(n - 1)),
            },
        }
    }
}

/// Parsed `GT` field of one genome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Genotype {
    pub calls: Vec<AlleleCall>,
    pub phased: bool,
}

impl Genotype {
    /// Call of the allele at `gt_index`; haploid genotypes only have index 0
    pub fn call(&self, gt_index: usize) -> Option<AlleleCall> {
        self.calls.get(gt_index).copied()
    }

    pub fn has_non_reference_call(&self) -> bool {
        self.calls.iter().any(|call| *call != AlleleCall::Reference)
    }
}

/// A data line as read from a VCF file, not yet checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    number: usize,
    text: String,
}

impl RawLine {
    pub fn new(number: usize, text: String) -> Self {
        Self { number, text }
    }

    /// 1-based line number in the source
    pub fn number(&self) -> usize {
        self.number
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Header lines and blank terminator lines carry no record
    pub fn is_header(&self) -> bool {
        self.text.starts_with('#') || self.text.trim().is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.text.split('\t')
    }

    /// Splits the columns and classifies every alternative allele.
    pub fn analyze(self, header: &VcfHeader) -> MgsResult<AnalyzedLine> {
        AnalyzedLine::new(self, header)
    }

    fn error(&self, message: String) -> MgsError {
        MgsError::InvalidLine {
            line: self.number,
            message,
        }
    }
}

/// A column-checked VCF record
#[derive(Debug, Clone)]
pub struct AnalyzedLine {
    number: usize,
    text: String,
    columns: Vec<Range<usize>>,
    position: i32,
    alternatives: Vec<Range<usize>>,
    alternative_types: Vec<VariantType>,
    alternative_lengths: Vec<i32>,
    gt_index: Option<usize>,
}

impl AnalyzedLine {
    fn new(raw: RawLine, header: &VcfHeader) -> MgsResult<Self> {
        let mut columns = Vec::with_capacity(header.column_count());
        let mut start = 0;
        for field in raw.text.split('\t') {
            columns.push(start..start + field.len());
            start += field.len() + 1;
        }

        if columns.len() != header.column_count() {
            return Err(raw.error(format!(
                "expected {} columns, found {}",
                header.column_count(),
                columns.len()
            )));
        }

        let position_text = &raw.text[columns[POS].clone()];
        let position = position_text
            .parse::<i32>()
            .map_err(|_| raw.error(format!("invalid position '{}'", position_text)))?;
        if position < 1 {
            return Err(raw.error(format!("position {} is not 1-based", position)));
        }

        let reference = &raw.text[columns[REF].clone()];
        let alt_range = columns[ALT].clone();
        let mut alternatives = Vec::new();
        let mut start = alt_range.start;
        for alternative in raw.text[alt_range].split(',') {
            alternatives.push(start..start + alternative.len());
            start += alternative.len() + 1;
        }

        let info = &raw.text[columns[INFO].clone()];
        let mut alternative_types = Vec::with_capacity(alternatives.len());
        let mut alternative_lengths = Vec::with_capacity(alternatives.len());
        for range in &alternatives {
            let (variant_type, length) =
                classify(reference, &raw.text[range.clone()], info).map_err(|e| raw.error(e))?;
            alternative_types.push(variant_type);
            alternative_lengths.push(length);
        }

        let gt_index = columns
            .get(FORMAT)
            .and_then(|range| raw.text[range.clone()].split(':').position(|key| key == "GT"));

        Ok(Self {
            number: raw.number,
            text: raw.text,
            columns,
            position,
            alternatives,
            alternative_types,
            alternative_lengths,
            gt_index,
        })
    }

    pub fn number(&self) -> usize {
        self.number
    }

    fn column(&self, index: usize) -> &str {
        self.columns
            .get(index)
            .map(|range| &self.text[range.clone()])
            .unwrap_or("")
    }

    pub fn chromosome(&self) -> &str {
        self.column(CHROM)
    }

    /// 1-based POS column
    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn id(&self) -> &str {
        self.column(ID)
    }

    pub fn reference(&self) -> &str {
        self.column(REF)
    }

    pub fn alternatives(&self) -> impl Iterator<Item = &str> {
        self.alternatives.iter().map(|range| &self.text[range.clone()])
    }

    pub fn alternative_count(&self) -> usize {
        self.alternatives.len()
    }

    pub fn alternative_type(&self, index: usize) -> Option<VariantType> {
        self.alternative_types.get(index).copied()
    }

    /// Length change of an alternative: positive for insertions, negative for
    /// deletions, zero otherwise
    pub fn alternative_length(&self, index: usize) -> Option<i32> {
        self.alternative_lengths.get(index).copied()
    }

    /// Variant type of a genotype call; `None` for reference calls
    pub fn call_type(&self, call: AlleleCall) -> Option<VariantType> {
        match call {
            AlleleCall::Reference => None,
            AlleleCall::NoCall => Some(VariantType::NoCall),
            AlleleCall::Alternative(index) => self.alternative_type(index),
        }
    }

    /// `None` for a missing (`.`) QUAL
    pub fn quality(&self) -> Option<f64> {
        self.column(QUAL).parse().ok()
    }

    pub fn filter(&self) -> &str {
        self.column(FILTER)
    }

    pub fn info(&self) -> &str {
        self.column(INFO)
    }

    /// Value of an INFO key; flags without `=` yield an empty string
    pub fn info_value(&self, key: &str) -> Option<&str> {
        info_value(self.info(), key)
    }

    pub fn format(&self) -> &str {
        self.column(FORMAT)
    }

    /// Raw genotype column of a genome, by sample index
    pub fn genome_column(&self, genome: usize) -> Option<&str> {
        self.columns
            .get(FIRST_GENOME_COLUMN + genome)
            .map(|range| &self.text[range.clone()])
    }

    /// Value of a FORMAT key in the genotype column of a genome
    pub fn format_value(&self, genome: usize, key: &str) -> Option<&str> {
        let index = self.format().split(':').position(|k| k == key)?;
        self.genome_column(genome)?.split(':').nth(index)
    }

    /// Parses the `GT` field of a genome.
    ///
    /// Returns `Ok(None)` when the genome or the `GT` key is absent.
    pub fn genotype(&self, genome: usize) -> MgsResult<Option<Genotype>> {
        let (Some(gt_index), Some(column)) = (self.gt_index, self.genome_column(genome)) else {
            return Ok(None);
        };
        let Some(gt) = column.split(':').nth(gt_index) else {
            return Ok(None);
        };

        let phased = gt.contains('|');
        let mut calls = Vec::with_capacity(2);
        for token in gt.split(['/', '|']) {
            let call = AlleleCall::parse(token).ok_or_else(|| MgsError::InvalidLine {
                line: self.number,
                message: format!("invalid genotype '{}'", gt),
            })?;
            if let AlleleCall::Alternative(index) = call {
                if index >= self.alternatives.len() {
                    return Err(MgsError::InvalidLine {
                        line: self.number,
                        message: format!(
                            "genotype '{}' references allele {} but ALT has {}",
                            gt,
                            index + 1,
                            self.alternatives.len()
                        ),
                    });
                }
            }
            calls.push(call);
        }

        Ok(Some(Genotype { calls, phased }))
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Linear scan of `;`-separated INFO tokens
pub fn info_value<'a>(info: &'a str, key: &str) -> Option<&'a str> {
    info.split(';').find_map(|token| match token.split_once('=') {
        Some((k, value)) if k == key => Some(value),
        None if token == key => Some(""),
        _ => None,
    })
}

fn classify(reference: &str, alternative: &str, info: &str) -> Result<(VariantType, i32), String> {
    match alternative {
        "." | "*" => Ok((VariantType::NoCall, 0)),
        _ if alternative.starts_with('<') => {
            let svlen = info_value(info, "SVLEN")
                .and_then(|value| value.split(',').next())
                .filter(|value| *value != ".");
            let length = match svlen {
                Some(value) => match value.parse::<i32>().ok().and_then(i32::checked_abs) {
                    Some(length) => Some(length),
                    None => return Err(format!("invalid SVLEN '{}'", value)),
                },
                None => None,
            };
            Ok(match (alternative, length) {
                ("<INS>", Some(length)) => (VariantType::Insertion, length),
                ("<DEL>", Some(length)) => (VariantType::Deletion, -length),
                _ => (VariantType::Mix, 0),
            })
        }
        _ => {
            let length = alternative.len() as i64 - reference.len() as i64;
            let length = i32::try_from(length).map_err(|_| "allele length out of range".to_string())?;
            Ok(match length {
                0 => (VariantType::Snp, 0),
                l if l > 0 => (VariantType::Insertion, l),
                l => (VariantType::Deletion, l),
            })
        }
    }
}
