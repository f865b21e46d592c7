//! VCF line scanning and filtering
//!
//! A [`VcfScanner`] pulls lines from a [`LineSource`], rejects lines whose
//! genotypes don't matter for the selected genomes or variation types, runs
//! the optional [`LineFilter`]s and hands what is left to a [`LineReceiver`].
//! Malformed lines are recorded as warnings and skipped; I/O errors abort the
//! scan.

use crate::project::Chromosome;
use crate::utils::{open_text_reader, CancellationFlag};
use crate::vcf::{AlleleCall, AnalyzedLine, RawLine, VariantType, VcfHeader};
use crate::{MgsError, MgsResult};
use rust_htslib::tbx::{self, Read as TbxRead};
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

/// Number of line warnings logged at `warn` level before switching to `debug`
const LOGGED_WARNINGS: usize = 20;

/// Consumer of the lines a scan keeps
pub trait LineReceiver {
    fn process_line(&mut self, line: &AnalyzedLine, header: &VcfHeader) -> MgsResult<()>;
}

/// Where the scanner gets its lines from
///
/// A line that cannot be decoded is returned as `Err(MgsError::InvalidLine)`;
/// the source has still moved past it and the scan may go on.
pub trait LineSource {
    fn header(&self) -> &VcfHeader;

    /// Positions the source on its first data line and returns it.
    fn first_line(&mut self) -> MgsResult<Option<RawLine>>;

    fn next_line(&mut self) -> MgsResult<Option<RawLine>>;

    /// Releases whatever the source holds for the current scan.
    fn end_scan(&mut self) -> MgsResult<()>;

    /// Region a chromosome-scoped source reads; line numbers then count
    /// records of that query instead of file lines.
    fn region(&self) -> Option<&str> {
        None
    }
}

/// Decodes one line read as bytes, without its line terminator
fn decode_line(number: usize, bytes: &[u8]) -> MgsResult<RawLine> {
    let text = std::str::from_utf8(bytes).map_err(|e| MgsError::InvalidLine {
        line: number,
        message: format!("invalid UTF-8: {}", e),
    })?;
    Ok(RawLine::new(number, text.trim_end_matches(['\n', '\r']).to_string()))
}

/// Sequential reader over a whole plain or gzipped VCF file
pub struct FileLineSource {
    reader: Box<dyn BufRead + Send>,
    header: VcfHeader,
    line_number: usize,
    buffer: Vec<u8>,
    pending: Option<MgsResult<RawLine>>,
}

impl FileLineSource {
    pub fn open<P: AsRef<Path>>(path: P) -> MgsResult<Self> {
        log::debug!("Opening VCF file {}", path.as_ref().display());
        Self::from_reader(open_text_reader(path)?)
    }

    /// Reads the header lines; the first data line is kept for `first_line`.
    pub fn from_reader(mut reader: Box<dyn BufRead + Send>) -> MgsResult<Self> {
        let mut header_lines = Vec::new();
        let mut line_number = 0;
        let mut pending = None;
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            if reader.read_until(b'\n', &mut buffer)? == 0 {
                break;
            }
            line_number += 1;
            if buffer.first() == Some(&b'#') {
                let line = decode_line(line_number, &buffer).map_err(|_| {
                    MgsError::InvalidHeader(format!("line {} is not valid UTF-8", line_number))
                })?;
                header_lines.push(line.text().to_string());
            } else {
                pending = Some(decode_line(line_number, &buffer));
                break;
            }
        }

        Ok(Self {
            reader,
            header: VcfHeader::from_lines(&header_lines)?,
            line_number,
            buffer,
            pending,
        })
    }
}

impl LineSource for FileLineSource {
    fn header(&self) -> &VcfHeader {
        &self.header
    }

    fn first_line(&mut self) -> MgsResult<Option<RawLine>> {
        match self.pending.take() {
            Some(line) => line.map(Some),
            None => self.next_line(),
        }
    }

    fn next_line(&mut self) -> MgsResult<Option<RawLine>> {
        self.buffer.clear();
        if self.reader.read_until(b'\n', &mut self.buffer)? == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        decode_line(self.line_number, &self.buffer).map(Some)
    }

    fn end_scan(&mut self) -> MgsResult<()> {
        self.pending = None;
        Ok(())
    }
}

/// Chromosome-scoped query over a bgzipped, tabix-indexed VCF file
pub struct IndexedLineSource {
    reader: tbx::Reader,
    header: VcfHeader,
    chromosome: Chromosome,
    record_number: usize,
    buffer: Vec<u8>,
    fetched: bool,
}

impl IndexedLineSource {
    pub fn open<P: AsRef<Path>>(path: P, chromosome: &Chromosome) -> MgsResult<Self> {
        let reader = tbx::Reader::from_path(path.as_ref())?;
        let header = VcfHeader::from_lines(reader.header())?;
        Ok(Self {
            reader,
            header,
            chromosome: chromosome.clone(),
            record_number: 0,
            buffer: Vec::new(),
            fetched: false,
        })
    }
}

impl LineSource for IndexedLineSource {
    fn header(&self) -> &VcfHeader {
        &self.header
    }

    fn first_line(&mut self) -> MgsResult<Option<RawLine>> {
        let tid = match self.reader.tid(&self.chromosome.name) {
            Ok(tid) => tid,
            Err(_) => {
                log::debug!("No indexed records for {}", self.chromosome.name);
                return Ok(None);
            }
        };
        self.reader.fetch(tid, 0, self.chromosome.length as u64 + 1)?;
        self.fetched = true;
        self.record_number = 0;
        self.next_line()
    }

    fn next_line(&mut self) -> MgsResult<Option<RawLine>> {
        if !self.fetched {
            return Ok(None);
        }
        self.buffer.clear();
        if !self.reader.read(&mut self.buffer)? {
            return Ok(None);
        }
        self.record_number += 1;
        decode_line(self.record_number, &self.buffer).map(Some)
    }

    fn end_scan(&mut self) -> MgsResult<()> {
        self.fetched = false;
        self.buffer = Vec::new();
        Ok(())
    }

    fn region(&self) -> Option<&str> {
        Some(&self.chromosome.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
    NotEqual,
}

impl Comparison {
    // Two-character operators first so that "<=" is not read as "<"
    const OPERATORS: [(&'static str, Comparison); 6] = [
        ("<=", Comparison::LessOrEqual),
        (">=", Comparison::GreaterOrEqual),
        ("!=", Comparison::NotEqual),
        ("<", Comparison::Less),
        (">", Comparison::Greater),
        ("=", Comparison::Equal),
    ];

    pub fn holds(self, found: f64, expected: f64) -> bool {
        match self {
            Comparison::Less => found < expected,
            Comparison::LessOrEqual => found <= expected,
            Comparison::Equal => found == expected,
            Comparison::GreaterOrEqual => found >= expected,
            Comparison::Greater => found > expected,
            Comparison::NotEqual => found != expected,
        }
    }

    fn symbol(self) -> &'static str {
        Self::OPERATORS
            .iter()
            .find(|(_, comparison)| *comparison == self)
            .map(|(symbol, _)| *symbol)
            .unwrap_or("?")
    }

    /// Splits `KEY<op>VALUE`
    fn split(expression: &str) -> Option<(&str, Comparison, &str)> {
        let (index, symbol, comparison) = Self::OPERATORS
            .iter()
            .filter_map(|(symbol, comparison)| {
                expression.find(symbol).map(|index| (index, *symbol, *comparison))
            })
            .min_by_key(|(index, symbol, _)| (*index, std::cmp::Reverse(symbol.len())))?;
        Some((
            &expression[..index],
            comparison,
            &expression[index + symbol.len()..],
        ))
    }
}

/// Field predicate applied to lines that passed the genome/variation checks
#[derive(Debug, Clone, PartialEq)]
pub enum LineFilter {
    /// FILTER column is `PASS` or `.`
    Pass,
    /// QUAL at least this value; missing QUAL fails
    MinQuality(f64),
    /// Numeric INFO value comparison; a missing key fails
    Info {
        key: String,
        comparison: Comparison,
        value: f64,
    },
    /// Numeric FORMAT value comparison, satisfied by any selected genome
    Format {
        key: String,
        comparison: Comparison,
        value: f64,
    },
    /// INFO key present
    InfoFlag(String),
}

impl LineFilter {
    pub fn accepts(&self, line: &AnalyzedLine, genomes: &[usize]) -> bool {
        match self {
            LineFilter::Pass => matches!(line.filter(), "PASS" | "."),
            LineFilter::MinQuality(min) => line.quality().is_some_and(|q| q >= *min),
            LineFilter::Info {
                key,
                comparison,
                value,
            } => line
                .info_value(key)
                .and_then(|found| found.parse::<f64>().ok())
                .is_some_and(|found| comparison.holds(found, *value)),
            LineFilter::Format {
                key,
                comparison,
                value,
            } => genomes.iter().any(|&genome| {
                line.format_value(genome, key)
                    .and_then(|found| found.parse::<f64>().ok())
                    .is_some_and(|found| comparison.holds(found, *value))
            }),
            LineFilter::InfoFlag(key) => line.info_value(key).is_some(),
        }
    }
}

impl fmt::Display for LineFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineFilter::Pass => write!(f, "PASS"),
            LineFilter::MinQuality(min) => write!(f, "QUAL>={}", min),
            LineFilter::Info {
                key,
                comparison,
                value,
            } => write!(f, "INFO:{}{}{}", key, comparison.symbol(), value),
            LineFilter::Format {
                key,
                comparison,
                value,
            } => write!(f, "FORMAT:{}{}{}", key, comparison.symbol(), value),
            LineFilter::InfoFlag(key) => write!(f, "FLAG:{}", key),
        }
    }
}

/// Parses `PASS`, `QUAL>=30`, `INFO:DP>10`, `FORMAT:GQ>=20` or `FLAG:DB`
impl FromStr for LineFilter {
    type Err = MgsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || MgsError::InvalidConfig(format!("invalid filter '{}'", s));
        let number = |text: &str| text.trim().parse::<f64>().map_err(|_| invalid());

        if s.eq_ignore_ascii_case("PASS") {
            return Ok(LineFilter::Pass);
        }
        if let Some(key) = s.strip_prefix("FLAG:") {
            if key.is_empty() {
                return Err(invalid());
            }
            return Ok(LineFilter::InfoFlag(key.to_string()));
        }
        if let Some(rest) = s.strip_prefix("QUAL") {
            return match Comparison::split(rest) {
                Some(("", Comparison::GreaterOrEqual, value)) => {
                    Ok(LineFilter::MinQuality(number(value)?))
                }
                _ => Err(invalid()),
            };
        }

        let (field, expression) = s.split_once(':').ok_or_else(invalid)?;
        let (key, comparison, value) = Comparison::split(expression).ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }
        let key = key.to_string();
        let value = number(value)?;
        match field {
            "INFO" => Ok(LineFilter::Info {
                key,
                comparison,
                value,
            }),
            "FORMAT" => Ok(LineFilter::Format {
                key,
                comparison,
                value,
            }),
            _ => Err(invalid()),
        }
    }
}

/// A malformed line that was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineWarning {
    /// File line number, or record index within `region` for indexed queries
    pub line: usize,
    pub region: Option<String>,
    pub message: String,
}

impl fmt::Display for LineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.region {
            Some(region) => write!(f, "record {} of {}: {}", self.line, region, self.message),
            None => write!(f, "line {}: {}", self.line, self.message),
        }
    }
}

/// Collects recoverable per-line errors of a scan
#[derive(Debug, Clone, Default)]
pub struct WarningCollector {
    warnings: Vec<LineWarning>,
}

impl WarningCollector {
    pub fn report(&mut self, line: usize, region: Option<&str>, message: String) {
        let warning = LineWarning {
            line,
            region: region.map(str::to_string),
            message,
        };
        if self.warnings.len() < LOGGED_WARNINGS {
            log::warn!("Skipping VCF {}", warning);
        } else {
            log::debug!("Skipping VCF {}", warning);
        }
        self.warnings.push(warning);
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn warnings(&self) -> &[LineWarning] {
        &self.warnings
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanOutcome {
    #[default]
    Completed,
    Cancelled,
}

/// Line counts of a finished scan
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Data lines read, malformed ones included
    pub lines: usize,
    /// Lines whose genotypes matched the genome and variation checks
    pub accepted: usize,
    pub rejected_by_genome: usize,
    pub rejected_by_variation: usize,
    /// Accepted lines dropped by a line filter
    pub filtered: usize,
    /// Lines handed to the receiver
    pub forwarded: usize,
    pub warnings: WarningCollector,
    pub outcome: ScanOutcome,
}

impl ScanReport {
    /// Adds the counts and warnings of another scan.
    pub fn merge(&mut self, other: ScanReport) {
        self.lines += other.lines;
        self.accepted += other.accepted;
        self.rejected_by_genome += other.rejected_by_genome;
        self.rejected_by_variation += other.rejected_by_variation;
        self.filtered += other.filtered;
        self.forwarded += other.forwarded;
        self.warnings.warnings.extend(other.warnings.warnings);
        if other.outcome == ScanOutcome::Cancelled {
            self.outcome = ScanOutcome::Cancelled;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    NotStarted,
    Scanning,
    Ended,
}

/// Single-use scanner over one line source
pub struct VcfScanner<S: LineSource> {
    source: S,
    state: ScanState,
    genomes: Option<Vec<String>>,
    variations: Option<Vec<VariantType>>,
    filters: Vec<LineFilter>,
    cancellation: CancellationFlag,
}

impl<S: LineSource> VcfScanner<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: ScanState::NotStarted,
            genomes: None,
            variations: None,
            filters: Vec::new(),
            cancellation: CancellationFlag::new(),
        }
    }

    pub fn header(&self) -> &VcfHeader {
        self.source.header()
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    fn check_not_started(&self) -> MgsResult<()> {
        match self.state {
            ScanState::NotStarted => Ok(()),
            _ => Err(MgsError::ScannerStarted),
        }
    }

    /// Restricts the scan to these genomes instead of every sample column.
    pub fn set_genomes(&mut self, genomes: Vec<String>) -> MgsResult<()> {
        self.check_not_started()?;
        self.genomes = Some(genomes);
        Ok(())
    }

    pub fn set_variations(&mut self, variations: Vec<VariantType>) -> MgsResult<()> {
        self.check_not_started()?;
        self.variations = Some(variations);
        Ok(())
    }

    pub fn set_filters(&mut self, filters: Vec<LineFilter>) -> MgsResult<()> {
        self.check_not_started()?;
        self.filters = filters;
        Ok(())
    }

    pub fn set_cancellation(&mut self, cancellation: CancellationFlag) -> MgsResult<()> {
        self.check_not_started()?;
        self.cancellation = cancellation;
        Ok(())
    }

    /// Sample indexes of the genomes to scan
    fn genome_indexes(&self) -> MgsResult<Vec<usize>> {
        let header = self.source.header();
        match &self.genomes {
            Some(names) => names
                .iter()
                .map(|name| {
                    header
                        .genome_index(name)
                        .ok_or_else(|| MgsError::UnknownGenome(name.clone()))
                })
                .collect(),
            None => Ok((0..header.genomes().len()).collect()),
        }
    }

    /// Runs the scan to the end of the source, or until cancelled.
    pub fn compute<R: LineReceiver + ?Sized>(&mut self, receiver: &mut R) -> MgsResult<ScanReport> {
        self.check_not_started()?;
        self.state = ScanState::Scanning;
        let genomes = self.genome_indexes()?;
        log::debug!("Scanning {} genomes", genomes.len());

        let mut report = ScanReport::default();
        let mut next = self.source.first_line();
        loop {
            match next {
                Ok(Some(raw)) => {
                    if self.cancellation.is_stopped() {
                        log::info!("Scan cancelled after {} lines", report.lines);
                        report.outcome = ScanOutcome::Cancelled;
                        break;
                    }
                    if !raw.is_header() {
                        report.lines += 1;
                        self.process(raw, &genomes, receiver, &mut report)?;
                    }
                }
                Ok(None) => break,
                Err(MgsError::InvalidLine { line, message }) => {
                    report.lines += 1;
                    report.warnings.report(line, self.source.region(), message);
                }
                Err(e) => return Err(e),
            }
            next = self.source.next_line();
        }

        self.source.end_scan()?;
        self.state = ScanState::Ended;
        log::info!(
            "Scanned {} lines: {} accepted, {} forwarded, {} skipped as malformed",
            report.lines,
            report.accepted,
            report.forwarded,
            report.warnings.len()
        );
        Ok(report)
    }

    fn process<R: LineReceiver + ?Sized>(
        &self,
        raw: RawLine,
        genomes: &[usize],
        receiver: &mut R,
        report: &mut ScanReport,
    ) -> MgsResult<()> {
        let line = match raw.analyze(self.source.header()) {
            Ok(line) => line,
            Err(MgsError::InvalidLine { line, message }) => {
                report.warnings.report(line, self.source.region(), message);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut calls = Vec::with_capacity(genomes.len() * 2);
        for &genome in genomes {
            match line.genotype(genome) {
                Ok(Some(genotype)) => calls.extend(genotype.calls),
                Ok(None) => {}
                Err(MgsError::InvalidLine { line, message }) => {
                    report.warnings.report(line, self.source.region(), message);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }

        if !calls.iter().any(|call| *call != AlleleCall::Reference) {
            report.rejected_by_genome += 1;
            return Ok(());
        }

        if let Some(variations) = &self.variations {
            let matches = calls
                .iter()
                .filter_map(|call| line.call_type(*call))
                .any(|variant_type| variations.contains(&variant_type));
            if !matches {
                report.rejected_by_variation += 1;
                return Ok(());
            }
        }

        report.accepted += 1;

        if !self.filters.iter().all(|filter| filter.accepts(&line, genomes)) {
            report.filtered += 1;
            return Ok(());
        }

        receiver.process_line(&line, self.source.header())?;
        report.forwarded += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader, Cursor, Write};
    use tempfile::NamedTempFile;

    const HEADER: &str = "##fileformat=VCFv4.2\n#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\tA\tB\n";

    #[derive(Default)]
    struct Collector {
        positions: Vec<i32>,
    }

    impl LineReceiver for Collector {
        fn process_line(&mut self, line: &AnalyzedLine, _header: &VcfHeader) -> MgsResult<()> {
            self.positions.push(line.position());
            Ok(())
        }
    }

    fn source(body: &str) -> FileLineSource {
        let text = format!("{}{}", HEADER, body);
        FileLineSource::from_reader(Box::new(BufReader::new(Cursor::new(text.into_bytes())))).unwrap()
    }

    fn scan(body: &str, configure: impl FnOnce(&mut VcfScanner<FileLineSource>)) -> (ScanReport, Vec<i32>) {
        let mut scanner = VcfScanner::new(source(body));
        configure(&mut scanner);
        let mut collector = Collector::default();
        let report = scanner.compute(&mut collector).unwrap();
        assert_eq!(scanner.state(), ScanState::Ended);
        (report, collector.positions)
    }

    #[test]
    fn test_malformed_line_is_skipped() {
        let body = "chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t1/0\n\
                    chr1\t200\t.\tACGTA\tA\t.\tPASS\t.\tGT\t0/1\t0/0\n\
                    chr1\t300\t.\tA\tT\t.\tPASS\t.\n";
        let (report, positions) = scan(body, |_| {});
        assert_eq!(positions, vec![100, 200]);
        assert_eq!(report.lines, 3);
        assert_eq!(report.accepted, 2);
        assert_eq!(report.forwarded, 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings.warnings()[0].line, 5);
        assert_eq!(report.outcome, ScanOutcome::Completed);
    }

    #[test]
    fn test_invalid_utf8_line_is_skipped() {
        let mut bytes = HEADER.as_bytes().to_vec();
        bytes.extend_from_slice(b"chr1\t100\t.\tA\tT\t.\tPASS\tNOTE=\xff\tGT\t0/1\t0/0\n");
        bytes.extend_from_slice(b"chr1\t200\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t0/0\n");
        let source = FileLineSource::from_reader(Box::new(BufReader::new(Cursor::new(bytes)))).unwrap();

        let mut scanner = VcfScanner::new(source);
        let mut collector = Collector::default();
        let report = scanner.compute(&mut collector).unwrap();
        assert_eq!(collector.positions, vec![200]);
        assert_eq!(report.lines, 2);
        assert_eq!(report.warnings.len(), 1);
        let warning = &report.warnings.warnings()[0];
        assert_eq!(warning.line, 3);
        assert_eq!(warning.region, None);
        assert!(warning.message.contains("UTF-8"));
        assert!(warning.to_string().starts_with("line 3: "));
    }

    #[test]
    fn test_invalid_utf8_header_fails() {
        let mut bytes = b"##source=\xfe\n".to_vec();
        bytes.extend_from_slice(HEADER.as_bytes());
        let result = FileLineSource::from_reader(Box::new(BufReader::new(Cursor::new(bytes))));
        assert!(matches!(result, Err(MgsError::InvalidHeader(_))));
    }

    #[test]
    fn test_region_warning_display() {
        let mut warnings = WarningCollector::default();
        warnings.report(4, Some("chr2"), "bad genotype".to_string());
        assert_eq!(warnings.warnings()[0].to_string(), "record 4 of chr2: bad genotype");
    }

    #[test]
    fn test_variation_allowlist() {
        let body = "chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t1/1\n\
                    chr1\t200\t.\tA\tAGG\t.\tPASS\t.\tGT\t0/1\t0/0\n";
        let (report, positions) = scan(body, |scanner| {
            scanner.set_variations(vec![VariantType::Insertion]).unwrap();
        });
        assert_eq!(positions, vec![200]);
        assert_eq!(report.rejected_by_variation, 1);
    }

    #[test]
    fn test_genome_subset() {
        let body = "chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/0\t1/1\n\
                    chr1\t200\t.\tA\tG\t.\tPASS\t.\tGT\t0|1\t0/0\n\
                    chr1\t300\t.\tA\tG\t.\tPASS\t.\tGT\t./.\t0/0\n";
        let (report, positions) = scan(body, |scanner| {
            scanner.set_genomes(vec!["A".to_string()]).unwrap();
        });
        assert_eq!(positions, vec![200, 300]);
        assert_eq!(report.rejected_by_genome, 1);
    }

    #[test]
    fn test_unknown_genome_fails() {
        let mut scanner = VcfScanner::new(source(""));
        scanner.set_genomes(vec!["C".to_string()]).unwrap();
        let result = scanner.compute(&mut Collector::default());
        assert!(matches!(result, Err(MgsError::UnknownGenome(name)) if name == "C"));
    }

    #[test]
    fn test_bad_genotype_is_a_warning() {
        let body = "chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/2\t0/0\n\
                    chr1\t200\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t0/0\n";
        let (report, positions) = scan(body, |_| {});
        assert_eq!(positions, vec![200]);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_filters_after_acceptance() {
        let body = "chr1\t100\t.\tA\tT\t10\tPASS\tDP=5\tGT:GQ\t0/1:30\t0/0:10\n\
                    chr1\t200\t.\tA\tT\t50\tq10\tDP=50\tGT:GQ\t0/1:30\t0/0:10\n\
                    chr1\t300\t.\tA\tT\t50\tPASS\tDP=50\tGT:GQ\t0/1:5\t0/0:25\n\
                    chr1\t400\t.\tA\tT\t50\t.\tDP=50\tGT:GQ\t0/1:35\t0/0:5\n";
        let (report, positions) = scan(body, |scanner| {
            scanner
                .set_filters(vec![
                    LineFilter::Pass,
                    "QUAL>=20".parse().unwrap(),
                    "INFO:DP>10".parse().unwrap(),
                    "FORMAT:GQ>=20".parse().unwrap(),
                ])
                .unwrap();
        });
        assert_eq!(positions, vec![300, 400]);
        assert_eq!(report.accepted, 4);
        assert_eq!(report.filtered, 2);
    }

    #[test]
    fn test_configuration_locked_after_start() {
        let mut scanner = VcfScanner::new(source(""));
        scanner.compute(&mut Collector::default()).unwrap();
        assert!(matches!(scanner.set_genomes(vec![]), Err(MgsError::ScannerStarted)));
        assert!(matches!(
            scanner.compute(&mut Collector::default()),
            Err(MgsError::ScannerStarted)
        ));
    }

    #[test]
    fn test_cancelled_scan() {
        let body = "chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t1/0\n";
        let flag = CancellationFlag::new();
        flag.stop();
        let (report, positions) = scan(body, |scanner| {
            scanner.set_cancellation(flag.clone()).unwrap();
        });
        assert!(positions.is_empty());
        assert_eq!(report.outcome, ScanOutcome::Cancelled);
    }

    #[test]
    fn test_file_source_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calls.vcf.gz");
        {
            let mut writer = crate::utils::create_writer(&path).unwrap();
            write!(writer, "{}chr1\t100\t.\tA\tAT\t.\tPASS\t.\tGT\t0/1\t0/0\n", HEADER).unwrap();
            writer.finish().unwrap();
        }
        let mut scanner = VcfScanner::new(FileLineSource::open(&path).unwrap());
        assert_eq!(scanner.header().genomes().len(), 2);
        let mut collector = Collector::default();
        scanner.compute(&mut collector).unwrap();
        assert_eq!(collector.positions, vec![100]);
    }

    fn indexed_vcf(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("calls.vcf.gz");
        {
            let mut writer = rust_htslib::bgzf::Writer::from_path(&path).unwrap();
            writer.write_all(HEADER.as_bytes()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        rust_htslib::bcf::index::build(&path, None, 1, rust_htslib::bcf::index::Type::Tbx).unwrap();
        path
    }

    fn indexed_scan(path: &Path, chromosome: &Chromosome) -> (ScanReport, Vec<i32>) {
        let source = IndexedLineSource::open(path, chromosome).unwrap();
        assert_eq!(source.region(), Some(chromosome.name.as_str()));
        let mut scanner = VcfScanner::new(source);
        assert_eq!(scanner.header().genomes().len(), 2);
        let mut collector = Collector::default();
        let report = scanner.compute(&mut collector).unwrap();
        (report, collector.positions)
    }

    #[test]
    fn test_indexed_source_reads_one_chromosome() {
        let dir = tempfile::tempdir().unwrap();
        let body = "chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t0/0\n\
                    chr1\t200\t.\tA\tAT\t.\tPASS\t.\tGT\t0/0\t1/1\n\
                    chr2\t50\t.\tA\tG\t.\tPASS\t.\tGT\t1/1\t0/0\n\
                    chr2\t60\t.\tA\tT\t.\tPASS\t.\n";
        let path = indexed_vcf(dir.path(), body);

        let (report, positions) = indexed_scan(&path, &Chromosome::new("chr1", 1000));
        assert_eq!(positions, vec![100, 200]);
        assert_eq!(report.lines, 2);
        assert!(report.warnings.is_empty());

        let (report, positions) = indexed_scan(&path, &Chromosome::new("chr2", 1000));
        assert_eq!(positions, vec![50]);
        assert_eq!(report.warnings.len(), 1);
        let warning = &report.warnings.warnings()[0];
        assert_eq!(warning.line, 2);
        assert_eq!(warning.region.as_deref(), Some("chr2"));

        // the fetched range ends at the chromosome length
        let (_, positions) = indexed_scan(&path, &Chromosome::new("chr1", 150));
        assert_eq!(positions, vec![100]);

        let (report, positions) = indexed_scan(&path, &Chromosome::new("chr3", 1000));
        assert!(positions.is_empty());
        assert_eq!(report.lines, 0);
        assert_eq!(report.outcome, ScanOutcome::Completed);
    }

    #[test]
    fn test_indexed_source_requires_index() {
        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", HEADER).unwrap();
        let chromosome = Chromosome::new("chr1", 1000);
        assert!(IndexedLineSource::open(temp_file.path(), &chromosome).is_err());
    }

    #[test]
    fn test_filter_parsing() {
        assert_eq!("PASS".parse::<LineFilter>().unwrap(), LineFilter::Pass);
        assert_eq!("QUAL>=30".parse::<LineFilter>().unwrap(), LineFilter::MinQuality(30.0));
        assert_eq!(
            "INFO:AF<=0.5".parse::<LineFilter>().unwrap(),
            LineFilter::Info {
                key: "AF".to_string(),
                comparison: Comparison::LessOrEqual,
                value: 0.5,
            }
        );
        assert_eq!(
            "FORMAT:DP!=0".parse::<LineFilter>().unwrap(),
            LineFilter::Format {
                key: "DP".to_string(),
                comparison: Comparison::NotEqual,
                value: 0.0,
            }
        );
        assert_eq!("FLAG:DB".parse::<LineFilter>().unwrap(), LineFilter::InfoFlag("DB".to_string()));
        assert!("QUAL<3".parse::<LineFilter>().is_err());
        assert!("INFO:DP".parse::<LineFilter>().is_err());
        assert!("INFO:>3".parse::<LineFilter>().is_err());
        assert!("SAMPLE:DP>3".parse::<LineFilter>().is_err());
        assert_eq!("INFO:AF<=0.5".parse::<LineFilter>().unwrap().to_string(), "INFO:AF<=0.5");
    }

    #[test]
    fn test_report_merge() {
        let (mut total, _) = scan("chr1\t100\t.\tA\tT\t.\tPASS\t.\n", |_| {});
        let (other, _) = scan("chr1\t100\t.\tA\tT\t.\tPASS\t.\tGT\t0/1\t0/0\n", |_| {});
        total.merge(other);
        assert_eq!(total.lines, 2);
        assert_eq!(total.forwarded, 1);
        assert_eq!(total.warnings.len(), 1);
        assert_eq!(total.outcome, ScanOutcome::Completed);
    }
}
