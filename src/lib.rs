//! # mgs-rs - Multi-Genome Synchronization
//!
//! Reconciles a reference genome's coordinate space with per-genome, per-allele
//! indel offsets read from VCF files. The result is a meta-genome coordinate
//! space wide enough to hold every genome's insertions side by side, with
//! O(log n) translation between genome, reference and meta-genome positions.

pub mod allele;
pub mod offset;
pub mod project;
pub mod scanner;
pub mod sync;
pub mod utils;
pub mod variant;
pub mod vcf;

use scanner::LineFilter;
use vcf::VariantType;

/// One haplotype copy of a genome, as ordered in the VCF `GT` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlleleType {
    /// First `GT` token
    Paternal,
    /// Second `GT` token
    Maternal,
}

impl AlleleType {
    pub const ALL: [AlleleType; 2] = [AlleleType::Paternal, AlleleType::Maternal];

    /// Position of the allele token inside the `GT` field
    pub fn gt_index(self) -> usize {
        match self {
            AlleleType::Paternal => 0,
            AlleleType::Maternal => 1,
        }
    }
}

impl std::fmt::Display for AlleleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlleleType::Paternal => write!(f, "paternal"),
            AlleleType::Maternal => write!(f, "maternal"),
        }
    }
}

/// Scan and synchronization settings
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Genomes to synchronize; `None` takes every sample column of each VCF
    pub genomes: Option<Vec<String>>,
    /// Variation types a line must reference to be kept; `None` keeps all
    pub variations: Option<Vec<VariantType>>,
    /// Field filters applied to lines that passed the genome/variation checks
    pub filters: Vec<LineFilter>,
    pub num_threads: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            genomes: None,
            variations: None,
            filters: Vec::new(),
            num_threads: utils::get_num_cpus(),
        }
    }
}

/// Validate synchronization settings before any file is opened
pub fn validate_sync_config(config: &SyncConfig) -> MgsResult<()> {
    if config.num_threads == 0 {
        return Err(MgsError::InvalidConfig(
            "num_threads must be at least 1".to_string(),
        ));
    }

    if let Some(genomes) = &config.genomes {
        if genomes.is_empty() {
            return Err(MgsError::InvalidConfig(
                "genome list must not be empty when given".to_string(),
            ));
        }
        if let Some(name) = genomes.iter().find(|name| name.trim().is_empty()) {
            return Err(MgsError::InvalidConfig(format!(
                "invalid genome name '{}'",
                name
            )));
        }
    }

    if let Some(variations) = &config.variations {
        if variations.is_empty() {
            return Err(MgsError::InvalidConfig(
                "variation list must not be empty when given".to_string(),
            ));
        }
    }

    Ok(())
}

/// Error types for the mgs library
#[derive(Debug, thiserror::Error)]
pub enum MgsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTSlib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid VCF line {line}: {message}")]
    InvalidLine { line: usize, message: String },

    #[error("Invalid VCF header: {0}")]
    InvalidHeader(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown chromosome: {0}")]
    UnknownChromosome(String),

    #[error("Unknown genome: {0}")]
    UnknownGenome(String),

    #[error("Unsupported {structure} format version {version}")]
    UnsupportedVersion { structure: &'static str, version: i32 },

    #[error("Scanner configuration cannot change once scanning has started")]
    ScannerStarted,

    #[error("Synchronization cancelled")]
    Cancelled,

    #[error("Meta-genome coordinates of {0} do not fit in 32 bits")]
    CoordinateOverflow(String),
}

pub type MgsResult<T> = Result<T, MgsError>;
