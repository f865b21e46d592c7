//! CLI binary for multi-genome synchronization - scans VCF files and writes a meta-genome snapshot

use clap::{Parser, ValueEnum};
use env_logger::Env;
use mgs_rs::{
    project::{ChromosomeList, MultiGenomeProject},
    scanner::LineFilter,
    sync::write_summaries,
    utils::{ensure_parent_dirs, get_num_cpus, validate_file_readable, CancellationFlag, Timer},
    validate_sync_config,
    vcf::VariantType,
    MgsError, MgsResult, SyncConfig,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mgs_sync")]
#[command(about = "Multi-genome synchronization: builds a meta-genome from VCF indels")]
#[command(long_about = "
Scans one or more VCF files and synchronizes the genomes they describe into a
single meta-genome coordinate space, wide enough to hold every genome's
insertions side by side.

Every selected genome contributes two alleles (paternal, maternal) taken from
the GT field. Insertions widen the reference coordinate space; when several
genomes insert bases after the same reference position the longest insertion
is kept. Deletions and shorter insertions leave gaps in a genome's space.

The result is written as a binary snapshot (gzip compressed when the output
name ends with .gz) that mgs_query can translate positions with.

Chromosome lengths come from --chromosomes (a tab-separated name/length file;
.fai files work) or from the ##contig lines of the first VCF file.
")]
struct Args {
    /// VCF files to scan (plain, gzip or BGZF)
    #[arg(long = "vcf", value_name = "FILE", required = true)]
    vcf: Vec<PathBuf>,

    /// Read the VCF files through their tabix index (.tbi), one chromosome at a time
    #[arg(long)]
    indexed: bool,

    /// Tab-separated chromosome sizes file
    #[arg(long, value_name = "FILE")]
    chromosomes: Option<PathBuf>,

    /// Genome to synchronize; repeat for several (default: every sample column)
    #[arg(long = "genome", value_name = "NAME")]
    genomes: Vec<String>,

    /// Variation type a line must carry to be used; repeat for several (default: all)
    #[arg(long = "variation", value_enum)]
    variations: Vec<Variation>,

    /// Line filter: PASS, QUAL>=<n>, INFO:<key><op><n>, FORMAT:<key><op><n> or FLAG:<key>
    #[arg(long = "filter", value_name = "FILTER", value_parser = parse_filter)]
    filters: Vec<LineFilter>,

    /// Path to the output snapshot
    #[arg(long, value_name = "FILE")]
    output: PathBuf,

    /// Path to an optional per-chromosome TSV summary
    #[arg(long, value_name = "FILE")]
    summary: Option<PathBuf>,

    /// Number of processes to use for parallel processing
    #[arg(long, default_value_t = get_num_cpus())]
    num_processes: usize,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Force overwrite of output file if it exists
    #[arg(short, long)]
    force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Variation {
    Snp,
    Insertion,
    Deletion,
    NoCall,
}

impl From<Variation> for VariantType {
    fn from(variation: Variation) -> Self {
        match variation {
            Variation::Snp => VariantType::Snp,
            Variation::Insertion => VariantType::Insertion,
            Variation::Deletion => VariantType::Deletion,
            Variation::NoCall => VariantType::NoCall,
        }
    }
}

fn parse_filter(value: &str) -> Result<LineFilter, String> {
    value.parse().map_err(|e: MgsError| e.to_string())
}

fn sync_config(args: &Args) -> MgsResult<SyncConfig> {
    let config = SyncConfig {
        genomes: (!args.genomes.is_empty()).then(|| args.genomes.clone()),
        variations: (!args.variations.is_empty())
            .then(|| args.variations.iter().map(|&v| v.into()).collect()),
        filters: args.filters.clone(),
        num_threads: args.num_processes,
    };
    validate_sync_config(&config)?;
    Ok(config)
}

fn run() -> MgsResult<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    log::info!("Starting multi-genome synchronization");
    log::info!("Input VCFs: {:?}", args.vcf);
    log::info!("Output snapshot: {:?}", args.output);
    log::info!("Number of processes: {}", args.num_processes);

    for path in &args.vcf {
        validate_file_readable(path)?;
    }

    if args.output.exists() && !args.force {
        return Err(MgsError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("Output file {:?} already exists. Use --force to overwrite.", args.output),
        )));
    }

    let config = sync_config(&args)?;
    log::info!(
        "Configuration: genomes={:?}, variations={:?}, filters={}",
        config.genomes,
        config.variations,
        config.filters.len()
    );

    let chromosomes = match &args.chromosomes {
        Some(path) => ChromosomeList::from_sizes_file(path)?,
        None => ChromosomeList::from_vcf(&args.vcf[0])?,
    };
    log::info!("Project has {} chromosomes", chromosomes.len());

    let mut project = MultiGenomeProject::new(chromosomes);
    for path in &args.vcf {
        project.add_vcf(path, args.indexed)?;
    }
    log::info!("Genomes found: {}", project.genomes().join(", "));

    let timer = Timer::new("Synchronizing genomes");
    let (meta_genome, report) = project.synchronize(config, CancellationFlag::new())?;
    drop(timer);

    log::info!("Scan summary:");
    log::info!("  Lines read: {}", report.lines);
    log::info!("  Accepted: {}", report.accepted);
    log::info!("  Rejected by genome: {}", report.rejected_by_genome);
    log::info!("  Rejected by variation: {}", report.rejected_by_variation);
    log::info!("  Filtered: {}", report.filtered);
    log::info!("  Used: {}", report.forwarded);
    if !report.warnings.is_empty() {
        log::warn!("{} malformed lines were skipped", report.warnings.len());
    }

    ensure_parent_dirs(&args.output)?;
    let _timer = Timer::new("Writing snapshot");
    meta_genome.save(&args.output)?;

    if let Some(summary) = &args.summary {
        ensure_parent_dirs(summary)?;
        write_summaries(&meta_genome.summaries()?, summary)?;
        log::info!("Summary written to: {:?}", summary);
    }

    log::info!(
        "Synchronized {} genomes; reference gained {} insertion gaps",
        meta_genome.genomes().len(),
        meta_genome.reference().allele().offset_count()
    );
    Ok(())
}

/// Handle application errors and provide user-friendly messages
fn handle_error(error: MgsError) -> ! {
    match error {
        MgsError::FileNotFound(path) => {
            eprintln!("Error: File not found: {}", path);
            eprintln!("Please check that the file exists and is readable.");
            eprintln!("With --indexed, ensure the tabix index (.tbi) is present.");
        }
        MgsError::InvalidHeader(msg) => {
            eprintln!("Error: Invalid VCF header: {}", msg);
            eprintln!("Without --chromosomes, the first VCF needs ##contig lines with lengths.");
        }
        MgsError::InvalidConfig(msg) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Please check your genome, variation and filter options.");
        }
        MgsError::UnknownGenome(name) => {
            eprintln!("Error: Genome {} is not a sample column of any VCF file", name);
        }
        MgsError::Htslib(ref e) => {
            eprintln!("Error: Indexed VCF error: {}", e);
            eprintln!("Please check that the VCF is BGZF compressed and indexed with tabix.");
        }
        MgsError::Io(ref e) => {
            eprintln!("Error: I/O error: {}", e);
            eprintln!("Please check file permissions and disk space.");
        }
        MgsError::Csv(ref e) => {
            eprintln!("Error: Tab-separated file error: {}", e);
            eprintln!("Please check the chromosome sizes file.");
        }
        other => {
            eprintln!("Error: {}", other);
        }
    }
    std::process::exit(1);
}

fn main() {
    if let Err(e) = run() {
        handle_error(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_to_config() {
        let args = Args::try_parse_from([
            "mgs_sync",
            "--vcf",
            "a.vcf.gz",
            "--vcf",
            "b.vcf",
            "--genome",
            "NA12878",
            "--variation",
            "insertion",
            "--variation",
            "no-call",
            "--filter",
            "PASS",
            "--filter",
            "INFO:DP>=10",
            "--output",
            "meta.mgs",
            "--num-processes",
            "2",
        ])
        .unwrap();
        assert_eq!(args.vcf.len(), 2);

        let config = sync_config(&args).unwrap();
        assert_eq!(config.genomes, Some(vec!["NA12878".to_string()]));
        assert_eq!(
            config.variations,
            Some(vec![VariantType::Insertion, VariantType::NoCall])
        );
        assert_eq!(config.filters.len(), 2);
        assert_eq!(config.num_threads, 2);
    }

    #[test]
    fn test_defaults_select_everything() {
        let args = Args::try_parse_from(["mgs_sync", "--vcf", "a.vcf", "--output", "meta.mgs"]).unwrap();
        let config = sync_config(&args).unwrap();
        assert!(config.genomes.is_none());
        assert!(config.variations.is_none());
        assert!(config.filters.is_empty());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(Args::try_parse_from(["mgs_sync", "--output", "meta.mgs"]).is_err());
        assert!(Args::try_parse_from([
            "mgs_sync", "--vcf", "a.vcf", "--output", "meta.mgs", "--filter", "DEPTH>3"
        ])
        .is_err());

        let args = Args::try_parse_from([
            "mgs_sync", "--vcf", "a.vcf", "--output", "meta.mgs", "--num-processes", "0"
        ])
        .unwrap();
        assert!(sync_config(&args).is_err());
    }
}
