//! CLI binary for position translation - loads a meta-genome snapshot and converts coordinates

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use env_logger::Env;
use mgs_rs::{sync::MetaGenome, utils::validate_file_readable, AlleleType};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mgs_query")]
#[command(about = "Translate positions between reference, meta-genome and genome coordinates")]
#[command(long_about = "
Loads a snapshot written by mgs_sync and translates one position of a
chromosome from the given coordinate space into every other space.

The output is a tab-separated table with one row per coordinate space. A
genome row is written for every allele of every genome, or only for --genome
when given. An empty position means the base does not exist in that space:
it was deleted, or it belongs to an insertion of another genome.
")]
struct Args {
    /// Snapshot written by mgs_sync
    #[arg(long, value_name = "FILE")]
    snapshot: PathBuf,

    /// Chromosome name
    #[arg(long)]
    chromosome: String,

    /// 1-based position to translate
    #[arg(long)]
    position: i32,

    /// Coordinate space of --position
    #[arg(long, value_enum, default_value_t = Space::Reference)]
    from: Space,

    /// Restrict genome rows to one genome; required with --from genome
    #[arg(long)]
    genome: Option<String>,

    /// Allele of --genome that --position refers to with --from genome
    #[arg(long, value_enum, default_value_t = Allele::Paternal)]
    allele: Allele,

    /// Print chromosome lengths instead of translating
    #[arg(long)]
    lengths: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Space {
    Reference,
    Meta,
    Genome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Allele {
    Paternal,
    Maternal,
}

impl From<Allele> for AlleleType {
    fn from(allele: Allele) -> Self {
        match allele {
            Allele::Paternal => AlleleType::Paternal,
            Allele::Maternal => AlleleType::Maternal,
        }
    }
}

/// One output row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct Translation {
    space: String,
    genome: String,
    allele: String,
    position: Option<i32>,
}

impl Translation {
    fn reference(position: Option<i32>) -> Self {
        Self::row("reference", "", "", position)
    }

    fn meta(position: Option<i32>) -> Self {
        Self::row("meta", "", "", position)
    }

    fn genome(genome: &str, allele: AlleleType, position: Option<i32>) -> Self {
        Self::row("genome", genome, &allele.to_string(), position)
    }

    fn row(space: &str, genome: &str, allele: &str, position: Option<i32>) -> Self {
        Self {
            space: space.to_string(),
            genome: genome.to_string(),
            allele: allele.to_string(),
            position,
        }
    }
}

/// Translates the requested position into every coordinate space
fn translate(meta: &MetaGenome, args: &Args) -> Result<Vec<Translation>> {
    let chromosome = args.chromosome.as_str();
    let meta_position = match args.from {
        Space::Reference => meta.reference_to_meta(chromosome, args.position)?,
        Space::Meta => args.position,
        Space::Genome => {
            let Some(genome) = &args.genome else {
                bail!("--from genome needs --genome");
            };
            meta.genome_to_meta(genome, args.allele.into(), chromosome, args.position)?
        }
    };

    let mut rows = vec![
        Translation::reference(meta.meta_to_reference(chromosome, meta_position)?),
        Translation::meta(Some(meta_position)),
    ];

    let genomes: Vec<&str> = match &args.genome {
        Some(genome) => vec![meta.genome(genome)?.name.as_str()],
        None => meta.genomes().iter().map(|genome| genome.name.as_str()).collect(),
    };
    for genome in genomes {
        for allele in AlleleType::ALL {
            let position = meta.meta_to_genome(genome, allele, chromosome, meta_position)?;
            rows.push(Translation::genome(genome, allele, position));
        }
    }
    Ok(rows)
}

#[derive(Debug, Serialize)]
struct LengthRow {
    chromosome: String,
    length: u32,
    meta_length: i64,
}

fn lengths(meta: &MetaGenome) -> Result<Vec<LengthRow>> {
    meta.chromosomes()
        .iter()
        .map(|chromosome| -> Result<LengthRow> {
            Ok(LengthRow {
                chromosome: chromosome.name.clone(),
                length: chromosome.length,
                meta_length: meta.meta_chromosome_length(&chromosome.name)?,
            })
        })
        .collect()
}

fn write_rows<T: Serialize>(rows: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(std::io::stdout());
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn run() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    validate_file_readable(&args.snapshot)?;
    let meta = MetaGenome::load(&args.snapshot)
        .with_context(|| format!("Failed to load snapshot {:?}", args.snapshot))?;
    log::info!(
        "Loaded {} chromosomes and {} genomes",
        meta.chromosomes().len(),
        meta.genomes().len()
    );

    if args.lengths {
        return write_rows(&lengths(&meta)?);
    }

    let rows = translate(&meta, &args).with_context(|| {
        format!(
            "Failed to translate {}:{} from {:?} coordinates",
            args.chromosome, args.position, args.from
        )
    })?;
    write_rows(&rows)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
