//! Project context: the chromosome registry and the VCF inputs of a
//! multi-genome project, passed explicitly to whatever needs them

use crate::offset::read_size;
use crate::scanner::{FileLineSource, LineSource, ScanReport};
use crate::sync::{MetaGenome, MetaGenomeBuilder};
use crate::utils::{validate_file_readable, CancellationFlag};
use crate::vcf::VcfHeader;
use crate::{MgsError, MgsResult, SyncConfig};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Format version of a serialized chromosome list
pub const CHROMOSOME_LIST_VERSION: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chromosome {
    pub name: String,
    pub length: u32,
}

impl Chromosome {
    pub fn new(name: &str, length: u32) -> Self {
        Self {
            name: name.to_string(),
            length,
        }
    }
}

/// Ordered chromosomes of a project with name lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChromosomeList {
    chromosomes: Vec<Chromosome>,
    indices: HashMap<String, usize>,
}

impl ChromosomeList {
    pub fn new(chromosomes: Vec<Chromosome>) -> MgsResult<Self> {
        let mut indices = HashMap::with_capacity(chromosomes.len());
        for (index, chromosome) in chromosomes.iter().enumerate() {
            if indices.insert(chromosome.name.clone(), index).is_some() {
                return Err(MgsError::InvalidConfig(format!(
                    "duplicate chromosome '{}'",
                    chromosome.name
                )));
            }
        }
        Ok(Self {
            chromosomes,
            indices,
        })
    }

    /// Reads a `name<TAB>length` file; extra columns (as in `.fai`) are ignored
    pub fn from_sizes_file<P: AsRef<Path>>(path: P) -> MgsResult<Self> {
        let reader = crate::utils::open_text_reader(&path)?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(reader);

        let mut chromosomes = Vec::new();
        for result in csv_reader.records() {
            let record = result?;
            if record.len() < 2 {
                return Err(MgsError::InvalidConfig(format!(
                    "chromosome sizes line needs a name and a length: {:?}",
                    record
                )));
            }
            let length = record[1].trim().parse::<u32>().map_err(|_| {
                MgsError::InvalidConfig(format!("invalid chromosome length: {}", &record[1]))
            })?;
            chromosomes.push(Chromosome::new(record[0].trim(), length));
        }

        log::info!(
            "Read {} chromosomes from {}",
            chromosomes.len(),
            path.as_ref().display()
        );
        Self::new(chromosomes)
    }

    /// Uses the `##contig` lines of a VCF header; every contig needs a length
    pub fn from_vcf_header(header: &VcfHeader) -> MgsResult<Self> {
        let mut chromosomes = Vec::with_capacity(header.contigs().len());
        for contig in header.contigs() {
            let length = contig.length.ok_or_else(|| {
                MgsError::InvalidHeader(format!("contig {} has no length", contig.name))
            })?;
            chromosomes.push(Chromosome::new(&contig.name, length));
        }
        if chromosomes.is_empty() {
            return Err(MgsError::InvalidHeader(
                "no ##contig lines to take chromosomes from".to_string(),
            ));
        }
        Self::new(chromosomes)
    }

    /// Takes the chromosomes from the `##contig` lines of a VCF file
    pub fn from_vcf<P: AsRef<Path>>(path: P) -> MgsResult<Self> {
        let source = FileLineSource::open(path)?;
        Self::from_vcf_header(source.header())
    }

    pub fn len(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosomes.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn get(&self, index: usize) -> Option<&Chromosome> {
        self.chromosomes.get(index)
    }

    pub fn resolve(&self, name: &str) -> MgsResult<usize> {
        self.index_of(name)
            .ok_or_else(|| MgsError::UnknownChromosome(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chromosome> {
        self.chromosomes.iter()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> MgsResult<()> {
        writer.write_i32::<LittleEndian>(CHROMOSOME_LIST_VERSION)?;
        writer.write_i32::<LittleEndian>(self.chromosomes.len() as i32)?;
        for chromosome in &self.chromosomes {
            write_string(writer, &chromosome.name)?;
            writer.write_u32::<LittleEndian>(chromosome.length)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> MgsResult<Self> {
        let version = reader.read_i32::<LittleEndian>()?;
        match version {
            0 => {
                let count = read_size(reader, "chromosome list")?;
                let mut chromosomes = Vec::with_capacity(count);
                for _ in 0..count {
                    let name = read_string(reader)?;
                    let length = reader.read_u32::<LittleEndian>()?;
                    chromosomes.push(Chromosome { name, length });
                }
                Self::new(chromosomes)
            }
            _ => Err(MgsError::UnsupportedVersion {
                structure: "chromosome list",
                version,
            }),
        }
    }
}

/// One VCF file of a project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcfInput {
    pub path: PathBuf,
    /// Read through its tabix index, one project chromosome at a time
    pub indexed: bool,
    /// Sample columns of the file header
    pub genomes: Vec<String>,
}

/// Chromosomes and VCF inputs of a multi-genome project
#[derive(Debug, Clone, Default)]
pub struct MultiGenomeProject {
    chromosomes: ChromosomeList,
    inputs: Vec<VcfInput>,
}

impl MultiGenomeProject {
    pub fn new(chromosomes: ChromosomeList) -> Self {
        Self {
            chromosomes,
            inputs: Vec::new(),
        }
    }

    /// Registers a VCF file and the genomes its header declares.
    pub fn add_vcf<P: AsRef<Path>>(&mut self, path: P, indexed: bool) -> MgsResult<()> {
        let path = path.as_ref();
        validate_file_readable(path)?;
        if self.inputs.iter().any(|input| input.path.as_path() == path) {
            return Err(MgsError::InvalidConfig(format!(
                "VCF file {} added twice",
                path.display()
            )));
        }

        let source = FileLineSource::open(path)?;
        let genomes = source.header().genomes().to_vec();
        if genomes.is_empty() {
            log::warn!("{} has no genotype columns", path.display());
        }
        log::info!("Added {} with {} genomes", path.display(), genomes.len());
        self.inputs.push(VcfInput {
            path: path.to_path_buf(),
            indexed,
            genomes,
        });
        Ok(())
    }

    pub fn chromosomes(&self) -> &ChromosomeList {
        &self.chromosomes
    }

    pub fn inputs(&self) -> &[VcfInput] {
        &self.inputs
    }

    /// Genome names in order of first appearance
    pub fn genomes(&self) -> Vec<&str> {
        let mut genomes: Vec<&str> = Vec::new();
        for name in self.inputs.iter().flat_map(|input| input.genomes.iter()) {
            if !genomes.contains(&name.as_str()) {
                genomes.push(name.as_str());
            }
        }
        genomes
    }

    /// Files declaring `genome`, in registration order
    pub fn files_of(&self, genome: &str) -> Vec<&Path> {
        self.inputs
            .iter()
            .filter(|input| input.genomes.iter().any(|name| name == genome))
            .map(|input| input.path.as_path())
            .collect()
    }

    /// Scans every input and builds the meta-genome.
    pub fn synchronize(
        &self,
        config: SyncConfig,
        cancellation: CancellationFlag,
    ) -> MgsResult<(MetaGenome, ScanReport)> {
        if self.inputs.is_empty() {
            return Err(MgsError::InvalidConfig("project has no VCF file".to_string()));
        }

        let mut builder =
            MetaGenomeBuilder::new(self.chromosomes.clone(), config)?.with_cancellation(cancellation);
        let mut report = ScanReport::default();
        for input in &self.inputs {
            let scanned = if input.indexed {
                builder.add_indexed_vcf(&input.path)?
            } else {
                builder.add_vcf(&input.path)?
            };
            report.merge(scanned);
        }
        Ok((builder.finish()?, report))
    }
}

pub(crate) fn write_string<W: Write>(writer: &mut W, value: &str) -> MgsResult<()> {
    writer.write_i32::<LittleEndian>(value.len() as i32)?;
    writer.write_all(value.as_bytes())?;
    Ok(())
}

pub(crate) fn read_string<R: Read>(reader: &mut R) -> MgsResult<String> {
    let size = read_size(reader, "string")?;
    let mut bytes = vec![0; size];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| {
        MgsError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_from_sizes_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "# genome build").unwrap();
        writeln!(temp_file, "chr1\t248956422").unwrap();
        writeln!(temp_file, "chr2\t242193529\t112\t60\t61").unwrap();

        let chromosomes = ChromosomeList::from_sizes_file(temp_file.path()).unwrap();
        assert_eq!(chromosomes.len(), 2);
        assert_eq!(chromosomes.index_of("chr2"), Some(1));
        assert_eq!(chromosomes.get(0), Some(&Chromosome::new("chr1", 248956422)));
        assert!(matches!(
            chromosomes.resolve("chrX"),
            Err(MgsError::UnknownChromosome(_))
        ));
    }

    #[test]
    fn test_from_sizes_file_invalid_length() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "chr1\tlong").unwrap();
        assert!(ChromosomeList::from_sizes_file(temp_file.path()).is_err());
    }

    #[test]
    fn test_duplicate_chromosome() {
        let result = ChromosomeList::new(vec![Chromosome::new("chr1", 10), Chromosome::new("chr1", 20)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_from_vcf_header() {
        let header = VcfHeader::from_lines([
            "##contig=<ID=chr1,length=1000>",
            "##contig=<ID=chrM,length=16569>",
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO",
        ])
        .unwrap();
        let chromosomes = ChromosomeList::from_vcf_header(&header).unwrap();
        assert_eq!(chromosomes.len(), 2);
        assert_eq!(chromosomes.get(1).unwrap().length, 16569);

        let header = VcfHeader::from_lines(["#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO"]).unwrap();
        assert!(ChromosomeList::from_vcf_header(&header).is_err());
    }

    #[test]
    fn test_serialization() {
        let chromosomes = ChromosomeList::new(vec![Chromosome::new("chr1", 10), Chromosome::new("chr2", 20)]).unwrap();
        let mut buffer = Vec::new();
        chromosomes.write_to(&mut buffer).unwrap();
        let restored = ChromosomeList::read_from(&mut buffer.as_slice()).unwrap();
        assert_eq!(restored, chromosomes);
    }

    fn project_vcf(genomes: &str, body: &str) -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "##fileformat=VCFv4.2").unwrap();
        writeln!(temp_file, "##contig=<ID=chr1,length=1000>").unwrap();
        writeln!(temp_file, "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{}", genomes).unwrap();
        write!(temp_file, "{}", body).unwrap();
        temp_file
    }

    #[test]
    fn test_from_vcf() {
        let file = project_vcf("A", "");
        let chromosomes = ChromosomeList::from_vcf(file.path()).unwrap();
        assert_eq!(chromosomes.get(0), Some(&Chromosome::new("chr1", 1000)));
    }

    #[test]
    fn test_project_genomes() {
        let first = project_vcf("A\tB", "");
        let second = project_vcf("C\tA", "");
        let mut project = MultiGenomeProject::new(ChromosomeList::from_vcf(first.path()).unwrap());
        project.add_vcf(first.path(), false).unwrap();
        project.add_vcf(second.path(), false).unwrap();
        assert!(project.add_vcf(first.path(), false).is_err());
        assert!(project.add_vcf("/nonexistent/file.vcf", false).is_err());

        assert_eq!(project.genomes(), vec!["A", "B", "C"]);
        assert_eq!(project.files_of("A"), vec![first.path(), second.path()]);
        assert_eq!(project.files_of("C"), vec![second.path()]);
        assert!(project.files_of("D").is_empty());
    }

    #[test]
    fn test_project_synchronize() {
        let first = project_vcf("A", "chr1\t100\t.\tA\tAT\t.\tPASS\t.\tGT\t0|1\n");
        let second = project_vcf("B", "chr1\t100\t.\tAC\tA\t.\tPASS\t.\tGT\t1|1\nchr1\tbad\n");
        let mut project = MultiGenomeProject::new(ChromosomeList::from_vcf(first.path()).unwrap());
        assert!(project
            .synchronize(SyncConfig::default(), CancellationFlag::new())
            .is_err());
        project.add_vcf(first.path(), false).unwrap();
        project.add_vcf(second.path(), false).unwrap();

        let (meta, report) = project
            .synchronize(SyncConfig::default(), CancellationFlag::new())
            .unwrap();
        assert_eq!(report.forwarded, 2);
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(meta.meta_chromosome_length("chr1").unwrap(), 1001);
        assert_eq!(meta.genome_to_meta("B", crate::AlleleType::Paternal, "chr1", 101).unwrap(), 103);
    }
}
