use crate::process::{GenotypeWindow, ScanError};
use crate::stats::MISSING_DOSAGE;

use colored::Colorize;
use flate2::read::MultiGzDecoder;
use log::{info, warn};
use ndarray::{s, Array2};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

// clap value parsers, mirroring the external validation layer that
// constrains thresholds before they reach the statistics core.

/// Validates a float in [0,1] inclusive.
pub fn parse_unit_interval(value: &str) -> Result<f64, String> {
    let parsed: f64 = value
        .parse()
        .map_err(|_| format!("{} is not a valid number", value))?;
    if !(0.0..=1.0).contains(&parsed) {
        return Err(format!("{} is not between 0 and 1 (inclusive)", value));
    }
    Ok(parsed)
}

/// Validates a positive integer.
pub fn parse_positive_int(value: &str) -> Result<i64, String> {
    let parsed: i64 = value
        .parse()
        .map_err(|_| format!("{} is not a valid integer", value))?;
    if parsed <= 0 {
        return Err(format!("{} is not a positive integer", value));
    }
    Ok(parsed)
}

/// Validates a ploidy value. Dosage entries are i16, so a per-individual
/// allele count must fit one without truncation.
pub fn parse_ploidy(value: &str) -> Result<u32, String> {
    let parsed = parse_positive_int(value)?;
    if parsed > i16::MAX as i64 {
        return Err(format!("ploidy {} is out of range (max {})", parsed, i16::MAX));
    }
    Ok(parsed as u32)
}

/// Parses a user region string of the form `start-end`. The coordinates are
/// used verbatim as the window-tiling range `[start, end)`.
pub fn parse_region(region: &str) -> Result<(i64, i64), ScanError> {
    let parts: Vec<&str> = region.split('-').collect();
    if parts.len() != 2 {
        return Err(ScanError::InvalidRegion(
            "Invalid region format. Use start-end".to_string(),
        ));
    }
    let start: i64 = parts[0]
        .parse()
        .map_err(|_| ScanError::InvalidRegion("Invalid start position".to_string()))?;
    let end: i64 = parts[1]
        .parse()
        .map_err(|_| ScanError::InvalidRegion("Invalid end position".to_string()))?;
    if start >= end {
        return Err(ScanError::InvalidRegion(
            "Start position must be less than end position".to_string(),
        ));
    }
    Ok((start, end))
}

/// Parses the population panel CSV. One row per population: the first field
/// is the population name, the remaining fields are its sample IDs.
pub fn parse_population_csv(path: &Path) -> Result<HashMap<String, Vec<String>>, ScanError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut populations: HashMap<String, Vec<String>> = HashMap::new();
    for (line_num, record) in reader.records().enumerate() {
        let record = record?;
        if record.is_empty() {
            continue;
        }
        let pop_name = record
            .get(0)
            .ok_or_else(|| ScanError::Parse(format!("Missing population name on line {}", line_num + 1)))?
            .trim()
            .to_string();
        let samples: Vec<String> = record
            .iter()
            .skip(1)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if samples.is_empty() {
            return Err(ScanError::Parse(format!(
                "Population '{}' on line {} has no samples",
                pop_name,
                line_num + 1
            )));
        }
        populations.entry(pop_name).or_default().extend(samples);
    }

    if populations.is_empty() {
        return Err(ScanError::Parse(
            "No populations found in the panel file".to_string(),
        ));
    }
    Ok(populations)
}

/// Parses the ancestral-allele file (`chrom\tpos\tallele`, one site per
/// line) and returns the calls for the requested chromosome.
pub fn parse_ancestral_alleles(path: &Path, chr: &str) -> Result<HashMap<i64, String>, ScanError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut calls = HashMap::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            eprintln!(
                "{}",
                format!("Skipping invalid ancestral-allele line {}: '{}'", line_num + 1, line).red()
            );
            continue;
        }
        if fields[0].trim_start_matches("chr") != chr.trim_start_matches("chr") {
            continue;
        }
        let pos: i64 = match fields[1].parse() {
            Ok(val) => val,
            Err(_) => {
                eprintln!(
                    "{}",
                    format!("Invalid position on ancestral-allele line {}: '{}'", line_num + 1, fields[1]).red()
                );
                continue;
            }
        };
        calls.insert(pos, fields[2].to_ascii_uppercase());
    }

    Ok(calls)
}

/// Opens a VCF file, transparently decompressing `.gz` inputs.
pub fn open_genotype_reader(path: &Path) -> Result<Box<dyn BufRead + Send>, ScanError> {
    let file = File::open(path)?;

    if path.extension().and_then(|s| s.to_str()) == Some("gz") {
        let decoder = MultiGzDecoder::new(file);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Validates the VCF #CHROM header line.
pub fn validate_vcf_header(header: &str) -> Result<(), ScanError> {
    let fields: Vec<&str> = header.split('\t').collect();
    let required_fields = [
        "#CHROM", "POS", "ID", "REF", "ALT", "QUAL", "FILTER", "INFO", "FORMAT",
    ];

    if fields.len() < required_fields.len() || fields[..required_fields.len()] != required_fields {
        return Err(ScanError::Parse("Invalid VCF header format".to_string()));
    }
    Ok(())
}

/// Genotype dosage matrices for one chromosome, one matrix per population,
/// all sharing the position vector row-for-row.
#[derive(Debug, Clone)]
pub struct GenotypeDataset {
    pub chr_name: String,
    pub positions: Vec<i64>,
    pub matrices: HashMap<String, Array2<i16>>,
    pub ploidy: u32,
    pub anc_flip: Option<Vec<bool>>,
}

impl GenotypeDataset {
    /// Cuts one genomic window `[start, end)` out of the dataset. Positions
    /// are sorted, so the window is a contiguous row range. A population
    /// absent from the dataset yields an absent matrix, which the emitter
    /// turns into a NaN statistic.
    pub fn window(
        &self,
        start: i64,
        end: i64,
        ref_pop: &str,
        tgt_pop: &str,
        src_pops: &[String],
    ) -> GenotypeWindow {
        let lo = self.positions.partition_point(|&p| p < start);
        let hi = self.positions.partition_point(|&p| p < end);

        let slice_rows = |pop: &str| -> Option<Array2<i16>> {
            self.matrices
                .get(pop)
                .map(|m| m.slice(s![lo..hi, ..]).to_owned())
        };

        let src_gts_list: Option<Vec<Array2<i16>>> =
            src_pops.iter().map(|pop| slice_rows(pop)).collect();

        GenotypeWindow {
            chr_name: self.chr_name.clone(),
            start,
            end,
            positions: self.positions[lo..hi].to_vec(),
            ref_gts: slice_rows(ref_pop),
            tgt_gts: slice_rows(tgt_pop),
            src_gts_list,
            ploidy: Some(self.ploidy),
            anc_flip: self
                .anc_flip
                .as_ref()
                .map(|flags| flags[lo..hi].to_vec()),
        }
    }
}

/// Reads one chromosome of a VCF into per-population dosage matrices.
///
/// Only biallelic SNPs are kept. Each sample's GT field becomes a single
/// dosage entry (count of ALT alleles, `MISSING_DOSAGE` when any allele is
/// missing or malformed). When ancestral calls are supplied, a site whose
/// ancestral allele equals ALT is flagged for orientation flipping, and a
/// site whose ancestral call matches neither REF nor ALT is dropped.
pub fn read_genotype_dataset(
    path: &Path,
    chr: &str,
    populations: &HashMap<String, Vec<String>>,
    ploidy: u32,
    anc_calls: Option<&HashMap<i64, String>>,
) -> Result<GenotypeDataset, ScanError> {
    let reader = open_genotype_reader(path)?;

    let mut pop_columns: HashMap<String, Vec<usize>> = HashMap::new();
    let mut positions: Vec<i64> = Vec::new();
    let mut pop_rows: HashMap<String, Vec<i16>> = HashMap::new();
    let mut anc_flip: Vec<bool> = Vec::new();

    let mut skipped_non_snp = 0usize;
    let mut skipped_no_ancestral = 0usize;
    let mut skipped_duplicates = 0usize;
    let mut malformed_genotypes = 0usize;

    for line_result in reader.lines() {
        let line = line_result?;
        if line.starts_with("##") {
            continue;
        }
        if line.starts_with("#CHROM") {
            validate_vcf_header(&line)?;
            let sample_names: Vec<&str> = line.split('\t').skip(9).collect();
            let index_of: HashMap<&str, usize> = sample_names
                .iter()
                .enumerate()
                .map(|(i, &name)| (name, i + 9))
                .collect();
            for (pop, samples) in populations {
                let mut columns = Vec::with_capacity(samples.len());
                for sample in samples {
                    match index_of.get(sample.as_str()) {
                        Some(&col) => columns.push(col),
                        None => {
                            return Err(ScanError::Parse(format!(
                                "Sample '{}' (population '{}') not found in the VCF header",
                                sample, pop
                            )))
                        }
                    }
                }
                pop_columns.insert(pop.clone(), columns);
                pop_rows.insert(pop.clone(), Vec::new());
            }
            continue;
        }

        if pop_columns.is_empty() {
            return Err(ScanError::Parse(
                "VCF data line encountered before the #CHROM header".to_string(),
            ));
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 10 {
            continue;
        }
        if fields[0].trim_start_matches("chr") != chr.trim_start_matches("chr") {
            continue;
        }

        let pos: i64 = fields[1]
            .parse()
            .map_err(|_| ScanError::Parse(format!("Invalid position at line: {}", line)))?;

        // Biallelic SNPs only.
        let (ref_allele, alt_allele) = (fields[3], fields[4]);
        if ref_allele.len() != 1 || alt_allele.len() != 1 || alt_allele == "." {
            skipped_non_snp += 1;
            continue;
        }

        let flip = match anc_calls {
            Some(calls) => match calls.get(&pos) {
                Some(anc) if anc.as_str() == ref_allele => false,
                Some(anc) if anc.as_str() == alt_allele => true,
                _ => {
                    skipped_no_ancestral += 1;
                    continue;
                }
            },
            None => false,
        };

        if positions.last() == Some(&pos) {
            skipped_duplicates += 1;
            continue;
        }
        if positions.last().map_or(false, |&last| pos < last) {
            return Err(ScanError::Parse(format!(
                "VCF is not sorted by position on chromosome {}: {} after {}",
                chr,
                pos,
                positions.last().unwrap()
            )));
        }

        for (pop, columns) in &pop_columns {
            let rows = pop_rows.get_mut(pop).expect("population rows initialized with columns");
            for &col in columns {
                let dosage = fields
                    .get(col)
                    .map(|field| parse_gt_dosage(field, ploidy))
                    .unwrap_or(MISSING_DOSAGE);
                if dosage == MISSING_DOSAGE {
                    malformed_genotypes += 1;
                }
                rows.push(dosage);
            }
        }
        positions.push(pos);
        if anc_calls.is_some() {
            anc_flip.push(flip);
        }
    }

    if pop_columns.is_empty() {
        return Err(ScanError::Parse(
            "No #CHROM header found in the VCF".to_string(),
        ));
    }

    let n_sites = positions.len();
    let mut matrices = HashMap::new();
    for (pop, rows) in pop_rows {
        let n_samples = pop_columns[&pop].len();
        let matrix = Array2::from_shape_vec((n_sites, n_samples), rows)
            .map_err(|e| ScanError::Parse(format!("Genotype matrix shape error: {}", e)))?;
        matrices.insert(pop, matrix);
    }

    info!(
        "Chromosome {}: {} biallelic SNPs retained ({} non-SNP records skipped, {} without usable ancestral calls, {} duplicate positions)",
        chr, n_sites, skipped_non_snp, skipped_no_ancestral, skipped_duplicates
    );
    if malformed_genotypes > 0 {
        warn!(
            "{} genotype entries were missing or malformed and treated as missing data",
            malformed_genotypes
        );
    }

    Ok(GenotypeDataset {
        chr_name: chr.trim_start_matches("chr").to_string(),
        positions,
        matrices,
        ploidy,
        anc_flip: anc_calls.map(|_| anc_flip),
    })
}

/// Converts one VCF sample field into a derived-allele dosage. The GT
/// subfield is everything before the first ':'; alleles split on '|' or '/'.
/// Any missing ('.'), non-biallelic, or ploidy-inconsistent call maps to
/// `MISSING_DOSAGE`.
fn parse_gt_dosage(field: &str, ploidy: u32) -> i16 {
    let gt = field.split(':').next().unwrap_or("");
    let alleles: Vec<&str> = gt.split(|c| c == '|' || c == '/').collect();
    if alleles.len() != ploidy as usize {
        return MISSING_DOSAGE;
    }

    let mut dosage: i16 = 0;
    for allele in alleles {
        match allele {
            "0" => {}
            "1" => dosage += 1,
            _ => return MISSING_DOSAGE,
        }
    }
    dosage
}

/// Builds half-open windows `[start, start + len)` advancing by `step`
/// across the region `[region_start, region_end)`.
pub fn build_windows(region_start: i64, region_end: i64, win_len: i64, win_step: i64) -> Vec<(i64, i64)> {
    let mut windows = Vec::new();
    let mut start = region_start;
    while start < region_end {
        windows.push((start, start + win_len));
        start += win_step;
    }
    windows
}
