use crate::stats::{calc_df, calc_fd, calc_q, calc_u, site_frequencies};

use colored::Colorize;
use itertools::Itertools;
use ndarray::Array2;
use once_cell::sync::Lazy;
use prettytable::{row, Table};
use regex::Regex;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use thiserror::Error;

// Custom error types
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Invalid region: {0}")]
    InvalidRegion(String),
    #[error(
        "Invalid statistic specification: '{0}'. Accepted shapes: 'UXX', 'QXX', 'fd', or 'df'."
    )]
    InvalidSpecification(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

static STAT_CODE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([UQ])(\d{2})$").expect("statistic code regex is valid"));

/// The closed set of supported window statistics. U and Q carry the
/// fractional threshold parsed from the two digits of their code (the
/// target-frequency lower bound for U, the quantile for Q); fd and df carry
/// no threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatKind {
    U(f64),
    Q(f64),
    Fd,
    Df,
}

/// A parsed statistic specification, fixed once per run and reused for
/// every window.
#[derive(Debug, Clone, PartialEq)]
pub struct StatSpec {
    pub code: String,
    pub kind: StatKind,
}

impl StatSpec {
    /// Parses a compact statistic code. Exactly four shapes are recognized,
    /// case-sensitively: `U` or `Q` followed by exactly two digits, or the
    /// literals `fd` and `df`. The digits are read literally as a numerator
    /// out of 100, so `U50` -> 0.50 and `U05` -> 0.05; no renormalization
    /// is applied.
    pub fn parse(code: &str) -> Result<Self, ScanError> {
        if let Some(caps) = STAT_CODE_RE.captures(code) {
            let digits: u32 = caps[2]
                .parse()
                .map_err(|_| ScanError::InvalidSpecification(code.to_string()))?;
            let threshold = digits as f64 / 100.0;
            let kind = match &caps[1] {
                "U" => StatKind::U(threshold),
                _ => StatKind::Q(threshold),
            };
            return Ok(StatSpec {
                code: code.to_string(),
                kind,
            });
        }

        match code {
            "fd" => Ok(StatSpec {
                code: code.to_string(),
                kind: StatKind::Fd,
            }),
            "df" => Ok(StatSpec {
                code: code.to_string(),
                kind: StatKind::Df,
            }),
            _ => Err(ScanError::InvalidSpecification(code.to_string())),
        }
    }

    /// The fractional threshold for U/Q codes; `None` for fd/df.
    pub fn threshold(&self) -> Option<f64> {
        match self.kind {
            StatKind::U(t) | StatKind::Q(t) => Some(t),
            StatKind::Fd | StatKind::Df => None,
        }
    }
}

/// One genomic window of genotype data, as handed over by the windowing
/// collaborator. All matrices share the position vector 1:1 (one row per
/// site). Absent matrices or ploidy mark a window whose statistic is not
/// computable; the emitter turns those into NaN rather than an error.
#[derive(Debug, Clone)]
pub struct GenotypeWindow {
    pub chr_name: String,
    pub start: i64,
    pub end: i64,
    pub positions: Vec<i64>,
    pub ref_gts: Option<Array2<i16>>,
    pub tgt_gts: Option<Array2<i16>>,
    pub src_gts_list: Option<Vec<Array2<i16>>>,
    pub ploidy: Option<u32>,
    /// Per-site orientation flags from the ancestral-allele collaborator:
    /// `true` means the encoded ALT allele is ancestral at that site.
    pub anc_flip: Option<Vec<bool>>,
}

/// The scored record for one window, written once to the sink and discarded.
#[derive(Debug, Clone)]
pub struct WindowResult {
    pub chr_name: String,
    pub start: i64,
    pub end: i64,
    pub ref_pop: String,
    pub tgt_pop: String,
    pub src_pop_list: Vec<String>,
    pub nsnps: usize,
    pub statistic: f64,
    pub candidates: Vec<i64>,
}

impl WindowResult {
    fn statistic_field(&self) -> String {
        if self.statistic.is_nan() {
            "nan".to_string()
        } else {
            format!("{}", self.statistic)
        }
    }

    fn candidates_field(&self) -> String {
        if self.candidates.is_empty() {
            "NA".to_string()
        } else {
            self.candidates
                .iter()
                .map(|pos| format!("{}:{}", self.chr_name, pos))
                .join(",")
        }
    }
}

/// Selects and drives the statistic calculator for each window, assembling
/// one `WindowResult` per invocation. Holds only immutable run-level
/// configuration; scoring two identical windows yields bit-identical
/// results.
#[derive(Debug, Clone)]
pub struct FeatureEmitter {
    spec: StatSpec,
    w: f64,
    y_list: Vec<f64>,
    ref_pop: String,
    tgt_pop: String,
    src_pop_list: Vec<String>,
    anc_allele_available: bool,
}

impl FeatureEmitter {
    /// Builds the emitter. The expected-frequency list `y_list` pairs with
    /// `src_pop_list` strictly by order; a length mismatch is a
    /// configuration error and fails here, never per window.
    pub fn new(
        spec: StatSpec,
        w: f64,
        y_list: Vec<f64>,
        ref_pop: String,
        tgt_pop: String,
        src_pop_list: Vec<String>,
        anc_allele_available: bool,
    ) -> Result<Self, ScanError> {
        if matches!(spec.kind, StatKind::U(_) | StatKind::Q(_)) && y_list.len() != src_pop_list.len()
        {
            return Err(ScanError::Config(format!(
                "got {} expected source frequencies for {} source population(s); \
                 --y must pair 1:1 with the source list",
                y_list.len(),
                src_pop_list.len()
            )));
        }
        if src_pop_list.is_empty() {
            return Err(ScanError::Config(
                "at least one source population is required".to_string(),
            ));
        }
        Ok(FeatureEmitter {
            spec,
            w,
            y_list,
            ref_pop,
            tgt_pop,
            src_pop_list,
            anc_allele_available,
        })
    }

    pub fn spec(&self) -> &StatSpec {
        &self.spec
    }

    pub fn anc_allele_available(&self) -> bool {
        self.anc_allele_available
    }

    /// Scores one window. Missing genotype data or ploidy short-circuits to
    /// a NaN statistic with no candidates, without touching any calculator;
    /// the output record is indistinguishable in shape from a calculator
    /// returning NaN on degenerate data.
    pub fn run(&self, window: &GenotypeWindow) -> WindowResult {
        let mut result = WindowResult {
            chr_name: window.chr_name.clone(),
            start: window.start,
            end: window.end,
            ref_pop: self.ref_pop.clone(),
            tgt_pop: self.tgt_pop.clone(),
            src_pop_list: self.src_pop_list.clone(),
            nsnps: window.positions.len(),
            statistic: f64::NAN,
            candidates: Vec::new(),
        };

        let (ref_gts, tgt_gts, src_gts_list, ploidy) = match (
            &window.ref_gts,
            &window.tgt_gts,
            &window.src_gts_list,
            window.ploidy,
        ) {
            (Some(r), Some(t), Some(s), Some(p)) if !s.is_empty() => (r, t, s, p),
            _ => return result,
        };

        // Orientation flags are only consulted when the run declared
        // ancestral-allele information available.
        let flip = if self.anc_allele_available {
            window.anc_flip.as_deref()
        } else {
            None
        };

        let ref_freq = site_frequencies(ref_gts.view(), ploidy, flip);
        let tgt_freq = site_frequencies(tgt_gts.view(), ploidy, flip);
        let src_freqs: Vec<_> = src_gts_list
            .iter()
            .map(|gts| site_frequencies(gts.view(), ploidy, flip))
            .collect();

        match self.spec.kind {
            StatKind::U(x) => {
                let (statistic, candidates) = calc_u(
                    &ref_freq,
                    &tgt_freq,
                    &src_freqs,
                    &window.positions,
                    self.w,
                    x,
                    &self.y_list,
                );
                result.statistic = statistic;
                result.candidates = candidates;
            }
            StatKind::Q(quantile) => {
                let (statistic, candidates) = calc_q(
                    &ref_freq,
                    &tgt_freq,
                    &src_freqs,
                    &window.positions,
                    self.w,
                    &self.y_list,
                    quantile,
                );
                result.statistic = statistic;
                result.candidates = candidates;
            }
            StatKind::Fd => {
                result.statistic = calc_fd(&ref_freq, &tgt_freq, &src_freqs[0]);
            }
            StatKind::Df => {
                result.statistic = calc_df(&ref_freq, &tgt_freq, &src_freqs[0]);
            }
        }

        result
    }
}

/// Tab-separated sink for window results, one record per window:
/// chrom, start, end, ref_pop, tgt_pop, comma-joined sources, nsnps,
/// statistic, candidates (comma-joined chrom:pos pairs, or `NA`).
pub struct ResultWriter {
    inner: csv::Writer<File>,
}

impl ResultWriter {
    pub fn create(path: &Path) -> Result<Self, ScanError> {
        let inner = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .from_path(path)?;
        Ok(ResultWriter { inner })
    }

    pub fn write(&mut self, result: &WindowResult) -> Result<(), ScanError> {
        self.inner.write_record(&[
            result.chr_name.clone(),
            result.start.to_string(),
            result.end.to_string(),
            result.ref_pop.clone(),
            result.tgt_pop.clone(),
            result.src_pop_list.join(","),
            result.nsnps.to_string(),
            result.statistic_field(),
            result.candidates_field(),
        ])?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ScanError> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Prints the first `limit` window results as a table, for a quick look at
/// the run before opening the output file.
pub fn display_window_results(results: &[WindowResult], limit: usize) {
    let mut output = Vec::new();
    let mut table = Table::new();

    table.add_row(row![
        "Chromosome",
        "Start",
        "End",
        "Ref",
        "Target",
        "Sources",
        "Sites",
        "Statistic",
        "Candidates"
    ]);

    for result in results.iter().take(limit) {
        table.add_row(row![
            result.chr_name,
            result.start,
            result.end,
            result.ref_pop,
            result.tgt_pop,
            result.src_pop_list.join(","),
            result.nsnps,
            result.statistic_field(),
            result.candidates.len()
        ]);
    }

    table
        .print(&mut output)
        .expect("Failed to print table to buffer");
    let table_string = String::from_utf8(output).expect("Failed to convert table to string");

    print!(
        "\n{}\n{}",
        "Sample window results:".green().bold(),
        table_string
    );
    if results.len() > limit {
        println!("... and {} more windows.", results.len() - limit);
    }
    std::io::stdout().flush().expect("Failed to flush stdout");
}
