use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use env_logger::Builder;
use human_bytes::human_bytes;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, LevelFilter};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::PathBuf;
use sysinfo::{System, SystemExt};

use introscan::parse::{
    build_windows, parse_ancestral_alleles, parse_ploidy, parse_population_csv,
    parse_positive_int, parse_region, parse_unit_interval, read_genotype_dataset,
};
use introscan::process::{display_window_results, FeatureEmitter, ResultWriter, StatSpec};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input VCF file (.vcf or .vcf.gz)
    #[arg(long = "vcf")]
    vcf: PathBuf,

    /// Chromosome to scan
    #[arg(long = "chr")]
    chr: String,

    /// Population panel CSV: one row per population, `name,sample1,sample2,...`
    #[arg(long = "populations")]
    populations: PathBuf,

    /// Reference (unadmixed) population name
    #[arg(long = "ref")]
    ref_pop: String,

    /// Target (recipient) population name
    #[arg(long = "tgt")]
    tgt_pop: String,

    /// Ordered source (donor) population names, comma-separated
    #[arg(long = "src", value_delimiter = ',', required = true)]
    src_pops: Vec<String>,

    /// Statistic to compute: UXX, QXX, fd, or df (e.g. U50, Q95)
    #[arg(long = "stat")]
    stat: String,

    /// Reference-frequency upper bound for U/Q
    #[arg(long = "w", default_value = "0.01", value_parser = parse_unit_interval)]
    w: f64,

    /// Expected source frequencies for U/Q, comma-separated, one per source
    #[arg(long = "y", value_delimiter = ',', value_parser = parse_unit_interval)]
    y: Vec<f64>,

    /// Ancestral-allele file (`chrom pos allele`); enables derived-allele
    /// polarization
    #[arg(long = "anc-alleles")]
    anc_alleles: Option<PathBuf>,

    /// Ploidy of the genome
    #[arg(long = "ploidy", default_value = "2", value_parser = parse_ploidy)]
    ploidy: u32,

    /// Window length in bp
    #[arg(long = "win-len", default_value = "40000", value_parser = parse_positive_int)]
    win_len: i64,

    /// Window step in bp
    #[arg(long = "win-step", default_value = "40000", value_parser = parse_positive_int)]
    win_step: i64,

    /// Region to scan (start-end); defaults to the observed coordinate span
    #[arg(long = "region")]
    region: Option<String>,

    /// Output file (tab-separated, one line per window)
    #[arg(long = "output")]
    output: PathBuf,

    /// Worker threads for window scoring
    #[arg(long = "threads", default_value_t = num_cpus::get())]
    threads: usize,
}

fn main() -> Result<()> {
    Builder::new().filter_level(LevelFilter::Info).init();
    let args = Args::parse();

    println!("{}", "Starting adaptive-introgression scan...".green());

    let mut sys = System::new_all();
    sys.refresh_all();
    info!(
        "Total system memory: {}",
        human_bytes(sys.total_memory() as f64)
    );

    let spec = StatSpec::parse(&args.stat)?;
    info!(
        "Statistic: {} (threshold: {})",
        spec.code,
        spec.threshold()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string())
    );

    rayon::ThreadPoolBuilder::new()
        .num_threads(args.threads)
        .build_global()
        .context("Failed to build the worker thread pool")?;

    let panel = parse_population_csv(&args.populations)
        .with_context(|| format!("Failed to parse population panel {}", args.populations.display()))?;

    let mut needed: HashMap<String, Vec<String>> = HashMap::new();
    for pop in [&args.ref_pop, &args.tgt_pop]
        .into_iter()
        .chain(args.src_pops.iter())
    {
        match panel.get(pop) {
            Some(samples) => {
                needed.insert(pop.clone(), samples.clone());
            }
            None => bail!(
                "Population '{}' not found in the panel file {}",
                pop,
                args.populations.display()
            ),
        }
    }

    let anc_calls = match &args.anc_alleles {
        Some(path) => Some(
            parse_ancestral_alleles(path, &args.chr)
                .with_context(|| format!("Failed to parse ancestral alleles {}", path.display()))?,
        ),
        None => None,
    };
    let anc_allele_available = anc_calls.is_some();

    info!("Reading genotypes from {}", args.vcf.display());
    let dataset = read_genotype_dataset(
        &args.vcf,
        &args.chr,
        &needed,
        args.ploidy,
        anc_calls.as_ref(),
    )
    .with_context(|| format!("Failed to read VCF {}", args.vcf.display()))?;

    let (region_start, region_end) = match &args.region {
        Some(region) => parse_region(region)?,
        None => match (dataset.positions.first(), dataset.positions.last()) {
            (Some(&first), Some(&last)) => (first, last + 1),
            _ => bail!("No biallelic SNPs found on chromosome {}", args.chr),
        },
    };

    let windows = build_windows(region_start, region_end, args.win_len, args.win_step);
    info!(
        "Scoring {} window(s) over {}:{}-{} with {} thread(s)",
        windows.len(),
        dataset.chr_name,
        region_start,
        region_end,
        args.threads
    );

    let emitter = FeatureEmitter::new(
        spec,
        args.w,
        args.y.clone(),
        args.ref_pop.clone(),
        args.tgt_pop.clone(),
        args.src_pops.clone(),
        anc_allele_available,
    )?;

    let progress_bar = ProgressBar::new(windows.len() as u64);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .expect("Failed to set progress bar template")
            .progress_chars("##-"),
    );
    progress_bar.set_message("Scoring windows");

    // Windows are scored in parallel; collection preserves submission order
    // so the sink sees one record per window, in window order.
    let results: Vec<_> = windows
        .par_iter()
        .map(|&(start, end)| {
            let window = dataset.window(start, end, &args.ref_pop, &args.tgt_pop, &args.src_pops);
            let result = emitter.run(&window);
            progress_bar.inc(1);
            result
        })
        .collect();
    progress_bar.finish_with_message("Window scoring complete");

    let mut writer = ResultWriter::create(&args.output)
        .with_context(|| format!("Failed to create output file {}", args.output.display()))?;
    for result in &results {
        writer.write(result)?;
    }
    writer.flush()?;

    display_window_results(&results, 10);

    println!(
        "{}",
        format!(
            "Done. {} window result(s) written to {}",
            results.len(),
            args.output.display()
        )
        .green()
    );
    Ok(())
}
