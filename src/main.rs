use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use rand::rngs::StdRng;
use rand::SeedableRng;

use manorm::classify::classify_by_overlap;
use manorm::io::{self, RunSummary};
use manorm::merge::merge_common_peaks;
use manorm::model::fit_ma_model;
use manorm::normalize::normalize_collection;
use manorm::peaks::collection_size;
use manorm::randomize::randomize_peaks;
use manorm::reads::compute_read_density;
use manorm::utils::mean_std;

pub fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .usage(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .header(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
        )
        .literal(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .invalid(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .error(
            anstyle::Style::new()
                .bold()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
        )
        .valid(
            anstyle::Style::new()
                .bold()
                .underline()
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
        )
        .placeholder(
            anstyle::Style::new().fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::White))),
        )
}

#[derive(Parser, Clone)]
struct InputOptions {
    /// Numerator peak file: chrom, start, end and an optional summit offset
    /// relative to start. `.xls` files are parsed as MACS peak tables
    #[arg(long = "p1")]
    peaks1: PathBuf,

    /// Denominator peak file
    #[arg(long = "p2")]
    peaks2: PathBuf,

    /// Numerator read file (BED: chrom, start, end and strand in column six)
    #[arg(long = "r1")]
    reads1: PathBuf,

    /// Denominator read file
    #[arg(long = "r2")]
    reads2: PathBuf,

    /// Shift applied to numerator read 5' ends
    #[arg(long = "s1", default_value = "100")]
    shift1: i64,

    /// Shift applied to denominator read 5' ends
    #[arg(long = "s2", default_value = "100")]
    shift2: i64,
}

#[derive(Parser, Clone)]
struct ModelOptions {
    /// Window extension around each summit for read counting.
    /// 1000 suits histone marks, 500 transcription factors or DNase
    #[arg(short, long, default_value = "1000")]
    extension: u64,

    /// Summit-to-summit distance cutoff for model fitting
    /// (default: extension / 2)
    #[arg(short = 'd', long)]
    summit_distance: Option<u64>,

    /// Drop merged peaks with summit distance 0 from the fit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    exclude_zero_gap_peaks: bool,

    /// Number of random-overlap rounds
    #[arg(short = 'n', long, default_value = "5")]
    random_rounds: u32,

    /// Seed for the random-overlap diagnostic
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Parser, Clone)]
struct FilterOptions {
    /// P-value cutoff for biased peaks
    #[arg(short = 'p', long, default_value = "0.01")]
    biased_pvalue: f64,

    /// |M| cutoff for biased peaks
    #[arg(short = 'm', long, default_value = "1.0")]
    biased_mvalue: f64,

    /// |M| cutoff for unbiased peaks
    #[arg(short = 'u', long, default_value = "1.0")]
    unbiased_mvalue: f64,

    /// Also write per-sample tables of unique and common peaks
    #[arg(long, action = clap::ArgAction::SetTrue)]
    split_output: bool,

    /// Restrict the biased/unbiased filters to the overlap-dependent peak
    /// sets instead of all peaks
    #[arg(long, action = clap::ArgAction::SetTrue)]
    overlap_dependent: bool,
}

#[derive(Parser)]
#[command(version, about = "Quantitative comparison of ChIP-seq peak sets", long_about = None, styles = get_styles())]
struct Cli {
    #[command(flatten)]
    inputs: InputOptions,

    #[command(flatten)]
    model: ModelOptions,

    #[command(flatten)]
    filters: FilterOptions,

    /// Output directory; created by the run and must not already exist
    #[arg(short, long)]
    output: PathBuf,

    /// Verbosity level
    #[arg(short, long, default_value = "2")]
    verbose: u8,
}

fn validate_input_file(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("input file does not exist: {}", path.display());
    }
    Ok(())
}

fn sample_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("sample")
        .replace(' ', "_")
}

fn main() -> Result<()> {
    colog::init();

    let cli = Cli::parse();
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    log::set_max_level(log_level);

    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let start = Instant::now();

    validate_input_file(&cli.inputs.peaks1)?;
    validate_input_file(&cli.inputs.peaks2)?;
    validate_input_file(&cli.inputs.reads1)?;
    validate_input_file(&cli.inputs.reads2)?;

    std::fs::create_dir(&cli.output).with_context(|| {
        format!(
            "cannot create output folder {} (does it already exist?)",
            cli.output.display()
        )
    })?;

    let peaks1_name = sample_name(&cli.inputs.peaks1);
    let peaks2_name = sample_name(&cli.inputs.peaks2);
    let reads1_name = sample_name(&cli.inputs.reads1);
    let reads2_name = sample_name(&cli.inputs.reads2);
    let comparison_name = sample_name(&cli.output);

    let extension = cli.model.extension;
    let max_summit_gap = cli.model.summit_distance.unwrap_or(extension / 2);
    info!(
        "comparing {} vs {} (extension {}, summit distance cutoff {})",
        peaks1_name, peaks2_name, extension, max_summit_gap
    );

    info!("reading peaks and reads");
    let pks1 = io::read_peaks(&cli.inputs.peaks1)?;
    let pks2 = io::read_peaks(&cli.inputs.peaks2)?;
    let reads1 = io::read_reads(&cli.inputs.reads1, cli.inputs.shift1)?;
    let reads2 = io::read_reads(&cli.inputs.reads2, cli.inputs.shift2)?;
    info!(
        "{}: {} peaks, {}: {} peaks",
        peaks1_name,
        collection_size(&pks1),
        peaks2_name,
        collection_size(&pks2)
    );
    info!(
        "{}: {} reads on {} chromosomes, {}: {} reads on {} chromosomes",
        reads1_name,
        reads1.n_reads(),
        reads1.n_chromosomes(),
        reads2_name,
        reads2.n_reads(),
        reads2.n_chromosomes()
    );

    info!("Step 1: classifying peaks by overlap");
    let mut classified = classify_by_overlap(&pks1, &pks2);
    let n_common_a = collection_size(&classified.common_a);
    info!(
        "{}: {} unique, {} common",
        peaks1_name,
        collection_size(&classified.unique_a),
        n_common_a
    );
    info!(
        "{}: {} unique, {} common",
        peaks2_name,
        collection_size(&classified.unique_b),
        collection_size(&classified.common_b)
    );
    if n_common_a + collection_size(&classified.common_b) == 0 {
        bail!("no common peaks between the two samples; nothing to normalize against");
    }

    info!(
        "Step 2: random overlap testing over {} rounds",
        cli.model.random_rounds
    );
    let mut rng = match cli.model.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let mut fold_changes = Vec::new();
    for _ in 0..cli.model.random_rounds {
        let randomized = randomize_peaks(&pks2, &mut rng);
        let random_common = collection_size(&classify_by_overlap(&pks1, &randomized).common_a);
        fold_changes.push(n_common_a as f64 / (random_common as f64 + 0.1));
    }
    let (fc_mean, fc_std) = mean_std(&fold_changes);
    info!(
        "fold change over random overlap: mean={:.6}, std={:.6}",
        fc_mean, fc_std
    );

    info!("Step 3: merging common peaks");
    let mut merged = merge_common_peaks(&classified.common_a, &classified.common_b);
    info!("{} merged common peaks", merged.len());

    info!("Step 4: computing read densities");
    compute_read_density(&mut classified.unique_a, &reads1, &reads2, extension);
    compute_read_density(&mut classified.common_a, &reads1, &reads2, extension);
    compute_read_density(&mut classified.unique_b, &reads1, &reads2, extension);
    compute_read_density(&mut classified.common_b, &reads1, &reads2, extension);
    compute_read_density(&mut merged.peaks, &reads1, &reads2, extension);

    info!("Step 5: fitting the MA model on merged common peaks");
    let fit = fit_ma_model(&merged, max_summit_gap, !cli.model.exclude_zero_gap_peaks)?;
    if fit.intercept >= 0.0 {
        info!(
            "model for normalization: M = {:.6} * A + {:.6}",
            fit.slope, fit.intercept
        );
    } else {
        info!(
            "model for normalization: M = {:.6} * A - {:.6}",
            fit.slope,
            fit.intercept.abs()
        );
    }

    info!("Step 6: normalizing all peaks");
    normalize_collection(&mut classified.unique_a, &fit);
    normalize_collection(&mut classified.common_a, &fit);
    normalize_collection(&mut classified.unique_b, &fit);
    normalize_collection(&mut classified.common_b, &fit);
    normalize_collection(&mut merged.peaks, &fit);

    info!("Step 7: writing output");
    if cli.filters.split_output {
        io::write_normalized_peaks(
            &classified.unique_a,
            &classified.common_a,
            &cli.output.join(format!("{peaks1_name}_MAvalues.xls")),
            &reads1_name,
            &reads2_name,
        )?;
        io::write_normalized_peaks(
            &classified.unique_b,
            &classified.common_b,
            &cli.output.join(format!("{peaks2_name}_MAvalues.xls")),
            &reads1_name,
            &reads2_name,
        )?;
    }
    io::write_all_peaks_table(
        &classified.unique_a,
        &merged.peaks,
        &classified.unique_b,
        &cli.output
            .join(format!("{comparison_name}_all_peak_MAvalues.xls")),
        &peaks1_name,
        &peaks2_name,
        &reads1_name,
        &reads2_name,
    )?;

    let wig_dir = cli.output.join("output_wig_files");
    let filter_dir = cli.output.join("output_filters");
    std::fs::create_dir(&wig_dir)?;
    std::fs::create_dir(&filter_dir)?;

    io::write_wig_tracks(
        &classified.unique_a,
        &classified.unique_b,
        &merged.peaks,
        &comparison_name,
        &wig_dir,
    )?;
    io::write_unbiased_peaks(
        &classified.unique_a,
        &classified.unique_b,
        &merged.peaks,
        cli.filters.unbiased_mvalue,
        cli.filters.overlap_dependent,
        &filter_dir,
    )?;
    io::write_biased_peaks(
        &classified.unique_a,
        &classified.unique_b,
        &merged.peaks,
        cli.filters.biased_mvalue,
        cli.filters.biased_pvalue,
        cli.filters.overlap_dependent,
        &filter_dir,
    )?;

    let summary = RunSummary {
        peaks_a_unique: collection_size(&classified.unique_a),
        peaks_a_common: n_common_a,
        peaks_b_unique: collection_size(&classified.unique_b),
        peaks_b_common: collection_size(&classified.common_b),
        merged_common_peaks: merged.len(),
        overlap_fold_change_mean: fc_mean,
        overlap_fold_change_std: fc_std,
        ma_fit: fit,
    };
    io::write_summary(&summary, &cli.output.join("summary.json"))?;

    info!(
        "Successfully wrote output ({:.2} s)",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
