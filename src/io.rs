use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use itertools::Itertools;
use log::info;
use serde::Serialize;

use crate::model::MaFit;
use crate::peaks::{combine, Peak, PeakCollection};
use crate::reads::ReadIndex;

/// Read a peak file: tab-separated chrom/start/end with an optional fourth
/// column holding the summit offset relative to start. Files ending in
/// `.xls` are treated as MACS peak tables, whose summit offset sits in
/// column five and whose header rows are skipped.
pub fn read_peaks(path: &Path) -> Result<PeakCollection> {
    if path.extension().and_then(|ext| ext.to_str()) == Some("xls") {
        read_macs_xls_peaks(path)
    } else {
        read_plain_peaks(path)
    }
}

fn read_plain_peaks(path: &Path) -> Result<PeakCollection> {
    let reader = open(path)?;
    let mut pks = PeakCollection::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let (chrom, start, end) = parse_interval(&fields).with_context(|| {
            format!(
                "malformed peak record at {}:{}",
                path.display(),
                line_number + 1
            )
        })?;
        let summit_offset = fields.get(3).and_then(|v| v.trim().parse::<u64>().ok());
        pks.entry(chrom.to_string())
            .or_default()
            .push(Peak::new(chrom, start, end, summit_offset));
    }

    Ok(pks)
}

fn read_macs_xls_peaks(path: &Path) -> Result<PeakCollection> {
    let reader = open(path)?;
    let mut pks = PeakCollection::new();

    for line in reader.lines() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        // header and other non-record rows simply fail to parse
        let Ok((chrom, start, end)) = parse_interval(&fields) else {
            continue;
        };
        let Some(summit_offset) = fields.get(4).and_then(|v| v.trim().parse::<u64>().ok()) else {
            continue;
        };
        pks.entry(chrom.to_string())
            .or_default()
            .push(Peak::new(chrom, start, end, Some(summit_offset)));
    }

    Ok(pks)
}

/// Read a BED-like read file into a position index. Only chromosome, start,
/// end and the strand in column six are used; each read collapses to its
/// shifted 5' position (`start + shift` on `+`, `end - shift` otherwise).
pub fn read_reads(path: &Path, shift: i64) -> Result<ReadIndex> {
    let reader = open(path)?;
    let mut positions: BTreeMap<String, Vec<i64>> = BTreeMap::new();

    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        let context = || {
            format!(
                "malformed read record at {}:{}",
                path.display(),
                line_number + 1
            )
        };
        let (chrom, start, end) = parse_interval(&fields).with_context(context)?;
        let strand = fields.get(5).map(|v| v.trim()).with_context(context)?;
        let position = match strand {
            "+" => start as i64 + shift,
            _ => end as i64 - shift,
        };
        positions.entry(chrom.to_string()).or_default().push(position);
    }

    Ok(ReadIndex::from_positions(positions))
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(BufReader::new(file))
}

fn parse_interval<'a>(fields: &[&'a str]) -> Result<(&'a str, u64, u64)> {
    let chrom = fields.first().context("missing chromosome column")?.trim();
    let start = fields
        .get(1)
        .context("missing start column")?
        .trim()
        .parse::<u64>()
        .context("invalid start coordinate")?;
    let end = fields
        .get(2)
        .context("missing end column")?
        .trim()
        .parse::<u64>()
        .context("invalid end coordinate")?;
    Ok((chrom, start, end))
}

/// Write the per-sample table: one sample's unique and common peaks under
/// the `unique`/`common` group labels.
pub fn write_normalized_peaks(
    unique: &PeakCollection,
    common: &PeakCollection,
    path: &Path,
    reads_a_name: &str,
    reads_b_name: &str,
) -> Result<()> {
    let mut out = create(path)?;
    write_table_header(&mut out, reads_a_name, reads_b_name)?;
    write_peaks_block(&mut out, unique, "unique")?;
    write_peaks_block(&mut out, common, "common")?;
    Ok(())
}

/// Write the three-set table: sample-1 unique peaks, merged common peaks and
/// sample-2 unique peaks.
pub fn write_all_peaks_table(
    unique_a: &PeakCollection,
    merged: &PeakCollection,
    unique_b: &PeakCollection,
    path: &Path,
    peaks_a_name: &str,
    peaks_b_name: &str,
    reads_a_name: &str,
    reads_b_name: &str,
) -> Result<()> {
    let mut out = create(path)?;
    write_table_header(&mut out, reads_a_name, reads_b_name)?;
    write_peaks_block(&mut out, unique_a, &format!("{peaks_a_name}_unique"))?;
    write_peaks_block(&mut out, merged, "merged_common_peak")?;
    write_peaks_block(&mut out, unique_b, &format!("{peaks_b_name}_unique"))?;
    Ok(())
}

fn write_table_header(
    out: &mut impl Write,
    reads_a_name: &str,
    reads_b_name: &str,
) -> Result<()> {
    writeln!(
        out,
        "chr\tstart\tend\tsummit\tM_value\tA_value\tP_value\tPeak_Group\t\
         normalized_read_density_in_{reads_a_name}\tnormalized_read_density_in_{reads_b_name}"
    )?;
    Ok(())
}

fn write_peaks_block(out: &mut impl Write, pks: &PeakCollection, group: &str) -> Result<()> {
    for peaks in pks.values() {
        for pk in peaks {
            writeln!(
                out,
                "{}\t{}\t{}\t{}\t{:.6}\t{:.6}\t{:e}\t{}\t{:.6}\t{:.6}",
                pk.chrom,
                pk.start,
                pk.end,
                pk.summit - pk.start,
                pk.normalized_m_value,
                pk.normalized_a_value,
                pk.p_value,
                group,
                pk.normalized_density_a,
                pk.read_density_b,
            )?;
        }
    }
    Ok(())
}

/// Write the M-value and p-value wiggle tracks over all three peak sets,
/// sorted by summit within each chromosome.
pub fn write_wig_tracks(
    unique_a: &PeakCollection,
    unique_b: &PeakCollection,
    merged: &PeakCollection,
    comparison_name: &str,
    dir: &Path,
) -> Result<()> {
    info!("writing wig tracks");
    let peaks = combine(&combine(unique_a, merged), unique_b);

    write_wig(
        &peaks,
        &dir.join(format!("{comparison_name}_peaks_Mvalues.wig")),
        comparison_name,
        |pk| pk.normalized_m_value,
    )?;
    write_wig(
        &peaks,
        &dir.join(format!("{comparison_name}_peaks_Pvalues.wig")),
        &format!("{comparison_name}(-log10(p-value))"),
        |pk| -pk.p_value.log10(),
    )?;
    Ok(())
}

fn write_wig(
    pks: &PeakCollection,
    path: &Path,
    track_name: &str,
    value: impl Fn(&Peak) -> f64,
) -> Result<()> {
    let mut out = create(path)?;
    writeln!(out, "browser position chr11:5220000-5330000")?;
    writeln!(
        out,
        "track type=wiggle_0 name={track_name} visibility=full autoScale=on \
         color=255,0,0 yLineMark=0 yLineOnOff=on priority=10"
    )?;
    for (chrom, peaks) in pks {
        writeln!(out, "variableStep chrom={chrom} span=100")?;
        for pk in peaks.iter().sorted_by_key(|pk| pk.summit) {
            writeln!(out, "{}\t{}", pk.summit, value(pk))?;
        }
    }
    Ok(())
}

/// Write peaks whose |normalized M| stays below the cutoff as a BED track.
pub fn write_unbiased_peaks(
    unique_a: &PeakCollection,
    unique_b: &PeakCollection,
    merged: &PeakCollection,
    unbiased_m: f64,
    overlap_dependent: bool,
    dir: &Path,
) -> Result<()> {
    let (pks, name) = if overlap_dependent {
        (merged.clone(), "merged_common_peaks")
    } else {
        (combine(&combine(unique_a, merged), unique_b), "all_peaks")
    };

    let mut out = create(&dir.join(format!("unbiased_peaks_of_{name}.bed")))?;
    let mut written = 0u64;
    for peaks in pks.values() {
        for pk in peaks {
            if pk.normalized_m_value.abs() < unbiased_m {
                written += 1;
                writeln!(
                    out,
                    "{}\t{}\t{}\tfrom_{}_{}\t{}",
                    pk.chrom, pk.start, pk.end, name, written, pk.normalized_m_value
                )?;
            }
        }
    }
    info!("filtered {written} unbiased peaks");
    Ok(())
}

/// Write significantly biased peaks, split by M direction into an over and
/// an under BED track.
pub fn write_biased_peaks(
    unique_a: &PeakCollection,
    unique_b: &PeakCollection,
    merged: &PeakCollection,
    biased_m: f64,
    biased_p: f64,
    overlap_dependent: bool,
    dir: &Path,
) -> Result<()> {
    let (pks, name) = if overlap_dependent {
        (combine(unique_a, unique_b), "unique_peaks")
    } else {
        (combine(&combine(unique_a, merged), unique_b), "all_peaks")
    };

    let mut over =
        create(&dir.join(format!("M_over_{biased_m:.2}_biased_peaks_of_{name}.bed")))?;
    let mut under =
        create(&dir.join(format!("M_less_-{biased_m:.2}_biased_peaks_of_{name}.bed")))?;
    let mut n_over = 0u64;
    let mut n_under = 0u64;
    for peaks in pks.values() {
        for pk in peaks {
            if pk.p_value >= biased_p {
                continue;
            }
            if pk.normalized_m_value > biased_m {
                n_over += 1;
                writeln!(
                    over,
                    "{}\t{}\t{}\tfrom_{}_{}\t{}",
                    pk.chrom, pk.start, pk.end, name, n_over, pk.normalized_m_value
                )?;
            }
            if pk.normalized_m_value < -biased_m {
                n_under += 1;
                writeln!(
                    under,
                    "{}\t{}\t{}\tfrom_{}_{}\t{}",
                    pk.chrom, pk.start, pk.end, name, n_under, pk.normalized_m_value
                )?;
            }
        }
    }
    info!("filtered {} biased peaks", n_over + n_under);
    Ok(())
}

/// Counts and model parameters recorded for one run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub peaks_a_unique: usize,
    pub peaks_a_common: usize,
    pub peaks_b_unique: usize,
    pub peaks_b_common: usize,
    pub merged_common_peaks: usize,
    pub overlap_fold_change_mean: f64,
    pub overlap_fold_change_std: f64,
    pub ma_fit: MaFit,
}

pub fn write_summary(summary: &RunSummary, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("failed to serialize summary")?;
    let mut out = create(path)?;
    out.write_all(json.as_bytes())?;
    Ok(())
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn temp_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_read_plain_peaks_with_optional_summit() {
        let file = temp_file("# comment\nchr1\t100\t200\t30\nchr1\t300\t400\nchr2\t50\t90\n");
        let pks = read_peaks(file.path()).unwrap();

        assert_eq!(pks["chr1"].len(), 2);
        assert_eq!(pks["chr1"][0].summit, 130);
        assert_eq!(pks["chr1"][1].summit, 351);
        assert_eq!(pks["chr2"].len(), 1);
    }

    #[test]
    fn test_read_plain_peaks_rejects_bad_coordinates() {
        let file = temp_file("chr1\tabc\t200\n");
        assert!(read_peaks(file.path()).is_err());
    }

    #[test]
    fn test_read_macs_xls_skips_header_rows() {
        let contents = "\
# This file is generated by MACS\n\
chr\tstart\tend\tlength\tsummit\ttags\n\
chr1\t100\t400\t300\t50\t25\n\
chr1\t1000\t1400\t400\t120\t30\n";
        let file = temp_file(contents);
        let path = file.path().with_extension("xls");
        std::fs::copy(file.path(), &path).unwrap();

        let pks = read_peaks(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(pks["chr1"].len(), 2);
        assert_eq!(pks["chr1"][0].summit, 150);
        assert_eq!(pks["chr1"][1].summit, 1120);
    }

    #[test]
    fn test_read_reads_shifts_by_strand() {
        let contents = "\
chr1\t100\t150\tr1\t0\t+\n\
chr1\t200\t250\tr2\t0\t-\n";
        let file = temp_file(contents);
        let index = read_reads(file.path(), 10).unwrap();

        // + strand: 100 + 10; - strand: 250 - 10
        assert_eq!(index.count_in_window("chr1", 110, 110), 1);
        assert_eq!(index.count_in_window("chr1", 240, 240), 1);
        assert_eq!(index.n_reads(), 2);
    }

    #[test]
    fn test_read_reads_requires_strand_column() {
        let file = temp_file("chr1\t100\t150\n");
        assert!(read_reads(file.path(), 0).is_err());
    }

    #[test]
    fn test_table_writer_emits_header_and_rows() {
        let mut unique = PeakCollection::new();
        unique.insert("chr1".to_string(), vec![Peak::new("chr1", 100, 200, None)]);
        let common = PeakCollection::new();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_MAvalues.xls");
        write_normalized_peaks(&unique, &common, &path, "reads_a", "reads_b").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("chr\tstart\tend\tsummit"));
        assert!(lines[0].contains("normalized_read_density_in_reads_a"));
        assert!(lines[1].ends_with("\tunique\t0.000000\t0.000000"));
    }

    #[test]
    fn test_wig_tracks_are_sorted_by_summit() {
        let mut merged = PeakCollection::new();
        merged.insert(
            "chr1".to_string(),
            vec![
                Peak::new("chr1", 500, 600, None),
                Peak::new("chr1", 100, 200, None),
            ],
        );
        let empty = PeakCollection::new();

        let dir = tempfile::tempdir().unwrap();
        write_wig_tracks(&empty, &empty, &merged, "test", dir.path()).unwrap();

        let contents =
            std::fs::read_to_string(dir.path().join("test_peaks_Mvalues.wig")).unwrap();
        let summits: Vec<u64> = contents
            .lines()
            .filter(|line| !line.starts_with("browser") && !line.starts_with("track"))
            .filter(|line| !line.starts_with("variableStep"))
            .map(|line| line.split('\t').next().unwrap().parse().unwrap())
            .collect();
        assert_eq!(summits, vec![151, 551]);
    }

    #[test]
    fn test_biased_peak_filters() {
        let mut pk_up = Peak::new("chr1", 100, 200, None);
        pk_up.normalized_m_value = 2.5;
        pk_up.p_value = 1e-6;
        let mut pk_down = Peak::new("chr1", 300, 400, None);
        pk_down.normalized_m_value = -3.0;
        pk_down.p_value = 1e-4;
        let mut pk_flat = Peak::new("chr1", 500, 600, None);
        pk_flat.normalized_m_value = 0.2;
        pk_flat.p_value = 0.9;

        let mut merged = PeakCollection::new();
        merged.insert("chr1".to_string(), vec![pk_up, pk_down, pk_flat]);
        let empty = PeakCollection::new();

        let dir = tempfile::tempdir().unwrap();
        write_biased_peaks(&empty, &empty, &merged, 1.0, 0.01, false, dir.path()).unwrap();
        write_unbiased_peaks(&empty, &empty, &merged, 1.0, false, dir.path()).unwrap();

        let over = std::fs::read_to_string(
            dir.path().join("M_over_1.00_biased_peaks_of_all_peaks.bed"),
        )
        .unwrap();
        let under = std::fs::read_to_string(
            dir.path().join("M_less_-1.00_biased_peaks_of_all_peaks.bed"),
        )
        .unwrap();
        let unbiased = std::fs::read_to_string(
            dir.path().join("unbiased_peaks_of_all_peaks.bed"),
        )
        .unwrap();

        assert_eq!(over.lines().count(), 1);
        assert!(over.contains("from_all_peaks_1"));
        assert_eq!(under.lines().count(), 1);
        assert_eq!(unbiased.lines().count(), 1);
        assert!(unbiased.contains("500\t600"));
    }

    #[test]
    fn test_summary_round_trips_as_json() {
        let summary = RunSummary {
            peaks_a_unique: 10,
            peaks_a_common: 20,
            peaks_b_unique: 5,
            peaks_b_common: 18,
            merged_common_peaks: 15,
            overlap_fold_change_mean: 12.5,
            overlap_fold_change_std: 1.25,
            ma_fit: MaFit {
                intercept: -0.3,
                slope: 0.12,
            },
        };

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        write_summary(&summary, &path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["merged_common_peaks"], 15);
        assert_eq!(value["ma_fit"]["slope"], 0.12);
    }
}
