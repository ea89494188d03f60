use std::collections::BTreeMap;

use indicatif::ParallelProgressIterator;
use rayon::prelude::*;

use crate::peaks::{Peak, PeakCollection};
use crate::utils::progress_bar;

// Every count gets one phantom read so densities and their logs stay finite.
const PSEUDOCOUNT: u64 = 1;

/// Shifted 5' read positions per chromosome, sorted ascending so window
/// counts reduce to two binary searches. Built once per input file and never
/// mutated afterwards.
#[derive(Debug, Default)]
pub struct ReadIndex {
    positions: BTreeMap<String, Vec<i64>>,
}

impl ReadIndex {
    /// Take ownership of raw per-chromosome positions and sort each
    /// chromosome once.
    pub fn from_positions(mut positions: BTreeMap<String, Vec<i64>>) -> Self {
        for chrom_positions in positions.values_mut() {
            chrom_positions.sort_unstable();
        }
        Self { positions }
    }

    /// Number of reads with shifted position in `[win_start, win_end]`.
    /// A chromosome missing from the index counts zero, as does a window
    /// lying entirely past the end of the position array.
    pub fn count_in_window(&self, chrom: &str, win_start: i64, win_end: i64) -> u64 {
        let Some(positions) = self.positions.get(chrom) else {
            return 0;
        };
        let low = positions.partition_point(|&pos| pos < win_start);
        let high = positions.partition_point(|&pos| pos <= win_end);
        (high - low) as u64
    }

    pub fn n_reads(&self) -> usize {
        self.positions.values().map(Vec::len).sum()
    }

    pub fn n_chromosomes(&self) -> usize {
        self.positions.len()
    }
}

/// Fill in raw counts, densities and M/A values for every peak of the
/// collection. Chromosomes are independent here, so they are processed as
/// parallel tasks.
pub fn compute_read_density(
    pks: &mut PeakCollection,
    reads_a: &ReadIndex,
    reads_b: &ReadIndex,
    extension: u64,
) {
    let chroms: Vec<&mut Vec<Peak>> = pks.values_mut().collect();
    let n_chroms = chroms.len() as u64;

    chroms
        .into_par_iter()
        .progress_with(progress_bar(
            n_chroms,
            "Counting reads in peaks".to_string(),
        ))
        .for_each(|peaks| {
            for pk in peaks.iter_mut() {
                peak_read_density(pk, reads_a, reads_b, extension);
            }
        });
}

/// Count reads in the window around the summit for both samples and derive
/// the peak's raw densities and M/A values.
pub fn peak_read_density(pk: &mut Peak, reads_a: &ReadIndex, reads_b: &ReadIndex, extension: u64) {
    let (count_a, density_a) = window_density(pk, reads_a, extension);
    let (count_b, density_b) = window_density(pk, reads_b, extension);

    pk.read_count_a = count_a;
    pk.read_density_a = density_a;
    pk.read_count_b = count_b;
    pk.read_density_b = density_b;
    pk.m_value = density_a.log2() - density_b.log2();
    pk.a_value = (density_a.log2() + density_b.log2()) / 2.0;
}

// Reads-per-kilobase-equivalent within the fixed window around the summit.
fn window_density(pk: &Peak, reads: &ReadIndex, extension: u64) -> (u64, f64) {
    let summit = pk.summit as i64;
    let ext = extension as i64;
    let hits = reads.count_in_window(&pk.chrom, summit - ext - 1, summit + ext);
    let read_count = hits + PSEUDOCOUNT;
    let density = read_count as f64 * 1000.0 / (2.0 * extension as f64);
    (read_count, density)
}
