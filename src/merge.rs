use std::collections::BTreeMap;

use itertools::Itertools;

use crate::peaks::{collection_size, combine, Peak, PeakCollection};

/// Consensus peaks built from overlapping common peaks, with the
/// summit-to-summit distance of each merged peak kept in lockstep.
#[derive(Debug)]
pub struct MergedPeaks {
    pub peaks: PeakCollection,
    pub summit_gaps: BTreeMap<String, Vec<u64>>,
}

impl MergedPeaks {
    pub fn len(&self) -> usize {
        collection_size(&self.peaks)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Merge the common peaks of both samples into non-overlapping consensus
/// peaks, per chromosome.
///
/// The summit gap recorded for each merged peak is the distance between the
/// closest adjacent pair of its constituent summits; a small gap means both
/// samples place the binding event tightly and the peak can be trusted for
/// model fitting.
pub fn merge_common_peaks(common_a: &PeakCollection, common_b: &PeakCollection) -> MergedPeaks {
    let mut peaks = PeakCollection::new();
    let mut summit_gaps = BTreeMap::new();

    for (chrom, mut mixed) in combine(common_a, common_b) {
        mixed.sort_by_key(|pk| pk.start);
        let (merged, gaps) = merge_sorted(mixed);
        peaks.insert(chrom.clone(), merged);
        summit_gaps.insert(chrom, gaps);
    }

    MergedPeaks { peaks, summit_gaps }
}

// Left-to-right sweep over a start-sorted list with a single accumulating
// run. The list is sorted by start, so a peak overlaps the current run iff
// its start lies before the run's end.
fn merge_sorted(sorted: Vec<Peak>) -> (Vec<Peak>, Vec<u64>) {
    let mut merged = Vec::new();
    let mut gaps = Vec::new();

    let mut iter = sorted.into_iter();
    let Some(first) = iter.next() else {
        return (merged, gaps);
    };

    let mut run = Run::open(first);
    for pk in iter {
        if pk.start < run.end {
            run.extend(pk);
        } else {
            let (peak, gap) = run.close();
            merged.push(peak);
            gaps.push(gap);
            run = Run::open(pk);
        }
    }
    let (peak, gap) = run.close();
    merged.push(peak);
    gaps.push(gap);

    (merged, gaps)
}

// One accumulating consensus interval during the sweep.
struct Run {
    chrom: String,
    start: u64,
    end: u64,
    summits: Vec<u64>,
}

impl Run {
    fn open(pk: Peak) -> Self {
        Run {
            chrom: pk.chrom,
            start: pk.start,
            end: pk.end,
            summits: vec![pk.summit],
        }
    }

    fn extend(&mut self, pk: Peak) {
        self.end = self.end.max(pk.end);
        self.summits.push(pk.summit);
    }

    fn close(mut self) -> (Peak, u64) {
        self.summits.sort_unstable();
        let (low, high) = closest_adjacent_pair(&self.summits);
        let mut peak = Peak::new(self.chrom, self.start, self.end, None);
        peak.summit = (low + high) / 2 + 1;
        (peak, high - low)
    }
}

/// Adjacent pair of the ascending summit list with the smallest gap; the
/// first such pair wins ties. A single summit pairs with itself.
fn closest_adjacent_pair(sorted: &[u64]) -> (u64, u64) {
    if sorted.len() < 2 {
        let only = sorted[0];
        return (only, only);
    }
    sorted
        .iter()
        .copied()
        .tuple_windows()
        .min_by_key(|&(low, high)| high - low)
        .expect("list has at least one adjacent pair")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collection(peaks: Vec<Peak>) -> PeakCollection {
        let mut pks = PeakCollection::new();
        for pk in peaks {
            pks.entry(pk.chrom.clone()).or_default().push(pk);
        }
        pks
    }

    #[test]
    fn test_closest_adjacent_pair() {
        assert_eq!(closest_adjacent_pair(&[100, 500, 510, 900]), (500, 510));
        assert_eq!(closest_adjacent_pair(&[100, 200]), (100, 200));
        assert_eq!(closest_adjacent_pair(&[42]), (42, 42));
        // first minimal pair wins on ties
        assert_eq!(closest_adjacent_pair(&[0, 10, 20, 30]), (0, 10));
    }

    #[test]
    fn test_two_overlapping_peaks_merge_into_union() {
        let a = collection(vec![Peak::new("chr1", 100, 200, None)]);
        let b = collection(vec![Peak::new("chr1", 150, 250, None)]);

        let merged = merge_common_peaks(&a, &b);
        assert_eq!(merged.len(), 1);
        let pk = &merged.peaks["chr1"][0];
        assert_eq!((pk.start, pk.end), (100, 250));

        // summits 151 and 201: midpoint 176, distance 50
        assert_eq!(pk.summit, 177);
        assert_eq!(merged.summit_gaps["chr1"], vec![50]);
    }

    #[test]
    fn test_merged_peaks_do_not_overlap_each_other() {
        let a = collection(vec![
            Peak::new("chr1", 100, 300, None),
            Peak::new("chr1", 600, 700, None),
        ]);
        let b = collection(vec![
            Peak::new("chr1", 250, 400, None),
            Peak::new("chr1", 650, 800, None),
        ]);

        let merged = merge_common_peaks(&a, &b);
        let peaks = &merged.peaks["chr1"];
        assert_eq!(peaks.len(), 2);
        for pair in peaks.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]));
        }
        assert_eq!((peaks[0].start, peaks[0].end), (100, 400));
        assert_eq!((peaks[1].start, peaks[1].end), (600, 800));
    }

    #[test]
    fn test_chain_of_overlaps_collapses_to_one_run() {
        let a = collection(vec![
            Peak::new("chr1", 100, 220, None),
            Peak::new("chr1", 300, 420, None),
        ]);
        let b = collection(vec![Peak::new("chr1", 200, 320, None)]);

        let merged = merge_common_peaks(&a, &b);
        assert_eq!(merged.len(), 1);
        let pk = &merged.peaks["chr1"][0];
        assert_eq!((pk.start, pk.end), (100, 420));
        // summits 161, 261, 361: equally spaced, first adjacent pair wins
        assert_eq!(merged.summit_gaps["chr1"], vec![100]);
        assert_eq!(pk.summit, (161 + 261) / 2 + 1);
    }

    #[test]
    fn test_adjacent_peaks_stay_separate() {
        let a = collection(vec![Peak::new("chr1", 100, 200, None)]);
        let b = collection(vec![Peak::new("chr1", 200, 300, None)]);

        let merged = merge_common_peaks(&a, &b);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_single_summit_run_reports_zero_gap() {
        let a = collection(vec![Peak::new("chr1", 100, 200, None)]);
        let b = PeakCollection::new();

        let merged = merge_common_peaks(&a, &b);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.summit_gaps["chr1"], vec![0]);
        // summit pairs with itself and lands one past it
        assert_eq!(merged.peaks["chr1"][0].summit, 152);
    }
}
