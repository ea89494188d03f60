use ahash::HashSet;

use crate::peaks::{Peak, PeakCollection};

/// The four-way split produced by overlap classification.
#[derive(Debug, Default)]
pub struct ClassifiedPeaks {
    pub unique_a: PeakCollection,
    pub common_a: PeakCollection,
    pub unique_b: PeakCollection,
    pub common_b: PeakCollection,
}

/// Split two peak sets into per-sample unique and common subsets.
///
/// A peak is common when it overlaps at least one peak of the other sample
/// on the same chromosome. Chromosomes present in only one input land
/// entirely in that input's unique output.
pub fn classify_by_overlap(a: &PeakCollection, b: &PeakCollection) -> ClassifiedPeaks {
    let chroms_a: HashSet<&str> = a.keys().map(String::as_str).collect();
    let chroms_b: HashSet<&str> = b.keys().map(String::as_str).collect();

    let mut classified = ClassifiedPeaks::default();

    for (chrom, peaks) in a {
        if !chroms_b.contains(chrom.as_str()) {
            classified.unique_a.insert(chrom.clone(), peaks.clone());
        }
    }
    for (chrom, peaks) in b {
        if !chroms_a.contains(chrom.as_str()) {
            classified.unique_b.insert(chrom.clone(), peaks.clone());
        }
    }

    for (chrom, peaks_a) in a {
        let Some(peaks_b) = b.get(chrom) else { continue };
        let (unique_a, common_a) = split_by_overlap(peaks_a, peaks_b);
        let (unique_b, common_b) = split_by_overlap(peaks_b, peaks_a);
        classified.unique_a.insert(chrom.clone(), unique_a);
        classified.common_a.insert(chrom.clone(), common_a);
        classified.unique_b.insert(chrom.clone(), unique_b);
        classified.common_b.insert(chrom.clone(), common_b);
    }

    classified
}

// Full cross product against the other sample's list. Peak counts per
// chromosome are bounded, so the quadratic scan stays cheap.
fn split_by_overlap(peaks: &[Peak], others: &[Peak]) -> (Vec<Peak>, Vec<Peak>) {
    let mut unique = Vec::new();
    let mut common = Vec::new();
    for pk in peaks {
        if others.iter().any(|other| pk.overlaps(other)) {
            common.push(pk.clone());
        } else {
            unique.push(pk.clone());
        }
    }
    (unique, common)
}
