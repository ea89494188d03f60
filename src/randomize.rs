use rand::Rng;

use crate::peaks::{Peak, PeakCollection};

/// Draw a random counterpart for every peak: same chromosome, same length,
/// uniform start within the span covered by that chromosome's peaks.
///
/// Repeated draws against independently classified overlaps give a null
/// distribution for the observed common-peak count. The generator is passed
/// in so runs are reproducible under a fixed seed.
pub fn randomize_peaks<R: Rng>(pks: &PeakCollection, rng: &mut R) -> PeakCollection {
    let mut randomized = PeakCollection::new();

    for (chrom, peaks) in pks {
        if peaks.is_empty() {
            continue;
        }
        let min_start = peaks.iter().map(|pk| pk.start).min().expect("nonempty");
        let max_end = peaks.iter().map(|pk| pk.end).max().expect("nonempty");

        let drawn = peaks
            .iter()
            .map(|pk| {
                let start = rng.random_range(min_start..=max_end);
                Peak::new(chrom.clone(), start, start + pk.length(), None)
            })
            .collect();
        randomized.insert(chrom.clone(), drawn);
    }

    randomized
}
