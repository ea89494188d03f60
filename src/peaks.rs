use std::collections::BTreeMap;

/// A called binding/enrichment region on one chromosome, together with the
/// statistics derived for it over the course of a run.
///
/// Coordinates are half-open `[start, end)`. Derived fields are filled in
/// phases: read counting populates the counts, densities and raw M/A
/// values; normalization populates the remaining fields. Re-running a phase
/// overwrites its fields.
#[derive(Debug, Clone)]
pub struct Peak {
    pub chrom: String,
    pub start: u64,
    pub end: u64,

    // Most-confident single coordinate within the peak
    pub summit: u64,

    // Window read counts, pseudocount-adjusted so they are never zero
    pub read_count_a: u64,
    pub read_count_b: u64,

    // Reads per kilobase within the counting window
    pub read_density_a: f64,
    pub read_density_b: f64,

    // log2 ratio and log2 average of the two densities
    pub m_value: f64,
    pub a_value: f64,

    // Populated by normalization
    pub normalized_density_a: f64,
    pub normalized_m_value: f64,
    pub normalized_a_value: f64,
    pub p_value: f64,
}

impl Peak {
    /// `summit_offset` is relative to `start`, as in MACS output. Without
    /// one the summit falls just past the interval midpoint.
    pub fn new(chrom: impl Into<String>, start: u64, end: u64, summit_offset: Option<u64>) -> Self {
        let summit = match summit_offset {
            Some(offset) => start + offset,
            None => (start + end) / 2 + 1,
        };

        Self {
            chrom: chrom.into(),
            start,
            end,
            summit,
            read_count_a: 0,
            read_count_b: 0,
            read_density_a: 0.0,
            read_density_b: 0.0,
            m_value: 0.0,
            a_value: 0.0,
            normalized_density_a: 0.0,
            normalized_m_value: 0.0,
            normalized_a_value: 0.0,
            p_value: 0.0,
        }
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    /// Strict half-open overlap: intervals that merely share an endpoint do
    /// not overlap.
    pub fn overlaps(&self, other: &Peak) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Peaks keyed by chromosome name. Insertion order within a chromosome
/// carries no meaning; operations that need an order sort explicitly.
pub type PeakCollection = BTreeMap<String, Vec<Peak>>;

/// Total number of peaks across all chromosomes.
pub fn collection_size(pks: &PeakCollection) -> usize {
    pks.values().map(Vec::len).sum()
}

/// Union of two collections, cloning the peaks of both.
pub fn combine(a: &PeakCollection, b: &PeakCollection) -> PeakCollection {
    let mut combined = a.clone();
    for (chrom, peaks) in b {
        combined
            .entry(chrom.clone())
            .or_default()
            .extend(peaks.iter().cloned());
    }
    combined
}
