pub mod classify;
pub mod io;
pub mod merge;
pub mod model;
pub mod normalize;
pub mod peaks;
pub mod randomize;
pub mod reads;
pub mod utils;

pub use classify::{classify_by_overlap, ClassifiedPeaks};
pub use merge::{merge_common_peaks, MergedPeaks};
pub use model::{fit_ma_model, MaFit};
pub use normalize::{normalize_collection, normalize_peak};
pub use peaks::{collection_size, combine, Peak, PeakCollection};
pub use randomize::randomize_peaks;
pub use reads::{compute_read_density, ReadIndex};
