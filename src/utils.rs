pub fn progress_bar(length: u64, message: String) -> indicatif::ProgressBar {
    let progress_style = indicatif::ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .expect("progress template is valid")
    .progress_chars("##-");

    let progress_bar = indicatif::ProgressBar::new(length);
    progress_bar.set_style(progress_style);
    progress_bar.set_message(message);
    progress_bar
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}
