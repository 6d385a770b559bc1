use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};

/// Bar counting committed source blocks.
pub fn create_progress_bar(total_sources: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total_sources);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} sources ({per_sec}) ETA: {eta}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
