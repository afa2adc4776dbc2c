//! Loudness and frequency-bucket sampling for audio-reactive visuals.

/// Averages `magnitudes` into `bucket_count` buckets normalised to `[0, 1]`.
///
/// Each bucket spans `max(1, len / bucket_count)` bins; buckets that run past
/// the end of the buffer are clipped but still divided by the full span.
pub fn frequency_buckets(magnitudes: &[u8], bucket_count: usize) -> Vec<f32> {
    if bucket_count == 0 || magnitudes.is_empty() {
        return Vec::new();
    }

    let bin_size = (magnitudes.len() / bucket_count).max(1);
    let divisor = (bin_size * 255) as f32;
    (0..bucket_count)
        .map(|bucket| {
            let start = (bucket * bin_size).min(magnitudes.len());
            let end = (start + bin_size).min(magnitudes.len());
            let sum: u32 = magnitudes[start..end].iter().map(|&value| u32::from(value)).sum();
            sum as f32 / divisor
        })
        .collect()
}

/// Mean of the buckets, `0.0` when there are none.
pub fn level(buckets: &[f32]) -> f32 {
    if buckets.is_empty() {
        return 0.0;
    }
    buckets.iter().sum::<f32>() / buckets.len() as f32
}
