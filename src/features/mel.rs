//! Mel filter bank, analysis window and DCT tables

use std::f32::consts::PI;

/// Periodic Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f32> {
    if n <= 1 {
        return vec![1.0; n];
    }
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters over `[0, fmax]`.
///
/// Returns `[n_mels][n_fft / 2 + 1]`.
pub fn mel_filter_bank(n_mels: usize, n_fft: usize, sample_rate: u32, fmax: f32) -> Vec<Vec<f32>> {
    let bins = n_fft / 2 + 1;
    let mel_max = hz_to_mel(fmax);
    let step = mel_max / (n_mels + 1) as f32;
    let edges: Vec<f32> = (0..n_mels + 2).map(|i| mel_to_hz(i as f32 * step)).collect();
    let bin_hz = sample_rate as f32 / n_fft as f32;

    let mut bank = vec![vec![0.0f32; bins]; n_mels];
    for (m, filter) in bank.iter_mut().enumerate() {
        let (left, center, right) = (edges[m], edges[m + 1], edges[m + 2]);
        for (k, weight) in filter.iter_mut().enumerate() {
            let freq = k as f32 * bin_hz;
            *weight = if freq <= left || freq >= right {
                0.0
            } else if freq <= center {
                (freq - left) / (center - left)
            } else {
                (right - freq) / (right - center)
            };
        }
    }
    bank
}

/// Orthonormal DCT-II matrix, `[n_out][n_in]`
pub fn dct_matrix(n_out: usize, n_in: usize) -> Vec<Vec<f32>> {
    let n = n_in as f32;
    (0..n_out)
        .map(|k| {
            let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
            (0..n_in)
                .map(|m| scale * (PI / n * (m as f32 + 0.5) * k as f32).cos())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_mel_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((hz - back).abs() < 0.05, "roundtrip failed for {} Hz", hz);
        }
    }

    #[test]
    fn test_filter_bank_shape() {
        let bank = mel_filter_bank(128, 2048, 16000, 8000.0);
        assert_eq!(bank.len(), 128);
        assert_eq!(bank[0].len(), 1025);
        // Every filter covers at least one FFT bin
        for (i, filter) in bank.iter().enumerate() {
            assert!(filter.iter().any(|&w| w > 0.0), "filter {} is empty", i);
            assert!(filter.iter().all(|&w| (0.0..=1.0).contains(&w)));
        }
    }

    #[test]
    fn test_dct_rows_are_orthonormal() {
        let dct = dct_matrix(4, 16);
        for a in 0..4 {
            for b in 0..4 {
                let dot: f32 = dct[a].iter().zip(&dct[b]).map(|(x, y)| x * y).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-4);
            }
        }
    }
}
