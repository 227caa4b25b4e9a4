//! Recursive radix-2 Cooley-Tukey transform over real input.

use rustfft::num_complex::Complex32;
use std::f32::consts::PI;

/// Decimation-in-time FFT of the strided view
/// `input[offset], input[offset + stride], ...` (`n` elements), written into
/// `output[..n]`.
///
/// Panics if `n` is zero or not a power of two, or if either buffer is too
/// short for the requested view.
pub fn fft(input: &[f32], offset: usize, stride: usize, output: &mut [Complex32], n: usize) {
    assert!(n > 0 && n.is_power_of_two(), "fft length must be a power of two, got {}", n);
    assert!(output.len() >= n, "fft output holds {} values, need {}", output.len(), n);
    assert!(
        offset + (n - 1) * stride < input.len(),
        "fft input view exceeds {} samples",
        input.len()
    );
    transform(input, offset, stride, &mut output[..n]);
}

fn transform(input: &[f32], offset: usize, stride: usize, out: &mut [Complex32]) {
    let n = out.len();
    if n == 1 {
        out[0] = Complex32::new(input[offset], 0.0);
        return;
    }

    let half = n / 2;
    {
        let (even, odd) = out.split_at_mut(half);
        transform(input, offset, stride * 2, even);
        transform(input, offset + stride, stride * 2, odd);
    }

    for k in 0..half {
        let t = k as f32 / n as f32;
        let v = Complex32::from_polar(1.0, -2.0 * PI * t) * out[k + half];
        let e = out[k];
        out[k] = e + v;
        out[k + half] = e - v;
    }
}

/// Hann window coefficient for sample `index` of a `size`-point window.
pub fn hann(index: usize, size: usize) -> f32 {
    let t = index as f32 / (size - 1) as f32;
    0.5 - 0.5 * (2.0 * PI * t).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::FftPlanner;

    fn forward(input: &[f32]) -> Vec<Complex32> {
        let mut out = vec![Complex32::new(0.0, 0.0); input.len()];
        fft(input, 0, 1, &mut out, input.len());
        out
    }

    #[test]
    fn single_sample_is_identity() {
        let out = forward(&[0.75]);
        assert_eq!(out[0], Complex32::new(0.75, 0.0));
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let mut input = [0.0f32; 8];
        input[0] = 1.0;
        for bin in forward(&input) {
            assert!((bin.norm() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn known_signal_concentrates_in_expected_bins() {
        let n = 8;
        let input: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f32 / n as f32;
                (2.0 * PI * t).cos() + (2.0 * PI * 2.0 * t).sin() + (2.0 * PI * 3.0 * t).cos()
            })
            .collect();
        let out = forward(&input);

        for (bin, value) in out.iter().enumerate() {
            let energetic = matches!(bin, 1 | 2 | 3 | 5 | 6 | 7);
            if energetic {
                assert!(value.norm() > 3.9, "bin {} too weak: {}", bin, value.norm());
            } else {
                assert!(value.norm() < 1e-4, "bin {} leaked: {}", bin, value.norm());
            }
        }
    }

    #[test]
    fn matches_rustfft() {
        let n = 256;
        let input: Vec<f32> = (0..n).map(|i| ((i * 37 % 101) as f32 / 50.0) - 1.0).collect();
        let ours = forward(&input);

        let mut reference: Vec<Complex32> = input.iter().map(|&x| Complex32::new(x, 0.0)).collect();
        FftPlanner::<f32>::new().plan_fft_forward(n).process(&mut reference);

        for (a, b) in ours.iter().zip(reference.iter()) {
            assert!((*a - *b).norm() < 1e-3, "{} != {}", a, b);
        }
    }

    #[test]
    fn inverse_round_trip_reconstructs_input() {
        let mut planner = FftPlanner::<f32>::new();
        let mut n = 1;
        while n <= 1024 {
            let input: Vec<f32> = (0..n).map(|i| (i as f32 * 0.37).sin() + 0.25).collect();
            let mut spectrum = forward(&input);
            planner.plan_fft_inverse(n).process(&mut spectrum);

            for (orig, back) in input.iter().zip(spectrum.iter()) {
                let restored = *back / n as f32;
                assert!((restored.re - orig).abs() < 1e-3, "n={}: {} vs {}", n, restored.re, orig);
                assert!(restored.im.abs() < 1e-3);
            }
            n *= 2;
        }
    }

    #[test]
    fn strided_view_transforms_every_other_sample() {
        let input = [1.0, 9.0, 2.0, 9.0, 3.0, 9.0, 4.0, 9.0];
        let mut strided = vec![Complex32::new(0.0, 0.0); 4];
        fft(&input, 0, 2, &mut strided, 4);
        assert_eq!(strided, forward(&[1.0, 2.0, 3.0, 4.0]));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_non_power_of_two() {
        let input = [0.0f32; 6];
        let mut out = vec![Complex32::new(0.0, 0.0); 6];
        fft(&input, 0, 1, &mut out, 6);
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn rejects_zero_length() {
        let mut out: Vec<Complex32> = Vec::new();
        fft(&[], 0, 1, &mut out, 0);
    }

    #[test]
    fn hann_is_zero_at_edges_and_one_in_the_middle() {
        let size = 1025;
        assert!(hann(0, size).abs() < 1e-6);
        assert!(hann(size - 1, size).abs() < 1e-6);
        assert!((hann(size / 2, size) - 1.0).abs() < 1e-6);
    }
}
