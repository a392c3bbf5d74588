//! Shared analysis tap on the capture path.
//!
//! The capture thread pushes every raw sample through here; the
//! visualizer reads smoothed frequency-domain magnitudes. Single
//! writer, any number of readers, one mutex around the window.

use std::sync::{Arc, Mutex};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

struct AnalyzerInner {
    /// Ring of the most recent `fft_size` samples.
    window: Vec<f32>,
    write_idx: usize,
    /// Exponentially smoothed magnitude per bin, updated on read.
    smoothed: Vec<f32>,
    rms: f32,
}

/// Fixed-size spectrum analyzer fed by the capture pipeline.
pub struct Analyzer {
    fft_size: usize,
    smoothing: f32,
    fft: Arc<dyn Fft<f32>>,
    inner: Mutex<AnalyzerInner>,
}

impl Analyzer {
    /// `fft_size` must be a power of two; 256 is plenty for a level
    /// display and keeps the per-read transform cheap.
    pub fn new(fft_size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        Self {
            fft_size,
            smoothing: 0.8,
            fft,
            inner: Mutex::new(AnalyzerInner {
                window: vec![0.0; fft_size],
                write_idx: 0,
                smoothed: vec![0.0; fft_size / 2],
                rms: 0.0,
            }),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Feed raw capture samples into the analysis window.
    pub fn push_samples(&self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        for &s in samples {
            let idx = inner.write_idx;
            inner.window[idx] = s;
            inner.write_idx = (idx + 1) % self.fft_size;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        inner.rms = (sum_sq / samples.len() as f32).sqrt();
    }

    /// Smoothed magnitude spectrum, `fft_size / 2` bins.
    pub fn frequency_bins(&self) -> Vec<f32> {
        let mut inner = self.inner.lock().unwrap();
        // Unroll the ring into time order before transforming.
        let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(self.fft_size);
        for i in 0..self.fft_size {
            let idx = (inner.write_idx + i) % self.fft_size;
            buffer.push(Complex::new(inner.window[idx], 0.0));
        }
        self.fft.process(&mut buffer);

        let scale = 2.0 / self.fft_size as f32;
        for (bin, value) in inner.smoothed.iter_mut().zip(&buffer) {
            let magnitude = value.norm() * scale;
            *bin = *bin * self.smoothing + magnitude * (1.0 - self.smoothing);
        }
        inner.smoothed.clone()
    }

    /// RMS level of the most recently pushed block.
    pub fn level(&self) -> f32 {
        self.inner.lock().unwrap().rms
    }
}
