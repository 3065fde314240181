//! Fixed-width histograms for flow statistics.

use serde::{Deserialize, Serialize};

/// A histogram with fixed-width bins starting at zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    bin_width: f64,
    counts: Vec<u64>,
}

impl Histogram {
    /// Creates an empty histogram. A non-positive width falls back to 1.0.
    pub fn new(bin_width: f64) -> Self {
        let bin_width = if bin_width.is_finite() && bin_width > 0.0 {
            bin_width
        } else {
            1.0
        };
        Self {
            bin_width,
            counts: Vec::new(),
        }
    }

    /// Width of every bin.
    pub fn bin_width(&self) -> f64 {
        self.bin_width
    }

    /// Records one sample. Negative samples land in bin 0.
    pub fn add(&mut self, value: f64) {
        let index = if value > 0.0 {
            (value / self.bin_width).floor() as usize
        } else {
            0
        };
        if index >= self.counts.len() {
            self.counts.resize(index + 1, 0);
        }
        self.counts[index] += 1;
    }

    /// Number of bins, including empty trailing ones up to the largest sample.
    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    /// Count in bin `index`.
    pub fn count(&self, index: usize) -> u64 {
        self.counts.get(index).copied().unwrap_or(0)
    }

    /// Total number of samples.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Non-empty bins as `(index, start, count)`.
    pub fn occupied_bins(&self) -> impl Iterator<Item = (usize, f64, u64)> + '_ {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, &count)| count > 0)
            .map(|(i, &count)| (i, i as f64 * self.bin_width, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_binning() {
        let mut h = Histogram::new(0.001);
        h.add(0.0000005);
        h.add(0.0005);
        h.add(0.0025);

        assert_eq!(h.n_bins(), 3);
        assert_eq!(h.count(0), 2);
        assert_eq!(h.count(1), 0);
        assert_eq!(h.count(2), 1);
        assert_eq!(h.total(), 3);

        let bins: Vec<_> = h.occupied_bins().map(|(i, _, c)| (i, c)).collect();
        assert_eq!(bins, vec![(0, 2), (2, 1)]);
    }

    #[test]
    fn test_invalid_width_falls_back() {
        let h = Histogram::new(0.0);
        assert_eq!(h.bin_width(), 1.0);
        assert_eq!(h.count(5), 0);
    }

    #[test]
    fn test_packet_sizes() {
        let mut h = Histogram::new(20.0);
        h.add(1228.0);
        h.add(1228.0);
        assert_eq!(h.count(61), 2);
    }
}
