//! Per-feature quantile binning used during split search.

/// Maps raw feature values to bin indices.
///
/// Bin `b` holds values `<= upper_bounds[b]`; the last bound is `+inf`, so
/// "bin <= b" and "value <= upper_bounds[b]" select the same rows and trees
/// trained on bins can predict directly on raw values.
#[derive(Debug, Clone)]
pub struct BinMapper {
    upper_bounds: Vec<f32>,
}

impl BinMapper {
    /// Fit bin bounds from training values, using at most `max_bins` bins.
    pub fn fit(values: &[f32], max_bins: usize) -> Self {
        let max_bins = max_bins.clamp(2, 256);
        let mut sorted: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        sorted.sort_by(f32::total_cmp);

        let mut distinct = sorted.clone();
        distinct.dedup();

        let mut upper_bounds = Vec::with_capacity(max_bins);
        if distinct.len() <= max_bins {
            for pair in distinct.windows(2) {
                upper_bounds.push(midpoint(pair[0], pair[1]));
            }
        } else {
            let n = sorted.len();
            for b in 1..max_bins {
                let pos = b * n / max_bins;
                if pos == 0 || pos >= n || sorted[pos - 1] == sorted[pos] {
                    continue;
                }
                let bound = midpoint(sorted[pos - 1], sorted[pos]);
                if upper_bounds.last().is_none_or(|&last| bound > last) {
                    upper_bounds.push(bound);
                }
            }
        }
        upper_bounds.push(f32::INFINITY);
        Self { upper_bounds }
    }

    pub fn n_bins(&self) -> usize {
        self.upper_bounds.len()
    }

    /// Bin index for `value`.
    pub fn bin(&self, value: f32) -> u8 {
        let idx = self.upper_bounds.partition_point(|&bound| bound < value);
        idx.min(self.upper_bounds.len() - 1) as u8
    }

    /// Raw-value threshold equivalent to "bin <= `bin`".
    pub fn threshold(&self, bin: usize) -> f32 {
        self.upper_bounds[bin]
    }
}

fn midpoint(a: f32, b: f32) -> f32 {
    let mid = a + (b - a) / 2.0;
    // Keep the bound strictly below `b` even when the two floats are adjacent.
    if mid >= b { a } else { mid }
}

/// Feature-major binned copy of a row-major feature matrix.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    n_rows: usize,
    mappers: Vec<BinMapper>,
    bins: Vec<u8>,
}

impl BinnedMatrix {
    /// Fit one mapper per feature and bin every row.
    pub fn build(values: &[f32], n_features: usize, max_bins: usize) -> Self {
        let n_rows = if n_features == 0 { 0 } else { values.len() / n_features };
        let mut mappers = Vec::with_capacity(n_features);
        let mut bins = vec![0u8; n_rows * n_features];
        let mut column = Vec::with_capacity(n_rows);
        for feature in 0..n_features {
            column.clear();
            column.extend((0..n_rows).map(|row| values[row * n_features + feature]));
            let mapper = BinMapper::fit(&column, max_bins);
            let out = &mut bins[feature * n_rows..(feature + 1) * n_rows];
            for (slot, &value) in out.iter_mut().zip(&column) {
                *slot = mapper.bin(value);
            }
            mappers.push(mapper);
        }
        Self {
            n_rows,
            mappers,
            bins,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.mappers.len()
    }

    pub fn mapper(&self, feature: usize) -> &BinMapper {
        &self.mappers[feature]
    }

    /// Bins of one feature for every row.
    pub fn column(&self, feature: usize) -> &[u8] {
        &self.bins[feature * self.n_rows..(feature + 1) * self.n_rows]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn few_distinct_values_get_their_own_bins() {
        let mapper = BinMapper::fit(&[3.0, 1.0, 2.0, 2.0, 1.0], 128);
        assert_eq!(mapper.n_bins(), 3);
        assert_eq!(mapper.bin(1.0), 0);
        assert_eq!(mapper.bin(2.0), 1);
        assert_eq!(mapper.bin(3.0), 2);
        assert_eq!(mapper.bin(100.0), 2);
        assert_eq!(mapper.threshold(0), 1.5);
    }

    #[test]
    fn many_values_are_capped_at_max_bins() {
        let values: Vec<f32> = (0..1000).map(|v| v as f32).collect();
        let mapper = BinMapper::fit(&values, 16);
        assert!(mapper.n_bins() <= 16);
        assert_eq!(mapper.bin(0.0), 0);
        assert_eq!(mapper.bin(999.0) as usize, mapper.n_bins() - 1);
    }

    #[test]
    fn threshold_agrees_with_bins() {
        let values: Vec<f32> = (0..300).map(|v| (v as f32 * 0.37).sin()).collect();
        let mapper = BinMapper::fit(&values, 32);
        for &value in &values {
            let bin = mapper.bin(value) as usize;
            for split in 0..mapper.n_bins() {
                assert_eq!(bin <= split, value <= mapper.threshold(split));
            }
        }
    }

    #[test]
    fn binned_matrix_is_feature_major() {
        let values = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0];
        let binned = BinnedMatrix::build(&values, 2, 128);
        assert_eq!(binned.n_rows(), 3);
        assert_eq!(binned.column(0), &[0, 1, 2]);
        assert_eq!(binned.column(1), &[0, 1, 2]);
    }
}
