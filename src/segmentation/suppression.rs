//! Neighbourhood vote that collapses isolated predictions to a default class.

use ndarray::Array2;

use crate::mask::Mask;

/// Weight given to neighbours outside the grid.
const OUTSIDE_WEIGHT: f32 = 0.5;

/// Post-processing settings for predicted masks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuppressionFilter {
    pub default_class: u8,
    /// Minimum percentage of non-default neighbours; `0` disables the filter.
    pub threshold_percent: f32,
    /// Odd window edge length.
    pub window_size: usize,
}

impl SuppressionFilter {
    /// Reset to `default_class` every pixel whose `window_size`² neighbourhood
    /// (centre excluded) holds fewer than `threshold_percent` percent of
    /// non-default labels. Neighbours outside the grid count as half.
    pub fn apply(&self, mask: &Mask) -> Mask {
        if self.threshold_percent == 0.0 || self.window_size < 2 {
            return mask.clone();
        }
        let labels = mask.labels();
        let (h, w) = labels.dim();
        let radius = (self.window_size / 2) as isize;
        let neighbours = (self.window_size * self.window_size - 1) as f32;

        let other = labels.mapv(|label| if label != self.default_class { 1.0f32 } else { 0.0 });
        let out = Array2::from_shape_fn((h, w), |(y, x)| {
            let mut total = 0.0f32;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    if dy == 0 && dx == 0 {
                        continue;
                    }
                    let (yy, xx) = (y as isize + dy, x as isize + dx);
                    total += if yy < 0 || xx < 0 || yy >= h as isize || xx >= w as isize {
                        OUTSIDE_WEIGHT
                    } else {
                        other[[yy as usize, xx as usize]]
                    };
                }
            }
            if 100.0 * total / neighbours < self.threshold_percent {
                self.default_class
            } else {
                labels[[y, x]]
            }
        });
        Mask::new(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::MaskShape;

    fn speckled() -> Mask {
        let mut labels = Array2::zeros((7, 7));
        labels[[3, 3]] = 2u8;
        labels[[0, 0]] = 1;
        for y in 4..7 {
            for x in 4..7 {
                labels[[y, x]] = 1;
            }
        }
        Mask::new(labels)
    }

    #[test]
    fn zero_threshold_is_identity() {
        let mask = speckled();
        let filter = SuppressionFilter {
            default_class: 0,
            threshold_percent: 0.0,
            window_size: 3,
        };
        assert_eq!(filter.apply(&mask), mask);
    }

    #[test]
    fn isolated_pixel_collapses_to_default() {
        let filter = SuppressionFilter {
            default_class: 0,
            threshold_percent: 20.0,
            window_size: 3,
        };
        let out = filter.apply(&speckled());
        // one non-default neighbour out of eight
        assert_eq!(out.get(3, 3), Some(0));
        // corner: 5 outside neighbours at 0.5 -> 31%
        assert_eq!(out.get(0, 0), Some(1));
        // inside the 3x3 block: at least 3 of 8 neighbours agree
        assert_eq!(out.get(5, 5), Some(1));
        assert_eq!(out.get(6, 6), Some(1));
    }

    #[test]
    fn default_pixels_are_never_changed() {
        let filter = SuppressionFilter {
            default_class: 3,
            threshold_percent: 100.0,
            window_size: 5,
        };
        let mask = Mask::filled(MaskShape::new(4, 4), 3);
        assert_eq!(filter.apply(&mask), mask);
    }
}
