//! Sobel edge magnitude with border clamping.

use ndarray::{Array2, ArrayView2};

type Kernel3 = [[f32; 3]; 3];

const SOBEL_KERNEL_X: Kernel3 = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_KERNEL_Y: Kernel3 = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Normalisation so a unit step edge has magnitude `1/sqrt(2)` in either axis.
const MAGNITUDE_SCALE: f32 = 1.0 / (4.0 * std::f32::consts::SQRT_2);

/// Per-pixel Sobel gradient magnitude of one band.
pub fn sobel_magnitude(band: ArrayView2<'_, f32>) -> Array2<f32> {
    let (h, w) = band.dim();
    let mut mag = Array2::zeros((h, w));
    if w == 0 || h == 0 {
        return mag;
    }
    for y in 0..h {
        let y_idx = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        for x in 0..w {
            let x_idx = [x.saturating_sub(1), x, (x + 1).min(w - 1)];
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for (ky, &yy) in y_idx.iter().enumerate() {
                for (kx, &xx) in x_idx.iter().enumerate() {
                    let v = band[[yy, xx]];
                    sum_x += v * SOBEL_KERNEL_X[ky][kx];
                    sum_y += v * SOBEL_KERNEL_Y[ky][kx];
                }
            }
            mag[[y, x]] = (sum_x * sum_x + sum_y * sum_y).sqrt() * MAGNITUDE_SCALE;
        }
    }
    mag
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_band_has_no_edges() {
        let band = Array2::from_elem((4, 5), 3.0f32);
        assert!(sobel_magnitude(band.view()).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn vertical_step_lights_up_boundary_columns() {
        let band = Array2::from_shape_fn((5, 6), |(_, x)| if x < 3 { 0.0f32 } else { 1.0 });
        let mag = sobel_magnitude(band.view());
        assert_eq!(mag[[2, 0]], 0.0);
        assert_eq!(mag[[2, 5]], 0.0);
        assert!(mag[[2, 2]] > 0.0);
        assert!(mag[[2, 3]] > 0.0);
        assert!((mag[[2, 2]] - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn empty_band_is_empty() {
        let band = Array2::<f32>::zeros((0, 3));
        assert_eq!(sobel_magnitude(band.view()).dim(), (0, 3));
    }
}
