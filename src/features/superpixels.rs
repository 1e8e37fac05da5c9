//! Graph-based (Felzenszwalb-Huttenlocher) oversegmentation.
//!
//! Pixels are nodes of an 8-connected grid graph weighted by the Euclidean
//! distance between their smoothed band vectors. Edges are visited in
//! increasing weight order and two regions merge when the edge is no heavier
//! than either region's internal variation plus `scale / size`. Regions
//! below `min_size` are then absorbed by their cheapest neighbour.

use ndarray::{Array2, Array3, Axis};

use super::BandCube;

/// Segmentation parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SuperpixelParams {
    /// Higher values favour larger segments.
    pub scale: f32,
    /// Gaussian pre-smoothing width in pixels.
    pub sigma: f32,
    /// Minimum segment size in pixels.
    pub min_size: usize,
}

impl SuperpixelParams {
    /// Parameters used for interactive prediction over a region of `height` rows.
    pub fn for_region(height: usize) -> Self {
        Self {
            scale: height as f32 / 5.0,
            sigma: 4.0,
            min_size: 100,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    a: u32,
    b: u32,
    weight: f32,
}

/// Disjoint-set forest carrying region size and internal variation.
struct Regions {
    parent: Vec<u32>,
    size: Vec<u32>,
    internal: Vec<f32>,
}

impl Regions {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
            internal: vec![0.0; n],
        }
    }

    fn find(&mut self, mut node: u32) -> u32 {
        while self.parent[node as usize] != node {
            let grand = self.parent[self.parent[node as usize] as usize];
            self.parent[node as usize] = grand;
            node = grand;
        }
        node
    }

    fn union(&mut self, a: u32, b: u32, weight: f32) -> u32 {
        let (big, small) = if self.size[a as usize] >= self.size[b as usize] {
            (a, b)
        } else {
            (b, a)
        };
        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
        self.internal[big as usize] = weight;
        big
    }

    fn threshold(&self, root: u32, scale: f32) -> f32 {
        self.internal[root as usize] + scale / self.size[root as usize] as f32
    }
}

/// Segment id per pixel, numbered `0..n` in raster order of first appearance.
pub fn felzenszwalb(cube: &BandCube, params: SuperpixelParams) -> Array2<u32> {
    let (h, w) = (cube.height(), cube.width());
    if h == 0 || w == 0 {
        return Array2::zeros((h, w));
    }
    let smoothed = smooth(cube.data(), params.sigma);
    let mut edges = grid_edges(&smoothed);
    edges.sort_by(|l, r| l.weight.total_cmp(&r.weight));

    let mut regions = Regions::new(h * w);
    for edge in &edges {
        let ra = regions.find(edge.a);
        let rb = regions.find(edge.b);
        if ra == rb {
            continue;
        }
        if edge.weight <= regions.threshold(ra, params.scale)
            && edge.weight <= regions.threshold(rb, params.scale)
        {
            regions.union(ra, rb, edge.weight);
        }
    }

    let min_size = params.min_size as u32;
    for edge in &edges {
        let ra = regions.find(edge.a);
        let rb = regions.find(edge.b);
        if ra != rb && (regions.size[ra as usize] < min_size || regions.size[rb as usize] < min_size)
        {
            regions.union(ra, rb, edge.weight);
        }
    }

    let mut ids = vec![u32::MAX; h * w];
    let mut next = 0u32;
    let mut labels = Array2::zeros((h, w));
    for (pixel, label) in labels.iter_mut().enumerate() {
        let root = regions.find(pixel as u32) as usize;
        if ids[root] == u32::MAX {
            ids[root] = next;
            next += 1;
        }
        *label = ids[root];
    }
    labels
}

fn grid_edges(data: &Array3<f32>) -> Vec<Edge> {
    let (h, w, _) = data.dim();
    let mut edges = Vec::with_capacity(4 * h * w);
    let distance = |y0: usize, x0: usize, y1: usize, x1: usize| -> f32 {
        let a = data.index_axis(Axis(0), y0);
        let b = data.index_axis(Axis(0), y1);
        a.index_axis(Axis(0), x0)
            .iter()
            .zip(b.index_axis(Axis(0), x1).iter())
            .map(|(p, q)| (p - q) * (p - q))
            .sum::<f32>()
            .sqrt()
    };
    let id = |y: usize, x: usize| (y * w + x) as u32;
    for y in 0..h {
        for x in 0..w {
            if x + 1 < w {
                edges.push(Edge {
                    a: id(y, x),
                    b: id(y, x + 1),
                    weight: distance(y, x, y, x + 1),
                });
            }
            if y + 1 < h {
                edges.push(Edge {
                    a: id(y, x),
                    b: id(y + 1, x),
                    weight: distance(y, x, y + 1, x),
                });
                if x + 1 < w {
                    edges.push(Edge {
                        a: id(y, x),
                        b: id(y + 1, x + 1),
                        weight: distance(y, x, y + 1, x + 1),
                    });
                }
                if x > 0 {
                    edges.push(Edge {
                        a: id(y, x),
                        b: id(y + 1, x - 1),
                        weight: distance(y, x, y + 1, x - 1),
                    });
                }
            }
        }
    }
    edges
}

/// Separable Gaussian blur of every band with clamped borders.
fn smooth(data: &Array3<f32>, sigma: f32) -> Array3<f32> {
    if sigma <= 0.0 {
        return data.clone();
    }
    let radius = (4.0 * sigma).ceil() as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|offset| (-(offset * offset) as f32 / (2.0 * sigma * sigma)).exp())
        .collect();
    let total: f32 = kernel.iter().sum();
    kernel.iter_mut().for_each(|k| *k /= total);

    let (h, w, bands) = data.dim();
    let clamp = |pos: isize, extent: usize| pos.clamp(0, extent as isize - 1) as usize;
    let mut rows = Array3::<f32>::zeros((h, w, bands));
    for y in 0..h {
        for x in 0..w {
            for band in 0..bands {
                rows[[y, x, band]] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        weight * data[[y, clamp(x as isize + k as isize - radius, w), band]]
                    })
                    .sum();
            }
        }
    }
    let mut out = Array3::<f32>::zeros((h, w, bands));
    for y in 0..h {
        for x in 0..w {
            for band in 0..bands {
                out[[y, x, band]] = kernel
                    .iter()
                    .enumerate()
                    .map(|(k, weight)| {
                        weight * rows[[clamp(y as isize + k as isize - radius, h), x, band]]
                    })
                    .sum();
            }
        }
    }
    out
}
