// cluster.rs

use crate::error::{HeatmapError, HeatmapResult};
pub use kodama::Method as LinkageMethod;
use kodama::linkage;
use log::{debug, warn};
use ndarray::{Array2, ArrayView1};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
}

impl DistanceMetric {
    pub fn apply(self, x1: &ArrayView1<f64>, x2: &ArrayView1<f64>) -> f64 {
        match self {
            DistanceMetric::Euclidean => x1
                .iter()
                .zip(x2.iter())
                .map(|(a, b)| (b - a) * (b - a))
                .sum::<f64>()
                .sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterDirection {
    // Each row (gene) is an observation
    Rows,
    // Each column (sample) is an observation
    Columns,
}

impl ClusterDirection {
    pub fn n(self, array: &Array2<f64>) -> usize {
        match self {
            ClusterDirection::Rows => array.nrows(),
            ClusterDirection::Columns => array.ncols(),
        }
    }

    pub fn get(self, array: &Array2<f64>, index: usize) -> ArrayView1<'_, f64> {
        match self {
            ClusterDirection::Rows => array.row(index),
            ClusterDirection::Columns => array.column(index),
        }
    }
}

/// One merge drawn as a bracket. Positions are in leaf slots (leaf `i` of the
/// ordering sits at `i + 0.5`); heights are merge dissimilarities.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Link {
    pub left_pos: f64,
    pub left_height: f64,
    pub right_pos: f64,
    pub right_height: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    /// `order[i] = j` means observation `j` is drawn at slot `i`.
    pub order: Vec<usize>,
    pub links: Vec<Link>,
    pub max_height: f64,
}

impl Dendrogram {
    /// Unclustered axis: input order, nothing to draw.
    pub fn identity(n: usize) -> Self {
        Self {
            order: (0..n).collect(),
            links: Vec::new(),
            max_height: 0.0,
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// Hierarchical clustering of one axis of `matrix`.
///
/// A single observation yields the trivial dendrogram; an empty axis or a
/// non-finite distance is a [`HeatmapError::Render`].
pub fn cluster_axis(
    matrix: &Array2<f64>,
    direction: ClusterDirection,
    metric: DistanceMetric,
    method: LinkageMethod,
) -> HeatmapResult<Dendrogram> {
    let n = direction.n(matrix);
    if n == 0 {
        return Err(HeatmapError::render(format!(
            "Cannot cluster {:?}: axis has no observations",
            direction
        )));
    }
    if n == 1 {
        warn!(
            "Only one observation along {:?}; skipping clustering for this axis.",
            direction
        );
        return Ok(Dendrogram::identity(1));
    }

    let mut condensed_dissimilarity = Vec::with_capacity(n * (n - 1) / 2);
    for i in 0..n {
        let x_i = direction.get(matrix, i);
        for j in i + 1..n {
            let x_j = direction.get(matrix, j);
            condensed_dissimilarity.push(metric.apply(&x_i, &x_j));
        }
    }
    if let Some(pos) = condensed_dissimilarity.iter().position(|d| !d.is_finite()) {
        return Err(HeatmapError::render(format!(
            "Non-finite distance in {:?} clustering (condensed index {})",
            direction, pos
        )));
    }

    let dendrogram = linkage(&mut condensed_dissimilarity, n, method);
    if dendrogram.len() != n - 1 {
        return Err(HeatmapError::render(format!(
            "Linkage produced {} merges for {} observations",
            dendrogram.len(),
            n
        )));
    }

    // Children of merged cluster `n + k`, lower index on the left.
    let merges: Vec<(usize, usize, f64)> = dendrogram
        .steps()
        .iter()
        .map(|step| {
            let (left, right) = if step.cluster1 < step.cluster2 {
                (step.cluster1, step.cluster2)
            } else {
                (step.cluster2, step.cluster1)
            };
            (left, right, step.dissimilarity)
        })
        .collect();

    let order = leaf_order(n, &merges)?;
    debug!("{:?} leaf order: {:?}", direction, order);

    let total_nodes = 2 * n - 1;
    let mut position = vec![0.0f64; total_nodes];
    let mut height = vec![0.0f64; total_nodes];
    for (slot, &leaf) in order.iter().enumerate() {
        position[leaf] = slot as f64 + 0.5;
    }

    let mut links = Vec::with_capacity(merges.len());
    let mut max_height = 0.0f64;
    for (k, &(left, right, dissimilarity)) in merges.iter().enumerate() {
        let node = n + k;
        position[node] = 0.5 * (position[left] + position[right]);
        height[node] = dissimilarity;
        max_height = max_height.max(dissimilarity);
        links.push(Link {
            left_pos: position[left],
            left_height: height[left],
            right_pos: position[right],
            right_height: height[right],
            height: dissimilarity,
        });
    }

    Ok(Dendrogram {
        order,
        links,
        max_height,
    })
}

/// Left-to-right leaves by depth-first walk from the root merge.
fn leaf_order(n: usize, merges: &[(usize, usize, f64)]) -> HeatmapResult<Vec<usize>> {
    let root = n + merges.len() - 1;
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node < n {
            order.push(node);
            continue;
        }
        let (left, right, _) = merges.get(node - n).ok_or_else(|| {
            HeatmapError::render(format!("Dendrogram references unknown cluster {}", node))
        })?;
        stack.push(*right);
        stack.push(*left);
    }
    if order.len() != n {
        return Err(HeatmapError::render(format!(
            "Dendrogram covers {} of {} leaves",
            order.len(),
            n
        )));
    }
    Ok(order)
}
