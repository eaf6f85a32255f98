//! Half-Space Trees for streaming anomaly detection
//!
//! A forest of fixed-shape random partition trees. Each tree splits the
//! feature space once per internal node, with split dimension and value
//! drawn at construction from a seeded RNG. Trees never change shape after
//! that; only their mass counters move.
//!
//! Each node carries two counters:
//! - `mass_current`: points routed through the node in the window being filled
//! - `mass_reference`: points routed through it in the last completed window
//!
//! A point is scored against the reference window, then counted into the
//! current one. Every `window_size` points the current window becomes the
//! reference and the current counters restart from zero.
//!
//! Scoring descends only while the reference mass stays at or above a size
//! limit (a tenth of the window). Sparse regions stop high in the tree, where
//! the depth weighting shrinks whatever mass is left.
//!
//! Reference: "Fast Anomaly Detection for Streaming Data"
//! (Tan, Ting & Liu, IJCAI 2011)

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Index of a node inside its tree's arena.
pub type NodeRef = usize;

/// Relative padding applied to a bootstrapped range on each side.
const BOOTSTRAP_PADDING: f64 = 0.1;

/// Size limit as a fraction of the window size.
const SIZE_LIMIT_FRACTION: f64 = 0.1;

#[derive(Clone, Debug, PartialEq)]
pub struct PartitionNode {
    pub split_dim: usize,
    /// Values `<=` this go left. `f64::INFINITY` marks a split drawn over a
    /// zero-width range: every finite value routes left.
    pub split_value: f64,
    pub depth: u32,
    pub mass_reference: u64,
    pub mass_current: u64,
    pub left: Option<NodeRef>,
    pub right: Option<NodeRef>,
}

impl PartitionNode {
    fn leaf(depth: u32) -> Self {
        Self {
            split_dim: 0,
            split_value: 0.0,
            depth,
            mass_reference: 0,
            mass_current: 0,
            left: None,
            right: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    /// Child a point descends into, `None` at a leaf.
    /// Missing coordinates read as 0.0.
    fn child_for(&self, features: &[f64]) -> Option<NodeRef> {
        if self.is_leaf() {
            return None;
        }
        let x = features.get(self.split_dim).copied().unwrap_or(0.0);
        if x <= self.split_value {
            self.left
        } else {
            self.right
        }
    }
}

/// A single complete binary partition tree stored as a pre-order arena.
#[derive(Clone, Debug)]
pub struct PartitionTree {
    nodes: Vec<PartitionNode>,
    /// Per-dimension [min, max] the splits were drawn from
    ranges: Vec<(f64, f64)>,
    height: u32,
}

impl PartitionTree {
    /// Build a tree of `height` levels over `ranges`.
    ///
    /// Consumes one uniform draw for the dimension and one for the split
    /// value at every internal node, in pre-order.
    pub fn build(ranges: &[(f64, f64)], height: u32, rng: &mut StdRng) -> Self {
        let internal = (1usize << height) - 1;
        let mut nodes = Vec::with_capacity(internal * 2 + 1);
        grow(&mut nodes, ranges.to_vec(), 0, height, rng);
        Self {
            nodes,
            ranges: ranges.to_vec(),
            height,
        }
    }

    pub fn nodes(&self) -> &[PartitionNode] {
        &self.nodes
    }

    pub fn root(&self) -> &PartitionNode {
        &self.nodes[0]
    }

    pub fn ranges(&self) -> &[(f64, f64)] {
        &self.ranges
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Leaf `features` routes to.
    pub fn reach(&self, features: &[f64]) -> &PartitionNode {
        self.reach_with_limit(features, 0.0)
    }

    /// First node on the path of `features` whose reference mass is below
    /// `size_limit`, or the leaf when every node on the path is at or above it.
    pub fn reach_with_limit(&self, features: &[f64], size_limit: f64) -> &PartitionNode {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            if (node.mass_reference as f64) < size_limit {
                return node;
            }
            match node.child_for(features) {
                Some(next) => idx = next,
                None => return node,
            }
        }
    }

    /// Per-tree anomaly contribution in (0, 1].
    ///
    /// Reference mass at the node where descent stops, scaled by
    /// 2^depth / 2^height: mass at a leaf counts fully, mass where the
    /// descent stopped early counts proportionally less.
    fn contribution(&self, features: &[f64], size_limit: f64) -> f64 {
        let node = self.reach_with_limit(features, size_limit);
        let scale = 2f64.powi(node.depth as i32) / 2f64.powi(self.height as i32);
        1.0 / (1.0 + node.mass_reference as f64 * scale)
    }

    /// Count `features` into `mass_current` along its path.
    fn learn(&mut self, features: &[f64]) {
        let mut idx = 0;
        loop {
            let node = &mut self.nodes[idx];
            node.mass_current += 1;
            match node.child_for(features) {
                Some(next) => idx = next,
                None => break,
            }
        }
    }

    fn rotate(&mut self) {
        for node in &mut self.nodes {
            node.mass_reference = node.mass_current;
            node.mass_current = 0;
        }
    }
}

fn grow(
    nodes: &mut Vec<PartitionNode>,
    bounds: Vec<(f64, f64)>,
    depth: u32,
    height: u32,
    rng: &mut StdRng,
) -> NodeRef {
    let idx = nodes.len();
    if depth >= height || bounds.is_empty() {
        nodes.push(PartitionNode::leaf(depth));
        return idx;
    }

    let split_dim = rng.random_range(0..bounds.len());
    let u: f64 = rng.random();
    let (lo, hi) = bounds[split_dim];

    let split_value = if hi > lo { lo + u * (hi - lo) } else { f64::INFINITY };

    nodes.push(PartitionNode {
        split_dim,
        split_value,
        ..PartitionNode::leaf(depth)
    });

    let mut left_bounds = bounds.clone();
    let mut right_bounds = bounds;
    if split_value.is_finite() {
        left_bounds[split_dim].1 = split_value;
        right_bounds[split_dim].0 = split_value;
    }

    let left = grow(nodes, left_bounds, depth + 1, height, rng);
    let right = grow(nodes, right_bounds, depth + 1, height, rng);
    nodes[idx].left = Some(left);
    nodes[idx].right = Some(right);
    idx
}

/// Windowed half-space tree ensemble.
#[derive(Clone, Debug)]
pub struct PartitionEnsemble {
    trees: Vec<PartitionTree>,
    dimensions: usize,
    tree_count: usize,
    tree_height: u32,
    window_size: u64,
    size_limit: f64,
    seed: u64,
    points_seen_in_window: u64,
    rotations: u64,
    /// Buffered points while the construction range is still being derived
    bootstrap: Option<Vec<Vec<f64>>>,
}

impl PartitionEnsemble {
    /// Ensemble whose construction range is derived from its first window.
    ///
    /// # Arguments
    /// * `dimensions` - Length of the feature vectors
    /// * `tree_count` - Number of trees (typically 25)
    /// * `tree_height` - Depth of every leaf (typically 5)
    /// * `window_size` - Points per mass window
    /// * `seed` - RNG seed; equal seeds and ranges give identical trees
    pub fn bootstrapped(
        dimensions: usize,
        tree_count: usize,
        tree_height: u32,
        window_size: u64,
        seed: u64,
    ) -> Self {
        let window_size = window_size.max(1);
        Self {
            trees: Vec::new(),
            dimensions: dimensions.max(1),
            tree_count: tree_count.max(1),
            tree_height,
            window_size,
            size_limit: window_size as f64 * SIZE_LIMIT_FRACTION,
            seed,
            points_seen_in_window: 0,
            rotations: 0,
            bootstrap: Some(Vec::with_capacity(window_size.min(4096) as usize)),
        }
    }

    /// Ensemble built immediately over `[lo, hi]` in every dimension.
    pub fn with_range(
        dimensions: usize,
        tree_count: usize,
        tree_height: u32,
        window_size: u64,
        seed: u64,
        range: (f64, f64),
    ) -> Self {
        let mut ensemble = Self::bootstrapped(dimensions, tree_count, tree_height, window_size, seed);
        ensemble.bootstrap = None;
        let ranges = vec![range; ensemble.dimensions];
        ensemble.build_trees(&ranges);
        ensemble
    }

    fn build_trees(&mut self, ranges: &[(f64, f64)]) {
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.trees = (0..self.tree_count)
            .map(|_| PartitionTree::build(ranges, self.tree_height, &mut rng))
            .collect();
    }

    /// Score `features` against the reference window, then learn it.
    ///
    /// While bootstrapping every point scores 0.0. A full buffer whose
    /// range has zero width in every dimension is discarded and filling
    /// starts over, so trees are never built over a single value.
    pub fn score_then_learn(&mut self, features: &[f64]) -> f64 {
        if let Some(buffer) = self.bootstrap.as_mut() {
            buffer.push(features.to_vec());
            if buffer.len() as u64 >= self.window_size {
                let ranges = bootstrap_ranges(buffer, self.dimensions);
                if ranges.iter().all(|(lo, hi)| hi <= lo) {
                    buffer.clear();
                } else if let Some(buffer) = self.bootstrap.take() {
                    self.finish_bootstrap(buffer, &ranges);
                }
            }
            return 0.0;
        }

        let score = self.score(features);
        self.absorb(features);
        score
    }

    /// Anomaly score in [0, 1] without learning.
    ///
    /// 0.0 until the first window rotation: without a reference window
    /// there is no notion of normal to compare against.
    pub fn score(&self, features: &[f64]) -> f64 {
        if self.rotations == 0 || self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| tree.contribution(features, self.size_limit))
            .sum();
        (total / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    fn absorb(&mut self, features: &[f64]) {
        for tree in &mut self.trees {
            tree.learn(features);
        }
        self.points_seen_in_window += 1;
        if self.points_seen_in_window >= self.window_size {
            self.rotate();
        }
    }

    fn rotate(&mut self) {
        for tree in &mut self.trees {
            tree.rotate();
        }
        self.points_seen_in_window = 0;
        self.rotations += 1;
    }

    /// Derive ranges from the buffered window, build, then replay the
    /// buffer so it becomes the first reference window.
    fn finish_bootstrap(&mut self, buffer: Vec<Vec<f64>>, ranges: &[(f64, f64)]) {
        self.build_trees(ranges);
        for point in &buffer {
            self.absorb(point);
        }
    }

    pub fn trees(&self) -> &[PartitionTree] {
        &self.trees
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn tree_count(&self) -> usize {
        self.tree_count
    }

    pub fn tree_height(&self) -> u32 {
        self.tree_height
    }

    pub fn window_size(&self) -> u64 {
        self.window_size
    }

    /// Reference mass below which scoring stops descending
    pub fn size_limit(&self) -> f64 {
        self.size_limit
    }

    pub fn points_seen_in_window(&self) -> u64 {
        self.points_seen_in_window
    }

    /// Completed window rotations since construction
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrap.is_some()
    }
}

/// Padded per-dimension [min, max] over finite coordinates.
fn bootstrap_ranges(points: &[Vec<f64>], dimensions: usize) -> Vec<(f64, f64)> {
    (0..dimensions)
        .map(|dim| {
            let (lo, hi) = points
                .iter()
                .filter_map(|p| p.get(dim).copied())
                .filter(|x| x.is_finite())
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                    (lo.min(x), hi.max(x))
                });
            if lo > hi {
                return (0.0, 0.0);
            }
            let pad = (hi - lo) * BOOTSTRAP_PADDING;
            (lo - pad, hi + pad)
        })
        .collect()
}
