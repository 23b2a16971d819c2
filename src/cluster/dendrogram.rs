//! Merge history of agglomerative clustering.
//!
//! Leaves are `0..n`; the i-th merge creates cluster id `n + i`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single merge operation in the dendrogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Merge {
    /// First cluster being merged (index).
    pub cluster_a: usize,
    /// Second cluster being merged (index).
    pub cluster_b: usize,
    /// Dissimilarity at which the merge occurred.
    pub distance: f64,
    /// Size of resulting cluster.
    pub size: usize,
}

/// A dendrogram representing hierarchical cluster merges, in merge order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dendrogram {
    merges: Vec<Merge>,
    n_items: usize,
}

impl Dendrogram {
    /// Create a new dendrogram for n items.
    pub fn new(n_items: usize) -> Self {
        Self {
            merges: Vec::with_capacity(n_items.saturating_sub(1)),
            n_items,
        }
    }

    /// Record a merge operation.
    pub fn add_merge(&mut self, cluster_a: usize, cluster_b: usize, distance: f64, size: usize) {
        self.merges.push(Merge {
            cluster_a,
            cluster_b,
            distance,
            size,
        });
    }

    /// Labels for exactly `k` clusters: replay the first `n - k` merges.
    ///
    /// Labels are numbered by first appearance in item order, so item 0 is
    /// always in cluster 0.
    pub fn cut_to_k(&self, k: usize) -> Result<Vec<usize>> {
        if k == 0 || k > self.n_items {
            return Err(Error::InvalidClusterCount {
                requested: k,
                n_items: self.n_items,
            });
        }
        let n_merges = self.n_items - k;
        if n_merges > self.merges.len() {
            return Err(Error::InvalidClusterCount {
                requested: k,
                n_items: self.n_items,
            });
        }

        // Union-find over leaves and internal nodes.
        let mut parent: Vec<usize> = (0..self.n_items + n_merges).collect();
        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for (i, merge) in self.merges.iter().take(n_merges).enumerate() {
            let new_id = self.n_items + i;
            let a = find(&mut parent, merge.cluster_a);
            let b = find(&mut parent, merge.cluster_b);
            parent[a] = new_id;
            parent[b] = new_id;
        }

        let mut renumber: Vec<Option<usize>> = vec![None; parent.len()];
        let mut next = 0;
        let mut labels = Vec::with_capacity(self.n_items);
        for item in 0..self.n_items {
            let root = find(&mut parent, item);
            let label = *renumber[root].get_or_insert_with(|| {
                next += 1;
                next - 1
            });
            labels.push(label);
        }
        Ok(labels)
    }

    /// Number of original items.
    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Number of merges recorded.
    pub fn n_merges(&self) -> usize {
        self.merges.len()
    }

    /// Iterate over merges.
    pub fn merges(&self) -> impl Iterator<Item = &Merge> {
        self.merges.iter()
    }

    /// Merge heights, in merge order.
    pub fn distances(&self) -> Vec<f64> {
        self.merges.iter().map(|m| m.distance).collect()
    }
}
