//! HNSW approximate nearest-neighbor index
//!
//! One index instance per embedding dimension. Multi-layer navigable
//! small-world graph: every node lives on layer 0 with up to 2*M links,
//! higher layers hold a geometrically thinning subset with up to M
//! links. Search greedily descends from the top layer, then beam-searches
//! layer 0. Deletions are soft: removed nodes keep routing the search but
//! never appear in results. Distances are Euclidean (L2).

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};

use crate::error::{DbError, Result};
use crate::types::RowId;

/// Fixed RNG seed keeps graph construction deterministic across runs.
const LEVEL_SEED: u64 = 0x5eed_1e5e;
const MAX_LEVEL: usize = 16;

#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Max connections per layer above 0; layer 0 allows 2*M.
    pub m: usize,
    /// Beam width while building.
    pub ef_construction: usize,
    /// Beam width while searching.
    pub ef_search: usize,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 100,
            ef_search: 64,
        }
    }
}

#[derive(Debug)]
struct HnswNode {
    row_id: RowId,
    vector: Vec<f32>,
    level: usize,
    /// neighbors[layer] = node ids linked at that layer.
    neighbors: Vec<Vec<usize>>,
    deleted: bool,
}

/// Search candidate ordered by distance, ties broken by node id so heap
/// order is total and deterministic.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    id: usize,
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.id.cmp(&other.id))
    }
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub struct HnswIndex {
    dim: usize,
    config: HnswConfig,
    nodes: Vec<HnswNode>,
    by_row: HashMap<RowId, usize>,
    entry: Option<usize>,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(dim: usize) -> Self {
        Self::with_config(dim, HnswConfig::default())
    }

    pub fn with_config(dim: usize, config: HnswConfig) -> Self {
        Self {
            dim,
            config,
            nodes: Vec::new(),
            by_row: HashMap::new(),
            entry: None,
            rng: StdRng::seed_from_u64(LEVEL_SEED),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Live (non-deleted) node count.
    pub fn len(&self) -> usize {
        self.by_row.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_row.is_empty()
    }

    pub fn contains(&self, row_id: RowId) -> bool {
        self.by_row.contains_key(&row_id)
    }

    fn random_level(&mut self) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let u: f64 = self.rng.gen::<f64>().max(f64::MIN_POSITIVE);
        (((-u.ln()) * ml).floor() as usize).min(MAX_LEVEL)
    }

    fn dist_to(&self, query: &[f32], id: usize) -> f32 {
        l2_distance(query, &self.nodes[id].vector)
    }

    /// Insert a vector for a row; re-inserting a row id replaces its
    /// previous vector. Returns the internal node id.
    pub fn insert(&mut self, vector: &[f32], row_id: RowId) -> Result<usize> {
        if vector.len() != self.dim {
            return Err(DbError::DimensionMismatch {
                expected: self.dim,
                actual: vector.len(),
            });
        }
        if self.by_row.contains_key(&row_id) {
            self.remove(row_id);
        }

        let level = self.random_level();
        let id = self.nodes.len();
        self.nodes.push(HnswNode {
            row_id,
            vector: vector.to_vec(),
            level,
            neighbors: vec![Vec::new(); level + 1],
            deleted: false,
        });
        self.by_row.insert(row_id, id);

        let entry = match self.entry {
            Some(e) => e,
            None => {
                self.entry = Some(id);
                return Ok(id);
            }
        };

        let entry_level = self.nodes[entry].level;
        let mut ep = entry;
        for l in ((level + 1)..=entry_level).rev() {
            ep = self.greedy_descend(vector, ep, l);
        }

        for l in (0..=level.min(entry_level)).rev() {
            let found = self.search_layer(vector, ep, self.config.ef_construction, l);
            let max_links = if l == 0 { self.config.m * 2 } else { self.config.m };
            for cand in found.iter().take(max_links) {
                self.nodes[id].neighbors[l].push(cand.id);
                self.nodes[cand.id].neighbors[l].push(id);
                if self.nodes[cand.id].neighbors[l].len() > max_links {
                    self.prune_neighbors(cand.id, l, max_links);
                }
            }
            if let Some(best) = found.first() {
                ep = best.id;
            }
        }

        if level > entry_level {
            self.entry = Some(id);
        }
        Ok(id)
    }

    /// Soft-delete a row's node. The node keeps routing searches but is
    /// excluded from results. Returns whether the row was present.
    pub fn remove(&mut self, row_id: RowId) -> bool {
        match self.by_row.remove(&row_id) {
            Some(id) => {
                self.nodes[id].deleted = true;
                true
            }
            None => false,
        }
    }

    /// K nearest live neighbors by L2 distance, nearest first.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(RowId, f32)>> {
        if query.len() != self.dim {
            return Err(DbError::DimensionMismatch {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let entry = match self.entry {
            Some(e) => e,
            None => return Ok(Vec::new()),
        };
        if k == 0 || self.by_row.is_empty() {
            return Ok(Vec::new());
        }

        let mut ep = entry;
        for l in (1..=self.nodes[entry].level).rev() {
            ep = self.greedy_descend(query, ep, l);
        }

        let ef = self.config.ef_search.max(k);
        let found = self.search_layer(query, ep, ef, 0);
        Ok(found
            .into_iter()
            .filter(|c| !self.nodes[c.id].deleted)
            .take(k)
            .map(|c| (self.nodes[c.id].row_id, c.dist))
            .collect())
    }

    /// Move to the closest neighbor at `level` until no neighbor improves
    /// on the current position.
    fn greedy_descend(&self, query: &[f32], mut ep: usize, level: usize) -> usize {
        loop {
            let mut best = ep;
            let mut best_dist = self.dist_to(query, ep);
            if level < self.nodes[ep].neighbors.len() {
                for &nb in &self.nodes[ep].neighbors[level] {
                    let d = self.dist_to(query, nb);
                    if d < best_dist {
                        best = nb;
                        best_dist = d;
                    }
                }
            }
            if best == ep {
                return ep;
            }
            ep = best;
        }
    }

    /// Beam search at one layer: returns up to `ef` candidates sorted
    /// nearest first. Deleted nodes participate (routing) and are
    /// filtered by callers that produce results.
    fn search_layer(&self, query: &[f32], ep: usize, ef: usize, level: usize) -> Vec<Candidate> {
        let mut visited: HashSet<usize> = HashSet::new();
        visited.insert(ep);

        let start = Candidate {
            dist: self.dist_to(query, ep),
            id: ep,
        };
        // Min-heap of frontier nodes, max-heap of current best ef.
        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        frontier.push(Reverse(start));
        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();
        best.push(start);

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if best.len() >= ef && current.dist > worst {
                break;
            }
            if level >= self.nodes[current.id].neighbors.len() {
                continue;
            }
            for &nb in &self.nodes[current.id].neighbors[level] {
                if !visited.insert(nb) {
                    continue;
                }
                let d = self.dist_to(query, nb);
                let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if best.len() < ef || d < worst {
                    let cand = Candidate { dist: d, id: nb };
                    frontier.push(Reverse(cand));
                    best.push(cand);
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut out = best.into_vec();
        out.sort();
        out
    }

    /// Keep only the `max` closest neighbors of a node at one layer.
    fn prune_neighbors(&mut self, node: usize, level: usize, max: usize) {
        let base = self.nodes[node].vector.clone();
        let mut nbrs = std::mem::take(&mut self.nodes[node].neighbors[level]);
        nbrs.sort_unstable();
        nbrs.dedup();
        nbrs.sort_by(|&a, &b| {
            l2_distance(&base, &self.nodes[a].vector)
                .partial_cmp(&l2_distance(&base, &self.nodes[b].vector))
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.cmp(&b))
        });
        nbrs.truncate(max);
        self.nodes[node].neighbors[level] = nbrs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basis(dim: usize, axis: usize, scale: f32) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[axis] = scale;
        v
    }

    #[test]
    fn test_insert_and_exact_lookup() {
        let mut idx = HnswIndex::new(3);
        idx.insert(&[1.0, 0.0, 0.0], 1).unwrap();
        idx.insert(&[0.0, 1.0, 0.0], 2).unwrap();
        idx.insert(&[0.0, 0.0, 1.0], 3).unwrap();

        let hits = idx.search(&[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let mut idx = HnswIndex::new(4);
        let err = idx.insert(&[1.0, 2.0], 1).unwrap_err();
        assert!(matches!(
            err,
            DbError::DimensionMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert!(idx.search(&[1.0], 1).is_err());
        assert!(idx.is_empty());
    }

    #[test]
    fn test_nearest_ordering() {
        let mut idx = HnswIndex::new(2);
        idx.insert(&[0.0, 0.0], 10).unwrap();
        idx.insert(&[1.0, 0.0], 11).unwrap();
        idx.insert(&[5.0, 0.0], 12).unwrap();

        let hits = idx.search(&[0.2, 0.0], 3).unwrap();
        let ids: Vec<RowId> = hits.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![10, 11, 12]);
        assert!(hits.windows(2).all(|w| w[0].1 <= w[1].1));
    }

    #[test]
    fn test_removed_rows_never_surface() {
        let mut idx = HnswIndex::new(2);
        idx.insert(&[0.0, 0.0], 1).unwrap();
        idx.insert(&[0.1, 0.0], 2).unwrap();
        assert!(idx.remove(1));
        assert!(!idx.remove(1));

        let hits = idx.search(&[0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, 2);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_reinsert_replaces_vector() {
        let mut idx = HnswIndex::new(2);
        idx.insert(&[0.0, 0.0], 1).unwrap();
        idx.insert(&[9.0, 9.0], 1).unwrap();
        assert_eq!(idx.len(), 1);

        let hits = idx.search(&[9.0, 9.0], 1).unwrap();
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 < 1e-6);
    }

    #[test]
    fn test_recall_on_clustered_data() {
        let dim = 8;
        let mut idx = HnswIndex::new(dim);
        // Two clusters far apart plus spread within each.
        for i in 0..40u64 {
            let mut v = basis(dim, (i % 4) as usize, 1.0);
            v[7] = if i < 20 { 0.0 } else { 100.0 };
            v[6] = (i % 5) as f32 * 0.01;
            idx.insert(&v, i).unwrap();
        }

        // Query near the second cluster: every hit must come from it.
        let mut q = vec![0.0; dim];
        q[7] = 100.0;
        let hits = idx.search(&q, 10).unwrap();
        assert_eq!(hits.len(), 10);
        assert!(hits.iter().all(|(id, _)| *id >= 20));
    }

    #[test]
    fn test_empty_index_searches_empty() {
        let idx = HnswIndex::new(2);
        assert!(idx.search(&[0.0, 0.0], 3).unwrap().is_empty());
    }
}
