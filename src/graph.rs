//! Undirected weighted graph with Dijkstra shortest path
//!
//! Assigned area scoring wants the *longest* path through a layered graph of
//! achieved points. Every path from the start layer to the finish layer has
//! the same hop count, so weighting each edge `LONGEST_PATH_CONSTANT - d`
//! turns the shortest path into the longest real-distance path. The real
//! length is recovered with [`Graph::path_length`].

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;

/// Larger than any plausible single hop in km
pub const LONGEST_PATH_CONSTANT: f64 = 1000.0;

/// Weight for an edge that should be maximised
pub fn maximizing_weight(distance_km: f64) -> f64 {
    LONGEST_PATH_CONSTANT - distance_km
}

#[derive(Debug, Clone)]
pub struct Graph<N> {
    adjacency: HashMap<N, HashMap<N, f64>>,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self {
            adjacency: HashMap::new(),
        }
    }
}

struct QueueEntry<N> {
    cost: f64,
    node: N,
}

impl<N: Ord> PartialEq for QueueEntry<N> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<N: Ord> Eq for QueueEntry<N> {}

impl<N: Ord> PartialOrd for QueueEntry<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<N: Ord> Ord for QueueEntry<N> {
    // BinaryHeap is a max-heap, so invert cost; node order breaks ties
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl<N> Graph<N>
where
    N: Eq + Hash + Ord + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, node: N) {
        self.adjacency.entry(node).or_default();
    }

    /// Add (or replace) an undirected edge
    pub fn add_link(&mut self, a: N, b: N, weight: f64) {
        debug_assert!(weight >= 0.0, "negative edge weight {weight}");
        self.adjacency
            .entry(a.clone())
            .or_default()
            .insert(b.clone(), weight);
        self.adjacency.entry(b).or_default().insert(a, weight);
    }

    /// Add an edge only if it does not exist yet; the weight is computed lazily
    pub fn add_link_if_missing<F>(&mut self, a: N, b: N, weight: F)
    where
        F: FnOnce() -> f64,
    {
        if !self.has_link(&a, &b) {
            self.add_link(a, b, weight());
        }
    }

    pub fn remove_link(&mut self, a: &N, b: &N) {
        if let Some(links) = self.adjacency.get_mut(a) {
            links.remove(b);
        }
        if let Some(links) = self.adjacency.get_mut(b) {
            links.remove(a);
        }
    }

    /// Remove a vertex and every edge touching it
    pub fn remove_vertex(&mut self, node: &N) {
        if let Some(links) = self.adjacency.remove(node) {
            for neighbour in links.keys() {
                if let Some(back) = self.adjacency.get_mut(neighbour) {
                    back.remove(node);
                }
            }
        }
    }

    pub fn has_link(&self, a: &N, b: &N) -> bool {
        self.adjacency
            .get(a)
            .map(|links| links.contains_key(b))
            .unwrap_or(false)
    }

    pub fn contains(&self, node: &N) -> bool {
        self.adjacency.contains_key(node)
    }

    pub fn weight(&self, a: &N, b: &N) -> Option<f64> {
        self.adjacency.get(a).and_then(|links| links.get(b)).copied()
    }

    pub fn vertex_count(&self) -> usize {
        self.adjacency.len()
    }

    pub fn link_count(&self) -> usize {
        self.adjacency.values().map(|links| links.len()).sum::<usize>() / 2
    }

    /// Dijkstra from `start` to `finish`.
    ///
    /// Returns the nodes from `finish` back to `start`, or an empty vector when
    /// `finish` is unreachable.
    pub fn shortest_path(&self, start: &N, finish: &N) -> Vec<N> {
        if !self.contains(start) || !self.contains(finish) {
            return Vec::new();
        }

        let mut costs: HashMap<N, f64> = HashMap::new();
        let mut previous: HashMap<N, N> = HashMap::new();
        let mut queue = BinaryHeap::new();

        costs.insert(start.clone(), 0.0);
        queue.push(QueueEntry {
            cost: 0.0,
            node: start.clone(),
        });

        while let Some(QueueEntry { cost, node }) = queue.pop() {
            if &node == finish {
                break;
            }
            if costs.get(&node).is_some_and(|&best| cost > best) {
                continue;
            }
            let Some(links) = self.adjacency.get(&node) else {
                continue;
            };
            for (neighbour, weight) in links {
                let candidate = cost + weight;
                let better = costs
                    .get(neighbour)
                    .is_none_or(|&existing| candidate < existing);
                if better {
                    costs.insert(neighbour.clone(), candidate);
                    previous.insert(neighbour.clone(), node.clone());
                    queue.push(QueueEntry {
                        cost: candidate,
                        node: neighbour.clone(),
                    });
                }
            }
        }

        if !costs.contains_key(finish) {
            return Vec::new();
        }

        let mut path = vec![finish.clone()];
        let mut current = finish;
        while current != start {
            match previous.get(current) {
                Some(prev) => {
                    path.push(prev.clone());
                    current = prev;
                }
                None => return Vec::new(),
            }
        }
        path
    }

    /// Sum of edge weights along a path as returned by `shortest_path`
    pub fn path_weight(&self, path: &[N]) -> Option<f64> {
        path.windows(2)
            .map(|pair| self.weight(&pair[0], &pair[1]))
            .sum()
    }

    /// Real distance along a path whose edges all carry `maximizing_weight`
    pub fn path_length(&self, path: &[N]) -> Option<f64> {
        path.windows(2)
            .map(|pair| {
                self.weight(&pair[0], &pair[1])
                    .map(|w| LONGEST_PATH_CONSTANT - w)
            })
            .sum()
    }
}
