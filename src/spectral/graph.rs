//! Token co-occurrence graph.

use std::collections::{BTreeMap, BTreeSet};

use super::power::SymmetricOperator;
use crate::text::Context;

/// Weighted undirected graph with nodes in lexicographic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CooccurrenceGraph {
    nodes: Vec<String>,
    /// Sparse adjacency rows, `(neighbor index, weight)`, both directions stored.
    adjacency: Vec<Vec<(usize, f64)>>,
    edge_count: usize,
}

impl CooccurrenceGraph {
    /// Every pair of kept tokens fewer than `window` positions apart in the
    /// filtered sequence adds 1 to their edge. Identical tokens never pair.
    /// Tokens in `term_tokens` are always kept, whatever their length.
    pub fn build<'a, I>(
        contexts: I,
        term_tokens: &[String],
        window: usize,
        min_token_len: usize,
        stopwords: &BTreeSet<String>,
    ) -> Self
    where
        I: IntoIterator<Item = &'a Context>,
    {
        let mut counts: BTreeMap<(String, String), u64> = BTreeMap::new();
        let mut nodes: BTreeSet<String> = BTreeSet::new();

        for ctx in contexts {
            let kept: Vec<&String> = ctx
                .tokens
                .iter()
                .filter(|t| {
                    term_tokens.contains(*t)
                        || (t.chars().count() >= min_token_len && !stopwords.contains(t.as_str()))
                })
                .collect();
            nodes.extend(kept.iter().map(|t| (*t).clone()));

            for (left, a) in kept.iter().enumerate() {
                let right_edge = (left + window).min(kept.len());
                for b in kept.iter().take(right_edge).skip(left + 1) {
                    if a == b {
                        continue;
                    }
                    let key = if a < b {
                        ((*a).clone(), (*b).clone())
                    } else {
                        ((*b).clone(), (*a).clone())
                    };
                    *counts.entry(key).or_insert(0) += 1;
                }
            }
        }

        let nodes: Vec<String> = nodes.into_iter().collect();
        let index: BTreeMap<&str, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let mut adjacency = vec![Vec::new(); nodes.len()];
        for ((a, b), w) in &counts {
            let (ia, ib) = (index[a.as_str()], index[b.as_str()]);
            adjacency[ia].push((ib, *w as f64));
            adjacency[ib].push((ia, *w as f64));
        }

        Self {
            nodes,
            adjacency,
            edge_count: counts.len(),
        }
    }

    /// Induced subgraph on the nodes within `hops` edges of any seed token.
    /// Empty when no seed is a node.
    pub fn ego(&self, seeds: &[String], hops: usize) -> Self {
        let mut keep = vec![false; self.nodes.len()];
        let mut frontier: Vec<usize> = seeds.iter().filter_map(|s| self.position(s)).collect();
        for &i in &frontier {
            keep[i] = true;
        }
        for _ in 0..hops {
            let mut next = Vec::new();
            for &i in &frontier {
                for &(j, _) in &self.adjacency[i] {
                    if !keep[j] {
                        keep[j] = true;
                        next.push(j);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        // old index -> new index; kept nodes stay in lexicographic order
        let mut remap = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::new();
        for (i, n) in self.nodes.iter().enumerate() {
            if keep[i] {
                remap[i] = nodes.len();
                nodes.push(n.clone());
            }
        }
        let mut adjacency = vec![Vec::new(); nodes.len()];
        let mut directed = 0usize;
        for (i, row) in self.adjacency.iter().enumerate() {
            if !keep[i] {
                continue;
            }
            for &(j, w) in row {
                if keep[j] {
                    adjacency[remap[i]].push((remap[j], w));
                    directed += 1;
                }
            }
        }

        Self {
            nodes,
            adjacency,
            edge_count: directed / 2,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Weight of the edge between two tokens, 0 when absent.
    pub fn weight(&self, a: &str, b: &str) -> f64 {
        let (Some(ia), Some(ib)) = (self.position(a), self.position(b)) else {
            return 0.0;
        };
        self.adjacency[ia]
            .iter()
            .find(|(j, _)| *j == ib)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }

    fn position(&self, token: &str) -> Option<usize> {
        self.nodes.binary_search_by(|n| n.as_str().cmp(token)).ok()
    }
}

/// `A + I`. Shifting by the identity keeps the dominant eigenvalue positive, so
/// bipartite graphs (spectrum symmetric around 0) still converge.
pub struct ShiftedAdjacency<'a>(pub &'a CooccurrenceGraph);

impl SymmetricOperator for ShiftedAdjacency<'_> {
    fn dim(&self) -> usize {
        self.0.node_count()
    }

    fn apply(&self, v: &[f64], out: &mut [f64]) {
        for (i, o) in out.iter_mut().enumerate() {
            let mut acc = v[i];
            for &(j, w) in &self.0.adjacency[i] {
                acc += w * v[j];
            }
            *o = acc;
        }
    }
}
