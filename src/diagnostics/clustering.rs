//! Complete-linkage agglomerative clustering

use ndarray::Array2;

use crate::error::{ReportError, Result};

/// One agglomeration step. Node ids below the number of leaves are leaves;
/// id `n + k` is the cluster formed by merge `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dendrogram {
    pub n_leaves: usize,
    pub merges: Vec<Merge>,
    /// Leaves in drawing order
    pub order: Vec<usize>,
}

impl Dendrogram {
    /// Horizontal position of a node in leaf-order units and its height
    pub fn node_position(&self, node: usize) -> (f64, f64) {
        if node < self.n_leaves {
            let pos = self.order.iter().position(|&l| l == node).unwrap_or(node);
            return (pos as f64, 0.0);
        }
        let merge = &self.merges[node - self.n_leaves];
        let (xl, _) = self.node_position(merge.left);
        let (xr, _) = self.node_position(merge.right);
        ((xl + xr) / 2.0, merge.height)
    }

    pub fn max_height(&self) -> f64 {
        self.merges.iter().map(|m| m.height).fold(0.0, f64::max)
    }
}

/// Complete linkage on a symmetric distance matrix. The closest pair is
/// merged first, ties going to the lowest indices; singletons are placed
/// left of clusters and older clusters left of newer ones.
pub fn hierarchical_clustering(distances: &Array2<f64>) -> Result<Dendrogram> {
    let n = distances.nrows();
    if n == 0 || distances.ncols() != n {
        return Err(ReportError::DimensionMismatch {
            expected: "a non-empty square distance matrix".to_string(),
            got: format!("{} x {}", distances.nrows(), distances.ncols()),
        });
    }

    // active clusters as (node id, member leaves)
    let mut clusters: Vec<(usize, Vec<usize>)> = (0..n).map(|i| (i, vec![i])).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while clusters.len() > 1 {
        let mut best = (0, 1, f64::INFINITY);
        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let d = clusters[a]
                    .1
                    .iter()
                    .flat_map(|&i| clusters[b].1.iter().map(move |&j| distances[[i, j]]))
                    .fold(f64::NEG_INFINITY, f64::max);
                if d < best.2 {
                    best = (a, b, d);
                }
            }
        }

        let (a, b, height) = best;
        let (id_b, members_b) = clusters.remove(b);
        let (id_a, mut members_a) = clusters.remove(a);
        let (left, right) = if id_a <= id_b { (id_a, id_b) } else { (id_b, id_a) };
        members_a.extend(members_b);
        merges.push(Merge { left, right, height });
        clusters.push((n + merges.len() - 1, members_a));
    }

    let mut order = Vec::with_capacity(n);
    let root = if merges.is_empty() { 0 } else { n + merges.len() - 1 };
    collect_leaves(root, n, &merges, &mut order);
    Ok(Dendrogram {
        n_leaves: n,
        merges,
        order,
    })
}

fn collect_leaves(node: usize, n: usize, merges: &[Merge], out: &mut Vec<usize>) {
    if node < n {
        out.push(node);
        return;
    }
    let merge = &merges[node - n];
    collect_leaves(merge.left, n, merges, out);
    collect_leaves(merge.right, n, merges, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn distances() -> Array2<f64> {
        // two tight pairs {0, 2} and {1, 3}
        array![
            [0.0, 9.0, 1.0, 8.0],
            [9.0, 0.0, 7.0, 2.0],
            [1.0, 7.0, 0.0, 6.0],
            [8.0, 2.0, 6.0, 0.0]
        ]
    }

    #[test]
    fn test_complete_linkage_heights() {
        let tree = hierarchical_clustering(&distances()).unwrap();
        let heights: Vec<f64> = tree.merges.iter().map(|m| m.height).collect();
        assert_eq!(heights, vec![1.0, 2.0, 9.0]);
        assert_eq!(tree.merges[0], Merge { left: 0, right: 2, height: 1.0 });
    }

    #[test]
    fn test_leaf_order_is_permutation() {
        let tree = hierarchical_clustering(&distances()).unwrap();
        let mut sorted = tree.order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![0, 1, 2, 3]);
        assert_eq!(tree.order, vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_node_positions() {
        let tree = hierarchical_clustering(&distances()).unwrap();
        assert_eq!(tree.node_position(4), (0.5, 1.0));
        assert_eq!(tree.node_position(6), (1.5, 9.0));
        assert_eq!(tree.max_height(), 9.0);
    }

    #[test]
    fn test_single_sample() {
        let tree = hierarchical_clustering(&array![[0.0]]).unwrap();
        assert!(tree.merges.is_empty());
        assert_eq!(tree.order, vec![0]);
    }
}
