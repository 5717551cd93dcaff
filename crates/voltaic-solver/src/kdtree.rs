//! K-D tree over parameter vectors.
//!
//! Backs the caching solver's warm-start lookup: points are inserted as
//! parameters get solved and queried for the nearest previously-solved
//! parameter. Nodes live in a flat arena and are addressed by index.
//!
//! Long simulations would otherwise grow the tree without bound, so a
//! capacity can be imposed: the oldest entry is retired to make room, and
//! once retired entries outnumber live ones the tree is rebuilt from the
//! live set (retired nodes still occupy arena slots and tree positions
//! until then).

#[derive(Debug, Clone)]
struct Node {
    point: Vec<f64>,
    item: usize,
    seq: usize,
    axis: usize,
    left: Option<usize>,
    right: Option<usize>,
    dead: bool,
}

#[derive(Debug, Clone)]
pub struct KdTree {
    dim: usize,
    nodes: Vec<Node>,
    root: Option<usize>,
    capacity: Option<usize>,
    live: usize,
    dead: usize,
    next_seq: usize,
}

impl KdTree {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            nodes: Vec::new(),
            root: None,
            capacity: None,
            live: 0,
            dead: 0,
            next_seq: 0,
        }
    }

    /// A tree that retires its oldest entry once `capacity` is reached.
    pub fn with_capacity(dim: usize, capacity: usize) -> Self {
        assert!(capacity > 0);
        let mut tree = Self::new(dim);
        tree.capacity = Some(capacity);
        tree
    }

    /// Bulk-build a balanced tree by median split, cycling the axis per
    /// level. Item `i` is `points[i]`.
    pub fn build(dim: usize, points: &[Vec<f64>]) -> Self {
        let mut tree = Self::new(dim);
        let mut entries: Vec<(Vec<f64>, usize, usize)> = points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                assert_eq!(p.len(), dim);
                (p.clone(), i, i)
            })
            .collect();
        tree.next_seq = entries.len();
        tree.live = entries.len();
        tree.root = tree.build_rec(&mut entries, 0);
        tree
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Insert a point, retiring the oldest entry when at capacity.
    /// Returns the retired item, if any.
    pub fn insert(&mut self, point: &[f64], item: usize) -> Option<usize> {
        assert_eq!(point.len(), self.dim);
        let mut evicted = None;
        if let Some(cap) = self.capacity {
            if self.live >= cap {
                evicted = self.retire_oldest();
            }
        }

        let axis = 0;
        let id = self.nodes.len();
        self.nodes.push(Node {
            point: point.to_vec(),
            item,
            seq: self.next_seq,
            axis,
            left: None,
            right: None,
            dead: false,
        });
        self.next_seq += 1;
        self.live += 1;

        match self.root {
            None => self.root = Some(id),
            Some(mut at) => loop {
                let axis = self.nodes[at].axis;
                let go_left = self.dim > 0 && point[axis] < self.nodes[at].point[axis];
                let slot = if go_left {
                    self.nodes[at].left
                } else {
                    self.nodes[at].right
                };
                match slot {
                    Some(next) => at = next,
                    None => {
                        self.nodes[id].axis = if self.dim > 0 {
                            (axis + 1) % self.dim
                        } else {
                            0
                        };
                        if go_left {
                            self.nodes[at].left = Some(id);
                        } else {
                            self.nodes[at].right = Some(id);
                        }
                        break;
                    }
                }
            },
        }

        if self.dead > self.live {
            self.rebuild();
        }
        evicted
    }

    /// Item and squared distance of the live entry closest to `q`.
    pub fn nearest(&self, q: &[f64]) -> Option<(usize, f64)> {
        assert_eq!(q.len(), self.dim);
        let root = self.root?;
        let mut best: Option<(usize, f64)> = None;
        self.nearest_rec(root, q, &mut best);
        best.map(|(id, d)| (self.nodes[id].item, d))
    }

    fn nearest_rec(&self, id: usize, q: &[f64], best: &mut Option<(usize, f64)>) {
        let node = &self.nodes[id];
        if !node.dead {
            let d = dist2(&node.point, q);
            if best.map_or(true, |(_, bd)| d < bd) {
                *best = Some((id, d));
            }
        }
        if self.dim == 0 {
            return;
        }
        let delta = q[node.axis] - node.point[node.axis];
        let (near, far) = if delta < 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };
        if let Some(n) = near {
            self.nearest_rec(n, q, best);
        }
        if let Some(f) = far {
            if best.map_or(true, |(_, bd)| delta * delta <= bd) {
                self.nearest_rec(f, q, best);
            }
        }
    }

    fn retire_oldest(&mut self) -> Option<usize> {
        let oldest = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| !n.dead)
            .min_by_key(|(_, n)| n.seq)
            .map(|(id, _)| id)?;
        self.nodes[oldest].dead = true;
        self.live -= 1;
        self.dead += 1;
        Some(self.nodes[oldest].item)
    }

    fn rebuild(&mut self) {
        let mut entries: Vec<(Vec<f64>, usize, usize)> = self
            .nodes
            .iter()
            .filter(|n| !n.dead)
            .map(|n| (n.point.clone(), n.item, n.seq))
            .collect();
        self.nodes.clear();
        self.root = None;
        self.dead = 0;
        self.live = entries.len();
        self.root = self.build_rec(&mut entries, 0);
    }

    fn build_rec(&mut self, entries: &mut [(Vec<f64>, usize, usize)], depth: usize) -> Option<usize> {
        if entries.is_empty() {
            return None;
        }
        let axis = if self.dim > 0 { depth % self.dim } else { 0 };
        if self.dim > 0 {
            entries.sort_unstable_by(|a, b| {
                a.0[axis]
                    .partial_cmp(&b.0[axis])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        let mid = entries.len() / 2;
        let (lo, rest) = entries.split_at_mut(mid);
        let Some((node_entry, hi)) = rest.split_first_mut() else {
            return None;
        };

        let id = self.nodes.len();
        self.nodes.push(Node {
            point: node_entry.0.clone(),
            item: node_entry.1,
            seq: node_entry.2,
            axis,
            left: None,
            right: None,
            dead: false,
        });
        let left = self.build_rec(lo, depth + 1);
        let right = self.build_rec(hi, depth + 1);
        self.nodes[id].left = left;
        self.nodes[id].right = right;
        Some(id)
    }
}

fn dist2(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
