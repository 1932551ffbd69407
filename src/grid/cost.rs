use std::ops::{Add, AddAssign, Index, IndexMut};

/// Additional cost per port direction, written onto the sink edges of one
/// grid node before a shortest-path run and removed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NodeCost([f64; 8]);

impl NodeCost {
    pub fn zero() -> Self {
        NodeCost::default()
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|c| *c == 0.0)
    }
}

impl Index<u8> for NodeCost {
    type Output = f64;

    fn index(&self, dir: u8) -> &f64 {
        &self.0[dir as usize]
    }
}

impl IndexMut<u8> for NodeCost {
    fn index_mut(&mut self, dir: u8) -> &mut f64 {
        &mut self.0[dir as usize]
    }
}

impl Add for NodeCost {
    type Output = NodeCost;

    fn add(self, rhs: NodeCost) -> NodeCost {
        let mut out = self;
        out += rhs;
        out
    }
}

impl AddAssign for NodeCost {
    fn add_assign(&mut self, rhs: NodeCost) {
        for (a, b) in self.0.iter_mut().zip(rhs.0) {
            *a += b;
        }
    }
}

/// Folds a directed 45°-step difference into the 0..=4 range
/// (0 = same direction, 4 = opposite).
pub fn fold_steps(a: u8, b: u8) -> u8 {
    let d = (8 + a as i16 - b as i16) as u8 % 8;
    d.min(8 - d)
}
