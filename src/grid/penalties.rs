use serde::{Deserialize, Serialize};

/// Cost configuration of the grid search.
///
/// Turn penalties are keyed by the angle left between the incoming and the
/// outgoing segment: a straight continuation (180°) is free, `p_135` prices
/// the gentle 45° direction change, `p_45` the sharp one, and `p_0` the full
/// U-turn, which can only occur between two edges meeting at a station.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Penalties {
    pub p_0: f64,
    pub p_45: f64,
    pub p_90: f64,
    pub p_135: f64,

    /// Per-direction hop cost multipliers. Diagonal hops additionally pay
    /// their longer geometric length, which keeps axis-aligned routings
    /// preferred on ties.
    pub horizontal_pen: f64,
    pub vertical_pen: f64,
    pub diagonal_pen: f64,

    /// Added to grid edges running parallel to an already-settled edge in
    /// the neighboring cell row.
    pub density_pen: f64,
}

impl Default for Penalties {
    fn default() -> Self {
        Penalties {
            p_0: 6.0,
            p_45: 3.0,
            p_90: 2.5,
            p_135: 2.0,
            horizontal_pen: 1.0,
            vertical_pen: 1.0,
            diagonal_pen: 1.0,
            density_pen: 0.5,
        }
    }
}

impl Penalties {
    /// Hop cost of a primary grid edge in direction `dir` (0 = east,
    /// counterclockwise), per cell of length.
    pub fn dir_cost(&self, dir: u8) -> f64 {
        match dir % 4 {
            0 => self.horizontal_pen,
            2 => self.vertical_pen,
            _ => self.diagonal_pen * std::f64::consts::SQRT_2,
        }
    }

    /// Turn penalty for a direction change of `steps` × 45°
    /// (0 = straight, 4 = U-turn).
    pub fn turn_cost(&self, steps: u8) -> f64 {
        match steps {
            0 => 0.0,
            1 => self.p_135,
            2 => self.p_90,
            3 => self.p_45,
            _ => self.p_0,
        }
    }

    /// Displacement penalty per grid cell a station is moved away from its
    /// geographic position.
    pub fn move_pen_per_grid(&self) -> f64 {
        5.0 + (self.p_45 - self.p_135) + self.diagonal_pen.max(self.horizontal_pen)
    }

    /// Penalty of two comb edges leaving a station `steps` × 45° apart.
    /// With the default configuration this yields the sequence
    /// 3, 2.5, 2, 1 for 45°, 90°, 135°, 180°.
    pub fn node_angle_cost(&self, steps: u8) -> f64 {
        match steps.min(8 - steps) {
            0 => self.p_0,
            1 => self.p_45,
            2 => self.p_90,
            3 => self.p_135,
            _ => self.p_135 / 2.0,
        }
    }
}
