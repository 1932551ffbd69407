use geo::{LineString, Point};
use petgraph::stable_graph::NodeIndex;

use crate::graph::line::{Direction, LineIx, LineOcc};

/// Payload of a line graph edge: the track geometry and the lines running
/// along it, in drawing order.
#[derive(Debug, Clone)]
pub struct LineEdgePl {
    pub geom: LineString<f64>,
    pub lines: Vec<LineOcc>,
    pub dont_contract: bool,
}

impl LineEdgePl {
    pub fn new(geom: LineString<f64>) -> Self {
        LineEdgePl {
            geom,
            lines: Vec::new(),
            dont_contract: false,
        }
    }

    /// Straight two-point geometry between `a` and `b`.
    pub fn straight(a: Point<f64>, b: Point<f64>) -> Self {
        Self::new(LineString::from(vec![(a.x(), a.y()), (b.x(), b.y())]))
    }

    pub fn has_line(&self, line: LineIx) -> bool {
        self.lines.iter().any(|o| o.line == line)
    }

    pub fn line_occ(&self, line: LineIx) -> Option<&LineOcc> {
        self.lines.iter().find(|o| o.line == line)
    }

    /// Adds an occurrence, folding duplicates. A directed duplicate of an
    /// occurrence already present undirected (or directed the other way)
    /// degrades to bidirectional.
    pub fn add_line(&mut self, occ: LineOcc) {
        match self.lines.iter_mut().find(|o| o.line == occ.line) {
            None => self.lines.push(occ),
            Some(present) => {
                if present.direction != occ.direction {
                    present.direction = Direction::Both;
                }
            }
        }
    }

    /// Rewrites directions pointing at `old` to point at `new`.
    pub(crate) fn replace_direction_node(&mut self, old: NodeIndex, new: NodeIndex) {
        for occ in &mut self.lines {
            if occ.direction == Direction::Toward(old) {
                occ.direction = Direction::Toward(new);
            }
        }
    }
}
