use petgraph::stable_graph::NodeIndex;

/// Index of a [`Line`] in the graph's line registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LineIx(pub u32);

/// A transit line (route) occurring on one or more edges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub id: String,
    pub label: Option<String>,
    pub color: Option<String>,
}

impl Line {
    pub fn new(id: impl Into<String>) -> Self {
        Line {
            id: id.into(),
            label: None,
            color: None,
        }
    }
}

/// Travel direction of a line occurrence on an edge.
///
/// `Toward(n)` marks a one-way line flowing toward the endpoint `n` of the
/// carrying edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Both,
    Toward(NodeIndex),
}

/// One line running along one edge.
#[derive(Debug, Clone, PartialEq)]
pub struct LineOcc {
    pub line: LineIx,
    pub direction: Direction,
    pub style: Option<String>,
    pub outline_style: Option<String>,
}

impl LineOcc {
    pub fn new(line: LineIx) -> Self {
        LineOcc {
            line,
            direction: Direction::Both,
            style: None,
            outline_style: None,
        }
    }

    pub fn directed(line: LineIx, toward: NodeIndex) -> Self {
        LineOcc {
            line,
            direction: Direction::Toward(toward),
            style: None,
            outline_style: None,
        }
    }
}
