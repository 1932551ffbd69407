//! GraphViz DOT input. Nodes carry `pos="x,y"` and optionally
//! `station_id` / `label`; edges carry `id`, `label` or `color` naming the
//! line. A `digraph` edge direction is read as the line direction.

use std::io::Read;

use geo::Point;
use log::warn;
use rustc_hash::FxHashMap;

use crate::graph::{Line, LineEdgePl, LineGraph, LineNodeIx, LineNodePl, LineOcc, Stop};
use crate::io::InputError;

/// Reads a line graph from DOT text.
pub fn read_line_graph<R: Read>(mut r: R) -> Result<LineGraph, InputError> {
    let mut raw = String::new();
    r.read_to_string(&mut raw)
        .map_err(|e| InputError::malformed("unreadable input", e.to_string()))?;

    let directed = raw
        .lines()
        .find(|l| !l.trim_start().starts_with("//") && !l.trim().is_empty())
        .is_some_and(|l| l.trim_start().starts_with("digraph"));

    let body = raw
        .find('{')
        .and_then(|open| raw.rfind('}').map(|close| &raw[open + 1..close]))
        .ok_or_else(|| InputError::malformed("no graph body", "DOT input"))?;

    let mut lg = LineGraph::new();
    let mut nodes: FxHashMap<String, LineNodeIx> = FxHashMap::default();

    for (lineno, stmt) in split_statements(body) {
        let stmt = stmt.trim();
        if stmt.is_empty() || stmt.starts_with("//") || stmt.starts_with('#') {
            continue;
        }
        let (head, attrs) = split_attrs(stmt)
            .map_err(|what| InputError::malformed(what, format!("line {lineno}")))?;

        let arrow = if directed { "->" } else { "--" };
        if let Some((a, b)) = head.split_once(arrow) {
            let (a, b) = (unquote(a.trim()), unquote(b.trim()));
            let (Some(&from), Some(&to)) = (nodes.get(&a), nodes.get(&b)) else {
                return Err(InputError::malformed(
                    "edge references undeclared node",
                    format!("line {lineno}: {a} {arrow} {b}"),
                ));
            };
            if from == to {
                warn!("dropping self-loop at `{a}` (line {lineno})");
                continue;
            }
            let line_id = attrs
                .get("id")
                .or_else(|| attrs.get("label"))
                .or_else(|| attrs.get("color"))
                .cloned()
                .unwrap_or_else(|| "line".to_string());
            let mut line = Line::new(line_id);
            line.label = attrs.get("label").cloned();
            line.color = attrs.get("color").cloned();
            let lix = lg.add_line(line);

            let e = lg.find_edge(from, to);
            let occ = if directed {
                LineOcc::directed(lix, to)
            } else {
                LineOcc::new(lix)
            };
            match e {
                Some(e) => lg.edge_mut(e).add_line(occ),
                None => {
                    let mut pl = LineEdgePl::straight(lg.node(from).geom, lg.node(to).geom);
                    pl.add_line(occ);
                    lg.add_edge(from, to, pl);
                }
            }
        } else {
            let id = unquote(head.trim());
            if id.is_empty() || id == "graph" || id == "node" || id == "edge" {
                continue;
            }
            let pos = attrs
                .get("pos")
                .ok_or_else(|| InputError::malformed("node without pos", format!("line {lineno}: {id}")))?;
            let (x, y) = pos
                .split_once(',')
                .and_then(|(x, y)| Some((x.trim().parse::<f64>().ok()?, y.trim().parse::<f64>().ok()?)))
                .ok_or_else(|| {
                    InputError::malformed("non-numeric pos", format!("line {lineno}: {id}"))
                })?;
            let geom = Point::new(x, y);
            let mut pl = LineNodePl::at(geom);
            if let Some(sid) = attrs.get("station_id") {
                pl.stops.push(Stop {
                    id: sid.clone(),
                    label: attrs.get("label").cloned().unwrap_or_default(),
                    geom,
                });
            }
            nodes.insert(id, lg.add_node(pl));
        }
    }

    Ok(lg)
}

/// Splits the body into `;`/newline-separated statements with line numbers.
fn split_statements(body: &str) -> Vec<(usize, String)> {
    let mut out = Vec::new();
    let mut lineno = 1usize;
    let mut cur = String::new();
    let mut in_quote = false;
    for c in body.chars() {
        match c {
            '"' => {
                in_quote = !in_quote;
                cur.push(c);
            }
            ';' | '\n' if !in_quote => {
                if !cur.trim().is_empty() {
                    out.push((lineno, std::mem::take(&mut cur)));
                } else {
                    cur.clear();
                }
                if c == '\n' {
                    lineno += 1;
                }
            }
            _ => cur.push(c),
        }
    }
    if !cur.trim().is_empty() {
        out.push((lineno, cur));
    }
    out
}

/// Splits `head [k=v, k=v]` into the head and its attribute map.
fn split_attrs(stmt: &str) -> Result<(&str, FxHashMap<String, String>), &'static str> {
    let mut attrs = FxHashMap::default();
    let Some(open) = stmt.find('[') else {
        return Ok((stmt, attrs));
    };
    let close = stmt.rfind(']').ok_or("unterminated attribute list")?;
    let head = &stmt[..open];
    for part in split_on_commas(&stmt[open + 1..close]) {
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        attrs.insert(k.trim().to_string(), unquote(v.trim()));
    }
    Ok((head, attrs))
}

fn split_on_commas(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '"' => depth = !depth,
            ',' if !depth => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn unquote(s: &str) -> String {
    s.trim().trim_matches('"').to_string()
}
