//! GeoJSON input and output. Stations are `Point` features, track
//! segments `LineString` features carrying a `lines` array; the output
//! attaches the run statistics as a `statistics` foreign member.

use std::io::{Read, Write};

use geo::{LineString, Point};
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject, JsonValue, Value};
use log::warn;
use rustc_hash::FxHashMap;
use serde_json::json;

use crate::graph::{
    Direction, Line, LineEdgePl, LineGraph, LineNodeIx, LineNodePl, LineOcc, Stop,
};
use crate::grid::{GridEdgeKind, GridGraph};
use crate::io::InputError;

/// Reads a line graph from a GeoJSON `FeatureCollection`.
pub fn read_line_graph<R: Read>(mut r: R) -> Result<LineGraph, InputError> {
    let mut raw = String::new();
    r.read_to_string(&mut raw)
        .map_err(|e| InputError::malformed("unreadable input", e.to_string()))?;
    let gj: GeoJson = raw
        .parse()
        .map_err(|e| InputError::malformed("invalid GeoJSON", format!("{e}")))?;
    let GeoJson::FeatureCollection(fc) = gj else {
        return Err(InputError::malformed(
            "expected a FeatureCollection",
            "top level",
        ));
    };

    let mut lg = LineGraph::new();
    let mut nodes_by_id: FxHashMap<String, LineNodeIx> = FxHashMap::default();
    // deferred per-node properties that reference edges
    let mut pending_not_serving: Vec<(LineNodeIx, Vec<String>)> = Vec::new();
    let mut pending_excl: Vec<(LineNodeIx, Vec<JsonValue>)> = Vec::new();

    for feature in &fc.features {
        let Some(geom) = &feature.geometry else {
            continue;
        };
        let Value::Point(coords) = &geom.value else {
            continue;
        };
        let props = feature.properties.as_ref();
        let id = prop_string(props, "id")
            .ok_or_else(|| InputError::malformed("station without `id`", "Point feature"))?;
        if coords.len() < 2 {
            return Err(InputError::malformed("station without coordinates", id));
        }
        let geom = Point::new(coords[0], coords[1]);

        let mut pl = LineNodePl::at(geom);
        if let Some(sid) = prop_string(props, "station_id") {
            pl.stops.push(Stop {
                id: sid,
                label: prop_string(props, "station_label").unwrap_or_default(),
                geom,
            });
        }
        let nd = lg.add_node(pl);
        if let Some(ns) = props.and_then(|p| p.get("not_serving")).and_then(|v| v.as_array()) {
            let ids = ns.iter().filter_map(|v| json_string(v)).collect();
            pending_not_serving.push((nd, ids));
        }
        if let Some(ex) = props
            .and_then(|p| p.get("excluded_line_conns"))
            .and_then(|v| v.as_array())
        {
            pending_excl.push((nd, ex.clone()));
        }
        nodes_by_id.insert(id, nd);
    }

    for feature in &fc.features {
        let Some(geom) = &feature.geometry else {
            continue;
        };
        let Value::LineString(coords) = &geom.value else {
            continue;
        };
        let props = feature.properties.as_ref();
        let from_id = prop_string(props, "from")
            .ok_or_else(|| InputError::malformed("edge without `from`", "LineString feature"))?;
        let to_id = prop_string(props, "to")
            .ok_or_else(|| InputError::malformed("edge without `to`", "LineString feature"))?;
        let from = *nodes_by_id
            .get(&from_id)
            .ok_or_else(|| InputError::malformed("edge references unknown node", from_id.clone()))?;
        let to = *nodes_by_id
            .get(&to_id)
            .ok_or_else(|| InputError::malformed("edge references unknown node", to_id.clone()))?;
        if from == to {
            warn!("dropping self-loop edge at node {from_id}");
            continue;
        }

        let geom: LineString<f64> = coords
            .iter()
            .map(|c| {
                if c.len() < 2 {
                    Err(InputError::malformed(
                        "non-numeric coordinate",
                        format!("edge {from_id}-{to_id}"),
                    ))
                } else {
                    Ok((c[0], c[1]))
                }
            })
            .collect::<Result<Vec<_>, _>>()?
            .into();

        let mut pl = LineEdgePl::new(geom);
        pl.dont_contract = props
            .and_then(|p| p.get("dontcontract"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            != 0;

        let lines = props
            .and_then(|p| p.get("lines"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for line in lines {
            let Some(lid) = line.get("id").and_then(json_string) else {
                return Err(InputError::malformed(
                    "line without `id`",
                    format!("edge {from_id}-{to_id}"),
                ));
            };
            let lix = lg.add_line(Line {
                id: lid.clone(),
                label: line.get("label").and_then(json_string),
                color: line.get("color").and_then(json_string),
            });
            let direction = match line.get("direction").and_then(json_string) {
                None => Direction::Both,
                Some(d) => match nodes_by_id.get(&d) {
                    Some(&nd) if nd == from || nd == to => Direction::Toward(nd),
                    _ => {
                        warn!("line {lid}: direction `{d}` is not an endpoint, ignoring");
                        Direction::Both
                    }
                },
            };
            pl.add_line(LineOcc {
                line: lix,
                direction,
                style: line.get("style").and_then(json_string),
                outline_style: line.get("outline-style").and_then(json_string),
            });
        }
        lg.add_edge(from, to, pl);
    }

    // resolve the deferred node properties now that edges and lines exist
    for (nd, ids) in pending_not_serving {
        for id in ids {
            match lg.line_by_id(&id) {
                Some(lix) => {
                    lg.node_mut(nd).not_served.insert(lix);
                }
                None => warn!("not_serving references unknown line `{id}`, skipping"),
            }
        }
    }
    for (nd, entries) in pending_excl {
        for entry in entries {
            let line = entry.get("route").and_then(json_string);
            let n1 = entry.get("edge1_node").and_then(json_string);
            let n2 = entry.get("edge2_node").and_then(json_string);
            let (Some(line), Some(n1), Some(n2)) = (line, n1, n2) else {
                warn!("incomplete excluded_line_conns entry, skipping");
                continue;
            };
            let Some(lix) = lg.line_by_id(&line) else {
                warn!("excluded_line_conns references unknown line `{line}`, skipping");
                continue;
            };
            let ea = nodes_by_id.get(&n1).and_then(|&m| lg.find_edge(nd, m));
            let eb = nodes_by_id.get(&n2).and_then(|&m| lg.find_edge(nd, m));
            let (Some(ea), Some(eb)) = (ea, eb) else {
                warn!("excluded_line_conns references missing edges at `{n1}`/`{n2}`, skipping");
                continue;
            };
            lg.node_mut(nd).exclude_conn(lix, ea, eb);
        }
    }

    Ok(lg)
}

/// Writes the line graph as a GeoJSON `FeatureCollection` with `stats`
/// attached as the `statistics` foreign member.
pub fn write_line_graph<W: Write>(
    lg: &LineGraph,
    stats: serde_json::Value,
    w: &mut W,
) -> std::io::Result<()> {
    let mut features = Vec::new();

    for n in lg.nodes() {
        let pl = lg.node(n);
        let mut props = JsonObject::new();
        props.insert("id".into(), json!(n.index()));
        if let Some(stop) = pl.stops.first() {
            props.insert("station_id".into(), json!(stop.id));
            props.insert("station_label".into(), json!(stop.label));
        }
        if !pl.not_served.is_empty() {
            let mut ids: Vec<&str> = pl
                .not_served
                .iter()
                .map(|&l| lg.line(l).id.as_str())
                .collect();
            ids.sort();
            props.insert("not_serving".into(), json!(ids));
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(Value::Point(vec![
                pl.geom.x(),
                pl.geom.y(),
            ]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    for e in lg.edges() {
        let (from, to) = lg.endpoints(e);
        let pl = lg.edge(e);
        let mut props = JsonObject::new();
        props.insert("from".into(), json!(from.index()));
        props.insert("to".into(), json!(to.index()));
        let lines: Vec<JsonValue> = pl
            .lines
            .iter()
            .map(|occ| {
                let line = lg.line(occ.line);
                let mut o = JsonObject::new();
                o.insert("id".into(), json!(line.id));
                if let Some(label) = &line.label {
                    o.insert("label".into(), json!(label));
                }
                if let Some(color) = &line.color {
                    o.insert("color".into(), json!(color));
                }
                if let Direction::Toward(nd) = occ.direction {
                    o.insert("direction".into(), json!(nd.index()));
                }
                JsonValue::Object(o)
            })
            .collect();
        props.insert("lines".into(), JsonValue::Array(lines));
        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(Value::LineString(
                pl.geom.0.iter().map(|c| vec![c.x, c.y]).collect(),
            ))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    let mut foreign = JsonObject::new();
    foreign.insert("statistics".into(), stats);
    let fc = FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    };
    writeln!(w, "{}", GeoJson::from(fc))
}

/// Debug view of the grid graph: sinks as points, primary edges as
/// segments with their current costs.
pub fn write_grid_graph<W: Write>(
    gg: &GridGraph,
    stats: serde_json::Value,
    w: &mut W,
) -> std::io::Result<()> {
    let mut features = Vec::new();
    for s in gg.sinks() {
        let nd = gg.node(s);
        let mut props = JsonObject::new();
        props.insert("id".into(), json!(s.0));
        props.insert("cell".into(), json!([nd.x, nd.y]));
        if let Some(cn) = gg.settled_comb_of(s) {
            props.insert("station".into(), json!(cn.index()));
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(Value::Point(vec![
                nd.pos.x(),
                nd.pos.y(),
            ]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }
    for e in gg.edge_indices() {
        let edge = gg.edge(e);
        if !matches!(edge.kind(), GridEdgeKind::Primary { .. }) || edge.twin() < e {
            continue;
        }
        let a = gg.node(edge.from_nd()).pos;
        let b = gg.node(edge.to_nd()).pos;
        let mut props = JsonObject::new();
        props.insert("cost".into(), json!(edge.cost()));
        if let Some(ce) = edge.used_by() {
            props.insert("used_by".into(), json!(ce.index()));
        }
        features.push(Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(Value::LineString(vec![
                vec![a.x(), a.y()],
                vec![b.x(), b.y()],
            ]))),
            id: None,
            properties: Some(props),
            foreign_members: None,
        });
    }

    let mut foreign = JsonObject::new();
    foreign.insert("statistics".into(), stats);
    let fc = FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign),
    };
    writeln!(w, "{}", GeoJson::from(fc))
}

fn prop_string(props: Option<&JsonObject>, key: &str) -> Option<String> {
    props.and_then(|p| p.get(key)).and_then(json_string)
}

/// Ids may arrive as strings or numbers; normalize to strings.
fn json_string(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
