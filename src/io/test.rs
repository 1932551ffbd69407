use serde_json::json;

use crate::graph::Direction;
use crate::io::{dot, geojson, obstacles};

const SAMPLE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0.0, 0.0]},
     "properties": {"id": "n1", "station_id": "s1", "station_label": "Alpha"}},
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [10.0, 0.0]},
     "properties": {"id": "n2", "not_serving": ["u2"],
                    "excluded_line_conns": [{"route": "u1", "edge1_node": "n1", "edge2_node": "n3"}]}},
    {"type": "Feature", "geometry": {"type": "Point", "coordinates": [20.0, 0.0]},
     "properties": {"id": "n3", "station_id": "s3", "station_label": "Gamma"}},
    {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [10.0, 0.0]]},
     "properties": {"from": "n1", "to": "n2",
                    "lines": [{"id": "u1", "label": "U1", "color": "ff0000", "direction": "n2"},
                              {"id": "u2"}]}},
    {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[10.0, 0.0], [20.0, 0.0]]},
     "properties": {"from": "n2", "to": "n3", "dontcontract": 1,
                    "lines": [{"id": "u1"}]}}
  ]
}"#;

#[test]
fn geojson_reader_builds_the_graph() {
    let lg = geojson::read_line_graph(SAMPLE.as_bytes()).expect("parses");

    assert_eq!(lg.num_nds(), 3);
    assert_eq!(lg.num_edgs(), 2);
    assert_eq!(lg.num_lines(), 2);

    let stations = lg
        .nodes()
        .filter(|&n| !lg.node(n).stops.is_empty())
        .count();
    assert_eq!(stations, 2);

    let u1 = lg.line_by_id("u1").expect("line u1");
    let u2 = lg.line_by_id("u2").expect("line u2");
    assert_eq!(lg.line(u1).color.as_deref(), Some("ff0000"));

    // the one-way occurrence points at n2
    let first = lg
        .edges()
        .find(|&e| lg.edge(e).has_line(u2))
        .expect("first edge");
    let occ = lg.edge(first).line_occ(u1).expect("u1 on first edge");
    assert!(matches!(occ.direction, Direction::Toward(_)));

    // not_serving resolved to the line registry
    let n2 = lg
        .nodes()
        .find(|&n| lg.deg(n) == 2)
        .expect("middle node");
    assert!(lg.node(n2).not_served.contains(&u2));

    // the connection exception cuts u1 at the middle node
    let inc = lg.incident(n2);
    assert!(!lg.line_continues(u1, n2, inc[0], inc[1]));
}

#[test]
fn geojson_reader_rejects_broken_references() {
    let doc = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "geometry": {"type": "Point", "coordinates": [0, 0]},
         "properties": {"id": "n1"}},
        {"type": "Feature", "geometry": {"type": "LineString", "coordinates": [[0,0],[1,1]]},
         "properties": {"from": "n1", "to": "ghost", "lines": []}}
      ]
    }"#;
    assert!(geojson::read_line_graph(doc.as_bytes()).is_err());
}

#[test]
fn geojson_roundtrip_keeps_structure_and_statistics() {
    let lg = geojson::read_line_graph(SAMPLE.as_bytes()).expect("parses");
    let mut buf = Vec::new();
    geojson::write_line_graph(&lg, json!({"scores": {"total_score": 1.5}}), &mut buf)
        .expect("writes");

    let text = String::from_utf8(buf).expect("utf8");
    let reread = geojson::read_line_graph(text.as_bytes()).expect("re-parses");
    assert_eq!(reread.num_nds(), lg.num_nds());
    assert_eq!(reread.num_edgs(), lg.num_edgs());
    assert_eq!(reread.num_lines(), lg.num_lines());

    let doc: serde_json::Value = text.parse::<serde_json::Value>().expect("json");
    assert_eq!(doc["statistics"]["scores"]["total_score"], json!(1.5));
}

#[test]
fn dot_reader_understands_digraphs() {
    let doc = r#"
digraph tram {
  a [pos="0,0", station_id="sa", label="Alpha"];
  b [pos="100,0"];
  c [pos="200,50", station_id="sc", label="Gamma"];
  a -> b [id="t1", color="blue"];
  b -> c [id="t1", color="blue"];
  c -> a [id="t2"];
}
"#;
    let lg = dot::read_line_graph(doc.as_bytes()).expect("parses");

    assert_eq!(lg.num_nds(), 3);
    assert_eq!(lg.num_edgs(), 3);
    assert_eq!(lg.num_lines(), 2);

    let t1 = lg.line_by_id("t1").expect("line t1");
    assert_eq!(lg.line(t1).color.as_deref(), Some("blue"));
    // every digraph occurrence is one-way
    for e in lg.edges() {
        for occ in &lg.edge(e).lines {
            assert!(matches!(occ.direction, Direction::Toward(_)));
        }
    }
}

#[test]
fn dot_reader_reports_undeclared_nodes() {
    let doc = "graph g { a [pos=\"0,0\"]; a -- ghost; }";
    assert!(dot::read_line_graph(doc.as_bytes()).is_err());
}

#[test]
fn obstacle_reader_collects_polygons() {
    let doc = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature", "geometry": {"type": "Polygon",
          "coordinates": [[[0,0],[4,0],[4,4],[0,4],[0,0]]]}, "properties": {}},
        {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1,1]},
         "properties": {}}
      ]
    }"#;
    let polys = obstacles::read_obstacles(doc.as_bytes()).expect("parses");
    assert_eq!(polys.len(), 1);
    use geo::Intersects;
    assert!(polys[0].intersects(&geo::Point::new(2.0, 2.0)));
}
