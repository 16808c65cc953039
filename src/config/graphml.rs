//! Minimal GraphML topology parser (spec §6.1): vertices and directed
//! edges carrying latency/reliability weights, loaded into a [`Topology`].
//!
//! The full GraphML `<data key="...">` indirection is collapsed to plain
//! attributes read directly off `<node>`/`<edge>` elements — `id`,
//! `latency`, `reliability` on nodes; `source`, `target`, `weight`,
//! `reliability` (plus optional `reverseweight`/`reversereliability` for
//! asymmetric links) on edges. See DESIGN.md for why.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::cdf::Cdf;
use crate::error::ConfigError;
use crate::graph::{DirectedWeight, NetworkEdge, NetworkVertex, Topology, VertexId};

/// Floor under which no sampled latency is allowed, mirroring the
/// scheduler's own runahead floor (spec: "latency samples >= runahead
/// floor").
const DEFAULT_FLOOR: Duration = Duration::from_nanos(1);

fn attr(tag: &BytesStart, name: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn require_attr(tag: &BytesStart, path: &Path, element: &str, name: &str) -> Result<String, ConfigError> {
    attr(tag, name).ok_or_else(|| ConfigError::MissingAttribute {
        path: path.to_path_buf(),
        element: element.to_string(),
        attribute: name.to_string(),
    })
}

fn parse_ms(value: &str, path: &Path, element: &str, attribute: &str) -> Result<Duration, ConfigError> {
    let ms: f64 = value.parse().map_err(|_| ConfigError::Malformed {
        path: path.to_path_buf(),
        element: element.to_string(),
        message: format!("`{attribute}` is not a number: {value}"),
    })?;
    Ok(Duration::from_nanos((ms.max(0.0) * 1_000_000.0) as u64))
}

fn parse_prob(value: &str, path: &Path, element: &str, attribute: &str) -> Result<f64, ConfigError> {
    value.parse().map_err(|_| ConfigError::Malformed {
        path: path.to_path_buf(),
        element: element.to_string(),
        message: format!("`{attribute}` is not a number: {value}"),
    })
}

fn local_name(tag: &BytesStart) -> String {
    let bytes = tag.name();
    let s = std::str::from_utf8(bytes.as_ref()).unwrap_or("");
    s.rsplit(':').next().unwrap_or(s).to_string()
}

pub fn parse_topology(path: &Path, xml: &str) -> Result<Topology, ConfigError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut topo = Topology::new();
    let mut vertex_ids: HashMap<String, VertexId> = HashMap::new();
    let mut next_vertex = 0u32;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ConfigError::Malformed {
                path: path.to_path_buf(),
                element: "<graphml>".to_string(),
                message: e.to_string(),
            })?;
        match &event {
            Event::Start(tag) | Event::Empty(tag) => match local_name(tag).as_str() {
                "node" => {
                    let id = require_attr(tag, path, "node", "id")?;
                    let vertex_id = VertexId(next_vertex);
                    next_vertex += 1;
                    let latency = match attr(tag, "latency") {
                        Some(v) => parse_ms(&v, path, "node", "latency")?,
                        None => Duration::ZERO,
                    };
                    let reliability = match attr(tag, "reliability") {
                        Some(v) => parse_prob(&v, path, "node", "reliability")?,
                        None => 1.0,
                    };
                    topo.add_vertex(NetworkVertex::new(
                        vertex_id,
                        Cdf::new(latency, Duration::ZERO, 1.0, DEFAULT_FLOOR),
                        reliability,
                    ));
                    vertex_ids.insert(id, vertex_id);
                }
                "edge" => {
                    let source = require_attr(tag, path, "edge", "source")?;
                    let target = require_attr(tag, path, "edge", "target")?;
                    let a = *vertex_ids.get(&source).ok_or_else(|| ConfigError::Malformed {
                        path: path.to_path_buf(),
                        element: "edge".to_string(),
                        message: format!("unknown source vertex `{source}`"),
                    })?;
                    let b = *vertex_ids.get(&target).ok_or_else(|| ConfigError::Malformed {
                        path: path.to_path_buf(),
                        element: "edge".to_string(),
                        message: format!("unknown target vertex `{target}`"),
                    })?;
                    let weight = require_attr(tag, path, "edge", "weight")?;
                    let forward_latency = parse_ms(&weight, path, "edge", "weight")?;
                    let reliability = match attr(tag, "reliability") {
                        Some(v) => parse_prob(&v, path, "edge", "reliability")?,
                        None => 1.0,
                    };
                    let reverse_latency = match attr(tag, "reverseweight") {
                        Some(v) => parse_ms(&v, path, "edge", "reverseweight")?,
                        None => forward_latency,
                    };
                    let reverse_reliability = match attr(tag, "reversereliability") {
                        Some(v) => parse_prob(&v, path, "edge", "reversereliability")?,
                        None => reliability,
                    };
                    topo.add_edge(NetworkEdge {
                        a,
                        b,
                        a_to_b: DirectedWeight::new(
                            Cdf::new(forward_latency, Duration::ZERO, 1.0, DEFAULT_FLOOR),
                            reliability,
                        ),
                        b_to_a: DirectedWeight::new(
                            Cdf::new(reverse_latency, Duration::ZERO, 1.0, DEFAULT_FLOOR),
                            reverse_reliability,
                        ),
                    })
                    .map_err(|e| ConfigError::Malformed {
                        path: path.to_path_buf(),
                        element: "edge".to_string(),
                        message: e.to_string(),
                    })?;
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(topo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn builds_vertices_and_directed_edge_weights() {
        let xml = r#"
            <graphml>
              <graph edgedefault="directed">
                <node id="n0" reliability="1.0"/>
                <node id="n1" reliability="1.0"/>
                <edge source="n0" target="n1" weight="50" reliability="0.99"/>
              </graph>
            </graphml>
        "#;
        let topo = parse_topology(Path::new("topo.graphml"), xml).unwrap();
        assert_eq!(topo.vertices().count(), 2);
    }

    #[test]
    fn unknown_edge_endpoint_is_malformed() {
        let xml = r#"
            <graphml>
              <node id="n0"/>
              <edge source="n0" target="missing" weight="1"/>
            </graphml>
        "#;
        let err = parse_topology(Path::new("topo.graphml"), xml).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed { .. }));
    }

    #[test]
    fn missing_weight_is_reported() {
        let xml = r#"
            <graphml>
              <node id="n0"/>
              <node id="n1"/>
              <edge source="n0" target="n1"/>
            </graphml>
        "#;
        let err = parse_topology(Path::new("topo.graphml"), xml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttribute { .. }));
    }
}
