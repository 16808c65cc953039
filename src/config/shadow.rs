//! The `<shadow>` document schema (spec §6.1): plugin images, node
//! declarations and their applications, the topology reference, and the
//! simulation kill time.

use std::path::{Path, PathBuf};
use std::str;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub enum TopologySource {
    Path(PathBuf),
    Inline(String),
}

#[derive(Debug, Clone)]
pub struct PluginSpec {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ApplicationSpec {
    pub plugin: String,
    pub arguments: Vec<String>,
    pub start_time_secs: f64,
    pub stop_time_secs: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub id: String,
    pub iphint: Option<String>,
    pub geocodehint: Option<String>,
    pub typehint: Option<String>,
    pub quantity: u32,
    pub bandwidth_down_kibps: u64,
    pub bandwidth_up_kibps: u64,
    pub cpu_frequency_khz: u64,
    pub heartbeat_frequency_secs: Option<f64>,
    pub log_level: Option<String>,
    pub heartbeat_log_level: Option<String>,
    pub heartbeat_log_info: Option<String>,
    pub log_pcap: bool,
    pub pcap_dir: Option<PathBuf>,
    pub socket_recv_buffer: Option<u64>,
    pub socket_send_buffer: Option<u64>,
    pub interface_buffer: Option<u64>,
    pub applications: Vec<ApplicationSpec>,
}

#[derive(Debug, Clone)]
pub struct ShadowConfig {
    pub topology: Option<TopologySource>,
    pub plugins: Vec<PluginSpec>,
    pub nodes: Vec<NodeSpec>,
    pub kill_time_secs: Option<f64>,
}

fn attr_str(tag: &BytesStart, _path: &Path, _element: &str, name: &str) -> Option<String> {
    tag.attributes().flatten().find_map(|a| {
        if a.key.as_ref() == name.as_bytes() {
            a.unescape_value().ok().map(|v| v.into_owned())
        } else {
            None
        }
    })
}

fn require_attr(
    tag: &BytesStart,
    path: &Path,
    element: &str,
    name: &str,
) -> Result<String, ConfigError> {
    attr_str(tag, path, element, name).ok_or_else(|| ConfigError::MissingAttribute {
        path: path.to_path_buf(),
        element: element.to_string(),
        attribute: name.to_string(),
    })
}

fn parse_u64(
    value: &str,
    path: &Path,
    element: &str,
    attribute: &str,
) -> Result<u64, ConfigError> {
    value.parse().map_err(|_| ConfigError::Malformed {
        path: path.to_path_buf(),
        element: element.to_string(),
        message: format!("`{attribute}` is not an integer: {value}"),
    })
}

fn parse_f64(
    value: &str,
    path: &Path,
    element: &str,
    attribute: &str,
) -> Result<f64, ConfigError> {
    value.parse().map_err(|_| ConfigError::Malformed {
        path: path.to_path_buf(),
        element: element.to_string(),
        message: format!("`{attribute}` is not a number: {value}"),
    })
}

fn parse_node(tag: &BytesStart, path: &Path) -> Result<NodeSpec, ConfigError> {
    let id = require_attr(tag, path, "node", "id")?;
    let quantity = match attr_str(tag, path, "node", "quantity") {
        Some(v) => parse_u64(&v, path, "node", "quantity")? as u32,
        None => 1,
    };
    let bandwidth_down_kibps = match attr_str(tag, path, "node", "bandwidthdown") {
        Some(v) => parse_u64(&v, path, "node", "bandwidthdown")?,
        None => 0,
    };
    let bandwidth_up_kibps = match attr_str(tag, path, "node", "bandwidthup") {
        Some(v) => parse_u64(&v, path, "node", "bandwidthup")?,
        None => 0,
    };
    let cpu_frequency_khz = match attr_str(tag, path, "node", "cpufrequency") {
        Some(v) => parse_u64(&v, path, "node", "cpufrequency")?,
        None => 0,
    };
    let heartbeat_frequency_secs = attr_str(tag, path, "node", "heartbeatfrequency")
        .map(|v| parse_f64(&v, path, "node", "heartbeatfrequency"))
        .transpose()?;
    let log_pcap = attr_str(tag, path, "node", "logpcap")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);
    let socket_recv_buffer = attr_str(tag, path, "node", "socketrecvbuffer")
        .map(|v| parse_u64(&v, path, "node", "socketrecvbuffer"))
        .transpose()?;
    let socket_send_buffer = attr_str(tag, path, "node", "socketsendbuffer")
        .map(|v| parse_u64(&v, path, "node", "socketsendbuffer"))
        .transpose()?;
    let interface_buffer = attr_str(tag, path, "node", "interfacebuffer")
        .map(|v| parse_u64(&v, path, "node", "interfacebuffer"))
        .transpose()?;
    Ok(NodeSpec {
        id,
        iphint: attr_str(tag, path, "node", "iphint"),
        geocodehint: attr_str(tag, path, "node", "geocodehint"),
        typehint: attr_str(tag, path, "node", "typehint"),
        quantity,
        bandwidth_down_kibps,
        bandwidth_up_kibps,
        cpu_frequency_khz,
        heartbeat_frequency_secs,
        log_level: attr_str(tag, path, "node", "loglevel"),
        heartbeat_log_level: attr_str(tag, path, "node", "heartbeatloglevel"),
        heartbeat_log_info: attr_str(tag, path, "node", "heartbeatloginfo"),
        log_pcap,
        pcap_dir: attr_str(tag, path, "node", "pcapdir").map(PathBuf::from),
        socket_recv_buffer,
        socket_send_buffer,
        interface_buffer,
        applications: Vec::new(),
    })
}

fn parse_application(tag: &BytesStart, path: &Path) -> Result<ApplicationSpec, ConfigError> {
    let plugin = require_attr(tag, path, "application", "plugin")?;
    let arguments = attr_str(tag, path, "application", "arguments")
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let start_time_secs =
        parse_f64(&require_attr(tag, path, "application", "starttime")?, path, "application", "starttime")?;
    let stop_time_secs = attr_str(tag, path, "application", "stoptime")
        .map(|v| parse_f64(&v, path, "application", "stoptime"))
        .transpose()?;
    Ok(ApplicationSpec {
        plugin,
        arguments,
        start_time_secs,
        stop_time_secs,
    })
}

fn parse_plugin(tag: &BytesStart, path: &Path) -> Result<PluginSpec, ConfigError> {
    Ok(PluginSpec {
        id: require_attr(tag, path, "plugin", "id")?,
        path: PathBuf::from(require_attr(tag, path, "plugin", "path")?),
    })
}

pub fn parse(path: &Path, xml: &str) -> Result<ShadowConfig, ConfigError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut config = ShadowConfig {
        topology: None,
        plugins: Vec::new(),
        nodes: Vec::new(),
        kill_time_secs: None,
    };
    let mut current_node: Option<NodeSpec> = None;
    let mut awaiting_topology_body = false;
    let mut buf = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| ConfigError::Malformed {
                path: path.to_path_buf(),
                element: "<xml>".to_string(),
                message: e.to_string(),
            })?;
        let is_empty = matches!(event, Event::Empty(_));
        match event {
            Event::Start(tag) | Event::Empty(tag) => {
                match local_name(&tag).as_str() {
                    "topology" => {
                        if let Some(p) = attr_str(&tag, path, "topology", "path") {
                            config.topology = Some(TopologySource::Path(PathBuf::from(p)));
                        } else if !is_empty {
                            awaiting_topology_body = true;
                        }
                    }
                    "plugin" => config.plugins.push(parse_plugin(&tag, path)?),
                    "node" => {
                        let node = parse_node(&tag, path)?;
                        if is_empty {
                            config.nodes.push(node);
                        } else {
                            current_node = Some(node);
                        }
                    }
                    "application" => {
                        let app = parse_application(&tag, path)?;
                        if let Some(node) = current_node.as_mut() {
                            node.applications.push(app);
                        }
                    }
                    "kill" => {
                        let time = require_attr(&tag, path, "kill", "time")?;
                        config.kill_time_secs = Some(parse_f64(&time, path, "kill", "time")?);
                    }
                    _ => {}
                }
            }
            Event::CData(text) if awaiting_topology_body => {
                let body = str::from_utf8(text.as_ref())
                    .map_err(|_| ConfigError::Malformed {
                        path: path.to_path_buf(),
                        element: "topology".to_string(),
                        message: "inline GraphML body is not valid UTF-8".to_string(),
                    })?
                    .to_string();
                config.topology = Some(TopologySource::Inline(body));
            }
            Event::End(tag) => match local_name_bytes(tag.name().as_ref()).as_str() {
                "topology" => awaiting_topology_body = false,
                "node" => {
                    if let Some(node) = current_node.take() {
                        config.nodes.push(node);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(config)
}

fn local_name(tag: &BytesStart) -> String {
    local_name_bytes(tag.name().as_ref())
}

fn local_name_bytes(name: &[u8]) -> String {
    let name = str::from_utf8(name).unwrap_or("");
    name.rsplit(':').next().unwrap_or(name).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_with_applications_and_kill() {
        let xml = r#"
            <shadow>
              <plugin id="echo" path="/usr/lib/echo.so"/>
              <topology path="/etc/shadow/topology.graphml"/>
              <node id="server" quantity="1" bandwidthdown="10240" bandwidthup="10240" cpufrequency="2000000">
                <application plugin="echo" arguments="--port 80" starttime="0" stoptime="60"/>
              </node>
              <kill time="120"/>
            </shadow>
        "#;
        let config = parse(Path::new("test.xml"), xml).unwrap();
        assert_eq!(config.plugins.len(), 1);
        assert_eq!(config.plugins[0].id, "echo");
        assert_eq!(config.nodes.len(), 1);
        assert_eq!(config.nodes[0].applications.len(), 1);
        assert_eq!(config.nodes[0].applications[0].start_time_secs, 0.0);
        assert_eq!(config.kill_time_secs, Some(120.0));
        assert!(matches!(config.topology, Some(TopologySource::Path(_))));
    }

    #[test]
    fn parses_inline_graphml_topology() {
        let xml = r#"
            <shadow>
              <topology><![CDATA[<graphml/>]]></topology>
            </shadow>
        "#;
        let config = parse(Path::new("test.xml"), xml).unwrap();
        match config.topology {
            Some(TopologySource::Inline(body)) => assert!(body.contains("graphml")),
            other => panic!("expected inline topology, got {other:?}"),
        }
    }

    #[test]
    fn missing_required_attribute_is_reported() {
        let xml = r#"<shadow><node quantity="1"/></shadow>"#;
        let err = parse(Path::new("test.xml"), xml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingAttribute { .. }));
    }
}
