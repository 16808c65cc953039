//! The `<shadow>` configuration document and its embedded or referenced
//! GraphML topology (spec §6.1). The XML document is the producer; this
//! module is the consumer that turns it into the boot-time data the
//! master needs — node declarations, applications, the kill time, and the
//! topology graph.

pub mod graphml;
pub mod shadow;

pub use graphml::parse_topology;
pub use shadow::{ApplicationSpec, NodeSpec, PluginSpec, ShadowConfig};
