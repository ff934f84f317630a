use xmlblaster_utils::NodeId;

/// Values given on the command line, they take precedence over the configuration files.
#[derive(Debug, Clone, Default)]
pub struct Options {
    //Additional configuration file, e.g. "client.toml"
    pub cfg_name: Option<String>,
    pub node_id: Option<NodeId>,
}
