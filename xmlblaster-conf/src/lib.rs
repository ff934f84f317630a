#![deny(unsafe_code)]

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use anyhow::Result;
use config::{Config, File, FileFormat};
use serde::Deserialize;

use xmlblaster_utils::NodeId;

use self::logging::Log;

pub use self::options::Options;
pub use self::properties::Properties;

pub mod logging;
pub mod options;
pub mod properties;

#[derive(Clone)]
pub struct Settings(Arc<Inner>);

#[derive(Debug, Clone, Deserialize)]
pub struct Inner {
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip)]
    pub opts: Options,
}

impl Deref for Settings {
    type Target = Inner;
    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl Settings {
    pub fn new(opts: Options) -> Result<Self> {
        let mut builder = Config::builder()
            .add_source(File::with_name("/etc/xmlblaster/xmlblaster").required(false))
            .add_source(File::with_name("xmlblaster").required(false));

        if let Some(cfg) = opts.cfg_name.as_ref() {
            builder = builder.add_source(File::with_name(cfg).required(false));
        }

        builder = builder
            .add_source(config::Environment::with_prefix("xmlblaster").separator("__").try_parsing(true));
        Self::build(builder.build()?.try_deserialize()?, opts)
    }

    /// Settings from an in-memory TOML document, environment variables are not consulted.
    pub fn from_toml(text: &str, opts: Options) -> Result<Self> {
        let inner: Inner =
            Config::builder().add_source(File::from_str(text, FileFormat::Toml)).build()?.try_deserialize()?;
        Self::build(inner, opts)
    }

    fn build(mut inner: Inner, opts: Options) -> Result<Self> {
        //Command line configuration overriding file configuration
        if let Some(id) = opts.node_id.as_ref() {
            inner.node.id.clone_from(id);
        }
        inner.opts = opts;
        Ok(Self(Arc::new(inner)))
    }

    /// The node id used for `key[nodeId]` property overrides, `None` if not configured.
    #[inline]
    pub fn node_id(&self) -> Option<&str> {
        if self.node.id.is_empty() {
            None
        } else {
            Some(self.node.id.as_str())
        }
    }

    #[inline]
    pub fn logs(&self) {
        log::debug!("Config info is {:?}", self.0);
        log::info!("node_id is {:?}", self.node_id());
        log::info!("log config is {:?}", self.log);
        log::info!("{} properties configured", self.properties.len());
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Settings ...")?;
        Ok(())
    }
}

#[derive(Default, Debug, Clone, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub id: NodeId,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CFG: &str = r#"
[node]
id = "heron"

[log]
to = "file"
level = "debug"

[properties]
"dispatch/connection/delay" = 5000
"dispatch/connection/delay[heron]" = "1s"
"queue/connection/maxEntries" = "20"
"#;

    #[test]
    fn test_from_toml() {
        let settings = Settings::from_toml(CFG, Options::default()).expect("Settings creation failed");
        assert_eq!(settings.node_id(), Some("heron"));
        assert!(settings.log.to.file());
        assert_eq!(*settings.log.level, slog::Level::Debug);
        assert_eq!(settings.properties.get("dispatch/connection/delay"), Some("5000"));
        assert_eq!(settings.properties.get_node("dispatch/connection/delay", "heron"), Some("1s"));
        assert_eq!(settings.properties.get("queue/connection/maxentries"), Some("20"));
    }

    #[test]
    fn test_node_id_override() {
        let test_cases = [(Some("avalon"), Some("avalon")), (None, Some("heron"))];

        for (node_id, expected) in test_cases {
            let opts = Options { node_id: node_id.map(String::from), ..Default::default() };
            let settings = Settings::from_toml(CFG, opts).expect("Settings creation failed");
            assert_eq!(settings.node_id(), expected, "Expected node ID {:?}", expected);
        }
    }

    #[test]
    fn test_empty() {
        let settings = Settings::from_toml("", Options::default()).expect("Settings creation failed");
        assert_eq!(settings.node_id(), None);
        assert!(settings.properties.is_empty());
        assert!(settings.log.to.console());
    }
}
