use std::fmt;
use std::ops::Deref;

use xmlblaster_conf::Properties;

/// Where the current value of a [`Prop`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PropOrigin {
    /// Hard coded constant
    Default,
    /// Global `key` property
    Config,
    /// Node specific `key[nodeId]` property
    NodeConfig,
    /// Set explicitly, by a setter or the parsed xml
    Setter,
}

/// A configurable value that remembers whether it still holds its default.
#[derive(Clone, PartialEq)]
pub struct Prop<T> {
    value: T,
    origin: PropOrigin,
}

impl<T> Prop<T> {
    #[inline]
    pub fn new(default: T) -> Self {
        Self { value: default, origin: PropOrigin::Default }
    }

    #[inline]
    pub fn with_origin(value: T, origin: PropOrigin) -> Self {
        Self { value, origin }
    }

    #[inline]
    pub fn get(&self) -> &T {
        &self.value
    }

    #[inline]
    pub fn set(&mut self, value: T) {
        self.value = value;
        self.origin = PropOrigin::Setter;
    }

    #[inline]
    pub fn set_from(&mut self, value: T, origin: PropOrigin) {
        self.value = value;
        self.origin = origin;
    }

    #[inline]
    pub fn origin(&self) -> PropOrigin {
        self.origin
    }

    /// True if the value was configured or set, false if it is the hard coded default.
    #[inline]
    pub fn is_modified(&self) -> bool {
        self.origin != PropOrigin::Default
    }

    #[inline]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T: Copy> Prop<T> {
    #[inline]
    pub fn value(&self) -> T {
        self.value
    }
}

impl<T> Deref for Prop<T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T: Default> Default for Prop<T> {
    #[inline]
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for Prop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({:?})", self.value, self.origin)
    }
}

impl<T: fmt::Display> fmt::Display for Prop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.value.fmt(f)
    }
}

/// Picks the value with the highest precedence:
/// explicit > `key[nodeId]` > `key` > constant.
#[inline]
pub fn resolve<T>(explicit: Option<T>, node_override: Option<T>, global: Option<T>, constant: T) -> Prop<T> {
    if let Some(v) = explicit {
        Prop::with_origin(v, PropOrigin::Setter)
    } else if let Some(v) = node_override {
        Prop::with_origin(v, PropOrigin::NodeConfig)
    } else if let Some(v) = global {
        Prop::with_origin(v, PropOrigin::Config)
    } else {
        Prop::new(constant)
    }
}

/// Lookup of the properties below one prefix, e.g. `dispatch/connection/`.
#[derive(Clone, Copy)]
pub struct PropertyScope<'a> {
    props: &'a Properties,
    node_id: Option<&'a str>,
    prefix: &'a str,
}

impl<'a> PropertyScope<'a> {
    #[inline]
    pub fn new(props: &'a Properties, node_id: Option<&'a str>, prefix: &'a str) -> Self {
        Self { props, node_id, prefix }
    }

    #[inline]
    pub fn prefix(&self) -> &str {
        self.prefix
    }

    fn parsed<T>(&self, key: &str, raw: Option<&str>, parse: &dyn Fn(&str) -> Option<T>) -> Option<T> {
        let raw = raw?;
        let v = parse(raw);
        if v.is_none() {
            log::warn!("property '{}{}' has an invalid value '{}', ignored", self.prefix, key, raw);
        }
        v
    }

    /// Value of `<prefix><key>[nodeId]`
    pub fn node<T>(&self, key: &str, parse: &dyn Fn(&str) -> Option<T>) -> Option<T> {
        let node_id = self.node_id?;
        let full = format!("{}{}", self.prefix, key);
        self.parsed(key, self.props.get_node(&full, node_id), parse)
    }

    /// Value of `<prefix><key>`
    pub fn global<T>(&self, key: &str, parse: &dyn Fn(&str) -> Option<T>) -> Option<T> {
        let full = format!("{}{}", self.prefix, key);
        self.parsed(key, self.props.get(&full), parse)
    }

    /// Resolves `key` without explicit value, falling back to `constant`.
    #[inline]
    pub fn resolve<T>(&self, key: &str, parse: &dyn Fn(&str) -> Option<T>, constant: T) -> Prop<T> {
        resolve(None, self.node(key, parse), self.global(key, parse), constant)
    }

    /// Overwrites `prop` with the configured value, if there is one.
    pub fn apply<T>(&self, prop: &mut Prop<T>, key: &str, parse: &dyn Fn(&str) -> Option<T>) {
        if let Some(v) = self.node(key, parse) {
            prop.set_from(v, PropOrigin::NodeConfig);
        } else if let Some(v) = self.global(key, parse) {
            prop.set_from(v, PropOrigin::Config);
        }
    }
}

#[inline]
pub fn parse_millis(v: &str) -> Option<i64> {
    xmlblaster_utils::to_millis(v)
}

#[inline]
pub fn parse_bytes(v: &str) -> Option<i64> {
    xmlblaster_utils::to_bytes(v)
}

#[inline]
pub fn parse_i32(v: &str) -> Option<i32> {
    v.trim().parse().ok()
}

#[inline]
pub fn parse_i64(v: &str) -> Option<i64> {
    v.trim().parse().ok()
}

#[inline]
pub fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[inline]
pub fn parse_string(v: &str) -> Option<String> {
    Some(v.trim().to_owned())
}
