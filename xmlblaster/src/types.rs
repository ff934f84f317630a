use std::fmt;
use std::str::FromStr;

use base64::prelude::{Engine, BASE64_STANDARD};
use bytes::Bytes;

use crate::error::{Result, XmlBlasterError};
use crate::qos::MsgQosData;
use crate::xml::{escape, write_attr};

/// Values of `<state id=''/>`
pub mod state {
    pub const OK: &str = "OK";
    pub const WARNING: &str = "WARNING";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const EXPIRED: &str = "EXPIRED";
    pub const ERASED: &str = "ERASED";
    pub const FORWARD_ERROR: &str = "FORWARD_ERROR";
}

/// Values of `<state info=''/>`
pub mod state_info {
    pub const INITIAL: &str = "INITIAL";
    pub const QUEUED: &str = "QUEUED";
    pub const CONNECTED: &str = "CONNECTED";
}

/// The operation a QoS was sent with, written as `<isPublish/>` etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodName {
    Connect,
    Disconnect,
    Publish,
    Update,
    Get,
    Subscribe,
    UnSubscribe,
    Erase,
    Ping,
}

impl MethodName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodName::Connect => "connect",
            MethodName::Disconnect => "disconnect",
            MethodName::Publish => "publish",
            MethodName::Update => "update",
            MethodName::Get => "get",
            MethodName::Subscribe => "subscribe",
            MethodName::UnSubscribe => "unSubscribe",
            MethodName::Erase => "erase",
            MethodName::Ping => "ping",
        }
    }

    /// Marker element name, e.g. `isPublish`
    pub fn marker(&self) -> String {
        let name = self.as_str();
        let mut chars = name.chars();
        match chars.next() {
            Some(c) => format!("is{}{}", c.to_ascii_uppercase(), chars.as_str()),
            None => String::new(),
        }
    }

    /// Reverse of [`MethodName::marker`], case insensitive
    pub fn from_marker(tag: &str) -> Option<Self> {
        let tag = tag.to_ascii_lowercase();
        tag.strip_prefix("is").and_then(|name| name.parse().ok())
    }
}

impl FromStr for MethodName {
    type Err = XmlBlasterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let m = match s.to_ascii_lowercase().as_str() {
            "connect" => MethodName::Connect,
            "disconnect" => MethodName::Disconnect,
            "publish" => MethodName::Publish,
            "update" => MethodName::Update,
            "get" => MethodName::Get,
            "subscribe" => MethodName::Subscribe,
            "unsubscribe" => MethodName::UnSubscribe,
            "erase" => MethodName::Erase,
            "ping" => MethodName::Ping,
            _ => return Err(XmlBlasterError::IllegalArgument(format!("unknown method '{}'", s))),
        };
        Ok(m)
    }
}

impl fmt::Display for MethodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message priority, 0 (lowest) to 9 (highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(0);
    pub const LOW: Priority = Priority(3);
    pub const NORM: Priority = Priority(5);
    pub const HIGH: Priority = Priority(7);
    pub const MAX: Priority = Priority(9);

    /// Out of range values are clamped into 0..=9
    #[inline]
    pub fn new(p: i32) -> Self {
        Priority(p.clamp(0, 9) as u8)
    }

    #[inline]
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORM
    }
}

impl FromStr for Priority {
    type Err = XmlBlasterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(p) = s.parse::<i32>() {
            return Ok(Priority::new(p));
        }
        match s.to_ascii_uppercase().as_str() {
            "MIN" => Ok(Priority::MIN),
            "LOW" => Ok(Priority::LOW),
            "NORM" => Ok(Priority::NORM),
            "HIGH" => Ok(Priority::HIGH),
            "MAX" => Ok(Priority::MAX),
            _ => Err(XmlBlasterError::IllegalArgument(format!("invalid priority '{}'", s))),
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a destination or access filter is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    #[default]
    Exact,
    XPath,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Exact => "EXACT",
            QueryType::XPath => "XPATH",
        }
    }
}

impl FromStr for QueryType {
    type Err = XmlBlasterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXACT" => Ok(QueryType::Exact),
            "XPATH" => Ok(QueryType::XPath),
            _ => Err(XmlBlasterError::IllegalArgument(format!("unknown queryType '{}'", s))),
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a queue configuration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relating {
    Session,
    Subject,
    Callback,
    Client,
    History,
    MsgUnitStore,
}

impl Relating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relating::Session => "session",
            Relating::Subject => "subject",
            Relating::Callback => "callback",
            Relating::Client => "client",
            Relating::History => "history",
            Relating::MsgUnitStore => "msgUnitStore",
        }
    }
}

impl FromStr for Relating {
    type Err = XmlBlasterError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let r = match s.trim().to_ascii_lowercase().as_str() {
            "session" => Relating::Session,
            "subject" => Relating::Subject,
            "callback" => Relating::Callback,
            "client" | "connection" => Relating::Client,
            "history" => Relating::History,
            "msgunitstore" | "topic" => Relating::MsgUnitStore,
            _ => return Err(XmlBlasterError::IllegalArgument(format!("unknown queue relating '{}'", s))),
        };
        Ok(r)
    }
}

impl fmt::Display for Relating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reaction on a full queue or on a failing callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnOverflow {
    #[default]
    DeadMessage,
}

impl OnOverflow {
    pub fn as_str(&self) -> &'static str {
        match self {
            OnOverflow::DeadMessage => "deadMessage",
        }
    }

    /// Maps any configured value onto a supported policy.
    pub fn parse_lenient(s: &str) -> Self {
        let s = s.trim();
        if s.eq_ignore_ascii_case("discardOldest") {
            log::warn!("onOverflow='discardOldest' is not supported, using 'deadMessage'");
        } else if !s.eq_ignore_ascii_case("deadMessage") {
            log::warn!("onOverflow='{}' is unknown, using 'deadMessage'", s);
        }
        OnOverflow::DeadMessage
    }
}

impl fmt::Display for OnOverflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Login name plus optional public session id and cluster node,
/// `joe`, `joe/1`, `client/joe/session/1` or `/node/heron/client/joe/session/1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SessionName {
    node_id: Option<String>,
    login_name: String,
    pub_session_id: i64,
}

impl SessionName {
    pub fn new(login_name: impl Into<String>, pub_session_id: i64) -> Self {
        Self { node_id: None, login_name: login_name.into(), pub_session_id }
    }

    pub fn parse(name: &str) -> Result<Self> {
        let name = name.trim();
        let mut parts: Vec<&str> = name.split('/').collect();
        let mut node_id = None;
        if name.starts_with('/') {
            parts.remove(0);
            // "/node/heron/client/joe/session/1" or "/client/joe/session/1"
            if parts.first().map(|p| p.eq_ignore_ascii_case("node")).unwrap_or(false) {
                match parts.get(1) {
                    Some(node) if !node.is_empty() => node_id = Some((*node).to_owned()),
                    _ => {
                        return Err(
                            XmlBlasterError::IllegalArgument(format!("invalid session name '{}'", name)).into()
                        )
                    }
                }
                parts.drain(..2);
            }
        }
        if parts.first().map(|p| p.eq_ignore_ascii_case("client")).unwrap_or(false) {
            parts.remove(0);
            if parts.len() == 3 && parts[1].eq_ignore_ascii_case("session") {
                parts.remove(1);
            }
        }
        let (login, pub_session_id) = match parts.as_slice() {
            [login] => (*login, 0),
            [login, id] => {
                let id = id.parse::<i64>().map_err(|_| {
                    XmlBlasterError::IllegalArgument(format!("invalid public session id in '{}'", name))
                })?;
                (*login, id)
            }
            _ => return Err(XmlBlasterError::IllegalArgument(format!("invalid session name '{}'", name)).into()),
        };
        if login.is_empty() {
            return Err(XmlBlasterError::IllegalArgument(format!("missing login name in '{}'", name)).into());
        }
        Ok(Self { node_id, login_name: login.to_owned(), pub_session_id })
    }

    #[inline]
    pub fn login_name(&self) -> &str {
        &self.login_name
    }

    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    #[inline]
    pub fn node_id(&self) -> Option<&str> {
        self.node_id.as_deref()
    }

    #[inline]
    pub fn pub_session_id(&self) -> i64 {
        self.pub_session_id
    }

    #[inline]
    pub fn set_pub_session_id(&mut self, id: i64) {
        self.pub_session_id = id;
    }

    /// A positive public session id is chosen by the client and survives reconnects.
    #[inline]
    pub fn is_pub_session_id_user(&self) -> bool {
        self.pub_session_id > 0
    }

    #[inline]
    pub fn is_session(&self) -> bool {
        self.pub_session_id != 0
    }

    /// `client/joe/session/1` or `client/joe`
    pub fn relative_name(&self) -> String {
        if self.is_session() {
            format!("client/{}/session/{}", self.login_name, self.pub_session_id)
        } else {
            format!("client/{}", self.login_name)
        }
    }

    pub fn absolute_name(&self) -> String {
        match self.node_id.as_ref() {
            Some(node) => format!("/node/{}/{}", node, self.relative_name()),
            None => format!("/{}", self.relative_name()),
        }
    }

    /// The absolute name if the node is known, the relative one otherwise.
    pub fn wire_name(&self) -> String {
        if self.node_id.is_some() {
            self.absolute_name()
        } else {
            self.relative_name()
        }
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relative_name())
    }
}

pub const ENCODING_BASE64: &str = "base64";

/// A typed key/value pair sent with a QoS, `<clientProperty name='' type=''>value</clientProperty>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientProperty {
    name: String,
    type_: String,
    encoding: Option<String>,
    value: Bytes,
}

impl ClientProperty {
    pub fn new(name: impl Into<String>, type_: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self { name: name.into(), type_: type_.into(), encoding: None, value: value.into() }
    }

    #[inline]
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        let value: String = value.into();
        Self::new(name, "", value)
    }

    #[inline]
    pub fn long(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, "long", value.to_string())
    }

    #[inline]
    pub fn boolean(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, "boolean", value.to_string())
    }

    /// Binary values are always transported base64 encoded.
    #[inline]
    pub fn blob(name: impl Into<String>, value: impl Into<Bytes>) -> Self {
        let mut p = Self::new(name, "byte[]", value);
        p.encoding = Some(ENCODING_BASE64.into());
        p
    }

    /// Builds the property from its wire form, base64 encoded values are decoded.
    pub fn from_wire(name: &str, type_: &str, encoding: Option<&str>, text: &str) -> Result<Self> {
        let mut p = Self::new(name, type_, Bytes::new());
        match encoding {
            Some(enc) if enc.eq_ignore_ascii_case(ENCODING_BASE64) => {
                let raw = BASE64_STANDARD.decode(text.trim()).map_err(|e| {
                    XmlBlasterError::IllegalArgument(format!("clientProperty '{}' is not valid base64, {}", name, e))
                })?;
                p.value = Bytes::from(raw);
                p.encoding = Some(ENCODING_BASE64.into());
            }
            Some(enc) if !enc.is_empty() => {
                log::warn!("clientProperty '{}' has unknown encoding '{}', value taken as is", name, enc);
                p.value = Bytes::from(text.to_owned());
            }
            _ => p.value = Bytes::from(text.to_owned()),
        }
        Ok(p)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Empty for strings
    #[inline]
    pub fn type_(&self) -> &str {
        &self.type_
    }

    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    pub fn to_xml(&self, offset: &str) -> String {
        let mut sb = String::with_capacity(64);
        sb.push_str(offset);
        sb.push_str("<clientProperty");
        write_attr(&mut sb, "name", &self.name);
        if !self.type_.is_empty() {
            write_attr(&mut sb, "type", &self.type_);
        }
        let encode = self.encoding.is_some() || self.as_str().is_none();
        if encode {
            write_attr(&mut sb, "encoding", ENCODING_BASE64);
        }
        sb.push('>');
        if encode {
            sb.push_str(&BASE64_STANDARD.encode(&self.value));
        } else {
            sb.push_str(&escape(self.as_str().unwrap_or_default()));
        }
        sb.push_str("</clientProperty>");
        sb
    }
}

/// A message as the application sees it
#[derive(Debug, Clone)]
pub struct MsgUnit {
    pub key: String,
    pub content: Bytes,
    pub qos: MsgQosData,
}

impl MsgUnit {
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>, qos: MsgQosData) -> Self {
        Self { key: key.into(), content: content.into(), qos }
    }

    #[inline]
    pub fn to_raw(&self) -> MsgUnitRaw {
        MsgUnitRaw { key: self.key.clone(), content: self.content.clone(), qos: self.qos.to_xml() }
    }

    #[inline]
    pub fn from_raw(raw: &MsgUnitRaw) -> Result<Self> {
        Ok(Self { key: raw.key.clone(), content: raw.content.clone(), qos: MsgQosData::read_object(&raw.qos)? })
    }
}

/// A message as it travels over the wire, all parts serialized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgUnitRaw {
    pub key: String,
    pub content: Bytes,
    pub qos: String,
}

impl MsgUnitRaw {
    pub fn new(key: impl Into<String>, content: impl Into<Bytes>, qos: impl Into<String>) -> Self {
        Self { key: key.into(), content: content.into(), qos: qos.into() }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.key.len() + self.content.len() + self.qos.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority() {
        assert_eq!(Priority::new(12), Priority::MAX);
        assert_eq!(Priority::new(-3), Priority::MIN);
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::HIGH);
        assert_eq!(" 4 ".parse::<Priority>().unwrap().value(), 4);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_method_marker() {
        assert_eq!(MethodName::UnSubscribe.marker(), "isUnSubscribe");
        assert_eq!(MethodName::from_marker("isPublish"), Some(MethodName::Publish));
        assert_eq!(MethodName::from_marker("isunsubscribe"), Some(MethodName::UnSubscribe));
        assert_eq!(MethodName::from_marker("isVolatile"), None);
    }

    #[test]
    fn test_relating_alias() {
        assert_eq!("connection".parse::<Relating>().unwrap(), Relating::Client);
        assert_eq!("msgUnitStore".parse::<Relating>().unwrap().as_str(), "msgUnitStore");
        assert!("topicCache".parse::<Relating>().is_err());
        assert_eq!(OnOverflow::parse_lenient("discardOldest"), OnOverflow::DeadMessage);
    }

    #[test]
    fn test_session_name() {
        let s = SessionName::parse("joe/1").unwrap();
        assert_eq!(s.login_name(), "joe");
        assert!(s.is_pub_session_id_user());
        assert_eq!(s.relative_name(), "client/joe/session/1");

        let s = SessionName::parse("client/joe/session/-3").unwrap();
        assert_eq!(s.pub_session_id(), -3);
        assert!(!s.is_pub_session_id_user());

        let s = SessionName::parse("/node/heron/client/joe").unwrap();
        assert_eq!(s.node_id(), Some("heron"));
        assert_eq!(s.absolute_name(), "/node/heron/client/joe");

        assert!(SessionName::parse("joe/x").is_err());
        assert!(SessionName::parse("").is_err());
        assert!(SessionName::parse("/node//client/joe").is_err());
    }

    #[test]
    fn test_session_name_absolute_round_trip() {
        let s = SessionName::parse("/client/joe/session/1").unwrap();
        assert_eq!(s.node_id(), None);
        assert_eq!(s.login_name(), "joe");
        assert_eq!(s.pub_session_id(), 1);

        for s in [
            SessionName::new("joe", 0),
            SessionName::new("joe", -7),
            SessionName::new("joe", 3).with_node_id("heron"),
            SessionName::new("jack", 0).with_node_id("avalon"),
        ] {
            assert_eq!(SessionName::parse(&s.absolute_name()).unwrap(), s);
            assert_eq!(SessionName::parse(&s.wire_name()).unwrap(), s);
        }
        assert_eq!(SessionName::new("joe", 3).wire_name(), "client/joe/session/3");
    }

    #[test]
    fn test_client_property() {
        let p = ClientProperty::long("count", 12);
        assert_eq!(p.to_xml(""), "<clientProperty name='count' type='long'>12</clientProperty>");
        assert_eq!(p.as_i64(), Some(12));

        let p = ClientProperty::blob("raw", vec![0xffu8, 0x00]);
        let xml = p.to_xml("");
        assert_eq!(xml, "<clientProperty name='raw' type='byte[]' encoding='base64'>/wA=</clientProperty>");
        let back = ClientProperty::from_wire("raw", "byte[]", Some("base64"), "/wA=").unwrap();
        assert_eq!(back, p);

        assert!(ClientProperty::from_wire("x", "", Some("base64"), "%%%").is_err());
        assert_eq!(ClientProperty::string("s", "a<b").to_xml(""), "<clientProperty name='s'>a&lt;b</clientProperty>");
    }
}
