//! The QoS envelopes of all broker operations.
//!
//! Every QoS shares [`QosData`], the kind specific part is plugged in through [`QosKind`].
//! Parsing is tolerant: unknown or malformed parts are logged and the defaults kept.
//! Serializing writes only what differs from the defaults.

use std::collections::BTreeMap;
use std::fmt;

use roxmltree::Node;

use xmlblaster_utils::Timestamp;

use crate::error::Result;
use crate::prop::Prop;
use crate::route::{Route, RouteInfo};
use crate::types::{state, ClientProperty, MethodName};
use crate::xml::{self, escape, offset, write_attr, write_flag, Scope, ScopeStack};

pub mod connect;
pub mod disconnect;
pub mod msg;
pub mod query;
pub mod status;

pub use self::connect::{ConnectQos, ConnectQosData, ConnectReturnQos, SecurityQos, SessionQos};
pub use self::disconnect::{DisconnectQos, DisconnectQosData};
pub use self::msg::{MsgQos, MsgQosData};
pub use self::query::{AccessFilter, HistoryQos, QueryQos, QueryQosData};
pub use self::status::{StatusQos, StatusQosData};

/// The kind specific part of a QoS.
pub trait QosKind: Default + Clone + fmt::Debug {
    /// Consumes a child element of `<qos>` the shared envelope does not know,
    /// returns `Ok(false)` if the element is unknown to the kind as well.
    fn read_element(qos: &mut QosData<Self>, node: &Node, xml: &str, scopes: &mut ScopeStack) -> Result<bool>;

    /// Writes the children of `<qos>` in wire order, each starting with `offset(extra_offset)`.
    fn write_body(qos: &QosData<Self>, sb: &mut String, extra_offset: &str);
}

/// Fields shared by every QoS plus the kind specific part `K`.
#[derive(Debug, Clone)]
pub struct QosData<K> {
    pub(crate) state: String,
    pub(crate) state_info: Option<String>,
    pub(crate) rcv_timestamp: Option<Timestamp>,
    pub(crate) persistent: Prop<bool>,
    pub(crate) route: Route,
    pub(crate) client_properties: BTreeMap<String, ClientProperty>,
    pub(crate) method: Option<MethodName>,
    pub(crate) kind: K,
}

impl<K: Default> Default for QosData<K> {
    fn default() -> Self {
        Self {
            state: state::OK.into(),
            state_info: None,
            rcv_timestamp: None,
            persistent: Prop::new(false),
            route: Route::new(),
            client_properties: BTreeMap::new(),
            method: None,
            kind: K::default(),
        }
    }
}

impl<K: QosKind> QosData<K> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a QoS, an empty string yields all defaults.
    pub fn read_object(xml: &str) -> Result<Self> {
        let mut qos = Self::default();
        let doc = match xml::parse_document(xml)? {
            Some(doc) => doc,
            None => return Ok(qos),
        };
        let root = doc.root_element();
        if !xml::is_tag(&root, "qos") {
            log::warn!("expected <qos> as root element but got <{}>, using defaults", root.tag_name().name());
            return Ok(qos);
        }
        let mut scopes = ScopeStack::new();
        for child in xml::elements(root) {
            let tag = child.tag_name().name();
            if !scopes.allows(tag) {
                continue;
            }
            if qos.read_base(&child, &mut scopes)? {
                continue;
            }
            if !K::read_element(&mut qos, &child, xml, &mut scopes)? {
                log::warn!("unknown element <{}> in <qos>, ignored", tag);
            }
        }
        Ok(qos)
    }

    fn read_base(&mut self, node: &Node, scopes: &mut ScopeStack) -> Result<bool> {
        let tag = node.tag_name().name().to_ascii_lowercase();
        match tag.as_str() {
            "state" => {
                if let Some(id) = xml::attr(node, "id") {
                    self.state = id.trim().to_owned();
                }
                if let Some(info) = xml::attr(node, "info") {
                    self.state_info = Some(info.trim().to_owned());
                }
            }
            "rcvtimestamp" => {
                let nanos = xml::attr(node, "nanos").map(|v| v.to_owned()).unwrap_or_else(|| xml::text(node));
                match nanos.parse::<Timestamp>() {
                    Ok(ts) => self.set_rcv_timestamp(ts),
                    Err(_) => log::warn!("invalid <rcvTimestamp nanos='{}'>, ignored", nanos),
                }
            }
            "persistent" => {
                if let Some(v) = xml::flag(node) {
                    self.persistent.set(v);
                }
            }
            "route" => {
                scopes.push(Scope::Route);
                for hop in xml::elements(*node) {
                    if !scopes.allows(hop.tag_name().name()) {
                        continue;
                    }
                    if let Some(info) = RouteInfo::from_node(&hop) {
                        self.route.push_raw(info);
                    }
                }
                scopes.pop();
            }
            "clientproperty" => match xml::attr(node, "name") {
                Some(name) => {
                    let type_ = xml::attr(node, "type").unwrap_or_default();
                    let encoding = xml::attr(node, "encoding");
                    match ClientProperty::from_wire(name, type_, encoding, &xml::raw_text(node)) {
                        Ok(p) => self.add_client_property(p),
                        Err(e) => log::warn!("{}, ignored", e),
                    }
                }
                None => log::warn!("<clientProperty> without name, ignored"),
            },
            _ => match MethodName::from_marker(&tag) {
                Some(m) => {
                    if xml::flag(node).unwrap_or(true) {
                        self.method = Some(m);
                    }
                }
                None => return Ok(false),
            },
        }
        Ok(true)
    }

    /// Serializes with the `<qos>` tag at `extra_offset` indentation.
    pub fn write_object(&self, extra_offset: &str) -> String {
        let mut body = String::with_capacity(512);
        K::write_body(self, &mut body, extra_offset);
        if body.is_empty() {
            return "<qos/>".into();
        }
        format!("<qos>{}\n{}</qos>", body, extra_offset)
    }

    #[inline]
    pub fn to_xml(&self) -> String {
        self.write_object("")
    }

    #[inline]
    pub fn kind(&self) -> &K {
        &self.kind
    }

    #[inline]
    pub fn kind_mut(&mut self) -> &mut K {
        &mut self.kind
    }
}

impl<K> QosData<K> {
    /// `OK`, `ERASED`, ...
    #[inline]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[inline]
    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
    }

    #[inline]
    pub fn is_ok(&self) -> bool {
        self.state == state::OK
    }

    #[inline]
    pub fn is_erased(&self) -> bool {
        self.state == state::ERASED
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        self.state == state::TIMEOUT
    }

    #[inline]
    pub fn is_expired_state(&self) -> bool {
        self.state == state::EXPIRED
    }

    #[inline]
    pub fn state_info(&self) -> Option<&str> {
        self.state_info.as_deref()
    }

    #[inline]
    pub fn set_state_info(&mut self, info: impl Into<String>) {
        self.state_info = Some(info.into());
    }

    #[inline]
    pub fn rcv_timestamp(&self) -> Option<Timestamp> {
        self.rcv_timestamp
    }

    /// The receive timestamp is stamped once, later calls are ignored.
    pub fn set_rcv_timestamp(&mut self, ts: Timestamp) {
        match self.rcv_timestamp {
            None => self.rcv_timestamp = Some(ts),
            Some(old) if old != ts => {
                log::warn!("rcvTimestamp is already set to {}, ignoring {}", old, ts);
            }
            Some(_) => {}
        }
    }

    /// Stamps the receive timestamp with the current time if not set yet.
    #[inline]
    pub fn touch_rcv_timestamp(&mut self) {
        if self.rcv_timestamp.is_none() {
            self.rcv_timestamp = Some(Timestamp::now());
        }
    }

    #[inline]
    pub fn is_persistent(&self) -> bool {
        self.persistent.value()
    }

    #[inline]
    pub fn set_persistent(&mut self, persistent: bool) {
        self.persistent.set(persistent);
    }

    #[inline]
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// Adds a cluster hop, see [`Route::add_route_info`]
    #[inline]
    pub fn add_route_info(&mut self, info: RouteInfo) {
        self.route.add_route_info(info);
    }

    #[inline]
    pub fn count(&self, node_id: &str) -> usize {
        self.route.count(node_id)
    }

    #[inline]
    pub fn dirty_read(&self, node_id: &str) -> bool {
        self.route.dirty_read(node_id)
    }

    #[inline]
    pub fn client_properties(&self) -> &BTreeMap<String, ClientProperty> {
        &self.client_properties
    }

    #[inline]
    pub fn client_property(&self, name: &str) -> Option<&ClientProperty> {
        self.client_properties.get(name)
    }

    #[inline]
    pub fn add_client_property(&mut self, p: ClientProperty) {
        self.client_properties.insert(p.name().to_owned(), p);
    }

    #[inline]
    pub fn method(&self) -> Option<MethodName> {
        self.method
    }

    #[inline]
    pub fn set_method(&mut self, method: MethodName) {
        self.method = Some(method);
    }

    pub(crate) fn write_state(&self, sb: &mut String, extra_offset: &str) {
        if self.state == state::OK && self.state_info.is_none() {
            return;
        }
        sb.push_str(&offset(extra_offset));
        sb.push_str("<state");
        write_attr(sb, "id", &self.state);
        if let Some(info) = &self.state_info {
            write_attr(sb, "info", info);
        }
        sb.push_str("/>");
    }

    pub(crate) fn write_rcv_timestamp(&self, sb: &mut String, extra_offset: &str) {
        if let Some(ts) = self.rcv_timestamp {
            sb.push_str(&offset(extra_offset));
            sb.push_str(&format!("<rcvTimestamp nanos='{}'/>", ts.nanos()));
        }
    }

    pub(crate) fn write_persistent(&self, sb: &mut String, extra_offset: &str, tag: &str) {
        if self.persistent.is_modified() {
            write_flag(sb, &offset(extra_offset), tag, self.is_persistent());
        }
    }

    pub(crate) fn write_route(&self, sb: &mut String, extra_offset: &str) {
        sb.push_str(&self.route.to_xml(extra_offset));
    }

    pub(crate) fn write_method(&self, sb: &mut String, extra_offset: &str) {
        if let Some(m) = self.method {
            sb.push_str(&offset(extra_offset));
            sb.push_str(&format!("<{}/>", m.marker()));
        }
    }

    pub(crate) fn write_client_properties(&self, sb: &mut String, extra_offset: &str) {
        let off = offset(extra_offset);
        for p in self.client_properties.values() {
            sb.push_str(&p.to_xml(&off));
        }
    }
}

/// `<subscribe id='...'/>`
pub(crate) fn write_subscribe_id(sb: &mut String, extra_offset: &str, id: Option<&str>) {
    if let Some(id) = id {
        sb.push_str(&offset(extra_offset));
        sb.push_str(&format!("<subscribe id='{}'/>", escape(id)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::XmlBlasterError;

    #[test]
    fn test_empty_and_foreign() {
        let qos = StatusQosData::read_object("").unwrap();
        assert!(qos.is_ok());
        assert_eq!(qos.to_xml(), "<qos/>");

        let qos = StatusQosData::read_object("   \n ").unwrap();
        assert_eq!(qos.to_xml(), "<qos/>");

        let qos = StatusQosData::read_object("<key oid='a'/>").unwrap();
        assert_eq!(qos.to_xml(), "<qos/>");

        let err = StatusQosData::read_object("<qos><state id='OK'></qos>").unwrap_err();
        let err = err.downcast_ref::<XmlBlasterError>().unwrap();
        assert_eq!(err.error_code(), "resource.configuration.xml");
    }

    #[test]
    fn test_client_property_keeps_whitespace() {
        let mut qos = StatusQosData::new();
        qos.add_client_property(ClientProperty::string("s", " a b "));
        let xml = qos.to_xml();
        assert!(xml.contains("<clientProperty name='s'> a b </clientProperty>"));

        let again = StatusQosData::read_object(&xml).unwrap();
        assert_eq!(again.client_property("s").and_then(|p| p.as_str()), Some(" a b "));
        assert_eq!(again.to_xml(), xml);

        let qos = StatusQosData::read_object(
            "<qos><clientProperty name='n' type='long'> 5 </clientProperty>\
             <clientProperty name='b' type='byte[]' encoding='base64'>\n /wA= \n</clientProperty></qos>",
        )
        .unwrap();
        assert_eq!(qos.client_property("n").and_then(|p| p.as_i64()), Some(5));
        assert_eq!(qos.client_property("b").map(|p| p.value().to_vec()), Some(vec![0xffu8, 0x00]));
    }

    #[test]
    fn test_base_fields() {
        let xml = "<qos>\
             <STATE id='ERASED' info='QUEUED'/>\
             <rcvTimestamp nanos='1002'/>\
             <persistent/>\
             <node id='misplaced' stratum='1'/>\
             <route><node id='heron' stratum='0' timestamp='7'/></route>\
             <clientProperty name='a' type='long'>5</clientProperty>\
             <clientProperty type='long'>5</clientProperty>\
             <isErase/>\
             <whatever/>\
           </qos>";
        let qos = StatusQosData::read_object(xml).unwrap();
        assert!(qos.is_erased());
        assert_eq!(qos.state_info(), Some("QUEUED"));
        assert_eq!(qos.rcv_timestamp(), Some(Timestamp::from_nanos(1002)));
        assert!(qos.is_persistent());
        assert_eq!(qos.route().len(), 1);
        assert_eq!(qos.count("misplaced"), 0);
        assert_eq!(qos.client_property("a").and_then(|p| p.as_i64()), Some(5));
        assert_eq!(qos.client_properties().len(), 1);
        assert_eq!(qos.method(), Some(MethodName::Erase));

        let mut again = StatusQosData::read_object(&qos.to_xml()).unwrap();
        assert_eq!(again.to_xml(), qos.to_xml());

        again.set_rcv_timestamp(Timestamp::from_nanos(5));
        assert_eq!(again.rcv_timestamp(), Some(Timestamp::from_nanos(1002)));
    }
}
