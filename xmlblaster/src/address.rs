use roxmltree::Node;

use xmlblaster_conf::Properties;

use crate::prop::{parse_bool, parse_bytes, parse_i32, parse_millis, parse_string, Prop, PropertyScope};
use crate::xml::{self, attr_num, escape, offset, write_attr, write_flag, Scope, ScopeStack};

pub const DEFAULT_TYPE: &str = "SOCKET";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_BOOTSTRAP_PORT: i32 = 3412;
pub const DEFAULT_SESSION_ID: &str = "unknown";
pub const DEFAULT_DISPATCH_PLUGIN: &str = "undef";
/// Pings faster than this are raised to it
pub const MIN_PING_INTERVAL: i64 = 10;

/// Which side of the connection the address describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// How the client reaches the server, `<address>`
    Client,
    /// How the server reaches the client's callback, `<callback>`
    Callback,
}

impl AddressKind {
    #[inline]
    pub fn tag(&self) -> &'static str {
        match self {
            AddressKind::Client => "address",
            AddressKind::Callback => "callback",
        }
    }

    #[inline]
    pub fn prop_prefix(&self) -> &'static str {
        match self {
            AddressKind::Client => "dispatch/connection/",
            AddressKind::Callback => "dispatch/callback/",
        }
    }

    #[inline]
    fn scope(&self) -> Scope {
        match self {
            AddressKind::Client => Scope::Address,
            AddressKind::Callback => Scope::Callback,
        }
    }

    pub fn default_ping_interval(&self) -> i64 {
        10_000
    }

    /// Clients retry forever, the server gives up on a callback at once
    pub fn default_retries(&self) -> i32 {
        match self {
            AddressKind::Client => -1,
            AddressKind::Callback => 0,
        }
    }

    pub fn default_delay(&self) -> i64 {
        5_000
    }
}

#[inline]
fn norm_ping_interval(v: i64) -> i64 {
    if v <= 0 {
        0
    } else if v < MIN_PING_INTERVAL {
        log::warn!("pingInterval={} is too short, using {} ms", v, MIN_PING_INTERVAL);
        MIN_PING_INTERVAL
    } else {
        v
    }
}

#[inline]
fn norm_retries(v: i32) -> i32 {
    v.max(-1)
}

#[inline]
fn norm_delay(v: i64) -> i64 {
    v.max(0)
}

#[inline]
fn norm_collect_time(v: i64) -> i64 {
    v.max(0)
}

/// Endpoint configuration: protocol, retry, ping and burst mode settings.
#[derive(Debug, Clone)]
pub struct AddressBase {
    kind: AddressKind,
    type_: Prop<String>,
    version: Prop<String>,
    raw_address: String,
    bootstrap_hostname: Prop<String>,
    bootstrap_port: Prop<i32>,
    session_id: Prop<String>,
    ping_interval: Prop<i64>,
    retries: Prop<i32>,
    delay: Prop<i64>,
    oneway: Prop<bool>,
    dispatcher_active: Prop<bool>,
    use_for_subject_queue: Prop<bool>,
    dispatch_plugin: Prop<String>,
    collect_time: Prop<i64>,
    burst_mode_max_entries: Prop<i32>,
    burst_mode_max_bytes: Prop<i64>,
    compress_type: Prop<String>,
    min_size: Prop<i64>,
    ptp_allowed: Prop<bool>,
}

impl AddressBase {
    pub fn new(kind: AddressKind) -> Self {
        Self {
            kind,
            type_: Prop::new(DEFAULT_TYPE.into()),
            version: Prop::new(DEFAULT_VERSION.into()),
            raw_address: String::new(),
            bootstrap_hostname: Prop::new(String::new()),
            bootstrap_port: Prop::new(DEFAULT_BOOTSTRAP_PORT),
            session_id: Prop::new(DEFAULT_SESSION_ID.into()),
            ping_interval: Prop::new(kind.default_ping_interval()),
            retries: Prop::new(kind.default_retries()),
            delay: Prop::new(kind.default_delay()),
            oneway: Prop::new(false),
            dispatcher_active: Prop::new(true),
            use_for_subject_queue: Prop::new(true),
            dispatch_plugin: Prop::new(DEFAULT_DISPATCH_PLUGIN.into()),
            collect_time: Prop::new(0),
            burst_mode_max_entries: Prop::new(-1),
            burst_mode_max_bytes: Prop::new(-1),
            compress_type: Prop::new(String::new()),
            min_size: Prop::new(0),
            ptp_allowed: Prop::new(true),
        }
    }

    #[inline]
    pub fn client() -> Self {
        Self::new(AddressKind::Client)
    }

    #[inline]
    pub fn callback() -> Self {
        Self::new(AddressKind::Callback)
    }

    /// Defaults overlaid with `dispatch/connection/*` or `dispatch/callback/*` properties.
    pub fn with_properties(kind: AddressKind, props: &Properties, node_id: Option<&str>) -> Self {
        let mut a = Self::new(kind);
        a.configure(props, node_id);
        a
    }

    /// Applies the configured properties, `key[nodeId]` before `key`.
    pub fn configure(&mut self, props: &Properties, node_id: Option<&str>) {
        let scope = PropertyScope::new(props, node_id, self.kind.prop_prefix());
        scope.apply(&mut self.type_, "protocol", &parse_string);
        scope.apply(&mut self.version, "version", &parse_string);
        scope.apply(&mut self.bootstrap_hostname, "bootstrapHostname", &parse_string);
        scope.apply(&mut self.bootstrap_port, "bootstrapPort", &parse_i32);
        scope.apply(&mut self.session_id, "sessionId", &parse_string);
        scope.apply(&mut self.oneway, "oneway", &parse_bool);
        scope.apply(&mut self.dispatcher_active, "dispatcherActive", &parse_bool);
        scope.apply(&mut self.use_for_subject_queue, "useForSubjectQueue", &parse_bool);
        scope.apply(&mut self.dispatch_plugin, "dispatchPlugin/defaultPlugin", &parse_string);
        scope.apply(&mut self.burst_mode_max_entries, "burstMode/maxEntries", &parse_i32);
        scope.apply(&mut self.burst_mode_max_bytes, "burstMode/maxBytes", &parse_bytes);
        scope.apply(&mut self.compress_type, "compress/type", &parse_string);
        scope.apply(&mut self.min_size, "compress/minSize", &parse_bytes);
        scope.apply(&mut self.ptp_allowed, "ptpAllowed", &parse_bool);

        let ping = scope.resolve("pingInterval", &parse_millis, self.kind.default_ping_interval());
        if ping.is_modified() {
            self.ping_interval.set_from(norm_ping_interval(ping.value()), ping.origin());
        }
        let retries = scope.resolve("retries", &parse_i32, self.kind.default_retries());
        if retries.is_modified() {
            self.retries.set_from(norm_retries(retries.value()), retries.origin());
        }
        let delay = scope.resolve("delay", &parse_millis, self.kind.default_delay());
        if delay.is_modified() {
            self.delay.set_from(norm_delay(delay.value()), delay.origin());
        }
        let collect = scope.resolve("burstMode/collectTime", &parse_millis, 0);
        if collect.is_modified() {
            self.collect_time.set_from(norm_collect_time(collect.value()), collect.origin());
        }
    }

    #[inline]
    pub fn kind(&self) -> AddressKind {
        self.kind
    }

    #[inline]
    pub fn type_(&self) -> &str {
        &self.type_
    }

    #[inline]
    pub fn set_type(&mut self, t: impl Into<String>) {
        self.type_.set(t.into());
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn set_version(&mut self, v: impl Into<String>) {
        self.version.set(v.into());
    }

    /// Protocol specific address, e.g. `socket://192.168.1.1:7607`
    #[inline]
    pub fn raw_address(&self) -> &str {
        &self.raw_address
    }

    #[inline]
    pub fn set_raw_address(&mut self, raw: impl Into<String>) {
        self.raw_address = raw.into();
    }

    #[inline]
    pub fn bootstrap_hostname(&self) -> &str {
        &self.bootstrap_hostname
    }

    #[inline]
    pub fn set_bootstrap_hostname(&mut self, host: impl Into<String>) {
        self.bootstrap_hostname.set(host.into());
    }

    #[inline]
    pub fn bootstrap_port(&self) -> i32 {
        self.bootstrap_port.value()
    }

    #[inline]
    pub fn set_bootstrap_port(&mut self, port: i32) {
        self.bootstrap_port.set(port);
    }

    #[inline]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[inline]
    pub fn set_session_id(&mut self, id: impl Into<String>) {
        self.session_id.set(id.into());
    }

    #[inline]
    pub fn ping_interval(&self) -> i64 {
        self.ping_interval.value()
    }

    /// `<= 0` switches pinging off, `1..10` is raised to 10 ms
    #[inline]
    pub fn set_ping_interval(&mut self, millis: i64) {
        self.ping_interval.set(norm_ping_interval(millis));
    }

    #[inline]
    pub fn retries(&self) -> i32 {
        self.retries.value()
    }

    /// `-1` retries forever, anything below is taken as `-1`
    #[inline]
    pub fn set_retries(&mut self, retries: i32) {
        self.retries.set(norm_retries(retries));
    }

    #[inline]
    pub fn delay(&self) -> i64 {
        self.delay.value()
    }

    /// `0` disables the fail-safe mode, negative values are taken as `0`
    #[inline]
    pub fn set_delay(&mut self, millis: i64) {
        self.delay.set(norm_delay(millis));
    }

    /// True if lost connections are polled for instead of failing at once
    #[inline]
    pub fn is_fail_safe(&self) -> bool {
        self.delay() > 0
    }

    #[inline]
    pub fn oneway(&self) -> bool {
        self.oneway.value()
    }

    #[inline]
    pub fn set_oneway(&mut self, oneway: bool) {
        self.oneway.set(oneway);
    }

    #[inline]
    pub fn dispatcher_active(&self) -> bool {
        self.dispatcher_active.value()
    }

    #[inline]
    pub fn set_dispatcher_active(&mut self, active: bool) {
        self.dispatcher_active.set(active);
    }

    #[inline]
    pub fn use_for_subject_queue(&self) -> bool {
        self.use_for_subject_queue.value()
    }

    #[inline]
    pub fn set_use_for_subject_queue(&mut self, v: bool) {
        self.use_for_subject_queue.set(v);
    }

    #[inline]
    pub fn dispatch_plugin(&self) -> &str {
        &self.dispatch_plugin
    }

    #[inline]
    pub fn set_dispatch_plugin(&mut self, plugin: impl Into<String>) {
        self.dispatch_plugin.set(plugin.into());
    }

    /// Burst mode collect window in milliseconds, 0 switches burst mode off
    #[inline]
    pub fn collect_time(&self) -> i64 {
        self.collect_time.value()
    }

    #[inline]
    pub fn set_collect_time(&mut self, millis: i64) {
        self.collect_time.set(norm_collect_time(millis));
    }

    /// Max messages per burst, `-1` is unlimited
    #[inline]
    pub fn burst_mode_max_entries(&self) -> i32 {
        self.burst_mode_max_entries.value()
    }

    #[inline]
    pub fn set_burst_mode_max_entries(&mut self, max: i32) {
        self.burst_mode_max_entries.set(max.max(-1));
    }

    #[inline]
    pub fn burst_mode_max_bytes(&self) -> i64 {
        self.burst_mode_max_bytes.value()
    }

    #[inline]
    pub fn set_burst_mode_max_bytes(&mut self, max: i64) {
        self.burst_mode_max_bytes.set(max.max(-1));
    }

    #[inline]
    pub fn compress_type(&self) -> &str {
        &self.compress_type
    }

    #[inline]
    pub fn set_compress_type(&mut self, t: impl Into<String>) {
        self.compress_type.set(t.into());
    }

    #[inline]
    pub fn min_size(&self) -> i64 {
        self.min_size.value()
    }

    #[inline]
    pub fn set_min_size(&mut self, size: i64) {
        self.min_size.set(size.max(0));
    }

    #[inline]
    pub fn ptp_allowed(&self) -> bool {
        self.ptp_allowed.value()
    }

    #[inline]
    pub fn set_ptp_allowed(&mut self, allowed: bool) {
        self.ptp_allowed.set(allowed);
    }

    /// Parses an `<address>` or `<callback>` element into a new instance.
    pub fn from_node(kind: AddressKind, node: &Node, scopes: &mut ScopeStack) -> Self {
        let mut a = Self::new(kind);
        a.read(node, scopes);
        a
    }

    /// Overlays the attributes and children of `node`, values not given stay untouched.
    pub fn read(&mut self, node: &Node, scopes: &mut ScopeStack) {
        for a in node.attributes() {
            let name = a.name();
            let value = a.value();
            match name.to_ascii_lowercase().as_str() {
                "type" => self.set_type(value),
                "version" => self.set_version(value),
                "bootstraphostname" | "hostname" => self.set_bootstrap_hostname(value),
                "bootstrapport" | "port" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_bootstrap_port(v)
                    }
                }
                "sessionid" => self.set_session_id(value),
                "pinginterval" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_ping_interval(v)
                    }
                }
                "retries" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_retries(v)
                    }
                }
                "delay" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_delay(v)
                    }
                }
                "oneway" => {
                    if let Some(v) = xml::parse_bool(value, name) {
                        self.set_oneway(v)
                    }
                }
                "dispatcheractive" => {
                    if let Some(v) = xml::parse_bool(value, name) {
                        self.set_dispatcher_active(v)
                    }
                }
                "useforsubjectqueue" => {
                    if let Some(v) = xml::parse_bool(value, name) {
                        self.set_use_for_subject_queue(v)
                    }
                }
                "dispatchplugin" => self.set_dispatch_plugin(value),
                _ => log::warn!("unknown attribute '{}' in <{}>, ignored", name, self.kind.tag()),
            }
        }

        let raw = xml::text(node);
        if !raw.is_empty() {
            self.raw_address = raw;
        }

        scopes.push(self.kind.scope());
        for child in xml::elements(*node) {
            let tag = child.tag_name().name();
            if !scopes.allows(tag) {
                continue;
            }
            match tag.to_ascii_lowercase().as_str() {
                "burstmode" => {
                    if let Some(v) = attr_num(&child, "collectTime") {
                        self.set_collect_time(v);
                    }
                    if let Some(v) = attr_num(&child, "maxEntries") {
                        self.set_burst_mode_max_entries(v);
                    }
                    if let Some(v) = attr_num(&child, "maxBytes") {
                        self.set_burst_mode_max_bytes(v);
                    }
                }
                "compress" => {
                    if let Some(t) = xml::attr(&child, "type") {
                        self.set_compress_type(t);
                    }
                    if let Some(v) = attr_num(&child, "minSize") {
                        self.set_min_size(v);
                    }
                }
                "ptp" => {
                    if let Some(v) = xml::flag(&child) {
                        self.set_ptp_allowed(v);
                    }
                }
                "oneway" => {
                    if let Some(v) = xml::flag(&child) {
                        self.set_oneway(v);
                    }
                }
                _ => log::warn!("unknown element <{}> in <{}>, ignored", tag, self.kind.tag()),
            }
        }
        scopes.pop();
    }

    /// `<address type='SOCKET' ...>raw<burstMode .../></address>`, only changed values are written.
    pub fn to_xml(&self, extra_offset: &str) -> String {
        let off = offset(extra_offset);
        let tag = self.kind.tag();
        let mut sb = String::with_capacity(256);
        sb.push_str(&off);
        sb.push('<');
        sb.push_str(tag);
        write_attr(&mut sb, "type", self.type_());
        if self.version.is_modified() {
            write_attr(&mut sb, "version", self.version());
        }
        if self.bootstrap_hostname.is_modified() {
            write_attr(&mut sb, "bootstrapHostname", self.bootstrap_hostname());
        }
        if self.bootstrap_port.is_modified() {
            write_attr(&mut sb, "bootstrapPort", self.bootstrap_port());
        }
        if self.session_id.is_modified() {
            write_attr(&mut sb, "sessionId", self.session_id());
        }
        if self.ping_interval.is_modified() {
            write_attr(&mut sb, "pingInterval", self.ping_interval());
        }
        if self.retries.is_modified() {
            write_attr(&mut sb, "retries", self.retries());
        }
        if self.delay.is_modified() {
            write_attr(&mut sb, "delay", self.delay());
        }
        if self.oneway.is_modified() {
            write_attr(&mut sb, "oneway", self.oneway());
        }
        if self.dispatcher_active.is_modified() {
            write_attr(&mut sb, "dispatcherActive", self.dispatcher_active());
        }
        if self.use_for_subject_queue.is_modified() {
            write_attr(&mut sb, "useForSubjectQueue", self.use_for_subject_queue());
        }
        if self.dispatch_plugin.is_modified() {
            write_attr(&mut sb, "dispatchPlugin", self.dispatch_plugin());
        }

        let child_offset = offset(&format!("{}{}", extra_offset, xml::INDENT));
        let mut children = String::new();
        if self.collect_time.is_modified()
            || self.burst_mode_max_entries.is_modified()
            || self.burst_mode_max_bytes.is_modified()
        {
            children.push_str(&child_offset);
            children.push_str("<burstMode");
            if self.collect_time.is_modified() {
                write_attr(&mut children, "collectTime", self.collect_time());
            }
            if self.burst_mode_max_entries.is_modified() {
                write_attr(&mut children, "maxEntries", self.burst_mode_max_entries());
            }
            if self.burst_mode_max_bytes.is_modified() {
                write_attr(&mut children, "maxBytes", self.burst_mode_max_bytes());
            }
            children.push_str("/>");
        }
        if self.compress_type.is_modified() || self.min_size.is_modified() {
            children.push_str(&child_offset);
            children.push_str("<compress");
            write_attr(&mut children, "type", self.compress_type());
            if self.min_size.is_modified() {
                write_attr(&mut children, "minSize", self.min_size());
            }
            children.push_str("/>");
        }
        if self.ptp_allowed.is_modified() {
            write_flag(&mut children, &child_offset, "ptp", self.ptp_allowed());
        }

        if self.raw_address.is_empty() && children.is_empty() {
            sb.push_str("/>");
            return sb;
        }
        sb.push('>');
        sb.push_str(&escape(&self.raw_address));
        if !children.is_empty() {
            sb.push_str(&children);
            sb.push_str(&off);
        }
        sb.push_str("</");
        sb.push_str(tag);
        sb.push('>');
        sb
    }
}

/// A server address handed to the client for a later failover, `<serverRef type='IOR'>...</serverRef>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRef {
    pub type_: String,
    pub address: String,
}

impl ServerRef {
    pub fn new(type_: impl Into<String>, address: impl Into<String>) -> Self {
        Self { type_: type_.into(), address: address.into() }
    }

    pub fn from_node(node: &Node) -> Self {
        let type_ = xml::attr(node, "type").unwrap_or(DEFAULT_TYPE);
        Self::new(type_, xml::text(node))
    }

    pub fn to_xml(&self, extra_offset: &str) -> String {
        let mut sb = offset(extra_offset);
        sb.push_str("<serverRef");
        write_attr(&mut sb, "type", &self.type_);
        sb.push('>');
        sb.push_str(&escape(&self.address));
        sb.push_str("</serverRef>");
        sb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn parse(kind: AddressKind, xml: &str) -> AddressBase {
        let doc = Document::parse(xml).unwrap();
        AddressBase::from_node(kind, &doc.root_element(), &mut ScopeStack::new())
    }

    #[test]
    fn test_defaults() {
        let a = AddressBase::client();
        assert_eq!((a.ping_interval(), a.retries(), a.delay()), (10000, -1, 5000));
        assert!(a.is_fail_safe());
        let cb = AddressBase::callback();
        assert_eq!((cb.ping_interval(), cb.retries(), cb.delay()), (10000, 0, 5000));
        assert_eq!(cb.type_(), "SOCKET");
        assert_eq!(cb.bootstrap_port(), 3412);
    }

    #[test]
    fn test_normalization() {
        let mut a = AddressBase::client();
        a.set_retries(-7);
        assert_eq!(a.retries(), -1);
        a.set_delay(-3);
        assert_eq!(a.delay(), 0);
        assert!(!a.is_fail_safe());
        a.set_ping_interval(5);
        assert_eq!(a.ping_interval(), 10);
        a.set_ping_interval(-1);
        assert_eq!(a.ping_interval(), 0);
        a.set_collect_time(-100);
        assert_eq!(a.collect_time(), 0);
    }

    #[test]
    fn test_minimal_xml() {
        let a = AddressBase::client();
        assert_eq!(a.to_xml(""), "\n <address type='SOCKET'/>");

        let mut cb = AddressBase::callback();
        cb.set_raw_address("socket://127.0.0.1:7607");
        cb.set_retries(3);
        cb.set_collect_time(200);
        assert_eq!(
            cb.to_xml(""),
            "\n <callback type='SOCKET' retries='3'>socket://127.0.0.1:7607\n  <burstMode collectTime='200'/>\n </callback>"
        );
    }

    #[test]
    fn test_read() {
        let a = parse(
            AddressKind::Callback,
            "<callback type='XMLRPC' hostname='myhost' port='8080' retries='-5' delay='1000' pingInterval='3'>\
               http://myhost:8080/\
               <burstMode collectTime='400' maxEntries='20'/>\
               <compress type='zlib:stream' minSize='1000'/>\
               <ptp>false</ptp>\
               <queue relating='callback'/>\
             </callback>",
        );
        assert_eq!(a.type_(), "XMLRPC");
        assert_eq!(a.bootstrap_hostname(), "myhost");
        assert_eq!(a.bootstrap_port(), 8080);
        assert_eq!(a.retries(), -1);
        assert_eq!(a.delay(), 1000);
        assert_eq!(a.ping_interval(), 10);
        assert_eq!(a.raw_address(), "http://myhost:8080/");
        assert_eq!((a.collect_time(), a.burst_mode_max_entries()), (400, 20));
        assert_eq!((a.compress_type(), a.min_size()), ("zlib:stream", 1000));
        assert!(!a.ptp_allowed());

        let again = parse(AddressKind::Callback, a.to_xml("").trim());
        assert_eq!(again.to_xml(""), a.to_xml(""));
    }

    #[test]
    fn test_properties() {
        let props = Properties::new()
            .with("dispatch/connection/retries", "-9")
            .with("dispatch/connection/delay", "2s")
            .with("dispatch/connection/delay[heron]", "100")
            .with("dispatch/callback/pingInterval", "0");

        let a = AddressBase::with_properties(AddressKind::Client, &props, Some("heron"));
        assert_eq!(a.retries(), -1);
        assert_eq!(a.delay(), 100);
        let a = AddressBase::with_properties(AddressKind::Client, &props, None);
        assert_eq!(a.delay(), 2000);
        assert_eq!(a.ping_interval(), 10000);
        //config sourced values are written
        assert_eq!(a.to_xml(""), "\n <address type='SOCKET' retries='-1' delay='2000'/>");

        let cb = AddressBase::with_properties(AddressKind::Callback, &props, None);
        assert_eq!(cb.ping_interval(), 0);

        let mut explicit = AddressBase::with_properties(AddressKind::Client, &props, Some("heron"));
        explicit.set_delay(7);
        assert_eq!(explicit.delay(), 7);
    }

    #[test]
    fn test_zero_delay_property() {
        let props = Properties::new().with("dispatch/connection/delay", "0s").with("dispatch/connection/pingInterval", "0ms");
        let a = AddressBase::with_properties(AddressKind::Client, &props, None);
        assert_eq!(a.delay(), 0);
        assert!(!a.is_fail_safe());
        assert_eq!(a.ping_interval(), 0);
    }

    #[test]
    fn test_server_ref() {
        let doc = Document::parse("<serverRef type='IOR'>IOR:00044</serverRef>").unwrap();
        let r = ServerRef::from_node(&doc.root_element());
        assert_eq!(r, ServerRef::new("IOR", "IOR:00044"));
        assert_eq!(r.to_xml(""), "\n <serverRef type='IOR'>IOR:00044</serverRef>");
    }
}
