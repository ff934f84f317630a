use roxmltree::{Document, Node};

use xmlblaster_conf::Properties;

use crate::address::{AddressBase, AddressKind, ServerRef};
use crate::error::{Result, XmlBlasterError};
use crate::prop::Prop;
use crate::queue_property::{CbQueueProperty, QueueProperty};
use crate::types::{Relating, SessionName};
use crate::xml::{self, escape, offset, write_attr, write_flag, Scope, ScopeStack};

use super::{QosData, QosKind};

/// QoS of a login, also used for the connect return.
pub type ConnectQosData = QosData<ConnectQos>;
/// What the server hands back from connect, carrying the secret session id and its instance id
pub type ConnectReturnQos = ConnectQosData;

pub const DEFAULT_SESSION_TIMEOUT: i64 = 86_400_000;
pub const DEFAULT_MAX_SESSIONS: i32 = 10;

/// Credentials for the server side security plugin, kept as the received
/// `<securityService type='htpasswd' version='1.0'>...</securityService>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityQos {
    type_: String,
    version: String,
    user: Option<String>,
    passwd: Option<String>,
    raw: String,
}

impl SecurityQos {
    /// Login name and password for the `htpasswd` plugin
    pub fn htpasswd(user: &str, passwd: &str) -> Self {
        let raw = format!(
            "<securityService type='htpasswd' version='1.0'><![CDATA[<user>{}</user><passwd>{}</passwd>]]></securityService>",
            escape(user),
            escape(passwd)
        );
        Self {
            type_: "htpasswd".into(),
            version: "1.0".into(),
            user: Some(user.to_owned()),
            passwd: Some(passwd.to_owned()),
            raw,
        }
    }

    /// Fails with `user.security` if `type` or `version` is missing or the credentials are not well formed.
    pub fn from_node(node: &Node, xml: &str) -> Result<Self> {
        let type_ = xml::attr(node, "type")
            .ok_or_else(|| XmlBlasterError::Security("missing 'type' attribute in <securityService>".into()))?;
        let version = xml::attr(node, "version")
            .ok_or_else(|| XmlBlasterError::Security("missing 'version' attribute in <securityService>".into()))?;

        let mut user = None;
        let mut passwd = None;
        credentials(*node, &mut user, &mut passwd);

        // credentials are usually wrapped in CDATA
        let embedded = xml::text(node);
        if !embedded.is_empty() {
            let wrapped = format!("<securityService>{}</securityService>", embedded);
            let doc = Document::parse(&wrapped).map_err(|e| {
                XmlBlasterError::Security(format!("<securityService type='{}'> is not well formed: {}", type_, e))
            })?;
            credentials(doc.root_element(), &mut user, &mut passwd);
        }

        Ok(Self {
            type_: type_.trim().to_owned(),
            version: version.trim().to_owned(),
            user,
            passwd,
            raw: xml[node.range()].to_owned(),
        })
    }

    #[inline]
    pub fn type_(&self) -> &str {
        &self.type_
    }

    #[inline]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[inline]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    #[inline]
    pub fn passwd(&self) -> Option<&str> {
        self.passwd.as_deref()
    }

    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    fn to_xml(&self, extra_offset: &str) -> String {
        format!("{}{}", offset(extra_offset), self.raw)
    }
}

fn credentials(node: Node, user: &mut Option<String>, passwd: &mut Option<String>) {
    for c in xml::elements(node) {
        if xml::is_tag(&c, "user") {
            *user = Some(xml::text(&c));
        } else if xml::is_tag(&c, "passwd") {
            *passwd = Some(xml::text(&c));
        }
    }
}

/// Login session settings, `<session name='joe/1' timeout='86400000' maxSessions='10'/>`.
#[derive(Debug, Clone)]
pub struct SessionQos {
    name: Option<SessionName>,
    timeout: Prop<i64>,
    max_sessions: Prop<i32>,
    clear_sessions: Prop<bool>,
    reconnect_same_client_only: Prop<bool>,
    secret_session_id: Option<String>,
}

impl Default for SessionQos {
    fn default() -> Self {
        Self {
            name: None,
            timeout: Prop::new(DEFAULT_SESSION_TIMEOUT),
            max_sessions: Prop::new(DEFAULT_MAX_SESSIONS),
            clear_sessions: Prop::new(false),
            reconnect_same_client_only: Prop::new(false),
            secret_session_id: None,
        }
    }
}

impl SessionQos {
    #[inline]
    pub fn name(&self) -> Option<&SessionName> {
        self.name.as_ref()
    }

    #[inline]
    pub fn set_name(&mut self, name: SessionName) {
        self.name = Some(name);
    }

    /// Session lifetime in milliseconds without a connection, `0` forever
    #[inline]
    pub fn timeout(&self) -> i64 {
        self.timeout.value()
    }

    #[inline]
    pub fn set_timeout(&mut self, millis: i64) {
        self.timeout.set(millis.max(0));
    }

    #[inline]
    pub fn max_sessions(&self) -> i32 {
        self.max_sessions.value()
    }

    #[inline]
    pub fn set_max_sessions(&mut self, max: i32) {
        self.max_sessions.set(max);
    }

    #[inline]
    pub fn clear_sessions(&self) -> bool {
        self.clear_sessions.value()
    }

    #[inline]
    pub fn set_clear_sessions(&mut self, clear: bool) {
        self.clear_sessions.set(clear);
    }

    /// Only the client owning the session may reconnect to it
    #[inline]
    pub fn reconnect_same_client_only(&self) -> bool {
        self.reconnect_same_client_only.value()
    }

    #[inline]
    pub fn set_reconnect_same_client_only(&mut self, v: bool) {
        self.reconnect_same_client_only.set(v);
    }

    /// Assigned by the server on connect
    #[inline]
    pub fn secret_session_id(&self) -> Option<&str> {
        self.secret_session_id.as_deref()
    }

    #[inline]
    pub fn set_secret_session_id(&mut self, id: impl Into<String>) {
        self.secret_session_id = Some(id.into());
    }

    fn read(&mut self, node: &Node) {
        for a in node.attributes() {
            let name = a.name();
            let value = a.value();
            match name.to_ascii_lowercase().as_str() {
                "name" => match SessionName::parse(value) {
                    Ok(n) => self.name = Some(n),
                    Err(e) => log::warn!("{}, <session name> ignored", e),
                },
                "timeout" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_timeout(v);
                    }
                }
                "maxsessions" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_max_sessions(v);
                    }
                }
                "clearsessions" => {
                    if let Some(v) = xml::parse_bool(value, name) {
                        self.set_clear_sessions(v);
                    }
                }
                "reconnectsameclientonly" => {
                    if let Some(v) = xml::parse_bool(value, name) {
                        self.set_reconnect_same_client_only(v);
                    }
                }
                "sessionid" => {
                    let id = value.trim();
                    if !id.is_empty() {
                        self.secret_session_id = Some(id.to_owned());
                    }
                }
                _ => log::warn!("unknown attribute '{}' in <session>, ignored", name),
            }
        }
    }

    fn to_xml(&self, extra_offset: &str) -> String {
        let mut attrs = String::new();
        if let Some(name) = &self.name {
            write_attr(&mut attrs, "name", name.wire_name());
        }
        if self.timeout.is_modified() {
            write_attr(&mut attrs, "timeout", self.timeout());
        }
        if self.max_sessions.is_modified() {
            write_attr(&mut attrs, "maxSessions", self.max_sessions());
        }
        if self.clear_sessions.is_modified() {
            write_attr(&mut attrs, "clearSessions", self.clear_sessions());
        }
        if self.reconnect_same_client_only.is_modified() {
            write_attr(&mut attrs, "reconnectSameClientOnly", self.reconnect_same_client_only());
        }
        if let Some(id) = &self.secret_session_id {
            write_attr(&mut attrs, "sessionId", id);
        }
        if attrs.is_empty() {
            return attrs;
        }
        format!("{}<session{}/>", offset(extra_offset), attrs)
    }
}

#[derive(Debug, Clone)]
pub struct ConnectQos {
    security: Option<SecurityQos>,
    session: SessionQos,
    ptp: Prop<bool>,
    cluster_node: Prop<bool>,
    duplicate_updates: Prop<bool>,
    reconnected: Prop<bool>,
    client_queues: Vec<QueueProperty>,
    subject_queue: Option<CbQueueProperty>,
    session_cb_queue: Option<CbQueueProperty>,
    server_refs: Vec<ServerRef>,
    instance_id: Option<String>,
}

impl Default for ConnectQos {
    fn default() -> Self {
        Self {
            security: None,
            session: SessionQos::default(),
            ptp: Prop::new(true),
            cluster_node: Prop::new(false),
            duplicate_updates: Prop::new(true),
            reconnected: Prop::new(false),
            client_queues: Vec::new(),
            subject_queue: None,
            session_cb_queue: None,
            server_refs: Vec::new(),
            instance_id: None,
        }
    }
}

impl ConnectQos {
    fn read_queue(&mut self, node: &Node, scopes: &mut ScopeStack) {
        let relating = match xml::attr(node, "relating").map(|r| r.parse::<Relating>()) {
            Some(Ok(r)) => r,
            Some(Err(e)) => {
                log::warn!("{}, <queue> ignored", e);
                return;
            }
            None => {
                log::warn!("<queue> without relating, ignored");
                return;
            }
        };
        match relating {
            Relating::Client | Relating::Callback | Relating::Subject => {
                let q = QueueProperty::from_node(relating, node, scopes);
                match relating {
                    Relating::Client => self.client_queues.push(q),
                    Relating::Subject => self.subject_queue = Some(q),
                    _ => self.session_cb_queue = Some(q),
                }
            }
            other => log::warn!("<queue relating='{}'> is not supported on connect, ignored", other),
        }
    }
}

impl QosKind for ConnectQos {
    fn read_element(qos: &mut ConnectQosData, node: &Node, xml: &str, scopes: &mut ScopeStack) -> Result<bool> {
        let tag = node.tag_name().name().to_ascii_lowercase();
        let k = &mut qos.kind;
        match tag.as_str() {
            "securityservice" => {
                scopes.push(Scope::Security);
                let sec = SecurityQos::from_node(node, xml);
                scopes.pop();
                k.security = Some(sec?);
            }
            "session" => {
                scopes.push(Scope::Session);
                k.session.read(node);
                scopes.pop();
            }
            "ptp" | "clusternode" | "duplicateupdates" | "reconnected" => {
                let p = match tag.as_str() {
                    "ptp" => &mut k.ptp,
                    "clusternode" => &mut k.cluster_node,
                    "duplicateupdates" => &mut k.duplicate_updates,
                    _ => &mut k.reconnected,
                };
                if let Some(v) = xml::flag(node) {
                    p.set(v);
                }
            }
            "queue" => k.read_queue(node, scopes),
            "callback" => {
                // shorthand for the session callback queue with default limits
                let addr = AddressBase::from_node(AddressKind::Callback, node, scopes);
                k.session_cb_queue.get_or_insert_with(|| CbQueueProperty::new(Relating::Callback)).set_address(addr);
            }
            "address" => {
                let addr = AddressBase::from_node(AddressKind::Client, node, scopes);
                let mut q = QueueProperty::new(Relating::Client);
                q.set_address(addr);
                k.client_queues.push(q);
            }
            "serverref" => k.server_refs.push(ServerRef::from_node(node)),
            "instanceid" => {
                let id = xml::text(node);
                if !id.is_empty() {
                    k.instance_id = Some(id);
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn write_body(qos: &ConnectQosData, sb: &mut String, extra_offset: &str) {
        let off = offset(extra_offset);
        let k = &qos.kind;
        if let Some(sec) = &k.security {
            sb.push_str(&sec.to_xml(extra_offset));
        }
        for (tag, p) in [
            ("ptp", &k.ptp),
            ("clusterNode", &k.cluster_node),
            ("duplicateUpdates", &k.duplicate_updates),
            ("reconnected", &k.reconnected),
        ] {
            if p.is_modified() {
                write_flag(sb, &off, tag, p.value());
            }
        }
        sb.push_str(&k.session.to_xml(extra_offset));
        for q in &k.client_queues {
            sb.push_str(&q.to_xml(extra_offset));
        }
        if let Some(q) = &k.subject_queue {
            sb.push_str(&q.to_xml(extra_offset));
        }
        if let Some(q) = &k.session_cb_queue {
            sb.push_str(&q.to_xml(extra_offset));
        }
        for r in &k.server_refs {
            sb.push_str(&r.to_xml(extra_offset));
        }
        if let Some(id) = &k.instance_id {
            sb.push_str(&off);
            sb.push_str(&format!("<instanceId>{}</instanceId>", escape(id)));
        }
        qos.write_client_properties(sb, extra_offset);
    }
}

impl QosData<ConnectQos> {
    /// Login with `htpasswd` credentials, `name` may carry a public session id such as `joe/1`.
    pub fn with_login(name: &str, passwd: &str) -> Result<Self> {
        let session_name = SessionName::parse(name)?;
        let mut qos = Self::new();
        qos.kind.security = Some(SecurityQos::htpasswd(session_name.login_name(), passwd));
        qos.kind.session.set_name(session_name);
        Ok(qos)
    }

    /// A connect QoS whose client queue, client address, callback queue and
    /// callback address are taken from `props`.
    pub fn with_properties(props: &Properties, node_id: Option<&str>) -> Self {
        let mut qos = Self::new();
        let mut client = QueueProperty::with_properties(Relating::Client, props, node_id);
        client.set_address(AddressBase::with_properties(AddressKind::Client, props, node_id));
        qos.kind.client_queues.push(client);
        let mut cb = CbQueueProperty::with_properties(Relating::Callback, props, node_id);
        cb.set_address(AddressBase::with_properties(AddressKind::Callback, props, node_id));
        qos.kind.session_cb_queue = Some(cb);
        qos
    }

    #[inline]
    pub fn security(&self) -> Option<&SecurityQos> {
        self.kind.security.as_ref()
    }

    #[inline]
    pub fn set_security(&mut self, security: SecurityQos) {
        self.kind.security = Some(security);
    }

    #[inline]
    pub fn session(&self) -> &SessionQos {
        &self.kind.session
    }

    #[inline]
    pub fn session_mut(&mut self) -> &mut SessionQos {
        &mut self.kind.session
    }

    #[inline]
    pub fn session_name(&self) -> Option<&SessionName> {
        self.kind.session.name()
    }

    #[inline]
    pub fn secret_session_id(&self) -> Option<&str> {
        self.kind.session.secret_session_id()
    }

    #[inline]
    pub fn set_secret_session_id(&mut self, id: impl Into<String>) {
        self.kind.session.set_secret_session_id(id);
    }

    /// Accept point to point messages
    #[inline]
    pub fn is_ptp_allowed(&self) -> bool {
        self.kind.ptp.value()
    }

    #[inline]
    pub fn set_ptp_allowed(&mut self, v: bool) {
        self.kind.ptp.set(v);
    }

    /// The login comes from another cluster node
    #[inline]
    pub fn is_cluster_node(&self) -> bool {
        self.kind.cluster_node.value()
    }

    #[inline]
    pub fn set_cluster_node(&mut self, v: bool) {
        self.kind.cluster_node.set(v);
    }

    /// Deliver a message once per matching subscription
    #[inline]
    pub fn duplicate_updates(&self) -> bool {
        self.kind.duplicate_updates.value()
    }

    #[inline]
    pub fn set_duplicate_updates(&mut self, v: bool) {
        self.kind.duplicate_updates.set(v);
    }

    #[inline]
    pub fn is_reconnected(&self) -> bool {
        self.kind.reconnected.value()
    }

    #[inline]
    pub fn set_reconnected(&mut self, v: bool) {
        self.kind.reconnected.set(v);
    }

    #[inline]
    pub fn client_queues(&self) -> &[QueueProperty] {
        &self.kind.client_queues
    }

    /// The first client queue, the one the dispatcher uses
    #[inline]
    pub fn client_queue(&self) -> Option<&QueueProperty> {
        self.kind.client_queues.first()
    }

    /// The first client queue, created with defaults and a default address if there is none
    pub fn client_queue_mut(&mut self) -> &mut QueueProperty {
        if self.kind.client_queues.is_empty() {
            let mut q = QueueProperty::new(Relating::Client);
            q.set_address(AddressBase::client());
            self.kind.client_queues.push(q);
        }
        &mut self.kind.client_queues[0]
    }

    #[inline]
    pub fn add_client_queue(&mut self, q: QueueProperty) {
        self.kind.client_queues.push(q);
    }

    /// Address of the first client queue
    #[inline]
    pub fn address(&self) -> Option<&AddressBase> {
        self.client_queue().and_then(|q| q.current_address())
    }

    #[inline]
    pub fn address_mut(&mut self) -> &mut AddressBase {
        self.client_queue_mut().current_address_or_insert()
    }

    #[inline]
    pub fn subject_queue(&self) -> Option<&CbQueueProperty> {
        self.kind.subject_queue.as_ref()
    }

    #[inline]
    pub fn set_subject_queue(&mut self, q: CbQueueProperty) {
        self.kind.subject_queue = Some(q);
    }

    #[inline]
    pub fn session_cb_queue(&self) -> Option<&CbQueueProperty> {
        self.kind.session_cb_queue.as_ref()
    }

    #[inline]
    pub fn set_session_cb_queue(&mut self, q: CbQueueProperty) {
        self.kind.session_cb_queue = Some(q);
    }

    /// Where the server delivers updates
    #[inline]
    pub fn callback_address(&self) -> Option<&AddressBase> {
        self.session_cb_queue().and_then(|q| q.current_address())
    }

    #[inline]
    pub fn server_refs(&self) -> &[ServerRef] {
        &self.kind.server_refs
    }

    #[inline]
    pub fn add_server_ref(&mut self, r: ServerRef) {
        self.kind.server_refs.push(r);
    }

    /// On a connect return the instance id of the server, changes when the server restarts
    #[inline]
    pub fn instance_id(&self) -> Option<&str> {
        self.kind.instance_id.as_deref()
    }

    #[inline]
    pub fn set_instance_id(&mut self, id: impl Into<String>) {
        self.kind.instance_id = Some(id.into());
    }
}
