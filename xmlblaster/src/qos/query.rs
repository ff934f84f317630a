use roxmltree::Node;

use crate::error::Result;
use crate::prop::Prop;
use crate::xml::{self, escape, offset, write_attr, write_flag, Scope, ScopeStack};

use super::{write_subscribe_id, QosData, QosKind};

/// QoS of subscribe, unSubscribe, get and erase.
pub type QueryQosData = QosData<QueryQos>;

pub const SUBSCRIPTION_ID_PREFIX: &str = "__subId:";

/// Filter plugin applied to each message before delivery,
/// `<filter type='GnuRegexFilter' version='1.0'>^H.*$</filter>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessFilter {
    pub type_: String,
    pub version: String,
    pub query: String,
}

impl AccessFilter {
    pub fn new(type_: impl Into<String>, version: impl Into<String>, query: impl Into<String>) -> Self {
        Self { type_: type_.into(), version: version.into(), query: query.into() }
    }

    fn from_node(node: &Node) -> Option<Self> {
        let type_ = match xml::attr(node, "type") {
            Some(t) => t.trim(),
            None => {
                log::warn!("<filter> without type, ignored");
                return None;
            }
        };
        let version = xml::attr(node, "version").unwrap_or("1.0").trim();
        Some(Self::new(type_, version, xml::text(node)))
    }

    fn to_xml(&self, extra_offset: &str) -> String {
        let mut sb = offset(extra_offset);
        sb.push_str("<filter");
        write_attr(&mut sb, "type", &self.type_);
        write_attr(&mut sb, "version", &self.version);
        sb.push('>');
        sb.push_str(&escape(&self.query));
        sb.push_str("</filter>");
        sb
    }
}

/// How many history messages a subscribe or get delivers, `<history numEntries='1' newestFirst='true'/>`.
#[derive(Debug, Clone)]
pub struct HistoryQos {
    num_entries: Prop<i32>,
    newest_first: Prop<bool>,
}

impl Default for HistoryQos {
    fn default() -> Self {
        Self { num_entries: Prop::new(1), newest_first: Prop::new(true) }
    }
}

impl HistoryQos {
    /// `-1` delivers the complete history
    #[inline]
    pub fn num_entries(&self) -> i32 {
        self.num_entries.value()
    }

    #[inline]
    pub fn set_num_entries(&mut self, n: i32) {
        self.num_entries.set(n.max(-1));
    }

    #[inline]
    pub fn newest_first(&self) -> bool {
        self.newest_first.value()
    }

    #[inline]
    pub fn set_newest_first(&mut self, newest_first: bool) {
        self.newest_first.set(newest_first);
    }

    fn read(&mut self, node: &Node) {
        if let Some(n) = xml::attr_num(node, "numEntries") {
            self.set_num_entries(n);
        }
        if let Some(v) = xml::attr_bool(node, "newestFirst") {
            self.set_newest_first(v);
        }
    }

    fn to_xml(&self, extra_offset: &str) -> String {
        if !self.num_entries.is_modified() && !self.newest_first.is_modified() {
            return String::new();
        }
        let mut sb = offset(extra_offset);
        sb.push_str("<history");
        if self.num_entries.is_modified() {
            write_attr(&mut sb, "numEntries", self.num_entries());
        }
        if self.newest_first.is_modified() {
            write_attr(&mut sb, "newestFirst", self.newest_first());
        }
        sb.push_str("/>");
        sb
    }
}

#[derive(Debug, Clone)]
pub struct QueryQos {
    subscription_id: Option<String>,
    force_destroy: Prop<bool>,
    meta: Prop<bool>,
    content: Prop<bool>,
    multi_subscribe: Prop<bool>,
    local: Prop<bool>,
    initial_update: Prop<bool>,
    update_oneway: Prop<bool>,
    notify: Prop<bool>,
    filters: Vec<AccessFilter>,
    history: HistoryQos,
}

impl Default for QueryQos {
    fn default() -> Self {
        Self {
            subscription_id: None,
            force_destroy: Prop::new(false),
            meta: Prop::new(true),
            content: Prop::new(true),
            multi_subscribe: Prop::new(true),
            local: Prop::new(true),
            initial_update: Prop::new(true),
            update_oneway: Prop::new(false),
            notify: Prop::new(true),
            filters: Vec::new(),
            history: HistoryQos::default(),
        }
    }
}

impl QueryQos {
    fn flag_mut(&mut self, tag: &str) -> Option<&mut Prop<bool>> {
        let p = match tag {
            "meta" => &mut self.meta,
            "content" => &mut self.content,
            "multisubscribe" => &mut self.multi_subscribe,
            "local" => &mut self.local,
            "initialupdate" => &mut self.initial_update,
            "updateoneway" => &mut self.update_oneway,
            "notify" => &mut self.notify,
            _ => return None,
        };
        Some(p)
    }
}

impl QosKind for QueryQos {
    fn read_element(qos: &mut QueryQosData, node: &Node, _xml: &str, scopes: &mut ScopeStack) -> Result<bool> {
        let tag = node.tag_name().name().to_ascii_lowercase();
        match tag.as_str() {
            "subscribe" => {
                if let Some(id) = xml::attr(node, "id") {
                    qos.kind.subscription_id = Some(id.trim().to_owned());
                }
            }
            "erase" => {
                if let Some(v) = xml::attr_bool(node, "forceDestroy") {
                    qos.kind.force_destroy.set(v);
                }
            }
            "filter" => {
                scopes.push(Scope::Filter);
                if let Some(f) = AccessFilter::from_node(node) {
                    qos.kind.filters.push(f);
                }
                scopes.pop();
            }
            "history" => {
                scopes.push(Scope::History);
                qos.kind.history.read(node);
                scopes.pop();
            }
            other => match qos.kind.flag_mut(other) {
                Some(p) => {
                    if let Some(v) = xml::flag(node) {
                        p.set(v);
                    }
                }
                None => return Ok(false),
            },
        }
        Ok(true)
    }

    fn write_body(qos: &QueryQosData, sb: &mut String, extra_offset: &str) {
        let off = offset(extra_offset);
        let k = &qos.kind;
        qos.write_state(sb, extra_offset);
        write_subscribe_id(sb, extra_offset, k.subscription_id.as_deref());
        if k.force_destroy.is_modified() {
            sb.push_str(&off);
            sb.push_str("<erase");
            write_attr(sb, "forceDestroy", k.force_destroy.value());
            sb.push_str("/>");
        }
        let flags = [
            ("meta", &k.meta),
            ("content", &k.content),
            ("multiSubscribe", &k.multi_subscribe),
            ("local", &k.local),
            ("initialUpdate", &k.initial_update),
            ("updateOneway", &k.update_oneway),
            ("notify", &k.notify),
        ];
        for (tag, p) in flags {
            if p.is_modified() {
                write_flag(sb, &off, tag, p.value());
            }
        }
        qos.write_persistent(sb, extra_offset, "persistent");
        for f in &k.filters {
            sb.push_str(&f.to_xml(extra_offset));
        }
        sb.push_str(&k.history.to_xml(extra_offset));
        qos.write_method(sb, extra_offset);
        qos.write_client_properties(sb, extra_offset);
    }
}

impl QosData<QueryQos> {
    /// A fresh client side subscription id, `__subId:<uuid>`
    pub fn generate_subscription_id() -> String {
        format!("{}{}", SUBSCRIPTION_ID_PREFIX, uuid::Uuid::new_v4().simple())
    }

    #[inline]
    pub fn subscription_id(&self) -> Option<&str> {
        self.kind.subscription_id.as_deref()
    }

    #[inline]
    pub fn set_subscription_id(&mut self, id: impl Into<String>) {
        self.kind.subscription_id = Some(id.into());
    }

    /// Erase the topic even if messages are still queued for delivery
    #[inline]
    pub fn is_force_destroy(&self) -> bool {
        self.kind.force_destroy.value()
    }

    #[inline]
    pub fn set_force_destroy(&mut self, force: bool) {
        self.kind.force_destroy.set(force);
    }

    /// Deliver the key of the messages
    #[inline]
    pub fn want_meta(&self) -> bool {
        self.kind.meta.value()
    }

    #[inline]
    pub fn set_want_meta(&mut self, v: bool) {
        self.kind.meta.set(v);
    }

    /// Deliver the content of the messages
    #[inline]
    pub fn want_content(&self) -> bool {
        self.kind.content.value()
    }

    #[inline]
    pub fn set_want_content(&mut self, v: bool) {
        self.kind.content.set(v);
    }

    /// Allow more than one subscription on the same topic
    #[inline]
    pub fn multi_subscribe(&self) -> bool {
        self.kind.multi_subscribe.value()
    }

    #[inline]
    pub fn set_multi_subscribe(&mut self, v: bool) {
        self.kind.multi_subscribe.set(v);
    }

    /// Receive own publishes
    #[inline]
    pub fn want_local(&self) -> bool {
        self.kind.local.value()
    }

    #[inline]
    pub fn set_want_local(&mut self, v: bool) {
        self.kind.local.set(v);
    }

    /// Deliver the current message immediately on subscribe
    #[inline]
    pub fn want_initial_update(&self) -> bool {
        self.kind.initial_update.value()
    }

    #[inline]
    pub fn set_want_initial_update(&mut self, v: bool) {
        self.kind.initial_update.set(v);
    }

    #[inline]
    pub fn want_update_oneway(&self) -> bool {
        self.kind.update_oneway.value()
    }

    #[inline]
    pub fn set_want_update_oneway(&mut self, v: bool) {
        self.kind.update_oneway.set(v);
    }

    /// Get an erase notification when the topic goes away
    #[inline]
    pub fn want_notify(&self) -> bool {
        self.kind.notify.value()
    }

    #[inline]
    pub fn set_want_notify(&mut self, v: bool) {
        self.kind.notify.set(v);
    }

    #[inline]
    pub fn access_filters(&self) -> &[AccessFilter] {
        &self.kind.filters
    }

    #[inline]
    pub fn add_access_filter(&mut self, filter: AccessFilter) {
        self.kind.filters.push(filter);
    }

    #[inline]
    pub fn history(&self) -> &HistoryQos {
        &self.kind.history
    }

    #[inline]
    pub fn history_mut(&mut self) -> &mut HistoryQos {
        &mut self.kind.history
    }
}
