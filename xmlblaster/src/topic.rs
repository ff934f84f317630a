use roxmltree::Node;

use crate::prop::Prop;
use crate::queue_property::QueuePropertyBase;
use crate::types::Relating;
use crate::xml::{self, offset, write_attr, Scope, ScopeStack};

pub const DEFAULT_DESTROY_DELAY: i64 = 60_000;

/// Lifecycle settings of a topic, sent with the first publish,
/// `<topic readonly='false' destroyDelay='60000' createDomEntry='true'>`.
#[derive(Debug, Clone)]
pub struct TopicProperty {
    readonly: Prop<bool>,
    destroy_delay: Prop<i64>,
    create_dom_entry: Prop<bool>,
    msg_unit_store: Option<QueuePropertyBase>,
    history_queue: Option<QueuePropertyBase>,
}

impl Default for TopicProperty {
    fn default() -> Self {
        Self {
            readonly: Prop::new(false),
            destroy_delay: Prop::new(DEFAULT_DESTROY_DELAY),
            create_dom_entry: Prop::new(true),
            msg_unit_store: None,
            history_queue: None,
        }
    }
}

impl TopicProperty {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// A readonly topic accepts only its initial publish
    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.readonly.value()
    }

    #[inline]
    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly.set(readonly);
    }

    /// Milliseconds an unreferenced topic survives, `-1` forever
    #[inline]
    pub fn destroy_delay(&self) -> i64 {
        self.destroy_delay.value()
    }

    #[inline]
    pub fn set_destroy_delay(&mut self, millis: i64) {
        self.destroy_delay.set(millis);
    }

    /// False hides the topic from XPath queries
    #[inline]
    pub fn create_dom_entry(&self) -> bool {
        self.create_dom_entry.value()
    }

    #[inline]
    pub fn set_create_dom_entry(&mut self, create: bool) {
        self.create_dom_entry.set(create);
    }

    #[inline]
    pub fn msg_unit_store(&self) -> Option<&QueuePropertyBase> {
        self.msg_unit_store.as_ref()
    }

    #[inline]
    pub fn set_msg_unit_store(&mut self, q: QueuePropertyBase) {
        self.msg_unit_store = Some(q);
    }

    #[inline]
    pub fn history_queue(&self) -> Option<&QueuePropertyBase> {
        self.history_queue.as_ref()
    }

    #[inline]
    pub fn set_history_queue(&mut self, q: QueuePropertyBase) {
        self.history_queue = Some(q);
    }

    /// True if anything differs from the defaults and must be sent
    pub fn is_modified(&self) -> bool {
        self.readonly.is_modified()
            || self.destroy_delay.is_modified()
            || self.create_dom_entry.is_modified()
            || self.msg_unit_store.is_some()
            || self.history_queue.is_some()
    }

    pub fn read(&mut self, node: &Node, scopes: &mut ScopeStack) {
        for a in node.attributes() {
            let name = a.name();
            match name.to_ascii_lowercase().as_str() {
                "readonly" => {
                    if let Some(v) = xml::parse_bool(a.value(), name) {
                        self.set_readonly(v);
                    }
                }
                "destroydelay" => {
                    if let Some(v) = xml::parse_num(a.value(), name) {
                        self.set_destroy_delay(v);
                    }
                }
                "createdomentry" => {
                    if let Some(v) = xml::parse_bool(a.value(), name) {
                        self.set_create_dom_entry(v);
                    }
                }
                _ => log::warn!("unknown attribute '{}' in <topic>, ignored", name),
            }
        }

        scopes.push(Scope::Topic);
        for child in xml::elements(*node) {
            let tag = child.tag_name().name();
            if !scopes.allows(tag) {
                continue;
            }
            if xml::is_tag(&child, "queue") {
                let q = QueuePropertyBase::from_node(Relating::MsgUnitStore, &child, scopes);
                match q.relating() {
                    Relating::History => self.set_history_queue(q),
                    Relating::MsgUnitStore => self.set_msg_unit_store(q),
                    other => log::warn!("<queue relating='{}'> is not allowed inside <topic>, ignored", other),
                }
            } else if xml::is_tag(&child, "msgstore") || xml::is_tag(&child, "persistence") {
                let mut q = QueuePropertyBase::new(Relating::MsgUnitStore);
                q.read(&child, scopes);
                self.set_msg_unit_store(q);
            } else {
                log::warn!("unknown element <{}> in <topic>, ignored", tag);
            }
        }
        scopes.pop();
    }

    pub fn to_xml(&self, extra_offset: &str) -> String {
        let off = offset(extra_offset);
        let mut sb = format!("{}<topic", off);
        if self.readonly.is_modified() {
            write_attr(&mut sb, "readonly", self.is_readonly());
        }
        if self.destroy_delay.is_modified() {
            write_attr(&mut sb, "destroyDelay", self.destroy_delay());
        }
        if self.create_dom_entry.is_modified() {
            write_attr(&mut sb, "createDomEntry", self.create_dom_entry());
        }
        if self.msg_unit_store.is_none() && self.history_queue.is_none() {
            sb.push_str("/>");
            return sb;
        }
        sb.push('>');
        let inner = format!("{}{}", extra_offset, xml::INDENT);
        if let Some(q) = &self.msg_unit_store {
            sb.push_str(&q.to_xml(&inner));
        }
        if let Some(q) = &self.history_queue {
            sb.push_str(&q.to_xml(&inner));
        }
        sb.push_str(&off);
        sb.push_str("</topic>");
        sb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn parse(xml: &str) -> TopicProperty {
        let doc = Document::parse(xml).unwrap();
        let mut t = TopicProperty::new();
        t.read(&doc.root_element(), &mut ScopeStack::new());
        t
    }

    #[test]
    fn test_defaults() {
        let t = TopicProperty::new();
        assert!(!t.is_readonly());
        assert_eq!(t.destroy_delay(), 60000);
        assert!(t.create_dom_entry());
        assert!(!t.is_modified());
        assert_eq!(t.to_xml(""), "\n <topic/>");
    }

    #[test]
    fn test_read_queues() {
        let t = parse(
            "<topic readonly='true' destroyDelay='120000' createDomEntry='x'>\
               <queue relating='topic' maxMsg='300'/>\
               <queue relating='history' maxMsg='3'/>\
               <queue relating='callback'/>\
             </topic>",
        );
        assert!(t.is_readonly());
        assert_eq!(t.destroy_delay(), 120000);
        assert!(t.create_dom_entry());
        assert_eq!(t.msg_unit_store().unwrap().max_entries(), 300);
        assert_eq!(t.history_queue().unwrap().max_entries(), 3);
        assert_eq!(
            t.to_xml(""),
            "\n <topic readonly='true' destroyDelay='120000'>\
             \n  <queue relating='msgUnitStore' maxMsg='300'/>\
             \n  <queue relating='history' maxMsg='3'/>\
             \n </topic>"
        );
    }
}
