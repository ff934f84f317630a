use std::sync::atomic::{AtomicBool, Ordering};

use roxmltree::Node;

use xmlblaster_utils::{timestamp_millis, TimestampMillis};

use crate::destination::Destination;
use crate::error::Result;
use crate::prop::Prop;
use crate::topic::TopicProperty;
use crate::types::{Priority, SessionName};
use crate::xml::{self, escape, offset, write_attr, write_flag, ScopeStack};

use super::{write_subscribe_id, QosData, QosKind};

/// QoS of publish, update and get return values.
pub type MsgQosData = QosData<MsgQos>;

#[derive(Debug, Default)]
struct ExpiredFlag(AtomicBool);

impl Clone for ExpiredFlag {
    fn clone(&self) -> Self {
        ExpiredFlag(AtomicBool::new(self.0.load(Ordering::Relaxed)))
    }
}

#[derive(Debug, Clone)]
pub struct MsgQos {
    priority: Prop<Priority>,
    life_time: Prop<i64>,
    force_destroy: Prop<bool>,
    remaining_life_static: i64,
    subscribable: Prop<bool>,
    force_update: Prop<bool>,
    redeliver: i32,
    queue_index: i64,
    queue_size: i64,
    sender: Option<SessionName>,
    subscription_id: Option<String>,
    administrative: bool,
    destinations: Vec<Destination>,
    topic: TopicProperty,
    expired: ExpiredFlag,
}

impl Default for MsgQos {
    fn default() -> Self {
        Self {
            priority: Prop::new(Priority::NORM),
            life_time: Prop::new(-1),
            force_destroy: Prop::new(false),
            remaining_life_static: -1,
            subscribable: Prop::new(true),
            force_update: Prop::new(true),
            redeliver: 0,
            queue_index: -1,
            queue_size: -1,
            sender: None,
            subscription_id: None,
            administrative: false,
            destinations: Vec::new(),
            topic: TopicProperty::default(),
            expired: ExpiredFlag::default(),
        }
    }
}

impl QosKind for MsgQos {
    fn read_element(qos: &mut MsgQosData, node: &Node, _xml: &str, scopes: &mut ScopeStack) -> Result<bool> {
        let tag = node.tag_name().name().to_ascii_lowercase();
        match tag.as_str() {
            "priority" => {
                let text = xml::text(node);
                match text.parse::<Priority>() {
                    Ok(p) => qos.kind.priority.set(p),
                    Err(_) => {
                        log::warn!("invalid <priority>{}</priority>, using NORM", text);
                        qos.kind.priority.set(Priority::NORM);
                    }
                }
            }
            "expiration" => {
                match xml::attr(node, "lifeTime") {
                    Some(v) => {
                        if let Some(life) = xml::parse_num(v, "lifeTime") {
                            qos.set_life_time(life);
                        }
                    }
                    None => {
                        log::warn!("<expiration> without lifeTime, using -1 (forever)");
                        qos.set_life_time(-1);
                    }
                }
                if let Some(v) = xml::attr_bool(node, "forceDestroy") {
                    qos.kind.force_destroy.set(v);
                }
                if let Some(v) = xml::attr_num(node, "remainingLife") {
                    qos.kind.remaining_life_static = v;
                }
            }
            "subscribable" => {
                if let Some(v) = xml::flag(node) {
                    qos.kind.subscribable.set(v);
                }
            }
            "forceupdate" => {
                if let Some(v) = xml::flag(node) {
                    qos.kind.force_update.set(v);
                }
            }
            "isdurable" => {
                if let Some(v) = xml::flag(node) {
                    qos.set_persistent(v);
                }
            }
            "isvolatile" => {
                log::warn!("<isVolatile> is deprecated, use <expiration lifeTime='0'/>");
                if let Some(v) = xml::flag(node) {
                    qos.set_volatile(v);
                }
            }
            "readonly" => {
                log::warn!("<qos><readonly/></qos> is deprecated, use <topic readonly='true'/>");
                if let Some(v) = xml::flag(node) {
                    qos.kind.topic.set_readonly(v);
                }
            }
            "administrative" => {
                if let Some(v) = xml::flag(node) {
                    qos.set_administrative(v);
                }
            }
            "redeliver" => {
                if let Some(v) = xml::parse_num(&xml::text(node), "redeliver") {
                    qos.kind.redeliver = v;
                }
            }
            "sender" => match SessionName::parse(&xml::text(node)) {
                Ok(s) => qos.kind.sender = Some(s),
                Err(e) => log::warn!("invalid <sender>, {}", e),
            },
            "subscribe" => {
                if let Some(id) = xml::attr(node, "id") {
                    qos.kind.subscription_id = Some(id.to_owned());
                }
            }
            "queue" => {
                let index = xml::attr_num::<i64>(node, "index");
                let size = xml::attr_num::<i64>(node, "size").or_else(|| xml::attr_num(node, "of"));
                if index.is_none() && size.is_none() {
                    log::warn!("<queue> configuration belongs into <topic>, ignored");
                } else {
                    if let Some(i) = index {
                        qos.kind.queue_index = i;
                    }
                    if let Some(s) = size {
                        qos.kind.queue_size = s;
                    }
                }
            }
            "destination" => qos.add_destination(Destination::from_node(node)),
            "topic" => qos.kind.topic.read(node, scopes),
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn write_body(qos: &MsgQosData, sb: &mut String, extra_offset: &str) {
        let off = offset(extra_offset);
        let k = &qos.kind;
        qos.write_state(sb, extra_offset);
        if k.subscribable.is_modified() {
            write_flag(sb, &off, "subscribable", k.subscribable.value());
        }
        for d in &k.destinations {
            sb.push_str(&d.to_xml(extra_offset));
        }
        if let Some(sender) = &k.sender {
            sb.push_str(&format!("{}<sender>{}</sender>", off, escape(&sender.wire_name())));
        }
        if k.priority.value() != Priority::NORM {
            sb.push_str(&format!("{}<priority>{}</priority>", off, k.priority.value()));
        }
        write_subscribe_id(sb, extra_offset, k.subscription_id.as_deref());
        if k.life_time.is_modified() || k.force_destroy.is_modified() || k.remaining_life_static >= 0 {
            sb.push_str(&off);
            sb.push_str("<expiration");
            if k.life_time.is_modified() {
                write_attr(sb, "lifeTime", k.life_time.value());
            }
            if k.remaining_life_static >= 0 {
                write_attr(sb, "remainingLife", k.remaining_life_static);
            }
            if k.force_destroy.is_modified() {
                write_attr(sb, "forceDestroy", k.force_destroy.value());
            }
            sb.push_str("/>");
        }
        qos.write_rcv_timestamp(sb, extra_offset);
        if k.queue_size > 0 {
            sb.push_str(&off);
            sb.push_str("<queue");
            write_attr(sb, "index", k.queue_index);
            write_attr(sb, "size", k.queue_size);
            sb.push_str("/>");
        }
        if k.administrative {
            sb.push_str(&format!("{}<administrative/>", off));
        }
        qos.write_persistent(sb, extra_offset, "isDurable");
        if k.force_update.is_modified() {
            write_flag(sb, &off, "forceUpdate", k.force_update.value());
        }
        if k.redeliver > 0 {
            sb.push_str(&format!("{}<redeliver>{}</redeliver>", off, k.redeliver));
        }
        qos.write_route(sb, extra_offset);
        qos.write_method(sb, extra_offset);
        if k.topic.is_modified() {
            sb.push_str(&k.topic.to_xml(extra_offset));
        }
        qos.write_client_properties(sb, extra_offset);
    }
}

impl QosData<MsgQos> {
    #[inline]
    pub fn priority(&self) -> Priority {
        self.kind.priority.value()
    }

    /// Values outside 0..=9 are clamped
    #[inline]
    pub fn set_priority(&mut self, priority: i32) {
        self.kind.priority.set(Priority::new(priority));
    }

    /// Milliseconds the message lives after it was received, `-1` forever
    #[inline]
    pub fn life_time(&self) -> i64 {
        self.kind.life_time.value()
    }

    #[inline]
    pub fn set_life_time(&mut self, millis: i64) {
        self.kind.life_time.set(millis);
    }

    #[inline]
    pub fn is_force_destroy(&self) -> bool {
        self.kind.force_destroy.value()
    }

    /// Deliver expired but already queued messages anyway if false
    #[inline]
    pub fn set_force_destroy(&mut self, force: bool) {
        self.kind.force_destroy.set(force);
    }

    /// A volatile message is erased right after its first delivery
    #[inline]
    pub fn is_volatile(&self) -> bool {
        self.life_time() == 0 && !self.is_force_destroy()
    }

    pub fn set_volatile(&mut self, volatile: bool) {
        if volatile {
            self.set_life_time(0);
            self.set_force_destroy(false);
        } else {
            self.set_life_time(-1);
        }
    }

    #[inline]
    pub fn is_durable(&self) -> bool {
        self.is_persistent()
    }

    #[inline]
    pub fn set_durable(&mut self, durable: bool) {
        self.set_persistent(durable);
    }

    #[inline]
    pub fn is_subscribable(&self) -> bool {
        self.kind.subscribable.value()
    }

    #[inline]
    pub fn set_subscribable(&mut self, subscribable: bool) {
        self.kind.subscribable.set(subscribable);
    }

    /// Resend the message to subscribers even if its content did not change
    #[inline]
    pub fn is_force_update(&self) -> bool {
        self.kind.force_update.value()
    }

    #[inline]
    pub fn set_force_update(&mut self, force: bool) {
        self.kind.force_update.set(force);
    }

    #[inline]
    pub fn redeliver(&self) -> i32 {
        self.kind.redeliver
    }

    #[inline]
    pub fn inc_redeliver(&mut self) {
        self.kind.redeliver += 1;
    }

    /// Position of the message in a flushed queue, `-1` if not flushed
    #[inline]
    pub fn queue_index(&self) -> i64 {
        self.kind.queue_index
    }

    #[inline]
    pub fn queue_size(&self) -> i64 {
        self.kind.queue_size
    }

    #[inline]
    pub fn set_queue_index(&mut self, index: i64, size: i64) {
        self.kind.queue_index = index;
        self.kind.queue_size = size;
    }

    #[inline]
    pub fn sender(&self) -> Option<&SessionName> {
        self.kind.sender.as_ref()
    }

    #[inline]
    pub fn set_sender(&mut self, sender: SessionName) {
        self.kind.sender = Some(sender);
    }

    /// The subscription which caused this update
    #[inline]
    pub fn subscription_id(&self) -> Option<&str> {
        self.kind.subscription_id.as_deref()
    }

    #[inline]
    pub fn set_subscription_id(&mut self, id: impl Into<String>) {
        self.kind.subscription_id = Some(id.into());
    }

    #[inline]
    pub fn is_administrative(&self) -> bool {
        self.kind.administrative
    }

    /// Administrative messages get the highest priority unless one was chosen explicitly.
    pub fn set_administrative(&mut self, administrative: bool) {
        self.kind.administrative = administrative;
        if administrative && !self.kind.priority.is_modified() {
            self.kind.priority.set(Priority::MAX);
        }
    }

    #[inline]
    pub fn destinations(&self) -> &[Destination] {
        &self.kind.destinations
    }

    /// Makes the message point-to-point. Without an explicit lifeTime a PtP message
    /// is not kept once delivered.
    pub fn add_destination(&mut self, destination: Destination) {
        if !self.kind.life_time.is_modified() {
            self.kind.life_time = Prop::new(0);
        }
        self.kind.destinations.push(destination);
    }

    #[inline]
    pub fn is_pub_sub_style(&self) -> bool {
        self.kind.destinations.is_empty()
    }

    #[inline]
    pub fn is_ptp(&self) -> bool {
        !self.is_pub_sub_style()
    }

    #[inline]
    pub fn topic_property(&self) -> &TopicProperty {
        &self.kind.topic
    }

    #[inline]
    pub fn topic_property_mut(&mut self) -> &mut TopicProperty {
        &mut self.kind.topic
    }

    #[inline]
    pub fn set_topic_property(&mut self, topic: TopicProperty) {
        self.kind.topic = topic;
    }

    #[inline]
    pub fn is_readonly(&self) -> bool {
        self.kind.topic.is_readonly()
    }

    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(timestamp_millis())
    }

    /// True once `now` passed receive time plus lifeTime, stays true afterwards.
    pub fn is_expired_at(&self, now: TimestampMillis) -> bool {
        if self.kind.expired.0.load(Ordering::Relaxed) {
            return true;
        }
        let life = self.life_time();
        if life <= 0 || life == i64::MAX {
            return false;
        }
        let rcv = match self.rcv_timestamp {
            Some(ts) => ts.millis(),
            None => return false,
        };
        let expired = now > rcv.saturating_add(life);
        if expired {
            self.kind.expired.0.store(true, Ordering::Relaxed);
        }
        expired
    }

    #[inline]
    pub fn remaining_life(&self) -> i64 {
        self.remaining_life_at(timestamp_millis())
    }

    /// Milliseconds until expiry, `-1` if the message lives forever
    pub fn remaining_life_at(&self, now: TimestampMillis) -> i64 {
        let life = self.life_time();
        let rcv = match self.rcv_timestamp {
            Some(ts) if life > 0 && life != i64::MAX => ts.millis(),
            _ => return -1,
        };
        (rcv.saturating_add(life) - now).max(0)
    }

    /// The remaining life as received on the wire, `-1` if none was sent
    #[inline]
    pub fn remaining_life_static(&self) -> i64 {
        self.kind.remaining_life_static
    }

    /// Stores the current remaining life so it goes over the wire with the next write.
    pub fn stamp_remaining_life_at(&mut self, now: TimestampMillis) {
        self.kind.remaining_life_static = self.remaining_life_at(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{state, ClientProperty, MethodName};
    use xmlblaster_utils::Timestamp;

    #[test]
    fn test_minimal_footprint() {
        let qos = MsgQosData::new();
        assert_eq!(qos.to_xml(), "<qos/>");
        assert_eq!(qos.priority(), Priority::NORM);
        assert_eq!(qos.life_time(), -1);
        assert!(qos.is_subscribable());
        assert!(qos.is_force_update());
        assert!(!qos.is_volatile());
        assert!(qos.is_pub_sub_style());

        let mut qos = MsgQosData::new();
        qos.set_priority(5);
        assert_eq!(qos.to_xml(), "<qos/>");
    }

    #[test]
    fn test_priority() {
        let mut qos = MsgQosData::new();
        qos.set_priority(15);
        assert_eq!(qos.priority(), Priority::MAX);
        qos.set_priority(-2);
        assert_eq!(qos.priority(), Priority::MIN);

        let qos = MsgQosData::read_object("<qos><priority>HIGH</priority></qos>").unwrap();
        assert_eq!(qos.priority().value(), 7);
        let qos = MsgQosData::read_object("<qos><priority>urgent</priority></qos>").unwrap();
        assert_eq!(qos.priority(), Priority::NORM);

        let mut qos = MsgQosData::new();
        qos.set_administrative(true);
        assert_eq!(qos.priority(), Priority::MAX);
        let mut qos = MsgQosData::new();
        qos.set_priority(2);
        qos.set_administrative(true);
        assert_eq!(qos.priority().value(), 2);
    }

    #[test]
    fn test_expiration() {
        let mut qos = MsgQosData::new();
        qos.set_life_time(1000);
        assert!(!qos.is_expired_at(i64::MAX));
        qos.set_rcv_timestamp(Timestamp::from_millis(10_000));
        assert!(!qos.is_expired_at(10_500));
        assert_eq!(qos.remaining_life_at(10_500), 500);
        assert!(qos.is_expired_at(11_500));
        assert_eq!(qos.remaining_life_at(11_500), 0);
        //sticky
        assert!(qos.is_expired_at(10_500));
        assert!(qos.clone().is_expired_at(10_000));

        let mut forever = MsgQosData::new();
        forever.set_rcv_timestamp(Timestamp::from_millis(10_000));
        assert!(!forever.is_expired_at(i64::MAX));
        assert_eq!(forever.remaining_life_at(20_000), -1);

        let qos = MsgQosData::read_object("<qos><expiration forceDestroy='true'/></qos>").unwrap();
        assert_eq!(qos.life_time(), -1);
        assert!(qos.is_force_destroy());
    }

    #[test]
    fn test_ptp_default_life() {
        let mut qos = MsgQosData::new();
        qos.add_destination(Destination::new("joe"));
        assert_eq!(qos.life_time(), 0);
        assert!(qos.is_volatile());
        assert!(!qos.is_pub_sub_style());
        assert_eq!(qos.to_xml(), "<qos>\n <destination>joe</destination>\n</qos>");

        let mut qos = MsgQosData::new();
        qos.set_life_time(5000);
        qos.add_destination(Destination::new("joe"));
        assert_eq!(qos.life_time(), 5000);
    }

    #[test]
    fn test_deprecated_tags() {
        let qos = MsgQosData::read_object("<qos><isVolatile/><readonly/><persistent/></qos>").unwrap();
        assert!(qos.is_volatile());
        assert!(qos.is_readonly());
        assert!(qos.is_durable());
        assert_eq!(
            qos.to_xml(),
            "<qos>\n <expiration lifeTime='0' forceDestroy='false'/>\n <isDurable/>\n <topic readonly='true'/>\n</qos>"
        );
    }

    #[test]
    fn test_write_order() {
        let mut qos = MsgQosData::new();
        qos.set_state(state::ERASED);
        qos.set_subscribable(false);
        qos.add_destination(Destination::new("joe"));
        qos.set_sender(SessionName::parse("jack/2").unwrap());
        qos.set_priority(7);
        qos.set_subscription_id("__subId:1");
        qos.set_life_time(60000);
        qos.set_rcv_timestamp(Timestamp::from_nanos(99));
        qos.set_queue_index(0, 3);
        qos.set_durable(true);
        qos.set_force_update(false);
        qos.inc_redeliver();
        qos.add_route_info(crate::route::RouteInfo::new("heron", 0, Timestamp::from_nanos(5)));
        qos.set_method(MethodName::Update);
        qos.topic_property_mut().set_destroy_delay(-1);
        qos.add_client_property(ClientProperty::string("x", "y"));

        let expected = "<qos>\
            \n <state id='ERASED'/>\
            \n <subscribable>false</subscribable>\
            \n <destination>joe</destination>\
            \n <sender>client/jack/session/2</sender>\
            \n <priority>7</priority>\
            \n <subscribe id='__subId:1'/>\
            \n <expiration lifeTime='60000'/>\
            \n <rcvTimestamp nanos='99'/>\
            \n <queue index='0' size='3'/>\
            \n <isDurable/>\
            \n <forceUpdate>false</forceUpdate>\
            \n <redeliver>1</redeliver>\
            \n <route>\
            \n  <node id='heron' stratum='0' timestamp='5'/>\
            \n </route>\
            \n <isUpdate/>\
            \n <topic destroyDelay='-1'/>\
            \n <clientProperty name='x'>y</clientProperty>\
            \n</qos>";
        assert_eq!(qos.to_xml(), expected);

        let again = MsgQosData::read_object(&qos.to_xml()).unwrap();
        assert_eq!(again.to_xml(), expected);
        assert_eq!(again.sender().map(|s| s.login_name()), Some("jack"));
        assert_eq!(again.redeliver(), 1);
        assert_eq!(again.queue_size(), 3);
    }

    #[test]
    fn test_sender_keeps_node() {
        let mut qos = MsgQosData::new();
        qos.set_sender(SessionName::new("jack", 2).with_node_id("heron"));
        let xml = qos.to_xml();
        assert!(xml.contains("<sender>/node/heron/client/jack/session/2</sender>"));

        let again = MsgQosData::read_object(&xml).unwrap();
        let sender = again.sender().unwrap();
        assert_eq!(sender.node_id(), Some("heron"));
        assert_eq!(sender.login_name(), "jack");
        assert_eq!(sender.pub_session_id(), 2);
        assert_eq!(again.to_xml(), xml);

        let qos = MsgQosData::read_object("<qos><sender>/client/joe/session/1</sender></qos>").unwrap();
        assert_eq!(qos.sender().map(|s| s.node_id()), Some(None));
        assert_eq!(qos.sender().map(|s| s.pub_session_id()), Some(1));
    }

    #[test]
    fn test_remaining_life_on_wire() {
        let mut qos = MsgQosData::new();
        qos.set_life_time(1000);
        qos.set_rcv_timestamp(Timestamp::from_millis(1000));
        qos.stamp_remaining_life_at(1400);
        let again = MsgQosData::read_object(&qos.to_xml()).unwrap();
        assert_eq!(again.remaining_life_static(), 600);
        assert_eq!(again.life_time(), 1000);
    }
}
