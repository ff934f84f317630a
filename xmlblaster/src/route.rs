use roxmltree::Node;

use xmlblaster_utils::Timestamp;

use crate::xml::{self, offset, write_attr};

/// One cluster hop a message passed, `<node id='heron' stratum='0' timestamp='...'/>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    node_id: String,
    stratum: i32,
    timestamp: Timestamp,
    dirty_read: bool,
}

impl RouteInfo {
    pub fn new(node_id: impl Into<String>, stratum: i32, timestamp: Timestamp) -> Self {
        Self { node_id: node_id.into(), stratum, timestamp, dirty_read: false }
    }

    #[inline]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Hop distance from the master node, 0 is the master
    #[inline]
    pub fn stratum(&self) -> i32 {
        self.stratum
    }

    #[inline]
    pub fn set_stratum(&mut self, stratum: i32) {
        self.stratum = stratum;
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn dirty_read(&self) -> bool {
        self.dirty_read
    }

    #[inline]
    pub fn set_dirty_read(&mut self, dirty_read: bool) {
        self.dirty_read = dirty_read;
    }

    /// `None` if the node carries no id
    pub fn from_node(node: &Node) -> Option<Self> {
        let id = match xml::attr(node, "id") {
            Some(id) if !id.trim().is_empty() => id.trim(),
            _ => {
                log::warn!("<node> in <route> without id, ignored");
                return None;
            }
        };
        let stratum = match xml::attr(node, "stratum") {
            Some(v) => xml::parse_num(v, "stratum").unwrap_or(0),
            None => {
                log::warn!("<node id='{}'> without stratum, using 0", id);
                0
            }
        };
        let timestamp = match xml::attr(node, "timestamp") {
            Some(v) => v.parse().unwrap_or_else(|_| {
                log::warn!("<node id='{}'> has an invalid timestamp '{}'", id, v);
                Timestamp::from_nanos(0)
            }),
            None => Timestamp::from_nanos(0),
        };
        let mut info = RouteInfo::new(id, stratum, timestamp);
        if let Some(dirty) = xml::attr_bool(node, "dirtyRead") {
            info.dirty_read = dirty;
        }
        Some(info)
    }

    pub fn to_xml(&self, extra_offset: &str) -> String {
        let mut sb = offset(extra_offset);
        sb.push_str("<node");
        write_attr(&mut sb, "id", &self.node_id);
        write_attr(&mut sb, "stratum", self.stratum);
        write_attr(&mut sb, "timestamp", self.timestamp.nanos());
        if self.dirty_read {
            sb.push_str(" dirtyRead='true'");
        }
        sb.push_str("/>");
        sb
    }
}

/// Ordered hop chain of a message through the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Route(Vec<RouteInfo>);

impl Route {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `info` and renumbers the chain from the last hop backwards,
    /// so the new hop holds the lowest stratum and the earlier hops move outwards.
    pub fn add_route_info(&mut self, info: RouteInfo) {
        let base = info.stratum.max(0);
        self.0.push(info);
        for (i, hop) in self.0.iter_mut().rev().enumerate() {
            hop.stratum = base + i as i32;
        }
    }

    /// How often `node_id` appears in the chain, more than once means a loop
    #[inline]
    pub fn count(&self, node_id: &str) -> usize {
        self.0.iter().filter(|r| r.node_id == node_id).count()
    }

    /// The dirtyRead flag of the first hop through `node_id`
    #[inline]
    pub fn dirty_read(&self, node_id: &str) -> bool {
        self.0.iter().find(|r| r.node_id == node_id).map(|r| r.dirty_read).unwrap_or(false)
    }

    #[inline]
    pub fn hops(&self) -> &[RouteInfo] {
        &self.0
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.0.clear()
    }

    /// Hops are taken as received, no renumbering
    #[inline]
    pub(crate) fn push_raw(&mut self, info: RouteInfo) {
        self.0.push(info)
    }

    pub fn to_xml(&self, extra_offset: &str) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let off = offset(extra_offset);
        let mut sb = format!("{}<route>", off);
        let inner = format!("{}{}", extra_offset, xml::INDENT);
        for hop in &self.0 {
            sb.push_str(&hop.to_xml(&inner));
        }
        sb.push_str(&off);
        sb.push_str("</route>");
        sb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    #[test]
    fn test_stratum_renumbering() {
        let mut route = Route::new();
        route.add_route_info(RouteInfo::new("A", 0, Timestamp::from_nanos(1)));
        route.add_route_info(RouteInfo::new("B", 0, Timestamp::from_nanos(2)));
        assert_eq!(route.hops()[0].node_id(), "A");
        assert_eq!(route.hops()[0].stratum(), 1);
        assert_eq!(route.hops()[1].node_id(), "B");
        assert_eq!(route.hops()[1].stratum(), 0);

        route.add_route_info(RouteInfo::new("C", -4, Timestamp::from_nanos(3)));
        let strata: Vec<_> = route.hops().iter().map(|r| r.stratum()).collect();
        assert_eq!(strata, vec![2, 1, 0]);

        route.add_route_info(RouteInfo::new("A", 3, Timestamp::from_nanos(4)));
        assert_eq!(route.hops()[3].stratum(), 3);
        assert_eq!(route.hops()[0].stratum(), 6);
        assert_eq!(route.count("A"), 2);
        assert_eq!(route.count("Z"), 0);
    }

    #[test]
    fn test_node_xml() {
        let doc = Document::parse("<node id='heron' stratum='2' timestamp='1500' dirtyRead='true'/>").unwrap();
        let info = RouteInfo::from_node(&doc.root_element()).unwrap();
        assert_eq!(info.stratum(), 2);
        assert!(info.dirty_read());
        assert_eq!(info.to_xml(""), "\n <node id='heron' stratum='2' timestamp='1500' dirtyRead='true'/>");

        let mut route = Route::new();
        route.push_raw(info);
        assert!(route.dirty_read("heron"));
        assert!(!route.dirty_read("avalon"));

        let doc = Document::parse("<node stratum='2'/>").unwrap();
        assert!(RouteInfo::from_node(&doc.root_element()).is_none());
        let doc = Document::parse("<node id='x'/>").unwrap();
        assert_eq!(RouteInfo::from_node(&doc.root_element()).unwrap().stratum(), 0);
    }
}
