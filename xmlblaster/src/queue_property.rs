use roxmltree::Node;

use xmlblaster_conf::Properties;

use crate::address::{AddressBase, AddressKind};
use crate::prop::{parse_bytes, parse_i64, parse_string, Prop, PropertyScope};
use crate::types::{OnOverflow, Relating};
use crate::xml::{self, offset, write_attr, Scope, ScopeStack};

pub const DEFAULT_TYPE: &str = "CACHE";
pub const DEFAULT_VERSION: &str = "1.0";
pub const DEFAULT_MAX_ENTRIES: i64 = 1000;
pub const DEFAULT_MAX_ENTRIES_HISTORY: i64 = 10;
pub const DEFAULT_MAX_BYTES: i64 = 10_485_760;
pub const DEFAULT_MAX_ENTRIES_CACHE: i64 = 1000;
pub const DEFAULT_MAX_BYTES_CACHE: i64 = 2_097_152;

pub const STORE_SWAP_LEVEL_RATIO: f64 = 0.70;
pub const STORE_SWAP_BYTES_RATIO: f64 = 0.25;
pub const RELOAD_SWAP_LEVEL_RATIO: f64 = 0.30;
pub const RELOAD_SWAP_BYTES_RATIO: f64 = 0.25;

/// When the cache tier swaps to and reloads from the persistent tier, all values in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapPolicy {
    pub store_swap_level: i64,
    pub store_swap_bytes: i64,
    pub reload_swap_level: i64,
    pub reload_swap_bytes: i64,
}

/// Capacity and overflow configuration of one queue, `<queue relating='callback' maxMsg='1000'/>`.
#[derive(Debug, Clone)]
pub struct QueuePropertyBase {
    relating: Relating,
    type_: Prop<String>,
    version: Prop<String>,
    max_entries: Prop<i64>,
    max_bytes: Prop<i64>,
    max_entries_cache: Prop<i64>,
    max_bytes_cache: Prop<i64>,
    store_swap_level: Prop<i64>,
    store_swap_bytes: Prop<i64>,
    reload_swap_level: Prop<i64>,
    reload_swap_bytes: Prop<i64>,
    on_overflow: Prop<OnOverflow>,
    on_failure: Prop<OnOverflow>,
    addresses: Vec<AddressBase>,
}

/// Client side queue holding invocations while the server is unreachable
pub type QueueProperty = QueuePropertyBase;
/// Server side callback or subject queue
pub type CbQueueProperty = QueuePropertyBase;

impl QueuePropertyBase {
    pub fn new(relating: Relating) -> Self {
        let max_entries =
            if relating == Relating::History { DEFAULT_MAX_ENTRIES_HISTORY } else { DEFAULT_MAX_ENTRIES };
        Self {
            relating,
            type_: Prop::new(DEFAULT_TYPE.into()),
            version: Prop::new(DEFAULT_VERSION.into()),
            max_entries: Prop::new(max_entries),
            max_bytes: Prop::new(DEFAULT_MAX_BYTES),
            max_entries_cache: Prop::new(DEFAULT_MAX_ENTRIES_CACHE),
            max_bytes_cache: Prop::new(DEFAULT_MAX_BYTES_CACHE),
            store_swap_level: Prop::new(0),
            store_swap_bytes: Prop::new(0),
            reload_swap_level: Prop::new(0),
            reload_swap_bytes: Prop::new(0),
            on_overflow: Prop::new(OnOverflow::DeadMessage),
            on_failure: Prop::new(OnOverflow::DeadMessage),
            addresses: Vec::new(),
        }
    }

    /// Defaults overlaid with the `queue/<relating>/*` properties.
    pub fn with_properties(relating: Relating, props: &Properties, node_id: Option<&str>) -> Self {
        let mut q = Self::new(relating);
        q.configure(props, node_id);
        q
    }

    pub fn configure(&mut self, props: &Properties, node_id: Option<&str>) {
        let prefix = self.prop_prefix();
        let scope = PropertyScope::new(props, node_id, &prefix);
        scope.apply(&mut self.type_, "type", &parse_string);
        scope.apply(&mut self.version, "version", &parse_string);
        scope.apply(&mut self.max_entries, "maxEntries", &parse_i64);
        scope.apply(&mut self.max_bytes, "maxBytes", &parse_bytes);
        scope.apply(&mut self.max_entries_cache, "maxEntriesCache", &parse_i64);
        scope.apply(&mut self.max_bytes_cache, "maxBytesCache", &parse_bytes);
        scope.apply(&mut self.store_swap_level, "storeSwapLevel", &parse_bytes);
        scope.apply(&mut self.store_swap_bytes, "storeSwapBytes", &parse_bytes);
        scope.apply(&mut self.reload_swap_level, "reloadSwapLevel", &parse_bytes);
        scope.apply(&mut self.reload_swap_bytes, "reloadSwapBytes", &parse_bytes);
        scope.apply(&mut self.on_overflow, "onOverflow", &|v: &str| Some(OnOverflow::parse_lenient(v)));
        scope.apply(&mut self.on_failure, "onFailure", &|v: &str| Some(parse_on_failure(v)));
        self.check_consistency();
    }

    /// `queue/callback/`
    #[inline]
    pub fn prop_prefix(&self) -> String {
        format!("queue/{}/", self.relating)
    }

    #[inline]
    pub fn relating(&self) -> Relating {
        self.relating
    }

    #[inline]
    pub fn set_relating(&mut self, relating: Relating) {
        self.relating = relating;
    }

    /// Client queues carry `<address>`, all others `<callback>`
    #[inline]
    pub fn address_kind(&self) -> AddressKind {
        if self.relating == Relating::Client {
            AddressKind::Client
        } else {
            AddressKind::Callback
        }
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

    /// Hard limit of entries
    #[inline]
    pub fn max_entries(&self) -> i64 {
        self.max_entries.value()
    }

    pub fn set_max_entries(&mut self, max: i64) {
        self.max_entries.set(max.max(0));
        self.check_consistency();
    }

    /// Hard limit of bytes
    #[inline]
    pub fn max_bytes(&self) -> i64 {
        self.max_bytes.value()
    }

    pub fn set_max_bytes(&mut self, max: i64) {
        self.max_bytes.set(max.max(0));
        self.check_consistency();
    }

    #[inline]
    pub fn max_entries_cache(&self) -> i64 {
        self.max_entries_cache.value()
    }

    pub fn set_max_entries_cache(&mut self, max: i64) {
        self.max_entries_cache.set(max.max(0));
        self.check_consistency();
    }

    #[inline]
    pub fn max_bytes_cache(&self) -> i64 {
        self.max_bytes_cache.value()
    }

    pub fn set_max_bytes_cache(&mut self, max: i64) {
        self.max_bytes_cache.set(max.max(0));
        self.check_consistency();
    }

    #[inline]
    pub fn set_store_swap_level(&mut self, v: i64) {
        self.store_swap_level.set(v);
    }

    #[inline]
    pub fn set_store_swap_bytes(&mut self, v: i64) {
        self.store_swap_bytes.set(v);
    }

    #[inline]
    pub fn set_reload_swap_level(&mut self, v: i64) {
        self.reload_swap_level.set(v);
    }

    #[inline]
    pub fn set_reload_swap_bytes(&mut self, v: i64) {
        self.reload_swap_bytes.set(v);
    }

    /// Swap thresholds, unset values are derived from `maxBytesCache`
    pub fn swap_policy(&self) -> SwapPolicy {
        let cache = self.max_bytes_cache() as f64;
        let derive = |p: &Prop<i64>, ratio: f64| if p.is_modified() { p.value() } else { (ratio * cache) as i64 };
        SwapPolicy {
            store_swap_level: derive(&self.store_swap_level, STORE_SWAP_LEVEL_RATIO),
            store_swap_bytes: derive(&self.store_swap_bytes, STORE_SWAP_BYTES_RATIO),
            reload_swap_level: derive(&self.reload_swap_level, RELOAD_SWAP_LEVEL_RATIO),
            reload_swap_bytes: derive(&self.reload_swap_bytes, RELOAD_SWAP_BYTES_RATIO),
        }
    }

    #[inline]
    pub fn on_overflow(&self) -> OnOverflow {
        self.on_overflow.value()
    }

    /// Unsupported policies such as `discardOldest` are replaced by `deadMessage`
    #[inline]
    pub fn set_on_overflow(&mut self, policy: &str) {
        self.on_overflow.set(OnOverflow::parse_lenient(policy));
    }

    #[inline]
    pub fn on_failure(&self) -> OnOverflow {
        self.on_failure.value()
    }

    #[inline]
    pub fn set_on_failure(&mut self, policy: &str) {
        self.on_failure.set(parse_on_failure(policy));
    }

    #[inline]
    pub fn addresses(&self) -> &[AddressBase] {
        &self.addresses
    }

    /// The first address, the one a client connects with
    #[inline]
    pub fn current_address(&self) -> Option<&AddressBase> {
        self.addresses.first()
    }

    #[inline]
    pub fn current_address_mut(&mut self) -> Option<&mut AddressBase> {
        self.addresses.first_mut()
    }

    /// The first address, a default one of [`Self::address_kind`] is added if there is none
    pub fn current_address_or_insert(&mut self) -> &mut AddressBase {
        if self.addresses.is_empty() {
            self.addresses.push(AddressBase::new(self.address_kind()));
        }
        &mut self.addresses[0]
    }

    pub fn set_address(&mut self, address: AddressBase) {
        self.addresses.clear();
        self.addresses.push(address);
    }

    #[inline]
    pub fn add_address(&mut self, address: AddressBase) {
        self.addresses.push(address);
    }

    /// Cache limits never exceed the hard limits.
    pub fn check_consistency(&mut self) {
        if self.max_entries_cache() > self.max_entries() {
            log::warn!(
                "{} maxEntriesCache={} is bigger than maxEntries={}, reducing maxEntriesCache to maxEntries",
                self.relating,
                self.max_entries_cache(),
                self.max_entries()
            );
            let origin = self.max_entries_cache.origin();
            self.max_entries_cache.set_from(self.max_entries(), origin);
        }
        if self.max_bytes_cache() > self.max_bytes() {
            log::warn!(
                "{} maxBytesCache={} is bigger than maxBytes={}, reducing maxBytesCache to maxBytes",
                self.relating,
                self.max_bytes_cache(),
                self.max_bytes()
            );
            let origin = self.max_bytes_cache.origin();
            self.max_bytes_cache.set_from(self.max_bytes(), origin);
        }
    }

    /// Parses a `<queue>` element, `relating` falls back to `default_relating`.
    pub fn from_node(default_relating: Relating, node: &Node, scopes: &mut ScopeStack) -> Self {
        let relating = match xml::attr(node, "relating") {
            Some(r) => r.parse().unwrap_or_else(|e| {
                log::warn!("{}, using '{}'", e, default_relating);
                default_relating
            }),
            None => default_relating,
        };
        let mut q = Self::new(relating);
        q.read(node, scopes);
        q
    }

    /// Overlays the attributes and the nested addresses of `node`, the limits are
    /// checked once all attributes are read.
    pub fn read(&mut self, node: &Node, scopes: &mut ScopeStack) {
        for a in node.attributes() {
            let name = a.name();
            let value = a.value();
            match name.to_ascii_lowercase().as_str() {
                "relating" => {}
                "type" => self.set_type(value.trim()),
                "version" => self.set_version(value.trim()),
                "maxmsg" | "maxentries" => {
                    if let Some(v) = xml::parse_num::<i64>(value, name) {
                        self.max_entries.set(v.max(0))
                    }
                }
                "maxsize" | "maxbytes" => {
                    if let Some(v) = xml::parse_num::<i64>(value, name) {
                        self.max_bytes.set(v.max(0))
                    }
                }
                "maxmsgcache" | "maxentriescache" => {
                    if let Some(v) = xml::parse_num::<i64>(value, name) {
                        self.max_entries_cache.set(v.max(0))
                    }
                }
                "maxsizecache" | "maxbytescache" => {
                    if let Some(v) = xml::parse_num::<i64>(value, name) {
                        self.max_bytes_cache.set(v.max(0))
                    }
                }
                "storeswaplevel" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_store_swap_level(v)
                    }
                }
                "storeswapsize" | "storeswapbytes" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_store_swap_bytes(v)
                    }
                }
                "reloadswaplevel" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_reload_swap_level(v)
                    }
                }
                "reloadswapsize" | "reloadswapbytes" => {
                    if let Some(v) = xml::parse_num(value, name) {
                        self.set_reload_swap_bytes(v)
                    }
                }
                "onoverflow" => self.set_on_overflow(value),
                "onfailure" => self.set_on_failure(value),
                _ => log::warn!("unknown attribute '{}' in <queue relating='{}'>, ignored", name, self.relating),
            }
        }

        scopes.push(Scope::Queue);
        for child in xml::elements(*node) {
            let tag = child.tag_name().name();
            if !scopes.allows(tag) {
                continue;
            }
            if xml::is_tag(&child, "address") {
                self.add_address(AddressBase::from_node(AddressKind::Client, &child, scopes));
            } else if xml::is_tag(&child, "callback") {
                self.add_address(AddressBase::from_node(AddressKind::Callback, &child, scopes));
            } else {
                log::warn!("unknown element <{}> in <queue>, ignored", tag);
            }
        }
        scopes.pop();

        self.check_consistency();
    }

    /// `<queue relating='callback'/>` plus the changed attributes and the addresses
    pub fn to_xml(&self, extra_offset: &str) -> String {
        let off = offset(extra_offset);
        let mut sb = String::with_capacity(256);
        sb.push_str(&off);
        sb.push_str("<queue");
        write_attr(&mut sb, "relating", self.relating);
        if self.type_.is_modified() {
            write_attr(&mut sb, "type", self.type_());
        }
        if self.version.is_modified() {
            write_attr(&mut sb, "version", self.version());
        }
        if self.max_entries.is_modified() {
            write_attr(&mut sb, "maxMsg", self.max_entries());
        }
        if self.max_bytes.is_modified() {
            write_attr(&mut sb, "maxSize", self.max_bytes());
        }
        if self.max_entries_cache.is_modified() {
            write_attr(&mut sb, "maxMsgCache", self.max_entries_cache());
        }
        if self.max_bytes_cache.is_modified() {
            write_attr(&mut sb, "maxSizeCache", self.max_bytes_cache());
        }
        if self.store_swap_level.is_modified() {
            write_attr(&mut sb, "storeSwapLevel", self.store_swap_level.value());
        }
        if self.store_swap_bytes.is_modified() {
            write_attr(&mut sb, "storeSwapSize", self.store_swap_bytes.value());
        }
        if self.reload_swap_level.is_modified() {
            write_attr(&mut sb, "reloadSwapLevel", self.reload_swap_level.value());
        }
        if self.reload_swap_bytes.is_modified() {
            write_attr(&mut sb, "reloadSwapSize", self.reload_swap_bytes.value());
        }
        if self.on_overflow.is_modified() {
            write_attr(&mut sb, "onOverflow", self.on_overflow());
        }
        if self.on_failure.is_modified() {
            write_attr(&mut sb, "onFailure", self.on_failure());
        }
        if self.addresses.is_empty() {
            sb.push_str("/>");
        } else {
            sb.push('>');
            let inner = format!("{}{}", extra_offset, xml::INDENT);
            for a in &self.addresses {
                sb.push_str(&a.to_xml(&inner));
            }
            sb.push_str(&off);
            sb.push_str("</queue>");
        }
        sb
    }
}

fn parse_on_failure(v: &str) -> OnOverflow {
    if !v.trim().eq_ignore_ascii_case(OnOverflow::DeadMessage.as_str()) {
        log::warn!("onFailure='{}' is not supported, using 'deadMessage'", v);
    }
    OnOverflow::DeadMessage
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    fn parse(xml: &str) -> QueuePropertyBase {
        let doc = Document::parse(xml).unwrap();
        QueuePropertyBase::from_node(Relating::Callback, &doc.root_element(), &mut ScopeStack::new())
    }

    #[test]
    fn test_defaults() {
        let q = QueuePropertyBase::new(Relating::Callback);
        assert_eq!((q.max_entries(), q.max_bytes()), (1000, 10485760));
        assert_eq!((q.max_entries_cache(), q.max_bytes_cache()), (1000, 2097152));
        assert_eq!(q.type_(), "CACHE");
        assert_eq!(QueuePropertyBase::new(Relating::History).max_entries(), 10);
        assert_eq!(q.to_xml(""), "\n <queue relating='callback'/>");

        let swap = q.swap_policy();
        assert_eq!(swap.store_swap_level, 1468006);
        assert_eq!(swap.store_swap_bytes, 524288);
        assert_eq!(swap.reload_swap_level, 629145);
        assert_eq!(swap.reload_swap_bytes, 524288);
    }

    #[test]
    fn test_overflow_substitution() {
        let q = parse("<queue relating='subject' onOverflow='discardOldest' onFailure='retry'/>");
        assert_eq!(q.relating(), Relating::Subject);
        assert_eq!(q.on_overflow(), OnOverflow::DeadMessage);
        assert_eq!(q.on_failure(), OnOverflow::DeadMessage);

        let mut q = QueuePropertyBase::new(Relating::Client);
        q.set_on_overflow("exception");
        assert_eq!(q.on_overflow(), OnOverflow::DeadMessage);
    }

    #[test]
    fn test_consistency() {
        let q = parse("<queue relating='callback' maxMsg='10' maxMsgCache='50' maxBytes='1000'/>");
        assert_eq!(q.max_entries(), 10);
        assert_eq!(q.max_entries_cache(), 10);
        assert_eq!(q.max_bytes(), 1000);
        assert_eq!(q.max_bytes_cache(), 1000);
        assert_eq!(q.swap_policy().store_swap_level, 700);
    }

    #[test]
    fn test_setters_keep_cache_within_limits() {
        let mut q = QueuePropertyBase::new(Relating::Callback);
        q.set_max_entries(5);
        assert_eq!(q.max_entries_cache(), 5);
        q.set_max_bytes(1000);
        assert_eq!(q.max_bytes_cache(), 1000);
        q.set_max_entries_cache(50);
        assert_eq!(q.max_entries_cache(), 5);
        q.set_max_bytes_cache(4000);
        assert_eq!(q.max_bytes_cache(), 1000);
        assert_eq!(q.to_xml(""), "\n <queue relating='callback' maxMsg='5' maxSize='1000' maxMsgCache='5' maxSizeCache='1000'/>");

        let q = parse("<queue relating='callback' maxMsgCache='500' maxMsg='2000'/>");
        assert_eq!((q.max_entries(), q.max_entries_cache()), (2000, 500));

        let q = parse("<queue relating='callback' maxMsgCache='50' maxMsg='10'/>");
        let xml = q.to_xml("");
        assert_eq!(xml, "\n <queue relating='callback' maxMsg='10' maxMsgCache='10'/>");
        assert_eq!(parse(xml.trim()).to_xml(""), xml);
    }

    #[test]
    fn test_read_write() {
        let q = parse(
            "<queue relating='connection' maxEntries='5' type='RAM' maxMsg='x'>\
               <address type='SOCKET' retries='3'>socket://localhost:7607</address>\
             </queue>",
        );
        assert_eq!(q.relating(), Relating::Client);
        assert_eq!(q.address_kind(), AddressKind::Client);
        assert_eq!(q.max_entries(), 5);
        assert_eq!(q.type_(), "RAM");
        let a = q.current_address().unwrap();
        assert_eq!(a.retries(), 3);
        assert_eq!(a.raw_address(), "socket://localhost:7607");

        let xml = q.to_xml("");
        assert_eq!(
            xml,
            "\n <queue relating='client' type='RAM' maxMsg='5'>\n  <address type='SOCKET' retries='3'>socket://localhost:7607</address>\n </queue>"
        );
        let again = parse(xml.trim());
        assert_eq!(again.to_xml(""), xml);
    }

    #[test]
    fn test_unknown_relating() {
        let q = parse("<queue relating='bogus'/>");
        assert_eq!(q.relating(), Relating::Callback);
    }

    #[test]
    fn test_properties() {
        let props = Properties::new()
            .with("queue/callback/maxEntries", "100")
            .with("queue/callback/maxEntries[heron]", "7")
            .with("queue/callback/maxBytesCache", "1M")
            .with("queue/callback/onOverflow", "discardOldest");
        let q = QueuePropertyBase::with_properties(Relating::Callback, &props, Some("heron"));
        assert_eq!(q.max_entries(), 7);
        assert_eq!(q.max_entries_cache(), 7);
        assert_eq!(q.max_bytes_cache(), 1048576);
        assert_eq!(q.on_overflow(), OnOverflow::DeadMessage);

        let q = QueuePropertyBase::with_properties(Relating::Subject, &props, Some("heron"));
        assert_eq!(q.max_entries(), 1000);
    }
}
