use roxmltree::Node;

use crate::types::QueryType;
use crate::xml::{self, escape, offset};

/// Point-to-point receiver of a message, `<destination queryType='EXACT'>joe</destination>`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Destination {
    destination: String,
    query_type: QueryType,
    force_queuing: bool,
}

impl Destination {
    /// Exact login or session name, e.g. `joe` or `client/joe/session/1`
    pub fn new(destination: impl Into<String>) -> Self {
        Self { destination: destination.into(), ..Default::default() }
    }

    pub fn with_query(query: impl Into<String>, query_type: QueryType) -> Self {
        Self { destination: query.into(), query_type, force_queuing: false }
    }

    #[inline]
    pub fn destination(&self) -> &str {
        &self.destination
    }

    #[inline]
    pub fn query_type(&self) -> QueryType {
        self.query_type
    }

    #[inline]
    pub fn is_exact_address(&self) -> bool {
        self.query_type == QueryType::Exact
    }

    #[inline]
    pub fn is_xpath_query(&self) -> bool {
        self.query_type == QueryType::XPath
    }

    /// Queue the message even if the receiver is not logged in
    #[inline]
    pub fn force_queuing(&self) -> bool {
        self.force_queuing
    }

    #[inline]
    pub fn set_force_queuing(&mut self, force: bool) {
        self.force_queuing = force;
    }

    pub fn from_node(node: &Node) -> Self {
        let mut d = Destination::new(xml::text(node));
        for a in node.attributes() {
            match a.name().to_ascii_lowercase().as_str() {
                "querytype" => match a.value().parse() {
                    Ok(t) => d.query_type = t,
                    Err(e) => log::warn!("{} in <destination>, using EXACT", e),
                },
                "forcequeuing" => {
                    if let Some(v) = xml::parse_bool(a.value(), "forceQueuing") {
                        d.force_queuing = v;
                    }
                }
                _ => log::warn!("unknown attribute '{}' in <destination>, ignored", a.name()),
            }
        }
        if d.destination.is_empty() {
            log::warn!("<destination> without receiver");
        }
        d
    }

    pub fn to_xml(&self, extra_offset: &str) -> String {
        let mut sb = offset(extra_offset);
        sb.push_str("<destination");
        if !self.is_exact_address() {
            sb.push_str(&format!(" queryType='{}'", self.query_type));
        }
        if self.force_queuing {
            sb.push_str(" forceQueuing='true'");
        }
        sb.push('>');
        sb.push_str(&escape(&self.destination));
        sb.push_str("</destination>");
        sb
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roxmltree::Document;

    #[test]
    fn test_destination() {
        let d = Destination::new("joe");
        assert_eq!(d.to_xml(""), "\n <destination>joe</destination>");

        let doc = Document::parse("<destination queryType='xpath' forceQueuing='true'>//key[@oid='a']</destination>")
            .unwrap();
        let d = Destination::from_node(&doc.root_element());
        assert!(d.is_xpath_query());
        assert!(d.force_queuing());
        assert_eq!(d.destination(), "//key[@oid='a']");
        assert_eq!(
            d.to_xml(""),
            "\n <destination queryType='XPATH' forceQueuing='true'>//key[@oid=&apos;a&apos;]</destination>"
        );

        let doc = Document::parse("<destination queryType='REGEX'>joe</destination>").unwrap();
        assert!(Destination::from_node(&doc.root_element()).is_exact_address());
    }
}
