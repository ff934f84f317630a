use roxmltree::Node;

use crate::error::{Result, XmlBlasterError};
use crate::types::state;
use crate::xml::{self, escape, offset, write_attr, Scope, ScopeStack};

use super::{write_subscribe_id, QosData, QosKind};

/// QoS returned by publish, subscribe, erase and the other calls.
pub type StatusQosData = QosData<StatusQos>;

/// Remote exception carried in a status, `<exception errorCode='...'><message>...</message></exception>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteException {
    pub error_code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct StatusQos {
    subscription_id: Option<String>,
    key_oid: Option<String>,
    exception: Option<RemoteException>,
}

impl QosKind for StatusQos {
    fn read_element(qos: &mut StatusQosData, node: &Node, _xml: &str, scopes: &mut ScopeStack) -> Result<bool> {
        let tag = node.tag_name().name().to_ascii_lowercase();
        match tag.as_str() {
            "subscribe" => {
                if let Some(id) = xml::attr(node, "id") {
                    qos.kind.subscription_id = Some(id.trim().to_owned());
                }
            }
            "key" => {
                if let Some(oid) = xml::attr(node, "oid") {
                    qos.kind.key_oid = Some(oid.trim().to_owned());
                }
            }
            "exception" => {
                scopes.push(Scope::Exception);
                let error_code = xml::attr(node, "errorCode").unwrap_or("internal.unknown").trim().to_owned();
                let message = xml::elements(*node)
                    .find(|n| xml::is_tag(n, "message"))
                    .map(|n| xml::text(&n))
                    .unwrap_or_default();
                qos.kind.exception = Some(RemoteException { error_code, message });
                scopes.pop();
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn write_body(qos: &StatusQosData, sb: &mut String, extra_offset: &str) {
        let k = &qos.kind;
        qos.write_state(sb, extra_offset);
        write_subscribe_id(sb, extra_offset, k.subscription_id.as_deref());
        if let Some(oid) = &k.key_oid {
            sb.push_str(&offset(extra_offset));
            sb.push_str("<key");
            write_attr(sb, "oid", oid);
            sb.push_str("/>");
        }
        qos.write_persistent(sb, extra_offset, "persistent");
        qos.write_rcv_timestamp(sb, extra_offset);
        if let Some(ex) = &k.exception {
            let off = offset(extra_offset);
            sb.push_str(&off);
            sb.push_str("<exception");
            write_attr(sb, "errorCode", &ex.error_code);
            sb.push('>');
            sb.push_str(&offset(&format!("{}{}", extra_offset, xml::INDENT)));
            sb.push_str("<message>");
            sb.push_str(&escape(&ex.message));
            sb.push_str("</message>");
            sb.push_str(&off);
            sb.push_str("</exception>");
        }
        qos.write_route(sb, extra_offset);
        qos.write_method(sb, extra_offset);
        qos.write_client_properties(sb, extra_offset);
    }
}

impl QosData<StatusQos> {
    /// An `OK` status of a subscribe carrying the server assigned subscription id
    pub fn subscribed(id: impl Into<String>) -> Self {
        let mut qos = Self::new();
        qos.kind.subscription_id = Some(id.into());
        qos
    }

    #[inline]
    pub fn subscription_id(&self) -> Option<&str> {
        self.kind.subscription_id.as_deref()
    }

    #[inline]
    pub fn set_subscription_id(&mut self, id: impl Into<String>) {
        self.kind.subscription_id = Some(id.into());
    }

    /// Topic the status refers to
    #[inline]
    pub fn key_oid(&self) -> Option<&str> {
        self.kind.key_oid.as_deref()
    }

    #[inline]
    pub fn set_key_oid(&mut self, oid: impl Into<String>) {
        self.kind.key_oid = Some(oid.into());
    }

    #[inline]
    pub fn exception(&self) -> Option<&RemoteException> {
        self.kind.exception.as_ref()
    }

    /// Marks the status as failed with `err`.
    pub fn set_exception(&mut self, err: &XmlBlasterError) {
        self.state = state::FORWARD_ERROR.into();
        self.kind.exception = Some(RemoteException { error_code: err.error_code().to_owned(), message: err.message().to_owned() });
    }

    /// The carried exception as typed error, `None` if the call succeeded.
    pub fn to_error(&self) -> Option<XmlBlasterError> {
        self.kind.exception.as_ref().map(|ex| XmlBlasterError::from_code(&ex.error_code, ex.message.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_return() {
        let qos = StatusQosData::subscribed("__subId:heron-3");
        assert_eq!(qos.to_xml(), "<qos>\n <subscribe id='__subId:heron-3'/>\n</qos>");
        let again = StatusQosData::read_object(&qos.to_xml()).unwrap();
        assert_eq!(again.subscription_id(), Some("__subId:heron-3"));
        assert!(again.to_error().is_none());
    }

    #[test]
    fn test_exception() {
        let mut qos = StatusQosData::new();
        qos.set_key_oid("Hello");
        qos.set_exception(&XmlBlasterError::Dead("no route to <heron>".into()));
        let xml = qos.to_xml();
        assert_eq!(
            xml,
            "<qos>\
             \n <state id='FORWARD_ERROR'/>\
             \n <key oid='Hello'/>\
             \n <exception errorCode='communication.noConnection.dead'>\
             \n  <message>no route to &lt;heron&gt;</message>\
             \n </exception>\
             \n</qos>"
        );

        let again = StatusQosData::read_object(&xml).unwrap();
        assert_eq!(again.key_oid(), Some("Hello"));
        assert_eq!(again.to_error(), Some(XmlBlasterError::Dead("no route to <heron>".into())));
        assert_eq!(again.to_xml(), xml);
    }
}
