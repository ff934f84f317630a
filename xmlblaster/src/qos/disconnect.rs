use roxmltree::Node;

use crate::error::Result;
use crate::prop::Prop;
use crate::xml::{self, offset, write_flag, ScopeStack};

use super::{QosData, QosKind};

pub type DisconnectQosData = QosData<DisconnectQos>;

#[derive(Debug, Clone)]
pub struct DisconnectQos {
    delete_subject_queue: Prop<bool>,
    clear_sessions: Prop<bool>,
    clear_client_queue: Prop<bool>,
}

impl Default for DisconnectQos {
    fn default() -> Self {
        Self {
            delete_subject_queue: Prop::new(true),
            clear_sessions: Prop::new(false),
            clear_client_queue: Prop::new(true),
        }
    }
}

impl QosKind for DisconnectQos {
    fn read_element(qos: &mut DisconnectQosData, node: &Node, _xml: &str, _scopes: &mut ScopeStack) -> Result<bool> {
        let p = match node.tag_name().name().to_ascii_lowercase().as_str() {
            "deletesubjectqueue" => &mut qos.kind.delete_subject_queue,
            "clearsessions" => &mut qos.kind.clear_sessions,
            "clearclientqueue" => &mut qos.kind.clear_client_queue,
            _ => return Ok(false),
        };
        if let Some(v) = xml::flag(node) {
            p.set(v);
        }
        Ok(true)
    }

    fn write_body(qos: &DisconnectQosData, sb: &mut String, extra_offset: &str) {
        let off = offset(extra_offset);
        let k = &qos.kind;
        for (tag, p) in [
            ("deleteSubjectQueue", &k.delete_subject_queue),
            ("clearSessions", &k.clear_sessions),
            ("clearClientQueue", &k.clear_client_queue),
        ] {
            if p.is_modified() {
                write_flag(sb, &off, tag, p.value());
            }
        }
        qos.write_client_properties(sb, extra_offset);
    }
}

impl QosData<DisconnectQos> {
    /// Drop the subject queue when the last session of the login name goes
    #[inline]
    pub fn delete_subject_queue(&self) -> bool {
        self.kind.delete_subject_queue.value()
    }

    #[inline]
    pub fn set_delete_subject_queue(&mut self, v: bool) {
        self.kind.delete_subject_queue.set(v);
    }

    /// Kill all other sessions of the same login name as well
    #[inline]
    pub fn clear_sessions(&self) -> bool {
        self.kind.clear_sessions.value()
    }

    #[inline]
    pub fn set_clear_sessions(&mut self, v: bool) {
        self.kind.clear_sessions.set(v);
    }

    /// Discard messages still waiting in the client side outbox
    #[inline]
    pub fn clear_client_queue(&self) -> bool {
        self.kind.clear_client_queue.value()
    }

    #[inline]
    pub fn set_clear_client_queue(&mut self, v: bool) {
        self.kind.clear_client_queue.set(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_qos() {
        let qos = DisconnectQosData::new();
        assert!(qos.delete_subject_queue());
        assert!(!qos.clear_sessions());
        assert!(qos.clear_client_queue());
        assert_eq!(qos.to_xml(), "<qos/>");

        let qos = DisconnectQosData::read_object(
            "<qos><clearSessions/><clearClientQueue>false</clearClientQueue><deleteSubjectQueue>maybe</deleteSubjectQueue></qos>",
        )
        .unwrap();
        assert!(qos.clear_sessions());
        assert!(!qos.clear_client_queue());
        assert!(qos.delete_subject_queue());
        assert_eq!(qos.to_xml(), "<qos>\n <clearSessions/>\n <clearClientQueue>false</clearClientQueue>\n</qos>");
    }
}
