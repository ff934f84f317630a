pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum XmlBlasterError {
    /// No connection was established yet
    #[error("communication.noConnection: {0}")]
    NoConnection(String),
    /// The connection is lost, the client is polling for the server
    #[error("communication.noConnection.polling: {0}")]
    Polling(String),
    /// The connection is lost for good, no more retries
    #[error("communication.noConnection.dead: {0}")]
    Dead(String),
    /// Transport level failure, the server may become reachable again
    #[error("communication: {0}")]
    Communication(String),
    #[error("communication.timeout: {0}")]
    Timeout(String),
    #[error("resource.overflow.queue.entries: {0}")]
    QueueOverflowEntries(String),
    #[error("resource.overflow.queue.bytes: {0}")]
    QueueOverflowBytes(String),
    /// The xml is not well formed
    #[error("resource.configuration.xml: {0}")]
    Xml(String),
    #[error("user.security: {0}")]
    Security(String),
    #[error("user.connect: {0}")]
    UserConnect(String),
    #[error("user.illegalArgument: {0}")]
    IllegalArgument(String),
    #[error("internal.illegalState: {0}")]
    IllegalState(String),
    /// Exception carried back from the remote side
    #[error("{code}: {message}")]
    Remote { code: String, message: String },
}

impl XmlBlasterError {
    /// The xmlBlaster error code, e.g. `communication.noConnection.dead`
    pub fn error_code(&self) -> &str {
        match self {
            XmlBlasterError::NoConnection(_) => "communication.noConnection",
            XmlBlasterError::Polling(_) => "communication.noConnection.polling",
            XmlBlasterError::Dead(_) => "communication.noConnection.dead",
            XmlBlasterError::Communication(_) => "communication",
            XmlBlasterError::Timeout(_) => "communication.timeout",
            XmlBlasterError::QueueOverflowEntries(_) => "resource.overflow.queue.entries",
            XmlBlasterError::QueueOverflowBytes(_) => "resource.overflow.queue.bytes",
            XmlBlasterError::Xml(_) => "resource.configuration.xml",
            XmlBlasterError::Security(_) => "user.security",
            XmlBlasterError::UserConnect(_) => "user.connect",
            XmlBlasterError::IllegalArgument(_) => "user.illegalArgument",
            XmlBlasterError::IllegalState(_) => "internal.illegalState",
            XmlBlasterError::Remote { code, .. } => code.as_str(),
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        match self {
            XmlBlasterError::NoConnection(m)
            | XmlBlasterError::Polling(m)
            | XmlBlasterError::Dead(m)
            | XmlBlasterError::Communication(m)
            | XmlBlasterError::Timeout(m)
            | XmlBlasterError::QueueOverflowEntries(m)
            | XmlBlasterError::QueueOverflowBytes(m)
            | XmlBlasterError::Xml(m)
            | XmlBlasterError::Security(m)
            | XmlBlasterError::UserConnect(m)
            | XmlBlasterError::IllegalArgument(m)
            | XmlBlasterError::IllegalState(m) => m.as_str(),
            XmlBlasterError::Remote { message, .. } => message.as_str(),
        }
    }

    #[inline]
    pub fn is_communication(&self) -> bool {
        self.error_code().starts_with("communication")
    }

    /// Rebuilds the typed error from an error code received on the wire.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            "communication.noConnection" => XmlBlasterError::NoConnection(message),
            "communication.noConnection.polling" => XmlBlasterError::Polling(message),
            "communication.noConnection.dead" => XmlBlasterError::Dead(message),
            "communication" => XmlBlasterError::Communication(message),
            "communication.timeout" => XmlBlasterError::Timeout(message),
            "resource.overflow.queue.entries" => XmlBlasterError::QueueOverflowEntries(message),
            "resource.overflow.queue.bytes" => XmlBlasterError::QueueOverflowBytes(message),
            "resource.configuration.xml" => XmlBlasterError::Xml(message),
            "user.security" => XmlBlasterError::Security(message),
            "user.connect" => XmlBlasterError::UserConnect(message),
            "user.illegalArgument" => XmlBlasterError::IllegalArgument(message),
            "internal.illegalState" => XmlBlasterError::IllegalState(message),
            _ => XmlBlasterError::Remote { code: code.into(), message },
        }
    }
}

impl From<roxmltree::Error> for XmlBlasterError {
    #[inline]
    fn from(e: roxmltree::Error) -> Self {
        XmlBlasterError::Xml(e.to_string())
    }
}

/// True if `e` is a [`XmlBlasterError`] of the communication category.
#[inline]
pub fn is_communication(e: &Error) -> bool {
    e.downcast_ref::<XmlBlasterError>().map(|e| e.is_communication()).unwrap_or(false)
}

/// The typed error behind `e`, untyped errors are reported as `internal.unknown`.
pub fn typed(e: &Error) -> XmlBlasterError {
    match e.downcast_ref::<XmlBlasterError>() {
        Some(e) => e.clone(),
        None => XmlBlasterError::from_code("internal.unknown", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let e = XmlBlasterError::Dead("publish".into());
        assert_eq!(e.error_code(), "communication.noConnection.dead");
        assert!(e.is_communication());
        assert_eq!(e.to_string(), "communication.noConnection.dead: publish");

        assert!(!XmlBlasterError::QueueOverflowEntries("full".into()).is_communication());

        let e = XmlBlasterError::from_code("user.publish.readonly", "topic is readonly");
        assert_eq!(e.error_code(), "user.publish.readonly");
        assert_eq!(e.message(), "topic is readonly");
        assert_eq!(XmlBlasterError::from_code("communication", "x"), XmlBlasterError::Communication("x".into()));

        let err: Error = XmlBlasterError::Timeout("ping".into()).into();
        assert!(is_communication(&err));
        assert!(!is_communication(&anyhow::anyhow!("other")));
    }
}
