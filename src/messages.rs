//! `<rpc>` / `<rpc-reply>` envelopes and rpc-error descriptors

use crate::error::{NetconfError, Result, RpcError};
use crate::node::{ConfigNode, NETCONF_BASE_NS};
use crate::xml;

/// A request ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcRequest {
    pub message_id: u64,
    /// Operation element, e.g. `<edit-config>` or `<get>`
    pub operation: ConfigNode,
}

impl RpcRequest {
    /// Request carrying `operation` under `message_id`
    pub fn new(message_id: u64, operation: ConfigNode) -> Self {
        Self {
            message_id,
            operation,
        }
    }

    /// Serialize into an `<rpc>` envelope in the base namespace
    pub fn to_xml(&self) -> Result<String> {
        let rpc = ConfigNode::builder("rpc")
            .attribute("message-id", self.message_id.to_string())
            .child(self.operation.clone())
            .build();
        xml::encode(&rpc, Some(NETCONF_BASE_NS))
    }
}

/// Outcome carried by a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    /// `<ok/>`, or an empty reply
    Ok,
    /// `<data>` or any other operation output
    Data(ConfigNode),
    /// One or more `<rpc-error>` elements, in receipt order
    Errors(Vec<ErrorInfo>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    pub message_id: u64,
    pub body: ReplyBody,
}

impl RpcReply {
    /// Parse a complete `<rpc-reply>` message
    pub fn from_xml(message: &str) -> Result<Self> {
        Self::from_node(&xml::decode(message)?)
    }

    /// Interpret an already decoded `<rpc-reply>` element
    pub fn from_node(root: &ConfigNode) -> Result<Self> {
        if root.local_name() != "rpc-reply" {
            return Err(NetconfError::MalformedReply(format!(
                "expected <rpc-reply>, got <{}>",
                root.name()
            )));
        }
        let message_id = message_id_of(root)?;

        let errors = root
            .children_named("rpc-error")
            .map(ErrorInfo::from_node)
            .collect::<Vec<_>>();

        let body = if !errors.is_empty() {
            ReplyBody::Errors(errors)
        } else if let Some(data) = root.child("data") {
            ReplyBody::Data(data.clone())
        } else if let Some(output) = root.children().iter().find(|c| c.local_name() != "ok") {
            ReplyBody::Data(output.clone())
        } else {
            ReplyBody::Ok
        };

        Ok(Self { message_id, body })
    }

    /// True unless the reply carries an rpc-error
    pub fn is_ok(&self) -> bool {
        !matches!(self.body, ReplyBody::Errors(_))
    }

    /// Turn an error reply into [`RpcError`]; any rpc-error fails the whole call
    pub fn into_result(self) -> std::result::Result<ReplyBody, RpcError> {
        match self.body {
            ReplyBody::Errors(errors) => Err(RpcError::new(self.message_id, errors)),
            body => Ok(body),
        }
    }
}

/// Read the `message-id` attribute of an rpc-reply
pub fn message_id_of(root: &ConfigNode) -> Result<u64> {
    let raw = root.attribute("message-id").ok_or_else(|| {
        NetconfError::MalformedReply("rpc-reply without message-id".into())
    })?;
    raw.trim()
        .parse()
        .map_err(|_| NetconfError::MalformedReply(format!("invalid message-id {:?}", raw)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Error,
    Warning,
}

/// One `<rpc-error>` descriptor (RFC 6241 section 4.3)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    /// transport, rpc, protocol or application
    pub error_type: String,
    /// e.g. `data-exists`, `invalid-value`, `in-use`
    pub error_tag: String,
    pub error_severity: ErrorSeverity,
    pub error_app_tag: Option<String>,
    pub error_path: Option<String>,
    pub error_message: Option<String>,
    /// Raw `<error-info>` content
    pub error_info: Option<ConfigNode>,
}

impl ErrorInfo {
    /// Read the fields of one `<rpc-error>` element
    pub fn from_node(node: &ConfigNode) -> Self {
        let text = |name: &str| node.child_value(name).map(|v| v.trim().to_string());

        let error_severity = match text("error-severity").as_deref() {
            Some("warning") => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        };

        Self {
            error_type: text("error-type").unwrap_or_default(),
            error_tag: text("error-tag").unwrap_or_default(),
            error_severity,
            error_app_tag: text("error-app-tag"),
            error_path: text("error-path"),
            error_message: text("error-message"),
            error_info: node.child("error-info").cloned(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.error_type, self.error_tag)?;
        if let Some(path) = &self.error_path {
            write!(f, " at {}", path)?;
        }
        if let Some(message) = &self.error_message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_envelope() {
        let request = RpcRequest::new(7, ConfigNode::empty("close-session"));
        assert_eq!(
            request.to_xml().unwrap(),
            r#"<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="7"><close-session/></rpc>"#
        );
    }

    #[test]
    fn test_ok_reply() {
        let reply = RpcReply::from_xml(
            r#"<rpc-reply message-id="101" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#,
        )
        .unwrap();
        assert_eq!(reply.message_id, 101);
        assert_eq!(reply.body, ReplyBody::Ok);
        assert!(reply.is_ok());
    }

    #[test]
    fn test_data_reply() {
        let reply = RpcReply::from_xml(
            r#"<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3">
                 <nc:data><ip-domain xmlns="urn:x"><vrfs/></ip-domain></nc:data>
               </nc:rpc-reply>"#,
        )
        .unwrap();
        let ReplyBody::Data(data) = reply.body else {
            panic!("expected data");
        };
        assert_eq!(data.children()[0].name(), "ip-domain");
    }

    #[test]
    fn test_two_errors_in_receipt_order() {
        let xml = r#"<rpc-reply message-id="9" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
            <rpc-error>
              <error-type>application</error-type>
              <error-tag>data-exists</error-tag>
              <error-severity>error</error-severity>
              <error-path>/ip-domain/vrfs/vrf[vrf-name='default']</error-path>
              <error-message xml:lang="en">entry already exists</error-message>
            </rpc-error>
            <rpc-error>
              <error-type>protocol</error-type>
              <error-tag>operation-failed</error-tag>
              <error-severity>error</error-severity>
              <error-info><bad-element>server</bad-element></error-info>
            </rpc-error>
          </rpc-reply>"#;

        let reply = RpcReply::from_xml(xml).unwrap();
        assert!(!reply.is_ok());

        let err = reply.into_result().unwrap_err();
        assert_eq!(err.errors().len(), 2);
        assert_eq!(err.errors()[0].error_tag, "data-exists");
        assert_eq!(
            err.errors()[0].error_path.as_deref(),
            Some("/ip-domain/vrfs/vrf[vrf-name='default']")
        );
        assert_eq!(err.errors()[0].error_message.as_deref(), Some("entry already exists"));
        assert_eq!(err.errors()[1].error_tag, "operation-failed");
        assert_eq!(
            err.errors()[1].error_info.as_ref().and_then(|i| i.child_value("bad-element")),
            Some("server")
        );
        assert!(err.has_tag("data-exists"));
    }

    #[test]
    fn test_envelope_violations() {
        assert!(matches!(
            RpcReply::from_xml("<rpc-reply><ok/></rpc-reply>"),
            Err(NetconfError::MalformedReply(_))
        ));
        assert!(matches!(
            RpcReply::from_xml(r#"<rpc message-id="1"/>"#),
            Err(NetconfError::MalformedReply(_))
        ));
        assert!(matches!(
            RpcReply::from_xml(r#"<rpc-reply message-id="abc"><ok/></rpc-reply>"#),
            Err(NetconfError::MalformedReply(_))
        ));
    }
}
