//! Hello exchange and capability negotiation (RFC 6241 section 8.1)

use crate::error::{NetconfError, Result};
use crate::node::{ConfigNode, NETCONF_BASE_NS};
use crate::xml;

/// NETCONF 1.0 base protocol (end-of-message framing)
pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
/// NETCONF 1.1 base protocol (chunked framing)
pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
/// `:writable-running` capability
pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
/// `:candidate` capability
pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
/// `:confirmed-commit` capability
pub const CONFIRMED_COMMIT: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
/// `:startup` capability
pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
/// `:validate` capability
pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";

/// Set of capability URIs advertised by one peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    uris: Vec<String>,
}

impl Capabilities {
    /// Capability set from URIs; duplicates are dropped
    pub fn new(uris: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut caps = Self::default();
        for uri in uris {
            caps.insert(uri.into());
        }
        caps
    }

    fn insert(&mut self, uri: String) {
        if !self.uris.contains(&uri) {
            self.uris.push(uri);
        }
    }

    /// True if `uri` was advertised, ignoring any `?module=...` parameters.
    ///
    /// Version suffixes count: `validate:1.0` does not satisfy `validate:1.1`.
    pub fn supports(&self, uri: &str) -> bool {
        self.uris
            .iter()
            .any(|c| c.split('?').next() == Some(uri))
    }

    /// Like [`supports`](Self::supports) but accepts any version of the capability
    pub fn supports_any_version(&self, uri: &str) -> bool {
        let family = uri.rsplit_once(':').map_or(uri, |(family, _)| family);
        self.uris.iter().any(|c| {
            let base = c.split('?').next().unwrap_or(c);
            base.rsplit_once(':').map_or(base, |(f, _)| f) == family
        })
    }

    /// Advertised URIs in advertisement order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.uris.iter().map(String::as_str)
    }

    /// Number of distinct capabilities
    pub fn len(&self) -> usize {
        self.uris.len()
    }

    /// True when nothing was advertised
    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

/// Hello received from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub session_id: Option<u32>,
    pub capabilities: Capabilities,
}

impl ServerHello {
    /// Parse a server `<hello>` message
    pub fn parse(message: &str) -> Result<Self> {
        let root = xml::decode(message).map_err(|e| {
            NetconfError::Connection(format!("unreadable server hello: {}", e))
        })?;
        if root.local_name() != "hello" {
            return Err(NetconfError::Connection(format!(
                "expected <hello>, got <{}>",
                root.name()
            )));
        }

        let capabilities = Capabilities::new(
            root.child("capabilities")
                .into_iter()
                .flat_map(|caps| caps.children_named("capability"))
                .filter_map(|c| c.value())
                .map(|v| v.trim().to_string()),
        );
        if capabilities.is_empty() {
            return Err(NetconfError::Connection(
                "server hello advertises no capabilities".into(),
            ));
        }

        let session_id = match root.child_value("session-id") {
            Some(raw) => Some(raw.trim().parse::<u32>().map_err(|_| {
                NetconfError::Connection(format!("invalid session-id {:?}", raw))
            })?),
            None => None,
        };

        Ok(Self {
            session_id,
            capabilities,
        })
    }
}

/// Serialize the client hello
pub fn client_hello(capabilities: &Capabilities) -> Result<String> {
    let hello = ConfigNode::builder("hello")
        .child(ConfigNode::container(
            "capabilities",
            capabilities.iter().map(|c| ConfigNode::leaf("capability", c)),
        ))
        .build();
    let body = xml::encode(&hello, Some(NETCONF_BASE_NS))?;
    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{}", body))
}

/// Highest base protocol version both peers speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BaseVersion {
    V1_0,
    V1_1,
}

/// Pick the common base version, failing on a protocol-version mismatch
pub fn negotiate(client: &Capabilities, server: &Capabilities) -> Result<BaseVersion> {
    if client.supports(BASE_1_1) && server.supports(BASE_1_1) {
        Ok(BaseVersion::V1_1)
    } else if client.supports(BASE_1_0) && server.supports(BASE_1_0) {
        Ok(BaseVersion::V1_0)
    } else {
        Err(NetconfError::Connection(
            "no common NETCONF base version".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER_HELLO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.1</capability>
    <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
    <capability>urn:ietf:params:netconf:capability:validate:1.0</capability>
    <capability>http://cisco.com/ns/yang/Cisco-IOS-XR-ip-domain-cfg?module=Cisco-IOS-XR-ip-domain-cfg&amp;revision=2015-05-13</capability>
  </capabilities>
  <session-id>4242</session-id>
</hello>"#;

    #[test]
    fn test_parse_server_hello() {
        let hello = ServerHello::parse(SERVER_HELLO).unwrap();
        assert_eq!(hello.session_id, Some(4242));
        assert_eq!(hello.capabilities.len(), 4);
        assert!(hello.capabilities.supports(CANDIDATE));
        assert!(hello.capabilities.supports("http://cisco.com/ns/yang/Cisco-IOS-XR-ip-domain-cfg"));
        assert!(!hello.capabilities.supports(WRITABLE_RUNNING));
        assert!(!hello.capabilities.supports(VALIDATE));
        assert!(hello.capabilities.supports_any_version(VALIDATE));
    }

    #[test]
    fn test_parse_rejects_non_hello() {
        assert!(ServerHello::parse("<rpc-reply/>").is_err());
        assert!(ServerHello::parse("<hello><capabilities/></hello>").is_err());
        assert!(ServerHello::parse("not xml").is_err());
    }

    #[test]
    fn test_client_hello_lists_capabilities() {
        let caps = Capabilities::new([BASE_1_0, BASE_1_1]);
        let hello = client_hello(&caps).unwrap();
        assert!(hello.contains(r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">"#));
        assert!(hello.contains("<capability>urn:ietf:params:netconf:base:1.1</capability>"));
    }

    #[test]
    fn test_negotiate() {
        let both = Capabilities::new([BASE_1_0, BASE_1_1]);
        let old = Capabilities::new([BASE_1_0]);
        let new = Capabilities::new([BASE_1_1]);

        assert_eq!(negotiate(&both, &both).unwrap(), BaseVersion::V1_1);
        assert_eq!(negotiate(&both, &old).unwrap(), BaseVersion::V1_0);
        assert!(matches!(
            negotiate(&old, &new),
            Err(NetconfError::Connection(_))
        ));
    }
}
