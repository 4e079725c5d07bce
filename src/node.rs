//! Generic configuration tree
//!
//! A `ConfigNode` stands in for the per-module generated bindings a YANG
//! toolchain would produce: one element name, ordered attributes, an optional
//! scalar value and ordered children. Child order is preserved end to end
//! because ordered-by-user lists depend on it.

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};

/// NETCONF base namespace, also used for the `operation` attribute
pub const NETCONF_BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

/// Prefix bound to [`NETCONF_BASE_NS`] when operation attributes are attached
pub const OPERATION_PREFIX: &str = "nc";

/// A labeled configuration tree node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNode {
    name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attributes: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<ConfigNode>,
}

/// `operation` attribute values for edit-config (RFC 6241 section 7.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditOperation {
    Merge,
    Replace,
    Create,
    Delete,
    Remove,
}

impl EditOperation {
    /// Value of the `operation` attribute
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Replace => "replace",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for EditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConfigNode {
    pub(crate) fn from_parts(
        name: String,
        attributes: Vec<(String, String)>,
        value: Option<String>,
        children: Vec<ConfigNode>,
    ) -> Self {
        Self {
            name,
            attributes,
            value,
            children,
        }
    }

    /// Start building a node with the given element name
    pub fn builder(name: impl Into<String>) -> ConfigNodeBuilder {
        ConfigNodeBuilder::new(name)
    }

    /// A node with a name and nothing else
    pub fn empty(name: impl Into<String>) -> Self {
        ConfigNodeBuilder::new(name).build()
    }

    /// A leaf carrying a scalar value
    pub fn leaf(name: impl Into<String>, value: impl Into<String>) -> Self {
        ConfigNodeBuilder::new(name).value(value).build()
    }

    /// A container with the given children, in order
    pub fn container(name: impl Into<String>, children: impl IntoIterator<Item = ConfigNode>) -> Self {
        ConfigNodeBuilder::new(name).children(children).build()
    }

    /// Qualified element name as it appears on the wire
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element name without its namespace prefix
    pub fn local_name(&self) -> &str {
        local_name(&self.name)
    }

    /// Attributes in insertion order
    pub fn attributes(&self) -> &[(String, String)] {
        &self.attributes
    }

    /// Look up an attribute by its exact (qualified) key
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Default namespace declared on this element, if any
    pub fn namespace(&self) -> Option<&str> {
        self.attribute("xmlns")
    }

    /// Scalar value of a leaf
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Children in document order
    pub fn children(&self) -> &[ConfigNode] {
        &self.children
    }

    /// First child whose local name matches
    pub fn child(&self, local: &str) -> Option<&ConfigNode> {
        self.children.iter().find(|c| c.local_name() == local)
    }

    /// All children whose local name matches, in order
    pub fn children_named<'a>(&'a self, local: &'a str) -> impl Iterator<Item = &'a ConfigNode> + 'a {
        self.children.iter().filter(move |c| c.local_name() == local)
    }

    /// Value of the first child leaf with the given local name
    pub fn child_value(&self, local: &str) -> Option<&str> {
        self.child(local).and_then(|c| c.value())
    }

    /// True when the node has no children
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Copy of this node with its default namespace set (or replaced)
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        set_attribute(&mut self.attributes, "xmlns", namespace);
        self
    }

    /// Copy of this node carrying an edit-config `operation` attribute
    pub fn with_operation(mut self, operation: EditOperation) -> Self {
        attach_operation(&mut self.attributes, operation);
        self
    }

    /// Operation attribute already present on this node
    pub fn operation(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| local_name(k) == "operation" && k.contains(':'))
            .map(|(_, v)| v.as_str())
    }

    /// Check the tree invariants: legal XML names, unique attribute keys,
    /// and no node carrying both a value and children
    pub fn validate(&self) -> Result<()> {
        if !is_xml_name(&self.name) {
            return Err(NetconfError::InvalidNode(format!(
                "illegal element name {:?}",
                self.name
            )));
        }
        for (i, (key, _)) in self.attributes.iter().enumerate() {
            if !is_xml_name(key) {
                return Err(NetconfError::InvalidNode(format!(
                    "illegal attribute name {:?} on <{}>",
                    key, self.name
                )));
            }
            if self.attributes[..i].iter().any(|(earlier, _)| earlier == key) {
                return Err(NetconfError::InvalidNode(format!(
                    "duplicate attribute {:?} on <{}>",
                    key, self.name
                )));
            }
        }
        // Mixed content cannot be reproduced by the codec
        if self.value.is_some() && !self.children.is_empty() {
            return Err(NetconfError::InvalidNode(format!(
                "<{}> has both a value and child elements",
                self.name
            )));
        }
        self.children.iter().try_for_each(ConfigNode::validate)
    }
}

/// Builder for [`ConfigNode`]; the node is immutable once built
#[derive(Debug, Clone)]
pub struct ConfigNodeBuilder {
    node: ConfigNode,
}

impl ConfigNodeBuilder {
    /// Start building a node named `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            node: ConfigNode {
                name: name.into(),
                attributes: Vec::new(),
                value: None,
                children: Vec::new(),
            },
        }
    }

    /// Add (or overwrite) an attribute; insertion order is kept
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        set_attribute(&mut self.node.attributes, &key, &value.into());
        self
    }

    /// Declare the default (YANG module) namespace on this element
    pub fn namespace(self, namespace: impl Into<String>) -> Self {
        self.attribute("xmlns", namespace)
    }

    /// Attach an edit-config operation to this subtree
    pub fn operation(mut self, operation: EditOperation) -> Self {
        attach_operation(&mut self.node.attributes, operation);
        self
    }

    /// Set the scalar value
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.node.value = Some(value.into());
        self
    }

    /// Append a child
    pub fn child(mut self, child: ConfigNode) -> Self {
        self.node.children.push(child);
        self
    }

    /// Append children in order
    pub fn children(mut self, children: impl IntoIterator<Item = ConfigNode>) -> Self {
        self.node.children.extend(children);
        self
    }

    /// Shorthand for a child leaf
    pub fn leaf(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.child(ConfigNode::leaf(name, value))
    }

    /// Finish the node
    pub fn build(self) -> ConfigNode {
        self.node
    }
}

/// Strip a `prefix:` from a qualified name
pub fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn set_attribute(attributes: &mut Vec<(String, String)>, key: &str, value: &str) {
    match attributes.iter_mut().find(|(k, _)| k == key) {
        Some(entry) => entry.1 = value.to_string(),
        None => attributes.push((key.to_string(), value.to_string())),
    }
}

fn attach_operation(attributes: &mut Vec<(String, String)>, operation: EditOperation) {
    let xmlns = format!("xmlns:{}", OPERATION_PREFIX);
    if !attributes.iter().any(|(k, _)| *k == xmlns) {
        attributes.push((xmlns, NETCONF_BASE_NS.to_string()));
    }
    let key = format!("{}:operation", OPERATION_PREFIX);
    set_attribute(attributes, &key, operation.as_str());
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !(first.is_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_order() {
        let node = ConfigNode::builder("servers")
            .child(ConfigNode::leaf("server", "a"))
            .child(ConfigNode::leaf("server", "b"))
            .child(ConfigNode::leaf("server", "c"))
            .build();

        let values: Vec<_> = node.children_named("server").filter_map(|c| c.value()).collect();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_namespace_and_operation() {
        let node = ConfigNode::builder("ip-domain")
            .namespace("urn:example")
            .operation(EditOperation::Merge)
            .build()
            .with_operation(EditOperation::Replace);

        assert_eq!(node.namespace(), Some("urn:example"));
        assert_eq!(node.operation(), Some("replace"));
        assert_eq!(node.attribute("xmlns:nc"), Some(NETCONF_BASE_NS));
        // xmlns, xmlns:nc, nc:operation
        assert_eq!(node.attributes().len(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_names() {
        assert!(ConfigNode::empty("").validate().is_err());
        assert!(ConfigNode::empty("1abc").validate().is_err());
        assert!(ConfigNode::empty("a b").validate().is_err());

        let nested = ConfigNode::container("ok", [ConfigNode::empty("bad<name")]);
        assert!(matches!(nested.validate(), Err(NetconfError::InvalidNode(_))));

        assert!(ConfigNode::leaf("xr:vrf-name", "default").validate().is_ok());
    }

    #[test]
    fn test_local_name_lookup() {
        let node = ConfigNode::container("nc:data", [ConfigNode::leaf("if:name", "eth0")]);
        assert_eq!(node.local_name(), "data");
        assert_eq!(node.child_value("name"), Some("eth0"));
    }

    #[test]
    fn test_validate_rejects_duplicate_attributes() {
        let node: ConfigNode =
            serde_json::from_str(r#"{"name":"a","attributes":[["k","1"],["k","2"]]}"#).unwrap();
        assert!(matches!(node.validate(), Err(NetconfError::InvalidNode(_))));

        let node = ConfigNode::builder("a").attribute("k", "1").attribute("k", "2").build();
        assert_eq!(node.attribute("k"), Some("2"));
        assert!(node.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mixed_content() {
        let mixed = ConfigNode::builder("a")
            .value(" x ")
            .child(ConfigNode::leaf("b", "1"))
            .build();
        assert!(matches!(mixed.validate(), Err(NetconfError::InvalidNode(_))));

        let empty_value = ConfigNode::builder("a")
            .value("")
            .child(ConfigNode::leaf("b", "1"))
            .build();
        assert!(empty_value.validate().is_err());
    }
}
