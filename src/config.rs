//! Configuration handling for the session authentication backend.
//!
//! Application configuration is a path-addressed tree: every node may carry
//! a string value and named children, and lookups use slash-separated paths
//! such as `/application/securitymanager/database`. Trees are built
//! programmatically or loaded from JSON.

use serde_json::Value;
use std::collections::BTreeMap;

/// Node holding the inline database credentials of an application.
pub const DATABASE_NODE_PATH: &str = "/application/securitymanager/database";

/// Property naming the pluggable access controller implementation.
pub const ACCESS_CONTROLLER_PROPERTY: &str = "/application/securitymanager/accesscontroller";

/// Property naming the datasource an application draws credentials from.
pub const DATASOURCE_PROPERTY: &str = "/application/securitymanager/datasource";

/// Property qualifying the datasource with a deployment environment.
pub const ENVIRONMENT_PROPERTY: &str = "/application/securitymanager/environment";

/// Node under which named datasources are defined.
pub const DATASOURCES_NODE_PATH: &str = "/datasources";

/// Datasource name used when no explicit name is configured.
pub const DEFAULT_DATASOURCE: &str = "default";

/// A single node of the configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigNode {
    value: Option<String>,
    children: BTreeMap<String, ConfigNode>,
}

impl ConfigNode {
    /// Get this node's own value, if any.
    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Get a direct child node by name.
    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.get(name)
    }

    /// Get the value of a direct child, the common "property of a block"
    /// lookup.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.children.get(name).and_then(|c| c.value())
    }

    /// Iterate over the direct children in name order.
    pub fn children(&self) -> impl Iterator<Item = (&str, &ConfigNode)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn descend(&self, segments: &[&str]) -> Option<&ConfigNode> {
        let mut node = self;
        for segment in segments {
            node = node.children.get(*segment)?;
        }
        Some(node)
    }

    fn descend_or_create(&mut self, segments: &[&str]) -> &mut ConfigNode {
        let mut node = self;
        for segment in segments {
            node = node.children.entry((*segment).to_string()).or_default();
        }
        node
    }

    fn from_json(value: &Value) -> ConfigNode {
        let mut node = ConfigNode::default();
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    node.children.insert(key.clone(), ConfigNode::from_json(child));
                }
            }
            Value::Null => {}
            Value::String(s) => node.value = Some(s.clone()),
            other => node.value = Some(other.to_string()),
        }
        node
    }
}

/// Path-addressed configuration tree of an application deployment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigTree {
    root: ConfigNode,
}

impl ConfigTree {
    /// Create an empty configuration tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration tree from a JSON document.
    ///
    /// Objects become nodes, scalar values become node values. This mirrors
    /// the on-disk representation of a deployment unit's configuration.
    pub fn from_json(json: &str) -> Result<Self, String> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| format!("Invalid configuration JSON: {e}"))?;
        Ok(Self {
            root: ConfigNode::from_json(&value),
        })
    }

    /// Look up a node by slash-separated path.
    pub fn get_node(&self, path: &str) -> Option<&ConfigNode> {
        self.root.descend(&split_path(path))
    }

    /// Look up the value of the node at `path`.
    pub fn get_property(&self, path: &str) -> Option<&str> {
        self.get_node(path).and_then(|n| n.value())
    }

    /// Set the value of the node at `path`, creating intermediate nodes.
    pub fn set_property(&mut self, path: &str, value: impl Into<String>) {
        self.root.descend_or_create(&split_path(path)).value = Some(value.into());
    }

    /// Builder-style [`set_property`](Self::set_property).
    pub fn with_property(mut self, path: &str, value: impl Into<String>) -> Self {
        self.set_property(path, value);
        self
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}
