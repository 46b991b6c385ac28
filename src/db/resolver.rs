//! Credential resolution.
//!
//! Resolves the database credentials of an application from its
//! configuration tree: an inline database block wins, otherwise a named
//! datasource reference (with the `"default"` convention and an optional
//! environment qualifier) is dereferenced.
//!
//! Resolution is a pure function of the tree and never fails hard: anything
//! it cannot find degrades to `None`. The open path, not this layer, is
//! strict about required fields.

use crate::config::{
    ConfigNode, ConfigTree, DATABASE_NODE_PATH, DATASOURCES_NODE_PATH, DATASOURCE_PROPERTY,
    DEFAULT_DATASOURCE, ENVIRONMENT_PROPERTY,
};
use crate::models::{Credentials, Session};
use tracing::debug;

/// Resolve database credentials from an application configuration tree.
///
/// Returns `None` when neither an inline database block nor a referenced
/// datasource exists.
pub fn resolve_credentials(config: &ConfigTree) -> Option<Credentials> {
    if let Some(node) = config.get_node(DATABASE_NODE_PATH) {
        debug!("Resolving credentials from inline database block");
        return Some(credentials_from_node(node));
    }
    resolve_datasource(config)
}

/// Convenience over [`resolve_credentials`] for a session's own
/// configuration.
pub fn resolve_for_session(session: &dyn Session) -> Option<Credentials> {
    resolve_credentials(session.config())
}

fn resolve_datasource(config: &ConfigTree) -> Option<Credentials> {
    let name = trimmed(config.get_property(DATASOURCE_PROPERTY)).unwrap_or(DEFAULT_DATASOURCE);
    let environment = trimmed(config.get_property(ENVIRONMENT_PROPERTY));

    let Some(datasource) = config.get_node(&format!("{DATASOURCES_NODE_PATH}/{name}")) else {
        debug!(datasource = %name, "Datasource is not defined, no credentials resolved");
        return None;
    };

    let mut credentials = credentials_from_node(datasource);
    if let Some(environment) = environment {
        match datasource.child(environment) {
            Some(node) => overlay(&mut credentials, credentials_from_node(node)),
            None => debug!(
                datasource = %name,
                environment = %environment,
                "Environment qualifier has no matching datasource node"
            ),
        }
    }

    if credentials.is_empty() {
        debug!(datasource = %name, "Datasource defines no credential fields");
        return None;
    }

    debug!(datasource = %name, "Resolved credentials from datasource");
    Some(credentials)
}

fn credentials_from_node(node: &ConfigNode) -> Credentials {
    Credentials {
        driver: owned(node.property("driver")),
        url: owned(node.property("url")),
        username: owned(node.property("username").or_else(|| node.property("user"))),
        password: owned(node.property("password")),
    }
}

/// Environment values override the base datasource field by field.
fn overlay(base: &mut Credentials, env: Credentials) {
    if env.driver.is_some() {
        base.driver = env.driver;
    }
    if env.url.is_some() {
        base.url = env.url;
    }
    if env.username.is_some() {
        base.username = env.username;
    }
    if env.password.is_some() {
        base.password = env.password;
    }
}

fn trimmed(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn owned(value: Option<&str>) -> Option<String> {
    trimmed(value).map(String::from)
}
