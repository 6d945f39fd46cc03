//! Namespaced attribute bags produced by the attribute resolver.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An attribute value normalized for condition evaluation.
///
/// Numeric attributes always land on `Number(f64)` — there is no integer
/// variant, so two providers reporting the "same" numeric attribute as
/// `u32` and `f64` still compare equal under the evaluator's single
/// numeric domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Number(f64),
    Text(String),
    Bool(bool),
    List(Vec<AttrValue>),
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        Self::Number(value as f64)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values.into_iter().map(AttrValue::Text).collect())
    }
}

/// A namespaced attribute map: `namespace -> key -> value`.
pub type NamespacedAttrs = HashMap<String, HashMap<String, AttrValue>>;

/// The four attribute bags resolved for one request.
///
/// Subject and resource entries are namespaced by the provider that
/// contributed them (`bags.subject["character"]["role"]`) so condition
/// references `principal.character.role` / `resource.character.role`
/// resolve deterministically even when multiple providers touch the same
/// entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttributeBags {
    pub subject: NamespacedAttrs,
    pub resource: NamespacedAttrs,
    pub action: HashMap<String, AttrValue>,
    pub environment: NamespacedAttrs,
}

impl AttributeBags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a subject attribute under the given provider namespace.
    pub fn set_subject(&mut self, namespace: &str, key: &str, value: impl Into<AttrValue>) {
        self.subject
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Insert a resource attribute under the given provider namespace.
    pub fn set_resource(&mut self, namespace: &str, key: &str, value: impl Into<AttrValue>) {
        self.resource
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Insert an environment attribute under the given provider namespace.
    pub fn set_environment(&mut self, namespace: &str, key: &str, value: impl Into<AttrValue>) {
        self.environment
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.into());
    }

    /// Look up `<root>.<namespace>.<key>` across the three namespaced bags,
    /// or `<root>.<key>` in the flat `action` bag.
    #[must_use]
    pub fn lookup(&self, root: &str, namespace: &str, key: &str) -> Option<&AttrValue> {
        match root {
            "principal" => self.subject.get(namespace)?.get(key),
            "resource" => self.resource.get(namespace)?.get(key),
            "environment" => self.environment.get(namespace)?.get(key),
            "action" => self.action.get(key),
            _ => None,
        }
    }

    /// Presence test used by the `has <root>.<key>` condition leaf.
    ///
    /// `key` here is the full dotted path after the root, e.g. `has
    /// principal.character.role` passes `namespace="character",
    /// key="role"`.
    #[must_use]
    pub fn has(&self, root: &str, namespace: &str, key: &str) -> bool {
        self.lookup(root, namespace, key).is_some()
    }

    /// Flatten every bag into one `root.namespace.key -> value` map, for
    /// the audit entry's `attributes` column (spec §3, §6's
    /// `attributes_json`). The flat action bag has no namespace segment,
    /// so its keys are `action.<key>`.
    #[must_use]
    pub fn flatten(&self) -> HashMap<String, AttrValue> {
        let mut flat = HashMap::new();
        for (root, bag) in [("principal", &self.subject), ("resource", &self.resource), ("environment", &self.environment)] {
            for (namespace, attrs) in bag {
                for (key, value) in attrs {
                    flat.insert(format!("{root}.{namespace}.{key}"), value.clone());
                }
            }
        }
        for (key, value) in &self.action {
            flat.insert(format!("action.{key}"), value.clone());
        }
        flat
    }
}
