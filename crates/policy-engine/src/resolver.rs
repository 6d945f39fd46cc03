//! Attribute resolution: fans a request out across every registered
//! provider concurrently and assembles the four bags the condition
//! evaluator walks.

use std::sync::Arc;

use futures::future::join_all;
use reaper_core::{entity_type, AccessRequest, AttributeBags, AttributeProvider, EnvironmentProvider};
use tracing::warn;

/// Aggregates attribute providers registered at construction time.
///
/// Providers are not added or removed after construction — the resolver
/// is built once at bootstrap, mirroring how the compiled-policy cache's
/// collaborators are wired.
#[derive(Debug, Default)]
pub struct Resolver {
    entity_providers: Vec<Arc<dyn AttributeProvider>>,
    environment_providers: Vec<Arc<dyn EnvironmentProvider>>,
}

impl Resolver {
    #[must_use]
    pub fn new(
        entity_providers: Vec<Arc<dyn AttributeProvider>>,
        environment_providers: Vec<Arc<dyn EnvironmentProvider>>,
    ) -> Self {
        Self {
            entity_providers,
            environment_providers,
        }
    }

    /// Resolve subject, resource, and environment attributes for `req`.
    ///
    /// Every entity provider is invoked once for the subject and once
    /// for the resource, all concurrently. A provider returning an error
    /// is logged and contributes nothing — callers never see the
    /// failure, per spec §4.1.
    pub async fn resolve(&self, req: &AccessRequest) -> AttributeBags {
        let mut bags = AttributeBags::new();

        let subject_futures = self
            .entity_providers
            .iter()
            .map(|provider| resolve_subject(provider.as_ref(), &req.subject));
        let resource_futures = self
            .entity_providers
            .iter()
            .map(|provider| resolve_resource(provider.as_ref(), &req.resource));
        let environment_futures = self
            .environment_providers
            .iter()
            .map(|provider| resolve_environment(provider.as_ref()));

        let (subject_results, resource_results, environment_results) = tokio::join!(
            join_all(subject_futures),
            join_all(resource_futures),
            join_all(environment_futures),
        );

        for (namespace, attrs) in subject_results.into_iter().flatten() {
            for (key, value) in attrs {
                bags.set_subject(&namespace, &key, value);
            }
        }
        for (namespace, attrs) in resource_results.into_iter().flatten() {
            for (key, value) in attrs {
                bags.set_resource(&namespace, &key, value);
            }
        }
        for (namespace, attrs) in environment_results.into_iter().flatten() {
            for (key, value) in attrs {
                bags.set_environment(&namespace, &key, value);
            }
        }

        bags.action.insert("name".to_string(), req.action.as_str().into());

        bags
    }
}

type NamespacedAttrResult = Option<(String, std::collections::HashMap<String, reaper_core::AttrValue>)>;

async fn resolve_subject(provider: &dyn AttributeProvider, entity_ref: &str) -> NamespacedAttrResult {
    match provider.attributes_for(entity_ref).await {
        Ok(attrs) if !attrs.is_empty() => Some((provider.namespace().to_string(), attrs)),
        Ok(_) => None,
        Err(err) => {
            warn!(
                namespace = provider.namespace(),
                entity_type = entity_type(entity_ref),
                error = %err,
                "attribute provider failed resolving subject, proceeding without it"
            );
            None
        }
    }
}

async fn resolve_resource(provider: &dyn AttributeProvider, entity_ref: &str) -> NamespacedAttrResult {
    match provider.attributes_for(entity_ref).await {
        Ok(attrs) if !attrs.is_empty() => Some((provider.namespace().to_string(), attrs)),
        Ok(_) => None,
        Err(err) => {
            warn!(
                namespace = provider.namespace(),
                entity_type = entity_type(entity_ref),
                error = %err,
                "attribute provider failed resolving resource, proceeding without it"
            );
            None
        }
    }
}

async fn resolve_environment(provider: &dyn EnvironmentProvider) -> NamespacedAttrResult {
    match provider.attributes().await {
        Ok(attrs) if !attrs.is_empty() => Some((provider.namespace().to_string(), attrs)),
        Ok(_) => None,
        Err(err) => {
            warn!(
                namespace = provider.namespace(),
                error = %err,
                "environment provider failed, proceeding without it"
            );
            None
        }
    }
}
