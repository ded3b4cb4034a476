//! Resource system
//!
//! Resources are URI-addressable endpoints. A registered pattern is either
//! exact or a URI template (`/items/{id}`); exact resources match first,
//! then templates are tried in registration order and the first match wins.
//! Template resources are listed only by `resources/templates/list`, never
//! by `resources/list`.
//!
//! Overlapping templates are a registration smell: which one matches is an
//! implementation detail of the iteration order and should not be relied
//! upon.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core::context::RequestContext;
use crate::core::error::{McpError, McpResult};
use crate::core::schema::{SchemaValidator, bind_arguments, generate_schema};
use crate::protocol::content::DEFAULT_MIME_TYPE;
use crate::protocol::messages::{ResourceDescriptor, ResourceTemplateDescriptor};
use crate::protocol::types::ResourceContents;
use crate::utils::uri::{UriTemplate, is_template, validate_uri};

/// Trait for implementing resource handlers
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Read the resource.
    ///
    /// `params` carries template path variables merged with any request
    /// body arguments; path variables win on collision.
    async fn read(
        &self,
        ctx: RequestContext,
        uri: &str,
        params: Map<String, Value>,
    ) -> McpResult<ResourceContents>;
}

/// A registered resource: pattern, metadata, and handler
pub struct Resource {
    /// URI pattern as registered
    pub uri_pattern: String,
    /// Display name
    pub name: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Declared MIME type
    pub mime_type: Option<String>,
    template: Option<UriTemplate>,
    handler: Arc<dyn ResourceHandler>,
    validator: Option<SchemaValidator>,
}

impl Resource {
    /// Create a resource from a pattern and raw handler
    pub fn new<H>(
        uri_pattern: impl Into<String>,
        name: impl Into<String>,
        description: Option<String>,
        mime_type: Option<String>,
        handler: H,
    ) -> McpResult<Self>
    where
        H: ResourceHandler + 'static,
    {
        let uri_pattern = uri_pattern.into();
        validate_uri(&uri_pattern)?;
        let template = is_template(&uri_pattern)
            .then(|| UriTemplate::compile(&uri_pattern))
            .transpose()?;

        Ok(Self {
            uri_pattern,
            name: name.into(),
            description,
            mime_type,
            template,
            handler: Arc::new(handler),
            validator: None,
        })
    }

    /// Whether the pattern contains template variables
    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }

    /// MIME type with the protocol default applied
    pub fn effective_mime_type(&self) -> String {
        self.mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
    }

    /// Descriptor for `resources/list`; None for templates
    pub fn descriptor(&self) -> Option<ResourceDescriptor> {
        if self.is_template() {
            return None;
        }
        Some(ResourceDescriptor {
            uri: self.uri_pattern.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.effective_mime_type(),
        })
    }

    /// Descriptor for `resources/templates/list`; None for exact resources
    pub fn template_descriptor(&self) -> Option<ResourceTemplateDescriptor> {
        if !self.is_template() {
            return None;
        }
        Some(ResourceTemplateDescriptor {
            uri_template: self.uri_pattern.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.effective_mime_type(),
        })
    }

    /// Validate and coerce a merged argument map, when a schema is attached
    pub fn validate_args(&self, args: &mut Map<String, Value>) -> McpResult<()> {
        match &self.validator {
            Some(v) => v.validate_and_coerce(args),
            None => Ok(()),
        }
    }

    /// Invoke the handler
    pub async fn read(
        &self,
        ctx: RequestContext,
        uri: &str,
        params: Map<String, Value>,
    ) -> McpResult<ResourceContents> {
        let mut contents = self.handler.read(ctx, uri, params).await?;
        if contents.uri.is_empty() {
            contents.uri = uri.to_string();
        }
        if contents.mime_type.is_none() {
            contents.mime_type = Some(self.effective_mime_type());
        }
        Ok(contents)
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("uri_pattern", &self.uri_pattern)
            .field("name", &self.name)
            .field("is_template", &self.is_template())
            .finish()
    }
}

/// Adapter wrapping a typed async closure into a [`ResourceHandler`]
struct TypedResourceHandler<A, F> {
    func: F,
    validator: SchemaValidator,
    _args: PhantomData<fn() -> A>,
}

#[async_trait]
impl<A, F, Fut> ResourceHandler for TypedResourceHandler<A, F>
where
    A: DeserializeOwned + JsonSchema + Send + 'static,
    F: Fn(RequestContext, String, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = McpResult<ResourceContents>> + Send + 'static,
{
    async fn read(
        &self,
        ctx: RequestContext,
        uri: &str,
        params: Map<String, Value>,
    ) -> McpResult<ResourceContents> {
        let typed: A = bind_arguments(&self.validator, params)?;
        (self.func)(ctx, uri.to_string(), typed).await
    }
}

/// Registry of resources.
///
/// Exact resources are keyed by URI; template resources keep registration
/// order. Registering the same pattern again replaces the earlier entry.
#[derive(Default)]
pub struct ResourceRegistry {
    exact: RwLock<BTreeMap<String, Arc<Resource>>>,
    templates: RwLock<Vec<Arc<Resource>>>,
    subscriptions: RwLock<HashMap<String, HashSet<String>>>,
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource
    pub async fn register(&self, resource: Resource) {
        let resource = Arc::new(resource);
        if resource.is_template() {
            let mut templates = self.templates.write().await;
            match templates
                .iter()
                .position(|t| t.uri_pattern == resource.uri_pattern)
            {
                Some(index) => templates[index] = resource,
                None => templates.push(resource),
            }
        } else {
            let mut exact = self.exact.write().await;
            exact.insert(resource.uri_pattern.clone(), resource);
        }
    }

    /// Register a resource with a typed argument struct.
    ///
    /// Template path variables and body arguments are validated against the
    /// schema generated from `A` before the handler runs.
    pub async fn register_typed<A, F, Fut>(
        &self,
        uri_pattern: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        mime_type: Option<String>,
        func: F,
    ) -> McpResult<()>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        F: Fn(RequestContext, String, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = McpResult<ResourceContents>> + Send + 'static,
    {
        let schema = generate_schema::<A>()?;
        let handler = TypedResourceHandler::<A, F> {
            func,
            validator: SchemaValidator::new(schema.clone()),
            _args: PhantomData,
        };
        let mut resource = Resource::new(
            uri_pattern,
            name,
            Some(description.into()),
            mime_type,
            handler,
        )?;
        resource.validator = Some(SchemaValidator::new(schema));
        self.register(resource).await;
        Ok(())
    }

    /// Remove a resource by pattern; returns whether it existed
    pub async fn unregister(&self, uri_pattern: &str) -> bool {
        {
            let mut exact = self.exact.write().await;
            if exact.remove(uri_pattern).is_some() {
                return true;
            }
        }
        let mut templates = self.templates.write().await;
        let before = templates.len();
        templates.retain(|t| t.uri_pattern != uri_pattern);
        templates.len() != before
    }

    /// Resolve a URI: exact match first, then templates in registration
    /// order. Returns the resource and any bound path variables.
    pub async fn lookup(&self, uri: &str) -> Option<(Arc<Resource>, HashMap<String, String>)> {
        {
            let exact = self.exact.read().await;
            if let Some(resource) = exact.get(uri) {
                return Some((resource.clone(), HashMap::new()));
            }
        }

        let templates = self.templates.read().await;
        for resource in templates.iter() {
            if let Some(template) = &resource.template {
                if let Some(bound) = template.matches(uri) {
                    return Some((resource.clone(), bound));
                }
            }
        }
        None
    }

    /// Whether any resource is registered
    pub async fn is_empty(&self) -> bool {
        self.exact.read().await.is_empty() && self.templates.read().await.is_empty()
    }

    /// Descriptors of non-template resources, in URI order
    pub async fn descriptors(&self) -> Vec<ResourceDescriptor> {
        let exact = self.exact.read().await;
        exact.values().filter_map(|r| r.descriptor()).collect()
    }

    /// Descriptors of template resources, in registration order
    pub async fn template_descriptors(&self) -> Vec<ResourceTemplateDescriptor> {
        let templates = self.templates.read().await;
        templates
            .iter()
            .filter_map(|r| r.template_descriptor())
            .collect()
    }

    /// Record a session's subscription to a URI.
    ///
    /// The URI must resolve to a registered resource; update notifications
    /// are the application's responsibility.
    pub async fn subscribe(&self, uri: &str, session_id: &str) -> McpResult<()> {
        if self.lookup(uri).await.is_none() {
            return Err(McpError::ResourceNotFound(uri.to_string()));
        }
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions
            .entry(uri.to_string())
            .or_default()
            .insert(session_id.to_string());
        Ok(())
    }

    /// Remove a session's subscription to a URI
    pub async fn unsubscribe(&self, uri: &str, session_id: &str) -> McpResult<()> {
        let mut subscriptions = self.subscriptions.write().await;
        if let Some(sessions) = subscriptions.get_mut(uri) {
            sessions.remove(session_id);
            if sessions.is_empty() {
                subscriptions.remove(uri);
            }
        }
        Ok(())
    }

    /// Sessions subscribed to a URI
    pub async fn subscribers(&self, uri: &str) -> Vec<String> {
        let subscriptions = self.subscriptions.read().await;
        subscriptions
            .get(uri)
            .map(|sessions| sessions.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all subscriptions held by a session
    pub async fn drop_session(&self, session_id: &str) {
        let mut subscriptions = self.subscriptions.write().await;
        subscriptions.retain(|_, sessions| {
            sessions.remove(session_id);
            !sessions.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::Deserialize;
    use serde_json::json;

    struct StaticText(&'static str);

    #[async_trait]
    impl ResourceHandler for StaticText {
        async fn read(
            &self,
            _ctx: RequestContext,
            uri: &str,
            _params: Map<String, Value>,
        ) -> McpResult<ResourceContents> {
            Ok(ResourceContents::text(uri, self.0))
        }
    }

    #[tokio::test]
    async fn test_exact_match() {
        let registry = ResourceRegistry::new();
        registry
            .register(
                Resource::new("file:///a.txt", "a", None, None, StaticText("alpha")).unwrap(),
            )
            .await;

        let (resource, vars) = registry.lookup("file:///a.txt").await.unwrap();
        assert!(!resource.is_template());
        assert!(vars.is_empty());
        assert!(registry.lookup("file:///b.txt").await.is_none());
    }

    #[tokio::test]
    async fn test_template_match_binds_variables() {
        let registry = ResourceRegistry::new();
        registry
            .register(
                Resource::new("/items/{id}", "item", None, None, StaticText("x")).unwrap(),
            )
            .await;

        let (resource, vars) = registry.lookup("/items/42").await.unwrap();
        assert!(resource.is_template());
        assert_eq!(vars.get("id"), Some(&"42".to_string()));
    }

    #[tokio::test]
    async fn test_exact_wins_over_template() {
        let registry = ResourceRegistry::new();
        registry
            .register(Resource::new("/items/{id}", "t", None, None, StaticText("t")).unwrap())
            .await;
        registry
            .register(
                Resource::new("/items/special", "s", None, None, StaticText("s")).unwrap(),
            )
            .await;

        let (resource, vars) = registry.lookup("/items/special").await.unwrap();
        assert!(!resource.is_template());
        assert!(vars.is_empty());
    }

    #[tokio::test]
    async fn test_lists_are_disjoint() {
        let registry = ResourceRegistry::new();
        registry
            .register(Resource::new("/static", "s", None, None, StaticText("s")).unwrap())
            .await;
        registry
            .register(Resource::new("/items/{id}", "t", None, None, StaticText("t")).unwrap())
            .await;

        let plain = registry.descriptors().await;
        let templates = registry.template_descriptors().await;
        assert_eq!(plain.len(), 1);
        assert_eq!(plain[0].uri, "/static");
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].uri_template, "/items/{id}");
    }

    #[tokio::test]
    async fn test_default_mime_type() {
        let registry = ResourceRegistry::new();
        registry
            .register(Resource::new("/static", "s", None, None, StaticText("s")).unwrap())
            .await;
        let plain = registry.descriptors().await;
        assert_eq!(plain[0].mime_type, DEFAULT_MIME_TYPE);
    }

    #[tokio::test]
    async fn test_typed_resource_binding() {
        #[derive(Debug, Deserialize, JsonSchema)]
        struct ItemArgs {
            id: String,
        }

        let registry = ResourceRegistry::new();
        registry
            .register_typed(
                "/items/{id}",
                "item",
                "One item",
                Some("application/json".to_string()),
                |_ctx, uri: String, args: ItemArgs| async move {
                    Ok(ResourceContents::text(uri, format!("item {}", args.id)))
                },
            )
            .await
            .unwrap();

        let (resource, vars) = registry.lookup("/items/42").await.unwrap();
        let mut params = Map::new();
        for (k, v) in vars {
            params.insert(k, json!(v));
        }
        resource.validate_args(&mut params).unwrap();
        let contents = resource
            .read(RequestContext::detached(), "/items/42", params)
            .await
            .unwrap();
        assert_eq!(contents.text.as_deref(), Some("item 42"));
    }

    #[tokio::test]
    async fn test_subscriptions() {
        let registry = ResourceRegistry::new();
        registry
            .register(Resource::new("/static", "s", None, None, StaticText("s")).unwrap())
            .await;

        registry.subscribe("/static", "sess-1").await.unwrap();
        registry.subscribe("/static", "sess-2").await.unwrap();
        assert_eq!(registry.subscribers("/static").await.len(), 2);

        registry.unsubscribe("/static", "sess-1").await.unwrap();
        assert_eq!(registry.subscribers("/static").await, vec!["sess-2"]);

        assert!(registry.subscribe("/missing", "sess-1").await.is_err());
    }
}
