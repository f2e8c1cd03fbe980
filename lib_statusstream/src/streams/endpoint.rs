//! # Endpoint Resolution
//!
//! Turns a resource id into the URL the push transport connects to. The
//! dashboard API is an external collaborator, so the client only sees the
//! [`EndpointResolver`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::error::TransportError;
use super::event::ResourceId;
use crate::configs::StreamSettings;
use crate::retrieve::ky_http::{ApiClient, ApiClientOptions};

const ID_PLACEHOLDER: &str = "{id}";

/// Resolves the stream URL for a resource.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    /// Returns the absolute stream URL for `resource`.
    async fn resolve(&self, resource: &ResourceId) -> Result<String, TransportError>;
}

/// The same URL for every resource.
#[derive(Debug, Clone)]
pub struct StaticEndpoint(pub String);

#[async_trait]
impl EndpointResolver for StaticEndpoint {
    async fn resolve(&self, _resource: &ResourceId) -> Result<String, TransportError> {
        Ok(self.0.clone())
    }
}

/// A URL template with an `{id}` placeholder, e.g.
/// `https://dash.example.com/api/monitors/{id}/stream`.
#[derive(Debug, Clone)]
pub struct TemplateEndpoint {
    template: String,
}

impl TemplateEndpoint {
    /// Wraps `template`. A template without `{id}` resolves to itself.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Substitutes `resource` into the template.
    pub fn render(&self, resource: &ResourceId) -> String {
        self.template.replace(ID_PLACEHOLDER, &resource.to_string())
    }
}

#[async_trait]
impl EndpointResolver for TemplateEndpoint {
    async fn resolve(&self, resource: &ResourceId) -> Result<String, TransportError> {
        Ok(self.render(resource))
    }
}

#[derive(Debug, Deserialize)]
struct StreamUrlBody {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    stream_url: Option<String>,
}

/// Asks the dashboard API for the stream URL.
///
/// `GET`s `path_template` (with `{id}` substituted) relative to the API base URL
/// and reads `url` or `stream_url` from the JSON body. Relative URLs in the
/// answer are joined to the API base URL.
pub struct ApiEndpointResolver {
    api: Arc<ApiClient>,
    path_template: String,
}

impl ApiEndpointResolver {
    /// Resolver using `api` and a path such as `monitors/{id}/stream-url`.
    pub fn new(api: Arc<ApiClient>, path_template: impl Into<String>) -> Self {
        Self {
            api,
            path_template: path_template.into(),
        }
    }
}

#[async_trait]
impl EndpointResolver for ApiEndpointResolver {
    async fn resolve(&self, resource: &ResourceId) -> Result<String, TransportError> {
        let path = self.path_template.replace(ID_PLACEHOLDER, &resource.to_string());
        let response = self
            .api
            .get_json::<StreamUrlBody>(&path)
            .await
            .map_err(|e| TransportError::Resolve(format!("{:#}", e)))?;

        if !response.success {
            return Err(TransportError::Resolve(format!(
                "{} answered HTTP {}",
                path, response.status
            )));
        }

        let body = response
            .data
            .ok_or_else(|| TransportError::Resolve(format!("{} returned no body", path)))?;
        let url = body
            .url
            .or(body.stream_url)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| TransportError::Resolve(format!("{} returned no stream url", path)))?;

        let absolute = self
            .api
            .join(&url)
            .map_err(|e| TransportError::Resolve(format!("{:#}", e)))?;
        tracing::debug!(%resource, url = %absolute, "resolved stream endpoint");
        Ok(absolute.into())
    }
}

/// Picks the resolver described by `settings`: the URL template when one is
/// set, otherwise an API lookup under `apiBaseUrl`.
pub fn resolver_from_settings(
    settings: &StreamSettings,
) -> Result<Arc<dyn EndpointResolver>, TransportError> {
    if let Some(template) = &settings.stream_url_template {
        return Ok(Arc::new(TemplateEndpoint::new(template.clone())));
    }
    let Some(base_url) = &settings.api_base_url else {
        return Err(TransportError::Construction(
            "neither streamUrlTemplate nor apiBaseUrl is configured".to_string(),
        ));
    };

    let options = ApiClientOptions {
        auth_token: settings.auth_token.clone(),
        timeout: settings.connect_timeout(),
        ..ApiClientOptions::default()
    };
    let api = ApiClient::new(base_url, options)
        .map_err(|e| TransportError::Construction(format!("{:#}", e)))?;
    Ok(Arc::new(ApiEndpointResolver::new(
        Arc::new(api),
        settings.api_stream_path(),
    )))
}
