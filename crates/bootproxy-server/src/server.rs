//! HTTP surface of the image proxy.
//!
//! Routes:
//! - `GET /image?imageName=..&version=..&layerDigest=..` (or `layerName=<mediaType>`)
//! - `GET /httpboot/<registry>/<repository>/sha256-<hex>.efi`
//! - `GET /config-drive/<id>.iso`
//! - `GET /healthz`

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bootproxy_registry::{
    ArtifactKind, Digest, ImageName, ImageReference, ManifestResolver, RegistryClient,
    RegistryError, RegistryPolicy,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{ConfigDriveCache, SweeperHandle};
use crate::config::ServerConfig;
use crate::error::{ProxyError, Result};
use crate::provider::ConfigDriveProvider;
use crate::proxy::BlobProxy;

/// Content type of config-drive images.
pub const ISO_CONTENT_TYPE: &str = "application/x-iso9660-image";

/// Shared state handed to every request handler.
#[derive(Clone)]
pub struct AppState {
    resolver: ManifestResolver,
    proxy: BlobProxy,
    policy: Arc<RegistryPolicy>,
    architecture: Arc<str>,
    config_drives: Arc<ConfigDriveCache>,
    provider: Arc<dyn ConfigDriveProvider>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("policy", &self.policy)
            .field("architecture", &self.architecture)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Creates the state for a server using `client` for all registry traffic.
    #[must_use]
    pub fn new(
        client: RegistryClient,
        policy: RegistryPolicy,
        config: &ServerConfig,
        provider: Arc<dyn ConfigDriveProvider>,
    ) -> Self {
        Self {
            resolver: ManifestResolver::new(client.clone()),
            proxy: BlobProxy::new(client),
            policy: Arc::new(policy),
            architecture: Arc::from(config.architecture.as_str()),
            config_drives: Arc::new(ConfigDriveCache::new(
                config.config_drive_ttl,
                config.config_drive_max_size,
            )),
            provider,
        }
    }

    /// Returns the config-drive cache.
    #[must_use]
    pub fn config_drives(&self) -> &Arc<ConfigDriveCache> {
        &self.config_drives
    }

    fn check_policy(&self, image: &ImageName) -> Result<()> {
        if self.policy.is_allowed(image.registry()) {
            return Ok(());
        }
        info!(
            registry = image.registry(),
            mode = self.policy.mode(),
            "Registry denied by policy"
        );
        Err(RegistryError::RegistryNotAllowed {
            registry: image.registry().to_string(),
        }
        .into())
    }
}

/// Builds the router with all boot routes.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/image", get(image))
        .route("/httpboot/*path", get(httpboot))
        .route("/config-drive/:file", get(config_drive))
        .route("/healthz", get(healthz))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct ImageQuery {
    #[serde(rename = "imageName")]
    image_name: Option<String>,
    version: Option<String>,
    #[serde(rename = "layerDigest")]
    layer_digest: Option<String>,
    #[serde(rename = "layerName")]
    layer_name: Option<String>,
}

/// How the layer to serve is identified.
enum Layer {
    Digest(Digest),
    Kind { version: String, kind: ArtifactKind },
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ProxyError::invalid_request(format!("missing query parameter '{name}'")))
}

async fn image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let image_name = required(query.image_name, "imageName")?;
    let version = required(query.version, "version")?;
    let image_name = image_name.strip_suffix(".efi").unwrap_or(&image_name);

    let layer = match (query.layer_digest.filter(|d| !d.is_empty()), query.layer_name) {
        (Some(digest), _) => Layer::Digest(Digest::parse(&digest)?),
        (None, Some(media_type)) if !media_type.is_empty() => {
            let kind = ArtifactKind::from_media_type(&media_type).ok_or_else(|| {
                ProxyError::invalid_request(format!("unknown layer media type '{media_type}'"))
            })?;
            Layer::Kind { version, kind }
        }
        _ => return Err(ProxyError::invalid_request("missing query parameter 'layerDigest'")),
    };

    serve_layer(&state, &headers, image_name, layer).await
}

async fn httpboot(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    let (image_name, digest) = parse_httpboot_path(&path)?;
    serve_layer(&state, &headers, image_name, Layer::Digest(digest)).await
}

/// Splits `<image name>/sha256-<hex>.efi` into the image name and digest.
fn parse_httpboot_path(path: &str) -> Result<(&str, Digest)> {
    let path = path.trim_start_matches('/');
    let (image_name, file) = path
        .rsplit_once('/')
        .ok_or_else(|| ProxyError::invalid_request("httpboot path has no image name"))?;
    let segment = file
        .strip_suffix(".efi")
        .ok_or_else(|| ProxyError::invalid_request("httpboot path must end in .efi"))?;
    if !segment.starts_with("sha256-") {
        return Err(ProxyError::invalid_request(
            "httpboot digest must start with sha256-",
        ));
    }
    Ok((image_name, Digest::from_path_segment(segment)?))
}

async fn serve_layer(
    state: &AppState,
    headers: &HeaderMap,
    image_name: &str,
    layer: Layer,
) -> Result<Response> {
    let image = ImageName::parse(image_name)?;
    state.check_policy(&image)?;

    let client = state.resolver.client();
    let info = client
        .registry_info(image.registry(), image.repository())
        .await?;
    let auth = client.authorization(&info, image.repository()).await?;

    let digest = match layer {
        Layer::Digest(digest) => digest,
        Layer::Kind { version, kind } => {
            let reference = ImageReference::with_tag(image_name, &version)?;
            let descriptor = state
                .resolver
                .resolve_with_auth(&reference, &state.architecture, &[kind], auth.as_ref())
                .await?
                .take(kind)?;
            Digest::parse(&descriptor.digest)?
        }
    };

    state
        .proxy
        .proxy(headers, &image, &digest, &info, auth)
        .await
}

async fn config_drive(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response> {
    let id = file
        .strip_suffix(".iso")
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ProxyError::invalid_request("config drive path must end in .iso"))?;

    let version = state
        .provider
        .source_version(id)
        .await?
        .ok_or_else(|| ProxyError::ConfigDriveNotFound { id: id.to_string() })?;

    let payload = if let Some(payload) = state.config_drives.get_if_current(id, &version) {
        payload
    } else {
        let payload = state.provider.render(id).await?;
        info!(id, version = %version, size = payload.len(), "Rendered config drive");
        state.config_drives.set(id, payload.clone(), version);
        payload
    };

    Ok(([(header::CONTENT_TYPE, ISO_CONTENT_TYPE)], payload).into_response())
}

async fn healthz() -> &'static str {
    "ok"
}

/// Server handle for graceful shutdown.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
    sweeper: SweeperHandle,
}

impl ServerHandle {
    /// Address the server is listening on.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Trigger graceful shutdown and wait for the server to stop.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
        self.sweeper.shutdown().await;
    }
}

/// HTTP server for boot clients.
#[derive(Debug)]
pub struct ProxyServer {
    config: ServerConfig,
    state: AppState,
}

impl ProxyServer {
    /// Create a new server.
    #[must_use]
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Get the server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and start serving in the background.
    ///
    /// Returns a handle that can be used to trigger graceful shutdown.
    pub async fn run(self) -> std::result::Result<ServerHandle, ServerError> {
        let addr = self.config.bind_address;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let sweeper = self.state.config_drives.spawn_sweeper();
        let app = router(self.state);

        info!("Starting image proxy server on {}", local_addr);

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                    info!("Image proxy server shutdown signal received");
                })
                .await;

            if let Err(e) = result {
                warn!("Image proxy server error: {}", e);
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
            task,
            sweeper,
        })
    }

    /// Run the server and block until Ctrl+C.
    pub async fn run_until_shutdown(self) -> std::result::Result<(), ServerError> {
        let handle = self.run().await?;

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        info!("Shutting down image proxy server...");
        handle.shutdown().await;

        Ok(())
    }
}

/// Server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}
