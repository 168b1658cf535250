//! Resolution against an in-process mock registry.

use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderName, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use bootproxy_registry::{
    ArtifactKind, AuthMethod, Descriptor, ImageIndex, ImageReference, Manifest, ManifestResolver,
    MediaType, RegistryCache, RegistryClient, RegistryConfig, RegistryError,
    ANNOTATION_ARCHITECTURE, ANNOTATION_CNAME,
};
use parking_lot::Mutex;
use sha2::{Digest as _, Sha256};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

const TOKEN: &str = "mock-token";

fn sha256(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

#[derive(Default)]
struct Registry {
    documents: HashMap<String, (String, Vec<u8>)>,
    bearer: bool,
    /// Status returned to every manifest `HEAD`.
    head_status: Option<StatusCode>,
    /// Canned `/v2/` answer: status and optional `WWW-Authenticate`.
    probe: Option<(StatusCode, Option<&'static str>)>,
}

impl Registry {
    /// Stores a document under its digest and each tag; returns its descriptor.
    fn add(&mut self, repo: &str, tags: &[&str], media_type: &str, body: Vec<u8>) -> Descriptor {
        let digest = sha256(&body);
        let size = body.len() as u64;
        for reference in tags.iter().copied().chain(std::iter::once(digest.as_str())) {
            self.documents.insert(
                format!("/v2/{repo}/manifests/{reference}"),
                (media_type.to_string(), body.clone()),
            );
        }
        Descriptor::new(MediaType::new(media_type), digest, size)
    }

    /// Serves `body` under `reference` without checking it matches.
    fn serve_as(&mut self, repo: &str, reference: &str, media_type: &str, body: Vec<u8>) {
        self.documents.insert(
            format!("/v2/{repo}/manifests/{reference}"),
            (media_type.to_string(), body),
        );
    }

    fn add_manifest(&mut self, repo: &str, tags: &[&str], manifest: &Manifest) -> Descriptor {
        let body = serde_json::to_vec(manifest).unwrap();
        self.add(repo, tags, MediaType::OCI_MANIFEST, body)
    }

    fn add_index(&mut self, repo: &str, tags: &[&str], index: &ImageIndex) -> Descriptor {
        let body = serde_json::to_vec(index).unwrap();
        self.add(repo, tags, MediaType::OCI_INDEX, body)
    }
}

struct MockState {
    registry: Registry,
    addr: SocketAddr,
    token_queries: Mutex<Vec<String>>,
    probes: Mutex<usize>,
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if uri.path() == "/v2/" {
        *state.probes.lock() += 1;
        if let Some((status, challenge)) = state.registry.probe {
            return match challenge {
                Some(challenge) => (status, [(WWW_AUTHENTICATE, challenge)]).into_response(),
                None => status.into_response(),
            };
        }
    }

    if uri.path() == "/token" {
        state
            .token_queries
            .lock()
            .push(uri.query().unwrap_or_default().to_string());
        return Json(serde_json::json!({ "token": TOKEN })).into_response();
    }

    let authorized = !state.registry.bearer
        || headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {TOKEN}").as_str());
    if !authorized {
        let challenge = format!(
            r#"Bearer realm="http://{}/token" service="mock""#,
            state.addr
        );
        return (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, challenge)]).into_response();
    }

    if uri.path() == "/v2/" {
        return StatusCode::OK.into_response();
    }

    if method == Method::HEAD {
        if let Some(status) = state.registry.head_status {
            return status.into_response();
        }
    }

    match state.registry.documents.get(uri.path()) {
        Some((media_type, body)) => (
            [
                (CONTENT_TYPE, media_type.clone()),
                (
                    HeaderName::from_static("docker-content-digest"),
                    sha256(body),
                ),
                (CONTENT_LENGTH, body.len().to_string()),
            ],
            body.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn serve(registry: Registry) -> Arc<MockState> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(MockState {
        registry,
        addr,
        token_queries: Mutex::new(Vec::new()),
        probes: Mutex::new(0),
    });
    let app = Router::new()
        .fallback(handle)
        .with_state(Arc::clone(&state));
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    state
}

fn client(addr: SocketAddr) -> RegistryClient {
    let config = RegistryConfig::new().with_insecure_registry(addr.to_string());
    RegistryClient::new(config, Arc::new(RegistryCache::new())).unwrap()
}

fn resolver(addr: SocketAddr) -> ManifestResolver {
    ManifestResolver::new(client(addr))
}

fn uki_manifest(layer_digest: &str) -> Manifest {
    Manifest::new(vec![Descriptor::new(
        MediaType::new(MediaType::UKI),
        layer_digest,
        42,
    )])
}

fn pxe_manifest(prefix: &str) -> Manifest {
    Manifest::new(vec![
        Descriptor::new(MediaType::new(MediaType::KERNEL), format!("sha256:{prefix}k"), 1),
        Descriptor::new(MediaType::new(MediaType::INITRD), format!("sha256:{prefix}i"), 1),
        Descriptor::new(MediaType::new(MediaType::SQUASHFS), format!("sha256:{prefix}s"), 1),
    ])
}

/// Registry with a two-architecture PXE index tagged `1.0`.
fn multi_arch_registry(arm_first: bool) -> Registry {
    let mut registry = Registry::default();
    let amd = registry
        .add_manifest("os/boot", &[], &pxe_manifest("amd"))
        .with_architecture("amd64");
    let arm = registry
        .add_manifest("os/boot", &[], &pxe_manifest("arm"))
        .with_architecture("arm64");
    let entries = if arm_first {
        vec![arm, amd]
    } else {
        vec![amd, arm]
    };
    registry.add_index("os/boot", &["1.0"], &ImageIndex::new(entries));
    registry
}

#[tokio::test]
async fn test_resolve_pxe_selects_architecture_regardless_of_order() {
    for arm_first in [false, true] {
        let state = serve(multi_arch_registry(arm_first)).await;
        let reference = ImageReference::parse(&format!("{}/os/boot:1.0", state.addr)).unwrap();

        let digests = resolver(state.addr)
            .resolve_pxe(&reference, "arm64")
            .await
            .unwrap();
        assert_eq!(digests.kernel, "sha256:armk");
        assert_eq!(digests.initrd, "sha256:armi");
        assert_eq!(digests.squashfs, "sha256:arms");
    }
}

#[tokio::test]
async fn test_resolve_missing_architecture() {
    let state = serve(multi_arch_registry(false)).await;
    let reference = ImageReference::parse(&format!("{}/os/boot:1.0", state.addr)).unwrap();

    let err = resolver(state.addr)
        .resolve_pxe(&reference, "ppc64le")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "target manifest not found for architecture ppc64le"
    );
}

#[tokio::test]
async fn test_resolve_legacy_index() {
    let mut registry = Registry::default();
    let platform = registry
        .add_manifest("os/boot", &[], &pxe_manifest("plat"))
        .with_architecture("amd64");
    let legacy = registry
        .add_manifest("os/boot", &[], &pxe_manifest("legacy"))
        .with_annotation(ANNOTATION_CNAME, "metal_pxe-gardener_prod-amd64")
        .with_annotation(ANNOTATION_ARCHITECTURE, "amd64");
    registry.add_index("os/boot", &["1.0"], &ImageIndex::new(vec![platform, legacy]));
    let state = serve(registry).await;
    let reference = ImageReference::parse(&format!("{}/os/boot:1.0", state.addr)).unwrap();

    let digests = resolver(state.addr)
        .resolve_pxe(&reference, "amd64")
        .await
        .unwrap();
    assert_eq!(digests.kernel, "sha256:legacyk");
}

#[tokio::test]
async fn test_resolve_size_mismatch() {
    let mut registry = Registry::default();
    let mut entry = registry
        .add_manifest("os/boot", &[], &pxe_manifest("amd"))
        .with_architecture("amd64");
    let actual = entry.size;
    entry.size += 1;
    registry.add_index("os/boot", &["1.0"], &ImageIndex::new(vec![entry]));
    let state = serve(registry).await;
    let reference = ImageReference::parse(&format!("{}/os/boot:1.0", state.addr)).unwrap();

    let err = resolver(state.addr)
        .resolve_pxe(&reference, "amd64")
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("size mismatch: expected {}, got {actual}", actual + 1)
    );
}

#[tokio::test]
async fn test_resolve_unknown_tag() {
    let state = serve(multi_arch_registry(false)).await;
    let reference = ImageReference::parse(&format!("{}/os/boot:9.9", state.addr)).unwrap();

    let err = resolver(state.addr)
        .resolve_pxe(&reference, "amd64")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::ManifestNotFound { .. }));
}

#[tokio::test]
async fn test_resolve_with_bearer_token() {
    let mut registry = multi_arch_registry(false);
    registry.bearer = true;
    let state = serve(registry).await;
    let reference = ImageReference::parse(&format!("{}/os/boot:1.0", state.addr)).unwrap();

    let digests = resolver(state.addr)
        .resolve_pxe(&reference, "amd64")
        .await
        .unwrap();
    assert_eq!(digests.kernel, "sha256:amdk");

    let queries = state.token_queries.lock().clone();
    assert_eq!(
        queries.first().map(String::as_str),
        Some("service=mock&scope=repository:os/boot:pull")
    );
}

#[tokio::test]
async fn test_resolve_uki_by_digest_reference() {
    let mut registry = Registry::default();
    let uki = Manifest::new(vec![Descriptor::new(
        MediaType::new(MediaType::UKI),
        "sha256:ukilayer",
        42,
    )]);
    let descriptor = registry.add_manifest("os/uki", &["1.0"], &uki);
    let state = serve(registry).await;

    let reference =
        ImageReference::parse(&format!("{}/os/uki@{}", state.addr, descriptor.digest)).unwrap();
    let layer = resolver(state.addr)
        .resolve_single(&reference, "amd64", ArtifactKind::Uki)
        .await
        .unwrap();
    assert_eq!(layer.digest, "sha256:ukilayer");
    assert_eq!(layer.size, 42);
}

#[tokio::test]
async fn test_httpboot_uki_url() {
    let mut registry = Registry::default();
    let uki = Manifest::new(vec![Descriptor::new(
        MediaType::new(MediaType::UKI),
        "sha256:abc123",
        42,
    )]);
    registry.add_manifest("os/uki", &["1.0"], &uki);
    let state = serve(registry).await;

    let url = resolver(state.addr)
        .httpboot_uki_url(
            &format!("{}/os/uki:1.0", state.addr),
            "http://boot.example.com/httpboot/",
            "amd64",
        )
        .await
        .unwrap();
    assert_eq!(
        url,
        format!(
            "http://boot.example.com/httpboot/{}/os/uki/sha256-abc123.efi",
            state.addr
        )
    );
}

/// Registry that answers the pinned digest of one UKI manifest with another.
fn tampered_registry() -> (Registry, String) {
    let mut registry = Registry::default();
    let pinned = registry
        .add_manifest("os/uki", &[], &uki_manifest("sha256:good"))
        .digest;
    let evil = serde_json::to_vec(&uki_manifest("sha256:evil")).unwrap();
    registry.serve_as("os/uki", &pinned, MediaType::OCI_MANIFEST, evil);
    (registry, pinned)
}

#[tokio::test]
async fn test_pinned_digest_rejects_substituted_manifest() {
    let (registry, pinned) = tampered_registry();
    let state = serve(registry).await;
    let reference = ImageReference::parse(&format!("{}/os/uki@{pinned}", state.addr)).unwrap();

    let err = resolver(state.addr)
        .resolve_single(&reference, "amd64", ArtifactKind::Uki)
        .await
        .unwrap_err();
    match err {
        RegistryError::DigestMismatch { expected, actual } => {
            assert_eq!(expected, pinned);
            assert_ne!(actual, pinned);
        }
        other => panic!("expected digest mismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn test_pinned_digest_verified_without_head() {
    let (mut registry, pinned) = tampered_registry();
    registry.head_status = Some(StatusCode::METHOD_NOT_ALLOWED);
    let state = serve(registry).await;
    let reference = ImageReference::parse(&format!("{}/os/uki@{pinned}", state.addr)).unwrap();

    let err = resolver(state.addr)
        .resolve_single(&reference, "amd64", ArtifactKind::Uki)
        .await
        .unwrap_err();
    assert!(
        matches!(err, RegistryError::DigestMismatch { ref expected, .. } if *expected == pinned),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_head_rejected_falls_back_to_get() {
    let mut registry = Registry::default();
    registry.add_manifest("os/uki", &["1.0"], &uki_manifest("sha256:ukilayer"));
    registry.head_status = Some(StatusCode::METHOD_NOT_ALLOWED);
    let state = serve(registry).await;
    let reference = ImageReference::parse(&format!("{}/os/uki:1.0", state.addr)).unwrap();

    let layer = resolver(state.addr)
        .resolve_single(&reference, "amd64", ArtifactKind::Uki)
        .await
        .unwrap();
    assert_eq!(layer.digest, "sha256:ukilayer");
}

#[tokio::test]
async fn test_detect_missing_challenge_is_not_cached() {
    let registry = Registry {
        probe: Some((StatusCode::UNAUTHORIZED, None)),
        ..Registry::default()
    };
    let state = serve(registry).await;
    let client = client(state.addr);
    let domain = state.addr.to_string();

    for attempt in 1..=2 {
        let err = client.registry_info(&domain, "os/boot").await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingChallenge { .. }), "{err:?}");
        assert_eq!(*state.probes.lock(), attempt);
    }
    assert!(client.cache().is_empty());
}

#[tokio::test]
async fn test_detect_unexpected_status() {
    let registry = Registry {
        probe: Some((StatusCode::INTERNAL_SERVER_ERROR, None)),
        ..Registry::default()
    };
    let state = serve(registry).await;

    let err = client(state.addr)
        .registry_info(&state.addr.to_string(), "os/boot")
        .await
        .unwrap_err();
    assert!(
        matches!(err, RegistryError::UnexpectedProbeStatus { status: 500, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn test_detect_basic_auth() {
    let registry = Registry {
        probe: Some((StatusCode::UNAUTHORIZED, Some(r#"Basic realm="mock""#))),
        ..multi_arch_registry(false)
    };
    let state = serve(registry).await;
    let client = client(state.addr);

    let info = client
        .registry_info(&state.addr.to_string(), "os/boot")
        .await
        .unwrap();
    assert_eq!(info.auth_method, AuthMethod::Basic);
    assert_eq!(client.cache().len(), 1);

    let reference = ImageReference::parse(&format!("{}/os/boot:1.0", state.addr)).unwrap();
    let err = ManifestResolver::new(client)
        .resolve_pxe(&reference, "amd64")
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::NotImplemented { .. }), "{err:?}");
    assert_eq!(*state.probes.lock(), 1);
}
