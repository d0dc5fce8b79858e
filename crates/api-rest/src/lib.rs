//! # API REST
//!
//! REST API implementation for redkit.
//!
//! Handles:
//! - multipart uploads into the chroot and flat upload roots
//! - ZIP export of kit `bin/` directories, streamed as they are archived
//! - static files under `/bin/`
//! - OpenAPI/Swagger documentation
//!
//! Filesystem work runs on the blocking pool; handlers only parse requests and map results to
//! status codes.

#![warn(rust_2018_idioms)]

mod stream;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path as AxumPath, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use redkit_core::{CoreConfig, CoreError, KitService, UploadMode, UploadService};
use serde::{Deserialize, Serialize};
use std::io::{Seek, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::SpooledTempFile;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

/// Parts up to this size stay in memory while a request is being read.
const SPOOL_THRESHOLD: usize = 1024 * 1024;

/// Health check response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct HealthRes {
    pub ok: bool,
    pub message: String,
}

/// Kits available for export
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ListKitsRes {
    pub kits: Vec<String>,
}

/// Application state shared across REST API handlers
#[derive(Clone)]
pub struct AppState {
    uploads: Arc<UploadService>,
    kits: Arc<KitService>,
    bin_dir: PathBuf,
    upload_limit_bytes: usize,
}

impl AppState {
    /// Builds the services described by `cfg`, creating missing roots.
    pub fn new(cfg: &CoreConfig) -> Result<Self, CoreError> {
        Ok(Self {
            uploads: Arc::new(UploadService::new(cfg.chroot_dir(), cfg.uploads_dir())?),
            kits: Arc::new(KitService::new(cfg.kits_dir())?),
            bin_dir: cfg.bin_dir().to_path_buf(),
            upload_limit_bytes: cfg.upload_limit_bytes(),
        })
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health, chroot_upload, flat_upload, export_kit, export_default_kit, list_kits),
    components(schemas(HealthRes, ListKitsRes))
)]
pub struct ApiDoc;

/// Builds the REST router.
///
/// Upload routes accept request bodies up to the configured limit. Everything else keeps axum's
/// default limit.
pub fn router(state: AppState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.upload_limit_bytes);

    Router::new()
        .route("/health", get(health))
        .route("/chroot", post(chroot_upload).layer(body_limit))
        .route("/upload", post(flat_upload).layer(body_limit))
        .route("/kit", get(export_default_kit))
        .route("/kit/:kit", get(export_kit))
        .route("/kits", get(list_kits))
        .nest_service("/bin", ServeDir::new(&state.bin_dir))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
/// Health check endpoint for the REST API
#[axum::debug_handler]
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        ok: true,
        message: "redkit REST API is alive".into(),
    })
}

#[utoipa::path(
    post,
    path = "/chroot",
    request_body(content_type = "multipart/form-data", description = "File fields named by their destination path"),
    responses(
        (status = 200, description = "Files written", body = String),
        (status = 400, description = "Malformed multipart body or a field name outside the chroot"),
        (status = 500, description = "Internal server error")
    )
)]
/// Materializes every file field under the chroot root
///
/// Field names are paths relative to the root, so `tools/linux/run.sh` creates
/// `<chroot>/tools/linux/run.sh` along with any missing directories. Repeated field names are
/// concatenated in the order received. A name ending in `/` only creates directories.
///
/// # Errors
/// Returns `400 Bad Request` if the body is not valid multipart or any field name escapes the
/// root; nothing is written in that case. Returns `500 Internal Server Error` if writing fails.
#[axum::debug_handler]
async fn chroot_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<&'static str, (StatusCode, &'static str)> {
    upload(&state, UploadMode::Chroot, multipart).await?;
    Ok("Received file(s) successfully.")
}

#[utoipa::path(
    post,
    path = "/upload",
    request_body(content_type = "multipart/form-data", description = "File fields named by their destination path"),
    responses(
        (status = 200, description = "Files written", body = String),
        (status = 400, description = "Malformed multipart body or invalid field name"),
        (status = 500, description = "Internal server error")
    )
)]
/// Writes every file field directly into the uploads root
///
/// Separators in the field name become `_`, so `docs/notes.txt` is stored as `docs_notes.txt`.
#[axum::debug_handler]
async fn flat_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<&'static str, (StatusCode, &'static str)> {
    upload(&state, UploadMode::Flat, multipart).await?;
    Ok("Received file successfully.")
}

#[utoipa::path(
    get,
    path = "/kit/{kit}",
    params(("kit" = String, Path, description = "Kit directory name")),
    responses(
        (status = 200, description = "ZIP archive of the kit's bin directory", content_type = "application/zip"),
        (status = 400, description = "Invalid kit name"),
        (status = 404, description = "Unknown kit, or the kit has no bin directory"),
        (status = 500, description = "Internal server error")
    )
)]
/// Exports `<kits>/<kit>/bin` as a ZIP archive
///
/// Symbolic links are archived under their own names with the content of the file they resolve
/// to. Directories and empty files produce no entries.
#[axum::debug_handler]
async fn export_kit(
    State(state): State<AppState>,
    AxumPath(kit): AxumPath<String>,
) -> Result<Response, (StatusCode, &'static str)> {
    export(&state, Some(kit)).await
}

#[utoipa::path(
    get,
    path = "/kit",
    responses(
        (status = 200, description = "ZIP archive of the shared bin directory", content_type = "application/zip"),
        (status = 404, description = "No shared bin directory"),
        (status = 500, description = "Internal server error")
    )
)]
/// Exports `<kits>/bin` as a ZIP archive
#[axum::debug_handler]
async fn export_default_kit(
    State(state): State<AppState>,
) -> Result<Response, (StatusCode, &'static str)> {
    export(&state, None).await
}

#[utoipa::path(
    get,
    path = "/kits",
    responses(
        (status = 200, description = "Kits with a bin directory", body = ListKitsRes),
        (status = 500, description = "Internal server error")
    )
)]
/// Lists kits that can be exported
#[axum::debug_handler]
async fn list_kits(
    State(state): State<AppState>,
) -> Result<Json<ListKitsRes>, (StatusCode, &'static str)> {
    let kits = state.kits.clone();
    match tokio::task::spawn_blocking(move || kits.list_kits()).await {
        Ok(Ok(kits)) => Ok(Json(ListKitsRes { kits })),
        Ok(Err(e)) => {
            tracing::error!("List kits error: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
        Err(e) => {
            tracing::error!("List kits task failed: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error"))
        }
    }
}

/// Reads every file field into a spooled temp file, grouped by field name in first-seen order.
async fn read_fields(
    mut multipart: Multipart,
) -> Result<Vec<(String, Vec<SpooledTempFile>)>, (StatusCode, &'static str)> {
    let mut fields: Vec<(String, Vec<SpooledTempFile>)> = Vec::new();

    while let Some(mut field) = multipart.next_field().await.map_err(|e| {
        tracing::error!("Multipart error: {}", e);
        (e.status(), "Invalid multipart body")
    })? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if field.file_name().is_none() {
            tracing::debug!("ignoring non-file field {:?}", name);
            continue;
        }

        let mut part = SpooledTempFile::new(SPOOL_THRESHOLD);
        let mut spooled = 0usize;
        while let Some(chunk) = field.chunk().await.map_err(|e| {
            tracing::error!("Multipart error in field {:?}: {}", name, e);
            (e.status(), "Invalid multipart body")
        })? {
            spooled += chunk.len();
            if spooled <= SPOOL_THRESHOLD {
                part.write_all(&chunk).map_err(spool_error)?;
            } else {
                // Past the threshold the spool is a file on disk.
                part = tokio::task::spawn_blocking(move || {
                    let mut part = part;
                    part.write_all(&chunk).map(|()| part)
                })
                .await
                .map_err(|e| {
                    tracing::error!("Spool task failed: {:?}", e);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
                })?
                .map_err(spool_error)?;
            }
        }
        part.rewind().map_err(spool_error)?;

        match fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, parts)) => parts.push(part),
            None => fields.push((name, vec![part])),
        }
    }

    Ok(fields)
}

fn spool_error(e: std::io::Error) -> (StatusCode, &'static str) {
    tracing::error!("Spooling upload failed: {:?}", e);
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
}

async fn upload(
    state: &AppState,
    mode: UploadMode,
    multipart: Multipart,
) -> Result<(), (StatusCode, &'static str)> {
    let fields = read_fields(multipart).await?;
    let uploads = state.uploads.clone();

    let written = tokio::task::spawn_blocking(move || uploads.materialize(mode, fields))
        .await
        .map_err(|e| {
            tracing::error!("Upload task failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        })?
        .map_err(|e| {
            tracing::error!("Upload error: {}", e);
            if e.is_rejection() {
                (StatusCode::BAD_REQUEST, "Invalid path")
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        })?;

    tracing::info!("received {} file(s) ({:?})", written.len(), mode);
    Ok(())
}

async fn export(
    state: &AppState,
    kit: Option<String>,
) -> Result<Response, (StatusCode, &'static str)> {
    let kits = state.kits.clone();
    let export = tokio::task::spawn_blocking(move || kits.plan_export(kit.as_deref()))
        .await
        .map_err(|e| {
            tracing::error!("Export task failed: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        })?
        .map_err(|e| {
            tracing::error!("Export error: {}", e);
            if e.is_rejection() {
                (StatusCode::BAD_REQUEST, "Invalid kit name")
            } else if e.is_not_found() {
                (StatusCode::NOT_FOUND, "Kit not found")
            } else {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
        })?;

    let disposition = format!(
        "attachment; filename=\"{}\"",
        export.file_name().replace(['"', '\\'], "_")
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        stream::zip_body(export.plan),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "redkit-test-boundary";

    struct Fixture {
        temp: TempDir,
        app: Router,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_limit(1024 * 1024)
        }

        fn with_limit(limit: usize) -> Self {
            let temp = TempDir::new().unwrap();
            let cfg = CoreConfig::new(
                "127.0.0.1:0".into(),
                temp.path().join("chroot"),
                temp.path().join("uploads"),
                temp.path().join("kits"),
                temp.path().join("bin"),
                limit,
            )
            .unwrap();
            let app = router(AppState::new(&cfg).unwrap());
            Self { temp, app }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.temp.path().join(relative)
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            (status, body.to_vec())
        }

        async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
            self.send(Request::get(uri).body(Body::empty()).unwrap())
                .await
        }
    }

    /// Builds a multipart body with one file part per `(field name, content)` pair.
    fn multipart(uri: &str, parts: &[(&str, &[u8])]) -> Request<Body> {
        let mut body = Vec::new();
        for (name, content) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"part\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let fixture = Fixture::new();

        let (status, body) = fixture.get("/health").await;

        assert_eq!(status, StatusCode::OK);
        let health: HealthRes = serde_json::from_slice(&body).unwrap();
        assert!(health.ok);
    }

    #[tokio::test]
    async fn test_chroot_upload_concatenates_repeated_fields() {
        let fixture = Fixture::new();

        let (status, body) = fixture
            .send(multipart(
                "/chroot",
                &[
                    ("tools/x.txt", b"ab"),
                    ("readme", b"hello"),
                    ("tools/x.txt", b"cd"),
                    ("tools/x.txt", b"ef"),
                ],
            ))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Received file(s) successfully.");
        assert_eq!(fs::read(fixture.path("chroot/tools/x.txt")).unwrap(), b"abcdef");
        assert_eq!(fs::read(fixture.path("chroot/readme")).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_chroot_upload_rejects_escape_without_writing() {
        let fixture = Fixture::new();

        let (status, _) = fixture
            .send(multipart(
                "/chroot",
                &[("ok.txt", b"fine"), ("../../etc/passwd", b"root::0:0")],
            ))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!fixture.path("chroot/ok.txt").exists());
        assert!(!fixture.path("etc").exists());
    }

    #[tokio::test]
    async fn test_flat_upload() {
        let fixture = Fixture::new();

        let (status, body) = fixture
            .send(multipart("/upload", &[("docs/notes.txt", b"notes")]))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"Received file successfully.");
        assert_eq!(
            fs::read(fixture.path("uploads/docs_notes.txt")).unwrap(),
            b"notes"
        );
    }

    #[tokio::test]
    async fn test_upload_rejects_malformed_body_and_wrong_method() {
        let fixture = Fixture::new();

        let request = Request::post("/chroot")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("not multipart"))
            .unwrap();
        let (status, _) = fixture.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = fixture.get("/chroot").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_refused() {
        let fixture = Fixture::with_limit(64);

        let (status, _) = fixture
            .send(multipart("/chroot", &[("big.bin", &[0u8; 1024])]))
            .await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert!(!fixture.path("chroot/big.bin").exists());
    }

    #[tokio::test]
    async fn test_export_kit_streams_zip() {
        let fixture = Fixture::new();
        let bin = fixture.path("kits/linux/bin");
        fs::create_dir_all(bin.join("lib")).unwrap();
        fs::write(bin.join("tool"), b"tool binary").unwrap();
        fs::write(bin.join("lib/helper"), b"helper").unwrap();
        fs::write(bin.join("empty"), b"").unwrap();

        let response = fixture
            .app
            .clone()
            .oneshot(Request::get("/kit/linux").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            response.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"linux.zip\""
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let zip = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
        let names: Vec<String> = zip
            .file_names()
            .map(|name| name.unwrap().into_owned())
            .collect();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"tool"));
        assert!(names.contains(&"lib/helper"));
    }

    #[tokio::test]
    async fn test_export_status_codes() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.path("kits/nobin")).unwrap();

        assert_eq!(fixture.get("/kit/missing").await.0, StatusCode::NOT_FOUND);
        assert_eq!(fixture.get("/kit/nobin").await.0, StatusCode::NOT_FOUND);
        assert_eq!(fixture.get("/kit/..").await.0, StatusCode::BAD_REQUEST);
        assert_eq!(fixture.get("/kit").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_upload_larger_than_spool_threshold() {
        let fixture = Fixture::with_limit(8 * SPOOL_THRESHOLD);
        let content: Vec<u8> = (0..3 * SPOOL_THRESHOLD).map(|i| (i % 251) as u8).collect();

        let (status, _) = fixture
            .send(multipart("/chroot", &[("big.bin", &content[..]), ("big.bin", b"tail")]))
            .await;

        assert_eq!(status, StatusCode::OK);
        let written = fs::read(fixture.path("chroot/big.bin")).unwrap();
        assert_eq!(written.len(), content.len() + 4);
        assert_eq!(&written[..content.len()], &content[..]);
        assert_eq!(&written[content.len()..], b"tail");
    }

    #[tokio::test]
    async fn test_export_of_bin_file_is_not_found() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.path("kits/filebin")).unwrap();
        fs::write(fixture.path("kits/filebin/bin"), b"not a directory").unwrap();

        assert_eq!(fixture.get("/kit/filebin").await.0, StatusCode::NOT_FOUND);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_export_with_dangling_entry_is_internal_error() {
        let fixture = Fixture::new();
        let bin = fixture.path("kits/linux/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("tool"), b"tool").unwrap();
        std::os::unix::fs::symlink("nowhere", bin.join("broken")).unwrap();

        let (status, body) = fixture.get("/kits").await;
        assert_eq!(status, StatusCode::OK);
        let res: ListKitsRes = serde_json::from_slice(&body).unwrap();
        assert_eq!(res.kits, vec!["linux"]);

        assert_eq!(
            fixture.get("/kit/linux").await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_export_default_kit() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.path("kits/bin")).unwrap();
        fs::write(fixture.path("kits/bin/common"), b"shared").unwrap();

        let (status, body) = fixture.get("/kit").await;

        assert_eq!(status, StatusCode::OK);
        let mut zip = zip::ZipArchive::new(Cursor::new(body)).unwrap();
        assert_eq!(zip.by_index(0).unwrap().name().unwrap(), "common");
    }

    #[tokio::test]
    async fn test_list_kits() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.path("kits/windows/bin")).unwrap();
        fs::create_dir_all(fixture.path("kits/linux/bin")).unwrap();
        fs::create_dir_all(fixture.path("kits/docs")).unwrap();

        let (status, body) = fixture.get("/kits").await;

        assert_eq!(status, StatusCode::OK);
        let res: ListKitsRes = serde_json::from_slice(&body).unwrap();
        assert_eq!(res.kits, vec!["linux", "windows"]);
    }

    #[tokio::test]
    async fn test_static_bin_files() {
        let fixture = Fixture::new();
        fs::create_dir_all(fixture.path("bin")).unwrap();
        fs::write(fixture.path("bin/install.sh"), b"#!/bin/sh\n").unwrap();

        let (status, body) = fixture.get("/bin/install.sh").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"#!/bin/sh\n");
        assert_eq!(fixture.get("/bin/missing").await.0, StatusCode::NOT_FOUND);
    }
}
