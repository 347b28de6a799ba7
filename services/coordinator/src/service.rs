//! HTTP surface: dataset dispense, model upload and artifact listing.

use axum::{
    body::Body,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::{fs::File, io::AsyncReadExt};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::{info, instrument};

use crate::catalog::{DirCatalog, ShardCatalog};
use crate::dispenser::RoundRobinDispenser;
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::metrics::CoordinatorMetrics;
use crate::store::{ArtifactStore, PendingArtifact, StoredArtifact};

/// Multipart field carrying the trained model.
pub const MODEL_FIELD: &str = "model";
const READ_CHUNK: usize = 64 * 1024;

/// Shared by all handlers; the dispenser owns the only mutable cursor.
pub struct AppState<C = DirCatalog> {
    pub dispenser: Arc<RoundRobinDispenser<C>>,
    pub store: Arc<ArtifactStore>,
    pub metrics: CoordinatorMetrics,
}

impl<C> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self { dispenser: self.dispenser.clone(), store: self.store.clone(), metrics: self.metrics.clone() }
    }
}

impl<C: ShardCatalog> AppState<C> {
    pub fn new(catalog: C, store: ArtifactStore, metrics: CoordinatorMetrics) -> Self {
        Self {
            dispenser: Arc::new(RoundRobinDispenser::new(Arc::new(catalog))),
            store: Arc::new(store),
            metrics,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

pub fn create_router<C>(state: AppState<C>, public_dir: impl AsRef<Path>, max_upload_bytes: usize) -> Router
where
    C: ShardCatalog + 'static,
{
    Router::new()
        .route("/get-dataset", get(get_dataset::<C>))
        .route("/upload-model", post(upload_model::<C>))
        .route("/list-models", get(list_models::<C>))
        .with_state(state)
        // landing page and any other static assets
        .fallback_service(ServeDir::new(public_dir.as_ref()))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[instrument(skip(state))]
async fn get_dataset<C: ShardCatalog>(State(state): State<AppState<C>>) -> CoordinatorResult<Response> {
    let result = open_next_shard(&state).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(CoordinatorError::NoShardsAvailable) => "no_shards",
        Err(CoordinatorError::CatalogUnavailable(_)) => "catalog_unavailable",
        Err(_) => "unreadable",
    };
    state.metrics.dispense_total.with_label_values(&[outcome]).inc();
    let (shard, file, len) = result?;
    info!(%shard, bytes = len, "dataset dispensed");

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (header::CONTENT_DISPOSITION, attachment_header(&shard)),
            (header::CONTENT_LENGTH, HeaderValue::from(len)),
        ],
        Body::from_stream(file_stream(file)),
    )
        .into_response())
}

async fn open_next_shard<C: ShardCatalog>(state: &AppState<C>) -> CoordinatorResult<(String, File, u64)> {
    let shard = state.dispenser.next().await?;
    let path = state.dispenser.catalog().resolve(&shard);
    let opened = async {
        let file = File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok::<_, std::io::Error>((file, len))
    }
    .await;
    match opened {
        Ok((file, len)) => Ok((shard, file, len)),
        Err(source) => Err(CoordinatorError::ShardUnreadable { shard, source }),
    }
}

#[instrument(skip_all)]
async fn upload_model<C>(
    State(state): State<AppState<C>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> CoordinatorResult<Json<UploadResponse>> {
    let result = store_model_field(&state, multipart).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(CoordinatorError::NoFilePayload) => "no_file",
        Err(CoordinatorError::WriteFailure(_)) => "write_failure",
        Err(_) => "rejected",
    };
    state.metrics.uploads_total.with_label_values(&[outcome]).inc();
    let stored = result?;
    state.metrics.upload_bytes.observe(stored.bytes as f64);
    info!(filename = %stored.name, bytes = stored.bytes, "model uploaded");
    Ok(Json(UploadResponse { message: "Model uploaded successfully.".into(), filename: stored.name }))
}

/// Reads every field, then commits the single file field named [`MODEL_FIELD`].
///
/// Text fields are skipped. Any other file field, or a second model file, rejects
/// the whole request and nothing is stored.
async fn store_model_field<C>(
    state: &AppState<C>,
    multipart: Result<Multipart, MultipartRejection>,
) -> CoordinatorResult<StoredArtifact> {
    // a body that is not multipart carries no file
    let Ok(mut multipart) = multipart else {
        return Err(CoordinatorError::NoFilePayload);
    };
    let mut pending = None;
    let scanned = stage_model_field(&state.store, &mut multipart, &mut pending).await;
    match (scanned, pending) {
        (Ok(()), Some(pending)) => state.store.commit(pending).await,
        (Ok(()), None) => Err(CoordinatorError::NoFilePayload),
        (Err(e), Some(pending)) => {
            state.store.abort(pending).await;
            Err(e)
        }
        (Err(e), None) => Err(e),
    }
}

async fn stage_model_field(
    store: &ArtifactStore,
    multipart: &mut Multipart,
    pending: &mut Option<PendingArtifact>,
) -> CoordinatorResult<()> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CoordinatorError::MalformedUpload(e.body_text()))?
    {
        let Some(original) = field.file_name().map(str::to_owned) else {
            continue;
        };
        let name = field.name().unwrap_or_default().to_owned();
        if name != MODEL_FIELD || pending.is_some() {
            return Err(CoordinatorError::MalformedUpload(format!("unexpected file field `{name}`")));
        }
        *pending = Some(store.stage(&original, Box::pin(field)).await?);
    }
    Ok(())
}

#[instrument(skip(state))]
async fn list_models<C>(State(state): State<AppState<C>>) -> CoordinatorResult<Json<ModelsResponse>> {
    state.metrics.list_models_total.inc();
    let models = state.store.list().await?;
    Ok(Json(ModelsResponse { models }))
}

fn attachment_header(shard: &str) -> HeaderValue {
    let safe: String = shard
        .chars()
        .map(|c| if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' { c } else { '_' })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

fn file_stream(file: File) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    futures::stream::try_unfold(file, |mut file| async move {
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        let n = file.read_buf(&mut buf).await?;
        if n == 0 {
            Ok(None)
        } else {
            Ok(Some((buf.freeze(), file)))
        }
    })
}
