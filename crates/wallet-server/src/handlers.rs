//! HTTP request handlers.

use std::sync::Arc;

use ark_std::UniformRand;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use shielded_primitives::{
    fr_to_decimal, Asset, AssetType, Fr, IncludedNoteWithNullifier, MerkleIndex, MerkleProof,
    StealthAddress, TreeError,
};
use shielded_wallet::{AdapterError, EncryptedStateDiff, NoteStoreError, SyncCursor, SyncError};
use thiserror::Error;

use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AdapterError> for ApiError {
    fn from(e: AdapterError) -> Self {
        match e {
            AdapterError::Malformed(_) => ApiError::BadRequest(e.to_string()),
            AdapterError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<NoteStoreError> for ApiError {
    fn from(e: NoteStoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<TreeError> for ApiError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::PrunedOrAbsent(_) => ApiError::NotFound(e.to_string()),
            _ => ApiError::Internal(e.to_string()),
        }
    }
}

// ============ Chain feed ============

#[derive(Serialize)]
pub struct PushResponse {
    pub queued: usize,
    pub head: Option<SyncCursor>,
}

pub async fn push_diff(
    State(state): State<Arc<AppState>>,
    Json(diff): Json<EncryptedStateDiff>,
) -> Result<(StatusCode, Json<PushResponse>), ApiError> {
    state.feed.push(diff).await?;

    let response = PushResponse {
        queued: state.feed.len().await,
        head: state.feed.head().await,
    };
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Serialize)]
pub struct SyncStatusResponse {
    pub cursor: SyncCursor,
    pub feed_head: Option<SyncCursor>,
    pub tree_count: u64,
    pub tracked: usize,
    pub root: String,
}

pub async fn sync_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let cursor = state.syncer.note_store().cursor().await?;
    let feed_head = state.feed.head().await;

    let (tree_count, tracked, root) = {
        let tree = state.syncer.read_tree()?;
        (
            tree.count(),
            tree.tracked_indices().count(),
            fr_to_decimal(&tree.root()),
        )
    };

    Ok(Json(SyncStatusResponse {
        cursor,
        feed_head,
        tree_count,
        tracked,
        root,
    }))
}

// ============ Wallet views ============

#[derive(Serialize)]
pub struct BalanceEntry {
    pub asset: Asset,
    /// Decimal string; balances can exceed the range of a JSON number.
    pub balance: String,
}

pub async fn balances(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BalanceEntry>>, ApiError> {
    let balances = state.syncer.note_store().get_all_balances().await?;

    Ok(Json(
        balances
            .into_iter()
            .map(|(asset, balance)| BalanceEntry {
                asset,
                balance: balance.to_string(),
            })
            .collect(),
    ))
}

/// Optional asset filter for `/api/notes`.
#[derive(Debug, Deserialize)]
pub struct NotesQuery {
    pub asset_type: Option<u8>,
    pub asset_addr: Option<String>,
    pub id: Option<String>,
}

impl NotesQuery {
    fn asset(&self) -> Result<Option<Asset>, ApiError> {
        let Some(addr) = &self.asset_addr else {
            return Ok(None);
        };

        let asset_type = AssetType::try_from(self.asset_type.unwrap_or(0))
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        let id = match &self.id {
            Some(id) => id
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("Invalid asset id: {id:?}")))?,
            None => Default::default(),
        };

        Asset::new(asset_type, addr, id)
            .map(Some)
            .map_err(|e| ApiError::BadRequest(e.to_string()))
    }
}

#[derive(Serialize)]
pub struct AssetNotes {
    pub asset: Asset,
    pub notes: Vec<IncludedNoteWithNullifier>,
}

pub async fn notes(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NotesQuery>,
) -> Result<Json<Vec<AssetNotes>>, ApiError> {
    let store = state.syncer.note_store();

    let grouped = match query.asset()? {
        Some(asset) => {
            let notes = store.get_notes_for_asset(&asset).await?;
            vec![AssetNotes { asset, notes }]
        }
        None => store
            .get_all_notes()
            .await?
            .into_iter()
            .map(|(asset, notes)| AssetNotes { asset, notes })
            .collect(),
    };
    Ok(Json(grouped))
}

pub async fn proof(
    State(state): State<Arc<AppState>>,
    Path(index): Path<MerkleIndex>,
) -> Result<Json<MerkleProof>, ApiError> {
    let tree = state.syncer.read_tree()?;
    Ok(Json(tree.get_proof(index)?))
}

// ============ Utility ============

pub async fn generate_address(State(state): State<Arc<AppState>>) -> Json<StealthAddress> {
    let mut rng = rand::thread_rng();
    let r = Fr::rand(&mut rng);
    Json(state.viewer.generate_address(r))
}
