//! Instance-to-instance notification.
//!
//! Each instance exposes a small HTTP surface for its peers: the match
//! notification that starts a local half-match, and a stock endpoint that
//! lets a peer draw a pack from the global supply on this instance's behalf.
//! The outbound half is a plain request/response call addressed by peer
//! server id; failures are reported to the orchestrator, never retried.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::duel::DuelService;
use crate::error::CoreError;
use crate::stock::{PackIssue, StockService};
use crate::types::{Card, MatchNotification};

/// Point-to-point "start your half of this match" call.
#[async_trait]
pub trait PeerNotifier: Send + Sync {
    async fn notify_match(
        &self,
        remote_server_id: &str,
        req: &MatchNotification,
    ) -> Result<(), CoreError>;
}

/// HTTP-based notifier; peers are addressed as `http://{server_id}:{port}`.
pub struct HttpPeerNotifier {
    http: reqwest::Client,
    peer_port: u16,
}

impl HttpPeerNotifier {
    pub fn new(peer_port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            peer_port,
        }
    }
}

#[async_trait]
impl PeerNotifier for HttpPeerNotifier {
    async fn notify_match(
        &self,
        remote_server_id: &str,
        req: &MatchNotification,
    ) -> Result<(), CoreError> {
        let url = format!(
            "http://{}:{}/api/v1/match/notify",
            remote_server_id, self.peer_port
        );
        let response = self
            .http
            .post(&url)
            .json(req)
            .send()
            .await
            .map_err(|err| CoreError::PeerUnreachable {
                server_id: remote_server_id.to_string(),
                reason: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(CoreError::PeerUnreachable {
                server_id: remote_server_id.to_string(),
                reason: format!("status {}", response.status()),
            });
        }
        Ok(())
    }
}

/// Shared state of the peer-facing HTTP surface.
pub struct RestState {
    pub duels: Arc<DuelService>,
    pub stock: Arc<StockService>,
    pub server_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TakePackRequest {
    pub player_name: String,
}

#[derive(Debug, Serialize)]
pub struct TakePackResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pack: Option<Vec<Card>>,
}

/// Builds the `/api/v1` router served on the instance's secondary address.
pub fn rest_router(state: Arc<RestState>) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .route("/match/notify", post(handle_match_notification))
                .route("/stock/take", post(handle_take_pack)),
        )
        .with_state(state)
}

/// A 2xx response tells the orchestrator this instance has begun its local
/// half-match; anything else is a failure signal.
async fn handle_match_notification(
    State(state): State<Arc<RestState>>,
    Json(req): Json<MatchNotification>,
) -> (StatusCode, Json<serde_json::Value>) {
    info!(
        server_id = %state.server_id,
        p1 = %req.player1_name,
        p2 = %req.player2_name,
        "match notification received"
    );

    match state.duels.clone().start_half_match(&req).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "success": true }))),
        Err(CoreError::Invariant(message)) | Err(CoreError::User(message)) => {
            warn!(%message, "match notification refused");
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "success": false, "message": message })),
            )
        }
        Err(err) => {
            error!(%err, "match notification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "success": false, "message": err.to_string() })),
            )
        }
    }
}

async fn handle_take_pack(
    State(state): State<Arc<RestState>>,
    Json(req): Json<TakePackRequest>,
) -> (StatusCode, Json<TakePackResponse>) {
    match state.stock.issue_pack(&req.player_name).await {
        Ok(PackIssue::Pack(pack)) => (
            StatusCode::OK,
            Json(TakePackResponse {
                success: true,
                message: "Pacote de cartas retirado com sucesso.".to_string(),
                pack: Some(pack),
            }),
        ),
        Ok(PackIssue::Insufficient) => (
            StatusCode::CONFLICT,
            Json(TakePackResponse {
                success: false,
                message: "não há pacotes de cartas suficientes no estoque global"
                    .to_string(),
                pack: None,
            }),
        ),
        Err(err) => {
            error!(player = %req.player_name, %err, "stock take failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(TakePackResponse {
                    success: false,
                    message: "erro interno ao processar o estoque".to_string(),
                    pack: None,
                }),
            )
        }
    }
}
