//! Operator-facing HTTP endpoint for replacing a stuck sweep.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bitcoin::Amount;
use serde::{Deserialize, Serialize};
use sweep_sdk::rbf::RbfHandler;
use sweep_sdk::SweepSdkError;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Field names match the bridge operator tooling that drives this endpoint.
#[derive(Debug, Deserialize)]
pub struct ReplaceRequest {
    #[serde(rename = "Txhex")]
    pub tx_hex: String,
    /// Target total fee in sats for the replacement.
    #[serde(rename = "Amount")]
    pub amount: u64,
}

#[derive(Debug, Serialize)]
pub struct ReplaceResponse {
    pub txid: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn spawn(listen_addr: SocketAddr, handler: RbfHandler, join_set: &mut JoinSet<eyre::Result<()>>) {
    join_set.spawn(async move {
        let app = Router::new()
            .route("/rbf", post(replace))
            .with_state(handler);
        let listener = tokio::net::TcpListener::bind(listen_addr).await?;
        info!(%listen_addr, "replacement endpoint listening");
        axum::serve(listener, app).await?;
        Ok(())
    });
}

async fn replace(
    State(handler): State<RbfHandler>,
    Json(request): Json<ReplaceRequest>,
) -> Result<Json<ReplaceResponse>, (StatusCode, Json<ErrorResponse>)> {
    let target_fee = Amount::from_sat(request.amount);
    match handler.replace(&request.tx_hex, target_fee).await {
        Ok(txid) => Ok(Json(ReplaceResponse {
            txid: txid.to_string(),
        })),
        Err(e) => {
            warn!(error = %e, "replacement request failed");
            let status = match e {
                SweepSdkError::Decode(_) | SweepSdkError::NotReplaceable => {
                    StatusCode::BAD_REQUEST
                }
                SweepSdkError::InsufficientFunds { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            Err((
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            ))
        }
    }
}
