// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! http-01 solver
//!
//! Serves key authorizations over plain HTTP at the well-known challenge
//! path. The responder is started lazily on the first `present` call and
//! keeps running for the lifetime of the process, so renewals re-use it.

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::info;

use crate::domain::challenge::{ChallengeError, ChallengeKind, ChallengeSolver};

type TokenMap = Arc<RwLock<HashMap<String, String>>>;

pub struct HttpSolver {
    port: u16,
    tokens: TokenMap,
    responder: OnceCell<SocketAddr>,
}

impl HttpSolver {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            tokens: Arc::new(RwLock::new(HashMap::new())),
            responder: OnceCell::new(),
        }
    }

    /// Address the responder is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.responder.get().copied()
    }

    async fn ensure_responder(&self) -> Result<SocketAddr, ChallengeError> {
        let addr = self
            .responder
            .get_or_try_init(|| async {
                let app = Router::new()
                    .route("/.well-known/acme-challenge/{token}", get(serve_token))
                    .with_state(self.tokens.clone());
                let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port))
                    .await
                    .map_err(|err| {
                        ChallengeError::Api(format!(
                            "cannot bind http-01 responder on port {}: {err}",
                            self.port
                        ))
                    })?;
                let addr = listener.local_addr().map_err(|err| {
                    ChallengeError::Api(format!("http-01 responder address unavailable: {err}"))
                })?;
                info!(addr = %addr, "http-01 challenge responder listening");
                tokio::spawn(async move {
                    let _ = axum::serve(listener, app).await;
                });
                Ok::<SocketAddr, ChallengeError>(addr)
            })
            .await?;
        Ok(*addr)
    }
}

async fn serve_token(Path(token): Path<String>, State(tokens): State<TokenMap>) -> Response {
    match tokens.read().await.get(&token) {
        Some(key_auth) => key_auth.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[async_trait]
impl ChallengeSolver for HttpSolver {
    fn kind(&self) -> ChallengeKind {
        ChallengeKind::Http01
    }

    async fn present(&self, _domain: &str, token: &str, proof: &str) -> Result<(), ChallengeError> {
        self.ensure_responder().await?;
        self.tokens
            .write()
            .await
            .insert(token.to_string(), proof.to_string());
        Ok(())
    }

    async fn cleanup(&self, _domain: &str, token: &str) -> Result<(), ChallengeError> {
        self.tokens.write().await.remove(token);
        Ok(())
    }
}
