//! Axum middleware for admission control.
//!
//! Builds an [`AdmissionRequest`] from the incoming request (client IP, path,
//! method and the caller's [`Privilege`] if an upstream auth layer set one),
//! asks the [`AdmissionController`], and answers `429` on denial.

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use tracing::debug;

use crate::ratelimit::{
    client_identity, extract_client_ip, AdmissionController, AdmissionError, AdmissionRequest,
    NormalizedIp, Privilege,
};

/// Middleware gating every request through the admission controller.
///
/// # Usage
///
/// ```ignore
/// use axum::middleware::from_fn_with_state;
///
/// Router::new()
///     .route("/api/chat/messages", post(send_message))
///     .layer(from_fn_with_state(controller.clone(), admission_gate))
/// ```
///
/// # Behavior
///
/// - Identifies the caller by the peer address, or by forwarding headers when
///   `trust_proxy` is enabled.
/// - Stores `NormalizedIp` in request extensions for downstream handlers.
/// - Reads `Privilege` from request extensions; absent means guest.
/// - On denial returns `429 Too Many Requests` with a `Retry-After` header.
#[tracing::instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn admission_gate(
    State(controller): State<AdmissionController>,
    mut request: Request,
    next: Next,
) -> Result<Response, AdmissionError> {
    let trust_proxy = controller.config().trust_proxy;
    let connect_info = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .cloned();
    let client_ip = extract_client_ip(request.headers(), connect_info.as_ref(), trust_proxy);
    let identity = client_identity(client_ip);

    request
        .extensions_mut()
        .insert(NormalizedIp(identity.clone()));

    let mut admission =
        AdmissionRequest::new(identity, request.method().clone(), request.uri().path());
    if let Some(privilege) = request.extensions().get::<Privilege>() {
        admission = admission.with_privilege(*privilege);
    }

    let decision = controller.decide(&admission);
    if !decision.allow {
        let retry_after = decision.retry_after_secs.unwrap_or(1);
        debug!(
            identity = %admission.identity,
            retry_after,
            "Request rejected by admission control"
        );
        return Err(AdmissionError::RateLimited { retry_after });
    }

    Ok(next.run(request).await)
}
