//! HTTP upgrade endpoint: token extraction, authentication and remote
//! address resolution.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::{Extensions, HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use tracing::{debug, warn};

use super::session::{reject_socket, run_ws_session};
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::registry::UpgradeInfo;
use crate::server::AppState;

/// GET on the WebSocket path.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    extensions: Extensions,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "not_websocket").increment(1);
            debug!(%rejection, "upgrade rejected");
            return rejection.into_response();
        }
    };

    let registry = state.registry;
    if registry.is_shutting_down() {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "shutting_down").increment(1);
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let config = registry.config();
    let socket_addr = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let remote_addr = determine_remote_addr(&headers, &config.real_ip_header, socket_addr);
    let token = extract_token(&params, &headers, &config.token_query_param);

    let identity = match registry.authenticate(token.as_deref()) {
        Ok(identity) => Some(identity),
        Err(e) if config.allow_anonymous => {
            debug!(%remote_addr, error = %e, "accepting anonymous connection");
            None
        }
        Err(e) => {
            counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => "unauthorized").increment(1);
            warn!(%remote_addr, error = %e, "rejecting unauthenticated upgrade");
            let reason = e.to_string();
            return upgrade
                .max_message_size(config.read_limit)
                .on_upgrade(move |socket| async move { reject_socket(socket, &reason).await });
        }
    };

    let info = UpgradeInfo {
        remote_addr,
        identity,
    };
    upgrade
        .max_message_size(config.read_limit)
        .on_upgrade(move |socket| run_ws_session(socket, registry, info))
}

/// Remote address of a request.
///
/// When `header_name` is set and the header parses as an IP address, it
/// wins over the socket peer address. Unparseable values are ignored.
pub fn determine_remote_addr(
    headers: &HeaderMap,
    header_name: &str,
    socket_addr: Option<SocketAddr>,
) -> IpAddr {
    let fallback = socket_addr.map_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED), |addr| addr.ip());
    if header_name.is_empty() {
        return fallback;
    }
    let Some(value) = headers.get(header_name) else {
        return fallback;
    };
    match value.to_str().ok().and_then(|v| v.trim().parse().ok()) {
        Some(ip) => ip,
        None => {
            warn!(header = header_name, ?value, "ignoring unparseable real-ip header");
            fallback
        }
    }
}

/// Token from the `param` query parameter, else an `Authorization: Bearer`
/// header.
pub fn extract_token(
    params: &HashMap<String, String>,
    headers: &HeaderMap,
    param: &str,
) -> Option<String> {
    if let Some(token) = params.get(param).filter(|t| !t.is_empty()) {
        return Some(token.clone());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}
