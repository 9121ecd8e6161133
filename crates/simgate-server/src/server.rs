use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use simgate_core::errors::GateError;
use simgate_core::events::GatewayEvent;
use simgate_core::ids::{ConnectionId, TicketId};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;

use crate::auth;
use crate::client::{self, ConnectionRegistry};
use crate::config::ServerConfig;
use crate::fanout;
use crate::subscribe;
use crate::tickets::TicketStore;
use crate::validate;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub tickets: Arc<TicketStore>,
    pub registry: Arc<ConnectionRegistry>,
    pub message_tx: mpsc::Sender<(ConnectionId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/tickets", post(issue_ticket_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    event_tx: broadcast::Sender<GatewayEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let tickets = Arc::new(TicketStore::new(config.ticket_lifetime_minutes));
    let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));

    // Start event fanout
    let fanout_rx = event_tx.subscribe();
    let fanout_handle = fanout::create_fanout(Arc::clone(&registry), fanout_rx);

    // Start dead-connection cleanup task (every 60s)
    let _cleanup = client::start_cleanup_task(
        Arc::clone(&registry),
        std::time::Duration::from_secs(60),
    );

    // Message processing channel
    let (msg_tx, msg_rx) = mpsc::channel::<(ConnectionId, String)>(1024);

    let app_state = AppState {
        tickets: Arc::clone(&tickets),
        registry: Arc::clone(&registry),
        message_tx: msg_tx,
    };

    // Start the single message processor: all registry and ticket mutation
    // triggered by inbound traffic happens on this one task.
    let proc_tickets = Arc::clone(&tickets);
    let proc_registry = Arc::clone(&registry);
    let processor_handle = tokio::spawn(process_messages(msg_rx, proc_tickets, proc_registry));

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "Simgate server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        tickets,
        registry,
        _server: server_handle,
        _fanout: fanout_handle,
        _processor: processor_handle,
        _cleanup,
    })
}

/// Handle returned by `start()` — keeps background tasks alive and gives
/// the embedding process access to the stores (e.g. to revoke a ticket).
pub struct ServerHandle {
    pub port: u16,
    pub tickets: Arc<TicketStore>,
    pub registry: Arc<ConnectionRegistry>,
    _server: tokio::task::JoinHandle<()>,
    _fanout: tokio::task::JoinHandle<()>,
    _processor: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket handshake parameters.
#[derive(Debug, Deserialize)]
struct WsParams {
    #[serde(rename = "ticketId")]
    ticket_id: Option<String>,
}

/// WebSocket upgrade handler. The ticket travels as a query parameter.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let ticket = params.ticket_id.map(TicketId::from_raw);
    ws.on_upgrade(move |socket| handle_socket(socket, state, ticket))
}

/// Gate a new WebSocket connection on its ticket, then run its pumps.
async fn handle_socket(mut socket: WebSocket, state: AppState, ticket: Option<TicketId>) {
    match auth::authenticate(&state.tickets, &state.registry, ticket) {
        Ok((conn_id, rx)) => {
            // Queued ahead of any event traffic; the writer drains it first.
            state
                .registry
                .send_to(&conn_id, auth::CONNECTION_ACK.to_string())
                .await;
            client::handle_ws_connection(
                socket,
                conn_id,
                rx,
                Arc::clone(&state.registry),
                state.message_tx.clone(),
            )
            .await;
        }
        Err(_) => {
            // Rejection was logged and the ticket revoked; close the transport.
            let _ = socket.send(WsMessage::Close(None)).await;
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TicketResponse {
    ticket: TicketId,
}

/// Ticket issuance endpoint, consumed by out-of-band HTTP callers before
/// they open a WebSocket.
async fn issue_ticket_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ticket = state.tickets.issue();
    axum::Json(TicketResponse { ticket })
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "connections": state.registry.count(),
        "tickets": state.tickets.count(),
    }))
}

/// Process inbound WebSocket messages from all connections on one task.
async fn process_messages(
    mut rx: mpsc::Receiver<(ConnectionId, String)>,
    tickets: Arc<TicketStore>,
    registry: Arc<ConnectionRegistry>,
) {
    while let Some((conn_id, raw)) = rx.recv().await {
        dispatch_message(&tickets, &registry, &conn_id, &raw).await;
    }
}

/// Run one inbound message through the validation pipeline and, when it
/// passes, the subscription toggle. Every error is resolved here: a reply
/// to the sender, or the terminal rejection path.
pub(crate) async fn dispatch_message(
    tickets: &Arc<TicketStore>,
    registry: &Arc<ConnectionRegistry>,
    conn_id: &ConnectionId,
    raw: &str,
) {
    match validate::validate(registry, tickets, conn_id, raw).await {
        Ok(valid) => {
            tracing::info!(conn_id = %conn_id, msg = raw, "Incoming message");
            match subscribe::apply(registry, conn_id, &valid.request).await {
                Ok(notice) => {
                    registry.send_to(conn_id, notice).await;
                }
                Err(GateError::UnknownCategory(events_type)) => {
                    registry
                        .send_to(conn_id, subscribe::unknown_category_notice(&events_type))
                        .await;
                }
                Err(err) => {
                    auth::reject(tickets, registry, conn_id, Some(&valid.ticket), &err);
                }
            }
        }
        Err(err @ GateError::MalformedMessage(_)) => {
            tracing::error!(conn_id = %conn_id, kind = err.kind(), "Message failed shape check");
            registry.send_to(conn_id, validate::FORMAT_NOTICE.to_string()).await;
        }
        Err(err) => {
            let ticket = match &err {
                GateError::InvalidTicket(t) if !t.is_empty() => Some(TicketId::from_raw(t.clone())),
                _ => None,
            };
            auth::reject(tickets, registry, conn_id, ticket.as_ref(), &err);
        }
    }
}
