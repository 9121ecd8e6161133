use simgate_core::errors::GateError;
use simgate_core::events::SubscribeRequest;
use simgate_core::ids::{ConnectionId, TicketId};

use crate::client::ConnectionRegistry;
use crate::tickets::TicketStore;

/// Plaintext notice sent when an inbound frame fails the shape check.
pub const FORMAT_NOTICE: &str = "Websocket message must be sent in a valid JSON format.";

/// Validated message plus the ticket that authorized it.
#[derive(Debug)]
pub struct ValidMessage {
    pub request: SubscribeRequest,
    pub ticket: TicketId,
}

/// Run the inbound message checks in order: shape, registration,
/// expiration. Checks are ordered cheapest first so malformed traffic
/// never touches the clock.
///
/// A passing message slides the ticket's expiration forward as a side
/// effect. A terminal error means the caller must run the rejection path.
pub async fn validate(
    registry: &ConnectionRegistry,
    tickets: &TicketStore,
    conn_id: &ConnectionId,
    raw: &str,
) -> Result<ValidMessage, GateError> {
    // 1. Shape: both `EventsType` and `Subscribe` must be present and typed.
    let request: SubscribeRequest = serde_json::from_str(raw)
        .map_err(|e| GateError::MalformedMessage(e.to_string()))?;

    // 2. Registration: the sender must still be in the registry with a
    //    non-empty bound ticket.
    let ticket = match registry.ticket_for(conn_id).await {
        Some(t) if !t.is_empty() => t,
        _ => return Err(GateError::UnregisteredConnection(conn_id.as_str().to_owned())),
    };

    // 3. Expiration: valid tickets are renewed, expired ones are terminal.
    if tickets.is_valid(&ticket) {
        tickets.extend(&ticket);
        Ok(ValidMessage { request, ticket })
    } else {
        Err(GateError::InvalidTicket(ticket.as_str().to_owned()))
    }
}
