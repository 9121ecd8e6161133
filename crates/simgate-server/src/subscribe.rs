use simgate_core::errors::GateError;
use simgate_core::events::{EventCategory, SubscribeRequest};
use simgate_core::ids::ConnectionId;

use crate::client::{ConnectionRegistry, ToggleOutcome};

/// Apply a validated subscription request to the connection's subscription
/// set and return the plaintext notice to send back.
///
/// The toggle is idempotent: repeated identical requests change nothing
/// and say so in the reply.
pub async fn apply(
    registry: &ConnectionRegistry,
    conn_id: &ConnectionId,
    request: &SubscribeRequest,
) -> Result<String, GateError> {
    let category: EventCategory = request
        .events_type
        .parse()
        .map_err(|_| GateError::UnknownCategory(request.events_type.clone()))?;

    let outcome = registry
        .toggle(conn_id, category, request.subscribe)
        .await
        .ok_or_else(|| GateError::UnregisteredConnection(conn_id.as_str().to_owned()))?;

    let notice = match outcome {
        ToggleOutcome::Subscribed => {
            tracing::info!(conn_id = %conn_id, category = %category, "Subscribing");
            format!("Subscribed to {category}")
        }
        ToggleOutcome::Unsubscribed => {
            tracing::info!(conn_id = %conn_id, category = %category, "Unsubscribing");
            format!("Unsubscribed from {category}")
        }
        ToggleOutcome::AlreadySubscribed => format!("Already subscribed to {category}"),
        ToggleOutcome::NotSubscribed => {
            format!("No change: you are not subscribed to {category}")
        }
    };
    Ok(notice)
}

/// Notice for a category outside the closed enumeration.
pub fn unknown_category_notice(events_type: &str) -> String {
    format!("No EventsType of type: {events_type}")
}
