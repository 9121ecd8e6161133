use std::sync::Arc;

use simgate_core::errors::GateError;
use simgate_core::ids::{ConnectionId, TicketId};
use tokio::sync::mpsc;

use crate::client::ConnectionRegistry;
use crate::tickets::TicketStore;

/// One-time plaintext acknowledgment sent to a freshly authenticated
/// connection.
pub const CONNECTION_ACK: &str = "Established websocket connection with server.";

/// Gate a new connection on ticket validity.
///
/// A valid ticket binds the connection into the registry under a fresh id.
/// An invalid (or absent) ticket is revoked on the spot so it cannot be
/// retried; the caller closes the transport.
pub fn authenticate(
    tickets: &TicketStore,
    registry: &ConnectionRegistry,
    presented: Option<TicketId>,
) -> Result<(ConnectionId, mpsc::Receiver<String>), GateError> {
    let ticket = match presented {
        Some(t) if !t.is_empty() => t,
        _ => {
            tracing::error!("Incoming connection carried no ticket, terminating");
            return Err(GateError::InvalidTicket(String::new()));
        }
    };

    if tickets.is_valid(&ticket) {
        let (conn_id, rx) = registry.register(ticket.clone());
        tracing::info!(conn_id = %conn_id, ticket = %ticket, "Connection authenticated");
        Ok((conn_id, rx))
    } else {
        tracing::error!(ticket = %ticket, "Invalid ticket from incoming connection, terminating");
        tickets.revoke(&ticket);
        Err(GateError::InvalidTicket(ticket.as_str().to_owned()))
    }
}

/// Terminal rejection of an already-registered connection: revoke the
/// ticket when one is known, purge the registry entry (which forces the
/// transport closed), and log why.
pub fn reject(
    tickets: &Arc<TicketStore>,
    registry: &Arc<ConnectionRegistry>,
    conn_id: &ConnectionId,
    ticket: Option<&TicketId>,
    reason: &GateError,
) {
    tracing::error!(conn_id = %conn_id, kind = reason.kind(), %reason, "Rejecting connection");
    if let Some(t) = ticket {
        tickets.revoke(t);
    }
    registry.remove(conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ticket_registers_connection() {
        let tickets = TicketStore::new(10);
        let registry = ConnectionRegistry::new(32);
        let t = tickets.issue();

        let (conn_id, _rx) = authenticate(&tickets, &registry, Some(t.clone())).unwrap();
        assert!(registry.contains(&conn_id));
        // Successful use never consumes the ticket.
        assert!(tickets.is_valid(&t));
    }

    #[test]
    fn unknown_ticket_is_rejected_without_registration() {
        let tickets = TicketStore::new(10);
        let registry = ConnectionRegistry::new(32);
        let bogus = TicketId::from_raw("1700000000000-bogus");

        let err = authenticate(&tickets, &registry, Some(bogus)).unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn expired_ticket_is_revoked_on_presentation() {
        let tickets = TicketStore::new(10);
        let registry = ConnectionRegistry::new(32);
        let t = tickets.issue();
        tickets.set_expiration(&t, chrono::Utc::now() - chrono::Duration::seconds(1));

        assert!(authenticate(&tickets, &registry, Some(t.clone())).is_err());
        // Revoked, not merely expired: a later clock rollback cannot revive it.
        assert_eq!(tickets.count(), 0);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn missing_ticket_is_treated_as_invalid() {
        let tickets = TicketStore::new(10);
        let registry = ConnectionRegistry::new(32);
        assert!(authenticate(&tickets, &registry, None).is_err());
        assert!(authenticate(&tickets, &registry, Some(TicketId::from_raw(""))).is_err());
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn reject_revokes_and_purges() {
        let tickets = Arc::new(TicketStore::new(10));
        let registry = Arc::new(ConnectionRegistry::new(32));
        let t = tickets.issue();
        let (conn_id, _rx) = registry.register(t.clone());

        reject(
            &tickets,
            &registry,
            &conn_id,
            Some(&t),
            &GateError::InvalidTicket(t.as_str().to_owned()),
        );

        assert!(!tickets.is_valid(&t));
        assert!(!registry.contains(&conn_id));
    }

    #[tokio::test]
    async fn reject_without_ticket_still_purges() {
        let tickets = Arc::new(TicketStore::new(10));
        let registry = Arc::new(ConnectionRegistry::new(32));
        let (conn_id, _rx) = registry.register(TicketId::new());

        reject(
            &tickets,
            &registry,
            &conn_id,
            None,
            &GateError::UnregisteredConnection(conn_id.as_str().to_owned()),
        );
        assert!(!registry.contains(&conn_id));
    }
}
