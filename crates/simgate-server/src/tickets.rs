use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use simgate_core::ids::TicketId;

/// Store of short-lived authorization tickets with sliding expiration.
///
/// Absence and expiry are both observable only through `is_valid`; no
/// operation here fails. Callers decide what an invalid ticket means.
pub struct TicketStore {
    tickets: DashMap<TicketId, DateTime<Utc>>,
    lifetime: Duration,
}

impl TicketStore {
    pub fn new(lifetime_minutes: i64) -> Self {
        Self {
            tickets: DashMap::new(),
            lifetime: Duration::minutes(lifetime_minutes),
        }
    }

    /// Mint a ticket valid for one lifetime from now.
    pub fn issue(&self) -> TicketId {
        let id = TicketId::new();
        self.tickets.insert(id.clone(), Utc::now() + self.lifetime);
        tracing::info!(ticket = %id, "Issued ticket");
        id
    }

    /// True iff the ticket exists and has not expired.
    pub fn is_valid(&self, id: &TicketId) -> bool {
        match self.tickets.get(id) {
            Some(expires_at) => Utc::now() <= *expires_at,
            None => false,
        }
    }

    /// Slide the expiration forward by one lifetime. No-op for unknown
    /// tickets; callers check `is_valid` first.
    pub fn extend(&self, id: &TicketId) {
        if let Some(mut expires_at) = self.tickets.get_mut(id) {
            *expires_at = Utc::now() + self.lifetime;
        }
    }

    /// Remove the ticket. Idempotent.
    pub fn revoke(&self, id: &TicketId) {
        if self.tickets.remove(id).is_some() {
            tracing::info!(ticket = %id, "Revoked ticket");
        }
    }

    /// Number of live (issued, unrevoked) tickets. Expired tickets still
    /// count until something revokes them.
    pub fn count(&self) -> usize {
        self.tickets.len()
    }

    #[cfg(test)]
    pub(crate) fn set_expiration(&self, id: &TicketId, expires_at: DateTime<Utc>) {
        self.tickets.insert(id.clone(), expires_at);
    }
}
