/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
    /// Sliding ticket lifetime: applied at issuance and re-applied on every
    /// accepted message.
    pub ticket_lifetime_minutes: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9090,
            max_send_queue: 256,
            ticket_lifetime_minutes: 10,
        }
    }
}
