use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(ConnectionId, "conn");

/// Authorization ticket id. Time-prefixed so ids sort in issuance order;
/// the uuid component keeps them globally unique.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(String);

impl TicketId {
    pub fn new() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        Self(format!("{}-{}", millis, Uuid::now_v7()))
    }

    pub fn from_raw(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TicketId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl AsRef<str> for TicketId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_id_has_prefix() {
        let id = ConnectionId::new();
        assert!(id.as_str().starts_with("conn_"), "got: {id}");
    }

    #[test]
    fn connection_ids_unique() {
        let a = ConnectionId::new();
        let b = ConnectionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ticket_id_is_time_prefixed() {
        let id = TicketId::new();
        let (prefix, rest) = id.as_str().split_once('-').expect("no dash");
        assert!(prefix.parse::<i64>().is_ok(), "prefix not millis: {prefix}");
        assert!(!rest.is_empty());
    }

    #[test]
    fn ticket_ids_sort_by_issuance() {
        let a = TicketId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = TicketId::new();
        assert!(a.as_str() < b.as_str());
    }

    #[test]
    fn ticket_id_from_raw_roundtrip() {
        let id = TicketId::from_raw("1700000000000-abc");
        assert_eq!(id.as_str(), "1700000000000-abc");
        assert!(!id.is_empty());
        assert!(TicketId::from_raw("").is_empty());
    }
}
