use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

id_newtype!(UserId);
id_newtype!(RoomId);
id_newtype!(MessageId);
id_newtype!(LivestreamId);
id_newtype!(ProductId);
id_newtype!(VariantId);

/// Width of a locally synthesized identifier: unix wall-clock milliseconds.
const PROVISIONAL_ID_DIGITS: usize = 13;

impl MessageId {
    /// Synthesize a provisional identifier from the local wall clock. The
    /// store replaces it with a durable one once the message is persisted.
    pub fn provisional(now: chrono::DateTime<chrono::Utc>) -> Self {
        Self(format!("{:013}", now.timestamp_millis()))
    }

    /// Provisional ids are exactly 13 ASCII digits; durable ids issued by
    /// the store never take that shape.
    pub fn is_provisional(&self) -> bool {
        self.0.len() == PROVISIONAL_ID_DIGITS && self.0.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
