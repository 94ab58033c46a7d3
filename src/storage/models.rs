/// Signed-in identity (single row)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub identity: String,
    pub signed_in_at: i64,
}

/// Result of handing a draft to a backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Appended {
    /// Newly committed.
    Committed(crate::common::ChatMessage),
    /// A message with the same id was already committed.
    Existing(crate::common::ChatMessage),
}

impl Appended {
    pub fn message(&self) -> &crate::common::ChatMessage {
        match self {
            Appended::Committed(message) | Appended::Existing(message) => message,
        }
    }

    pub fn into_message(self) -> crate::common::ChatMessage {
        match self {
            Appended::Committed(message) | Appended::Existing(message) => message,
        }
    }
}
