use serde::{Deserialize, Serialize};

/// The only token purpose this protocol accepts.
pub const PURPOSE_ATTENDANCE: &str = "attendance";

/// The identity payload a student's device encrypts into an envelope.
///
/// Ephemeral by design: never persisted, regenerated on every rotation tick.
/// `nonce` keeps two tokens minted in the same millisecond distinct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityToken {
    pub subject_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    /// Issue time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(rename = "type")]
    pub purpose: String,
    pub nonce: u64,
}

impl IdentityToken {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Structural sanity check applied after decryption.
    pub(crate) fn schema_ok(&self) -> bool {
        self.timestamp > 0
            && !self.first_name.trim().is_empty()
            && !self.last_name.trim().is_empty()
            && !self.email.trim().is_empty()
            && !self.purpose.is_empty()
    }
}
