use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Protocol name registered with the host for every account.
pub const DEFAULT_PROTOCOL: &str = "whatsapp";

/// One account the host asks the bridge to log into.
///
/// The protocol pairs devices out of band (QR code on the console), so no
/// password is carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub username: String,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Where the protocol library keeps its pairing keys between runs.
    #[serde(default)]
    pub session_dir: Option<PathBuf>,
}

impl AccountConfig {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            protocol: default_protocol(),
            session_dir: None,
        }
    }

    pub fn with_session_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session_dir = Some(dir.into());
        self
    }
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_defaults_when_omitted() {
        let account: AccountConfig = toml::from_str(r#"username = "alice""#).unwrap();
        assert_eq!(account.protocol, DEFAULT_PROTOCOL);
        assert!(account.session_dir.is_none());
    }

    #[test]
    fn session_dir_is_kept() {
        let account = AccountConfig::new("alice").with_session_dir("/var/lib/wabee/alice");
        assert_eq!(
            account.session_dir.as_deref(),
            Some(std::path::Path::new("/var/lib/wabee/alice"))
        );
        assert_eq!(account.protocol, DEFAULT_PROTOCOL);
    }
}
