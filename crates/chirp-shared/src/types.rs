use serde::{Deserialize, Serialize};

/// State of the real-time connection to the chat server.
///
/// Only the transport connector writes this value; everything else observes it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ConnectionState {
    Connected,
    Connecting,
    #[default]
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connected => "connected",
            Self::Connecting => "connecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// The signed-in user as known to the session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    pub has_verified_email: bool,
    pub profile_picture_url: Option<String>,
}

/// Credentials and profile of the current session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

impl AuthInfo {
    /// Copy of this session with the user's picture replaced.
    pub fn with_profile_picture(&self, url: Option<String>) -> Self {
        let mut info = self.clone();
        info.user.profile_picture_url = url;
        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_info_uses_camel_case() {
        let json = r#"{
            "accessToken": "a",
            "refreshToken": "r",
            "user": {
                "id": "u1",
                "email": "u1@example.com",
                "username": "u1",
                "hasVerifiedEmail": true,
                "profilePictureUrl": null
            }
        }"#;
        let info: AuthInfo = serde_json::from_str(json).unwrap();
        assert!(info.user.has_verified_email);

        let updated = info.with_profile_picture(Some("https://cdn/u1.png".into()));
        assert_eq!(updated.user.profile_picture_url.as_deref(), Some("https://cdn/u1.png"));
        assert_eq!(updated.access_token, info.access_token);
    }
}
