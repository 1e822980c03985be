use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// login.live.com device code (oauth20_connect) response
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub interval: u64,
    pub expires_in: u64,
}

/// Microsoft OAuth bearer credential
///
/// Lives only in memory and is wiped when dropped.
#[derive(Clone, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct AccessToken {
    pub token_type: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token_type", &self.token_type)
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

/// OAuth error body returned while the user has not approved the device yet
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

/// EC public key in JSON Web Key form, used as Xbox Live proof of possession
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofKey {
    pub crv: String,
    pub alg: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

/// Xbox Live device/authenticate request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAuthRequest {
    pub relying_party: String,
    pub token_type: String,
    pub properties: DeviceAuthProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAuthProperties {
    pub auth_method: String,
    pub id: String,
    pub device_type: String,
    pub version: String,
    pub proof_key: ProofKey,
}

/// Xbox Live device/authenticate response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceAuthResponse {
    pub token: String,
    #[serde(default)]
    pub not_after: Option<String>,
}

/// SISU authorize request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SisuAuthorizeRequest {
    pub access_token: String,
    pub app_id: String,
    #[serde(rename = "deviceToken")]
    pub device_token: String,
    pub sandbox: String,
    pub use_modern_gamertag: bool,
    pub site_name: String,
    pub relying_party: String,
    pub proof_key: ProofKey,
}

/// SISU authorize response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SisuAuthorizeResponse {
    pub authorization_token: AuthorizationToken,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthorizationToken {
    pub display_claims: XblDisplayClaims,
    pub token: String,
    #[serde(default)]
    pub not_after: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XblDisplayClaims {
    #[serde(default)]
    pub xui: Vec<XblUserInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct XblUserInfo {
    pub uhs: String,
    #[serde(default)]
    pub xid: Option<String>,
    #[serde(default)]
    pub gtg: Option<String>,
}

/// Xbox Live error response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XstsErrorResponse {
    #[serde(rename = "XErr")]
    pub xerr: u64,
    #[serde(default)]
    pub message: Option<String>,
}

/// Minecraft multiplayer authentication request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct McAuthenticationRequest {
    pub identity_public_key: String,
}

/// Minecraft multiplayer authentication response
#[derive(Debug, Clone, Deserialize)]
pub struct McAuthenticationResponse {
    pub chain: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sisu_request_field_names() {
        let request = SisuAuthorizeRequest {
            access_token: "t=abc".to_string(),
            app_id: "app".to_string(),
            device_token: "device".to_string(),
            sandbox: "RETAIL".to_string(),
            use_modern_gamertag: true,
            site_name: "user.auth.xboxlive.com".to_string(),
            relying_party: "https://multiplayer.minecraft.net/".to_string(),
            proof_key: ProofKey {
                crv: "P-256".to_string(),
                alg: "ES256".to_string(),
                key_use: "sig".to_string(),
                kty: "EC".to_string(),
                x: "x".to_string(),
                y: "y".to_string(),
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["AccessToken"], "t=abc");
        assert_eq!(value["deviceToken"], "device");
        assert_eq!(value["UseModernGamertag"], true);
        assert_eq!(value["ProofKey"]["use"], "sig");
    }

    #[test]
    fn test_access_token_debug_is_redacted() {
        let token: AccessToken = serde_json::from_str(
            r#"{"token_type":"bearer","expires_in":86400,"scope":"s","access_token":"secret-value","refresh_token":"r","user_id":"u"}"#,
        )
        .unwrap();

        let debug = format!("{token:?}");
        assert!(!debug.contains("secret-value"));
        assert_eq!(token.user_id.as_deref(), Some("u"));
    }

    #[test]
    fn test_empty_claims_deserialize() {
        let response: SisuAuthorizeResponse = serde_json::from_str(
            r#"{"AuthorizationToken":{"DisplayClaims":{"xui":[]},"Token":"tok"}}"#,
        )
        .unwrap();
        assert!(response.authorization_token.display_claims.xui.is_empty());
    }
}
