use std::time::Duration;

/// Default service endpoints
pub mod endpoints {
    pub const LIVE_CONNECT: &str = "https://login.live.com/oauth20_connect.srf";
    pub const LIVE_TOKEN: &str = "https://login.live.com/oauth20_token.srf";
    pub const XBL_DEVICE_AUTHENTICATE: &str = "https://device.auth.xboxlive.com/device/authenticate";
    pub const XBL_SISU_AUTHORIZE: &str = "https://sisu.xboxlive.com/authorize";
    pub const MC_AUTHENTICATION: &str = "https://multiplayer.minecraft.net/authentication";
}

/// Microsoft account (login.live.com) parameters of the Minecraft Android client
pub mod live {
    pub const CLIENT_ID: &str = "0000000048183522";
    pub const SCOPE: &str = "service::user.auth.xboxlive.com::MBI_SSL";
    pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
}

/// Xbox Live parameters
pub mod xbox {
    pub const APP_ID: &str = "0000000048183522";
    pub const SANDBOX: &str = "RETAIL";
    pub const SITE_NAME: &str = "user.auth.xboxlive.com";
    pub const RP_XBOXLIVE_AUTH: &str = "http://auth.xboxlive.com";
    pub const RP_MULTIPLAYER: &str = "https://multiplayer.minecraft.net/";
    pub const DEVICE_TYPE: &str = "Android";
    pub const DEVICE_VERSION: &str = "10";
    pub const CONTRACT_VERSION: &str = "1";
}

/// Minecraft multiplayer parameters
pub mod minecraft {
    pub const USER_AGENT: &str = "MCPE/Android";

    /// Mojang's root public key (P-384, SPKI DER, base64)
    pub const ROOT_PUBLIC_KEY: &str = "MHYwEAYHKoZIzj0CAQYFK4EEACIDYgAE8ELkixyLcwlZryUQcu1TvPOmI2B7vX83ndnWRUaXm74wFfa5f/lwQNTfrLVHa2PmenpGI6JhIMUJaWZrjmMj90NoKNFSNBuKdm8rYiXsfaz3K36x/1U26HpG0ZxK/V1V";

    /// Lifetime of the self-signed identity certificate
    pub const CERTIFICATE_LIFETIME_SECS: i64 = 172_800;

    /// Backdating of the certificate's `nbf` to tolerate clock skew
    pub const CERTIFICATE_NOT_BEFORE_SKEW_SECS: i64 = 60;
}

/// Endpoint URLs, overridable so tests can point them at a mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub live_connect: String,
    pub live_token: String,
    pub device_authenticate: String,
    pub sisu_authorize: String,
    pub minecraft_authentication: String,
}

impl Endpoints {
    /// Point every endpoint at `base`, keeping the production paths
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            live_connect: format!("{base}/oauth20_connect.srf"),
            live_token: format!("{base}/oauth20_token.srf"),
            device_authenticate: format!("{base}/device/authenticate"),
            sisu_authorize: format!("{base}/authorize"),
            minecraft_authentication: format!("{base}/authentication"),
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            live_connect: endpoints::LIVE_CONNECT.to_string(),
            live_token: endpoints::LIVE_TOKEN.to_string(),
            device_authenticate: endpoints::XBL_DEVICE_AUTHENTICATE.to_string(),
            sisu_authorize: endpoints::XBL_SISU_AUTHORIZE.to_string(),
            minecraft_authentication: endpoints::MC_AUTHENTICATION.to_string(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpTimeouts {
    pub connect: Duration,
    pub request: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: Duration::from_secs(30),
        }
    }
}

/// Configuration for the credential-exchange flow
///
/// All values are fixed at construction; nothing here is read from disk.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// OAuth client ID used for the device code grant
    pub client_id: String,

    /// OAuth scope requested for the device code grant
    pub scope: String,

    /// Xbox Live application ID sent to SISU
    pub app_id: String,

    pub sandbox: String,

    /// Relying party of the final authorization (Minecraft multiplayer)
    pub relying_party: String,

    pub device_type: String,
    pub device_version: String,

    /// Game version sent as `Client-Version` when requesting the chain
    pub client_version: String,

    /// User agent for the Minecraft authentication request
    pub user_agent: String,

    /// Trusted root key placed in the self-signed certificate
    pub root_public_key: String,

    pub endpoints: Endpoints,

    pub http_timeouts: HttpTimeouts,
}

impl AuthConfig {
    /// Create config with the Minecraft Android client's parameters
    pub fn new(client_version: impl Into<String>) -> Self {
        Self {
            client_id: live::CLIENT_ID.to_string(),
            scope: live::SCOPE.to_string(),
            app_id: xbox::APP_ID.to_string(),
            sandbox: xbox::SANDBOX.to_string(),
            relying_party: xbox::RP_MULTIPLAYER.to_string(),
            device_type: xbox::DEVICE_TYPE.to_string(),
            device_version: xbox::DEVICE_VERSION.to_string(),
            client_version: client_version.into(),
            user_agent: minecraft::USER_AGENT.to_string(),
            root_public_key: minecraft::ROOT_PUBLIC_KEY.to_string(),
            endpoints: Endpoints::default(),
            http_timeouts: HttpTimeouts::default(),
        }
    }

    /// Replace the endpoints, e.g. with [`Endpoints::with_base`]
    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Build the HTTP client shared by every step of the flow
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .connect_timeout(self.http_timeouts.connect)
            .timeout(self.http_timeouts.request)
            .build()
    }
}
