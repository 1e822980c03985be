//! Microsoft account to Minecraft Bedrock login identity
//!
//! This crate turns a Microsoft account into the signed certificate chain a
//! Bedrock client presents when it logs in to an online-mode server.
//!
//! # Authentication Flow
//!
//! 1. OAuth2 device code grant with login.live.com
//! 2. Xbox Live device authentication (proof of possession, signed requests)
//! 3. SISU authorization for `https://multiplayer.minecraft.net/`
//! 4. Certificate chain request to Minecraft multiplayer services
//! 5. Self-signed identity certificate prepended to the issued chain
//!
//! Every Xbox Live request carries a `Signature` header computed by
//! [`signature::RequestSigner`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sy_auth::{AuthConfig, ChainBuilder, LogConsentPresenter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AuthConfig::new("1.21.50");
//!     let builder = ChainBuilder::new(config, Arc::new(LogConsentPresenter))?;
//!
//!     // Runs the device code flow on first access, cached afterwards
//!     let chain = builder.authorization_chain().await?;
//!     println!("{}", chain.to_json()?);
//!
//!     Ok(())
//! }
//! ```
//!
//! # Important Notes
//!
//! - Nothing is persisted; the flow runs once per [`ChainBuilder`]
//! - A failed flow is not cached; callers waiting on it share its error and
//!   the next access starts over
//! - Tokens should never be logged

pub mod chain;
pub mod clock;
pub mod config;
pub mod device_code;
pub mod errors;
pub mod models;
pub mod signature;
pub mod verify;
pub mod xbox;

// Re-export main types
pub use chain::{CertificateChain, ChainBuilder, IdentityClaims, IdentityKeyPair};
pub use clock::{Clock, SystemClock};
pub use config::{AuthConfig, Endpoints, HttpTimeouts};
pub use device_code::{ConsentPresenter, DeviceCodeClient, DeviceCodePrompt, LogConsentPresenter};
pub use errors::{AuthError, ExchangeStep, RequestError, Result, SharedResult, XstsError};
pub use models::AccessToken;
pub use signature::{DeviceKeyPair, RequestSigner};
pub use verify::{verify_chain, VerifiedChain, VerifyError};
pub use xbox::XboxLiveExchanger;
