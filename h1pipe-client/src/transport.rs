//! Socket layer for the pipelined client.
//!
//! The connection manager never opens sockets itself. It asks a [`Connect`]
//! implementation for a [`BoxIo`] and owns the result until the socket is
//! torn down or handed to an upgrade handler as [`Upgraded`].
//!
//! # Feature Flags
//!
//! TLS support requires a crypto provider and root certificates:
//!
//! - `tls` (default) - Enables `tls-ring` + `tls-native-roots` for convenience
//! - `tls-ring` / `tls-aws-lc` - Crypto providers
//! - `tls-native-roots` / `tls-webpki-roots` - Root certificates

mod body;
mod connect;
mod tls;
mod upgraded;

pub use body::{BodyStream, RequestBody};
pub use connect::{BoxIo, Connect, ConnectTarget, Io, Scheme, TransportConnector};
pub use tls::{
    CryptoProvider, CustomRoots, DangerousAcceptAnyCertVerifier, NoProvider, NoRoots,
    RootCertificates, TlsConfigBuilder, danger_accept_invalid_certs_config, has_tls_support,
};
pub use upgraded::Upgraded;

#[cfg(feature = "tls-ring")]
pub use tls::RingProvider;

#[cfg(feature = "tls-aws-lc")]
pub use tls::AwsLcProvider;

#[cfg(feature = "tls-native-roots")]
pub use tls::NativeRoots;

#[cfg(feature = "tls-webpki-roots")]
pub use tls::WebpkiRoots;

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub use tls::default_tls_config;

// Re-export rustls types that users might need for TLS configuration
pub use rustls::ClientConfig as TlsClientConfig;
