//! rustls configuration for `https` origins.
//!
//! With the default `tls` feature a [`ClientBuilder`](crate::ClientBuilder)
//! pointed at an `https://` origin builds its configuration from
//! [`default_tls_config`]. Custom configurations go through the type-state
//! [`TlsConfigBuilder`]:
//!
//! ```ignore
//! let config = TlsConfigBuilder::new()
//!     .with_ring()
//!     .with_native_roots()
//!     .build()?;
//! let client = Client::builder("https://example.com")
//!     .tls_config(config)
//!     .build()?;
//! ```

use std::marker::PhantomData;
use std::sync::Arc;

use rustls::ClientConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::ClientError;

type WantsVerifier = rustls::ConfigBuilder<ClientConfig, rustls::WantsVerifier>;

/// Returns true if both a crypto provider and root certificates are compiled in.
#[inline]
pub const fn has_tls_support() -> bool {
    cfg!(any(feature = "tls-ring", feature = "tls-aws-lc"))
        && cfg!(any(
            feature = "tls-native-roots",
            feature = "tls-webpki-roots"
        ))
}

fn builder_with(provider: Arc<rustls::crypto::CryptoProvider>) -> Result<WantsVerifier, rustls::Error> {
    ClientConfig::builder_with_provider(provider).with_safe_default_protocol_versions()
}

/// Feature-gated provider first, then the process-wide default.
fn provider_builder() -> Option<WantsVerifier> {
    #[cfg(feature = "tls-ring")]
    return builder_with(Arc::new(rustls::crypto::ring::default_provider())).ok();

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    return builder_with(Arc::new(rustls::crypto::aws_lc_rs::default_provider())).ok();

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    {
        rustls::crypto::CryptoProvider::get_default()
            .and_then(|provider| builder_with(provider.clone()).ok())
    }
}

/// Build the configuration used for `https` origins when none is supplied.
///
/// Returns `None` if no crypto provider is available.
#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
pub fn default_tls_config() -> Option<ClientConfig> {
    let builder = provider_builder()?;
    Some(
        builder
            .with_root_certificates(feature_roots())
            .with_no_client_auth(),
    )
}

#[cfg(any(feature = "tls-native-roots", feature = "tls-webpki-roots"))]
fn feature_roots() -> rustls::RootCertStore {
    #[cfg(feature = "tls-native-roots")]
    return NativeRoots.root_store();

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    return WebpkiRoots.root_store();
}

/// Marker: no crypto provider selected yet.
pub struct NoProvider;

#[cfg(feature = "tls-ring")]
pub struct RingProvider;

#[cfg(feature = "tls-aws-lc")]
pub struct AwsLcProvider;

/// Marker: no root certificates selected yet.
pub struct NoRoots;

#[cfg(feature = "tls-native-roots")]
pub struct NativeRoots;

#[cfg(feature = "tls-webpki-roots")]
pub struct WebpkiRoots;

pub struct CustomRoots {
    store: rustls::RootCertStore,
}

pub trait CryptoProvider {
    fn provider_builder() -> Result<WantsVerifier, rustls::Error>;
}

#[cfg(feature = "tls-ring")]
impl CryptoProvider for RingProvider {
    fn provider_builder() -> Result<WantsVerifier, rustls::Error> {
        builder_with(Arc::new(rustls::crypto::ring::default_provider()))
    }
}

#[cfg(feature = "tls-aws-lc")]
impl CryptoProvider for AwsLcProvider {
    fn provider_builder() -> Result<WantsVerifier, rustls::Error> {
        builder_with(Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
    }
}

pub trait RootCertificates {
    fn root_store(&self) -> rustls::RootCertStore;
}

#[cfg(feature = "tls-native-roots")]
impl RootCertificates for NativeRoots {
    fn root_store(&self) -> rustls::RootCertStore {
        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        if !native.errors.is_empty() {
            tracing::debug!(errors = ?native.errors, "failed to load some native certificates");
        }
        roots.add_parsable_certificates(native.certs);
        roots
    }
}

#[cfg(feature = "tls-webpki-roots")]
impl RootCertificates for WebpkiRoots {
    fn root_store(&self) -> rustls::RootCertStore {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        roots
    }
}

impl RootCertificates for CustomRoots {
    fn root_store(&self) -> rustls::RootCertStore {
        self.store.clone()
    }
}

/// Type-state builder for a rustls [`ClientConfig`].
///
/// `build` only exists once both a crypto provider and a root store are chosen.
pub struct TlsConfigBuilder<P, R> {
    roots: R,
    extra_roots: Vec<CertificateDer<'static>>,
    client_auth: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    _provider: PhantomData<P>,
}

impl TlsConfigBuilder<NoProvider, NoRoots> {
    pub fn new() -> Self {
        Self {
            roots: NoRoots,
            extra_roots: Vec::new(),
            client_auth: None,
            _provider: PhantomData,
        }
    }
}

impl Default for TlsConfigBuilder<NoProvider, NoRoots> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> TlsConfigBuilder<P, R> {
    fn with_state<P2, R2>(self, roots: R2) -> TlsConfigBuilder<P2, R2> {
        TlsConfigBuilder {
            roots,
            extra_roots: self.extra_roots,
            client_auth: self.client_auth,
            _provider: PhantomData,
        }
    }

    /// Trust an additional certificate, such as a private CA.
    pub fn add_root_certificate(mut self, cert: CertificateDer<'static>) -> Self {
        self.extra_roots.push(cert);
        self
    }

    /// Present a client certificate (mTLS). The leaf comes first in the chain.
    pub fn with_client_auth(
        mut self,
        cert_chain: Vec<CertificateDer<'static>>,
        private_key: PrivateKeyDer<'static>,
    ) -> Self {
        self.client_auth = Some((cert_chain, private_key));
        self
    }
}

#[cfg(feature = "tls-ring")]
impl<R> TlsConfigBuilder<NoProvider, R> {
    pub fn with_ring(self) -> TlsConfigBuilder<RingProvider, R> {
        let roots = self.roots;
        TlsConfigBuilder {
            roots,
            extra_roots: self.extra_roots,
            client_auth: self.client_auth,
            _provider: PhantomData,
        }
    }
}

#[cfg(feature = "tls-aws-lc")]
impl<R> TlsConfigBuilder<NoProvider, R> {
    pub fn with_aws_lc(self) -> TlsConfigBuilder<AwsLcProvider, R> {
        let roots = self.roots;
        TlsConfigBuilder {
            roots,
            extra_roots: self.extra_roots,
            client_auth: self.client_auth,
            _provider: PhantomData,
        }
    }
}

#[cfg(feature = "tls-native-roots")]
impl<P> TlsConfigBuilder<P, NoRoots> {
    pub fn with_native_roots(self) -> TlsConfigBuilder<P, NativeRoots> {
        self.with_state(NativeRoots)
    }
}

#[cfg(feature = "tls-webpki-roots")]
impl<P> TlsConfigBuilder<P, NoRoots> {
    pub fn with_webpki_roots(self) -> TlsConfigBuilder<P, WebpkiRoots> {
        self.with_state(WebpkiRoots)
    }
}

impl<P> TlsConfigBuilder<P, NoRoots> {
    pub fn with_custom_roots(self, store: rustls::RootCertStore) -> TlsConfigBuilder<P, CustomRoots> {
        self.with_state(CustomRoots { store })
    }
}

impl<P: CryptoProvider, R: RootCertificates> TlsConfigBuilder<P, R> {
    pub fn build(self) -> Result<ClientConfig, rustls::Error> {
        let mut roots = self.roots.root_store();
        for cert in self.extra_roots {
            roots.add(cert)?;
        }

        let builder = P::provider_builder()?.with_root_certificates(roots);
        match self.client_auth {
            Some((cert_chain, key)) => builder.with_client_auth_cert(cert_chain, key),
            None => Ok(builder.with_no_client_auth()),
        }
    }
}

/// Certificate verifier that accepts anything. Test servers only.
#[derive(Debug)]
pub struct DangerousAcceptAnyCertVerifier;

impl rustls::client::danger::ServerCertVerifier for DangerousAcceptAnyCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

/// A configuration that skips certificate verification entirely.
pub fn danger_accept_invalid_certs_config() -> Result<ClientConfig, ClientError> {
    let builder = provider_builder().ok_or_else(|| {
        ClientError::invalid_argument(
            "no crypto provider: enable `tls-ring` or `tls-aws-lc`, or install a default provider",
        )
    })?;

    Ok(builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(DangerousAcceptAnyCertVerifier))
        .with_no_client_auth())
}
