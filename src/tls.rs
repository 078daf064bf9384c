use rustls::ServerConfig;
use std::sync::Arc;

/// TLS configuration shared by every accepted connection.
#[derive(Clone, Debug)]
pub struct TlsContext {
  config: Arc<ServerConfig>,
}

impl TlsContext {
  /// Creates a new instance from PEM-encoded certificates and a PEM-encoded private key.
  #[inline]
  pub fn from_cert_chain_and_priv_key(cert_chain: &[u8], priv_key: &[u8]) -> crate::Result<Self> {
    let config = ServerConfig::builder().with_no_client_auth().with_single_cert(
      rustls_pemfile::certs(&mut &*cert_chain).collect::<Result<_, _>>()?,
      rustls_pemfile::private_key(&mut &*priv_key)?.ok_or(crate::Error::MissingTlsPrivateKey)?,
    )?;
    Ok(Self { config: Arc::new(config) })
  }

  /// Creates a new instance from an already built configuration.
  #[inline]
  pub fn from_server_config(config: Arc<ServerConfig>) -> Self {
    Self { config }
  }

  pub(crate) fn server_config(&self) -> Arc<ServerConfig> {
    Arc::clone(&self.config)
  }
}
