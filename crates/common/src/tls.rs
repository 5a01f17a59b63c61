//! TLS connector for outbound WebSocket connections, built from the
//! platform's native root certificates.

use crate::error::{Error, Result};
use std::sync::Arc;
use tokio_tungstenite::Connector;

pub fn tls_connector() -> Result<Connector> {
    let mut root_store = rustls::RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs();
    for cert in certs.certs {
        let _ = root_store.add(cert);
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Tls(e.to_string()))?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(Connector::Rustls(Arc::new(config)))
}
