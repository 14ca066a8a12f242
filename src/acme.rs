use std::{path::PathBuf, sync::Arc};

use futures::StreamExt;
use rustls::{
    ServerConfig,
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
};
use rustls_acme::{
    AcmeConfig, ResolvesServerCertAcme, acme::ACME_TLS_ALPN_NAME, caches::DirCache,
    is_tls_alpn_challenge,
};
use tracing::{error, info};

use crate::droppable_handle::DroppableHandle;

// On-demand certificate provider for the configured domain. Certificates are
// ordered through ACME on the first handshake that needs them, cached on disk,
// and renewed by the background state machine as expiry approaches.
#[derive(Debug)]
pub(crate) struct CertificateManager {
    domain: String,
    resolver: Arc<ResolvesServerCertAcme>,
    _driver: DroppableHandle<()>,
}

impl CertificateManager {
    pub(crate) fn new(
        domain: String,
        cache_directory: PathBuf,
        contact_email: Option<String>,
        use_production: bool,
    ) -> Self {
        let config = AcmeConfig::new([domain.clone()])
            .cache(DirCache::new(cache_directory))
            .directory_lets_encrypt(use_production);
        let config = match contact_email {
            Some(email) => config.contact_push(format!("mailto:{email}")),
            None => config,
        };
        let mut state = config.state();
        let resolver = state.resolver();
        // Orders, renewals and cache writes all happen inside the state
        // machine, which only makes progress while polled.
        let driver = DroppableHandle(tokio::spawn(async move {
            while let Some(event) = state.next().await {
                match event {
                    Ok(event) => info!(?event, "ACME event."),
                    Err(error) => error!(?error, "ACME error."),
                }
            }
        }));
        CertificateManager {
            domain,
            resolver,
            _driver: driver,
        }
    }

    // rustls server configuration which defers certificate selection to this
    // manager and advertises the TLS-ALPN-01 challenge protocol.
    pub(crate) fn server_config(self: &Arc<Self>) -> Arc<ServerConfig> {
        let mut server_config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::clone(self) as Arc<dyn ResolvesServerCert>);
        server_config.alpn_protocols = vec![b"http/1.1".to_vec(), ACME_TLS_ALPN_NAME.to_vec()];
        Arc::new(server_config)
    }
}

impl ResolvesServerCert for CertificateManager {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if is_tls_alpn_challenge(&client_hello) {
            return self.resolver.resolve(client_hello);
        }
        match client_hello.server_name() {
            Some(server_name) if server_name.eq_ignore_ascii_case(&self.domain) => {
                self.resolver.resolve(client_hello)
            }
            Some(server_name) => {
                info!(
                    %server_name,
                    "Refusing handshake for host outside of the certificate whitelist."
                );
                None
            }
            // Signal clients always send an outer SNI; anything else cannot
            // be matched against the whitelist.
            None => None,
        }
    }
}
