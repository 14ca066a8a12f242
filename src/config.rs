use std::{
    net::{IpAddr, Ipv6Addr},
    num::NonZero,
    path::PathBuf,
};

use clap::{Parser, ValueEnum};
use color_eyre::eyre::Context;
use hyper::Uri;
use rustls_pki_types::DnsName;

use crate::error::ServerError;

// Which disguise to present when the peer is not a Signal client.
#[doc(hidden)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum StealthMode {
    /// Close unrecognized connections without a response.
    None,
    /// Serve the default Nginx welcome page.
    Nginx,
    /// Serve the default Apache2 welcome page.
    Apache,
    /// Forward unrecognized HTTP requests to another site.
    Proxy,
}

// CLI configuration for the proxy.
#[doc(hidden)]
#[derive(Debug, Parser, PartialEq)]
#[command(version, about, long_about = None)]
pub struct ApplicationConfig {
    /// The public domain to obtain a TLS certificate for.
    #[arg(
        long,
        env = "DOMAIN",
        value_parser = validate_domain
    )]
    pub domain: String,

    /// How to respond to clients that are not speaking the Signal protocol.
    #[arg(
        long,
        value_enum,
        default_value_t = StealthMode::Nginx,
        env = "STEALTH_MODE"
    )]
    pub stealth_mode: StealthMode,

    /// Disguise target for the proxy stealth mode.
    /// Must be an http:// or https:// URL.
    #[arg(long, env = "PROXY_URL", value_name = "URL")]
    pub proxy_url: Option<String>,

    /// Address to listen for all client connections.
    #[arg(
        long,
        default_value_t = IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        value_name = "ADDRESS"
    )]
    pub listen_address: IpAddr,

    /// Port to listen for HTTP connections (ACME challenges and redirects).
    #[arg(long, default_value_t = NonZero::new(80).unwrap(), value_name = "PORT")]
    pub http_port: NonZero<u16>,

    /// Port to listen for TLS connections.
    #[arg(long, default_value_t = NonZero::new(443).unwrap(), value_name = "PORT")]
    pub https_port: NonZero<u16>,

    /// Directory to use as a cache for the ACME account and certificates.
    /// This will automatically be created for you.
    #[arg(long, default_value_os = "./certs/", value_name = "DIRECTORY")]
    pub certificate_cache_directory: PathBuf,

    /// Contact e-mail to use with Let's Encrypt.
    ///
    /// By providing your e-mail, you agree to the Let's Encrypt Subscriber Agreement.
    #[arg(long, env = "ACME_CONTACT_EMAIL", value_name = "EMAIL")]
    pub acme_contact_email: Option<String>,

    /// Controls whether to use the staging directory for Let's Encrypt certificates (default is production).
    /// Only set this option for testing.
    #[arg(long, default_value_t = false)]
    pub acme_use_staging: bool,
}

impl ApplicationConfig {
    // Validate the disguise target before any listener is opened.
    // Returns the parsed URL for the proxy stealth mode, None for the others.
    pub(crate) fn stealth_proxy_url(&self) -> Result<Option<Uri>, ServerError> {
        if self.stealth_mode != StealthMode::Proxy {
            return Ok(None);
        }
        let url = self
            .proxy_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                ServerError::InvalidConfig(
                    "Proxy URL is required for the proxy stealth mode".into(),
                )
            })?;
        let url: Uri = url
            .parse()
            .map_err(|_| ServerError::InvalidProxyUrl(url.into()))?;
        match url.scheme_str() {
            Some("http") | Some("https") => {}
            _ => {
                return Err(ServerError::InvalidConfig(
                    "Proxy URL must have a scheme of 'http' or 'https'".into(),
                ));
            }
        }
        if url.authority().is_none() {
            return Err(ServerError::InvalidProxyUrl(url.to_string()));
        }
        Ok(Some(url))
    }
}

fn validate_domain(value: &str) -> color_eyre::Result<String> {
    DnsName::try_from(value).with_context(|| "invalid domain")?;
    Ok(value.to_string())
}
