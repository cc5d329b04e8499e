//! Plugin server
//!
//! Starts the tfplugin6 gRPC service over TLS on a loopback port and prints
//! the go-plugin handshake line Terraform reads from stdout.

use crate::error::{Result, TfplugError};
use crate::grpc::ProviderService;
use crate::proto::provider_server::ProviderServer;
use crate::provider::Provider;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use std::io::Write;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};

pub const MAGIC_COOKIE_KEY: &str = "TF_PLUGIN_MAGIC_COOKIE";
pub const MAGIC_COOKIE_VALUE: &str =
    "d602bf8f470bc67ca7faa0386276bbdd4330efaf76d1a219cb4d6991ca9872b2";

const CORE_PROTOCOL_VERSION: u32 = 1;
const APP_PROTOCOL_VERSION: u32 = 6;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// PEM certificate presented to Terraform
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub max_message_size: usize,
    /// Skip the magic cookie check, for running outside Terraform
    pub skip_cookie_check: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            cert_path: PathBuf::from("./certs/localhost.pem"),
            key_path: PathBuf::from("./certs/localhost-key.pem"),
            max_message_size: 256 << 20,
            skip_cookie_check: false,
        }
    }
}

impl ServerConfig {
    pub fn new(cert_path: PathBuf, key_path: PathBuf) -> Self {
        Self {
            cert_path,
            key_path,
            ..Self::default()
        }
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn skip_cookie_check(mut self) -> Self {
        self.skip_cookie_check = true;
        self
    }
}

/// Runs `provider` until Terraform stops it or closes the connection
pub async fn serve<P: Provider + 'static>(provider: P, config: ServerConfig) -> Result<()> {
    if !config.skip_cookie_check {
        check_magic_cookie(std::env::var(MAGIC_COOKIE_KEY).ok().as_deref())?;
    }

    // Already installed is fine
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let cert = tokio::fs::read(&config.cert_path)
        .await
        .map_err(|e| TfplugError::TlsError(format!("Failed to read certificate: {}", e)))?;
    let key = tokio::fs::read(&config.key_path)
        .await
        .map_err(|e| TfplugError::TlsError(format!("Failed to read key: {}", e)))?;
    let handshake_cert = certificate_der_base64(&cert)?;

    let mut tls_config = ServerTlsConfig::new().identity(Identity::from_pem(cert, key));
    if let Ok(client_cert) = std::env::var("PLUGIN_CLIENT_CERT") {
        tracing::debug!("Requiring client certificate from Terraform");
        tls_config = tls_config.client_ca_root(Certificate::from_pem(client_cert));
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let service = ProviderService::new(provider);
    let stopped = service.context();
    let service = ProviderServer::new(service)
        .max_decoding_message_size(config.max_message_size)
        .max_encoding_message_size(config.max_message_size);

    let mut stdout = std::io::stdout();
    writeln!(stdout, "{}", handshake_line(&addr.to_string(), &handshake_cert))?;
    stdout.flush()?;
    tracing::info!(%addr, "Provider server listening");

    Server::builder()
        .tls_config(tls_config)?
        .add_service(service)
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            stopped.cancelled().await
        })
        .await?;

    tracing::info!("Provider server stopped");
    Ok(())
}

fn check_magic_cookie(value: Option<&str>) -> Result<()> {
    match value {
        Some(MAGIC_COOKIE_VALUE) => Ok(()),
        _ => Err(TfplugError::Handshake(
            "This binary is a Terraform plugin. It is not meant to be executed directly; \
             run a Terraform command that uses it instead."
                .to_string(),
        )),
    }
}

fn handshake_line(addr: &str, cert: &str) -> String {
    format!(
        "{}|{}|tcp|{}|grpc|{}",
        CORE_PROTOCOL_VERSION, APP_PROTOCOL_VERSION, addr, cert
    )
}

/// The handshake carries the DER certificate, unpadded standard base64
fn certificate_der_base64(pem: &[u8]) -> Result<String> {
    let pem = std::str::from_utf8(pem)
        .map_err(|e| TfplugError::TlsError(format!("Certificate is not valid PEM: {}", e)))?;

    let body: String = pem
        .lines()
        .map(str::trim)
        .skip_while(|line| *line != "-----BEGIN CERTIFICATE-----")
        .skip(1)
        .take_while(|line| !line.starts_with("-----END"))
        .collect();
    if body.is_empty() {
        return Err(TfplugError::TlsError(
            "No CERTIFICATE block found in PEM".to_string(),
        ));
    }

    let der = base64::engine::general_purpose::STANDARD
        .decode(body.as_bytes())
        .map_err(|e| TfplugError::TlsError(format!("Invalid certificate encoding: {}", e)))?;
    Ok(STANDARD_NO_PAD.encode(der))
}
