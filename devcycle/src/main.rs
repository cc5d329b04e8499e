use devcycle::DevCycleProvider;
use std::env;
use tfplug::ServerConfig;
use tracing_subscriber::EnvFilter;

/// Terraform reads the handshake from stdout, so logs go to stderr
fn init_logging() {
    let filter = env::var("TF_LOG_PROVIDER_DEVCYCLE")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_logging();

    let exe = env::current_exe()?;
    let exe_dir = exe
        .parent()
        .ok_or("provider executable has no parent directory")?;
    let cert_path = exe_dir.join("../../certs/localhost+2.pem");
    let key_path = exe_dir.join("../../certs/localhost+2-key.pem");

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting DevCycle provider"
    );
    tfplug::serve(DevCycleProvider::new(), ServerConfig::new(cert_path, key_path)).await?;

    Ok(())
}
