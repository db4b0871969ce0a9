use std::io;
use std::sync::Arc;

use hwpolicy_service::logging::init_tracing;
use hwpolicy_service::{DecayTicker, Persistence, PolicyService, RpcServer, ServiceConfig, Transport};

fn main() -> io::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    let service = PolicyService::open(&config)
        .map_err(|err| io::Error::other(err.to_string()))?;
    let service = Arc::new(service);
    let ticker = DecayTicker::spawn(Arc::clone(&service), config.decay_interval)?;

    let server = RpcServer::new(Arc::clone(&service));
    let served = match config.transport {
        Transport::Stdio => server.serve_stdio(),
        Transport::Http => server.serve_http(&config.http_addr),
    };

    if let Some(ticker) = ticker {
        ticker.stop();
    }
    match service.flush() {
        Persistence::Degraded(err) => tracing::warn!(error = %err, "final flush failed"),
        _ => tracing::info!(version = service.policy().version, "policy state flushed"),
    }
    served
}
