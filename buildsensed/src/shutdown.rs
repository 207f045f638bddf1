use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};

/// SIGTERM / SIGINT set `shutdown_tx`; SIGHUP pokes `reload_tx`. Returns
/// after the first shutdown signal.
pub async fn signal_listener(shutdown_tx: watch::Sender<bool>, reload_tx: watch::Sender<()>) {
    let handlers = (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
        signal(SignalKind::hangup()),
    );
    let (mut sigterm, mut sigint, mut sighup) = match handlers {
        (Ok(term), Ok(int), Ok(hup)) => (term, int, hup),
        (term, int, hup) => {
            let err = [term.err(), int.err(), hup.err()]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            error!(error = %err, "signal_handler_registration_failed");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
                return;
            }
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
                let _ = shutdown_tx.send(true);
                return;
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, triggering config reload");
                let _ = reload_tx.send(());
            }
        }
    }
}
