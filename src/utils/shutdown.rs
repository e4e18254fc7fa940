use tokio::sync::watch;

/// Shutdown flag shared by the server, its connections and the persistence scheduler
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve once shutdown was requested.
///
/// A dropped sender counts as a request too: nobody is left to keep the server up.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
