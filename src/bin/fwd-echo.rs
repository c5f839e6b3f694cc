//! fwd-echo
//!
//! Forwards a TCP port through the local UPnP gateway and echoes every
//! connection back to its sender until Ctrl-C.
//!
//! Usage: `fwd-echo [network] [address]` (defaults: `tcp :4000`)

use anyhow::Context;
use fwd_listener::aio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fwd_listener::init();

    let mut args = std::env::args().skip(1);
    let network = args.next().unwrap_or_else(|| "tcp".to_string());
    let address = args.next().unwrap_or_else(|| ":4000".to_string());

    let listener = aio::listen(&network, &address)
        .await
        .with_context(|| format!("failed to forward {} {}", network, address))?;

    info!(
        "Echoing on {} (external {} {})",
        listener.get_ref().local_addr()?,
        listener.local_addr().network(),
        listener.local_addr()
    );

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (mut stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Accept failed: {}", e);
                        continue;
                    }
                };

                tokio::spawn(async move {
                    debug!("Connection from {}", peer);
                    let (mut reader, mut writer) = stream.split();
                    match tokio::io::copy(&mut reader, &mut writer).await {
                        Ok(n) => debug!("Echoed {} bytes to {}", n, peer),
                        Err(e) => warn!("Echo to {} failed: {}", peer, e),
                    }
                    let _ = writer.shutdown().await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    listener.close().await;
    Ok(())
}
