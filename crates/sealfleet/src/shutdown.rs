// SPDX-FileCopyrightText: 2026 Sealfleet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signal handling for long-running commands.
//!
//! SIGINT or SIGTERM cancels the returned token. A rotation interrupted in
//! Distributing or Verifying rolls back before the process exits.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => info!("received SIGINT, cancelling"),
                        _ = sigterm.recv() => info!("received SIGTERM, cancelling"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "SIGTERM handler unavailable, listening for Ctrl+C only");
                    let _ = ctrl_c.await;
                    info!("received SIGINT, cancelling");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, cancelling");
        }

        token_clone.cancel();
    });

    token
}
