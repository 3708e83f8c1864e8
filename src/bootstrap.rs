//! Session bootstrapper.
//!
//! Establishes the WhatsApp session, then tries to join the deals group. Only
//! a connection failure is reported as an error; a failed join is logged and
//! left to the relay's fallback discovery.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::{AppContext, Readiness};
use crate::error::Result;
use crate::metrics;
use crate::qr::{QrCode, QrSink};
use crate::session::SessionProvider;

/// Marks the context as waiting for a scan before forwarding the QR code.
struct AwaitingScan<'a> {
    ctx: &'a AppContext,
    inner: &'a dyn QrSink,
}

impl QrSink for AwaitingScan<'_> {
    fn on_qr(&self, qr: &QrCode) {
        metrics::record_qr_code();
        self.ctx.set_readiness(Readiness::AwaitingScan);
        self.inner.on_qr(qr);
    }
}

/// Connect, store the session and join the group identified by `invite_code`.
pub async fn run(
    ctx: &AppContext,
    provider: &dyn SessionProvider,
    sink: &dyn QrSink,
    invite_code: &str,
) -> Result<()> {
    let pairing = AwaitingScan { ctx, inner: sink };

    let session = match provider.connect(&pairing).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Failed to establish WhatsApp session");
            ctx.set_readiness(Readiness::Failed(e.to_string()));
            return Err(e);
        }
    };
    ctx.set_session(session.clone()).await;
    info!("WhatsApp client connected");

    match session.join_group(invite_code).await {
        Ok(Some(id)) => {
            info!(group = %id, "Target group id set");
            ctx.set_target_group(id).await;
        }
        Ok(None) => {
            warn!("Join group returned no group id, relying on fallback discovery");
        }
        Err(e) => {
            warn!(error = %e, "Error joining group (might already be joined)");
        }
    }

    Ok(())
}

/// Run the bootstrapper in the background.
pub fn spawn(
    ctx: Arc<AppContext>,
    provider: Arc<dyn SessionProvider>,
    sink: Arc<dyn QrSink>,
    invite_code: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // Failures are recorded in the context readiness.
        let _ = run(&ctx, provider.as_ref(), sink.as_ref(), &invite_code).await;
    })
}
