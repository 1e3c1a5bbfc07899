//! The `send` command.

use anyhow::Context;
use remote_callback::{
    Bundle, CallbackError, CallbackProxy, DeliveryPolicy, RemoteBinder, RemoteCallback, Result,
};
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// The stdout line for a result that never reached the receiver.
pub fn undelivered_line(result: Option<&Bundle>) -> String {
    let json = result.map_or(serde_json::Value::Null, Bundle::to_json);
    format!("CALLBACK_UNDELIVERED={}", json)
}

/// Reports one-way results that never reached the receiver.
#[derive(Debug)]
pub struct UndeliveredCallback<W = std::io::Stdout> {
    out: Mutex<W>,
}

impl UndeliveredCallback {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> UndeliveredCallback<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }
}

#[async_trait::async_trait]
impl<W: Write + Send + 'static> RemoteCallback for UndeliveredCallback<W> {
    async fn send_result(&self, result: Option<Bundle>) -> Result<()> {
        warn!("Receiver is gone, result was not delivered");
        let line = undelivered_line(result.as_ref());
        let mut out = self
            .out
            .lock()
            .map_err(|_| CallbackError::Other("undelivered output lock poisoned".to_string()))?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        Ok(())
    }
}

/// Parse the `--json` argument into a result bundle.
pub fn parse_result(json: Option<&str>) -> anyhow::Result<Option<Bundle>> {
    let Some(json) = json else {
        return Ok(None);
    };
    let value: serde_json::Value =
        serde_json::from_str(json).context("--json is not valid JSON")?;
    let bundle = Bundle::from_json(&value).map_err(|e| match e {
        CallbackError::Config { message } => anyhow::anyhow!("--json: {}", message),
        other => other.into(),
    })?;
    Ok(Some(bundle))
}

/// Connect to `addr` and deliver one result with `policy`.
pub async fn send(
    addr: SocketAddr,
    json: Option<&str>,
    policy: DeliveryPolicy,
) -> anyhow::Result<()> {
    let result = parse_result(json)?;

    let remote = Arc::new(
        RemoteBinder::connect(addr)
            .await
            .with_context(|| format!("no callback host at {}", addr))?,
    );
    let proxy = CallbackProxy::new(remote)
        .with_policy(policy)
        .with_fallback(Arc::new(UndeliveredCallback::stdout()));

    info!("Sending result to {} ({})", addr, policy);
    proxy.send_result(result).await?;

    if policy == DeliveryPolicy::Acknowledged {
        println!("CALLBACK_ACK=ok");
    }
    Ok(())
}
