//! Hosted callback that reports every delivered result.

use remote_callback::{
    BinderServer, BinderServerHandle, Bundle, CallbackStub, RemoteCallback, Result,
};
use std::sync::Arc;
use tracing::info;

/// Prints each result as a `CALLBACK_RESULT=<json>` line.
#[derive(Debug, Default)]
pub struct PrintingCallback;

/// The stdout line for a delivered result.
pub fn result_line(result: Option<&Bundle>) -> String {
    let json = result.map_or(serde_json::Value::Null, Bundle::to_json);
    format!("CALLBACK_RESULT={}", json)
}

#[async_trait::async_trait]
impl RemoteCallback for PrintingCallback {
    async fn send_result(&self, result: Option<Bundle>) -> Result<()> {
        info!(
            "Result received ({} entries)",
            result.as_ref().map_or(0, Bundle::len)
        );
        println!("{}", result_line(result.as_ref()));
        Ok(())
    }
}

/// Host a [`PrintingCallback`] on `host:port`.
///
/// Returns the server handle; the actual port is on the handle (useful when
/// port=0).
pub async fn start_server(host: &str, port: u16) -> anyhow::Result<BinderServerHandle> {
    let binder = CallbackStub::new(Arc::new(PrintingCallback)).into_binder();
    let handle = BinderServer::start_on(&format!("{}:{}", host, port), binder).await?;
    Ok(handle)
}
