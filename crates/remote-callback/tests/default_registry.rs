//! The process-wide fallback slot.
//!
//! Kept in its own test binary: the slot is global and write-once, so no other
//! test may touch it.

use remote_callback::{
    default_impl, set_default_impl, Binder, Bundle, CallbackError, CallbackProxy, LocalBinder,
    Parcel, RemoteCallback, Result, TransactionFlags, TransactionHandler,
};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Recorder {
    results: Mutex<Vec<Option<Bundle>>>,
}

#[async_trait::async_trait]
impl RemoteCallback for Recorder {
    async fn send_result(&self, result: Option<Bundle>) -> Result<()> {
        self.results.lock().unwrap().push(result);
        Ok(())
    }
}

/// A binder whose target no longer knows any transaction.
struct Stale;

#[async_trait::async_trait]
impl TransactionHandler for Stale {
    async fn on_transact(
        &self,
        _code: u32,
        _data: &mut Parcel,
        _reply: &mut Parcel,
        _flags: TransactionFlags,
    ) -> Result<bool> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_process_default_is_write_once_and_used_by_proxies() {
    assert!(default_impl().is_none());
    assert!(!set_default_impl(None).unwrap());

    let recorder = Arc::new(Recorder::default());
    assert!(set_default_impl(Some(recorder.clone())).unwrap());

    match set_default_impl(Some(Arc::new(Recorder::default()))) {
        Err(CallbackError::DuplicateRegistration) => {}
        other => panic!("Expected DuplicateRegistration, got: {:?}", other.map(|_| ())),
    }
    assert!(matches!(
        set_default_impl(None),
        Err(CallbackError::DuplicateRegistration)
    ));

    let binder: Arc<dyn Binder> = Arc::new(LocalBinder::new(Arc::new(Stale)));
    let proxy = CallbackProxy::new(binder);
    let bundle = Bundle::new().with("copied", 12_i64);
    proxy.send_result(Some(bundle.clone())).await.unwrap();

    assert_eq!(*recorder.results.lock().unwrap(), vec![Some(bundle)]);
}
