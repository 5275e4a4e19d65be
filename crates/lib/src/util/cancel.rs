use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

/// Shared cancellation flag.
///
/// Cloning yields a handle to the same flag. Once cancelled, no new action
/// is started and no retry is attempted; actions already running are left
/// to finish.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<Inner>);

#[derive(Debug, Default)]
struct Inner {
  flag: AtomicBool,
  notify: Notify,
}

impl CancelSignal {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.flag.store(true, Ordering::SeqCst);
    self.0.notify.notify_waiters();
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.flag.load(Ordering::SeqCst)
  }

  /// Resolves once [`cancel`](Self::cancel) has been called.
  pub async fn cancelled(&self) {
    loop {
      // Registered before the check so a concurrent cancel is not missed.
      let notified = self.0.notify.notified();
      if self.is_cancelled() {
        return;
      }
      notified.await;
    }
  }
}
