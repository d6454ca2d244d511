//! One-shot wakeup primitive for data channel readiness.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::Mutex;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

#[derive(Default)]
struct NotifierState {
    /// Set once, never cleared.
    woken: bool,

    /// Tasks parked on this notifier.
    wakers: Vec<std::task::Waker>,
}

/// A cloneable future that stays pending until someone calls `wake`, then
/// resolves for every awaiter. `webrtc_wait_for_data_channel_open` in
/// [crate::core::transport::ConnectionInterface] awaits one of these while the
/// channel's open callback holds the other end.
#[derive(Clone, Default)]
pub struct Notifier(Arc<Mutex<NotifierState>>);

impl Notifier {
    /// Wake every parked awaiter now.
    pub fn wake(&self) {
        let Ok(mut state) = self.0.lock() else {
            return;
        };
        state.woken = true;
        for waker in state.wakers.drain(..) {
            waker.wake();
        }
    }

    /// Spawn a task that calls `wake` once `timeout` elapses.
    pub fn set_timeout(&self, timeout: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            this.wake();
        });
    }
}

impl Future for Notifier {
    type Output = ();
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Ok(mut state) = self.0.lock() else {
            return Poll::Ready(());
        };

        if state.woken {
            return Poll::Ready(());
        }

        state.wakers.push(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_notifier() {
        let notifier = Notifier::default();
        notifier.set_timeout(Duration::from_millis(200));

        let mut jobs = vec![];

        // Await three times before wake.
        for _ in 0..3 {
            let notifier_clone = notifier.clone();
            jobs.push(tokio::spawn(async move {
                notifier_clone.await;
            }));
        }

        // Await three times after wake.
        for _ in 0..3 {
            let notifier_clone = notifier.clone();
            jobs.push(tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(400)).await;
                notifier_clone.await;
            }));
        }

        futures::future::join_all(jobs).await;
        notifier.await;
    }
}
