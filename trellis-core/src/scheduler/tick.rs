//! The `next_tick` future.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::reactive::Runtime;

/// Resolves once the runtime has no flush pending or running.
///
/// Polling drives a pending flush to completion, so awaiting `next_tick`
/// is enough to observe the effects of queued jobs without a flush hook.
#[must_use = "futures do nothing unless awaited"]
pub struct NextTick {
    rt: Runtime,
}

impl NextTick {
    pub(crate) fn new(rt: Runtime) -> Self {
        Self { rt }
    }
}

impl Future for NextTick {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let rt = &self.rt;
        if rt.is_flushing() {
            rt.inner
                .scheduler
                .borrow_mut()
                .waiters
                .push(cx.waker().clone());
            return Poll::Pending;
        }
        rt.flush_pending();
        Poll::Ready(())
    }
}
