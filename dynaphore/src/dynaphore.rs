use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::arbiter::{self, RequestChannels};

/// A dynamically-sized counting semaphore.
///
/// A `Dynaphore` grants up to `max` concurrent permits, where `max` can be
/// changed at any time with [`set_max`](Self::set_max), concurrently with
/// acquire and release traffic. Raising the maximum immediately unblocks
/// waiting acquirers; lowering it never revokes permits already held, it only
/// withholds new grants until enough releases bring the count back under the
/// new ceiling.
///
/// The handle is cheap to clone; clones share one arbiter task, which owns
/// the permit count and services every request in turn. The arbiter exits
/// once the last handle (including clones held by in-flight
/// [`up_chan`](Self::up_chan) / [`down_chan`](Self::down_chan) helpers and
/// outstanding [`Permit`]s) is dropped.
///
/// Constructing a `Dynaphore` requires a running tokio runtime.
///
/// ```
/// use dynaphore::Dynaphore;
///
/// #[tokio::main]
/// async fn main() {
///     let sem = Dynaphore::new(2);
///
///     let permit = sem.acquire().await;
///     assert_eq!(sem.current().await, 1);
///
///     // Released on drop, whatever the exit path.
///     drop(permit);
/// }
/// ```
#[derive(Clone, Debug)]
pub struct Dynaphore {
    requests: RequestChannels,
}

impl Dynaphore {
    /// Creates a semaphore allowing up to `max` concurrent permits and spawns
    /// its arbiter task.
    pub fn new(max: usize) -> Self {
        Self {
            requests: arbiter::spawn(max),
        }
    }

    /// Acquires one permit, waiting as long as it takes for headroom under
    /// the current maximum. Returns the handle so calls can be chained.
    ///
    /// This path is not cancellation-safe: dropping the returned future after
    /// the request is queued abandons the attempt (the arbiter skips the
    /// grant), but a caller that wants to race acquisition against a timeout
    /// or other events should use [`up_chan`](Self::up_chan) instead.
    pub async fn up(&self) -> &Self {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.requests.acquire.send(reply_tx);
        let _ = reply_rx.await;
        self
    }

    /// Releases one permit. Never blocks; a release with no matching prior
    /// [`up`](Self::up) is absorbed by the arbiter as a no-op.
    pub fn down(&self) -> &Self {
        let _ = self.requests.release.send(());
        self
    }

    /// Sets the maximum number of concurrent permits.
    ///
    /// Returns once the request is delivered, not once it has taken effect.
    /// Concurrent calls are each applied exactly once, in whatever order the
    /// arbiter services them; the last one serviced wins.
    pub fn set_max(&self, new_max: usize) -> &Self {
        let _ = self.requests.set_max.send(new_max);
        self
    }

    /// The number of permits currently held, as observed at the moment the
    /// arbiter answers. The value can be stale as soon as it is returned if
    /// other requests are in flight.
    pub async fn current(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.requests.query.send(reply_tx);
        reply_rx.await.unwrap_or(0)
    }

    /// Acquires one permit and returns a guard that releases it on drop.
    ///
    /// The scoped counterpart of [`up`](Self::up) for callers that hold the
    /// permit for a lexical scope; the release runs on every exit path,
    /// including early returns and panics.
    pub async fn acquire(&self) -> Permit {
        self.up().await;
        Permit {
            parent: self.clone(),
        }
    }

    /// Starts a permit acquisition that can be raced against other events.
    ///
    /// A helper task performs the same single acquire as [`up`](Self::up) and
    /// resolves the returned [`LockChan`] once the permit is granted. The
    /// caller can await the handle inside `tokio::select!`, poll it with
    /// [`LockChan::is_acquired`], or stop waiting altogether.
    ///
    /// The underlying request cannot be withdrawn once submitted: a caller
    /// that stops waiting must hand the handle to
    /// [`down_chan`](Self::down_chan) so the eventually-granted permit is
    /// still released. Dropping the handle instead leaks that permit.
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use dynaphore::Dynaphore;
    ///
    /// # async fn demo() {
    /// let sem = Dynaphore::new(4);
    ///
    /// let mut attempt = sem.up_chan();
    /// let timed_out = tokio::select! {
    ///     _ = &mut attempt => false,
    ///     _ = tokio::time::sleep(Duration::from_millis(250)) => true,
    /// };
    ///
    /// if timed_out {
    ///     // Gave up waiting; the eventual grant still gets released.
    ///     sem.down_chan(attempt);
    /// } else {
    ///     // Permit held; release it when done.
    ///     sem.down();
    /// }
    /// # }
    /// ```
    pub fn up_chan(&self) -> LockChan {
        let (ready_tx, ready_rx) = oneshot::channel();
        let sem = self.clone();
        tokio::spawn(async move {
            sem.up().await;
            let _ = ready_tx.send(());
        });
        LockChan {
            ready: ready_rx,
            acquired: false,
        }
    }

    /// Releases the permit behind an [`up_chan`](Self::up_chan) handle once
    /// it is granted, however long that takes.
    ///
    /// If the handle is already resolved this is equivalent to an immediate
    /// [`down`](Self::down). Otherwise a helper task waits out the grant and
    /// then releases, so every `up_chan` permit is released exactly once even
    /// when the caller abandoned the wait.
    pub fn down_chan(&self, lock: LockChan) {
        let sem = self.clone();
        tokio::spawn(async move {
            lock.await;
            sem.down();
        });
    }
}

/// An in-flight permit acquisition started by [`Dynaphore::up_chan`].
///
/// Resolves as a future once the permit is granted, so it composes with
/// `tokio::select!` and timeouts. Awaiting again after completion returns
/// immediately; [`is_acquired`](Self::is_acquired) reports readiness without
/// blocking.
///
/// Once resolved the permit is held and must be released, either directly
/// with [`Dynaphore::down`] or by handing the handle to
/// [`Dynaphore::down_chan`].
#[derive(Debug)]
pub struct LockChan {
    ready: oneshot::Receiver<()>,
    acquired: bool,
}

impl LockChan {
    /// Whether the underlying acquisition has succeeded, without blocking.
    pub fn is_acquired(&mut self) -> bool {
        if !self.acquired {
            self.acquired = !matches!(self.ready.try_recv(), Err(TryRecvError::Empty));
        }
        self.acquired
    }
}

impl Future for LockChan {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.acquired {
            return Poll::Ready(());
        }
        match Pin::new(&mut self.ready).poll(cx) {
            Poll::Ready(_) => {
                self.acquired = true;
                Poll::Ready(())
            },
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A held permit that releases itself when dropped.
///
/// Returned by [`Dynaphore::acquire`]. The release is a plain message send,
/// so it is safe to run from `Drop` on any exit path.
#[derive(Debug)]
pub struct Permit {
    parent: Dynaphore,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.parent.down();
    }
}
