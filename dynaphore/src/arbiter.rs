use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Sender halves of the four request channels feeding one arbiter task.
///
/// Cloned wholesale whenever the owning handle is cloned; the arbiter holds
/// the receiver halves and exits once every sender is gone.
#[derive(Clone, Debug)]
pub(crate) struct RequestChannels {
    pub(crate) acquire: mpsc::UnboundedSender<oneshot::Sender<()>>,
    pub(crate) release: mpsc::UnboundedSender<()>,
    pub(crate) set_max: mpsc::UnboundedSender<usize>,
    pub(crate) query: mpsc::UnboundedSender<oneshot::Sender<usize>>,
}

/// Spawns the arbiter task and returns the request senders for it.
///
/// Must be called from within a tokio runtime.
pub(crate) fn spawn(initial_max: usize) -> RequestChannels {
    let (acquire_tx, acquire_rx) = mpsc::unbounded_channel();
    let (release_tx, release_rx) = mpsc::unbounded_channel();
    let (set_max_tx, set_max_rx) = mpsc::unbounded_channel();
    let (query_tx, query_rx) = mpsc::unbounded_channel();

    tokio::spawn(run(initial_max, acquire_rx, release_rx, set_max_rx, query_rx));

    RequestChannels {
        acquire: acquire_tx,
        release: release_tx,
        set_max: set_max_tx,
        query: query_tx,
    }
}

/// The arbiter loop. Sole owner of `current` and `max`; services exactly one
/// request per iteration.
///
/// The acquire branch is only enabled while `current < max`. The guard is
/// re-evaluated on every iteration, so a raised max makes queued acquire
/// requests servable on the very next pass with no extra wake-up bookkeeping,
/// and a lowered max leaves them queued until releases restore headroom.
async fn run(
    initial_max: usize,
    mut acquire_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    mut release_rx: mpsc::UnboundedReceiver<()>,
    mut set_max_rx: mpsc::UnboundedReceiver<usize>,
    mut query_rx: mpsc::UnboundedReceiver<oneshot::Sender<usize>>,
) {
    let mut current: usize = 0;
    let mut max = initial_max;

    loop {
        tokio::select! {
            req = acquire_rx.recv(), if current < max => match req {
                Some(reply) => {
                    // A failed reply send means the requester stopped waiting
                    // before the grant; the permit is not counted.
                    if reply.send(()).is_ok() {
                        current += 1;
                        trace!(current, max, "permit granted");
                    }
                },
                None => break,
            },
            req = release_rx.recv() => match req {
                Some(()) => {
                    // A release with nothing held is absorbed rather than
                    // allowed to underflow the count.
                    if current > 0 {
                        current -= 1;
                        trace!(current, max, "permit released");
                    } else {
                        trace!("release without a held permit ignored");
                    }
                },
                None => break,
            },
            req = set_max_rx.recv() => match req {
                Some(new_max) => {
                    max = new_max;
                    trace!(current, max, "max updated");
                },
                None => break,
            },
            req = query_rx.recv() => match req {
                Some(reply) => {
                    let _ = reply.send(current);
                },
                None => break,
            },
        }
    }

    trace!("all handles dropped, arbiter exiting");
}
