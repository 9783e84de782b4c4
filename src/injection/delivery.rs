//! Background loops that move results from the queue into the
//! conversation, and that time out operations nobody answered.
//!
//! Delivery waits for a quiet floor (connected, the assistant not speaking,
//! the human not speaking), then for `grace` more of quiet.  Any change that
//! takes the floor during the grace period restarts the wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use super::{InjectionEntry, InjectionError, InjectionQueue, OutstandingOps};

/// Observable conversation state the delivery loop waits on.
pub trait ConversationFloor {
    /// Connected and neither party is speaking.
    fn is_quiet(&self) -> bool;
}

/// What the target did with an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivered {
    /// A new assistant turn was requested along with the output.
    pub response_requested: bool,
}

/// The session side of delivery.
pub trait InjectionTarget: Send + Sync {
    /// Put `entry` into the conversation.  [`InjectionError::Busy`] means
    /// the floor was taken between the wait and the attempt; the entry stays
    /// queued.
    fn inject(&self, entry: &InjectionEntry) -> Result<Delivered, InjectionError>;

    /// Delivery failed for good and the entry was dropped.
    fn delivery_failed(&self, entry: &InjectionEntry, error: &InjectionError);
}

/// Deliver queued entries one at a time, in order, forever.
///
/// Returns when the status channel closes.
pub async fn run_delivery<S, T>(
    queue: Arc<InjectionQueue>,
    mut floor: watch::Receiver<S>,
    target: Arc<T>,
    grace: Duration,
) where
    S: ConversationFloor,
    T: InjectionTarget + ?Sized,
{
    loop {
        queue.wait_nonempty().await;

        if floor.wait_for(|s| s.is_quiet()).await.is_err() {
            return;
        }

        let stayed_quiet = tokio::select! {
            _ = tokio::time::sleep(grace) => true,
            res = floor.wait_for(|s| !s.is_quiet()) => {
                if res.is_err() {
                    return;
                }
                false
            }
        };
        if !stayed_quiet {
            log::debug!("injection: floor taken during grace period, waiting again");
            continue;
        }

        let Some(entry) = queue.front() else {
            continue;
        };
        match target.inject(&entry) {
            Ok(delivered) => {
                queue.pop_if(&entry.call_id);
                log::info!(
                    "injection: delivered result for {}{}",
                    entry.call_id,
                    if delivered.response_requested {
                        " and requested a response"
                    } else {
                        ""
                    }
                );
            }
            Err(InjectionError::Busy) => {}
            Err(e) => {
                queue.pop_if(&entry.call_id);
                log::warn!("injection: dropping result for {}: {e}", entry.call_id);
                target.delivery_failed(&entry, &e);
            }
        }
    }
}

/// Convert operations older than `ceiling` into failure entries.
pub fn sweep_expired(
    ops: &OutstandingOps,
    queue: &InjectionQueue,
    now: Instant,
    ceiling: Duration,
) -> usize {
    let expired = ops.expire(now, ceiling);
    for op in &expired {
        log::warn!(
            "injection: {} ({}) timed out after {:?}",
            op.call_id,
            op.operation,
            ceiling
        );
        queue.push(InjectionEntry::failure(
            op.call_id.clone(),
            op.anchor.clone(),
            &format!(
                "The specialist network did not answer within {} seconds.",
                ceiling.as_secs()
            ),
        ));
    }
    expired.len()
}

/// Sweep at least every `every`, and exactly when the oldest operation
/// reaches `ceiling`.
pub async fn run_timeout_sweep(
    ops: Arc<OutstandingOps>,
    queue: Arc<InjectionQueue>,
    every: Duration,
    ceiling: Duration,
) {
    let every = every.min(ceiling).max(Duration::from_millis(10));
    loop {
        let now = Instant::now();
        let wake = ops
            .next_deadline(ceiling)
            .map_or(now + every, |deadline| deadline.min(now + every));
        tokio::time::sleep_until(wake).await;
        sweep_expired(&ops, &queue, Instant::now(), ceiling);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injection::OutstandingOp;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy)]
    struct Floor(bool);

    impl ConversationFloor for Floor {
        fn is_quiet(&self) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    struct Target {
        delivered: Mutex<Vec<(String, Instant)>>,
        failed: Mutex<Vec<String>>,
        fail_with_closed: bool,
    }

    impl InjectionTarget for Target {
        fn inject(&self, entry: &InjectionEntry) -> Result<Delivered, InjectionError> {
            if self.fail_with_closed {
                return Err(InjectionError::SocketClosed);
            }
            self.delivered
                .lock()
                .unwrap()
                .push((entry.call_id.clone(), Instant::now()));
            Ok(Delivered {
                response_requested: true,
            })
        }

        fn delivery_failed(&self, entry: &InjectionEntry, _error: &InjectionError) {
            self.failed.lock().unwrap().push(entry.call_id.clone());
        }
    }

    const GRACE: Duration = Duration::from_millis(1500);

    fn spawn_loop(
        quiet: bool,
        target: Arc<Target>,
    ) -> (Arc<InjectionQueue>, watch::Sender<Floor>) {
        let queue = Arc::new(InjectionQueue::new());
        let (tx, rx) = watch::channel(Floor(quiet));
        tokio::spawn(run_delivery(queue.clone(), rx, target, GRACE));
        (queue, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_grace_before_delivering() {
        let target = Arc::new(Target::default());
        let (queue, _floor) = spawn_loop(true, target.clone());
        let start = Instant::now();
        queue.push(InjectionEntry::success("c1", None, "x"));

        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(target.delivered.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let delivered = target.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1 >= start + GRACE);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn holds_while_floor_is_taken() {
        let target = Arc::new(Target::default());
        let (queue, floor) = spawn_loop(false, target.clone());
        queue.push(InjectionEntry::success("c1", None, "x"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(target.delivered.lock().unwrap().is_empty());
        assert_eq!(queue.len(), 1);

        let released = Instant::now();
        floor.send_replace(Floor(true));
        tokio::time::sleep(Duration::from_secs(2)).await;
        let delivered = target.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1 >= released + GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn speech_during_grace_restarts_wait() {
        let target = Arc::new(Target::default());
        let (queue, floor) = spawn_loop(true, target.clone());
        queue.push(InjectionEntry::success("c1", None, "x"));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        floor.send_replace(Floor(false));
        tokio::time::sleep(Duration::from_millis(100)).await;
        let resumed = Instant::now();
        floor.send_replace(Floor(true));

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(target.delivered.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        let delivered = target.delivered.lock().unwrap().clone();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].1 >= resumed + GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_fifo_order() {
        let target = Arc::new(Target::default());
        let (queue, _floor) = spawn_loop(true, target.clone());
        queue.push(InjectionEntry::success("first", None, "1"));
        queue.push(InjectionEntry::success("second", None, "2"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        let ids: Vec<String> = target
            .delivered
            .lock()
            .unwrap()
            .iter()
            .map(|d| d.0.clone())
            .collect();
        assert_eq!(ids, vec!["first".to_owned(), "second".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_drops_entry() {
        let target = Arc::new(Target {
            fail_with_closed: true,
            ..Target::default()
        });
        let (queue, _floor) = spawn_loop(true, target.clone());
        queue.push(InjectionEntry::success("c1", None, "x"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
        assert_eq!(*target.failed.lock().unwrap(), vec!["c1".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_fires_at_the_ceiling() {
        let ops = Arc::new(OutstandingOps::new());
        let queue = Arc::new(InjectionQueue::new());
        let ceiling = Duration::from_secs(300);
        let start = Instant::now();
        tokio::spawn(run_timeout_sweep(
            ops.clone(),
            queue.clone(),
            Duration::from_secs(15),
            ceiling,
        ));
        // Let the sweeper take its first look at an empty registry.
        tokio::time::sleep(Duration::from_secs(7)).await;
        ops.insert(OutstandingOp {
            call_id: "c1".into(),
            anchor: Some("fc1".into()),
            operation: "ask_specialists".into(),
            dispatched_at: start,
        });

        tokio::time::sleep_until(start + ceiling - Duration::from_millis(1)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let entry = queue.front().expect("timeout entry");
        assert_eq!(entry.call_id, "c1");
        assert_eq!(entry.anchor.as_deref(), Some("fc1"));
        assert!(entry.output.contains("\"failed\""));
        assert!(!ops.contains("c1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_once_counts_conversions() {
        let ops = OutstandingOps::new();
        let queue = InjectionQueue::new();
        let t0 = Instant::now();
        for id in ["a", "b"] {
            ops.insert(OutstandingOp {
                call_id: id.into(),
                anchor: None,
                operation: "ask_specialists".into(),
                dispatched_at: t0,
            });
        }
        assert_eq!(sweep_expired(&ops, &queue, t0, Duration::from_secs(1)), 0);
        assert_eq!(
            sweep_expired(&ops, &queue, t0 + Duration::from_secs(1), Duration::from_secs(1)),
            2
        );
        assert_eq!(queue.len(), 2);
    }
}
