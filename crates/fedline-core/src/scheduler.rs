//! Delivery scheduler.
//!
//! Pulls released messages out of a [`MessageQueue`] and hands them to its
//! [`IncomingHandler`]. The federate drives delivery by ticking; alternatively
//! an immediate delivery task processes messages as soon as they become
//! releasable.
//!
//! Only one tick may run at a time. Handler failures are logged and never
//! interrupt delivery.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use fedline_proto::Message;
use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{config::FederationConfig, error::SchedulerError, queue::MessageQueue};

struct ImmediateTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Resets the ticking flag on every exit path.
struct TickGuard<'a>(&'a AtomicBool);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Tick-driven and immediate delivery for one federate session.
pub struct DeliveryScheduler {
    queue: Arc<MessageQueue>,
    config: FederationConfig,
    callbacks_enabled: Arc<AtomicBool>,
    ticking: AtomicBool,
    immediate: Mutex<Option<ImmediateTask>>,
}

impl DeliveryScheduler {
    /// Scheduler over `queue` with callbacks enabled.
    pub fn new(queue: Arc<MessageQueue>, config: FederationConfig) -> Self {
        Self {
            queue,
            config,
            callbacks_enabled: Arc::new(AtomicBool::new(true)),
            ticking: AtomicBool::new(false),
            immediate: Mutex::new(None),
        }
    }

    /// Queue this scheduler delivers from.
    pub fn queue(&self) -> &Arc<MessageQueue> {
        &self.queue
    }

    /// Resume delivery.
    pub fn enable_callbacks(&self) {
        self.callbacks_enabled.store(true, Ordering::Release);
    }

    /// Suspend delivery. Messages stay queued.
    pub fn disable_callbacks(&self) {
        self.callbacks_enabled.store(false, Ordering::Release);
    }

    /// Whether delivery is enabled.
    pub fn callbacks_enabled(&self) -> bool {
        self.callbacks_enabled.load(Ordering::Acquire)
    }

    /// Whether a tick is currently running.
    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    /// [`Self::tick_until_empty`] with the configured tick timeout.
    pub async fn tick(&self) -> Result<usize, SchedulerError> {
        self.tick_until_empty(self.config.tick_timeout).await
    }

    /// Wait up to `first_wait` for a message, then keep delivering while the
    /// queue is non-empty. Returns how many messages were delivered.
    ///
    /// Each poll may again wait up to `first_wait` if what remains is not yet
    /// releasable.
    pub async fn tick_until_empty(&self, first_wait: Duration) -> Result<usize, SchedulerError> {
        if !self.callbacks_enabled() {
            return Ok(0);
        }

        let _guard = self.enter()?;
        let mut processed = 0;

        loop {
            let Some(message) = self.queue.poll_timeout(first_wait).await else {
                return Ok(processed);
            };

            deliver(&self.queue, message);
            processed += 1;

            if self.queue.is_empty() {
                return Ok(processed);
            }
        }
    }

    /// Deliver for at least `min` and at most `max`.
    ///
    /// Until `min` has passed the scheduler waits for messages; after that it
    /// only takes what is releasable right away. Returns whether messages are
    /// likely to remain. The message in progress when `max` passes is finished,
    /// so a tick can overrun `max` by one handler call.
    pub async fn tick_window(&self, min: Duration, max: Duration) -> Result<bool, SchedulerError> {
        if min.is_zero() && max.is_zero() {
            return Err(SchedulerError::InvalidTickWindow { min, max });
        }

        if !self.callbacks_enabled() {
            return Ok(true);
        }

        let _guard = self.enter()?;
        let start = Instant::now();
        let min_deadline = start + min;
        let max_deadline = start + max;

        while Instant::now() < min_deadline {
            match self.queue.poll_until(min_deadline).await {
                Some(message) => deliver(&self.queue, message),
                None => break,
            }
        }

        while Instant::now() < max_deadline {
            match self.queue.poll() {
                Some(message) => deliver(&self.queue, message),
                None => return Ok(false),
            }
        }

        Ok(true)
    }

    /// Deliver everything [`MessageQueue::flush`] drains for `max_time`.
    ///
    /// Returns the grant time: the lower of `max_time` and the next TSO
    /// timestamp. With callbacks disabled nothing is delivered and only the
    /// grant time is computed.
    pub fn tick_flush(&self, max_time: f64) -> Result<f64, SchedulerError> {
        if !self.callbacks_enabled() {
            return Ok(self.flush_grant(max_time));
        }

        let _guard = self.enter()?;
        for message in self.queue.flush(max_time) {
            deliver(&self.queue, message);
        }

        Ok(self.flush_grant(max_time))
    }

    /// Deliver at most one message, waiting up to `wait` for it. Returns
    /// whether the queue still holds messages.
    pub async fn tick_single(&self, wait: Duration) -> Result<bool, SchedulerError> {
        if !self.callbacks_enabled() {
            return Ok(!self.queue.is_empty());
        }

        {
            let _guard = self.enter()?;
            if let Some(message) = self.queue.poll_timeout(wait).await {
                deliver(&self.queue, message);
            }
        }

        Ok(!self.queue.is_empty())
    }

    /// Start the immediate delivery task. A second call while it runs is a
    /// no-op.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enable_immediate_delivery(&self) {
        let mut immediate = self.immediate.lock();
        if immediate.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_immediate(
            Arc::clone(&self.queue),
            Arc::clone(&self.callbacks_enabled),
            self.config.immediate_idle_sleep,
            cancel.clone(),
        ));

        *immediate = Some(ImmediateTask { cancel, handle });
    }

    /// Stop the immediate delivery task and wait for it to exit.
    pub async fn disable_immediate_delivery(&self) {
        let Some(task) = self.immediate.lock().take() else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            tracing::error!(error = %e, "immediate delivery task failed");
        }
    }

    /// Whether the immediate delivery task is running.
    pub fn is_immediate_delivery_enabled(&self) -> bool {
        self.immediate.lock().is_some()
    }

    fn enter(&self) -> Result<TickGuard<'_>, SchedulerError> {
        if self.ticking.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::ConcurrentAccess);
        }
        Ok(TickGuard(&self.ticking))
    }

    fn flush_grant(&self, max_time: f64) -> f64 {
        match self.queue.peek_tso_time() {
            Some(next) if next < max_time => next,
            _ => max_time,
        }
    }
}

impl Drop for DeliveryScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.immediate.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

fn deliver(queue: &MessageQueue, message: Message) {
    let source = message.source;
    if let Err(e) = queue.handler().process(message) {
        tracing::error!(source, error = %e, "failed to process incoming message");
    }
}

async fn run_immediate(
    queue: Arc<MessageQueue>,
    callbacks_enabled: Arc<AtomicBool>,
    idle_sleep: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!("immediate delivery started");

    loop {
        if !callbacks_enabled.load(Ordering::Acquire) {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(idle_sleep) => continue,
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = queue.poll_next() => deliver(&queue, message),
        }
    }

    tracing::debug!("immediate delivery stopped");
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use fedline_proto::Category;

    use super::*;
    use crate::{
        error::HandlerError,
        queue::IncomingHandler,
        time::{SharedTimeStatus, TimeStatus},
    };

    #[derive(Default)]
    struct Counter {
        seen: Mutex<Vec<u32>>,
    }

    impl IncomingHandler for Counter {
        fn process(&self, message: Message) -> Result<(), HandlerError> {
            if message.source == 0 {
                return Err(HandlerError::new("source 0 rejected"));
            }
            self.seen.lock().push(message.source);
            Ok(())
        }
    }

    fn scheduler() -> (DeliveryScheduler, Arc<Counter>) {
        let handler = Arc::new(Counter::default());
        let time = Arc::new(SharedTimeStatus::new(TimeStatus::default()));
        let queue = Arc::new(MessageQueue::new(time, handler.clone()));
        (DeliveryScheduler::new(queue, FederationConfig::default()), handler)
    }

    fn offer(scheduler: &DeliveryScheduler, source: u32) {
        scheduler.queue().offer(Message::receive_order(source, Category::Other, Bytes::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn tick_drains_queue() {
        let (scheduler, handler) = scheduler();
        for source in 1..=3 {
            offer(&scheduler, source);
        }

        assert_eq!(scheduler.tick().await, Ok(3));
        assert_eq!(*handler.seen.lock(), vec![1, 2, 3]);
        assert!(!scheduler.is_ticking());
    }

    #[tokio::test(start_paused = true)]
    async fn handler_failures_do_not_stop_delivery() {
        let (scheduler, handler) = scheduler();
        offer(&scheduler, 0);
        offer(&scheduler, 5);

        assert_eq!(scheduler.tick().await, Ok(2));
        assert_eq!(*handler.seen.lock(), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_window_is_rejected() {
        let (scheduler, _) = scheduler();
        assert_eq!(
            scheduler.tick_window(Duration::ZERO, Duration::ZERO).await,
            Err(SchedulerError::InvalidTickWindow { min: Duration::ZERO, max: Duration::ZERO })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn window_reports_empty_queue() {
        let (scheduler, handler) = scheduler();
        offer(&scheduler, 1);

        let more = scheduler
            .tick_window(Duration::ZERO, Duration::from_millis(10))
            .await
            .expect("tick succeeds");
        assert!(!more);
        assert_eq!(*handler.seen.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn window_waits_out_its_minimum() {
        let (scheduler, handler) = scheduler();
        let queue = Arc::clone(scheduler.queue());
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            queue.offer(Message::receive_order(4, Category::Other, Bytes::new()));
        });

        let start = Instant::now();
        let more = scheduler
            .tick_window(Duration::from_millis(50), Duration::from_millis(100))
            .await
            .expect("tick succeeds");

        assert!(!more);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(*handler.seen.lock(), vec![4]);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_callbacks_deliver_nothing() {
        let (scheduler, handler) = scheduler();
        scheduler.disable_callbacks();
        offer(&scheduler, 1);

        assert_eq!(scheduler.tick().await, Ok(0));
        assert_eq!(scheduler.tick_window(Duration::ZERO, Duration::from_millis(1)).await, Ok(true));
        assert_eq!(scheduler.tick_single(Duration::ZERO).await, Ok(true));
        assert_eq!(scheduler.tick_flush(4.0), Ok(4.0));
        assert!(handler.seen.lock().is_empty());
        assert_eq!(scheduler.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tick_single_takes_one() {
        let (scheduler, handler) = scheduler();
        offer(&scheduler, 1);
        offer(&scheduler, 2);

        assert_eq!(scheduler.tick_single(Duration::from_millis(1)).await, Ok(true));
        assert_eq!(scheduler.tick_single(Duration::from_millis(1)).await, Ok(false));
        assert_eq!(*handler.seen.lock(), vec![1, 2]);
    }

    #[test]
    fn second_tick_is_concurrent_access() {
        let (scheduler, _) = scheduler();
        let guard = scheduler.enter().expect("first tick");

        assert_eq!(scheduler.tick_flush(1.0), Err(SchedulerError::ConcurrentAccess));
        drop(guard);
        assert!(scheduler.tick_flush(1.0).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_delivery_runs_until_disabled() {
        let (scheduler, handler) = scheduler();
        scheduler.enable_immediate_delivery();
        scheduler.enable_immediate_delivery();
        assert!(scheduler.is_immediate_delivery_enabled());

        offer(&scheduler, 7);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*handler.seen.lock(), vec![7]);

        scheduler.disable_immediate_delivery().await;
        assert!(!scheduler.is_immediate_delivery_enabled());

        offer(&scheduler, 8);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(*handler.seen.lock(), vec![7]);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_interrupts_idle_wait() {
        let (scheduler, handler) = scheduler();
        scheduler.disable_callbacks();
        scheduler.enable_immediate_delivery();
        tokio::time::sleep(Duration::from_millis(10)).await;
        offer(&scheduler, 3);

        let start = Instant::now();
        scheduler.disable_immediate_delivery().await;
        assert!(start.elapsed() < FederationConfig::default().immediate_idle_sleep);

        scheduler.enable_callbacks();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(handler.seen.lock().is_empty());
        assert_eq!(scheduler.queue().len(), 1);
    }
}
