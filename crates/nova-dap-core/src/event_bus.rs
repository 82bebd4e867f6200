use nova_jdwp::JdwpEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

type EventFilter = Box<dyn Fn(&JdwpEvent) -> bool + Send + Sync>;

/// Fan-out of target VM events to independently cancellable subscribers.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<JdwpEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver `event` to every live subscriber; returns how many saw it.
    pub fn publish(&self, event: JdwpEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Events accepted by `filter`, in arrival order, from now on.
    pub fn subscribe<F>(&self, filter: F) -> Subscription
    where
        F: Fn(&JdwpEvent) -> bool + Send + Sync + 'static,
    {
        Subscription {
            receiver: self.sender.subscribe(),
            filter: Box::new(filter),
            token: CancellationToken::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Republish everything from `source` until it closes or `shutdown` fires.
    pub fn attach(
        &self,
        mut source: broadcast::Receiver<JdwpEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => break,
                    event = source.recv() => event,
                };
                match event {
                    Ok(event) => {
                        bus.publish(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "nova.dap", skipped, "event pump lagged behind the VM");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            tracing::debug!(target: "nova.dap", "event pump stopped");
        })
    }
}

/// What a subscriber receives from [`Subscription::recv`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(JdwpEvent),
    /// The subscriber fell behind and this many events were lost; anything
    /// derived from the event stream must be rebuilt from the target.
    Lagged(u64),
}

/// A cancellable, filtered view of the bus. Dropping it cancels it.
pub struct Subscription {
    receiver: broadcast::Receiver<JdwpEvent>,
    filter: EventFilter,
    token: CancellationToken,
}

impl Subscription {
    /// Next matching event or lag notice, or `None` once cancelled or the
    /// bus is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            let event = tokio::select! {
                biased;
                _ = self.token.cancelled() => return None,
                event = self.receiver.recv() => event,
            };
            match event {
                Ok(event) if (self.filter)(&event) => return Some(Delivery::Event(event)),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(Delivery::Lagged(skipped))
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event, stepping over gaps. For consumers that can
    /// tolerate loss; see [`Self::recv`] otherwise.
    pub async fn next(&mut self) -> Option<JdwpEvent> {
        loop {
            match self.recv().await? {
                Delivery::Event(event) => return Some(event),
                Delivery::Lagged(skipped) => {
                    tracing::warn!(target: "nova.dap", skipped, "subscription lagged; events dropped");
                }
            }
        }
    }

    pub fn handle(&self) -> SubscriptionHandle {
        SubscriptionHandle(self.token.clone())
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Cancels a [`Subscription`] owned by another task.
#[derive(Clone, Debug)]
pub struct SubscriptionHandle(CancellationToken);

impl SubscriptionHandle {
    /// Idempotent.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }
}
