//! Single ordered queue merging all devices into one event stream
//!
//! Any number of producers share the bounded channel; the single consumer
//! stamps every event with a sequence number in arrival order so downstream
//! processing is strictly serialized.

use super::device::ControllerEvent;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Event queue is full")]
    Full,

    #[error("Event queue closed")]
    Closed,
}

/// Event plus its position in the merged stream
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub sequence: u64,
    pub event: ControllerEvent,
}

#[derive(Debug, Clone)]
pub struct EventProducer {
    sender: mpsc::Sender<ControllerEvent>,
}

impl EventProducer {
    pub async fn push(&self, event: ControllerEvent) -> Result<(), QueueError> {
        self.sender.send(event).await.map_err(|_| QueueError::Closed)
    }

    pub fn try_push(&self, event: ControllerEvent) -> Result<(), QueueError> {
        self.sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// For producer threads outside the runtime, waits for capacity
    pub fn blocking_push(&self, event: ControllerEvent) -> Result<(), QueueError> {
        self.sender
            .blocking_send(event)
            .map_err(|_| QueueError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<ControllerEvent>,
    next_sequence: u64,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<QueuedEvent> {
        let event = self.receiver.recv().await?;
        Some(self.stamp(event))
    }

    pub fn try_recv(&mut self) -> Option<QueuedEvent> {
        let event = self.receiver.try_recv().ok()?;
        Some(self.stamp(event))
    }

    pub fn received(&self) -> u64 {
        self.next_sequence
    }

    fn stamp(&mut self, event: ControllerEvent) -> QueuedEvent {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        debug!("Queued event #{}: {:?}", sequence, event);
        QueuedEvent { sequence, event }
    }
}

pub fn channel(capacity: usize) -> (EventProducer, EventStream) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        EventProducer { sender },
        EventStream {
            receiver,
            next_sequence: 0,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::device::DeviceId;

    #[tokio::test]
    async fn sequences_follow_arrival_order_across_producers() {
        let (first, mut stream) = channel(16);
        let second = first.clone();
        let a = DeviceId::from_u128(1);
        let b = DeviceId::from_u128(2);

        first.push(ControllerEvent::axis(a, 1, 0.1)).await.unwrap();
        second.push(ControllerEvent::axis(b, 1, 0.2)).await.unwrap();
        first.push(ControllerEvent::button(a, 1, true)).await.unwrap();

        let received: Vec<_> = [
            stream.recv().await.unwrap(),
            stream.recv().await.unwrap(),
            stream.recv().await.unwrap(),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            received.iter().map(|q| q.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(received[1].event.device(), b);
        assert_eq!(stream.received(), 3);
    }

    #[test]
    fn try_push_reports_full_and_closed() {
        let (producer, stream) = channel(1);
        let id = DeviceId::from_u128(7);
        producer.try_push(ControllerEvent::button(id, 1, true)).unwrap();
        assert_eq!(
            producer.try_push(ControllerEvent::button(id, 1, false)),
            Err(QueueError::Full)
        );
        drop(stream);
        assert!(producer.is_closed());
        assert_eq!(
            producer.try_push(ControllerEvent::button(id, 1, false)),
            Err(QueueError::Closed)
        );
    }
}
