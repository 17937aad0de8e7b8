// Ordered delivery of decrypted messages to the presentation layer
//
// A queue of queues: the outer channel fixes the order messages are shown
// in, each inner channel carries one message's text fragments as its
// decryption task produces them. A message's slot is reserved the moment
// intake accepts it, so slow decryption never reorders output.

use tokio::sync::mpsc;

/// How many messages may be pending display before intake blocks. This is
/// the only backpressure in the system.
pub(crate) const DELIVERY_CAPACITY: usize = 5;

/// Fragment buffer per message; a slow consumer blocks only that message's
/// decryption task.
pub(crate) const FRAGMENT_CAPACITY: usize = 100;

/// One decrypted (or failed-to-decrypt) message as an ordered sequence of
/// text fragments.
///
/// The producing task drops its sender when the message is complete;
/// `next_fragment` then yields `None`. Decryption failure still completes
/// the item, so a consumer is never left waiting.
pub struct DeliveryItem {
    fragments: mpsc::Receiver<String>,
}

impl DeliveryItem {
    pub async fn next_fragment(&mut self) -> Option<String> {
        self.fragments.recv().await
    }

    /// Drain the item into one string, for consumers that do not render
    /// fragments incrementally.
    pub async fn collect_text(mut self) -> String {
        let mut text = String::new();
        while let Some(fragment) = self.next_fragment().await {
            text.push_str(&fragment);
        }
        text
    }
}

/// Consumer end of the delivery path. Items arrive in the order message
/// intake accepted them, independent of when each decryption finishes.
pub struct Deliveries {
    items: mpsc::Receiver<DeliveryItem>,
}

impl Deliveries {
    pub async fn next_item(&mut self) -> Option<DeliveryItem> {
        self.items.recv().await
    }
}

/// Create the delivery path. The sender side belongs to message intake.
pub(crate) fn delivery_queue() -> (mpsc::Sender<DeliveryItem>, Deliveries) {
    let (tx, rx) = mpsc::channel(DELIVERY_CAPACITY);
    (tx, Deliveries { items: rx })
}

/// Open the fragment queue for one message.
pub(crate) fn fragment_queue() -> (mpsc::Sender<String>, DeliveryItem) {
    let (tx, rx) = mpsc::channel(FRAGMENT_CAPACITY);
    (tx, DeliveryItem { fragments: rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_items_arrive_in_submission_order() {
        let (items_tx, mut deliveries) = delivery_queue();

        // Submit two items, then complete them in reverse order.
        let (first_tx, first_item) = fragment_queue();
        items_tx.send(first_item).await.unwrap();
        let (second_tx, second_item) = fragment_queue();
        items_tx.send(second_item).await.unwrap();

        tokio::spawn(async move {
            second_tx.send("second".to_string()).await.unwrap();
            drop(second_tx);
            tokio::time::sleep(Duration::from_millis(50)).await;
            first_tx.send("first".to_string()).await.unwrap();
            drop(first_tx);
        });

        let item = deliveries.next_item().await.unwrap();
        assert_eq!(item.collect_text().await, "first");

        let item = deliveries.next_item().await.unwrap();
        assert_eq!(item.collect_text().await, "second");
    }

    #[tokio::test]
    async fn test_dropping_producer_completes_item() {
        let (items_tx, mut deliveries) = delivery_queue();

        let (fragment_tx, item) = fragment_queue();
        items_tx.send(item).await.unwrap();

        fragment_tx.send("only".to_string()).await.unwrap();
        drop(fragment_tx);

        let mut item = deliveries.next_item().await.unwrap();
        assert_eq!(item.next_fragment().await, Some("only".to_string()));
        assert_eq!(item.next_fragment().await, None);
    }

    #[tokio::test]
    async fn test_collect_text_concatenates_fragments() {
        let (fragment_tx, item) = fragment_queue();

        tokio::spawn(async move {
            for fragment in ["a", "b", "c"] {
                fragment_tx.send(fragment.to_string()).await.unwrap();
            }
        });

        assert_eq!(item.collect_text().await, "abc");
    }
}
