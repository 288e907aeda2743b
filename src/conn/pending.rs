//! The in-flight request table (§4.6): correlates inbound replies back to
//! their waiting caller by STAN (field 11).

use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::codec::Message;
use crate::error::{Error, Result};

/// Outstanding request table, keyed by STAN. A STAN can have at most one
/// request in flight at a time.
#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<String, oneshot::Sender<Message>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new outstanding request for `stan`, returning the
    /// receiver the caller awaits. Fails with [`Error::DuplicateSTAN`] if
    /// `stan` already has a request in flight.
    pub fn register(&self, stan: &str) -> Result<oneshot::Receiver<Message>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.contains_key(stan) {
            return Err(Error::DuplicateSTAN { stan: stan.to_string() });
        }
        let (tx, rx) = oneshot::channel();
        inner.insert(stan.to_string(), tx);
        Ok(rx)
    }

    /// Complete the request for `stan`, if one is still outstanding.
    /// Replies with no matching request (already timed out, or an
    /// unsolicited/echoed STAN) are dropped.
    pub fn complete(&self, stan: &str, message: Message) {
        if let Some(tx) = self.inner.lock().unwrap().remove(stan) {
            let _ = tx.send(message);
        }
    }

    /// Drop a registration without completing it (timeout or send failure).
    pub fn cancel(&self, stan: &str) {
        self.inner.lock().unwrap().remove(stan);
    }

    /// Drain every outstanding registration, closing each sender's channel.
    /// Used by `ConnectionManager::close` so the table is empty and every
    /// waiting caller observes a closed channel once the connection goes
    /// down.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_in_flight_stan() {
        let table = PendingTable::new();
        let _rx = table.register("000001").unwrap();
        let err = table.register("000001").unwrap_err();
        assert!(matches!(err, Error::DuplicateSTAN { .. }));
    }

    #[tokio::test]
    async fn completes_matching_request() {
        let table = PendingTable::new();
        let rx = table.register("000001").unwrap();
        table.complete("000001", Message::new("0810"));
        let reply = rx.await.unwrap();
        assert_eq!(reply.mti, "0810");
        assert!(table.is_empty());
    }

    #[test]
    fn completing_unknown_stan_is_a_no_op() {
        let table = PendingTable::new();
        table.complete("999999", Message::new("0810"));
        assert!(table.is_empty());
    }

    #[test]
    fn cancel_frees_the_stan_for_reuse() {
        let table = PendingTable::new();
        let _rx = table.register("000001").unwrap();
        table.cancel("000001");
        assert!(table.register("000001").is_ok());
    }

    #[tokio::test]
    async fn clear_empties_the_table_and_closes_every_channel() {
        let table = PendingTable::new();
        let rx1 = table.register("000001").unwrap();
        let rx2 = table.register("000002").unwrap();
        table.clear();
        assert!(table.is_empty());
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }
}
