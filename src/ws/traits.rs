//! Core traits for named connections.

use super::connection::Connection;

/// Callback invoked once for every message received on a [`Connection`].
///
/// Handlers run on the connection's dispatcher, in the order the socket produced the
/// messages. While a handler runs, the connection neither delivers further messages nor
/// writes queued ones, so handlers must return promptly. Replies should go through
/// [`Connection::try_send`], or be sent from a spawned task, since awaiting
/// [`Connection::send`] on a full queue from inside the handler can never complete.
///
/// Any `Fn(&Connection, Vec<u8>)` closure is a handler:
///
/// ```ignore
/// let echo = |connection: &Connection, payload: Vec<u8>| {
///     _ = connection.try_send(payload);
/// };
/// ```
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, connection: &Connection, payload: Vec<u8>);
}

impl<F> Handler for F
where
    F: Fn(&Connection, Vec<u8>) + Send + Sync + 'static,
{
    fn handle(&self, connection: &Connection, payload: Vec<u8>) {
        self(connection, payload);
    }
}
