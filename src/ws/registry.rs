use std::fmt;
use std::sync::Arc;

use dashmap::{DashMap, Entry};
use url::Url;

use super::config::Config;
use super::connection::Connection;
use super::log::{Logger, TracingLogger};
use super::retry::{INSECURE_SCHEME, SECURE_SCHEME};
use super::socket::{Dialer, Socket, TungsteniteDialer};
use super::traits::Handler;
use crate::Result;
use crate::error::Error;

/// Name to [`Connection`] map holding at most one connection per name.
///
/// A registry is an ordinary value owned by the application; connections created through it
/// share its [`Dialer`] and [`Logger`] and unregister themselves on close. Clones share the
/// same map.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

pub(crate) struct RegistryInner {
    connections: DashMap<String, Connection>,
    dialer: Arc<dyn Dialer>,
    logger: Arc<dyn Logger>,
}

impl RegistryInner {
    /// Remove `connection`, but only if it is still the one registered under its name.
    pub(crate) fn remove_connection(&self, connection: &Connection) {
        self.connections
            .remove_if(connection.name(), |_, registered| registered == connection);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(TungsteniteDialer), Arc::new(TracingLogger))
    }
}

impl Registry {
    #[must_use]
    pub fn new(dialer: Arc<dyn Dialer>, logger: Arc<dyn Logger>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                connections: DashMap::new(),
                dialer,
                logger,
            }),
        }
    }

    /// Return the connection registered as `name`, creating it with `factory` if there is none.
    ///
    /// `factory` is not invoked when the name is taken. The map entry stays locked while it
    /// runs, so it must not touch this registry.
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Connection
    where
        F: FnOnce() -> Connection,
    {
        match self.inner.connections.entry(name.to_owned()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(factory()).clone(),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Connection> {
        self.inner
            .connections
            .get(name)
            .map(|entry| entry.value().clone())
    }

    /// Unregister `name` without closing the connection. Absent names are ignored.
    pub fn remove(&self, name: &str) -> Option<Connection> {
        self.inner
            .connections
            .remove(name)
            .map(|(_, connection)| connection)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.connections.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inner
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Get or create the client connection `name`, dialing `url` in the background.
    ///
    /// `url` must use the `ws://` or `wss://` scheme. If `name` is already registered the
    /// existing connection is returned and the other arguments are ignored.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect_as_client<H: Handler>(
        &self,
        name: &str,
        url: &str,
        config: Config,
        handler: H,
    ) -> Result<Connection> {
        validate_url(url)?;
        validate_queue_size(config.queue_size)?;

        let mut created = false;
        let connection = self.get_or_create(name, || {
            created = true;
            Connection::client(
                name,
                url.to_owned(),
                config,
                Arc::new(handler),
                Arc::clone(&self.inner.logger),
                Arc::downgrade(&self.inner),
            )
        });

        if created {
            connection.start(Arc::clone(&self.inner.dialer));
        }

        Ok(connection)
    }

    /// Get or create the server connection `name` on an already accepted `socket`.
    ///
    /// If `name` is already registered its socket is replaced by `socket`, keeping the queues
    /// and handler; a running [`Connection::accept`] on the old socket returns. Serve the
    /// socket with [`Connection::accept`].
    pub fn bind_as_server<H: Handler>(
        &self,
        name: &str,
        socket: Socket,
        queue_size: usize,
        handler: H,
    ) -> Result<Connection> {
        validate_queue_size(queue_size)?;

        let mut socket = Some(socket);
        let connection = self.get_or_create(name, || {
            Connection::server(
                name,
                socket.take(),
                queue_size,
                Arc::new(handler),
                Arc::clone(&self.inner.logger),
                Arc::downgrade(&self.inner),
            )
        });

        if let Some(socket) = socket {
            connection.rebind(socket)?;
        }

        Ok(connection)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}

fn validate_url(url: &str) -> Result<()> {
    if !url.starts_with(INSECURE_SCHEME) && !url.starts_with(SECURE_SCHEME) {
        return Err(Error::validation(format!(
            "url {url} must start with {INSECURE_SCHEME} or {SECURE_SCHEME}"
        )));
    }

    Url::parse(url)?;
    Ok(())
}

fn validate_queue_size(queue_size: usize) -> Result<()> {
    if queue_size == 0 {
        return Err(Error::validation("queue size must be at least 1"));
    }

    Ok(())
}
