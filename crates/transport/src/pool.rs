//! Connection bookkeeping shared by all backends.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::connection_ref::ConnectionRef;
use crate::core::transport::ConnectionInterface;
use crate::core::transport::WebrtcConnectionState;
use crate::error::Error;
use crate::error::Result;

/// [Pool] holds at most one connection per peer id.
pub struct Pool<C> {
    connections: DashMap<String, Arc<C>>,
}

impl<C> Default for Pool<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Pool<C> {
    /// Create an empty [Pool].
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Look up the connection for `cid` and hand out a weak reference to it.
    pub fn connection(&self, cid: &str) -> Result<ConnectionRef<C>> {
        self.connections
            .get(cid)
            .map(|c| ConnectionRef::new(cid, c.value()))
            .ok_or(Error::ConnectionNotFound(cid.to_string()))
    }

    /// Enumerate every pooled connection with its peer id.
    pub fn connections(&self) -> Vec<(String, ConnectionRef<C>)> {
        self.connections
            .iter()
            .map(|kv| (kv.key().clone(), ConnectionRef::new(kv.key(), kv.value())))
            .collect()
    }

    /// Enumerate the peer ids that currently have a pooled connection.
    pub fn connection_ids(&self) -> Vec<String> {
        self.connections.iter().map(|kv| kv.key().clone()).collect()
    }
}

impl<C, S> Pool<C>
where
    C: ConnectionInterface<Error = Error, Sdp = S> + Send + Sync,
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Insert a connection, refusing to clobber a live one.
    ///
    /// Concurrent inserts for the same id race through `try_entry`; the loser
    /// gets [Error::ConnectionAlreadyExists]. An occupied slot is only
    /// replaced when its connection has already failed or closed.
    /// See also: <https://docs.rs/dashmap/latest/dashmap/mapref/entry/enum.Entry.html#method.insert>
    pub fn safely_insert(&self, cid: &str, conn: C) -> Result<()> {
        let Some(entry) = self.connections.try_entry(cid.to_string()) else {
            return Err(Error::ConnectionAlreadyExists(cid.to_string()));
        };

        match entry {
            Entry::Occupied(mut entry) => {
                let existing = entry.get();
                if matches!(
                    existing.webrtc_connection_state(),
                    WebrtcConnectionState::New
                        | WebrtcConnectionState::Connecting
                        | WebrtcConnectionState::Connected
                ) {
                    return Err(Error::ConnectionAlreadyExists(cid.to_string()));
                }

                entry.insert(Arc::new(conn));
                entry.into_ref()
            }
            Entry::Vacant(entry) => entry.insert(Arc::new(conn)),
        };

        Ok(())
    }

    /// Close the connection for `cid` and drop it from the pool.
    ///
    /// Every [ConnectionRef] previously handed out for this id goes dead and
    /// its [ConnectionInterface] methods start returning
    /// [Error::ConnectionReleased].
    pub async fn safely_remove(&self, cid: &str) -> Result<()> {
        let Some((_, conn)) = self.connections.remove(cid) else {
            return Err(Error::ConnectionNotFound(cid.to_string()));
        };
        conn.close().await
    }
}
