use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use crate::index::{Branch, Track};

/// Navigation operations that keep their own superscroll cursor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Artists,
    Albums,
    Genres,
    GenreTracks,
    ArtistTracks,
}

#[derive(Debug, Clone)]
enum Cursor {
    Branches(Arc<Vec<Branch>>),
    Tracks {
        container: i64,
        tracks: Arc<Vec<Track>>,
    },
}

/// Filtered result sets pinned per client and operation until the client
/// filters again or is cleared by a discovery handshake.
#[derive(Default)]
pub struct Superscroll {
    clients: Mutex<HashMap<IpAddr, HashMap<Operation, Cursor>>>,
}

impl Superscroll {
    pub fn new() -> Superscroll {
        Superscroll {
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn set(&self, client: IpAddr, operation: Operation, cursor: Cursor) {
        self.clients
            .lock()
            .unwrap()
            .entry(client)
            .or_default()
            .insert(operation, cursor);
    }

    fn get(&self, client: IpAddr, operation: Operation) -> Option<Cursor> {
        self.clients
            .lock()
            .unwrap()
            .get(&client)
            .and_then(|cursors| cursors.get(&operation))
            .cloned()
    }

    pub fn set_branches(
        &self,
        client: IpAddr,
        operation: Operation,
        items: Vec<Branch>,
    ) -> Arc<Vec<Branch>> {
        let items = Arc::new(items);
        self.set(client, operation, Cursor::Branches(items.clone()));
        items
    }

    pub fn branches(&self, client: IpAddr, operation: Operation) -> Option<Arc<Vec<Branch>>> {
        match self.get(client, operation)? {
            Cursor::Branches(items) => Some(items),
            Cursor::Tracks { .. } => None,
        }
    }

    pub fn set_tracks(
        &self,
        client: IpAddr,
        operation: Operation,
        container: i64,
        tracks: Vec<Track>,
    ) -> Arc<Vec<Track>> {
        let tracks = Arc::new(tracks);
        self.set(
            client,
            operation,
            Cursor::Tracks {
                container,
                tracks: tracks.clone(),
            },
        );
        tracks
    }

    /// The cached track cursor, if it was built for `container`.
    pub fn tracks(
        &self,
        client: IpAddr,
        operation: Operation,
        container: i64,
    ) -> Option<Arc<Vec<Track>>> {
        match self.get(client, operation)? {
            Cursor::Tracks {
                container: cached,
                tracks,
            } if cached == container => Some(tracks),
            _ => None,
        }
    }

    pub fn clear(&self, client: IpAddr) {
        if self.clients.lock().unwrap().remove(&client).is_some() {
            debug!("cleared superscroll for {}", client);
        }
    }
}
