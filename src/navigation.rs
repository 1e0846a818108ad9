use std::net::IpAddr;
use std::sync::Arc;

use rusqlite::Result;

use crate::index::{
    AllTracks, Album, Artist, Branch, Genre, Index, NodeEntry, Track, ALBUMS_NODE, ARTISTS_NODE,
    GENRES_NODE,
};
use crate::query::{self, Collection, Range, TrackSource};
use crate::superscroll::{Operation, Superscroll};

pub const ALL_TRACKS_NAME: &str = "All Tracks";

/// One page of a listing together with the number of matching entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub total: usize,
    pub items: Vec<T>,
}

impl<T: Clone> Page<T> {
    fn slice(items: &[T], range: Range) -> Page<T> {
        Page {
            total: items.len(),
            items: items
                .iter()
                .skip(range.from)
                .take(range.count)
                .cloned()
                .collect(),
        }
    }
}

/// Who is asking and which part of the listing they want.
#[derive(Debug, Clone, PartialEq)]
pub struct Window<'a> {
    pub client: IpAddr,
    pub from: usize,
    pub count: usize,
    pub superscroll: Option<&'a str>,
}

impl<'a> Window<'a> {
    fn range(&self) -> Range {
        Range {
            from: self.from,
            count: self.count,
        }
    }

    fn filter(&self) -> Option<&'a str> {
        self.superscroll.filter(|s| !s.is_empty())
    }
}

pub struct Navigator {
    superscroll: Arc<Superscroll>,
}

impl Navigator {
    pub fn new(superscroll: Arc<Superscroll>) -> Navigator {
        Navigator { superscroll }
    }

    pub fn top_level() -> Vec<Branch> {
        vec![
            Branch {
                name: "Artist".to_string(),
                node_id: ARTISTS_NODE,
            },
            Branch {
                name: "Album".to_string(),
                node_id: ALBUMS_NODE,
            },
            Branch {
                name: "Genre".to_string(),
                node_id: GENRES_NODE,
            },
        ]
    }

    fn list(
        &self,
        index: &Index,
        collection: Collection,
        operation: Operation,
        window: &Window,
    ) -> Result<Page<Branch>> {
        if let Some(prefix) = window.filter() {
            let (_, items) = query::query_branches(index, collection, Some(prefix), None)?;
            debug!(
                "superscroll '{}' on {:?} for {}: {} matches",
                prefix,
                operation,
                window.client,
                items.len()
            );
            let items = self
                .superscroll
                .set_branches(window.client, operation, items);
            return Ok(Page::slice(&items, window.range()));
        }

        if let Some(items) = self.superscroll.branches(window.client, operation) {
            trace!("reusing superscroll cursor {:?} for {}", operation, window.client);
            return Ok(Page::slice(&items, window.range()));
        }

        let (total, items) = query::query_branches(index, collection, None, Some(window.range()))?;

        Ok(Page {
            total: total as usize,
            items,
        })
    }

    pub fn list_artists(&self, index: &Index, window: &Window) -> Result<Page<Branch>> {
        self.list(index, Collection::Artists, Operation::Artists, window)
    }

    pub fn list_albums(&self, index: &Index, window: &Window) -> Result<Page<Branch>> {
        self.list(index, Collection::Albums, Operation::Albums, window)
    }

    pub fn list_genres(&self, index: &Index, window: &Window) -> Result<Page<Branch>> {
        self.list(index, Collection::Genres, Operation::Genres, window)
    }

    /// The artist's "All Tracks" entry followed by its albums by name.
    pub fn albums_for_artist(
        &self,
        index: &Index,
        artist: &Artist,
        window: &Window,
    ) -> Result<Page<Branch>> {
        let mut items = Vec::new();

        match index.all_tracks(artist.all_tracks_id)? {
            Some(all_tracks) => items.push(Branch {
                name: ALL_TRACKS_NAME.to_string(),
                node_id: all_tracks.node_id,
            }),
            None => warn!("artist '{}' has no all tracks entry", artist.name),
        }

        items.extend(query::query_artist_albums(index, artist.artist_id)?);

        Ok(Page::slice(&items, window.range()))
    }

    pub fn tracks_for_album(
        &self,
        index: &Index,
        album: &Album,
        window: &Window,
    ) -> Result<Page<Track>> {
        let (total, items) = query::query_tracks(
            index,
            TrackSource::Album(album.album_id),
            None,
            Some(window.range()),
        )?;

        Ok(Page {
            total: total as usize,
            items,
        })
    }

    fn tracks(
        &self,
        index: &Index,
        source: TrackSource,
        container: i64,
        operation: Operation,
        window: &Window,
    ) -> Result<Page<Track>> {
        if let Some(prefix) = window.filter() {
            let (_, tracks) = query::query_tracks(index, source, Some(prefix), None)?;
            debug!(
                "superscroll '{}' on {:?} {} for {}: {} matches",
                prefix,
                operation,
                container,
                window.client,
                tracks.len()
            );
            let tracks = self
                .superscroll
                .set_tracks(window.client, operation, container, tracks);
            return Ok(Page::slice(&tracks, window.range()));
        }

        if let Some(tracks) = self
            .superscroll
            .tracks(window.client, operation, container)
        {
            trace!("reusing superscroll cursor {:?} for {}", operation, window.client);
            return Ok(Page::slice(&tracks, window.range()));
        }

        let (total, items) = query::query_tracks(index, source, None, Some(window.range()))?;

        Ok(Page {
            total: total as usize,
            items,
        })
    }

    pub fn tracks_for_genre(
        &self,
        index: &Index,
        genre: &Genre,
        window: &Window,
    ) -> Result<Page<Track>> {
        self.tracks(
            index,
            TrackSource::Genre(genre.genre_id),
            genre.node_id,
            Operation::GenreTracks,
            window,
        )
    }

    pub fn all_tracks_for_artist(
        &self,
        index: &Index,
        all_tracks: &AllTracks,
        window: &Window,
    ) -> Result<Page<Track>> {
        self.tracks(
            index,
            TrackSource::AllTracks(all_tracks.all_tracks_id),
            all_tracks.node_id,
            Operation::ArtistTracks,
            window,
        )
    }

    /// Looks `node_id` up in artist, all-tracks, album, genre and track order.
    pub fn resolve_node(&self, index: &Index, node_id: i64) -> Result<Option<NodeEntry>> {
        if let Some(artist) = index.artist_by_node(node_id)? {
            return Ok(Some(NodeEntry::Artist(artist)));
        }
        if let Some(all_tracks) = index.all_tracks_by_node(node_id)? {
            return Ok(Some(NodeEntry::AllTracks(all_tracks)));
        }
        if let Some(album) = index.album_by_node(node_id)? {
            return Ok(Some(NodeEntry::Album(album)));
        }
        if let Some(genre) = index.genre_by_node(node_id)? {
            return Ok(Some(NodeEntry::Genre(genre)));
        }
        if let Some(track) = index.track_by_node(node_id)? {
            return Ok(Some(NodeEntry::Track(track)));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::NodeType;
    use crate::testutil::{library, track};

    fn client() -> IpAddr {
        "192.168.1.20".parse().unwrap()
    }

    fn window(from: usize, count: usize, superscroll: Option<&str>) -> Window<'_> {
        Window {
            client: client(),
            from,
            count,
            superscroll,
        }
    }

    fn names(items: &[Branch]) -> Vec<&str> {
        items.iter().map(|b| b.name.as_str()).collect()
    }

    fn titles(items: &[Track]) -> Vec<&str> {
        items.iter().map(|t| t.name.as_str()).collect()
    }

    fn navigator() -> Navigator {
        Navigator::new(Arc::new(Superscroll::new()))
    }

    #[test]
    fn browses_example_library() {
        let (_dir, source) = library(&[
            track("Alice", "AlbumX", "Song1", 1, &[]),
            track("Alice", "AlbumX", "Song2", 2, &[]),
            track("Bob", "AlbumY", "Song3", 1, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();

        let artists = nav.list_artists(&index, &window(0, 10, None)).unwrap();
        assert_eq!(artists.total, 2);
        assert_eq!(names(&artists.items), vec!["Alice", "Bob"]);

        let alice = match nav.resolve_node(&index, artists.items[0].node_id).unwrap() {
            Some(NodeEntry::Artist(artist)) => artist,
            other => panic!("expected artist, got {:?}", other),
        };

        let albums = nav
            .albums_for_artist(&index, &alice, &window(0, 2, None))
            .unwrap();
        assert_eq!(albums.total, 2);
        assert_eq!(names(&albums.items), vec![ALL_TRACKS_NAME, "AlbumX"]);

        let album = match nav.resolve_node(&index, albums.items[1].node_id).unwrap() {
            Some(NodeEntry::Album(album)) => album,
            other => panic!("expected album, got {:?}", other),
        };

        let tracks = nav
            .tracks_for_album(&index, &album, &window(0, 2, None))
            .unwrap();
        assert_eq!(tracks.total, 2);
        assert_eq!(titles(&tracks.items), vec!["Song1", "Song2"]);
    }

    #[test]
    fn album_tracks_follow_track_number() {
        let (_dir, source) = library(&[
            track("A", "X", "Zebra", 1, &[]),
            track("A", "X", "Apple", 3, &[]),
            track("A", "X", "Mango", 2, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();

        let album = index.album_by_name("X", "A").unwrap().unwrap();
        let tracks = nav
            .tracks_for_album(&index, &album, &window(0, 3, None))
            .unwrap();
        assert_eq!(tracks.total, 3);
        assert_eq!(titles(&tracks.items), vec!["Zebra", "Mango", "Apple"]);
    }

    #[test]
    fn all_tracks_entry_only_on_first_page() {
        let (_dir, source) = library(&[
            track("A", "Beta", "x", 1, &[]),
            track("A", "Alpha", "y", 1, &[]),
            track("A", "Gamma", "z", 1, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();
        let artist = index.artist_by_name("A").unwrap().unwrap();

        let first = nav
            .albums_for_artist(&index, &artist, &window(0, 2, None))
            .unwrap();
        assert_eq!(first.total, 4);
        assert_eq!(names(&first.items), vec![ALL_TRACKS_NAME, "Alpha"]);

        let second = nav
            .albums_for_artist(&index, &artist, &window(2, 2, None))
            .unwrap();
        assert_eq!(second.total, 4);
        assert_eq!(names(&second.items), vec!["Beta", "Gamma"]);
    }

    #[test]
    fn superscroll_cursor_is_reused_for_next_page() {
        let (_dir, source) = library(&[
            track("Abba", "a", "x", 1, &[]),
            track("Abbey", "b", "x", 1, &[]),
            track("abc", "c", "x", 1, &[]),
            track("Beatles", "d", "x", 1, &[]),
            track("Cream", "e", "x", 1, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();

        let first = nav.list_artists(&index, &window(0, 2, Some("ab"))).unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(names(&first.items), vec!["Abba", "Abbey"]);

        let next = nav.list_artists(&index, &window(2, 2, None)).unwrap();
        assert_eq!(next.total, 3);
        assert_eq!(names(&next.items), vec!["abc"]);

        nav.superscroll.clear(client());

        let unfiltered = nav.list_artists(&index, &window(2, 2, None)).unwrap();
        assert_eq!(unfiltered.total, 5);
        assert_eq!(names(&unfiltered.items), vec!["abc", "Beatles"]);
    }

    #[test]
    fn superscroll_is_scoped_to_operation_and_client() {
        let (_dir, source) = library(&[
            track("Abba", "Zoo", "x", 1, &[]),
            track("Cream", "Arrival", "y", 1, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();

        nav.list_artists(&index, &window(0, 10, Some("c"))).unwrap();

        let albums = nav.list_albums(&index, &window(0, 10, None)).unwrap();
        assert_eq!(names(&albums.items), vec!["Arrival", "Zoo"]);

        let other = Window {
            client: "192.168.1.21".parse().unwrap(),
            from: 0,
            count: 10,
            superscroll: None,
        };
        let artists = nav.list_artists(&index, &other).unwrap();
        assert_eq!(artists.total, 2);
    }

    #[test]
    fn genre_tracks_sort_by_name_and_filter() {
        let (_dir, source) = library(&[
            track("A", "X", "Song B", 1, &["Rock"]),
            track("B", "Y", "song a", 1, &["Rock"]),
            track("C", "Z", "Other", 1, &["Rock", "Jazz"]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();
        let rock = index.genre_by_name("Rock").unwrap().unwrap();

        let all = nav
            .tracks_for_genre(&index, &rock, &window(0, 10, None))
            .unwrap();
        assert_eq!(titles(&all.items), vec!["Other", "song a", "Song B"]);

        let filtered = nav
            .tracks_for_genre(&index, &rock, &window(0, 1, Some("so")))
            .unwrap();
        assert_eq!(filtered.total, 2);
        assert_eq!(titles(&filtered.items), vec!["song a"]);

        let rest = nav
            .tracks_for_genre(&index, &rock, &window(1, 1, None))
            .unwrap();
        assert_eq!(rest.total, 2);
        assert_eq!(titles(&rest.items), vec!["Song B"]);

        let jazz = index.genre_by_name("Jazz").unwrap().unwrap();
        let jazz_tracks = nav
            .tracks_for_genre(&index, &jazz, &window(0, 10, None))
            .unwrap();
        assert_eq!(titles(&jazz_tracks.items), vec!["Other"]);
    }

    #[test]
    fn all_tracks_next_page_continues_filtered_cursor() {
        let (_dir, source) = library(&[
            track("A", "X", "Sun", 1, &[]),
            track("A", "X", "Moon", 2, &[]),
            track("A", "Y", "Summer", 1, &[]),
            track("A", "Y", "Storm", 2, &[]),
            track("A", "Y", "Rain", 3, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();
        let artist = index.artist_by_name("A").unwrap().unwrap();
        let all_tracks = index.all_tracks(artist.all_tracks_id).unwrap().unwrap();

        let first = nav
            .all_tracks_for_artist(&index, &all_tracks, &window(0, 2, Some("s")))
            .unwrap();
        assert_eq!(first.total, 3);
        assert_eq!(titles(&first.items), vec!["Storm", "Summer"]);

        let next = nav
            .all_tracks_for_artist(&index, &all_tracks, &window(2, 2, None))
            .unwrap();
        assert_eq!(next.total, 3);
        assert_eq!(titles(&next.items), vec!["Sun"]);
    }

    #[test]
    fn genre_cursor_is_not_reused_for_another_genre() {
        let (_dir, source) = library(&[
            track("A", "X", "Alpha", 1, &["Rock"]),
            track("A", "X", "Beta", 2, &["Rock"]),
            track("B", "Y", "Gamma", 1, &["Jazz"]),
            track("B", "Y", "Delta", 2, &["Jazz"]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();
        let rock = index.genre_by_name("Rock").unwrap().unwrap();
        let jazz = index.genre_by_name("Jazz").unwrap().unwrap();

        let filtered = nav
            .tracks_for_genre(&index, &rock, &window(0, 10, Some("b")))
            .unwrap();
        assert_eq!(titles(&filtered.items), vec!["Beta"]);

        let other = nav
            .tracks_for_genre(&index, &jazz, &window(0, 10, None))
            .unwrap();
        assert_eq!(other.total, 2);
        assert_eq!(titles(&other.items), vec!["Delta", "Gamma"]);

        // The cursor still belongs to the first genre
        let again = nav
            .tracks_for_genre(&index, &rock, &window(0, 10, None))
            .unwrap();
        assert_eq!(again.total, 1);
        assert_eq!(titles(&again.items), vec!["Beta"]);
    }

    #[test]
    fn all_tracks_break_name_ties_by_number() {
        let (_dir, source) = library(&[
            track("A", "Live", "Intro", 2, &[]),
            track("A", "Studio", "Intro", 1, &[]),
            track("A", "Studio", "Outro", 3, &[]),
        ]);
        let index = source.get().unwrap();
        let nav = navigator();
        let artist = index.artist_by_name("A").unwrap().unwrap();
        let all_tracks = index.all_tracks(artist.all_tracks_id).unwrap().unwrap();

        let page = nav
            .all_tracks_for_artist(&index, &all_tracks, &window(0, 10, None))
            .unwrap();
        assert_eq!(page.total, 3);
        let order: Vec<(&str, i64)> = page
            .items
            .iter()
            .map(|t| (t.name.as_str(), t.number))
            .collect();
        assert_eq!(order, vec![("Intro", 1), ("Intro", 2), ("Outro", 3)]);
    }

    #[test]
    fn resolves_each_node_type() {
        let (_dir, source) = library(&[track("A", "X", "Song", 1, &["Rock"])]);
        let index = source.get().unwrap();
        let nav = navigator();

        let artist = index.artist_by_name("A").unwrap().unwrap();
        let all_tracks = index.all_tracks(artist.all_tracks_id).unwrap().unwrap();
        let album = index.album_by_name("X", "A").unwrap().unwrap();
        let genre = index.genre_by_name("Rock").unwrap().unwrap();
        let track = index.tracks().unwrap().pop().unwrap();

        let resolve = |id| nav.resolve_node(&index, id).unwrap().map(|e| e.node_type());

        assert_eq!(resolve(artist.node_id), Some(NodeType::Artist));
        assert_eq!(resolve(all_tracks.node_id), Some(NodeType::AllTracks));
        assert_eq!(resolve(album.node_id), Some(NodeType::Album));
        assert_eq!(resolve(genre.node_id), Some(NodeType::Genre));
        assert_eq!(resolve(track.node_id), Some(NodeType::Track));
        assert_eq!(resolve(99_999), None);
    }
}
