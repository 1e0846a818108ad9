use rusqlite::types::ToSql;
use rusqlite::{params_from_iter, Connection, Statement};

use crate::index::{self, Branch, Index, Track};

const TRACK_COLUMNS: &str = "SELECT Track.track_id, Track.node_id, Track.file, Track.artist,
    Track.album, Track.name, Track.number, Track.year, Track.genres, Track.duration";

struct QueryOptions {
    clauses: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
    order_string: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

impl QueryOptions {
    pub fn new() -> QueryOptions {
        QueryOptions {
            clauses: Vec::new(),
            values: Vec::new(),
            order_string: None,
            limit: None,
            offset: None,
        }
    }

    pub fn filter_value<T>(&mut self, clause: &str, value: T)
    where
        T: ToSql,
        T: 'static,
    {
        self.clauses.push(clause.to_string());
        self.values.push(Box::new(value));
    }

    /// Case-insensitive name prefix match on `column`. Both sides go through
    /// `fold` so non-ASCII letters match regardless of case.
    pub fn filter_prefix(&mut self, column: &str, prefix: Option<&str>) {
        if let Some(prefix) = prefix {
            self.filter_value(
                &format!("{}({}) LIKE ? ESCAPE '\\'", index::FOLD_FUNCTION, column),
                like_prefix_pattern(&index::fold(prefix)),
            );
        }
    }

    pub fn order_string(&mut self, order_string: &str) {
        self.order_string = Some(order_string.to_string());
    }

    pub fn bind_range(&mut self, range: Option<Range>) {
        if let Some(range) = range {
            self.limit = Some(range.count as i64);
            self.offset = Some(range.from as i64);
        }
    }

    fn where_sql(&self, select_from: &str) -> String {
        let mut sql = select_from.to_string();

        if !self.clauses.is_empty() {
            sql += " WHERE ";
            sql += &self.clauses.join(" AND ");
        }

        sql
    }

    pub fn get_total(&self, conn: &Connection, select_from: &str) -> Result<i64, rusqlite::Error> {
        let sql = self.where_sql(select_from);

        let mut st = conn.prepare(&sql)?;

        st.query_row(params_from_iter(self.values.iter()), |row| row.get(0))
    }

    pub fn into_items_query<'a>(
        mut self,
        conn: &'a Connection,
        select_from: &str,
    ) -> Result<(Statement<'a>, Vec<Box<dyn ToSql>>), rusqlite::Error> {
        let mut sql = self.where_sql(select_from);

        if let Some(order) = self.order_string {
            sql += " ORDER BY ";
            sql += &order;
        }

        if let Some(limit) = self.limit {
            sql += " LIMIT ?";
            self.values.push(Box::new(limit));
        }

        if let Some(offset) = self.offset {
            sql += " OFFSET ?";
            self.values.push(Box::new(offset));
        }

        let st = conn.prepare(&sql)?;

        Ok((st, self.values))
    }
}

fn like_prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);

    for c in prefix.chars() {
        if c == '%' || c == '_' || c == '\\' {
            pattern.push('\\');
        }
        pattern.push(c);
    }

    pattern.push('%');
    pattern
}

/// Page window: skip `from` rows, return at most `count`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Range {
    pub from: usize,
    pub count: usize,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Collection {
    Artists,
    Albums,
    Genres,
}

impl Collection {
    fn table(self) -> &'static str {
        match self {
            Collection::Artists => "Artist",
            Collection::Albums => "Album",
            Collection::Genres => "Genre",
        }
    }
}

/// Track containers and the order their tracks are listed in.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TrackSource {
    Album(i64),
    Genre(i64),
    AllTracks(i64),
}

impl TrackSource {
    fn join(self) -> (&'static str, &'static str, i64) {
        match self {
            TrackSource::Album(id) => (
                "INNER JOIN AlbumTrack ON AlbumTrack.track_id = Track.track_id",
                "AlbumTrack.album_id = ?",
                id,
            ),
            TrackSource::Genre(id) => (
                "INNER JOIN GenreTrack ON GenreTrack.track_id = Track.track_id",
                "GenreTrack.genre_id = ?",
                id,
            ),
            TrackSource::AllTracks(id) => (
                "INNER JOIN AllTracksTrack ON AllTracksTrack.track_id = Track.track_id",
                "AllTracksTrack.all_tracks_id = ?",
                id,
            ),
        }
    }

    fn order(self) -> &'static str {
        match self {
            TrackSource::Album(_) => "Track.number, Track.name COLLATE UNICASE",
            TrackSource::Genre(_) => "Track.name COLLATE UNICASE, Track.node_id",
            TrackSource::AllTracks(_) => "Track.name COLLATE UNICASE, Track.number, Track.node_id",
        }
    }
}

/// Lists a top-level collection sorted case-insensitively by name. Returns
/// the number of matches and the rows inside `range` (all rows when `None`).
pub fn query_branches(
    index: &Index,
    collection: Collection,
    prefix: Option<&str>,
    range: Option<Range>,
) -> Result<(i64, Vec<Branch>), rusqlite::Error> {
    let table = collection.table();

    let mut opts = QueryOptions::new();
    opts.filter_prefix("name", prefix);
    opts.order_string("name COLLATE UNICASE, node_id");
    opts.bind_range(range);

    let conn = index.connection();

    let total = opts.get_total(conn, &format!("SELECT COUNT(*) FROM {}", table))?;

    let (mut st, values) =
        opts.into_items_query(conn, &format!("SELECT name, node_id FROM {}", table))?;

    let items = st
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(Branch {
                name: row.get(0)?,
                node_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok((total, items))
}

/// Every album of an artist, sorted by name.
pub fn query_artist_albums(index: &Index, artist_id: i64) -> Result<Vec<Branch>, rusqlite::Error> {
    let mut opts = QueryOptions::new();
    opts.filter_value("ArtistAlbum.artist_id = ?", artist_id);
    opts.order_string("Album.name COLLATE UNICASE, Album.node_id");

    let (mut st, values) = opts.into_items_query(
        index.connection(),
        "SELECT Album.name, Album.node_id
        FROM Album
        INNER JOIN ArtistAlbum ON ArtistAlbum.album_id = Album.album_id",
    )?;

    let items = st
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(Branch {
                name: row.get(0)?,
                node_id: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(items)
}

/// Lists the tracks of a container. References to removed tracks drop out
/// through the inner join.
pub fn query_tracks(
    index: &Index,
    source: TrackSource,
    prefix: Option<&str>,
    range: Option<Range>,
) -> Result<(i64, Vec<Track>), rusqlite::Error> {
    let (join, clause, id) = source.join();

    let mut opts = QueryOptions::new();
    opts.filter_value(clause, id);
    opts.filter_prefix("Track.name", prefix);
    opts.order_string(source.order());
    opts.bind_range(range);

    let conn = index.connection();

    let total = opts.get_total(
        conn,
        &format!("SELECT COUNT(Track.track_id) FROM Track {}", join),
    )?;

    let (mut st, values) =
        opts.into_items_query(conn, &format!("{} FROM Track {}", TRACK_COLUMNS, join))?;

    let mut rows = st.query(params_from_iter(values.iter()))?;

    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(Index::track_from_row(row)?);
    }

    Ok((total, items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{library, track};

    fn names(items: &[Branch]) -> Vec<&str> {
        items.iter().map(|b| b.name.as_str()).collect()
    }

    #[test]
    fn branches_sort_case_insensitively() {
        let (_dir, source) = library(&[
            track("bob", "b", "x", 1, &[]),
            track("Alice", "a", "y", 1, &[]),
            track("Carol", "c", "z", 1, &[]),
        ]);
        let index = source.get().unwrap();

        let (total, items) = query_branches(&index, Collection::Artists, None, None).unwrap();
        assert_eq!(total, 3);
        assert_eq!(names(&items), vec!["Alice", "bob", "Carol"]);
    }

    #[test]
    fn non_ascii_names_sort_and_filter_without_case() {
        let (_dir, source) = library(&[
            track("Øystein", "a", "x", 1, &[]),
            track("émile", "b", "x", 1, &[]),
            track("ábc", "d", "x", 1, &[]),
            track("Émile Two", "e", "x", 1, &[]),
        ]);
        let index = source.get().unwrap();

        let (_, items) = query_branches(&index, Collection::Artists, None, None).unwrap();
        assert_eq!(names(&items), vec!["ábc", "émile", "Émile Two", "Øystein"]);

        let (total, items) =
            query_branches(&index, Collection::Artists, Some("É"), None).unwrap();
        assert_eq!(total, 2);
        assert_eq!(names(&items), vec!["émile", "Émile Two"]);

        let (total, items) =
            query_branches(&index, Collection::Artists, Some("ø"), None).unwrap();
        assert_eq!(total, 1);
        assert_eq!(names(&items), vec!["Øystein"]);
    }

    #[test]
    fn prefix_filter_ignores_case_and_escapes_wildcards() {
        let (_dir, source) = library(&[
            track("ABBA", "a", "x", 1, &[]),
            track("abc", "b", "x", 1, &[]),
            track("Bee Gees", "c", "x", 1, &[]),
            track("a_b", "d", "x", 1, &[]),
        ]);
        let index = source.get().unwrap();

        let (total, items) =
            query_branches(&index, Collection::Artists, Some("ab"), None).unwrap();
        assert_eq!(total, 2);
        assert_eq!(names(&items), vec!["ABBA", "abc"]);

        let (total, items) =
            query_branches(&index, Collection::Artists, Some("a_"), None).unwrap();
        assert_eq!(total, 1);
        assert_eq!(names(&items), vec!["a_b"]);
    }

    #[test]
    fn range_limits_items_but_not_total() {
        let (_dir, source) = library(&[
            track("A", "a1", "x", 1, &[]),
            track("A", "a2", "x", 1, &[]),
            track("A", "a3", "x", 1, &[]),
        ]);
        let index = source.get().unwrap();

        let range = Range { from: 1, count: 1 };
        let (total, items) =
            query_branches(&index, Collection::Albums, None, Some(range)).unwrap();
        assert_eq!(total, 3);
        assert_eq!(names(&items), vec!["a2"]);
    }

    #[test]
    fn removed_tracks_drop_out_of_containers() {
        let (_dir, source) = library(&[
            track("A", "a", "one", 1, &["Rock"]),
            track("A", "a", "two", 2, &["Rock"]),
        ]);
        let index = source.get().unwrap();

        let album = index.album_by_name("a", "A").unwrap().unwrap();
        let (_, tracks) =
            query_tracks(&index, TrackSource::Album(album.album_id), None, None).unwrap();
        index.delete_track(tracks[0].track_id).unwrap();

        let (total, tracks) =
            query_tracks(&index, TrackSource::Album(album.album_id), None, None).unwrap();
        assert_eq!(total, 1);
        assert_eq!(tracks[0].name, "two");
        assert_eq!(index.album_track_ids(album.album_id).unwrap().len(), 2);
    }
}
