use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use rusqlite::types::Type;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, OptionalExtension, Result, Row, Transaction};
use serde::Serialize;

use crate::db_meta::{self, NodeIds};
use crate::schema;

pub const ROOT_NODE: i64 = 0;
pub const ARTISTS_NODE: i64 = 1;
pub const ALBUMS_NODE: i64 = 2;
pub const GENRES_NODE: i64 = 3;

/// SQL function folding text to lower case, for prefix filters.
pub const FOLD_FUNCTION: &str = "fold";
/// Collation ordering by folded text, original text breaking ties.
pub const FOLD_COLLATION: &str = "UNICASE";

/// Unicode-aware case fold used on both sides of name comparisons.
pub fn fold(text: &str) -> String {
    text.to_lowercase()
}

fn register_folding(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        FOLD_FUNCTION,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| fold(&t)))
        },
    )?;

    conn.create_collation(FOLD_COLLATION, |a, b| {
        fold(a).cmp(&fold(b)).then_with(|| a.cmp(b))
    })
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum NodeType {
    Artist,
    AllTracks,
    Album,
    Genre,
    Track,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Track {
    #[serde(skip)]
    pub track_id: i64,
    pub node_id: i64,
    pub file: PathBuf,
    pub artist: String,
    pub album: String,
    pub name: String,
    pub number: i64,
    pub year: Option<i64>,
    pub genres: Vec<String>,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Album {
    pub album_id: i64,
    pub node_id: i64,
    pub name: String,
    pub artist: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Genre {
    pub genre_id: i64,
    pub node_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artist {
    pub artist_id: i64,
    pub node_id: i64,
    pub name: String,
    pub all_tracks_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllTracks {
    pub all_tracks_id: i64,
    pub node_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistByLetter {
    pub letter_id: i64,
    pub node_id: i64,
    pub name: String,
}

/// A named child in a listing, as the device sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Branch {
    pub name: String,
    pub node_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeEntry {
    Artist(Artist),
    AllTracks(AllTracks),
    Album(Album),
    Genre(Genre),
    Track(Track),
}

impl NodeEntry {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeEntry::Artist(_) => NodeType::Artist,
            NodeEntry::AllTracks(_) => NodeType::AllTracks,
            NodeEntry::Album(_) => NodeType::Album,
            NodeEntry::Genre(_) => NodeType::Genre,
            NodeEntry::Track(_) => NodeType::Track,
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct IndexStats {
    pub tracks: i64,
    pub artists: i64,
    pub albums: i64,
    pub genres: i64,
}

#[derive(Clone)]
pub struct IndexSource {
    db_path: PathBuf,
}

pub struct Index {
    conn: Connection,
}

impl IndexSource {
    pub fn create(db_path: PathBuf) -> Result<Option<IndexSource>> {
        info!("using '{}'", db_path.to_string_lossy());

        let source = IndexSource { db_path };

        let mut index = source.get()?;
        if !db_meta::ensure_schema(&mut index.conn, schema::INDEX_SCHEMA)? {
            return Ok(None);
        }

        Ok(Some(source))
    }

    pub fn get(&self) -> Result<Index> {
        let conn = match Connection::open(&self.db_path) {
            Ok(c) => c,
            Err(e) => {
                error!(
                    "can't open sqlite database '{}': {}",
                    self.db_path.to_string_lossy(),
                    e
                );
                return Err(e);
            }
        };

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;",
        )?;

        register_folding(&conn)?;

        Ok(Index { conn })
    }
}

impl Index {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Starts a transaction on the shared connection; every `Index` call made
    /// before `commit` belongs to it.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.conn.unchecked_transaction()
    }

    pub(crate) fn track_from_row(row: &Row) -> Result<Track> {
        let file_bytes: Vec<u8> = row.get(2)?;
        let genres_json: String = row.get(8)?;
        let genres = serde_json::from_str(&genres_json)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

        Ok(Track {
            track_id: row.get(0)?,
            node_id: row.get(1)?,
            file: Path::new(OsStr::from_bytes(&file_bytes)).to_path_buf(),
            artist: row.get(3)?,
            album: row.get(4)?,
            name: row.get(5)?,
            number: row.get(6)?,
            year: row.get(7)?,
            genres,
            duration: row.get(9)?,
        })
    }

    fn _query_tracks(&self, sql: &str, value: i64) -> Result<Vec<Track>> {
        let mut st = self.conn.prepare(sql)?;
        let mut rows = st.query([value])?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            result.push(Self::track_from_row(row)?);
        }

        Ok(result)
    }

    pub fn track(&self, track_id: i64) -> Result<Option<Track>> {
        trace!("get track track_id={}", track_id);

        Ok(self
            ._query_tracks(
                "SELECT track_id, node_id, file, artist, album, name, number, year, genres, duration
                FROM Track
                WHERE track_id = ?",
                track_id,
            )?
            .pop())
    }

    pub fn track_by_node(&self, node_id: i64) -> Result<Option<Track>> {
        trace!("get track node_id={}", node_id);

        Ok(self
            ._query_tracks(
                "SELECT track_id, node_id, file, artist, album, name, number, year, genres, duration
                FROM Track
                WHERE node_id = ?",
                node_id,
            )?
            .pop())
    }

    /// Every indexed track in insertion order.
    pub fn tracks(&self) -> Result<Vec<Track>> {
        self._query_tracks(
            "SELECT track_id, node_id, file, artist, album, name, number, year, genres, duration
            FROM Track
            WHERE track_id > ?
            ORDER BY track_id",
            0,
        )
    }

    pub fn track_files(&self) -> Result<Vec<(i64, PathBuf)>> {
        let mut st = self.conn.prepare("SELECT track_id, file FROM Track")?;
        let mut rows = st.query([])?;

        let mut result = Vec::new();
        while let Some(row) = rows.next()? {
            let file_bytes: Vec<u8> = row.get(1)?;
            result.push((
                row.get(0)?,
                Path::new(OsStr::from_bytes(&file_bytes)).to_path_buf(),
            ));
        }

        Ok(result)
    }

    /// Inserts `track`, ignoring its `track_id` and `node_id`; a fresh node id
    /// is taken from `ids`.
    pub fn create_track(&self, track: &Track, ids: &mut NodeIds) -> Result<Track> {
        let genres = serde_json::to_string(&track.genres)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let mut st = self.conn.prepare(
            "INSERT INTO Track (node_id, file, artist, album, name, number, year, genres, duration)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;

        st.execute(params![
            ids.take(),
            track.file.as_os_str().as_bytes(),
            track.artist,
            track.album,
            track.name,
            track.number,
            track.year,
            genres,
            track.duration,
        ])?;

        let track_id = self.conn.last_insert_rowid();
        let result = self
            .track(track_id)?
            .ok_or(rusqlite::Error::QueryReturnedNoRows)?;

        debug!("create {:?}", result);

        Ok(result)
    }

    pub fn delete_track(&self, track_id: i64) -> Result<()> {
        trace!("delete track track_id={}", track_id);

        self.conn
            .execute("DELETE FROM Track WHERE track_id = ?", [track_id])?;
        Ok(())
    }

    fn _get_album(row: &Row) -> Result<Album> {
        Ok(Album {
            album_id: row.get(0)?,
            node_id: row.get(1)?,
            name: row.get(2)?,
            artist: row.get(3)?,
        })
    }

    pub fn album_by_node(&self, node_id: i64) -> Result<Option<Album>> {
        trace!("get album node_id={}", node_id);

        self.conn
            .query_row(
                "SELECT album_id, node_id, name, artist FROM Album WHERE node_id = ?",
                [node_id],
                Self::_get_album,
            )
            .optional()
    }

    pub fn album_by_name(&self, name: &str, artist: &str) -> Result<Option<Album>> {
        self.conn
            .query_row(
                "SELECT album_id, node_id, name, artist FROM Album WHERE name = ? AND artist = ?",
                params![name, artist],
                Self::_get_album,
            )
            .optional()
    }

    pub fn albums(&self) -> Result<Vec<Album>> {
        let mut st = self
            .conn
            .prepare("SELECT album_id, node_id, name, artist FROM Album ORDER BY album_id")?;
        let rows = st.query_map([], Self::_get_album)?;
        rows.collect()
    }

    fn _get_genre(row: &Row) -> Result<Genre> {
        Ok(Genre {
            genre_id: row.get(0)?,
            node_id: row.get(1)?,
            name: row.get(2)?,
        })
    }

    pub fn genre_by_node(&self, node_id: i64) -> Result<Option<Genre>> {
        trace!("get genre node_id={}", node_id);

        self.conn
            .query_row(
                "SELECT genre_id, node_id, name FROM Genre WHERE node_id = ?",
                [node_id],
                Self::_get_genre,
            )
            .optional()
    }

    pub fn genre_by_name(&self, name: &str) -> Result<Option<Genre>> {
        self.conn
            .query_row(
                "SELECT genre_id, node_id, name FROM Genre WHERE name = ?",
                [name],
                Self::_get_genre,
            )
            .optional()
    }

    fn _get_artist(row: &Row) -> Result<Artist> {
        Ok(Artist {
            artist_id: row.get(0)?,
            node_id: row.get(1)?,
            name: row.get(2)?,
            all_tracks_id: row.get(3)?,
        })
    }

    pub fn artist_by_node(&self, node_id: i64) -> Result<Option<Artist>> {
        trace!("get artist node_id={}", node_id);

        self.conn
            .query_row(
                "SELECT artist_id, node_id, name, all_tracks_id FROM Artist WHERE node_id = ?",
                [node_id],
                Self::_get_artist,
            )
            .optional()
    }

    pub fn artist_by_name(&self, name: &str) -> Result<Option<Artist>> {
        trace!("get artist name={}", name);

        self.conn
            .query_row(
                "SELECT artist_id, node_id, name, all_tracks_id FROM Artist WHERE name = ?",
                [name],
                Self::_get_artist,
            )
            .optional()
    }

    fn _get_all_tracks(row: &Row) -> Result<AllTracks> {
        Ok(AllTracks {
            all_tracks_id: row.get(0)?,
            node_id: row.get(1)?,
            name: row.get(2)?,
        })
    }

    pub fn all_tracks(&self, all_tracks_id: i64) -> Result<Option<AllTracks>> {
        self.conn
            .query_row(
                "SELECT all_tracks_id, node_id, name FROM AllTracks WHERE all_tracks_id = ?",
                [all_tracks_id],
                Self::_get_all_tracks,
            )
            .optional()
    }

    pub fn all_tracks_by_node(&self, node_id: i64) -> Result<Option<AllTracks>> {
        trace!("get all tracks node_id={}", node_id);

        self.conn
            .query_row(
                "SELECT all_tracks_id, node_id, name FROM AllTracks WHERE node_id = ?",
                [node_id],
                Self::_get_all_tracks,
            )
            .optional()
    }

    pub fn artist_by_letter(&self, letter: &str) -> Result<Option<ArtistByLetter>> {
        self.conn
            .query_row(
                "SELECT letter_id, node_id, name FROM ArtistByLetter WHERE name = ?",
                [letter],
                |row| {
                    Ok(ArtistByLetter {
                        letter_id: row.get(0)?,
                        node_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn upsert_genre(&self, name: &str, track_id: i64, ids: &mut NodeIds) -> Result<()> {
        let genre_id = match self.genre_by_name(name)? {
            Some(genre) => genre.genre_id,
            None => {
                self.conn.execute(
                    "INSERT INTO Genre (node_id, name) VALUES (?, ?)",
                    params![ids.take(), name],
                )?;
                debug!("create genre '{}'", name);
                self.conn.last_insert_rowid()
            }
        };

        self.conn.execute(
            "INSERT OR IGNORE INTO GenreTrack (genre_id, track_id) VALUES (?, ?)",
            [genre_id, track_id],
        )?;
        Ok(())
    }

    pub fn upsert_album(
        &self,
        name: &str,
        artist: &str,
        track_id: i64,
        ids: &mut NodeIds,
    ) -> Result<()> {
        let album_id = match self.album_by_name(name, artist)? {
            Some(album) => album.album_id,
            None => {
                self.conn.execute(
                    "INSERT INTO Album (node_id, name, artist) VALUES (?, ?, ?)",
                    params![ids.take(), name, artist],
                )?;
                debug!("create album '{}' by '{}'", name, artist);
                self.conn.last_insert_rowid()
            }
        };

        self.conn.execute(
            "INSERT OR IGNORE INTO AlbumTrack (album_id, track_id) VALUES (?, ?)",
            [album_id, track_id],
        )?;
        Ok(())
    }

    /// Attaches `album` to its artist, creating the artist together with its
    /// "All Tracks" aggregate when needed. The aggregate is extended with the
    /// album's tracks either way.
    pub fn upsert_artist(&self, album: &Album, ids: &mut NodeIds) -> Result<Artist> {
        let artist = match self.artist_by_name(&album.artist)? {
            Some(artist) => artist,
            None => {
                self.conn.execute(
                    "INSERT INTO AllTracks (node_id, name) VALUES (?, ?)",
                    params![ids.take(), album.artist],
                )?;
                let all_tracks_id = self.conn.last_insert_rowid();

                self.conn.execute(
                    "INSERT INTO Artist (node_id, name, all_tracks_id) VALUES (?, ?, ?)",
                    params![ids.take(), album.artist, all_tracks_id],
                )?;
                debug!("create artist '{}'", album.artist);

                self.artist_by_name(&album.artist)?
                    .ok_or(rusqlite::Error::QueryReturnedNoRows)?
            }
        };

        self.conn.execute(
            "INSERT OR IGNORE INTO ArtistAlbum (artist_id, album_id) VALUES (?, ?)",
            [artist.artist_id, album.album_id],
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO AllTracksTrack (all_tracks_id, track_id)
            SELECT ?, track_id FROM AlbumTrack WHERE album_id = ?",
            [artist.all_tracks_id, album.album_id],
        )?;

        Ok(artist)
    }

    pub fn upsert_artist_letter(&self, artist: &Artist, ids: &mut NodeIds) -> Result<()> {
        let letter: String = match artist.name.chars().next() {
            Some(c) => c.to_uppercase().collect(),
            None => return Ok(()),
        };

        let letter_id = match self.artist_by_letter(&letter)? {
            Some(entry) => entry.letter_id,
            None => {
                self.conn.execute(
                    "INSERT INTO ArtistByLetter (node_id, name) VALUES (?, ?)",
                    params![ids.take(), letter],
                )?;
                self.conn.last_insert_rowid()
            }
        };

        self.conn.execute(
            "INSERT OR IGNORE INTO ArtistByLetterArtist (letter_id, artist_id) VALUES (?, ?)",
            [letter_id, artist.artist_id],
        )?;
        Ok(())
    }

    /// Rebuilds genre, album, artist, all-tracks and artist-by-letter
    /// membership from every indexed track. Safe to run repeatedly: existing
    /// rows are matched by name and only gain missing references.
    pub fn derive(&self, ids: &mut NodeIds) -> Result<()> {
        let before = ids.issued();

        for track in self.tracks()? {
            for genre in &track.genres {
                self.upsert_genre(genre, track.track_id, ids)?;
            }

            self.upsert_album(&track.album, &track.artist, track.track_id, ids)?;
        }

        for album in self.albums()? {
            let artist = self.upsert_artist(&album, ids)?;
            self.upsert_artist_letter(&artist, ids)?;
        }

        debug!("derivation issued {} node ids", ids.issued() - before);

        Ok(())
    }

    pub fn stats(&self) -> Result<IndexStats> {
        let count = |table: &str| -> Result<i64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get(0)
                })
        };

        Ok(IndexStats {
            tracks: count("Track")?,
            artists: count("Artist")?,
            albums: count("Album")?,
            genres: count("Genre")?,
        })
    }
}

/// Raw relationship rows, for checking derivation.
#[cfg(test)]
impl Index {
    fn _ids(&self, sql: &str, value: i64) -> Result<Vec<i64>> {
        let mut st = self.conn.prepare(sql)?;
        let rows = st.query_map([value], |row| row.get(0))?;
        rows.collect()
    }

    /// Raw track references of an album, including ones left dangling by
    /// removed files.
    pub fn album_track_ids(&self, album_id: i64) -> Result<Vec<i64>> {
        self._ids(
            "SELECT track_id FROM AlbumTrack WHERE album_id = ? ORDER BY track_id",
            album_id,
        )
    }

    pub fn genre_track_ids(&self, genre_id: i64) -> Result<Vec<i64>> {
        self._ids(
            "SELECT track_id FROM GenreTrack WHERE genre_id = ? ORDER BY track_id",
            genre_id,
        )
    }

    pub fn artist_album_ids(&self, artist_id: i64) -> Result<Vec<i64>> {
        self._ids(
            "SELECT album_id FROM ArtistAlbum WHERE artist_id = ? ORDER BY album_id",
            artist_id,
        )
    }

    pub fn all_tracks_track_ids(&self, all_tracks_id: i64) -> Result<Vec<i64>> {
        self._ids(
            "SELECT track_id FROM AllTracksTrack WHERE all_tracks_id = ? ORDER BY track_id",
            all_tracks_id,
        )
    }

    pub fn letter_artist_ids(&self, letter_id: i64) -> Result<Vec<i64>> {
        self._ids(
            "SELECT artist_id FROM ArtistByLetterArtist WHERE letter_id = ? ORDER BY artist_id",
            letter_id,
        )
    }
}
