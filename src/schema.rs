pub const SCHEMA_VERSION: u32 = 1;

pub const META_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS Streamium (
    key TEXT PRIMARY KEY,
    value);
";

// Row ids are AUTOINCREMENT so a deleted Track row id is never handed out
// again while derived tables may still reference it.
pub const INDEX_SCHEMA: &str = "
CREATE TABLE Track (
    track_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL UNIQUE,
    file TEXT NOT NULL UNIQUE,
    artist TEXT NOT NULL,
    album TEXT NOT NULL,
    name TEXT NOT NULL,
    number INTEGER NOT NULL,
    year INTEGER,
    genres TEXT NOT NULL,
    duration REAL NOT NULL);

CREATE TABLE Album (
    album_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    artist TEXT NOT NULL,
    UNIQUE(name, artist));

CREATE TABLE AlbumTrack (
    album_id INTEGER NOT NULL,
    track_id INTEGER NOT NULL,
    PRIMARY KEY(album_id, track_id),
    FOREIGN KEY(album_id) REFERENCES Album(album_id) ON DELETE CASCADE);

CREATE TABLE Genre (
    genre_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE);

CREATE TABLE GenreTrack (
    genre_id INTEGER NOT NULL,
    track_id INTEGER NOT NULL,
    PRIMARY KEY(genre_id, track_id),
    FOREIGN KEY(genre_id) REFERENCES Genre(genre_id) ON DELETE CASCADE);

CREATE TABLE AllTracks (
    all_tracks_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL);

CREATE TABLE AllTracksTrack (
    all_tracks_id INTEGER NOT NULL,
    track_id INTEGER NOT NULL,
    PRIMARY KEY(all_tracks_id, track_id),
    FOREIGN KEY(all_tracks_id) REFERENCES AllTracks(all_tracks_id) ON DELETE CASCADE);

CREATE TABLE Artist (
    artist_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE,
    all_tracks_id INTEGER NOT NULL,
    FOREIGN KEY(all_tracks_id) REFERENCES AllTracks(all_tracks_id));

CREATE TABLE ArtistAlbum (
    artist_id INTEGER NOT NULL,
    album_id INTEGER NOT NULL,
    PRIMARY KEY(artist_id, album_id),
    FOREIGN KEY(artist_id) REFERENCES Artist(artist_id) ON DELETE CASCADE);

CREATE TABLE ArtistByLetter (
    letter_id INTEGER PRIMARY KEY AUTOINCREMENT,
    node_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL UNIQUE);

CREATE TABLE ArtistByLetterArtist (
    letter_id INTEGER NOT NULL,
    artist_id INTEGER NOT NULL,
    PRIMARY KEY(letter_id, artist_id),
    FOREIGN KEY(letter_id) REFERENCES ArtistByLetter(letter_id) ON DELETE CASCADE);

CREATE INDEX AlbumTrack_track_id ON AlbumTrack (track_id);
CREATE INDEX GenreTrack_track_id ON GenreTrack (track_id);
CREATE INDEX AllTracksTrack_track_id ON AllTracksTrack (track_id);
";
