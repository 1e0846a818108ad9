//! Fixtures shared by the unit tests.

use std::path::PathBuf;

use tempfile::TempDir;

use crate::db_meta::NodeIds;
use crate::index::{IndexSource, Track};

pub const MUSIC_ROOT: &str = "/music";

pub fn track(artist: &str, album: &str, name: &str, number: i64, genres: &[&str]) -> Track {
    Track {
        track_id: 0,
        node_id: 0,
        file: PathBuf::from(format!("{}/{}/{}/{}.mp3", MUSIC_ROOT, artist, album, name)),
        artist: artist.to_string(),
        album: album.to_string(),
        name: name.to_string(),
        number,
        year: Some(2001),
        genres: genres.iter().map(|g| g.to_string()).collect(),
        duration: 200.75,
    }
}

/// Creates an index in a temporary directory holding `tracks`, fully derived.
pub fn library(tracks: &[Track]) -> (TempDir, IndexSource) {
    let dir = tempfile::tempdir().unwrap();
    let source = IndexSource::create(dir.path().join("index.db"))
        .unwrap()
        .unwrap();

    let index = source.get().unwrap();
    let tx = index.transaction().unwrap();
    let mut ids = NodeIds::load(index.connection()).unwrap();
    for track in tracks {
        index.create_track(track, &mut ids).unwrap();
    }
    index.derive(&mut ids).unwrap();
    ids.save(index.connection()).unwrap();
    tx.commit().unwrap();

    (dir, source)
}
