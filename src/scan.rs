use std::convert::From;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::db_meta::NodeIds;
use crate::index::{Index, IndexSource, Track};
use crate::tags::{TagError, TagReader, TrackTags};

#[derive(Debug)]
pub enum Error {
    IoError(std::io::Error),
    DatabaseError(rusqlite::Error),
    JoinError(tokio::task::JoinError),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::IoError(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Error {
        Error::DatabaseError(err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Error {
        Error::JoinError(err)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IoError(e) => write!(f, "{}", e),
            Error::DatabaseError(e) => write!(f, "{}", e),
            Error::JoinError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Default, PartialEq)]
pub struct ScanStat {
    pub found: usize,
    pub removed: usize,
    pub added: usize,
    pub dropped: usize,
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(e) => extensions.iter().any(|x| x.eq_ignore_ascii_case(e)),
        None => false,
    }
}

async fn read_directory(
    dir: PathBuf,
    extensions: Arc<Vec<String>>,
) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    let mut entries = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let mut file_type = entry.file_type().await?;

        if file_type.is_symlink() {
            file_type = match tokio::fs::metadata(&path).await {
                Ok(m) => m.file_type(),
                Err(e) => {
                    debug!("dangling link '{}': {}", path.to_string_lossy(), e);
                    continue;
                }
            };

            // Linked directories could form cycles
            if file_type.is_dir() {
                trace!("not following directory link '{}'", path.to_string_lossy());
                continue;
            }
        }

        if file_type.is_dir() {
            dirs.push(path);
        } else if file_type.is_file() && has_extension(&path, &extensions) {
            files.push(path);
        }
    }

    Ok((files, dirs))
}

type DirRead = (PathBuf, std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)>);

fn spawn_read(tasks: &mut JoinSet<DirRead>, dir: PathBuf, extensions: Arc<Vec<String>>) {
    tasks.spawn(async move {
        let result = read_directory(dir.clone(), extensions).await;
        (dir, result)
    });
}

/// Every file under `root` with one of `extensions`, sorted by path.
/// Subdirectories are read concurrently; one that can't be read is logged
/// and skipped.
pub async fn find_audio_files(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let extensions = Arc::new(extensions.to_vec());

    let (mut files, dirs) = read_directory(root.to_path_buf(), extensions.clone()).await?;

    let mut tasks = JoinSet::new();
    for dir in dirs {
        spawn_read(&mut tasks, dir, extensions.clone());
    }

    while let Some(joined) = tasks.join_next().await {
        match joined? {
            (_, Ok((dir_files, dirs))) => {
                files.extend(dir_files);
                for dir in dirs {
                    spawn_read(&mut tasks, dir, extensions.clone());
                }
            }
            (dir, Err(e)) => {
                error!("can't read directory '{}': {}", dir.to_string_lossy(), e);
            }
        }
    }

    files.sort();

    Ok(files)
}

fn track_from_tags(file: PathBuf, tags: TrackTags) -> Option<Track> {
    let missing = tags.missing();
    if !missing.is_empty() {
        warn!(
            "'{}' is missing {}, skipping",
            file.to_string_lossy(),
            missing.join(", ")
        );
        return None;
    }

    Some(Track {
        track_id: 0,
        node_id: 0,
        file,
        artist: tags.artist.unwrap_or_default(),
        album: tags.album.unwrap_or_default(),
        name: tags.title.unwrap_or_default(),
        number: tags.number.unwrap_or_default() as i64,
        year: tags.year.map(|y| y as i64),
        genres: tags.genres,
        duration: tags.duration,
    })
}

pub struct Scanner {
    root: PathBuf,
    extensions: Vec<String>,
    concurrency: usize,
    reader: Arc<dyn TagReader>,
}

impl Scanner {
    pub fn new(
        root: PathBuf,
        extensions: Vec<String>,
        concurrency: usize,
        reader: Arc<dyn TagReader>,
    ) -> Scanner {
        Scanner {
            root,
            extensions,
            concurrency: concurrency.max(1),
            reader,
        }
    }

    /// Brings the index in line with the files under the music root.
    pub async fn run(&self, source: &IndexSource) -> Result<ScanStat> {
        info!("started");

        let start_instant = Instant::now();

        let files = find_audio_files(&self.root, &self.extensions).await?;

        debug!(
            "found {} files under '{}'",
            files.len(),
            self.root.to_string_lossy()
        );

        let (removed, new_files) = {
            let index = source.get()?;
            remove_missing(&index, &files)?
        };

        let mut stat = ScanStat {
            found: files.len(),
            removed,
            ..Default::default()
        };

        if new_files.is_empty() {
            debug!("no new files");
        } else {
            let candidates = new_files.len();
            let tracks = self.extract(new_files).await?;

            stat.dropped = candidates - tracks.len();

            if !tracks.is_empty() {
                let index = source.get()?;
                stat.added = insert_tracks(&index, tracks)?;
            }
        }

        let index = source.get()?;
        let index_stats = index.stats()?;

        info!(
            "done in {}s: {:?}, index has {} tracks, {} artists, {} albums, {} genres",
            start_instant.elapsed().as_secs(),
            stat,
            index_stats.tracks,
            index_stats.artists,
            index_stats.albums,
            index_stats.genres
        );

        Ok(stat)
    }

    /// Reads tags for `files` on blocking tasks, at most `concurrency` at a
    /// time. Returns the accepted tracks sorted by path.
    async fn extract(&self, files: Vec<PathBuf>) -> Result<Vec<Track>> {
        let total = files.len();

        if total > 1000 {
            warn!(
                "indexing {} files, large imports can take a while",
                total
            );
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);

        for file in files {
            let semaphore = semaphore.clone();
            let reader = self.reader.clone();
            let path = file.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();

                tokio::task::spawn_blocking(move || reader.read(&file))
                    .await
                    .unwrap_or_else(|e| Err(TagError::TaskFailed(e.to_string())))
            });

            handles.push((path, handle));
        }

        let step = total / 100;
        let mut tracks = Vec::new();

        for (done, (file, handle)) in handles.into_iter().enumerate() {
            // A reader that panics only costs its own file
            let result = handle
                .await
                .unwrap_or_else(|e| Err(TagError::TaskFailed(e.to_string())));

            match result {
                Ok(tags) => {
                    if let Some(track) = track_from_tags(file, tags) {
                        tracks.push(track);
                    }
                }
                Err(e) => {
                    error!("can't read tags from '{}': {}", file.to_string_lossy(), e);
                }
            }

            if total > 1000 && step > 0 && (done + 1) % step == 0 {
                info!("{}% ({}/{})", (done + 1) * 100 / total, done + 1, total);
            }
        }

        tracks.sort_by(|a, b| a.file.cmp(&b.file));

        Ok(tracks)
    }
}

/// Deletes tracks whose file is gone. Returns the number removed and the
/// files in `files` not yet indexed.
fn remove_missing(index: &Index, files: &[PathBuf]) -> Result<(usize, Vec<PathBuf>)> {
    let mut known = vec![false; files.len()];
    let mut removed = 0;

    let tx = index.transaction()?;

    for (track_id, file) in index.track_files()? {
        match files.binary_search(&file) {
            Ok(pos) => known[pos] = true,
            Err(_) => {
                warn!("'{}' was removed", file.to_string_lossy());
                index.delete_track(track_id)?;
                removed += 1;
            }
        }
    }

    tx.commit()?;

    let new_files = files
        .iter()
        .zip(known)
        .filter(|(_, known)| !known)
        .map(|(file, _)| file.clone())
        .collect();

    Ok((removed, new_files))
}

/// Inserts `tracks`, rederives the collections and saves the node counter
/// in one transaction.
fn insert_tracks(index: &Index, tracks: Vec<Track>) -> Result<usize> {
    let tx = index.transaction()?;

    let mut ids = NodeIds::load(index.connection())?;

    for track in &tracks {
        index.create_track(track, &mut ids)?;
    }

    index.derive(&mut ids)?;
    ids.save(index.connection())?;

    tx.commit()?;

    debug!("issued {} node ids, next is {}", ids.issued(), ids.peek());

    Ok(tracks.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{self, TrackSource};
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    /// Reads `artist|album|title|number|genre` from the file itself.
    struct TextTags;

    impl TagReader for TextTags {
        fn read(&self, path: &Path) -> std::result::Result<TrackTags, TagError> {
            let content = fs::read_to_string(path).map_err(|_| TagError::NoTags)?;
            let fields: Vec<&str> = content.trim().split('|').collect();
            if fields.len() != 5 {
                return Err(TagError::NoTags);
            }

            let text = |s: &str| {
                if s.is_empty() {
                    None
                } else {
                    Some(s.to_string())
                }
            };

            Ok(TrackTags {
                artist: text(fields[0]),
                album: text(fields[1]),
                title: text(fields[2]),
                number: fields[3].parse().ok(),
                year: None,
                genres: text(fields[4]).into_iter().collect(),
                duration: 180.0,
            })
        }
    }

    /// `TextTags` that panics on files named `bad.mp3`.
    struct PanickingTags;

    impl TagReader for PanickingTags {
        fn read(&self, path: &Path) -> std::result::Result<TrackTags, TagError> {
            if path.ends_with("bad.mp3") {
                panic!("decoder blew up on '{}'", path.to_string_lossy());
            }
            TextTags.read(path)
        }
    }

    fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    fn scanner(root: &Path) -> Scanner {
        Scanner::new(
            root.to_path_buf(),
            vec!["mp3".to_string()],
            4,
            Arc::new(TextTags),
        )
    }

    fn setup() -> (TempDir, PathBuf, IndexSource) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("music");
        fs::create_dir(&root).unwrap();
        let source = IndexSource::create(dir.path().join("index.db"))
            .unwrap()
            .unwrap();
        (dir, root, source)
    }

    #[tokio::test]
    async fn finds_files_recursively_and_sorted() {
        let (_dir, root, _) = setup();

        write(&root, "b/deep/er/2.mp3", "");
        write(&root, "a/1.MP3", "");
        write(&root, "a/cover.jpg", "");
        write(&root, "top.mp3", "");
        write(&root, "noext", "");

        let files = find_audio_files(&root, &["mp3".to_string()]).await.unwrap();

        assert_eq!(
            files,
            vec![
                root.join("a/1.MP3"),
                root.join("b/deep/er/2.mp3"),
                root.join("top.mp3"),
            ]
        );
    }

    #[tokio::test]
    async fn indexes_tagged_files_and_drops_the_rest() {
        let (_dir, root, source) = setup();

        write(&root, "Alice/X/1.mp3", "Alice|X|Song 1|1|Rock");
        write(&root, "Alice/X/2.mp3", "Alice|X|Song 2|2|");
        write(&root, "Bob/Y/1.mp3", "Bob|Y|Song 3|1|Jazz");
        write(&root, "Bob/Y/untitled.mp3", "Bob|Y||3|Jazz");
        write(&root, "Bob/Y/zero.mp3", "Bob|Y|Zero|0|Jazz");
        write(&root, "Bob/Y/corrupt.mp3", "garbage");

        let stat = scanner(&root).run(&source).await.unwrap();

        assert_eq!(
            stat,
            ScanStat {
                found: 6,
                removed: 0,
                added: 3,
                dropped: 3,
            }
        );

        let index = source.get().unwrap();
        let stats = index.stats().unwrap();
        assert_eq!(stats.tracks, 3);
        assert_eq!(stats.artists, 2);
        assert_eq!(stats.albums, 2);
        assert_eq!(stats.genres, 2);

        // Sorted by path before insertion
        let names: Vec<String> = index.tracks().unwrap().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["Song 1", "Song 2", "Song 3"]);
    }

    #[tokio::test]
    async fn rescan_of_unchanged_library_changes_nothing() {
        let (_dir, root, source) = setup();

        write(&root, "Alice/X/1.mp3", "Alice|X|Song 1|1|Rock");
        write(&root, "Bob/Y/1.mp3", "Bob|Y|Song 3|1|Jazz");

        scanner(&root).run(&source).await.unwrap();

        let index = source.get().unwrap();
        let before = index.tracks().unwrap();
        let next_node = NodeIds::load(index.connection()).unwrap().peek();

        let stat = scanner(&root).run(&source).await.unwrap();
        assert_eq!(stat.added, 0);
        assert_eq!(stat.removed, 0);

        assert_eq!(index.tracks().unwrap(), before);
        assert_eq!(NodeIds::load(index.connection()).unwrap().peek(), next_node);
    }

    #[tokio::test]
    async fn removed_and_added_files_are_reconciled() {
        let (_dir, root, source) = setup();

        let gone = write(&root, "Alice/X/1.mp3", "Alice|X|Song 1|1|Rock");
        write(&root, "Alice/X/2.mp3", "Alice|X|Song 2|2|Rock");

        scanner(&root).run(&source).await.unwrap();

        fs::remove_file(&gone).unwrap();
        write(&root, "Alice/X/3.mp3", "Alice|X|Song 3|3|Rock");

        let stat = scanner(&root).run(&source).await.unwrap();
        assert_eq!(stat.removed, 1);
        assert_eq!(stat.added, 1);

        let index = source.get().unwrap();
        let album = index.album_by_name("X", "Alice").unwrap().unwrap();
        let (total, tracks) =
            query::query_tracks(&index, TrackSource::Album(album.album_id), None, None).unwrap();

        assert_eq!(total, 2);
        let names: Vec<&str> = tracks.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Song 2", "Song 3"]);
    }

    fn indexed(source: &IndexSource) -> HashMap<PathBuf, i64> {
        source
            .get()
            .unwrap()
            .tracks()
            .unwrap()
            .into_iter()
            .map(|t| (t.file, t.node_id))
            .collect()
    }

    fn paths(index: &HashMap<PathBuf, i64>) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = index.keys().cloned().collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn panicking_reader_drops_only_its_file() {
        let (_dir, root, source) = setup();

        write(&root, "Alice/X/1.mp3", "Alice|X|Song 1|1|Rock");
        write(&root, "Alice/X/bad.mp3", "Alice|X|Song 2|2|Rock");
        write(&root, "Bob/Y/1.mp3", "Bob|Y|Song 3|1|Jazz");

        let scanner = Scanner::new(
            root.clone(),
            vec!["mp3".to_string()],
            2,
            Arc::new(PanickingTags),
        );
        let stat = scanner.run(&source).await.unwrap();

        assert_eq!(
            stat,
            ScanStat {
                found: 3,
                removed: 0,
                added: 2,
                dropped: 1,
            }
        );
        assert_eq!(
            paths(&indexed(&source)),
            vec![root.join("Alice/X/1.mp3"), root.join("Bob/Y/1.mp3")]
        );
    }

    #[tokio::test]
    async fn repeated_scans_track_the_file_system() {
        let (_dir, root, source) = setup();

        let kept = write(&root, "Alice/X/1.mp3", "Alice|X|Song 1|1|Rock");
        let gone = write(&root, "Alice/X/2.mp3", "Alice|X|Song 2|2|Rock");
        let fixed = write(&root, "Bob/Y/1.mp3", "Bob|Y||1|Jazz");

        let stat = scanner(&root).run(&source).await.unwrap();
        assert_eq!((stat.added, stat.dropped, stat.removed), (2, 1, 0));

        let first = indexed(&source);
        assert_eq!(paths(&first), vec![kept.clone(), gone.clone()]);

        // Incomplete tags fixed, one file removed, one added
        fs::write(&fixed, "Bob|Y|Song 3|1|Jazz").unwrap();
        fs::remove_file(&gone).unwrap();
        let added = write(&root, "Carol/Z/1.mp3", "Carol|Z|Song 4|1|Pop");

        let stat = scanner(&root).run(&source).await.unwrap();
        assert_eq!((stat.added, stat.dropped, stat.removed), (2, 0, 1));

        let second = indexed(&source);
        assert_eq!(
            paths(&second),
            vec![kept.clone(), fixed.clone(), added.clone()]
        );
        assert_eq!(second[&kept], first[&kept]);

        fs::remove_file(&kept).unwrap();

        let stat = scanner(&root).run(&source).await.unwrap();
        assert_eq!((stat.added, stat.dropped, stat.removed), (0, 0, 1));

        let third = indexed(&source);
        assert_eq!(paths(&third), vec![fixed.clone(), added.clone()]);
        assert_eq!(third[&fixed], second[&fixed]);
        assert_eq!(third[&added], second[&added]);

        let index = source.get().unwrap();
        assert!(index.album_by_name("Y", "Bob").unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let (dir, _, source) = setup();

        let result = scanner(&dir.path().join("nowhere")).run(&source).await;
        assert!(matches!(result, Err(Error::IoError(_))));
    }
}
