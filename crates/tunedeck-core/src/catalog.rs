//! Relational catalog of tracks, artists, genres and the now-playing list.
//!
//! Backed by SQLite through `sqlx`. Every multi-row write for a track (song
//! row, artist links, genre links) runs in one transaction, and all writes go
//! through a single async writer lock so two syncs touching the same track can
//! never interleave. Reads run inside their own transaction so they observe
//! one committed snapshot.
//!
//! Conflict policy: the song row is replaced on a locator conflict (metadata
//! is last-writer-wins, id and creation time are kept); association rows are
//! inserted with `OR IGNORE` so existing links survive.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::CatalogConfig;
use crate::error::{Error, Result, StorageError};
use crate::model::{Track, TrackId, TrackOrigin};
use crate::naming::{LocatorNormalizer, is_url};

/// Name of the distinguished now-playing playlist.
pub const NOW_PLAYING_PLAYLIST: &str = "__now_playing__";

const TRACK_COLUMNS: &str =
    "id, title, album, duration_ms, locator, origin, tags, remote_id, created_at";

/// Whether an upsert created or replaced a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// Catalog id of the track.
    pub id: TrackId,
    /// `true` when a new row was inserted, `false` when one was replaced.
    pub inserted: bool,
}

/// SQLite-backed catalog store.
pub struct Catalog {
    pool: SqlitePool,
    write_lock: Mutex<()>,
    normalizer: LocatorNormalizer,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").finish_non_exhaustive()
    }
}

fn query_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |source| Error::Storage(StorageError::Query { operation, source })
}

fn tx_err(track: &Track) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |source| {
        Error::Storage(StorageError::Transaction {
            track: track.locator.clone(),
            source,
        })
    }
}

impl Catalog {
    /// Open (creating if needed) the catalog database described by `config`.
    pub async fn open(config: &CatalogConfig, normalizer: LocatorNormalizer) -> Result<Self> {
        let path = &config.database_path;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(parent, e))?;
        }

        info!(database = %path.display(), "Opening catalog");

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open(format!("{}: {e}", path.display())))?;

        Self::from_pool(pool, normalizer).await
    }

    /// Open a private in-memory catalog (tests and ephemeral sessions).
    pub async fn in_memory(normalizer: LocatorNormalizer) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Open(e.to_string()))?
            .foreign_keys(true);

        // Every connection to :memory: is a separate database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Open(e.to_string()))?;

        Self::from_pool(pool, normalizer).await
    }

    async fn from_pool(pool: SqlitePool, normalizer: LocatorNormalizer) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StorageError::Open(format!("migration failed: {e}")))?;
        debug!("Catalog schema ready");

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
            normalizer,
        })
    }

    /// The normalizer used for locator dedup keys.
    #[must_use]
    pub const fn normalizer(&self) -> &LocatorNormalizer {
        &self.normalizer
    }

    /// Insert or replace a track by locator. Returns its id.
    pub async fn upsert_track(&self, track: &Track) -> Result<TrackId> {
        self.upsert_track_outcome(track).await.map(|o| o.id)
    }

    /// Insert or replace a track by locator, reporting whether it was new.
    ///
    /// The song row, its artist links and its genre links are written in one
    /// transaction; on failure nothing of it is visible.
    pub async fn upsert_track_outcome(&self, track: &Track) -> Result<UpsertOutcome> {
        let mut track = track.clone();
        track.ensure_artist();
        track
            .validate()
            .map_err(|reason| StorageError::InvalidTrack {
                track: track.locator.clone(),
                reason,
            })?;

        let key = self.normalizer.normalize(&track.locator);
        let tags = serde_json::to_string(&track.tags)?;

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(tx_err(&track))?;
        let outcome = write_track(&mut tx, &track, &key, &tags)
            .await
            .map_err(tx_err(&track))?;
        tx.commit().await.map_err(tx_err(&track))?;

        debug!(
            id = outcome.id,
            inserted = outcome.inserted,
            "Upserted track {}",
            track.locator
        );
        Ok(outcome)
    }

    /// Id of the artist called exactly `name`, creating it if needed.
    pub async fn get_or_create_artist(&self, name: &str) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(query_err("get_or_create_artist"))?;
        get_or_create_named(&mut conn, NamedTable::Artists, name)
            .await
            .map_err(query_err("get_or_create_artist"))
    }

    /// Id of the genre called exactly `name`, creating it if needed.
    pub async fn get_or_create_genre(&self, name: &str) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(query_err("get_or_create_genre"))?;
        get_or_create_named(&mut conn, NamedTable::Genres, name)
            .await
            .map_err(query_err("get_or_create_genre"))
    }

    /// Link a track to an artist. An existing link is left untouched.
    pub async fn link_artist(&self, track_id: TrackId, artist_id: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT OR IGNORE INTO song_artist (song_id, artist_id, position)
             VALUES (?, ?, (SELECT COUNT(*) FROM song_artist WHERE song_id = ?))",
        )
        .bind(track_id)
        .bind(artist_id)
        .bind(track_id)
        .execute(&self.pool)
        .await
        .map_err(query_err("link_artist"))?;
        Ok(())
    }

    /// Link a track to a genre. An existing link is left untouched.
    pub async fn link_genre(&self, track_id: TrackId, genre_id: i64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query("INSERT OR IGNORE INTO song_genre (song_id, genre_id) VALUES (?, ?)")
            .bind(track_id)
            .bind(genre_id)
            .execute(&self.pool)
            .await
            .map_err(query_err("link_genre"))?;
        Ok(())
    }

    /// Every track, ordered by title.
    pub async fn query_all(&self) -> Result<Vec<Track>> {
        let mut tx = self.pool.begin().await.map_err(query_err("query_all"))?;
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM songs ORDER BY title COLLATE NOCASE, id"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *tx)
            .await
            .map_err(query_err("query_all"))?;
        let tracks = rows_to_tracks(&mut tx, rows)
            .await
            .map_err(query_err("query_all"))?;
        tx.commit().await.map_err(query_err("query_all"))?;
        Ok(tracks)
    }

    /// Tracks whose title, album or any artist contains `text`, ignoring case.
    /// An empty query returns everything.
    pub async fn search(&self, text: &str) -> Result<Vec<Track>> {
        let needle = text.trim().to_lowercase();
        let tracks = self.query_all().await?;
        if needle.is_empty() {
            return Ok(tracks);
        }
        Ok(tracks
            .into_iter()
            .filter(|track| {
                track.title.to_lowercase().contains(&needle)
                    || track
                        .album
                        .as_ref()
                        .is_some_and(|album| album.to_lowercase().contains(&needle))
                    || track
                        .artists
                        .iter()
                        .any(|artist| artist.to_lowercase().contains(&needle))
            })
            .collect())
    }

    /// Look up a single track.
    pub async fn get_track(&self, id: TrackId) -> Result<Option<Track>> {
        let mut tracks = self.tracks_by_ids(&[id]).await?;
        Ok(tracks.pop())
    }

    /// Whether a track with the same normalized locator exists.
    pub async fn contains_locator(&self, locator: &str) -> Result<bool> {
        let key = self.normalizer.normalize(locator);
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM songs WHERE locator_key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await
            .map_err(query_err("contains_locator"))?;
        Ok(found.is_some())
    }

    /// Normalized locators of every track.
    pub async fn locator_keys(&self) -> Result<HashSet<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT locator_key FROM songs")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err("locator_keys"))?;
        Ok(keys.into_iter().collect())
    }

    /// Number of tracks.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM songs")
            .fetch_one(&self.pool)
            .await
            .map_err(query_err("count"))
    }

    /// Remove local tracks whose backing file no longer exists.
    ///
    /// Downloaded tracks and URL locators are never checked. Returns how many
    /// rows were removed.
    pub async fn delete_tracks_where_file_missing(&self) -> Result<usize> {
        let candidates: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, locator FROM songs WHERE origin = ?")
                .bind(TrackOrigin::Local.as_str())
                .fetch_all(&self.pool)
                .await
                .map_err(query_err("delete_tracks_where_file_missing"))?;

        let mut missing = Vec::new();
        for (id, locator) in candidates {
            if is_url(&locator) {
                continue;
            }
            match tokio::fs::try_exists(Path::new(&locator)).await {
                Ok(true) => {}
                Ok(false) => missing.push(id),
                Err(e) => {
                    // Unknown state (e.g. unmounted volume): keep the row.
                    warn!("Cannot check {}: {}", locator, e);
                }
            }
        }

        if missing.is_empty() {
            return Ok(0);
        }

        let ids = ids_json(&missing);
        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("delete_tracks_where_file_missing"))?;
        let removed = sqlx::query(
            "DELETE FROM songs WHERE origin = 'local' AND id IN (SELECT value FROM json_each(?))",
        )
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .map_err(query_err("delete_tracks_where_file_missing"))?
        .rows_affected();
        compact_playlists(&mut tx)
            .await
            .map_err(query_err("delete_tracks_where_file_missing"))?;
        prune_orphans(&mut tx)
            .await
            .map_err(query_err("delete_tracks_where_file_missing"))?;
        tx.commit()
            .await
            .map_err(query_err("delete_tracks_where_file_missing"))?;

        info!("Removed {} catalog tracks with missing files", removed);
        Ok(removed as usize)
    }

    /// Replace the now-playing list. Duplicate ids keep their first position.
    pub async fn set_now_playing(&self, track_ids: &[TrackId]) -> Result<Vec<TrackId>> {
        let mut seen = HashSet::new();
        let ordered: Vec<TrackId> = track_ids
            .iter()
            .copied()
            .filter(|id| seen.insert(*id))
            .collect();
        if ordered.len() != track_ids.len() {
            debug!(
                "Dropped {} duplicate ids from now-playing",
                track_ids.len() - ordered.len()
            );
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(query_err("set_now_playing"))?;

        let existing: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM songs WHERE id IN (SELECT value FROM json_each(?))")
                .bind(ids_json(&ordered))
                .fetch_all(&mut *tx)
                .await
                .map_err(query_err("set_now_playing"))?;
        let existing: HashSet<i64> = existing.into_iter().collect();
        if let Some(missing) = ordered.iter().find(|id| !existing.contains(id)) {
            return Err(StorageError::TrackNotFound(*missing).into());
        }

        let playlist_id = now_playing_id(&mut tx)
            .await
            .map_err(query_err("set_now_playing"))?;
        replace_playlist(&mut tx, playlist_id, &ordered)
            .await
            .map_err(query_err("set_now_playing"))?;
        tx.commit().await.map_err(query_err("set_now_playing"))?;

        Ok(ordered)
    }

    /// Tracks of the now-playing list in position order.
    pub async fn get_now_playing(&self) -> Result<Vec<Track>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT ps.song_id FROM playlist_songs ps
             JOIN playlists p ON p.id = ps.playlist_id
             WHERE p.name = ? ORDER BY ps.position",
        )
        .bind(NOW_PLAYING_PLAYLIST)
        .fetch_all(&self.pool)
        .await
        .map_err(query_err("get_now_playing"))?;
        self.tracks_by_ids(&ids).await
    }

    async fn tracks_by_ids(&self, ids: &[TrackId]) -> Result<Vec<Track>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.pool.begin().await.map_err(query_err("tracks_by_ids"))?;
        let sql = format!(
            "SELECT {TRACK_COLUMNS} FROM songs WHERE id IN (SELECT value FROM json_each(?))"
        );
        let rows = sqlx::query(&sql)
            .bind(ids_json(ids))
            .fetch_all(&mut *tx)
            .await
            .map_err(query_err("tracks_by_ids"))?;
        let tracks = rows_to_tracks(&mut tx, rows)
            .await
            .map_err(query_err("tracks_by_ids"))?;
        tx.commit().await.map_err(query_err("tracks_by_ids"))?;

        let mut by_id: HashMap<TrackId, Track> = tracks
            .into_iter()
            .filter_map(|t| t.id.map(|id| (id, t)))
            .collect();
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }
}

#[derive(Clone, Copy)]
enum NamedTable {
    Artists,
    Genres,
}

async fn get_or_create_named(
    conn: &mut SqliteConnection,
    table: NamedTable,
    name: &str,
) -> std::result::Result<i64, sqlx::Error> {
    let (insert, select) = match table {
        NamedTable::Artists => (
            "INSERT OR IGNORE INTO artists (name) VALUES (?)",
            "SELECT id FROM artists WHERE name = ?",
        ),
        NamedTable::Genres => (
            "INSERT OR IGNORE INTO genres (name) VALUES (?)",
            "SELECT id FROM genres WHERE name = ?",
        ),
    };
    sqlx::query(insert).bind(name).execute(&mut *conn).await?;
    sqlx::query_scalar(select).bind(name).fetch_one(&mut *conn).await
}

async fn write_track(
    conn: &mut SqliteConnection,
    track: &Track,
    key: &str,
    tags: &str,
) -> std::result::Result<UpsertOutcome, sqlx::Error> {
    let existing: Option<(i64, String)> =
        sqlx::query_as("SELECT id, origin FROM songs WHERE locator_key = ?")
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?;

    let outcome = if let Some((id, origin)) = existing {
        // Rescanning a downloaded file as local only refreshes its duration;
        // origin, tags, remote id and credits stay with the download.
        if TrackOrigin::from_db(&origin) == TrackOrigin::Downloaded
            && track.origin == TrackOrigin::Local
        {
            sqlx::query("UPDATE songs SET duration_ms = ? WHERE id = ?")
                .bind(track.duration_ms as i64)
                .bind(id)
                .execute(&mut *conn)
                .await?;
            return Ok(UpsertOutcome {
                id,
                inserted: false,
            });
        }

        sqlx::query(
            "UPDATE songs SET title = ?, album = ?, duration_ms = ?, locator = ?,
                 origin = ?, tags = ?, remote_id = ?
             WHERE id = ?",
        )
        .bind(&track.title)
        .bind(track.album.as_deref())
        .bind(track.duration_ms as i64)
        .bind(&track.locator)
        .bind(track.origin.as_str())
        .bind(tags)
        .bind(track.remote_id.as_deref())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        UpsertOutcome {
            id,
            inserted: false,
        }
    } else {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO songs
                 (title, album, duration_ms, locator, locator_key, origin, tags, remote_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&track.title)
        .bind(track.album.as_deref())
        .bind(track.duration_ms as i64)
        .bind(&track.locator)
        .bind(key)
        .bind(track.origin.as_str())
        .bind(tags)
        .bind(track.remote_id.as_deref())
        .bind(track.created_at as i64)
        .fetch_one(&mut *conn)
        .await?;
        UpsertOutcome { id, inserted: true }
    };

    for (position, artist) in track.artists.iter().enumerate() {
        let artist_id = get_or_create_named(conn, NamedTable::Artists, artist).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO song_artist (song_id, artist_id, position) VALUES (?, ?, ?)",
        )
        .bind(outcome.id)
        .bind(artist_id)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }

    for genre in &track.genres {
        let genre_id = get_or_create_named(conn, NamedTable::Genres, genre).await?;
        sqlx::query("INSERT OR IGNORE INTO song_genre (song_id, genre_id) VALUES (?, ?)")
            .bind(outcome.id)
            .bind(genre_id)
            .execute(&mut *conn)
            .await?;
    }

    Ok(outcome)
}

async fn rows_to_tracks(
    conn: &mut SqliteConnection,
    rows: Vec<SqliteRow>,
) -> std::result::Result<Vec<Track>, sqlx::Error> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::with_capacity(rows.len());
    for row in &rows {
        ids.push(row.try_get::<i64, _>("id")?);
    }
    let ids = ids_json(&ids);

    let artist_rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT sa.song_id, a.name FROM song_artist sa
         JOIN artists a ON a.id = sa.artist_id
         WHERE sa.song_id IN (SELECT value FROM json_each(?))
         ORDER BY sa.song_id, sa.position, a.id",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let genre_rows: Vec<(i64, String)> = sqlx::query_as(
        "SELECT sg.song_id, g.name FROM song_genre sg
         JOIN genres g ON g.id = sg.genre_id
         WHERE sg.song_id IN (SELECT value FROM json_each(?))
         ORDER BY sg.song_id, g.name",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut artists: HashMap<i64, Vec<String>> = HashMap::new();
    for (song_id, name) in artist_rows {
        artists.entry(song_id).or_default().push(name);
    }
    let mut genres: HashMap<i64, Vec<String>> = HashMap::new();
    for (song_id, name) in genre_rows {
        genres.entry(song_id).or_default().push(name);
    }

    let mut tracks = Vec::with_capacity(rows.len());
    for row in rows {
        let mut track = track_from_row(&row)?;
        if let Some(id) = track.id {
            track.artists = artists.remove(&id).unwrap_or_default();
            track.genres = genres.remove(&id).unwrap_or_default();
        }
        track.ensure_artist();
        tracks.push(track);
    }
    Ok(tracks)
}

fn track_from_row(row: &SqliteRow) -> std::result::Result<Track, sqlx::Error> {
    let id: i64 = row.try_get("id")?;
    let tags: String = row.try_get("tags")?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags).unwrap_or_else(|e| {
        warn!("Ignoring unreadable tags on track {}: {}", id, e);
        BTreeSet::new()
    });
    let origin: String = row.try_get("origin")?;

    Ok(Track {
        id: Some(id),
        title: row.try_get("title")?,
        artists: Vec::new(),
        album: row.try_get("album")?,
        genres: Vec::new(),
        duration_ms: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
        locator: row.try_get("locator")?,
        origin: TrackOrigin::from_db(&origin),
        tags,
        remote_id: row.try_get("remote_id")?,
        created_at: row.try_get::<i64, _>("created_at")?.max(0) as u64,
    })
}

async fn now_playing_id(conn: &mut SqliteConnection) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query("INSERT OR IGNORE INTO playlists (name, created_at) VALUES (?, ?)")
        .bind(NOW_PLAYING_PLAYLIST)
        .bind(crate::model::now_millis() as i64)
        .execute(&mut *conn)
        .await?;
    sqlx::query_scalar("SELECT id FROM playlists WHERE name = ?")
        .bind(NOW_PLAYING_PLAYLIST)
        .fetch_one(&mut *conn)
        .await
}

async fn replace_playlist(
    conn: &mut SqliteConnection,
    playlist_id: i64,
    song_ids: &[TrackId],
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM playlist_songs WHERE playlist_id = ?")
        .bind(playlist_id)
        .execute(&mut *conn)
        .await?;
    for (position, song_id) in song_ids.iter().enumerate() {
        sqlx::query("INSERT INTO playlist_songs (playlist_id, song_id, position) VALUES (?, ?, ?)")
            .bind(playlist_id)
            .bind(song_id)
            .bind(position as i64)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

/// Renumber every playlist so positions are `0..n` again after deletions.
async fn compact_playlists(conn: &mut SqliteConnection) -> std::result::Result<(), sqlx::Error> {
    let playlists: Vec<i64> = sqlx::query_scalar("SELECT id FROM playlists")
        .fetch_all(&mut *conn)
        .await?;
    for playlist_id in playlists {
        let songs: Vec<i64> = sqlx::query_scalar(
            "SELECT song_id FROM playlist_songs WHERE playlist_id = ? ORDER BY position",
        )
        .bind(playlist_id)
        .fetch_all(&mut *conn)
        .await?;
        replace_playlist(conn, playlist_id, &songs).await?;
    }
    Ok(())
}

async fn prune_orphans(conn: &mut SqliteConnection) -> std::result::Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM artists WHERE id NOT IN (SELECT artist_id FROM song_artist)")
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM genres WHERE id NOT IN (SELECT genre_id FROM song_genre)")
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn ids_json(ids: &[i64]) -> String {
    let parts: Vec<String> = ids.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(","))
}
