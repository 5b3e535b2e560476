use railtime_db::{Database, DatabaseConfig};
use tempfile::TempDir;

/// Opens a fresh SQLite database in a temporary directory with the schema
/// applied.
///
/// The `TempDir` must be kept in scope for the test duration; dropping it
/// removes the database file.
pub async fn setup_test_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("railtime_test.db").display());

    let db = Database::open(&DatabaseConfig::new(url))
        .await
        .expect("Failed to open test database");

    (db, dir)
}
