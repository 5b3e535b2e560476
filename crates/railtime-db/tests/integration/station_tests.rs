use futures::future::join_all;
use railtime_core::error::AppError;
use railtime_core::models::LimitedExpress;

use railtime_db::{Database, DatabaseConfig};

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn upsert_creates_station_and_measurement() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    let (station_id, time_id) = repo
        .upsert_station_with_measurement("Chofu", LimitedExpress::Yes, 18)
        .await
        .unwrap();

    let station = repo
        .find_station("Chofu")
        .await
        .unwrap()
        .expect("Should find the station");
    assert_eq!(station.station_id, station_id);
    assert_eq!(station.limited_express, LimitedExpress::Yes);

    let latest = repo
        .latest_measurement(station_id)
        .await
        .unwrap()
        .expect("Should find the measurement");
    assert_eq!(latest.time_id, time_id);
    assert_eq!(latest.station_id, station_id);
    assert_eq!(latest.minutes, 18);
}

#[tokio::test]
async fn rerun_reuses_station_and_appends_measurement() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    let (first_station, first_time) = repo
        .upsert_station_with_measurement("Meidaimae", LimitedExpress::Yes, 9)
        .await
        .unwrap();
    let (second_station, second_time) = repo
        .upsert_station_with_measurement("Meidaimae", LimitedExpress::Yes, 10)
        .await
        .unwrap();

    assert_eq!(first_station, second_station);
    assert_ne!(first_time, second_time);
    assert_eq!(repo.all_stations().await.unwrap().len(), 1);

    let history = repo.measurement_history(first_station, 10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].time_id, second_time, "newest first");
    assert_eq!(history[0].minutes, 10);

    let latest = repo.latest_measurement(first_station).await.unwrap().unwrap();
    assert_eq!(latest.time_id, second_time);
}

#[tokio::test]
async fn name_is_trimmed_before_lookup() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    let (a, _) = repo
        .upsert_station_with_measurement("Chofu", LimitedExpress::No, 18)
        .await
        .unwrap();
    let (b, _) = repo
        .upsert_station_with_measurement("  Chofu ", LimitedExpress::No, 18)
        .await
        .unwrap();

    assert_eq!(a, b);
}

#[tokio::test]
async fn unknown_observation_keeps_known_flag() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    repo.upsert_station_with_measurement("Sasazuka", LimitedExpress::No, 4)
        .await
        .unwrap();
    repo.upsert_station_with_measurement("Sasazuka", LimitedExpress::Unknown, 4)
        .await
        .unwrap();
    let station = repo.find_station("Sasazuka").await.unwrap().unwrap();
    assert_eq!(station.limited_express, LimitedExpress::No);

    repo.upsert_station_with_measurement("Sasazuka", LimitedExpress::Yes, 4)
        .await
        .unwrap();
    let station = repo.find_station("Sasazuka").await.unwrap().unwrap();
    assert_eq!(station.limited_express, LimitedExpress::Yes);
}

#[tokio::test]
async fn unknown_flag_is_stored_as_null() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    repo.upsert_station_with_measurement("Hatsudai", LimitedExpress::Unknown, 3)
        .await
        .unwrap();

    let raw: Option<i64> =
        sqlx::query_scalar("SELECT limited_express FROM Station WHERE station_name = ?")
            .bind("Hatsudai")
            .fetch_one(db.pool())
            .await
            .unwrap();
    assert_eq!(raw, None);
}

#[tokio::test]
async fn zero_minutes_is_rejected_without_writing() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    let err = repo
        .upsert_station_with_measurement("Chofu", LimitedExpress::Yes, 0)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Persistence(_)));
    assert!(repo.all_stations().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_name_is_rejected() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    let err = repo
        .upsert_station_with_measurement("   ", LimitedExpress::Unknown, 5)
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Persistence(_)));
}

#[tokio::test]
async fn measurement_requires_existing_station() {
    let (db, _dir) = setup_test_db().await;

    let result = sqlx::query(
        "INSERT INTO TravelTime (station_id, minutes, measured_at) VALUES (?, ?, ?)",
    )
    .bind(9_999_i64)
    .bind(5_i64)
    .bind(chrono::Utc::now())
    .execute(db.pool())
    .await;

    assert!(result.is_err(), "foreign key must reject an orphan measurement");
}

#[tokio::test]
async fn station_with_measurements_cannot_be_deleted() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    let (station_id, _) = repo
        .upsert_station_with_measurement("Chofu", LimitedExpress::Yes, 18)
        .await
        .unwrap();

    let result = sqlx::query("DELETE FROM Station WHERE station_id = ?")
        .bind(station_id)
        .execute(db.pool())
        .await;

    assert!(result.is_err(), "delete must be refused while measurements exist");
    assert_eq!(repo.all_stations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_upserts_of_same_name_share_one_station() {
    let (db, _dir) = setup_test_db().await;

    let writes = (1..=8).map(|minutes| {
        let repo = db.station_repo();
        async move {
            repo.upsert_station_with_measurement("Shibuya", LimitedExpress::No, minutes)
                .await
        }
    });
    let results = join_all(writes).await;

    let ids: Vec<i64> = results
        .into_iter()
        .map(|r| r.unwrap().0)
        .collect();
    assert!(ids.iter().all(|id| *id == ids[0]));

    let repo = db.station_repo();
    assert_eq!(repo.all_stations().await.unwrap().len(), 1);
    assert_eq!(repo.measurement_history(ids[0], 100).await.unwrap().len(), 8);
}

#[tokio::test]
async fn ensure_schema_is_idempotent() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    repo.upsert_station_with_measurement("Chofu", LimitedExpress::Yes, 18)
        .await
        .unwrap();
    repo.ensure_schema().await.unwrap();
    repo.ensure_schema().await.unwrap();

    assert_eq!(repo.all_stations().await.unwrap().len(), 1);
}

#[tokio::test]
async fn latest_measurement_for_unknown_station_is_none() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    assert!(repo.latest_measurement(42).await.unwrap().is_none());
    assert!(repo.find_station("Nowhere").await.unwrap().is_none());
}

#[tokio::test]
async fn health_check_succeeds() {
    let (db, _dir) = setup_test_db().await;
    db.station_repo().health_check().await.unwrap();
}

#[tokio::test]
async fn repository_from_pool_sees_facade_writes() {
    let (db, _dir) = setup_test_db().await;
    db.station_repo()
        .upsert_station_with_measurement("Kokuryo", LimitedExpress::No, 21)
        .await
        .unwrap();

    let repo = railtime_db::StationRepository::new(db.pool().clone());
    let stations = repo.all_stations().await.unwrap();

    assert_eq!(stations.len(), 1);
    assert_eq!(stations[0].name, "Kokuryo");
}

#[tokio::test]
async fn separate_handles_on_one_file_never_fail_concurrent_upserts() {
    let (first, dir) = setup_test_db().await;
    let url = format!("sqlite://{}", dir.path().join("railtime_test.db").display());
    let second = Database::open(&DatabaseConfig::new(url)).await.unwrap();

    for round in 0..10u32 {
        let writes = (0..6u32).map(|i| {
            let repo = if i % 2 == 0 {
                first.station_repo()
            } else {
                second.station_repo()
            };
            let minutes = round * 6 + i + 1;
            async move {
                repo.upsert_station_with_measurement("Tobitakyu", LimitedExpress::No, minutes)
                    .await
            }
        });

        let ids: Vec<i64> = join_all(writes)
            .await
            .into_iter()
            .map(|r| r.expect("concurrent upsert must succeed").0)
            .collect();
        assert!(ids.iter().all(|id| *id == ids[0]), "round {round}: {ids:?}");
    }

    let repo = first.station_repo();
    let stations = repo.all_stations().await.unwrap();
    assert_eq!(stations.len(), 1);
    assert_eq!(
        repo.measurement_history(stations[0].station_id, 1000)
            .await
            .unwrap()
            .len(),
        60
    );
}
