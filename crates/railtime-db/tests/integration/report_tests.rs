use railtime_core::models::LimitedExpress;

use crate::integration::common::setup_test_db;

#[tokio::test]
async fn measurements_join_station_fields() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    repo.upsert_station_with_measurement("Shibuya", LimitedExpress::No, 12)
        .await
        .unwrap();
    repo.upsert_station_with_measurement("Chofu", LimitedExpress::Yes, 18)
        .await
        .unwrap();
    repo.upsert_station_with_measurement("Shibuya", LimitedExpress::No, 13)
        .await
        .unwrap();

    let rows = repo.measurements().await.unwrap();
    let flat: Vec<_> = rows
        .iter()
        .map(|r| (r.station_name.as_str(), r.limited_express, r.minutes))
        .collect();

    assert_eq!(
        flat,
        vec![
            ("Shibuya", LimitedExpress::No, 12),
            ("Shibuya", LimitedExpress::No, 13),
            ("Chofu", LimitedExpress::Yes, 18),
        ]
    );
}

#[tokio::test]
async fn averages_are_grouped_by_express_flag() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    repo.upsert_station_with_measurement("Chofu", LimitedExpress::Yes, 18)
        .await
        .unwrap();
    repo.upsert_station_with_measurement("Meidaimae", LimitedExpress::Yes, 8)
        .await
        .unwrap();
    repo.upsert_station_with_measurement("Sasazuka", LimitedExpress::No, 5)
        .await
        .unwrap();
    repo.upsert_station_with_measurement("Hatsudai", LimitedExpress::Unknown, 3)
        .await
        .unwrap();

    let averages = repo.average_minutes_by_express().await.unwrap();

    assert_eq!(averages.len(), 3);
    assert_eq!(averages[0].limited_express, LimitedExpress::Yes);
    assert!((averages[0].average_minutes - 13.0).abs() < f64::EPSILON);
    assert_eq!(averages[0].measurements, 2);
    assert_eq!(averages[1].limited_express, LimitedExpress::No);
    assert_eq!(averages[1].measurements, 1);
    assert_eq!(averages[2].limited_express, LimitedExpress::Unknown);
    assert!((averages[2].average_minutes - 3.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn reports_on_empty_database_are_empty() {
    let (db, _dir) = setup_test_db().await;
    let repo = db.station_repo();

    assert!(repo.measurements().await.unwrap().is_empty());
    assert!(repo.average_minutes_by_express().await.unwrap().is_empty());
}
