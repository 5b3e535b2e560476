use railtime_client::{DetailSelectors, HtmlDetailParser, HtmlListingParser, ListingSelectors};
use railtime_core::error::{AppError, ErrorKind};
use railtime_core::models::{FetchResponse, LimitedExpress};
use railtime_core::pipeline::{IngestConfig, IngestService};
use railtime_core::testutil::{MockFetcher, MockReporter};
use railtime_db::{Database, DatabaseConfig};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const LISTING_URL: &str = "https://line.example.com/stations";

const LISTING: &str = r#"
    <html><body>
      <ul class="station-list">
        <li><span class="station-name">Shibuya Station</span></li>
        <li><span class="station-name">Meidaimae Station</span> <em>特急</em></li>
        <li><span class="station-name">Chofu Station</span> <em>特急</em></li>
      </ul>
    </body></html>
"#;

fn detail_page(time: &str) -> FetchResponse {
    FetchResponse::ok(format!(
        r#"<html><body><div class="route-summary"><span class="time">{time}</span></div></body></html>"#
    ))
}

async fn open_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("e2e.db").display());
    let db = Database::open(&DatabaseConfig::new(url)).await.unwrap();
    (db, dir)
}

fn service(
    fetcher: MockFetcher,
    db: &Database,
) -> IngestService<MockFetcher, HtmlListingParser, HtmlDetailParser, railtime_db::StationRepository>
{
    IngestService::new(
        fetcher,
        HtmlListingParser::new(&ListingSelectors::default()).unwrap(),
        HtmlDetailParser::new(&DetailSelectors::default()).unwrap(),
        db.station_repo(),
        IngestConfig::default()
            .with_listing_url(LISTING_URL)
            .with_search_url("https://transit.example.com/search")
            .with_destination("Shinjuku")
            .with_workers(2),
    )
}

fn line_fetcher() -> MockFetcher {
    MockFetcher::routed()
        .route(LISTING_URL, vec![Ok(FetchResponse::ok(LISTING))])
        .route("Shibuya", vec![Ok(detail_page("5分"))])
        .route("Meidaimae", vec![Ok(detail_page("--"))])
        .route("Chofu", vec![Ok(detail_page("18分"))])
}

#[tokio::test]
async fn partial_parse_failure_persists_the_rest() {
    let (db, _dir) = open_db().await;

    let summary = service(line_fetcher(), &db)
        .run(&CancellationToken::new(), &MockReporter::new())
        .await
        .unwrap();

    let persisted: Vec<_> = summary.persisted.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(persisted, vec!["Shibuya", "Chofu"]);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].name, "Meidaimae");
    assert_eq!(summary.failed[0].kind, ErrorKind::Parse);
    assert!(summary.to_string().contains("Meidaimae: ParseError"));

    let repo = db.station_repo();
    let stations = repo.all_stations().await.unwrap();
    let names: Vec<_> = stations.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Shibuya", "Chofu"]);
    assert_eq!(stations[0].limited_express, LimitedExpress::No);
    assert_eq!(stations[1].limited_express, LimitedExpress::Yes);

    let minutes: Vec<_> = repo
        .measurements()
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.minutes)
        .collect();
    assert_eq!(minutes, vec![5, 18]);
}

#[tokio::test]
async fn second_run_appends_measurements_without_new_stations() {
    let (db, _dir) = open_db().await;

    for _ in 0..2 {
        service(line_fetcher(), &db)
            .run(&CancellationToken::new(), &MockReporter::new())
            .await
            .unwrap();
    }

    let repo = db.station_repo();
    assert_eq!(repo.all_stations().await.unwrap().len(), 2);
    assert_eq!(repo.measurements().await.unwrap().len(), 4);
}

#[tokio::test]
async fn listing_failure_aborts_without_writes() {
    let (db, _dir) = open_db().await;
    let fetcher = MockFetcher::routed().route(
        LISTING_URL,
        vec![Ok(FetchResponse::ok("<html><body>maintenance</body></html>"))],
    );

    let err = service(fetcher, &db)
        .run(&CancellationToken::new(), &MockReporter::new())
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Fatal(_)));
    assert_eq!(err.kind(), ErrorKind::Fatal);
    assert!(db.station_repo().all_stations().await.unwrap().is_empty());
}
