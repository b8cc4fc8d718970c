//! HTTP behaviour of the catalog client, the fetcher and the in-situ
//! provider, exercised against an in-process mock server.

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use helio_harness::catalog::{Catalog, HttpCatalog};
use helio_harness::fetch::{FetchStatus, Fetcher, HttpSource};
use helio_harness::insitu::{HttpInsitu, InsituProvider, Mission};
use helio_harness::models::RemoteFile;
use helio_harness::query::{SearchSpec, TimeRange, WavelengthRange};
use helio_harness::store::DirStore;
use helio_harness::HelioError;

// ─── Mock server ────────────────────────────────────────────────────

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn record(id: &str, instrument: &str, wavelength: f64, start: &str, url: &str) -> Value {
    json!({
        "id": id,
        "instrument": instrument,
        "wavelength": wavelength,
        "start": start,
        "end": start,
        "url": url,
    })
}

async fn search_handler(Query(params): Query<HashMap<String, String>>) -> (StatusCode, Json<Value>) {
    for key in ["start", "end", "instrument"] {
        if !params.contains_key(key) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("missing {}", key) })),
            );
        }
    }
    // The server is loose about filtering; the client refines.
    (
        StatusCode::OK,
        Json(json!({
            "records": [
                record("late", "AIA", 193.0, "2024-05-10T06:00:00Z", "https://x/late.fits"),
                record("other", "EIT", 195.0, "2024-05-10T01:00:00Z", "https://x/eit.fits"),
                record("early", "AIA", 193.0, "2024-05-10T00:00:00Z", "https://x/early.fits"),
                record("early", "AIA", 193.0, "2024-05-10T00:00:00Z", "https://x/early.fits"),
                record("outside", "AIA", 193.0, "2024-06-01T00:00:00Z", "https://x/june.fits"),
            ]
        })),
    )
}

fn aia_spec() -> SearchSpec {
    SearchSpec::builder()
        .range(TimeRange::parse("2024-05-10", "2024-05-11").unwrap())
        .instrument("AIA")
        .wavelength(WavelengthRange::single(193.0).unwrap())
        .build()
        .unwrap()
}

// ─── Catalog ────────────────────────────────────────────────────────

#[tokio::test]
async fn catalog_refines_server_results() {
    let base = serve(Router::new().route("/catalog/search", get(search_handler))).await;
    let catalog = HttpCatalog::new(format!("{}/catalog", base), Duration::from_secs(5)).unwrap();

    let records = catalog.search(&aia_spec()).await.unwrap();
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late"]);
}

#[tokio::test]
async fn catalog_rejection_is_invalid_query() {
    let app = Router::new().route(
        "/search",
        get(|| async { (StatusCode::BAD_REQUEST, "unknown instrument") }),
    );
    let base = serve(app).await;
    let catalog = HttpCatalog::new(base, Duration::from_secs(5)).unwrap();

    match catalog.search(&aia_spec()).await {
        Err(HelioError::InvalidQuery(msg)) => assert!(msg.contains("unknown instrument")),
        other => panic!("expected InvalidQuery, got {:?}", other),
    }
}

#[tokio::test]
async fn catalog_server_error_is_network() {
    let app = Router::new().route(
        "/search",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "maintenance") }),
    );
    let base = serve(app).await;
    let catalog = HttpCatalog::new(base, Duration::from_secs(5)).unwrap();

    assert!(matches!(
        catalog.search(&aia_spec()).await,
        Err(HelioError::Network(_))
    ));
}

#[tokio::test]
async fn catalog_garbage_body_is_parse_error() {
    let app = Router::new().route("/search", get(|| async { "<html>oops</html>" }));
    let base = serve(app).await;
    let catalog = HttpCatalog::new(base, Duration::from_secs(5)).unwrap();

    assert!(matches!(
        catalog.search(&aia_spec()).await,
        Err(HelioError::Parse(_))
    ));
}

#[tokio::test]
async fn catalog_unreachable_is_network() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let catalog = HttpCatalog::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
    assert!(matches!(
        catalog.search(&aia_spec()).await,
        Err(HelioError::Network(_))
    ));
}

#[tokio::test]
async fn catalog_timeout_is_network() {
    let app = Router::new().route(
        "/search",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "{}"
        }),
    );
    let base = serve(app).await;
    let catalog = HttpCatalog::new(base, Duration::from_millis(200)).unwrap();

    match catalog.search(&aia_spec()).await {
        Err(HelioError::Network(msg)) => assert!(msg.contains("timed out"), "{}", msg),
        other => panic!("expected Network timeout, got {:?}", other),
    }
}

// ─── Fetcher ────────────────────────────────────────────────────────

fn remote(name: &str, base: &str) -> RemoteFile {
    RemoteFile {
        id: name.into(),
        instrument: "AIA".into(),
        wavelength: Some(193.0),
        start: "2024-05-10T00:00:00Z".parse().unwrap(),
        end: "2024-05-10T00:00:00Z".parse().unwrap(),
        url: format!("{}/files/{}", base, name),
        size: None,
        sha256: None,
    }
}

#[tokio::test]
async fn fetch_over_http_reports_each_file() {
    let app = Router::new()
        .route("/files/a.fits", get(|| async { "SIMPLE = T" }))
        .route(
            "/files/b.fits",
            get(|| async { (StatusCode::NOT_FOUND, "gone") }),
        );
    let base = serve(app).await;
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(DirStore::open(tmp.path()).unwrap());
    let fetcher = Fetcher::new(
        Box::new(HttpSource::new(Duration::from_secs(5)).unwrap()),
        store,
    );

    let records = vec![remote("a.fits", &base), remote("b.fits", &base)];
    let report = fetcher.fetch(&records).await;

    assert_eq!(report.len(), 2);
    assert_eq!(report.downloaded(), 1);
    let a = report.outcomes()[0].result.as_ref().unwrap();
    assert_eq!(a.status, FetchStatus::Downloaded);
    assert_eq!(std::fs::read_to_string(&a.path).unwrap(), "SIMPLE = T");
    match &report.outcomes()[1].result {
        Err(HelioError::Download { name, reason }) => {
            assert_eq!(name, "b.fits");
            assert!(reason.contains("404"), "{}", reason);
        }
        other => panic!("expected Download error, got {:?}", other),
    }

    // Second run only retries what failed; the good file is skipped.
    let again = fetcher.fetch(&records).await;
    assert_eq!(again.skipped(), 1);
    assert_eq!(again.failed().len(), 1);
}

// ─── In-situ ────────────────────────────────────────────────────────

async fn omni_handler(Query(params): Query<HashMap<String, String>>) -> (StatusCode, String) {
    if !params.contains_key("start") || !params.contains_key("end") {
        return (StatusCode::BAD_REQUEST, "start and end required".into());
    }
    let body = "\
time,flow_speed [km/s],by_gsm [nT],bz_gsm [nT]
2024-05-10T00:00:00Z,450.0,0.0,5.0
2024-05-10T01:00:00Z,9999.9,5.0,0.0
2024-05-10T02:00:00Z,470.0,0.0,-5.0
2024-05-10T03:00:00Z,480.0,-5.0,0.0
";
    (StatusCode::OK, body.into())
}

#[tokio::test]
async fn insitu_over_http() {
    let base = serve(Router::new().route("/omni/omni2_h0_mrg1hr", get(omni_handler))).await;
    let provider = HttpInsitu::new(format!("{}/omni", base), Duration::from_secs(5)).unwrap();

    let range = TimeRange::parse("2024-05-10T00:00:00Z", "2024-05-10T02:00:00Z").unwrap();
    let table = provider.fetch(Mission::Omni, &range).await.unwrap();

    assert_eq!(table.len(), 3);
    let speed = table.column("flow_speed").unwrap();
    assert_eq!(speed.values[0], 450.0);
    assert!(speed.values[1].is_nan());
    let angle = table.column("clock_angle").unwrap();
    assert!((angle.values[0] - 0.0).abs() < 1e-9);
    assert!((angle.values[1] - 90.0).abs() < 1e-9);
    assert!((angle.values[2] - 180.0).abs() < 1e-9);
}

#[tokio::test]
async fn insitu_missing_dataset_is_network() {
    let base = serve(Router::new()).await;
    let provider = HttpInsitu::new(base, Duration::from_secs(5)).unwrap();
    let range = TimeRange::parse("2024-05-10", "2024-05-11").unwrap();

    assert!(matches!(
        provider.fetch(Mission::Omni, &range).await,
        Err(HelioError::Network(_))
    ));
}
