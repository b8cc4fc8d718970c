use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use helio_harness::fits::{self, Header, Value};

fn helio_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("helio");
    path
}

fn aia_header(date: &str) -> Header {
    Header::new()
        .with("DATE-OBS", Value::Str(date.into()))
        .with("TELESCOP", Value::Str("SDO/AIA".into()))
        .with("INSTRUME", Value::Str("AIA_3".into()))
        .with("WAVELNTH", Value::Int(193))
        .with("WAVEUNIT", Value::Str("angstrom".into()))
        .with("CTYPE1", Value::Str("HPLN-TAN".into()))
        .with("CTYPE2", Value::Str("HPLT-TAN".into()))
        .with("CDELT1", Value::Float(0.6))
        .with("CDELT2", Value::Float(0.6))
}

fn write_aia(path: &Path, date: &str) {
    let data: Vec<f64> = (0..64).map(|i| 10.0 + i as f64).collect();
    fits::write_image(path, &aia_header(date), 8, 8, &data).unwrap();
}

fn record(id: &str, start: &str, url: &str, sha256: Option<&str>) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "instrument": "AIA",
        "wavelength": 193.0,
        "start": start,
        "end": start,
        "url": url,
        "sha256": sha256,
    })
}

/// Hourly OMNI rows from 2024-05-10 for `days` days; one fill value.
fn omni_csv(days: i64) -> String {
    let mut csv = String::from("time,flow_speed [km/s],by_gsm [nT],bz_gsm [nT]\n");
    let start = chrono::DateTime::parse_from_rfc3339("2024-05-10T00:00:00Z").unwrap();
    for h in 0..days * 24 {
        let t = start + chrono::Duration::hours(h);
        let speed = if h == 5 { 9999.0 } else { 400.0 + h as f64 };
        csv.push_str(&format!(
            "{},{},{},{}\n",
            t.to_rfc3339(),
            speed,
            (h % 7) as f64 - 3.0,
            (h % 5) as f64 - 2.0
        ));
    }
    csv
}

/// A file:// catalog with two AIA images, a local OMNI mirror and a config
/// pointing at both.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let remote = root.join("remote");
    fs::create_dir_all(&remote).unwrap();
    write_aia(&remote.join("aia_a.fits"), "2024-05-10T00:00:00");
    write_aia(&remote.join("aia_b.fits"), "2024-05-10T00:12:00");

    let index = serde_json::json!({
        "records": [
            record("aia_b", "2024-05-10T00:12:00Z", &format!("file://{}/aia_b.fits", remote.display()), None),
            record("aia_a", "2024-05-10T00:00:00Z", &format!("file://{}/aia_a.fits", remote.display()), None),
        ]
    });
    fs::write(root.join("index.json"), index.to_string()).unwrap();

    let omni = root.join("omni");
    fs::create_dir_all(&omni).unwrap();
    fs::write(omni.join("omni2_h0_mrg1hr.csv"), omni_csv(10)).unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[catalog]
url = "file://{root}/index.json"
timeout_secs = 5

[download]
dir = "{root}/data/raw"

[insitu]
url = "file://{root}/omni"

[render]
colormap = "sdoaia193"
scale = "linear"
clip_low = 0.0
clip_high = 100.0
"#,
        root = root.display()
    );
    let config_path = config_dir.join("helio.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_helio(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = helio_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("--progress")
        .arg("off")
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run helio binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

const QUERY: &[&str] = &[
    "--start",
    "2024-05-10",
    "--end",
    "2024-05-11",
    "--instrument",
    "AIA",
    "--wavelength",
    "193",
];

fn with_query<'a>(cmd: &'a str, extra: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![cmd];
    args.extend_from_slice(QUERY);
    args.extend_from_slice(extra);
    args
}

#[test]
fn test_search_lists_records_in_time_order() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_helio(&config_path, &with_query("search", &[]));
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("2 record(s)"));
    let a = stdout.find("aia_a.fits").unwrap();
    let b = stdout.find("aia_b.fits").unwrap();
    assert!(a < b, "expected earliest first, got: {}", stdout);
}

#[test]
fn test_search_no_match_is_not_an_error() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_helio(
        &config_path,
        &[
            "search",
            "--start",
            "2024-05-10",
            "--end",
            "2024-05-11",
            "--instrument",
            "AIA",
            "--wavelength",
            "17.1 nm",
        ],
    );
    assert!(success);
    assert!(stdout.contains("No matching records."));
}

#[test]
fn test_search_sample_thins_records() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) =
        run_helio(&config_path, &with_query("search", &["--sample", "1 h"]));
    assert!(success);
    assert!(stdout.contains("1 record(s)"), "got: {}", stdout);
    assert!(stdout.contains("aia_a.fits"));
}

#[test]
fn test_search_rejects_reversed_range() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_helio(
        &config_path,
        &[
            "search",
            "--start",
            "2024-05-11",
            "--end",
            "2024-05-10",
            "--instrument",
            "AIA",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("invalid query"), "stderr: {}", stderr);
}

#[test]
fn test_fetch_is_idempotent() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_helio(&config_path, &with_query("fetch", &[]));
    assert!(success, "fetch failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(stdout.matches("downloaded").count(), 2);
    assert!(tmp.path().join("data/raw/aia_a.fits").exists());

    let (stdout, _, success) = run_helio(&config_path, &with_query("fetch", &[]));
    assert!(success);
    assert_eq!(stdout.matches("skipped").count(), 2);
    assert!(!stdout.contains("downloaded"));

    let (stdout, _, success) = run_helio(&config_path, &with_query("fetch", &["--overwrite"]));
    assert!(success);
    assert_eq!(stdout.matches("downloaded").count(), 2);
}

#[test]
fn test_fetch_limit() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_helio(&config_path, &with_query("fetch", &["--limit", "1"]));
    assert!(success);
    assert_eq!(stdout.matches("downloaded").count(), 1);
    assert!(tmp.path().join("data/raw/aia_a.fits").exists());
    assert!(!tmp.path().join("data/raw/aia_b.fits").exists());
}

#[test]
fn test_fetch_rejects_zero_limit() {
    let (tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_helio(&config_path, &with_query("fetch", &["--limit", "0"]));
    assert!(!success);
    assert!(stderr.contains("--limit must be at least 1"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data/raw/aia_a.fits").exists());
}

#[test]
fn test_run_rejects_zero_limit() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("out");

    let (_, stderr, success) = run_helio(
        &config_path,
        &with_query(
            "run",
            &["--limit", "0", "--out-dir", out.to_str().unwrap()],
        ),
    );
    assert!(!success);
    assert!(stderr.contains("invalid query"), "stderr: {}", stderr);
    assert!(!tmp.path().join("data/raw/aia_a.fits").exists());
}

#[test]
fn test_fetch_reports_every_file_then_fails() {
    let (tmp, config_path) = setup_test_env();
    let remote = tmp.path().join("remote");
    let index = serde_json::json!({
        "records": [
            record("aia_a", "2024-05-10T00:00:00Z", &format!("file://{}/aia_a.fits", remote.display()), None),
            record("aia_b", "2024-05-10T00:12:00Z", &format!("file://{}/aia_b.fits", remote.display()), Some("00")),
            record("missing", "2024-05-10T00:24:00Z", &format!("file://{}/missing.fits", remote.display()), None),
        ]
    });
    fs::write(tmp.path().join("index.json"), index.to_string()).unwrap();

    let (stdout, stderr, success) = run_helio(&config_path, &with_query("fetch", &[]));
    assert!(!success);
    assert!(stdout.contains("downloaded"));
    assert!(stdout.contains("aia_b.fits: download of aia_b.fits failed: checksum mismatch"));
    assert!(stdout.contains("missing.fits"));
    assert!(stderr.contains("2 of 3 file(s) failed"), "stderr: {}", stderr);
    assert!(tmp.path().join("data/raw/aia_a.fits").exists());
    assert!(!tmp.path().join("data/raw/aia_b.fits").exists());
}

#[test]
fn test_info_prints_metadata() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("remote/aia_a.fits");

    let (stdout, stderr, success) = run_helio(&config_path, &["info", file.to_str().unwrap()]);
    assert!(success, "info failed: {}", stderr);
    assert!(stdout.contains("AIA_3"));
    assert!(stdout.contains("8 x 8 px"));
    assert!(stdout.contains("2024-05-10T00:00:00+00:00"));
    assert!(stdout.contains("min 10.000, max 73.000"));

    let (stdout, _, success) =
        run_helio(&config_path, &["info", file.to_str().unwrap(), "--json"]);
    assert!(success);
    let v: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(v["width"], 8);
    assert_eq!(v["meta"]["instrument"], "AIA_3");
}

#[test]
fn test_info_rejects_non_fits() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("notes.txt");
    fs::write(&file, "not an image").unwrap();

    let (_, stderr, success) = run_helio(&config_path, &["info", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported format"), "stderr: {}", stderr);
}

#[test]
fn test_show_single_map_and_sequence() {
    let (tmp, config_path) = setup_test_env();
    let remote = tmp.path().join("remote");

    let png = tmp.path().join("aia.png");
    let (stdout, stderr, success) = run_helio(
        &config_path,
        &[
            "show",
            remote.join("aia_a.fits").to_str().unwrap(),
            "-o",
            png.to_str().unwrap(),
        ],
    );
    assert!(success, "show failed: {}", stderr);
    assert!(stdout.contains("aia.png"));
    assert_eq!(&fs::read(&png).unwrap()[1..4], b"PNG");

    let frames = tmp.path().join("frames");
    let (_, stderr, success) = run_helio(
        &config_path,
        &[
            "show",
            remote.to_str().unwrap(),
            "-o",
            frames.to_str().unwrap(),
            "--colormap",
            "gray",
        ],
    );
    assert!(success, "show sequence failed: {}", stderr);
    assert!(frames.join("frame_000.png").exists());
    assert!(frames.join("frame_001.png").exists());
}

#[test]
fn test_show_crop() {
    let (tmp, config_path) = setup_test_env();
    let png = tmp.path().join("crop.png");

    let (_, stderr, success) = run_helio(
        &config_path,
        &[
            "show",
            tmp.path().join("remote/aia_a.fits").to_str().unwrap(),
            "-o",
            png.to_str().unwrap(),
            "--crop",
            "-1,-1,1,1",
        ],
    );
    assert!(success, "crop failed: {}", stderr);
    assert!(png.exists());
}

#[test]
fn test_convert() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_helio(&config_path, &["convert", "1 AU", "km"]);
    assert!(success);
    let value: f64 = stdout.split_whitespace().next().unwrap().parse().unwrap();
    assert!((value - 149_597_870.7).abs() < 1e-3);
    assert!(stdout.trim_end().ends_with("km"));

    let (_, stderr, success) = run_helio(&config_path, &["convert", "1 AU", "s"]);
    assert!(!success);
    assert!(stderr.contains("incompatible units"), "stderr: {}", stderr);
}

#[test]
fn test_delay_is_about_three_and_a_half_days() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_helio(
        &config_path,
        &[
            "delay",
            "--speed",
            "500 km/s",
            "--from",
            "2024-05-10T00:00:00Z",
        ],
    );
    assert!(success);
    assert!(stdout.contains("Travel time: 3.447 d"), "got: {}", stdout);
    assert!(stdout.contains("Arrival:     2024-05-13T10:43"));
}

#[test]
fn test_delay_with_unrepresentable_arrival_fails_cleanly() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_helio(
        &config_path,
        &["delay", "--speed", "1e-6 m/s", "--from", "2024-05-10T00:00:00Z"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid query"), "stderr: {}", stderr);
    assert!(!stderr.contains("panicked"), "stderr: {}", stderr);
}

#[test]
fn test_convert_rejects_exponent_overflow() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_helio(&config_path, &["convert", "1 m^127 m", "m"]);
    assert!(!success);
    assert!(!stderr.contains("panicked"), "stderr: {}", stderr);
}

#[test]
fn test_insitu_then_plot() {
    let (tmp, config_path) = setup_test_env();
    let csv = tmp.path().join("omni.csv");

    let (stdout, stderr, success) = run_helio(
        &config_path,
        &[
            "insitu",
            "--start",
            "2024-05-10",
            "--end",
            "2024-05-12",
            "-o",
            csv.to_str().unwrap(),
        ],
    );
    assert!(success, "insitu failed: {}", stderr);
    assert!(stdout.contains("Wrote 49 OMNI row(s)"), "got: {}", stdout);
    let written = fs::read_to_string(&csv).unwrap();
    assert!(written.starts_with("time,"));
    assert!(written.contains("clock_angle"));

    let png = tmp.path().join("omni.png");
    let (stdout, stderr, success) = run_helio(
        &config_path,
        &[
            "plot",
            csv.to_str().unwrap(),
            "-o",
            png.to_str().unwrap(),
            "--panel",
            "flow_speed",
            "--panel",
            "clock_angle:#ff7f0e",
            "--marker",
            "2024-05-11T06:00:00Z",
            "--marker",
            "2025-01-01T00:00:00Z",
        ],
    );
    assert!(success, "plot failed: {}", stderr);
    assert!(stdout.contains("2 panel(s), 1 marker(s) (1 outside the data)"));
    assert!(png.exists());

    let (_, stderr, success) = run_helio(
        &config_path,
        &[
            "plot",
            csv.to_str().unwrap(),
            "-o",
            png.to_str().unwrap(),
            "--panel",
            "density",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("density"));
}

#[test]
fn test_insitu_unknown_mission() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_helio(
        &config_path,
        &[
            "insitu",
            "--mission",
            "ACE",
            "--start",
            "2024-05-10",
            "--end",
            "2024-05-11",
        ],
    );
    assert!(!success);
    assert!(stderr.contains("ACE"));
}

#[test]
fn test_inventory_after_fetch() {
    let (_tmp, config_path) = setup_test_env();

    run_helio(&config_path, &with_query("fetch", &[]));
    let (stdout, _, success) = run_helio(&config_path, &["inventory"]);
    assert!(success);
    assert!(stdout.contains("Files:       2"));
    assert!(stdout.contains("2 fits"));
    assert!(stdout.contains("aia_a.fits"));
}

#[test]
fn test_run_end_to_end() {
    let (tmp, config_path) = setup_test_env();
    let out = tmp.path().join("out");

    let (stdout, stderr, success) = run_helio(
        &config_path,
        &with_query("run", &["--out-dir", out.to_str().unwrap()]),
    );
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Matched 2 record(s); 1 downloaded, 0 skipped"));
    assert!(stdout.contains("Travel time: 3.447 d"));
    assert!(stdout.contains("Arrival:     2024-05-13T10:43"));
    assert!(out.join("map.png").exists());
    assert!(out.join("insitu.csv").exists());
    assert!(out.join("insitu.png").exists());
}

#[test]
fn test_run_stops_at_first_failure() {
    let (tmp, config_path) = setup_test_env();
    fs::remove_dir_all(tmp.path().join("omni")).unwrap();
    let out = tmp.path().join("out");

    let (_, stderr, success) = run_helio(
        &config_path,
        &with_query("run", &["--out-dir", out.to_str().unwrap()]),
    );
    assert!(!success);
    assert!(stderr.contains("network error"), "stderr: {}", stderr);
    assert!(tmp.path().join("data/raw/aia_a.fits").exists());
    assert!(out.join("map.png").exists());
    assert!(!out.join("insitu.png").exists());
}

#[test]
fn test_delay_needs_no_config_file() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, success) = run_helio(
        &tmp.path().join("nope.toml"),
        &["delay", "--speed", "400 km/s"],
    );
    assert!(success);
    assert!(stdout.contains("Travel time:"));
}

#[test]
fn test_completions() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_helio(&config_path, &["completions", "bash"]);
    assert!(success);
    assert!(stdout.contains("helio"));
}
