#![cfg(unix)]

use std::time::Duration;

use serde_json::{Value, json};
use synthgen_server::{AppConfig, AppState, build_app};
use tokio::task::JoinHandle;

struct TestServer {
    base: String,
    dir: tempfile::TempDir,
    shutdown: tokio::sync::oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn output_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("output")
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let _ = tokio::time::timeout(Duration::from_secs(5), self.handle).await;
    }
}

/// Start the app with `sh -c <script>` standing in for the generator. The
/// generator arguments follow as `$1..`, so `$5` is the patient count.
async fn start_server(script: &str) -> TestServer {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut cfg = AppConfig::default();
    cfg.output.dir = dir.path().join("output");
    cfg.generator.properties_file = dir.path().join("synthea.properties");
    cfg.generator.executable = "sh".into();
    cfg.generator.launch_flags = vec!["-c".into(), script.into(), "fake-synthea".into()];
    start_with_config(cfg, dir).await
}

async fn start_with_config(cfg: AppConfig, dir: tempfile::TempDir) -> TestServer {
    let state = AppState::new(cfg);
    state.catalog.ensure_layout().expect("layout");
    let app = build_app(state);

    // Bind to an ephemeral port
    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.await;
            })
            .await;
    });

    TestServer {
        base: format!("http://{addr}"),
        dir,
        shutdown: tx,
        handle,
    }
}

async fn read_stream(client: &reqwest::Client, server: &TestServer) -> String {
    let resp = client.get(server.url("/stream")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    tokio::time::timeout(Duration::from_secs(10), resp.text())
        .await
        .expect("stream should end")
        .unwrap()
}

#[tokio::test]
async fn idle_endpoints() {
    let server = start_server("true").await;
    let client = reqwest::Client::new();

    // GET /healthz
    let resp = client.get(server.url("/healthz")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // GET / shows the output directory
    let resp = client.get(server.url("/")).send().await.unwrap();
    assert!(resp.status().is_success());
    let page = resp.text().await.unwrap();
    assert!(page.contains(&server.output_dir().display().to_string()));

    // GET /status before any job
    let body: Value = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "idle");

    // GET /stream with no job ends at once
    let text = read_stream(&client, &server).await;
    assert!(text.contains("event: end"));
    assert!(text.contains("data: CLOSE"));

    // GET /list_files on an empty tree
    let body: Value = client
        .get(server.url("/list_files"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body, json!([]));

    // GET /download_all with nothing to zip
    let resp = client.get(server.url("/download_all")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");

    // x-request-id is echoed
    let resp = client
        .get(server.url("/healthz"))
        .header("x-request-id", "abc-123")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.headers()["x-request-id"], "abc-123");

    server.stop().await;
}

#[tokio::test]
async fn list_files_recreates_missing_output_dir() {
    let server = start_server("true").await;
    let client = reqwest::Client::new();
    std::fs::remove_dir_all(server.output_dir()).unwrap();

    let resp = client.get(server.url("/list_files")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!([]));
    assert!(server.output_dir().join("csv").is_dir());

    server.stop().await;
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let server = start_server("true").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 0 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");

    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 5, "output_formats": ["pdf"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);

    let resp = client
        .post(server.url("/generate"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("output_formats=csv")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("num_patients"));

    // Nothing was started
    let body: Value = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "idle");

    server.stop().await;
}

#[tokio::test]
async fn generation_round_trip() {
    let script = "sleep 0.5; echo id,name > csv/patients.csv; echo \"Generated $5 patients\"";
    let server = start_server(script).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/generate"))
        .json(&json!({
            "num_patients": 3,
            "output_formats": ["fhir_stu3", "csv", "fhir_r4"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["job"]["state"], "running");
    assert_eq!(body["dropped_formats"], json!(["fhir_stu3"]));

    // One job at a time; cleanup waits too
    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let resp = client.post(server.url("/cleanup")).send().await.unwrap();
    assert_eq!(resp.status(), 409);

    let text = read_stream(&client, &server).await;
    assert!(text.contains("data: Running command: sh -c"));
    assert!(text.contains("data: Generated 3 patients"));
    assert!(text.contains("data: - csv/patients.csv"));
    assert!(text.contains("data: REFRESH_FILES"));
    assert!(text.contains("event: end"));
    let job_id = body["job"]["id"].as_str().unwrap();
    assert!(text.contains(&format!("id: {job_id}:1\n")));

    let props =
        std::fs::read_to_string(server.dir.path().join("synthea.properties")).unwrap();
    assert!(props.contains("exporter.csv.export = true\n"));
    assert!(props.contains("exporter.fhir.export = true\n"));
    assert!(props.contains("exporter.fhir_stu3.export = false\n"));
    assert!(props.contains("exporter.json.export = false\n"));

    let body: Value = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"], "succeeded");
    assert_eq!(body["exit_code"], 0);

    let files: Value = client
        .get(server.url("/list_files"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(files.as_array().unwrap().len(), 1);
    assert_eq!(files[0]["name"], "csv/patients.csv");
    assert_eq!(files[0]["category"], "csv");
    assert_eq!(files[0]["size"], 8);

    // Single download
    let resp = client
        .get(server.url("/download/csv/patients.csv"))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("patients.csv"));
    assert_eq!(resp.text().await.unwrap(), "id,name\n");

    let resp = client
        .get(server.url("/download/csv/missing.csv"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .get(server.url("/download/%2E%2E%2Fsynthea.properties"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Zip download
    let resp = client.get(server.url("/download_all")).send().await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.headers()["content-type"], "application/zip");
    assert!(
        resp.headers()["content-disposition"]
            .to_str()
            .unwrap()
            .contains("synthea_output.zip")
    );
    let bytes = resp.bytes().await.unwrap();
    assert_eq!(&bytes[..2], b"PK");

    // Cleanup
    let resp = client.post(server.url("/cleanup")).send().await.unwrap();
    assert!(resp.status().is_success());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "success");
    assert_eq!(body["removed_files"], 1);
    assert_eq!(body["failures"], 0);

    let files: Value = client
        .get(server.url("/list_files"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(files, json!([]));
    assert!(server.output_dir().join("fhir").is_dir());

    server.stop().await;
}

#[tokio::test]
async fn form_encoded_generation() {
    let server = start_server("echo \"count=$6 region=$9\"").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/generate"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("num_patients=2&state=Ohio&output_formats=csv&output_formats=json&no_numbers=on")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    let command: Vec<String> = serde_json::from_value(body["job"]["command"].clone()).unwrap();
    assert!(command.contains(&"--generate.append_numbers_to_person_names=false".to_string()));
    assert_eq!(command.last().map(String::as_str), Some("Ohio"));

    let text = read_stream(&client, &server).await;
    assert!(text.contains("data: count=2 region=Ohio"));
    assert!(text.contains("data: Warning: No files were generated"));

    let props =
        std::fs::read_to_string(server.dir.path().join("synthea.properties")).unwrap();
    assert!(props.contains("exporter.csv.export = true\n"));
    assert!(props.contains("exporter.json.export = true\n"));

    server.stop().await;
}

#[tokio::test]
async fn failed_generation_is_reported_on_the_stream() {
    let server = start_server("echo starting; echo 'SLF4J: noise' >&2; echo boom >&2; exit 4").await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 1, "output_formats": ["csv"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let text = read_stream(&client, &server).await;
    assert!(text.contains("data: starting"));
    assert!(text.contains("data: Error: boom"));
    assert!(!text.contains("SLF4J"));
    assert!(text.contains("data: Error: Process failed with exit code 4"));
    assert!(!text.contains("REFRESH_FILES"));
    assert!(text.contains("data: CLOSE"));

    let body: Value = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["state"], "failed");
    assert_eq!(body["exit_code"], 4);

    // A finished job frees the slot
    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    read_stream(&client, &server).await;

    server.stop().await;
}

/// The SSE id of the event whose data is exactly `data`.
fn id_of(stream: &str, data: &str) -> String {
    let needle = format!("data: {data}");
    stream
        .split("\n\n")
        .find(|event| event.lines().any(|l| l == needle))
        .and_then(|event| event.lines().find_map(|l| l.strip_prefix("id: ")))
        .unwrap_or_else(|| panic!("no event with {needle:?} in {stream:?}"))
        .to_string()
}

async fn resume_stream(client: &reqwest::Client, server: &TestServer, last_id: &str) -> String {
    let resp = client
        .get(server.url("/stream"))
        .header("last-event-id", last_id)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    tokio::time::timeout(Duration::from_secs(10), resp.text())
        .await
        .expect("stream should end")
        .unwrap()
}

#[tokio::test]
async fn stream_resume_is_scoped_to_the_job() {
    // One line per requested patient
    let script = "i=0; while [ $i -lt $5 ]; do i=$((i+1)); echo \"job$5 line$i\"; done";
    let server = start_server(script).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 3 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let first = read_stream(&client, &server).await;
    assert!(first.contains("data: job3 line3"));

    // Resuming inside the same job skips what was seen
    let resumed = resume_stream(&client, &server, &id_of(&first, "job3 line1")).await;
    assert!(!resumed.contains("Running command"));
    assert!(!resumed.contains("data: job3 line1"));
    assert!(resumed.contains("data: job3 line2"));
    assert!(resumed.contains("data: CLOSE"));

    // An id from the first job replays the second job from the start
    let stale = id_of(&first, "job3 line3");
    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 10 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let second = read_stream(&client, &server).await;
    assert!(second.contains("data: job10 line10"));

    let replayed = resume_stream(&client, &server, &stale).await;
    assert!(replayed.contains("data: Running command"));
    assert!(replayed.contains("data: job10 line1\n"));
    assert!(replayed.contains("data: job10 line3\n"));
    assert!(!replayed.contains("event: gap"));

    // A bare sequence number is not a resume point either
    let bare = resume_stream(&client, &server, "6").await;
    assert!(bare.contains("data: job10 line1\n"));

    server.stop().await;
}

#[tokio::test]
async fn spawn_failure_is_a_server_error() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let mut cfg = AppConfig::default();
    cfg.output.dir = dir.path().join("output");
    cfg.generator.properties_file = dir.path().join("synthea.properties");
    cfg.generator.executable = "/definitely/not/java".into();
    let server = start_with_config(cfg, dir).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(server.url("/generate"))
        .json(&json!({ "num_patients": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert!(body["message"].as_str().unwrap().contains("Failed to start generator"));

    // The slot stays free
    let body: Value = client
        .get(server.url("/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "idle");

    server.stop().await;
}
