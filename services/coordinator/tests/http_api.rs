//! End-to-end tests against the router bound on an ephemeral port.

use coordinator_service::{build_state, create_router, CoordinatorConfig, CoordinatorMetrics, ModelsResponse, UploadResponse};
use reqwest::multipart::{Form, Part};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use tempfile::TempDir;

struct Harness {
    base: String,
    client: reqwest::Client,
    models_dir: PathBuf,
    _root: TempDir,
}

impl Harness {
    async fn start(shards: &[(&str, &str)]) -> Self {
        let root = TempDir::new().unwrap();
        let datasets = root.path().join("datasets");
        std::fs::create_dir(&datasets).unwrap();
        for (name, content) in shards {
            std::fs::write(datasets.join(name), content).unwrap();
        }
        Self::start_in(root, datasets).await
    }

    async fn start_in(root: TempDir, datasets: PathBuf) -> Self {
        let public = root.path().join("public");
        std::fs::create_dir_all(&public).unwrap();
        std::fs::write(public.join("index.html"), "<h1>Training coordinator</h1>").unwrap();
        // created by build_state
        let models_dir = root.path().join("models");

        let mut env = config::Map::new();
        env.insert("TRAINHUB_DATASETS_DIR".to_string(), datasets.display().to_string());
        env.insert("TRAINHUB_MODELS_DIR".to_string(), models_dir.display().to_string());
        env.insert("TRAINHUB_PUBLIC_DIR".to_string(), public.display().to_string());
        let cfg = CoordinatorConfig::from_env_map(env, None).unwrap();

        let state = build_state(&cfg, CoordinatorMetrics::unregistered().unwrap()).await.unwrap();
        let app = create_router(state, &cfg.public_dir, cfg.max_upload_bytes);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { base: format!("http://{addr}"), client: reqwest::Client::new(), models_dir, _root: root }
    }

    async fn get_dataset(&self) -> reqwest::Response {
        self.client.get(format!("{}/get-dataset", self.base)).send().await.unwrap()
    }

    async fn upload(&self, form: Form) -> reqwest::Response {
        self.client.post(format!("{}/upload-model", self.base)).multipart(form).send().await.unwrap()
    }

    async fn models(&self) -> Vec<String> {
        let resp = self.client.get(format!("{}/list-models", self.base)).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        resp.json::<ModelsResponse>().await.unwrap().models
    }
}

fn model_form(name: &str, content: &[u8]) -> Form {
    Form::new().part("model", Part::bytes(content.to_vec()).file_name(name.to_string()))
}

fn disposition(resp: &reqwest::Response) -> String {
    resp.headers()
        .get(reqwest::header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn dispenses_shards_in_rotation() {
    let h = Harness::start(&[("b.csv", "bbb"), ("a.csv", "aaa"), ("c.csv", "ccc")]).await;
    let mut seen = Vec::new();
    for _ in 0..4 {
        let resp = h.get_dataset().await;
        assert_eq!(resp.status(), 200);
        let header = disposition(&resp);
        let body = resp.text().await.unwrap();
        assert!(header.contains(&format!("filename=\"{}.csv\"", &body[..1])), "{header}");
        seen.push(body);
    }
    assert_eq!(seen, vec!["aaa", "bbb", "ccc", "aaa"]);
}

#[tokio::test]
async fn empty_catalog_returns_server_error() {
    let h = Harness::start(&[]).await;
    for _ in 0..2 {
        let resp = h.get_dataset().await;
        assert_eq!(resp.status(), 500);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "No datasets available.");
    }
}

#[tokio::test]
async fn missing_dataset_dir_returns_server_error() {
    let root = TempDir::new().unwrap();
    let missing = root.path().join("nope");
    let h = Harness::start_in(root, missing).await;
    let resp = h.get_dataset().await;
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Dataset directory unavailable"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispenses_cover_full_cycles() {
    let h = Harness::start(&[("a.csv", "a"), ("b.csv", "b"), ("c.csv", "c")]).await;
    let futures: Vec<_> = (0..30)
        .map(|_| {
            let client = h.client.clone();
            let url = format!("{}/get-dataset", h.base);
            tokio::spawn(async move { client.get(url).send().await.unwrap().text().await.unwrap() })
        })
        .collect();
    let mut counts: HashMap<String, usize> = HashMap::new();
    for f in futures {
        *counts.entry(f.await.unwrap()).or_default() += 1;
    }
    assert_eq!(counts.len(), 3);
    assert!(counts.values().all(|&c| c == 10), "{counts:?}");
}

#[tokio::test]
async fn upload_then_list_includes_generated_name() {
    let h = Harness::start(&[]).await;
    assert!(h.models().await.is_empty());

    let resp = h.upload(model_form("hello.txt", b"0123456789")).await;
    assert_eq!(resp.status(), 200);
    let body: UploadResponse = resp.json().await.unwrap();
    assert_eq!(body.message, "Model uploaded successfully.");
    assert!(body.filename.ends_with(".txt"), "{}", body.filename);

    assert_eq!(h.models().await, vec![body.filename.clone()]);
    assert_eq!(std::fs::read(h.models_dir.join(&body.filename)).unwrap(), b"0123456789");
}

#[tokio::test]
async fn upload_ignores_text_fields() {
    let h = Harness::start(&[]).await;
    let form = Form::new()
        .text("worker", "w-1")
        .part("model", Part::bytes(b"weights".to_vec()).file_name("m.h5"))
        .text("epoch", "3");
    let resp = h.upload(form).await;
    assert_eq!(resp.status(), 200);
    let body: UploadResponse = resp.json().await.unwrap();
    assert!(body.filename.ends_with(".h5"));
    assert_eq!(h.models().await, vec![body.filename]);
}

#[tokio::test]
async fn upload_with_unexpected_file_field_stores_nothing() {
    let h = Harness::start(&[]).await;
    let form = Form::new()
        .part("model", Part::bytes(b"weights".to_vec()).file_name("m.h5"))
        .part("other", Part::bytes(b"nope".to_vec()).file_name("other.bin"));
    let resp = h.upload(form).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("unexpected file field `other`"), "{body}");
    assert!(h.models().await.is_empty());
    assert_eq!(std::fs::read_dir(&h.models_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_with_two_model_files_stores_nothing() {
    let h = Harness::start(&[]).await;
    let form = Form::new()
        .part("model", Part::bytes(b"first".to_vec()).file_name("a.h5"))
        .part("model", Part::bytes(b"second".to_vec()).file_name("b.h5"));
    let resp = h.upload(form).await;
    assert_eq!(resp.status(), 400);
    assert!(h.models().await.is_empty());
    assert_eq!(std::fs::read_dir(&h.models_dir).unwrap().count(), 0);
}

#[tokio::test]
async fn upload_without_file_is_rejected() {
    let h = Harness::start(&[]).await;
    h.upload(model_form("seed.bin", b"seed")).await;
    let before = h.models().await.len();

    let resp = h.upload(Form::new().text("model", "not a file")).await;
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "No file uploaded.");

    let resp = h.client.post(format!("{}/upload-model", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), 400);

    assert_eq!(h.models().await.len(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_are_all_kept_intact() {
    let h = Harness::start(&[]).await;
    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let client = h.client.clone();
            let url = format!("{}/upload-model", h.base);
            tokio::spawn(async move {
                let content = format!("model-{i}");
                let form = model_form("m.h5", content.as_bytes());
                let body: UploadResponse = client.post(url).multipart(form).send().await.unwrap().json().await.unwrap();
                (body.filename, content)
            })
        })
        .collect();

    let mut expected = HashMap::new();
    for t in tasks {
        let (name, content) = t.await.unwrap();
        expected.insert(name, content);
    }
    assert_eq!(expected.len(), 16);
    let listed: HashSet<String> = h.models().await.into_iter().collect();
    assert_eq!(listed, expected.keys().cloned().collect::<HashSet<_>>());
    for (name, content) in expected {
        assert_eq!(std::fs::read_to_string(h.models_dir.join(name)).unwrap(), content);
    }
}

#[tokio::test]
async fn unreadable_models_dir_returns_server_error() {
    let h = Harness::start(&[]).await;
    std::fs::remove_dir(&h.models_dir).unwrap();
    let resp = h.client.get(format!("{}/list-models", h.base)).send().await.unwrap();
    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("Cannot read models folder"));
}

#[tokio::test]
async fn serves_landing_page_with_cors() {
    let h = Harness::start(&[]).await;
    let resp = h.client.get(format!("{}/", h.base)).header("Origin", "http://worker.local").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "*");
    assert!(resp.text().await.unwrap().contains("Training coordinator"));
}
