use anomaly_analysis_service::{
    analysis::AnalysisService,
    api::{create_router, ApiResponse},
    config::Config,
    gemini::{GeminiError, GenerationConfig, GenerativeBackend, RemoteFile},
    models::ContentPart,
    report::RegexReportParser,
    store::{AnalysisStore, SqliteStore},
};
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const BOUNDARY: &str = "----anomaly-test-boundary";

const REPORT: &str = "\
🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : ventes_mars.xlsx
📍 Localisation : Feuille Caisse, ligne 14
🔎 Description : Écart de caisse critique entre ventes et encaissements
💰 Impact : 1 500 000 MGA
✅ Recommandation : Rapprocher les tickets du jour

🚨 **ANOMALIE DÉTECTÉE**
📁 Fichier : ventes_mars.xlsx
📍 Localisation : Feuille Stock, colonne F
🔎 Description : Stock physique inférieur au stock théorique
💰 Impact : 450 000 MGA
✅ Recommandation : Inventaire tournant

**RÉSUMÉ**
Deux anomalies relevées.
";

struct FakeGemini {
    generations: AtomicUsize,
    uploads: AtomicUsize,
}

#[async_trait]
impl GenerativeBackend for FakeGemini {
    async fn upload_file(
        &self,
        _path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<RemoteFile, GeminiError> {
        let n = self.uploads.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(RemoteFile {
            name: format!("files/{}", n),
            uri: format!("https://files.test/{}/{}", n, display_name),
            mime_type: mime_type.to_string(),
            state: Some("ACTIVE".to_string()),
        })
    }

    async fn delete_file(&self, _name: &str) -> Result<(), GeminiError> {
        Ok(())
    }

    async fn generate(
        &self,
        _model: &str,
        _parts: &[ContentPart],
        _config: &GenerationConfig,
    ) -> Result<String, GeminiError> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        Ok(REPORT.to_string())
    }
}

struct TestApp {
    router: Router,
    backend: Arc<FakeGemini>,
    store: Arc<SqliteStore>,
}

async fn test_app() -> TestApp {
    let config = Config {
        gemini_api_key: "test".to_string(),
        models: vec!["flash".to_string()],
        max_rounds: 1,
        retry_base_delay: Duration::ZERO,
        temp_dir: std::env::temp_dir().join(format!("anomaly-api-{}", uuid::Uuid::new_v4())),
        ..Config::default()
    };

    let backend = Arc::new(FakeGemini {
        generations: AtomicUsize::new(0),
        uploads: AtomicUsize::new(0),
    });
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let service = Arc::new(AnalysisService::new(
        &config,
        backend.clone(),
        Arc::new(RegexReportParser),
        store.clone(),
    ));

    TestApp {
        router: create_router(service, &config),
        backend,
        store,
    }
}

/// Hand-built multipart body: `(field, Some(file name), content)`
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, file_name, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match file_name {
            Some(file_name) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                        field, file_name
                    )
                    .as_bytes(),
                );
            }
            None => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field).as_bytes(),
                );
            }
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/process_query")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, ApiResponse) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = test_app().await;

    let (status, body) = send(&app.router, get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.success);
    assert_eq!(body.data.unwrap()["status"], "healthy");
}

#[tokio::test]
async fn test_upload_without_files_is_rejected() {
    let app = test_app().await;

    let request = upload_request(&[("prompt", None, "Analyse".as_bytes())]);
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!body.success);
    assert_eq!(body.error.as_deref(), Some("Please provide files to analyze."));
    assert_eq!(app.backend.generations.load(Ordering::SeqCst), 0);
    assert_eq!(app.backend.uploads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_upload_is_analyzed_and_stored() {
    let app = test_app().await;

    let request = upload_request(&[
        ("prompt", None, "Vérifiez la caisse".as_bytes()),
        ("thread_id", None, "0".as_bytes()),
        ("files", Some("ventes_mars.xlsx"), "PK\x03\x04 fake workbook".as_bytes()),
    ]);
    let (status, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.success);
    let data = body.data.unwrap();
    assert_eq!(data["status"], "Success");
    assert_eq!(data["model_used"], "flash");
    assert_eq!(data["anomaly_summary"]["total_anomalies"], 2);
    assert_eq!(data["anomaly_summary"]["total_impact"], 1_950_000.0);
    assert_eq!(data["anomaly_summary"]["impact_currency"], "MGA");
    assert_eq!(data["anomalies"].as_array().unwrap().len(), 2);
    assert_eq!(data["file_statistics"]["file_count"], 1);
    assert_eq!(app.backend.generations.load(Ordering::SeqCst), 1);

    let thread_id = data["thread_id"].as_i64().unwrap();
    let (status, body) = send(&app.router, get(&format!("/api/thread/{}", thread_id))).await;
    assert_eq!(status, StatusCode::OK);
    let thread = body.data.unwrap();
    assert_eq!(thread["title"], "Analysis: ventes_mars.xlsx");
    assert_eq!(thread["messages"].as_array().unwrap().len(), 2);
    assert_eq!(thread["messages"][0]["content"], "Vérifiez la caisse");
    assert_eq!(thread["messages"][0]["files"][0], "ventes_mars.xlsx");
    assert_eq!(thread["anomalies"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_thread() {
    let app = test_app().await;

    let (status, body) = send(&app.router, get("/api/thread/404")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!body.success);

    let request = upload_request(&[
        ("thread_id", None, "404".as_bytes()),
        ("files", Some("stock.csv"), "sku,qty\nA,3\n".as_bytes()),
    ]);
    let (status, _) = send(&app.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(app.backend.generations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_history_and_delete() {
    let app = test_app().await;

    for title in ["Analysis: a.csv", "Analysis: b.csv", "Analysis: c.csv"] {
        app.store.create_thread(title).await.unwrap();
    }

    let (status, body) = send(&app.router, get("/api/history?limit=2&offset=0")).await;
    assert_eq!(status, StatusCode::OK);
    let page = body.data.unwrap();
    assert_eq!(page["history"].as_array().unwrap().len(), 2);
    assert_eq!(page["pagination"]["total"], 3);
    assert_eq!(page["pagination"]["limit"], 2);

    let thread_id = page["history"][0]["id"].as_i64().unwrap();
    let delete = Request::builder()
        .method("DELETE")
        .uri(format!("/api/thread/{}", thread_id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app.router, delete).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.data.unwrap()["deleted"], true);

    let delete_again = Request::builder()
        .method("DELETE")
        .uri(format!("/api/thread/{}", thread_id))
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app.router, delete_again).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = send(&app.router, get("/api/history")).await;
    assert_eq!(body.data.unwrap()["pagination"]["total"], 2);
}

#[tokio::test]
async fn test_invalid_thread_path() {
    let app = test_app().await;

    let (status, body) = send(&app.router, get("/api/thread/abc")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.error.unwrap().contains("abc"));
}
