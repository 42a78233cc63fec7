use std::path::Path;

use axum::extract::Query;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use pretty_assertions::assert_eq;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use scanforge::config::Config;
use scanforge::server::{serve_on, AppState};

struct Harness {
    base: String,
    client: reqwest::Client,
    _uploads: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let uploads = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.upload_dir = uploads.path().to_path_buf();
        config.scan.default_timeout_ms = 5_000;
        // Any configured model token points at a closed port.
        config.audit.endpoint = "http://127.0.0.1:9/chat/completions".into();
        config.audit.timeout_secs = 2;

        let state = AppState::from_config(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(serve_on(listener, state));

        Self {
            base,
            client: reqwest::Client::new(),
            _uploads: uploads,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.get(self.url(path)).send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        let response = self.client.delete(self.url(path)).send().await.unwrap();
        (response.status(), response.json().await.unwrap())
    }

    async fn upload(&self, name: &str, content: &str) -> (StatusCode, Value) {
        let form = Form::new().part(
            "files",
            Part::text(content.to_string()).file_name(name.to_string()),
        );
        let response = self
            .client
            .post(self.url("/api/security/upload"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        (response.status(), response.json().await.unwrap())
    }
}

/// A page that echoes `q` unescaped.
async fn vulnerable_app() -> String {
    async fn search(Query(params): Query<std::collections::HashMap<String, String>>) -> Html<String> {
        let q = params.get("q").cloned().unwrap_or_default();
        Html(format!("<html><body>Results for {q}</body></html>"))
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let app = Router::new().route("/", get(search));
    tokio::spawn(async move { axum::serve(listener, app).await });
    url
}

#[tokio::test]
async fn health_reports_registered_exploits() {
    let h = Harness::start().await;
    let (status, body) = h.get("/api/security/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["exploits"], 17);

    let (_, catalog) = h.get("/api/security/exploits").await;
    assert_eq!(catalog["data"]["total"], 17);
    assert!(!catalog["data"]["categories"].as_array().unwrap().is_empty());

    let (status, _) = h.get("/api/security/exploits/sql-injection").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = h.get("/api/security/exploits/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unlisted_target_is_forbidden_with_allowlist() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/api/security/sql-injection",
            json!({ "target": "https://google.com" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);
    assert!(!body["allowedDomains"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_target_is_a_validation_error() {
    let h = Harness::start().await;
    let (status, body) = h
        .post("/api/security/xss", json!({ "target": "invalid-url" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = h.post("/api/security/xss", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_exploit_is_not_found() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/api/security/no-such-exploit",
            json!({ "target": "http://localhost:3000" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn live_scan_is_saved_and_reported() {
    let h = Harness::start().await;
    let target = vulnerable_app().await;

    let (status, body) = h
        .post(
            "/api/security/xss",
            json!({ "target": target, "options": { "timeout": 5000 } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let scan = &body["data"];
    let findings = scan["vulnerabilities"].as_array().unwrap().len();
    assert_eq!(scan["statistics"]["totalVulnerabilities"], findings);
    let scan_id = scan["scanId"].as_str().unwrap().to_string();

    let (status, stored) = h.get(&format!("/api/security/results/{scan_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stored["data"]["scanId"], scan_id.as_str());

    let (status, progress) = h.get(&format!("/api/security/scan/{scan_id}/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["data"]["scanId"], scan_id.as_str());

    let (_, history) = h.get("/api/security/results?exploitName=xss").await;
    assert_eq!(history["data"]["total"], 1);

    let (_, stats) = h.get("/api/security/stats").await;
    assert_eq!(stats["data"]["completedScans"], 1);
    assert_eq!(stats["data"]["activeScans"], 0);

    let html = h
        .client
        .get(h.url(&format!("/api/security/report/{scan_id}?format=html")))
        .send()
        .await
        .unwrap();
    assert_eq!(html.status(), StatusCode::OK);
    assert!(html.text().await.unwrap().contains("Executive Summary"));

    let (status, _) = h.get("/api/security/report/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, purged) = h.delete("/api/security/results").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(purged["data"]["clearedCount"], 1);
}

#[tokio::test]
async fn suite_requires_a_selection() {
    let h = Harness::start().await;
    let (status, _) = h
        .post(
            "/api/security/suite",
            json!({ "target": "http://localhost:3000", "selectedExploits": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upload_scan_and_delete_file() {
    let h = Harness::start().await;

    let (status, uploaded) = h
        .upload(
            "users.js",
            "db.query(\"SELECT * FROM users WHERE id = \" + req.params.id);\n",
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let file = &uploaded["data"]["files"][0];
    let file_id = file["fileId"].as_str().unwrap().to_string();
    let file_path = file["filePath"].as_str().unwrap().to_string();
    assert!(Path::new(&file_path).exists());

    let (status, batch) = h
        .post(
            "/api/security/scan-files",
            json!({ "selectedExploits": ["sql-injection", "xss"], "fileIds": [file_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(batch["data"]["totalFiles"], 1);
    assert_eq!(batch["data"]["totalExploits"], 2);
    let results = batch["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0]["vulnerabilities"]
        .as_array()
        .unwrap()
        .iter()
        .any(|v| v["type"].as_str().unwrap().contains("SQL injection")));

    let suite_id = batch["data"]["suiteId"].as_str().unwrap();
    let (status, report) = h.get(&format!("/api/security/report/{suite_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["data"]["scans"].as_array().unwrap().len(), 2);

    let (status, deleted) = h.delete(&format!("/api/security/files/{file_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["data"]["fileId"], file_id.as_str());
    assert_eq!(deleted["data"]["fileName"], "users.js");
    assert!(!Path::new(&file_path).exists());

    let (_, listing) = h.get("/api/security/files").await;
    assert_eq!(listing["data"]["totalFiles"], 0);

    let (status, body) = h.delete("/api/security/files/file_nonexistent123").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn upload_rejects_disallowed_extension() {
    let h = Harness::start().await;
    let (status, body) = h.upload("payload.exe", "MZ").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn redteam_audit_returns_structured_findings() {
    let h = Harness::start().await;
    let (status, body) = h
        .post(
            "/api/redteam/audit",
            json!({
                "code": "const q = \"SELECT * FROM users WHERE id = \" + req.params.id;",
                "language": "javascript",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "red_team_analysis_complete");
    assert!(!body["custom_findings"].as_array().unwrap().is_empty());
    assert_eq!(body["severity"], "critical");
    assert!(body["audit_report"]
        .as_str()
        .unwrap()
        .contains("## Custom Exploit Findings"));

    let (status, _) = h.post("/api/redteam/audit", json!({ "language": "js" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, multi) = h
        .post(
            "/api/redteam/audit-multiple",
            json!({ "files": { "app.js": "eval(req.body.code)", "README.md": "# hi" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(multi["success"], true);
    assert_eq!(multi["summary"]["totalFiles"], 1);
}

#[tokio::test]
async fn unknown_scan_status_is_not_found() {
    let h = Harness::start().await;
    let (status, body) = h.get("/api/security/scan/missing/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn batch_audit_applies_severity_threshold() {
    let h = Harness::start().await;
    let files = json!({
        "app.js": "eval(req.body.code)",
        "render.js": "el.innerHTML = req.query.name;",
    });

    let (status, all) = h
        .post("/api/redteam/batch-audit", json!({ "project_files": files.clone() }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all["batch_audit"], true);
    assert_eq!(all["threshold_applied"], "low");
    assert_eq!(all["passed"], false);

    let (status, strict) = h
        .post(
            "/api/redteam/batch-audit",
            json!({ "project_files": files, "options": { "severity_threshold": "critical" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(strict["threshold_applied"], "critical");
    assert_eq!(strict["summary"], all["summary"]);
    for report in strict["results"].as_object().unwrap().values() {
        for finding in report["customFindings"].as_array().unwrap() {
            assert_eq!(finding["severity"], "critical");
        }
    }

    let (status, clean) = h
        .post(
            "/api/redteam/batch-audit",
            json!({ "project_files": { "ok.js": "const sum = (a, b) => a + b;" } }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(clean["passed"], true);

    let (status, _) = h
        .post("/api/redteam/batch-audit", json!({ "options": {} }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h
        .post(
            "/api/redteam/batch-audit",
            json!({ "project_files": {}, "options": { "severity_threshold": "urgent" } }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
