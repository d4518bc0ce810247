#![allow(clippy::unwrap_used, clippy::expect_used)]

use maestro_agent::{LlmClient, LlmProvider, ModelConfig};
use maestro_gateway::{AuthConfig, GatewayServer};
use maestro_orchestrator::{RunnerConfig, WorkflowCatalog, WorkflowRunner};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Helper: serve the gateway with the offline echo provider on a random port.
async fn start_test_server(auth: AuthConfig) -> String {
    let runner = Arc::new(WorkflowRunner::new(
        Arc::new(WorkflowCatalog::builtin().unwrap()),
        Arc::new(LlmClient::new(ModelConfig::new(LlmProvider::Echo))),
        RunnerConfig::default(),
    ));
    let app = GatewayServer::build_with_auth(runner, auth);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// Parse every `data:` line of an SSE body as JSON.
fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health_endpoint() {
    let addr = start_test_server(AuthConfig::default()).await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "maestro");
    assert_eq!(body["workflows"], 7);
}

#[tokio::test]
async fn test_list_workflows_and_agents() {
    let addr = start_test_server(AuthConfig::default()).await;

    let workflows: Value = reqwest::get(format!("http://{addr}/api/workflows"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(workflows["totalCount"], 7);
    let first = &workflows["workflows"][0];
    assert_eq!(first["type"], "PATTERN_DEVELOPMENT");
    assert_eq!(first["taskCount"], 6);
    assert!(first["requiredVariables"].is_array());

    let agents: Value = reqwest::get(format!("http://{addr}/api/agents"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents["totalCount"], 12);
    assert!(agents["agents"]
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["name"] == "safety-auditor"));
}

#[tokio::test]
async fn test_run_streams_events_and_updates_metrics() {
    let addr = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("http://{addr}/api/workflows/run"))
        .json(&json!({
            "workflowType": "OSS_CONTRIBUTION",
            "variables": { "pattern_code": "fn retrieve() {}" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let events = sse_events(&resp.text().await.unwrap());
    assert_eq!(events.first().unwrap()["type"], "start");
    assert_eq!(
        events.iter().filter(|e| e["type"] == "task").count(),
        3
    );
    let complete = events.last().unwrap();
    assert_eq!(complete["type"], "complete");
    assert_eq!(complete["success"], true);
    assert_eq!(complete["state"], "succeeded");
    assert_eq!(complete["results"].as_array().unwrap().len(), 3);

    let metrics: Value = reqwest::get(format!("http://{addr}/api/metrics"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["metrics"]["totalWorkflows"], 1);
    assert_eq!(metrics["metrics"]["successRatePercentage"], "100.00%");
    assert_eq!(metrics["metrics"]["totalTasks"], 3);
    assert!(metrics["timestamp"].is_string());
}

#[tokio::test]
async fn test_run_rejections() {
    let addr = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/workflows/run");

    let missing_type = client
        .post(&url)
        .json(&json!({ "variables": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_type.status(), 400);
    let body: Value = missing_type.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("workflowType"));

    let unknown = client
        .post(&url)
        .json(&json!({ "workflowType": "NOPE" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), 404);
    let body: Value = unknown.json().await.unwrap();
    assert_eq!(body["availableWorkflows"].as_array().unwrap().len(), 7);

    let missing_var = client
        .post(&url)
        .json(&json!({ "workflowType": "OSS_CONTRIBUTION", "variables": {} }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_var.status(), 400);
    let body: Value = missing_var.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("pattern_code"));

    let malformed = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), 400);

    // Rejected requests never count as runs.
    let metrics: Value = reqwest::get(format!("http://{addr}/api/metrics"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["metrics"]["totalWorkflows"], 0);
}

#[tokio::test]
async fn test_execute_single_agent() {
    let addr = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/api/agents/execute");

    let resp = client
        .post(&url)
        .json(&json!({
            "agentName": "qa-agent",
            "prompt": "Review the retriever",
            "context": { "framework": "axum" }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert!(body["timestamp"].is_string());
    let result = &body["result"];
    assert_eq!(result["agentName"], "qa-agent");
    assert_eq!(result["model"], "echo");
    let output = result["output"].as_str().unwrap();
    assert!(output.starts_with("[qa-agent] Context: {"));
    assert!(output.ends_with("Task: Review the retriever"));

    // Direct calls are not workflow runs.
    let metrics: Value = reqwest::get(format!("http://{addr}/api/metrics"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["metrics"]["totalWorkflows"], 0);
}

#[tokio::test]
async fn test_agent_rejections() {
    let addr = start_test_server(AuthConfig::default()).await;
    let client = reqwest::Client::new();

    for route in ["execute", "stream"] {
        let url = format!("http://{addr}/api/agents/{route}");

        let missing_prompt = client
            .post(&url)
            .json(&json!({ "agentName": "qa-agent" }))
            .send()
            .await
            .unwrap();
        assert_eq!(missing_prompt.status(), 400, "{route}");
        let body: Value = missing_prompt.json().await.unwrap();
        assert_eq!(body["error"], "agentName and prompt are required");

        let unknown = client
            .post(&url)
            .json(&json!({ "agentName": "ghost", "prompt": "boo" }))
            .send()
            .await
            .unwrap();
        assert_eq!(unknown.status(), 404, "{route}");
        let body: Value = unknown.json().await.unwrap();
        assert_eq!(body["availableAgents"].as_array().unwrap().len(), 12);
    }
}

#[tokio::test]
async fn test_stream_single_agent() {
    let addr = start_test_server(AuthConfig::default()).await;
    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/api/agents/stream"))
        .json(&json!({ "agentName": "documentation-agent", "prompt": "Document the API" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let events = sse_events(&resp.text().await.unwrap());
    assert_eq!(events.first().unwrap()["type"], "start");
    assert_eq!(events[0]["agentName"], "documentation-agent");
    let text: String = events
        .iter()
        .filter(|e| e["type"] == "content")
        .map(|e| e["text"].as_str().unwrap())
        .collect();
    assert_eq!(text, "[documentation-agent] Document the API");

    let end = events.last().unwrap();
    assert_eq!(end["type"], "end");
    assert_eq!(end["outcome"]["success"], true);
    assert_eq!(end["outcome"]["output"], text.as_str());
}

#[tokio::test]
async fn test_api_key_auth() {
    let addr = start_test_server(AuthConfig::new(vec!["secret".into()])).await;
    let client = reqwest::Client::new();

    let denied = client
        .get(format!("http://{addr}/api/agents"))
        .send()
        .await
        .unwrap();
    assert_eq!(denied.status(), 401);

    let wrong = client
        .get(format!("http://{addr}/api/agents"))
        .bearer_auth("nope")
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 401);

    let by_header = client
        .get(format!("http://{addr}/api/agents"))
        .bearer_auth("secret")
        .send()
        .await
        .unwrap();
    assert_eq!(by_header.status(), 200);

    let by_query = client
        .get(format!("http://{addr}/api/agents?api_key=secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(by_query.status(), 200);

    let health = client
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status(), 200);
}
