use mmlmcp::world_server::{start_world_server, WorldServerHandle};
use mmlmcp::world_storage::WorldStorage;
use serde_json::{json, Value};
use std::path::PathBuf;
use tempfile::TempDir;

const PROJECT: &str = "local-project";
const WS_URL: &str = "ws://localhost:8001/ws/local-project/obj-1";

async fn start(temp: &TempDir, game_dir: PathBuf) -> WorldServerHandle {
    let storage = WorldStorage::open(temp.path().join("worlds")).await.unwrap();
    start_world_server(storage, 0, PROJECT, game_dir).await.unwrap()
}

fn collection(server: &WorldServerHandle) -> String {
    format!("{}/v1/worlds/{}/web-world-instances", server.url(), PROJECT)
}

fn world_body(name: &str, url: &str) -> Value {
    json!({
        "name": name,
        "description": "obj-1",
        "mmlDocumentsConfiguration": {
            "mmlDocuments": {"obj-1": {"url": url}}
        }
    })
}

async fn create_world(server: &WorldServerHandle, http: &reqwest::Client, name: &str) -> Value {
    let response = http
        .post(format!("{}/", collection(server)))
        .json(&world_body(name, WS_URL))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    response.json().await.unwrap()
}

// ===== CRUD =====

#[tokio::test]
async fn test_websocket_url_lookup_returns_document_url() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::new();

    let world = create_world(&server, &http, "Plaza").await;
    let id = world["id"].as_str().unwrap();

    let response = http
        .get(format!("{}/mml-websocket-url?id={}", server.url(), id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));
    assert_eq!(response.text().await.unwrap(), WS_URL);

    server.stop().await;
}

#[tokio::test]
async fn test_websocket_url_lookup_failures() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("{}/mml-websocket-url", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    assert_eq!(response.text().await.unwrap(), "World ID is required");

    let response = http
        .get(format!("{}/mml-websocket-url?id=unknown", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "World not found");

    server.stop().await;
}

#[tokio::test]
async fn test_create_validation_messages() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::new();

    let response = http
        .post(format!("{}/", collection(&server)))
        .json(&json!({"name": "No documents"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Name and MML Documents are required");

    let response = http
        .post(format!("{}/", collection(&server)))
        .json(&world_body("Plain http", "http://example.com/doc.html"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(body["error"]["message"], "MML document URL is not a WebSocket URL");

    server.stop().await;
}

#[tokio::test]
async fn test_get_carries_tier_and_defaults() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::new();

    let world = create_world(&server, &http, "Plaza").await;
    assert_eq!(world["chatConfiguration"]["enabled"], true);
    assert_eq!(world["authConfiguration"]["allowAnonymous"], true);
    assert_eq!(world["createdBy"], json!({}));

    let fetched: Value = http
        .get(format!("{}/{}", collection(&server), world["id"].as_str().unwrap()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["canWrite"], true);
    assert_eq!(fetched["tier"]["name"], "web-worlds-free-tier");
    assert_eq!(fetched["tier"]["maxWorlds"], 100);
    assert_eq!(fetched["name"], "Plaza");

    let response = http
        .get(format!("{}/missing", collection(&server)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["message"], "Web World Instance not found");

    server.stop().await;
}

#[tokio::test]
async fn test_update_delete_and_list() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::new();

    let plaza = create_world(&server, &http, "Plaza").await;
    create_world(&server, &http, "Harbour").await;
    let plaza_id = plaza["id"].as_str().unwrap();

    let updated: Value = http
        .post(format!("{}/{}", collection(&server), plaza_id))
        .json(&json!({"name": "Grand Plaza", "enableTweakPane": true}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(updated["name"], "Grand Plaza");
    assert_eq!(updated["enableTweakPane"], true);
    assert_eq!(
        updated["mmlDocumentsConfiguration"],
        plaza["mmlDocumentsConfiguration"]
    );

    let list: Value = http
        .get(format!("{}/?search=grand", collection(&server)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["totalResults"], 1);
    assert_eq!(list["worlds"][0]["id"], plaza["id"]);
    assert_eq!(list["tier"]["name"], "web-worlds-free-tier");

    let response = http
        .delete(format!("{}/{}", collection(&server), plaza_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    let response = http
        .delete(format!("{}/{}", collection(&server), plaza_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.stop().await;
}

// ===== Health, redirect and game bundle =====

#[tokio::test]
async fn test_health_reports_service() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;

    let health: Value = reqwest::get(format!("{}/health", server.url()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["service"], "Local Web World Server");
    assert!(health["timestamp"].is_string());
    assert_eq!(health["tempDir"], server.temp_dir().display().to_string());

    server.stop().await;
}

#[tokio::test]
async fn test_root_redirects_to_game() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap();

    let response = http.get(format!("{}/", server.url())).send().await.unwrap();
    assert_eq!(response.status(), 307);
    assert_eq!(response.headers()["location"], "/game");

    server.stop().await;
}

#[tokio::test]
async fn test_game_bundle_missing() {
    let temp = TempDir::new().unwrap();
    let server = start(&temp, temp.path().join("no-game")).await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("{}/game/some/route", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Game not found");

    let response = http
        .get(format!("{}/game/apps/game-client/assets/logo.png", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Asset not found");

    server.stop().await;
}

#[tokio::test]
async fn test_game_bundle_served_with_spa_fallback() {
    let temp = TempDir::new().unwrap();
    let game_dir = temp.path().join("game");
    std::fs::create_dir_all(game_dir.join("apps/game-client/assets")).unwrap();
    std::fs::write(game_dir.join("index.html"), "<html>game</html>").unwrap();
    std::fs::write(game_dir.join("apps/game-client/assets/app.js"), "console.log(1)").unwrap();
    let server = start(&temp, game_dir).await;
    let http = reqwest::Client::new();

    let response = http
        .get(format!("{}/game/world/123", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "<html>game</html>");

    let response = http
        .get(format!("{}/game/apps/game-client/assets/app.js", server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "console.log(1)");

    server.stop().await;
}
