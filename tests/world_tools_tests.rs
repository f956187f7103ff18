use async_trait::async_trait;
use base64::Engine;
use mmlmcp::clients::{LocalMmlObjectClient, LocalWebWorldClient, MmlObjectApi, WebWorldApi};
use mmlmcp::object_server::ObjectService;
use mmlmcp::object_storage::ObjectStorage;
use mmlmcp::screenshot::{ScreenshotBackend, ScreenshotError, ScreenshotResult, ScreenshotService};
use mmlmcp::tool_protocol::{ToolContent, ToolProtocol, ToolResult};
use mmlmcp::world_server::WorldService;
use mmlmcp::world_storage::{MmlDocumentRef, WebWorldInstance, WorldRequest, WorldStorage};
use mmlmcp::world_tools::{
    WorldToolProtocol, CREATE_WORLD, FETCH_MML_INFO, SCREENSHOT_WORLD, UPDATE_ELEMENTS,
    UPDATE_SCRIPT,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const PROJECT: &str = "local-project";
const PNG: &[u8] = &[0x89, b'P', b'N', b'G'];

struct Fixture {
    _temp: TempDir,
    objects: Arc<dyn MmlObjectApi>,
    worlds: Arc<dyn WebWorldApi>,
}

impl Fixture {
    async fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let object_storage = ObjectStorage::open(temp.path().join("objects")).await.unwrap();
        let world_storage = WorldStorage::open(temp.path().join("worlds")).await.unwrap();
        let object_service = Arc::new(ObjectService::new(object_storage, "ws://localhost:8001"));
        let world_service = Arc::new(WorldService::new(
            world_storage,
            PROJECT,
            "http://localhost:8002",
        ));
        Self {
            _temp: temp,
            objects: Arc::new(LocalMmlObjectClient::new(object_service, PROJECT)),
            worlds: Arc::new(LocalWebWorldClient::new(world_service, PROJECT)),
        }
    }

    fn tools(&self) -> WorldToolProtocol {
        WorldToolProtocol::new(self.objects.clone(), self.worlds.clone())
    }

    async fn world(&self, id: &str) -> WebWorldInstance {
        self.worlds.get_world(id).await.unwrap().unwrap()
    }

    async fn source(&self, object_id: &str) -> String {
        self.objects
            .get_object(object_id)
            .await
            .unwrap()
            .unwrap()
            .source
            .text()
            .to_string()
    }

    /// Runs create-world for a one-cube scene; returns `(world id, object id, result)`.
    async fn create_plaza(&self, tools: &WorldToolProtocol) -> (String, String, ToolResult) {
        let result = tools
            .execute(
                CREATE_WORLD,
                json!({
                    "title": "Plaza",
                    "elements": [
                        {"tag": "m-cube", "attributes": {"id": "crate", "color": "red", "y": 1}}
                    ]
                }),
            )
            .await
            .unwrap();
        assert!(!result.is_error, "{}", result.text_output());
        let world_id = result
            .text_output()
            .lines()
            .find_map(|l| l.strip_prefix("Web world ID is: "))
            .unwrap()
            .to_string();
        let object_id = self.world(&world_id).await.description.unwrap();
        (world_id, object_id, result)
    }
}

#[derive(Default)]
struct RecordingBackend {
    captured: Arc<Mutex<Vec<String>>>,
    resets: Arc<Mutex<usize>>,
    fail: bool,
}

#[async_trait]
impl ScreenshotBackend for RecordingBackend {
    async fn launch(&mut self) -> ScreenshotResult<()> {
        Ok(())
    }

    async fn capture(&mut self, url: &str) -> ScreenshotResult<Vec<u8>> {
        self.captured.lock().unwrap().push(url.to_string());
        if self.fail {
            return Err(ScreenshotError::Backend("page crashed".to_string()));
        }
        Ok(PNG.to_vec())
    }

    async fn reset(&mut self) -> ScreenshotResult<()> {
        *self.resets.lock().unwrap() += 1;
        Ok(())
    }

    async fn close(&mut self) -> ScreenshotResult<()> {
        Ok(())
    }
}

// ===== create-world =====

#[tokio::test]
async fn test_create_world_links_world_and_object() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools();
    let (world_id, object_id, result) = fixture.create_plaza(&tools).await;

    let texts: Vec<String> = result
        .content
        .iter()
        .map(|c| match c {
            ToolContent::Text { text } => text.clone(),
            ToolContent::Image { .. } => panic!("unexpected image"),
        })
        .collect();
    assert_eq!(texts.len(), 3);
    assert_eq!(texts[0], format!("Web world ID is: {}", world_id));
    assert_eq!(
        texts[1],
        format!("Web world URL is: http://localhost:8002/game?id={}", world_id)
    );
    assert!(texts[2].starts_with("MML document content: <!-- Plaza -->"));

    let world = fixture.world(&world_id).await;
    assert_eq!(world.name, "Plaza");
    let (key, document) = world.mml_documents_configuration.primary().unwrap();
    assert_eq!(key, &object_id);
    assert_eq!(
        document.url.as_deref(),
        Some(format!("ws://localhost:8001/ws/{}/{}", PROJECT, object_id).as_str())
    );

    let source = fixture.source(&object_id).await;
    assert!(source.contains("<m-group id=\"scene\">"));
    assert!(source.contains("<m-cube id=\"crate\" color=\"red\" y=\"1\"></m-cube>"));
    assert!(source.contains("<m-light type=\"directional\""));
    assert!(!source.contains("<script>"));
}

#[tokio::test]
async fn test_create_world_with_script_and_own_light() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools();
    let result = tools
        .execute(
            CREATE_WORLD,
            json!({
                "title": "Night",
                "elements": [
                    {"tag": "m-light", "attributes": {"id": "moon", "type": "point"}}
                ],
                "script": "console.log('hi');"
            }),
        )
        .await
        .unwrap();
    let content = result.text_output();
    assert_eq!(content.matches("<m-light").count(), 1);
    assert!(content.contains("<script>\nconsole.log('hi');\n</script>"));
}

#[tokio::test]
async fn test_create_world_rejects_invalid_children() {
    let fixture = Fixture::new().await;
    let result = fixture
        .tools()
        .execute(
            CREATE_WORLD,
            json!({
                "title": "Bad",
                "elements": [
                    {"tag": "m-cube", "children": [{"tag": "m-sphere"}]}
                ]
            }),
        )
        .await
        .unwrap();
    assert!(result.is_error);
    assert!(result
        .text_output()
        .starts_with("Error creating MML document: m-cube does not support children"));

    let listed = fixture.objects.list_objects(&Default::default()).await.unwrap();
    assert_eq!(listed.total_results, 0);
}

#[tokio::test]
async fn test_unknown_tag_is_invalid_parameters() {
    let fixture = Fixture::new().await;
    let err = fixture
        .tools()
        .execute(
            CREATE_WORLD,
            json!({"title": "Bad", "elements": [{"tag": "m-teapot"}]}),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Invalid parameters:"));
}

// ===== update-elements =====

#[tokio::test]
async fn test_update_elements_add_update_delete() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools();
    let (world_id, object_id, _) = fixture.create_plaza(&tools).await;

    let added = tools
        .execute(
            UPDATE_ELEMENTS,
            json!({
                "worldId": world_id,
                "operation": {"action": "add", "element": {"tag": "m-sphere", "attributes": {"color": "green"}}}
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        added.text_output(),
        "Element operation completed successfully. Added element with ID: sphere-1"
    );
    assert!(fixture
        .source(&object_id)
        .await
        .contains("<m-sphere color=\"green\" id=\"sphere-1\"></m-sphere>"));

    let updated = tools
        .execute(
            UPDATE_ELEMENTS,
            json!({
                "worldId": world_id,
                "operation": {
                    "action": "update",
                    "elementId": "crate",
                    "element": {"tag": "m-cube", "attributes": {"color": "blue"}}
                }
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        updated.text_output(),
        "Element operation completed successfully. Updated element with ID: crate"
    );
    let source = fixture.source(&object_id).await;
    assert!(source.contains("color=\"blue\""));
    assert!(!source.contains("color=\"red\""));

    let deleted = tools
        .execute(
            UPDATE_ELEMENTS,
            json!({"worldId": world_id, "operation": {"action": "delete", "elementId": "crate"}}),
        )
        .await
        .unwrap();
    assert_eq!(
        deleted.text_output(),
        "Element operation completed successfully. Deleted element with ID: crate"
    );
    assert!(!fixture.source(&object_id).await.contains("id=\"crate\""));
}

#[tokio::test]
async fn test_duplicate_add_leaves_document_untouched() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools();
    let (world_id, object_id, _) = fixture.create_plaza(&tools).await;
    let before = fixture.source(&object_id).await;

    let result = tools
        .execute(
            UPDATE_ELEMENTS,
            json!({
                "worldId": world_id,
                "operation": {"action": "add", "element": {"tag": "m-cube", "attributes": {"id": "crate"}}}
            }),
        )
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(
        result.text_output(),
        "Error updating world: Element with ID 'crate' already exists"
    );
    assert_eq!(fixture.source(&object_id).await, before);
}

#[tokio::test]
async fn test_update_elements_lookup_failures() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools();

    let result = tools
        .execute(
            UPDATE_ELEMENTS,
            json!({"worldId": "nope", "operation": {"action": "delete", "elementId": "x"}}),
        )
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(
        result.text_output(),
        "Error updating world: Can't find web world with ID nope"
    );

    // A world whose document points at an object that no longer exists.
    let created = fixture
        .worlds
        .create_world(&WorldRequest::with_document(
            "Orphan",
            "gone",
            MmlDocumentRef::from_url("ws://localhost:8001/ws/local-project/gone"),
        ))
        .await
        .unwrap();
    let result = tools
        .execute(
            UPDATE_SCRIPT,
            json!({"worldId": created.world.id, "script": "x();"}),
        )
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(
        result.text_output(),
        "Error updating world: Can't retrieve current MML content"
    );
}

// ===== update-script =====

#[tokio::test]
async fn test_update_script_replace_and_remove() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools();
    let (world_id, object_id, _) = fixture.create_plaza(&tools).await;

    let result = tools
        .execute(UPDATE_SCRIPT, json!({"worldId": world_id, "script": "foo();"}))
        .await
        .unwrap();
    assert_eq!(result.text_output(), "Updated script successfully.");
    let source = fixture.source(&object_id).await;
    assert_eq!(source.matches("<script>").count(), 1);
    assert!(source.contains("<script>\nfoo();\n</script>"));

    let result = tools
        .execute(UPDATE_SCRIPT, json!({"worldId": world_id, "script": "bar();"}))
        .await
        .unwrap();
    assert_eq!(result.text_output(), "Updated script successfully.");
    let source = fixture.source(&object_id).await;
    assert_eq!(source.matches("<script>").count(), 1);
    assert!(!source.contains("foo();"));

    let result = tools
        .execute(UPDATE_SCRIPT, json!({"worldId": world_id}))
        .await
        .unwrap();
    assert_eq!(result.text_output(), "Removed script successfully.");
    assert!(!fixture.source(&object_id).await.contains("<script>"));
}

#[tokio::test]
async fn test_concurrent_edits_are_not_lost() {
    let fixture = Fixture::new().await;
    let tools = Arc::new(fixture.tools());
    let (world_id, object_id, _) = fixture.create_plaza(&tools).await;

    let mut tasks = Vec::new();
    for n in 0..5 {
        let tools = tools.clone();
        let world_id = world_id.clone();
        tasks.push(tokio::spawn(async move {
            tools
                .execute(
                    UPDATE_ELEMENTS,
                    json!({
                        "worldId": world_id,
                        "operation": {"action": "add", "element": {"tag": "m-cube", "attributes": {"id": format!("c{}", n)}}}
                    }),
                )
                .await
                .unwrap()
        }));
    }
    for task in tasks {
        assert!(!task.await.unwrap().is_error);
    }

    let source = fixture.source(&object_id).await;
    for n in 0..5 {
        assert!(source.contains(&format!("id=\"c{}\"", n)));
    }
}

// ===== screenshot-world =====

#[tokio::test]
async fn test_screenshot_world_returns_png_block() {
    let fixture = Fixture::new().await;
    let backend = RecordingBackend::default();
    let captured = backend.captured.clone();
    let resets = backend.resets.clone();
    let screenshots = Arc::new(ScreenshotService::new(
        fixture.objects.clone(),
        Box::new(backend),
        0,
        std::env::temp_dir(),
    ));
    let tools = fixture.tools().with_screenshots(screenshots.clone());
    let (world_id, object_id, _) = fixture.create_plaza(&tools).await;

    // Not initialized up front; the tool starts the service itself.
    let result = tools
        .execute(SCREENSHOT_WORLD, json!({"worldId": world_id}))
        .await
        .unwrap();
    assert!(!result.is_error);
    assert_eq!(result.content[0], ToolContent::text("Screenshot captured successfully!"));
    assert_eq!(
        result.content[1],
        ToolContent::png(base64::engine::general_purpose::STANDARD.encode(PNG))
    );

    let urls = captured.lock().unwrap().clone();
    assert_eq!(urls.len(), 1);
    assert!(urls[0].ends_with(&format!("/screenshot/{}", object_id)));
    assert_eq!(*resets.lock().unwrap(), 1);

    screenshots.cleanup().await;
}

#[tokio::test]
async fn test_screenshot_failure_is_reported() {
    let fixture = Fixture::new().await;
    let backend = RecordingBackend {
        fail: true,
        ..Default::default()
    };
    let resets = backend.resets.clone();
    let screenshots = Arc::new(ScreenshotService::new(
        fixture.objects.clone(),
        Box::new(backend),
        0,
        std::env::temp_dir(),
    ));
    let tools = fixture.tools().with_screenshots(screenshots.clone());
    let (world_id, _, _) = fixture.create_plaza(&tools).await;

    let result = tools
        .execute(SCREENSHOT_WORLD, json!({"worldId": world_id}))
        .await
        .unwrap();
    assert!(result.is_error);
    assert_eq!(
        result.text_output(),
        "Error capturing screenshot: Browser error: page crashed"
    );
    assert_eq!(*resets.lock().unwrap(), 1);

    let missing = tools
        .execute(SCREENSHOT_WORLD, json!({"worldId": "nope"}))
        .await
        .unwrap();
    assert!(missing.is_error);

    screenshots.cleanup().await;
}

// ===== fetch-mml-info and dispatch =====

#[tokio::test]
async fn test_fetch_mml_info_lists_every_element() {
    let fixture = Fixture::new().await;
    let result = fixture
        .tools()
        .execute(FETCH_MML_INFO, json!({}))
        .await
        .unwrap();
    let text = result.text_output();
    for tag in ["m-cube", "m-sphere", "m-group", "m-light", "m-character", "m-label"] {
        assert!(text.contains(&format!("## {}", tag)), "missing {}", tag);
    }
}

#[tokio::test]
async fn test_unknown_tool_is_an_error() {
    let fixture = Fixture::new().await;
    let err = fixture
        .tools()
        .execute("teleport", json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Unknown tool: teleport");
}

#[tokio::test]
async fn test_tool_listing_schemas() {
    let fixture = Fixture::new().await;
    let tools = fixture.tools().list_tools().await.unwrap();
    assert_eq!(tools.len(), 5);

    let update = tools.iter().find(|t| t.name == UPDATE_ELEMENTS).unwrap();
    let schema = update.input_schema();
    assert_eq!(schema["required"], json!(["worldId", "operation"]));
    assert_eq!(
        schema["properties"]["operation"]["properties"]["action"]["enum"],
        json!(["add", "update", "delete"])
    );
}
