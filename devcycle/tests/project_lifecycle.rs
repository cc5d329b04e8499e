mod common;

use common::{attr, capabilities, key_fixture, ACCESS_TOKEN};
use mockito::{Matcher, Server};
use serde_json::json;
use tfplug::context::Context;
use tfplug::grpc::plan_change;
use tfplug::resource::{
    CreateResourceRequest, DeleteResourceRequest, ImportResourceStateRequest, ReadResourceRequest,
    ResourceSchemaRequest, UpdateResourceRequest,
};
use tfplug::types::{Dynamic, DynamicValue};

fn project_body(key: &str, name: &str) -> String {
    json!({
        "_id": "61450f3daec96f5cf4a49946",
        "key": key,
        "name": name,
        "description": "",
        "_organization": "org_123",
        "_createdBy": "auth0|abc",
        "createdAt": "2024-05-01T10:00:00.000Z",
        "updatedAt": "2024-05-01T10:00:00.000Z"
    })
    .to_string()
}

fn planned_project(key: &str, name: &str) -> DynamicValue {
    let mut planned = DynamicValue::object();
    planned.mark_unknown(&attr("id")).unwrap();
    planned.set_string(&attr("key"), key).unwrap();
    planned.set_string(&attr("name"), name).unwrap();
    planned.set_null(&attr("description")).unwrap();
    planned.mark_unknown(&attr("organization")).unwrap();
    planned
}

fn project_state(key: &str, name: &str) -> DynamicValue {
    let mut state = DynamicValue::object();
    state
        .set_string(&attr("id"), "61450f3daec96f5cf4a49946")
        .unwrap();
    state.set_string(&attr("key"), key).unwrap();
    state.set_string(&attr("name"), name).unwrap();
    state.set_null(&attr("description")).unwrap();
    state.set_string(&attr("organization"), "org_123").unwrap();
    state
}

#[tokio::test(flavor = "multi_thread")]
async fn create_populates_id_and_organization() {
    let mut server = Server::new_async().await;
    let key = key_fixture(1);

    let create = server
        .mock("POST", "/v1/projects")
        .match_header("authorization", format!("Bearer {}", ACCESS_TOKEN).as_str())
        .match_body(Matcher::Json(json!({"name": "Checkout", "key": key})))
        .with_status(201)
        .with_body(project_body(&key, "Checkout"))
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let planned = planned_project(&key, "Checkout");
    let response = resource
        .create(
            Context::new(),
            CreateResourceRequest {
                type_name: "devcycle_project".to_string(),
                planned_state: planned.clone(),
                config: planned,
                planned_private: vec![],
            },
        )
        .await;

    create.assert_async().await;
    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    let state = response.new_state;
    assert_eq!(
        state.get_string(&attr("id")).unwrap(),
        "61450f3daec96f5cf4a49946"
    );
    assert_eq!(state.get_string(&attr("organization")).unwrap(), "org_123");
    assert_eq!(state.get_string(&attr("key")).unwrap(), key);
    // An empty remote description stays null when none was configured
    assert!(state.get(&attr("description")).unwrap().is_null());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_create_writes_no_state() {
    let mut server = Server::new_async().await;
    let key = key_fixture(2);

    let _create = server
        .mock("POST", "/v1/projects")
        .with_status(409)
        .with_body(r#"{"statusCode":409,"message":"Duplicate key","error":"Conflict"}"#)
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let planned = planned_project(&key, "Checkout");
    let response = resource
        .create(
            Context::new(),
            CreateResourceRequest {
                type_name: "devcycle_project".to_string(),
                planned_state: planned.clone(),
                config: planned,
                planned_private: vec![],
            },
        )
        .await;

    assert!(response.new_state.is_null());
    assert_eq!(response.diagnostics.len(), 1);
    assert!(response.diagnostics[0].detail.contains("Duplicate key"));
}

#[tokio::test(flavor = "multi_thread")]
async fn read_of_missing_project_drops_it_from_state() {
    let mut server = Server::new_async().await;
    let key = key_fixture(3);

    let _get = server
        .mock("GET", format!("/v1/projects/{}", key).as_str())
        .with_status(404)
        .with_body(r#"{"statusCode":404,"message":"Project not found"}"#)
        .expect(1)
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let response = resource
        .read(
            Context::new(),
            ReadResourceRequest {
                type_name: "devcycle_project".to_string(),
                current_state: project_state(&key, "Checkout"),
                private: vec![],
                client_capabilities: capabilities(),
            },
        )
        .await;

    assert!(response.diagnostics.is_empty());
    assert!(response.new_state.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn update_patches_by_prior_key() {
    let mut server = Server::new_async().await;
    let key = key_fixture(4);

    let patch = server
        .mock("PATCH", format!("/v1/projects/{}", key).as_str())
        .match_body(Matcher::Json(
            json!({"name": "Checkout v2", "key": key, "description": "new flow"}),
        ))
        .with_status(200)
        .with_body(
            json!({
                "_id": "61450f3daec96f5cf4a49946",
                "key": key,
                "name": "Checkout v2",
                "description": "new flow",
                "_organization": "org_123"
            })
            .to_string(),
        )
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let mut planned = project_state(&key, "Checkout v2");
    planned
        .set_string(&attr("description"), "new flow")
        .unwrap();
    let response = resource
        .update(
            Context::new(),
            UpdateResourceRequest {
                type_name: "devcycle_project".to_string(),
                prior_state: project_state(&key, "Checkout"),
                planned_state: planned.clone(),
                config: planned,
                planned_private: vec![],
            },
        )
        .await;

    patch.assert_async().await;
    assert!(response.diagnostics.is_empty());
    assert_eq!(
        response.new_state.get_string(&attr("description")).unwrap(),
        "new flow"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn delete_tolerates_missing_project() {
    let mut server = Server::new_async().await;
    let key = key_fixture(5);

    let delete = server
        .mock("DELETE", format!("/v1/projects/{}", key).as_str())
        .with_status(404)
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let response = resource
        .delete(
            Context::new(),
            DeleteResourceRequest {
                type_name: "devcycle_project".to_string(),
                prior_state: project_state(&key, "Checkout"),
                planned_private: vec![],
            },
        )
        .await;

    delete.assert_async().await;
    assert!(response.diagnostics.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn import_reads_project_by_key() {
    let mut server = Server::new_async().await;
    let key = key_fixture(6);

    let _get = server
        .mock("GET", format!("/v1/projects/{}", key).as_str())
        .with_body(project_body(&key, "Imported"))
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let response = resource
        .import_state(
            Context::new(),
            ImportResourceStateRequest {
                type_name: "devcycle_project".to_string(),
                id: key.clone(),
                client_capabilities: capabilities(),
            },
        )
        .await;

    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    assert_eq!(response.imported_resources.len(), 1);
    let state = &response.imported_resources[0].state;
    assert_eq!(state.get_string(&attr("name")).unwrap(), "Imported");
    assert_eq!(state.get_string(&attr("organization")).unwrap(), "org_123");
}

#[tokio::test(flavor = "multi_thread")]
async fn import_of_missing_project_fails() {
    let mut server = Server::new_async().await;

    let _get = server
        .mock("GET", "/v1/projects/gone")
        .with_status(404)
        .create_async()
        .await;

    let resource = common::resource(&server.url(), "devcycle_project").await;
    let response = resource
        .import_state(
            Context::new(),
            ImportResourceStateRequest {
                type_name: "devcycle_project".to_string(),
                id: "gone".to_string(),
                client_capabilities: capabilities(),
            },
        )
        .await;

    assert!(response.imported_resources.is_empty());
    assert_eq!(
        response.diagnostics[0].summary,
        "Cannot import non-existent remote object"
    );
}

#[tokio::test]
async fn changing_key_requires_replacement() {
    let server = Server::new_async().await;
    let resource = common::resource(&server.url(), "devcycle_project").await;
    let schema = resource
        .schema(Context::new(), ResourceSchemaRequest)
        .await
        .schema;

    let prior = project_state("checkout", "Checkout");
    let mut config = prior.clone();
    config.set_null(&attr("id")).unwrap();
    config.set_null(&attr("organization")).unwrap();
    config.set_string(&attr("key"), "checkout-v2").unwrap();
    let mut proposed = prior.clone();
    proposed.set_string(&attr("key"), "checkout-v2").unwrap();

    let plan = plan_change(&schema, &prior, proposed, &config);

    assert_eq!(plan.requires_replace, vec![attr("key")]);
    // The ID survives the plan rather than going unknown
    assert_eq!(
        plan.planned_state.get(&attr("id")),
        Some(&Dynamic::String("61450f3daec96f5cf4a49946".to_string()))
    );
}

#[tokio::test]
async fn renaming_is_an_in_place_update() {
    let server = Server::new_async().await;
    let resource = common::resource(&server.url(), "devcycle_project").await;
    let schema = resource
        .schema(Context::new(), ResourceSchemaRequest)
        .await
        .schema;

    let prior = project_state("checkout", "Checkout");
    let mut config = prior.clone();
    config.set_null(&attr("id")).unwrap();
    config.set_null(&attr("organization")).unwrap();
    config.set_string(&attr("name"), "Checkout v2").unwrap();
    let mut proposed = prior.clone();
    proposed.set_string(&attr("name"), "Checkout v2").unwrap();

    let plan = plan_change(&schema, &prior, proposed, &config);

    assert!(plan.requires_replace.is_empty());
}
