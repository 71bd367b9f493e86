//! HTTP behavior of the knowledge base client against a stubbed service.

use atrium_core::{
    Error, KbEntryUpdate, KbFile, KbQuery, KbUpdate, KnowledgeBase, MetadataPair, OperationState,
};
use atrium_kb::{KbConfig, QnaMakerClient};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> QnaMakerClient {
    let config = KbConfig::default()
        .with_authoring(server.uri(), "sub-key")
        .with_runtime(server.uri(), "endpoint-key")
        .with_kb_id("kb-1");
    QnaMakerClient::new(config).unwrap()
}

#[tokio::test]
async fn test_submit_update_sends_files_and_returns_operation() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/qnamaker/v4.0/knowledgebases/kb-1"))
        .and(header("Ocp-Apim-Subscription-Key", "sub-key"))
        .and(body_json(json!({
            "add": {"files": [{"fileName": "abc.pdf", "fileUri": "https://blobs/abc.pdf?sig=1"}]}
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "operationState": "NotStarted",
            "operationId": "op-1",
            "createdTimestamp": "2026-10-01T00:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let update = KbUpdate::add_files(vec![KbFile {
        file_name: "abc.pdf".to_string(),
        file_uri: "https://blobs/abc.pdf?sig=1".to_string(),
    }]);
    let handle = client(&server).submit_update("kb-1", &update).await.unwrap();
    assert_eq!(handle.operation_id, "op-1");
    assert_eq!(handle.state, OperationState::Running);
}

#[tokio::test]
async fn test_metadata_update_body_shape() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/qnamaker/v4.0/knowledgebases/kb-1"))
        .and(body_json(json!({
            "update": {"qnaList": [{"id": 5, "metadata": {
                "add": [{"name": "source", "value": "abc.pdf"}, {"name": "workspace", "value": "ws-1"}],
                "delete": []
            }}]}
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "operationState": "Running",
            "operationId": "op-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let update = KbUpdate::update_entries(vec![KbEntryUpdate {
        id: 5,
        add_metadata: vec![
            MetadataPair::new("source", "abc.pdf"),
            MetadataPair::new("workspace", "ws-1"),
        ],
        delete_metadata: vec![],
    }]);
    client(&server).submit_update("kb-1", &update).await.unwrap();
}

#[tokio::test]
async fn test_operation_status_reports_failure_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qnamaker/v4.0/operations/op-9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "operationState": "Failed",
            "operationId": "op-9",
            "errorResponse": {"error": {"code": "BadArgument", "message": "File could not be read"}}
        })))
        .mount(&server)
        .await;

    let handle = client(&server).operation_status("op-9").await.unwrap();
    assert_eq!(handle.state, OperationState::Failed);
    assert_eq!(handle.error.as_deref(), Some("File could not be read"));
}

#[tokio::test]
async fn test_publish_posts_to_knowledge_base() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qnamaker/v4.0/knowledgebases/kb-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).publish("kb-1").await.unwrap();
}

#[tokio::test]
async fn test_download_entries_reads_configured_environment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qnamaker/v4.0/knowledgebases/kb-1/test/qna"))
        .and(query_param("source", "abc.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "qnaDocuments": [
                {"id": 1, "answer": "A", "source": "abc.pdf", "questions": ["Q"], "metadata": []},
                {"id": 2, "answer": "B", "source": "abc.pdf", "questions": [], "metadata": []}
            ]
        })))
        .mount(&server)
        .await;

    let entries = client(&server)
        .download_entries("kb-1", "abc.pdf")
        .await
        .unwrap();
    let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn test_query_uses_runtime_endpoint_key_and_strict_filter() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qnamaker/knowledgebases/kb-1/generateAnswer"))
        .and(header("Authorization", "EndpointKey endpoint-key"))
        .and(body_json(json!({
            "question": "What is covered?",
            "top": 3,
            "scoreThreshold": 10.0,
            "strictFilters": [{"name": "workspace", "value": "ws-1"}],
            "isTest": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "answers": [{
                "id": 12,
                "answer": "Everything in section 2.",
                "score": 71.3,
                "questions": ["What is covered?"],
                "source": "abc.pdf",
                "metadata": [{"name": "workspace", "value": "ws-1"}]
            }]
        })))
        .mount(&server)
        .await;

    let query = KbQuery {
        question: "What is covered?".to_string(),
        direct_id: None,
        top: 3,
        score_threshold: 10.0,
        filters: vec![MetadataPair::new("workspace", "ws-1")],
    };
    let answers = client(&server).query("kb-1", &query).await.unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0].id, 12);
    assert_eq!(answers[0].source, "abc.pdf");
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qnamaker/v4.0/knowledgebases/kb-1"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": {"code": "ServiceUnavailable", "message": "try later"}
        })))
        .mount(&server)
        .await;

    let err = client(&server).publish("kb-1").await.unwrap_err();
    assert!(matches!(err, Error::External(_)));
    assert!(err.is_transient());
    assert!(err.to_string().contains("try later"));
}

#[tokio::test]
async fn test_unknown_operation_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/qnamaker/v4.0/operations/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server).operation_status("missing").await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}
