//! Question answering against the workspace-scoped knowledge base.

mod common;

use chrono::Utc;
use serde_json::Value as JsonValue;

use atrium_core::{
    GenericRef, Message, MessageType, NotificationEvent, NotificationTarget, WorkflowStatus,
};
use atrium_kb::mock::{KbCall, ScriptedKnowledgeBase};
use common::Harness;

fn question(workspace_id: &str, body: &str, target_id: Option<&str>) -> Message {
    Message {
        id: "msg-1".to_string(),
        workspace_id: workspace_id.to_string(),
        created_at: Utc::now(),
        parent_message_id: None,
        title: None,
        body: body.to_string(),
        target_id: target_id.map(str::to_string),
        author: GenericRef::new("u1", "Ada Tester"),
        posted: true,
        message_type: MessageType::UserQuestion,
    }
}

#[tokio::test]
async fn test_answer_broadcasts_bot_response_to_group() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.published_workspace(&creator, &["paper.pdf"]).await;
    h.kb.clear_calls();

    let run_id = h
        .orchestrator
        .start_answer_question(&question(&workspace.id, "What is in the paper?", None))
        .await
        .unwrap();
    h.worker.run_until_idle().await.unwrap();

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Completed);

    let answered = h.events_named(NotificationEvent::QnaQuestionAnswered);
    assert_eq!(answered.len(), 1);
    assert_eq!(answered[0].target, NotificationTarget::group(&workspace.id));

    let response: Message = serde_json::from_value(answered[0].payload.clone()).unwrap();
    assert_eq!(response.id, "placeholder_response_msg-1");
    assert_eq!(response.parent_message_id.as_deref(), Some("msg-1"));
    assert_eq!(response.message_type, MessageType::BotResponse);
    assert_eq!(response.author.id, "");
    assert!(response.posted);

    let body: JsonValue = serde_json::from_str(&response.body).unwrap();
    let answers = body["answers"].as_array().unwrap();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["source"], workspace.sources[0].kb_source_name());
}

#[tokio::test]
async fn test_query_is_scoped_to_the_workspace() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let first = h.published_workspace(&creator, &["a.pdf"]).await;
    let second = h.published_workspace(&creator, &["b.pdf"]).await;
    h.kb.clear_calls();

    h.orchestrator
        .start_answer_question(&question(&second.id, "anything", None))
        .await
        .unwrap();
    h.worker.run_until_idle().await.unwrap();

    let queries: Vec<_> = h
        .kb
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            KbCall::Query { query, .. } => Some(query),
            _ => None,
        })
        .collect();
    assert_eq!(queries.len(), 1);
    assert!(queries[0]
        .filters
        .iter()
        .any(|f| f.name == "workspace" && f.value == second.id));

    let answered = h.events_named(NotificationEvent::QnaQuestionAnswered);
    let response: Message = serde_json::from_value(answered[0].payload.clone()).unwrap();
    let body: JsonValue = serde_json::from_str(&response.body).unwrap();
    let sources: Vec<&str> = body["answers"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|a| a["source"].as_str())
        .collect();
    assert_eq!(sources, vec![second.sources[0].kb_source_name()]);
    assert!(!sources.contains(&first.sources[0].kb_source_name()));
}

#[tokio::test]
async fn test_direct_question_passes_target_id() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;
    let creator = h.seed_user("u1", "ada@example.com").await;
    let workspace = h.published_workspace(&creator, &["a.pdf"]).await;
    h.kb.clear_calls();

    let mut follow_up = question(&workspace.id, "Tell me more", Some("1"));
    follow_up.message_type = MessageType::UserQuestionDirect;
    h.orchestrator.start_answer_question(&follow_up).await.unwrap();
    h.worker.run_until_idle().await.unwrap();

    let direct_ids: Vec<Option<String>> = h
        .kb
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            KbCall::Query { query, .. } => Some(query.direct_id),
            _ => None,
        })
        .collect();
    assert_eq!(direct_ids, vec![Some("1".to_string())]);
}

#[tokio::test]
async fn test_question_for_missing_workspace_fails_without_retry() {
    let mut h = Harness::new(ScriptedKnowledgeBase::new()).await;

    let run_id = h
        .orchestrator
        .start_answer_question(&question("ws-missing", "hello?", None))
        .await
        .unwrap();
    assert_eq!(h.worker.run_until_idle().await.unwrap(), 1);

    let run = h.orchestrator.run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, WorkflowStatus::Failed);
    assert_eq!(run.attempts, 1);
    assert!(h.kb.calls().is_empty());
    assert!(h.drain().is_empty());
}
