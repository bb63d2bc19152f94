//! End-to-end tests for the sandboxed tool executor and session bookkeeping

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use walkie_talkie::config::Settings;
use walkie_talkie::types::{ChatTurn, ContentBlock, Role};
use walkie_talkie::{PathSandbox, Session, ToolExecutor};

fn workspace() -> (TempDir, ToolExecutor) {
    let dir = TempDir::new().unwrap();
    let sandbox = PathSandbox::new(dir.path()).unwrap();
    (dir, ToolExecutor::new(sandbox, vec![], 30))
}

#[tokio::test]
async fn test_list_after_setup_matches_wire_shape() {
    let (dir, executor) = workspace();
    std::fs::write(dir.path().join("a"), "").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();

    let result = executor.execute("list_directory", &json!({})).await;
    assert!(result.success);
    assert_eq!(result.output, "a\nb/");
}

#[tokio::test]
async fn test_full_edit_cycle_through_tools() {
    let (_dir, executor) = workspace();

    let result = executor
        .execute(
            "write_file",
            &json!({"path": "src/app.py", "content": "def greet():\n    return 'hello'\n"}),
        )
        .await;
    assert!(result.success);

    let result = executor
        .execute(
            "edit_file",
            &json!({"path": "src/app.py", "old_text": "'hello'", "new_text": "'goodbye'"}),
        )
        .await;
    assert!(result.success);

    let result = executor
        .execute("grep", &json!({"pattern": "goodbye", "include": "**/*.py"}))
        .await;
    assert!(result.success);
    assert_eq!(result.output, "src/app.py:2:     return 'goodbye'");

    let result = executor
        .execute("bash", &json!({"command": "cat src/app.py | wc -l"}))
        .await;
    assert!(result.success);
    assert_eq!(result.output.trim(), "2");
}

#[tokio::test]
async fn test_escape_attempt_becomes_safety_error() {
    let (_dir, executor) = workspace();
    let result = executor
        .execute("read_file", &json!({"path": "../../etc/passwd"}))
        .await;
    assert!(!result.success);
    assert!(result.output.starts_with("Safety error: Path escapes sandbox:"));
}

#[tokio::test]
async fn test_tool_round_conversation_shape() {
    // Mirrors one tool round: user turn, assistant turn with tool_use,
    // user turn with the matching tool_result, assistant text turn.
    let (dir, executor) = workspace();
    std::fs::write(dir.path().join("a"), "").unwrap();
    std::fs::create_dir(dir.path().join("b")).unwrap();

    let session = Session::new(Arc::new(Settings::default()));
    session.add_user_message(vec![ContentBlock::text("list files")]);

    let tool_id = "toolu_01";
    session.push_turn(ChatTurn::assistant(vec![ContentBlock::ToolUse {
        id: tool_id.to_string(),
        name: "list_directory".to_string(),
        input: json!({}),
    }]));

    let result = executor.execute("list_directory", &json!({})).await;
    session.push_turn(ChatTurn::user(vec![ContentBlock::tool_result(
        tool_id,
        result.output.clone(),
        !result.success,
    )]));

    session.push_turn(ChatTurn::assistant(vec![ContentBlock::text(
        "<speak>Two entries.</speak>",
    )]));

    let conversation = session.conversation_snapshot();
    assert_eq!(conversation.len(), 4);
    assert_eq!(conversation[0].role, Role::User);
    assert!(conversation[1].has_tool_use());
    assert!(matches!(
        &conversation[2].content[0],
        ContentBlock::ToolResult { tool_use_id, content, is_error }
            if tool_use_id == tool_id && content == "a\nb/" && !is_error
    ));
    assert_eq!(conversation[3].role, Role::Assistant);
}

#[tokio::test]
async fn test_workspace_switch_resets_session() {
    let dir = TempDir::new().unwrap();
    let sandbox = PathSandbox::new(dir.path()).unwrap();
    let executor = Arc::new(ToolExecutor::new(sandbox, vec![], 30));

    let session = Session::new(Arc::new(Settings::default()));
    session.add_user_message(vec![ContentBlock::text("hello")]);
    assert_eq!(session.conversation_len(), 1);

    session.cancel_response();
    session.set_workspace(Some("demo".to_string()), Some(executor.clone()));
    session.clear_conversation();

    assert_eq!(session.workspace_name().as_deref(), Some("demo"));
    assert_eq!(session.conversation_len(), 0);
    assert!(session.tool_executor().is_some());
}
