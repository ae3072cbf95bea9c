// End-to-end scheduler passes against mock backend and callback servers

use std::path::Path;

use oxidized_queue::config::{BackendKind, Config};
use oxidized_queue::queue::{Folder, Outcome, Worker};
use serde_json::{json, Value};
use tempfile::TempDir;

fn config_for(dir: &Path, server: &mockito::ServerGuard) -> Config {
    let mut config = Config::with_data_dir(dir).unwrap();
    config.llm.backend = BackendKind::Ollama;
    config.llm.ollama_url = server.url();
    config.llm.alert_pass = false;
    config.llm.timeout_secs = 10;
    config.callback.timeout_secs = 5;
    config.queue.allowed_hostnames = vec!["news-box".to_string()];
    config
}

async fn worker(config: &Config) -> Worker {
    let worker = Worker::from_config(config).unwrap();
    worker.queue().ensure_folders().await.unwrap();
    worker
}

fn drop_job(worker: &Worker, name: &str, body: Value) {
    let path = worker.queue().path(Folder::Pending).join(name);
    std::fs::write(path, body.to_string()).unwrap();
}

fn chat_reply(content: &str) -> String {
    json!({
        "model": "llama3.1",
        "message": {"role": "assistant", "content": content},
        "done": true
    })
    .to_string()
}

#[tokio::test]
async fn test_message_job_is_processed_and_called_back() {
    let mut server = mockito::Server::new_async().await;
    let chat = server
        .mock("POST", "/api/chat")
        .with_status(200)
        .with_body(chat_reply("hello back"))
        .expect(1)
        .create_async()
        .await;
    let callback = server
        .mock("POST", "/cb")
        .match_body(mockito::Matcher::PartialJson(json!({"id": "1", "result": "hello back"})))
        .with_status(200)
        .expect(1)
        .create_async()
        .await;

    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path(), &server);
    let worker = worker(&config).await;
    drop_job(
        &worker,
        "1_data.json",
        json!({"id": "1", "callback_url": format!("{}/cb", server.url()), "message": "hi"}),
    );

    let report = worker.run_once().await.unwrap();

    chat.assert_async().await;
    callback.assert_async().await;
    assert_eq!(report.outcome, Outcome::Processed);
    assert_eq!(report.job_id.as_deref(), Some("1"));

    let saved = std::fs::read_to_string(worker.queue().path(Folder::Processed).join("1_data.json")).unwrap();
    let saved: Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["result"], "hello back");
    assert!(saved["at_process_time_secs"].is_number());
    assert!(config.queue.stats_file.exists());
}

#[tokio::test]
async fn test_job_without_callback_is_deleted() {
    let mut server = mockito::Server::new_async().await;
    let chat = server.mock("POST", "/api/chat").expect(0).create_async().await;
    let callback = server.mock("POST", "/cb").expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path(), &server);
    let worker = worker(&config).await;
    drop_job(&worker, "2_data.json", json!({"id": "2", "message": "hi"}));

    let report = worker.run_once().await.unwrap();

    chat.assert_async().await;
    callback.assert_async().await;
    assert_eq!(report.outcome, Outcome::PermanentInvalid);
    for folder in Folder::ALL {
        assert_eq!(worker.queue().count(folder).await.unwrap(), 0, "{}", folder);
    }
    assert!(!config.queue.stats_file.exists());
}

#[tokio::test]
async fn test_unknown_hostname_is_rejected_without_inference() {
    let mut server = mockito::Server::new_async().await;
    let chat = server.mock("POST", "/api/chat").expect(0).create_async().await;
    let callback = server.mock("POST", "/cb").expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path(), &server);
    let worker = worker(&config).await;
    drop_job(
        &worker,
        "3_data.json",
        json!({
            "id": "3",
            "callback_url": format!("{}/cb", server.url()),
            "message": "hi",
            "hostname": "someone-else"
        }),
    );

    let report = worker.run_once().await.unwrap();

    chat.assert_async().await;
    callback.assert_async().await;
    assert_eq!(report.outcome, Outcome::PolicyRejected);
    assert!(worker.queue().path(Folder::Rejected).join("3_data.json").exists());
}

#[tokio::test]
async fn test_backend_error_goes_to_ai_crashed_and_stays_there() {
    let mut server = mockito::Server::new_async().await;
    let chat = server
        .mock("POST", "/api/chat")
        .with_status(500)
        .with_body(r#"{"error": "out of memory"}"#)
        .expect(1)
        .create_async()
        .await;
    let callback = server.mock("POST", "/cb").expect(0).create_async().await;

    let dir = TempDir::new().unwrap();
    let config = config_for(dir.path(), &server);
    let worker = worker(&config).await;
    drop_job(
        &worker,
        "4_data.json",
        json!({"id": "4", "callback_url": format!("{}/cb", server.url()), "message": "hi"}),
    );

    let first = worker.run_once().await.unwrap();
    let second = worker.run_once().await.unwrap();

    chat.assert_async().await;
    callback.assert_async().await;
    assert_eq!(first.outcome, Outcome::InferenceCrash);
    assert_eq!(second.outcome, Outcome::Idle);
    assert_eq!(second.redelivery, None);
    assert!(worker.queue().path(Folder::AiCrashed).join("4_data.json").exists());
}
