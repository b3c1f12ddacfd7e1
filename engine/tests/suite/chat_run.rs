//! A full run over HTTP: config, chat gateway, controller.

use std::path::Path;

use lemmaloop_engine::{LemmaloopConfig, Role, RoundController, TerminationReason};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sse(chunks: &[&str]) -> String {
    let mut body: String = chunks
        .iter()
        .map(|chunk| {
            let data = json!({"choices": [{"delta": {"content": chunk}}]});
            format!("data: {data}\n\n")
        })
        .collect();
    body.push_str("data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n");
    body.push_str("data: [DONE]\n\n");
    body
}

fn config_for(server: &MockServer) -> LemmaloopConfig {
    let toml = format!(
        r#"
[budgets]
lemma_budget = 2
verification_scaling = 2
call_retries = 1

[gateway]
call_timeout_secs = 10
idle_timeout_secs = 5
http_retries = 0
backoff_initial_ms = 1
backoff_max_ms = 2

[roles.default]
base_url = "{uri}/v1"
model = "solver"
api_key = "sk-test"

[roles.verify]
model = "checker"
"#,
        uri = server.uri()
    );
    LemmaloopConfig::parse(&toml, Path::new("test.toml")).unwrap()
}

async fn mount_model(server: &MockServer, model: &str, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"model": model, "stream": true})))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn solves_over_streaming_chat_completions() {
    let server = MockServer::start().await;
    mount_model(
        &server,
        "solver",
        ResponseTemplate::new(200).set_body_raw(
            sse(&[
                "<final_conjecture>The sum is ",
                "4950.</final_conjecture>",
                "<proof>Gauss pairing.</proof>",
            ]),
            "text/event-stream",
        ),
    )
    .await;
    mount_model(
        &server,
        "checker",
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Correct.\n\\boxed{valid}"}}]
        })),
    )
    .await;

    let config = config_for(&server);
    let gateway = config.gateway().unwrap();
    let settings = config.engine_settings().unwrap();

    let report = RoundController::new(&gateway, &settings)
        .run("Sum the integers from 1 to 99.", Vec::new())
        .await
        .unwrap();

    assert_eq!(report.termination, TerminationReason::Solved);
    assert_eq!(report.answer(), Some("The sum is 4950."));
    assert_eq!(report.stats.verification_attempts, 2);
    assert_eq!(gateway.endpoint(Role::Evaluate).unwrap().model(), "checker");

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn server_errors_exhaust_call_retries() {
    let server = MockServer::start().await;
    mount_model(
        &server,
        "solver",
        ResponseTemplate::new(503).set_body_string("overloaded"),
    )
    .await;

    let config = config_for(&server);
    let gateway = config.gateway().unwrap();
    let settings = config.engine_settings().unwrap();

    let err = RoundController::new(&gateway, &settings)
        .run("P", Vec::new())
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert!(err.to_string().contains("propose call still failing after 2 attempts"));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
