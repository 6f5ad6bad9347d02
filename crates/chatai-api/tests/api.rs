use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Method, Request, StatusCode, header},
};
use futures_util::StreamExt;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use chatai_api::cache::ConversationCache;
use chatai_api::chat::CONVERSATION_ID_HEADER;
use chatai_api::{AppState, AppStateInner, AuthSettings, router};
use chatai_db::Database;
use chatai_db::models::NewMessage;
use chatai_llm::{ChatProvider, DeltaStream, LlmError};
use chatai_types::models::{ChatMessage, Model};

/// Provider that replays canned deltas and records what it was sent.
#[derive(Default)]
struct ScriptedProvider {
    reply: Vec<&'static str>,
    fail_at_open: bool,
    fail_after_reply: bool,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    fn replying(reply: &[&'static str]) -> Self {
        Self {
            reply: reply.to_vec(),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn stream_chat(&self, _model: Model, messages: Vec<ChatMessage>) -> Result<DeltaStream, LlmError> {
        self.calls.lock().unwrap().push(messages);
        if self.fail_at_open {
            return Err(LlmError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }

        let mut items: Vec<Result<String, LlmError>> =
            self.reply.iter().map(|s| Ok(s.to_string())).collect();
        if self.fail_after_reply {
            items.push(Err(LlmError::Status {
                status: 500,
                body: "stream reset".into(),
            }));
        }
        Ok(futures_util::stream::iter(items).boxed())
    }
}

struct TestApp {
    router: Router,
    state: AppState,
    provider: Arc<ScriptedProvider>,
}

impl TestApp {
    fn new(provider: ScriptedProvider) -> Self {
        let provider = Arc::new(provider);
        let state: AppState = Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            cache: ConversationCache::default(),
            provider: provider.clone(),
            auth: AuthSettings::new("test-secret"),
        });

        Self {
            router: router(state.clone()),
            state,
            provider,
        }
    }

    async fn send(&self, req: Request<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = self.router.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }

    async fn send_json(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let (status, _, bytes) = self.send(request(method, uri, token, body)).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    /// Run both sign-in steps and return the bearer token and user id.
    async fn sign_in(&self, email: &str) -> (String, Uuid) {
        let (status, initiated) = self
            .send_json(Method::POST, "/auth/initiate_signin", None, Some(json!({ "email": email })))
            .await;
        assert_eq!(status, StatusCode::OK);
        let otp = initiated["otp"].as_str().unwrap().to_string();

        let (status, signed_in) = self
            .send_json(Method::POST, "/auth/signin", None, Some(json!({ "email": email, "otp": otp })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(signed_in["success"], true);

        (
            signed_in["token"].as_str().unwrap().to_string(),
            signed_in["userId"].as_str().unwrap().parse().unwrap(),
        )
    }

    async fn chat(&self, token: &str, body: Value) -> (StatusCode, HeaderMap, String) {
        let (status, headers, bytes) = self
            .send(request(Method::POST, "/ai/chat", Some(token), Some(body)))
            .await;
        (status, headers, String::from_utf8(bytes).unwrap())
    }
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn root_greets() {
    let app = TestApp::new(ScriptedProvider::default());
    let (status, _, body) = app.send(request(Method::GET, "/", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Hello World! You are in the backend of the chatAI!");
}

#[tokio::test]
async fn initiate_signin_rejects_bad_email() {
    let app = TestApp::new(ScriptedProvider::default());

    let (status, body) = app
        .send_json(Method::POST, "/auth/initiate_signin", None, Some(json!({ "email": "nope" })))
        .await;
    assert_eq!(status, StatusCode::LENGTH_REQUIRED);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .send_json(Method::POST, "/auth/initiate_signin", None, Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::LENGTH_REQUIRED);
}

#[tokio::test]
async fn initiate_signin_creates_user_once() {
    let app = TestApp::new(ScriptedProvider::default());

    for _ in 0..2 {
        let (status, body) = app
            .send_json(Method::POST, "/auth/initiate_signin", None, Some(json!({ "email": "a@example.com" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["otp"].as_str().unwrap().len(), 6);
    }

    let user = app.state.db.get_user_by_email("a@example.com").unwrap();
    assert!(user.is_some());
}

#[tokio::test]
async fn signin_reports_unknown_user_and_wrong_otp() {
    let app = TestApp::new(ScriptedProvider::default());

    let (status, body) = app
        .send_json(Method::POST, "/auth/signin", None, Some(json!({ "email": "ghost@example.com", "otp": "123456" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "The user is not found in the database");

    let (_, initiated) = app
        .send_json(Method::POST, "/auth/initiate_signin", None, Some(json!({ "email": "b@example.com" })))
        .await;
    let otp = initiated["otp"].as_str().unwrap();
    let wrong = if otp == "000000" { "111111" } else { "000000" };

    let (status, body) = app
        .send_json(Method::POST, "/auth/signin", None, Some(json!({ "email": "b@example.com", "otp": wrong })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid otp");
    assert!(body.get("token").is_none());

    let padded = format!(" {} ", otp);
    let (_, body) = app
        .send_json(Method::POST, "/auth/signin", None, Some(json!({ "email": "b@example.com", "otp": padded })))
        .await;
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Invalid otp");
}

#[tokio::test]
async fn hidden_otp_is_not_returned() {
    let provider = Arc::new(ScriptedProvider::default());
    let mut auth = AuthSettings::new("test-secret");
    auth.expose_otp = false;
    let state: AppState = Arc::new(AppStateInner {
        db: Database::open_in_memory().unwrap(),
        cache: ConversationCache::default(),
        provider,
        auth,
    });
    let response = router(state)
        .oneshot(request(
            Method::POST,
            "/auth/initiate_signin",
            None,
            Some(json!({ "email": "c@example.com" })),
        ))
        .await
        .unwrap();
    let body: Value =
        serde_json::from_slice(&response.into_body().collect().await.unwrap().to_bytes()).unwrap();

    assert_eq!(body["success"], true);
    assert!(body.get("otp").is_none());
}

#[tokio::test]
async fn protected_routes_require_a_valid_token() {
    let app = TestApp::new(ScriptedProvider::default());

    let (status, body) = app.send_json(Method::GET, "/ai/conversations", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "message": "Auth token invalid", "success": false }));

    let (status, _) = app
        .send_json(Method::GET, "/ai/conversations", Some("not.a.jwt"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (token, _) = app.sign_in("d@example.com").await;
    let (status, body) = app
        .send_json(Method::GET, "/ai/conversations", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "conversations": [] }));
}

#[tokio::test]
async fn chat_streams_reply_and_persists_exchange() {
    let app = TestApp::new(ScriptedProvider::replying(&["Paris", " is the", " capital."]));
    let (token, user_id) = app.sign_in("e@example.com").await;

    let (status, headers, body) = app
        .chat(
            &token,
            json!({ "model": "openai/gpt-4o", "message": "What is the capital of France?" }),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Paris is the capital.");
    assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    let conversation_id: Uuid = headers[CONVERSATION_ID_HEADER].to_str().unwrap().parse().unwrap();

    let (_, listed) = app
        .send_json(Method::GET, "/ai/conversations", Some(&token), None)
        .await;
    let conversations = listed["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    assert_eq!(conversations[0]["id"], conversation_id.to_string());
    assert_eq!(conversations[0]["userId"], user_id.to_string());
    assert_eq!(conversations[0]["title"], "What is the capital ...");

    let (_, detail) = app
        .send_json(
            Method::GET,
            &format!("/ai/conversations/{}", conversation_id),
            Some(&token),
            None,
        )
        .await;
    let messages = detail["conversation"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["content"], "What is the capital of France?");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["content"], "Paris is the capital.");
    assert_eq!(messages[1]["conversationId"], conversation_id.to_string());

    assert_eq!(
        app.state.cache.get(conversation_id).await,
        vec![
            ChatMessage::user("What is the capital of France?"),
            ChatMessage::assistant("Paris is the capital."),
        ]
    );
}

#[tokio::test]
async fn follow_up_sends_cached_history() {
    let app = TestApp::new(ScriptedProvider::replying(&["ok"]));
    let (token, _) = app.sign_in("f@example.com").await;

    let (_, headers, _) = app
        .chat(&token, json!({ "model": "openai/gpt-4o", "message": "first" }))
        .await;
    let conversation_id = headers[CONVERSATION_ID_HEADER].to_str().unwrap().to_string();

    let (status, headers, _) = app
        .chat(
            &token,
            json!({ "conversationId": conversation_id, "model": "openai/gpt-4o", "message": "second" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[CONVERSATION_ID_HEADER], conversation_id.as_str());

    let calls = app.provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], vec![ChatMessage::user("first")]);
    assert_eq!(
        calls[1],
        vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("ok"),
            ChatMessage::user("second"),
        ]
    );

    let (_, listed) = app
        .send_json(Method::GET, "/ai/conversations", Some(&token), None)
        .await;
    assert_eq!(listed["conversations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn chat_rejects_invalid_input() {
    let app = TestApp::new(ScriptedProvider::replying(&["never"]));
    let (token, _) = app.sign_in("g@example.com").await;

    let too_long = "x".repeat(1001);
    for body in [
        json!({ "model": "gpt-3.5-turbo", "message": "hi" }),
        json!({ "message": "hi" }),
        json!({ "model": "openai/gpt-4o" }),
        json!({ "model": "openai/gpt-4o", "message": too_long }),
        json!({ "model": "openai/gpt-4o", "message": "  \n " }),
        json!({ "model": "openai/gpt-4o", "message": "hi", "conversationId": "not-a-uuid" }),
    ] {
        let (status, _, _) = app.chat(&token, body).await;
        assert_eq!(status, StatusCode::LENGTH_REQUIRED);
    }

    assert!(app.provider.calls().is_empty());
}

#[tokio::test]
async fn users_cannot_touch_each_others_conversations() {
    let app = TestApp::new(ScriptedProvider::replying(&["mine"]));
    let (alice, _) = app.sign_in("alice@example.com").await;
    let (mallory, _) = app.sign_in("mallory@example.com").await;

    let (_, headers, _) = app
        .chat(&alice, json!({ "model": "openai/gpt-4o", "message": "secret plans" }))
        .await;
    let conversation_id = headers[CONVERSATION_ID_HEADER].to_str().unwrap().to_string();
    let path = format!("/ai/conversations/{}", conversation_id);

    let (status, body) = app.send_json(Method::GET, &path, Some(&mallory), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "conversation": null }));

    let (status, _, _) = app
        .chat(
            &mallory,
            json!({ "conversationId": conversation_id, "model": "openai/gpt-4o", "message": "hi" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.send_json(Method::DELETE, &path, Some(&mallory), None).await;
    assert_eq!(body, json!({ "success": false }));

    let (_, body) = app.send_json(Method::GET, &path, Some(&alice), None).await;
    assert_eq!(body["conversation"]["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn delete_removes_conversation_and_cache_entry() {
    let app = TestApp::new(ScriptedProvider::replying(&["bye"]));
    let (token, _) = app.sign_in("h@example.com").await;

    let (_, headers, _) = app
        .chat(&token, json!({ "model": "openai/gpt-4o", "message": "hello" }))
        .await;
    let conversation_id: Uuid = headers[CONVERSATION_ID_HEADER].to_str().unwrap().parse().unwrap();
    let path = format!("/ai/conversations/{}", conversation_id);

    let (status, body) = app.send_json(Method::DELETE, &path, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true }));

    let (_, body) = app.send_json(Method::GET, &path, Some(&token), None).await;
    assert_eq!(body, json!({ "conversation": null }));
    assert!(app.state.cache.get(conversation_id).await.is_empty());
}

#[tokio::test]
async fn upstream_failure_is_an_error_response() {
    let app = TestApp::new(ScriptedProvider {
        fail_at_open: true,
        ..ScriptedProvider::default()
    });
    let (token, _) = app.sign_in("i@example.com").await;

    let (status, _, body) = app
        .chat(&token, json!({ "model": "openai/gpt-4o", "message": "hello" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body, json!({ "message": "Internal server error", "success": false }));

    let (_, listed) = app
        .send_json(Method::GET, "/ai/conversations", Some(&token), None)
        .await;
    assert_eq!(listed["conversations"], json!([]));
}

#[tokio::test]
async fn partial_reply_is_kept_when_upstream_breaks() {
    let app = TestApp::new(ScriptedProvider {
        reply: vec!["half an"],
        fail_after_reply: true,
        ..ScriptedProvider::default()
    });
    let (token, _) = app.sign_in("j@example.com").await;

    let (status, headers, body) = app
        .chat(&token, json!({ "model": "openai/gpt-4o", "message": "tell me" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "half an");

    let path = format!("/ai/conversations/{}", headers[CONVERSATION_ID_HEADER].to_str().unwrap());
    let (_, detail) = app.send_json(Method::GET, &path, Some(&token), None).await;
    assert_eq!(detail["conversation"]["messages"][1]["content"], "half an");
}

#[tokio::test]
async fn non_uuid_conversation_ids_are_not_found() {
    let app = TestApp::new(ScriptedProvider::default());
    let (token, _) = app.sign_in("k@example.com").await;

    let (status, body) = app
        .send_json(Method::GET, "/ai/conversations/not-a-uuid", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "conversation": null }));

    let (status, body) = app
        .send_json(Method::DELETE, "/ai/conversations/not-a-uuid", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": false }));
}

#[tokio::test]
async fn disconnect_mid_stream_keeps_nothing() {
    let app = TestApp::new(ScriptedProvider::replying(&["first half", "second half"]));
    let (token, _) = app.sign_in("l@example.com").await;

    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/ai/chat",
            Some(&token),
            Some(json!({ "model": "openai/gpt-4o", "message": "go" })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let conversation_id: Uuid = response.headers()[CONVERSATION_ID_HEADER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let mut body = response.into_body();
    let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
    assert_eq!(&first[..], b"first half");
    drop(body);

    assert!(app.state.cache.get(conversation_id).await.is_empty());
    let (_, listed) = app
        .send_json(Method::GET, "/ai/conversations", Some(&token), None)
        .await;
    assert_eq!(listed, json!({ "conversations": [] }));
}

#[tokio::test]
async fn exchange_is_not_cached_when_id_is_claimed_mid_stream() {
    let app = TestApp::new(ScriptedProvider::replying(&["for alice"]));
    let (alice, _) = app.sign_in("alice@example.com").await;
    let (bob, bob_id) = app.sign_in("bob@example.com").await;
    let conversation_id = Uuid::new_v4();

    let response = app
        .router
        .clone()
        .oneshot(request(
            Method::POST,
            "/ai/chat",
            Some(&alice),
            Some(json!({
                "conversationId": conversation_id.to_string(),
                "model": "openai/gpt-4o",
                "message": "alice here",
            })),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Bob's exchange under the same id is stored before Alice's stream ends.
    let message_id = Uuid::new_v4().to_string();
    app.state
        .db
        .record_exchange(
            &conversation_id.to_string(),
            &bob_id.to_string(),
            "bob here...",
            &[NewMessage { id: &message_id, role: "user", content: "bob here" }],
        )
        .unwrap();

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"for alice");

    assert!(app.state.cache.get(conversation_id).await.is_empty());
    let path = format!("/ai/conversations/{}", conversation_id);
    let (_, detail) = app.send_json(Method::GET, &path, Some(&bob), None).await;
    let messages = detail["conversation"]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["content"], "bob here");
}
