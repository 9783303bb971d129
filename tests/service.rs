mod common;

use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use common::{FakeFactory, Fixture, StubServer};
use lingo_relay::config::CloudCredentials;
use lingo_relay::error::TranslatorError;
use lingo_relay::translate::TranslationRequest;
use lingo_relay::translate::cloud::{SALT_RANGE, sign_request};

fn local(text: &str) -> TranslationRequest {
    TranslationRequest::new(text).with_languages("en", "zh")
}

#[tokio::test]
async fn test_local_translation_reuses_engine() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    let first = service.translate(&local("hello")).await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.translated_text.as_deref(), Some("HELLO"));
    assert_eq!(first.source_lang, "en");
    assert_eq!(first.target_lang, "zh");

    let second = service.translate(&local("world")).await;
    assert_eq!(second.translated_text.as_deref(), Some("WORLD"));

    assert_eq!(factory.builds(), 1);
    let status = service.engine_status();
    assert_eq!(status.state, "ready");
    assert_eq!(status.model.as_deref(), Some("a.gguf"));
    assert!(status.using_cpu);
    assert!(!status.using_gpu);
}

#[tokio::test]
async fn test_unsupported_provider_is_a_failed_result() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    let result = service.translate(&local("hello").with_provider("deepl")).await;
    assert!(!result.success);
    assert!(result.translated_text.is_none());
    assert!(result.error.unwrap().contains("deepl"));
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn test_empty_text_is_rejected_without_loading() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    let result = service.translate(&local("   ")).await;
    assert!(!result.success);
    assert_eq!(result.error.as_deref(), Some("Text to translate is empty"));
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn test_batch_keeps_failures_in_place() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let texts = vec!["ok".to_string(), String::new(), "fine".to_string()];
    let batch = service.batch_translate(&texts, "auto", "en", "llama-cpp").await;

    assert!(batch.success);
    assert_eq!(batch.results.len(), 3);
    assert_eq!(batch.results[0].translated_text.as_deref(), Some("OK"));
    assert!(!batch.results[1].success);
    assert!(batch.results[1].error.is_some());
    assert_eq!(batch.results[2].translated_text.as_deref(), Some("FINE"));
    assert!(batch.results.iter().all(|r| r.target_lang == "en"));
}

#[tokio::test]
async fn test_empty_batch() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let batch = service.batch_translate(&[], "auto", "zh", "baidu").await;
    assert!(batch.success);
    assert!(batch.results.is_empty());
}

#[tokio::test]
async fn test_switch_model_rebuilds_once() {
    let fixture = Fixture::new(&[("a.gguf", 16), ("b.gguf", 32)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    assert!(service.translate(&local("one")).await.success);

    let switch = service.switch_model("b.gguf").await.unwrap();
    assert_eq!(switch.model, "b.gguf");
    assert_eq!(switch.saved.path, fixture.path().join("config.json"));
    assert_eq!(service.engine_status().state, "invalidated");
    assert_eq!(factory.dropped(), 1, "old model must be freed by the switch itself");
    assert_eq!(factory.builds(), 1);

    let persisted = service.get_config();
    assert_eq!(persisted.get("current_model"), Some(&json!("b.gguf")));

    assert!(service.translate(&local("two")).await.success);
    assert!(service.translate(&local("three")).await.success);

    assert_eq!(factory.builds(), 2);
    assert_eq!(*factory.built_models.lock().unwrap(), vec!["a.gguf", "b.gguf"]);
}

#[tokio::test]
async fn test_switch_to_missing_model_changes_nothing() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let err = service.switch_model("nope.gguf").await.unwrap_err();
    assert!(matches!(err, TranslatorError::ModelNotFound(_)));

    let err = service.switch_model("../a.gguf").await.unwrap_err();
    assert!(matches!(err, TranslatorError::ModelNotFound(_)));

    assert_eq!(service.get_config().get("current_model"), Some(&json!("a.gguf")));
}

#[tokio::test]
async fn test_engine_failure_then_recovery() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    factory.fail_next.store(true, Ordering::SeqCst);
    let service = fixture.service(factory.clone());

    let failed = service.translate(&local("hello")).await;
    assert!(!failed.success);
    assert!(failed.error.unwrap().contains("unknown model format"));
    assert_eq!(service.engine_status().state, "absent");

    let retried = service.translate(&local("hello")).await;
    assert_eq!(retried.translated_text.as_deref(), Some("HELLO"));
    assert_eq!(factory.builds(), 1);
}

#[tokio::test]
async fn test_no_models_installed() {
    let fixture = Fixture::new(&[], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    let result = service.translate(&local("hello")).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("No .gguf model found"));
    assert_eq!(factory.builds(), 0);

    let listing = service.list_models().unwrap();
    assert!(listing.models.is_empty());
}

#[tokio::test]
async fn test_first_model_used_when_none_selected() {
    let fixture = Fixture::new(&[("only.gguf", 8)], json!({"current_model": ""}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    assert!(service.translate(&local("hi")).await.success);
    assert_eq!(*factory.built_models.lock().unwrap(), vec!["only.gguf"]);
    assert_eq!(factory.builds(), 1);
}

#[tokio::test]
async fn test_list_models_sorted_with_sizes() {
    let fixture = Fixture::new(
        &[("zeta.gguf", 1_572_864), ("alpha.gguf", 1024), ("beta.gguf", 0)],
        json!({}),
    );
    std::fs::write(fixture.models_dir().join("notes.txt"), "not a model").unwrap();
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let listing = service.list_models().unwrap();
    let names: Vec<_> = listing.models.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["alpha.gguf", "beta.gguf", "zeta.gguf"]);
    assert_eq!(listing.models[2].size_bytes, 1_572_864);
    assert_eq!(listing.models[2].size_mb, 1.5);
    assert_eq!(listing.models[1].size_mb, 0.0);
}

#[tokio::test]
async fn test_list_models_missing_dir() {
    let fixture = Fixture::new(&[], json!({}));
    std::fs::remove_dir(fixture.models_dir()).unwrap();
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let err = service.list_models().unwrap_err();
    assert!(matches!(err, TranslatorError::ModelDirMissing(_)));
    assert!(!fixture.models_dir().exists());
}

#[tokio::test]
async fn test_inference_mode() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());
    assert!(service.translate(&local("x")).await.success);

    let err = service.set_inference_mode("gpu").await.unwrap_err();
    assert!(matches!(err, TranslatorError::InvalidMode(ref m) if m == "gpu"));

    assert!(!service.set_inference_mode("cpu").await.unwrap());
    assert_eq!(service.engine_status().state, "ready");
    assert_eq!(service.inference_mode().as_str(), "cpu");
}

#[tokio::test]
async fn test_health_and_shutdown() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    let health = service.health();
    assert_eq!(health.status, "ok");
    assert_eq!(health.engine.state, "absent");

    assert!(service.translate(&local("x")).await.success);
    service.shutdown().await;
    assert_eq!(service.engine_status().state, "absent");

    assert!(service.translate(&local("y")).await.success);
    assert_eq!(factory.builds(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_local_requests_are_serialized() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::with_delay(30));
    let service = fixture.service(factory.clone());

    let (req_one, req_two, req_three) = (local("one"), local("two"), local("three"));
    let (a, b, c) = tokio::join!(
        service.translate(&req_one),
        service.translate(&req_two),
        service.translate(&req_three),
    );

    assert_eq!(a.translated_text.as_deref(), Some("ONE"));
    assert_eq!(b.translated_text.as_deref(), Some("TWO"));
    assert_eq!(c.translated_text.as_deref(), Some("THREE"));
    assert_eq!(factory.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(factory.builds(), 1);
}

#[tokio::test]
async fn test_cloud_without_credentials_makes_no_request() {
    let stub = StubServer::start(r#"{"trans_result":[{"src":"a","dst":"b"}]}"#).await;
    let fixture = Fixture::new(
        &[],
        json!({"baidu_appid": "", "baidu_appkey": "secret", "baidu_endpoint": stub.url.clone()}),
    );
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let result = service.translate(&local("hello").with_provider("baidu")).await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("not configured"));
    assert_eq!(stub.hits(), 0);
}

#[tokio::test]
async fn test_cloud_translation_signs_request() {
    let stub = StubServer::start(
        r#"{"from":"en","to":"zh","trans_result":[{"src":"hello","dst":"你好"}]}"#,
    )
    .await;
    let fixture = Fixture::new(
        &[],
        json!({"baidu_appid": "test-app", "baidu_appkey": "test-key", "baidu_endpoint": stub.url.clone()}),
    );
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let request = TranslationRequest::new("hello")
        .with_languages("auto", "zh")
        .with_provider("Baidu");
    let result = service.translate(&request).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.translated_text.as_deref(), Some("你好"));
    assert_eq!(result.source_lang, "en");
    assert_eq!(result.target_lang, "zh");
    assert_eq!(stub.hits(), 1);

    let form = stub.first_form();
    let field = |name: &str| {
        form.iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    };
    assert_eq!(field("appid"), "test-app");
    assert_eq!(field("q"), "hello");
    assert_eq!(field("from"), "auto");
    assert_eq!(field("to"), "zh");

    let salt = field("salt");
    assert!(SALT_RANGE.contains(&salt.parse::<u32>().unwrap()));
    let credentials = CloudCredentials {
        app_id: "test-app".to_string(),
        app_key: "test-key".to_string(),
    };
    assert_eq!(field("sign"), sign_request(&credentials, "hello", &salt));
}

#[tokio::test]
async fn test_cloud_vendor_error_is_reported() {
    let stub = StubServer::start(r#"{"error_code":"54001","error_msg":"Invalid Sign"}"#).await;
    let fixture = Fixture::new(
        &[],
        json!({"baidu_appid": "id", "baidu_appkey": "key", "baidu_endpoint": stub.url.clone()}),
    );
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let result = service.translate(&local("hello").with_provider("cloud")).await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert!(error.contains("54001"));
    assert!(error.contains("Invalid Sign"));
}

#[tokio::test]
async fn test_cloud_batch_maps_language_codes() {
    let stub = StubServer::start(r#"{"trans_result":[{"src":"x","dst":"y"}]}"#).await;
    let fixture = Fixture::new(
        &[],
        json!({"baidu_appid": "id", "baidu_appkey": "key", "baidu_endpoint": stub.url.clone()}),
    );
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let texts = vec!["bonjour".to_string()];
    let batch = service.batch_translate(&texts, "fr", "ja", "baidu").await;
    assert!(batch.results[0].success);
    assert_eq!(batch.results[0].source_lang, "fr");

    let form = stub.first_form();
    assert!(form.contains(&("from".to_string(), "fra".to_string())));
    assert!(form.contains(&("to".to_string(), "jp".to_string())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_health_answers_during_generation() {
    let fixture = Fixture::new(&[("a.gguf", 16)], json!({}));
    let factory = Arc::new(FakeFactory::with_delay(1500));
    let service = fixture.service(factory.clone());

    let slow = local("slow");
    let (translated, (health, waited)) = tokio::join!(service.translate(&slow), async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        let start = Instant::now();
        let health = service.health();
        (health, start.elapsed())
    });

    assert!(waited < Duration::from_millis(500), "health waited {:?}", waited);
    assert_eq!(health.status, "ok");
    assert_eq!(health.engine.state, "ready");
    assert_eq!(factory.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(translated.translated_text.as_deref(), Some("SLOW"));
}

#[tokio::test]
async fn test_null_current_model_uses_first_model() {
    let fixture = Fixture::new(&[("only.gguf", 8)], json!({"current_model": null}));
    let factory = Arc::new(FakeFactory::default());
    let service = fixture.service(factory.clone());

    let result = service.translate(&local("hi")).await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(*factory.built_models.lock().unwrap(), vec!["only.gguf"]);

    let listing = service.list_models().unwrap();
    assert_eq!(listing.models.len(), 1);
}

#[tokio::test]
async fn test_cloud_path_ignores_bad_engine_settings() {
    let stub = StubServer::start(r#"{"trans_result":[{"src":"x","dst":"y"}]}"#).await;
    let fixture = Fixture::new(&[], json!({"threads": -1, "baidu_appid": "", "baidu_endpoint": stub.url.clone()}));
    let service = fixture.service(Arc::new(FakeFactory::default()));

    let result = service.translate(&local("hello").with_provider("baidu")).await;
    assert!(result.error.unwrap().contains("not configured"));
    assert_eq!(stub.hits(), 0);

    let mut doc = service.get_config();
    doc.set("baidu_appid", json!("id"));
    doc.set("baidu_appkey", json!("key"));
    service.update_config(&doc).unwrap();

    let result = service.translate(&local("hello").with_provider("baidu")).await;
    assert_eq!(result.translated_text.as_deref(), Some("y"));
    assert_eq!(stub.hits(), 1);

    let local_result = service.translate(&local("hello")).await;
    assert!(local_result.error.unwrap().contains("Invalid configuration"));
}
