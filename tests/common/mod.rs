#![allow(dead_code)]

use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use lingo_relay::config::{CONFIG_FILE_NAME, ConfigStore};
use lingo_relay::engine::{EngineFactory, EngineSpec, SamplingParams, TextEngine, TokenFlow};
use lingo_relay::error::EngineError;
use lingo_relay::service::TranslationService;
use lingo_relay::translate::cloud::CloudBackend;

/// Engine that "translates" by upper-casing the text after the prompt
/// header, one character per token.
pub struct UppercaseEngine {
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
    dropped: Arc<AtomicUsize>,
    delay: Duration,
}

impl Drop for UppercaseEngine {
    fn drop(&mut self) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
    }
}

impl TextEngine for UppercaseEngine {
    fn generate(
        &mut self,
        prompt: &str,
        params: &SamplingParams,
        sink: &mut dyn FnMut(&str) -> TokenFlow,
    ) -> Result<(), EngineError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        let text = prompt.rsplit("\n\n").next().unwrap_or_default().to_uppercase();
        for ch in text.chars().take(params.max_tokens as usize) {
            if sink(&ch.to_string()) == TokenFlow::Stop {
                break;
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    pub builds: AtomicUsize,
    pub built_models: Mutex<Vec<String>>,
    pub fail_next: AtomicBool,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    pub dropped: Arc<AtomicUsize>,
    pub delay_ms: u64,
}

impl FakeFactory {
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl EngineFactory for FakeFactory {
    fn create(&self, spec: &EngineSpec) -> Result<Box<dyn TextEngine>, EngineError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(EngineError::InitFailed {
                path: spec.model_path.clone(),
                reason: "unknown model format".to_string(),
            });
        }
        self.builds.fetch_add(1, Ordering::SeqCst);
        self.built_models
            .lock()
            .unwrap()
            .push(spec.fingerprint.current_model.clone());
        Ok(Box::new(UppercaseEngine {
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
            dropped: self.dropped.clone(),
            delay: Duration::from_millis(self.delay_ms),
        }))
    }
}

/// Install root with a models directory and a config.json.
pub struct Fixture {
    pub root: tempfile::TempDir,
}

impl Fixture {
    pub fn new(models: &[(&str, usize)], extra_config: Value) -> Self {
        let root = tempfile::tempdir().unwrap();
        let models_dir = root.path().join("models");
        std::fs::create_dir_all(&models_dir).unwrap();
        for (name, size) in models {
            std::fs::write(models_dir.join(name), vec![0u8; *size]).unwrap();
        }

        let mut config = json!({
            "model_dir": models_dir.to_string_lossy(),
            "current_model": models.first().map(|(n, _)| *n).unwrap_or(""),
        });
        if let (Value::Object(base), Value::Object(extra)) = (&mut config, extra_config) {
            base.extend(extra);
        }
        std::fs::write(
            root.path().join(CONFIG_FILE_NAME),
            serde_json::to_string_pretty(&config).unwrap(),
        )
        .unwrap();

        Self { root }
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn models_dir(&self) -> PathBuf {
        self.root.path().join("models")
    }

    pub fn store(&self) -> Arc<ConfigStore> {
        Arc::new(ConfigStore::with_paths(
            self.path(),
            self.path().join(CONFIG_FILE_NAME),
            None,
        ))
    }

    pub fn service(&self, factory: Arc<FakeFactory>) -> TranslationService {
        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        TranslationService::from_parts(self.store(), factory, Arc::new(CloudBackend::with_client(client)))
    }
}

/// Loopback HTTP server answering every request with a fixed JSON body.
pub struct StubServer {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
    pub bodies: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(response_body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/trans/vip/translate", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));
        let response_body = response_body.to_string();

        let (accept_hits, accept_bodies) = (hits.clone(), bodies.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_hits.fetch_add(1, Ordering::SeqCst);
                let bodies = accept_bodies.clone();
                let body = response_body.clone();
                tokio::spawn(async move {
                    serve_one(socket, body, bodies).await;
                });
            }
        });

        Self { url, hits, bodies }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Form fields of the first request received.
    pub fn first_form(&self) -> Vec<(String, String)> {
        let bodies = self.bodies.lock().unwrap();
        let request = bodies.first().cloned().unwrap_or_default();
        let body = request.split("\r\n\r\n").nth(1).unwrap_or_default();
        body.split('&')
            .filter_map(|pair| pair.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

async fn serve_one(mut socket: TcpStream, body: String, bodies: Arc<Mutex<Vec<String>>>) {
    let request = read_request(&mut socket).await;
    bodies.lock().unwrap().push(request);

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(header_end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let headers = String::from_utf8_lossy(&buf[..header_end]).to_lowercase();
        let content_length = headers
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}
