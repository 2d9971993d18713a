use axum::{
    body::{self, Body},
    http::{self, Request, StatusCode},
    Router,
};
use clientql::{config::AppConfig, server::Server};
use serde::Serialize;
use serde_json::Value;
use std::{fs, future::Future, sync::Once, time::Duration};
use tokio::time::sleep;
use tokio_postgres::{Client, NoTls};
use tower::ServiceExt;

pub const API_KEY: &str = "test-api-key";
const DB_CONNECT_RETRIES: usize = 40;
const DB_CONNECT_DELAY_MS: u64 = 250;
const FIXTURE_LOCK_ID: i64 = 4_216_043;

/// Port 1 on loopback refuses connections immediately.
const UNREACHABLE_DATABASE_URL: &str = "postgres://clientql@127.0.0.1:1/clientql";

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

fn test_config(database_url: String) -> AppConfig {
    let mut config = AppConfig::embedded(database_url);
    config.api_key = Some(API_KEY.to_string());
    config.connect_timeout = Duration::from_secs(1);
    config.request_timeout = Duration::from_secs(10);
    config
}

/// A service instance whose database can never be reached. Exercises every
/// path that must work (or fail cleanly) without a store.
pub fn offline_harness() -> ClientqlTestHarness {
    init_tracing();
    let server = Server::new(test_config(UNREACHABLE_DATABASE_URL.to_string()))
        .expect("offline server should build");

    ClientqlTestHarness {
        router: server.router(),
        api_key: API_KEY.to_string(),
    }
}

/// Runs a test closure against a service backed by the seeded fixture
/// database named by `CLIENTQL_TEST_DATABASE_URL`. Skips when unset.
pub async fn with_fixture_harness<F, Fut>(test: F)
where
    F: FnOnce(ClientqlTestHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    with_configured_fixture_harness(|_| {}, test).await;
}

/// Like [`with_fixture_harness`], with a hook to adjust the service config.
pub async fn with_configured_fixture_harness<C, F, Fut>(configure: C, test: F)
where
    C: FnOnce(&mut AppConfig),
    F: FnOnce(ClientqlTestHarness) -> Fut,
    Fut: Future<Output = ()>,
{
    init_tracing();

    let database_url = match read_env_value("CLIENTQL_TEST_DATABASE_URL")
        .expect("failed to read fixture database config")
    {
        Some(url) => url,
        None => {
            eprintln!(
                "[clientql-test] skipping fixture harness: CLIENTQL_TEST_DATABASE_URL is not set"
            );
            return;
        }
    };

    let client = connect_fixture(&database_url)
        .await
        .expect("failed to connect to fixture database");
    client
        .execute("SELECT pg_advisory_lock($1)", &[&FIXTURE_LOCK_ID])
        .await
        .expect("failed to acquire fixture lock");
    client
        .batch_execute(FIXTURE_SQL)
        .await
        .expect("failed to seed fixture database");

    let mut config = test_config(database_url);
    configure(&mut config);
    let server = Server::new(config).expect("failed to build server");
    let harness = ClientqlTestHarness {
        router: server.router(),
        api_key: API_KEY.to_string(),
    };

    test(harness).await;

    let _ = client
        .execute("SELECT pg_advisory_unlock($1)", &[&FIXTURE_LOCK_ID])
        .await;
}

async fn connect_fixture(database_url: &str) -> anyhow::Result<Client> {
    let mut attempts = 0usize;
    loop {
        match tokio_postgres::connect(database_url, NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        eprintln!("[clientql-test] fixture connection error: {err}");
                    }
                });
                return Ok(client);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= DB_CONNECT_RETRIES {
                    return Err(err.into());
                }
                sleep(Duration::from_millis(DB_CONNECT_DELAY_MS)).await;
            }
        }
    }
}

#[derive(Clone)]
pub struct ClientqlTestHarness {
    router: Router,
    api_key: String,
}

impl ClientqlTestHarness {
    pub async fn ask(&self, question: &str) -> http::Response<Body> {
        let payload = serde_json::json!({ "question": question });
        self.post("/api/ask", &payload, true).await
    }

    pub async fn translate(&self, question: &str) -> http::Response<Body> {
        let payload = serde_json::json!({ "question": question });
        self.post("/translate", &payload, true).await
    }

    #[allow(dead_code)]
    pub async fn translate_without_api_key(&self, question: &str) -> http::Response<Body> {
        let payload = serde_json::json!({ "question": question });
        self.post("/translate", &payload, false).await
    }

    pub async fn sql(&self, sql: &str) -> http::Response<Body> {
        let payload = serde_json::json!({ "sql": sql });
        self.post("/api/sql", &payload, true).await
    }

    #[allow(dead_code)]
    pub async fn health(&self) -> http::Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri("/healthz")
            .body(Body::empty())
            .expect("failed to build health request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle health request")
    }

    async fn post<T>(&self, path: &str, payload: &T, include_api_key: bool) -> http::Response<Body>
    where
        T: Serialize,
    {
        let mut builder = Request::builder()
            .method("POST")
            .uri(path)
            .header(http::header::CONTENT_TYPE, "application/json");

        if include_api_key {
            builder = builder.header("x-api-key", &self.api_key);
        }

        let body = serde_json::to_vec(payload).expect("request payload should serialize");
        let request = builder
            .body(Body::from(body))
            .expect("failed to build harness request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router should handle harness request")
    }
}

pub async fn read_json(response: http::Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("response body should deserialize");
    let value =
        serde_json::from_slice::<Value>(&bytes).expect("response body should be valid JSON");
    (status, value)
}

fn read_env_value(key: &str) -> anyhow::Result<Option<String>> {
    if let Ok(value) = std::env::var(key) {
        if value.trim().is_empty() {
            anyhow::bail!("{key} is set but empty");
        }
        return Ok(Some(value));
    }
    let file_key = format!("{key}_FILE");
    if let Ok(path) = std::env::var(&file_key) {
        let value = fs::read_to_string(&path)
            .map_err(|err| anyhow::anyhow!("failed to read {file_key} ({path}): {err}"))?
            .trim()
            .to_string();
        if value.is_empty() {
            anyhow::bail!("{file_key} pointed at an empty file");
        }
        return Ok(Some(value));
    }
    Ok(None)
}

/// Three clients with overlapping histories, dated relative to `NOW()`.
const FIXTURE_SQL: &str = r#"
DROP TABLE IF EXISTS "contact-logs";
DROP TABLE IF EXISTS schedule;
DROP TABLE IF EXISTS clients;

CREATE TABLE clients (
    client_id TEXT PRIMARY KEY,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    email TEXT,
    phone TEXT,
    membership_type TEXT,
    membership_start TIMESTAMPTZ,
    membership_end TIMESTAMPTZ,
    last_visit TIMESTAMPTZ
);

CREATE TABLE schedule (
    id SERIAL PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients (client_id),
    class_name TEXT NOT NULL,
    coach_name TEXT,
    class_date TIMESTAMPTZ NOT NULL,
    status TEXT NOT NULL
);

CREATE TABLE "contact-logs" (
    id SERIAL PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES clients (client_id),
    contact_date TIMESTAMPTZ NOT NULL,
    contact_type TEXT,
    notes TEXT
);

INSERT INTO clients VALUES
    ('c-ada', 'Ada', 'Lovelace', 'ada@example.com', '555-0100', 'unlimited',
     NOW() - INTERVAL '200 days', NOW() + INTERVAL '10 days', NOW() - INTERVAL '2 days'),
    ('c-ben', 'Ben', 'Okafor', 'ben@example.com', '555-0101', 'intro',
     NOW() - INTERVAL '10 days', NOW() + INTERVAL '300 days', NULL),
    ('c-cy', 'Cy', 'Marsh', 'cy@example.com', '555-0102', 'class-pack',
     NOW() - INTERVAL '400 days', NOW() + INTERVAL '90 days', NOW() - INTERVAL '90 days');

INSERT INTO schedule (client_id, class_name, coach_name, class_date, status) VALUES
    ('c-ada', 'Strength', 'Rita', NOW() - INTERVAL '5 days', 'late_cancel'),
    ('c-ada', 'Strength', 'Rita', NOW() - INTERVAL '40 days', 'late_cancel'),
    ('c-ada', 'Mobility', 'Rita', NOW() - INTERVAL '2 days', 'attended'),
    ('c-ben', 'Intro', 'Sam', NOW() + INTERVAL '1 day', 'booked'),
    ('c-cy', 'Conditioning', 'Sam', NOW() - INTERVAL '90 days', 'attended'),
    ('c-cy', 'Conditioning', 'Sam', NOW() - INTERVAL '60 days', 'late_cancel');

INSERT INTO "contact-logs" (client_id, contact_date, contact_type, notes) VALUES
    ('c-ada', NOW() - INTERVAL '3 days', 'call', 'renewal check-in'),
    ('c-cy', NOW() - INTERVAL '45 days', 'email', 'win-back offer');
"#;
