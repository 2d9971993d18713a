mod router;
mod templates;

pub use router::{extract_day_count, MatchResult, QueryRouter};
pub use templates::{render, TemplateId, TemplateParams, TimeBucket};

use crate::{
    error::{Result, ServiceError},
    executor::{QueryExecutor, Row},
};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone)]
pub struct QueryEngine {
    router: QueryRouter,
    executor: QueryExecutor,
}

impl QueryEngine {
    pub fn new(executor: QueryExecutor) -> Self {
        Self {
            router: QueryRouter::new(),
            executor,
        }
    }

    /// Routes the question and runs the selected template.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse> {
        let matched = translate_request(&self.router, request)?;
        let results = self.executor.execute(&matched.sql).await?;
        info!(
            template = %matched.template,
            rows = results.len(),
            "answered natural-language query"
        );

        Ok(AskResponse {
            template: matched.template,
            day_count: matched.day_count,
            time_bucket: matched.time_bucket,
            sql: matched.sql,
            results,
        })
    }

    pub fn translate(&self, request: AskRequest) -> Result<MatchResult> {
        translate_request(&self.router, request)
    }

    pub async fn run_sql(&self, request: SqlRequest) -> Result<SqlResponse> {
        let results = self.executor.execute(&request.sql).await?;
        Ok(SqlResponse { results })
    }
}

/// Routing without execution. Blank questions are rejected here so the
/// router itself stays total.
pub fn translate_request(router: &QueryRouter, request: AskRequest) -> Result<MatchResult> {
    if request.question.trim().is_empty() {
        return Err(ServiceError::InvalidRequest(
            "question must not be empty".into(),
        ));
    }

    Ok(router.route(&request.question))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub template: TemplateId,
    pub day_count: Option<u32>,
    pub time_bucket: Option<TimeBucket>,
    pub sql: String,
    pub results: Vec<Row>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SqlRequest {
    pub sql: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct SqlResponse {
    pub results: Vec<Row>,
}
