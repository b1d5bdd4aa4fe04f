// src/matcher.rs

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::MatchError;
use crate::models::{Staff, Task};

/// Picks the task in `pool` that best suits `staff`.
///
/// Implementations only rank; they never touch the store. The engine treats
/// any answer as advisory and keeps its invariants whichever task is chosen.
#[async_trait]
pub trait Matcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Index into `pool` of the chosen task, or `None` to leave `staff` idle.
    async fn select_best(&self, staff: &Staff, pool: &[Task]) -> Result<Option<usize>, MatchError>;
}

/// Takes the first task of the pool, i.e. the oldest one.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstInPool;

#[async_trait]
impl Matcher for FirstInPool {
    fn name(&self) -> &'static str {
        "first-in-pool"
    }

    async fn select_best(&self, _staff: &Staff, pool: &[Task]) -> Result<Option<usize>, MatchError> {
        Ok(if pool.is_empty() { None } else { Some(0) })
    }
}

#[derive(Serialize)]
struct OracleStaff<'a> {
    name: &'a str,
    department: &'a str,
}

#[derive(Serialize)]
struct OracleTask<'a> {
    title: &'a str,
    description: &'a str,
    priority: &'a str,
}

#[derive(Serialize)]
struct MatchRequest<'a> {
    staff: OracleStaff<'a>,
    tasks: Vec<OracleTask<'a>>,
}

#[derive(Deserialize)]
struct MatchResponse {
    suggestion: String,
}

/// Asks an external scoring service which task fits a staff member best.
///
/// The service answers in free text; the first task whose title appears in
/// that text wins, otherwise the first task of the pool.
pub struct OracleMatcher {
    http_client: reqwest::Client,
    endpoint: String,
}

impl OracleMatcher {
    pub fn new(endpoint: &str) -> Self {
        OracleMatcher {
            http_client: reqwest::Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Matcher for OracleMatcher {
    fn name(&self) -> &'static str {
        "oracle"
    }

    async fn select_best(&self, staff: &Staff, pool: &[Task]) -> Result<Option<usize>, MatchError> {
        if pool.is_empty() {
            return Ok(None);
        }
        let body = MatchRequest {
            staff: OracleStaff {
                name: &staff.name,
                department: &staff.department,
            },
            tasks: pool
                .iter()
                .map(|t| OracleTask {
                    title: &t.title,
                    description: &t.description,
                    priority: t.priority.as_str(),
                })
                .collect(),
        };
        let url = format!("{}/match", self.endpoint);
        let resp = self.http_client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(MatchError::Oracle(format!("AI service error: {}", resp.status())));
        }
        let answer: MatchResponse = resp.json().await?;
        debug!("Oracle suggestion for {}: {}", staff.id, answer.suggestion);
        Ok(Some(pick_by_suggestion(&answer.suggestion, pool)))
    }
}

/// Index of the first task whose title occurs in `suggestion`, ignoring case.
pub fn pick_by_suggestion(suggestion: &str, pool: &[Task]) -> usize {
    let suggestion = suggestion.to_lowercase();
    pool.iter()
        .position(|t| !t.title.is_empty() && suggestion.contains(&t.title.to_lowercase()))
        .unwrap_or(0)
}
