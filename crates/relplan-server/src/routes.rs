//! # HTTP Route Handlers
//!
//! ## Planning Pipeline
//!
//! `POST /plan` accepts a resolved logical tree as JSON and returns the planned
//! tree:
//!
//! 1. **Decode**: parse the body into a [`PlanRequest`].
//! 2. **Build**: turn the [`PlanSpec`] into `RelNode`s. Construction validates
//!    every node and derives its row type.
//! 3. **Plan**: run a fresh `Planner` over the shared registry on the blocking
//!    pool.
//! 4. **Encode**: return the converted tree, its explain text and the planning
//!    statistics.
//!
//! ## Error Handling
//!
//! - 400 Bad Request: the body is not a valid request, or its planner config is
//!   rejected.
//! - 422 Unprocessable Entity: the tree is invalid or planning fails.
//! - 500 Internal Server Error: the planning task panicked.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use relplan_core::error::PlanError;
use relplan_core::planner::PlanStats;
use relplan_core::rule::{RuleGroup, RuleType};
use relplan_core::types::RowType;
use relplan_core::{Convention, Operator, PlannerConfig, Planner, RelNode};

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rules", get(list_rules))
        .route("/config", get(show_config))
        .route("/plan", post(plan))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// GET /rules: registered rules per group, in application order.
pub async fn list_rules(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let groups = RuleGroup::ALL
        .into_iter()
        .map(|group| GroupInfo {
            group,
            rules: state
                .registry
                .rules_for(group)
                .iter()
                .map(|r| RuleInfo {
                    name: r.name().to_string(),
                    rule_type: r.rule_type(),
                })
                .collect(),
        })
        .collect();
    Json(RulesResponse { groups })
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub groups: Vec<GroupInfo>,
}

#[derive(Serialize)]
pub struct GroupInfo {
    pub group: RuleGroup,
    pub rules: Vec<RuleInfo>,
}

#[derive(Serialize)]
pub struct RuleInfo {
    pub name: String,
    pub rule_type: RuleType,
}

/// GET /config: the planner defaults requests run with.
pub async fn show_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}

/// Logical tree as sent by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSpec {
    pub op: Operator,
    #[serde(default)]
    pub inputs: Vec<PlanSpec>,
}

impl PlanSpec {
    pub fn build(&self) -> Result<Arc<RelNode>, PlanError> {
        let inputs = self
            .inputs
            .iter()
            .map(PlanSpec::build)
            .collect::<Result<Vec<_>, _>>()?;
        RelNode::logical(self.op.clone(), inputs)
    }
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub plan: PlanSpec,
    /// Replaces the server's planner config for this request.
    #[serde(default)]
    pub config: Option<PlannerConfig>,
}

/// Planned tree with the derived fields a caller needs.
#[derive(Debug, Serialize)]
pub struct PlannedNode {
    pub op: Operator,
    pub convention: Convention,
    pub row_type: RowType,
    pub inputs: Vec<PlannedNode>,
}

impl From<&RelNode> for PlannedNode {
    fn from(node: &RelNode) -> Self {
        Self {
            op: node.op().clone(),
            convention: node.convention(),
            row_type: node.row_type().clone(),
            inputs: node.inputs().iter().map(|i| PlannedNode::from(i.as_ref())).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub plan: PlannedNode,
    pub explain: String,
    pub digest: String,
    pub stats: PlanStats,
}

/// POST /plan
pub async fn plan(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<PlanResponse>, (StatusCode, String)> {
    let request: PlanRequest = serde_json::from_slice(&body)
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid plan request: {e}")))?;
    let config = match request.config {
        Some(config) => {
            config
                .validate()
                .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
            config
        }
        None => state.config.clone(),
    };

    let root = request.plan.build().map_err(unprocessable)?;
    let registry = state.registry.clone();
    let cost_model = state.cost_model.clone();

    // Planning is CPU-bound and synchronous.
    let outcome = tokio::task::spawn_blocking(move || {
        Planner::new(registry, config)
            .with_cost_model(cost_model)
            .plan(root)
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Planning task failed: {e}"),
        )
    })?
    .map_err(unprocessable)?;

    Ok(Json(PlanResponse {
        plan: PlannedNode::from(outcome.plan.as_ref()),
        explain: outcome.plan.explain(),
        digest: outcome.plan.digest(),
        stats: outcome.stats,
    }))
}

fn unprocessable(e: PlanError) -> (StatusCode, String) {
    tracing::debug!(error = %e, "plan rejected");
    (StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use relplan_core::expr::{BinaryOp, Expr, JoinType, ScalarValue};
    use relplan_core::node::{Backend, TableRef};
    use relplan_core::types::{DataType, Field};
    use tower::ServiceExt;

    fn app() -> Router {
        let registry = relplan_rules::default_rule_registry().unwrap();
        router(Arc::new(AppState::new(registry, PlannerConfig::default())))
    }

    fn scan(name: &str, cols: &[&str]) -> PlanSpec {
        PlanSpec {
            op: Operator::TableScan {
                table: TableRef::new("s", name),
                row_type: cols
                    .iter()
                    .map(|c| Field::required(*c, DataType::Int64))
                    .collect(),
                unique_keys: vec![],
            },
            inputs: vec![],
        }
    }

    fn filtered_join() -> PlanSpec {
        let join = PlanSpec {
            op: Operator::Join {
                join_type: JoinType::Inner,
                condition: Expr::equals(Expr::column(0, "k"), Expr::column(2, "k")),
                algorithm: Default::default(),
            },
            inputs: vec![scan("l", &["k", "a"]), scan("r", &["k", "b"])],
        };
        PlanSpec {
            op: Operator::Filter {
                predicate: Expr::binary(
                    BinaryOp::Gt,
                    Expr::column(1, "a"),
                    Expr::literal(ScalarValue::Int64(5)),
                ),
            },
            inputs: vec![join],
        }
    }

    async fn post_plan(body: String) -> (StatusCode, serde_json::Value) {
        let response = app()
            .oneshot(
                Request::post("/plan")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rules_lists_groups_in_order() {
        let response = app()
            .oneshot(Request::get("/rules").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let groups = value["groups"].as_array().unwrap();
        assert_eq!(groups.len(), 5);
        assert_eq!(groups[0]["group"], "logical");
        assert_eq!(groups[0]["rules"][0]["name"], "FilterIntoJoin");
    }

    #[tokio::test]
    async fn test_plan_returns_stream_tree() {
        let body = serde_json::json!({ "plan": filtered_join() }).to_string();
        let (status, value) = post_plan(body).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["plan"]["convention"], serde_json::json!({ "physical": "stream" }));
        assert!(value["explain"].as_str().unwrap().contains("Join"));
        assert!(value["stats"]["rewrites"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_root_convention_from_request_config() {
        let config = PlannerConfig {
            root_convention: Some(Convention::Physical(Backend::Enumerable)),
            ..PlannerConfig::default()
        };
        let body = serde_json::json!({ "plan": filtered_join(), "config": config }).to_string();
        let (status, value) = post_plan(body).await;
        assert_eq!(status, StatusCode::OK);
        assert!(value["plan"]["op"].get("EnumerableConverter").is_some());
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (status, _) = post_plan("{\"plan\": 42}".to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_tree_is_unprocessable() {
        // A filter on a column the scan does not have.
        let bad = PlanSpec {
            op: Operator::Filter {
                predicate: Expr::binary(
                    BinaryOp::Gt,
                    Expr::column(7, "x"),
                    Expr::literal(ScalarValue::Int64(1)),
                ),
            },
            inputs: vec![scan("t", &["a"])],
        };
        let body = serde_json::json!({ "plan": bad }).to_string();
        let (status, _) = post_plan(body).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
