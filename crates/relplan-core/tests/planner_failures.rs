//! Failure modes of the planning pipeline: non-converging rule sets, missing
//! converters, exhausted budgets and bad setup.

use relplan_core::error::{PlanError, Result};
use relplan_core::expr::{BinaryOp, Expr, ScalarValue};
use relplan_core::node::{Backend, Convention, OpKind, Operator, RelNode, TableRef};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use relplan_core::types::{DataType, Field};
use relplan_core::{
    Planner, PlannerConfig, PlannerState, RewriteProgram, RuleGroup, RuleManifest, RuleRegistry,
};
use std::sync::Arc;

fn filtered_scan() -> Arc<RelNode> {
    let scan = RelNode::table_scan(
        TableRef::new("s", "t"),
        vec![Field::required("a", DataType::Int64)].into_iter().collect(),
    )
    .unwrap();
    let predicate = Expr::binary(
        BinaryOp::Gt,
        Expr::column(0, "a"),
        Expr::literal(ScalarValue::Int64(5)),
    );
    RelNode::filter(scan, predicate).unwrap()
}

/// Mirrors a comparison on every application: `a > 5` becomes `5 < a` and back.
struct MirrorComparison;

impl Rule for MirrorComparison {
    fn name(&self) -> &str {
        "MirrorComparison"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter {
            predicate: Expr::BinaryOp { op, left, right },
        } = node.op()
        else {
            return Ok(vec![]);
        };
        let mirrored = match op {
            BinaryOp::Gt => BinaryOp::Lt,
            BinaryOp::Lt => BinaryOp::Gt,
            _ => return Ok(vec![]),
        };
        let predicate = Expr::binary(mirrored, (**right).clone(), (**left).clone());
        Ok(vec![RelNode::filter(node.input(0).clone(), predicate)?])
    }
}

fn default_registry() -> Arc<RuleRegistry> {
    Arc::new(relplan_rules::default_rule_registry().unwrap())
}

#[test]
fn test_oscillating_rule_hits_pass_limit() {
    let mut registry = RuleRegistry::new();
    registry
        .add_rule(RuleGroup::Logical, Arc::new(MirrorComparison))
        .unwrap();
    let config = PlannerConfig {
        max_passes: 5,
        ..PlannerConfig::default()
    };
    let mut planner = Planner::new(Arc::new(registry), config);

    let err = planner.plan(filtered_scan()).unwrap_err();
    assert_eq!(
        err,
        PlanError::NoFixpoint {
            program: "logical".into(),
            passes: 5
        }
    );
    assert_eq!(planner.state(), PlannerState::Failed);
    // Every pass that changed the tree was recorded before giving up.
    assert!(planner.trace().find("logical#5").is_some());
}

#[test]
fn test_filter_without_calc_program_has_no_converter() {
    let config = PlannerConfig {
        rewrite_programs: vec![RewriteProgram::new(
            "logical",
            vec![RuleGroup::Logical, RuleGroup::Pruning],
        )],
        ..PlannerConfig::default()
    };
    let mut planner = Planner::new(default_registry(), config);
    assert_eq!(
        planner.plan(filtered_scan()).unwrap_err(),
        PlanError::NoApplicableConverter {
            kind: OpKind::Filter,
            target: "stream".into()
        }
    );
}

#[test]
fn test_zero_budget_times_out() {
    let config = PlannerConfig {
        max_planning_time_ms: Some(0),
        ..PlannerConfig::default()
    };
    let mut planner = Planner::new(default_registry(), config);
    let err = planner.plan(filtered_scan()).unwrap_err();
    assert!(
        matches!(err, PlanError::PlanningTimeout { budget_ms: 0, .. }),
        "{err}"
    );
}

#[test]
fn test_root_adapter_missing() {
    let manifest = RuleManifest::from_toml_str(
        r#"
        [groups]
        calc = ["FilterToCalc"]
        conversion = ["StreamCalc", "StreamTableScan"]
        "#,
    )
    .unwrap();
    let registry =
        RuleRegistry::from_manifest(&manifest, &relplan_rules::default_catalog().unwrap()).unwrap();
    let config = PlannerConfig {
        root_convention: Some(Convention::Physical(Backend::Enumerable)),
        ..PlannerConfig::default()
    };
    let mut planner = Planner::new(Arc::new(registry), config);
    assert_eq!(
        planner.plan(filtered_scan()).unwrap_err(),
        PlanError::NoApplicableConverter {
            kind: OpKind::Calc,
            target: "enumerable".into()
        }
    );
}

#[test]
fn test_invalid_config_rejected_before_planning() {
    let config = PlannerConfig {
        rewrite_programs: vec![RewriteProgram::new("bad", vec![RuleGroup::Conversion])],
        ..PlannerConfig::default()
    };
    let mut planner = Planner::new(default_registry(), config);
    assert!(matches!(
        planner.plan(filtered_scan()),
        Err(PlanError::Config(_))
    ));
}

#[test]
fn test_manifest_with_unknown_rule() {
    let manifest = RuleManifest::from_toml_str(
        r#"
        [groups]
        logical = ["FilterIntoJoin", "PushEverythingDown"]
        "#,
    )
    .unwrap();
    let err = RuleRegistry::from_manifest(&manifest, &relplan_rules::default_catalog().unwrap())
        .unwrap_err();
    assert_eq!(
        err,
        PlanError::UnknownRule {
            rule: "PushEverythingDown".into()
        }
    );
}

#[test]
fn test_manifest_listing_a_rule_twice() {
    let manifest = RuleManifest::from_toml_str(
        r#"
        [groups]
        logical = ["UnionEliminator"]
        pruning = ["PruneEmptyFilter", "PruneEmptyFilter"]
        "#,
    )
    .unwrap();
    let err = RuleRegistry::from_manifest(&manifest, &relplan_rules::default_catalog().unwrap())
        .unwrap_err();
    assert_eq!(
        err,
        PlanError::DuplicateRule {
            rule: "PruneEmptyFilter".into()
        }
    );
}

#[test]
fn test_custom_rule_name_clash() {
    let mut registry = relplan_rules::default_rule_registry().unwrap();
    registry
        .add_rule(RuleGroup::Logical, Arc::new(MirrorComparison))
        .unwrap();
    assert!(matches!(
        registry.add_rule(RuleGroup::Logical, Arc::new(MirrorComparison)),
        Err(PlanError::DuplicateRule { .. })
    ));
}

#[test]
fn test_schema_mismatch_on_construction() {
    let err = RelNode::filter(
        filtered_scan(),
        Expr::binary(
            BinaryOp::Gt,
            Expr::column(3, "missing"),
            Expr::literal(ScalarValue::Int64(1)),
        ),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        PlanError::SchemaMismatch {
            kind: OpKind::Filter,
            ..
        }
    ));
}

#[test]
fn test_config_round_trips_through_json() {
    let config = PlannerConfig {
        max_passes: 12,
        root_convention: Some(Convention::Physical(Backend::Enumerable)),
        ..PlannerConfig::default()
    };
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["root_convention"], serde_json::json!({ "physical": "enumerable" }));
    assert_eq!(json["rewrite_programs"][0]["groups"][1], "pruning");

    let partial: PlannerConfig = serde_json::from_str(r#"{ "max_passes": 3 }"#).unwrap();
    assert_eq!(partial.max_passes, 3);
    assert_eq!(partial.rewrite_programs, PlannerConfig::default().rewrite_programs);

    assert!(serde_json::from_str::<PlannerConfig>(r#"{ "max_pases": 3 }"#).is_err());
}
