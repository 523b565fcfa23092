//! # Fixpoint Planner
//!
//! This module drives rule application over a relational tree until it reaches an
//! executable form.
//!
//! ## How It Works
//!
//! Planning is a small state machine:
//!
//! ```text
//! Initializing ──> Rewriting ──> Converting ──> Converged
//!       │              │              │
//!       └──────────────┴──────────────┴───────> Failed
//! ```
//!
//! 1. **Initializing**: the input must be entirely in the logical convention.
//!
//! 2. **Rewriting**: each configured rewrite program (a composition of rule groups)
//!    runs to its own fixpoint. One pass walks the tree post-order; at each node the
//!    rules matching it are tried in registration order and the first one returning
//!    a non-empty result wins. The replacement is not matched again in the same
//!    pass, and its parent is matched only after all its children were rewritten.
//!    Passes repeat until one changes nothing, or fail with `NoFixpoint` after
//!    `max_passes`.
//!
//! 3. **Converting**: conversion rules run bottom-up. A node converts once all its
//!    inputs carry the target convention; if no rule produces a candidate the plan
//!    fails with `NoApplicableConverter`. When a root convention is configured, the
//!    root-adapter group then runs once at the root.
//!
//! ## Equivalence Classes
//!
//! A rule may return several candidates. They form one [`EquivalenceClass`]: every
//! member must expose the matched node's row type (checked in debug builds or when
//! `verify_equivalence` is set), and the cheapest member under the cost model is
//! kept, earliest first on ties. Inputs are finalized before their parent is
//! costed, and a choice is never revisited.
//!
//! ## Termination
//!
//! Besides the pass budget, an optional wall-clock budget is checked before every
//! pass and every node conversion and fails with `PlanningTimeout`.

use crate::config::PlannerConfig;
use crate::cost::{CostModel, DefaultCostModel};
use crate::error::{PlanError, Result};
use crate::matcher::matching_rules;
use crate::node::{Convention, RelNode};
use crate::rule::{RuleContext, RuleGroup, RuleRegistry, RuleSet};
use crate::types::RowType;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Observable planner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlannerState {
    Initializing,
    Rewriting,
    Converting,
    Converged,
    Failed,
}

impl PlannerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlannerState::Converged | PlannerState::Failed)
    }
}

impl fmt::Display for PlannerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Interchangeable candidates for one plan position.
#[derive(Debug, Clone)]
pub struct EquivalenceClass {
    row_type: RowType,
    members: Vec<Arc<RelNode>>,
}

impl EquivalenceClass {
    /// An empty class for candidates replacing `node`.
    pub fn for_node(node: &RelNode) -> Self {
        Self {
            row_type: node.row_type().clone(),
            members: Vec::new(),
        }
    }

    /// Add a candidate, checking its row type when `verify` is set.
    pub fn add(&mut self, rule: &str, candidate: Arc<RelNode>, verify: bool) -> Result<()> {
        if verify && candidate.row_type() != &self.row_type {
            return Err(PlanError::EquivalenceViolation {
                rule: rule.to_string(),
                kind: candidate.kind(),
                expected: self.row_type.clone(),
                actual: candidate.row_type().clone(),
            });
        }
        self.members.push(candidate);
        Ok(())
    }

    pub fn members(&self) -> &[Arc<RelNode>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Cheapest member, earliest on ties.
    pub fn select(&self, cost_model: &dyn CostModel) -> Option<Arc<RelNode>> {
        if self.members.len() == 1 {
            return self.members.first().cloned();
        }
        let mut best: Option<(f64, &Arc<RelNode>)> = None;
        for member in &self.members {
            let cost = cost_model.cost(member).total;
            if best.map_or(true, |(b, _)| cost < b) {
                best = Some((cost, member));
            }
        }
        best.map(|(_, m)| m.clone())
    }
}

/// One retained tree in the planning history.
#[derive(Debug, Clone)]
pub struct TraceStep {
    pub label: String,
    pub plan: Arc<RelNode>,
}

/// Trees kept after each pass and phase. Subtrees are shared between steps, so
/// the history costs only the rewritten spines.
#[derive(Debug, Clone, Default)]
pub struct PlanTrace {
    steps: Vec<TraceStep>,
}

impl PlanTrace {
    fn record(&mut self, label: impl Into<String>, plan: &Arc<RelNode>) {
        self.steps.push(TraceStep {
            label: label.into(),
            plan: plan.clone(),
        });
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The tree as it was after step `index`.
    pub fn rollback(&self, index: usize) -> Option<Arc<RelNode>> {
        self.steps.get(index).map(|s| s.plan.clone())
    }

    /// The most recent tree with the given label.
    pub fn find(&self, label: &str) -> Option<Arc<RelNode>> {
        self.steps
            .iter()
            .rev()
            .find(|s| s.label == label)
            .map(|s| s.plan.clone())
    }

    pub fn latest(&self) -> Option<Arc<RelNode>> {
        self.steps.last().map(|s| s.plan.clone())
    }
}

/// Counters for one planning call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlanStats {
    /// Passes run per rewrite program, in program order. The last pass of each
    /// program is the one that changed nothing.
    pub passes: Vec<(String, usize)>,
    pub rewrites: usize,
    pub conversions: usize,
    /// Candidates discarded by cost-based selection.
    pub alternatives_pruned: usize,
    pub rule_fires: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
}

impl PlanStats {
    fn fired(&mut self, rule: &str, candidates: usize) {
        *self.rule_fires.entry(rule.to_string()).or_default() += 1;
        self.alternatives_pruned += candidates.saturating_sub(1);
    }
}

/// Result of a successful planning call.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub plan: Arc<RelNode>,
    pub stats: PlanStats,
}

/// Drives one query's tree from logical to converged.
///
/// The registry is shared; everything else is owned by the planner, so planners
/// for different queries can run on different threads without coordination.
pub struct Planner {
    registry: Arc<RuleRegistry>,
    config: PlannerConfig,
    cost_model: Arc<dyn CostModel>,
    state: PlannerState,
    trace: PlanTrace,
}

/// Per-call bookkeeping shared by the phases.
struct Run {
    started: Instant,
    budget_ms: Option<u64>,
    verify: bool,
    stats: PlanStats,
}

impl Run {
    fn check_budget(&self) -> Result<()> {
        let Some(budget_ms) = self.budget_ms else {
            return Ok(());
        };
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        if elapsed_ms >= budget_ms {
            warn!("Planning budget exhausted: elapsed={}ms budget={}ms", elapsed_ms, budget_ms);
            return Err(PlanError::PlanningTimeout {
                elapsed_ms,
                budget_ms,
            });
        }
        Ok(())
    }
}

impl Planner {
    pub fn new(registry: Arc<RuleRegistry>, config: PlannerConfig) -> Self {
        Self {
            registry,
            config,
            cost_model: Arc::new(DefaultCostModel::default()),
            state: PlannerState::Initializing,
            trace: PlanTrace::default(),
        }
    }

    pub fn with_cost_model(mut self, cost_model: Arc<dyn CostModel>) -> Self {
        self.cost_model = cost_model;
        self
    }

    pub fn state(&self) -> PlannerState {
        self.state
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// History of the last planning call.
    pub fn trace(&self) -> &PlanTrace {
        &self.trace
    }

    /// Plan `root`: rewrite, convert and adapt it.
    pub fn plan(&mut self, root: Arc<RelNode>) -> Result<PlanOutcome> {
        self.state = PlannerState::Initializing;
        self.trace = PlanTrace::default();
        let mut run = Run {
            started: Instant::now(),
            budget_ms: self.config.max_planning_time_ms,
            verify: self.config.verify_equivalence || cfg!(debug_assertions),
            stats: PlanStats::default(),
        };

        debug!(
            "Starting planning: root={}, nodes={}, target={}",
            root.kind(),
            root.node_count(),
            self.config.target_convention
        );

        match self.run(root, &mut run) {
            Ok(plan) => {
                self.state = PlannerState::Converged;
                run.stats.elapsed_ms = run.started.elapsed().as_millis() as u64;
                debug!(
                    "Planning converged: nodes={}, rewrites={}, conversions={}, elapsed={}ms",
                    plan.node_count(),
                    run.stats.rewrites,
                    run.stats.conversions,
                    run.stats.elapsed_ms
                );
                Ok(PlanOutcome {
                    plan,
                    stats: run.stats,
                })
            }
            Err(e) => {
                debug!("Planning failed in {}: {}", self.state, e);
                self.state = PlannerState::Failed;
                Err(e)
            }
        }
    }

    fn run(&mut self, root: Arc<RelNode>, run: &mut Run) -> Result<Arc<RelNode>> {
        self.config.validate()?;
        check_logical(&root)?;
        self.trace.record("input", &root);

        self.state = PlannerState::Rewriting;
        let mut plan = root;
        for program in self.config.rewrite_programs.clone() {
            let rules = self.registry.compose(&program.groups)?;
            let (rewritten, passes) = self.rewrite_to_fixpoint(&program.name, &rules, plan, run)?;
            debug!("Program '{}' reached fixpoint after {} passes", program.name, passes);
            run.stats.passes.push((program.name.clone(), passes));
            plan = rewritten;
        }

        self.state = PlannerState::Converting;
        let conversion = self.registry.compose(&[RuleGroup::Conversion])?;
        let target = self.config.target_convention;
        plan = self.convert(&plan, &conversion, target, run)?;
        self.trace.record("convert", &plan);

        if let Some(root_convention) = self.config.root_convention {
            if root_convention != plan.convention() {
                let adapters = self.registry.compose(&[RuleGroup::RootAdapter])?;
                plan = self.adapt_root(&plan, &adapters, root_convention, run)?;
                self.trace.record("root", &plan);
            }
        }
        Ok(plan)
    }

    fn rewrite_to_fixpoint(
        &mut self,
        program: &str,
        rules: &RuleSet,
        mut plan: Arc<RelNode>,
        run: &mut Run,
    ) -> Result<(Arc<RelNode>, usize)> {
        let ctx = RuleContext {
            target: self.config.target_convention,
            cost_model: self.cost_model.as_ref(),
        };
        for pass in 1..=self.config.max_passes {
            run.check_budget()?;
            let before = run.stats.rewrites;
            let rewritten = rewrite_pass(&plan, rules, &ctx, run)?;
            let changed = run.stats.rewrites - before;
            trace!("Program '{}' pass {}: {} rewrites", program, pass, changed);
            if changed == 0 {
                return Ok((plan, pass));
            }
            plan = rewritten;
            self.trace.record(format!("{program}#{pass}"), &plan);
        }
        Err(PlanError::NoFixpoint {
            program: program.to_string(),
            passes: self.config.max_passes,
        })
    }

    fn convert(
        &self,
        node: &Arc<RelNode>,
        rules: &RuleSet,
        target: Convention,
        run: &mut Run,
    ) -> Result<Arc<RelNode>> {
        if node.convention() == target {
            return Ok(node.clone());
        }
        let inputs = node
            .inputs()
            .iter()
            .map(|i| self.convert(i, rules, target, run))
            .collect::<Result<Vec<_>>>()?;
        let node = if same_inputs(node, &inputs) {
            node.clone()
        } else {
            node.with_inputs(inputs)?
        };

        run.check_budget()?;
        let ctx = RuleContext {
            target,
            cost_model: self.cost_model.as_ref(),
        };
        match apply_first(&node, rules, &ctx, run, Some(target))? {
            Some(converted) => {
                run.stats.conversions += 1;
                Ok(converted)
            }
            None => Err(PlanError::NoApplicableConverter {
                kind: node.kind(),
                target: target.to_string(),
            }),
        }
    }

    fn adapt_root(
        &self,
        root: &Arc<RelNode>,
        rules: &RuleSet,
        root_convention: Convention,
        run: &mut Run,
    ) -> Result<Arc<RelNode>> {
        run.check_budget()?;
        let ctx = RuleContext {
            target: root_convention,
            cost_model: self.cost_model.as_ref(),
        };
        match apply_first(root, rules, &ctx, run, Some(root_convention))? {
            Some(adapted) => {
                run.stats.conversions += 1;
                Ok(adapted)
            }
            None => Err(PlanError::NoApplicableConverter {
                kind: root.kind(),
                target: root_convention.to_string(),
            }),
        }
    }

    /// Number of rewrites one full catalogue pass would perform on `tree`.
    /// Zero for a converged plan.
    pub fn count_applicable(&self, tree: &Arc<RelNode>) -> Result<usize> {
        let ctx = RuleContext {
            target: self.config.target_convention,
            cost_model: self.cost_model.as_ref(),
        };
        let mut run = Run {
            started: Instant::now(),
            budget_ms: None,
            verify: false,
            stats: PlanStats::default(),
        };
        let mut total = 0;
        for program in &self.config.rewrite_programs {
            let rules = self.registry.compose(&program.groups)?;
            rewrite_pass(tree, &rules, &ctx, &mut run)?;
        }
        total += run.stats.rewrites;

        let conversion = self.registry.compose(&[RuleGroup::Conversion])?;
        total += count_convertible(tree, &conversion, &ctx)?;

        if let Some(root_convention) = self.config.root_convention {
            let adapters = self.registry.compose(&[RuleGroup::RootAdapter])?;
            if tree.convention() != root_convention
                && first_result(tree, &adapters, &ctx)?.is_some()
            {
                total += 1;
            }
        }
        Ok(total)
    }
}

/// One post-order pass. Returns the (possibly) rewritten tree; the number of
/// rewrites is accumulated in `run.stats`.
fn rewrite_pass(
    node: &Arc<RelNode>,
    rules: &RuleSet,
    ctx: &RuleContext,
    run: &mut Run,
) -> Result<Arc<RelNode>> {
    let inputs = node
        .inputs()
        .iter()
        .map(|i| rewrite_pass(i, rules, ctx, run))
        .collect::<Result<Vec<_>>>()?;
    let node = if same_inputs(node, &inputs) {
        node.clone()
    } else {
        node.with_inputs(inputs)?
    };
    match apply_first(&node, rules, ctx, run, None)? {
        Some(replacement) => {
            run.stats.rewrites += 1;
            Ok(replacement)
        }
        None => Ok(node),
    }
}

/// Try the rules matching `node` in order and return the selected member of the
/// first non-empty equivalence class. Candidates structurally equal to `node`
/// count as a decline. With `convention`, every candidate must carry it.
fn apply_first(
    node: &Arc<RelNode>,
    rules: &RuleSet,
    ctx: &RuleContext,
    run: &mut Run,
    convention: Option<Convention>,
) -> Result<Option<Arc<RelNode>>> {
    for rule in matching_rules(node, rules) {
        let candidates = rule.apply(node, ctx)?;
        if candidates.is_empty() {
            continue;
        }
        let mut class = EquivalenceClass::for_node(node);
        for candidate in candidates {
            if let Some(expected) = convention {
                if candidate.convention() != expected {
                    return Err(PlanError::convention(
                        candidate.kind(),
                        format!(
                            "rule '{}' produced {} instead of {}",
                            rule.name(),
                            candidate.convention(),
                            expected
                        ),
                    ));
                }
            }
            class.add(rule.name(), candidate, run.verify)?;
        }
        let Some(selected) = class.select(ctx.cost_model) else {
            continue;
        };
        if selected == *node {
            continue;
        }
        trace!(
            "Rule '{}' rewrote {} ({} candidates) into {}",
            rule.name(),
            node.kind(),
            class.len(),
            selected.kind()
        );
        run.stats.fired(rule.name(), class.len());
        return Ok(Some(selected));
    }
    Ok(None)
}

/// First non-empty result of the rules matching `node`, without selection.
fn first_result(
    node: &Arc<RelNode>,
    rules: &RuleSet,
    ctx: &RuleContext,
) -> Result<Option<Vec<Arc<RelNode>>>> {
    for rule in matching_rules(node, rules) {
        let candidates = rule.apply(node, ctx)?;
        if !candidates.is_empty() {
            return Ok(Some(candidates));
        }
    }
    Ok(None)
}

fn count_convertible(node: &Arc<RelNode>, rules: &RuleSet, ctx: &RuleContext) -> Result<usize> {
    let mut count = 0;
    for input in node.inputs() {
        count += count_convertible(input, rules, ctx)?;
    }
    if node.convention() != ctx.target && first_result(node, rules, ctx)?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn same_inputs(node: &RelNode, inputs: &[Arc<RelNode>]) -> bool {
    node.inputs()
        .iter()
        .zip(inputs)
        .all(|(a, b)| Arc::ptr_eq(a, b))
}

fn check_logical(root: &RelNode) -> Result<()> {
    if !root.convention().is_logical() {
        return Err(PlanError::convention(
            root.kind(),
            format!("planner input must be logical, found {}", root.convention()),
        ));
    }
    root.inputs().iter().try_for_each(|i| check_logical(i))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Expr, ScalarValue};
    use crate::node::{Backend, JoinAlgorithm, OpKind, Operator, TableRef};
    use crate::pattern::Pattern;
    use crate::rule::{Rule, RuleType};
    use crate::types::{DataType, Field};

    /// Converts any logical node by re-tagging it.
    struct Retag;

    impl Rule for Retag {
        fn name(&self) -> &str {
            "Retag"
        }
        fn rule_type(&self) -> RuleType {
            RuleType::Conversion
        }
        fn pattern(&self) -> Pattern {
            Pattern::Variadic(crate::pattern::OpMatcher::AnyKind(Convention::Logical))
        }
        fn apply(&self, node: &Arc<RelNode>, ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
            Ok(vec![node.with_convention(ctx.target)?])
        }
    }

    /// Drops every filter.
    struct DropFilter;

    impl Rule for DropFilter {
        fn name(&self) -> &str {
            "DropFilter"
        }
        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }
        fn pattern(&self) -> Pattern {
            Pattern::filter()
        }
        fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
            Ok(vec![node.input(0).clone()])
        }
    }

    /// Replaces a filter with a differently shaped projection.
    struct Broken;

    impl Rule for Broken {
        fn name(&self) -> &str {
            "Broken"
        }
        fn rule_type(&self) -> RuleType {
            RuleType::Transformation
        }
        fn pattern(&self) -> Pattern {
            Pattern::filter()
        }
        fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
            Ok(vec![RelNode::project(
                node.input(0).clone(),
                vec![Expr::literal(ScalarValue::Int64(1))],
                vec!["one".into()],
            )?])
        }
    }

    fn scan() -> Arc<RelNode> {
        RelNode::table_scan(
            TableRef::new("s", "t"),
            RowType::new(vec![Field::required("a", DataType::Int64)]),
        )
        .unwrap()
    }

    fn filtered() -> Arc<RelNode> {
        let pred = Expr::binary(
            BinaryOp::Gt,
            Expr::column(0, "a"),
            Expr::literal(ScalarValue::Int64(5)),
        );
        RelNode::filter(scan(), pred).unwrap()
    }

    fn registry(logical: Vec<crate::rule::RuleRef>) -> Arc<RuleRegistry> {
        let mut registry = RuleRegistry::new();
        for rule in logical {
            registry.add_rule(RuleGroup::Logical, rule).unwrap();
        }
        registry
            .add_rule(RuleGroup::Conversion, Arc::new(Retag))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn test_plan_converges_and_records_trace() {
        let mut planner = Planner::new(registry(vec![Arc::new(DropFilter)]), PlannerConfig::default());
        assert_eq!(planner.state(), PlannerState::Initializing);

        let outcome = planner.plan(filtered()).unwrap();
        assert_eq!(planner.state(), PlannerState::Converged);
        assert_eq!(outcome.plan.kind(), OpKind::TableScan);
        assert!(outcome.plan.all_in(Convention::Physical(Backend::Stream)));
        assert_eq!(outcome.stats.rewrites, 1);
        assert_eq!(outcome.stats.rule_fires.get("DropFilter"), Some(&1));
        assert_eq!(
            outcome.stats.passes,
            vec![("logical".to_string(), 2), ("calc".to_string(), 1)]
        );

        let input = planner.trace().rollback(0).unwrap();
        assert_eq!(input.kind(), OpKind::Filter);
        assert!(planner.trace().find("logical#1").is_some());
    }

    #[test]
    fn test_equivalence_violation_is_reported() {
        let mut config = PlannerConfig::default();
        config.verify_equivalence = true;
        let mut planner = Planner::new(registry(vec![Arc::new(Broken)]), config);
        let err = planner.plan(filtered()).unwrap_err();
        assert!(matches!(err, PlanError::EquivalenceViolation { ref rule, .. } if rule == "Broken"));
        assert_eq!(planner.state(), PlannerState::Failed);
    }

    #[test]
    fn test_physical_input_rejected() {
        let mut planner = Planner::new(registry(vec![]), PlannerConfig::default());
        let physical = scan()
            .with_convention(Convention::Physical(Backend::Stream))
            .unwrap();
        assert!(matches!(
            planner.plan(physical),
            Err(PlanError::ConventionMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_converter() {
        let planner_registry = Arc::new(RuleRegistry::new());
        let mut planner = Planner::new(planner_registry, PlannerConfig::default());
        assert_eq!(
            planner.plan(scan()).unwrap_err(),
            PlanError::NoApplicableConverter {
                kind: OpKind::TableScan,
                target: "stream".into()
            }
        );
    }

    #[test]
    fn test_equivalence_class_prefers_cheapest_then_earliest() {
        let l = scan();
        let r = scan();
        let join = |algorithm| {
            RelNode::new(
                Operator::Join {
                    join_type: crate::expr::JoinType::Inner,
                    condition: Expr::equals(Expr::column(0, "a"), Expr::column(1, "a")),
                    algorithm,
                },
                vec![l.clone(), r.clone()],
                Convention::Logical,
            )
            .unwrap()
        };
        let mut class = EquivalenceClass::for_node(&join(JoinAlgorithm::Unspecified));
        class
            .add("t", join(JoinAlgorithm::NestedLoop), true)
            .unwrap();
        class
            .add("t", join(JoinAlgorithm::Hash { build: crate::node::BuildSide::Right }), true)
            .unwrap();
        class
            .add("t", join(JoinAlgorithm::Hash { build: crate::node::BuildSide::Left }), true)
            .unwrap();
        let model = DefaultCostModel::default();
        let chosen = class.select(&model).unwrap();
        assert_eq!(
            chosen.op(),
            &Operator::Join {
                join_type: crate::expr::JoinType::Inner,
                condition: Expr::equals(Expr::column(0, "a"), Expr::column(1, "a")),
                algorithm: JoinAlgorithm::Hash {
                    build: crate::node::BuildSide::Right
                },
            }
        );
    }
}
