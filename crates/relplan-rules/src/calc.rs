//! # Calc Rules
//!
//! A Calc is a Filter and a Project fused into one operator: the condition is
//! evaluated over the input, then the projection over the surviving rows. The
//! physical backends implement Calc but neither Filter nor Project, so the calc
//! program folds every Filter and Project into Calcs before conversion.
//!
//! Order within the program matters: the merge rules run first so that a Filter
//! or Project directly above a Calc joins it instead of starting a new one.

use crate::plan_util::{identity_projection, is_identity};
use relplan_core::error::Result;
use relplan_core::expr::Expr;
use relplan_core::node::{OpKind, Operator, RelNode};
use relplan_core::pattern::Pattern;
use relplan_core::rule::{Rule, RuleContext, RuleType};
use std::sync::Arc;

/// AND of two optional conditions, dropping literal TRUE.
fn and_conditions(a: Option<&Expr>, b: Option<Expr>) -> Option<Expr> {
    let mut conjuncts = a.map(Expr::owned_conjuncts).unwrap_or_default();
    if let Some(b) = b {
        conjuncts.extend(b.owned_conjuncts());
    }
    Expr::conjunction(conjuncts)
}

fn calc_parts(node: &RelNode) -> Option<(&[Expr], &[String], Option<&Expr>)> {
    match node.op() {
        Operator::Calc {
            projects,
            aliases,
            condition,
        } => Some((projects, aliases, condition.as_ref())),
        _ => None,
    }
}

/// Fold a Filter into the Calc beneath it.
pub struct FilterCalcMerge;

impl Rule for FilterCalcMerge {
    fn name(&self) -> &str {
        "FilterCalcMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Filter, Pattern::calc())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter { predicate } = node.op() else {
            return Ok(vec![]);
        };
        let calc = node.input(0);
        let Some((projects, aliases, condition)) = calc_parts(calc) else {
            return Ok(vec![]);
        };
        let condition = and_conditions(condition, Some(predicate.substitute(projects)));
        Ok(vec![RelNode::calc(
            calc.input(0).clone(),
            projects.to_vec(),
            aliases.to_vec(),
            condition,
        )?])
    }
}

/// Fold a Project into the Calc beneath it.
pub struct ProjectCalcMerge;

impl Rule for ProjectCalcMerge {
    fn name(&self) -> &str {
        "ProjectCalcMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Project, Pattern::calc())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Project { exprs, aliases } = node.op() else {
            return Ok(vec![]);
        };
        let calc = node.input(0);
        let Some((projects, _, condition)) = calc_parts(calc) else {
            return Ok(vec![]);
        };
        let merged = exprs.iter().map(|e| e.substitute(projects)).collect();
        Ok(vec![RelNode::calc(
            calc.input(0).clone(),
            merged,
            aliases.clone(),
            condition.cloned(),
        )?])
    }
}

pub struct FilterToCalc;

impl Rule for FilterToCalc {
    fn name(&self) -> &str {
        "FilterToCalc"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::filter()
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Filter { predicate } = node.op() else {
            return Ok(vec![]);
        };
        let input = node.input(0);
        let (projects, aliases) = identity_projection(input.row_type());
        Ok(vec![RelNode::calc(
            input.clone(),
            projects,
            aliases,
            Some(predicate.clone()),
        )?])
    }
}

pub struct ProjectToCalc;

impl Rule for ProjectToCalc {
    fn name(&self) -> &str {
        "ProjectToCalc"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::project()
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Operator::Project { exprs, aliases } = node.op() else {
            return Ok(vec![]);
        };
        Ok(vec![RelNode::calc(
            node.input(0).clone(),
            exprs.clone(),
            aliases.clone(),
            None,
        )?])
    }
}

/// Remove a Calc that neither filters nor changes its input.
pub struct CalcRemove;

impl Rule for CalcRemove {
    fn name(&self) -> &str {
        "CalcRemove"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::calc()
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let Some((projects, aliases, condition)) = calc_parts(node) else {
            return Ok(vec![]);
        };
        let input = node.input(0);
        let filters = condition.is_some_and(|c| !c.is_true());
        if filters || !is_identity(projects, aliases, input.row_type()) {
            return Ok(vec![]);
        }
        // Equal names do not imply equal nullability.
        if input.row_type() != node.row_type() {
            return Ok(vec![]);
        }
        Ok(vec![input.clone()])
    }
}

/// Merge two stacked Calcs.
pub struct CalcMerge;

impl Rule for CalcMerge {
    fn name(&self) -> &str {
        "CalcMerge"
    }

    fn rule_type(&self) -> RuleType {
        RuleType::Transformation
    }

    fn pattern(&self) -> Pattern {
        Pattern::on_top_of(OpKind::Calc, Pattern::calc())
    }

    fn apply(&self, node: &Arc<RelNode>, _ctx: &RuleContext) -> Result<Vec<Arc<RelNode>>> {
        let (Some((top_projects, top_aliases, top_condition)), Some((bottom_projects, _, bottom_condition))) =
            (calc_parts(node), calc_parts(node.input(0)))
        else {
            return Ok(vec![]);
        };
        let projects = top_projects
            .iter()
            .map(|e| e.substitute(bottom_projects))
            .collect();
        let condition = and_conditions(
            bottom_condition,
            top_condition.map(|c| c.substitute(bottom_projects)),
        );
        Ok(vec![RelNode::calc(
            node.input(0).input(0).clone(),
            projects,
            top_aliases.to_vec(),
            condition,
        )?])
    }
}
