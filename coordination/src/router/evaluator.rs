//! Router evaluator — deterministic `(role, status, mode) → RouterDecision`
//!
//! Evaluation order:
//!
//! 1. Table lookup. A miss yields the unknown-transition fallback.
//! 2. Degraded bypass: while the next role is skipped under the current
//!    mode, follow that role's pass transition.
//! 3. Failure escalation: a failure status with a long enough prior streak
//!    routes to the escalation role.
//! 4. Sensitivity override: a sensitive scope is forced through the
//!    designated role with a mandatory review.
//! 5. Chained `check-remaining`, or plain batch resolution, clamped by the
//!    parallel cap.
//!
//! The evaluator reads persisted state only through [`RoutingContext`] and
//! writes nothing; recording the decision is the coordinator's job.

use std::sync::Arc;

use tracing::{debug, warn};

use super::context::RoutingContext;
use super::decision::{
    AppliedOverride, ChainState, RouteOutcome, RouteRequest, RouterDecision, UnknownKind,
    UnknownTransitionError,
};
use crate::escalation::{EscalationPolicy, OverrideKind};
use crate::state::StoreResult;
use crate::table::{Action, ThenAction, TransitionRule, TransitionTable};

/// Context key attached when a decision escalates on repeated failure.
pub const FAILURE_HISTORY_CONTEXT: &str = "failure_history";

/// Context key attached when a sensitivity override fires.
pub const SENSITIVITY_CONTEXT: &str = "sensitivity";

/// Immutable routing data for one seeded definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    pub definition_version: String,
    pub fingerprint: String,
    pub transitions: TransitionTable,
    pub policy: EscalationPolicy,
}

/// Stateless evaluator over a [`RoutingTable`].
#[derive(Debug, Clone)]
pub struct Router {
    table: Arc<RoutingTable>,
}

struct BatchLimit {
    limit: u32,
    /// Policy rule that set the limit, when it is tighter than the rule's own cap.
    policy_rule: Option<String>,
}

impl Router {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Evaluate a request. Pure with respect to `ctx`: reads only.
    pub fn evaluate(&self, ctx: &impl RoutingContext, req: &RouteRequest) -> StoreResult<RouteOutcome> {
        let Some(base) = self.table.transitions.get(&req.current_role, &req.status_code) else {
            return Ok(RouteOutcome::UnknownTransition(self.unknown(req)));
        };

        let mut decision = self.base_decision(req, base);
        let rule = self.apply_bypasses(&mut decision, req, base);
        let escalated = self.apply_escalation(ctx, &mut decision, req)?;
        let forced = self.apply_sensitivity(ctx, &mut decision, req)?;

        if !escalated && !forced {
            let limit = self.batch_limit(rule);
            match decision.then_action {
                Some(ThenAction::CheckRemaining) => {
                    self.resolve_chain(ctx, &mut decision, req, rule, limit)?
                }
                None if decision.action == Action::BatchSpawn => {
                    self.resolve_batch(ctx, &mut decision, req, limit)?
                }
                None => {}
            }
        }

        decision.finalize();
        debug!(
            session_id = %req.session_id,
            scope_id = %req.scope_id,
            current_role = %req.current_role,
            status = %req.status_code,
            mode = %req.mode,
            next_role = decision.next_role.as_deref().unwrap_or("-"),
            action = %decision.action,
            overrides = decision.applied_overrides.len(),
            "Routing decision evaluated"
        );
        Ok(RouteOutcome::Routed(decision))
    }

    fn base_decision(&self, req: &RouteRequest, rule: &TransitionRule) -> RouterDecision {
        let mut decision = RouterDecision {
            session_id: req.session_id.clone(),
            scope_id: req.scope_id.clone(),
            current_role: req.current_role.clone(),
            status_code: req.status_code.clone(),
            mode: req.mode.clone(),
            next_role: None,
            action: rule.action,
            then_action: None,
            applied_overrides: Vec::new(),
            required_context: Default::default(),
            model_or_priority_override: None,
            batch: Vec::new(),
            chain: ChainState::None,
            mandatory_review: None,
            fallback: None,
            terminal: false,
            completes_pipeline: false,
            definition_version: self.table.definition_version.clone(),
        };
        adopt_rule(&mut decision, rule);
        decision
    }

    fn unknown(&self, req: &RouteRequest) -> UnknownTransitionError {
        let transitions = &self.table.transitions;
        let kind = if transitions.has_role(&req.current_role) {
            UnknownKind::UnknownStatus
        } else {
            UnknownKind::UnknownRole
        };
        let (fallback_role, rule_name) = match transitions.fallback_for_role(&req.current_role) {
            Some(role) => (role.to_string(), format!("transition:{}", req.current_role)),
            None => {
                let policy = &self.table.policy.fallback;
                (policy.rule.fallback_role.clone(), policy.rule_name.clone())
            }
        };

        let mut decision = RouterDecision {
            session_id: req.session_id.clone(),
            scope_id: req.scope_id.clone(),
            current_role: req.current_role.clone(),
            status_code: req.status_code.clone(),
            mode: req.mode.clone(),
            next_role: Some(fallback_role.clone()),
            action: Action::Spawn,
            then_action: None,
            applied_overrides: vec![AppliedOverride::new(
                rule_name,
                OverrideKind::UnknownTransitionFallback,
                format!("{kind}: '{}' / '{}'", req.current_role, req.status_code),
            )],
            required_context: Default::default(),
            model_or_priority_override: None,
            batch: Vec::new(),
            chain: ChainState::None,
            mandatory_review: None,
            fallback: Some(kind),
            terminal: false,
            completes_pipeline: false,
            definition_version: self.table.definition_version.clone(),
        };
        decision.finalize();

        warn!(
            session_id = %req.session_id,
            scope_id = %req.scope_id,
            current_role = %req.current_role,
            status = %req.status_code,
            %kind,
            fallback_role = %fallback_role,
            "Unknown transition, using fallback role"
        );

        UnknownTransitionError {
            kind,
            role: req.current_role.clone(),
            status: req.status_code.clone(),
            fallback_role,
            decision: Box::new(decision),
        }
    }

    /// Follow pass transitions for roles skipped under `req.mode`. Returns
    /// the rule the decision now rests on.
    fn apply_bypasses<'t>(
        &'t self,
        decision: &mut RouterDecision,
        req: &RouteRequest,
        base: &'t TransitionRule,
    ) -> &'t TransitionRule {
        let policy = &self.table.policy;
        let mut rule = base;
        // Each hop consumes a distinct table entry, so more hops than entries means a cycle.
        for _ in 0..self.table.transitions.len() {
            let Some(next) = decision.next_role.clone() else {
                return rule;
            };
            let Some(bypass) = policy
                .bypasses_for(&req.mode)
                .find(|b| b.rule.skip_role == next)
            else {
                return rule;
            };
            let Some(pass) = self
                .table
                .transitions
                .get(&bypass.rule.skip_role, &bypass.rule.pass_status)
            else {
                warn!(
                    rule_name = %bypass.rule_name,
                    skip_role = %bypass.rule.skip_role,
                    pass_status = %bypass.rule.pass_status,
                    "Bypass has no pass transition, not applied"
                );
                return rule;
            };

            adopt_rule(decision, pass);
            decision.applied_overrides.push(AppliedOverride::new(
                &bypass.rule_name,
                OverrideKind::DegradedBypass,
                format!(
                    "mode '{}': skipped '{}' as '{}'",
                    req.mode, bypass.rule.skip_role, bypass.rule.pass_status
                ),
            ));
            rule = pass;
        }
        warn!(mode = %req.mode, "Bypass chain did not settle, stopping");
        rule
    }

    fn apply_escalation(
        &self,
        ctx: &impl RoutingContext,
        decision: &mut RouterDecision,
        req: &RouteRequest,
    ) -> StoreResult<bool> {
        for escalation in self
            .table
            .policy
            .escalations_for(&req.current_role, &req.status_code)
        {
            let rule = &escalation.rule;
            let streak = ctx.failure_streak(&req.session_id, &req.scope_id, &rule.failure_statuses)?;
            if streak < rule.threshold {
                continue;
            }

            decision.next_role = Some(rule.escalation_role.clone());
            decision.action = Action::Spawn;
            decision.then_action = None;
            decision.batch.clear();
            decision
                .required_context
                .insert(FAILURE_HISTORY_CONTEXT.to_string());
            decision.applied_overrides.push(AppliedOverride::new(
                &escalation.rule_name,
                OverrideKind::FailureEscalation,
                format!(
                    "{streak} prior consecutive failures (threshold {}), escalating to '{}'",
                    rule.threshold, rule.escalation_role
                ),
            ));
            debug!(
                session_id = %req.session_id,
                scope_id = %req.scope_id,
                streak,
                threshold = rule.threshold,
                escalation_role = %rule.escalation_role,
                "Failure escalation fired"
            );
            return Ok(true);
        }
        Ok(false)
    }

    fn apply_sensitivity(
        &self,
        ctx: &impl RoutingContext,
        decision: &mut RouterDecision,
        req: &RouteRequest,
    ) -> StoreResult<bool> {
        let Some(sensitivity) = &self.table.policy.sensitivity else {
            return Ok(false);
        };
        let rule = &sensitivity.rule;
        let Some(next) = decision.next_role.as_deref() else {
            return Ok(false);
        };
        if req.current_role == rule.force_role || next == rule.force_role {
            return Ok(false);
        }
        if !ctx.is_sensitive(&req.session_id, &req.scope_id)? {
            return Ok(false);
        }

        let displaced = next.to_string();
        decision.next_role = Some(rule.force_role.clone());
        decision.action = Action::Spawn;
        decision.then_action = None;
        decision.batch.clear();
        decision.mandatory_review = Some(rule.review_role.clone());
        decision
            .required_context
            .insert(SENSITIVITY_CONTEXT.to_string());
        decision.applied_overrides.push(AppliedOverride::new(
            &sensitivity.rule_name,
            OverrideKind::SensitivityOverride,
            format!(
                "sensitive scope: '{}' replaced by '{}', review by '{}'",
                displaced, rule.force_role, rule.review_role
            ),
        ));
        Ok(true)
    }

    fn batch_limit(&self, rule: &TransitionRule) -> BatchLimit {
        let policy_cap = self.table.policy.parallel_cap.as_ref();
        match (rule.batch_cap, policy_cap) {
            (Some(own), Some(cap)) if cap.rule.max_parallel < own => BatchLimit {
                limit: cap.rule.max_parallel,
                policy_rule: Some(cap.rule_name.clone()),
            },
            (Some(own), _) => BatchLimit {
                limit: own,
                policy_rule: None,
            },
            (None, Some(cap)) => BatchLimit {
                limit: cap.rule.max_parallel,
                policy_rule: Some(cap.rule_name.clone()),
            },
            // Seed validation requires a cap for batch rules; one at a time otherwise.
            (None, None) => BatchLimit {
                limit: 1,
                policy_rule: None,
            },
        }
    }

    /// Pending items up to the limit, and whether more were waiting.
    fn fetch_batch(
        &self,
        ctx: &impl RoutingContext,
        req: &RouteRequest,
        limit: &BatchLimit,
    ) -> StoreResult<(Vec<String>, bool)> {
        let mut items = ctx.pending_work_items(&req.session_id, limit.limit.saturating_add(1))?;
        let clamped = items.len() > limit.limit as usize;
        items.truncate(limit.limit as usize);
        Ok((items, clamped))
    }

    fn note_clamp(&self, decision: &mut RouterDecision, limit: &BatchLimit, clamped: bool) {
        if let (true, Some(rule_name)) = (clamped, &limit.policy_rule) {
            decision.applied_overrides.push(AppliedOverride::new(
                rule_name,
                OverrideKind::ParallelCap,
                format!("batch clamped to {}", limit.limit),
            ));
        }
    }

    fn resolve_batch(
        &self,
        ctx: &impl RoutingContext,
        decision: &mut RouterDecision,
        req: &RouteRequest,
        limit: BatchLimit,
    ) -> StoreResult<()> {
        let (items, clamped) = self.fetch_batch(ctx, req, &limit)?;
        decision.batch = items;
        self.note_clamp(decision, &limit, clamped);
        Ok(())
    }

    fn resolve_chain(
        &self,
        ctx: &impl RoutingContext,
        decision: &mut RouterDecision,
        req: &RouteRequest,
        rule: &TransitionRule,
        limit: BatchLimit,
    ) -> StoreResult<()> {
        let (items, clamped) = self.fetch_batch(ctx, req, &limit)?;

        if items.is_empty() && ctx.has_unfinished_work(&req.session_id)? {
            decision.action = Action::BatchSpawn;
            decision.chain = ChainState::AwaitingInProgress;
            decision.batch.clear();
            debug!(
                session_id = %req.session_id,
                scope_id = %req.scope_id,
                "Chained check found work still in progress"
            );
            return Ok(());
        }

        if items.is_empty() {
            let Some(completion) = &self.table.policy.completion else {
                warn!(
                    current_role = %rule.current_role,
                    status = %rule.status_code,
                    "Chained check found no work but no completion rule is defined"
                );
                return Ok(());
            };
            decision.next_role = Some(completion.rule.all_complete_role.clone());
            decision.action = Action::ValidateThenEnd;
            decision.chain = ChainState::AllComplete;
            decision.batch.clear();
            decision.applied_overrides.push(AppliedOverride::new(
                &completion.rule_name,
                OverrideKind::ChainAllComplete,
                format!(
                    "no pending work, handing to '{}'",
                    completion.rule.all_complete_role
                ),
            ));
            return Ok(());
        }

        decision.action = Action::BatchSpawn;
        decision.chain = ChainState::Continuation;
        decision.applied_overrides.push(AppliedOverride::new(
            format!("transition:{}:{}", rule.current_role, rule.status_code),
            OverrideKind::ChainContinuation,
            format!("{} pending work items continue", items.len()),
        ));
        decision.batch = items;
        self.note_clamp(decision, &limit, clamped);
        Ok(())
    }
}

fn adopt_rule(decision: &mut RouterDecision, rule: &TransitionRule) {
    decision.next_role = rule.next_role.clone();
    decision.action = rule.action;
    decision.then_action = rule.then_action;
    decision.required_context = rule.required_context_keys.clone();
    decision.model_or_priority_override = rule.model_or_priority_override.clone();
    decision.batch.clear();
}
