//! Effective RLS condition computation.

use std::sync::Arc;
use strata_core::{AuthContext, PolicyCommand, RlsPolicy};

use crate::error::RlsError;
use crate::parser::ExpressionValidator;
use crate::placeholder::substitute;
use crate::store::PolicyStore;

/// Predicates for one `(table, command)` pair.
///
/// Both strings are either empty (no restriction) or a conjunction of
/// parenthesized policy expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyConditions {
    /// Row visibility: which existing rows the command may see or touch.
    pub using: String,
    /// Row validation: which new or updated rows the command may produce.
    pub check: String,
}

/// Produces the caller-specific RLS predicate for a table and command.
#[derive(Clone)]
pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    validator: Option<ExpressionValidator>,
}

impl PolicyEngine {
    /// Create an engine reading policies from `store`, with expression
    /// validation enabled.
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            validator: Some(ExpressionValidator::new()),
        }
    }

    /// Enable or disable parse validation of substituted expressions.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validator = enabled.then(ExpressionValidator::new);
        self
    }

    /// The predicate that must hold for `command` on `table`.
    ///
    /// SELECT, UPDATE and DELETE use each policy's USING expression; INSERT
    /// uses its CHECK expression. Returns the empty string when no enabled
    /// policy applies.
    pub async fn effective_condition(
        &self,
        table: &str,
        command: PolicyCommand,
        ctx: &AuthContext,
    ) -> Result<String, RlsError> {
        let conditions = self.conditions(table, command, ctx).await?;
        Ok(match command {
            PolicyCommand::Insert => conditions.check,
            _ => conditions.using,
        })
    }

    /// The predicate new rows must satisfy after `command`.
    ///
    /// Each policy contributes its CHECK expression, falling back to USING.
    pub async fn check_condition(
        &self,
        table: &str,
        command: PolicyCommand,
        ctx: &AuthContext,
    ) -> Result<String, RlsError> {
        Ok(self.conditions(table, command, ctx).await?.check)
    }

    /// Both predicates for `command` from a single policy fetch.
    pub async fn conditions(
        &self,
        table: &str,
        command: PolicyCommand,
        ctx: &AuthContext,
    ) -> Result<PolicyConditions, RlsError> {
        let policies = self.store.policies_for_table(table).await?;
        let applicable: Vec<&RlsPolicy> = policies
            .iter()
            .filter(|p| p.enabled && p.table_name == table && p.command.applies_to(command))
            .collect();

        if applicable.is_empty() {
            tracing::trace!(table, command = %command, "No applicable RLS policies");
            return Ok(PolicyConditions::default());
        }

        let mut using = Vec::new();
        let mut check = Vec::new();
        for policy in &applicable {
            if let Some(expr) = non_blank(policy.using_expr.as_deref()) {
                using.push(self.render(policy, expr, ctx)?);
            }
            let check_expr = non_blank(policy.check_expr.as_deref())
                .or_else(|| non_blank(policy.using_expr.as_deref()));
            if let Some(expr) = check_expr {
                check.push(self.render(policy, expr, ctx)?);
            }
        }

        tracing::debug!(
            table,
            command = %command,
            policies = applicable.len(),
            "Computed RLS conditions"
        );

        Ok(PolicyConditions {
            using: conjoin(using),
            check: conjoin(check),
        })
    }

    fn render(&self, policy: &RlsPolicy, expr: &str, ctx: &AuthContext) -> Result<String, RlsError> {
        let substituted = substitute(expr, ctx)?;
        if let Some(validator) = &self.validator {
            validator
                .validate(&substituted)
                .map_err(|reason| RlsError::InvalidExpression {
                    table: policy.table_name.clone(),
                    policy: policy.policy_name.clone(),
                    reason,
                })?;
        }
        Ok(format!("({})", substituted.trim()))
    }
}

fn non_blank(expr: Option<&str>) -> Option<&str> {
    expr.filter(|e| !e.trim().is_empty())
}

/// Sort and deduplicate so the result does not depend on storage order.
fn conjoin(mut terms: Vec<String>) -> String {
    terms.sort();
    terms.dedup();
    terms.join(" AND ")
}
