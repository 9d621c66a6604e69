//! Security-policy engine gating every tool call.
//!
//! Policies are predicates over (tool name, named arguments, execution
//! state). They never see raw values alone — each argument arrives as a
//! [`ValueId`] whose merged capability (provenance union, reader
//! intersection over the whole dependency closure) is the thing being
//! judged.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::Serialize;

use crate::runtime::arena::{ValueArena, ValueId};
use crate::runtime::values::Value;

/// Outcome class of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyResult {
    Allowed,
    Denied,
    /// Not allowed to proceed automatically; a human-in-the-loop gate
    /// outside this crate may approve it.
    RequiresConfirmation,
}

/// A policy verdict with its reason and optional structured context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    pub result: PolicyResult,
    pub reason: Option<String>,
    pub details: Option<serde_json::Value>,
}

impl PolicyDecision {
    pub fn allowed() -> Self {
        Self {
            result: PolicyResult::Allowed,
            reason: None,
            details: None,
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            result: PolicyResult::Denied,
            reason: Some(reason.into()),
            details: None,
        }
    }

    pub fn requires_confirmation(reason: impl Into<String>) -> Self {
        Self {
            result: PolicyResult::RequiresConfirmation,
            reason: Some(reason.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn is_allowed(&self) -> bool {
        self.result == PolicyResult::Allowed
    }
}

impl fmt::Display for PolicyDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.result {
            PolicyResult::Allowed => write!(f, "allowed"),
            PolicyResult::Denied => write!(f, "denied"),
            PolicyResult::RequiresConfirmation => write!(f, "requires confirmation"),
        }?;
        if let Some(reason) = &self.reason {
            write!(f, ": {}", reason)?;
        }
        Ok(())
    }
}

/// Read-only view of execution state offered to policies.
pub struct PolicyContext<'a> {
    pub arena: &'a ValueArena,
}

impl<'a> PolicyContext<'a> {
    pub fn new(arena: &'a ValueArena) -> Self {
        Self { arena }
    }
}

/// Named arguments of a gated tool call.
pub type PolicyArgs = BTreeMap<String, ValueId>;

/// A predicate gating tool calls.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, tool: &str, args: &PolicyArgs, ctx: &PolicyContext<'_>) -> PolicyDecision;
}

/// True iff nothing untrusted could have influenced the value,
/// transitively: no `Tool` or `Quarantine` source appears anywhere in its
/// merged capability.
pub fn is_trusted(ctx: &PolicyContext<'_>, value: ValueId) -> bool {
    ctx.arena.is_trusted(value)
}

/// True iff the value's merged readers are `Public` or `readers` is a subset
/// of them.
pub fn can_readers_read(
    readers: &BTreeSet<String>,
    ctx: &PolicyContext<'_>,
    value: ValueId,
) -> bool {
    ctx.arena.merged_capability(value).readers.allows_all(readers)
}

/// Interprets a raw value as a set of principals (a string or a sequence of
/// strings).
pub fn principal_set(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    match value {
        Value::Str(s) => {
            out.insert(s.clone());
        }
        Value::List(items) | Value::Tuple(items) | Value::Set(items) => {
            for item in items {
                if let Value::Str(s) = item {
                    out.insert(s.clone());
                }
            }
        }
        _ => {}
    }
    out
}

/// Ordered collection of global and per-tool policies. The first decision
/// that is not `Allowed` wins; with no policies registered, everything is
/// allowed.
#[derive(Default)]
pub struct PolicyRegistry {
    global: Vec<Box<dyn Policy>>,
    per_tool: HashMap<String, Vec<Box<dyn Policy>>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_global(&mut self, policy: Box<dyn Policy>) {
        self.global.push(policy);
    }

    pub fn register_for_tool(&mut self, tool: &str, policy: Box<dyn Policy>) {
        self.per_tool.entry(tool.to_string()).or_default().push(policy);
    }

    /// Global policies followed by the tool's own, in registration order.
    fn applicable<'a>(&'a self, tool: &str) -> impl Iterator<Item = &'a dyn Policy> + 'a {
        self.global
            .iter()
            .chain(self.per_tool.get(tool).into_iter().flatten())
            .map(|policy| &**policy)
    }

    /// Runs every applicable policy, short-circuiting on the first
    /// non-allowed decision.
    pub fn check_all(
        &self,
        tool: &str,
        args: &PolicyArgs,
        ctx: &PolicyContext<'_>,
    ) -> PolicyDecision {
        for policy in self.applicable(tool) {
            let decision = policy.check(tool, args, ctx);
            if !decision.is_allowed() {
                log::debug!(
                    "policy '{}' stopped tool '{}': {}",
                    policy.name(),
                    tool,
                    decision
                );
                return decision;
            }
        }
        PolicyDecision::allowed()
    }
}

impl fmt::Debug for PolicyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyRegistry")
            .field("global", &self.global.len())
            .field("per_tool", &self.per_tool.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Built-in policies
// ---------------------------------------------------------------------------

/// Gate for `send_email`: everyone on the recipient list must be allowed to
/// read the body, subject and attachments. The recipient list itself may be
/// untrusted — what matters is that nothing flows to a principal outside the
/// data's declared readers.
#[derive(Debug, Default)]
pub struct SendEmailPolicy;

impl Policy for SendEmailPolicy {
    fn name(&self) -> &str {
        "send_email"
    }

    fn check(&self, tool: &str, args: &PolicyArgs, ctx: &PolicyContext<'_>) -> PolicyDecision {
        if tool != "send_email" {
            return PolicyDecision::allowed();
        }
        let Some(&recipients) = args.get("recipients") else {
            return PolicyDecision::denied("send_email requires recipients");
        };
        let recipient_set = principal_set(ctx.arena.raw(recipients));
        if recipient_set.is_empty() {
            return PolicyDecision::denied("send_email recipient list is empty");
        }

        for field in ["body", "subject", "attachments"] {
            if let Some(&value) = args.get(field) {
                if !can_readers_read(&recipient_set, ctx, value) {
                    return PolicyDecision::denied(format!(
                        "email {} is not readable by all recipients",
                        field
                    ))
                    .with_details(serde_json::json!({
                        "recipients": recipient_set.iter().collect::<Vec<_>>(),
                        "field": field,
                    }));
                }
            }
        }
        PolicyDecision::allowed()
    }
}

/// Gate for `send_money`: recipient and amount must both be present and
/// derived exclusively from planner-written literals.
#[derive(Debug, Default)]
pub struct SendMoneyPolicy;

impl Policy for SendMoneyPolicy {
    fn name(&self) -> &str {
        "send_money"
    }

    fn check(&self, tool: &str, args: &PolicyArgs, ctx: &PolicyContext<'_>) -> PolicyDecision {
        if tool != "send_money" {
            return PolicyDecision::allowed();
        }
        for field in ["recipient", "amount"] {
            match args.get(field) {
                None => {
                    return PolicyDecision::denied(format!("send_money requires {}", field));
                }
                Some(&value) => {
                    if !is_trusted(ctx, value) {
                        return PolicyDecision::denied(format!(
                            "transfer {} must come from a trusted source",
                            field
                        ));
                    }
                }
            }
        }
        PolicyDecision::allowed()
    }
}

/// Gate for `share_file`: the file content must be readable by everyone it
/// is being shared with.
#[derive(Debug, Default)]
pub struct ShareFilePolicy;

impl Policy for ShareFilePolicy {
    fn name(&self) -> &str {
        "share_file"
    }

    fn check(&self, tool: &str, args: &PolicyArgs, ctx: &PolicyContext<'_>) -> PolicyDecision {
        if tool != "share_file" {
            return PolicyDecision::allowed();
        }
        let Some(&share_with) = args.get("share_with") else {
            return PolicyDecision::allowed();
        };
        let share_set = principal_set(ctx.arena.raw(share_with));
        if share_set.is_empty() {
            return PolicyDecision::denied("share_file target list is empty");
        }
        for field in ["file", "file_id"] {
            if let Some(&value) = args.get(field) {
                if !can_readers_read(&share_set, ctx, value) {
                    return PolicyDecision::denied(
                        "file content is not readable by share recipients",
                    )
                    .with_details(serde_json::json!({
                        "share_with": share_set.iter().collect::<Vec<_>>(),
                    }));
                }
            }
        }
        PolicyDecision::allowed()
    }
}

/// Gate for `create_calendar_event`: every participant must be allowed to
/// read every event field.
#[derive(Debug, Default)]
pub struct CreateCalendarEventPolicy;

impl Policy for CreateCalendarEventPolicy {
    fn name(&self) -> &str {
        "create_calendar_event"
    }

    fn check(&self, tool: &str, args: &PolicyArgs, ctx: &PolicyContext<'_>) -> PolicyDecision {
        if tool != "create_calendar_event" {
            return PolicyDecision::allowed();
        }
        let Some(&participants) = args.get("participants") else {
            return PolicyDecision::allowed();
        };
        let participant_set = principal_set(ctx.arena.raw(participants));
        if participant_set.is_empty() {
            return PolicyDecision::allowed();
        }
        for field in ["title", "description", "location", "start_time", "end_time"] {
            if let Some(&value) = args.get(field) {
                if !can_readers_read(&participant_set, ctx, value) {
                    return PolicyDecision::denied(format!(
                        "{} is not readable by all participants",
                        field
                    ))
                    .with_details(serde_json::json!({
                        "participants": participant_set.iter().collect::<Vec<_>>(),
                    }));
                }
            }
        }
        PolicyDecision::allowed()
    }
}

// ---------------------------------------------------------------------------
// Policy builder
// ---------------------------------------------------------------------------

type Condition = Box<dyn Fn(&PolicyArgs, &PolicyContext<'_>) -> Option<String> + Send + Sync>;

/// Fluent builder for per-tool policies composed from the reusable
/// predicates.
///
/// ```
/// use capscript::runtime::security::PolicyBuilder;
///
/// let policy = PolicyBuilder::new("send_money")
///     .require_trusted(&["recipient", "amount"])
///     .build();
/// ```
pub struct PolicyBuilder {
    tool: String,
    conditions: Vec<Condition>,
}

impl PolicyBuilder {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            conditions: Vec::new(),
        }
    }

    /// Requires the named parameters, when present, to be fully trusted.
    pub fn require_trusted(mut self, params: &[&str]) -> Self {
        let params: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        self.conditions.push(Box::new(move |args, ctx| {
            for name in &params {
                if let Some(&value) = args.get(name) {
                    if !is_trusted(ctx, value) {
                        return Some(format!("{} must come from a trusted source", name));
                    }
                }
            }
            None
        }));
        self
    }

    /// Requires the principals named by `readers_param` to be able to read
    /// each of `data_params`.
    pub fn require_readers_can_read(mut self, readers_param: &str, data_params: &[&str]) -> Self {
        let readers_param = readers_param.to_string();
        let data_params: Vec<String> = data_params.iter().map(|s| s.to_string()).collect();
        self.conditions.push(Box::new(move |args, ctx| {
            let Some(&readers_value) = args.get(&readers_param) else {
                return None;
            };
            let readers = principal_set(ctx.arena.raw(readers_value));
            for param in &data_params {
                if let Some(&value) = args.get(param) {
                    if !can_readers_read(&readers, ctx, value) {
                        return Some(format!("{} is not readable by {}", param, readers_param));
                    }
                }
            }
            None
        }));
        self
    }

    /// Requires that no tool output appears anywhere in the parameters'
    /// dependency closures.
    pub fn require_no_tool_sources(mut self, params: &[&str]) -> Self {
        let params: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        self.conditions.push(Box::new(move |args, ctx| {
            for name in &params {
                if let Some(&value) = args.get(name) {
                    let merged = ctx.arena.merged_capability(value);
                    let tainted = merged.sources.iter().any(|s| {
                        s.kind == crate::runtime::capability::SourceKind::Tool
                    });
                    if tainted {
                        return Some(format!("{} depends on tool output", name));
                    }
                }
            }
            None
        }));
        self
    }

    /// Adds an arbitrary condition returning a denial reason, or `None` to
    /// pass.
    pub fn custom<F>(mut self, condition: F) -> Self
    where
        F: Fn(&PolicyArgs, &PolicyContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn build(self) -> Box<dyn Policy> {
        Box::new(BuiltPolicy {
            name: format!("{}_policy", self.tool),
            tool: self.tool,
            conditions: self.conditions,
        })
    }
}

struct BuiltPolicy {
    name: String,
    tool: String,
    conditions: Vec<Condition>,
}

impl Policy for BuiltPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self, tool: &str, args: &PolicyArgs, ctx: &PolicyContext<'_>) -> PolicyDecision {
        if tool != self.tool {
            return PolicyDecision::allowed();
        }
        for condition in &self.conditions {
            if let Some(reason) = condition(args, ctx) {
                return PolicyDecision::denied(reason);
            }
        }
        PolicyDecision::allowed()
    }
}

/// The default policy set guarding the common exfiltration surfaces.
pub fn default_policies() -> PolicyRegistry {
    let mut registry = PolicyRegistry::new();
    registry.register_for_tool("send_email", Box::new(SendEmailPolicy));
    registry.register_for_tool("send_money", Box::new(SendMoneyPolicy));
    registry.register_for_tool("share_file", Box::new(ShareFilePolicy));
    registry.register_for_tool(
        "create_calendar_event",
        Box::new(CreateCalendarEventPolicy),
    );
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::arena::{TaggedValue, ValueArena};
    use crate::runtime::capability::{Capability, ReaderSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingPolicy {
        decision: PolicyDecision,
        calls: Arc<AtomicUsize>,
    }

    impl Policy for CountingPolicy {
        fn name(&self) -> &str {
            "counting"
        }

        fn check(&self, _: &str, _: &PolicyArgs, _: &PolicyContext<'_>) -> PolicyDecision {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.decision.clone()
        }
    }

    #[test]
    fn first_non_allowed_decision_short_circuits() {
        let deny_calls = Arc::new(AtomicUsize::new(0));
        let allow_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = PolicyRegistry::new();
        registry.register_for_tool(
            "t",
            Box::new(CountingPolicy {
                decision: PolicyDecision::denied("no"),
                calls: deny_calls.clone(),
            }),
        );
        registry.register_for_tool(
            "t",
            Box::new(CountingPolicy {
                decision: PolicyDecision::allowed(),
                calls: allow_calls.clone(),
            }),
        );

        let arena = ValueArena::new();
        let ctx = PolicyContext::new(&arena);
        let decision = registry.check_all("t", &PolicyArgs::new(), &ctx);

        assert_eq!(decision.result, PolicyResult::Denied);
        assert_eq!(deny_calls.load(Ordering::SeqCst), 1);
        assert_eq!(allow_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn empty_registry_allows() {
        let arena = ValueArena::new();
        let ctx = PolicyContext::new(&arena);
        let registry = PolicyRegistry::new();
        assert!(registry.check_all("anything", &PolicyArgs::new(), &ctx).is_allowed());
    }

    #[test]
    fn send_money_requires_trusted_arguments() {
        let mut arena = ValueArena::new();
        let recipient = arena.insert(TaggedValue {
            raw: Value::Str("mallory".into()),
            capability: Capability::from_tool("get_contacts", ReaderSet::Public),
            deps: Vec::new(),
        });
        let amount = arena.user_literal(Value::Float(10.0));
        let mut args = PolicyArgs::new();
        args.insert("recipient".into(), recipient);
        args.insert("amount".into(), amount);

        let ctx = PolicyContext::new(&arena);
        let decision = SendMoneyPolicy.check("send_money", &args, &ctx);
        assert_eq!(decision.result, PolicyResult::Denied);
    }
}
