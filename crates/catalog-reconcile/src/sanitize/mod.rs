//! DDL sanitization rule registry.
//!
//! A registry of named pure transform functions keyed by object type,
//! composed in declared order. New rules register without touching any
//! dispatch code. The registry is explicitly constructed and injected into
//! the planner rather than living in global state, which keeps initialization
//! deterministic and registries easy to mock in tests.

use std::collections::BTreeMap;

use crate::model::{ObjectKey, ObjectType};
use crate::remap::TargetIdentity;

/// Context passed to every sanitization rule.
#[derive(Debug, Clone)]
pub struct SanitizeContext {
    /// Source identity of the object being remediated.
    pub source: ObjectKey,

    /// Resolved target identity.
    pub target: TargetIdentity,
}

/// A pure DDL transform.
pub type SanitizeFn = fn(&str, &SanitizeContext) -> String;

/// A registered rule with a stable name for diagnostics.
#[derive(Clone)]
pub struct NamedRule {
    /// Rule name.
    pub name: &'static str,
    apply: SanitizeFn,
}

/// Registry of sanitization rules.
///
/// Rules registered for a specific object type run after the rules
/// registered for all types, each group in declared order.
#[derive(Default, Clone)]
pub struct SanitizerRegistry {
    global: Vec<NamedRule>,
    typed: BTreeMap<ObjectType, Vec<NamedRule>>,
}

impl SanitizerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the standard builtin rules registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_global("strip-block-comments", strip_block_comments);
        registry.register_global("strip-bracket-quoting", strip_bracket_quoting);
        registry.register_global("rewrite-target-schema", rewrite_target_schema);
        registry
    }

    /// Register a rule that applies to every object type.
    pub fn register_global(&mut self, name: &'static str, apply: SanitizeFn) {
        self.global.push(NamedRule { name, apply });
    }

    /// Register a rule for one object type.
    pub fn register(&mut self, object_type: ObjectType, name: &'static str, apply: SanitizeFn) {
        self.typed
            .entry(object_type)
            .or_default()
            .push(NamedRule { name, apply });
    }

    /// Apply all matching rules to a DDL string, in declared order.
    pub fn sanitize(&self, object_type: ObjectType, ddl: &str, ctx: &SanitizeContext) -> String {
        let mut out = ddl.to_string();
        for rule in &self.global {
            out = (rule.apply)(&out, ctx);
        }
        if let Some(rules) = self.typed.get(&object_type) {
            for rule in rules {
                out = (rule.apply)(&out, ctx);
            }
        }
        out
    }

    /// Names of the rules that would run for an object type, in order.
    pub fn rule_names(&self, object_type: ObjectType) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.global.iter().map(|r| r.name).collect();
        if let Some(rules) = self.typed.get(&object_type) {
            names.extend(rules.iter().map(|r| r.name));
        }
        names
    }
}

impl std::fmt::Debug for SanitizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SanitizerRegistry")
            .field(
                "global",
                &self.global.iter().map(|r| r.name).collect::<Vec<_>>(),
            )
            .field("typed", &self.typed.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Remove `/* ... */` block comments.
fn strip_block_comments(ddl: &str, _ctx: &SanitizeContext) -> String {
    let mut out = String::with_capacity(ddl.len());
    let mut rest = ddl;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start..].find("*/") {
            Some(end) => rest = &rest[start + end + 2..],
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Replace `[ident]` bracket quoting with bare identifiers.
fn strip_bracket_quoting(ddl: &str, _ctx: &SanitizeContext) -> String {
    ddl.chars().filter(|c| *c != '[' && *c != ']').collect()
}

/// Rewrite qualified references to the source object with its target identity.
fn rewrite_target_schema(ddl: &str, ctx: &SanitizeContext) -> String {
    let source = ctx.source.full_name();
    let target = ctx.target.full_name();
    if source == target {
        return ddl.to_string();
    }
    // Definitions are lowercased by extraction; source keys already are.
    ddl.replace(&source, &target)
}
