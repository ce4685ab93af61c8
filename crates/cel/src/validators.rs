//! Post-check AST validators: structural lints that run after type checking
//! and before planning (property V1). Each validator is independent and
//! contributes its own diagnostics; a caller selects which ones to run via
//! [`run_validators`].

use crate::ast::{ExprKind, MapEntry};
use crate::checker::CheckedAst;
use crate::diagnostics::{CelIssue, IssueKind};
use crate::navigable::{NavigableAst, Order};
use crate::source::Location;

/// A single structural check over a checked AST.
pub trait AstValidator {
    fn name(&self) -> &'static str;
    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue>;
}

/// Runs every validator in `validators` and concatenates their issues.
#[must_use]
pub fn run_validators(checked: &CheckedAst, validators: &[Box<dyn AstValidator>]) -> Vec<CelIssue> {
    validators.iter().flat_map(|v| v.validate(checked)).collect()
}

/// Rejects trees deeper than a fixed bound, independent of (and typically
/// tighter than) the parser's recursion-depth limit — useful when checking
/// an AST built by something other than this crate's own parser.
pub struct AstDepthLimit {
    pub max_depth: usize,
}

impl AstValidator for AstDepthLimit {
    fn name(&self) -> &'static str {
        "ast_depth_limit"
    }

    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue> {
        let nav = NavigableAst::new(&checked.ast);
        let height = nav.height();
        if height > self.max_depth {
            vec![CelIssue::warning(
                IssueKind::Syntax,
                Location::UNKNOWN,
                format!("expression tree depth {height} exceeds recommended limit of {}", self.max_depth),
            )]
        } else {
            Vec::new()
        }
    }
}

/// Flags list literals whose elements don't all share one static type (a
/// common source of surprising `dyn`-typed results downstream).
pub struct HomogeneousLiteral;

impl AstValidator for HomogeneousLiteral {
    fn name(&self) -> &'static str {
        "homogeneous_literal"
    }

    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue> {
        let nav = NavigableAst::new(&checked.ast);
        let mut issues = Vec::new();
        for expr in nav.all_nodes(Order::Pre) {
            if let ExprKind::List { elements, .. } = &expr.kind {
                let mut tys = elements.iter().map(|e| checked.type_of(e.id));
                if let Some(first) = tys.next() {
                    if tys.any(|t| t != first) {
                        issues.push(CelIssue::warning(
                            IssueKind::TypeCheck,
                            Location::UNKNOWN,
                            "list literal mixes element types",
                        ));
                    }
                }
            }
        }
        issues
    }
}

/// Validates that `string` arguments to functions named `matches` (or the
/// receiver-style `s.matches(re)`) are syntactically valid regular
/// expressions, wherever they appear as a literal.
pub struct RegexLiteral;

impl AstValidator for RegexLiteral {
    fn name(&self) -> &'static str {
        "regex_literal"
    }

    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue> {
        let nav = NavigableAst::new(&checked.ast);
        let mut issues = Vec::new();
        for expr in nav.all_nodes(Order::Pre) {
            if let ExprKind::Call { function, args, .. } = &expr.kind {
                if &**function == "matches" {
                    if let Some(pattern) = args.last().and_then(literal_string) {
                        if let Err(e) = regex::Regex::new(pattern) {
                            issues.push(CelIssue::error(IssueKind::Syntax, Location::UNKNOWN, format!("invalid regular expression literal: {e}")));
                        }
                    }
                }
            }
        }
        issues
    }
}

/// Validates that `timestamp("...")` literal arguments parse as RFC 3339.
pub struct TimestampLiteral;

impl AstValidator for TimestampLiteral {
    fn name(&self) -> &'static str {
        "timestamp_literal"
    }

    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue> {
        validate_conversion_literal(checked, "timestamp", |s| {
            chrono::DateTime::parse_from_rfc3339(s).map(|_| ()).map_err(|e| e.to_string())
        })
    }
}

/// Validates that `duration("...")` literal arguments parse.
pub struct DurationLiteral;

impl AstValidator for DurationLiteral {
    fn name(&self) -> &'static str {
        "duration_literal"
    }

    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue> {
        validate_conversion_literal(checked, "duration", |s| crate::stdlib::time::parse_duration_literal(s).map(|_| ()))
    }
}

/// Rejects comprehensions nested deeper than `max_nesting`, guarding
/// against pathological evaluation cost before planning commits to it.
pub struct ComprehensionNestingLimit {
    pub max_nesting: usize,
}

impl AstValidator for ComprehensionNestingLimit {
    fn name(&self) -> &'static str {
        "comprehension_nesting_limit"
    }

    fn validate(&self, checked: &CheckedAst) -> Vec<CelIssue> {
        let nav = NavigableAst::new(&checked.ast);
        let mut max_seen = 0usize;
        fn depth(expr: &crate::ast::Expr, current: usize, max_seen: &mut usize) {
            let current = if matches!(expr.kind, ExprKind::Comprehension(_)) { current + 1 } else { current };
            *max_seen = (*max_seen).max(current);
            for child in crate::navigable::children_of(expr) {
                depth(child, current, max_seen);
            }
        }
        depth(nav.root(), 0, &mut max_seen);
        if max_seen > self.max_nesting {
            vec![CelIssue::error(
                IssueKind::Syntax,
                Location::UNKNOWN,
                format!("comprehension nesting depth {max_seen} exceeds limit of {}", self.max_nesting),
            )]
        } else {
            Vec::new()
        }
    }
}

fn literal_string(expr: &crate::ast::Expr) -> Option<&str> {
    match &expr.kind {
        ExprKind::Constant(crate::ast::Constant::String(s)) => Some(s),
        _ => None,
    }
}

fn validate_conversion_literal(checked: &CheckedAst, function: &str, parse: impl Fn(&str) -> Result<(), String>) -> Vec<CelIssue> {
    let nav = NavigableAst::new(&checked.ast);
    let mut issues = Vec::new();
    for expr in nav.all_nodes(Order::Pre) {
        if let ExprKind::Call { target: None, function: f, args } = &expr.kind {
            if &**f == function {
                if let Some(arg) = args.first().and_then(literal_string) {
                    if let Err(e) = parse(arg) {
                        issues.push(CelIssue::error(IssueKind::Syntax, Location::UNKNOWN, format!("invalid {function} literal '{arg}': {e}")));
                    }
                }
            }
        }
    }
    issues
}

#[allow(dead_code)]
fn unused_map_entry_hint(_: &MapEntry) {}

/// The six validators registered by default, matching the standard set most
/// callers opt into.
#[must_use]
pub fn standard_validators(max_depth: usize, max_nesting: usize) -> Vec<Box<dyn AstValidator>> {
    vec![
        Box::new(AstDepthLimit { max_depth }),
        Box::new(HomogeneousLiteral),
        Box::new(RegexLiteral),
        Box::new(TimestampLiteral),
        Box::new(DurationLiteral),
        Box::new(ComprehensionNestingLimit { max_nesting }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;
    use crate::macros::expand_macros;
    use crate::parser::{parse, ParserOptions};
    use crate::source::Source;

    fn check_src(src: &str) -> CheckedAst {
        let env = crate::stdlib::standard_env();
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        let ast = expand_macros(ast, &env).unwrap();
        crate::checker::check(ast, &env).unwrap()
    }

    #[test]
    fn flags_invalid_regex_literal() {
        let checked = check_src("matches('x', '(')");
        let issues = RegexLiteral.validate(&checked);
        assert!(!issues.is_empty());
    }

    #[test]
    fn flags_mixed_type_list_literal() {
        let checked = check_src("[1, 'a']");
        let issues = HomogeneousLiteral.validate(&checked);
        assert!(!issues.is_empty());
    }

    #[test]
    fn accepts_homogeneous_list_literal() {
        let checked = check_src("[1, 2, 3]");
        let issues = HomogeneousLiteral.validate(&checked);
        assert!(issues.is_empty());
    }
}
