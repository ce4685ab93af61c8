//! Tree-walking evaluation over a planned [`Program`].
//!
//! Short-circuit evaluation for `&&`, `||`, and the ternary follows the
//! rules in the external contract exactly (property P3): a `false`
//! left-hand `&&` operand (or `true` `||` operand) short-circuits even if
//! the other operand would error, and vice versa. Everything else evaluates
//! both operands and propagates the first error encountered left to right.

use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::ExprId;
use crate::diagnostics::{EvalError, EvalErrorKind};
use crate::env::{Env, EvalOptions};
use crate::plan::{Dispatch, PlanExpr, PlanNode, Program};
use crate::tracer::{EvalTracer, NoopTracer};
use crate::types::CelType;
use crate::value::{Duration, MapKey, Message, Timestamp, Value};

/// Resolves a variable name to its runtime value. Implementors back
/// `compile`-time variable declarations with whatever storage a host finds
/// convenient; this crate only ships [`MapActivation`].
pub trait Activation {
    fn resolve(&self, name: &str) -> Option<Value>;
}

/// The simplest activation: a flat name → value table.
#[derive(Debug, Clone, Default)]
pub struct MapActivation {
    values: HashMap<String, Value>,
}

impl MapActivation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

impl Activation for MapActivation {
    fn resolve(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
}

/// Layers one late-bound name (a comprehension's loop or accumulator
/// variable) over a parent activation, without copying the parent's table.
struct LateBindings<'a> {
    parent: &'a dyn Activation,
    name: &'a str,
    value: Value,
}

impl Activation for LateBindings<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if name == self.name {
            Some(self.value.clone())
        } else {
            self.parent.resolve(name)
        }
    }
}

/// Two late bindings layered at once — a comprehension's loop variable and
/// accumulator in the same frame.
struct LateBindings2<'a> {
    parent: &'a dyn Activation,
    names: [&'a str; 2],
    values: [Value; 2],
}

impl Activation for LateBindings2<'_> {
    fn resolve(&self, name: &str) -> Option<Value> {
        if name == self.names[0] {
            Some(self.values[0].clone())
        } else if name == self.names[1] {
            Some(self.values[1].clone())
        } else {
            self.parent.resolve(name)
        }
    }
}

/// Bounds the total number of comprehension loop iterations a single
/// evaluation may spend, across every comprehension in the expression —
/// not per comprehension — so a nested pair can't each spend the full
/// budget.
struct IterationBudget {
    remaining: Cell<u64>,
}

impl IterationBudget {
    fn new(limit: Option<u64>) -> Self {
        Self { remaining: Cell::new(limit.unwrap_or(u64::MAX)) }
    }

    fn consume(&self, node_id: ExprId) -> Result<(), EvalError> {
        let remaining = self.remaining.get();
        if remaining == 0 {
            return Err(EvalError::new(EvalErrorKind::IterationBudgetExceeded, node_id, "comprehension iteration budget exceeded"));
        }
        self.remaining.set(remaining - 1);
        Ok(())
    }
}

/// Evaluates a [`Program`] against an [`Activation`], consulting `env` for
/// function overloads and native implementations.
pub struct Interpreter<'a> {
    pub env: &'a Env,
    pub options: &'a EvalOptions,
    pub tracer: &'a dyn EvalTracer,
}

impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(env: &'a Env, options: &'a EvalOptions) -> Self {
        Self { env, options, tracer: &NoopTracer }
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: &'a dyn EvalTracer) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn eval(&self, program: &Program, activation: &dyn Activation) -> Result<Value, EvalError> {
        let budget = IterationBudget::new(self.options.comprehension_max_iterations);
        self.eval_expr(&program.root, activation, &budget)
    }

    fn eval_expr(&self, plan: &PlanExpr, activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        self.tracer.on_enter(plan.id);
        let result = self.eval_node(plan, activation, budget);
        self.tracer.on_exit(plan.id);
        result.map_err(|e| if e.node_id.is_none() { e.with_node_id(plan.id) } else { e })
    }

    fn eval_node(&self, plan: &PlanExpr, activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        match &plan.node {
            PlanNode::Constant(v) => Ok(v.clone()),
            PlanNode::Ident(name) => activation
                .resolve(name)
                .or_else(|| self.env.variables.contains_key(name.as_ref()).then_some(Value::Null))
                .ok_or_else(|| EvalError::new(EvalErrorKind::NoSuchField, plan.id, format!("unbound variable '{name}'"))),
            PlanNode::Select { operand, field, test_only, field_type } => {
                self.eval_select(plan.id, operand, field, *test_only, field_type, activation, budget)
            }
            PlanNode::Call { target, function, args, dispatch } => self.eval_call(plan.id, target.as_deref(), function, args, *dispatch, activation, budget),
            PlanNode::List { elements, optional_indices } => self.eval_list(elements, optional_indices, activation, budget),
            PlanNode::Map(entries) => self.eval_map(entries, activation, budget),
            PlanNode::Struct { message_name, entries } => self.eval_struct(message_name, entries, activation, budget),
            PlanNode::Comprehension(c) => self.eval_comprehension(plan.id, c, activation, budget),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_select(
        &self,
        id: ExprId,
        operand: &PlanExpr,
        field: &str,
        test_only: bool,
        field_type: &CelType,
        activation: &dyn Activation,
        budget: &IterationBudget,
    ) -> Result<Value, EvalError> {
        let base = self.eval_expr(operand, activation, budget)?;
        if test_only {
            return Ok(Value::Bool(match &base {
                Value::Message(msg) => msg.fields.contains_key(field),
                Value::Map(m) => m.contains_key(&MapKey::String(Rc::from(field))),
                _ => return Err(EvalError::new(EvalErrorKind::TypeError, id, "has() requires a message or map operand")),
            }));
        }
        match &base {
            Value::Message(msg) => Ok(msg.fields.get(field).cloned().unwrap_or_else(|| self.zero_value(field_type))),
            Value::Map(m) => m.get(&MapKey::String(Rc::from(field))).cloned().ok_or_else(|| EvalError::new(EvalErrorKind::NoSuchKey, id, format!("no such key '{field}'"))),
            other => Err(EvalError::new(EvalErrorKind::TypeError, id, format!("'{}' does not support field selection", other.type_of()))),
        }
    }

    /// The typed zero value for a missing message field (the external
    /// contract's field-presence rule: a missing field yields its declared
    /// type's default rather than an error). Nested message fields recurse
    /// against `self.env.message_types` the same way a protobuf default
    /// instance would.
    fn zero_value(&self, ty: &CelType) -> Value {
        match ty {
            CelType::Null | CelType::Dyn | CelType::Error | CelType::TypeOf(_) | CelType::Param(_) => Value::Null,
            CelType::Bool => Value::Bool(false),
            CelType::Int => Value::Int(0),
            CelType::UInt => Value::UInt(0),
            CelType::Double => Value::Double(0.0),
            CelType::String => Value::String(Rc::from("")),
            CelType::Bytes => Value::Bytes(Rc::from(Vec::new())),
            CelType::Timestamp => Value::Timestamp(Timestamp { seconds: 0, nanos: 0 }),
            CelType::Duration => Value::Duration(Duration { nanos: 0 }),
            CelType::List(_) => Value::list(Vec::new()),
            CelType::Map(..) => Value::map(IndexMap::new()),
            CelType::Optional(_) => Value::optional_none(),
            CelType::Message(name) => {
                let fields = self
                    .env
                    .message_types
                    .get(name)
                    .map(|msg| msg.fields.iter().map(|(f, fty)| (f.clone(), self.zero_value(fty))).collect())
                    .unwrap_or_default();
                Value::Message(Rc::new(Message { type_name: name.clone(), fields: Rc::new(fields) }))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn eval_call(
        &self,
        id: ExprId,
        target: Option<&PlanExpr>,
        function: &str,
        args: &[PlanExpr],
        _dispatch: Dispatch,
        activation: &dyn Activation,
        budget: &IterationBudget,
    ) -> Result<Value, EvalError> {
        if target.is_none() {
            match function {
                f if f == crate::parser::ops::AND => return self.eval_and(id, args, activation, budget),
                f if f == crate::parser::ops::OR => return self.eval_or(id, args, activation, budget),
                f if f == crate::parser::ops::TERNARY => return self.eval_ternary(id, args, activation, budget),
                _ => {}
            }
        }

        let mut values = Vec::with_capacity(args.len() + usize::from(target.is_some()));
        if let Some(t) = target {
            values.push(self.eval_expr(t, activation, budget)?);
        }
        for a in args {
            values.push(self.eval_expr(a, activation, budget)?);
        }

        let native = self
            .env
            .natives
            .get(function)
            .ok_or_else(|| EvalError::new(EvalErrorKind::NoMatchingOverload, id, format!("no native implementation registered for '{function}'")))?;
        native(&values).map_err(|e| e.with_node_id(id))
    }

    fn eval_and(&self, id: ExprId, args: &[PlanExpr], activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        let lhs = self.eval_expr(&args[0], activation, budget);
        if let Ok(Value::Bool(false)) = lhs {
            self.tracer.on_short_circuit(id);
            return Ok(Value::Bool(false));
        }
        let rhs = self.eval_expr(&args[1], activation, budget);
        if let Ok(Value::Bool(false)) = rhs {
            self.tracer.on_short_circuit(id);
            return Ok(Value::Bool(false));
        }
        match (lhs?, rhs?) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a && b)),
            (a, b) => Err(EvalError::new(EvalErrorKind::TypeError, id, format!("'&&' requires bool operands, found '{}' and '{}'", a.type_of(), b.type_of()))),
        }
    }

    fn eval_or(&self, id: ExprId, args: &[PlanExpr], activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        let lhs = self.eval_expr(&args[0], activation, budget);
        if let Ok(Value::Bool(true)) = lhs {
            self.tracer.on_short_circuit(id);
            return Ok(Value::Bool(true));
        }
        let rhs = self.eval_expr(&args[1], activation, budget);
        if let Ok(Value::Bool(true)) = rhs {
            self.tracer.on_short_circuit(id);
            return Ok(Value::Bool(true));
        }
        match (lhs?, rhs?) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(a || b)),
            (a, b) => Err(EvalError::new(EvalErrorKind::TypeError, id, format!("'||' requires bool operands, found '{}' and '{}'", a.type_of(), b.type_of()))),
        }
    }

    fn eval_ternary(&self, id: ExprId, args: &[PlanExpr], activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        match self.eval_expr(&args[0], activation, budget)? {
            Value::Bool(true) => self.eval_expr(&args[1], activation, budget),
            Value::Bool(false) => self.eval_expr(&args[2], activation, budget),
            other => Err(EvalError::new(EvalErrorKind::TypeError, id, format!("ternary condition must be bool, found '{}'", other.type_of()))),
        }
    }

    fn eval_list(&self, elements: &[PlanExpr], optional_indices: &[u32], activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        let mut out = Vec::with_capacity(elements.len());
        for (i, e) in elements.iter().enumerate() {
            let v = self.eval_expr(e, activation, budget)?;
            if optional_indices.contains(&u32::try_from(i).unwrap_or(u32::MAX)) {
                match v {
                    Value::Optional(Some(inner)) => out.push((*inner).clone()),
                    Value::Optional(None) => {}
                    other => out.push(other),
                }
            } else {
                out.push(v);
            }
        }
        Ok(Value::list(out))
    }

    fn eval_map(&self, entries: &[crate::plan::PlanMapEntry], activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        let mut out = IndexMap::new();
        for entry in entries {
            let key_val = self.eval_expr(&entry.key, activation, budget)?;
            let value_val = self.eval_expr(&entry.value, activation, budget)?;
            if entry.optional {
                match value_val {
                    Value::Optional(Some(inner)) => {
                        let key = MapKey::from_value(&key_val).ok_or_else(|| EvalError::new(EvalErrorKind::TypeError, entry.key.id, "map key must be bool, int, uint, or string"))?;
                        out.insert(key, (*inner).clone());
                    }
                    Value::Optional(None) => {}
                    other => {
                        let key = MapKey::from_value(&key_val).ok_or_else(|| EvalError::new(EvalErrorKind::TypeError, entry.key.id, "map key must be bool, int, uint, or string"))?;
                        out.insert(key, other);
                    }
                }
            } else {
                let key = MapKey::from_value(&key_val).ok_or_else(|| EvalError::new(EvalErrorKind::TypeError, entry.key.id, "map key must be bool, int, uint, or string"))?;
                out.insert(key, value_val);
            }
        }
        Ok(Value::map(out))
    }

    fn eval_struct(&self, message_name: &str, entries: &[crate::plan::PlanStructEntry], activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        let mut fields = IndexMap::new();
        for entry in entries {
            let v = self.eval_expr(&entry.value, activation, budget)?;
            if entry.optional {
                match v {
                    Value::Optional(Some(inner)) => {
                        fields.insert(entry.field.clone(), (*inner).clone());
                    }
                    Value::Optional(None) => {}
                    other => {
                        fields.insert(entry.field.clone(), other);
                    }
                }
            } else {
                fields.insert(entry.field.clone(), v);
            }
        }
        Ok(Value::Message(Rc::new(Message { type_name: Rc::from(message_name), fields: Rc::new(fields) })))
    }

    fn eval_comprehension(&self, id: ExprId, c: &crate::plan::PlanComprehension, activation: &dyn Activation, budget: &IterationBudget) -> Result<Value, EvalError> {
        let range = self.eval_expr(&c.iter_range, activation, budget)?;
        let items: Vec<Value> = match &range {
            Value::List(items) => (**items).clone(),
            Value::Map(m) => m.keys().map(MapKey::to_value).collect(),
            other => return Err(EvalError::new(EvalErrorKind::TypeError, id, format!("comprehension range must be a list or map, found '{}'", other.type_of()))),
        };

        let mut accu = self.eval_expr(&c.accu_init, activation, budget)?;
        for item in items {
            budget.consume(id)?;
            let frame = LateBindings2 { parent: activation, names: [&c.iter_var, &c.accu_var], values: [item, accu.clone()] };
            match self.eval_expr(&c.loop_condition, &frame, budget)? {
                Value::Bool(false) => break,
                Value::Bool(true) => {}
                other => return Err(EvalError::new(EvalErrorKind::TypeError, id, format!("comprehension loop condition must be bool, found '{}'", other.type_of()))),
            }
            accu = self.eval_expr(&c.loop_step, &frame, budget)?;
        }

        let frame = LateBindings { parent: activation, name: &c.accu_var, value: accu };
        self.eval_expr(&c.result, &frame, budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::check;
    use crate::macros::expand_macros;
    use crate::parser::{parse, ParserOptions};
    use crate::plan::plan;
    use crate::source::Source;
    use crate::stdlib::standard_env;

    fn eval_src(src: &str, env: &Env, activation: &dyn Activation) -> Result<Value, EvalError> {
        let ast = parse(&Source::new(src, "<input>"), &ParserOptions::default()).unwrap();
        let ast = expand_macros(ast, env).unwrap();
        let checked = check(ast, env).unwrap();
        let program = plan(&checked);
        let interp = Interpreter::new(env, &env.options.eval);
        interp.eval(&program, activation)
    }

    #[test]
    fn evaluates_arithmetic() {
        let env = standard_env();
        let result = eval_src("1 + 2 * 3", &env, &MapActivation::new()).unwrap();
        assert_eq!(result, Value::Int(7));
    }

    #[test]
    fn and_short_circuits_on_false_even_if_other_side_errors() {
        let env = standard_env();
        let result = eval_src("false && (1 / 0 > 0)", &env, &MapActivation::new()).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn or_short_circuits_on_true_even_if_other_side_errors() {
        let env = standard_env();
        let result = eval_src("true || (1 / 0 > 0)", &env, &MapActivation::new()).unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[test]
    fn division_by_zero_is_a_typed_eval_error() {
        let env = standard_env();
        let err = eval_src("1 / 0", &env, &MapActivation::new()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::DivideByZero);
    }

    #[test]
    fn macro_all_short_circuits_on_first_false() {
        let env = standard_env();
        let result = eval_src("[1, -1, 1].all(x, x > 0)", &env, &MapActivation::new()).unwrap();
        assert_eq!(result, Value::Bool(false));
    }

    #[test]
    fn missing_message_field_yields_declared_type_zero_value() {
        let mut env = standard_env();
        let mut fields = IndexMap::new();
        fields.insert(Rc::from("x"), CelType::Int);
        fields.insert(Rc::from("y"), CelType::Int);
        env.declare_message_type("Point", crate::env::MessageType { fields });
        env.declare_variable("p", CelType::Message(Rc::from("Point")));

        let mut present_fields = IndexMap::new();
        present_fields.insert(Rc::from("x"), Value::Int(1));
        let point = Value::Message(Rc::new(Message { type_name: Rc::from("Point"), fields: Rc::new(present_fields) }));
        let activation = MapActivation::new().with("p", point);

        let result = eval_src("p.y", &env, &activation).unwrap();
        assert_eq!(result, Value::Int(0));
    }

    #[test]
    fn comprehension_respects_iteration_budget() {
        let mut env = standard_env();
        env.options.eval.comprehension_max_iterations = Some(1);
        let err = eval_src("[1, 2, 3].all(x, x > 0)", &env, &MapActivation::new()).unwrap_err();
        assert_eq!(err.kind, EvalErrorKind::IterationBudgetExceeded);
    }
}
