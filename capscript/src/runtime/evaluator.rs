//! CapScript interpreter: parses, validates, and evaluates one program.
//!
//! The evaluation contract is the whole point of this runtime: every
//! expression produces an arena id whose dependency set is exactly the ids
//! of the sub-values that went into it, so the merged capability of any
//! value reflects everything that could have influenced it. Tool calls and
//! the quarantined-extraction call are the only places the outside world is
//! reached, and both are gated here.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{
    AssignTarget, BoolOp, CompClause, ComprehensionKind, Conversion, Expr, FStringPart, Literal,
    RecordDecl, SpecPart, Stmt, TypeRef,
};
use crate::config::{InterpreterConfig, RunMode};
use crate::parser;
use crate::runtime::arena::{TaggedValue, ValueArena, ValueId};
use crate::runtime::capability::{Capability, DataSource};
use crate::runtime::data_flow::DataFlowGraph;
use crate::runtime::environment::{Environment, FieldSchema, RecordSchema};
use crate::runtime::error::{CapscriptError, RuntimeResult};
use crate::runtime::execution_outcome::{ExecutionOutcome, ExecutionTrace};
use crate::runtime::quarantine::{
    decode_extracted, ExtractionError, QuarantinedExtractor, EXTRACT_FN,
};
use crate::runtime::security::{PolicyContext, PolicyRegistry};
use crate::runtime::stdlib;
use crate::runtime::tools::{derive_readers, ToolArgs, ToolRegistry};
use crate::runtime::values::Value;
use crate::validator;

/// Mutable state of one execution, created fresh per `execute` call and
/// dropped at its end. Nothing here survives across executions.
struct ExecState {
    arena: ValueArena,
    env: Environment,
    graph: DataFlowGraph,
    trace: ExecutionTrace,
    iterations: usize,
}

impl ExecState {
    fn new() -> Self {
        Self {
            arena: ValueArena::new(),
            env: Environment::new(),
            graph: DataFlowGraph::new(),
            trace: ExecutionTrace::default(),
            iterations: 0,
        }
    }
}

/// The capability-tracking restricted-language interpreter.
///
/// Registries, the extractor, and the configuration are fixed at
/// construction; `execute` is free of cross-call state, so one interpreter
/// can run any number of programs sequentially, and concurrent executions
/// simply use separate instances.
pub struct Interpreter {
    tools: ToolRegistry,
    policies: PolicyRegistry,
    extractor: Arc<dyn QuarantinedExtractor>,
    config: InterpreterConfig,
}

impl Interpreter {
    pub fn new(
        tools: ToolRegistry,
        policies: PolicyRegistry,
        extractor: Arc<dyn QuarantinedExtractor>,
    ) -> Self {
        Self::with_config(tools, policies, extractor, InterpreterConfig::default())
    }

    pub fn with_config(
        tools: ToolRegistry,
        policies: PolicyRegistry,
        extractor: Arc<dyn QuarantinedExtractor>,
        config: InterpreterConfig,
    ) -> Self {
        Self {
            tools,
            policies,
            extractor,
            config,
        }
    }

    /// Parses, validates, and runs a program, returning the final raw value
    /// and the tool-call trace. On any error no further statements execute
    /// and no further tool calls are made.
    pub fn execute(&self, source: &str) -> RuntimeResult<ExecutionOutcome> {
        let program = parser::parse_program(source)?;
        validator::validate(&program)?;

        log::debug!(
            "executing program: {} statements, mode {:?}",
            program.len(),
            self.config.mode
        );

        let mut state = ExecState::new();
        let mut last: Option<ValueId> = None;
        for stmt in &program {
            last = self.exec_stmt(stmt, &mut state)?;
        }

        let result = last
            .map(|id| state.arena.raw(id).clone())
            .unwrap_or(Value::None);
        Ok(ExecutionOutcome {
            result,
            trace: state.trace,
        })
    }

    fn strict(&self) -> bool {
        self.config.mode == RunMode::Strict
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn exec_block(&self, stmts: &[Stmt], state: &mut ExecState) -> RuntimeResult<Option<ValueId>> {
        let mut last = None;
        for stmt in stmts {
            last = self.exec_stmt(stmt, state)?;
        }
        Ok(last)
    }

    fn exec_stmt(&self, stmt: &Stmt, state: &mut ExecState) -> RuntimeResult<Option<ValueId>> {
        match stmt {
            Stmt::Assign { target, value, .. } => {
                let value_id = self.eval_expr(value, state)?;
                self.assign_target(target, value_id, state)?;
                Ok(None)
            }
            Stmt::AugAssign {
                name, op, value, ..
            } => {
                let current = state
                    .env
                    .lookup(name)
                    .ok_or_else(|| CapscriptError::UndefinedVariable { name: name.clone() })?;
                let operand = self.eval_expr(value, state)?;
                let raw = stdlib::binary_op(
                    *op,
                    state.arena.raw(current),
                    state.arena.raw(operand),
                    self.config.max_collection_size,
                )?;
                let result = state.arena.derived(raw, vec![current, operand]);
                self.bind_name(name, result, state);
                Ok(None)
            }
            Stmt::AnnAssign { name, value, .. } => {
                if let Some(value) = value {
                    let value_id = self.eval_expr(value, state)?;
                    self.bind_name(name, value_id, state);
                }
                Ok(None)
            }
            Stmt::Expr { value, .. } => Ok(Some(self.eval_expr(value, state)?)),
            Stmt::If {
                test, body, orelse, ..
            } => {
                let test_id = self.eval_expr(test, state)?;
                let truthy = state.arena.raw(test_id).is_truthy();
                if self.strict() {
                    state.graph.push_control_flow(expr_names(test));
                }
                let result = if truthy {
                    self.exec_block(body, state)
                } else {
                    self.exec_block(orelse, state)
                };
                if self.strict() {
                    state.graph.pop_control_flow();
                }
                result
            }
            Stmt::For {
                target, iter, body, ..
            } => {
                let iter_id = self.eval_expr(iter, state)?;
                let elements = stdlib::iter_elements("for", state.arena.raw(iter_id))?;
                if self.strict() {
                    state.graph.push_control_flow(expr_names(iter));
                }
                let result = self.run_for_body(target, iter_id, elements, body, state);
                if self.strict() {
                    state.graph.pop_control_flow();
                }
                result?;
                Ok(None)
            }
            Stmt::Record(decl) => {
                self.declare_record(decl, state)?;
                Ok(None)
            }
            Stmt::Raise { value, .. } => {
                let Some(value) = value else {
                    return Err(CapscriptError::UnsupportedOperation {
                        message: "bare raise is not supported".to_string(),
                    });
                };
                let value_id = self.eval_expr(value, state)?;
                match state.arena.raw(value_id) {
                    Value::Error(e) => Err(CapscriptError::Raised {
                        message: e.message.clone(),
                        trusted: state.arena.is_trusted(value_id),
                    }),
                    other => Err(CapscriptError::UnsupportedOperation {
                        message: format!("cannot raise a value of type {}", other.type_name()),
                    }),
                }
            }
            Stmt::Pass { .. } => Ok(None),
            Stmt::While { .. }
            | Stmt::Return { .. }
            | Stmt::Break { .. }
            | Stmt::Continue { .. }
            | Stmt::Import { .. }
            | Stmt::FuncDef { .. } => Err(CapscriptError::internal(
                "statement rejected by validation reached the evaluator",
            )),
        }
    }

    fn run_for_body(
        &self,
        target: &str,
        iter_id: ValueId,
        elements: Vec<Value>,
        body: &[Stmt],
        state: &mut ExecState,
    ) -> RuntimeResult<()> {
        for element in elements {
            self.check_iteration(state)?;
            let item = state.arena.inherited(element, vec![iter_id]);
            self.bind_name(target, item, state);
            self.exec_block(body, state)?;
        }
        Ok(())
    }

    fn check_iteration(&self, state: &mut ExecState) -> RuntimeResult<()> {
        state.iterations += 1;
        if state.iterations > self.config.max_iterations {
            return Err(CapscriptError::ResourceLimit {
                what: "loop iterations".to_string(),
                limit: self.config.max_iterations,
            });
        }
        Ok(())
    }

    /// Binds a name, recording data-flow edges. In strict mode inside a
    /// control-flow body the bound value additionally depends on the current
    /// condition variables' values, so a branch taken because of untrusted
    /// data taints everything assigned in it. The incoming id may be shared
    /// with other bindings, so the taint is added on a wrapper value rather
    /// than by mutating the original.
    fn bind_name(&self, name: &str, value: ValueId, state: &mut ExecState) {
        let mut bound = value;
        if self.strict() && state.graph.in_control_flow() {
            let controls = state.graph.control_flow_dependencies();
            let mut deps = vec![value];
            for ctrl in &controls {
                if let Some(ctrl_id) = state.graph.value_of(ctrl) {
                    if ctrl_id != value && !deps.contains(&ctrl_id) {
                        deps.push(ctrl_id);
                    }
                }
            }
            if deps.len() > 1 {
                let raw = state.arena.raw(value).clone();
                bound = state.arena.inherited(raw, deps);
            }
            state.graph.add_variable(name, bound);
            for ctrl in controls {
                state.graph.add_dependency(name, &ctrl);
            }
        } else {
            state.graph.add_variable(name, bound);
        }
        state.env.define(name, bound);
    }

    fn assign_target(
        &self,
        target: &AssignTarget,
        value_id: ValueId,
        state: &mut ExecState,
    ) -> RuntimeResult<()> {
        match target {
            AssignTarget::Name(name) => {
                self.bind_name(name, value_id, state);
                Ok(())
            }
            AssignTarget::Tuple(names) => {
                let elements = match state.arena.raw(value_id) {
                    Value::List(items) | Value::Tuple(items) => items.clone(),
                    other => {
                        return Err(CapscriptError::TypeMismatch {
                            expected: "sequence".to_string(),
                            actual: other.type_name().to_string(),
                            operation: "unpacking".to_string(),
                        })
                    }
                };
                if elements.len() != names.len() {
                    return Err(CapscriptError::UnsupportedOperation {
                        message: format!(
                            "cannot unpack {} values into {} targets",
                            elements.len(),
                            names.len()
                        ),
                    });
                }
                for (name, element) in names.iter().zip(elements) {
                    let item = state.arena.inherited(element, vec![value_id]);
                    self.bind_name(name, item, state);
                }
                Ok(())
            }
            AssignTarget::Subscript { name, index } => {
                let container = state
                    .env
                    .lookup(name)
                    .ok_or_else(|| CapscriptError::UndefinedVariable { name: name.clone() })?;
                let index_id = self.eval_expr(index, state)?;
                let index_raw = state.arena.raw(index_id).clone();
                let assigned = state.arena.raw(value_id).clone();

                match (&mut state.arena.get_mut(container).raw, &index_raw) {
                    (Value::List(items), Value::Int(i)) => {
                        let pos = sequence_index(items.len(), *i)?;
                        items[pos] = assigned;
                    }
                    (Value::Dict(map), key) => {
                        let key = key.dict_key().ok_or_else(|| CapscriptError::TypeMismatch {
                            expected: "hashable key".to_string(),
                            actual: key.type_name().to_string(),
                            operation: "subscript assignment".to_string(),
                        })?;
                        map.insert(key, assigned);
                    }
                    (other, _) => {
                        return Err(CapscriptError::TypeMismatch {
                            expected: "list or dict".to_string(),
                            actual: other.type_name().to_string(),
                            operation: "subscript assignment".to_string(),
                        })
                    }
                }
                // The container now carries whatever flowed into it.
                state.arena.add_dependency(container, value_id);
                state.arena.add_dependency(container, index_id);
                Ok(())
            }
        }
    }

    fn declare_record(&self, decl: &RecordDecl, state: &mut ExecState) -> RuntimeResult<()> {
        let mut fields = Vec::with_capacity(decl.fields.len());
        for field in &decl.fields {
            check_type_exists(&field.ty, &state.env)?;
            let default = match &field.default {
                Some(expr) => {
                    let id = self.eval_expr(expr, state)?;
                    Some(state.arena.raw(id).clone())
                }
                None => None,
            };
            fields.push(FieldSchema {
                name: field.name.clone(),
                ty: field.ty.clone(),
                default,
            });
        }
        state.env.define_schema(RecordSchema {
            name: decl.name.clone(),
            fields,
        });
        let schema_value = state.arena.user_literal(Value::Schema(decl.name.clone()));
        self.bind_name(&decl.name, schema_value, state);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn eval_expr(&self, expr: &Expr, state: &mut ExecState) -> RuntimeResult<ValueId> {
        match expr {
            Expr::Literal(lit) => Ok(state.arena.user_literal(literal_value(lit))),
            Expr::Name { name, .. } => state
                .env
                .lookup(name)
                .ok_or_else(|| CapscriptError::UndefinedVariable { name: name.clone() }),
            Expr::Binary { op, left, right } => {
                let left_id = self.eval_expr(left, state)?;
                let right_id = self.eval_expr(right, state)?;
                let raw = stdlib::binary_op(
                    *op,
                    state.arena.raw(left_id),
                    state.arena.raw(right_id),
                    self.config.max_collection_size,
                )?;
                Ok(state.arena.derived(raw, vec![left_id, right_id]))
            }
            Expr::Unary { op, operand } => {
                let operand_id = self.eval_expr(operand, state)?;
                let raw = stdlib::unary_op(*op, state.arena.raw(operand_id))?;
                Ok(state.arena.derived(raw, vec![operand_id]))
            }
            Expr::Bool { op, values } => self.eval_bool(*op, values, state),
            Expr::Compare {
                left,
                ops,
                comparators,
            } => self.eval_compare(left, ops, comparators, state),
            Expr::Call {
                func, args, kwargs, ..
            } => self.eval_call(func, args, kwargs, state),
            Expr::MethodCall {
                object,
                method,
                args,
                kwargs,
                ..
            } => {
                if !kwargs.is_empty() {
                    return Err(CapscriptError::UnsupportedOperation {
                        message: format!(
                            "keyword arguments are not supported for method '{}'",
                            method
                        ),
                    });
                }
                let object_id = self.eval_expr(object, state)?;
                let mut deps = vec![object_id];
                let mut raw_args = Vec::with_capacity(args.len());
                for arg in args {
                    let id = self.eval_expr(arg, state)?;
                    deps.push(id);
                    raw_args.push(state.arena.raw(id).clone());
                }
                let raw = stdlib::call_method(state.arena.raw(object_id), method, &raw_args)?;
                Ok(state.arena.derived(raw, deps))
            }
            Expr::Attribute { object, name, .. } => {
                let object_id = self.eval_expr(object, state)?;
                let raw = match state.arena.raw(object_id) {
                    Value::Record { schema, fields } => fields.get(name).cloned().ok_or_else(|| {
                        CapscriptError::UnsupportedOperation {
                            message: format!("{} has no field '{}'", schema, name),
                        }
                    })?,
                    Value::Error(e) if name == "message" => Value::Str(e.message.clone()),
                    other => {
                        return Err(CapscriptError::UnsupportedOperation {
                            message: format!(
                                "attribute access is not supported on {}",
                                other.type_name()
                            ),
                        })
                    }
                };
                Ok(state.arena.derived(raw, vec![object_id]))
            }
            Expr::Subscript { object, index, .. } => {
                let object_id = self.eval_expr(object, state)?;
                let index_id = self.eval_expr(index, state)?;
                let raw = subscript(state.arena.raw(object_id), state.arena.raw(index_id))?;
                Ok(state.arena.derived(raw, vec![object_id, index_id]))
            }
            Expr::List(elements) => {
                let (raws, deps) = self.eval_elements(elements, state)?;
                Ok(state.arena.derived(Value::List(raws), deps))
            }
            Expr::Tuple(elements) => {
                let (raws, deps) = self.eval_elements(elements, state)?;
                Ok(state.arena.derived(Value::Tuple(raws), deps))
            }
            Expr::Set(elements) => {
                let (raws, deps) = self.eval_elements(elements, state)?;
                Ok(state.arena.derived(Value::Set(stdlib::dedup(raws)), deps))
            }
            Expr::Dict { keys, values } => {
                let mut map = IndexMap::new();
                let mut deps = Vec::with_capacity(keys.len() * 2);
                for (key_expr, value_expr) in keys.iter().zip(values) {
                    let key_id = self.eval_expr(key_expr, state)?;
                    let key = state.arena.raw(key_id).dict_key().ok_or_else(|| {
                        CapscriptError::TypeMismatch {
                            expected: "hashable key".to_string(),
                            actual: state.arena.raw(key_id).type_name().to_string(),
                            operation: "dict literal".to_string(),
                        }
                    })?;
                    let value_id = self.eval_expr(value_expr, state)?;
                    deps.push(key_id);
                    deps.push(value_id);
                    map.insert(key, state.arena.raw(value_id).clone());
                }
                Ok(state.arena.derived(Value::Dict(map), deps))
            }
            Expr::Ternary { test, body, orelse } => {
                let test_id = self.eval_expr(test, state)?;
                let chosen = if state.arena.raw(test_id).is_truthy() {
                    self.eval_expr(body, state)?
                } else {
                    self.eval_expr(orelse, state)?
                };
                let raw = state.arena.raw(chosen).clone();
                Ok(state.arena.derived(raw, vec![test_id, chosen]))
            }
            Expr::Comprehension {
                kind,
                element,
                value,
                clauses,
                ..
            } => self.eval_comprehension(*kind, element, value.as_deref(), clauses, state),
            Expr::FString { parts, .. } => self.eval_fstring(parts, state),
            Expr::Lambda { .. } => Err(CapscriptError::internal(
                "expression rejected by validation reached the evaluator",
            )),
        }
    }

    fn eval_elements(
        &self,
        elements: &[Expr],
        state: &mut ExecState,
    ) -> RuntimeResult<(Vec<Value>, Vec<ValueId>)> {
        let mut raws = Vec::with_capacity(elements.len());
        let mut deps = Vec::with_capacity(elements.len());
        for element in elements {
            let id = self.eval_expr(element, state)?;
            raws.push(state.arena.raw(id).clone());
            deps.push(id);
        }
        Ok((raws, deps))
    }

    fn eval_bool(
        &self,
        op: BoolOp,
        values: &[Expr],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        let mut deps = Vec::with_capacity(values.len());
        let mut result = match op {
            BoolOp::And => Value::Bool(true),
            BoolOp::Or => Value::Bool(false),
        };
        for value in values {
            let id = self.eval_expr(value, state)?;
            deps.push(id);
            let raw = state.arena.raw(id);
            let truthy = raw.is_truthy();
            result = raw.clone();
            // Short-circuit: remaining operands are never evaluated.
            match op {
                BoolOp::And if !truthy => break,
                BoolOp::Or if truthy => break,
                _ => {}
            }
        }
        Ok(state.arena.derived(result, deps))
    }

    fn eval_compare(
        &self,
        left: &Expr,
        ops: &[crate::ast::CmpOp],
        comparators: &[Expr],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        let left_id = self.eval_expr(left, state)?;
        let mut deps = vec![left_id];
        let mut current = state.arena.raw(left_id).clone();
        let mut result = true;

        for (op, comparator) in ops.iter().zip(comparators) {
            let comparator_id = self.eval_expr(comparator, state)?;
            deps.push(comparator_id);
            let comparator_raw = state.arena.raw(comparator_id).clone();
            if !stdlib::compare_op(*op, &current, &comparator_raw)? {
                result = false;
                break;
            }
            current = comparator_raw;
        }

        Ok(state.arena.derived(Value::Bool(result), deps))
    }

    fn eval_comprehension(
        &self,
        kind: ComprehensionKind,
        element: &Expr,
        value: Option<&Expr>,
        clauses: &[CompClause],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        let [clause] = clauses else {
            return Err(CapscriptError::internal(
                "comprehension rejected by validation reached the evaluator",
            ));
        };
        if kind == ComprehensionKind::Generator {
            return Err(CapscriptError::internal(
                "expression rejected by validation reached the evaluator",
            ));
        }

        let iter_id = self.eval_expr(&clause.iter, state)?;
        let elements = stdlib::iter_elements("comprehension", state.arena.raw(iter_id))?;
        let mut deps = vec![iter_id];
        let mut items: Vec<Value> = Vec::new();
        let mut entries: IndexMap<crate::runtime::values::DictKey, Value> = IndexMap::new();

        for item in elements {
            self.check_iteration(state)?;
            let item_id = state.arena.inherited(item, vec![iter_id]);
            self.bind_name(&clause.target, item_id, state);
            deps.push(item_id);

            let mut keep = true;
            for condition in &clause.ifs {
                let condition_id = self.eval_expr(condition, state)?;
                deps.push(condition_id);
                if !state.arena.raw(condition_id).is_truthy() {
                    keep = false;
                    break;
                }
            }
            if !keep {
                continue;
            }

            let element_id = self.eval_expr(element, state)?;
            deps.push(element_id);
            match (kind, value) {
                (ComprehensionKind::Dict, Some(value_expr)) => {
                    let key = state.arena.raw(element_id).dict_key().ok_or_else(|| {
                        CapscriptError::TypeMismatch {
                            expected: "hashable key".to_string(),
                            actual: state.arena.raw(element_id).type_name().to_string(),
                            operation: "dict comprehension".to_string(),
                        }
                    })?;
                    let value_id = self.eval_expr(value_expr, state)?;
                    deps.push(value_id);
                    entries.insert(key, state.arena.raw(value_id).clone());
                }
                _ => items.push(state.arena.raw(element_id).clone()),
            }
        }

        let raw = match kind {
            ComprehensionKind::List => Value::List(items),
            ComprehensionKind::Set => Value::Set(stdlib::dedup(items)),
            ComprehensionKind::Dict => Value::Dict(entries),
            ComprehensionKind::Generator => unreachable!("rejected above"),
        };
        Ok(state.arena.derived(raw, deps))
    }

    fn eval_fstring(&self, parts: &[FStringPart], state: &mut ExecState) -> RuntimeResult<ValueId> {
        let mut out = String::new();
        let mut deps = Vec::new();

        for part in parts {
            match part {
                FStringPart::Text(text) => out.push_str(text),
                FStringPart::Interp {
                    value,
                    conversion,
                    spec,
                } => {
                    let value_id = self.eval_expr(value, state)?;
                    deps.push(value_id);
                    let raw = state.arena.raw(value_id).clone();

                    let converted: Option<String> = match conversion {
                        Some(Conversion::Str) => Some(raw.display_string()),
                        Some(Conversion::Repr) => Some(raw.repr_string()),
                        Some(Conversion::Ascii) => Some(stdlib::ascii_string(&raw)),
                        None => None,
                    };

                    let spec_text = match spec {
                        Some(spec_parts) => {
                            let mut rendered = String::new();
                            for spec_part in spec_parts {
                                match spec_part {
                                    SpecPart::Text(text) => rendered.push_str(text),
                                    SpecPart::Expr(expr) => {
                                        let spec_id = self.eval_expr(expr, state)?;
                                        deps.push(spec_id);
                                        rendered
                                            .push_str(&state.arena.raw(spec_id).display_string());
                                    }
                                }
                            }
                            Some(rendered)
                        }
                        None => None,
                    };

                    let rendered = match (converted, spec_text) {
                        (Some(text), Some(spec)) => {
                            stdlib::format_value(&Value::Str(text), &spec)?
                        }
                        (Some(text), None) => text,
                        (None, Some(spec)) => stdlib::format_value(&raw, &spec)?,
                        (None, None) => raw.display_string(),
                    };
                    out.push_str(&rendered);
                }
            }
        }

        Ok(state.arena.derived(Value::Str(out), deps))
    }

    // -----------------------------------------------------------------------
    // Call dispatch
    // -----------------------------------------------------------------------

    /// Dispatch priority: the quarantined-extraction call, then registered
    /// tools, then allowlisted builtins, then declared record constructors.
    fn eval_call(
        &self,
        func: &str,
        args: &[Expr],
        kwargs: &[(String, Expr)],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        let mut arg_ids = Vec::with_capacity(args.len());
        for arg in args {
            arg_ids.push(self.eval_expr(arg, state)?);
        }
        let mut kwarg_ids = Vec::with_capacity(kwargs.len());
        for (name, value) in kwargs {
            kwarg_ids.push((name.clone(), self.eval_expr(value, state)?));
        }

        if func == EXTRACT_FN {
            return self.call_extract(&arg_ids, &kwarg_ids, state);
        }
        if self.tools.contains(func) {
            return self.call_tool(func, &arg_ids, &kwarg_ids, state);
        }
        if stdlib::is_builtin(func) {
            if !kwarg_ids.is_empty() {
                return Err(CapscriptError::UnsupportedOperation {
                    message: format!("keyword arguments are not supported for builtin '{}'", func),
                });
            }
            let raws: Vec<Value> = arg_ids
                .iter()
                .map(|&id| state.arena.raw(id).clone())
                .collect();
            let raw = stdlib::call_builtin(func, &raws, self.config.max_collection_size)?;
            return Ok(state.arena.derived(raw, arg_ids));
        }
        if state.env.has_schema(func) {
            return self.construct_record(func, &arg_ids, &kwarg_ids, state);
        }
        // A variable bound to a schema value works as a constructor too.
        if let Some(id) = state.env.lookup(func) {
            if let Value::Schema(name) = state.arena.raw(id) {
                let name = name.clone();
                return self.construct_record(&name, &arg_ids, &kwarg_ids, state);
            }
        }

        Err(CapscriptError::UnknownFunction {
            name: func.to_string(),
        })
    }

    fn construct_record(
        &self,
        schema_name: &str,
        args: &[ValueId],
        kwargs: &[(String, ValueId)],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        let schema = state
            .env
            .schema(schema_name)
            .ok_or_else(|| CapscriptError::UnknownFunction {
                name: schema_name.to_string(),
            })?
            .clone();

        let mut given: IndexMap<String, Value> = IndexMap::new();
        if args.len() > schema.fields.len() {
            return Err(CapscriptError::ArityMismatch {
                function: schema.name.clone(),
                expected: format!("at most {} positional arguments", schema.fields.len()),
                actual: args.len(),
            });
        }
        for (field, &id) in schema.fields.iter().zip(args.iter()) {
            given.insert(field.name.clone(), state.arena.raw(id).clone());
        }
        for (name, id) in kwargs {
            if given.contains_key(name) {
                return Err(CapscriptError::UnsupportedOperation {
                    message: format!("duplicate field '{}' for {}", name, schema.name),
                });
            }
            given.insert(name.clone(), state.arena.raw(*id).clone());
        }

        let raw = schema.build_instance(given, &state.env)?;
        let mut deps: Vec<ValueId> = args.to_vec();
        deps.extend(kwargs.iter().map(|(_, id)| *id));
        Ok(state.arena.derived(raw, deps))
    }

    /// The tool-call gate: bind positionals, run policies, invoke, trace,
    /// re-wrap.
    fn call_tool(
        &self,
        name: &str,
        args: &[ValueId],
        kwargs: &[(String, ValueId)],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        let definition = self
            .tools
            .get(name)
            .ok_or_else(|| CapscriptError::UnknownFunction {
                name: name.to_string(),
            })?;

        // Bind positional arguments to declared parameter names.
        if args.len() > definition.params.len() {
            return Err(CapscriptError::ArityMismatch {
                function: name.to_string(),
                expected: format!("at most {} positional arguments", definition.params.len()),
                actual: args.len(),
            });
        }
        let mut named: BTreeMap<String, ValueId> = BTreeMap::new();
        for (param, &id) in definition.params.iter().zip(args.iter()) {
            named.insert(param.name.clone(), id);
        }
        for (key, id) in kwargs {
            if named.insert(key.clone(), *id).is_some() {
                return Err(CapscriptError::UnsupportedOperation {
                    message: format!("duplicate argument '{}' for tool '{}'", key, name),
                });
            }
        }

        // Every applicable policy sees the accumulated capability of each
        // argument; the first non-allowed decision aborts the call.
        let ctx = PolicyContext::new(&state.arena);
        let decision = self.policies.check_all(name, &named, &ctx);
        if !decision.is_allowed() {
            let requires_confirmation = decision.result
                == crate::runtime::security::PolicyResult::RequiresConfirmation;
            return Err(CapscriptError::PolicyViolation {
                tool: name.to_string(),
                reason: decision
                    .reason
                    .unwrap_or_else(|| "blocked by policy".to_string()),
                requires_confirmation,
                details: decision.details,
            });
        }

        // The tool sees raw values only.
        let mut raw_args = ToolArgs::new();
        for (key, &id) in &named {
            raw_args.insert(key.clone(), state.arena.raw(id).clone());
        }

        log::debug!("calling tool '{}'", name);
        let result = (definition.function)(&raw_args).map_err(|e| {
            CapscriptError::ToolExecution {
                tool: name.to_string(),
                message: e.message,
                trusted: e.trusted,
            }
        })?;

        let args_json = serde_json::Value::Object(
            raw_args
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        );
        state.trace.record(name, args_json, result.to_json());

        let capability = match &definition.annotator {
            Some(annotator) => annotator(&result, &raw_args),
            None => Capability {
                sources: [DataSource::tool(name)].into_iter().collect(),
                readers: derive_readers(&result),
            },
        };
        Ok(state.arena.insert(TaggedValue {
            raw: result,
            capability,
            deps: Vec::new(),
        }))
    }

    /// The quarantined-extraction gate: the result is tainted by the entire
    /// dependency closure of the query, and its own source is never `User`.
    fn call_extract(
        &self,
        args: &[ValueId],
        kwargs: &[(String, ValueId)],
        state: &mut ExecState,
    ) -> RuntimeResult<ValueId> {
        if !kwargs.is_empty() || args.len() != 2 {
            return Err(CapscriptError::ArityMismatch {
                function: EXTRACT_FN.to_string(),
                expected: "2 (query, schema)".to_string(),
                actual: args.len() + kwargs.len(),
            });
        }
        let query_id = args[0];
        let schema_id = args[1];

        let query = match state.arena.raw(query_id) {
            Value::Str(s) => s.clone(),
            other => {
                return Err(CapscriptError::TypeMismatch {
                    expected: "str".to_string(),
                    actual: other.type_name().to_string(),
                    operation: EXTRACT_FN.to_string(),
                })
            }
        };
        let schema_name = match state.arena.raw(schema_id) {
            Value::Schema(name) => name.clone(),
            other => {
                return Err(CapscriptError::TypeMismatch {
                    expected: "schema".to_string(),
                    actual: other.type_name().to_string(),
                    operation: EXTRACT_FN.to_string(),
                })
            }
        };
        let schema = state
            .env
            .schema(&schema_name)
            .ok_or_else(|| CapscriptError::UnknownFunction { name: schema_name })?
            .clone();

        let mut deps: Vec<ValueId> = vec![query_id];
        deps.extend(state.arena.dependency_closure(query_id));

        log::debug!("quarantined extraction into schema '{}'", schema.name);
        let json = self.extractor.extract(&query, &schema).map_err(|e| match e {
            ExtractionError::InsufficientInformation { message } => {
                CapscriptError::InsufficientInformation { message }
            }
            ExtractionError::Failed { message } => CapscriptError::ToolExecution {
                tool: EXTRACT_FN.to_string(),
                message,
                trusted: false,
            },
        })?;
        let raw = decode_extracted(&schema, &state.env, &json)?;

        Ok(state.arena.insert(TaggedValue {
            raw,
            capability: Capability::quarantine(EXTRACT_FN),
            deps,
        }))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(i) => Value::Int(*i),
        Literal::Float(f) => Value::Float(*f),
        Literal::Str(s) => Value::Str(s.clone()),
        Literal::Bool(b) => Value::Bool(*b),
        Literal::None => Value::None,
    }
}

fn sequence_index(len: usize, index: i64) -> RuntimeResult<usize> {
    let adjusted = if index < 0 { index + len as i64 } else { index };
    if adjusted < 0 || adjusted as usize >= len {
        Err(CapscriptError::IndexOutOfBounds { index, length: len })
    } else {
        Ok(adjusted as usize)
    }
}

fn subscript(container: &Value, index: &Value) -> RuntimeResult<Value> {
    match (container, index) {
        (Value::List(items), Value::Int(i)) | (Value::Tuple(items), Value::Int(i)) => {
            Ok(items[sequence_index(items.len(), *i)?].clone())
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            let pos = sequence_index(chars.len(), *i)?;
            Ok(Value::Str(chars[pos].to_string()))
        }
        (Value::Dict(map), key) => {
            let dict_key = key.dict_key().ok_or_else(|| CapscriptError::TypeMismatch {
                expected: "hashable key".to_string(),
                actual: key.type_name().to_string(),
                operation: "subscript".to_string(),
            })?;
            map.get(&dict_key)
                .cloned()
                .ok_or_else(|| CapscriptError::KeyNotFound {
                    key: dict_key.to_string(),
                })
        }
        (Value::Record { schema, fields }, Value::Str(name)) => {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| CapscriptError::UnsupportedOperation {
                    message: format!("{} has no field '{}'", schema, name),
                })
        }
        (other, index) => Err(CapscriptError::TypeMismatch {
            expected: "subscriptable value".to_string(),
            actual: format!("{}[{}]", other.type_name(), index.type_name()),
            operation: "subscript".to_string(),
        }),
    }
}

fn check_type_exists(ty: &TypeRef, env: &Environment) -> RuntimeResult<()> {
    match ty {
        TypeRef::Named(name) => {
            if env.has_schema(name) {
                Ok(())
            } else {
                Err(CapscriptError::UnsupportedOperation {
                    message: format!("unknown type '{}' in record declaration", name),
                })
            }
        }
        TypeRef::List(Some(inner)) => check_type_exists(inner, env),
        _ => Ok(()),
    }
}

/// Variable names referenced anywhere inside an expression (strict-mode
/// control-flow tainting).
fn expr_names(expr: &Expr) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    collect_names(expr, &mut names);
    names
}

fn collect_names(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) | Expr::Lambda { .. } => {}
        Expr::Name { name, .. } => {
            out.insert(name.clone());
        }
        Expr::Binary { left, right, .. } => {
            collect_names(left, out);
            collect_names(right, out);
        }
        Expr::Unary { operand, .. } => collect_names(operand, out),
        Expr::Bool { values, .. } => {
            for value in values {
                collect_names(value, out);
            }
        }
        Expr::Compare {
            left, comparators, ..
        } => {
            collect_names(left, out);
            for comparator in comparators {
                collect_names(comparator, out);
            }
        }
        Expr::Call { func, args, kwargs, .. } => {
            out.insert(func.clone());
            for arg in args {
                collect_names(arg, out);
            }
            for (_, value) in kwargs {
                collect_names(value, out);
            }
        }
        Expr::MethodCall {
            object, args, kwargs, ..
        } => {
            collect_names(object, out);
            for arg in args {
                collect_names(arg, out);
            }
            for (_, value) in kwargs {
                collect_names(value, out);
            }
        }
        Expr::Attribute { object, .. } => collect_names(object, out),
        Expr::Subscript { object, index, .. } => {
            collect_names(object, out);
            collect_names(index, out);
        }
        Expr::List(items) | Expr::Tuple(items) | Expr::Set(items) => {
            for item in items {
                collect_names(item, out);
            }
        }
        Expr::Dict { keys, values } => {
            for key in keys {
                collect_names(key, out);
            }
            for value in values {
                collect_names(value, out);
            }
        }
        Expr::Ternary { test, body, orelse } => {
            collect_names(test, out);
            collect_names(body, out);
            collect_names(orelse, out);
        }
        Expr::Comprehension {
            element,
            value,
            clauses,
            ..
        } => {
            collect_names(element, out);
            if let Some(value) = value {
                collect_names(value, out);
            }
            for clause in clauses {
                collect_names(&clause.iter, out);
                for condition in &clause.ifs {
                    collect_names(condition, out);
                }
                // The loop binding is local to the comprehension.
                out.remove(&clause.target);
            }
        }
        Expr::FString { parts, .. } => {
            for part in parts {
                match part {
                    FStringPart::Text(_) => {}
                    FStringPart::Interp { value, spec, .. } => {
                        collect_names(value, out);
                        if let Some(spec_parts) = spec {
                            for spec_part in spec_parts {
                                if let SpecPart::Expr(expr) = spec_part {
                                    collect_names(expr, out);
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
