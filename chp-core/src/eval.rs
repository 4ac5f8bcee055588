//! The expression evaluator: `eval_expr` (by value) and `reval_expr`/lvalue
//! writes, with range checking on outbound writes.
//!
//! The original evaluates over an explicit operand stack so a probe wait
//! can suspend mid-expression without recursing through the host's call
//! stack. Host recursion plus an early-return `EvalResult::Suspend` variant
//! gives the same suspend points — an expression evaluation that reaches an
//! unresolved probe or a held wire — without hand-rolling a stack machine.

use crate::ast::{BinOp, CommKind, Expr, ExprKind, PortRef, UnOp};
use crate::error::{CoreError, CoreResult};
use crate::ids::{VarIdx, WireId};
use crate::interference::{self, Access, PathElem};
use crate::value::Value;
use crate::wire::WireNetwork;
use std::rc::Rc;

/// Either a fully-evaluated value, or a suspension on an unresolved probe
/// wire.
pub enum EvalResult {
    Value(Value),
    Suspend(WireId),
}

pub struct EvalCtx<'a> {
    pub variables: &'a mut Vec<Value>,
    pub meta_params: &'a [Value],
    pub wires: &'a mut WireNetwork,
    pub interference: Option<&'a mut interference::SlotTable>,
    pub frame: crate::ids::ControlId,
    /// The current control-state's replicator-value stack: comma-replicated
    /// branches bind their replicator variable here rather than in the
    /// shared process variable array, so concurrent branches never alias
    /// the same slot. Checked innermost (last pushed) first.
    pub replicator_stack: &'a [(VarIdx, i64)],
    /// When set, conditions normally reported with `tracing::warn!` and
    /// otherwise tolerated (reads of an unassigned variable, an unknown
    /// assignment RHS) instead raise `CoreError::Warning` and abort the run.
    pub warnings_as_errors: bool,
}

impl<'a> EvalCtx<'a> {
    fn observe(&mut self, var: VarIdx, path: Vec<PathElem>, access: Access, name: &str) -> CoreResult<()> {
        if let Some(table) = self.interference.as_deref_mut() {
            interference::observe(table, self.frame, (var, path), access, name)?;
        }
        Ok(())
    }

    fn replicator_value(&self, var: VarIdx) -> Option<i64> {
        self.replicator_stack.iter().rev().find(|(v, _)| *v == var).map(|(_, i)| *i)
    }

    /// Reports a non-fatal condition: logs it, or raises `CoreError::Warning`
    /// if `warnings_as_errors` is set.
    pub fn warn_or_raise(&self, message: impl Into<String>) -> CoreResult<()> {
        let message = message.into();
        if self.warnings_as_errors {
            Err(CoreError::Warning(message))
        } else {
            tracing::warn!("{message}");
            Ok(())
        }
    }
}

/// `eval_expr`: evaluates by value.
pub fn eval_expr(ctx: &mut EvalCtx, expr: &Expr) -> CoreResult<EvalResult> {
    match &expr.kind {
        ExprKind::Lit(v) => Ok(EvalResult::Value(v.clone())),
        ExprKind::Var(idx) => {
            if let Some(i) = ctx.replicator_value(*idx) {
                return Ok(EvalResult::Value(Value::MachineInt(i)));
            }
            ctx.observe(*idx, vec![], Access::Read, "var")?;
            let v = ctx
                .variables
                .get(idx.0 as usize)
                .cloned()
                .ok_or_else(|| CoreError::Instantiation("variable index out of range".into()))?;
            if v.is_unassigned() {
                ctx.warn_or_raise(format!("read of unassigned value (var {})", idx.0))?;
            }
            Ok(EvalResult::Value(v))
        }
        ExprKind::MetaParam(idx) => Ok(EvalResult::Value(
            ctx.meta_params.get(idx.0 as usize).cloned().unwrap_or(Value::Unassigned),
        )),
        ExprKind::Unary(op, inner) => {
            let v = require_value(ctx, inner)?;
            Ok(EvalResult::Value(eval_unary(*op, v)?))
        }
        ExprKind::Binary(op, l, r) => {
            let lv = require_value(ctx, l)?;
            let rv = require_value(ctx, r)?;
            Ok(EvalResult::Value(eval_binary(*op, &lv, &rv)?))
        }
        ExprKind::Index(base, index) => {
            let idx_v = require_value(ctx, index)?;
            let index = as_i64(&idx_v)?;
            eval_index(ctx, base, index)
        }
        ExprKind::Slice(base, lo, hi) => {
            let lo_v = as_i64(&require_value(ctx, lo)?)?;
            let hi_v = as_i64(&require_value(ctx, hi)?)?;
            eval_slice(ctx, base, lo_v, hi_v)
        }
        ExprKind::Field(base, field) => eval_field(ctx, base, field),
        ExprKind::UnionTag(tag, payload) => {
            let p = require_value(ctx, payload)?;
            Ok(EvalResult::Value(Value::Union { tag: Rc::from(tag.as_ref()), payload: Rc::new(p) }))
        }
        ExprKind::Probe(port) => eval_probe(ctx, *port, false),
        ExprKind::ProbeZero(port) => eval_probe(ctx, *port, true),
        ExprKind::Replicated { op, var, lo, hi, body } => eval_replicated(ctx, *op, *var, lo, hi, body),
    }
}

fn require_value(ctx: &mut EvalCtx, expr: &Expr) -> CoreResult<Value> {
    match eval_expr(ctx, expr)? {
        EvalResult::Value(v) => Ok(v),
        EvalResult::Suspend(_) => Err(CoreError::Instantiation("suspend outside statement context".into())),
    }
}

fn as_i64(v: &Value) -> CoreResult<i64> {
    match v {
        Value::MachineInt(i) => Ok(*i),
        Value::BigInt(b) => b.to_i64().ok_or(CoreError::Resource("index too large".into())),
        _ => Err(CoreError::RangeError { value: "non-integer".into(), lo: "int".into(), hi: "int".into() }),
    }
}

fn eval_unary(op: UnOp, v: Value) -> CoreResult<Value> {
    match op {
        UnOp::Not => match v {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            _ => Err(CoreError::RangeError { value: "non-bool".into(), lo: "bool".into(), hi: "bool".into() }),
        },
        UnOp::Neg => Value::MachineInt(0).int_sub(&v),
    }
}

fn eval_binary(op: BinOp, l: &Value, r: &Value) -> CoreResult<Value> {
    use BinOp::*;
    match op {
        Add => l.int_add(r),
        Sub => l.int_sub(r),
        Mul => l.int_mul(r),
        DivFloor => l.int_div_trunc(r),
        ModFloor => l.int_mod_floor(r),
        RemTrunc => l.int_rem_trunc(r),
        Exp => l.int_exp(r),
        And => Ok(Value::Bool(l.as_bool().unwrap_or(false) && r.as_bool().unwrap_or(false))),
        Or => Ok(Value::Bool(l.as_bool().unwrap_or(false) || r.as_bool().unwrap_or(false))),
        Xor => Ok(Value::Bool(l.as_bool().unwrap_or(false) ^ r.as_bool().unwrap_or(false))),
        Eq => Ok(Value::Bool(l.equal(r))),
        Neq => Ok(Value::Bool(!l.equal(r))),
        Lt => Ok(Value::Bool(l.int_cmp(r)? == std::cmp::Ordering::Less)),
        Le => Ok(Value::Bool(l.int_cmp(r)? != std::cmp::Ordering::Greater)),
        Gt => Ok(Value::Bool(l.int_cmp(r)? == std::cmp::Ordering::Greater)),
        Ge => Ok(Value::Bool(l.int_cmp(r)? != std::cmp::Ordering::Less)),
    }
}

/// Evaluates `base` for an aggregate access. Mirrors the `ExprKind::Var`
/// arm of `eval_expr` but skips its whole-variable interference
/// observation, since the caller observes at the qualified sub-path of the
/// actual index/slice/field instead; returns the source `VarIdx` so the
/// caller can do so.
fn eval_base_value(ctx: &mut EvalCtx, base: &Expr) -> CoreResult<(Value, Option<VarIdx>)> {
    if let ExprKind::Var(idx) = &base.kind {
        if let Some(i) = ctx.replicator_value(*idx) {
            return Ok((Value::MachineInt(i), None));
        }
        let v = ctx
            .variables
            .get(idx.0 as usize)
            .cloned()
            .ok_or_else(|| CoreError::Instantiation("variable index out of range".into()))?;
        if v.is_unassigned() {
            ctx.warn_or_raise(format!("read of unassigned value (var {})", idx.0))?;
        }
        Ok((v, Some(*idx)))
    } else {
        Ok((require_value(ctx, base)?, None))
    }
}

/// Array subscript / integer bit index / port-element promotion.
fn eval_index(ctx: &mut EvalCtx, base: &Expr, index: i64) -> CoreResult<EvalResult> {
    let (base_v, base_var) = eval_base_value(ctx, base)?;
    if let (Value::Port(p), crate::ast::Type::Port(inner)) = (&base_v, &base.ty) {
        // Port-slicing on an integer-typed port promotes the port to an
        // array-of-bit-ports: the element at `index` is itself a port,
        // resolved later against the same handshake, not a bit value.
        if !matches!(inner.as_ref(), crate::ast::Type::Int { .. }) {
            return Err(CoreError::Instantiation("index on non-integer port".into()));
        }
        if let Some(idx) = base_var {
            ctx.observe(idx, vec![PathElem::Bit(index.max(0) as u32)], Access::Read, "var")?;
        }
        let promoted = p.promote(crate::value::PortDecomp::Bit(index));
        return Ok(EvalResult::Value(Value::Port(Rc::new(promoted))));
    }
    let elem = match (&base_v, &base.ty) {
        (Value::Array(_), crate::ast::Type::Array { .. }) => PathElem::Index(index),
        _ => PathElem::Bit(index.max(0) as u32),
    };
    if let Some(idx) = base_var {
        ctx.observe(idx, vec![elem], Access::Read, "var")?;
    }
    match (&base_v, &base.ty) {
        (Value::Array(items), crate::ast::Type::Array { lo, hi, .. }) => {
            if index < *lo || index > *hi {
                return Err(CoreError::IndexOutOfBounds { index });
            }
            let offset = (index - lo) as usize;
            Ok(EvalResult::Value(items.get(offset).cloned().unwrap_or(Value::Unassigned)))
        }
        (v, _) if matches!(v, Value::MachineInt(_) | Value::BigInt(_)) => {
            if index < 0 {
                return Err(CoreError::IndexOutOfBounds { index });
            }
            Ok(EvalResult::Value(Value::Bool(v.int_bit(index as u32)?)))
        }
        _ => Err(CoreError::IndexOutOfBounds { index }),
    }
}

/// `x[l..h]` bit-slice, array sub-range, or port-slice promotion.
fn eval_slice(ctx: &mut EvalCtx, base: &Expr, lo: i64, hi: i64) -> CoreResult<EvalResult> {
    let (base_v, base_var) = eval_base_value(ctx, base)?;
    if let (Value::Port(p), crate::ast::Type::Port(inner)) = (&base_v, &base.ty) {
        if !matches!(inner.as_ref(), crate::ast::Type::Int { .. }) {
            return Err(CoreError::Instantiation("slice on non-integer port".into()));
        }
        if let Some(idx) = base_var {
            ctx.observe(idx, vec![PathElem::Slice(lo, hi)], Access::Read, "var")?;
        }
        let promoted = p.promote(crate::value::PortDecomp::Slice(lo, hi));
        return Ok(EvalResult::Value(Value::Port(Rc::new(promoted))));
    }
    if let Some(idx) = base_var {
        ctx.observe(idx, vec![PathElem::Slice(lo, hi)], Access::Read, "var")?;
    }
    match &base_v {
        Value::Array(items) => {
            if let crate::ast::Type::Array { lo: alo, .. } = &base.ty {
                let start = (lo - alo).max(0) as usize;
                let end = ((hi - alo) + 1).max(0) as usize;
                let slice = items.get(start..end.min(items.len())).unwrap_or(&[]).to_vec();
                Ok(EvalResult::Value(Value::Array(Rc::new(slice))))
            } else {
                Err(CoreError::IndexOutOfBounds { index: lo })
            }
        }
        _ => {
            if lo < 0 || hi < lo {
                return Err(CoreError::IndexOutOfBounds { index: lo });
            }
            let mut acc = Value::MachineInt(0);
            for bit in (lo..=hi).rev() {
                let b = base_v.int_bit(bit as u32)?;
                acc = acc.int_mul(&Value::MachineInt(2))?;
                if b {
                    acc = acc.int_add(&Value::MachineInt(1))?;
                }
            }
            Ok(EvalResult::Value(acc))
        }
    }
}

/// Record field access, or record-of-ports promotion when `base` is a port.
fn eval_field(ctx: &mut EvalCtx, base: &Expr, field: &str) -> CoreResult<EvalResult> {
    let (base_v, base_var) = eval_base_value(ctx, base)?;
    if let Value::Port(p) = &base_v {
        // Record field access on a port triggers port-promotion to a
        // record-of-ports: `field` names a sub-port over the same
        // handshake rather than a value read out of it directly.
        if let Some(idx) = base_var {
            ctx.observe(idx, vec![PathElem::Field(Box::from(field))], Access::Read, "var")?;
        }
        let promoted = p.promote(crate::value::PortDecomp::Field(Rc::from(field)));
        return Ok(EvalResult::Value(Value::Port(Rc::new(promoted))));
    }
    if let Some(idx) = base_var {
        ctx.observe(idx, vec![PathElem::Field(Box::from(field))], Access::Read, "var")?;
    }
    match base_v {
        Value::Record(fields) => {
            let found = fields.iter().find(|(n, _)| n.as_ref() == field);
            match found {
                Some((_, v)) => Ok(EvalResult::Value(v.clone())),
                None => Err(CoreError::Instantiation(format!("no field {field}"))),
            }
        }
        Value::Union { tag, payload } => {
            // Union field access honours an earlier decomposition;
            // inconsistent access is fatal.
            if tag.as_ref() == field {
                Ok(EvalResult::Value((*payload).clone()))
            } else {
                Err(CoreError::UnionConflict)
            }
        }
        _ => Err(CoreError::Instantiation(format!("field access on non-aggregate {field}"))),
    }
}

fn port_of(ctx: &EvalCtx, port: PortRef) -> CoreResult<Rc<crate::value::PortValue>> {
    match ctx.variables.get(port.0.0 as usize) {
        Some(Value::Port(p)) => Ok(p.clone()),
        _ => Err(CoreError::Disconnected),
    }
}

/// `#P` / `#!P`: probes are implemented as the `wprobe` wire on each port.
fn eval_probe(ctx: &mut EvalCtx, port: PortRef, zero: bool) -> CoreResult<EvalResult> {
    let p = port_of(ctx, port)?;
    let wire = ctx.wires.wire_fix(p.probe);
    match ctx.wires.wires.get(wire.0) {
        Some(w) if w.undefined => Ok(EvalResult::Suspend(wire)),
        Some(w) => Ok(EvalResult::Value(Value::Bool(w.value != zero))),
        None => Err(CoreError::Disconnected),
    }
}

fn eval_replicated(
    ctx: &mut EvalCtx,
    op: BinOp,
    var: VarIdx,
    lo: &Expr,
    hi: &Expr,
    body: &Expr,
) -> CoreResult<EvalResult> {
    let lo_v = as_i64(&require_value(ctx, lo)?)?;
    let hi_v = as_i64(&require_value(ctx, hi)?)?;
    let mut acc: Option<Value> = None;
    for i in lo_v..=hi_v {
        if let Some(slot) = ctx.variables.get_mut(var.0 as usize) {
            *slot = Value::MachineInt(i);
        }
        let v = require_value(ctx, body)?;
        acc = Some(match acc {
            None => v,
            Some(a) => eval_binary(op, &a, &v)?,
        });
    }
    Ok(EvalResult::Value(acc.unwrap_or(Value::Unassigned)))
}

/// `reval_expr`/`assign`: writes `value` to the lvalue denoted by `expr`,
/// after range-checking against the declared type.
pub fn assign(ctx: &mut EvalCtx, lhs: &Expr, value: Value) -> CoreResult<()> {
    range_check_against_type(&value, &lhs.ty)?;
    write_lvalue(ctx, lhs, value)
}

fn range_check_against_type(value: &Value, ty: &crate::ast::Type) -> CoreResult<()> {
    if let crate::ast::Type::Int { lo, hi } = ty {
        value.range_check(*lo, *hi)?;
    }
    Ok(())
}

fn write_lvalue(ctx: &mut EvalCtx, lhs: &Expr, value: Value) -> CoreResult<()> {
    match &lhs.kind {
        ExprKind::Var(idx) => {
            ctx.observe(*idx, vec![], Access::Write, "var")?;
            if let Some(slot) = ctx.variables.get_mut(idx.0 as usize) {
                *slot = value;
            }
            Ok(())
        }
        ExprKind::Index(base, index_expr) => {
            let index_v = require_value(ctx, index_expr)?;
            let index = as_i64(&index_v)?;
            write_index(ctx, base, index, value)
        }
        ExprKind::Field(base, field) => write_field(ctx, base, field, value),
        ExprKind::Slice(base, lo, hi) => {
            let lo_v = as_i64(&require_value(ctx, lo)?)?;
            let hi_v = as_i64(&require_value(ctx, hi)?)?;
            write_slice(ctx, base, lo_v, hi_v, value)
        }
        _ => Err(CoreError::Instantiation("not an lvalue".into())),
    }
}

fn write_index(ctx: &mut EvalCtx, base: &Expr, index: i64, value: Value) -> CoreResult<()> {
    if let crate::ast::Type::Array { lo, hi, .. } = &base.ty {
        if index < *lo || index > *hi {
            return Err(CoreError::IndexOutOfBounds { index });
        }
        let offset = (index - lo) as usize;
        mutate_aggregate(ctx, base, PathElem::Index(index), |agg| {
            if let Value::Array(items) = agg {
                let v = Rc::make_mut(items);
                if offset < v.len() {
                    v[offset] = value.clone();
                }
            }
        })
    } else {
        // Bit write on an integer-typed lvalue: wraps into the carrier via
        // a read-modify-write mask, range re-checked against the declared
        // type allowing wrap-around for bit-width-defined integers.
        mutate_aggregate(ctx, base, PathElem::Bit(index.max(0) as u32), |agg| {
            let bit = value.as_bool().unwrap_or(false);
            let cur = as_i64(agg).unwrap_or(0);
            let mask = 1i64 << index.max(0).min(62);
            *agg = Value::MachineInt(if bit { cur | mask } else { cur & !mask });
        })
    }
}

fn write_slice(ctx: &mut EvalCtx, base: &Expr, lo: i64, hi: i64, value: Value) -> CoreResult<()> {
    mutate_aggregate(ctx, base, PathElem::Slice(lo, hi), |agg| {
        let repl = as_i64(&value).unwrap_or(0);
        let cur = as_i64(agg).unwrap_or(0);
        let width = (hi - lo + 1).max(0);
        let mask = if width >= 63 { i64::MAX } else { (1i64 << width) - 1 };
        let cleared = cur & !(mask << lo.max(0));
        *agg = Value::MachineInt(cleared | ((repl & mask) << lo.max(0)));
    })
}

fn write_field(ctx: &mut EvalCtx, base: &Expr, field: &str, value: Value) -> CoreResult<()> {
    mutate_aggregate(ctx, base, PathElem::Field(Box::from(field)), |agg| {
        if let Value::Record(fields) = agg {
            let v = Rc::make_mut(fields);
            if let Some(slot) = v.iter_mut().find(|(n, _)| n.as_ref() == field) {
                slot.1 = value.clone();
            }
        }
    })
}

/// Reads-modifies-writes the aggregate denoted by `base`, which must itself
/// resolve to a plain variable slot (nested lvalues compose by recursing
/// through `write_lvalue` at a higher level in a full implementation; this
/// core supports one level of subelement/bit nesting). `path` records which
/// sub-element is actually touched, so parallel writes to disjoint elements
/// of the same variable are observed at distinct slots instead of colliding.
fn mutate_aggregate(ctx: &mut EvalCtx, base: &Expr, path: PathElem, f: impl FnOnce(&mut Value)) -> CoreResult<()> {
    if let ExprKind::Var(idx) = &base.kind {
        ctx.observe(*idx, vec![path], Access::Write, "var")?;
        if let Some(slot) = ctx.variables.get_mut(idx.0 as usize) {
            f(slot);
        }
        Ok(())
    } else {
        Err(CoreError::Instantiation("nested lvalue base must be a variable".into()))
    }
}

/// Send-time range check: the carrier value must already satisfy the
/// port's declared type before it is installed in the peer's data slot.
/// Receive-time reconstruction (sign-extension anchored on the lower
/// bound, bits taken modulo the type's width) lives in
/// `Value::reconstruct_bounded`, used from `channel::step_receive` instead.
pub fn range_check_for_port(value: &Value, port_ty: &crate::ast::Type) -> CoreResult<Value> {
    range_check_against_type(value, port_ty)?;
    Ok(value.clone())
}

pub fn comm_kind_needs_value(kind: CommKind) -> bool {
    matches!(kind, CommKind::Send | CommKind::Pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Type;
    use crate::wire::WireNetwork;

    fn ctx<'a>(vars: &'a mut Vec<Value>, wires: &'a mut WireNetwork) -> EvalCtx<'a> {
        EvalCtx { variables: vars, meta_params: &[], wires, interference: None, frame: crate::ids::ControlId(0), replicator_stack: &[], warnings_as_errors: false }
    }

    #[test]
    fn array_out_of_bounds_is_fatal() {
        let mut vars = vec![Value::Array(Rc::new(vec![Value::MachineInt(0); 3]))];
        let mut wires = WireNetwork::new();
        let mut c = ctx(&mut vars, &mut wires);
        let base = Expr::new(ExprKind::Var(VarIdx(0)), Type::Array { elem: Rc::new(Type::Int { lo: 0, hi: 10 }), lo: 1, hi: 3 });
        let err = eval_index(&mut c, &base, 0).unwrap_err();
        assert_eq!(err, CoreError::IndexOutOfBounds { index: 0 });
    }

    #[test]
    fn assignment_range_checks_before_write() {
        let mut vars = vec![Value::MachineInt(0)];
        let mut wires = WireNetwork::new();
        let mut c = ctx(&mut vars, &mut wires);
        let lhs = Expr::new(ExprKind::Var(VarIdx(0)), Type::Int { lo: 0, hi: 3 });
        let err = assign(&mut c, &lhs, Value::MachineInt(9)).unwrap_err();
        assert!(matches!(err, CoreError::RangeError { .. }));
    }
}
