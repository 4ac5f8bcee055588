//! The runtime value model: a closed tagged union, with reference-counted,
//! copy-on-write aggregates.

mod bigint;
pub use bigint::BigInt;

use crate::error::{CoreError, CoreResult};
use crate::ids::{ChannelId, CounterId, ProcessId, WireId};
use std::cmp::Ordering;
use std::rc::Rc;

/// Upper bound on array/record element counts.
pub const ARRAY_MAX: usize = 65_536;
/// Upper bound on counter values.
pub const MAX_COUNT: u32 = 0xFFFF;
/// Bit width of the machine-int representation, used to decide when an
/// integer bit-index needs big-int bit operations instead of masks.
pub const MACHINE_BITS: u32 = 63;

/// A path element recording how a promoted port derives from the port it
/// was sliced or field-accessed out of, innermost step last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortDecomp {
    Bit(i64),
    Slice(i64, i64),
    Field(Rc<str>),
}

/// A port's probe/peer wiring.
///
/// Peer linkage is by `WireId`/`ChannelId` handle rather than an embedded
/// peer struct: two mutually-connected ports would otherwise each own a
/// (cloned) copy of the other, which for `Rc`-shared `Value`s is cheap but
/// for the owned-aggregate `copy()` path would recurse forever. Handles
/// keep the arena-of-indices discipline and make connected-ness a plain
/// equality check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortValue {
    pub probe: WireId,
    pub peer_probe: Option<WireId>,
    /// The shared data slot for this connection; both peers reference the
    /// same slot, installed/consumed by the channel state machine.
    pub channel: Option<ChannelId>,
    pub owning_process: ProcessId,
    /// Empty for a port named directly by a `connect`. Non-empty for a port
    /// derived by indexing, slicing, or field access on an integer- or
    /// record-typed port (`x[i]`, `x[l..h]`, `x.f` where `x` is a port):
    /// the promoted port still resolves to the same probe/channel, but
    /// carries the steps needed to project the handshake's data value down
    /// to the sub-element this port actually denotes.
    pub decomp: Rc<[PortDecomp]>,
}

impl PortValue {
    /// Derives a sub-port by appending one more decomposition step,
    /// keeping the same underlying probe/peer/channel wiring.
    pub fn promote(&self, step: PortDecomp) -> PortValue {
        let mut steps: Vec<PortDecomp> = self.decomp.iter().cloned().collect();
        steps.push(step);
        PortValue { decomp: Rc::from(steps), ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unassigned,
    Bool(bool),
    MachineInt(i64),
    BigInt(Rc<BigInt>),
    Symbol(Rc<str>),
    Array(Rc<Vec<Value>>),
    Record(Rc<Vec<(Rc<str>, Value)>>),
    Union { tag: Rc<str>, payload: Rc<Value> },
    Port(Rc<PortValue>),
    ProcessHandle(ProcessId),
    WireReader(WireId),
    WireWriter(WireId),
    Counter { id: CounterId, value: u32 },
    Type(Rc<str>),
}

impl Value {
    /// Structural equality. Unknown operands are never equal, even to
    /// themselves, matching the "yields false with a warning" rule.
    pub fn equal(&self, other: &Value) -> bool {
        use Value::*;
        match (self, other) {
            (Unassigned, _) | (_, Unassigned) => false,
            (Bool(a), Bool(b)) => a == b,
            (MachineInt(a), BigInt(b)) | (BigInt(b), MachineInt(a)) => {
                bigint::BigInt::from_i64(*a).cmp(b) == Ordering::Equal
            }
            (MachineInt(a), MachineInt(b)) => a == b,
            (BigInt(a), BigInt(b)) => a.cmp(b) == Ordering::Equal,
            (Symbol(a), Symbol(b)) => a == b,
            (Array(a), Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equal(y))
            }
            (Record(a), Record(b)) => {
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|((an, av), (bn, bv))| an == bn && av.equal(bv))
            }
            (Union { tag: at, payload: ap }, Union { tag: bt, payload: bp }) => {
                at == bt && ap.equal(bp)
            }
            _ => false,
        }
    }

    /// `copy`: deep-clones aggregates, shares primitives.
    pub fn copy(&self) -> Value {
        match self {
            Value::Array(items) => {
                Value::Array(Rc::new(items.iter().map(Value::copy).collect()))
            }
            Value::Record(fields) => Value::Record(Rc::new(
                fields.iter().map(|(n, v)| (n.clone(), v.copy())).collect(),
            )),
            Value::Union { tag, payload } => {
                Value::Union { tag: tag.clone(), payload: Rc::new(payload.copy()) }
            }
            other => other.clone(),
        }
    }

    /// `alias`: shares without duplication — just clones the `Rc`/`Copy` handle.
    pub fn alias(&self) -> Value {
        self.clone()
    }

    /// `copy_and_clear`: transfers ownership from `self`, leaving `Unassigned`.
    pub fn copy_and_clear(&mut self) -> Value {
        std::mem::replace(self, Value::Unassigned)
    }

    /// Releases this value. Aggregates release recursively by virtue of `Rc`
    /// drop order; this exists to make the release point explicit at call
    /// sites that mirror the original's `clear()` calls.
    pub fn clear(self) {
        drop(self);
    }

    pub fn is_unassigned(&self) -> bool {
        matches!(self, Value::Unassigned)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Normalizes a value to a `BigInt` view for arithmetic, if it is integral.
    fn as_bigint(&self) -> Option<BigInt> {
        match self {
            Value::MachineInt(i) => Some(BigInt::from_i64(*i)),
            Value::BigInt(b) => Some((**b).clone()),
            _ => None,
        }
    }

    /// `int_simplify`: collapses a big-int back to machine-int when it fits.
    pub fn int_simplify(self) -> Value {
        match self {
            Value::BigInt(b) => match b.to_i64() {
                Some(i) => Value::MachineInt(i),
                None => Value::BigInt(b),
            },
            other => other,
        }
    }

    fn from_bigint(b: BigInt) -> Value {
        Value::BigInt(Rc::new(b)).int_simplify()
    }

    pub fn int_add(&self, other: &Value) -> CoreResult<Value> {
        self.int_binop(other, |a, b| Ok(a.add(&b)))
    }

    pub fn int_sub(&self, other: &Value) -> CoreResult<Value> {
        self.int_binop(other, |a, b| Ok(a.sub(&b)))
    }

    pub fn int_mul(&self, other: &Value) -> CoreResult<Value> {
        self.int_binop(other, |a, b| Ok(a.mul(&b)))
    }

    /// `mod` — floor convention.
    pub fn int_mod_floor(&self, other: &Value) -> CoreResult<Value> {
        self.int_binop(other, |a, b| a.divmod_floor(&b).map(|(_, r)| r).ok_or(CoreError::DivZero))
    }

    /// `%` — truncating convention.
    pub fn int_rem_trunc(&self, other: &Value) -> CoreResult<Value> {
        self.int_binop(other, |a, b| a.divmod_trunc(&b).map(|(_, r)| r).ok_or(CoreError::DivZero))
    }

    pub fn int_div_trunc(&self, other: &Value) -> CoreResult<Value> {
        self.int_binop(other, |a, b| a.divmod_trunc(&b).map(|(q, _)| q).ok_or(CoreError::DivZero))
    }

    fn int_binop(
        &self,
        other: &Value,
        f: impl FnOnce(BigInt, BigInt) -> CoreResult<BigInt>,
    ) -> CoreResult<Value> {
        let a = self.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: "int".into(),
            hi: "int".into(),
        })?;
        let b = other.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: "int".into(),
            hi: "int".into(),
        })?;
        f(a, b).map(Value::from_bigint)
    }

    /// `exp` with the documented negative/too-large guards.
    pub fn int_exp(&self, exponent: &Value) -> CoreResult<Value> {
        let base = self.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: "int".into(),
            hi: "int".into(),
        })?;
        let exp = match exponent {
            Value::MachineInt(i) => *i,
            Value::BigInt(b) => b.to_i64().ok_or(CoreError::ExpTooLarge)?,
            _ => {
                return Err(CoreError::RangeError {
                    value: "non-integer".into(),
                    lo: "int".into(),
                    hi: "int".into(),
                })
            }
        };
        if exp < 0 {
            return Err(CoreError::BadExp);
        }
        const EXP_TOO_LARGE_THRESHOLD: i64 = 1 << 20;
        // Exactly {-1, 0, 1} are exempt from the overflow guard: raising any
        // of them to a huge exponent stays cheap regardless of magnitude.
        // Any other base, positive or negative, can blow up the multiply
        // loop below.
        let base_exempt =
            base.cmp(&BigInt::from_i64(-1)) != Ordering::Less && base.cmp(&BigInt::from_i64(1)) != Ordering::Greater;
        if exp > EXP_TOO_LARGE_THRESHOLD && !base_exempt {
            return Err(CoreError::ExpTooLarge);
        }
        let mut acc = BigInt::from_i64(1);
        for _ in 0..exp {
            acc = acc.mul(&base);
        }
        Ok(Value::from_bigint(acc))
    }

    pub fn int_cmp(&self, other: &Value) -> CoreResult<Ordering> {
        let a = self.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: "int".into(),
            hi: "int".into(),
        })?;
        let b = other.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: "int".into(),
            hi: "int".into(),
        })?;
        Ok(a.cmp(&b))
    }

    /// `⌈log₂(x+1)⌉`, used for bit-slice sizing.
    pub fn int_log2(&self) -> CoreResult<u32> {
        let a = self.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: "int".into(),
            hi: "int".into(),
        })?;
        Ok(a.log2_plus_one())
    }

    /// Reads bit `index` (0 = LSB), using machine masks when it fits in
    /// `MACHINE_BITS`, otherwise falling back to big-int bit access.
    pub fn int_bit(&self, index: u32) -> CoreResult<bool> {
        match self {
            Value::MachineInt(v) if index < MACHINE_BITS => Ok((v >> index) & 1 == 1),
            Value::MachineInt(v) => Ok(BigInt::from_i64(*v).bit(index)),
            Value::BigInt(b) => Ok(b.bit(index)),
            _ => Err(CoreError::RangeError {
                value: "non-integer".into(),
                lo: "int".into(),
                hi: "int".into(),
            }),
        }
    }

    /// Reconstructs a received value against a bounded-integer port type:
    /// the lower bound anchors sign-extension, and the raw bits are taken
    /// modulo the type's width rather than range-checked outright, so the
    /// handshake's bit pattern always lands on some value of the
    /// destination type instead of faulting on receive.
    pub fn reconstruct_bounded(&self, lo: i64, hi: i64) -> CoreResult<Value> {
        if hi <= lo {
            return Ok(Value::MachineInt(lo));
        }
        let width = Value::MachineInt(hi - lo).int_log2()?;
        if width == 0 {
            return Ok(Value::MachineInt(lo));
        }
        let raw = self.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: lo.to_string(),
            hi: hi.to_string(),
        })?;
        if width >= 63 {
            return Ok(Value::from_bigint(raw));
        }
        let modulus = 1i64 << width;
        let raw_i64 = raw.to_i64().unwrap_or(0);
        let wrapped = raw_i64.rem_euclid(modulus);
        Ok(Value::MachineInt(lo + wrapped))
    }

    /// Range-checks an integer value against a declared `[lo, hi]` bound,
    /// the check every assignment and receive performs before a write.
    pub fn range_check(&self, lo: i64, hi: i64) -> CoreResult<()> {
        let v = self.as_bigint().ok_or(CoreError::RangeError {
            value: "non-integer".into(),
            lo: lo.to_string(),
            hi: hi.to_string(),
        })?;
        let lo_b = BigInt::from_i64(lo);
        let hi_b = BigInt::from_i64(hi);
        if v.cmp(&lo_b) == Ordering::Less || v.cmp(&hi_b) == Ordering::Greater {
            return Err(CoreError::RangeError { value: v.to_string(), lo: lo.to_string(), hi: hi.to_string() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_then_clear_leaves_original_shape_intact() {
        let arr = Value::Array(Rc::new(vec![Value::MachineInt(1), Value::MachineInt(2)]));
        let copied = arr.copy();
        copied.clear();
        assert!(arr.equal(&Value::Array(Rc::new(vec![Value::MachineInt(1), Value::MachineInt(2)]))));
    }

    #[test]
    fn div_by_zero_is_fatal() {
        let a = Value::MachineInt(4);
        let z = Value::MachineInt(0);
        assert_eq!(a.int_div_trunc(&z), Err(CoreError::DivZero));
    }

    #[test]
    fn overflow_promotes_to_bigint_and_compares_correctly() {
        let max = Value::MachineInt(i64::MAX);
        let one = Value::MachineInt(1);
        let sum = max.int_add(&one).unwrap();
        assert!(matches!(sum, Value::BigInt(_)));
        assert_eq!(sum.int_cmp(&max).unwrap(), Ordering::Greater);
    }

    #[test]
    fn int_simplify_is_idempotent() {
        let v = Value::BigInt(Rc::new(BigInt::from_i64(5))).int_simplify();
        assert_eq!(v.clone().int_simplify(), v);
    }

    #[test]
    fn negative_exponent_is_rejected() {
        let base = Value::MachineInt(2);
        assert_eq!(base.int_exp(&Value::MachineInt(-1)), Err(CoreError::BadExp));
    }

    #[test]
    fn huge_exponent_on_large_base_is_rejected() {
        let base = Value::MachineInt(2);
        let exp = Value::MachineInt(1 << 21);
        assert_eq!(base.int_exp(&exp), Err(CoreError::ExpTooLarge));
    }

    #[test]
    fn huge_exponent_on_negative_small_base_is_rejected() {
        let base = Value::MachineInt(-2);
        let exp = Value::MachineInt(1 << 21);
        assert_eq!(base.int_exp(&exp), Err(CoreError::ExpTooLarge));
    }

    #[test]
    fn huge_exponent_on_exempt_bases_is_allowed() {
        for b in [-1i64, 0, 1] {
            let base = Value::MachineInt(b);
            let exp = Value::MachineInt(1 << 21);
            assert!(base.int_exp(&exp).is_ok());
        }
    }

    #[test]
    fn reconstruct_bounded_wraps_modulo_width_and_anchors_on_lo() {
        // [3, 18] needs 4 bits (modulus 16); 19 falls outside the declared
        // range but the bit pattern wraps back to 3 + (19 % 16) = 6.
        let v = Value::MachineInt(19);
        let r = v.reconstruct_bounded(3, 18).unwrap();
        assert_eq!(r, Value::MachineInt(6));
    }

    #[test]
    fn reconstruct_bounded_is_identity_when_in_range() {
        let v = Value::MachineInt(42);
        let r = v.reconstruct_bounded(0, 100).unwrap();
        assert_eq!(r, Value::MachineInt(42));
    }

    #[test]
    fn alias_shares_the_same_backing_rc() {
        let arr = Value::Array(Rc::new(vec![Value::MachineInt(1)]));
        if let (Value::Array(a), Value::Array(b)) = (&arr, &arr.alias()) {
            assert!(Rc::ptr_eq(a, b));
        } else {
            unreachable!();
        }
    }
}
