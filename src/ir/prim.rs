//! Primitive types, values, and operators
//!
//! Scalars in the IR are one of the integer types `i8..i64`, the float
//! types `f32`/`f64`, `bool`, or `cert` (a zero-width proof token produced
//! by an assertion). Binary and comparison operators are parametrized by
//! their operand type.
//!
//! Arithmetic follows the common low-level conventions: two's-complement
//! wrap for `Add`/`Sub`/`Mul`, division rounding toward negative infinity
//! for `SDiv`/`UDiv`/`SMod`/`UMod` versus toward zero for `SQuot`/`SRem`,
//! and logical versus arithmetic shifts distinguished. Division or modulus
//! by zero is unspecified at the IR level; the folding functions here
//! refuse to evaluate it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer bit widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntType {
    I8,
    I16,
    I32,
    I64,
}

impl IntType {
    /// Width in bits
    pub fn bits(self) -> u32 {
        match self {
            IntType::I8 => 8,
            IntType::I16 => 16,
            IntType::I32 => 32,
            IntType::I64 => 64,
        }
    }

    /// Width in bytes
    pub fn bytes(self) -> u64 {
        u64::from(self.bits()) / 8
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntType::I8 => write!(f, "i8"),
            IntType::I16 => write!(f, "i16"),
            IntType::I32 => write!(f, "i32"),
            IntType::I64 => write!(f, "i64"),
        }
    }
}

/// Floating-point widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloatType {
    F32,
    F64,
}

impl FloatType {
    /// Width in bytes
    pub fn bytes(self) -> u64 {
        match self {
            FloatType::F32 => 4,
            FloatType::F64 => 8,
        }
    }
}

impl fmt::Display for FloatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloatType::F32 => write!(f, "f32"),
            FloatType::F64 => write!(f, "f64"),
        }
    }
}

/// The primitive scalar types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimType {
    Int(IntType),
    Float(FloatType),
    Bool,
    /// Zero-width proof token produced by `Assert`
    Cert,
}

impl PrimType {
    /// Storage size in bytes; `bool` occupies one byte, `cert` none.
    pub fn bytes(self) -> u64 {
        match self {
            PrimType::Int(it) => it.bytes(),
            PrimType::Float(ft) => ft.bytes(),
            PrimType::Bool => 1,
            PrimType::Cert => 0,
        }
    }

    /// The canonical index type used for shapes and loop counters
    pub const INDEX: PrimType = PrimType::Int(IntType::I32);
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimType::Int(it) => write!(f, "{}", it),
            PrimType::Float(ft) => write!(f, "{}", ft),
            PrimType::Bool => write!(f, "bool"),
            PrimType::Cert => write!(f, "cert"),
        }
    }
}

/// An integer value tagged with its width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
}

impl IntValue {
    /// The type of this value
    pub fn int_type(self) -> IntType {
        match self {
            IntValue::I8(_) => IntType::I8,
            IntValue::I16(_) => IntType::I16,
            IntValue::I32(_) => IntType::I32,
            IntValue::I64(_) => IntType::I64,
        }
    }

    /// Sign-extend to 64 bits
    pub fn as_i64(self) -> i64 {
        match self {
            IntValue::I8(v) => i64::from(v),
            IntValue::I16(v) => i64::from(v),
            IntValue::I32(v) => i64::from(v),
            IntValue::I64(v) => v,
        }
    }

    /// Zero-extend to 64 bits
    pub fn as_u64(self) -> u64 {
        match self {
            IntValue::I8(v) => u64::from(v as u8),
            IntValue::I16(v) => u64::from(v as u16),
            IntValue::I32(v) => u64::from(v as u32),
            IntValue::I64(v) => v as u64,
        }
    }

    /// Truncate a 64-bit value into the given width (two's-complement wrap)
    pub fn from_i64(ty: IntType, v: i64) -> Self {
        match ty {
            IntType::I8 => IntValue::I8(v as i8),
            IntType::I16 => IntValue::I16(v as i16),
            IntType::I32 => IntValue::I32(v as i32),
            IntType::I64 => IntValue::I64(v),
        }
    }
}

impl fmt::Display for IntValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.as_i64(), self.int_type())
    }
}

/// A float value tagged with its width
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FloatValue {
    F32(f32),
    F64(f64),
}

impl FloatValue {
    /// The type of this value
    pub fn float_type(self) -> FloatType {
        match self {
            FloatValue::F32(_) => FloatType::F32,
            FloatValue::F64(_) => FloatType::F64,
        }
    }

    /// Widen to f64
    pub fn as_f64(self) -> f64 {
        match self {
            FloatValue::F32(v) => f64::from(v),
            FloatValue::F64(v) => v,
        }
    }

    /// Narrow a 64-bit float into the given width
    pub fn from_f64(ty: FloatType, v: f64) -> Self {
        match ty {
            FloatType::F32 => FloatValue::F32(v as f32),
            FloatType::F64 => FloatValue::F64(v),
        }
    }
}

impl fmt::Display for FloatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.as_f64(), self.float_type())
    }
}

/// A primitive constant
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PrimValue {
    Int(IntValue),
    Float(FloatValue),
    Bool(bool),
    /// The sole inhabitant of `cert`
    Checked,
}

impl PrimValue {
    /// The type of this value
    pub fn prim_type(self) -> PrimType {
        match self {
            PrimValue::Int(iv) => PrimType::Int(iv.int_type()),
            PrimValue::Float(fv) => PrimType::Float(fv.float_type()),
            PrimValue::Bool(_) => PrimType::Bool,
            PrimValue::Checked => PrimType::Cert,
        }
    }

    /// The zero (additive identity) of a type, when it has one
    pub fn zero(ty: PrimType) -> Option<PrimValue> {
        match ty {
            PrimType::Int(it) => Some(PrimValue::Int(IntValue::from_i64(it, 0))),
            PrimType::Float(ft) => Some(PrimValue::Float(FloatValue::from_f64(ft, 0.0))),
            PrimType::Bool => Some(PrimValue::Bool(false)),
            PrimType::Cert => None,
        }
    }

    /// The one (multiplicative identity) of a type, when it has one
    pub fn one(ty: PrimType) -> Option<PrimValue> {
        match ty {
            PrimType::Int(it) => Some(PrimValue::Int(IntValue::from_i64(it, 1))),
            PrimType::Float(ft) => Some(PrimValue::Float(FloatValue::from_f64(ft, 1.0))),
            PrimType::Bool => Some(PrimValue::Bool(true)),
            PrimType::Cert => None,
        }
    }

    /// Is this value the zero of its type?
    pub fn is_zero(self) -> bool {
        match self {
            PrimValue::Int(iv) => iv.as_i64() == 0,
            PrimValue::Float(fv) => fv.as_f64() == 0.0,
            _ => false,
        }
    }

    /// Is this value the one of its type?
    pub fn is_one(self) -> bool {
        match self {
            PrimValue::Int(iv) => iv.as_i64() == 1,
            PrimValue::Float(fv) => fv.as_f64() == 1.0,
            _ => false,
        }
    }

    /// Convenience constructor for i32 constants
    pub fn int32(v: i32) -> PrimValue {
        PrimValue::Int(IntValue::I32(v))
    }

    /// Convenience constructor for i64 constants
    pub fn int64(v: i64) -> PrimValue {
        PrimValue::Int(IntValue::I64(v))
    }
}

impl fmt::Display for PrimValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimValue::Int(iv) => write!(f, "{}", iv),
            PrimValue::Float(fv) => write!(f, "{}", fv),
            PrimValue::Bool(b) => write!(f, "{}", b),
            PrimValue::Checked => write!(f, "checked"),
        }
    }
}

/// Binary operators, parametrized by operand type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// Wrapping addition
    Add(IntType),
    /// Wrapping subtraction
    Sub(IntType),
    /// Wrapping multiplication
    Mul(IntType),
    /// Signed division, rounding toward negative infinity
    SDiv(IntType),
    /// Unsigned division
    UDiv(IntType),
    /// Signed modulus, sign follows the divisor
    SMod(IntType),
    /// Unsigned modulus
    UMod(IntType),
    /// Signed division, rounding toward zero
    SQuot(IntType),
    /// Remainder of `SQuot`, sign follows the dividend
    SRem(IntType),
    /// Signed minimum
    SMin(IntType),
    /// Unsigned minimum
    UMin(IntType),
    /// Signed maximum
    SMax(IntType),
    /// Unsigned maximum
    UMax(IntType),
    /// Left shift; shifts of at least the bit width produce zero
    Shl(IntType),
    /// Logical (zero-filling) right shift
    LShr(IntType),
    /// Arithmetic (sign-filling) right shift
    AShr(IntType),
    /// Bitwise and
    And(IntType),
    /// Bitwise or
    Or(IntType),
    /// Bitwise xor
    Xor(IntType),
    /// Wrapping exponentiation; negative exponents never fold
    Pow(IntType),
    FAdd(FloatType),
    FSub(FloatType),
    FMul(FloatType),
    FDiv(FloatType),
    FMin(FloatType),
    FMax(FloatType),
    FPow(FloatType),
    LogAnd,
    LogOr,
}

impl BinOp {
    /// The operand (and result) type
    pub fn operand_type(self) -> PrimType {
        match self {
            BinOp::Add(t)
            | BinOp::Sub(t)
            | BinOp::Mul(t)
            | BinOp::SDiv(t)
            | BinOp::UDiv(t)
            | BinOp::SMod(t)
            | BinOp::UMod(t)
            | BinOp::SQuot(t)
            | BinOp::SRem(t)
            | BinOp::SMin(t)
            | BinOp::UMin(t)
            | BinOp::SMax(t)
            | BinOp::UMax(t)
            | BinOp::Shl(t)
            | BinOp::LShr(t)
            | BinOp::AShr(t)
            | BinOp::And(t)
            | BinOp::Or(t)
            | BinOp::Xor(t)
            | BinOp::Pow(t) => PrimType::Int(t),
            BinOp::FAdd(t)
            | BinOp::FSub(t)
            | BinOp::FMul(t)
            | BinOp::FDiv(t)
            | BinOp::FMin(t)
            | BinOp::FMax(t)
            | BinOp::FPow(t) => PrimType::Float(t),
            BinOp::LogAnd | BinOp::LogOr => PrimType::Bool,
        }
    }

    /// Is this operator commutative?
    pub fn commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add(_)
                | BinOp::Mul(_)
                | BinOp::And(_)
                | BinOp::Or(_)
                | BinOp::Xor(_)
                | BinOp::SMin(_)
                | BinOp::UMin(_)
                | BinOp::SMax(_)
                | BinOp::UMax(_)
                | BinOp::FAdd(_)
                | BinOp::FMul(_)
                | BinOp::FMin(_)
                | BinOp::FMax(_)
                | BinOp::LogAnd
                | BinOp::LogOr
        )
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinOp::Add(t) => write!(f, "add_{}", t),
            BinOp::Sub(t) => write!(f, "sub_{}", t),
            BinOp::Mul(t) => write!(f, "mul_{}", t),
            BinOp::SDiv(t) => write!(f, "sdiv_{}", t),
            BinOp::UDiv(t) => write!(f, "udiv_{}", t),
            BinOp::SMod(t) => write!(f, "smod_{}", t),
            BinOp::UMod(t) => write!(f, "umod_{}", t),
            BinOp::SQuot(t) => write!(f, "squot_{}", t),
            BinOp::SRem(t) => write!(f, "srem_{}", t),
            BinOp::SMin(t) => write!(f, "smin_{}", t),
            BinOp::UMin(t) => write!(f, "umin_{}", t),
            BinOp::SMax(t) => write!(f, "smax_{}", t),
            BinOp::UMax(t) => write!(f, "umax_{}", t),
            BinOp::Shl(t) => write!(f, "shl_{}", t),
            BinOp::LShr(t) => write!(f, "lshr_{}", t),
            BinOp::AShr(t) => write!(f, "ashr_{}", t),
            BinOp::And(t) => write!(f, "and_{}", t),
            BinOp::Or(t) => write!(f, "or_{}", t),
            BinOp::Xor(t) => write!(f, "xor_{}", t),
            BinOp::Pow(t) => write!(f, "pow_{}", t),
            BinOp::FAdd(t) => write!(f, "fadd_{}", t),
            BinOp::FSub(t) => write!(f, "fsub_{}", t),
            BinOp::FMul(t) => write!(f, "fmul_{}", t),
            BinOp::FDiv(t) => write!(f, "fdiv_{}", t),
            BinOp::FMin(t) => write!(f, "fmin_{}", t),
            BinOp::FMax(t) => write!(f, "fmax_{}", t),
            BinOp::FPow(t) => write!(f, "fpow_{}", t),
            BinOp::LogAnd => write!(f, "logand"),
            BinOp::LogOr => write!(f, "logor"),
        }
    }
}

/// Comparison operators, parametrized by operand type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpOp {
    /// Equality at any primitive type
    CmpEq(PrimType),
    /// Signed less-than
    CmpSlt(IntType),
    /// Signed less-than-or-equal
    CmpSle(IntType),
    /// Unsigned less-than
    CmpUlt(IntType),
    /// Unsigned less-than-or-equal
    CmpUle(IntType),
    /// Float less-than
    FCmpLt(FloatType),
    /// Float less-than-or-equal
    FCmpLe(FloatType),
}

impl CmpOp {
    /// The operand type
    pub fn operand_type(self) -> PrimType {
        match self {
            CmpOp::CmpEq(t) => t,
            CmpOp::CmpSlt(t) | CmpOp::CmpSle(t) | CmpOp::CmpUlt(t) | CmpOp::CmpUle(t) => {
                PrimType::Int(t)
            }
            CmpOp::FCmpLt(t) | CmpOp::FCmpLe(t) => PrimType::Float(t),
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmpOp::CmpEq(t) => write!(f, "eq_{}", t),
            CmpOp::CmpSlt(t) => write!(f, "slt_{}", t),
            CmpOp::CmpSle(t) => write!(f, "sle_{}", t),
            CmpOp::CmpUlt(t) => write!(f, "ult_{}", t),
            CmpOp::CmpUle(t) => write!(f, "ule_{}", t),
            CmpOp::FCmpLt(t) => write!(f, "flt_{}", t),
            CmpOp::FCmpLe(t) => write!(f, "fle_{}", t),
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    /// Boolean negation
    Not,
    /// Bitwise complement
    Complement(IntType),
    /// Signed absolute value
    Abs(IntType),
    /// Float absolute value
    FAbs(FloatType),
    /// Sign of a signed integer (-1, 0, 1)
    SSignum(IntType),
}

impl UnOp {
    /// The operand (and result) type
    pub fn operand_type(self) -> PrimType {
        match self {
            UnOp::Not => PrimType::Bool,
            UnOp::Complement(t) | UnOp::Abs(t) | UnOp::SSignum(t) => PrimType::Int(t),
            UnOp::FAbs(t) => PrimType::Float(t),
        }
    }
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Not => write!(f, "not"),
            UnOp::Complement(t) => write!(f, "complement_{}", t),
            UnOp::Abs(t) => write!(f, "abs_{}", t),
            UnOp::FAbs(t) => write!(f, "fabs_{}", t),
            UnOp::SSignum(t) => write!(f, "ssignum_{}", t),
        }
    }
}

/// Conversion operators between primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConvOp {
    /// Sign-extending (or truncating) integer conversion
    SExt(IntType, IntType),
    /// Zero-extending (or truncating) integer conversion
    ZExt(IntType, IntType),
    /// Float-to-float conversion
    FPConv(FloatType, FloatType),
    /// Float to signed integer, rounding toward zero
    FPToSI(FloatType, IntType),
    /// Signed integer to float
    SIToFP(IntType, FloatType),
    /// Integer to bool (nonzero test)
    IToB(IntType),
    /// Bool to integer (0 or 1)
    BToI(IntType),
}

impl ConvOp {
    /// The `(from, to)` type pair
    pub fn types(self) -> (PrimType, PrimType) {
        match self {
            ConvOp::SExt(a, b) | ConvOp::ZExt(a, b) => (PrimType::Int(a), PrimType::Int(b)),
            ConvOp::FPConv(a, b) => (PrimType::Float(a), PrimType::Float(b)),
            ConvOp::FPToSI(a, b) => (PrimType::Float(a), PrimType::Int(b)),
            ConvOp::SIToFP(a, b) => (PrimType::Int(a), PrimType::Float(b)),
            ConvOp::IToB(a) => (PrimType::Int(a), PrimType::Bool),
            ConvOp::BToI(b) => (PrimType::Bool, PrimType::Int(b)),
        }
    }
}

impl fmt::Display for ConvOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConvOp::SExt(a, b) => write!(f, "sext_{}_{}", a, b),
            ConvOp::ZExt(a, b) => write!(f, "zext_{}_{}", a, b),
            ConvOp::FPConv(a, b) => write!(f, "fpconv_{}_{}", a, b),
            ConvOp::FPToSI(a, b) => write!(f, "fptosi_{}_{}", a, b),
            ConvOp::SIToFP(a, b) => write!(f, "sitofp_{}_{}", a, b),
            ConvOp::IToB(a) => write!(f, "itob_{}", a),
            ConvOp::BToI(b) => write!(f, "btoi_{}", b),
        }
    }
}

/// Division rounding toward negative infinity
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Modulus matching `floor_div`: the sign follows the divisor
fn floor_mod(a: i64, b: i64) -> i64 {
    a.wrapping_sub(floor_div(a, b).wrapping_mul(b))
}

fn int_pow(base: i64, exp: i64) -> Option<i64> {
    if exp < 0 {
        return None;
    }
    let mut result: i64 = 1;
    let mut base = base;
    let mut exp = exp as u64;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        base = base.wrapping_mul(base);
        exp >>= 1;
    }
    Some(result)
}

/// Evaluate a binary operator on constants.
///
/// Returns `None` when the operator refuses to fold: operand types that do
/// not match the operator, a zero divisor, or a negative exponent. Refusal
/// is not an error; the caller simply keeps the expression symbolic.
pub fn do_bin_op(op: BinOp, x: PrimValue, y: PrimValue) -> Option<PrimValue> {
    if x.prim_type() != op.operand_type() || y.prim_type() != op.operand_type() {
        return None;
    }
    match (op, x, y) {
        (BinOp::LogAnd, PrimValue::Bool(a), PrimValue::Bool(b)) => Some(PrimValue::Bool(a && b)),
        (BinOp::LogOr, PrimValue::Bool(a), PrimValue::Bool(b)) => Some(PrimValue::Bool(a || b)),
        (op, PrimValue::Int(a), PrimValue::Int(b)) => {
            let t = a.int_type();
            let (sa, sb) = (a.as_i64(), b.as_i64());
            let (ua, ub) = (a.as_u64(), b.as_u64());
            let bits = t.bits();
            let wrap = |v: i64| Some(PrimValue::Int(IntValue::from_i64(t, v)));
            match op {
                BinOp::Add(_) => wrap(sa.wrapping_add(sb)),
                BinOp::Sub(_) => wrap(sa.wrapping_sub(sb)),
                BinOp::Mul(_) => wrap(sa.wrapping_mul(sb)),
                BinOp::SDiv(_) if sb != 0 => wrap(floor_div(sa, sb)),
                BinOp::UDiv(_) if ub != 0 => wrap((ua / ub) as i64),
                BinOp::SMod(_) if sb != 0 => wrap(floor_mod(sa, sb)),
                BinOp::UMod(_) if ub != 0 => wrap((ua % ub) as i64),
                BinOp::SQuot(_) if sb != 0 => wrap(sa.wrapping_div(sb)),
                BinOp::SRem(_) if sb != 0 => wrap(sa.wrapping_rem(sb)),
                BinOp::SMin(_) => wrap(sa.min(sb)),
                BinOp::UMin(_) => wrap(ua.min(ub) as i64),
                BinOp::SMax(_) => wrap(sa.max(sb)),
                BinOp::UMax(_) => wrap(ua.max(ub) as i64),
                BinOp::Shl(_) => {
                    if ub >= u64::from(bits) {
                        wrap(0)
                    } else {
                        wrap(sa.wrapping_shl(ub as u32))
                    }
                }
                BinOp::LShr(_) => {
                    if ub >= u64::from(bits) {
                        wrap(0)
                    } else {
                        wrap((ua >> ub) as i64)
                    }
                }
                BinOp::AShr(_) => {
                    let shift = ub.min(u64::from(bits) - 1);
                    wrap(sa >> shift)
                }
                BinOp::And(_) => wrap((ua & ub) as i64),
                BinOp::Or(_) => wrap((ua | ub) as i64),
                BinOp::Xor(_) => wrap((ua ^ ub) as i64),
                BinOp::Pow(_) => int_pow(sa, sb).and_then(wrap),
                _ => None,
            }
        }
        (op, PrimValue::Float(a), PrimValue::Float(b)) => {
            let t = a.float_type();
            let (fa, fb) = (a.as_f64(), b.as_f64());
            let wrap = |v: f64| Some(PrimValue::Float(FloatValue::from_f64(t, v)));
            match op {
                BinOp::FAdd(_) => wrap(fa + fb),
                BinOp::FSub(_) => wrap(fa - fb),
                BinOp::FMul(_) => wrap(fa * fb),
                BinOp::FDiv(_) => wrap(fa / fb),
                BinOp::FMin(_) => wrap(fa.min(fb)),
                BinOp::FMax(_) => wrap(fa.max(fb)),
                BinOp::FPow(_) => wrap(fa.powf(fb)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Evaluate a comparison operator on constants.
pub fn do_cmp_op(op: CmpOp, x: PrimValue, y: PrimValue) -> Option<bool> {
    if x.prim_type() != op.operand_type() || y.prim_type() != op.operand_type() {
        return None;
    }
    match op {
        CmpOp::CmpEq(_) => match (x, y) {
            (PrimValue::Int(a), PrimValue::Int(b)) => Some(a.as_i64() == b.as_i64()),
            (PrimValue::Float(a), PrimValue::Float(b)) => Some(a.as_f64() == b.as_f64()),
            (PrimValue::Bool(a), PrimValue::Bool(b)) => Some(a == b),
            (PrimValue::Checked, PrimValue::Checked) => Some(true),
            _ => None,
        },
        CmpOp::CmpSlt(_) => int_operands(x, y).map(|(a, b)| a.as_i64() < b.as_i64()),
        CmpOp::CmpSle(_) => int_operands(x, y).map(|(a, b)| a.as_i64() <= b.as_i64()),
        CmpOp::CmpUlt(_) => int_operands(x, y).map(|(a, b)| a.as_u64() < b.as_u64()),
        CmpOp::CmpUle(_) => int_operands(x, y).map(|(a, b)| a.as_u64() <= b.as_u64()),
        CmpOp::FCmpLt(_) => float_operands(x, y).map(|(a, b)| a.as_f64() < b.as_f64()),
        CmpOp::FCmpLe(_) => float_operands(x, y).map(|(a, b)| a.as_f64() <= b.as_f64()),
    }
}

fn int_operands(x: PrimValue, y: PrimValue) -> Option<(IntValue, IntValue)> {
    match (x, y) {
        (PrimValue::Int(a), PrimValue::Int(b)) => Some((a, b)),
        _ => None,
    }
}

fn float_operands(x: PrimValue, y: PrimValue) -> Option<(FloatValue, FloatValue)> {
    match (x, y) {
        (PrimValue::Float(a), PrimValue::Float(b)) => Some((a, b)),
        _ => None,
    }
}

/// Evaluate a unary operator on a constant.
pub fn do_un_op(op: UnOp, x: PrimValue) -> Option<PrimValue> {
    if x.prim_type() != op.operand_type() {
        return None;
    }
    match (op, x) {
        (UnOp::Not, PrimValue::Bool(b)) => Some(PrimValue::Bool(!b)),
        (UnOp::Complement(_), PrimValue::Int(a)) => {
            Some(PrimValue::Int(IntValue::from_i64(a.int_type(), !a.as_i64())))
        }
        (UnOp::Abs(_), PrimValue::Int(a)) => Some(PrimValue::Int(IntValue::from_i64(
            a.int_type(),
            a.as_i64().wrapping_abs(),
        ))),
        (UnOp::FAbs(_), PrimValue::Float(a)) => Some(PrimValue::Float(FloatValue::from_f64(
            a.float_type(),
            a.as_f64().abs(),
        ))),
        (UnOp::SSignum(_), PrimValue::Int(a)) => Some(PrimValue::Int(IntValue::from_i64(
            a.int_type(),
            a.as_i64().signum(),
        ))),
        _ => None,
    }
}

/// Evaluate a conversion operator on a constant.
pub fn do_conv_op(op: ConvOp, x: PrimValue) -> Option<PrimValue> {
    let (from, _) = op.types();
    if x.prim_type() != from {
        return None;
    }
    match (op, x) {
        (ConvOp::SExt(_, to), PrimValue::Int(a)) => {
            Some(PrimValue::Int(IntValue::from_i64(to, a.as_i64())))
        }
        (ConvOp::ZExt(_, to), PrimValue::Int(a)) => {
            Some(PrimValue::Int(IntValue::from_i64(to, a.as_u64() as i64)))
        }
        (ConvOp::FPConv(_, to), PrimValue::Float(a)) => {
            Some(PrimValue::Float(FloatValue::from_f64(to, a.as_f64())))
        }
        (ConvOp::FPToSI(_, to), PrimValue::Float(a)) => {
            Some(PrimValue::Int(IntValue::from_i64(to, a.as_f64() as i64)))
        }
        (ConvOp::SIToFP(_, to), PrimValue::Int(a)) => {
            Some(PrimValue::Float(FloatValue::from_f64(to, a.as_i64() as f64)))
        }
        (ConvOp::IToB(_), PrimValue::Int(a)) => Some(PrimValue::Bool(a.as_i64() != 0)),
        (ConvOp::BToI(to), PrimValue::Bool(b)) => {
            Some(PrimValue::Int(IntValue::from_i64(to, i64::from(b))))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i32v(v: i32) -> PrimValue {
        PrimValue::int32(v)
    }

    #[test]
    fn test_add_wraps() {
        let r = do_bin_op(BinOp::Add(IntType::I32), i32v(i32::MAX), i32v(1)).unwrap();
        assert_eq!(r, i32v(i32::MIN));
    }

    #[test]
    fn test_sdiv_rounds_toward_negative_infinity() {
        let r = do_bin_op(BinOp::SDiv(IntType::I32), i32v(-7), i32v(2)).unwrap();
        assert_eq!(r, i32v(-4));
        let r = do_bin_op(BinOp::SQuot(IntType::I32), i32v(-7), i32v(2)).unwrap();
        assert_eq!(r, i32v(-3));
    }

    #[test]
    fn test_smod_sign_follows_divisor() {
        let r = do_bin_op(BinOp::SMod(IntType::I32), i32v(-7), i32v(3)).unwrap();
        assert_eq!(r, i32v(2));
        let r = do_bin_op(BinOp::SRem(IntType::I32), i32v(-7), i32v(3)).unwrap();
        assert_eq!(r, i32v(-1));
    }

    #[test]
    fn test_division_by_zero_refuses_to_fold() {
        assert_eq!(do_bin_op(BinOp::SDiv(IntType::I32), i32v(1), i32v(0)), None);
        assert_eq!(do_bin_op(BinOp::UDiv(IntType::I32), i32v(1), i32v(0)), None);
        assert_eq!(do_bin_op(BinOp::SMod(IntType::I32), i32v(1), i32v(0)), None);
        assert_eq!(do_bin_op(BinOp::UMod(IntType::I32), i32v(1), i32v(0)), None);
        assert_eq!(do_bin_op(BinOp::SQuot(IntType::I32), i32v(1), i32v(0)), None);
        assert_eq!(do_bin_op(BinOp::SRem(IntType::I32), i32v(1), i32v(0)), None);
    }

    #[test]
    fn test_negative_exponent_refuses_to_fold() {
        assert_eq!(do_bin_op(BinOp::Pow(IntType::I32), i32v(2), i32v(-1)), None);
        assert_eq!(
            do_bin_op(BinOp::Pow(IntType::I32), i32v(2), i32v(10)),
            Some(i32v(1024))
        );
    }

    #[test]
    fn test_logical_vs_arithmetic_shift() {
        let r = do_bin_op(BinOp::LShr(IntType::I8), PrimValue::Int(IntValue::I8(-1)), i32_as(IntType::I8, 1)).unwrap();
        assert_eq!(r, PrimValue::Int(IntValue::I8(127)));
        let r = do_bin_op(BinOp::AShr(IntType::I8), PrimValue::Int(IntValue::I8(-1)), i32_as(IntType::I8, 1)).unwrap();
        assert_eq!(r, PrimValue::Int(IntValue::I8(-1)));
    }

    fn i32_as(t: IntType, v: i64) -> PrimValue {
        PrimValue::Int(IntValue::from_i64(t, v))
    }

    #[test]
    fn test_oversized_shift_is_zero() {
        let r = do_bin_op(BinOp::Shl(IntType::I8), i32_as(IntType::I8, 1), i32_as(IntType::I8, 9)).unwrap();
        assert_eq!(r, i32_as(IntType::I8, 0));
    }

    #[test]
    fn test_unsigned_compare_differs_from_signed() {
        let minus1 = PrimValue::Int(IntValue::I32(-1));
        assert_eq!(do_cmp_op(CmpOp::CmpSlt(IntType::I32), minus1, i32v(0)), Some(true));
        assert_eq!(do_cmp_op(CmpOp::CmpUlt(IntType::I32), minus1, i32v(0)), Some(false));
    }

    #[test]
    fn test_mismatched_operands_refuse() {
        let r = do_bin_op(
            BinOp::Add(IntType::I32),
            i32v(1),
            PrimValue::Float(FloatValue::F32(1.0)),
        );
        assert_eq!(r, None);
    }

    #[test]
    fn test_conversions() {
        let v = PrimValue::Int(IntValue::I8(-1));
        assert_eq!(
            do_conv_op(ConvOp::SExt(IntType::I8, IntType::I32), v),
            Some(i32v(-1))
        );
        assert_eq!(
            do_conv_op(ConvOp::ZExt(IntType::I8, IntType::I32), v),
            Some(i32v(255))
        );
        assert_eq!(do_conv_op(ConvOp::IToB(IntType::I32), i32v(3)), Some(PrimValue::Bool(true)));
    }
}
