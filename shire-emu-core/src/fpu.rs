//! Bit-exact IEEE 754 binary32/binary16 arithmetic.
//!
//! The execution engine and the tensor units never use the host's floating-point instructions
//! for guest-visible results; everything goes through this module so results are reproducible
//! bit-for-bit across hosts, in every rounding mode, with accrued exception flags matching a
//! reference softfloat. Values are carried as raw bit patterns (`u32` for binary32, `u16` for
//! binary16).
//!
//! Tininess is detected after rounding, matching the reference softfloat configuration used by
//! RISC-V implementations.

use std::cmp::Ordering;

/// Raw binary32 bit pattern.
pub type F32 = u32;
/// Raw binary16 bit pattern.
pub type F16 = u16;

/// The canonical (quiet) NaN produced by all operations that generate a NaN.
pub const F32_CANONICAL_NAN: F32 = 0x7FC0_0000;
pub const F16_CANONICAL_NAN: F16 = 0x7E00;

/// Accrued exception flags, in the bit positions of the `fflags` CSR.
pub mod flags {
    pub const NX: u8 = 0x01;
    pub const UF: u8 = 0x02;
    pub const OF: u8 = 0x04;
    pub const DZ: u8 = 0x08;
    pub const NV: u8 = 0x10;
}

/// Rounding mode, in the encoding of the `frm` CSR field.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    Rne = 0,
    /// Round towards zero.
    Rtz = 1,
    /// Round down (towards negative infinity).
    Rdn = 2,
    /// Round up (towards positive infinity).
    Rup = 3,
    /// Round to nearest, ties to max magnitude.
    Rmm = 4,
}

impl RoundingMode {
    /// Decodes a 3-bit `frm` field. Values 5 and 6 are reserved; 7 (`DYN`) is resolved by the
    /// caller before reaching this module.
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0 => Some(Self::Rne),
            1 => Some(Self::Rtz),
            2 => Some(Self::Rdn),
            3 => Some(Self::Rup),
            4 => Some(Self::Rmm),
            _ => None,
        }
    }
}

#[inline]
fn sign(a: F32) -> bool {
    a >> 31 != 0
}

#[inline]
fn exp(a: F32) -> i32 {
    ((a >> 23) & 0xFF) as i32
}

#[inline]
fn frac(a: F32) -> u32 {
    a & 0x7F_FFFF
}

/// Packs sign, exponent field, and significand by plain addition, so a significand carry-out
/// increments the exponent field.
#[inline]
fn pack(sign: bool, exp: i32, sig: u32) -> F32 {
    ((sign as u32) << 31)
        .wrapping_add((exp as u32) << 23)
        .wrapping_add(sig)
}

#[inline]
fn is_nan(a: F32) -> bool {
    exp(a) == 0xFF && frac(a) != 0
}

#[inline]
fn is_signaling_nan(a: F32) -> bool {
    is_nan(a) && (a & 0x40_0000) == 0
}

#[inline]
fn is_inf(a: F32) -> bool {
    exp(a) == 0xFF && frac(a) == 0
}

#[inline]
fn is_zero(a: F32) -> bool {
    a & 0x7FFF_FFFF == 0
}

/// Shifts `sig` right by `count`, ORing any bits shifted out into the result's LSB (sticky).
#[inline]
fn shift_right_jam32(sig: u32, count: u32) -> u32 {
    if count == 0 {
        sig
    } else if count < 32 {
        (sig >> count) | ((sig << (32 - count) != 0) as u32)
    } else {
        (sig != 0) as u32
    }
}

#[inline]
fn shift_right_jam64(sig: u64, count: u32) -> u64 {
    if count == 0 {
        sig
    } else if count < 64 {
        (sig >> count) | ((sig << (64 - count) != 0) as u64)
    } else {
        (sig != 0) as u64
    }
}

fn round_increment_f32(rm: RoundingMode, sign: bool) -> u32 {
    match rm {
        RoundingMode::Rne | RoundingMode::Rmm => 0x40,
        RoundingMode::Rtz => 0,
        RoundingMode::Rdn => {
            if sign {
                0x7F
            } else {
                0
            }
        }
        RoundingMode::Rup => {
            if sign {
                0
            } else {
                0x7F
            }
        }
    }
}

/// Rounds and packs a binary32 result.
///
/// `sig` carries the significand with the leading one at bit 30 (for normal results) and seven
/// rounding bits at the bottom: the represented value is `sig * 2^(exp - 156)` (equivalently,
/// `exp` is one less than the final exponent field).
fn round_pack_f32(sign: bool, mut exp: i32, mut sig: u32, rm: RoundingMode, fl: &mut u8) -> F32 {
    let round_increment = round_increment_f32(rm, sign);
    let mut round_bits = sig & 0x7F;
    if exp as u32 >= 0xFD {
        if exp < 0 {
            // Tininess is detected after rounding: the result is tiny unless it rounds up to
            // the smallest normal.
            let is_tiny = exp < -1 || sig.wrapping_add(round_increment) < 0x8000_0000;
            sig = shift_right_jam32(sig, (-exp) as u32);
            exp = 0;
            round_bits = sig & 0x7F;
            if is_tiny && round_bits != 0 {
                *fl |= flags::UF;
            }
        } else if exp > 0xFD || sig.wrapping_add(round_increment) >= 0x8000_0000 {
            *fl |= flags::OF | flags::NX;
            // Rounding away from the overflow direction yields infinity; towards it yields the
            // largest finite value.
            return pack(sign, 0xFF, 0) - (round_increment == 0) as u32;
        }
    }
    if round_bits != 0 {
        *fl |= flags::NX;
    }
    sig = sig.wrapping_add(round_increment) >> 7;
    if rm == RoundingMode::Rne && round_bits == 0x40 {
        sig &= !1;
    }
    if sig == 0 {
        exp = 0;
    }
    pack(sign, exp, sig)
}

/// Normalizes a subnormal significand, returning `(exp, sig)` with the leading one at bit 23.
fn norm_subnormal_f32(frac: u32) -> (i32, u32) {
    let shift = frac.leading_zeros() as i32 - 8;
    (1 - shift, frac << shift)
}

fn propagate_nan(a: F32, b: F32, fl: &mut u8) -> F32 {
    if is_signaling_nan(a) || is_signaling_nan(b) {
        *fl |= flags::NV;
    }
    F32_CANONICAL_NAN
}

/// Adds the magnitudes of `a` and `b`; the result carries `a`'s sign.
fn add_mags(a: F32, b: F32, rm: RoundingMode, fl: &mut u8) -> F32 {
    let (exp_a, frac_a) = (exp(a), frac(a));
    let (exp_b, frac_b) = (exp(b), frac(b));
    let exp_diff = exp_a - exp_b;
    if exp_diff == 0 {
        if exp_a == 0 {
            // Both subnormal (or zero): exact, and a carry into the exponent field is exactly
            // the smallest-normal encoding.
            return a.wrapping_add(frac_b);
        }
        if exp_a == 0xFF {
            if frac_a | frac_b != 0 {
                return propagate_nan(a, b, fl);
            }
            return a;
        }
        let sig = (0x0100_0000 + frac_a + frac_b) << 6;
        return round_pack_f32(sign(a), exp_a, sig, rm, fl);
    }
    let (exp_big, sig_big, sig_small, shift) = if exp_diff > 0 {
        if exp_a == 0xFF {
            if frac_a != 0 {
                return propagate_nan(a, b, fl);
            }
            return a;
        }
        // A subnormal's effective exponent is one higher than its field; shifting `frac << 1`
        // by the full field difference compensates.
        let sig_b = if exp_b == 0 {
            frac_b << 1
        } else {
            frac_b | 0x0080_0000
        };
        (exp_a, frac_a | 0x0080_0000, sig_b, exp_diff as u32)
    } else {
        if exp_b == 0xFF {
            if frac_b != 0 {
                return propagate_nan(a, b, fl);
            }
            return pack(sign(a), 0xFF, 0);
        }
        let sig_a = if exp_a == 0 {
            frac_a << 1
        } else {
            frac_a | 0x0080_0000
        };
        (exp_b, frac_b | 0x0080_0000, sig_a, (-exp_diff) as u32)
    };
    let sig_big = sig_big << 6;
    let sig_small = shift_right_jam32(sig_small << 6, shift);
    let mut sig = sig_big + sig_small;
    let mut exp = exp_big;
    if sig < 0x4000_0000 {
        exp -= 1;
        sig <<= 1;
    }
    round_pack_f32(sign(a), exp, sig, rm, fl)
}

/// Subtracts the magnitude of `b` from that of `a`; the result carries `a`'s sign if `|a| > |b|`
/// and the opposite sign if `|a| < |b|`.
fn sub_mags(a: F32, b: F32, rm: RoundingMode, fl: &mut u8) -> F32 {
    let (exp_a, frac_a) = (exp(a), frac(a));
    let (exp_b, frac_b) = (exp(b), frac(b));
    let exp_diff = exp_a - exp_b;
    if exp_diff == 0 {
        if exp_a == 0xFF {
            if frac_a | frac_b != 0 {
                return propagate_nan(a, b, fl);
            }
            // inf - inf
            *fl |= flags::NV;
            return F32_CANONICAL_NAN;
        }
        // Same exponent: the implicit bits cancel and the difference is exact.
        return match frac_a.cmp(&frac_b) {
            Ordering::Equal => {
                // Exact zero result: positive except when rounding down.
                pack(rm == RoundingMode::Rdn, 0, 0)
            }
            Ordering::Greater => pack_exact_diff(sign(a), exp_a, frac_a - frac_b),
            Ordering::Less => pack_exact_diff(!sign(a), exp_a, frac_b - frac_a),
        };
    }
    let (res_sign, exp_big, sig_big, sig_small, shift) = if exp_diff > 0 {
        if exp_a == 0xFF {
            if frac_a != 0 {
                return propagate_nan(a, b, fl);
            }
            return a;
        }
        let sig_b = if exp_b == 0 {
            frac_b << 1
        } else {
            frac_b | 0x0080_0000
        };
        (sign(a), exp_a, frac_a | 0x0080_0000, sig_b, exp_diff as u32)
    } else {
        if exp_b == 0xFF {
            if frac_b != 0 {
                return propagate_nan(a, b, fl);
            }
            return pack(!sign(a), 0xFF, 0);
        }
        let sig_a = if exp_a == 0 {
            frac_a << 1
        } else {
            frac_a | 0x0080_0000
        };
        (!sign(a), exp_b, frac_b | 0x0080_0000, sig_a, (-exp_diff) as u32)
    };
    let sig_big = (sig_big as u64) << 38;
    let sig_small = shift_right_jam64((sig_small as u64) << 38, shift);
    let diff = sig_big - sig_small;
    let lz = diff.leading_zeros() as i32 - 1;
    let sig = shift_right_jam64(diff << lz, 32) as u32;
    round_pack_f32(res_sign, exp_big - lz, sig, rm, fl)
}

/// Packs the exact difference of two same-exponent significands.
fn pack_exact_diff(sign: bool, exp_a: i32, diff: u32) -> F32 {
    if exp_a == 0 {
        // Both operands subnormal: the difference is already in subnormal encoding.
        return pack(sign, 0, diff);
    }
    let exp_a = exp_a - 1;
    let mut shift = diff.leading_zeros() as i32 - 8;
    let mut exp = exp_a - shift;
    if exp < 0 {
        shift = exp_a;
        exp = 0;
    }
    pack(sign, exp, diff << shift)
}

/// `a + b`, rounded per `rm`. Returns the result bits and the exception flags raised.
pub fn f32_add(a: F32, b: F32, rm: RoundingMode) -> (F32, u8) {
    let mut fl = 0;
    let r = if sign(a) == sign(b) {
        add_mags(a, b, rm, &mut fl)
    } else {
        sub_mags(a, b, rm, &mut fl)
    };
    (r, fl)
}

/// `a - b`, rounded per `rm`.
pub fn f32_sub(a: F32, b: F32, rm: RoundingMode) -> (F32, u8) {
    f32_add(a, b ^ 0x8000_0000, rm)
}

/// `a * b`, rounded per `rm`.
pub fn f32_mul(a: F32, b: F32, rm: RoundingMode) -> (F32, u8) {
    let mut fl = 0;
    let res_sign = sign(a) != sign(b);
    let (mut exp_a, mut frac_a) = (exp(a), frac(a));
    let (mut exp_b, mut frac_b) = (exp(b), frac(b));
    if exp_a == 0xFF || exp_b == 0xFF {
        if is_nan(a) || is_nan(b) {
            return (propagate_nan(a, b, &mut fl), fl);
        }
        // inf * 0 is invalid; inf * anything-else is inf.
        let other_is_zero = if is_inf(a) { is_zero(b) } else { is_zero(a) };
        if other_is_zero {
            fl |= flags::NV;
            return (F32_CANONICAL_NAN, fl);
        }
        return (pack(res_sign, 0xFF, 0), fl);
    }
    if exp_a == 0 {
        if frac_a == 0 {
            return (pack(res_sign, 0, 0), fl);
        }
        let (e, s) = norm_subnormal_f32(frac_a);
        exp_a = e;
        frac_a = s & 0x7F_FFFF;
    }
    if exp_b == 0 {
        if frac_b == 0 {
            return (pack(res_sign, 0, 0), fl);
        }
        let (e, s) = norm_subnormal_f32(frac_b);
        exp_b = e;
        frac_b = s & 0x7F_FFFF;
    }
    let mut exp = exp_a + exp_b - 0x7F;
    let sig_a = ((frac_a | 0x0080_0000) as u64) << 7;
    let sig_b = ((frac_b | 0x0080_0000) as u64) << 8;
    let mut sig = shift_right_jam64(sig_a * sig_b, 32) as u32;
    if sig < 0x4000_0000 {
        exp -= 1;
        sig <<= 1;
    }
    (round_pack_f32(res_sign, exp, sig, rm, &mut fl), fl)
}

/// Fused `a * b + c` with a single rounding, per `rm`.
pub fn f32_mul_add(a: F32, b: F32, c: F32, rm: RoundingMode) -> (F32, u8) {
    let mut fl = 0;
    let prod_sign = sign(a) != sign(b);
    if is_nan(a) || is_nan(b) || is_nan(c) {
        if is_signaling_nan(a) || is_signaling_nan(b) || is_signaling_nan(c) {
            fl |= flags::NV;
        }
        // (inf * 0) + qNaN is still invalid.
        if (is_inf(a) && is_zero(b)) || (is_inf(b) && is_zero(a)) {
            fl |= flags::NV;
        }
        return (F32_CANONICAL_NAN, fl);
    }
    if is_inf(a) || is_inf(b) {
        let other_is_zero = if is_inf(a) { is_zero(b) } else { is_zero(a) };
        if other_is_zero || (is_inf(c) && sign(c) != prod_sign) {
            fl |= flags::NV;
            return (F32_CANONICAL_NAN, fl);
        }
        return (pack(prod_sign, 0xFF, 0), fl);
    }
    if is_inf(c) {
        return (c, fl);
    }
    // Decompose to exact integers: value = sig * 2^scale, with sig of at most 48 bits.
    let decompose = |x: F32| -> Option<(i32, u64)> {
        let (e, f) = (exp(x), frac(x));
        if e == 0 {
            if f == 0 {
                return None;
            }
            let (e, s) = norm_subnormal_f32(f);
            Some((e - 150, s as u64))
        } else {
            Some((e - 150, (f | 0x0080_0000) as u64))
        }
    };
    let ab = match (decompose(a), decompose(b)) {
        (Some((ea, sa)), Some((eb, sb))) => Some((ea + eb, sa * sb)),
        _ => None,
    };
    let cc = decompose(c);
    let (result_sign, exp_scale, mut sig): (bool, i32, u128) = match (ab, cc) {
        (None, None) => {
            // +-0 + +-0: signs combine like addition.
            let zero_sign = if prod_sign == sign(c) {
                prod_sign
            } else {
                rm == RoundingMode::Rdn
            };
            return (pack(zero_sign, 0, 0), fl);
        }
        (None, Some((ec, sc))) => (sign(c), ec, sc as u128),
        (Some((eab, sab)), None) => (prod_sign, eab, sab as u128),
        (Some((eab, sab)), Some((ec, sc))) => {
            // Align to the smaller scale. Beyond 63 bits of shift the smaller term can only
            // influence the sticky bit.
            let (hi_e, hi_s, hi_sign, lo_e, lo_s, lo_sign) = if eab >= ec {
                (eab, sab as u128, prod_sign, ec, sc as u128, sign(c))
            } else {
                (ec, sc as u128, sign(c), eab, sab as u128, prod_sign)
            };
            let shift = (hi_e - lo_e) as u32;
            let (hi_aligned, lo_aligned, scale) = if shift < 64 {
                (hi_s << shift, lo_s, lo_e)
            } else {
                (hi_s << 63, (lo_s != 0) as u128, hi_e - 63)
            };
            if hi_sign == lo_sign {
                (hi_sign, scale, hi_aligned + lo_aligned)
            } else {
                match hi_aligned.cmp(&lo_aligned) {
                    Ordering::Equal => return (pack(rm == RoundingMode::Rdn, 0, 0), fl),
                    Ordering::Greater => (hi_sign, scale, hi_aligned - lo_aligned),
                    Ordering::Less => (lo_sign, scale, lo_aligned - hi_aligned),
                }
            }
        }
    };
    // Normalize into round-pack form: leading one at bit 30 with sticky compression.
    debug_assert!(sig != 0);
    let msb = 127 - sig.leading_zeros() as i32;
    let shift = msb - 30;
    if shift > 0 {
        let sticky = (sig & ((1u128 << shift) - 1) != 0) as u128;
        sig = (sig >> shift) | sticky;
    } else {
        sig <<= -shift;
    }
    let exp = exp_scale + msb + 126;
    (
        round_pack_f32(result_sign, exp, sig as u32, rm, &mut fl),
        fl,
    )
}

/// `a / b`, rounded per `rm`.
pub fn f32_div(a: F32, b: F32, rm: RoundingMode) -> (F32, u8) {
    let mut fl = 0;
    let res_sign = sign(a) != sign(b);
    let (mut exp_a, mut frac_a) = (exp(a), frac(a));
    let (mut exp_b, mut frac_b) = (exp(b), frac(b));
    if is_nan(a) || is_nan(b) {
        return (propagate_nan(a, b, &mut fl), fl);
    }
    if exp_a == 0xFF {
        if exp_b == 0xFF {
            fl |= flags::NV;
            return (F32_CANONICAL_NAN, fl);
        }
        return (pack(res_sign, 0xFF, 0), fl);
    }
    if exp_b == 0xFF {
        return (pack(res_sign, 0, 0), fl);
    }
    if exp_b == 0 && frac_b == 0 {
        if exp_a == 0 && frac_a == 0 {
            fl |= flags::NV;
            return (F32_CANONICAL_NAN, fl);
        }
        fl |= flags::DZ;
        return (pack(res_sign, 0xFF, 0), fl);
    }
    if exp_a == 0 {
        if frac_a == 0 {
            return (pack(res_sign, 0, 0), fl);
        }
        let (e, s) = norm_subnormal_f32(frac_a);
        exp_a = e;
        frac_a = s & 0x7F_FFFF;
    }
    if exp_b == 0 {
        let (e, s) = norm_subnormal_f32(frac_b);
        exp_b = e;
        frac_b = s & 0x7F_FFFF;
    }
    let mut exp = exp_a - exp_b + 0x7E;
    let sig_a = (frac_a | 0x0080_0000) as u64;
    let sig_b = (frac_b | 0x0080_0000) as u64;
    let dividend = if sig_a < sig_b {
        exp -= 1;
        sig_a << 31
    } else {
        sig_a << 30
    };
    let quot = dividend / sig_b;
    let rem = dividend % sig_b;
    let sig = (quot as u32) | ((rem != 0) as u32);
    (round_pack_f32(res_sign, exp, sig, rm, &mut fl), fl)
}

/// `sqrt(a)`, rounded per `rm`.
pub fn f32_sqrt(a: F32, rm: RoundingMode) -> (F32, u8) {
    let mut fl = 0;
    if is_nan(a) {
        if is_signaling_nan(a) {
            fl |= flags::NV;
        }
        return (F32_CANONICAL_NAN, fl);
    }
    if is_zero(a) {
        return (a, fl);
    }
    if sign(a) {
        fl |= flags::NV;
        return (F32_CANONICAL_NAN, fl);
    }
    if is_inf(a) {
        return (a, fl);
    }
    let (mut exp_a, mut frac_a) = (exp(a), frac(a));
    if exp_a == 0 {
        let (e, s) = norm_subnormal_f32(frac_a);
        exp_a = e;
        frac_a = s & 0x7F_FFFF;
    }
    // Scale the significand so the scaled exponent is even, take the integer square root (a
    // 31-bit result), and jam inexactness into the sticky bit.
    let sig = (frac_a | 0x0080_0000) as u64;
    let scaled = if exp_a & 1 == 0 { sig << 38 } else { sig << 37 };
    let root = integer_sqrt(scaled);
    let exact = root * root == scaled;
    let sig = (root as u32) | (!exact as u32);
    (
        round_pack_f32(false, (exp_a + 125) >> 1, sig, rm, &mut fl),
        fl,
    )
}

fn integer_sqrt(value: u64) -> u64 {
    if value == 0 {
        return 0;
    }
    let mut x = 1u64 << (value.ilog2() / 2 + 1);
    loop {
        let next = (x + value / x) / 2;
        if next >= x {
            return x;
        }
        x = next;
    }
}

/// IEEE 754-201x `minimumNumber`, with the RISC-V refinement that `-0.0 < +0.0`.
pub fn f32_min(a: F32, b: F32) -> (F32, u8) {
    min_max(a, b, true)
}

/// IEEE 754-201x `maximumNumber`, with the RISC-V refinement that `-0.0 < +0.0`.
pub fn f32_max(a: F32, b: F32) -> (F32, u8) {
    min_max(a, b, false)
}

fn min_max(a: F32, b: F32, take_min: bool) -> (F32, u8) {
    let mut fl = 0;
    if is_signaling_nan(a) || is_signaling_nan(b) {
        fl |= flags::NV;
    }
    match (is_nan(a), is_nan(b)) {
        (true, true) => return (F32_CANONICAL_NAN, fl),
        (true, false) => return (b, fl),
        (false, true) => return (a, fl),
        (false, false) => {}
    }
    let a_smaller = match order_key(a).cmp(&order_key(b)) {
        Ordering::Less => true,
        Ordering::Greater => false,
        // Equal keys means equal values; prefer the negative-signed encoding for min.
        Ordering::Equal => sign(a),
    };
    let r = if a_smaller == take_min { a } else { b };
    (r, fl)
}

/// Total order on the sign-magnitude encoding (treating `-0.0 < +0.0` as equal here; the zero
/// tie-break is the caller's concern).
fn order_key(x: F32) -> i64 {
    if sign(x) {
        -((x & 0x7FFF_FFFF) as i64)
    } else {
        x as i64
    }
}

/// Quiet equality. Signaling NaN operands raise NV; any NaN compares unequal.
pub fn f32_eq(a: F32, b: F32) -> (bool, u8) {
    let mut fl = 0;
    if is_nan(a) || is_nan(b) {
        if is_signaling_nan(a) || is_signaling_nan(b) {
            fl |= flags::NV;
        }
        return (false, fl);
    }
    ((a == b) || (is_zero(a) && is_zero(b)), fl)
}

/// Signaling less-than. Any NaN operand raises NV and compares false.
pub fn f32_lt(a: F32, b: F32) -> (bool, u8) {
    if is_nan(a) || is_nan(b) {
        return (false, flags::NV);
    }
    if is_zero(a) && is_zero(b) {
        return (false, 0);
    }
    (order_key(a) < order_key(b), 0)
}

/// Signaling less-or-equal. Any NaN operand raises NV and compares false.
pub fn f32_le(a: F32, b: F32) -> (bool, u8) {
    if is_nan(a) || is_nan(b) {
        return (false, flags::NV);
    }
    if is_zero(a) && is_zero(b) {
        return (true, 0);
    }
    (order_key(a) <= order_key(b), 0)
}

/// Classifies `a` into the ten `fclass` categories, returned as the architectural bitmask.
pub fn f32_classify(a: F32) -> u32 {
    let s = sign(a);
    match (exp(a), frac(a)) {
        (0xFF, 0) => {
            if s {
                1 << 0
            } else {
                1 << 7
            }
        }
        (0xFF, f) => {
            if f & 0x40_0000 != 0 {
                1 << 9
            } else {
                1 << 8
            }
        }
        (0, 0) => {
            if s {
                1 << 3
            } else {
                1 << 4
            }
        }
        (0, _) => {
            if s {
                1 << 2
            } else {
                1 << 5
            }
        }
        _ => {
            if s {
                1 << 1
            } else {
                1 << 6
            }
        }
    }
}

/// Converts binary32 to an integer of `bits` bits, per RISC-V semantics: NaN and out-of-range
/// inputs convert to the nearest representable bound and raise only NV.
fn f32_to_int(a: F32, rm: RoundingMode, bits: u32, signed: bool) -> (u64, u8) {
    let mut fl = 0;
    let (max, min): (u64, i64) = match (bits, signed) {
        (32, true) => (i32::MAX as u64, i32::MIN as i64),
        (32, false) => (u32::MAX as u64, 0),
        (64, true) => (i64::MAX as u64, i64::MIN),
        (64, false) => (u64::MAX, 0),
        _ => unreachable!(),
    };
    if is_nan(a) {
        return (max, flags::NV);
    }
    let neg = sign(a);
    if is_inf(a) {
        return (if neg { min as u64 } else { max }, flags::NV);
    }
    if is_zero(a) {
        return (0, fl);
    }
    let (e, sig) = if exp(a) == 0 {
        let (e, s) = norm_subnormal_f32(frac(a));
        (e, s as u64)
    } else {
        (exp(a), (frac(a) | 0x0080_0000) as u64)
    };
    // value = sig * 2^(e - 150)
    let shift = e - 150;
    let (int_part, round_code) = if shift >= 0 {
        if shift > 40 {
            // Out of range for any supported width.
            return (if neg { min as u64 } else { max }, flags::NV);
        }
        (sig << shift, RoundCode::Exact)
    } else {
        let s = (-shift) as u32;
        if s >= 64 {
            (0, RoundCode::BelowHalf)
        } else {
            let int = sig >> s;
            let rem = sig & ((1u64 << s) - 1);
            let half = 1u64 << (s - 1);
            let code = match rem.cmp(&half) {
                Ordering::Equal => RoundCode::Half,
                Ordering::Greater => RoundCode::AboveHalf,
                Ordering::Less if rem != 0 => RoundCode::BelowHalf,
                Ordering::Less => RoundCode::Exact,
            };
            (int, code)
        }
    };
    let rounded = int_part + round_code.increment(rm, neg, int_part);
    if round_code != RoundCode::Exact {
        fl |= flags::NX;
    }
    if neg {
        if !signed || rounded > min.unsigned_abs() {
            if rounded != 0 {
                return (min as u64, flags::NV);
            }
            return (0, fl);
        }
        (rounded.wrapping_neg(), fl)
    } else {
        if rounded > max {
            return (max, flags::NV);
        }
        (rounded, fl)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum RoundCode {
    Exact,
    BelowHalf,
    Half,
    AboveHalf,
}

impl RoundCode {
    fn increment(self, rm: RoundingMode, neg: bool, int_part: u64) -> u64 {
        if self == RoundCode::Exact {
            return 0;
        }
        match rm {
            RoundingMode::Rtz => 0,
            RoundingMode::Rdn => neg as u64,
            RoundingMode::Rup => !neg as u64,
            RoundingMode::Rne => match self {
                RoundCode::AboveHalf => 1,
                RoundCode::Half => int_part & 1,
                _ => 0,
            },
            RoundingMode::Rmm => matches!(self, RoundCode::Half | RoundCode::AboveHalf) as u64,
        }
    }
}

pub fn f32_to_i32(a: F32, rm: RoundingMode) -> (i32, u8) {
    let (v, fl) = f32_to_int(a, rm, 32, true);
    (v as i32, fl)
}

pub fn f32_to_u32(a: F32, rm: RoundingMode) -> (u32, u8) {
    let (v, fl) = f32_to_int(a, rm, 32, false);
    (v as u32, fl)
}

pub fn f32_to_i64(a: F32, rm: RoundingMode) -> (i64, u8) {
    let (v, fl) = f32_to_int(a, rm, 64, true);
    (v as i64, fl)
}

pub fn f32_to_u64(a: F32, rm: RoundingMode) -> (u64, u8) {
    f32_to_int(a, rm, 64, false)
}

/// Converts a 64-bit unsigned integer to binary32, rounded per `rm`.
pub fn u64_to_f32(value: u64, rm: RoundingMode) -> (F32, u8) {
    let mut fl = 0;
    if value == 0 {
        return (0, fl);
    }
    let msb = 63 - value.leading_zeros() as i32;
    let sig = if msb <= 30 {
        (value as u32) << (30 - msb)
    } else {
        shift_right_jam64(value, (msb - 30) as u32) as u32
    };
    (round_pack_f32(false, msb + 126, sig, rm, &mut fl), fl)
}

pub fn i64_to_f32(value: i64, rm: RoundingMode) -> (F32, u8) {
    if value >= 0 {
        u64_to_f32(value as u64, rm)
    } else {
        let (r, fl) = u64_to_f32(value.unsigned_abs(), rm_negate(rm));
        (r | 0x8000_0000, fl)
    }
}

pub fn u32_to_f32(value: u32, rm: RoundingMode) -> (F32, u8) {
    u64_to_f32(value as u64, rm)
}

pub fn i32_to_f32(value: i32, rm: RoundingMode) -> (F32, u8) {
    i64_to_f32(value as i64, rm)
}

/// Mirror a rounding mode for negated operands (RDN and RUP swap).
fn rm_negate(rm: RoundingMode) -> RoundingMode {
    match rm {
        RoundingMode::Rdn => RoundingMode::Rup,
        RoundingMode::Rup => RoundingMode::Rdn,
        other => other,
    }
}

/// Widens binary16 to binary32. Exact; only a signaling-NaN input raises a flag.
pub fn f16_to_f32(a: F16) -> (F32, u8) {
    let mut fl = 0;
    let s = (a >> 15) as u32;
    let e = ((a >> 10) & 0x1F) as u32;
    let f = (a & 0x3FF) as u32;
    let r = if e == 0x1F {
        if f != 0 {
            if f & 0x200 == 0 {
                fl |= flags::NV;
            }
            F32_CANONICAL_NAN
        } else {
            (s << 31) | 0x7F80_0000
        }
    } else if e == 0 {
        if f == 0 {
            s << 31
        } else {
            let shift = f.leading_zeros() - 21;
            let f = (f << shift) & 0x3FF;
            let e = 127 - 15 + 1 - shift;
            (s << 31) | (e << 23) | (f << 13)
        }
    } else {
        (s << 31) | ((e + 127 - 15) << 23) | (f << 13)
    };
    (r, fl)
}

/// Narrows binary32 to binary16, rounded per `rm`.
pub fn f32_to_f16(a: F32, rm: RoundingMode) -> (F16, u8) {
    let mut fl = 0;
    let s = sign(a);
    if is_nan(a) {
        if is_signaling_nan(a) {
            fl |= flags::NV;
        }
        return (F16_CANONICAL_NAN, fl);
    }
    if is_inf(a) {
        return (((s as u16) << 15) | 0x7C00, fl);
    }
    let (mut e, mut f) = (exp(a), frac(a));
    if e == 0 {
        if f == 0 {
            return ((s as u16) << 15, fl);
        }
        let (ne, ns) = norm_subnormal_f32(f);
        e = ne;
        f = ns & 0x7F_FFFF;
    }
    // Rebias into binary16 and collapse the extra mantissa width into four round bits: the
    // half-precision round-pack form has the leading one at bit 14.
    let sig = (f | 0x0080_0000) as u64;
    let sig15 = shift_right_jam64(sig << 5, 14) as u32;
    (round_pack_f16(s, e - 113, sig15, rm, &mut fl), fl)
}

/// binary16 analogue of [`round_pack_f32`]: `sig` has the leading one at bit 14 and four round
/// bits at the bottom; the represented value is `sig * 2^(exp - 28)`.
fn round_pack_f16(sign: bool, mut exp: i32, mut sig: u32, rm: RoundingMode, fl: &mut u8) -> F16 {
    let round_increment: u32 = match rm {
        RoundingMode::Rne | RoundingMode::Rmm => 0x8,
        RoundingMode::Rtz => 0,
        RoundingMode::Rdn => {
            if sign {
                0xF
            } else {
                0
            }
        }
        RoundingMode::Rup => {
            if sign {
                0
            } else {
                0xF
            }
        }
    };
    let mut round_bits = sig & 0xF;
    if exp as u32 >= 0x1D {
        if exp < 0 {
            let is_tiny = exp < -1 || sig + round_increment < 0x8000;
            sig = shift_right_jam32(sig, (-exp) as u32);
            exp = 0;
            round_bits = sig & 0xF;
            if is_tiny && round_bits != 0 {
                *fl |= flags::UF;
            }
        } else if exp > 0x1D || sig + round_increment >= 0x8000 {
            *fl |= flags::OF | flags::NX;
            let inf = ((sign as u16) << 15) | 0x7C00;
            return inf - (round_increment == 0) as u16;
        }
    }
    if round_bits != 0 {
        *fl |= flags::NX;
    }
    sig = (sig + round_increment) >> 4;
    if rm == RoundingMode::Rne && round_bits == 0x8 {
        sig &= !1;
    }
    if sig == 0 {
        exp = 0;
    }
    ((sign as u16) << 15)
        .wrapping_add((exp as u16) << 10)
        .wrapping_add(sig as u16)
}

/// `acc + widen(a) * widen(b)` with a single rounding: the mixed-precision multiply-accumulate
/// used by the fp16-input tensor datapath. Both binary16 factors widen exactly, so this is an
/// ordinary binary32 fused multiply-add.
pub fn f1632_mul_add(a: F16, b: F16, acc: F32, rm: RoundingMode) -> (F32, u8) {
    let (wa, fl_a) = f16_to_f32(a);
    let (wb, fl_b) = f16_to_f32(b);
    let (r, fl) = f32_mul_add(wa, wb, acc, rm);
    (r, fl | fl_a | fl_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use RoundingMode::*;

    fn f(value: f32) -> F32 {
        value.to_bits()
    }

    #[test]
    fn test_add_basic() {
        assert_eq!((f(3.0), 0), f32_add(f(1.0), f(2.0), Rne));
        assert_eq!((f(0.0), 0), f32_add(f(1.5), f(-1.5), Rne));
        assert_eq!((f(1.0e10), 0), f32_add(f(1.0e10), f(0.0), Rne));
        assert_eq!((f(0.75), 0), f32_add(f(2.0), f(-1.25), Rne));
    }

    #[test]
    fn test_add_matches_host_rne() {
        // The host rounds to nearest-even, so spot checks against it are valid for Rne.
        for (a, b) in [
            (3.14159f32, 2.71828f32),
            (1.0e-40f32, 1.0e-40f32),
            (1.0e38f32, 1.7e38f32),
            (1.0f32, f32::EPSILON),
            (-1.0e30f32, 1.0e10f32),
            (1.0e-45f32, -1.0e-39f32),
        ] {
            assert_eq!((a + b).to_bits(), f32_add(f(a), f(b), Rne).0, "{a} + {b}");
        }
    }

    #[test]
    fn test_add_rounding_directed() {
        // 1.0 + 2^-25 is inexact; RTZ/RDN keep 1.0, RUP bumps an ulp.
        let tiny = f(2.0f32.powi(-25));
        assert_eq!(f(1.0), f32_add(f(1.0), tiny, Rtz).0);
        assert_eq!(f(1.0), f32_add(f(1.0), tiny, Rdn).0);
        assert_eq!(f(1.0) + 1, f32_add(f(1.0), tiny, Rup).0);
        assert_eq!(flags::NX, f32_add(f(1.0), tiny, Rne).1);
    }

    #[test]
    fn test_sub_exact() {
        assert_eq!(f(0.0), f32_sub(f(1.0), f(1.0), Rne).0);
        assert_eq!(f(-0.0), f32_sub(f(1.0), f(1.0), Rdn).0);
        assert_eq!(f(1.0), f32_sub(f(3.0), f(2.0), Rne).0);
        // Exact subnormal difference.
        let a = f32::from_bits(3);
        let b = f32::from_bits(1);
        assert_eq!(2, f32_sub(f(a), f(b), Rne).0);
    }

    #[test]
    fn test_mul() {
        assert_eq!((f(6.0), 0), f32_mul(f(2.0), f(3.0), Rne));
        assert_eq!((f(-6.0), 0), f32_mul(f(-2.0), f(3.0), Rne));
        let (r, fl) = f32_mul(f(1.0e38), f(1.0e38), Rne);
        assert_eq!(f(f32::INFINITY), r);
        assert_eq!(flags::OF | flags::NX, fl);
        let (r, fl) = f32_mul(f(f32::INFINITY), f(0.0), Rne);
        assert_eq!(F32_CANONICAL_NAN, r);
        assert_eq!(flags::NV, fl);
    }

    #[test]
    fn test_mul_matches_host_rne() {
        for (a, b) in [
            (3.14159f32, 2.71828f32),
            (1.5e-20f32, 2.5e-20f32),
            (123.456f32, -0.0078125f32),
            (1.0e-39f32, 0.5f32),
        ] {
            assert_eq!((a * b).to_bits(), f32_mul(f(a), f(b), Rne).0, "{a} * {b}");
        }
    }

    #[test]
    fn test_mul_overflow_directed() {
        // Towards zero, overflow saturates at the largest finite value.
        let (r, fl) = f32_mul(f(1.0e38), f(1.0e38), Rtz);
        assert_eq!(f(f32::MAX), r);
        assert_eq!(flags::OF | flags::NX, fl);
        let (r, _) = f32_mul(f(-1.0e38), f(1.0e38), Rup);
        assert_eq!(f(f32::MIN), r);
    }

    #[test]
    fn test_mul_add_fused() {
        let a = f(4096.0);
        let c = f(-16777216.0);
        let (r, _) = f32_mul_add(a, a, c, Rne);
        assert_eq!(f(0.0), r);
        // Fused vs unfused difference: (1 + 2^-12)^2 has a 2^-24 term a separate mul drops.
        let x = f(1.0 + 2.0f32.powi(-12));
        let (fused, _) = f32_mul_add(x, x, f(-1.0), Rne);
        let expected = 2.0f32.powi(-11) + 2.0f32.powi(-24);
        assert_eq!(f(expected), fused);
    }

    #[test]
    fn test_mul_add_matches_host_fma() {
        for (a, b, c) in [
            (3.14159f32, 2.71828f32, -8.5f32),
            (1.0e-20f32, 1.0e-20f32, 1.0f32),
            (-7.25f32, 0.125f32, 1.0e-30f32),
            (1.0e20f32, 1.0e18f32, -1.0e38f32),
        ] {
            let (r, _) = f32_mul_add(f(a), f(b), f(c), Rne);
            assert_eq!(a.mul_add(b, c).to_bits(), r, "fma({a}, {b}, {c})");
        }
    }

    #[test]
    fn test_mul_add_specials() {
        let (r, fl) = f32_mul_add(f(f32::INFINITY), f(1.0), f(f32::NEG_INFINITY), Rne);
        assert_eq!(F32_CANONICAL_NAN, r);
        assert_eq!(flags::NV, fl);
        let (r, _) = f32_mul_add(f(0.0), f(5.0), f(-0.0), Rne);
        assert_eq!(f(0.0), r);
        let (r, _) = f32_mul_add(f(-0.0), f(5.0), f(-0.0), Rne);
        assert_eq!(f(-0.0), r);
    }

    #[test]
    fn test_div() {
        assert_eq!((f(2.5), 0), f32_div(f(5.0), f(2.0), Rne));
        let (r, fl) = f32_div(f(1.0), f(0.0), Rne);
        assert_eq!(f(f32::INFINITY), r);
        assert_eq!(flags::DZ, fl);
        let (r, fl) = f32_div(f(0.0), f(0.0), Rne);
        assert_eq!(F32_CANONICAL_NAN, r);
        assert_eq!(flags::NV, fl);
        for (a, b) in [(1.0f32, 3.0f32), (2.0e19f32, 7.0f32), (1.0f32, 1.0e-40f32)] {
            assert_eq!((a / b).to_bits(), f32_div(f(a), f(b), Rne).0, "{a} / {b}");
        }
    }

    #[test]
    fn test_sqrt() {
        assert_eq!((f(3.0), 0), f32_sqrt(f(9.0), Rne));
        assert_eq!((f(0.0), 0), f32_sqrt(f(0.0), Rne));
        assert_eq!((f(-0.0), 0), f32_sqrt(f(-0.0), Rne));
        let (r, fl) = f32_sqrt(f(-1.0), Rne);
        assert_eq!(F32_CANONICAL_NAN, r);
        assert_eq!(flags::NV, fl);
        for a in [2.0f32, 3.0, 0.5, 1.0e-38, 1.234e20, 1.0e-42] {
            assert_eq!(a.sqrt().to_bits(), f32_sqrt(f(a), Rne).0, "sqrt({a})");
        }
    }

    #[test]
    fn test_min_max_zeroes_and_nan() {
        assert_eq!(f(-0.0), f32_min(f(0.0), f(-0.0)).0);
        assert_eq!(f(0.0), f32_max(f(0.0), f(-0.0)).0);
        assert_eq!(f(-2.0), f32_min(f(-2.0), f(1.0)).0);
        assert_eq!(f(1.0), f32_max(f(-2.0), f(1.0)).0);
        // Quiet NaN yields the other operand.
        assert_eq!(f(1.0), f32_min(F32_CANONICAL_NAN, f(1.0)).0);
        assert_eq!(
            F32_CANONICAL_NAN,
            f32_max(F32_CANONICAL_NAN, F32_CANONICAL_NAN).0
        );
    }

    #[test]
    fn test_compares() {
        assert_eq!((true, 0), f32_lt(f(-1.0), f(1.0)));
        assert_eq!((false, 0), f32_lt(f(0.0), f(-0.0)));
        assert_eq!((true, 0), f32_le(f(0.0), f(-0.0)));
        assert_eq!((true, 0), f32_eq(f(0.0), f(-0.0)));
        assert_eq!((false, flags::NV), f32_lt(F32_CANONICAL_NAN, f(1.0)));
        assert_eq!((false, 0), f32_eq(F32_CANONICAL_NAN, f(1.0)));
    }

    #[test]
    fn test_f32_to_i32() {
        assert_eq!((3, 0), f32_to_i32(f(3.0), Rne));
        assert_eq!((2, flags::NX), f32_to_i32(f(2.5), Rne));
        assert_eq!((4, flags::NX), f32_to_i32(f(3.5), Rne));
        assert_eq!((3, flags::NX), f32_to_i32(f(2.5), Rmm));
        assert_eq!((2, flags::NX), f32_to_i32(f(2.7), Rtz));
        assert_eq!((-3, flags::NX), f32_to_i32(f(-2.5), Rdn));
        assert_eq!((-2, flags::NX), f32_to_i32(f(-2.5), Rup));
        assert_eq!((i32::MAX, flags::NV), f32_to_i32(f(1.0e10), Rne));
        assert_eq!((i32::MIN, flags::NV), f32_to_i32(f(-1.0e10), Rne));
        assert_eq!((i32::MAX, flags::NV), f32_to_i32(F32_CANONICAL_NAN, Rne));
        assert_eq!((0, flags::NV), f32_to_u32(f(-1.0), Rne));
        assert_eq!((0, flags::NX), f32_to_u32(f(-0.25), Rne));
    }

    #[test]
    fn test_int_to_f32() {
        assert_eq!(f(16.0), i32_to_f32(16, Rne).0);
        assert_eq!(f(-16.0), i32_to_f32(-16, Rne).0);
        // 2^24 + 1 is inexact in binary32.
        let (r, fl) = u32_to_f32(0x0100_0001, Rne);
        assert_eq!(f(16777216.0), r);
        assert_eq!(flags::NX, fl);
        assert_eq!((u64::MAX as f32).to_bits(), u64_to_f32(u64::MAX, Rne).0);
        assert_eq!((i64::MIN as f32).to_bits(), i64_to_f32(i64::MIN, Rne).0);
    }

    #[test]
    fn test_f16_conversions() {
        assert_eq!((f(1.0), 0), f16_to_f32(0x3C00));
        assert_eq!((f(-2.0), 0), f16_to_f32(0xC000));
        assert_eq!((0x3C00, 0), f32_to_f16(f(1.0), Rne));
        assert_eq!((0x7C00, flags::OF | flags::NX), f32_to_f16(f(1.0e6), Rne));
        // Host cross-check over every finite binary16 encoding, and exact round-trip.
        for encoded in 0..0x7C00u16 {
            let (wide, fl) = f16_to_f32(encoded);
            assert_eq!(0, fl);
            assert_eq!(
                half_decode_reference(encoded),
                f32::from_bits(wide),
                "f16 {encoded:#06x}"
            );
            assert_eq!((encoded, 0), f32_to_f16(wide, Rne));
        }
    }

    fn half_decode_reference(encoded: u16) -> f32 {
        let s = if encoded >> 15 != 0 { -1.0f32 } else { 1.0 };
        let e = ((encoded >> 10) & 0x1F) as i32;
        let f = (encoded & 0x3FF) as f32;
        match e {
            0 => s * f * 2.0f32.powi(-24),
            _ => s * (1.0 + f / 1024.0) * 2.0f32.powi(e - 15),
        }
    }

    #[test]
    fn test_f1632_mul_add() {
        // 1.5 (f16) * 2.0 (f16) + 0.25 = 3.25
        let (r, _) = f1632_mul_add(0x3E00, 0x4000, f(0.25), Rne);
        assert_eq!(f(3.25), r);
    }

    #[test]
    fn test_classify() {
        assert_eq!(1 << 0, f32_classify(f(f32::NEG_INFINITY)));
        assert_eq!(1 << 4, f32_classify(f(0.0)));
        assert_eq!(1 << 3, f32_classify(f(-0.0)));
        assert_eq!(1 << 6, f32_classify(f(1.0)));
        assert_eq!(1 << 2, f32_classify(f(-1.0e-42)));
        assert_eq!(1 << 9, f32_classify(F32_CANONICAL_NAN));
    }
}
