//! Fixed-width bit representations of field values.
//!
//! Every readable or writable field owns one [`Serializer`]. The serializer
//! fixes the field's wire width for its whole lifetime and carries the
//! bounds needed to quantize numeric values. Encoding never fails: values
//! outside the bounds are clamped. Decoding fails only when the bits cannot
//! have come from a valid encoding (e.g. an integer above its declared max).

use core::f64::consts::SQRT_2;
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use serde::{Deserialize, Serialize};

/// A field's serialized bits, first bit on the wire first.
pub type BitArray = Vec<bool>;

/// Bits needed to represent every value in `0..=max`, i.e.
/// `ceil(log2(max + 1))`. Zero for `max == 0`.
pub const fn bit_width(max: u64) -> usize {
    (u64::BITS - max.leading_zeros()) as usize
}

/// Appends the low `bits` bits of `value`, LSB first.
pub fn push_uint(dest: &mut BitArray, value: u64, bits: usize) {
    for i in 0..bits {
        dest.push(i < 64 && (value >> i) & 1 == 1);
    }
}

/// Reads `bits.len()` bits (at most 64), LSB first.
pub fn read_uint(bits: &[bool]) -> u64 {
    bits.iter()
        .take(64)
        .enumerate()
        .fold(0, |acc, (i, &bit)| if bit { acc | (1 << i) } else { acc })
}

fn quantize(value: f64, min: f64, max: f64, bits: usize) -> u64 {
    let levels = ((1u64 << bits) - 1) as f64;
    if value.is_nan() {
        return 0;
    }
    let clamped = value.clamp(min, max);
    let scaled = ((clamped - min) / (max - min) * levels).round();
    scaled.clamp(0.0, levels) as u64
}

fn dequantize(raw: u64, min: f64, max: f64, bits: usize) -> f64 {
    let levels = ((1u64 << bits) - 1) as f64;
    min + (raw as f64 / levels) * (max - min)
}

/// A value type that can live in a readable or writable field.
///
/// `print`/`parse` give the textual form used by the ground tools when
/// reading or writing a field by name.
pub trait Serializable: Clone + Default + Debug + Send + Sync + 'static {
    fn serialize(sr: &Serializer<Self>, value: &Self, dest: &mut BitArray);
    fn deserialize(sr: &Serializer<Self>, src: &[bool]) -> Option<Self>;
    fn print(value: &Self) -> String;
    fn parse(text: &str) -> Option<Self>;
}

/// Quantization parameters recorded by a serializer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Bounds {
    None,
    Unsigned(u64),
    Signed(i64, i64),
    Range(f64, f64),
}

pub struct Serializer<T> {
    bitsize: usize,
    bounds: Bounds,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for Serializer<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Serializer<T> {}

impl<T> fmt::Debug for Serializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("bitsize", &self.bitsize)
            .field("bounds", &self.bounds)
            .finish()
    }
}

impl<T> Serializer<T> {
    const fn with_bounds(bitsize: usize, bounds: Bounds) -> Self {
        Self { bitsize, bounds, _value: PhantomData }
    }

    pub fn bitsize(&self) -> usize {
        self.bitsize
    }

    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    fn unsigned_max(&self) -> u64 {
        match self.bounds {
            Bounds::Unsigned(max) => max,
            _ if self.bitsize >= 64 => u64::MAX,
            _ => (1 << self.bitsize) - 1,
        }
    }

    fn signed_range(&self) -> (i64, i64) {
        match self.bounds {
            Bounds::Signed(min, max) => (min, max),
            _ => (0, 0),
        }
    }

    fn range(&self) -> (f64, f64) {
        match self.bounds {
            Bounds::Range(min, max) => (min, max),
            _ => (0.0, 1.0),
        }
    }
}

impl<T: Serializable> Serializer<T> {
    pub fn serialize(&self, value: &T) -> BitArray {
        let mut bits = Vec::with_capacity(self.bitsize);
        T::serialize(self, value, &mut bits);
        debug_assert_eq!(bits.len(), self.bitsize, "serializer wrote the wrong number of bits");
        bits
    }

    /// Decodes exactly `bitsize()` bits; any other length is a failure.
    pub fn deserialize(&self, src: &[bool]) -> Option<T> {
        if src.len() != self.bitsize {
            return None;
        }
        T::deserialize(self, src)
    }
}

impl Serializer<bool> {
    pub fn new() -> Self {
        Self::with_bounds(1, Bounds::None)
    }
}

impl Default for Serializer<bool> {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializable for bool {
    fn serialize(_sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
        dest.push(*value);
    }

    fn deserialize(_sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
        src.first().copied()
    }

    fn print(value: &Self) -> String {
        value.to_string()
    }

    fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }
}

macro_rules! unsigned_serializer {
    ($($t:ty),*) => {$(
        impl Serializer<$t> {
            /// Values in `0..=max`, `ceil(log2(max + 1))` bits wide.
            pub fn new(max: $t) -> Self {
                Self::with_bounds(bit_width(max as u64).max(1), Bounds::Unsigned(max as u64))
            }
        }

        impl Serializable for $t {
            fn serialize(sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
                let clamped = (*value as u64).min(sr.unsigned_max());
                push_uint(dest, clamped, sr.bitsize);
            }

            fn deserialize(sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
                let raw = read_uint(src);
                if raw > sr.unsigned_max() {
                    return None;
                }
                <$t>::try_from(raw).ok()
            }

            fn print(value: &Self) -> String {
                value.to_string()
            }

            fn parse(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }
        }
    )*};
}

unsigned_serializer!(u8, u16, u32, u64, usize);

macro_rules! signed_serializer {
    ($($t:ty),*) => {$(
        impl Serializer<$t> {
            /// Values in `min..=max`, stored as an offset from `min`.
            pub fn new(min: $t, max: $t) -> Self {
                assert!(min <= max, "signed serializer needs min <= max");
                let span = (max as i64).abs_diff(min as i64);
                Self::with_bounds(bit_width(span).max(1), Bounds::Signed(min as i64, max as i64))
            }
        }

        impl Serializable for $t {
            fn serialize(sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
                let (min, max) = sr.signed_range();
                let offset = (*value as i64).clamp(min, max).abs_diff(min);
                push_uint(dest, offset, sr.bitsize);
            }

            fn deserialize(sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
                let (min, max) = sr.signed_range();
                let raw = read_uint(src);
                if raw > max.abs_diff(min) {
                    return None;
                }
                let value = min.checked_add_unsigned(raw)?;
                <$t>::try_from(value).ok()
            }

            fn print(value: &Self) -> String {
                value.to_string()
            }

            fn parse(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }
        }
    )*};
}

signed_serializer!(i8, i16, i32, i64);

fn check_float_bounds(min: f64, max: f64, bits: usize) {
    assert!(min < max, "bounded serializer needs min < max");
    assert!((1..=32).contains(&bits), "bounded serializer resolution must be 1..=32 bits");
}

macro_rules! float_serializer {
    ($($t:ty),*) => {$(
        impl Serializer<$t> {
            /// Uniform quantization of `[min, max]` onto `bits` bits.
            pub fn new(min: $t, max: $t, bits: usize) -> Self {
                check_float_bounds(f64::from(min), f64::from(max), bits);
                Self::with_bounds(bits, Bounds::Range(f64::from(min), f64::from(max)))
            }
        }

        impl Serializable for $t {
            fn serialize(sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
                let (min, max) = sr.range();
                push_uint(dest, quantize(f64::from(*value), min, max, sr.bitsize), sr.bitsize);
            }

            fn deserialize(sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
                let (min, max) = sr.range();
                Some(dequantize(read_uint(src), min, max, sr.bitsize) as $t)
            }

            fn print(value: &Self) -> String {
                value.to_string()
            }

            fn parse(text: &str) -> Option<Self> {
                text.trim().parse().ok()
            }
        }
    )*};
}

float_serializer!(f32, f64);

fn parse_components<T: core::str::FromStr + Copy + Default, const N: usize>(text: &str) -> Option<[T; N]> {
    let mut out = [T::default(); N];
    let mut parts = text.trim().trim_matches(|c| c == '[' || c == ']').split(',');
    for slot in &mut out {
        *slot = parts.next()?.trim().parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

fn print_components<T: ToString>(values: &[T]) -> String {
    values.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

macro_rules! vector_serializer {
    ($t:ty; $($n:literal),*) => {$(
        impl Serializer<[$t; $n]> {
            /// Each component quantized over `[min, max]` with `bits` bits.
            pub fn new(min: $t, max: $t, bits: usize) -> Self {
                check_float_bounds(f64::from(min), f64::from(max), bits);
                Self::with_bounds(bits * $n, Bounds::Range(f64::from(min), f64::from(max)))
            }
        }

        impl Serializable for [$t; $n] {
            fn serialize(sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
                let (min, max) = sr.range();
                let bits = sr.bitsize / $n;
                for component in value {
                    push_uint(dest, quantize(f64::from(*component), min, max, bits), bits);
                }
            }

            fn deserialize(sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
                let (min, max) = sr.range();
                if src.len() < sr.bitsize {
                    return None;
                }
                let bits = sr.bitsize / $n;
                let mut out = [<$t>::default(); $n];
                for (slot, chunk) in out.iter_mut().zip(src.chunks(bits)) {
                    *slot = dequantize(read_uint(chunk), min, max, bits) as $t;
                }
                Some(out)
            }

            fn print(value: &Self) -> String {
                print_components(value)
            }

            fn parse(text: &str) -> Option<Self> {
                parse_components(text)
            }
        }
    )*};
}

vector_serializer!(f32; 2, 3, 4);
vector_serializer!(f64; 2, 3, 4);

/// Width of a compressed quaternion: 2-bit index plus three 9-bit components.
pub const QUATERNION_BITS: usize = 29;
const QUATERNION_COMPONENT_BITS: usize = 9;

/// Attitude quaternion, components in `[x, y, z, w]` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion(pub [f32; 4]);

impl Default for Quaternion {
    fn default() -> Self {
        Quaternion([0.0, 0.0, 0.0, 1.0])
    }
}

impl Serializer<Quaternion> {
    pub fn new() -> Self {
        Self::with_bounds(QUATERNION_BITS, Bounds::None)
    }
}

impl Default for Serializer<Quaternion> {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializable for Quaternion {
    /// Drops the largest-magnitude component and sends its index instead.
    fn serialize(_sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
        let q = value.0;
        let largest = (0..4).fold(0, |best, i| if q[i].abs() > q[best].abs() { i } else { best });

        push_uint(dest, largest as u64, 2);
        for (i, component) in q.iter().enumerate() {
            if i != largest {
                let raw = quantize(f64::from(*component), -SQRT_2, SQRT_2, QUATERNION_COMPONENT_BITS);
                push_uint(dest, raw, QUATERNION_COMPONENT_BITS);
            }
        }
    }

    /// Rebuilds the dropped component assuming a unit quaternion. Its sign is
    /// not transmitted, so it always comes back non-negative.
    fn deserialize(_sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
        let src = src.get(..QUATERNION_BITS)?;
        let largest = read_uint(&src[..2]) as usize;
        let mut q = [0.0f32; 4];
        let mut sum_squares = 0.0f64;

        // three 9-bit components follow the 2-bit index
        let mut chunks = src[2..].chunks(QUATERNION_COMPONENT_BITS);
        for (i, slot) in q.iter_mut().enumerate() {
            if i == largest {
                continue;
            }
            let raw = read_uint(chunks.next()?);
            let component = dequantize(raw, -SQRT_2, SQRT_2, QUATERNION_COMPONENT_BITS);
            sum_squares += component * component;
            *slot = component as f32;
        }
        q[largest] = (1.0 - sum_squares).max(0.0).sqrt() as f32;
        Some(Quaternion(q))
    }

    fn print(value: &Self) -> String {
        print_components(&value.0)
    }

    fn parse(text: &str) -> Option<Self> {
        parse_components(text).map(Quaternion)
    }
}

/// GPS time as week number and time of week in milliseconds. 48 bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpsTime {
    pub wn: u16,
    pub tow: u32,
}

impl Serializer<GpsTime> {
    pub fn new() -> Self {
        Self::with_bounds(48, Bounds::None)
    }
}

impl Default for Serializer<GpsTime> {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializable for GpsTime {
    fn serialize(_sr: &Serializer<Self>, value: &Self, dest: &mut BitArray) {
        push_uint(dest, u64::from(value.wn), 16);
        push_uint(dest, u64::from(value.tow), 32);
    }

    fn deserialize(_sr: &Serializer<Self>, src: &[bool]) -> Option<Self> {
        let wn = u16::try_from(read_uint(src.get(..16)?)).ok()?;
        let tow = u32::try_from(read_uint(src.get(16..48)?)).ok()?;
        Some(GpsTime { wn, tow })
    }

    fn print(value: &Self) -> String {
        format!("{},{}", value.wn, value.tow)
    }

    fn parse(text: &str) -> Option<Self> {
        let [wn, tow] = parse_components::<u32, 2>(text)?;
        Some(GpsTime { wn: u16::try_from(wn).ok()?, tow })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_is_rejected_by_trait_impls() {
        let quat = Serializer::<Quaternion>::new();
        let gps = Serializer::<GpsTime>::new();
        let vec = Serializer::<[f32; 3]>::new(-1.0, 1.0, 30);
        assert_eq!(<Quaternion as Serializable>::deserialize(&quat, &[true]), None);
        assert_eq!(<Quaternion as Serializable>::deserialize(&quat, &[false; 20]), None);
        assert_eq!(<GpsTime as Serializable>::deserialize(&gps, &[false; 30]), None);
        assert_eq!(<[f32; 3] as Serializable>::deserialize(&vec, &[false; 12]), None);

        let bits = gps.serialize(&GpsTime { wn: 2200, tow: 345_600_000 });
        assert_eq!(
            <GpsTime as Serializable>::deserialize(&gps, &bits),
            Some(GpsTime { wn: 2200, tow: 345_600_000 })
        );
    }

    #[test]
    fn test_bit_width() {
        assert_eq!(bit_width(0), 0);
        assert_eq!(bit_width(1), 1);
        assert_eq!(bit_width(2), 2);
        assert_eq!(bit_width(7), 3);
        assert_eq!(bit_width(8), 4);
        assert_eq!(bit_width(65535), 16);
    }

    #[test]
    fn test_unsigned_clamps_and_rejects() {
        let sr = Serializer::<u8>::new(10);
        assert_eq!(sr.bitsize(), 4);

        let bits = sr.serialize(&200);
        assert_eq!(sr.deserialize(&bits), Some(10));

        // 15 is representable in 4 bits but above the declared max
        let mut invalid = BitArray::new();
        push_uint(&mut invalid, 15, 4);
        assert_eq!(sr.deserialize(&invalid), None);
        assert_eq!(sr.deserialize(&invalid[..3]), None);
    }

    #[test]
    fn test_signed_offset_encoding() {
        let sr = Serializer::<i32>::new(-40, 125);
        assert_eq!(sr.bitsize(), 8);
        for t in [-40, -1, 0, 37, 125] {
            assert_eq!(sr.deserialize(&sr.serialize(&t)), Some(t));
        }
        assert_eq!(sr.deserialize(&sr.serialize(&-100)), Some(-40));
    }

    #[test]
    fn test_float_error_bound() {
        let (min, max, bits) = (-3.0f64, 7.5f64, 10usize);
        let sr = Serializer::<f64>::new(min, max, bits);
        let step = (max - min) / ((1u64 << bits) - 1) as f64;

        let mut v = min;
        while v <= max {
            let decoded = sr.deserialize(&sr.serialize(&v)).unwrap();
            assert!((decoded - v).abs() <= step, "{v} decoded as {decoded}");
            v += 0.0137;
        }
        assert_eq!(sr.deserialize(&sr.serialize(&100.0)), Some(max));
        assert_eq!(sr.deserialize(&sr.serialize(&f64::NAN)), Some(min));
    }

    #[test]
    fn test_vector_components() {
        let sr = Serializer::<[f64; 3]>::new(0.0, 100_000.0, 24);
        assert_eq!(sr.bitsize(), 72);
        let v = [6_771.5, 0.0, 99_999.0];
        let decoded = sr.deserialize(&sr.serialize(&v)).unwrap();
        for (a, b) in v.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 0.01);
        }
    }

    #[test]
    fn test_quaternion_magnitudes() {
        let sr = Serializer::<Quaternion>::new();
        let raw = [0.1f32, -0.7, 0.2, 0.5];
        let norm = raw.iter().map(|c| c * c).sum::<f32>().sqrt();
        let q = Quaternion(raw.map(|c| c / norm));

        let bits = sr.serialize(&q);
        assert_eq!(bits.len(), QUATERNION_BITS);
        let decoded = sr.deserialize(&bits).unwrap();

        for (a, b) in q.0.iter().zip(decoded.0.iter()) {
            assert!((a.abs() - b.abs()).abs() < 0.02, "{a} vs {b}");
        }
        // largest component was negative; only its magnitude survives
        assert!(decoded.0[1] > 0.0);
    }

    #[test]
    fn test_text_forms() {
        assert_eq!(<[f32; 3]>::parse("1.5, -2, 3"), Some([1.5, -2.0, 3.0]));
        assert_eq!(<[f32; 3]>::parse("1,2"), None);
        assert_eq!(bool::parse("true"), Some(true));
        assert_eq!(GpsTime::parse("2100,345000"), Some(GpsTime { wn: 2100, tow: 345_000 }));
        assert_eq!(GpsTime::print(&GpsTime { wn: 1, tow: 2 }), "1,2");
    }
}
