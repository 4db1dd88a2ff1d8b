//! Runtime value kinds.
//!
//! The value type uses a hybrid design: small immediate values (`Int`,
//! `Bool`, `Null`, units) are stored inline, immutable aggregates share
//! their payload behind `Rc`, and lazily-evaluated objects, functions, and
//! frames live in the evaluator's arena and are referenced by index
//! (`ObjId`, `FuncId`). Cloning a value is always cheap.
//!
//! Deep equality of objects requires forcing their members and therefore
//! lives on the evaluator; [`Value::same`] is the shallow comparison used
//! where no evaluator is at hand (identity for arena values).

use std::{fmt, rc::Rc};

use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    classes::{ClassId, builtin},
    heap::{FuncId, ObjId},
};

/// A runtime value.
#[derive(Debug, Clone)]
pub(crate) enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    Duration(Duration),
    DataSize(DataSize),
    Pair(Rc<(Value, Value)>),
    Regex(Rc<RegexValue>),
    IntSeq(IntSeq),
    List(Rc<Vec<Value>>),
    /// Insertion-ordered; construction dedupes via the evaluator.
    Set(Rc<Vec<Value>>),
    Map(Rc<ValueMap>),
    /// Typed, Dynamic, Listing, Mapping, or Module object in the arena.
    Obj(ObjId),
    Func(FuncId),
    Class(ClassId),
    TypeAlias(u32),
}

impl Value {
    /// The class a value is an instance of. For objects the precise class
    /// lives in the arena record; callers with a heap use that instead.
    pub(crate) fn builtin_class(&self) -> ClassId {
        match self {
            Self::Null => builtin::NULL,
            Self::Bool(_) => builtin::BOOLEAN,
            Self::Int(_) => builtin::INT,
            Self::Float(_) => builtin::FLOAT,
            Self::Str(_) => builtin::STRING,
            Self::Bytes(_) => builtin::BYTES,
            Self::Duration(_) => builtin::DURATION,
            Self::DataSize(_) => builtin::DATA_SIZE,
            Self::Pair(_) => builtin::PAIR,
            Self::Regex(_) => builtin::REGEX,
            Self::IntSeq(_) => builtin::INT_SEQ,
            Self::List(_) => builtin::LIST,
            Self::Set(_) => builtin::SET,
            Self::Map(_) => builtin::MAP,
            Self::Obj(_) => builtin::DYNAMIC,
            Self::Func(_) => builtin::FUNCTION,
            Self::Class(_) => builtin::CLASS,
            Self::TypeAlias(_) => builtin::TYPE_ALIAS,
        }
    }

    /// Shallow equality: structural for immediates and immutable aggregates,
    /// identity for arena references.
    pub(crate) fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Int(a), Self::Float(b)) | (Self::Float(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::DataSize(a), Self::DataSize(b)) => a == b,
            (Self::Pair(a), Self::Pair(b)) => a.0.same(&b.0) && a.1.same(&b.1),
            (Self::Regex(a), Self::Regex(b)) => a.pattern == b.pattern,
            (Self::IntSeq(a), Self::IntSeq(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Set(a), Self::Set(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.entries.len() == b.entries.len()
                    && a.entries
                        .iter()
                        .all(|(k, v)| b.get(k).is_some_and(|other| v.same(other)))
            }
            (Self::Obj(a), Self::Obj(b)) => a == b,
            (Self::Func(a), Self::Func(b)) => a == b,
            (Self::Class(a), Self::Class(b)) => a == b,
            (Self::TypeAlias(a), Self::TypeAlias(b)) => a == b,
            _ => false,
        }
    }

    pub(crate) fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub(crate) fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub(crate) fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view: both ints and floats.
    pub(crate) fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub(crate) fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A compiled regular expression together with its source pattern.
#[derive(Debug)]
pub(crate) struct RegexValue {
    pub pattern: Rc<str>,
    pub compiled: regex::Regex,
}

/// An inclusive integer sequence with step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IntSeq {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

impl IntSeq {
    pub(crate) fn new(start: i64, end: i64) -> Self {
        Self { start, end, step: 1 }
    }

    pub(crate) fn iter(self) -> impl Iterator<Item = i64> {
        let Self { start, end, step } = self;
        let mut current = start;
        std::iter::from_fn(move || {
            let done = if step >= 0 { current > end } else { current < end };
            if done || step == 0 {
                return None;
            }
            let v = current;
            current = current.checked_add(step)?;
            Some(v)
        })
    }

    pub(crate) fn len(self) -> usize {
        self.iter().count()
    }
}

/// An insertion-ordered map with values of any kind.
///
/// Lookup is a linear scan with shallow key equality; Pkl maps are
/// dominated by small literal maps with primitive keys, where this is both
/// correct and fast. Deep-equal object keys additionally hit the identity
/// fast path when they are the same arena object.
#[derive(Debug, Default)]
pub(crate) struct ValueMap {
    pub entries: Vec<(Value, Value)>,
}

impl ValueMap {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, key: &Value) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k.same(key)).map(|(_, v)| v)
    }

    pub(crate) fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Inserts, replacing an existing entry with a shallow-equal key while
    /// keeping its position (leaf-wins merge preserves first-seen order).
    pub(crate) fn insert(&mut self, key: Value, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| k.same(&key)) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Units of a `Duration` value, ordered from smallest to largest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub(crate) enum DurationUnit {
    #[strum(serialize = "ns")]
    Nanos,
    #[strum(serialize = "us")]
    Micros,
    #[strum(serialize = "ms")]
    Millis,
    #[strum(serialize = "s")]
    Seconds,
    #[strum(serialize = "min")]
    Minutes,
    #[strum(serialize = "h")]
    Hours,
    #[strum(serialize = "d")]
    Days,
}

impl DurationUnit {
    /// Conversion factor to nanoseconds.
    pub(crate) fn nanos(self) -> f64 {
        match self {
            Self::Nanos => 1.0,
            Self::Micros => 1e3,
            Self::Millis => 1e6,
            Self::Seconds => 1e9,
            Self::Minutes => 60.0 * 1e9,
            Self::Hours => 3600.0 * 1e9,
            Self::Days => 86400.0 * 1e9,
        }
    }
}

/// A duration: magnitude plus unit. Comparison converts to a canonical
/// magnitude; the unit is preserved through arithmetic on the left operand.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Duration {
    pub value: f64,
    pub unit: DurationUnit,
}

impl Duration {
    pub(crate) fn new(value: f64, unit: DurationUnit) -> Self {
        Self { value, unit }
    }

    /// Total nanoseconds; the canonical comparison magnitude.
    pub(crate) fn total_nanos(self) -> f64 {
        self.value * self.unit.nanos()
    }

    pub(crate) fn to_unit(self, unit: DurationUnit) -> Self {
        Self {
            value: self.total_nanos() / unit.nanos(),
            unit,
        }
    }

    /// ISO-8601 form used by the XML and PList renderers.
    pub(crate) fn iso8601(self) -> String {
        let seconds = self.total_nanos() / 1e9;
        if seconds == seconds.trunc() {
            format!("PT{}S", seconds as i64)
        } else {
            format!("PT{seconds}S")
        }
    }
}

impl PartialEq for Duration {
    fn eq(&self, other: &Self) -> bool {
        self.total_nanos() == other.total_nanos()
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total_nanos().partial_cmp(&other.total_nanos())
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", fmt_number(self.value), self.unit)
    }
}

/// Units of a `DataSize` value. Decimal (kb = 1000 b) and binary
/// (kib = 1024 b) families.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString, IntoStaticStr, serde::Serialize, serde::Deserialize,
)]
pub(crate) enum DataSizeUnit {
    #[strum(serialize = "b")]
    Bytes,
    #[strum(serialize = "kb")]
    Kilobytes,
    #[strum(serialize = "kib")]
    Kibibytes,
    #[strum(serialize = "mb")]
    Megabytes,
    #[strum(serialize = "mib")]
    Mebibytes,
    #[strum(serialize = "gb")]
    Gigabytes,
    #[strum(serialize = "gib")]
    Gibibytes,
    #[strum(serialize = "tb")]
    Terabytes,
    #[strum(serialize = "tib")]
    Tebibytes,
    #[strum(serialize = "pb")]
    Petabytes,
    #[strum(serialize = "pib")]
    Pebibytes,
}

impl DataSizeUnit {
    /// Conversion factor to bytes.
    pub(crate) fn bytes(self) -> f64 {
        match self {
            Self::Bytes => 1.0,
            Self::Kilobytes => 1e3,
            Self::Megabytes => 1e6,
            Self::Gigabytes => 1e9,
            Self::Terabytes => 1e12,
            Self::Petabytes => 1e15,
            Self::Kibibytes => 1024.0,
            Self::Mebibytes => 1024.0 * 1024.0,
            Self::Gibibytes => 1024.0 * 1024.0 * 1024.0,
            Self::Tebibytes => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            Self::Pebibytes => 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0,
        }
    }
}

/// A data size: magnitude plus unit, same discipline as [`Duration`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct DataSize {
    pub value: f64,
    pub unit: DataSizeUnit,
}

impl DataSize {
    pub(crate) fn new(value: f64, unit: DataSizeUnit) -> Self {
        Self { value, unit }
    }

    pub(crate) fn total_bytes(self) -> f64 {
        self.value * self.unit.bytes()
    }

    pub(crate) fn to_unit(self, unit: DataSizeUnit) -> Self {
        Self {
            value: self.total_bytes() / unit.bytes(),
            unit,
        }
    }
}

impl PartialEq for DataSize {
    fn eq(&self, other: &Self) -> bool {
        self.total_bytes() == other.total_bytes()
    }
}

impl PartialOrd for DataSize {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.total_bytes().partial_cmp(&other.total_bytes())
    }
}

impl fmt::Display for DataSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", fmt_number(self.value), self.unit)
    }
}

/// Formats a float the way Pkl writes numbers: integral magnitudes drop the
/// fraction, everything else uses the shortest round-trip form.
pub(crate) fn fmt_number(value: f64) -> String {
    if value.is_finite() && value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let mut buf = ryu::Buffer::new();
        buf.format(value).to_owned()
    }
}

/// Formats a float for rendering, always keeping the float-ness visible
/// (`1.0`, not `1`).
pub(crate) fn fmt_float(value: f64) -> String {
    if value.is_nan() {
        return String::from("NaN");
    }
    if value.is_infinite() {
        return if value > 0.0 { String::from("Infinity") } else { String::from("-Infinity") };
    }
    let mut buf = ryu::Buffer::new();
    buf.format(value).to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_comparison_across_units() {
        let a = Duration::new(60.0, DurationUnit::Seconds);
        let b = Duration::new(1.0, DurationUnit::Minutes);
        assert_eq!(a, b);
        assert!(Duration::new(2.0, DurationUnit::Minutes) > a);
    }

    #[test]
    fn duration_unit_conversion() {
        let d = Duration::new(1.5, DurationUnit::Minutes).to_unit(DurationUnit::Seconds);
        assert_eq!(d.value, 90.0);
        assert_eq!(d.unit, DurationUnit::Seconds);
        assert_eq!(d.to_string(), "90.s");
    }

    #[test]
    fn datasize_binary_vs_decimal() {
        let kb = DataSize::new(1.0, DataSizeUnit::Kilobytes);
        let kib = DataSize::new(1.0, DataSizeUnit::Kibibytes);
        assert!(kib > kb);
        assert_eq!(kib.total_bytes(), 1024.0);
    }

    #[test]
    fn intseq_iteration() {
        let seq = IntSeq { start: 1, end: 7, step: 2 };
        assert_eq!(seq.iter().collect::<Vec<_>>(), vec![1, 3, 5, 7]);
        assert_eq!(seq.len(), 4);
        let empty = IntSeq::new(3, 1);
        assert_eq!(empty.len(), 0);
    }

    #[test]
    fn map_insert_replaces_in_place() {
        let mut map = ValueMap::new();
        map.insert(Value::Str("a".into()), Value::Int(1));
        map.insert(Value::Str("b".into()), Value::Int(2));
        map.insert(Value::Str("a".into()), Value::Int(3));
        assert_eq!(map.len(), 2);
        assert!(map.get(&Value::Str("a".into())).unwrap().same(&Value::Int(3)));
        assert!(map.entries[0].0.same(&Value::Str("a".into())));
    }
}
