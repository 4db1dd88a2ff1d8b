//! Built-in properties and methods of the core value kinds.
//!
//! Dispatch is by value kind and member name. Returning `Ok(None)` means
//! "no such member here", letting the evaluator fall through to its own
//! lookup chain and error reporting.

use std::{rc::Rc, str::FromStr};

use crate::{
    errors::{ErrorKind, EvalError, EvalResult},
    eval::Evaluator,
    heap::ObjKind,
    lexer::Span,
    tracer::EvalTracer,
    value::{DataSize, DataSizeUnit, Duration, DurationUnit, IntSeq, Value, ValueMap},
};

/// A property access on a non-member name, e.g. `"ab".length` or `5.min`.
pub(crate) fn value_property<Tr: EvalTracer>(
    eval: &mut Evaluator<Tr>,
    value: &Value,
    name: &str,
    span: Span,
) -> EvalResult<Option<Value>> {
    // numeric unit properties build durations and data sizes
    if let Some(magnitude) = value.as_f64() {
        if matches!(value, Value::Int(_) | Value::Float(_)) {
            if let Ok(unit) = DurationUnit::from_str(name) {
                return Ok(Some(Value::Duration(Duration::new(magnitude, unit))));
            }
            if let Ok(unit) = DataSizeUnit::from_str(name) {
                return Ok(Some(Value::DataSize(DataSize::new(magnitude, unit))));
            }
        }
    }
    let result = match (value, name) {
        (Value::Str(s), "length") => Some(Value::Int(chars_len(s))),
        (Value::Str(s), "isEmpty") => Some(Value::Bool(s.is_empty())),
        (Value::Str(s), "isBlank") => Some(Value::Bool(s.trim().is_empty())),
        (Value::Str(s), "chars") => Some(Value::List(Rc::new(
            s.chars().map(|c| Value::Str(c.to_string().into())).collect(),
        ))),
        (Value::Str(s), "base64") => Some(Value::Str(crate::resource::base64_encode(s.as_bytes()).into())),

        (Value::Int(i), "isPositive") => Some(Value::Bool(*i > 0)),
        (Value::Int(i), "isNonZero") => Some(Value::Bool(*i != 0)),
        (Value::Int(i), "isEven") => Some(Value::Bool(i % 2 == 0)),
        (Value::Int(i), "isOdd") => Some(Value::Bool(i % 2 != 0)),
        (Value::Int(i), "abs") => Some(Value::Int(i.checked_abs().ok_or_else(|| {
            EvalError::keyed(ErrorKind::ArithmeticError, "integerOverflow", &[&"abs"]).with_span(span)
        })?)),
        (Value::Int(i), "sign") => Some(Value::Int(i.signum())),

        (Value::Float(f), "isPositive") => Some(Value::Bool(*f > 0.0)),
        (Value::Float(f), "isNaN") => Some(Value::Bool(f.is_nan())),
        (Value::Float(f), "isFinite") => Some(Value::Bool(f.is_finite())),
        (Value::Float(f), "isInfinite") => Some(Value::Bool(f.is_infinite())),
        (Value::Float(f), "abs") => Some(Value::Float(f.abs())),
        (Value::Float(f), "sign") => Some(Value::Float(f.signum())),
        (Value::Float(f), "ceil") => Some(Value::Float(f.ceil())),
        (Value::Float(f), "floor") => Some(Value::Float(f.floor())),
        (Value::Float(f), "round") => Some(Value::Float(f.round())),

        (Value::Duration(d), "value") => Some(number_value(d.value)),
        (Value::Duration(d), "unit") => Some(Value::Str(d.unit.to_string().into())),
        (Value::Duration(d), "isPositive") => Some(Value::Bool(d.value > 0.0)),
        (Value::DataSize(d), "value") => Some(number_value(d.value)),
        (Value::DataSize(d), "unit") => Some(Value::Str(d.unit.to_string().into())),
        (Value::DataSize(d), "isPositive") => Some(Value::Bool(d.value > 0.0)),

        (Value::Pair(pair), "first") => Some(pair.0.clone()),
        (Value::Pair(pair), "second") => Some(pair.1.clone()),
        (Value::Pair(pair), "key") => Some(pair.0.clone()),
        (Value::Pair(pair), "value") => Some(pair.1.clone()),

        (Value::Regex(r), "pattern") => Some(Value::Str(Rc::clone(&r.pattern))),

        (Value::IntSeq(seq), "start") => Some(Value::Int(seq.start)),
        (Value::IntSeq(seq), "end") => Some(Value::Int(seq.end)),
        (Value::IntSeq(seq), "step") => Some(Value::Int(seq.step)),

        (Value::List(items) | Value::Set(items), "length") => {
            Some(Value::Int(i64::try_from(items.len()).expect("length fits")))
        }
        (Value::List(items) | Value::Set(items), "isEmpty") => Some(Value::Bool(items.is_empty())),
        (Value::List(items) | Value::Set(items), "first") => Some(
            items
                .first()
                .cloned()
                .ok_or_else(|| EvalError::new(ErrorKind::UndefinedProperty, "the collection is empty").with_span(span))?,
        ),
        (Value::List(items) | Value::Set(items), "firstOrNull") => {
            Some(items.first().cloned().unwrap_or(Value::Null))
        }
        (Value::List(items) | Value::Set(items), "last") => Some(
            items
                .last()
                .cloned()
                .ok_or_else(|| EvalError::new(ErrorKind::UndefinedProperty, "the collection is empty").with_span(span))?,
        ),
        (Value::List(items) | Value::Set(items), "lastOrNull") => {
            Some(items.last().cloned().unwrap_or(Value::Null))
        }
        (Value::List(items), "distinct") => {
            let mut out: Vec<Value> = Vec::new();
            for item in items.iter() {
                let mut duplicate = false;
                for existing in &out {
                    if eval.values_equal(existing, item)? {
                        duplicate = true;
                        break;
                    }
                }
                if !duplicate {
                    out.push(item.clone());
                }
            }
            Some(Value::List(Rc::new(out)))
        }

        (Value::Map(map), "length") => Some(Value::Int(i64::try_from(map.len()).expect("length fits"))),
        (Value::Map(map), "isEmpty") => Some(Value::Bool(map.is_empty())),
        (Value::Map(map), "keys") => Some(Value::List(Rc::new(
            map.entries.iter().map(|(k, _)| k.clone()).collect(),
        ))),
        (Value::Map(map), "values") => Some(Value::List(Rc::new(
            map.entries.iter().map(|(_, v)| v.clone()).collect(),
        ))),

        (Value::Bytes(bytes), "length") => Some(Value::Int(i64::try_from(bytes.len()).expect("length fits"))),
        (Value::Bytes(bytes), "base64") => Some(Value::Str(crate::resource::base64_encode(bytes).into())),

        (Value::Obj(obj), _) => return object_property(eval, *obj, name, span),
        _ => None,
    };
    Ok(result)
}

fn object_property<Tr: EvalTracer>(
    eval: &mut Evaluator<Tr>,
    obj: crate::heap::ObjId,
    name: &str,
    _span: Span,
) -> EvalResult<Option<Value>> {
    let kind = eval.heap.obj(obj).kind;
    let result = match (kind, name) {
        (ObjKind::Listing | ObjKind::Dynamic, "length") => {
            let total = eval.heap.obj(obj).total_elements;
            Some(Value::Int(i64::try_from(total).expect("length fits")))
        }
        (ObjKind::Listing | ObjKind::Dynamic, "isEmpty") => {
            Some(Value::Bool(eval.heap.obj(obj).total_elements == 0))
        }
        (ObjKind::Mapping, "length") => {
            let count = eval.heap.entry_keys(obj).len();
            Some(Value::Int(i64::try_from(count).expect("length fits")))
        }
        (ObjKind::Mapping, "isEmpty") => Some(Value::Bool(eval.heap.entry_keys(obj).is_empty())),
        (ObjKind::Mapping, "keys") => {
            let keys = eval.heap.entry_keys(obj);
            let mut out: Vec<Value> = Vec::with_capacity(keys.len());
            for key in keys {
                let mut duplicate = false;
                for existing in &out {
                    if eval.values_equal(existing, &key)? {
                        duplicate = true;
                        break;
                    }
                }
                if !duplicate {
                    out.push(key);
                }
            }
            Some(Value::Set(Rc::new(out)))
        }
        _ => None,
    };
    Ok(result)
}

/// A method call on a non-member name, e.g. `"ab".contains("a")`.
pub(crate) fn value_method<Tr: EvalTracer>(
    eval: &mut Evaluator<Tr>,
    value: &Value,
    name: &str,
    args: &[Value],
    span: Span,
) -> EvalResult<Option<Value>> {
    let result = match (value, name) {
        (Value::Str(s), "contains") => Some(Value::Bool(match args {
            [Value::Str(needle)] => s.contains(needle.as_ref()),
            [Value::Regex(r)] => r.compiled.is_match(s),
            _ => return Err(one_string_arg_error(eval, name, args, span)),
        })),
        (Value::Str(s), "startsWith") => {
            let needle = string_arg(eval, name, args, span)?;
            Some(Value::Bool(s.starts_with(needle.as_ref())))
        }
        (Value::Str(s), "endsWith") => {
            let needle = string_arg(eval, name, args, span)?;
            Some(Value::Bool(s.ends_with(needle.as_ref())))
        }
        (Value::Str(s), "indexOf") => {
            let needle = string_arg(eval, name, args, span)?;
            match s.find(needle.as_ref()) {
                Some(byte_index) => Some(Value::Int(chars_len(&s[..byte_index]))),
                None => {
                    return Err(EvalError::new(
                        ErrorKind::UndefinedProperty,
                        format!("{needle:?} does not occur in {s:?}"),
                    )
                    .with_span(span));
                }
            }
        }
        (Value::Str(s), "substring") => match args {
            [Value::Int(start), Value::Int(end)] => {
                let chars: Vec<char> = s.chars().collect();
                let start = usize::try_from(*start).ok();
                let end = usize::try_from(*end).ok();
                match (start, end) {
                    (Some(start), Some(end)) if start <= end && end <= chars.len() => {
                        Some(Value::Str(chars[start..end].iter().collect::<String>().into()))
                    }
                    _ => {
                        return Err(EvalError::new(
                            ErrorKind::UndefinedProperty,
                            "substring bounds are out of range",
                        )
                        .with_span(span));
                    }
                }
            }
            _ => return Err(arity_error(2, args.len(), span)),
        },
        (Value::Str(s), "replaceAll") => match args {
            [Value::Str(from), Value::Str(to)] => Some(Value::Str(s.replace(from.as_ref(), to).into())),
            [Value::Regex(r), Value::Str(to)] => {
                Some(Value::Str(r.compiled.replace_all(s, to.as_ref()).into_owned().into()))
            }
            _ => return Err(arity_error(2, args.len(), span)),
        },
        (Value::Str(s), "split") => match args {
            [Value::Str(sep)] => Some(Value::List(Rc::new(
                s.split(sep.as_ref()).map(|part| Value::Str(part.into())).collect(),
            ))),
            [Value::Regex(r)] => Some(Value::List(Rc::new(
                r.compiled.split(s).map(|part| Value::Str(part.into())).collect(),
            ))),
            _ => return Err(one_string_arg_error(eval, name, args, span)),
        },
        (Value::Str(s), "toUpperCase") => Some(Value::Str(s.to_uppercase().into())),
        (Value::Str(s), "toLowerCase") => Some(Value::Str(s.to_lowercase().into())),
        (Value::Str(s), "trim") => Some(Value::Str(s.trim().into())),
        (Value::Str(s), "reverse") => Some(Value::Str(s.chars().rev().collect::<String>().into())),
        (Value::Str(s), "repeat") => {
            let Some(Value::Int(n)) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            let n = usize::try_from(*n).map_err(|_| {
                EvalError::new(ErrorKind::UndefinedProperty, "repeat count must be non-negative").with_span(span)
            })?;
            Some(Value::Str(s.repeat(n).into()))
        }
        (Value::Str(s), "matches") => {
            let [Value::Regex(r)] = args else {
                return Err(EvalError::new(
                    ErrorKind::TypeMismatch,
                    "`matches` expects a Regex argument",
                )
                .with_span(span));
            };
            // a full match, not a substring search
            let matched = r.compiled.find(s).is_some_and(|m| m.start() == 0 && m.end() == s.len());
            Some(Value::Bool(matched))
        }
        (Value::Str(s), "toInt") => Some(Value::Int(s.trim().parse::<i64>().map_err(|_| {
            EvalError::new(ErrorKind::ArithmeticError, format!("cannot parse {s:?} as Int")).with_span(span)
        })?)),
        (Value::Str(s), "toFloat") => Some(Value::Float(s.trim().parse::<f64>().map_err(|_| {
            EvalError::new(ErrorKind::ArithmeticError, format!("cannot parse {s:?} as Float")).with_span(span)
        })?)),
        (Value::Str(s), "toBoolean") => match s.trim() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => {
                return Err(
                    EvalError::new(ErrorKind::ArithmeticError, format!("cannot parse {s:?} as Boolean"))
                        .with_span(span),
                );
            }
        },

        (Value::Int(i), "toFloat") => Some(Value::Float(*i as f64)),
        (Value::Int(i), "toString") => Some(Value::Str(i.to_string().into())),
        (Value::Float(f), "toInt") => {
            if f.is_finite() {
                Some(Value::Int(f.trunc() as i64))
            } else {
                return Err(
                    EvalError::new(ErrorKind::ArithmeticError, "cannot convert a non-finite Float to Int")
                        .with_span(span),
                );
            }
        }
        (Value::Float(f), "toString") => Some(Value::Str(crate::value::fmt_float(*f).into())),
        (Value::Int(_) | Value::Float(_), "isBetween") => match args {
            [low, high] => {
                let v = value.as_f64().expect("numeric");
                let (Some(low), Some(high)) = (low.as_f64(), high.as_f64()) else {
                    return Err(EvalError::new(
                        ErrorKind::TypeMismatch,
                        "`isBetween` expects two numbers",
                    )
                    .with_span(span));
                };
                Some(Value::Bool(v >= low && v <= high))
            }
            _ => return Err(arity_error(2, args.len(), span)),
        },

        (Value::Duration(d), "toUnit") => {
            let unit = string_arg(eval, name, args, span)?;
            let unit = DurationUnit::from_str(&unit).map_err(|_| {
                EvalError::keyed(ErrorKind::ArithmeticError, "cannotConvertUnit", &[&unit]).with_span(span)
            })?;
            Some(Value::Duration(d.to_unit(unit)))
        }
        (Value::Duration(d), "isBetween") => match args {
            [Value::Duration(low), Value::Duration(high)] => {
                Some(Value::Bool(*d >= *low && *d <= *high))
            }
            _ => return Err(arity_error(2, args.len(), span)),
        },
        (Value::DataSize(d), "toUnit") => {
            let unit = string_arg(eval, name, args, span)?;
            let unit = DataSizeUnit::from_str(&unit).map_err(|_| {
                EvalError::keyed(ErrorKind::ArithmeticError, "cannotConvertUnit", &[&unit]).with_span(span)
            })?;
            Some(Value::DataSize(d.to_unit(unit)))
        }

        (Value::IntSeq(seq), "step") => {
            let Some(Value::Int(step)) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            if *step == 0 {
                return Err(EvalError::new(ErrorKind::ArithmeticError, "step cannot be zero").with_span(span));
            }
            Some(Value::IntSeq(IntSeq {
                start: seq.start,
                end: seq.end,
                step: *step,
            }))
        }
        (Value::IntSeq(seq), "toList") => {
            Some(Value::List(Rc::new(seq.iter().map(Value::Int).collect())))
        }

        (Value::List(items) | Value::Set(items), "contains") => {
            let Some(needle) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            let mut found = false;
            for item in items.iter() {
                if eval.values_equal(item, needle)? {
                    found = true;
                    break;
                }
            }
            Some(Value::Bool(found))
        }
        (Value::List(items), "indexOf") => {
            let Some(needle) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            let mut index = None;
            for (i, item) in items.iter().enumerate() {
                if eval.values_equal(item, needle)? {
                    index = Some(i);
                    break;
                }
            }
            match index {
                Some(i) => Some(Value::Int(i64::try_from(i).expect("index fits"))),
                None => {
                    return Err(EvalError::new(ErrorKind::UndefinedProperty, "the element does not occur in the list")
                        .with_span(span));
                }
            }
        }
        (Value::List(items) | Value::Set(items), "map") => {
            let func = func_arg(args, span)?;
            let mut out = Vec::with_capacity(items.len());
            for item in items.iter() {
                out.push(eval.call_function(func, vec![item.clone()], span)?);
            }
            Some(if matches!(value, Value::Set(_)) {
                Value::Set(Rc::new(out))
            } else {
                Value::List(Rc::new(out))
            })
        }
        (Value::List(items) | Value::Set(items), "filter") => {
            let func = func_arg(args, span)?;
            let mut out = Vec::new();
            for item in items.iter() {
                let keep = eval.call_function(func, vec![item.clone()], span)?;
                match keep.as_bool() {
                    Some(true) => out.push(item.clone()),
                    Some(false) => {}
                    None => {
                        return Err(EvalError::new(
                            ErrorKind::TypeMismatch,
                            "`filter` expects the function to return a Boolean",
                        )
                        .with_span(span));
                    }
                }
            }
            Some(if matches!(value, Value::Set(_)) {
                Value::Set(Rc::new(out))
            } else {
                Value::List(Rc::new(out))
            })
        }
        (Value::List(items) | Value::Set(items), "fold") => match args {
            [initial, Value::Func(func)] => {
                let mut acc = initial.clone();
                for item in items.iter() {
                    acc = eval.call_function(*func, vec![acc, item.clone()], span)?;
                }
                Some(acc)
            }
            _ => return Err(arity_error(2, args.len(), span)),
        },
        (Value::List(items) | Value::Set(items), "join") => {
            let sep = string_arg(eval, name, args, span)?;
            let mut out = String::new();
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&sep);
                }
                out.push_str(&eval.string_of(item)?);
            }
            Some(Value::Str(out.into()))
        }
        (Value::List(items), "take") => {
            let count = usize_arg(args, span)?;
            Some(Value::List(Rc::new(items.iter().take(count).cloned().collect())))
        }
        (Value::List(items), "drop") => {
            let count = usize_arg(args, span)?;
            Some(Value::List(Rc::new(items.iter().skip(count).cloned().collect())))
        }
        (Value::List(items), "reverse") => {
            Some(Value::List(Rc::new(items.iter().rev().cloned().collect())))
        }
        (Value::List(items), "toSet") => {
            let mut out: Vec<Value> = Vec::new();
            for item in items.iter() {
                let mut duplicate = false;
                for existing in &out {
                    if eval.values_equal(existing, item)? {
                        duplicate = true;
                        break;
                    }
                }
                if !duplicate {
                    out.push(item.clone());
                }
            }
            Some(Value::Set(Rc::new(out)))
        }
        (Value::Set(items), "toList") => Some(Value::List(Rc::new(items.as_ref().clone()))),
        (Value::List(_), "toList") => Some(value.clone()),

        (Value::Map(map), "containsKey") => {
            let Some(key) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            Some(Value::Bool(map.contains_key(key)))
        }
        (Value::Map(map), "getOrNull") => {
            let Some(key) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            Some(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Map(_), "toMap") => Some(value.clone()),

        (Value::Func(func), "apply") => Some(eval.call_function(*func, args.to_vec(), span)?),

        (Value::Obj(obj), _) => return object_method(eval, *obj, name, args, span),
        _ => None,
    };
    Ok(result)
}

fn object_method<Tr: EvalTracer>(
    eval: &mut Evaluator<Tr>,
    obj: crate::heap::ObjId,
    name: &str,
    args: &[Value],
    span: Span,
) -> EvalResult<Option<Value>> {
    let kind = eval.heap.obj(obj).kind;
    let result = match (kind, name) {
        (ObjKind::Listing | ObjKind::Dynamic, "toList") => {
            let total = eval.heap.obj(obj).total_elements;
            let mut out = Vec::with_capacity(total);
            for index in 0..total {
                out.push(eval.force_element(obj, index, span)?);
            }
            Some(Value::List(Rc::new(out)))
        }
        (ObjKind::Mapping | ObjKind::Dynamic | ObjKind::Typed | ObjKind::Module, "toMap") => {
            let mut map = ValueMap::new();
            if kind != ObjKind::Mapping {
                for prop in eval.heap.prop_names(obj) {
                    let value = eval.force_prop(obj, prop, false, span)?;
                    map.insert(Value::Str(eval.interns.get(prop).into()), value);
                }
            }
            for key in eval.heap.entry_keys(obj) {
                let value = eval.force_entry(obj, &key, span)?;
                map.insert(key, value);
            }
            Some(Value::Map(Rc::new(map)))
        }
        (ObjKind::Mapping | ObjKind::Dynamic, "containsKey") => {
            let Some(key) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            Some(Value::Bool(eval.heap.lookup_entry(obj, key).is_some()))
        }
        (ObjKind::Mapping | ObjKind::Dynamic, "getOrNull") => {
            let Some(key) = args.first() else {
                return Err(arity_error(1, args.len(), span));
            };
            if eval.heap.lookup_entry(obj, key).is_some() {
                let key = key.clone();
                Some(eval.force_entry(obj, &key, span)?)
            } else {
                Some(Value::Null)
            }
        }
        (_, "hasProperty") => {
            let name = string_arg(eval, name, args, span)?;
            let has = eval
                .interns
                .lookup(&name)
                .is_some_and(|id| eval.heap.lookup_prop(obj, id, false).is_some());
            Some(Value::Bool(has))
        }
        (_, "getProperty") => {
            let property = string_arg(eval, name, args, span)?;
            let id = eval.interns.intern(&property);
            Some(eval.force_prop(obj, id, false, span)?)
        }
        (_, "getPropertyOrNull") => {
            let property = string_arg(eval, name, args, span)?;
            let id = eval.interns.intern(&property);
            if eval.heap.lookup_prop(obj, id, false).is_some() {
                Some(eval.force_prop(obj, id, false, span)?)
            } else {
                Some(Value::Null)
            }
        }
        _ => None,
    };
    Ok(result)
}

fn chars_len(s: &str) -> i64 {
    i64::try_from(s.chars().count()).expect("length fits")
}

fn number_value(value: f64) -> Value {
    if value == value.trunc() && value.abs() < 1e15 {
        Value::Int(value as i64)
    } else {
        Value::Float(value)
    }
}

fn arity_error(expected: usize, got: usize, span: Span) -> Box<EvalError> {
    EvalError::keyed(ErrorKind::TypeMismatch, "wrongArity", &[&expected, &got]).with_span(span)
}

fn func_arg(args: &[Value], span: Span) -> EvalResult<crate::heap::FuncId> {
    match args {
        [Value::Func(func)] => Ok(*func),
        _ => Err(EvalError::new(ErrorKind::TypeMismatch, "expected a function argument").with_span(span)),
    }
}

fn usize_arg(args: &[Value], span: Span) -> EvalResult<usize> {
    match args {
        [Value::Int(n)] if *n >= 0 => Ok(usize::try_from(*n).expect("non-negative")),
        _ => Err(EvalError::new(ErrorKind::TypeMismatch, "expected a non-negative Int argument").with_span(span)),
    }
}

fn string_arg<Tr: EvalTracer>(
    eval: &mut Evaluator<Tr>,
    method: &str,
    args: &[Value],
    span: Span,
) -> EvalResult<Rc<str>> {
    match args {
        [Value::Str(s)] => Ok(Rc::clone(s)),
        [other] => Err(EvalError::new(
            ErrorKind::TypeMismatch,
            format!("`{method}` expects a String, got {}", eval.type_name_of(other)),
        )
        .with_span(span)),
        _ => Err(arity_error(1, args.len(), span)),
    }
}

fn one_string_arg_error<Tr: EvalTracer>(
    eval: &mut Evaluator<Tr>,
    method: &str,
    args: &[Value],
    span: Span,
) -> Box<EvalError> {
    match args.first() {
        Some(other) => EvalError::new(
            ErrorKind::TypeMismatch,
            format!("`{method}` expects a String or Regex, got {}", eval.type_name_of(other)),
        )
        .with_span(span),
        None => arity_error(1, args.len(), span),
    }
}
