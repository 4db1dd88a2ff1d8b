#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is range-checked")]
#![expect(clippy::cast_sign_loss, reason = "sign-changing casts are intentional")]
#![expect(clippy::float_cmp, reason = "exact float comparison mirrors the language semantics")]
#![expect(clippy::must_use_candidate, reason = "accessor-style APIs read better unannotated")]
#![expect(clippy::missing_panics_doc, reason = "internal expect()s are invariant violations")]
#![expect(clippy::module_name_repetitions, reason = "public names stay searchable")]

mod classes;
mod errors;
mod eval;
mod external;
mod glob;
mod heap;
mod intern;
mod lexer;
mod limits;
mod modules;
mod object;
mod parse;
mod prepare;
pub mod render;
mod resource;
mod security;
mod stdlib;
mod syntax;
mod tracer;
mod types;
mod value;

pub use crate::{
    errors::{ErrorKind, PklError, StackFrame, indent_lines},
    eval::{Evaluator, EvaluatorOptions},
    external::ExternalReaderConfig,
    heap::HeapStats,
    limits::{CancelToken, DEFAULT_MAX_RECURSION_DEPTH, Limits},
    modules::{ListEntry, ModuleReader, path_to_file_uri},
    object::{Object, StructBody},
    render::OutputFormat,
    resource::{Resource, ResourceReader},
    security::{
        SecurityPolicy, TRUST_LOCAL_FILE, TRUST_MODULEPATH, TRUST_OTHER, TRUST_REPL, TRUST_STDLIB,
        default_trust_level,
    },
    tracer::{EvalTracer, NoopTracer, RecordingTracer, StderrTracer, TraceEvent},
};
