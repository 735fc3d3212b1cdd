// TJS library - exposes the compiler and the agent VM for embedding and testing

pub mod compiler;
pub mod vm;

pub use compiler::{
    extract_tests, tjs, transpile, transpile_to_js, CompileOptions, RunTestsMode, TjsOutput,
    TranspileOutput,
};
pub use compiler::diagnostics::SyntaxError;
pub use compiler::from_ts::from_ts;
pub use compiler::infer::{check_type, infer_type, type_to_string, Type, TypeKind};
pub use compiler::signature::{FunctionSignature, ParamSpec};
pub use vm::error::{is_error, monadic_error, type_of, validate_args};
pub use vm::{AgentVM, RunOptions, RunResult};
