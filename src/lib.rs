//! Sandboxed query-function execution core
//!
//! Executes short, untrusted async "query functions" against host-provided
//! services, bounded by wall-clock and memory budgets, without OS-level
//! sandboxing. A subset compiler restricts the accepted language and
//! injects cooperative checks; a per-execution monitor enforces the
//! budgets; the execution host wires in read-only natives and caller
//! globals; a generic resource pool manages isolated worker units.
//!
//! ```no_run
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use querybox::{Sandbox, SandboxConfig};
//!
//! let sandbox = Sandbox::new(SandboxConfig::new("async (a, b) => a + b"))?;
//! let result = sandbox
//!     .run(
//!         vec![querybox::Value::Number(20.0), querybox::Value::Number(22.0)],
//!         Default::default(),
//!     )
//!     .await?;
//! assert_eq!(result.to_number(), 42.0);
//! # Ok(())
//! # }
//! ```

mod ast;
mod builtins;
mod cache;
mod codegen;
mod compiler;
mod error;
mod instrument;
mod interp;
mod lexer;
mod limits;
mod log;
mod monitor;
mod natives;
mod parser;
mod pool;
mod sandbox;
mod subset;
mod value;
mod worker;

pub use cache::{Cache, CacheConfig};
pub use compiler::{CompiledUnit, compile};
pub use error::{CompileError, RunError};
pub use limits::SandboxLimits;
pub use log::{LogEvent, LogLevel, LogSender};
pub use monitor::Monitor;
pub use pool::{HookFuture, Pool, PoolConfig, PoolError, ResourceManager};
pub use sandbox::{Sandbox, SandboxConfig};
pub use value::{HostFn, Value};
pub use worker::{SandboxWorker, SandboxWorkerManager, WorkerConfig, WorkerError};
