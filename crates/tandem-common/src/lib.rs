pub mod category;
pub mod protocol;
pub mod report;
pub mod spec;

pub use category::ErrorCategory;
pub use protocol::{BrowserError, Locator, PageContext, Primitive, PrimitiveKind};
pub use report::{ExecutionReport, RecoveryStatus, ReportBuilder, StepExecutionResult};
pub use spec::{ExecutionPath, FallbackPath, IntentSpec, ParamSpec, StepSpec};
