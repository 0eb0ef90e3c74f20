//! External process services.
//!
//! Every interaction with an external binary flows through
//! [`invoker::ToolInvoker`]; the [`encoders`] module builds the concrete
//! argument lists the invoker executes.

pub mod encoders;
pub mod invoker;
