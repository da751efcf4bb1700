//! Isolated execution contexts
//!
//! Every resampler and codec worker owns exactly one execution context: a
//! dedicated thread that serves requests one at a time and a dispatcher
//! thread that hands the replies back, in order, to the owner. The two sides
//! share nothing but the channels between them; request payloads are moved
//! across, so the sender cannot touch a buffer after posting it.
//!
//! - `context`: thread pair, fault capture and termination
//! - `reply`: the future a caller awaits for one request

pub(crate) mod context;
pub mod reply;

pub(crate) use context::{ExecutionContext, Handler, Outcome};
pub use reply::Reply;
