//! Running patched hosts.
//!
//! [`Framework`] is the activation context: it collects patch descriptors, installs them into
//! a host once, and hands out [`Machine`]s whose event contract is bound to its bus. The
//! [`Machine`] interprets host bodies, spliced hook code included.

pub mod bridge;
pub mod framework;
pub mod heap;
pub mod machine;
pub mod result;

pub use bridge::{EventBridge, InvocationRecord, Journal};
pub use framework::{Framework, FrameworkState};
pub use heap::{Heap, Object};
pub use machine::{Machine, Native, Trap, DEFAULT_STEP_LIMIT, MAX_CALL_DEPTH};
pub use result::{Error, Result};
