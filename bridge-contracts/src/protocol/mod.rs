// SPDX-License-Identifier: GPL-3.0-only

pub mod errors;
pub mod invocation;

pub use errors::{BridgeError, BridgeErrorKind, GatewayError, IndirectionError};
pub use invocation::{
    CommandOutput, CommandSpec, RawOutput, ScriptArg, ScriptInvocation, ScriptOperation,
};
