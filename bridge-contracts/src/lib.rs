// SPDX-License-Identifier: GPL-3.0-only

pub mod protocol;
pub mod traits;

pub use protocol::{
    BridgeError, BridgeErrorKind, CommandOutput, CommandSpec, GatewayError, IndirectionError,
    RawOutput, ScriptArg, ScriptInvocation, ScriptOperation,
};
pub use traits::{
    CommandRunner, DiskInventory, KernelLog, MountStore, NullProgress, PathProbe, ProgressSink,
    ScriptGateway, UserContextRunner,
};
