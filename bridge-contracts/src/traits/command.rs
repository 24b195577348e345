// SPDX-License-Identifier: GPL-3.0-only

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    CommandOutput, CommandSpec, GatewayError, IndirectionError, RawOutput, ScriptInvocation,
};

/// Runs a host command in the current process context
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, GatewayError>;
}

/// Runs mount/unmount/map/unmap scripts, elevated or not
#[async_trait]
pub trait ScriptGateway: Send + Sync {
    async fn execute(
        &self,
        invocation: &ScriptInvocation,
        cancel: &CancellationToken,
    ) -> Result<RawOutput, GatewayError>;
}

/// Runs a command as the interactive desktop user
///
/// Implementations schedule the command under the user's principal, run it,
/// collect its output and remove every trace of the scheduling afterwards.
/// Queries whose answer depends on the user's session (drive mappings) must
/// go through the same runner as the mutation they verify.
#[async_trait]
pub trait UserContextRunner: Send + Sync {
    async fn run_as_user(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, IndirectionError>;
}
