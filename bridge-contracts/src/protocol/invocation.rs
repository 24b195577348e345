// SPDX-License-Identifier: GPL-3.0-only

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operation implemented by an external script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptOperation {
    Mount,
    Unmount,
    Map,
    Unmap,
}

impl ScriptOperation {
    pub fn script_name(self) -> &'static str {
        match self {
            Self::Mount => "mount.ps1",
            Self::Unmount => "unmount.ps1",
            Self::Map => "map.ps1",
            Self::Unmap => "unmap.ps1",
        }
    }
}

impl std::fmt::Display for ScriptOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Map => "map",
            Self::Unmap => "unmap",
        };
        f.write_str(name)
    }
}

/// Named script parameter, rendered as `-Name value`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptArg {
    pub name: String,
    pub value: String,
}

impl ScriptArg {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    pub operation: ScriptOperation,
    pub arguments: Vec<ScriptArg>,
    pub elevated: bool,
}

impl ScriptInvocation {
    pub fn new(operation: ScriptOperation, elevated: bool) -> Self {
        Self {
            operation,
            arguments: Vec::new(),
            elevated,
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.arguments.push(ScriptArg::new(name, value));
        self
    }

    pub fn arg_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.arg(name, value),
            None => self,
        }
    }

    /// Arguments as `-Name value` pairs in invocation order
    pub fn rendered_args(&self) -> Vec<String> {
        self.arguments
            .iter()
            .flat_map(|arg| [format!("-{}", arg.name), arg.value.clone()])
            .collect()
    }
}

/// Raw text collected from a script run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawOutput {
    /// Exit code, unknown for elevated runs collected via result file
    pub exit_code: Option<i32>,
    pub text: String,
    pub stderr: String,
}

impl RawOutput {
    pub fn exited_nonzero(&self) -> bool {
        matches!(self.exit_code, Some(code) if code != 0)
    }
}

/// A plain host command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn render(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stderr when present, stdout otherwise
    pub fn error_text(&self) -> &str {
        if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}
