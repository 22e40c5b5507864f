//! Approval policy for mutating tool actions

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How strictly mutating actions are gated
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Approve everything
    Yolo,
    /// Never ask: run known-safe commands, reject the rest
    Never,
    /// Approve anything not dangerous
    Auto,
    /// Approve anything not dangerous; failures are reported back to the model
    OnFailure,
    /// Approve file edits, ask for unknown commands
    AutoEdit,
    /// Ask for anything not known to be safe
    #[default]
    OnRequest,
}

impl ApprovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalPolicy::Yolo => "yolo",
            ApprovalPolicy::Never => "never",
            ApprovalPolicy::Auto => "auto",
            ApprovalPolicy::OnFailure => "on-failure",
            ApprovalPolicy::AutoEdit => "auto-edit",
            ApprovalPolicy::OnRequest => "on-request",
        }
    }
}

impl fmt::Display for ApprovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "yolo" => Ok(ApprovalPolicy::Yolo),
            "never" => Ok(ApprovalPolicy::Never),
            "auto" => Ok(ApprovalPolicy::Auto),
            "on-failure" => Ok(ApprovalPolicy::OnFailure),
            "auto-edit" => Ok(ApprovalPolicy::AutoEdit),
            "on-request" => Ok(ApprovalPolicy::OnRequest),
            other => Err(format!(
                "unknown approval policy '{}' (expected yolo, never, auto, on-failure, auto-edit, on-request)",
                other
            )),
        }
    }
}

/// Outcome of evaluating one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    NeedsConfirmation,
}

/// The facts about an action that the policy looks at
#[derive(Debug, Clone, Copy, Default)]
pub struct ApprovalRequest<'a> {
    pub is_mutating: bool,
    pub command: Option<&'a str>,
    pub paths: &'a [PathBuf],
    pub dangerous: bool,
}

static DANGEROUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Recursive wipes at root or home
        r"(?i)\brm\s+(?:-\S+\s+)*(?:/|/\*|~/?|\$HOME/?)(?:\s|$)",
        r"(?i)--no-preserve-root",
        // Disk formatting and raw device writes
        r"(?i)\bmkfs(?:\.\w+)?\b",
        r"(?i)\b(?:fdisk|parted|wipefs)\b",
        r"(?i)\bdd\s+.*\bof=/dev/",
        r"(?i)>\s*/dev/(?:sd[a-z]|hd[a-z]|nvme|disk)",
        r"(?i)\bformat\s+[a-z]:",
        // Fork bomb
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        // Ownership and permission changes at root
        r"(?i)\b(?:chmod|chown|chgrp)\s+(?:-\S+\s+)*\S+\s+/(?:\s|$|\*)",
        // Power state
        r"(?i)\b(?:shutdown|reboot|halt|poweroff)\b",
        r"(?i)\binit\s+[06]\b",
        // Remote content piped into a shell
        r"(?i)\b(?:curl|wget)\b.*\|\s*(?:sudo\s+)?(?:ba|z|k|da|fi)?sh\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static SAFE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Listing and file inspection
        r"(?i)^(?:ls|ll|pwd|cat|head|tail|less|wc|file|stat|tree|du|df|realpath|basename|dirname)(?:\s|$)",
        // Process and environment introspection (`env` is checked separately)
        r"(?i)^(?:echo|which|whereis|type|whoami|id|hostname|uname|date|uptime|printenv|ps|free)(?:\s|$)",
        // Version control reads
        r"(?i)^git\s+(?:status|log|diff|show|rev-parse|blame|ls-files|describe)(?:\s|$)",
        r"(?i)^git\s+branch(?:\s+(?:-a|-r|-v|-vv|--all|--remotes|--list|--show-current))*\s*$",
        r"(?i)^git\s+remote(?:\s+-v|\s+show\s+\S+)?\s*$",
        // Search and text processing
        r"(?i)^(?:grep|egrep|fgrep|rg|ag|find|fd|sort|uniq|cut|tr|awk|jq|column|nl|diff|comm)(?:\s|$)",
        // Printing line ranges only; other sed scripts can write or execute
        r#"(?i)^sed\s+-n\s+['"]?(?:\d+|\$)(?:,(?:\d+|\$))?p['"]?(?:\s+[^\s-]\S*)*\s*$"#,
        // Toolchain version queries
        r"(?i)^(?:cargo|rustc|node|npm|python3?|go|java|ruby)\s+(?:--version|-v|-V|version)\s*$",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Flags and programs that make an otherwise read-only command write files
/// or run other programs
static UNSAFE_FLAGS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\s-(?:delete|exec|execdir|ok|okdir|fprint|fprint0|fprintf|fls)(?:\s|$)",
        r"(?i)^sort\s(?:.*\s)?(?:-[a-z]*o|--output)",
        r"(?i)^git\s.*\s--output(?:=|\s|$)",
        r"(?i)^awk\s.*\bsystem\s*\(",
        r"(?i)^tree\s(?:.*\s)?-o(?:\s|$)",
        r"(?i)^uniq(?:\s+-\S+)*\s+[^\s-]\S*\s+[^\s-]\S*",
        r"(?i)^rg\s.*--pre\b",
        r"(?i)^fd\s(?:.*\s)?(?:-x|-X|--exec|--exec-batch)(?:\s|=|$)",
        r"(?i)^date\s(?:.*\s)?(?:-s|--set)\b",
        r"(?i)\s--pager\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Whether `command` matches a known-destructive pattern
pub fn is_dangerous_command(command: &str) -> bool {
    DANGEROUS_PATTERNS.iter().any(|re| re.is_match(command))
}

/// Whether `command` is a read-only inspection command. Pipelines are safe when
/// every stage is; sequencing, redirection and substitution never are.
pub fn is_safe_command(command: &str) -> bool {
    let command = command.trim();
    if command.is_empty() {
        return false;
    }
    if ["&&", "||", ";", ">", "<", "`", "$(", "&"]
        .iter()
        .any(|op| command.contains(op))
    {
        return false;
    }
    command.split('|').all(|stage| is_safe_stage(stage.trim()))
}

fn is_safe_stage(stage: &str) -> bool {
    if UNSAFE_FLAGS.iter().any(|re| re.is_match(stage)) {
        return false;
    }
    let mut words = stage.split_whitespace();
    if words.next().is_some_and(|word| word.eq_ignore_ascii_case("env")) {
        return words.all(is_inert_env_arg);
    }
    SAFE_PATTERNS.iter().any(|re| re.is_match(stage))
}

/// `env` only prints when every argument is an assignment or a flag; the
/// first other word is a program it runs. `-S` splits a string into a command.
fn is_inert_env_arg(arg: &str) -> bool {
    if arg.starts_with("-S") || arg.starts_with("--split-string") {
        return false;
    }
    arg.starts_with('-') || (arg.contains('=') && !arg.starts_with('='))
}

/// Lexically resolve `path` against `base`, without touching the filesystem
pub fn normalize_path(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Policy engine deciding whether an action runs, is refused, or needs a human
#[derive(Debug, Clone)]
pub struct ApprovalManager {
    policy: ApprovalPolicy,
    working_dir: PathBuf,
}

impl ApprovalManager {
    /// A relative `working_dir` is resolved against the process directory
    pub fn new(policy: ApprovalPolicy, working_dir: impl Into<PathBuf>) -> Self {
        let working_dir = working_dir.into();
        let working_dir = std::path::absolute(&working_dir).unwrap_or(working_dir);
        let working_dir = normalize_path(&working_dir, Path::new(""));
        Self {
            policy,
            working_dir,
        }
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Evaluate one action
    pub fn evaluate(&self, request: &ApprovalRequest<'_>) -> ApprovalDecision {
        if !request.is_mutating {
            return ApprovalDecision::Approved;
        }
        if self.policy == ApprovalPolicy::Yolo {
            return ApprovalDecision::Approved;
        }

        let mut decision = match request.command {
            Some(command) => self.evaluate_command(command),
            None => self.evaluate_edit(),
        };

        if request.paths.iter().any(|p| !self.is_within_working_dir(p)) {
            tracing::debug!(paths = ?request.paths, "Action touches paths outside the working directory");
            decision = ApprovalDecision::NeedsConfirmation;
        }

        if request.dangerous && decision == ApprovalDecision::Approved {
            decision = ApprovalDecision::NeedsConfirmation;
        }

        decision
    }

    fn evaluate_command(&self, command: &str) -> ApprovalDecision {
        if is_dangerous_command(command) {
            return ApprovalDecision::Rejected;
        }
        let safe = is_safe_command(command);
        match self.policy {
            ApprovalPolicy::Yolo | ApprovalPolicy::Auto | ApprovalPolicy::OnFailure => {
                ApprovalDecision::Approved
            }
            ApprovalPolicy::Never if safe => ApprovalDecision::Approved,
            ApprovalPolicy::Never => ApprovalDecision::Rejected,
            ApprovalPolicy::AutoEdit | ApprovalPolicy::OnRequest if safe => {
                ApprovalDecision::Approved
            }
            ApprovalPolicy::AutoEdit | ApprovalPolicy::OnRequest => {
                ApprovalDecision::NeedsConfirmation
            }
        }
    }

    /// Mutations that are not shell commands (file writes, edits)
    fn evaluate_edit(&self) -> ApprovalDecision {
        match self.policy {
            ApprovalPolicy::OnRequest => ApprovalDecision::NeedsConfirmation,
            _ => ApprovalDecision::Approved,
        }
    }

    /// Whether `path` stays inside the working directory once resolved. Nothing
    /// is inside a working directory that could not be made absolute.
    pub fn is_within_working_dir(&self, path: &Path) -> bool {
        self.working_dir.is_absolute()
            && normalize_path(&self.working_dir, path).starts_with(&self.working_dir)
    }
}
