//! Sandboxed tool execution
//!
//! Every tool Claude can call runs here: file operations resolve through
//! the workspace [`PathSandbox`], shell commands are screened against the
//! blocked-pattern list and killed on timeout, and all output is truncated
//! before it feeds back into the model.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tracing::warn;

use crate::safety::{check_command_safety, PathSandbox, SandboxEscape};
use crate::truncate_safe;

/// Max output size to return to Claude (chars)
pub const MAX_OUTPUT: usize = 50_000;

/// Max glob matches reported
const MAX_GLOB_MATCHES: usize = 500;

/// Max grep matches reported
const MAX_GREP_MATCHES: usize = 200;

/// Result of a tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub output: String,
}

impl ToolOutcome {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    fn fail(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Execute Claude tools within a sandboxed workspace.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    sandbox: PathSandbox,
    blocked_commands: Vec<String>,
    command_timeout: u64,
}

impl ToolExecutor {
    pub fn new(sandbox: PathSandbox, blocked_commands: Vec<String>, command_timeout: u64) -> Self {
        Self {
            sandbox,
            blocked_commands,
            command_timeout,
        }
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    /// Execute a tool by name. Never errors: failures come back as
    /// unsuccessful outcomes so they can feed into the model as
    /// tool_result blocks.
    pub async fn execute(&self, tool_name: &str, input: &Value) -> ToolOutcome {
        let result = match tool_name {
            "read_file" => self.read_file(input).await,
            "write_file" => self.write_file(input).await,
            "edit_file" => self.edit_file(input).await,
            "bash" => self.bash(input).await,
            "glob" => self.glob(input).await,
            "grep" => self.grep(input).await,
            "list_directory" => self.list_directory(input).await,
            _ => return ToolOutcome::fail(format!("Unknown tool: {}", tool_name)),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.downcast_ref::<SandboxEscape>().is_some() => {
                ToolOutcome::fail(format!("Safety error: {}", e))
            }
            Err(e) => {
                warn!("Tool {} failed: {:#}", tool_name, e);
                ToolOutcome::fail(format!("Error: {}", e))
            }
        }
    }

    async fn read_file(&self, input: &Value) -> Result<ToolOutcome> {
        let raw_path = required_str(input, "path")?;
        let path = self.sandbox.resolve(raw_path)?;
        if !path.is_file() {
            return Ok(ToolOutcome::fail(format!("File not found: {}", raw_path)));
        }

        let bytes = tokio::fs::read(&path).await.context("Failed to read file")?;
        let text = String::from_utf8_lossy(&bytes);
        let mut lines: Vec<&str> = text.split_inclusive('\n').collect();

        if let Some(offset) = input.get("offset").and_then(Value::as_i64) {
            let start = offset.saturating_sub(1).max(0) as usize;
            lines = if start < lines.len() {
                lines.split_off(start)
            } else {
                Vec::new()
            };
        }
        if let Some(limit) = input.get("limit").and_then(Value::as_u64) {
            lines.truncate(limit as usize);
        }

        let output = lines.concat();
        if output.chars().count() > MAX_OUTPUT {
            let total = text.chars().count();
            return Ok(ToolOutcome::ok(format!(
                "{}\n... (truncated, {} total chars)",
                truncate_safe(&output, MAX_OUTPUT),
                total
            )));
        }
        Ok(ToolOutcome::ok(output))
    }

    async fn write_file(&self, input: &Value) -> Result<ToolOutcome> {
        let raw_path = required_str(input, "path")?;
        let content = required_str(input, "content")?;
        let path = self.sandbox.resolve(raw_path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create parent directories")?;
        }
        tokio::fs::write(&path, content)
            .await
            .context("Failed to write file")?;

        Ok(ToolOutcome::ok(format!(
            "Wrote {} chars to {}",
            content.chars().count(),
            raw_path
        )))
    }

    async fn edit_file(&self, input: &Value) -> Result<ToolOutcome> {
        let raw_path = required_str(input, "path")?;
        let old_text = required_str(input, "old_text")?;
        let new_text = required_str(input, "new_text")?;
        let path = self.sandbox.resolve(raw_path)?;
        if !path.is_file() {
            return Ok(ToolOutcome::fail(format!("File not found: {}", raw_path)));
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .context("Failed to read file")?;

        let count = text.matches(old_text).count();
        if count == 0 {
            return Ok(ToolOutcome::fail("old_text not found in file"));
        }
        if count > 1 {
            return Ok(ToolOutcome::fail(format!(
                "old_text found {} times — must be unique",
                count
            )));
        }

        let updated = text.replacen(old_text, new_text, 1);
        tokio::fs::write(&path, updated)
            .await
            .context("Failed to write file")?;
        Ok(ToolOutcome::ok("Edit applied"))
    }

    async fn bash(&self, input: &Value) -> Result<ToolOutcome> {
        let command = required_str(input, "command")?;
        let timeout_secs = input
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.command_timeout);

        if let Some(pattern) = check_command_safety(command, &self.blocked_commands) {
            return Ok(ToolOutcome::fail(format!(
                "Blocked command pattern: {}",
                pattern
            )));
        }

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(self.sandbox.root())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(home) = dirs::home_dir() {
            cmd.env("HOME", home);
        }
        // Own process group so a timeout can kill the whole tree
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd.spawn().context("Failed to spawn command")?;
        let pid = child.id();

        match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output())
            .await
        {
            Ok(result) => {
                let output = result.context("Failed to get command output")?;
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));

                if combined.chars().count() > MAX_OUTPUT {
                    combined = format!("{}\n... (truncated)", truncate_safe(&combined, MAX_OUTPUT));
                }

                if !output.status.success() {
                    let code = output.status.code().unwrap_or(-1);
                    return Ok(ToolOutcome::fail(format!("Exit code {}\n{}", code, combined)));
                }
                Ok(ToolOutcome::ok(combined))
            }
            Err(_) => {
                #[cfg(unix)]
                if let Some(pid) = pid {
                    unsafe {
                        libc::kill(-(pid as i32), libc::SIGKILL);
                    }
                }
                #[cfg(not(unix))]
                let _ = pid;
                Ok(ToolOutcome::fail(format!(
                    "Command timed out after {}s",
                    timeout_secs
                )))
            }
        }
    }

    async fn glob(&self, input: &Value) -> Result<ToolOutcome> {
        let pattern = required_str(input, "pattern")?;
        let search_dir = self.resolve_base(input)?;

        let full_pattern = format!("{}/{}", search_dir.display(), pattern);
        let mut matches: Vec<String> = glob::glob(&full_pattern)
            .context("Invalid glob pattern")?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_file())
            .map(|p| self.relative_display(&p))
            .collect();
        matches.sort();

        if matches.is_empty() {
            return Ok(ToolOutcome::ok("No matches found"));
        }

        let mut output = matches
            .iter()
            .take(MAX_GLOB_MATCHES)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if matches.len() > MAX_GLOB_MATCHES {
            output.push_str(&format!("\n... ({} total matches)", matches.len()));
        }
        Ok(ToolOutcome::ok(output))
    }

    async fn grep(&self, input: &Value) -> Result<ToolOutcome> {
        let pattern = required_str(input, "pattern")?;
        let include = input.get("include").and_then(Value::as_str);
        let search_path = self.resolve_base(input)?;

        let regex = match regex::Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return Ok(ToolOutcome::fail(format!("Invalid regex: {}", e))),
        };

        let mut results: Vec<String> = Vec::new();
        if search_path.is_file() {
            results = self.grep_file(&search_path, &regex);
        } else {
            let glob_pattern =
                format!("{}/{}", search_path.display(), include.unwrap_or("**/*"));
            for entry in glob::glob(&glob_pattern)
                .context("Invalid include pattern")?
                .filter_map(|e| e.ok())
            {
                if !entry.is_file() || self.has_hidden_component(&entry) {
                    continue;
                }
                results.extend(self.grep_file(&entry, &regex));
                if results.len() >= MAX_GREP_MATCHES {
                    break;
                }
            }
        }

        if results.is_empty() {
            return Ok(ToolOutcome::ok("No matches found"));
        }

        let mut output = results
            .iter()
            .take(MAX_GREP_MATCHES)
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        if results.len() > MAX_GREP_MATCHES {
            output.push_str(&format!("\n... ({} total matches)", results.len()));
        }
        Ok(ToolOutcome::ok(output))
    }

    async fn list_directory(&self, input: &Value) -> Result<ToolOutcome> {
        let base = input.get("path").and_then(Value::as_str).unwrap_or("");
        let dir_path = self.resolve_base(input)?;

        if !dir_path.is_dir() {
            return Ok(ToolOutcome::fail(format!(
                "Not a directory: {}",
                if base.is_empty() { "." } else { base }
            )));
        }

        let mut entries: Vec<(String, bool)> = std::fs::read_dir(&dir_path)
            .context("Failed to read directory")?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') {
                    return None;
                }
                let is_dir = e.path().is_dir();
                Some((name, is_dir))
            })
            .collect();
        entries.sort();

        if entries.is_empty() {
            return Ok(ToolOutcome::ok("(empty directory)"));
        }

        let listing = entries
            .into_iter()
            .map(|(name, is_dir)| if is_dir { format!("{}/", name) } else { name })
            .collect::<Vec<_>>()
            .join("\n");
        Ok(ToolOutcome::ok(listing))
    }

    /// Resolve the optional `path` input, defaulting to the sandbox root.
    fn resolve_base(&self, input: &Value) -> Result<PathBuf> {
        match input.get("path").and_then(Value::as_str) {
            Some(base) if !base.is_empty() => self.sandbox.resolve(base),
            _ => Ok(self.sandbox.root().to_path_buf()),
        }
    }

    fn relative_display(&self, path: &Path) -> String {
        path.strip_prefix(self.sandbox.root())
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Whether any path segment below the sandbox root starts with a dot.
    fn has_hidden_component(&self, path: &Path) -> bool {
        path.strip_prefix(self.sandbox.root())
            .unwrap_or(path)
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
    }

    fn grep_file(&self, path: &Path, regex: &regex::Regex) -> Vec<String> {
        let Ok(bytes) = std::fs::read(path) else {
            return Vec::new();
        };
        let text = String::from_utf8_lossy(&bytes);
        let rel = self.relative_display(path);
        text.lines()
            .enumerate()
            .filter(|(_, line)| regex.is_match(line))
            .map(|(i, line)| format!("{}:{}: {}", rel, i + 1, line))
            .collect()
    }
}

fn required_str<'a>(input: &'a Value, field: &str) -> Result<&'a str> {
    input
        .get(field)
        .and_then(Value::as_str)
        .with_context(|| format!("missing required field: {}", field))
}
