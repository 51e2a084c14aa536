//! tmux 实现
//!
//! 直接以参数数组调用 `tmux`，操作者文本不经过 shell 插值；非零退出码一律吞掉（debug 日志），
//! 只有 tmux 本身无法启动或超时才返回错误。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;

use super::process::ProcessGroups;
use crate::config::RuntimeSection;

/// 单条 tmux 命令的超时
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TmuxProcessGroups {
    runtime: RuntimeSection,
}

impl TmuxProcessGroups {
    pub fn new(runtime: RuntimeSection) -> Self {
        Self { runtime }
    }

    fn project_dir(&self) -> PathBuf {
        let dir = &self.runtime.project_dir;
        dir.canonicalize().unwrap_or_else(|_| dir.clone())
    }

    async fn tmux(&self, args: &[&str]) -> anyhow::Result<Output> {
        let mut cmd = Command::new("tmux");
        cmd.args(args).current_dir(self.project_dir()).kill_on_drop(true);

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .with_context(|| format!("tmux {} timed out", args.first().unwrap_or(&"")))?
            .context("failed to run tmux")?;

        if !output.status.success() {
            tracing::debug!(
                ?args,
                status = ?output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "tmux exited non-zero (suppressed)"
            );
        }
        Ok(output)
    }

    async fn launch_watcher(&self, session_id: &str) -> anyhow::Result<()> {
        let script = self.project_dir().join(&self.runtime.watcher_script);
        let command = watcher_command(session_id, &script);
        self.tmux(&["new-session", "-d", "-s", &self.runtime.watcher, &command])
            .await?;
        Ok(())
    }

    async fn launch_agent(&self, name: &str) -> anyhow::Result<()> {
        let width = self.runtime.window_width.to_string();
        let height = self.runtime.window_height.to_string();
        self.tmux(&["new-session", "-d", "-s", name, "-x", &width, "-y", &height])
            .await?;
        tokio::time::sleep(self.runtime.launch_settle()).await;

        let workdir = self.project_dir().join(name);
        let command = agent_command(&workdir, &self.runtime.prompt_file, &self.runtime.agent_command);
        self.send_input(name, &command).await
    }
}

#[async_trait]
impl ProcessGroups for TmuxProcessGroups {
    async fn list_live(&self) -> anyhow::Result<HashSet<String>> {
        let output = self.tmux(&["list-sessions", "-F", "#{session_name}"]).await?;
        // 没有 tmux server 时退出码非零，等同于没有存活的进程组
        if !output.status.success() {
            return Ok(HashSet::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn launch(&self, session_id: &str) -> anyhow::Result<()> {
        tracing::info!(session_id, "launching process group");
        self.launch_watcher(session_id).await?;
        self.launch_agent(&self.runtime.agent_a).await?;
        self.launch_agent(&self.runtime.agent_b).await?;
        Ok(())
    }

    async fn kill(&self, name: &str) -> anyhow::Result<()> {
        self.tmux(&["kill-session", "-t", name]).await?;
        Ok(())
    }

    async fn send_input(&self, target: &str, text: &str) -> anyhow::Result<()> {
        self.tmux(&["send-keys", "-t", target, "-l", text]).await?;
        self.tmux(&["send-keys", "-t", target, "Enter"]).await?;
        Ok(())
    }
}

/// 单引号转义，供 tmux 交给 shell 执行的命令串使用
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn watcher_command(session_id: &str, script: &Path) -> String {
    format!(
        "SESSION_ID={} bash {}",
        shell_quote(session_id),
        shell_quote(&script.to_string_lossy())
    )
}

fn agent_command(workdir: &Path, prompt_file: &str, agent_command: &str) -> String {
    format!(
        "cd {} && PROMPT=$(cat {}) && {} --append-system-prompt \"$PROMPT\"",
        shell_quote(&workdir.to_string_lossy()),
        shell_quote(prompt_file),
        agent_command
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("plain"), "'plain'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }

    #[test]
    fn test_watcher_command() {
        let cmd = watcher_command("session_1", Path::new("/srv/duet/scripts/watch.sh"));
        assert_eq!(cmd, "SESSION_ID='session_1' bash '/srv/duet/scripts/watch.sh'");
    }

    #[test]
    fn test_agent_command() {
        let cmd = agent_command(Path::new("/srv/duet/claude1"), "CLAUDE.md", "claude --model haiku");
        assert_eq!(
            cmd,
            "cd '/srv/duet/claude1' && PROMPT=$(cat 'CLAUDE.md') && claude --model haiku --append-system-prompt \"$PROMPT\""
        );
    }
}
