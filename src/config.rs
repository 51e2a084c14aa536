//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `DUET__*` 覆盖（双下划线表示嵌套，如 `DUET__WEB__PORT=8080`）。
//! 所有字段都有默认值，没有配置文件也能启动。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageSection,
    pub runtime: RuntimeSection,
    pub web: WebSection,
}

/// [storage] 段：消息与 idea 数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// 包含 sessions/、active_session.json、running_session.json
    pub messages_dir: PathBuf,
    /// idea 评审看板的只读数据目录
    pub ideas_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            messages_dir: PathBuf::from("messages"),
            ideas_dir: PathBuf::from("ideas"),
        }
    }
}

/// [runtime] 段：tmux 进程组、启动命令与等待时间
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    /// 项目根目录：agent 工作目录与 watcher 脚本都相对于它
    pub project_dir: PathBuf,
    pub agent_a: String,
    pub agent_b: String,
    /// watcher 进程组名；它存活即视为对话在运行
    pub watcher: String,
    pub watcher_script: String,
    /// 在 agent 工作目录中执行，系统提示取自 prompt_file
    pub agent_command: String,
    pub prompt_file: String,
    pub window_width: u16,
    pub window_height: u16,
    /// 新建 tmux 会话后、发送启动命令前的等待
    pub launch_settle_ms: u64,
    /// 启动 agent 后、投递首条消息前的等待
    pub kickoff_delay_ms: u64,
    /// 附加在人类消息之后的开场指令
    pub kickoff_instruction: String,
    /// Web 服务退出时是否顺带停止对话
    pub stop_on_shutdown: bool,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            agent_a: "claude1".to_string(),
            agent_b: "claude2".to_string(),
            watcher: "watcher".to_string(),
            watcher_script: "scripts/watch_messages.sh".to_string(),
            agent_command: "claude --dangerously-skip-permissions --model haiku".to_string(),
            prompt_file: "CLAUDE.md".to_string(),
            window_width: 200,
            window_height: 50,
            launch_settle_ms: 300,
            kickoff_delay_ms: 3000,
            kickoff_instruction: "Take this as the theme and start a conversation with claude2."
                .to_string(),
            stop_on_shutdown: false,
        }
    }
}

impl RuntimeSection {
    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    pub fn kickoff_delay(&self) -> Duration {
        Duration::from_millis(self.kickoff_delay_ms)
    }

    /// 属于一次对话的全部进程组名
    pub fn group_names(&self) -> [&str; 3] {
        [&self.agent_a, &self.agent_b, &self.watcher]
    }
}

/// [web] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub host: String,
    pub port: u16,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 DUET__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 DUET__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("DUET")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.storage.messages_dir, PathBuf::from("messages"));
        assert_eq!(cfg.runtime.group_names(), ["claude1", "claude2", "watcher"]);
        assert_eq!(cfg.runtime.launch_settle(), Duration::from_millis(300));
        assert_eq!(cfg.web.port, 3000);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("duet.toml");
        std::fs::write(
            &path,
            "[runtime]\nkickoff_delay_ms = 10\nwatcher = \"w\"\n\n[storage]\nmessages_dir = \"/tmp/m\"\n",
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.runtime.kickoff_delay_ms, 10);
        assert_eq!(cfg.runtime.watcher, "w");
        // 未覆盖的键保留默认
        assert_eq!(cfg.runtime.agent_a, "claude1");
        assert_eq!(cfg.storage.messages_dir, PathBuf::from("/tmp/m"));
        assert_eq!(cfg.storage.ideas_dir, PathBuf::from("ideas"));
    }
}
