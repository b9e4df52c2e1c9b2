use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf};
use synthgen_core::LaunchSpec;
use synthgen_core::events::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_REPLAY_LIMIT};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// How the external generator is launched
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub output: OutputConfig,
    /// Log relay buffering
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Generator validations
        if self.generator.executable.trim().is_empty() {
            return Err("generator.executable must not be empty".into());
        }
        if self.generator.main_class.trim().is_empty() {
            return Err("generator.main_class must not be empty".into());
        }
        if self.generator.properties_file.as_os_str().is_empty() {
            return Err("generator.properties_file must not be empty".into());
        }
        if self.output.dir.as_os_str().is_empty() {
            return Err("output.dir must not be empty".into());
        }
        // Relay validations
        if self.relay.channel_capacity == 0 {
            return Err("relay.channel_capacity must be > 0".into());
        }
        if self.relay.replay_lines > MAX_REPLAY_LINES {
            return Err(format!("relay.replay_lines must be <= {MAX_REPLAY_LINES}"));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            executable: self.generator.executable.clone(),
            launch_flags: self.generator.launch_flags.clone(),
            classpath: self.generator.classpath.clone(),
            jar_path: self.generator.jar_path.clone(),
            main_class: self.generator.main_class.clone(),
            properties_file: self.generator.properties_file.clone(),
        }
    }
}

const MAX_REPLAY_LINES: usize = 100_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}
fn default_body_limit() -> usize {
    64 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
        }
    }
}

/// Generator launch settings.
///
/// `launch_flags` and `classpath` fall back to the `JAVA_OPTS` and
/// `CLASSPATH` environment variables when unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default)]
    pub launch_flags: Vec<String>,
    #[serde(default)]
    pub classpath: Option<String>,
    #[serde(default = "default_jar_path")]
    pub jar_path: PathBuf,
    #[serde(default = "default_main_class")]
    pub main_class: String,
    #[serde(default = "default_properties_file")]
    pub properties_file: PathBuf,
    /// stderr lines starting with any of these are not relayed
    #[serde(default = "default_stderr_noise_prefixes")]
    pub stderr_noise_prefixes: Vec<String>,
}

fn default_executable() -> String {
    "java".into()
}
fn default_jar_path() -> PathBuf {
    PathBuf::from("/app/synthea-with-dependencies.jar")
}
fn default_main_class() -> String {
    "App".into()
}
fn default_properties_file() -> PathBuf {
    PathBuf::from("/app/synthea.properties")
}
fn default_stderr_noise_prefixes() -> Vec<String> {
    vec!["SLF4J:".into(), "log4j:WARN".into()]
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            launch_flags: Vec::new(),
            classpath: None,
            jar_path: default_jar_path(),
            main_class: default_main_class(),
            properties_file: default_properties_file(),
            stderr_noise_prefixes: default_stderr_noise_prefixes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("/app/output")
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Events retained for subscribers that connect mid-job; 0 disables replay
    #[serde(default = "default_replay_lines")]
    pub replay_lines: usize,
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}
fn default_replay_lines() -> usize {
    DEFAULT_REPLAY_LIMIT
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            replay_lines: default_replay_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                // Try default root-level file
                let default_path = PathBuf::from("synthgen.toml");
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., SYNTHGEN__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("SYNTHGEN")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let mut merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        apply_process_env(
            &mut merged,
            std::env::var("JAVA_OPTS").ok(),
            std::env::var("CLASSPATH").ok(),
        );
        // Validate
        merged.validate()?;
        Ok(merged)
    }

    /// Fill generator launch settings from the conventional JVM variables
    /// when the configuration leaves them unset.
    pub fn apply_process_env(
        cfg: &mut AppConfig,
        java_opts: Option<String>,
        classpath: Option<String>,
    ) {
        if cfg.generator.launch_flags.is_empty()
            && let Some(opts) = java_opts
        {
            cfg.generator.launch_flags = opts.split_whitespace().map(str::to_string).collect();
        }
        if cfg.generator.classpath.is_none() {
            cfg.generator.classpath = classpath.filter(|cp| !cp.trim().is_empty());
        }
    }
}
