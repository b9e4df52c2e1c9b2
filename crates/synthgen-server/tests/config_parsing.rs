use std::{env, fs};

use synthgen_server::config::loader::load_config;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    // Create a temporary TOML configuration file
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("synthgen.toml");

    let toml_content = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 4096

[generator]
executable = "/usr/bin/java"
launch_flags = ["-Xmx2g"]
classpath = "/opt/synthea/lib/*"
main_class = "App"
properties_file = "/tmp/synthea.properties"
stderr_noise_prefixes = ["SLF4J:"]

[output]
dir = "/data/output"

[relay]
channel_capacity = 256
replay_lines = 50

[logging]
level = "debug"
"#;
    fs::write(&path, toml_content).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.server.body_limit_bytes, 4096);
    assert_eq!(cfg.generator.executable, "/usr/bin/java");
    assert_eq!(cfg.generator.launch_flags, vec!["-Xmx2g"]);
    assert_eq!(cfg.output.dir, std::path::PathBuf::from("/data/output"));
    assert_eq!(cfg.relay.replay_lines, 50);
    assert_eq!(cfg.logging.level.to_ascii_lowercase(), "debug");
    assert_eq!(cfg.launch_spec().classpath(), "/opt/synthea/lib/*");

    // 2) Env override should win over file
    unsafe {
        env::set_var("SYNTHGEN__RELAY__REPLAY_LINES", "9");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.relay.replay_lines, 9);
    // cleanup env var
    unsafe {
        env::remove_var("SYNTHGEN__RELAY__REPLAY_LINES");
    }

    // 3) Invalid values are rejected
    let bad = dir.path().join("bad.toml");
    fs::write(
        &bad,
        r#"
[relay]
channel_capacity = 0
"#,
    )
    .expect("write bad toml");
    let err = load_config(bad.to_str()).unwrap_err();
    assert!(err.contains("channel_capacity"));

    // 4) A missing file falls back to defaults
    let missing = dir.path().join("missing.toml");
    let cfg_default = load_config(missing.to_str()).expect("defaults");
    assert_eq!(cfg_default.server.port, 8000);
    assert_eq!(cfg_default.output.dir, std::path::PathBuf::from("/app/output"));
}
