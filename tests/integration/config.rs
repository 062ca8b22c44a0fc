//! Configuration loading and log level parsing

use frameloop::util::config::{load_config, load_config_from, parse_config, save_config, ConfigError};
use frameloop::util::logger::LogLevel;
use frameloop::{Executor, ExecutorConfig};

#[test]
fn test_defaults() {
    let config = ExecutorConfig::default();
    assert_eq!(config.thread_name, "frameloop-executor");
    assert_eq!(config.idle_timeout_ms, 50);
    assert_eq!(config.log_level, "info");
    assert!(config.stack_size.is_none());
    assert!(!config.collect_stats);
}

#[test]
fn test_partial_file_uses_defaults() {
    let config = parse_config("thread_name = \"ui\"\ncollect_stats = true\n").unwrap();
    assert_eq!(config.thread_name, "ui");
    assert!(config.collect_stats);
    assert_eq!(config.idle_timeout_ms, 50);
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let config = ExecutorConfig {
        thread_name: "render".to_string(),
        stack_size: Some(512 * 1024),
        idle_timeout_ms: 10,
        log_level: "debug".to_string(),
        collect_stats: true,
    };

    save_config(&config, &path).unwrap();
    assert_eq!(load_config_from(&path).unwrap(), config);
    assert_eq!(load_config(Some(&path)).unwrap(), config);
}

#[test]
fn test_errors() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    assert!(matches!(load_config_from(&missing), Err(ConfigError::Io { .. })));
    assert!(matches!(parse_config("idle_timeout_ms = \"soon\""), Err(ConfigError::Parse(_))));
}

#[test]
fn test_executor_uses_configured_thread_name() {
    let executor = Executor::with_config(ExecutorConfig {
        thread_name: "configured-owner".to_string(),
        ..ExecutorConfig::default()
    });
    executor.run_async().unwrap().result().unwrap();
    let name = executor
        .invoke(|| Ok(std::thread::current().name().map(str::to_string)))
        .unwrap();
    assert_eq!(name.as_deref(), Some("configured-owner"));
    executor.shutdown();
    executor.join().unwrap();
}

#[test]
fn test_log_level_parsing() {
    assert_eq!("debug".parse::<LogLevel>(), Ok(LogLevel::Debug));
    assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
    assert_eq!(" error ".parse::<LogLevel>(), Ok(LogLevel::Error));
    assert!("loud".parse::<LogLevel>().is_err());
    assert_eq!(LogLevel::Info.to_string(), "info");
}
