#[cfg(test)]
mod tests {
    use crate::{load_capture_config, Args};
    use capture_core::{CaptureMode, InstallStrategy};
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Environment is process-wide; tests touching it run one at a time
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // Helper function to clear all environment variables that might affect tests
    fn clear_env_vars() {
        env::remove_var("CAPTURE_TARGET_URL");
        env::remove_var("CAPTURE_MODE");
        env::remove_var("CAPTURE_DATA_DIR");
        env::remove_var("CAPTURE_SETTLE_SECS");
        env::remove_var("CAPTURE_HEADLESS");
    }

    #[test]
    fn test_load_capture_config_defaults() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let config = load_capture_config(&Args::empty()).unwrap();

        // Should use default values
        assert!(config.headless);
        assert_eq!(config.capture.mode, CaptureMode::InPage);
        assert_eq!(config.capture.install_strategy, InstallStrategy::NewDocument);
        assert_eq!(config.capture.trigger_control_id, "ext-comp-1034-button");
        assert_eq!(config.capture.schedule.settle_secs, 30);
        assert_eq!(config.capture.data_dir, "./data/scrap_data");
    }

    #[test]
    fn test_load_capture_config_from_cli() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let args = Args {
            target_url: Some("https://monitoring.example.com/site".to_string()),
            mode: Some("protocol".to_string()),
            install_strategy: Some("head-script".to_string()),
            settle_secs: Some(10),
            headless: Some(false),
            ..Args::empty()
        };

        let config = load_capture_config(&args).unwrap();

        assert_eq!(config.capture.target_url, "https://monitoring.example.com/site");
        assert_eq!(config.capture.mode, CaptureMode::Protocol);
        assert_eq!(config.capture.install_strategy, InstallStrategy::HeadScript);
        assert_eq!(config.capture.schedule.settle_secs, 10);
        assert!(!config.headless);
    }

    #[test]
    fn test_load_capture_config_from_env() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("CAPTURE_MODE", "cdp");
        env::set_var("CAPTURE_DATA_DIR", "/var/lib/capture");
        env::set_var("CAPTURE_SETTLE_SECS", "45");
        env::set_var("CAPTURE_HEADLESS", "false");

        let config = load_capture_config(&Args::empty()).unwrap();

        assert_eq!(config.capture.mode, CaptureMode::Protocol);
        assert_eq!(config.capture.data_dir, "/var/lib/capture");
        assert_eq!(config.capture.schedule.settle_secs, 45);
        assert!(!config.headless);

        clear_env_vars();
    }

    #[test]
    fn test_load_capture_config_from_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let mut temp_file = NamedTempFile::new().unwrap();
        let config_content = r#"{
            "target_url": "https://monitoring.example.com/site/7",
            "rule": {
                "hosts": ["monitoring.example.com"],
                "paths": ["/api/sites/7/layout/energy"]
            },
            "trigger_control_id": "refresh-button",
            "schedule": { "min_wait_secs": 5, "max_wait_secs": 10 },
            "headless": false
        }"#;
        temp_file.write_all(config_content.as_bytes()).unwrap();

        let args = Args {
            config: Some(temp_file.path().to_path_buf()),
            ..Args::empty()
        };

        let config = load_capture_config(&args).unwrap();

        assert_eq!(config.capture.target_url, "https://monitoring.example.com/site/7");
        assert!(config.capture.rule.matches("https://monitoring.example.com/api/sites/7/layout/energy"));
        assert_eq!(config.capture.trigger_control_id, "refresh-button");
        assert_eq!(config.capture.schedule.max_wait_secs, 10);
        assert_eq!(config.capture.schedule.settle_secs, 30);
        assert!(!config.headless);
    }

    #[test]
    fn test_load_capture_config_precedence() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(br#"{ "mode": "InPage", "schedule": { "settle_secs": 5 } }"#)
            .unwrap();

        env::set_var("CAPTURE_MODE", "protocol");
        env::set_var("CAPTURE_SETTLE_SECS", "20");

        let args = Args {
            config: Some(temp_file.path().to_path_buf()),
            settle_secs: Some(40), // CLI override
            ..Args::empty()
        };

        let config = load_capture_config(&args).unwrap();

        // env beats file, CLI beats env
        assert_eq!(config.capture.mode, CaptureMode::Protocol);
        assert_eq!(config.capture.schedule.settle_secs, 40);

        clear_env_vars();
    }

    #[test]
    fn test_load_capture_config_invalid_env_values() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        env::set_var("CAPTURE_HEADLESS", "sometimes");

        let result = load_capture_config(&Args::empty());
        assert!(result.is_err());
        if let Err(e) = result {
            assert!(e.to_string().contains("Invalid CAPTURE_HEADLESS"));
        }

        clear_env_vars();
    }

    #[test]
    fn test_load_capture_config_invalid_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"{ not json").unwrap();

        let args = Args {
            config: Some(temp_file.path().to_path_buf()),
            ..Args::empty()
        };

        let err = load_capture_config(&args).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_load_capture_config_validation_failure() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        clear_env_vars();

        let args = Args {
            settle_secs: Some(0), // Invalid - zero settle time
            ..Args::empty()
        };

        let result = load_capture_config(&args);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("validation failed"));
    }
}
