#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::env;
    use std::sync::Mutex;
    use tokio::test;

    // `Config::from_env` reads process-wide environment variables, so tests
    // that mutate them must not run concurrently with each other.
    static ENV_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    #[test]
    async fn test_config_from_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("RELAYMAIL_BIND_ADDRESS", "127.0.0.1");
        env::set_var("RELAYMAIL_PORT", "2525");
        env::set_var("RELAYMAIL_SECURITY_ENABLED", "false");

        let config = Config::from_env().expect("Failed to load config from environment in test");

        assert_eq!(config.smtp_bind_address, "127.0.0.1");
        assert_eq!(config.smtp_port, 2525);
        assert!(!config.security_enabled);

        env::remove_var("RELAYMAIL_BIND_ADDRESS");
        env::remove_var("RELAYMAIL_PORT");
        env::remove_var("RELAYMAIL_SECURITY_ENABLED");
    }

    #[test]
    async fn test_config_default_values() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::remove_var("RELAYMAIL_BIND_ADDRESS");
        env::remove_var("RELAYMAIL_PORT");
        env::remove_var("RELAYMAIL_SECURITY_ENABLED");
        env::remove_var("RELAYMAIL_HOSTNAME");

        let config = Config::from_env().expect("Failed to load config from environment in test");

        assert_eq!(config.smtp_bind_address, "0.0.0.0");
        assert_eq!(config.smtp_port, 25);
        assert!(config.security_enabled);
        assert_eq!(config.auth_store_path, "relaymail-auth.bin");
        assert!(config.hostname_override.is_none());
    }

    #[test]
    async fn test_config_rejects_invalid_port() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("RELAYMAIL_PORT", "not-a-port");

        let result = Config::from_env();
        assert!(result.is_err());

        env::remove_var("RELAYMAIL_PORT");
    }

    #[test]
    async fn test_config_rejects_invalid_security_flag() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("RELAYMAIL_SECURITY_ENABLED", "maybe");

        let result = Config::from_env();
        assert!(result.is_err());

        env::remove_var("RELAYMAIL_SECURITY_ENABLED");
    }
}
