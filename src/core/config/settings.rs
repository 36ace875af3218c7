use super::parsing::{
    env_optional, env_or_default, parse_bool, parse_cors_origins, parse_environment, parse_u16,
    parse_u32, parse_u64, parse_u64_list, parse_usize,
};
use super::types::{
    ApiSettings, ConfigError, CorsSettings, DatabaseSettings, EngineSettings, QueueSettings,
    ReconcileSettings, RedisSettings, RuntimeSettings, ScoringSettings, ServerHost, ServerPort,
    ServerSettings, Settings, TelemetrySettings,
};

impl Settings {
    pub(crate) fn load() -> Result<Self, ConfigError> {
        let host = env_or_default("REDINK_HOST", "0.0.0.0");
        let port = env_or_default("REDINK_PORT", "8000");

        let environment =
            parse_environment(env_optional("REDINK_ENV").or_else(|| env_optional("ENVIRONMENT")));
        let strict_config =
            env_optional("REDINK_STRICT_CONFIG").map(|value| parse_bool(&value)).unwrap_or(false)
                || environment.is_production();

        let project_name = env_or_default("PROJECT_NAME", "Redink API");
        let version = env_or_default("VERSION", env!("CARGO_PKG_VERSION"));
        let api_v1_str = env_or_default("API_V1_STR", "/api/v1");

        let cors_origins = parse_cors_origins(env_optional("BACKEND_CORS_ORIGINS"))?;

        let postgres_server = env_or_default("POSTGRES_SERVER", "localhost");
        let postgres_port = parse_u16("POSTGRES_PORT", env_or_default("POSTGRES_PORT", "5432"))?;
        let postgres_user = env_or_default("POSTGRES_USER", "redink");
        let postgres_password = env_or_default("POSTGRES_PASSWORD", "");
        let postgres_db = env_or_default("POSTGRES_DB", "redink_db");
        let database_url = env_optional("DATABASE_URL");

        let redis_host = env_or_default("REDIS_HOST", "localhost");
        let redis_port = parse_u16("REDIS_PORT", env_or_default("REDIS_PORT", "6379"))?;
        let redis_db = parse_u16("REDIS_DB", env_or_default("REDIS_DB", "0"))?;
        let redis_password = env_or_default("REDIS_PASSWORD", "");

        let scoring_api_key = env_or_default("SCORING_API_KEY", "");
        let scoring_base_url = env_or_default("SCORING_BASE_URL", "");
        let scoring_model = env_or_default("SCORING_MODEL", "gpt-4o");
        let scoring_max_tokens =
            parse_u32("SCORING_MAX_TOKENS", env_or_default("SCORING_MAX_TOKENS", "10000"))?;
        let scoring_request_timeout = parse_u64(
            "SCORING_REQUEST_TIMEOUT",
            env_or_default("SCORING_REQUEST_TIMEOUT", "600"),
        )?;

        let min_content_chars = parse_u64(
            "ESSAY_MIN_CONTENT_CHARS",
            env_or_default("ESSAY_MIN_CONTENT_CHARS", "20"),
        )?;
        let max_content_chars = parse_u64(
            "ESSAY_MAX_CONTENT_CHARS",
            env_or_default("ESSAY_MAX_CONTENT_CHARS", "65000"),
        )?;
        let lock_ttl_seconds = parse_u64(
            "CORRECTION_LOCK_TTL_SECONDS",
            env_or_default("CORRECTION_LOCK_TTL_SECONDS", "600"),
        )?;
        let max_retries =
            parse_u32("CORRECTION_MAX_RETRIES", env_or_default("CORRECTION_MAX_RETRIES", "2"))?;
        let retry_backoff_seconds = parse_u64_list(
            "CORRECTION_RETRY_BACKOFF_SECONDS",
            env_or_default("CORRECTION_RETRY_BACKOFF_SECONDS", "5,10"),
        )?;

        let worker_concurrency = parse_usize(
            "CORRECTION_WORKER_CONCURRENCY",
            env_or_default("CORRECTION_WORKER_CONCURRENCY", "3"),
        )?;
        let job_max_attempts =
            parse_u32("JOB_MAX_ATTEMPTS", env_or_default("JOB_MAX_ATTEMPTS", "3"))?;
        let job_timeout_seconds =
            parse_u64("JOB_TIMEOUT_SECONDS", env_or_default("JOB_TIMEOUT_SECONDS", "900"))?;
        let poll_interval_seconds = parse_u64(
            "QUEUE_POLL_INTERVAL_SECONDS",
            env_or_default("QUEUE_POLL_INTERVAL_SECONDS", "2"),
        )?;

        let reconcile_interval_seconds = parse_u64(
            "RECONCILE_INTERVAL_SECONDS",
            env_or_default("RECONCILE_INTERVAL_SECONDS", "300"),
        )?;
        let stale_after_seconds = parse_u64(
            "STALE_CORRECTION_SECONDS",
            env_or_default("STALE_CORRECTION_SECONDS", "3600"),
        )?;

        let log_level = env_or_default("REDINK_LOG_LEVEL", "info");
        let json = env_optional("REDINK_LOG_JSON").map(|value| parse_bool(&value)).unwrap_or(false);
        let prometheus_enabled =
            env_optional("PROMETHEUS_ENABLED").map(|value| parse_bool(&value)).unwrap_or(false);

        let settings = Self {
            server: ServerSettings {
                host: ServerHost::parse(host)?,
                port: ServerPort::parse(port)?,
            },
            runtime: RuntimeSettings { environment, strict_config },
            api: ApiSettings { project_name, version, api_v1_str },
            cors: CorsSettings { origins: cors_origins },
            database: DatabaseSettings {
                postgres_server,
                postgres_port,
                postgres_user,
                postgres_password,
                postgres_db,
                database_url,
            },
            redis: RedisSettings {
                host: redis_host,
                port: redis_port,
                db: redis_db,
                password: redis_password,
            },
            scoring: ScoringSettings {
                api_key: scoring_api_key,
                base_url: scoring_base_url,
                model: scoring_model,
                max_tokens: scoring_max_tokens,
                request_timeout_seconds: scoring_request_timeout,
            },
            engine: EngineSettings {
                min_content_chars,
                max_content_chars,
                lock_ttl_seconds,
                max_retries,
                retry_backoff_seconds,
            },
            queue: QueueSettings {
                worker_concurrency,
                job_max_attempts,
                job_timeout_seconds,
                poll_interval_seconds,
            },
            reconcile: ReconcileSettings {
                interval_seconds: reconcile_interval_seconds,
                stale_after_seconds,
            },
            telemetry: TelemetrySettings { log_level, json, prometheus_enabled },
        };

        settings.validate()?;
        Ok(settings)
    }

    pub(crate) fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host.0, self.server.port.0)
    }

    pub(crate) fn server_host(&self) -> &str {
        &self.server.host.0
    }

    pub(crate) fn server_port(&self) -> u16 {
        self.server.port.0
    }

    pub(crate) fn api(&self) -> &ApiSettings {
        &self.api
    }

    pub(crate) fn cors(&self) -> &CorsSettings {
        &self.cors
    }

    pub(crate) fn database(&self) -> &DatabaseSettings {
        &self.database
    }

    pub(crate) fn redis(&self) -> &RedisSettings {
        &self.redis
    }

    pub(crate) fn scoring(&self) -> &ScoringSettings {
        &self.scoring
    }

    pub(crate) fn engine(&self) -> &EngineSettings {
        &self.engine
    }

    pub(crate) fn queue(&self) -> &QueueSettings {
        &self.queue
    }

    pub(crate) fn reconcile(&self) -> &ReconcileSettings {
        &self.reconcile
    }

    pub(crate) fn telemetry(&self) -> &TelemetrySettings {
        &self.telemetry
    }

    pub(crate) fn runtime(&self) -> &RuntimeSettings {
        &self.runtime
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.max_content_chars <= self.engine.min_content_chars {
            return Err(ConfigError::InvalidValue {
                field: "ESSAY_MAX_CONTENT_CHARS",
                value: self.engine.max_content_chars.to_string(),
            });
        }

        if self.engine.retry_backoff_seconds.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "CORRECTION_RETRY_BACKOFF_SECONDS",
                value: String::from("<empty>"),
            });
        }

        if self.engine.lock_ttl_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CORRECTION_LOCK_TTL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.queue.worker_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "CORRECTION_WORKER_CONCURRENCY",
                value: "0".to_string(),
            });
        }

        if self.queue.job_max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "JOB_MAX_ATTEMPTS",
                value: "0".to_string(),
            });
        }

        // The queue-level timeout is a backstop and must sit above the
        // scoring call's own hard timeout.
        if self.queue.job_timeout_seconds <= self.scoring.request_timeout_seconds {
            return Err(ConfigError::InvalidValue {
                field: "JOB_TIMEOUT_SECONDS",
                value: self.queue.job_timeout_seconds.to_string(),
            });
        }

        if self.queue.poll_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "QUEUE_POLL_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if self.reconcile.interval_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                field: "RECONCILE_INTERVAL_SECONDS",
                value: "0".to_string(),
            });
        }

        if !(self.runtime.strict_config || self.runtime.environment.is_production()) {
            return Ok(());
        }

        if self.database.database_url.is_none() && self.database.postgres_password.is_empty() {
            return Err(ConfigError::MissingSecret("POSTGRES_PASSWORD"));
        }
        if self.scoring.api_key.is_empty() {
            return Err(ConfigError::MissingSecret("SCORING_API_KEY"));
        }
        if self.scoring.base_url.is_empty() {
            return Err(ConfigError::MissingSecret("SCORING_BASE_URL"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::config::Settings;
    use crate::test_support;

    #[test]
    fn load_with_defaults() {
        let _guard = test_support::env_lock();
        test_support::clear_config_env();

        let settings = Settings::load().expect("settings");
        assert_eq!(settings.server_port(), 8000);
        assert_eq!(settings.engine().min_content_chars, 20);
        assert_eq!(settings.engine().retry_backoff_seconds, vec![5, 10]);
        assert_eq!(settings.queue().worker_concurrency, 3);
        assert_eq!(settings.reconcile().stale_after_seconds, 3600);
    }

    #[test]
    fn rejects_job_timeout_below_scoring_timeout() {
        let _guard = test_support::env_lock();
        test_support::clear_config_env();
        std::env::set_var("SCORING_REQUEST_TIMEOUT", "900");
        std::env::set_var("JOB_TIMEOUT_SECONDS", "600");

        assert!(Settings::load().is_err());

        std::env::remove_var("SCORING_REQUEST_TIMEOUT");
        std::env::remove_var("JOB_TIMEOUT_SECONDS");
    }

    #[test]
    fn production_requires_scoring_credentials() {
        let _guard = test_support::env_lock();
        test_support::clear_config_env();
        std::env::set_var("REDINK_ENV", "production");
        std::env::set_var("DATABASE_URL", "postgresql://u:p@localhost/db");

        assert!(Settings::load().is_err());

        std::env::set_var("SCORING_API_KEY", "k");
        std::env::set_var("SCORING_BASE_URL", "https://scoring.example.com");
        assert!(Settings::load().is_ok());

        std::env::remove_var("REDINK_ENV");
        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("SCORING_API_KEY");
        std::env::remove_var("SCORING_BASE_URL");
    }
}
