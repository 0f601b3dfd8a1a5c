pub mod auth;
pub mod domain;
pub mod generation;
pub mod orchestrator;
pub mod reader;
pub mod storage;

pub mod config {
    #[derive(Debug, Clone, Default)]
    pub struct Settings {
        pub snapshot_path: Option<String>,
        pub generator_program: Option<String>,
        pub generator_args: Option<String>,
        pub generator_workdir: Option<String>,
        pub output_dir: Option<String>,
        pub generation_policy: Option<String>,
        pub api_auth_token: Option<String>,
        pub cors_allow_origin: Option<String>,
        pub sentry_dsn: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                snapshot_path: non_empty_var("BASKET_SNAPSHOT_PATH"),
                generator_program: non_empty_var("BASKET_GENERATOR_PROGRAM"),
                generator_args: std::env::var("BASKET_GENERATOR_ARGS").ok(),
                generator_workdir: non_empty_var("BASKET_GENERATOR_WORKDIR"),
                output_dir: non_empty_var("BASKET_OUTPUT_DIR"),
                generation_policy: non_empty_var("BASKET_GENERATION_POLICY"),
                api_auth_token: non_empty_var("API_AUTH_TOKEN"),
                cors_allow_origin: non_empty_var("CORS_ALLOW_ORIGIN"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
            })
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }
}
