use std::{env, path::PathBuf, sync::Arc};

#[derive(Clone, Debug)]
/// Configuration struct for the server.
///
/// This struct holds all the necessary configuration parameters
/// required to initialize and run the server.
/// It includes database connection details, JWT configuration,
/// server host and port, number of worker threads, CORS settings,
/// logging preferences, upload storage, admin provisioning,
/// payment gateway settings, mail relay and background sweep timers.
pub struct Config {
    // environment
    pub environment: String, // development or production
    /// The URL of the database to connect to.
    pub database_url: String,
    /// Configuration for JWT (JSON Web Token) authentication.
    pub jwt_config: JwtConfig,
    /// The hostname or IP address the server will bind to.
    pub server_host: String,
    /// The port number the server will listen on.
    pub server_port: u16,
    /// The number of worker threads to spawn for handling requests.
    pub num_workers: usize,
    /// The allowed origin for CORS (Cross-Origin Resource Sharing).
    pub cors_allowed_origin: String,
    /// A boolean indicating whether console logging is enabled.
    pub console_logging_enabled: bool,
    /// File the logger appends to next to stdout.
    pub log_file: String,
    /// Public URL of the web application, used in payment callbacks and mails.
    pub frontend_url: String,
    /// Root directory for uploaded files.
    pub upload_dir: PathBuf,
    /// Lowercased e-mail addresses provisioned as admins at registration.
    pub admin_emails: Vec<String>,
    /// Checkout settings shared by every gateway.
    pub payment: PaymentConfig,
    /// Pesapal API credentials.
    pub pesapal: PesapalConfig,
    /// Stripe secret key
    pub stripe_secret_key: String,
    /// Stripe webhook secret
    pub stripe_webhook_secret: String,
    /// Outgoing mail relay.
    pub mail: MailConfig,
    /// Periodic cleanup timers.
    pub sweep: SweepConfig,
    /// Lifetime of password reset tokens in minutes.
    pub reset_token_ttl_minutes: i64,
}

#[derive(Clone, Debug)]
/// Configuration for JSON Web Token (JWT) authentication.
///
/// This struct contains the secret key used to sign JWTs and
/// the expiration time in hours for issued tokens.
pub struct JwtConfig {
    /// The secret key used to sign and verify JWTs.
    pub secret: String,
    /// The expiration time for JWTs in hours.
    pub expiration_hours: i64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentProvider {
    Pesapal,
    Stripe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PesapalEnvironment {
    Sandbox,
    Live,
}

impl PesapalEnvironment {
    pub fn base_url(&self) -> &'static str {
        match self {
            PesapalEnvironment::Sandbox => "https://cybqa.pesapal.com/pesapalv3/api",
            PesapalEnvironment::Live => "https://pay.pesapal.com/v3/api",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub provider: PaymentProvider,
    /// Share of the job total charged before work starts.
    pub upfront_ratio: f64,
    pub currency: String,
    /// Public URL the gateway posts notifications to.
    pub ipn_url: String,
    pub gateway_timeout_secs: u64,
    /// Attempts for token and IPN registration calls.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PaymentConfig {
    fn default() -> Self {
        PaymentConfig {
            provider: PaymentProvider::Pesapal,
            upfront_ratio: 0.25,
            currency: "USD".to_string(),
            ipn_url: "http://localhost:8080/api/pay/ipn".to_string(),
            gateway_timeout_secs: 10,
            retry_attempts: 3,
            retry_backoff_ms: 2000,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PesapalConfig {
    pub consumer_key: String,
    pub consumer_secret: String,
    pub environment: PesapalEnvironment,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    /// HTTP relay endpoint. Mails are only logged when unset.
    pub api_url: Option<String>,
    pub api_key: String,
    pub from: String,
    /// Operator address copied on payment notifications.
    pub notify_email: Option<String>,
}

#[derive(Clone, Debug)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub upload_max_age_days: u64,
}

impl JwtConfig {
    /// Creates a new `JwtConfig` instance from environment variables.
    ///
    /// Reads the JWT configuration from environment variables:
    /// - `JWT_SECRET`: Required. The secret key for JWT signing.
    /// - `JWT_EXPIRATION_HOURS`: Optional. Defaults to 24 hours if not provided.
    ///
    /// # Panics
    ///
    /// This function will panic if:
    /// - `JWT_SECRET` environment variable is not set
    /// - `JWT_EXPIRATION_HOURS` is set but cannot be parsed as a valid number
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        JwtConfig {
            secret: env::var("JWT_SECRET").expect("JWT_SECRET must be set"),
            expiration_hours: env::var("JWT_EXPIRATION_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .expect("JWT_EXPIRATION_HOURS must be a valid number"),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance from environment variables.
    ///
    /// # Environment Variables
    ///
    /// Required:
    /// - `ENVIRONMENT`: `development` or `production`
    /// - `DATABASE_URL`: Connection string for the database
    /// - `JWT_SECRET`: Secret key for JWT signing (via `JwtConfig::from_env()`)
    ///
    /// Optional (with defaults):
    /// - `IP`, `PORT`, `WORKERS`: bind address and worker count
    /// - `CORS_ALLOWED_ORIGIN`: Allowed CORS origin (default: "http://localhost:5173")
    /// - `ENABLE_CONSOLE_LOGGING`, `LOG_FILE`
    /// - `FRONTEND_URL`, `UPLOAD_DIR`, `ADMIN_EMAILS` (comma separated)
    /// - `PAYMENT_PROVIDER` (`pesapal` or `stripe`), `PAYMENT_UPFRONT_RATIO` (0.25),
    ///   `PAYMENT_CURRENCY`, `PAYMENT_IPN_URL`, `GATEWAY_TIMEOUT_SECS`,
    ///   `GATEWAY_RETRY_ATTEMPTS`, `GATEWAY_RETRY_BACKOFF_MS`
    /// - `PESAPAL_CONSUMER_KEY`, `PESAPAL_CONSUMER_SECRET`, `PESAPAL_ENVIRONMENT`
    /// - `STRIPE_SECRET_KEY`, `STRIPE_WEBHOOK_SECRET`
    /// - `MAIL_API_URL`, `MAIL_API_KEY`, `MAIL_FROM`, `NOTIFY_EMAIL`
    /// - `SWEEP_INTERVAL_SECS`, `UPLOAD_MAX_AGE_DAYS`, `RESET_TOKEN_TTL_MINUTES`
    ///
    /// # Panics
    ///
    /// This function will panic if required environment variables are missing,
    /// if the upfront ratio is outside `(0, 1)` or if a provider name is unknown.
    pub fn from_env() -> Arc<Self> {
        dotenvy::dotenv().ok();

        let stripe_secret_key = env::var("STRIPE_SECRET_KEY").unwrap_or_default();
        let stripe_webhook_secret = env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();

        let provider = match env_or("PAYMENT_PROVIDER", "pesapal").to_lowercase().as_str() {
            "pesapal" => PaymentProvider::Pesapal,
            "stripe" => PaymentProvider::Stripe,
            other => panic!("PAYMENT_PROVIDER must be pesapal or stripe, got {}", other),
        };
        let upfront_ratio: f64 = env_or("PAYMENT_UPFRONT_RATIO", "0.25")
            .parse()
            .expect("PAYMENT_UPFRONT_RATIO must be a number");
        assert!(
            upfront_ratio > 0.0 && upfront_ratio < 1.0,
            "PAYMENT_UPFRONT_RATIO must be between 0 and 1"
        );
        let server_port = parse_or("PORT", 8080);

        Arc::new(Config {
            environment: env::var("ENVIRONMENT").expect("ENVIRONMENT must be set"),
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            jwt_config: JwtConfig::from_env(),
            server_host: env_or("IP", "127.0.0.1"),
            server_port,
            num_workers: parse_or("WORKERS", 4),
            cors_allowed_origin: env_or("CORS_ALLOWED_ORIGIN", "http://localhost:5173"),
            console_logging_enabled: env_or("ENABLE_CONSOLE_LOGGING", "true").to_lowercase()
                == "true",
            log_file: env_or("LOG_FILE", "scribedesk.log"),
            frontend_url: env_or("FRONTEND_URL", "http://localhost:5173"),
            upload_dir: PathBuf::from(env_or("UPLOAD_DIR", "uploads")),
            admin_emails: parse_list(&env::var("ADMIN_EMAILS").unwrap_or_default()),
            payment: PaymentConfig {
                provider,
                upfront_ratio,
                currency: env_or("PAYMENT_CURRENCY", "USD"),
                ipn_url: env::var("PAYMENT_IPN_URL").unwrap_or_else(|_| {
                    format!("http://localhost:{}/api/pay/ipn", server_port)
                }),
                gateway_timeout_secs: parse_or("GATEWAY_TIMEOUT_SECS", 10),
                retry_attempts: parse_or("GATEWAY_RETRY_ATTEMPTS", 3),
                retry_backoff_ms: parse_or("GATEWAY_RETRY_BACKOFF_MS", 2000),
            },
            pesapal: PesapalConfig {
                consumer_key: env::var("PESAPAL_CONSUMER_KEY").unwrap_or_default(),
                consumer_secret: env::var("PESAPAL_CONSUMER_SECRET").unwrap_or_default(),
                environment: match env_or("PESAPAL_ENVIRONMENT", "sandbox")
                    .to_lowercase()
                    .as_str()
                {
                    "live" => PesapalEnvironment::Live,
                    _ => PesapalEnvironment::Sandbox,
                },
            },
            stripe_secret_key,
            stripe_webhook_secret,
            mail: MailConfig {
                api_url: env::var("MAIL_API_URL").ok().filter(|v| !v.is_empty()),
                api_key: env::var("MAIL_API_KEY").unwrap_or_default(),
                from: env_or("MAIL_FROM", "no-reply@scribedesk.local"),
                notify_email: env::var("NOTIFY_EMAIL").ok().filter(|v| !v.is_empty()),
            },
            sweep: SweepConfig {
                interval_secs: parse_or("SWEEP_INTERVAL_SECS", 86_400),
                upload_max_age_days: parse_or("UPLOAD_MAX_AGE_DAYS", 30),
            },
            reset_token_ttl_minutes: parse_or("RESET_TOKEN_TTL_MINUTES", 60),
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Splits a comma separated list, dropping blanks and normalising case.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_list_is_trimmed_and_lowercased() {
        assert_eq!(
            parse_list(" Boss@Example.com, ,ops@example.com "),
            vec!["boss@example.com".to_string(), "ops@example.com".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn pesapal_base_urls() {
        assert!(PesapalEnvironment::Sandbox.base_url().starts_with("https://cybqa"));
        assert!(PesapalEnvironment::Live.base_url().starts_with("https://pay.pesapal"));
    }
}
