use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Connection settings for the remote cluster login node.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Remote backend: "sftp" or "memory" (default: "sftp")
    pub backend: String,

    /// SSH host (default: "localhost")
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Remote account name
    pub username: String,

    /// Private key used for public key authentication
    pub private_key_path: PathBuf,

    /// known_hosts file consulted when strict checking is on
    pub known_hosts_path: Option<PathBuf>,

    /// Reject hosts whose key is not in known_hosts (default: false)
    pub strict_host_key_checking: bool,

    /// Directory receiving uploaded datasets
    pub dataset_dir: String,

    /// JSON manifest listing the known datasets
    pub manifest_path: String,

    /// Directory receiving generated job scripts
    pub script_dir: String,
}

/// Batch-job template settings.
#[derive(Debug, Clone)]
pub struct JobTemplateConfig {
    pub job_name: String,
    pub partition: String,
    pub account: String,
    pub modules: Vec<String>,
    pub conda_env: String,
    pub workdir: String,
    pub login_host: String,
    pub launch_command: String,
    /// Inclusive port range probed for the web UI (default: 7800-7899)
    pub port_range_start: u16,
    pub port_range_end: u16,
}

/// Mail relay used for administrator notifications.
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// Mail backend: "smtp" or "log" (default: "smtp")
    pub backend: String,
    pub relay_host: String,
    pub relay_port: u16,
    /// Login for the relay, defaults to the admin address
    pub username: String,
    pub password: String,
    /// Sender and recipient of model requests
    pub admin_email: String,
}

/// Upper bounds for each blocking stage of the pipeline.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub connect: Duration,
    pub transfer: Duration,
    pub manifest: Duration,
    pub exec: Duration,
    pub mail: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            transfer: Duration::from_secs(30 * 60),
            manifest: Duration::from_secs(60),
            exec: Duration::from_secs(60),
            mail: Duration::from_secs(60),
        }
    }
}

/// Service configuration, loaded once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Local directory for staged uploads (default: "./tmp")
    pub staging_dir: PathBuf,

    /// Maximum accepted upload size in bytes (default: 2 GB)
    pub max_upload_size: usize,

    /// Age after which leftover staged files are swept (default: 24)
    pub staging_cleanup_age_hours: u64,

    /// Serialize manifest updates per remote path (default: true)
    pub manifest_lock: bool,

    pub remote: RemoteConfig,
    pub job: JobTemplateConfig,
    pub mail: MailConfig,
    pub timeouts: StageTimeouts,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: "sftp".to_string(),
            host: "localhost".to_string(),
            port: 22,
            username: "hpcuser".to_string(),
            private_key_path: PathBuf::from("~/.ssh/id_rsa"),
            known_hosts_path: None,
            strict_host_key_checking: false,
            dataset_dir: "/project/llama-factory/data".to_string(),
            manifest_path: "/project/llama-factory/data/dataset_info.json".to_string(),
            script_dir: "/project/llama-factory/scripts".to_string(),
        }
    }
}

impl Default for JobTemplateConfig {
    fn default() -> Self {
        Self {
            job_name: "llama_webui".to_string(),
            partition: "gpu".to_string(),
            account: "project".to_string(),
            modules: vec!["Mamba".to_string(), "cudatoolkit".to_string()],
            conda_env: "/project/envs/llama-factory/".to_string(),
            workdir: "/project/llama-factory".to_string(),
            login_host: "localhost".to_string(),
            launch_command: "llamafactory-cli webui".to_string(),
            port_range_start: 7800,
            port_range_end: 7899,
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            backend: "smtp".to_string(),
            relay_host: "localhost".to_string(),
            relay_port: 587,
            username: "default_admin@example.com".to_string(),
            password: String::new(),
            admin_email: "default_admin@example.com".to_string(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("./tmp"),
            max_upload_size: 2 * 1024 * 1024 * 1024, // 2 GB
            staging_cleanup_age_hours: 24,
            manifest_lock: true,
            remote: RemoteConfig::default(),
            job: JobTemplateConfig::default(),
            mail: MailConfig::default(),
            timeouts: StageTimeouts::default(),
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

fn flag(key: &str, fallback: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(fallback)
}

fn seconds(key: &str, fallback: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(fallback)
}

impl GatewayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();
        let admin_email = env::var("ADMIN_EMAIL").unwrap_or(default.mail.admin_email);

        Self {
            staging_dir: env::var("STAGING_DIR")
                .map(PathBuf::from)
                .unwrap_or(default.staging_dir),

            max_upload_size: parsed("MAX_UPLOAD_SIZE", default.max_upload_size),

            staging_cleanup_age_hours: parsed(
                "STAGING_CLEANUP_AGE_HOURS",
                default.staging_cleanup_age_hours,
            ),

            manifest_lock: flag("MANIFEST_LOCK", default.manifest_lock),

            remote: RemoteConfig {
                backend: env::var("REMOTE_BACKEND").unwrap_or(default.remote.backend),
                host: env::var("SFTP_HOST").unwrap_or(default.remote.host),
                port: parsed("SFTP_PORT", default.remote.port),
                username: env::var("SFTP_USERNAME").unwrap_or(default.remote.username),
                private_key_path: env::var("SFTP_PRIVATE_KEY")
                    .map(PathBuf::from)
                    .unwrap_or(default.remote.private_key_path),
                known_hosts_path: env::var("SSH_KNOWN_HOSTS").ok().map(PathBuf::from),
                strict_host_key_checking: flag(
                    "SSH_STRICT_HOST_KEY_CHECKING",
                    default.remote.strict_host_key_checking,
                ),
                dataset_dir: env::var("REMOTE_DATASET_DIR").unwrap_or(default.remote.dataset_dir),
                manifest_path: env::var("REMOTE_MANIFEST_PATH")
                    .unwrap_or(default.remote.manifest_path),
                script_dir: env::var("REMOTE_SCRIPT_DIR").unwrap_or(default.remote.script_dir),
            },

            job: JobTemplateConfig {
                job_name: env::var("JOB_NAME").unwrap_or(default.job.job_name),
                partition: env::var("SLURM_PARTITION").unwrap_or(default.job.partition),
                account: env::var("SLURM_ACCOUNT").unwrap_or(default.job.account),
                modules: env::var("JOB_MODULES")
                    .ok()
                    .map(|v| {
                        v.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or(default.job.modules),
                conda_env: env::var("JOB_CONDA_ENV").unwrap_or(default.job.conda_env),
                workdir: env::var("JOB_WORKDIR").unwrap_or(default.job.workdir),
                login_host: env::var("JOB_LOGIN_HOST").unwrap_or(default.job.login_host),
                launch_command: env::var("JOB_LAUNCH_COMMAND")
                    .unwrap_or(default.job.launch_command),
                port_range_start: parsed("JOB_PORT_RANGE_START", default.job.port_range_start),
                port_range_end: parsed("JOB_PORT_RANGE_END", default.job.port_range_end),
            },

            mail: MailConfig {
                backend: env::var("MAIL_BACKEND").unwrap_or(default.mail.backend),
                relay_host: env::var("SMTP_HOST").unwrap_or(default.mail.relay_host),
                relay_port: parsed("SMTP_PORT", default.mail.relay_port),
                username: env::var("SMTP_USERNAME").unwrap_or_else(|_| admin_email.clone()),
                password: env::var("SMTP_PASS").unwrap_or(default.mail.password),
                admin_email,
            },

            timeouts: StageTimeouts {
                connect: seconds("SSH_CONNECT_TIMEOUT_SECS", default.timeouts.connect),
                transfer: seconds("SFTP_TRANSFER_TIMEOUT_SECS", default.timeouts.transfer),
                manifest: seconds("MANIFEST_TIMEOUT_SECS", default.timeouts.manifest),
                exec: seconds("REMOTE_EXEC_TIMEOUT_SECS", default.timeouts.exec),
                mail: seconds("SMTP_TIMEOUT_SECS", default.timeouts.mail),
            },
        }
    }

    /// Create config for development (in-memory remote, mail goes to the log)
    pub fn development() -> Self {
        let mut config = Self::default();
        config.remote.backend = "memory".to_string();
        config.mail.backend = "log".to_string();
        config
    }
}
