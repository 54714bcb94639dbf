use crate::config::JobTemplateConfig;
use chrono::{DateTime, Local};
use std::fmt::{self, Write};
use std::str::FromStr;
use thiserror::Error;

/// Timestamp used in job log and script file names (minute granularity).
pub const JOB_STAMP_FORMAT: &str = "%Y%m%d_%H%M";

/// Slurm tasks launched per GPU.
pub const TASKS_PER_GPU: u32 = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("Invalid value for '{field}': {value:?} is not a positive integer")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Invalid wall time {0:?}, expected [D-]HH:MM:SS")]
    InvalidWallTime(String),

    #[error("Port {0} is outside 1024-65535")]
    InvalidPort(u16),
}

/// A validated Slurm wall time, kept as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WallTime(String);

impl FromStr for WallTime {
    type Err = ParameterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParameterError::InvalidWallTime(s.to_string());
        let value = s.trim();

        let clock = match value.split_once('-') {
            Some((days, clock)) => {
                if !is_digits(days) {
                    return Err(invalid());
                }
                clock
            }
            None => value,
        };

        let parts: Vec<&str> = clock.split(':').collect();
        let [hours, minutes, seconds] = parts.as_slice() else {
            return Err(invalid());
        };
        if !is_digits(hours) || !is_two_digit_below_60(minutes) || !is_two_digit_below_60(seconds)
        {
            return Err(invalid());
        }

        Ok(Self(value.to_string()))
    }
}

impl fmt::Display for WallTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn is_two_digit_below_60(s: &str) -> bool {
    s.len() == 2 && is_digits(s) && s < "60"
}

/// Resources requested for one web UI job.
#[derive(Debug, Clone)]
pub struct JobScriptSpec {
    pub nodes: u32,
    pub gpus_per_node: u32,
    pub memory_gib: u32,
    pub wall_time: WallTime,
    pub port: u16,
    pub generated_at: DateTime<Local>,
}

impl JobScriptSpec {
    /// Coerces raw form values.
    pub fn from_form(
        nodes: &str,
        memory: &str,
        gpus: &str,
        time: &str,
        port: u16,
    ) -> Result<Self, ParameterError> {
        if port < 1024 {
            return Err(ParameterError::InvalidPort(port));
        }

        Ok(Self {
            nodes: positive("nodes", nodes)?,
            gpus_per_node: positive("gpus", gpus)?,
            memory_gib: positive("memory", memory)?,
            wall_time: time.parse()?,
            port,
            generated_at: Local::now(),
        })
    }

    pub fn tasks_per_node(&self) -> u32 {
        self.gpus_per_node * TASKS_PER_GPU
    }
}

fn positive(field: &'static str, value: &str) -> Result<u32, ParameterError> {
    match value.trim().parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ParameterError::InvalidNumber {
            field,
            value: value.to_string(),
        }),
    }
}

/// `llama_job_{YYYYMMDD_HHMM}.sh`
pub fn script_file_name(at: DateTime<Local>) -> String {
    format!("llama_job_{}.sh", at.format(JOB_STAMP_FORMAT))
}

/// Renders SBATCH scripts from the configured cluster template.
#[derive(Debug, Clone)]
pub struct JobScriptGenerator {
    template: JobTemplateConfig,
}

impl JobScriptGenerator {
    pub fn new(template: JobTemplateConfig) -> Self {
        Self { template }
    }

    pub fn port_range(&self) -> (u16, u16) {
        (self.template.port_range_start, self.template.port_range_end)
    }

    pub fn render(&self, spec: &JobScriptSpec) -> String {
        let t = &self.template;
        let stamp = spec.generated_at.format(JOB_STAMP_FORMAT);
        let mut script = String::with_capacity(1024);

        // Writing into a String cannot fail.
        let _ = writeln!(script, "#!/bin/bash");
        let _ = writeln!(script, "#SBATCH --job-name={}", t.job_name);
        let _ = writeln!(script, "#SBATCH --partition={}", t.partition);
        let _ = writeln!(script, "#SBATCH -N {}", spec.nodes);
        let _ = writeln!(script, "#SBATCH --ntasks-per-node={}", spec.tasks_per_node());
        let _ = writeln!(script, "#SBATCH --mem={}G", spec.memory_gib);
        let _ = writeln!(script, "#SBATCH --gres=gpu:{}", spec.gpus_per_node);
        let _ = writeln!(script, "#SBATCH --time={}", spec.wall_time);
        let _ = writeln!(script, "#SBATCH -A {}", t.account);
        let _ = writeln!(script, "#SBATCH --output={}_{}.log", t.job_name, stamp);
        script.push('\n');

        script.push_str("unset PYTHONHOME\nunset PYTHONPATH\n\n");
        for module in &t.modules {
            let _ = writeln!(script, "module load {}", module);
        }
        let _ = writeln!(script, "conda activate {}", t.conda_env);
        script.push('\n');

        let _ = writeln!(script, "export PORT={}", spec.port);
        script.push_str("export NODE=$(hostname)\nUSER=$(whoami)\nnode=$(hostname -s)\n\n");

        script.push_str("echo -e \"\n");
        script.push_str("    Web UI is running on: $(hostname)\n");
        script.push_str("    Job starts at: $(date)\n");
        script.push_str("    --------------------------------------------------------------------\n");
        let _ = writeln!(
            script,
            "    ssh -L 0.0.0.0:{port}:$node:{port} $USER@{host}",
            port = spec.port,
            host = t.login_host
        );
        script.push_str("    --------------------------------------------------------------------\n");
        script.push_str("\"\n\n");

        let _ = writeln!(script, "cd {}", t.workdir);
        let _ = writeln!(script, "{}", t.launch_command);
        script
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn spec(gpus: &str) -> JobScriptSpec {
        let mut spec = JobScriptSpec::from_form("1", "16", gpus, "00:30:00", 7801).unwrap();
        spec.generated_at = Local.with_ymd_and_hms(2025, 6, 1, 14, 5, 59).unwrap();
        spec
    }

    fn render(spec: &JobScriptSpec) -> String {
        JobScriptGenerator::new(JobTemplateConfig::default()).render(spec)
    }

    #[test]
    fn test_tasks_scale_with_gpus() {
        let script = render(&spec("2"));
        assert!(script.contains("#SBATCH --ntasks-per-node=8\n"));
        assert!(script.contains("#SBATCH --gres=gpu:2\n"));
    }

    #[test]
    fn test_values_appear_verbatim() {
        let script = render(&spec("1"));
        assert!(script.starts_with("#!/bin/bash\n"));
        assert!(script.contains("#SBATCH -N 1\n"));
        assert!(script.contains("#SBATCH --mem=16G\n"));
        assert!(script.contains("#SBATCH --time=00:30:00\n"));
        assert!(script.contains("#SBATCH --job-name=llama_webui\n"));
        assert!(script.contains("#SBATCH --output=llama_webui_20250601_1405.log\n"));
        assert!(script.contains("export PORT=7801\n"));
        assert!(script.contains("ssh -L 0.0.0.0:7801:$node:7801 $USER@localhost"));
        assert!(script.contains("module load Mamba\nmodule load cudatoolkit\n"));
        assert!(script.ends_with("cd /project/llama-factory\nllamafactory-cli webui\n"));
    }

    #[test]
    fn test_from_form_rejects_bad_numbers() {
        let err = JobScriptSpec::from_form("one", "16", "1", "00:30:00", 7800).unwrap_err();
        assert_eq!(
            err,
            ParameterError::InvalidNumber {
                field: "nodes",
                value: "one".to_string()
            }
        );
        assert!(JobScriptSpec::from_form("1", "16", "0", "00:30:00", 7800).is_err());
        assert!(JobScriptSpec::from_form("1", "-4", "1", "00:30:00", 7800).is_err());
        assert_eq!(
            JobScriptSpec::from_form("1", "16", "1", "00:30:00", 80).unwrap_err(),
            ParameterError::InvalidPort(80)
        );
    }

    #[test]
    fn test_wall_time_parsing() {
        assert!("00:30:00".parse::<WallTime>().is_ok());
        assert!("120:00:00".parse::<WallTime>().is_ok());
        assert!("2-12:00:00".parse::<WallTime>().is_ok());

        assert!("30".parse::<WallTime>().is_err());
        assert!("00:60:00".parse::<WallTime>().is_err());
        assert!("00:30".parse::<WallTime>().is_err());
        assert!("x-00:30:00".parse::<WallTime>().is_err());
        assert!("00:30:00; rm -rf /".parse::<WallTime>().is_err());
    }

    #[test]
    fn test_script_file_name() {
        let at = Local.with_ymd_and_hms(2025, 6, 1, 14, 5, 59).unwrap();
        assert_eq!(script_file_name(at), "llama_job_20250601_1405.sh");
    }
}
