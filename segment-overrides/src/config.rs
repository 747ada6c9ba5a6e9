use std::ops::Deref;
use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    #[envconfig(default = "http://localhost:8000/api/v1/")]
    pub api_url: String,

    pub api_token: Option<String>,

    #[envconfig(default = "1")]
    pub project_id: i64,

    #[envconfig(default = "1")]
    pub feature_id: i64,

    #[envconfig(default = "1")]
    pub environment_id: String,

    /// Path to a JSON file holding the change request to overlay, if any.
    pub change_request_path: Option<String>,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    // Large enough to load a project's whole catalog in one page.
    #[envconfig(default = "1000")]
    pub segment_page_size: usize,

    #[envconfig(default = "false")]
    pub debug: FlexBool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlexBool(pub bool);

impl FromStr for FlexBool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(FlexBool(true)),
            "false" | "0" | "no" | "off" | "" => Ok(FlexBool(false)),
            _ => Err(format!("Invalid boolean value: {}", s)),
        }
    }
}

impl Deref for FlexBool {
    type Target = bool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
