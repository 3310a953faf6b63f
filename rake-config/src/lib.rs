//! Loader for `rake.yaml` with environment overlays.
//!
//! Sources are merged in the order they are added, and `RAKE__`-prefixed
//! environment variables are applied on top (`RAKE__API__PAGE_SIZE=250`
//! overrides `api.page_size`). String values may reference `${VAR}`
//! placeholders which are expanded after merging. The merged document is then
//! validated before it is handed to the caller.
use chrono::NaiveDate;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer, de};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const MAXIMUM_ENV_EXPANSION_DEPTH: usize = 8;

pub const DEFAULT_CONFIG_FILE: &str = "rake.yaml";

#[derive(Debug, Deserialize)]
pub struct RakeConfig {
    pub version: Option<String>,
    /// Directory the CSV files are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// How many jobs may run at once; each job keeps its own pacing.
    #[serde(default = "default_concurrency", deserialize_with = "number_or_text")]
    pub concurrency: usize,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_timeout_secs", deserialize_with = "number_or_text")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries", deserialize_with = "number_or_text")]
    pub max_retries: usize,
    #[serde(default = "default_page_size", deserialize_with = "number_or_text")]
    pub page_size: usize,
    /// Minimum spacing between two page requests of the same job.
    #[serde(default = "default_pacing_ms", deserialize_with = "number_or_text")]
    pub pacing_ms: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: None,
            access_token: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            page_size: default_page_size(),
            pacing_ms: default_pacing_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub subreddit: String,
    pub kind: KindSpec,
    /// File label; defaults to the plural kind (`comments`, `submissions`).
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub stop: Option<StopSpec>,
    #[serde(default)]
    pub flush: FlushSpec,
    /// Resume point: only items created strictly before this timestamp.
    #[serde(default)]
    pub before: Option<i64>,
}

impl JobSpec {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn label(&self) -> &str {
        match self.label.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label,
            _ => self.kind.plural(),
        }
    }

    /// `<subreddit>-<label>.csv`
    pub fn output_file_name(&self) -> String {
        format!("{}-{}.csv", self.subreddit.trim(), self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KindSpec {
    #[serde(alias = "comment")]
    Comments,
    #[serde(alias = "submission", alias = "posts")]
    Submissions,
}

impl KindSpec {
    pub fn plural(self) -> &'static str {
        match self {
            KindSpec::Comments => "comments",
            KindSpec::Submissions => "submissions",
        }
    }
}

impl FromStr for KindSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "comment" | "comments" => Ok(KindSpec::Comments),
            "submission" | "submissions" | "posts" => Ok(KindSpec::Submissions),
            other => Err(format!(
                "unknown kind `{other}` (expected comments or submissions)"
            )),
        }
    }
}

/// When a job stops. Exactly one key is expected under `stop:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopSpec {
    MaxRecords(usize),
    /// Local midnight at the start of this date.
    Until(NaiveDate),
    UntilUnix(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushSpec {
    /// Write everything once the job stops.
    #[default]
    Batch,
    /// Append each page as soon as it has been normalized.
    Page,
}

/// Numeric settings also accept strings: environment overrides and `${VAR}`
/// expansions always arrive as text.
fn number_or_text<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText<T> {
        Number(T),
        Text(String),
    }

    match NumberOrText::<T>::deserialize(deserializer)? {
        NumberOrText::Number(n) => Ok(n),
        NumberOrText::Text(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_concurrency() -> usize {
    1
}
fn default_endpoint() -> String {
    "https://api.pushshift.io".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> usize {
    3
}
fn default_page_size() -> usize {
    500
}
fn default_pacing_ms() -> u64 {
    1200
}

/// `rake.yaml` in the working directory if present, else the per-user config dir.
pub fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|d| d.join("rake").join(DEFAULT_CONFIG_FILE))
}

impl RakeConfig {
    pub fn enabled_jobs(&self) -> impl Iterator<Item = &JobSpec> {
        self.jobs.iter().filter(|j| j.is_enabled())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api.page_size == 0 {
            return Err(invalid("api.page_size must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(invalid("concurrency must be at least 1"));
        }
        if self.enabled_jobs().next().is_none() {
            return Err(invalid("no enabled jobs configured"));
        }

        let mut seen = HashSet::new();
        for job in self.enabled_jobs() {
            let name = job.subreddit.trim();
            if name.is_empty() || name.contains(['/', ' ']) {
                return Err(invalid(format!("invalid subreddit name {:?}", job.subreddit)));
            }
            let file = job.output_file_name();
            if !seen.insert(file.clone()) {
                return Err(invalid(format!("two jobs write to {file}")));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Message(msg.into())
}

fn expand_env_in_value(v: &mut Value) {
    match v {
        Value::String(s) => {
            if s.contains('$') {
                let mut cur = std::mem::take(s);
                for _ in 0..MAXIMUM_ENV_EXPANSION_DEPTH {
                    let expanded = match shellexpand::env(&cur) {
                        Ok(cow) => cow.into_owned(),
                        Err(_) => cur.clone(),
                    };
                    if expanded == cur {
                        break;
                    }
                    cur = expanded;
                }
                *s = cur;
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(expand_env_in_value),
        Value::Object(obj) => obj.values_mut().for_each(expand_env_in_value),
        _ => {}
    }
}

/// Builder hides the `config` crate wiring (YAML + env overrides).
pub struct RakeConfigLoader {
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    env: bool,
}

impl Default for RakeConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl RakeConfigLoader {
    /// ```
    /// use rake_config::{KindSpec, RakeConfigLoader};
    ///
    /// let config = RakeConfigLoader::new()
    ///     .with_yaml_str("jobs:\n  - subreddit: mexico\n    kind: comments")
    ///     .load()
    ///     .expect("valid config");
    ///
    /// assert_eq!(config.jobs[0].kind, KindSpec::Comments);
    /// assert_eq!(config.api.page_size, 500);
    /// assert_eq!(config.api.pacing_ms, 1200);
    /// ```
    pub fn new() -> Self {
        Self {
            builder: Config::builder(),
            env: true,
        }
    }

    /// Skip `RAKE__*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Attach a YAML/TOML/JSON file; the `config` crate infers format by suffix.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(true));
        self
    }

    /// Like [`Self::with_file`] but a missing file is not an error.
    pub fn with_optional_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.builder = self
            .builder
            .add_source(File::from(path.as_ref()).required(false));
        self
    }

    pub fn with_yaml_str(mut self, yaml: &str) -> Self {
        self.builder = self
            .builder
            .add_source(File::from_str(yaml, config::FileFormat::Yaml));
        self
    }

    /// Merge all sources, expand `${VAR}` placeholders, deserialize and validate.
    ///
    /// ```
    /// use rake_config::{RakeConfigLoader, StopSpec};
    ///
    /// unsafe { std::env::set_var("RAKE_DOC_TOKEN", "injected-from-env"); }
    ///
    /// let config = RakeConfigLoader::new()
    ///     .with_yaml_str(r#"
    /// api:
    ///   access_token: "${RAKE_DOC_TOKEN}"
    /// jobs:
    ///   - subreddit: mexico
    ///     kind: submissions
    ///     label: posts
    ///     stop:
    ///       until: "2020-01-01"
    /// "#)
    ///     .load()
    ///     .expect("valid configuration");
    ///
    /// assert_eq!(config.api.access_token.as_deref(), Some("injected-from-env"));
    /// assert_eq!(config.jobs[0].output_file_name(), "mexico-posts.csv");
    /// assert!(matches!(config.jobs[0].stop, Some(StopSpec::Until(_))));
    ///
    /// unsafe { std::env::remove_var("RAKE_DOC_TOKEN"); }
    /// ```
    pub fn load(self) -> Result<RakeConfig, ConfigError> {
        let typed = self.load_without_validation()?;
        typed.validate()?;
        Ok(typed)
    }

    /// Same as [`Self::load`] minus [`RakeConfig::validate`], for callers that
    /// add jobs of their own before validating.
    pub fn load_without_validation(self) -> Result<RakeConfig, ConfigError> {
        let mut builder = self.builder;
        if self.env {
            builder = builder.add_source(Environment::with_prefix("RAKE").separator("__"));
        }
        let cfg = builder.build()?;

        let mut v: Value = cfg.try_deserialize()?;
        expand_env_in_value(&mut v);

        serde_json::from_value(v).map_err(|e| ConfigError::Message(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load(yaml: &str) -> Result<RakeConfig, ConfigError> {
        RakeConfigLoader::new().without_env().with_yaml_str(yaml).load()
    }

    #[test]
    fn expands_simple_string() {
        temp_env::with_var("FOO", Some("bar"), || {
            let mut v = json!("prefix-${FOO}-suffix");
            expand_env_in_value(&mut v);
            assert_eq!(v, json!("prefix-bar-suffix"));
        });
    }

    #[test]
    fn expands_in_array_and_object() {
        temp_env::with_vars([("CITY", Some("Monterrey")), ("STATE", Some("NL"))], || {
            let mut v = json!(["hello-$CITY", { "loc": "${CITY}-${STATE}" }, 42, true, null]);
            expand_env_in_value(&mut v);
            assert_eq!(
                v,
                json!(["hello-Monterrey", { "loc": "Monterrey-NL" }, 42, true, null])
            );
        });
    }

    #[test]
    fn stops_on_cycles() {
        temp_env::with_vars([("A", Some("${B}")), ("B", Some("${A}"))], || {
            let mut v = json!("x=${A}-y");
            expand_env_in_value(&mut v);
            let s = v.as_str().unwrap();
            assert!(s.starts_with("x=") && s.ends_with("-y"));
            assert!(s.contains("${"));
        });
    }

    #[test]
    fn unknown_vars_are_left_as_is() {
        let mut v = json!("hi-${DOES_NOT_EXIST}");
        expand_env_in_value(&mut v);
        assert_eq!(v, json!("hi-${DOES_NOT_EXIST}"));
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let cfg = load("jobs:\n  - subreddit: mexico\n    kind: comment").unwrap();
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.output_dir, PathBuf::from("."));
        assert_eq!(cfg.api.endpoint, "https://api.pushshift.io");
        let job = &cfg.jobs[0];
        assert!(job.is_enabled());
        assert_eq!(job.stop, None);
        assert_eq!(job.flush, FlushSpec::Batch);
        assert_eq!(job.output_file_name(), "mexico-comments.csv");
    }

    #[test]
    fn parses_every_stop_form() {
        let cfg = load(
            r#"
jobs:
  - { subreddit: a, kind: comments, stop: { max_records: 10000 } }
  - { subreddit: b, kind: comments, stop: { until: "2019-01-01" } }
  - { subreddit: c, kind: posts, stop: { until_unix: 1546300800 }, flush: page }
"#,
        )
        .unwrap();
        assert_eq!(cfg.jobs[0].stop, Some(StopSpec::MaxRecords(10_000)));
        assert_eq!(
            cfg.jobs[1].stop,
            Some(StopSpec::Until(NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()))
        );
        assert_eq!(cfg.jobs[2].stop, Some(StopSpec::UntilUnix(1_546_300_800)));
        assert_eq!(cfg.jobs[2].kind, KindSpec::Submissions);
        assert_eq!(cfg.jobs[2].flush, FlushSpec::Page);
    }

    #[test]
    fn rejects_duplicate_output_files() {
        let err = load(
            r#"
jobs:
  - { subreddit: mexico, kind: submissions, label: posts }
  - { subreddit: mexico, kind: comments, label: posts }
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("mexico-posts.csv"), "{err}");
    }

    #[test]
    fn disabled_duplicates_are_ignored() {
        let cfg = load(
            r#"
jobs:
  - { subreddit: mexico, kind: comments }
  - { subreddit: mexico, kind: comments, enabled: false }
"#,
        )
        .unwrap();
        assert_eq!(cfg.enabled_jobs().count(), 1);
    }

    #[test]
    fn numeric_settings_accept_text() {
        let cfg = load(
            "concurrency: '2'\napi: { page_size: ' 250 ', pacing_ms: '0' }\njobs: [{ subreddit: a, kind: comments }]",
        )
        .unwrap();
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.api.page_size, 250);
        assert_eq!(cfg.api.pacing_ms, 0);
        assert!(load("api: { page_size: lots }\njobs: [{ subreddit: a, kind: comments }]").is_err());
    }

    #[test]
    fn kind_parses_from_cli_spellings() {
        assert_eq!("Comments".parse::<KindSpec>(), Ok(KindSpec::Comments));
        assert_eq!("posts".parse::<KindSpec>(), Ok(KindSpec::Submissions));
        assert!("threads".parse::<KindSpec>().is_err());
    }

    #[test]
    fn unvalidated_load_accepts_an_empty_job_list() {
        let cfg = RakeConfigLoader::new()
            .without_env()
            .with_yaml_str("output_dir: out")
            .load_without_validation()
            .unwrap();
        assert!(cfg.jobs.is_empty());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_page_size_and_empty_job_lists() {
        assert!(load("api: { page_size: 0 }\njobs: [{ subreddit: a, kind: comments }]").is_err());
        assert!(load("jobs: []").is_err());
        assert!(load("jobs: [{ subreddit: a, kind: comments, enabled: false }]").is_err());
        assert!(load("jobs: [{ subreddit: 'r/a', kind: comments }]").is_err());
    }
}
