use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::HashSet;

pub mod processor {
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum TimestampUnit {
        Ms,
        Us,
        Ns,
    }

    impl Default for TimestampUnit {
        fn default() -> Self {
            TimestampUnit::Ms
        }
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct ParseTimestamp {
        #[serde(default)]
        pub source_key: String,
        #[serde(default)]
        pub source_format: String,
        #[serde(default)]
        pub source_timezone: String,
        /// Values of zero or less mean unset
        #[serde(default)]
        pub source_year: i32,
        pub precise_timestamp_key: Option<String>,
        #[serde(default)]
        pub precise_timestamp_unit: TimestampUnit,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct RegexFilter {
        #[serde(default)]
        pub source_key: String,
        pub allow: Option<Vec<String>>,
        pub remove: Option<Vec<String>>,
    }

    #[derive(Serialize, Deserialize, Debug, Clone, Default)]
    #[serde(rename_all = "PascalCase")]
    pub struct AddTags {
        #[serde(default)]
        pub tags: BTreeMap<String, String>,
    }
}

pub const TYPE_PARSE_TIMESTAMP: &str = "processor_parse_timestamp_native";
pub const TYPE_FILTER_REGEX: &str = "processor_filter_regex_native";
pub const TYPE_ADD_TAGS: &str = "processor_add_tags";

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "Type")]
pub enum Processor {
    #[serde(rename = "processor_parse_timestamp_native")]
    ParseTimestamp(processor::ParseTimestamp),
    #[serde(rename = "processor_filter_regex_native")]
    RegexFilter(processor::RegexFilter),
    #[serde(rename = "processor_add_tags")]
    AddTags(processor::AddTags),
}

impl Processor {
    pub fn plugin_type(&self) -> &'static str {
        match self {
            Processor::ParseTimestamp(_) => TYPE_PARSE_TIMESTAMP,
            Processor::RegexFilter(_) => TYPE_FILTER_REGEX,
            Processor::AddTags(_) => TYPE_ADD_TAGS,
        }
    }
}

/// Process wide switches shared by every pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProcessFlags {
    /// Drop events whose parsed time is older than `discard_interval`
    #[serde(default = "default_discard_old_data")]
    pub discard_old_data: bool,
    /// Seconds
    #[serde(default = "default_discard_interval")]
    pub discard_interval: u64,
}

fn default_discard_old_data() -> bool {
    true
}

fn default_discard_interval() -> u64 {
    43200
}

impl Default for ProcessFlags {
    fn default() -> Self {
        ProcessFlags {
            discard_old_data: default_discard_old_data(),
            discard_interval: default_discard_interval(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub processors: Vec<Processor>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    #[serde(default)]
    pub flags: ProcessFlags,
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("pipeline name must not be empty")]
    EmptyPipelineName,
    #[error("duplicate pipeline name {0}")]
    DuplicatePipeline(String),
}

fn check_config(config: &Config) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for pipeline in config.pipelines.iter() {
        if pipeline.name.is_empty() {
            return Err(Error::EmptyPipelineName);
        }
        if !seen.insert(pipeline.name.as_str()) {
            return Err(Error::DuplicatePipeline(pipeline.name.clone()));
        }
    }
    Ok(())
}

pub fn load(path: &str) -> anyhow::Result<Config> {
    let input =
        std::fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
    let config: Config =
        serde_json::from_str(input.as_ref()).with_context(|| format!("parsing config {}", path))?;
    // Perform some high level validation
    check_config(&config)?;
    Ok(config)
}

#[cfg(test)]
pub mod test {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load_str(config: &str) -> anyhow::Result<Config> {
        let mut tf = NamedTempFile::new().unwrap();
        tf.write_all(config.as_bytes()).unwrap();
        load(tf.path().to_str().unwrap())
    }

    #[test]
    fn load_example_config() {
        let config = r#"
        {
            "flags": {
                "discard_interval": 600
            },
            "pipelines": [
                {
                    "name": "nginx",
                    "processors": [
                        {
                            "Type": "processor_parse_timestamp_native",
                            "SourceKey": "time",
                            "SourceFormat": "%Y-%m-%d %H:%M:%S",
                            "SourceTimezone": "GMT+08:00",
                            "PreciseTimestampKey": "precise_time",
                            "PreciseTimestampUnit": "us"
                        },
                        {
                            "Type": "processor_filter_regex_native",
                            "SourceKey": "content",
                            "Remove": ["^DEBUG"]
                        },
                        {
                            "Type": "processor_add_tags",
                            "Tags": {"host": "web-01"}
                        }
                    ]
                },
                {
                    "name": "empty"
                }
            ]
        }
        "#;
        let config = load_str(config).unwrap();
        assert!(config.flags.discard_old_data);
        assert_eq!(config.flags.discard_interval, 600);
        assert_eq!(config.pipelines.len(), 2);
        assert!(config.pipelines[1].processors.is_empty());

        let processors = &config.pipelines[0].processors;
        match &processors[0] {
            Processor::ParseTimestamp(p) => {
                assert_eq!(p.source_key, "time");
                assert_eq!(p.source_timezone, "GMT+08:00");
                assert_eq!(p.source_year, 0);
                assert_eq!(p.precise_timestamp_key.as_deref(), Some("precise_time"));
                assert_eq!(p.precise_timestamp_unit, processor::TimestampUnit::Us);
            }
            other => panic!("unexpected processor {:?}", other),
        }
        match &processors[1] {
            Processor::RegexFilter(p) => {
                assert!(p.allow.is_none());
                assert_eq!(p.remove.as_ref().unwrap().len(), 1);
            }
            other => panic!("unexpected processor {:?}", other),
        }
        assert_eq!(processors[2].plugin_type(), TYPE_ADD_TAGS);
    }

    #[test]
    fn default_flags() {
        let config = load_str(r#"{"pipelines": []}"#).unwrap();
        assert_eq!(config.flags, ProcessFlags::default());
        assert_eq!(config.flags.discard_interval, 43200);
    }

    #[test]
    fn duplicate_pipelines() {
        let err = load_str(r#"{"pipelines": [{"name": "a"}, {"name": "a"}]}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::DuplicatePipeline(name)) if name == "a"
        ));
    }

    #[test]
    fn unknown_processor_type() {
        let config = r#"{"pipelines": [{"name": "a", "processors": [{"Type": "nope"}]}]}"#;
        assert!(load_str(config).is_err());
    }

    #[test]
    fn missing_file() {
        assert!(load("/nonexistent/tailpipe.json").is_err());
    }
}
