//! Descriptive metadata and structural summaries of containers.

use crate::error::{AppResult, ShepherdError};
use crate::schema::{self, attrs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root attributes managed by the writer, never treated as free-form metadata.
pub const RESERVED_ATTRS: [&str; 4] =
    [attrs::MODE, attrs::CONFIG, attrs::IS_VALID, attrs::DS_FACTOR];

/// Descriptive information stored as scalar string attributes at the container root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Metadata {
    /// Host that produced the recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// A detailed description of the recording.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Producer of the data, e.g. converter and input file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Creation time as RFC 3339 string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    /// Version of the writing software.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub software_version: Option<String>,
    /// Any other user-defined key/value pairs.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, String>,
}

/// A builder for constructing `Metadata` instances.
#[derive(Default)]
pub struct MetadataBuilder {
    inner: Metadata,
}

impl MetadataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hostname(mut self, hostname: &str) -> Self {
        self.inner.hostname = Some(hostname.to_string());
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.inner.description = Some(description.to_string());
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.inner.source = Some(source.to_string());
        self
    }

    /// Stamp the current time and crate version.
    pub fn stamped(mut self) -> Self {
        self.inner.created_at = Some(chrono::Utc::now().to_rfc3339());
        self.inner.software_version = Some(env!("CARGO_PKG_VERSION").to_string());
        self
    }

    pub fn entry(mut self, key: &str, value: &str) -> Self {
        self.inner.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> Metadata {
        self.inner
    }
}

impl Metadata {
    /// Flatten into attribute name/value pairs.
    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        let known = [
            (attrs::HOSTNAME, &self.hostname),
            ("description", &self.description),
            ("source", &self.source),
            ("created_at", &self.created_at),
            ("software_version", &self.software_version),
        ];
        for (key, value) in known {
            if let Some(value) = value {
                pairs.push((key.to_string(), value.clone()));
            }
        }
        pairs.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        pairs
    }

    /// Validates the metadata.
    pub fn validate(&self) -> AppResult<()> {
        for (key, _) in self.to_pairs() {
            if key.is_empty() || RESERVED_ATTRS.contains(&key.as_str()) {
                return Err(ShepherdError::InvalidConfig(format!(
                    "metadata key '{}' is reserved or empty",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Write all entries as root attributes, replacing existing ones.
    pub fn write_to(&self, location: &hdf5::Location) -> AppResult<()> {
        self.validate()?;
        for (key, value) in self.to_pairs() {
            schema::write_str_attr(location, &key, &value)?;
        }
        Ok(())
    }

    /// Collect all scalar string attributes that are not reserved.
    pub fn read_from(location: &hdf5::Location) -> AppResult<Self> {
        let mut metadata = Metadata::default();
        for name in schema::attr_names(location)? {
            if RESERVED_ATTRS.contains(&name.as_str()) {
                continue;
            }
            // non-string attributes are not metadata
            let Ok(Some(value)) = schema::read_str_attr(location, &name) else {
                continue;
            };
            match name.as_str() {
                attrs::HOSTNAME => metadata.hostname = Some(value),
                "description" => metadata.description = Some(value),
                "source" => metadata.source = Some(value),
                "created_at" => metadata.created_at = Some(value),
                "software_version" => metadata.software_version = Some(value),
                _ => {
                    metadata.extra.insert(name, value);
                }
            }
        }
        Ok(metadata)
    }
}

/// Basic statistics of one channel.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Statistics {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std: f64,
    /// True if values were converted with a calibration.
    pub si_converted: bool,
}

/// Running accumulator for [`Statistics`], fed chunk by chunk.
#[derive(Debug, Clone)]
pub struct StatisticsAccumulator {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for StatisticsAccumulator {
    fn default() -> Self {
        Self {
            count: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl StatisticsAccumulator {
    /// Add one value (Welford update).
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Population statistics, `None` if nothing was pushed.
    pub fn finish(&self, si_converted: bool) -> Option<Statistics> {
        if self.count == 0 {
            return None;
        }
        Some(Statistics {
            mean: self.mean,
            min: self.min,
            max: self.max,
            std: (self.m2 / self.count as f64).sqrt(),
            si_converted,
        })
    }
}

/// Layout details of a dataset.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatasetInfo {
    pub dtype: String,
    pub shape: Vec<usize>,
    pub chunks: Option<Vec<usize>>,
    pub compression: String,
    /// Distinct sample intervals in s, only for the timestamp dataset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_diffs_s: Option<Vec<f64>>,
    /// Per-channel statistics of integer datasets.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub statistics: BTreeMap<String, Statistics>,
}

/// Derived figures of the data group.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GroupInfo {
    #[serde(rename = "energy_Ws")]
    pub energy_ws: f64,
    pub runtime_s: f64,
    #[serde(rename = "data_rate_KiB_s")]
    pub data_rate_kib_s: f64,
    #[serde(rename = "file_size_MiB")]
    pub file_size_mib: f64,
    pub valid: bool,
}

/// One node in the recursive structure summary of a container.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct NodeSummary {
    #[serde(rename = "_dataset_info", skip_serializing_if = "Option::is_none")]
    pub dataset_info: Option<DatasetInfo>,
    #[serde(rename = "_group_info", skip_serializing_if = "Option::is_none")]
    pub group_info: Option<GroupInfo>,
    /// Attributes; strings holding YAML are expanded.
    #[serde(flatten)]
    pub attributes: BTreeMap<String, serde_yaml::Value>,
    /// Groups and datasets below this node.
    #[serde(flatten)]
    pub children: BTreeMap<String, NodeSummary>,
}

impl NodeSummary {
    /// Render as YAML document.
    pub fn to_yaml(&self) -> AppResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Convert an attribute string into a YAML value, expanding embedded documents.
pub fn attr_to_yaml(value: &str) -> serde_yaml::Value {
    match serde_yaml::from_str::<serde_yaml::Value>(value) {
        Ok(parsed @ serde_yaml::Value::Mapping(_))
        | Ok(parsed @ serde_yaml::Value::Sequence(_)) => parsed,
        _ => serde_yaml::Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_pairs() {
        let meta = MetadataBuilder::new()
            .hostname("sheep0")
            .description("solar, roof")
            .entry("campaign", "2023-spring")
            .build();
        let pairs = meta.to_pairs();
        assert!(pairs.contains(&("hostname".to_string(), "sheep0".to_string())));
        assert!(pairs.contains(&("campaign".to_string(), "2023-spring".to_string())));
        assert_eq!(pairs.len(), 3);
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let meta = MetadataBuilder::new().entry("mode", "emulator").build();
        assert!(matches!(
            meta.validate(),
            Err(ShepherdError::InvalidConfig(_))
        ));
    }

    #[test]
    fn statistics_match_closed_form() {
        let mut acc = StatisticsAccumulator::default();
        assert!(acc.finish(false).is_none());
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            acc.push(v);
        }
        let stats = acc.finish(true).unwrap();
        assert!((stats.mean - 5.0).abs() < 1e-12);
        assert!((stats.std - 2.0).abs() < 1e-12);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 9.0);
    }

    #[test]
    fn yaml_attributes_are_expanded() {
        assert!(attr_to_yaml("datatype: ivcurve\nsamplerate_sps: 5").is_mapping());
        assert_eq!(
            attr_to_yaml("sheep0"),
            serde_yaml::Value::String("sheep0".to_string())
        );
    }

    #[test]
    fn summary_serializes_with_info_keys() {
        let mut root = NodeSummary::default();
        root.attributes
            .insert("mode".to_string(), attr_to_yaml("harvester"));
        root.children.insert(
            "data".to_string(),
            NodeSummary {
                group_info: Some(GroupInfo {
                    energy_ws: 1.5,
                    runtime_s: 2.0,
                    data_rate_kib_s: 3.0,
                    file_size_mib: 0.1,
                    valid: true,
                }),
                ..NodeSummary::default()
            },
        );
        let yaml = root.to_yaml().unwrap();
        assert!(yaml.contains("mode: harvester"));
        assert!(yaml.contains("_group_info:"));
        assert!(yaml.contains("energy_Ws: 1.5"));
    }
}
