//! Clustering configuration.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The shape of prototype to fit to each cluster.
///
/// `Automatic` tries `Spherical`, then `Elliptical`, then `Mixed`, keeping
/// the first shape whose distribution tests all pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtoStyle {
    Spherical,
    Elliptical,
    Mixed,
    Automatic,
}

impl fmt::Display for ProtoStyle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ProtoStyle::Spherical => "spherical",
            ProtoStyle::Elliptical => "elliptical",
            ProtoStyle::Mixed => "mixed",
            ProtoStyle::Automatic => "automatic",
        };
        write!(f, "{name}")
    }
}

/// Knobs controlling prototype extraction.
///
/// The cluster tree itself is built once per [`Clusterer`]; these settings
/// only steer which subtrees become prototypes, so the same `Clusterer` can
/// be re-run under several configurations without retraining.
///
/// [`Clusterer`]: crate::Clusterer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Prototype shape to fit.
    pub proto_style: ProtoStyle,
    /// Minimum number of samples per prototype, as a fraction of the number
    /// of distinct characters seen. Clusters below the threshold yield an
    /// insignificant prototype instead of being tested.
    pub min_samples: f32,
    /// Greatest tolerated fraction of samples whose character already
    /// appeared in the same cluster, in `[0, 1]`.
    pub max_illegal: f32,
    /// Greatest tolerated correlation between any two dimensions before a
    /// cluster is split instead of summarized, in `[0, 1]`.
    pub independence: f32,
    /// Probability of falsely rejecting the target distribution in the
    /// goodness-of-fit tests (the chi-squared tail area).
    pub confidence: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            proto_style: ProtoStyle::Elliptical,
            min_samples: 0.625,
            max_illegal: 0.05,
            independence: 1.,
            confidence: 0.05,
        }
    }
}

impl ClusterConfig {
    pub fn new() -> Self {
        ClusterConfig::default()
    }

    pub fn with_style(mut self, proto_style: ProtoStyle) -> Self {
        self.proto_style = proto_style;
        self
    }

    pub fn with_min_samples(mut self, min_samples: f32) -> Self {
        self.min_samples = min_samples;
        self
    }

    pub fn with_max_illegal(mut self, max_illegal: f32) -> Self {
        self.max_illegal = max_illegal;
        self
    }

    pub fn with_independence(mut self, independence: f32) -> Self {
        self.independence = independence;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::{ClusterConfig, ProtoStyle};

    #[test]
    fn test_builder_overrides_defaults() {
        let config = ClusterConfig::new()
            .with_style(ProtoStyle::Automatic)
            .with_min_samples(0.1)
            .with_confidence(1e-3);
        assert_eq!(config.proto_style, ProtoStyle::Automatic);
        assert!(config.min_samples < 0.2);
        assert!(config.confidence < 0.01);
        assert_eq!(config.max_illegal, ClusterConfig::default().max_illegal);
    }

    #[test]
    fn test_serde_round_trip() {
        let config = ClusterConfig::default().with_style(ProtoStyle::Mixed);
        let json = serde_json::to_string(&config).unwrap();
        let back: ClusterConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
