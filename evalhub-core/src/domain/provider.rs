//! Evaluation provider catalogue

use serde::{Deserialize, Serialize};

/// An evaluation provider and the benchmarks it can run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResource {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub benchmarks: Vec<BenchmarkResource>,
    /// Execution settings are operator configuration, never returned to clients
    #[serde(default, skip_serializing)]
    pub runtime: Option<ProviderRuntime>,
}

impl ProviderResource {
    pub fn has_benchmark(&self, benchmark_id: &str) -> bool {
        self.benchmarks.iter().any(|b| b.id == benchmark_id)
    }
}

/// A benchmark listed in a provider's catalogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResource {
    pub id: String,
    /// Set when the benchmark is listed outside its provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRuntime {
    #[serde(default)]
    pub k8s: Option<K8sRuntime>,
}

/// Container settings for a provider's adapter on the cluster
///
/// Empty resource strings fall back to the dispatcher defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct K8sRuntime {
    pub image: String,
    #[serde(default)]
    pub entrypoint: Vec<String>,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub memory_request: String,
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub memory_limit: String,
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResourceList {
    pub total_count: usize,
    pub items: Vec<ProviderResource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResourceList {
    pub total_count: usize,
    pub items: Vec<BenchmarkResource>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_is_not_serialized() {
        let provider = ProviderResource {
            id: "lighteval".to_string(),
            name: "LightEval".to_string(),
            description: String::new(),
            benchmarks: vec![],
            runtime: Some(ProviderRuntime {
                k8s: Some(K8sRuntime {
                    image: "quay.io/evalhub/lighteval:latest".to_string(),
                    ..Default::default()
                }),
            }),
        };
        let json = serde_json::to_value(&provider).unwrap();
        assert!(json.get("runtime").is_none());
    }

    #[test]
    fn test_catalogue_deserializes_runtime() {
        let provider: ProviderResource = serde_json::from_str(
            r#"{
                "id": "lm_evaluation_harness",
                "benchmarks": [{"id": "arc_easy"}],
                "runtime": {"k8s": {"image": "adapter:latest", "cpu_limit": "2"}}
            }"#,
        )
        .unwrap();
        assert!(provider.has_benchmark("arc_easy"));
        assert!(!provider.has_benchmark("mmlu"));
        let k8s = provider.runtime.unwrap().k8s.unwrap();
        assert_eq!(k8s.cpu_limit, "2");
        assert!(k8s.memory_limit.is_empty());
    }
}
