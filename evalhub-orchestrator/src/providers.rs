//! Provider catalogue
//!
//! Loaded once at startup from a JSON file holding an array of providers.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use evalhub_core::domain::evaluation::BenchmarkConfig;
use evalhub_core::domain::provider::{
    BenchmarkResourceList, ProviderResource, ProviderResourceList,
};

/// Providers keyed by id, iterated in id order
#[derive(Debug, Clone, Default)]
pub struct ProviderCatalogue {
    providers: BTreeMap<String, ProviderResource>,
}

impl ProviderCatalogue {
    pub fn new(providers: impl IntoIterator<Item = ProviderResource>) -> Self {
        Self {
            providers: providers.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read provider catalogue {}", path.display()))?;
        let providers: Vec<ProviderResource> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse provider catalogue {}", path.display()))?;

        let catalogue = Self::new(providers);
        tracing::info!(count = catalogue.len(), "Loaded provider catalogue");
        Ok(catalogue)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ProviderResource> {
        self.providers.get(id)
    }

    /// The provider that runs `benchmark`
    ///
    /// The benchmark's own provider wins when it lists the benchmark;
    /// otherwise the first provider in id order that lists it.
    pub fn resolve(&self, benchmark: &BenchmarkConfig) -> Option<&ProviderResource> {
        self.get(&benchmark.provider_id)
            .filter(|p| p.has_benchmark(&benchmark.id))
            .or_else(|| {
                self.providers
                    .values()
                    .find(|p| p.has_benchmark(&benchmark.id))
            })
    }

    pub fn list(&self) -> ProviderResourceList {
        ProviderResourceList {
            total_count: self.providers.len(),
            items: self.providers.values().cloned().collect(),
        }
    }

    /// Every provider's benchmarks, each tagged with its provider id
    pub fn benchmarks(&self) -> BenchmarkResourceList {
        let items: Vec<_> = self
            .providers
            .values()
            .flat_map(|provider| {
                provider.benchmarks.iter().map(|benchmark| {
                    let mut benchmark = benchmark.clone();
                    benchmark.provider_id = Some(provider.id.clone());
                    benchmark
                })
            })
            .collect();

        BenchmarkResourceList {
            total_count: items.len(),
            items,
        }
    }
}
