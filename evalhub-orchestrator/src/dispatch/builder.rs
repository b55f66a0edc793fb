//! Cluster resource builders
//!
//! Pure functions from a [`JobConfig`] to the ConfigMap and Job submitted
//! for one benchmark. Nothing here talks to the cluster.

use std::collections::BTreeMap;

use evalhub_kube::resources::{
    Capabilities, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, EnvVar, JobSpec,
    ObjectMeta, PodSpec, PodTemplateSpec, ResourceRequirements, SeccompProfile,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount,
};
use evalhub_kube::{ConfigMap, Job};
use sha2::{Digest, Sha256};

use super::job_config::JobConfig;

pub const JOB_SPEC_FILE_NAME: &str = "job.json";
pub const JOB_SPEC_MOUNT_PATH: &str = "/meta/job.json";
pub const DATA_MOUNT_PATH: &str = "/data";
pub const CONTAINER_NAME: &str = "adapter";
pub const CONFIG_MAP_SUFFIX: &str = "-spec";
pub const TTL_SECONDS_AFTER_FINISHED: i32 = 3600;

pub const OCI_CREDENTIALS_VOLUME_NAME: &str = "oci-credentials";
pub const OCI_CREDENTIALS_MOUNT_PATH: &str = "/etc/evalhub/oci/config.json";
pub const OCI_CREDENTIALS_SECRET_KEY: &str = ".dockerconfigjson";

const JOB_SPEC_VOLUME_NAME: &str = "job-spec";
const DATA_VOLUME_NAME: &str = "data";

pub const LABEL_APP_KEY: &str = "app";
pub const LABEL_COMPONENT_KEY: &str = "component";
pub const LABEL_JOB_ID_KEY: &str = "job_id";
pub const LABEL_PROVIDER_ID_KEY: &str = "provider_id";
pub const LABEL_BENCHMARK_ID_KEY: &str = "benchmark_id";

pub const ANNOTATION_JOB_ID_KEY: &str = "job_id";
pub const ANNOTATION_PROVIDER_ID_KEY: &str = "provider_id";
pub const ANNOTATION_BENCHMARK_ID_KEY: &str = "benchmark_id";

const APP_LABEL_VALUE: &str = "evalhub";
const COMPONENT_LABEL_VALUE: &str = "evaluation-job";

pub const ENV_JOB_ID: &str = "JOB_ID";
pub const ENV_EVALHUB_URL: &str = "EVALHUB_URL";
pub const ENV_PROVIDER_ID: &str = "PROVIDER_ID";
pub const ENV_BENCHMARK_ID: &str = "BENCHMARK_ID";
pub const ENV_JOB_SPEC_PATH: &str = "JOB_SPEC_PATH";
pub const ENV_OCI_AUTH_CONFIG_PATH: &str = "OCI_AUTH_CONFIG_PATH";

/// Variables the service sets itself; provider defaults never override them
const RESERVED_ENV: [&str; 6] = [
    ENV_JOB_ID,
    ENV_EVALHUB_URL,
    ENV_PROVIDER_ID,
    ENV_BENCHMARK_ID,
    ENV_JOB_SPEC_PATH,
    ENV_OCI_AUTH_CONFIG_PATH,
];

/// Kubernetes object names are DNS-1123 labels
const MAX_NAME_LEN: usize = 63;
const MAX_LABEL_LEN: usize = 63;
const DIGEST_LEN: usize = 8;

/// Deterministic, DNS-safe resource name for one benchmark of a job
///
/// The readable prefix may be cut; the digest of the raw ids keeps names
/// distinct when it is.
pub fn build_k8s_name(job_id: &str, provider_id: &str, benchmark_id: &str, suffix: &str) -> String {
    let readable = sanitize_name(&format!("eval-job-{provider_id}-{benchmark_id}-{job_id}"));
    let budget = MAX_NAME_LEN - DIGEST_LEN - 1 - suffix.len();
    let prefix = readable[..readable.len().min(budget)].trim_end_matches('-');

    let digest = Sha256::digest(format!("{job_id}/{provider_id}/{benchmark_id}{suffix}"));
    let digest = hex::encode(&digest[..DIGEST_LEN / 2]);

    format!("{prefix}-{digest}{suffix}")
}

pub fn job_name(job_id: &str, provider_id: &str, benchmark_id: &str) -> String {
    build_k8s_name(job_id, provider_id, benchmark_id, "")
}

pub fn config_map_name(job_id: &str, provider_id: &str, benchmark_id: &str) -> String {
    build_k8s_name(job_id, provider_id, benchmark_id, CONFIG_MAP_SUFFIX)
}

/// Lowercase, hyphen-separated, only `[a-z0-9-]`
fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Label values allow `[A-Za-z0-9._-]` and must start and end alphanumeric
fn sanitize_label_value(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(MAX_LABEL_LEN)
        .collect();
    replaced
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

pub fn job_labels(job_id: &str, provider_id: &str, benchmark_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP_KEY.to_string(), APP_LABEL_VALUE.to_string()),
        (LABEL_COMPONENT_KEY.to_string(), COMPONENT_LABEL_VALUE.to_string()),
        (LABEL_JOB_ID_KEY.to_string(), sanitize_label_value(job_id)),
        (LABEL_PROVIDER_ID_KEY.to_string(), sanitize_label_value(provider_id)),
        (LABEL_BENCHMARK_ID_KEY.to_string(), sanitize_label_value(benchmark_id)),
    ])
}

pub fn job_annotations(
    job_id: &str,
    provider_id: &str,
    benchmark_id: &str,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ANNOTATION_JOB_ID_KEY.to_string(), job_id.to_string()),
        (ANNOTATION_PROVIDER_ID_KEY.to_string(), provider_id.to_string()),
        (ANNOTATION_BENCHMARK_ID_KEY.to_string(), benchmark_id.to_string()),
    ])
}

fn metadata(cfg: &JobConfig, name: String) -> ObjectMeta {
    ObjectMeta {
        name,
        namespace: cfg.namespace.clone(),
        labels: job_labels(&cfg.job_id, &cfg.provider_id, &cfg.benchmark_id),
        annotations: job_annotations(&cfg.job_id, &cfg.provider_id, &cfg.benchmark_id),
        uid: None,
    }
}

/// ConfigMap carrying the job spec the adapter reads at startup
pub fn build_config_map(cfg: &JobConfig) -> ConfigMap {
    let name = config_map_name(&cfg.job_id, &cfg.provider_id, &cfg.benchmark_id);
    ConfigMap::new(
        metadata(cfg, name),
        BTreeMap::from([(JOB_SPEC_FILE_NAME.to_string(), cfg.job_spec_json.clone())]),
    )
}

/// Trimmed, non-empty entrypoint items
pub fn build_container_command(entrypoint: &[String]) -> Vec<String> {
    entrypoint
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_env(cfg: &JobConfig) -> Vec<EnvVar> {
    let mut env = vec![
        EnvVar::new(ENV_JOB_ID, &cfg.job_id),
        EnvVar::new(ENV_EVALHUB_URL, &cfg.service_url),
        EnvVar::new(ENV_PROVIDER_ID, &cfg.provider_id),
        EnvVar::new(ENV_BENCHMARK_ID, &cfg.benchmark_id),
        EnvVar::new(ENV_JOB_SPEC_PATH, JOB_SPEC_MOUNT_PATH),
    ];

    env.extend(
        cfg.default_env
            .iter()
            .filter(|var| !var.name.is_empty() && !RESERVED_ENV.contains(&var.name.as_str()))
            .map(|var| EnvVar::new(&var.name, &var.value)),
    );

    if cfg.oci_credentials_secret.is_some() {
        env.push(EnvVar::new(ENV_OCI_AUTH_CONFIG_PATH, OCI_CREDENTIALS_MOUNT_PATH));
    }
    env
}

/// Restricted pod security; user and group ids are left to the cluster policy
fn security_context() -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        run_as_non_root: Some(true),
        run_as_user: None,
        run_as_group: None,
        capabilities: Some(Capabilities {
            drop: vec!["ALL".to_string()],
        }),
        seccomp_profile: Some(SeccompProfile {
            profile_type: "RuntimeDefault".to_string(),
        }),
    }
}

fn volumes(cfg: &JobConfig, config_map: String) -> (Vec<Volume>, Vec<VolumeMount>) {
    let mut volumes = vec![
        Volume {
            name: JOB_SPEC_VOLUME_NAME.to_string(),
            config_map: Some(ConfigMapVolumeSource { name: config_map }),
            ..Default::default()
        },
        Volume {
            name: DATA_VOLUME_NAME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {}),
            ..Default::default()
        },
    ];
    let mut mounts = vec![
        VolumeMount {
            name: JOB_SPEC_VOLUME_NAME.to_string(),
            mount_path: JOB_SPEC_MOUNT_PATH.to_string(),
            sub_path: Some(JOB_SPEC_FILE_NAME.to_string()),
            read_only: true,
        },
        VolumeMount {
            name: DATA_VOLUME_NAME.to_string(),
            mount_path: DATA_MOUNT_PATH.to_string(),
            sub_path: None,
            read_only: false,
        },
    ];

    if let Some(secret) = &cfg.oci_credentials_secret {
        volumes.push(Volume {
            name: OCI_CREDENTIALS_VOLUME_NAME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: secret.clone(),
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: OCI_CREDENTIALS_VOLUME_NAME.to_string(),
            mount_path: OCI_CREDENTIALS_MOUNT_PATH.to_string(),
            sub_path: Some(OCI_CREDENTIALS_SECRET_KEY.to_string()),
            read_only: true,
        });
    }

    (volumes, mounts)
}

/// Job running the provider adapter for one benchmark
pub fn build_job(cfg: &JobConfig) -> Result<Job, String> {
    if cfg.adapter_image.is_empty() {
        return Err("runtime adapter image is required".to_string());
    }

    let config_map = config_map_name(&cfg.job_id, &cfg.provider_id, &cfg.benchmark_id);
    let (volumes, volume_mounts) = volumes(cfg, config_map);

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: cfg.adapter_image.clone(),
        command: build_container_command(&cfg.entrypoint),
        env: build_env(cfg),
        resources: ResourceRequirements {
            requests: BTreeMap::from([
                ("cpu".to_string(), cfg.cpu_request.clone()),
                ("memory".to_string(), cfg.memory_request.clone()),
            ]),
            limits: BTreeMap::from([
                ("cpu".to_string(), cfg.cpu_limit.clone()),
                ("memory".to_string(), cfg.memory_limit.clone()),
            ]),
        },
        volume_mounts,
        security_context: Some(security_context()),
    };

    let name = job_name(&cfg.job_id, &cfg.provider_id, &cfg.benchmark_id);
    let template_meta = ObjectMeta {
        namespace: String::new(),
        ..metadata(cfg, String::new())
    };

    Ok(Job::new(
        metadata(cfg, name),
        JobSpec {
            backoff_limit: Some(cfg.retry_attempts),
            active_deadline_seconds: cfg
                .timeout_minutes
                .filter(|m| *m > 0)
                .map(|m| i64::from(m) * 60),
            ttl_seconds_after_finished: Some(TTL_SECONDS_AFTER_FINISHED),
            template: PodTemplateSpec {
                metadata: template_meta,
                spec: PodSpec {
                    restart_policy: Some("Never".to_string()),
                    containers: vec![container],
                    volumes,
                },
            },
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> JobConfig {
        JobConfig {
            job_id: "job-123".to_string(),
            namespace: "default".to_string(),
            provider_id: "provider-1".to_string(),
            benchmark_id: "bench-1".to_string(),
            adapter_image: "adapter:latest".to_string(),
            service_url: "http://evalhub:8080".to_string(),
            job_spec_json: "{}".to_string(),
            cpu_request: "250m".to_string(),
            memory_request: "512Mi".to_string(),
            cpu_limit: "1".to_string(),
            memory_limit: "2Gi".to_string(),
            ..Default::default()
        }
    }

    fn env_value<'a>(job: &'a Job, name: &str) -> Option<&'a str> {
        job.spec.template.spec.containers[0]
            .env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }

    #[test]
    fn test_build_config_map() {
        let cfg = config();
        let config_map = build_config_map(&cfg);

        assert_eq!(
            config_map.metadata.name,
            config_map_name(&cfg.job_id, &cfg.provider_id, &cfg.benchmark_id)
        );
        assert_eq!(config_map.metadata.namespace, "default");
        assert_eq!(config_map.data[JOB_SPEC_FILE_NAME], "{}");

        let annotations = &config_map.metadata.annotations;
        assert_eq!(annotations[ANNOTATION_JOB_ID_KEY], "job-123");
        assert_eq!(annotations[ANNOTATION_PROVIDER_ID_KEY], "provider-1");
        assert_eq!(annotations[ANNOTATION_BENCHMARK_ID_KEY], "bench-1");
    }

    #[test]
    fn test_build_k8s_name_sanitizes() {
        let name = build_k8s_name("Job-123", "Provider-1", "AraDiCE_boolq_lev", "");
        assert!(
            name.starts_with("eval-job-provider-1-aradice-boolq-lev-job-123-"),
            "unexpected name {name}"
        );
    }

    #[test]
    fn test_build_k8s_name_differs_across_providers() {
        assert_ne!(
            build_k8s_name("job-123", "lmeval", "arc_easy", ""),
            build_k8s_name("job-123", "lighteval", "arc_easy", "")
        );
    }

    #[test]
    fn test_build_k8s_name_is_stable_and_bounded() {
        let long = "x".repeat(200);
        let name = config_map_name(&long, "provider", "benchmark");

        assert_eq!(name, config_map_name(&long, "provider", "benchmark"));
        assert!(name.len() <= MAX_NAME_LEN, "name too long: {}", name.len());
        assert!(name.ends_with(CONFIG_MAP_SUFFIX));
        assert_ne!(
            job_name("job-1", "p", "b"),
            config_map_name("job-1", "p", "b").trim_end_matches(CONFIG_MAP_SUFFIX)
        );
    }

    #[test]
    fn test_job_labels_sanitize_benchmark_id() {
        let labels = job_labels("job-123", "lighteval", "arc:easy");
        assert_eq!(labels[LABEL_BENCHMARK_ID_KEY], "arc-easy");
        assert_eq!(labels[LABEL_PROVIDER_ID_KEY], "lighteval");
        assert_eq!(labels[LABEL_APP_KEY], "evalhub");
    }

    #[test]
    fn test_build_job_requires_adapter_image() {
        let cfg = JobConfig {
            adapter_image: String::new(),
            ..config()
        };
        assert!(build_job(&cfg).is_err());
    }

    #[test]
    fn test_build_job_security_context() {
        let job = build_job(&config()).unwrap();
        let container = &job.spec.template.spec.containers[0];
        let security = container.security_context.as_ref().unwrap();

        assert_eq!(security.allow_privilege_escalation, Some(false));
        assert_eq!(security.run_as_non_root, Some(true));
        assert_eq!(security.run_as_user, None);
        assert_eq!(security.run_as_group, None);
        assert_eq!(security.capabilities.as_ref().unwrap().drop, vec!["ALL"]);
        assert_eq!(
            security.seccomp_profile.as_ref().unwrap().profile_type,
            "RuntimeDefault"
        );
    }

    #[test]
    fn test_build_job_annotations_on_job_and_pod() {
        let cfg = config();
        let job = build_job(&cfg).unwrap();

        for annotations in [&job.metadata.annotations, &job.spec.template.metadata.annotations] {
            assert_eq!(annotations[ANNOTATION_JOB_ID_KEY], cfg.job_id);
            assert_eq!(annotations[ANNOTATION_PROVIDER_ID_KEY], cfg.provider_id);
            assert_eq!(annotations[ANNOTATION_BENCHMARK_ID_KEY], cfg.benchmark_id);
        }
        assert!(job.spec.template.metadata.name.is_empty());
    }

    #[test]
    fn test_build_job_spec_fields() {
        let cfg = JobConfig {
            retry_attempts: 3,
            timeout_minutes: Some(30),
            ..config()
        };
        let job = build_job(&cfg).unwrap();

        assert_eq!(job.metadata.name, job_name("job-123", "provider-1", "bench-1"));
        assert_eq!(job.spec.backoff_limit, Some(3));
        assert_eq!(job.spec.active_deadline_seconds, Some(1800));
        assert_eq!(job.spec.ttl_seconds_after_finished, Some(3600));
        assert_eq!(job.spec.template.spec.restart_policy.as_deref(), Some("Never"));

        let container = &job.spec.template.spec.containers[0];
        assert_eq!(container.name, CONTAINER_NAME);
        assert_eq!(container.resources.requests["cpu"], "250m");
        assert_eq!(container.resources.limits["memory"], "2Gi");
        assert!(container.command.is_empty());
    }

    #[test]
    fn test_build_job_volumes() {
        let job = build_job(&config()).unwrap();
        let pod = &job.spec.template.spec;

        assert_eq!(pod.volumes.len(), 2);
        let spec_volume = pod.volumes.iter().find(|v| v.config_map.is_some()).unwrap();
        assert_eq!(
            spec_volume.config_map.as_ref().unwrap().name,
            config_map_name("job-123", "provider-1", "bench-1")
        );
        assert!(pod.volumes.iter().any(|v| v.empty_dir.is_some()));

        let spec_mount = pod.containers[0]
            .volume_mounts
            .iter()
            .find(|m| m.mount_path == JOB_SPEC_MOUNT_PATH)
            .unwrap();
        assert!(spec_mount.read_only);
        assert_eq!(spec_mount.sub_path.as_deref(), Some(JOB_SPEC_FILE_NAME));
    }

    #[test]
    fn test_build_job_env_keeps_fixed_variables() {
        let mut cfg = config();
        cfg.default_env = vec![
            evalhub_core::domain::provider::EnvVar {
                name: "JOB_ID".to_string(),
                value: "shadowed".to_string(),
            },
            evalhub_core::domain::provider::EnvVar {
                name: "HF_HOME".to_string(),
                value: "/data/hf".to_string(),
            },
        ];
        let job = build_job(&cfg).unwrap();

        assert_eq!(env_value(&job, ENV_JOB_ID), Some("job-123"));
        assert_eq!(env_value(&job, ENV_EVALHUB_URL), Some("http://evalhub:8080"));
        assert_eq!(env_value(&job, ENV_JOB_SPEC_PATH), Some(JOB_SPEC_MOUNT_PATH));
        assert_eq!(env_value(&job, "HF_HOME"), Some("/data/hf"));
        let env = &job.spec.template.spec.containers[0].env;
        assert_eq!(env.iter().filter(|e| e.name == ENV_JOB_ID).count(), 1);
    }

    #[test]
    fn test_build_job_oci_credentials() {
        let cfg = JobConfig {
            job_id: "job-oci".to_string(),
            oci_credentials_secret: Some("my-pull-secret".to_string()),
            ..config()
        };
        let job = build_job(&cfg).unwrap();
        let pod = &job.spec.template.spec;

        let volume = pod
            .volumes
            .iter()
            .find(|v| v.name == OCI_CREDENTIALS_VOLUME_NAME)
            .unwrap();
        assert_eq!(volume.secret.as_ref().unwrap().secret_name, "my-pull-secret");

        let mount = pod.containers[0]
            .volume_mounts
            .iter()
            .find(|m| m.name == OCI_CREDENTIALS_VOLUME_NAME)
            .unwrap();
        assert!(mount.read_only);
        assert_eq!(mount.mount_path, OCI_CREDENTIALS_MOUNT_PATH);
        assert_eq!(
            env_value(&job, ENV_OCI_AUTH_CONFIG_PATH),
            Some(OCI_CREDENTIALS_MOUNT_PATH)
        );
    }

    #[test]
    fn test_build_job_without_oci_credentials() {
        let job = build_job(&config()).unwrap();
        let pod = &job.spec.template.spec;

        assert!(pod.volumes.iter().all(|v| v.name != OCI_CREDENTIALS_VOLUME_NAME));
        assert!(pod.containers[0]
            .volume_mounts
            .iter()
            .all(|m| m.name != OCI_CREDENTIALS_VOLUME_NAME));
        assert_eq!(env_value(&job, ENV_OCI_AUTH_CONFIG_PATH), None);
    }

    #[test]
    fn test_build_container_command() {
        let entrypoint = vec!["  entrypoint ".to_string(), String::new(), " ".to_string()];
        assert_eq!(build_container_command(&entrypoint), vec!["entrypoint"]);
        assert!(build_container_command(&[]).is_empty());
    }
}
