//! Adapter selection for a given task.
//!
//! The primary path is deterministic: trivial tasks get one adapter, and
//! everything else gets the fixed base set of cloud backends (filtered by
//! availability) plus one to three specialized local-model instances.
//! Scoring is a secondary API used for ranking and explanations, not for
//! the primary choice.

use std::collections::HashMap;
use std::sync::Arc;

use quorum_protocol::Task;
use quorum_protocol::TaskType;
use rand::Rng;
use tracing::debug;

use crate::adapters::Adapter;
use crate::adapters::LocalAdapter;

/// Cloud backends always included for multi-adapter tasks, in speaking
/// order.
const BASE_SET: &[&str] = &["claude", "codex", "gemini"];

/// The adapter preferred for single-adapter (trivial) requests.
const REASONING_ADAPTER: &str = "claude";

/// The research-oriented adapter guaranteed on larger panels.
const RESEARCH_ADAPTER: &str = "gemini";

/// One local-model instance: model tag, instance name, specialty label.
struct LocalProfile {
    model: &'static str,
    name: &'static str,
}

const CODING_PROFILES: &[LocalProfile] = &[
    LocalProfile {
        model: "qwen2.5-coder:7b",
        name: "Ollama-Coder",
    },
    LocalProfile {
        model: "deepseek-r1:70b",
        name: "Ollama-Reasoner",
    },
];

const ANALYSIS_PROFILES: &[LocalProfile] = &[
    LocalProfile {
        model: "llama3.1:70b",
        name: "Ollama-Analysis",
    },
    LocalProfile {
        model: "qwen3:32b",
        name: "Ollama-Logic",
    },
    LocalProfile {
        model: "deepseek-r1:32b",
        name: "Ollama-Deep",
    },
];

const CREATIVE_PROFILES: &[LocalProfile] = &[
    LocalProfile {
        model: "llama3.3:latest",
        name: "Ollama-Creative",
    },
    LocalProfile {
        model: "mistral:7b",
        name: "Ollama-Fast",
    },
];

const DEFAULT_PROFILES: &[LocalProfile] = &[LocalProfile {
    model: "llama3.1:70b",
    name: "Ollama-Main",
}];

/// Per-adapter specialty score by task kind.
fn specialty(name: &str, kind: TaskType) -> f64 {
    match name {
        "claude" => match kind {
            TaskType::Code | TaskType::Analysis => 0.9,
            TaskType::Design | TaskType::Explain => 0.95,
            TaskType::Creative | TaskType::Debug => 0.85,
            TaskType::Research => 0.8,
            TaskType::General | TaskType::SimpleChat => 0.9,
        },
        "codex" => match kind {
            TaskType::Code => 0.95,
            TaskType::Design => 0.85,
            TaskType::Debug => 0.9,
            TaskType::Analysis | TaskType::General => 0.8,
            TaskType::Creative | TaskType::Research | TaskType::SimpleChat => 0.7,
            TaskType::Explain => 0.75,
        },
        "gemini" => match kind {
            TaskType::Research => 0.95,
            TaskType::Analysis | TaskType::Creative | TaskType::Explain => 0.9,
            TaskType::Code | TaskType::Design | TaskType::General | TaskType::SimpleChat => 0.85,
            TaskType::Debug => 0.8,
        },
        "ollama" => match kind {
            TaskType::Code | TaskType::Creative | TaskType::Explain | TaskType::General => 0.8,
            TaskType::SimpleChat => 0.85,
            TaskType::Design | TaskType::Analysis | TaskType::Debug => 0.75,
            TaskType::Research => 0.7,
        },
        _ => 0.7,
    }
}

/// Specialty labels used in reasons and explanations.
fn specialty_labels(name: &str) -> &'static [&'static str] {
    match name {
        "claude" => &["reasoning", "analysis", "explanation", "design"],
        "codex" => &["code", "implementation", "debugging", "algorithms"],
        "gemini" => &["research", "creativity", "multimodal", "current events"],
        "ollama" => &["local processing", "privacy", "customization"],
        _ => &["general"],
    }
}

/// Score of one adapter for one task.
pub struct AdapterScore {
    pub adapter: Arc<dyn Adapter>,
    pub score: f64,
    pub specialties: Vec<&'static str>,
    pub reason: String,
}

/// Selects adapters for analyzed tasks.
#[derive(Debug, Clone)]
pub struct Selector {
    pub min_ais: u32,
    pub max_ais: u32,
}

impl Default for Selector {
    fn default() -> Self {
        Self {
            min_ais: 2,
            max_ais: 6,
        }
    }
}

impl Selector {
    /// Pick an ordered adapter set for `task` from `available`.
    ///
    /// `available` must already be availability-filtered (see
    /// [`check_adapters_parallel`](crate::adapters::check_adapters_parallel)).
    pub fn select(&self, task: &Task, available: &[Arc<dyn Adapter>]) -> Vec<Arc<dyn Adapter>> {
        if task.task_type == TaskType::SimpleChat || task.complexity < 0.3 {
            return self.select_single(available);
        }

        if available.is_empty() {
            return Vec::new();
        }

        let by_name: HashMap<String, Arc<dyn Adapter>> = available
            .iter()
            .map(|a| (a.name().to_lowercase(), a.clone()))
            .collect();

        let mut selected: Vec<Arc<dyn Adapter>> = Vec::new();
        for name in BASE_SET {
            if let Some(adapter) = by_name.get(*name) {
                selected.push(adapter.clone());
            }
        }

        if let Some(base_local) = by_name.get("ollama") {
            selected.extend(self.local_instances(task, base_local.as_ref()));
        }

        debug!(
            task_type = %task.task_type,
            complexity = task.complexity,
            selected = selected.len(),
            "adapters selected"
        );
        selected
    }

    /// Single-adapter path for trivial requests.
    fn select_single(&self, available: &[Arc<dyn Adapter>]) -> Vec<Arc<dyn Adapter>> {
        if let Some(adapter) = available
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(REASONING_ADAPTER))
        {
            return vec![adapter.clone()];
        }
        available.first().cloned().into_iter().collect()
    }

    /// Specialized local-model instances for the task kind, scaled by
    /// complexity.
    fn local_instances(&self, task: &Task, base: &dyn Adapter) -> Vec<Arc<dyn Adapter>> {
        let profiles: &[LocalProfile] = match task.task_type {
            TaskType::Code | TaskType::Debug => CODING_PROFILES,
            TaskType::Analysis | TaskType::Research => ANALYSIS_PROFILES,
            TaskType::Creative => CREATIVE_PROFILES,
            _ => DEFAULT_PROFILES,
        };

        let count = if task.complexity > 0.7 {
            profiles.len().min(3)
        } else if task.complexity > 0.5 {
            profiles.len().min(2)
        } else {
            1
        };

        profiles[..count.min(profiles.len())]
            .iter()
            .map(|profile| {
                Arc::new(LocalAdapter::instance(
                    base.config().clone(),
                    profile.model,
                    profile.name,
                )) as Arc<dyn Adapter>
            })
            .collect()
    }

    /// Secondary API: score and rank `adapters` for `task`.
    ///
    /// A bounded random perturbation (±0.05) breaks ties; pass a seeded
    /// rng for reproducibility.
    pub fn rank<R: Rng>(
        &self,
        task: &Task,
        adapters: &[Arc<dyn Adapter>],
        rng: &mut R,
    ) -> Vec<AdapterScore> {
        let mut scores: Vec<AdapterScore> = adapters
            .iter()
            .map(|adapter| self.score(task, adapter.clone(), rng))
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }

    fn score<R: Rng>(
        &self,
        task: &Task,
        adapter: Arc<dyn Adapter>,
        rng: &mut R,
    ) -> AdapterScore {
        let name = adapter.name().to_lowercase();
        let base = specialty(&name, task.task_type);

        let mut bonus = 0.0;
        if task.requires_code {
            if name == "codex" {
                bonus += 0.25;
            } else if name == "claude" {
                bonus += 0.1;
            }
        }
        if task.task_type == TaskType::Debug && name == "codex" {
            bonus += 0.2;
        }
        if task.task_type == TaskType::Code && name == "codex" {
            bonus += 0.15;
        }
        if task.requires_creativity && (name == "gemini" || name == "claude") {
            bonus += 0.1;
        }
        if task.requires_analysis && (name == "claude" || name == "gemini") {
            bonus += 0.1;
        }

        let variation = (rng.random::<f64>() - 0.5) * 0.1;
        let score = (base + bonus + variation).min(1.0);

        let specialties: Vec<&'static str> = specialty_labels(&name).to_vec();
        let reason = format!(
            "Good at: {}",
            specialties
                .iter()
                .take(2)
                .copied()
                .collect::<Vec<_>>()
                .join(", ")
        );

        AdapterScore {
            adapter,
            score,
            specialties,
            reason,
        }
    }

    /// Trim a ranked list to `target_count`, preferring specialty
    /// diversity and guaranteeing the research adapter on panels of
    /// three or more.
    pub fn select_with_diversity(
        &self,
        scores: Vec<AdapterScore>,
        target_count: usize,
    ) -> Vec<AdapterScore> {
        if scores.len() <= target_count {
            return scores;
        }

        let mut pool: Vec<AdapterScore> = scores;
        let mut selected: Vec<AdapterScore> = Vec::new();

        while selected.len() < target_count && !pool.is_empty() {
            let best = pool.remove(0);
            selected.push(best);

            if selected.len() < target_count && !pool.is_empty() {
                let mut covered: std::collections::HashSet<&str> = std::collections::HashSet::new();
                for s in &selected {
                    covered.extend(s.specialties.iter().take(2).copied());
                }
                // Move the first candidate that brings a new specialty
                // to the front.
                if let Some(pos) = pool.iter().position(|candidate| {
                    candidate
                        .specialties
                        .iter()
                        .take(2)
                        .any(|s| !covered.contains(s))
                }) {
                    let candidate = pool.remove(pos);
                    pool.insert(0, candidate);
                }
            }
        }

        if target_count >= 3
            && !selected
                .iter()
                .any(|s| s.adapter.name().eq_ignore_ascii_case(RESEARCH_ADAPTER))
            && let Some(pos) = pool
                .iter()
                .position(|s| s.adapter.name().eq_ignore_ascii_case(RESEARCH_ADAPTER))
        {
            let research = pool.remove(pos);
            if selected.len() >= target_count {
                selected.pop();
            }
            selected.push(research);
        }

        selected
    }

    /// Human-readable explanation of a selection.
    pub fn explanation(&self, task: &Task, selected: &[Arc<dyn Adapter>]) -> String {
        let mut parts = vec![
            format!("Task Type: {}", task.task_type),
            format!("Complexity: {:.0}%", task.complexity * 100.0),
            format!("Selected {} AIs:", selected.len()),
        ];
        for adapter in selected {
            let labels = specialty_labels(&adapter.name().to_lowercase());
            parts.push(format!(
                "  - {}: {}",
                adapter.display_name(),
                labels.iter().take(2).copied().collect::<Vec<_>>().join(", ")
            ));
        }
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use quorum_protocol::AdapterConfig;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::adapters::ChunkStream;
    use crate::error::Result;

    struct NamedAdapter {
        name: String,
        config: AdapterConfig,
    }

    impl NamedAdapter {
        fn boxed(name: &str) -> Arc<dyn Adapter> {
            Arc::new(Self {
                name: name.to_string(),
                config: AdapterConfig::default(),
            })
        }
    }

    #[async_trait]
    impl Adapter for NamedAdapter {
        fn name(&self) -> &str {
            &self.name
        }
        fn config(&self) -> &AdapterConfig {
            &self.config
        }
        async fn check_availability(&self) -> bool {
            true
        }
        async fn send(&self, _prompt: &str) -> Result<ChunkStream> {
            Ok(Box::pin(futures::stream::empty()))
        }
    }

    fn task(task_type: TaskType, complexity: f64) -> Task {
        Task {
            prompt: "p".to_string(),
            task_type,
            complexity,
            keywords: vec![],
            requires_code: task_type == TaskType::Code,
            requires_creativity: false,
            requires_analysis: false,
            suggested_rounds: 3,
            suggested_ai_count: 3,
        }
    }

    fn cloud_pool() -> Vec<Arc<dyn Adapter>> {
        vec![
            NamedAdapter::boxed("claude"),
            NamedAdapter::boxed("codex"),
            NamedAdapter::boxed("gemini"),
        ]
    }

    #[test]
    fn simple_chat_prefers_the_reasoning_adapter() {
        let selector = Selector::default();
        let pool = vec![
            NamedAdapter::boxed("gemini"),
            NamedAdapter::boxed("claude"),
        ];
        let selected = selector.select(&task(TaskType::SimpleChat, 0.1), &pool);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "claude");
    }

    #[test]
    fn simple_chat_falls_back_to_first_available() {
        let selector = Selector::default();
        let pool = vec![NamedAdapter::boxed("gemini"), NamedAdapter::boxed("codex")];
        let selected = selector.select(&task(TaskType::SimpleChat, 0.1), &pool);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].name(), "gemini");
    }

    #[test]
    fn low_complexity_takes_the_single_path() {
        let selector = Selector::default();
        let selected = selector.select(&task(TaskType::General, 0.2), &cloud_pool());
        assert_eq!(selected.len(), 1);
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let selector = Selector::default();
        assert!(selector.select(&task(TaskType::Design, 0.8), &[]).is_empty());
    }

    #[test]
    fn base_set_keeps_fixed_order() {
        let selector = Selector::default();
        // Shuffled input; selection must come out in base-set order.
        let pool = vec![
            NamedAdapter::boxed("gemini"),
            NamedAdapter::boxed("claude"),
            NamedAdapter::boxed("codex"),
        ];
        let selected = selector.select(&task(TaskType::Design, 0.65), &pool);
        let names: Vec<&str> = selected.iter().map(|a| a.name()).collect();
        assert_eq!(names, vec!["claude", "codex", "gemini"]);
    }

    #[test]
    fn local_instances_scale_with_complexity() {
        let selector = Selector::default();
        let mut pool = cloud_pool();
        pool.push(Arc::new(LocalAdapter::new(AdapterConfig::default())));

        let low = selector.select(&task(TaskType::Code, 0.4), &pool);
        assert_eq!(low.len(), 4); // 3 cloud + 1 local

        let mid = selector.select(&task(TaskType::Code, 0.65), &pool);
        assert_eq!(mid.len(), 5);

        let high = selector.select(&task(TaskType::Analysis, 0.9), &pool);
        assert_eq!(high.len(), 6); // analysis profile has three entries
    }

    #[test]
    fn coding_tasks_get_the_coder_instance_first() {
        let selector = Selector::default();
        let mut pool = cloud_pool();
        pool.push(Arc::new(LocalAdapter::new(AdapterConfig::default())));
        let selected = selector.select(&task(TaskType::Code, 0.4), &pool);
        let local = selected.last().expect("local instance");
        assert_eq!(local.display_name(), "Ollama-Coder");
        assert_eq!(
            local.config().model.as_deref(),
            Some("qwen2.5-coder:7b")
        );
    }

    #[test]
    fn ranking_boosts_codex_for_code() {
        let selector = Selector::default();
        let mut rng = StdRng::seed_from_u64(7);
        let ranked = selector.rank(&task(TaskType::Code, 0.8), &cloud_pool(), &mut rng);
        assert_eq!(ranked[0].adapter.name(), "codex");
        assert!(ranked[0].score <= 1.0);
    }

    #[test]
    fn ranking_is_reproducible_with_a_seed() {
        let selector = Selector::default();
        let task = task(TaskType::Research, 0.7);
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let a = selector.rank(&task, &cloud_pool(), &mut rng_a);
        let b = selector.rank(&task, &cloud_pool(), &mut rng_b);
        let names_a: Vec<&str> = a.iter().map(|s| s.adapter.name()).collect();
        let names_b: Vec<&str> = b.iter().map(|s| s.adapter.name()).collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn diversity_guarantees_the_research_adapter_on_big_panels() {
        let selector = Selector::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut pool = cloud_pool();
        pool.push(NamedAdapter::boxed("ollama"));
        // Code task ranks gemini low; a panel of three must still
        // include it.
        let ranked = selector.rank(&task(TaskType::Code, 0.8), &pool, &mut rng);
        let picked = selector.select_with_diversity(ranked, 3);
        assert_eq!(picked.len(), 3);
        assert!(
            picked
                .iter()
                .any(|s| s.adapter.name() == RESEARCH_ADAPTER)
        );
    }

    #[test]
    fn explanation_mentions_every_selected_adapter() {
        let selector = Selector::default();
        let pool = cloud_pool();
        let task = task(TaskType::Design, 0.65);
        let selected = selector.select(&task, &pool);
        let explanation = selector.explanation(&task, &selected);
        assert!(explanation.contains("design"));
        assert!(explanation.contains("claude"));
        assert!(explanation.contains("Selected 3 AIs:"));
    }
}
