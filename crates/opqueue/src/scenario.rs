//! Turn a scenario configuration into queue options and tasks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use tracing::debug;

use opqueue_core::config::{resolve_config, Config, FailurePolicyConfig, PriorityConfig, TaskSpec};
use opqueue_tasks::{BoxError, FailurePolicy, QueueOptions, Task, TaskPriority};

/// Queue options plus the tasks to submit, in submission order
pub struct Scenario {
    pub options: QueueOptions,
    pub tasks: Vec<Task>,
}

impl Scenario {
    /// Resolve the configuration (explicit path or search from `dir`) and build from it
    pub fn load(
        explicit: Option<&Path>,
        dir: &Path,
        concurrency: Option<usize>,
    ) -> anyhow::Result<(Self, PathBuf)> {
        let (config, path) = resolve_config(explicit, dir)?;
        let scenario = Self::from_config(&config, concurrency)
            .with_context(|| format!("building scenario from {}", path.display()))?;
        Ok((scenario, path))
    }

    /// Build tasks and wire their dependencies.
    ///
    /// Tasks marked `cancel` are cancelled here, before submission.
    pub fn from_config(config: &Config, concurrency: Option<usize>) -> anyhow::Result<Self> {
        let options = QueueOptions::new(&config.queue.name, config.concurrency(concurrency))
            .with_failure_policy(failure_policy(config.queue.failure_policy));

        let tasks: Vec<Task> = config.tasks.iter().map(build_task).collect();
        let by_name: HashMap<&str, &Task> = config
            .tasks
            .iter()
            .map(|spec| spec.name.as_str())
            .zip(tasks.iter())
            .collect();

        for (spec, task) in config.tasks.iter().zip(&tasks) {
            for dep in &spec.depends_on {
                let dep_task = by_name
                    .get(dep.as_str())
                    .with_context(|| format!("task '{}' depends on unknown task '{}'", spec.name, dep))?;
                task.add_dependency(dep_task)
                    .with_context(|| format!("wiring dependencies of '{}'", spec.name))?;
            }
        }

        for (spec, task) in config.tasks.iter().zip(&tasks) {
            if spec.cancel {
                task.cancel();
            }
        }

        debug!(queue = %options.name, tasks = tasks.len(), "scenario built");
        Ok(Self { options, tasks })
    }

    /// Look up a task by name
    #[cfg(test)]
    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.name() == name)
    }
}

fn failure_policy(policy: FailurePolicyConfig) -> FailurePolicy {
    match policy {
        FailurePolicyConfig::RunDependents => FailurePolicy::RunDependents,
        FailurePolicyConfig::CancelDependents => FailurePolicy::CancelDependents,
    }
}

fn priority(priority: PriorityConfig) -> TaskPriority {
    match priority {
        PriorityConfig::VeryLow => TaskPriority::VeryLow,
        PriorityConfig::Low => TaskPriority::Low,
        PriorityConfig::Normal => TaskPriority::Normal,
        PriorityConfig::High => TaskPriority::High,
        PriorityConfig::VeryHigh => TaskPriority::VeryHigh,
    }
}

/// A simulated unit of work: sleeps, stops early on cancellation, optionally fails
fn build_task(spec: &TaskSpec) -> Task {
    let duration = Duration::from_millis(spec.duration_ms);
    let fail = spec.fail;
    let name = spec.name.clone();

    Task::new(&spec.name, move |ctx| async move {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = ctx.cancelled() => {
                debug!(task = %ctx.id(), "stopping early after cancellation");
                return Ok(());
            }
        }
        if fail {
            return Err(BoxError::from(format!("{} reported failure", name)));
        }
        Ok(())
    })
    .with_priority(priority(spec.priority))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use opqueue_core::config::{QueueConfig, TaskSpec};
    use opqueue_tasks::{CollectingReporter, OperationQueue, TaskState};

    fn config(tasks: Vec<TaskSpec>) -> Config {
        Config {
            queue: QueueConfig {
                name: "com.example.scenario".to_string(),
                max_concurrency: 2,
                failure_policy: FailurePolicyConfig::RunDependents,
            },
            tasks,
        }
    }

    #[test]
    fn test_from_config_wires_dependencies() {
        let cfg = config(vec![
            TaskSpec::new("fetch"),
            TaskSpec::new("parse").with_depends_on("fetch"),
            TaskSpec::new("report")
                .with_depends_on("parse")
                .with_priority(PriorityConfig::High),
        ]);
        let scenario = Scenario::from_config(&cfg, None).unwrap();

        assert_eq!(scenario.options.name, "com.example.scenario");
        assert_eq!(scenario.options.max_concurrency, 2);
        assert_eq!(scenario.tasks.len(), 3);

        let fetch = scenario.task("fetch").unwrap();
        let parse = scenario.task("parse").unwrap();
        let report = scenario.task("report").unwrap();
        assert_eq!(parse.dependency_ids(), vec![fetch.id()]);
        assert_eq!(report.priority(), TaskPriority::High);
    }

    #[test]
    fn test_concurrency_override_and_policy() {
        let mut cfg = config(vec![TaskSpec::new("a")]);
        cfg.queue.failure_policy = FailurePolicyConfig::CancelDependents;
        let scenario = Scenario::from_config(&cfg, Some(7)).unwrap();

        assert_eq!(scenario.options.max_concurrency, 7);
        assert_eq!(scenario.options.failure_policy, FailurePolicy::CancelDependents);
    }

    #[test]
    fn test_cycle_in_config_rejected() {
        let cfg = config(vec![
            TaskSpec::new("a").with_depends_on("b"),
            TaskSpec::new("b").with_depends_on("a"),
        ]);
        let err = Scenario::from_config(&cfg, None).err().unwrap();
        assert!(format!("{:#}", err).contains("cycle"));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("opqueue.yaml"),
            "queue:\n  name: com.example.load\ntasks:\n  - name: a\n  - name: b\n    depends_on: [a]\n",
        )
        .unwrap();

        let (scenario, path) = Scenario::load(None, dir.path(), Some(1)).unwrap();
        assert_eq!(path, dir.path().join("opqueue.yaml"));
        assert_eq!(scenario.options.max_concurrency, 1);
        assert_eq!(scenario.tasks.len(), 2);
    }

    #[test]
    fn test_load_missing_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(Scenario::load(Some(&missing), dir.path(), None).is_err());
    }

    #[test]
    fn test_cancelled_task_marked_before_submission() {
        let mut spec = TaskSpec::new("skip-me");
        spec.cancel = true;
        let scenario = Scenario::from_config(&config(vec![spec]), None).unwrap();
        assert!(scenario.tasks[0].is_cancelled());
    }

    #[tokio::test]
    async fn test_scenario_runs_to_completion() {
        let mut failing = TaskSpec::new("compile").with_duration_ms(5);
        failing.fail = true;
        let mut cancelled = TaskSpec::new("deploy").with_duration_ms(5);
        cancelled.cancel = true;
        let cfg = config(vec![
            failing,
            TaskSpec::new("package")
                .with_duration_ms(5)
                .with_depends_on("compile"),
            cancelled,
        ]);

        let scenario = Scenario::from_config(&cfg, None).unwrap();
        let queue = OperationQueue::new(
            scenario.options.clone(),
            Arc::new(CollectingReporter::default()),
        )
        .unwrap();
        queue.submit(scenario.tasks.clone(), true).await.unwrap();

        assert!(matches!(
            scenario.task("compile").unwrap().state(),
            TaskState::Failed(_)
        ));
        assert_eq!(
            scenario.task("package").unwrap().state(),
            TaskState::Completed
        );
        assert_eq!(
            scenario.task("deploy").unwrap().state(),
            TaskState::Cancelled
        );
    }
}
