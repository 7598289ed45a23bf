/// End-to-end pipeline tests
///
/// These drive dispatcher → executor → evaluator → sandbox → publisher with
/// in-memory collaborators and a launcher that imitates a tiny Python
/// interpreter by reading the staged files:
/// 1. Accepted / rejected verdicts and outcome order
/// 2. Timeouts, infrastructure failures and unsupported languages
/// 3. Workspace isolation and cleanup
/// 4. Dispatcher resilience to bad payloads and queue failures
///
/// Tests at the bottom need a Docker daemon and are ignored by default.

#[cfg(test)]
mod scenario_tests {
    use crate::config::{ExecutionLimits, LanguageConfigManager};
    use crate::dispatcher::{Dispatcher, QueueError};
    use crate::evaluator::Evaluator;
    use crate::executor::JobExecutor;
    use crate::launcher::{LaunchError, LaunchOutput, LaunchRequest};
    use crate::publisher::ResultPublisher;
    use crate::sandbox::SandboxRunner;
    use crate::test_support::{
        staged_source, stdout_of, FakeLauncher, FakeQueue, MemoryCache, MemoryStore,
    };
    use crate::verdict::EmptyTestPolicy;
    use crate::workspace::WorkspaceManager;
    use judge_common::types::{ErrorKind, JobRequest, TestCase, VerdictStatus};
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Understands `print('<literal>')`, `print(input())` and `time.sleep`.
    fn python_like(request: &LaunchRequest) -> Result<LaunchOutput, LaunchError> {
        let source = staged_source(request, "main.py");
        let input = staged_source(request, "input.txt");

        if source.contains("time.sleep") {
            return Ok(LaunchOutput {
                killed_by_timeout: true,
                duration_ms: request.limits.wall_clock.as_millis() as u64,
                ..Default::default()
            });
        }
        if source.contains("raise") {
            return Ok(LaunchOutput {
                stderr: "Traceback (most recent call last):\nValueError".to_string(),
                exit_code: Some(1),
                ..Default::default()
            });
        }
        if source.contains("print(input())") {
            return Ok(stdout_of(&format!("{}\n", input)));
        }
        if let Some(rest) = source.strip_prefix("print('") {
            let literal = rest.split("')").next().unwrap_or_default();
            return Ok(stdout_of(&format!("{}\n", literal)));
        }
        Ok(stdout_of(""))
    }

    fn job(id: &str, language: &str, code: &[&str], cases: &[(&str, &str)]) -> JobRequest {
        JobRequest {
            job_id: id.to_string(),
            language: language.to_string(),
            code: code.iter().map(|s| s.to_string()).collect(),
            test_cases: cases
                .iter()
                .map(|(input, expected)| TestCase {
                    input: Some(input.to_string()),
                    expected_output: expected.to_string(),
                })
                .collect(),
        }
    }

    fn executor(launcher: Arc<FakeLauncher>, root: &Path, policy: EmptyTestPolicy) -> JobExecutor {
        let runner = SandboxRunner::new(launcher, Arc::new(LanguageConfigManager::builtin()));
        JobExecutor::new(
            WorkspaceManager::new(root).unwrap(),
            Evaluator::new(runner, ExecutionLimits::default()),
            policy,
        )
    }

    fn root_is_empty(root: &Path) -> bool {
        std::fs::read_dir(root).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_hello_world_is_accepted() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);
        let executor = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job("job1", "py", &["print('hi')"], &[("", "hi")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Accepted);
        assert_eq!(verdict.job_id, "job1");
        assert_eq!(verdict.outcomes.len(), 1);
        assert!(verdict.outcomes[0].passed);
        assert_eq!(verdict.outcomes[0].output, "hi");
        assert_eq!(launcher.requests().len(), 1);
        assert!(root_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_sleeping_program_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);
        let executor = executor(launcher, tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job("job1", "py", &["import time", "time.sleep(60)"], &[("", "done")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        let outcome = &verdict.outcomes[0];
        assert!(!outcome.passed);
        assert_eq!(outcome.error_kind, Some(ErrorKind::ExecutionTimeout));
        assert_eq!(outcome.output, "");
    }

    #[tokio::test]
    async fn test_first_passes_second_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);
        let executor = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job("job1", "py", &["print(input())"], &[("1", "1"), ("2", "3")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.outcomes.len(), 2);
        assert!(verdict.outcomes[0].passed);
        assert!(!verdict.outcomes[1].passed);
        assert_eq!(verdict.outcomes[1].output, "2");
        assert_eq!(verdict.outcomes[1].expected, "3");
        // One sandboxed process per test case, strictly in order
        assert_eq!(launcher.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_runtime_error_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = executor(FakeLauncher::new(python_like), tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job("job1", "py", &["raise ValueError()"], &[("", "")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        let outcome = &verdict.outcomes[0];
        assert_eq!(outcome.error_kind, Some(ErrorKind::RuntimeOrCompileError));
        assert!(outcome.stderr.contains("ValueError"));
    }

    #[tokio::test]
    async fn test_unsupported_language_never_launches() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);
        let executor = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job("job1", "ruby", &["puts 'hi'"], &[("", "hi"), ("", "hi")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.outcomes.len(), 2);
        assert!(verdict
            .outcomes
            .iter()
            .all(|o| o.error_kind == Some(ErrorKind::UnsupportedLanguage)));
        assert!(launcher.requests().is_empty());
        assert!(root_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_unsupported_language_without_tests_is_still_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = executor(FakeLauncher::new(python_like), tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor.execute(&job("job1", "ruby", &[], &[])).await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.outcomes[0].error_kind, Some(ErrorKind::UnsupportedLanguage));
    }

    #[tokio::test]
    async fn test_launch_failure_does_not_abort_batch() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(|request| {
            if staged_source(request, "input.txt") == "boom" {
                Err(LaunchError::Unavailable("docker socket closed".to_string()))
            } else {
                python_like(request)
            }
        });
        let executor = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job(
                "job1",
                "py",
                &["print(input())"],
                &[("boom", "boom"), ("ok", "ok")],
            ))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.outcomes[0].error_kind, Some(ErrorKind::InfrastructureError));
        assert!(verdict.outcomes[1].passed);
        assert_eq!(launcher.requests().len(), 2);
        assert!(root_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_empty_test_set_follows_policy() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);

        let accepting = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept);
        let verdict = accepting.execute(&job("job1", "py", &["print('hi')"], &[])).await;
        assert_eq!(verdict.status, VerdictStatus::Accepted);
        assert!(verdict.outcomes.is_empty());

        let rejecting = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Reject);
        let verdict = rejecting.execute(&job("job2", "py", &["print('hi')"], &[])).await;
        assert_eq!(verdict.status, VerdictStatus::Rejected);

        assert!(launcher.requests().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_use_separate_workspaces() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);
        let executor = executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept);

        let job_a = job("jobA", "py", &["print('a')"], &[("", "a")]);
        let job_b = job("jobB", "py", &["print('b')"], &[("", "b")]);
        let (a, b) = tokio::join!(executor.execute(&job_a), executor.execute(&job_b));

        assert_eq!(a.status, VerdictStatus::Accepted);
        assert_eq!(b.status, VerdictStatus::Accepted);

        let requests = launcher.requests();
        assert_eq!(requests.len(), 2);
        assert_ne!(requests[0].mount.host_path, requests[1].mount.host_path);
        assert!(root_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_workspace_unavailable_is_infrastructure_error() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(python_like);
        let runner = SandboxRunner::new(launcher.clone(), Arc::new(LanguageConfigManager::builtin()));
        let workspaces = WorkspaceManager::new(tmp.path()).unwrap();
        let executor = JobExecutor::new(
            workspaces.clone(),
            Evaluator::new(runner, ExecutionLimits::default()),
            EmptyTestPolicy::Accept,
        );

        // Same id already running elsewhere in this worker
        let held = workspaces.acquire("dup").await.unwrap();
        let verdict = executor
            .execute(&job("dup", "py", &["print('hi')"], &[("", "hi")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.outcomes[0].error_kind, Some(ErrorKind::InfrastructureError));
        assert!(launcher.requests().is_empty());
        // The holder's workspace is untouched
        assert!(held.path().is_dir());
    }

    fn dispatcher(
        items: Vec<Result<Option<String>, QueueError>>,
        shutdown: &CancellationToken,
        root: &Path,
        cache: Arc<MemoryCache>,
        store: Arc<MemoryStore>,
    ) -> Dispatcher {
        Dispatcher::new(
            0,
            Box::new(FakeQueue::new(items, shutdown.clone())),
            Arc::new(executor(FakeLauncher::new(python_like), root, EmptyTestPolicy::Accept)),
            Arc::new(ResultPublisher::new(cache, store)),
            Duration::from_millis(10),
        )
    }

    fn payload(job: &JobRequest) -> Option<String> {
        Some(serde_json::to_string(job).unwrap())
    }

    #[tokio::test]
    async fn test_dispatcher_skips_malformed_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let cache = Arc::new(MemoryCache::default());
        let store = Arc::new(MemoryStore::with_records(&["job1"]));

        let valid = job("job1", "py", &["print('hi')"], &[("", "hi")]);
        let dispatcher = dispatcher(
            vec![
                Ok(Some("{not json".to_string())),
                Ok(Some(r#"{"jobId": 7}"#.to_string())),
                Ok(payload(&valid)),
            ],
            &shutdown,
            tmp.path(),
            cache.clone(),
            store.clone(),
        );

        let stats = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(shutdown))
            .await
            .expect("dispatcher should stop once the queue drains");

        assert_eq!(stats.malformed, 2);
        assert_eq!(stats.processed, 1);

        let cached = cache.entries.lock().unwrap().get("job1").cloned().unwrap();
        assert_eq!(cached.status, VerdictStatus::Accepted);
        assert_eq!(store.get("job1").unwrap().status, VerdictStatus::Accepted);
    }

    #[tokio::test]
    async fn test_dispatcher_survives_queue_failures() {
        let tmp = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let cache = Arc::new(MemoryCache::default());
        let store = Arc::new(MemoryStore::with_records(&["job1", "job2"]));

        let dispatcher = dispatcher(
            vec![
                Err(QueueError::Transport("connection reset".to_string())),
                Ok(payload(&job("job1", "py", &["print('x')"], &[("", "y")]))),
                Ok(None),
                Err(QueueError::Transport("connection reset".to_string())),
                Ok(payload(&job("job2", "py", &["print('x')"], &[("", "x")]))),
            ],
            &shutdown,
            tmp.path(),
            cache.clone(),
            store.clone(),
        );

        let stats = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(shutdown))
            .await
            .expect("dispatcher should stop once the queue drains");

        assert_eq!(stats.transport_errors, 2);
        assert_eq!(stats.processed, 2);

        let entries = cache.entries.lock().unwrap();
        assert_eq!(entries["job1"].status, VerdictStatus::Rejected);
        assert_eq!(entries["job2"].status, VerdictStatus::Accepted);
    }

    #[tokio::test]
    async fn test_dispatcher_publishes_even_without_submission_record() {
        let tmp = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let cache = Arc::new(MemoryCache::default());
        let store = Arc::new(MemoryStore::default());

        let dispatcher = dispatcher(
            vec![Ok(payload(&job("orphan", "py", &["print('hi')"], &[("", "hi")])))],
            &shutdown,
            tmp.path(),
            cache.clone(),
            store.clone(),
        );

        let stats = dispatcher.run(shutdown).await;

        assert_eq!(stats.processed, 1);
        assert!(cache.entries.lock().unwrap().contains_key("orphan"));
        assert!(store.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dispatcher_stops_when_cancelled_while_idle() {
        let tmp = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let dispatcher = dispatcher(
            vec![Ok(payload(&job("never", "py", &["print('hi')"], &[("", "hi")])))],
            &shutdown,
            tmp.path(),
            Arc::new(MemoryCache::default()),
            Arc::new(MemoryStore::default()),
        );

        let stats = dispatcher.run(shutdown).await;
        assert_eq!(stats.processed, 0);
    }

    #[tokio::test]
    async fn test_shutdown_mid_job_still_finishes_and_publishes() {
        let tmp = tempfile::tempdir().unwrap();
        let shutdown = CancellationToken::new();
        let cache = Arc::new(MemoryCache::default());
        let store = Arc::new(MemoryStore::with_records(&["job1"]));

        // Shutdown arrives while the first test case is running
        let signal = shutdown.clone();
        let launcher = FakeLauncher::new(move |request| {
            signal.cancel();
            python_like(request)
        });

        let job = job("job1", "py", &["print(input())"], &[("1", "1"), ("2", "2")]);
        let dispatcher = Dispatcher::new(
            0,
            Box::new(FakeQueue::new(vec![Ok(payload(&job))], shutdown.clone())),
            Arc::new(executor(launcher.clone(), tmp.path(), EmptyTestPolicy::Accept)),
            Arc::new(ResultPublisher::new(cache.clone(), store.clone())),
            Duration::from_millis(10),
        );

        let stats = tokio::time::timeout(Duration::from_secs(5), dispatcher.run(shutdown))
            .await
            .expect("dispatcher should stop after the in-flight job");

        assert_eq!(stats.processed, 1);
        assert_eq!(launcher.requests().len(), 2);

        let cached = cache.entries.lock().unwrap().get("job1").cloned().unwrap();
        assert_eq!(cached.status, VerdictStatus::Accepted);
        assert_eq!(cached.results.len(), 2);
        assert_eq!(store.get("job1").unwrap().status, VerdictStatus::Accepted);
        assert!(root_is_empty(tmp.path()));
    }

    #[tokio::test]
    async fn test_flooding_output_is_a_runtime_error() {
        let tmp = tempfile::tempdir().unwrap();
        let launcher = FakeLauncher::new(|_| {
            Ok(LaunchOutput {
                stdout: "y\n".repeat(1024),
                exit_code: Some(137),
                output_truncated: true,
                ..Default::default()
            })
        });
        let executor = executor(launcher, tmp.path(), EmptyTestPolicy::Accept);

        let verdict = executor
            .execute(&job("job1", "py", &["while True: print('y')"], &[("", "y")]))
            .await;

        assert_eq!(verdict.status, VerdictStatus::Rejected);
        let outcome = &verdict.outcomes[0];
        assert_eq!(outcome.error_kind, Some(ErrorKind::RuntimeOrCompileError));
        assert_eq!(outcome.error.as_deref(), Some("Output limit exceeded"));
    }
}

#[cfg(test)]
mod docker_tests {
    use crate::config::{ExecutionLimits, LanguageConfigManager};
    use crate::evaluator::Evaluator;
    use crate::executor::JobExecutor;
    use crate::launcher::DockerLauncher;
    use crate::sandbox::SandboxRunner;
    use crate::verdict::EmptyTestPolicy;
    use crate::workspace::WorkspaceManager;
    use judge_common::types::{ErrorKind, JobRequest, TestCase, VerdictStatus};
    use std::sync::Arc;
    use std::time::Duration;

    fn docker_executor(root: &std::path::Path, limits: ExecutionLimits) -> JobExecutor {
        let launcher = Arc::new(DockerLauncher::connect().expect("Failed to connect to Docker"));
        let runner = SandboxRunner::new(launcher, Arc::new(LanguageConfigManager::builtin()));
        JobExecutor::new(
            WorkspaceManager::new(root).unwrap(),
            Evaluator::new(runner, limits),
            EmptyTestPolicy::Accept,
        )
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_python_hello() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = docker_executor(tmp.path(), ExecutionLimits::default());

        let job = JobRequest {
            job_id: "docker-hello".to_string(),
            language: "py".to_string(),
            code: vec!["print('hi')".to_string()],
            test_cases: vec![TestCase {
                input: Some(String::new()),
                expected_output: "hi".to_string(),
            }],
        };

        let verdict = executor.execute(&job).await;
        assert_eq!(verdict.status, VerdictStatus::Accepted);
        assert_eq!(verdict.outcomes[0].output, "hi");
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_cpp_reads_stdin() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = docker_executor(
            tmp.path(),
            ExecutionLimits {
                wall_clock: Duration::from_secs(60),
                ..Default::default()
            },
        );

        let job = JobRequest {
            job_id: "docker-cpp".to_string(),
            language: "cpp".to_string(),
            code: vec![
                "#include <iostream>".to_string(),
                "int main() { int a, b; std::cin >> a >> b; std::cout << a + b << std::endl; }"
                    .to_string(),
            ],
            test_cases: vec![
                TestCase {
                    input: Some("1 2".to_string()),
                    expected_output: "3".to_string(),
                },
                TestCase {
                    input: Some("5 5".to_string()),
                    expected_output: "11".to_string(),
                },
            ],
        };

        let verdict = executor.execute(&job).await;
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert!(verdict.outcomes[0].passed);
        assert!(!verdict.outcomes[1].passed);
    }

    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_python_timeout() {
        let tmp = tempfile::tempdir().unwrap();
        let executor = docker_executor(
            tmp.path(),
            ExecutionLimits {
                run_timeout: Duration::from_secs(1),
                ..Default::default()
            },
        );

        let job = JobRequest {
            job_id: "docker-sleep".to_string(),
            language: "py".to_string(),
            code: vec!["import time".to_string(), "time.sleep(30)".to_string()],
            test_cases: vec![TestCase {
                input: None,
                expected_output: "done".to_string(),
            }],
        };

        let verdict = executor.execute(&job).await;
        assert_eq!(verdict.status, VerdictStatus::Rejected);
        assert_eq!(verdict.outcomes[0].error_kind, Some(ErrorKind::ExecutionTimeout));
        assert_eq!(verdict.outcomes[0].output, "");
    }
}
