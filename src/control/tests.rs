#[cfg(test)]
mod tests {
    use crate::config::ExecutiveSettings;
    use crate::control::*;
    use crate::env::codes;
    use crate::sequence::*;
    use crate::task::*;
    use futures::FutureExt;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::sleep;

    type Log = Arc<Mutex<Vec<String>>>;

    fn fast_settings() -> ExecutiveSettings {
        let mut settings = ExecutiveSettings::default();
        settings.engine.poll_interval_ms = 5;
        settings.retry.backoff_ms = 1;
        settings
    }

    fn registry() -> Arc<StaticRegistry> {
        let registry = StaticRegistry::new();
        registry.register("imager", InstrumentCapability::default());
        registry.register("spectrograph", InstrumentCapability::default());
        Arc::new(registry)
    }

    fn context(executives: Arc<dyn ExecutiveFactory>, instruments: Arc<StaticRegistry>) -> ExecutionContext {
        ExecutionContext::new(executives, instruments).with_settings(fast_settings())
    }

    fn slew(name: &str) -> SequenceNode {
        SequenceNode::Slew(SlewNode {
            target: Target {
                name: name.to_string(),
                ra_deg: 10.68,
                dec_deg: 41.27,
            },
        })
    }

    fn config(instrument: &str, config_id: &str) -> SequenceNode {
        SequenceNode::Config(ConfigNode {
            instrument: instrument.to_string(),
            config_id: config_id.to_string(),
            settings: BTreeMap::new(),
        })
    }

    fn expose(instrument: Option<&str>, exposure_ms: u64) -> SequenceNode {
        SequenceNode::Expose(ExposeNode {
            instrument: instrument.map(str::to_string),
            exposure_ms,
            count: 1,
        })
    }

    fn offset(ra_arcsec: f64, dec_arcsec: f64) -> SequenceNode {
        SequenceNode::Offset(OffsetNode {
            ra_arcsec,
            dec_arcsec,
        })
    }

    fn repeat(name: &str, count: u32, children: Vec<SequenceNode>) -> IteratorNode {
        IteratorNode {
            name: name.to_string(),
            condition: IterationCondition::RepeatCount(count),
            children,
        }
    }

    fn position(log: &Log, entry: &str) -> usize {
        log.lock()
            .unwrap()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("missing log entry {entry}"))
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    /// Executives that log their start and end, numbered by creation order
    struct RecordingExecutives {
        log: Log,
        delay: Duration,
        created: AtomicUsize,
    }

    impl RecordingExecutives {
        fn new(log: &Log, delay: Duration) -> Self {
            Self {
                log: log.clone(),
                delay,
                created: AtomicUsize::new(0),
            }
        }

        fn created(&self) -> usize {
            self.created.load(Ordering::SeqCst)
        }
    }

    impl ExecutiveFactory for RecordingExecutives {
        fn create(&self, node: &SequenceNode, tracker: &ChangeTracker) -> Result<TaskRef, ErrorIndicator> {
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let label = format!("{}#{n}", node.label());
            let after = tracker.after(std::slice::from_ref(node)).to_value()?;
            let log = self.log.clone();
            let delay = self.delay;
            Ok(Arc::new(LeafTask::from_fn(label.clone(), move |_cancel| {
                let log = log.clone();
                let label = label.clone();
                let after = after.clone();
                async move {
                    log.lock().unwrap().push(format!("start {label}"));
                    sleep(delay).await;
                    log.lock().unwrap().push(format!("end {label}"));
                    Ok(Some(after))
                }
                .boxed()
            })))
        }
    }

    async fn run_sequence(
        nodes: Vec<SequenceNode>,
        instruments: Arc<StaticRegistry>,
    ) -> (TaskOutcome, Arc<SimulatedExecutives>) {
        let executives = Arc::new(SimulatedExecutives::new(0.0));
        let root = repeat("observation", 1, nodes);
        let task = Arc::new(observe(root, context(executives.clone(), instruments)));
        let outcome = RootManager::new().run(task).await;
        (outcome, executives)
    }

    fn result_tracker(outcome: &TaskOutcome) -> ChangeTracker {
        match outcome {
            TaskOutcome::Done { result: Some(value) } => ChangeTracker::from_value(value).unwrap(),
            other => panic!("expected a done outcome with a result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_repeat_count_runs_iterations_one_after_another() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let executives = Arc::new(RecordingExecutives::new(&log, Duration::from_millis(10)));
        let node = offset(5.0, 0.0);
        let root = repeat("dither", 3, vec![node.clone()]);

        let manager = RootManager::new();
        let outcome = manager
            .run(Arc::new(observe(root, context(executives.clone(), registry()))))
            .await;

        assert!(outcome.is_done(), "{outcome:?}");
        assert_eq!(executives.created(), 3);

        let label = node.label();
        let expected: Vec<String> = (1..=3)
            .flat_map(|n| [format!("start {label}#{n}"), format!("end {label}#{n}")])
            .collect();
        assert_eq!(*log.lock().unwrap(), expected);

        let fractions: Vec<f64> = manager
            .messages()
            .into_iter()
            .filter_map(|(_, message)| match message {
                TaskMessage::Progress { fraction, .. } => Some(fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.len(), 3);
        assert_eq!(fractions.last().copied(), Some(1.0));
    }

    #[tokio::test]
    async fn test_retried_iteration_is_not_counted_twice() {
        let executives = Arc::new(SimulatedExecutives::new(0.0).with_fault(FaultSpec {
            kind: NodeKind::Offset,
            count: 1,
            code: codes::SIMULATED_FAILURE,
        }));
        let root = repeat("dither", 2, vec![offset(5.0, 5.0)]);
        let task = Arc::new(observe(root, context(executives.clone(), registry())));

        let outcome = RootManager::new().run(task.clone()).await;

        assert!(outcome.is_done(), "{outcome:?}");
        assert_eq!(task.with_policy(|p| (p.spawned(), p.completed())), (2, 2));
        assert_eq!(executives.created(NodeKind::Offset), 3);
        assert_eq!(executives.runs(NodeKind::Offset), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_executive_code() {
        let executives = Arc::new(SimulatedExecutives::new(0.0).with_fault(FaultSpec {
            kind: NodeKind::Offset,
            count: 10,
            code: 4200,
        }));
        let mut settings = fast_settings();
        settings.retry.max_attempts = 2;
        let context = ExecutionContext::new(executives.clone(), registry()).with_settings(settings);
        let root = repeat("dither", 3, vec![offset(5.0, 5.0)]);
        let task = Arc::new(observe(root, context));

        let outcome = RootManager::new().run(task.clone()).await;

        assert!(outcome.is_failed());
        assert_eq!(outcome.error().unwrap().code(), 4200);
        assert_eq!(task.with_policy(|p| (p.spawned(), p.completed())), (1, 0));
        assert_eq!(executives.created(NodeKind::Offset), 2);
    }

    #[tokio::test]
    async fn test_skipped_iteration_still_runs_remaining_iterations() {
        let executives = Arc::new(SimulatedExecutives::new(0.0).with_fault(FaultSpec {
            kind: NodeKind::Offset,
            count: 2,
            code: 4250,
        }));
        let mut settings = fast_settings();
        settings.retry.max_attempts = 2;
        settings.retry.on_exhausted = ExhaustedAction::Skip;
        let context = ExecutionContext::new(executives.clone(), registry()).with_settings(settings);
        let root = repeat("dither", 3, vec![offset(5.0, 5.0)]);
        let task = Arc::new(observe(root, context));

        let manager = RootManager::new();
        let outcome = manager.run(task.clone()).await;

        assert!(outcome.is_done(), "{outcome:?}");
        assert_eq!(
            task.with_policy(|p| (p.spawned(), p.completed(), p.skipped())),
            (3, 2, 1)
        );
        // two attempts of the first iteration, one for each of the others
        assert_eq!(executives.runs(NodeKind::Offset), 4);

        let notes: Vec<String> = manager
            .messages()
            .into_iter()
            .filter_map(|(_, message)| match message {
                TaskMessage::Note(note) => Some(note),
                _ => None,
            })
            .collect();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("4250"), "{}", notes[0]);
    }

    #[tokio::test]
    async fn test_failure_code_survives_nesting() {
        let executives = Arc::new(SimulatedExecutives::new(0.0).with_fault(FaultSpec {
            kind: NodeKind::Offset,
            count: 10,
            code: 4300,
        }));
        let mut settings = fast_settings();
        settings.retry.max_attempts = 2;
        let context = ExecutionContext::new(executives.clone(), registry()).with_settings(settings);
        let inner = SequenceNode::Iterator(repeat("inner", 1, vec![offset(1.0, 1.0)]));
        let root = repeat("outer", 1, vec![inner]);

        let outcome = RootManager::new().run(Arc::new(observe(root, context))).await;

        assert!(outcome.is_failed());
        assert_eq!(outcome.error().unwrap().code(), 4300);
        // Two attempts of the inner iteration for each of two outer attempts
        assert_eq!(executives.runs(NodeKind::Offset), 4);
    }

    #[tokio::test]
    async fn test_branch_requires_two_components() {
        for count in [1usize, 3] {
            let branch = BranchNode {
                name: "split".to_string(),
                components: (0..count)
                    .map(|i| repeat(&format!("arm{i}"), 1, vec![offset(1.0, 1.0)]))
                    .collect(),
            };
            let executives = Arc::new(SimulatedExecutives::new(0.0));
            let task = Arc::new(BranchControl::task(
                branch,
                ChangeTracker::new(),
                context(executives.clone(), registry()),
            ));

            let outcome = RootManager::new().run(task.clone()).await;

            assert!(outcome.is_failed());
            let error = outcome.error().unwrap();
            assert_eq!(error.code(), codes::BRANCH_CARDINALITY);
            assert!(error.message().contains(&format!("{count} components")));
            assert_eq!(task.statistics().total_tasks, 0);
            assert_eq!(executives.total_created(), 0);
        }
    }

    #[tokio::test]
    async fn test_branch_components_run_concurrently_and_merge() {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let executives = Arc::new(RecordingExecutives::new(&log, Duration::from_millis(40)));
        let branch = SequenceNode::Branch(BranchNode {
            name: "split".to_string(),
            components: vec![
                repeat("imaging", 1, vec![config("imager", "r-band")]),
                repeat("spectroscopy", 1, vec![config("spectrograph", "low-res")]),
            ],
        });
        let root = repeat("observation", 1, vec![slew("m31"), branch]);

        let outcome = RootManager::new()
            .run(Arc::new(observe(root, context(executives.clone(), registry()))))
            .await;

        assert!(outcome.is_done(), "{outcome:?}");
        assert_eq!(executives.created(), 3);

        let imaging = "config:imager:r-band";
        let spectroscopy = "config:spectrograph:low-res";
        let start_a = log.lock().unwrap().iter().position(|e| e.starts_with(&format!("start {imaging}"))).unwrap();
        let start_b = log.lock().unwrap().iter().position(|e| e.starts_with(&format!("start {spectroscopy}"))).unwrap();
        let end_a = log.lock().unwrap().iter().position(|e| e.starts_with(&format!("end {imaging}"))).unwrap();
        let end_b = log.lock().unwrap().iter().position(|e| e.starts_with(&format!("end {spectroscopy}"))).unwrap();
        assert!(start_a < end_b && start_b < end_a);
        assert!(position(&log, "end slew:m31#1") < start_a.min(start_b));

        let tracker = result_tracker(&outcome);
        assert_eq!(tracker.instrument.as_deref(), Some("imager"));
        assert_eq!(tracker.instrument_configs.get("imager").map(String::as_str), Some("r-band"));
        assert_eq!(
            tracker.instrument_configs.get("spectrograph").map(String::as_str),
            Some("low-res")
        );
        assert_eq!(tracker.target.map(|t| t.name), Some("m31".to_string()));
    }

    #[tokio::test]
    async fn test_generation_publishes_final_tracker() {
        let (outcome, executives) = run_sequence(
            vec![
                slew("m31"),
                config("imager", "r-band"),
                offset(5.0, -5.0),
                expose(None, 100),
            ],
            registry(),
        )
        .await;

        assert!(outcome.is_done(), "{outcome:?}");
        assert_eq!(executives.total_created(), 4);

        let tracker = result_tracker(&outcome);
        assert_eq!(tracker.target.map(|t| t.name), Some("m31".to_string()));
        assert_eq!(tracker.instrument.as_deref(), Some("imager"));
        assert_eq!(tracker.offset, OffsetNode { ra_arcsec: 5.0, dec_arcsec: -5.0 });
    }

    #[tokio::test]
    async fn test_nested_iteration_starts_from_outer_snapshot() {
        let inner = SequenceNode::Iterator(repeat("frames", 2, vec![expose(Some("imager"), 10)]));
        let (outcome, executives) = run_sequence(vec![slew("m31"), inner], registry()).await;

        assert!(outcome.is_done(), "{outcome:?}");
        assert_eq!(executives.created(NodeKind::Slew), 1);
        assert_eq!(executives.created(NodeKind::Expose), 2);
    }

    #[tokio::test]
    async fn test_for_duration_runs_at_least_once() {
        let executives = Arc::new(SimulatedExecutives::new(0.0));
        let root = IteratorNode::new("timed")
            .with_condition(IterationCondition::ForDuration(Duration::ZERO))
            .with_child(offset(1.0, 0.0));
        let task = Arc::new(observe(root, context(executives.clone(), registry())));

        let outcome = RootManager::new().run(task.clone()).await;

        assert!(outcome.is_done());
        assert_eq!(task.with_policy(|p| p.completed()), 1);
        assert_eq!(executives.created(NodeKind::Offset), 1);
    }

    #[tokio::test]
    async fn test_unknown_instrument_fails_before_any_executive() {
        let (outcome, executives) =
            run_sequence(vec![slew("m31"), config("nirspec", "prism")], registry()).await;

        assert!(outcome.is_failed());
        assert_eq!(outcome.error().unwrap().code(), codes::UNKNOWN_INSTRUMENT);
        assert_eq!(executives.total_created(), 0);
    }

    #[tokio::test]
    async fn test_offline_instrument_fails() {
        let instruments = registry();
        instruments.set_status("spectrograph", InstrumentStatus::Offline);

        let (outcome, executives) = run_sequence(
            vec![
                slew("m31"),
                SequenceNode::Calibration(CalibrationNode {
                    instrument: "spectrograph".to_string(),
                    calibration: "arc".to_string(),
                    exposure_ms: 10,
                }),
            ],
            instruments,
        )
        .await;

        assert_eq!(outcome.error().unwrap().code(), codes::INSTRUMENT_OFFLINE);
        assert_eq!(executives.total_created(), 0);
    }

    #[tokio::test]
    async fn test_instrument_without_capability_fails() {
        let instruments = registry();
        instruments.register(
            "guider",
            InstrumentCapability {
                can_expose: false,
                ..Default::default()
            },
        );

        let (outcome, _) =
            run_sequence(vec![slew("m31"), expose(Some("guider"), 10)], instruments).await;

        assert_eq!(outcome.error().unwrap().code(), codes::INSTRUMENT_INCAPABLE);
    }

    #[tokio::test]
    async fn test_exposure_without_target_fails() {
        let (outcome, executives) =
            run_sequence(vec![config("imager", "r-band"), expose(None, 10)], registry()).await;

        assert_eq!(outcome.error().unwrap().code(), codes::NO_TARGET);
        assert_eq!(executives.total_created(), 0);
    }

    #[tokio::test]
    async fn test_abort_reaches_running_executive() {
        let executives = Arc::new(SimulatedExecutives::new(1.0));
        let root = repeat("observation", 1, vec![slew("m31"), expose(Some("imager"), 10)]);
        let task = Arc::new(observe(root, context(executives.clone(), registry())));

        let manager = RootManager::new();
        let runner = manager.clone();
        let as_task: TaskRef = task.clone();
        let handle = tokio::spawn(async move { runner.run(as_task).await });

        wait_until(|| executives.runs(NodeKind::Slew) == 1).await;
        task.abort(ErrorIndicator::new(4100, "weather"));

        let outcome = handle.await.unwrap();
        assert!(outcome.is_aborted(), "{outcome:?}");
        assert_eq!(executives.created(NodeKind::Expose), 1);
        assert_eq!(executives.runs(NodeKind::Expose), 0);
    }
}
