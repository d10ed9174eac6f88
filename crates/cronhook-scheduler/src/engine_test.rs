use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cronhook_core::{FireAt, HttpMethod, QueueKind};
use serde_json::json;

use super::*;
use crate::http::{HttpRequest, HttpResponse};
use crate::job::DispatchView;
use crate::queue::{PublishReceipt, QueueMessage};

// Jan 1st at midnight: never reached while a test runs.
const FAR_CRON: &str = "0 0 1 1 *";

#[derive(Default)]
struct FakeHttp {
    requests: Mutex<Vec<HttpRequest>>,
    fail_with: Option<u16>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeHttp {
    fn ok() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            fail_with: Some(status),
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpDispatcher for FakeHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, DispatchError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(current, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.fail_with {
            Some(status) => Err(DispatchError::Http {
                status,
                reason: "Not Found".to_string(),
                body: json!({ "error": "missing" }),
            }),
            None => Ok(HttpResponse {
                status: 200,
                body: json!({ "ok": true }),
            }),
        }
    }
}

#[derive(Default)]
struct FakeQueue {
    messages: Mutex<Vec<QueueMessage>>,
}

#[async_trait]
impl QueuePublisher for FakeQueue {
    async fn publish(&self, message: QueueMessage) -> Result<PublishReceipt, DispatchError> {
        let mut messages = self.messages.lock().unwrap();
        messages.push(message);
        Ok(PublishReceipt {
            message_id: format!("msg-{}", messages.len()),
        })
    }
}

async fn scheduler_with(http: Arc<FakeHttp>, queue: Option<Arc<FakeQueue>>) -> Scheduler {
    let queue = queue.map(|queue| queue as Arc<dyn QueuePublisher>);
    Scheduler::new(SchedulerSettings::default(), http, queue)
        .await
        .unwrap()
}

fn http_job(name: &str, repetitions: Option<i64>) -> JobDescriptor {
    JobDescriptor {
        name: name.to_string(),
        cron: Some(FAR_CRON.to_string()),
        repetitions,
        url: Some("https://status.example/ping".to_string()),
        method: Some(HttpMethod::Get),
        ..JobDescriptor::default()
    }
}

fn queue_job(name: &str) -> JobDescriptor {
    JobDescriptor {
        name: name.to_string(),
        cron: Some(FAR_CRON.to_string()),
        queue_url: Some(format!("https://sqs.sa-east-1.amazonaws.com/1/{name}")),
        queue_kind: Some(QueueKind::Standard),
        body: Some(json!({ "kind": "digest" })),
        ..JobDescriptor::default()
    }
}

/// Run one trigger for the handle's job as if its clock had fired.
async fn trigger(handle: &JobHandle) {
    let entry = Arc::clone(&handle.entry);
    let generation = entry.generation();
    handle.scheduler.clone().fire(entry, generation).await;
}

fn counter() -> (Arc<AtomicUsize>, Hook) {
    let count = Arc::new(AtomicUsize::new(0));
    let hook_count = Arc::clone(&count);
    let hook: Hook = Arc::new(move |_name: &str| {
        hook_count.fetch_add(1, Ordering::SeqCst);
    });
    (count, hook)
}

#[tokio::test]
async fn create_job_starts_it() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    let view = scheduler.create_job(&http_job("ping", Some(3))).await.unwrap();

    assert_eq!(view.state, JobState::Running);
    assert_eq!(view.remaining_repetitions, Some(3));
    assert!(view.next_run_at.is_some());
    assert_eq!(scheduler.list_running_jobs().len(), 1);
}

#[tokio::test]
async fn constructed_job_is_created_but_not_running() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    let handle = scheduler.construct(&http_job("ping", None)).unwrap();

    assert_eq!(handle.view().state, JobState::Created);
    assert_eq!(scheduler.list_created_jobs().len(), 1);
    assert!(scheduler.list_running_jobs().is_empty());

    handle.start().await.unwrap();
    assert!(handle.start().await.unwrap_err().is_validation());
    assert_eq!(scheduler.list_running_jobs().len(), 1);
}

#[tokio::test]
async fn duplicate_name_leaves_first_job_untouched() {
    let queue = Arc::new(FakeQueue::default());
    let scheduler = scheduler_with(FakeHttp::ok(), Some(queue)).await;
    let first = scheduler.create_job(&http_job("ping", Some(3))).await.unwrap();

    let err = scheduler.create_job(&queue_job("ping")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateName { ref name } if name == "ping"));

    let jobs = scheduler.list_running_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Http);
    assert_eq!(jobs[0].next_run_at, first.next_run_at);
}

#[tokio::test]
async fn repetitions_run_out_and_stop_the_job() {
    let http = FakeHttp::ok();
    let scheduler = scheduler_with(Arc::clone(&http), None).await;
    let handle = scheduler.construct(&http_job("ping", Some(3))).unwrap();
    handle.start().await.unwrap();

    for _ in 0..3 {
        trigger(&handle).await;
    }

    let view = handle.view();
    assert_eq!(view.state, JobState::Stopped);
    assert_eq!(view.execution_times, 3);
    assert_eq!(view.remaining_repetitions, Some(0));
    assert!(scheduler.list_running_jobs().is_empty());

    trigger(&handle).await;
    assert_eq!(http.calls(), 3);
    assert_eq!(handle.view().execution_times, 3);
}

#[tokio::test]
async fn rejected_repetitions_edit_keeps_schedule() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    let handle = scheduler.construct(&http_job("ping", Some(5))).unwrap();
    handle.start().await.unwrap();
    trigger(&handle).await;
    trigger(&handle).await;
    let before = handle.view();

    let edit = JobEdit {
        repetitions: Some(2),
        ..JobEdit::default()
    };
    let err = scheduler.edit_job("ping", &edit).await.unwrap_err();
    assert!(err.is_validation());

    let after = handle.view();
    assert_eq!(after.state, JobState::Running);
    assert_eq!(after.repetitions, Some(5));
    assert_eq!(after.remaining_repetitions, Some(3));
    assert_eq!(after.next_run_at, before.next_run_at);
}

#[tokio::test]
async fn cron_edit_replaces_the_clock() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    let handle = scheduler.construct(&http_job("ping", None)).unwrap();
    handle.start().await.unwrap();
    let generation = handle.entry.generation();

    let edit = JobEdit {
        cron: Some("0 17 * * *".to_string()),
        ..JobEdit::default()
    };
    let view = scheduler.edit_job("ping", &edit).await.unwrap();

    assert_eq!(view.cron.as_deref(), Some("0 17 * * *"));
    assert!(view.next_run_at.unwrap().contains("T17:00:00-03:00"));
    assert_eq!(handle.entry.generation(), generation + 1);
    assert!(matches!(
        handle.entry.replace_clock(None),
        Some(Clock::Cron(_))
    ));
}

#[tokio::test]
async fn renames_are_checked_against_other_jobs() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    scheduler.create_job(&http_job("a", None)).await.unwrap();
    scheduler.create_job(&http_job("b", None)).await.unwrap();

    let onto_b = JobEdit {
        name: Some("b".to_string()),
        ..JobEdit::default()
    };
    let err = scheduler.edit_job("a", &onto_b).await.unwrap_err();
    assert!(matches!(err, SchedulerError::DuplicateName { .. }));

    let to_c = JobEdit {
        name: Some("c".to_string()),
        ..JobEdit::default()
    };
    scheduler.edit_job("a", &to_c).await.unwrap();
    assert!(matches!(
        scheduler.get_job_by_name("a"),
        Err(SchedulerError::NotFound { .. })
    ));
    assert_eq!(scheduler.get_job_by_name("c").unwrap().name, "c");
}

#[tokio::test]
async fn editing_unknown_job_is_not_found() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    let err = scheduler
        .edit_job("ghost", &JobEdit::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::NotFound { ref name } if name == "ghost"));
}

#[tokio::test]
async fn stop_is_idempotent_and_frees_the_name() {
    let (stops, on_stop) = counter();
    let hooks = JobHooks {
        on_start: None,
        on_stop: Some(on_stop),
    };
    let scheduler = Scheduler::with_hooks(SchedulerSettings::default(), FakeHttp::ok(), None, hooks)
        .await
        .unwrap();
    let handle = scheduler.construct(&http_job("ping", None)).unwrap();
    handle.start().await.unwrap();

    handle.stop().await;
    handle.stop().await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);
    assert!(matches!(
        scheduler.stop_job("ping").await,
        Err(SchedulerError::NotFound { .. })
    ));

    scheduler.create_job(&http_job("ping", None)).await.unwrap();
}

#[tokio::test]
async fn hooks_fire_once_per_transition() {
    let (starts, on_start) = counter();
    let (stops, on_stop) = counter();
    let hooks = JobHooks {
        on_start: Some(on_start),
        on_stop: Some(on_stop),
    };
    let scheduler = Scheduler::with_hooks(SchedulerSettings::default(), FakeHttp::ok(), None, hooks)
        .await
        .unwrap();

    scheduler.create_job(&http_job("a", Some(1))).await.unwrap();
    scheduler.create_job(&http_job("b", None)).await.unwrap();
    assert_eq!(starts.load(Ordering::SeqCst), 2);

    trigger(&scheduler.job_handle("a").unwrap()).await;
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    scheduler.shutdown().await.unwrap();
    assert_eq!(stops.load(Ordering::SeqCst), 2);
    assert!(scheduler.list_created_jobs().is_empty());
}

#[tokio::test]
async fn one_shot_fires_exactly_once() {
    let http = FakeHttp::ok();
    let scheduler = scheduler_with(Arc::clone(&http), None).await;
    let desc = JobDescriptor {
        name: "once".to_string(),
        timer: Some(FireAt::Delay(50)),
        url: Some("https://status.example/once".to_string()),
        method: Some(HttpMethod::Post),
        ..JobDescriptor::default()
    };
    let handle = scheduler.construct(&desc).unwrap();
    handle.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(400)).await;

    assert_eq!(http.calls(), 1);
    let view = handle.view();
    assert_eq!(view.state, JobState::Stopped);
    assert_eq!(view.execution_times, 1);
    assert!(scheduler.get_job_by_name("once").is_err());
}

#[tokio::test]
async fn queue_job_needs_a_publisher() {
    let scheduler = scheduler_with(FakeHttp::ok(), None).await;
    let err = scheduler.construct(&queue_job("digests")).unwrap_err();
    assert!(err.to_string().contains("queue dispatch is not configured"));
}

#[tokio::test]
async fn queue_trigger_publishes_the_body() {
    let queue = Arc::new(FakeQueue::default());
    let scheduler = scheduler_with(FakeHttp::ok(), Some(Arc::clone(&queue))).await;
    let handle = scheduler.construct(&queue_job("digests")).unwrap();
    handle.start().await.unwrap();

    trigger(&handle).await;

    let messages = queue.messages.lock().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].queue_url,
        "https://sqs.sa-east-1.amazonaws.com/1/digests"
    );
    assert_eq!(messages[0].body, r#"{"kind":"digest"}"#);
}

#[tokio::test]
async fn failed_dispatch_keeps_the_job_running() {
    let scheduler = scheduler_with(FakeHttp::failing(404), None).await;
    let handle = scheduler.construct(&http_job("ping", None)).unwrap();
    handle.start().await.unwrap();

    trigger(&handle).await;

    let view = handle.view();
    assert_eq!(view.state, JobState::Running);
    match view.dispatch {
        DispatchView::Http(http) => {
            let last = http.last_response.unwrap();
            assert_eq!(last.status, 404);
            assert_eq!(last.body, json!({ "error": "missing" }));
        }
        DispatchView::Queue(_) => panic!("expected an HTTP job"),
    }
}

#[tokio::test]
async fn overlapping_triggers_both_dispatch() {
    let http = FakeHttp::slow(Duration::from_millis(100));
    let scheduler = scheduler_with(Arc::clone(&http), None).await;
    let handle = scheduler.construct(&http_job("slow", None)).unwrap();
    handle.start().await.unwrap();

    tokio::join!(trigger(&handle), trigger(&handle));

    assert_eq!(http.calls(), 2);
    assert_eq!(http.peak.load(Ordering::SeqCst), 2);
    assert_eq!(handle.view().execution_times, 2);
}

#[tokio::test]
async fn stop_lets_in_flight_dispatch_finish() {
    let http = FakeHttp::slow(Duration::from_millis(100));
    let scheduler = scheduler_with(Arc::clone(&http), None).await;
    let handle = scheduler.construct(&http_job("slow", None)).unwrap();
    handle.start().await.unwrap();

    let in_flight = {
        let handle = handle.clone();
        tokio::spawn(async move { trigger(&handle).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.stop().await;
    in_flight.await.unwrap();

    let view = handle.view();
    assert_eq!(view.state, JobState::Stopped);
    match view.dispatch {
        DispatchView::Http(http) => assert_eq!(http.last_response.unwrap().status, 200),
        DispatchView::Queue(_) => panic!("expected an HTTP job"),
    }
}

#[tokio::test]
async fn similar_jobs_list_http_before_queue() {
    let queue = Arc::new(FakeQueue::default());
    let scheduler = scheduler_with(FakeHttp::ok(), Some(queue)).await;
    scheduler.create_job(&queue_job("daily-sync-queue")).await.unwrap();
    scheduler.create_job(&http_job("daily-sync-task", None)).await.unwrap();

    let criteria = SearchCriteria {
        name: Some("daily-sync".to_string()),
        ..SearchCriteria::default()
    };
    let names: Vec<String> = scheduler
        .find_similar_jobs(&criteria)
        .into_iter()
        .map(|job| job.name)
        .collect();
    assert_eq!(names, vec!["daily-sync-task", "daily-sync-queue"]);
}

#[tokio::test]
async fn most_similar_can_be_restricted_to_a_variant() {
    let queue = Arc::new(FakeQueue::default());
    let scheduler = scheduler_with(FakeHttp::ok(), Some(queue)).await;
    scheduler.create_job(&queue_job("ping-queue")).await.unwrap();
    scheduler.create_job(&http_job("pong-https", None)).await.unwrap();

    assert_eq!(
        scheduler.find_most_similar("ping", None).unwrap().name,
        "ping-queue"
    );
    assert_eq!(
        scheduler
            .find_most_similar("ping", Some(JobKind::Http))
            .unwrap()
            .name,
        "pong-https"
    );
}

#[test]
fn settings_attach_configured_headers_to_base_clients() {
    let config = AppConfig {
        env: cronhook_core::Environment::Test,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "info".to_string(),
        timezone: cronhook_core::DEFAULT_TIMEZONE,
        similarity_threshold: 4,
        http_timeout_secs: 5,
        http_user_agent: "cronhook-test".to_string(),
        http_base_clients: BTreeMap::from([(
            "crm".to_string(),
            "https://crm.internal/api".to_string(),
        )]),
        http_base_client_headers: BTreeMap::from([(
            "crm".to_string(),
            BTreeMap::from([("x-api-key".to_string(), "k".to_string())]),
        )]),
        jobs_path: None,
        sqs: None,
    };

    let settings = SchedulerSettings::from_app_config(&config).unwrap();
    assert_eq!(settings.similarity_threshold, 4);
    let crm = &settings.base_clients["crm"];
    assert_eq!(crm.base_url.as_str(), "https://crm.internal/api");
    assert_eq!(crm.headers["x-api-key"], "k");
}
