use async_trait::async_trait;
use capture_agent::processor::DataProcessor;
use capture_agent::scheduler::{ScrapeTarget, Scheduler};
use capture_agent::AgentResult;
use capture_core::{
    BodySource, CaptureResult, CapturedRecord, InterceptRule, NetworkHook, ResponseBuffer,
    ResponsePayload, ScrapeTrigger, TriggerControl, TriggerOutcome,
};
use std::fs;
use tokio::sync::{mpsc, Mutex};
use url::Url;

const ENERGY_PATH: &str = "/solaredge-apigw/api/sites/1047995/layout/energy";

/// Layout response as the monitoring page receives it
const ENERGY_BODY: &str = r#"{
    "201": {"energy": 812.5, "units": "Wh", "unscaledEnergy": 812.5, "moduleEnergy": 812.5, "relayState": null},
    "202": {"energy": 790.0, "units": "Wh", "unscaledEnergy": 790.0, "moduleEnergy": 790.0, "relayState": null}
}"#;

struct LayoutServer;

#[async_trait]
impl BodySource for LayoutServer {
    async fn read_body(&self, _call_id: &str) -> CaptureResult<ResponsePayload> {
        Ok(ResponsePayload::Binary(ENERGY_BODY.as_bytes().to_vec()))
    }
}

/// Monitoring page whose refresh button issues the layout request plus an
/// unrelated analytics call
struct MonitoringPage {
    hook: Mutex<NetworkHook>,
    trigger: ScrapeTrigger,
    calls: Mutex<u32>,
}

impl MonitoringPage {
    fn new() -> Self {
        let buffer = ResponseBuffer::new();
        let rule = InterceptRule::new(["monitoringpublic.solaredge.com"], [ENERGY_PATH]);
        let origin = Url::parse("https://monitoringpublic.solaredge.com/").unwrap();
        Self {
            hook: Mutex::new(NetworkHook::new(rule, buffer.clone()).with_origin(origin)),
            trigger: ScrapeTrigger::new(buffer, "ext-comp-1034-button"),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl TriggerControl for MonitoringPage {
    type Handle = ();

    async fn locate(&self, control_id: &str) -> CaptureResult<Option<()>> {
        Ok((control_id == "ext-comp-1034-button").then_some(()))
    }

    async fn activate(&self, _handle: ()) -> CaptureResult<()> {
        let mut calls = self.calls.lock().await;
        let mut hook = self.hook.lock().await;
        for target in [ENERGY_PATH, "/analytics/ping"] {
            *calls += 1;
            let id = calls.to_string();
            hook.open(&id, "GET", target);
            hook.send(&id)?;
            hook.complete(&id, &LayoutServer).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ScrapeTarget for MonitoringPage {
    async fn trigger(&self) -> AgentResult<TriggerOutcome> {
        Ok(self.trigger.run(self).await?)
    }

    async fn snapshot(&self) -> AgentResult<Vec<CapturedRecord>> {
        Ok(self.hook.lock().await.buffer().snapshot().await)
    }

    async fn refresh(&self) -> AgentResult<()> {
        let mut hook = self.hook.lock().await;
        hook.replace_document(Url::parse("https://monitoringpublic.solaredge.com/").ok());
        hook.buffer().reset().await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_scrape_cycle_lands_in_csv() {
    let dir = tempfile::tempdir().unwrap();
    let (tx, rx) = mpsc::channel(8);
    let processor = DataProcessor::new(dir.path()).spawn(rx);

    let schedule = capture_core::ScheduleConfig {
        min_wait_secs: 1,
        max_wait_secs: 1,
        settle_secs: 5,
        refresh_interval_secs: 600,
    };
    let mut scheduler = Scheduler::new(MonitoringPage::new(), schedule, tx);

    assert_eq!(scheduler.cycle().await.unwrap(), TriggerOutcome::Activated);
    assert_eq!(scheduler.cycle().await.unwrap(), TriggerOutcome::Activated);

    let records = scheduler.target().snapshot().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].url,
        format!("https://monitoringpublic.solaredge.com{}", ENERGY_PATH)
    );

    drop(scheduler);
    processor.await.unwrap();

    let day = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
    let csv = fs::read_to_string(day.join("processed.csv")).unwrap();
    let rows: Vec<&str> = csv.lines().collect();
    // header plus two panels for each of the two passes
    assert_eq!(rows.len(), 5);
    assert!(rows[1].starts_with("201,812.5,Wh,"));
    assert!(fs::read_dir(day.join("dump")).unwrap().count() >= 1);
}
