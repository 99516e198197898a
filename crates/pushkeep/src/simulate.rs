//! `pushkeep simulate`: one pass through the lifecycle with in-process fakes.

use anyhow::{Result, bail};
use serde::Serialize;

use pushkeep_core::config::Config;
use pushkeep_core::platform_api::PermissionState;
use pushkeep_core::renewal::RenewalOutcome;
use pushkeep_core::sim::{SimOptions, SimWorld};
use pushkeep_core::worker::{EventReport, WorkerEvent};

/// One line of the transcript.
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub step: &'static str,
    pub detail: String,
}

fn step(step: &'static str, detail: impl Into<String>) -> Step {
    Step {
        step,
        detail: detail.into(),
    }
}

pub async fn run(config: &Config, deny: bool) -> Result<Vec<Step>> {
    let mut options = SimOptions {
        permission: if deny {
            PermissionState::Denied
        } else {
            PermissionState::Granted
        },
        defaults: config.notifications.clone(),
        ..SimOptions::default()
    };
    if !config.push.vapid_public_key.is_empty() {
        options.vapid_public_key.clone_from(&config.push.vapid_public_key);
    }
    let mut world = SimWorld::start(options);
    let mut transcript = Vec::new();

    let report = world.flow.enable().await;
    transcript.push(step(
        "enable",
        format!("{} ({})", report.message, report.state),
    ));
    if !report.is_active() {
        return Ok(transcript);
    }
    let stored = world.store.count(&world.collection());
    transcript.push(step("stored", format!("{stored} record(s)")));

    match world.rotate().await? {
        EventReport::Renewal(RenewalOutcome::Renewed {
            endpoint,
            old_removed,
            ..
        }) => transcript.push(step(
            "renewed",
            format!("{endpoint} (old record removed: {old_removed})"),
        )),
        other => bail!("rotation did not renew: {other:?}"),
    }
    for notice in world.drain_page() {
        transcript.push(step("notice", notice.text));
    }

    let payload = br#"{"title":"Budget update","body":"Simulated push","url":"/"}"#.to_vec();
    let EventReport::Shown(id) = world
        .worker
        .request(WorkerEvent::Push {
            data: Some(payload),
        })
        .await?
    else {
        bail!("push was not shown");
    };
    transcript.push(step("shown", format!("notification {}", id.0)));

    let clicked = world
        .worker
        .request(WorkerEvent::NotificationClick { id, url: None })
        .await?;
    transcript.push(step("clicked", format!("{clicked:?}")));
    world.drain_page();

    let removed = world.flow.disable().await?;
    transcript.push(step(
        "disabled",
        removed.unwrap_or_else(|| "nothing to remove".to_string()),
    ));
    let stored = world.store.count(&world.collection());
    transcript.push(step("stored", format!("{stored} record(s)")));

    world.worker_task.abort();
    Ok(transcript)
}
