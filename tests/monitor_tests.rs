mod test_harness;

use std::time::Duration;

use dockmaster::agent::endpoint::AgentCallError;
use dockmaster::agent::registry::AgentStatus;
use dockmaster::monitor::CprOutcome;
use dockmaster::scheduler::job::JobStatus;
use test_harness::{
    assert_eventually, descriptor, pulse, small_spec, test_scheduler, FakeConnector,
};
use tokio_util::sync::CancellationToken;

const URL_A: &str = "http://10.0.0.1:9000";
const URL_B: &str = "http://10.0.0.2:9000";

fn down() -> AgentCallError {
    AgentCallError::Unreachable("connection refused".to_string())
}

#[tokio::test]
async fn test_heartbeat_updates_usage_and_job_status() {
    let connector = FakeConnector::new();
    let agent = connector.add(URL_A);
    let scheduler = test_scheduler(connector);

    let agent_id = scheduler.register_agent(descriptor(URL_A)).await.unwrap();
    let job_id = scheduler.submit_job(small_spec("alpine")).await.unwrap();
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Deploying);

    agent.set_pulse(pulse(0.4, 0.6, vec![(job_id, JobStatus::Running, 2)]));
    scheduler.monitor().poll_cycle().await;

    let record = scheduler.agents().get(&agent_id).await.unwrap();
    assert_eq!(record.cpu_usage, 0.4);
    assert_eq!(record.memory_usage, 0.6);

    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.restart_count, 2);
}

#[tokio::test]
async fn test_agent_revived_on_third_recovery_attempt() {
    let connector = FakeConnector::new();
    let agent = connector.add(URL_A);
    let scheduler = test_scheduler(connector);
    let agent_id = scheduler.register_agent(descriptor(URL_A)).await.unwrap();

    // Failed poll, two failed recovery attempts, then an answer
    agent.script_heartbeats(vec![
        Err(down()),
        Err(down()),
        Err(down()),
        Ok(pulse(0.3, 0.3, vec![])),
    ]);

    let monitor = scheduler.monitor();
    monitor.poll_cycle().await;
    assert_eq!(
        scheduler.agents().get(&agent_id).await.unwrap().status,
        AgentStatus::Icu
    );

    monitor.wait_for_recoveries().await;
    let record = scheduler.agents().get(&agent_id).await.unwrap();
    assert_eq!(record.status, AgentStatus::Alive);
    assert_eq!(record.memory_usage, 0.3);
    assert_eq!(agent.heartbeat_calls(), 4);
}

#[tokio::test]
async fn test_resuscitate_reports_attempt_number() {
    let connector = FakeConnector::new();
    let agent = connector.add(URL_A);
    let scheduler = test_scheduler(connector);
    let agent_id = scheduler.register_agent(descriptor(URL_A)).await.unwrap();
    let endpoint = scheduler.agents().get(&agent_id).await.unwrap().endpoint;

    agent.script_heartbeats(vec![Err(down()), Ok(pulse(0.1, 0.1, vec![]))]);
    let outcome = scheduler.monitor().resuscitate(agent_id, endpoint).await;
    assert_eq!(outcome, CprOutcome::Revived { attempt: 2 });
}

#[tokio::test]
async fn test_icu_agent_is_not_polled_or_resuscitated_twice() {
    let connector = FakeConnector::new();
    let agent = connector.add(URL_A);
    let scheduler = test_scheduler(connector);
    let agent_id = scheduler.register_agent(descriptor(URL_A)).await.unwrap();

    agent.set_down(true);
    let monitor = scheduler.monitor();
    monitor.poll_cycle().await;
    monitor.poll_cycle().await;

    // The second cycle skipped the icu agent
    assert_eq!(monitor.recoveries_in_progress(), 1);
    monitor.wait_for_recoveries().await;
    assert_eq!(
        scheduler.agents().get(&agent_id).await.unwrap().status,
        AgentStatus::Dead
    );
    // One failed poll plus three recovery attempts
    assert_eq!(agent.heartbeat_calls(), 4);
}

#[tokio::test]
async fn test_dead_agent_jobs_move_to_survivor() {
    let connector = FakeConnector::new();
    let doomed = connector.add(URL_A);
    let survivor = connector.add(URL_B);
    let scheduler = test_scheduler(connector);

    let doomed_id = scheduler.register_agent(descriptor(URL_A)).await.unwrap();
    let job_id = scheduler.submit_job(small_spec("alpine")).await.unwrap();
    assert_eq!(
        scheduler.get_job(&job_id).await.unwrap().agent_id,
        Some(doomed_id)
    );

    let survivor_id = scheduler.register_agent(descriptor(URL_B)).await.unwrap();

    doomed.set_down(true);
    let monitor = scheduler.monitor();
    monitor.poll_cycle().await;
    monitor.wait_for_recoveries().await;

    assert_eq!(
        scheduler.agents().get(&doomed_id).await.unwrap().status,
        AgentStatus::Dead
    );
    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.agent_id, Some(survivor_id));
    assert_eq!(job.status, JobStatus::Deploying);
    assert_eq!(job.restart_count, 0);
    assert_eq!(survivor.submitted(), vec![job_id]);
}

#[tokio::test]
async fn test_finished_jobs_stay_with_dead_agent() {
    let connector = FakeConnector::new();
    let doomed = connector.add(URL_A);
    let survivor = connector.add(URL_B);
    let scheduler = test_scheduler(connector);

    let doomed_id = scheduler.register_agent(descriptor(URL_A)).await.unwrap();
    let job_id = scheduler.submit_job(small_spec("alpine")).await.unwrap();
    doomed.set_pulse(pulse(0.1, 0.1, vec![(job_id, JobStatus::End, 0)]));
    scheduler.monitor().poll_cycle().await;
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::End);

    scheduler.register_agent(descriptor(URL_B)).await.unwrap();
    doomed.set_down(true);
    let monitor = scheduler.monitor();
    monitor.poll_cycle().await;
    monitor.wait_for_recoveries().await;

    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::End);
    assert_eq!(job.agent_id, Some(doomed_id));
    assert!(survivor.submitted().is_empty());
}

#[tokio::test]
async fn test_orphans_wait_pending_then_land_on_new_agent() {
    let connector = FakeConnector::new();
    let doomed = connector.add(URL_A);
    let newcomer = connector.add(URL_B);
    let scheduler = test_scheduler(connector);

    scheduler.register_agent(descriptor(URL_A)).await.unwrap();
    let job_id = scheduler.submit_job(small_spec("alpine")).await.unwrap();

    doomed.set_down(true);
    let monitor = scheduler.monitor();
    monitor.poll_cycle().await;
    monitor.wait_for_recoveries().await;
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Pending);

    let newcomer_id = scheduler.register_agent(descriptor(URL_B)).await.unwrap();
    monitor.poll_cycle().await;

    let job = scheduler.get_job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Deploying);
    assert_eq!(job.agent_id, Some(newcomer_id));
    assert_eq!(newcomer.submitted(), vec![job_id]);
}

#[tokio::test]
async fn test_redeploy_with_missing_image_fails_job() {
    let connector = FakeConnector::new();
    let doomed = connector.add(URL_A);
    let survivor = connector.add(URL_B);
    let scheduler = test_scheduler(connector);

    scheduler.register_agent(descriptor(URL_A)).await.unwrap();
    let job_id = scheduler.submit_job(small_spec("alpine")).await.unwrap();
    scheduler.register_agent(descriptor(URL_B)).await.unwrap();
    survivor.fail_submissions(AgentCallError::ImageNotFound("alpine".into()));

    doomed.set_down(true);
    let monitor = scheduler.monitor();
    monitor.poll_cycle().await;
    monitor.wait_for_recoveries().await;

    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Fail);
}

#[tokio::test]
async fn test_run_loop_polls_until_cancelled() {
    let connector = FakeConnector::new();
    let agent = connector.add(URL_A);
    let scheduler = test_scheduler(connector);
    scheduler.register_agent(descriptor(URL_A)).await.unwrap();

    let token = CancellationToken::new();
    let handle = tokio::spawn(scheduler.monitor().run(token.clone()));

    assert_eventually(
        || async { agent.heartbeat_calls() >= 3 },
        Duration::from_secs(2),
        "monitor should poll the agent repeatedly",
    )
    .await;

    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("monitor should stop after cancellation")
        .unwrap();

    let calls = agent.heartbeat_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(agent.heartbeat_calls(), calls);
}

#[tokio::test]
async fn test_run_loop_places_pending_jobs() {
    let connector = FakeConnector::new();
    let agent = connector.add(URL_A);
    let scheduler = test_scheduler(connector);

    let job_id = scheduler.submit_job(small_spec("alpine")).await.unwrap();
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Pending);

    let token = CancellationToken::new();
    let handle = tokio::spawn(scheduler.monitor().run(token.clone()));
    scheduler.register_agent(descriptor(URL_A)).await.unwrap();

    assert_eventually(
        || async { agent.submitted() == vec![job_id] },
        Duration::from_secs(2),
        "pending job should be placed once an agent registers",
    )
    .await;
    assert_eq!(scheduler.get_status(&job_id).await.unwrap(), JobStatus::Deploying);

    token.cancel();
    handle.await.unwrap();
}
