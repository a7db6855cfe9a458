mod helpers;

use sqlx::PgPool;
use uuid::Uuid;

use deployknot::queue::{self, JobStatus};
use deployknot::store::deployments;
use deployknot::store::models::{Job, LogLevel};

fn sample_job(deployment_id: Uuid) -> Job {
    Job {
        job_id: Uuid::new_v4(),
        deployment_id,
        target_ip: "10.0.0.5".into(),
        ssh_username: "root".into(),
        ssh_password: "pw".into(),
        github_repo_url: "https://github.com/x/y.git".into(),
        github_pat: "pat".into(),
        github_branch: "main".into(),
        port: 3000,
        container_name: "deployknot-test".into(),
        additional_vars: Default::default(),
        local_env_file_path: None,
    }
}

#[sqlx::test(migrations = "./migrations")]
async fn enqueue_dequeue_round_trip_preserves_job(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let job = sample_job(Uuid::new_v4());

    queue::enqueue(&state.valkey, &job).await.unwrap();
    let popped = queue::dequeue(&state.valkey, 5.0).await.unwrap().expect("job should be present");

    assert_eq!(popped.job_id, job.job_id);
    assert_eq!(popped.deployment_id, job.deployment_id);

    let record = queue::read_record(&state.valkey, job.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Running);
    assert!(record.claimed_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn fifo_order_preserved_across_two_jobs(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let first = sample_job(Uuid::new_v4());
    let second = sample_job(Uuid::new_v4());

    queue::enqueue(&state.valkey, &first).await.unwrap();
    queue::enqueue(&state.valkey, &second).await.unwrap();

    let popped_first = queue::dequeue(&state.valkey, 5.0).await.unwrap().unwrap();
    let popped_second = queue::dequeue(&state.valkey, 5.0).await.unwrap().unwrap();

    assert_eq!(popped_first.job_id, first.job_id);
    assert_eq!(popped_second.job_id, second.job_id);
}

#[sqlx::test(migrations = "./migrations")]
async fn update_status_marks_record_terminal(pool: PgPool) {
    let state = helpers::test_state(pool).await;
    let job = sample_job(Uuid::new_v4());
    queue::enqueue(&state.valkey, &job).await.unwrap();
    queue::dequeue(&state.valkey, 5.0).await.unwrap();

    queue::update_status(&state.valkey, job.job_id, JobStatus::Completed, None)
        .await
        .unwrap();

    let record = queue::read_record(&state.valkey, job.job_id).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.completed_at.is_some());
}

#[sqlx::test(migrations = "./migrations")]
async fn log_catchup_then_forward_cursor_never_reorders(pool: PgPool) {
    let deployment_id = Uuid::new_v4();
    let row = deployments::NewDeployment {
        id: deployment_id,
        target_ip: "10.0.0.5".into(),
        ssh_username: "root".into(),
        ssh_password: "pw".into(),
        github_repo_url: "https://github.com/x/y.git".into(),
        github_pat: "pat".into(),
        github_branch: "main".into(),
        additional_vars: serde_json::json!({}),
        port: 3000,
        container_name: "deployknot-test".into(),
        project_name: None,
        deployment_name: None,
        user_id: None,
        local_env_file_path: None,
    };
    deployments::create_deployment(&pool, &row).await.unwrap();

    for i in 0..3 {
        deployments::append_log(&pool, deployment_id, LogLevel::Info, &format!("step-2 line {i}"), None, Some(2))
            .await
            .unwrap();
    }

    let catchup = deployments::list_logs_after(&pool, deployment_id, None, 50).await.unwrap();
    assert_eq!(catchup.len(), 3);
    let cursor = Some((catchup[2].created_at, catchup[2].id));

    for i in 0..2 {
        deployments::append_log(&pool, deployment_id, LogLevel::Info, &format!("step-3 line {i}"), None, Some(3))
            .await
            .unwrap();
    }

    let next = deployments::list_logs_after(&pool, deployment_id, cursor, 50).await.unwrap();
    assert_eq!(next.len(), 2);
    assert!(next.iter().all(|l| l.step_order == Some(3)));

    let mut seen_at = Vec::new();
    for log in catchup.iter().chain(next.iter()) {
        seen_at.push((log.created_at, log.id));
    }
    let mut sorted = seen_at.clone();
    sorted.sort();
    assert_eq!(seen_at, sorted, "logs must be observed in (created_at, id) order");
}
