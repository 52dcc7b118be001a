//! The `/api/v1/` JSON surface (spec.md §6): one `axum` handler per route,
//! every response wrapped in the `{"status":0|-1,"data":...}` envelope.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bubble_master::Master;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
struct Envelope {
    status: i32,
    data: Value,
}

fn ok(data: impl Into<Value>) -> Json<Envelope> {
    Json(Envelope { status: 0, data: data.into() })
}

fn fail(msg: impl std::fmt::Display) -> Json<Envelope> {
    Json(Envelope { status: -1, data: Value::String(msg.to_string()) })
}

pub fn router(master: Arc<Master>) -> Router {
    Router::new()
        .route("/jobs/list", get(jobs_list))
        .route("/jobs/create/{name}", get(jobs_create))
        .route("/jobs/delete/{name}", delete(jobs_delete))
        .route("/jobs/{name}/script", get(job_script_get).post(job_script_set))
        .route("/jobs/{name}/crons/add/{kind}", get(job_crons_add))
        .route("/jobs/{name}/crons/remove/{hex_id}", delete(job_crons_remove))
        .route("/jobs/{name}/crons/list", get(job_crons_list))
        .route("/jobs/{name}/trigger", get(job_trigger))
        .route("/jobs/{name}/list/{page}", get(job_list_runners))
        .route("/jobs/{name}/cancel/{hex_runner}", get(job_cancel_runner))
        .route("/jobs/{name}/log/{hex_runner}/{cmd_index}/{full}", get(job_runner_log))
        .route("/workers/monitor", get(workers_monitor))
        .with_state(master)
}

async fn jobs_list(State(master): State<Arc<Master>>) -> Json<Envelope> {
    ok(json!(master.list_jobs()))
}

async fn jobs_create(State(master): State<Arc<Master>>, Path(name): Path<String>) -> Json<Envelope> {
    match master.create_job(&name).await {
        Ok(()) => ok(json!(name)),
        Err(err) => fail(err),
    }
}

async fn jobs_delete(State(master): State<Arc<Master>>, Path(name): Path<String>) -> Json<Envelope> {
    match master.delete_job(&name).await {
        Ok(()) => ok(json!(name)),
        Err(err) => fail(err),
    }
}

async fn job_script_get(State(master): State<Arc<Master>>, Path(name): Path<String>) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    ok(json!(BASE64.encode(job.script().await)))
}

async fn job_script_set(
    State(master): State<Arc<Master>>,
    Path(name): Path<String>,
    body: String,
) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let bytes = match BASE64.decode(body.trim().as_bytes()) {
        Ok(bytes) => bytes,
        Err(err) => return fail(err),
    };
    match job.set_script(bytes).await {
        Ok(()) => ok(json!(true)),
        Err(err) => fail(err),
    }
}

async fn job_crons_add(
    State(master): State<Arc<Master>>,
    Path((name, kind)): Path<(String, u8)>,
) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let Some(t) = bubble_cron::Type::from_u8(kind) else { return fail(format!("unknown cron type [{kind}]")) };
    let id = job.add_cron(t).await;
    ok(json!(bubble_env::to_hex(id)))
}

async fn job_crons_remove(
    State(master): State<Arc<Master>>,
    Path((name, hex_id)): Path<(String, String)>,
) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let Some(id) = bubble_env::from_hex(&hex_id) else { return fail(format!("bad trigger id [{hex_id}]")) };
    match job.remove_cron(id).await {
        Ok(()) => ok(json!(true)),
        Err(err) => fail(err),
    }
}

async fn job_crons_list(State(master): State<Arc<Master>>, Path(name): Path<String>) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let ids: Vec<String> = job.cron_ids().await.into_iter().map(bubble_env::to_hex).collect();
    ok(json!(ids))
}

async fn job_trigger(State(master): State<Arc<Master>>, Path(name): Path<String>) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    match job.trigger().await {
        Ok(runner_id) => ok(json!(bubble_env::to_hex(runner_id))),
        Err(err) => fail(err),
    }
}

async fn job_list_runners(
    State(master): State<Arc<Master>>,
    Path((name, page)): Path<(String, usize)>,
) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let now = now_unix();
    let mut runners = Vec::new();
    for runner_id in job.list_runners(page).await {
        let Some(runner) = job.runner(runner_id).await else { continue };
        let commands: Vec<Value> = (0..runner.command_count())
            .filter_map(|i| runner.command(i))
            .map(|cmd| json!({"status": cmd.status(), "elapsed": cmd.measure(now)}))
            .collect();
        runners.push(json!({"id": bubble_env::to_hex(runner_id), "commands": commands}));
    }
    ok(json!(runners))
}

async fn job_cancel_runner(
    State(master): State<Arc<Master>>,
    Path((name, hex_runner)): Path<(String, String)>,
) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let Some(runner_id) = bubble_env::from_hex(&hex_runner) else {
        return fail(format!("bad runner id [{hex_runner}]"));
    };
    let Some(runner) = job.runner(runner_id).await else {
        return fail(format!("runner [{hex_runner}] does not exist"));
    };
    runner.cancel().await;
    ok(json!(true))
}

async fn job_runner_log(
    State(master): State<Arc<Master>>,
    Path((name, hex_runner, cmd_index, full)): Path<(String, String, usize, bool)>,
) -> Json<Envelope> {
    let Some(job) = master.get_job(&name) else { return fail(format!("job [{name}] does not exist")) };
    let Some(runner_id) = bubble_env::from_hex(&hex_runner) else {
        return fail(format!("bad runner id [{hex_runner}]"));
    };
    let Some(runner) = job.runner(runner_id).await else {
        return fail(format!("runner [{hex_runner}] does not exist"));
    };
    let Some(cmd) = runner.command(cmd_index) else {
        return fail(format!("command index [{cmd_index}] out of range"));
    };
    match cmd.logs(full) {
        Ok((bytes, is_full)) => ok(json!({"payload_b64": BASE64.encode(bytes), "full": is_full})),
        Err(err) => fail(err),
    }
}

async fn workers_monitor(State(master): State<Arc<Master>>) -> Json<Envelope> {
    let workers: Vec<Value> = master
        .workers()
        .iter()
        .map(|w| json!({"id": bubble_env::to_hex(w.id()), "base": w.base(), "workload": w.workload()}))
        .collect();
    ok(json!(workers))
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}
