// src/task_management.rs

use actix_web::{web, HttpResponse};
use log::{error, info};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::error::EngineError;
use crate::models::TaskSpec;
use crate::scheduler::{RunAutoAssign, RunOverdueSweep};

/// Request payload for manually assigning a batch of tasks
#[derive(Debug, Deserialize)]
pub struct AssignTasksRequest {
    #[serde(default)]
    pub requester_id: String,
    #[serde(default)]
    pub staff_id: String,
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
}

/// Request payload for a status change
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub task_id: String,
    pub status: String,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/tasks")
            .route("/assign", web::post().to(assign_tasks))
            .route("/staff/{staff_id}", web::get().to(get_staff_tasks))
            .route("/staff-details", web::get().to(get_staff_details))
            .route("/update-status", web::put().to(update_task_status))
            .route("/auto-assign", web::post().to(trigger_auto_assign))
            .route("/all-tasks", web::get().to(get_all_tasks))
            .route("/check-status", web::post().to(trigger_status_check)),
    );
}

/// ASSIGN a batch of tasks to one staff member
pub async fn assign_tasks(
    data: web::Data<AppState>,
    payload: web::Json<AssignTasksRequest>,
) -> Result<HttpResponse, EngineError> {
    let req = payload.into_inner();
    let tasks = data
        .engine
        .assign_tasks(&req.requester_id, &req.staff_id, &req.tasks)
        .await?;
    info!("Assigned {} task(s) to staff {}", tasks.len(), req.staff_id);
    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "tasks": tasks,
    })))
}

/// GET every task assigned to a staff member
pub async fn get_staff_tasks(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, EngineError> {
    let staff_id = path.into_inner();
    let tasks = data.engine.get_staff_tasks(&staff_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "tasks": tasks,
    })))
}

/// GET all staff with their current task embedded
pub async fn get_staff_details(data: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let staff_members = data.engine.get_staff_details().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "staffMembers": staff_members,
    })))
}

/// UPDATE a task's status
pub async fn update_task_status(
    data: web::Data<AppState>,
    payload: web::Json<UpdateStatusRequest>,
) -> Result<HttpResponse, EngineError> {
    let task = data
        .engine
        .update_status(&payload.task_id, &payload.status)
        .await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "task": task,
    })))
}

/// GET all tasks with assignee names
pub async fn get_all_tasks(data: web::Data<AppState>) -> Result<HttpResponse, EngineError> {
    let tasks = data.engine.get_all_tasks().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "tasks": tasks,
    })))
}

/// Run one auto-assignment pass through the scheduler
pub async fn trigger_auto_assign(data: web::Data<AppState>) -> HttpResponse {
    match data.scheduler.send(RunAutoAssign).await {
        Ok(pairings) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "Auto-assignment triggered",
            "pairings": pairings,
        })),
        Err(e) => {
            error!("Scheduler unavailable for auto-assignment: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "success": false,
                "error": "Scheduler unavailable",
            }))
        }
    }
}

/// Run the overdue sweep through the scheduler
pub async fn trigger_status_check(data: web::Data<AppState>) -> HttpResponse {
    match data.scheduler.send(RunOverdueSweep).await {
        Ok(report) => HttpResponse::Ok().json(serde_json::json!({
            "success": true,
            "message": "Task status check triggered",
            "recovered": report.recovered,
            "pairings": report.pairings,
        })),
        Err(e) => {
            error!("Scheduler unavailable for status check: {}", e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "success": false,
                "error": "Scheduler unavailable",
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{assert_invariants, engine, loose_task, staff_member};
    use crate::models::Priority;
    use crate::scheduler::ReconciliationScheduler;
    use crate::store::{InMemoryStore, Store};
    use actix::Actor;
    use actix_web::{http::StatusCode, test, App};
    use serde_json::{json, Value};
    use std::time::Duration;

    fn state(store: &InMemoryStore) -> AppState {
        let engine = engine(store);
        let hour = Duration::from_secs(3600);
        let scheduler = ReconciliationScheduler::new(engine.clone(), hour, hour).start();
        AppState { engine, scheduler }
    }

    #[actix_web::test]
    async fn assign_returns_created_batch() {
        let store = InMemoryStore::new();
        store.put_staff(staff_member("a", 10)).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tasks/assign")
            .set_json(json!({
                "requester_id": "mgr",
                "staff_id": "a",
                "tasks": [
                    {"title": "Close books", "description": "Month end", "priority": "high"},
                    {"title": "File report", "description": "Quarterly", "priority": "low"}
                ]
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0]["status"], "pending");
        assert_eq!(tasks[1]["priority"], "low");
        assert_eq!(tasks[0]["assignee_id"], "a");

        let a = store.find_staff_by_id("a").await.unwrap().unwrap();
        assert_eq!(a.current_task_id.as_deref(), tasks[0]["id"].as_str());
        assert_invariants(&store).await;
    }

    #[actix_web::test]
    async fn invalid_batch_is_a_bad_request() {
        let store = InMemoryStore::new();
        store.put_staff(staff_member("a", 10)).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tasks/assign")
            .set_json(json!({"staff_id": "a", "tasks": [{"title": "", "description": "x", "priority": "low"}]}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert!(store.find_all_tasks().await.unwrap().is_empty());
    }

    #[actix_web::test]
    async fn unknown_staff_and_task_are_not_found() {
        let store = InMemoryStore::new();
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tasks/assign")
            .set_json(json!({"staff_id": "ghost", "tasks": [{"title": "t", "description": "d", "priority": "low"}]}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::put()
            .uri("/tasks/update-status")
            .set_json(json!({"task_id": "missing", "status": "completed"}))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn completing_through_the_api_frees_staff() {
        let store = InMemoryStore::new();
        store.put_staff(staff_member("a", 10)).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/tasks/assign")
            .set_json(json!({"staff_id": "a", "tasks": [{"title": "Only", "description": "d", "priority": "high"}]}))
            .to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        let task_id = body["tasks"][0]["id"].as_str().unwrap().to_string();

        let req = test::TestRequest::put()
            .uri("/tasks/update-status")
            .set_json(json!({"task_id": task_id, "status": "completed"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["task"]["status"], "completed");

        let req = test::TestRequest::get().uri("/tasks/staff-details").to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        let members = body["staffMembers"].as_array().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0]["is_available"], true);
        assert!(members[0]["current_task"].is_null());

        let req = test::TestRequest::get().uri("/tasks/staff/a").to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["tasks"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn auto_assign_endpoint_runs_a_pass() {
        let store = InMemoryStore::new();
        store.put_staff(staff_member("a", 10)).await;
        store.put_task(loose_task("Pool", Priority::Low, 5)).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/tasks/auto-assign").to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["message"], "Auto-assignment triggered");
        let pairings = body["pairings"].as_array().unwrap();
        assert_eq!(pairings.len(), 1);
        assert_eq!(pairings[0]["staff_id"], "a");

        let req = test::TestRequest::get().uri("/tasks/all-tasks").to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["tasks"][0]["assignee_name"], "Staff a");
        assert_invariants(&store).await;
    }

    #[actix_web::test]
    async fn check_status_endpoint_reports_trigger() {
        let store = InMemoryStore::new();
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/tasks/check-status").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Task status check triggered");
        assert!(body["recovered"].as_array().unwrap().is_empty());
        assert!(body["pairings"].as_array().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn check_status_lists_recovered_and_reassigned_tasks() {
        let store = InMemoryStore::new();
        store.put_staff(staff_member("a", 10)).await;
        let mut late = loose_task("Late", Priority::High, 60);
        late.due_date = chrono::Utc::now() - chrono::Duration::minutes(1);
        store.put_task(late.clone()).await;
        let app = test::init_service(
            App::new().app_data(web::Data::new(state(&store))).configure(configure),
        )
        .await;

        let req = test::TestRequest::post().uri("/tasks/check-status").to_request();
        let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
        assert_eq!(body["recovered"], json!([late.id]));
        assert_eq!(body["pairings"], json!([{"staff_id": "a", "task_id": late.id}]));
        assert_invariants(&store).await;
    }
}
