use actix_web::{web, HttpResponse, Responder};
use regex::Regex;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub job_id: String,
    /// Defaults to the job id
    #[serde(default)]
    pub name: Option<String>,
    /// Pattern tested against process command lines
    pub cmdline: String,
}

/// Compiles a command line pattern. An invalid regular expression is
/// matched as a plain substring instead.
pub fn compile_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    match Regex::new(pattern) {
        Ok(r) => Ok(r),
        Err(e) => {
            log::warn!("'{}' is not a valid regex ({}), matching it literally", pattern, e);
            Regex::new(&regex::escape(pattern))
        }
    }
}

fn state_unavailable() -> HttpResponse {
    HttpResponse::InternalServerError().json(serde_json::json!({
        "status": "error",
        "message": "application state unavailable"
    }))
}

pub async fn register_job(
    data: web::Data<AppState>,
    req: web::Json<RegisterRequest>,
) -> impl Responder {
    let req = req.into_inner();
    let name = req.name.unwrap_or_else(|| req.job_id.clone());

    let regex = match compile_pattern(&req.cmdline) {
        Ok(r) => r,
        Err(e) => {
            return HttpResponse::BadRequest().json(serde_json::json!({
                "status": "error",
                "message": format!("cannot use pattern '{}': {}", req.cmdline, e)
            }));
        }
    };

    let Ok(mut state) = data.lock() else {
        return state_unavailable();
    };

    if let Some(existing) = state.registry.job(&req.job_id) {
        return HttpResponse::Conflict().json(serde_json::json!({
            "status": "error",
            "message": format!("Job '{}' is already tracked", req.job_id),
            "job_name": existing.job_name(),
            "processes": existing.process_count()
        }));
    }

    state.registry.register_pattern(&req.job_id, &name, regex);

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "message": format!("Job '{}' registered", req.job_id),
        "job_id": req.job_id,
        "name": name,
        "cmdline": req.cmdline
    }))
}

pub async fn unregister_job(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let job_id = path.into_inner();
    let Ok(mut state) = data.lock() else {
        return state_unavailable();
    };

    // Removal races with job creation, so an unknown id is not an error
    let removed = state.registry.remove_job(&job_id);
    if removed {
        log::info!("job {} removed on request", job_id);
    }

    HttpResponse::Ok().json(serde_json::json!({
        "status": "success",
        "job_id": job_id,
        "removed": removed
    }))
}

pub async fn list_jobs(data: web::Data<AppState>) -> impl Responder {
    let Ok(state) = data.lock() else {
        return state_unavailable();
    };

    let list: Vec<_> = state
        .registry
        .snapshot()
        .map(|job| {
            let processes: Vec<_> = job
                .processes()
                .map(|p| {
                    serde_json::json!({
                        "pid": p.pid,
                        "age": p.age,
                        "usage": p.usage
                    })
                })
                .collect();
            serde_json::json!({
                "job_id": job.job_id(),
                "job_name": job.job_name(),
                "pattern": job.pattern(),
                "totals": job.totals(),
                "processes": processes
            })
        })
        .collect();

    HttpResponse::Ok().json(list)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawProcessSample;
    use crate::state::new_state;
    use crate::tracker::JobRegistry;
    use actix_web::{test, App};

    fn app_state() -> AppState {
        let mut registry = JobRegistry::new();
        registry.begin_cycle();
        let sample = RawProcessSample {
            cpu_user_ticks: Some(250),
            ..RawProcessSample::new(10, "sim")
        };
        registry.ingest_sample("42", "sim", None, &sample);
        registry.end_cycle();
        new_state(registry, true)
    }

    #[actix_web::test]
    async fn test_compile_pattern_fallback() {
        let r = compile_pattern("run(").unwrap();
        assert!(r.is_match("mpirun(x)"));
        assert!(!r.is_match("mpirun x"));
    }

    #[actix_web::test]
    async fn test_register_and_conflict() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/api/job/register", web::post().to(register_job)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/job/register")
            .set_json(serde_json::json!({"job_id": "vasp", "cmdline": "vasp_std"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::post()
            .uri("/api/job/register")
            .set_json(serde_json::json!({"job_id": "42", "cmdline": "x"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::CONFLICT);

        let guard = state.lock().unwrap();
        let job = guard.registry.job("vasp").unwrap();
        assert_eq!(job.job_name(), "vasp");
        assert_eq!(job.matcher().pattern_source(), Some("vasp_std"));
    }

    #[actix_web::test]
    async fn test_unregister_is_idempotent() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state.clone()))
                .route("/api/job/{job_id}", web::delete().to(unregister_job)),
        )
        .await;

        for expected in [true, false] {
            let req = test::TestRequest::delete().uri("/api/job/42").to_request();
            let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
            assert_eq!(body["removed"], expected);
        }
        assert!(state.lock().unwrap().registry.is_empty());
    }

    #[actix_web::test]
    async fn test_list_jobs() {
        let state = app_state();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/api/job/list", web::get().to(list_jobs)),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/job/list").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["job_id"], "42");
        assert_eq!(body[0]["totals"]["cpu_user_ticks"], 250);
        assert_eq!(body[0]["processes"][0]["pid"], 10);
        assert!(body[0]["pattern"].is_null());
    }
}
