use actix_web::{web, HttpResponse, Responder};

use crate::metrics::METRICS;
use crate::state::AppState;

/// Publishes the registry as it stood after the last completed cycle.
pub async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    {
        let Ok(state) = data.lock() else {
            log::error!("application state lock poisoned");
            return HttpResponse::InternalServerError().body("application state unavailable");
        };
        METRICS.publish(&state);
    }

    match METRICS.render() {
        Ok(metrics_text) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics_text),
        Err(e) => {
            log::error!("Failed to render metrics: {}", e);
            HttpResponse::InternalServerError().body("Failed to render metrics")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawProcessSample;
    use crate::state::new_state;
    use crate::tracker::JobRegistry;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_get_metrics() {
        let mut registry = JobRegistry::new();
        registry.begin_cycle();
        registry.ingest_sample("api-metrics", "sim", None, &RawProcessSample::new(3, "sim"));
        registry.end_cycle();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(new_state(registry, false)))
                .route("/metrics", web::get().to(get_metrics)),
        )
        .await;

        let req = test::TestRequest::get().uri("/metrics").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body = test::read_body(resp).await;
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("job_processes{"));
        assert!(text.contains("job_id=\"api-metrics\""));
    }
}
