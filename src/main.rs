use actix_web::{web, App, HttpServer};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

mod models;
mod services;
mod state;
mod api;
mod cli;
mod metrics;
mod tracker;

use state::{new_state, AppState};
use api::{register_job, unregister_job, list_jobs, get_metrics, health};
use cli::CommandArgs;
use services::Collector;
use tracker::JobRegistry;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CommandArgs::parse();
    let bind_address = format!("{}:{}", args.address, args.port);

    let mut registry = JobRegistry::with_max_age(args.max_age);
    for p in &args.job_patterns {
        registry.register_pattern(&p.job_id, &p.job_id, p.regex.clone());
    }
    let state = new_state(registry, !args.no_process_metrics);

    let collector = Arc::new(Collector::new(&args.proc_root, &args.cgroup_root));
    actix_rt::spawn(collect_loop(collector, state.clone(), Duration::from_secs(args.interval)));

    print_banner(&args);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(state.clone()))
            .route("/api/job/register", web::post().to(register_job))
            .route("/api/job/list", web::get().to(list_jobs))
            .route("/api/job/{job_id}", web::delete().to(unregister_job))
            .route("/metrics", web::get().to(get_metrics))
            .route("/health", web::get().to(health))
    })
        .bind(&bind_address)?
        .run()
        .await
}

/// Runs one collection cycle per tick. Reading procfs blocks, so each cycle
/// goes to the blocking pool.
async fn collect_loop(collector: Arc<Collector>, state: AppState, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let collector = collector.clone();
        let state = state.clone();
        match tokio::task::spawn_blocking(move || collector.run_cycle(&state)).await {
            Ok(Ok(report)) => log::debug!(
                "cycle {}: {} samples ({} dropped), {} new jobs, {} finished, {} evicted",
                report.cycle,
                report.recorded,
                report.dropped,
                report.new_jobs,
                report.removed_jobs,
                report.evicted
            ),
            Ok(Err(e)) => log::error!("collection cycle skipped: {:#}", e),
            Err(e) => log::error!("collection task failed: {}", e),
        }
    }
}

fn print_banner(args: &CommandArgs) {
    println!("╔═══════════════════════════════════════════════════════════╗");
    println!("║      Job Exporter v{:<39}║", env!("CARGO_PKG_VERSION"));
    println!("║      Per-job process accounting for batch clusters        ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!("🚀 Server starting on http://{}:{}", args.address, args.port);
    println!();
    println!("📋 Available endpoints:");
    println!("  POST   /api/job/register   - Register a pattern job");
    println!("  DELETE /api/job/{{job_id}}   - Stop tracking a job");
    println!("  GET    /api/job/list       - List tracked jobs");
    println!("  GET    /metrics            - Prometheus metrics");
    println!("  GET    /health             - Health check");
    println!();
    println!("💡 Collection:");
    println!("  • Jobs from {} every {}s", args.cgroup_root, args.interval);
    println!("  • Processes kept {} cycles after they vanish", args.max_age);
    if !args.job_patterns.is_empty() {
        println!("  • {} pattern job(s) from the command line", args.job_patterns.len());
    }
    println!("═══════════════════════════════════════════════════════════");
}
