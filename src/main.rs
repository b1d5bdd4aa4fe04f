// src/main.rs

mod app_state;
mod config;
mod db;
mod engine;
mod error;
mod matcher;
mod models;
mod scheduler;
mod store;
mod task_management;

use std::io;
use std::sync::Arc;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{http, middleware::Logger, web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};
use mongodb::bson::doc;

use crate::app_state::AppState;
use crate::config::{Config, MatcherKind, StoreBackend};
use crate::engine::AssignmentEngine;
use crate::matcher::{FirstInPool, Matcher, OracleMatcher};
use crate::models::Staff;
use crate::scheduler::ReconciliationScheduler;
use crate::store::{InMemoryStore, MongoStore, Store};

fn startup_error<E: std::fmt::Display>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

async fn build_store(config: &Config) -> io::Result<Arc<dyn Store>> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            let store = InMemoryStore::new();
            if let Some(path) = &config.memory_staff_file {
                let raw = std::fs::read_to_string(path).map_err(startup_error)?;
                let staff: Vec<Staff> = serde_json::from_str(&raw).map_err(startup_error)?;
                info!("Seeding {} staff member(s) from {}", staff.len(), path);
                for member in staff {
                    store.put_staff(member).await;
                }
            }
            Ok(Arc::new(store))
        }
        StoreBackend::Mongo => {
            let uri = config
                .mongo_uri
                .as_deref()
                .ok_or_else(|| startup_error("MONGO_URI must be set"))?;
            let mongodb = db::MongoDB::init(uri, &config.database_name)
                .await
                .map_err(startup_error)?;
            mongodb
                .client
                .database("admin")
                .run_command(doc! { "ping": 1 })
                .await
                .map_err(startup_error)?;
            info!("Connected to MongoDB database {}", config.database_name);
            Ok(Arc::new(MongoStore::new(&mongodb.db)))
        }
    }
}

fn build_matcher(config: &Config) -> Arc<dyn Matcher> {
    match config.matcher {
        MatcherKind::FirstInPool => Arc::new(FirstInPool),
        MatcherKind::Oracle => Arc::new(OracleMatcher::new(config.ai_endpoint())),
    }
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::from_env().map_err(startup_error)?;
    let store = build_store(&config).await?;
    let matcher = build_matcher(&config);
    info!("Task matcher: {}", matcher.name());

    let engine = AssignmentEngine::new(store, matcher, config.engine_settings());
    let scheduler = ReconciliationScheduler::new(
        engine.clone(),
        config.overdue_sweep_interval,
        config.daily_auto_assign_interval,
    )
    .start();

    let bind_addr = config.bind_addr.clone();
    let frontend_origin = config.frontend_origin.clone();
    info!("Server running at http://{}", bind_addr);
    info!("Allowed CORS Origin: {}", frontend_origin);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "OPTIONS"])
            .allowed_headers(vec![http::header::CONTENT_TYPE, http::header::ACCEPT])
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(AppState {
                engine: engine.clone(),
                scheduler: scheduler.clone(),
            }))
            .configure(task_management::configure)
    })
    .bind(bind_addr)?
    .run()
    .await
}
