use crate::{models::DiagnosticsResponse, AppState};
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Report room, connection and process statistics
pub async fn diagnostics(
    State(app_state): State<Arc<AppState>>,
) -> (StatusCode, Json<DiagnosticsResponse>) {
    // Aggregate diagnostics from the registry
    let mut n_conn: u32 = 0;
    let mut n_rooms: u32 = 0;
    let mut n_dirty_rooms: u32 = 0;
    for room in app_state.registry.rooms() {
        n_rooms += 1;
        n_conn += room.client_count() as u32;
        if room.is_dirty() {
            n_dirty_rooms += 1;
        }
    }

    let uptime_secs = (Utc::now() - app_state.started_at).num_seconds();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {} ({} dirty)",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms,
        n_dirty_rooms
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_rooms,
            n_dirty_rooms,
            uptime_secs,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
