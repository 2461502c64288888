use crate::engine::Scheduler;
use crate::types::{RoomStatus, RoomStatusChange};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A room going from waiting to active starts its match
pub fn is_activation(change: &RoomStatusChange) -> bool {
    change.from == RoomStatus::Waiting && change.to == RoomStatus::Active
}

/// Spawn a background task that launches a match for every room that gets activated.
///
/// Subscribes before spawning so no activation between the call and the first
/// poll is missed. A lagged receiver falls back to scanning active rooms.
pub fn spawn_activation_trigger(scheduler: Scheduler) -> JoinHandle<()> {
    let mut changes = scheduler.engine().stores.rooms.subscribe_status_changes();

    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) if is_activation(&change) => {
                    info!("Room {} activated", change.room_id);
                    if let Err(e) = scheduler.launch(&change.room_id).await {
                        error!("Failed to launch room {}: {}", change.room_id, e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Activation trigger lagged by {} events; rescanning", skipped);
                    if let Err(e) = scheduler.resume_active_rooms().await {
                        error!("Rescan of active rooms failed: {}", e);
                    }
                }
                Err(RecvError::Closed) => {
                    info!("Room status channel closed; activation trigger exiting");
                    break;
                }
            }
        }
    })
}
