use async_trait::async_trait;

use buildsense_core::error::DispatchError;
use buildsense_core::proposal::DeviceAction;
use buildsense_core::room::RoomId;

/// Hands winning actions to whatever drives the physical devices.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, room_id: &RoomId, actions: &[DeviceAction])
        -> Result<(), DispatchError>;
}

/// Emits one log event per action and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingDispatcher;

#[async_trait]
impl CommandDispatcher for LoggingDispatcher {
    async fn dispatch(
        &self,
        room_id: &RoomId,
        actions: &[DeviceAction],
    ) -> Result<(), DispatchError> {
        for action in actions {
            let parameters = serde_json::to_string(&action.parameters).unwrap_or_default();
            tracing::info!(
                room_id = %room_id,
                device_id = %action.device_id,
                verb = %action.verb,
                parameters = %parameters,
                "device_command"
            );
        }
        Ok(())
    }
}
