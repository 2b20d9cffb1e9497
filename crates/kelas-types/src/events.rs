use serde::{Deserialize, Serialize};

use crate::models::{ChannelId, UserId};
use crate::views::{ChannelFeed, DirectorySnapshot};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: UserId, display_name: String },

    /// Latest grouped channel directory for this connection
    DirectoryUpdate(DirectorySnapshot),

    /// Latest message feed of the watched channel
    ChannelUpdate(ChannelFeed),

    /// A command could not be served
    Error { message: String },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Start streaming directory snapshots
    WatchDirectory,

    /// Stream the given channel, replacing any previously watched channel
    WatchChannel { channel_id: ChannelId },

    /// Stop streaming the watched channel
    UnwatchChannel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_shape() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"WatchChannel","data":{"channel_id":"c1"}}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::WatchChannel { channel_id } if channel_id == "c1"));

        let cmd: GatewayCommand = serde_json::from_str(r#"{"type":"WatchDirectory"}"#).unwrap();
        assert!(matches!(cmd, GatewayCommand::WatchDirectory));
    }

    #[test]
    fn directory_update_is_tagged() {
        let json = serde_json::to_value(GatewayEvent::DirectoryUpdate(DirectorySnapshot::default())).unwrap();
        assert_eq!(json["type"], "DirectoryUpdate");
        assert!(json["data"]["groups"].as_array().unwrap().is_empty());
    }
}
