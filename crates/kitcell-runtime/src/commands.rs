//! Request/reply command surface over the sequencer.
//!
//! A [`CommandClient`] sends a [`CellCommand`] through an mpsc channel and
//! awaits a [`CommandReply`] on a oneshot.  The [`CommandServer`] locks the
//! same [`SharedSequencer`] the order loop uses, so a command issued mid-order
//! waits for the current action to finish instead of interleaving with it.

use std::time::Duration;

use kitcell_perception::pose::Pose;
use kitcell_types::{AgvId, CellError, Part, Quadrant, ToolFamily, ToolStation};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::{self, CellConfig};
use crate::orders::SharedSequencer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CellCommand {
    GoHome,
    MoveToTable { station: ToolStation },
    PickupPart { part: Part, pose: Pose },
    PickupBinPart { part: Part },
    PlacePartOnTray { agv: AgvId, quadrant: Quadrant },
    PickupTray { tray_id: u8 },
    PlaceTrayOnAgv { agv: AgvId },
    MoveTrayToAgv { tray_id: u8, agv: AgvId },
    EnterToolChanger { station: ToolStation, family: ToolFamily },
    ExitToolChanger { station: ToolStation, family: ToolFamily },
    RemovePart { part: Part, pose: Pose },
}

impl CellCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CellCommand::GoHome => "go_home",
            CellCommand::MoveToTable { .. } => "move_to_table",
            CellCommand::PickupPart { .. } => "pickup_part",
            CellCommand::PickupBinPart { .. } => "pickup_bin_part",
            CellCommand::PlacePartOnTray { .. } => "place_part_on_tray",
            CellCommand::PickupTray { .. } => "pickup_tray",
            CellCommand::PlaceTrayOnAgv { .. } => "place_tray_on_agv",
            CellCommand::MoveTrayToAgv { .. } => "move_tray_to_agv",
            CellCommand::EnterToolChanger { .. } => "enter_tool_changer",
            CellCommand::ExitToolChanger { .. } => "exit_tool_changer",
            CellCommand::RemovePart { .. } => "remove_part",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub success: bool,
    pub message: String,
}

impl CommandReply {
    fn from_result(command: &str, result: Result<(), CellError>) -> Self {
        match result {
            Ok(()) => Self {
                success: true,
                message: format!("{command} succeeded"),
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

struct CommandRequest {
    command: CellCommand,
    reply: oneshot::Sender<CommandReply>,
}

/// Cloneable handle for issuing commands.
#[derive(Clone)]
pub struct CommandClient {
    tx: mpsc::Sender<CommandRequest>,
}

impl CommandClient {
    pub async fn call(&self, command: CellCommand) -> Result<CommandReply, CellError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| CellError::Channel("command server stopped".into()))?;
        rx.await
            .map_err(|_| CellError::Channel("command dropped without reply".into()))
    }
}

pub struct CommandServer {
    sequencer: SharedSequencer,
    pickup_timeout: Duration,
    rx: mpsc::Receiver<CommandRequest>,
}

/// Create a server bound to `sequencer` and its first client.
pub fn command_channel(
    sequencer: SharedSequencer,
    cfg: &CellConfig,
    capacity: usize,
) -> (CommandServer, CommandClient) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let server = CommandServer {
        sequencer,
        pickup_timeout: config::secs(cfg.attach.pickup_timeout_secs),
        rx,
    };
    (server, CommandClient { tx })
}

impl CommandServer {
    /// Serve until every client is dropped.
    pub async fn run(mut self) {
        info!("command server listening");
        while let Some(request) = self.rx.recv().await {
            let name = request.command.name();
            let reply = self.execute(request.command).await;
            if request.reply.send(reply).is_err() {
                debug!(command = name, "caller went away before the reply");
            }
        }
        info!("command server stopped");
    }

    pub async fn execute(&self, command: CellCommand) -> CommandReply {
        let name = command.name();
        let mut seq = self.sequencer.lock().await;
        let result = match command {
            CellCommand::GoHome => seq.go_home().await,
            CellCommand::MoveToTable { station } => seq.move_to_table(station).await,
            CellCommand::PickupPart { part, pose } => {
                seq.pickup_part_at(part, pose, self.pickup_timeout).await
            }
            CellCommand::PickupBinPart { part } => seq.pickup_bin_part(part).await,
            CellCommand::PlacePartOnTray { agv, quadrant } => {
                seq.place_part_on_tray(agv, quadrant).await
            }
            CellCommand::PickupTray { tray_id } => seq.pickup_tray(tray_id).await,
            CellCommand::PlaceTrayOnAgv { agv } => seq.place_tray_on_agv(agv).await,
            CellCommand::MoveTrayToAgv { tray_id, agv } => seq.move_tray_to_agv(tray_id, agv).await,
            CellCommand::EnterToolChanger { station, family } => {
                seq.enter_tool_changer(station, family).await
            }
            CellCommand::ExitToolChanger { station, family } => {
                seq.exit_tool_changer(station, family).await
            }
            CellCommand::RemovePart { part, pose } => seq.remove_part(part, pose).await,
        };
        if let Err(e) = &result {
            warn!(command = name, error = %e, "command failed");
        }
        CommandReply::from_result(name, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::PickPlaceSequencer;
    use kitcell_hal::{CellBackends, JointTarget, SimCell, SimCommand};
    use kitcell_middleware::{EventBus, StateStore};
    use kitcell_types::{PartColor, PartType};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn serve() -> (CommandClient, Arc<SimCell>, tokio::task::JoinHandle<()>) {
        let cfg = CellConfig::default();
        let store = StateStore::new();
        let cell = SimCell::builder(store.clone()).build();
        let seq = PickPlaceSequencer::new(
            Arc::new(cfg.clone()),
            store,
            CellBackends::uniform(cell.clone()),
            EventBus::default(),
        );
        let (server, client) = command_channel(Arc::new(Mutex::new(seq)), &cfg, 8);
        let handle = tokio::spawn(server.run());
        (client, cell, handle)
    }

    #[tokio::test]
    async fn go_home_round_trip() {
        let (client, cell, _handle) = serve();
        let reply = client.call(CellCommand::GoHome).await.unwrap();
        assert!(reply.success, "{}", reply.message);
        assert_eq!(
            cell.commands(),
            vec![SimCommand::PlanAndExecute(JointTarget::Named("home".into()))]
        );
    }

    #[tokio::test]
    async fn failures_come_back_as_replies() {
        let (client, _cell, _handle) = serve();
        let reply = client
            .call(CellCommand::PickupBinPart {
                part: Part::new(PartType::Sensor, PartColor::Green),
            })
            .await
            .unwrap();
        assert!(!reply.success);
        assert!(reply.message.contains("green sensor"), "{}", reply.message);
    }

    #[tokio::test]
    async fn explicit_pickup_then_place() {
        let (client, _cell, _handle) = serve();
        let part = Part::new(PartType::Battery, PartColor::Orange);
        let pickup = client
            .call(CellCommand::PickupPart {
                part,
                pose: Pose::from_xyz_yaw(-1.9, 3.0, 0.72, 0.0),
            })
            .await
            .unwrap();
        assert!(pickup.success, "{}", pickup.message);

        let place = client
            .call(CellCommand::PlacePartOnTray {
                agv: AgvId::new(1).unwrap(),
                quadrant: Quadrant::Q3,
            })
            .await
            .unwrap();
        assert!(place.success, "{}", place.message);
    }

    #[tokio::test]
    async fn server_stops_when_clients_are_gone() {
        let (client, _cell, handle) = serve();
        drop(client);
        handle.await.unwrap();
    }

    #[test]
    fn commands_parse_from_toml() {
        let cmd: CellCommand = toml::from_str(
            r#"
            command = "move_tray_to_agv"
            tray_id = 4
            agv = 3
            "#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            CellCommand::MoveTrayToAgv {
                tray_id: 4,
                agv: AgvId::new(3).unwrap()
            }
        );
    }
}
