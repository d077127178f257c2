use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::ptz::command::{PtzBackend, PtzCommand};

/// Loop-side handle of the PTZ command queue.
#[derive(Clone)]
pub struct PtzCommandSender {
    commands: Sender<PtzCommand>,
}

impl PtzCommandSender {
    /// Queues a command without waiting. Returns false if it was dropped.
    pub fn send(&self, command: PtzCommand) -> bool {
        match self.commands.try_send(command) {
            Ok(()) => true,
            Err(TrySendError::Full(command)) => {
                warn!(?command, "Dropping PTZ command: queue full");
                false
            }
            Err(TrySendError::Closed(command)) => {
                warn!(?command, "PTZ command queue closed");
                false
            }
        }
    }
}

/// Starts the single task that executes queued commands in order on the backend.
pub fn spawn_ptz_dispatch(
    backend: Arc<dyn PtzBackend>,
    queue: usize,
) -> (PtzCommandSender, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PtzCommand>(queue.max(1));
    let handle = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            debug!(?command, "Executing PTZ command");
            if let Err(e) = backend.execute(&command).await {
                warn!(?command, "PTZ command failed: {}", e);
            }
        }
        debug!("PTZ command queue drained");
    });
    (PtzCommandSender { commands: tx }, handle)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CameraError;
    use crate::ptz::command::{Direction, PtzCapabilities};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    pub(crate) struct RecordingBackend {
        pub executed: Mutex<Vec<PtzCommand>>,
        pub capabilities: PtzCapabilities,
        pub delay: Duration,
    }

    #[async_trait]
    impl PtzBackend for RecordingBackend {
        fn capabilities(&self) -> PtzCapabilities {
            self.capabilities
        }

        async fn execute(&self, command: &PtzCommand) -> Result<(), CameraError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.executed.lock().unwrap().push(*command);
            Ok(())
        }
    }

    #[tokio::test]
    async fn commands_execute_in_order() {
        let backend = Arc::new(RecordingBackend::default());
        let (sender, handle) = spawn_ptz_dispatch(backend.clone(), 8);
        let moves = [
            PtzCommand::Move {
                direction: Direction::Up,
                speed: 5,
            },
            PtzCommand::GotoPreset(2),
            PtzCommand::Stop,
        ];
        for command in moves {
            assert!(sender.send(command));
        }
        drop(sender);
        handle.await.unwrap();
        assert_eq!(*backend.executed.lock().unwrap(), moves.to_vec());
    }

    #[tokio::test]
    async fn full_queue_drops_commands() {
        let backend = Arc::new(RecordingBackend {
            delay: Duration::from_millis(200),
            ..RecordingBackend::default()
        });
        let (sender, _handle) = spawn_ptz_dispatch(backend, 1);
        let mut accepted = 0;
        for _ in 0..5 {
            if sender.send(PtzCommand::Stop) {
                accepted += 1;
            }
        }
        assert!(accepted < 5);
    }
}
